//! The linker's passes over tokenized inputs.
//!
//! Inputs are tokenized once and re-walked per pass:
//!
//! - **sizing** defines every symbol and measures its payload;
//! - **use collection** (optimization only) records which symbols each
//!   symbol references;
//! - **labels** resolves the label offsets of one member, now that sizes
//!   and addresses are known;
//! - **emit** writes a member's bytes with all references resolved.
//!
//! The label and emit passes run per archive member, in order, so label
//! scoping matches the file structure.

use std::collections::HashMap;
use std::rc::Rc;

use ohex::{Mark, Spanned, Token, Tokenized};

use crate::emit::Emitter;
use crate::label::{Label, LabelMap};
use crate::symbol::{SymbolTable, GLOBAL};
use crate::{Error, Result};

/// One object file, or one member of a static archive.
pub struct Member {
    pub file_index: i32,
    pub tokens: Vec<Spanned>,
    pub files: Rc<Vec<String>>,
}

/// Splits a tokenized input at its `%filename` separators. A plain object
/// yields a single member.
pub fn split_members(tokenized: Tokenized, next_file_index: &mut i32) -> Vec<Member> {
    let files = Rc::new(tokenized.files);
    let mut members = Vec::new();
    let mut tokens = Vec::new();
    for item in tokenized.items {
        if let Token::Member(_) = item.token {
            members.push(tokens);
            tokens = Vec::new();
        } else {
            tokens.push(item);
        }
    }
    members.push(tokens);

    members
        .into_iter()
        .map(|tokens| {
            let member = Member {
                file_index: *next_file_index,
                tokens,
                files: Rc::clone(&files),
            };
            *next_file_index += 1;
            member
        })
        .collect()
}

fn link_error(member: &Member, item: &Spanned, message: String) -> Error {
    Error::Link {
        file: member.files[item.file].clone(),
        line: item.line,
        message,
    }
}

/// The sizing pass: defines all symbols and measures each one's payload.
/// Labels are only checked for placement; their offsets come later.
pub fn pass_measure(table: &mut SymbolTable, members: &[Member]) -> Result<()> {
    for member in members {
        let mut current = None;
        let mut address = 0u32;
        for item in &member.tokens {
            match &item.token {
                Token::Byte(_) => {
                    if current.is_none() {
                        return Err(link_error(
                            member,
                            item,
                            "Bytes cannot appear outside of a symbol.".to_owned(),
                        ));
                    }
                    address += 1;
                }
                Token::Invoke(mark, _) => {
                    if current.is_none() {
                        return Err(link_error(
                            member,
                            item,
                            "An invocation cannot appear outside of a symbol.".to_owned(),
                        ));
                    }
                    address += mark.invocation_size();
                }
                Token::Label(_) => {
                    if current.is_none() {
                        return Err(link_error(
                            member,
                            item,
                            "A label cannot appear outside of a symbol.".to_owned(),
                        ));
                    }
                }
                Token::Symbol {
                    global,
                    flags,
                    name,
                } => {
                    if let Some(id) = current {
                        table.get_mut(id).size = address;
                    }
                    if table.is_empty() && name != "__start" {
                        eprintln!("warning: The first symbol is not named `__start`!");
                    }
                    let file_index = if *global { GLOBAL } else { member.file_index };
                    let id = table
                        .define(name, file_index, flags.clone())
                        .map_err(|message| link_error(member, item, message))?;
                    current = Some(id);
                    address = 0;
                }
                Token::Member(_) => unreachable!(),
            }
        }
        if let Some(id) = current {
            table.get_mut(id).size = address;
        }
    }
    Ok(())
}

/// The use-collection pass: records symbol-to-symbol reference edges for
/// dead-symbol elimination. A reference to a label counts as a reference
/// to the symbol enclosing the label's definition.
pub fn pass_collect_uses(table: &mut SymbolTable, members: &[Member]) {
    for member in members {
        let mut label_owner: HashMap<&str, usize> = HashMap::new();
        let mut refs: Vec<(usize, &str)> = Vec::new();
        let mut current = None;

        for item in &member.tokens {
            match &item.token {
                Token::Symbol { name, .. } => {
                    current = table.find(name, member.file_index);
                }
                Token::Label(name) => {
                    if let Some(symbol) = current {
                        label_owner.insert(name.as_str(), symbol);
                    }
                }
                Token::Invoke(_, name) => {
                    if let Some(from) = current {
                        refs.push((from, name.as_str()));
                    }
                }
                _ => {}
            }
        }

        for (from, name) in refs {
            let target = label_owner
                .get(name)
                .copied()
                .or_else(|| table.find(name, member.file_index));
            // An unresolvable name in a symbol that turns out to be dead
            // is never an error; live ones are caught at emission.
            if let Some(to) = target {
                table.add_use(from, to);
            }
        }
    }
}

/// The label pass: computes every label offset in one member.
pub fn pass_labels(table: &SymbolTable, member: &Member) -> Result<LabelMap> {
    let mut labels = LabelMap::new();
    let mut current = None;
    let mut address = 0u32;

    for item in &member.tokens {
        match &item.token {
            Token::Byte(_) => address += 1,
            Token::Invoke(mark, _) => address += mark.invocation_size(),
            Token::Symbol { name, .. } => {
                current = table.find(name, member.file_index);
                address = 0;
            }
            Token::Label(name) => {
                let symbol = match current {
                    Some(symbol) => symbol,
                    None => {
                        return Err(link_error(
                            member,
                            item,
                            "A label cannot appear outside of a symbol.".to_owned(),
                        ))
                    }
                };
                if labels.contains_key(name.as_str()) {
                    return Err(link_error(
                        member,
                        item,
                        "Duplicate label definition".to_owned(),
                    ));
                }
                if table.find(name, member.file_index).is_some() {
                    return Err(link_error(
                        member,
                        item,
                        "Label is already defined as a symbol".to_owned(),
                    ));
                }
                labels.insert(
                    name.clone(),
                    Label {
                        symbol,
                        offset: address,
                    },
                );
            }
            Token::Member(_) => unreachable!(),
        }
    }
    Ok(labels)
}

/// The emit pass: writes one member's payload with references resolved.
/// Symbols eliminated as dead are walked but emit nothing.
pub fn pass_emit(
    table: &SymbolTable,
    member: &Member,
    labels: &LabelMap,
    emitter: &mut Emitter,
) -> Result<()> {
    let mut current = None;
    let mut used = false;
    let mut address = 0u32;

    for item in &member.tokens {
        match &item.token {
            Token::Symbol { name, .. } => {
                let id = table
                    .find(name, member.file_index)
                    .expect("symbol defined in the sizing pass");
                current = Some(id);
                address = 0;
                used = table.get(id).used;
                if used {
                    emitter.pad_to(table.get(id).address);
                    emitter.set_symbol(name);
                }
            }
            Token::Byte(byte) => {
                address += 1;
                if used {
                    emitter.set_location(&member.files[item.file], item.line);
                    emitter.byte(*byte);
                }
            }
            Token::Invoke(mark, name) => {
                address += mark.invocation_size();
                if !used {
                    continue;
                }
                emitter.set_location(&member.files[item.file], item.line);

                let target = match labels.get(name.as_str()) {
                    Some(label) => table.get(label.symbol).address + label.offset,
                    None => match table.find(name, member.file_index) {
                        Some(id) => table.get(id).address,
                        None => {
                            return Err(link_error(
                                member,
                                item,
                                format!("Definition not found: {}", name),
                            ))
                        }
                    },
                };

                match mark {
                    Mark::Absolute => emitter.word(target),
                    Mark::High => emitter.short((target >> 16) as u16),
                    Mark::Low => emitter.short(target as u16),
                    Mark::Relative => {
                        // The offset is measured from the end of the
                        // 2-byte reference, which `address` already
                        // includes.
                        let symbol = table.get(current.expect("inside a symbol"));
                        let from = symbol.address + address;
                        let offset = target as i64 - from as i64;
                        if offset & 3 != 0 {
                            return Err(link_error(
                                member,
                                item,
                                "Relative invocation is misaligned.".to_owned(),
                            ));
                        }
                        if offset < -0x1FFFC || offset > 0x1FFFC {
                            return Err(link_error(
                                member,
                                item,
                                "Relative invocation out of bounds.".to_owned(),
                            ));
                        }
                        emitter.short(((offset >> 2) as i16) as u16);
                    }
                    _ => unreachable!(),
                }
            }
            Token::Label(_) => {}
            Token::Member(_) => unreachable!(),
        }
    }
    Ok(())
}

/// Emits the synthesized `__constructors` and `__destructors` tables:
/// zero-terminated arrays of symbol addresses.
pub fn emit_generated(table: &SymbolTable, emitter: &mut Emitter) {
    let lists = [
        ("__constructors", table.constructors_ordered()),
        ("__destructors", table.destructors_ordered()),
    ];
    for (name, entries) in lists.iter() {
        let id = match table.find(name, GLOBAL) {
            Some(id) => id,
            None => continue,
        };
        let symbol = table.get(id);
        if !symbol.used {
            continue;
        }
        emitter.pad_to(symbol.address);
        emitter.set_location("<builtin>", 0);
        emitter.set_symbol(name);
        for &entry in entries {
            emitter.word(table.get(entry).address);
        }
        emitter.word(0);
    }
}
