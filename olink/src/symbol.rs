//! The symbol table: every symbol from every input, in declaration order,
//! with the name index, use graph and address assignment built on top.

use std::collections::HashMap;
use std::rc::Rc;

use ohex::SymbolFlags;
use util::intern::Interner;

pub type SymbolId = usize;

/// The file index of global symbols; statics carry the index of the file
/// (or archive member) that defined them.
pub const GLOBAL: i32 = -1;

pub struct Symbol {
    pub name: Rc<str>,
    pub file_index: i32,
    pub flags: SymbolFlags,
    /// Payload size in bytes, measured in the sizing pass.
    pub size: u32,
    /// Address in the output image, assigned after sizing.
    pub address: u32,
    /// Reachable from the entry point or a constructor/destructor (always
    /// set when dead-symbol elimination is off).
    pub used: bool,
    /// Symbols this symbol's payload references.
    pub uses: Vec<SymbolId>,
}

pub struct SymbolTable {
    symbols: Vec<Symbol>,
    by_name: HashMap<Rc<str>, Vec<SymbolId>>,
    constructors: Vec<SymbolId>,
    destructors: Vec<SymbolId>,
    interner: Interner,
    optimize: bool,
}

impl SymbolTable {
    pub fn new(optimize: bool) -> SymbolTable {
        SymbolTable {
            symbols: Vec::new(),
            by_name: HashMap::new(),
            constructors: Vec::new(),
            destructors: Vec::new(),
            interner: Interner::new(),
            optimize,
        }
    }

    pub fn len(&self) -> usize {
        self.symbols.len()
    }

    pub fn is_empty(&self) -> bool {
        self.symbols.is_empty()
    }

    pub fn get(&self, id: SymbolId) -> &Symbol {
        &self.symbols[id]
    }

    pub fn get_mut(&mut self, id: SymbolId) -> &mut Symbol {
        &mut self.symbols[id]
    }

    /// Defines a symbol. Duplicate definitions in the same scope (two
    /// globals, or two statics in one file) are an error, reported as the
    /// message text.
    pub fn define(
        &mut self,
        name: &str,
        file_index: i32,
        flags: SymbolFlags,
    ) -> Result<SymbolId, String> {
        let name = self.interner.intern(name);
        let ids = self.by_name.entry(Rc::clone(&name)).or_insert_with(Vec::new);
        for &id in ids.iter() {
            if self.symbols[id].file_index == file_index {
                return Err(format!(
                    "Duplicate {} symbol: {}",
                    if file_index == GLOBAL { "global" } else { "static" },
                    name
                ));
            }
        }

        let id = self.symbols.len();
        ids.push(id);
        self.symbols.push(Symbol {
            name,
            file_index,
            size: 0,
            address: 0,
            used: !self.optimize,
            uses: Vec::new(),
            flags: flags.clone(),
        });

        if flags.constructor {
            self.constructors.push(id);
        }
        if flags.destructor {
            // Reverse declaration order.
            self.destructors.insert(0, id);
        }
        Ok(id)
    }

    /// Looks a name up for a reference in `file_index`: a static defined
    /// in the same file shadows a global of the same name.
    pub fn find(&self, name: &str, file_index: i32) -> Option<SymbolId> {
        let ids = self.by_name.get(name)?;
        let mut global = None;
        for &id in ids {
            if self.symbols[id].file_index == file_index {
                return Some(id);
            }
            if self.symbols[id].file_index == GLOBAL {
                global = Some(id);
            }
        }
        global
    }

    pub fn add_use(&mut self, from: SymbolId, to: SymbolId) {
        self.symbols[from].uses.push(to);
    }

    /// Marks everything transitively reachable from the roots: the first
    /// symbol (the entry point) plus all constructors and destructors.
    pub fn mark_used(&mut self) {
        let mut stack: Vec<SymbolId> = Vec::new();
        if !self.symbols.is_empty() {
            stack.push(0);
        }
        stack.extend(&self.constructors);
        stack.extend(&self.destructors);

        while let Some(id) = stack.pop() {
            if self.symbols[id].used {
                continue;
            }
            self.symbols[id].used = true;
            stack.extend(self.symbols[id].uses.clone());
        }
    }

    /// Assigns addresses to used symbols in declaration order, padding
    /// each to a word boundary. Returns the image size.
    pub fn assign_addresses(&mut self) -> u32 {
        let mut address = 0u32;
        for symbol in &mut self.symbols {
            if symbol.used {
                symbol.address = address;
                address += symbol.size;
                address = (address + 3) & !3;
            }
        }
        address
    }

    fn priority_of(&self, id: SymbolId, constructor: bool) -> u32 {
        let flags = &self.symbols[id].flags;
        let priority = if constructor {
            flags.constructor_priority
        } else {
            flags.destructor_priority
        };
        // Unprioritized entries run last among constructors, and
        // symmetrically first among destructors.
        priority.unwrap_or(u32::max_value())
    }

    /// Constructors by rising priority, declaration order within equal
    /// priorities.
    pub fn constructors_ordered(&self) -> Vec<SymbolId> {
        let mut ordered = self.constructors.clone();
        ordered.sort_by_key(|&id| self.priority_of(id, true));
        ordered
    }

    /// Destructors in the exact reverse of the constructor ordering rule.
    pub fn destructors_ordered(&self) -> Vec<SymbolId> {
        let mut ordered: Vec<SymbolId> = self.destructors.clone();
        // The list is already in reverse declaration order; a stable sort
        // by falling priority mirrors the constructor sequence.
        ordered.sort_by_key(|&id| u32::max_value() - self.priority_of(id, false));
        ordered
    }

    pub fn constructor_count(&self) -> usize {
        self.constructors.len()
    }

    pub fn destructor_count(&self) -> usize {
        self.destructors.len()
    }
}
