//! Process image construction.
//!
//! Memory is laid out bottom-up: the reserved null word, the process-info
//! table, a synthesized halt instruction (the `_start` exit address), the
//! argument/environment/working-directory string blobs, then the program
//! image. Heap and stack share everything above; the stack starts at the
//! top.

use std::error::Error as StdError;
use std::fmt;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use crate::constants::*;
use crate::instructions::{register_index, RegisterId};
use crate::interp::Vm;
use crate::Fault;

#[derive(Debug)]
pub enum LoadError {
    Io(io::Error, PathBuf),
    ProgramTooBig,
    /// The image did not fit the address space while being placed.
    Fault(Fault),
}

impl fmt::Display for LoadError {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            LoadError::Io(err, path) => {
                write!(f, "Couldn't read program \"{}\": {}", path.display(), err)
            }
            LoadError::ProgramTooBig => write!(f, "Program is too big."),
            LoadError::Fault(fault) => write!(f, "Failed to build process image: {}", fault),
        }
    }
}

impl StdError for LoadError {}

impl From<Fault> for LoadError {
    fn from(fault: Fault) -> LoadError {
        LoadError::Fault(fault)
    }
}

/// Builds the process image for `program` and points the machine's
/// registers at its entry. `args` become the program's argv (the program
/// path itself is argv[0] by convention of the caller); the host
/// environment and working directory are forwarded.
pub fn load_process(vm: &mut Vm, program: &Path, args: &[String]) -> Result<(), LoadError> {
    let memory_size = vm.memory.size();

    // Process info table in the first valid words.
    let pit = PIT_ADDRESS;
    let mut addr = pit + PIT_SIZE;

    // A halt instruction; its address is the PIT exit field, so returning
    // from `_start` terminates cleanly.
    let halt_addr = addr;
    vm.memory.store_word(halt_addr, HALT_INSTRUCTION)?;
    addr += 4;

    vm.memory.store_word(pit + PIT_VERSION, 0)?;
    vm.memory.store_word(pit + PIT_EXIT, halt_addr)?;
    vm.memory.store_word(pit + PIT_INPUT, HANDLE_OFFSET)?;
    vm.memory.store_word(pit + PIT_OUTPUT, HANDLE_OFFSET + 1)?;
    vm.memory.store_word(pit + PIT_ERROR, HANDLE_OFFSET + 2)?;

    // Arguments: the program path, then its arguments.
    let mut argv: Vec<Vec<u8>> = Vec::with_capacity(args.len() + 1);
    argv.push(program.to_string_lossy().into_owned().into_bytes());
    argv.extend(args.iter().map(|arg| arg.clone().into_bytes()));
    vm.memory.store_word(pit + PIT_ARGS, addr)?;
    addr = vm.memory.store_string_array(addr, &argv)?;

    // Environment.
    let environ: Vec<Vec<u8>> = std::env::vars()
        .map(|(key, value)| format!("{}={}", key, value).into_bytes())
        .collect();
    vm.memory.store_word(pit + PIT_ENVIRON, addr)?;
    addr = vm.memory.store_string_array(addr, &environ)?;

    // Working directory.
    match std::env::current_dir() {
        Ok(cwd) => {
            vm.memory.store_word(pit + PIT_WORKDIR, addr)?;
            addr = vm
                .memory
                .store_string(addr, cwd.to_string_lossy().as_bytes())?;
            addr = (addr + 3) & !3;
        }
        Err(_) => {
            vm.memory.store_word(pit + PIT_WORKDIR, 0)?;
        }
    }

    // The program image.
    let image = fs::read(program).map_err(|err| LoadError::Io(err, program.to_owned()))?;
    if image.len() as u32 > memory_size.saturating_sub(addr).saturating_sub(MIN_HEAP_SIZE) {
        return Err(LoadError::ProgramTooBig);
    }
    vm.memory
        .slice_mut(addr, image.len() as u32)?
        .copy_from_slice(&image);

    let mut start = addr;
    let break_addr = addr + image.len() as u32;
    vm.memory.store_word(pit + PIT_BREAK, break_addr)?;

    // An optional 128-byte host wrapper (shebang or REM comment) precedes
    // the preamble.
    if image.starts_with(b"#!") || image.starts_with(b"REM") {
        start += WRAPPER_SIZE;
    }

    let mut preamble = [0u32; 3];
    for (i, word) in preamble.iter_mut().enumerate() {
        *word = vm.memory.load_word(start + 4 * i as u32).unwrap_or(0);
    }
    if preamble != PREAMBLE {
        eprintln!(
            "WARNING: Program {} does not start with `~Onr~amp~   ` preamble",
            program.display()
        );
    }

    let registers = vm.registers_mut();
    *registers = [0; REGISTER_COUNT];
    registers[register_index(RegisterId::R0)] = pit;
    registers[register_index(RegisterId::RSP)] = memory_size;
    registers[register_index(RegisterId::RFP)] = memory_size;
    registers[register_index(RegisterId::RPP)] = start;
    registers[register_index(RegisterId::RIP)] = start;

    Ok(())
}
