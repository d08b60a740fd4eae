//! Fixed parameters of the virtual machine and its process image.

/// Size of the virtual address space.
pub const MEMORY_SIZE: u32 = 16 * 1024 * 1024;

pub const WORD_BYTES: u32 = 4;
pub const REGISTER_COUNT: usize = 16;

/// The first word of memory is reserved so that address 0 (and the rest of
/// the null word) always faults; it holds this pattern instead.
pub const DEBUG_PATTERN: u32 = 0xDEADDEAD;

/// Byte offsets of the process-info-table fields. The PIT occupies the
/// first valid word of memory onward.
pub const PIT_ADDRESS: u32 = 4;
pub const PIT_VERSION: u32 = 0;
pub const PIT_BREAK: u32 = 4;
pub const PIT_EXIT: u32 = 8;
pub const PIT_INPUT: u32 = 12;
pub const PIT_OUTPUT: u32 = 16;
pub const PIT_ERROR: u32 = 20;
pub const PIT_ARGS: u32 = 24;
pub const PIT_ENVIRON: u32 = 28;
pub const PIT_WORKDIR: u32 = 32;
pub const PIT_SIZE: u32 = 36;

/// `sys halt 0 0` as an instruction word, synthesized by the loader as
/// the `_start` exit address.
pub const HALT_INSTRUCTION: u32 = 0x0000_007F;

/// Program bytecode is expected to begin with `~Onr~amp~   `, three
/// little-endian words.
pub const PREAMBLE: [u32; 3] = [0x726E_4F7E, 0x706D_617E, 0x2020_207E];

/// Size of the optional `#!`/`REM` host wrapper preceding the preamble.
pub const WRAPPER_SIZE: u32 = 128;

/// Minimum space that must remain above the loaded image for heap and
/// stack.
pub const MIN_HEAP_SIZE: u32 = 32 * 1024;

/// Error sentinels returned by syscalls, at the top of the 32-bit range.
pub const ERR_GENERIC: u32 = 0xFFFF_FFFF;
pub const ERR_PATH: u32 = 0xFFFF_FFFE;
pub const ERR_IO: u32 = 0xFFFF_FFFD;
pub const ERR_UNSUPPORTED: u32 = 0xFFFF_FFFC;

pub const FILE_COUNT: usize = 16;

/// I/O handles are offset from a large constant so programs cannot assume
/// stdio lives at small integers.
pub const HANDLE_OFFSET: u32 = i32::max_value() as u32 - FILE_COUNT as u32 - 1;

/// Host exit code for VM-level failures (bad arguments, corrupt program,
/// faults), distinct from anything a well-behaved program returns.
pub const HOST_ERROR_EXIT: i32 = 125;
