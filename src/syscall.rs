//! The syscall set and the I/O handle table.
//!
//! Syscalls take their arguments in r0–r3 and return in r0, with two
//! exceptions: `halt` consumes r0 as the process exit value, and `fwrite`
//! leaves r0 untouched (a quirk programs have come to depend on, kept for
//! bit-compatibility). Host-level failures that a program can reasonably
//! handle come back as top-of-range sentinels; everything else faults.

use std::fs::{self, File, OpenOptions};
use std::io::{self, Read, Seek, SeekFrom, Write};
use std::path::PathBuf;
use std::time::{SystemTime, UNIX_EPOCH};

use num::FromPrimitive;

use crate::constants::{
    self, ERR_GENERIC, ERR_IO, ERR_PATH, ERR_UNSUPPORTED, FILE_COUNT, HANDLE_OFFSET,
};
use crate::instructions::{register_index, RegisterId, Syscall};
use crate::interp::{StepResult, Vm};
use crate::Fault;

/// One open I/O handle. The standard streams occupy the first three slots
/// and cannot be closed.
pub enum Handle {
    Stdin,
    Stdout,
    Stderr,
    File(File),
}

impl Handle {
    fn read(&mut self, buffer: &mut [u8]) -> io::Result<usize> {
        match self {
            Handle::Stdin => io::stdin().read(buffer),
            Handle::File(file) => file.read(buffer),
            _ => Err(io::Error::from(io::ErrorKind::InvalidInput)),
        }
    }

    fn write_all(&mut self, buffer: &[u8]) -> io::Result<()> {
        match self {
            Handle::Stdout => io::stdout().write_all(buffer),
            Handle::Stderr => io::stderr().write_all(buffer),
            Handle::File(file) => file.write_all(buffer),
            Handle::Stdin => Err(io::Error::from(io::ErrorKind::InvalidInput)),
        }
    }

    fn seek(&mut self, from: SeekFrom) -> io::Result<u64> {
        match self {
            Handle::File(file) => file.seek(from),
            _ => Err(io::Error::from(io::ErrorKind::InvalidInput)),
        }
    }
}

/// Fixed-capacity table of open handles. Handle values handed to programs
/// are slot indices offset by [`HANDLE_OFFSET`](../constants/index.html).
pub struct FileTable {
    slots: Vec<Option<Handle>>,
}

impl FileTable {
    pub fn new() -> FileTable {
        let mut slots: Vec<Option<Handle>> = (0..FILE_COUNT).map(|_| None).collect();
        slots[0] = Some(Handle::Stdin);
        slots[1] = Some(Handle::Stdout);
        slots[2] = Some(Handle::Stderr);
        FileTable { slots }
    }

    fn slot_of(handle: u32) -> Result<usize, Fault> {
        let index = handle.wrapping_sub(HANDLE_OFFSET) as usize;
        if index >= FILE_COUNT {
            return Err(Fault::InvalidHandle(handle));
        }
        Ok(index)
    }

    pub fn get(&mut self, handle: u32) -> Result<&mut Handle, Fault> {
        let index = Self::slot_of(handle)?;
        self.slots[index]
            .as_mut()
            .ok_or(Fault::InvalidHandle(handle))
    }

    /// Places a file in the first free slot, returning its handle value.
    pub fn open(&mut self, file: File) -> Result<u32, Fault> {
        for (index, slot) in self.slots.iter_mut().enumerate().skip(3) {
            if slot.is_none() {
                *slot = Some(Handle::File(file));
                return Ok(index as u32 + HANDLE_OFFSET);
            }
        }
        Err(Fault::OutOfHandles)
    }

    pub fn close(&mut self, handle: u32) -> Result<(), Fault> {
        let index = Self::slot_of(handle)?;
        if index <= 2 {
            return Err(Fault::CloseStandardStream);
        }
        if self.slots[index].take().is_none() {
            return Err(Fault::InvalidHandle(handle));
        }
        Ok(())
    }
}

impl Default for FileTable {
    fn default() -> FileTable {
        FileTable::new()
    }
}

fn arg(vm: &Vm, id: RegisterId) -> u32 {
    vm.register(id)
}

fn path_arg(vm: &Vm, id: RegisterId) -> Result<PathBuf, Fault> {
    let bytes = vm.memory.load_string(arg(vm, id))?;
    Ok(PathBuf::from(String::from_utf8_lossy(&bytes).into_owned()))
}

fn status(result: io::Result<()>) -> u32 {
    match result {
        Ok(()) => 0,
        Err(_) => ERR_GENERIC,
    }
}

pub fn dispatch(vm: &mut Vm, number: u8) -> Result<StepResult, Fault> {
    let syscall = Syscall::from_u8(number).ok_or(Fault::InvalidSyscall(number))?;

    let ret = match syscall {
        Syscall::HALT => return Ok(StepResult::Halt(arg(vm, RegisterId::R0))),
        Syscall::TIME => sys_time(vm)?,
        Syscall::SPAWN => sys_spawn(vm)?,
        Syscall::FOPEN => sys_fopen(vm)?,
        Syscall::FCLOSE => {
            vm.files.close(arg(vm, RegisterId::R0))?;
            0
        }
        Syscall::FREAD => sys_fread(vm)?,
        Syscall::FWRITE => {
            // Deliberately does not set r0; see the module docs.
            sys_fwrite(vm)?;
            return Ok(StepResult::Next);
        }
        Syscall::FSEEK => sys_fseek(vm)?,
        Syscall::FTELL => sys_ftell(vm)?,
        Syscall::FTRUNC => sys_ftrunc(vm)?,
        // Directory iteration and stat have no defined guest-side layout.
        Syscall::DOPEN | Syscall::DCLOSE | Syscall::DREAD | Syscall::STAT => ERR_UNSUPPORTED,
        Syscall::RENAME => status(fs::rename(
            path_arg(vm, RegisterId::R0)?,
            path_arg(vm, RegisterId::R1)?,
        )),
        Syscall::SYMLINK => sys_symlink(vm)?,
        Syscall::UNLINK => status(fs::remove_file(path_arg(vm, RegisterId::R0)?)),
        Syscall::CHMOD => sys_chmod(vm)?,
        Syscall::MKDIR => status(fs::create_dir(path_arg(vm, RegisterId::R0)?)),
        Syscall::RMDIR => status(fs::remove_dir(path_arg(vm, RegisterId::R0)?)),
    };

    vm.set_register(RegisterId::R0, ret);
    Ok(StepResult::Next)
}

/// Writes UNIX time to the struct at r0: seconds as two words, then
/// nanoseconds.
fn sys_time(vm: &mut Vm) -> Result<u32, Fault> {
    let now = match SystemTime::now().duration_since(UNIX_EPOCH) {
        Ok(duration) => duration,
        Err(_) => return Ok(ERR_UNSUPPORTED),
    };
    let addr = arg(vm, RegisterId::R0);
    vm.memory.store_word(addr, now.as_secs() as u32)?;
    vm.memory.store_word(addr + 4, (now.as_secs() >> 32) as u32)?;
    vm.memory.store_word(addr + 8, now.subsec_nanos())?;
    Ok(0)
}

fn sys_fopen(vm: &mut Vm) -> Result<u32, Fault> {
    let path = path_arg(vm, RegisterId::R0)?;
    let writeable = arg(vm, RegisterId::R1) != 0;

    let result = if writeable {
        OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .open(path)
    } else {
        File::open(path)
    };

    match result {
        Ok(file) => vm.files.open(file),
        Err(_) => Ok(ERR_PATH),
    }
}

fn sys_fread(vm: &mut Vm) -> Result<u32, Fault> {
    let handle = arg(vm, RegisterId::R0);
    let addr = arg(vm, RegisterId::R1);
    let count = arg(vm, RegisterId::R2);
    if count == 0 {
        return Ok(0);
    }
    let buffer = vm.memory.slice_mut(addr, count)?;
    let file = vm.files.get(handle)?;
    match file.read(buffer) {
        Ok(read) => Ok(read as u32),
        Err(_) => Ok(ERR_IO),
    }
}

fn sys_fwrite(vm: &mut Vm) -> Result<(), Fault> {
    let handle = arg(vm, RegisterId::R0);
    let addr = arg(vm, RegisterId::R1);
    let count = arg(vm, RegisterId::R2);
    if count == 0 {
        return Ok(());
    }
    let buffer = vm.memory.slice(addr, count)?;
    let file = vm.files.get(handle)?;
    file.write_all(buffer).map_err(|_| Fault::WriteFailed)
}

fn sys_fseek(vm: &mut Vm) -> Result<u32, Fault> {
    let handle = arg(vm, RegisterId::R0);
    let base = arg(vm, RegisterId::R1);
    let offset =
        (arg(vm, RegisterId::R2) as u64 | ((arg(vm, RegisterId::R3) as u64) << 32)) as i64;
    let from = match base {
        0 => SeekFrom::Start(offset as u64),
        1 => SeekFrom::Current(offset),
        2 => SeekFrom::End(offset),
        _ => return Err(Fault::InvalidSeekBase(base)),
    };
    let file = vm.files.get(handle)?;
    Ok(match file.seek(from) {
        Ok(_) => 0,
        Err(_) => ERR_GENERIC,
    })
}

fn sys_ftell(vm: &mut Vm) -> Result<u32, Fault> {
    let handle = arg(vm, RegisterId::R0);
    let addr = arg(vm, RegisterId::R1);
    let position = match vm.files.get(handle)?.seek(SeekFrom::Current(0)) {
        Ok(position) => position,
        Err(_) => return Ok(ERR_GENERIC),
    };
    vm.memory.store_word(addr, position as u32)?;
    vm.memory.store_word(addr + 4, (position >> 32) as u32)?;
    Ok(0)
}

fn sys_ftrunc(vm: &mut Vm) -> Result<u32, Fault> {
    let handle = arg(vm, RegisterId::R0);
    let size = arg(vm, RegisterId::R1) as u64 | ((arg(vm, RegisterId::R2) as u64) << 32);
    match vm.files.get(handle)? {
        Handle::File(file) => Ok(match file.set_len(size) {
            Ok(()) => 0,
            Err(_) => ERR_GENERIC,
        }),
        _ => Ok(ERR_UNSUPPORTED),
    }
}

#[cfg(unix)]
fn sys_symlink(vm: &mut Vm) -> Result<u32, Fault> {
    let target = path_arg(vm, RegisterId::R0)?;
    let link = path_arg(vm, RegisterId::R1)?;
    Ok(status(std::os::unix::fs::symlink(target, link)))
}

#[cfg(not(unix))]
fn sys_symlink(_vm: &mut Vm) -> Result<u32, Fault> {
    Ok(ERR_UNSUPPORTED)
}

#[cfg(unix)]
fn sys_chmod(vm: &mut Vm) -> Result<u32, Fault> {
    use std::os::unix::fs::PermissionsExt;
    let path = path_arg(vm, RegisterId::R0)?;
    let mode = arg(vm, RegisterId::R1);
    Ok(status(fs::set_permissions(
        path,
        fs::Permissions::from_mode(mode),
    )))
}

#[cfg(not(unix))]
fn sys_chmod(_vm: &mut Vm) -> Result<u32, Fault> {
    Ok(ERR_UNSUPPORTED)
}

/// Runs a child process in a sub-range of the parent's memory: r0 = guest
/// address of the program path, r1 = child PIT, r2 = range base, r3 =
/// range size. Returns the child's exit value.
fn sys_spawn(vm: &mut Vm) -> Result<u32, Fault> {
    let pit_addr = arg(vm, RegisterId::R1);
    let base = arg(vm, RegisterId::R2);
    let size = arg(vm, RegisterId::R3);

    let end = base
        .checked_add(size)
        .filter(|&end| end <= vm.memory.size())
        .ok_or(Fault::InvalidSpawnRange)?;
    if base < 4 || size < constants::WRAPPER_SIZE + 4 {
        return Err(Fault::InvalidSpawnRange);
    }

    let path = path_arg(vm, RegisterId::R0)?;
    let image = match fs::read(&path) {
        Ok(image) => image,
        Err(_) => return Ok(ERR_PATH),
    };
    // The top word of the range is reserved for the child's halt
    // instruction.
    if image.len() as u32 > size - 4 {
        return Ok(ERR_GENERIC);
    }

    vm.memory
        .slice_mut(base, image.len() as u32)?
        .copy_from_slice(&image);

    let mut entry = base;
    if image.starts_with(b"#!") || image.starts_with(b"REM") {
        entry += constants::WRAPPER_SIZE;
    }

    let halt_addr = (end - 4) & !3;
    vm.memory.store_word(halt_addr, constants::HALT_INSTRUCTION)?;
    vm.memory
        .store_word(pit_addr + constants::PIT_BREAK, base + image.len() as u32)?;
    vm.memory
        .store_word(pit_addr + constants::PIT_EXIT, halt_addr)?;

    let saved = *vm.registers();
    let registers = vm.registers_mut();
    *registers = [0; constants::REGISTER_COUNT];
    registers[register_index(RegisterId::R0)] = pit_addr;
    registers[register_index(RegisterId::RSP)] = halt_addr;
    registers[register_index(RegisterId::RFP)] = halt_addr;
    registers[register_index(RegisterId::RPP)] = entry;
    registers[register_index(RegisterId::RIP)] = entry;

    let result = vm.run();
    *vm.registers_mut() = saved;
    result
}
