use std::io::{IoSlice, IoSliceMut};

use nix::errno::Errno;
use nix::sys::uio::{process_vm_readv, process_vm_writev, RemoteIoVec};
use nix::unistd::Pid;

use super::{Error, MemoryMapRegion, Pointer, Result};
use crate::{LoadedModule, MemoryAccess, ModuleLookup};

/// Access to the memory of another process, through
/// `process_vm_readv(2)` and `process_vm_writev(2)`.
pub struct MemoryReader {
    pid: u32,
    regions: Vec<MemoryMapRegion>,
}

impl MemoryReader {
    pub fn new(pid: u32) -> Result<Self> {
        let regions = Self::get_memory_regions(pid)?;
        log::debug!("Read {} memory map regions of PID {pid}", regions.len());

        Ok(Self { pid, regions })
    }

    pub fn pid(&self) -> u32 {
        self.pid
    }

    fn nix_pid(&self) -> Result<Pid> {
        let raw: i32 = self
            .pid
            .try_into()
            .map_err(|_| Error::InvalidPid(self.pid))?;
        Ok(Pid::from_raw(raw))
    }

    pub fn iter_regions(&self) -> impl Iterator<Item = &MemoryMapRegion> + '_ {
        self.regions.iter()
    }

    fn get_memory_regions(pid: u32) -> Result<Vec<MemoryMapRegion>> {
        let pid_t = pid.try_into().map_err(|_| Error::InvalidPid(pid))?;
        proc_maps::get_process_maps(pid_t)
            .map_err(|_| Error::MemoryMapNotFound(pid))?
            .into_iter()
            .map(MemoryMapRegion::new)
            .collect()
    }

    fn map_errno(err: Errno, ptr: Pointer, len: usize) -> Error {
        match err {
            Errno::EPERM => Error::MemoryReadInsufficientPermission,
            Errno::EFAULT => Error::MemoryReadBadAddress(ptr, len),
            err => Error::MemoryReadOther { err },
        }
    }
}

impl MemoryAccess for MemoryReader {
    fn read_exact(&self, ptr: Pointer, buffer: &mut [u8]) -> Result<()> {
        if ptr.is_null() {
            return Err(Error::MemoryReadNullPointer);
        }
        let expected = buffer.len();
        let remote = [RemoteIoVec {
            base: ptr.as_usize(),
            len: expected,
        }];
        let mut local = [IoSliceMut::new(buffer)];

        let transferred = process_vm_readv(self.nix_pid()?, &mut local, &remote)
            .map_err(|err| Self::map_errno(err, ptr, expected))?;

        if transferred == expected {
            Ok(())
        } else {
            Err(Error::PartialTransfer {
                ptr,
                transferred,
                expected,
            })
        }
    }

    fn write_all(&self, ptr: Pointer, bytes: &[u8]) -> Result<()> {
        if ptr.is_null() {
            return Err(Error::MemoryReadNullPointer);
        }
        let expected = bytes.len();
        let remote = [RemoteIoVec {
            base: ptr.as_usize(),
            len: expected,
        }];
        let local = [IoSlice::new(bytes)];

        let transferred = process_vm_writev(self.nix_pid()?, &local, &remote)
            .map_err(|err| Self::map_errno(err, ptr, expected))?;

        if transferred == expected {
            Ok(())
        } else {
            Err(Error::PartialTransfer {
                ptr,
                transferred,
                expected,
            })
        }
    }
}

impl ModuleLookup for MemoryReader {
    fn find_module(&self, short_name: &str) -> Option<LoadedModule> {
        LoadedModule::from_regions(short_name, self.iter_regions())
    }
}
