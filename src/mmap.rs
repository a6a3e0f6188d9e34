// SPDX-License-Identifier: MIT
// SPDX-FileCopyrightText: 2025-2026 natyamatsya contributors
//
// File-backed shared memory mapping for the registry segment.
// Every participating process maps the same file MAP_SHARED, so registry
// mutations are visible to all of them without any copy step.

use std::fs::OpenOptions;
use std::io;
use std::os::fd::AsRawFd;
use std::path::Path;
use std::ptr;
use std::slice;

/// A writable `MAP_SHARED` mapping of a regular file.
///
/// The mapping stays valid for the lifetime of the value and is unmapped on
/// drop. The backing file is closed right after `mmap` (the kernel keeps the
/// mapping alive without the descriptor).
pub struct MappedRegion {
    mem: *mut u8,
    len: usize,
}

// Safety: the region is a process-shared file mapping by design; all access
// goes through &self / &mut self methods on the owning types.
unsafe impl Send for MappedRegion {}
unsafe impl Sync for MappedRegion {}

impl MappedRegion {
    /// Map `len` bytes of `path` read-write and shared.
    ///
    /// Fails if the file cannot be opened, is shorter than `len`, or the
    /// mapping itself fails.
    pub fn open(path: &Path, len: usize) -> io::Result<Self> {
        if len == 0 {
            return Err(io::Error::new(io::ErrorKind::InvalidInput, "mapping length is 0"));
        }
        let file = OpenOptions::new().read(true).write(true).open(path)?;
        let file_len = file.metadata()?.len();
        if (file_len as usize) < len {
            return Err(io::Error::new(
                io::ErrorKind::InvalidData,
                format!("backing file is {file_len} bytes, mapping needs {len}"),
            ));
        }

        let mem = unsafe {
            libc::mmap(
                ptr::null_mut(),
                len,
                libc::PROT_READ | libc::PROT_WRITE,
                libc::MAP_SHARED,
                file.as_raw_fd(),
                0,
            )
        };
        if mem == libc::MAP_FAILED {
            return Err(io::Error::last_os_error());
        }
        Ok(Self { mem: mem as *mut u8, len })
    }

    /// Read the leading `u32` size field of `path` without mapping it.
    pub fn stored_size(path: &Path) -> io::Result<u32> {
        use std::io::Read;
        let mut file = OpenOptions::new().read(true).open(path)?;
        let mut word = [0u8; 4];
        file.read_exact(&mut word)?;
        Ok(u32::from_ne_bytes(word))
    }

    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// The mapped bytes.
    pub fn as_slice(&self) -> &[u8] {
        unsafe { slice::from_raw_parts(self.mem, self.len) }
    }

    /// The mapped bytes, writable.
    pub fn as_mut_slice(&mut self) -> &mut [u8] {
        unsafe { slice::from_raw_parts_mut(self.mem, self.len) }
    }
}

impl Drop for MappedRegion {
    fn drop(&mut self) {
        if !self.mem.is_null() {
            unsafe { libc::munmap(self.mem as *mut libc::c_void, self.len) };
        }
    }
}

impl std::fmt::Debug for MappedRegion {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MappedRegion").field("len", &self.len).finish()
    }
}
