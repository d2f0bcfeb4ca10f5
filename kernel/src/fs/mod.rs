//! File-system collaborators
//!
//! The memory subsystem consumes a deliberately small slice of the file
//! system: an inode that can be read at an offset under its sleep lock, and
//! the per-process table of open files that backs file-descriptor lookup
//! during `mmap` validation. Path resolution, the log, and the rest of the
//! FS syscall surface live outside this crate's scope.

use alloc::sync::Arc;
use alloc::vec::Vec;

use crate::error::KernelError;
use crate::sync::SleepLock;

/// Per-process open-file limit
pub const NOFILE: usize = 16;

/// An in-memory inode.
///
/// Data sits behind the inode's [`SleepLock`]; `read_at` is the subsystem's
/// file-backed page-in suspension point.
pub struct Inode {
    ino: u64,
    data: SleepLock<Vec<u8>>,
}

impl Inode {
    pub fn new(ino: u64) -> Self {
        Self::with_data(ino, Vec::new())
    }

    pub fn with_data(ino: u64, data: Vec<u8>) -> Self {
        Self {
            ino,
            data: SleepLock::new(data),
        }
    }

    pub fn ino(&self) -> u64 {
        self.ino
    }

    pub fn size(&self) -> usize {
        self.data.lock().len()
    }

    /// Read up to `buf.len()` bytes starting at byte `offset`.
    ///
    /// Returns the number of bytes copied; an offset at or past the end of
    /// the file reads zero bytes. Callers doing page-in zero-pad the rest.
    pub fn read_at(&self, offset: u64, buf: &mut [u8]) -> Result<usize, KernelError> {
        let data = self.data.lock();
        let offset = offset as usize;
        if offset >= data.len() {
            return Ok(0);
        }
        let n = buf.len().min(data.len() - offset);
        buf[..n].copy_from_slice(&data[offset..offset + n]);
        Ok(n)
    }
}

/// An open file: an inode reference plus the access mode it was opened with.
pub struct File {
    pub inode: Arc<Inode>,
    pub readable: bool,
    pub writable: bool,
}

impl File {
    pub fn new(inode: Arc<Inode>, readable: bool, writable: bool) -> Self {
        Self {
            inode,
            readable,
            writable,
        }
    }
}

/// Per-process table of open files, indexed by file descriptor.
#[derive(Clone, Default)]
pub struct FileTable {
    files: [Option<Arc<File>>; NOFILE],
}

impl FileTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Allocate the lowest free descriptor for `file`.
    pub fn alloc(&mut self, file: Arc<File>) -> Result<i32, KernelError> {
        for (fd, slot) in self.files.iter_mut().enumerate() {
            if slot.is_none() {
                *slot = Some(file);
                return Ok(fd as i32);
            }
        }
        Err(KernelError::BadFileDescriptor { fd: -1 })
    }

    /// Look up an open file by descriptor.
    pub fn get(&self, fd: i32) -> Option<Arc<File>> {
        if fd < 0 || fd as usize >= NOFILE {
            return None;
        }
        self.files[fd as usize].clone()
    }

    /// Close a descriptor; the file itself lives on while references
    /// (including mapped regions) hold it.
    pub fn close(&mut self, fd: i32) -> Result<(), KernelError> {
        if fd < 0 || fd as usize >= NOFILE || self.files[fd as usize].is_none() {
            return Err(KernelError::BadFileDescriptor { fd });
        }
        self.files[fd as usize] = None;
        Ok(())
    }
}
