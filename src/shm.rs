use std::num::NonZero;
use std::ops::{Deref, DerefMut};
use std::os::fd::{AsRawFd, OwnedFd};

use nix::errno::Errno;
use nix::fcntl::OFlag;
use nix::libc::off_t;
use nix::sys::mman::{shm_open, shm_unlink, MapFlags, ProtFlags};
use nix::sys::stat::{fchmod, fstat, Mode};
use nix::unistd::ftruncate;
use tracing::{debug, warn};

use crate::error::{Error, Result};
use crate::mmap_raw::MmapRaw;

pub struct OpenOptions {
    mode: Mode,
    prot: ProtFlags,
    flgs: MapFlags,
    exclusive: bool,
    keep: bool,
}

impl OpenOptions {
    /// Opens an existing segment and maps all of it. Without write access
    /// the segment is opened read-only.
    pub fn open(self, name: &str) -> Result<SharedMemory> {
        let name = prepend_slash(name);
        let fd = shm_open(name.as_str(), self.access(), Mode::empty()).map_err(|source| {
            Error::SharedMemory {
                name: name.clone(),
                source,
            }
        })?;
        self.map_fd(fd, name, false)
    }

    /// Creates a segment of `len` bytes. An existing segment is opened as is
    /// unless the options are exclusive.
    pub fn create(self, name: &str, len: usize) -> Result<SharedMemory> {
        let name = prepend_slash(name);
        if len == 0 {
            return Err(Error::InvalidOptions(
                "the size of a new shared memory must be greater than zero".into(),
            ));
        }

        let oflg = OFlag::O_RDWR | OFlag::O_CREAT | OFlag::O_EXCL;
        let fd = match shm_open(name.as_str(), oflg, self.mode) {
            Ok(fd) => fd,
            Err(Errno::EEXIST) if !self.exclusive => {
                debug!("shared memory '{}' already exists, opening it", name);
                return self.open(&name);
            }
            Err(source) => return Err(Error::SharedMemory { name, source }),
        };

        // The umask may have stripped bits from the requested mode.
        let sized = fchmod(fd.as_raw_fd(), self.mode).and_then(|_| ftruncate(&fd, len as off_t));
        if let Err(source) = sized {
            let _ = shm_unlink(name.as_str());
            return Err(Error::SharedMemory { name, source });
        }
        self.map_fd(fd, name, true)
    }

    pub fn mode(mut self, mode: u32) -> Self {
        self.mode = Mode::from_bits_truncate(mode);
        self
    }

    pub fn exclusive(mut self, exclusive: bool) -> Self {
        self.exclusive = exclusive;
        self
    }

    /// Leave a segment this process created in place on drop.
    pub fn keep(mut self, keep: bool) -> Self {
        self.keep = keep;
        self
    }

    pub fn read(mut self, readable: bool) -> Self {
        if readable {
            self.prot |= ProtFlags::PROT_READ;
        } else {
            self.prot &= !ProtFlags::PROT_READ;
        }
        self
    }

    pub fn write(mut self, writable: bool) -> Self {
        if writable {
            self.prot |= ProtFlags::PROT_WRITE;
        } else {
            self.prot &= !ProtFlags::PROT_WRITE;
        }
        self
    }

    fn access(&self) -> OFlag {
        if self.prot.contains(ProtFlags::PROT_WRITE) {
            OFlag::O_RDWR
        } else {
            OFlag::O_RDONLY
        }
    }

    fn map_fd(self, fd: OwnedFd, name: String, created: bool) -> Result<SharedMemory> {
        let fail = |source| Error::SharedMemory {
            name: name.clone(),
            source,
        };
        let statbuf = fstat(fd.as_raw_fd()).map_err(fail)?;
        let len = NonZero::new(statbuf.st_size as usize)
            .ok_or_else(|| Error::EmptySegment(name.clone()))?;
        let inner = MmapRaw::new(len, self.prot, self.flgs, &fd, 0).map_err(fail)?;
        Ok(SharedMemory {
            name,
            inner,
            created,
            keep: self.keep,
        })
    }
}

impl Default for OpenOptions {
    fn default() -> Self {
        OpenOptions {
            mode: Mode::from_bits_truncate(0o660),
            prot: ProtFlags::PROT_NONE,
            flgs: MapFlags::MAP_SHARED,
            exclusive: false,
            keep: false,
        }
    }
}

/// A named POSIX shared-memory segment mapped into this process.
pub struct SharedMemory {
    name: String,
    inner: MmapRaw,
    created: bool,
    keep: bool,
}

impl SharedMemory {
    pub fn options() -> OpenOptions {
        OpenOptions::default()
    }

    pub fn open(name: &str) -> Result<Self> {
        SharedMemory::options().read(true).write(true).open(name)
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Whether this process created the segment.
    pub fn created(&self) -> bool {
        self.created
    }
}

impl Deref for SharedMemory {
    type Target = [u8];
    fn deref(&self) -> &Self::Target {
        &self.inner
    }
}

impl DerefMut for SharedMemory {
    fn deref_mut(&mut self) -> &mut Self::Target {
        &mut self.inner
    }
}

impl Drop for SharedMemory {
    fn drop(&mut self) {
        if !self.created || self.keep {
            return;
        }
        // Ignore ENOENT in case another process already removed it.
        match shm_unlink(self.name.as_str()) {
            Ok(()) | Err(Errno::ENOENT) => debug!("removed shared memory '{}'", self.name),
            Err(e) => warn!("failed to remove shared memory '{}': {}", self.name, e),
        }
    }
}

pub(crate) fn prepend_slash(name: &str) -> String {
    if !name.starts_with('/') {
        String::from("/") + name
    } else {
        String::from(name)
    }
}
