use std::num::NonZero;
use std::ops::{Deref, DerefMut};
use std::os::fd::AsFd;
use std::ptr::NonNull;

use nix::libc::{c_void, off_t};
use nix::sys::mman::{mmap, munmap, MapFlags, ProtFlags};
use tracing::warn;

/// An owned `mmap` mapping, unmapped on drop.
#[derive(Debug)]
pub(crate) struct MmapRaw {
    ptr: NonNull<c_void>,
    len: usize,
}

impl MmapRaw {
    pub fn new<F: AsFd>(
        len: NonZero<usize>,
        prot: ProtFlags,
        flgs: MapFlags,
        file: &F,
        off: off_t,
    ) -> nix::Result<Self> {
        let ptr = unsafe { mmap(None, len, prot, flgs, file, off)? };
        Ok(MmapRaw {
            ptr,
            len: len.into(),
        })
    }
}

impl Drop for MmapRaw {
    fn drop(&mut self) {
        if let Err(e) = unsafe { munmap(self.ptr, self.len) } {
            warn!("munmap: {}", e);
        }
    }
}

impl Deref for MmapRaw {
    type Target = [u8];
    fn deref(&self) -> &Self::Target {
        unsafe { std::slice::from_raw_parts(self.ptr.as_ptr() as *const u8, self.len) }
    }
}

impl DerefMut for MmapRaw {
    fn deref_mut(&mut self) -> &mut [u8] {
        unsafe { std::slice::from_raw_parts_mut(self.ptr.as_ptr() as *mut u8, self.len) }
    }
}
