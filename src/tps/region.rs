//! Protected anonymous memory regions.
//!
//! A [`Region`] is one `TPS_SIZE`-byte anonymous mapping that is kept at "no access" whenever
//! it is not being read or written through this module. All raw-pointer and protection work of
//! the crate lives here; the registry above it only deals with safe types.
//!
//! Access is granted through a [`ProtectionWindow`], an RAII guard that opens the smallest
//! protection-granular span covering the requested bytes and restores "no access" when it is
//! dropped, including on early return.
//!
//! While mapped, a region's base address is published in the fault-visible page table (see
//! [`crate::tps::fault`]) so that a stray access to it is reported as a TPS violation.

use std::{io, ptr, sync::OnceLock};

use bitflags::bitflags;
use log::error;
use memmap2::MmapMut;

use crate::{
    tps::{fault, TPS_SIZE},
    Error, Result,
};

bitflags! {
    /// Access rights of a mapped span. The empty set is "no access".
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub(crate) struct Protection: libc::c_int {
        /// The span may be read
        const READ = libc::PROT_READ;
        /// The span may be written
        const WRITE = libc::PROT_WRITE;
    }
}

/// Size of the platform's protection unit.
fn granularity() -> usize {
    static PAGE_SIZE: OnceLock<usize> = OnceLock::new();
    *PAGE_SIZE.get_or_init(|| {
        // SAFETY: sysconf has no memory-safety preconditions
        let size = unsafe { libc::sysconf(libc::_SC_PAGESIZE) };
        usize::try_from(size)
            .ok()
            .filter(|size| size.is_power_of_two())
            .unwrap_or(TPS_SIZE)
    })
}

fn protect(addr: usize, len: usize, protection: Protection) -> Result<()> {
    // SAFETY: callers only pass spans inside a mapping owned by a live `Region`, so changing
    // their protection cannot affect memory the rest of the program relies on
    let rc = unsafe { libc::mprotect(addr as *mut libc::c_void, len, protection.bits()) };
    if rc != 0 {
        return Err(Error::ProtectionChange(io::Error::last_os_error()));
    }

    Ok(())
}

/// Temporarily raised protection over part of a [`Region`].
///
/// Restores "no access" on drop.
pub(crate) struct ProtectionWindow {
    start: usize,
    len: usize,
}

impl ProtectionWindow {
    /// Opens `protection` over `[offset, offset + len)` of `region`, rounded out to the
    /// protection granularity and clipped to the region.
    fn open(region: &Region, offset: usize, len: usize, protection: Protection) -> Result<Self> {
        let unit = granularity();
        let first = offset & !(unit - 1);
        let last = (offset + len).next_multiple_of(unit).min(TPS_SIZE);

        let window = ProtectionWindow {
            start: region.base() + first,
            len: last - first,
        };
        protect(window.start, window.len, protection)?;

        Ok(window)
    }
}

impl Drop for ProtectionWindow {
    fn drop(&mut self) {
        if let Err(e) = protect(self.start, self.len, Protection::empty()) {
            error!(
                "failed to revoke access to {:#x}+{:#x}: {}",
                self.start, self.len, e
            );
        }
    }
}

/// One `TPS_SIZE`-byte anonymous mapping, "no access" at rest.
pub(crate) struct Region {
    map: MmapMut,
    /// Index of this region in the fault-visible page table
    slot: usize,
}

impl Region {
    /// Maps a new zero-filled region with protection "no access".
    ///
    /// # Errors
    /// Returns [`Error::AllocationFailure`] if the mapping cannot be created and
    /// [`Error::ProtectionChange`] if it cannot be made inaccessible.
    pub(crate) fn allocate() -> Result<Self> {
        let map = MmapMut::map_anon(TPS_SIZE).map_err(|e| Error::AllocationFailure {
            message: format!("Failed to map {TPS_SIZE} bytes: {e}"),
        })?;

        let base = map.as_ptr() as usize;
        protect(base, TPS_SIZE, Protection::empty())?;

        Ok(Region {
            map,
            slot: fault::page_table().register(base),
        })
    }

    /// Base address of the mapping.
    pub(crate) fn base(&self) -> usize {
        self.map.as_ptr() as usize
    }

    /// Copies `buffer.len()` bytes starting at `offset` out of the region.
    ///
    /// The caller guarantees `offset + buffer.len() <= TPS_SIZE`.
    pub(crate) fn read(&self, offset: usize, buffer: &mut [u8]) -> Result<()> {
        if buffer.is_empty() {
            return Ok(());
        }
        debug_assert!(offset + buffer.len() <= TPS_SIZE);

        let _window = ProtectionWindow::open(self, offset, buffer.len(), Protection::READ)?;

        // SAFETY: the source span lies inside the mapping and is readable while `_window`
        // lives; `buffer` is a distinct allocation of the same length
        unsafe {
            ptr::copy_nonoverlapping(
                self.map.as_ptr().add(offset),
                buffer.as_mut_ptr(),
                buffer.len(),
            );
        }

        Ok(())
    }

    /// Copies `buffer` into the region starting at `offset`.
    ///
    /// The caller guarantees `offset + buffer.len() <= TPS_SIZE`.
    pub(crate) fn write(&mut self, offset: usize, buffer: &[u8]) -> Result<()> {
        if buffer.is_empty() {
            return Ok(());
        }
        debug_assert!(offset + buffer.len() <= TPS_SIZE);

        let _window = ProtectionWindow::open(self, offset, buffer.len(), Protection::WRITE)?;

        // SAFETY: the destination span lies inside the mapping and is writable while
        // `_window` lives; `buffer` does not alias the mapping
        unsafe {
            ptr::copy_nonoverlapping(
                buffer.as_ptr(),
                self.map.as_mut_ptr().add(offset),
                buffer.len(),
            );
        }

        Ok(())
    }

    /// Maps a new region holding a full copy of `self`.
    ///
    /// Both regions are back at "no access" when this returns.
    pub(crate) fn duplicate(&self) -> Result<Region> {
        let mut copy = Region::allocate()?;
        {
            let _source = ProtectionWindow::open(self, 0, TPS_SIZE, Protection::READ)?;
            let _target = ProtectionWindow::open(&copy, 0, TPS_SIZE, Protection::WRITE)?;

            // SAFETY: both mappings are TPS_SIZE bytes, distinct, and accessible while the
            // two windows live
            unsafe {
                ptr::copy_nonoverlapping(self.map.as_ptr(), copy.map.as_mut_ptr(), TPS_SIZE);
            }
        }

        Ok(copy)
    }
}

impl Drop for Region {
    fn drop(&mut self) {
        // Unpublish before the mapping disappears, the address may be reused right after
        fault::page_table().unregister(self.slot);
    }
}
