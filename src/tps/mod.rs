//! Thread-private storage (TPS).
//!
//! Every thread may own one TPS area: a [`TPS_SIZE`]-byte memory region that can only be
//! accessed through [`Runtime::tps_read`] and [`Runtime::tps_write`]. Outside of those calls
//! the region is mapped "no access", so a stray pointer into another thread's storage faults
//! instead of silently corrupting it (see [`fault`]).
//!
//! # Copy-on-write
//!
//! [`Runtime::tps_clone`] gives the calling thread a TPS area that *shares* the target
//! thread's page instead of copying it. The page is reference counted; the first write by any
//! sharer while the count is above one maps a private copy for the writer before the bytes are
//! changed, so the other sharers never observe the write.
//!
//! ```text
//! A: create, write "hello world!"     A ──► P1 (refs 1)
//! B: clone(A)                         A ──► P1 (refs 2) ◄── B
//! B: write(0, "HEL")                  A ──► P1 (refs 1)     B ──► P2 (refs 1) "HELlo world!"
//! ```
//!
//! # Lifecycle
//!
//! The registry is created once per process by [`Runtime::tps_init`] on [`Runtime::global`];
//! until then every TPS operation fails with [`Error::NotInitialized`], and a second
//! initialization fails with [`Error::AlreadyInitialized`]. Runtimes created with
//! [`Runtime::new`] never carry a registry. All operations run inside the runtime's critical section and
//! return the touched pages to "no access" before leaving it.
//!
//! # Example
//!
//! ```rust,no_run
//! use tpsync::{tps_create, tps_destroy, tps_init, tps_read, tps_write};
//!
//! tps_init(true)?;
//! tps_create()?;
//!
//! tps_write(0, 5, b"hello")?;
//! let mut buffer = [0_u8; 5];
//! tps_read(0, 5, &mut buffer)?;
//! assert_eq!(&buffer, b"hello");
//!
//! tps_destroy()?;
//! # Ok::<(), tpsync::Error>(())
//! ```

mod config;
pub mod fault;
mod page;
mod region;

pub use config::TpsConfig;

use std::{
    collections::HashMap,
    sync::atomic::{AtomicBool, Ordering},
};

use log::debug;

use crate::{thread::ThreadId, Error, Result, Runtime};
use page::{PageArena, PageId};

/// Size of every TPS area in bytes; one unit of hardware page protection.
pub const TPS_SIZE: usize = 4096;

const _: () = assert!(TPS_SIZE.is_power_of_two());

/// Set by the first successful [`Runtime::tps_init`] in the process.
static TPS_CLAIMED: AtomicBool = AtomicBool::new(false);

struct TpsEntry {
    page: PageId,
}

/// Checks that `[offset, offset + length)` lies inside a TPS area and that the caller's
/// buffer can hold `length` bytes.
fn check_window(offset: usize, length: usize, buffer_len: usize) -> Result<()> {
    let end = offset
        .checked_add(length)
        .ok_or_else(|| invalid_argument!("window {}+{} overflows", offset, length))?;

    if end > TPS_SIZE {
        return Err(invalid_argument!(
            "window {}..{} exceeds TPS size {}",
            offset,
            end,
            TPS_SIZE
        ));
    }

    if buffer_len < length {
        return Err(invalid_argument!(
            "buffer of {} bytes cannot hold {} bytes",
            buffer_len,
            length
        ));
    }

    Ok(())
}

/// Owner → page mapping plus the pages themselves.
///
/// Invariant: every page's refcount equals the number of entries referencing it.
#[derive(Default)]
pub(crate) struct TpsRegistry {
    entries: HashMap<ThreadId, TpsEntry>,
    pages: PageArena,
}

impl TpsRegistry {
    fn page_of(&self, owner: ThreadId) -> Option<PageId> {
        self.entries.get(&owner).map(|entry| entry.page)
    }

    pub(crate) fn contains(&self, owner: ThreadId) -> bool {
        self.entries.contains_key(&owner)
    }

    pub(crate) fn create(&mut self, owner: ThreadId) -> Result<()> {
        if self.contains(owner) {
            return Err(Error::DuplicateResource);
        }

        let page = self.pages.allocate()?;
        self.entries.insert(owner, TpsEntry { page });

        debug!("thread {:?} created TPS page {:?}", owner, page);
        Ok(())
    }

    pub(crate) fn destroy(&mut self, owner: ThreadId) -> Result<()> {
        let entry = self.entries.remove(&owner).ok_or(Error::NotFound)?;
        let remaining = self.pages.release(entry.page)?;

        debug!(
            "thread {:?} destroyed its TPS, page {:?} has {} references left",
            owner, entry.page, remaining
        );
        Ok(())
    }

    pub(crate) fn read(
        &self,
        owner: ThreadId,
        offset: usize,
        length: usize,
        buffer: &mut [u8],
    ) -> Result<()> {
        check_window(offset, length, buffer.len())?;

        let page = self
            .page_of(owner)
            .and_then(|id| self.pages.get(id))
            .ok_or_else(|| invalid_argument!("thread {:?} owns no TPS area", owner))?;

        page.region.read(offset, &mut buffer[..length])
    }

    pub(crate) fn write(
        &mut self,
        owner: ThreadId,
        offset: usize,
        length: usize,
        buffer: &[u8],
    ) -> Result<()> {
        check_window(offset, length, buffer.len())?;

        let shared = self
            .page_of(owner)
            .ok_or_else(|| invalid_argument!("thread {:?} owns no TPS area", owner))?;
        let private = self.make_private(owner, shared)?;

        let page = self.pages.get_mut(private).ok_or(Error::NotFound)?;
        page.region.write(offset, &buffer[..length])
    }

    /// Ensures `owner` is the only user of its page, copying it first if it is shared.
    ///
    /// The other sharers keep the original page untouched.
    fn make_private(&mut self, owner: ThreadId, id: PageId) -> Result<PageId> {
        let page = self.pages.get(id).ok_or(Error::NotFound)?;
        if page.refcount() == 1 {
            return Ok(id);
        }

        let copy = page.region.duplicate()?;
        let private = self.pages.insert(copy)?;
        self.pages.release(id)?;

        if let Some(entry) = self.entries.get_mut(&owner) {
            entry.page = private;
        }

        debug!(
            "thread {:?} copied shared page {:?} to {:?} before writing",
            owner, id, private
        );
        Ok(private)
    }

    pub(crate) fn clone_from(&mut self, owner: ThreadId, target: ThreadId) -> Result<()> {
        if self.contains(owner) {
            return Err(invalid_argument!(
                "thread {:?} already owns a TPS area",
                owner
            ));
        }

        let page = self
            .page_of(target)
            .ok_or_else(|| invalid_argument!("thread {:?} owns no TPS area", target))?;

        let references = self.pages.acquire(page).map_err(|_| {
            invalid_argument!("TPS page of thread {:?} has been released", target)
        })?;
        self.entries.insert(owner, TpsEntry { page });

        debug!(
            "thread {:?} shares page {:?} of thread {:?} ({} references)",
            owner, page, target, references
        );
        Ok(())
    }

    pub(crate) fn page_address(&self, owner: ThreadId) -> Result<usize> {
        self.page_of(owner)
            .and_then(|id| self.pages.get(id))
            .map(|page| page.region.base())
            .ok_or(Error::NotFound)
    }

    pub(crate) fn page_refcount(&self, owner: ThreadId) -> Result<usize> {
        self.page_of(owner)
            .and_then(|id| self.pages.get(id))
            .map(page::Page::refcount)
            .ok_or(Error::NotFound)
    }
}

impl Runtime {
    /// Creates the TPS registry, installing the protection fault handler if
    /// `config.enable_protection` is set.
    ///
    /// Accepts a [`TpsConfig`] or a plain `bool` (`true` = install the handler).
    ///
    /// # Errors
    /// Returns [`Error::AlreadyInitialized`] if TPS has been initialized before in this
    /// process, [`Error::InvalidArgument`] if `self` is not [`Runtime::global`], and
    /// [`Error::SignalInstall`] if the handler cannot be installed; the call may then be
    /// retried.
    pub fn tps_init(&self, config: impl Into<TpsConfig>) -> Result<()> {
        let config = config.into();
        let mut kernel = self.enter();

        if kernel.tps.is_some() || TPS_CLAIMED.load(Ordering::Acquire) {
            return Err(Error::AlreadyInitialized);
        }

        // The registry backs the crate-root functions, a private runtime must not claim it
        if !self.is_global() {
            return Err(invalid_argument!(
                "TPS can only be initialized on the global runtime"
            ));
        }

        if TPS_CLAIMED.swap(true, Ordering::AcqRel) {
            return Err(Error::AlreadyInitialized);
        }

        if config.enable_protection {
            if let Err(e) = fault::install() {
                TPS_CLAIMED.store(false, Ordering::Release);
                return Err(e);
            }
        }

        kernel.tps = Some(TpsRegistry::default());
        debug!("TPS initialized with {:?}", config);
        Ok(())
    }

    fn with_tps<R>(
        &self,
        op: impl FnOnce(&mut TpsRegistry, ThreadId) -> Result<R>,
    ) -> Result<R> {
        let mut kernel = self.enter();
        let registry = kernel.tps.as_mut().ok_or(Error::NotInitialized)?;
        op(registry, ThreadId::current())
    }

    /// Gives the calling thread a new, zero-filled TPS area.
    ///
    /// # Errors
    /// Returns [`Error::DuplicateResource`] if the caller already owns one and
    /// [`Error::AllocationFailure`] if the region cannot be mapped.
    pub fn tps_create(&self) -> Result<()> {
        self.with_tps(|registry, me| registry.create(me))
    }

    /// Releases the calling thread's TPS area.
    ///
    /// The underlying page is unmapped once no clone references it anymore.
    ///
    /// # Errors
    /// Returns [`Error::NotFound`] if the caller owns no TPS area.
    pub fn tps_destroy(&self) -> Result<()> {
        self.with_tps(|registry, me| registry.destroy(me))
    }

    /// Copies `length` bytes at `offset` of the caller's TPS area into `buffer`.
    ///
    /// # Errors
    /// Returns [`Error::InvalidArgument`] if the caller owns no TPS area,
    /// `offset + length > TPS_SIZE`, or `buffer` is shorter than `length`.
    pub fn tps_read(&self, offset: usize, length: usize, buffer: &mut [u8]) -> Result<()> {
        self.with_tps(|registry, me| registry.read(me, offset, length, buffer))
    }

    /// Copies the first `length` bytes of `buffer` to `offset` of the caller's TPS area.
    ///
    /// If the area still shares its page with a clone, the page is copied first.
    ///
    /// # Errors
    /// Returns [`Error::InvalidArgument`] under the same conditions as
    /// [`Runtime::tps_read`].
    pub fn tps_write(&self, offset: usize, length: usize, buffer: &[u8]) -> Result<()> {
        self.with_tps(|registry, me| registry.write(me, offset, length, buffer))
    }

    /// Gives the calling thread a TPS area sharing `target`'s current content, copy-on-write.
    ///
    /// # Errors
    /// Returns [`Error::InvalidArgument`] if `target` owns no TPS area or the caller already
    /// owns one.
    pub fn tps_clone(&self, target: ThreadId) -> Result<()> {
        self.with_tps(|registry, me| registry.clone_from(me, target))
    }

    /// Returns `true` if the calling thread owns a TPS area.
    pub fn tps_exists(&self) -> Result<bool> {
        self.with_tps(|registry, me| Ok(registry.contains(me)))
    }

    /// Base address of the calling thread's current TPS page.
    ///
    /// For diagnostics only: the address changes when a write copies a shared page, and
    /// dereferencing it outside of the API triggers the protection fault path.
    ///
    /// # Errors
    /// Returns [`Error::NotFound`] if the caller owns no TPS area.
    pub fn tps_page_address(&self) -> Result<usize> {
        self.with_tps(|registry, me| registry.page_address(me))
    }

    /// Number of TPS areas, the caller's included, sharing the caller's current page.
    ///
    /// # Errors
    /// Returns [`Error::NotFound`] if the caller owns no TPS area.
    pub fn tps_page_refcount(&self) -> Result<usize> {
        self.with_tps(|registry, me| registry.page_refcount(me))
    }
}
