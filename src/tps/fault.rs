//! Protection fault interception.
//!
//! TPS regions are kept at "no access" outside of [`crate::tps_read`] and [`crate::tps_write`],
//! so any other access to them raises a hardware protection fault (`SIGSEGV`, or `SIGBUS` on
//! some platforms). When [`crate::tps_init`] is called with protection enabled, the handler in
//! this module is installed for both signals. It
//!
//! 1. rounds the faulting address down to a `TPS_SIZE` boundary,
//! 2. looks the result up in the [page table](page_table) of live TPS regions,
//! 3. writes `TPS protection error!` or `Not a TPS fault` to stderr,
//! 4. restores the default disposition of both signals and re-raises the signal,
//!
//! so the process always dies with its normal fault behavior. Recovery is not supported:
//! touching TPS memory outside of the API is a programming defect.
//!
//! The handler runs asynchronously and does not enter the critical section. It only performs
//! atomic loads on the page table and a raw `write(2)`; a region being unmapped concurrently may
//! be misattributed, which only affects the diagnostic, never the termination.
//!
//! Installing the handler replaces any previous `SIGSEGV`/`SIGBUS` disposition, including the
//! standard library's stack overflow reporter.

use std::{
    io, mem, ptr,
    sync::{
        atomic::{AtomicUsize, Ordering},
        Mutex, OnceLock,
    },
};

use log::debug;
use strum::IntoStaticStr;

use crate::{tps::TPS_SIZE, Error, Result};

const FAULT_SIGNALS: [libc::c_int; 2] = [libc::SIGSEGV, libc::SIGBUS];

/// Attribution of a protection fault, rendered as the diagnostic line the handler prints.
#[derive(Debug, Clone, Copy, PartialEq, Eq, IntoStaticStr)]
pub enum FaultOrigin {
    /// The fault hit a live TPS region
    #[strum(serialize = "TPS protection error!")]
    Tps,
    /// The fault hit memory this library does not manage
    #[strum(serialize = "Not a TPS fault")]
    Unrelated,
}

/// Base addresses of all mapped TPS regions, readable from a signal handler.
///
/// Slots are append-only atomics; an unmapped region's slot is zeroed and recycled.
pub(crate) struct PageTable {
    bases: boxcar::Vec<AtomicUsize>,
    free: Mutex<Vec<usize>>,
}

impl PageTable {
    fn new() -> Self {
        PageTable {
            bases: boxcar::Vec::new(),
            free: Mutex::new(Vec::new()),
        }
    }

    /// Publishes `base` and returns the slot it was stored in.
    pub(crate) fn register(&self, base: usize) -> usize {
        if let Some(slot) = lock!(self.free).pop() {
            if let Some(entry) = self.bases.get(slot) {
                entry.store(base, Ordering::Release);
                return slot;
            }
        }

        self.bases.push(AtomicUsize::new(base))
    }

    /// Withdraws the address stored in `slot`.
    pub(crate) fn unregister(&self, slot: usize) {
        if let Some(entry) = self.bases.get(slot) {
            entry.store(0, Ordering::Release);
            lock!(self.free).push(slot);
        }
    }

    /// Returns `true` if a live region starts at `base`.
    ///
    /// Lock-free and allocation-free, safe to call from the fault handler.
    pub(crate) fn contains(&self, base: usize) -> bool {
        base != 0
            && self
                .bases
                .iter()
                .any(|(_, entry)| entry.load(Ordering::Acquire) == base)
    }
}

static PAGE_TABLE: OnceLock<PageTable> = OnceLock::new();

/// The process-wide page table.
pub(crate) fn page_table() -> &'static PageTable {
    PAGE_TABLE.get_or_init(PageTable::new)
}

/// Attributes a faulting address to a TPS region or to unrelated memory.
///
/// This is the decision the fault handler makes before terminating the process.
///
/// # Examples
///
/// ```rust
/// use tpsync::tps::fault::{classify, FaultOrigin};
///
/// let local = 0_u64;
/// assert_eq!(classify(&local as *const u64 as usize), FaultOrigin::Unrelated);
/// ```
#[must_use]
pub fn classify(addr: usize) -> FaultOrigin {
    let base = addr & !(TPS_SIZE - 1);
    match PAGE_TABLE.get() {
        Some(table) if table.contains(base) => FaultOrigin::Tps,
        _ => FaultOrigin::Unrelated,
    }
}

/// Installs [`handle_fault`] for `SIGSEGV` and `SIGBUS`.
pub(crate) fn install() -> Result<()> {
    // The handler must never be the one initializing the table
    page_table();

    let handler = handle_fault
        as extern "C" fn(libc::c_int, *mut libc::siginfo_t, *mut libc::c_void);

    for signal in FAULT_SIGNALS {
        // SAFETY: `action` is fully initialized (zeroed, then the handler, flags and an empty
        // mask are set) and `handle_fault` has the SA_SIGINFO signature
        let rc = unsafe {
            let mut action: libc::sigaction = mem::zeroed();
            action.sa_sigaction = handler as libc::sighandler_t;
            action.sa_flags = libc::SA_SIGINFO;
            libc::sigemptyset(&mut action.sa_mask);
            libc::sigaction(signal, &action, ptr::null_mut())
        };

        if rc != 0 {
            return Err(Error::SignalInstall(io::Error::last_os_error()));
        }
    }

    debug!("TPS protection fault handler installed");
    Ok(())
}

/// Writes one diagnostic line to stderr using only async-signal-safe calls.
fn report(origin: FaultOrigin) {
    let message: &'static str = origin.into();

    // SAFETY: write(2) only reads the given buffers; a failed or short write is ignored
    unsafe {
        libc::write(
            libc::STDERR_FILENO,
            message.as_ptr().cast(),
            message.len(),
        );
        libc::write(libc::STDERR_FILENO, b"\n".as_ptr().cast(), 1);
    }
}

extern "C" fn handle_fault(
    signal: libc::c_int,
    info: *mut libc::siginfo_t,
    _context: *mut libc::c_void,
) {
    // SAFETY: the kernel hands SA_SIGINFO handlers a valid siginfo_t
    let addr = unsafe { (*info).si_addr() } as usize;

    report(classify(addr));

    // SAFETY: signal(2) and raise(3) are async-signal-safe. The re-raised signal stays pending
    // until this handler returns and is then delivered with the default disposition.
    unsafe {
        for fault_signal in FAULT_SIGNALS {
            libc::signal(fault_signal, libc::SIG_DFL);
        }
        libc::raise(signal);
    }
}
