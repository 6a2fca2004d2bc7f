//! The context object every operation runs against.
//!
//! A [`Runtime`] owns the single [`CriticalSection`] of the library together with all state
//! it guards: the semaphore table and, once [`Runtime::tps_init`] ran, the TPS registry.
//! Semaphore operations live in [`crate::semaphore`], TPS operations in [`crate::tps`]; both
//! are methods on `Runtime`.
//!
//! Most programs use the process-wide instance returned by [`Runtime::global`], which is what
//! the crate-root functions ([`crate::sem_down`], [`crate::tps_write`], ...) operate on.
//! Independent runtimes can be created with [`Runtime::new`] for semaphores. Every runtime has
//! a process-unique id that is stamped into the handles it issues, so a handle is rejected by
//! any runtime other than its issuer. The TPS facility is process-wide (it owns the fault
//! handler) and can only be initialized on [`Runtime::global`].

use std::sync::{
    atomic::{AtomicU32, Ordering},
    OnceLock,
};

use crate::{
    semaphore::SemaphoreState,
    thread::{CriticalGuard, CriticalSection},
    tps::TpsRegistry,
    utils::Arena,
};

/// State guarded by the critical section.
pub(crate) struct Kernel {
    pub(crate) semaphores: Arena<SemaphoreState>,
    pub(crate) tps: Option<TpsRegistry>,
}

/// Library context: the critical section and everything it serializes.
///
/// # Examples
///
/// ```rust
/// use tpsync::Runtime;
///
/// let runtime = Runtime::new();
/// let sem = runtime.sem_create(1)?;
///
/// runtime.sem_down(sem)?;
/// assert_eq!(runtime.sem_get_value(sem)?, 0);
/// runtime.sem_up(sem)?;
///
/// runtime.sem_destroy(sem)?;
/// # Ok::<(), tpsync::Error>(())
/// ```
pub struct Runtime {
    id: u32,
    kernel: CriticalSection<Kernel>,
}

/// Source of runtime ids; 0 is never issued and marks null handles.
static NEXT_RUNTIME_ID: AtomicU32 = AtomicU32::new(1);

impl Runtime {
    /// Creates an independent runtime with an empty semaphore table and no TPS registry.
    #[must_use]
    pub fn new() -> Self {
        Runtime {
            id: NEXT_RUNTIME_ID.fetch_add(1, Ordering::Relaxed),
            kernel: CriticalSection::new(Kernel {
                semaphores: Arena::new(),
                tps: None,
            }),
        }
    }

    /// Returns the process-wide runtime used by the crate-root functions.
    pub fn global() -> &'static Runtime {
        static GLOBAL: OnceLock<Runtime> = OnceLock::new();
        GLOBAL.get_or_init(Runtime::new)
    }

    /// Process-unique id of this runtime, never 0.
    pub(crate) fn id(&self) -> u32 {
        self.id
    }

    /// Returns `true` for the instance returned by [`Runtime::global`].
    pub(crate) fn is_global(&self) -> bool {
        std::ptr::eq(self, Runtime::global())
    }

    /// Enters the critical section.
    pub(crate) fn enter(&self) -> CriticalGuard<'_, Kernel> {
        self.kernel.enter()
    }
}

impl Default for Runtime {
    fn default() -> Self {
        Self::new()
    }
}
