//! Counting semaphore with FIFO wakeup.
//!
//! A semaphore holds a count of available resource units and a queue of threads waiting for
//! one. The two are never "available" at the same time: while threads are waiting the count is
//! zero, and [`Runtime::sem_up`] hands the released unit directly to the oldest waiter instead
//! of incrementing the count. A thread that arrives later can therefore never overtake a thread
//! that is already queued, and waiters are released strictly in the order they called
//! [`Runtime::sem_down`].
//!
//! Semaphores are addressed by a copyable [`SemaphoreHandle`], valid only with the [`Runtime`]
//! that issued it. Handles of destroyed semaphores, handles issued by another runtime and
//! [`SemaphoreHandle::NULL`] are rejected with [`Error::InvalidArgument`].
//!
//! # Example
//!
//! ```rust
//! use std::thread;
//! use tpsync::Runtime;
//!
//! let runtime = Runtime::global();
//! let done = runtime.sem_create(0)?;
//!
//! let worker = thread::spawn(move || {
//!     // ... produce something ...
//!     Runtime::global().sem_up(done)
//! });
//!
//! runtime.sem_down(done)?;
//! worker.join().unwrap()?;
//! runtime.sem_destroy(done)?;
//! # Ok::<(), tpsync::Error>(())
//! ```

use std::collections::VecDeque;

use log::{debug, warn};

use crate::{thread::ThreadId, utils::ArenaId, Error, Result, Runtime};

/// Opaque handle naming a semaphore of a [`Runtime`].
///
/// Carries the id of the issuing runtime next to the slot reference.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SemaphoreHandle {
    runtime: u32,
    slot: ArenaId,
}

impl SemaphoreHandle {
    /// A handle that never names a semaphore; every operation on it fails with
    /// [`Error::InvalidArgument`].
    pub const NULL: SemaphoreHandle = SemaphoreHandle {
        runtime: 0,
        slot: ArenaId::NULL,
    };

    /// Returns `true` for [`SemaphoreHandle::NULL`].
    #[must_use]
    pub fn is_null(self) -> bool {
        self.slot.is_null()
    }
}

impl Default for SemaphoreHandle {
    fn default() -> Self {
        Self::NULL
    }
}

/// Internal state of one semaphore, only touched inside the critical section.
pub(crate) struct SemaphoreState {
    count: usize,
    waiters: VecDeque<ThreadId>,
}

impl SemaphoreState {
    fn new(count: usize) -> Self {
        SemaphoreState {
            count,
            waiters: VecDeque::new(),
        }
    }

    /// `count` when positive, otherwise minus the number of waiters.
    fn value(&self) -> isize {
        if self.count > 0 {
            isize::try_from(self.count).unwrap_or(isize::MAX)
        } else {
            -isize::try_from(self.waiters.len()).unwrap_or(isize::MAX)
        }
    }
}

impl Runtime {
    /// Slot of `handle` in this runtime's table, if this runtime issued it.
    fn semaphore_slot(&self, handle: SemaphoreHandle) -> Result<ArenaId> {
        if handle.runtime != self.id() {
            return Err(invalid_argument!(
                "semaphore {:?} was not issued by this runtime",
                handle
            ));
        }

        Ok(handle.slot)
    }

    /// Creates a semaphore holding `count` resource units.
    ///
    /// # Errors
    /// Returns [`Error::AllocationFailure`] if the semaphore table is exhausted.
    pub fn sem_create(&self, count: usize) -> Result<SemaphoreHandle> {
        let mut kernel = self.enter();
        let id = kernel
            .semaphores
            .insert(SemaphoreState::new(count))
            .ok_or_else(|| Error::AllocationFailure {
                message: "semaphore table is full".to_string(),
            })?;

        debug!("semaphore {:?} created with count {}", id, count);
        Ok(SemaphoreHandle {
            runtime: self.id(),
            slot: id,
        })
    }

    /// Destroys a semaphore.
    ///
    /// # Errors
    /// Returns [`Error::InvalidArgument`] for an unknown handle and [`Error::ResourceBusy`] if
    /// threads are still blocked on the semaphore; in the latter case it stays usable.
    pub fn sem_destroy(&self, handle: SemaphoreHandle) -> Result<()> {
        let slot = self.semaphore_slot(handle)?;
        let mut kernel = self.enter();
        let waiting = kernel
            .semaphores
            .get(slot)
            .ok_or_else(|| invalid_argument!("unknown semaphore {:?}", handle))?
            .waiters
            .len();

        if waiting > 0 {
            warn!(
                "refusing to destroy semaphore {:?}: {} threads waiting",
                handle, waiting
            );
            return Err(Error::ResourceBusy(waiting));
        }

        kernel.semaphores.remove(slot);
        debug!("semaphore {:?} destroyed", handle);
        Ok(())
    }

    /// Takes one resource unit, blocking until one is handed over if none is available.
    ///
    /// The wait has no timeout and cannot be cancelled.
    ///
    /// # Errors
    /// Returns [`Error::InvalidArgument`] for an unknown handle.
    pub fn sem_down(&self, handle: SemaphoreHandle) -> Result<()> {
        let slot = self.semaphore_slot(handle)?;
        let mut kernel = self.enter();
        let me = ThreadId::current();

        let sem = kernel
            .semaphores
            .get_mut(slot)
            .ok_or_else(|| invalid_argument!("unknown semaphore {:?}", handle))?;

        if sem.count > 0 {
            sem.count -= 1;
            return Ok(());
        }

        // The unit is handed to us by `sem_up`; nothing left to take on resumption
        sem.waiters.push_back(me);
        let _kernel = kernel.block();

        Ok(())
    }

    /// Takes one resource unit if one is available, without blocking.
    ///
    /// Returns `Ok(false)` when the count is zero; the caller is never queued.
    ///
    /// # Errors
    /// Returns [`Error::InvalidArgument`] for an unknown handle.
    pub fn sem_try_down(&self, handle: SemaphoreHandle) -> Result<bool> {
        let slot = self.semaphore_slot(handle)?;
        let mut kernel = self.enter();
        let sem = kernel
            .semaphores
            .get_mut(slot)
            .ok_or_else(|| invalid_argument!("unknown semaphore {:?}", handle))?;

        if sem.count == 0 {
            return Ok(false);
        }

        sem.count -= 1;
        Ok(true)
    }

    /// Releases one resource unit.
    ///
    /// If threads are waiting, the oldest one is woken and receives the unit directly;
    /// otherwise the count is incremented.
    ///
    /// # Errors
    /// Returns [`Error::InvalidArgument`] for an unknown handle or if the count would
    /// overflow.
    pub fn sem_up(&self, handle: SemaphoreHandle) -> Result<()> {
        let slot = self.semaphore_slot(handle)?;
        let mut kernel = self.enter();
        let sem = kernel
            .semaphores
            .get_mut(slot)
            .ok_or_else(|| invalid_argument!("unknown semaphore {:?}", handle))?;

        let Some(waiter) = sem.waiters.pop_front() else {
            sem.count = sem
                .count
                .checked_add(1)
                .ok_or_else(|| invalid_argument!("semaphore {:?} count overflow", handle))?;
            return Ok(());
        };

        kernel.unblock(waiter)
    }

    /// Returns the count if positive, otherwise the negated number of waiting threads.
    ///
    /// A value of `3` means three units are available, `-2` means two threads are blocked,
    /// `0` means neither.
    ///
    /// # Errors
    /// Returns [`Error::InvalidArgument`] for any null or unknown handle, including handles
    /// issued by another runtime.
    pub fn sem_get_value(&self, handle: SemaphoreHandle) -> Result<isize> {
        let slot = self.semaphore_slot(handle)?;
        let kernel = self.enter();
        kernel
            .semaphores
            .get(slot)
            .map(SemaphoreState::value)
            .ok_or_else(|| invalid_argument!("unknown semaphore {:?}", handle))
    }
}
