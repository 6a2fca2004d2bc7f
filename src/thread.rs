//! Thread identity, the global critical section, and the block/unblock handshake.
//!
//! Everything in this crate serializes through one mutual-exclusion domain, the
//! [`CriticalSection`]. Entering it yields a [`CriticalGuard`]; leaving it is dropping the
//! guard. The guard additionally offers the suspension primitive the semaphore is built on:
//!
//! - [`CriticalGuard::block`] registers the calling thread as blocked and releases the critical
//!   section in one indivisible step, returning with the section re-acquired once woken.
//! - [`CriticalGuard::unblock`] marks a blocked thread runnable. It is only callable while
//!   holding the section, so a wakeup can never slip in between "decide to sleep" and "sleep".
//!
//! # Example
//!
//! ```rust
//! use std::collections::VecDeque;
//! use std::sync::Arc;
//! use tpsync::thread::{CriticalSection, ThreadId};
//!
//! let section = Arc::new(CriticalSection::new(VecDeque::new()));
//!
//! let sleeper = {
//!     let section = Arc::clone(&section);
//!     std::thread::spawn(move || {
//!         let mut guard = section.enter();
//!         guard.push_back(ThreadId::current());
//!         let _guard = guard.block();
//!     })
//! };
//!
//! loop {
//!     let mut guard = section.enter();
//!     if let Some(id) = guard.pop_front() {
//!         guard.unblock(id)?;
//!         break;
//!     }
//!     drop(guard);
//!     std::thread::yield_now();
//! }
//!
//! sleeper.join().unwrap();
//! # Ok::<(), tpsync::Error>(())
//! ```

use std::{
    collections::HashSet,
    ops::{Deref, DerefMut},
    sync::{Condvar, Mutex, MutexGuard, PoisonError},
};

use log::trace;

use crate::{Error, Result};

/// Opaque, comparable identity of a thread.
///
/// Identities are never reused for the lifetime of the process, so an identity taken from a
/// thread that has since exited can never alias a newer thread.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ThreadId(std::thread::ThreadId);

impl ThreadId {
    /// Returns the identity of the calling thread.
    #[must_use]
    pub fn current() -> Self {
        ThreadId(std::thread::current().id())
    }
}

impl From<std::thread::ThreadId> for ThreadId {
    fn from(id: std::thread::ThreadId) -> Self {
        ThreadId(id)
    }
}

struct Scheduled<T> {
    data: T,
    /// Threads suspended in [`CriticalGuard::block`]
    blocked: HashSet<ThreadId>,
    /// Threads that were unblocked but have not resumed yet
    runnable: HashSet<ThreadId>,
}

/// A process-wide mutual-exclusion domain guarding `T`.
///
/// The section is not reentrant: entering it again from a thread that already holds a
/// [`CriticalGuard`] deadlocks.
pub struct CriticalSection<T> {
    state: Mutex<Scheduled<T>>,
    wakeup: Condvar,
}

impl<T> CriticalSection<T> {
    /// Creates a critical section guarding `data`.
    pub fn new(data: T) -> Self {
        CriticalSection {
            state: Mutex::new(Scheduled {
                data,
                blocked: HashSet::new(),
                runnable: HashSet::new(),
            }),
            wakeup: Condvar::new(),
        }
    }

    /// Enters the critical section, waiting for any other holder to leave it.
    pub fn enter(&self) -> CriticalGuard<'_, T> {
        CriticalGuard {
            section: self,
            state: lock!(self.state),
        }
    }
}

/// Proof of being inside a [`CriticalSection`]; dropping it exits the section.
pub struct CriticalGuard<'a, T> {
    section: &'a CriticalSection<T>,
    state: MutexGuard<'a, Scheduled<T>>,
}

impl<'a, T> CriticalGuard<'a, T> {
    /// Suspends the calling thread until another thread calls [`CriticalGuard::unblock`] with
    /// its identity.
    ///
    /// The critical section is released while suspended and re-acquired before returning.
    /// Registration as blocked and the release happen atomically with respect to every other
    /// holder of the section, so an `unblock` issued after this thread was published (for
    /// example in a wait queue) cannot be lost.
    #[must_use = "dropping the returned guard exits the critical section"]
    pub fn block(self) -> CriticalGuard<'a, T> {
        let CriticalGuard { section, mut state } = self;
        let me = ThreadId::current();

        state.blocked.insert(me);
        trace!("thread {:?} blocked", me);

        let state = section
            .wakeup
            .wait_while(state, |state| !state.runnable.remove(&me))
            .unwrap_or_else(PoisonError::into_inner);

        trace!("thread {:?} resumed", me);
        CriticalGuard { section, state }
    }

    /// Makes the blocked thread `id` runnable again.
    ///
    /// # Errors
    /// Returns [`crate::Error::NotFound`] if `id` is not currently blocked.
    pub fn unblock(&mut self, id: ThreadId) -> Result<()> {
        if !self.state.blocked.remove(&id) {
            return Err(Error::NotFound);
        }

        self.state.runnable.insert(id);
        self.section.wakeup.notify_all();
        trace!("thread {:?} unblocked", id);

        Ok(())
    }

    /// Returns `true` if `id` is currently suspended in [`CriticalGuard::block`].
    #[must_use]
    pub fn is_blocked(&self, id: ThreadId) -> bool {
        self.state.blocked.contains(&id)
    }
}

impl<T> Deref for CriticalGuard<'_, T> {
    type Target = T;

    fn deref(&self) -> &T {
        &self.state.data
    }
}

impl<T> DerefMut for CriticalGuard<'_, T> {
    fn deref_mut(&mut self) -> &mut T {
        &mut self.state.data
    }
}
