// Copyright 2025 Johann Kempter
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.
//
// SPDX-License-Identifier: Apache-2.0

#![doc(html_no_source)]
#![deny(missing_docs)]
// - 'tps/region.rs' maps anonymous memory and changes its protection
// - 'tps/fault.rs' installs a signal handler and reads siginfo_t

//! # tpsync
//!
//! Synchronization and memory isolation for multi-threaded Unix programs:
//!
//! - a counting **semaphore** that wakes waiters strictly in FIFO order, and
//! - **thread-private storage (TPS)**: one fixed-size memory area per thread, shared
//!   copy-on-write between clones and guarded by hardware page protection, so that a stray
//!   access from another thread crashes with a clear diagnostic instead of corrupting data.
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use std::thread;
//! use tpsync::prelude::*;
//!
//! tps_init(true)?;
//! let ready = sem_create(0)?;
//!
//! tps_create()?;
//! tps_write(0, 12, b"hello world!")?;
//! let parent = ThreadId::current();
//!
//! let child = thread::spawn(move || -> tpsync::Result<()> {
//!     // Shares the parent's page until the first write
//!     tps_clone(parent)?;
//!     tps_write(0, 3, b"HEL")?;
//!
//!     let mut buffer = [0_u8; 12];
//!     tps_read(0, 12, &mut buffer)?;
//!     assert_eq!(&buffer, b"HELlo world!");
//!
//!     sem_up(ready)
//! });
//!
//! sem_down(ready)?;
//! let mut buffer = [0_u8; 12];
//! tps_read(0, 12, &mut buffer)?;
//! assert_eq!(&buffer, b"hello world!");
//!
//! child.join().unwrap()?;
//! sem_destroy(ready)?;
//! # Ok::<(), tpsync::Error>(())
//! ```
//!
//! ## Architecture
//!
//! - [`thread`] - Thread identity, the critical section, and the block/unblock handshake
//! - [`Runtime`] - The context object owning the critical section and all guarded state
//! - [`semaphore`] - FIFO counting semaphore
//! - [`tps`] - Thread-private storage, copy-on-write pages, and the [`tps::fault`] handler
//! - [`Error`] and [`Result`] - Error handling
//!
//! Every operation of the library is serialized by one critical section per [`Runtime`]; the
//! functions at the crate root use the process-wide [`Runtime::global`].
//!
//! ## Error Handling
//!
//! Recoverable conditions are returned as [`Error`]. Touching TPS memory outside of
//! [`tps_read`] / [`tps_write`] is not recoverable: with protection enabled the process prints
//! `TPS protection error!` and terminates with the original fault signal.
//!
//! ## Logging
//!
//! Lifecycle events (semaphore and TPS creation, destruction, cloning, copy-on-write) are
//! reported through the [`log`](https://docs.rs/log) facade at `debug` level, block/unblock
//! hand-offs at `trace` level. The library never installs a logger.
#[macro_use]
pub(crate) mod macros;

#[macro_use]
pub(crate) mod error;
pub(crate) mod utils;

/// Shared functionality which is used in unit-tests
#[cfg(test)]
pub(crate) mod test;

/// Convenient re-exports of the most commonly used types and functions.
///
/// # Example
///
/// ```rust,no_run
/// use tpsync::prelude::*;
///
/// let sem = sem_create(1)?;
/// sem_down(sem)?;
/// sem_up(sem)?;
/// # Ok::<(), tpsync::Error>(())
/// ```
pub mod prelude;

/// Counting semaphore with FIFO wakeup
pub mod semaphore;

/// Thread identity and the critical section shared by all operations
pub mod thread;

/// Thread-private storage with copy-on-write sharing and fault-enforced protection
pub mod tps;

mod runtime;

pub use error::Error;
pub use runtime::Runtime;
pub use semaphore::SemaphoreHandle;
pub use thread::ThreadId;
pub use tps::{TpsConfig, TPS_SIZE};

/// Result alias used by every fallible operation of this crate.
pub type Result<T> = std::result::Result<T, Error>;

/// Creates a semaphore holding `count` units on the global [`Runtime`].
///
/// # Errors
/// See [`Runtime::sem_create`].
pub fn sem_create(count: usize) -> Result<SemaphoreHandle> {
    Runtime::global().sem_create(count)
}

/// Destroys a semaphore of the global [`Runtime`].
///
/// # Errors
/// See [`Runtime::sem_destroy`].
pub fn sem_destroy(handle: SemaphoreHandle) -> Result<()> {
    Runtime::global().sem_destroy(handle)
}

/// Takes one unit, blocking until one is handed over.
///
/// # Errors
/// See [`Runtime::sem_down`].
pub fn sem_down(handle: SemaphoreHandle) -> Result<()> {
    Runtime::global().sem_down(handle)
}

/// Takes one unit if available, without blocking.
///
/// # Errors
/// See [`Runtime::sem_try_down`].
pub fn sem_try_down(handle: SemaphoreHandle) -> Result<bool> {
    Runtime::global().sem_try_down(handle)
}

/// Releases one unit, waking the oldest waiter if there is one.
///
/// # Errors
/// See [`Runtime::sem_up`].
pub fn sem_up(handle: SemaphoreHandle) -> Result<()> {
    Runtime::global().sem_up(handle)
}

/// Returns the count, or the negated number of waiters.
///
/// # Errors
/// See [`Runtime::sem_get_value`].
pub fn sem_get_value(handle: SemaphoreHandle) -> Result<isize> {
    Runtime::global().sem_get_value(handle)
}

/// Initializes TPS on the global [`Runtime`]; `enable_protection` installs the fault handler.
///
/// TPS is process-wide and lives only on the global runtime; [`Runtime::new`] instances
/// reject `tps_init`.
///
/// # Errors
/// See [`Runtime::tps_init`].
pub fn tps_init(enable_protection: bool) -> Result<()> {
    Runtime::global().tps_init(enable_protection)
}

/// Gives the calling thread a new TPS area.
///
/// # Errors
/// See [`Runtime::tps_create`].
pub fn tps_create() -> Result<()> {
    Runtime::global().tps_create()
}

/// Releases the calling thread's TPS area.
///
/// # Errors
/// See [`Runtime::tps_destroy`].
pub fn tps_destroy() -> Result<()> {
    Runtime::global().tps_destroy()
}

/// Reads `length` bytes at `offset` of the calling thread's TPS area into `buffer`.
///
/// # Errors
/// See [`Runtime::tps_read`].
pub fn tps_read(offset: usize, length: usize, buffer: &mut [u8]) -> Result<()> {
    Runtime::global().tps_read(offset, length, buffer)
}

/// Writes the first `length` bytes of `buffer` at `offset` of the calling thread's TPS area.
///
/// # Errors
/// See [`Runtime::tps_write`].
pub fn tps_write(offset: usize, length: usize, buffer: &[u8]) -> Result<()> {
    Runtime::global().tps_write(offset, length, buffer)
}

/// Shares `target`'s TPS area with the calling thread, copy-on-write.
///
/// # Errors
/// See [`Runtime::tps_clone`].
pub fn tps_clone(target: ThreadId) -> Result<()> {
    Runtime::global().tps_clone(target)
}
