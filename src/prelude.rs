//! # tpsync Prelude
//!
//! This module provides a convenient prelude for the most commonly used types and functions
//! of the library. Import this module to get quick access to the semaphore and TPS API on the
//! global runtime.

// ================================================================================================
// Core Types and Error Handling
// ================================================================================================

/// The main error type for all tpsync operations
pub use crate::Error;

/// The result type used throughout tpsync
pub use crate::Result;

/// Context object owning the critical section
pub use crate::Runtime;

/// Thread identity used to address TPS clones
pub use crate::ThreadId;

// ================================================================================================
// Semaphore
// ================================================================================================

/// Semaphore handle and operations on the global runtime
pub use crate::{
    sem_create, sem_destroy, sem_down, sem_get_value, sem_try_down, sem_up, SemaphoreHandle,
};

// ================================================================================================
// Thread-Private Storage
// ================================================================================================

/// TPS configuration, size, and operations on the global runtime
pub use crate::{
    tps_clone, tps_create, tps_destroy, tps_init, tps_read, tps_write, TpsConfig, TPS_SIZE,
};
