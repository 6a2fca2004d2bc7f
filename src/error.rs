use thiserror::Error;

macro_rules! invalid_argument {
    // Single string version
    ($msg:expr) => {
        crate::Error::InvalidArgument {
            message: $msg.to_string(),
            file: file!(),
            line: line!(),
        }
    };

    // Format string with arguments version
    ($fmt:expr, $($arg:tt)*) => {
        crate::Error::InvalidArgument {
            message: format!($fmt, $($arg)*),
            file: file!(),
            line: line!(),
        }
    };
}

/// The generic Error type, which provides coverage for all errors this library can potentially
/// return.
///
/// Every recoverable condition is reported to the immediate caller; nothing is retried
/// internally. A protection fault (touching TPS memory outside of [`crate::tps_read`] and
/// [`crate::tps_write`]) is deliberately *not* represented here: it is delivered
/// asynchronously by the hardware and always terminates the process, see [`crate::tps::fault`].
///
/// # Error Categories
///
/// ## Argument Errors
/// - [`Error::InvalidArgument`] - Unknown handle, out-of-range window, short buffer, bad clone
///
/// ## Lifecycle Errors
/// - [`Error::NotInitialized`] - TPS operation before [`crate::tps_init`]
/// - [`Error::AlreadyInitialized`] - Second call to [`crate::tps_init`]
/// - [`Error::DuplicateResource`] - The calling thread already owns a TPS area
/// - [`Error::NotFound`] - No TPS area, no blocked thread, or a stale page reference
/// - [`Error::ResourceBusy`] - Destroying a semaphore that still has waiters
///
/// ## Platform Errors
/// - [`Error::AllocationFailure`] - Mapping a region or growing a table failed
/// - [`Error::ProtectionChange`] - Changing page protection failed
/// - [`Error::SignalInstall`] - Installing the fault handler failed
///
/// # Examples
///
/// ```rust,no_run
/// use tpsync::{Error, Runtime};
///
/// let runtime = Runtime::new();
/// let sem = runtime.sem_create(0)?;
///
/// match runtime.sem_destroy(sem) {
///     Ok(()) => println!("semaphore released"),
///     Err(Error::ResourceBusy(waiters)) => eprintln!("{} threads still waiting", waiters),
///     Err(e) => eprintln!("Other error: {}", e),
/// }
/// # Ok::<(), tpsync::Error>(())
/// ```
#[derive(Error, Debug)]
pub enum Error {
    /// An argument did not describe a valid object or memory window.
    ///
    /// Returned for null or stale semaphore handles, windows that do not fit into
    /// [`crate::TPS_SIZE`], buffers shorter than the requested length, reads or writes
    /// from a thread without a TPS area, and invalid clone requests.
    ///
    /// # Fields
    ///
    /// * `message` - Description of the offending argument
    /// * `file` - Source file where the error was detected
    /// * `line` - Source line where the error was detected
    #[error("Invalid argument - {file}:{line}: {message}")]
    InvalidArgument {
        /// The message to be printed for the InvalidArgument error
        message: String,
        /// The source file in which this error occured
        file: &'static str,
        /// The source line in which this error occured
        line: u32,
    },

    /// The TPS facility was used before [`crate::tps_init`] was called.
    #[error("TPS has not been initialized")]
    NotInitialized,

    /// [`crate::tps_init`] was called a second time in this process.
    ///
    /// The registry and the fault handler are process-wide, so this is reported even if
    /// the second call is made on a different [`crate::Runtime`].
    #[error("TPS has already been initialized")]
    AlreadyInitialized,

    /// The calling thread already owns a TPS area.
    #[error("The calling thread already owns a TPS area")]
    DuplicateResource,

    /// The addressed object does not exist.
    ///
    /// Returned by [`crate::tps_destroy`] when the caller owns no TPS area, when unblocking a
    /// thread that is not blocked, and when a page reference no longer names a live page.
    #[error("The requested resource does not exist")]
    NotFound,

    /// A semaphore cannot be destroyed while threads are blocked on it.
    ///
    /// The associated value is the number of waiting threads.
    #[error("Semaphore is busy - {0} threads are waiting")]
    ResourceBusy(usize),

    /// Memory or handle space could not be allocated.
    #[error("Allocation failed - {message}")]
    AllocationFailure {
        /// Description of the allocation that failed
        message: String,
    },

    /// Changing the protection of a TPS region failed.
    #[error("Changing page protection failed - {0}")]
    ProtectionChange(#[source] std::io::Error),

    /// Installing the protection fault handler failed.
    #[error("Installing the fault handler failed - {0}")]
    SignalInstall(#[source] std::io::Error),
}
