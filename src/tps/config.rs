//! TPS initialization options.

/// Configuration applied by [`crate::Runtime::tps_init`]
///
/// Protection is always enforced on the pages themselves (they are "no access" outside of
/// reads and writes); this only decides whether a violation is diagnosed by the library's
/// fault handler or left to whatever handler the program already has.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TpsConfig {
    /// Install the protection fault handler for `SIGSEGV` and `SIGBUS`
    pub enable_protection: bool,
}

impl Default for TpsConfig {
    fn default() -> Self {
        Self::protected()
    }
}

impl TpsConfig {
    /// Installs the fault handler, stray accesses end with `TPS protection error!`
    #[must_use]
    pub fn protected() -> Self {
        Self {
            enable_protection: true,
        }
    }

    /// Leaves the process' fault handling untouched
    #[must_use]
    pub fn unprotected() -> Self {
        Self {
            enable_protection: false,
        }
    }
}

impl From<bool> for TpsConfig {
    fn from(enable_protection: bool) -> Self {
        Self { enable_protection }
    }
}
