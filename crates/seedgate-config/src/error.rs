//! Configuration validation errors.

/// Errors produced while turning raw flags into validated settings.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// A humanized size string could not be parsed.
    #[error("flag {flag} has unparsable size {value:?}")]
    BadSize {
        /// Flag name as given on the command line.
        flag: &'static str,
        /// Offending value.
        value: String,
    },

    /// A flag combination is inconsistent.
    #[error("flag {flag}: {reason}")]
    Invalid {
        /// Flag name as given on the command line.
        flag: &'static str,
        /// Why the value was rejected.
        reason: &'static str,
    },
}
