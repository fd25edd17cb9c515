//! Error taxonomy for resource group control.

use std::io;

use miette::Diagnostic;
use thiserror::Error;

/// Result type alias using [`CorralError`].
pub type CorralResult<T> = Result<T, CorralError>;

/// Errors raised by the resource group controller.
///
/// Every variant that stems from a refused OS call carries the
/// [`io::Error`] built from the reported errno, so the numeric code and the
/// OS message travel with the error (see [`CorralError::os_code`]).
#[derive(Error, Diagnostic, Debug)]
pub enum CorralError {
    /// The group object could not be instantiated or opened.
    #[error("Failed to create group {name}: {source}")]
    #[diagnostic(
        code(corral::group::creation),
        help("Check that the cgroup v2 hierarchy is writable and the name is not already taken")
    )]
    Creation {
        /// The requested group name.
        name: String,
        /// The OS-reported cause.
        #[source]
        source: io::Error,
    },

    /// The OS refused to associate a process with the group.
    #[error("Failed to bind pid {pid} to group {group}: {source}")]
    #[diagnostic(code(corral::group::bind))]
    Bind {
        /// The group the process was being bound to.
        group: String,
        /// The process id.
        pid: u32,
        /// The OS-reported cause.
        #[source]
        source: io::Error,
    },

    /// A limit value was rejected or the control write failed.
    #[error("Failed to set {setting} on group {group}: {source}")]
    #[diagnostic(code(corral::group::policy))]
    Policy {
        /// The group being configured.
        group: String,
        /// The limit that was being written (e.g. `cpu.max`).
        setting: String,
        /// The OS-reported cause.
        #[source]
        source: io::Error,
    },

    /// An operation was attempted on a group that has been terminated.
    #[error("Group {group} has already been terminated")]
    #[diagnostic(
        code(corral::group::terminated),
        help("Create a new group; a terminated handle cannot be reused")
    )]
    AlreadyTerminated {
        /// The terminated group.
        group: String,
    },

    /// Killing the members or releasing the group object failed.
    #[error("Failed to tear down group {group}: {source}")]
    #[diagnostic(
        code(corral::group::teardown),
        help("Leftover empty groups can be removed with `corral prune`")
    )]
    Teardown {
        /// The group being torn down.
        group: String,
        /// The OS-reported cause.
        #[source]
        source: io::Error,
    },

    /// Invalid group name.
    #[error("Invalid group name: {name}")]
    #[diagnostic(
        code(corral::group::invalid_name),
        help("Group names must be 1-64 characters of letters, digits, '-', '_' or '.', starting with a letter or digit")
    )]
    InvalidGroupName {
        /// The rejected name.
        name: String,
    },

    /// Invalid resource quantity format.
    #[error("Invalid resource quantity: {value}")]
    #[diagnostic(
        code(corral::resource::invalid_quantity),
        help("Use formats like '20Mi', '1Gi', '512M' or plain bytes for memory, '150' or '1.5c' for CPU")
    )]
    InvalidResourceQuantity {
        /// The invalid value.
        value: String,
    },

    /// Feature not supported on this platform.
    #[error("Feature not supported: {feature}")]
    #[diagnostic(
        code(corral::unsupported),
        help("A unified cgroup v2 hierarchy is required (Linux 5.2 or later)")
    )]
    Unsupported {
        /// The unsupported feature.
        feature: String,
    },

    /// Configuration error.
    #[error("Configuration error: {message}")]
    #[diagnostic(code(corral::config))]
    Config {
        /// The error message.
        message: String,
    },

    /// I/O error.
    #[error("I/O error: {0}")]
    #[diagnostic(code(corral::io))]
    Io(#[from] io::Error),
}

impl CorralError {
    /// The underlying OS error code, when the failure came from the OS.
    #[must_use]
    pub fn os_code(&self) -> Option<i32> {
        match self {
            Self::Creation { source, .. }
            | Self::Bind { source, .. }
            | Self::Policy { source, .. }
            | Self::Teardown { source, .. }
            | Self::Io(source) => source.raw_os_error(),
            _ => None,
        }
    }

    /// Whether the error reports an operation on a dead handle.
    #[must_use]
    pub const fn is_terminated(&self) -> bool {
        matches!(self, Self::AlreadyTerminated { .. })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn error_display_includes_os_cause() {
        let err = CorralError::Creation {
            name: "quota-test".to_string(),
            source: io::Error::from_raw_os_error(17),
        };
        let text = err.to_string();
        assert!(text.starts_with("Failed to create group quota-test: "));
        assert!(text.contains("os error 17"));
    }

    #[test]
    fn os_code_is_exposed() {
        let err = CorralError::Policy {
            group: "g".to_string(),
            setting: "cpu.max".to_string(),
            source: io::Error::from_raw_os_error(22),
        };
        assert_eq!(err.os_code(), Some(22));

        let err = CorralError::AlreadyTerminated {
            group: "g".to_string(),
        };
        assert_eq!(err.os_code(), None);
        assert!(err.is_terminated());
    }

    #[test]
    fn error_from_io() {
        let io_err = io::Error::new(io::ErrorKind::NotFound, "file not found");
        let err: CorralError = io_err.into();
        assert!(matches!(err, CorralError::Io(_)));
    }
}
