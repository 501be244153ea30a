//! Process exit codes
//!
//! Stable exit codes so scripts can tell usage mistakes from transport
//! failures, and `diff` can signal "trees differ" without it being an error.

use dm_core::Error;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum ExitCode {
    Success = 0,
    GeneralError = 1,
    UsageError = 2,
    NotFound = 3,
    NetworkError = 4,
    /// `diff` found differences. Not a failure.
    Differences = 5,
}

impl ExitCode {
    /// Map an error to the exit code its class deserves.
    pub fn from_error(error: &Error) -> Self {
        match error {
            Error::UnsupportedScheme(_)
            | Error::InvalidUrl(_)
            | Error::AliasNotFound(_)
            | Error::InvalidSessionId(_)
            | Error::SessionDirMissing(_) => ExitCode::UsageError,
            Error::NotFound(_) | Error::NoMatchingHost(_) => ExitCode::NotFound,
            Error::Dns(_)
            | Error::Network { .. }
            | Error::TransferFailed { .. }
            | Error::ClientInit { .. } => ExitCode::NetworkError,
            Error::Context { source, .. } => Self::from_error(source),
            _ => ExitCode::GeneralError,
        }
    }
}

impl From<ExitCode> for std::process::ExitCode {
    fn from(code: ExitCode) -> Self {
        std::process::ExitCode::from(code as u8)
    }
}
