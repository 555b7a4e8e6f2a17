//! CLI error type and process exit codes.

use std::fmt;

use bundlepatch::logging::LoggingError;
use bundlepatch::SyncError;

/// Errors surfaced to the user by a command.
#[derive(Debug)]
pub enum CliError {
    /// Bad arguments or configuration.
    Config(String),
    /// Logging could not be set up.
    Logging(LoggingError),
    /// The sync session failed as a whole.
    Sync(SyncError),
    /// The session finished but some bundles did not download.
    Partial { updated: usize, failed: usize },
    /// The user pressed Ctrl+C during a sync.
    Interrupted,
    /// Publishing or cleaning releases failed.
    Publish(SyncError),
    CacheClear(String),
    CacheStats(String),
}

impl CliError {
    /// Process exit code for this error.
    ///
    /// `2` configuration, `3` network, `4` integrity, `5` partial sync,
    /// `130` interrupted, `1` anything else.
    pub fn exit_code(&self) -> u8 {
        match self {
            CliError::Config(_) => 2,
            CliError::Sync(SyncError::Config(_)) => 2,
            CliError::Sync(SyncError::Network(_)) => 3,
            CliError::Sync(SyncError::Integrity { .. }) => 4,
            CliError::Partial { .. } => 5,
            CliError::Interrupted => 130,
            _ => 1,
        }
    }
}

impl fmt::Display for CliError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CliError::Config(msg) => write!(f, "Configuration error: {}", msg),
            CliError::Logging(e) => write!(f, "Logging setup failed: {}", e),
            CliError::Sync(e) => write!(f, "Sync failed: {}", e),
            CliError::Partial { updated, failed } => write!(
                f,
                "{} of {} bundles updated, {} failed; run sync again to retry",
                updated,
                updated + failed,
                failed
            ),
            CliError::Interrupted => write!(f, "Sync interrupted"),
            CliError::Publish(e) => write!(f, "Publish failed: {}", e),
            CliError::CacheClear(msg) => write!(f, "Failed to clear cache: {}", msg),
            CliError::CacheStats(msg) => write!(f, "Failed to read cache statistics: {}", msg),
        }
    }
}

impl std::error::Error for CliError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            CliError::Logging(e) => Some(e),
            CliError::Sync(e) | CliError::Publish(e) => Some(e),
            _ => None,
        }
    }
}

impl From<SyncError> for CliError {
    fn from(e: SyncError) -> Self {
        CliError::Sync(e)
    }
}

impl From<LoggingError> for CliError {
    fn from(e: LoggingError) -> Self {
        CliError::Logging(e)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bundlepatch::transfer::TransferError;

    #[test]
    fn test_exit_codes() {
        assert_eq!(CliError::Config("x".into()).exit_code(), 2);
        assert_eq!(CliError::Sync(SyncError::Config("x".into())).exit_code(), 2);
        assert_eq!(
            CliError::Sync(SyncError::Network(TransferError::Status {
                url: "http://cdn/x".into(),
                status: 404
            }))
            .exit_code(),
            3
        );
        assert_eq!(
            CliError::Partial {
                updated: 1,
                failed: 1
            }
            .exit_code(),
            5
        );
        assert_eq!(CliError::Interrupted.exit_code(), 130);
        assert_eq!(CliError::CacheClear("x".into()).exit_code(), 1);
    }

    #[test]
    fn test_partial_message() {
        let err = CliError::Partial {
            updated: 3,
            failed: 2,
        };
        assert_eq!(
            err.to_string(),
            "3 of 5 bundles updated, 2 failed; run sync again to retry"
        );
    }
}
