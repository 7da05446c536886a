//! VMR Controller - CLI for remote vending machine operation
//!
//! This crate provides a command-line interface for:
//! - Logging in with an operator key and a device key
//! - Sending inventory and maintenance commands over Nostr relays
//! - Watching the inventory snapshots the device pushes back

#![forbid(unsafe_code)]

pub mod cli;
pub mod config;
pub mod credentials;
pub mod output;

#[cfg(test)]
mod proptests;

pub use cli::Cli;
pub use config::{CliOverrides, Config};
pub use output::{OutputFormat, OutputFormatter};

use vmr_core::{SendFailureKind, SessionError};
use vmr_transport::FailureReason;

/// Exit codes for CLI operations
///
/// - 0: Success
/// - 1: General error
/// - 2: Not logged in
/// - 3: Timeout - no relay acknowledged in time
/// - 4: Connection failed - relays unreachable
/// - 5: Invalid input - bad keys or arguments
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(i32)]
pub enum ExitCode {
    Success = 0,
    GeneralError = 1,
    NotLoggedIn = 2,
    Timeout = 3,
    ConnectionFailed = 4,
    InvalidInput = 5,
}

impl From<ExitCode> for i32 {
    fn from(code: ExitCode) -> Self {
        code as i32
    }
}

impl ExitCode {
    /// Convert to process exit code
    pub fn to_exit_code(self) -> std::process::ExitCode {
        std::process::ExitCode::from(self as u8)
    }

    pub fn name(&self) -> &'static str {
        match self {
            ExitCode::Success => "SUCCESS",
            ExitCode::GeneralError => "GENERAL_ERROR",
            ExitCode::NotLoggedIn => "NOT_LOGGED_IN",
            ExitCode::Timeout => "TIMEOUT",
            ExitCode::ConnectionFailed => "CONNECTION_FAILED",
            ExitCode::InvalidInput => "INVALID_INPUT",
        }
    }

    pub fn description(&self) -> &'static str {
        match self {
            ExitCode::Success => "Operation completed successfully",
            ExitCode::GeneralError => "An unspecified error occurred",
            ExitCode::NotLoggedIn => "No stored credentials, run login first",
            ExitCode::Timeout => "No relay acknowledged in time",
            ExitCode::ConnectionFailed => "Could not reach any relay",
            ExitCode::InvalidInput => "Invalid arguments or keys provided",
        }
    }

    /// Exit code for a failed session operation.
    pub fn for_session_error(error: &SessionError) -> Self {
        match error {
            SessionError::NotLoggedIn => ExitCode::NotLoggedIn,
            SessionError::InvalidCredentials(_) => ExitCode::InvalidInput,
            SessionError::Store(_) => ExitCode::GeneralError,
            SessionError::Send(failure) => match failure.kind() {
                SendFailureKind::InvalidKeyEncoding
                | SendFailureKind::InvalidKeyMaterial
                | SendFailureKind::KeyAgreementFailed => ExitCode::InvalidInput,
                SendFailureKind::Publish => {
                    let reasons = failure
                        .publish_failure()
                        .map(|p| p.reasons.as_slice())
                        .unwrap_or_default();
                    if reasons.is_empty() {
                        ExitCode::ConnectionFailed
                    } else if reasons
                        .iter()
                        .all(|(_, r)| matches!(r, FailureReason::Timeout))
                    {
                        ExitCode::Timeout
                    } else if failure.relay_unavailable() {
                        ExitCode::ConnectionFailed
                    } else {
                        ExitCode::GeneralError
                    }
                }
                SendFailureKind::EncryptionFailed
                | SendFailureKind::DecryptionFailed
                | SendFailureKind::SigningFailed
                | SendFailureKind::Encoding => ExitCode::GeneralError,
            },
        }
    }
}

#[cfg(test)]
mod exit_code_tests {
    use super::*;
    use vmr_core::{SendFailure, StoreError};
    use vmr_transport::PublishFailure;

    fn publish_error(reasons: Vec<FailureReason>) -> SessionError {
        SessionError::Send(SendFailure::from(PublishFailure {
            reasons: reasons
                .into_iter()
                .enumerate()
                .map(|(i, r)| (format!("ws://relay{i}"), r))
                .collect(),
        }))
    }

    #[test]
    fn test_exit_code_values() {
        assert_eq!(ExitCode::Success as i32, 0);
        assert_eq!(ExitCode::GeneralError as i32, 1);
        assert_eq!(ExitCode::NotLoggedIn as i32, 2);
        assert_eq!(ExitCode::Timeout as i32, 3);
        assert_eq!(ExitCode::ConnectionFailed as i32, 4);
        assert_eq!(ExitCode::InvalidInput as i32, 5);
        assert_eq!(i32::from(ExitCode::Timeout), 3);
    }

    #[test]
    fn test_exit_code_names() {
        assert_eq!(ExitCode::NotLoggedIn.name(), "NOT_LOGGED_IN");
        assert_eq!(ExitCode::ConnectionFailed.name(), "CONNECTION_FAILED");
        assert!(!ExitCode::InvalidInput.description().is_empty());
    }

    #[test]
    fn test_session_errors_map_to_exit_codes() {
        assert_eq!(
            ExitCode::for_session_error(&SessionError::NotLoggedIn),
            ExitCode::NotLoggedIn
        );
        assert_eq!(
            ExitCode::for_session_error(&SessionError::InvalidCredentials("x".into())),
            ExitCode::InvalidInput
        );
        assert_eq!(
            ExitCode::for_session_error(&SessionError::Store(StoreError::OperationFailed(
                "disk".into()
            ))),
            ExitCode::GeneralError
        );
    }

    #[test]
    fn test_publish_failures_map_to_exit_codes() {
        assert_eq!(
            ExitCode::for_session_error(&publish_error(vec![
                FailureReason::Timeout,
                FailureReason::Timeout
            ])),
            ExitCode::Timeout
        );
        assert_eq!(
            ExitCode::for_session_error(&publish_error(vec![
                FailureReason::Timeout,
                FailureReason::Connection("refused".into())
            ])),
            ExitCode::ConnectionFailed
        );
        assert_eq!(
            ExitCode::for_session_error(&publish_error(vec![FailureReason::Rejected(
                "blocked".into()
            )])),
            ExitCode::GeneralError
        );
        assert_eq!(
            ExitCode::for_session_error(&publish_error(vec![])),
            ExitCode::ConnectionFailed
        );
    }
}
