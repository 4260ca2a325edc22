//! Transient versus permanent failure classification.

use super::RetryPolicy;
use std::fmt;
use std::io;

/// Message fragments that mark an error as transient, matched
/// case-insensitively.
const TRANSIENT_MESSAGE_PATTERNS: [&str; 12] = [
    "connection refused",
    "connection reset",
    "timeout",
    "timed out",
    "network unreachable",
    "host unreachable",
    "service unavailable",
    "temporarily unavailable",
    "socket hang up",
    "econnrefused",
    "econnreset",
    "etimedout",
];

/// An error that can be classified by the backoff engine.
///
/// Implementors expose an optional machine-readable code (for example
/// `ECONNREFUSED`); the [`fmt::Display`] output is used for message
/// pattern matching.
pub trait RetryableError: fmt::Display {
    /// Returns the error code, if the error carries one.
    fn error_code(&self) -> Option<&str> {
        None
    }
}

impl RetryableError for io::Error {
    fn error_code(&self) -> Option<&str> {
        match self.kind() {
            io::ErrorKind::ConnectionRefused => Some("ECONNREFUSED"),
            io::ErrorKind::ConnectionReset => Some("ECONNRESET"),
            io::ErrorKind::ConnectionAborted => Some("ECONNABORTED"),
            io::ErrorKind::TimedOut => Some("ETIMEDOUT"),
            io::ErrorKind::BrokenPipe => Some("EPIPE"),
            io::ErrorKind::NotConnected => Some("ENOTCONN"),
            io::ErrorKind::HostUnreachable => Some("EHOSTUNREACH"),
            io::ErrorKind::NetworkUnreachable => Some("ENETUNREACH"),
            _ => None,
        }
    }
}

/// Returns whether `error` is likely to succeed if retried.
///
/// An error is transient when its code is listed in the policy's transient
/// codes or its message contains one of the known transient fragments.
/// Everything else is permanent.
#[must_use]
pub fn is_transient_error<E>(error: &E, policy: &RetryPolicy) -> bool
where
    E: RetryableError + ?Sized,
{
    let code_matches = error.error_code().is_some_and(|code| {
        policy
            .transient_error_codes()
            .iter()
            .any(|transient| transient.eq_ignore_ascii_case(code.trim()))
    });
    if code_matches {
        return true;
    }

    let message = error.to_string().to_ascii_lowercase();
    TRANSIENT_MESSAGE_PATTERNS
        .iter()
        .any(|pattern| message.contains(pattern))
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    struct CodedError {
        code: Option<&'static str>,
        message: &'static str,
    }

    impl fmt::Display for CodedError {
        fn fmt(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
            formatter.write_str(self.message)
        }
    }

    impl RetryableError for CodedError {
        fn error_code(&self) -> Option<&str> {
            self.code
        }
    }

    #[test]
    fn connection_refused_code_is_transient() {
        let error = CodedError {
            code: Some("ECONNREFUSED"),
            message: "connect failed",
        };

        assert!(is_transient_error(&error, &RetryPolicy::default()));
    }

    #[test]
    fn invalid_credentials_is_permanent() {
        let error = CodedError {
            code: None,
            message: "Invalid credentials",
        };

        assert!(!is_transient_error(&error, &RetryPolicy::default()));
    }

    #[rstest]
    #[case("Connection refused by peer")]
    #[case("request TIMEOUT after 30s")]
    #[case("Service Unavailable")]
    #[case("network unreachable")]
    #[case("socket hang up")]
    fn known_messages_are_transient(#[case] message: &'static str) {
        let error = CodedError {
            code: None,
            message,
        };

        assert!(is_transient_error(&error, &RetryPolicy::default()));
    }

    #[test]
    fn code_outside_policy_falls_back_to_message() {
        let policy = RetryPolicy::default().with_transient_error_codes(["EPIPE"]);
        let error = CodedError {
            code: Some("ECONNREFUSED"),
            message: "spawn failed",
        };

        assert!(!is_transient_error(&error, &policy));
    }

    #[rstest]
    #[case(io::ErrorKind::ConnectionRefused, true)]
    #[case(io::ErrorKind::TimedOut, true)]
    #[case(io::ErrorKind::PermissionDenied, false)]
    fn io_errors_map_kinds_to_codes(#[case] kind: io::ErrorKind, #[case] expected: bool) {
        let error = io::Error::new(kind, "tool server");

        assert_eq!(is_transient_error(&error, &RetryPolicy::default()), expected);
    }
}
