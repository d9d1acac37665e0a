use clsession::SessionError;

use crate::commands::VerificationFailure;

// Exit codes for scripted use
pub const EXIT_SUCCESS: i32 = 0;
pub const EXIT_FATAL: i32 = 1;
pub const EXIT_BUILD_FAILED: i32 = 2;
pub const EXIT_VERIFY_FAILED: i32 = 3;

/// Exit code for an error that reached `main`.
pub fn code_for(err: &anyhow::Error) -> i32 {
    if err.downcast_ref::<VerificationFailure>().is_some() {
        return EXIT_VERIFY_FAILED;
    }
    match err.downcast_ref::<SessionError>() {
        Some(SessionError::Build(_)) => EXIT_BUILD_FAILED,
        _ => EXIT_FATAL,
    }
}
