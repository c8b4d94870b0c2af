//! Validation helpers for DTOs.

use validator::ValidationError;

/// Longest accepted session key (username or visitor id).
pub const MAX_SESSION_ID_LEN: usize = 64;

/// Validates that a session id is non-empty, at most [`MAX_SESSION_ID_LEN`] characters and
/// free of whitespace or control characters.
///
/// # Examples
///
/// ```ignore
/// validate_session_id("alice")                        // Ok
/// validate_session_id("visitor_1717171717171_k3j9x2m1q") // Ok
/// validate_session_id("")                             // Err - empty
/// validate_session_id("bad id")                       // Err - whitespace
/// ```
pub fn validate_session_id(id: &str) -> Result<(), ValidationError> {
    let len = id.chars().count();
    if len == 0 || len > MAX_SESSION_ID_LEN {
        let mut err = ValidationError::new("session_id_length");
        err.message = Some(
            format!("Session ID must be 1 to {MAX_SESSION_ID_LEN} characters (got {len})").into(),
        );
        return Err(err);
    }

    if id.chars().any(|c| c.is_whitespace() || c.is_control()) {
        let mut err = ValidationError::new("session_id_format");
        err.message = Some("Session ID must not contain whitespace or control characters".into());
        return Err(err);
    }

    Ok(())
}
