//! Validation helpers for DTOs.

use validator::ValidationError;

/// Validates that a room code only contains ASCII letters and digits.
///
/// Case is not checked here: codes are upper-cased before lookup.
pub fn validate_room_code(code: &str) -> Result<(), ValidationError> {
    if code.is_empty() || !code.chars().all(|c| c.is_ascii_alphanumeric()) {
        let mut err = ValidationError::new("room_code_format");
        err.message = Some("Room code must contain only letters and digits".into());
        return Err(err);
    }
    Ok(())
}

/// Validates that a display name is not only whitespace.
pub fn validate_player_name(name: &str) -> Result<(), ValidationError> {
    if name.trim().is_empty() {
        let mut err = ValidationError::new("player_name_blank");
        err.message = Some("Player name must not be blank".into());
        return Err(err);
    }
    Ok(())
}
