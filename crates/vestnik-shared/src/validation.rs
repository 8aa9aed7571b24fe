//! Input rules shared by client-side pre-checks and the server.

use crate::constants::{MIN_HANDLE_LEN, MIN_PASSWORD_LEN};
use crate::error::ApplicationError;

/// Normalised registration input.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Registration {
    pub handle: String,
    pub display_name: String,
    pub password: String,
}

/// Handles are case-insensitive; the canonical form is trimmed and lower-cased.
pub fn normalize_handle(handle: &str) -> String {
    handle.trim().to_lowercase()
}

pub fn validate_registration(
    handle: &str,
    display_name: &str,
    password: &str,
) -> Result<Registration, ApplicationError> {
    let handle = normalize_handle(handle);
    let display_name = display_name.trim().to_string();

    if handle.is_empty() || display_name.is_empty() || password.is_empty() {
        return Err(ApplicationError::new("All fields are required"));
    }
    if handle.chars().count() < MIN_HANDLE_LEN {
        return Err(ApplicationError::new(format!(
            "Handle must be at least {MIN_HANDLE_LEN} characters"
        )));
    }
    if password.chars().count() < MIN_PASSWORD_LEN {
        return Err(ApplicationError::new(format!(
            "Password must be at least {MIN_PASSWORD_LEN} characters"
        )));
    }

    Ok(Registration {
        handle,
        display_name,
        password: password.to_string(),
    })
}

/// Trimmed message text; empty text is rejected.
pub fn validate_message_text(text: &str) -> Result<String, ApplicationError> {
    let text = text.trim();
    if text.is_empty() {
        return Err(ApplicationError::new("Message text must not be empty"));
    }
    Ok(text.to_string())
}

/// Trimmed group name; empty names are rejected.
pub fn validate_group_name(name: &str) -> Result<String, ApplicationError> {
    let name = name.trim();
    if name.is_empty() {
        return Err(ApplicationError::new("Group name is required"));
    }
    Ok(name.to_string())
}

/// Search queries accept an optional leading `@` ("@alice").
pub fn normalize_search_query(query: &str) -> String {
    query.trim().trim_start_matches('@').trim().to_lowercase()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_registration_normalises_handle() {
        let reg = validate_registration("  Alice ", " Alice L ", "secret").unwrap();
        assert_eq!(reg.handle, "alice");
        assert_eq!(reg.display_name, "Alice L");
    }

    #[test]
    fn test_registration_rejects_short_values() {
        assert!(validate_registration("al", "Al", "secret").is_err());
        assert!(validate_registration("alice", "Alice", "abc").is_err());
        assert!(validate_registration("alice", "   ", "secret").is_err());
    }

    #[test]
    fn test_message_text() {
        assert_eq!(validate_message_text("  hi  ").unwrap(), "hi");
        assert!(validate_message_text(" \n ").is_err());
    }

    #[test]
    fn test_search_query() {
        assert_eq!(normalize_search_query(" @Alice "), "alice");
        assert_eq!(normalize_search_query("@"), "");
        assert_eq!(normalize_search_query(""), "");
    }

    #[test]
    fn test_group_name() {
        assert_eq!(validate_group_name(" Ops ").unwrap(), "Ops");
        assert!(validate_group_name("").is_err());
    }
}
