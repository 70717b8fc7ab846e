//! Item key and map field validation.

use crate::error::{Error, Result};

/// Longest key or map field the protocol accepts.
pub const MAX_KEY_LENGTH: usize = 250;

/// Check that `key` can be sent as an item key.
pub fn validate_key(key: &str) -> Result<()> {
    check_token(key).map_err(|reason| Error::InvalidKey(format!("{:?}: {}", key, reason)))
}

/// Check that `field` can be sent as a map field.
pub fn validate_field(field: &str) -> Result<()> {
    check_token(field)
        .map_err(|reason| Error::InvalidKey(format!("map field {:?}: {}", field, reason)))
}

fn check_token(token: &str) -> std::result::Result<(), String> {
    if token.is_empty() {
        return Err("empty".to_string());
    }
    if token.len() > MAX_KEY_LENGTH {
        return Err(format!("{} bytes exceeds {}", token.len(), MAX_KEY_LENGTH));
    }
    if let Some(c) = token.chars().find(|c| c.is_whitespace() || c.is_control()) {
        return Err(format!("contains {:?}", c));
    }
    Ok(())
}
