//! Local username rules.

pub const MIN_USERNAME_CHARS: usize = 3;
pub const MAX_USERNAME_CHARS: usize = 20;

const ACCENTED: &str = "áéíóúÁÉÍÓÚñÑ";

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum UsernameError {
    #[error("username must be between 3 and 20 characters")]
    Length,
    #[error("username may only contain letters, numbers, spaces, hyphens and underscores (found {0:?})")]
    InvalidCharacter(char),
}

/// Validate a candidate username and return it trimmed.
///
/// # Errors
///
/// Returns [`UsernameError::Length`] when the trimmed name is outside
/// 3..=20 characters and [`UsernameError::InvalidCharacter`] for the first
/// disallowed character.
pub fn validate_username(raw: &str) -> Result<String, UsernameError> {
    let trimmed = raw.trim();
    let len = trimmed.chars().count();
    if !(MIN_USERNAME_CHARS..=MAX_USERNAME_CHARS).contains(&len) {
        return Err(UsernameError::Length);
    }
    if let Some(bad) = trimmed.chars().find(|c| !is_allowed(*c)) {
        return Err(UsernameError::InvalidCharacter(bad));
    }
    Ok(trimmed.to_owned())
}

/// Placeholder name offered before the user picks one: `User_` plus the last
/// six digits of the epoch-ms clock.
#[must_use]
pub fn default_username(now_ms: i64) -> String {
    format!("User_{:06}", now_ms.rem_euclid(1_000_000))
}

fn is_allowed(c: char) -> bool {
    c.is_ascii_alphanumeric() || c == '_' || c == '-' || c.is_whitespace() || ACCENTED.contains(c)
}

#[cfg(test)]
#[path = "username_test.rs"]
mod tests;
