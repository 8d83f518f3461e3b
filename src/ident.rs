//! Identifier rules for server-side names
//! --------------------------------------
//! Single source of truth for reserved database names, the qualified form of user ids
//! stored in `admin.system.users`, and the name checks applied before anything is staged.

use once_cell::sync::Lazy;
use regex::Regex;

use crate::error::{AppError, AppResult};

pub const ADMIN_DB: &str = "admin";
pub const USERS_COLLECTION: &str = "system.users";
pub const SYSTEM_DATABASES: [&str; 3] = ["admin", "config", "local"];

// Characters the server refuses in database names.
static DATABASE_FORBIDDEN: Lazy<Regex> = Lazy::new(|| Regex::new(r#"[/\\."$*<>:|?]"#).expect("literal pattern"));

pub fn is_system_database(name: &str) -> bool {
    SYSTEM_DATABASES.iter().any(|s| s.eq_ignore_ascii_case(name))
}

/// `alice` -> `admin.alice`
pub fn qualify_user(name: &str) -> String {
    format!("{}.{}", ADMIN_DB, name)
}

/// Strip the administrative prefix from a stored user id; ids of other databases yield `None`.
pub fn unqualify_user(id: &str) -> Option<&str> {
    id.strip_prefix(ADMIN_DB)
        .and_then(|rest| rest.strip_prefix('.'))
        .filter(|name| !name.is_empty())
}

/// Basic entity name check: non-empty and free of whitespace.
pub fn validate_name(kind: &str, name: &str) -> AppResult<()> {
    if name.is_empty() {
        return Err(AppError::validation("empty_name".to_string(), format!("{} name must not be empty", kind)));
    }
    if name.chars().any(char::is_whitespace) {
        return Err(AppError::validation("invalid_name".to_string(), format!("{} name '{}' must not contain spaces", kind, name)));
    }
    Ok(())
}

pub fn validate_database_name(name: &str) -> AppResult<()> {
    validate_name("database", name)?;
    if DATABASE_FORBIDDEN.is_match(name) {
        return Err(AppError::validation("invalid_name".to_string(), format!("database name '{}' contains a reserved character", name)));
    }
    Ok(())
}

pub fn validate_collection_name(name: &str) -> AppResult<()> {
    validate_name("collection", name)?;
    if name.contains('$') || name.starts_with("system.") {
        return Err(AppError::validation("invalid_name".to_string(), format!("collection name '{}' is reserved", name)));
    }
    Ok(())
}
