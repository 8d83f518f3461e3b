//! Roles and the pending action log.
//!
//! The action log is append-only: entries are replayed in insertion order on commit and the
//! only removal is a bulk `clear`. It performs no deduplication, so granting and then revoking
//! the same role leaves two entries.

use std::fmt::{Display, Formatter};
use std::str::FromStr;
use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::error::AppError;
use crate::logger::{AdminLogger, LogEvent};

/// Rendering of an empty cell in the role matrix.
pub const NULL_ROLE: &str = "-";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Role {
    #[serde(rename = "read")]
    Read,
    #[serde(rename = "readWrite")]
    ReadWrite,
}

impl Role {
    pub const ALL: [Role; 2] = [Role::Read, Role::ReadWrite];

    pub fn as_str(&self) -> &'static str {
        match self {
            Role::Read => "read",
            Role::ReadWrite => "readWrite",
        }
    }
}

impl Display for Role {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result { f.write_str(self.as_str()) }
}

impl FromStr for Role {
    type Err = AppError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "read" => Ok(Role::Read),
            "readWrite" => Ok(Role::ReadWrite),
            other => Err(AppError::validation("invalid_role".to_string(), format!("'{}' is not a role (expected read or readWrite)", other))),
        }
    }
}

/// Render an optional role the way the matrix shows it.
pub fn role_label(role: Option<Role>) -> &'static str {
    role.map_or(NULL_ROLE, |r| r.as_str())
}

#[derive(Clone, PartialEq, Eq)]
pub enum PendingAction {
    AddDatabase(String),
    DeleteDatabase(String),
    AddUser { name: String, password: String },
    DeleteUser(String),
    GrantRole { user: String, database: String, role: Role },
    RevokeRole { user: String, database: String, role: Role },
}

impl PendingAction {
    pub fn kind(&self) -> &'static str {
        match self {
            PendingAction::AddDatabase(_) => "add database",
            PendingAction::DeleteDatabase(_) => "delete database",
            PendingAction::AddUser { .. } => "add user",
            PendingAction::DeleteUser(_) => "delete user",
            PendingAction::GrantRole { .. } => "grant role",
            PendingAction::RevokeRole { .. } => "revoke role",
        }
    }
}

// Passwords never reach a log line.
impl Display for PendingAction {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            PendingAction::AddDatabase(db) => write!(f, "add database {}", db),
            PendingAction::DeleteDatabase(db) => write!(f, "delete database {}", db),
            PendingAction::AddUser { name, .. } => write!(f, "add user {} (password ******)", name),
            PendingAction::DeleteUser(name) => write!(f, "delete user {}", name),
            PendingAction::GrantRole { user, database, role } => write!(f, "grant {} on {} to {}", role, database, user),
            PendingAction::RevokeRole { user, database, role } => write!(f, "revoke {} on {} from {}", role, database, user),
        }
    }
}

impl std::fmt::Debug for PendingAction {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result { write!(f, "PendingAction({})", self) }
}

#[derive(Debug)]
pub struct ActionLog {
    entries: Vec<PendingAction>,
    logger: Arc<AdminLogger>,
}

impl Default for ActionLog {
    fn default() -> Self { Self::new(Arc::new(AdminLogger::new())) }
}

impl ActionLog {
    pub fn new(logger: Arc<AdminLogger>) -> Self { Self { entries: Vec::new(), logger } }

    /// True when nothing is waiting to be committed.
    pub fn is_empty(&self) -> bool { self.entries.is_empty() }
    pub fn len(&self) -> usize { self.entries.len() }
    pub fn iter(&self) -> std::slice::Iter<'_, PendingAction> { self.entries.iter() }
    pub fn as_slice(&self) -> &[PendingAction] { &self.entries }

    pub fn append(&mut self, action: PendingAction) {
        tracing::debug!(target: "mongoadmin::actions", "queued: {}", action);
        self.entries.push(action);
        self.logger.notify(LogEvent::ActionsChanged);
    }

    pub fn clear(&mut self) {
        self.entries.clear();
        self.logger.notify(LogEvent::ActionsCleared);
    }
}

impl<'a> IntoIterator for &'a ActionLog {
    type Item = &'a PendingAction;
    type IntoIter = std::slice::Iter<'a, PendingAction>;
    fn into_iter(self) -> Self::IntoIter { self.entries.iter() }
}

#[cfg(test)]
mod tests {
    use super::*;
    use parking_lot::Mutex;

    #[test]
    fn roles_parse_and_print() {
        assert_eq!("read".parse::<Role>().unwrap(), Role::Read);
        assert_eq!("readWrite".parse::<Role>().unwrap(), Role::ReadWrite);
        assert_eq!("readwrite".parse::<Role>().unwrap_err().code_str(), "invalid_role");
        assert!("dbOwner".parse::<Role>().is_err());
        assert_eq!(Role::ReadWrite.to_string(), "readWrite");
        assert_eq!(role_label(None), "-");
        assert_eq!(role_label(Some(Role::Read)), "read");
    }

    #[test]
    fn add_user_display_hides_password() {
        let a = PendingAction::AddUser { name: "alice".into(), password: "s3cret".into() };
        assert!(!a.to_string().contains("s3cret"));
        assert!(!format!("{:?}", a).contains("s3cret"));
    }

    #[test]
    fn append_keeps_order_without_coalescing() {
        let mut log = ActionLog::default();
        let grant = PendingAction::GrantRole { user: "alice".into(), database: "sales".into(), role: Role::Read };
        let revoke = PendingAction::RevokeRole { user: "alice".into(), database: "sales".into(), role: Role::Read };
        log.append(grant.clone());
        log.append(revoke.clone());
        log.append(grant.clone());
        assert_eq!(log.as_slice(), &[grant.clone(), revoke, grant]);
        log.clear();
        assert!(log.is_empty());
    }

    #[test]
    fn changes_are_announced_to_observers() {
        let logger = Arc::new(AdminLogger::new());
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = seen.clone();
        logger.subscribe(move |ev| sink.lock().push(*ev));
        let mut log = ActionLog::new(logger.clone());
        log.append(PendingAction::AddDatabase("x".into()));
        log.clear();
        assert_eq!(*seen.lock(), vec![LogEvent::ActionsChanged, LogEvent::ActionsCleared]);
        // action changes are not messages
        assert!(logger.is_empty());
    }
}
