//! Staged admin model
//! ------------------
//! In-memory mirror of the server's users, databases and role grants. Edits change the mirror
//! right away and queue a [`PendingAction`]; nothing reaches the server until [`commit`]
//! replays the queue in order. [`discard`] drops the queue and reloads the mirror.
//!
//! Session states: `Uninitialized --sync--> Clean --edit--> Dirty --commit|discard--> Clean`.
//!
//! [`commit`]: StagedAdminModel::commit
//! [`discard`]: StagedAdminModel::discard

pub mod matrix;

use std::sync::Arc;

use tracing::{debug, info, warn};

use crate::actions::{ActionLog, PendingAction, Role};
use crate::error::{AppError, AppResult};
use crate::gateway::AdminGateway;
use crate::ident;
use crate::logger::AdminLogger;
use crate::report::RoleTable;

pub use matrix::RoleMatrix;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Uninitialized,
    Clean,
    Dirty,
}

/// Outcome of a commit: how many actions the server accepted, and which ones the gateway
/// turned down on a precondition.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CommitReport {
    pub applied: usize,
    pub rejected: Vec<PendingAction>,
}

pub struct StagedAdminModel<G: AdminGateway> {
    gateway: G,
    logger: Arc<AdminLogger>,
    matrix: RoleMatrix,
    actions: ActionLog,
    state: SessionState,
}

impl<G: AdminGateway> StagedAdminModel<G> {
    pub fn new(gateway: G, logger: Arc<AdminLogger>) -> Self {
        Self { gateway, actions: ActionLog::new(logger.clone()), logger, matrix: RoleMatrix::default(), state: SessionState::Uninitialized }
    }

    pub fn gateway(&self) -> &G { &self.gateway }
    pub fn gateway_mut(&mut self) -> &mut G { &mut self.gateway }
    pub fn logger(&self) -> &Arc<AdminLogger> { &self.logger }
    pub fn state(&self) -> SessionState { self.state }
    pub fn matrix(&self) -> &RoleMatrix { &self.matrix }
    pub fn users(&self) -> &[String] { self.matrix.users() }
    pub fn databases(&self) -> &[String] { self.matrix.databases() }
    pub fn role(&self, user: &str, db: &str) -> Option<Role> { self.matrix.role(user, db) }
    pub fn pending(&self) -> &ActionLog { &self.actions }

    /// True when no edits are waiting to be committed.
    pub fn is_saved(&self) -> bool { self.actions.is_empty() }

    /// Pull users, databases and grants from the server. Refused while edits are pending.
    pub fn sync(&mut self) -> AppResult<()> {
        if self.state == SessionState::Dirty {
            return self.reject(AppError::validation(
                "unsaved_changes".to_string(),
                format!("{} pending change(s); commit or discard them before synchronizing", self.actions.len()),
            ));
        }
        self.resync()
    }

    fn load(&self) -> AppResult<RoleMatrix> {
        let admin = self.gateway.admin_user().to_string();
        let databases = self.gateway.list_databases()?;
        let table: Vec<_> = self.gateway.roles_table()?.into_iter().filter(|u| u.user != admin).collect();
        let mut matrix = RoleMatrix::new(table.iter().map(|u| u.user.clone()).collect(), databases);
        for entry in &table {
            for a in &entry.assignments {
                if !matrix.contains_database(&a.database) {
                    continue;
                }
                match a.managed() {
                    Some(role) => {
                        // one grant per cell; a second managed role on the same database wins
                        if matrix.role(&entry.user, &a.database).is_some() {
                            warn!(target: "mongoadmin::model", "{} holds several roles on {}", entry.user, a.database);
                        }
                        matrix.set_role(&entry.user, &a.database, Some(role));
                    }
                    None => {
                        warn!(target: "mongoadmin::model", "{} holds unmanaged role {} on {}", entry.user, a.role, a.database);
                        self.logger.info(format!("'{}' holds role '{}' on '{}', which is not managed here", entry.user, a.role, a.database));
                    }
                }
            }
        }
        Ok(matrix)
    }

    fn resync(&mut self) -> AppResult<()> {
        match self.load() {
            Ok(matrix) => {
                info!(target: "mongoadmin::model", "synchronized: {} user(s), {} database(s)", matrix.users().len(), matrix.databases().len());
                self.matrix = matrix;
                self.state = SessionState::Clean;
                Ok(())
            }
            Err(e) => {
                self.state = SessionState::Uninitialized;
                Err(e)
            }
        }
    }

    fn reject(&self, err: AppError) -> AppResult<()> {
        self.logger.error(err.message());
        Err(err)
    }

    fn stage(&mut self, action: PendingAction) {
        self.actions.append(action);
        self.state = SessionState::Dirty;
    }

    fn ensure_synced(&self) -> AppResult<()> {
        if self.state == SessionState::Uninitialized {
            return Err(AppError::validation("not_synchronized".to_string(), "synchronize with the server before editing".to_string()));
        }
        Ok(())
    }

    fn check_user(&self, user: &str) -> AppResult<()> {
        ident::validate_name("user", user)?;
        if !self.matrix.contains_user(user) {
            return Err(AppError::not_found("user_not_found".to_string(), format!("user '{}' does not exist", user)));
        }
        Ok(())
    }

    fn check_database(&self, db: &str) -> AppResult<()> {
        ident::validate_name("database", db)?;
        if !self.matrix.contains_database(db) {
            return Err(AppError::not_found("database_not_found".to_string(), format!("database '{}' does not exist", db)));
        }
        Ok(())
    }

    // ---- edits ----

    pub fn add_database(&mut self, name: &str) -> AppResult<()> {
        let check = self.ensure_synced().and_then(|_| ident::validate_database_name(name)).and_then(|_| {
            if ident::is_system_database(name) {
                Err(AppError::validation("reserved_database".to_string(), format!("'{}' is a system database", name)))
            } else if self.matrix.contains_database(name) {
                Err(AppError::validation("database_exists".to_string(), format!("database '{}' already exists", name)))
            } else {
                Ok(())
            }
        });
        if let Err(e) = check { return self.reject(e); }
        self.matrix.push_database(name);
        self.stage(PendingAction::AddDatabase(name.to_string()));
        Ok(())
    }

    /// Queues a revoke for every grant on the database, then the deletion itself.
    pub fn delete_database(&mut self, name: &str) -> AppResult<()> {
        if let Err(e) = self.ensure_synced().and_then(|_| self.check_database(name)) { return self.reject(e); }
        for (user, role) in self.matrix.column_grants(name) {
            self.stage(PendingAction::RevokeRole { user, database: name.to_string(), role });
        }
        self.matrix.remove_database(name);
        self.stage(PendingAction::DeleteDatabase(name.to_string()));
        Ok(())
    }

    pub fn add_user(&mut self, name: &str, password: &str) -> AppResult<()> {
        let check = self.ensure_synced().and_then(|_| ident::validate_name("user", name)).and_then(|_| {
            if self.matrix.contains_user(name) || name == self.gateway.admin_user() {
                Err(AppError::validation("user_exists".to_string(), format!("user '{}' already exists", name)))
            } else if password.is_empty() {
                Err(AppError::validation("empty_password".to_string(), format!("user '{}' needs a password", name)))
            } else {
                Ok(())
            }
        });
        if let Err(e) = check { return self.reject(e); }
        self.matrix.push_user(name);
        self.stage(PendingAction::AddUser { name: name.to_string(), password: password.to_string() });
        Ok(())
    }

    pub fn delete_user(&mut self, name: &str) -> AppResult<()> {
        if let Err(e) = self.ensure_synced().and_then(|_| self.check_user(name)) { return self.reject(e); }
        self.matrix.remove_user(name);
        self.stage(PendingAction::DeleteUser(name.to_string()));
        Ok(())
    }

    /// Grant `role`; an existing grant on the cell is revoked first.
    pub fn grant_role_to_user(&mut self, user: &str, db: &str, role: Role) -> AppResult<()> {
        if let Err(e) = self.ensure_synced().and_then(|_| self.check_user(user)).and_then(|_| self.check_database(db)) {
            return self.reject(e);
        }
        if let Some(old) = self.matrix.role(user, db) {
            self.stage(PendingAction::RevokeRole { user: user.to_string(), database: db.to_string(), role: old });
        }
        self.matrix.set_role(user, db, Some(role));
        self.stage(PendingAction::GrantRole { user: user.to_string(), database: db.to_string(), role });
        Ok(())
    }

    /// Revoke `role`; only valid when the cell currently holds exactly that role.
    pub fn revoke_role_from_user(&mut self, user: &str, db: &str, role: Role) -> AppResult<()> {
        let check = self.ensure_synced().and_then(|_| self.check_user(user)).and_then(|_| self.check_database(db)).and_then(|_| {
            match self.matrix.role(user, db) {
                None => Err(AppError::validation("no_role".to_string(), format!("'{}' has no role on '{}'", user, db))),
                Some(current) if current != role => Err(AppError::validation(
                    "role_mismatch".to_string(),
                    format!("'{}' holds {} on '{}', not {}", user, current, db, role),
                )),
                Some(_) => Ok(()),
            }
        });
        if let Err(e) = check { return self.reject(e); }
        self.matrix.set_role(user, db, None);
        self.stage(PendingAction::RevokeRole { user: user.to_string(), database: db.to_string(), role });
        Ok(())
    }

    /// Same as [`grant_role_to_user`](Self::grant_role_to_user) with the role given by name.
    pub fn grant_role_named(&mut self, user: &str, db: &str, role: &str) -> AppResult<()> {
        match role.parse::<Role>() {
            Ok(r) => self.grant_role_to_user(user, db, r),
            Err(e) => self.reject(e),
        }
    }

    pub fn revoke_role_named(&mut self, user: &str, db: &str, role: &str) -> AppResult<()> {
        match role.parse::<Role>() {
            Ok(r) => self.revoke_role_from_user(user, db, r),
            Err(e) => self.reject(e),
        }
    }

    /// Stage the edit an action describes, through the matching edit operation.
    pub fn edit(&mut self, action: &PendingAction) -> AppResult<()> {
        match action {
            PendingAction::AddDatabase(db) => self.add_database(db),
            PendingAction::DeleteDatabase(db) => self.delete_database(db),
            PendingAction::AddUser { name, password } => self.add_user(name, password),
            PendingAction::DeleteUser(name) => self.delete_user(name),
            PendingAction::GrantRole { user, database, role } => self.grant_role_to_user(user, database, *role),
            PendingAction::RevokeRole { user, database, role } => self.revoke_role_from_user(user, database, *role),
        }
    }

    // ---- reconciliation ----

    /// Replay the queue against the server in order, then reload the mirror.
    ///
    /// Actions the gateway turns down on a precondition are reported and skipped. A server
    /// error stops the replay; the queue is dropped, the mirror reloaded, and the error returned.
    pub fn commit(&mut self) -> AppResult<CommitReport> {
        self.ensure_synced().or_else(|e| self.reject(e))?;
        let mut report = CommitReport::default();
        if self.actions.is_empty() {
            return Ok(report);
        }
        let queued: Vec<PendingAction> = self.actions.iter().cloned().collect();
        for action in &queued {
            debug!(target: "mongoadmin::model", "replaying {}", action);
            match self.gateway.apply(action) {
                Ok(()) => report.applied += 1,
                Err(e) if e.is_server() => {
                    warn!(target: "mongoadmin::model", "commit stopped after {} action(s): {}", report.applied, e);
                    self.actions.clear();
                    // reload whatever the server holds after the partial replay
                    if let Err(again) = self.resync() {
                        warn!(target: "mongoadmin::model", "resync after failed commit also failed: {}", again);
                    }
                    return Err(e);
                }
                Err(_) => report.rejected.push(action.clone()),
            }
        }
        self.actions.clear();
        self.resync()?;
        self.logger.info(format!("committed {} change(s), {} rejected", report.applied, report.rejected.len()));
        Ok(report)
    }

    /// Drop the queue and reload the mirror from the server.
    pub fn discard(&mut self) -> AppResult<()> {
        self.ensure_synced().or_else(|e| self.reject(e))?;
        let dropped = self.actions.len();
        self.actions.clear();
        self.resync()?;
        if dropped > 0 {
            self.logger.info(format!("discarded {} pending change(s)", dropped));
        }
        Ok(())
    }
}

impl<G: AdminGateway> RoleTable for StagedAdminModel<G> {
    fn column_headers(&self) -> &[String] { self.matrix.databases() }
    fn row_headers(&self) -> &[String] { self.matrix.users() }
    fn cell(&self, row: usize, col: usize) -> Option<Role> { self.matrix.cell(row, col) }
}
