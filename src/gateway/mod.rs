//! Connection gateway
//! ------------------
//! One live connection to a server plus the database, collection, document, user and role
//! operations the administration tool needs. The gateway owns precondition checks and the
//! operator log: every failure is logged exactly once, here, and returned as a typed error.
//! The raw server work is delegated to a [`Backend`]: [`mongo::MongoBackend`] for a real
//! server, [`memory::MemoryBackend`] for tests and dry runs.

pub mod backend;
pub mod commands;
pub mod memory;
pub mod mongo;

use std::path::{Path, PathBuf};
use std::sync::Arc;

use bson::Bson;
use serde_json::{Map, Value};
use tracing::debug;

use crate::actions::{PendingAction, Role};
use crate::document::{id_filter, id_filters, id_to_string, Document};
use crate::error::{AppError, AppResult};
use crate::ident::{self, ADMIN_DB, USERS_COLLECTION};
use crate::logger::AdminLogger;

pub use backend::Backend;

/// Documents whose serialized size exceeds this go through GridFS.
pub const MAX_INLINE_DOCUMENT_BYTES: usize = 16_000_000 - 1;
pub const GRIDFS_FILES: &str = "fs.files";
pub const GRIDFS_CHUNKS: &str = "fs.chunks";
/// Field of the marker document that materializes a freshly added database.
pub const MARKER_FIELD: &str = "parent_database";

pub fn marker_collection(db: &str) -> String { format!("{}_collection", db) }

/// One `{role, db}` entry of a user's server-side role list.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RoleAssignment {
    pub database: String,
    pub role: String,
}

impl RoleAssignment {
    pub fn new(database: impl Into<String>, role: impl Into<String>) -> Self { Self { database: database.into(), role: role.into() } }

    /// The role when it is one the tool manages.
    pub fn managed(&self) -> Option<Role> { self.role.parse().ok() }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UserRoles {
    pub user: String,
    pub assignments: Vec<RoleAssignment>,
}

/// The administrative surface the staged model replays its actions against.
pub trait AdminGateway {
    /// Account the session is logged in as.
    fn admin_user(&self) -> &str;
    /// Non-system database names.
    fn list_databases(&self) -> AppResult<Vec<String>>;
    /// Every user of the administrative database with its role list, in server order.
    fn roles_table(&self) -> AppResult<Vec<UserRoles>>;

    fn add_database(&mut self, name: &str) -> AppResult<()>;
    fn delete_database(&mut self, name: &str) -> AppResult<()>;
    fn add_user(&mut self, name: &str, password: &str) -> AppResult<()>;
    fn delete_user(&mut self, name: &str) -> AppResult<()>;
    fn grant_role(&mut self, user: &str, db: &str, role: Role) -> AppResult<()>;
    fn revoke_role(&mut self, user: &str, db: &str, role: Role) -> AppResult<()>;

    fn apply(&mut self, action: &PendingAction) -> AppResult<()> {
        match action {
            PendingAction::AddDatabase(db) => self.add_database(db),
            PendingAction::DeleteDatabase(db) => self.delete_database(db),
            PendingAction::AddUser { name, password } => self.add_user(name, password),
            PendingAction::DeleteUser(name) => self.delete_user(name),
            PendingAction::GrantRole { user, database, role } => self.grant_role(user, database, *role),
            PendingAction::RevokeRole { user, database, role } => self.revoke_role(user, database, *role),
        }
    }
}

pub struct ConnectionGateway<B: Backend> {
    backend: B,
    admin_user: String,
    database: String,
    collection: Option<String>,
    inline_limit: usize,
    logger: Arc<AdminLogger>,
}

impl<B: Backend> std::fmt::Debug for ConnectionGateway<B> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConnectionGateway")
            .field("admin_user", &self.admin_user)
            .field("database", &self.database)
            .field("collection", &self.collection)
            .finish()
    }
}

impl<B: Backend> ConnectionGateway<B> {
    /// Bind to `database` as `admin_user`, proving the connection with a ping.
    pub fn open(backend: B, admin_user: impl Into<String>, database: impl Into<String>, logger: Arc<AdminLogger>) -> AppResult<Self> {
        let admin_user = admin_user.into();
        let database = database.into();
        if let Err(e) = backend.ping(&database) {
            logger.error(format!("cannot connect to '{}': {}", database, e.message()));
            return Err(e);
        }
        logger.info(format!("connected to '{}' as '{}'", database, admin_user));
        Ok(Self { backend, admin_user, database, collection: None, inline_limit: MAX_INLINE_DOCUMENT_BYTES, logger })
    }

    pub fn backend(&self) -> &B { &self.backend }
    pub fn logger(&self) -> &Arc<AdminLogger> { &self.logger }
    pub fn current_database(&self) -> &str { &self.database }
    pub fn current_collection(&self) -> Option<&str> { self.collection.as_deref() }
    pub fn inline_limit(&self) -> usize { self.inline_limit }
    pub fn set_inline_limit(&mut self, bytes: usize) { self.inline_limit = bytes; }

    fn checked<T>(&self, r: AppResult<T>) -> AppResult<T> {
        if let Err(e) = &r { self.logger.error(e.message()); }
        r
    }

    fn reported<T>(&self, r: AppResult<T>, ok: impl FnOnce(&T) -> String) -> AppResult<T> {
        match &r {
            Ok(v) => self.logger.info(ok(v)),
            Err(e) => self.logger.error(e.message()),
        }
        r
    }

    // ---- binding ----

    pub fn connect_to_database(&mut self, name: &str) -> AppResult<()> {
        let r = ident::validate_database_name(name).and_then(|_| self.backend.ping(name));
        let r = self.reported(r, |_| format!("using database '{}'", name));
        if r.is_ok() {
            self.database = name.to_string();
            self.collection = None;
        }
        r
    }

    pub fn connect_to_collection(&mut self, db: &str, coll: &str) -> AppResult<()> {
        let r = ident::validate_database_name(db)
            .and_then(|_| ident::validate_name("collection", coll))
            .and_then(|_| self.backend.ping(db));
        let r = self.reported(r, |_| format!("using collection '{}.{}'", db, coll));
        if r.is_ok() {
            self.database = db.to_string();
            self.collection = Some(coll.to_string());
        }
        r
    }

    // ---- listings ----

    fn databases(&self) -> AppResult<Vec<String>> {
        Ok(self.backend.database_names()?.into_iter().filter(|d| !ident::is_system_database(d)).collect())
    }

    fn users(&self) -> AppResult<Vec<String>> {
        let docs = self.backend.find_all(ADMIN_DB, USERS_COLLECTION)?;
        Ok(docs
            .iter()
            .filter_map(|d| d.get_str("_id").ok())
            .filter_map(ident::unqualify_user)
            .map(str::to_string)
            .collect())
    }

    fn assignments(&self, user: &str) -> AppResult<Vec<RoleAssignment>> {
        let id = Bson::String(ident::qualify_user(user));
        let doc = self.backend.find_by_id(ADMIN_DB, USERS_COLLECTION, &id)?
            .ok_or_else(|| AppError::not_found("user_not_found".to_string(), format!("user '{}' does not exist", user)))?;
        let roles = match doc.get_array("roles") {
            Ok(roles) => roles,
            Err(_) => return Ok(Vec::new()),
        };
        Ok(roles
            .iter()
            .filter_map(|r| match r {
                Bson::Document(d) => Some(RoleAssignment::new(d.get_str("db").ok()?, d.get_str("role").ok()?)),
                _ => None,
            })
            .collect())
    }

    pub fn list_databases(&self) -> AppResult<Vec<String>> { self.checked(self.databases()) }

    pub fn list_collections(&self, db: &str) -> AppResult<Vec<String>> {
        let r = ident::validate_database_name(db).and_then(|_| self.backend.collection_names(db));
        self.checked(r)
    }

    pub fn list_users(&self) -> AppResult<Vec<String>> { self.checked(self.users()) }

    pub fn user_roles(&self, user: &str) -> AppResult<Vec<RoleAssignment>> { self.checked(self.assignments(user)) }

    /// The managed role `user` holds on `db`, if any.
    pub fn user_role(&self, user: &str, db: &str) -> AppResult<Option<Role>> {
        let r = self.assignments(user).map(|list| list.iter().find(|a| a.database == db).and_then(RoleAssignment::managed));
        self.checked(r)
    }

    fn table(&self) -> AppResult<Vec<UserRoles>> {
        self.users()?
            .into_iter()
            .map(|user| {
                let assignments = self.assignments(&user)?;
                Ok(UserRoles { user, assignments })
            })
            .collect()
    }

    pub fn number_of_users(&self) -> AppResult<usize> { self.checked(self.users().map(|u| u.len())) }
    pub fn number_of_databases(&self) -> AppResult<usize> { self.checked(self.databases().map(|d| d.len())) }

    pub fn verify_user(&self, name: &str) -> AppResult<bool> { self.checked(self.users().map(|u| u.iter().any(|x| x == name))) }
    pub fn verify_database(&self, name: &str) -> AppResult<bool> { self.checked(self.databases().map(|d| d.iter().any(|x| x == name))) }

    pub fn verify_collection(&self, db: &str, coll: &str) -> AppResult<bool> {
        self.checked(self.backend.collection_names(db).map(|c| c.iter().any(|x| x == coll)))
    }

    // ---- documents ----

    fn bound_collection(&self) -> AppResult<&str> {
        self.collection
            .as_deref()
            .ok_or_else(|| AppError::validation("no_collection".to_string(), "no collection selected; connect to a collection first".to_string()))
    }

    fn fetch_document(&self, id: &str) -> AppResult<Document> {
        let coll = self.bound_collection()?;
        for filter in id_filters(id) {
            if let Some(doc) = self.backend.find_by_id(&self.database, coll, &filter)? {
                return Ok(Document::from_bson(doc));
            }
        }
        Err(AppError::not_found("document_not_found".to_string(), format!("no document '{}' in '{}.{}'", id, self.database, coll)))
    }

    fn remove_document(&self, coll: &str, id: &str) -> AppResult<()> {
        for filter in id_filters(id) {
            if self.backend.delete(&self.database, coll, &filter)? {
                return Ok(());
            }
        }
        Err(AppError::not_found("document_not_found".to_string(), format!("no document '{}' in '{}.{}'", id, self.database, coll)))
    }

    fn store_document(&self, doc: &Document) -> AppResult<String> {
        let coll = self.bound_collection()?;
        let body = doc.to_bson()?;
        if let Some(id) = doc.id_bson() {
            if self.backend.find_by_id(&self.database, coll, &id)?.is_some() {
                self.backend.replace(&self.database, coll, &id, body)?;
                debug!(target: "mongoadmin::gateway", "replaced {} in {}.{}", id_to_string(&id), self.database, coll);
                return Ok(id_to_string(&id));
            }
        }
        let id = self.backend.insert(&self.database, coll, body)?;
        Ok(id_to_string(&id))
    }

    /// GridFS files hold the document's JSON text.
    fn store_document_gridfs(&self, doc: &Document, filename: &str) -> AppResult<String> {
        let id = self.backend.gridfs_upload(&self.database, filename, doc.to_text().as_bytes())?;
        Ok(id_to_string(&id))
    }

    pub fn get_document(&self, id: &str) -> AppResult<Document> { self.checked(self.fetch_document(id)) }

    pub fn get_document_list(&self) -> AppResult<Vec<Document>> {
        let r = self.bound_collection().and_then(|coll| self.backend.find_all(&self.database, coll));
        self.checked(r.map(|docs| docs.into_iter().map(Document::from_bson).collect()))
    }

    /// Replace by id when the id is already stored, insert otherwise. Returns the stored id.
    pub fn add_document(&self, doc: &Document) -> AppResult<String> {
        let r = self.store_document(doc);
        self.reported(r, |id| format!("document '{}' stored in '{}'", id, self.database))
    }

    pub fn add_document_with_id(&self, doc: &Document, id: &str) -> AppResult<String> {
        let mut forced = doc.clone();
        let r = forced.update_id(id).and_then(|_| self.store_document(&forced));
        self.reported(r, |id| format!("document '{}' stored in '{}'", id, self.database))
    }

    pub fn delete_document(&self, id: &str) -> AppResult<()> {
        let r = self.bound_collection().and_then(|coll| match coll {
            GRIDFS_CHUNKS => Err(AppError::validation(
                "gridfs_chunks".to_string(),
                "fs.chunks entries cannot be deleted directly; delete the fs.files entry instead".to_string(),
            )),
            GRIDFS_FILES => self.backend.gridfs_delete(&self.database, &id_filter(id)),
            _ => self.remove_document(coll, id),
        });
        self.reported(r, |_| format!("document '{}' deleted", id))
    }

    pub fn add_document_gridfs(&self, doc: &Document, filename: &str) -> AppResult<String> {
        let r = self.store_document_gridfs(doc, filename);
        self.reported(r, |id| format!("document '{}' uploaded to GridFS as '{}'", filename, id))
    }

    pub fn get_document_gridfs(&self, id: &str) -> AppResult<Document> {
        let r = self.backend.gridfs_download(&self.database, &id_filter(id)).and_then(|bytes| {
            let text = std::str::from_utf8(&bytes)
                .map_err(|e| AppError::codec("invalid_utf8".to_string(), format!("GridFS file '{}' is not UTF-8 text: {}", id, e)))?;
            Document::from_text(text)
        });
        self.checked(r)
    }

    /// Load a JSON file and store it, through GridFS when it is too large for one document.
    pub fn import_document(&self, path: &Path) -> AppResult<String> {
        let r = Document::load(path).and_then(|doc| {
            if doc.byte_len() > self.inline_limit {
                let filename = path.file_name().and_then(|n| n.to_str()).unwrap_or("document.json");
                self.store_document_gridfs(&doc, filename)
            } else {
                self.store_document(&doc)
            }
        });
        self.reported(r, |id| format!("imported '{}' as '{}'", path.display(), id))
    }

    pub fn export_document(&self, id: &str, path: &Path) -> AppResult<PathBuf> {
        let r = self.fetch_document(id).and_then(|doc| doc.save(path));
        self.reported(r, |p| format!("document '{}' exported to '{}'", id, p.display()))
    }

    /// Save the bound collection as one object keyed `Document0`..`DocumentN`.
    pub fn download_collection(&self, path: &Path) -> AppResult<PathBuf> {
        let r = self.bound_collection().and_then(|coll| {
            let docs = self.backend.find_all(&self.database, coll)?;
            let mut all = Map::new();
            for (i, doc) in docs.into_iter().enumerate() {
                all.insert(format!("Document{}", i), Value::Object(Document::from_bson(doc).into_map()));
            }
            Document::from_map(all).save(path)
        });
        self.reported(r, |p| format!("collection downloaded to '{}'", p.display()))
    }

    // ---- collections ----

    pub fn add_collection(&self, name: &str) -> AppResult<()> {
        let r = ident::validate_collection_name(name).and_then(|_| {
            if self.backend.collection_names(&self.database)?.iter().any(|c| c == name) {
                return Err(AppError::validation("collection_exists".to_string(), format!("collection '{}' already exists in '{}'", name, self.database)));
            }
            self.backend.create_collection(&self.database, name)
        });
        self.reported(r, |_| format!("collection '{}.{}' created", self.database, name))
    }

    pub fn delete_collection(&mut self, name: &str) -> AppResult<()> {
        let r = ident::validate_name("collection", name).and_then(|_| {
            if !self.backend.collection_names(&self.database)?.iter().any(|c| c == name) {
                return Err(AppError::not_found("collection_not_found".to_string(), format!("collection '{}' does not exist in '{}'", name, self.database)));
            }
            self.backend.drop_collection(&self.database, name)
        });
        let r = self.reported(r, |_| format!("collection '{}.{}' dropped", self.database, name));
        if r.is_ok() && self.collection.as_deref() == Some(name) {
            self.collection = None;
        }
        r
    }

    // ---- administration ----

    fn require_user(&self, name: &str) -> AppResult<()> {
        if self.users()?.iter().any(|u| u == name) {
            Ok(())
        } else {
            Err(AppError::not_found("user_not_found".to_string(), format!("user '{}' does not exist", name)))
        }
    }

    fn require_database(&self, name: &str) -> AppResult<()> {
        if self.databases()?.iter().any(|d| d == name) {
            Ok(())
        } else {
            Err(AppError::not_found("database_not_found".to_string(), format!("database '{}' does not exist", name)))
        }
    }

    fn require_unreserved(name: &str) -> AppResult<()> {
        ident::validate_database_name(name)?;
        if ident::is_system_database(name) {
            return Err(AppError::validation("reserved_database".to_string(), format!("'{}' is a system database", name)));
        }
        Ok(())
    }

    /// Revoke every grant any user holds on `db`; returns how many were revoked.
    fn clear_database_roles(&self, db: &str) -> AppResult<usize> {
        let mut revoked = 0;
        for user in self.users()? {
            for a in self.assignments(&user)?.iter().filter(|a| a.database == db) {
                self.backend.run_command(ADMIN_DB, commands::revoke_role_named(&user, db, &a.role))?;
                revoked += 1;
            }
        }
        Ok(revoked)
    }

    fn create_database(&self, name: &str) -> AppResult<()> {
        Self::require_unreserved(name)?;
        if self.databases()?.iter().any(|d| d == name) {
            return Err(AppError::validation("database_exists".to_string(), format!("database '{}' already exists", name)));
        }
        let mut marker = bson::Document::new();
        marker.insert(MARKER_FIELD, name);
        self.backend.insert(name, &marker_collection(name), marker)?;
        Ok(())
    }

    fn drop_database(&mut self, name: &str) -> AppResult<usize> {
        Self::require_unreserved(name)?;
        self.require_database(name)?;
        let revoked = self.clear_database_roles(name)?;
        self.backend.drop_database(name)?;
        if self.database == name {
            self.database = ADMIN_DB.to_string();
            self.collection = None;
        }
        Ok(revoked)
    }

    fn create_user(&self, name: &str, password: &str) -> AppResult<()> {
        ident::validate_name("user", name)?;
        if password.is_empty() {
            return Err(AppError::validation("empty_password".to_string(), format!("user '{}' needs a password", name)));
        }
        if self.users()?.iter().any(|u| u == name) {
            return Err(AppError::validation("user_exists".to_string(), format!("user '{}' already exists", name)));
        }
        self.backend.run_command(ADMIN_DB, commands::create_user(name, password))?;
        Ok(())
    }

    fn drop_user(&self, name: &str) -> AppResult<()> {
        ident::validate_name("user", name)?;
        if name == self.admin_user {
            return Err(AppError::validation("admin_user".to_string(), format!("'{}' is the session's own account and cannot be dropped", name)));
        }
        self.require_user(name)?;
        self.backend.run_command(ADMIN_DB, commands::drop_user(name))?;
        Ok(())
    }

    fn send_grant(&self, user: &str, db: &str, role: Role) -> AppResult<()> {
        self.require_user(user)?;
        self.require_database(db)?;
        self.backend.run_command(ADMIN_DB, commands::grant_roles(user, db, role))?;
        Ok(())
    }

    fn send_revoke(&self, user: &str, db: &str, role: Role) -> AppResult<()> {
        self.require_user(user)?;
        self.backend.run_command(ADMIN_DB, commands::revoke_roles(user, db, role))?;
        Ok(())
    }
}

impl<B: Backend> AdminGateway for ConnectionGateway<B> {
    fn admin_user(&self) -> &str { &self.admin_user }

    fn list_databases(&self) -> AppResult<Vec<String>> { ConnectionGateway::list_databases(self) }

    fn roles_table(&self) -> AppResult<Vec<UserRoles>> { self.checked(self.table()) }

    fn add_database(&mut self, name: &str) -> AppResult<()> {
        let r = self.create_database(name);
        self.reported(r, |_| format!("database '{}' created", name))
    }

    fn delete_database(&mut self, name: &str) -> AppResult<()> {
        let r = self.drop_database(name);
        self.reported(r, |revoked| format!("database '{}' dropped ({} role grant(s) cleared)", name, revoked)).map(|_| ())
    }

    fn add_user(&mut self, name: &str, password: &str) -> AppResult<()> {
        let r = self.create_user(name, password);
        self.reported(r, |_| format!("user '{}' created", name))
    }

    fn delete_user(&mut self, name: &str) -> AppResult<()> {
        let r = self.drop_user(name);
        self.reported(r, |_| format!("user '{}' dropped", name))
    }

    fn grant_role(&mut self, user: &str, db: &str, role: Role) -> AppResult<()> {
        let r = self.send_grant(user, db, role);
        self.reported(r, |_| format!("granted {} on '{}' to '{}'", role, db, user))
    }

    fn revoke_role(&mut self, user: &str, db: &str, role: Role) -> AppResult<()> {
        let r = self.send_revoke(user, db, role);
        self.reported(r, |_| format!("revoked {} on '{}' from '{}'", role, db, user))
    }
}
