//! In-process stand-in for a server: databases, collections, `admin.system.users`, the user
//! and role commands, and a GridFS bucket. Used by the test suites and by `--dry-run`.
//!
//! Clones share state, so a test can keep a handle after moving one into a gateway. Every
//! command and mutation is journaled, and a one-shot failure can be injected to exercise the
//! server error paths.

use std::collections::BTreeMap;
use std::sync::Arc;

use bson::oid::ObjectId;
use bson::{doc, Bson, Document as BsonDocument};
use parking_lot::Mutex;

use super::backend::Backend;
use super::commands::command_name;
use super::marker_collection;
use crate::error::{AppError, AppResult, ServerCause};
use crate::ident::{self, ADMIN_DB, USERS_COLLECTION};

type Collections = BTreeMap<String, Vec<BsonDocument>>;

#[derive(Debug, Default)]
struct ServerState {
    databases: BTreeMap<String, Collections>,
    files: BTreeMap<String, BTreeMap<ObjectId, Vec<u8>>>,
    journal: Vec<String>,
    fail_next: Option<ServerCause>,
    fail_on_command: Option<(String, ServerCause)>,
}

#[derive(Debug, Clone, Default)]
pub struct MemoryBackend {
    state: Arc<Mutex<ServerState>>,
}

fn command_error(msg: String) -> AppError {
    AppError::server(ServerCause::Command, msg)
}

impl ServerState {
    fn take_failure(&mut self) -> AppResult<()> {
        match self.fail_next.take() {
            Some(cause) => Err(AppError::server(cause, "injected failure")),
            None => Ok(()),
        }
    }

    fn collection_mut(&mut self, db: &str, coll: &str) -> &mut Vec<BsonDocument> {
        self.databases.entry(db.to_string()).or_default().entry(coll.to_string()).or_default()
    }

    fn collection(&self, db: &str, coll: &str) -> Option<&Vec<BsonDocument>> {
        self.databases.get(db).and_then(|c| c.get(coll))
    }

    fn user_mut(&mut self, name: &str) -> Option<&mut BsonDocument> {
        let id = ident::qualify_user(name);
        self.databases
            .get_mut(ADMIN_DB)
            .and_then(|c| c.get_mut(USERS_COLLECTION))
            .and_then(|users| users.iter_mut().find(|u| u.get_str("_id").ok() == Some(id.as_str())))
    }

    fn role_pairs(command: &BsonDocument) -> AppResult<Vec<(String, String)>> {
        let roles = command.get_array("roles").map_err(|_| command_error("roles array missing".into()))?;
        roles
            .iter()
            .map(|r| match r {
                Bson::Document(d) => match (d.get_str("role"), d.get_str("db")) {
                    (Ok(role), Ok(db)) => Ok((role.to_string(), db.to_string())),
                    _ => Err(command_error("role entries need role and db".into())),
                },
                _ => Err(command_error("role entries must be documents".into())),
            })
            .collect()
    }

    fn execute(&mut self, db: &str, command: &BsonDocument) -> AppResult<BsonDocument> {
        let name = command_name(command).to_string();
        if name == "ping" {
            return Ok(doc! { "ok": 1 });
        }
        if db != ADMIN_DB {
            return Err(command_error(format!("{} must run against the admin database", name)));
        }
        let target = command.get_str(&name).map_err(|_| command_error(format!("{} needs a user name", name)))?.to_string();
        match name.as_str() {
            "createUser" => {
                if self.user_mut(&target).is_some() {
                    return Err(command_error(format!("User \"{}@admin\" already exists", target)));
                }
                let roles = Self::role_pairs(command)?;
                let roles: Vec<Bson> = roles.into_iter().map(|(role, db)| Bson::Document(doc! { "role": role, "db": db })).collect();
                let user = doc! { "_id": ident::qualify_user(&target), "user": target.clone(), "db": ADMIN_DB, "roles": roles };
                self.collection_mut(ADMIN_DB, USERS_COLLECTION).push(user);
                self.journal.push(format!("createUser {}", target));
            }
            "dropUser" => {
                let id = ident::qualify_user(&target);
                let users = self.collection_mut(ADMIN_DB, USERS_COLLECTION);
                let before = users.len();
                users.retain(|u| u.get_str("_id").ok() != Some(id.as_str()));
                if users.len() == before {
                    return Err(command_error(format!("User \"{}@admin\" not found", target)));
                }
                self.journal.push(format!("dropUser {}", target));
            }
            "grantRolesToUser" | "revokeRolesFromUser" => {
                let pairs = Self::role_pairs(command)?;
                let grant = name == "grantRolesToUser";
                let user = self.user_mut(&target).ok_or_else(|| command_error(format!("Could not find user \"{}@admin\"", target)))?;
                let mut roles: Vec<Bson> = user.get_array("roles").cloned().unwrap_or_default();
                for (role, on) in &pairs {
                    let entry = Bson::Document(doc! { "role": role.as_str(), "db": on.as_str() });
                    if grant {
                        if !roles.contains(&entry) { roles.push(entry); }
                    } else {
                        roles.retain(|r| r != &entry);
                    }
                }
                user.insert("roles", roles);
                let list: Vec<String> = pairs.iter().map(|(r, d)| format!("{}@{}", r, d)).collect();
                self.journal.push(format!("{} {} {}", name, target, list.join(",")));
            }
            other => return Err(command_error(format!("no such command: '{}'", other))),
        }
        Ok(doc! { "ok": 1 })
    }
}

impl MemoryBackend {
    pub fn new() -> Self { Self::default() }

    /// Seed a database holding its marker collection.
    pub fn with_database(self, name: &str) -> Self {
        let mut marker = doc! { "_id": ObjectId::new() };
        marker.insert(super::MARKER_FIELD, name);
        self.state.lock().collection_mut(name, &marker_collection(name)).push(marker);
        self
    }

    /// Seed a user of the administrative database with `(db, role)` grants.
    pub fn with_user(self, name: &str, grants: &[(&str, &str)]) -> Self {
        {
            let mut s = self.state.lock();
            let roles: Vec<Bson> = grants.iter().map(|(db, role)| Bson::Document(doc! { "role": *role, "db": *db })).collect();
            let user = doc! { "_id": ident::qualify_user(name), "user": name, "db": ADMIN_DB, "roles": roles };
            s.collection_mut(ADMIN_DB, USERS_COLLECTION).push(user);
        }
        self
    }

    pub fn with_document(self, db: &str, coll: &str, doc: BsonDocument) -> Self {
        self.state.lock().collection_mut(db, coll).push(doc);
        self
    }

    /// Commands and mutations applied so far, oldest first.
    pub fn journal(&self) -> Vec<String> { self.state.lock().journal.clone() }

    pub fn clear_journal(&self) { self.state.lock().journal.clear(); }

    /// Make the next backend call fail with `cause`.
    pub fn fail_next(&self, cause: ServerCause) { self.state.lock().fail_next = Some(cause); }

    /// Make every run of the named command fail with `cause` until cleared.
    pub fn fail_command(&self, name: &str, cause: ServerCause) {
        self.state.lock().fail_on_command = Some((name.to_string(), cause));
    }

    pub fn clear_failures(&self) {
        let mut s = self.state.lock();
        s.fail_next = None;
        s.fail_on_command = None;
    }

    /// Roles stored for `user` as `(db, role)` pairs.
    pub fn grants_of(&self, user: &str) -> Vec<(String, String)> {
        let id = ident::qualify_user(user);
        let s = self.state.lock();
        let Some(doc) = s.collection(ADMIN_DB, USERS_COLLECTION).and_then(|u| u.iter().find(|d| d.get_str("_id").ok() == Some(id.as_str()))) else {
            return Vec::new();
        };
        doc.get_array("roles")
            .map(|roles| {
                roles
                    .iter()
                    .filter_map(|r| r.as_document())
                    .filter_map(|d| Some((d.get_str("db").ok()?.to_string(), d.get_str("role").ok()?.to_string())))
                    .collect()
            })
            .unwrap_or_default()
    }

    pub fn document_count(&self, db: &str, coll: &str) -> usize {
        self.state.lock().collection(db, coll).map_or(0, Vec::len)
    }

    pub fn file_count(&self, db: &str) -> usize {
        self.state.lock().files.get(db).map_or(0, BTreeMap::len)
    }
}

fn id_matches(doc: &BsonDocument, id: &Bson) -> bool {
    doc.get("_id") == Some(id)
}

impl Backend for MemoryBackend {
    fn ping(&self, _db: &str) -> AppResult<()> {
        self.state.lock().take_failure()
    }

    fn database_names(&self) -> AppResult<Vec<String>> {
        let mut s = self.state.lock();
        s.take_failure()?;
        Ok(s.databases.iter().filter(|(_, colls)| !colls.is_empty()).map(|(name, _)| name.clone()).collect())
    }

    fn collection_names(&self, db: &str) -> AppResult<Vec<String>> {
        let mut s = self.state.lock();
        s.take_failure()?;
        Ok(s.databases.get(db).map(|c| c.keys().cloned().collect()).unwrap_or_default())
    }

    fn find_all(&self, db: &str, coll: &str) -> AppResult<Vec<BsonDocument>> {
        let mut s = self.state.lock();
        s.take_failure()?;
        Ok(s.collection(db, coll).cloned().unwrap_or_default())
    }

    fn find_by_id(&self, db: &str, coll: &str, id: &Bson) -> AppResult<Option<BsonDocument>> {
        let mut s = self.state.lock();
        s.take_failure()?;
        Ok(s.collection(db, coll).and_then(|docs| docs.iter().find(|d| id_matches(d, id)).cloned()))
    }

    fn insert(&self, db: &str, coll: &str, mut doc: BsonDocument) -> AppResult<Bson> {
        let mut s = self.state.lock();
        s.take_failure()?;
        let id = match doc.get("_id") {
            Some(id) => id.clone(),
            None => {
                let id = Bson::ObjectId(ObjectId::new());
                doc.insert("_id", id.clone());
                id
            }
        };
        let docs = s.collection_mut(db, coll);
        if docs.iter().any(|d| id_matches(d, &id)) {
            return Err(command_error(format!("E11000 duplicate key error collection: {}.{} _id: {}", db, coll, id)));
        }
        docs.push(doc);
        s.journal.push(format!("insert {}.{}", db, coll));
        Ok(id)
    }

    fn replace(&self, db: &str, coll: &str, id: &Bson, mut doc: BsonDocument) -> AppResult<bool> {
        let mut s = self.state.lock();
        s.take_failure()?;
        doc.insert("_id", id.clone());
        let Some(slot) = s.databases.get_mut(db).and_then(|c| c.get_mut(coll)).and_then(|docs| docs.iter_mut().find(|d| id_matches(d, id))) else {
            return Ok(false);
        };
        *slot = doc;
        s.journal.push(format!("replace {}.{}", db, coll));
        Ok(true)
    }

    fn delete(&self, db: &str, coll: &str, id: &Bson) -> AppResult<bool> {
        let mut s = self.state.lock();
        s.take_failure()?;
        let Some(docs) = s.databases.get_mut(db).and_then(|c| c.get_mut(coll)) else { return Ok(false) };
        let before = docs.len();
        docs.retain(|d| !id_matches(d, id));
        let removed = docs.len() != before;
        if removed { s.journal.push(format!("delete {}.{}", db, coll)); }
        Ok(removed)
    }

    fn create_collection(&self, db: &str, coll: &str) -> AppResult<()> {
        let mut s = self.state.lock();
        s.take_failure()?;
        if s.collection(db, coll).is_some() {
            return Err(command_error(format!("Collection {}.{} already exists.", db, coll)));
        }
        s.collection_mut(db, coll);
        s.journal.push(format!("create {}.{}", db, coll));
        Ok(())
    }

    fn drop_collection(&self, db: &str, coll: &str) -> AppResult<()> {
        let mut s = self.state.lock();
        s.take_failure()?;
        let emptied = match s.databases.get_mut(db) {
            Some(colls) => {
                colls.remove(coll);
                colls.is_empty()
            }
            None => false,
        };
        if emptied { s.databases.remove(db); }
        s.journal.push(format!("drop {}.{}", db, coll));
        Ok(())
    }

    fn drop_database(&self, db: &str) -> AppResult<()> {
        let mut s = self.state.lock();
        s.take_failure()?;
        s.databases.remove(db);
        s.files.remove(db);
        s.journal.push(format!("dropDatabase {}", db));
        Ok(())
    }

    fn run_command(&self, db: &str, command: BsonDocument) -> AppResult<BsonDocument> {
        let mut s = self.state.lock();
        s.take_failure()?;
        if let Some((name, cause)) = &s.fail_on_command {
            if name == command_name(&command) {
                return Err(AppError::server(*cause, format!("injected failure for {}", name)));
            }
        }
        s.execute(db, &command)
    }

    fn gridfs_upload(&self, db: &str, filename: &str, bytes: &[u8]) -> AppResult<Bson> {
        let mut s = self.state.lock();
        s.take_failure()?;
        let id = ObjectId::new();
        s.files.entry(db.to_string()).or_default().insert(id, bytes.to_vec());
        s.collection_mut(db, super::GRIDFS_FILES).push(doc! { "_id": id, "filename": filename, "length": bytes.len() as i64 });
        s.journal.push(format!("gridfs upload {}", filename));
        Ok(Bson::ObjectId(id))
    }

    fn gridfs_download(&self, db: &str, id: &Bson) -> AppResult<Vec<u8>> {
        let mut s = self.state.lock();
        s.take_failure()?;
        let missing = || AppError::not_found("gridfs_error".to_string(), format!("file {} not found", id));
        let oid = id.as_object_id().ok_or_else(missing)?;
        s.files.get(db).and_then(|f| f.get(&oid)).cloned().ok_or_else(missing)
    }

    fn gridfs_delete(&self, db: &str, id: &Bson) -> AppResult<()> {
        let mut s = self.state.lock();
        s.take_failure()?;
        let missing = || AppError::not_found("gridfs_error".to_string(), format!("file {} not found", id));
        let oid = id.as_object_id().ok_or_else(missing)?;
        s.files.get_mut(db).and_then(|f| f.remove(&oid)).ok_or_else(missing)?;
        let files = s.collection_mut(db, super::GRIDFS_FILES);
        files.retain(|d| !id_matches(d, id));
        s.journal.push(format!("gridfs delete {}", oid.to_hex()));
        Ok(())
    }
}
