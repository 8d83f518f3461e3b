use bson::{Bson, Document as BsonDocument};

use crate::error::AppResult;

/// Raw server primitives the gateway is written against.
///
/// Implementations perform no precondition checks of their own; the gateway decides what is
/// allowed and logs the outcome. All calls block until the server answers. Failures talking
/// to the server come back as `AppError::Server` carrying the best cause the transport exposes.
pub trait Backend {
    /// Round trip to the server, used to prove a binding works.
    fn ping(&self, db: &str) -> AppResult<()>;

    /// Every database the server lists, system ones included.
    fn database_names(&self) -> AppResult<Vec<String>>;
    fn collection_names(&self, db: &str) -> AppResult<Vec<String>>;

    fn find_all(&self, db: &str, coll: &str) -> AppResult<Vec<BsonDocument>>;
    fn find_by_id(&self, db: &str, coll: &str, id: &Bson) -> AppResult<Option<BsonDocument>>;
    /// Insert and return the stored `_id` (server assigned when the document had none).
    fn insert(&self, db: &str, coll: &str, doc: BsonDocument) -> AppResult<Bson>;
    /// Replace by id; `false` when nothing matched.
    fn replace(&self, db: &str, coll: &str, id: &Bson, doc: BsonDocument) -> AppResult<bool>;
    /// Delete by id; `false` when nothing matched.
    fn delete(&self, db: &str, coll: &str, id: &Bson) -> AppResult<bool>;

    fn create_collection(&self, db: &str, coll: &str) -> AppResult<()>;
    fn drop_collection(&self, db: &str, coll: &str) -> AppResult<()>;
    fn drop_database(&self, db: &str) -> AppResult<()>;

    fn run_command(&self, db: &str, command: BsonDocument) -> AppResult<BsonDocument>;

    fn gridfs_upload(&self, db: &str, filename: &str, bytes: &[u8]) -> AppResult<Bson>;
    fn gridfs_download(&self, db: &str, id: &Bson) -> AppResult<Vec<u8>>;
    fn gridfs_delete(&self, db: &str, id: &Bson) -> AppResult<()>;
}
