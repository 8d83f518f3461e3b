//! `Backend` over the official async driver. A private runtime drives every call to
//! completion so the rest of the crate stays synchronous.

use std::future::IntoFuture;

use bson::{doc, Bson, Document as BsonDocument};
use futures_util::io::{AsyncReadExt, AsyncWriteExt};
use futures_util::TryStreamExt;
use mongodb::error::{Error as DriverError, ErrorKind};
use mongodb::Client;
use tokio::runtime::Runtime;
use tracing::debug;

use super::backend::Backend;
use super::commands;
use crate::config::Credentials;
use crate::error::{AppError, AppResult, ServerCause};

pub struct MongoBackend {
    rt: Runtime,
    client: Client,
}

impl MongoBackend {
    /// Build a client from the credentials' connection string. The driver connects lazily;
    /// `Backend::ping` is what proves the server is there.
    pub fn connect(credentials: &Credentials) -> AppResult<Self> {
        let rt = tokio::runtime::Builder::new_multi_thread().worker_threads(2).enable_all().build()?;
        let uri = credentials.connection_string();
        debug!(target: "mongoadmin::gateway", "connecting to {}", credentials.redacted_connection_string());
        let client = rt.block_on(async { Client::with_uri_str(&uri).await }).map_err(classify)?;
        Ok(Self { rt, client })
    }

    fn block<F, T>(&self, action: F) -> AppResult<T>
    where
        F: IntoFuture<Output = mongodb::error::Result<T>>,
    {
        self.rt.block_on(action.into_future()).map_err(classify)
    }

    fn collection(&self, db: &str, coll: &str) -> mongodb::Collection<BsonDocument> {
        self.client.database(db).collection::<BsonDocument>(coll)
    }
}

/// Map a driver error onto the cause the operator can act on.
pub fn classify(err: DriverError) -> AppError {
    let text = err.to_string();
    let cause = match err.kind.as_ref() {
        ErrorKind::Authentication { .. } => ServerCause::Auth,
        ErrorKind::InvalidArgument { .. } => ServerCause::UriFormat,
        ErrorKind::DnsResolve { .. } => ServerCause::Host,
        ErrorKind::Io(io) if io.kind() == std::io::ErrorKind::ConnectionRefused => ServerCause::Port,
        ErrorKind::ServerSelection { .. } if text.contains("refused") => ServerCause::Port,
        ErrorKind::ServerSelection { .. } => ServerCause::Host,
        ErrorKind::Command(c) if c.code == 13 || c.code == 18 => ServerCause::Auth,
        ErrorKind::Command(_) | ErrorKind::Write(_) => ServerCause::Command,
        ErrorKind::GridFs(_) => return AppError::not_found("gridfs_error".to_string(), text),
        _ => ServerCause::Transport,
    };
    AppError::server(cause, format!("{}: {}", describe(cause), text))
}

pub fn describe(cause: ServerCause) -> &'static str {
    match cause {
        ServerCause::Auth => "authentication failed",
        ServerCause::Host => "host unreachable",
        ServerCause::Port => "MongoDB service seems not to be running on that port",
        ServerCause::UriFormat => "malformed connection string",
        ServerCause::Command => "command rejected by the server",
        ServerCause::Transport => "connection error",
    }
}

fn stream_error(err: std::io::Error) -> AppError {
    AppError::server(ServerCause::Transport, format!("GridFS stream failed: {}", err))
}

impl Backend for MongoBackend {
    fn ping(&self, db: &str) -> AppResult<()> {
        let database = self.client.database(db);
        self.block(database.run_command(commands::ping())).map(|_| ())
    }

    fn database_names(&self) -> AppResult<Vec<String>> {
        self.block(self.client.list_database_names())
    }

    fn collection_names(&self, db: &str) -> AppResult<Vec<String>> {
        let database = self.client.database(db);
        self.block(database.list_collection_names())
    }

    fn find_all(&self, db: &str, coll: &str) -> AppResult<Vec<BsonDocument>> {
        let collection = self.collection(db, coll);
        self.rt
            .block_on(async {
                let cursor = collection.find(doc! {}).await?;
                cursor.try_collect::<Vec<_>>().await
            })
            .map_err(classify)
    }

    fn find_by_id(&self, db: &str, coll: &str, id: &Bson) -> AppResult<Option<BsonDocument>> {
        let collection = self.collection(db, coll);
        self.block(collection.find_one(doc! { "_id": id.clone() }))
    }

    fn insert(&self, db: &str, coll: &str, doc: BsonDocument) -> AppResult<Bson> {
        let collection = self.collection(db, coll);
        self.block(collection.insert_one(doc)).map(|r| r.inserted_id)
    }

    fn replace(&self, db: &str, coll: &str, id: &Bson, doc: BsonDocument) -> AppResult<bool> {
        let collection = self.collection(db, coll);
        self.block(collection.replace_one(doc! { "_id": id.clone() }, doc)).map(|r| r.matched_count > 0)
    }

    fn delete(&self, db: &str, coll: &str, id: &Bson) -> AppResult<bool> {
        let collection = self.collection(db, coll);
        self.block(collection.delete_one(doc! { "_id": id.clone() })).map(|r| r.deleted_count > 0)
    }

    fn create_collection(&self, db: &str, coll: &str) -> AppResult<()> {
        let database = self.client.database(db);
        self.block(database.create_collection(coll))
    }

    fn drop_collection(&self, db: &str, coll: &str) -> AppResult<()> {
        let collection = self.collection(db, coll);
        self.block(collection.drop())
    }

    fn drop_database(&self, db: &str) -> AppResult<()> {
        let database = self.client.database(db);
        self.block(database.drop())
    }

    fn run_command(&self, db: &str, command: BsonDocument) -> AppResult<BsonDocument> {
        let database = self.client.database(db);
        debug!(target: "mongoadmin::gateway", "{} on {}", commands::command_name(&command), db);
        self.block(database.run_command(command))
    }

    fn gridfs_upload(&self, db: &str, filename: &str, bytes: &[u8]) -> AppResult<Bson> {
        let bucket = self.client.database(db).gridfs_bucket(None);
        self.rt.block_on(async {
            let mut stream = bucket.open_upload_stream(filename).await.map_err(classify)?;
            stream.write_all(bytes).await.map_err(stream_error)?;
            stream.close().await.map_err(stream_error)?;
            Ok(stream.id().clone())
        })
    }

    fn gridfs_download(&self, db: &str, id: &Bson) -> AppResult<Vec<u8>> {
        let bucket = self.client.database(db).gridfs_bucket(None);
        self.rt.block_on(async {
            let mut stream = bucket.open_download_stream(id.clone()).await.map_err(classify)?;
            let mut buf = Vec::new();
            stream.read_to_end(&mut buf).await.map_err(stream_error)?;
            Ok(buf)
        })
    }

    fn gridfs_delete(&self, db: &str, id: &Bson) -> AppResult<()> {
        let bucket = self.client.database(db).gridfs_bucket(None);
        self.block(bucket.delete(id.clone()))
    }
}
