//! Document codec: a semi-structured record held as a JSON object (MongoDB extended JSON for
//! typed values) with conversions to pretty text, BSON bytes and the driver's native document.

use std::fs;
use std::path::{Path, PathBuf};

use bson::oid::ObjectId;
use bson::Bson;
use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};

use crate::error::{AppError, AppResult};

pub const ID_FIELD: &str = "_id";
/// Rendering of a document that has not been persisted yet.
pub const NULL_ID: &str = "NULL";
pub const FILE_EXTENSION: &str = "json";

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Document {
    fields: Map<String, Value>,
}

impl Document {
    pub fn new() -> Self { Self::default() }
    pub fn from_map(fields: Map<String, Value>) -> Self { Self { fields } }
    pub fn as_map(&self) -> &Map<String, Value> { &self.fields }
    pub fn into_map(self) -> Map<String, Value> { self.fields }

    pub fn get(&self, key: &str) -> Option<&Value> { self.fields.get(key) }
    pub fn insert(&mut self, key: impl Into<String>, value: Value) -> Option<Value> { self.fields.insert(key.into(), value) }
    pub fn remove(&mut self, key: &str) -> Option<Value> { self.fields.shift_remove(key) }
    pub fn len(&self) -> usize { self.fields.len() }
    pub fn is_empty(&self) -> bool { self.fields.is_empty() }

    /// Identifier in canonical string form. `{"$oid": hex}` yields the hex digits, a plain
    /// string or number is returned as written, anything else counts as "no id".
    pub fn id(&self) -> Option<String> {
        match self.fields.get(ID_FIELD)? {
            Value::Object(o) => o.get("$oid").and_then(Value::as_str).map(str::to_string),
            Value::String(s) => Some(s.clone()),
            Value::Number(n) => Some(n.to_string()),
            _ => None,
        }
    }

    pub fn display_id(&self) -> String { self.id().unwrap_or_else(|| NULL_ID.to_string()) }

    /// The stored `_id` as a driver value, suitable for a `{_id: ...}` filter.
    pub fn id_bson(&self) -> Option<Bson> {
        self.fields.get(ID_FIELD).and_then(|v| Bson::try_from(v.clone()).ok())
    }

    /// Replace (or insert) `_id` with an ObjectId parsed from `id`.
    pub fn update_id(&mut self, id: &str) -> AppResult<()> {
        let oid = ObjectId::parse_str(id)
            .map_err(|_| AppError::codec("invalid_object_id".to_string(), format!("'{}' is not a 24 digit hexadecimal object id", id)))?;
        self.fields.insert(ID_FIELD.to_string(), json!({ "$oid": oid.to_hex() }));
        Ok(())
    }

    pub fn to_text(&self) -> String {
        format!("{:#}", Value::Object(self.fields.clone()))
    }

    pub fn from_text(text: &str) -> AppResult<Self> {
        match serde_json::from_str::<Value>(text)? {
            Value::Object(fields) => Ok(Self { fields }),
            other => Err(AppError::codec("not_an_object".to_string(), format!("expected a JSON object, found {}", json_kind(&other)))),
        }
    }

    pub fn to_bson(&self) -> AppResult<bson::Document> {
        Ok(bson::Document::try_from(self.fields.clone())?)
    }

    pub fn from_bson(doc: bson::Document) -> Self {
        match Bson::Document(doc).into_relaxed_extjson() {
            Value::Object(fields) => Self { fields },
            _ => Self::default(),
        }
    }

    pub fn to_binary(&self) -> AppResult<Vec<u8>> {
        let mut buf = Vec::new();
        self.to_bson()?.to_writer(&mut buf)?;
        Ok(buf)
    }

    pub fn from_binary(bytes: &[u8]) -> AppResult<Self> {
        Ok(Self::from_bson(bson::Document::from_reader(bytes)?))
    }

    /// Serialized text size, used to route large documents to GridFS.
    pub fn byte_len(&self) -> usize { self.to_text().len() }

    pub fn load(path: &Path) -> AppResult<Self> {
        if !path.is_file() {
            return Err(AppError::not_found("file_not_found".to_string(), format!("document file '{}' does not exist", path.display())));
        }
        let text = fs::read_to_string(path)?;
        Self::from_text(&text)
    }

    /// Write the document as pretty JSON. A path without the `.json` extension is renamed to
    /// carry it; the path actually written is returned.
    pub fn save(&self, path: &Path) -> AppResult<PathBuf> {
        let target = with_json_extension(path);
        if let Some(parent) = target.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent)?;
        }
        fs::write(&target, self.to_text())?;
        Ok(target)
    }
}

impl From<Map<String, Value>> for Document {
    fn from(fields: Map<String, Value>) -> Self { Self { fields } }
}

pub fn with_json_extension(path: &Path) -> PathBuf {
    match path.extension().and_then(|e| e.to_str()) {
        Some(ext) if ext.eq_ignore_ascii_case(FILE_EXTENSION) => path.to_path_buf(),
        _ => path.with_extension(FILE_EXTENSION),
    }
}

/// Driver filter value for a caller supplied id: ObjectId when it parses as one, else a string.
pub fn id_filter(id: &str) -> Bson {
    match ObjectId::parse_str(id) {
        Ok(oid) => Bson::ObjectId(oid),
        Err(_) => Bson::String(id.to_string()),
    }
}

/// Every filter value a caller supplied id may be stored under: the ObjectId form first, then the
/// plain string when the id also parses as an ObjectId.
pub fn id_filters(id: &str) -> Vec<Bson> {
    match id_filter(id) {
        oid @ Bson::ObjectId(_) => vec![oid, Bson::String(id.to_string())],
        other => vec![other],
    }
}

/// String form of a driver id value, matching `Document::id`.
pub fn id_to_string(id: &Bson) -> String {
    match id {
        Bson::ObjectId(oid) => oid.to_hex(),
        Bson::String(s) => s.clone(),
        other => other.to_string(),
    }
}

fn json_kind(v: &Value) -> &'static str {
    match v {
        Value::Null => "null",
        Value::Bool(_) => "a boolean",
        Value::Number(_) => "a number",
        Value::String(_) => "a string",
        Value::Array(_) => "an array",
        Value::Object(_) => "an object",
    }
}

#[cfg(test)]
#[path = "document_tests.rs"]
mod document_tests;
