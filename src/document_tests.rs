use super::*;
use serde_json::json;
use tempfile::tempdir;

fn sample() -> Document {
    Document::from_text(r#"{
        "_id": {"$oid": "65a1f0c2b3d4e5f60718293a"},
        "name": "widget",
        "price": 12.75,
        "tags": ["a", "b"],
        "nested": {"depth": 2, "ok": true, "none": null}
    }"#).unwrap()
}

#[test]
fn text_round_trip_is_lossless() {
    let d = sample();
    let back = Document::from_text(&d.to_text()).unwrap();
    assert_eq!(back, d);
    // field order survives as well
    let keys: Vec<&String> = back.as_map().keys().collect();
    assert_eq!(keys, vec!["_id", "name", "price", "tags", "nested"]);
}

#[test]
fn floats_survive_text_round_trip() {
    let mut d = Document::new();
    d.insert("x", json!(0.1 + 0.2));
    d.insert("tiny", json!(1e-300));
    assert_eq!(Document::from_text(&d.to_text()).unwrap(), d);
}

#[test]
fn id_reads_object_ids_strings_and_degrades_to_none() {
    assert_eq!(sample().id().as_deref(), Some("65a1f0c2b3d4e5f60718293a"));

    let d = Document::from_text(r#"{"_id": "custom-key"}"#).unwrap();
    assert_eq!(d.id().as_deref(), Some("custom-key"));

    let d = Document::from_text(r#"{"_id": {"weird": 1}}"#).unwrap();
    assert_eq!(d.id(), None);
    assert_eq!(d.display_id(), NULL_ID);

    assert_eq!(Document::new().id(), None);
}

#[test]
fn update_id_accepts_only_object_ids() {
    let mut d = Document::new();
    d.update_id("65A1F0C2B3D4E5F60718293A").unwrap();
    assert_eq!(d.id().as_deref(), Some("65a1f0c2b3d4e5f60718293a"));

    let err = d.update_id("65a1f0c2b3d4e5f6071829").unwrap_err();
    assert_eq!(err.code_str(), "invalid_object_id");
    // failed update leaves the previous id in place
    assert_eq!(d.id().as_deref(), Some("65a1f0c2b3d4e5f60718293a"));
    assert!(d.update_id("zz a1f0c2b3d4e5f60718293a").is_err());
}

#[test]
fn binary_form_preserves_typed_values() {
    let d = sample();
    let bytes = d.to_binary().unwrap();
    let back = Document::from_binary(&bytes).unwrap();
    assert_eq!(back.id(), d.id());
    assert_eq!(back.get("name"), Some(&json!("widget")));
    assert_eq!(back.get("price"), Some(&json!(12.75)));
    assert_eq!(back.get("tags"), Some(&json!(["a", "b"])));
    assert!(matches!(back.id_bson(), Some(Bson::ObjectId(_))));
}

#[test]
fn from_binary_rejects_garbage() {
    assert!(Document::from_binary(&[1, 2, 3]).is_err());
}

#[test]
fn from_text_requires_an_object() {
    let err = Document::from_text("[1,2]").unwrap_err();
    assert_eq!(err.code_str(), "not_an_object");
    assert_eq!(Document::from_text("{").unwrap_err().code_str(), "json_error");
}

#[test]
fn save_forces_json_extension_and_load_reads_back() {
    let dir = tempdir().unwrap();
    let written = sample().save(&dir.path().join("export")).unwrap();
    assert_eq!(written, dir.path().join("export.json"));
    assert!(written.is_file());

    let replaced = sample().save(&dir.path().join("export.txt")).unwrap();
    assert_eq!(replaced.extension().unwrap(), "json");

    let kept = sample().save(&dir.path().join("nested/dir/doc.JSON")).unwrap();
    assert_eq!(kept, dir.path().join("nested/dir/doc.JSON"));

    assert_eq!(Document::load(&written).unwrap(), sample());
}

#[test]
fn load_of_missing_file_is_not_found() {
    let dir = tempdir().unwrap();
    let err = Document::load(&dir.path().join("absent.json")).unwrap_err();
    assert!(matches!(err, AppError::NotFound { .. }));
}

#[test]
fn id_filter_prefers_object_ids() {
    assert!(matches!(id_filter("65a1f0c2b3d4e5f60718293a"), Bson::ObjectId(_)));
    assert_eq!(id_filter("admin.alice"), Bson::String("admin.alice".into()));
    assert_eq!(id_to_string(&id_filter("65a1f0c2b3d4e5f60718293a")), "65a1f0c2b3d4e5f60718293a");
}
