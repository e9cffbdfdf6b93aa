use chrono::Utc;
use pixcache::core::types::{Info, SubImage};

#[test]
fn test_json_round_trip() {
    let info = Info::new("image/jpeg", 6000, 4000);
    let json = info.to_json().unwrap();
    let parsed = Info::from_json(&json).unwrap();
    assert_eq!(info, parsed);
}

#[test]
fn test_json_field_names() {
    let mut info = Info::new("image/tiff", 800, 600);
    info.num_resolutions = 5;
    info.images[0].tile_width = Some(256);
    info.serialization_timestamp = Some(Utc::now());
    let json = info.to_json().unwrap();
    assert!(json.contains("\"mediaType\""));
    assert!(json.contains("\"numResolutions\""));
    assert!(json.contains("\"tileWidth\""));
    assert!(json.contains("\"serializationTimestamp\""));
}

#[test]
fn test_timestamp_absent_by_default() {
    let info = Info::new("image/png", 10, 10);
    assert!(info.serialization_timestamp.is_none());
    let json = info.to_json().unwrap();
    assert!(!json.contains("serializationTimestamp"));
}

#[test]
fn test_from_json_rejects_garbage() {
    assert!(Info::from_json("not json at all").is_err());
}

#[test]
fn test_dimensions_come_from_first_subimage() {
    let mut info = Info::new("image/tiff", 6000, 4000);
    info.images.push(SubImage::new(3000, 2000));
    assert_eq!(info.width(), Some(6000));
    assert_eq!(info.height(), Some(4000));
}

#[test]
fn test_same_content_ignores_timestamp() {
    let info = Info::new("image/jpeg", 100, 50);
    let mut stamped = info.clone();
    stamped.serialization_timestamp = Some(Utc::now());
    assert!(info.same_content(&stamped));
    assert_ne!(info, stamped);

    let other = Info::new("image/jpeg", 100, 51);
    assert!(!info.same_content(&other));
}
