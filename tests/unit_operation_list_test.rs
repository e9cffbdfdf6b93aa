use pixcache::core::cache::CacheKey;
use pixcache::core::types::{Format, Identifier, Operation, OperationList};

fn sample_ops(id: &str) -> OperationList {
    OperationList::with_operations(
        Identifier::from(id),
        vec![
            Operation::Crop {
                x: 0,
                y: 0,
                width: 100,
                height: 100,
            },
            Operation::ScaleToWidth(200),
        ],
        Format::Jpeg,
    )
}

#[test]
fn test_identifier_md5_is_32_hex_chars() {
    let digest = Identifier::from("cats/birman.jpg").md5();
    assert_eq!(digest.len(), 32);
    assert!(digest.chars().all(|c| c.is_ascii_hexdigit()));
    assert_eq!(digest, digest.to_lowercase());
}

#[test]
fn test_filename_is_deterministic() {
    assert_eq!(sample_ops("cats").filename(), sample_ops("cats").filename());
}

#[test]
fn test_filename_starts_with_identifier_digest() {
    let ops = sample_ops("cats");
    assert!(ops.filename().starts_with(&ops.identifier().md5()));
}

#[test]
fn test_filename_carries_format_extension() {
    assert!(sample_ops("cats").filename().ends_with(".jpg"));
    let png = OperationList::new(Identifier::from("cats"), Format::Png);
    assert!(png.filename().ends_with(".png"));
}

#[test]
fn test_equality_follows_rendering() {
    assert_eq!(sample_ops("cats"), sample_ops("cats"));
    assert_ne!(sample_ops("cats"), sample_ops("dogs"));

    // Same identifier, different operations.
    let mut other = sample_ops("cats");
    other.push(Operation::Rotate(90));
    assert_ne!(sample_ops("cats"), other);

    // Same identifier and operations, different format.
    let jpeg = OperationList::new(Identifier::from("cats"), Format::Jpeg);
    let webp = OperationList::new(Identifier::from("cats"), Format::Webp);
    assert_ne!(jpeg, webp);
}

#[test]
fn test_cache_key_renderings() {
    let id = Identifier::from("cats");
    let info_key = CacheKey::Info(id.clone());
    assert_eq!(info_key.rendering(), "id:cats");
    assert!(info_key.is_info());

    let ops = sample_ops("cats");
    let variant_key = CacheKey::Variant(ops.clone());
    assert_eq!(variant_key.rendering(), format!("op:{}", ops.filename()));
    assert!(!variant_key.is_info());

    assert_eq!(variant_key.identifier(), &id);
    assert_ne!(info_key, variant_key);
    assert_eq!(info_key, CacheKey::Info(id));
}
