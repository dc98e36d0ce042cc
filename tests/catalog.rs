use std::fs;

use serde_json::json;

use usi_spectrum_service::catalog::{extract_publication_date, parse_page};

#[test]
fn publication_date_from_project_record() {
    let raw = fs::read_to_string("tests/fixtures/pride_project_PXD000966.json").unwrap();
    let value: serde_json::Value = serde_json::from_str(&raw).unwrap();
    assert_eq!(
        extract_publication_date(&value).as_deref(),
        Some("2013-04-17")
    );
}

#[test]
fn publication_date_missing_or_blank() {
    assert_eq!(extract_publication_date(&json!({ "accession": "PXD1" })), None);
    assert_eq!(extract_publication_date(&json!({ "publicationDate": null })), None);
    assert_eq!(extract_publication_date(&json!({ "publicationDate": "  " })), None);
}

#[test]
fn last_page_has_no_next_link() {
    let page = parse_page(json!({
        "_embedded": { "files": [ { "fileName": "a.raw", "fileSizeBytes": 1024 } ] },
        "_links": { "self": { "href": "https://catalog/files?page=3" } }
    }))
    .unwrap();
    assert_eq!(page.file_names, vec!["a.raw".to_string()]);
    assert_eq!(page.next, None);
}
