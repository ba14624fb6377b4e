//! Test assertions for documents.

use crate::core::{Document, Grade};

/// Asserts the document sits at the expected `Stage#State` key.
pub fn assert_stage_state(document: &Document, expected: &str) {
    assert_eq!(
        document.stage_state.to_string(),
        expected,
        "Document '{}' is at {}, expected {}",
        document.document_id,
        document.stage_state,
        expected
    );
}

/// Asserts the current map's last grade.
pub fn assert_grade(document: &Document, expected: Grade) {
    let actual = document.current_map().actor_grade;
    assert_eq!(
        actual, expected,
        "Document '{}' has grade {actual}, expected {expected}",
        document.document_id
    );
}

/// Asserts the current map's retry count.
pub fn assert_retry_count(document: &Document, expected: u32) {
    let actual = document.current_map().retry_count;
    assert_eq!(
        actual, expected,
        "Document '{}' has retried {actual} times, expected {expected}",
        document.document_id
    );
}

/// Asserts how many error payloads the current map captured.
pub fn assert_exception_count(document: &Document, expected: usize) {
    let exceptions = &document.current_map().exceptions;
    assert_eq!(
        exceptions.len(),
        expected,
        "Document '{}' captured {:?}",
        document.document_id,
        exceptions
    );
}
