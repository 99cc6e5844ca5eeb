//! Entry-point validators (spec §4.14): document shape, collection name
//! regex, vector dimensions, limit/threshold bounds, SQL identifier safety,
//! blob size caps. These run before anything touches the database or an
//! embedding provider and fail with [`ErrorKind::Validation`].

use std::sync::LazyLock;

use regex::Regex;

use crate::errors::{AppError, ErrorKind};

/// `^[A-Za-z0-9_-]{1,64}$` per spec §3 Document/Collection invariant.
static COLLECTION_NAME_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^[A-Za-z0-9_-]{1,64}$").expect("valid regex"));

/// SQL identifiers we build dynamically (table/column names derived from
/// collection names) must match this — never interpolate arbitrary text
/// into SQL structure, even though values are always bound as parameters.
static IDENTIFIER_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^[A-Za-z_][A-Za-z0-9_]{0,63}$").expect("valid regex"));

pub const MAX_BLOB_BYTES: usize = 16 * 1024 * 1024;
pub const MAX_LIMIT: usize = 1000;

pub fn validate_collection_name(name: &str) -> Result<(), AppError> {
    if COLLECTION_NAME_RE.is_match(name) {
        Ok(())
    } else {
        Err(AppError::new(
            ErrorKind::Validation,
            format!(
                "collection name '{name}' must match ^[A-Za-z0-9_-]{{1,64}}$"
            ),
        ))
    }
}

pub fn validate_sql_identifier(name: &str) -> Result<(), AppError> {
    if IDENTIFIER_RE.is_match(name) {
        Ok(())
    } else {
        Err(AppError::new(
            ErrorKind::Validation,
            format!("'{name}' is not a safe SQL identifier"),
        ))
    }
}

/// Document shape invariant: at least one of {title, content} non-empty.
pub fn validate_document_shape(title: Option<&str>, content: Option<&str>) -> Result<(), AppError> {
    let title_present = title.map(|t| !t.trim().is_empty()).unwrap_or(false);
    let content_present = content.map(|c| !c.trim().is_empty()).unwrap_or(false);
    if title_present || content_present {
        Ok(())
    } else {
        Err(AppError::new(
            ErrorKind::Validation,
            "document requires a non-empty title or content",
        ))
    }
}

pub fn validate_metadata(metadata: &serde_json::Value) -> Result<(), AppError> {
    if metadata.is_null() || metadata.is_object() {
        Ok(())
    } else {
        Err(AppError::new(
            ErrorKind::Validation,
            "document metadata must be a JSON object",
        ))
    }
}

pub fn validate_vector_dimensions(vector_len: usize, expected: u32) -> Result<(), AppError> {
    if vector_len == expected as usize {
        Ok(())
    } else {
        Err(AppError::new(
            ErrorKind::Validation,
            format!(
                "vector has {vector_len} dimensions, collection expects {expected}"
            ),
        ))
    }
}

pub fn validate_limit(limit: usize) -> Result<(), AppError> {
    if limit == 0 {
        Err(AppError::new(ErrorKind::Validation, "limit must be >= 1"))
    } else if limit > MAX_LIMIT {
        Err(AppError::new(
            ErrorKind::Validation,
            format!("limit {limit} exceeds the maximum of {MAX_LIMIT}"),
        ))
    } else {
        Ok(())
    }
}

pub fn validate_threshold(threshold: f32) -> Result<(), AppError> {
    if (0.0..=1.0).contains(&threshold) {
        Ok(())
    } else {
        Err(AppError::new(
            ErrorKind::Validation,
            format!("threshold {threshold} must be within [0.0, 1.0]"),
        ))
    }
}

pub fn validate_blob_size(len: usize) -> Result<(), AppError> {
    if len > MAX_BLOB_BYTES {
        Err(AppError::new(
            ErrorKind::Validation,
            format!("blob of {len} bytes exceeds the {MAX_BLOB_BYTES}-byte cap"),
        ))
    } else {
        Ok(())
    }
}

/// Fusion weights must sum to 1.0 within +/-0.01 for weighted methods
/// (spec §4.10).
pub fn validate_fusion_weights(weights: &[f32]) -> Result<(), AppError> {
    let sum: f32 = weights.iter().sum();
    if (sum - 1.0).abs() <= 0.01 {
        Ok(())
    } else {
        Err(AppError::new(
            ErrorKind::Validation,
            format!("fusion weights sum to {sum}, expected 1.0 +/- 0.01"),
        ))
    }
}
