use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use serde_json::{Value, json};

use crate::error::CalsyncError;

/// Type tag carried by every figure record on the wire.
pub const FIGURE_TYPE_PNG_BASE64: &str = "png/base64";

/// Encode raw PNG bytes as the tagged record stored under a `figure` child.
/// Deterministic; `decode_figure` recovers the exact input.
pub fn encode_figure(file_name: &str, bytes: &[u8]) -> Value {
    json!({
        "data": STANDARD.encode(bytes),
        "__type__": FIGURE_TYPE_PNG_BASE64,
        "file_name": file_name,
    })
}

/// Decode a figure record back into its file name and raw bytes.
pub fn decode_figure(record: &Value) -> Result<(String, Vec<u8>), CalsyncError> {
    let type_tag = record
        .get("__type__")
        .and_then(|value| value.as_str())
        .unwrap_or("<missing>");
    if type_tag != FIGURE_TYPE_PNG_BASE64 {
        return Err(CalsyncError::UnsupportedFigureType(type_tag.to_string()));
    }

    let file_name = record
        .get("file_name")
        .and_then(|value| value.as_str())
        .filter(|name| !name.is_empty())
        .ok_or(CalsyncError::MissingFileName)?;

    let data = record
        .get("data")
        .and_then(|value| value.as_str())
        .ok_or_else(|| CalsyncError::InvalidFigureData("data field missing".to_string()))?;
    let bytes = STANDARD
        .decode(data)
        .map_err(|err| CalsyncError::InvalidFigureData(err.to_string()))?;

    Ok((file_name.to_string(), bytes))
}
