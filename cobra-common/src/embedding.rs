//! Text codec for the `video_embedding.embedding` column
//!
//! Vectors are stored as a JSON array of numbers, e.g. `[0.1, -0.25, 3.0]`.
//! Values are `f32`; the writer emits the shortest decimal form that parses
//! back to the identical `f32`, so a store → index rebuild is lossless.
//! The reader accepts any JSON numbers (including integers such as `[0, 0, 1]`)
//! and narrows them to `f32`.

use crate::{Error, Result};

/// Serialize an embedding for storage
pub fn encode_embedding(vector: &[f32]) -> Result<String> {
    validate(vector)?;
    serde_json::to_string(vector).map_err(|e| Error::Codec(e.to_string()))
}

/// Parse a stored embedding
pub fn decode_embedding(text: &str) -> Result<Vec<f32>> {
    let vector: Vec<f32> =
        serde_json::from_str(text.trim()).map_err(|e| Error::Codec(e.to_string()))?;
    validate(&vector)?;
    Ok(vector)
}

fn validate(vector: &[f32]) -> Result<()> {
    if vector.is_empty() {
        return Err(Error::Codec("embedding has no dimensions".to_string()));
    }
    if let Some(position) = vector.iter().position(|v| !v.is_finite()) {
        return Err(Error::Codec(format!(
            "embedding value at index {} is not finite",
            position
        )));
    }
    Ok(())
}
