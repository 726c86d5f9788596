//! Retrievable garment documents and their image reference layout.

use serde::{Deserialize, Serialize};

/// Number of image references every document carries.
pub const IMAGE_REFERENCE_COUNT: usize = 4;

/// Position of the downloadable pattern asset inside `image_references`.
/// The result assembler issues a time-limited link for this slot only.
pub const PATTERN_IMAGE_INDEX: usize = 3;

/// The atomic retrievable unit: one garment with its synthesized
/// description and storage-native image locators.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GarmentDocument {
    /// Stable identifier, derived from the source folder name.
    pub id: String,
    /// Synthesized natural-language description; the embedding input.
    pub description: String,
    /// Exactly four object keys in significant order: back render, front
    /// render, texture, pattern.
    pub image_references: Vec<String>,
}

impl GarmentDocument {
    /// Builds a document with the canonical image key layout for a garment
    /// folder.
    pub fn new(id: impl Into<String>, description: String, folder_prefix: &str) -> Self {
        let id = id.into();
        let image_references = image_keys(folder_prefix, &id);
        Self {
            id,
            description,
            image_references,
        }
    }
}

/// Canonical image object keys for a garment folder, in the significant
/// order the assembler relies on.
pub fn image_keys(folder_prefix: &str, id: &str) -> Vec<String> {
    vec![
        format!("{folder_prefix}{id}_render_back.png"),
        format!("{folder_prefix}{id}_render_front.png"),
        format!("{folder_prefix}{id}_texture.png"),
        format!("{folder_prefix}{id}_pattern.png"),
    ]
}
