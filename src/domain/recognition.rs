use serde::{Deserialize, Serialize};

use super::embedding::Embedding;

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
pub struct RegisterOutcome {
    pub success: bool,
    pub message: String,
}

impl RegisterOutcome {
    pub fn registered(samples_count: u32, prototypes: usize) -> Self {
        let message = if samples_count <= 1 {
            "Employee registered".to_string()
        } else {
            format!("Employee embedding updated ({} samples, {} prototypes)", samples_count, prototypes)
        };
        Self { success: true, message }
    }

    pub fn failed(message: impl Into<String>) -> Self {
        Self { success: false, message: message.into() }
    }
}

/// Most photos accepted in one batch registration.
pub const MAX_BATCH_PHOTOS: usize = 10;
/// Fewest photos accepted when the batch creates the identity.
pub const MIN_INITIAL_PHOTOS: usize = 5;

/// Result for one photo of a batch, `index` is its position in the upload.
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
pub struct PhotoOutcome {
    pub index: usize,
    pub success: bool,
    pub message: String,
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
pub struct BatchRegisterOutcome {
    pub success: bool,
    pub message: String,
    pub photos_processed: usize,
    pub failed_photos: usize,
    pub results: Vec<PhotoOutcome>,
}

impl BatchRegisterOutcome {
    pub fn from_results(results: Vec<PhotoOutcome>) -> Self {
        let photos_processed = results.iter().filter(|r| r.success).count();
        let failed_photos = results.len() - photos_processed;
        Self {
            success: photos_processed > 0,
            message: format!("{} of {} photos registered", photos_processed, results.len()),
            photos_processed,
            failed_photos,
            results,
        }
    }
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
pub struct RecognizeOutcome {
    pub recognized: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub identity_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub confidence: Option<f32>,
}

impl RecognizeOutcome {
    pub fn unrecognized() -> Self {
        Self { recognized: false, identity_id: None, confidence: None }
    }
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
pub struct ExtractOutcome {
    pub success: bool,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub embedding: Option<Embedding>,
}
