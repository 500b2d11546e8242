use std::collections::HashMap;

use axum::extract::Multipart;

use crate::{error::{Error, RsResult}, tools::log::{log_error, LogServiceType}};

pub mod ping;
pub mod mw_auth;
pub mod employees;
pub mod recognition;
pub mod attendance;

/// Multipart upload with `image` (or `images`) files and plain text fields.
#[derive(Debug, Default)]
pub struct ImageUpload {
    pub images: Vec<Vec<u8>>,
    pub fields: HashMap<String, String>,
}

impl ImageUpload {
    pub async fn read(mut multipart: Multipart) -> RsResult<Self> {
        let mut upload = ImageUpload::default();
        while let Some(field) = multipart.next_field().await.map_err(|e| Error::InvalidParams(format!("Invalid multipart body: {}", e)))? {
            let name = field.name().unwrap_or_default().to_string();
            if name == "image" || name == "images" {
                let bytes = field.bytes().await.map_err(|e| {
                    log_error(LogServiceType::Other, format!("Unable to read uploaded image: {}", e));
                    Error::InvalidParams(format!("Unable to read image: {}", e))
                })?;
                upload.images.push(bytes.to_vec());
            } else {
                let text = field.text().await.map_err(|e| Error::InvalidParams(format!("Invalid field {}: {}", name, e)))?;
                upload.fields.insert(name, text);
            }
        }
        Ok(upload)
    }

    /// First uploaded image.
    pub fn take_image(&mut self) -> RsResult<Vec<u8>> {
        if self.images.is_empty() {
            return Err(Error::InvalidParams("Missing image field".to_string()));
        }
        Ok(self.images.remove(0))
    }

    /// Every uploaded image, in upload order.
    pub fn take_images(&mut self) -> RsResult<Vec<Vec<u8>>> {
        if self.images.is_empty() {
            return Err(Error::InvalidParams("Missing image field".to_string()));
        }
        Ok(std::mem::take(&mut self.images))
    }

    pub fn field(&self, name: &str) -> &str {
        self.fields.get(name).map(String::as_str).unwrap_or_default()
    }
}
