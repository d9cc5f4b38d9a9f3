use actix_multipart::{Field, Multipart};
use futures_util::TryStreamExt;
use std::collections::HashMap;

use crate::error::{ApiError, ApiResult};
use crate::uploads::UploadError;

const TEXT_FIELD_LIMIT: usize = 16 * 1024;

/// A file part of a multipart form
pub struct ImagePart {
    pub data: Vec<u8>,
    pub content_type: String,
}

/// Parsed multipart form: text fields by name plus at most one image
#[derive(Default)]
pub struct UploadForm {
    pub fields: HashMap<String, String>,
    pub image: Option<ImagePart>,
}

impl UploadForm {
    pub fn text(&self, name: &str) -> Option<&str> {
        self.fields.get(name).map(String::as_str)
    }
}

fn bad_form(e: actix_multipart::MultipartError) -> ApiError {
    ApiError::BadRequest(format!("Invalid multipart body: {}", e))
}

/// Read a multipart body. Parts named `image_field` are treated as the image
/// and limited to `max_image_bytes`; an empty file part counts as no image.
pub async fn read_upload_form(
    mut payload: Multipart,
    image_field: &str,
    max_image_bytes: usize,
) -> ApiResult<UploadForm> {
    let mut form = UploadForm::default();

    while let Some(field) = payload.try_next().await.map_err(bad_form)? {
        let name = field.name().unwrap_or_default().to_string();

        if name == image_field {
            let content_type = field
                .content_type()
                .map(|m| m.essence_str().to_string())
                .unwrap_or_default();
            let data = read_field(field, max_image_bytes)
                .await?
                .ok_or(UploadError::TooLarge(max_image_bytes))?;
            if !data.is_empty() {
                form.image = Some(ImagePart { data, content_type });
            }
        } else {
            let data = read_field(field, TEXT_FIELD_LIMIT)
                .await?
                .ok_or_else(|| ApiError::BadRequest(format!("Field {} is too long", name)))?;
            let text = String::from_utf8(data)
                .map_err(|_| ApiError::BadRequest(format!("Field {} is not valid UTF-8", name)))?;
            form.fields.insert(name, text);
        }
    }

    Ok(form)
}

/// Collect a part; None when it exceeds `limit` bytes
async fn read_field(mut field: Field, limit: usize) -> ApiResult<Option<Vec<u8>>> {
    let mut data = Vec::new();
    while let Some(chunk) = field.try_next().await.map_err(bad_form)? {
        if data.len() + chunk.len() > limit {
            return Ok(None);
        }
        data.extend_from_slice(&chunk);
    }
    Ok(Some(data))
}
