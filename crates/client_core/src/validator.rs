//! Media-type gate for files offered by the user.

use std::sync::Arc;

use shared::error::{AnalysisError, NOT_AN_IMAGE};

const IMAGE_MEDIA_TYPE_PREFIX: &str = "image/";

/// A file as handed over by a picker or drop target, before any checks.
#[derive(Debug, Clone)]
pub struct FileCandidate {
    pub name: String,
    pub media_type: Option<String>,
    pub bytes: Arc<[u8]>,
}

impl FileCandidate {
    pub fn new(
        name: impl Into<String>,
        media_type: Option<impl Into<String>>,
        bytes: impl Into<Arc<[u8]>>,
    ) -> Self {
        Self {
            name: name.into(),
            media_type: media_type.map(Into::into),
            bytes: bytes.into(),
        }
    }
}

/// An accepted image. Only [`validate`] builds one, so the media type is always `image/*`.
#[derive(Debug, Clone)]
pub struct SelectedImage {
    name: String,
    media_type: String,
    bytes: Arc<[u8]>,
}

impl SelectedImage {
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn media_type(&self) -> &str {
        &self.media_type
    }

    pub fn bytes(&self) -> &[u8] {
        &self.bytes
    }

    pub fn len(&self) -> usize {
        self.bytes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bytes.is_empty()
    }
}

#[derive(Debug, Clone)]
pub enum FileValidation {
    Accepted(SelectedImage),
    Rejected { reason: &'static str },
}

impl FileValidation {
    pub fn is_accepted(&self) -> bool {
        matches!(self, Self::Accepted(_))
    }

    pub fn into_result(self) -> Result<SelectedImage, AnalysisError> {
        match self {
            Self::Accepted(image) => Ok(image),
            Self::Rejected { reason } => Err(AnalysisError::InvalidFile {
                reason: reason.to_string(),
            }),
        }
    }
}

pub fn validate(file: FileCandidate) -> FileValidation {
    let FileCandidate {
        name,
        media_type,
        bytes,
    } = file;

    match media_type {
        Some(media_type) if media_type.starts_with(IMAGE_MEDIA_TYPE_PREFIX) => {
            FileValidation::Accepted(SelectedImage {
                name,
                media_type,
                bytes,
            })
        }
        _ => FileValidation::Rejected {
            reason: NOT_AN_IMAGE,
        },
    }
}

#[cfg(test)]
#[path = "tests/validator_tests.rs"]
mod tests;
