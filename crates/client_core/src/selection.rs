//! Holds the single image the user currently has selected.

use shared::{domain::SelectionId, error::AnalysisError};
use tracing::debug;

use crate::validator::{validate, FileCandidate, FileValidation, SelectedImage};

#[derive(Debug, Clone)]
pub struct Selection {
    pub id: SelectionId,
    pub image: SelectedImage,
}

#[derive(Debug, Default)]
pub struct SelectionStore {
    current: Option<Selection>,
    last_id: u64,
}

impl SelectionStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Replaces the selection when `file` is an image; otherwise the prior selection stays.
    pub fn select(&mut self, file: FileCandidate) -> Result<&Selection, AnalysisError> {
        let image = match validate(file) {
            FileValidation::Accepted(image) => image,
            FileValidation::Rejected { reason } => {
                debug!(reason, "selection: file rejected");
                return Err(AnalysisError::InvalidFile {
                    reason: reason.to_string(),
                });
            }
        };

        self.last_id += 1;
        let id = SelectionId(self.last_id);
        if let Some(previous) = &self.current {
            debug!(previous = %previous.id, next = %id, "selection: replaced");
        }
        Ok(&*self.current.insert(Selection { id, image }))
    }

    pub fn clear(&mut self) -> Option<Selection> {
        self.current.take()
    }

    pub fn current(&self) -> Option<&Selection> {
        self.current.as_ref()
    }

    pub fn is_current(&self, id: SelectionId) -> bool {
        self.current.as_ref().is_some_and(|selection| selection.id == id)
    }
}

#[cfg(test)]
#[path = "tests/selection_tests.rs"]
mod tests;
