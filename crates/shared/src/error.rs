use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::domain::SubCallKind;

/// Stable reason shown when a selected file is not an image.
pub const NOT_AN_IMAGE: &str = "not an image";

#[derive(Debug, Clone, PartialEq, Eq, Error, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum AnalysisError {
    #[error("invalid file: {reason}")]
    InvalidFile { reason: String },
    #[error("no image selected")]
    NoImageSelected,
    #[error("{which} request failed: {reason}")]
    SubCallFailure { which: SubCallKind, reason: String },
    #[error("{which} request could not reach the inference service: {reason}")]
    NetworkFailure { which: SubCallKind, reason: String },
    #[error("analysis request was superseded")]
    Superseded,
}

impl AnalysisError {
    pub fn invalid_file() -> Self {
        Self::InvalidFile {
            reason: NOT_AN_IMAGE.to_string(),
        }
    }

    pub fn sub_call(which: SubCallKind, reason: impl Into<String>) -> Self {
        Self::SubCallFailure {
            which,
            reason: reason.into(),
        }
    }

    pub fn network(which: SubCallKind, reason: impl Into<String>) -> Self {
        Self::NetworkFailure {
            which,
            reason: reason.into(),
        }
    }

    /// Which half of an analysis failed, for errors scoped to a single sub-call.
    pub fn sub_call_kind(&self) -> Option<SubCallKind> {
        match self {
            Self::SubCallFailure { which, .. } | Self::NetworkFailure { which, .. } => {
                Some(*which)
            }
            _ => None,
        }
    }

    pub fn is_network(&self) -> bool {
        matches!(self, Self::NetworkFailure { .. })
    }
}
