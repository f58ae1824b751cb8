// Uniform {success, data | error} envelope.

use serde::Serialize;

use crate::error::{PanelError, Result};

#[derive(Debug, Clone, Serialize)]
pub struct ApiError {
    pub kind: &'static str,
    pub message: String,
}

impl From<&PanelError> for ApiError {
    fn from(e: &PanelError) -> Self {
        Self {
            kind: e.kind(),
            message: e.to_string(),
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct ApiResponse<T> {
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<T>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<ApiError>,
}

impl<T> ApiResponse<T> {
    pub fn ok(data: T) -> Self {
        Self {
            success: true,
            data: Some(data),
            error: None,
        }
    }

    pub fn err(error: &PanelError) -> Self {
        Self {
            success: false,
            data: None,
            error: Some(error.into()),
        }
    }

    pub fn error_kind(&self) -> Option<&'static str> {
        self.error.as_ref().map(|e| e.kind)
    }
}

impl<T> From<Result<T>> for ApiResponse<T> {
    fn from(result: Result<T>) -> Self {
        match result {
            Ok(data) => Self::ok(data),
            Err(e) => Self::err(&e),
        }
    }
}
