use axum::{
    Json,
    http::StatusCode,
    response::{IntoResponse, Response},
};
use inference::DetectError;
use serde::Serialize;

/// `/detect` failure rendered as a JSON error body. Never carries `bboxes`.
#[derive(Debug)]
pub struct ApiError(pub DetectError);

#[derive(Debug, Serialize)]
pub struct ErrorBody {
    pub error: &'static str,
    pub message: String,
}

impl ApiError {
    /// Body did not parse, had unknown fields or an unusable URL.
    pub fn invalid_request(message: impl Into<String>) -> Self {
        ApiError(DetectError::ShapeMismatch(message.into()))
    }

    pub fn status(&self) -> StatusCode {
        match &self.0 {
            DetectError::ShapeMismatch(_) | DetectError::Preprocess(_) => {
                StatusCode::UNPROCESSABLE_ENTITY
            }
            DetectError::Fetch(_) => StatusCode::BAD_GATEWAY,
            DetectError::BatchDispatch(_) | DetectError::RunnerClosed => {
                StatusCode::SERVICE_UNAVAILABLE
            }
            DetectError::AdmissionTimeout(_) => StatusCode::GATEWAY_TIMEOUT,
        }
    }
}

impl From<DetectError> for ApiError {
    fn from(e: DetectError) -> Self {
        ApiError(e)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let body = ErrorBody {
            error: self.0.kind(),
            message: self.0.to_string(),
        };
        (self.status(), Json(body)).into_response()
    }
}
