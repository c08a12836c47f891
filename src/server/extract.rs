use axum::extract::FromRequest;

use crate::core::errors::ApiError;

/// `Json` body whose rejections use the `{"error": ...}` shape.
#[derive(Debug, FromRequest)]
#[from_request(via(axum::Json), rejection(ApiError))]
pub struct ApiJson<T>(pub T);
