pub mod auth;
pub mod devices;
pub mod health;
pub mod history;
pub mod notifications;
pub mod schedules;

use serde::Serialize;

/// All API responses follow `{success, message, data}`.
#[derive(Debug, Serialize)]
pub struct ApiResponse<T> {
    pub success: bool,
    pub message: String,
    pub data: T,
}

impl<T> ApiResponse<T> {
    pub fn ok(data: T) -> Self {
        ApiResponse {
            success: true,
            message: "ok".to_string(),
            data,
        }
    }
}
