use serde::{Deserialize, Serialize};
use ts_rs::TS;

/// JSON envelope shared by every REST endpoint.
#[derive(Debug, Clone, Serialize, Deserialize, TS)]
pub struct ApiResponse<T> {
    success: bool,
    data: Option<T>,
    message: Option<String>,
}

impl<T> ApiResponse<T> {
    pub fn success(data: T) -> Self {
        Self {
            success: true,
            data: Some(data),
            message: None,
        }
    }

    pub fn error(message: &str) -> Self {
        Self {
            success: false,
            data: None,
            message: Some(message.to_string()),
        }
    }

    pub fn is_success(&self) -> bool {
        self.success
    }

    pub fn message(&self) -> Option<&str> {
        self.message.as_deref()
    }

    /// Consume the envelope and return its payload
    pub fn into_data(self) -> Option<T> {
        self.data
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn error_envelope_serializes_without_data() {
        let response: ApiResponse<()> = ApiResponse::error("sync already running");
        let json = serde_json::to_value(&response).unwrap();
        assert_eq!(json["success"], false);
        assert!(json["data"].is_null());
        assert_eq!(json["message"], "sync already running");
    }

    #[test]
    fn success_envelope_round_trips_payload() {
        let json = r#"{"success":true,"data":[1,2,3],"message":null}"#;
        let response: ApiResponse<Vec<u32>> = serde_json::from_str(json).unwrap();
        assert!(response.is_success());
        assert_eq!(response.into_data(), Some(vec![1, 2, 3]));
    }
}
