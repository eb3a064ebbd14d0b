use serde::{Deserialize, Serialize};

/// Body of every error response
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorResponse {
    pub message: String,
}

/// Printed once on stdout when the server was asked for any free port
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServerInfo {
    pub host: String,
    pub port: u16,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_server_info_line() {
        let info = ServerInfo {
            host: "127.0.0.1".to_string(),
            port: 40123,
        };
        assert_eq!(
            serde_json::to_string(&info).unwrap(),
            r#"{"host":"127.0.0.1","port":40123}"#
        );
    }

    #[test]
    fn test_error_response_shape() {
        let body = ErrorResponse {
            message: "Not Found".to_string(),
        };
        assert_eq!(
            serde_json::to_value(&body).unwrap(),
            serde_json::json!({"message": "Not Found"})
        );
    }
}
