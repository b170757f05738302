use chrono::Utc;
use shared_types::{ChannelKind, ErrorCategory, ErrorState};

#[derive(Debug, Clone, thiserror::Error)]
pub enum TransportError {
    #[error("Network error reaching {endpoint}: {detail}")]
    Network { endpoint: String, detail: String },

    #[error("HTTP error! status: {status} from {endpoint}")]
    HttpStatus {
        endpoint: String,
        status: u16,
        body: String,
    },

    #[error("Malformed payload from {endpoint}: {detail}")]
    Malformed { endpoint: String, detail: String },

    #[error("Channel {0} is not connected")]
    NotConnected(ChannelKind),

    #[error("Transport error at {endpoint}: {detail}")]
    Other { endpoint: String, detail: String },
}

impl TransportError {
    pub fn from_reqwest(endpoint: &str, err: reqwest::Error) -> Self {
        let endpoint = endpoint.to_string();
        let detail = err.to_string();
        if let Some(status) = err.status() {
            TransportError::HttpStatus {
                endpoint,
                status: status.as_u16(),
                body: String::new(),
            }
        } else if err.is_decode() {
            TransportError::Malformed { endpoint, detail }
        } else if err.is_connect() || err.is_timeout() || err.is_request() {
            TransportError::Network { endpoint, detail }
        } else {
            TransportError::Other { endpoint, detail }
        }
    }

    pub fn category(&self) -> ErrorCategory {
        match self {
            TransportError::Network { .. } | TransportError::NotConnected(_) => {
                ErrorCategory::Network
            }
            TransportError::HttpStatus { .. } => ErrorCategory::HttpStatus,
            TransportError::Malformed { .. } | TransportError::Other { .. } => {
                ErrorCategory::Generic
            }
        }
    }

    /// Undecodable payloads and missing sockets do not get better by waiting.
    pub fn is_retryable(&self) -> bool {
        !matches!(
            self,
            TransportError::Malformed { .. } | TransportError::NotConnected(_)
        )
    }

    pub fn endpoint(&self) -> String {
        match self {
            TransportError::Network { endpoint, .. }
            | TransportError::HttpStatus { endpoint, .. }
            | TransportError::Malformed { endpoint, .. }
            | TransportError::Other { endpoint, .. } => endpoint.clone(),
            TransportError::NotConnected(kind) => kind.path().to_string(),
        }
    }

    /// Actionable text for the error banner.
    pub fn user_message(&self) -> String {
        match self {
            TransportError::Network { endpoint, .. } => format!(
                "Unable to access the endpoint {endpoint}. Please ensure:\n\
                 1. The endpoint is running and accessible\n\
                 2. CORS is properly configured on the server\n\
                 3. The endpoint URL is correct"
            ),
            TransportError::HttpStatus { status, .. } => format!(
                "HTTP error! status: {status}\n\
                 Max retries reached. Please check the endpoint configuration."
            ),
            TransportError::NotConnected(kind) => {
                format!("The {kind} channel is not connected. Wait for it to reconnect and try again.")
            }
            TransportError::Malformed { detail, .. } | TransportError::Other { detail, .. } => {
                format!("{detail}\nPlease check the endpoint configuration.")
            }
        }
    }

    pub fn to_error_state(&self) -> ErrorState {
        ErrorState {
            category: self.category(),
            detail: self.user_message(),
            endpoint: self.endpoint(),
            occurred_at: Utc::now(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn categories_follow_variant() {
        let network = TransportError::Network {
            endpoint: "http://x/spans".into(),
            detail: "refused".into(),
        };
        let status = TransportError::HttpStatus {
            endpoint: "http://x/spans".into(),
            status: 500,
            body: String::new(),
        };
        let malformed = TransportError::Malformed {
            endpoint: "http://x/spans".into(),
            detail: "expected array".into(),
        };
        assert_eq!(network.category(), ErrorCategory::Network);
        assert_eq!(status.category(), ErrorCategory::HttpStatus);
        assert_eq!(malformed.category(), ErrorCategory::Generic);
        assert!(network.is_retryable());
        assert!(status.is_retryable());
        assert!(!malformed.is_retryable());
    }

    #[test]
    fn error_state_carries_endpoint_and_template() {
        let state = TransportError::HttpStatus {
            endpoint: "http://x/spans".into(),
            status: 503,
            body: "busy".into(),
        }
        .to_error_state();
        assert_eq!(state.endpoint, "http://x/spans");
        assert!(state.detail.contains("503"));
        assert!(state.detail.contains("Max retries reached"));
    }
}
