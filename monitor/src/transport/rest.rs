use std::time::Duration;

use serde::de::DeserializeOwned;
use shared_types::{BreakpointConfig, ChannelKind, Span};

use super::error::TransportError;

/// Thin client for the REST surface of the instrumented framework.
#[derive(Debug, Clone)]
pub struct RestClient {
    http: reqwest::Client,
    /// No overall timeout; stream bodies stay open indefinitely.
    stream_http: reqwest::Client,
    base: String,
}

impl RestClient {
    pub fn new(base: impl Into<String>, timeout: Duration) -> Result<Self, TransportError> {
        let base = base.into();
        let client_error = |e: reqwest::Error| TransportError::Other {
            endpoint: base.clone(),
            detail: format!("http client: {e}"),
        };
        let http = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(client_error)?;
        let stream_http = reqwest::Client::builder()
            .connect_timeout(timeout)
            .build()
            .map_err(client_error)?;
        Ok(Self {
            http,
            stream_http,
            base,
        })
    }

    pub fn url(&self, path: &str) -> String {
        format!("{}{}", self.base, path)
    }

    async fn check(
        endpoint: &str,
        response: reqwest::Response,
    ) -> Result<reqwest::Response, TransportError> {
        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }
        let body = response.text().await.unwrap_or_default();
        Err(TransportError::HttpStatus {
            endpoint: endpoint.to_string(),
            status: status.as_u16(),
            body,
        })
    }

    async fn get_json<T: DeserializeOwned>(
        &self,
        endpoint: &str,
        request: reqwest::RequestBuilder,
    ) -> Result<T, TransportError> {
        let response = request
            .header(reqwest::header::ACCEPT, "application/json")
            .send()
            .await
            .map_err(|e| TransportError::from_reqwest(endpoint, e))?;
        let response = Self::check(endpoint, response).await?;
        let body = response
            .bytes()
            .await
            .map_err(|e| TransportError::from_reqwest(endpoint, e))?;
        serde_json::from_slice(&body).map_err(|e| TransportError::Malformed {
            endpoint: endpoint.to_string(),
            detail: e.to_string(),
        })
    }

    /// `GET /spans`, optionally only the records after `after_id`.
    ///
    /// Elements that are not JSON objects are dropped, the same way the span
    /// socket drops such frames.
    pub async fn fetch_spans(&self, after_id: Option<&str>) -> Result<Vec<Span>, TransportError> {
        let endpoint = self.url("/spans");
        let mut request = self.http.get(&endpoint);
        if let Some(id) = after_id {
            request = request.query(&[("after_id", id)]);
        }
        let records: Vec<serde_json::Value> = self.get_json(&endpoint, request).await?;
        let received = records.len();
        let spans: Vec<Span> = records.iter().filter_map(Span::try_from_value).collect();
        if spans.len() < received {
            tracing::warn!(
                endpoint = %endpoint,
                dropped = received - spans.len(),
                "Dropping span records that are not objects"
            );
        }
        tracing::debug!(count = spans.len(), after_id = ?after_id, "Fetched spans");
        Ok(spans)
    }

    pub async fn fetch_break(&self) -> Result<bool, TransportError> {
        let endpoint = self.url("/break");
        self.get_json(&endpoint, self.http.get(&endpoint)).await
    }

    /// `POST /break` flips the server-side state; read it back with
    /// [`RestClient::fetch_break`].
    pub async fn toggle_break(&self) -> Result<(), TransportError> {
        let endpoint = self.url("/break");
        let response = self
            .http
            .post(&endpoint)
            .send()
            .await
            .map_err(|e| TransportError::from_reqwest(&endpoint, e))?;
        Self::check(&endpoint, response).await?;
        Ok(())
    }

    pub async fn fetch_breakpoints(&self) -> Result<BreakpointConfig, TransportError> {
        let endpoint = self.url("/breakpoints");
        self.get_json(&endpoint, self.http.get(&endpoint)).await
    }

    pub async fn push_breakpoints(&self, config: &BreakpointConfig) -> Result<(), TransportError> {
        let endpoint = self.url("/breakpoints");
        let response = self
            .http
            .post(&endpoint)
            .json(config)
            .send()
            .await
            .map_err(|e| TransportError::from_reqwest(&endpoint, e))?;
        Self::check(&endpoint, response).await?;
        Ok(())
    }

    /// Open a chunked stream body (`GET /stream` or `GET /stream/tool`).
    pub async fn open_stream(&self, kind: ChannelKind) -> Result<reqwest::Response, TransportError> {
        let endpoint = self.url(kind.path());
        let response = self
            .stream_http
            .get(&endpoint)
            .send()
            .await
            .map_err(|e| TransportError::from_reqwest(&endpoint, e))?;
        Self::check(&endpoint, response).await
    }
}
