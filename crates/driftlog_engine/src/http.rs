//! HTTP binding of the transport seam.
//!
//! The engine stays free of any concrete HTTP stack: callers supply an
//! [`HttpClient`] (a thin post-JSON closure over whatever client the
//! host application already uses) and [`HttpTransport`] maps the sync
//! endpoints onto it.

use serde::de::DeserializeOwned;
use serde::Serialize;
use tracing::debug;

use driftlog_protocol::{
    ActivityBatchRequest, ActivityBatchResponse, EntryListRequest, EntrySyncRequest,
    EntrySyncResponse, RemoteEntry, SyncToken,
};

use crate::error::{SyncError, SyncResult};
use crate::transport::SyncTransport;

/// Name of the header carrying the sync token.
pub const TOKEN_HEADER: &str = "AuthSyncToken";

/// A raw HTTP response: status code plus body text.
#[derive(Debug, Clone)]
pub struct HttpResponse {
    /// HTTP status code.
    pub status: u16,
    /// Response body.
    pub body: String,
}

/// Minimal HTTP client contract.
///
/// Implementations POST a JSON body with the token header attached and
/// return the raw response. A connection-level failure (DNS, refused,
/// reset) should come back as a retryable transport error.
pub trait HttpClient: Send + Sync {
    /// Sends a POST with `Content-Type: application/json` and the
    /// [`TOKEN_HEADER`] set to `token`.
    fn post_json(&self, url: &str, token: &str, body: &str) -> SyncResult<HttpResponse>;
}

/// [`SyncTransport`] implementation over an [`HttpClient`].
pub struct HttpTransport<C: HttpClient> {
    client: C,
    base_url: String,
}

impl<C: HttpClient> HttpTransport<C> {
    /// Creates a transport rooted at `base_url` (no trailing slash needed).
    pub fn new(client: C, base_url: impl Into<String>) -> Self {
        let mut base_url = base_url.into();
        while base_url.ends_with('/') {
            base_url.pop();
        }
        Self { client, base_url }
    }

    fn call<Req: Serialize, Resp: DeserializeOwned>(
        &self,
        path: &str,
        token: &SyncToken,
        request: &Req,
    ) -> SyncResult<Resp> {
        let url = format!("{}{path}", self.base_url);
        let body = serde_json::to_string(request)
            .map_err(|e| SyncError::Protocol(format!("encoding request: {e}")))?;

        debug!(%url, "sync request");
        let response = self.client.post_json(&url, token.as_str(), &body)?;

        match response.status {
            200..=299 => serde_json::from_str(&response.body)
                .map_err(|e| SyncError::Protocol(format!("decoding response: {e}"))),
            401 | 403 => Err(SyncError::transport_fatal(format!(
                "rejected token: HTTP {}",
                response.status
            ))),
            500..=599 => Err(SyncError::ServerError(format!(
                "HTTP {}: {}",
                response.status, response.body
            ))),
            // Anything else (404, 408, 429, ...) may clear up on its own;
            // let the retry driver back off and try again.
            status => Err(SyncError::transport_retryable(format!(
                "HTTP {status}: {}",
                response.body
            ))),
        }
    }
}

impl<C: HttpClient> SyncTransport for HttpTransport<C> {
    fn push_activities(
        &self,
        token: &SyncToken,
        request: &ActivityBatchRequest,
    ) -> SyncResult<ActivityBatchResponse> {
        self.call("/api/activities/batch", token, request)
    }

    fn sync_entries(
        &self,
        token: &SyncToken,
        request: &EntrySyncRequest,
    ) -> SyncResult<EntrySyncResponse> {
        self.call("/api/entries/sync", token, request)
    }

    fn list_entries(
        &self,
        token: &SyncToken,
        request: &EntryListRequest,
    ) -> SyncResult<Vec<RemoteEntry>> {
        self.call("/api/entries/list", token, request)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use parking_lot::Mutex;

    struct CannedClient {
        calls: Mutex<Vec<(String, String)>>,
        response: HttpResponse,
    }

    impl CannedClient {
        fn new(status: u16, body: &str) -> Self {
            Self {
                calls: Mutex::new(Vec::new()),
                response: HttpResponse {
                    status,
                    body: body.to_string(),
                },
            }
        }
    }

    impl HttpClient for CannedClient {
        fn post_json(&self, url: &str, token: &str, _body: &str) -> SyncResult<HttpResponse> {
            self.calls.lock().push((url.to_string(), token.to_string()));
            Ok(self.response.clone())
        }
    }

    fn token() -> SyncToken {
        SyncToken::parse("dlt_0123456789abcdef0123456789abcdef").unwrap()
    }

    #[test]
    fn routes_and_decodes() {
        let body = r#"{"success":true,"processed":0,"created":0,"updated":0,"checkpoint":"cp"}"#;
        let client = CannedClient::new(200, body);
        let transport = HttpTransport::new(client, "https://sync.example/");

        let resp = transport
            .push_activities(&token(), &ActivityBatchRequest::new(None, Vec::new()))
            .unwrap();
        assert_eq!(resp.checkpoint, "cp");

        let calls = transport.client.calls.lock();
        assert_eq!(calls[0].0, "https://sync.example/api/activities/batch");
        assert_eq!(calls[0].1, "dlt_0123456789abcdef0123456789abcdef");
    }

    #[test]
    fn auth_failure_is_fatal() {
        let client = CannedClient::new(401, "unauthorized");
        let transport = HttpTransport::new(client, "https://sync.example");
        let err = transport
            .push_activities(&token(), &ActivityBatchRequest::new(None, Vec::new()))
            .unwrap_err();
        assert!(!err.is_retryable());
    }

    #[test]
    fn server_error_is_retryable() {
        let client = CannedClient::new(503, "maintenance");
        let transport = HttpTransport::new(client, "https://sync.example");
        let err = transport
            .push_activities(&token(), &ActivityBatchRequest::new(None, Vec::new()))
            .unwrap_err();
        assert!(err.is_retryable());
    }

    #[test]
    fn unexpected_status_is_retryable() {
        for status in [404, 408, 429] {
            let client = CannedClient::new(status, "try later");
            let transport = HttpTransport::new(client, "https://sync.example");
            let err = transport
                .push_activities(&token(), &ActivityBatchRequest::new(None, Vec::new()))
                .unwrap_err();
            assert!(err.is_retryable(), "HTTP {status} should be retryable");
        }
    }

    #[test]
    fn garbage_body_is_protocol_error() {
        let client = CannedClient::new(200, "not json");
        let transport = HttpTransport::new(client, "https://sync.example");
        let err = transport
            .push_activities(&token(), &ActivityBatchRequest::new(None, Vec::new()))
            .unwrap_err();
        assert!(matches!(err, SyncError::Protocol(_)));
    }
}
