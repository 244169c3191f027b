use std::future::Future;
use std::time::Duration;

use reqwest::{Client, Response, StatusCode};
use url::Url;

use impulse_core::RemoteChange;

use crate::error::SyncError;
use crate::protocol::{ChangeBatch, PushRequest};

/// Transport used by a replication session.
///
/// The trait is the seam between the session loop and the wire: tests
/// drive the loop with an in-memory transport, production uses
/// [`HttpTransport`].
pub trait ReplicationTransport: Send + Sync + 'static {
    /// Initial handshake against the endpoint.
    fn handshake(&self) -> impl Future<Output = Result<(), SyncError>> + Send;

    /// Pull a page of remote changes after the given feed position.
    fn pull(
        &self,
        since: Option<&str>,
        limit: usize,
    ) -> impl Future<Output = Result<ChangeBatch, SyncError>> + Send;

    /// Push a batch of local changes outward.
    fn push(&self, changes: &[RemoteChange]) -> impl Future<Output = Result<(), SyncError>> + Send;
}

/// HTTP transport against a CouchDB-style replication endpoint.
#[derive(Debug)]
pub struct HttpTransport {
    client: Client,
    base: Url,
}

impl HttpTransport {
    pub fn new(endpoint: &str) -> Result<Self, SyncError> {
        let mut base = Url::parse(endpoint)
            .map_err(|e| SyncError::InvalidEndpoint(format!("{}: {}", endpoint, e)))?;
        // Keep joins relative to the database, not its parent.
        if !base.path().ends_with('/') {
            let path = format!("{}/", base.path());
            base.set_path(&path);
        }
        let client = Client::builder()
            .timeout(Duration::from_secs(30))
            .user_agent("impulse-sync/0.1")
            .build()
            .map_err(|e| SyncError::Transport(format!("client: {}", e)))?;
        Ok(Self { client, base })
    }

    pub fn endpoint(&self) -> &Url {
        &self.base
    }

    fn route(&self, segment: &str) -> Result<Url, SyncError> {
        self.base
            .join(segment)
            .map_err(|e| SyncError::InvalidEndpoint(format!("{}: {}", segment, e)))
    }

    fn check(response: Response) -> Result<Response, SyncError> {
        match response.status() {
            StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => Err(SyncError::AuthDenied(
                format!("{} from {}", response.status(), response.url()),
            )),
            status if !status.is_success() => Err(SyncError::Transport(format!(
                "{} from {}",
                status,
                response.url()
            ))),
            _ => Ok(response),
        }
    }
}

impl ReplicationTransport for HttpTransport {
    async fn handshake(&self) -> Result<(), SyncError> {
        let response = self
            .client
            .get(self.base.clone())
            .send()
            .await
            .map_err(|e| SyncError::Transport(format!("handshake: {}", e)))?;
        Self::check(response)?;
        Ok(())
    }

    async fn pull(&self, since: Option<&str>, limit: usize) -> Result<ChangeBatch, SyncError> {
        let mut url = self.route("_changes")?;
        {
            let mut query = url.query_pairs_mut();
            query.append_pair("include_docs", "true");
            query.append_pair("limit", &limit.to_string());
            if let Some(since) = since {
                query.append_pair("since", since);
            }
        }
        let response = self
            .client
            .get(url)
            .send()
            .await
            .map_err(|e| SyncError::Transport(format!("pull: {}", e)))?;
        let response = Self::check(response)?;
        response
            .json::<ChangeBatch>()
            .await
            .map_err(|e| SyncError::Transport(format!("pull body: {}", e)))
    }

    async fn push(&self, changes: &[RemoteChange]) -> Result<(), SyncError> {
        if changes.is_empty() {
            return Ok(());
        }
        let url = self.route("_bulk_docs")?;
        let body = PushRequest {
            docs: changes,
            new_edits: false,
        };
        let response = self
            .client
            .post(url)
            .json(&body)
            .send()
            .await
            .map_err(|e| SyncError::Transport(format!("push: {}", e)))?;
        Self::check(response)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn endpoint_gets_trailing_slash() {
        let transport = HttpTransport::new("http://example.test/shopping").unwrap();
        assert_eq!(transport.endpoint().path(), "/shopping/");
        let url = transport.route("_changes").unwrap();
        assert_eq!(url.path(), "/shopping/_changes");
    }

    #[test]
    fn garbage_endpoint_is_rejected() {
        let err = HttpTransport::new("not a url").unwrap_err();
        assert!(matches!(err, SyncError::InvalidEndpoint(_)));
    }
}
