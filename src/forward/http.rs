//! HTTP side of the relay: one POST per message, no retries.

use std::path::Path;
use std::time::Duration;

use reqwest::header::CONTENT_TYPE;
use tracing::{debug, warn};

use crate::config::ForwardTarget;
use crate::forward::envelope::ForwardBody;
use crate::utils::{RelayError, Result};

const PROBE_TIMEOUT: Duration = Duration::from_secs(1);
/// Response bodies longer than this are cut in error messages.
const MAX_DETAIL_LEN: usize = 512;

/// Sends bodies to the function endpoint of a [`ForwardTarget`].
#[derive(Debug, Clone)]
pub struct Forwarder {
    http: reqwest::Client,
    endpoint: String,
    base_url: String,
    probe: bool,
    dump_path: Option<std::path::PathBuf>,
}

impl Forwarder {
    pub fn new(target: &ForwardTarget) -> Result<Self> {
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(target.request_timeout_secs))
            .build()?;
        Ok(Self {
            http,
            endpoint: target.endpoint(),
            base_url: target.base_url(),
            probe: target.probe,
            dump_path: target.dump_path.clone(),
        })
    }

    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }

    /// POSTs `body` and returns the response status when it is 2xx.
    ///
    /// Anything else, including a refused connection or a timeout, is a
    /// [`RelayError::Forward`]; the caller decides what happens to the message.
    pub async fn forward(&self, body: &ForwardBody) -> Result<u16> {
        if self.probe {
            self.probe().await?;
        }
        if let Some(path) = &self.dump_path {
            dump(path, body).await;
        }

        let bytes = serde_json::to_vec(&body.body)?;
        let response = self
            .http
            .post(&self.endpoint)
            .header(CONTENT_TYPE, body.content_type)
            .body(bytes)
            .send()
            .await
            .map_err(|e| self.failure(None, e.to_string()))?;

        let status = response.status();
        if status.is_success() {
            return Ok(status.as_u16());
        }

        let mut detail = response.text().await.unwrap_or_default();
        if detail.len() > MAX_DETAIL_LEN {
            let mut cut = MAX_DETAIL_LEN;
            while !detail.is_char_boundary(cut) {
                cut -= 1;
            }
            detail.truncate(cut);
        }
        Err(self.failure(Some(status.as_u16()), detail))
    }

    /// Checks that something answers at the target: `GET /health` first,
    /// then `GET /`. Any HTTP response counts, whatever its status.
    pub async fn probe(&self) -> Result<()> {
        let health = format!("{}/health", self.base_url);
        match self.http.get(&health).timeout(PROBE_TIMEOUT).send().await {
            Ok(_) => return Ok(()),
            Err(e) => debug!(url = %health, error = %e, "health probe failed"),
        }

        let root = format!("{}/", self.base_url);
        self.http
            .get(&root)
            .timeout(PROBE_TIMEOUT)
            .send()
            .await
            .map(|_| ())
            .map_err(|e| self.failure(None, format!("endpoint not reachable: {e}")))
    }

    fn failure(&self, status: Option<u16>, detail: String) -> RelayError {
        RelayError::Forward {
            endpoint: self.endpoint.clone(),
            status,
            detail,
        }
    }
}

async fn dump(path: &Path, body: &ForwardBody) {
    let bytes = match serde_json::to_vec_pretty(&body.body) {
        Ok(bytes) => bytes,
        Err(e) => {
            warn!(error = %e, "failed to serialize event for dump");
            return;
        }
    };
    if let Err(e) = tokio::fs::write(path, bytes).await {
        warn!(path = %path.display(), error = %e, "failed to write event dump");
    }
}
