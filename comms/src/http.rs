use std::time::Duration;

use async_trait::async_trait;
use log::{debug, warn};
use reqwest::{
    Client, RequestBuilder, Response, StatusCode,
    multipart::{Form, Part},
};
use serde::{Deserialize, Serialize};

use crate::{
    DownloadRequest, Result, Router, RouterErr, Run, SiteStatus, StatusUpdate, UploadRequest,
};

const BACKOFF_BASE: Duration = Duration::from_millis(200);
const BACKOFF_CAP: Duration = Duration::from_secs(2);

/// `Router` implementation over the router's HTTP API.
pub struct HttpRouter {
    client: Client,
    base_url: String,
    auth: Option<(String, Option<String>)>,
    retries: u32,
}

#[derive(Deserialize)]
struct BatchRuns {
    #[serde(default)]
    runs: Vec<serde_json::Value>,
}

#[derive(Serialize)]
struct Heartbeat<'a> {
    uid: &'a str,
    status: u8,
}

impl HttpRouter {
    /// Creates a new `HttpRouter`.
    ///
    /// # Arguments
    /// * `base_url` - The router's root url, without trailing slash.
    /// * `timeout` - Upper bound for every single request.
    /// * `retries` - Extra attempts for transient failures.
    ///
    /// # Errors
    /// Returns an error if the underlying HTTP client cannot be built.
    pub fn new(base_url: impl Into<String>, timeout: Duration, retries: u32) -> Result<Self> {
        let client = Client::builder()
            .timeout(timeout)
            .connect_timeout(timeout.min(Duration::from_secs(5)))
            .build()?;

        Ok(Self {
            client,
            base_url: base_url.into().trim_end_matches('/').to_string(),
            auth: None,
            retries,
        })
    }

    /// Attaches basic auth credentials to every request.
    pub fn with_basic_auth(mut self, username: String, password: Option<String>) -> Self {
        self.auth = Some((username, password));
        self
    }

    fn url(&self, path: &str) -> String {
        format!("{}{path}", self.base_url)
    }

    /// Sends the request built by `build`, retrying transient failures.
    ///
    /// `build` is invoked once per attempt since request bodies are consumed on send.
    async fn send<F>(&self, build: F) -> Result<Response>
    where
        F: Fn(&Client) -> RequestBuilder,
    {
        let mut attempt = 0;

        loop {
            attempt += 1;

            let mut request = build(&self.client);
            if let Some((user, password)) = &self.auth {
                request = request.basic_auth(user, password.as_ref());
            }

            let err = match request.send().await {
                Ok(response) if response.status().is_success() => return Ok(response),
                Ok(response) => {
                    let status = response.status().as_u16();
                    let body = response.text().await.unwrap_or_default();
                    RouterErr::Http { status, body }
                }
                Err(e) => RouterErr::Transport(e),
            };

            if !err.is_transient() || attempt > self.retries {
                return Err(err);
            }

            let backoff = BACKOFF_BASE
                .saturating_mul(1 << (attempt - 1).min(8))
                .min(BACKOFF_CAP);
            debug!(attempt = attempt; "router request failed, retrying in {backoff:?}: {err}");
            tokio::time::sleep(backoff).await;
        }
    }
}

/// Decodes each run on its own so one malformed row does not hide the rest.
fn decode_runs(values: Vec<serde_json::Value>) -> Vec<Run> {
    values
        .into_iter()
        .filter_map(|value| match serde_json::from_value::<Run>(value) {
            Ok(run) => Some(run),
            Err(e) => {
                warn!("dropping malformed run from router: {e}");
                None
            }
        })
        .collect()
}

/// Decodes every run, failing on the first malformed row.
///
/// Barrier checks need the whole batch, a dropped row could hide a participant.
fn decode_all_runs(values: Vec<serde_json::Value>) -> Result<Vec<Run>> {
    values
        .into_iter()
        .map(|value| serde_json::from_value::<Run>(value).map_err(RouterErr::from))
        .collect()
}

#[async_trait]
impl Router for HttpRouter {
    async fn active_runs(&self) -> Result<Vec<Run>> {
        let url = self.url("/runs/active/");
        let response = self.send(|client| client.get(&url)).await?;
        let values: Vec<serde_json::Value> = response.json().await?;
        Ok(decode_runs(values))
    }

    async fn batch_runs(&self, batch: u64, project: u64, site_uid: &str) -> Result<Vec<Run>> {
        let url = self.url("/runs/detail/");
        let query = [
            ("batch", batch.to_string()),
            ("project", project.to_string()),
            ("site_uid", site_uid.to_string()),
        ];

        let response = self.send(|client| client.get(&url).query(&query)).await?;
        let detail: BatchRuns = response.json().await?;
        decode_all_runs(detail.runs)
    }

    async fn update_status(&self, run: u64, update: StatusUpdate) -> Result<()> {
        let url = self.url(&format!("/runs/{run}/status/"));
        self.send(|client| client.put(&url).json(&update)).await?;
        Ok(())
    }

    async fn download(&self, request: DownloadRequest) -> Result<Option<Vec<u8>>> {
        let url = self.url("/runs-action/download/");
        let query = [
            ("run", request.run.to_string()),
            ("task_seq", request.task_seq.to_string()),
            ("round_seq", request.round_seq.to_string()),
            ("all_runs", u8::from(request.all_runs).to_string()),
            ("type", request.kind.as_str().to_string()),
        ];

        match self.send(|client| client.get(&url).query(&query)).await {
            Ok(response) => Ok(Some(response.bytes().await?.to_vec())),
            Err(RouterErr::Http { status, .. }) if status == StatusCode::NOT_FOUND.as_u16() => {
                Ok(None)
            }
            Err(e) => Err(e),
        }
    }

    async fn upload(&self, request: UploadRequest) -> Result<()> {
        let url = self.url("/runs-action/upload/");

        self.send(|client| {
            let mut form = Form::new()
                .text("run", request.run.to_string())
                .text("task_seq", request.task_seq.to_string())
                .text("round_seq", request.round_seq.to_string());

            for file in &request.files {
                let part = Part::bytes(file.content.clone()).file_name(file.file_name.clone());
                form = form.part(file.field.as_str(), part);
            }

            client.post(&url).multipart(form)
        })
        .await?;

        Ok(())
    }

    async fn heartbeat(&self, site_uid: &str, status: SiteStatus) -> Result<()> {
        let url = self.url("/sites/heartbeat/");
        let body = Heartbeat {
            uid: site_uid,
            status: status as u8,
        };

        self.send(|client| client.post(&url).json(&body)).await?;
        Ok(())
    }
}
