//! Outbound webhook collaborator (a named interface, deliberately out of
//! scope for any particular delivery backend): one HTTP POST with a JSON
//! body per batch. Built directly on `hyper` + `hyper-util` +
//! `http-body-util`, the same "axum in, raw hyper out" split the daemon
//! itself uses rather than a higher-level HTTP client crate.

use std::time::Duration;

use anyhow::{bail, Context, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use http_body_util::{BodyExt, Full};
use hyper::body::Bytes;
use hyper::{Method, Request};
use hyper_util::client::legacy::connect::HttpConnector;
use hyper_util::client::legacy::Client;
use hyper_util::rt::TokioExecutor;
use serde::Serialize;

use crate::model::Alert;

const REQUEST_TIMEOUT: Duration = Duration::from_secs(15);

#[async_trait(?Send)]
pub trait Webhook {
    /// POSTs the batch. Non-2xx (or a transport error) is surfaced as an
    /// `Err`; the caller (the outbound drain) re-prepends the batch to
    /// retry on the next tick, up to its retry ceiling.
    async fn post_alerts(&self, timestamp: DateTime<Utc>, alerts: &[Alert]) -> Result<()>;
}

#[derive(Serialize)]
struct WebhookBody<'a> {
    timestamp: DateTime<Utc>,
    total_alertas: usize,
    is_batched: bool,
    alertas: &'a [Alert],
}

pub struct HttpWebhook {
    client: Client<HttpConnector, Full<Bytes>>,
    url: String,
}

impl HttpWebhook {
    pub fn new(url: String) -> Self {
        Self { client: Client::builder(TokioExecutor::new()).build(HttpConnector::new()), url }
    }
}

#[async_trait(?Send)]
impl Webhook for HttpWebhook {
    async fn post_alerts(&self, timestamp: DateTime<Utc>, alerts: &[Alert]) -> Result<()> {
        let body = WebhookBody { timestamp, total_alertas: alerts.len(), is_batched: true, alertas: alerts };
        let payload = serde_json::to_vec(&body).context("serialising webhook body")?;
        let uri: hyper::Uri = self.url.parse().context("parsing webhook URL")?;
        let request = Request::builder()
            .method(Method::POST)
            .uri(uri)
            .header("content-type", "application/json")
            .body(Full::new(Bytes::from(payload)))
            .context("building webhook request")?;

        let response = tokio::time::timeout(REQUEST_TIMEOUT, self.client.request(request))
            .await
            .context("webhook request timed out")?
            .context("webhook request failed")?;

        if !response.status().is_success() {
            let status = response.status();
            let body_bytes =
                response.into_body().collect().await.map(|b| b.to_bytes()).unwrap_or_default();
            let preview = String::from_utf8_lossy(&body_bytes[..body_bytes.len().min(256)]);
            bail!("webhook returned {status}: {preview}");
        }
        Ok(())
    }
}
