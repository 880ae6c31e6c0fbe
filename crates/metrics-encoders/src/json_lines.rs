//! JSON Lines encoder and HTTP push transport
//!
//! One `MetricSnapshot` per line, newline-delimited — a format-agnostic
//! fallback for backends that just want structured JSON over HTTP.

use crate::error::{Error, Result};
use crate::{Encoder, Export};
use async_trait::async_trait;
use metrics_core::MetricSnapshot;
use std::time::Duration;

pub struct JsonLinesEncoder;

impl Encoder for JsonLinesEncoder {
    fn encode(&self, batch: &[MetricSnapshot]) -> Result<Vec<u8>> {
        let mut out = Vec::new();
        for snapshot in batch {
            serde_json::to_writer(&mut out, snapshot).map_err(|e| Error::Encode(e.to_string()))?;
            out.push(b'\n');
        }
        Ok(out)
    }

    fn content_type(&self) -> &'static str {
        "application/x-ndjson"
    }
}

#[derive(Debug, Clone)]
pub struct JsonLinesConfig {
    pub url: String,
    pub bearer_token: Option<String>,
    pub timeout: Duration,
}

pub struct JsonLinesExporter {
    config: JsonLinesConfig,
    client: reqwest::Client,
    encoder: JsonLinesEncoder,
}

impl JsonLinesExporter {
    pub fn new(config: JsonLinesConfig) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(config.timeout)
            .build()
            .map_err(Error::Transport)?;
        Ok(Self { config, client, encoder: JsonLinesEncoder })
    }
}

#[async_trait]
impl Export for JsonLinesExporter {
    async fn export(&self, batch: &[MetricSnapshot]) -> Result<()> {
        if batch.is_empty() {
            return Ok(());
        }
        let body = self.encoder.encode(batch)?;
        let mut req = self
            .client
            .post(&self.config.url)
            .header("Content-Type", self.encoder.content_type());
        if let Some(token) = &self.config.bearer_token {
            req = req.bearer_auth(token);
        }
        let resp = req.body(body).send().await?;
        let status = resp.status();
        if !status.is_success() {
            let body = resp.text().await.unwrap_or_default();
            return Err(Error::Rejected { status: status.as_u16(), body });
        }
        Ok(())
    }

    fn name(&self) -> &'static str {
        "json_lines"
    }
}
