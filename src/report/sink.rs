use crate::error::ReportError;
use async_trait::async_trait;
use chrono::{DateTime, SecondsFormat, Utc};
use reqwest::multipart::{Form, Part};
use reqwest::{Client, Url};
use serde::Serialize;
use std::time::Duration;
use tracing::{debug, info};

/// Path of the occupancy endpoint relative to the core base URL
pub const REPORT_PATH: &str = "office/camera";

/// One occupancy report
#[derive(Debug, Clone, PartialEq)]
pub struct ReportPayload {
    pub timestamp: DateTime<Utc>,
    pub count: u32,
    /// JPEG snapshot, only present when `count > 0`
    pub snapshot: Option<Vec<u8>>,
}

impl ReportPayload {
    pub fn new(count: u32, snapshot: Option<Vec<u8>>) -> Self {
        Self {
            timestamp: Utc::now(),
            count,
            snapshot,
        }
    }

    pub fn timestamp_string(&self) -> String {
        self.timestamp.to_rfc3339_opts(SecondsFormat::Micros, true)
    }
}

#[derive(Serialize)]
struct CountBody {
    timestamp: String,
    count: u32,
}

/// Destination for occupancy reports
#[async_trait]
pub trait ReportSink: Send + Sync {
    async fn send(&self, payload: ReportPayload) -> Result<(), ReportError>;
}

/// Posts reports to `<core_url>/office/camera`
pub struct HttpReportSink {
    client: Client,
    endpoint: Url,
}

impl HttpReportSink {
    pub fn new(core_url: &str, timeout: Duration) -> Result<Self, ReportError> {
        let endpoint = endpoint_for(core_url)?;
        let client = Client::builder().timeout(timeout).build()?;

        info!("Occupancy reports will be sent to {}", endpoint);
        Ok(Self { client, endpoint })
    }
}

/// Resolve the report endpoint, treating the base as a directory
pub fn endpoint_for(core_url: &str) -> Result<Url, ReportError> {
    let invalid = |details: String| ReportError::InvalidUrl {
        url: core_url.to_string(),
        details,
    };

    let mut base = Url::parse(core_url.trim()).map_err(|e| invalid(e.to_string()))?;
    if base.cannot_be_a_base() {
        return Err(invalid("URL cannot be used as a base".to_string()));
    }
    if !base.path().ends_with('/') {
        let path = format!("{}/", base.path());
        base.set_path(&path);
    }

    base.join(REPORT_PATH).map_err(|e| invalid(e.to_string()))
}

#[async_trait]
impl ReportSink for HttpReportSink {
    async fn send(&self, payload: ReportPayload) -> Result<(), ReportError> {
        let timestamp = payload.timestamp_string();
        let request = self.client.post(self.endpoint.clone());

        let request = match payload.snapshot {
            Some(jpeg) if payload.count > 0 => {
                let file = Part::bytes(jpeg)
                    .file_name("image.jpeg")
                    .mime_str("image/jpeg")?;
                let form = Form::new()
                    .text("timestamp", timestamp)
                    .text("count", payload.count.to_string())
                    .part("file", file);
                request.multipart(form)
            }
            _ => request.json(&CountBody {
                timestamp,
                count: payload.count,
            }),
        };

        debug!("Posting occupancy count {} to {}", payload.count, self.endpoint);
        let response = request.send().await?;
        let status = response.status();

        if !status.is_success() {
            return Err(ReportError::Status {
                status: status.as_u16(),
            });
        }

        info!("Core accepted occupancy report (status {})", status);
        Ok(())
    }
}
