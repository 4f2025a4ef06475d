// SPDX-License-Identifier: MIT
// Copyright (c) 2026 StarTuz

use crate::export::ExportBlob;
use crate::filter::{EntityId, EntityRef};
use log::{debug, warn};
use reqwest::header::{HeaderMap, HeaderName, HeaderValue, CONTENT_DISPOSITION, CONTENT_TYPE};
use reqwest::multipart::{Form, Part};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use url::Url;

const UPLOAD_CHUNK_BYTES: usize = 64 * 1024;

#[derive(Error, Debug)]
pub enum ApiError {
    #[error("HTTP request failed: {0}")]
    Http(#[from] reqwest::Error),
    #[error("Backend returned status {status} for {url}")]
    Status { status: u16, url: String },
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("Invalid URL: {0}")]
    InvalidUrl(#[from] url::ParseError),
    #[error("Invalid header: {0}")]
    InvalidHeader(String),
}

/// Connection settings shared read-only by every widget.
#[derive(Debug, Clone)]
pub struct ClientConfig {
    pub base_url: String,
    pub headers: BTreeMap<String, String>,
    pub timeout: Duration,
}

/// One aggregate row of a category chart.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CategoryCount {
    pub name: String,
    pub value: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum SeriesX {
    Number(f64),
    Text(String),
}

impl fmt::Display for SeriesX {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SeriesX::Number(n) => write!(f, "{}", n),
            SeriesX::Text(s) => f.write_str(s),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SeriesPoint {
    pub x: SeriesX,
    pub y: f64,
}

#[derive(Debug, Clone, Deserialize)]
struct LookupRow {
    id: EntityId,
    value: serde_json::Value,
}

impl From<LookupRow> for EntityRef {
    fn from(row: LookupRow) -> Self {
        let label = match &row.value {
            serde_json::Value::String(s) => s.clone(),
            other => other.to_string(),
        };
        EntityRef {
            id: row.id,
            label,
            value: row.value,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct UploadReceipt {
    pub filename: String,
    #[serde(default)]
    pub size_bytes: u64,
    pub validation_status: String,
    #[serde(default)]
    pub error_message: Option<String>,
}

impl UploadReceipt {
    pub fn is_rejected(&self) -> bool {
        matches!(
            self.validation_status.to_lowercase().as_str(),
            "error" | "invalid" | "failed" | "rejected"
        )
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum JobState {
    Idle,
    Processing,
    Completed,
    Error,
}

impl JobState {
    pub fn is_terminal(self) -> bool {
        matches!(self, JobState::Completed | JobState::Error)
    }
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct JobStatus {
    pub status: JobState,
    #[serde(default)]
    pub total_rows: u64,
    #[serde(default)]
    pub processed_rows: u64,
    #[serde(default)]
    pub percentage: f64,
    #[serde(default, alias = "error_message")]
    pub message: Option<String>,
}

/// A file selected for ingestion, read fully into memory.
#[derive(Debug, Clone)]
pub struct UploadFile {
    pub name: String,
    pub bytes: Vec<u8>,
}

impl UploadFile {
    pub fn read<P: AsRef<Path>>(path: P) -> Result<Self, ApiError> {
        let path = path.as_ref();
        let bytes = std::fs::read(path)?;
        let name = path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| "upload.bin".to_string());
        Ok(Self { name, bytes })
    }
}

/// Callback receiving `(bytes_sent, total_bytes)` while an upload body streams out.
pub type ProgressFn = Arc<dyn Fn(u64, u64) + Send + Sync>;

/// Decodes a response body that is expected to be an array of `T`.
///
/// Anything that is not an array decodes to an empty list, and elements that
/// do not match `T` are skipped, so a partially degraded backend still
/// produces a usable (if smaller) chart.
pub fn decode_rows<T: DeserializeOwned>(body: serde_json::Value) -> Vec<T> {
    let items = match body {
        serde_json::Value::Array(items) => items,
        serde_json::Value::Null => return Vec::new(),
        other => {
            warn!(
                "Expected an array response; treating as empty — kind={}",
                json_kind(&other)
            );
            return Vec::new();
        }
    };

    let total = items.len();
    let rows: Vec<T> = items
        .into_iter()
        .filter_map(|item| serde_json::from_value(item).ok())
        .collect();
    if rows.len() != total {
        warn!(
            "Skipped malformed rows while decoding — kept={} total={}",
            rows.len(),
            total
        );
    }
    rows
}

/// Parses a successful response body as JSON. An empty or non-JSON body
/// (an HTML error page behind a proxy, say) becomes `null`.
pub fn lenient_json(body: &[u8]) -> serde_json::Value {
    if body.iter().all(u8::is_ascii_whitespace) {
        return serde_json::Value::Null;
    }
    match serde_json::from_slice(body) {
        Ok(value) => value,
        Err(e) => {
            warn!(
                "Response body is not JSON; treating as empty — bytes={} error={}",
                body.len(),
                e
            );
            serde_json::Value::Null
        }
    }
}

fn json_kind(value: &serde_json::Value) -> &'static str {
    match value {
        serde_json::Value::Null => "null",
        serde_json::Value::Bool(_) => "bool",
        serde_json::Value::Number(_) => "number",
        serde_json::Value::String(_) => "string",
        serde_json::Value::Array(_) => "array",
        serde_json::Value::Object(_) => "object",
    }
}

/// HTTP client shared by all dashboard components.
///
/// Cloning is cheap; clones share the same connection pool, base address and
/// default headers.
#[derive(Debug, Clone)]
pub struct ApiClient {
    http: reqwest::Client,
    base_url: Url,
}

impl ApiClient {
    pub fn new(config: &ClientConfig) -> Result<Self, ApiError> {
        let mut base = config.base_url.trim().to_string();
        if !base.ends_with('/') {
            base.push('/');
        }
        let base_url = Url::parse(&base)?;

        let mut headers = HeaderMap::new();
        for (name, value) in &config.headers {
            let header_name = HeaderName::from_bytes(name.as_bytes())
                .map_err(|_| ApiError::InvalidHeader(name.clone()))?;
            let header_value =
                HeaderValue::from_str(value).map_err(|_| ApiError::InvalidHeader(name.clone()))?;
            headers.insert(header_name, header_value);
        }

        let http = reqwest::Client::builder()
            .default_headers(headers)
            .timeout(config.timeout)
            .build()?;

        Ok(Self { http, base_url })
    }

    pub fn base_url(&self) -> &Url {
        &self.base_url
    }

    /// Resolves an endpoint path against the base address.
    pub fn endpoint(&self, path: &str) -> Result<Url, ApiError> {
        Ok(self.base_url.join(path.trim_start_matches('/'))?)
    }

    async fn check(response: reqwest::Response) -> Result<reqwest::Response, ApiError> {
        let status = response.status();
        if status.is_success() {
            Ok(response)
        } else {
            Err(ApiError::Status {
                status: status.as_u16(),
                url: response.url().to_string(),
            })
        }
    }

    /// POSTs a JSON payload to a stats endpoint and decodes an array of rows.
    pub async fn post_rows<T, P>(&self, path: &str, payload: &P) -> Result<Vec<T>, ApiError>
    where
        T: DeserializeOwned,
        P: Serialize + ?Sized,
    {
        let url = self.endpoint(path)?;
        debug!("POST stats — url={}", url);
        let response = self.http.post(url).json(payload).send().await?;
        let body = Self::check(response).await?.bytes().await?;
        Ok(decode_rows(lenient_json(&body)))
    }

    pub async fn get_rows<T: DeserializeOwned>(&self, path: &str) -> Result<Vec<T>, ApiError> {
        let url = self.endpoint(path)?;
        debug!("GET rows — url={}", url);
        let response = self.http.get(url).send().await?;
        let body = Self::check(response).await?.bytes().await?;
        Ok(decode_rows(lenient_json(&body)))
    }

    /// Free-text search against a lookup catalog, optionally scoped to a parent entity.
    pub async fn search(
        &self,
        path: &str,
        parent: Option<&EntityId>,
        query: &str,
        limit: usize,
    ) -> Result<Vec<EntityRef>, ApiError> {
        let scoped = match parent {
            Some(parent) => format!("{}/{}", path.trim_end_matches('/'), parent),
            None => path.to_string(),
        };
        let mut url = self.endpoint(&scoped)?;
        url.query_pairs_mut()
            .append_pair("q", query)
            .append_pair("limit", &limit.to_string());

        debug!("GET lookup — url={}", url);
        let response = self.http.get(url).send().await?;
        let body = Self::check(response).await?.bytes().await?;
        let mut options: Vec<EntityRef> = decode_rows::<LookupRow>(lenient_json(&body))
            .into_iter()
            .map(EntityRef::from)
            .collect();
        options.truncate(limit);
        Ok(options)
    }

    /// Sends `file` as a single-field multipart form, reporting bytes handed to
    /// the transport through `progress`.
    pub async fn upload(
        &self,
        path: &str,
        file: UploadFile,
        progress: ProgressFn,
    ) -> Result<UploadReceipt, ApiError> {
        let url = self.endpoint(path)?;
        let total = file.bytes.len() as u64;
        let chunks: Vec<Vec<u8>> = file
            .bytes
            .chunks(UPLOAD_CHUNK_BYTES)
            .map(<[u8]>::to_vec)
            .collect();

        let mut sent = 0u64;
        let stream = futures::stream::iter(chunks.into_iter().map(move |chunk| {
            sent += chunk.len() as u64;
            progress(sent, total);
            Ok::<_, std::io::Error>(chunk)
        }));

        let part = Part::stream_with_length(reqwest::Body::wrap_stream(stream), total)
            .file_name(file.name.clone());
        let form = Form::new().part("file", part);

        debug!("POST upload — url={} file={} bytes={}", url, file.name, total);
        let response = self.http.post(url).multipart(form).send().await?;
        let receipt = Self::check(response).await?.json().await?;
        Ok(receipt)
    }

    pub async fn job_status(&self, path: &str) -> Result<JobStatus, ApiError> {
        let url = self.endpoint(path)?;
        let response = self.http.get(url).send().await?;
        let body: serde_json::Value = Self::check(response).await?.json().await?;
        Ok(serde_json::from_value(body)?)
    }

    /// POSTs a filter payload and returns the binary document the backend renders.
    pub async fn export<P>(&self, path: &str, payload: &P) -> Result<ExportBlob, ApiError>
    where
        P: Serialize + ?Sized,
    {
        let url = self.endpoint(path)?;
        debug!("POST export — url={}", url);
        let response = Self::check(self.http.post(url).json(payload).send().await?).await?;

        let content_type = header_text(response.headers(), CONTENT_TYPE);
        let disposition = header_text(response.headers(), CONTENT_DISPOSITION);
        let bytes = response.bytes().await?;

        Ok(ExportBlob::new(
            bytes.to_vec(),
            content_type.as_deref(),
            disposition.as_deref(),
        ))
    }
}

fn header_text(headers: &HeaderMap, name: HeaderName) -> Option<String> {
    headers
        .get(name)
        .and_then(|v| v.to_str().ok())
        .map(|s| s.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn client(base: &str) -> ApiClient {
        ApiClient::new(&ClientConfig {
            base_url: base.to_string(),
            headers: BTreeMap::from([("X-Client".to_string(), "fodash".to_string())]),
            timeout: Duration::from_secs(5),
        })
        .unwrap()
    }

    #[test]
    fn test_endpoint_keeps_base_path() {
        let api = client("http://localhost:8000/api");
        assert_eq!(
            api.endpoint("/stats/categories").unwrap().as_str(),
            "http://localhost:8000/api/stats/categories"
        );
    }

    #[test]
    fn test_invalid_header_is_rejected() {
        let result = ApiClient::new(&ClientConfig {
            base_url: "http://localhost".to_string(),
            headers: BTreeMap::from([("bad header".to_string(), "x".to_string())]),
            timeout: Duration::from_secs(5),
        });
        assert!(matches!(result, Err(ApiError::InvalidHeader(_))));
    }

    #[test]
    fn test_decode_rows_treats_non_arrays_as_empty() {
        assert!(decode_rows::<CategoryCount>(json!({"detail": "oops"})).is_empty());
        assert!(decode_rows::<CategoryCount>(json!(null)).is_empty());
        assert!(decode_rows::<CategoryCount>(json!("text")).is_empty());
    }

    #[test]
    fn test_non_json_body_decodes_as_no_rows() {
        assert_eq!(lenient_json(b""), serde_json::Value::Null);
        assert_eq!(lenient_json(b"  \n"), serde_json::Value::Null);
        let html = lenient_json(b"<html><body>Bad gateway</body></html>");
        assert!(decode_rows::<CategoryCount>(html).is_empty());
        assert_eq!(lenient_json(b"[]"), json!([]));
    }

    /// Answers one request with a 200 and the given body, then closes.
    fn serve_once(content_type: &str, body: &str) -> String {
        use std::io::{Read, Write};

        let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        let addr = listener.local_addr().unwrap();
        let response = format!(
            "HTTP/1.1 200 OK\r\nContent-Type: {}\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{}",
            content_type,
            body.len(),
            body
        );
        std::thread::spawn(move || {
            if let Ok((mut stream, _)) = listener.accept() {
                let mut buf = [0u8; 8192];
                let _ = stream.read(&mut buf);
                let _ = stream.write_all(response.as_bytes());
            }
        });
        format!("http://{}/api/", addr)
    }

    #[tokio::test]
    async fn test_post_rows_with_html_body_is_empty() {
        let base = serve_once("text/html", "<html>maintenance</html>");
        let rows: Vec<CategoryCount> = client(&base)
            .post_rows("stats/operations-by-origin", &json!({"origins": []}))
            .await
            .unwrap();
        assert!(rows.is_empty());
    }

    #[tokio::test]
    async fn test_post_rows_with_empty_body_is_empty() {
        let base = serve_once("application/json", "");
        let rows: Vec<CategoryCount> = client(&base)
            .post_rows("stats/operations-by-origin", &json!({}))
            .await
            .unwrap();
        assert!(rows.is_empty());
    }

    #[test]
    fn test_decode_rows_skips_malformed_elements() {
        let rows: Vec<CategoryCount> = decode_rows(json!([
            {"name": "SKBO", "value": 12},
            {"name": "SKRG"},
            {"name": "SKCL", "value": 3.5},
        ]));
        assert_eq!(
            rows,
            vec![
                CategoryCount { name: "SKBO".into(), value: 12.0 },
                CategoryCount { name: "SKCL".into(), value: 3.5 },
            ]
        );
    }

    #[test]
    fn test_series_x_accepts_text_and_numbers() {
        let rows: Vec<SeriesPoint> = decode_rows(json!([
            {"x": "2024-01-01", "y": 4},
            {"x": 2, "y": 5},
        ]));
        assert_eq!(rows[0].x, SeriesX::Text("2024-01-01".into()));
        assert_eq!(rows[1].x, SeriesX::Number(2.0));
    }

    #[test]
    fn test_lookup_rows_become_entity_refs() {
        let rows: Vec<LookupRow> = decode_rows(json!([
            {"id": 3, "value": "Sector Andino"},
            {"id": "SKBO", "value": "SKBO - El Dorado"},
        ]));
        let refs: Vec<EntityRef> = rows.into_iter().map(EntityRef::from).collect();
        assert_eq!(refs[0].id, EntityId::Number(3));
        assert_eq!(refs[0].label, "Sector Andino");
        assert_eq!(refs[1].id, EntityId::from("SKBO"));
    }

    #[test]
    fn test_job_status_decoding() {
        let status: JobStatus = serde_json::from_value(json!({
            "status": "processing",
            "total_rows": 1000,
            "processed_rows": 250,
            "percentage": 25.0
        }))
        .unwrap();
        assert_eq!(status.status, JobState::Processing);
        assert!(!status.status.is_terminal());

        let failed: JobStatus = serde_json::from_value(json!({
            "status": "error",
            "error_message": "row 12: bad date"
        }))
        .unwrap();
        assert!(failed.status.is_terminal());
        assert_eq!(failed.message.as_deref(), Some("row 12: bad date"));
    }

    #[test]
    fn test_receipt_rejection() {
        let receipt: UploadReceipt = serde_json::from_value(json!({
            "filename": "ops.xlsx",
            "size_bytes": 2048,
            "validation_status": "invalid",
            "error_message": "missing column FECHA"
        }))
        .unwrap();
        assert!(receipt.is_rejected());
    }
}
