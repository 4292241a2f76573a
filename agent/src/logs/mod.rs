//! Fetches raw log text from a local file or the managed
//! observability API and returns a single byte buffer for pattern extraction.

use std::io::Read;
use std::time::Duration;

use serde::Deserialize;

use crate::config::SkySqlConfig;
use crate::error::{AgentError, AgentResult};

pub const DEFAULT_MAX_LINES: usize = 5_000;
pub const MAX_REMOTE_BYTES: u64 = 10 * 1024 * 1024;
const HTTP_TIMEOUT: Duration = Duration::from_secs(30);

pub struct LogIngestor {
    http: reqwest::Client,
}

impl Default for LogIngestor {
    fn default() -> Self {
        Self { http: reqwest::Client::builder().timeout(HTTP_TIMEOUT).build().expect("reqwest client") }
    }
}

#[derive(Debug, Deserialize)]
struct LogListResponse {
    entries: Vec<LogEntry>,
}

#[derive(Debug, Deserialize)]
struct LogEntry {
    #[serde(rename = "downloadUrl")]
    download_url: String,
    #[serde(default)]
    compressed: Option<String>,
}

#[derive(Debug, Deserialize)]
struct MetricResponse {
    value: f64,
}

impl LogIngestor {
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the last `max_lines` lines of `path`. If the file has fewer
    /// lines than requested, returns all of it.
    pub async fn tail_local(&self, path: &str, max_lines: usize) -> AgentResult<Vec<u8>> {
        let path = path.to_string();
        tokio::task::spawn_blocking(move || tail_local_blocking(&path, max_lines))
            .await
            .map_err(|e| AgentError::Io(std::io::Error::other(e)))?
    }

    /// Priority rule: callers must never call this when a
    /// local path was supplied; `tail_local` always wins.
    pub async fn fetch_remote(
        &self,
        skysql: &SkySqlConfig,
        from_time: chrono::DateTime<chrono::Utc>,
        to_time: chrono::DateTime<chrono::Utc>,
    ) -> AgentResult<Vec<u8>> {
        let url = format!("{}/observability/v2/logs", skysql.log_api_url.trim_end_matches('/'));
        let response = self
            .http
            .get(&url)
            .header("X-API-Key", &skysql.api_key)
            .query(&[
                ("logType", "error-log"),
                ("fromDate", &from_time.to_rfc3339()),
                ("toDate", &to_time.to_rfc3339()),
            ])
            .send()
            .await
            .map_err(|e| if e.is_timeout() { AgentError::Timeout(HTTP_TIMEOUT) } else { AgentError::Http(e) })?;

        match response.status().as_u16() {
            200 => {}
            401 => return Err(AgentError::Unauthorized),
            403 => return Err(AgentError::Forbidden),
            other => return Err(AgentError::backend_error(other as i32, "observability API error")),
        }

        let listing: LogListResponse = response.json().await.map_err(AgentError::Http)?;

        let mut buffer = Vec::new();
        let mut total: u64 = 0;
        for entry in listing.entries {
            let bytes = self.download_entry(&entry.download_url).await?;
            total += bytes.len() as u64;
            if total > MAX_REMOTE_BYTES {
                return Err(AgentError::TooLarge(total));
            }
            let decompressed = decompress_if_archived(&bytes, entry.compressed.as_deref())?;
            buffer.extend_from_slice(&decompressed);
        }
        Ok(buffer)
    }

    /// Fetches one point-in-time utilization metric (`cpu`, `disk_data`, or
    /// `disk_logs`) from the managed observability endpoint.
    pub async fn fetch_metric(&self, skysql: &SkySqlConfig, metric: &str) -> AgentResult<f64> {
        let url = format!("{}/observability/v1/metrics/{}", skysql.log_api_url.trim_end_matches('/'), skysql.service_id);
        let response = self
            .http
            .get(&url)
            .header("X-API-Key", &skysql.api_key)
            .query(&[("metric", metric)])
            .send()
            .await
            .map_err(|e| if e.is_timeout() { AgentError::Timeout(HTTP_TIMEOUT) } else { AgentError::Http(e) })?;

        match response.status().as_u16() {
            200 => {}
            401 => return Err(AgentError::Unauthorized),
            403 => return Err(AgentError::Forbidden),
            other => return Err(AgentError::backend_error(other as i32, "observability API error")),
        }

        let parsed: MetricResponse = response.json().await.map_err(AgentError::Http)?;
        Ok(parsed.value)
    }

    async fn download_entry(&self, url: &str) -> AgentResult<Vec<u8>> {
        let response = self
            .http
            .get(url)
            .send()
            .await
            .map_err(|e| if e.is_timeout() { AgentError::Timeout(HTTP_TIMEOUT) } else { AgentError::Http(e) })?;
        if !response.status().is_success() {
            return Err(AgentError::backend_error(response.status().as_u16() as i32, "download failed"));
        }
        let bytes = response.bytes().await.map_err(AgentError::Http)?;
        Ok(bytes.to_vec())
    }
}

fn tail_local_blocking(path: &str, max_lines: usize) -> AgentResult<Vec<u8>> {
    let content = std::fs::read_to_string(path).map_err(|e| match e.kind() {
        std::io::ErrorKind::NotFound => AgentError::FileNotFound(path.to_string()),
        std::io::ErrorKind::PermissionDenied => AgentError::PermissionDenied(path.to_string()),
        _ => AgentError::Io(e),
    })?;

    let lines: Vec<&str> = content.lines().collect();
    let start = lines.len().saturating_sub(max_lines);
    Ok(lines[start..].join("\n").into_bytes())
}

/// Decompresses gzip/zip archives; anything else (or `compressed: None`) is
/// treated as plain text.
fn decompress_if_archived(bytes: &[u8], hint: Option<&str>) -> AgentResult<Vec<u8>> {
    let looks_gzip = bytes.len() >= 2 && bytes[0] == 0x1f && bytes[1] == 0x8b;
    let looks_zip = bytes.len() >= 4 && &bytes[0..4] == b"PK\x03\x04";

    if hint == Some("gzip") || (hint.is_none() && looks_gzip) {
        let mut decoder = flate2::read::GzDecoder::new(bytes);
        let mut out = Vec::new();
        decoder.read_to_end(&mut out)?;
        return Ok(out);
    }

    if hint == Some("zip") || (hint.is_none() && looks_zip) {
        let reader = std::io::Cursor::new(bytes);
        let mut archive = zip::ZipArchive::new(reader).map_err(|e| AgentError::Io(std::io::Error::other(e)))?;
        let mut out = Vec::new();
        for i in 0..archive.len() {
            let mut file = archive.by_index(i).map_err(|e| AgentError::Io(std::io::Error::other(e)))?;
            file.read_to_end(&mut out)?;
        }
        return Ok(out);
    }

    Ok(bytes.to_vec())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[tokio::test]
    async fn tail_local_returns_last_n_lines() {
        let mut file = tempfile_with_lines(10);
        file.flush().unwrap();
        let path = file.path().to_str().unwrap().to_string();
        let ingestor = LogIngestor::new();
        let bytes = ingestor.tail_local(&path, 3).await.unwrap();
        let text = String::from_utf8(bytes).unwrap();
        assert_eq!(text, "line-7\nline-8\nline-9");
    }

    #[tokio::test]
    async fn tail_local_returns_all_lines_when_file_smaller() {
        let mut file = tempfile_with_lines(2);
        file.flush().unwrap();
        let path = file.path().to_str().unwrap().to_string();
        let ingestor = LogIngestor::new();
        let bytes = ingestor.tail_local(&path, 50).await.unwrap();
        let text = String::from_utf8(bytes).unwrap();
        assert_eq!(text, "line-0\nline-1");
    }

    #[tokio::test]
    async fn tail_local_missing_file_is_file_not_found() {
        let ingestor = LogIngestor::new();
        let err = ingestor.tail_local("/nonexistent/path/does-not-exist.log", 10).await.unwrap_err();
        assert_eq!(err.kind(), crate::error::ErrorKind::FileNotFound);
    }

    fn tempfile_with_lines(n: usize) -> tempfile::NamedTempFile {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        let lines: Vec<String> = (0..n).map(|i| format!("line-{i}")).collect();
        write!(file, "{}", lines.join("\n")).unwrap();
        file
    }
}
