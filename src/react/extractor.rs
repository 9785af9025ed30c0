//! 从浏览器网络 trace 中提取 Cookie 产物
//!
//! 读取 `<profile>/traces/*.network`（每行一条 JSON 记录），选取最新且含有发往目标主机请求的文件，
//! 合并发往该主机的请求中的 `Cookie` 头：保留首次出现的顺序，同名时后出现的值生效。

use std::path::{Path, PathBuf};
use std::time::SystemTime;

use reqwest::Url;
use serde::Deserialize;
use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ExtractError {
    #[error("no trace files found")]
    NoTraceFiles,
    #[error("no trace file has requests to {0}")]
    NoMatchingTrace(String),
    #[error("no cookies found in {requests} requests to {host}")]
    NoCookies { host: String, requests: usize },
    #[error("invalid target url: {0}")]
    InvalidTarget(String),
    #[error("trace read failed: {0}")]
    Io(String),
}

#[derive(Debug, Deserialize)]
struct TraceRecord {
    #[serde(default)]
    snapshot: Option<TraceSnapshot>,
}

#[derive(Debug, Deserialize)]
struct TraceSnapshot {
    #[serde(default)]
    request: Option<TraceRequest>,
}

#[derive(Debug, Deserialize)]
struct TraceRequest {
    #[serde(default)]
    url: String,
    #[serde(default)]
    headers: Vec<TraceHeader>,
}

#[derive(Debug, Deserialize)]
struct TraceHeader {
    #[serde(default)]
    name: String,
    #[serde(default)]
    value: String,
}

/// 在阻塞线程池上提取，避免占用 runtime 线程
pub async fn extract_cookies(
    profile_dir: &Path,
    target_url: &str,
    delimiter: &str,
) -> Result<String, ExtractError> {
    let profile_dir = profile_dir.to_path_buf();
    let target_url = target_url.to_string();
    let delimiter = delimiter.to_string();
    tokio::task::spawn_blocking(move || extract_cookies_blocking(&profile_dir, &target_url, &delimiter))
        .await
        .map_err(|e| ExtractError::Io(e.to_string()))?
}

pub fn extract_cookies_blocking(
    profile_dir: &Path,
    target_url: &str,
    delimiter: &str,
) -> Result<String, ExtractError> {
    let host = Url::parse(target_url)
        .ok()
        .and_then(|u| u.host_str().map(str::to_string))
        .ok_or_else(|| ExtractError::InvalidTarget(target_url.to_string()))?;

    let pattern = profile_dir.join("traces").join("*.network");
    let mut files: Vec<(PathBuf, SystemTime)> = glob::glob(&pattern.to_string_lossy())
        .map_err(|e| ExtractError::Io(e.to_string()))?
        .filter_map(Result::ok)
        .map(|p| {
            let mtime = std::fs::metadata(&p)
                .and_then(|m| m.modified())
                .unwrap_or(SystemTime::UNIX_EPOCH);
            (p, mtime)
        })
        .collect();
    if files.is_empty() {
        return Err(ExtractError::NoTraceFiles);
    }
    files.sort_by(|a, b| b.1.cmp(&a.1));

    let trace = files.iter().find_map(|(path, _)| match std::fs::read_to_string(path) {
        Ok(content) => {
            let requests = host_requests(&content, &host);
            (!requests.is_empty()).then(|| (path.clone(), requests))
        }
        Err(e) => {
            tracing::warn!("Failed to read trace file {}: {}", path.display(), e);
            None
        }
    });
    let Some((path, matched)) = trace else {
        return Err(ExtractError::NoMatchingTrace(host));
    };
    tracing::info!("Reading trace file {}", path.display());

    let requests = matched.len();
    let mut cookies: Vec<(String, String)> = Vec::new();
    for request in &matched {
        for header in request.headers.iter().filter(|h| h.name.eq_ignore_ascii_case("cookie")) {
            for pair in header.value.split(';').map(str::trim) {
                let Some((name, value)) = pair.split_once('=') else {
                    continue;
                };
                let name = name.trim();
                if name.is_empty() {
                    continue;
                }
                match cookies.iter_mut().find(|(n, _)| n == name) {
                    Some(existing) => existing.1 = value.to_string(),
                    None => cookies.push((name.to_string(), value.to_string())),
                }
            }
        }
    }

    tracing::info!(requests, cookies = cookies.len(), "Collected cookies from trace");
    if cookies.is_empty() {
        return Err(ExtractError::NoCookies { host, requests });
    }
    Ok(cookies
        .iter()
        .map(|(n, v)| format!("{}={}", n, v))
        .collect::<Vec<_>>()
        .join(delimiter))
}

/// 解析 trace 内容，只保留发往目标主机的请求（按解析后的 URL 主机精确比较）
fn host_requests(content: &str, host: &str) -> Vec<TraceRequest> {
    content
        .lines()
        .map(str::trim)
        .filter(|l| !l.is_empty())
        .filter_map(|line| serde_json::from_str::<TraceRecord>(line).ok())
        .filter_map(|record| record.snapshot.and_then(|s| s.request))
        .filter(|request| same_host(&request.url, host))
        .collect()
}

fn same_host(url: &str, host: &str) -> bool {
    Url::parse(url)
        .ok()
        .and_then(|u| u.host_str().map(|h| h.eq_ignore_ascii_case(host)))
        .unwrap_or(false)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn record(url: &str, cookie: Option<&str>) -> String {
        let headers = match cookie {
            Some(c) => json!([{"name": "Accept", "value": "*/*"}, {"name": "Cookie", "value": c}]),
            None => json!([{"name": "Accept", "value": "*/*"}]),
        };
        json!({"type": "resource-snapshot", "snapshot": {"request": {"url": url, "headers": headers}}})
            .to_string()
    }

    fn write_trace(dir: &Path, name: &str, lines: &[String]) {
        let traces = dir.join("traces");
        std::fs::create_dir_all(&traces).unwrap();
        std::fs::write(traces.join(name), lines.join("\n")).unwrap();
    }

    #[test]
    fn test_merges_cookies_for_target_host() {
        let dir = tempfile::tempdir().unwrap();
        write_trace(
            dir.path(),
            "trace.network",
            &[
                record("https://x.com/i/flow/login", Some("guest_id=1; ct0=old")),
                record("https://cdn.other.net/a.js", Some("tracker=zzz")),
                "not json".to_string(),
                record("https://x.com/api/user", Some("ct0=new; auth_token=tok")),
                record("https://x.com/favicon.ico", None),
            ],
        );
        let cookies =
            extract_cookies_blocking(dir.path(), "https://x.com/i/flow/login", "; ").unwrap();
        assert_eq!(cookies, "guest_id=1; ct0=new; auth_token=tok");
    }

    #[test]
    fn test_missing_traces() {
        let dir = tempfile::tempdir().unwrap();
        assert_eq!(
            extract_cookies_blocking(dir.path(), "https://x.com", "; "),
            Err(ExtractError::NoTraceFiles)
        );
        write_trace(dir.path(), "a.network", &[record("https://other.org/", Some("a=1"))]);
        assert_eq!(
            extract_cookies_blocking(dir.path(), "https://x.com", "; "),
            Err(ExtractError::NoMatchingTrace("x.com".into()))
        );
    }

    #[test]
    fn test_host_suffix_does_not_select_trace() {
        let dir = tempfile::tempdir().unwrap();
        write_trace(
            dir.path(),
            "a.network",
            &[
                record("https://notx.com/login", Some("a=1")),
                record("https://cdn.net/x.com/logo.png", Some("b=2")),
            ],
        );
        assert_eq!(
            extract_cookies_blocking(dir.path(), "https://x.com/login", "; "),
            Err(ExtractError::NoMatchingTrace("x.com".into()))
        );
    }

    #[test]
    fn test_requests_without_cookies() {
        let dir = tempfile::tempdir().unwrap();
        write_trace(dir.path(), "a.network", &[record("https://x.com/login", None)]);
        assert_eq!(
            extract_cookies_blocking(dir.path(), "https://x.com/login", "; "),
            Err(ExtractError::NoCookies { host: "x.com".into(), requests: 1 })
        );
    }

    #[tokio::test]
    async fn test_async_wrapper() {
        let dir = tempfile::tempdir().unwrap();
        write_trace(dir.path(), "a.network", &[record("https://x.com/", Some("sid=9"))]);
        assert_eq!(
            extract_cookies(dir.path(), "https://x.com/", "; ").await.unwrap(),
            "sid=9"
        );
    }
}
