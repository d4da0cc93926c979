//! `fetch` handler: outbound HTTP with SSRF blocking, acceptance-pattern
//! matching, and its own internal retry (the executor's retry budget is
//! for handlers that don't already drive their own).

use crate::support::{bind_output, logic_scalar, logic_value};
use async_trait::async_trait;
use ipnet::{Ipv4Net, Ipv6Net};
use reqwest::Client;
use serde_json::{Map, Value};
use std::net::{IpAddr, Ipv6Addr};
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use workforge_interpreter::{BlockHandler, HandlerError};
use workforge_workflow::{Block, BlockResult, ErrorCode, WorkflowContext};

const BLOCKED_V4_RANGES: &[&str] = &[
    "127.0.0.0/8",
    "10.0.0.0/8",
    "172.16.0.0/12",
    "192.168.0.0/16",
    "169.254.0.0/16",
    "0.0.0.0/8",
];

fn is_blocked_ip(ip: IpAddr) -> bool {
    match ip {
        IpAddr::V4(v4) => BLOCKED_V4_RANGES
            .iter()
            .filter_map(|cidr| cidr.parse::<Ipv4Net>().ok())
            .any(|net| net.contains(&v4)),
        IpAddr::V6(v6) => {
            v6 == Ipv6Addr::LOCALHOST
                || "fc00::/7".parse::<Ipv6Net>().expect("valid cidr literal").contains(&v6)
                || "fe80::/10".parse::<Ipv6Net>().expect("valid cidr literal").contains(&v6)
        }
    }
}

fn is_blocked_host(host: &str) -> bool {
    if host.eq_ignore_ascii_case("localhost") || host.to_ascii_lowercase().ends_with(".local") {
        return true;
    }
    host.parse::<IpAddr>().map(is_blocked_ip).unwrap_or(false)
}

/// `false` only if the status's 3-digit code matches `pattern` digit by
/// digit, treating `x` as a wildcard (`"2xx"` matches 200..=299).
fn status_matches(pattern: &str, status: u16) -> bool {
    let status_str = format!("{status:03}");
    pattern.len() == 3
        && pattern
            .chars()
            .zip(status_str.chars())
            .all(|(p, s)| p == 'x' || p == s)
}

fn accepted(patterns: &[String], status: u16) -> bool {
    patterns.iter().any(|p| status_matches(p, status))
}

pub struct FetchHandler {
    client: Client,
}

impl Default for FetchHandler {
    fn default() -> Self {
        Self {
            client: Client::builder().build().unwrap_or_else(|_| Client::new()),
        }
    }
}

#[async_trait]
impl BlockHandler for FetchHandler {
    async fn execute(
        &self,
        block: &Block,
        ctx: &WorkflowContext,
        cancel: &CancellationToken,
    ) -> Result<BlockResult, HandlerError> {
        let url_value = logic_scalar(block, ctx, "fetch_url");
        let Some(url) = url_value.as_str() else {
            return Err(HandlerError::new(ErrorCode::ValidationError, "fetch block requires fetch_url"));
        };
        let parsed = reqwest::Url::parse(url)
            .map_err(|e| HandlerError::new(ErrorCode::ValidationError, format!("invalid fetch_url: {e}")))?;
        let host = parsed
            .host_str()
            .ok_or_else(|| HandlerError::new(ErrorCode::ValidationError, "fetch_url has no host"))?;
        if is_blocked_host(host) {
            return Err(HandlerError::new(
                ErrorCode::SsrfBlocked,
                format!("fetch target '{host}' resolves to a private/loopback/link-local range"),
            ));
        }

        let method_str = block.logic_str("fetch_method").unwrap_or("GET");
        let method = reqwest::Method::from_bytes(method_str.as_bytes())
            .map_err(|_| HandlerError::new(ErrorCode::ValidationError, format!("invalid fetch_method: {method_str}")))?;

        let timeout_ms = block.logic_i64("fetch_timeout_ms").unwrap_or(30_000).max(0) as u64;
        let max_retries = block.logic_i64("fetch_max_retries").unwrap_or(0).max(0) as u32;
        let retry_delay_ms = block.logic_i64("fetch_retry_delay_ms").unwrap_or(0).max(0) as u64;
        let accept_patterns = accept_patterns(block, ctx);
        let headers = logic_value(block, ctx, "fetch_headers");
        let body = block.logic.get("fetch_body").map(|v| workforge_workflow::value::resolve_dynamic(v, ctx));

        let mut attempt = 0u32;
        loop {
            if cancel.is_cancelled() {
                return Err(HandlerError::new(ErrorCode::Cancelled, "run was cancelled"));
            }

            let mut request = self.client.request(method.clone(), parsed.clone()).timeout(Duration::from_millis(timeout_ms));
            if let Value::Object(ref map) = headers {
                for (key, value) in map {
                    if let Some(v) = value.as_str() {
                        request = request.header(key.as_str(), v);
                    }
                }
            }
            if let Some(ref body) = body {
                request = request.json(body);
            }

            match request.send().await {
                Ok(response) => {
                    let status = response.status().as_u16();
                    if !accepted(&accept_patterns, status) {
                        if attempt < max_retries {
                            attempt += 1;
                            if sleep_or_cancel(retry_delay_ms, cancel).await.is_err() {
                                return Err(HandlerError::new(ErrorCode::Cancelled, "run was cancelled"));
                            }
                            continue;
                        }
                        return Err(HandlerError::new(
                            ErrorCode::UpstreamError,
                            format!("upstream returned unaccepted status {status}"),
                        ));
                    }
                    return Ok(bind_output(block, "$state.response", response_body(response).await));
                }
                Err(e) => {
                    if attempt < max_retries {
                        attempt += 1;
                        if sleep_or_cancel(retry_delay_ms, cancel).await.is_err() {
                            return Err(HandlerError::new(ErrorCode::Cancelled, "run was cancelled"));
                        }
                        continue;
                    }
                    return Err(HandlerError::new(ErrorCode::UpstreamError, format!("network error: {e}")));
                }
            }
        }
    }
}

fn accept_patterns(block: &Block, ctx: &WorkflowContext) -> Vec<String> {
    match logic_value(block, ctx, "fetch_accept") {
        Value::Array(items) => {
            let patterns: Vec<String> = items.into_iter().filter_map(|v| v.as_str().map(str::to_string)).collect();
            if patterns.is_empty() {
                vec!["2xx".to_string()]
            } else {
                patterns
            }
        }
        _ => vec!["2xx".to_string()],
    }
}

async fn sleep_or_cancel(delay_ms: u64, cancel: &CancellationToken) -> Result<(), ()> {
    tokio::select! {
        () = tokio::time::sleep(Duration::from_millis(delay_ms)) => Ok(()),
        () = cancel.cancelled() => Err(()),
    }
}

async fn response_body(response: reqwest::Response) -> Value {
    let is_json = response
        .headers()
        .get(reqwest::header::CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
        .is_some_and(|ct| ct.starts_with("application/json"));
    let status = response.status().as_u16();
    let status_text = response.status().canonical_reason().unwrap_or("").to_string();
    let mut headers = Map::new();
    for (key, value) in response.headers() {
        if let Ok(v) = value.to_str() {
            headers.insert(key.as_str().to_string(), Value::String(v.to_string()));
        }
    }

    let body = if is_json {
        response.json::<Value>().await.unwrap_or(Value::Null)
    } else {
        response.text().await.map(Value::String).unwrap_or(Value::Null)
    };

    serde_json::json!({
        "status": status,
        "statusText": status_text,
        "headers": headers,
        "body": body,
    })
}
