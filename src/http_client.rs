use std::thread;

use anyhow::{Context, Result, anyhow};
use reqwest::blocking::Client;
use reqwest::header::{ACCEPT, ACCEPT_LANGUAGE, HeaderMap, HeaderValue, REFERER, USER_AGENT};
use tracing::{debug, warn};

use crate::config::{PipelineConfig, RetryPolicy};

const BROWSER_USER_AGENT: &str = "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/124.0 Safari/537.36";

/// Builds the client a run uses. Callers own it and pass it to providers.
pub fn http_client(config: &PipelineConfig) -> Result<Client> {
    let mut headers = HeaderMap::new();
    headers.insert(USER_AGENT, HeaderValue::from_static(BROWSER_USER_AGENT));
    headers.insert(ACCEPT, HeaderValue::from_static("application/json, text/plain, */*"));
    headers.insert(ACCEPT_LANGUAGE, HeaderValue::from_static("en-US,en;q=0.9"));
    headers.insert(REFERER, HeaderValue::from_static("https://www.nba.com/"));

    Client::builder()
        .timeout(config.request_timeout)
        .default_headers(headers)
        .build()
        .context("failed to build http client")
}

pub fn get_text(client: &Client, url: &str, query: &[(&str, String)]) -> Result<String> {
    let resp = client.get(url).query(query).send().context("request failed")?;
    let status = resp.status();
    let body = resp.text().context("failed reading body")?;
    if !status.is_success() {
        return Err(anyhow!("http {}: {}", status, truncate(&body, 200)));
    }
    Ok(body)
}

/// Runs `op` up to `policy.max_attempts` times, sleeping a growing delay
/// between attempts. Exhaustion is logged and reported as `None`.
pub fn with_retry<T>(
    policy: &RetryPolicy,
    label: &str,
    mut op: impl FnMut() -> Result<T>,
) -> Option<T> {
    let attempts = policy.max_attempts.max(1);
    for attempt in 1..=attempts {
        match op() {
            Ok(value) => {
                if attempt > 1 {
                    debug!("{} succeeded on attempt {}", label, attempt);
                }
                return Some(value);
            }
            Err(err) => {
                warn!("{} failed (attempt {}/{}): {:#}", label, attempt, attempts, err);
                if attempt < attempts {
                    thread::sleep(policy.delay_for(attempt));
                }
            }
        }
    }
    warn!("{}: giving up after {} attempts", label, attempts);
    None
}

fn truncate(raw: &str, max: usize) -> &str {
    match raw.char_indices().nth(max) {
        Some((idx, _)) => &raw[..idx],
        None => raw,
    }
}
