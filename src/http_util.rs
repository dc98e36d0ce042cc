use std::thread;
use std::time::Duration;

use reqwest::blocking::{RequestBuilder, Response};
use reqwest::header::{HeaderMap, HeaderValue, USER_AGENT};

use crate::error::UsiError;

#[derive(Debug, Clone, Copy)]
pub struct RetryPolicy {
    pub max_attempts: usize,
    pub base_delay: Duration,
}

impl RetryPolicy {
    pub const fn new(max_attempts: usize, base_delay_ms: u64) -> Self {
        Self {
            max_attempts,
            base_delay: Duration::from_millis(base_delay_ms),
        }
    }

    fn delay(&self, attempt: usize) -> Duration {
        self.base_delay * (attempt as u32 + 1)
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::new(4, 200)
    }
}

pub fn default_headers() -> Result<HeaderMap, UsiError> {
    let mut headers = HeaderMap::new();
    headers.insert(
        USER_AGENT,
        HeaderValue::from_str(&format!("usi-service/{}", env!("CARGO_PKG_VERSION")))
            .map_err(|err| UsiError::ConfigParse(err.to_string()))?,
    );
    Ok(headers)
}

/// Sends the request built by `make_req`, retrying transient failures with
/// linear backoff. The last response is returned even if its status is a
/// retryable one, so callers still see the server's message.
pub fn send_with_retries<F>(policy: RetryPolicy, mut make_req: F) -> Result<Response, reqwest::Error>
where
    F: FnMut() -> RequestBuilder,
{
    let mut attempt = 0usize;
    loop {
        let last_attempt = attempt + 1 >= policy.max_attempts.max(1);
        match make_req().send() {
            Ok(resp) => {
                let status = resp.status().as_u16();
                if !last_attempt && is_retryable_status(status) {
                    tracing::debug!(status, attempt, "retrying after transient status");
                    thread::sleep(policy.delay(attempt));
                    attempt += 1;
                    continue;
                }
                return Ok(resp);
            }
            Err(err) => {
                if !last_attempt && is_retryable_error(&err) {
                    tracing::debug!(error = %err, attempt, "retrying after transport error");
                    thread::sleep(policy.delay(attempt));
                    attempt += 1;
                    continue;
                }
                return Err(err);
            }
        }
    }
}

pub fn error_message(response: Response, fallback: &str) -> (u16, String) {
    let status = response.status().as_u16();
    let message = response
        .text()
        .ok()
        .filter(|text| !text.trim().is_empty())
        .unwrap_or_else(|| fallback.to_string());
    (status, message)
}

pub fn is_retryable_status(status: u16) -> bool {
    matches!(status, 429 | 500 | 502 | 503 | 504)
}

fn is_retryable_error(err: &reqwest::Error) -> bool {
    err.is_timeout() || err.is_connect() || err.is_request() || err.is_body()
}
