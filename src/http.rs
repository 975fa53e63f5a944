use std::thread;
use std::time::Duration;

use reqwest::blocking::{Client, RequestBuilder, Response};
use reqwest::header::{HeaderMap, HeaderName, HeaderValue, USER_AGENT};

use crate::error::BridgeError;

const MAX_RETRIES: usize = 3;
const BASE_DELAY_MS: u64 = 200;

/// Blocking client with the crate user agent plus `extra` headers.
pub fn build_client(
    extra: &[(&'static str, String)],
    timeout: Duration,
    on_error: fn(String) -> BridgeError,
) -> Result<Client, BridgeError> {
    let mut headers = HeaderMap::new();
    headers.insert(
        USER_AGENT,
        HeaderValue::from_str(&format!("synbridge/{}", env!("CARGO_PKG_VERSION")))
            .map_err(|err| on_error(err.to_string()))?,
    );
    for (name, value) in extra {
        let mut value = HeaderValue::from_str(value).map_err(|err| on_error(err.to_string()))?;
        value.set_sensitive(true);
        headers.insert(HeaderName::from_static(name), value);
    }
    Client::builder()
        .default_headers(headers)
        .timeout(timeout)
        .build()
        .map_err(|err| on_error(err.to_string()))
}

/// Sends the request built by `make_req`, retrying transient failures with a
/// linear backoff. Non-retryable responses are returned as-is.
pub fn send_with_retries<F>(
    mut make_req: F,
    on_error: fn(String) -> BridgeError,
) -> Result<Response, BridgeError>
where
    F: FnMut() -> RequestBuilder,
{
    let mut attempt = 0usize;
    loop {
        match make_req().send() {
            Ok(resp) => {
                let status = resp.status().as_u16();
                if attempt < MAX_RETRIES && is_retryable_status(status) {
                    tracing::debug!(status, attempt, "retrying request");
                    backoff(attempt);
                    attempt += 1;
                    continue;
                }
                return Ok(resp);
            }
            Err(err) => {
                if attempt < MAX_RETRIES && is_retryable_error(&err) {
                    tracing::debug!(error = %err, attempt, "retrying request");
                    backoff(attempt);
                    attempt += 1;
                    continue;
                }
                return Err(on_error(err.to_string()));
            }
        }
    }
}

/// Turns a non-success response into the caller's status error.
pub fn check_status(
    response: Response,
    on_status: fn(u16, String) -> BridgeError,
) -> Result<Response, BridgeError> {
    if response.status().is_success() {
        return Ok(response);
    }
    let status = response.status().as_u16();
    let message = response
        .text()
        .unwrap_or_else(|_| "request failed".to_string());
    Err(on_status(status, message))
}

fn backoff(attempt: usize) {
    let delay = BASE_DELAY_MS * (attempt as u64 + 1);
    thread::sleep(Duration::from_millis(delay));
}

pub fn is_retryable_status(status: u16) -> bool {
    matches!(status, 429 | 500 | 502 | 503 | 504)
}

fn is_retryable_error(err: &reqwest::Error) -> bool {
    err.is_timeout() || err.is_connect() || err.is_request()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn retryable_statuses() {
        assert!(is_retryable_status(429));
        assert!(is_retryable_status(503));
        assert!(!is_retryable_status(404));
        assert!(!is_retryable_status(409));
    }
}
