/*
 *  transport.rs
 *
 *  inkbeat - now playing, on paper
 *
 *  Retrying HTTP boundary. Everything above this module sees success or a
 *  terminal failure, never a raw connection hiccup.
 */

use std::time::Duration;

use log::{debug, warn};
use reqwest::{header, Client, RequestBuilder, Response, StatusCode};
use thiserror::Error;

const MAX_ATTEMPTS: u32 = 5;
const BACKOFF_BASE_MS: u64 = 500;

/// Status codes worth retrying; everything else is terminal.
const TRANSIENT_STATUSES: [u16; 5] = [429, 500, 502, 503, 504];

#[derive(Debug, Error)]
pub enum TransportError {
    #[error("HTTP request error: {0}")]
    Request(#[from] reqwest::Error),
    #[error("request failed with status {0}")]
    Status(StatusCode),
    #[error("request not retryable (streaming body)")]
    NotCloneable,
    #[error("gave up after {attempts} attempts, last status {last:?}")]
    RetriesExhausted {
        attempts: u32,
        last: Option<StatusCode>,
    },
}

/// Builds a client with sane timeouts and a stable User-Agent.
pub fn build_client() -> Client {
    const AGENT: &str = concat!(env!("CARGO_PKG_NAME"), " v", env!("CARGO_PKG_VERSION"));

    let mut headers = header::HeaderMap::new();
    headers.insert("User-Agent", header::HeaderValue::from_static(AGENT));

    Client::builder()
        .connect_timeout(Duration::from_secs(5))
        .timeout(Duration::from_secs(15))
        .default_headers(headers)
        .build()
        .expect("reqwest client construction cannot fail with static options")
}

fn is_transient(status: StatusCode) -> bool {
    TRANSIENT_STATUSES.contains(&status.as_u16())
}

/// Sends `request` with bounded retries and exponential backoff, retrying
/// on connect errors and the transient status set only. Returns the first
/// successful (or terminally failed) response.
pub async fn send_with_retry(request: RequestBuilder) -> Result<Response, TransportError> {
    let mut last_status = None;

    for attempt in 0..MAX_ATTEMPTS {
        if attempt > 0 {
            let backoff = Duration::from_millis(BACKOFF_BASE_MS << (attempt - 1));
            debug!("transient failure, retrying in {:?} ({attempt}/{MAX_ATTEMPTS})", backoff);
            tokio::time::sleep(backoff).await;
        }

        let req = request.try_clone().ok_or(TransportError::NotCloneable)?;
        match req.send().await {
            Ok(resp) => {
                let status = resp.status();
                if status.is_success() {
                    return Ok(resp);
                }
                if is_transient(status) {
                    warn!("transient HTTP status {status}, attempt {}", attempt + 1);
                    last_status = Some(status);
                    continue;
                }
                return Err(TransportError::Status(status));
            }
            Err(e) if e.is_connect() || e.is_timeout() => {
                warn!("connection failure, attempt {}: {e}", attempt + 1);
                continue;
            }
            Err(e) => return Err(TransportError::Request(e)),
        }
    }

    Err(TransportError::RetriesExhausted {
        attempts: MAX_ATTEMPTS,
        last: last_status,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_transient_status_set() {
        for code in [429u16, 500, 502, 503, 504] {
            assert!(is_transient(StatusCode::from_u16(code).unwrap()));
        }
        for code in [400u16, 401, 403, 404, 204] {
            assert!(!is_transient(StatusCode::from_u16(code).unwrap()));
        }
    }
}
