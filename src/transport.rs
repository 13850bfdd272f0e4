use std::fs::File;
use std::io::{self, Read};
use std::path::Path;
use std::thread;
use std::time::Duration;

use reqwest::blocking::{Client, RequestBuilder, Response};
use reqwest::header::{HeaderMap, HeaderValue, USER_AGENT};
use tracing::{debug, warn};

use crate::error::SlaError;

const MAX_RETRIES: usize = 3;
const BASE_DELAY_MS: u64 = 200;
const KEEPALIVE: Duration = Duration::from_secs(30);

pub trait Transport: Send + Sync {
    fn get_bytes(&self, url: &str, query: &[(&str, String)]) -> Result<Vec<u8>, SlaError>;

    fn get_bundle(&self, url: &str, query: &[(&str, String)]) -> Result<Vec<u8>, SlaError> {
        self.get_bytes(url, query)
    }

    fn download(&self, url: &str, destination: &Path) -> Result<u64, SlaError>;
}

/// `api` carries the request deadline; `bulk` only bounds connecting, so long transfers
/// are never cut off while data keeps arriving.
#[derive(Clone)]
pub struct HttpTransport {
    api: Client,
    bulk: Client,
}

impl HttpTransport {
    pub fn new(timeout: Duration) -> Result<Self, SlaError> {
        let mut headers = HeaderMap::new();
        headers.insert(
            USER_AGENT,
            HeaderValue::from_str(&format!("sla-cli/{}", env!("CARGO_PKG_VERSION")))
                .map_err(|err| SlaError::Http(err.to_string()))?,
        );
        let api = Client::builder()
            .default_headers(headers.clone())
            .connect_timeout(timeout)
            .timeout(timeout)
            .build()
            .map_err(|err| SlaError::Http(err.to_string()))?;
        let bulk = Client::builder()
            .default_headers(headers)
            .connect_timeout(timeout)
            .timeout(None::<Duration>)
            .tcp_keepalive(KEEPALIVE)
            .build()
            .map_err(|err| SlaError::Http(err.to_string()))?;
        Ok(Self { api, bulk })
    }

    fn send_with_retries<F>(&self, mut make_req: F) -> Result<Response, SlaError>
    where
        F: FnMut() -> RequestBuilder,
    {
        let mut attempt = 0usize;
        loop {
            match make_req().send() {
                Ok(resp) => {
                    let status = resp.status().as_u16();
                    if attempt < MAX_RETRIES && is_retryable_status(status) {
                        debug!(status, attempt, "retrying request");
                        backoff(attempt);
                        attempt += 1;
                        continue;
                    }
                    return Ok(resp);
                }
                Err(err) => {
                    if attempt < MAX_RETRIES && is_retryable_error(&err) {
                        debug!(error = %err, attempt, "retrying request");
                        backoff(attempt);
                        attempt += 1;
                        continue;
                    }
                    return Err(SlaError::Http(err.to_string()));
                }
            }
        }
    }

    fn handle_status(url: &str, response: Response) -> Result<Response, SlaError> {
        if response.status().is_success() {
            return Ok(response);
        }
        let status = response.status().as_u16();
        let message = response
            .text()
            .unwrap_or_else(|_| "request failed".to_string());
        Err(SlaError::HttpStatus {
            url: url.to_string(),
            status,
            message,
        })
    }

    fn transfer<T, F>(
        &self,
        client: &Client,
        url: &str,
        query: &[(&str, String)],
        mut consume: F,
    ) -> Result<T, SlaError>
    where
        F: FnMut(&mut Response) -> io::Result<T>,
    {
        let mut attempt = 0usize;
        loop {
            let response = self.send_with_retries(|| client.get(url).query(query))?;
            let mut response = Self::handle_status(url, response)?;
            match consume(&mut response) {
                Ok(value) => return Ok(value),
                Err(err) if attempt < MAX_RETRIES => {
                    warn!(%url, error = %err, attempt, "transfer interrupted, starting over");
                    backoff(attempt);
                    attempt += 1;
                }
                Err(err) => return Err(SlaError::Http(format!("{url}: {err}"))),
            }
        }
    }
}

impl Transport for HttpTransport {
    fn get_bytes(&self, url: &str, query: &[(&str, String)]) -> Result<Vec<u8>, SlaError> {
        self.transfer(&self.api, url, query, |response| {
            let mut body = Vec::new();
            response.read_to_end(&mut body)?;
            Ok(body)
        })
    }

    fn get_bundle(&self, url: &str, query: &[(&str, String)]) -> Result<Vec<u8>, SlaError> {
        self.transfer(&self.bulk, url, query, |response| {
            let mut body = Vec::new();
            response.read_to_end(&mut body)?;
            Ok(body)
        })
    }

    fn download(&self, url: &str, destination: &Path) -> Result<u64, SlaError> {
        if let Some(parent) = destination.parent() {
            std::fs::create_dir_all(parent)
                .map_err(|err| SlaError::Filesystem(err.to_string()))?;
        }
        self.transfer(&self.bulk, url, &[], |response| {
            let mut file = File::create(destination)?;
            io::copy(response, &mut file)
        })
    }
}

fn backoff(attempt: usize) {
    thread::sleep(Duration::from_millis(BASE_DELAY_MS * (attempt as u64 + 1)));
}

fn is_retryable_status(status: u16) -> bool {
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
        assert!(!is_retryable_status(200));
    }
}
