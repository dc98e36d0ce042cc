use std::fs::File;
use std::io::{Read, Seek, SeekFrom, Write};
use std::thread;
use std::time::Duration;

use reqwest::blocking::Client;
use reqwest::{Proxy, Url};
use tokio_util::sync::CancellationToken;

use crate::config::ObjectStoreSettings;
use crate::error::UsiError;
use crate::http_util::{self, RetryPolicy};

const CHUNK_SIZE: usize = 256 * 1024;

pub trait ObjectStoreClient: Send + Sync {
    fn download(
        &self,
        key: &str,
        destination: &mut File,
        cancel: &CancellationToken,
    ) -> Result<u64, UsiError>;
}

enum Attempt {
    Retry(String),
    Fail(UsiError),
}

#[derive(Clone)]
pub struct FireHttpClient {
    client: Client,
    endpoint: String,
    bucket: String,
    retry: RetryPolicy,
}

impl FireHttpClient {
    pub fn new(settings: &ObjectStoreSettings) -> Result<Self, UsiError> {
        let mut builder = Client::builder()
            .default_headers(http_util::default_headers()?)
            .connect_timeout(Duration::from_secs(30));
        if let Some(proxy) = &settings.proxy {
            let proxy = Proxy::all(proxy.as_str())
                .map_err(|err| UsiError::ConfigParse(format!("invalid proxy {proxy}: {err}")))?;
            builder = builder.proxy(proxy);
        }
        let client = builder
            .build()
            .map_err(|err| UsiError::ObjectStoreUnavailable(err.to_string()))?;
        Ok(Self {
            client,
            endpoint: settings.endpoint.trim_end_matches('/').to_string(),
            bucket: settings.bucket.clone(),
            retry: RetryPolicy::new(settings.max_attempts, 500),
        })
    }

    pub fn object_url(&self, key: &str) -> Result<Url, UsiError> {
        let mut url = Url::parse(&self.endpoint)
            .map_err(|err| UsiError::ObjectStoreUnavailable(err.to_string()))?;
        {
            let mut segments = url.path_segments_mut().map_err(|_| {
                UsiError::ObjectStoreUnavailable(format!("invalid endpoint {}", self.endpoint))
            })?;
            segments.pop_if_empty().push(&self.bucket);
            for part in key.split('/').filter(|part| !part.is_empty()) {
                segments.push(part);
            }
        }
        Ok(url)
    }

    fn attempt(
        &self,
        url: &Url,
        key: &str,
        destination: &mut File,
        cancel: &CancellationToken,
    ) -> Result<u64, Attempt> {
        let mut response = match self.client.get(url.clone()).send() {
            Ok(response) => response,
            Err(err) => return Err(Attempt::Retry(err.to_string())),
        };
        let status = response.status().as_u16();
        if matches!(status, 403 | 404) {
            return Err(Attempt::Fail(UsiError::ObjectNotFound(key.to_string())));
        }
        if !response.status().is_success() {
            let (status, message) = http_util::error_message(response, "object store request failed");
            let message = format!("status {status}: {message}");
            return if http_util::is_retryable_status(status) {
                Err(Attempt::Retry(message))
            } else {
                Err(Attempt::Fail(UsiError::ObjectStoreUnavailable(message)))
            };
        }

        let mut buffer = vec![0u8; CHUNK_SIZE];
        let mut written = 0u64;
        loop {
            if cancel.is_cancelled() {
                return Err(Attempt::Fail(UsiError::Cancelled));
            }
            let read = response
                .read(&mut buffer)
                .map_err(|err| Attempt::Retry(err.to_string()))?;
            if read == 0 {
                break;
            }
            destination
                .write_all(&buffer[..read])
                .map_err(|err| Attempt::Fail(UsiError::Filesystem(err.to_string())))?;
            written += read as u64;
        }
        destination
            .flush()
            .map_err(|err| Attempt::Fail(UsiError::Filesystem(err.to_string())))?;
        Ok(written)
    }
}

impl ObjectStoreClient for FireHttpClient {
    fn download(
        &self,
        key: &str,
        destination: &mut File,
        cancel: &CancellationToken,
    ) -> Result<u64, UsiError> {
        let url = self.object_url(key)?;
        let mut attempt = 0usize;
        loop {
            if cancel.is_cancelled() {
                return Err(UsiError::Cancelled);
            }
            match self.attempt(&url, key, destination, cancel) {
                Ok(bytes) => return Ok(bytes),
                Err(Attempt::Fail(err)) => return Err(err),
                Err(Attempt::Retry(message)) => {
                    attempt += 1;
                    if attempt >= self.retry.max_attempts {
                        return Err(UsiError::ObjectStoreUnavailable(format!(
                            "{key}: {message} (after {attempt} attempts)"
                        )));
                    }
                    tracing::warn!(key, attempt, error = %message, "object download failed; retrying");
                    thread::sleep(self.retry.base_delay * attempt as u32);
                    destination
                        .set_len(0)
                        .and_then(|_| destination.seek(SeekFrom::Start(0)).map(|_| ()))
                        .map_err(|err| UsiError::Filesystem(err.to_string()))?;
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn object_url_layout() {
        let client = FireHttpClient::new(&ObjectStoreSettings {
            endpoint: "https://objects.example.org/fire/public/".to_string(),
            bucket: "pride-public".to_string(),
            proxy: None,
            max_attempts: 10,
        })
        .unwrap();
        let url = client
            .object_url("2013/04/PXD000966/CPTAC_CompRef_00_iTRAQ_05_2Feb12_Cougar_11-10-09.raw")
            .unwrap();
        assert_eq!(
            url.as_str(),
            "https://objects.example.org/fire/public/pride-public/2013/04/PXD000966/CPTAC_CompRef_00_iTRAQ_05_2Feb12_Cougar_11-10-09.raw"
        );
    }
}
