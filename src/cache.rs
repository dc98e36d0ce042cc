use std::time::Duration;

use reqwest::Url;
use reqwest::blocking::{Client, RequestBuilder, Response};
use serde_json::{Value, json};

use crate::config::CacheSettings;
use crate::domain::CanonicalUsi;
use crate::error::UsiError;
use crate::http_util;

pub trait CacheStore: Send + Sync {
    fn get(&self, key: &CanonicalUsi) -> Result<Option<Value>, UsiError>;
    fn put(&self, key: &CanonicalUsi, spectrum: &Value) -> Result<(), UsiError>;
}

impl<T: CacheStore + ?Sized> CacheStore for Box<T> {
    fn get(&self, key: &CanonicalUsi) -> Result<Option<Value>, UsiError> {
        (**self).get(key)
    }

    fn put(&self, key: &CanonicalUsi, spectrum: &Value) -> Result<(), UsiError> {
        (**self).put(key, spectrum)
    }
}

#[derive(Debug, Clone, Copy, Default)]
pub struct NoopCache;

impl CacheStore for NoopCache {
    fn get(&self, _key: &CanonicalUsi) -> Result<Option<Value>, UsiError> {
        Ok(None)
    }

    fn put(&self, _key: &CanonicalUsi, _spectrum: &Value) -> Result<(), UsiError> {
        Ok(())
    }
}

/// Elasticsearch-backed spectrum cache. Documents are `{usi, spectrum}` with
/// the spectrum stored as serialized JSON text and the canonical USI as the
/// document id, so a repeated `put` replaces the earlier record.
#[derive(Clone)]
pub struct ElasticCacheStore {
    client: Client,
    servers: Vec<Url>,
    index: String,
    username: Option<String>,
    password: Option<String>,
}

impl ElasticCacheStore {
    pub fn new(settings: &CacheSettings) -> Result<Self, UsiError> {
        let servers = settings
            .servers
            .iter()
            .map(|server| server_url(server, settings.port))
            .collect::<Result<Vec<_>, _>>()?;
        if servers.is_empty() {
            return Err(UsiError::ConfigParse(
                "cache store requires at least one server".to_string(),
            ));
        }
        let client = Client::builder()
            .default_headers(http_util::default_headers()?)
            .timeout(Duration::from_secs(10))
            .build()
            .map_err(|err| UsiError::CacheStoreUnavailable(err.to_string()))?;
        Ok(Self {
            client,
            servers,
            index: settings.index.clone(),
            username: settings.username.clone(),
            password: settings.password.clone(),
        })
    }

    pub fn ensure_index(&self) -> Result<(), UsiError> {
        let response = self.send(|client, base| client.head(index_url(base, &self.index, &[])))?;
        if response.status().is_success() {
            return Ok(());
        }
        let response = self.send(|client, base| {
            client
                .put(index_url(base, &self.index, &[]))
                .json(&index_mapping())
        })?;
        if response.status().is_success() || response.status().as_u16() == 400 {
            // 400 means another instance created it first.
            tracing::info!(index = %self.index, "cache index ready");
            return Ok(());
        }
        let (status, message) = http_util::error_message(response, "index creation failed");
        Err(UsiError::CacheStoreUnavailable(format!("status {status}: {message}")))
    }

    fn send<F>(&self, make_req: F) -> Result<Response, UsiError>
    where
        F: Fn(&Client, &Url) -> RequestBuilder,
    {
        let mut last_error = None;
        for base in &self.servers {
            let mut request = make_req(&self.client, base);
            if let Some(username) = &self.username {
                request = request.basic_auth(username, self.password.as_deref());
            }
            match request.send() {
                Ok(response) => return Ok(response),
                Err(err) => {
                    tracing::debug!(server = %base, error = %err, "cache server unreachable");
                    last_error = Some(err.to_string());
                }
            }
        }
        Err(UsiError::CacheStoreUnavailable(
            last_error.unwrap_or_else(|| "no cache servers configured".to_string()),
        ))
    }
}

impl CacheStore for ElasticCacheStore {
    fn get(&self, key: &CanonicalUsi) -> Result<Option<Value>, UsiError> {
        let response = self.send(|client, base| {
            client
                .post(index_url(base, &self.index, &["_search"]))
                .json(&search_body(key))
        })?;
        if response.status().as_u16() == 404 {
            return Ok(None);
        }
        if !response.status().is_success() {
            let (status, message) = http_util::error_message(response, "cache lookup failed");
            return Err(UsiError::CacheStoreUnavailable(format!(
                "status {status}: {message}"
            )));
        }
        let body: Value = response
            .json()
            .map_err(|err| UsiError::CacheStoreUnavailable(err.to_string()))?;
        first_hit_spectrum(&body)
    }

    fn put(&self, key: &CanonicalUsi, spectrum: &Value) -> Result<(), UsiError> {
        let document = cache_document(key, spectrum)?;
        let response = self.send(|client, base| {
            client
                .put(index_url(base, &self.index, &["_doc", key.as_str()]))
                .json(&document)
        })?;
        if response.status().is_success() {
            return Ok(());
        }
        let (status, message) = http_util::error_message(response, "cache write failed");
        Err(UsiError::CacheStoreUnavailable(format!(
            "status {status}: {message}"
        )))
    }
}

pub fn server_url(server: &str, port: u16) -> Result<Url, UsiError> {
    let raw = if server.contains("://") {
        server.to_string()
    } else {
        format!("http://{server}")
    };
    let mut url = Url::parse(&raw)
        .map_err(|err| UsiError::ConfigParse(format!("invalid cache server {server}: {err}")))?;
    if url.port().is_none() {
        url.set_port(Some(port))
            .map_err(|_| UsiError::ConfigParse(format!("invalid cache server {server}")))?;
    }
    Ok(url)
}

fn index_url(base: &Url, index: &str, rest: &[&str]) -> Url {
    let mut url = base.clone();
    if let Ok(mut segments) = url.path_segments_mut() {
        segments.pop_if_empty().push(index).extend(rest);
    }
    url
}

fn index_mapping() -> Value {
    json!({
        "mappings": {
            "properties": {
                "usi": { "type": "keyword" },
                "spectrum": { "type": "text", "index": false }
            }
        }
    })
}

pub fn search_body(key: &CanonicalUsi) -> Value {
    json!({
        "size": 1,
        "query": { "term": { "usi": key.as_str() } }
    })
}

pub fn cache_document(key: &CanonicalUsi, spectrum: &Value) -> Result<Value, UsiError> {
    let serialized = serde_json::to_string(spectrum)
        .map_err(|err| UsiError::CacheStoreUnavailable(err.to_string()))?;
    Ok(json!({ "usi": key.as_str(), "spectrum": serialized }))
}

/// Spectrum of the first hit; older records may hold the document inline
/// rather than as serialized text.
pub fn first_hit_spectrum(body: &Value) -> Result<Option<Value>, UsiError> {
    let Some(stored) = body
        .pointer("/hits/hits/0/_source/spectrum")
        .filter(|value| !value.is_null())
    else {
        return Ok(None);
    };
    match stored {
        Value::String(text) => serde_json::from_str(text)
            .map(Some)
            .map_err(|err| UsiError::CacheStoreUnavailable(format!("corrupt cache record: {err}"))),
        other => Ok(Some(other.clone())),
    }
}
