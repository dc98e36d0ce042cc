use std::fs;
use std::path::PathBuf;

use camino::Utf8PathBuf;
use directories::BaseDirs;
use serde::{Deserialize, Serialize};

use crate::error::UsiError;

pub const DEFAULT_PROFILE: &str = "default";

#[derive(Debug, Default, Deserialize, Serialize)]
pub struct Config {
    #[serde(default)]
    pub schema_version: Option<u32>,
    #[serde(default)]
    pub listen_port: Option<u16>,
    #[serde(default)]
    pub download_dir: Option<Utf8PathBuf>,
    #[serde(default)]
    pub workers: Option<usize>,
    #[serde(default)]
    pub catalog: Option<CatalogEntry>,
    #[serde(default)]
    pub object_store: Option<ObjectStoreEntry>,
    #[serde(default)]
    pub cache: Option<CacheEntry>,
    #[serde(default)]
    pub extractor: Option<ExtractorEntry>,
}

#[derive(Debug, Default, Deserialize, Serialize)]
pub struct CatalogEntry {
    #[serde(default)]
    pub base_url: Option<String>,
    #[serde(default)]
    pub page_size: Option<usize>,
    #[serde(default)]
    pub max_pages: Option<usize>,
    #[serde(default)]
    pub timeout_secs: Option<u64>,
}

#[derive(Debug, Default, Deserialize, Serialize)]
pub struct ObjectStoreEntry {
    #[serde(default)]
    pub endpoint: Option<String>,
    #[serde(default)]
    pub bucket: Option<String>,
    #[serde(default)]
    pub proxy: Option<String>,
    #[serde(default)]
    pub max_attempts: Option<usize>,
}

#[derive(Debug, Default, Deserialize, Serialize)]
pub struct CacheEntry {
    #[serde(default)]
    pub enabled: Option<bool>,
    #[serde(default)]
    pub servers: Vec<String>,
    #[serde(default)]
    pub port: Option<u16>,
    #[serde(default)]
    pub username: Option<String>,
    #[serde(default)]
    pub password: Option<String>,
    #[serde(default)]
    pub index: Option<String>,
}

#[derive(Debug, Default, Deserialize, Serialize)]
pub struct ExtractorEntry {
    #[serde(default)]
    pub program: Option<PathBuf>,
    #[serde(default)]
    pub args: Vec<String>,
    #[serde(default)]
    pub timeout_secs: Option<u64>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CatalogSettings {
    pub base_url: String,
    pub page_size: usize,
    pub max_pages: usize,
    pub timeout_secs: u64,
}

impl Default for CatalogSettings {
    fn default() -> Self {
        Self {
            base_url: "https://www.ebi.ac.uk/pride/ws/archive/v2".to_string(),
            page_size: 100,
            max_pages: 1000,
            timeout_secs: 60,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ObjectStoreSettings {
    pub endpoint: String,
    pub bucket: String,
    pub proxy: Option<String>,
    pub max_attempts: usize,
}

impl Default for ObjectStoreSettings {
    fn default() -> Self {
        Self {
            endpoint: "https://hh.fire.sdo.ebi.ac.uk/fire/public".to_string(),
            bucket: "pride-public".to_string(),
            proxy: None,
            max_attempts: 10,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CacheSettings {
    pub enabled: bool,
    pub servers: Vec<String>,
    pub port: u16,
    pub username: Option<String>,
    pub password: Option<String>,
    pub index: String,
}

impl Default for CacheSettings {
    fn default() -> Self {
        Self {
            enabled: false,
            servers: Vec::new(),
            port: 9200,
            username: None,
            password: None,
            index: "usi-spectra".to_string(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExtractorSettings {
    pub program: PathBuf,
    /// Arguments placed before `query`, e.g. `["ThermoRawFileParser.exe"]` for `mono`.
    pub args: Vec<String>,
    pub timeout_secs: u64,
}

impl Default for ExtractorSettings {
    fn default() -> Self {
        Self {
            program: PathBuf::from("ThermoRawFileParser.sh"),
            args: Vec::new(),
            timeout_secs: 600,
        }
    }
}

#[derive(Debug, Clone)]
pub struct ResolvedConfig {
    pub schema_version: u32,
    pub listen_port: u16,
    pub download_dir: Utf8PathBuf,
    pub workers: usize,
    pub catalog: CatalogSettings,
    pub object_store: ObjectStoreSettings,
    pub cache: CacheSettings,
    pub extractor: ExtractorSettings,
}

pub struct ConfigLoader;

impl ConfigLoader {
    pub fn resolve(path: Option<&str>, profile: &str) -> Result<ResolvedConfig, UsiError> {
        let config_path = match path {
            Some(path) => PathBuf::from(path),
            None => PathBuf::from(profile_file_name(profile)),
        };

        if path.is_none() && !config_path.exists() {
            return Err(UsiError::MissingConfig);
        }

        let content = fs::read_to_string(&config_path)
            .map_err(|_| UsiError::ConfigRead(config_path.clone()))?;
        let config: Config = serde_json::from_str(&content)
            .map_err(|err| UsiError::ConfigParse(err.to_string()))?;

        tracing::info!(path = %config_path.display(), profile, "loaded configuration");
        Self::resolve_config(config)
    }

    pub fn resolve_config(config: Config) -> Result<ResolvedConfig, UsiError> {
        let schema_version = config.schema_version.unwrap_or(1);
        if schema_version != 1 {
            return Err(UsiError::ConfigParse(format!(
                "unsupported schema_version {schema_version}"
            )));
        }

        let catalog_defaults = CatalogSettings::default();
        let catalog = config.catalog.unwrap_or_default();
        let catalog = CatalogSettings {
            base_url: catalog.base_url.unwrap_or(catalog_defaults.base_url),
            page_size: catalog.page_size.unwrap_or(catalog_defaults.page_size),
            max_pages: catalog.max_pages.unwrap_or(catalog_defaults.max_pages),
            timeout_secs: catalog.timeout_secs.unwrap_or(catalog_defaults.timeout_secs),
        };
        if catalog.page_size == 0 || catalog.max_pages == 0 {
            return Err(UsiError::ConfigParse(
                "catalog page_size and max_pages must be positive".to_string(),
            ));
        }

        let store_defaults = ObjectStoreSettings::default();
        let store = config.object_store.unwrap_or_default();
        let object_store = ObjectStoreSettings {
            endpoint: store.endpoint.unwrap_or(store_defaults.endpoint),
            bucket: store.bucket.unwrap_or(store_defaults.bucket),
            proxy: store.proxy.filter(|proxy| !proxy.trim().is_empty()),
            max_attempts: store.max_attempts.unwrap_or(store_defaults.max_attempts).max(1),
        };

        let cache_defaults = CacheSettings::default();
        let cache = match config.cache {
            Some(entry) => CacheSettings {
                enabled: entry.enabled.unwrap_or(!entry.servers.is_empty()),
                servers: entry.servers,
                port: entry.port.unwrap_or(cache_defaults.port),
                username: entry.username,
                password: entry.password,
                index: entry.index.unwrap_or(cache_defaults.index),
            },
            None => cache_defaults,
        };
        if cache.enabled && cache.servers.is_empty() {
            return Err(UsiError::ConfigParse(
                "cache is enabled but no servers are configured".to_string(),
            ));
        }

        let extractor_defaults = ExtractorSettings::default();
        let extractor = config.extractor.unwrap_or_default();
        let extractor = ExtractorSettings {
            program: extractor.program.unwrap_or(extractor_defaults.program),
            args: extractor.args,
            timeout_secs: extractor.timeout_secs.unwrap_or(extractor_defaults.timeout_secs),
        };

        let download_dir = match config.download_dir {
            Some(dir) => dir,
            None => default_download_dir()?,
        };

        Ok(ResolvedConfig {
            schema_version,
            listen_port: config.listen_port.unwrap_or(8090),
            download_dir,
            workers: config.workers.unwrap_or_else(default_workers).max(1),
            catalog,
            object_store,
            cache,
            extractor,
        })
    }
}

pub fn profile_file_name(profile: &str) -> String {
    if profile == DEFAULT_PROFILE {
        "usi-service.json".to_string()
    } else {
        format!("usi-service.{profile}.json")
    }
}

pub fn default_download_dir() -> Result<Utf8PathBuf, UsiError> {
    BaseDirs::new()
        .and_then(|dirs| {
            Utf8PathBuf::from_path_buf(dirs.cache_dir().join("usi-service").join("downloads")).ok()
        })
        .ok_or_else(|| UsiError::Filesystem("unable to resolve download directory".to_string()))
}

fn default_workers() -> usize {
    std::thread::available_parallelism()
        .map(|value| value.get())
        .unwrap_or(4)
}
