use std::fmt;
use std::time::Instant;

use camino::Utf8PathBuf;
use serde::Serialize;
use serde_json::Value;
use tokio_util::sync::CancellationToken;

use crate::cache::CacheStore;
use crate::catalog::CatalogClient;
use crate::domain::{CanonicalUsi, ResolvedFile, Usi};
use crate::error::UsiError;
use crate::extract::SpectrumExtractor;
use crate::fs_util;
use crate::object_store::ObjectStoreClient;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    Parsing,
    Resolving,
    CacheCheck,
    Downloading,
    Extracting,
    CacheWrite,
    Cleanup,
    Respond,
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Phase::Parsing => "Parsing",
            Phase::Resolving => "Resolving",
            Phase::CacheCheck => "CacheCheck",
            Phase::Downloading => "Downloading",
            Phase::Extracting => "Extracting",
            Phase::CacheWrite => "CacheWrite",
            Phase::Cleanup => "Cleanup",
            Phase::Respond => "Respond",
        };
        write!(f, "{name}")
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Origin {
    Cache,
    Extracted,
}

#[derive(Debug, Clone, Serialize)]
pub struct Resolution {
    pub usi: String,
    pub canonical_usi: CanonicalUsi,
    pub file: ResolvedFile,
    pub storage_key: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct SpectrumOutcome {
    pub canonical_usi: CanonicalUsi,
    pub origin: Origin,
    pub spectrum: Value,
}

/// Object-safe view of the pipeline, used by the HTTP layer.
pub trait SpectrumSource: Send + Sync {
    fn lookup(&self, usi: &str, cancel: &CancellationToken) -> Result<SpectrumOutcome, UsiError>;
}

#[derive(Clone)]
pub struct App<C: CatalogClient, S: CacheStore, O: ObjectStoreClient, E: SpectrumExtractor> {
    catalog: C,
    cache: S,
    objects: O,
    extractor: E,
    download_dir: Utf8PathBuf,
}

impl<C, S, O, E> App<C, S, O, E>
where
    C: CatalogClient,
    S: CacheStore,
    O: ObjectStoreClient,
    E: SpectrumExtractor,
{
    pub fn new(catalog: C, cache: S, objects: O, extractor: E, download_dir: Utf8PathBuf) -> Self {
        Self {
            catalog,
            cache,
            objects,
            extractor,
            download_dir,
        }
    }

    pub fn resolve(&self, usi: &Usi) -> Result<Resolution, UsiError> {
        let project = usi.project_accession();
        tracing::info!("phase={}; project {project} collection {}", Phase::Resolving, usi.collection_name());
        let start = Instant::now();

        let file_name = self
            .catalog
            .resolve_file(project, usi.collection_name())?
            .ok_or_else(|| UsiError::FileNotResolved {
                project: project.to_string(),
                collection: usi.collection_name().to_string(),
            })?;
        let publication_date = self
            .catalog
            .publication_date(project)?
            .ok_or_else(|| UsiError::ProjectNotResolved(project.to_string()))?;

        let file = ResolvedFile {
            project_accession: project.to_string(),
            publication_date,
            file_name,
            scan_number: usi.scan_number().to_string(),
        };
        let storage_key = file.storage_key()?;
        tracing::info!(
            file = %file.file_name,
            latency_ms = start.elapsed().as_millis() as u64,
            "catalog.response"
        );

        Ok(Resolution {
            usi: usi.to_string(),
            canonical_usi: usi.canonical(),
            file,
            storage_key,
        })
    }

    /// Full pipeline: parse, cache check, resolve, download, extract, cache
    /// write. The downloaded file is removed on every exit path, including
    /// errors and cancellation.
    pub fn spectrum(&self, raw: &str, cancel: &CancellationToken) -> Result<SpectrumOutcome, UsiError> {
        tracing::info!("phase={}; {raw}", Phase::Parsing);
        let usi: Usi = raw.parse()?;
        let key = usi.canonical();

        tracing::info!("phase={}; {key}", Phase::CacheCheck);
        match self.cache.get(&key) {
            Ok(Some(spectrum)) => {
                tracing::info!("phase={}; cache hit {key}", Phase::Respond);
                return Ok(SpectrumOutcome {
                    canonical_usi: key,
                    origin: Origin::Cache,
                    spectrum,
                });
            }
            Ok(None) => {}
            Err(err) => {
                tracing::warn!(error = %err, "cache lookup failed; continuing without cache");
            }
        }
        ensure_active(cancel)?;

        let resolution = self.resolve(&usi)?;
        ensure_active(cancel)?;

        let mut target = fs_util::download_target(&self.download_dir, &resolution.file.file_name)?;
        tracing::info!(
            "phase={}; {} -> {}",
            Phase::Downloading,
            resolution.storage_key,
            target.path().display()
        );
        let start = Instant::now();
        let bytes = self
            .objects
            .download(&resolution.storage_key, target.as_file_mut(), cancel)?;
        tracing::info!(
            bytes,
            latency_ms = start.elapsed().as_millis() as u64,
            "object_store.response"
        );
        ensure_active(cancel)?;

        tracing::info!("phase={}; scan {}", Phase::Extracting, usi.scan_number());
        let start = Instant::now();
        let spectrum = self
            .extractor
            .extract(target.path(), usi.scan_number(), cancel)?;
        tracing::info!(
            latency_ms = start.elapsed().as_millis() as u64,
            "extractor.response"
        );

        tracing::info!("phase={}; {key}", Phase::CacheWrite);
        if let Err(err) = self.cache.put(&key, &spectrum) {
            tracing::warn!(error = %err, "cache write failed; spectrum not cached");
        }

        tracing::info!("phase={}; {}", Phase::Cleanup, target.path().display());
        if let Err(err) = target.close() {
            tracing::warn!(error = %err, "failed to remove downloaded file");
        }

        tracing::info!("phase={}; extracted {key}", Phase::Respond);
        Ok(SpectrumOutcome {
            canonical_usi: key,
            origin: Origin::Extracted,
            spectrum,
        })
    }
}

impl<C, S, O, E> SpectrumSource for App<C, S, O, E>
where
    C: CatalogClient,
    S: CacheStore,
    O: ObjectStoreClient,
    E: SpectrumExtractor,
{
    fn lookup(&self, usi: &str, cancel: &CancellationToken) -> Result<SpectrumOutcome, UsiError> {
        self.spectrum(usi, cancel)
    }
}

fn ensure_active(cancel: &CancellationToken) -> Result<(), UsiError> {
    if cancel.is_cancelled() {
        return Err(UsiError::Cancelled);
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;
    use std::fs::File;
    use std::io::Write;
    use std::path::{Path, PathBuf};
    use std::sync::Mutex;

    use assert_matches::assert_matches;
    use serde_json::json;

    use super::*;

    struct MockCatalog;

    impl CatalogClient for MockCatalog {
        fn list_raw_files(&self, _project: &str) -> Result<Vec<String>, UsiError> {
            Ok(vec!["Run_B.raw".to_string(), "Run_A.RAW".to_string()])
        }

        fn publication_date(&self, _project: &str) -> Result<Option<String>, UsiError> {
            Ok(Some("2019-11-05".to_string()))
        }
    }

    #[derive(Default)]
    struct MemoryCache {
        entries: Mutex<HashMap<String, Value>>,
    }

    impl CacheStore for MemoryCache {
        fn get(&self, key: &CanonicalUsi) -> Result<Option<Value>, UsiError> {
            Ok(self.entries.lock().unwrap().get(key.as_str()).cloned())
        }

        fn put(&self, key: &CanonicalUsi, spectrum: &Value) -> Result<(), UsiError> {
            self.entries
                .lock()
                .unwrap()
                .insert(key.as_str().to_string(), spectrum.clone());
            Ok(())
        }
    }

    #[derive(Default)]
    struct MockObjects {
        keys: Mutex<Vec<String>>,
    }

    impl ObjectStoreClient for MockObjects {
        fn download(
            &self,
            key: &str,
            destination: &mut File,
            _cancel: &CancellationToken,
        ) -> Result<u64, UsiError> {
            self.keys.lock().unwrap().push(key.to_string());
            destination.write_all(b"RAW").unwrap();
            Ok(3)
        }
    }

    #[derive(Default)]
    struct MockExtractor {
        paths: Mutex<Vec<PathBuf>>,
    }

    impl SpectrumExtractor for MockExtractor {
        fn extract(
            &self,
            raw_file: &Path,
            scan: &str,
            _cancel: &CancellationToken,
        ) -> Result<Value, UsiError> {
            assert_eq!(std::fs::read(raw_file).unwrap(), b"RAW");
            self.paths.lock().unwrap().push(raw_file.to_path_buf());
            Ok(json!({ "scan": scan }))
        }
    }

    fn app(dir: &Path) -> App<MockCatalog, MemoryCache, MockObjects, MockExtractor> {
        App::new(
            MockCatalog,
            MemoryCache::default(),
            MockObjects::default(),
            MockExtractor::default(),
            Utf8PathBuf::from_path_buf(dir.to_path_buf()).unwrap(),
        )
    }

    #[test]
    fn second_request_is_served_from_cache() {
        let temp = tempfile::tempdir().unwrap();
        let app = app(temp.path());
        let cancel = CancellationToken::new();

        let first = app.spectrum("mzspec:PXD1:run_a.mzML:scan:7", &cancel).unwrap();
        assert_eq!(first.origin, Origin::Extracted);
        assert_eq!(first.canonical_usi.as_str(), "mzspec:PXD1:run_a:scan:7");

        let second = app.spectrum("mzspec:PXD1:run_a.raw:scan:7", &cancel).unwrap();
        assert_eq!(second.origin, Origin::Cache);
        assert_eq!(second.spectrum, first.spectrum);
        assert_eq!(
            *app.objects.keys.lock().unwrap(),
            vec!["2019/11/PXD1/Run_A.RAW".to_string()]
        );

        let paths = app.extractor.paths.lock().unwrap();
        assert!(paths.iter().all(|path| !path.exists()));
    }

    #[test]
    fn cancelled_request_stops_before_download() {
        let temp = tempfile::tempdir().unwrap();
        let app = app(temp.path());
        let cancel = CancellationToken::new();
        cancel.cancel();

        let err = app.spectrum("mzspec:PXD1:run_a:scan:7", &cancel).unwrap_err();
        assert_matches!(err, UsiError::Cancelled);
        assert!(app.objects.keys.lock().unwrap().is_empty());
    }

    #[test]
    fn phase_names() {
        assert_eq!(Phase::CacheCheck.to_string(), "CacheCheck");
    }
}
