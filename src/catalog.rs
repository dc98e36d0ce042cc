use std::collections::HashSet;
use std::time::Duration;

use reqwest::Url;
use reqwest::blocking::Client;
use serde::Deserialize;
use serde_json::Value;

use crate::config::CatalogSettings;
use crate::domain::strip_raw_extension;
use crate::error::UsiError;
use crate::http_util::{self, RetryPolicy};

pub trait CatalogClient: Send + Sync {
    fn list_raw_files(&self, project: &str) -> Result<Vec<String>, UsiError>;

    fn publication_date(&self, project: &str) -> Result<Option<String>, UsiError>;

    fn resolve_file(&self, project: &str, collection: &str) -> Result<Option<String>, UsiError> {
        let files = self.list_raw_files(project)?;
        Ok(find_raw_file(&files, collection).map(str::to_string))
    }
}

pub fn find_raw_file<'a>(files: &'a [String], collection: &str) -> Option<&'a str> {
    let wanted = format!("{}.raw", strip_raw_extension(collection));
    files
        .iter()
        .map(String::as_str)
        .find(|name| name.eq_ignore_ascii_case(&wanted))
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CatalogPage {
    pub file_names: Vec<String>,
    pub next: Option<String>,
}

#[derive(Debug, Deserialize)]
struct HalPage {
    #[serde(rename = "_embedded", default)]
    embedded: Option<HalEmbedded>,
    #[serde(rename = "_links", default)]
    links: Option<HalLinks>,
}

#[derive(Debug, Deserialize)]
struct HalEmbedded {
    #[serde(default)]
    files: Vec<HalFile>,
}

#[derive(Debug, Deserialize)]
struct HalFile {
    #[serde(rename = "fileName")]
    file_name: String,
}

#[derive(Debug, Deserialize)]
struct HalLinks {
    next: Option<HalLink>,
}

#[derive(Debug, Deserialize)]
struct HalLink {
    href: String,
}

pub fn parse_page(raw: Value) -> Result<CatalogPage, UsiError> {
    let page: HalPage =
        serde_json::from_value(raw).map_err(|err| UsiError::CatalogUnavailable(err.to_string()))?;
    Ok(CatalogPage {
        file_names: page
            .embedded
            .map(|embedded| embedded.files.into_iter().map(|file| file.file_name).collect())
            .unwrap_or_default(),
        next: page.links.and_then(|links| links.next).map(|link| link.href),
    })
}

pub fn collect_pages<F>(first_url: &str, max_pages: usize, mut fetch: F) -> Result<Vec<String>, UsiError>
where
    F: FnMut(&str) -> Result<CatalogPage, UsiError>,
{
    let mut files = Vec::new();
    let mut seen = HashSet::new();
    let mut cursor = Some(first_url.to_string());
    let mut pages = 0usize;

    while let Some(url) = cursor.take() {
        if pages >= max_pages {
            return Err(UsiError::CatalogUnavailable(format!(
                "file listing exceeded {max_pages} pages"
            )));
        }
        if !seen.insert(url.clone()) {
            tracing::warn!(%url, "catalog returned a repeated next link; stopping");
            break;
        }
        let page = fetch(&url)?;
        pages += 1;
        if page.file_names.is_empty() {
            break;
        }
        files.extend(page.file_names);
        cursor = page.next;
    }

    tracing::debug!(pages, files = files.len(), "catalog listing complete");
    Ok(files)
}

#[derive(Clone)]
pub struct PrideHttpClient {
    client: Client,
    base_url: String,
    page_size: usize,
    max_pages: usize,
    retry: RetryPolicy,
}

impl PrideHttpClient {
    pub fn new(settings: &CatalogSettings) -> Result<Self, UsiError> {
        let client = Client::builder()
            .default_headers(http_util::default_headers()?)
            .timeout(Duration::from_secs(settings.timeout_secs))
            .build()
            .map_err(|err| UsiError::CatalogUnavailable(err.to_string()))?;
        Ok(Self {
            client,
            base_url: settings.base_url.trim_end_matches('/').to_string(),
            page_size: settings.page_size,
            max_pages: settings.max_pages,
            retry: RetryPolicy::default(),
        })
    }

    pub fn files_url(&self, project: &str) -> Result<String, UsiError> {
        let page_size = self.page_size.to_string();
        Url::parse_with_params(
            &format!("{}/files/byProject", self.base_url),
            &[
                ("accession", project),
                ("filter", "fileCategory.value==RAW"),
                ("pageSize", page_size.as_str()),
                ("sortDirection", "DESC"),
                ("sortConditions", "fileName"),
            ],
        )
        .map(String::from)
        .map_err(|err| UsiError::CatalogUnavailable(err.to_string()))
    }

    fn project_url(&self, project: &str) -> Result<Url, UsiError> {
        let mut url =
            Url::parse(&self.base_url).map_err(|err| UsiError::CatalogUnavailable(err.to_string()))?;
        url.path_segments_mut()
            .map_err(|_| UsiError::CatalogUnavailable(format!("invalid base url {}", self.base_url)))?
            .pop_if_empty()
            .push("projects")
            .push(project);
        Ok(url)
    }

    fn get_json(&self, url: &str) -> Result<Option<Value>, UsiError> {
        let response = http_util::send_with_retries(self.retry, || self.client.get(url))
            .map_err(|err| UsiError::CatalogUnavailable(err.to_string()))?;
        if response.status().as_u16() == 404 {
            return Ok(None);
        }
        if !response.status().is_success() {
            let (status, message) = http_util::error_message(response, "catalog request failed");
            if http_util::is_retryable_status(status) {
                return Err(UsiError::CatalogUnavailable(format!("status {status}: {message}")));
            }
            return Err(UsiError::CatalogStatus { status, message });
        }
        response
            .json()
            .map(Some)
            .map_err(|err| UsiError::CatalogUnavailable(err.to_string()))
    }
}

impl CatalogClient for PrideHttpClient {
    fn list_raw_files(&self, project: &str) -> Result<Vec<String>, UsiError> {
        let first = self.files_url(project)?;
        collect_pages(&first, self.max_pages, |url| match self.get_json(url)? {
            Some(raw) => parse_page(raw),
            // An unknown project has no listing; a later page going missing is a fault.
            None if url == first => Ok(CatalogPage::default()),
            None => Err(UsiError::CatalogStatus {
                status: 404,
                message: format!("listing page not found: {url}"),
            }),
        })
    }

    fn publication_date(&self, project: &str) -> Result<Option<String>, UsiError> {
        let url = self.project_url(project)?;
        Ok(self
            .get_json(url.as_str())?
            .and_then(|raw| extract_publication_date(&raw)))
    }
}

pub fn extract_publication_date(raw: &Value) -> Option<String> {
    raw.get("publicationDate")
        .and_then(Value::as_str)
        .map(str::trim)
        .filter(|value| !value.is_empty())
        .map(str::to_string)
}
