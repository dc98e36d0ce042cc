use std::fmt;
use std::str::FromStr;
use std::sync::LazyLock;

use chrono::{Datelike, NaiveDate};
use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::error::UsiError;

static RAW_EXTENSION: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)(\.(raw|mzml))+$").expect("valid extension pattern"));

pub fn strip_raw_extension(name: &str) -> &str {
    match RAW_EXTENSION.find(name) {
        Some(found) => &name[..found.start()],
        None => name,
    }
}

/// A parsed Universal Spectrum Identifier, e.g.
/// `mzspec:PXD000966:CPTAC_CompRef.mzML:scan:12298[:PEPTIDE/2]`.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Usi {
    raw: String,
    project_accession: String,
    collection_name: String,
    scan_number: String,
    interpretation: Option<String>,
}

impl Usi {
    pub fn as_str(&self) -> &str {
        &self.raw
    }

    pub fn project_accession(&self) -> &str {
        &self.project_accession
    }

    pub fn collection_name(&self) -> &str {
        &self.collection_name
    }

    pub fn scan_number(&self) -> &str {
        &self.scan_number
    }

    pub fn interpretation(&self) -> Option<&str> {
        self.interpretation.as_deref()
    }

    pub fn canonical(&self) -> CanonicalUsi {
        CanonicalUsi::new(
            &self.project_accession,
            &self.collection_name,
            &self.scan_number,
        )
    }
}

impl fmt::Display for Usi {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.raw)
    }
}

impl FromStr for Usi {
    type Err = UsiError;

    // Only the presence of "scan" somewhere in the string is checked; segment 3
    // is not required to equal "scan".
    fn from_str(value: &str) -> Result<Self, Self::Err> {
        if !value.contains("scan") {
            return Err(UsiError::InvalidUsi(value.to_string()));
        }
        let segments = value.split(':').collect::<Vec<_>>();
        if segments.len() <= 4 {
            return Err(UsiError::MalformedUsi(value.to_string()));
        }
        let interpretation = (segments.len() > 5).then(|| segments[5..].join(":"));
        Ok(Self {
            raw: value.to_string(),
            project_accession: segments[1].to_string(),
            collection_name: segments[2].to_string(),
            scan_number: segments[4].to_string(),
            interpretation,
        })
    }
}

/// Extension-normalized USI, the only key used against the cache store.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct CanonicalUsi(String);

impl CanonicalUsi {
    pub fn new(project: &str, collection: &str, scan: &str) -> Self {
        Self(format!(
            "mzspec:{project}:{}:scan:{scan}",
            strip_raw_extension(collection)
        ))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for CanonicalUsi {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ResolvedFile {
    pub project_accession: String,
    pub publication_date: String,
    pub file_name: String,
    pub scan_number: String,
}

impl ResolvedFile {
    pub fn storage_key(&self) -> Result<String, UsiError> {
        let date = self
            .publication_date
            .get(..10)
            .and_then(|prefix| NaiveDate::parse_from_str(prefix, "%Y-%m-%d").ok())
            .ok_or_else(|| UsiError::InvalidPublicationDate {
                project: self.project_accession.clone(),
                value: self.publication_date.clone(),
            })?;
        Ok(format!(
            "{:04}/{:02}/{}/{}",
            date.year(),
            date.month(),
            self.project_accession,
            self.file_name
        ))
    }
}

#[cfg(test)]
mod tests {
    use assert_matches::assert_matches;

    use super::*;

    const EXAMPLE: &str =
        "mzspec:PXD000966:CPTAC_CompRef_00_iTRAQ_05_2Feb12_Cougar_11-10-09.mzML:scan:12298";

    #[test]
    fn parse_usi_fields() {
        let usi: Usi = EXAMPLE.parse().unwrap();
        assert_eq!(usi.project_accession(), "PXD000966");
        assert_eq!(
            usi.collection_name(),
            "CPTAC_CompRef_00_iTRAQ_05_2Feb12_Cougar_11-10-09.mzML"
        );
        assert_eq!(usi.scan_number(), "12298");
        assert_eq!(usi.interpretation(), None);
        assert_eq!(usi.to_string(), EXAMPLE);
    }

    #[test]
    fn parse_usi_with_interpretation() {
        let usi: Usi = "mzspec:PXD000561:Adult_Frontalcortex:scan:17555:VLHPLEGAVVIIFK/2"
            .parse()
            .unwrap();
        assert_eq!(usi.scan_number(), "17555");
        assert_eq!(usi.interpretation(), Some("VLHPLEGAVVIIFK/2"));
    }

    #[test]
    fn reject_missing_scan_token() {
        let err = "mzspec:PXD000966:file:index:12".parse::<Usi>().unwrap_err();
        assert_matches!(err, UsiError::InvalidUsi(_));
    }

    #[test]
    fn reject_short_usi() {
        let err = "mzspec:PXD000966:scan:12".parse::<Usi>().unwrap_err();
        assert_matches!(err, UsiError::MalformedUsi(_));
    }

    #[test]
    fn segment_three_is_not_checked() {
        let usi: Usi = "mzspec:PXD1:scanfile:index:7".parse().unwrap();
        assert_eq!(usi.scan_number(), "7");
    }

    #[test]
    fn strip_extensions() {
        assert_eq!(strip_raw_extension("sample.raw"), "sample");
        assert_eq!(strip_raw_extension("sample.RAW"), "sample");
        assert_eq!(strip_raw_extension("sample.mzML"), "sample");
        assert_eq!(strip_raw_extension("sample.mzml.raw"), "sample");
        assert_eq!(strip_raw_extension("sample.mgf"), "sample.mgf");
        assert_eq!(strip_raw_extension("sample"), "sample");
    }

    #[test]
    fn canonical_is_extension_insensitive() {
        let keys = ["c.raw", "c.RAW", "c.mzML", "c"]
            .iter()
            .map(|name| {
                format!("mzspec:PXD1:{name}:scan:5")
                    .parse::<Usi>()
                    .unwrap()
                    .canonical()
            })
            .collect::<Vec<_>>();
        assert!(keys.iter().all(|key| key.as_str() == "mzspec:PXD1:c:scan:5"));
    }

    #[test]
    fn canonical_is_idempotent() {
        let first = EXAMPLE.parse::<Usi>().unwrap().canonical();
        let second = first.as_str().parse::<Usi>().unwrap().canonical();
        assert_eq!(first, second);
        assert_eq!(
            first.as_str(),
            "mzspec:PXD000966:CPTAC_CompRef_00_iTRAQ_05_2Feb12_Cougar_11-10-09:scan:12298"
        );
    }

    #[test]
    fn storage_key_uses_publication_month() {
        let file = ResolvedFile {
            project_accession: "PXD000966".to_string(),
            publication_date: "2013-04-01".to_string(),
            file_name: "a.raw".to_string(),
            scan_number: "1".to_string(),
        };
        assert_eq!(file.storage_key().unwrap(), "2013/04/PXD000966/a.raw");
    }

    #[test]
    fn storage_key_rejects_bad_date() {
        let file = ResolvedFile {
            project_accession: "PXD1".to_string(),
            publication_date: "April 2013".to_string(),
            file_name: "a.raw".to_string(),
            scan_number: "1".to_string(),
        };
        assert_matches!(
            file.storage_key(),
            Err(UsiError::InvalidPublicationDate { .. })
        );
    }
}
