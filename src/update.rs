//! Version check against the realtime database's `app_updates/latest` key.
//!
//! The document is read once over the database's REST interface
//! (`<base>/app_updates/latest.json`). Missing or mistyped fields fall back
//! to defaults instead of failing the check; a missing document means the
//! build is up to date.

use crate::error::StudyError;
use serde::Serialize;
use serde_json::Value;
use std::time::Duration;
use tracing::{debug, info};

/// Published release, with defaults applied.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct VersionInfo {
    pub latest_version_code: i64,
    pub latest_version_name: String,
    pub is_mandatory: bool,
    pub download_url: String,
    pub release_notes: Vec<String>,
    pub release_date: String,
    pub size: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum UpdateStatus {
    UpToDate,
    Available(VersionInfo),
}

impl UpdateStatus {
    pub fn is_available(&self) -> bool {
        matches!(self, UpdateStatus::Available(_))
    }
}

#[derive(Debug, Clone)]
pub struct UpdateChecker {
    endpoint: String,
    current_code: i64,
    current_name: String,
    timeout: Duration,
}

impl UpdateChecker {
    /// `endpoint` is the database base URL, e.g.
    /// `https://my-app-default-rtdb.firebaseio.com`.
    pub fn new(endpoint: impl Into<String>, current_code: i64, current_name: impl Into<String>) -> Self {
        Self {
            endpoint: endpoint.into(),
            current_code,
            current_name: current_name.into(),
            timeout: Duration::from_secs(15),
        }
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn latest_url(&self) -> String {
        format!("{}/app_updates/latest.json", self.endpoint.trim_end_matches('/'))
    }

    /// Read the published release and compare it with this build.
    ///
    /// Transport and HTTP failures map to [`StudyError::ExternalService`].
    pub async fn check(&self) -> Result<UpdateStatus, StudyError> {
        let url = self.latest_url();
        debug!("Checking for updates: {url}");
        let fail = |msg: String| StudyError::external("Update check", msg);

        let client = reqwest::Client::builder()
            .timeout(self.timeout)
            .build()
            .map_err(|e| fail(e.to_string()))?;
        let response = client.get(&url).send().await.map_err(|e| fail(e.to_string()))?;
        if !response.status().is_success() {
            return Err(fail(format!("HTTP {}", response.status())));
        }
        let doc: Value = response.json().await.map_err(|e| fail(e.to_string()))?;

        let status = evaluate(&doc, self.current_code, &self.current_name);
        if let UpdateStatus::Available(ref v) = status {
            info!(
                "Update available: {} ({}){}",
                v.latest_version_name,
                v.latest_version_code,
                if v.is_mandatory { ", mandatory" } else { "" }
            );
        }
        Ok(status)
    }
}

/// Decide whether `doc` describes a newer release than `current_code`.
///
/// `null` (or a non-object) means no release is published.
pub fn evaluate(doc: &Value, current_code: i64, current_name: &str) -> UpdateStatus {
    let Some(obj) = doc.as_object() else {
        return UpdateStatus::UpToDate;
    };
    let text = |key: &str, default: &str| {
        obj.get(key)
            .and_then(Value::as_str)
            .unwrap_or(default)
            .to_string()
    };

    let latest_code = obj
        .get("version_code")
        .and_then(Value::as_i64)
        .unwrap_or(current_code);
    if latest_code <= current_code {
        return UpdateStatus::UpToDate;
    }

    UpdateStatus::Available(VersionInfo {
        latest_version_code: latest_code,
        latest_version_name: text("version_name", current_name),
        is_mandatory: obj
            .get("is_mandatory")
            .and_then(Value::as_bool)
            .unwrap_or(false),
        download_url: text("download_url", ""),
        release_notes: release_notes(obj.get("release_notes")),
        release_date: text("release_date", ""),
        size: text("size", "Unknown"),
    })
}

/// Notes may be stored as a list or as a keyed object; keep string children
/// in order.
fn release_notes(value: Option<&Value>) -> Vec<String> {
    let items: Vec<&Value> = match value {
        Some(Value::Array(items)) => items.iter().collect(),
        Some(Value::Object(map)) => map.values().collect(),
        _ => return Vec::new(),
    };
    items
        .into_iter()
        .filter_map(Value::as_str)
        .map(str::to_string)
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn null_document_is_up_to_date() {
        assert_eq!(evaluate(&Value::Null, 3, "1.2"), UpdateStatus::UpToDate);
    }

    #[test]
    fn missing_version_code_counts_as_current() {
        let doc = json!({ "version_name": "9.9" });
        assert_eq!(evaluate(&doc, 3, "1.2"), UpdateStatus::UpToDate);
    }

    #[test]
    fn same_or_older_code_is_up_to_date() {
        assert!(!evaluate(&json!({ "version_code": 3 }), 3, "").is_available());
        assert!(!evaluate(&json!({ "version_code": 2 }), 3, "").is_available());
    }

    #[test]
    fn newer_code_is_available_with_defaults() {
        let doc = json!({
            "version_code": 4,
            "is_mandatory": true,
            "release_notes": ["Faster PDFs", 7, "Hindi fixes"],
        });
        let UpdateStatus::Available(v) = evaluate(&doc, 3, "1.2") else {
            panic!("expected an update");
        };
        assert_eq!(v.latest_version_code, 4);
        assert_eq!(v.latest_version_name, "1.2");
        assert!(v.is_mandatory);
        assert_eq!(v.release_notes, ["Faster PDFs", "Hindi fixes"]);
        assert_eq!(v.size, "Unknown");
        assert_eq!(v.download_url, "");
    }

    #[test]
    fn keyed_release_notes_are_accepted() {
        let doc = json!({ "version_code": 5, "release_notes": { "0": "a", "1": "b" } });
        let UpdateStatus::Available(v) = evaluate(&doc, 1, "") else {
            panic!("expected an update");
        };
        assert_eq!(v.release_notes, ["a", "b"]);
    }

    #[test]
    fn url_joins_cleanly() {
        let c = UpdateChecker::new("https://db.example.org/", 1, "1.0");
        assert_eq!(c.latest_url(), "https://db.example.org/app_updates/latest.json");
    }
}
