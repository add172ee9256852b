//! Forecast history storage.
//!
//! One JSON record per forecast attempt, appended under
//! `notes/forecasts/<post_id>/<timestamp>.json`. Retrodict runs are
//! segregated under `notes/retrodict/<post_id>/<cutoff>_<timestamp>.json`
//! so calibration artefacts never mix with live forecasts.
//!
//! Records are append-only. The only permitted mutations are the explicit
//! patch operations: stamping submission time, stamping comment time, and
//! filling in the resolution once known.

use crate::types::{ForecastOutput, Percentiles, QuestionType, TokenUsage};
use crate::{Error, Result};
use chrono::Local;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};

/// A saved forecast with metadata.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SavedForecast {
    /// Question ID (for the submission API).
    pub question_id: u64,
    /// Post ID (for URLs and storage). Legacy records may omit it.
    #[serde(default)]
    pub post_id: Option<u64>,
    pub question_title: String,
    pub question_type: QuestionType,
    /// Local timestamp in `YYYYMMDD_HHMMSS` form.
    pub timestamp: String,
    #[serde(default)]
    pub probability: Option<f64>,
    #[serde(default)]
    pub logit: Option<f64>,
    #[serde(default)]
    pub probabilities: Option<BTreeMap<String, f64>>,
    #[serde(default)]
    pub median: Option<f64>,
    #[serde(default)]
    pub confidence_interval: Option<(f64, f64)>,
    #[serde(default)]
    pub percentiles: Option<Percentiles>,
    pub summary: String,
    #[serde(default)]
    pub factors: Vec<Value>,
    /// "yes", "no", "ambiguous", or None while unresolved.
    #[serde(default)]
    pub resolution: Option<String>,
    /// ISO timestamp of submission to the platform.
    #[serde(default)]
    pub submitted_at: Option<String>,
    /// ISO timestamp of the reasoning comment.
    #[serde(default)]
    pub comment_posted_at: Option<String>,
    #[serde(default)]
    pub tool_metrics: Option<Value>,
    #[serde(default)]
    pub token_usage: Option<TokenUsage>,
    #[serde(default)]
    pub log_path: Option<String>,
    // Cadence: when the question was published vs. when we forecast
    #[serde(default)]
    pub question_published_at: Option<String>,
    #[serde(default)]
    pub question_close_time: Option<String>,
    #[serde(default)]
    pub question_scheduled_resolve_time: Option<String>,
    /// YYYY-MM-DD cutoff when the forecast was retrodicted.
    #[serde(default)]
    pub retrodict_date: Option<String>,
}

impl SavedForecast {
    fn from_output(output: &ForecastOutput, timestamp: String) -> Self {
        Self {
            question_id: output.question_id,
            post_id: Some(output.post_id),
            question_title: output.question_title.clone(),
            question_type: output.question_type,
            timestamp,
            probability: output.probability,
            logit: output.logit,
            probabilities: output.probabilities.clone(),
            median: output.median,
            confidence_interval: output.confidence_interval,
            percentiles: output.percentiles.clone(),
            summary: output.summary.clone(),
            factors: output
                .factors
                .iter()
                .filter_map(|f| serde_json::to_value(f).ok())
                .collect(),
            resolution: None,
            submitted_at: None,
            comment_posted_at: None,
            tool_metrics: output.tool_metrics.clone(),
            token_usage: output.token_usage.clone(),
            log_path: None,
            question_published_at: None,
            question_close_time: None,
            question_scheduled_resolve_time: None,
            retrodict_date: output.retrodict_date.map(|d| d.format("%Y-%m-%d").to_string()),
        }
    }
}

/// Filesystem store for forecast records.
#[derive(Debug, Clone)]
pub struct ForecastStore {
    notes_path: PathBuf,
}

impl ForecastStore {
    pub fn new(notes_path: impl Into<PathBuf>) -> Self {
        Self {
            notes_path: notes_path.into(),
        }
    }

    fn forecasts_dir(&self, post_id: u64) -> PathBuf {
        self.notes_path.join("forecasts").join(post_id.to_string())
    }

    fn retrodict_dir(&self, post_id: u64) -> PathBuf {
        self.notes_path.join("retrodict").join(post_id.to_string())
    }

    /// Append a forecast record. Retrodict outputs land in the segregated
    /// tree with the cutoff in the filename.
    pub fn save(&self, output: &ForecastOutput) -> Result<PathBuf> {
        let timestamp = Local::now().format("%Y%m%d_%H%M%S").to_string();
        let record = SavedForecast::from_output(output, timestamp.clone());

        let path = match &record.retrodict_date {
            Some(cutoff) => self
                .retrodict_dir(output.post_id)
                .join(format!("{cutoff}_{timestamp}.json")),
            None => self
                .forecasts_dir(output.post_id)
                .join(format!("{timestamp}.json")),
        };

        let dir = path
            .parent()
            .ok_or_else(|| Error::other("forecast path has no parent"))?;
        fs::create_dir_all(dir)
            .map_err(|e| Error::other(format!("Cannot create {}: {e}", dir.display())))?;

        let body = serde_json::to_string_pretty(&record)?;
        fs::write(&path, body)
            .map_err(|e| Error::other(format!("Cannot write {}: {e}", path.display())))?;

        log::info!("Saved forecast to {}", path.display());
        Ok(path)
    }

    /// Load all saved forecasts for a post, oldest first. Unreadable files
    /// are skipped with a warning.
    pub fn load_past(&self, post_id: u64) -> Result<Vec<SavedForecast>> {
        let dir = self.forecasts_dir(post_id);
        if !dir.exists() {
            return Ok(Vec::new());
        }

        let mut forecasts = Vec::new();
        for entry in fs::read_dir(&dir)
            .map_err(|e| Error::other(format!("Cannot read {}: {e}", dir.display())))?
        {
            let entry = entry.map_err(|e| Error::other(e.to_string()))?;
            let path = entry.path();
            if path.extension().and_then(|e| e.to_str()) != Some("json") {
                continue;
            }
            match fs::read_to_string(&path)
                .map_err(Error::from)
                .and_then(|body| serde_json::from_str::<SavedForecast>(&body).map_err(Error::from))
            {
                Ok(forecast) => forecasts.push(forecast),
                Err(e) => log::warn!("Skipping unreadable forecast {}: {e}", path.display()),
            }
        }

        forecasts.sort_by(|a, b| a.timestamp.cmp(&b.timestamp));
        Ok(forecasts)
    }

    /// All record paths for a post, newest last (for backfill passes).
    pub fn record_paths(&self, post_id: u64) -> Result<Vec<PathBuf>> {
        let dir = self.forecasts_dir(post_id);
        if !dir.exists() {
            return Ok(Vec::new());
        }
        let mut paths: Vec<PathBuf> = fs::read_dir(&dir)
            .map_err(|e| Error::other(format!("Cannot read {}: {e}", dir.display())))?
            .filter_map(|entry| entry.ok().map(|e| e.path()))
            .filter(|p| p.extension().and_then(|e| e.to_str()) == Some("json"))
            .collect();
        paths.sort();
        Ok(paths)
    }

    /// All post ids with at least one saved forecast.
    pub fn known_posts(&self) -> Result<Vec<u64>> {
        let dir = self.notes_path.join("forecasts");
        if !dir.exists() {
            return Ok(Vec::new());
        }
        let mut ids: Vec<u64> = fs::read_dir(&dir)
            .map_err(|e| Error::other(format!("Cannot read {}: {e}", dir.display())))?
            .filter_map(|entry| entry.ok())
            .filter_map(|entry| entry.file_name().to_str().and_then(|n| n.parse().ok()))
            .collect();
        ids.sort_unstable();
        Ok(ids)
    }

    fn patch(&self, path: &Path, apply: impl FnOnce(&mut SavedForecast)) -> Result<()> {
        let body = fs::read_to_string(path)?;
        let mut record: SavedForecast = serde_json::from_str(&body)?;
        apply(&mut record);
        fs::write(path, serde_json::to_string_pretty(&record)?)?;
        Ok(())
    }

    /// Stamp the submission timestamp on a record.
    pub fn mark_submitted(&self, path: &Path) -> Result<()> {
        let now = Local::now().to_rfc3339();
        self.patch(path, |record| record.submitted_at = Some(now))
    }

    /// Stamp the comment timestamp on a record.
    pub fn mark_comment_posted(&self, path: &Path) -> Result<()> {
        let now = Local::now().to_rfc3339();
        self.patch(path, |record| record.comment_posted_at = Some(now))
    }

    /// Fill in the resolution on a record.
    pub fn set_resolution(&self, path: &Path, resolution: &str) -> Result<()> {
        let resolution = resolution.to_string();
        self.patch(path, |record| record.resolution = Some(resolution))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::ForecastOutput;
    use tempfile::TempDir;

    fn sample_output(post_id: u64) -> ForecastOutput {
        let mut output = ForecastOutput::new(post_id, post_id, "Test question", QuestionType::Binary);
        output.summary = "Likely".to_string();
        output.probability = Some(0.7);
        output.logit = Some(0.85);
        output
    }

    #[test]
    fn test_save_and_load_roundtrip() {
        let dir = TempDir::new().unwrap();
        let store = ForecastStore::new(dir.path());

        let path = store.save(&sample_output(42)).unwrap();
        assert!(path.exists());
        assert!(path.starts_with(dir.path().join("forecasts").join("42")));

        let loaded = store.load_past(42).unwrap();
        assert_eq!(loaded.len(), 1);
        assert_eq!(loaded[0].probability, Some(0.7));
        assert_eq!(loaded[0].post_id, Some(42));
        assert!(loaded[0].submitted_at.is_none());
    }

    #[test]
    fn test_retrodict_records_are_segregated() {
        let dir = TempDir::new().unwrap();
        let store = ForecastStore::new(dir.path());

        let mut output = sample_output(42);
        output.retrodict_date = chrono::NaiveDate::from_ymd_opt(2026, 1, 15);
        let path = store.save(&output).unwrap();

        assert!(path.starts_with(dir.path().join("retrodict").join("42")));
        assert!(
            path.file_name()
                .unwrap()
                .to_str()
                .unwrap()
                .starts_with("2026-01-15_")
        );
        // Retrodict runs do not pollute live history
        assert!(store.load_past(42).unwrap().is_empty());
    }

    #[test]
    fn test_patch_operations() {
        let dir = TempDir::new().unwrap();
        let store = ForecastStore::new(dir.path());
        let path = store.save(&sample_output(7)).unwrap();

        store.mark_submitted(&path).unwrap();
        store.mark_comment_posted(&path).unwrap();
        store.set_resolution(&path, "yes").unwrap();

        let loaded = store.load_past(7).unwrap();
        assert!(loaded[0].submitted_at.is_some());
        assert!(loaded[0].comment_posted_at.is_some());
        assert_eq!(loaded[0].resolution.as_deref(), Some("yes"));
    }

    #[test]
    fn test_known_posts() {
        let dir = TempDir::new().unwrap();
        let store = ForecastStore::new(dir.path());
        store.save(&sample_output(3)).unwrap();
        store.save(&sample_output(11)).unwrap();
        store.save(&sample_output(3)).unwrap();

        assert_eq!(store.known_posts().unwrap(), vec![3, 11]);
    }

    #[test]
    fn test_load_missing_post() {
        let dir = TempDir::new().unwrap();
        let store = ForecastStore::new(dir.path());
        assert!(store.load_past(999).unwrap().is_empty());
    }
}
