use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use serde::Deserialize;
use tourist_adapters::ExtractorKind;

/// Pools reported closer than this are treated as one venue.
pub const DEFAULT_CLUSTER_DISTANCE_M: f64 = 200.0;

fn default_cluster_distance() -> f64 {
    DEFAULT_CLUSTER_DISTANCE_M
}

#[derive(Debug, Clone, Deserialize)]
pub struct SourceRegistry {
    pub sources: Vec<SourceConfig>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct SourceConfig {
    pub source_id: String,
    pub display_name: String,
    pub enabled: bool,
    pub url: String,
    /// Root of the subtree this source writes into.
    pub place_short_name: String,
    pub extractor: ExtractorKind,
    /// Feed region name to store place display name.
    #[serde(default)]
    pub region_map: BTreeMap<String, String>,
    #[serde(default = "default_cluster_distance")]
    pub cluster_distance_m: f64,
    #[serde(default)]
    pub notes: Option<String>,
}

impl SourceConfig {
    pub fn place_name_for_region<'a>(&'a self, region: &'a str) -> &'a str {
        self.region_map
            .get(region)
            .map(String::as_str)
            .unwrap_or(region)
    }
}

impl SourceRegistry {
    pub fn parse(text: &str) -> Result<Self> {
        serde_yaml::from_str(text).context("parsing source registry")
    }

    pub async fn load(path: &Path) -> Result<Self> {
        let text = tokio::fs::read_to_string(path)
            .await
            .with_context(|| format!("reading {}", path.display()))?;
        serde_yaml::from_str(&text).with_context(|| format!("parsing {}", path.display()))
    }

    pub fn enabled(&self) -> impl Iterator<Item = &SourceConfig> {
        self.sources.iter().filter(|s| s.enabled)
    }

    pub fn get(&self, source_id: &str) -> Option<&SourceConfig> {
        self.sources.iter().find(|s| s.source_id == source_id)
    }
}

#[derive(Debug, Clone)]
pub struct TouristConfig {
    pub store_path: PathBuf,
    pub fetch_log_path: PathBuf,
    pub reports_dir: PathBuf,
    pub workspace_root: PathBuf,
    pub user_agent: String,
    pub http_timeout_secs: u64,
    pub scheduler_enabled: bool,
    pub sync_cron: String,
}

impl TouristConfig {
    pub fn from_env() -> Self {
        let workspace_root = std::env::var("TOURIST_WORKSPACE_ROOT")
            .map(PathBuf::from)
            .unwrap_or_else(|_| PathBuf::from("."));
        Self {
            store_path: std::env::var("TOURIST_STORE_PATH")
                .map(PathBuf::from)
                .unwrap_or_else(|_| workspace_root.join("data").join("store.json")),
            fetch_log_path: std::env::var("TOURIST_FETCH_LOG_PATH")
                .map(PathBuf::from)
                .unwrap_or_else(|_| workspace_root.join("data").join("fetches.jsonl")),
            reports_dir: std::env::var("TOURIST_REPORTS_DIR")
                .map(PathBuf::from)
                .unwrap_or_else(|_| workspace_root.join("reports")),
            user_agent: std::env::var("TOURIST_USER_AGENT")
                .unwrap_or_else(|_| "tourist-bot/0.1".to_string()),
            http_timeout_secs: std::env::var("TOURIST_HTTP_TIMEOUT_SECS")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(20),
            scheduler_enabled: std::env::var("TOURIST_SCHEDULER_ENABLED")
                .map(|v| matches!(v.as_str(), "1" | "true" | "TRUE" | "True"))
                .unwrap_or(false),
            sync_cron: std::env::var("TOURIST_SYNC_CRON")
                .unwrap_or_else(|_| "0 0 6 * * *".to_string()),
            workspace_root,
        }
    }

    /// Everything under one directory, as tests and fixtures use it.
    pub fn rooted_at(root: impl Into<PathBuf>) -> Self {
        let workspace_root = root.into();
        Self {
            store_path: workspace_root.join("data").join("store.json"),
            fetch_log_path: workspace_root.join("data").join("fetches.jsonl"),
            reports_dir: workspace_root.join("reports"),
            user_agent: "tourist-bot/0.1".to_string(),
            http_timeout_secs: 20,
            scheduler_enabled: false,
            sync_cron: "0 0 6 * * *".to_string(),
            workspace_root,
        }
    }

    pub fn registry_path(&self) -> PathBuf {
        self.workspace_root.join("sources.yaml")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn repository_registry_parses() {
        let path = PathBuf::from(env!("CARGO_MANIFEST_DIR")).join("../../sources.yaml");
        let text = std::fs::read_to_string(path).expect("sources.yaml");
        let registry = SourceRegistry::parse(&text).expect("registry");
        let feed = registry.get("gbuwh-feed-clubs").expect("feed source");
        assert_eq!(feed.extractor, ExtractorKind::ClubFeed);
        assert_eq!(feed.place_name_for_region("South West"), "South");
        assert_eq!(feed.place_name_for_region("London"), "London");
        assert_eq!(feed.cluster_distance_m, DEFAULT_CLUSTER_DISTANCE_M);
        assert!(registry.enabled().count() >= 1);
    }

    #[test]
    fn cluster_distance_defaults_when_missing() {
        let registry = SourceRegistry::parse(
            r#"
sources:
  - source_id: sauwhf
    display_name: SAUWHF
    enabled: false
    url: https://sauwhf.co.za/clubs/
    place_short_name: za
    extractor: html-sections
"#,
        )
        .expect("registry");
        assert_eq!(registry.sources[0].cluster_distance_m, 200.0);
        assert!(registry.sources[0].region_map.is_empty());
        assert_eq!(registry.enabled().count(), 0);
    }
}
