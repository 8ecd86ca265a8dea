//! Log of fetched source responses, used to tell whether a source changed.

use std::path::Path;

use anyhow::Context;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::fs;

use crate::files::{sha256_hex, write_atomic};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UrlFetch {
    pub source_short_name: String,
    pub url: String,
    pub created_timestamp: DateTime<Utc>,
    /// Last time the same response was fetched again.
    pub unmodified_timestamp: Option<DateTime<Utc>>,
    pub response_sha256: String,
    pub response: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FetchChange {
    /// First fetch of this url.
    New,
    Changed,
    Unchanged,
}

#[derive(Debug, Clone, Default)]
pub struct FetchLog {
    fetches: Vec<UrlFetch>,
}

impl FetchLog {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn fetches(&self) -> &[UrlFetch] {
        &self.fetches
    }

    /// Most recent fetch of `url`.
    pub fn latest(&self, url: &str) -> Option<&UrlFetch> {
        self.fetches
            .iter()
            .filter(|f| f.url == url)
            .max_by_key(|f| f.created_timestamp)
    }

    /// Records a response. An identical response to the latest fetch only
    /// bumps its `unmodified_timestamp`.
    pub fn add(
        &mut self,
        source_short_name: &str,
        url: &str,
        response: String,
        now: DateTime<Utc>,
    ) -> FetchChange {
        let hash = sha256_hex(response.as_bytes());
        let latest = self
            .fetches
            .iter_mut()
            .filter(|f| f.url == url)
            .max_by_key(|f| f.created_timestamp);
        let change = match latest {
            Some(prev) if prev.response_sha256 == hash && prev.response == response => {
                prev.unmodified_timestamp = Some(now);
                return FetchChange::Unchanged;
            }
            Some(_) => FetchChange::Changed,
            None => FetchChange::New,
        };
        self.fetches.push(UrlFetch {
            source_short_name: source_short_name.to_string(),
            url: url.to_string(),
            created_timestamp: now,
            unmodified_timestamp: None,
            response_sha256: hash,
            response,
        });
        change
    }

    /// Reads a JSON-lines log; a missing file is an empty log.
    pub async fn load(path: &Path) -> anyhow::Result<Self> {
        if !fs::try_exists(path)
            .await
            .with_context(|| format!("checking fetch log {}", path.display()))?
        {
            return Ok(Self::default());
        }
        let text = fs::read_to_string(path)
            .await
            .with_context(|| format!("reading fetch log {}", path.display()))?;
        let fetches = text
            .lines()
            .enumerate()
            .filter(|(_, line)| !line.trim().is_empty())
            .map(|(idx, line)| {
                serde_json::from_str(line).with_context(|| {
                    format!("parsing fetch log {} line {}", path.display(), idx + 1)
                })
            })
            .collect::<anyhow::Result<Vec<UrlFetch>>>()?;
        Ok(Self { fetches })
    }

    pub async fn save(&self, path: &Path) -> anyhow::Result<()> {
        let mut out = String::new();
        for fetch in &self.fetches {
            out.push_str(&serde_json::to_string(fetch).context("serializing url fetch")?);
            out.push('\n');
        }
        write_atomic(path, out.as_bytes())
            .await
            .with_context(|| format!("saving fetch log {}", path.display()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    fn ts(secs: i64) -> DateTime<Utc> {
        DateTime::from_timestamp(secs, 0).expect("valid timestamp")
    }

    #[test]
    fn repeated_response_only_bumps_unmodified_timestamp() {
        let mut log = FetchLog::new();
        let url = "https://example.org/feed.json";
        assert_eq!(log.add("feed", url, "a".into(), ts(0)), FetchChange::New);
        assert_eq!(log.add("feed", url, "a".into(), ts(60)), FetchChange::Unchanged);
        assert_eq!(log.fetches().len(), 1);
        assert_eq!(log.latest(url).and_then(|f| f.unmodified_timestamp), Some(ts(60)));

        assert_eq!(log.add("feed", url, "b".into(), ts(120)), FetchChange::Changed);
        assert_eq!(log.fetches().len(), 2);
        assert_eq!(log.latest(url).map(|f| f.response.as_str()), Some("b"));
    }

    #[tokio::test]
    async fn log_survives_save_and_load() {
        let dir = tempdir().expect("tempdir");
        let path = dir.path().join("fetches.jsonl");
        let mut log = FetchLog::new();
        log.add("feed", "https://example.org/a", "{}".into(), ts(0));
        log.add("feed", "https://example.org/b", "[]".into(), ts(1));
        log.save(&path).await.expect("save");

        let loaded = FetchLog::load(&path).await.expect("load");
        assert_eq!(loaded.fetches(), log.fetches());
    }
}
