//! Source adapter contracts and the adapters for the club feed and the
//! federation place pages.

pub mod feed;
pub mod html;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tourist_storage::{FetchError, TextFetcher};

pub use feed::{
    build_club, club_short_name, format_time, load_feed_file, parse_feed, BuiltClub, ClubFeed,
    FeedClub, FeedSession, FeedSource, Weekday, ADMIN_ONLY_MARKER,
};
pub use html::{extract_panels, extract_sections, PlaceText};

pub const CRATE_NAME: &str = "tourist-adapters";

#[derive(Debug, Error)]
pub enum AdapterError {
    #[error("{0}")]
    Message(String),
    #[error("malformed feed: {0}")]
    Feed(#[source] serde_json::Error),
    #[error("session '{title}' has unknown type '{session_type}'")]
    UnknownSessionType { session_type: String, title: String },
    #[error("club {club}: no pool short name for session location '{location}'")]
    UnmappedSession { club: String, location: String },
    #[error(transparent)]
    Fetch(#[from] FetchError),
    #[error(transparent)]
    Anyhow(#[from] anyhow::Error),
}

/// How a registered source's response is interpreted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ExtractorKind {
    /// JSON club feed with sessions at pools.
    ClubFeed,
    /// Accordion panels per region.
    HtmlPanels,
    /// Heading sections per province.
    HtmlSections,
}

#[derive(Debug, Clone, PartialEq)]
pub enum Extracted {
    Feed(ClubFeed),
    PlaceTexts(Vec<PlaceText>),
}

#[async_trait]
pub trait SourceAdapter: Send + Sync {
    fn kind(&self) -> ExtractorKind;

    async fn fetch(
        &self,
        fetcher: &dyn TextFetcher,
        source_id: &str,
        url: &str,
    ) -> Result<String, AdapterError> {
        Ok(fetcher.fetch_text(source_id, url).await?)
    }

    /// Parses a fetched response. Synchronous because parsed HTML is not `Send`.
    fn extract(&self, response: &str) -> Result<Extracted, AdapterError>;
}

#[derive(Debug, Clone, Copy, Default)]
pub struct ClubFeedAdapter;

#[async_trait]
impl SourceAdapter for ClubFeedAdapter {
    fn kind(&self) -> ExtractorKind {
        ExtractorKind::ClubFeed
    }

    fn extract(&self, response: &str) -> Result<Extracted, AdapterError> {
        parse_feed(response).map(Extracted::Feed)
    }
}

#[derive(Debug, Clone, Copy, Default)]
pub struct HtmlPanelsAdapter;

#[async_trait]
impl SourceAdapter for HtmlPanelsAdapter {
    fn kind(&self) -> ExtractorKind {
        ExtractorKind::HtmlPanels
    }

    fn extract(&self, response: &str) -> Result<Extracted, AdapterError> {
        extract_panels(response).map(Extracted::PlaceTexts)
    }
}

#[derive(Debug, Clone, Copy, Default)]
pub struct HtmlSectionsAdapter;

#[async_trait]
impl SourceAdapter for HtmlSectionsAdapter {
    fn kind(&self) -> ExtractorKind {
        ExtractorKind::HtmlSections
    }

    fn extract(&self, response: &str) -> Result<Extracted, AdapterError> {
        extract_sections(response).map(Extracted::PlaceTexts)
    }
}

pub fn adapter_for(kind: ExtractorKind) -> Box<dyn SourceAdapter> {
    match kind {
        ExtractorKind::ClubFeed => Box::new(ClubFeedAdapter),
        ExtractorKind::HtmlPanels => Box::new(HtmlPanelsAdapter),
        ExtractorKind::HtmlSections => Box::new(HtmlSectionsAdapter),
    }
}
