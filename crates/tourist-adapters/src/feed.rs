//! Strict-schema club feed and the club/pool records built from it.

use std::collections::HashMap;
use std::fmt;
use std::fs;
use std::path::Path;

use anyhow::Context;
use serde::{Deserialize, Serialize};

use tourist_core::{ClubDetail, EntityDetail, EntityId, EntityRecord, GeoPoint, ParentRef, PoolKey};

use crate::AdapterError;

/// Clubs whose name contains this are placeholders and never imported.
pub const ADMIN_ONLY_MARKER: &str = "Internal Admin only";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ClubFeed {
    pub source: FeedSource,
    pub clubs: Vec<FeedClub>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct FeedSource {
    pub name: String,
    pub icon: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct FeedClub {
    pub unique_id: String,
    pub name: String,
    pub region: String,
    pub sessions: Vec<FeedSession>,
    #[serde(default)]
    pub logo: Option<String>,
    #[serde(default)]
    pub facebook: Option<String>,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub website: Option<String>,
    #[serde(default)]
    pub twitter: Option<String>,
    #[serde(default)]
    pub member_count: Option<i64>,
    #[serde(default)]
    pub instagram: Option<String>,
}

impl FeedClub {
    pub fn is_admin_only(&self) -> bool {
        self.name.contains(ADMIN_ONLY_MARKER)
    }

    /// Links in the order they appear in club markdown.
    fn links(&self) -> [(&'static str, Option<&str>); 4] {
        [
            ("website", self.website.as_deref()),
            ("facebook", self.facebook.as_deref()),
            ("twitter", self.twitter.as_deref()),
            ("instagram", self.instagram.as_deref()),
        ]
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Weekday {
    Monday,
    Tuesday,
    Wednesday,
    Thursday,
    Friday,
    Saturday,
    Sunday,
}

impl Weekday {
    pub fn as_str(self) -> &'static str {
        match self {
            Weekday::Monday => "monday",
            Weekday::Tuesday => "tuesday",
            Weekday::Wednesday => "wednesday",
            Weekday::Thursday => "thursday",
            Weekday::Friday => "friday",
            Weekday::Saturday => "saturday",
            Weekday::Sunday => "sunday",
        }
    }

    pub fn plural(self) -> &'static str {
        match self {
            Weekday::Monday => "Mondays",
            Weekday::Tuesday => "Tuesdays",
            Weekday::Wednesday => "Wednesdays",
            Weekday::Thursday => "Thursdays",
            Weekday::Friday => "Fridays",
            Weekday::Saturday => "Saturdays",
            Weekday::Sunday => "Sundays",
        }
    }
}

impl fmt::Display for Weekday {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct FeedSession {
    pub day: Weekday,
    pub latitude: f64,
    pub longitude: f64,
    pub location_name: String,
    #[serde(rename = "type")]
    pub session_type: String,
    pub title: String,
    pub start_time: String,
    pub end_time: String,
}

impl FeedSession {
    /// The exact location this session reports.
    pub fn pool_key(&self) -> PoolKey {
        PoolKey {
            point: GeoPoint::new(self.latitude, self.longitude),
            name: self.location_name.clone(),
        }
    }

    /// `"Training"` on a monday for juniors becomes `"Training on Mondays for juniors"`.
    pub fn display_title(&self) -> Result<String, AdapterError> {
        let lower_title = self.title.to_lowercase();
        let mut title = self.title.clone();
        if !lower_title.contains(self.day.as_str()) {
            title.push_str(" on ");
            title.push_str(self.day.plural());
        }
        if self.session_type != "adult" && !lower_title.contains(&self.session_type) {
            let audience = match self.session_type.as_str() {
                "junior" => "juniors",
                "student" => "students",
                other => {
                    return Err(AdapterError::UnknownSessionType {
                        session_type: other.to_string(),
                        title: self.title.clone(),
                    })
                }
            };
            title.push_str(" for ");
            title.push_str(audience);
        }
        Ok(title)
    }
}

/// Drops a trailing `:00`, so `19:30:00` reads `19:30`.
pub fn format_time(feed_time: &str) -> &str {
    feed_time.strip_suffix(":00").unwrap_or(feed_time)
}

/// First five word characters of each of the first three words.
pub fn club_short_name(name: &str) -> String {
    name.to_lowercase()
        .split_whitespace()
        .take(3)
        .map(|word| {
            word.chars()
                .filter(|c| c.is_alphanumeric())
                .take(5)
                .collect::<String>()
        })
        .collect()
}

pub fn parse_feed(text: &str) -> Result<ClubFeed, AdapterError> {
    serde_json::from_str(text).map_err(AdapterError::Feed)
}

pub fn load_feed_file(path: impl AsRef<Path>) -> anyhow::Result<ClubFeed> {
    let path = path.as_ref();
    let data = fs::read_to_string(path).with_context(|| format!("reading {}", path.display()))?;
    parse_feed(&data).with_context(|| format!("parsing {}", path.display()))
}

fn is_https(link: &str) -> bool {
    link.get(..8)
        .is_some_and(|scheme| scheme.eq_ignore_ascii_case("https://"))
}

/// A club record plus the links left out of its markdown.
#[derive(Debug, Clone, PartialEq)]
pub struct BuiltClub {
    pub record: EntityRecord,
    pub omitted_links: Vec<String>,
}

/// Builds the store form of a feed club owned by `place_id`.
///
/// `pool_short_names` maps every session location to the short name of the
/// stored pool it was reconciled with.
pub fn build_club(
    club: &FeedClub,
    source_id: &str,
    feed_source_name: &str,
    place_id: EntityId,
    pool_short_names: &HashMap<PoolKey, String>,
) -> Result<BuiltClub, AdapterError> {
    let mut lines: Vec<String> = Vec::new();
    let mut omitted_links = Vec::new();
    if let Some(description) = club.description.as_deref().filter(|d| !d.is_empty()) {
        lines.push(description.to_string());
        lines.push(String::new());
    }
    for (label, link) in club.links() {
        let Some(link) = link.filter(|l| !l.is_empty()) else {
            continue;
        };
        if !is_https(link) {
            omitted_links.push(format!(
                "{label} expected https but {} contains '{link}'",
                club.name
            ));
            continue;
        }
        lines.push(format!("* <{link}>"));
    }
    if !club.sessions.is_empty() {
        lines.push("\nSessions: \n".to_string());
    }
    for session in &club.sessions {
        let key = session.pool_key();
        let pool_short_name =
            pool_short_names
                .get(&key)
                .ok_or_else(|| AdapterError::UnmappedSession {
                    club: club.name.clone(),
                    location: session.location_name.clone(),
                })?;
        lines.push(format!(
            "* {} from {} to {} at [[{pool_short_name}]]",
            session.display_title()?,
            format_time(&session.start_time),
            format_time(&session.end_time),
        ));
    }

    let mut record = EntityRecord::club(club.name.clone(), club_short_name(&club.name))
        .with_parent(ParentRef::by_id(place_id))
        .with_markdown(lines.join("\n"));
    record.status_comment = Some(format!("Imported from {feed_source_name}"));
    record.detail = EntityDetail::Club(ClubDetail {
        source_short_name: Some(source_id.to_string()),
        source_key: Some(club.unique_id.clone()),
        logo_url: club.logo.clone().filter(|l| !l.is_empty()),
    });
    Ok(BuiltClub {
        record,
        omitted_links,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn session(day: Weekday, session_type: &str, title: &str) -> FeedSession {
        FeedSession {
            day,
            latitude: 51.5,
            longitude: -0.1,
            location_name: "Central Pool".to_string(),
            session_type: session_type.to_string(),
            title: title.to_string(),
            start_time: "19:30:00".to_string(),
            end_time: "21:00:00".to_string(),
        }
    }

    #[test]
    fn titles_gain_day_and_audience_when_missing() {
        let s = session(Weekday::Monday, "junior", "Training");
        assert_eq!(
            s.display_title().expect("title"),
            "Training on Mondays for juniors"
        );
        let s = session(Weekday::Tuesday, "adult", "Tuesday club night");
        assert_eq!(s.display_title().expect("title"), "Tuesday club night");
        let s = session(Weekday::Friday, "student", "Student session");
        assert_eq!(s.display_title().expect("title"), "Student session on Fridays");
        let s = session(Weekday::Friday, "masters", "Session");
        assert!(matches!(
            s.display_title(),
            Err(AdapterError::UnknownSessionType { .. })
        ));
    }

    #[test]
    fn times_drop_trailing_seconds() {
        assert_eq!(format_time("19:30:00"), "19:30");
        assert_eq!(format_time("19:30"), "19:30");
    }

    #[test]
    fn club_short_name_uses_three_words() {
        assert_eq!(club_short_name("Bristol Underwater Hockey Club"), "bristunderhocke");
        assert_eq!(club_short_name("St. Albans UWH"), "stalbanuwh");
    }

    #[test]
    fn unknown_feed_keys_are_rejected() {
        let err = parse_feed(r#"{"source": {"name": "n", "icon": "i"}, "clubs": [], "extra": 1}"#)
            .expect_err("extra key");
        assert!(err.to_string().contains("extra"));
    }

    #[test]
    fn unknown_day_is_rejected() {
        let text = r#"{"source": {"name": "n", "icon": "i"}, "clubs": [{"unique_id": "1",
            "name": "C", "region": "R", "sessions": [{"day": "funday", "latitude": 1.0,
            "longitude": 2.0, "location_name": "P", "type": "adult", "title": "T",
            "start_time": "19:00:00", "end_time": "20:00:00"}]}]}"#;
        assert!(parse_feed(text).is_err());
    }

    #[test]
    fn club_markdown_lists_links_and_sessions() {
        let s = session(Weekday::Monday, "adult", "Club night");
        let club = FeedClub {
            unique_id: "42".to_string(),
            name: "Central Hockey".to_string(),
            region: "London".to_string(),
            sessions: vec![s.clone()],
            logo: Some(String::new()),
            facebook: Some("http://facebook.com/central".to_string()),
            description: Some("Friendly club.".to_string()),
            website: Some("https://central.example".to_string()),
            twitter: None,
            member_count: Some(30),
            instagram: None,
        };
        let pools = HashMap::from([(s.pool_key(), "feedcenpoo".to_string())]);
        let built = build_club(&club, "feed", "Feed Source", 7, &pools).expect("club");

        assert_eq!(
            built.record.markdown,
            "Friendly club.\n\n* <https://central.example>\n\nSessions: \n\n\
             * Club night on Mondays from 19:30 to 21:00 at [[feedcenpoo]]"
        );
        assert_eq!(built.omitted_links.len(), 1);
        assert_eq!(built.record.short_name, "centrhocke");
        assert_eq!(built.record.parent, ParentRef::by_id(7));
        assert_eq!(
            built.record.status_comment.as_deref(),
            Some("Imported from Feed Source")
        );
        let detail = built.record.club_detail().expect("club detail");
        assert_eq!(detail.source_key.as_deref(), Some("42"));
        assert_eq!(detail.logo_url, None);
    }

    #[test]
    fn unmapped_session_location_is_an_error() {
        let club = FeedClub {
            unique_id: "1".to_string(),
            name: "Lost".to_string(),
            region: "R".to_string(),
            sessions: vec![session(Weekday::Monday, "adult", "Night")],
            logo: None,
            facebook: None,
            description: None,
            website: None,
            twitter: None,
            member_count: None,
            instagram: None,
        };
        assert!(matches!(
            build_club(&club, "feed", "Feed", 1, &HashMap::new()),
            Err(AdapterError::UnmappedSession { .. })
        ));
    }
}
