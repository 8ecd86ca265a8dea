//! Typed place/club/pool records and their field-level access.

use std::fmt;
use std::sync::OnceLock;

use chrono::NaiveDate;
use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::geo::{GeoPoint, Geometry, Polygon};
use crate::ModelError;

pub type EntityId = i64;

/// Short name of the single record without a parent.
pub const ROOT_SHORT_NAME: &str = "world";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EntityKind {
    Place,
    Club,
    Pool,
}

impl EntityKind {
    pub const ALL: [EntityKind; 3] = [EntityKind::Place, EntityKind::Club, EntityKind::Pool];

    pub fn as_str(self) -> &'static str {
        match self {
            EntityKind::Place => "place",
            EntityKind::Club => "club",
            EntityKind::Pool => "pool",
        }
    }
}

impl fmt::Display for EntityKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Every diffable field across the three kinds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Field {
    Id,
    Name,
    ShortName,
    Markdown,
    Parent,
    StatusComment,
    StatusDate,
    Region,
    GeonamesId,
    Entrance,
    SourceShortName,
    SourceKey,
    LogoUrl,
}

const COMMON_FIELDS: [Field; 7] = [
    Field::Id,
    Field::Name,
    Field::ShortName,
    Field::Markdown,
    Field::Parent,
    Field::StatusComment,
    Field::StatusDate,
];

impl Field {
    pub fn as_str(self) -> &'static str {
        match self {
            Field::Id => "id",
            Field::Name => "name",
            Field::ShortName => "short_name",
            Field::Markdown => "markdown",
            Field::Parent => "parent",
            Field::StatusComment => "status_comment",
            Field::StatusDate => "status_date",
            Field::Region => "region",
            Field::GeonamesId => "geonames_id",
            Field::Entrance => "entrance",
            Field::SourceShortName => "source_short_name",
            Field::SourceKey => "source_key",
            Field::LogoUrl => "logo_url",
        }
    }

    /// Fields carried by records of `kind`, common fields first.
    pub fn for_kind(kind: EntityKind) -> Vec<Field> {
        let specific: &[Field] = match kind {
            EntityKind::Place => &[Field::Region, Field::GeonamesId],
            EntityKind::Club => &[Field::SourceShortName, Field::SourceKey, Field::LogoUrl],
            EntityKind::Pool => &[Field::Entrance],
        };
        COMMON_FIELDS.iter().chain(specific).copied().collect()
    }
}

impl fmt::Display for Field {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Parent pointer. Either side may be missing until resolved against a store.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct ParentRef {
    pub id: Option<EntityId>,
    pub short_name: Option<String>,
}

impl ParentRef {
    pub fn root() -> Self {
        Self::default()
    }

    pub fn by_id(id: EntityId) -> Self {
        Self {
            id: Some(id),
            short_name: None,
        }
    }

    pub fn by_short_name(short_name: impl Into<String>) -> Self {
        Self {
            id: None,
            short_name: Some(short_name.into()),
        }
    }

    pub fn is_root(&self) -> bool {
        self.id.is_none() && self.short_name.is_none()
    }

    /// Compares ids when both sides know them, else short names.
    pub fn same_target(&self, other: &ParentRef) -> bool {
        match (self.id, other.id) {
            (Some(a), Some(b)) => a == b,
            _ => match (&self.short_name, &other.short_name) {
                (Some(a), Some(b)) => a == b,
                _ => self.is_root() && other.is_root(),
            },
        }
    }
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct PlaceDetail {
    pub region: Option<Polygon>,
    pub geonames_id: Option<i64>,
}

#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct ClubDetail {
    pub source_short_name: Option<String>,
    pub source_key: Option<String>,
    pub logo_url: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct PoolDetail {
    pub entrance: Option<GeoPoint>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "lowercase")]
pub enum EntityDetail {
    Place(PlaceDetail),
    Club(ClubDetail),
    Pool(PoolDetail),
}

impl EntityDetail {
    pub fn kind(&self) -> EntityKind {
        match self {
            EntityDetail::Place(_) => EntityKind::Place,
            EntityDetail::Club(_) => EntityKind::Club,
            EntityDetail::Pool(_) => EntityKind::Pool,
        }
    }

    pub fn empty(kind: EntityKind) -> Self {
        match kind {
            EntityKind::Place => EntityDetail::Place(PlaceDetail::default()),
            EntityKind::Club => EntityDetail::Club(ClubDetail::default()),
            EntityKind::Pool => EntityDetail::Pool(PoolDetail::default()),
        }
    }
}

/// A single place, club or pool.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EntityRecord {
    pub id: Option<EntityId>,
    pub name: String,
    pub short_name: String,
    #[serde(default)]
    pub markdown: String,
    #[serde(default)]
    pub parent: ParentRef,
    #[serde(default)]
    pub status_comment: Option<String>,
    #[serde(default)]
    pub status_date: Option<NaiveDate>,
    pub detail: EntityDetail,
}

/// A single field value, compared with geometric tolerance where relevant.
#[derive(Debug, Clone, Serialize)]
#[serde(untagged)]
pub enum FieldValue {
    Null,
    Int(i64),
    Text(String),
    Date(NaiveDate),
    Parent(ParentRef),
    Geometry(Geometry),
}

impl PartialEq for FieldValue {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (FieldValue::Null, FieldValue::Null) => true,
            (FieldValue::Int(a), FieldValue::Int(b)) => a == b,
            (FieldValue::Text(a), FieldValue::Text(b)) => a == b,
            (FieldValue::Date(a), FieldValue::Date(b)) => a == b,
            (FieldValue::Parent(a), FieldValue::Parent(b)) => a.same_target(b),
            (FieldValue::Geometry(a), FieldValue::Geometry(b)) => a.same_shape(b),
            _ => false,
        }
    }
}

fn text_value(value: &Option<String>) -> FieldValue {
    match value.as_deref() {
        None | Some("") => FieldValue::Null,
        Some(s) => FieldValue::Text(s.to_string()),
    }
}

fn opt_text(field: Field, value: FieldValue) -> Result<Option<String>, ModelError> {
    match value {
        FieldValue::Null => Ok(None),
        FieldValue::Text(s) if s.is_empty() => Ok(None),
        FieldValue::Text(s) => Ok(Some(s)),
        _ => Err(ModelError::FieldType { field }),
    }
}

fn required_text(field: Field, value: FieldValue) -> Result<String, ModelError> {
    match value {
        FieldValue::Null => Ok(String::new()),
        FieldValue::Text(s) => Ok(s),
        _ => Err(ModelError::FieldType { field }),
    }
}

impl EntityRecord {
    pub fn new(kind: EntityKind, name: impl Into<String>, short_name: impl Into<String>) -> Self {
        Self {
            id: None,
            name: name.into(),
            short_name: short_name.into(),
            markdown: String::new(),
            parent: ParentRef::root(),
            status_comment: None,
            status_date: None,
            detail: EntityDetail::empty(kind),
        }
    }

    pub fn place(name: impl Into<String>, short_name: impl Into<String>) -> Self {
        Self::new(EntityKind::Place, name, short_name)
    }

    pub fn club(name: impl Into<String>, short_name: impl Into<String>) -> Self {
        Self::new(EntityKind::Club, name, short_name)
    }

    pub fn pool(name: impl Into<String>, short_name: impl Into<String>) -> Self {
        Self::new(EntityKind::Pool, name, short_name)
    }

    pub fn with_id(mut self, id: EntityId) -> Self {
        self.id = Some(id);
        self
    }

    pub fn with_parent(mut self, parent: ParentRef) -> Self {
        self.parent = parent;
        self
    }

    pub fn with_markdown(mut self, markdown: impl Into<String>) -> Self {
        self.markdown = markdown.into();
        self
    }

    pub fn with_entrance(mut self, point: GeoPoint) -> Self {
        if let EntityDetail::Pool(detail) = &mut self.detail {
            detail.entrance = Some(point);
        }
        self
    }

    pub fn with_region(mut self, region: Polygon) -> Self {
        if let EntityDetail::Place(detail) = &mut self.detail {
            detail.region = Some(region);
        }
        self
    }

    pub fn kind(&self) -> EntityKind {
        self.detail.kind()
    }

    pub fn is_root(&self) -> bool {
        self.kind() == EntityKind::Place && self.short_name == ROOT_SHORT_NAME
    }

    pub fn entrance(&self) -> Option<GeoPoint> {
        match &self.detail {
            EntityDetail::Pool(detail) => detail.entrance,
            _ => None,
        }
    }

    pub fn region(&self) -> Option<&Polygon> {
        match &self.detail {
            EntityDetail::Place(detail) => detail.region.as_ref(),
            _ => None,
        }
    }

    pub fn club_detail(&self) -> Option<&ClubDetail> {
        match &self.detail {
            EntityDetail::Club(detail) => Some(detail),
            _ => None,
        }
    }

    /// `None` when `field` does not exist on this kind.
    pub fn field_value(&self, field: Field) -> Option<FieldValue> {
        let value = match (field, &self.detail) {
            (Field::Id, _) => self.id.map_or(FieldValue::Null, FieldValue::Int),
            (Field::Name, _) => FieldValue::Text(self.name.clone()),
            (Field::ShortName, _) => FieldValue::Text(self.short_name.clone()),
            (Field::Markdown, _) => FieldValue::Text(self.markdown.clone()),
            (Field::Parent, _) => FieldValue::Parent(self.parent.clone()),
            (Field::StatusComment, _) => text_value(&self.status_comment),
            (Field::StatusDate, _) => self.status_date.map_or(FieldValue::Null, FieldValue::Date),
            (Field::Region, EntityDetail::Place(d)) => d
                .region
                .clone()
                .map_or(FieldValue::Null, |r| FieldValue::Geometry(Geometry::Polygon(r))),
            (Field::GeonamesId, EntityDetail::Place(d)) => {
                d.geonames_id.map_or(FieldValue::Null, FieldValue::Int)
            }
            (Field::SourceShortName, EntityDetail::Club(d)) => text_value(&d.source_short_name),
            (Field::SourceKey, EntityDetail::Club(d)) => text_value(&d.source_key),
            (Field::LogoUrl, EntityDetail::Club(d)) => text_value(&d.logo_url),
            (Field::Entrance, EntityDetail::Pool(d)) => d
                .entrance
                .map_or(FieldValue::Null, |p| FieldValue::Geometry(Geometry::Point(p))),
            _ => return None,
        };
        Some(value)
    }

    pub fn set_field(&mut self, field: Field, value: FieldValue) -> Result<(), ModelError> {
        let kind = self.kind();
        match (field, &mut self.detail) {
            (Field::Id, _) => {
                self.id = match value {
                    FieldValue::Null => None,
                    FieldValue::Int(id) => Some(id),
                    _ => return Err(ModelError::FieldType { field }),
                }
            }
            (Field::Name, _) => self.name = required_text(field, value)?,
            (Field::ShortName, _) => self.short_name = required_text(field, value)?,
            (Field::Markdown, _) => self.markdown = required_text(field, value)?,
            (Field::Parent, _) => {
                self.parent = match value {
                    FieldValue::Null => ParentRef::root(),
                    FieldValue::Parent(parent) => parent,
                    _ => return Err(ModelError::FieldType { field }),
                }
            }
            (Field::StatusComment, _) => self.status_comment = opt_text(field, value)?,
            (Field::StatusDate, _) => {
                self.status_date = match value {
                    FieldValue::Null => None,
                    FieldValue::Date(date) => Some(date),
                    _ => return Err(ModelError::FieldType { field }),
                }
            }
            (Field::Region, EntityDetail::Place(d)) => {
                d.region = match value {
                    FieldValue::Null => None,
                    FieldValue::Geometry(Geometry::Polygon(poly)) => Some(poly),
                    _ => return Err(ModelError::FieldType { field }),
                }
            }
            (Field::GeonamesId, EntityDetail::Place(d)) => {
                d.geonames_id = match value {
                    FieldValue::Null => None,
                    FieldValue::Int(id) => Some(id),
                    _ => return Err(ModelError::FieldType { field }),
                }
            }
            (Field::SourceShortName, EntityDetail::Club(d)) => {
                d.source_short_name = opt_text(field, value)?
            }
            (Field::SourceKey, EntityDetail::Club(d)) => d.source_key = opt_text(field, value)?,
            (Field::LogoUrl, EntityDetail::Club(d)) => d.logo_url = opt_text(field, value)?,
            (Field::Entrance, EntityDetail::Pool(d)) => {
                d.entrance = match value {
                    FieldValue::Null => None,
                    FieldValue::Geometry(Geometry::Point(p)) => Some(p),
                    _ => return Err(ModelError::FieldType { field }),
                }
            }
            _ => return Err(ModelError::FieldNotApplicable { field, kind }),
        }
        Ok(())
    }

    /// Checks the rules a record must satisfy before it may be stored.
    pub fn validate(&self) -> Result<(), ModelError> {
        if !short_name_pattern().is_match(&self.short_name) {
            return Err(ModelError::InvalidShortName(self.short_name.clone()));
        }
        if self.is_root() {
            if !self.parent.is_root() {
                return Err(ModelError::RootWithParent);
            }
        } else if self.parent.is_root() {
            return Err(ModelError::MissingParent(self.short_name.clone()));
        }
        if self.kind() != EntityKind::Club && !wiki_links(&self.markdown).is_empty() {
            return Err(ModelError::WikiLinkInMarkdown(self.short_name.clone()));
        }
        if let Some(point) = self.entrance() {
            if !point.is_valid() {
                return Err(ModelError::InvalidGeometry(format!(
                    "entrance of {} is out of range",
                    self.short_name
                )));
            }
        }
        Ok(())
    }
}

fn short_name_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| Regex::new(r"^[a-zA-Z][a-zA-Z0-9_-]+$").expect("short name pattern"))
}

fn wiki_link_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN
        .get_or_init(|| Regex::new(r"\[\[([a-zA-Z][a-zA-Z0-9_-]+)\]\]").expect("wiki link pattern"))
}

/// `[[short_name]]` targets referenced from markdown, in order of appearance.
pub fn wiki_links(markdown: &str) -> Vec<String> {
    wiki_link_pattern()
        .captures_iter(markdown)
        .map(|c| c[1].to_string())
        .collect()
}
