//! Domain types for the franchise catalog with strong typing.
//!
//! Catalog ids, statuses, formats and relation kinds are modelled as closed
//! types so that the resolver and the persistence layer never compare raw
//! strings coming from the wire.

pub mod events;

use chrono::{NaiveDate, TimeZone, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::fmt;
use std::str::FromStr;

/// Unique identifier of a title in the external catalog.
///
/// # Examples
///
/// ```rust
/// use anipush::domain::TitleId;
///
/// let id = TitleId::new(42);
/// assert_eq!(id.value(), 42);
/// assert_eq!(id.to_string(), "42");
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
pub struct TitleId(i32);

impl TitleId {
    #[must_use]
    pub const fn new(id: i32) -> Self {
        debug_assert!(id >= 0, "TitleId should be non-negative");
        Self(id)
    }

    #[must_use]
    pub const fn value(&self) -> i32 {
        self.0
    }
}

impl fmt::Display for TitleId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<TitleId> for i32 {
    fn from(id: TitleId) -> Self {
        id.0
    }
}

impl From<i32> for TitleId {
    fn from(id: i32) -> Self {
        Self::new(id)
    }
}

impl Serialize for TitleId {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: serde::Serializer,
    {
        serializer.serialize_i32(self.0)
    }
}

impl<'de> Deserialize<'de> for TitleId {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: serde::Deserializer<'de>,
    {
        let id = i32::deserialize(deserializer)?;
        Ok(Self::new(id))
    }
}

/// Error returned when a stored or received enum value is not recognised.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("unknown {kind} value: {value}")]
pub struct UnknownValue {
    pub kind: &'static str,
    pub value: String,
}

/// Release status of a title. Closed set.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum MediaStatus {
    NotYetReleased,
    Releasing,
    Finished,
    Cancelled,
    Hiatus,
}

impl MediaStatus {
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::NotYetReleased => "NOT_YET_RELEASED",
            Self::Releasing => "RELEASING",
            Self::Finished => "FINISHED",
            Self::Cancelled => "CANCELLED",
            Self::Hiatus => "HIATUS",
        }
    }

    /// Human readable label used in notifications.
    #[must_use]
    pub const fn label(&self) -> &'static str {
        match self {
            Self::NotYetReleased => "Not yet released",
            Self::Releasing => "Releasing",
            Self::Finished => "Finished",
            Self::Cancelled => "Cancelled",
            Self::Hiatus => "Hiatus (on hold)",
        }
    }
}

impl fmt::Display for MediaStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for MediaStatus {
    type Err = UnknownValue;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "NOT_YET_RELEASED" => Ok(Self::NotYetReleased),
            "RELEASING" => Ok(Self::Releasing),
            "FINISHED" => Ok(Self::Finished),
            "CANCELLED" => Ok(Self::Cancelled),
            "HIATUS" => Ok(Self::Hiatus),
            other => Err(UnknownValue {
                kind: "status",
                value: other.to_string(),
            }),
        }
    }
}

/// Publication format of a title.
///
/// Literary formats only ever show up as relation targets; they are never
/// members of a franchise.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum MediaFormat {
    Tv,
    TvShort,
    Movie,
    Special,
    Ova,
    Ona,
    Music,
    Manga,
    Novel,
    OneShot,
    #[serde(other)]
    Unknown,
}

impl MediaFormat {
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Tv => "TV",
            Self::TvShort => "TV_SHORT",
            Self::Movie => "MOVIE",
            Self::Special => "SPECIAL",
            Self::Ova => "OVA",
            Self::Ona => "ONA",
            Self::Music => "MUSIC",
            Self::Manga => "MANGA",
            Self::Novel => "NOVEL",
            Self::OneShot => "ONE_SHOT",
            Self::Unknown => "UNKNOWN",
        }
    }

    #[must_use]
    pub const fn is_literary(&self) -> bool {
        matches!(self, Self::Manga | Self::Novel | Self::OneShot)
    }

    #[must_use]
    pub const fn label(&self) -> &'static str {
        match self {
            Self::Tv => "TV Series",
            Self::TvShort => "TV Short",
            Self::Movie => "Movie",
            Self::Special => "Special Episode",
            Self::Ova => "OVA - Original Video Animation",
            Self::Ona => "ONA - Original Net Animation",
            Self::Music => "Music Video",
            Self::Manga => "Manga",
            Self::Novel => "Novel",
            Self::OneShot => "One-shot",
            Self::Unknown => "Unknown",
        }
    }
}

impl fmt::Display for MediaFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for MediaFormat {
    type Err = std::convert::Infallible;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(match s {
            "TV" => Self::Tv,
            "TV_SHORT" => Self::TvShort,
            "MOVIE" => Self::Movie,
            "SPECIAL" => Self::Special,
            "OVA" => Self::Ova,
            "ONA" => Self::Ona,
            "MUSIC" => Self::Music,
            "MANGA" => Self::Manga,
            "NOVEL" => Self::Novel,
            "ONE_SHOT" => Self::OneShot,
            _ => Self::Unknown,
        })
    }
}

/// Kind of a relation edge as reported by the catalog.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum RelationKind {
    Parent,
    Prequel,
    Sequel,
    SideStory,
    SpinOff,
    Alternative,
    Summary,
    Compilation,
    Contains,
    Adaptation,
    Source,
    Character,
    #[serde(other)]
    Other,
}

impl RelationKind {
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Parent => "PARENT",
            Self::Prequel => "PREQUEL",
            Self::Sequel => "SEQUEL",
            Self::SideStory => "SIDE_STORY",
            Self::SpinOff => "SPIN_OFF",
            Self::Alternative => "ALTERNATIVE",
            Self::Summary => "SUMMARY",
            Self::Compilation => "COMPILATION",
            Self::Contains => "CONTAINS",
            Self::Adaptation => "ADAPTATION",
            Self::Source => "SOURCE",
            Self::Character => "CHARACTER",
            Self::Other => "OTHER",
        }
    }
}

impl fmt::Display for RelationKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for RelationKind {
    type Err = std::convert::Infallible;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(match s {
            "PARENT" => Self::Parent,
            "PREQUEL" => Self::Prequel,
            "SEQUEL" => Self::Sequel,
            "SIDE_STORY" => Self::SideStory,
            "SPIN_OFF" => Self::SpinOff,
            "ALTERNATIVE" => Self::Alternative,
            "SUMMARY" => Self::Summary,
            "COMPILATION" => Self::Compilation,
            "CONTAINS" => Self::Contains,
            "ADAPTATION" => Self::Adaptation,
            "SOURCE" => Self::Source,
            "CHARACTER" => Self::Character,
            _ => Self::Other,
        })
    }
}

/// Start timestamp used when a title has no complete start date.
///
/// Corresponds to 3099-01-01T00:00:00Z, so unknown dates sort after every
/// real one when picking a canonical id.
pub const FAR_FUTURE_START: i64 = 35_627_817_600;

/// Converts optional start-date components into a start timestamp.
#[must_use]
pub fn start_timestamp(
    status: MediaStatus,
    year: Option<i32>,
    month: Option<u32>,
    day: Option<u32>,
) -> i64 {
    if status == MediaStatus::NotYetReleased {
        return FAR_FUTURE_START;
    }

    let (Some(year), Some(month), Some(day)) = (year, month, day) else {
        return FAR_FUTURE_START;
    };

    NaiveDate::from_ymd_opt(year, month, day)
        .and_then(|d| d.and_hms_opt(0, 0, 0))
        .map_or(FAR_FUTURE_START, |dt| Utc.from_utc_datetime(&dt).timestamp())
}

/// One catalog entry as tracked locally.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Title {
    pub id: TitleId,
    pub name: String,
    pub format: MediaFormat,
    pub status: MediaStatus,
    pub episodes: Option<i32>,
    pub latest_aired_episode: Option<i32>,
    pub cover_url: Option<String>,
    pub start_at: i64,
    /// Last-modified timestamp reported by the catalog (unix seconds).
    pub updated_at: i64,
}

impl Title {
    #[must_use]
    pub const fn has_known_start(&self) -> bool {
        self.start_at != FAR_FUTURE_START
    }
}

/// A directed relation as reported by the catalog for `source`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize)]
pub struct RelationEdge {
    pub source: TitleId,
    pub target: TitleId,
    pub kind: RelationKind,
    pub target_format: MediaFormat,
    /// Source-side timestamp at which this edge was observed.
    pub discovered_at: i64,
}

impl RelationEdge {
    /// Character links and links into literary works never connect franchises.
    #[must_use]
    pub const fn is_traversable(&self) -> bool {
        !matches!(self.kind, RelationKind::Character) && !self.target_format.is_literary()
    }

    #[must_use]
    pub fn is_parent(&self) -> bool {
        self.kind == RelationKind::Parent
    }
}

/// A title together with the relation edges it reports.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CatalogEntry {
    pub title: Title,
    pub relations: Vec<RelationEdge>,
}

/// A resolved franchise: every member plus the canonical representative.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Group {
    pub canonical_id: TitleId,
    pub members: BTreeSet<TitleId>,
}

impl Group {
    #[must_use]
    pub fn contains(&self, id: TitleId) -> bool {
        self.members.contains(&id)
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.members.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.members.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn title_id_conversions() {
        let id = TitleId::new(42);
        assert_eq!(id.value(), 42);
        assert_eq!(id.to_string(), "42");
        assert_eq!(i32::from(id), 42);
        assert_eq!(TitleId::from(42), id);
    }

    #[test]
    fn title_id_serialization() {
        let id = TitleId::new(42);
        let json = serde_json::to_string(&id).unwrap();
        assert_eq!(json, "42");
        let deserialized: TitleId = serde_json::from_str(&json).unwrap();
        assert_eq!(deserialized, id);
    }

    #[test]
    fn status_round_trips_through_storage_string() {
        for status in [
            MediaStatus::NotYetReleased,
            MediaStatus::Releasing,
            MediaStatus::Finished,
            MediaStatus::Cancelled,
            MediaStatus::Hiatus,
        ] {
            assert_eq!(status.as_str().parse::<MediaStatus>().unwrap(), status);
        }
        assert!("AIRING".parse::<MediaStatus>().is_err());
    }

    #[test]
    fn unknown_format_is_not_literary() {
        let format: MediaFormat = serde_json::from_str("\"SOMETHING_NEW\"").unwrap();
        assert_eq!(format, MediaFormat::Unknown);
        assert!(!format.is_literary());
        assert!(MediaFormat::Novel.is_literary());
        assert!(MediaFormat::OneShot.is_literary());
    }

    #[test]
    fn start_timestamp_uses_sentinel_for_partial_dates() {
        assert_eq!(
            start_timestamp(MediaStatus::Finished, Some(2020), None, Some(3)),
            FAR_FUTURE_START
        );
        assert_eq!(
            start_timestamp(MediaStatus::NotYetReleased, Some(2020), Some(1), Some(1)),
            FAR_FUTURE_START
        );
        assert_eq!(
            start_timestamp(MediaStatus::Finished, Some(2020), Some(1), Some(1)),
            1_577_836_800
        );
    }

    #[test]
    fn far_future_sentinel_is_3099() {
        let dt = NaiveDate::from_ymd_opt(3099, 1, 1)
            .unwrap()
            .and_hms_opt(0, 0, 0)
            .unwrap();
        assert_eq!(Utc.from_utc_datetime(&dt).timestamp(), FAR_FUTURE_START);
    }

    #[test]
    fn character_and_literary_edges_are_not_traversable() {
        let edge = |kind, target_format| RelationEdge {
            source: TitleId::new(1),
            target: TitleId::new(2),
            kind,
            target_format,
            discovered_at: 0,
        };
        assert!(edge(RelationKind::Sequel, MediaFormat::Tv).is_traversable());
        assert!(!edge(RelationKind::Character, MediaFormat::Tv).is_traversable());
        assert!(!edge(RelationKind::Source, MediaFormat::Manga).is_traversable());
        assert!(edge(RelationKind::Parent, MediaFormat::Movie).is_parent());
    }
}
