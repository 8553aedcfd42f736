use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use metrics::counter;
use reqwest::header::RETRY_AFTER;
use reqwest::{Client, StatusCode};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};
use tokio::sync::Mutex;
use tokio::time::Instant;
use tracing::{debug, error, info, warn};

use super::catalog::{AttemptFailure, CatalogError, CatalogSource, MediaPage};
use crate::config::CatalogConfig;
use crate::constants::intervals::MAX_RETRY_AFTER_SECS;
use crate::constants::{SCREEN_FORMATS, USER_AGENT};
use crate::domain::{
    CatalogEntry, MediaFormat, MediaStatus, RelationEdge, RelationKind, Title, TitleId,
    start_timestamp,
};

macro_rules! media_fields {
    () => {
        r#"
fragment MediaFields on Media {
    id
    format
    status
    episodes
    updatedAt
    title { romaji english }
    nextAiringEpisode { episode }
    coverImage { extraLarge }
    startDate { year month day }
    relations {
        edges {
            relationType
            node { id format }
        }
    }
}
"#
    };
}

const UPDATES_QUERY: &str = concat!(
    r#"
query ($page: Int, $perPage: Int, $formats: [MediaFormat]) {
    Page(page: $page, perPage: $perPage) {
        pageInfo { perPage hasNextPage }
        media(sort: UPDATED_AT_DESC, type: ANIME, format_in: $formats) { ...MediaFields }
    }
}
"#,
    media_fields!()
);

const BY_IDS_QUERY: &str = concat!(
    r#"
query ($ids: [Int], $perPage: Int) {
    Page(page: 1, perPage: $perPage) {
        media(id_in: $ids, type: ANIME) { ...MediaFields }
    }
}
"#,
    media_fields!()
);

const BY_ID_QUERY: &str = concat!(
    r#"
query ($id: Int) {
    Media(id: $id) { ...MediaFields }
}
"#,
    media_fields!()
);

const USER_QUERY: &str = r#"
query ($name: String) {
    User(name: $name) { id }
}
"#;

const WATCHED_QUERY: &str = r#"
query ($userName: String) {
    MediaListCollection(userName: $userName, type: ANIME) {
        lists {
            entries {
                media { id }
            }
        }
    }
}
"#;

#[derive(Serialize)]
struct GraphQLRequest<'a> {
    query: &'a str,
    variables: &'a Value,
}

#[derive(Deserialize)]
struct UpdatesData {
    #[serde(rename = "Page")]
    page: UpdatesPage,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct UpdatesPage {
    page_info: PageInfo,
    media: Vec<Value>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct PageInfo {
    per_page: u32,
    has_next_page: bool,
}

#[derive(Deserialize)]
struct ByIdsData {
    #[serde(rename = "Page")]
    page: ByIdsPage,
}

#[derive(Deserialize)]
struct ByIdsPage {
    media: Vec<Value>,
}

#[derive(Deserialize)]
struct ByIdData {
    #[serde(rename = "Media")]
    media: Option<Value>,
}

#[derive(Deserialize)]
struct UserData {
    #[serde(rename = "User")]
    user: Option<UserNode>,
}

#[derive(Deserialize)]
struct UserNode {
    id: i64,
}

#[derive(Deserialize)]
struct WatchedData {
    #[serde(rename = "MediaListCollection")]
    collection: Option<ListCollection>,
}

#[derive(Deserialize)]
struct ListCollection {
    lists: Vec<MediaList>,
}

#[derive(Deserialize)]
struct MediaList {
    #[serde(default)]
    entries: Vec<ListEntry>,
}

#[derive(Deserialize)]
struct ListEntry {
    media: Option<ListMedia>,
}

#[derive(Deserialize)]
struct ListMedia {
    id: i32,
}

/// Strict wire shape of one title. Optional fields are the ones the catalog
/// is allowed to null out; anything else missing rejects the record.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct Media {
    id: i32,
    format: Option<MediaFormat>,
    status: Option<MediaStatus>,
    episodes: Option<i32>,
    updated_at: Option<i64>,
    title: MediaTitle,
    next_airing_episode: Option<NextAiringEpisode>,
    cover_image: Option<CoverImage>,
    start_date: FuzzyDate,
    relations: Option<Relations>,
}

#[derive(Debug, Deserialize)]
struct MediaTitle {
    romaji: Option<String>,
    english: Option<String>,
}

#[derive(Debug, Deserialize)]
struct NextAiringEpisode {
    episode: i32,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct CoverImage {
    extra_large: Option<String>,
}

#[derive(Debug, Deserialize)]
struct FuzzyDate {
    year: Option<i32>,
    month: Option<u32>,
    day: Option<u32>,
}

#[derive(Debug, Deserialize)]
struct Relations {
    edges: Vec<RelationEdgeWire>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RelationEdgeWire {
    relation_type: Option<RelationKind>,
    node: Option<RelationNode>,
}

#[derive(Debug, Deserialize)]
struct RelationNode {
    id: i32,
    format: Option<MediaFormat>,
}

impl Media {
    /// Validates the record and maps it to the domain model.
    pub(crate) fn into_entry(self) -> Result<CatalogEntry, String> {
        let status = self
            .status
            .ok_or_else(|| format!("title {} has no status", self.id))?;
        let updated_at = self
            .updated_at
            .ok_or_else(|| format!("title {} has no updatedAt", self.id))?;

        let name = self
            .title
            .english
            .filter(|t| !t.trim().is_empty())
            .or(self.title.romaji.filter(|t| !t.trim().is_empty()))
            .ok_or_else(|| format!("title {} has no usable name", self.id))?;

        let latest_aired_episode = match &self.next_airing_episode {
            Some(next) => next.episode.checked_sub(1).filter(|e| *e > 0),
            None if status == MediaStatus::Finished => self.episodes,
            None => None,
        };

        let id = TitleId::new(self.id);
        let relations = self
            .relations
            .map(|r| r.edges)
            .unwrap_or_default()
            .into_iter()
            .filter_map(|edge| {
                let node = edge.node?;
                Some(RelationEdge {
                    source: id,
                    target: TitleId::new(node.id),
                    kind: edge.relation_type.unwrap_or(RelationKind::Other),
                    target_format: node.format.unwrap_or(MediaFormat::Unknown),
                    discovered_at: updated_at,
                })
            })
            .collect();

        Ok(CatalogEntry {
            title: Title {
                id,
                name,
                format: self.format.unwrap_or(MediaFormat::Unknown),
                status,
                episodes: self.episodes,
                latest_aired_episode,
                cover_url: self.cover_image.and_then(|c| c.extra_large),
                start_at: start_timestamp(
                    status,
                    self.start_date.year,
                    self.start_date.month,
                    self.start_date.day,
                ),
                updated_at,
            },
            relations,
        })
    }
}

/// Parses raw media values one by one so that a single broken record does not
/// discard the rest of the page.
fn parse_media_list(values: Vec<Value>) -> (Vec<CatalogEntry>, usize) {
    let mut entries = Vec::with_capacity(values.len());
    let mut rejected = 0;

    for value in values {
        match serde_json::from_value::<Media>(value)
            .map_err(|e| e.to_string())
            .and_then(Media::into_entry)
        {
            Ok(entry) => entries.push(entry),
            Err(reason) => {
                warn!(reason = %reason, "Dropping invalid catalog record");
                rejected += 1;
            }
        }
    }

    (entries, rejected)
}

/// `Retry-After` in whole seconds, capped, plus one second of slack.
pub(crate) fn parse_retry_after(header: Option<&str>) -> Option<Duration> {
    header
        .and_then(|v| v.trim().parse::<u64>().ok())
        .map(|secs| Duration::from_secs(secs.min(MAX_RETRY_AFTER_SECS).saturating_add(1)))
}

/// Splits a GraphQL body into its `data` member, treating embedded errors
/// and missing keys as failures.
pub(crate) fn decode_payload<T: DeserializeOwned>(body: &str) -> Result<T, AttemptFailure> {
    let mut envelope: Value =
        serde_json::from_str(body).map_err(|e| AttemptFailure::Malformed(e.to_string()))?;

    if let Some(errors) = envelope.get("errors").and_then(Value::as_array)
        && !errors.is_empty()
    {
        for e in errors {
            error!(error = %e, "Catalog returned an error");
        }
        let summary = errors
            .iter()
            .map(|e| {
                e.get("message")
                    .and_then(Value::as_str)
                    .unwrap_or("unknown error")
                    .to_string()
            })
            .collect::<Vec<_>>()
            .join("; ");
        return Err(AttemptFailure::Api(summary));
    }

    let data = envelope
        .get_mut("data")
        .map(Value::take)
        .filter(|d| !d.is_null())
        .ok_or_else(|| AttemptFailure::Malformed("response has no data".to_string()))?;

    serde_json::from_value(data).map_err(|e| AttemptFailure::Malformed(e.to_string()))
}

#[derive(Clone)]
pub struct AnilistClient {
    client: Client,
    config: CatalogConfig,
    /// Instant of the last outbound request, shared by every clone.
    gate: Arc<Mutex<Option<Instant>>>,
}

impl AnilistClient {
    pub fn new(config: CatalogConfig) -> Result<Self> {
        let client = Client::builder()
            .timeout(Duration::from_secs(config.request_timeout_seconds))
            .user_agent(USER_AGENT)
            .build()
            .map_err(|e| anyhow::anyhow!("Failed to build catalog HTTP client: {e}"))?;

        Ok(Self::with_shared_client(client, config))
    }

    #[must_use]
    pub fn with_shared_client(client: Client, config: CatalogConfig) -> Self {
        Self {
            client,
            config,
            gate: Arc::new(Mutex::new(None)),
        }
    }

    /// Blocks until the minimum spacing since the previous request has elapsed.
    async fn throttle(&self) {
        let spacing = self.config.min_request_spacing();
        let mut last = self.gate.lock().await;
        if let Some(previous) = *last {
            let elapsed = previous.elapsed();
            if elapsed < spacing {
                tokio::time::sleep(spacing - elapsed).await;
            }
        }
        *last = Some(Instant::now());
    }

    /// Sends one GraphQL request with throttling and the retry policy applied.
    pub async fn fetch<T: DeserializeOwned>(
        &self,
        request: &str,
        query: &str,
        variables: Value,
    ) -> Result<T, CatalogError> {
        let max_attempts = self.config.max_attempts.max(1);
        info!(request, "Sending catalog request");

        let mut last_failure = AttemptFailure::Transport("no attempt made".to_string());
        for attempt in 1..=max_attempts {
            self.throttle().await;
            counter!("anipush_catalog_requests_total").increment(1);

            match self.attempt(query, &variables).await {
                Ok(data) => {
                    debug!(request, attempt, "Catalog request succeeded");
                    return Ok(data);
                }
                Err(failure) => {
                    counter!("anipush_catalog_failures_total").increment(1);
                    warn!(request, attempt, error = %failure, "Catalog request attempt failed");

                    if attempt < max_attempts {
                        let wait = failure.backoff(&self.config);
                        info!(
                            request,
                            wait_secs = wait.as_secs_f64(),
                            "Retrying catalog request"
                        );
                        tokio::time::sleep(wait).await;
                    }
                    last_failure = failure;
                }
            }
        }

        error!(request, error = %last_failure, "Catalog request exhausted its attempts");
        Err(CatalogError::Exhausted {
            request: request.to_string(),
            attempts: max_attempts,
            last: last_failure,
        })
    }

    async fn attempt<T: DeserializeOwned>(
        &self,
        query: &str,
        variables: &Value,
    ) -> Result<T, AttemptFailure> {
        let response = self
            .client
            .post(&self.config.api_url)
            .json(&GraphQLRequest { query, variables })
            .send()
            .await
            .map_err(|e| AttemptFailure::Transport(e.to_string()))?;

        let status = response.status();
        if status == StatusCode::FORBIDDEN {
            return Err(AttemptFailure::Unavailable);
        }
        if status == StatusCode::TOO_MANY_REQUESTS {
            let retry_after = parse_retry_after(
                response
                    .headers()
                    .get(RETRY_AFTER)
                    .and_then(|v| v.to_str().ok()),
            );
            return Err(AttemptFailure::RateLimited { retry_after });
        }

        let body = response
            .text()
            .await
            .map_err(|e| AttemptFailure::Transport(e.to_string()))?;

        if !status.is_success() {
            // GraphQL errors often arrive with a 4xx; surface their message when present.
            return match decode_payload::<Value>(&body) {
                Err(AttemptFailure::Api(message)) => Err(AttemptFailure::Api(message)),
                _ => Err(AttemptFailure::Status(status.as_u16())),
            };
        }

        decode_payload(&body)
    }
}

#[async_trait::async_trait]
impl CatalogSource for AnilistClient {
    async fn updated_page(&self, page: u32, per_page: u32) -> Result<MediaPage, CatalogError> {
        let data: UpdatesData = self
            .fetch(
                &format!("updated_page #{page}"),
                UPDATES_QUERY,
                json!({ "page": page, "perPage": per_page, "formats": SCREEN_FORMATS }),
            )
            .await?;

        let (entries, rejected) = parse_media_list(data.page.media);
        Ok(MediaPage {
            entries,
            rejected,
            per_page: data.page.page_info.per_page,
            has_next_page: data.page.page_info.has_next_page,
        })
    }

    async fn media_by_ids(&self, ids: &[TitleId]) -> Result<Vec<CatalogEntry>, CatalogError> {
        if ids.is_empty() {
            return Ok(Vec::new());
        }
        if ids.len() > self.config.batch_size {
            return Err(CatalogError::BatchTooLarge {
                size: ids.len(),
                max: self.config.batch_size,
            });
        }

        let raw: Vec<i32> = ids.iter().map(|id| id.value()).collect();
        let data: ByIdsData = self
            .fetch(
                &format!("media_by_ids ({} ids)", raw.len()),
                BY_IDS_QUERY,
                json!({ "ids": raw, "perPage": self.config.batch_size }),
            )
            .await?;

        let (entries, rejected) = parse_media_list(data.page.media);
        if entries.len() + rejected != ids.len() {
            debug!(
                requested = ids.len(),
                returned = entries.len() + rejected,
                "Catalog did not return every requested title"
            );
        }
        Ok(entries)
    }

    async fn media_with_relations(
        &self,
        id: TitleId,
    ) -> Result<Option<CatalogEntry>, CatalogError> {
        let data: ByIdData = self
            .fetch(
                &format!("media_with_relations {id}"),
                BY_ID_QUERY,
                json!({ "id": id.value() }),
            )
            .await?;

        let Some(value) = data.media else {
            return Ok(None);
        };

        let (mut entries, _) = parse_media_list(vec![value]);
        Ok(entries.pop())
    }

    async fn user_id(&self, username: &str) -> Result<Option<i64>, CatalogError> {
        let data: UserData = self
            .fetch("user_id", USER_QUERY, json!({ "name": username }))
            .await?;
        Ok(data.user.map(|u| u.id))
    }

    async fn watched_titles(&self, username: &str) -> Result<Vec<TitleId>, CatalogError> {
        let data: WatchedData = self
            .fetch(
                "watched_titles",
                WATCHED_QUERY,
                json!({ "userName": username }),
            )
            .await?;

        let mut ids: Vec<TitleId> = data
            .collection
            .map(|c| c.lists)
            .unwrap_or_default()
            .into_iter()
            .flat_map(|l| l.entries)
            .filter_map(|e| e.media.map(|m| TitleId::new(m.id)))
            .collect();
        ids.sort_unstable();
        ids.dedup();
        Ok(ids)
    }

    fn batch_size(&self) -> usize {
        self.config.batch_size
    }
}
