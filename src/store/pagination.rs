use serde::Deserialize;
use thiserror::Error;
use time::{format_description::well_known::Rfc3339, OffsetDateTime};

pub const MAX_LIMIT: i64 = 20;
pub const MAX_TAGS: usize = 5;
pub const MAX_SEARCH_LEN: usize = 100;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SortOrder {
    Asc,
    #[default]
    Desc,
}

impl SortOrder {
    pub fn as_sql(self) -> &'static str {
        match self {
            SortOrder::Asc => "ASC",
            SortOrder::Desc => "DESC",
        }
    }
}

/// Validated paginated feed query, consumed by `PostRepository::feed`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FeedQuery {
    pub limit: i64,
    pub offset: i64,
    pub sort: SortOrder,
    pub tags: Vec<String>,
    pub search: String,
    pub since: Option<OffsetDateTime>,
    pub until: Option<OffsetDateTime>,
}

impl Default for FeedQuery {
    fn default() -> Self {
        Self {
            limit: 10,
            offset: 0,
            sort: SortOrder::Desc,
            tags: Vec::new(),
            search: String::new(),
            since: None,
            until: None,
        }
    }
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum FeedQueryError {
    #[error("limit must be between 1 and 20")]
    Limit,
    #[error("offset must not be negative")]
    Offset,
    #[error("at most 5 tags are allowed")]
    TooManyTags,
    #[error("search must be at most 100 characters")]
    SearchTooLong,
    #[error("invalid timestamp {0:?}, expected RFC 3339")]
    Timestamp(String),
}

/// Raw query-string shape; tags arrive comma separated.
#[derive(Debug, Default, Deserialize)]
pub struct FeedParams {
    pub limit: Option<i64>,
    pub offset: Option<i64>,
    pub sort: Option<SortOrder>,
    pub tags: Option<String>,
    pub search: Option<String>,
    pub since: Option<String>,
    pub until: Option<String>,
}

impl TryFrom<FeedParams> for FeedQuery {
    type Error = FeedQueryError;

    fn try_from(p: FeedParams) -> Result<Self, Self::Error> {
        let defaults = FeedQuery::default();
        let query = FeedQuery {
            limit: p.limit.unwrap_or(defaults.limit),
            offset: p.offset.unwrap_or(defaults.offset),
            sort: p.sort.unwrap_or(defaults.sort),
            tags: p
                .tags
                .map(|t| {
                    t.split(',')
                        .map(str::trim)
                        .filter(|s| !s.is_empty())
                        .map(str::to_string)
                        .collect()
                })
                .unwrap_or_default(),
            search: p.search.unwrap_or_default(),
            since: p.since.as_deref().map(parse_timestamp).transpose()?,
            until: p.until.as_deref().map(parse_timestamp).transpose()?,
        };
        query.validate()?;
        Ok(query)
    }
}

fn parse_timestamp(raw: &str) -> Result<OffsetDateTime, FeedQueryError> {
    OffsetDateTime::parse(raw, &Rfc3339).map_err(|_| FeedQueryError::Timestamp(raw.to_string()))
}

impl FeedQuery {
    pub fn validate(&self) -> Result<(), FeedQueryError> {
        if !(1..=MAX_LIMIT).contains(&self.limit) {
            return Err(FeedQueryError::Limit);
        }
        if self.offset < 0 {
            return Err(FeedQueryError::Offset);
        }
        if self.tags.len() > MAX_TAGS {
            return Err(FeedQueryError::TooManyTags);
        }
        if self.search.chars().count() > MAX_SEARCH_LEN {
            return Err(FeedQueryError::SearchTooLong);
        }
        Ok(())
    }
}
