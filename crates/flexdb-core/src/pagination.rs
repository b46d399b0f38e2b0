//! Cursor pagination shared by every entity listing.
//!
//! Rows are ordered by `(created_at, id)` ascending. A page token is the
//! base64url encoding of the last row's ordering key; an empty token starts
//! from the beginning. Tokens are opaque to callers.

use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine;
use chrono::{DateTime, SecondsFormat, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::config::PaginationConfig;
use crate::error::FlexError;

/// Position after the last row of a page.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Cursor {
    pub created_at: DateTime<Utc>,
    pub id: Uuid,
}

impl Cursor {
    pub fn new(created_at: DateTime<Utc>, id: Uuid) -> Self {
        Self { created_at, id }
    }

    pub fn encode(&self) -> String {
        let raw = format!(
            "{}|{}",
            self.created_at.to_rfc3339_opts(SecondsFormat::Micros, true),
            self.id
        );
        URL_SAFE_NO_PAD.encode(raw)
    }

    /// Decode a caller-supplied token. Empty means "from the start".
    pub fn decode(token: &str) -> Result<Option<Self>, FlexError> {
        let token = token.trim();
        if token.is_empty() {
            return Ok(None);
        }

        let invalid = || FlexError::validation("invalid page_token");
        let bytes = URL_SAFE_NO_PAD.decode(token).map_err(|_| invalid())?;
        let raw = String::from_utf8(bytes).map_err(|_| invalid())?;
        let (ts, id) = raw.split_once('|').ok_or_else(invalid)?;

        let created_at = DateTime::parse_from_rfc3339(ts)
            .map_err(|_| invalid())?
            .with_timezone(&Utc);
        let id = Uuid::parse_str(id).map_err(|_| invalid())?;

        Ok(Some(Self { created_at, id }))
    }
}

/// A caller's request for one page.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PageRequest {
    /// Non-positive means "use the default".
    #[serde(default)]
    pub page_size: i32,
    #[serde(default)]
    pub page_token: String,
}

impl PageRequest {
    pub fn new(page_size: i32, page_token: impl Into<String>) -> Self {
        Self {
            page_size,
            page_token: page_token.into(),
        }
    }

    /// First page with the given size.
    pub fn first(page_size: i32) -> Self {
        Self::new(page_size, String::new())
    }

    /// Effective page size after defaulting and capping.
    pub fn limit(&self, limits: &PaginationConfig) -> i64 {
        let size = if self.page_size <= 0 {
            limits.default_page_size
        } else {
            self.page_size as u32
        };
        i64::from(size.min(limits.max_page_size).max(1))
    }

    pub fn cursor(&self) -> Result<Option<Cursor>, FlexError> {
        Cursor::decode(&self.page_token)
    }
}

/// One page of results.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Page<T> {
    pub items: Vec<T>,
    /// Empty when no rows follow this page.
    pub next_page_token: String,
    /// Rows matching the filters, independent of paging. Computed by a
    /// separate query, so it can drift from the page under concurrent writes.
    pub total_count: i64,
}

impl<T> Page<T> {
    pub fn empty() -> Self {
        Self {
            items: Vec::new(),
            next_page_token: String::new(),
            total_count: 0,
        }
    }

    pub fn has_more(&self) -> bool {
        !self.next_page_token.is_empty()
    }

    pub fn map<U>(self, f: impl FnMut(T) -> U) -> Page<U> {
        Page {
            items: self.items.into_iter().map(f).collect(),
            next_page_token: self.next_page_token,
            total_count: self.total_count,
        }
    }
}
