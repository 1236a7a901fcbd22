//! Timeline Query Engine - windowed, filtered, paginated reads of the event log.

use crate::config::TimelineConfig;
use crate::error::ReplayError;
use civicpulse_env::{EventStore, EventType, TimeRange, TimelineEvent, Timestamp};
use serde::{Deserialize, Serialize};
use std::sync::Arc;

/// A timeline request as received from the boundary.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TimelineRequest {
    pub window_start: Timestamp,
    pub window_end: Timestamp,
    /// Raw type names; normalized by [`TypeFilter::parse`]
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub types: Option<Vec<String>>,
    #[serde(default = "default_limit")]
    pub limit: usize,
    #[serde(default)]
    pub offset: usize,
}

fn default_limit() -> usize {
    100
}

impl TimelineRequest {
    /// Creates a request for the whole window, first page.
    pub fn new(window_start: Timestamp, window_end: Timestamp) -> Self {
        Self {
            window_start,
            window_end,
            types: None,
            limit: default_limit(),
            offset: 0,
        }
    }

    /// Restricts the request to the given type names.
    pub fn with_types<I, S>(mut self, types: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.types = Some(types.into_iter().map(Into::into).collect());
        self
    }

    /// Sets the page.
    pub fn with_page(mut self, limit: usize, offset: usize) -> Self {
        self.limit = limit;
        self.offset = offset;
        self
    }

    /// Fails with `InvalidRange` unless `window_start < window_end`.
    pub fn validate_range(&self) -> Result<TimeRange, ReplayError> {
        validate_window(self.window_start, self.window_end)
    }
}

/// Returns the inclusive range for a window, or `InvalidRange`.
pub fn validate_window(start: Timestamp, end: Timestamp) -> Result<TimeRange, ReplayError> {
    if start >= end {
        return Err(ReplayError::InvalidRange { start, end });
    }
    Ok(TimeRange::new(start, end))
}

/// A normalized, de-duplicated set of event types.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TypeFilter(Vec<EventType>);

impl TypeFilter {
    /// Normalizes raw type names.
    ///
    /// Unrecognized names are dropped; if nothing recognizable remains the
    /// filter is rejected with `InvalidFilter`.
    pub fn parse<S: AsRef<str>>(raw: &[S]) -> Result<Self, ReplayError> {
        let mut types: Vec<EventType> = raw
            .iter()
            .filter_map(|name| EventType::normalize(name.as_ref()))
            .collect();
        types.sort();
        types.dedup();

        if types.is_empty() {
            return Err(ReplayError::InvalidFilter(
                raw.iter().map(|s| s.as_ref().to_string()).collect(),
            ));
        }
        Ok(Self(types))
    }

    /// Parses an optional filter; `None` means every type.
    pub fn parse_optional<S: AsRef<str>>(raw: Option<&[S]>) -> Result<Option<Self>, ReplayError> {
        raw.map(Self::parse).transpose()
    }

    /// The accepted types.
    pub fn types(&self) -> &[EventType] {
        &self.0
    }

    /// Returns true if `event_type` passes the filter.
    pub fn allows(&self, event_type: EventType) -> bool {
        self.0.contains(&event_type)
    }
}

/// Read-only query surface over the event log.
pub struct TimelineQuery {
    store: Arc<dyn EventStore>,
    config: TimelineConfig,
}

impl TimelineQuery {
    /// Creates a query engine with default limits.
    pub fn new(store: Arc<dyn EventStore>) -> Self {
        Self::with_config(store, TimelineConfig::default())
    }

    /// Creates a query engine with explicit limits.
    pub fn with_config(store: Arc<dyn EventStore>, config: TimelineConfig) -> Self {
        Self { store, config }
    }

    /// Clamps a requested page size into `[1, max_limit]`.
    pub fn effective_limit(&self, requested: usize) -> usize {
        requested.clamp(1, self.config.max_limit.max(1))
    }

    /// Returns events in the window, ascending by `(timestamp, sequence)`.
    ///
    /// Input is validated before the store is touched. Store failures are
    /// wrapped as `StoreUnavailable` and not retried.
    pub async fn timeline(
        &self,
        request: &TimelineRequest,
    ) -> Result<Vec<TimelineEvent>, ReplayError> {
        let range = request.validate_range()?;
        let filter = TypeFilter::parse_optional(request.types.as_deref())?;
        let limit = self.effective_limit(request.limit);

        let events = self
            .store
            .query_events(range, filter.as_ref().map(TypeFilter::types), limit, request.offset)
            .await
            .map_err(|e| ReplayError::store("querying timeline", e))?;

        Ok(events)
    }
}
