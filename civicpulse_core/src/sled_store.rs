//! Durable event log on top of the embedded `sled` key-value store.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use civicpulse_env::{EnvError, EventStore, EventType, TimeRange, TimelineEvent, Timestamp};
use std::path::Path;

/// Key layout: `seconds (i64, sign-flipped BE) | subsec nanos (u32 BE) | sequence (u64 BE)`.
///
/// Lexicographic key order therefore equals `(timestamp, sequence)` order and
/// range scans come back already sorted.
const KEY_LEN: usize = 20;

fn encode_key(timestamp: Timestamp, sequence: u64) -> [u8; KEY_LEN] {
    let mut key = [0u8; KEY_LEN];
    let secs = (timestamp.timestamp() as u64) ^ (1u64 << 63);
    key[0..8].copy_from_slice(&secs.to_be_bytes());
    key[8..12].copy_from_slice(&timestamp.timestamp_subsec_nanos().to_be_bytes());
    key[12..20].copy_from_slice(&sequence.to_be_bytes());
    key
}

/// Sled-backed append-only event log.
///
/// Sequences come from `sled::Db::generate_id`, which is monotonic across
/// restarts, so insertion order survives reopening the database.
pub struct SledEventStore {
    db: sled::Db,
}

impl SledEventStore {
    /// Open a persistent log at the given path
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self, EnvError> {
        let db = sled::open(path)
            .map_err(|e| EnvError::store(format!("Failed to open sled DB: {}", e)))?;
        Ok(Self { db })
    }

    /// Create a temporary log (for testing)
    #[cfg(test)]
    pub fn open_temp() -> Result<Self, EnvError> {
        let config = sled::Config::new().temporary(true);
        let db = config
            .open()
            .map_err(|e| EnvError::store(format!("Failed to open temp DB: {}", e)))?;
        Ok(Self { db })
    }

    /// Number of stored events.
    pub fn len(&self) -> usize {
        self.db.len()
    }

    /// Returns true if the log is empty.
    pub fn is_empty(&self) -> bool {
        self.db.is_empty()
    }
}

#[async_trait]
impl EventStore for SledEventStore {
    async fn query_events(
        &self,
        range: TimeRange,
        types: Option<&[EventType]>,
        limit: usize,
        offset: usize,
    ) -> Result<Vec<TimelineEvent>, EnvError> {
        if range.start > range.end {
            return Ok(Vec::new());
        }

        let lo = encode_key(range.start, 0);
        let hi = encode_key(range.end, u64::MAX);

        let mut skipped = 0usize;
        let mut events = Vec::new();
        for item in self.db.range(lo..=hi) {
            if events.len() >= limit {
                break;
            }
            let (_, value) =
                item.map_err(|e| EnvError::store(format!("Range scan failed: {}", e)))?;
            let event: TimelineEvent = serde_json::from_slice(&value)?;

            if types.map_or(false, |t| !t.contains(&event.event_type)) {
                continue;
            }
            if skipped < offset {
                skipped += 1;
                continue;
            }
            events.push(event);
        }

        Ok(events)
    }

    async fn append_event(&self, mut event: TimelineEvent) -> Result<u64, EnvError> {
        let sequence = self
            .db
            .generate_id()
            .map_err(|e| EnvError::store(format!("Sequence allocation failed: {}", e)))?;
        event.sequence = sequence;
        event.event_type = event.payload.event_type();

        let value = serde_json::to_vec(&event)?;
        self.db
            .insert(encode_key(event.timestamp, sequence), value)
            .map_err(|e| EnvError::store(format!("Insert failed: {}", e)))?;
        self.db
            .flush_async()
            .await
            .map_err(|e| EnvError::store(format!("Flush failed: {}", e)))?;

        Ok(sequence)
    }
}

/// Decodes the timestamp part of a key (diagnostics).
pub fn decode_key_timestamp(key: &[u8]) -> Option<Timestamp> {
    if key.len() != KEY_LEN {
        return None;
    }
    let mut secs = [0u8; 8];
    secs.copy_from_slice(&key[0..8]);
    let mut nanos = [0u8; 4];
    nanos.copy_from_slice(&key[8..12]);
    let secs = (u64::from_be_bytes(secs) ^ (1u64 << 63)) as i64;
    DateTime::<Utc>::from_timestamp(secs, u32::from_be_bytes(nanos))
}
