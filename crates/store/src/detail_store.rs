//! In-memory bounded map of recent request/response snapshots.
//!
//! Entries carry a TTL and are eventually flushed to the durable
//! `request_log_details` table through the log writer. When the store is
//! full, the entry with the oldest `last_updated_at` is evicted.

use crate::log_writer::{DetailRow, LogWriter};
use conduit_core::config::DetailConfig;
use std::collections::HashMap;
use std::sync::RwLock;
use std::time::{Duration, Instant};

#[derive(Debug, Clone)]
pub struct RequestDetail {
    pub request_id: String,
    pub created_at: chrono::DateTime<chrono::Utc>,
    pub last_updated_at: Instant,
    pub request_headers: Option<String>,
    pub request_body: Option<String>,
    pub translated_request_body: Option<String>,
    pub response_headers: Option<String>,
    pub response_body: Option<String>,
    pub translated_response_body: Option<String>,
    pub persisted: bool,
}

impl RequestDetail {
    fn new(request_id: &str) -> Self {
        Self {
            request_id: request_id.to_string(),
            created_at: chrono::Utc::now(),
            last_updated_at: Instant::now(),
            request_headers: None,
            request_body: None,
            translated_request_body: None,
            response_headers: None,
            response_body: None,
            translated_response_body: None,
            persisted: false,
        }
    }

    fn to_row(&self) -> DetailRow {
        DetailRow {
            request_id: self.request_id.clone(),
            request_headers: self.request_headers.clone(),
            request_body: self.request_body.clone(),
            translated_request_body: self.translated_request_body.clone(),
            response_headers: self.response_headers.clone(),
            response_body: self.response_body.clone(),
            translated_response_body: self.translated_response_body.clone(),
            created_at: self.created_at.timestamp(),
        }
    }
}

pub struct DetailStore {
    entries: RwLock<HashMap<String, RequestDetail>>,
    config: DetailConfig,
    writer: LogWriter,
}

impl DetailStore {
    pub fn new(config: DetailConfig, writer: LogWriter) -> Self {
        Self {
            entries: RwLock::new(HashMap::new()),
            config,
            writer,
        }
    }

    fn truncate(&self, value: &str) -> String {
        if value.len() <= self.config.max_field_bytes {
            return value.to_string();
        }
        // Cut on a char boundary at or below the cap.
        let mut end = self.config.max_field_bytes;
        while end > 0 && !value.is_char_boundary(end) {
            end -= 1;
        }
        value[..end].to_string()
    }

    fn with_entry(&self, request_id: &str, update: impl FnOnce(&mut RequestDetail)) {
        let mut entries = self.entries.write().unwrap_or_else(|e| e.into_inner());

        if !entries.contains_key(request_id) && entries.len() >= self.config.max_entries {
            // Evict the entry with the oldest last_updated_at, persisting
            // it first if it never reached the durable table.
            let oldest = entries
                .values()
                .min_by_key(|d| d.last_updated_at)
                .map(|d| d.request_id.clone());
            if let Some(oldest) = oldest
                && let Some(evicted) = entries.remove(&oldest)
                && !evicted.persisted
            {
                self.writer.persist_detail(evicted.to_row());
            }
        }

        let entry = entries
            .entry(request_id.to_string())
            .or_insert_with(|| RequestDetail::new(request_id));
        update(entry);
        entry.last_updated_at = Instant::now();
        entry.persisted = false;
    }

    pub fn update_request_data(&self, request_id: &str, headers_json: &str, body: &str) {
        let headers = self.truncate(headers_json);
        let body = self.truncate(body);
        self.with_entry(request_id, |d| {
            d.request_headers = Some(headers);
            d.request_body = Some(body);
        });
    }

    pub fn update_translated_request_body(&self, request_id: &str, body: &str) {
        let body = self.truncate(body);
        self.with_entry(request_id, |d| {
            d.translated_request_body = Some(body);
        });
    }

    pub fn update_response_data(&self, request_id: &str, headers_json: &str, body: &str) {
        let headers = self.truncate(headers_json);
        let body = self.truncate(body);
        self.with_entry(request_id, |d| {
            d.response_headers = Some(headers);
            d.response_body = Some(body);
        });
    }

    /// Append a translated response fragment (streaming chunks arrive
    /// incrementally); the per-field cap still applies.
    pub fn append_translated_response(&self, request_id: &str, fragment: &str) {
        let cap = self.config.max_field_bytes;
        let fragment = fragment.to_string();
        self.with_entry(request_id, move |d| {
            let buf = d.translated_response_body.get_or_insert_with(String::new);
            let room = cap.saturating_sub(buf.len());
            if room == 0 {
                return;
            }
            let mut take = fragment.len().min(room);
            while take > 0 && !fragment.is_char_boundary(take) {
                take -= 1;
            }
            buf.push_str(&fragment[..take]);
        });
    }

    /// Read a detail entry: memory first, then the durable table.
    pub async fn get(&self, request_id: &str) -> Option<DetailRow> {
        {
            let entries = self.entries.read().unwrap_or_else(|e| e.into_inner());
            if let Some(d) = entries.get(request_id) {
                return Some(d.to_row());
            }
        }
        self.writer.fetch_detail(request_id).await
    }

    pub fn len(&self) -> usize {
        self.entries.read().unwrap_or_else(|e| e.into_inner()).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Expire entries past their TTL, persisting the unpersisted first.
    pub fn cleanup_expired(&self) {
        let ttl = Duration::from_secs(self.config.ttl_secs);
        let now = Instant::now();
        let mut entries = self.entries.write().unwrap_or_else(|e| e.into_inner());

        let expired: Vec<String> = entries
            .values()
            .filter(|d| now.duration_since(d.last_updated_at) >= ttl)
            .map(|d| d.request_id.clone())
            .collect();

        for id in expired {
            if let Some(detail) = entries.remove(&id)
                && !detail.persisted
            {
                self.writer.persist_detail(detail.to_row());
            }
        }
    }

    /// Persist every unpersisted entry. Called on shutdown.
    pub fn flush_all(&self) {
        let mut entries = self.entries.write().unwrap_or_else(|e| e.into_inner());
        for detail in entries.values_mut() {
            if !detail.persisted {
                self.writer.persist_detail(detail.to_row());
                detail.persisted = true;
            }
        }
    }
}

/// Spawn the periodic cleanup loop.
pub fn spawn_cleanup(
    store: std::sync::Arc<DetailStore>,
    interval_secs: u64,
) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(Duration::from_secs(interval_secs.max(1)));
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
        loop {
            ticker.tick().await;
            store.cleanup_expired();
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use rusqlite::Connection;

    fn store(max_entries: usize, ttl_secs: u64, max_field_bytes: usize) -> DetailStore {
        let conn = Connection::open_in_memory().unwrap();
        crate::schema::init_schema(&conn).unwrap();
        let writer = LogWriter::start(conn);
        DetailStore::new(
            DetailConfig {
                max_entries,
                ttl_secs,
                max_field_bytes,
                cleanup_interval_secs: 30,
            },
            writer,
        )
    }

    #[tokio::test]
    async fn test_update_and_get() {
        let s = store(10, 300, 1024);
        s.update_request_data("a", r#"{"content-type":"application/json"}"#, "{}");
        s.update_response_data("a", "{}", r#"{"ok":true}"#);

        let row = s.get("a").await.unwrap();
        assert_eq!(row.response_body.as_deref(), Some(r#"{"ok":true}"#));
    }

    #[tokio::test]
    async fn test_capacity_evicts_oldest() {
        let s = store(2, 300, 1024);
        s.update_request_data("a", "{}", "1");
        s.update_request_data("b", "{}", "2");
        s.update_request_data("a", "{}", "1-again"); // touch a, b is now oldest
        s.update_request_data("c", "{}", "3");

        assert_eq!(s.len(), 2);
        {
            let entries = s.entries.read().unwrap();
            assert!(entries.contains_key("a"));
            assert!(entries.contains_key("c"));
            assert!(!entries.contains_key("b"));
        }
        // Evicted entry was persisted and remains reachable.
        let row = s.get("b").await.unwrap();
        assert_eq!(row.request_body.as_deref(), Some("2"));
    }

    #[tokio::test]
    async fn test_field_cap() {
        let s = store(10, 300, 8);
        s.update_request_data("a", "{}", "0123456789abcdef");
        let row = s.get("a").await.unwrap();
        assert_eq!(row.request_body.as_deref(), Some("01234567"));
    }

    #[tokio::test]
    async fn test_append_translated_response_capped() {
        let s = store(10, 300, 10);
        s.append_translated_response("a", "hello ");
        s.append_translated_response("a", "world!");
        let row = s.get("a").await.unwrap();
        assert_eq!(row.translated_response_body.as_deref(), Some("hello worl"));
    }

    #[tokio::test]
    async fn test_cleanup_persists_expired() {
        let s = store(10, 0, 1024); // ttl 0: everything is expired
        s.update_request_data("a", "{}", "body");
        s.cleanup_expired();
        assert_eq!(s.len(), 0);

        let row = s.get("a").await.unwrap();
        assert_eq!(row.request_body.as_deref(), Some("body"));
    }

    #[tokio::test]
    async fn test_flush_all() {
        let s = store(10, 300, 1024);
        s.update_request_data("a", "{}", "1");
        s.update_request_data("b", "{}", "2");
        s.flush_all();
        // Entries stay in memory but are now durable.
        assert_eq!(s.len(), 2);
        assert!(s.writer.fetch_detail("a").await.is_some());
        assert!(s.writer.fetch_detail("b").await.is_some());
    }
}
