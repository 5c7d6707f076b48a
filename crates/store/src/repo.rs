use conduit_core::channel::{Channel, ChannelKind, OpenAiEndpoint};
use conduit_core::context::{ModelMappingRule, ProxyConfig};
use conduit_core::error::ProxyError;
use rusqlite::Connection;
use std::collections::HashMap;
use std::path::Path;
use std::sync::{Mutex, RwLock};

/// Read side of the tenant/key/channel tables. The admin layer owns the
/// write side; the request path only ever reads.
pub trait AuthRepository: Send + Sync {
    /// Resolve an inbound API key to the tenant's proxy config.
    fn resolve_key(&self, key: &str) -> Result<Option<ProxyConfig>, ProxyError>;
}

pub trait ChannelRepository: Send + Sync {
    fn list_channels(&self) -> Result<Vec<Channel>, ProxyError>;
}

/// SQLite-backed repository with a single shared read connection.
pub struct SqliteRepo {
    conn: Mutex<Connection>,
}

impl SqliteRepo {
    pub fn open(path: &Path) -> Result<Self, ProxyError> {
        let conn = Connection::open(path)
            .map_err(|e| ProxyError::Config(format!("failed to open database: {e}")))?;
        crate::schema::optimize_connection(&conn);
        crate::schema::init_schema(&conn)
            .map_err(|e| ProxyError::Config(format!("failed to apply schema: {e}")))?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    #[cfg(test)]
    pub fn open_in_memory() -> Self {
        let conn = Connection::open_in_memory().unwrap();
        crate::schema::init_schema(&conn).unwrap();
        Self {
            conn: Mutex::new(conn),
        }
    }
}

fn parse_mappings(raw: Option<String>) -> Vec<ModelMappingRule> {
    let Some(raw) = raw else {
        return Vec::new();
    };
    // Stored as a JSON object {"pattern": "target", ...}
    match serde_json::from_str::<HashMap<String, String>>(&raw) {
        Ok(map) => {
            let mut rules: Vec<ModelMappingRule> = map
                .into_iter()
                .map(|(pattern, target)| ModelMappingRule { pattern, target })
                .collect();
            // Exact patterns take precedence over globs.
            rules.sort_by_key(|r| r.pattern.contains('*'));
            rules
        }
        Err(e) => {
            tracing::warn!("ignoring malformed model mappings: {e}");
            Vec::new()
        }
    }
}

impl AuthRepository for SqliteRepo {
    fn resolve_key(&self, key: &str) -> Result<Option<ProxyConfig>, ProxyError> {
        let conn = self.conn.lock().unwrap_or_else(|e| e.into_inner());
        let mut stmt = conn
            .prepare_cached(
                "select k.id, k.tenant_id, k.upstream_url, k.upstream_api_key,
                        k.model_mappings, k.native_mode, k.web_search_mode
                 from api_keys k join tenants t on t.id = k.tenant_id
                 where k.key = ?1 and k.disabled = 0 and t.disabled = 0",
            )
            .map_err(|e| ProxyError::Internal(format!("key lookup failed: {e}")))?;

        let row = stmt
            .query_row([key], |r| {
                Ok(ProxyConfig {
                    api_key_id: r.get(0)?,
                    tenant_id: r.get(1)?,
                    upstream_url: r.get(2)?,
                    upstream_api_key: r.get(3)?,
                    model_mappings: parse_mappings(r.get(4)?),
                    native_mode: r.get::<_, i64>(5)? != 0,
                    web_search_mode: r.get::<_, i64>(6)? != 0,
                })
            })
            .map(Some)
            .or_else(|e| match e {
                rusqlite::Error::QueryReturnedNoRows => Ok(None),
                other => Err(ProxyError::Internal(format!("key lookup failed: {other}"))),
            })?;

        Ok(row)
    }
}

impl ChannelRepository for SqliteRepo {
    fn list_channels(&self) -> Result<Vec<Channel>, ProxyError> {
        let conn = self.conn.lock().unwrap_or_else(|e| e.into_inner());
        let mut stmt = conn
            .prepare_cached(
                "select id, name, kind, endpoint, base_url, api_key, headers,
                        custom_params, model_globs, disabled
                 from channels",
            )
            .map_err(|e| ProxyError::Internal(format!("channel query failed: {e}")))?;

        let rows = stmt
            .query_map([], |r| {
                Ok((
                    r.get::<_, i64>(0)?,
                    r.get::<_, String>(1)?,
                    r.get::<_, String>(2)?,
                    r.get::<_, String>(3)?,
                    r.get::<_, String>(4)?,
                    r.get::<_, String>(5)?,
                    r.get::<_, Option<String>>(6)?,
                    r.get::<_, Option<String>>(7)?,
                    r.get::<_, Option<String>>(8)?,
                    r.get::<_, i64>(9)?,
                ))
            })
            .map_err(|e| ProxyError::Internal(format!("channel query failed: {e}")))?;

        let mut channels = Vec::new();
        for row in rows {
            let (id, name, kind, endpoint, base_url, api_key, headers, custom_params, globs, disabled) =
                row.map_err(|e| ProxyError::Internal(format!("channel row failed: {e}")))?;

            let kind: ChannelKind = match kind.parse() {
                Ok(k) => k,
                Err(e) => {
                    tracing::warn!("skipping channel {name}: {e}");
                    continue;
                }
            };
            let endpoint: OpenAiEndpoint = endpoint.parse().unwrap_or_default();

            channels.push(Channel {
                id,
                name,
                kind,
                endpoint,
                base_url,
                api_key,
                headers: headers
                    .and_then(|h| serde_json::from_str(&h).ok())
                    .unwrap_or_default(),
                custom_params: custom_params.and_then(|p| serde_json::from_str(&p).ok()),
                model_globs: globs
                    .and_then(|g| serde_json::from_str(&g).ok())
                    .unwrap_or_default(),
                disabled: disabled != 0,
            });
        }
        Ok(channels)
    }
}

// ─── Channel cache ─────────────────────────────────────────────────────────

/// Read-mostly snapshot of the channel table, refreshed by a background
/// task so the request path never touches SQLite for channel selection.
pub struct ChannelCache {
    channels: RwLock<Vec<Channel>>,
}

impl ChannelCache {
    pub fn new() -> Self {
        Self {
            channels: RwLock::new(Vec::new()),
        }
    }

    pub fn refresh(&self, repo: &dyn ChannelRepository) {
        match repo.list_channels() {
            Ok(list) => {
                let mut guard = self.channels.write().unwrap_or_else(|e| e.into_inner());
                *guard = list;
            }
            Err(e) => tracing::warn!("channel refresh failed: {e}"),
        }
    }

    /// Pick the first enabled channel serving the mapped model.
    pub fn pick(&self, model: &str) -> Option<Channel> {
        let guard = self.channels.read().unwrap_or_else(|e| e.into_inner());
        guard.iter().find(|c| c.serves_model(model)).cloned()
    }

    pub fn all(&self) -> Vec<Channel> {
        self.channels
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .clone()
    }
}

impl Default for ChannelCache {
    fn default() -> Self {
        Self::new()
    }
}
