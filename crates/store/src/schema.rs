use rusqlite::Connection;

/// Apply connection pragmas for a long-lived writer connection.
pub fn optimize_connection(conn: &Connection) {
    conn.pragma_update(None, "journal_mode", "WAL").ok();
    conn.pragma_update(None, "synchronous", "NORMAL").ok();
    conn.pragma_update(None, "cache_size", "-64000").ok();
    conn.pragma_update(None, "temp_store", "MEMORY").ok();
    conn.pragma_update(None, "busy_timeout", "5000").ok();
}

/// Create the core tables. The channel/tenant/key tables are owned by the
/// admin layer; they are created here too so a fresh database is usable.
pub fn init_schema(conn: &Connection) -> rusqlite::Result<()> {
    conn.execute_batch(
        "create table if not exists request_logs (
            id text primary key,
            created_at integer not null,
            updated_at integer not null,
            status text not null,
            tenant_id integer,
            api_key_id integer,
            method text,
            path text,
            original_model text,
            mapped_model text,
            provider text,
            channel_id integer,
            endpoint text,
            status_code integer,
            latency_ms integer,
            is_streaming integer not null default 0,
            input_tokens integer,
            output_tokens integer,
            cache_read_input_tokens integer,
            cache_creation_input_tokens integer,
            cost_micros integer,
            error_type text
        );
        create index if not exists idx_request_logs_created on request_logs(created_at desc);
        create index if not exists idx_request_logs_status on request_logs(status, created_at);

        create table if not exists request_log_details (
            request_id text primary key,
            request_headers text,
            request_body text,
            translated_request_body text,
            response_headers text,
            response_body text,
            translated_response_body text,
            created_at integer not null
        );

        create table if not exists tenants (
            id integer primary key autoincrement,
            name text not null,
            disabled integer not null default 0
        );

        create table if not exists api_keys (
            id integer primary key autoincrement,
            tenant_id integer not null,
            key text not null unique,
            upstream_url text,
            upstream_api_key text,
            model_mappings text,
            native_mode integer not null default 0,
            web_search_mode integer not null default 0,
            disabled integer not null default 0
        );

        create table if not exists channels (
            id integer primary key autoincrement,
            name text not null,
            kind text not null,
            endpoint text not null default 'chat',
            base_url text not null,
            api_key text not null,
            headers text,
            custom_params text,
            model_globs text,
            disabled integer not null default 0
        );",
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_schema_applies_twice() {
        let conn = Connection::open_in_memory().unwrap();
        init_schema(&conn).unwrap();
        init_schema(&conn).unwrap();

        let n: i64 = conn
            .query_row("select count(*) from request_logs", [], |r| r.get(0))
            .unwrap();
        assert_eq!(n, 0);
    }
}
