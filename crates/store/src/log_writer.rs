//! Durable request-log writer.
//!
//! A single worker thread owns the SQLite connection and drains a bounded
//! command channel. Model-invocation requests follow the pending → terminal
//! workflow: a pending row is inserted (acknowledged) before upstream
//! dispatch, and the terminal update lands when the response body closes.
//! Non-model requests are batched and flushed in one transaction.

use conduit_core::trace::TraceData;
use rusqlite::{Connection, params};
use std::sync::mpsc::{RecvTimeoutError, SyncSender, TrySendError, sync_channel};
use std::time::{Duration, Instant};
use tokio::sync::oneshot;

const COMMAND_CAPACITY: usize = 10_000;
const BATCH_MAX: usize = 100;
const BATCH_FLUSH_INTERVAL: Duration = Duration::from_millis(200);

/// One `request_log_details` row.
#[derive(Debug, Clone, Default)]
pub struct DetailRow {
    pub request_id: String,
    pub request_headers: Option<String>,
    pub request_body: Option<String>,
    pub translated_request_body: Option<String>,
    pub response_headers: Option<String>,
    pub response_body: Option<String>,
    pub translated_response_body: Option<String>,
    pub created_at: i64,
}

/// One `request_logs` row as read back from the database.
#[derive(Debug, Clone)]
pub struct LogRow {
    pub request_id: String,
    pub status: String,
    pub status_code: Option<u16>,
    pub error_type: Option<String>,
    pub input_tokens: Option<u64>,
    pub output_tokens: Option<u64>,
    pub cost_micros: Option<i64>,
    pub is_streaming: bool,
}

enum WriteCommand {
    Pending(Box<TraceData>, oneshot::Sender<()>),
    Finalize(Box<TraceData>),
    NonModel(Box<TraceData>),
    PersistDetail(Box<DetailRow>),
    FetchDetail(String, oneshot::Sender<Option<DetailRow>>),
    FetchLog(String, oneshot::Sender<Option<LogRow>>),
    SweepPending { orphan_after_secs: u64 },
    Shutdown(oneshot::Sender<()>),
}

/// Cheap cloneable producer handle.
#[derive(Clone)]
pub struct LogWriter {
    tx: SyncSender<WriteCommand>,
}

impl LogWriter {
    /// Spawn the writer thread on an already-open connection.
    pub fn start(conn: Connection) -> Self {
        let (tx, rx) = sync_channel::<WriteCommand>(COMMAND_CAPACITY);

        std::thread::Builder::new()
            .name("log-writer".into())
            .spawn(move || worker_loop(conn, rx))
            .expect("failed to spawn log writer thread");

        Self { tx }
    }

    fn send(&self, cmd: WriteCommand) {
        match self.tx.try_send(cmd) {
            Ok(()) => {}
            Err(TrySendError::Full(_)) => {
                tracing::warn!("log writer channel full, dropping write");
            }
            Err(TrySendError::Disconnected(_)) => {
                tracing::warn!("log writer stopped, dropping write");
            }
        }
    }

    /// Insert the pending row and wait for the write to land. Called
    /// before upstream dispatch so a crash still leaves an audit row.
    pub async fn insert_pending(&self, trace: TraceData) {
        let (ack_tx, ack_rx) = oneshot::channel();
        self.send(WriteCommand::Pending(Box::new(trace), ack_tx));
        // Ack is dropped if the command was dropped on a full channel;
        // the terminal update falls back to a full insert in that case.
        let _ = ack_rx.await;
    }

    /// Terminal update for a model request. Fire-and-forget.
    pub fn finalize(&self, trace: TraceData) {
        self.send(WriteCommand::Finalize(Box::new(trace)));
    }

    /// Batched write for non-model requests (auth, introspection).
    pub fn write_non_model(&self, trace: TraceData) {
        self.send(WriteCommand::NonModel(Box::new(trace)));
    }

    pub fn persist_detail(&self, row: DetailRow) {
        self.send(WriteCommand::PersistDetail(Box::new(row)));
    }

    pub async fn fetch_detail(&self, request_id: &str) -> Option<DetailRow> {
        let (tx, rx) = oneshot::channel();
        self.send(WriteCommand::FetchDetail(request_id.to_string(), tx));
        rx.await.ok().flatten()
    }

    pub async fn fetch_log(&self, request_id: &str) -> Option<LogRow> {
        let (tx, rx) = oneshot::channel();
        self.send(WriteCommand::FetchLog(request_id.to_string(), tx));
        rx.await.ok().flatten()
    }

    pub fn sweep_pending(&self, orphan_after_secs: u64) {
        self.send(WriteCommand::SweepPending { orphan_after_secs });
    }

    /// Flush buffered writes and stop the worker.
    pub async fn shutdown(&self) {
        let (tx, rx) = oneshot::channel();
        self.send(WriteCommand::Shutdown(tx));
        let _ = rx.await;
    }
}

/// Spawn the background task that sweeps orphaned pending rows.
pub fn spawn_pending_cleaner(
    writer: LogWriter,
    interval_secs: u64,
    orphan_after_secs: u64,
) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(Duration::from_secs(interval_secs.max(1)));
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
        loop {
            ticker.tick().await;
            writer.sweep_pending(orphan_after_secs);
        }
    })
}

// ─── Worker ────────────────────────────────────────────────────────────────

fn worker_loop(conn: Connection, rx: std::sync::mpsc::Receiver<WriteCommand>) {
    let mut batch: Vec<TraceData> = Vec::new();
    let mut flush_deadline: Option<Instant> = None;

    loop {
        let cmd = match flush_deadline {
            Some(deadline) => {
                let wait = deadline.saturating_duration_since(Instant::now());
                match rx.recv_timeout(wait) {
                    Ok(cmd) => Some(cmd),
                    Err(RecvTimeoutError::Timeout) => None,
                    Err(RecvTimeoutError::Disconnected) => break,
                }
            }
            None => match rx.recv() {
                Ok(cmd) => Some(cmd),
                Err(_) => break,
            },
        };

        let Some(cmd) = cmd else {
            flush_batch(&conn, &mut batch);
            flush_deadline = None;
            continue;
        };

        match cmd {
            WriteCommand::Pending(trace, ack) => {
                if let Err(e) = insert_pending_row(&conn, &trace) {
                    tracing::warn!(request_id = %trace.request_id, "pending insert failed: {e}");
                }
                let _ = ack.send(());
            }
            WriteCommand::Finalize(trace) => {
                if let Err(e) = finalize_row(&conn, &trace) {
                    tracing::warn!(request_id = %trace.request_id, "log finalize failed: {e}");
                }
            }
            WriteCommand::NonModel(trace) => {
                batch.push(*trace);
                if batch.len() >= BATCH_MAX {
                    flush_batch(&conn, &mut batch);
                    flush_deadline = None;
                } else if flush_deadline.is_none() {
                    flush_deadline = Some(Instant::now() + BATCH_FLUSH_INTERVAL);
                }
            }
            WriteCommand::PersistDetail(row) => {
                if let Err(e) = upsert_detail(&conn, &row) {
                    tracing::warn!(request_id = %row.request_id, "detail persist failed: {e}");
                }
            }
            WriteCommand::FetchDetail(id, reply) => {
                let _ = reply.send(fetch_detail_row(&conn, &id));
            }
            WriteCommand::FetchLog(id, reply) => {
                let _ = reply.send(fetch_log_row(&conn, &id));
            }
            WriteCommand::SweepPending { orphan_after_secs } => {
                sweep_pending_rows(&conn, orphan_after_secs);
            }
            WriteCommand::Shutdown(ack) => {
                flush_batch(&conn, &mut batch);
                let _ = ack.send(());
                break;
            }
        }
    }
}

fn terminal_status(trace: &TraceData) -> &'static str {
    let ok = trace.status_code.is_some_and(|s| s < 400) && trace.error_type.is_none();
    if ok { "success" } else { "error" }
}

fn insert_pending_row(conn: &Connection, t: &TraceData) -> rusqlite::Result<()> {
    let now = chrono::Utc::now().timestamp();
    conn.prepare_cached(
        "insert or ignore into request_logs
         (id, created_at, updated_at, status, tenant_id, api_key_id, method, path,
          original_model, mapped_model, provider, channel_id, endpoint, is_streaming)
         values (?1, ?2, ?3, 'pending', ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13)",
    )?
    .execute(params![
        t.request_id,
        t.created_at.timestamp(),
        now,
        t.tenant_id,
        t.api_key_id,
        t.method,
        t.path,
        t.original_model,
        t.mapped_model,
        t.provider,
        t.channel_id,
        t.endpoint,
        t.is_streaming as i64,
    ])?;
    Ok(())
}

fn finalize_row(conn: &Connection, t: &TraceData) -> rusqlite::Result<()> {
    let now = chrono::Utc::now().timestamp();
    let status = terminal_status(t);

    let updated = conn
        .prepare_cached(
            "update request_logs set
               updated_at = ?2, status = ?3, original_model = ?4, mapped_model = ?5,
               provider = ?6, channel_id = ?7, endpoint = ?8, status_code = ?9,
               latency_ms = ?10, is_streaming = ?11, input_tokens = ?12,
               output_tokens = ?13, cache_read_input_tokens = ?14,
               cache_creation_input_tokens = ?15, cost_micros = ?16, error_type = ?17
             where id = ?1",
        )?
        .execute(params![
            t.request_id,
            now,
            status,
            t.original_model,
            t.mapped_model,
            t.provider,
            t.channel_id,
            t.endpoint,
            t.status_code,
            t.latency_ms.map(|v| v as i64),
            t.is_streaming as i64,
            t.input_tokens.map(|v| v as i64),
            t.output_tokens.map(|v| v as i64),
            t.cache_read_tokens.map(|v| v as i64),
            t.cache_creation_tokens.map(|v| v as i64),
            t.cost_micros,
            t.error_type,
        ])?;

    if updated == 0 {
        // Pending insert never landed; fall back to a full insert.
        conn.prepare_cached(
            "insert or replace into request_logs
             (id, created_at, updated_at, status, tenant_id, api_key_id, method, path,
              original_model, mapped_model, provider, channel_id, endpoint, status_code,
              latency_ms, is_streaming, input_tokens, output_tokens,
              cache_read_input_tokens, cache_creation_input_tokens, cost_micros, error_type)
             values (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, ?15, ?16,
                     ?17, ?18, ?19, ?20, ?21, ?22)",
        )?
        .execute(params![
            t.request_id,
            t.created_at.timestamp(),
            now,
            terminal_status(t),
            t.tenant_id,
            t.api_key_id,
            t.method,
            t.path,
            t.original_model,
            t.mapped_model,
            t.provider,
            t.channel_id,
            t.endpoint,
            t.status_code,
            t.latency_ms.map(|v| v as i64),
            t.is_streaming as i64,
            t.input_tokens.map(|v| v as i64),
            t.output_tokens.map(|v| v as i64),
            t.cache_read_tokens.map(|v| v as i64),
            t.cache_creation_tokens.map(|v| v as i64),
            t.cost_micros,
            t.error_type,
        ])?;
    }
    Ok(())
}

fn flush_batch(conn: &Connection, batch: &mut Vec<TraceData>) {
    if batch.is_empty() {
        return;
    }
    let result = (|| -> rusqlite::Result<()> {
        conn.execute_batch("begin")?;
        for t in batch.iter() {
            if let Err(e) = finalize_row(conn, t) {
                tracing::warn!(request_id = %t.request_id, "batched write failed: {e}");
            }
        }
        conn.execute_batch("commit")
    })();
    if let Err(e) = result {
        tracing::warn!("batch flush failed: {e}");
        let _ = conn.execute_batch("rollback");
    }
    batch.clear();
}

fn upsert_detail(conn: &Connection, row: &DetailRow) -> rusqlite::Result<()> {
    conn.prepare_cached(
        "insert or replace into request_log_details
         (request_id, request_headers, request_body, translated_request_body,
          response_headers, response_body, translated_response_body, created_at)
         values (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
    )?
    .execute(params![
        row.request_id,
        row.request_headers,
        row.request_body,
        row.translated_request_body,
        row.response_headers,
        row.response_body,
        row.translated_response_body,
        row.created_at,
    ])?;
    Ok(())
}

fn fetch_detail_row(conn: &Connection, request_id: &str) -> Option<DetailRow> {
    conn.prepare_cached(
        "select request_id, request_headers, request_body, translated_request_body,
                response_headers, response_body, translated_response_body, created_at
         from request_log_details where request_id = ?1",
    )
    .ok()?
    .query_row([request_id], |r| {
        Ok(DetailRow {
            request_id: r.get(0)?,
            request_headers: r.get(1)?,
            request_body: r.get(2)?,
            translated_request_body: r.get(3)?,
            response_headers: r.get(4)?,
            response_body: r.get(5)?,
            translated_response_body: r.get(6)?,
            created_at: r.get(7)?,
        })
    })
    .ok()
}

fn fetch_log_row(conn: &Connection, request_id: &str) -> Option<LogRow> {
    conn.prepare_cached(
        "select id, status, status_code, error_type, input_tokens, output_tokens,
                cost_micros, is_streaming
         from request_logs where id = ?1",
    )
    .ok()?
    .query_row([request_id], |r| {
        Ok(LogRow {
            request_id: r.get(0)?,
            status: r.get(1)?,
            status_code: r.get::<_, Option<i64>>(2)?.map(|v| v as u16),
            error_type: r.get(3)?,
            input_tokens: r.get::<_, Option<i64>>(4)?.map(|v| v as u64),
            output_tokens: r.get::<_, Option<i64>>(5)?.map(|v| v as u64),
            cost_micros: r.get(6)?,
            is_streaming: r.get::<_, i64>(7)? != 0,
        })
    })
    .ok()
}

fn sweep_pending_rows(conn: &Connection, orphan_after_secs: u64) {
    let cutoff = chrono::Utc::now().timestamp() - orphan_after_secs as i64;
    let result = conn
        .prepare_cached(
            "update request_logs
             set status = 'error', error_type = 'timeout_cleanup', updated_at = ?1
             where status = 'pending' and created_at < ?2",
        )
        .and_then(|mut stmt| stmt.execute(params![chrono::Utc::now().timestamp(), cutoff]));

    match result {
        Ok(0) => {}
        Ok(n) => tracing::info!("swept {n} orphaned pending log rows"),
        Err(e) => tracing::warn!("pending sweep failed: {e}"),
    }
}
