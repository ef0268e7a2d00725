use std::sync::{Arc, Mutex};

use insight_config::InvocationLog;
use insight_contracts::InvocationLogRecord;
use rusqlite::{params, Connection};
use tokio::io::AsyncWriteExt;
use tokio::sync::{mpsc, oneshot};
use tracing::{debug, warn};

enum LogCommand {
    Record(Box<InvocationLogRecord>),
    Flush(oneshot::Sender<()>),
}

enum SinkBackend {
    Jsonl(tokio::fs::File),
    Sqlite(Connection),
    Memory(MemoryLog),
}

/// In-process sink, read back by tests.
#[derive(Debug, Clone, Default)]
pub struct MemoryLog {
    records: Arc<Mutex<Vec<InvocationLogRecord>>>,
}

impl MemoryLog {
    pub fn records(&self) -> Vec<InvocationLogRecord> {
        self.records
            .lock()
            .map(|records| records.clone())
            .unwrap_or_default()
    }
}

#[derive(Clone)]
pub struct InvocationLogger {
    tx: Option<mpsc::UnboundedSender<LogCommand>>,
}

impl InvocationLogger {
    pub fn disabled() -> Self {
        Self { tx: None }
    }

    pub fn memory() -> (Self, MemoryLog) {
        let log = MemoryLog::default();
        (Self::spawn(SinkBackend::Memory(log.clone())), log)
    }

    /// An unconfigured sink, or one that cannot be opened, disables logging.
    pub async fn from_config(cfg: &InvocationLog) -> Self {
        match open_backend(cfg).await {
            Ok(Some(backend)) => Self::spawn(backend),
            Ok(None) => {
                debug!(sink = %cfg.sink, "invocation log disabled");
                Self::disabled()
            }
            Err(e) => {
                warn!(
                    sink = %cfg.sink,
                    error = %e,
                    "invocation log sink unavailable; logging disabled"
                );
                Self::disabled()
            }
        }
    }

    fn spawn(backend: SinkBackend) -> Self {
        let (tx, rx) = mpsc::unbounded_channel();
        tokio::spawn(run_writer(rx, backend));
        Self { tx: Some(tx) }
    }

    pub fn is_enabled(&self) -> bool {
        self.tx.is_some()
    }

    pub fn record(&self, record: InvocationLogRecord) {
        if let Some(tx) = &self.tx {
            if tx.send(LogCommand::Record(Box::new(record))).is_err() {
                warn!("invocation log writer has stopped; record dropped");
            }
        }
    }

    /// Resolves once every record sent before the call has been written.
    pub async fn flush(&self) {
        if let Some(tx) = &self.tx {
            let (ack, done) = oneshot::channel();
            if tx.send(LogCommand::Flush(ack)).is_ok() {
                let _ = done.await;
            }
        }
    }
}

async fn open_backend(cfg: &InvocationLog) -> Result<Option<SinkBackend>, String> {
    match cfg.sink.as_str() {
        "jsonl" => match non_empty(cfg.jsonl_path.as_deref()) {
            Some(path) => {
                let file = tokio::fs::OpenOptions::new()
                    .create(true)
                    .append(true)
                    .open(path)
                    .await
                    .map_err(|e| e.to_string())?;
                Ok(Some(SinkBackend::Jsonl(file)))
            }
            None => Ok(None),
        },
        "sqlite" => match non_empty(cfg.sqlite_path.as_deref()) {
            Some(path) => Ok(Some(SinkBackend::Sqlite(open_sqlite(path)?))),
            None => Ok(None),
        },
        _ => Ok(None),
    }
}

fn non_empty(path: Option<&str>) -> Option<&str> {
    path.map(str::trim).filter(|p| !p.is_empty())
}

fn open_sqlite(path: &str) -> Result<Connection, String> {
    let conn = Connection::open(path).map_err(|e| e.to_string())?;
    conn.execute_batch(
        "
        CREATE TABLE IF NOT EXISTS invocation_log (
            id TEXT PRIMARY KEY,
            ts TEXT NOT NULL,
            job TEXT NOT NULL,
            status TEXT NOT NULL,
            provider TEXT NOT NULL,
            elapsed_ms INTEGER NOT NULL,
            prompt_tokens INTEGER,
            completion_tokens INTEGER,
            total_tokens INTEGER,
            used_fallback INTEGER NOT NULL,
            payload_hash TEXT,
            metadata_json TEXT NOT NULL,
            error_message TEXT
        );
        ",
    )
    .map_err(|e| e.to_string())?;
    Ok(conn)
}

async fn run_writer(mut rx: mpsc::UnboundedReceiver<LogCommand>, mut backend: SinkBackend) {
    while let Some(cmd) = rx.recv().await {
        match cmd {
            LogCommand::Record(rec) => {
                if let Err(e) = backend.write(&rec).await {
                    warn!(
                        job = rec.job.as_str(),
                        status = rec.status.as_str(),
                        error = %e,
                        "invocation log write failed"
                    );
                }
            }
            LogCommand::Flush(ack) => {
                let _ = ack.send(());
            }
        }
    }
}

impl SinkBackend {
    async fn write(&mut self, rec: &InvocationLogRecord) -> Result<(), String> {
        match self {
            SinkBackend::Jsonl(file) => {
                let mut line = serde_json::to_string(rec).map_err(|e| e.to_string())?;
                line.push('\n');
                file.write_all(line.as_bytes())
                    .await
                    .map_err(|e| e.to_string())?;
                file.flush().await.map_err(|e| e.to_string())
            }
            SinkBackend::Sqlite(conn) => {
                let metadata = serde_json::to_string(&rec.metadata).map_err(|e| e.to_string())?;
                conn.execute(
                    "
                    INSERT INTO invocation_log
                    (id, ts, job, status, provider, elapsed_ms, prompt_tokens, completion_tokens,
                     total_tokens, used_fallback, payload_hash, metadata_json, error_message)
                    VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13)
                    ",
                    params![
                        rec.id,
                        rec.ts,
                        rec.job.as_str(),
                        rec.status.as_str(),
                        rec.provider,
                        rec.elapsed_ms as i64,
                        rec.prompt_tokens,
                        rec.completion_tokens,
                        rec.total_tokens,
                        rec.used_fallback,
                        rec.payload_hash,
                        metadata,
                        rec.error_message
                    ],
                )
                .map(|_| ())
                .map_err(|e| e.to_string())
            }
            SinkBackend::Memory(log) => {
                let mut records = log
                    .records
                    .lock()
                    .map_err(|_| "memory log poisoned".to_string())?;
                records.push(rec.clone());
                Ok(())
            }
        }
    }
}
