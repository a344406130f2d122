//! Structured diagnostics written to the `event_log` table, plus a
//! [`log::Log`] implementation that forwards the crate's `log` records there.

use log::{Level, LevelFilter, Log, Metadata, Record};
use r2d2_sqlite::rusqlite::{params, Connection};
use serde_json::Value;
use time::OffsetDateTime;
use uuid::Uuid;

use crate::db::DbPool;

pub fn log_event(
    conn: &Connection,
    level: &str,
    code: Option<&str>,
    module: &str,
    message: &str,
    explain: Option<&str>,
    data: Option<Value>,
) -> rusqlite::Result<()> {
    let id = Uuid::new_v4().to_string();
    let ts = OffsetDateTime::now_utc().unix_timestamp();
    let data_str = data.map(|v| v.to_string());
    conn.execute(
        "INSERT INTO event_log (id, ts, level, code, module, message, explain, data) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
        params![id, ts, level, code, module, message, explain, data_str],
    )?;
    Ok(())
}

/// Persists `log` records into `event_log`; warnings and errors are also
/// echoed to stderr.
pub struct EventLogger {
    pool: DbPool,
    level: LevelFilter,
}

impl EventLogger {
    pub fn new(pool: DbPool, level: LevelFilter) -> Self {
        Self { pool, level }
    }

    /// Install as the global logger. Fails if one is already set.
    pub fn install(pool: DbPool, level: LevelFilter) -> Result<(), log::SetLoggerError> {
        log::set_boxed_logger(Box::new(Self::new(pool, level)))?;
        log::set_max_level(level);
        Ok(())
    }
}

impl Log for EventLogger {
    fn enabled(&self, metadata: &Metadata) -> bool {
        metadata.level() <= self.level
    }

    fn log(&self, record: &Record) {
        if !self.enabled(record.metadata()) {
            return;
        }
        let message = record.args().to_string();
        if record.level() <= Level::Warn {
            eprintln!("[{}] {}: {}", record.level(), record.target(), message);
        }
        if let Ok(conn) = self.pool.get() {
            let _ = log_event(
                &conn,
                &record.level().as_str().to_lowercase(),
                None,
                record.target(),
                &message,
                None,
                None,
            );
        }
    }

    fn flush(&self) {}
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::init_db;

    #[test]
    fn logger_writes_enabled_records_only() {
        let dir = tempfile::tempdir().unwrap();
        let pool = init_db(dir.path().to_path_buf()).unwrap();
        let logger = EventLogger::new(pool.clone(), LevelFilter::Info);

        logger.log(
            &Record::builder()
                .level(Level::Info)
                .target("her_os.test")
                .args(format_args!("stored"))
                .build(),
        );
        logger.log(
            &Record::builder()
                .level(Level::Debug)
                .target("her_os.test")
                .args(format_args!("dropped"))
                .build(),
        );

        let conn = pool.get().unwrap();
        let rows: Vec<(String, String)> = conn
            .prepare("SELECT level, message FROM event_log")
            .unwrap()
            .query_map([], |row| Ok((row.get(0)?, row.get(1)?)))
            .unwrap()
            .collect::<Result<_, _>>()
            .unwrap();
        assert_eq!(rows, vec![("info".to_string(), "stored".to_string())]);
    }

    #[test]
    fn installed_logger_receives_facade_records() {
        let dir = tempfile::tempdir().unwrap();
        let pool = init_db(dir.path().to_path_buf()).unwrap();
        EventLogger::install(pool.clone(), LevelFilter::Info).unwrap();
        assert!(EventLogger::install(pool.clone(), LevelFilter::Info).is_err());

        log::info!(target: "her_os.install", "routed through the facade");

        let conn = pool.get().unwrap();
        let count: i64 = conn
            .query_row(
                "SELECT COUNT(*) FROM event_log WHERE module = 'her_os.install'",
                [],
                |row| row.get(0),
            )
            .unwrap();
        assert_eq!(count, 1);
    }
}
