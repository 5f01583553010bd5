use rusqlite::{Connection, Result};
use std::path::Path;

/// Opens (or creates) the crash history database at the given path.
///
/// Creates the crash_events table if it doesn't already exist.
/// Returns an open connection ready for use.
pub fn open_or_create(path: &Path) -> Result<Connection> {
    let conn = Connection::open(path)?;

    // Enable WAL mode so `--history` can read while the monitor writes
    conn.execute_batch("PRAGMA journal_mode=WAL;")?;

    conn.execute_batch(
        "CREATE TABLE IF NOT EXISTS crash_events (
            id              INTEGER PRIMARY KEY AUTOINCREMENT,
            detected_at     TEXT NOT NULL DEFAULT (strftime('%Y-%m-%dT%H:%M:%SZ', 'now')),
            process_name    TEXT NOT NULL,
            watermark       REAL NOT NULL,
            artifacts       TEXT NOT NULL,
            output_dir      TEXT NOT NULL,
            copied          INTEGER NOT NULL,
            failed          INTEGER NOT NULL
        );

        CREATE INDEX IF NOT EXISTS idx_crash_events_process ON crash_events(process_name);",
    )?;

    Ok(conn)
}

/// A crash to record: what was seen and what the archive pass did with it.
#[derive(Debug)]
pub struct NewCrashEvent<'a> {
    pub process_name: &'a str,
    pub watermark: f64,
    /// Crash artifact paths, newline separated.
    pub artifacts: String,
    pub output_dir: &'a str,
    pub copied: u32,
    pub failed: u32,
}

/// Insert a crash event. Returns its row id.
pub fn insert_crash_event(conn: &Connection, event: &NewCrashEvent<'_>) -> Result<i64> {
    conn.execute(
        "INSERT INTO crash_events (process_name, watermark, artifacts, output_dir, copied, failed)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
        rusqlite::params![
            event.process_name,
            event.watermark,
            event.artifacts,
            event.output_dir,
            event.copied,
            event.failed
        ],
    )?;
    Ok(conn.last_insert_rowid())
}

/// A row from the crash_events table.
#[derive(Debug)]
pub struct CrashEvent {
    pub id: i64,
    pub detected_at: String,
    pub process_name: String,
    pub watermark: f64,
    pub artifacts: String,
    pub output_dir: String,
    pub copied: u32,
    pub failed: u32,
}

/// The most recent `limit` crash events, newest first.
pub fn recent_crash_events(conn: &Connection, limit: i64) -> Result<Vec<CrashEvent>> {
    let mut stmt = conn.prepare(
        "SELECT id, detected_at, process_name, watermark, artifacts, output_dir, copied, failed
         FROM crash_events
         ORDER BY id DESC
         LIMIT ?1",
    )?;
    let rows = stmt.query_map(rusqlite::params![limit], map_crash_event)?;
    let events = rows.collect::<Result<Vec<_>>>()?;
    Ok(events)
}

fn map_crash_event(row: &rusqlite::Row) -> Result<CrashEvent> {
    Ok(CrashEvent {
        id: row.get(0)?,
        detected_at: row.get(1)?,
        process_name: row.get(2)?,
        watermark: row.get(3)?,
        artifacts: row.get(4)?,
        output_dir: row.get(5)?,
        copied: row.get(6)?,
        failed: row.get(7)?,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn test_db() -> (TempDir, Connection) {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("crashtrace.db");
        let conn = open_or_create(&path).unwrap();
        (dir, conn)
    }

    fn event(watermark: f64, copied: u32) -> NewCrashEvent<'static> {
        NewCrashEvent {
            process_name: "myprocess.exe",
            watermark,
            artifacts: "C:\\dumps\\myprocess.exe.1.dmp".to_string(),
            output_dir: "C:\\final_ttd_traces",
            copied,
            failed: 0,
        }
    }

    #[test]
    fn creates_database_and_table() {
        let (_dir, conn) = test_db();
        let count: i64 = conn
            .query_row("SELECT COUNT(*) FROM crash_events", [], |row| row.get(0))
            .unwrap();
        assert_eq!(count, 0);
    }

    #[test]
    fn idempotent_creation() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("crashtrace.db");

        let conn1 = open_or_create(&path).unwrap();
        insert_crash_event(&conn1, &event(1.0, 2)).unwrap();
        drop(conn1);
        let conn2 = open_or_create(&path).unwrap();

        assert_eq!(recent_crash_events(&conn2, 10).unwrap().len(), 1);
    }

    #[test]
    fn insert_and_list_newest_first() {
        let (_dir, conn) = test_db();
        let first = insert_crash_event(&conn, &event(100.5, 2)).unwrap();
        let second = insert_crash_event(&conn, &event(200.25, 0)).unwrap();
        assert!(second > first);

        let rows = recent_crash_events(&conn, 10).unwrap();
        assert_eq!(rows.len(), 2);
        assert_eq!(rows[0].id, second);
        assert_eq!(rows[0].watermark, 200.25);
        assert_eq!(rows[0].copied, 0);
        assert_eq!(rows[1].watermark, 100.5);
        assert_eq!(rows[1].process_name, "myprocess.exe");
        assert_eq!(rows[1].output_dir, "C:\\final_ttd_traces");
        assert!(rows[1].detected_at.ends_with('Z'));
    }

    #[test]
    fn limit_is_respected() {
        let (_dir, conn) = test_db();
        for i in 0..5 {
            insert_crash_event(&conn, &event(i as f64, 1)).unwrap();
        }
        let rows = recent_crash_events(&conn, 2).unwrap();
        assert_eq!(rows.len(), 2);
        assert_eq!(rows[0].watermark, 4.0);
        assert_eq!(rows[1].watermark, 3.0);
    }
}
