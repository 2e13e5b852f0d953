use rusqlite::Connection;

/// Validation literal stored under `meta.header`; must match byte-for-byte on load
pub const HEADER: &str = "[stackrec recording]";

pub const SCHEMA_VERSION: i32 = 1;

/// Tables a loadable file must contain
pub const REQUIRED_TABLES: &[&str] = &["meta", "threads", "snapshots", "frames", "resources"];

pub mod keys {
    pub const HEADER: &str = "header";
    pub const VERSION: &str = "version";
    pub const STRATEGY: &str = "strategy";
    pub const START_TIME_MS: &str = "start_time_ms";
    pub const END_TIME_MS: &str = "end_time_ms";
    pub const INTERVAL_MS: &str = "interval_ms";
    pub const LIMIT_MS: &str = "limit_ms";
    pub const SAMPLE_COUNT: &str = "sample_count";
    pub const CREATED: &str = "created";

    /// Prefixes for the free-form tool/target metadata
    pub const TOOL_PREFIX: &str = "tool.";
    pub const TARGET_PREFIX: &str = "target.";
}

/// Create all tables (drops existing tables first to ensure clean state)
pub fn create_tables(conn: &Connection) -> rusqlite::Result<()> {
    conn.execute_batch(
        r#"
        DROP TABLE IF EXISTS resources;
        DROP TABLE IF EXISTS frames;
        DROP TABLE IF EXISTS snapshots;
        DROP TABLE IF EXISTS threads;
        DROP TABLE IF EXISTS meta;

        CREATE TABLE meta (
            key TEXT PRIMARY KEY,
            value TEXT NOT NULL
        );

        -- Threads selected at start (target = 1) and any seen only in snapshots
        CREATE TABLE threads (
            id INTEGER PRIMARY KEY,
            name TEXT NOT NULL,
            target INTEGER NOT NULL
        );

        -- One row per thread per cycle; seq keeps capture order within a thread
        CREATE TABLE snapshots (
            id INTEGER PRIMARY KEY,
            thread_id INTEGER NOT NULL,
            seq INTEGER NOT NULL,
            start_ms INTEGER NOT NULL,
            end_ms INTEGER NOT NULL,
            thread_name TEXT NOT NULL,
            state TEXT NOT NULL,
            blocked_count INTEGER NOT NULL,
            blocked_time_ms INTEGER,
            waited_count INTEGER NOT NULL,
            waited_time_ms INTEGER,
            lock_name TEXT,
            lock_owner_id INTEGER,
            lock_owner_name TEXT,
            in_native INTEGER NOT NULL,
            suspended INTEGER NOT NULL,
            UNIQUE(thread_id, seq)
        );

        -- Frames outermost first (depth 0 = thread entry)
        CREATE TABLE frames (
            snapshot_id INTEGER NOT NULL,
            depth INTEGER NOT NULL,
            class_name TEXT NOT NULL,
            method_name TEXT NOT NULL,
            file_name TEXT,
            line_number INTEGER,
            native INTEGER NOT NULL,
            PRIMARY KEY (snapshot_id, depth),
            FOREIGN KEY (snapshot_id) REFERENCES snapshots(id)
        );

        -- Resource counters, phase is 'before' or 'after'
        CREATE TABLE resources (
            thread_id INTEGER NOT NULL,
            phase TEXT NOT NULL,
            thread_name TEXT NOT NULL,
            cpu_time_nanos INTEGER,
            allocated_bytes INTEGER,
            PRIMARY KEY (thread_id, phase)
        );
        "#,
    )
}

/// Set a metadata key
pub fn set_meta(conn: &Connection, key: &str, value: &str) -> rusqlite::Result<()> {
    conn.execute(
        "INSERT OR REPLACE INTO meta (key, value) VALUES (?, ?)",
        [key, value],
    )?;
    Ok(())
}

/// Get a metadata key
pub fn get_meta(conn: &Connection, key: &str) -> rusqlite::Result<Option<String>> {
    conn.query_row("SELECT value FROM meta WHERE key = ?", [key], |row| {
        row.get(0)
    })
    .optional()
}

/// All metadata keys starting with `prefix`, with the prefix stripped
pub fn meta_with_prefix(
    conn: &Connection,
    prefix: &str,
) -> rusqlite::Result<Vec<(String, String)>> {
    let mut stmt = conn.prepare("SELECT key, value FROM meta ORDER BY key")?;
    let rows = stmt.query_map([], |row| Ok((row.get::<_, String>(0)?, row.get::<_, String>(1)?)))?;

    let mut entries = Vec::new();
    for row in rows {
        let (key, value) = row?;
        if let Some(stripped) = key.strip_prefix(prefix) {
            entries.push((stripped.to_string(), value));
        }
    }
    Ok(entries)
}

pub fn table_exists(conn: &Connection, table: &str) -> rusqlite::Result<bool> {
    let count: i64 = conn.query_row(
        "SELECT COUNT(*) FROM sqlite_master WHERE type = 'table' AND name = ?",
        [table],
        |row| row.get(0),
    )?;
    Ok(count > 0)
}

pub trait OptionalExt<T> {
    fn optional(self) -> rusqlite::Result<Option<T>>;
}

impl<T> OptionalExt<T> for rusqlite::Result<T> {
    fn optional(self) -> rusqlite::Result<Option<T>> {
        match self {
            Ok(v) => Ok(Some(v)),
            Err(rusqlite::Error::QueryReturnedNoRows) => Ok(None),
            Err(e) => Err(e),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_create_tables_twice() {
        let conn = Connection::open_in_memory().unwrap();
        create_tables(&conn).unwrap();
        set_meta(&conn, keys::HEADER, HEADER).unwrap();
        create_tables(&conn).unwrap();

        assert_eq!(get_meta(&conn, keys::HEADER).unwrap(), None);
        for table in REQUIRED_TABLES {
            assert!(table_exists(&conn, table).unwrap(), "{table}");
        }
    }

    #[test]
    fn test_meta_prefix() {
        let conn = Connection::open_in_memory().unwrap();
        create_tables(&conn).unwrap();
        set_meta(&conn, "tool.version", "0.1.0").unwrap();
        set_meta(&conn, "target.pid", "42").unwrap();
        set_meta(&conn, "tool.name", "stackrec").unwrap();

        assert_eq!(
            meta_with_prefix(&conn, keys::TOOL_PREFIX).unwrap(),
            vec![
                ("name".to_string(), "stackrec".to_string()),
                ("version".to_string(), "0.1.0".to_string())
            ]
        );
    }
}
