use super::schema::{self, HEADER, OptionalExt, REQUIRED_TABLES, SCHEMA_VERSION, keys};
use crate::error::{Error, Result};
use crate::model::{
    ResourceSample, SampleWindow, StackFrame, ThreadDump, ThreadId, ThreadRef, ThreadSnapshot,
    ThreadState,
};
use crate::recording::{Recording, RecordingBuilder};
use crate::sampler::Strategy;
use rusqlite::{Connection, OpenFlags, Row};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

/// Headline facts of a saved recording, read without loading its samples
#[derive(Debug, Clone)]
pub struct RecordingSummary {
    pub path: PathBuf,
    pub strategy: Strategy,
    pub start_time_ms: i64,
    pub end_time_ms: i64,
    pub sample_count: u64,
    pub thread_count: u64,
    pub process_name: String,
    pub created: String,
}

impl RecordingSummary {
    pub fn duration_secs(&self) -> f64 {
        (self.end_time_ms - self.start_time_ms) as f64 / 1000.0
    }
}

/// Load a full recording. Anything that is not a recording this build can read
/// is reported as [`Error::InvalidRecordFile`] or [`Error::UnsupportedVersion`].
pub fn load_recording(path: &Path) -> Result<Recording> {
    let conn = open_validated(path)?;
    read_recording(&conn).map_err(shape_error)
}

pub fn read_summary(path: &Path) -> Result<RecordingSummary> {
    let conn = open_validated(path)?;
    read_summary_from(&conn, path).map_err(shape_error)
}

/// Open read-only and check header, version and tables
fn open_validated(path: &Path) -> Result<Connection> {
    if !path.is_file() {
        return Err(Error::RecordFileNotFound(path.to_path_buf()));
    }
    let conn = Connection::open_with_flags(
        path,
        OpenFlags::SQLITE_OPEN_READ_ONLY | OpenFlags::SQLITE_OPEN_NO_MUTEX,
    )?;

    let header = schema::get_meta(&conn, keys::HEADER).map_err(|_| {
        Error::InvalidRecordFile(format!("{} is not a recording file", path.display()))
    })?;
    if header.as_deref() != Some(HEADER) {
        return Err(Error::InvalidRecordFile(format!(
            "{} has no recording header",
            path.display()
        )));
    }

    let version: i32 = required_meta(&conn, keys::VERSION)?;
    if version > SCHEMA_VERSION {
        return Err(Error::UnsupportedVersion {
            found: version,
            supported: SCHEMA_VERSION,
        });
    }

    for table in REQUIRED_TABLES {
        if !schema::table_exists(&conn, table)? {
            return Err(Error::InvalidRecordFile(format!("missing table '{}'", table)));
        }
    }
    Ok(conn)
}

/// Database errors past validation mean the file has the wrong shape
fn shape_error(e: Error) -> Error {
    match e {
        Error::Database(err) => Error::InvalidRecordFile(err.to_string()),
        other => other,
    }
}

fn required_meta<T: std::str::FromStr>(conn: &Connection, key: &str) -> Result<T> {
    let raw = schema::get_meta(conn, key)?
        .ok_or_else(|| Error::InvalidRecordFile(format!("missing meta key '{}'", key)))?;
    raw.parse()
        .map_err(|_| Error::InvalidRecordFile(format!("bad value '{}' for meta key '{}'", raw, key)))
}

fn read_recording(conn: &Connection) -> Result<Recording> {
    let strategy: Strategy = required_meta(conn, keys::STRATEGY)?;
    let start_ms: i64 = required_meta(conn, keys::START_TIME_MS)?;

    let mut builder = RecordingBuilder::new(strategy, start_ms);
    builder
        .interval_ms(required_meta(conn, keys::INTERVAL_MS)?)
        .limit_ms(required_meta(conn, keys::LIMIT_MS)?)
        .sample_count(required_meta(conn, keys::SAMPLE_COUNT)?)
        .tool_info(meta_map(conn, keys::TOOL_PREFIX)?)
        .target_info(meta_map(conn, keys::TARGET_PREFIX)?)
        .targets(read_targets(conn)?);

    for snapshot in read_snapshots(conn)? {
        builder.push_snapshot(snapshot);
    }
    for (phase, sample) in read_resources(conn)? {
        match phase.as_str() {
            "before" => builder.resource_before(sample),
            "after" => builder.resource_after(sample),
            other => {
                return Err(Error::InvalidRecordFile(format!(
                    "unknown resource phase '{}'",
                    other
                )));
            }
        };
    }

    Ok(builder.build(required_meta(conn, keys::END_TIME_MS)?))
}

fn meta_map(conn: &Connection, prefix: &str) -> Result<BTreeMap<String, String>> {
    Ok(schema::meta_with_prefix(conn, prefix)?.into_iter().collect())
}

fn read_targets(conn: &Connection) -> Result<Vec<ThreadRef>> {
    let mut stmt = conn.prepare("SELECT id, name FROM threads WHERE target = 1 ORDER BY id")?;
    let rows = stmt.query_map([], |row| {
        Ok(ThreadRef {
            id: ThreadId(row.get::<_, i64>(0)? as u64),
            name: row.get(1)?,
        })
    })?;
    Ok(rows.collect::<rusqlite::Result<_>>()?)
}

fn read_snapshots(conn: &Connection) -> Result<Vec<ThreadSnapshot>> {
    let mut frames = read_frames(conn)?;

    let mut stmt = conn.prepare(
        "SELECT id, thread_id, start_ms, end_ms, thread_name, state,
                blocked_count, blocked_time_ms, waited_count, waited_time_ms,
                lock_name, lock_owner_id, lock_owner_name, in_native, suspended
         FROM snapshots ORDER BY thread_id, seq",
    )?;
    let rows = stmt.query_map([], |row| {
        let id: i64 = row.get(0)?;
        Ok((id, snapshot_from_row(row)?))
    })?;

    let mut snapshots = Vec::new();
    for row in rows {
        let (id, mut snapshot) = row?;
        snapshot.dump.frames = frames.remove(&id).unwrap_or_default();
        snapshots.push(snapshot);
    }
    Ok(snapshots)
}

fn snapshot_from_row(row: &Row<'_>) -> rusqlite::Result<ThreadSnapshot> {
    let state: String = row.get(5)?;
    let mut dump = ThreadDump::new(
        ThreadId(row.get::<_, i64>(1)? as u64),
        row.get::<_, String>(4)?,
        state.parse::<ThreadState>().unwrap_or_else(|never| match never {}),
    );
    dump.blocked_count = row.get::<_, i64>(6)? as u64;
    dump.blocked_time_ms = row.get::<_, Option<i64>>(7)?.map(|v| v as u64);
    dump.waited_count = row.get::<_, i64>(8)? as u64;
    dump.waited_time_ms = row.get::<_, Option<i64>>(9)?.map(|v| v as u64);
    dump.lock_name = row.get(10)?;
    dump.lock_owner_id = row.get::<_, Option<i64>>(11)?.map(|v| ThreadId(v as u64));
    dump.lock_owner_name = row.get(12)?;
    dump.in_native = row.get(13)?;
    dump.suspended = row.get(14)?;

    Ok(ThreadSnapshot::new(
        dump,
        SampleWindow::new(row.get(2)?, row.get(3)?),
    ))
}

/// Frames grouped by snapshot id, outermost first
fn read_frames(conn: &Connection) -> Result<BTreeMap<i64, Vec<StackFrame>>> {
    let mut stmt = conn.prepare(
        "SELECT snapshot_id, class_name, method_name, file_name, line_number, native
         FROM frames ORDER BY snapshot_id, depth",
    )?;
    let rows = stmt.query_map([], |row| {
        let frame = StackFrame {
            class_name: row.get(1)?,
            method_name: row.get(2)?,
            file_name: row.get(3)?,
            line_number: row.get(4)?,
            native: row.get(5)?,
        };
        Ok((row.get::<_, i64>(0)?, frame))
    })?;

    let mut frames: BTreeMap<i64, Vec<StackFrame>> = BTreeMap::new();
    for row in rows {
        let (snapshot_id, frame) = row?;
        frames.entry(snapshot_id).or_default().push(frame);
    }
    Ok(frames)
}

fn read_resources(conn: &Connection) -> Result<Vec<(String, ResourceSample)>> {
    // 'after' sorts before 'before'; openings must be applied first
    let mut stmt = conn.prepare(
        "SELECT phase, thread_id, thread_name, cpu_time_nanos, allocated_bytes
         FROM resources ORDER BY phase = 'after', thread_id",
    )?;
    let rows = stmt.query_map([], |row| {
        Ok((
            row.get::<_, String>(0)?,
            ResourceSample {
                thread_id: ThreadId(row.get::<_, i64>(1)? as u64),
                thread_name: row.get(2)?,
                cpu_time_nanos: row.get::<_, Option<i64>>(3)?.map(|v| v as u64),
                allocated_bytes: row.get::<_, Option<i64>>(4)?.map(|v| v as u64),
            },
        ))
    })?;
    Ok(rows.collect::<rusqlite::Result<_>>()?)
}

fn read_summary_from(conn: &Connection, path: &Path) -> Result<RecordingSummary> {
    let thread_count: i64 = conn.query_row("SELECT COUNT(*) FROM threads", [], |row| row.get(0))?;
    let process_name = schema::get_meta(conn, &format!("{}process_name", keys::TARGET_PREFIX))?
        .unwrap_or_else(|| "unknown".to_string());
    let created = conn
        .query_row(
            "SELECT value FROM meta WHERE key = ?",
            [keys::CREATED],
            |row| row.get::<_, String>(0),
        )
        .optional()?
        .unwrap_or_else(|| "unknown".to_string());

    Ok(RecordingSummary {
        path: path.to_path_buf(),
        strategy: required_meta(conn, keys::STRATEGY)?,
        start_time_ms: required_meta(conn, keys::START_TIME_MS)?,
        end_time_ms: required_meta(conn, keys::END_TIME_MS)?,
        sample_count: required_meta(conn, keys::SAMPLE_COUNT)?,
        thread_count: thread_count as u64,
        process_name,
        created,
    })
}
