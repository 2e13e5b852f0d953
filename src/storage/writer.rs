use super::schema::{self, HEADER, SCHEMA_VERSION, keys};
use crate::error::Result;
use crate::model::{ResourceSample, ThreadSnapshot};
use crate::recording::Recording;
use log::debug;
use rusqlite::{Connection, Transaction, params};
use std::fs;
use std::path::{Path, PathBuf};

/// Write `recording` to `path`, replacing any existing file.
///
/// The database is built next to the destination and renamed into place, so a
/// failed write never leaves a half-written recording behind.
pub fn save_recording(path: &Path, recording: &Recording) -> Result<()> {
    let staging = staging_path(path);
    if staging.exists() {
        fs::remove_file(&staging)?;
    }

    let written = write_database(&staging, recording);
    if let Err(e) = written {
        let _ = fs::remove_file(&staging);
        return Err(e);
    }

    fs::rename(&staging, path)?;
    debug!("Saved recording to {}", path.display());
    Ok(())
}

fn staging_path(path: &Path) -> PathBuf {
    let mut name = path.file_name().unwrap_or_default().to_os_string();
    name.push(".partial");
    path.with_file_name(name)
}

fn write_database(path: &Path, recording: &Recording) -> Result<()> {
    let mut conn = Connection::open(path)?;
    conn.execute_batch(
        "PRAGMA journal_mode = DELETE;
         PRAGMA synchronous = NORMAL;",
    )?;

    schema::create_tables(&conn)?;

    let tx = conn.transaction()?;
    write_meta(&tx, recording)?;
    write_threads(&tx, recording)?;
    for list in recording.all_snapshots().values() {
        for (seq, snapshot) in list.iter().enumerate() {
            write_snapshot(&tx, seq, snapshot)?;
        }
    }
    for usage in recording.resources().values() {
        write_resource(&tx, "before", &usage.before)?;
        if let Some(after) = &usage.after {
            write_resource(&tx, "after", after)?;
        }
    }
    tx.commit()?;

    conn.close().map_err(|(_, e)| e)?;
    Ok(())
}

fn write_meta(tx: &Transaction<'_>, recording: &Recording) -> Result<()> {
    let entries = [
        (keys::HEADER, HEADER.to_string()),
        (keys::VERSION, SCHEMA_VERSION.to_string()),
        (keys::STRATEGY, recording.strategy().to_string()),
        (keys::START_TIME_MS, recording.start_time_ms().to_string()),
        (keys::END_TIME_MS, recording.end_time_ms().to_string()),
        (keys::INTERVAL_MS, recording.interval_ms().to_string()),
        (keys::LIMIT_MS, recording.limit_ms().to_string()),
        (keys::SAMPLE_COUNT, recording.sample_count().to_string()),
        (keys::CREATED, chrono::Utc::now().to_rfc3339()),
    ];
    for (key, value) in entries {
        schema::set_meta(tx, key, &value)?;
    }

    for (prefix, info) in [
        (keys::TOOL_PREFIX, recording.tool_info()),
        (keys::TARGET_PREFIX, recording.target_info()),
    ] {
        for (key, value) in info {
            schema::set_meta(tx, &format!("{}{}", prefix, key), value)?;
        }
    }
    Ok(())
}

fn write_threads(tx: &Transaction<'_>, recording: &Recording) -> Result<()> {
    let mut stmt = tx.prepare_cached("INSERT INTO threads (id, name, target) VALUES (?, ?, ?)")?;
    for thread in recording.thread_refs() {
        let is_target = recording.targets().iter().any(|t| t.id == thread.id);
        stmt.execute(params![thread.id.0 as i64, thread.name, is_target])?;
    }
    Ok(())
}

fn write_snapshot(tx: &Transaction<'_>, seq: usize, snapshot: &ThreadSnapshot) -> Result<()> {
    let dump = &snapshot.dump;
    tx.prepare_cached(
        "INSERT INTO snapshots (thread_id, seq, start_ms, end_ms, thread_name, state,
            blocked_count, blocked_time_ms, waited_count, waited_time_ms,
            lock_name, lock_owner_id, lock_owner_name, in_native, suspended)
         VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)",
    )?
    .execute(params![
        dump.thread_id.0 as i64,
        seq as i64,
        snapshot.window.start_ms,
        snapshot.window.end_ms,
        dump.thread_name,
        dump.state.as_str(),
        dump.blocked_count as i64,
        dump.blocked_time_ms.map(|v| v as i64),
        dump.waited_count as i64,
        dump.waited_time_ms.map(|v| v as i64),
        dump.lock_name,
        dump.lock_owner_id.map(|id| id.0 as i64),
        dump.lock_owner_name,
        dump.in_native,
        dump.suspended,
    ])?;
    let snapshot_id = tx.last_insert_rowid();

    let mut stmt = tx.prepare_cached(
        "INSERT INTO frames (snapshot_id, depth, class_name, method_name, file_name, line_number, native)
         VALUES (?, ?, ?, ?, ?, ?, ?)",
    )?;
    for (depth, frame) in dump.frames.iter().enumerate() {
        stmt.execute(params![
            snapshot_id,
            depth as i64,
            frame.class_name,
            frame.method_name,
            frame.file_name,
            frame.line_number,
            frame.native,
        ])?;
    }
    Ok(())
}

fn write_resource(tx: &Transaction<'_>, phase: &str, sample: &ResourceSample) -> Result<()> {
    tx.prepare_cached(
        "INSERT INTO resources (thread_id, phase, thread_name, cpu_time_nanos, allocated_bytes)
         VALUES (?, ?, ?, ?, ?)",
    )?
    .execute(params![
        sample.thread_id.0 as i64,
        phase,
        sample.thread_name,
        sample.cpu_time_nanos.map(|v| v as i64),
        sample.allocated_bytes.map(|v| v as i64),
    ])?;
    Ok(())
}
