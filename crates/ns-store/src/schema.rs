use rusqlite::Connection;

use crate::error::Result;

pub const SCHEMA_VERSION: i64 = 1;

pub fn initialize(conn: &Connection) -> Result<()> {
    conn.execute_batch("PRAGMA journal_mode = WAL;")?;
    conn.execute_batch("PRAGMA foreign_keys = ON;")?;
    conn.pragma_update(None, "busy_timeout", 5000)?;
    conn.pragma_update(None, "wal_autocheckpoint", 100)?;

    // Fold a WAL left behind by a crashed run into the main file. Fails on
    // in-memory and fresh databases, which is fine.
    if conn
        .execute_batch("PRAGMA wal_checkpoint(TRUNCATE);")
        .is_ok()
    {
        tracing::debug!("startup WAL checkpoint complete");
    }

    // Signals are immutable and shared between runs; everything else is
    // keyed by the run that produced it. Classification columns are plain
    // text so unknown values from older writers load with fallbacks.
    conn.execute_batch(
        "
        CREATE TABLE IF NOT EXISTS metadata (
            key   TEXT PRIMARY KEY,
            value TEXT NOT NULL
        );

        CREATE TABLE IF NOT EXISTS runs (
            id          TEXT PRIMARY KEY,
            mode        TEXT NOT NULL DEFAULT 'initial',
            started_at  TEXT NOT NULL DEFAULT '',
            finished_at TEXT NOT NULL DEFAULT '',
            status      TEXT NOT NULL DEFAULT 'success',
            report      TEXT NOT NULL DEFAULT '{}'
        );

        CREATE TABLE IF NOT EXISTS signals (
            id               TEXT PRIMARY KEY,
            text             TEXT NOT NULL,
            generalized_text TEXT,
            dimension        TEXT,
            stance           TEXT,
            importance       TEXT,
            source_category  TEXT,
            source_file      TEXT NOT NULL DEFAULT '',
            elicitation      TEXT,
            extracted_at     TEXT NOT NULL DEFAULT '',
            content_hash     TEXT NOT NULL DEFAULT ''
        );

        CREATE TABLE IF NOT EXISTS run_signals (
            run_id    TEXT NOT NULL REFERENCES runs(id) ON DELETE CASCADE,
            signal_id TEXT NOT NULL REFERENCES signals(id),
            position  INTEGER NOT NULL,
            PRIMARY KEY (run_id, signal_id)
        );

        CREATE TABLE IF NOT EXISTS principles (
            run_id                TEXT NOT NULL REFERENCES runs(id) ON DELETE CASCADE,
            id                    TEXT NOT NULL,
            position              INTEGER NOT NULL,
            representative_text   TEXT NOT NULL,
            representative_signal TEXT NOT NULL,
            representative_weight REAL NOT NULL DEFAULT 0,
            dimension             TEXT,
            n_count               INTEGER NOT NULL DEFAULT 0,
            centrality            TEXT,
            weight                REAL NOT NULL DEFAULT 0,
            created_at            TEXT NOT NULL DEFAULT '',
            PRIMARY KEY (run_id, id)
        );

        CREATE TABLE IF NOT EXISTS principle_signals (
            run_id          TEXT NOT NULL REFERENCES runs(id) ON DELETE CASCADE,
            principle_id    TEXT NOT NULL,
            signal_id       TEXT NOT NULL,
            position        INTEGER NOT NULL,
            source_category TEXT,
            stance          TEXT,
            importance      TEXT,
            elicitation     TEXT,
            weight          REAL NOT NULL DEFAULT 0,
            similarity      REAL NOT NULL DEFAULT 0,
            PRIMARY KEY (run_id, principle_id, signal_id)
        );

        CREATE TABLE IF NOT EXISTS axioms (
            run_id       TEXT NOT NULL REFERENCES runs(id) ON DELETE CASCADE,
            id           TEXT NOT NULL,
            position     INTEGER NOT NULL,
            native       TEXT NOT NULL,
            cjk          TEXT,
            emoji        TEXT,
            math         TEXT,
            dimension    TEXT,
            centrality   TEXT,
            n_count      INTEGER NOT NULL DEFAULT 0,
            weight       REAL NOT NULL DEFAULT 0,
            derived_from TEXT NOT NULL DEFAULT '{}',
            provenance   TEXT NOT NULL DEFAULT '{}',
            tensions     TEXT NOT NULL DEFAULT '[]',
            blocked      INTEGER NOT NULL DEFAULT 0,
            block_reason TEXT,
            created_at   TEXT NOT NULL DEFAULT '',
            PRIMARY KEY (run_id, id)
        );

        CREATE TABLE IF NOT EXISTS tensions (
            run_id      TEXT NOT NULL REFERENCES runs(id) ON DELETE CASCADE,
            id          TEXT NOT NULL,
            principle_a TEXT NOT NULL,
            principle_b TEXT NOT NULL,
            severity    TEXT,
            description TEXT,
            detected_at TEXT NOT NULL DEFAULT '',
            PRIMARY KEY (run_id, id)
        );

        CREATE INDEX IF NOT EXISTS idx_signals_hash ON signals(content_hash);
        CREATE INDEX IF NOT EXISTS idx_psig_principle ON principle_signals(run_id, principle_id);
        ",
    )?;

    conn.execute(
        "INSERT OR REPLACE INTO metadata (key, value) VALUES ('schema_version', ?1)",
        [SCHEMA_VERSION.to_string()],
    )?;

    Ok(())
}

pub fn get_schema_version(conn: &Connection) -> Result<Option<i64>> {
    let mut stmt = conn.prepare("SELECT value FROM metadata WHERE key = 'schema_version'")?;
    let version = stmt
        .query_row([], |row| {
            let v: String = row.get(0)?;
            Ok(v.parse::<i64>().unwrap_or(0))
        })
        .ok();
    Ok(version)
}
