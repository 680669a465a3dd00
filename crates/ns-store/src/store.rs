use std::collections::{HashMap, HashSet};
use std::path::Path;
use std::sync::atomic::{AtomicUsize, Ordering};

use rusqlite::{Connection, OptionalExtension, params};
use uuid::Uuid;

use ns_core::axiom::DerivedFrom;
use ns_core::time::canonicalize_or_epoch;
use ns_core::tokenizer::content_hash;
use ns_core::{
    Axiom, BlockReason, CanonicalForms, Centrality, Dimension, Elicitation, Importance, Principle,
    RunArtifacts, RunReport, Severity, Signal, SignalRef, SourceCategory, Stance, Tension,
};
use ns_core::{ProvenanceSummary, signal::Provenance};

use crate::error::{Result, StoreError};
use crate::schema;

/// One workspace's `soul.db`: run artifacts keyed by run id.
pub struct SoulDb {
    conn: Connection,
    /// Rows dropped as malformed by loads, until taken.
    skipped: AtomicUsize,
}

impl SoulDb {
    pub fn open(path: &Path) -> Result<Self> {
        let conn = Connection::open(path)?;
        schema::initialize(&conn)?;
        Ok(Self {
            conn,
            skipped: AtomicUsize::new(0),
        })
    }

    pub fn open_in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory()?;
        schema::initialize(&conn)?;
        Ok(Self {
            conn,
            skipped: AtomicUsize::new(0),
        })
    }

    pub fn conn(&self) -> &Connection {
        &self.conn
    }

    /// Malformed rows skipped by loads since the previous call.
    pub fn take_skipped(&self) -> usize {
        self.skipped.swap(0, Ordering::Relaxed)
    }

    fn skip(&self, n: usize) {
        self.skipped.fetch_add(n, Ordering::Relaxed);
    }

    // --- Metadata ---

    pub fn get_metadata(&self, key: &str) -> Result<Option<String>> {
        let value = self
            .conn
            .query_row("SELECT value FROM metadata WHERE key = ?1", [key], |row| {
                row.get(0)
            })
            .optional()?;
        Ok(value)
    }

    pub fn set_metadata(&self, key: &str, value: &str) -> Result<()> {
        self.conn.execute(
            "INSERT OR REPLACE INTO metadata (key, value) VALUES (?1, ?2)",
            params![key, value],
        )?;
        Ok(())
    }

    // --- Save ---

    /// Every artifact of one run, in one transaction.
    pub fn save_run(&self, run: &RunArtifacts) -> Result<()> {
        let tx = self.conn.unchecked_transaction()?;
        upsert_run_on(&tx, run.run_id, &run.report)?;
        save_signals_on(&tx, run.run_id, &run.signals)?;
        save_principles_on(&tx, run.run_id, &run.principles)?;
        save_axioms_on(&tx, run.run_id, &run.axioms)?;
        save_tensions_on(&tx, run.run_id, &run.tensions)?;
        tx.commit()?;
        tracing::debug!(
            run_id = %run.run_id,
            signals = run.signals.len(),
            principles = run.principles.len(),
            axioms = run.axioms.len(),
            "run artifacts written"
        );
        Ok(())
    }

    pub fn save_report(&self, report: &RunReport) -> Result<()> {
        upsert_run_on(&self.conn, report.run_id, report)
    }

    pub fn save_signals(&self, run_id: Uuid, signals: &[Signal]) -> Result<()> {
        let tx = self.conn.unchecked_transaction()?;
        ensure_run_on(&tx, run_id)?;
        save_signals_on(&tx, run_id, signals)?;
        tx.commit()?;
        Ok(())
    }

    pub fn save_principles(&self, run_id: Uuid, principles: &[Principle]) -> Result<()> {
        let tx = self.conn.unchecked_transaction()?;
        ensure_run_on(&tx, run_id)?;
        save_principles_on(&tx, run_id, principles)?;
        tx.commit()?;
        Ok(())
    }

    pub fn save_axioms(&self, run_id: Uuid, axioms: &[Axiom]) -> Result<()> {
        let tx = self.conn.unchecked_transaction()?;
        ensure_run_on(&tx, run_id)?;
        save_axioms_on(&tx, run_id, axioms)?;
        tx.commit()?;
        Ok(())
    }

    pub fn save_tensions(&self, run_id: Uuid, tensions: &[Tension]) -> Result<()> {
        let tx = self.conn.unchecked_transaction()?;
        ensure_run_on(&tx, run_id)?;
        save_tensions_on(&tx, run_id, tensions)?;
        tx.commit()?;
        Ok(())
    }

    // --- Load ---

    pub fn run_ids(&self) -> Result<Vec<Uuid>> {
        let mut stmt = self.conn.prepare("SELECT id FROM runs ORDER BY rowid")?;
        let ids: Vec<String> = stmt
            .query_map([], |row| row.get(0))?
            .collect::<std::result::Result<_, _>>()?;
        ids.iter().map(|s| parse_uuid(s)).collect()
    }

    pub fn load_report(&self, run_id: Uuid) -> Result<Option<RunReport>> {
        let json: Option<String> = self
            .conn
            .query_row(
                "SELECT report FROM runs WHERE id = ?1",
                [run_id.to_string()],
                |row| row.get(0),
            )
            .optional()?;
        let Some(json) = json else {
            return Ok(None);
        };
        match serde_json::from_str::<RunReport>(&json) {
            Ok(mut report) => {
                report.run_id = run_id;
                report.started_at = canonicalize_or_epoch(&report.started_at);
                report.finished_at = canonicalize_or_epoch(&report.finished_at);
                Ok(Some(report))
            }
            Err(e) => {
                tracing::warn!(%run_id, "unreadable run report: {e}");
                Ok(None)
            }
        }
    }

    pub fn load_signals(&self, run_id: Uuid) -> Result<Vec<Signal>> {
        let mut stmt = self.conn.prepare(
            "SELECT s.id, s.text, s.generalized_text, s.dimension, s.stance, s.importance,
                    s.source_category, s.source_file, s.elicitation, s.extracted_at, s.content_hash
             FROM run_signals rs JOIN signals s ON s.id = rs.signal_id
             WHERE rs.run_id = ?1 ORDER BY rs.position",
        )?;
        let rows: Vec<SignalRow> = stmt
            .query_map([run_id.to_string()], |row| {
                Ok(SignalRow {
                    id: row.get(0)?,
                    text: row.get(1)?,
                    generalized_text: row.get(2)?,
                    dimension: row.get(3)?,
                    stance: row.get(4)?,
                    importance: row.get(5)?,
                    source_category: row.get(6)?,
                    source_file: row.get(7)?,
                    elicitation: row.get(8)?,
                    extracted_at: row.get(9)?,
                    content_hash: row.get(10)?,
                })
            })?
            .collect::<std::result::Result<_, _>>()?;

        let total = rows.len();
        let signals: Vec<Signal> = rows.into_iter().filter_map(SignalRow::into_signal).collect();
        self.skip(total - signals.len());
        Ok(signals)
    }

    pub fn load_principles(&self, run_id: Uuid) -> Result<Vec<Principle>> {
        let mut members = self.load_principle_members(run_id)?;

        let mut stmt = self.conn.prepare(
            "SELECT id, representative_text, representative_signal, representative_weight,
                    dimension, n_count, centrality, weight, created_at
             FROM principles WHERE run_id = ?1 ORDER BY position",
        )?;
        let rows: Vec<PrincipleRow> = stmt
            .query_map([run_id.to_string()], |row| {
                Ok(PrincipleRow {
                    id: row.get(0)?,
                    representative_text: row.get(1)?,
                    representative_signal: row.get(2)?,
                    representative_weight: row.get(3)?,
                    dimension: row.get(4)?,
                    n_count: row.get(5)?,
                    centrality: row.get(6)?,
                    weight: row.get(7)?,
                    created_at: row.get(8)?,
                })
            })?
            .collect::<std::result::Result<_, _>>()?;

        let mut principles = Vec::with_capacity(rows.len());
        for row in rows {
            let (Ok(id), Ok(representative_signal)) =
                (parse_uuid(&row.id), parse_uuid(&row.representative_signal))
            else {
                tracing::warn!(%run_id, principle = row.id, "skipping principle with malformed id");
                self.skip(1);
                continue;
            };
            principles.push(Principle {
                id,
                representative_text: row.representative_text,
                representative_signal,
                representative_weight: row.representative_weight,
                dimension: lossy(&row.dimension, Dimension::from_str_lossy),
                n_count: row.n_count.max(0) as usize,
                centrality: lossy(&row.centrality, Centrality::from_str_lossy),
                weight: row.weight,
                derived_from: members.remove(&id).unwrap_or_default(),
                created_at: canonicalize_or_epoch(&row.created_at),
            });
        }
        Ok(principles)
    }

    fn load_principle_members(&self, run_id: Uuid) -> Result<HashMap<Uuid, Vec<SignalRef>>> {
        let mut stmt = self.conn.prepare(
            "SELECT principle_id, signal_id, source_category, stance, importance, elicitation,
                    weight, similarity
             FROM principle_signals WHERE run_id = ?1 ORDER BY principle_id, position",
        )?;
        type MemberRow = (
            String,
            String,
            Option<String>,
            Option<String>,
            Option<String>,
            Option<String>,
            f64,
            f64,
        );
        let rows: Vec<MemberRow> = stmt
            .query_map([run_id.to_string()], |row| {
                Ok((
                    row.get(0)?,
                    row.get(1)?,
                    row.get(2)?,
                    row.get(3)?,
                    row.get(4)?,
                    row.get(5)?,
                    row.get(6)?,
                    row.get(7)?,
                ))
            })?
            .collect::<std::result::Result<_, _>>()?;

        let mut members: HashMap<Uuid, Vec<SignalRef>> = HashMap::new();
        for (principle_id, signal_id, category, stance, importance, elicitation, weight, sim) in
            rows
        {
            let (Ok(principle_id), Ok(id)) = (parse_uuid(&principle_id), parse_uuid(&signal_id))
            else {
                tracing::warn!(%run_id, "skipping principle member with malformed id");
                self.skip(1);
                continue;
            };
            members.entry(principle_id).or_default().push(SignalRef {
                id,
                source_category: lossy(&category, SourceCategory::from_str_lossy),
                stance: lossy(&stance, Stance::from_str_lossy),
                importance: lossy(&importance, Importance::from_str_lossy),
                elicitation: lossy(&elicitation, Elicitation::from_str_lossy),
                weight,
                similarity: sim,
            });
        }
        Ok(members)
    }

    pub fn load_axioms(&self, run_id: Uuid) -> Result<Vec<Axiom>> {
        let mut stmt = self.conn.prepare(
            "SELECT id, native, cjk, emoji, math, dimension, centrality, n_count, weight,
                    derived_from, provenance, tensions, blocked, block_reason, created_at
             FROM axioms WHERE run_id = ?1 ORDER BY position",
        )?;
        let rows: Vec<AxiomRow> = stmt
            .query_map([run_id.to_string()], |row| {
                Ok(AxiomRow {
                    id: row.get(0)?,
                    native: row.get(1)?,
                    cjk: row.get(2)?,
                    emoji: row.get(3)?,
                    math: row.get(4)?,
                    dimension: row.get(5)?,
                    centrality: row.get(6)?,
                    n_count: row.get(7)?,
                    weight: row.get(8)?,
                    derived_from: row.get(9)?,
                    provenance: row.get(10)?,
                    tensions: row.get(11)?,
                    blocked: row.get::<_, i64>(12)? != 0,
                    block_reason: row.get(13)?,
                    created_at: row.get(14)?,
                })
            })?
            .collect::<std::result::Result<_, _>>()?;

        let total = rows.len();
        let axioms: Vec<Axiom> = rows
            .into_iter()
            .filter_map(|row| row.into_axiom(run_id))
            .collect();
        self.skip(total - axioms.len());
        Ok(axioms)
    }

    pub fn load_tensions(&self, run_id: Uuid) -> Result<Vec<Tension>> {
        let mut stmt = self.conn.prepare(
            "SELECT id, principle_a, principle_b, severity, description, detected_at
             FROM tensions WHERE run_id = ?1 ORDER BY rowid",
        )?;
        type TensionRow = (String, String, String, Option<String>, Option<String>, String);
        let rows: Vec<TensionRow> = stmt
            .query_map([run_id.to_string()], |row| {
                Ok((
                    row.get(0)?,
                    row.get(1)?,
                    row.get(2)?,
                    row.get(3)?,
                    row.get(4)?,
                    row.get(5)?,
                ))
            })?
            .collect::<std::result::Result<_, _>>()?;

        let mut tensions = Vec::with_capacity(rows.len());
        for (id, a, b, severity, description, detected_at) in rows {
            let (Ok(id), Ok(principle_a), Ok(principle_b)) =
                (parse_uuid(&id), parse_uuid(&a), parse_uuid(&b))
            else {
                tracing::warn!(%run_id, "skipping tension with malformed id");
                self.skip(1);
                continue;
            };
            tensions.push(Tension {
                id,
                principle_a,
                principle_b,
                severity: lossy(&severity, Severity::from_str_lossy),
                description,
                detected_at: canonicalize_or_epoch(&detected_at),
            });
        }
        Ok(tensions)
    }

    // --- Retention ---

    /// Delete every run not in `keep`, then signals no remaining run uses.
    /// Returns the number of runs removed.
    pub fn prune_runs(&self, keep: &[Uuid]) -> Result<usize> {
        let keep: HashSet<Uuid> = keep.iter().copied().collect();
        let stale: Vec<Uuid> = self
            .run_ids()?
            .into_iter()
            .filter(|id| !keep.contains(id))
            .collect();
        if stale.is_empty() {
            return Ok(0);
        }

        let tx = self.conn.unchecked_transaction()?;
        for id in &stale {
            tx.execute("DELETE FROM runs WHERE id = ?1", [id.to_string()])?;
        }
        let orphans = tx.execute(
            "DELETE FROM signals WHERE id NOT IN (SELECT signal_id FROM run_signals)",
            [],
        )?;
        tx.commit()?;
        tracing::debug!(runs = stale.len(), signals = orphans, "pruned old runs");
        Ok(stale.len())
    }
}

fn ensure_run_on(conn: &Connection, run_id: Uuid) -> Result<()> {
    conn.execute(
        "INSERT OR IGNORE INTO runs (id) VALUES (?1)",
        [run_id.to_string()],
    )?;
    Ok(())
}

// Upsert rather than replace: REPLACE would delete the row and cascade to
// everything already written for the run.
fn upsert_run_on(conn: &Connection, run_id: Uuid, report: &RunReport) -> Result<()> {
    conn.execute(
        "INSERT INTO runs (id, mode, started_at, finished_at, status, report)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6)
         ON CONFLICT(id) DO UPDATE SET
             mode = excluded.mode,
             started_at = excluded.started_at,
             finished_at = excluded.finished_at,
             status = excluded.status,
             report = excluded.report",
        params![
            run_id.to_string(),
            report.mode.as_str(),
            report.started_at,
            report.finished_at,
            report.status.as_str(),
            serde_json::to_string(report)?,
        ],
    )?;
    Ok(())
}

fn save_signals_on(conn: &Connection, run_id: Uuid, signals: &[Signal]) -> Result<()> {
    let run = run_id.to_string();
    conn.execute("DELETE FROM run_signals WHERE run_id = ?1", [&run])?;

    let mut insert = conn.prepare(
        "INSERT OR IGNORE INTO signals (id, text, generalized_text, dimension, stance, importance,
             source_category, source_file, elicitation, extracted_at, content_hash)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11)",
    )?;
    let mut link = conn.prepare(
        "INSERT OR IGNORE INTO run_signals (run_id, signal_id, position) VALUES (?1, ?2, ?3)",
    )?;
    for (position, s) in signals.iter().enumerate() {
        let id = s.id.to_string();
        insert.execute(params![
            id,
            s.text,
            s.generalized_text,
            s.dimension.as_str(),
            s.stance.as_str(),
            s.importance.as_str(),
            s.provenance.source_category.as_str(),
            s.provenance.source_file,
            s.provenance.elicitation.as_str(),
            s.provenance.extracted_at,
            s.content_hash,
        ])?;
        link.execute(params![run, id, position as i64])?;
    }
    Ok(())
}

fn save_principles_on(conn: &Connection, run_id: Uuid, principles: &[Principle]) -> Result<()> {
    let run = run_id.to_string();
    conn.execute("DELETE FROM principles WHERE run_id = ?1", [&run])?;
    conn.execute("DELETE FROM principle_signals WHERE run_id = ?1", [&run])?;

    let mut insert = conn.prepare(
        "INSERT INTO principles (run_id, id, position, representative_text, representative_signal,
             representative_weight, dimension, n_count, centrality, weight, created_at)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11)",
    )?;
    let mut member = conn.prepare(
        "INSERT OR IGNORE INTO principle_signals (run_id, principle_id, signal_id, position,
             source_category, stance, importance, elicitation, weight, similarity)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)",
    )?;
    for (position, p) in principles.iter().enumerate() {
        let id = p.id.to_string();
        insert.execute(params![
            run,
            id,
            position as i64,
            p.representative_text,
            p.representative_signal.to_string(),
            p.representative_weight,
            p.dimension.as_str(),
            p.n_count as i64,
            p.centrality.as_str(),
            p.weight,
            p.created_at,
        ])?;
        for (i, m) in p.derived_from.iter().enumerate() {
            member.execute(params![
                run,
                id,
                m.id.to_string(),
                i as i64,
                m.source_category.as_str(),
                m.stance.as_str(),
                m.importance.as_str(),
                m.elicitation.as_str(),
                m.weight,
                m.similarity,
            ])?;
        }
    }
    Ok(())
}

fn save_axioms_on(conn: &Connection, run_id: Uuid, axioms: &[Axiom]) -> Result<()> {
    let run = run_id.to_string();
    conn.execute("DELETE FROM axioms WHERE run_id = ?1", [&run])?;

    let mut insert = conn.prepare(
        "INSERT INTO axioms (run_id, id, position, native, cjk, emoji, math, dimension, centrality,
             n_count, weight, derived_from, provenance, tensions, blocked, block_reason, created_at)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, ?15, ?16, ?17)",
    )?;
    for (position, a) in axioms.iter().enumerate() {
        insert.execute(params![
            run,
            a.id.to_string(),
            position as i64,
            a.canonical_forms.native,
            a.canonical_forms.cjk,
            a.canonical_forms.emoji,
            a.canonical_forms.math,
            a.dimension.as_str(),
            a.centrality.as_str(),
            a.n_count as i64,
            a.weight,
            serde_json::to_string(&a.derived_from)?,
            serde_json::to_string(&a.provenance)?,
            serde_json::to_string(&a.tensions)?,
            a.blocked as i32,
            a.block_reason.map(|r| r.as_str()),
            a.created_at,
        ])?;
    }
    Ok(())
}

fn save_tensions_on(conn: &Connection, run_id: Uuid, tensions: &[Tension]) -> Result<()> {
    let run = run_id.to_string();
    conn.execute("DELETE FROM tensions WHERE run_id = ?1", [&run])?;

    let mut insert = conn.prepare(
        "INSERT OR IGNORE INTO tensions (run_id, id, principle_a, principle_b, severity,
             description, detected_at)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
    )?;
    for t in tensions {
        insert.execute(params![
            run,
            t.id.to_string(),
            t.principle_a.to_string(),
            t.principle_b.to_string(),
            t.severity.as_str(),
            t.description,
            t.detected_at,
        ])?;
    }
    Ok(())
}

struct SignalRow {
    id: String,
    text: String,
    generalized_text: Option<String>,
    dimension: Option<String>,
    stance: Option<String>,
    importance: Option<String>,
    source_category: Option<String>,
    source_file: String,
    elicitation: Option<String>,
    extracted_at: String,
    content_hash: String,
}

impl SignalRow {
    fn into_signal(self) -> Option<Signal> {
        let Ok(id) = parse_uuid(&self.id) else {
            tracing::warn!(signal = self.id, "skipping signal with malformed id");
            return None;
        };
        let content_hash = if self.content_hash.is_empty() {
            content_hash(&self.text)
        } else {
            self.content_hash
        };
        Some(Signal {
            id,
            text: self.text,
            generalized_text: self.generalized_text.filter(|g| !g.trim().is_empty()),
            dimension: lossy(&self.dimension, Dimension::from_str_lossy),
            stance: lossy(&self.stance, Stance::from_str_lossy),
            importance: lossy(&self.importance, Importance::from_str_lossy),
            provenance: Provenance {
                source_category: lossy(&self.source_category, SourceCategory::from_str_lossy),
                source_file: self.source_file,
                extracted_at: canonicalize_or_epoch(&self.extracted_at),
                elicitation: lossy(&self.elicitation, Elicitation::from_str_lossy),
            },
            content_hash,
        })
    }
}

struct PrincipleRow {
    id: String,
    representative_text: String,
    representative_signal: String,
    representative_weight: f64,
    dimension: Option<String>,
    n_count: i64,
    centrality: Option<String>,
    weight: f64,
    created_at: String,
}

struct AxiomRow {
    id: String,
    native: String,
    cjk: Option<String>,
    emoji: Option<String>,
    math: Option<String>,
    dimension: Option<String>,
    centrality: Option<String>,
    n_count: i64,
    weight: f64,
    derived_from: String,
    provenance: String,
    tensions: String,
    blocked: bool,
    block_reason: Option<String>,
    created_at: String,
}

impl AxiomRow {
    fn into_axiom(self, run_id: Uuid) -> Option<Axiom> {
        let Ok(id) = parse_uuid(&self.id) else {
            tracing::warn!(%run_id, axiom = self.id, "skipping axiom with malformed id");
            return None;
        };
        let derived_from: DerivedFrom = json_or_default(&self.derived_from, "derived_from");
        let provenance: ProvenanceSummary = json_or_default(&self.provenance, "provenance");
        let mut tensions: Vec<Tension> = json_or_default(&self.tensions, "tensions");
        for t in &mut tensions {
            t.detected_at = canonicalize_or_epoch(&t.detected_at);
        }
        Some(Axiom {
            id,
            canonical_forms: CanonicalForms {
                native: self.native,
                cjk: self.cjk,
                emoji: self.emoji,
                math: self.math,
            },
            dimension: lossy(&self.dimension, Dimension::from_str_lossy),
            centrality: lossy(&self.centrality, Centrality::from_str_lossy),
            n_count: self.n_count.max(0) as usize,
            weight: self.weight,
            derived_from,
            provenance_diversity: provenance.diversity(),
            provenance,
            tensions,
            blocked: self.blocked,
            block_reason: self.block_reason.as_deref().and_then(BlockReason::parse),
            created_at: canonicalize_or_epoch(&self.created_at),
        })
    }
}

fn lossy<T>(value: &Option<String>, parse: fn(&str) -> T) -> T {
    parse(value.as_deref().unwrap_or(""))
}

fn json_or_default<T: serde::de::DeserializeOwned + Default>(json: &str, column: &str) -> T {
    serde_json::from_str(json).unwrap_or_else(|e| {
        tracing::warn!(column, "unreadable JSON column, using default: {e}");
        T::default()
    })
}

fn parse_uuid(s: &str) -> Result<Uuid> {
    Uuid::parse_str(s).map_err(|e| StoreError::InvalidData(format!("invalid UUID '{s}': {e}")))
}

#[cfg(test)]
mod tests {
    use super::*;
    use ns_core::{BlockReason, SourceBlock};

    fn signal(text: &str) -> Signal {
        Signal::from_block(
            &SourceBlock::new(text, "memory/a.md")
                .with_category(SourceCategory::External)
                .with_timestamp("2026-01-05T08:00:00Z"),
        )
    }

    fn run() -> RunArtifacts {
        let a = signal("I value honesty");
        let b = signal("Honesty comes first");
        let mut p = Principle::new(&a, 2.0);
        p.reinforce(&b, 2.0, 0.9);
        let q = Principle::new(&signal("I like quiet mornings"), 1.0);
        let axiom = Axiom::from_principle(&p);
        let blocked = Axiom::blocked(&q, BlockReason::EchoChamber);
        let tension = Tension::new(p.id, q.id, Severity::High);
        let run_id = Uuid::new_v4();
        RunArtifacts {
            run_id,
            report: RunReport {
                run_id,
                promoted: 1,
                ..RunReport::default()
            },
            signals: vec![a, b],
            principles: vec![p, q],
            axioms: vec![axiom, blocked],
            tensions: vec![tension],
        }
    }

    #[test]
    fn test_save_and_load_roundtrip() {
        let db = SoulDb::open_in_memory().unwrap();
        let original = run();
        db.save_run(&original).unwrap();

        assert_eq!(db.load_signals(original.run_id).unwrap(), original.signals);
        assert_eq!(db.load_principles(original.run_id).unwrap(), original.principles);
        assert_eq!(db.load_axioms(original.run_id).unwrap(), original.axioms);
        assert_eq!(db.load_tensions(original.run_id).unwrap(), original.tensions);
        let report = db.load_report(original.run_id).unwrap().unwrap();
        assert_eq!(report.promoted, 1);
    }

    #[test]
    fn test_unknown_run_loads_empty() {
        let db = SoulDb::open_in_memory().unwrap();
        let id = Uuid::new_v4();
        assert!(db.load_signals(id).unwrap().is_empty());
        assert!(db.load_principles(id).unwrap().is_empty());
        assert!(db.load_report(id).unwrap().is_none());
    }

    #[test]
    fn test_signals_shared_between_runs() {
        let db = SoulDb::open_in_memory().unwrap();
        let first = run();
        db.save_run(&first).unwrap();
        let second_id = Uuid::new_v4();
        db.save_signals(second_id, &first.signals).unwrap();

        let count: i64 = db
            .conn()
            .query_row("SELECT count(*) FROM signals", [], |row| row.get(0))
            .unwrap();
        assert_eq!(count, 2);
        assert_eq!(db.load_signals(second_id).unwrap(), first.signals);
    }

    #[test]
    fn test_report_update_keeps_artifacts() {
        let db = SoulDb::open_in_memory().unwrap();
        let original = run();
        db.save_run(&original).unwrap();
        db.save_report(&original.report).unwrap();
        assert_eq!(db.load_axioms(original.run_id).unwrap().len(), 2);
    }

    #[test]
    fn test_prune_keeps_listed_runs() {
        let db = SoulDb::open_in_memory().unwrap();
        let old = run();
        let new = run();
        db.save_run(&old).unwrap();
        db.save_run(&new).unwrap();

        assert_eq!(db.prune_runs(&[new.run_id]).unwrap(), 1);
        assert_eq!(db.run_ids().unwrap(), vec![new.run_id]);
        assert!(db.load_principles(old.run_id).unwrap().is_empty());
        let count: i64 = db
            .conn()
            .query_row("SELECT count(*) FROM signals", [], |row| row.get(0))
            .unwrap();
        assert_eq!(count, 2, "only the kept run's signals remain");
    }

    #[test]
    fn test_legacy_rows_load_with_fallbacks() {
        let db = SoulDb::open_in_memory().unwrap();
        let run_id = Uuid::new_v4();
        let sig = Uuid::new_v4();
        db.conn()
            .execute_batch(&format!(
                "INSERT INTO runs (id) VALUES ('{run_id}');
                 INSERT INTO signals (id, text, dimension, stance, extracted_at)
                     VALUES ('{sig}', 'I keep promises', 'mystery', 'shouting', '2026-01-05 08:00:00');
                 INSERT INTO signals (id, text) VALUES ('not-a-uuid', 'broken');
                 INSERT INTO run_signals (run_id, signal_id, position) VALUES ('{run_id}', '{sig}', 0);
                 INSERT INTO run_signals (run_id, signal_id, position) VALUES ('{run_id}', 'not-a-uuid', 1);"
            ))
            .unwrap();

        let signals = db.load_signals(run_id).unwrap();
        assert_eq!(signals.len(), 1);
        let s = &signals[0];
        assert_eq!(s.dimension, Dimension::Unclassified);
        assert_eq!(s.stance, Stance::Assert);
        assert_eq!(s.importance, Importance::Supporting);
        assert_eq!(s.provenance.source_category, SourceCategory::SelfAuthored);
        assert_eq!(s.provenance.extracted_at, "2026-01-05T08:00:00Z");
        assert_eq!(s.content_hash, content_hash("I keep promises"));
        assert_eq!(db.take_skipped(), 1, "the malformed row is counted");
        assert_eq!(db.take_skipped(), 0);
    }

    #[test]
    fn test_skipped_rows_are_counted_per_artifact() {
        let db = SoulDb::open_in_memory().unwrap();
        let original = run();
        db.save_run(&original).unwrap();
        let run_id = original.run_id;
        db.conn()
            .execute_batch(&format!(
                "INSERT INTO tensions (run_id, id, principle_a, principle_b)
                     VALUES ('{run_id}', 'garbled', 'x', 'y');
                 INSERT INTO axioms (run_id, id, position, native)
                     VALUES ('{run_id}', 'garbled', 9, 'Be kind');"
            ))
            .unwrap();

        assert_eq!(db.load_tensions(run_id).unwrap().len(), 1);
        assert_eq!(db.load_axioms(run_id).unwrap().len(), 2);
        assert_eq!(db.load_principles(run_id).unwrap().len(), 2);
        assert_eq!(db.take_skipped(), 2);
    }

    #[test]
    fn test_corrupt_json_columns_default() {
        let db = SoulDb::open_in_memory().unwrap();
        let run_id = Uuid::new_v4();
        let id = Uuid::new_v4();
        db.conn()
            .execute_batch(&format!(
                "INSERT INTO runs (id) VALUES ('{run_id}');
                 INSERT INTO axioms (run_id, id, position, native, derived_from, blocked, block_reason)
                     VALUES ('{run_id}', '{id}', 0, 'Be honest', '{{oops', 1, 'echo-chamber');"
            ))
            .unwrap();
        let axioms = db.load_axioms(run_id).unwrap();
        assert_eq!(axioms.len(), 1);
        assert!(axioms[0].derived_from.principles.is_empty());
        assert_eq!(axioms[0].block_reason, Some(BlockReason::EchoChamber));
        assert_eq!(axioms[0].created_at, "1970-01-01T00:00:00Z");
    }

    #[test]
    fn test_metadata() {
        let db = SoulDb::open_in_memory().unwrap();
        assert!(db.get_metadata("foo").unwrap().is_none());
        db.set_metadata("foo", "bar").unwrap();
        assert_eq!(db.get_metadata("foo").unwrap(), Some("bar".to_string()));
    }
}
