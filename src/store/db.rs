use std::path::Path;
use std::str::FromStr;
use std::sync::Arc;

use anyhow::{Context, Result};
use chrono::Utc;
use rusqlite::{Connection, params};
use uuid::Uuid;

use crate::phase::{PillarKind, StrategyPhase};
use super::models::*;

/// Async-safe handle to the strategy database.
///
/// Wraps `StrategyDb` behind `Arc<Mutex>` and runs all access on tokio's
/// blocking thread pool via `spawn_blocking`, preventing synchronous SQLite
/// I/O from tying up async worker threads.
#[derive(Clone)]
pub struct DbHandle {
    inner: Arc<std::sync::Mutex<StrategyDb>>,
}

impl DbHandle {
    pub fn new(db: StrategyDb) -> Self {
        Self {
            inner: Arc::new(std::sync::Mutex::new(db)),
        }
    }

    /// Run a closure with access to the database on a blocking thread.
    /// All data passed into `f` must be owned (`'static`).
    pub async fn call<F, R>(&self, f: F) -> Result<R>
    where
        F: FnOnce(&StrategyDb) -> Result<R> + Send + 'static,
        R: Send + 'static,
    {
        let db = self.inner.clone();
        tokio::task::spawn_blocking(move || {
            let guard = db
                .lock()
                .map_err(|e| anyhow::anyhow!("DB lock poisoned: {}", e))?;
            f(&guard)
        })
        .await
        .context("DB task panicked")?
    }
}

fn now() -> String {
    Utc::now().to_rfc3339()
}

fn new_id() -> String {
    Uuid::new_v4().to_string()
}

pub struct StrategyDb {
    conn: Connection,
}

impl StrategyDb {
    /// Open (or create) a SQLite database at the given path and run migrations.
    pub fn new(path: &Path) -> Result<Self> {
        let conn = Connection::open(path).context("Failed to open SQLite database")?;
        let db = Self { conn };
        db.init()?;
        Ok(db)
    }

    /// Create an in-memory SQLite database (for testing).
    pub fn new_in_memory() -> Result<Self> {
        let conn =
            Connection::open_in_memory().context("Failed to open in-memory SQLite database")?;
        let db = Self { conn };
        db.init()?;
        Ok(db)
    }

    fn init(&self) -> Result<()> {
        self.conn
            .execute_batch("PRAGMA foreign_keys = ON;")
            .context("Failed to enable foreign keys")?;
        self.run_migrations().context("Failed to run migrations")?;
        Ok(())
    }

    fn run_migrations(&self) -> Result<()> {
        self.conn
            .execute_batch(
                "
                CREATE TABLE IF NOT EXISTS strategies (
                    id TEXT PRIMARY KEY,
                    name TEXT NOT NULL,
                    phase TEXT NOT NULL DEFAULT 'intake',
                    status TEXT NOT NULL DEFAULT 'draft',
                    survey TEXT NOT NULL DEFAULT '{}',
                    created_at TEXT NOT NULL,
                    updated_at TEXT NOT NULL
                );

                CREATE TABLE IF NOT EXISTS content_units (
                    id TEXT PRIMARY KEY,
                    strategy_id TEXT NOT NULL REFERENCES strategies(id) ON DELETE CASCADE,
                    kind TEXT NOT NULL,
                    status TEXT NOT NULL DEFAULT 'pending',
                    content TEXT,
                    summary TEXT,
                    version INTEGER NOT NULL DEFAULT 0,
                    stale_reason TEXT,
                    stale_since TEXT,
                    error_message TEXT,
                    generated_at TEXT,
                    UNIQUE(strategy_id, kind)
                );

                CREATE TABLE IF NOT EXISTS unit_snapshots (
                    id TEXT PRIMARY KEY,
                    unit_id TEXT NOT NULL REFERENCES content_units(id) ON DELETE CASCADE,
                    version INTEGER NOT NULL,
                    content TEXT NOT NULL,
                    summary TEXT,
                    source TEXT NOT NULL,
                    created_by TEXT NOT NULL,
                    created_at TEXT NOT NULL
                );

                CREATE TABLE IF NOT EXISTS market_enrichments (
                    id TEXT PRIMARY KEY,
                    strategy_id TEXT NOT NULL REFERENCES strategies(id) ON DELETE CASCADE,
                    synthesis TEXT NOT NULL,
                    created_by TEXT NOT NULL,
                    created_at TEXT NOT NULL
                );

                CREATE TABLE IF NOT EXISTS signals (
                    id TEXT PRIMARY KEY,
                    strategy_id TEXT NOT NULL REFERENCES strategies(id) ON DELETE CASCADE,
                    layer TEXT NOT NULL,
                    status TEXT NOT NULL,
                    pillar_ref TEXT,
                    title TEXT NOT NULL,
                    description TEXT NOT NULL DEFAULT '',
                    source TEXT NOT NULL DEFAULT '',
                    confidence TEXT NOT NULL DEFAULT 'MEDIUM',
                    detected_at TEXT NOT NULL,
                    last_checked_at TEXT NOT NULL
                );

                CREATE TABLE IF NOT EXISTS signal_mutations (
                    id INTEGER PRIMARY KEY AUTOINCREMENT,
                    signal_id TEXT NOT NULL REFERENCES signals(id) ON DELETE CASCADE,
                    from_status TEXT NOT NULL,
                    to_status TEXT NOT NULL,
                    reason TEXT NOT NULL DEFAULT '',
                    mutated_by TEXT NOT NULL,
                    created_at TEXT NOT NULL
                );

                CREATE TABLE IF NOT EXISTS decisions (
                    id TEXT PRIMARY KEY,
                    strategy_id TEXT NOT NULL REFERENCES strategies(id) ON DELETE CASCADE,
                    title TEXT NOT NULL,
                    description TEXT,
                    priority TEXT NOT NULL DEFAULT 'P1',
                    status TEXT NOT NULL DEFAULT 'PENDING',
                    deadline_type TEXT,
                    signal_id TEXT UNIQUE REFERENCES signals(id) ON DELETE SET NULL,
                    created_at TEXT NOT NULL,
                    updated_at TEXT NOT NULL
                );

                CREATE TABLE IF NOT EXISTS missions (
                    id TEXT PRIMARY KEY,
                    strategy_id TEXT NOT NULL REFERENCES strategies(id) ON DELETE CASCADE,
                    title TEXT NOT NULL,
                    status TEXT NOT NULL DEFAULT 'draft',
                    assignments TEXT NOT NULL DEFAULT '[]',
                    deliverables TEXT NOT NULL DEFAULT '[]',
                    created_at TEXT NOT NULL,
                    updated_at TEXT NOT NULL
                );

                CREATE TABLE IF NOT EXISTS mission_debriefs (
                    id TEXT PRIMARY KEY,
                    mission_id TEXT NOT NULL UNIQUE REFERENCES missions(id) ON DELETE CASCADE,
                    summary TEXT NOT NULL,
                    outcome_rating INTEGER,
                    suggested_signals TEXT NOT NULL DEFAULT '[]',
                    pricing_insights TEXT NOT NULL DEFAULT '[]',
                    created_by TEXT NOT NULL,
                    created_at TEXT NOT NULL
                );

                CREATE TABLE IF NOT EXISTS widget_results (
                    strategy_id TEXT NOT NULL REFERENCES strategies(id) ON DELETE CASCADE,
                    widget TEXT NOT NULL,
                    status TEXT NOT NULL DEFAULT 'pending',
                    data TEXT,
                    computed_at TEXT,
                    error_message TEXT,
                    UNIQUE(strategy_id, widget)
                );

                CREATE TABLE IF NOT EXISTS pricing_refs (
                    market TEXT NOT NULL,
                    category TEXT NOT NULL,
                    subcategory TEXT NOT NULL,
                    day_rate REAL NOT NULL,
                    currency TEXT NOT NULL,
                    note TEXT,
                    source_mission_id TEXT,
                    updated_at TEXT NOT NULL,
                    UNIQUE(market, category, subcategory)
                );

                CREATE TABLE IF NOT EXISTS translated_briefs (
                    id TEXT PRIMARY KEY,
                    strategy_id TEXT NOT NULL REFERENCES strategies(id) ON DELETE CASCADE,
                    locale TEXT NOT NULL,
                    doc_type TEXT NOT NULL,
                    source_kinds TEXT NOT NULL DEFAULT '[]',
                    stale_reason TEXT,
                    stale_since TEXT,
                    created_at TEXT NOT NULL
                );

                CREATE INDEX IF NOT EXISTS idx_units_strategy ON content_units(strategy_id);
                CREATE INDEX IF NOT EXISTS idx_snapshots_unit ON unit_snapshots(unit_id);
                CREATE INDEX IF NOT EXISTS idx_signals_strategy ON signals(strategy_id);
                CREATE INDEX IF NOT EXISTS idx_mutations_signal ON signal_mutations(signal_id);
                CREATE INDEX IF NOT EXISTS idx_decisions_strategy ON decisions(strategy_id);
                CREATE INDEX IF NOT EXISTS idx_missions_strategy ON missions(strategy_id);
                CREATE INDEX IF NOT EXISTS idx_briefs_strategy ON translated_briefs(strategy_id);
                CREATE INDEX IF NOT EXISTS idx_enrichments_strategy ON market_enrichments(strategy_id);
                ",
            )
            .context("Failed to create tables")?;
        Ok(())
    }

    // ── Strategy CRUD ─────────────────────────────────────────────────

    /// Create a strategy together with its eight pending content units.
    pub fn create_strategy(&self, name: &str, survey: &serde_json::Value) -> Result<Strategy> {
        let id = new_id();
        let ts = now();
        let tx = self
            .conn
            .unchecked_transaction()
            .context("Failed to begin create_strategy transaction")?;
        tx.execute(
            "INSERT INTO strategies (id, name, phase, status, survey, created_at, updated_at)
             VALUES (?1, ?2, 'intake', 'draft', ?3, ?4, ?4)",
            params![id, name, survey.to_string(), ts],
        )
        .context("Failed to insert strategy")?;
        for kind in PillarKind::ALL {
            tx.execute(
                "INSERT INTO content_units (id, strategy_id, kind) VALUES (?1, ?2, ?3)",
                params![new_id(), id, kind.as_str()],
            )
            .context("Failed to insert content unit")?;
        }
        tx.commit().context("Failed to commit create_strategy")?;
        self.get_strategy(&id)?
            .context("Strategy not found after insert")
    }

    pub fn get_strategy(&self, id: &str) -> Result<Option<Strategy>> {
        let mut stmt = self
            .conn
            .prepare(
                "SELECT id, name, phase, status, survey, created_at, updated_at
                 FROM strategies WHERE id = ?1",
            )
            .context("Failed to prepare get_strategy")?;
        let mut rows = stmt
            .query_map(params![id], |row| {
                Ok(StrategyRow {
                    id: row.get(0)?,
                    name: row.get(1)?,
                    phase: row.get(2)?,
                    status: row.get(3)?,
                    survey: row.get(4)?,
                    created_at: row.get(5)?,
                    updated_at: row.get(6)?,
                })
            })
            .context("Failed to query strategy")?;
        match rows.next() {
            Some(row) => Ok(Some(row.context("Failed to read strategy row")?.into_strategy()?)),
            None => Ok(None),
        }
    }

    pub fn list_strategies(&self) -> Result<Vec<Strategy>> {
        let mut stmt = self
            .conn
            .prepare(
                "SELECT id, name, phase, status, survey, created_at, updated_at
                 FROM strategies ORDER BY created_at",
            )
            .context("Failed to prepare list_strategies")?;
        let rows = stmt
            .query_map([], |row| {
                Ok(StrategyRow {
                    id: row.get(0)?,
                    name: row.get(1)?,
                    phase: row.get(2)?,
                    status: row.get(3)?,
                    survey: row.get(4)?,
                    created_at: row.get(5)?,
                    updated_at: row.get(6)?,
                })
            })
            .context("Failed to query strategies")?;
        let mut strategies = Vec::new();
        for row in rows {
            strategies.push(row.context("Failed to read strategy row")?.into_strategy()?);
        }
        Ok(strategies)
    }

    pub fn set_strategy_phase(&self, id: &str, phase: StrategyPhase) -> Result<Strategy> {
        self.conn
            .execute(
                "UPDATE strategies SET phase = ?1, updated_at = ?2 WHERE id = ?3",
                params![phase.as_str(), now(), id],
            )
            .context("Failed to update strategy phase")?;
        self.get_strategy(id)?
            .context("Strategy not found after phase update")
    }

    pub fn set_strategy_status(&self, id: &str, status: StrategyStatus) -> Result<Strategy> {
        self.conn
            .execute(
                "UPDATE strategies SET status = ?1, updated_at = ?2 WHERE id = ?3",
                params![status.as_str(), now(), id],
            )
            .context("Failed to update strategy status")?;
        self.get_strategy(id)?
            .context("Strategy not found after status update")
    }

    /// Delete a strategy; all owned rows cascade.
    pub fn delete_strategy(&self, id: &str) -> Result<bool> {
        let n = self
            .conn
            .execute("DELETE FROM strategies WHERE id = ?1", params![id])
            .context("Failed to delete strategy")?;
        Ok(n > 0)
    }

    // ── Content units ─────────────────────────────────────────────────

    pub fn get_unit(&self, strategy_id: &str, kind: PillarKind) -> Result<Option<ContentUnit>> {
        let mut stmt = self
            .conn
            .prepare(
                "SELECT id, strategy_id, kind, status, content, summary, version,
                        stale_reason, stale_since, error_message, generated_at
                 FROM content_units WHERE strategy_id = ?1 AND kind = ?2",
            )
            .context("Failed to prepare get_unit")?;
        let mut rows = stmt
            .query_map(params![strategy_id, kind.as_str()], unit_row_mapper)
            .context("Failed to query unit")?;
        match rows.next() {
            Some(row) => Ok(Some(row.context("Failed to read unit row")?.into_unit()?)),
            None => Ok(None),
        }
    }

    pub fn list_units(&self, strategy_id: &str) -> Result<Vec<ContentUnit>> {
        let mut stmt = self
            .conn
            .prepare(
                "SELECT id, strategy_id, kind, status, content, summary, version,
                        stale_reason, stale_since, error_message, generated_at
                 FROM content_units WHERE strategy_id = ?1",
            )
            .context("Failed to prepare list_units")?;
        let rows = stmt
            .query_map(params![strategy_id], unit_row_mapper)
            .context("Failed to query units")?;
        let mut units = Vec::new();
        for row in rows {
            units.push(row.context("Failed to read unit row")?.into_unit()?);
        }
        units.sort_by_key(|u| u.kind.order());
        Ok(units)
    }

    /// Compare-and-swap claim on a unit before dispatching generation.
    ///
    /// Returns `false` when the unit is already `generating`, closing the
    /// concurrent-generate race at the storage level.
    pub fn claim_generation(&self, strategy_id: &str, kind: PillarKind) -> Result<bool> {
        let n = self
            .conn
            .execute(
                "UPDATE content_units
                 SET status = 'generating', error_message = NULL
                 WHERE strategy_id = ?1 AND kind = ?2 AND status != 'generating'",
                params![strategy_id, kind.as_str()],
            )
            .context("Failed to claim unit for generation")?;
        Ok(n > 0)
    }

    /// Release a `generating` claim without recording content. Used when the
    /// operation aborts before the external generator was invoked.
    pub fn release_claim(&self, strategy_id: &str, kind: PillarKind, back_to: UnitStatus) -> Result<()> {
        self.conn
            .execute(
                "UPDATE content_units SET status = ?3
                 WHERE strategy_id = ?1 AND kind = ?2 AND status = 'generating'",
                params![strategy_id, kind.as_str(), back_to.as_str()],
            )
            .context("Failed to release generation claim")?;
        Ok(())
    }

    /// Overwrite a unit's content: snapshot the prior value (if any), bump
    /// the version by exactly 1, and mark the unit complete. One transaction.
    pub fn overwrite_unit_content(
        &self,
        strategy_id: &str,
        kind: PillarKind,
        content: &serde_json::Value,
        summary: Option<&str>,
        source: SnapshotSource,
        actor: &str,
    ) -> Result<ContentUnit> {
        let unit = self
            .get_unit(strategy_id, kind)?
            .with_context(|| format!("Unit {} not found for strategy {}", kind, strategy_id))?;
        let ts = now();
        let tx = self
            .conn
            .unchecked_transaction()
            .context("Failed to begin overwrite transaction")?;
        if let Some(prior) = &unit.content {
            tx.execute(
                "INSERT INTO unit_snapshots (id, unit_id, version, content, summary, source, created_by, created_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
                params![
                    new_id(),
                    unit.id,
                    unit.version,
                    prior.to_string(),
                    unit.summary,
                    source.as_str(),
                    actor,
                    ts
                ],
            )
            .context("Failed to insert snapshot")?;
        }
        tx.execute(
            "UPDATE content_units
             SET content = ?1, summary = ?2, version = version + 1, status = 'complete',
                 stale_reason = NULL, stale_since = NULL, error_message = NULL, generated_at = ?3
             WHERE id = ?4",
            params![content.to_string(), summary, ts, unit.id],
        )
        .context("Failed to update unit content")?;
        tx.commit().context("Failed to commit overwrite")?;
        self.get_unit(strategy_id, kind)?
            .context("Unit not found after overwrite")
    }

    /// Record an upstream generation failure. No snapshot, no version bump.
    pub fn fail_generation(
        &self,
        strategy_id: &str,
        kind: PillarKind,
        message: &str,
    ) -> Result<ContentUnit> {
        self.conn
            .execute(
                "UPDATE content_units SET status = 'error', error_message = ?1
                 WHERE strategy_id = ?2 AND kind = ?3",
                params![message, strategy_id, kind.as_str()],
            )
            .context("Failed to record generation failure")?;
        self.get_unit(strategy_id, kind)?
            .context("Unit not found after failure update")
    }

    /// Mark a unit stale. Idempotent: the reason is re-set, but `stale_since`
    /// keeps its original timestamp once set.
    pub fn mark_unit_stale(&self, strategy_id: &str, kind: PillarKind, reason: &str) -> Result<bool> {
        let n = self
            .conn
            .execute(
                "UPDATE content_units
                 SET stale_reason = ?1, stale_since = COALESCE(stale_since, ?2)
                 WHERE strategy_id = ?3 AND kind = ?4",
                params![reason, now(), strategy_id, kind.as_str()],
            )
            .context("Failed to mark unit stale")?;
        Ok(n > 0)
    }

    // ── Snapshots ─────────────────────────────────────────────────────

    pub fn list_snapshots(&self, unit_id: &str) -> Result<Vec<UnitSnapshot>> {
        let mut stmt = self
            .conn
            .prepare(
                "SELECT id, unit_id, version, content, summary, source, created_by, created_at
                 FROM unit_snapshots WHERE unit_id = ?1 ORDER BY version DESC",
            )
            .context("Failed to prepare list_snapshots")?;
        let rows = stmt
            .query_map(params![unit_id], snapshot_row_mapper)
            .context("Failed to query snapshots")?;
        let mut snapshots = Vec::new();
        for row in rows {
            snapshots.push(row.context("Failed to read snapshot row")?.into_snapshot()?);
        }
        Ok(snapshots)
    }

    pub fn get_snapshot(&self, unit_id: &str, version: i64) -> Result<Option<UnitSnapshot>> {
        let mut stmt = self
            .conn
            .prepare(
                "SELECT id, unit_id, version, content, summary, source, created_by, created_at
                 FROM unit_snapshots WHERE unit_id = ?1 AND version = ?2",
            )
            .context("Failed to prepare get_snapshot")?;
        let mut rows = stmt
            .query_map(params![unit_id, version], snapshot_row_mapper)
            .context("Failed to query snapshot")?;
        match rows.next() {
            Some(row) => Ok(Some(row.context("Failed to read snapshot row")?.into_snapshot()?)),
            None => Ok(None),
        }
    }

    // ── Market enrichment ─────────────────────────────────────────────

    pub fn record_enrichment(
        &self,
        strategy_id: &str,
        synthesis: &serde_json::Value,
        actor: &str,
    ) -> Result<MarketEnrichment> {
        let id = new_id();
        let ts = now();
        self.conn
            .execute(
                "INSERT INTO market_enrichments (id, strategy_id, synthesis, created_by, created_at)
                 VALUES (?1, ?2, ?3, ?4, ?5)",
                params![id, strategy_id, synthesis.to_string(), actor, ts],
            )
            .context("Failed to insert enrichment")?;
        Ok(MarketEnrichment {
            id,
            strategy_id: strategy_id.to_string(),
            synthesis: synthesis.clone(),
            created_by: actor.to_string(),
            created_at: ts,
        })
    }

    pub fn latest_enrichment(&self, strategy_id: &str) -> Result<Option<MarketEnrichment>> {
        let mut stmt = self
            .conn
            .prepare(
                "SELECT id, strategy_id, synthesis, created_by, created_at
                 FROM market_enrichments WHERE strategy_id = ?1
                 ORDER BY created_at DESC LIMIT 1",
            )
            .context("Failed to prepare latest_enrichment")?;
        let mut rows = stmt
            .query_map(params![strategy_id], |row| {
                Ok((
                    row.get::<_, String>(0)?,
                    row.get::<_, String>(1)?,
                    row.get::<_, String>(2)?,
                    row.get::<_, String>(3)?,
                    row.get::<_, String>(4)?,
                ))
            })
            .context("Failed to query enrichment")?;
        match rows.next() {
            Some(row) => {
                let (id, strategy_id, synthesis, created_by, created_at) =
                    row.context("Failed to read enrichment row")?;
                Ok(Some(MarketEnrichment {
                    id,
                    strategy_id,
                    synthesis: serde_json::from_str(&synthesis)
                        .context("Invalid enrichment JSON in database")?,
                    created_by,
                    created_at,
                }))
            }
            None => Ok(None),
        }
    }

    // ── Signals ───────────────────────────────────────────────────────

    pub fn insert_signal(&self, signal: &Signal) -> Result<()> {
        self.conn
            .execute(
                "INSERT INTO signals (id, strategy_id, layer, status, pillar_ref, title,
                                      description, source, confidence, detected_at, last_checked_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11)",
                params![
                    signal.id,
                    signal.strategy_id,
                    signal.layer.as_str(),
                    signal.status.as_str(),
                    signal.pillar_ref.map(|k| k.as_str()),
                    signal.title,
                    signal.description,
                    signal.source,
                    signal.confidence.as_str(),
                    signal.detected_at,
                    signal.last_checked_at
                ],
            )
            .context("Failed to insert signal")?;
        Ok(())
    }

    pub fn get_signal(&self, id: &str) -> Result<Option<Signal>> {
        let mut stmt = self
            .conn
            .prepare(
                "SELECT id, strategy_id, layer, status, pillar_ref, title, description,
                        source, confidence, detected_at, last_checked_at
                 FROM signals WHERE id = ?1",
            )
            .context("Failed to prepare get_signal")?;
        let mut rows = stmt
            .query_map(params![id], signal_row_mapper)
            .context("Failed to query signal")?;
        match rows.next() {
            Some(row) => Ok(Some(row.context("Failed to read signal row")?.into_signal()?)),
            None => Ok(None),
        }
    }

    pub fn list_signals(&self, strategy_id: &str) -> Result<Vec<Signal>> {
        let mut stmt = self
            .conn
            .prepare(
                "SELECT id, strategy_id, layer, status, pillar_ref, title, description,
                        source, confidence, detected_at, last_checked_at
                 FROM signals WHERE strategy_id = ?1 ORDER BY detected_at",
            )
            .context("Failed to prepare list_signals")?;
        let rows = stmt
            .query_map(params![strategy_id], signal_row_mapper)
            .context("Failed to query signals")?;
        let mut signals = Vec::new();
        for row in rows {
            signals.push(row.context("Failed to read signal row")?.into_signal()?);
        }
        Ok(signals)
    }

    /// Apply a status change and its audit record as one transaction.
    /// The audit trail never diverges from the current status.
    pub fn mutate_signal(
        &self,
        signal_id: &str,
        from: SignalStatus,
        to: SignalStatus,
        reason: &str,
        actor: &str,
    ) -> Result<Signal> {
        let ts = now();
        let tx = self
            .conn
            .unchecked_transaction()
            .context("Failed to begin mutate transaction")?;
        tx.execute(
            "UPDATE signals SET status = ?1, last_checked_at = ?2 WHERE id = ?3",
            params![to.as_str(), ts, signal_id],
        )
        .context("Failed to update signal status")?;
        tx.execute(
            "INSERT INTO signal_mutations (signal_id, from_status, to_status, reason, mutated_by, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
            params![signal_id, from.as_str(), to.as_str(), reason, actor, ts],
        )
        .context("Failed to insert signal mutation")?;
        tx.commit().context("Failed to commit signal mutation")?;
        self.get_signal(signal_id)?
            .context("Signal not found after mutation")
    }

    pub fn list_mutations(&self, signal_id: &str) -> Result<Vec<SignalMutation>> {
        let mut stmt = self
            .conn
            .prepare(
                "SELECT id, signal_id, from_status, to_status, reason, mutated_by, created_at
                 FROM signal_mutations WHERE signal_id = ?1 ORDER BY id",
            )
            .context("Failed to prepare list_mutations")?;
        let rows = stmt
            .query_map(params![signal_id], |row| {
                Ok((
                    row.get::<_, i64>(0)?,
                    row.get::<_, String>(1)?,
                    row.get::<_, String>(2)?,
                    row.get::<_, String>(3)?,
                    row.get::<_, String>(4)?,
                    row.get::<_, String>(5)?,
                    row.get::<_, String>(6)?,
                ))
            })
            .context("Failed to query mutations")?;
        let mut mutations = Vec::new();
        for row in rows {
            let (id, signal_id, from_status, to_status, reason, mutated_by, created_at) =
                row.context("Failed to read mutation row")?;
            mutations.push(SignalMutation {
                id,
                signal_id,
                from_status: parse_db(&from_status, "from_status")?,
                to_status: parse_db(&to_status, "to_status")?,
                reason,
                mutated_by,
                created_at,
            });
        }
        Ok(mutations)
    }

    // ── Decisions ─────────────────────────────────────────────────────

    pub fn insert_decision(&self, decision: &Decision) -> Result<()> {
        self.conn
            .execute(
                "INSERT INTO decisions (id, strategy_id, title, description, priority, status,
                                        deadline_type, signal_id, created_at, updated_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)",
                params![
                    decision.id,
                    decision.strategy_id,
                    decision.title,
                    decision.description,
                    decision.priority.as_str(),
                    decision.status.as_str(),
                    decision.deadline_type.map(|d| d.as_str()),
                    decision.signal_id,
                    decision.created_at,
                    decision.updated_at
                ],
            )
            .context("Failed to insert decision")?;
        Ok(())
    }

    /// Insert a signal-linked decision unless one already exists for that
    /// signal. The unique `signal_id` index closes the duplicate race under
    /// retries; the insert is simply a no-op on conflict.
    pub fn insert_decision_for_signal(&self, decision: &Decision) -> Result<Decision> {
        self.conn
            .execute(
                "INSERT INTO decisions (id, strategy_id, title, description, priority, status,
                                        deadline_type, signal_id, created_at, updated_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)
                 ON CONFLICT(signal_id) DO NOTHING",
                params![
                    decision.id,
                    decision.strategy_id,
                    decision.title,
                    decision.description,
                    decision.priority.as_str(),
                    decision.status.as_str(),
                    decision.deadline_type.map(|d| d.as_str()),
                    decision.signal_id,
                    decision.created_at,
                    decision.updated_at
                ],
            )
            .context("Failed to upsert decision for signal")?;
        let signal_id = decision
            .signal_id
            .as_deref()
            .context("insert_decision_for_signal requires a signal_id")?;
        self.get_decision_by_signal(signal_id)?
            .context("Decision not found after signal-linked insert")
    }

    pub fn get_decision_by_signal(&self, signal_id: &str) -> Result<Option<Decision>> {
        let mut stmt = self
            .conn
            .prepare(
                "SELECT id, strategy_id, title, description, priority, status, deadline_type,
                        signal_id, created_at, updated_at
                 FROM decisions WHERE signal_id = ?1",
            )
            .context("Failed to prepare get_decision_by_signal")?;
        let mut rows = stmt
            .query_map(params![signal_id], decision_row_mapper)
            .context("Failed to query decision")?;
        match rows.next() {
            Some(row) => Ok(Some(row.context("Failed to read decision row")?.into_decision()?)),
            None => Ok(None),
        }
    }

    pub fn get_decision(&self, id: &str) -> Result<Option<Decision>> {
        let mut stmt = self
            .conn
            .prepare(
                "SELECT id, strategy_id, title, description, priority, status, deadline_type,
                        signal_id, created_at, updated_at
                 FROM decisions WHERE id = ?1",
            )
            .context("Failed to prepare get_decision")?;
        let mut rows = stmt
            .query_map(params![id], decision_row_mapper)
            .context("Failed to query decision")?;
        match rows.next() {
            Some(row) => Ok(Some(row.context("Failed to read decision row")?.into_decision()?)),
            None => Ok(None),
        }
    }

    pub fn list_decisions(&self, strategy_id: &str) -> Result<Vec<Decision>> {
        let mut stmt = self
            .conn
            .prepare(
                "SELECT id, strategy_id, title, description, priority, status, deadline_type,
                        signal_id, created_at, updated_at
                 FROM decisions WHERE strategy_id = ?1 ORDER BY priority, created_at",
            )
            .context("Failed to prepare list_decisions")?;
        let rows = stmt
            .query_map(params![strategy_id], decision_row_mapper)
            .context("Failed to query decisions")?;
        let mut decisions = Vec::new();
        for row in rows {
            decisions.push(row.context("Failed to read decision row")?.into_decision()?);
        }
        Ok(decisions)
    }

    pub fn set_decision_status(&self, id: &str, status: DecisionStatus) -> Result<Decision> {
        self.conn
            .execute(
                "UPDATE decisions SET status = ?1, updated_at = ?2 WHERE id = ?3",
                params![status.as_str(), now(), id],
            )
            .context("Failed to update decision status")?;
        self.get_decision(id)?
            .context("Decision not found after status update")
    }

    // ── Missions ──────────────────────────────────────────────────────

    pub fn create_mission(
        &self,
        strategy_id: &str,
        title: &str,
        assignments: &[String],
        deliverables: &[String],
    ) -> Result<Mission> {
        let id = new_id();
        let ts = now();
        self.conn
            .execute(
                "INSERT INTO missions (id, strategy_id, title, status, assignments, deliverables, created_at, updated_at)
                 VALUES (?1, ?2, ?3, 'draft', ?4, ?5, ?6, ?6)",
                params![
                    id,
                    strategy_id,
                    title,
                    serde_json::to_string(assignments).context("Failed to serialize assignments")?,
                    serde_json::to_string(deliverables).context("Failed to serialize deliverables")?,
                    ts
                ],
            )
            .context("Failed to insert mission")?;
        self.get_mission(&id)?.context("Mission not found after insert")
    }

    pub fn get_mission(&self, id: &str) -> Result<Option<Mission>> {
        let mut stmt = self
            .conn
            .prepare(
                "SELECT id, strategy_id, title, status, assignments, deliverables, created_at, updated_at
                 FROM missions WHERE id = ?1",
            )
            .context("Failed to prepare get_mission")?;
        let mut rows = stmt
            .query_map(params![id], mission_row_mapper)
            .context("Failed to query mission")?;
        match rows.next() {
            Some(row) => Ok(Some(row.context("Failed to read mission row")?.into_mission()?)),
            None => Ok(None),
        }
    }

    pub fn list_missions(&self, strategy_id: &str) -> Result<Vec<Mission>> {
        let mut stmt = self
            .conn
            .prepare(
                "SELECT id, strategy_id, title, status, assignments, deliverables, created_at, updated_at
                 FROM missions WHERE strategy_id = ?1 ORDER BY created_at",
            )
            .context("Failed to prepare list_missions")?;
        let rows = stmt
            .query_map(params![strategy_id], mission_row_mapper)
            .context("Failed to query missions")?;
        let mut missions = Vec::new();
        for row in rows {
            missions.push(row.context("Failed to read mission row")?.into_mission()?);
        }
        Ok(missions)
    }

    pub fn set_mission_status(&self, id: &str, status: MissionStatus) -> Result<Mission> {
        self.conn
            .execute(
                "UPDATE missions SET status = ?1, updated_at = ?2 WHERE id = ?3",
                params![status.as_str(), now(), id],
            )
            .context("Failed to update mission status")?;
        self.get_mission(id)?
            .context("Mission not found after status update")
    }

    /// Insert a debrief. Returns `false` when the mission already has one:
    /// the `UNIQUE(mission_id)` constraint is the atomicity guarantee, not an
    /// application-level check-then-insert.
    pub fn insert_debrief(&self, debrief: &MissionDebrief) -> Result<bool> {
        let result = self.conn.execute(
            "INSERT INTO mission_debriefs (id, mission_id, summary, outcome_rating,
                                           suggested_signals, pricing_insights, created_by, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
            params![
                debrief.id,
                debrief.mission_id,
                debrief.summary,
                debrief.outcome_rating,
                serde_json::to_string(&debrief.suggested_signals)
                    .context("Failed to serialize suggested signals")?,
                serde_json::to_string(&debrief.pricing_insights)
                    .context("Failed to serialize pricing insights")?,
                debrief.created_by,
                debrief.created_at
            ],
        );
        match result {
            Ok(_) => Ok(true),
            Err(rusqlite::Error::SqliteFailure(e, _))
                if e.code == rusqlite::ErrorCode::ConstraintViolation =>
            {
                Ok(false)
            }
            Err(e) => Err(e).context("Failed to insert debrief"),
        }
    }

    pub fn get_debrief(&self, mission_id: &str) -> Result<Option<MissionDebrief>> {
        let mut stmt = self
            .conn
            .prepare(
                "SELECT id, mission_id, summary, outcome_rating, suggested_signals,
                        pricing_insights, created_by, created_at
                 FROM mission_debriefs WHERE mission_id = ?1",
            )
            .context("Failed to prepare get_debrief")?;
        let mut rows = stmt
            .query_map(params![mission_id], |row| {
                Ok(DebriefRow {
                    id: row.get(0)?,
                    mission_id: row.get(1)?,
                    summary: row.get(2)?,
                    outcome_rating: row.get(3)?,
                    suggested_signals: row.get(4)?,
                    pricing_insights: row.get(5)?,
                    created_by: row.get(6)?,
                    created_at: row.get(7)?,
                })
            })
            .context("Failed to query debrief")?;
        match rows.next() {
            Some(row) => Ok(Some(row.context("Failed to read debrief row")?.into_debrief()?)),
            None => Ok(None),
        }
    }

    // ── Widget results ────────────────────────────────────────────────

    pub fn set_widget_computing(&self, strategy_id: &str, widget: &str) -> Result<()> {
        self.conn
            .execute(
                "INSERT INTO widget_results (strategy_id, widget, status) VALUES (?1, ?2, 'computing')
                 ON CONFLICT(strategy_id, widget) DO UPDATE SET status = 'computing', error_message = NULL",
                params![strategy_id, widget],
            )
            .context("Failed to mark widget computing")?;
        Ok(())
    }

    pub fn store_widget_success(
        &self,
        strategy_id: &str,
        widget: &str,
        data: &serde_json::Value,
    ) -> Result<WidgetResult> {
        self.conn
            .execute(
                "INSERT INTO widget_results (strategy_id, widget, status, data, computed_at)
                 VALUES (?1, ?2, 'ready', ?3, ?4)
                 ON CONFLICT(strategy_id, widget)
                 DO UPDATE SET status = 'ready', data = ?3, computed_at = ?4, error_message = NULL",
                params![strategy_id, widget, data.to_string(), now()],
            )
            .context("Failed to store widget result")?;
        self.get_widget_result(strategy_id, widget)?
            .context("Widget result not found after store")
    }

    pub fn store_widget_error(
        &self,
        strategy_id: &str,
        widget: &str,
        message: &str,
    ) -> Result<WidgetResult> {
        self.conn
            .execute(
                "INSERT INTO widget_results (strategy_id, widget, status, error_message)
                 VALUES (?1, ?2, 'error', ?3)
                 ON CONFLICT(strategy_id, widget)
                 DO UPDATE SET status = 'error', error_message = ?3",
                params![strategy_id, widget, message],
            )
            .context("Failed to store widget error")?;
        self.get_widget_result(strategy_id, widget)?
            .context("Widget result not found after error store")
    }

    pub fn get_widget_result(&self, strategy_id: &str, widget: &str) -> Result<Option<WidgetResult>> {
        let mut stmt = self
            .conn
            .prepare(
                "SELECT strategy_id, widget, status, data, computed_at, error_message
                 FROM widget_results WHERE strategy_id = ?1 AND widget = ?2",
            )
            .context("Failed to prepare get_widget_result")?;
        let mut rows = stmt
            .query_map(params![strategy_id, widget], widget_row_mapper)
            .context("Failed to query widget result")?;
        match rows.next() {
            Some(row) => Ok(Some(row.context("Failed to read widget row")?.into_result()?)),
            None => Ok(None),
        }
    }

    pub fn list_widget_results(&self, strategy_id: &str) -> Result<Vec<WidgetResult>> {
        let mut stmt = self
            .conn
            .prepare(
                "SELECT strategy_id, widget, status, data, computed_at, error_message
                 FROM widget_results WHERE strategy_id = ?1 ORDER BY widget",
            )
            .context("Failed to prepare list_widget_results")?;
        let rows = stmt
            .query_map(params![strategy_id], widget_row_mapper)
            .context("Failed to query widget results")?;
        let mut results = Vec::new();
        for row in rows {
            results.push(row.context("Failed to read widget row")?.into_result()?);
        }
        Ok(results)
    }

    /// Reset the named widgets back to `pending`, keeping their last-known
    /// data for display while recomputation is outstanding.
    pub fn invalidate_widgets(&self, strategy_id: &str, widgets: &[&str]) -> Result<usize> {
        let mut invalidated = 0;
        for widget in widgets {
            invalidated += self
                .conn
                .execute(
                    "UPDATE widget_results SET status = 'pending'
                     WHERE strategy_id = ?1 AND widget = ?2 AND status != 'pending'",
                    params![strategy_id, widget],
                )
                .context("Failed to invalidate widget result")?;
        }
        Ok(invalidated)
    }

    // ── Pricing reference table ───────────────────────────────────────

    pub fn upsert_pricing(
        &self,
        insight: &PricingInsight,
        source_mission_id: Option<&str>,
    ) -> Result<PricingRef> {
        self.conn
            .execute(
                "INSERT INTO pricing_refs (market, category, subcategory, day_rate, currency, note, source_mission_id, updated_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)
                 ON CONFLICT(market, category, subcategory)
                 DO UPDATE SET day_rate = ?4, currency = ?5, note = ?6, source_mission_id = ?7, updated_at = ?8",
                params![
                    insight.market,
                    insight.category,
                    insight.subcategory,
                    insight.day_rate,
                    insight.currency,
                    insight.note,
                    source_mission_id,
                    now()
                ],
            )
            .context("Failed to upsert pricing reference")?;
        self.get_pricing(&insight.market, &insight.category, &insight.subcategory)?
            .context("Pricing row not found after upsert")
    }

    pub fn get_pricing(
        &self,
        market: &str,
        category: &str,
        subcategory: &str,
    ) -> Result<Option<PricingRef>> {
        let mut stmt = self
            .conn
            .prepare(
                "SELECT market, category, subcategory, day_rate, currency, note, source_mission_id, updated_at
                 FROM pricing_refs WHERE market = ?1 AND category = ?2 AND subcategory = ?3",
            )
            .context("Failed to prepare get_pricing")?;
        let mut rows = stmt
            .query_map(params![market, category, subcategory], pricing_row_mapper)
            .context("Failed to query pricing")?;
        match rows.next() {
            Some(row) => Ok(Some(row.context("Failed to read pricing row")?)),
            None => Ok(None),
        }
    }

    pub fn list_pricing(&self) -> Result<Vec<PricingRef>> {
        let mut stmt = self
            .conn
            .prepare(
                "SELECT market, category, subcategory, day_rate, currency, note, source_mission_id, updated_at
                 FROM pricing_refs ORDER BY market, category, subcategory",
            )
            .context("Failed to prepare list_pricing")?;
        let rows = stmt
            .query_map([], pricing_row_mapper)
            .context("Failed to query pricing rows")?;
        let mut pricing = Vec::new();
        for row in rows {
            pricing.push(row.context("Failed to read pricing row")?);
        }
        Ok(pricing)
    }

    // ── Translated briefs ─────────────────────────────────────────────

    pub fn create_brief(
        &self,
        strategy_id: &str,
        locale: &str,
        doc_type: &str,
        source_kinds: &[PillarKind],
    ) -> Result<TranslatedBrief> {
        let id = new_id();
        let ts = now();
        self.conn
            .execute(
                "INSERT INTO translated_briefs (id, strategy_id, locale, doc_type, source_kinds, created_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
                params![
                    id,
                    strategy_id,
                    locale,
                    doc_type,
                    serde_json::to_string(source_kinds).context("Failed to serialize source kinds")?,
                    ts
                ],
            )
            .context("Failed to insert brief")?;
        Ok(TranslatedBrief {
            id,
            strategy_id: strategy_id.to_string(),
            locale: locale.to_string(),
            doc_type: doc_type.to_string(),
            source_kinds: source_kinds.to_vec(),
            stale_reason: None,
            stale_since: None,
            created_at: ts,
        })
    }

    pub fn list_briefs(&self, strategy_id: &str) -> Result<Vec<TranslatedBrief>> {
        let mut stmt = self
            .conn
            .prepare(
                "SELECT id, strategy_id, locale, doc_type, source_kinds, stale_reason, stale_since, created_at
                 FROM translated_briefs WHERE strategy_id = ?1 ORDER BY created_at",
            )
            .context("Failed to prepare list_briefs")?;
        let rows = stmt
            .query_map(params![strategy_id], |row| {
                Ok(BriefRow {
                    id: row.get(0)?,
                    strategy_id: row.get(1)?,
                    locale: row.get(2)?,
                    doc_type: row.get(3)?,
                    source_kinds: row.get(4)?,
                    stale_reason: row.get(5)?,
                    stale_since: row.get(6)?,
                    created_at: row.get(7)?,
                })
            })
            .context("Failed to query briefs")?;
        let mut briefs = Vec::new();
        for row in rows {
            briefs.push(row.context("Failed to read brief row")?.into_brief()?);
        }
        Ok(briefs)
    }

    /// Mark one brief stale, keeping the original `stale_since` once set.
    pub fn mark_brief_stale(&self, brief_id: &str, reason: &str) -> Result<()> {
        self.conn
            .execute(
                "UPDATE translated_briefs
                 SET stale_reason = ?1, stale_since = COALESCE(stale_since, ?2)
                 WHERE id = ?3",
                params![reason, now(), brief_id],
            )
            .context("Failed to mark brief stale")?;
        Ok(())
    }
}

// ── Row structs and mappers ───────────────────────────────────────────

fn parse_db<T: FromStr>(value: &str, field: &str) -> Result<T> {
    value
        .parse::<T>()
        .map_err(|_| anyhow::anyhow!("invalid {} in database: '{}'", field, value))
}

struct StrategyRow {
    id: String,
    name: String,
    phase: String,
    status: String,
    survey: String,
    created_at: String,
    updated_at: String,
}

impl StrategyRow {
    fn into_strategy(self) -> Result<Strategy> {
        Ok(Strategy {
            id: self.id,
            name: self.name,
            phase: parse_db(&self.phase, "phase")?,
            status: parse_db(&self.status, "status")?,
            survey: serde_json::from_str(&self.survey).context("Invalid survey JSON in database")?,
            created_at: self.created_at,
            updated_at: self.updated_at,
        })
    }
}

struct UnitRow {
    id: String,
    strategy_id: String,
    kind: String,
    status: String,
    content: Option<String>,
    summary: Option<String>,
    version: i64,
    stale_reason: Option<String>,
    stale_since: Option<String>,
    error_message: Option<String>,
    generated_at: Option<String>,
}

fn unit_row_mapper(row: &rusqlite::Row) -> rusqlite::Result<UnitRow> {
    Ok(UnitRow {
        id: row.get(0)?,
        strategy_id: row.get(1)?,
        kind: row.get(2)?,
        status: row.get(3)?,
        content: row.get(4)?,
        summary: row.get(5)?,
        version: row.get(6)?,
        stale_reason: row.get(7)?,
        stale_since: row.get(8)?,
        error_message: row.get(9)?,
        generated_at: row.get(10)?,
    })
}

impl UnitRow {
    fn into_unit(self) -> Result<ContentUnit> {
        let content = match self.content {
            Some(raw) => {
                Some(serde_json::from_str(&raw).context("Invalid unit content JSON in database")?)
            }
            None => None,
        };
        Ok(ContentUnit {
            id: self.id,
            strategy_id: self.strategy_id,
            kind: parse_db(&self.kind, "kind")?,
            status: parse_db(&self.status, "status")?,
            content,
            summary: self.summary,
            version: self.version,
            stale_reason: self.stale_reason,
            stale_since: self.stale_since,
            error_message: self.error_message,
            generated_at: self.generated_at,
        })
    }
}

struct SnapshotRow {
    id: String,
    unit_id: String,
    version: i64,
    content: String,
    summary: Option<String>,
    source: String,
    created_by: String,
    created_at: String,
}

fn snapshot_row_mapper(row: &rusqlite::Row) -> rusqlite::Result<SnapshotRow> {
    Ok(SnapshotRow {
        id: row.get(0)?,
        unit_id: row.get(1)?,
        version: row.get(2)?,
        content: row.get(3)?,
        summary: row.get(4)?,
        source: row.get(5)?,
        created_by: row.get(6)?,
        created_at: row.get(7)?,
    })
}

impl SnapshotRow {
    fn into_snapshot(self) -> Result<UnitSnapshot> {
        Ok(UnitSnapshot {
            id: self.id,
            unit_id: self.unit_id,
            version: self.version,
            content: serde_json::from_str(&self.content)
                .context("Invalid snapshot content JSON in database")?,
            summary: self.summary,
            source: parse_db(&self.source, "source")?,
            created_by: self.created_by,
            created_at: self.created_at,
        })
    }
}

struct SignalRow {
    id: String,
    strategy_id: String,
    layer: String,
    status: String,
    pillar_ref: Option<String>,
    title: String,
    description: String,
    source: String,
    confidence: String,
    detected_at: String,
    last_checked_at: String,
}

fn signal_row_mapper(row: &rusqlite::Row) -> rusqlite::Result<SignalRow> {
    Ok(SignalRow {
        id: row.get(0)?,
        strategy_id: row.get(1)?,
        layer: row.get(2)?,
        status: row.get(3)?,
        pillar_ref: row.get(4)?,
        title: row.get(5)?,
        description: row.get(6)?,
        source: row.get(7)?,
        confidence: row.get(8)?,
        detected_at: row.get(9)?,
        last_checked_at: row.get(10)?,
    })
}

impl SignalRow {
    fn into_signal(self) -> Result<Signal> {
        let pillar_ref = match &self.pillar_ref {
            Some(raw) => Some(parse_db(raw, "pillar_ref")?),
            None => None,
        };
        Ok(Signal {
            id: self.id,
            strategy_id: self.strategy_id,
            layer: parse_db(&self.layer, "layer")?,
            status: parse_db(&self.status, "status")?,
            pillar_ref,
            title: self.title,
            description: self.description,
            source: self.source,
            confidence: parse_db(&self.confidence, "confidence")?,
            detected_at: self.detected_at,
            last_checked_at: self.last_checked_at,
        })
    }
}

struct DecisionRow {
    id: String,
    strategy_id: String,
    title: String,
    description: Option<String>,
    priority: String,
    status: String,
    deadline_type: Option<String>,
    signal_id: Option<String>,
    created_at: String,
    updated_at: String,
}

fn decision_row_mapper(row: &rusqlite::Row) -> rusqlite::Result<DecisionRow> {
    Ok(DecisionRow {
        id: row.get(0)?,
        strategy_id: row.get(1)?,
        title: row.get(2)?,
        description: row.get(3)?,
        priority: row.get(4)?,
        status: row.get(5)?,
        deadline_type: row.get(6)?,
        signal_id: row.get(7)?,
        created_at: row.get(8)?,
        updated_at: row.get(9)?,
    })
}

impl DecisionRow {
    fn into_decision(self) -> Result<Decision> {
        let deadline_type = match &self.deadline_type {
            Some(raw) => Some(parse_db(raw, "deadline_type")?),
            None => None,
        };
        Ok(Decision {
            id: self.id,
            strategy_id: self.strategy_id,
            title: self.title,
            description: self.description,
            priority: parse_db(&self.priority, "priority")?,
            status: parse_db(&self.status, "status")?,
            deadline_type,
            signal_id: self.signal_id,
            created_at: self.created_at,
            updated_at: self.updated_at,
        })
    }
}

struct MissionRow {
    id: String,
    strategy_id: String,
    title: String,
    status: String,
    assignments: String,
    deliverables: String,
    created_at: String,
    updated_at: String,
}

fn mission_row_mapper(row: &rusqlite::Row) -> rusqlite::Result<MissionRow> {
    Ok(MissionRow {
        id: row.get(0)?,
        strategy_id: row.get(1)?,
        title: row.get(2)?,
        status: row.get(3)?,
        assignments: row.get(4)?,
        deliverables: row.get(5)?,
        created_at: row.get(6)?,
        updated_at: row.get(7)?,
    })
}

impl MissionRow {
    fn into_mission(self) -> Result<Mission> {
        Ok(Mission {
            id: self.id,
            strategy_id: self.strategy_id,
            title: self.title,
            status: parse_db(&self.status, "status")?,
            assignments: serde_json::from_str(&self.assignments)
                .context("Invalid assignments JSON in database")?,
            deliverables: serde_json::from_str(&self.deliverables)
                .context("Invalid deliverables JSON in database")?,
            created_at: self.created_at,
            updated_at: self.updated_at,
        })
    }
}

struct DebriefRow {
    id: String,
    mission_id: String,
    summary: String,
    outcome_rating: Option<u8>,
    suggested_signals: String,
    pricing_insights: String,
    created_by: String,
    created_at: String,
}

impl DebriefRow {
    fn into_debrief(self) -> Result<MissionDebrief> {
        Ok(MissionDebrief {
            id: self.id,
            mission_id: self.mission_id,
            summary: self.summary,
            outcome_rating: self.outcome_rating,
            suggested_signals: serde_json::from_str(&self.suggested_signals)
                .context("Invalid suggested signals JSON in database")?,
            pricing_insights: serde_json::from_str(&self.pricing_insights)
                .context("Invalid pricing insights JSON in database")?,
            created_by: self.created_by,
            created_at: self.created_at,
        })
    }
}

struct WidgetRow {
    strategy_id: String,
    widget: String,
    status: String,
    data: Option<String>,
    computed_at: Option<String>,
    error_message: Option<String>,
}

fn widget_row_mapper(row: &rusqlite::Row) -> rusqlite::Result<WidgetRow> {
    Ok(WidgetRow {
        strategy_id: row.get(0)?,
        widget: row.get(1)?,
        status: row.get(2)?,
        data: row.get(3)?,
        computed_at: row.get(4)?,
        error_message: row.get(5)?,
    })
}

impl WidgetRow {
    fn into_result(self) -> Result<WidgetResult> {
        let data = match self.data {
            Some(raw) => {
                Some(serde_json::from_str(&raw).context("Invalid widget data JSON in database")?)
            }
            None => None,
        };
        Ok(WidgetResult {
            strategy_id: self.strategy_id,
            widget: self.widget,
            status: parse_db(&self.status, "status")?,
            data,
            computed_at: self.computed_at,
            error_message: self.error_message,
        })
    }
}

fn pricing_row_mapper(row: &rusqlite::Row) -> rusqlite::Result<PricingRef> {
    Ok(PricingRef {
        market: row.get(0)?,
        category: row.get(1)?,
        subcategory: row.get(2)?,
        day_rate: row.get(3)?,
        currency: row.get(4)?,
        note: row.get(5)?,
        source_mission_id: row.get(6)?,
        updated_at: row.get(7)?,
    })
}

struct BriefRow {
    id: String,
    strategy_id: String,
    locale: String,
    doc_type: String,
    source_kinds: String,
    stale_reason: Option<String>,
    stale_since: Option<String>,
    created_at: String,
}

impl BriefRow {
    fn into_brief(self) -> Result<TranslatedBrief> {
        Ok(TranslatedBrief {
            id: self.id,
            strategy_id: self.strategy_id,
            locale: self.locale,
            doc_type: self.doc_type,
            source_kinds: serde_json::from_str(&self.source_kinds)
                .context("Invalid source kinds JSON in database")?,
            stale_reason: self.stale_reason,
            stale_since: self.stale_since,
            created_at: self.created_at,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn test_db() -> StrategyDb {
        StrategyDb::new_in_memory().expect("in-memory db")
    }

    fn make_signal(db: &StrategyDb, strategy_id: &str, layer: SignalLayer, status: SignalStatus) -> Signal {
        let signal = Signal {
            id: new_id(),
            strategy_id: strategy_id.to_string(),
            layer,
            status,
            pillar_ref: Some(PillarKind::Positioning),
            title: "price pressure".into(),
            description: "".into(),
            source: "test".into(),
            confidence: Confidence::Medium,
            detected_at: now(),
            last_checked_at: now(),
        };
        db.insert_signal(&signal).unwrap();
        signal
    }

    #[test]
    fn create_strategy_seeds_all_eight_units() {
        let db = test_db();
        let strategy = db.create_strategy("Acme rebrand", &json!({"sector": "saas"})).unwrap();
        assert_eq!(strategy.phase, StrategyPhase::Intake);
        let units = db.list_units(&strategy.id).unwrap();
        assert_eq!(units.len(), 8);
        assert!(units.iter().all(|u| u.status == UnitStatus::Pending && u.version == 0));
        // Sorted by generation order.
        assert_eq!(units[0].kind, PillarKind::BrandCore);
        assert_eq!(units[7].kind, PillarKind::Activation);
    }

    #[test]
    fn claim_generation_is_a_compare_and_swap() {
        let db = test_db();
        let strategy = db.create_strategy("s", &json!({})).unwrap();
        assert!(db.claim_generation(&strategy.id, PillarKind::BrandCore).unwrap());
        // Second claim while generating is rejected.
        assert!(!db.claim_generation(&strategy.id, PillarKind::BrandCore).unwrap());
        db.release_claim(&strategy.id, PillarKind::BrandCore, UnitStatus::Pending).unwrap();
        assert!(db.claim_generation(&strategy.id, PillarKind::BrandCore).unwrap());
    }

    #[test]
    fn overwrite_bumps_version_and_snapshots_prior_content() {
        let db = test_db();
        let strategy = db.create_strategy("s", &json!({})).unwrap();
        let first = db
            .overwrite_unit_content(
                &strategy.id,
                PillarKind::BrandCore,
                &json!({"essence": "bold"}),
                Some("v1"),
                SnapshotSource::Generation,
                "system",
            )
            .unwrap();
        assert_eq!(first.version, 1);
        assert_eq!(first.status, UnitStatus::Complete);
        // First generation has no prior content, so no snapshot.
        assert!(db.list_snapshots(&first.id).unwrap().is_empty());

        let second = db
            .overwrite_unit_content(
                &strategy.id,
                PillarKind::BrandCore,
                &json!({"essence": "bolder"}),
                Some("v2"),
                SnapshotSource::Regeneration,
                "system",
            )
            .unwrap();
        assert_eq!(second.version, 2);
        let snapshots = db.list_snapshots(&second.id).unwrap();
        assert_eq!(snapshots.len(), 1);
        assert_eq!(snapshots[0].version, 1);
        assert_eq!(snapshots[0].source, SnapshotSource::Regeneration);
        assert_eq!(snapshots[0].content, json!({"essence": "bold"}));
    }

    #[test]
    fn overwrite_clears_staleness_and_error() {
        let db = test_db();
        let strategy = db.create_strategy("s", &json!({})).unwrap();
        db.fail_generation(&strategy.id, PillarKind::Voice, "model timeout").unwrap();
        db.mark_unit_stale(&strategy.id, PillarKind::Voice, "positioning changed").unwrap();
        let unit = db
            .overwrite_unit_content(
                &strategy.id,
                PillarKind::Voice,
                &json!({"tone": "dry"}),
                None,
                SnapshotSource::Generation,
                "system",
            )
            .unwrap();
        assert!(unit.stale_reason.is_none());
        assert!(unit.stale_since.is_none());
        assert!(unit.error_message.is_none());
    }

    #[test]
    fn mark_stale_keeps_original_stale_since() {
        let db = test_db();
        let strategy = db.create_strategy("s", &json!({})).unwrap();
        db.mark_unit_stale(&strategy.id, PillarKind::Roadmap, "risk changed").unwrap();
        let first = db.get_unit(&strategy.id, PillarKind::Roadmap).unwrap().unwrap();
        db.mark_unit_stale(&strategy.id, PillarKind::Roadmap, "track changed").unwrap();
        let second = db.get_unit(&strategy.id, PillarKind::Roadmap).unwrap().unwrap();
        assert_eq!(first.stale_since, second.stale_since);
        assert_eq!(second.stale_reason.as_deref(), Some("track changed"));
    }

    #[test]
    fn mutate_signal_writes_status_and_audit_atomically() {
        let db = test_db();
        let strategy = db.create_strategy("s", &json!({})).unwrap();
        let signal = make_signal(&db, &strategy.id, SignalLayer::Weak, SignalStatus::Watch);
        let mutated = db
            .mutate_signal(&signal.id, SignalStatus::Watch, SignalStatus::Probe, "worth testing", "ana")
            .unwrap();
        assert_eq!(mutated.status, SignalStatus::Probe);
        let history = db.list_mutations(&signal.id).unwrap();
        assert_eq!(history.len(), 1);
        assert_eq!(history[0].from_status, SignalStatus::Watch);
        assert_eq!(history[0].to_status, SignalStatus::Probe);
        assert_eq!(history[0].mutated_by, "ana");
    }

    #[test]
    fn decision_per_signal_is_idempotent() {
        let db = test_db();
        let strategy = db.create_strategy("s", &json!({})).unwrap();
        let signal = make_signal(&db, &strategy.id, SignalLayer::Weak, SignalStatus::Bet);
        let decision = Decision {
            id: new_id(),
            strategy_id: strategy.id.clone(),
            title: "Evaluate bet".into(),
            description: None,
            priority: DecisionPriority::P2,
            status: DecisionStatus::Pending,
            deadline_type: Some(DeadlineType::Exploratory),
            signal_id: Some(signal.id.clone()),
            created_at: now(),
            updated_at: now(),
        };
        let first = db.insert_decision_for_signal(&decision).unwrap();
        let retry = Decision { id: new_id(), ..decision.clone() };
        let second = db.insert_decision_for_signal(&retry).unwrap();
        assert_eq!(first.id, second.id);
        assert_eq!(db.list_decisions(&strategy.id).unwrap().len(), 1);
    }

    #[test]
    fn debrief_uniqueness_is_enforced_by_storage() {
        let db = test_db();
        let strategy = db.create_strategy("s", &json!({})).unwrap();
        let mission = db.create_mission(&strategy.id, "workshop", &[], &[]).unwrap();
        let debrief = MissionDebrief {
            id: new_id(),
            mission_id: mission.id.clone(),
            summary: "done".into(),
            outcome_rating: Some(4),
            suggested_signals: vec![],
            pricing_insights: vec![],
            created_by: "lead".into(),
            created_at: now(),
        };
        assert!(db.insert_debrief(&debrief).unwrap());
        let duplicate = MissionDebrief { id: new_id(), ..debrief.clone() };
        assert!(!db.insert_debrief(&duplicate).unwrap());
    }

    #[test]
    fn pricing_upsert_overwrites_by_composite_key() {
        let db = test_db();
        let insight = PricingInsight {
            market: "DE".into(),
            category: "workshop".into(),
            subcategory: "brand-sprint".into(),
            day_rate: 1800.0,
            currency: "EUR".into(),
            note: None,
        };
        db.upsert_pricing(&insight, Some("m-1")).unwrap();
        let updated = PricingInsight { day_rate: 2100.0, ..insight.clone() };
        let row = db.upsert_pricing(&updated, Some("m-2")).unwrap();
        assert_eq!(row.day_rate, 2100.0);
        assert_eq!(row.source_mission_id.as_deref(), Some("m-2"));
        assert_eq!(db.list_pricing().unwrap().len(), 1);
    }

    #[test]
    fn widget_invalidate_keeps_last_known_data() {
        let db = test_db();
        let strategy = db.create_strategy("s", &json!({})).unwrap();
        db.store_widget_success(&strategy.id, "risk_matrix", &json!({"high": 2})).unwrap();
        let n = db.invalidate_widgets(&strategy.id, &["risk_matrix", "trend_momentum"]).unwrap();
        assert_eq!(n, 1);
        let result = db.get_widget_result(&strategy.id, "risk_matrix").unwrap().unwrap();
        assert_eq!(result.status, WidgetStatus::Pending);
        assert_eq!(result.data, Some(json!({"high": 2})));
    }

    #[test]
    fn delete_strategy_cascades_to_owned_rows() {
        let db = test_db();
        let strategy = db.create_strategy("s", &json!({})).unwrap();
        let signal = make_signal(&db, &strategy.id, SignalLayer::Metric, SignalStatus::Normal);
        db.create_mission(&strategy.id, "m", &[], &[]).unwrap();
        db.store_widget_success(&strategy.id, "brand_health", &json!({})).unwrap();
        assert!(db.delete_strategy(&strategy.id).unwrap());
        assert!(db.get_signal(&signal.id).unwrap().is_none());
        assert!(db.list_units(&strategy.id).unwrap().is_empty());
        assert!(db.list_missions(&strategy.id).unwrap().is_empty());
        assert!(db.list_widget_results(&strategy.id).unwrap().is_empty());
    }
}
