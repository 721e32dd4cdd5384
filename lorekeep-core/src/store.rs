//! SQLite knowledge store.
//!
//! Single source of truth for knowledge items, the domain registry,
//! per-character memory records, slot claims, slot mappings, domain
//! expertise, and the review log. The schema is relational:
//!
//! ```sql
//! knowledge_domains        (domain_id PK, label UNIQUE, active)
//! knowledge_items          (item_id PK, title, content, domain_id, tags,
//!                           source, active, created_at, complexity, fingerprint)
//! character_memory_records (character_id, item_id) PK
//! knowledge_slot_claims    (character_id, slot_index) PK,
//!                          UNIQUE (character_id, domain_id)
//! knowledge_slot_mappings  (character_id, slot_index) PK
//! domain_expertise         (character_id, domain_id) PK
//! knowledge_review_log     (log_id PK, append-only)
//! ```
//!
//! Tag lists and fingerprints are stored as JSON text columns — an
//! internal storage detail shared with this store, not part of the
//! library contract. Multi-row writes (acquisition, claims, reviews) run
//! inside one transaction; a dropped transaction rolls back.

use std::path::{Path, PathBuf};

use chrono::{DateTime, SecondsFormat, Utc};
use rusqlite::{Connection, OpenFlags, params, params_from_iter};
use tracing::{debug, info};
use uuid::Uuid;

use crate::config::PersistenceConfig;
use crate::error::{LoreError, Result};
use crate::records::{
    CharacterMemoryRecord, KnowledgeDomain, KnowledgeItem, KnowledgeSlotClaim,
    KnowledgeSlotMapping, ReviewLogEntry,
};
use crate::search::SearchCandidate;
use crate::types::{CharacterId, DomainId, Fingerprint, KnowledgeId, SlotId};

// ---------------------------------------------------------------------------
// Timestamp codec
// ---------------------------------------------------------------------------

// Fixed-width RFC 3339 with nanoseconds and a Z suffix: lossless on
// round-trip, and stored timestamps compare correctly as text in SQL.
fn ts_to_sql(t: DateTime<Utc>) -> String {
    t.to_rfc3339_opts(SecondsFormat::Nanos, true)
}

fn ts_from_sql(s: &str) -> Result<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(s)
        .map(|t| t.with_timezone(&Utc))
        .map_err(|e| LoreError::Serialization(format!("bad timestamp {s:?}: {e}")))
}

fn uuid_from_sql(s: &str) -> Result<Uuid> {
    Uuid::parse_str(s).map_err(|e| LoreError::Serialization(format!("bad uuid {s:?}: {e}")))
}

// ---------------------------------------------------------------------------
// Raw row carriers
// ---------------------------------------------------------------------------

// Rows are read as plain strings first; uuid/JSON/timestamp parsing
// happens outside the rusqlite closure so failures surface as
// LoreError::Serialization instead of panicking mid-query.

struct RawItem {
    id: String,
    title: String,
    content: String,
    domain: String,
    tags: String,
    source: String,
    active: i64,
    created_at: String,
    complexity: f64,
    fingerprint: String,
    label: String,
}

const ITEM_COLUMNS: &str = "ki.item_id, ki.title, ki.content, ki.domain_id, ki.tags, \
                            ki.source, ki.active, ki.created_at, ki.complexity, ki.fingerprint, \
                            kd.label";

fn read_raw_item(row: &rusqlite::Row<'_>) -> rusqlite::Result<RawItem> {
    Ok(RawItem {
        id: row.get(0)?,
        title: row.get(1)?,
        content: row.get(2)?,
        domain: row.get(3)?,
        tags: row.get(4)?,
        source: row.get(5)?,
        active: row.get(6)?,
        created_at: row.get(7)?,
        complexity: row.get(8)?,
        fingerprint: row.get(9)?,
        label: row.get(10)?,
    })
}

fn item_from_raw(raw: RawItem) -> Result<SearchCandidate> {
    let tags: Vec<String> = serde_json::from_str(&raw.tags)
        .map_err(|e| LoreError::Serialization(format!("bad tag list: {e}")))?;
    let fingerprint: Fingerprint = serde_json::from_str(&raw.fingerprint)
        .map_err(|e| LoreError::Serialization(format!("bad fingerprint: {e}")))?;
    Ok(SearchCandidate {
        item: KnowledgeItem {
            id: KnowledgeId(uuid_from_sql(&raw.id)?),
            title: raw.title,
            content: raw.content,
            domain: DomainId(uuid_from_sql(&raw.domain)?),
            tags,
            source: raw.source,
            active: raw.active != 0,
            created_at: ts_from_sql(&raw.created_at)?,
            complexity: raw.complexity,
            fingerprint,
        },
        domain_label: raw.label,
    })
}

struct RawRecord {
    character: String,
    item: String,
    stability: f64,
    difficulty: f64,
    last_reviewed: String,
    next_review: String,
    review_count: i64,
    is_forgotten: i64,
}

const RECORD_COLUMNS: &str = "r.character_id, r.item_id, r.stability, r.difficulty, \
                              r.last_reviewed, r.next_review, r.review_count, r.is_forgotten";

fn read_raw_record(row: &rusqlite::Row<'_>) -> rusqlite::Result<RawRecord> {
    Ok(RawRecord {
        character: row.get(0)?,
        item: row.get(1)?,
        stability: row.get(2)?,
        difficulty: row.get(3)?,
        last_reviewed: row.get(4)?,
        next_review: row.get(5)?,
        review_count: row.get(6)?,
        is_forgotten: row.get(7)?,
    })
}

fn record_from_raw(raw: RawRecord) -> Result<CharacterMemoryRecord> {
    Ok(CharacterMemoryRecord {
        character: CharacterId(uuid_from_sql(&raw.character)?),
        item: KnowledgeId(uuid_from_sql(&raw.item)?),
        stability: raw.stability,
        difficulty: raw.difficulty,
        last_reviewed: ts_from_sql(&raw.last_reviewed)?,
        next_review: ts_from_sql(&raw.next_review)?,
        review_count: u32::try_from(raw.review_count.max(0)).unwrap_or(u32::MAX),
        is_forgotten: raw.is_forgotten != 0,
    })
}

// ---------------------------------------------------------------------------
// KnowledgeStore
// ---------------------------------------------------------------------------

/// Handle to an open SQLite database holding a world's knowledge state.
pub struct KnowledgeStore {
    conn: Connection,
    db_path: PathBuf,
}

impl std::fmt::Debug for KnowledgeStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("KnowledgeStore")
            .field("db_path", &self.db_path)
            .finish_non_exhaustive()
    }
}

const SCHEMA: &str = "
CREATE TABLE IF NOT EXISTS knowledge_domains (
    domain_id  TEXT PRIMARY KEY,
    label      TEXT NOT NULL UNIQUE,
    active     INTEGER NOT NULL DEFAULT 1
);
CREATE TABLE IF NOT EXISTS knowledge_items (
    item_id     TEXT PRIMARY KEY,
    title       TEXT NOT NULL,
    content     TEXT NOT NULL,
    domain_id   TEXT NOT NULL REFERENCES knowledge_domains(domain_id),
    tags        TEXT NOT NULL,
    source      TEXT NOT NULL,
    active      INTEGER NOT NULL DEFAULT 1,
    created_at  TEXT NOT NULL,
    complexity  REAL NOT NULL,
    fingerprint TEXT NOT NULL
);
CREATE TABLE IF NOT EXISTS character_memory_records (
    character_id  TEXT NOT NULL,
    item_id       TEXT NOT NULL REFERENCES knowledge_items(item_id),
    stability     REAL NOT NULL,
    difficulty    REAL NOT NULL,
    last_reviewed TEXT NOT NULL,
    next_review   TEXT NOT NULL,
    review_count  INTEGER NOT NULL,
    is_forgotten  INTEGER NOT NULL DEFAULT 0,
    PRIMARY KEY (character_id, item_id)
);
CREATE INDEX IF NOT EXISTS idx_records_next_review
    ON character_memory_records (next_review);
CREATE TABLE IF NOT EXISTS knowledge_slot_claims (
    character_id TEXT NOT NULL,
    slot_index   INTEGER NOT NULL,
    domain_id    TEXT NOT NULL REFERENCES knowledge_domains(domain_id),
    claimed_at   TEXT NOT NULL,
    PRIMARY KEY (character_id, slot_index),
    UNIQUE (character_id, domain_id)
);
CREATE TABLE IF NOT EXISTS knowledge_slot_mappings (
    character_id TEXT NOT NULL,
    slot_index   INTEGER NOT NULL,
    domain_id    TEXT NOT NULL,
    access_pct   INTEGER NOT NULL,
    PRIMARY KEY (character_id, slot_index)
);
CREATE TABLE IF NOT EXISTS domain_expertise (
    character_id    TEXT NOT NULL,
    domain_id       TEXT NOT NULL,
    expertise_level REAL NOT NULL,
    PRIMARY KEY (character_id, domain_id)
);
CREATE TABLE IF NOT EXISTS knowledge_review_log (
    log_id                   TEXT PRIMARY KEY,
    character_id             TEXT NOT NULL,
    item_id                  TEXT NOT NULL,
    grade                    INTEGER NOT NULL,
    previous_interval_days   REAL NOT NULL,
    new_interval_days        REAL NOT NULL,
    retrievability_at_review REAL NOT NULL,
    reviewed_at              TEXT NOT NULL
);
";

impl KnowledgeStore {
    /// Open (or create) a knowledge database at `path`.
    ///
    /// The schema is created if missing. WAL mode is enabled when
    /// `config.wal_mode` is true.
    ///
    /// # Errors
    ///
    /// Returns [`LoreError::Database`] on SQLite failures.
    pub fn open<P: AsRef<Path>>(path: P, config: &PersistenceConfig) -> Result<Self> {
        let db_path = path.as_ref().to_path_buf();
        let flags = OpenFlags::SQLITE_OPEN_READ_WRITE
            | OpenFlags::SQLITE_OPEN_CREATE
            | OpenFlags::SQLITE_OPEN_NO_MUTEX;

        let conn = Connection::open_with_flags(&db_path, flags)?;

        if config.wal_mode {
            conn.execute_batch("PRAGMA journal_mode = WAL;")?;
        }
        conn.execute_batch("PRAGMA synchronous = NORMAL;")?;
        conn.execute_batch("PRAGMA foreign_keys = ON;")?;
        conn.execute_batch(&format!("PRAGMA busy_timeout = {};", config.busy_timeout_ms))?;

        conn.execute_batch(SCHEMA)?;

        info!(
            path = %db_path.display(),
            wal = config.wal_mode,
            "knowledge store opened"
        );

        Ok(Self { conn, db_path })
    }

    /// Open an in-memory database (useful for tests).
    ///
    /// # Errors
    ///
    /// Returns [`LoreError::Database`] on SQLite failures.
    pub fn open_in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory()?;
        conn.execute_batch("PRAGMA foreign_keys = ON;")?;
        conn.execute_batch(SCHEMA)?;
        Ok(Self {
            conn,
            db_path: PathBuf::from(":memory:"),
        })
    }

    /// Path to the database file (or `:memory:`).
    #[must_use]
    pub fn db_path(&self) -> &Path {
        &self.db_path
    }

    /// Run an integrity check; `Ok(false)` means corruption was detected.
    ///
    /// # Errors
    ///
    /// Returns [`LoreError::Database`] if the check query itself fails.
    pub fn integrity_check(&self) -> Result<bool> {
        let result: String = self
            .conn
            .query_row("PRAGMA integrity_check", [], |row| row.get(0))?;
        Ok(result == "ok")
    }

    // ------------------------------------------------------------------
    // Domains
    // ------------------------------------------------------------------

    /// Insert a knowledge domain.
    ///
    /// # Errors
    ///
    /// Returns [`LoreError::Database`] on conflicts or SQLite failures.
    pub fn insert_domain(&self, domain: &KnowledgeDomain) -> Result<()> {
        self.conn.execute(
            "INSERT INTO knowledge_domains (domain_id, label, active) VALUES (?1, ?2, ?3)",
            params![domain.id.0.to_string(), domain.label, domain.active],
        )?;
        Ok(())
    }

    /// Fetch a domain by ID.
    ///
    /// # Errors
    ///
    /// Returns [`LoreError::Database`] on SQLite failures.
    pub fn domain(&self, id: DomainId) -> Result<Option<KnowledgeDomain>> {
        let mut stmt = self.conn.prepare_cached(
            "SELECT domain_id, label, active FROM knowledge_domains WHERE domain_id = ?1",
        )?;
        let row: Option<(String, String, bool)> = stmt
            .query_row(params![id.0.to_string()], |r| {
                Ok((r.get(0)?, r.get(1)?, r.get(2)?))
            })
            .optional()?;
        match row {
            None => Ok(None),
            Some((id_str, label, active)) => Ok(Some(KnowledgeDomain {
                id: DomainId(uuid_from_sql(&id_str)?),
                label,
                active,
            })),
        }
    }

    /// Fetch a domain by its unique label.
    ///
    /// # Errors
    ///
    /// Returns [`LoreError::Database`] on SQLite failures.
    pub fn domain_by_label(&self, label: &str) -> Result<Option<KnowledgeDomain>> {
        let mut stmt = self.conn.prepare_cached(
            "SELECT domain_id, label, active FROM knowledge_domains WHERE label = ?1",
        )?;
        let row: Option<(String, String, bool)> = stmt
            .query_row(params![label], |r| Ok((r.get(0)?, r.get(1)?, r.get(2)?)))
            .optional()?;
        match row {
            None => Ok(None),
            Some((id_str, label, active)) => Ok(Some(KnowledgeDomain {
                id: DomainId(uuid_from_sql(&id_str)?),
                label,
                active,
            })),
        }
    }

    /// All active domains, in label order.
    ///
    /// # Errors
    ///
    /// Returns [`LoreError::Database`] on SQLite failures.
    pub fn active_domains(&self) -> Result<Vec<KnowledgeDomain>> {
        let mut stmt = self.conn.prepare_cached(
            "SELECT domain_id, label, active FROM knowledge_domains WHERE active = 1 ORDER BY label",
        )?;
        let rows = stmt.query_map([], |r| {
            Ok((r.get::<_, String>(0)?, r.get::<_, String>(1)?, r.get::<_, bool>(2)?))
        })?;
        let mut domains = Vec::new();
        for row in rows {
            let (id_str, label, active) = row?;
            domains.push(KnowledgeDomain {
                id: DomainId(uuid_from_sql(&id_str)?),
                label,
                active,
            });
        }
        Ok(domains)
    }

    // ------------------------------------------------------------------
    // Items
    // ------------------------------------------------------------------

    /// Persist a new knowledge item together with its seed memory record,
    /// atomically. This is the final stage of acquisition: either both
    /// rows land or neither does.
    ///
    /// # Errors
    ///
    /// Returns [`LoreError::Database`] or [`LoreError::Serialization`];
    /// the transaction rolls back on any failure.
    pub fn insert_item_with_record(
        &self,
        item: &KnowledgeItem,
        record: &CharacterMemoryRecord,
    ) -> Result<()> {
        let tags = serde_json::to_string(&item.tags)
            .map_err(|e| LoreError::Serialization(e.to_string()))?;
        let fingerprint = serde_json::to_string(&item.fingerprint)
            .map_err(|e| LoreError::Serialization(e.to_string()))?;

        let tx = self.conn.unchecked_transaction()?;
        tx.execute(
            "INSERT INTO knowledge_items
             (item_id, title, content, domain_id, tags, source, active, created_at, complexity, fingerprint)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)",
            params![
                item.id.0.to_string(),
                item.title,
                item.content,
                item.domain.0.to_string(),
                tags,
                item.source,
                item.active,
                ts_to_sql(item.created_at),
                item.complexity,
                fingerprint,
            ],
        )?;
        upsert_record_on(&tx, record)?;
        tx.commit()?;

        debug!(item = %item.id, character = %record.character, "knowledge item persisted");
        Ok(())
    }

    /// Fetch a single item by ID.
    ///
    /// # Errors
    ///
    /// Returns [`LoreError::Database`] or [`LoreError::Serialization`].
    pub fn item(&self, id: KnowledgeId) -> Result<Option<KnowledgeItem>> {
        let sql = format!(
            "SELECT {ITEM_COLUMNS} FROM knowledge_items ki
             JOIN knowledge_domains kd ON kd.domain_id = ki.domain_id
             WHERE ki.item_id = ?1"
        );
        let mut stmt = self.conn.prepare_cached(&sql)?;
        let raw = stmt
            .query_row(params![id.0.to_string()], read_raw_item)
            .optional()?;
        match raw {
            None => Ok(None),
            Some(raw) => Ok(Some(item_from_raw(raw)?.item)),
        }
    }

    /// Flip an item's active flag — the only mutable field on an item.
    ///
    /// # Errors
    ///
    /// Returns [`LoreError::ItemNotFound`] if no row matched.
    pub fn set_item_active(&self, id: KnowledgeId, active: bool) -> Result<()> {
        let changed = self.conn.execute(
            "UPDATE knowledge_items SET active = ?2 WHERE item_id = ?1",
            params![id.0.to_string(), active],
        )?;
        if changed == 0 {
            return Err(LoreError::ItemNotFound(id));
        }
        Ok(())
    }

    /// Items the character holds a memory record for. Used by dedup —
    /// each character's memory space is independent.
    ///
    /// # Errors
    ///
    /// Returns [`LoreError::Database`] or [`LoreError::Serialization`].
    pub fn items_for_character(&self, character: CharacterId) -> Result<Vec<KnowledgeItem>> {
        let sql = format!(
            "SELECT {ITEM_COLUMNS} FROM knowledge_items ki
             JOIN knowledge_domains kd ON kd.domain_id = ki.domain_id
             JOIN character_memory_records r ON r.item_id = ki.item_id
             WHERE r.character_id = ?1 AND ki.active = 1"
        );
        let mut stmt = self.conn.prepare_cached(&sql)?;
        let rows = stmt.query_map(params![character.0.to_string()], read_raw_item)?;
        let mut items = Vec::new();
        for row in rows {
            items.push(item_from_raw(row?)?.item);
        }
        Ok(items)
    }

    /// Broad OR-search over title, content, domain label, and tags for
    /// any of the given keywords, capped to bound scoring cost.
    ///
    /// # Errors
    ///
    /// Returns [`LoreError::Database`] or [`LoreError::Serialization`].
    pub fn search_candidates(
        &self,
        keywords: &[String],
        cap: usize,
    ) -> Result<Vec<SearchCandidate>> {
        if keywords.is_empty() {
            return Ok(Vec::new());
        }

        let mut conds = Vec::with_capacity(keywords.len());
        let mut values = Vec::with_capacity(keywords.len() * 4);
        for keyword in keywords {
            let pattern = format!("%{}%", keyword.to_lowercase());
            conds.push(
                "(lower(ki.title) LIKE ? OR lower(ki.content) LIKE ? \
                 OR lower(kd.label) LIKE ? OR lower(ki.tags) LIKE ?)",
            );
            for _ in 0..4 {
                values.push(pattern.clone());
            }
        }

        let sql = format!(
            "SELECT {ITEM_COLUMNS} FROM knowledge_items ki
             JOIN knowledge_domains kd ON kd.domain_id = ki.domain_id
             WHERE ki.active = 1 AND ({})
             ORDER BY ki.created_at DESC
             LIMIT {cap}",
            conds.join(" OR ")
        );

        let mut stmt = self.conn.prepare(&sql)?;
        let rows = stmt.query_map(params_from_iter(values.iter()), read_raw_item)?;
        let mut candidates = Vec::new();
        for row in rows {
            candidates.push(item_from_raw(row?)?);
        }
        Ok(candidates)
    }

    /// Narrow fallback search on a single keyword over title and content
    /// only. Used when the primary search comes back empty.
    ///
    /// # Errors
    ///
    /// Returns [`LoreError::Database`] or [`LoreError::Serialization`].
    pub fn fallback_candidates(&self, keyword: &str, count: usize) -> Result<Vec<SearchCandidate>> {
        let pattern = format!("%{}%", keyword.to_lowercase());
        let sql = format!(
            "SELECT {ITEM_COLUMNS} FROM knowledge_items ki
             JOIN knowledge_domains kd ON kd.domain_id = ki.domain_id
             WHERE ki.active = 1 AND (lower(ki.title) LIKE ?1 OR lower(ki.content) LIKE ?1)
             ORDER BY ki.created_at DESC
             LIMIT {count}"
        );
        let mut stmt = self.conn.prepare(&sql)?;
        let rows = stmt.query_map(params![pattern], read_raw_item)?;
        let mut candidates = Vec::new();
        for row in rows {
            candidates.push(item_from_raw(row?)?);
        }
        Ok(candidates)
    }

    // ------------------------------------------------------------------
    // Memory records
    // ------------------------------------------------------------------

    /// Fetch the memory record for (character, item).
    ///
    /// # Errors
    ///
    /// Returns [`LoreError::Database`] or [`LoreError::Serialization`].
    pub fn memory_record(
        &self,
        character: CharacterId,
        item: KnowledgeId,
    ) -> Result<Option<CharacterMemoryRecord>> {
        let sql = format!(
            "SELECT {RECORD_COLUMNS} FROM character_memory_records r
             WHERE r.character_id = ?1 AND r.item_id = ?2"
        );
        let mut stmt = self.conn.prepare_cached(&sql)?;
        let raw = stmt
            .query_row(
                params![character.0.to_string(), item.0.to_string()],
                read_raw_record,
            )
            .optional()?;
        match raw {
            None => Ok(None),
            Some(raw) => Ok(Some(record_from_raw(raw)?)),
        }
    }

    /// Upsert a memory record outside any larger transaction.
    ///
    /// # Errors
    ///
    /// Returns [`LoreError::Database`] on SQLite failures.
    pub fn upsert_memory_record(&self, record: &CharacterMemoryRecord) -> Result<()> {
        upsert_record_on(&self.conn, record)
    }

    /// Apply a completed review atomically: upsert the advanced record,
    /// append the review-log row, and bump domain expertise.
    ///
    /// # Errors
    ///
    /// Returns [`LoreError::Database`]; the transaction rolls back on
    /// any failure so no partial review is ever recorded.
    pub fn record_review(
        &self,
        record: &CharacterMemoryRecord,
        log: &ReviewLogEntry,
        domain: DomainId,
        expertise_delta: f64,
    ) -> Result<()> {
        let tx = self.conn.unchecked_transaction()?;
        upsert_record_on(&tx, record)?;
        tx.execute(
            "INSERT INTO knowledge_review_log
             (log_id, character_id, item_id, grade, previous_interval_days,
              new_interval_days, retrievability_at_review, reviewed_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
            params![
                Uuid::new_v4().to_string(),
                log.character.0.to_string(),
                log.item.0.to_string(),
                log.grade,
                log.previous_interval_days,
                log.new_interval_days,
                log.retrievability_at_review,
                ts_to_sql(log.reviewed_at),
            ],
        )?;
        tx.execute(
            "INSERT INTO domain_expertise (character_id, domain_id, expertise_level)
             VALUES (?1, ?2, min(100.0, max(0.0, ?3)))
             ON CONFLICT(character_id, domain_id) DO UPDATE SET
                expertise_level = min(100.0, max(0.0, expertise_level + ?3))",
            params![
                log.character.0.to_string(),
                domain.0.to_string(),
                expertise_delta,
            ],
        )?;
        tx.commit()?;
        Ok(())
    }

    /// A character's records with `next_review` in the past, oldest due
    /// first, joined with their items.
    ///
    /// # Errors
    ///
    /// Returns [`LoreError::Database`] or [`LoreError::Serialization`].
    pub fn overdue_records(
        &self,
        character: CharacterId,
        now: DateTime<Utc>,
    ) -> Result<Vec<(KnowledgeItem, CharacterMemoryRecord)>> {
        let sql = format!(
            "SELECT {ITEM_COLUMNS}, {RECORD_COLUMNS}
             FROM character_memory_records r
             JOIN knowledge_items ki ON ki.item_id = r.item_id
             JOIN knowledge_domains kd ON kd.domain_id = ki.domain_id
             WHERE r.character_id = ?1 AND r.next_review < ?2 AND ki.active = 1
             ORDER BY r.next_review ASC"
        );
        let mut stmt = self.conn.prepare_cached(&sql)?;
        let rows = stmt.query_map(
            params![character.0.to_string(), ts_to_sql(now)],
            |row| {
                let raw_item = read_raw_item(row)?;
                let raw_record = RawRecord {
                    character: row.get(11)?,
                    item: row.get(12)?,
                    stability: row.get(13)?,
                    difficulty: row.get(14)?,
                    last_reviewed: row.get(15)?,
                    next_review: row.get(16)?,
                    review_count: row.get(17)?,
                    is_forgotten: row.get(18)?,
                };
                Ok((raw_item, raw_record))
            },
        )?;
        let mut results = Vec::new();
        for row in rows {
            let (raw_item, raw_record) = row?;
            results.push((item_from_raw(raw_item)?.item, record_from_raw(raw_record)?));
        }
        Ok(results)
    }

    /// All records, across characters, whose review is due. Feeds the
    /// background decay pass.
    ///
    /// # Errors
    ///
    /// Returns [`LoreError::Database`] or [`LoreError::Serialization`].
    pub fn records_due(&self, now: DateTime<Utc>) -> Result<Vec<CharacterMemoryRecord>> {
        let sql = format!(
            "SELECT {RECORD_COLUMNS} FROM character_memory_records r
             WHERE r.next_review < ?1
             ORDER BY r.next_review ASC"
        );
        let mut stmt = self.conn.prepare_cached(&sql)?;
        let rows = stmt.query_map(params![ts_to_sql(now)], read_raw_record)?;
        let mut records = Vec::new();
        for row in rows {
            records.push(record_from_raw(row?)?);
        }
        Ok(records)
    }

    /// Set or clear a record's forgotten flag.
    ///
    /// # Errors
    ///
    /// Returns [`LoreError::Database`] on SQLite failures.
    pub fn mark_forgotten(
        &self,
        character: CharacterId,
        item: KnowledgeId,
        forgotten: bool,
    ) -> Result<()> {
        self.conn.execute(
            "UPDATE character_memory_records SET is_forgotten = ?3
             WHERE character_id = ?1 AND item_id = ?2",
            params![character.0.to_string(), item.0.to_string(), forgotten],
        )?;
        Ok(())
    }

    /// Reschedule a record's next review without touching its spacing state.
    ///
    /// # Errors
    ///
    /// Returns [`LoreError::Database`] on SQLite failures.
    pub fn set_next_review(
        &self,
        character: CharacterId,
        item: KnowledgeId,
        next_review: DateTime<Utc>,
    ) -> Result<()> {
        self.conn.execute(
            "UPDATE character_memory_records SET next_review = ?3
             WHERE character_id = ?1 AND item_id = ?2",
            params![
                character.0.to_string(),
                item.0.to_string(),
                ts_to_sql(next_review)
            ],
        )?;
        Ok(())
    }

    // ------------------------------------------------------------------
    // Domain expertise
    // ------------------------------------------------------------------

    /// The character's expertise level in a domain; 0 when unknown.
    ///
    /// # Errors
    ///
    /// Returns [`LoreError::Database`] on SQLite failures.
    pub fn domain_expertise(&self, character: CharacterId, domain: DomainId) -> Result<f64> {
        let mut stmt = self.conn.prepare_cached(
            "SELECT expertise_level FROM domain_expertise
             WHERE character_id = ?1 AND domain_id = ?2",
        )?;
        let level: Option<f64> = stmt
            .query_row(
                params![character.0.to_string(), domain.0.to_string()],
                |r| r.get(0),
            )
            .optional()?;
        Ok(level.unwrap_or(0.0))
    }

    // ------------------------------------------------------------------
    // Slots
    // ------------------------------------------------------------------

    /// Whether the character has already claimed a slot for this domain.
    ///
    /// # Errors
    ///
    /// Returns [`LoreError::Database`] on SQLite failures.
    pub fn domain_claimed(&self, character: CharacterId, domain: DomainId) -> Result<bool> {
        let claimed: bool = self.conn.query_row(
            "SELECT EXISTS(SELECT 1 FROM knowledge_slot_claims
             WHERE character_id = ?1 AND domain_id = ?2)",
            params![character.0.to_string(), domain.0.to_string()],
            |r| r.get(0),
        )?;
        Ok(claimed)
    }

    /// Atomically claim a free slot for (character, domain).
    ///
    /// The existence check, free-slot scan, claim insert, and mapping
    /// insert all run inside one transaction — two concurrent
    /// re-evaluations of the same character cannot double-claim a domain
    /// or oversubscribe the pool. Returns `None` when the domain is
    /// already claimed or every slot is consumed.
    ///
    /// # Errors
    ///
    /// Returns [`LoreError::Database`]; the transaction rolls back on
    /// any failure.
    pub fn claim_slot(
        &self,
        character: CharacterId,
        domain: DomainId,
        pool_size: u8,
        now: DateTime<Utc>,
    ) -> Result<Option<SlotId>> {
        let character_str = character.0.to_string();
        let domain_str = domain.0.to_string();

        let tx = self.conn.unchecked_transaction()?;

        let already: bool = tx.query_row(
            "SELECT EXISTS(SELECT 1 FROM knowledge_slot_claims
             WHERE character_id = ?1 AND domain_id = ?2)",
            params![character_str, domain_str],
            |r| r.get(0),
        )?;
        if already {
            return Ok(None);
        }

        let consumed: Vec<u8> = {
            let mut stmt = tx.prepare(
                "SELECT slot_index FROM knowledge_slot_claims
                 WHERE character_id = ?1 ORDER BY slot_index",
            )?;
            let rows = stmt.query_map(params![character_str], |r| r.get::<_, i64>(0))?;
            let mut v = Vec::new();
            for row in rows {
                v.push(u8::try_from(row?).unwrap_or(u8::MAX));
            }
            v
        };

        let Some(free) = (0..pool_size).find(|i| !consumed.contains(i)) else {
            debug!(character = %character, domain = %domain, "slot pool exhausted");
            return Ok(None);
        };

        tx.execute(
            "INSERT INTO knowledge_slot_claims (character_id, slot_index, domain_id, claimed_at)
             VALUES (?1, ?2, ?3, ?4)",
            params![character_str, free, domain_str, ts_to_sql(now)],
        )?;
        tx.execute(
            "INSERT INTO knowledge_slot_mappings (character_id, slot_index, domain_id, access_pct)
             VALUES (?1, ?2, ?3, 100)",
            params![character_str, free, domain_str],
        )?;
        tx.commit()?;

        info!(character = %character, domain = %domain, slot = free, "knowledge slot claimed");
        Ok(Some(SlotId(free)))
    }

    /// All slot claims for a character, in slot order.
    ///
    /// # Errors
    ///
    /// Returns [`LoreError::Database`] or [`LoreError::Serialization`].
    pub fn claims_for(&self, character: CharacterId) -> Result<Vec<KnowledgeSlotClaim>> {
        let mut stmt = self.conn.prepare_cached(
            "SELECT character_id, slot_index, domain_id, claimed_at
             FROM knowledge_slot_claims WHERE character_id = ?1 ORDER BY slot_index",
        )?;
        let rows = stmt.query_map(params![character.0.to_string()], |r| {
            Ok((
                r.get::<_, String>(0)?,
                r.get::<_, i64>(1)?,
                r.get::<_, String>(2)?,
                r.get::<_, String>(3)?,
            ))
        })?;
        let mut claims = Vec::new();
        for row in rows {
            let (character_str, slot, domain_str, claimed_at) = row?;
            claims.push(KnowledgeSlotClaim {
                character: CharacterId(uuid_from_sql(&character_str)?),
                slot: SlotId(u8::try_from(slot).unwrap_or(u8::MAX)),
                domain: DomainId(uuid_from_sql(&domain_str)?),
                claimed_at: ts_from_sql(&claimed_at)?,
            });
        }
        Ok(claims)
    }

    /// The operational slot→domain mappings retrieval consults.
    ///
    /// # Errors
    ///
    /// Returns [`LoreError::Database`] or [`LoreError::Serialization`].
    pub fn mappings_for(&self, character: CharacterId) -> Result<Vec<KnowledgeSlotMapping>> {
        let mut stmt = self.conn.prepare_cached(
            "SELECT character_id, slot_index, domain_id, access_pct
             FROM knowledge_slot_mappings WHERE character_id = ?1 ORDER BY slot_index",
        )?;
        let rows = stmt.query_map(params![character.0.to_string()], |r| {
            Ok((
                r.get::<_, String>(0)?,
                r.get::<_, i64>(1)?,
                r.get::<_, String>(2)?,
                r.get::<_, i64>(3)?,
            ))
        })?;
        let mut mappings = Vec::new();
        for row in rows {
            let (character_str, slot, domain_str, access) = row?;
            mappings.push(KnowledgeSlotMapping {
                character: CharacterId(uuid_from_sql(&character_str)?),
                slot: SlotId(u8::try_from(slot).unwrap_or(u8::MAX)),
                domain: DomainId(uuid_from_sql(&domain_str)?),
                access_pct: u8::try_from(access).unwrap_or(100),
            });
        }
        Ok(mappings)
    }
}

/// Upsert helper shared by standalone writes and larger transactions.
fn upsert_record_on(conn: &Connection, record: &CharacterMemoryRecord) -> Result<()> {
    conn.execute(
        "INSERT INTO character_memory_records
         (character_id, item_id, stability, difficulty, last_reviewed, next_review,
          review_count, is_forgotten)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)
         ON CONFLICT(character_id, item_id) DO UPDATE SET
            stability = excluded.stability,
            difficulty = excluded.difficulty,
            last_reviewed = excluded.last_reviewed,
            next_review = excluded.next_review,
            review_count = excluded.review_count,
            is_forgotten = excluded.is_forgotten",
        params![
            record.character.0.to_string(),
            record.item.0.to_string(),
            record.stability,
            record.difficulty,
            ts_to_sql(record.last_reviewed),
            ts_to_sql(record.next_review),
            record.review_count,
            record.is_forgotten,
        ],
    )?;
    Ok(())
}

/// Extension trait adding an `.optional()` combinator to `rusqlite::Result`.
///
/// Converts `Err(QueryReturnedNoRows)` into `Ok(None)`.
trait OptionalExt<T> {
    /// Convert `QueryReturnedNoRows` into `Ok(None)`.
    fn optional(self) -> std::result::Result<Option<T>, rusqlite::Error>;
}

impl<T> OptionalExt<T> for std::result::Result<T, rusqlite::Error> {
    fn optional(self) -> std::result::Result<Option<T>, rusqlite::Error> {
        match self {
            Ok(val) => Ok(Some(val)),
            Err(rusqlite::Error::QueryReturnedNoRows) => Ok(None),
            Err(e) => Err(e),
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
