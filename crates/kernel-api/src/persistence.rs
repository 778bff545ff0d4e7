use std::fmt;
use std::path::Path;

use chrono::{DateTime, Utc};
use contracts::{
    Account, HolderStanding, LootDraft, LootId, LootItem, TierName, UniverseRecord, UserId,
};
use kernel_core::store::{sort_inventory, StoreError, UniverseStore};
use rusqlite::{params, Connection, OptionalExtension, Transaction};
use tracing::debug;

#[derive(Debug)]
pub enum PersistenceError {
    Sqlite(rusqlite::Error),
    Corrupt {
        column: &'static str,
        value: String,
    },
}

impl fmt::Display for PersistenceError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Sqlite(err) => write!(f, "sqlite error: {err}"),
            Self::Corrupt { column, value } => {
                write!(f, "corrupt value {value:?} in column {column}")
            }
        }
    }
}

impl std::error::Error for PersistenceError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::Sqlite(err) => Some(err),
            Self::Corrupt { .. } => None,
        }
    }
}

impl From<rusqlite::Error> for PersistenceError {
    fn from(value: rusqlite::Error) -> Self {
        Self::Sqlite(value)
    }
}

impl From<PersistenceError> for StoreError {
    fn from(value: PersistenceError) -> Self {
        match value {
            PersistenceError::Sqlite(rusqlite::Error::SqliteFailure(code, _))
                if matches!(
                    code.code,
                    rusqlite::ErrorCode::DatabaseBusy
                        | rusqlite::ErrorCode::DatabaseLocked
                        | rusqlite::ErrorCode::CannotOpen
                        | rusqlite::ErrorCode::ReadOnly
                ) =>
            {
                Self::Unavailable(code.to_string())
            }
            other => Self::Backend(Box::new(other)),
        }
    }
}

/// SQLite-backed [`UniverseStore`]. Every `commit_*` runs in one transaction.
#[derive(Debug)]
pub struct SqliteUniverseStore {
    conn: Connection,
}

impl SqliteUniverseStore {
    pub fn open(path: impl AsRef<Path>) -> Result<Self, PersistenceError> {
        let conn = Connection::open(path)?;
        Self::from_connection(conn)
    }

    pub fn open_in_memory() -> Result<Self, PersistenceError> {
        Self::from_connection(Connection::open_in_memory()?)
    }

    fn from_connection(conn: Connection) -> Result<Self, PersistenceError> {
        let mut store = Self { conn };
        store.configure()?;
        store.migrate()?;
        Ok(store)
    }

    pub fn loot_count(&self) -> Result<u64, PersistenceError> {
        let count: i64 = self
            .conn
            .query_row("SELECT COUNT(*) FROM loot_items", [], |row| row.get(0))?;
        to_u64(count, "loot_items.count")
    }

    /// Appends one item outside any ledger flow, for seeding and admin repair.
    pub fn insert_loot(&mut self, draft: &LootDraft) -> Result<LootItem, PersistenceError> {
        let tx = self.conn.transaction()?;
        let item = insert_loot(&tx, draft)?;
        tx.commit()?;
        Ok(item)
    }

    fn read_universe(&self) -> Result<Option<UniverseRecord>, PersistenceError> {
        let row = self
            .conn
            .query_row(
                "SELECT instability, collapse_threshold, last_collapse_at, total_messages, collapse_count
                 FROM universe_state
                 WHERE id = 1",
                [],
                |row| {
                    Ok((
                        row.get::<_, f64>(0)?,
                        row.get::<_, f64>(1)?,
                        row.get::<_, Option<DateTime<Utc>>>(2)?,
                        row.get::<_, i64>(3)?,
                        row.get::<_, i64>(4)?,
                    ))
                },
            )
            .optional()?;

        let Some((instability, collapse_threshold, last_collapse_at, messages, collapses)) = row
        else {
            return Ok(None);
        };

        Ok(Some(UniverseRecord {
            instability,
            collapse_threshold,
            last_collapse_at,
            total_messages: to_u64(messages, "universe_state.total_messages")?,
            collapse_count: to_u64(collapses, "universe_state.collapse_count")?,
        }))
    }

    fn read_account(&self, user_id: UserId) -> Result<Option<Account>, PersistenceError> {
        let row = self
            .conn
            .query_row(
                "SELECT credits, total_pulls, total_stabilizations
                 FROM accounts
                 WHERE user_id = ?1",
                params![user_id.to_string()],
                |row| {
                    Ok((
                        row.get::<_, i64>(0)?,
                        row.get::<_, i64>(1)?,
                        row.get::<_, i64>(2)?,
                    ))
                },
            )
            .optional()?;

        let Some((credits, pulls, stabilizations)) = row else {
            return Ok(None);
        };

        Ok(Some(Account {
            user_id,
            credits,
            total_pulls: to_u64(pulls, "accounts.total_pulls")?,
            total_stabilizations: to_u64(stabilizations, "accounts.total_stabilizations")?,
        }))
    }

    fn read_loot_ids(&self) -> Result<Vec<LootId>, PersistenceError> {
        let mut stmt = self
            .conn
            .prepare("SELECT loot_id FROM loot_items ORDER BY loot_id ASC")?;
        let rows = stmt.query_map([], |row| row.get::<_, i64>(0))?;

        let mut ids = Vec::new();
        for row in rows {
            ids.push(to_u64(row?, "loot_items.loot_id")?);
        }
        Ok(ids)
    }

    fn read_inventory(&self, user_id: UserId) -> Result<Vec<LootItem>, PersistenceError> {
        let mut stmt = self.conn.prepare(
            "SELECT loot_id, tier, item_name, acquired_at
             FROM loot_items
             WHERE owner_id = ?1",
        )?;
        let rows = stmt.query_map(params![user_id.to_string()], |row| {
            Ok((
                row.get::<_, i64>(0)?,
                row.get::<_, String>(1)?,
                row.get::<_, String>(2)?,
                row.get::<_, DateTime<Utc>>(3)?,
            ))
        })?;

        let mut items = Vec::new();
        for row in rows {
            let (loot_id, tier, item_name, acquired_at) = row?;
            items.push(LootItem {
                loot_id: to_u64(loot_id, "loot_items.loot_id")?,
                owner_id: user_id,
                tier: parse_tier(&tier)?,
                item_name,
                acquired_at,
            });
        }
        sort_inventory(&mut items);
        Ok(items)
    }

    fn read_top_holders(&self, limit: usize) -> Result<Vec<HolderStanding>, PersistenceError> {
        let mut stmt = self.conn.prepare(
            "SELECT owner_id, COUNT(*) AS item_count
             FROM loot_items
             GROUP BY owner_id",
        )?;
        let rows = stmt.query_map([], |row| {
            Ok((row.get::<_, String>(0)?, row.get::<_, i64>(1)?))
        })?;

        let mut standings = Vec::new();
        for row in rows {
            let (owner_id, item_count) = row?;
            standings.push(HolderStanding {
                user_id: parse_user_id(&owner_id)?,
                item_count: to_u64(item_count, "loot_items.count")?,
            });
        }
        // Text ids do not sort numerically in SQL.
        standings.sort_by(|left, right| {
            right
                .item_count
                .cmp(&left.item_count)
                .then_with(|| left.user_id.cmp(&right.user_id))
        });
        standings.truncate(limit);
        Ok(standings)
    }

    fn configure(&mut self) -> Result<(), PersistenceError> {
        self.conn.pragma_update(None, "journal_mode", "WAL")?;
        self.conn.pragma_update(None, "foreign_keys", "ON")?;
        Ok(())
    }

    fn migrate(&mut self) -> Result<(), PersistenceError> {
        self.conn.execute_batch(
            "
            CREATE TABLE IF NOT EXISTS schema_migrations (
                version INTEGER PRIMARY KEY,
                name TEXT NOT NULL,
                applied_at TEXT NOT NULL
            );

            CREATE TABLE IF NOT EXISTS accounts (
                user_id TEXT PRIMARY KEY,
                credits INTEGER NOT NULL CHECK (credits >= 0),
                total_pulls INTEGER NOT NULL DEFAULT 0,
                total_stabilizations INTEGER NOT NULL DEFAULT 0
            );

            CREATE TABLE IF NOT EXISTS loot_items (
                loot_id INTEGER PRIMARY KEY AUTOINCREMENT,
                owner_id TEXT NOT NULL,
                tier TEXT NOT NULL,
                item_name TEXT NOT NULL,
                acquired_at TEXT NOT NULL
            );

            CREATE TABLE IF NOT EXISTS universe_state (
                id INTEGER PRIMARY KEY CHECK (id = 1),
                instability REAL NOT NULL CHECK (instability >= 0 AND instability <= 100),
                collapse_threshold REAL NOT NULL,
                last_collapse_at TEXT,
                total_messages INTEGER NOT NULL DEFAULT 0,
                collapse_count INTEGER NOT NULL DEFAULT 0
            );

            CREATE INDEX IF NOT EXISTS idx_loot_items_owner ON loot_items(owner_id);
            ",
        )?;

        self.conn.execute(
            "INSERT OR IGNORE INTO schema_migrations(version, name, applied_at)
             VALUES(1, 'initial_v1', ?1)",
            params![Utc::now()],
        )?;

        Ok(())
    }
}

impl UniverseStore for SqliteUniverseStore {
    fn load_universe(&self) -> Result<Option<UniverseRecord>, StoreError> {
        Ok(self.read_universe()?)
    }

    fn save_universe(&mut self, universe: &UniverseRecord) -> Result<(), StoreError> {
        let tx = self.conn.transaction().map_err(PersistenceError::from)?;
        upsert_universe(&tx, universe)?;
        tx.commit().map_err(PersistenceError::from)?;
        Ok(())
    }

    fn load_account(&self, user_id: UserId) -> Result<Option<Account>, StoreError> {
        Ok(self.read_account(user_id)?)
    }

    fn save_account(&mut self, account: &Account) -> Result<(), StoreError> {
        let tx = self.conn.transaction().map_err(PersistenceError::from)?;
        upsert_account(&tx, account)?;
        tx.commit().map_err(PersistenceError::from)?;
        Ok(())
    }

    fn commit_pull(
        &mut self,
        account: &Account,
        draft: &LootDraft,
        universe: &UniverseRecord,
    ) -> Result<LootItem, StoreError> {
        let tx = self.conn.transaction().map_err(PersistenceError::from)?;
        let item = insert_loot(&tx, draft)?;
        upsert_universe(&tx, universe)?;
        upsert_account(&tx, account)?;
        tx.commit().map_err(PersistenceError::from)?;
        Ok(item)
    }

    fn commit_stabilize(
        &mut self,
        account: &Account,
        universe: &UniverseRecord,
    ) -> Result<(), StoreError> {
        let tx = self.conn.transaction().map_err(PersistenceError::from)?;
        upsert_universe(&tx, universe)?;
        upsert_account(&tx, account)?;
        tx.commit().map_err(PersistenceError::from)?;
        Ok(())
    }

    fn loot_ids(&self) -> Result<Vec<LootId>, StoreError> {
        Ok(self.read_loot_ids()?)
    }

    fn commit_collapse(
        &mut self,
        removed: &[LootId],
        universe: &UniverseRecord,
    ) -> Result<(), StoreError> {
        let tx = self.conn.transaction().map_err(PersistenceError::from)?;
        {
            let mut delete = tx
                .prepare("DELETE FROM loot_items WHERE loot_id = ?1")
                .map_err(PersistenceError::from)?;
            for loot_id in removed {
                delete
                    .execute(params![to_i64(*loot_id)])
                    .map_err(PersistenceError::from)?;
            }
        }
        upsert_universe(&tx, universe)?;
        tx.commit().map_err(PersistenceError::from)?;
        debug!(removed = removed.len(), "collapse committed to sqlite");
        Ok(())
    }

    fn inventory(&self, user_id: UserId) -> Result<Vec<LootItem>, StoreError> {
        Ok(self.read_inventory(user_id)?)
    }

    fn top_holders(&self, limit: usize) -> Result<Vec<HolderStanding>, StoreError> {
        Ok(self.read_top_holders(limit)?)
    }
}

fn upsert_universe(
    tx: &Transaction<'_>,
    universe: &UniverseRecord,
) -> Result<(), PersistenceError> {
    tx.execute(
        "INSERT INTO universe_state (
            id,
            instability,
            collapse_threshold,
            last_collapse_at,
            total_messages,
            collapse_count
        ) VALUES (1, ?1, ?2, ?3, ?4, ?5)
        ON CONFLICT(id) DO UPDATE SET
            instability = excluded.instability,
            collapse_threshold = excluded.collapse_threshold,
            last_collapse_at = excluded.last_collapse_at,
            total_messages = excluded.total_messages,
            collapse_count = excluded.collapse_count",
        params![
            universe.instability,
            universe.collapse_threshold,
            universe.last_collapse_at,
            to_i64(universe.total_messages),
            to_i64(universe.collapse_count),
        ],
    )?;
    Ok(())
}

fn upsert_account(tx: &Transaction<'_>, account: &Account) -> Result<(), PersistenceError> {
    tx.execute(
        "INSERT INTO accounts (user_id, credits, total_pulls, total_stabilizations)
         VALUES (?1, ?2, ?3, ?4)
         ON CONFLICT(user_id) DO UPDATE SET
            credits = excluded.credits,
            total_pulls = excluded.total_pulls,
            total_stabilizations = excluded.total_stabilizations",
        params![
            account.user_id.to_string(),
            account.credits,
            to_i64(account.total_pulls),
            to_i64(account.total_stabilizations),
        ],
    )?;
    Ok(())
}

fn insert_loot(tx: &Transaction<'_>, draft: &LootDraft) -> Result<LootItem, PersistenceError> {
    tx.execute(
        "INSERT INTO loot_items (owner_id, tier, item_name, acquired_at)
         VALUES (?1, ?2, ?3, ?4)",
        params![
            draft.owner_id.to_string(),
            draft.tier.as_str(),
            draft.item_name.as_str(),
            draft.acquired_at,
        ],
    )?;
    let loot_id = to_u64(tx.last_insert_rowid(), "loot_items.loot_id")?;
    Ok(LootItem::from_draft(loot_id, draft.clone()))
}

fn to_i64(value: u64) -> i64 {
    i64::try_from(value).unwrap_or(i64::MAX)
}

fn to_u64(value: i64, column: &'static str) -> Result<u64, PersistenceError> {
    u64::try_from(value).map_err(|_| PersistenceError::Corrupt {
        column,
        value: value.to_string(),
    })
}

fn parse_user_id(raw: &str) -> Result<UserId, PersistenceError> {
    raw.parse::<UserId>().map_err(|_| PersistenceError::Corrupt {
        column: "loot_items.owner_id",
        value: raw.to_string(),
    })
}

fn parse_tier(raw: &str) -> Result<TierName, PersistenceError> {
    TierName::parse(raw).ok_or_else(|| PersistenceError::Corrupt {
        column: "loot_items.tier",
        value: raw.to_string(),
    })
}
