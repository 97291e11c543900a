// SQLite persistence gateway
//
// Schema is created through the same hand-rolled migration table the rest
// of the project uses elsewhere; statements are split on ';' because SQLite
// executes one statement at a time.

use std::collections::HashSet;

use chrono::{DateTime, NaiveDateTime, Utc};
use sqlx::sqlite::SqlitePoolOptions;
use sqlx::{Pool, Row, Sqlite};
use uuid::Uuid;

use super::{InsertOutcome, Store};
use crate::error::CoreError;
use crate::model::{
    AcceptedContact, Bunker, BunkerStatus, ContactRecord, DiplomaProgress, DiplomaType, Spot,
    SpotStatus, UserId,
};

const MIGRATION_001: &str = r#"
CREATE TABLE IF NOT EXISTS bunkers (
    reference TEXT PRIMARY KEY,
    name TEXT NOT NULL,
    latitude REAL NOT NULL,
    longitude REAL NOT NULL,
    status TEXT NOT NULL
);

CREATE TABLE IF NOT EXISTS accepted_contacts (
    id TEXT PRIMARY KEY,
    user_id INTEGER NOT NULL,
    callsign TEXT NOT NULL,
    worked_at TEXT NOT NULL,
    band TEXT NOT NULL,
    mode TEXT NOT NULL,
    rst_sent TEXT,
    rst_rcvd TEXT,
    freq_mhz REAL,
    bunker_ref TEXT NOT NULL,
    b2b INTEGER NOT NULL DEFAULT 0,
    fingerprint TEXT NOT NULL,
    accepted_at TEXT NOT NULL
);

CREATE UNIQUE INDEX IF NOT EXISTS idx_contacts_user_fingerprint
    ON accepted_contacts(user_id, fingerprint);

CREATE TABLE IF NOT EXISTS diploma_types (
    id INTEGER PRIMARY KEY,
    name TEXT NOT NULL,
    rule TEXT NOT NULL
);

CREATE TABLE IF NOT EXISTS diploma_progress (
    user_id INTEGER NOT NULL,
    diploma_id INTEGER NOT NULL,
    count INTEGER NOT NULL,
    counted_keys TEXT NOT NULL,
    completed INTEGER NOT NULL DEFAULT 0,
    version INTEGER NOT NULL,
    updated_at TEXT NOT NULL,
    PRIMARY KEY (user_id, diploma_id)
);

CREATE TABLE IF NOT EXISTS spots (
    id TEXT PRIMARY KEY,
    user_id INTEGER NOT NULL,
    activator_callsign TEXT NOT NULL,
    bunker_ref TEXT NOT NULL,
    band TEXT NOT NULL,
    mode TEXT NOT NULL,
    freq_mhz REAL,
    comment TEXT NOT NULL DEFAULT '',
    created_at TEXT NOT NULL,
    expires_at TEXT NOT NULL,
    respot_count INTEGER NOT NULL DEFAULT 0,
    status TEXT NOT NULL DEFAULT 'active'
);

CREATE INDEX IF NOT EXISTS idx_spots_status_expiry ON spots(status, expires_at);

CREATE TABLE IF NOT EXISTS spot_history (
    id TEXT PRIMARY KEY,
    user_id INTEGER NOT NULL,
    activator_callsign TEXT NOT NULL,
    bunker_ref TEXT NOT NULL,
    band TEXT NOT NULL,
    mode TEXT NOT NULL,
    freq_mhz REAL,
    comment TEXT NOT NULL,
    created_at TEXT NOT NULL,
    expires_at TEXT NOT NULL,
    respot_count INTEGER NOT NULL,
    expired_at TEXT NOT NULL
)
"#;

#[derive(Debug, Clone)]
pub struct SqliteStore {
    pool: Pool<Sqlite>,
}

impl SqliteStore {
    /// Connect to a database file, e.g. "sqlite:bota.db?mode=rwc".
    pub async fn connect(url: &str) -> Result<Self, CoreError> {
        let pool = SqlitePoolOptions::new()
            .max_connections(5)
            .connect(url)
            .await?;
        sqlx::query("PRAGMA journal_mode=WAL;").execute(&pool).await?;
        let store = Self { pool };
        store.run_migrations().await?;
        Ok(store)
    }

    /// Private in-memory database; a single connection so every caller
    /// sees the same data.
    pub async fn in_memory() -> Result<Self, CoreError> {
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect("sqlite::memory:")
            .await?;
        let store = Self { pool };
        store.run_migrations().await?;
        Ok(store)
    }

    async fn run_migrations(&self) -> Result<(), CoreError> {
        sqlx::query(
            "CREATE TABLE IF NOT EXISTS _migrations (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                name TEXT NOT NULL UNIQUE,
                applied_at TEXT NOT NULL
            )",
        )
        .execute(&self.pool)
        .await?;

        let applied: i64 =
            sqlx::query_scalar("SELECT COUNT(*) FROM _migrations WHERE name = 'migration_001'")
                .fetch_one(&self.pool)
                .await?;
        if applied > 0 {
            return Ok(());
        }

        log::info!("applying migration_001");
        for statement in MIGRATION_001.split(';') {
            let stmt = statement.trim();
            if !stmt.is_empty() {
                sqlx::query(stmt).execute(&self.pool).await?;
            }
        }
        sqlx::query("INSERT INTO _migrations (name, applied_at) VALUES ('migration_001', ?)")
            .bind(fmt_dt(Utc::now()))
            .execute(&self.pool)
            .await?;
        Ok(())
    }
}

fn fmt_dt(dt: DateTime<Utc>) -> String {
    dt.format("%Y-%m-%d %H:%M:%S").to_string()
}

fn parse_dt(s: &str) -> Result<DateTime<Utc>, CoreError> {
    NaiveDateTime::parse_from_str(s, "%Y-%m-%d %H:%M:%S")
        .map(|n| n.and_utc())
        .map_err(|e| CoreError::Data(format!("bad timestamp {s:?}: {e}")))
}

fn parse_uuid(s: &str) -> Result<Uuid, CoreError> {
    Uuid::parse_str(s).map_err(|e| CoreError::Data(format!("bad uuid {s:?}: {e}")))
}

fn contact_from_row(row: &sqlx::sqlite::SqliteRow) -> Result<AcceptedContact, CoreError> {
    Ok(AcceptedContact {
        id: parse_uuid(&row.get::<String, _>("id"))?,
        user_id: row.get::<i64, _>("user_id"),
        contact: ContactRecord {
            callsign: row.get("callsign"),
            worked_at: parse_dt(&row.get::<String, _>("worked_at"))?,
            band: row.get("band"),
            mode: row.get("mode"),
            rst_sent: row.get("rst_sent"),
            rst_rcvd: row.get("rst_rcvd"),
            freq_mhz: row.get("freq_mhz"),
            bunker_ref: row.get("bunker_ref"),
            b2b: row.get::<i64, _>("b2b") != 0,
            fingerprint: row.get("fingerprint"),
        },
        accepted_at: parse_dt(&row.get::<String, _>("accepted_at"))?,
    })
}

fn spot_from_row(row: &sqlx::sqlite::SqliteRow) -> Result<Spot, CoreError> {
    let status_raw: String = row.get("status");
    Ok(Spot {
        id: parse_uuid(&row.get::<String, _>("id"))?,
        user_id: row.get::<i64, _>("user_id"),
        activator_callsign: row.get("activator_callsign"),
        bunker_ref: row.get("bunker_ref"),
        band: row.get("band"),
        mode: row.get("mode"),
        freq_mhz: row.get("freq_mhz"),
        comment: row.get("comment"),
        created_at: parse_dt(&row.get::<String, _>("created_at"))?,
        expires_at: parse_dt(&row.get::<String, _>("expires_at"))?,
        respot_count: row.get::<i64, _>("respot_count") as u32,
        status: SpotStatus::parse(&status_raw)
            .ok_or_else(|| CoreError::Data(format!("bad spot status {status_raw:?}")))?,
    })
}

fn progress_from_row(row: &sqlx::sqlite::SqliteRow) -> Result<DiplomaProgress, CoreError> {
    let keys_json: String = row.get("counted_keys");
    Ok(DiplomaProgress {
        user_id: row.get::<i64, _>("user_id"),
        diploma_id: row.get::<i64, _>("diploma_id"),
        count: row.get::<i64, _>("count") as u32,
        counted_keys: serde_json::from_str(&keys_json)?,
        completed: row.get::<i64, _>("completed") != 0,
        version: row.get::<i64, _>("version"),
        updated_at: parse_dt(&row.get::<String, _>("updated_at"))?,
    })
}

impl Store for SqliteStore {
    async fn insert_contact_if_new(
        &self,
        contact: &AcceptedContact,
    ) -> Result<InsertOutcome, CoreError> {
        let c = &contact.contact;
        let result = sqlx::query(
            "INSERT OR IGNORE INTO accepted_contacts (
                id, user_id, callsign, worked_at, band, mode,
                rst_sent, rst_rcvd, freq_mhz, bunker_ref, b2b,
                fingerprint, accepted_at
            ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)",
        )
        .bind(contact.id.to_string())
        .bind(contact.user_id)
        .bind(&c.callsign)
        .bind(fmt_dt(c.worked_at))
        .bind(&c.band)
        .bind(&c.mode)
        .bind(&c.rst_sent)
        .bind(&c.rst_rcvd)
        .bind(c.freq_mhz)
        .bind(&c.bunker_ref)
        .bind(c.b2b as i64)
        .bind(&c.fingerprint)
        .bind(fmt_dt(contact.accepted_at))
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 1 {
            Ok(InsertOutcome::Inserted)
        } else {
            Ok(InsertOutcome::AlreadyPresent)
        }
    }

    async fn fingerprints_for_user(&self, user: UserId) -> Result<HashSet<String>, CoreError> {
        let rows: Vec<String> =
            sqlx::query_scalar("SELECT fingerprint FROM accepted_contacts WHERE user_id = ?")
                .bind(user)
                .fetch_all(&self.pool)
                .await?;
        Ok(rows.into_iter().collect())
    }

    async fn accepted_contacts(&self, user: UserId) -> Result<Vec<AcceptedContact>, CoreError> {
        let rows = sqlx::query(
            "SELECT * FROM accepted_contacts WHERE user_id = ? ORDER BY worked_at, fingerprint",
        )
        .bind(user)
        .fetch_all(&self.pool)
        .await?;
        rows.iter().map(contact_from_row).collect()
    }

    async fn bunker_by_ref(&self, reference: &str) -> Result<Option<Bunker>, CoreError> {
        let row = sqlx::query("SELECT * FROM bunkers WHERE reference = ?")
            .bind(reference)
            .fetch_optional(&self.pool)
            .await?;
        row.map(|row| {
            let status_raw: String = row.get("status");
            Ok(Bunker {
                reference: row.get("reference"),
                name: row.get("name"),
                latitude: row.get("latitude"),
                longitude: row.get("longitude"),
                status: BunkerStatus::parse(&status_raw)
                    .ok_or_else(|| CoreError::Data(format!("bad bunker status {status_raw:?}")))?,
            })
        })
        .transpose()
    }

    async fn upsert_bunker(&self, bunker: &Bunker) -> Result<(), CoreError> {
        sqlx::query(
            "INSERT INTO bunkers (reference, name, latitude, longitude, status)
             VALUES (?, ?, ?, ?, ?)
             ON CONFLICT(reference) DO UPDATE SET
                 name = excluded.name,
                 latitude = excluded.latitude,
                 longitude = excluded.longitude,
                 status = excluded.status",
        )
        .bind(&bunker.reference)
        .bind(&bunker.name)
        .bind(bunker.latitude)
        .bind(bunker.longitude)
        .bind(bunker.status.as_str())
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn diploma_types(&self) -> Result<Vec<DiplomaType>, CoreError> {
        let rows = sqlx::query("SELECT id, name, rule FROM diploma_types ORDER BY id")
            .fetch_all(&self.pool)
            .await?;
        rows.iter()
            .map(|row| {
                let rule_json: String = row.get("rule");
                Ok(DiplomaType {
                    id: row.get::<i64, _>("id"),
                    name: row.get("name"),
                    rule: serde_json::from_str(&rule_json)?,
                })
            })
            .collect()
    }

    async fn upsert_diploma_type(&self, diploma: &DiplomaType) -> Result<(), CoreError> {
        sqlx::query(
            "INSERT INTO diploma_types (id, name, rule) VALUES (?, ?, ?)
             ON CONFLICT(id) DO UPDATE SET name = excluded.name, rule = excluded.rule",
        )
        .bind(diploma.id)
        .bind(&diploma.name)
        .bind(serde_json::to_string(&diploma.rule)?)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn load_progress(
        &self,
        user: UserId,
        diploma_id: i64,
    ) -> Result<Option<DiplomaProgress>, CoreError> {
        let row = sqlx::query("SELECT * FROM diploma_progress WHERE user_id = ? AND diploma_id = ?")
            .bind(user)
            .bind(diploma_id)
            .fetch_optional(&self.pool)
            .await?;
        row.as_ref().map(progress_from_row).transpose()
    }

    async fn progress_rows(&self, user: UserId) -> Result<Vec<DiplomaProgress>, CoreError> {
        let rows = sqlx::query("SELECT * FROM diploma_progress WHERE user_id = ? ORDER BY diploma_id")
            .bind(user)
            .fetch_all(&self.pool)
            .await?;
        rows.iter().map(progress_from_row).collect()
    }

    async fn save_progress(&self, row: &DiplomaProgress) -> Result<bool, CoreError> {
        let keys = serde_json::to_string(&row.counted_keys)?;
        let affected = if row.version == 0 {
            sqlx::query(
                "INSERT OR IGNORE INTO diploma_progress
                     (user_id, diploma_id, count, counted_keys, completed, version, updated_at)
                 VALUES (?, ?, ?, ?, ?, 1, ?)",
            )
            .bind(row.user_id)
            .bind(row.diploma_id)
            .bind(row.count as i64)
            .bind(&keys)
            .bind(row.completed as i64)
            .bind(fmt_dt(row.updated_at))
            .execute(&self.pool)
            .await?
            .rows_affected()
        } else {
            sqlx::query(
                "UPDATE diploma_progress
                 SET count = ?, counted_keys = ?, completed = ?,
                     version = version + 1, updated_at = ?
                 WHERE user_id = ? AND diploma_id = ? AND version = ?",
            )
            .bind(row.count as i64)
            .bind(&keys)
            .bind(row.completed as i64)
            .bind(fmt_dt(row.updated_at))
            .bind(row.user_id)
            .bind(row.diploma_id)
            .bind(row.version)
            .execute(&self.pool)
            .await?
            .rows_affected()
        };
        Ok(affected == 1)
    }

    async fn insert_spot(&self, spot: &Spot) -> Result<(), CoreError> {
        sqlx::query(
            "INSERT INTO spots (
                id, user_id, activator_callsign, bunker_ref, band, mode,
                freq_mhz, comment, created_at, expires_at, respot_count, status
            ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)",
        )
        .bind(spot.id.to_string())
        .bind(spot.user_id)
        .bind(&spot.activator_callsign)
        .bind(&spot.bunker_ref)
        .bind(&spot.band)
        .bind(&spot.mode)
        .bind(spot.freq_mhz)
        .bind(&spot.comment)
        .bind(fmt_dt(spot.created_at))
        .bind(fmt_dt(spot.expires_at))
        .bind(spot.respot_count as i64)
        .bind(spot.status.as_str())
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn find_active_spot(
        &self,
        activator_callsign: &str,
        bunker_ref: &str,
        freq_mhz: Option<f64>,
        tolerance_mhz: f64,
        now: DateTime<Utc>,
    ) -> Result<Option<Spot>, CoreError> {
        let row = sqlx::query(
            "SELECT * FROM spots
             WHERE status = 'active' AND activator_callsign = ? AND bunker_ref = ?
               AND expires_at > ?
               AND (? IS NULL OR freq_mhz IS NULL OR freq_mhz BETWEEN ? AND ?)
             LIMIT 1",
        )
        .bind(activator_callsign)
        .bind(bunker_ref)
        .bind(fmt_dt(now))
        .bind(freq_mhz)
        .bind(freq_mhz.map(|f| f - tolerance_mhz))
        .bind(freq_mhz.map(|f| f + tolerance_mhz))
        .fetch_optional(&self.pool)
        .await?;
        row.as_ref().map(spot_from_row).transpose()
    }

    async fn touch_spot(
        &self,
        id: Uuid,
        expires_at: DateTime<Utc>,
        freq_mhz: Option<f64>,
        comment: &str,
    ) -> Result<bool, CoreError> {
        let affected = sqlx::query(
            "UPDATE spots
             SET expires_at = ?, freq_mhz = COALESCE(?, freq_mhz), comment = ?,
                 respot_count = respot_count + 1
             WHERE id = ? AND status = 'active'",
        )
        .bind(fmt_dt(expires_at))
        .bind(freq_mhz)
        .bind(comment)
        .bind(id.to_string())
        .execute(&self.pool)
        .await?
        .rows_affected();
        Ok(affected == 1)
    }

    async fn list_active_spots(&self, now: DateTime<Utc>) -> Result<Vec<Spot>, CoreError> {
        let rows = sqlx::query(
            "SELECT * FROM spots
             WHERE status = 'active' AND expires_at > ?
             ORDER BY created_at DESC, rowid DESC",
        )
        .bind(fmt_dt(now))
        .fetch_all(&self.pool)
        .await?;
        rows.iter().map(spot_from_row).collect()
    }

    async fn due_spots(&self, now: DateTime<Utc>) -> Result<Vec<Uuid>, CoreError> {
        let ids: Vec<String> =
            sqlx::query_scalar("SELECT id FROM spots WHERE status = 'active' AND expires_at <= ?")
                .bind(fmt_dt(now))
                .fetch_all(&self.pool)
                .await?;
        ids.iter().map(|s| parse_uuid(s)).collect()
    }

    async fn expire_spot(&self, id: Uuid, expired_at: DateTime<Utc>) -> Result<bool, CoreError> {
        let mut tx = self.pool.begin().await?;
        let claimed = sqlx::query(
            "UPDATE spots SET status = 'expired' WHERE id = ? AND status = 'active'",
        )
        .bind(id.to_string())
        .execute(&mut *tx)
        .await?
        .rows_affected()
            == 1;
        if claimed {
            sqlx::query(
                "INSERT INTO spot_history (
                    id, user_id, activator_callsign, bunker_ref, band, mode,
                    freq_mhz, comment, created_at, expires_at, respot_count, expired_at
                )
                SELECT id, user_id, activator_callsign, bunker_ref, band, mode,
                       freq_mhz, comment, created_at, expires_at, respot_count, ?
                FROM spots WHERE id = ?",
            )
            .bind(fmt_dt(expired_at))
            .bind(id.to_string())
            .execute(&mut *tx)
            .await?;
        }
        tx.commit().await?;
        Ok(claimed)
    }

    async fn spot_history_count(&self, bunker_ref: &str) -> Result<i64, CoreError> {
        let count: i64 =
            sqlx::query_scalar("SELECT COUNT(*) FROM spot_history WHERE bunker_ref = ?")
                .bind(bunker_ref)
                .fetch_one(&self.pool)
                .await?;
        Ok(count)
    }
}
