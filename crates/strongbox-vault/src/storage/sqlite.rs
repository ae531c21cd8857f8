use super::{RecordStore, StoreResult, VaultStore};
use crate::context::UserId;
use crate::error::StoreError;
use crate::record::{
    EnvelopeColumns, SensitiveFieldSet, SensitiveRecord, VaultRecord, LEGACY_KEY_VERSION,
};
use chrono::{DateTime, Utc};
use rusqlite::{params, Connection, ErrorCode, OptionalExtension, Row};
use std::path::Path;
use std::sync::{Mutex, MutexGuard};
use strongbox_crypto::ENVELOPE_V1;

const SCHEMA: &str = "
    CREATE TABLE IF NOT EXISTS user_vaults (
        user_id TEXT PRIMARY KEY,
        password_salt TEXT NOT NULL,
        public_key TEXT NOT NULL,
        encrypted_private_key TEXT NOT NULL,
        key_version INTEGER NOT NULL,
        created_at INTEGER NOT NULL,
        updated_at INTEGER NOT NULL
    );

    CREATE TABLE IF NOT EXISTS sensitive_records (
        seq INTEGER PRIMARY KEY AUTOINCREMENT,
        id TEXT NOT NULL,
        user_id TEXT NOT NULL,
        fields TEXT NOT NULL,
        is_encrypted INTEGER NOT NULL DEFAULT 0,
        encrypted_payload TEXT,
        wrapped_aes_key TEXT,
        encryption_iv TEXT,
        encryption_version INTEGER,
        created_at INTEGER NOT NULL,
        UNIQUE (user_id, id)
    );

    CREATE INDEX IF NOT EXISTS idx_records_pending
        ON sensitive_records(user_id, is_encrypted, encryption_version);

    CREATE TABLE IF NOT EXISTS user_settings (
        user_id TEXT PRIMARY KEY,
        privacy_mode_enabled INTEGER NOT NULL DEFAULT 0,
        privacy_mode_enabled_at INTEGER
    );
";

const RECORD_COLUMNS: &str = "id, user_id, fields, is_encrypted, encrypted_payload, \
                              wrapped_aes_key, encryption_iv, encryption_version";

/// SQLite-backed store for vault rows, records and the privacy-mode flag.
pub struct SqliteStore {
    conn: Mutex<Connection>,
}

impl SqliteStore {
    pub fn open(path: &Path) -> StoreResult<Self> {
        Self::with_connection(Connection::open(path)?)
    }

    pub fn open_in_memory() -> StoreResult<Self> {
        Self::with_connection(Connection::open_in_memory()?)
    }

    fn with_connection(conn: Connection) -> StoreResult<Self> {
        conn.execute_batch(SCHEMA)?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    fn conn(&self) -> StoreResult<MutexGuard<'_, Connection>> {
        self.conn
            .lock()
            .map_err(|_| StoreError::Unavailable("connection mutex poisoned".to_string()))
    }
}

fn is_constraint_violation(err: &rusqlite::Error) -> bool {
    matches!(
        err,
        rusqlite::Error::SqliteFailure(e, _) if e.code == ErrorCode::ConstraintViolation
    )
}

/// Raw row; the fields JSON is parsed outside the rusqlite row closure.
struct RecordRow {
    id: String,
    user_id: String,
    fields: String,
    envelope: EnvelopeColumns,
}

impl RecordRow {
    fn from_row(row: &Row<'_>) -> rusqlite::Result<Self> {
        Ok(Self {
            id: row.get(0)?,
            user_id: row.get(1)?,
            fields: row.get(2)?,
            envelope: EnvelopeColumns {
                is_encrypted: row.get(3)?,
                encrypted_payload: row.get(4)?,
                wrapped_aes_key: row.get(5)?,
                encryption_iv: row.get(6)?,
                encryption_version: row.get(7)?,
            },
        })
    }

    fn into_record(self) -> StoreResult<SensitiveRecord> {
        Ok(SensitiveRecord {
            id: self.id,
            user_id: UserId::new(self.user_id),
            fields: serde_json::from_str(&self.fields)?,
            envelope: self.envelope,
        })
    }
}

impl VaultStore for SqliteStore {
    fn load_vault(&self, user: &UserId) -> StoreResult<Option<VaultRecord>> {
        let conn = self.conn()?;
        let record = conn
            .query_row(
                "SELECT password_salt, public_key, encrypted_private_key, key_version
                 FROM user_vaults WHERE user_id = ?1",
                params![user.as_str()],
                |row| {
                    Ok(VaultRecord {
                        user_id: user.clone(),
                        password_salt: row.get(0)?,
                        public_key: row.get(1)?,
                        encrypted_private_key: row.get(2)?,
                        key_version: row.get(3)?,
                    })
                },
            )
            .optional()?;
        Ok(record)
    }

    fn insert_vault(&self, record: &VaultRecord) -> StoreResult<()> {
        let now = Utc::now().timestamp();
        let conn = self.conn()?;

        let result = conn.execute(
            "INSERT INTO user_vaults
             (user_id, password_salt, public_key, encrypted_private_key, key_version, created_at, updated_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?6)",
            params![
                record.user_id.as_str(),
                record.password_salt,
                record.public_key,
                record.encrypted_private_key,
                record.key_version,
                now
            ],
        );

        match result {
            Ok(_) => Ok(()),
            Err(e) if is_constraint_violation(&e) => Err(StoreError::Conflict(format!(
                "vault already exists for {}",
                record.user_id
            ))),
            Err(e) => Err(e.into()),
        }
    }

    fn update_wrapped_key(
        &self,
        user: &UserId,
        password_salt: &str,
        encrypted_private_key: &str,
    ) -> StoreResult<()> {
        let conn = self.conn()?;
        let changed = conn.execute(
            "UPDATE user_vaults
             SET password_salt = ?1, encrypted_private_key = ?2, updated_at = ?3
             WHERE user_id = ?4",
            params![
                password_salt,
                encrypted_private_key,
                Utc::now().timestamp(),
                user.as_str()
            ],
        )?;

        if changed == 0 {
            return Err(StoreError::NotFound(format!("vault for {}", user)));
        }
        Ok(())
    }

    fn upgrade_legacy_vault(&self, record: &VaultRecord) -> StoreResult<()> {
        let conn = self.conn()?;
        let changed = conn.execute(
            "UPDATE user_vaults
             SET public_key = ?1, encrypted_private_key = ?2, key_version = ?3, updated_at = ?4
             WHERE user_id = ?5 AND key_version = ?6 AND password_salt = ?7",
            params![
                record.public_key,
                record.encrypted_private_key,
                record.key_version,
                Utc::now().timestamp(),
                record.user_id.as_str(),
                LEGACY_KEY_VERSION,
                record.password_salt
            ],
        )?;

        if changed == 0 {
            return Err(StoreError::Conflict(format!(
                "no legacy vault to upgrade for {}",
                record.user_id
            )));
        }
        Ok(())
    }
}

impl RecordStore for SqliteStore {
    fn insert_record(&self, record: &SensitiveRecord) -> StoreResult<()> {
        let fields = serde_json::to_string(&record.fields)?;
        let conn = self.conn()?;
        let env = &record.envelope;

        let result = conn.execute(
            "INSERT INTO sensitive_records
             (id, user_id, fields, is_encrypted, encrypted_payload, wrapped_aes_key,
              encryption_iv, encryption_version, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)",
            params![
                record.id,
                record.user_id.as_str(),
                fields,
                env.is_encrypted,
                env.encrypted_payload,
                env.wrapped_aes_key,
                env.encryption_iv,
                env.encryption_version,
                Utc::now().timestamp()
            ],
        );

        match result {
            Ok(_) => Ok(()),
            Err(e) if is_constraint_violation(&e) => {
                Err(StoreError::Conflict(format!("record {}", record.id)))
            }
            Err(e) => Err(e.into()),
        }
    }

    fn get_record(&self, user: &UserId, id: &str) -> StoreResult<Option<SensitiveRecord>> {
        let row = {
            let conn = self.conn()?;
            conn.query_row(
                &format!(
                    "SELECT {} FROM sensitive_records WHERE user_id = ?1 AND id = ?2",
                    RECORD_COLUMNS
                ),
                params![user.as_str(), id],
                RecordRow::from_row,
            )
            .optional()?
        };
        row.map(RecordRow::into_record).transpose()
    }

    fn records_pending_encryption(&self, user: &UserId) -> StoreResult<Vec<SensitiveRecord>> {
        let rows = {
            let conn = self.conn()?;
            let mut stmt = conn.prepare(&format!(
                "SELECT {} FROM sensitive_records
                 WHERE user_id = ?1 AND (is_encrypted = 0 OR encryption_version = ?2)
                 ORDER BY seq",
                RECORD_COLUMNS
            ))?;
            let rows = stmt
                .query_map(params![user.as_str(), ENVELOPE_V1], RecordRow::from_row)?
                .collect::<std::result::Result<Vec<_>, _>>()?;
            rows
        };
        rows.into_iter().map(RecordRow::into_record).collect()
    }

    fn store_sealed(
        &self,
        user: &UserId,
        id: &str,
        envelope: &EnvelopeColumns,
        redacted: &SensitiveFieldSet,
    ) -> StoreResult<()> {
        let fields = serde_json::to_string(redacted)?;
        let mut conn = self.conn()?;
        let tx = conn.transaction()?;

        let changed = tx.execute(
            "UPDATE sensitive_records
             SET fields = ?1, is_encrypted = ?2, encrypted_payload = ?3, wrapped_aes_key = ?4,
                 encryption_iv = ?5, encryption_version = ?6
             WHERE user_id = ?7 AND id = ?8",
            params![
                fields,
                envelope.is_encrypted,
                envelope.encrypted_payload,
                envelope.wrapped_aes_key,
                envelope.encryption_iv,
                envelope.encryption_version,
                user.as_str(),
                id
            ],
        )?;

        if changed == 0 {
            // Dropping `tx` rolls back.
            return Err(StoreError::NotFound(format!("record {}", id)));
        }

        tx.commit()?;
        Ok(())
    }

    fn privacy_mode_enabled_at(&self, user: &UserId) -> StoreResult<Option<DateTime<Utc>>> {
        let conn = self.conn()?;
        let at: Option<Option<i64>> = conn
            .query_row(
                "SELECT privacy_mode_enabled_at FROM user_settings
                 WHERE user_id = ?1 AND privacy_mode_enabled = 1",
                params![user.as_str()],
                |row| row.get(0),
            )
            .optional()?;

        Ok(at.flatten().and_then(|secs| DateTime::<Utc>::from_timestamp(secs, 0)))
    }

    fn enable_privacy_mode(&self, user: &UserId, at: DateTime<Utc>) -> StoreResult<()> {
        let conn = self.conn()?;
        conn.execute(
            "INSERT INTO user_settings (user_id, privacy_mode_enabled, privacy_mode_enabled_at)
             VALUES (?1, 1, ?2)
             ON CONFLICT(user_id) DO UPDATE SET
                 privacy_mode_enabled = 1,
                 privacy_mode_enabled_at = excluded.privacy_mode_enabled_at",
            params![user.as_str(), at.timestamp()],
        )?;
        Ok(())
    }
}
