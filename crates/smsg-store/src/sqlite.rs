//! SQLite implementation of the Store trait.
//!
//! The primary storage backend. Uses rusqlite with bundled SQLite, wrapped
//! in async via tokio::spawn_blocking.

use std::path::Path;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use bytes::Bytes;
use rusqlite::types::{Type, Value};
use rusqlite::{params, params_from_iter, Connection, OptionalExtension, Row};
use tracing::debug;

use smsg_core::{
    Address, Envelope, EnvelopeHeader, MessageHash, PublicKey, RecipientTag, Txid,
};

use crate::error::{Result, StoreError};
use crate::migration;
use crate::traits::{
    EnvelopeMeta, InsertResult, KeyKind, LocalKeyRecord, OutboxEntry, OutboxState, QueryFilter,
    Store, StoredEnvelope,
};

const ENVELOPE_COLUMNS: &str = "seq, hash, version, timestamp, ttl_periods, sender, \
     recipient_tag, claims_paid, ciphertext, funding_txid, paid, read, received_at, \
     expires_at, bucket";

const LOCAL_KEY_COLUMNS: &str =
    "address, public_key, kind, receiving_enabled, label, secret, created_at";

const OUTBOX_COLUMNS: &str = "hash, envelope, state, fee, txid, created_at, updated_at";

/// SQLite-based store implementation.
///
/// Thread-safe via internal Mutex. All operations use spawn_blocking
/// to avoid blocking the async runtime.
pub struct SqliteStore {
    conn: Arc<Mutex<Connection>>,
}

impl SqliteStore {
    /// Open a SQLite database at the given path.
    ///
    /// Creates the file and runs migrations if it doesn't exist.
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let mut conn = Connection::open(path)?;
        migration::migrate(&mut conn)?;
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    /// Open an in-memory SQLite database.
    pub fn open_memory() -> Result<Self> {
        let mut conn = Connection::open_in_memory()?;
        migration::migrate(&mut conn)?;
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    /// Run a blocking operation on the connection off the async runtime.
    async fn run<F, T>(&self, f: F) -> Result<T>
    where
        F: FnOnce(&mut Connection) -> Result<T> + Send + 'static,
        T: Send + 'static,
    {
        let conn = self.conn.clone();

        tokio::task::spawn_blocking(move || {
            let mut conn = conn
                .lock()
                .map_err(|e| StoreError::LockPoisoned(e.to_string()))?;
            f(&mut conn)
        })
        .await
        .map_err(|e| StoreError::TaskFailed(e.to_string()))?
    }
}

/// Current time in seconds.
pub(crate) fn now_secs() -> i64 {
    use std::time::{SystemTime, UNIX_EPOCH};
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs() as i64)
        .unwrap_or(0)
}

fn blob32(row: &Row<'_>, column: &str) -> rusqlite::Result<[u8; 32]> {
    let bytes: Vec<u8> = row.get(column)?;
    bytes
        .try_into()
        .map_err(|_| rusqlite::Error::InvalidColumnType(0, column.into(), Type::Blob))
}

fn opt_blob32(row: &Row<'_>, column: &str) -> rusqlite::Result<Option<[u8; 32]>> {
    let bytes: Option<Vec<u8>> = row.get(column)?;
    bytes
        .map(|b| {
            b.try_into()
                .map_err(|_| rusqlite::Error::InvalidColumnType(0, column.into(), Type::Blob))
        })
        .transpose()
}

fn parse_address(text: &str) -> rusqlite::Result<Address> {
    Address::parse(text)
        .map_err(|e| rusqlite::Error::FromSqlConversionFailure(0, Type::Text, Box::new(e)))
}

fn row_to_stored(row: &Row<'_>) -> rusqlite::Result<StoredEnvelope> {
    let sender: Option<String> = row.get("sender")?;
    let sender = sender.as_deref().map(parse_address).transpose()?;

    let header = EnvelopeHeader {
        version: row.get("version")?,
        timestamp: row.get("timestamp")?,
        ttl_periods: row.get("ttl_periods")?,
        sender,
        recipient_tag: RecipientTag(blob32(row, "recipient_tag")?),
        paid: row.get("claims_paid")?,
    };
    let ciphertext: Vec<u8> = row.get("ciphertext")?;

    Ok(StoredEnvelope {
        hash: MessageHash::from_bytes(blob32(row, "hash")?),
        envelope: Envelope {
            header,
            ciphertext: Bytes::from(ciphertext),
            funding_txid: opt_blob32(row, "funding_txid")?.map(Txid::from_bytes),
        },
        seq: row.get::<_, i64>("seq")? as u64,
        paid: row.get("paid")?,
        read: row.get("read")?,
        received_at: row.get("received_at")?,
        expires_at: row.get("expires_at")?,
        bucket: row.get("bucket")?,
    })
}

fn row_to_local_key(row: &Row<'_>) -> rusqlite::Result<LocalKeyRecord> {
    let address: String = row.get("address")?;
    let kind: u8 = row.get("kind")?;

    Ok(LocalKeyRecord {
        address: parse_address(&address)?,
        public_key: PublicKey(blob32(row, "public_key")?),
        kind: KeyKind::from_u8(kind).ok_or_else(|| {
            rusqlite::Error::IntegralValueOutOfRange(2, i64::from(kind))
        })?,
        receiving_enabled: row.get("receiving_enabled")?,
        label: row.get("label")?,
        secret: opt_blob32(row, "secret")?,
        created_at: row.get("created_at")?,
    })
}

fn row_to_outbox(row: &Row<'_>) -> rusqlite::Result<OutboxEntry> {
    let envelope: Vec<u8> = row.get("envelope")?;
    let envelope = Envelope::from_bytes(&envelope)
        .map_err(|e| rusqlite::Error::FromSqlConversionFailure(1, Type::Blob, Box::new(e)))?;
    let state: u8 = row.get("state")?;

    Ok(OutboxEntry {
        hash: MessageHash::from_bytes(blob32(row, "hash")?),
        envelope,
        state: OutboxState::from_u8(state).ok_or_else(|| {
            rusqlite::Error::IntegralValueOutOfRange(2, i64::from(state))
        })?,
        fee: row.get::<_, i64>("fee")? as u64,
        txid: opt_blob32(row, "txid")?.map(Txid::from_bytes),
        created_at: row.get("created_at")?,
        updated_at: row.get("updated_at")?,
    })
}

#[async_trait]
impl Store for SqliteStore {
    async fn insert_envelope(
        &self,
        envelope: &Envelope,
        meta: EnvelopeMeta,
    ) -> Result<InsertResult> {
        let envelope = envelope.clone();

        self.run(move |conn| {
            let hash = envelope.compute_hash();

            let exists: bool = conn.query_row(
                "SELECT EXISTS(SELECT 1 FROM envelopes WHERE hash = ?1)",
                params![hash.as_bytes().as_slice()],
                |row| row.get(0),
            )?;
            if exists {
                return Ok(InsertResult::AlreadyExists);
            }

            let header = &envelope.header;
            conn.execute(
                "INSERT INTO envelopes (
                    hash, version, timestamp, ttl_periods, sender, recipient_tag,
                    claims_paid, ciphertext, funding_txid, paid, read, received_at,
                    expires_at, bucket
                ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, 0, ?11, ?12, ?13)",
                params![
                    hash.as_bytes().as_slice(),
                    header.version,
                    header.timestamp,
                    header.ttl_periods,
                    header.sender.map(|a| a.encode()),
                    header.recipient_tag.0.as_slice(),
                    header.paid,
                    envelope.ciphertext.as_ref(),
                    envelope.funding_txid.as_ref().map(|t| t.as_bytes().to_vec()),
                    meta.paid,
                    meta.received_at,
                    meta.expires_at,
                    meta.bucket,
                ],
            )?;

            Ok(InsertResult::Inserted {
                seq: conn.last_insert_rowid() as u64,
            })
        })
        .await
    }

    async fn get_envelope(&self, hash: &MessageHash) -> Result<Option<StoredEnvelope>> {
        let hash = *hash;

        self.run(move |conn| {
            conn.query_row(
                &format!("SELECT {} FROM envelopes WHERE hash = ?1", ENVELOPE_COLUMNS),
                params![hash.as_bytes().as_slice()],
                row_to_stored,
            )
            .optional()
            .map_err(StoreError::from)
        })
        .await
    }

    async fn has_envelope(&self, hash: &MessageHash) -> Result<bool> {
        let hash = *hash;

        self.run(move |conn| {
            let exists = conn.query_row(
                "SELECT EXISTS(SELECT 1 FROM envelopes WHERE hash = ?1)",
                params![hash.as_bytes().as_slice()],
                |row| row.get(0),
            )?;
            Ok(exists)
        })
        .await
    }

    async fn query(&self, filter: &QueryFilter) -> Result<Vec<StoredEnvelope>> {
        let filter = filter.clone();

        self.run(move |conn| {
            let mut sql = format!("SELECT {} FROM envelopes WHERE seq > ?1", ENVELOPE_COLUMNS);
            let mut values = vec![Value::Integer(filter.since.unwrap_or(0) as i64)];

            if filter.unread_only {
                sql.push_str(" AND read = 0");
            }
            if let Some(now) = filter.live_at {
                values.push(Value::Integer(now));
                sql.push_str(&format!(" AND expires_at > ?{}", values.len()));
            }
            if filter.pending_funding {
                sql.push_str(" AND claims_paid = 1 AND paid = 0 AND funding_txid IS NOT NULL");
            }
            if !filter.recipients.is_empty() {
                let mut placeholders = Vec::with_capacity(filter.recipients.len());
                for tag in &filter.recipients {
                    values.push(Value::Blob(tag.0.to_vec()));
                    placeholders.push(format!("?{}", values.len()));
                }
                sql.push_str(&format!(" AND recipient_tag IN ({})", placeholders.join(", ")));
            }
            sql.push_str(" ORDER BY seq");

            let mut stmt = conn.prepare(&sql)?;
            let envelopes = stmt
                .query_map(params_from_iter(values), row_to_stored)?
                .collect::<rusqlite::Result<Vec<_>>>()?;

            Ok(envelopes)
        })
        .await
    }

    async fn mark_read(&self, hash: &MessageHash) -> Result<bool> {
        let hash = *hash;

        self.run(move |conn| {
            let changed = conn.execute(
                "UPDATE envelopes SET read = 1 WHERE hash = ?1",
                params![hash.as_bytes().as_slice()],
            )?;
            Ok(changed > 0)
        })
        .await
    }

    async fn set_paid(&self, hash: &MessageHash, paid: bool) -> Result<bool> {
        let hash = *hash;

        self.run(move |conn| {
            let changed = conn.execute(
                "UPDATE envelopes SET paid = ?2 WHERE hash = ?1",
                params![hash.as_bytes().as_slice(), paid],
            )?;
            Ok(changed > 0)
        })
        .await
    }

    async fn purge_expired(&self, now: i64) -> Result<usize> {
        let removed = self
            .run(move |conn| {
                let removed =
                    conn.execute("DELETE FROM envelopes WHERE expires_at <= ?1", params![now])?;
                Ok(removed)
            })
            .await?;

        debug!(removed, now, "purged expired envelopes");
        Ok(removed)
    }

    async fn bucket_counts(&self) -> Result<Vec<(i64, usize)>> {
        self.run(|conn| {
            let mut stmt = conn.prepare(
                "SELECT bucket, COUNT(*) FROM envelopes GROUP BY bucket ORDER BY bucket",
            )?;
            let counts = stmt
                .query_map([], |row| {
                    Ok((row.get::<_, i64>(0)?, row.get::<_, i64>(1)? as usize))
                })?
                .collect::<rusqlite::Result<Vec<_>>>()?;
            Ok(counts)
        })
        .await
    }

    async fn upsert_local_key(&self, record: &LocalKeyRecord) -> Result<()> {
        let record = record.clone();

        self.run(move |conn| {
            conn.execute(
                "INSERT INTO local_keys (
                    address, public_key, kind, receiving_enabled, label, secret, created_at
                ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)
                ON CONFLICT(address) DO UPDATE SET
                    public_key = excluded.public_key,
                    kind = excluded.kind,
                    receiving_enabled = excluded.receiving_enabled,
                    label = excluded.label,
                    secret = excluded.secret",
                params![
                    record.address.encode(),
                    record.public_key.as_bytes().as_slice(),
                    record.kind.to_u8(),
                    record.receiving_enabled,
                    &record.label,
                    record.secret.as_ref().map(|s| s.as_slice()),
                    record.created_at,
                ],
            )?;
            Ok(())
        })
        .await
    }

    async fn get_local_key(&self, address: &Address) -> Result<Option<LocalKeyRecord>> {
        let address = address.encode();

        self.run(move |conn| {
            conn.query_row(
                &format!("SELECT {} FROM local_keys WHERE address = ?1", LOCAL_KEY_COLUMNS),
                params![address],
                row_to_local_key,
            )
            .optional()
            .map_err(StoreError::from)
        })
        .await
    }

    async fn list_local_keys(&self) -> Result<Vec<LocalKeyRecord>> {
        self.run(|conn| {
            let mut stmt = conn.prepare(&format!(
                "SELECT {} FROM local_keys ORDER BY created_at, address",
                LOCAL_KEY_COLUMNS
            ))?;
            let keys = stmt
                .query_map([], row_to_local_key)?
                .collect::<rusqlite::Result<Vec<_>>>()?;
            Ok(keys)
        })
        .await
    }

    async fn remove_local_key(&self, address: &Address) -> Result<bool> {
        let address = address.encode();

        self.run(move |conn| {
            let removed =
                conn.execute("DELETE FROM local_keys WHERE address = ?1", params![address])?;
            Ok(removed > 0)
        })
        .await
    }

    async fn upsert_peer_key(&self, address: &Address, public_key: &PublicKey) -> Result<()> {
        let address = address.encode();
        let public_key = *public_key;

        self.run(move |conn| {
            conn.execute(
                "INSERT INTO peer_keys (address, public_key, added_at) VALUES (?1, ?2, ?3)
                 ON CONFLICT(address) DO UPDATE SET public_key = excluded.public_key",
                params![address, public_key.as_bytes().as_slice(), now_secs()],
            )?;
            Ok(())
        })
        .await
    }

    async fn get_peer_key(&self, address: &Address) -> Result<Option<PublicKey>> {
        let address = address.encode();

        self.run(move |conn| {
            conn.query_row(
                "SELECT public_key FROM peer_keys WHERE address = ?1",
                params![address],
                |row| blob32(row, "public_key").map(PublicKey),
            )
            .optional()
            .map_err(StoreError::from)
        })
        .await
    }

    async fn list_peer_keys(&self) -> Result<Vec<(Address, PublicKey)>> {
        self.run(|conn| {
            let mut stmt =
                conn.prepare("SELECT address, public_key FROM peer_keys ORDER BY added_at")?;
            let keys = stmt
                .query_map([], |row| {
                    let address: String = row.get("address")?;
                    Ok((parse_address(&address)?, PublicKey(blob32(row, "public_key")?)))
                })?
                .collect::<rusqlite::Result<Vec<_>>>()?;
            Ok(keys)
        })
        .await
    }

    async fn upsert_outbox(&self, entry: &OutboxEntry) -> Result<()> {
        let entry = entry.clone();

        self.run(move |conn| {
            let envelope = entry
                .envelope
                .to_bytes()
                .map_err(|e| StoreError::InvalidData(e.to_string()))?;

            conn.execute(
                "INSERT INTO outbox (hash, envelope, state, fee, txid, created_at, updated_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)
                 ON CONFLICT(hash) DO UPDATE SET
                    envelope = excluded.envelope,
                    state = excluded.state,
                    fee = excluded.fee,
                    txid = excluded.txid,
                    updated_at = excluded.updated_at",
                params![
                    entry.hash.as_bytes().as_slice(),
                    envelope,
                    entry.state.to_u8(),
                    entry.fee as i64,
                    entry.txid.as_ref().map(|t| t.as_bytes().to_vec()),
                    entry.created_at,
                    entry.updated_at,
                ],
            )?;
            Ok(())
        })
        .await
    }

    async fn get_outbox(&self, hash: &MessageHash) -> Result<Option<OutboxEntry>> {
        let hash = *hash;

        self.run(move |conn| {
            conn.query_row(
                &format!("SELECT {} FROM outbox WHERE hash = ?1", OUTBOX_COLUMNS),
                params![hash.as_bytes().as_slice()],
                row_to_outbox,
            )
            .optional()
            .map_err(StoreError::from)
        })
        .await
    }

    async fn list_outbox(&self, state: Option<OutboxState>) -> Result<Vec<OutboxEntry>> {
        self.run(move |conn| {
            let entries = match state {
                Some(state) => {
                    let mut stmt = conn.prepare(&format!(
                        "SELECT {} FROM outbox WHERE state = ?1 ORDER BY created_at, rowid",
                        OUTBOX_COLUMNS
                    ))?;
                    let rows = stmt.query_map(params![state.to_u8()], row_to_outbox)?;
                    rows.collect::<rusqlite::Result<Vec<_>>>()?
                }
                None => {
                    let mut stmt = conn.prepare(&format!(
                        "SELECT {} FROM outbox ORDER BY created_at, rowid",
                        OUTBOX_COLUMNS
                    ))?;
                    let rows = stmt.query_map([], row_to_outbox)?;
                    rows.collect::<rusqlite::Result<Vec<_>>>()?
                }
            };
            Ok(entries)
        })
        .await
    }

    async fn set_outbox_state(
        &self,
        hash: &MessageHash,
        state: OutboxState,
        now: i64,
    ) -> Result<bool> {
        let hash = *hash;

        self.run(move |conn| {
            let changed = conn.execute(
                "UPDATE outbox SET state = ?2, updated_at = ?3 WHERE hash = ?1",
                params![hash.as_bytes().as_slice(), state.to_u8(), now],
            )?;
            Ok(changed > 0)
        })
        .await
    }
}
