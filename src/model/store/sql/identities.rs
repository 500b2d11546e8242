use async_trait::async_trait;
use rusqlite::{params, types::ValueRef, OptionalExtension, Row};

use crate::{domain::{embedding::Embedding, identity::{Identity, IdentityForUpsert, IdentitySummary, PrototypePayload}}, model::store::SqliteStore, tools::{log::{log_error, LogServiceType}, match_index::PrototypeSource}};

use super::super::Error;
use super::super::Result;


/// Payloads were written as TEXT by older versions and as BLOB since.
fn payload_from_row(row: &Row, index: usize) -> rusqlite::Result<Vec<u8>> {
    match row.get_ref(index)? {
        ValueRef::Blob(bytes) | ValueRef::Text(bytes) => Ok(bytes.to_vec()),
        other => Err(rusqlite::Error::InvalidColumnType(index, "prototype_payload".to_string(), other.data_type())),
    }
}

/// Identity object store
impl SqliteStore {
    pub async fn get_identity(&self, identity_id: &str) -> Result<Option<Identity>> {
        let id = identity_id.to_string();
        let connection = self.pool().get().await?;
        let row = connection.call(move |conn| {
            let row = conn.query_row(
                "SELECT identity_id, display_name, prototype_payload, samples_count FROM identities WHERE identity_id = ?1",
                [&id],
                |row| {
                    let identity_id: String = row.get(0)?;
                    let display_name: String = row.get(1)?;
                    let payload = payload_from_row(row, 2)?;
                    let samples_count: u32 = row.get(3)?;
                    Ok((identity_id, display_name, payload, samples_count))
                },
            ).optional()?;
            Ok(row)
        }).await?;

        let Some((identity_id, display_name, payload, samples_count)) = row else {
            return Ok(None);
        };
        let payload = PrototypePayload::decode(&payload).map_err(|error| Error::InvalidPayload { identity_id: identity_id.clone(), error })?;
        Ok(Some(Identity { identity_id, display_name, prototypes: payload.into_prototypes(), samples_count }))
    }

    pub async fn identity_exists(&self, identity_id: &str) -> Result<bool> {
        let id = identity_id.to_string();
        let connection = self.pool().get().await?;
        let exists = connection.call(move |conn| {
            let exists: bool = conn.query_row("SELECT EXISTS(SELECT 1 FROM identities WHERE identity_id = ?1)", [&id], |row| row.get(0))?;
            Ok(exists)
        }).await?;
        Ok(exists)
    }

    /// Inserts or updates an identity in one statement. Returns the new `samples_count`.
    pub async fn upsert_identity(&self, update: IdentityForUpsert, now_millis: i64) -> Result<u32> {
        let payload = update.payload.encode()?;
        let connection = self.pool().get().await?;
        let samples_count = connection.call(move |conn| {
            let samples_count: u32 = conn.query_row(
                "INSERT INTO identities (identity_id, display_name, prototype_payload, photo, samples_count, added, modified)
                 VALUES (?1, ?2, ?3, ?4, 1, ?5, ?5)
                 ON CONFLICT(identity_id) DO UPDATE SET
                    display_name = excluded.display_name,
                    prototype_payload = excluded.prototype_payload,
                    photo = COALESCE(excluded.photo, identities.photo),
                    samples_count = identities.samples_count + 1,
                    modified = excluded.modified
                 RETURNING samples_count",
                params![update.identity_id, update.display_name, payload, update.photo, now_millis],
                |row| row.get(0),
            )?;
            Ok(samples_count)
        }).await?;
        Ok(samples_count)
    }

    pub async fn get_identities(&self) -> Result<Vec<IdentitySummary>> {
        let connection = self.pool().get().await?;
        let identities = connection.call(move |conn| {
            let mut query = conn.prepare("SELECT display_name, identity_id, samples_count FROM identities ORDER BY display_name, identity_id")?;
            let rows = query.query_map([], |row| {
                Ok(IdentitySummary {
                    display_name: row.get(0)?,
                    identity_id: row.get(1)?,
                    samples_count: row.get(2)?,
                })
            })?;
            let identities: Vec<IdentitySummary> = rows.collect::<rusqlite::Result<Vec<_>>>()?;
            Ok(identities)
        }).await?;
        Ok(identities)
    }

    pub async fn get_identity_photo(&self, identity_id: &str) -> Result<Option<Vec<u8>>> {
        let id = identity_id.to_string();
        let connection = self.pool().get().await?;
        let photo = connection.call(move |conn| {
            let photo: Option<Option<Vec<u8>>> = conn.query_row(
                "SELECT photo FROM identities WHERE identity_id = ?1",
                [&id],
                |row| row.get(0),
            ).optional()?;
            Ok(photo)
        }).await?;
        photo.ok_or_else(|| Error::IdentityNotFound(identity_id.to_string()))
    }

    /// Every identity with its prototypes. Rows whose payload cannot be decoded are logged and skipped.
    pub async fn get_all_prototypes(&self) -> Result<Vec<(String, Vec<Embedding>)>> {
        let connection = self.pool().get().await?;
        let rows = connection.call(move |conn| {
            let mut query = conn.prepare("SELECT identity_id, prototype_payload FROM identities ORDER BY identity_id")?;
            let rows = query.query_map([], |row| {
                let identity_id: String = row.get(0)?;
                let payload = payload_from_row(row, 1)?;
                Ok((identity_id, payload))
            })?;
            let rows: Vec<(String, Vec<u8>)> = rows.collect::<rusqlite::Result<Vec<_>>>()?;
            Ok(rows)
        }).await?;

        let mut identities = Vec::with_capacity(rows.len());
        for (identity_id, payload) in rows {
            match PrototypePayload::decode(&payload) {
                Ok(payload) => identities.push((identity_id, payload.into_prototypes())),
                Err(error) => log_error(LogServiceType::Database, format!("Skipping identity {}: {}", identity_id, error)),
            }
        }
        Ok(identities)
    }
}

#[async_trait]
impl PrototypeSource for SqliteStore {
    async fn load_all_prototypes(&self) -> crate::error::RsResult<Vec<(String, Vec<Embedding>)>> {
        self.get_all_prototypes().await.map_err(|error| crate::Error::PersistenceUnavailable(error.to_string()))
    }
}
