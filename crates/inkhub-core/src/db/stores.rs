// Printing-shop store locations.

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use rusqlite::{params, OptionalExtension, Row};

use super::Database;
use crate::model::{Location, Store};

const STORE_COLUMNS: &str = "id, user_id, storename, description, latitude, longitude, address,
    created_at, updated_at";

fn map_store(row: &Row<'_>) -> rusqlite::Result<Store> {
    Ok(Store {
        id: row.get(0)?,
        user_id: row.get(1)?,
        storename: row.get(2)?,
        description: row.get(3)?,
        location: Location {
            latitude: row.get(4)?,
            longitude: row.get(5)?,
            address: row.get(6)?,
        },
        created_at: row.get(7)?,
        updated_at: row.get(8)?,
    })
}

impl Database {
    pub fn insert_store(
        &self,
        user_id: i64,
        storename: &str,
        description: &str,
        location: &Location,
        now: DateTime<Utc>,
    ) -> Result<Store> {
        let conn = self.conn();
        conn.query_row(
            &format!(
                "INSERT INTO stores (user_id, storename, description, latitude, longitude, address,
                    created_at, updated_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?7) RETURNING {STORE_COLUMNS}"
            ),
            params![
                user_id,
                storename,
                description,
                location.latitude,
                location.longitude,
                location.address,
                now
            ],
            map_store,
        )
        .context("failed to insert store")
    }

    pub fn update_store(
        &self,
        id: i64,
        storename: &str,
        description: &str,
        location: &Location,
        now: DateTime<Utc>,
    ) -> Result<Store> {
        let conn = self.conn();
        conn.query_row(
            &format!(
                "UPDATE stores SET storename = ?2, description = ?3, latitude = ?4, longitude = ?5,
                    address = ?6, updated_at = ?7
                 WHERE id = ?1 RETURNING {STORE_COLUMNS}"
            ),
            params![
                id,
                storename,
                description,
                location.latitude,
                location.longitude,
                location.address,
                now
            ],
            map_store,
        )
        .context("failed to update store")
    }

    pub fn delete_store(&self, id: i64) -> Result<()> {
        let conn = self.conn();
        conn.execute("DELETE FROM stores WHERE id = ?1", params![id])
            .context("failed to delete store")?;
        Ok(())
    }

    pub fn get_store(&self, id: i64) -> Result<Option<Store>> {
        let conn = self.conn();
        conn.query_row(
            &format!("SELECT {STORE_COLUMNS} FROM stores WHERE id = ?1"),
            params![id],
            map_store,
        )
        .optional()
        .context("failed to load store")
    }

    pub fn store_for_user(&self, user_id: i64) -> Result<Option<Store>> {
        let conn = self.conn();
        conn.query_row(
            &format!("SELECT {STORE_COLUMNS} FROM stores WHERE user_id = ?1"),
            params![user_id],
            map_store,
        )
        .optional()
        .context("failed to load user store")
    }

    pub fn list_stores(&self) -> Result<Vec<Store>> {
        let conn = self.conn();
        let mut stmt = conn
            .prepare(&format!("SELECT {STORE_COLUMNS} FROM stores ORDER BY id"))
            .context("failed to prepare list_stores query")?;
        let stores = stmt
            .query_map([], map_store)
            .context("failed to query stores")?
            .collect::<std::result::Result<Vec<_>, _>>()
            .context("failed to map store rows")?;
        Ok(stores)
    }
}
