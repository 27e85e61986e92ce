// Ratings left by one user on another's profile.

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use rusqlite::{params, OptionalExtension, Row};

use super::Database;
use crate::model::{Rating, UserRef};

const RATING_SELECT: &str = "SELECT r.id, r.user_id, r.rated_user_id, r.rating, r.content,
        r.created_at, r.updated_at, u.username
     FROM ratings r JOIN users u ON u.id = r.user_id";

fn map_rating(row: &Row<'_>) -> rusqlite::Result<Rating> {
    let user_id: i64 = row.get(1)?;
    Ok(Rating {
        id: row.get(0)?,
        user_id,
        rated_user_id: row.get(2)?,
        rating: row.get(3)?,
        content: row.get(4)?,
        created_at: row.get(5)?,
        updated_at: row.get(6)?,
        user: UserRef {
            id: user_id,
            username: row.get(7)?,
        },
    })
}

impl Database {
    pub fn insert_rating(
        &self,
        author_id: i64,
        rated_user_id: i64,
        rating: u8,
        content: &str,
        now: DateTime<Utc>,
    ) -> Result<i64> {
        let conn = self.conn();
        conn.query_row(
            "INSERT INTO ratings (user_id, rated_user_id, rating, content, created_at, updated_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?5) RETURNING id",
            params![author_id, rated_user_id, rating, content, now],
            |row| row.get(0),
        )
        .context("failed to insert rating")
    }

    pub fn update_rating(&self, id: i64, rating: u8, content: &str, now: DateTime<Utc>) -> Result<()> {
        let conn = self.conn();
        conn.execute(
            "UPDATE ratings SET rating = ?2, content = ?3, updated_at = ?4 WHERE id = ?1",
            params![id, rating, content, now],
        )
        .context("failed to update rating")?;
        Ok(())
    }

    pub fn get_rating(&self, id: i64) -> Result<Option<Rating>> {
        let conn = self.conn();
        conn.query_row(
            &format!("{RATING_SELECT} WHERE r.id = ?1"),
            params![id],
            map_rating,
        )
        .optional()
        .context("failed to load rating")
    }

    /// All ratings for a profile in creation order.
    pub fn ratings_for_user(&self, rated_user_id: i64) -> Result<Vec<Rating>> {
        let conn = self.conn();
        let mut stmt = conn
            .prepare(&format!(
                "{RATING_SELECT} WHERE r.rated_user_id = ?1 ORDER BY r.created_at, r.id"
            ))
            .context("failed to prepare ratings_for_user query")?;
        let ratings = stmt
            .query_map(params![rated_user_id], map_rating)
            .context("failed to query ratings")?
            .collect::<std::result::Result<Vec<_>, _>>()
            .context("failed to map rating rows")?;
        Ok(ratings)
    }

    /// `(count, sum)` of the stars a profile received.
    pub fn rating_totals(&self, rated_user_id: i64) -> Result<(u64, u64)> {
        let conn = self.conn();
        let (count, sum): (i64, i64) = conn
            .query_row(
                "SELECT COUNT(*), COALESCE(SUM(rating), 0) FROM ratings WHERE rated_user_id = ?1",
                params![rated_user_id],
                |row| Ok((row.get(0)?, row.get(1)?)),
            )
            .context("failed to total ratings")?;
        Ok((count as u64, sum as u64))
    }
}
