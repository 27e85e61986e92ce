// Users, personal information, access tokens and password resets.

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use rusqlite::{params, OptionalExtension, Row};

use super::Database;
use crate::model::{PersonalInformation, Role, User, UserRecord};

pub(crate) const USER_COLUMNS: &str =
    "id, username, email, role_id, verified, email_verified_at, created_at, updated_at";

pub(crate) fn map_user(row: &Row<'_>) -> rusqlite::Result<User> {
    Ok(User {
        id: row.get(0)?,
        username: row.get(1)?,
        email: row.get(2)?,
        role: row.get(3)?,
        verified: row.get(4)?,
        email_verified_at: row.get(5)?,
        created_at: row.get(6)?,
        updated_at: row.get(7)?,
    })
}

fn map_record(row: &Row<'_>) -> rusqlite::Result<UserRecord> {
    Ok(UserRecord {
        user: map_user(row)?,
        password_hash: row.get(8)?,
        verification_code: row.get(9)?,
        verification_code_expires_at: row.get(10)?,
    })
}

fn map_personal_information(row: &Row<'_>) -> rusqlite::Result<PersonalInformation> {
    Ok(PersonalInformation {
        user_id: row.get(0)?,
        firstname: row.get(1)?,
        lastname: row.get(2)?,
        zipcode: row.get(3)?,
        profilepicture: row.get(4)?,
        coverphoto: row.get(5)?,
    })
}

/// Column values for a freshly registered user.
#[derive(Debug, Clone)]
pub struct NewUser {
    pub username: String,
    pub email: String,
    pub password_hash: String,
    pub role: Role,
    pub verified: bool,
    pub verification_code: Option<String>,
    pub verification_code_expires_at: Option<DateTime<Utc>>,
    pub now: DateTime<Utc>,
}

/// The `users` column named by a UNIQUE violation from [`Database::insert_user`].
pub fn duplicate_user_field(err: &anyhow::Error) -> Option<&'static str> {
    match err.downcast_ref::<rusqlite::Error>()? {
        rusqlite::Error::SqliteFailure(e, Some(message))
            if e.code == rusqlite::ErrorCode::ConstraintViolation =>
        {
            ["username", "email"]
                .into_iter()
                .find(|column| message.ends_with(&format!("users.{column}")))
        }
        _ => None,
    }
}

impl Database {
    pub fn insert_user(&self, new: &NewUser) -> Result<User> {
        let conn = self.conn();
        conn.query_row(
            &format!(
                "INSERT INTO users (username, email, password_hash, role_id, verified,
                    verification_code, verification_code_expires_at, created_at, updated_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?8)
                 RETURNING {USER_COLUMNS}"
            ),
            params![
                new.username,
                new.email,
                new.password_hash,
                new.role,
                new.verified,
                new.verification_code,
                new.verification_code_expires_at,
                new.now,
            ],
            map_user,
        )
        .context("failed to insert user")
    }

    pub fn get_user(&self, id: i64) -> Result<Option<User>> {
        let conn = self.conn();
        conn.query_row(
            &format!("SELECT {USER_COLUMNS} FROM users WHERE id = ?1"),
            params![id],
            map_user,
        )
        .optional()
        .context("failed to load user")
    }

    pub fn get_user_record(&self, id: i64) -> Result<Option<UserRecord>> {
        let conn = self.conn();
        conn.query_row(
            &format!(
                "SELECT {USER_COLUMNS}, password_hash, verification_code, verification_code_expires_at
                 FROM users WHERE id = ?1"
            ),
            params![id],
            map_record,
        )
        .optional()
        .context("failed to load user record")
    }

    /// Email lookup is case-insensitive.
    pub fn find_user_record_by_email(&self, email: &str) -> Result<Option<UserRecord>> {
        let conn = self.conn();
        conn.query_row(
            &format!(
                "SELECT {USER_COLUMNS}, password_hash, verification_code, verification_code_expires_at
                 FROM users WHERE lower(email) = lower(?1)"
            ),
            params![email],
            map_record,
        )
        .optional()
        .context("failed to load user by email")
    }

    pub fn username_exists(&self, username: &str) -> Result<bool> {
        let conn = self.conn();
        conn.query_row(
            "SELECT EXISTS(SELECT 1 FROM users WHERE lower(username) = lower(?1))",
            params![username],
            |row| row.get(0),
        )
        .context("failed to check username")
    }

    pub fn email_exists(&self, email: &str) -> Result<bool> {
        let conn = self.conn();
        conn.query_row(
            "SELECT EXISTS(SELECT 1 FROM users WHERE lower(email) = lower(?1))",
            params![email],
            |row| row.get(0),
        )
        .context("failed to check email")
    }

    pub fn list_users(&self, offset: i64, limit: u32) -> Result<Vec<User>> {
        let conn = self.conn();
        let mut stmt = conn
            .prepare(&format!(
                "SELECT {USER_COLUMNS} FROM users ORDER BY id LIMIT ?1 OFFSET ?2"
            ))
            .context("failed to prepare list_users query")?;
        let users = stmt
            .query_map(params![limit, offset], map_user)
            .context("failed to query users")?
            .collect::<std::result::Result<Vec<_>, _>>()
            .context("failed to map user rows")?;
        Ok(users)
    }

    pub fn count_users(&self) -> Result<u64> {
        let conn = self.conn();
        let count: i64 = conn
            .query_row("SELECT COUNT(*) FROM users", [], |row| row.get(0))
            .context("failed to count users")?;
        Ok(count as u64)
    }

    /// Returns `false` if no such user exists.
    pub fn set_user_verified(&self, id: i64, verified: bool, now: DateTime<Utc>) -> Result<bool> {
        let conn = self.conn();
        let changed = conn
            .execute(
                "UPDATE users SET verified = ?2, updated_at = ?3 WHERE id = ?1",
                params![id, verified, now],
            )
            .context("failed to update verified flag")?;
        Ok(changed > 0)
    }

    /// Stamp the email as verified and clear the one-time code.
    pub fn mark_email_verified(&self, id: i64, now: DateTime<Utc>) -> Result<()> {
        let conn = self.conn();
        conn.execute(
            "UPDATE users SET email_verified_at = ?2, verification_code = NULL,
                verification_code_expires_at = NULL, updated_at = ?2
             WHERE id = ?1",
            params![id, now],
        )
        .context("failed to mark email verified")?;
        Ok(())
    }

    pub fn set_verification_code(
        &self,
        id: i64,
        code: &str,
        expires_at: DateTime<Utc>,
    ) -> Result<()> {
        let conn = self.conn();
        conn.execute(
            "UPDATE users SET verification_code = ?2, verification_code_expires_at = ?3
             WHERE id = ?1",
            params![id, code, expires_at],
        )
        .context("failed to store verification code")?;
        Ok(())
    }

    /// Users with no verification code on file, verified or not.
    pub fn users_without_verification_code(&self) -> Result<Vec<User>> {
        let conn = self.conn();
        let mut stmt = conn
            .prepare(&format!(
                "SELECT {USER_COLUMNS} FROM users WHERE verification_code IS NULL ORDER BY id"
            ))
            .context("failed to prepare users_without_verification_code query")?;
        let users = stmt
            .query_map([], map_user)
            .context("failed to query users without codes")?
            .collect::<std::result::Result<Vec<_>, _>>()
            .context("failed to map user rows")?;
        Ok(users)
    }

    pub fn update_password(&self, id: i64, password_hash: &str, now: DateTime<Utc>) -> Result<()> {
        let conn = self.conn();
        conn.execute(
            "UPDATE users SET password_hash = ?2, updated_at = ?3 WHERE id = ?1",
            params![id, password_hash, now],
        )
        .context("failed to update password")?;
        Ok(())
    }

    /// Number of accounts per role id.
    pub fn count_users_by_role(&self) -> Result<Vec<(Role, u64)>> {
        let conn = self.conn();
        let mut stmt = conn
            .prepare("SELECT role_id, COUNT(*) FROM users GROUP BY role_id ORDER BY role_id")
            .context("failed to prepare role count query")?;
        let counts = stmt
            .query_map([], |row| Ok((row.get::<_, Role>(0)?, row.get::<_, i64>(1)? as u64)))
            .context("failed to count users by role")?
            .collect::<std::result::Result<Vec<_>, _>>()
            .context("failed to map role counts")?;
        Ok(counts)
    }

    // ------------------------------------------------------------------
    // Personal information
    // ------------------------------------------------------------------

    pub fn get_personal_information(&self, user_id: i64) -> Result<Option<PersonalInformation>> {
        let conn = self.conn();
        conn.query_row(
            "SELECT user_id, firstname, lastname, zipcode, profilepicture, coverphoto
             FROM personal_information WHERE user_id = ?1",
            params![user_id],
            map_personal_information,
        )
        .optional()
        .context("failed to load personal information")
    }

    pub fn upsert_personal_information(&self, info: &PersonalInformation) -> Result<()> {
        let conn = self.conn();
        conn.execute(
            "INSERT INTO personal_information
                (user_id, firstname, lastname, zipcode, profilepicture, coverphoto)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6)
             ON CONFLICT(user_id) DO UPDATE SET
                firstname      = excluded.firstname,
                lastname       = excluded.lastname,
                zipcode        = excluded.zipcode,
                profilepicture = excluded.profilepicture,
                coverphoto     = excluded.coverphoto",
            params![
                info.user_id,
                info.firstname,
                info.lastname,
                info.zipcode,
                info.profilepicture,
                info.coverphoto,
            ],
        )
        .context("failed to upsert personal information")?;
        Ok(())
    }

    // ------------------------------------------------------------------
    // Access tokens
    // ------------------------------------------------------------------

    /// Returns the new token row id.
    pub fn insert_access_token(
        &self,
        user_id: i64,
        token_hash: &str,
        now: DateTime<Utc>,
    ) -> Result<i64> {
        let conn = self.conn();
        conn.query_row(
            "INSERT INTO access_tokens (user_id, token_hash, created_at)
             VALUES (?1, ?2, ?3) RETURNING id",
            params![user_id, token_hash, now],
            |row| row.get(0),
        )
        .context("failed to insert access token")
    }

    /// Returns `(user_id, token_hash)` for the token row.
    pub fn get_access_token(&self, token_id: i64) -> Result<Option<(i64, String)>> {
        let conn = self.conn();
        conn.query_row(
            "SELECT user_id, token_hash FROM access_tokens WHERE id = ?1",
            params![token_id],
            |row| Ok((row.get(0)?, row.get(1)?)),
        )
        .optional()
        .context("failed to load access token")
    }

    pub fn touch_access_token(&self, token_id: i64, now: DateTime<Utc>) -> Result<()> {
        let conn = self.conn();
        conn.execute(
            "UPDATE access_tokens SET last_used_at = ?2 WHERE id = ?1",
            params![token_id, now],
        )
        .context("failed to touch access token")?;
        Ok(())
    }

    pub fn delete_access_token(&self, token_id: i64) -> Result<()> {
        let conn = self.conn();
        conn.execute("DELETE FROM access_tokens WHERE id = ?1", params![token_id])
            .context("failed to delete access token")?;
        Ok(())
    }

    pub fn delete_user_tokens(&self, user_id: i64) -> Result<usize> {
        let conn = self.conn();
        conn.execute(
            "DELETE FROM access_tokens WHERE user_id = ?1",
            params![user_id],
        )
        .context("failed to delete user tokens")
    }

    // ------------------------------------------------------------------
    // Password resets
    // ------------------------------------------------------------------

    /// One live reset per email; a new request replaces the previous token.
    pub fn put_password_reset(&self, email: &str, token_hash: &str, now: DateTime<Utc>) -> Result<()> {
        let conn = self.conn();
        conn.execute(
            "INSERT OR REPLACE INTO password_resets (email, token_hash, created_at)
             VALUES (lower(?1), ?2, ?3)",
            params![email, token_hash, now],
        )
        .context("failed to store password reset")?;
        Ok(())
    }

    /// Returns `(token_hash, created_at)`.
    pub fn get_password_reset(&self, email: &str) -> Result<Option<(String, DateTime<Utc>)>> {
        let conn = self.conn();
        conn.query_row(
            "SELECT token_hash, created_at FROM password_resets WHERE email = lower(?1)",
            params![email],
            |row| Ok((row.get(0)?, row.get(1)?)),
        )
        .optional()
        .context("failed to load password reset")
    }

    pub fn delete_password_reset(&self, email: &str) -> Result<()> {
        let conn = self.conn();
        conn.execute(
            "DELETE FROM password_resets WHERE email = lower(?1)",
            params![email],
        )
        .context("failed to delete password reset")?;
        Ok(())
    }
}
