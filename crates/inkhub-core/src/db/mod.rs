// SQLite persistence layer for the marketplace.
//
// `Database` owns a single connection behind a mutex. Table-specific queries
// live in the submodules as additional `impl Database` blocks.

use std::sync::{Mutex, MutexGuard};

use anyhow::{Context, Result};
use rusqlite::{params, Connection};

use crate::model::Role;

mod chats;
mod notifications;
mod posts;
mod ratings;
mod reports;
mod requests;
mod stores;
mod users;

pub use posts::PostFields;
pub use reports::PaymentAttributionRow;
pub use requests::NewRequest;
pub use users::{duplicate_user_field, NewUser};

/// Tags inserted into an empty `tags` table.
pub const DEFAULT_TAGS: [&str; 10] = [
    "Graphic Design",
    "Printing",
    "Logo Design",
    "Illustration",
    "Print Services",
    "T-shirt Printing",
    "Custom Apparel",
    "Packaging Design",
    "Business Cards",
    "Poster Printing",
];

/// SQLite-backed persistence for users, posts, requests, payments, ratings,
/// chats, notifications and stores.
pub struct Database {
    conn: Mutex<Connection>,
}

impl Database {
    /// Open (or create) a SQLite database at `path` and ensure all tables
    /// exist. Pass `":memory:"` for an ephemeral in-memory database (useful
    /// for tests).
    pub fn open(path: &str) -> Result<Self> {
        let conn = Connection::open(path)
            .with_context(|| format!("failed to open database at {path}"))?;

        conn.execute_batch(
            "PRAGMA journal_mode = WAL;
             PRAGMA busy_timeout = 5000;
             PRAGMA foreign_keys = ON;",
        )
        .context("failed to set database pragmas")?;

        conn.execute_batch(
            "
            CREATE TABLE IF NOT EXISTS roles (
                roleid   INTEGER PRIMARY KEY,
                rolename TEXT NOT NULL UNIQUE
            );

            CREATE TABLE IF NOT EXISTS users (
                id                           INTEGER PRIMARY KEY AUTOINCREMENT,
                username                     TEXT NOT NULL UNIQUE,
                email                        TEXT NOT NULL UNIQUE,
                password_hash                TEXT NOT NULL,
                role_id                      INTEGER NOT NULL REFERENCES roles(roleid),
                verified                     INTEGER NOT NULL DEFAULT 0,
                email_verified_at            TEXT,
                verification_code            TEXT,
                verification_code_expires_at TEXT,
                created_at                   TEXT NOT NULL,
                updated_at                   TEXT NOT NULL
            );

            CREATE TABLE IF NOT EXISTS personal_information (
                user_id        INTEGER PRIMARY KEY REFERENCES users(id) ON DELETE CASCADE,
                firstname      TEXT NOT NULL,
                lastname       TEXT NOT NULL,
                zipcode        TEXT,
                profilepicture TEXT,
                coverphoto     TEXT
            );

            CREATE TABLE IF NOT EXISTS access_tokens (
                id           INTEGER PRIMARY KEY AUTOINCREMENT,
                user_id      INTEGER NOT NULL REFERENCES users(id) ON DELETE CASCADE,
                token_hash   TEXT NOT NULL,
                created_at   TEXT NOT NULL,
                last_used_at TEXT
            );

            CREATE TABLE IF NOT EXISTS password_resets (
                email      TEXT PRIMARY KEY,
                token_hash TEXT NOT NULL,
                created_at TEXT NOT NULL
            );

            CREATE TABLE IF NOT EXISTS posts (
                post_id    INTEGER PRIMARY KEY AUTOINCREMENT,
                user_id    INTEGER NOT NULL REFERENCES users(id) ON DELETE CASCADE,
                title      TEXT NOT NULL,
                content    TEXT NOT NULL,
                price      INTEGER NOT NULL,
                quantity   INTEGER NOT NULL DEFAULT 1,
                created_at TEXT NOT NULL,
                updated_at TEXT NOT NULL
            );

            CREATE TABLE IF NOT EXISTS tags (
                id   INTEGER PRIMARY KEY AUTOINCREMENT,
                name TEXT NOT NULL UNIQUE
            );

            CREATE TABLE IF NOT EXISTS post_tag (
                post_id INTEGER NOT NULL REFERENCES posts(post_id) ON DELETE CASCADE,
                tag_id  INTEGER NOT NULL REFERENCES tags(id) ON DELETE CASCADE,
                PRIMARY KEY (post_id, tag_id)
            );

            CREATE TABLE IF NOT EXISTS post_images (
                image_id   INTEGER PRIMARY KEY AUTOINCREMENT,
                post_id    INTEGER NOT NULL REFERENCES posts(post_id) ON DELETE CASCADE,
                image_path TEXT NOT NULL
            );

            CREATE TABLE IF NOT EXISTS requests (
                request_id      INTEGER PRIMARY KEY AUTOINCREMENT,
                post_id         INTEGER NOT NULL REFERENCES posts(post_id) ON DELETE CASCADE,
                user_id         INTEGER NOT NULL REFERENCES users(id) ON DELETE CASCADE,
                target_user_id  INTEGER NOT NULL REFERENCES users(id) ON DELETE CASCADE,
                request_type    TEXT NOT NULL,
                status          TEXT NOT NULL,
                request_content TEXT,
                created_at      TEXT NOT NULL,
                updated_at      TEXT NOT NULL
            );

            CREATE TABLE IF NOT EXISTS initial_payments (
                initial_payment_id INTEGER PRIMARY KEY AUTOINCREMENT,
                post_id            INTEGER NOT NULL REFERENCES posts(post_id) ON DELETE CASCADE,
                user_id            INTEGER NOT NULL REFERENCES users(id) ON DELETE CASCADE,
                request_id         INTEGER NOT NULL REFERENCES requests(request_id) ON DELETE CASCADE,
                amount             INTEGER NOT NULL DEFAULT 0,
                status             TEXT NOT NULL,
                transaction_id     TEXT UNIQUE,
                payment_method     TEXT NOT NULL,
                created_at         TEXT NOT NULL,
                updated_at         TEXT NOT NULL
            );

            CREATE TABLE IF NOT EXISTS ratings (
                id            INTEGER PRIMARY KEY AUTOINCREMENT,
                user_id       INTEGER NOT NULL REFERENCES users(id) ON DELETE CASCADE,
                rated_user_id INTEGER NOT NULL REFERENCES users(id) ON DELETE CASCADE,
                rating        INTEGER NOT NULL CHECK (rating BETWEEN 1 AND 5),
                content       TEXT NOT NULL,
                created_at    TEXT NOT NULL,
                updated_at    TEXT NOT NULL
            );

            CREATE TABLE IF NOT EXISTS chats (
                id          INTEGER PRIMARY KEY AUTOINCREMENT,
                sender_id   INTEGER NOT NULL REFERENCES users(id) ON DELETE CASCADE,
                receiver_id INTEGER NOT NULL REFERENCES users(id) ON DELETE CASCADE,
                content     TEXT,
                file_path   TEXT,
                created_at  TEXT NOT NULL
            );

            CREATE TABLE IF NOT EXISTS notifications (
                id         INTEGER PRIMARY KEY AUTOINCREMENT,
                user_id    INTEGER NOT NULL REFERENCES users(id) ON DELETE CASCADE,
                request_id INTEGER REFERENCES requests(request_id) ON DELETE CASCADE,
                content    TEXT NOT NULL,
                status     TEXT NOT NULL,
                created_at TEXT NOT NULL
            );

            CREATE TABLE IF NOT EXISTS stores (
                id          INTEGER PRIMARY KEY AUTOINCREMENT,
                user_id     INTEGER NOT NULL UNIQUE REFERENCES users(id) ON DELETE CASCADE,
                storename   TEXT NOT NULL,
                description TEXT NOT NULL,
                latitude    REAL NOT NULL,
                longitude   REAL NOT NULL,
                address     TEXT NOT NULL,
                created_at  TEXT NOT NULL,
                updated_at  TEXT NOT NULL
            );
            ",
        )
        .context("failed to create database schema")?;

        conn.execute_batch(
            "CREATE INDEX IF NOT EXISTS idx_access_tokens_hash ON access_tokens(token_hash);
             CREATE INDEX IF NOT EXISTS idx_ratings_rated_user ON ratings(rated_user_id);
             CREATE INDEX IF NOT EXISTS idx_chats_sender ON chats(sender_id);
             CREATE INDEX IF NOT EXISTS idx_chats_receiver ON chats(receiver_id);
             CREATE INDEX IF NOT EXISTS idx_payments_request ON initial_payments(request_id);",
        )
        .context("failed to create indexes")?;

        Self::seed(&conn)?;

        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    /// Insert the fixed role rows and, on an empty table, the default tags.
    fn seed(conn: &Connection) -> Result<()> {
        for role in Role::ALL {
            conn.execute(
                "INSERT OR IGNORE INTO roles (roleid, rolename) VALUES (?1, ?2)",
                params![role.id(), role.name()],
            )
            .context("failed to seed roles")?;
        }

        let tag_count: i64 = conn
            .query_row("SELECT COUNT(*) FROM tags", [], |row| row.get(0))
            .context("failed to count tags")?;
        if tag_count == 0 {
            for name in DEFAULT_TAGS {
                conn.execute("INSERT INTO tags (name) VALUES (?1)", params![name])
                    .context("failed to seed tags")?;
            }
        }
        Ok(())
    }

    /// Acquire the database connection.
    ///
    /// Panics if the mutex is poisoned (another thread panicked while
    /// holding the lock). This should never happen in normal operation.
    fn conn(&self) -> MutexGuard<'_, Connection> {
        self.conn.lock().expect("database mutex poisoned")
    }
}
