// Posts, tags and post images.

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use rusqlite::{params, params_from_iter, Connection, OptionalExtension, Row};

use super::Database;
use crate::model::{Post, PostAuthor, PostImage, Role, Tag};

const POST_SELECT: &str = "SELECT p.post_id, p.user_id, p.title, p.content, p.price, p.quantity,
        p.created_at, p.updated_at, u.username, u.role_id
     FROM posts p JOIN users u ON u.id = p.user_id";

/// Editable post fields.
#[derive(Debug, Clone)]
pub struct PostFields {
    pub title: String,
    pub content: String,
    pub price: i64,
    pub quantity: i64,
    pub tag_ids: Vec<i64>,
}

fn map_post_row(row: &Row<'_>) -> rusqlite::Result<Post> {
    Ok(Post {
        post_id: row.get(0)?,
        user_id: row.get(1)?,
        title: row.get(2)?,
        content: row.get(3)?,
        price: row.get(4)?,
        quantity: row.get(5)?,
        created_at: row.get(6)?,
        updated_at: row.get(7)?,
        user: PostAuthor {
            username: row.get(8)?,
            role: row.get(9)?,
        },
        tags: Vec::new(),
        images: Vec::new(),
    })
}

fn load_tags(conn: &Connection, post_id: i64) -> rusqlite::Result<Vec<Tag>> {
    let mut stmt = conn.prepare_cached(
        "SELECT t.id, t.name FROM tags t JOIN post_tag pt ON pt.tag_id = t.id
         WHERE pt.post_id = ?1 ORDER BY t.id",
    )?;
    let tags = stmt
        .query_map(params![post_id], |row| {
            Ok(Tag {
                id: row.get(0)?,
                name: row.get(1)?,
            })
        })?
        .collect();
    tags
}

fn load_images(conn: &Connection, post_id: i64) -> rusqlite::Result<Vec<PostImage>> {
    let mut stmt = conn.prepare_cached(
        "SELECT image_id, post_id, image_path FROM post_images WHERE post_id = ?1 ORDER BY image_id",
    )?;
    let images = stmt
        .query_map(params![post_id], |row| {
            Ok(PostImage {
                image_id: row.get(0)?,
                post_id: row.get(1)?,
                image_path: row.get(2)?,
            })
        })?
        .collect();
    images
}

/// Run a post query and attach tags and images to every row.
fn query_posts(
    conn: &Connection,
    sql: &str,
    args: impl rusqlite::Params,
) -> rusqlite::Result<Vec<Post>> {
    let mut stmt = conn.prepare(sql)?;
    let mut posts = stmt
        .query_map(args, map_post_row)?
        .collect::<rusqlite::Result<Vec<_>>>()?;
    for post in &mut posts {
        post.tags = load_tags(conn, post.post_id)?;
        post.images = load_images(conn, post.post_id)?;
    }
    Ok(posts)
}

fn replace_tags(conn: &Connection, post_id: i64, tag_ids: &[i64]) -> rusqlite::Result<()> {
    conn.execute("DELETE FROM post_tag WHERE post_id = ?1", params![post_id])?;
    for tag_id in tag_ids {
        conn.execute(
            "INSERT OR IGNORE INTO post_tag (post_id, tag_id) VALUES (?1, ?2)",
            params![post_id, tag_id],
        )?;
    }
    Ok(())
}

impl Database {
    pub fn insert_post(&self, user_id: i64, fields: &PostFields, now: DateTime<Utc>) -> Result<i64> {
        let mut conn = self.conn();
        let tx = conn.transaction().context("failed to begin transaction")?;
        let post_id: i64 = tx
            .query_row(
                "INSERT INTO posts (user_id, title, content, price, quantity, created_at, updated_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?6) RETURNING post_id",
                params![
                    user_id,
                    fields.title,
                    fields.content,
                    fields.price,
                    fields.quantity,
                    now
                ],
                |row| row.get(0),
            )
            .context("failed to insert post")?;
        replace_tags(&tx, post_id, &fields.tag_ids).context("failed to tag post")?;
        tx.commit().context("failed to commit insert_post")?;
        Ok(post_id)
    }

    pub fn update_post(&self, post_id: i64, fields: &PostFields, now: DateTime<Utc>) -> Result<()> {
        let mut conn = self.conn();
        let tx = conn.transaction().context("failed to begin transaction")?;
        tx.execute(
            "UPDATE posts SET title = ?2, content = ?3, price = ?4, quantity = ?5, updated_at = ?6
             WHERE post_id = ?1",
            params![
                post_id,
                fields.title,
                fields.content,
                fields.price,
                fields.quantity,
                now
            ],
        )
        .context("failed to update post")?;
        replace_tags(&tx, post_id, &fields.tag_ids).context("failed to retag post")?;
        tx.commit().context("failed to commit update_post")?;
        Ok(())
    }

    pub fn delete_post(&self, post_id: i64) -> Result<bool> {
        let conn = self.conn();
        let changed = conn
            .execute("DELETE FROM posts WHERE post_id = ?1", params![post_id])
            .context("failed to delete post")?;
        Ok(changed > 0)
    }

    pub fn get_post(&self, post_id: i64) -> Result<Option<Post>> {
        let conn = self.conn();
        let post = conn
            .query_row(
                &format!("{POST_SELECT} WHERE p.post_id = ?1"),
                params![post_id],
                map_post_row,
            )
            .optional()
            .context("failed to load post")?;
        match post {
            Some(mut post) => {
                post.tags = load_tags(&conn, post_id).context("failed to load post tags")?;
                post.images = load_images(&conn, post_id).context("failed to load post images")?;
                Ok(Some(post))
            }
            None => Ok(None),
        }
    }

    /// Newest first.
    pub fn list_posts(&self, offset: i64, limit: u32) -> Result<Vec<Post>> {
        let conn = self.conn();
        query_posts(
            &conn,
            &format!("{POST_SELECT} ORDER BY p.created_at DESC, p.post_id DESC LIMIT ?1 OFFSET ?2"),
            params![limit, offset],
        )
        .context("failed to list posts")
    }

    pub fn count_posts(&self) -> Result<u64> {
        let conn = self.conn();
        let count: i64 = conn
            .query_row("SELECT COUNT(*) FROM posts", [], |row| row.get(0))
            .context("failed to count posts")?;
        Ok(count as u64)
    }

    pub fn posts_by_user(&self, user_id: i64) -> Result<Vec<Post>> {
        let conn = self.conn();
        query_posts(
            &conn,
            &format!("{POST_SELECT} WHERE p.user_id = ?1 ORDER BY p.created_at DESC, p.post_id DESC"),
            params![user_id],
        )
        .context("failed to list user posts")
    }

    pub fn posts_by_role(&self, role: Role) -> Result<Vec<Post>> {
        let conn = self.conn();
        query_posts(
            &conn,
            &format!("{POST_SELECT} WHERE u.role_id = ?1 ORDER BY p.created_at DESC, p.post_id DESC"),
            params![role],
        )
        .context("failed to list posts by role")
    }

    /// Case-insensitive substring match over title and content.
    pub fn search_posts(&self, needle: &str) -> Result<Vec<Post>> {
        let pattern = format!("%{}%", escape_like(&needle.to_lowercase()));
        let conn = self.conn();
        query_posts(
            &conn,
            &format!(
                "{POST_SELECT} WHERE lower(p.title) LIKE ?1 ESCAPE '\\'
                 OR lower(p.content) LIKE ?1 ESCAPE '\\'
                 ORDER BY p.created_at DESC, p.post_id DESC"
            ),
            params![pattern],
        )
        .context("failed to search posts")
    }

    /// Posts having at least one tag whose lowercase name contains any of
    /// the (already lowercased) `words`.
    pub fn posts_with_tag_matching(&self, words: &[String]) -> Result<Vec<Post>> {
        if words.is_empty() {
            return Ok(Vec::new());
        }
        let clauses = vec![r"lower(t.name) LIKE ? ESCAPE '\'"; words.len()].join(" OR ");
        let sql = format!(
            "{POST_SELECT} WHERE p.post_id IN (
                SELECT pt.post_id FROM post_tag pt JOIN tags t ON t.id = pt.tag_id
                WHERE {clauses})
             ORDER BY p.created_at DESC, p.post_id DESC"
        );
        let patterns = words.iter().map(|w| format!("%{}%", escape_like(w)));
        let conn = self.conn();
        query_posts(&conn, &sql, params_from_iter(patterns)).context("failed to search by tag")
    }

    pub fn all_tags(&self) -> Result<Vec<Tag>> {
        let conn = self.conn();
        let mut stmt = conn
            .prepare("SELECT id, name FROM tags ORDER BY id")
            .context("failed to prepare all_tags query")?;
        let tags = stmt
            .query_map([], |row| {
                Ok(Tag {
                    id: row.get(0)?,
                    name: row.get(1)?,
                })
            })
            .context("failed to query tags")?
            .collect::<std::result::Result<Vec<_>, _>>()
            .context("failed to map tag rows")?;
        Ok(tags)
    }

    /// Ids from `tag_ids` that do not exist.
    pub fn missing_tag_ids(&self, tag_ids: &[i64]) -> Result<Vec<i64>> {
        let conn = self.conn();
        let mut missing = Vec::new();
        for id in tag_ids {
            let exists: bool = conn
                .query_row(
                    "SELECT EXISTS(SELECT 1 FROM tags WHERE id = ?1)",
                    params![id],
                    |row| row.get(0),
                )
                .context("failed to check tag")?;
            if !exists {
                missing.push(*id);
            }
        }
        Ok(missing)
    }

    pub fn add_post_image(&self, post_id: i64, image_path: &str) -> Result<PostImage> {
        let conn = self.conn();
        conn.query_row(
            "INSERT INTO post_images (post_id, image_path) VALUES (?1, ?2)
             RETURNING image_id, post_id, image_path",
            params![post_id, image_path],
            |row| {
                Ok(PostImage {
                    image_id: row.get(0)?,
                    post_id: row.get(1)?,
                    image_path: row.get(2)?,
                })
            },
        )
        .context("failed to insert post image")
    }

    /// Every image attached to any of the user's posts.
    pub fn images_for_user(&self, user_id: i64) -> Result<Vec<PostImage>> {
        let conn = self.conn();
        let mut stmt = conn
            .prepare(
                "SELECT i.image_id, i.post_id, i.image_path FROM post_images i
                 JOIN posts p ON p.post_id = i.post_id
                 WHERE p.user_id = ?1 ORDER BY i.image_id",
            )
            .context("failed to prepare images_for_user query")?;
        let images = stmt
            .query_map(params![user_id], |row| {
                Ok(PostImage {
                    image_id: row.get(0)?,
                    post_id: row.get(1)?,
                    image_path: row.get(2)?,
                })
            })
            .context("failed to query user images")?
            .collect::<std::result::Result<Vec<_>, _>>()
            .context("failed to map image rows")?;
        Ok(images)
    }
}

/// Escape `%`, `_` and `\` so user input matches literally under `ESCAPE '\'`.
fn escape_like(text: &str) -> String {
    let mut escaped = String::with_capacity(text.len());
    for c in text.chars() {
        if matches!(c, '%' | '_' | '\\') {
            escaped.push('\\');
        }
        escaped.push(c);
    }
    escaped
}
