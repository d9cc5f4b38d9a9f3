use chrono::Utc;
use rusqlite::params;
use uuid::Uuid;

use super::{fmt_datetime, parse_datetime, Store, StoreError, StoreResult};
use crate::models::*;
use crate::uploads::normalize_image_path;

/// Feed projection: ?1 is always the viewer id used for `liked_by_me`
const FEED_SELECT: &str = r#"
    SELECT p.id, p.user_id, p.content, p.image, p.likes_count, p.comments_count,
           p.created_at, p.updated_at,
           u.username AS author_username, u.profile_picture AS author_picture,
           EXISTS(SELECT 1 FROM likes l WHERE l.post_id = p.id AND l.user_id = ?1) AS liked_by_me
    FROM posts p JOIN users u ON u.id = p.user_id
"#;

impl Store {
    // ==================== Post Operations ====================

    pub fn create_post(&self, post: &mut Post) -> StoreResult<()> {
        let conn = self.conn();
        post.id = Uuid::new_v4().to_string();
        let now = Utc::now();
        post.created_at = now;
        post.updated_at = now;
        post.likes_count = 0;
        post.comments_count = 0;
        post.image = post.image.as_deref().and_then(normalize_image_path);

        conn.execute(
            r#"INSERT INTO posts (id, user_id, content, image, likes_count, comments_count, created_at, updated_at)
               VALUES (?1, ?2, ?3, ?4, 0, 0, ?5, ?6)"#,
            params![
                &post.id,
                &post.user_id,
                &post.content,
                &post.image,
                fmt_datetime(&post.created_at),
                fmt_datetime(&post.updated_at),
            ],
        )?;
        Ok(())
    }

    pub fn get_post(&self, id: &str) -> StoreResult<Post> {
        let conn = self.conn();
        conn.query_row("SELECT * FROM posts WHERE id = ?1", params![id], row_to_post)
            .map_err(|e| match e {
                rusqlite::Error::QueryReturnedNoRows => StoreError::NotFound(format!("Post {}", id)),
                _ => e.into(),
            })
    }

    pub fn get_feed_item(&self, id: &str, viewer_id: &str) -> StoreResult<FeedItem> {
        let conn = self.conn();
        conn.query_row(
            &format!("{} WHERE p.id = ?2", FEED_SELECT),
            params![viewer_id, id],
            row_to_feed_item,
        )
        .map_err(|e| match e {
            rusqlite::Error::QueryReturnedNoRows => StoreError::NotFound(format!("Post {}", id)),
            _ => e.into(),
        })
    }

    /// Global feed, newest first
    pub fn list_feed(&self, viewer_id: &str, limit: i64, offset: i64) -> StoreResult<Vec<FeedItem>> {
        let conn = self.conn();
        let mut stmt = conn.prepare(&format!(
            "{} ORDER BY p.created_at DESC, p.rowid DESC LIMIT ?2 OFFSET ?3",
            FEED_SELECT
        ))?;
        let items = stmt
            .query_map(params![viewer_id, limit, offset], row_to_feed_item)?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(items)
    }

    pub fn list_user_feed(
        &self,
        user_id: &str,
        viewer_id: &str,
        limit: i64,
        offset: i64,
    ) -> StoreResult<Vec<FeedItem>> {
        let conn = self.conn();
        let mut stmt = conn.prepare(&format!(
            "{} WHERE p.user_id = ?2 ORDER BY p.created_at DESC, p.rowid DESC LIMIT ?3 OFFSET ?4",
            FEED_SELECT
        ))?;
        let items = stmt
            .query_map(params![viewer_id, user_id, limit, offset], row_to_feed_item)?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(items)
    }

    pub fn count_posts_by_user(&self, user_id: &str) -> StoreResult<i64> {
        let conn = self.conn();
        let count: i64 = conn.query_row(
            "SELECT COUNT(*) FROM posts WHERE user_id = ?1",
            params![user_id],
            |row| row.get(0),
        )?;
        Ok(count)
    }

    pub fn update_post_content(&self, id: &str, content: &str) -> StoreResult<()> {
        let conn = self.conn();
        let rows = conn.execute(
            "UPDATE posts SET content = ?1, updated_at = ?2 WHERE id = ?3",
            params![content, fmt_datetime(&Utc::now()), id],
        )?;
        if rows == 0 {
            return Err(StoreError::NotFound(format!("Post {}", id)));
        }
        Ok(())
    }

    /// Delete a post together with its comments and likes.
    /// Returns the removed post so the caller can clean up its image.
    pub fn delete_post(&self, id: &str) -> StoreResult<Post> {
        let mut conn = self.conn();
        let tx = conn.transaction()?;

        let post = tx
            .query_row("SELECT * FROM posts WHERE id = ?1", params![id], row_to_post)
            .map_err(|e| match e {
                rusqlite::Error::QueryReturnedNoRows => StoreError::NotFound(format!("Post {}", id)),
                _ => e.into(),
            })?;

        tx.execute("DELETE FROM likes WHERE post_id = ?1", params![id])?;
        tx.execute("DELETE FROM comments WHERE post_id = ?1", params![id])?;
        tx.execute("DELETE FROM posts WHERE id = ?1", params![id])?;
        tx.commit()?;

        Ok(post)
    }
}

pub(super) fn row_to_post(row: &rusqlite::Row) -> rusqlite::Result<Post> {
    let image: Option<String> = row.get("image")?;
    Ok(Post {
        id: row.get("id")?,
        user_id: row.get("user_id")?,
        content: row.get("content")?,
        image: image.as_deref().and_then(normalize_image_path),
        likes_count: row.get("likes_count")?,
        comments_count: row.get("comments_count")?,
        created_at: parse_datetime(row.get::<_, String>("created_at")?),
        updated_at: parse_datetime(row.get::<_, String>("updated_at")?),
    })
}

fn row_to_feed_item(row: &rusqlite::Row) -> rusqlite::Result<FeedItem> {
    let post = row_to_post(row)?;
    let author = UserSummary {
        id: post.user_id.clone(),
        username: row.get("author_username")?,
        profile_picture: row.get("author_picture")?,
    };
    Ok(FeedItem {
        post,
        author,
        liked_by_me: row.get("liked_by_me")?,
    })
}
