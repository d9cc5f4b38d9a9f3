use chrono::Utc;
use rusqlite::{params, OptionalExtension, Transaction};
use uuid::Uuid;

use super::{fmt_datetime, parse_datetime, row_to_summary, Store, StoreError, StoreResult};
use crate::models::*;

impl Store {
    // ==================== Like Operations ====================

    /// Flip the viewer's like on a post. The like row and `likes_count` change in one transaction.
    pub fn toggle_like(&self, user_id: &str, post_id: &str) -> StoreResult<LikeStatus> {
        let mut conn = self.conn();
        let tx = conn.transaction()?;
        ensure_post(&tx, post_id)?;

        let removed = tx.execute(
            "DELETE FROM likes WHERE user_id = ?1 AND post_id = ?2",
            params![user_id, post_id],
        )?;

        let liked = if removed > 0 {
            tx.execute(
                "UPDATE posts SET likes_count = MAX(likes_count - 1, 0) WHERE id = ?1",
                params![post_id],
            )?;
            false
        } else {
            tx.execute(
                "INSERT INTO likes (id, user_id, post_id, created_at) VALUES (?1, ?2, ?3, ?4)",
                params![
                    Uuid::new_v4().to_string(),
                    user_id,
                    post_id,
                    fmt_datetime(&Utc::now()),
                ],
            )?;
            tx.execute(
                "UPDATE posts SET likes_count = likes_count + 1 WHERE id = ?1",
                params![post_id],
            )?;
            true
        };

        let likes_count: i64 = tx.query_row(
            "SELECT likes_count FROM posts WHERE id = ?1",
            params![post_id],
            |row| row.get(0),
        )?;
        tx.commit()?;

        Ok(LikeStatus { liked, likes_count })
    }

    pub fn like_status(&self, user_id: &str, post_id: &str) -> StoreResult<LikeStatus> {
        let conn = self.conn();
        conn.query_row(
            r#"SELECT p.likes_count,
                      EXISTS(SELECT 1 FROM likes l WHERE l.post_id = p.id AND l.user_id = ?1)
               FROM posts p WHERE p.id = ?2"#,
            params![user_id, post_id],
            |row| {
                Ok(LikeStatus {
                    likes_count: row.get(0)?,
                    liked: row.get(1)?,
                })
            },
        )
        .map_err(|e| match e {
            rusqlite::Error::QueryReturnedNoRows => StoreError::NotFound(format!("Post {}", post_id)),
            _ => e.into(),
        })
    }

    /// Users who liked a post, most recent first
    pub fn list_likers(&self, post_id: &str) -> StoreResult<Vec<UserSummary>> {
        let conn = self.conn();
        let mut stmt = conn.prepare(
            r#"SELECT u.id, u.username, u.profile_picture FROM likes l
               JOIN users u ON u.id = l.user_id
               WHERE l.post_id = ?1 ORDER BY l.created_at DESC"#,
        )?;
        let users = stmt
            .query_map(params![post_id], row_to_summary)?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(users)
    }

    pub fn count_likes(&self, post_id: &str) -> StoreResult<i64> {
        let conn = self.conn();
        let count: i64 = conn.query_row(
            "SELECT COUNT(*) FROM likes WHERE post_id = ?1",
            params![post_id],
            |row| row.get(0),
        )?;
        Ok(count)
    }

    // ==================== Comment Operations ====================

    pub fn create_comment(&self, comment: &mut Comment) -> StoreResult<()> {
        let mut conn = self.conn();
        comment.id = Uuid::new_v4().to_string();
        let now = Utc::now();
        comment.created_at = now;
        comment.updated_at = now;

        let tx = conn.transaction()?;
        ensure_post(&tx, &comment.post_id)?;
        tx.execute(
            r#"INSERT INTO comments (id, post_id, user_id, content, created_at, updated_at)
               VALUES (?1, ?2, ?3, ?4, ?5, ?6)"#,
            params![
                &comment.id,
                &comment.post_id,
                &comment.user_id,
                &comment.content,
                fmt_datetime(&comment.created_at),
                fmt_datetime(&comment.updated_at),
            ],
        )?;
        tx.execute(
            "UPDATE posts SET comments_count = comments_count + 1 WHERE id = ?1",
            params![&comment.post_id],
        )?;
        tx.commit()?;
        Ok(())
    }

    pub fn get_comment(&self, id: &str) -> StoreResult<Comment> {
        let conn = self.conn();
        conn.query_row("SELECT * FROM comments WHERE id = ?1", params![id], row_to_comment)
            .map_err(|e| match e {
                rusqlite::Error::QueryReturnedNoRows => StoreError::NotFound(format!("Comment {}", id)),
                _ => e.into(),
            })
    }

    /// Comments on a post with their authors, oldest first
    pub fn list_comments(&self, post_id: &str) -> StoreResult<Vec<CommentView>> {
        let conn = self.conn();
        let mut stmt = conn.prepare(
            r#"SELECT c.*, u.username AS author_username, u.profile_picture AS author_picture
               FROM comments c JOIN users u ON u.id = c.user_id
               WHERE c.post_id = ?1 ORDER BY c.created_at ASC, c.rowid ASC"#,
        )?;
        let comments = stmt
            .query_map(params![post_id], |row| {
                let comment = row_to_comment(row)?;
                Ok(CommentView {
                    author: UserSummary {
                        id: comment.user_id.clone(),
                        username: row.get("author_username")?,
                        profile_picture: row.get("author_picture")?,
                    },
                    comment,
                })
            })?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(comments)
    }

    pub fn count_comments(&self, post_id: &str) -> StoreResult<i64> {
        let conn = self.conn();
        let count: i64 = conn.query_row(
            "SELECT COUNT(*) FROM comments WHERE post_id = ?1",
            params![post_id],
            |row| row.get(0),
        )?;
        Ok(count)
    }

    /// Delete a comment and decrement its post's `comments_count` in one transaction
    pub fn delete_comment(&self, id: &str) -> StoreResult<()> {
        let mut conn = self.conn();
        let tx = conn.transaction()?;

        let post_id: Option<String> = tx
            .query_row("SELECT post_id FROM comments WHERE id = ?1", params![id], |row| row.get(0))
            .optional()?;
        let post_id = post_id.ok_or_else(|| StoreError::NotFound(format!("Comment {}", id)))?;

        tx.execute("DELETE FROM comments WHERE id = ?1", params![id])?;
        tx.execute(
            "UPDATE posts SET comments_count = MAX(comments_count - 1, 0) WHERE id = ?1",
            params![post_id],
        )?;
        tx.commit()?;
        Ok(())
    }
}

fn ensure_post(tx: &Transaction, post_id: &str) -> StoreResult<()> {
    let exists: bool = tx.query_row(
        "SELECT EXISTS(SELECT 1 FROM posts WHERE id = ?1)",
        params![post_id],
        |row| row.get(0),
    )?;
    if !exists {
        return Err(StoreError::NotFound(format!("Post {}", post_id)));
    }
    Ok(())
}

fn row_to_comment(row: &rusqlite::Row) -> rusqlite::Result<Comment> {
    Ok(Comment {
        id: row.get("id")?,
        post_id: row.get("post_id")?,
        user_id: row.get("user_id")?,
        content: row.get("content")?,
        created_at: parse_datetime(row.get::<_, String>("created_at")?),
        updated_at: parse_datetime(row.get::<_, String>("updated_at")?),
    })
}
