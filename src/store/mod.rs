use chrono::{DateTime, SecondsFormat, Utc};
use rusqlite::{params, Connection, ErrorCode};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use thiserror::Error;
use uuid::Uuid;

use crate::models::*;

mod messages;
mod posts;
mod social;

#[derive(Error, Debug)]
pub enum StoreError {
    #[error("Database error: {0}")]
    Database(rusqlite::Error),
    #[error("Not found: {0}")]
    NotFound(String),
    #[error("Conflict: {0}")]
    Conflict(String),
}

impl From<rusqlite::Error> for StoreError {
    fn from(e: rusqlite::Error) -> Self {
        match &e {
            rusqlite::Error::SqliteFailure(err, msg) if err.code == ErrorCode::ConstraintViolation => {
                StoreError::Conflict(msg.clone().unwrap_or_else(|| "constraint violation".to_string()))
            }
            _ => StoreError::Database(e),
        }
    }
}

pub type StoreResult<T> = Result<T, StoreError>;

/// Thread-safe SQLite store
pub struct Store {
    conn: Arc<Mutex<Connection>>,
}

impl Store {
    /// Create a new store with the given database path (":memory:" for an ephemeral one)
    pub fn new(db_path: &str) -> StoreResult<Self> {
        let conn = Connection::open(db_path)?;
        let store = Self {
            conn: Arc::new(Mutex::new(conn)),
        };
        store.init_schema()?;
        Ok(store)
    }

    /// Create an in-memory store for testing
    pub fn in_memory() -> StoreResult<Self> {
        let conn = Connection::open_in_memory()?;
        let store = Self {
            conn: Arc::new(Mutex::new(conn)),
        };
        store.init_schema()?;
        Ok(store)
    }

    /// Poisoned locks are reused; open transactions roll back on drop.
    fn conn(&self) -> MutexGuard<'_, Connection> {
        self.conn.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn init_schema(&self) -> StoreResult<()> {
        let conn = self.conn();
        conn.execute_batch(
            r#"
            PRAGMA foreign_keys = ON;

            CREATE TABLE IF NOT EXISTS users (
                id TEXT PRIMARY KEY,
                username TEXT UNIQUE NOT NULL COLLATE NOCASE,
                email TEXT UNIQUE NOT NULL COLLATE NOCASE,
                password_hash TEXT NOT NULL DEFAULT '',
                profile_picture TEXT NOT NULL DEFAULT '',
                bio TEXT NOT NULL DEFAULT '',
                google_id TEXT UNIQUE,
                created_at TEXT NOT NULL,
                updated_at TEXT NOT NULL
            );

            CREATE TABLE IF NOT EXISTS sessions (
                id TEXT PRIMARY KEY,
                user_id TEXT NOT NULL,
                expires_at TEXT NOT NULL,
                created_at TEXT NOT NULL,
                FOREIGN KEY (user_id) REFERENCES users(id)
            );

            CREATE TABLE IF NOT EXISTS posts (
                id TEXT PRIMARY KEY,
                user_id TEXT NOT NULL,
                content TEXT NOT NULL DEFAULT '',
                image TEXT,
                likes_count INTEGER NOT NULL DEFAULT 0,
                comments_count INTEGER NOT NULL DEFAULT 0,
                created_at TEXT NOT NULL,
                updated_at TEXT NOT NULL,
                FOREIGN KEY (user_id) REFERENCES users(id)
            );

            CREATE TABLE IF NOT EXISTS comments (
                id TEXT PRIMARY KEY,
                post_id TEXT NOT NULL,
                user_id TEXT NOT NULL,
                content TEXT NOT NULL,
                created_at TEXT NOT NULL,
                updated_at TEXT NOT NULL,
                FOREIGN KEY (post_id) REFERENCES posts(id),
                FOREIGN KEY (user_id) REFERENCES users(id)
            );

            CREATE TABLE IF NOT EXISTS likes (
                id TEXT PRIMARY KEY,
                user_id TEXT NOT NULL,
                post_id TEXT NOT NULL,
                created_at TEXT NOT NULL,
                FOREIGN KEY (user_id) REFERENCES users(id),
                FOREIGN KEY (post_id) REFERENCES posts(id),
                UNIQUE(user_id, post_id)
            );

            CREATE TABLE IF NOT EXISTS messages (
                id TEXT PRIMARY KEY,
                sender_id TEXT NOT NULL,
                receiver_id TEXT NOT NULL,
                content TEXT NOT NULL,
                read INTEGER NOT NULL DEFAULT 0,
                created_at TEXT NOT NULL,
                FOREIGN KEY (sender_id) REFERENCES users(id),
                FOREIGN KEY (receiver_id) REFERENCES users(id)
            );

            CREATE INDEX IF NOT EXISTS idx_sessions_user_id ON sessions(user_id);
            CREATE INDEX IF NOT EXISTS idx_posts_user_id ON posts(user_id);
            CREATE INDEX IF NOT EXISTS idx_posts_created_at ON posts(created_at);
            CREATE INDEX IF NOT EXISTS idx_comments_post_id ON comments(post_id);
            CREATE INDEX IF NOT EXISTS idx_likes_post_id ON likes(post_id);
            CREATE INDEX IF NOT EXISTS idx_messages_pair ON messages(sender_id, receiver_id);
            CREATE INDEX IF NOT EXISTS idx_messages_receiver ON messages(receiver_id, read);
            "#,
        )?;
        Ok(())
    }

    // ==================== User Operations ====================

    pub fn create_user(&self, user: &mut User) -> StoreResult<()> {
        let conn = self.conn();
        user.id = Uuid::new_v4().to_string();
        let now = Utc::now();
        user.created_at = now;
        user.updated_at = now;

        conn.execute(
            r#"INSERT INTO users (id, username, email, password_hash, profile_picture, bio,
                google_id, created_at, updated_at)
               VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)"#,
            params![
                &user.id,
                &user.username,
                &user.email,
                &user.password_hash,
                &user.profile_picture,
                &user.bio,
                &user.google_id,
                fmt_datetime(&user.created_at),
                fmt_datetime(&user.updated_at),
            ],
        )?;
        Ok(())
    }

    pub fn get_user(&self, id: &str) -> StoreResult<User> {
        self.find_user("id", id)
    }

    pub fn get_user_by_username(&self, username: &str) -> StoreResult<User> {
        self.find_user("username", username)
    }

    pub fn get_user_by_email(&self, email: &str) -> StoreResult<User> {
        self.find_user("email", email)
    }

    pub fn get_user_by_google_id(&self, google_id: &str) -> StoreResult<User> {
        self.find_user("google_id", google_id)
    }

    fn find_user(&self, column: &'static str, value: &str) -> StoreResult<User> {
        let conn = self.conn();
        conn.query_row(
            &format!("SELECT * FROM users WHERE {} = ?1", column),
            params![value],
            row_to_user,
        )
        .map_err(|e| match e {
            rusqlite::Error::QueryReturnedNoRows => StoreError::NotFound(format!("User {}", value)),
            _ => e.into(),
        })
    }

    /// Persist the editable profile fields (username, bio, picture, google link)
    pub fn update_user(&self, user: &mut User) -> StoreResult<()> {
        let conn = self.conn();
        user.updated_at = Utc::now();

        let rows = conn.execute(
            r#"UPDATE users SET username = ?1, bio = ?2, profile_picture = ?3, google_id = ?4,
               updated_at = ?5 WHERE id = ?6"#,
            params![
                &user.username,
                &user.bio,
                &user.profile_picture,
                &user.google_id,
                fmt_datetime(&user.updated_at),
                &user.id,
            ],
        )?;

        if rows == 0 {
            return Err(StoreError::NotFound(format!("User {}", user.id)));
        }
        Ok(())
    }

    pub fn list_users(&self, limit: i64, offset: i64) -> StoreResult<Vec<UserSummary>> {
        let conn = self.conn();
        let mut stmt = conn.prepare(
            "SELECT id, username, profile_picture FROM users ORDER BY username ASC LIMIT ?1 OFFSET ?2",
        )?;
        let users = stmt
            .query_map(params![limit, offset], row_to_summary)?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(users)
    }

    /// Case-insensitive substring match on username
    pub fn search_users(&self, query: &str, limit: i64) -> StoreResult<Vec<UserSummary>> {
        let conn = self.conn();
        let pattern = format!("%{}%", escape_like(query));
        let mut stmt = conn.prepare(
            r#"SELECT id, username, profile_picture FROM users
               WHERE username LIKE ?1 ESCAPE '\' ORDER BY username ASC LIMIT ?2"#,
        )?;
        let users = stmt
            .query_map(params![pattern, limit], row_to_summary)?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(users)
    }

    pub fn count_users(&self) -> StoreResult<i64> {
        let conn = self.conn();
        let count: i64 = conn.query_row("SELECT COUNT(*) FROM users", [], |row| row.get(0))?;
        Ok(count)
    }

    // ==================== Session Operations ====================

    pub fn create_session(&self, session: &mut Session) -> StoreResult<()> {
        let conn = self.conn();
        session.id = Uuid::new_v4().to_string();
        session.created_at = Utc::now();

        conn.execute(
            r#"INSERT INTO sessions (id, user_id, expires_at, created_at)
               VALUES (?1, ?2, ?3, ?4)"#,
            params![
                &session.id,
                &session.user_id,
                fmt_datetime(&session.expires_at),
                fmt_datetime(&session.created_at),
            ],
        )?;
        Ok(())
    }

    pub fn get_session(&self, id: &str) -> StoreResult<Session> {
        let conn = self.conn();
        conn.query_row(
            "SELECT * FROM sessions WHERE id = ?1",
            params![id],
            |row| {
                Ok(Session {
                    id: row.get("id")?,
                    user_id: row.get("user_id")?,
                    expires_at: parse_datetime(row.get::<_, String>("expires_at")?),
                    created_at: parse_datetime(row.get::<_, String>("created_at")?),
                })
            },
        )
        .map_err(|e| match e {
            rusqlite::Error::QueryReturnedNoRows => StoreError::NotFound("Session".to_string()),
            _ => e.into(),
        })
    }

    /// Returns whether a session was actually removed
    pub fn delete_session(&self, id: &str) -> StoreResult<bool> {
        let conn = self.conn();
        let rows = conn.execute("DELETE FROM sessions WHERE id = ?1", params![id])?;
        Ok(rows > 0)
    }

    pub fn delete_expired_sessions(&self) -> StoreResult<usize> {
        let conn = self.conn();
        let rows = conn.execute(
            "DELETE FROM sessions WHERE expires_at < ?1",
            params![fmt_datetime(&Utc::now())],
        )?;
        Ok(rows)
    }
}

fn row_to_user(row: &rusqlite::Row) -> rusqlite::Result<User> {
    Ok(User {
        id: row.get("id")?,
        username: row.get("username")?,
        email: row.get("email")?,
        password_hash: row.get("password_hash")?,
        profile_picture: row.get("profile_picture")?,
        bio: row.get("bio")?,
        google_id: row.get("google_id")?,
        created_at: parse_datetime(row.get::<_, String>("created_at")?),
        updated_at: parse_datetime(row.get::<_, String>("updated_at")?),
    })
}

fn row_to_summary(row: &rusqlite::Row) -> rusqlite::Result<UserSummary> {
    Ok(UserSummary {
        id: row.get("id")?,
        username: row.get("username")?,
        profile_picture: row.get("profile_picture")?,
    })
}

/// Fixed-width RFC 3339 so that TEXT ordering matches time ordering
pub(crate) fn fmt_datetime(dt: &DateTime<Utc>) -> String {
    dt.to_rfc3339_opts(SecondsFormat::Micros, true)
}

fn parse_datetime(s: String) -> DateTime<Utc> {
    DateTime::parse_from_rfc3339(&s)
        .map(|dt| dt.with_timezone(&Utc))
        .unwrap_or_else(|_| Utc::now())
}

fn escape_like(s: &str) -> String {
    s.replace('\\', "\\\\").replace('%', "\\%").replace('_', "\\_")
}

#[cfg(test)]
pub(crate) fn test_user(store: &Store, username: &str) -> User {
    let mut user = User::new(username, format!("{}@example.com", username), "hash".to_string());
    store.create_user(&mut user).unwrap();
    user
}
