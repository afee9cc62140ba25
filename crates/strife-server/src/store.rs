//! Persistent state: users, friendships, groups/chats, messages, and file
//! metadata. Backed by SQLite, schema and queries grounded in the reference
//! database handler.

use anyhow::{bail, Result};
use sha2::{Digest, Sha256};
use sqlx::sqlite::{SqliteConnectOptions, SqlitePoolOptions};
use sqlx::SqlitePool;
use strife_crypto::aes;

const DEFAULT_PROFILE_PICTURES: &[&str] = &[
    "placeholder1.png",
    "placeholder2.png",
    "placeholder3.png",
    "placeholder4.png",
    "placeholder5.png",
];
const DEFAULT_STATUS: &str = "I love strife!";

pub struct Store {
    pool: SqlitePool,
}

#[derive(Debug, Clone)]
pub struct ChatMessage {
    pub timestamp: i64,
    pub sender_username: String,
    pub message: String,
}

impl Store {
    pub async fn connect(db_path: &str) -> Result<Self> {
        let options = SqliteConnectOptions::new()
            .filename(db_path)
            .create_if_missing(true);
        // A pooled ":memory:" database gives each connection its own private
        // database, so pool to a single connection to keep them sharing state.
        let max_connections = if db_path == ":memory:" { 1 } else { 8 };
        let pool = SqlitePoolOptions::new().max_connections(max_connections).connect_with(options).await?;
        let store = Self { pool };
        store.create_tables().await?;
        Ok(store)
    }

    async fn create_tables(&self) -> Result<()> {
        sqlx::query(
            "CREATE TABLE IF NOT EXISTS users_table (
                unique_id INTEGER PRIMARY KEY,
                username TEXT UNIQUE,
                password CHAR(64),
                picture TEXT,
                status TEXT)",
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            "CREATE TABLE IF NOT EXISTS groups_table (
                chat_id INTEGER PRIMARY KEY,
                group_name TEXT,
                date_of_creation INTEGER)",
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            "CREATE TABLE IF NOT EXISTS participants_table (
                participant_unique_id INTEGER,
                chat_id INTEGER)",
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            "CREATE TABLE IF NOT EXISTS files_table (
                file_name TEXT,
                chat_id INTEGER,
                file_hash CHAR(64))",
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            "CREATE TABLE IF NOT EXISTS messages_table (
                chat_id INTEGER,
                timestamp INTEGER,
                sender_unique_id INTEGER,
                message TEXT)",
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            "CREATE TABLE IF NOT EXISTS friends_table (
                user_id INTEGER,
                friend_id INTEGER,
                PRIMARY KEY (user_id, friend_id))",
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            "CREATE TABLE IF NOT EXISTS user_keys_table (
                user_id INTEGER,
                chat_id INTEGER,
                wrapped_key TEXT,
                PRIMARY KEY (user_id, chat_id))",
        )
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    fn hash_password(password: &str) -> String {
        let digest = Sha256::digest(password.as_bytes());
        digest.iter().map(|b| format!("{b:02x}")).collect()
    }

    /// A user's password never changes AES key length requirements the way
    /// its own hash does; this derives a fixed 32-character AES key from it
    /// so per-chat keys can be wrapped at rest (§4.7 `ChangePassword` note:
    /// keys wrapped under an old password are not retroactively rewrapped).
    fn derive_wrapping_key(password: &str) -> String {
        let digest = Sha256::digest(password.as_bytes());
        let hex: String = digest.iter().map(|b| format!("{b:02x}")).collect();
        hex[..32].to_string()
    }

    pub async fn user_exists(&self, username: &str) -> Result<bool> {
        let row: Option<(i64,)> = sqlx::query_as("SELECT unique_id FROM users_table WHERE username = ?")
            .bind(username)
            .fetch_optional(&self.pool)
            .await?;
        Ok(row.is_some())
    }

    /// Returns `true` if the user was created, `false` if the username is taken.
    pub async fn add_user(&self, username: &str, password: &str) -> Result<bool> {
        if self.user_exists(username).await? {
            return Ok(false);
        }
        let picture = DEFAULT_PROFILE_PICTURES[rand::random::<usize>() % DEFAULT_PROFILE_PICTURES.len()];
        sqlx::query(
            "INSERT INTO users_table (username, password, picture, status) VALUES (?, ?, ?, ?)",
        )
        .bind(username)
        .bind(Self::hash_password(password))
        .bind(picture)
        .bind(DEFAULT_STATUS)
        .execute(&self.pool)
        .await?;
        Ok(true)
    }

    pub async fn check_credentials(&self, username: &str, password: &str) -> Result<bool> {
        let row: Option<(String,)> = sqlx::query_as("SELECT password FROM users_table WHERE username = ?")
            .bind(username)
            .fetch_optional(&self.pool)
            .await?;
        Ok(matches!(row, Some((hash,)) if hash == Self::hash_password(password)))
    }

    pub async fn change_password(&self, username: &str, new_password: &str) -> Result<()> {
        sqlx::query("UPDATE users_table SET password = ? WHERE username = ?")
            .bind(Self::hash_password(new_password))
            .bind(username)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    /// Returns `true` if the rename succeeded, `false` if `new_username` is taken.
    pub async fn change_username(&self, old_username: &str, new_username: &str) -> Result<bool> {
        if self.user_exists(new_username).await? {
            return Ok(false);
        }
        sqlx::query("UPDATE users_table SET username = ? WHERE username = ?")
            .bind(new_username)
            .bind(old_username)
            .execute(&self.pool)
            .await?;
        Ok(true)
    }

    pub async fn get_unique_id(&self, username: &str) -> Result<Option<i64>> {
        let row: Option<(i64,)> = sqlx::query_as("SELECT unique_id FROM users_table WHERE username = ?")
            .bind(username)
            .fetch_optional(&self.pool)
            .await?;
        Ok(row.map(|(id,)| id))
    }

    pub async fn get_user_status(&self, username: &str) -> Result<Option<String>> {
        let row: Option<(String,)> = sqlx::query_as("SELECT status FROM users_table WHERE username = ?")
            .bind(username)
            .fetch_optional(&self.pool)
            .await?;
        Ok(row.map(|(s,)| s))
    }

    pub async fn update_user_status(&self, username: &str, new_status: &str) -> Result<()> {
        sqlx::query("UPDATE users_table SET status = ? WHERE username = ?")
            .bind(new_status)
            .bind(username)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    pub async fn get_user_picture_path(&self, username: &str) -> Result<Option<String>> {
        let row: Option<(String,)> = sqlx::query_as("SELECT picture FROM users_table WHERE username = ?")
            .bind(username)
            .fetch_optional(&self.pool)
            .await?;
        Ok(row.map(|(p,)| p))
    }

    pub async fn update_user_picture(&self, username: &str, picture_path: &str) -> Result<()> {
        sqlx::query("UPDATE users_table SET picture = ? WHERE username = ?")
            .bind(picture_path)
            .bind(username)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn are_friends(&self, user_id: i64, friend_id: i64) -> Result<bool> {
        let row: Option<(i64,)> = sqlx::query_as(
            "SELECT user_id FROM friends_table WHERE (user_id = ? AND friend_id = ?) OR (user_id = ? AND friend_id = ?)",
        )
        .bind(user_id)
        .bind(friend_id)
        .bind(friend_id)
        .bind(user_id)
        .fetch_optional(&self.pool)
        .await?;
        Ok(row.is_some())
    }

    pub async fn can_add_friend(&self, username: &str, friend: &str) -> Result<bool> {
        let (Some(user_id), Some(friend_id)) =
            (self.get_unique_id(username).await?, self.get_unique_id(friend).await?)
        else {
            return Ok(false);
        };
        Ok(!self.are_friends(user_id, friend_id).await?)
    }

    /// Records the friendship and creates the private chat backing it.
    /// Returns the new chat's id, or `None` if the pair couldn't be friended.
    pub async fn add_friend(&self, username: &str, friend: &str) -> Result<Option<i64>> {
        if !self.can_add_friend(username, friend).await? {
            return Ok(None);
        }
        let user_id = self.get_unique_id(username).await?.unwrap();
        let friend_id = self.get_unique_id(friend).await?.unwrap();

        sqlx::query("INSERT INTO friends_table (user_id, friend_id) VALUES (?, ?)")
            .bind(user_id)
            .bind(friend_id)
            .execute(&self.pool)
            .await?;

        let chat_id = self
            .create_group(&format!("PRIVATE%%{username}%%{friend}"), username)
            .await?;
        self.add_to_group_unchecked(chat_id, friend).await?;
        Ok(Some(chat_id))
    }

    pub async fn remove_friend(&self, username: &str, friend: &str) -> Result<()> {
        let Some(user_id) = self.get_unique_id(username).await? else {
            bail!("user {username} doesn't exist");
        };
        let Some(friend_id) = self.get_unique_id(friend).await? else {
            bail!("user {friend} doesn't exist");
        };
        sqlx::query(
            "DELETE FROM friends_table WHERE (user_id = ? AND friend_id = ?) OR (user_id = ? AND friend_id = ?)",
        )
        .bind(user_id)
        .bind(friend_id)
        .bind(friend_id)
        .bind(user_id)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    pub async fn get_friends_of(&self, username: &str) -> Result<Vec<String>> {
        let Some(user_id) = self.get_unique_id(username).await? else {
            return Ok(Vec::new());
        };
        let rows: Vec<(String,)> = sqlx::query_as(
            "SELECT u.username FROM friends_table f
             JOIN users_table u ON u.unique_id = CASE WHEN f.user_id = ? THEN f.friend_id ELSE f.user_id END
             WHERE f.user_id = ? OR f.friend_id = ?",
        )
        .bind(user_id)
        .bind(user_id)
        .bind(user_id)
        .fetch_all(&self.pool)
        .await?;
        Ok(rows.into_iter().map(|(name,)| name).collect())
    }

    fn group_name_valid(group_name: &str) -> bool {
        !group_name.is_empty() && !group_name.starts_with("PRIVATE%%")
    }

    /// Creates a group chat and adds `creator` as its first member. Private
    /// one-on-one chats are created with a `PRIVATE%%a%%b` name and bypass
    /// the group-name validation that blocks user-supplied names from
    /// colliding with that reserved prefix.
    pub async fn create_group(&self, group_name: &str, creator: &str) -> Result<i64> {
        if !group_name.starts_with("PRIVATE%%") && !Self::group_name_valid(group_name) {
            bail!("invalid group name");
        }
        let chat_id: (i64,) = sqlx::query_as(
            "INSERT INTO groups_table (group_name, date_of_creation) VALUES (?, unixepoch()) RETURNING chat_id",
        )
        .bind(group_name)
        .fetch_one(&self.pool)
        .await?;
        self.add_to_group_unchecked(chat_id.0, creator).await?;
        Ok(chat_id.0)
    }

    async fn add_to_group_unchecked(&self, chat_id: i64, username: &str) -> Result<()> {
        let Some(user_id) = self.get_unique_id(username).await? else {
            bail!("user {username} doesn't exist");
        };
        sqlx::query("INSERT INTO participants_table (participant_unique_id, chat_id) VALUES (?, ?)")
            .bind(user_id)
            .bind(chat_id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    /// Adds `username` to `chat_id` on `adder`'s behalf. Rejects private
    /// one-on-one chats outright and requires `adder` to already be a member,
    /// matching `db.py::add_to_group`'s `_is_private_chat`/`is_in_group` guards.
    pub async fn add_to_group(&self, chat_id: i64, adder: &str, username: &str) -> Result<bool> {
        let Some(group_name) = self.get_group_name(chat_id).await? else {
            return Ok(false);
        };
        if group_name.starts_with("PRIVATE%%") {
            return Ok(false);
        }
        if !self.is_in_group(chat_id, adder).await? || self.is_in_group(chat_id, username).await? {
            return Ok(false);
        }
        self.add_to_group_unchecked(chat_id, username).await?;
        Ok(true)
    }

    pub async fn is_in_group(&self, chat_id: i64, username: &str) -> Result<bool> {
        let Some(user_id) = self.get_unique_id(username).await? else {
            return Ok(false);
        };
        let row: Option<(i64,)> = sqlx::query_as(
            "SELECT chat_id FROM participants_table WHERE chat_id = ? AND participant_unique_id = ?",
        )
        .bind(chat_id)
        .bind(user_id)
        .fetch_optional(&self.pool)
        .await?;
        Ok(row.is_some())
    }

    pub async fn get_group_name(&self, chat_id: i64) -> Result<Option<String>> {
        let row: Option<(String,)> = sqlx::query_as("SELECT group_name FROM groups_table WHERE chat_id = ?")
            .bind(chat_id)
            .fetch_optional(&self.pool)
            .await?;
        Ok(row.map(|(n,)| n))
    }

    pub async fn get_group_members(&self, chat_id: i64) -> Result<Vec<String>> {
        let rows: Vec<(String,)> = sqlx::query_as(
            "SELECT u.username FROM participants_table p
             JOIN users_table u ON u.unique_id = p.participant_unique_id
             WHERE p.chat_id = ?",
        )
        .bind(chat_id)
        .fetch_all(&self.pool)
        .await?;
        Ok(rows.into_iter().map(|(name,)| name).collect())
    }

    pub async fn get_chats_of(&self, username: &str) -> Result<Vec<(i64, String)>> {
        let Some(user_id) = self.get_unique_id(username).await? else {
            return Ok(Vec::new());
        };
        let rows: Vec<(i64, String)> = sqlx::query_as(
            "SELECT g.chat_id, g.group_name FROM participants_table p
             JOIN groups_table g ON g.chat_id = p.chat_id
             WHERE p.participant_unique_id = ?",
        )
        .bind(user_id)
        .fetch_all(&self.pool)
        .await?;
        Ok(rows)
    }

    pub async fn add_message(&self, chat_id: i64, sender_username: &str, message: &str) -> Result<()> {
        let Some(sender_id) = self.get_unique_id(sender_username).await? else {
            bail!("user {sender_username} doesn't exist");
        };
        let timestamp = std::time::SystemTime::now()
            .duration_since(std::time::UNIX_EPOCH)
            .unwrap_or_default()
            .as_secs() as i64;
        sqlx::query(
            "INSERT INTO messages_table (chat_id, timestamp, sender_unique_id, message) VALUES (?, ?, ?, ?)",
        )
        .bind(chat_id)
        .bind(timestamp)
        .bind(sender_id)
        .bind(message)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    /// The most recent `limit` messages for a chat, oldest first.
    pub async fn get_chat_history(&self, chat_id: i64, limit: i64) -> Result<Vec<ChatMessage>> {
        let rows: Vec<(i64, String, String)> = sqlx::query_as(
            "SELECT m.timestamp, u.username, m.message FROM messages_table m
             JOIN users_table u ON u.unique_id = m.sender_unique_id
             WHERE m.chat_id = ? ORDER BY m.timestamp DESC LIMIT ?",
        )
        .bind(chat_id)
        .bind(limit)
        .fetch_all(&self.pool)
        .await?;
        Ok(rows
            .into_iter()
            .rev()
            .map(|(timestamp, sender_username, message)| ChatMessage {
                timestamp,
                sender_username,
                message,
            })
            .collect())
    }

    pub async fn add_file(&self, chat_id: i64, file_name: &str, file_hash: &str) -> Result<()> {
        sqlx::query("INSERT INTO files_table (file_name, chat_id, file_hash) VALUES (?, ?, ?)")
            .bind(file_name)
            .bind(chat_id)
            .bind(file_hash)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    /// Returns `(chat_id, file_name)` for a previously-registered file hash.
    pub async fn get_file(&self, file_hash: &str) -> Result<Option<(i64, String)>> {
        let row: Option<(i64, String)> =
            sqlx::query_as("SELECT chat_id, file_name FROM files_table WHERE file_hash = ?")
                .bind(file_hash)
                .fetch_optional(&self.pool)
                .await?;
        Ok(row)
    }

    pub async fn remove_file(&self, file_hash: &str) -> Result<()> {
        sqlx::query("DELETE FROM files_table WHERE file_hash = ?")
            .bind(file_hash)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    /// Wraps `key` under a key derived from `password` and persists it for
    /// `username`'s chat `chat_id`.
    pub async fn add_key(&self, username: &str, chat_id: i64, key: &str, password: &str) -> Result<()> {
        let Some(user_id) = self.get_unique_id(username).await? else {
            bail!("user {username} doesn't exist");
        };
        let wrapped = aes::encrypt(&Self::derive_wrapping_key(password), key)?;
        sqlx::query(
            "INSERT OR REPLACE INTO user_keys_table (user_id, chat_id, wrapped_key) VALUES (?, ?, ?)",
        )
        .bind(user_id)
        .bind(chat_id)
        .bind(wrapped)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    /// Unwraps every key stored for `username`, using `password` to derive
    /// the same wrapping key `add_key` used.
    pub async fn get_user_keys(&self, username: &str, password: &str) -> Result<Vec<(i64, String)>> {
        let Some(user_id) = self.get_unique_id(username).await? else {
            return Ok(Vec::new());
        };
        let rows: Vec<(i64, String)> =
            sqlx::query_as("SELECT chat_id, wrapped_key FROM user_keys_table WHERE user_id = ?")
                .bind(user_id)
                .fetch_all(&self.pool)
                .await?;

        let wrapping_key = Self::derive_wrapping_key(password);
        let mut keys = Vec::with_capacity(rows.len());
        for (chat_id, wrapped) in rows {
            match aes::decrypt(&wrapping_key, &wrapped) {
                Ok(key) => keys.push((chat_id, key)),
                Err(e) => tracing::warn!(user_id, chat_id, "failed to unwrap stored chat key: {e}"),
            }
        }
        Ok(keys)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    async fn memory_store() -> Store {
        Store::connect(":memory:").await.unwrap()
    }

    #[tokio::test]
    async fn registers_and_checks_credentials() {
        let store = memory_store().await;
        assert!(store.add_user("alice", "hunter2").await.unwrap());
        assert!(!store.add_user("alice", "other").await.unwrap());
        assert!(store.check_credentials("alice", "hunter2").await.unwrap());
        assert!(!store.check_credentials("alice", "wrong").await.unwrap());
    }

    #[tokio::test]
    async fn friending_creates_a_private_chat_both_are_members_of() {
        let store = memory_store().await;
        store.add_user("alice", "pw").await.unwrap();
        store.add_user("bob", "pw").await.unwrap();

        let chat_id = store.add_friend("alice", "bob").await.unwrap().unwrap();
        assert!(store.is_in_group(chat_id, "alice").await.unwrap());
        assert!(store.is_in_group(chat_id, "bob").await.unwrap());
        assert_eq!(store.get_friends_of("alice").await.unwrap(), vec!["bob"]);

        assert!(store.add_friend("alice", "bob").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn keys_round_trip_wrapped_under_the_users_password() {
        let store = memory_store().await;
        store.add_user("alice", "hunter2").await.unwrap();
        store.add_key("alice", 1, "chatkeyABCDEF0123456789ABCDEF01", "hunter2").await.unwrap();
        store.add_key("alice", 2, "anotherkey0123456789ABCDEF012345", "hunter2").await.unwrap();

        let mut keys = store.get_user_keys("alice", "hunter2").await.unwrap();
        keys.sort_by_key(|(chat_id, _)| *chat_id);
        assert_eq!(keys[0], (1, "chatkeyABCDEF0123456789ABCDEF01".to_string()));
        assert_eq!(keys[1], (2, "anotherkey0123456789ABCDEF012345".to_string()));
    }

    #[tokio::test]
    async fn chat_history_is_oldest_first_and_bounded() {
        let store = memory_store().await;
        store.add_user("alice", "pw").await.unwrap();
        let chat_id = store.create_group("team", "alice").await.unwrap();
        for i in 0..5 {
            store.add_message(chat_id, "alice", &format!("msg {i}")).await.unwrap();
        }
        let history = store.get_chat_history(chat_id, 3).await.unwrap();
        assert_eq!(history.len(), 3);
        assert_eq!(history[0].message, "msg 2");
        assert_eq!(history[2].message, "msg 4");
    }

    #[tokio::test]
    async fn add_to_group_rejects_non_members_and_private_chats() {
        let store = memory_store().await;
        store.add_user("alice", "pw").await.unwrap();
        store.add_user("bob", "pw").await.unwrap();
        store.add_user("mallory", "pw").await.unwrap();

        let group_id = store.create_group("team", "alice").await.unwrap();
        assert!(!store.add_to_group(group_id, "mallory", "bob").await.unwrap());
        assert!(!store.is_in_group(group_id, "bob").await.unwrap());
        assert!(store.add_to_group(group_id, "alice", "bob").await.unwrap());
        assert!(store.is_in_group(group_id, "bob").await.unwrap());

        let private_id = store.add_friend("alice", "bob").await.unwrap().unwrap();
        assert!(!store.add_to_group(private_id, "alice", "mallory").await.unwrap());
    }
}
