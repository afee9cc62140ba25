use std::ops::Range;
use std::path::Path;

use serde::{Deserialize, Serialize};

/// Runtime-tunable server settings, loaded from a JSON file. Unlike
/// `ServerConfig`, these never require a restart to change in principle —
/// they're re-read from disk at startup rather than baked into the binary.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerSettings {
    #[serde(default = "default_max_messages_history")]
    pub max_messages_history: i64,

    #[serde(default = "default_max_message_len")]
    pub max_message_len: usize,

    #[serde(default = "default_file_chunk_size")]
    pub file_chunk_size: usize,

    /// Frames above this size are treated as bulk transfers (files channel
    /// branches its receive path on this the way the reference does).
    #[serde(default = "default_large_frame_threshold")]
    pub large_frame_threshold: usize,

    #[serde(default = "default_username_len")]
    pub username_len: (usize, usize),

    #[serde(default = "default_password_len")]
    pub password_len: (usize, usize),

    #[serde(default = "default_status_len")]
    pub status_len: (usize, usize),
}

fn default_max_messages_history() -> i64 {
    50
}
fn default_max_message_len() -> usize {
    200
}
fn default_file_chunk_size() -> usize {
    4096
}
fn default_large_frame_threshold() -> usize {
    1024
}
fn default_username_len() -> (usize, usize) {
    (3, 20)
}
fn default_password_len() -> (usize, usize) {
    (3, 20)
}
fn default_status_len() -> (usize, usize) {
    (1, 19)
}

impl Default for ServerSettings {
    fn default() -> Self {
        Self {
            max_messages_history: default_max_messages_history(),
            max_message_len: default_max_message_len(),
            file_chunk_size: default_file_chunk_size(),
            large_frame_threshold: default_large_frame_threshold(),
            username_len: default_username_len(),
            password_len: default_password_len(),
            status_len: default_status_len(),
        }
    }
}

impl ServerSettings {
    pub fn load_from_file(path: &Path) -> anyhow::Result<Self> {
        let content = std::fs::read_to_string(path)?;
        Ok(serde_json::from_str(&content)?)
    }

    pub fn username_range(&self) -> Range<usize> {
        self.username_len.0..self.username_len.1 + 1
    }

    pub fn password_range(&self) -> Range<usize> {
        self.password_len.0..self.password_len.1 + 1
    }

    pub fn status_range(&self) -> Range<usize> {
        self.status_len.0..self.status_len.1 + 1
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_settings_values() {
        let settings = ServerSettings::default();
        assert_eq!(settings.max_messages_history, 50);
        assert_eq!(settings.max_message_len, 200);
        assert_eq!(settings.username_range(), 3..21);
    }

    #[test]
    fn settings_json_deserialization() {
        let json = r#"{"max_messages_history": 100, "max_message_len": 280}"#;
        let settings: ServerSettings = serde_json::from_str(json).unwrap();
        assert_eq!(settings.max_messages_history, 100);
        assert_eq!(settings.max_message_len, 280);
        assert_eq!(settings.file_chunk_size, 4096);
    }
}
