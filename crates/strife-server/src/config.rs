use serde::Deserialize;

/// Boot-time server configuration, loaded from a TOML file.
#[derive(Debug, Deserialize)]
pub struct ServerConfig {
    /// IP address to bind all three listeners on.
    #[serde(default = "default_host")]
    pub host: String,

    /// TCP port for the general channel (auth, friends, groups, signalling).
    #[serde(default = "default_general_port")]
    pub general_port: u16,

    /// TCP port for the chats channel (text messages, history).
    #[serde(default = "default_chats_port")]
    pub chats_port: u16,

    /// TCP port for the files channel (file transfer, profile pictures).
    #[serde(default = "default_files_port")]
    pub files_port: u16,

    /// Path to the SQLite database file.
    #[serde(default = "default_db_path")]
    pub db_path: String,

    /// Base directory for profile pictures and chat file blobs.
    #[serde(default = "default_blob_dir")]
    pub blob_dir: String,
}

fn default_host() -> String {
    "0.0.0.0".into()
}

fn default_general_port() -> u16 {
    3108
}

fn default_chats_port() -> u16 {
    2907
}

fn default_files_port() -> u16 {
    3103
}

fn default_db_path() -> String {
    "strife.db".into()
}

fn default_blob_dir() -> String {
    "data".into()
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            general_port: default_general_port(),
            chats_port: default_chats_port(),
            files_port: default_files_port(),
            db_path: default_db_path(),
            blob_dir: default_blob_dir(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_uses_the_historical_ports() {
        let config = ServerConfig::default();
        assert_eq!(config.general_port, 3108);
        assert_eq!(config.chats_port, 2907);
        assert_eq!(config.files_port, 3103);
    }

    #[test]
    fn config_toml_deserialization() {
        let toml = r#"
            host = "127.0.0.1"
            general_port = 4000
            db_path = "test.db"
            blob_dir = "test-data"
        "#;
        let config: ServerConfig = toml::from_str(toml).unwrap();
        assert_eq!(config.host, "127.0.0.1");
        assert_eq!(config.general_port, 4000);
        assert_eq!(config.chats_port, 2907);
        assert_eq!(config.db_path, "test.db");
    }
}
