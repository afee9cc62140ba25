//! Process-wide session and pending-delivery tables (§4.6). A single mutex
//! guards the whole registry rather than locking each table independently —
//! every operation here is cheap and the files channel is the only source of
//! real concurrency, so a single lock never becomes a bottleneck.

use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::Mutex;

#[derive(Default)]
struct Tables {
    sessions: HashMap<SocketAddr, String>,
    session_passwords: HashMap<SocketAddr, String>,
    pending_requests: HashMap<String, String>,
    pending_messages: HashMap<String, Vec<String>>,
    pending_keys: HashMap<String, Vec<(i64, String)>>,
}

pub struct Registry {
    tables: Mutex<Tables>,
}

impl Registry {
    pub fn new() -> Self {
        Self { tables: Mutex::new(Tables::default()) }
    }

    pub fn is_peer_signed_in(&self, peer: SocketAddr) -> bool {
        self.tables.lock().unwrap().sessions.contains_key(&peer)
    }

    pub fn username_of(&self, peer: SocketAddr) -> Option<String> {
        self.tables.lock().unwrap().sessions.get(&peer).cloned()
    }

    pub fn is_username_online(&self, username: &str) -> bool {
        self.tables.lock().unwrap().sessions.values().any(|u| u == username)
    }

    /// Authenticates a connection on the chats/files channel: those sockets
    /// never sign in themselves, so the only account they can act as is
    /// whichever signed-in session shares their source IP (see `ip_of`).
    pub fn username_by_ip(&self, ip: std::net::IpAddr) -> Option<String> {
        self.tables
            .lock()
            .unwrap()
            .sessions
            .iter()
            .find(|(peer, _)| peer.ip() == ip)
            .map(|(_, username)| username.clone())
    }

    /// Reverse lookup used to address replies at a username on the general channel.
    pub fn peer_of(&self, username: &str) -> Option<SocketAddr> {
        self.tables
            .lock()
            .unwrap()
            .sessions
            .iter()
            .find(|(_, u)| u.as_str() == username)
            .map(|(peer, _)| *peer)
    }

    /// A signed-in user's source IP — the cross-channel bridging key, since
    /// their chats/files connections arrive from the same host on different
    /// ports than their general-channel session.
    pub fn ip_of(&self, username: &str) -> Option<std::net::IpAddr> {
        self.peer_of(username).map(|addr| addr.ip())
    }

    /// Returns `false` if the peer already has a session or the username is
    /// already signed in elsewhere.
    pub fn sign_in(&self, peer: SocketAddr, username: &str, password: &str) -> bool {
        let mut tables = self.tables.lock().unwrap();
        if tables.sessions.contains_key(&peer) || tables.sessions.values().any(|u| u == username) {
            return false;
        }
        tables.sessions.insert(peer, username.to_string());
        tables.session_passwords.insert(peer, password.to_string());
        true
    }

    pub fn logout(&self, peer: SocketAddr) {
        let mut tables = self.tables.lock().unwrap();
        tables.sessions.remove(&peer);
        tables.session_passwords.remove(&peer);
    }

    pub fn session_password(&self, peer: SocketAddr) -> Option<String> {
        self.tables.lock().unwrap().session_passwords.get(&peer).cloned()
    }

    pub fn rename_session(&self, peer: SocketAddr, new_username: &str) {
        if let Some(slot) = self.tables.lock().unwrap().sessions.get_mut(&peer) {
            *slot = new_username.to_string();
        }
    }

    pub fn update_session_password(&self, peer: SocketAddr, new_password: &str) {
        if let Some(slot) = self.tables.lock().unwrap().session_passwords.get_mut(&peer) {
            *slot = new_password.to_string();
        }
    }

    /// Returns `false` if a pending request already exists in either direction.
    pub fn add_pending_request(&self, sender: &str, recipient: &str) -> bool {
        let mut tables = self.tables.lock().unwrap();
        let exists = tables.pending_requests.get(sender).map(String::as_str) == Some(recipient)
            || tables.pending_requests.get(recipient).map(String::as_str) == Some(sender);
        if exists {
            return false;
        }
        tables.pending_requests.insert(sender.to_string(), recipient.to_string());
        true
    }

    /// Checks whether `sender` has an outstanding request addressed to `recipient`.
    pub fn has_pending_request(&self, sender: &str, recipient: &str) -> bool {
        self.tables.lock().unwrap().pending_requests.get(sender).map(String::as_str) == Some(recipient)
    }

    pub fn clear_pending_request(&self, sender: &str) {
        self.tables.lock().unwrap().pending_requests.remove(sender);
    }

    /// Everyone with an outstanding request addressed to `recipient`, used to
    /// flush queued friend-request notifications at sign-in.
    pub fn pending_requests_for(&self, recipient: &str) -> Vec<String> {
        self.tables
            .lock()
            .unwrap()
            .pending_requests
            .iter()
            .filter(|(_, r)| r.as_str() == recipient)
            .map(|(sender, _)| sender.clone())
            .collect()
    }

    pub fn add_pending_message(&self, username: &str, frame: String) {
        self.tables
            .lock()
            .unwrap()
            .pending_messages
            .entry(username.to_string())
            .or_default()
            .push(frame);
    }

    pub fn add_pending_key(&self, username: &str, chat_id: i64, key: String) {
        self.tables
            .lock()
            .unwrap()
            .pending_keys
            .entry(username.to_string())
            .or_default()
            .push((chat_id, key));
    }

    /// Drains and returns everything queued for `username` at sign-in time.
    pub fn take_pending_messages(&self, username: &str) -> Vec<String> {
        self.tables.lock().unwrap().pending_messages.remove(username).unwrap_or_default()
    }

    pub fn take_pending_keys(&self, username: &str) -> Vec<(i64, String)> {
        self.tables.lock().unwrap().pending_keys.remove(username).unwrap_or_default()
    }
}

impl Default for Registry {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn addr(port: u16) -> SocketAddr {
        format!("127.0.0.1:{port}").parse().unwrap()
    }

    #[test]
    fn rejects_duplicate_sign_in_for_the_same_username() {
        let registry = Registry::new();
        assert!(registry.sign_in(addr(1), "alice", "pw"));
        assert!(!registry.sign_in(addr(2), "alice", "pw2"));
    }

    #[test]
    fn rejects_a_peer_signing_in_twice() {
        let registry = Registry::new();
        assert!(registry.sign_in(addr(1), "alice", "pw"));
        assert!(!registry.sign_in(addr(1), "bob", "pw"));
    }

    #[test]
    fn pending_request_is_directional_and_deduplicated() {
        let registry = Registry::new();
        assert!(registry.add_pending_request("alice", "bob"));
        assert!(!registry.add_pending_request("alice", "bob"));
        assert!(!registry.add_pending_request("bob", "alice"));
        assert!(registry.has_pending_request("alice", "bob"));
    }

    #[test]
    fn pending_messages_and_keys_drain_once() {
        let registry = Registry::new();
        registry.add_pending_message("alice", "01@hi".to_string());
        registry.add_pending_key("alice", 7, "key123".to_string());

        assert_eq!(registry.take_pending_messages("alice"), vec!["01@hi".to_string()]);
        assert!(registry.take_pending_messages("alice").is_empty());
        assert_eq!(registry.take_pending_keys("alice"), vec![(7, "key123".to_string())]);
    }

    #[test]
    fn logout_clears_session_and_password() {
        let registry = Registry::new();
        registry.sign_in(addr(1), "alice", "pw");
        registry.logout(addr(1));
        assert!(registry.username_of(addr(1)).is_none());
        assert!(registry.session_password(addr(1)).is_none());
    }
}
