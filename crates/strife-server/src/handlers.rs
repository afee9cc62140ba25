//! One function per client opcode. Protected handlers on the general channel
//! check the caller's session first and reply `reject` if there isn't one;
//! chats/files handlers authenticate by source IP (see `Registry::username_by_ip`)
//! and silently drop unauthenticated frames, matching the reference's
//! `if ip not in logged_in_users: pass` handling on those channels.

use std::net::SocketAddr;
use std::ops::Range;

use anyhow::{Context, Result};
use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use sha2::{Digest, Sha256};
use strife_crypto::aes;
use strife_protocol::codec::DecodedMessage;
use strife_protocol::messages;
use strife_protocol::opcodes::Channel;

use crate::state::AppState;

pub async fn dispatch(
    state: &AppState,
    channel: Channel,
    peer: SocketAddr,
    raw: &str,
    msg: &DecodedMessage,
) -> Result<()> {
    match (channel, msg.opname.as_str()) {
        (Channel::General, "register") => register(state, peer, msg).await,
        (Channel::General, "sign_in") => sign_in(state, peer, msg).await,
        (Channel::General, "logout") => logout(state, peer).await,
        (Channel::General, "add_friend") => add_friend(state, peer, msg).await,
        (Channel::General, "accept_friend") => accept_friend(state, peer, msg).await,
        (Channel::General, "remove_friend") => remove_friend(state, peer, msg).await,
        (Channel::General, "create_group") => create_group(state, peer, msg).await,
        (Channel::General, "add_group_member") => add_group_member(state, peer, msg).await,
        (Channel::General, "request_chats") => request_chats(state, peer, msg).await,
        (Channel::General, "request_group_members") => request_group_members(state, peer, msg).await,
        (Channel::General, "request_friend_list") => request_friend_list(state, peer, msg).await,
        (Channel::General, "change_username") => change_username(state, peer, msg).await,
        (Channel::General, "change_status") => change_status(state, peer, msg).await,
        (Channel::General, "change_password") => change_password(state, peer, msg).await,
        (Channel::General, "request_user_status") => request_user_status(state, peer, msg).await,
        (Channel::General, "request_user_picture") => request_user_picture(state, peer, msg).await,
        (Channel::General, "request_user_picture_check") => {
            request_user_picture_check(state, peer, msg).await
        }
        (Channel::General, "request_file") => request_file(state, peer, msg).await,
        (Channel::General, "request_keys") => request_keys(state, peer, msg).await,
        (Channel::General, "start_voice") => start_voice(state, peer, msg).await,
        (Channel::General, "start_video") => start_video(state, peer, msg).await,
        (Channel::General, "join_voice") => join_voice(state, peer, msg).await,
        (Channel::General, "join_video") => join_video(state, peer, msg).await,
        (Channel::Chats, "text_message") => text_message(state, peer, raw, msg).await,
        (Channel::Chats, "file_description") => file_description(state, peer, raw, msg).await,
        (Channel::Chats, "get_chat_history") => get_chat_history(state, peer, msg).await,
        (Channel::Files, "file_in_chat") => file_in_chat(state, peer, msg).await,
        (Channel::Files, "profile_pic_change") => profile_pic_change(state, peer, msg).await,
        (channel, opname) => {
            tracing::debug!(?channel, opname, "no handler registered for opname");
            Ok(())
        }
    }
}

fn sha256_hex(bytes: &[u8]) -> String {
    Sha256::digest(bytes).iter().map(|b| format!("{b:02x}")).collect()
}

fn valid_token(value: &str, range: Range<usize>) -> bool {
    range.contains(&value.chars().count()) && value.chars().all(|c| c.is_ascii_alphanumeric())
}

async fn approve(state: &AppState, peer: SocketAddr, opcode: u8) -> Result<()> {
    state.general.send(&messages::approve(opcode)?, peer).await;
    Ok(())
}

async fn reject(state: &AppState, peer: SocketAddr, opcode: u8) -> Result<()> {
    state.general.send(&messages::reject(opcode)?, peer).await;
    Ok(())
}

/// Authenticates a general-channel caller, replying `reject` and returning
/// `None` if there's no session for this peer.
async fn auth_general(state: &AppState, peer: SocketAddr, msg: &DecodedMessage) -> Result<Option<String>> {
    match state.registry.username_of(peer) {
        Some(username) => Ok(Some(username)),
        None => {
            reject(state, peer, msg.opcode).await?;
            Ok(None)
        }
    }
}

/// Authenticates a chats/files-channel caller by source IP. No reply on
/// failure — those channels have no `reject` opcode of their own.
fn auth_by_ip(state: &AppState, peer: SocketAddr) -> Option<String> {
    state.registry.username_by_ip(peer.ip())
}

async fn register(state: &AppState, peer: SocketAddr, msg: &DecodedMessage) -> Result<()> {
    if state.registry.is_peer_signed_in(peer) {
        return reject(state, peer, msg.opcode).await;
    }
    let username = msg.str("username").context("register: missing username")?;
    let password = msg.str("password").context("register: missing password")?;

    if !valid_token(&username, state.settings.username_range())
        || !valid_token(&password, state.settings.password_range())
    {
        return reject(state, peer, msg.opcode).await;
    }

    if state.store.add_user(&username, &password).await? {
        approve(state, peer, msg.opcode).await
    } else {
        reject(state, peer, msg.opcode).await
    }
}

async fn sign_in(state: &AppState, peer: SocketAddr, msg: &DecodedMessage) -> Result<()> {
    if state.registry.is_peer_signed_in(peer) {
        return reject(state, peer, msg.opcode).await;
    }
    let username = msg.str("username").context("sign_in: missing username")?;
    let password = msg.str("password").context("sign_in: missing password")?;

    if state.registry.is_username_online(&username) {
        return reject(state, peer, msg.opcode).await;
    }
    if !state.store.check_credentials(&username, &password).await? {
        return reject(state, peer, msg.opcode).await;
    }
    if !state.registry.sign_in(peer, &username, &password) {
        return reject(state, peer, msg.opcode).await;
    }

    approve(state, peer, msg.opcode).await?;

    for sender in state.registry.pending_requests_for(&username) {
        let frame = messages::friend_request_notify(&sender, true)?;
        state.general.send(&frame, peer).await;
    }
    for frame in state.registry.take_pending_messages(&username) {
        state.general.send(&frame, peer).await;
    }
    for (chat_id, key) in state.registry.take_pending_keys(&username) {
        state.store.add_key(&username, chat_id, &key, &password).await?;
    }

    let status = state.store.get_user_status(&username).await?.unwrap_or_default();
    let frame = messages::user_status(&username, &status)?;
    state.general.send(&frame, peer).await;
    Ok(())
}

async fn logout(state: &AppState, peer: SocketAddr) -> Result<()> {
    state.registry.logout(peer);
    Ok(())
}

async fn add_friend(state: &AppState, peer: SocketAddr, msg: &DecodedMessage) -> Result<()> {
    let Some(username) = auth_general(state, peer, msg).await? else {
        return Ok(());
    };
    let friend = msg.str("friend_username").context("add_friend: missing friend_username")?;

    if friend == username || !state.store.can_add_friend(&username, &friend).await? {
        return reject(state, peer, msg.opcode).await;
    }
    if !state.registry.add_pending_request(&username, &friend) {
        return reject(state, peer, msg.opcode).await;
    }

    if let Some(friend_peer) = state.registry.peer_of(&friend) {
        let frame = messages::friend_request_notify(&username, false)?;
        state.general.send(&frame, friend_peer).await;
    }
    approve(state, peer, msg.opcode).await
}

async fn accept_friend(state: &AppState, peer: SocketAddr, msg: &DecodedMessage) -> Result<()> {
    let Some(username) = auth_general(state, peer, msg).await? else {
        return Ok(());
    };
    let friend = msg.str("friend_username").context("accept_friend: missing friend_username")?;
    let is_accepted = msg.int("is_accepted").unwrap_or(0) != 0;

    if !state.registry.has_pending_request(&friend, &username) {
        return reject(state, peer, msg.opcode).await;
    }
    state.registry.clear_pending_request(&friend);

    if !is_accepted {
        return approve(state, peer, msg.opcode).await;
    }

    let Some(chat_id) = state.store.add_friend(&username, &friend).await? else {
        return reject(state, peer, msg.opcode).await;
    };
    state.blob.create_chat(chat_id).await?;

    let key = aes::generate_key();
    let acceptor_frame = messages::friend_added(&friend, &key, chat_id)?;
    state.general.send(&acceptor_frame, peer).await;
    if let Some(password) = state.registry.session_password(peer) {
        state.store.add_key(&username, chat_id, &key, &password).await?;
    }

    let originator_frame = messages::friend_added(&username, &key, chat_id)?;
    match state.registry.peer_of(&friend) {
        Some(originator_peer) => {
            state.general.send(&originator_frame, originator_peer).await;
            if let Some(password) = state.registry.session_password(originator_peer) {
                state.store.add_key(&friend, chat_id, &key, &password).await?;
            }
        }
        None => {
            state.registry.add_pending_message(&friend, originator_frame);
            state.registry.add_pending_key(&friend, chat_id, key);
        }
    }

    approve(state, peer, msg.opcode).await
}

async fn remove_friend(state: &AppState, peer: SocketAddr, msg: &DecodedMessage) -> Result<()> {
    let Some(username) = auth_general(state, peer, msg).await? else {
        return Ok(());
    };
    let friend = msg.str("friend_username").context("remove_friend: missing friend_username")?;
    state.store.remove_friend(&username, &friend).await?;
    Ok(())
}

async fn create_group(state: &AppState, peer: SocketAddr, msg: &DecodedMessage) -> Result<()> {
    let Some(username) = auth_general(state, peer, msg).await? else {
        return Ok(());
    };
    let name = msg.str("group_name").context("create_group: missing group_name")?;
    if name.starts_with("PRIVATE%%") {
        return reject(state, peer, msg.opcode).await;
    }

    let key = aes::generate_key();
    let chat_id = match state.store.create_group(&name, &username).await {
        Ok(chat_id) => chat_id,
        Err(_) => return reject(state, peer, msg.opcode).await,
    };
    state.blob.create_chat(chat_id).await?;

    let frame = messages::added_to_group(&name, chat_id, &key)?;
    state.general.send(&frame, peer).await;
    if let Some(password) = state.registry.session_password(peer) {
        state.store.add_key(&username, chat_id, &key, &password).await?;
    }
    Ok(())
}

async fn add_group_member(state: &AppState, peer: SocketAddr, msg: &DecodedMessage) -> Result<()> {
    let Some(username) = auth_general(state, peer, msg).await? else {
        return Ok(());
    };
    let chat_id = msg.int("chat_id").context("add_group_member: missing chat_id")?;
    let new_member = msg.str("new_member_username").context("add_group_member: missing new_member_username")?;
    let group_key = msg.str("group_key").context("add_group_member: missing group_key")?;

    if !state.store.add_to_group(chat_id, &username, &new_member).await? {
        return reject(state, peer, msg.opcode).await;
    }

    if let Some(password) = state.registry.session_password(peer) {
        state.store.add_key(&username, chat_id, &group_key, &password).await?;
    }

    if let Some(group_name) = state.store.get_group_name(chat_id).await? {
        let added_frame = messages::added_to_group(&group_name, chat_id, &group_key)?;
        match state.registry.peer_of(&new_member) {
            Some(new_member_peer) => state.general.send(&added_frame, new_member_peer).await,
            None => {
                state.registry.add_pending_message(&new_member, added_frame);
                state.registry.add_pending_key(&new_member, chat_id, group_key);
            }
        }
    }

    let members = state.store.get_group_members(chat_id).await?;
    let online_peers: Vec<SocketAddr> = members.iter().filter_map(|m| state.registry.peer_of(m)).collect();
    let names_frame = messages::group_names(chat_id, &members)?;
    state.general.send_to_many(&names_frame, online_peers).await;

    approve(state, peer, msg.opcode).await
}

async fn request_chats(state: &AppState, peer: SocketAddr, msg: &DecodedMessage) -> Result<()> {
    let Some(username) = auth_general(state, peer, msg).await? else {
        return Ok(());
    };
    let chats = state.store.get_chats_of(&username).await?;
    let frame = messages::chats_list(&chats)?;
    state.general.send(&frame, peer).await;
    Ok(())
}

async fn request_group_members(state: &AppState, peer: SocketAddr, msg: &DecodedMessage) -> Result<()> {
    if auth_general(state, peer, msg).await?.is_none() {
        return Ok(());
    }
    let chat_id = msg.int("chat_id").context("request_group_members: missing chat_id")?;
    let members = state.store.get_group_members(chat_id).await?;
    let frame = messages::group_names(chat_id, &members)?;
    state.general.send(&frame, peer).await;
    Ok(())
}

async fn request_friend_list(state: &AppState, peer: SocketAddr, msg: &DecodedMessage) -> Result<()> {
    let Some(username) = auth_general(state, peer, msg).await? else {
        return Ok(());
    };
    let friends = state.store.get_friends_of(&username).await?;
    let frame = messages::friend_list(&friends)?;
    state.general.send(&frame, peer).await;
    Ok(())
}

async fn change_username(state: &AppState, peer: SocketAddr, msg: &DecodedMessage) -> Result<()> {
    let Some(username) = auth_general(state, peer, msg).await? else {
        return Ok(());
    };
    let new_username = msg.str("new_username").context("change_username: missing new_username")?;
    if !valid_token(&new_username, state.settings.username_range()) {
        return reject(state, peer, msg.opcode).await;
    }
    if !state.store.change_username(&username, &new_username).await? {
        return reject(state, peer, msg.opcode).await;
    }
    state.registry.rename_session(peer, &new_username);
    approve(state, peer, msg.opcode).await
}

async fn change_status(state: &AppState, peer: SocketAddr, msg: &DecodedMessage) -> Result<()> {
    let Some(username) = auth_general(state, peer, msg).await? else {
        return Ok(());
    };
    let new_status = msg.str("new_status").context("change_status: missing new_status")?;
    if !state.settings.status_range().contains(&new_status.chars().count()) {
        return reject(state, peer, msg.opcode).await;
    }
    state.store.update_user_status(&username, &new_status).await?;
    let frame = messages::user_status(&username, &new_status)?;
    state.general.send(&frame, peer).await;
    Ok(())
}

async fn change_password(state: &AppState, peer: SocketAddr, msg: &DecodedMessage) -> Result<()> {
    let Some(username) = auth_general(state, peer, msg).await? else {
        return Ok(());
    };
    let old_password = msg.str("old_password").context("change_password: missing old_password")?;
    let new_password = msg.str("new_password").context("change_password: missing new_password")?;

    if !state.store.check_credentials(&username, &old_password).await?
        || !valid_token(&new_password, state.settings.password_range())
    {
        return reject(state, peer, msg.opcode).await;
    }
    state.store.change_password(&username, &new_password).await?;
    state.registry.update_session_password(peer, &new_password);
    approve(state, peer, msg.opcode).await
}

async fn request_user_status(state: &AppState, peer: SocketAddr, msg: &DecodedMessage) -> Result<()> {
    if auth_general(state, peer, msg).await?.is_none() {
        return Ok(());
    }
    let target = msg.str("username").context("request_user_status: missing username")?;
    let Some(status) = state.store.get_user_status(&target).await? else {
        return reject(state, peer, msg.opcode).await;
    };
    let frame = messages::user_status(&target, &status)?;
    state.general.send(&frame, peer).await;
    Ok(())
}

async fn send_profile_picture(state: &AppState, peer: SocketAddr, target: &str) -> Result<()> {
    let Some(path) = state.store.get_user_picture_path(target).await? else {
        return Ok(());
    };
    let Some(bytes) = state.blob.load_pfp_by_path(&path).await? else {
        return Ok(());
    };
    let payload = BASE64.encode(&bytes);
    let frame = messages::profile_picture(target, &payload)?;
    state.files.send_by_ip(&frame, peer.ip()).await;
    Ok(())
}

async fn request_user_picture(state: &AppState, peer: SocketAddr, msg: &DecodedMessage) -> Result<()> {
    if auth_general(state, peer, msg).await?.is_none() {
        return Ok(());
    }
    let target = msg.str("username").context("request_user_picture: missing username")?;
    send_profile_picture(state, peer, &target).await
}

async fn request_user_picture_check(state: &AppState, peer: SocketAddr, msg: &DecodedMessage) -> Result<()> {
    if auth_general(state, peer, msg).await?.is_none() {
        return Ok(());
    }
    let target = msg.str("username").context("request_user_picture_check: missing username")?;
    let current_hash = msg.str("current_hash").context("request_user_picture_check: missing current_hash")?;

    let Some(path) = state.store.get_user_picture_path(&target).await? else {
        return Ok(());
    };
    let Some(bytes) = state.blob.load_pfp_by_path(&path).await? else {
        return Ok(());
    };
    if sha256_hex(&bytes) == current_hash {
        return Ok(());
    }
    let payload = BASE64.encode(&bytes);
    let frame = messages::profile_picture(&target, &payload)?;
    state.files.send_by_ip(&frame, peer.ip()).await;
    Ok(())
}

async fn request_file(state: &AppState, peer: SocketAddr, msg: &DecodedMessage) -> Result<()> {
    let Some(username) = auth_general(state, peer, msg).await? else {
        return Ok(());
    };
    let file_hash = msg.str("file_hash").context("request_file: missing file_hash")?;

    let Some((chat_id, file_name)) = state.store.get_file(&file_hash).await? else {
        return reject(state, peer, msg.opcode).await;
    };
    if !state.store.is_in_group(chat_id, &username).await? {
        return reject(state, peer, msg.opcode).await;
    }
    let Some(bytes) = state.blob.load_file(chat_id, &file_name).await? else {
        state.store.remove_file(&file_hash).await?;
        return reject(state, peer, msg.opcode).await;
    };
    let payload = BASE64.encode(&bytes);
    let frame = messages::send_file(chat_id, &file_name, &payload)?;
    state.files.send_by_ip(&frame, peer.ip()).await;
    Ok(())
}

async fn request_keys(state: &AppState, peer: SocketAddr, msg: &DecodedMessage) -> Result<()> {
    let Some(username) = auth_general(state, peer, msg).await? else {
        return Ok(());
    };
    let Some(password) = state.registry.session_password(peer) else {
        return Ok(());
    };
    let pairs = state.store.get_user_keys(&username, &password).await?;
    let keys: Vec<String> = pairs.iter().map(|(_, key)| key.clone()).collect();
    let chat_ids: Vec<i64> = pairs.iter().map(|(chat_id, _)| *chat_id).collect();
    let frame = messages::keys(&keys, &chat_ids)?;
    state.general.send(&frame, peer).await;
    Ok(())
}

async fn notify_other_members(state: &AppState, username: &str, chat_id: i64, frame: &str) -> Result<()> {
    let members = state.store.get_group_members(chat_id).await?;
    for member in members {
        if member == username {
            continue;
        }
        if let Some(member_peer) = state.registry.peer_of(&member) {
            state.general.send(frame, member_peer).await;
        }
    }
    Ok(())
}

async fn start_voice(state: &AppState, peer: SocketAddr, msg: &DecodedMessage) -> Result<()> {
    let Some(username) = auth_general(state, peer, msg).await? else {
        return Ok(());
    };
    let chat_id = msg.int("chat_id").context("start_voice: missing chat_id")?;
    let frame = messages::voice_started(chat_id)?;
    notify_other_members(state, &username, chat_id, &frame).await
}

async fn start_video(state: &AppState, peer: SocketAddr, msg: &DecodedMessage) -> Result<()> {
    let Some(username) = auth_general(state, peer, msg).await? else {
        return Ok(());
    };
    let chat_id = msg.int("chat_id").context("start_video: missing chat_id")?;
    let frame = messages::video_started(chat_id)?;
    notify_other_members(state, &username, chat_id, &frame).await
}

async fn join_voice(state: &AppState, peer: SocketAddr, msg: &DecodedMessage) -> Result<()> {
    let Some(username) = auth_general(state, peer, msg).await? else {
        return Ok(());
    };
    let chat_id = msg.int("chat_id").context("join_voice: missing chat_id")?;
    let members = state.store.get_group_members(chat_id).await?;

    let mut other_ips = Vec::new();
    let mut other_names = Vec::new();
    for member in &members {
        if member == &username {
            continue;
        }
        let Some(member_peer) = state.registry.peer_of(member) else {
            continue;
        };
        let joined_frame = messages::voice_user_joined(chat_id, &peer.ip().to_string(), &username)?;
        state.general.send(&joined_frame, member_peer).await;
        other_ips.push(member_peer.ip().to_string());
        other_names.push(member.clone());
    }

    if !other_ips.is_empty() {
        let info_frame = messages::voice_call_info(chat_id, &other_ips, &other_names)?;
        state.general.send(&info_frame, peer).await;
    }
    Ok(())
}

async fn join_video(state: &AppState, peer: SocketAddr, msg: &DecodedMessage) -> Result<()> {
    let Some(username) = auth_general(state, peer, msg).await? else {
        return Ok(());
    };
    let chat_id = msg.int("chat_id").context("join_video: missing chat_id")?;
    let members = state.store.get_group_members(chat_id).await?;

    let mut other_ips = Vec::new();
    let mut other_names = Vec::new();
    for member in &members {
        if member == &username {
            continue;
        }
        let Some(member_peer) = state.registry.peer_of(member) else {
            continue;
        };
        let joined_frame = messages::video_user_joined(chat_id, &peer.ip().to_string(), &username)?;
        state.general.send(&joined_frame, member_peer).await;
        other_ips.push(member_peer.ip().to_string());
        other_names.push(member.clone());
    }

    if !other_ips.is_empty() {
        let info_frame = messages::video_call_info(chat_id, &other_ips, &other_names)?;
        state.general.send(&info_frame, peer).await;
    }
    Ok(())
}

async fn text_message(state: &AppState, peer: SocketAddr, raw: &str, msg: &DecodedMessage) -> Result<()> {
    if auth_by_ip(state, peer).is_none() {
        return Ok(());
    }
    let chat_id = msg.int("chat_id").context("text_message: missing chat_id")?;
    let sender_username = msg.str("sender_username").context("text_message: missing sender_username")?;

    let encoded = BASE64.encode(raw.as_bytes());
    state.store.add_message(chat_id, &sender_username, &encoded).await?;
    fan_out_to_chat(state, chat_id, raw).await
}

async fn file_description(state: &AppState, peer: SocketAddr, raw: &str, msg: &DecodedMessage) -> Result<()> {
    if auth_by_ip(state, peer).is_none() {
        return Ok(());
    }
    let chat_id = msg.int("chat_id").context("file_description: missing chat_id")?;
    let sender_username = msg.str("sender_username").context("file_description: missing sender_username")?;

    let encoded = BASE64.encode(raw.as_bytes());
    state.store.add_message(chat_id, &sender_username, &encoded).await?;
    fan_out_to_chat(state, chat_id, raw).await
}

/// Fans `raw` out to every currently-online member of `chat_id` on the chats
/// channel, including the sender — their own client treats this as the
/// confirmation that the send went through.
async fn fan_out_to_chat(state: &AppState, chat_id: i64, raw: &str) -> Result<()> {
    let members = state.store.get_group_members(chat_id).await?;
    for member in members {
        if let Some(member_peer) = state.registry.peer_of(&member) {
            state.chats.send_by_ip(raw, member_peer.ip()).await;
        }
    }
    Ok(())
}

async fn get_chat_history(state: &AppState, peer: SocketAddr, msg: &DecodedMessage) -> Result<()> {
    if auth_by_ip(state, peer).is_none() {
        return Ok(());
    }
    let chat_id = msg.int("chat_id").context("get_chat_history: missing chat_id")?;
    let history = state.store.get_chat_history(chat_id, state.settings.max_messages_history).await?;
    let history_texts: Vec<String> = history.into_iter().map(|m| m.message).collect();
    let frame = messages::chat_history(&history_texts, chat_id)?;
    state.chats.send(&frame, peer).await;
    Ok(())
}

async fn file_in_chat(state: &AppState, peer: SocketAddr, msg: &DecodedMessage) -> Result<()> {
    if auth_by_ip(state, peer).is_none() {
        return Ok(());
    }
    let chat_id = msg.int("chat_id").context("file_in_chat: missing chat_id")?;
    let file_name = msg.str("file_name").context("file_in_chat: missing file_name")?;
    let payload_b64 = msg.str("file_payload_b64").context("file_in_chat: missing file_payload_b64")?;

    let bytes = BASE64.decode(payload_b64)?;
    let file_hash = sha256_hex(&bytes);
    state.blob.save_file(&bytes, chat_id, &file_name).await?;
    state.store.add_file(chat_id, &file_name, &file_hash).await?;
    Ok(())
}

async fn profile_pic_change(state: &AppState, peer: SocketAddr, msg: &DecodedMessage) -> Result<()> {
    if auth_by_ip(state, peer).is_none() {
        return Ok(());
    }
    let username = msg.str("username").context("profile_pic_change: missing username")?;
    let payload_b64 = msg.str("picture_payload_b64").context("profile_pic_change: missing picture_payload_b64")?;

    let bytes = BASE64.decode(&payload_b64)?;
    let stored_name = state.blob.save_pfp(&bytes, &username).await?;
    state.store.update_user_picture(&username, &stored_name).await?;

    let frame = messages::profile_picture(&username, &payload_b64)?;
    state.files.send_by_ip(&frame, peer.ip()).await;
    Ok(())
}

#[cfg(test)]
mod tests {
    use std::net::SocketAddr;
    use std::path::PathBuf;

    use strife_protocol::decode_client_message;
    use strife_protocol::opcodes::{self, Channel};
    use tokio::net::TcpListener;

    use super::*;
    use crate::blob::Blob;
    use crate::settings::ServerSettings;
    use crate::store::Store;

    fn addr(port: u16) -> SocketAddr {
        format!("127.0.0.1:{port}").parse().unwrap()
    }

    fn tempdir() -> PathBuf {
        std::env::temp_dir().join(format!("strife-handlers-test-{}", rand::random::<u64>()))
    }

    /// Builds the same wire string `decode_client_message` expects, bypassing
    /// the crypto/framing layer entirely since the dispatcher hands handlers
    /// already-decrypted plaintext.
    fn client_frame(channel: Channel, opname: &str, fields: &[&str]) -> String {
        let opcode = opcodes::client_opcode(channel, opname).expect("unknown opname");
        let mut out = format!("{opcode:02}");
        for field in fields {
            out.push('@');
            out.push_str(field);
        }
        out
    }

    fn decode(channel: Channel, opname: &str, fields: &[&str]) -> DecodedMessage {
        let raw = client_frame(channel, opname, fields);
        decode_client_message(channel, &raw).unwrap()
    }

    async fn test_state() -> AppState {
        let store = Store::connect(":memory:").await.unwrap();
        let blob = Blob::initialize(tempdir()).await.unwrap();
        let settings = ServerSettings::default();

        let general = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let chats = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let files = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let (general, _) = crate::channel::spawn_listener(Channel::General, general).unwrap();
        let (chats, _) = crate::channel::spawn_listener(Channel::Chats, chats).unwrap();
        let (files, _) = crate::channel::spawn_listener(Channel::Files, files).unwrap();

        AppState::new(store, blob, settings, general, chats, files)
    }

    #[test]
    fn valid_token_enforces_length_and_alnum() {
        assert!(valid_token("alice99", 3..21));
        assert!(!valid_token("al", 3..21));
        assert!(!valid_token("alice!", 3..21));
    }

    #[test]
    fn sha256_hex_is_stable_and_lowercase_hex() {
        let hash = sha256_hex(b"hello");
        assert_eq!(hash.len(), 64);
        assert!(hash.chars().all(|c| c.is_ascii_hexdigit() && !c.is_ascii_uppercase()));
    }

    #[tokio::test]
    async fn register_then_sign_in_creates_a_session() {
        let state = test_state().await;
        let peer = addr(1);

        let msg = decode(Channel::General, "register", &["alice", "password123"]);
        register(&state, peer, &msg).await.unwrap();
        assert!(state.store.user_exists("alice").await.unwrap());

        let msg = decode(Channel::General, "sign_in", &["alice", "password123"]);
        sign_in(&state, peer, &msg).await.unwrap();
        assert_eq!(state.registry.username_of(peer).as_deref(), Some("alice"));
    }

    #[tokio::test]
    async fn register_rejects_out_of_range_username() {
        let state = test_state().await;
        let msg = decode(Channel::General, "register", &["ab", "password123"]);
        register(&state, addr(1), &msg).await.unwrap();
        assert!(!state.store.user_exists("ab").await.unwrap());
    }

    #[tokio::test]
    async fn sign_in_rejects_wrong_password() {
        let state = test_state().await;
        register(&state, addr(1), &decode(Channel::General, "register", &["alice", "password123"]))
            .await
            .unwrap();

        let msg = decode(Channel::General, "sign_in", &["alice", "wrongpass"]);
        sign_in(&state, addr(2), &msg).await.unwrap();
        assert!(state.registry.username_of(addr(2)).is_none());
    }

    #[tokio::test]
    async fn sign_in_rejects_a_username_already_online() {
        let state = test_state().await;
        register(&state, addr(1), &decode(Channel::General, "register", &["alice", "password123"]))
            .await
            .unwrap();
        sign_in(&state, addr(1), &decode(Channel::General, "sign_in", &["alice", "password123"]))
            .await
            .unwrap();

        sign_in(&state, addr(2), &decode(Channel::General, "sign_in", &["alice", "password123"]))
            .await
            .unwrap();
        assert!(state.registry.username_of(addr(2)).is_none());
    }

    #[tokio::test]
    async fn unauthenticated_general_caller_gets_no_side_effect() {
        let state = test_state().await;
        let msg = decode(Channel::General, "request_friend_list", &[]);
        request_friend_list(&state, addr(1), &msg).await.unwrap();
        // no session exists for addr(1); nothing to assert beyond "didn't panic".
    }

    #[tokio::test]
    async fn add_friend_then_accept_friend_creates_a_shared_chat() {
        let state = test_state().await;
        for (peer_port, username) in [(1, "alice"), (2, "bob")] {
            register(&state, addr(peer_port), &decode(Channel::General, "register", &[username, "password123"]))
                .await
                .unwrap();
            sign_in(&state, addr(peer_port), &decode(Channel::General, "sign_in", &[username, "password123"]))
                .await
                .unwrap();
        }

        add_friend(&state, addr(1), &decode(Channel::General, "add_friend", &["bob"])).await.unwrap();
        assert!(state.registry.has_pending_request("alice", "bob"));

        accept_friend(&state, addr(2), &decode(Channel::General, "accept_friend", &["alice", "1"]))
            .await
            .unwrap();

        let chats = state.store.get_chats_of("alice").await.unwrap();
        assert_eq!(chats.len(), 1);
        let bob_chats = state.store.get_chats_of("bob").await.unwrap();
        assert_eq!(bob_chats, chats);
    }

    #[tokio::test]
    async fn create_group_rejects_reserved_private_prefix() {
        let state = test_state().await;
        register(&state, addr(1), &decode(Channel::General, "register", &["alice", "password123"]))
            .await
            .unwrap();
        sign_in(&state, addr(1), &decode(Channel::General, "sign_in", &["alice", "password123"]))
            .await
            .unwrap();

        let msg = decode(Channel::General, "create_group", &["PRIVATE%%alice%%bob"]);
        create_group(&state, addr(1), &msg).await.unwrap();
        assert!(state.store.get_chats_of("alice").await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn text_message_is_persisted_and_fanned_out_unchanged() {
        let state = test_state().await;
        register(&state, addr(1), &decode(Channel::General, "register", &["alice", "password123"]))
            .await
            .unwrap();
        sign_in(&state, addr(1), &decode(Channel::General, "sign_in", &["alice", "password123"]))
            .await
            .unwrap();
        let chat_id = state.store.create_group("group-one", "alice").await.unwrap();

        let raw = client_frame(Channel::Chats, "text_message", &[&chat_id.to_string(), "alice", "hi there"]);
        let msg = decode_client_message(Channel::Chats, &raw).unwrap();
        text_message(&state, addr(1), &raw, &msg).await.unwrap();

        let history = state.store.get_chat_history(chat_id, 50).await.unwrap();
        assert_eq!(history.len(), 1);
        let decoded = BASE64.decode(&history[0].message).unwrap();
        assert_eq!(decoded, raw.as_bytes());
    }

    #[tokio::test]
    async fn file_in_chat_stores_bytes_and_records_hash() {
        let state = test_state().await;
        register(&state, addr(1), &decode(Channel::General, "register", &["alice", "password123"]))
            .await
            .unwrap();
        sign_in(&state, addr(1), &decode(Channel::General, "sign_in", &["alice", "password123"]))
            .await
            .unwrap();
        let chat_id = state.store.create_group("group-one", "alice").await.unwrap();
        state.blob.create_chat(chat_id).await.unwrap();

        let payload = BASE64.encode(b"file bytes");
        let msg = decode(
            Channel::Files,
            "file_in_chat",
            &[&chat_id.to_string(), "notes.txt", &payload],
        );
        file_in_chat(&state, addr(1), &msg).await.unwrap();

        let hash = sha256_hex(b"file bytes");
        let looked_up = state.store.get_file(&hash).await.unwrap();
        assert_eq!(looked_up, Some((chat_id, "notes.txt".to_string())));
    }
}
