//! Server→client message constructors — one function per encoding primitive
//! named in §4.1. Each returns the plaintext wire string; the caller encrypts
//! and frames it via the crypto layer and a channel sender.

use crate::codec::encode_message;
use crate::error::CodecError;
use crate::opcodes::Channel;
use crate::value::Field;

pub fn approve(target_opcode: u8) -> Result<String, CodecError> {
    encode_message("approve", Channel::General, &[Field::Int(target_opcode as i64)])
}

pub fn reject(target_opcode: u8) -> Result<String, CodecError> {
    encode_message("reject", Channel::General, &[Field::Int(target_opcode as i64)])
}

/// `silent` suppresses a client-side popup when the request was already known
/// (delivered from the pending-request table at sign-in, scenario 3 in §8).
pub fn friend_request_notify(sender: &str, silent: bool) -> Result<String, CodecError> {
    encode_message(
        "friend_request_notify",
        Channel::General,
        &[Field::Str(sender.to_string()), Field::Int(silent as i64)],
    )
}

pub fn friend_added(friend_username: &str, key: &str, chat_id: i64) -> Result<String, CodecError> {
    encode_message(
        "friend_added",
        Channel::General,
        &[
            Field::Str(friend_username.to_string()),
            Field::Str(key.to_string()),
            Field::Int(chat_id),
        ],
    )
}

pub fn added_to_group(name: &str, chat_id: i64, key: &str) -> Result<String, CodecError> {
    encode_message(
        "added_to_group",
        Channel::General,
        &[
            Field::Str(name.to_string()),
            Field::Int(chat_id),
            Field::Str(key.to_string()),
        ],
    )
}

pub fn voice_started(chat_id: i64) -> Result<String, CodecError> {
    encode_message("voice_started", Channel::General, &[Field::Int(chat_id)])
}

pub fn video_started(chat_id: i64) -> Result<String, CodecError> {
    encode_message("video_started", Channel::General, &[Field::Int(chat_id)])
}

fn call_info(
    opname: &str,
    chat_id: i64,
    ips: &[String],
    usernames: &[String],
) -> Result<String, CodecError> {
    encode_message(
        opname,
        Channel::General,
        &[
            Field::Int(chat_id),
            Field::StrList(ips.to_vec()),
            Field::StrList(usernames.to_vec()),
        ],
    )
}

pub fn voice_call_info(chat_id: i64, ips: &[String], usernames: &[String]) -> Result<String, CodecError> {
    call_info("voice_call_info", chat_id, ips, usernames)
}

pub fn video_call_info(chat_id: i64, ips: &[String], usernames: &[String]) -> Result<String, CodecError> {
    call_info("video_call_info", chat_id, ips, usernames)
}

fn user_joined(opname: &str, chat_id: i64, user_ip: &str, username: &str) -> Result<String, CodecError> {
    encode_message(
        opname,
        Channel::General,
        &[
            Field::Int(chat_id),
            Field::Str(user_ip.to_string()),
            Field::Str(username.to_string()),
        ],
    )
}

pub fn voice_user_joined(chat_id: i64, user_ip: &str, username: &str) -> Result<String, CodecError> {
    user_joined("voice_user_joined", chat_id, user_ip, username)
}

pub fn video_user_joined(chat_id: i64, user_ip: &str, username: &str) -> Result<String, CodecError> {
    user_joined("video_user_joined", chat_id, user_ip, username)
}

/// `chats` is `(chat_id, name)` pairs, decomposed into two parallel lists to
/// fit the flat, positional field schema — the same shape already used for
/// `voice_call_info`'s `([ips], [usernames])`.
pub fn chats_list(chats: &[(i64, String)]) -> Result<String, CodecError> {
    let ids: Vec<i64> = chats.iter().map(|(id, _)| *id).collect();
    let names: Vec<String> = chats.iter().map(|(_, name)| name.clone()).collect();
    encode_message(
        "chats_list",
        Channel::General,
        &[Field::IntList(ids), Field::StrList(names)],
    )
}

pub fn group_names(chat_id: i64, usernames: &[String]) -> Result<String, CodecError> {
    encode_message(
        "group_names",
        Channel::General,
        &[Field::Int(chat_id), Field::StrList(usernames.to_vec())],
    )
}

pub fn user_status(username: &str, status: &str) -> Result<String, CodecError> {
    encode_message(
        "user_status",
        Channel::General,
        &[Field::Str(username.to_string()), Field::Str(status.to_string())],
    )
}

pub fn friend_list(usernames: &[String]) -> Result<String, CodecError> {
    encode_message(
        "friend_list",
        Channel::General,
        &[Field::StrList(usernames.to_vec())],
    )
}

/// `keys` and `chat_ids` are parallel lists, one raw key per chat the user is
/// a member of.
pub fn keys(keys: &[String], chat_ids: &[i64]) -> Result<String, CodecError> {
    encode_message(
        "keys",
        Channel::General,
        &[
            Field::StrList(keys.to_vec()),
            Field::IntList(chat_ids.to_vec()),
        ],
    )
}

/// Chats-channel messages.
pub fn chat_history(messages: &[String], chat_id: i64) -> Result<String, CodecError> {
    encode_message(
        "chat_history",
        Channel::Chats,
        &[Field::StrList(messages.to_vec()), Field::Int(chat_id)],
    )
}

/// Files-channel messages.
pub fn send_file(chat_id: i64, file_name: &str, file_payload_b64: &str) -> Result<String, CodecError> {
    encode_message(
        "send_file",
        Channel::Files,
        &[
            Field::Int(chat_id),
            Field::Str(file_name.to_string()),
            Field::Str(file_payload_b64.to_string()),
        ],
    )
}

pub fn profile_picture(username: &str, picture_payload_b64: &str) -> Result<String, CodecError> {
    encode_message(
        "profile_picture",
        Channel::Files,
        &[
            Field::Str(username.to_string()),
            Field::Str(picture_payload_b64.to_string()),
        ],
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn approve_encodes_target_opcode() {
        assert_eq!(approve(2).unwrap(), "01@2");
    }

    #[test]
    fn reject_encodes_target_opcode() {
        assert_eq!(reject(5).unwrap(), "02@5");
    }

    #[test]
    fn friend_request_notify_encodes_silent_flag_as_int() {
        assert_eq!(friend_request_notify("alice", true).unwrap(), "03@alice@1");
        assert_eq!(friend_request_notify("alice", false).unwrap(), "03@alice@0");
    }

    #[test]
    fn chats_list_decomposes_pairs_into_parallel_lists() {
        let chats = vec![(1, "general-room".to_string()), (2, "private-chat".to_string())];
        assert_eq!(
            chats_list(&chats).unwrap(),
            "12@1#2@general-room#private-chat"
        );
    }

    #[test]
    fn voice_call_info_matches_wire_shape() {
        let ips = vec!["10.0.0.1".to_string(), "10.0.0.2".to_string()];
        let names = vec!["bob".to_string(), "carol".to_string()];
        assert_eq!(
            voice_call_info(7, &ips, &names).unwrap(),
            "08@7@10.0.0.1#10.0.0.2@bob#carol"
        );
    }

    #[test]
    fn send_file_is_on_the_files_channel_opcode_space() {
        assert_eq!(
            send_file(3, "photo.png", "QkFTRTY0").unwrap(),
            "01@3@photo.png@QkFTRTY0"
        );
    }

    #[test]
    fn keys_pairs_list_of_keys_with_list_of_chat_ids() {
        let keys_vec = vec!["k1".to_string(), "k2".to_string()];
        let chat_ids = vec![1, 2];
        assert_eq!(keys(&keys_vec, &chat_ids).unwrap(), "16@k1#k2@1#2");
    }
}
