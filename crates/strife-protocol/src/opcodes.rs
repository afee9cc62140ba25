//! Opcode and parameter-schema tables, one per direction and logical channel.
//!
//! These mirror the reference server's `Protocol` class dictionaries. They are
//! plain static tables rather than a runtime-built `HashMap`: the set of
//! opnames is fixed at compile time and the tables are small enough that a
//! linear scan costs nothing next to a socket read.

/// One of the three logical TCP channels, each with its own port and opcode space.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Channel {
    General,
    Chats,
    Files,
}

impl Channel {
    /// 4-digit length prefixes on general/chats, 10-digit on files (large file/picture frames).
    pub fn length_prefix_digits(self) -> usize {
        match self {
            Channel::General | Channel::Chats => 4,
            Channel::Files => 10,
        }
    }
}

/// Client (caller) → server opcodes, general channel.
pub const CLIENT_GENERAL_OPCODES: &[(&str, u8)] = &[
    ("register", 1),
    ("sign_in", 2),
    ("logout", 3),
    ("add_friend", 4),
    ("accept_friend", 5),
    ("remove_friend", 6),
    ("create_group", 7),
    ("add_group_member", 8),
    ("request_chats", 9),
    ("request_group_members", 10),
    ("request_friend_list", 11),
    ("change_username", 12),
    ("change_status", 13),
    ("change_password", 14),
    ("request_user_status", 15),
    ("request_user_picture", 16),
    ("request_user_picture_check", 17),
    ("request_file", 18),
    ("request_keys", 19),
    ("start_voice", 20),
    ("start_video", 21),
    ("join_voice", 22),
    ("join_video", 23),
];

/// Client → server opcodes, chats channel.
pub const CLIENT_CHATS_OPCODES: &[(&str, u8)] = &[
    ("text_message", 1),
    ("file_description", 2),
    ("get_chat_history", 3),
];

/// Client → server opcodes, files channel.
pub const CLIENT_FILES_OPCODES: &[(&str, u8)] = &[("file_in_chat", 1), ("profile_pic_change", 2)];

/// Server → client opcodes, general channel.
pub const SERVER_GENERAL_OPCODES: &[(&str, u8)] = &[
    ("approve", 1),
    ("reject", 2),
    ("friend_request_notify", 3),
    ("friend_added", 4),
    ("added_to_group", 5),
    ("voice_started", 6),
    ("video_started", 7),
    ("voice_call_info", 8),
    ("video_call_info", 9),
    ("voice_user_joined", 10),
    ("video_user_joined", 11),
    ("chats_list", 12),
    ("group_names", 13),
    ("user_status", 14),
    ("friend_list", 15),
    ("keys", 16),
];

/// Server → client opcodes, chats channel.
pub const SERVER_CHATS_OPCODES: &[(&str, u8)] = &[
    ("text_message", 1),
    ("file_description", 2),
    ("chat_history", 3),
];

/// Server → client opcodes, files channel. Completes the gap the reference
/// implementation left open (its `send_file`/`profile_picture` encoders
/// referenced a `files_opcodes['send_file']` key that the dict never defined).
pub const SERVER_FILES_OPCODES: &[(&str, u8)] = &[("send_file", 1), ("profile_picture", 2)];

/// Fixed positional parameter names per client opname, across all three channels.
/// Completes the reference implementation's `c_opcodes_params`, which never
/// carried entries for `accept_friend`, `file_description`, `file_in_chat` or
/// `profile_pic_change`.
pub const CLIENT_PARAMS: &[(&str, &[&str])] = &[
    ("register", &["username", "password"]),
    ("sign_in", &["username", "password"]),
    ("logout", &[]),
    ("add_friend", &["friend_username"]),
    ("accept_friend", &["friend_username", "is_accepted"]),
    ("remove_friend", &["friend_username"]),
    ("create_group", &["group_name"]),
    (
        "add_group_member",
        &["chat_id", "new_member_username", "group_key"],
    ),
    ("request_chats", &[]),
    ("request_group_members", &["chat_id"]),
    ("request_friend_list", &[]),
    ("change_username", &["new_username"]),
    ("change_status", &["new_status"]),
    ("change_password", &["old_password", "new_password"]),
    ("request_user_status", &["username"]),
    ("request_user_picture", &["username"]),
    ("request_user_picture_check", &["username", "current_hash"]),
    ("request_file", &["file_hash"]),
    ("request_keys", &[]),
    ("start_voice", &["chat_id"]),
    ("start_video", &["chat_id"]),
    ("join_voice", &["chat_id"]),
    ("join_video", &["chat_id"]),
    ("text_message", &["chat_id", "sender_username", "message"]),
    (
        "file_description",
        &["chat_id", "sender_username", "file_name", "file_hash"],
    ),
    ("get_chat_history", &["chat_id"]),
    (
        "file_in_chat",
        &["chat_id", "file_name", "file_payload_b64"],
    ),
    ("profile_pic_change", &["username", "picture_payload_b64"]),
];

fn opcode_table(channel: Channel, for_client: bool) -> &'static [(&'static str, u8)] {
    match (channel, for_client) {
        (Channel::General, true) => CLIENT_GENERAL_OPCODES,
        (Channel::Chats, true) => CLIENT_CHATS_OPCODES,
        (Channel::Files, true) => CLIENT_FILES_OPCODES,
        (Channel::General, false) => SERVER_GENERAL_OPCODES,
        (Channel::Chats, false) => SERVER_CHATS_OPCODES,
        (Channel::Files, false) => SERVER_FILES_OPCODES,
    }
}

/// Look up the opcode for a client opname on a given channel.
pub fn client_opcode(channel: Channel, opname: &str) -> Option<u8> {
    opcode_table(channel, true)
        .iter()
        .find(|(name, _)| *name == opname)
        .map(|(_, code)| *code)
}

/// Look up the client opname for an opcode on a given channel.
pub fn client_opname(channel: Channel, opcode: u8) -> Option<&'static str> {
    opcode_table(channel, true)
        .iter()
        .find(|(_, code)| *code == opcode)
        .map(|(name, _)| *name)
}

/// Look up the opcode for a server opname on a given channel.
pub fn server_opcode(channel: Channel, opname: &str) -> Option<u8> {
    opcode_table(channel, false)
        .iter()
        .find(|(name, _)| *name == opname)
        .map(|(_, code)| *code)
}

/// Look up the fixed parameter-name schema for a client opname.
pub fn client_params(opname: &str) -> Option<&'static [&'static str]> {
    CLIENT_PARAMS
        .iter()
        .find(|(name, _)| *name == opname)
        .map(|(_, params)| *params)
}
