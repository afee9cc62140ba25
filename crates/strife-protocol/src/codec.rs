use std::collections::HashMap;

use bytes::{Buf, BytesMut};

use crate::error::CodecError;
use crate::opcodes::{self, Channel};
use crate::value::Field;

pub const FIELD_SEPARATOR: char = '@';
pub const LIST_SEPARATOR: char = '#';

/// Ceiling on a single frame's ciphertext length. The files channel's 10-digit
/// prefix can claim up to ~10 GiB; nothing this server sends or expects is
/// anywhere near that, so we refuse to buffer past a generous cap instead of
/// trusting a hostile or corrupted prefix.
pub const MAX_FRAME_LEN: usize = 64 * 1024 * 1024;

/// A decoded client→server message: its opname, numeric opcode, and its
/// positional parameters looked up by name per the channel's fixed schema.
#[derive(Debug, Clone)]
pub struct DecodedMessage {
    pub opname: String,
    pub opcode: u8,
    fields: HashMap<String, Field>,
}

impl DecodedMessage {
    pub fn field(&self, name: &str) -> Option<&Field> {
        self.fields.get(name)
    }

    pub fn str(&self, name: &str) -> Option<String> {
        self.fields.get(name).map(Field::as_str_lossy)
    }

    pub fn int(&self, name: &str) -> Option<i64> {
        self.fields.get(name).and_then(Field::as_int)
    }
}

/// Decode one already-decrypted client message string on the given channel.
///
/// Per the wire format: a 2-digit zero-padded opcode, then `@`-separated
/// fields in the fixed order the channel's schema declares for that opname.
/// A field count that doesn't exactly match the schema is treated as a
/// malformed frame (§4.1 edge case b) rather than partially decoded.
pub fn decode_client_message(channel: Channel, raw: &str) -> Result<DecodedMessage, CodecError> {
    if raw.is_empty() {
        return Err(CodecError::EmptyFrame);
    }

    let mut parts = raw.split(FIELD_SEPARATOR);
    let opcode_token = parts.next().ok_or(CodecError::EmptyFrame)?;
    let opcode: u8 = opcode_token
        .parse()
        .map_err(|_| CodecError::UnknownOpcode { channel, opcode: 0 })?;

    let opname = opcodes::client_opname(channel, opcode)
        .ok_or(CodecError::UnknownOpcode { channel, opcode })?;
    let schema = opcodes::client_params(opname).unwrap_or(&[]);

    let values: Vec<&str> = parts.collect();
    if values.len() != schema.len() {
        return Err(CodecError::FieldCountMismatch {
            opname: opname.to_string(),
            expected: schema.len(),
            got: values.len(),
        });
    }

    let mut fields = HashMap::with_capacity(schema.len());
    for (name, raw_value) in schema.iter().zip(values.iter()) {
        fields.insert((*name).to_string(), Field::parse(raw_value));
    }

    Ok(DecodedMessage {
        opname: opname.to_string(),
        opcode,
        fields,
    })
}

/// Render one server→client message: `<2-digit opcode>` followed by `@`-joined
/// fields, each list field itself `#`-joined. This is the plaintext that the
/// crypto layer then encrypts and base64-encodes before framing.
pub fn encode_message(opname: &str, channel: Channel, fields: &[Field]) -> Result<String, CodecError> {
    let opcode = opcodes::server_opcode(channel, opname)
        .ok_or_else(|| CodecError::UnknownOpname(opname.to_string()))?;

    let mut out = format!("{opcode:02}");
    for field in fields {
        out.push(FIELD_SEPARATOR);
        out.push_str(&field.to_string());
    }
    Ok(out)
}

/// Pull one complete length-prefixed ciphertext frame out of a connection's
/// receive buffer, if one is fully present. `prefix_digits` is 4 on
/// general/chats, 10 on files (§4.3). Returns `Ok(None)` when more bytes are
/// needed, consistent with the reference's `recv(N)`-then-`recv(size)` loop
/// but adapted to a non-blocking, buffer-draining style.
pub fn try_decode_frame(
    buf: &mut BytesMut,
    prefix_digits: usize,
) -> Result<Option<Vec<u8>>, CodecError> {
    if buf.len() < prefix_digits {
        return Ok(None);
    }

    let prefix = &buf[..prefix_digits];
    if !prefix.iter().all(u8::is_ascii_digit) {
        return Err(CodecError::BadLengthPrefix {
            expected: prefix_digits,
            raw: prefix.to_vec(),
        });
    }

    let length: usize = std::str::from_utf8(prefix)
        .expect("validated ASCII digits above")
        .parse()
        .map_err(|_| CodecError::BadLengthPrefix {
            expected: prefix_digits,
            raw: prefix.to_vec(),
        })?;

    if length > MAX_FRAME_LEN {
        return Err(CodecError::FrameTooLarge(length));
    }

    if buf.len() < prefix_digits + length {
        return Ok(None);
    }

    buf.advance(prefix_digits);
    let payload = buf.split_to(length).to_vec();
    Ok(Some(payload))
}

/// Build the wire bytes for one outgoing frame: a zero-padded decimal length
/// prefix followed by the already-encrypted, base64-encoded ciphertext.
pub fn encode_frame(ciphertext: &[u8], prefix_digits: usize) -> Vec<u8> {
    let mut out = Vec::with_capacity(prefix_digits + ciphertext.len());
    out.extend_from_slice(format!("{:0width$}", ciphertext.len(), width = prefix_digits).as_bytes());
    out.extend_from_slice(ciphertext);
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn decodes_register_with_two_string_fields() {
        let msg = decode_client_message(Channel::General, "01@alice@hunter22").unwrap();
        assert_eq!(msg.opname, "register");
        assert_eq!(msg.str("username").as_deref(), Some("alice"));
        assert_eq!(msg.str("password").as_deref(), Some("hunter22"));
    }

    #[test]
    fn numeric_username_is_coerced_via_as_str_lossy() {
        let msg = decode_client_message(Channel::General, "01@1234@secretpw").unwrap();
        assert_eq!(msg.field("username"), Some(&Field::Int(1234)));
        assert_eq!(msg.str("username").as_deref(), Some("1234"));
    }

    #[test]
    fn too_few_fields_is_malformed() {
        let err = decode_client_message(Channel::General, "01@alice").unwrap_err();
        assert!(matches!(err, CodecError::FieldCountMismatch { .. }));
    }

    #[test]
    fn too_many_fields_is_malformed() {
        let err = decode_client_message(Channel::General, "01@alice@pw@extra").unwrap_err();
        assert!(matches!(err, CodecError::FieldCountMismatch { .. }));
    }

    #[test]
    fn unknown_opcode_on_channel() {
        let err = decode_client_message(Channel::General, "99@x").unwrap_err();
        assert!(matches!(err, CodecError::UnknownOpcode { opcode: 99, .. }));
    }

    #[test]
    fn no_params_opname_decodes_with_no_fields() {
        let msg = decode_client_message(Channel::General, "03").unwrap();
        assert_eq!(msg.opname, "logout");
    }

    #[test]
    fn encode_approve_matches_wire_form() {
        let encoded = encode_message("approve", Channel::General, &[Field::Int(1)]).unwrap();
        assert_eq!(encoded, "01@1");
    }

    #[test]
    fn encode_list_field_joins_with_hash() {
        let encoded = encode_message(
            "group_names",
            Channel::General,
            &[
                Field::Int(7),
                Field::StrList(vec!["bob".into(), "carol".into()]),
            ],
        )
        .unwrap();
        assert_eq!(encoded, "13@7@bob#carol");
    }

    #[test]
    fn frame_round_trip_four_digit_prefix() {
        let ciphertext = b"hello-ciphertext";
        let framed = encode_frame(ciphertext, 4);
        assert_eq!(&framed[..4], b"0016");

        let mut buf = BytesMut::from(&framed[..]);
        let decoded = try_decode_frame(&mut buf, 4).unwrap().unwrap();
        assert_eq!(decoded, ciphertext);
        assert!(buf.is_empty());
    }

    #[test]
    fn frame_round_trip_ten_digit_prefix_for_files_channel() {
        let ciphertext = vec![0xAB; 2048];
        let framed = encode_frame(&ciphertext, 10);
        assert_eq!(&framed[..10], b"0000002048");

        let mut buf = BytesMut::from(&framed[..]);
        let decoded = try_decode_frame(&mut buf, 10).unwrap().unwrap();
        assert_eq!(decoded, ciphertext);
    }

    #[test]
    fn partial_prefix_returns_none() {
        let mut buf = BytesMut::from(&b"00"[..]);
        assert!(try_decode_frame(&mut buf, 4).unwrap().is_none());
    }

    #[test]
    fn partial_body_returns_none_and_does_not_consume() {
        let mut buf = BytesMut::from(&b"0010short"[..]);
        assert!(try_decode_frame(&mut buf, 4).unwrap().is_none());
        assert_eq!(buf.len(), 9);
    }

    #[test]
    fn non_digit_prefix_is_an_error() {
        let mut buf = BytesMut::from(&b"00ab"[..]);
        assert!(matches!(
            try_decode_frame(&mut buf, 4),
            Err(CodecError::BadLengthPrefix { .. })
        ));
    }

    #[test]
    fn multiple_frames_in_one_buffer() {
        let mut buf = BytesMut::new();
        buf.extend_from_slice(&encode_frame(b"first", 4));
        buf.extend_from_slice(&encode_frame(b"second", 4));

        let first = try_decode_frame(&mut buf, 4).unwrap().unwrap();
        let second = try_decode_frame(&mut buf, 4).unwrap().unwrap();
        assert_eq!(first, b"first");
        assert_eq!(second, b"second");
        assert!(buf.is_empty());
    }
}
