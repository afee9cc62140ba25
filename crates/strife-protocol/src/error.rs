use thiserror::Error;

#[derive(Debug, Error)]
pub enum CodecError {
    #[error("length prefix is not {expected} ASCII digits: {raw:?}")]
    BadLengthPrefix { expected: usize, raw: Vec<u8> },

    #[error("frame exceeds maximum size: {0} bytes")]
    FrameTooLarge(usize),

    #[error("unknown opcode {opcode} on channel {channel:?}")]
    UnknownOpcode { channel: crate::opcodes::Channel, opcode: u8 },

    #[error("unknown opname {0:?}")]
    UnknownOpname(String),

    #[error("frame has {got} fields, schema for {opname:?} expects {expected}")]
    FieldCountMismatch {
        opname: String,
        expected: usize,
        got: usize,
    },

    #[error("empty frame")]
    EmptyFrame,

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn field_count_mismatch_display() {
        let e = CodecError::FieldCountMismatch {
            opname: "sign_in".into(),
            expected: 2,
            got: 1,
        };
        let msg = e.to_string();
        assert!(msg.contains("sign_in"));
        assert!(msg.contains('2'));
    }

    #[test]
    fn bad_length_prefix_display() {
        let e = CodecError::BadLengthPrefix {
            expected: 4,
            raw: b"12ab".to_vec(),
        };
        assert!(e.to_string().contains("4 ASCII digits"));
    }
}
