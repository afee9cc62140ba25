//! Wire codec for the three TCP channels (general, chats, files): opcode
//! tables, field value parsing, frame length-prefixing, and the server-side
//! message constructors built on top of them.

pub mod codec;
pub mod error;
pub mod messages;
pub mod opcodes;
pub mod value;

pub use codec::{decode_client_message, encode_frame, encode_message, try_decode_frame, DecodedMessage};
pub use error::CodecError;
pub use opcodes::Channel;
pub use value::Field;
