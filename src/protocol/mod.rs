pub mod binary;
pub mod codec;
pub mod column;
pub mod handshake;
pub mod packet;
pub mod reader;
pub mod value;

pub use binary::{decode_binary_row, decode_text_row, encode_execute, StmtPrepareOk};
pub use codec::PacketCodec;
pub use column::{ColumnType, Field};
pub use handshake::{
    compute_auth_response, is_eof_packet, is_err_packet, is_ok_packet, AuthSwitchRequest,
    EofPacket, ErrPacket, HandshakeResponse, InitialHandshake, OkPacket, NATIVE_PASSWORD_PLUGIN,
};
pub use packet::{capabilities, status, Command, Packet};
pub use reader::PayloadReader;
pub use value::Value;
