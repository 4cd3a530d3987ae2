// JDWP protocol definitions and packet handling
//
// Reference: https://docs.oracle.com/javase/8/docs/platform/jpda/jdwp/jdwp-protocol.html

use bytes::{Buf, BufMut, BytesMut};
use thiserror::Error;

// JDWP uses big-endian (network byte order) for all multi-byte values

pub type JdwpResult<T> = Result<T, JdwpError>;

#[derive(Debug, Error)]
pub enum JdwpError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Protocol error: {0}")]
    Protocol(String),

    #[error("Invalid handshake")]
    InvalidHandshake,

    #[error("JDWP error code {0}: {1}")]
    JdwpErrorCode(u16, &'static str),

    #[error("Connection closed")]
    ConnectionClosed,
}

impl JdwpError {
    /// The JDWP error code carried by a failed reply, if any
    pub fn code(&self) -> Option<u16> {
        match self {
            JdwpError::JdwpErrorCode(code, _) => Some(*code),
            _ => None,
        }
    }

    /// True when the debuggee connection is gone and no further command can succeed
    pub fn is_disconnect(&self) -> bool {
        match self {
            JdwpError::Io(_) | JdwpError::ConnectionClosed => true,
            JdwpError::JdwpErrorCode(code, _) => *code == error_codes::VM_DEAD,
            _ => false,
        }
    }
}

// JDWP handshake string
pub const JDWP_HANDSHAKE: &[u8] = b"JDWP-Handshake";

// Packet structure:
// length (4 bytes) - includes header
// id (4 bytes)
// flags (1 byte) - 0x00 = command, 0x80 = reply
// [Command packet: command set (1 byte) + command (1 byte)]
// [Reply packet: error code (2 bytes)]
// data (variable)

pub const HEADER_SIZE: usize = 11;
pub const REPLY_FLAG: u8 = 0x80;

#[derive(Debug, Clone)]
pub struct CommandPacket {
    pub id: u32,
    pub command_set: u8,
    pub command: u8,
    pub data: Vec<u8>,
}

#[derive(Debug, Clone)]
pub struct ReplyPacket {
    pub id: u32,
    pub error_code: u16,
    pub data: Vec<u8>,
}

impl CommandPacket {
    pub fn new(id: u32, command_set: u8, command: u8) -> Self {
        Self::with_data(id, command_set, command, Vec::new())
    }

    pub fn with_data(id: u32, command_set: u8, command: u8, data: Vec<u8>) -> Self {
        Self {
            id,
            command_set,
            command,
            data,
        }
    }

    pub fn encode(&self) -> Vec<u8> {
        let length = HEADER_SIZE + self.data.len();
        let mut buf = BytesMut::with_capacity(length);

        buf.put_u32(length as u32);
        buf.put_u32(self.id);
        buf.put_u8(0x00);
        buf.put_u8(self.command_set);
        buf.put_u8(self.command);
        buf.put_slice(&self.data);

        buf.to_vec()
    }
}

impl ReplyPacket {
    pub fn decode(mut buf: &[u8]) -> JdwpResult<Self> {
        if buf.len() < HEADER_SIZE {
            return Err(JdwpError::Protocol(format!(
                "Reply packet too short: {} bytes",
                buf.len()
            )));
        }

        let length = buf.get_u32() as usize;
        let id = buf.get_u32();
        let flags = buf.get_u8();

        if flags != REPLY_FLAG {
            return Err(JdwpError::Protocol(format!("Invalid reply flag: {:#x}", flags)));
        }

        let error_code = buf.get_u16();
        let payload_len = length.saturating_sub(HEADER_SIZE).min(buf.len());

        Ok(Self {
            id,
            error_code,
            data: buf[..payload_len].to_vec(),
        })
    }

    /// Turn a reply into its payload, or the JDWP error it carries
    pub fn into_result(self) -> JdwpResult<Vec<u8>> {
        if self.error_code != error_codes::NONE {
            return Err(JdwpError::JdwpErrorCode(
                self.error_code,
                error_name(self.error_code),
            ));
        }
        Ok(self.data)
    }
}

/// Error codes the debugger reacts to explicitly
pub mod error_codes {
    pub const NONE: u16 = 0;
    pub const INVALID_THREAD: u16 = 10;
    pub const THREAD_NOT_SUSPENDED: u16 = 13;
    pub const INVALID_OBJECT: u16 = 20;
    pub const INVALID_CLASS: u16 = 21;
    pub const CLASS_NOT_PREPARED: u16 = 22;
    pub const INVALID_METHODID: u16 = 23;
    pub const INVALID_FRAMEID: u16 = 30;
    pub const ABSENT_INFORMATION: u16 = 101;
    pub const INVALID_EVENT_TYPE: u16 = 102;
    pub const VM_DEAD: u16 = 112;
    pub const ALREADY_INVOKING: u16 = 502;
    pub const NATIVE_METHOD: u16 = 511;
}

pub fn error_name(code: u16) -> &'static str {
    match code {
        0 => "NONE",
        10 => "INVALID_THREAD",
        11 => "INVALID_THREAD_GROUP",
        12 => "INVALID_PRIORITY",
        13 => "THREAD_NOT_SUSPENDED",
        14 => "THREAD_SUSPENDED",
        20 => "INVALID_OBJECT",
        21 => "INVALID_CLASS",
        22 => "CLASS_NOT_PREPARED",
        23 => "INVALID_METHODID",
        24 => "INVALID_LOCATION",
        25 => "INVALID_FIELDID",
        30 => "INVALID_FRAMEID",
        31 => "NO_MORE_FRAMES",
        32 => "OPAQUE_FRAME",
        33 => "NOT_CURRENT_FRAME",
        34 => "TYPE_MISMATCH",
        35 => "INVALID_SLOT",
        40 => "DUPLICATE",
        41 => "NOT_FOUND",
        50 => "INVALID_MONITOR",
        51 => "NOT_MONITOR_OWNER",
        52 => "INTERRUPT",
        60..=71 => "CLASS_REDEFINITION_FAILED",
        99 => "NOT_IMPLEMENTED",
        100 => "NULL_POINTER",
        101 => "ABSENT_INFORMATION",
        102 => "INVALID_EVENT_TYPE",
        103 => "ILLEGAL_ARGUMENT",
        110 => "OUT_OF_MEMORY",
        111 => "ACCESS_DENIED",
        112 => "VM_DEAD",
        113 => "INTERNAL",
        115 => "UNATTACHED_THREAD",
        500 => "INVALID_TAG",
        502 => "ALREADY_INVOKING",
        503 => "INVALID_INDEX",
        504 => "INVALID_LENGTH",
        506 => "INVALID_STRING",
        507 => "INVALID_CLASS_LOADER",
        508 => "INVALID_ARRAY",
        509 => "TRANSPORT_LOAD",
        510 => "TRANSPORT_INIT",
        511 => "NATIVE_METHOD",
        512 => "INVALID_COUNT",
        _ => "UNKNOWN_ERROR",
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_command_packet_encode() {
        let packet = CommandPacket::with_data(7, 15, 1, vec![0xAA, 0xBB]);
        let encoded = packet.encode();

        assert_eq!(encoded.len(), HEADER_SIZE + 2);
        assert_eq!(&encoded[0..4], &[0, 0, 0, 13]);
        assert_eq!(&encoded[4..8], &[0, 0, 0, 7]);
        assert_eq!(encoded[8], 0x00);
        assert_eq!(encoded[9], 15);
        assert_eq!(encoded[10], 1);
        assert_eq!(&encoded[11..], &[0xAA, 0xBB]);
    }

    #[test]
    fn test_reply_payload_is_bounded_by_length() {
        let reply_data = vec![
            0, 0, 0, 13, // length = 13
            0, 0, 0, 9, // id = 9
            0x80, // reply flag
            0, 0, // error code
            1, 2, // payload
            3, // trailing garbage beyond declared length
        ];

        let packet = ReplyPacket::decode(&reply_data).unwrap();
        assert_eq!(packet.id, 9);
        assert_eq!(packet.into_result().unwrap(), vec![1, 2]);
    }

    #[test]
    fn test_reply_error_maps_to_named_code() {
        let reply_data = vec![0, 0, 0, 11, 0, 0, 0, 2, 0x80, 0, 13];

        let err = ReplyPacket::decode(&reply_data)
            .unwrap()
            .into_result()
            .unwrap_err();
        assert_eq!(err.code(), Some(error_codes::THREAD_NOT_SUSPENDED));
        assert!(err.to_string().contains("THREAD_NOT_SUSPENDED"));
        assert!(!err.is_disconnect());
    }

    #[test]
    fn test_native_method_code_is_named() {
        assert_eq!(error_name(error_codes::NATIVE_METHOD), "NATIVE_METHOD");
        let err = JdwpError::JdwpErrorCode(error_codes::NATIVE_METHOD, error_name(error_codes::NATIVE_METHOD));
        assert!(!err.is_disconnect());
    }

    #[test]
    fn test_vm_dead_counts_as_disconnect() {
        let err = JdwpError::JdwpErrorCode(error_codes::VM_DEAD, error_name(error_codes::VM_DEAD));
        assert!(err.is_disconnect());
        assert!(JdwpError::ConnectionClosed.is_disconnect());
    }

    #[test]
    fn test_rejects_command_flag_in_reply() {
        let data = vec![0, 0, 0, 11, 0, 0, 0, 1, 0x00, 0, 0];
        assert!(ReplyPacket::decode(&data).is_err());
    }
}
