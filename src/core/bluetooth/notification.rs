//! Notification decoding for the lock protocol
//! Maps raw payloads from the notify and write characteristics to protocol events.

use crate::core::bluetooth::constants::{
    OP_LONG_CONNECT_SUCCESS, OP_PREPARE_FOR_CONNECT, OP_UNLOCK_FAILURE, OP_UNLOCK_SUCCESS,
};

/// Two-byte op-codes the lock sends
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OpCode {
    PrepareForConnect,
    LongConnectSuccess,
    UnlockSuccess,
    UnlockFailure,
}

impl OpCode {
    /// Parses a payload. Anything other than a known two-byte value yields `None`.
    pub fn parse(bytes: &[u8]) -> Option<Self> {
        let [hi, lo] = bytes else {
            return None;
        };
        match u16::from_be_bytes([*hi, *lo]) {
            OP_PREPARE_FOR_CONNECT => Some(Self::PrepareForConnect),
            OP_LONG_CONNECT_SUCCESS => Some(Self::LongConnectSuccess),
            OP_UNLOCK_SUCCESS => Some(Self::UnlockSuccess),
            OP_UNLOCK_FAILURE => Some(Self::UnlockFailure),
            _ => None,
        }
    }

    pub fn value(&self) -> u16 {
        match self {
            Self::PrepareForConnect => OP_PREPARE_FOR_CONNECT,
            Self::LongConnectSuccess => OP_LONG_CONNECT_SUCCESS,
            Self::UnlockSuccess => OP_UNLOCK_SUCCESS,
            Self::UnlockFailure => OP_UNLOCK_FAILURE,
        }
    }
}

/// Semantic event decoded from a notify payload
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProtocolEvent {
    PrepareForConnect,
    LongConnectAchieved,
    UnlockResult(bool),
    InvalidData(Vec<u8>),
}

impl From<OpCode> for ProtocolEvent {
    fn from(op: OpCode) -> Self {
        match op {
            OpCode::PrepareForConnect => ProtocolEvent::PrepareForConnect,
            OpCode::LongConnectSuccess => ProtocolEvent::LongConnectAchieved,
            OpCode::UnlockSuccess => ProtocolEvent::UnlockResult(true),
            OpCode::UnlockFailure => ProtocolEvent::UnlockResult(false),
        }
    }
}

/// Decodes bytes received on the notify characteristic, by read or by notification.
pub fn decode_notification(bytes: &[u8]) -> ProtocolEvent {
    match OpCode::parse(bytes) {
        Some(op) => op.into(),
        None => ProtocolEvent::InvalidData(bytes.to_vec()),
    }
}

/// Outcome of a payload observed on the write characteristic
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WriteFeedback {
    /// The lock echoed a known op-code
    Echo(OpCode),
    InvalidData(Vec<u8>),
}

/// Decodes a read response or acknowledgement from the write characteristic.
pub fn decode_write_result(bytes: &[u8]) -> WriteFeedback {
    match OpCode::parse(bytes) {
        Some(op) => WriteFeedback::Echo(op),
        None => WriteFeedback::InvalidData(bytes.to_vec()),
    }
}

/// Uppercase hex rendering used in log lines
pub fn to_hex(bytes: &[u8]) -> String {
    bytes.iter().map(|b| format!("{:02X}", b)).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_decode_known_opcodes() {
        assert_eq!(
            decode_notification(&[0xFC, 0xCF]),
            ProtocolEvent::PrepareForConnect
        );
        assert_eq!(
            decode_notification(&[0xA9, 0x0D]),
            ProtocolEvent::LongConnectAchieved
        );
        assert_eq!(
            decode_notification(&[0xA7, 0x0D]),
            ProtocolEvent::UnlockResult(true)
        );
        assert_eq!(
            decode_notification(&[0xA7, 0x00]),
            ProtocolEvent::UnlockResult(false)
        );
    }

    #[test]
    fn test_decode_rejects_wrong_length() {
        let payloads: [&[u8]; 4] = [&[], &[0xFC], &[0xFC, 0xCF, 0x00], &[0xA9, 0x0D, 0xA9, 0x0D]];
        for payload in payloads {
            assert_eq!(
                decode_notification(payload),
                ProtocolEvent::InvalidData(payload.to_vec())
            );
        }
    }

    #[test]
    fn test_decode_unknown_opcode() {
        assert_eq!(
            decode_notification(&[0x12, 0x34]),
            ProtocolEvent::InvalidData(vec![0x12, 0x34])
        );
    }

    #[test]
    fn test_write_feedback() {
        assert_eq!(
            decode_write_result(&[0xA9, 0x0D]),
            WriteFeedback::Echo(OpCode::LongConnectSuccess)
        );
        assert_eq!(
            decode_write_result(&[0xA9, 0x02, 0xFC, 0xCF]),
            WriteFeedback::InvalidData(vec![0xA9, 0x02, 0xFC, 0xCF])
        );
    }

    #[test]
    fn test_opcode_value_round_trip() {
        for op in [
            OpCode::PrepareForConnect,
            OpCode::LongConnectSuccess,
            OpCode::UnlockSuccess,
            OpCode::UnlockFailure,
        ] {
            assert_eq!(OpCode::parse(&op.value().to_be_bytes()), Some(op));
        }
    }

    #[test]
    fn test_to_hex() {
        assert_eq!(to_hex(&[0xa9, 0x02, 0xfc, 0xcf]), "A902FCCF");
    }
}
