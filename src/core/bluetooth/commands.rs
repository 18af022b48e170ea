//! Lock commands implementation
//! This module contains all the command frames that can be written to the lock

use crate::core::bluetooth::constants::{CONNECT_HANDSHAKE_FRAME, LED_OFF, LED_ON, UNLOCK_FRAME};
use crate::core::bluetooth::types::WriteMode;

/// Lock commands
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LockCommand {
    /// Open the lock (A7 07 01 02 03 04 05 06 03)
    Unlock,
    /// Answer to a prepare-for-connect request (A9 02 FC CF)
    ConnectHandshake,
    /// Switch the LED on (0x01) or off (0x00)
    Led(bool),
}

impl LockCommand {
    /// Convert the command to its byte representation
    pub fn as_bytes(&self) -> &'static [u8] {
        match self {
            Self::Unlock => &UNLOCK_FRAME,
            Self::ConnectHandshake => &CONNECT_HANDSHAKE_FRAME,
            Self::Led(true) => &[LED_ON],
            Self::Led(false) => &[LED_OFF],
        }
    }

    pub fn to_bytes(&self) -> Vec<u8> {
        self.as_bytes().to_vec()
    }

    /// Delivery mode the lock expects for this command
    pub fn write_mode(&self) -> WriteMode {
        match self {
            Self::Unlock | Self::ConnectHandshake => WriteMode::WithoutResponse,
            Self::Led(_) => WriteMode::WithResponse,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_command_frames() {
        assert_eq!(
            LockCommand::Unlock.to_bytes(),
            vec![0xA7, 0x07, 0x01, 0x02, 0x03, 0x04, 0x05, 0x06, 0x03]
        );
        assert_eq!(
            LockCommand::ConnectHandshake.to_bytes(),
            vec![0xA9, 0x02, 0xFC, 0xCF]
        );
        assert_eq!(LockCommand::Led(true).as_bytes(), &[0x01]);
        assert_eq!(LockCommand::Led(false).as_bytes(), &[0x00]);
    }

    #[test]
    fn test_protocol_writes_skip_response() {
        assert_eq!(LockCommand::Unlock.write_mode(), WriteMode::WithoutResponse);
        assert_eq!(
            LockCommand::ConnectHandshake.write_mode(),
            WriteMode::WithoutResponse
        );
        assert_eq!(LockCommand::Led(true).write_mode(), WriteMode::WithResponse);
    }
}
