use super::error::AdsCommandError;

/// The ADS Command ID identifies the type of request/response carried in an
/// [`AdsHeader`](super::AdsHeader).
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
pub enum AdsCommand {
    /// Invalid command ID.
    #[default]
    Invalid,
    /// Read the name and the version number of the ADS device (0x0001).
    AdsReadDeviceInfo,
    /// Read data from the ADS device, addressed by index group and index offset (0x0002).
    AdsRead,
    /// Write data to the ADS device, addressed by index group and index offset (0x0003).
    AdsWrite,
    /// Read the ADS status and the device status of the ADS device (0x0004).
    AdsReadState,
    /// Change the ADS status and the device status of the ADS device (0x0005).
    AdsWriteControl,
    /// Add a notification to the ADS device (0x0006). Data is sent when the variable changes.
    AdsAddDeviceNotification,
    /// Delete a notification from the ADS device (0x0007).
    AdsDeleteDeviceNotification,
    /// Notification of a change in the ADS device (0x0008). Server -> Client only.
    AdsDeviceNotification,
    /// Write data to the ADS device and read data back immediately (0x0009).
    AdsReadWrite,
    /// A command ID not known to this library version.
    Unknown(u16),
}

impl AdsCommand {
    /// The length of the ADS Command ID in bytes.
    pub const LENGTH: usize = 2;

    /// Creates an `AdsCommand` from a 2-byte array (Little Endian).
    pub fn from_bytes(bytes: [u8; Self::LENGTH]) -> Self {
        Self::from(bytes)
    }

    /// Converts the command to a 2-byte array (Little Endian).
    pub fn to_bytes(&self) -> [u8; Self::LENGTH] {
        (*self).into()
    }

    /// Tries to parse an `AdsCommand` from a byte slice.
    pub fn try_from_slice(bytes: &[u8]) -> Result<Self, AdsCommandError> {
        bytes.try_into()
    }
}

impl From<u16> for AdsCommand {
    fn from(value: u16) -> Self {
        match value {
            0x0000 => Self::Invalid,
            0x0001 => Self::AdsReadDeviceInfo,
            0x0002 => Self::AdsRead,
            0x0003 => Self::AdsWrite,
            0x0004 => Self::AdsReadState,
            0x0005 => Self::AdsWriteControl,
            0x0006 => Self::AdsAddDeviceNotification,
            0x0007 => Self::AdsDeleteDeviceNotification,
            0x0008 => Self::AdsDeviceNotification,
            0x0009 => Self::AdsReadWrite,
            n => Self::Unknown(n),
        }
    }
}

impl From<AdsCommand> for u16 {
    fn from(value: AdsCommand) -> Self {
        match value {
            AdsCommand::Invalid => 0x0000,
            AdsCommand::AdsReadDeviceInfo => 0x0001,
            AdsCommand::AdsRead => 0x0002,
            AdsCommand::AdsWrite => 0x0003,
            AdsCommand::AdsReadState => 0x0004,
            AdsCommand::AdsWriteControl => 0x0005,
            AdsCommand::AdsAddDeviceNotification => 0x0006,
            AdsCommand::AdsDeleteDeviceNotification => 0x0007,
            AdsCommand::AdsDeviceNotification => 0x0008,
            AdsCommand::AdsReadWrite => 0x0009,
            AdsCommand::Unknown(n) => n,
        }
    }
}

impl From<[u8; Self::LENGTH]> for AdsCommand {
    fn from(bytes: [u8; Self::LENGTH]) -> Self {
        u16::from_le_bytes(bytes).into()
    }
}

impl From<AdsCommand> for [u8; AdsCommand::LENGTH] {
    fn from(value: AdsCommand) -> Self {
        u16::from(value).to_le_bytes()
    }
}

impl TryFrom<&[u8]> for AdsCommand {
    type Error = AdsCommandError;

    fn try_from(bytes: &[u8]) -> Result<Self, Self::Error> {
        if bytes.len() < Self::LENGTH {
            return Err(AdsCommandError::UnexpectedLength {
                expected: Self::LENGTH,
                got: bytes.len(),
            });
        }
        Ok(Self::from([bytes[0], bytes[1]]))
    }
}

impl std::fmt::Display for AdsCommand {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        std::fmt::Debug::fmt(self, f)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_command_conversion() {
        assert_eq!(AdsCommand::from(0x0001), AdsCommand::AdsReadDeviceInfo);
        assert_eq!(AdsCommand::from(0x0009), AdsCommand::AdsReadWrite);
        assert_eq!(AdsCommand::from(0x00FF), AdsCommand::Unknown(0x00FF));
        assert_eq!(AdsCommand::from(0), AdsCommand::Invalid);
    }

    #[test]
    fn test_command_to_u16() {
        assert_eq!(u16::from(AdsCommand::AdsReadDeviceInfo), 0x0001);
        assert_eq!(u16::from(AdsCommand::AdsReadWrite), 0x0009);
        assert_eq!(u16::from(AdsCommand::Unknown(123)), 123);
    }

    #[test]
    fn test_command_bytes_roundtrip() {
        let cmd = AdsCommand::AdsDeviceNotification;
        let bytes = cmd.to_bytes();
        assert_eq!(bytes, [0x08, 0x00]);
        assert_eq!(AdsCommand::from_bytes(bytes), cmd);
    }

    #[test]
    fn test_command_try_from_slice_too_short() {
        let err = AdsCommand::try_from_slice(&[0x01]).unwrap_err();
        assert!(matches!(
            err,
            AdsCommandError::UnexpectedLength {
                expected: 2,
                got: 1
            }
        ));
    }
}
