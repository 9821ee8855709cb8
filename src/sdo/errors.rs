use core::fmt;

use thiserror::Error;

use crate::network::TransportError;
use crate::objectdictionary::ODError;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SDOAbortCode {
    ToggleBitNotAlternated,
    SDOProtocolTimedOut,
    CommandSpecifierError,
    InvalidBlockSize,
    InvalidSequenceNumber,
    CRCError,
    OutOfMemory,
    UnsupportedAccess,
    WriteOnlyError,
    ReadOnlyError,
    ObjectDoesNotExist,
    ObjectCannotBeMapped,
    PDOOverflow,
    ParameterIncompatibility,
    InternalIncompatibility,
    HardwareError,
    WrongLength,
    TooLong,
    TooShort,
    SubindexDoesNotExist,
    InvalidValue,
    ValueTooHigh,
    ValueTooLow,
    MaxLessThanMin,
    ResourceNotAvailable,
    GeneralError,
    TransferOrStorageError,
    LocalControlError,
    DeviceStateError,
    DictionaryError,
    NoDataAvailable,
    /// A code outside the CiA 301 table, kept verbatim.
    Unknown(u32),
}

impl SDOAbortCode {
    pub fn code(self) -> u32 {
        self.into()
    }
}

impl From<u32> for SDOAbortCode {
    fn from(abort_code: u32) -> Self {
        match abort_code {
            0x0503_0000 => SDOAbortCode::ToggleBitNotAlternated,
            0x0504_0000 => SDOAbortCode::SDOProtocolTimedOut,
            0x0504_0001 => SDOAbortCode::CommandSpecifierError,
            0x0504_0002 => SDOAbortCode::InvalidBlockSize,
            0x0504_0003 => SDOAbortCode::InvalidSequenceNumber,
            0x0504_0004 => SDOAbortCode::CRCError,
            0x0504_0005 => SDOAbortCode::OutOfMemory,
            0x0601_0000 => SDOAbortCode::UnsupportedAccess,
            0x0601_0001 => SDOAbortCode::WriteOnlyError,
            0x0601_0002 => SDOAbortCode::ReadOnlyError,
            0x0602_0000 => SDOAbortCode::ObjectDoesNotExist,
            0x0604_0041 => SDOAbortCode::ObjectCannotBeMapped,
            0x0604_0042 => SDOAbortCode::PDOOverflow,
            0x0604_0043 => SDOAbortCode::ParameterIncompatibility,
            0x0604_0047 => SDOAbortCode::InternalIncompatibility,
            0x0606_0000 => SDOAbortCode::HardwareError,
            0x0607_0010 => SDOAbortCode::WrongLength,
            0x0607_0012 => SDOAbortCode::TooLong,
            0x0607_0013 => SDOAbortCode::TooShort,
            0x0609_0011 => SDOAbortCode::SubindexDoesNotExist,
            0x0609_0030 => SDOAbortCode::InvalidValue,
            0x0609_0031 => SDOAbortCode::ValueTooHigh,
            0x0609_0032 => SDOAbortCode::ValueTooLow,
            0x0609_0036 => SDOAbortCode::MaxLessThanMin,
            0x060A_0023 => SDOAbortCode::ResourceNotAvailable,
            0x0800_0000 => SDOAbortCode::GeneralError,
            0x0800_0020 => SDOAbortCode::TransferOrStorageError,
            0x0800_0021 => SDOAbortCode::LocalControlError,
            0x0800_0022 => SDOAbortCode::DeviceStateError,
            0x0800_0023 => SDOAbortCode::DictionaryError,
            0x0800_0024 => SDOAbortCode::NoDataAvailable,
            other => SDOAbortCode::Unknown(other),
        }
    }
}

impl From<SDOAbortCode> for u32 {
    fn from(code: SDOAbortCode) -> u32 {
        match code {
            SDOAbortCode::ToggleBitNotAlternated => 0x0503_0000,
            SDOAbortCode::SDOProtocolTimedOut => 0x0504_0000,
            SDOAbortCode::CommandSpecifierError => 0x0504_0001,
            SDOAbortCode::InvalidBlockSize => 0x0504_0002,
            SDOAbortCode::InvalidSequenceNumber => 0x0504_0003,
            SDOAbortCode::CRCError => 0x0504_0004,
            SDOAbortCode::OutOfMemory => 0x0504_0005,
            SDOAbortCode::UnsupportedAccess => 0x0601_0000,
            SDOAbortCode::WriteOnlyError => 0x0601_0001,
            SDOAbortCode::ReadOnlyError => 0x0601_0002,
            SDOAbortCode::ObjectDoesNotExist => 0x0602_0000,
            SDOAbortCode::ObjectCannotBeMapped => 0x0604_0041,
            SDOAbortCode::PDOOverflow => 0x0604_0042,
            SDOAbortCode::ParameterIncompatibility => 0x0604_0043,
            SDOAbortCode::InternalIncompatibility => 0x0604_0047,
            SDOAbortCode::HardwareError => 0x0606_0000,
            SDOAbortCode::WrongLength => 0x0607_0010,
            SDOAbortCode::TooLong => 0x0607_0012,
            SDOAbortCode::TooShort => 0x0607_0013,
            SDOAbortCode::SubindexDoesNotExist => 0x0609_0011,
            SDOAbortCode::InvalidValue => 0x0609_0030,
            SDOAbortCode::ValueTooHigh => 0x0609_0031,
            SDOAbortCode::ValueTooLow => 0x0609_0032,
            SDOAbortCode::MaxLessThanMin => 0x0609_0036,
            SDOAbortCode::ResourceNotAvailable => 0x060A_0023,
            SDOAbortCode::GeneralError => 0x0800_0000,
            SDOAbortCode::TransferOrStorageError => 0x0800_0020,
            SDOAbortCode::LocalControlError => 0x0800_0021,
            SDOAbortCode::DeviceStateError => 0x0800_0022,
            SDOAbortCode::DictionaryError => 0x0800_0023,
            SDOAbortCode::NoDataAvailable => 0x0800_0024,
            SDOAbortCode::Unknown(code) => code,
        }
    }
}

impl From<SDOAbortCode> for [u8; 4] {
    fn from(code: SDOAbortCode) -> [u8; 4] {
        code.code().to_le_bytes()
    }
}

impl fmt::Display for SDOAbortCode {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        let text = match self {
            SDOAbortCode::ToggleBitNotAlternated => "Toggle bit not alternated",
            SDOAbortCode::SDOProtocolTimedOut => "SDO protocol timed out",
            SDOAbortCode::CommandSpecifierError => "Client/server command specifier not valid or unknown",
            SDOAbortCode::InvalidBlockSize => "Invalid block size",
            SDOAbortCode::InvalidSequenceNumber => "Invalid sequence number",
            SDOAbortCode::CRCError => "CRC error",
            SDOAbortCode::OutOfMemory => "Out of memory",
            SDOAbortCode::UnsupportedAccess => "Unsupported access to an object",
            SDOAbortCode::WriteOnlyError => "Attempt to read a write only object",
            SDOAbortCode::ReadOnlyError => "Attempt to write a read only object",
            SDOAbortCode::ObjectDoesNotExist => "Object does not exist in the object dictionary",
            SDOAbortCode::ObjectCannotBeMapped => "Object cannot be mapped to the PDO",
            SDOAbortCode::PDOOverflow => "The number and length of the objects to be mapped would exceed PDO length",
            SDOAbortCode::ParameterIncompatibility => "General parameter incompatibility reason",
            SDOAbortCode::InternalIncompatibility => "General internal incompatibility in the device",
            SDOAbortCode::HardwareError => "Access failed due to a hardware error",
            SDOAbortCode::WrongLength => "Data type does not match, length of service parameter does not match",
            SDOAbortCode::TooLong => "Data type does not match, length of service parameter too high",
            SDOAbortCode::TooShort => "Data type does not match, length of service parameter too low",
            SDOAbortCode::SubindexDoesNotExist => "Subindex does not exist",
            SDOAbortCode::InvalidValue => "Invalid value for parameter",
            SDOAbortCode::ValueTooHigh => "Value of parameter written too high",
            SDOAbortCode::ValueTooLow => "Value of parameter written too low",
            SDOAbortCode::MaxLessThanMin => "Maximum value is less than minimum value",
            SDOAbortCode::ResourceNotAvailable => "Resource not available: SDO connection",
            SDOAbortCode::GeneralError => "General error",
            SDOAbortCode::TransferOrStorageError => "Data cannot be transferred or stored to the application",
            SDOAbortCode::LocalControlError => "Data can not be transferred or stored to the application because of local control",
            SDOAbortCode::DeviceStateError => "Data can not be transferred or stored to the application because of the present device state",
            SDOAbortCode::DictionaryError => "Object dictionary dynamic generation fails or no object dictionary is present",
            SDOAbortCode::NoDataAvailable => "No data available",
            SDOAbortCode::Unknown(_) => "Unknown abort code",
        };

        write!(f, "Code 0x{:08X}, {}", self.code(), text)
    }
}

/// Terminal failure of one SDO transfer.
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum SdoError {
    /// Abort sent by the server (`remote`) or raised locally on a protocol violation.
    #[error("transfer aborted ({}): {code}", origin(.remote))]
    ProtocolAbort { code: SDOAbortCode, remote: bool },
    #[error("no response from server")]
    Timeout,
    #[error("transport unavailable")]
    TransportUnavailable,
    #[error(transparent)]
    Dictionary(#[from] ODError),
}

fn origin(remote: &bool) -> &'static str {
    if *remote {
        "by server"
    } else {
        "locally"
    }
}

impl SdoError {
    pub(crate) fn local(code: SDOAbortCode) -> Self {
        SdoError::ProtocolAbort { code, remote: false }
    }

    /// Numeric code reported to callers as the last error.
    pub fn abort_code(&self) -> u32 {
        match self {
            SdoError::ProtocolAbort { code, .. } => code.code(),
            SdoError::Timeout => SDOAbortCode::SDOProtocolTimedOut.code(),
            SdoError::TransportUnavailable => SDOAbortCode::GeneralError.code(),
            SdoError::Dictionary(ODError::IndexDoesNotExist(_)) => SDOAbortCode::ObjectDoesNotExist.code(),
            SdoError::Dictionary(ODError::SubindexDoesNotExist(..)) => SDOAbortCode::SubindexDoesNotExist.code(),
        }
    }
}

impl From<TransportError> for SdoError {
    fn from(_: TransportError) -> Self {
        SdoError::TransportUnavailable
    }
}
