//! Byte layout of SDO frames.
//!
//! Every frame is 8 bytes. Byte 0 is the command byte, except for block segments where it
//! is the sequence number. Initiate and abort frames carry the index (little endian) in
//! bytes 1-2 and the subindex in byte 3.

use crc::{Crc, CRC_16_XMODEM};
use heapless::Vec;
use thiserror::Error;

use super::errors::SDOAbortCode;
use crate::objectdictionary::ObjectAddress;

/// Data bytes in a segment or block segment.
pub const SEGMENT_CAPACITY: usize = 7;
/// Data bytes in an expedited initiate frame.
pub const EXPEDITED_CAPACITY: usize = 4;
/// Largest block size a server may negotiate.
pub const MAX_BLOCK_SIZE: u8 = 127;

/// CRC used by block transfers.
pub const BLOCK_CRC: Crc<u16> = Crc::<u16>::new(&CRC_16_XMODEM);

#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum CodecError {
    #[error("unknown command specifier {0}")]
    UnknownCommand(u8),
    #[error("unknown block subcommand {0:#04x}")]
    UnknownSubcommand(u8),
}

/// The command byte of an SDO frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CommandByte(pub u8);

impl CommandByte {
    const TOGGLE: u8 = 0x10;
    const CRC: u8 = 0x04;
    const EXPEDITED: u8 = 0x02;
    const BLOCK_SIZE_INDICATED: u8 = 0x02;
    const SIZE_INDICATED: u8 = 0x01;
    const NO_MORE_SEGMENTS: u8 = 0x01;

    pub const fn new(specifier: u8) -> Self {
        CommandByte((specifier & 0x7) << 5)
    }

    pub const fn specifier(self) -> u8 {
        self.0 >> 5
    }

    pub const fn toggle(self) -> bool {
        self.0 & Self::TOGGLE != 0
    }

    /// Unused data bytes of an initiate frame (bits 3-2).
    pub const fn initiate_unused(self) -> u8 {
        (self.0 >> 2) & 0x3
    }

    /// Unused data bytes of a segment (bits 3-1).
    pub const fn segment_unused(self) -> u8 {
        (self.0 >> 1) & 0x7
    }

    /// Unused data bytes of the last block segment, carried in block end frames (bits 4-2).
    pub const fn block_end_unused(self) -> u8 {
        (self.0 >> 2) & 0x7
    }

    pub const fn expedited(self) -> bool {
        self.0 & Self::EXPEDITED != 0
    }

    pub const fn size_indicated(self) -> bool {
        self.0 & Self::SIZE_INDICATED != 0
    }

    pub const fn no_more_segments(self) -> bool {
        self.0 & Self::NO_MORE_SEGMENTS != 0
    }

    pub const fn crc_supported(self) -> bool {
        self.0 & Self::CRC != 0
    }

    pub const fn block_size_indicated(self) -> bool {
        self.0 & Self::BLOCK_SIZE_INDICATED != 0
    }

    /// Client/server subcommand of block frames (bits 1-0).
    pub const fn block_subcommand(self) -> u8 {
        self.0 & 0x3
    }

    const fn flag(self, mask: u8, on: bool) -> Self {
        if on {
            CommandByte(self.0 | mask)
        } else {
            self
        }
    }

    const fn with_toggle(self, on: bool) -> Self {
        self.flag(Self::TOGGLE, on)
    }

    const fn with_crc(self, on: bool) -> Self {
        self.flag(Self::CRC, on)
    }

    const fn with_expedited(self, on: bool) -> Self {
        self.flag(Self::EXPEDITED, on)
    }

    const fn with_size_indicated(self, on: bool) -> Self {
        self.flag(Self::SIZE_INDICATED, on)
    }

    const fn with_block_size_indicated(self, on: bool) -> Self {
        self.flag(Self::BLOCK_SIZE_INDICATED, on)
    }

    const fn with_no_more_segments(self, on: bool) -> Self {
        self.flag(Self::NO_MORE_SEGMENTS, on)
    }

    const fn with_initiate_unused(self, n: u8) -> Self {
        CommandByte(self.0 | ((n & 0x3) << 2))
    }

    const fn with_segment_unused(self, n: u8) -> Self {
        CommandByte(self.0 | ((n & 0x7) << 1))
    }

    const fn with_block_end_unused(self, n: u8) -> Self {
        CommandByte(self.0 | ((n & 0x7) << 2))
    }

    const fn with_subcommand(self, cs: u8) -> Self {
        CommandByte(self.0 | (cs & 0x3))
    }
}

/// Client command specifier (ccs).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ClientCommand {
    DownloadSegment = 0,
    InitiateDownload = 1,
    InitiateUpload = 2,
    UploadSegment = 3,
    Abort = 4,
    BlockUpload = 5,
    BlockDownload = 6,
}

impl TryFrom<u8> for ClientCommand {
    type Error = CodecError;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        use ClientCommand::*;
        match value {
            0 => Ok(DownloadSegment),
            1 => Ok(InitiateDownload),
            2 => Ok(InitiateUpload),
            3 => Ok(UploadSegment),
            4 => Ok(Abort),
            5 => Ok(BlockUpload),
            6 => Ok(BlockDownload),
            _ => Err(CodecError::UnknownCommand(value)),
        }
    }
}

/// Server command specifier (scs).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ServerCommand {
    UploadSegment = 0,
    DownloadSegment = 1,
    InitiateUpload = 2,
    InitiateDownload = 3,
    Abort = 4,
    BlockDownload = 5,
    BlockUpload = 6,
}

impl TryFrom<u8> for ServerCommand {
    type Error = CodecError;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        use ServerCommand::*;
        match value {
            0 => Ok(UploadSegment),
            1 => Ok(DownloadSegment),
            2 => Ok(InitiateUpload),
            3 => Ok(InitiateDownload),
            4 => Ok(Abort),
            5 => Ok(BlockDownload),
            6 => Ok(BlockUpload),
            _ => Err(CodecError::UnknownCommand(value)),
        }
    }
}

/// Requests sent by the SDO client.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ClientRequest {
    InitiateDownload {
        address: ObjectAddress,
        expedited: bool,
        size_indicated: bool,
        unused: u8,
        /// Value when expedited, size otherwise
        data: [u8; 4],
    },
    DownloadSegment {
        toggle: bool,
        unused: u8,
        last: bool,
        data: [u8; 7],
    },
    InitiateUpload {
        address: ObjectAddress,
    },
    UploadSegment {
        toggle: bool,
    },
    Abort {
        address: ObjectAddress,
        code: SDOAbortCode,
    },
    InitiateBlockDownload {
        address: ObjectAddress,
        crc_supported: bool,
        size: Option<u32>,
    },
    EndBlockDownload {
        unused: u8,
        crc: u16,
    },
    InitiateBlockUpload {
        address: ObjectAddress,
        crc_supported: bool,
        block_size: u8,
        protocol_switch: u8,
    },
    StartBlockUpload,
    BlockUploadAck {
        ackseq: u8,
        block_size: u8,
    },
    EndBlockUpload,
}

/// Responses sent by the SDO server.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ServerResponse {
    InitiateUpload {
        address: ObjectAddress,
        expedited: bool,
        size_indicated: bool,
        unused: u8,
        data: [u8; 4],
    },
    UploadSegment {
        toggle: bool,
        unused: u8,
        last: bool,
        data: [u8; 7],
    },
    InitiateDownload {
        address: ObjectAddress,
    },
    DownloadSegment {
        toggle: bool,
    },
    Abort {
        address: ObjectAddress,
        code: SDOAbortCode,
    },
    InitiateBlockDownload {
        address: ObjectAddress,
        crc_supported: bool,
        block_size: u8,
    },
    BlockDownloadAck {
        ackseq: u8,
        block_size: u8,
    },
    EndBlockDownload,
    InitiateBlockUpload {
        address: ObjectAddress,
        crc_supported: bool,
        size: Option<u32>,
    },
    EndBlockUpload {
        unused: u8,
        crc: u16,
    },
}

/// One segment of a block transfer. Byte 0 holds the sequence number, bit 7 marks the
/// final segment of the whole transfer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BlockSegment {
    pub seqno: u8,
    pub last: bool,
    pub data: [u8; 7],
}

impl BlockSegment {
    const LAST: u8 = 0x80;

    pub fn new(seqno: u8, last: bool, chunk: &[u8]) -> Self {
        BlockSegment {
            seqno,
            last,
            data: pad(chunk),
        }
    }

    pub fn encode(&self) -> [u8; 8] {
        let mut frame = [0; 8];
        frame[0] = (self.seqno & !Self::LAST) | if self.last { Self::LAST } else { 0 };
        frame[1..].copy_from_slice(&self.data);
        frame
    }

    pub fn decode(frame: &[u8; 8]) -> Self {
        BlockSegment {
            seqno: frame[0] & !Self::LAST,
            last: frame[0] & Self::LAST != 0,
            data: segment_data(frame),
        }
    }
}

impl ClientRequest {
    /// Expedited download of at most 4 bytes.
    pub fn expedited_download(address: ObjectAddress, value: &[u8]) -> Self {
        let len = value.len().min(EXPEDITED_CAPACITY);
        ClientRequest::InitiateDownload {
            address,
            expedited: true,
            size_indicated: true,
            unused: (EXPEDITED_CAPACITY - len) as u8,
            data: pad(&value[..len]),
        }
    }

    pub fn segmented_download(address: ObjectAddress, size: u32) -> Self {
        ClientRequest::InitiateDownload {
            address,
            expedited: false,
            size_indicated: true,
            unused: 0,
            data: size.to_le_bytes(),
        }
    }

    pub fn download_segment(toggle: bool, last: bool, chunk: &[u8]) -> Self {
        ClientRequest::DownloadSegment {
            toggle,
            unused: (SEGMENT_CAPACITY - chunk.len().min(SEGMENT_CAPACITY)) as u8,
            last,
            data: pad(chunk),
        }
    }

    pub fn encode(&self) -> [u8; 8] {
        use ClientCommand as C;
        let mut frame = [0; 8];
        match *self {
            ClientRequest::InitiateDownload {
                address,
                expedited,
                size_indicated,
                unused,
                data,
            } => {
                frame[0] = CommandByte::new(C::InitiateDownload as u8)
                    .with_initiate_unused(unused)
                    .with_expedited(expedited)
                    .with_size_indicated(size_indicated)
                    .0;
                put_address(&mut frame, address);
                frame[4..].copy_from_slice(&data);
            }
            ClientRequest::DownloadSegment {
                toggle,
                unused,
                last,
                data,
            } => {
                frame[0] = CommandByte::new(C::DownloadSegment as u8)
                    .with_toggle(toggle)
                    .with_segment_unused(unused)
                    .with_no_more_segments(last)
                    .0;
                frame[1..].copy_from_slice(&data);
            }
            ClientRequest::InitiateUpload { address } => {
                frame[0] = CommandByte::new(C::InitiateUpload as u8).0;
                put_address(&mut frame, address);
            }
            ClientRequest::UploadSegment { toggle } => {
                frame[0] = CommandByte::new(C::UploadSegment as u8).with_toggle(toggle).0;
            }
            ClientRequest::Abort { address, code } => {
                frame[0] = CommandByte::new(C::Abort as u8).0;
                put_address(&mut frame, address);
                frame[4..].copy_from_slice(&code.code().to_le_bytes());
            }
            ClientRequest::InitiateBlockDownload {
                address,
                crc_supported,
                size,
            } => {
                frame[0] = CommandByte::new(C::BlockDownload as u8)
                    .with_crc(crc_supported)
                    .with_block_size_indicated(size.is_some())
                    .0;
                put_address(&mut frame, address);
                frame[4..].copy_from_slice(&size.unwrap_or(0).to_le_bytes());
            }
            ClientRequest::EndBlockDownload { unused, crc } => {
                frame[0] = CommandByte::new(C::BlockDownload as u8)
                    .with_block_end_unused(unused)
                    .with_subcommand(1)
                    .0;
                frame[1..3].copy_from_slice(&crc.to_le_bytes());
            }
            ClientRequest::InitiateBlockUpload {
                address,
                crc_supported,
                block_size,
                protocol_switch,
            } => {
                frame[0] = CommandByte::new(C::BlockUpload as u8).with_crc(crc_supported).0;
                put_address(&mut frame, address);
                frame[4] = block_size;
                frame[5] = protocol_switch;
            }
            ClientRequest::StartBlockUpload => {
                frame[0] = CommandByte::new(C::BlockUpload as u8).with_subcommand(3).0;
            }
            ClientRequest::BlockUploadAck { ackseq, block_size } => {
                frame[0] = CommandByte::new(C::BlockUpload as u8).with_subcommand(2).0;
                frame[1] = ackseq;
                frame[2] = block_size;
            }
            ClientRequest::EndBlockUpload => {
                frame[0] = CommandByte::new(C::BlockUpload as u8).with_subcommand(1).0;
            }
        }
        frame
    }

    pub fn decode(frame: &[u8; 8]) -> Result<Self, CodecError> {
        let command = CommandByte(frame[0]);
        let request = match ClientCommand::try_from(command.specifier())? {
            ClientCommand::DownloadSegment => ClientRequest::DownloadSegment {
                toggle: command.toggle(),
                unused: command.segment_unused(),
                last: command.no_more_segments(),
                data: segment_data(frame),
            },
            ClientCommand::InitiateDownload => ClientRequest::InitiateDownload {
                address: get_address(frame),
                expedited: command.expedited(),
                size_indicated: command.size_indicated(),
                unused: command.initiate_unused(),
                data: initiate_data(frame),
            },
            ClientCommand::InitiateUpload => ClientRequest::InitiateUpload {
                address: get_address(frame),
            },
            ClientCommand::UploadSegment => ClientRequest::UploadSegment {
                toggle: command.toggle(),
            },
            ClientCommand::Abort => ClientRequest::Abort {
                address: get_address(frame),
                code: SDOAbortCode::from(u32::from_le_bytes(initiate_data(frame))),
            },
            ClientCommand::BlockUpload => match command.block_subcommand() {
                0 => ClientRequest::InitiateBlockUpload {
                    address: get_address(frame),
                    crc_supported: command.crc_supported(),
                    block_size: frame[4],
                    protocol_switch: frame[5],
                },
                1 => ClientRequest::EndBlockUpload,
                2 => ClientRequest::BlockUploadAck {
                    ackseq: frame[1],
                    block_size: frame[2],
                },
                _ => ClientRequest::StartBlockUpload,
            },
            ClientCommand::BlockDownload => {
                if command.0 & 0x1 == 0 {
                    ClientRequest::InitiateBlockDownload {
                        address: get_address(frame),
                        crc_supported: command.crc_supported(),
                        size: command
                            .block_size_indicated()
                            .then(|| u32::from_le_bytes(initiate_data(frame))),
                    }
                } else {
                    ClientRequest::EndBlockDownload {
                        unused: command.block_end_unused(),
                        crc: u16::from_le_bytes([frame[1], frame[2]]),
                    }
                }
            }
        };
        Ok(request)
    }
}

impl ServerResponse {
    pub fn expedited_upload(address: ObjectAddress, value: &[u8]) -> Self {
        let len = value.len().min(EXPEDITED_CAPACITY);
        ServerResponse::InitiateUpload {
            address,
            expedited: true,
            size_indicated: true,
            unused: (EXPEDITED_CAPACITY - len) as u8,
            data: pad(&value[..len]),
        }
    }

    pub fn segmented_upload(address: ObjectAddress, size: Option<u32>) -> Self {
        ServerResponse::InitiateUpload {
            address,
            expedited: false,
            size_indicated: size.is_some(),
            unused: 0,
            data: size.unwrap_or(0).to_le_bytes(),
        }
    }

    pub fn upload_segment(toggle: bool, last: bool, chunk: &[u8]) -> Self {
        ServerResponse::UploadSegment {
            toggle,
            unused: (SEGMENT_CAPACITY - chunk.len().min(SEGMENT_CAPACITY)) as u8,
            last,
            data: pad(chunk),
        }
    }

    /// The object echoed by initiate and abort frames.
    pub fn address(&self) -> Option<ObjectAddress> {
        match *self {
            ServerResponse::InitiateUpload { address, .. }
            | ServerResponse::InitiateDownload { address }
            | ServerResponse::Abort { address, .. }
            | ServerResponse::InitiateBlockDownload { address, .. }
            | ServerResponse::InitiateBlockUpload { address, .. } => Some(address),
            _ => None,
        }
    }

    pub fn command(&self) -> ServerCommand {
        match self {
            ServerResponse::InitiateUpload { .. } => ServerCommand::InitiateUpload,
            ServerResponse::UploadSegment { .. } => ServerCommand::UploadSegment,
            ServerResponse::InitiateDownload { .. } => ServerCommand::InitiateDownload,
            ServerResponse::DownloadSegment { .. } => ServerCommand::DownloadSegment,
            ServerResponse::Abort { .. } => ServerCommand::Abort,
            ServerResponse::InitiateBlockDownload { .. }
            | ServerResponse::BlockDownloadAck { .. }
            | ServerResponse::EndBlockDownload => ServerCommand::BlockDownload,
            ServerResponse::InitiateBlockUpload { .. } | ServerResponse::EndBlockUpload { .. } => {
                ServerCommand::BlockUpload
            }
        }
    }

    pub fn encode(&self) -> [u8; 8] {
        use ServerCommand as S;
        let mut frame = [0; 8];
        match *self {
            ServerResponse::InitiateUpload {
                address,
                expedited,
                size_indicated,
                unused,
                data,
            } => {
                frame[0] = CommandByte::new(S::InitiateUpload as u8)
                    .with_initiate_unused(unused)
                    .with_expedited(expedited)
                    .with_size_indicated(size_indicated)
                    .0;
                put_address(&mut frame, address);
                frame[4..].copy_from_slice(&data);
            }
            ServerResponse::UploadSegment {
                toggle,
                unused,
                last,
                data,
            } => {
                frame[0] = CommandByte::new(S::UploadSegment as u8)
                    .with_toggle(toggle)
                    .with_segment_unused(unused)
                    .with_no_more_segments(last)
                    .0;
                frame[1..].copy_from_slice(&data);
            }
            ServerResponse::InitiateDownload { address } => {
                frame[0] = CommandByte::new(S::InitiateDownload as u8).0;
                put_address(&mut frame, address);
            }
            ServerResponse::DownloadSegment { toggle } => {
                frame[0] = CommandByte::new(S::DownloadSegment as u8).with_toggle(toggle).0;
            }
            ServerResponse::Abort { address, code } => {
                frame[0] = CommandByte::new(S::Abort as u8).0;
                put_address(&mut frame, address);
                frame[4..].copy_from_slice(&code.code().to_le_bytes());
            }
            ServerResponse::InitiateBlockDownload {
                address,
                crc_supported,
                block_size,
            } => {
                frame[0] = CommandByte::new(S::BlockDownload as u8).with_crc(crc_supported).0;
                put_address(&mut frame, address);
                frame[4] = block_size;
            }
            ServerResponse::BlockDownloadAck { ackseq, block_size } => {
                frame[0] = CommandByte::new(S::BlockDownload as u8).with_subcommand(2).0;
                frame[1] = ackseq;
                frame[2] = block_size;
            }
            ServerResponse::EndBlockDownload => {
                frame[0] = CommandByte::new(S::BlockDownload as u8).with_subcommand(1).0;
            }
            ServerResponse::InitiateBlockUpload {
                address,
                crc_supported,
                size,
            } => {
                frame[0] = CommandByte::new(S::BlockUpload as u8)
                    .with_crc(crc_supported)
                    .with_block_size_indicated(size.is_some())
                    .0;
                put_address(&mut frame, address);
                frame[4..].copy_from_slice(&size.unwrap_or(0).to_le_bytes());
            }
            ServerResponse::EndBlockUpload { unused, crc } => {
                frame[0] = CommandByte::new(S::BlockUpload as u8)
                    .with_block_end_unused(unused)
                    .with_subcommand(1)
                    .0;
                frame[1..3].copy_from_slice(&crc.to_le_bytes());
            }
        }
        frame
    }

    pub fn decode(frame: &[u8; 8]) -> Result<Self, CodecError> {
        let command = CommandByte(frame[0]);
        let response = match ServerCommand::try_from(command.specifier())? {
            ServerCommand::UploadSegment => ServerResponse::UploadSegment {
                toggle: command.toggle(),
                unused: command.segment_unused(),
                last: command.no_more_segments(),
                data: segment_data(frame),
            },
            ServerCommand::DownloadSegment => ServerResponse::DownloadSegment {
                toggle: command.toggle(),
            },
            ServerCommand::InitiateUpload => ServerResponse::InitiateUpload {
                address: get_address(frame),
                expedited: command.expedited(),
                size_indicated: command.size_indicated(),
                unused: command.initiate_unused(),
                data: initiate_data(frame),
            },
            ServerCommand::InitiateDownload => ServerResponse::InitiateDownload {
                address: get_address(frame),
            },
            ServerCommand::Abort => ServerResponse::Abort {
                address: get_address(frame),
                code: SDOAbortCode::from(u32::from_le_bytes(initiate_data(frame))),
            },
            ServerCommand::BlockDownload => match command.block_subcommand() {
                0 => ServerResponse::InitiateBlockDownload {
                    address: get_address(frame),
                    crc_supported: command.crc_supported(),
                    block_size: frame[4],
                },
                1 => ServerResponse::EndBlockDownload,
                2 => ServerResponse::BlockDownloadAck {
                    ackseq: frame[1],
                    block_size: frame[2],
                },
                other => return Err(CodecError::UnknownSubcommand(other)),
            },
            ServerCommand::BlockUpload => {
                if command.0 & 0x1 == 0 {
                    ServerResponse::InitiateBlockUpload {
                        address: get_address(frame),
                        crc_supported: command.crc_supported(),
                        size: command
                            .block_size_indicated()
                            .then(|| u32::from_le_bytes(initiate_data(frame))),
                    }
                } else {
                    ServerResponse::EndBlockUpload {
                        unused: command.block_end_unused(),
                        crc: u16::from_le_bytes([frame[1], frame[2]]),
                    }
                }
            }
        };
        Ok(response)
    }
}

/// The used part of a segment's data field.
pub fn segment_payload(data: &[u8; 7], unused: u8) -> Vec<u8, SEGMENT_CAPACITY> {
    let used = SEGMENT_CAPACITY.saturating_sub(unused as usize);
    Vec::from_slice(&data[..used]).unwrap_or_default()
}

fn pad<const N: usize>(chunk: &[u8]) -> [u8; N] {
    let mut data = [0; N];
    let len = chunk.len().min(N);
    data[..len].copy_from_slice(&chunk[..len]);
    data
}

fn put_address(frame: &mut [u8; 8], address: ObjectAddress) {
    frame[1..3].copy_from_slice(&address.index.to_le_bytes());
    frame[3] = address.subindex;
}

fn get_address(frame: &[u8; 8]) -> ObjectAddress {
    ObjectAddress::new(u16::from_le_bytes([frame[1], frame[2]]), frame[3])
}

fn initiate_data(frame: &[u8; 8]) -> [u8; 4] {
    [frame[4], frame[5], frame[6], frame[7]]
}

fn segment_data(frame: &[u8; 8]) -> [u8; 7] {
    [frame[1], frame[2], frame[3], frame[4], frame[5], frame[6], frame[7]]
}
