use core::fmt;

use crate::objectdictionary::{DataType, ObjectAddress};

use super::codec::EXPEDITED_CAPACITY;

/// Handle returned by [`SdoClient::upload`](super::SdoClient::upload) and
/// [`SdoClient::download`](super::SdoClient::download).
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct RequestId(pub u32);

impl fmt::Display for RequestId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    Upload,
    Download,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransferMode {
    Expedited,
    Segmented,
    Block,
}

impl TransferMode {
    /// Picks the transfer mode for an object of `data_type` holding `length` bytes.
    ///
    /// Uploads only decide between block and initiate; the server chooses expedited or
    /// segmented in its response.
    pub fn select(direction: Direction, data_type: DataType, length: usize) -> Self {
        if data_type.is_bulk() {
            return TransferMode::Block;
        }
        match direction {
            Direction::Upload => TransferMode::Segmented,
            Direction::Download if (1..=EXPEDITED_CAPACITY).contains(&length) => TransferMode::Expedited,
            Direction::Download => TransferMode::Segmented,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransferState {
    Idle,
    UploadInitiateSent,
    UploadSegment,
    BlockUpload,
    BlockUploadEnd,
    DownloadInitiateSent,
    DownloadSegment,
    BlockDownload,
    BlockDownloadEnd,
}

/// One queued or running SDO transaction.
#[derive(Debug, Clone)]
pub struct TransferRequest {
    pub id: RequestId,
    pub target: ObjectAddress,
    pub direction: Direction,
    pub mode: TransferMode,
    /// Received bytes for uploads, source bytes for downloads
    pub buffer: Vec<u8>,
    pub offset: usize,
    pub remaining: usize,
    pub size: Option<usize>,
    pub toggle: bool,
    /// Last block sequence number sent, or received in order, in the current block.
    /// Sequence numbers start at 1; 0 means none yet.
    pub sequence_number: u8,
    pub block_size: u8,
    /// Offset of the first byte of the current block
    pub block_start: usize,
    pub crc: bool,
    pub state: TransferState,
}

impl TransferRequest {
    pub fn upload(id: RequestId, target: ObjectAddress, mode: TransferMode) -> Self {
        Self::new(id, target, Direction::Upload, mode, Vec::new())
    }

    pub fn download(id: RequestId, target: ObjectAddress, mode: TransferMode, source: Vec<u8>) -> Self {
        Self::new(id, target, Direction::Download, mode, source)
    }

    fn new(id: RequestId, target: ObjectAddress, direction: Direction, mode: TransferMode, buffer: Vec<u8>) -> Self {
        let size = match direction {
            Direction::Download => Some(buffer.len()),
            Direction::Upload => None,
        };
        TransferRequest {
            id,
            target,
            direction,
            mode,
            remaining: size.unwrap_or(0),
            size,
            buffer,
            offset: 0,
            toggle: false,
            sequence_number: 0,
            block_size: 0,
            block_start: 0,
            crc: false,
            state: TransferState::Idle,
        }
    }

    pub fn flip_toggle(&mut self) {
        self.toggle = !self.toggle;
    }

    /// Advances the download offset past `count` sent bytes.
    pub fn consume(&mut self, count: usize) {
        self.offset += count;
        self.remaining = self.buffer.len().saturating_sub(self.offset);
    }

    /// Moves the download offset back to `offset`, e.g. for a block retransmission.
    pub fn rewind(&mut self, offset: usize) {
        self.offset = offset.min(self.buffer.len());
        self.remaining = self.buffer.len() - self.offset;
    }

    pub fn unsent(&self) -> &[u8] {
        &self.buffer[self.offset.min(self.buffer.len())..]
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn mode_selection() {
        use Direction::*;
        assert_eq!(TransferMode::select(Download, DataType::Unsigned8, 1), TransferMode::Expedited);
        assert_eq!(TransferMode::select(Download, DataType::Unsigned32, 4), TransferMode::Expedited);
        assert_eq!(TransferMode::select(Download, DataType::Unsigned64, 8), TransferMode::Segmented);
        assert_eq!(TransferMode::select(Download, DataType::VisibleString, 0), TransferMode::Segmented);
        assert_eq!(TransferMode::select(Download, DataType::Domain, 3), TransferMode::Block);
        assert_eq!(TransferMode::select(Upload, DataType::Domain, 0), TransferMode::Block);
        assert_eq!(TransferMode::select(Upload, DataType::Unsigned8, 1), TransferMode::Segmented);
    }

    #[test]
    fn offset_bookkeeping() {
        let mut request = TransferRequest::download(
            RequestId(1),
            ObjectAddress::new(0x1F50, 1),
            TransferMode::Block,
            (0..20).collect(),
        );
        assert_eq!(request.remaining, 20);
        request.consume(14);
        assert_eq!(request.remaining, 6);
        assert_eq!(request.unsent(), &[14, 15, 16, 17, 18, 19]);
        request.rewind(7);
        assert_eq!(request.remaining, 13);
        assert_eq!(request.unsent()[0], 7);
    }
}
