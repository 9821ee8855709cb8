use core::fmt;

use embedded_can::{Frame, Id, StandardId};

/// Client to server (request) COB-ID base.
pub const SDO_TX_BASE: u16 = 0x600;
/// Server to client (response) COB-ID base.
pub const SDO_RX_BASE: u16 = 0x580;

/// A classic CAN frame carrying CANopen traffic.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CanOpenFrame {
    id: Id,
    data: [u8; 8],
    dlc: u8,
    is_remote: bool,
}

impl CanOpenFrame {
    /// Builds a data frame with a standard identifier.
    ///
    /// Returns `None` if `cob_id` does not fit in 11 bits.
    pub fn standard(cob_id: u16, data: &[u8]) -> Option<Self> {
        let id = StandardId::new(cob_id)?;
        <Self as Frame>::new(id, data)
    }

    /// The raw 11-bit identifier, or `None` for extended frames.
    pub fn cob_id(&self) -> Option<u16> {
        match self.id {
            Id::Standard(id) => Some(id.as_raw()),
            Id::Extended(_) => None,
        }
    }
}

impl Frame for CanOpenFrame {
    fn new(id: impl Into<Id>, data: &[u8]) -> Option<Self> {
        if data.len() > 8 {
            return None;
        }
        let mut frame_data = [0; 8];
        frame_data[0..data.len()].copy_from_slice(data);
        Some(CanOpenFrame {
            id: id.into(),
            data: frame_data,
            dlc: data.len() as u8,
            is_remote: false,
        })
    }

    fn new_remote(id: impl Into<Id>, dlc: usize) -> Option<Self> {
        if dlc > 8 {
            return None;
        }
        Some(CanOpenFrame {
            id: id.into(),
            data: [0; 8],
            dlc: dlc as u8,
            is_remote: true,
        })
    }

    fn is_extended(&self) -> bool {
        matches!(self.id, Id::Extended(_))
    }

    fn is_remote_frame(&self) -> bool {
        self.is_remote
    }

    fn id(&self) -> Id {
        self.id
    }

    fn dlc(&self) -> usize {
        self.dlc as usize
    }

    fn data(&self) -> &[u8] {
        &self.data[0..self.dlc as usize]
    }
}

impl fmt::Display for CanOpenFrame {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.id {
            Id::Standard(id) => write!(f, "{:03X} [{}]", id.as_raw(), self.dlc)?,
            Id::Extended(id) => write!(f, "{:08X} [{}]", id.as_raw(), self.dlc)?,
        }
        for byte in self.data() {
            write!(f, " {:02X}", byte)?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn display_standard_frame() {
        let frame = CanOpenFrame::standard(0x605, &[0x40, 0x00, 0x10, 0x00]).unwrap();
        assert_eq!(frame.to_string(), "605 [4] 40 00 10 00");
        assert_eq!(frame.cob_id(), Some(0x605));
    }

    #[test]
    fn rejects_oversized_payload() {
        assert!(CanOpenFrame::standard(0x605, &[0; 9]).is_none());
        assert!(CanOpenFrame::standard(0x800, &[0; 8]).is_none());
    }
}
