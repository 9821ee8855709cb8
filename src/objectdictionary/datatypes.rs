pub use DataType::*;

/// CANopen basic data types as seen by the SDO layer.
///
/// Only the size matters here: it decides between expedited, segmented and block transfers.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum DataType {
    Boolean,
    Integer8,
    Integer16,
    Integer32,
    Integer64,
    Unsigned8,
    Unsigned16,
    Unsigned32,
    Unsigned64,
    Real32,
    Real64,
    VisibleString,
    OctetString,
    UnicodeString,
    Domain,
}

impl DataType {
    /// Encoded size for fixed-width types.
    pub const fn size(&self) -> Option<usize> {
        match self {
            Boolean | Integer8 | Unsigned8 => Some(1),
            Integer16 | Unsigned16 => Some(2),
            Integer32 | Unsigned32 | Real32 => Some(4),
            Integer64 | Unsigned64 | Real64 => Some(8),
            VisibleString | OctetString | UnicodeString | Domain => None,
        }
    }

    /// Bulk objects are moved with block transfers.
    pub const fn is_bulk(&self) -> bool {
        matches!(self, Domain)
    }
}
