use thiserror::Error;

/// Raised by a [`Network`] when a frame could not be handed to the bus.
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransportError {
    #[error("transmit buffer full")]
    Busy,
    #[error("bus interface unavailable")]
    Unavailable,
}

/// Outbound side of the CAN transport.
///
/// Implementations only queue the frame; they must not block waiting for a reply.
pub trait Network {
    fn send_message(&self, can_id: u32, data: [u8; 8]) -> Result<(), TransportError>;
}
