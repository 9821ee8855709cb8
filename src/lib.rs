//! CANopen SDO client and firmware update driver.
//!
//! [`RemoteNode`] talks to one device over SDO: reads and writes are queued, driven by
//! incoming frames and a caller supplied clock, and reported as [`events::ObjectEvent`]s.
//! [`Bootloader`] uses a node to flash new firmware.

pub mod bootloader;
pub mod config;
pub mod events;
pub mod frame;
pub mod network;
pub mod node;
pub mod objectdictionary;
pub mod sdo;

pub use bootloader::Bootloader;
pub use config::{BootloaderConfig, SdoConfig};
pub use frame::CanOpenFrame;
pub use network::{Network, TransportError};
pub use node::{NodeId, RemoteNode};
pub use objectdictionary::{NodeOd, ObjectAddress, ObjectDictionary};
