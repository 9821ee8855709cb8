//! Tunables for the SDO client and the firmware update driver.

use core::time::Duration;

use crate::frame::{SDO_RX_BASE, SDO_TX_BASE};
use crate::objectdictionary::{DataType, ObjectAddress};

/// SDO client settings.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct SdoConfig {
    /// Time allowed for the server to answer a request
    pub timeout: Duration,
    /// Block size proposed for block uploads (1..=127)
    pub block_size: u8,
    /// Offer CRC on block transfers
    pub crc_support: bool,
    /// COB-ID base of client to server frames
    pub tx_base: u16,
    /// COB-ID base of server to client frames
    pub rx_base: u16,
}

impl Default for SdoConfig {
    fn default() -> Self {
        SdoConfig {
            timeout: Duration::from_millis(6000),
            block_size: 127,
            crc_support: true,
            tx_base: SDO_TX_BASE,
            rx_base: SDO_RX_BASE,
        }
    }
}

impl SdoConfig {
    pub(crate) fn timeout_us(&self) -> u64 {
        self.timeout.as_micros().try_into().unwrap_or(u64::MAX)
    }
}

/// Remote objects used by the bootloader.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct BootloaderObjects {
    pub program_data: ObjectAddress,
    pub program_control: ObjectAddress,
    pub key: ObjectAddress,
    pub checksum: ObjectAddress,
    pub status: ObjectAddress,
}

impl Default for BootloaderObjects {
    fn default() -> Self {
        BootloaderObjects {
            program_data: ObjectAddress::new(0x1F50, 1),
            program_control: ObjectAddress::new(0x1F51, 1),
            key: ObjectAddress::new(0x2050, 1),
            checksum: ObjectAddress::new(0x2050, 2),
            status: ObjectAddress::new(0x2050, 3),
        }
    }
}

impl BootloaderObjects {
    /// Every object with the type it is created with in the local dictionary.
    pub fn definitions(&self) -> [(ObjectAddress, DataType); 5] {
        [
            (self.program_data, DataType::Domain),
            (self.program_control, DataType::Unsigned8),
            (self.key, DataType::Unsigned32),
            (self.checksum, DataType::Unsigned16),
            (self.status, DataType::Unsigned8),
        ]
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct BootloaderConfig {
    /// Delay before re-reading program control or status
    pub poll_delay: Duration,
    /// Consecutive polls before the device is considered unresponsive
    pub max_status_polls: u32,
    pub objects: BootloaderObjects,
}

impl Default for BootloaderConfig {
    fn default() -> Self {
        BootloaderConfig {
            poll_delay: Duration::from_millis(500),
            max_status_polls: 40,
            objects: BootloaderObjects::default(),
        }
    }
}

impl BootloaderConfig {
    pub(crate) fn poll_delay_us(&self) -> u64 {
        self.poll_delay.as_micros().try_into().unwrap_or(u64::MAX)
    }
}
