use core::convert::Infallible;
use core::fmt;

/// A firmware image ready to be written to a device.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct FirmwareImage {
    /// Device type the image is built for; sent to the bootloader as key
    pub device_type: u32,
    pub software_version: String,
    pub build_date: String,
    pub program: Vec<u8>,
}

impl FirmwareImage {
    /// 16 bit sum of all program bytes, as checked by the bootloader.
    pub fn checksum(&self) -> u16 {
        self.program
            .iter()
            .fold(0u16, |sum, byte| sum.wrapping_add(u16::from(*byte)))
    }
}

/// Turns the contents of a firmware file into a [`FirmwareImage`].
pub trait ImageParser {
    type Error: fmt::Display;

    fn parse(&self, bytes: &[u8]) -> Result<FirmwareImage, Self::Error>;
}

/// Takes the whole file as program, for raw binaries without a container.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BinaryImageParser {
    pub device_type: u32,
}

impl ImageParser for BinaryImageParser {
    type Error = Infallible;

    fn parse(&self, bytes: &[u8]) -> Result<FirmwareImage, Self::Error> {
        Ok(FirmwareImage {
            device_type: self.device_type,
            program: bytes.to_vec(),
            ..FirmwareImage::default()
        })
    }
}
