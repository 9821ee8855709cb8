use std::collections::BTreeMap;
use std::fmt;

use thiserror::Error;

pub use datatypes::DataType;

pub mod datatypes;

/// Index and subindex of one object in a node's dictionary.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct ObjectAddress {
    pub index: u16,
    pub subindex: u8,
}

impl ObjectAddress {
    pub const fn new(index: u16, subindex: u8) -> Self {
        ObjectAddress { index, subindex }
    }
}

impl fmt::Display for ObjectAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "0x{:04X}.{}", self.index, self.subindex)
    }
}

#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum ODError {
    #[error("object 0x{0:04X} does not exist")]
    IndexDoesNotExist(u16),
    #[error("subindex {1} of object 0x{0:04X} does not exist")]
    SubindexDoesNotExist(u16, u8),
}

/// Local mirror of a remote node's object dictionary.
///
/// The SDO client reads download sources from here and stores upload results here.
pub trait ObjectDictionary {
    fn value(&self, address: ObjectAddress) -> Result<&[u8], ODError>;

    fn set_value(&mut self, address: ObjectAddress, bytes: &[u8]) -> Result<(), ODError>;

    fn data_type(&self, address: ObjectAddress) -> Result<DataType, ODError>;

    /// Creates the object if it is missing. Existing objects are left untouched.
    fn define(&mut self, address: ObjectAddress, data_type: DataType);

    fn byte_length(&self, address: ObjectAddress) -> Result<usize, ODError> {
        self.value(address).map(|value| value.len())
    }

    fn contains(&self, address: ObjectAddress) -> bool {
        self.data_type(address).is_ok()
    }
}

struct Entry {
    data_type: DataType,
    value: Vec<u8>,
}

/// In-memory [`ObjectDictionary`].
#[derive(Default)]
pub struct NodeOd {
    entries: BTreeMap<ObjectAddress, Entry>,
}

impl NodeOd {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    fn entry(&self, address: ObjectAddress) -> Result<&Entry, ODError> {
        self.entries.get(&address).ok_or_else(|| self.missing(address))
    }

    fn missing(&self, address: ObjectAddress) -> ODError {
        // same index under another subindex means only the subindex is missing
        let same_index = self
            .entries
            .range(ObjectAddress::new(address.index, 0)..=ObjectAddress::new(address.index, u8::MAX))
            .next()
            .is_some();
        if same_index {
            ODError::SubindexDoesNotExist(address.index, address.subindex)
        } else {
            ODError::IndexDoesNotExist(address.index)
        }
    }
}

impl ObjectDictionary for NodeOd {
    fn value(&self, address: ObjectAddress) -> Result<&[u8], ODError> {
        Ok(&self.entry(address)?.value)
    }

    fn set_value(&mut self, address: ObjectAddress, bytes: &[u8]) -> Result<(), ODError> {
        let missing = self.missing(address);
        let entry = self.entries.get_mut(&address).ok_or(missing)?;
        entry.value.clear();
        entry.value.extend_from_slice(bytes);
        Ok(())
    }

    fn data_type(&self, address: ObjectAddress) -> Result<DataType, ODError> {
        Ok(self.entry(address)?.data_type)
    }

    fn define(&mut self, address: ObjectAddress, data_type: DataType) {
        self.entries.entry(address).or_insert_with(|| Entry {
            data_type,
            value: vec![0; data_type.size().unwrap_or(0)],
        });
    }
}
