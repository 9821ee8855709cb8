#![allow(dead_code)]

use core::cell::{Cell, RefCell};

use canopen_master::config::SdoConfig;
use canopen_master::frame::CanOpenFrame;
use canopen_master::network::{Network, TransportError};
use canopen_master::node::{NodeId, RemoteNode};
use canopen_master::objectdictionary::NodeOd;

pub const NODE_ID: u8 = 5;
pub const TX_COBID: u32 = 0x605;
pub const RX_COBID: u16 = 0x585;

#[derive(Default)]
pub struct MockNetwork {
    pub sent_messages: RefCell<Vec<(u32, [u8; 8])>>,
    pub offline: Cell<bool>,
}

impl Network for MockNetwork {
    fn send_message(&self, can_id: u32, data: [u8; 8]) -> Result<(), TransportError> {
        if self.offline.get() {
            return Err(TransportError::Unavailable);
        }
        self.sent_messages.borrow_mut().push((can_id, data));
        Ok(())
    }
}

impl MockNetwork {
    pub fn frames(&self) -> Vec<[u8; 8]> {
        self.sent_messages.borrow().iter().map(|(_, data)| *data).collect()
    }

    pub fn last(&self) -> Option<[u8; 8]> {
        self.sent_messages.borrow().last().map(|(_, data)| *data)
    }

    pub fn count(&self) -> usize {
        self.sent_messages.borrow().len()
    }

    pub fn take(&self) -> Vec<[u8; 8]> {
        self.sent_messages
            .borrow_mut()
            .drain(..)
            .map(|(_, data)| data)
            .collect()
    }
}

pub fn node(network: &MockNetwork, od: NodeOd) -> RemoteNode<'_, MockNetwork, NodeOd> {
    let _ = env_logger::builder().is_test(true).try_init();
    RemoteNode::new(NodeId::new(NODE_ID).unwrap(), network, od, SdoConfig::default())
}

/// A frame sent by the SDO server of the node under test.
pub fn response(data: [u8; 8]) -> CanOpenFrame {
    CanOpenFrame::standard(RX_COBID, &data).unwrap()
}

pub fn respond(node: &mut RemoteNode<'_, MockNetwork, NodeOd>, data: [u8; 8], now_us: u64) {
    assert!(node.on_message(&response(data), now_us));
}
