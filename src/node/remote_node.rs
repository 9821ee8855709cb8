use std::sync::mpsc::Receiver;

use embedded_can::Id;
use log::debug;

use super::NodeId;
use crate::config::SdoConfig;
use crate::events::{EventBus, EventKind, ObjectEvent};
use crate::network::Network;
use crate::objectdictionary::{ObjectAddress, ObjectDictionary};
use crate::sdo::{Completion, Direction, RequestId, SdoClient, SdoError, TransferState};

/// Master-side view of one remote node: its SDO client, a local copy of its objects and the
/// subscribers waiting for transfer results.
pub struct RemoteNode<'a, N: Network, D: ObjectDictionary> {
    node_id: NodeId,
    rx_cobid: u16,
    sdo: SdoClient<'a, N>,
    od: D,
    events: EventBus,
}

impl<'a, N: Network, D: ObjectDictionary> RemoteNode<'a, N, D> {
    pub fn new(node_id: NodeId, network: &'a N, od: D, config: SdoConfig) -> Self {
        RemoteNode {
            node_id,
            rx_cobid: config.rx_base + u16::from(node_id.raw()),
            sdo: SdoClient::new(node_id.raw(), network, config),
            od,
            events: EventBus::new(),
        }
    }

    pub fn node_id(&self) -> NodeId {
        self.node_id
    }

    /// Fetches `address` from the node into the local dictionary.
    pub fn read_object(&mut self, address: ObjectAddress, now_us: u64) -> Result<RequestId, SdoError> {
        let id = self.sdo.upload(address, &mut self.od, now_us);
        self.publish_completions();
        id
    }

    /// Sends the local value of `address` to the node.
    pub fn download(&mut self, address: ObjectAddress, now_us: u64) -> Result<RequestId, SdoError> {
        let id = self.sdo.download(address, &mut self.od, now_us);
        self.publish_completions();
        id
    }

    /// Stores `value` locally, then sends it to the node.
    pub fn write_object(&mut self, address: ObjectAddress, value: &[u8], now_us: u64) -> Result<RequestId, SdoError> {
        self.od.set_value(address, value)?;
        self.download(address, now_us)
    }

    pub fn cancel(&mut self, address: ObjectAddress, now_us: u64) {
        self.sdo.cancel(address, &mut self.od, now_us);
        self.publish_completions();
    }

    /// Cancels the requests for all of `addresses` at once.
    pub fn cancel_all(&mut self, addresses: &[ObjectAddress], now_us: u64) {
        self.sdo.cancel_all(addresses, &mut self.od, now_us);
        self.publish_completions();
    }

    /// Feeds a received CAN frame. Returns `true` if it was an SDO response for this node.
    pub fn on_message<F: embedded_can::Frame>(&mut self, frame: &F, now_us: u64) -> bool {
        if frame.is_remote_frame() {
            return false;
        }
        match frame.id() {
            Id::Standard(id) if id.as_raw() == self.rx_cobid => {
                // ignore messages with wrong length
                let Ok(data) = <&[u8; 8]>::try_from(frame.data()) else {
                    return false;
                };
                self.sdo.on_frame(data, &mut self.od, now_us);
                self.publish_completions();
                true
            }
            _ => false,
        }
    }

    pub fn tick(&mut self, now_us: u64) {
        self.sdo.tick(now_us, &mut self.od);
        self.publish_completions();
    }

    pub fn subscribe(&mut self, address: ObjectAddress) -> Receiver<ObjectEvent> {
        self.events.subscribe(address)
    }

    pub fn subscribe_many(&mut self, addresses: &[ObjectAddress]) -> Receiver<ObjectEvent> {
        self.events.subscribe_many(addresses)
    }

    pub fn subscribe_all(&mut self) -> Receiver<ObjectEvent> {
        self.events.subscribe_all()
    }

    pub fn od(&self) -> &D {
        &self.od
    }

    pub fn od_mut(&mut self) -> &mut D {
        &mut self.od
    }

    pub fn sdo_status(&self) -> TransferState {
        self.sdo.status()
    }

    pub fn next_deadline(&self) -> Option<u64> {
        self.sdo.next_deadline()
    }

    fn publish_completions(&mut self) {
        while let Some(Completion {
            id,
            address,
            direction,
            result,
            value,
        }) = self.sdo.poll_completion()
        {
            let kind = match (result, direction) {
                (Ok(()), Direction::Upload) => EventKind::Read,
                (Ok(()), Direction::Download) => EventKind::Written,
                (Err(err), _) => EventKind::Error(err),
            };
            debug!("node {}: {} {:?}", self.node_id, address, kind);
            self.events.publish(ObjectEvent {
                request: id,
                address,
                kind,
                value,
            });
        }
    }
}
