//! Completion notifications.
//!
//! Subscribers get a [`Receiver`]; a subscriber that drops its receiver is forgotten on the
//! next publish.

use std::collections::BTreeMap;
use std::sync::mpsc::{channel, Receiver, Sender};

use crate::objectdictionary::ObjectAddress;
use crate::sdo::{RequestId, SdoError};

/// Fan-out of cloned values to any number of channels.
pub struct Publisher<T: Clone> {
    senders: Vec<Sender<T>>,
}

impl<T: Clone> Default for Publisher<T> {
    fn default() -> Self {
        Publisher { senders: Vec::new() }
    }
}

impl<T: Clone> Publisher<T> {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn subscribe(&mut self) -> Receiver<T> {
        let (sender, receiver) = channel();
        self.senders.push(sender);
        receiver
    }

    pub fn publish(&mut self, value: T) {
        self.senders.retain(|sender| sender.send(value.clone()).is_ok());
    }

    pub fn subscribers(&self) -> usize {
        self.senders.len()
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EventKind {
    Read,
    Written,
    Error(SdoError),
}

/// Result of one read or write of a remote object.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ObjectEvent {
    pub request: RequestId,
    pub address: ObjectAddress,
    pub kind: EventKind,
    /// Value read from the node, for [`EventKind::Read`]
    pub value: Option<Vec<u8>>,
}

/// Object events routed by address.
#[derive(Default)]
pub struct EventBus {
    by_address: BTreeMap<ObjectAddress, Publisher<ObjectEvent>>,
    all: Publisher<ObjectEvent>,
}

impl EventBus {
    pub fn new() -> Self {
        Self::default()
    }

    /// Events for one object.
    pub fn subscribe(&mut self, address: ObjectAddress) -> Receiver<ObjectEvent> {
        self.by_address.entry(address).or_default().subscribe()
    }

    /// Events for several objects on a single receiver.
    pub fn subscribe_many(&mut self, addresses: &[ObjectAddress]) -> Receiver<ObjectEvent> {
        let (sender, receiver) = channel();
        for address in addresses {
            self.by_address
                .entry(*address)
                .or_default()
                .senders
                .push(sender.clone());
        }
        receiver
    }

    pub fn subscribe_all(&mut self) -> Receiver<ObjectEvent> {
        self.all.subscribe()
    }

    pub fn publish(&mut self, event: ObjectEvent) {
        if let Some(publisher) = self.by_address.get_mut(&event.address) {
            publisher.publish(event.clone());
            if publisher.subscribers() == 0 {
                self.by_address.remove(&event.address);
            }
        }
        self.all.publish(event);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn event(index: u16) -> ObjectEvent {
        ObjectEvent {
            request: RequestId(1),
            address: ObjectAddress::new(index, 0),
            kind: EventKind::Read,
            value: Some(vec![0]),
        }
    }

    #[test]
    fn routes_by_address() {
        let mut bus = EventBus::new();
        let one = bus.subscribe(ObjectAddress::new(0x1000, 0));
        let many = bus.subscribe_many(&[ObjectAddress::new(0x1000, 0), ObjectAddress::new(0x1001, 0)]);
        let all = bus.subscribe_all();

        bus.publish(event(0x1000));
        bus.publish(event(0x1001));
        bus.publish(event(0x1002));

        assert_eq!(one.try_iter().count(), 1);
        assert_eq!(many.try_iter().count(), 2);
        assert_eq!(all.try_iter().count(), 3);
    }

    #[test]
    fn dropped_receivers_are_forgotten() {
        let mut publisher = Publisher::<u8>::new();
        let kept = publisher.subscribe();
        drop(publisher.subscribe());

        publisher.publish(7);
        assert_eq!(publisher.subscribers(), 1);
        assert_eq!(kept.try_recv(), Ok(7));
    }
}
