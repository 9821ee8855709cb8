use std::collections::VecDeque;

use crate::objectdictionary::ObjectAddress;

use super::request::TransferRequest;

/// Pending SDO requests for one node plus the single active slot.
#[derive(Debug, Default)]
pub struct RequestQueue {
    pending: VecDeque<TransferRequest>,
    active: Option<TransferRequest>,
}

impl RequestQueue {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, request: TransferRequest) {
        self.pending.push_back(request);
    }

    /// Moves the oldest pending request into the active slot if the slot is free.
    ///
    /// Returns the newly activated request.
    pub fn activate_next(&mut self) -> Option<&mut TransferRequest> {
        if self.active.is_some() {
            return None;
        }
        self.active = self.pending.pop_front();
        self.active.as_mut()
    }

    pub fn active(&self) -> Option<&TransferRequest> {
        self.active.as_ref()
    }

    pub fn active_mut(&mut self) -> Option<&mut TransferRequest> {
        self.active.as_mut()
    }

    pub fn take_active(&mut self) -> Option<TransferRequest> {
        self.active.take()
    }

    /// Removes every pending request that targets `address`.
    pub fn remove_pending(&mut self, address: ObjectAddress) -> Vec<TransferRequest> {
        let (removed, kept): (VecDeque<_>, VecDeque<_>) = self
            .pending
            .drain(..)
            .partition(|request| request.target == address);
        self.pending = kept;
        removed.into()
    }

    /// Number of pending requests, not counting the active one.
    pub fn len(&self) -> usize {
        self.pending.len()
    }

    pub fn is_empty(&self) -> bool {
        self.pending.is_empty()
    }

    pub fn is_idle(&self) -> bool {
        self.active.is_none()
    }
}
