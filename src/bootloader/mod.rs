//! Firmware update driver for devices running a CANopen bootloader.
//!
//! The update is a sequence of object reads and writes on the remote node. [`Bootloader`]
//! issues them through a [`RemoteNode`] and advances on the resulting [`ObjectEvent`]s,
//! which are drained by [`Bootloader::process`].

use std::path::Path;
use std::sync::mpsc::Receiver;

use log::{debug, info, warn};
use thiserror::Error;

pub mod image;
pub use image::{BinaryImageParser, FirmwareImage, ImageParser};

use crate::config::BootloaderConfig;
use crate::events::{EventKind, ObjectEvent, Publisher};
use crate::network::Network;
use crate::node::RemoteNode;
use crate::objectdictionary::{ObjectAddress, ObjectDictionary};
use crate::sdo::SdoError;

/// Values of the program control object.
pub mod program_control {
    pub const STOP: u8 = 0x00;
    pub const START: u8 = 0x01;
    pub const RESET: u8 = 0x02;
    pub const CLEAR: u8 = 0x03;
    pub const UPDATE_START: u8 = 0x80;
    pub const UPDATE_END: u8 = 0x81;
    pub const CLEAR_IN_PROGRESS: u8 = 0x82;
}

/// Bit of the bootloader status object set when the written program was accepted.
pub const STATUS_OK: u8 = 0x01;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BootloaderState {
    Free,
    CheckMode,
    ClearProgram,
    UpdateProgram,
    UploadedProgramFinished,
    Check,
    Ok,
    NotOk,
}

/// What the device reported through program control.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProgramStatus {
    None,
    Stopped,
    Started,
    NoProgram,
    ClearInProgress,
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum BootloaderError {
    #[error("update already in progress")]
    AlreadyInProgress,
    #[error("no firmware loaded")]
    NoFirmwareLoaded,
    #[error("cannot open firmware file: {0}")]
    OpenFile(String),
    #[error("cannot parse firmware file: {0}")]
    ParseFailure(String),
    #[error("device rejected the program, status 0x{0:02X}")]
    ChecksumRejected(u8),
    #[error("device not responding")]
    DeviceNotResponding,
    #[error(transparent)]
    Sdo(#[from] SdoError),
}

impl BootloaderError {
    /// Numeric error code, the SDO abort code for transfer failures.
    pub fn code(&self) -> u32 {
        match self {
            BootloaderError::Sdo(err) => err.abort_code(),
            BootloaderError::ChecksumRejected(status) => u32::from(*status),
            _ => 0,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BootloaderEvent {
    StateChanged(BootloaderState),
    Finished(Result<(), BootloaderError>),
}

/// Drives one firmware update at a time on one node.
pub struct Bootloader {
    config: BootloaderConfig,
    state: BootloaderState,
    image: Option<FirmwareImage>,
    program_status: ProgramStatus,
    last_error: Option<BootloaderError>,
    pending_poll: Option<(u64, ObjectAddress)>,
    polls: u32,
    object_events: Receiver<ObjectEvent>,
    publisher: Publisher<BootloaderEvent>,
}

impl Bootloader {
    pub fn new<N: Network, D: ObjectDictionary>(node: &mut RemoteNode<'_, N, D>, config: BootloaderConfig) -> Self {
        let objects = config.objects;
        let object_events = node.subscribe_many(&[
            objects.program_data,
            objects.program_control,
            objects.key,
            objects.checksum,
            objects.status,
        ]);
        Bootloader {
            config,
            state: BootloaderState::Free,
            image: None,
            program_status: ProgramStatus::None,
            last_error: None,
            pending_poll: None,
            polls: 0,
            object_events,
            publisher: Publisher::new(),
        }
    }

    /// Loads the firmware file at `path`.
    pub fn open_image<P: ImageParser>(&mut self, parser: &P, path: impl AsRef<Path>) -> Result<(), BootloaderError> {
        if self.state != BootloaderState::Free {
            return Err(BootloaderError::AlreadyInProgress);
        }
        let path = path.as_ref();
        let bytes = std::fs::read(path).map_err(|err| BootloaderError::OpenFile(format!("{}: {}", path.display(), err)))?;
        let image = parser
            .parse(&bytes)
            .map_err(|err| BootloaderError::ParseFailure(err.to_string()))?;
        info!(
            "firmware {} loaded: {} bytes, device type 0x{:08X}",
            path.display(),
            image.program.len(),
            image.device_type
        );
        self.image = Some(image);
        Ok(())
    }

    /// Uses an already parsed image.
    pub fn set_image(&mut self, image: FirmwareImage) -> Result<(), BootloaderError> {
        if self.state != BootloaderState::Free {
            return Err(BootloaderError::AlreadyInProgress);
        }
        self.image = Some(image);
        Ok(())
    }

    pub fn start_update<N: Network, D: ObjectDictionary>(
        &mut self,
        node: &mut RemoteNode<'_, N, D>,
        now_us: u64,
    ) -> Result<(), BootloaderError> {
        if self.image.is_none() {
            return Err(BootloaderError::NoFirmwareLoaded);
        }
        if self.state != BootloaderState::Free {
            return Err(BootloaderError::AlreadyInProgress);
        }

        for (address, data_type) in self.config.objects.definitions() {
            node.od_mut().define(address, data_type);
        }
        // results of an earlier update are stale
        while self.object_events.try_recv().is_ok() {}

        info!("node {}: starting firmware update", node.node_id());
        self.last_error = None;
        self.program_status = ProgramStatus::None;
        self.set_state(BootloaderState::CheckMode);
        if let Err(err) = node.read_object(self.config.objects.program_control, now_us) {
            self.fail(node, err.into(), now_us);
        }
        Ok(())
    }

    /// Handles finished transfers and due polls. Call this after feeding frames or ticks to
    /// the node.
    pub fn process<N: Network, D: ObjectDictionary>(&mut self, node: &mut RemoteNode<'_, N, D>, now_us: u64) {
        while let Ok(event) = self.object_events.try_recv() {
            self.on_object_event(node, event, now_us);
        }

        match self.pending_poll {
            Some((due, address)) if now_us >= due => {
                self.pending_poll = None;
                if self.polls >= self.config.max_status_polls {
                    self.fail(node, BootloaderError::DeviceNotResponding, now_us);
                    return;
                }
                self.polls += 1;
                if let Err(err) = node.read_object(address, now_us) {
                    self.fail(node, err.into(), now_us);
                }
            }
            _ => {}
        }
    }

    pub fn subscribe(&mut self) -> Receiver<BootloaderEvent> {
        self.publisher.subscribe()
    }

    pub fn state(&self) -> BootloaderState {
        self.state
    }

    pub fn program_status(&self) -> ProgramStatus {
        self.program_status
    }

    pub fn last_error(&self) -> Option<&BootloaderError> {
        self.last_error.as_ref()
    }

    pub fn error_code(&self) -> Option<u32> {
        self.last_error.as_ref().map(BootloaderError::code)
    }

    pub fn image(&self) -> Option<&FirmwareImage> {
        self.image.as_ref()
    }

    /// Time of the next scheduled poll.
    pub fn next_poll(&self) -> Option<u64> {
        self.pending_poll.map(|(due, _)| due)
    }

    fn on_object_event<N: Network, D: ObjectDictionary>(
        &mut self,
        node: &mut RemoteNode<'_, N, D>,
        event: ObjectEvent,
        now_us: u64,
    ) {
        if self.state == BootloaderState::Free {
            return;
        }
        let objects = self.config.objects;
        match event.kind {
            EventKind::Error(err) => {
                warn!("node {}: {} failed during update: {}", node.node_id(), event.address, err);
                self.fail(node, err.into(), now_us);
            }
            EventKind::Read if event.address == objects.program_control => {
                self.on_program_control(node, first_byte(&event), now_us);
            }
            EventKind::Read if event.address == objects.status => {
                self.on_status(node, first_byte(&event), now_us);
            }
            EventKind::Written if event.address == objects.program_data => {
                if self.state == BootloaderState::UpdateProgram {
                    self.on_program_written(node, now_us);
                }
            }
            _ => {}
        }
    }

    fn on_program_control<N: Network, D: ObjectDictionary>(
        &mut self,
        node: &mut RemoteNode<'_, N, D>,
        value: u8,
        now_us: u64,
    ) {
        use program_control::*;

        debug!("program control 0x{:02X} in {:?}", value, self.state);
        let objects = self.config.objects;
        match (self.state, value) {
            (BootloaderState::CheckMode, STOP | RESET) => {
                self.program_status = ProgramStatus::Stopped;
                let sent = self
                    .send_key(node, now_us)
                    .and_then(|_| node.write_object(objects.program_control, &[CLEAR], now_us));
                if self.check(node, sent, now_us) {
                    self.set_state(BootloaderState::ClearProgram);
                    self.schedule_poll(objects.program_control, now_us);
                }
            }
            (BootloaderState::CheckMode | BootloaderState::ClearProgram, CLEAR) => {
                self.program_status = ProgramStatus::NoProgram;
                self.set_state(BootloaderState::UpdateProgram);
                self.update_program(node, now_us);
            }
            (BootloaderState::CheckMode | BootloaderState::ClearProgram, CLEAR_IN_PROGRESS) => {
                self.program_status = ProgramStatus::ClearInProgress;
                self.schedule_poll(objects.program_control, now_us);
            }
            (BootloaderState::CheckMode, _) => {
                self.program_status = ProgramStatus::Started;
                let sent = self
                    .send_key(node, now_us)
                    .and_then(|_| node.write_object(objects.program_control, &[STOP], now_us));
                if self.check(node, sent, now_us) {
                    self.schedule_poll(objects.program_control, now_us);
                }
            }
            (BootloaderState::ClearProgram, _) => self.schedule_poll(objects.program_control, now_us),
            _ => {}
        }
    }

    fn update_program<N: Network, D: ObjectDictionary>(&mut self, node: &mut RemoteNode<'_, N, D>, now_us: u64) {
        let Some(image) = self.image.as_ref() else {
            self.fail(node, BootloaderError::NoFirmwareLoaded, now_us);
            return;
        };
        let objects = self.config.objects;
        info!("node {}: writing {} bytes of program", node.node_id(), image.program.len());
        let sent = node
            .write_object(objects.program_control, &[program_control::UPDATE_START], now_us)
            .and_then(|_| node.write_object(objects.program_data, &image.program, now_us));
        self.check(node, sent, now_us);
    }

    fn on_program_written<N: Network, D: ObjectDictionary>(&mut self, node: &mut RemoteNode<'_, N, D>, now_us: u64) {
        self.set_state(BootloaderState::UploadedProgramFinished);
        let objects = self.config.objects;
        let checksum = self.image.as_ref().map(FirmwareImage::checksum).unwrap_or(0);
        let sent = node
            .write_object(objects.checksum, &checksum.to_le_bytes(), now_us)
            .and_then(|_| node.write_object(objects.program_control, &[program_control::UPDATE_END], now_us));
        if self.check(node, sent, now_us) {
            self.set_state(BootloaderState::Check);
            self.schedule_poll(objects.status, now_us);
        }
    }

    fn on_status<N: Network, D: ObjectDictionary>(&mut self, node: &mut RemoteNode<'_, N, D>, status: u8, now_us: u64) {
        if self.state != BootloaderState::Check {
            return;
        }
        if status & STATUS_OK != STATUS_OK {
            self.fail(node, BootloaderError::ChecksumRejected(status), now_us);
            return;
        }

        self.set_state(BootloaderState::Ok);
        let reset = node.write_object(self.config.objects.program_control, &[program_control::RESET], now_us);
        if let Err(err) = reset {
            // the program is already accepted at this point
            warn!("node {}: reset after update not sent: {}", node.node_id(), err);
        }
        info!("node {}: firmware update successful", node.node_id());
        self.set_state(BootloaderState::Free);
        self.publisher.publish(BootloaderEvent::Finished(Ok(())));
    }

    fn send_key<N: Network, D: ObjectDictionary>(
        &self,
        node: &mut RemoteNode<'_, N, D>,
        now_us: u64,
    ) -> Result<(), SdoError> {
        let key = self.image.as_ref().map(|image| image.device_type).unwrap_or(0);
        node.write_object(self.config.objects.key, &key.to_le_bytes(), now_us)
            .map(|_| ())
    }

    /// Fails the update if a request could not be queued. Returns `true` if it was.
    fn check<N: Network, D: ObjectDictionary, T>(
        &mut self,
        node: &mut RemoteNode<'_, N, D>,
        result: Result<T, SdoError>,
        now_us: u64,
    ) -> bool {
        match result {
            Ok(_) => true,
            Err(err) => {
                self.fail(node, err.into(), now_us);
                false
            }
        }
    }

    fn fail<N: Network, D: ObjectDictionary>(
        &mut self,
        node: &mut RemoteNode<'_, N, D>,
        error: BootloaderError,
        now_us: u64,
    ) {
        warn!("node {}: firmware update failed: {}", node.node_id(), error);
        self.set_state(BootloaderState::NotOk);
        self.pending_poll = None;
        let addresses = self.config.objects.definitions().map(|(address, _)| address);
        node.cancel_all(&addresses, now_us);
        self.last_error = Some(error.clone());
        self.set_state(BootloaderState::Free);
        self.publisher.publish(BootloaderEvent::Finished(Err(error)));
    }

    fn schedule_poll(&mut self, address: ObjectAddress, now_us: u64) {
        self.pending_poll = Some((now_us.saturating_add(self.config.poll_delay_us()), address));
    }

    fn set_state(&mut self, state: BootloaderState) {
        if self.state == state {
            return;
        }
        debug!("bootloader {:?} -> {:?}", self.state, state);
        self.polls = 0;
        self.state = state;
        if state == BootloaderState::Free {
            self.program_status = ProgramStatus::None;
        }
        self.publisher.publish(BootloaderEvent::StateChanged(state));
    }
}

/// First byte of the value carried by a read event.
fn first_byte(event: &ObjectEvent) -> u8 {
    event
        .value
        .as_deref()
        .and_then(|value| value.first().copied())
        .unwrap_or(0)
}
