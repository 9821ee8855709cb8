use std::collections::VecDeque;

use log::{debug, trace, warn};

use crate::config::SdoConfig;
use crate::network::Network;
use crate::objectdictionary::{ObjectAddress, ObjectDictionary};

use super::codec::{
    segment_payload, BlockSegment, ClientRequest, ServerResponse, BLOCK_CRC, EXPEDITED_CAPACITY, MAX_BLOCK_SIZE,
    SEGMENT_CAPACITY,
};
use super::errors::{SDOAbortCode, SdoError};
use super::queue::RequestQueue;
use super::request::{Direction, RequestId, TransferMode, TransferRequest, TransferState};

/// Outcome of one finished request, successful or not.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Completion {
    pub id: RequestId,
    pub address: ObjectAddress,
    pub direction: Direction,
    pub result: Result<(), SdoError>,
    /// Bytes received by a successful upload
    pub value: Option<Vec<u8>>,
}

enum Flow {
    /// A response from the server is expected
    Awaiting,
    Done,
}

/// Sending half of the client, split off so handlers can borrow the active request.
struct Link<'a, N: Network> {
    network: &'a N,
    cob_id: u32,
}

impl<N: Network> Clone for Link<'_, N> {
    fn clone(&self) -> Self {
        *self
    }
}

impl<N: Network> Copy for Link<'_, N> {}

impl<N: Network> Link<'_, N> {
    fn send(&self, request: ClientRequest) -> Result<(), SdoError> {
        self.send_raw(request.encode())
    }

    fn send_raw(&self, frame: [u8; 8]) -> Result<(), SdoError> {
        trace!("sdo tx {:03X} {:02X?}", self.cob_id, frame);
        self.network.send_message(self.cob_id, frame)?;
        Ok(())
    }
}

/// SDO client for one remote node.
///
/// Requests are served one at a time in submission order. The client never blocks: frames
/// are fed through [`on_frame`](Self::on_frame), time through [`tick`](Self::tick), and
/// finished requests are collected with [`poll_completion`](Self::poll_completion).
pub struct SdoClient<'a, N: Network> {
    node_id: u8,
    tx_cobid: u32,
    network: &'a N,
    config: SdoConfig,
    queue: RequestQueue,
    deadline_us: Option<u64>,
    next_id: u32,
    completions: VecDeque<Completion>,
}

impl<'a, N: Network> SdoClient<'a, N> {
    pub fn new(node_id: u8, network: &'a N, config: SdoConfig) -> Self {
        SdoClient {
            node_id,
            tx_cobid: u32::from(config.tx_base) + u32::from(node_id),
            network,
            config,
            queue: RequestQueue::new(),
            deadline_us: None,
            next_id: 0,
            completions: VecDeque::new(),
        }
    }

    pub fn node_id(&self) -> u8 {
        self.node_id
    }

    pub fn config(&self) -> &SdoConfig {
        &self.config
    }

    /// Reads `address` from the server. The value is stored in `od` once the transfer succeeds.
    pub fn upload<D: ObjectDictionary>(
        &mut self,
        address: ObjectAddress,
        od: &mut D,
        now_us: u64,
    ) -> Result<RequestId, SdoError> {
        let data_type = od.data_type(address)?;
        let mode = TransferMode::select(Direction::Upload, data_type, 0);
        let id = self.allocate_id();
        self.enqueue(TransferRequest::upload(id, address, mode), od, now_us);
        Ok(id)
    }

    /// Writes the current value of `address` in `od` to the server.
    pub fn download<D: ObjectDictionary>(
        &mut self,
        address: ObjectAddress,
        od: &mut D,
        now_us: u64,
    ) -> Result<RequestId, SdoError> {
        let data_type = od.data_type(address)?;
        let source = od.value(address)?.to_vec();
        let mode = TransferMode::select(Direction::Download, data_type, source.len());
        let id = self.allocate_id();
        self.enqueue(TransferRequest::download(id, address, mode, source), od, now_us);
        Ok(id)
    }

    /// Feeds one frame received from the server.
    pub fn on_frame<D: ObjectDictionary>(&mut self, data: &[u8; 8], od: &mut D, now_us: u64) {
        let link = self.link();
        let config = self.config;
        let Some(request) = self.queue.active_mut() else {
            trace!("sdo node {}: ignoring frame while idle", self.node_id);
            return;
        };

        let flow = if request.state == TransferState::BlockUpload && !is_abort(data) {
            on_block_segment(link, &config, request, data)
        } else {
            match ServerResponse::decode(data) {
                Ok(ServerResponse::Abort { code, .. }) => Err(SdoError::ProtocolAbort { code, remote: true }),
                Ok(response) => on_response(link, &config, request, response),
                Err(err) => {
                    warn!("sdo node {}: {}", self.node_id, err);
                    Err(SdoError::local(SDOAbortCode::CommandSpecifierError))
                }
            }
        };
        self.advance(flow, od, now_us);
    }

    /// Checks the response deadline. Call this regularly.
    pub fn tick<D: ObjectDictionary>(&mut self, now_us: u64, od: &mut D) {
        match self.deadline_us {
            Some(deadline) if now_us >= deadline => self.on_timeout(od, now_us),
            _ => {}
        }
    }

    /// Gives up on the active request: sends an abort and completes it with [`SdoError::Timeout`].
    pub fn on_timeout<D: ObjectDictionary>(&mut self, od: &mut D, now_us: u64) {
        let Some(request) = self.queue.active() else {
            self.deadline_us = None;
            return;
        };
        warn!("sdo node {}: request {} on {} timed out", self.node_id, request.id, request.target);
        self.send_abort(request.target, SDOAbortCode::SDOProtocolTimedOut);
        self.finish(Err(SdoError::Timeout), od);
        self.dispatch(od, now_us);
    }

    /// Aborts the active request with `code`. Nothing is stored in `od`.
    pub fn abort<D: ObjectDictionary>(&mut self, code: SDOAbortCode, od: &mut D, now_us: u64) {
        if let Some(request) = self.queue.active() {
            self.send_abort(request.target, code);
            self.finish(Err(SdoError::local(code)), od);
        }
        self.dispatch(od, now_us);
    }

    /// Drops every request for `address`, aborting it if it is the one in flight.
    pub fn cancel<D: ObjectDictionary>(&mut self, address: ObjectAddress, od: &mut D, now_us: u64) {
        self.cancel_all(&[address], od, now_us);
    }

    /// Drops every request for any of `addresses`. Pending ones are removed before the active
    /// one is aborted, so none of them reaches the server.
    pub fn cancel_all<D: ObjectDictionary>(&mut self, addresses: &[ObjectAddress], od: &mut D, now_us: u64) {
        for &address in addresses {
            for request in self.queue.remove_pending(address) {
                debug!("sdo node {}: cancelled pending request {}", self.node_id, request.id);
                self.completions.push_back(Completion {
                    id: request.id,
                    address,
                    direction: request.direction,
                    result: Err(SdoError::local(SDOAbortCode::GeneralError)),
                    value: None,
                });
            }
        }
        if self
            .queue
            .active()
            .is_some_and(|request| addresses.contains(&request.target))
        {
            self.abort(SDOAbortCode::GeneralError, od, now_us);
        }
    }

    pub fn status(&self) -> TransferState {
        self.queue
            .active()
            .map(|request| request.state)
            .unwrap_or(TransferState::Idle)
    }

    pub fn next_deadline(&self) -> Option<u64> {
        self.deadline_us
    }

    /// Requests waiting behind the active one.
    pub fn pending(&self) -> usize {
        self.queue.len()
    }

    pub fn poll_completion(&mut self) -> Option<Completion> {
        self.completions.pop_front()
    }

    fn link(&self) -> Link<'a, N> {
        Link {
            network: self.network,
            cob_id: self.tx_cobid,
        }
    }

    fn allocate_id(&mut self) -> RequestId {
        self.next_id = self.next_id.wrapping_add(1);
        RequestId(self.next_id)
    }

    fn enqueue<D: ObjectDictionary>(&mut self, request: TransferRequest, od: &mut D, now_us: u64) {
        debug!(
            "sdo node {}: queued {:?} {:?} of {} as {}",
            self.node_id, request.mode, request.direction, request.target, request.id
        );
        self.queue.push(request);
        self.dispatch(od, now_us);
    }

    /// Starts queued requests until one is in flight or the queue is empty.
    fn dispatch<D: ObjectDictionary>(&mut self, od: &mut D, now_us: u64) {
        let link = self.link();
        let config = self.config;
        while let Some(request) = self.queue.activate_next() {
            match begin(link, &config, request) {
                Ok(()) => {
                    self.deadline_us = Some(now_us.saturating_add(config.timeout_us()));
                    return;
                }
                Err(err) => {
                    warn!("sdo node {}: could not start request {}: {}", self.node_id, request.id, err);
                    self.finish(Err(err), od);
                }
            }
        }
    }

    fn advance<D: ObjectDictionary>(&mut self, flow: Result<Flow, SdoError>, od: &mut D, now_us: u64) {
        match flow {
            Ok(Flow::Awaiting) => {
                self.deadline_us = Some(now_us.saturating_add(self.config.timeout_us()));
            }
            Ok(Flow::Done) => {
                self.finish(Ok(()), od);
                self.dispatch(od, now_us);
            }
            Err(err) => {
                if let (SdoError::ProtocolAbort { code, remote: false }, Some(request)) = (err, self.queue.active()) {
                    self.send_abort(request.target, code);
                }
                self.finish(Err(err), od);
                self.dispatch(od, now_us);
            }
        }
    }

    /// Releases the active slot and records its outcome. Upload results are committed here.
    fn finish<D: ObjectDictionary>(&mut self, result: Result<(), SdoError>, od: &mut D) {
        self.deadline_us = None;
        let Some(request) = self.queue.take_active() else {
            return;
        };

        let result = match result {
            Ok(()) if request.direction == Direction::Upload => od
                .set_value(request.target, &request.buffer)
                .map_err(SdoError::from),
            other => other,
        };
        match &result {
            Ok(()) => debug!("sdo node {}: request {} on {} done", self.node_id, request.id, request.target),
            Err(err) => warn!("sdo node {}: request {} on {} failed: {}", self.node_id, request.id, request.target, err),
        }

        let value = (result.is_ok() && request.direction == Direction::Upload).then_some(request.buffer);
        self.completions.push_back(Completion {
            id: request.id,
            address: request.target,
            direction: request.direction,
            result,
            value,
        });
    }

    fn send_abort(&self, address: ObjectAddress, code: SDOAbortCode) {
        if let Err(err) = self.link().send(ClientRequest::Abort { address, code }) {
            warn!("sdo node {}: abort for {} not sent: {}", self.node_id, address, err);
        }
    }
}

fn is_abort(data: &[u8; 8]) -> bool {
    data[0] == 0x80
}

/// Sends the first frame of a freshly activated request.
fn begin<N: Network>(link: Link<'_, N>, config: &SdoConfig, request: &mut TransferRequest) -> Result<(), SdoError> {
    let address = request.target;
    let frame = match (request.direction, request.mode) {
        (Direction::Upload, TransferMode::Block) => ClientRequest::InitiateBlockUpload {
            address,
            crc_supported: config.crc_support,
            block_size: config.block_size.clamp(1, MAX_BLOCK_SIZE),
            protocol_switch: 0,
        },
        (Direction::Upload, _) => ClientRequest::InitiateUpload { address },
        (Direction::Download, TransferMode::Expedited) => ClientRequest::expedited_download(address, &request.buffer),
        (Direction::Download, TransferMode::Segmented) => {
            ClientRequest::segmented_download(address, request.buffer.len() as u32)
        }
        (Direction::Download, TransferMode::Block) => ClientRequest::InitiateBlockDownload {
            address,
            crc_supported: config.crc_support,
            size: Some(request.buffer.len() as u32),
        },
    };
    request.state = match request.direction {
        Direction::Upload => TransferState::UploadInitiateSent,
        Direction::Download => TransferState::DownloadInitiateSent,
    };
    link.send(frame)
}

fn on_response<N: Network>(
    link: Link<'_, N>,
    config: &SdoConfig,
    request: &mut TransferRequest,
    response: ServerResponse,
) -> Result<Flow, SdoError> {
    use TransferState::*;

    if let Some(address) = response.address() {
        if address != request.target {
            warn!("sdo: response for {} while waiting for {}", address, request.target);
            return Err(SdoError::local(SDOAbortCode::GeneralError));
        }
    }

    match (request.state, response) {
        (
            UploadInitiateSent,
            ServerResponse::InitiateUpload {
                expedited,
                size_indicated,
                unused,
                data,
                ..
            },
        ) => {
            // servers without block support may answer a block request this way
            request.mode = if expedited {
                TransferMode::Expedited
            } else {
                TransferMode::Segmented
            };
            if expedited {
                let used = if size_indicated {
                    EXPEDITED_CAPACITY - usize::from(unused)
                } else {
                    EXPEDITED_CAPACITY
                };
                request.buffer.extend_from_slice(&data[..used]);
                return Ok(Flow::Done);
            }
            // an indicated size of 0 means the length is not known in advance
            request.size = Some(u32::from_le_bytes(data) as usize).filter(|&size| size_indicated && size != 0);
            request.toggle = false;
            request.state = UploadSegment;
            link.send(ClientRequest::UploadSegment { toggle: false })?;
            Ok(Flow::Awaiting)
        }
        (UploadInitiateSent, ServerResponse::InitiateBlockUpload { crc_supported, size, .. })
            if request.mode == TransferMode::Block =>
        {
            request.crc = config.crc_support && crc_supported;
            request.size = size.filter(|&size| size != 0).map(|size| size as usize);
            request.block_size = config.block_size.clamp(1, MAX_BLOCK_SIZE);
            request.sequence_number = 0;
            request.state = BlockUpload;
            link.send(ClientRequest::StartBlockUpload)?;
            Ok(Flow::Awaiting)
        }
        (
            UploadSegment,
            ServerResponse::UploadSegment {
                toggle,
                unused,
                last,
                data,
            },
        ) => {
            if toggle != request.toggle {
                return Err(SdoError::local(SDOAbortCode::ToggleBitNotAlternated));
            }
            request.buffer.extend_from_slice(&segment_payload(&data, unused));
            if last {
                check_size(request)?;
                return Ok(Flow::Done);
            }
            request.flip_toggle();
            link.send(ClientRequest::UploadSegment { toggle: request.toggle })?;
            Ok(Flow::Awaiting)
        }
        (BlockUploadEnd, ServerResponse::EndBlockUpload { unused, crc }) => {
            let length = request.buffer.len().saturating_sub(usize::from(unused));
            request.buffer.truncate(length);
            check_size(request)?;
            if request.crc && BLOCK_CRC.checksum(&request.buffer) != crc {
                return Err(SdoError::local(SDOAbortCode::CRCError));
            }
            link.send(ClientRequest::EndBlockUpload)?;
            Ok(Flow::Done)
        }
        (DownloadInitiateSent, ServerResponse::InitiateDownload { .. }) if request.mode != TransferMode::Block => {
            if request.mode == TransferMode::Expedited {
                return Ok(Flow::Done);
            }
            request.toggle = false;
            request.state = DownloadSegment;
            send_segment(link, request)?;
            Ok(Flow::Awaiting)
        }
        (DownloadSegment, ServerResponse::DownloadSegment { toggle }) => {
            if toggle != request.toggle {
                return Err(SdoError::local(SDOAbortCode::ToggleBitNotAlternated));
            }
            if request.remaining == 0 {
                return Ok(Flow::Done);
            }
            request.flip_toggle();
            send_segment(link, request)?;
            Ok(Flow::Awaiting)
        }
        (DownloadInitiateSent, ServerResponse::InitiateBlockDownload { crc_supported, block_size, .. })
            if request.mode == TransferMode::Block =>
        {
            check_block_size(block_size)?;
            request.crc = config.crc_support && crc_supported;
            request.block_size = block_size;
            request.block_start = 0;
            request.state = BlockDownload;
            send_block(link, request)?;
            Ok(Flow::Awaiting)
        }
        (BlockDownload, ServerResponse::BlockDownloadAck { ackseq, block_size }) => {
            on_block_ack(link, request, ackseq, block_size)
        }
        (BlockDownloadEnd, ServerResponse::EndBlockDownload) => Ok(Flow::Done),
        (state, response) => {
            warn!("sdo: unexpected {:?} in state {:?}", response.command(), state);
            Err(SdoError::local(SDOAbortCode::CommandSpecifierError))
        }
    }
}

fn check_size(request: &TransferRequest) -> Result<(), SdoError> {
    match request.size {
        Some(size) if size != request.buffer.len() => {
            warn!(
                "sdo: {} announced {} bytes, received {}",
                request.target,
                size,
                request.buffer.len()
            );
            Err(SdoError::local(SDOAbortCode::WrongLength))
        }
        _ => Ok(()),
    }
}

fn check_block_size(block_size: u8) -> Result<(), SdoError> {
    if (1..=MAX_BLOCK_SIZE).contains(&block_size) {
        Ok(())
    } else {
        Err(SdoError::local(SDOAbortCode::InvalidBlockSize))
    }
}

/// Sends the next download segment with the current toggle.
fn send_segment<N: Network>(link: Link<'_, N>, request: &mut TransferRequest) -> Result<(), SdoError> {
    let count = request.remaining.min(SEGMENT_CAPACITY);
    let last = count == request.remaining;
    let frame = ClientRequest::download_segment(request.toggle, last, &request.unsent()[..count]);
    link.send(frame)?;
    request.consume(count);
    Ok(())
}

/// Sends one block of up to `block_size` segments starting at `block_start`.
fn send_block<N: Network>(link: Link<'_, N>, request: &mut TransferRequest) -> Result<(), SdoError> {
    request.rewind(request.block_start);
    request.sequence_number = 0;
    while request.sequence_number < request.block_size {
        let count = request.remaining.min(SEGMENT_CAPACITY);
        let last = count == request.remaining;
        request.sequence_number += 1;
        let segment = BlockSegment::new(request.sequence_number, last, &request.unsent()[..count]);
        link.send_raw(segment.encode())?;
        request.consume(count);
        if last {
            break;
        }
    }
    trace!(
        "sdo: block of {} segments sent, {} bytes left",
        request.sequence_number,
        request.remaining
    );
    Ok(())
}

fn on_block_ack<N: Network>(
    link: Link<'_, N>,
    request: &mut TransferRequest,
    ackseq: u8,
    block_size: u8,
) -> Result<Flow, SdoError> {
    if ackseq > request.sequence_number {
        return Err(SdoError::local(SDOAbortCode::InvalidSequenceNumber));
    }

    if ackseq == 0 {
        debug!("sdo: nothing acknowledged, repeating block");
        send_block(link, request)?;
        return Ok(Flow::Awaiting);
    }

    let acknowledged = (request.block_start + usize::from(ackseq) * SEGMENT_CAPACITY).min(request.buffer.len());
    if ackseq == request.sequence_number && acknowledged == request.buffer.len() {
        let unused = match request.buffer.len() % SEGMENT_CAPACITY {
            0 if request.buffer.is_empty() => SEGMENT_CAPACITY,
            0 => 0,
            tail => SEGMENT_CAPACITY - tail,
        };
        let crc = if request.crc {
            BLOCK_CRC.checksum(&request.buffer)
        } else {
            0
        };
        request.state = TransferState::BlockDownloadEnd;
        link.send(ClientRequest::EndBlockDownload {
            unused: unused as u8,
            crc,
        })?;
        return Ok(Flow::Awaiting);
    }

    if ackseq < request.sequence_number {
        debug!("sdo: block acknowledged up to {} of {}", ackseq, request.sequence_number);
    }
    check_block_size(block_size)?;
    request.block_start = acknowledged;
    request.block_size = block_size;
    send_block(link, request)?;
    Ok(Flow::Awaiting)
}

/// Handles a raw segment while a block upload is running.
fn on_block_segment<N: Network>(
    link: Link<'_, N>,
    config: &SdoConfig,
    request: &mut TransferRequest,
    data: &[u8; 8],
) -> Result<Flow, SdoError> {
    let segment = BlockSegment::decode(data);
    let in_order = segment.seqno == request.sequence_number.wrapping_add(1);
    if in_order {
        request.buffer.extend_from_slice(&segment.data);
        request.sequence_number = segment.seqno;
    } else {
        trace!("sdo: dropping block segment {}, expected {}", segment.seqno, request.sequence_number + 1);
    }

    if segment.seqno != request.block_size && !segment.last {
        return Ok(Flow::Awaiting);
    }

    let block_size = config.block_size.clamp(1, MAX_BLOCK_SIZE);
    link.send(ClientRequest::BlockUploadAck {
        ackseq: request.sequence_number,
        block_size,
    })?;
    if in_order && segment.last {
        request.state = TransferState::BlockUploadEnd;
    }
    request.block_size = block_size;
    request.sequence_number = 0;
    Ok(Flow::Awaiting)
}
