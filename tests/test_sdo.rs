mod common;

use canopen_master::events::{EventKind, ObjectEvent};
use canopen_master::frame::CanOpenFrame;
use canopen_master::objectdictionary::{DataType, NodeOd, ObjectAddress, ObjectDictionary};
use canopen_master::sdo::codec::{ServerResponse, BLOCK_CRC};
use canopen_master::sdo::{SDOAbortCode, SdoError, TransferState};

use common::{node, respond, MockNetwork, TX_COBID};

const DEVICE_TYPE: ObjectAddress = ObjectAddress::new(0x1000, 0);
const ERROR_REGISTER: ObjectAddress = ObjectAddress::new(0x1001, 0);
const DEVICE_NAME: ObjectAddress = ObjectAddress::new(0x1008, 0);
const PROGRAM_DATA: ObjectAddress = ObjectAddress::new(0x1F50, 1);
const SETPOINT: ObjectAddress = ObjectAddress::new(0x2000, 1);
const BLOB: ObjectAddress = ObjectAddress::new(0x2001, 0);

fn od() -> NodeOd {
    let mut od = NodeOd::new();
    od.define(DEVICE_TYPE, DataType::Unsigned32);
    od.define(ERROR_REGISTER, DataType::Unsigned8);
    od.define(DEVICE_NAME, DataType::VisibleString);
    od.define(PROGRAM_DATA, DataType::Domain);
    od.define(SETPOINT, DataType::Unsigned8);
    od.define(BLOB, DataType::OctetString);
    od
}

fn kinds(events: &std::sync::mpsc::Receiver<ObjectEvent>) -> Vec<(ObjectAddress, EventKind)> {
    events.try_iter().map(|event| (event.address, event.kind)).collect()
}

#[test]
fn test_expedited_upload() {
    for unused in 0..4u8 {
        let network = MockNetwork::default();
        let mut node = node(&network, od());
        let events = node.subscribe(DEVICE_NAME);

        node.read_object(DEVICE_NAME, 0).unwrap();
        assert_eq!(network.sent_messages.borrow()[0], (TX_COBID, [0x40, 0x08, 0x10, 0x00, 0, 0, 0, 0]));

        respond(&mut node, [0x43 | unused << 2, 0x08, 0x10, 0x00, 1, 2, 3, 4], 1_000);

        let used = 4 - unused as usize;
        assert_eq!(node.od().value(DEVICE_NAME).unwrap(), &[1, 2, 3, 4][..used]);
        assert_eq!(network.count(), 1, "no follow-up frame");
        assert_eq!(kinds(&events), [(DEVICE_NAME, EventKind::Read)]);
        assert_eq!(node.sdo_status(), TransferState::Idle);
        assert_eq!(node.next_deadline(), None);
    }
}

#[test]
fn test_expedited_upload_without_size() {
    let network = MockNetwork::default();
    let mut node = node(&network, od());

    node.read_object(DEVICE_TYPE, 0).unwrap();
    respond(&mut node, [0x42, 0x00, 0x10, 0x00, 0x92, 0x01, 0x02, 0x00], 0);

    assert_eq!(node.od().value(DEVICE_TYPE).unwrap(), [0x92, 0x01, 0x02, 0x00]);
}

#[test]
fn test_segmented_upload() {
    let network = MockNetwork::default();
    let mut node = node(&network, od());
    let events = node.subscribe_all();

    node.read_object(DEVICE_NAME, 0).unwrap();
    respond(&mut node, [0x41, 0x08, 0x10, 0x00, 10, 0, 0, 0], 0);
    assert_eq!(network.last(), Some([0x60, 0, 0, 0, 0, 0, 0, 0]));
    assert_eq!(node.sdo_status(), TransferState::UploadSegment);

    respond(&mut node, [0x00, b'A', b'B', b'C', b'D', b'E', b'F', b'G'], 0);
    assert_eq!(network.last(), Some([0x70, 0, 0, 0, 0, 0, 0, 0]));

    // toggle 1, 4 bytes unused, last
    respond(&mut node, [0x19, b'H', b'I', b'J', 0, 0, 0, 0], 0);

    assert_eq!(node.od().value(DEVICE_NAME).unwrap(), b"ABCDEFGHIJ");
    assert_eq!(network.count(), 3);
    assert_eq!(kinds(&events), [(DEVICE_NAME, EventKind::Read)]);
}

#[test]
fn test_segmented_upload_unknown_length() {
    let network = MockNetwork::default();
    let mut node = node(&network, od());
    let events = node.subscribe_all();

    node.read_object(DEVICE_NAME, 0).unwrap();
    // size indicated as 0
    let initiate = ServerResponse::segmented_upload(DEVICE_NAME, Some(0)).encode();
    assert_eq!(initiate, [0x41, 0x08, 0x10, 0x00, 0, 0, 0, 0]);
    respond(&mut node, initiate, 0);
    respond(&mut node, ServerResponse::upload_segment(false, false, b"ABCDEFG").encode(), 0);
    respond(&mut node, ServerResponse::upload_segment(true, true, b"HI").encode(), 0);

    assert_eq!(node.od().value(DEVICE_NAME).unwrap(), b"ABCDEFGHI");
    assert_eq!(kinds(&events), [(DEVICE_NAME, EventKind::Read)]);

    node.read_object(ERROR_REGISTER, 0).unwrap();
    respond(&mut node, ServerResponse::expedited_upload(ERROR_REGISTER, &[0x11]).encode(), 0);
    let event = events.try_recv().unwrap();
    assert_eq!(event.value.as_deref(), Some(&[0x11][..]));
    assert_eq!(node.od().value(ERROR_REGISTER).unwrap(), [0x11]);
    assert_eq!(network.count(), 4, "no abort sent");
}

#[test]
fn test_segmented_upload_stale_toggle() {
    let network = MockNetwork::default();
    let mut node = node(&network, od());
    let events = node.subscribe_all();

    node.read_object(DEVICE_NAME, 0).unwrap();
    respond(&mut node, [0x41, 0x08, 0x10, 0x00, 10, 0, 0, 0], 0);
    respond(&mut node, [0x00, b'A', b'B', b'C', b'D', b'E', b'F', b'G'], 0);
    // server repeats toggle 0
    respond(&mut node, [0x00, b'A', b'B', b'C', b'D', b'E', b'F', b'G'], 0);

    assert_eq!(network.last(), Some([0x80, 0x08, 0x10, 0x00, 0x00, 0x00, 0x03, 0x05]));
    assert_eq!(
        kinds(&events),
        [(
            DEVICE_NAME,
            EventKind::Error(SdoError::ProtocolAbort {
                code: SDOAbortCode::ToggleBitNotAlternated,
                remote: false
            })
        )]
    );

    // late segment after the abort changes nothing
    let sent = network.count();
    respond(&mut node, [0x19, b'H', b'I', b'J', 0, 0, 0, 0], 0);
    assert_eq!(node.od().value(DEVICE_NAME).unwrap(), b"");
    assert_eq!(network.count(), sent);
    assert!(events.try_recv().is_err());
}

#[test]
fn test_segmented_upload_size_mismatch() {
    let network = MockNetwork::default();
    let mut node = node(&network, od());
    let events = node.subscribe_all();

    node.read_object(DEVICE_NAME, 0).unwrap();
    respond(&mut node, [0x41, 0x08, 0x10, 0x00, 9, 0, 0, 0], 0);
    respond(&mut node, [0x05, b'A', b'B', b'C', 0, 0, 0, 0], 0);

    assert_eq!(network.last(), Some([0x80, 0x08, 0x10, 0x00, 0x10, 0x00, 0x07, 0x06]));
    assert_eq!(
        kinds(&events),
        [(
            DEVICE_NAME,
            EventKind::Error(SdoError::ProtocolAbort {
                code: SDOAbortCode::WrongLength,
                remote: false
            })
        )]
    );
}

#[test]
fn test_expedited_download() {
    let network = MockNetwork::default();
    let mut node = node(&network, od());
    let events = node.subscribe(SETPOINT);

    node.write_object(SETPOINT, &[7], 0).unwrap();
    assert_eq!(network.last(), Some([0x2F, 0x00, 0x20, 0x01, 7, 0, 0, 0]));

    respond(&mut node, [0x60, 0x00, 0x20, 0x01, 0, 0, 0, 0], 0);
    assert_eq!(kinds(&events), [(SETPOINT, EventKind::Written)]);
}

#[test]
fn test_download_response_for_other_subindex() {
    let network = MockNetwork::default();
    let mut node = node(&network, od());
    let events = node.subscribe(SETPOINT);

    node.write_object(SETPOINT, &[7], 0).unwrap();
    respond(&mut node, [0x60, 0x00, 0x20, 0x02, 0, 0, 0, 0], 0);

    assert_eq!(network.last(), Some([0x80, 0x00, 0x20, 0x01, 0x00, 0x00, 0x00, 0x08]));
    assert_eq!(
        kinds(&events),
        [(
            SETPOINT,
            EventKind::Error(SdoError::ProtocolAbort {
                code: SDOAbortCode::GeneralError,
                remote: false
            })
        )]
    );
}

#[test]
fn test_segmented_download() {
    for length in [5usize, 7, 8, 14, 16, 30] {
        let network = MockNetwork::default();
        let mut node = node(&network, od());
        let events = node.subscribe(BLOB);
        let value: Vec<u8> = (0..length as u8).collect();

        node.write_object(BLOB, &value, 0).unwrap();
        assert_eq!(network.take(), [[0x21, 0x01, 0x20, 0x00, length as u8, 0, 0, 0]]);
        respond(&mut node, [0x60, 0x01, 0x20, 0x00, 0, 0, 0, 0], 0);

        let mut received = Vec::new();
        let mut segments = 0;
        loop {
            let frame = network.take();
            assert_eq!(frame.len(), 1);
            let frame = frame[0];
            assert_eq!(frame[0] >> 5, 0, "download segment");
            assert_eq!(frame[0] & 0x10 != 0, segments % 2 == 1, "toggle");
            let used = 7 - ((frame[0] >> 1) & 0x7) as usize;
            received.extend_from_slice(&frame[1..1 + used]);
            segments += 1;

            respond(&mut node, [0x20 | (frame[0] & 0x10), 0, 0, 0, 0, 0, 0, 0], 0);
            if frame[0] & 0x01 != 0 {
                break;
            }
        }

        assert_eq!(segments, length.div_ceil(7), "length {}", length);
        assert_eq!(received, value);
        assert_eq!(kinds(&events), [(BLOB, EventKind::Written)]);
    }
}

#[test]
fn test_empty_download_sends_single_segment() {
    let network = MockNetwork::default();
    let mut node = node(&network, od());

    node.write_object(BLOB, &[], 0).unwrap();
    respond(&mut node, [0x60, 0x01, 0x20, 0x00, 0, 0, 0, 0], 0);

    assert_eq!(
        network.frames(),
        [[0x21, 0x01, 0x20, 0x00, 0, 0, 0, 0], [0x0F, 0, 0, 0, 0, 0, 0, 0]]
    );
}

#[test]
fn test_block_download_retransmits_on_zero_ack() {
    let network = MockNetwork::default();
    let mut node = node(&network, od());
    let events = node.subscribe(PROGRAM_DATA);
    let program: Vec<u8> = (0..20).collect();

    node.write_object(PROGRAM_DATA, &program, 0).unwrap();
    assert_eq!(network.take(), [[0xC6, 0x50, 0x1F, 0x01, 20, 0, 0, 0]]);

    // CRC supported, 2 segments per block
    respond(&mut node, [0xA4, 0x50, 0x1F, 0x01, 2, 0, 0, 0], 0);
    let first_block = network.take();
    assert_eq!(
        first_block,
        [[0x01, 0, 1, 2, 3, 4, 5, 6], [0x02, 7, 8, 9, 10, 11, 12, 13]]
    );
    assert_eq!(node.sdo_status(), TransferState::BlockDownload);

    respond(&mut node, [0xA2, 0, 2, 0, 0, 0, 0, 0], 0);
    assert_eq!(network.take(), first_block);

    respond(&mut node, [0xA2, 2, 2, 0, 0, 0, 0, 0], 0);
    assert_eq!(network.take(), [[0x81, 14, 15, 16, 17, 18, 19, 0]]);

    respond(&mut node, [0xA2, 1, 2, 0, 0, 0, 0, 0], 0);
    let crc = BLOCK_CRC.checksum(&program).to_le_bytes();
    assert_eq!(network.take(), [[0xC5, crc[0], crc[1], 0, 0, 0, 0, 0]]);
    assert_eq!(node.sdo_status(), TransferState::BlockDownloadEnd);

    respond(&mut node, [0xA1, 0, 0, 0, 0, 0, 0, 0], 0);
    assert_eq!(kinds(&events), [(PROGRAM_DATA, EventKind::Written)]);
    assert_eq!(node.sdo_status(), TransferState::Idle);
}

#[test]
fn test_block_download_partial_ack() {
    let network = MockNetwork::default();
    let mut node = node(&network, od());
    let program: Vec<u8> = (0..21).collect();

    node.write_object(PROGRAM_DATA, &program, 0).unwrap();
    // no CRC, 3 segments per block
    respond(&mut node, [0xA0, 0x50, 0x1F, 0x01, 3, 0, 0, 0], 0);
    assert_eq!(network.take().len(), 4);

    // second segment lost
    respond(&mut node, [0xA2, 1, 3, 0, 0, 0, 0, 0], 0);
    assert_eq!(
        network.take(),
        [[0x01, 7, 8, 9, 10, 11, 12, 13], [0x82, 14, 15, 16, 17, 18, 19, 20]]
    );

    respond(&mut node, [0xA2, 2, 3, 0, 0, 0, 0, 0], 0);
    assert_eq!(network.take(), [[0xC1, 0, 0, 0, 0, 0, 0, 0]]);
}

#[test]
fn test_block_download_invalid_block_size() {
    let network = MockNetwork::default();
    let mut node = node(&network, od());
    let events = node.subscribe(PROGRAM_DATA);

    node.write_object(PROGRAM_DATA, &[1, 2, 3], 0).unwrap();
    respond(&mut node, [0xA4, 0x50, 0x1F, 0x01, 0, 0, 0, 0], 0);

    assert_eq!(network.last(), Some([0x80, 0x50, 0x1F, 0x01, 0x02, 0x00, 0x04, 0x05]));
    assert!(matches!(
        events.try_recv().map(|event| event.kind),
        Ok(EventKind::Error(SdoError::ProtocolAbort {
            code: SDOAbortCode::InvalidBlockSize,
            ..
        }))
    ));
}

#[test]
fn test_block_upload() {
    let network = MockNetwork::default();
    let mut node = node(&network, od());
    let events = node.subscribe(PROGRAM_DATA);
    let program: Vec<u8> = (0..10).collect();
    let crc = BLOCK_CRC.checksum(&program).to_le_bytes();

    node.read_object(PROGRAM_DATA, 0).unwrap();
    assert_eq!(network.take(), [[0xA4, 0x50, 0x1F, 0x01, 127, 0, 0, 0]]);

    respond(&mut node, [0xC6, 0x50, 0x1F, 0x01, 10, 0, 0, 0], 0);
    assert_eq!(network.take(), [[0xA3, 0, 0, 0, 0, 0, 0, 0]]);

    respond(&mut node, [0x01, 0, 1, 2, 3, 4, 5, 6], 0);
    assert!(network.take().is_empty());
    respond(&mut node, [0x82, 7, 8, 9, 0, 0, 0, 0], 0);
    assert_eq!(network.take(), [[0xA2, 2, 127, 0, 0, 0, 0, 0]]);
    assert_eq!(node.sdo_status(), TransferState::BlockUploadEnd);

    // 4 bytes of padding in the last segment
    respond(&mut node, [0xD1, crc[0], crc[1], 0, 0, 0, 0, 0], 0);
    assert_eq!(network.take(), [[0xA1, 0, 0, 0, 0, 0, 0, 0]]);
    assert_eq!(node.od().value(PROGRAM_DATA).unwrap(), program);
    assert_eq!(kinds(&events), [(PROGRAM_DATA, EventKind::Read)]);
}

#[test]
fn test_block_upload_bad_crc() {
    let network = MockNetwork::default();
    let mut node = node(&network, od());
    let events = node.subscribe(PROGRAM_DATA);

    node.read_object(PROGRAM_DATA, 0).unwrap();
    respond(&mut node, [0xC6, 0x50, 0x1F, 0x01, 3, 0, 0, 0], 0);
    respond(&mut node, [0x81, 1, 2, 3, 0, 0, 0, 0], 0);
    respond(&mut node, [0xD1, 0xFF, 0xFF, 0, 0, 0, 0, 0], 0);

    assert_eq!(network.last(), Some([0x80, 0x50, 0x1F, 0x01, 0x04, 0x00, 0x04, 0x05]));
    assert!(matches!(
        events.try_recv().map(|event| event.kind),
        Ok(EventKind::Error(SdoError::ProtocolAbort {
            code: SDOAbortCode::CRCError,
            ..
        }))
    ));
    assert_eq!(node.od().value(PROGRAM_DATA).unwrap(), b"");
}

#[test]
fn test_timeout_sends_one_abort() {
    let network = MockNetwork::default();
    let mut node = node(&network, od());
    let events = node.subscribe(DEVICE_TYPE);

    node.read_object(DEVICE_TYPE, 1_000).unwrap();
    assert_eq!(node.next_deadline(), Some(6_001_000));

    node.tick(6_000_999);
    assert_eq!(network.count(), 1);

    node.tick(6_001_000);
    assert_eq!(network.last(), Some([0x80, 0x00, 0x10, 0x00, 0x00, 0x00, 0x04, 0x05]));
    assert_eq!(kinds(&events), [(DEVICE_TYPE, EventKind::Error(SdoError::Timeout))]);

    node.tick(20_000_000);
    assert_eq!(network.count(), 2);
    assert_eq!(node.sdo_status(), TransferState::Idle);
}

#[test]
fn test_requests_served_in_order() {
    let network = MockNetwork::default();
    let mut node = node(&network, od());
    let events = node.subscribe_all();

    let first = node.read_object(DEVICE_TYPE, 0).unwrap();
    let second = node.read_object(ERROR_REGISTER, 0).unwrap();
    assert!(second > first);
    assert_eq!(network.frames(), [[0x40, 0x00, 0x10, 0x00, 0, 0, 0, 0]]);

    respond(&mut node, [0x43, 0x00, 0x10, 0x00, 0x92, 0x01, 0x02, 0x00], 0);
    assert_eq!(network.last(), Some([0x40, 0x01, 0x10, 0x00, 0, 0, 0, 0]));

    respond(&mut node, [0x4F, 0x01, 0x10, 0x00, 0x00, 0, 0, 0], 0);
    let order: Vec<_> = events.try_iter().map(|event| event.request).collect();
    assert_eq!(order, [first, second]);
}

#[test]
fn test_server_abort() {
    let network = MockNetwork::default();
    let mut node = node(&network, od());
    let events = node.subscribe(DEVICE_TYPE);

    node.read_object(DEVICE_TYPE, 0).unwrap();
    respond(&mut node, [0x80, 0x00, 0x10, 0x00, 0x00, 0x00, 0x02, 0x06], 0);

    assert_eq!(network.count(), 1, "no abort is echoed");
    let event = events.try_recv().unwrap();
    assert_eq!(
        event.kind,
        EventKind::Error(SdoError::ProtocolAbort {
            code: SDOAbortCode::ObjectDoesNotExist,
            remote: true
        })
    );
    if let EventKind::Error(err) = event.kind {
        assert_eq!(err.abort_code(), 0x0602_0000);
    }
}

#[test]
fn test_unknown_command_aborts() {
    let network = MockNetwork::default();
    let mut node = node(&network, od());

    node.read_object(DEVICE_TYPE, 0).unwrap();
    respond(&mut node, [0xE0, 0, 0, 0, 0, 0, 0, 0], 0);

    assert_eq!(network.last(), Some([0x80, 0x00, 0x10, 0x00, 0x01, 0x00, 0x04, 0x05]));
}

#[test]
fn test_transport_failure() {
    let network = MockNetwork::default();
    let mut node = node(&network, od());
    let events = node.subscribe_all();

    network.offline.set(true);
    node.read_object(DEVICE_TYPE, 0).unwrap();
    assert_eq!(kinds(&events), [(DEVICE_TYPE, EventKind::Error(SdoError::TransportUnavailable))]);
    assert_eq!(node.sdo_status(), TransferState::Idle);

    network.offline.set(false);
    node.read_object(DEVICE_TYPE, 0).unwrap();
    assert_eq!(network.count(), 1);
    assert_eq!(node.sdo_status(), TransferState::UploadInitiateSent);
}

#[test]
fn test_missing_object() {
    let network = MockNetwork::default();
    let mut node = node(&network, od());

    assert!(matches!(
        node.read_object(ObjectAddress::new(0x6000, 0), 0),
        Err(SdoError::Dictionary(_))
    ));
    assert_eq!(network.count(), 0);
}

#[test]
fn test_cancel() {
    let network = MockNetwork::default();
    let mut node = node(&network, od());
    let events = node.subscribe_all();

    node.read_object(DEVICE_TYPE, 0).unwrap();
    node.read_object(ERROR_REGISTER, 0).unwrap();
    node.cancel(DEVICE_TYPE, 0);

    assert_eq!(
        network.frames(),
        [
            [0x40, 0x00, 0x10, 0x00, 0, 0, 0, 0],
            [0x80, 0x00, 0x10, 0x00, 0x00, 0x00, 0x00, 0x08],
            [0x40, 0x01, 0x10, 0x00, 0, 0, 0, 0],
        ]
    );
    assert_eq!(
        kinds(&events),
        [(
            DEVICE_TYPE,
            EventKind::Error(SdoError::ProtocolAbort {
                code: SDOAbortCode::GeneralError,
                remote: false
            })
        )]
    );
}

#[test]
fn test_ignored_frames() {
    let network = MockNetwork::default();
    let mut node = node(&network, od());

    // idle
    respond(&mut node, [0x43, 0x00, 0x10, 0x00, 1, 2, 3, 4], 0);
    assert_eq!(node.od().value(DEVICE_TYPE).unwrap(), [0, 0, 0, 0]);

    node.read_object(DEVICE_TYPE, 0).unwrap();
    let other_node = CanOpenFrame::standard(0x586, &[0x43, 0x00, 0x10, 0x00, 1, 2, 3, 4]).unwrap();
    let short = CanOpenFrame::standard(0x585, &[0x43, 0x00, 0x10, 0x00]).unwrap();
    assert!(!node.on_message(&other_node, 0));
    assert!(!node.on_message(&short, 0));
    assert_eq!(node.sdo_status(), TransferState::UploadInitiateSent);
}
