//! End-to-end decode scenarios exercising variant selection, packet padding
//! and switching, the BTR's cross-buffer stitch, and default-clock
//! reconstruction — all driven through the public API.

#[path = "common/mod.rs"]
mod common;

use common::*;
use ctf_reader::ast::Root;
use ctf_reader::ir::field::FieldValue;
use ctf_reader::medium::SliceMedium;
use ctf_reader::{build_trace, Advance, Error, Notification, NotificationIterator};
use pretty_assertions::assert_eq;
use test_log::test;

/// §8 scenario 2: `enum kind : u8 { A = 0, B = 1 }` paired with
/// `variant v<kind> { A: u16 BE; B: u32 LE; }`; tag selects `B`.
#[test]
fn decodes_variant_selection() {
    let root = Root {
        traces: vec![trace_block(vec![field("magic", int_ty(32, Some("be")))])],
        streams: vec![stream_block(
            vec![
                field("packet_size", int_ty(32, Some("be"))),
                field("content_size", int_ty(32, Some("be"))),
            ],
            vec![field("id", int_ty(8, Some("be")))],
        )],
        events: vec![event_block(
            0,
            vec![
                field("kind", enum_ty(8, &[("A", 0), ("B", 1)])),
                field(
                    "v",
                    variant_ty("kind", vec![("A", int_ty(16, Some("be"))), ("B", int_ty(32, Some("le")))]),
                ),
            ],
        )],
        ..Default::default()
    };
    let trace = build_trace(&root).unwrap();

    // magic | packet_size=144 | content_size=144 | id=0 | kind=1(B) | v=0xDDCCBBAA (LE)
    let bytes = [
        0xC1, 0xFC, 0x1F, 0xC1, 0x00, 0x00, 0x00, 0x90, 0x00, 0x00, 0x00, 0x90, 0x00, 0x01, 0xAA,
        0xBB, 0xCC, 0xDD,
    ];
    let mut iter = NotificationIterator::new(trace, SliceMedium::new(&bytes));

    let event = loop {
        match iter.advance().unwrap() {
            Advance::Notification(Notification::Event(e)) => break e,
            Advance::Notification(_) => continue,
            _ => panic!("expected an event"),
        }
    };

    let children = match &iter.fields().get(event.payload).value {
        FieldValue::Structure(c) => c.clone(),
        other => panic!("expected a structure payload, got {other:?}"),
    };
    assert_eq!(
        iter.fields().get(children[0]).value,
        FieldValue::Enumeration(1, Some("B".to_owned()))
    );
    match &iter.fields().get(children[1]).value {
        FieldValue::Variant { selected_index, selected_field } => {
            assert_eq!(*selected_index, Some(1));
            let selected = selected_field.expect("variant should have selected an option");
            assert_eq!(iter.fields().get(selected).value, FieldValue::UnsignedInteger(0xDDCC_BBAA));
        }
        other => panic!("expected a variant, got {other:?}"),
    }
}

/// §8 scenario 6: packet total=200 bits, content=136 bits for the first
/// packet (64 bits of padding before the next packet's header); the second
/// packet has no padding at all.
#[test]
fn skips_padding_between_packets_and_switches() {
    let root = Root {
        traces: vec![trace_block(vec![field("magic", int_ty(32, Some("be")))])],
        streams: vec![stream_block(
            vec![
                field("packet_size", int_ty(32, Some("be"))),
                field("content_size", int_ty(32, Some("be"))),
            ],
            vec![field("id", int_ty(8, Some("be")))],
        )],
        events: vec![event_block(0, vec![field("n", int_ty(32, Some("be")))])],
        ..Default::default()
    };
    let trace = build_trace(&root).unwrap();

    let mut bytes = Vec::new();
    // packet 0: total=200 bits (25 bytes), content=136 bits (17 bytes), n=7.
    bytes.extend_from_slice(&[0xC1, 0xFC, 0x1F, 0xC1]);
    bytes.extend_from_slice(&200u32.to_be_bytes());
    bytes.extend_from_slice(&136u32.to_be_bytes());
    bytes.push(0x00);
    bytes.extend_from_slice(&7u32.to_be_bytes());
    bytes.extend_from_slice(&[0u8; 8]); // padding
    // packet 1: total=content=136 bits (17 bytes), n=9, no padding.
    bytes.extend_from_slice(&[0xC1, 0xFC, 0x1F, 0xC1]);
    bytes.extend_from_slice(&136u32.to_be_bytes());
    bytes.extend_from_slice(&136u32.to_be_bytes());
    bytes.push(0x00);
    bytes.extend_from_slice(&9u32.to_be_bytes());
    assert_eq!(bytes.len(), 25 + 17);

    let mut iter = NotificationIterator::new(trace, SliceMedium::new(&bytes));

    assert!(matches!(
        iter.advance().unwrap(),
        Advance::Notification(Notification::StreamBegin { .. })
    ));

    for (packet_index, expected_n) in [(0u64, 7u64), (1u64, 9u64)] {
        match iter.advance().unwrap() {
            Advance::Notification(Notification::PacketBegin { packet_index: p }) => assert_eq!(p, packet_index),
            _ => panic!("expected packet-begin"),
        }
        let event = match iter.advance().unwrap() {
            Advance::Notification(Notification::Event(e)) => e,
            _ => panic!("expected event"),
        };
        match &iter.fields().get(event.payload).value {
            FieldValue::Structure(children) => {
                assert_eq!(
                    iter.fields().get(children[0]).value,
                    FieldValue::UnsignedInteger(expected_n)
                );
            }
            other => panic!("expected a structure payload, got {other:?}"),
        }
        match iter.advance().unwrap() {
            Advance::Notification(Notification::PacketEnd { packet_index: p }) => assert_eq!(p, packet_index),
            _ => panic!("expected end-of-packet"),
        }
    }

    assert!(matches!(
        iter.advance().unwrap(),
        Advance::Notification(Notification::StreamEnd)
    ));
    assert!(matches!(iter.advance().unwrap(), Advance::Done));
}

/// §8 scenario 4: a medium that only ever hands back one byte per call must
/// decode exactly like one backed by the whole buffer at once.
#[test]
fn cross_buffer_stitch_matches_single_buffer_decode() {
    let build = || {
        let root = Root {
            traces: vec![trace_block(vec![field("magic", int_ty(32, Some("be")))])],
            streams: vec![stream_block(
                vec![
                    field("packet_size", int_ty(32, Some("be"))),
                    field("content_size", int_ty(32, Some("be"))),
                ],
                vec![field("id", int_ty(8, Some("be")))],
            )],
            events: vec![event_block(0, vec![field("n", int_ty(32, Some("be")))])],
            ..Default::default()
        };
        build_trace(&root).unwrap()
    };

    // magic | packet_size=136 | content_size=136 | id=0 | n=0x11223344 (BE)
    let bytes = [
        0xC1, 0xFC, 0x1F, 0xC1, 0x00, 0x00, 0x00, 0x88, 0x00, 0x00, 0x00, 0x88, 0x00, 0x11, 0x22,
        0x33, 0x44,
    ];

    let whole = {
        let mut iter = NotificationIterator::new(build(), SliceMedium::new(&bytes));
        loop {
            match iter.advance().unwrap() {
                Advance::Notification(Notification::Event(e)) => {
                    break match &iter.fields().get(e.payload).value {
                        FieldValue::Structure(c) => iter.fields().get(c[0]).value.clone(),
                        other => panic!("expected a structure payload, got {other:?}"),
                    }
                }
                Advance::Notification(_) => continue,
                _ => panic!("expected an event"),
            }
        }
    };

    let stitched = {
        let mut iter = NotificationIterator::new(build(), OneByteMedium::new(&bytes));
        loop {
            match iter.advance().unwrap() {
                Advance::Notification(Notification::Event(e)) => {
                    break match &iter.fields().get(e.payload).value {
                        FieldValue::Structure(c) => iter.fields().get(c[0]).value.clone(),
                        other => panic!("expected a structure payload, got {other:?}"),
                    }
                }
                Advance::Notification(_) => continue,
                Advance::Again => panic!("OneByteMedium never returns Again"),
                Advance::Done => panic!("expected an event before end of stream"),
            }
        }
    };

    assert_eq!(whole, FieldValue::UnsignedInteger(0x1122_3344));
    assert_eq!(stitched, whole);
}

/// §8 scenario 5: a clock-mapped integer narrower than 64 bits whose value
/// drops below its own low bits must advance the default clock by its full
/// bit width rather than wrapping back down.
#[test]
fn default_clock_reconstructs_across_events() {
    let root = Root {
        traces: vec![trace_block(vec![field("magic", int_ty(32, Some("be")))])],
        streams: vec![stream_block(
            vec![
                field("packet_size", int_ty(32, Some("be"))),
                field("content_size", int_ty(32, Some("be"))),
            ],
            vec![field("id", int_ty(8, Some("be")))],
        )],
        events: vec![event_block(0, vec![field("ts", clock_mapped_int_ty(32, Some("be"), "c0"))])],
        ..Default::default()
    };
    let trace = build_trace(&root).unwrap();

    // magic | packet_size=176 | content_size=176 | (id, ts) x 2
    let mut bytes = vec![0xC1, 0xFC, 0x1F, 0xC1];
    bytes.extend_from_slice(&176u32.to_be_bytes());
    bytes.extend_from_slice(&176u32.to_be_bytes());
    bytes.push(0x00);
    bytes.extend_from_slice(&0xFFFF_FFF0u32.to_be_bytes());
    bytes.push(0x00);
    bytes.extend_from_slice(&0x0000_0005u32.to_be_bytes());

    let mut iter = NotificationIterator::new(trace, SliceMedium::new(&bytes));

    let mut clocks = Vec::new();
    loop {
        match iter.advance().unwrap() {
            Advance::Notification(Notification::Event(e)) => clocks.push(e.default_clock_value.unwrap()),
            Advance::Notification(Notification::StreamEnd) => break,
            Advance::Notification(_) => continue,
            Advance::Again => panic!("SliceMedium never returns Again"),
            Advance::Done => break,
        }
    }

    assert_eq!(clocks, vec![0xFFFF_FFF0, 0x1_0000_0005]);
}

/// An event header `id` naming an event class the stream class never
/// declared is an invalid-stream condition, not a silently-skipped payload.
#[test]
fn unknown_event_id_is_an_error() {
    let root = Root {
        traces: vec![trace_block(vec![field("magic", int_ty(32, Some("be")))])],
        streams: vec![stream_block(
            vec![
                field("packet_size", int_ty(32, Some("be"))),
                field("content_size", int_ty(32, Some("be"))),
            ],
            vec![field("id", int_ty(8, Some("be")))],
        )],
        events: vec![event_block(0, vec![field("n", int_ty(32, Some("be")))])],
        ..Default::default()
    };
    let trace = build_trace(&root).unwrap();

    // magic | packet_size=104 | content_size=104 | id=7 (no such event class)
    let bytes = [
        0xC1, 0xFC, 0x1F, 0xC1, 0x00, 0x00, 0x00, 0x68, 0x00, 0x00, 0x00, 0x68, 0x07,
    ];
    let mut iter = NotificationIterator::new(trace, SliceMedium::new(&bytes));

    let err = loop {
        match iter.advance() {
            Ok(Advance::Notification(_)) => continue,
            Ok(other) => panic!("expected an error before {}", describe(other)),
            Err(e) => break e,
        }
    };
    assert!(matches!(err, Error::UnknownEventClassId(7, 0)));
}

fn describe(advance: Advance) -> &'static str {
    match advance {
        Advance::Notification(_) => "a notification",
        Advance::Again => "again",
        Advance::Done => "done",
    }
}
