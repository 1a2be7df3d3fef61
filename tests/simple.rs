//! End-to-end decode of a minimal single-stream trace: one event class, a
//! plain integer payload and a sequence payload, driven entirely through the
//! public API (`build_trace` -> `NotificationIterator` over a `SliceMedium`).

#[path = "common/mod.rs"]
mod common;

use common::*;
use ctf_reader::ast::Root;
use ctf_reader::ir::field::FieldValue;
use ctf_reader::medium::SliceMedium;
use ctf_reader::{build_trace, Advance, Notification, NotificationIterator};
use pretty_assertions::assert_eq;
use test_log::test;

/// §8 scenario 1: packet header `{magic}`, packet context
/// `{packet_size, content_size}`, event header `{id}`, one event class with
/// payload `{n: u32 LE}`.
#[test]
fn decodes_minimal_single_event_packet() {
    let root = Root {
        traces: vec![trace_block(vec![field("magic", int_ty(32, Some("be")))])],
        streams: vec![stream_block(
            vec![
                field("packet_size", int_ty(32, Some("be"))),
                field("content_size", int_ty(32, Some("be"))),
            ],
            vec![field("id", int_ty(8, Some("be")))],
        )],
        events: vec![event_block(0, vec![field("n", int_ty(32, Some("le")))])],
        ..Default::default()
    };
    let trace = build_trace(&root).unwrap();

    // magic | packet_size=136 | content_size=136 | id=0 | n=42 (LE)
    let bytes = [
        0xC1, 0xFC, 0x1F, 0xC1, 0x00, 0x00, 0x00, 0x88, 0x00, 0x00, 0x00, 0x88, 0x00, 0x2A, 0x00,
        0x00, 0x00,
    ];
    let mut iter = NotificationIterator::new(trace, SliceMedium::new(&bytes));

    match iter.advance().unwrap() {
        Advance::Notification(Notification::StreamBegin { stream_class_id, stream_id }) => {
            assert_eq!(stream_class_id, 0);
            assert_eq!(stream_id, 0);
        }
        _ => panic!("expected stream-begin"),
    }
    match iter.advance().unwrap() {
        Advance::Notification(Notification::PacketBegin { packet_index }) => assert_eq!(packet_index, 0),
        _ => panic!("expected packet-begin"),
    }

    let event = match iter.advance().unwrap() {
        Advance::Notification(Notification::Event(e)) => e,
        _ => panic!("expected event"),
    };
    assert_eq!(event.event_class_id, 0);
    match &iter.fields().get(event.payload).value {
        FieldValue::Structure(children) => {
            assert_eq!(iter.fields().get(children[0]).value, FieldValue::UnsignedInteger(42));
        }
        other => panic!("expected a structure payload, got {other:?}"),
    }

    match iter.advance().unwrap() {
        Advance::Notification(Notification::PacketEnd { packet_index }) => assert_eq!(packet_index, 0),
        _ => panic!("expected end-of-packet"),
    }
    match iter.advance().unwrap() {
        Advance::Notification(Notification::StreamEnd) => {}
        _ => panic!("expected end-of-stream"),
    }
    match iter.advance().unwrap() {
        Advance::Done => {}
        _ => panic!("expected done"),
    }
}

/// §8 scenario 3: `{ len: u8, data: u16 BE[len] }`.
#[test]
fn decodes_sequence_field() {
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
                field("len", int_ty(8, Some("be"))),
                sequence_field("data", int_ty(16, Some("be")), "len"),
            ],
        )],
        ..Default::default()
    };
    let trace = build_trace(&root).unwrap();

    // magic | packet_size=160 | content_size=160 | id=0 | len=3, data=[1,2,3]
    let bytes = [
        0xC1, 0xFC, 0x1F, 0xC1, 0x00, 0x00, 0x00, 0xA0, 0x00, 0x00, 0x00, 0xA0, 0x00, 0x03, 0x00,
        0x01, 0x00, 0x02, 0x00, 0x03,
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
    assert_eq!(iter.fields().get(children[0]).value, FieldValue::UnsignedInteger(3));
    match &iter.fields().get(children[1]).value {
        FieldValue::Sequence(elements) => {
            assert_eq!(elements.len(), 3);
            let values: Vec<_> = elements.iter().map(|&id| iter.fields().get(id).value.clone()).collect();
            assert_eq!(
                values,
                vec![
                    FieldValue::UnsignedInteger(1),
                    FieldValue::UnsignedInteger(2),
                    FieldValue::UnsignedInteger(3),
                ]
            );
        }
        other => panic!("expected a sequence, got {other:?}"),
    }
}
