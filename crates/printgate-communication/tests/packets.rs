//! Tests for the GX and N2 binary codecs

use bytes::Bytes;
use printgate_communication::firmware::gx::{GxCommand, GxFile, GxPacket};
use printgate_communication::firmware::n2::message::{
    cancel_print, client_gcode, client_string, start_print, HOME_GETINFO,
};
use printgate_communication::firmware::n2::transfer::{begin_packet, chunk_packet};
use printgate_communication::firmware::n2::{N2Command, N2Packet};
use printgate_core::PacketError;
use proptest::collection::vec;
use proptest::prelude::*;

fn n2_sample() -> N2Packet {
    N2Packet::new(N2Command::HomeInfo)
        .with_byte(1)
        .with_int(0x3F80_0000)
        .with_long(1234)
        .with_string("cube.gcode")
}

#[test]
fn test_gx_truncation_is_incomplete() {
    let frame = GxPacket::command(GxCommand::GetTemp, "M105").encode();
    for k in 0..frame.len() {
        let err = GxPacket::decode(&frame[..k]).unwrap_err();
        assert!(err.is_incomplete(), "prefix {} gave {:?}", k, err);
    }
    let (packet, used) = GxPacket::decode(&frame).unwrap();
    assert_eq!(used, frame.len());
    assert_eq!(packet.text(), "M105");
}

#[test]
fn test_n2_truncation_is_incomplete() {
    let frame = n2_sample().encode();
    for k in 0..frame.len() {
        let err = N2Packet::decode(&frame[..k]).unwrap_err();
        assert!(err.is_incomplete(), "prefix {} gave {:?}", k, err);
    }
}

#[test]
fn test_trailing_bytes_left_for_next_packet() {
    let first = n2_sample().encode();
    let second = N2Packet::new(N2Command::PrintAck).encode();
    let mut stream = first.to_vec();
    stream.extend_from_slice(&second);

    let (packet, used) = N2Packet::decode(&stream).unwrap();
    assert_eq!(used, first.len());
    assert_eq!(packet.long(0), 1234);
    assert_eq!(packet.float(0), 1.0);
    assert_eq!(packet.string(0), "cube.gcode");
    let (packet, _) = N2Packet::decode(&stream[used..]).unwrap();
    assert_eq!(packet.command().unwrap(), N2Command::PrintAck);
}

#[test]
fn test_short_declared_length_is_malformed() {
    let mut frame = GxPacket::command(GxCommand::Status, "").encode().to_vec();
    frame[..4].copy_from_slice(&8u32.to_le_bytes());
    assert!(matches!(
        GxPacket::decode(&frame),
        Err(PacketError::Malformed { offset: 0, .. })
    ));
}

#[test]
fn test_gx_bad_magic_is_malformed() {
    let mut frame = GxPacket::command(GxCommand::GetTemp, "M105").encode().to_vec();
    frame[10] = 0;
    assert!(matches!(
        GxPacket::decode(&frame),
        Err(PacketError::Malformed { offset: 10, .. })
    ));
}

#[test]
fn test_n2_magic_words_are_data() {
    let mut frame = n2_sample().encode().to_vec();
    frame[10..14].copy_from_slice(&0x1234_5678u32.to_le_bytes());

    let (packet, used) = N2Packet::decode(&frame).unwrap();
    assert_eq!(used, frame.len());
    assert_eq!(packet.magic1, 0x1234_5678);
    assert_eq!(packet.magic2, 0xFFFF_FFFF);
    assert_eq!(packet.float(0), 1.0);
    assert_eq!(packet.encode().to_vec(), frame);
}

#[test]
fn test_n2_message_builders_round_trip() {
    let packets = [
        client_string(HOME_GETINFO),
        client_gcode("G28"),
        start_print("/data/cube.gcode"),
        cancel_print("/data/cube.gcode"),
        begin_packet("cube.gcode", 70_000),
        chunk_packet(3, Bytes::from_static(b"G1 X10\n")),
    ];
    for packet in packets {
        let frame = packet.encode();
        let (decoded, used) = N2Packet::decode(&frame).unwrap();
        assert_eq!(used, frame.len());
        assert_eq!(decoded, packet);
        assert!(decoded.command().is_ok());
    }
}

#[test]
fn test_unknown_type_decodes_then_classifies() {
    let mut frame = GxPacket::command(GxCommand::Status, "").encode().to_vec();
    frame[4..8].copy_from_slice(&9999u32.to_le_bytes());
    let (packet, _) = GxPacket::decode(&frame).unwrap();
    assert!(matches!(
        packet.command_code(),
        Err(PacketError::UnrecognizedCommand { id: 9999 })
    ));
}

#[test]
fn test_gx_file_wraps_gcode() {
    let gcode = b"G28\nG1 X10\n".to_vec();
    let file = GxFile::new(gcode.clone()).with_estimates(Some(600), Some(1500));
    let parsed = GxFile::parse(&file.to_bytes()).unwrap();
    assert_eq!(&parsed.gcode[..], &gcode[..]);
    assert_eq!(parsed.print_seconds, 600);
    assert_eq!(parsed.filament_mm, 1500);
    assert!(!parsed.thumbnail.is_empty());
}

fn gx_packet() -> impl Strategy<Value = GxPacket> {
    (
        prop::sample::select(GxCommand::ALL.to_vec()),
        any::<u8>(),
        0u8..2,
        any::<[u16; 5]>(),
        vec(any::<u8>(), 0..512),
    )
        .prop_map(|(command, version, side, header, payload)| GxPacket {
            kind: command.code(),
            version,
            side,
            header,
            payload: Bytes::from(payload),
        })
}

fn n2_packet() -> impl Strategy<Value = N2Packet> {
    (
        prop::sample::select(N2Command::ALL.to_vec()),
        (any::<u8>(), 0u8..2, any::<u32>(), any::<u32>()),
        vec(any::<u8>(), 0..16),
        vec(any::<u16>(), 0..8),
        vec(any::<u32>(), 0..32),
        vec(any::<u64>(), 0..8),
        vec(vec(any::<u8>(), 0..64), 0..4),
    )
        .prop_map(
            |(command, (version, side, magic1, magic2), bytes, shorts, ints, longs, strings)| {
                let mut packet = N2Packet::new(command);
                packet.version = version;
                packet.side = side;
                packet.magic1 = magic1;
                packet.magic2 = magic2;
                packet.bytes = bytes;
                packet.shorts = shorts;
                packet.ints = ints;
                packet.longs = longs;
                packet.strings = strings.into_iter().map(Bytes::from).collect();
                packet
            },
        )
}

proptest! {
    #[test]
    fn prop_gx_round_trip(packet in gx_packet()) {
        let frame = packet.encode();
        let (decoded, used) = GxPacket::decode(&frame).unwrap();
        prop_assert_eq!(used, frame.len());
        prop_assert!(decoded.command_code().is_ok());
        prop_assert_eq!(decoded, packet);
        for k in 0..frame.len() {
            prop_assert!(GxPacket::decode(&frame[..k]).unwrap_err().is_incomplete());
        }
    }

    #[test]
    fn prop_n2_round_trip(packet in n2_packet()) {
        let frame = packet.encode();
        prop_assert_eq!(frame.len(), packet.encoded_len());
        let (decoded, used) = N2Packet::decode(&frame).unwrap();
        prop_assert_eq!(used, frame.len());
        prop_assert!(decoded.command().is_ok());
        prop_assert_eq!(decoded, packet);
        for k in 0..frame.len() {
            prop_assert!(N2Packet::decode(&frame[..k]).unwrap_err().is_incomplete());
        }
    }

    #[test]
    fn prop_garbage_never_panics(data in prop::collection::vec(any::<u8>(), 0..256)) {
        let _ = GxPacket::decode(&data);
        let _ = N2Packet::decode(&data);
        let _ = GxFile::parse(&data);
    }

    #[test]
    fn prop_n2_strings_survive(texts in prop::collection::vec("[a-zA-Z0-9./_ ]{0,24}", 0..4)) {
        let mut packet = N2Packet::new(N2Command::ClientString);
        for text in &texts {
            packet = packet.with_string(text);
        }
        let frame = packet.encode();
        prop_assert_eq!(frame.len(), packet.encoded_len());
        let (decoded, used) = N2Packet::decode(&frame).unwrap();
        prop_assert_eq!(used, frame.len());
        for (i, text) in texts.iter().enumerate() {
            prop_assert_eq!(&decoded.string(i), text);
        }
    }
}
