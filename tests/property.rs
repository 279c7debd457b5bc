//! Property-based tests for frame parsing and message reassembly.
//!
//! These tests use proptest to fuzz the reader with arbitrary chunking and
//! fragmentation.

use proptest::prelude::*;
use wsession::config::Limits;
use wsession::extensions::ExtensionChain;
use wsession::protocol::{Frame, MessageReader, OpCode, apply_mask};
use wsession::{Error, Message};

const MASK: [u8; 4] = [0x0f, 0xf0, 0x55, 0xaa];

/// Encode `payload` as a masked message split at the given fragment sizes.
fn fragmented(opcode: OpCode, payload: &[u8], sizes: &[usize]) -> Vec<u8> {
    let mut out = Vec::new();
    let mut rest = payload;
    for (i, size) in sizes.iter().enumerate() {
        let last = i == sizes.len() - 1;
        let take = if last { rest.len() } else { (*size).min(rest.len()) };
        let (piece, tail) = rest.split_at(take);
        rest = tail;
        let code = if i == 0 { opcode } else { OpCode::Continuation };
        Frame::new(last, code, piece.to_vec()).write(&mut out, Some(MASK));
    }
    out
}

/// Feed `data` in chunks cut at `cuts`, collecting every completed message.
fn read_chunked(reader: &mut MessageReader, data: &[u8], cuts: &[usize]) -> Result<Vec<Message>, Error> {
    let mut chain = ExtensionChain::new();
    let mut points: Vec<usize> = cuts.iter().map(|c| c % (data.len() + 1)).collect();
    points.push(data.len());
    points.sort_unstable();

    let mut messages = Vec::new();
    let mut start = 0;
    for point in points {
        reader.feed(&data[start..point]);
        start = point;
        while let Some(message) = reader.read(&mut chain)? {
            messages.push(message);
        }
    }
    Ok(messages)
}

fn data_opcode_strategy() -> impl Strategy<Value = OpCode> {
    prop_oneof![Just(OpCode::Text), Just(OpCode::Binary)]
}

proptest! {
    // =========================================================================
    // Property 1: Masked frames parse back to the original payload
    // =========================================================================
    #[test]
    fn test_roundtrip_masked(
        fin in any::<bool>(),
        opcode in data_opcode_strategy(),
        payload in prop::collection::vec(any::<u8>(), 0..500),
        mask in any::<[u8; 4]>()
    ) {
        let frame = Frame::new(fin, opcode, payload.clone());
        let mut buf = Vec::new();
        frame.write(&mut buf, Some(mask));
        prop_assert_eq!(buf.len(), frame.wire_size(true));

        let (parsed, consumed) = Frame::parse(&buf).unwrap();
        prop_assert_eq!(consumed, buf.len());
        prop_assert_eq!(parsed, frame);
    }

    // =========================================================================
    // Property 2: Masking is reversible (XOR is self-inverse)
    // =========================================================================
    #[test]
    fn test_mask_reversible(
        data in prop::collection::vec(any::<u8>(), 0..2000),
        mask in any::<[u8; 4]>()
    ) {
        let mut masked = data.clone();
        apply_mask(&mut masked, mask);
        apply_mask(&mut masked, mask);
        prop_assert_eq!(data, masked);
    }

    // =========================================================================
    // Property 3: Truncated frames are reported as incomplete
    // =========================================================================
    #[test]
    fn test_incomplete_frame_detection(
        payload in prop::collection::vec(any::<u8>(), 1..500),
        truncate_by in 1..50usize
    ) {
        let mut buf = Vec::new();
        Frame::binary(payload).write(&mut buf, Some(MASK));
        let truncated = buf.len().saturating_sub(truncate_by).max(1);
        let result = Frame::parse(&buf[..truncated]);
        let is_incomplete = matches!(result, Err(Error::IncompleteFrame { .. }));
        prop_assert!(is_incomplete);
    }

    // =========================================================================
    // Property 4: Reassembly is independent of how bytes arrive
    // =========================================================================
    #[test]
    fn test_arbitrary_split_points(
        payload in prop::collection::vec(any::<u8>(), 0..2000),
        sizes in prop::collection::vec(1..400usize, 1..6),
        cuts in prop::collection::vec(any::<usize>(), 0..20)
    ) {
        let data = fragmented(OpCode::Binary, &payload, &sizes);
        let mut reader = MessageReader::new(Limits::default(), false);

        let messages = read_chunked(&mut reader, &data, &cuts).unwrap();
        prop_assert_eq!(messages, vec![Message::Binary(payload)]);
        prop_assert_eq!(reader.buffered(), 0);
        prop_assert!(!reader.is_assembling());
    }

    // =========================================================================
    // Property 5: Control frames between fragments never disturb the message
    // =========================================================================
    #[test]
    fn test_interleaved_pings(
        text in "[a-zA-Z0-9 ]{0,300}",
        ping in prop::collection::vec(any::<u8>(), 0..=125)
    ) {
        let bytes = text.as_bytes();
        let mid = bytes.len() / 2;

        let mut data = Vec::new();
        Frame::new(false, OpCode::Text, bytes[..mid].to_vec()).write(&mut data, Some(MASK));
        Frame::ping(ping.clone()).write(&mut data, Some(MASK));
        Frame::new(true, OpCode::Continuation, bytes[mid..].to_vec()).write(&mut data, Some(MASK));

        let mut reader = MessageReader::new(Limits::default(), false);
        let messages = read_chunked(&mut reader, &data, &[]).unwrap();
        prop_assert_eq!(messages, vec![Message::Ping(ping), Message::Text(text)]);
    }

    // =========================================================================
    // Property 6: Oversized messages fail before completion, however split
    // =========================================================================
    #[test]
    fn test_message_too_big_regardless_of_distribution(
        max_message in 16..512usize,
        excess in 1..256usize,
        sizes in prop::collection::vec(1..128usize, 1..10),
        cuts in prop::collection::vec(any::<usize>(), 0..20),
        opcode in data_opcode_strategy()
    ) {
        let payload = vec![b'x'; max_message + excess];
        let data = fragmented(opcode, &payload, &sizes);
        let mut reader = MessageReader::new(Limits::new(usize::MAX, max_message), false);

        let result = read_chunked(&mut reader, &data, &cuts);
        let too_large = matches!(
            result,
            Err(Error::MessageTooLarge { max, .. }) if max == max_message
        );
        prop_assert!(too_large, "got {:?}", result);
    }

    // =========================================================================
    // Property 7: Messages within limits always complete
    // =========================================================================
    #[test]
    fn test_message_at_limit_completes(
        max_message in 1..512usize,
        sizes in prop::collection::vec(1..128usize, 1..10)
    ) {
        let payload = vec![b'y'; max_message];
        let data = fragmented(OpCode::Binary, &payload, &sizes);
        let mut reader = MessageReader::new(Limits::new(usize::MAX, max_message), false);

        let messages = read_chunked(&mut reader, &data, &[]).unwrap();
        prop_assert_eq!(messages, vec![Message::Binary(payload)]);
    }

    // =========================================================================
    // Property 8: Control frames over 125 bytes are always rejected
    // =========================================================================
    #[test]
    fn test_control_frame_exceeds_limit(
        payload in prop::collection::vec(any::<u8>(), 126..256)
    ) {
        let len = payload.len();
        let mut data = Vec::new();
        Frame::ping(payload).write(&mut data, Some(MASK));

        let mut reader = MessageReader::new(Limits::default(), false);
        let result = read_chunked(&mut reader, &data, &[]);
        prop_assert_eq!(result, Err(Error::ControlFrameTooLarge(len)));
    }
}
