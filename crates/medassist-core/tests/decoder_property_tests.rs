//! Property-based tests for the stream decoder
//!
//! Network chunk boundaries are arbitrary, so decoding must not depend on
//! where a body is split:
//!
//! - any split of a valid body yields the same increments as the whole body
//! - the concatenated text of decoded deltas equals the concatenated input
//! - junk lines interleaved between frames are dropped without losing frames
//! - applying the increments to a store reproduces the text

use medassist_core::{decode_chunk, Message, MessageStore, StreamDecoder, StreamEvent};
use proptest::prelude::*;

fn text_strategy() -> impl Strategy<Value = String> {
    prop_oneof![
        "[a-zA-Z0-9 .,]{0,12}",
        Just("née".to_string()),
        Just("🩺 bp 120/80".to_string()),
        Just("line\nbreak".to_string()),
        Just("quote \" and \\ slash".to_string()),
    ]
}

fn body_for(deltas: &[String]) -> Vec<u8> {
    let mut body = String::new();
    for delta in deltas {
        body.push_str(&StreamEvent::text(delta.clone()).to_frame());
    }
    body.push_str("data: [DONE]\n");
    body.into_bytes()
}

fn decode_in_pieces(body: &[u8], cuts: &[usize]) -> Vec<StreamEvent> {
    let mut points: Vec<usize> = cuts.iter().map(|c| c % (body.len() + 1)).collect();
    points.sort_unstable();

    let mut decoder = StreamDecoder::new();
    let mut events = Vec::new();
    let mut start = 0;
    for point in points {
        events.extend(decoder.feed(&body[start..point]));
        start = point;
    }
    events.extend(decoder.feed(&body[start..]));
    events.extend(decoder.finish());
    events
}

fn concatenated_text(events: &[StreamEvent]) -> String {
    events
        .iter()
        .filter_map(|event| match event {
            StreamEvent::Text { content } => Some(content.as_str()),
            _ => None,
        })
        .collect()
}

proptest! {
    #[test]
    fn split_points_do_not_change_increments(
        deltas in prop::collection::vec(text_strategy(), 0..8),
        cuts in prop::collection::vec(any::<usize>(), 0..6),
    ) {
        let body = body_for(&deltas);
        let whole = decode_chunk(b"", &body);
        prop_assert!(whole.rest.is_empty());

        let pieces = decode_in_pieces(&body, &cuts);
        prop_assert_eq!(&pieces, &whole.events);
    }

    #[test]
    fn decoded_text_is_concatenation_of_deltas(
        deltas in prop::collection::vec(text_strategy(), 0..8),
        cuts in prop::collection::vec(any::<usize>(), 0..6),
    ) {
        let body = body_for(&deltas);
        let events = decode_in_pieces(&body, &cuts);

        prop_assert_eq!(concatenated_text(&events), deltas.concat());
        prop_assert!(events.last().map(|e| e.is_terminal()).unwrap_or(false));
    }

    #[test]
    fn junk_lines_never_hide_valid_frames(
        deltas in prop::collection::vec("[a-z]{1,6}", 1..6),
        junk in prop::collection::vec(prop_oneof![
            Just("data: {broken".to_string()),
            Just(": comment".to_string()),
            Just("event: token".to_string()),
            Just("data: {\"type\":\"mystery\"}".to_string()),
            Just(String::new()),
        ], 1..6),
    ) {
        let mut body = String::new();
        for (i, delta) in deltas.iter().enumerate() {
            body.push_str(&junk[i % junk.len()]);
            body.push('\n');
            body.push_str(&StreamEvent::text(delta.clone()).to_frame());
        }

        let decoded = decode_chunk(b"", body.as_bytes());
        prop_assert_eq!(decoded.events.len(), deltas.len());
        prop_assert_eq!(concatenated_text(&decoded.events), deltas.concat());
    }

    #[test]
    fn store_content_matches_applied_deltas(
        deltas in prop::collection::vec(text_strategy(), 1..8),
    ) {
        let events = decode_chunk(b"", &body_for(&deltas)).events;

        let mut store = MessageStore::new();
        store.append(Message::assistant_open()).unwrap();
        for event in events {
            if let StreamEvent::Text { content } = event {
                store.mutate_open(|m| m.content.push_str(&content)).unwrap();
            }
        }

        prop_assert_eq!(&store.open_message().unwrap().content, &deltas.concat());
    }
}
