//! Property-based tests for frame parsing and accumulation

use super::*;
use proptest::prelude::*;

fn arb_separator() -> impl Strategy<Value = &'static str> {
    prop_oneof![
        Just(""),
        Just(" "),
        Just("data: "),
        Just("\ndata:"),
        Just("data:data: "),
    ]
}

/// Deltas of one reply plus how they are split into frames
fn arb_reply() -> impl Strategy<Value = (Vec<String>, Vec<usize>, Vec<&'static str>)> {
    proptest::collection::vec("\\PC{0,12}", 1..12).prop_flat_map(|deltas| {
        let n = deltas.len();
        (
            Just(deltas),
            proptest::collection::vec(1usize..4, n),
            proptest::collection::vec(arb_separator(), n),
        )
    })
}

/// Serialize the deltas as `stream` events closed by an `end`, grouping
/// `sizes[i]` objects into frame `i` joined by `separators[i]`
fn frames_for(deltas: &[String], sizes: &[usize], separators: &[&str]) -> Vec<SseFrame> {
    let last = deltas.len() - 1;
    let objects: Vec<String> = deltas
        .iter()
        .enumerate()
        .map(|(i, delta)| {
            let event = if i == last {
                StreamEvent::End(delta.clone())
            } else {
                StreamEvent::Stream(delta.clone())
            };
            serde_json::to_string(&event).unwrap()
        })
        .collect();

    let mut frames = Vec::new();
    let mut start = 0;
    for (size, separator) in sizes.iter().zip(separators) {
        if start >= objects.len() {
            break;
        }
        let end = (start + size).min(objects.len());
        frames.push(SseFrame::message(objects[start..end].join(separator)));
        start = end;
    }
    frames
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(300))]

    // However a reply is framed, the finalized content is every delta in order
    #[test]
    fn prop_finalized_is_concatenation((deltas, sizes, separators) in arb_reply()) {
        let mut consumer = StreamConsumer::new(1);
        let mut published = String::new();
        let mut finalized = None;

        for frame in frames_for(&deltas, &sizes, &separators) {
            let ParsedFrame::Events(events) = parse_frame(&frame) else {
                return Err(TestCaseError::fail(format!("Frame not parsed: {frame:?}")));
            };
            for event in events {
                match consumer.dispatch(event) {
                    Dispatch::Publish(content) => {
                        prop_assert!(content.starts_with(published.as_str()));
                        published = content;
                    }
                    Dispatch::Finalize(content) => finalized = Some(content),
                    other => return Err(TestCaseError::fail(format!("Unexpected dispatch: {other:?}"))),
                }
            }
        }

        prop_assert_eq!(finalized, Some(deltas.concat()));
    }

    // Every object of a frame comes back, in order
    #[test]
    fn prop_frame_keeps_event_order((deltas, _sizes, separators) in arb_reply()) {
        let objects: Vec<String> = deltas
            .iter()
            .map(|d| serde_json::to_string(&StreamEvent::Stream(d.clone())).unwrap())
            .collect();
        let frame = SseFrame::message(objects.join(separators[0]));
        let expected: Vec<StreamEvent> = deltas.into_iter().map(StreamEvent::Stream).collect();
        prop_assert_eq!(parse_frame(&frame), ParsedFrame::Events(expected));
    }
}
