use chatrelay_core::model::StreamItem;
use chatrelay_llm::chunked::ChunkReassembler;
use proptest::prelude::*;

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

/// Build a streamed-array body the way `streamGenerateContent` frames it.
fn streamed_body(texts: &[String]) -> Vec<u8> {
    let objects: Vec<String> = texts
        .iter()
        .map(|text| {
            serde_json::json!({
                "candidates": [{"content": {"parts": [{"text": text}], "role": "model"}}]
            })
            .to_string()
        })
        .collect();
    format!("[{}]", objects.join("\n,\r\n")).into_bytes()
}

/// Feed `body` split at the given (sorted, deduplicated) offsets.
fn feed(body: &[u8], cuts: &[usize]) -> Vec<StreamItem> {
    let mut reassembler = ChunkReassembler::new();
    let mut items = Vec::new();
    let mut prev = 0;
    for &cut in cuts.iter().chain(std::iter::once(&body.len())) {
        items.extend(reassembler.push(&body[prev..cut]));
        prev = cut;
    }
    reassembler.finish();
    items
}

fn normalize_cuts(mut cuts: Vec<usize>, len: usize) -> Vec<usize> {
    for cut in cuts.iter_mut() {
        *cut %= len + 1;
    }
    cuts.sort_unstable();
    cuts.dedup();
    cuts
}

/// Text values that exercise braces, quotes, escapes, and multi-byte chars.
fn tricky_text() -> impl Strategy<Value = String> {
    prop::collection::vec(
        prop_oneof![
            Just("{".to_string()),
            Just("}".to_string()),
            Just("\"".to_string()),
            Just("\\".to_string()),
            Just("\n".to_string()),
            Just(",".to_string()),
            Just("é".to_string()),
            Just("日本".to_string()),
            "[a-z ]{0,4}",
        ],
        0..8,
    )
    .prop_map(|pieces| pieces.concat())
}

// ---------------------------------------------------------------------------
// Property-based tests
// ---------------------------------------------------------------------------

proptest! {
    // Delivering the body in arbitrary chunks yields the same fragments as
    // delivering it whole.
    #[test]
    fn chunking_invariance(
        texts in prop::collection::vec(tricky_text(), 0..6),
        cuts in prop::collection::vec(any::<usize>(), 0..12),
    ) {
        let body = streamed_body(&texts);
        let cuts = normalize_cuts(cuts, body.len());

        let whole = feed(&body, &[]);
        let split = feed(&body, &cuts);
        prop_assert_eq!(&whole, &split);
    }

    // Every non-empty text comes out exactly once and in order.
    #[test]
    fn fragments_match_source_texts(
        texts in prop::collection::vec(tricky_text(), 0..6),
        cuts in prop::collection::vec(any::<usize>(), 0..12),
    ) {
        let body = streamed_body(&texts);
        let cuts = normalize_cuts(cuts, body.len());

        let expected: Vec<StreamItem> = texts
            .iter()
            .filter(|t| !t.is_empty())
            .map(|t| StreamItem::Text(t.clone()))
            .collect();
        prop_assert_eq!(feed(&body, &cuts), expected);
    }

    // Byte-at-a-time delivery is the most fragmented split possible.
    #[test]
    fn byte_at_a_time(texts in prop::collection::vec(tricky_text(), 1..4)) {
        let body = streamed_body(&texts);
        let cuts: Vec<usize> = (1..body.len()).collect();
        prop_assert_eq!(feed(&body, &cuts), feed(&body, &[]));
    }

    // A truncated final object yields nothing for that object and never panics.
    #[test]
    fn truncated_tail_is_dropped(
        texts in prop::collection::vec("[a-z]{1,5}", 1..4),
        keep in 1usize..20,
    ) {
        let mut body = streamed_body(&texts);
        // Remove the closing `]` and part of the last object.
        body.pop();
        let last_len = serde_json::json!({
            "candidates": [{"content": {"parts": [{"text": texts.last().unwrap()}], "role": "model"}}]
        })
        .to_string()
        .len();
        let cut = body.len() - last_len + keep.min(last_len - 1);
        body.truncate(cut);

        let expected: Vec<StreamItem> = texts[..texts.len() - 1]
            .iter()
            .map(|t| StreamItem::Text(t.clone()))
            .collect();
        prop_assert_eq!(feed(&body, &[]), expected);
    }
}
