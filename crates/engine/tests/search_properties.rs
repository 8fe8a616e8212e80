//! Index search agrees with a linear scan over the stored models

mod common;

use common::*;
use gitstore_engine::{SearchMode, SearchParam};
use proptest::prelude::*;
use std::collections::BTreeSet;

fn mode() -> impl Strategy<Value = SearchMode> {
    prop_oneof![
        Just(SearchMode::Equals),
        Just(SearchMode::Contains),
        Just(SearchMode::StartsWith),
        Just(SearchMode::EndsWith),
    ]
}

fn scan(models: &[Message], query: &str, mode: SearchMode) -> BTreeSet<String> {
    let q = query.to_lowercase();
    models
        .iter()
        .filter(|m| {
            let from = m.from.to_lowercase();
            match mode {
                SearchMode::Equals => from == q,
                SearchMode::Contains => from.contains(&q),
                SearchMode::StartsWith => from.starts_with(&q),
                SearchMode::EndsWith => from.ends_with(&q),
            }
        })
        .map(|m| m.meta.id.clone())
        .collect()
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(12))]

    #[test]
    fn test_search_matches_linear_scan(
        senders in prop::collection::vec("[a-cA-C]{1,4}", 1..8),
        query in "[a-cA-C]{0,3}",
        mode in mode(),
    ) {
        let store = open_store();
        let mut models: Vec<Message> = senders.iter().map(|s| Message::new(s)).collect();
        for m in models.iter_mut() {
            store.conn.insert(m).unwrap();
        }

        let found: BTreeSet<String> = store
            .conn
            .search_raw("Message", &[SearchParam::new("From", query.clone())], mode)
            .unwrap()
            .iter()
            .map(|r| r.id().to_string())
            .collect();
        prop_assert_eq!(found, scan(&models, &query, mode));
    }
}
