//! Integration tests for the citation retriever and its cache: recency
//! ordering, snapshot staleness, the live fallback, and place-restricted
//! semantic lookups.

mod common;

use chrono::{TimeZone, Utc};

use common::test_store;
use placemark::{ChunkWrite, PlaceId, PlaceWrite, StoreError};

fn seed_reviews(store: &placemark::RetrievalStore) {
    store
        .upsert_place(
            PlaceWrite::new("p1", "Night Swan Coffee")
                .with_neighborhood("NoDa")
                .with_tags(["coffee"]),
        )
        .unwrap();
    store
        .upsert_place(PlaceWrite::new("p2", "Brass Rail").with_tags(["bar"]))
        .unwrap();

    let days = [
        ("r1", 3, "Espresso here is the best in the neighborhood."),
        ("r2", 10, "Plenty of outlets and calm weekday mornings."),
        ("r3", 6, "Pastries sell out early on Saturdays."),
        ("r4", 21, "Parking fills up fast during events."),
    ];
    for (review, day, text) in days {
        store
            .append_chunk(ChunkWrite::new(
                "p1",
                review,
                0,
                text,
                Utc.with_ymd_and_hms(2025, 4, day, 9, 0, 0).unwrap(),
            ))
            .unwrap();
    }
    store
        .append_chunk(ChunkWrite::new(
            "p2",
            "r9",
            0,
            "Great espresso martinis at the bar.",
            Utc.with_ymd_and_hms(2025, 4, 30, 9, 0, 0).unwrap(),
        ))
        .unwrap();
    store.flush();
}

#[test]
fn refreshed_cache_serves_recent_first() {
    let store = test_store();
    seed_reviews(&store);

    let cached = store.refresh_citation_cache();
    assert_eq!(cached, 5);
    assert_eq!(store.stats().cached_citations, 5);

    let citations = store.get_citations(&PlaceId::new("p1"), "", 3).unwrap();
    assert_eq!(citations.len(), 3);
    let texts: Vec<&str> = citations.iter().map(|c| c.text.as_str()).collect();
    assert_eq!(
        texts,
        vec![
            "Parking fills up fast during events.",
            "Plenty of outlets and calm weekday mornings.",
            "Pastries sell out early on Saturdays.",
        ]
    );
}

#[test]
fn cache_is_stale_until_the_next_refresh() {
    let store = test_store();
    seed_reviews(&store);
    store.refresh_citation_cache();

    // A newer chunk lands after the snapshot was built.
    store
        .append_chunk(ChunkWrite::new(
            "p1",
            "r5",
            0,
            "New rooftop seating just opened.",
            Utc.with_ymd_and_hms(2025, 5, 15, 9, 0, 0).unwrap(),
        ))
        .unwrap();
    store.flush();

    // Readers keep seeing the prior snapshot; that staleness is part of
    // the contract.
    let stale = store.get_citations(&PlaceId::new("p1"), "", 1).unwrap();
    assert_eq!(stale[0].text, "Parking fills up fast during events.");

    store.refresh_citation_cache();
    let fresh = store.get_citations(&PlaceId::new("p1"), "", 1).unwrap();
    assert_eq!(fresh[0].text, "New rooftop seating just opened.");
}

#[test]
fn live_fallback_serves_before_any_refresh() {
    let store = test_store();
    seed_reviews(&store);

    // No snapshot has ever been built; the retriever reads the live stores.
    assert_eq!(store.stats().cached_citations, 0);
    let citations = store.get_citations(&PlaceId::new("p1"), "", 2).unwrap();
    assert_eq!(citations.len(), 2);
    assert_eq!(citations[0].text, "Parking fills up fast during events.");
}

#[test]
fn fallback_covers_places_newer_than_the_snapshot() {
    let store = test_store();
    seed_reviews(&store);
    store.refresh_citation_cache();

    store
        .upsert_place(PlaceWrite::new("p3", "Fresh Opening"))
        .unwrap();
    store
        .append_chunk(ChunkWrite::new(
            "p3",
            "r1",
            0,
            "Soft opening went smoothly.",
            Utc::now(),
        ))
        .unwrap();
    store.flush();

    // p3 is absent from the snapshot, so the lookup falls back to live data.
    let citations = store.get_citations(&PlaceId::new("p3"), "", 5).unwrap();
    assert_eq!(citations.len(), 1);
    assert_eq!(citations[0].text, "Soft opening went smoothly.");
}

#[test]
fn query_citations_stay_within_the_place() {
    let store = test_store();
    seed_reviews(&store);

    // "espresso" appears in a p1 review and a p2 review; only p1's may
    // surface for p1.
    let citations = store
        .get_citations(&PlaceId::new("p1"), "espresso", 5)
        .unwrap();
    assert!(!citations.is_empty());
    assert!(
        citations
            .iter()
            .any(|c| c.text.contains("Espresso here is the best")),
        "expected the espresso review, got {citations:?}"
    );
    assert!(citations.iter().all(|c| !c.text.contains("martinis")));
}

#[test]
fn query_citations_rank_by_relevance() {
    let store = test_store();
    seed_reviews(&store);

    let citations = store
        .get_citations(&PlaceId::new("p1"), "parking during events", 2)
        .unwrap();
    assert!(!citations.is_empty());
    assert_eq!(citations[0].text, "Parking fills up fast during events.");
}

#[test]
fn unknown_place_is_a_validation_error() {
    let store = test_store();
    let err = store
        .get_citations(&PlaceId::new("ghost"), "", 3)
        .unwrap_err();
    assert!(matches!(err, StoreError::Validation { .. }));
}

#[test]
fn zero_limit_returns_nothing() {
    let store = test_store();
    seed_reviews(&store);
    assert!(store
        .get_citations(&PlaceId::new("p1"), "", 0)
        .unwrap()
        .is_empty());
}

#[test]
fn place_without_chunks_yields_empty_citations() {
    let store = test_store();
    store
        .upsert_place(PlaceWrite::new("lonely", "No Reviews Yet"))
        .unwrap();

    assert!(store
        .get_citations(&PlaceId::new("lonely"), "", 5)
        .unwrap()
        .is_empty());
    assert!(store
        .get_citations(&PlaceId::new("lonely"), "anything", 5)
        .unwrap()
        .is_empty());
}
