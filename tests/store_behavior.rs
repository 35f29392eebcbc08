//! Integration tests for the store's write path and core invariants:
//! derived-field determinism, idempotent upserts, chunk immutability, the
//! no-PII boundary, the radius boundary rule, and pending-row recovery.

mod common;

use chrono::{TimeZone, Utc};
use serde_json::json;

use common::{flaky_store, test_store};
use placemark::index::geo::haversine_m;
use placemark::{
    Amenities, ChunkWrite, DerivationState, Location, PlaceId, PlaceWrite, StoreError, TriState,
};

fn cafe(place_id: &str, name: &str) -> PlaceWrite {
    PlaceWrite::new(place_id, name)
        .with_neighborhood("NoDa")
        .with_categories(["Coffee Shop"])
        .with_tags(["quiet", "wifi"])
        .with_payload(json!({"description": "A calm spot for laptops and books."}))
}

#[test]
fn upsert_derives_a_self_consistent_row() {
    let store = test_store();
    let place = store.upsert_place(cafe("p1", "Night Swan Coffee")).unwrap();

    assert_eq!(place.derivation, DerivationState::Current);
    assert!(place.embedding.is_some());
    assert_eq!(place.lexical_document.name, "night swan coffee");
    assert_eq!(place.lexical_document.classification, "quiet wifi coffee shop");
    assert_eq!(
        place.lexical_document.description,
        "a calm spot for laptops and books."
    );

    // The committed row is identical to the returned one.
    let stored = store.get_place(&PlaceId::new("p1")).unwrap();
    assert_eq!(stored.lexical_document, place.lexical_document);
    assert_eq!(stored.embedding, place.embedding);
}

#[test]
fn lexical_document_is_deterministic_across_places() {
    let store = test_store();
    let a = store.upsert_place(cafe("p1", "Same Name")).unwrap();
    let b = store.upsert_place(cafe("p2", "Same Name")).unwrap();
    assert_eq!(a.lexical_document, b.lexical_document);
}

#[test]
fn upsert_is_idempotent() {
    let store = test_store();
    let first = store.upsert_place(cafe("p1", "Night Swan Coffee")).unwrap();
    let second = store.upsert_place(cafe("p1", "Night Swan Coffee")).unwrap();

    assert_eq!(store.all_place_ids().len(), 1);
    assert_eq!(first.lexical_document, second.lexical_document);
    assert_eq!(first.embedding, second.embedding);
    assert_eq!(first.created_at, second.created_at);
    let stats = store.stats();
    assert_eq!(stats.places, 1);
    assert_eq!(stats.place_vectors, 1);
}

#[test]
fn payload_is_overwritten_not_merged() {
    let store = test_store();
    store
        .upsert_place(
            PlaceWrite::new("p1", "Night Swan Coffee")
                .with_payload(json!({"description": "old", "rating": 4.6})),
        )
        .unwrap();
    let updated = store
        .upsert_place(
            PlaceWrite::new("p1", "Night Swan Coffee")
                .with_payload(json!({"description": "new"})),
        )
        .unwrap();

    assert_eq!(updated.enriched_payload, json!({"description": "new"}));
    assert!(updated.enriched_payload.get("rating").is_none());
}

#[test]
fn duplicate_chunk_conflicts_and_replace_supersedes() {
    let store = test_store();
    store.upsert_place(cafe("p1", "Night Swan Coffee")).unwrap();
    let when = Utc.with_ymd_and_hms(2025, 3, 1, 9, 0, 0).unwrap();

    let original = store
        .append_chunk(ChunkWrite::new("p1", "r1", 0, "Great pour-overs.", when))
        .unwrap();

    let err = store
        .append_chunk(ChunkWrite::new("p1", "r1", 0, "Repeat ingest.", when))
        .unwrap_err();
    assert!(matches!(err, StoreError::Conflict { .. }));

    // The original text is untouched by the failed append.
    let citations = store.get_citations(&PlaceId::new("p1"), "", 5).unwrap();
    assert_eq!(citations.len(), 1);
    assert_eq!(citations[0].text, "Great pour-overs.");

    let replaced = store
        .replace_chunk(ChunkWrite::new("p1", "r1", 0, "Corrected text.", when))
        .unwrap();
    assert_ne!(replaced.id, original.id);
    let citations = store.get_citations(&PlaceId::new("p1"), "", 5).unwrap();
    assert_eq!(citations.len(), 1);
    assert_eq!(citations[0].text, "Corrected text.");
}

#[test]
fn chunk_with_reviewer_identity_is_rejected() {
    let store = test_store();
    store.upsert_place(cafe("p1", "Night Swan Coffee")).unwrap();
    let when = Utc::now();

    for field in ["reviewer_name", "profileUrl", "username"] {
        let mut write = ChunkWrite::new("p1", "r1", 0, "Nice place.", when);
        write
            .extra
            .insert(field.to_string(), json!("leaked identity"));
        let err = store.append_chunk(write).unwrap_err();
        assert!(
            matches!(err, StoreError::Validation { .. }),
            "field {field} should be rejected"
        );
    }
    assert_eq!(store.stats().chunks, 0);
}

#[test]
fn chunk_for_unknown_place_is_rejected() {
    let store = test_store();
    let err = store
        .append_chunk(ChunkWrite::new("ghost", "r1", 0, "Orphan.", Utc::now()))
        .unwrap_err();
    assert!(err.to_string().contains("unknown place"));
}

#[test]
fn radius_boundary_is_inclusive_through_the_store() {
    let store = test_store();
    let center = Location::new(35.2271, -80.8431);
    let nearby = Location::new(35.2331, -80.8431);
    store
        .upsert_place(
            PlaceWrite::new("edge", "Edge Case Cafe").with_location(nearby.latitude, nearby.longitude),
        )
        .unwrap();
    store
        .upsert_place(PlaceWrite::new("nowhere", "No Location Listed"))
        .unwrap();

    let exact = haversine_m(center, nearby);
    let at_boundary = store.within_radius(center, exact).unwrap();
    assert_eq!(at_boundary, vec![PlaceId::new("edge")]);

    let short = store.within_radius(center, exact - 1.0).unwrap();
    assert!(short.is_empty());

    // Places with unknown location never match, and never error.
    let wide = store.within_radius(center, 1_000_000.0).unwrap();
    assert_eq!(wide, vec![PlaceId::new("edge")]);
}

#[test]
fn fuzzy_match_survives_accents_and_typos() {
    let store = test_store();
    store
        .upsert_place(PlaceWrite::new("p1", "Amélie's"))
        .unwrap();
    store
        .upsert_place(PlaceWrite::new("p2", "Night Swan Coffee"))
        .unwrap();

    let matches = store.fuzzy_match("Amelies", Some(0.3));
    assert_eq!(matches.len(), 1);
    assert_eq!(matches[0].0, PlaceId::new("p1"));

    // The configured default threshold applies when none is given.
    let defaulted = store.fuzzy_match("Amelies", None);
    assert_eq!(defaulted.first().map(|m| m.0.clone()), Some(PlaceId::new("p1")));
}

#[test]
fn embedding_failure_marks_pending_and_sweep_recovers() {
    let (store, provider) = flaky_store(true);

    // The write is not blocked by the failing provider.
    let place = store.upsert_place(cafe("p1", "Night Swan Coffee")).unwrap();
    assert_eq!(place.derivation, DerivationState::Pending);
    assert!(place.embedding.is_none());

    let when = Utc.with_ymd_and_hms(2025, 3, 1, 9, 0, 0).unwrap();
    let chunk = store
        .append_chunk(ChunkWrite::new("p1", "r1", 0, "Cozy corner seats.", when))
        .unwrap();
    assert_eq!(chunk.derivation, DerivationState::Pending);

    let stats = store.stats();
    assert_eq!(stats.pending_places, 1);
    assert_eq!(stats.pending_chunks, 1);
    assert_eq!(stats.place_vectors, 0);

    // Service comes back; the sweep reprocesses every pending row.
    provider.set_failing(false);
    let report = store.run_pending_sweep();
    assert_eq!(report.places_recovered, 1);
    assert_eq!(report.chunks_recovered, 1);
    assert_eq!(report.places_still_pending, 0);

    let stats = store.stats();
    assert_eq!(stats.pending_places, 0);
    assert_eq!(stats.pending_chunks, 0);
    assert_eq!(stats.place_vectors, 1);
    assert_eq!(stats.chunk_vectors, 1);
    assert_eq!(
        store.get_place(&PlaceId::new("p1")).unwrap().derivation,
        DerivationState::Current
    );
}

#[test]
fn reindex_repairs_a_single_place() {
    let (store, provider) = flaky_store(true);
    store.upsert_place(cafe("p1", "Night Swan Coffee")).unwrap();
    provider.set_failing(false);

    let repaired = store.reindex(&PlaceId::new("p1")).unwrap();
    assert_eq!(repaired.derivation, DerivationState::Current);
    assert!(repaired.embedding.is_some());
    assert_eq!(store.stats().place_vectors, 1);

    let err = store.reindex(&PlaceId::new("ghost")).unwrap_err();
    assert!(matches!(err, StoreError::Validation { .. }));
}

#[test]
fn delete_place_cascades_to_chunks_and_indexes() {
    let store = test_store();
    store
        .upsert_place(cafe("p1", "Night Swan Coffee").with_location(35.22, -80.84))
        .unwrap();
    let when = Utc::now();
    store
        .append_chunk(ChunkWrite::new("p1", "r1", 0, "One.", when))
        .unwrap();
    store
        .append_chunk(ChunkWrite::new("p1", "r1", 1, "Two.", when))
        .unwrap();
    store.flush();

    assert!(store.delete_place(&PlaceId::new("p1")));
    assert!(!store.delete_place(&PlaceId::new("p1")));

    let stats = store.stats();
    assert_eq!(stats.places, 0);
    assert_eq!(stats.chunks, 0);
    assert_eq!(stats.place_vectors, 0);
    assert_eq!(stats.chunk_vectors, 0);
    assert!(store.fuzzy_match("Night Swan", Some(0.3)).is_empty());
    assert!(store
        .within_radius(Location::new(35.22, -80.84), 5_000.0)
        .unwrap()
        .is_empty());
}

#[test]
fn malformed_arrays_and_amenity_states_round_trip() {
    let store = test_store();
    // Nested array rejected before any write.
    let bad = PlaceWrite {
        tags: vec![json!(["nested"])],
        ..PlaceWrite::new("p1", "Bad Arrays")
    };
    assert!(store.upsert_place(bad).is_err());
    assert!(store.get_place(&PlaceId::new("p1")).is_none());

    // Typed amenity states survive the round trip.
    let place = store
        .upsert_place(
            PlaceWrite::new("p2", "Wifi Cafe").with_amenities(Amenities {
                free_wifi: TriState::Yes,
                purchase_required: TriState::No,
                ..Amenities::default()
            }),
        )
        .unwrap();
    assert_eq!(place.amenities.free_wifi, TriState::Yes);
    assert_eq!(place.amenities.purchase_required, TriState::No);
}
