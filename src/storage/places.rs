//! Concurrent place record store.

use dashmap::DashMap;
use std::sync::Arc;

use crate::types::{DerivationState, Place, PlaceId};

/// Keyed store for place rows. Single-row operations are atomic; readers
/// never observe a partially-written row.
#[derive(Clone, Debug, Default)]
pub struct PlaceStore {
    places: Arc<DashMap<PlaceId, Place>>,
}

impl PlaceStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert or replace a row. Returns the previous row, if any.
    pub fn put(&self, place: Place) -> Option<Place> {
        self.places.insert(place.id.clone(), place)
    }

    pub fn get(&self, id: &PlaceId) -> Option<Place> {
        self.places.get(id).map(|entry| entry.clone())
    }

    pub fn contains(&self, id: &PlaceId) -> bool {
        self.places.contains_key(id)
    }

    pub fn remove(&self, id: &PlaceId) -> Option<Place> {
        self.places.remove(id).map(|(_, place)| place)
    }

    /// Apply an in-place update to a row, if present. The closure runs under
    /// the row lock, so it must stay small.
    pub fn update<F: FnOnce(&mut Place)>(&self, id: &PlaceId, apply: F) -> bool {
        match self.places.get_mut(id) {
            Some(mut entry) => {
                apply(&mut entry);
                true
            }
            None => false,
        }
    }

    pub fn len(&self) -> usize {
        self.places.len()
    }

    pub fn is_empty(&self) -> bool {
        self.places.is_empty()
    }

    /// All place ids, sorted for deterministic iteration.
    pub fn ids(&self) -> Vec<PlaceId> {
        let mut ids: Vec<PlaceId> = self.places.iter().map(|e| e.key().clone()).collect();
        ids.sort();
        ids
    }

    /// Ids of rows whose derivation is pending a retry.
    pub fn pending_ids(&self) -> Vec<PlaceId> {
        let mut ids: Vec<PlaceId> = self
            .places
            .iter()
            .filter(|e| e.derivation == DerivationState::Pending)
            .map(|e| e.key().clone())
            .collect();
        ids.sort();
        ids
    }
}
