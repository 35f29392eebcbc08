//! Hybrid query planning: filter model and score blending.
//!
//! The planner itself lives on the store handle; this module holds the
//! composable pieces: the filter model with its enum validation, the
//! min-max normalized linear blend of the semantic and lexical channels,
//! and the evidence attached to every ranked result.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;

use crate::error::{StoreError, StoreResult};
use crate::types::{Amenities, Location, Place, PlaceId, QuadState, TriState};

/// Amenity fields addressable in a filter.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AmenityField {
    FreeWifi,
    PurchaseRequired,
    Parking,
    CinnamonRolls,
}

impl AmenityField {
    pub fn parse(field: &str) -> Option<Self> {
        match field {
            "free_wifi" => Some(Self::FreeWifi),
            "purchase_required" => Some(Self::PurchaseRequired),
            "parking" => Some(Self::Parking),
            "cinnamon_rolls" => Some(Self::CinnamonRolls),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::FreeWifi => "free_wifi",
            Self::PurchaseRequired => "purchase_required",
            Self::Parking => "parking",
            Self::CinnamonRolls => "cinnamon_rolls",
        }
    }
}

/// One amenity equality condition, validated at construction.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub enum AmenitySelector {
    Tri(AmenityField, TriState),
    Quad(AmenityField, QuadState),
}

impl AmenitySelector {
    /// Parse a `(field, value)` pair from the query surface. Unknown fields
    /// and unknown enum values are validation errors, not empty matches.
    pub fn parse(field: &str, value: &str) -> StoreResult<Self> {
        let parsed_field = AmenityField::parse(field).ok_or_else(|| {
            StoreError::validation(
                "filters.amenities",
                format!("unknown amenity field '{field}'"),
            )
        })?;
        match parsed_field {
            AmenityField::CinnamonRolls => {
                let state = QuadState::parse(value).ok_or_else(|| {
                    StoreError::validation(
                        "filters.amenities",
                        format!("unknown value '{value}' for '{field}' (yes/no/sometimes/unsure)"),
                    )
                })?;
                Ok(Self::Quad(parsed_field, state))
            }
            _ => {
                let state = TriState::parse(value).ok_or_else(|| {
                    StoreError::validation(
                        "filters.amenities",
                        format!("unknown value '{value}' for '{field}' (yes/no/unsure)"),
                    )
                })?;
                Ok(Self::Tri(parsed_field, state))
            }
        }
    }

    pub fn matches(&self, amenities: &Amenities) -> bool {
        match self {
            Self::Tri(AmenityField::FreeWifi, state) => amenities.free_wifi == *state,
            Self::Tri(AmenityField::PurchaseRequired, state) => {
                amenities.purchase_required == *state
            }
            Self::Tri(AmenityField::Parking, state) => amenities.parking == *state,
            Self::Quad(AmenityField::CinnamonRolls, state) => amenities.cinnamon_rolls == *state,
            // A tri selector can only be built for tri fields and vice
            // versa, so the remaining combinations are unreachable.
            _ => false,
        }
    }
}

/// A radius condition around a center point.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct RadiusFilter {
    pub center: Location,
    pub meters: f64,
}

/// Hard filters applied as an intersection against the candidate set.
/// A candidate failing any condition is dropped, never down-ranked.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SearchFilters {
    /// Exact neighborhood equality (case-insensitive).
    pub neighborhood: Option<String>,
    /// Place must carry every listed category.
    pub categories: Vec<String>,
    /// Place must carry every listed tag.
    pub tags: Vec<String>,
    pub amenities: Vec<AmenitySelector>,
    pub radius: Option<RadiusFilter>,
}

impl SearchFilters {
    pub fn none() -> Self {
        Self::default()
    }

    pub fn is_empty(&self) -> bool {
        self.neighborhood.is_none()
            && self.categories.is_empty()
            && self.tags.is_empty()
            && self.amenities.is_empty()
            && self.radius.is_none()
    }

    /// Validate conditions that carry free-form values.
    pub fn validate(&self) -> StoreResult<()> {
        if let Some(radius) = &self.radius {
            radius.center.validate()?;
            if !radius.meters.is_finite() || radius.meters < 0.0 {
                return Err(StoreError::validation(
                    "filters.radius.meters",
                    "must be a non-negative number",
                ));
            }
        }
        Ok(())
    }

    /// Non-spatial conditions; the radius intersection happens against the
    /// geo index, not per row.
    pub fn matches_row(&self, place: &Place) -> bool {
        if let Some(neighborhood) = &self.neighborhood {
            let Some(row_neighborhood) = &place.neighborhood else {
                return false;
            };
            if !row_neighborhood.eq_ignore_ascii_case(neighborhood) {
                return false;
            }
        }
        if !self
            .categories
            .iter()
            .all(|c| place.categories.iter().any(|pc| pc.eq_ignore_ascii_case(c)))
        {
            return false;
        }
        if !self
            .tags
            .iter()
            .all(|t| place.tags.iter().any(|pt| pt.eq_ignore_ascii_case(t)))
        {
            return false;
        }
        self.amenities
            .iter()
            .all(|selector| selector.matches(&place.amenities))
    }
}

/// Per-channel contributions behind a ranked result.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct Evidence {
    /// Raw cosine distance from the semantic channel, when it ran.
    pub semantic_distance: Option<f32>,
    /// Raw BM25 score from the lexical channel, when it contributed.
    pub lexical_score: Option<f32>,
}

/// One hybrid search result.
#[derive(Debug, Clone, PartialEq)]
pub struct RankedPlace {
    pub place_id: PlaceId,
    pub score: f32,
    pub evidence: Evidence,
}

/// Min-max normalize a score map in place. A single-valued (or constant)
/// channel normalizes to 1.0 so it still contributes.
pub(crate) fn normalize_scores(scores: &mut HashMap<PlaceId, f32>) {
    let mut min = f32::MAX;
    let mut max = f32::MIN;
    for &score in scores.values() {
        min = min.min(score);
        max = max.max(score);
    }
    if scores.is_empty() {
        return;
    }
    let range = max - min;
    for score in scores.values_mut() {
        *score = if range < f32::EPSILON {
            1.0
        } else {
            (*score - min) / range
        };
    }
}
