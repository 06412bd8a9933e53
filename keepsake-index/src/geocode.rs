//! Geocoder interface
//!
//! The real geocoder (place name to bounding box) is an external
//! collaborator; the search core only depends on this trait. The stub
//! serves tests and offline deployments.

use keepsake_core::{Cancel, KeepsakeResult, LocationConstraint};
use std::collections::HashMap;

/// A geographic bounding box, degrees.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BoundingBox {
    pub north: f64,
    pub south: f64,
    pub east: f64,
    pub west: f64,
}

impl BoundingBox {
    pub fn to_constraint(self) -> LocationConstraint {
        LocationConstraint::in_box(self.north, self.south, self.east, self.west)
    }
}

/// Place-name resolution.
pub trait Geocoder: Send + Sync {
    /// Resolve a place name. `Ok(None)` means the name is unknown.
    fn lookup(&self, cancel: &Cancel, place: &str) -> KeepsakeResult<Option<BoundingBox>>;
}

/// Table-backed geocoder for tests; lookups are case-insensitive.
#[derive(Debug, Default)]
pub struct StubGeocoder {
    boxes: HashMap<String, BoundingBox>,
}

impl StubGeocoder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, place: &str, bbox: BoundingBox) {
        self.boxes.insert(place.to_lowercase(), bbox);
    }
}

impl Geocoder for StubGeocoder {
    fn lookup(&self, cancel: &Cancel, place: &str) -> KeepsakeResult<Option<BoundingBox>> {
        cancel.err_if_cancelled()?;
        Ok(self.boxes.get(&place.to_lowercase()).copied())
    }
}
