use serde::{Deserialize, Serialize};

use crate::trip::TripSnapshot;

/// A plain latitude/longitude pair as received from the transport layer.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct GeoPoint {
    pub lat: f64,
    pub lng: f64,
}

/// What a passenger asks for when they request a ride.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RideIntent {
    pub destination: GeoPoint,
    pub passengers: u32,
    pub luggage: u32,
}

/// How a match was found, if one was found at all.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum MatchResult {
    /// No compatible entry in the pool; the caller stays registered.
    None,
    /// One route contains the other, so the cab serves both without leaving
    /// its path.
    Direct { peer: String },
    /// The routes diverge, but the detour from the divergence cell to the
    /// peer's destination is within the configured bound.
    BestDetour {
        peer: String,
        detour_m: f64,
        split_cell: String,
    },
}

impl MatchResult {
    pub fn is_none(&self) -> bool {
        matches!(self, MatchResult::None)
    }
}

/// The engine's answer to a match request. On a successful pairing the
/// committed trip id is always present; the snapshot is absent when the
/// durable write failed and reconciliation is pending.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MatchOutcome {
    pub result: MatchResult,
    pub trip_id: Option<String>,
    pub trip: Option<TripSnapshot>,
}

impl MatchOutcome {
    pub fn unmatched() -> Self {
        Self {
            result: MatchResult::None,
            trip_id: None,
            trip: None,
        }
    }
}
