//! Domain model and seams for the airport cab-pooling matcher.
//!
//! Everything a matching worker touches is defined here: route signatures,
//! pool entries, match results, pricing, notification payloads, and the
//! traits implemented by the infrastructure adapters.

pub mod entry;
pub mod error;
pub mod matching;
pub mod notify;
pub mod pricing;
pub mod repository;
pub mod rules;
pub mod signature;
pub mod trip;

pub use entry::{EntryStatus, PassengerEntry, PoolEntry, TripEntry, TripMember};
pub use error::MatchError;
pub use matching::{GeoPoint, MatchOutcome, MatchResult, RideIntent};
pub use notify::Notification;
pub use repository::{
    ComputedRoute, NotificationBus, PoolStore, RouteService, RouteServiceError, StoreError,
    TripStore,
};
pub use rules::MatchRules;
pub use signature::RouteSignature;
pub use trip::{CabSnapshot, DriverSnapshot, RideRequestSnapshot, TripSnapshot, TripStatus};
