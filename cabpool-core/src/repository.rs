use async_trait::async_trait;
use thiserror::Error;

use crate::entry::{PoolEntry, TripEntry};
use crate::matching::GeoPoint;
use crate::notify::Notification;
use crate::signature::RouteSignature;
use crate::trip::TripSnapshot;

/// Error surface shared by the store adapters.
pub type StoreError = Box<dyn std::error::Error + Send + Sync>;

/// The shared pool: per-entry metadata plus one lex-ordered set of
/// `signature::entry_id` membership records. Every mutation is atomic at
/// the single-call level; multi-call sequences in the engine are written to
/// be retry-safe on top of that.
#[async_trait]
pub trait PoolStore: Send + Sync {
    /// Idempotent metadata overwrite, keyed by the entry id.
    async fn put_meta(&self, entry: &PoolEntry) -> Result<(), StoreError>;

    async fn get_meta(&self, entry_id: &str) -> Result<Option<PoolEntry>, StoreError>;

    /// Batched delete; absent keys are ignored.
    async fn del_meta(&self, entry_ids: &[String]) -> Result<(), StoreError>;

    async fn add_member(&self, member: &str) -> Result<(), StoreError>;

    /// Batched removal returning how many records were actually removed.
    /// The matching commit hinges on that count.
    async fn remove_members(&self, members: &[String]) -> Result<u32, StoreError>;

    /// Members whose record begins with `prefix`, in lex order, capped.
    async fn scan_prefix(&self, prefix: &str, limit: usize) -> Result<Vec<String>, StoreError>;

    /// Up to `limit` members strictly before `pivot`, closest first.
    async fn predecessors(&self, pivot: &str, limit: usize) -> Result<Vec<String>, StoreError>;

    /// Up to `limit` members strictly after `pivot`, closest first.
    async fn successors(&self, pivot: &str, limit: usize) -> Result<Vec<String>, StoreError>;

    /// Full scan, used only by cleanup paths.
    async fn all_members(&self) -> Result<Vec<String>, StoreError>;
}

/// The durable side of a pairing. Implementations wrap every multi-row
/// write in one interactive transaction.
#[async_trait]
pub trait TripStore: Send + Sync {
    /// Persist a committed pairing. `joining_user` is the rider whose match
    /// request triggered the commit; `extends_existing` says whether the
    /// consumed peer was already a trip (in which case the trip row is
    /// updated in place, with a full rebuild as fallback when the row is
    /// missing).
    ///
    /// Returns `None` when the joining user has no account row; the
    /// transaction is rolled back in that case.
    async fn persist_pairing(
        &self,
        trip: &TripEntry,
        joining_user: &str,
        extends_existing: bool,
    ) -> Result<Option<TripSnapshot>, StoreError>;

    /// Cancel a trip outright: trip row, its ride requests, and any booked
    /// cab are released.
    async fn cancel_trip(&self, trip_id: &str) -> Result<(), StoreError>;

    /// One member left a forming trip. `trip` carries the already-shrunken
    /// totals to write through.
    async fn detach_rider(
        &self,
        trip: &TripEntry,
        user_id: &str,
    ) -> Result<Option<TripSnapshot>, StoreError>;
}

/// Best-effort fan-out to per-passenger topics. Failures are logged by the
/// caller and never retried.
#[async_trait]
pub trait NotificationBus: Send + Sync {
    async fn publish(&self, topic: &str, payload: &Notification) -> Result<(), StoreError>;
}

#[derive(Debug, Error)]
pub enum RouteServiceError {
    #[error("routing backend unavailable: {0}")]
    Unavailable(String),
    #[error("no drivable route to the destination")]
    NoRoute,
    #[error("invalid coordinate: {0}")]
    InvalidCoordinate(String),
}

/// A route linearized into comparable form.
#[derive(Debug, Clone)]
pub struct ComputedRoute {
    pub signature: RouteSignature,
    pub destination_cell: String,
    pub cells: Vec<String>,
    pub total_km: f64,
}

/// Road geometry and distances, backed by the external directions API.
#[async_trait]
pub trait RouteService: Send + Sync {
    /// Linearize the drive from the airport to `destination`.
    async fn compute_route(&self, destination: GeoPoint)
        -> Result<ComputedRoute, RouteServiceError>;

    /// Driving distance in metres between two cell centres.
    async fn driving_distance_m(
        &self,
        from_cell: &str,
        to_cell: &str,
    ) -> Result<f64, RouteServiceError>;
}
