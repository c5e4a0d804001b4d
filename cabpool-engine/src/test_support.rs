//! In-memory fakes of the store seams so the matching paths can be
//! exercised without Redis, Postgres, or the network.

use std::collections::{BTreeSet, HashMap};
use std::ops::Bound;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use chrono::Utc;

use cabpool_core::signature::{member_record, CELL_WIDTH};
use cabpool_core::{
    ComputedRoute, EntryStatus, GeoPoint, MatchRules, Notification, NotificationBus,
    PassengerEntry, PoolEntry, PoolStore, RideRequestSnapshot, RouteService, RouteServiceError,
    RouteSignature, StoreError, TripEntry, TripSnapshot, TripStatus, TripStore,
};

use crate::context::WorkerContext;

/// Synthetic cell id: one ASCII letter repeated to the cell width.
pub fn cell(c: char) -> String {
    c.to_string().repeat(CELL_WIDTH)
}

/// Signature from one letter per cell, e.g. `sig("abc")`.
pub fn sig(cells: &str) -> RouteSignature {
    RouteSignature::from_cells(cells.chars().map(cell)).unwrap()
}

pub fn computed(cells: &str, total_km: f64) -> ComputedRoute {
    let signature = sig(cells);
    ComputedRoute {
        destination_cell: signature.destination_cell().to_string(),
        cells: signature.cells().map(str::to_string).collect(),
        total_km,
        signature,
    }
}

#[derive(Default)]
struct PoolState {
    members: BTreeSet<String>,
    meta: HashMap<String, PoolEntry>,
}

/// A `BTreeSet`-backed stand-in for the lex-ordered pool.
///
/// `steal_on_get` emulates a concurrent worker claiming an entry between
/// the scan and the removal: the named membership record disappears the
/// moment the entry's metadata is read.
#[derive(Default)]
pub struct MemoryPool {
    state: Mutex<PoolState>,
    pub steal_on_get: Mutex<Option<(String, String)>>,
}

impl MemoryPool {
    pub fn has_member(&self, record: &str) -> bool {
        self.state.lock().unwrap().members.contains(record)
    }

    pub fn member_count(&self) -> usize {
        self.state.lock().unwrap().members.len()
    }

    pub fn meta_count(&self) -> usize {
        self.state.lock().unwrap().meta.len()
    }

    pub fn trip_entries(&self) -> Vec<TripEntry> {
        self.state
            .lock()
            .unwrap()
            .meta
            .values()
            .filter_map(|entry| match entry {
                PoolEntry::Trip(t) => Some(t.clone()),
                PoolEntry::Passenger(_) => None,
            })
            .collect()
    }

    /// Seed a waiting rider as if they had registered earlier.
    pub fn seed_passenger(&self, user_id: &str, route: &RouteSignature, passengers: u32, luggage: u32, price: i64) {
        let entry = PassengerEntry {
            user_id: user_id.to_string(),
            route: route.clone(),
            passengers,
            luggage,
            status: EntryStatus::Waiting,
            issued_price: price,
        };
        let mut state = self.state.lock().unwrap();
        state.members.insert(member_record(route, user_id));
        state.meta.insert(user_id.to_string(), PoolEntry::Passenger(entry));
    }

    /// Seed a forming trip with a membership record.
    pub fn seed_trip(&self, trip: TripEntry) {
        let mut state = self.state.lock().unwrap();
        state
            .members
            .insert(member_record(&trip.route, &trip.trip_id));
        state
            .meta
            .insert(trip.trip_id.clone(), PoolEntry::Trip(trip));
    }

    /// Seed a membership record without metadata (a stale record).
    pub fn seed_member_only(&self, record: &str) {
        self.state.lock().unwrap().members.insert(record.to_string());
    }
}

#[async_trait]
impl PoolStore for MemoryPool {
    async fn put_meta(&self, entry: &PoolEntry) -> Result<(), StoreError> {
        self.state
            .lock()
            .unwrap()
            .meta
            .insert(entry.entry_id().to_string(), entry.clone());
        Ok(())
    }

    async fn get_meta(&self, entry_id: &str) -> Result<Option<PoolEntry>, StoreError> {
        let mut state = self.state.lock().unwrap();
        let mut steal = self.steal_on_get.lock().unwrap();
        if steal.as_ref().is_some_and(|(id, _)| id == entry_id) {
            let (_, record) = steal.take().expect("checked above");
            state.members.remove(&record);
        }
        Ok(state.meta.get(entry_id).cloned())
    }

    async fn del_meta(&self, entry_ids: &[String]) -> Result<(), StoreError> {
        let mut state = self.state.lock().unwrap();
        for id in entry_ids {
            state.meta.remove(id);
        }
        Ok(())
    }

    async fn add_member(&self, member: &str) -> Result<(), StoreError> {
        self.state.lock().unwrap().members.insert(member.to_string());
        Ok(())
    }

    async fn remove_members(&self, members: &[String]) -> Result<u32, StoreError> {
        let mut state = self.state.lock().unwrap();
        let mut removed = 0;
        for member in members {
            if state.members.remove(member) {
                removed += 1;
            }
        }
        Ok(removed)
    }

    async fn scan_prefix(&self, prefix: &str, limit: usize) -> Result<Vec<String>, StoreError> {
        let state = self.state.lock().unwrap();
        Ok(state
            .members
            .range(prefix.to_string()..)
            .take_while(|m| m.starts_with(prefix))
            .take(limit)
            .cloned()
            .collect())
    }

    async fn predecessors(&self, pivot: &str, limit: usize) -> Result<Vec<String>, StoreError> {
        let state = self.state.lock().unwrap();
        Ok(state
            .members
            .range(..pivot.to_string())
            .rev()
            .take(limit)
            .cloned()
            .collect())
    }

    async fn successors(&self, pivot: &str, limit: usize) -> Result<Vec<String>, StoreError> {
        let state = self.state.lock().unwrap();
        Ok(state
            .members
            .range((Bound::Excluded(pivot.to_string()), Bound::Unbounded))
            .take(limit)
            .cloned()
            .collect())
    }

    async fn all_members(&self) -> Result<Vec<String>, StoreError> {
        Ok(self.state.lock().unwrap().members.iter().cloned().collect())
    }
}

/// Records durable writes; can be told to fail the pairing persist.
#[derive(Default)]
pub struct RecordingTrips {
    pub persisted: Mutex<Vec<(TripEntry, String, bool)>>,
    pub cancelled: Mutex<Vec<String>>,
    pub detached: Mutex<Vec<(String, String)>>,
    pub fail_persist: AtomicBool,
}

pub fn snapshot_of(trip: &TripEntry) -> TripSnapshot {
    let status = match trip.status {
        EntryStatus::Waiting => TripStatus::Waiting,
        EntryStatus::Active => TripStatus::Active,
    };
    TripSnapshot {
        trip_id: trip.trip_id.clone(),
        status,
        fare_each: trip.fare_each,
        no_of_passengers: trip.passengers as i32,
        total_luggage: trip.luggage as i32,
        cab: None,
        riders: trip
            .members
            .iter()
            .map(|m| RideRequestSnapshot {
                user_id: m.user_id.clone(),
                rider_name: None,
                no_of_passengers: m.passengers as i32,
                luggage_capacity: m.luggage as i32,
                issued_price: trip.fare_each,
                status: status.to_string(),
                joined_at: Utc::now(),
            })
            .collect(),
        created_at: Utc::now(),
    }
}

#[async_trait]
impl TripStore for RecordingTrips {
    async fn persist_pairing(
        &self,
        trip: &TripEntry,
        joining_user: &str,
        extends_existing: bool,
    ) -> Result<Option<TripSnapshot>, StoreError> {
        if self.fail_persist.load(Ordering::Relaxed) {
            return Err("trip store is down".into());
        }
        self.persisted.lock().unwrap().push((
            trip.clone(),
            joining_user.to_string(),
            extends_existing,
        ));
        Ok(Some(snapshot_of(trip)))
    }

    async fn cancel_trip(&self, trip_id: &str) -> Result<(), StoreError> {
        self.cancelled.lock().unwrap().push(trip_id.to_string());
        Ok(())
    }

    async fn detach_rider(
        &self,
        trip: &TripEntry,
        user_id: &str,
    ) -> Result<Option<TripSnapshot>, StoreError> {
        self.detached
            .lock()
            .unwrap()
            .push((trip.trip_id.clone(), user_id.to_string()));
        Ok(Some(snapshot_of(trip)))
    }
}

#[derive(Default)]
pub struct RecordingBus {
    pub published: Mutex<Vec<(String, Notification)>>,
}

impl RecordingBus {
    pub fn topics(&self) -> Vec<String> {
        self.published
            .lock()
            .unwrap()
            .iter()
            .map(|(topic, _)| topic.clone())
            .collect()
    }
}

#[async_trait]
impl NotificationBus for RecordingBus {
    async fn publish(&self, topic: &str, payload: &Notification) -> Result<(), StoreError> {
        self.published
            .lock()
            .unwrap()
            .push((topic.to_string(), payload.clone()));
        Ok(())
    }
}

/// Route service answering from scripted tables.
#[derive(Default)]
pub struct ScriptedRoutes {
    routes: HashMap<String, ComputedRoute>,
    detours: HashMap<(String, String), f64>,
    pub fail: AtomicBool,
}

fn destination_key(point: GeoPoint) -> String {
    format!("{:.4}:{:.4}", point.lat, point.lng)
}

impl ScriptedRoutes {
    pub fn with_route(mut self, destination: GeoPoint, route: ComputedRoute) -> Self {
        self.routes.insert(destination_key(destination), route);
        self
    }

    pub fn with_detour(mut self, from_cell: &str, to_cell: &str, metres: f64) -> Self {
        self.detours
            .insert((from_cell.to_string(), to_cell.to_string()), metres);
        self
    }
}

#[async_trait]
impl RouteService for ScriptedRoutes {
    async fn compute_route(
        &self,
        destination: GeoPoint,
    ) -> Result<ComputedRoute, RouteServiceError> {
        if self.fail.load(Ordering::Relaxed) {
            return Err(RouteServiceError::Unavailable("directions down".into()));
        }
        self.routes
            .get(&destination_key(destination))
            .cloned()
            .ok_or(RouteServiceError::NoRoute)
    }

    async fn driving_distance_m(
        &self,
        from_cell: &str,
        to_cell: &str,
    ) -> Result<f64, RouteServiceError> {
        Ok(self
            .detours
            .get(&(from_cell.to_string(), to_cell.to_string()))
            .copied()
            .unwrap_or(f64::MAX))
    }
}

/// A worker context wired to fakes, with handles kept for assertions.
pub struct Harness {
    pub pool: Arc<MemoryPool>,
    pub trips: Arc<RecordingTrips>,
    pub bus: Arc<RecordingBus>,
    pub ctx: WorkerContext,
}

pub fn harness(routes: ScriptedRoutes) -> Harness {
    harness_with_rules(routes, MatchRules::default())
}

pub fn harness_with_rules(routes: ScriptedRoutes, rules: MatchRules) -> Harness {
    let pool = Arc::new(MemoryPool::default());
    let trips = Arc::new(RecordingTrips::default());
    let bus = Arc::new(RecordingBus::default());
    let routes = Arc::new(routes);
    let ctx = WorkerContext {
        pool: pool.clone(),
        trips: trips.clone(),
        bus: bus.clone(),
        routes,
        rules,
    };
    Harness {
        pool,
        trips,
        bus,
        ctx,
    }
}
