use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::signature::RouteSignature;

/// Entry ids beginning with this literal denote forming trips; anything else
/// is a waiting passenger. The two shapes never share an id.
pub const TRIP_ID_PREFIX: &str = "TRIP";

pub fn mint_trip_id() -> String {
    format!("{}{}", TRIP_ID_PREFIX, Uuid::new_v4())
}

pub fn is_trip_id(entry_id: &str) -> bool {
    entry_id.starts_with(TRIP_ID_PREFIX)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum EntryStatus {
    /// Still open for pooling.
    Waiting,
    /// Sealed: a capacity bound is exactly met, no further joins.
    Active,
}

/// A single waiting passenger in the pool.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PassengerEntry {
    pub user_id: String,
    pub route: RouteSignature,
    pub passengers: u32,
    pub luggage: u32,
    pub status: EntryStatus,
    /// Fare quoted at registration, before any pooling discount.
    pub issued_price: i64,
}

/// One passenger folded into a forming trip, with the metadata they carried
/// when they were still a standalone entry.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TripMember {
    pub user_id: String,
    pub passengers: u32,
    pub luggage: u32,
    pub issued_price: i64,
}

/// A forming (or just-sealed) trip in the pool.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TripEntry {
    pub trip_id: String,
    pub route: RouteSignature,
    /// Join order is preserved; the first member is the trip's founder.
    pub members: Vec<TripMember>,
    pub passengers: u32,
    pub luggage: u32,
    pub status: EntryStatus,
    /// Current per-passenger fare after pooling discounts.
    pub fare_each: i64,
}

impl TripEntry {
    pub fn member_ids(&self) -> impl Iterator<Item = &str> {
        self.members.iter().map(|m| m.user_id.as_str())
    }

    pub fn contains_user(&self, user_id: &str) -> bool {
        self.members.iter().any(|m| m.user_id == user_id)
    }
}

/// Everything stored under a metadata key in the pool. The two shapes live
/// in the same keyspace and are told apart by the tag, never by probing for
/// fields.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum PoolEntry {
    Passenger(PassengerEntry),
    Trip(TripEntry),
}

impl PoolEntry {
    pub fn entry_id(&self) -> &str {
        match self {
            PoolEntry::Passenger(p) => &p.user_id,
            PoolEntry::Trip(t) => &t.trip_id,
        }
    }

    pub fn route(&self) -> &RouteSignature {
        match self {
            PoolEntry::Passenger(p) => &p.route,
            PoolEntry::Trip(t) => &t.route,
        }
    }

    pub fn passengers(&self) -> u32 {
        match self {
            PoolEntry::Passenger(p) => p.passengers,
            PoolEntry::Trip(t) => t.passengers,
        }
    }

    pub fn luggage(&self) -> u32 {
        match self {
            PoolEntry::Passenger(p) => p.luggage,
            PoolEntry::Trip(t) => t.luggage,
        }
    }

    /// The price the pooling discount anchors on at the next join.
    pub fn issued_price(&self) -> i64 {
        match self {
            PoolEntry::Passenger(p) => p.issued_price,
            PoolEntry::Trip(t) => t.fare_each,
        }
    }

    pub fn is_trip(&self) -> bool {
        matches!(self, PoolEntry::Trip(_))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::signature::CELL_WIDTH;

    fn route() -> RouteSignature {
        RouteSignature::new("a".repeat(CELL_WIDTH)).unwrap()
    }

    #[test]
    fn trip_ids_carry_the_prefix() {
        let id = mint_trip_id();
        assert!(is_trip_id(&id));
        assert!(!is_trip_id("rider-1"));
    }

    #[test]
    fn entries_serialize_with_a_shape_tag() {
        let entry = PoolEntry::Passenger(PassengerEntry {
            user_id: "u1".into(),
            route: route(),
            passengers: 1,
            luggage: 2,
            status: EntryStatus::Waiting,
            issued_price: 120,
        });
        let json = serde_json::to_value(&entry).unwrap();
        assert_eq!(json["kind"], "passenger");
        assert_eq!(json["status"], "WAITING");

        let trip = PoolEntry::Trip(TripEntry {
            trip_id: mint_trip_id(),
            route: route(),
            members: vec![],
            passengers: 2,
            luggage: 2,
            status: EntryStatus::Active,
            fare_each: 36,
        });
        let json = serde_json::to_value(&trip).unwrap();
        assert_eq!(json["kind"], "trip");

        let back: PoolEntry = serde_json::from_value(json).unwrap();
        assert!(back.is_trip());
    }
}
