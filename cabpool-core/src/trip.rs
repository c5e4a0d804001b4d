use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Durable trip lifecycle. `Waiting` and `Active` mirror the pool entry
/// statuses; `Completed` and `Cancelled` only ever exist in the database.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TripStatus {
    Waiting,
    Active,
    Completed,
    Cancelled,
}

impl std::fmt::Display for TripStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            TripStatus::Waiting => "WAITING",
            TripStatus::Active => "ACTIVE",
            TripStatus::Completed => "COMPLETED",
            TripStatus::Cancelled => "CANCELLED",
        };
        f.write_str(s)
    }
}

impl std::str::FromStr for TripStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "WAITING" => Ok(TripStatus::Waiting),
            "ACTIVE" => Ok(TripStatus::Active),
            "COMPLETED" => Ok(TripStatus::Completed),
            "CANCELLED" => Ok(TripStatus::Cancelled),
            other => Err(format!("unknown trip status: {other}")),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DriverSnapshot {
    pub driver_id: Uuid,
    pub name: String,
    pub phone: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CabSnapshot {
    pub cab_id: Uuid,
    pub plate: String,
    pub seats: i32,
    pub luggage_capacity: i32,
    pub driver: Option<DriverSnapshot>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RideRequestSnapshot {
    pub user_id: String,
    pub rider_name: Option<String>,
    pub no_of_passengers: i32,
    pub luggage_capacity: i32,
    pub issued_price: i64,
    pub status: String,
    pub joined_at: DateTime<Utc>,
}

/// The durable view of a trip, re-read after a commit and attached to match
/// results and notifications.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TripSnapshot {
    pub trip_id: String,
    pub status: TripStatus,
    pub fare_each: i64,
    pub no_of_passengers: i32,
    pub total_luggage: i32,
    pub cab: Option<CabSnapshot>,
    pub riders: Vec<RideRequestSnapshot>,
    pub created_at: DateTime<Utc>,
}
