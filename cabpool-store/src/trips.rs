use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::{Postgres, Transaction};
use tracing::{info, warn};
use uuid::Uuid;

use cabpool_core::{
    CabSnapshot, DriverSnapshot, EntryStatus, RideRequestSnapshot, StoreError, TripEntry,
    TripMember, TripSnapshot, TripStatus, TripStore,
};

use crate::database::DbClient;

#[derive(sqlx::FromRow)]
struct TripRow {
    #[allow(dead_code)]
    id: String,
    status: String,
    fare_each: i64,
    no_of_passengers: i32,
    total_luggage: i32,
    cab_id: Option<Uuid>,
    created_at: DateTime<Utc>,
}

#[derive(sqlx::FromRow)]
struct CabRow {
    id: Uuid,
    driver_id: Option<Uuid>,
    plate: String,
    seats: i32,
    luggage_capacity: i32,
}

#[derive(sqlx::FromRow)]
struct DriverRow {
    id: Uuid,
    name: String,
    phone: String,
}

#[derive(sqlx::FromRow)]
struct RideRequestRow {
    user_id: String,
    rider_name: Option<String>,
    no_of_passengers: i32,
    luggage_capacity: i32,
    issued_price: i64,
    status: String,
    joined_at: DateTime<Utc>,
}

fn entry_status(status: EntryStatus) -> TripStatus {
    match status {
        EntryStatus::Waiting => TripStatus::Waiting,
        EntryStatus::Active => TripStatus::Active,
    }
}

/// Transaction-scoped writes against the trip tables. Every public method
/// takes the caller's open transaction; nothing here commits.
pub struct TripRepository;

impl TripRepository {
    pub async fn user_exists(
        tx: &mut Transaction<'_, Postgres>,
        user_id: &str,
    ) -> Result<bool, sqlx::Error> {
        let found: Option<String> = sqlx::query_scalar("SELECT id FROM users WHERE id = $1")
            .bind(user_id)
            .fetch_optional(&mut **tx)
            .await?;
        Ok(found.is_some())
    }

    /// Smallest available cab that fits the whole trip. Assignment is
    /// optional; a trip may persist without one.
    pub async fn find_available_cab(
        tx: &mut Transaction<'_, Postgres>,
        seats: i32,
        luggage: i32,
    ) -> Result<Option<Uuid>, sqlx::Error> {
        let cab: Option<Uuid> = sqlx::query_scalar(
            r#"
            SELECT id FROM cabs
            WHERE status = 'AVAILABLE' AND seats >= $1 AND luggage_capacity >= $2
            ORDER BY seats ASC, luggage_capacity ASC
            LIMIT 1
            "#,
        )
        .bind(seats)
        .bind(luggage)
        .fetch_optional(&mut **tx)
        .await?;
        Ok(cab)
    }

    pub async fn trip_exists(
        tx: &mut Transaction<'_, Postgres>,
        trip_id: &str,
    ) -> Result<bool, sqlx::Error> {
        let found: Option<String> = sqlx::query_scalar("SELECT id FROM trips WHERE id = $1")
            .bind(trip_id)
            .fetch_optional(&mut **tx)
            .await?;
        Ok(found.is_some())
    }

    pub async fn insert_trip(
        tx: &mut Transaction<'_, Postgres>,
        trip: &TripEntry,
        status: TripStatus,
        cab_id: Option<Uuid>,
    ) -> Result<(), sqlx::Error> {
        sqlx::query(
            r#"
            INSERT INTO trips (id, status, fare_each, no_of_passengers, total_luggage, cab_id, created_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7)
            "#,
        )
        .bind(&trip.trip_id)
        .bind(status.to_string())
        .bind(trip.fare_each)
        .bind(trip.passengers as i32)
        .bind(trip.luggage as i32)
        .bind(cab_id)
        .bind(Utc::now())
        .execute(&mut **tx)
        .await?;
        Ok(())
    }

    pub async fn update_trip(
        tx: &mut Transaction<'_, Postgres>,
        trip: &TripEntry,
        status: TripStatus,
        cab_id: Option<Uuid>,
    ) -> Result<(), sqlx::Error> {
        sqlx::query(
            r#"
            UPDATE trips
            SET status = $1, fare_each = $2, no_of_passengers = $3, total_luggage = $4, cab_id = $5
            WHERE id = $6
            "#,
        )
        .bind(status.to_string())
        .bind(trip.fare_each)
        .bind(trip.passengers as i32)
        .bind(trip.luggage as i32)
        .bind(cab_id)
        .bind(&trip.trip_id)
        .execute(&mut **tx)
        .await?;
        Ok(())
    }

    pub async fn ride_request_exists(
        tx: &mut Transaction<'_, Postgres>,
        trip_id: &str,
        user_id: &str,
    ) -> Result<bool, sqlx::Error> {
        let found: Option<Uuid> = sqlx::query_scalar(
            "SELECT id FROM ride_requests WHERE trip_id = $1 AND user_id = $2",
        )
        .bind(trip_id)
        .bind(user_id)
        .fetch_optional(&mut **tx)
        .await?;
        Ok(found.is_some())
    }

    pub async fn insert_ride_request(
        tx: &mut Transaction<'_, Postgres>,
        trip_id: &str,
        member: &TripMember,
        fare: i64,
        status: TripStatus,
    ) -> Result<(), sqlx::Error> {
        sqlx::query(
            r#"
            INSERT INTO ride_requests (id, trip_id, user_id, no_of_passengers, luggage_capacity, issued_price, status, joined_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8)
            "#,
        )
        .bind(Uuid::new_v4())
        .bind(trip_id)
        .bind(&member.user_id)
        .bind(member.passengers as i32)
        .bind(member.luggage as i32)
        .bind(fare)
        .bind(status.to_string())
        .bind(Utc::now())
        .execute(&mut **tx)
        .await?;
        Ok(())
    }

    /// Pushes the trip's current status and fare down to every ride request
    /// already attached to it.
    pub async fn cascade_ride_requests(
        tx: &mut Transaction<'_, Postgres>,
        trip_id: &str,
        status: TripStatus,
        fare: i64,
    ) -> Result<(), sqlx::Error> {
        sqlx::query(
            "UPDATE ride_requests SET status = $1, issued_price = $2 WHERE trip_id = $3",
        )
        .bind(status.to_string())
        .bind(fare)
        .bind(trip_id)
        .execute(&mut **tx)
        .await?;
        Ok(())
    }

    pub async fn cascade_ride_requests_status_only(
        tx: &mut Transaction<'_, Postgres>,
        trip_id: &str,
        status: TripStatus,
    ) -> Result<(), sqlx::Error> {
        sqlx::query("UPDATE ride_requests SET status = $1 WHERE trip_id = $2")
            .bind(status.to_string())
            .bind(trip_id)
            .execute(&mut **tx)
            .await?;
        Ok(())
    }

    pub async fn set_cab_status(
        tx: &mut Transaction<'_, Postgres>,
        cab_id: Uuid,
        status: &str,
    ) -> Result<(), sqlx::Error> {
        sqlx::query("UPDATE cabs SET status = $1 WHERE id = $2")
            .bind(status)
            .bind(cab_id)
            .execute(&mut **tx)
            .await?;
        Ok(())
    }
}

/// Durable trip persistence over Postgres.
#[derive(Clone)]
pub struct PgTripStore {
    db: DbClient,
}

impl PgTripStore {
    pub fn new(db: DbClient) -> Self {
        Self { db }
    }

    /// Insert the trip row and one ride request per member, skipping
    /// members whose user rows are missing (the joining user was already
    /// verified by the caller).
    async fn insert_trip_with_members(
        tx: &mut Transaction<'_, Postgres>,
        trip: &TripEntry,
        status: TripStatus,
        cab_id: Option<Uuid>,
    ) -> Result<(), sqlx::Error> {
        TripRepository::insert_trip(tx, trip, status, cab_id).await?;
        for member in &trip.members {
            if !TripRepository::user_exists(tx, &member.user_id).await? {
                warn!(user_id = %member.user_id, "skipping ride request for unknown user");
                continue;
            }
            TripRepository::insert_ride_request(tx, &trip.trip_id, member, trip.fare_each, status)
                .await?;
        }
        Ok(())
    }

    pub async fn load_snapshot(&self, trip_id: &str) -> Result<Option<TripSnapshot>, sqlx::Error> {
        let trip: Option<TripRow> = sqlx::query_as(
            r#"
            SELECT id, status, fare_each, no_of_passengers, total_luggage, cab_id, created_at
            FROM trips WHERE id = $1
            "#,
        )
        .bind(trip_id)
        .fetch_optional(&self.db.pool)
        .await?;

        let Some(trip) = trip else {
            return Ok(None);
        };

        let cab = match trip.cab_id {
            Some(cab_id) => {
                let cab: Option<CabRow> = sqlx::query_as(
                    "SELECT id, driver_id, plate, seats, luggage_capacity FROM cabs WHERE id = $1",
                )
                .bind(cab_id)
                .fetch_optional(&self.db.pool)
                .await?;
                match cab {
                    Some(cab) => {
                        let driver = match cab.driver_id {
                            Some(driver_id) => {
                                let driver: Option<DriverRow> = sqlx::query_as(
                                    "SELECT id, name, phone FROM drivers WHERE id = $1",
                                )
                                .bind(driver_id)
                                .fetch_optional(&self.db.pool)
                                .await?;
                                driver.map(|d| DriverSnapshot {
                                    driver_id: d.id,
                                    name: d.name,
                                    phone: d.phone,
                                })
                            }
                            None => None,
                        };
                        Some(CabSnapshot {
                            cab_id: cab.id,
                            plate: cab.plate,
                            seats: cab.seats,
                            luggage_capacity: cab.luggage_capacity,
                            driver,
                        })
                    }
                    None => None,
                }
            }
            None => None,
        };

        let riders: Vec<RideRequestRow> = sqlx::query_as(
            r#"
            SELECT r.user_id, u.name AS rider_name, r.no_of_passengers, r.luggage_capacity,
                   r.issued_price, r.status, r.joined_at
            FROM ride_requests r
            LEFT JOIN users u ON u.id = r.user_id
            WHERE r.trip_id = $1
            ORDER BY r.joined_at ASC
            "#,
        )
        .bind(trip_id)
        .fetch_all(&self.db.pool)
        .await?;

        let status: TripStatus = trip
            .status
            .parse()
            .map_err(|e: String| sqlx::Error::Decode(e.into()))?;

        Ok(Some(TripSnapshot {
            trip_id: trip_id.to_string(),
            status,
            fare_each: trip.fare_each,
            no_of_passengers: trip.no_of_passengers,
            total_luggage: trip.total_luggage,
            cab,
            riders: riders
                .into_iter()
                .map(|r| RideRequestSnapshot {
                    user_id: r.user_id,
                    rider_name: r.rider_name,
                    no_of_passengers: r.no_of_passengers,
                    luggage_capacity: r.luggage_capacity,
                    issued_price: r.issued_price,
                    status: r.status,
                    joined_at: r.joined_at,
                })
                .collect(),
            created_at: trip.created_at,
        }))
    }
}

#[async_trait]
impl TripStore for PgTripStore {
    async fn persist_pairing(
        &self,
        trip: &TripEntry,
        joining_user: &str,
        extends_existing: bool,
    ) -> Result<Option<TripSnapshot>, StoreError> {
        let status = entry_status(trip.status);
        let mut tx = self.db.pool.begin().await?;

        if !TripRepository::user_exists(&mut tx, joining_user).await? {
            warn!(user_id = %joining_user, "joining user has no account row, aborting persist");
            tx.rollback().await?;
            return Ok(None);
        }

        let cab_id = TripRepository::find_available_cab(
            &mut tx,
            trip.passengers as i32,
            trip.luggage as i32,
        )
        .await?;

        if extends_existing {
            if TripRepository::trip_exists(&mut tx, &trip.trip_id).await? {
                if TripRepository::ride_request_exists(&mut tx, &trip.trip_id, joining_user)
                    .await?
                {
                    // Same caller persisted into the same trip twice; the
                    // first write already did everything below.
                    tx.commit().await?;
                    return Ok(self.load_snapshot(&trip.trip_id).await?);
                }
                let joining = trip
                    .members
                    .iter()
                    .find(|m| m.user_id == joining_user)
                    .cloned()
                    .ok_or_else(|| {
                        StoreError::from(format!(
                            "user {joining_user} is not a member of trip {}",
                            trip.trip_id
                        ))
                    })?;
                TripRepository::insert_ride_request(
                    &mut tx,
                    &trip.trip_id,
                    &joining,
                    trip.fare_each,
                    status,
                )
                .await?;
                TripRepository::update_trip(&mut tx, trip, status, cab_id).await?;
                TripRepository::cascade_ride_requests(
                    &mut tx,
                    &trip.trip_id,
                    status,
                    trip.fare_each,
                )
                .await?;
            } else {
                // The pool advanced past a durable write that never landed;
                // rebuild the row and backfill the earlier members.
                warn!(trip_id = %trip.trip_id, "trip row missing on extend, rebuilding");
                Self::insert_trip_with_members(&mut tx, trip, status, cab_id).await?;
            }
        } else {
            Self::insert_trip_with_members(&mut tx, trip, status, cab_id).await?;
        }

        if status == TripStatus::Active {
            if let Some(cab_id) = cab_id {
                TripRepository::set_cab_status(&mut tx, cab_id, "BOOKED").await?;
            }
        }

        tx.commit().await?;
        info!(trip_id = %trip.trip_id, status = %status, "trip persisted");

        Ok(self.load_snapshot(&trip.trip_id).await?)
    }

    async fn cancel_trip(&self, trip_id: &str) -> Result<(), StoreError> {
        let mut tx = self.db.pool.begin().await?;

        let cab_id: Option<Option<Uuid>> =
            sqlx::query_scalar("SELECT cab_id FROM trips WHERE id = $1")
                .bind(trip_id)
                .fetch_optional(&mut *tx)
                .await?;
        let Some(cab_id) = cab_id else {
            // Nothing durable to cancel; the pairing never landed.
            tx.rollback().await?;
            return Ok(());
        };

        sqlx::query("UPDATE trips SET status = 'CANCELLED' WHERE id = $1")
            .bind(trip_id)
            .execute(&mut *tx)
            .await?;
        TripRepository::cascade_ride_requests_status_only(&mut tx, trip_id, TripStatus::Cancelled)
            .await?;
        if let Some(cab_id) = cab_id {
            TripRepository::set_cab_status(&mut tx, cab_id, "AVAILABLE").await?;
        }

        tx.commit().await?;
        info!(trip_id = %trip_id, "trip cancelled");
        Ok(())
    }

    async fn detach_rider(
        &self,
        trip: &TripEntry,
        user_id: &str,
    ) -> Result<Option<TripSnapshot>, StoreError> {
        let status = entry_status(trip.status);
        let mut tx = self.db.pool.begin().await?;

        sqlx::query(
            "UPDATE ride_requests SET status = 'CANCELLED' WHERE trip_id = $1 AND user_id = $2",
        )
        .bind(&trip.trip_id)
        .bind(user_id)
        .execute(&mut *tx)
        .await?;

        sqlx::query(
            r#"
            UPDATE trips
            SET status = $1, fare_each = $2, no_of_passengers = $3, total_luggage = $4
            WHERE id = $5
            "#,
        )
        .bind(status.to_string())
        .bind(trip.fare_each)
        .bind(trip.passengers as i32)
        .bind(trip.luggage as i32)
        .bind(&trip.trip_id)
        .execute(&mut *tx)
        .await?;

        tx.commit().await?;
        Ok(self.load_snapshot(&trip.trip_id).await?)
    }
}
