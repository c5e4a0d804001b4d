use tracing::{debug, error, info};

use cabpool_core::entry::is_trip_id;
use cabpool_core::signature::parse_member_record;
use cabpool_core::{EntryStatus, MatchError, Notification, PoolEntry};

use crate::context::WorkerContext;
use crate::matcher::pool_err;

/// Drop a solo waiter from the pool entirely. Safe to call any number of
/// times, including for riders that were never registered.
pub async fn remove_user(ctx: &WorkerContext, user_id: &str) -> Result<(), MatchError> {
    let members = ctx.pool.all_members().await.map_err(pool_err)?;
    let mine: Vec<String> = members
        .into_iter()
        .filter(|record| parse_member_record(record).is_some_and(|(_, id)| id == user_id))
        .collect();
    if !mine.is_empty() {
        ctx.pool.remove_members(&mine).await.map_err(pool_err)?;
    }
    ctx.pool
        .del_meta(&[user_id.to_string()])
        .await
        .map_err(pool_err)?;
    info!(user_id, records = mine.len(), "rider removed from pool");
    Ok(())
}

/// Splice a rider out of the forming trip that lists them. Collapsing to a
/// single member cancels the trip; otherwise the shrunken trip keeps
/// waiting for companions. Returns the affected trip id, if any.
pub async fn remove_user_from_trip(
    ctx: &WorkerContext,
    user_id: &str,
) -> Result<Option<String>, MatchError> {
    let members = ctx.pool.all_members().await.map_err(pool_err)?;
    for record in members {
        let Some((_, entry_id)) = parse_member_record(&record) else {
            continue;
        };
        if !is_trip_id(entry_id) {
            continue;
        }
        let Some(PoolEntry::Trip(mut trip)) = ctx.pool.get_meta(entry_id).await.map_err(pool_err)?
        else {
            continue;
        };
        let Some(position) = trip.members.iter().position(|m| m.user_id == user_id) else {
            continue;
        };
        let leaving = trip.members.remove(position);

        if trip.members.len() < 2 {
            // Pooling needs two parties; tear the trip down and tell the
            // survivor.
            ctx.pool
                .remove_members(&[record.clone()])
                .await
                .map_err(pool_err)?;
            ctx.pool
                .del_meta(&[trip.trip_id.clone()])
                .await
                .map_err(pool_err)?;
            if let Err(e) = ctx.trips.cancel_trip(&trip.trip_id).await {
                error!(trip_id = %trip.trip_id, "trip cancellation did not reach the store: {e}");
            }
            for survivor in trip.member_ids() {
                let payload = Notification::RiderLeft {
                    trip_id: trip.trip_id.clone(),
                    cancelled_user_id: user_id.to_string(),
                    updated_trip: None,
                };
                if let Err(e) = ctx.bus.publish(survivor, &payload).await {
                    error!(topic = %survivor, "rider-left notification dropped: {e}");
                }
            }
            info!(trip_id = %trip.trip_id, user_id, "trip collapsed and was cancelled");
            return Ok(Some(trip.trip_id));
        }

        trip.passengers -= leaving.passengers;
        trip.luggage -= leaving.luggage;
        trip.status = EntryStatus::Waiting;
        ctx.pool
            .put_meta(&PoolEntry::Trip(trip.clone()))
            .await
            .map_err(pool_err)?;

        let snapshot = match ctx.trips.detach_rider(&trip, user_id).await {
            Ok(snapshot) => snapshot,
            Err(e) => {
                error!(trip_id = %trip.trip_id, "rider detach did not reach the store: {e}");
                None
            }
        };
        for remaining in trip.member_ids() {
            let payload = Notification::RiderLeft {
                trip_id: trip.trip_id.clone(),
                cancelled_user_id: user_id.to_string(),
                updated_trip: snapshot.clone(),
            };
            if let Err(e) = ctx.bus.publish(remaining, &payload).await {
                error!(topic = %remaining, "rider-left notification dropped: {e}");
            }
        }
        info!(trip_id = %trip.trip_id, user_id, riders = trip.members.len(), "rider left forming trip");
        return Ok(Some(trip.trip_id));
    }

    debug!(user_id, "no forming trip lists this rider");
    Ok(None)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::*;
    use cabpool_core::signature::member_record;
    use cabpool_core::{MatchRules, TripEntry, TripMember};

    fn member(user_id: &str, passengers: u32, luggage: u32) -> TripMember {
        TripMember {
            user_id: user_id.to_string(),
            passengers,
            luggage,
            issued_price: 100,
        }
    }

    #[tokio::test]
    async fn removing_a_waiter_is_idempotent() {
        let h = harness(ScriptedRoutes::default());
        h.pool.seed_passenger("u1", &sig("abc"), 1, 1, 150);

        remove_user(&h.ctx, "u1").await.unwrap();
        assert_eq!(h.pool.member_count(), 0);
        assert_eq!(h.pool.meta_count(), 0);

        remove_user(&h.ctx, "u1").await.unwrap();
        assert_eq!(h.pool.member_count(), 0);
        assert_eq!(h.pool.meta_count(), 0);
    }

    #[tokio::test]
    async fn removal_only_touches_the_named_rider() {
        let h = harness(ScriptedRoutes::default());
        h.pool.seed_passenger("u1", &sig("abc"), 1, 1, 150);
        h.pool.seed_passenger("u2", &sig("abd"), 1, 1, 150);

        remove_user(&h.ctx, "u1").await.unwrap();

        assert!(h.pool.has_member(&member_record(&sig("abd"), "u2")));
        assert_eq!(h.pool.meta_count(), 1);
    }

    #[tokio::test]
    async fn leaving_a_larger_trip_shrinks_it() {
        // Caps wide enough for a three-member trip to still be forming.
        let rules = MatchRules {
            max_passengers: 5,
            luggage_capacity: 8,
            ..MatchRules::default()
        };
        let h = harness_with_rules(ScriptedRoutes::default(), rules);
        h.pool.seed_trip(TripEntry {
            trip_id: "TRIPgrp".into(),
            route: sig("abc"),
            members: vec![member("u1", 1, 1), member("u2", 1, 2), member("u3", 1, 1)],
            passengers: 3,
            luggage: 4,
            status: cabpool_core::EntryStatus::Waiting,
            fare_each: 45,
        });

        let trip_id = remove_user_from_trip(&h.ctx, "u2").await.unwrap();
        assert_eq!(trip_id.as_deref(), Some("TRIPgrp"));

        let trips = h.pool.trip_entries();
        assert_eq!(trips.len(), 1);
        assert_eq!(trips[0].passengers, 2);
        assert_eq!(trips[0].luggage, 2);
        let ids: Vec<&str> = trips[0].member_ids().collect();
        assert_eq!(ids, vec!["u1", "u3"]);
        // Still matchable.
        assert!(h.pool.has_member(&member_record(&sig("abc"), "TRIPgrp")));

        let detached = h.trips.detached.lock().unwrap();
        assert_eq!(detached.as_slice(), &[("TRIPgrp".to_string(), "u2".to_string())]);

        let mut topics = h.bus.topics();
        topics.sort();
        assert_eq!(topics, vec!["u1".to_string(), "u3".to_string()]);
        for (_, payload) in h.bus.published.lock().unwrap().iter() {
            assert!(matches!(
                payload,
                Notification::RiderLeft {
                    updated_trip: Some(_),
                    ..
                }
            ));
        }
    }

    #[tokio::test]
    async fn collapsing_trip_is_cancelled() {
        let h = harness(ScriptedRoutes::default());
        h.pool.seed_trip(TripEntry {
            trip_id: "TRIPpair".into(),
            route: sig("abc"),
            members: vec![member("u1", 1, 1), member("u2", 1, 1)],
            passengers: 2,
            luggage: 2,
            status: cabpool_core::EntryStatus::Waiting,
            fare_each: 45,
        });

        let trip_id = remove_user_from_trip(&h.ctx, "u1").await.unwrap();
        assert_eq!(trip_id.as_deref(), Some("TRIPpair"));

        assert_eq!(h.pool.member_count(), 0);
        assert_eq!(h.pool.meta_count(), 0);
        assert_eq!(
            h.trips.cancelled.lock().unwrap().as_slice(),
            &["TRIPpair".to_string()]
        );

        let published = h.bus.published.lock().unwrap();
        assert_eq!(published.len(), 1);
        assert_eq!(published[0].0, "u2");
        assert!(matches!(
            &published[0].1,
            Notification::RiderLeft {
                cancelled_user_id,
                updated_trip: None,
                ..
            } if cancelled_user_id == "u1"
        ));
    }

    #[tokio::test]
    async fn unknown_rider_is_a_no_op() {
        let h = harness(ScriptedRoutes::default());
        h.pool.seed_passenger("u1", &sig("abc"), 1, 1, 150);

        let trip_id = remove_user_from_trip(&h.ctx, "nobody").await.unwrap();

        assert!(trip_id.is_none());
        assert!(h.bus.topics().is_empty());
        assert!(h.trips.cancelled.lock().unwrap().is_empty());
    }
}
