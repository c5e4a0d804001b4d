use tracing::{debug, error, info, warn};

use cabpool_core::entry::{is_trip_id, mint_trip_id};
use cabpool_core::signature::{member_record, parse_member_record};
use cabpool_core::{
    pricing, EntryStatus, MatchError, MatchOutcome, MatchResult, Notification, PassengerEntry,
    PoolEntry, RideIntent, RouteSignature, TripEntry, TripMember, TripSnapshot,
};

use crate::context::WorkerContext;

pub(crate) fn pool_err(e: cabpool_core::StoreError) -> MatchError {
    MatchError::PoolUnavailable(e.to_string())
}

/// How the winning candidate was found.
enum PairBasis {
    Direct,
    Detour { detour_m: f64, split_cell: String },
}

/// A pairing that has passed its pool-side commit point.
struct CommittedPair {
    result: MatchResult,
    trip_id: String,
    snapshot: Option<TripSnapshot>,
    notifications: Vec<(String, Notification)>,
}

/// Serve one match request end to end: register the rider, search the pool
/// for an overlap- or detour-based companion, and on success commit the
/// pairing and notify the other side.
pub async fn match_ride(
    ctx: &WorkerContext,
    user_id: &str,
    intent: &RideIntent,
) -> Result<MatchOutcome, MatchError> {
    let rules = &ctx.rules;

    if intent.passengers == 0 {
        return Err(MatchError::RequestTooLarge(
            "at least one passenger is required".into(),
        ));
    }
    if intent.passengers > rules.max_passengers || intent.luggage > rules.luggage_capacity {
        return Err(MatchError::RequestTooLarge(format!(
            "{} passengers / {} luggage exceed the {}/{} caps",
            intent.passengers, intent.luggage, rules.max_passengers, rules.luggage_capacity
        )));
    }

    let route = ctx
        .routes
        .compute_route(intent.destination)
        .await
        .map_err(|e| MatchError::IndexerUnavailable(e.to_string()))?;

    let caller = PassengerEntry {
        user_id: user_id.to_string(),
        route: route.signature.clone(),
        passengers: intent.passengers,
        luggage: intent.luggage,
        status: EntryStatus::Waiting,
        issued_price: pricing::base_fare(route.total_km, rules.rate_per_km),
    };
    let caller_member = member_record(&caller.route, user_id);

    // Register before scanning so concurrent requesters can see this rider.
    ctx.pool
        .put_meta(&PoolEntry::Passenger(caller.clone()))
        .await
        .map_err(pool_err)?;
    ctx.pool.add_member(&caller_member).await.map_err(pool_err)?;
    info!(user_id, cells = route.cells.len(), price = caller.issued_price, "rider registered");

    // Candidates whose route contains the caller's: drop the caller off on
    // the way.
    let supersets = ctx
        .pool
        .scan_prefix(caller.route.as_str(), rules.neighbour_scan_limit)
        .await
        .map_err(pool_err)?;
    for record in &supersets {
        let Some((_, entry_id)) = parse_member_record(record) else {
            continue;
        };
        if entry_id == user_id {
            continue;
        }
        if let Some(committed) = try_pair(ctx, &caller, entry_id, PairBasis::Direct).await? {
            return Ok(finish(ctx, committed).await);
        }
    }

    // Lex neighbourhood for the remaining steps; the caller and forming
    // trips are filtered out up front.
    let mut neighbours: Vec<(String, String)> = Vec::new();
    let before = ctx
        .pool
        .predecessors(caller.route.as_str(), rules.neighbour_scan_limit)
        .await
        .map_err(pool_err)?;
    let after = ctx
        .pool
        .successors(caller.route.as_str(), rules.neighbour_scan_limit)
        .await
        .map_err(pool_err)?;
    for record in before.iter().chain(after.iter()) {
        let Some((sig, entry_id)) = parse_member_record(record) else {
            continue;
        };
        if entry_id == user_id || is_trip_id(entry_id) {
            continue;
        }
        neighbours.push((sig.to_string(), entry_id.to_string()));
    }

    // Candidates contained in the caller's route: extend their ride to the
    // caller's destination.
    for (sig, entry_id) in &neighbours {
        if !caller.route.as_str().starts_with(sig.as_str()) {
            continue;
        }
        if let Some(committed) = try_pair(ctx, &caller, entry_id, PairBasis::Direct).await? {
            return Ok(finish(ctx, committed).await);
        }
    }

    // Diverging routes: take the first candidate whose detour from the
    // divergence cell undercuts everything seen so far and the cap.
    let mut best_detour_m = rules.detour_max_m;
    for (sig, entry_id) in &neighbours {
        let Ok(candidate) = RouteSignature::new(sig.clone()) else {
            continue;
        };
        let shared = caller.route.shared_prefix_cells(&candidate);
        if shared == 0 {
            continue;
        }
        let Some(split_cell) = caller.route.cell_at(shared) else {
            continue;
        };
        let detour_m = match ctx
            .routes
            .driving_distance_m(split_cell, candidate.destination_cell())
            .await
        {
            Ok(d) => d,
            Err(e) => {
                warn!(peer = %entry_id, "detour lookup failed, skipping candidate: {e}");
                continue;
            }
        };
        if detour_m >= best_detour_m {
            continue;
        }
        best_detour_m = detour_m;
        let basis = PairBasis::Detour {
            detour_m,
            split_cell: split_cell.to_string(),
        };
        if let Some(committed) = try_pair(ctx, &caller, entry_id, basis).await? {
            return Ok(finish(ctx, committed).await);
        }
    }

    debug!(user_id, "no compatible candidate, rider stays pooled");
    Ok(MatchOutcome::unmatched())
}

/// Capacity-check the candidate and, if it fits, commit the pairing.
///
/// Returns `Ok(None)` when the candidate should simply be skipped: it
/// vanished under us, it would overflow a cap, or another worker won the
/// removal race.
async fn try_pair(
    ctx: &WorkerContext,
    caller: &PassengerEntry,
    peer_id: &str,
    basis: PairBasis,
) -> Result<Option<CommittedPair>, MatchError> {
    let rules = &ctx.rules;

    let Some(peer) = ctx.pool.get_meta(peer_id).await.map_err(pool_err)? else {
        debug!(peer = %peer_id, "candidate vanished before pairing, skipping");
        return Ok(None);
    };

    let passengers = peer.passengers() + caller.passengers;
    let luggage = peer.luggage() + caller.luggage;
    if passengers > rules.max_passengers || luggage > rules.luggage_capacity {
        debug!(peer = %peer_id, passengers, luggage, "candidate would overflow capacity, skipping");
        return Ok(None);
    }
    let sealed = passengers == rules.max_passengers || luggage == rules.luggage_capacity;

    let caller_member = member_record(&caller.route, &caller.user_id);
    let peer_member = member_record(peer.route(), peer_id);

    // The pairing commit point: the first worker to remove both records
    // owns both entries. Anything other than a double removal means we
    // lost; put our own record back and keep scanning.
    let removed = ctx
        .pool
        .remove_members(&[peer_member, caller_member.clone()])
        .await
        .map_err(pool_err)?;
    if removed != 2 {
        warn!(peer = %peer_id, removed, "lost the pairing race, rejoining the pool");
        ctx.pool.add_member(&caller_member).await.map_err(pool_err)?;
        return Ok(None);
    }
    ctx.pool
        .del_meta(&[peer_id.to_string(), caller.user_id.clone()])
        .await
        .map_err(pool_err)?;

    // Extending a trip keeps its id so the durable row stays one-to-one
    // with the pool entry.
    let (trip_id, extends_existing) = match &peer {
        PoolEntry::Trip(t) => (t.trip_id.clone(), true),
        PoolEntry::Passenger(_) => (mint_trip_id(), false),
    };

    let trip_route = caller.route.longer(peer.route()).clone();
    if !sealed {
        ctx.pool
            .add_member(&member_record(&trip_route, &trip_id))
            .await
            .map_err(pool_err)?;
    }

    let fare_each = pricing::pooled_fare(peer.issued_price(), rules.pool_discount_factor);
    let mut members = match &peer {
        PoolEntry::Trip(t) => t.members.clone(),
        PoolEntry::Passenger(p) => vec![TripMember {
            user_id: p.user_id.clone(),
            passengers: p.passengers,
            luggage: p.luggage,
            issued_price: p.issued_price,
        }],
    };
    members.push(TripMember {
        user_id: caller.user_id.clone(),
        passengers: caller.passengers,
        luggage: caller.luggage,
        issued_price: caller.issued_price,
    });

    let trip = TripEntry {
        trip_id: trip_id.clone(),
        route: trip_route,
        members,
        passengers,
        luggage,
        status: if sealed {
            EntryStatus::Active
        } else {
            EntryStatus::Waiting
        },
        fare_each,
    };
    ctx.pool
        .put_meta(&PoolEntry::Trip(trip.clone()))
        .await
        .map_err(pool_err)?;
    info!(trip_id = %trip_id, peer = %peer_id, caller = %caller.user_id, sealed, fare_each, "pairing committed");

    let snapshot = match ctx
        .trips
        .persist_pairing(&trip, &caller.user_id, extends_existing)
        .await
    {
        Ok(snapshot) => snapshot,
        Err(e) => {
            // The pool already advanced and stays authoritative; the
            // durable side is left to reconciliation.
            error!(trip_id = %trip_id, "durable commit failed, continuing on pool state: {e}");
            None
        }
    };

    let peer_riders: Vec<String> = match &peer {
        PoolEntry::Passenger(p) => vec![p.user_id.clone()],
        PoolEntry::Trip(t) => t.member_ids().map(str::to_string).collect(),
    };
    let notifications = peer_riders
        .into_iter()
        .map(|rider| {
            (
                rider,
                Notification::RideMatched {
                    trip: snapshot.clone(),
                },
            )
        })
        .collect();

    let result = match basis {
        PairBasis::Direct => MatchResult::Direct {
            peer: peer_id.to_string(),
        },
        PairBasis::Detour {
            detour_m,
            split_cell,
        } => MatchResult::BestDetour {
            peer: peer_id.to_string(),
            detour_m,
            split_cell,
        },
    };

    Ok(Some(CommittedPair {
        result,
        trip_id,
        snapshot,
        notifications,
    }))
}

/// Fan the commit's notifications out and shape the caller's result. The
/// commit itself is already done; publish failures are logged and dropped.
async fn finish(ctx: &WorkerContext, committed: CommittedPair) -> MatchOutcome {
    for (topic, payload) in &committed.notifications {
        if let Err(e) = ctx.bus.publish(topic, payload).await {
            error!(topic = %topic, "match notification dropped: {e}");
        }
    }
    MatchOutcome {
        result: committed.result,
        trip_id: Some(committed.trip_id),
        trip: committed.snapshot,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::*;
    use cabpool_core::entry::TRIP_ID_PREFIX;
    use cabpool_core::GeoPoint;
    use std::sync::atomic::Ordering;

    fn dest(n: f64) -> GeoPoint {
        GeoPoint { lat: n, lng: n }
    }

    fn intent(n: f64, passengers: u32, luggage: u32) -> RideIntent {
        RideIntent {
            destination: dest(n),
            passengers,
            luggage,
        }
    }

    #[tokio::test]
    async fn solo_rider_waits_in_the_pool() {
        let h = harness(ScriptedRoutes::default().with_route(dest(1.0), computed("abc", 12.0)));

        let outcome = match_ride(&h.ctx, "u1", &intent(1.0, 1, 1)).await.unwrap();

        assert_eq!(outcome.result, MatchResult::None);
        assert!(outcome.trip_id.is_none());
        assert!(h.pool.has_member(&member_record(&sig("abc"), "u1")));
        assert_eq!(h.pool.meta_count(), 1);
        assert!(h.bus.topics().is_empty());
    }

    #[tokio::test]
    async fn contained_route_pairs_with_the_longer_one() {
        let h = harness(ScriptedRoutes::default().with_route(dest(1.0), computed("ab", 12.0)));
        h.pool.seed_passenger("u1", &sig("abc"), 1, 1, 200);

        let outcome = match_ride(&h.ctx, "u2", &intent(1.0, 1, 1)).await.unwrap();

        assert_eq!(
            outcome.result,
            MatchResult::Direct { peer: "u1".into() }
        );
        let trip_id = outcome.trip_id.unwrap();
        assert!(trip_id.starts_with(TRIP_ID_PREFIX));

        // Both riders were consumed into a single trip entry.
        assert!(!h.pool.has_member(&member_record(&sig("abc"), "u1")));
        assert!(!h.pool.has_member(&member_record(&sig("ab"), "u2")));
        assert!(h.pool.has_member(&member_record(&sig("abc"), &trip_id)));

        let trips = h.pool.trip_entries();
        assert_eq!(trips.len(), 1);
        assert_eq!(h.pool.meta_count(), 1);
        let trip = &trips[0];
        assert_eq!(trip.route, sig("abc"));
        assert_eq!(trip.passengers, 2);
        assert_eq!(trip.status, EntryStatus::Waiting);
        assert_eq!(trip.fare_each, 60);
        let ids: Vec<&str> = trip.member_ids().collect();
        assert_eq!(ids, vec!["u1", "u2"]);

        let persisted = h.trips.persisted.lock().unwrap();
        assert_eq!(persisted.len(), 1);
        assert_eq!(persisted[0].1, "u2");
        assert!(!persisted[0].2);

        assert_eq!(h.bus.topics(), vec!["u1".to_string()]);
    }

    #[tokio::test]
    async fn containing_route_extends_the_shorter_one() {
        let h = harness(ScriptedRoutes::default().with_route(dest(1.0), computed("abc", 18.0)));
        h.pool.seed_passenger("u1", &sig("ab"), 1, 1, 120);

        let outcome = match_ride(&h.ctx, "u2", &intent(1.0, 1, 1)).await.unwrap();

        assert_eq!(
            outcome.result,
            MatchResult::Direct { peer: "u1".into() }
        );
        // The trip carries the longer route.
        let trips = h.pool.trip_entries();
        assert_eq!(trips[0].route, sig("abc"));
    }

    #[tokio::test]
    async fn diverging_route_wins_on_a_short_detour() {
        let routes = ScriptedRoutes::default()
            .with_route(dest(1.0), computed("abd", 15.0))
            .with_detour(&cell('b'), &cell('c'), 1500.0);
        let h = harness(routes);
        h.pool.seed_passenger("u1", &sig("abc"), 1, 1, 150);

        let outcome = match_ride(&h.ctx, "u2", &intent(1.0, 1, 1)).await.unwrap();

        assert_eq!(
            outcome.result,
            MatchResult::BestDetour {
                peer: "u1".into(),
                detour_m: 1500.0,
                split_cell: cell('b'),
            }
        );
    }

    #[tokio::test]
    async fn detour_over_the_cap_is_rejected() {
        let routes = ScriptedRoutes::default()
            .with_route(dest(1.0), computed("abd", 15.0))
            .with_detour(&cell('b'), &cell('c'), 4500.0);
        let h = harness(routes);
        h.pool.seed_passenger("u1", &sig("abc"), 1, 1, 150);

        let outcome = match_ride(&h.ctx, "u2", &intent(1.0, 1, 1)).await.unwrap();

        assert_eq!(outcome.result, MatchResult::None);
        assert!(h.pool.has_member(&member_record(&sig("abc"), "u1")));
    }

    #[tokio::test]
    async fn disjoint_routes_never_pair() {
        let routes = ScriptedRoutes::default()
            .with_route(dest(1.0), computed("abc", 15.0))
            .with_detour(&cell('x'), &cell('z'), 1.0);
        let h = harness(routes);
        h.pool.seed_passenger("u1", &sig("xyz"), 1, 1, 150);

        let outcome = match_ride(&h.ctx, "u2", &intent(1.0, 1, 1)).await.unwrap();

        assert_eq!(outcome.result, MatchResult::None);
    }

    #[tokio::test]
    async fn containment_beats_detour() {
        let routes = ScriptedRoutes::default()
            .with_route(dest(1.0), computed("abc", 15.0))
            .with_detour(&cell('c'), &cell('d'), 1.0);
        let h = harness(routes);
        h.pool.seed_passenger("sup", &sig("abcd"), 1, 1, 180);
        h.pool.seed_passenger("div", &sig("abx"), 1, 1, 140);

        let outcome = match_ride(&h.ctx, "u2", &intent(1.0, 1, 1)).await.unwrap();

        assert_eq!(
            outcome.result,
            MatchResult::Direct { peer: "sup".into() }
        );
    }

    #[tokio::test]
    async fn overfull_candidate_is_skipped() {
        let h = harness(ScriptedRoutes::default().with_route(dest(1.0), computed("ab", 10.0)));
        h.pool.seed_trip(TripEntry {
            trip_id: "TRIPcap".into(),
            route: sig("abc"),
            members: vec![
                TripMember {
                    user_id: "u1".into(),
                    passengers: 1,
                    luggage: 2,
                    issued_price: 100,
                },
                TripMember {
                    user_id: "u3".into(),
                    passengers: 1,
                    luggage: 1,
                    issued_price: 90,
                },
            ],
            passengers: 2,
            luggage: 3,
            status: EntryStatus::Waiting,
            fare_each: 50,
        });

        let outcome = match_ride(&h.ctx, "u2", &intent(1.0, 2, 1)).await.unwrap();

        assert_eq!(outcome.result, MatchResult::None);
        // Caller keeps waiting, the trip is untouched.
        assert!(h.pool.has_member(&member_record(&sig("ab"), "u2")));
        assert!(h.pool.has_member(&member_record(&sig("abc"), "TRIPcap")));
        assert!(h.trips.persisted.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn exact_capacity_seals_the_trip() {
        let h = harness(ScriptedRoutes::default().with_route(dest(1.0), computed("ab", 10.0)));
        h.pool.seed_trip(TripEntry {
            trip_id: "TRIPseal".into(),
            route: sig("abc"),
            members: vec![
                TripMember {
                    user_id: "u1".into(),
                    passengers: 1,
                    luggage: 2,
                    issued_price: 100,
                },
                TripMember {
                    user_id: "u3".into(),
                    passengers: 1,
                    luggage: 1,
                    issued_price: 90,
                },
            ],
            passengers: 2,
            luggage: 3,
            status: EntryStatus::Waiting,
            fare_each: 50,
        });

        let outcome = match_ride(&h.ctx, "u2", &intent(1.0, 1, 1)).await.unwrap();

        assert_eq!(
            outcome.result,
            MatchResult::Direct {
                peer: "TRIPseal".into()
            }
        );
        assert_eq!(outcome.trip_id.as_deref(), Some("TRIPseal"));

        // Sealed: metadata flips to ACTIVE and the trip leaves the lex set.
        let trips = h.pool.trip_entries();
        assert_eq!(trips[0].status, EntryStatus::Active);
        assert_eq!(trips[0].passengers, 3);
        assert_eq!(trips[0].fare_each, 15);
        assert_eq!(h.pool.member_count(), 0);

        let persisted = h.trips.persisted.lock().unwrap();
        assert!(persisted[0].2, "existing trip row should be extended");

        let mut topics = h.bus.topics();
        topics.sort();
        assert_eq!(topics, vec!["u1".to_string(), "u3".to_string()]);
    }

    #[tokio::test]
    async fn oversized_request_is_rejected_before_registration() {
        let h = harness(ScriptedRoutes::default().with_route(dest(1.0), computed("ab", 10.0)));

        let err = match_ride(&h.ctx, "u1", &intent(1.0, 4, 1)).await.unwrap_err();

        assert!(matches!(err, MatchError::RequestTooLarge(_)));
        assert_eq!(h.pool.member_count(), 0);
        assert_eq!(h.pool.meta_count(), 0);
    }

    #[tokio::test]
    async fn indexer_failure_leaves_the_pool_untouched() {
        let routes = ScriptedRoutes::default();
        routes.fail.store(true, Ordering::Relaxed);
        let h = harness(routes);

        let err = match_ride(&h.ctx, "u1", &intent(1.0, 1, 1)).await.unwrap_err();

        assert!(matches!(err, MatchError::IndexerUnavailable(_)));
        assert_eq!(h.pool.member_count(), 0);
        assert_eq!(h.pool.meta_count(), 0);
    }

    #[tokio::test]
    async fn stale_membership_record_is_skipped() {
        let h = harness(ScriptedRoutes::default().with_route(dest(1.0), computed("ab", 10.0)));
        h.pool
            .seed_member_only(&member_record(&sig("abc"), "ghost"));

        let outcome = match_ride(&h.ctx, "u2", &intent(1.0, 1, 1)).await.unwrap();

        assert_eq!(outcome.result, MatchResult::None);
        assert!(h.pool.has_member(&member_record(&sig("ab"), "u2")));
    }

    #[tokio::test]
    async fn losing_the_removal_race_restores_the_caller() {
        let h = harness(ScriptedRoutes::default().with_route(dest(1.0), computed("ab", 10.0)));
        h.pool.seed_passenger("u1", &sig("abc"), 1, 1, 200);
        // Another worker claims u1 between our scan and our removal.
        *h.pool.steal_on_get.lock().unwrap() = Some((
            "u1".to_string(),
            member_record(&sig("abc"), "u1"),
        ));

        let outcome = match_ride(&h.ctx, "u2", &intent(1.0, 1, 1)).await.unwrap();

        assert_eq!(outcome.result, MatchResult::None);
        assert!(h.pool.has_member(&member_record(&sig("ab"), "u2")));
        assert!(h.trips.persisted.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn forming_trips_are_not_extension_candidates() {
        let h = harness(ScriptedRoutes::default().with_route(dest(1.0), computed("abc", 15.0)));
        h.pool.seed_trip(TripEntry {
            trip_id: "TRIPshort".into(),
            route: sig("ab"),
            members: vec![],
            passengers: 1,
            luggage: 1,
            status: EntryStatus::Waiting,
            fare_each: 40,
        });

        let outcome = match_ride(&h.ctx, "u2", &intent(1.0, 1, 1)).await.unwrap();

        assert_eq!(outcome.result, MatchResult::None);
        assert!(h.pool.has_member(&member_record(&sig("ab"), "TRIPshort")));
    }

    #[tokio::test]
    async fn registering_twice_keeps_one_membership() {
        let h = harness(ScriptedRoutes::default().with_route(dest(1.0), computed("abc", 12.0)));

        match_ride(&h.ctx, "u1", &intent(1.0, 1, 1)).await.unwrap();
        match_ride(&h.ctx, "u1", &intent(1.0, 1, 1)).await.unwrap();

        assert_eq!(h.pool.member_count(), 1);
        assert_eq!(h.pool.meta_count(), 1);
    }

    #[tokio::test]
    async fn durable_failure_still_reports_the_match() {
        let h = harness(ScriptedRoutes::default().with_route(dest(1.0), computed("ab", 12.0)));
        h.pool.seed_passenger("u1", &sig("abc"), 1, 1, 200);
        h.trips.fail_persist.store(true, Ordering::Relaxed);

        let outcome = match_ride(&h.ctx, "u2", &intent(1.0, 1, 1)).await.unwrap();

        assert_eq!(
            outcome.result,
            MatchResult::Direct { peer: "u1".into() }
        );
        assert!(outcome.trip_id.is_some());
        assert!(outcome.trip.is_none());

        // The peer still hears about the match, minus the snapshot.
        let published = h.bus.published.lock().unwrap();
        assert_eq!(published.len(), 1);
        assert!(matches!(
            &published[0].1,
            Notification::RideMatched { trip: None }
        ));
    }
}
