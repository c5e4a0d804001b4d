use std::sync::Arc;

use cabpool_core::{MatchRules, NotificationBus, PoolStore, RouteService, TripStore};

/// Everything one worker needs to serve tasks. Built once per worker at
/// pool startup; no process-wide client singletons.
#[derive(Clone)]
pub struct WorkerContext {
    pub pool: Arc<dyn PoolStore>,
    pub trips: Arc<dyn TripStore>,
    pub bus: Arc<dyn NotificationBus>,
    pub routes: Arc<dyn RouteService>,
    pub rules: MatchRules,
}
