use serde::Deserialize;

/// Matching knobs, loaded from configuration and carried by every worker.
#[derive(Debug, Clone, Deserialize)]
pub struct MatchRules {
    /// H3 resolution used when linearizing routes.
    #[serde(default = "default_hex_resolution")]
    pub hex_resolution: u8,
    /// Base price per kilometre, whole currency units.
    #[serde(default = "default_rate_per_km")]
    pub rate_per_km: i64,
    /// Share of the previous group price each passenger keeps after a join.
    #[serde(default = "default_pool_discount_factor")]
    pub pool_discount_factor: f64,
    /// Seat cap per trip.
    #[serde(default = "default_max_passengers")]
    pub max_passengers: u32,
    /// Luggage cap per trip.
    #[serde(default = "default_luggage_capacity")]
    pub luggage_capacity: u32,
    /// Largest acceptable detour, in metres, from the divergence cell to a
    /// candidate's destination.
    #[serde(default = "default_detour_max_m")]
    pub detour_max_m: f64,
    /// How many lex neighbours to fetch per direction when scanning.
    #[serde(default = "default_neighbour_scan_limit")]
    pub neighbour_scan_limit: usize,
    /// Worker count; derived from the host when unset.
    #[serde(default)]
    pub worker_pool_size: Option<usize>,
}

fn default_hex_resolution() -> u8 {
    8
}

fn default_rate_per_km() -> i64 {
    10
}

fn default_pool_discount_factor() -> f64 {
    0.30
}

fn default_max_passengers() -> u32 {
    3
}

fn default_luggage_capacity() -> u32 {
    4
}

fn default_detour_max_m() -> f64 {
    3000.0
}

fn default_neighbour_scan_limit() -> usize {
    5
}

impl Default for MatchRules {
    fn default() -> Self {
        Self {
            hex_resolution: default_hex_resolution(),
            rate_per_km: default_rate_per_km(),
            pool_discount_factor: default_pool_discount_factor(),
            max_passengers: default_max_passengers(),
            luggage_capacity: default_luggage_capacity(),
            detour_max_m: default_detour_max_m(),
            neighbour_scan_limit: default_neighbour_scan_limit(),
            worker_pool_size: None,
        }
    }
}

impl MatchRules {
    /// Resolved worker count: the configured value, or half the logical
    /// cores clamped to [2, 6].
    pub fn worker_count(&self) -> usize {
        if let Some(size) = self.worker_pool_size {
            return size.max(1);
        }
        let cores = std::thread::available_parallelism()
            .map(|n| n.get())
            .unwrap_or(2);
        (cores / 2).clamp(2, 6)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_service_documentation() {
        let rules = MatchRules::default();
        assert_eq!(rules.max_passengers, 3);
        assert_eq!(rules.luggage_capacity, 4);
        assert_eq!(rules.detour_max_m, 3000.0);
        assert_eq!(rules.neighbour_scan_limit, 5);
        assert_eq!(rules.rate_per_km, 10);
    }

    #[test]
    fn explicit_worker_count_wins() {
        let rules = MatchRules {
            worker_pool_size: Some(4),
            ..MatchRules::default()
        };
        assert_eq!(rules.worker_count(), 4);
    }

    #[test]
    fn derived_worker_count_is_clamped() {
        let rules = MatchRules::default();
        let n = rules.worker_count();
        assert!((2..=6).contains(&n));
    }
}
