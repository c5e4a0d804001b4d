//! Fare computation. Prices are whole currency units, always rounded up.

/// Fare quoted to a solo passenger: distance times the per-km rate, never
/// below one kilometre's worth.
pub fn base_fare(total_km: f64, rate_per_km: i64) -> i64 {
    let fare = (total_km * rate_per_km as f64).ceil() as i64;
    fare.max(rate_per_km)
}

/// Per-passenger fare after a join event. The discount anchors on the price
/// the existing entry was carrying, so each join compounds on the previous
/// group price.
pub fn pooled_fare(anchor_price: i64, discount_factor: f64) -> i64 {
    ((anchor_price as f64) * discount_factor).ceil() as i64
}
