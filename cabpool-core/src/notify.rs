use serde::{Deserialize, Serialize};

use crate::trip::TripSnapshot;

/// Payloads published on a passenger's topic. The `type` tag is the wire
/// discriminator subscribers switch on.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum Notification {
    /// Someone was pooled into your trip, or you were pooled into theirs.
    /// The snapshot is absent when the durable write is still pending
    /// reconciliation.
    #[serde(rename = "RIDE_MATCHED")]
    RideMatched { trip: Option<TripSnapshot> },
    /// A member of your forming trip cancelled. `updated_trip` is absent
    /// when the trip collapsed and was cancelled outright.
    #[serde(rename = "RIDER_LEFT")]
    RiderLeft {
        trip_id: String,
        cancelled_user_id: String,
        updated_trip: Option<TripSnapshot>,
    },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn wire_format_carries_a_type_tag() {
        let payload = Notification::RiderLeft {
            trip_id: "TRIP123".into(),
            cancelled_user_id: "u9".into(),
            updated_trip: None,
        };
        let json = serde_json::to_value(&payload).unwrap();
        assert_eq!(json["type"], "RIDER_LEFT");
        assert_eq!(json["trip_id"], "TRIP123");

        let matched = serde_json::to_value(Notification::RideMatched { trip: None }).unwrap();
        assert_eq!(matched["type"], "RIDE_MATCHED");
    }
}
