use std::time::Duration;

use h3o::LatLng;
use serde::Deserialize;
use serde_json::json;

use crate::error::RouteError;

/// A driving route flattened to its step endpoints plus the total distance.
#[derive(Debug, Clone)]
pub struct DriveRoute {
    pub waypoints: Vec<LatLng>,
    pub distance_m: f64,
}

/// Thin HTTP client for the driving-directions endpoint.
#[derive(Debug, Clone)]
pub struct DirectionsClient {
    http: reqwest::Client,
    endpoint: String,
    api_key: Option<String>,
}

impl DirectionsClient {
    pub fn new(
        endpoint: &str,
        api_key: Option<String>,
        timeout: Duration,
    ) -> Result<Self, RouteError> {
        let http = reqwest::Client::builder().timeout(timeout).build()?;
        Ok(Self {
            http,
            endpoint: endpoint.trim_end_matches('/').to_string(),
            api_key,
        })
    }

    /// Ask for the driving route between two points. Returns the first
    /// route's step endpoints in travel order and its distance in metres.
    pub async fn drive_route(
        &self,
        origin: LatLng,
        destination: LatLng,
    ) -> Result<DriveRoute, RouteError> {
        let body = json!({
            "origin": { "location": { "latLng": {
                "latitude": origin.lat(), "longitude": origin.lng(),
            }}},
            "destination": { "location": { "latLng": {
                "latitude": destination.lat(), "longitude": destination.lng(),
            }}},
            "travelMode": "DRIVE",
        });

        let mut request = self.http.post(&self.endpoint).json(&body).header(
            "X-Goog-FieldMask",
            "routes.distanceMeters,routes.legs.steps.startLocation,routes.legs.steps.endLocation",
        );
        if let Some(key) = &self.api_key {
            request = request.header("X-Goog-Api-Key", key);
        }

        let response = request.send().await?;
        if !response.status().is_success() {
            return Err(RouteError::Api(response.status().to_string()));
        }

        let parsed: DirectionsResponse = response.json().await?;
        let route = parsed.routes.into_iter().next().ok_or(RouteError::NoRoute)?;
        route_to_drive(route)
    }
}

pub(crate) fn route_to_drive(route: ApiRoute) -> Result<DriveRoute, RouteError> {
    let mut waypoints = Vec::new();
    for leg in route.legs {
        for step in leg.steps {
            for location in [step.start_location, step.end_location].into_iter().flatten() {
                if let Some(point) = location.lat_lng {
                    let point = LatLng::new(point.latitude, point.longitude)
                        .map_err(|e| RouteError::InvalidCoordinate(e.to_string()))?;
                    waypoints.push(point);
                }
            }
        }
    }
    if waypoints.is_empty() {
        return Err(RouteError::NoRoute);
    }
    Ok(DriveRoute {
        waypoints,
        distance_m: route.distance_meters.unwrap_or(0.0),
    })
}

#[derive(Debug, Deserialize)]
pub(crate) struct DirectionsResponse {
    #[serde(default)]
    pub(crate) routes: Vec<ApiRoute>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct ApiRoute {
    pub(crate) distance_meters: Option<f64>,
    #[serde(default)]
    pub(crate) legs: Vec<ApiLeg>,
}

#[derive(Debug, Deserialize)]
pub(crate) struct ApiLeg {
    #[serde(default)]
    pub(crate) steps: Vec<ApiStep>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct ApiStep {
    pub(crate) start_location: Option<ApiLocation>,
    pub(crate) end_location: Option<ApiLocation>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct ApiLocation {
    pub(crate) lat_lng: Option<ApiLatLng>,
}

#[derive(Debug, Deserialize)]
pub(crate) struct ApiLatLng {
    pub(crate) latitude: f64,
    pub(crate) longitude: f64,
}
