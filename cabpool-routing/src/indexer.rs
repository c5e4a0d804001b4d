use std::collections::HashSet;

use async_trait::async_trait;
use h3o::{CellIndex, LatLng, Resolution};
use tracing::debug;

use cabpool_core::{ComputedRoute, GeoPoint, RouteService, RouteServiceError, RouteSignature};

use crate::client::DirectionsClient;
use crate::error::RouteError;

/// Map road waypoints onto a contiguous, duplicate-free cell walk.
///
/// Step endpoints from the directions API are sparse, so adjacent waypoint
/// cells are bridged with the shortest grid path between them. A seen-set
/// keeps revisited cells from being appended twice.
pub fn linearize(waypoints: &[LatLng], resolution: Resolution) -> Vec<CellIndex> {
    let mut trace: Vec<CellIndex> = waypoints.iter().map(|p| p.to_cell(resolution)).collect();
    trace.dedup();

    fn append(cell: CellIndex, cells: &mut Vec<CellIndex>, seen: &mut HashSet<CellIndex>) {
        if seen.insert(cell) {
            cells.push(cell);
        }
    }

    let mut cells: Vec<CellIndex> = Vec::new();
    let mut seen: HashSet<CellIndex> = HashSet::new();

    if trace.len() == 1 {
        append(trace[0], &mut cells, &mut seen);
        return cells;
    }

    for pair in trace.windows(2) {
        let (from, to) = (pair[0], pair[1]);
        match from.grid_path_cells(to) {
            Ok(path) => {
                for cell in path.flatten() {
                    append(cell, &mut cells, &mut seen);
                }
            }
            // Pentagon distortion can make a local path unrepresentable;
            // keep the endpoints so the walk stays in travel order.
            Err(_) => {
                append(from, &mut cells, &mut seen);
                append(to, &mut cells, &mut seen);
            }
        }
    }
    cells
}

/// Converts destinations into route signatures anchored at the airport.
pub struct RouteIndexer {
    client: DirectionsClient,
    origin: LatLng,
    resolution: Resolution,
}

impl RouteIndexer {
    pub fn new(client: DirectionsClient, origin: GeoPoint, resolution: u8) -> Result<Self, RouteError> {
        let origin = LatLng::new(origin.lat, origin.lng)
            .map_err(|e| RouteError::InvalidCoordinate(e.to_string()))?;
        let resolution =
            Resolution::try_from(resolution).map_err(|_| RouteError::InvalidResolution(resolution))?;
        Ok(Self {
            client,
            origin,
            resolution,
        })
    }

    fn parse_cell(cell: &str) -> Result<CellIndex, RouteServiceError> {
        cell.parse::<CellIndex>()
            .map_err(|e| RouteServiceError::InvalidCoordinate(format!("{cell}: {e}")))
    }
}

#[async_trait]
impl RouteService for RouteIndexer {
    async fn compute_route(
        &self,
        destination: GeoPoint,
    ) -> Result<ComputedRoute, RouteServiceError> {
        let dest = LatLng::new(destination.lat, destination.lng)
            .map_err(|e| RouteServiceError::InvalidCoordinate(e.to_string()))?;

        let drive = self
            .client
            .drive_route(self.origin, dest)
            .await
            .map_err(RouteServiceError::from)?;

        let mut cells = linearize(&drive.waypoints, self.resolution);
        let dest_cell = dest.to_cell(self.resolution);
        if cells.last() != Some(&dest_cell) {
            cells.push(dest_cell);
        }

        let cell_ids: Vec<String> = cells.iter().map(|c| c.to_string()).collect();
        let signature = RouteSignature::from_cells(&cell_ids)
            .map_err(|e| RouteServiceError::Unavailable(e.to_string()))?;
        debug!(
            cells = cell_ids.len(),
            km = drive.distance_m / 1000.0,
            "route linearized"
        );

        Ok(ComputedRoute {
            signature,
            destination_cell: dest_cell.to_string(),
            cells: cell_ids,
            total_km: drive.distance_m / 1000.0,
        })
    }

    async fn driving_distance_m(
        &self,
        from_cell: &str,
        to_cell: &str,
    ) -> Result<f64, RouteServiceError> {
        let from = LatLng::from(Self::parse_cell(from_cell)?);
        let to = LatLng::from(Self::parse_cell(to_cell)?);
        let drive = self
            .client
            .drive_route(from, to)
            .await
            .map_err(RouteServiceError::from)?;
        Ok(drive.distance_m)
    }
}
