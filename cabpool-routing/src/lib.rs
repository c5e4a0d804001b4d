//! Route indexing: turns a destination into a comparable spatial signature
//! by linearizing the driving path into H3 cells, and answers the detour
//! distance queries the matcher needs.

pub mod client;
pub mod error;
pub mod indexer;

pub use client::{DirectionsClient, DriveRoute};
pub use error::RouteError;
pub use indexer::{linearize, RouteIndexer};
