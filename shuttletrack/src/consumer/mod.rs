//! Map consumer: live view of every bus plus garbage collection.
//!
//! - [`filter`]: staleness and coordinate filtering of a `buses` snapshot
//! - [`cluster`]: greedy proximity clustering for dense views
//! - [`marker`]: marker styling and render layout
//! - [`camera`]: camera fitting and "locate me"
//! - [`cleanup`]: the periodic expired-record sweep
//! - [`map`]: [`BusMap`], which ties the above to a live subscription

pub mod camera;
pub mod cleanup;
pub mod cluster;
pub mod filter;
pub mod map;
pub mod marker;

pub use camera::{fit_camera, locate_user, CameraTarget, LocateError};
pub use cleanup::{CleanupConfig, CleanupStats, CleanupSweeper, SweepOutcome, SweepReport};
pub use cluster::{cluster_buses, Cluster, ClusterConfig};
pub use filter::{filter_active, ActiveBus};
pub use map::{BusMap, BusMapConfig, ConnectionState, MapView};
pub use marker::{layout_markers, marker_style, MapMarker, MarkerIcon, MarkerStyle};
