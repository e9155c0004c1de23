//! shuttletrack - live campus shuttle locations
//!
//! Riders on a shuttle share their device position into a shared real-time
//! store under `buses/{bus}`; every map viewer subscribes to that collection,
//! hides stale records and periodically deletes expired ones. Producers and
//! consumers never talk to each other directly: the store is the only
//! coordination point.
//!
//! # High-Level API
//!
//! ```ignore
//! use std::sync::Arc;
//! use shuttletrack::consumer::{BusMap, BusMapConfig};
//! use shuttletrack::producer::{LocationSharer, ProducerConfig, SharerCollaborators};
//!
//! // Producer side
//! let sharer = LocationSharer::new(collaborators, ProducerConfig::default());
//! sharer.start_sharing("Surma").await?;
//!
//! // Consumer side
//! let map = BusMap::start(store, clock, BusMapConfig::default());
//! let mut views = map.subscribe();
//! ```
//!
//! # Modules
//!
//! - [`producer`]: session state machine, adaptive sampling and the background task
//! - [`consumer`]: filtering, clustering, the live map and the cleanup sweep
//! - [`store`]: the real-time store, durable flags and the vehicle catalog
//! - [`device`]: location provider and background registration seams
//! - [`record`]: the `BusRecord` wire format and key sanitization

pub mod clock;
pub mod config;
pub mod consumer;
pub mod device;
pub mod identity;
pub mod logging;
pub mod producer;
pub mod record;
pub mod retry;
pub mod store;

pub use clock::{Clock, ManualClock, SystemClock};
pub use identity::{AuthSession, Identity, StaticAuth};
pub use record::{BusKey, BusRecord, DeviceType};
pub use store::{MemoryStore, RealtimeStore, StoreError};
