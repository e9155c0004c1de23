//! Shared real-time store and the other storage collaborators.
//!
//! - [`RealtimeStore`]: the `buses/` collection every producer and consumer shares
//! - [`FlagStore`]: restart-durable flags (`BUS_NAME`)
//! - [`VehicleCatalog`]: one-shot list of bus labels for the picker
//! - [`StoreConnector`]: lazy client setup for the background task

mod catalog;
mod connector;
mod flags;
mod memory;
mod traits;

pub use catalog::{bus_options, BusOption, CatalogError, StaticCatalog, VehicleCatalog, NEED_HELP_LABEL};
pub use connector::{CachedConnector, SharedStoreConnector, StoreConnector};
pub use flags::{FileFlagStore, FlagStore, FlagStoreError, MemoryFlagStore, BUS_NAME_KEY};
pub use memory::MemoryStore;
pub use traits::{within, BoxFuture, RealtimeStore, StoreError, Subscription, SubscriptionEvent};
