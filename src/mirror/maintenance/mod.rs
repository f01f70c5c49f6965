//! Maintenance and background sync for the mirror.

pub mod background_sync;

pub use background_sync::{BackgroundSync, BackgroundSyncConfigBuilder};
