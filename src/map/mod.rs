//! Map model and storage.

pub mod store;
pub mod types;

pub use store::{MapStore, MapStoreError, MERGED_MAP_KEY};
pub use types::{Mission, Sensor, SensorType, Vertex, ViMap};
