//! Server orchestration: node lifecycle, lookups, publisher seams.

pub mod callbacks;
pub(crate) mod context;
pub mod lookup;
pub mod node;

pub use callbacks::{MapVisualizer, PoseCorrection, PoseCorrectionPublisher, StatusPublisher};
pub use lookup::{MapLookup, MapLookupError, POSE_LOOKUP_TOLERANCE_NS};
pub use node::ServerNode;
