//! TriveniServer - Multi-robot map aggregation server
//!
//! Robots run on-board odometry and drop self-contained submaps on a shared
//! filesystem; this crate is the central node that ingests them from many
//! robots concurrently, stitches them into a single merged map, runs global
//! optimization commands, answers point lookups in the optimized frame and
//! emits per-robot pose corrections.
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────┐
//! │                      main                           │  ← Entry point
//! └─────────────────────────────────────────────────────┘
//!                          │
//! ┌─────────────────────────────────────────────────────┐
//! │                   server/                           │  ← Public operations
//! │          (node lifecycle, lookup, callbacks)        │
//! └─────────────────────────────────────────────────────┘
//!                          │
//! ┌─────────────────────────────────────────────────────┐
//! │                  threads/                           │  ← Orchestration
//! │        (ingest pool, merge loop, status)            │
//! └─────────────────────────────────────────────────────┘
//!                          │
//! ┌─────────────────────────────────────────────────────┐
//! │              state/ + console/                      │  ← Bookkeeping
//! │    (queue, registry, blacklist, map commands)       │
//! └─────────────────────────────────────────────────────┘
//!                          │
//! ┌─────────────────────────────────────────────────────┐
//! │                     map/                            │  ← Map model
//! │               (vi-map, store, codec)                │
//! └─────────────────────────────────────────────────────┘
//!                          │
//! ┌─────────────────────────────────────────────────────┐
//! │                     core/                           │  ← Foundation
//! │             (ids, timestamps, math)                 │
//! └─────────────────────────────────────────────────────┘
//! ```
//!
//! # Data flow
//!
//! notification → submap queue entry → ingest pool (load, per-submap
//! commands, anchor extraction) → merge loop (append, global commands,
//! corrections, checkpoint) → lookup / status / visualization.

// ============================================================================
// Layer 1: Core foundation (no internal deps)
// ============================================================================
pub mod core;

// ============================================================================
// Layer 2: Map model and storage (depends on core)
// ============================================================================
pub mod map;

// ============================================================================
// Layer 3: Commands and bookkeeping (depends on core, map)
// ============================================================================
pub mod console;
pub mod state;

// ============================================================================
// Layer 4: Server orchestration (depends on all layers)
// ============================================================================
pub mod config;
pub mod error;
pub mod server;

// Thread infrastructure is internal; the node owns thread lifecycles.
mod threads;

// ============================================================================
// Convenience re-exports (flat namespace for common use)
// ============================================================================

pub use crate::config::ServerNodeConfig;
pub use crate::console::{CommandRunner, MapConsole};
pub use crate::core::math::Transform;
pub use crate::core::types::{MissionId, TimestampNs};
pub use crate::error::ServerError;
pub use crate::map::{MERGED_MAP_KEY, MapStore, Mission, Sensor, SensorType, Vertex, ViMap};
pub use crate::server::{
    MapLookup, MapLookupError, MapVisualizer, PoseCorrection, PoseCorrectionPublisher, ServerNode,
    StatusPublisher,
};
pub use crate::state::ServerStatus;
