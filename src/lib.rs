//! Inkboard Layer Engine.
//! Virtuelle Ebenen-Verwaltung für das Inkboard-Zeichenbrett: Registry,
//! Stapelreihenfolge, Render-Caches, Betriebsmodi und Selbstheilung.

pub mod core;
pub mod engine;
pub mod error;
pub mod shared;

pub use crate::core::{
    ActionRecord, ConsistencyIssue, Layer, LayerStack, Membership, RepairReport, SurfaceCache,
    ToolKind, ValidationReport,
};
pub use crate::engine::{EngineMode, LayerEngine, LayerStats};
pub use crate::error::EngineError;
pub use crate::shared::{
    ActionLookup, EngineOptions, EngineOptionsUpdate, NoopHistory, NoopSurface, SplitLayout,
    SurfaceBackend,
};
