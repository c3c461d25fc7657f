//! Engine-Schicht: Betriebsmodi, Aktions-Routing, Statistik und die
//! Anbindung der Collaborators.

pub mod layer_engine;
pub mod mode;
pub mod stats;

pub use layer_engine::LayerEngine;
pub use mode::EngineMode;
pub use stats::{LayerStats, STATS_CACHE_TTL};
