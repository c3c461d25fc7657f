//! Geteilte Typen für modulübergreifende Verträge.
//!
//! Enthält die Konfiguration sowie die Schnittstellen zu den
//! Collaborators (Zeichenfläche, History-Store), um direkte
//! Abhängigkeiten zwischen `core` und `engine` zu vermeiden.

pub mod history;
pub mod options;
pub mod surface;

pub use history::{ActionLookup, NoopHistory};
pub use options::{EngineOptions, EngineOptionsUpdate};
pub use options::{DEFAULT_LAYER_NAME, MAX_LAYERS, SPLIT_ACTION_THRESHOLD};
pub use surface::{overlay_priority, NoopSurface, SplitLayout, SurfaceBackend};
