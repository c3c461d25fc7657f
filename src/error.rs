//! Fehlertypen der Ebenen-Engine.

use thiserror::Error;

/// Harte Fehler der Engine-Operationen.
///
/// Nicht gefundene oder gesperrte Ebenen sind bewusst keine Fehler dieses
/// Typs; solche Operationen melden `false` und schreiben eine Warnung ins
/// Log.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum EngineError {
    /// Das konfigurierte Ebenen-Limit ist erreicht.
    #[error("Ebenen-Limit erreicht (maximal {max} Ebenen)")]
    LayerLimitExceeded {
        /// Konfiguriertes Maximum zum Zeitpunkt des Fehlschlags
        max: usize,
    },
}
