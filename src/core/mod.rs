//! Core-Domänentypen: Ebenen, Aktionen, Mitgliedschaften, Ebenen-Tabelle.

pub mod action;
pub mod layer;
/// Die Ebenen-Tabelle der Engine
///
/// Definiert den zentralen Container samt Untermodulen:
/// - LayerStack: alle Ebenen mit Rückwärts-Index der Aktionszuordnung
/// - ordinals: Umsortieren und Duplizieren entlang der Stapelreihenfolge
/// - repair: Konsistenz-Audit und Selbstheilung
pub mod layer_stack;
pub mod membership;

pub use action::{ActionRecord, ToolKind};
pub use layer::{Layer, SurfaceCache};
pub use layer_stack::{ConsistencyIssue, LayerStack, RepairReport, ValidationReport};
pub use membership::Membership;
