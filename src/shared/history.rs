//! Schnittstelle zum History-Store.

use crate::core::ToolKind;

/// Nachschlagen von Aktionen im History-Store.
///
/// Die Engine nutzt das ausschließlich für die Werkzeugwechsel-Heuristik
/// der Gruppierung.
pub trait ActionLookup {
    /// Werkzeugtyp einer Aktion, `None` wenn unbekannt.
    fn tool_of(&self, action_id: u64) -> Option<ToolKind>;
}

/// History-Anbindung ohne Daten; jede Anfrage liefert `None`.
///
/// Ein fehlgeschlagenes Nachschlagen zählt für die Gruppierung als
/// Werkzeugwechsel; mit dieser Anbindung beginnt daher bei aktiver
/// Werkzeugwechsel-Heuristik jede Aktion eine neue Gruppe.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoopHistory;

impl ActionLookup for NoopHistory {
    fn tool_of(&self, _action_id: u64) -> Option<ToolKind> {
        None
    }
}
