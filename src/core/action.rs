//! Aktionen: gezeichnete Formen aus Sicht der Ebenen-Verwaltung.

/// Werkzeugtyp, mit dem eine Aktion gezeichnet wurde
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ToolKind {
    /// Freihandstift
    #[default]
    Pen,
    /// Gerade Linie
    Line,
    /// Rechteck
    Rectangle,
    /// Ellipse bzw. Kreis
    Ellipse,
    /// Textelement
    Text,
    /// Radierer
    Eraser,
}

/// Eine einzelne gezeichnete Aktion.
///
/// Die Engine kennt weder Geometrie noch Pixel einer Aktion; sie verwaltet
/// nur deren Identität, den Werkzeugtyp und die optionale Wunsch-Ebene.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ActionRecord {
    /// Eindeutige Aktions-ID, vergeben vom History-Store
    pub id: u64,
    /// Werkzeug, mit dem die Aktion gezeichnet wurde
    pub tool: ToolKind,
    /// Vorab zugewiesene Ziel-Ebene (nur im Gruppen-Modus beachtet)
    pub layer_hint: Option<u64>,
}

impl ActionRecord {
    /// Erstellt eine Aktion ohne Ebenen-Zuordnung.
    pub fn new(id: u64, tool: ToolKind) -> Self {
        Self {
            id,
            tool,
            layer_hint: None,
        }
    }

    /// Erstellt eine Aktion mit vorab zugewiesener Ziel-Ebene.
    pub fn with_layer(id: u64, tool: ToolKind, layer_id: u64) -> Self {
        Self {
            id,
            tool,
            layer_hint: Some(layer_id),
        }
    }
}
