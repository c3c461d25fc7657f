//! Betriebsmodi und die reinen Umbau-Funktionen der Modus-Konvertierung.

use serde::{Deserialize, Serialize};

use crate::core::LayerStack;
use crate::error::EngineError;
use crate::shared::EngineOptions;

/// Betriebsmodus der Aktions-Zuordnung
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EngineMode {
    /// Mehrere Aktionen teilen sich eine Ebene (Zeit- und Werkzeug-Heuristik)
    Grouped,
    /// Genau eine Aktion pro Ebene
    #[default]
    Individual,
}

/// Baut die Ebenen-Tabelle für den Einzel-Modus komplett neu auf.
///
/// Jede Aktion erhält eine frische Ebene mit Standard-Attributen; ohne
/// Aktionen entsteht nur die Standard-Ebene. Beim Überschreiten des
/// Ebenen-Limits kommt der Kapazitätsfehler zurück und der Aufrufer
/// behält seine bisherige Tabelle.
pub(crate) fn rebuild_individual(
    action_ids: &[u64],
    options: &EngineOptions,
) -> Result<(LayerStack, Option<u64>), EngineError> {
    let mut stack = LayerStack::new();

    if action_ids.is_empty() {
        stack.spawn_layer(&options.default_layer_name);
        return Ok((stack, None));
    }

    for action_id in action_ids {
        let layer_id =
            stack.create_layer(None, &options.default_layer_name, options.max_layers)?;
        stack.assign_action(*action_id, layer_id, true);
    }
    Ok((stack, None))
}

/// Baut die Ebenen-Tabelle für den Gruppen-Modus komplett neu auf.
///
/// Alle Aktionen landen in Stapelreihenfolge auf einer einzigen
/// Standard-Ebene, die zugleich die aktive Ebene wird.
pub(crate) fn rebuild_grouped(
    action_ids: &[u64],
    options: &EngineOptions,
) -> Result<(LayerStack, Option<u64>), EngineError> {
    let mut stack = LayerStack::new();
    let layer_id = stack.create_layer(None, &options.default_layer_name, options.max_layers)?;
    for action_id in action_ids {
        stack.assign_action(*action_id, layer_id, false);
    }
    Ok((stack, Some(layer_id)))
}
