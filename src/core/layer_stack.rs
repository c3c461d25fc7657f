//! Die zentrale Ebenen-Tabelle mit Rückwärts-Index der Aktionszuordnung.

use std::collections::HashMap;

use indexmap::IndexMap;

use crate::core::Layer;
use crate::error::EngineError;

mod ordinals;
mod repair;

pub use repair::{ConsistencyIssue, RepairReport, ValidationReport};

/// Container für alle Ebenen eines Zeichenbretts.
///
/// Die Tabelle ist nach Einfüge-Reihenfolge geordnet (deterministische
/// Iteration); die Stapelreihenfolge ergibt sich aus den Ordinals der
/// Ebenen. Der Rückwärts-Index `action_owner` wird bei jeder Mutation im
/// Gleichschritt mit den Mitgliedschaften gepflegt.
#[derive(Debug, Clone, PartialEq)]
pub struct LayerStack {
    /// Alle Ebenen, indexiert nach ihrer ID
    pub layers: IndexMap<u64, Layer>,
    /// Rückwärts-Index: Aktions-ID auf besitzende Ebene
    action_owner: HashMap<u64, u64>,
    /// Nächste zu vergebende Ebenen-ID
    next_layer_id: u64,
    /// Nächstes zu vergebendes Ordinal (monoton wachsend)
    next_ordinal: u64,
}

impl Default for LayerStack {
    fn default() -> Self {
        Self::new()
    }
}

impl LayerStack {
    /// Erstellt eine leere Ebenen-Tabelle.
    pub fn new() -> Self {
        Self {
            layers: IndexMap::new(),
            action_owner: HashMap::new(),
            next_layer_id: 1,
            next_ordinal: 0,
        }
    }

    /// Legt eine neue Ebene mit dem nächsten Ordinal an.
    ///
    /// Ohne expliziten Namen erhält die Ebene den konfigurierten
    /// Standardnamen. Schlägt mit [`EngineError::LayerLimitExceeded`]
    /// fehl, sobald das Limit erreicht ist; die Tabelle bleibt dann
    /// unverändert.
    pub fn create_layer(
        &mut self,
        name: Option<&str>,
        fallback_name: &str,
        max_layers: usize,
    ) -> Result<u64, EngineError> {
        if self.layers.len() >= max_layers {
            log::warn!(
                "Ebenen-Limit erreicht ({} von {}), Anlage abgelehnt",
                self.layers.len(),
                max_layers
            );
            return Err(EngineError::LayerLimitExceeded { max: max_layers });
        }

        Ok(self.spawn_layer(name.unwrap_or(fallback_name)))
    }

    /// Legt eine Ebene ohne Limit-Prüfung an (Konstruktion und Reparatur).
    pub(crate) fn spawn_layer(&mut self, name: &str) -> u64 {
        let id = self.next_layer_id;
        self.next_layer_id += 1;
        let ordinal = self.next_ordinal;
        self.next_ordinal += 1;

        self.layers.insert(id, Layer::new(id, name, ordinal));
        id
    }

    /// Entfernt eine Ebene.
    ///
    /// Die letzte verbleibende Ebene kann nicht gelöscht werden. Mit
    /// `rehome` ziehen die Aktionen der gelöschten Ebene auf die
    /// Standard-Ebene um (Gruppen-Modus); ohne `rehome` verlieren sie
    /// ihre Zuordnung (Einzel-Modus).
    pub fn delete_layer(&mut self, layer_id: u64, rehome: bool, default_name: &str) -> bool {
        if !self.layers.contains_key(&layer_id) {
            log::warn!("Löschen abgelehnt: Ebene {layer_id} unbekannt");
            return false;
        }
        if self.layers.len() <= 1 {
            log::warn!("Löschen abgelehnt: Ebene {layer_id} ist die letzte Ebene");
            return false;
        }

        let Some(removed) = self.layers.shift_remove(&layer_id) else {
            return false;
        };
        let orphaned: Vec<u64> = removed.membership.ids().to_vec();

        if rehome {
            if let Some(target_id) = self.default_layer_id(default_name) {
                if let Some(target) = self.layers.get_mut(&target_id) {
                    for action_id in &orphaned {
                        target.membership.push(*action_id);
                        self.action_owner.insert(*action_id, target_id);
                    }
                    target.touch();
                    target.cache.invalidate();
                    log::debug!(
                        "{} Aktionen von Ebene {layer_id} auf Ebene {target_id} umgezogen",
                        orphaned.len()
                    );
                }
            }
        } else {
            for action_id in &orphaned {
                self.action_owner.remove(action_id);
            }
            if !orphaned.is_empty() {
                log::debug!(
                    "{} Aktionen von Ebene {layer_id} haben ihre Zuordnung verloren",
                    orphaned.len()
                );
            }
        }

        true
    }

    /// Liefert eine Ebene per ID.
    pub fn get(&self, layer_id: u64) -> Option<&Layer> {
        self.layers.get(&layer_id)
    }

    /// Liefert eine Ebene per ID (mutabel).
    pub fn get_mut(&mut self, layer_id: u64) -> Option<&mut Layer> {
        self.layers.get_mut(&layer_id)
    }

    /// Alle Ebenen, aufsteigend nach Ordinal sortiert.
    pub fn get_all(&self) -> Vec<&Layer> {
        let mut all: Vec<&Layer> = self.layers.values().collect();
        all.sort_by_key(|layer| layer.ordinal);
        all
    }

    /// Alle sichtbaren Ebenen, aufsteigend nach Ordinal sortiert.
    pub fn get_visible(&self) -> Vec<&Layer> {
        let mut visible: Vec<&Layer> = self.layers.values().filter(|l| l.visible).collect();
        visible.sort_by_key(|layer| layer.ordinal);
        visible
    }

    /// Besitzende Ebene einer Aktion (O(1) über den Rückwärts-Index).
    pub fn layer_of_action(&self, action_id: u64) -> Option<u64> {
        self.action_owner.get(&action_id).copied()
    }

    /// Benennt eine Ebene um.
    pub fn rename(&mut self, layer_id: u64, name: &str) -> bool {
        let Some(layer) = self.layers.get_mut(&layer_id) else {
            log::warn!("Umbenennen abgelehnt: Ebene {layer_id} unbekannt");
            return false;
        };

        if layer.name == name {
            return true;
        }

        layer.name = name.to_string();
        layer.touch();
        layer.cache.invalidate();
        true
    }

    /// Setzt die Sichtbarkeit einer Ebene.
    ///
    /// Ändert keine Pixel des Caches, nur das Compositing; das Surface
    /// bleibt deshalb gültig.
    pub fn set_visible(&mut self, layer_id: u64, visible: bool) -> bool {
        let Some(layer) = self.layers.get_mut(&layer_id) else {
            log::warn!("Sichtbarkeit abgelehnt: Ebene {layer_id} unbekannt");
            return false;
        };

        if layer.visible == visible {
            return true;
        }

        layer.visible = visible;
        layer.touch();
        true
    }

    /// Setzt die Deckkraft einer Ebene (geklemmt auf 0.0 bis 1.0).
    ///
    /// Wie die Sichtbarkeit eine reine Compositing-Eigenschaft; das
    /// zwischengespeicherte Surface bleibt gültig.
    pub fn set_opacity(&mut self, layer_id: u64, opacity: f32) -> bool {
        let Some(layer) = self.layers.get_mut(&layer_id) else {
            log::warn!("Deckkraft abgelehnt: Ebene {layer_id} unbekannt");
            return false;
        };

        let opacity = opacity.clamp(0.0, 1.0);
        if layer.opacity == opacity {
            return true;
        }

        layer.opacity = opacity;
        layer.touch();
        true
    }

    /// Sperrt oder entsperrt eine Ebene.
    pub fn set_locked(&mut self, layer_id: u64, locked: bool) -> bool {
        let Some(layer) = self.layers.get_mut(&layer_id) else {
            log::warn!("Sperren abgelehnt: Ebene {layer_id} unbekannt");
            return false;
        };

        if layer.locked == locked {
            return true;
        }

        layer.locked = locked;
        layer.touch();
        layer.cache.invalidate();
        true
    }

    /// Weist eine Aktion einer Ebene zu und zieht sie bei Bedarf um.
    ///
    /// Abgelehnt, wenn die Ziel-Ebene fehlt oder gesperrt ist. Mit
    /// `enforce_single` zusätzlich abgelehnt, wenn die Ziel-Ebene bereits
    /// eine andere Aktion hält (eine Aktion pro Ebene im Einzel-Modus).
    pub fn assign_action(&mut self, action_id: u64, layer_id: u64, enforce_single: bool) -> bool {
        let current = self.action_owner.get(&action_id).copied();
        if current == Some(layer_id) {
            return true;
        }

        let Some(target) = self.layers.get(&layer_id) else {
            log::warn!("Zuweisung abgelehnt: Ebene {layer_id} unbekannt");
            return false;
        };
        if target.locked {
            log::warn!("Zuweisung abgelehnt: Ebene {layer_id} ist gesperrt");
            return false;
        }
        if enforce_single && !target.membership.is_empty() {
            log::warn!("Zuweisung abgelehnt: Ebene {layer_id} hält bereits eine Aktion");
            return false;
        }

        if let Some(previous_id) = current {
            if let Some(previous) = self.layers.get_mut(&previous_id) {
                previous.membership.remove(action_id);
                previous.touch();
                previous.cache.invalidate();
            }
        }

        let Some(target) = self.layers.get_mut(&layer_id) else {
            return false;
        };
        target.membership.push(action_id);
        target.touch();
        target.cache.invalidate();
        self.action_owner.insert(action_id, layer_id);
        true
    }

    /// Löst eine Aktion von ihrer Ebene, ohne die Ebene zu löschen.
    pub fn remove_action(&mut self, action_id: u64) -> bool {
        let Some(layer_id) = self.action_owner.remove(&action_id) else {
            log::warn!("Ablösen abgelehnt: Aktion {action_id} ist keiner Ebene zugeordnet");
            return false;
        };

        if let Some(layer) = self.layers.get_mut(&layer_id) {
            layer.membership.remove(action_id);
            layer.touch();
            layer.cache.invalidate();
        }
        true
    }

    /// Anzahl der Ebenen.
    pub fn layer_count(&self) -> usize {
        self.layers.len()
    }

    /// Anzahl aller zugeordneten Aktionen.
    pub fn action_count(&self) -> usize {
        self.action_owner.len()
    }

    /// Markiert die Caches aller Ebenen als veraltet.
    ///
    /// Für Operationen, deren Auswirkung sich nicht günstig eingrenzen
    /// lässt (etwa ein globales Undo).
    pub fn mark_all_dirty(&mut self) {
        for layer in self.layers.values_mut() {
            layer.cache.invalidate();
        }
        log::debug!("Alle {} Ebenen-Caches invalidiert", self.layers.len());
    }

    /// Standard-Ebene: niedrigstes Ordinal, Namenstreffer bevorzugt.
    pub fn default_layer_id(&self, default_name: &str) -> Option<u64> {
        self.layers
            .values()
            .min_by_key(|layer| (layer.name != default_name, layer.ordinal))
            .map(|layer| layer.id)
    }

    /// Alle zugeordneten Aktions-IDs, nach Stapelreihenfolge und
    /// Einfüge-Reihenfolge innerhalb der Ebene.
    pub fn all_action_ids_ordered(&self) -> Vec<u64> {
        let mut seen = std::collections::HashSet::with_capacity(self.action_owner.len());
        let mut ordered = Vec::with_capacity(self.action_owner.len());
        for layer in self.get_all() {
            for action_id in layer.membership.ids() {
                if seen.insert(*action_id) {
                    ordered.push(*action_id);
                }
            }
        }
        ordered
    }

    /// Höchstes aktuell vergebenes Ordinal.
    pub fn max_ordinal(&self) -> Option<u64> {
        self.layers.values().map(|layer| layer.ordinal).max()
    }
}
