//! Ordinal-Verwaltung: Umsortieren und Duplizieren ohne Kollisionen.

use super::LayerStack;
use crate::core::Layer;
use crate::error::EngineError;

impl LayerStack {
    /// Position einer Ebene in der Ordinal-sortierten Liste.
    pub fn stack_index_of(&self, layer_id: u64) -> Option<usize> {
        self.get_all()
            .iter()
            .position(|layer| layer.id == layer_id)
    }

    /// Verschiebt eine Ebene an den Index `target_index` der
    /// Ordinal-sortierten Liste.
    ///
    /// Die Ebene übernimmt das Ordinal, das bisher am Ziel-Index stand;
    /// alle dazwischenliegenden Ebenen rücken um einen Platz zur
    /// freigewordenen Seite. Die Ordinal-Multimenge bleibt dabei
    /// unverändert, nur die Zuordnung zu den Ebenen wechselt.
    /// Ein Index außerhalb des gültigen Bereichs wird geklemmt; die
    /// aktuelle Position ist ein No-op mit Rückgabe `true`.
    pub fn reorder(&mut self, layer_id: u64, target_index: usize) -> bool {
        if !self.layers.contains_key(&layer_id) {
            log::warn!("Umsortieren abgelehnt: Ebene {layer_id} unbekannt");
            return false;
        }

        let order: Vec<(u64, u64)> = {
            let mut sorted: Vec<&Layer> = self.layers.values().collect();
            sorted.sort_by_key(|layer| layer.ordinal);
            sorted.iter().map(|layer| (layer.id, layer.ordinal)).collect()
        };

        let Some(source_index) = order.iter().position(|(id, _)| *id == layer_id) else {
            return false;
        };
        let target_index = target_index.min(order.len() - 1);
        if source_index == target_index {
            return true;
        }

        let ordinals: Vec<u64> = order.iter().map(|(_, ordinal)| *ordinal).collect();
        let mut ids: Vec<u64> = order.iter().map(|(id, _)| *id).collect();
        let moved = ids.remove(source_index);
        ids.insert(target_index, moved);

        // Position i behält ordinals[i]; nur die Ebenen-Zuordnung wechselt
        for (position, id) in ids.iter().enumerate() {
            if let Some(layer) = self.layers.get_mut(id) {
                if layer.ordinal != ordinals[position] {
                    layer.ordinal = ordinals[position];
                    layer.cache.invalidate();
                }
            }
        }
        true
    }

    /// Verschiebt eine Ebene an die Spitze des Stapels.
    pub fn move_to_top(&mut self, layer_id: u64) -> bool {
        let last = self.layers.len().saturating_sub(1);
        self.reorder(layer_id, last)
    }

    /// Verschiebt eine Ebene ganz nach hinten.
    pub fn move_to_bottom(&mut self, layer_id: u64) -> bool {
        self.reorder(layer_id, 0)
    }

    /// Verschiebt eine Ebene einen Platz nach oben.
    pub fn move_up(&mut self, layer_id: u64) -> bool {
        let Some(index) = self.stack_index_of(layer_id) else {
            log::warn!("Umsortieren abgelehnt: Ebene {layer_id} unbekannt");
            return false;
        };
        self.reorder(layer_id, index + 1)
    }

    /// Verschiebt eine Ebene einen Platz nach unten.
    pub fn move_down(&mut self, layer_id: u64) -> bool {
        let Some(index) = self.stack_index_of(layer_id) else {
            log::warn!("Umsortieren abgelehnt: Ebene {layer_id} unbekannt");
            return false;
        };
        self.reorder(layer_id, index.saturating_sub(1))
    }

    /// Dupliziert eine Ebene direkt oberhalb der Quelle.
    ///
    /// Das Duplikat erhält `quell-Ordinal + 1`; bestehende Ebenen ab
    /// diesem Ordinal werden um eins angehoben, das höchste zuerst.
    /// `new_action_ids` sind die vom History-Store geklonten Aktions-IDs,
    /// eins zu eins in der Reihenfolge der Quell-Mitgliedschaft. Bei
    /// unbekannter Quelle oder nicht passenden IDs: `Ok(None)` mit
    /// Warnung; bei erreichtem Ebenen-Limit der Kapazitätsfehler.
    pub fn duplicate_layer(
        &mut self,
        source_id: u64,
        new_action_ids: &[u64],
        max_layers: usize,
    ) -> Result<Option<u64>, EngineError> {
        let Some(source) = self.layers.get(&source_id) else {
            log::warn!("Duplizieren abgelehnt: Ebene {source_id} unbekannt");
            return Ok(None);
        };
        if new_action_ids.len() != source.membership.len() {
            log::warn!(
                "Duplizieren abgelehnt: {} neue Aktions-IDs für {} Aktionen",
                new_action_ids.len(),
                source.membership.len()
            );
            return Ok(None);
        }
        if new_action_ids
            .iter()
            .any(|id| self.action_owner.contains_key(id))
        {
            log::warn!("Duplizieren abgelehnt: neue Aktions-IDs sind bereits vergeben");
            return Ok(None);
        }
        if self.layers.len() >= max_layers {
            log::warn!(
                "Ebenen-Limit erreicht ({} von {}), Duplizieren abgelehnt",
                self.layers.len(),
                max_layers
            );
            return Err(EngineError::LayerLimitExceeded { max: max_layers });
        }

        let new_name = format!("{} Kopie", source.name);
        let new_ordinal = source.ordinal + 1;
        let visible = source.visible;
        let opacity = source.opacity;

        // Platz schaffen: betroffene Ordinals anheben, das höchste zuerst
        let mut to_shift: Vec<(u64, u64)> = self
            .layers
            .values()
            .filter(|layer| layer.ordinal >= new_ordinal)
            .map(|layer| (layer.id, layer.ordinal))
            .collect();
        to_shift.sort_by(|a, b| b.1.cmp(&a.1));
        for (id, ordinal) in to_shift {
            if let Some(layer) = self.layers.get_mut(&id) {
                layer.ordinal = ordinal + 1;
                layer.cache.invalidate();
            }
        }

        let new_id = self.next_layer_id;
        self.next_layer_id += 1;

        let mut duplicate = Layer::new(new_id, new_name, new_ordinal);
        duplicate.visible = visible;
        duplicate.opacity = opacity;
        for action_id in new_action_ids {
            duplicate.membership.push(*action_id);
            self.action_owner.insert(*action_id, new_id);
        }
        self.layers.insert(new_id, duplicate);

        let highest = self.max_ordinal().unwrap_or(0);
        if self.next_ordinal <= highest {
            self.next_ordinal = highest + 1;
        }

        log::debug!("Ebene {source_id} als Ebene {new_id} dupliziert (Ordinal {new_ordinal})");
        Ok(Some(new_id))
    }
}
