//! Konsistenz-Audit und Selbstheilung der Ebenen-Tabelle.

use std::collections::{HashMap, HashSet};

use super::LayerStack;

/// Eine bei Audit oder Selbstheilung gefundene Auffälligkeit.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConsistencyIssue {
    /// Zwei Ebenen teilen dasselbe Ordinal
    DuplicateOrdinal {
        /// Das doppelt vergebene Ordinal
        ordinal: u64,
        /// Ebene, die das Ordinal zuerst hielt
        first: u64,
        /// Ebene mit demselben Ordinal
        second: u64,
    },
    /// Rückwärts-Index zeigt auf eine nicht existierende Ebene
    DanglingOwner {
        /// Betroffene Aktion
        action_id: u64,
        /// Nicht existierende Ebene
        layer_id: u64,
    },
    /// Rückwärts-Index nennt eine Ebene, deren Mitgliedschaft die Aktion nicht führt
    OwnerNotMember {
        /// Betroffene Aktion
        action_id: u64,
        /// Im Index eingetragene Ebene
        layer_id: u64,
    },
    /// Mitgliedschaft ohne passenden Eintrag im Rückwärts-Index
    MemberWithoutOwner {
        /// Betroffene Aktion
        action_id: u64,
        /// Ebene, die die Aktion führt
        layer_id: u64,
    },
    /// Sequenz und Mengen-Index einer Ebene weichen voneinander ab
    MembershipDesync {
        /// Betroffene Ebene
        layer_id: u64,
    },
    /// Keine Ebene vorhanden
    NoLayers,
    /// Ebene überschreitet die Ein-Aktion-Grenze des Einzel-Modus
    TooManyActions {
        /// Betroffene Ebene
        layer_id: u64,
        /// Anzahl der Aktionen
        count: usize,
    },
    /// Aktive Ebene existiert nicht mehr
    ActiveLayerMissing {
        /// Die nicht mehr existierende Ebene
        layer_id: u64,
    },
    /// Aktive Ebene ist gesperrt
    ActiveLayerLocked {
        /// Die gesperrte Ebene
        layer_id: u64,
    },
}

/// Ergebnis eines read-only Konsistenz-Audits.
#[derive(Debug, Clone, Default)]
pub struct ValidationReport {
    /// Invarianten-Verletzungen
    pub errors: Vec<ConsistencyIssue>,
    /// Auffällige, aber tolerierbare Zustände
    pub warnings: Vec<ConsistencyIssue>,
}

impl ValidationReport {
    /// `true`, wenn keine Invariante verletzt ist.
    pub fn is_clean(&self) -> bool {
        self.errors.is_empty()
    }
}

/// Statistik einer Selbstheilung.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RepairReport {
    /// Entfernte tote oder widersprüchliche Einträge des Rückwärts-Index
    pub dropped_owners: usize,
    /// Nachgetragene Einträge des Rückwärts-Index
    pub restored_owners: usize,
    /// Ebenen mit neu aufgebautem Mengen-Index
    pub rebuilt_memberships: usize,
    /// Nach Kollisionen neu vergebene Ordinals
    pub reassigned_ordinals: usize,
    /// Standard-Ebene wurde neu angelegt
    pub recreated_default: bool,
    /// Aktive Ebene wurde neu gesetzt
    pub active_fixed: bool,
}

impl RepairReport {
    /// Gesamtzahl der angewendeten Korrekturen.
    pub fn total_fixes(&self) -> usize {
        self.dropped_owners
            + self.restored_owners
            + self.rebuilt_memberships
            + self.reassigned_ordinals
            + usize::from(self.recreated_default)
            + usize::from(self.active_fixed)
    }
}

impl LayerStack {
    /// Read-only Konsistenz-Audit über alle Invarianten.
    ///
    /// `enforce_single` aktiviert die Ein-Aktion-Prüfung des
    /// Einzel-Modus; `active` ist die aktuell aktive Ebene der Engine.
    /// Es wird nichts verändert und nichts geworfen.
    pub fn validate(&self, enforce_single: bool, active: Option<u64>) -> ValidationReport {
        let mut report = ValidationReport::default();

        if self.layers.is_empty() {
            report.errors.push(ConsistencyIssue::NoLayers);
        }

        let mut seen_ordinals: HashMap<u64, u64> = HashMap::new();
        for layer in self.layers.values() {
            if let Some(first) = seen_ordinals.insert(layer.ordinal, layer.id) {
                report.errors.push(ConsistencyIssue::DuplicateOrdinal {
                    ordinal: layer.ordinal,
                    first,
                    second: layer.id,
                });
            }
        }

        for layer in self.layers.values() {
            if !layer.membership.is_consistent() {
                report
                    .errors
                    .push(ConsistencyIssue::MembershipDesync { layer_id: layer.id });
            }
            if enforce_single && layer.membership.len() > 1 {
                report.errors.push(ConsistencyIssue::TooManyActions {
                    layer_id: layer.id,
                    count: layer.membership.len(),
                });
            }
            for action_id in layer.membership.ids() {
                if self.action_owner.get(action_id) != Some(&layer.id) {
                    report.errors.push(ConsistencyIssue::MemberWithoutOwner {
                        action_id: *action_id,
                        layer_id: layer.id,
                    });
                }
            }
        }

        for (action_id, layer_id) in &self.action_owner {
            match self.layers.get(layer_id) {
                None => report.errors.push(ConsistencyIssue::DanglingOwner {
                    action_id: *action_id,
                    layer_id: *layer_id,
                }),
                Some(layer) if !layer.membership.contains(*action_id) => {
                    report.errors.push(ConsistencyIssue::OwnerNotMember {
                        action_id: *action_id,
                        layer_id: *layer_id,
                    });
                }
                Some(_) => {}
            }
        }

        if let Some(active_id) = active {
            match self.layers.get(&active_id) {
                None => report
                    .errors
                    .push(ConsistencyIssue::ActiveLayerMissing { layer_id: active_id }),
                Some(layer) if layer.locked => report
                    .warnings
                    .push(ConsistencyIssue::ActiveLayerLocked { layer_id: active_id }),
                Some(_) => {}
            }
        }

        report
    }

    /// Best-Effort-Selbstheilung in eine Richtung.
    ///
    /// Die Mitgliedschafts-Sequenzen gelten als Wahrheit: Mengen-Indizes
    /// werden daraus neu aufgebaut, der Rückwärts-Index wird abgeglichen,
    /// Ordinal-Kollisionen aufgelöst und die aktive Ebene fällt bei
    /// Bedarf auf die Standard-Ebene zurück. Wirft nie; degradierter
    /// Zustand wird korrigiert statt abgelehnt.
    pub fn repair(&mut self, default_name: &str, active: &mut Option<u64>) -> RepairReport {
        let mut report = RepairReport::default();

        // Mengen-Indizes aus den Sequenzen neu aufbauen
        for layer in self.layers.values_mut() {
            if layer.membership.rebuild_index() {
                layer.cache.invalidate();
                report.rebuilt_memberships += 1;
            }
        }

        // Rückwärts-Index: tote und widersprüchliche Einträge entfernen
        let owner_snapshot: Vec<(u64, u64)> = self
            .action_owner
            .iter()
            .map(|(action, layer)| (*action, *layer))
            .collect();
        for (action_id, layer_id) in owner_snapshot {
            let keep = self
                .layers
                .get(&layer_id)
                .is_some_and(|layer| layer.membership.contains(action_id));
            if !keep {
                self.action_owner.remove(&action_id);
                report.dropped_owners += 1;
            }
        }

        // Mitglieder ohne Rückwärts-Eintrag nachtragen
        let mut missing: Vec<(u64, u64)> = Vec::new();
        for layer in self.layers.values() {
            for action_id in layer.membership.ids() {
                if !self.action_owner.contains_key(action_id) {
                    missing.push((*action_id, layer.id));
                }
            }
        }
        for (action_id, layer_id) in missing {
            self.action_owner.insert(action_id, layer_id);
            report.restored_owners += 1;
        }

        // Ordinal-Kollisionen auflösen: erstes Vorkommen behält sein
        // Ordinal, weitere erhalten frische Werte oberhalb des Maximums
        let mut next_free = self.max_ordinal().map_or(0, |max| max + 1);
        let mut seen: HashSet<u64> = HashSet::new();
        for layer in self.layers.values_mut() {
            if !seen.insert(layer.ordinal) {
                layer.ordinal = next_free;
                seen.insert(next_free);
                next_free += 1;
                layer.cache.invalidate();
                report.reassigned_ordinals += 1;
            }
        }
        if self.next_ordinal < next_free {
            self.next_ordinal = next_free;
        }

        // Leere Tabelle: Standard-Ebene neu anlegen
        if self.layers.is_empty() {
            self.spawn_layer(default_name);
            report.recreated_default = true;
        }

        // Aktive Ebene auf die Standard-Ebene zurückfallen lassen
        if let Some(active_id) = *active {
            if !self.layers.contains_key(&active_id) {
                *active = self.default_layer_id(default_name);
                report.active_fixed = true;
            }
        }

        if report.total_fixes() > 0 {
            log::info!(
                "Selbstheilung abgeschlossen: {} Korrekturen ({} Index-Einträge entfernt, {} nachgetragen, {} Mitgliedschaften, {} Ordinals)",
                report.total_fixes(),
                report.dropped_owners,
                report.restored_owners,
                report.rebuilt_memberships,
                report.reassigned_ordinals
            );
        }
        report
    }
}
