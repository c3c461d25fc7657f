//! Mitgliedschaft einer Ebene: Aktions-Sequenz plus Mengen-Index.

use std::collections::HashSet;

/// Geordnete Aktionsliste einer Ebene mit parallelem Mengen-Index.
///
/// Die Sequenz trägt die Einfüge-Reihenfolge (relevant für die Gruppierung),
/// der Index liefert O(1)-Mitgliedschaftstests. Nach jeder Mutation über
/// diese API enthalten beide exakt dieselben Elemente; `rebuild_index`
/// stellt das nach externem Drift wieder her, wobei die Sequenz als
/// Wahrheit gilt.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Membership {
    sequence: Vec<u64>,
    index: HashSet<u64>,
}

impl Membership {
    /// Erstellt eine leere Mitgliedschaft.
    pub fn new() -> Self {
        Self::default()
    }

    /// Anzahl der zugeordneten Aktionen.
    pub fn len(&self) -> usize {
        self.sequence.len()
    }

    /// `true`, wenn keine Aktion zugeordnet ist.
    pub fn is_empty(&self) -> bool {
        self.sequence.is_empty()
    }

    /// O(1)-Mitgliedschaftstest über den Mengen-Index.
    pub fn contains(&self, action_id: u64) -> bool {
        self.index.contains(&action_id)
    }

    /// Aktions-IDs in Einfüge-Reihenfolge.
    pub fn ids(&self) -> &[u64] {
        &self.sequence
    }

    /// Zuletzt eingefügte Aktion.
    pub fn last(&self) -> Option<u64> {
        self.sequence.last().copied()
    }

    /// Hängt eine Aktion hinten an. `false`, wenn sie bereits enthalten ist.
    pub fn push(&mut self, action_id: u64) -> bool {
        if !self.index.insert(action_id) {
            return false;
        }
        self.sequence.push(action_id);
        true
    }

    /// Entfernt eine Aktion. `false`, wenn sie nicht enthalten ist.
    pub fn remove(&mut self, action_id: u64) -> bool {
        if !self.index.remove(&action_id) {
            return false;
        }
        self.sequence.retain(|id| *id != action_id);
        true
    }

    /// Leert Sequenz und Index.
    pub fn clear(&mut self) {
        self.sequence.clear();
        self.index.clear();
    }

    /// Prüft, ob Sequenz und Index dieselben Elemente enthalten.
    pub fn is_consistent(&self) -> bool {
        if self.sequence.len() != self.index.len() {
            return false;
        }
        self.sequence.iter().all(|id| self.index.contains(id))
    }

    /// Baut den Mengen-Index aus der Sequenz neu auf.
    ///
    /// Duplikate in der Sequenz werden dabei entfernt (erstes Vorkommen
    /// gewinnt). Liefert `true`, wenn sich etwas geändert hat.
    pub fn rebuild_index(&mut self) -> bool {
        let mut fresh: HashSet<u64> = HashSet::with_capacity(self.sequence.len());
        let sequence_len_before = self.sequence.len();
        self.sequence.retain(|id| fresh.insert(*id));

        let changed = self.sequence.len() != sequence_len_before || fresh != self.index;
        self.index = fresh;
        changed
    }

    /// Simuliert externen Drift zwischen Sequenz und Index.
    #[cfg(test)]
    pub(crate) fn clear_index_only(&mut self) {
        self.index.clear();
    }
}
