//! Kennzahlen über die Ebenen-Tabelle mit kurzlebigem Cache.

use std::time::{Duration, Instant};

use crate::core::LayerStack;

/// Gültigkeitsdauer einer zwischengespeicherten Statistik.
pub const STATS_CACHE_TTL: Duration = Duration::from_secs(1);

/// Zusammenfassung der Ebenen-Tabelle für Anzeige und Diagnose.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct LayerStats {
    /// Anzahl aller Ebenen
    pub layers: usize,
    /// Anzahl sichtbarer Ebenen
    pub visible: usize,
    /// Anzahl gesperrter Ebenen
    pub locked: usize,
    /// Anzahl aller zugeordneten Aktionen
    pub actions: usize,
}

impl LayerStats {
    /// Berechnet die Kennzahlen aus der Ebenen-Tabelle.
    pub fn compute(stack: &LayerStack) -> Self {
        let mut stats = Self {
            layers: stack.layer_count(),
            actions: stack.action_count(),
            ..Default::default()
        };
        for layer in stack.layers.values() {
            if layer.visible {
                stats.visible += 1;
            }
            if layer.locked {
                stats.locked += 1;
            }
        }
        stats
    }
}

/// Merkt sich die zuletzt berechneten Kennzahlen für kurze Zeit.
///
/// Mutierende Engine-Operationen verwerfen den Eintrag sofort, der
/// Zeitstempel fängt nur noch rohe Eingriffe an der Tabelle ab.
#[derive(Debug, Clone, Copy, Default)]
pub(crate) struct StatsCache {
    entry: Option<(Instant, LayerStats)>,
}

impl StatsCache {
    /// Liefert den Eintrag, solange er noch frisch ist.
    pub(crate) fn fresh(&self) -> Option<LayerStats> {
        self.entry.and_then(|(computed_at, stats)| {
            (computed_at.elapsed() < STATS_CACHE_TTL).then_some(stats)
        })
    }

    pub(crate) fn store(&mut self, stats: LayerStats) {
        self.entry = Some((Instant::now(), stats));
    }

    /// Verwirft den Eintrag; die nächste Abfrage rechnet neu.
    pub(crate) fn invalidate(&mut self) {
        self.entry = None;
    }
}
