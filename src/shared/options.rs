//! Zentrale Konfiguration der Ebenen-Engine.
//!
//! `EngineOptions` enthält alle zur Laufzeit änderbaren Werte.
//! Die `const`-Werte bleiben als Fallback/Default erhalten.

use serde::{Deserialize, Serialize};

use crate::engine::EngineMode;

// ── Ebenen ──────────────────────────────────────────────────────────

/// Maximale Anzahl gleichzeitiger Ebenen.
pub const MAX_LAYERS: usize = 50;
/// Standardname neu angelegter Ebenen.
pub const DEFAULT_LAYER_NAME: &str = "Ebene 1";
/// Maximale Aktionen pro Ebene im Gruppen-Modus.
pub const MAX_ACTIONS_PER_LAYER: usize = 1000;

// ── Gruppierung ─────────────────────────────────────────────────────

/// Zeitschwelle in Millisekunden, nach der eine neue Gruppe beginnt.
pub const GROUP_TIME_THRESHOLD_MS: u64 = 5000;

// ── Partielles Redraw ───────────────────────────────────────────────

/// Aktionsanzahl, ab der die Zeichenfläche geteilt wird.
pub const SPLIT_ACTION_THRESHOLD: usize = 100;

// ── Laufzeit-Optionen (serialisierbar) ─────────────────────────────

/// Alle zur Laufzeit änderbaren Engine-Optionen.
/// Wird als `inkboard_layer_engine.toml` neben der Binary gespeichert.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineOptions {
    // ── Modus ───────────────────────────────────────────────────
    /// Betriebsmodus beim Start
    pub mode: EngineMode,

    // ── Ebenen ──────────────────────────────────────────────────
    /// Maximale Anzahl gleichzeitiger Ebenen
    pub max_layers: usize,
    /// Standardname neu angelegter Ebenen
    pub default_layer_name: String,
    /// Maximale Aktionen pro Ebene im Gruppen-Modus
    pub max_actions_per_layer: usize,

    // ── Gruppierung ─────────────────────────────────────────────
    /// Zeitschwelle in Millisekunden, nach der eine neue Gruppe beginnt
    pub group_time_threshold_ms: u64,
    /// Neue Ebene beginnen, wenn das Werkzeug wechselt
    pub new_layer_on_tool_change: bool,

    // ── Partielles Redraw ───────────────────────────────────────
    /// Dynamische Teilung der Zeichenfläche aktivieren
    pub dynamic_split: bool,
    /// Aktionsanzahl, ab der geteilt wird
    pub split_action_threshold: usize,
}

impl Default for EngineOptions {
    fn default() -> Self {
        Self {
            mode: EngineMode::default(),

            max_layers: MAX_LAYERS,
            default_layer_name: DEFAULT_LAYER_NAME.to_string(),
            max_actions_per_layer: MAX_ACTIONS_PER_LAYER,

            group_time_threshold_ms: GROUP_TIME_THRESHOLD_MS,
            new_layer_on_tool_change: true,

            dynamic_split: false,
            split_action_threshold: SPLIT_ACTION_THRESHOLD,
        }
    }
}

impl EngineOptions {
    /// Klemmt Werte in gültige Bereiche (mindestens eine Ebene).
    pub fn sanitize(&mut self) {
        if self.max_layers == 0 {
            log::warn!("max_layers 0 ist ungültig, verwende 1");
            self.max_layers = 1;
        }
        if self.max_actions_per_layer == 0 {
            log::warn!("max_actions_per_layer 0 ist ungültig, verwende 1");
            self.max_actions_per_layer = 1;
        }
    }

    /// Lädt Optionen aus einer TOML-Datei. Bei Fehler: Standardwerte.
    pub fn load_from_file(path: &std::path::Path) -> Self {
        let mut options = match std::fs::read_to_string(path) {
            Ok(content) => match toml::from_str(&content) {
                Ok(options) => {
                    log::info!("Optionen geladen aus: {}", path.display());
                    options
                }
                Err(e) => {
                    log::warn!("Optionen-Datei fehlerhaft, verwende Standardwerte: {e}");
                    Self::default()
                }
            },
            Err(_) => {
                log::info!("Keine Optionen-Datei gefunden, verwende Standardwerte");
                Self::default()
            }
        };
        options.sanitize();
        options
    }

    /// Speichert Optionen als TOML-Datei.
    pub fn save_to_file(&self, path: &std::path::Path) -> anyhow::Result<()> {
        let content = toml::to_string_pretty(self)?;
        std::fs::write(path, content)?;
        log::info!("Optionen gespeichert nach: {}", path.display());
        Ok(())
    }

    /// Ermittelt den Pfad zur Optionen-Datei neben der Binary.
    pub fn config_path() -> std::path::PathBuf {
        std::env::current_exe()
            .unwrap_or_else(|_| std::path::PathBuf::from("inkboard_layer_engine"))
            .parent()
            .unwrap_or_else(|| std::path::Path::new("."))
            .join("inkboard_layer_engine.toml")
    }
}

// ── Teil-Updates ────────────────────────────────────────────────────

/// Teil-Update der Optionen; nur gesetzte Felder überschreiben den Bestand.
///
/// Ein gesetzter `mode` wird nicht hier angewendet, sondern löst in
/// [`crate::engine::LayerEngine::update_options`] die reguläre
/// Modus-Konvertierung aus.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineOptionsUpdate {
    /// Neuer Betriebsmodus
    pub mode: Option<EngineMode>,
    /// Maximale Anzahl gleichzeitiger Ebenen
    pub max_layers: Option<usize>,
    /// Standardname neu angelegter Ebenen
    pub default_layer_name: Option<String>,
    /// Maximale Aktionen pro Ebene im Gruppen-Modus
    pub max_actions_per_layer: Option<usize>,
    /// Zeitschwelle in Millisekunden für neue Gruppen
    pub group_time_threshold_ms: Option<u64>,
    /// Neue Ebene beim Werkzeugwechsel beginnen
    pub new_layer_on_tool_change: Option<bool>,
    /// Dynamische Teilung der Zeichenfläche aktivieren
    pub dynamic_split: Option<bool>,
    /// Aktionsanzahl, ab der geteilt wird
    pub split_action_threshold: Option<usize>,
}

impl EngineOptionsUpdate {
    /// Wendet alle gesetzten Felder außer dem Modus an.
    pub fn apply_scalars(&self, options: &mut EngineOptions) {
        if let Some(value) = self.max_layers {
            options.max_layers = value;
        }
        if let Some(value) = &self.default_layer_name {
            options.default_layer_name = value.clone();
        }
        if let Some(value) = self.max_actions_per_layer {
            options.max_actions_per_layer = value;
        }
        if let Some(value) = self.group_time_threshold_ms {
            options.group_time_threshold_ms = value;
        }
        if let Some(value) = self.new_layer_on_tool_change {
            options.new_layer_on_tool_change = value;
        }
        if let Some(value) = self.dynamic_split {
            options.dynamic_split = value;
        }
        if let Some(value) = self.split_action_threshold {
            options.split_action_threshold = value;
        }
        options.sanitize();
    }
}
