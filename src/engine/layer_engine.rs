//! Die Engine selbst: Aktions-Routing, aktive Ebene, Moduswechsel und
//! das Zusammenspiel mit Zeichenfläche und History.

use std::time::Duration;

use anyhow::Context;
use image::RgbaImage;
use indexmap::IndexSet;

use crate::core::{ActionRecord, Layer, LayerStack, RepairReport, ValidationReport};
use crate::engine::mode::{rebuild_grouped, rebuild_individual, EngineMode};
use crate::engine::stats::{LayerStats, StatsCache};
use crate::error::EngineError;
use crate::shared::{
    overlay_priority, ActionLookup, EngineOptions, EngineOptionsUpdate, NoopHistory, NoopSurface,
    SurfaceBackend,
};

/// Zustand des Aktiv-Ebenen-Wechsels.
///
/// Während eines laufenden Wechsels werden weitere Wechsel-Anfragen
/// abgewiesen statt eingereiht.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum SwitchState {
    /// Kein Wechsel aktiv
    Steady,
    /// Overlay-Umbau läuft
    Switching,
}

/// Virtuelle Ebenen-Engine des Zeichenbretts.
///
/// Besitzt die Ebenen-Tabelle exklusiv und koordiniert Betriebsmodus,
/// aktive Ebene, Render-Caches und die angebundenen Collaborators.
/// Alle Operationen laufen synchron im aufrufenden Thread zu Ende;
/// Fehler der Collaborators degradieren die Darstellung, brechen aber
/// keine Ebenen-Operation ab.
pub struct LayerEngine {
    /// Ebenen-Tabelle. Roher Zugriff ist möglich; danach räumen
    /// [`LayerEngine::validate`] und [`LayerEngine::repair`] auf.
    pub stack: LayerStack,
    /// Aktueller Betriebsmodus
    mode: EngineMode,
    /// Aktive Ebene (Empfänger neuer Aktionen im Gruppen-Modus)
    active: Option<u64>,
    /// Schutz gegen verschachtelte Aktiv-Wechsel
    switch: SwitchState,
    /// Wirksame Optionen
    options: EngineOptions,
    /// Kurzlebiger Statistik-Cache
    stats: StatsCache,
    /// Für den Idle-Neuaufbau vorgemerkte Ebenen
    rebuild_queue: IndexSet<u64>,
    /// Anbindung an die Zeichenfläche
    surface: Box<dyn SurfaceBackend>,
    /// Anbindung an den History-Store
    history: Box<dyn ActionLookup>,
}

impl LayerEngine {
    /// Erstellt die Engine mit einer leeren Standard-Ebene.
    ///
    /// Die Standard-Ebene ist sofort aktiv; Overlays auf der
    /// Zeichenfläche entstehen erst mit dem ersten Wechsel.
    pub fn new(
        mut options: EngineOptions,
        surface: Box<dyn SurfaceBackend>,
        history: Box<dyn ActionLookup>,
    ) -> Self {
        options.sanitize();
        let mut stack = LayerStack::new();
        let first = stack.spawn_layer(&options.default_layer_name);

        Self {
            stack,
            mode: options.mode,
            active: Some(first),
            switch: SwitchState::Steady,
            options,
            stats: StatsCache::default(),
            rebuild_queue: IndexSet::new(),
            surface,
            history,
        }
    }

    /// Engine ohne angebundene Zeichenfläche und History.
    pub fn headless(options: EngineOptions) -> Self {
        Self::new(options, Box::new(NoopSurface), Box::new(NoopHistory))
    }

    /// Aktuelle Optionen.
    pub fn options(&self) -> &EngineOptions {
        &self.options
    }

    /// Aktueller Betriebsmodus.
    pub fn mode(&self) -> EngineMode {
        self.mode
    }

    /// Aktive Ebene, falls gesetzt.
    pub fn active_layer(&self) -> Option<u64> {
        self.active
    }

    /// Datensatz der aktiven Ebene, falls gesetzt.
    pub fn get_active(&self) -> Option<&Layer> {
        self.active.and_then(|layer_id| self.stack.get(layer_id))
    }

    /// Liefert eine Ebene per ID.
    pub fn get(&self, layer_id: u64) -> Option<&Layer> {
        self.stack.get(layer_id)
    }

    /// Alle Ebenen, aufsteigend nach Ordinal (unten zuerst).
    pub fn get_all(&self) -> Vec<&Layer> {
        self.stack.get_all()
    }

    /// Alle sichtbaren Ebenen, aufsteigend nach Ordinal.
    pub fn get_visible(&self) -> Vec<&Layer> {
        self.stack.get_visible()
    }

    /// Besitzende Ebene einer Aktion.
    pub fn layer_of_action(&self, action_id: u64) -> Option<u64> {
        self.stack.layer_of_action(action_id)
    }

    /// Registriert eine neue Aktion und liefert die aufnehmende Ebene.
    ///
    /// Im Einzel-Modus erhält jede Aktion bedingungslos eine frische
    /// Ebene, ein mitgebrachter Ebenen-Hinweis wird ignoriert. Im
    /// Gruppen-Modus wird ein Hinweis auf eine existierende, nicht
    /// gesperrte Ebene unverändert übernommen; sonst entscheidet die
    /// Heuristik zwischen Anhängen an die aktive Ebene und einer neuen
    /// Gruppe. Schlägt nur beim Ebenen-Limit fehl.
    pub fn register_action(&mut self, action: ActionRecord) -> Result<u64, EngineError> {
        match self.mode {
            EngineMode::Individual => {
                if action.layer_hint.is_some() {
                    log::debug!("Einzel-Modus: Ebenen-Hinweis wird ignoriert");
                }
                let layer_id = self.stack.create_layer(
                    None,
                    &self.options.default_layer_name,
                    self.options.max_layers,
                )?;
                self.stack.assign_action(action.id, layer_id, true);
                self.stats.invalidate();
                self.switch_active(layer_id);
                Ok(layer_id)
            }
            EngineMode::Grouped => self.register_grouped(action),
        }
    }

    fn register_grouped(&mut self, action: ActionRecord) -> Result<u64, EngineError> {
        if let Some(hint) = action.layer_hint {
            match self.stack.get(hint).map(|layer| layer.locked) {
                Some(false) => {
                    self.stack.assign_action(action.id, hint, false);
                    self.stats.invalidate();
                    self.refresh_partition();
                    return Ok(hint);
                }
                Some(true) => {
                    log::warn!("Ebenen-Hinweis {hint} ist gesperrt, normale Zuordnung")
                }
                None => log::warn!("Ebenen-Hinweis {hint} unbekannt, normale Zuordnung"),
            }
        }

        if let Some(active_id) = self.resolve_active() {
            if !self.needs_new_group(active_id, &action) {
                self.stack.assign_action(action.id, active_id, false);
                self.stats.invalidate();
                self.refresh_partition();
                return Ok(active_id);
            }
        }

        // Neue Gruppe beginnen und aktiv schalten
        let layer_id = self.stack.create_layer(
            None,
            &self.options.default_layer_name,
            self.options.max_layers,
        )?;
        self.stack.assign_action(action.id, layer_id, false);
        self.stats.invalidate();
        self.switch_active(layer_id);
        Ok(layer_id)
    }

    /// Aktive Ebene, sofern sie existiert und nicht gesperrt ist.
    fn resolve_active(&self) -> Option<u64> {
        let active_id = self.active?;
        let layer = self.stack.get(active_id)?;
        (!layer.locked).then_some(active_id)
    }

    /// Heuristik des Gruppen-Modus: braucht diese Aktion eine neue Gruppe?
    fn needs_new_group(&self, active_id: u64, action: &ActionRecord) -> bool {
        let Some(layer) = self.stack.get(active_id) else {
            return true;
        };

        let threshold = Duration::from_millis(self.options.group_time_threshold_ms);
        if layer.modified_at.elapsed() > threshold {
            log::debug!("Neue Gruppe: Zeitschwelle überschritten");
            return true;
        }

        if self.options.new_layer_on_tool_change {
            if let Some(last_action) = layer.membership.last() {
                // Nicht auflösbare Aktionen zählen als Werkzeugwechsel
                if self.history.tool_of(last_action) != Some(action.tool) {
                    log::debug!("Neue Gruppe: Werkzeugwechsel");
                    return true;
                }
            }
        }

        if layer.membership.len() >= self.options.max_actions_per_layer {
            log::debug!("Neue Gruppe: Aktionslimit der Ebene erreicht");
            return true;
        }

        false
    }

    /// Legt eine neue, leere Ebene zuoberst an.
    pub fn create_layer(&mut self, name: Option<&str>) -> Result<u64, EngineError> {
        let layer_id = self.stack.create_layer(
            name,
            &self.options.default_layer_name,
            self.options.max_layers,
        )?;
        self.stats.invalidate();
        Ok(layer_id)
    }

    /// Entfernt eine Ebene mitsamt ihrem Overlay.
    ///
    /// Im Gruppen-Modus wandern die Aktionen der Ebene auf die
    /// Standard-Ebene, im Einzel-Modus verlieren sie ihre Zuordnung.
    /// Die letzte verbliebene Ebene kann nicht entfernt werden.
    pub fn delete_layer(&mut self, layer_id: u64) -> bool {
        let rehome = self.mode == EngineMode::Grouped;
        if !self
            .stack
            .delete_layer(layer_id, rehome, &self.options.default_layer_name)
        {
            return false;
        }

        self.stats.invalidate();
        self.rebuild_queue.shift_remove(&layer_id);
        if self.active == Some(layer_id) {
            if let Err(e) = self.surface.remove_overlay(layer_id) {
                log::warn!("Overlay-Abbau für Ebene {layer_id} fehlgeschlagen: {e:#}");
            }
            self.active = None;
        }
        self.refresh_partition();
        true
    }

    /// Dupliziert eine Ebene mit frisch geklonten Aktions-IDs.
    ///
    /// `new_action_ids` liefert der History-Store, eine ID je Aktion der
    /// Quell-Ebene in Stapelreihenfolge.
    pub fn duplicate_layer(
        &mut self,
        source_id: u64,
        new_action_ids: &[u64],
    ) -> Result<Option<u64>, EngineError> {
        let duplicated =
            self.stack
                .duplicate_layer(source_id, new_action_ids, self.options.max_layers)?;
        if let Some(new_id) = duplicated {
            self.stats.invalidate();
            self.refresh_partition();
            return Ok(Some(new_id));
        }
        Ok(None)
    }

    /// Benennt eine Ebene um.
    pub fn rename_layer(&mut self, layer_id: u64, name: &str) -> bool {
        self.stack.rename(layer_id, name)
    }

    /// Setzt die Sichtbarkeit einer Ebene.
    pub fn set_visible(&mut self, layer_id: u64, visible: bool) -> bool {
        if !self.stack.set_visible(layer_id, visible) {
            return false;
        }
        self.stats.invalidate();
        true
    }

    /// Setzt die Deckkraft einer Ebene (geklemmt auf 0.0 bis 1.0).
    pub fn set_opacity(&mut self, layer_id: u64, opacity: f32) -> bool {
        self.stack.set_opacity(layer_id, opacity)
    }

    /// Sperrt oder entsperrt eine Ebene.
    ///
    /// Das Sperren der aktiven Ebene hebt die Auswahl auf.
    pub fn set_locked(&mut self, layer_id: u64, locked: bool) -> bool {
        if !self.stack.set_locked(layer_id, locked) {
            return false;
        }
        self.stats.invalidate();
        if locked && self.active == Some(layer_id) {
            log::debug!("Aktive Ebene {layer_id} gesperrt, Auswahl aufgehoben");
            if let Err(e) = self.surface.remove_overlay(layer_id) {
                log::warn!("Overlay-Abbau für Ebene {layer_id} fehlgeschlagen: {e:#}");
            }
            self.active = None;
        }
        true
    }

    /// Weist eine bestehende Aktion einer Ebene zu.
    pub fn assign_action(&mut self, action_id: u64, layer_id: u64) -> bool {
        let enforce_single = self.mode == EngineMode::Individual;
        if !self.stack.assign_action(action_id, layer_id, enforce_single) {
            return false;
        }
        self.stats.invalidate();
        true
    }

    /// Löst eine Aktion von ihrer Ebene.
    pub fn unassign_action(&mut self, action_id: u64) -> bool {
        if !self.stack.remove_action(action_id) {
            return false;
        }
        self.stats.invalidate();
        true
    }

    /// Wechselt die aktive Ebene.
    ///
    /// Abgelehnt bei unbekannter oder gesperrter Ebene sowie während
    /// eines bereits laufenden Wechsels. Der Overlay-Umbau ist
    /// Best-Effort: Fehler der Zeichenfläche degradieren zum
    /// vollständigen Redraw, der Wechsel selbst gelingt trotzdem.
    pub fn set_active_layer(&mut self, layer_id: u64) -> bool {
        if self.switch == SwitchState::Switching {
            log::warn!("Aktiv-Wechsel läuft noch, Anfrage für Ebene {layer_id} abgewiesen");
            return false;
        }
        let Some(layer) = self.stack.get(layer_id) else {
            log::warn!("Aktiv-Wechsel abgelehnt: Ebene {layer_id} unbekannt");
            return false;
        };
        if layer.locked {
            log::warn!("Aktiv-Wechsel abgelehnt: Ebene {layer_id} ist gesperrt");
            return false;
        }
        if self.active == Some(layer_id) {
            return true;
        }

        self.switch = SwitchState::Switching;
        self.switch_active(layer_id);
        self.switch = SwitchState::Steady;
        true
    }

    /// Baut die Overlays um und richtet die Zielebene als aktive ein.
    fn switch_active(&mut self, layer_id: u64) {
        if let Some(previous_id) = self.active.take() {
            if let Err(e) = self.surface.remove_overlay(previous_id) {
                log::warn!("Overlay-Abbau für Ebene {previous_id} fehlgeschlagen: {e:#}");
            }
        }

        let ordinal = self.stack.get(layer_id).map_or(0, |layer| layer.ordinal);
        if let Err(e) = self.surface.create_overlay(layer_id, overlay_priority(ordinal)) {
            log::warn!("Overlay-Aufbau für Ebene {layer_id} fehlgeschlagen: {e:#}");
            self.full_redraw_fallback();
        }

        self.active = Some(layer_id);
        self.refresh_partition();
    }

    /// Passt die Teilung der Zeichenfläche an die aktive Ebene an.
    ///
    /// Geteilt wird nur bei eingeschalteter dynamischer Teilung und
    /// erst, wenn die Aktionszahl außerhalb der aktiven Ebene die
    /// Schwelle erreicht; sonst wird eine bestehende Teilung wieder
    /// zusammengeführt.
    fn refresh_partition(&mut self) {
        if !self.options.dynamic_split {
            return;
        }
        let Some((ordinal, own_actions)) = self
            .active
            .and_then(|id| self.stack.get(id))
            .map(|layer| (layer.ordinal, layer.action_count()))
        else {
            self.merge_best_effort();
            return;
        };

        let off_active = self.stack.action_count() - own_actions;
        if off_active >= self.options.split_action_threshold {
            match self.surface.split_at(ordinal) {
                Ok(layout) => log::debug!(
                    "Zeichenfläche geteilt: {} Ebenen unter, {} über Ordinal {}",
                    layout.below,
                    layout.above,
                    layout.at
                ),
                Err(e) => {
                    log::warn!("Teilen der Zeichenfläche fehlgeschlagen: {e:#}");
                    self.full_redraw_fallback();
                }
            }
        } else {
            self.merge_best_effort();
        }
    }

    fn merge_best_effort(&mut self) {
        if let Err(e) = self.surface.merge() {
            log::warn!("Zusammenführen der Zeichenfläche fehlgeschlagen: {e:#}");
            self.stack.mark_all_dirty();
        }
    }

    /// Degradiert auf ein vollständiges Redraw aller Ebenen.
    fn full_redraw_fallback(&mut self) {
        self.merge_best_effort();
        self.stack.mark_all_dirty();
    }

    /// Verschiebt eine Ebene an den Ziel-Index der Stapelreihenfolge.
    pub fn reorder(&mut self, layer_id: u64, target_index: usize) -> bool {
        if !self.stack.reorder(layer_id, target_index) {
            return false;
        }
        self.refresh_partition();
        true
    }

    /// Hebt eine Ebene ganz nach oben.
    pub fn move_to_top(&mut self, layer_id: u64) -> bool {
        if !self.stack.move_to_top(layer_id) {
            return false;
        }
        self.refresh_partition();
        true
    }

    /// Senkt eine Ebene ganz nach unten.
    pub fn move_to_bottom(&mut self, layer_id: u64) -> bool {
        if !self.stack.move_to_bottom(layer_id) {
            return false;
        }
        self.refresh_partition();
        true
    }

    /// Hebt eine Ebene um eine Position.
    pub fn move_up(&mut self, layer_id: u64) -> bool {
        if !self.stack.move_up(layer_id) {
            return false;
        }
        self.refresh_partition();
        true
    }

    /// Senkt eine Ebene um eine Position.
    pub fn move_down(&mut self, layer_id: u64) -> bool {
        if !self.stack.move_down(layer_id) {
            return false;
        }
        self.refresh_partition();
        true
    }

    /// Wechselt den Betriebsmodus und baut die Ebenen-Tabelle um.
    ///
    /// Der Umbau erzeugt zuerst eine vollständige neue Tabelle; erst
    /// bei Erfolg werden Tabelle, Modus und aktive Ebene getauscht.
    /// Schlägt der Umbau am Ebenen-Limit fehl, bleibt der bisherige
    /// Zustand vollständig erhalten und der Fehler geht an den Aufrufer.
    pub fn set_mode(&mut self, mode: EngineMode) -> Result<(), EngineError> {
        if self.mode == mode {
            return Ok(());
        }

        let action_ids = self.stack.all_action_ids_ordered();
        let (stack, active) = match mode {
            EngineMode::Individual => rebuild_individual(&action_ids, &self.options)?,
            EngineMode::Grouped => rebuild_grouped(&action_ids, &self.options)?,
        };

        if let Some(previous_id) = self.active.take() {
            if let Err(e) = self.surface.remove_overlay(previous_id) {
                log::warn!("Overlay-Abbau für Ebene {previous_id} fehlgeschlagen: {e:#}");
            }
        }

        self.stack = stack;
        self.mode = mode;
        self.options.mode = mode;
        self.rebuild_queue.clear();
        self.stats.invalidate();

        if let Some(target) = active {
            self.switch_active(target);
        } else {
            self.refresh_partition();
        }

        log::info!(
            "Modus gewechselt zu {:?}: {} Ebenen, {} Aktionen",
            mode,
            self.stack.layer_count(),
            self.stack.action_count()
        );
        Ok(())
    }

    /// Wendet ein Teil-Update der Optionen an.
    ///
    /// Skalare Felder werden sofort übernommen. Ein enthaltener
    /// Moduswechsel durchläuft anschließend die reguläre Konvertierung;
    /// deren Fehler geht an den Aufrufer, die skalaren Felder bleiben
    /// dann bereits übernommen.
    pub fn update_options(&mut self, update: &EngineOptionsUpdate) -> Result<(), EngineError> {
        update.apply_scalars(&mut self.options);
        if let Some(mode) = update.mode {
            self.set_mode(mode)?;
        }
        Ok(())
    }

    /// Kennzahlen über die Ebenen-Tabelle, kurzzeitig zwischengespeichert.
    pub fn stats(&mut self) -> LayerStats {
        if let Some(stats) = self.stats.fresh() {
            return stats;
        }
        let stats = LayerStats::compute(&self.stack);
        self.stats.store(stats);
        stats
    }

    /// Read-only Konsistenz-Audit über alle Invarianten.
    pub fn validate(&self) -> ValidationReport {
        self.stack
            .validate(self.mode == EngineMode::Individual, self.active)
    }

    /// Best-Effort-Selbstheilung der Ebenen-Tabelle. Wirft nie.
    pub fn repair(&mut self) -> RepairReport {
        let mut active = self.active;
        let report = self
            .stack
            .repair(&self.options.default_layer_name, &mut active);
        self.active = active;

        let stack = &self.stack;
        self.rebuild_queue
            .retain(|layer_id| stack.layers.contains_key(layer_id));
        if report.total_fixes() > 0 {
            self.stats.invalidate();
        }
        report
    }

    /// Markiert die Render-Caches aller Ebenen als veraltet.
    pub fn mark_all_dirty(&mut self) {
        self.stack.mark_all_dirty();
    }

    /// Liefert das gerenderte Surface einer Ebene, bei Bedarf frisch gebaut.
    ///
    /// Neu gerendert wird bei gesetztem Dirty-Flag oder wenn die
    /// gespeicherte Größe nicht zur Anfrage passt. Das alte Surface
    /// wird vor dem Neuaufbau freigegeben; scheitert das Rendern,
    /// bleibt der Cache leer und veraltet.
    pub fn ensure_layer_surface(
        &mut self,
        layer_id: u64,
        width: u32,
        height: u32,
    ) -> anyhow::Result<&RgbaImage> {
        let layer = self
            .stack
            .layers
            .get_mut(&layer_id)
            .with_context(|| format!("Ebene {layer_id} unbekannt"))?;

        if layer.cache.needs_rebuild(width, height) {
            layer.cache.release();
            let rendered = self
                .surface
                .render_layer(layer.membership.ids(), width, height)
                .with_context(|| format!("Rendern der Ebene {layer_id} fehlgeschlagen"))?;
            layer.cache.store(rendered);
        }

        layer
            .cache
            .surface
            .as_ref()
            .context("Surface fehlt nach dem Aufbau")
    }

    /// Merkt eine Ebene für den Idle-Neuaufbau vor.
    ///
    /// Liefert `false` für unbekannte Ebenen und für Ebenen mit noch
    /// gültigem Cache.
    pub fn queue_rebuild(&mut self, layer_id: u64) -> bool {
        let Some(layer) = self.stack.get(layer_id) else {
            log::warn!("Vormerken abgelehnt: Ebene {layer_id} unbekannt");
            return false;
        };
        if !layer.cache.dirty {
            return false;
        }
        self.rebuild_queue.insert(layer_id);
        true
    }

    /// Arbeitet bis zu `max_layers` vorgemerkte Neuaufbauten ab.
    ///
    /// Jeder Schritt ersetzt das Surface genau einer Ebene; zwischen
    /// den Schritten ist der Zustand konsistent, der Host darf also
    /// jederzeit abbrechen. Gescheiterte Aufbauten werden protokolliert
    /// und nicht erneut eingereiht. Liefert die Anzahl neu gebauter
    /// Surfaces.
    pub fn process_idle(&mut self, width: u32, height: u32, max_layers: usize) -> usize {
        let mut rebuilt = 0;
        while rebuilt < max_layers {
            let Some(layer_id) = self.rebuild_queue.shift_remove_index(0) else {
                break;
            };
            match self.ensure_layer_surface(layer_id, width, height) {
                Ok(_) => rebuilt += 1,
                Err(e) => {
                    log::warn!("Idle-Neuaufbau für Ebene {layer_id} fehlgeschlagen: {e:#}")
                }
            }
        }
        rebuilt
    }
}

#[cfg(test)]
mod tests {
    use std::cell::RefCell;
    use std::collections::HashMap;
    use std::rc::Rc;
    use std::thread::sleep;

    use super::*;
    use crate::core::ToolKind;
    use crate::shared::SplitLayout;

    /// Protokolliert alle Backend-Aufrufe und kann gezielt fehlschlagen.
    #[derive(Debug, Default)]
    struct SurfaceLog {
        events: Vec<String>,
        fail_overlays: bool,
        fail_render: bool,
        render_calls: usize,
    }

    #[derive(Clone, Default)]
    struct RecordingSurface(Rc<RefCell<SurfaceLog>>);

    impl SurfaceBackend for RecordingSurface {
        fn create_overlay(&mut self, layer_id: u64, priority: i64) -> anyhow::Result<()> {
            let mut log = self.0.borrow_mut();
            log.events.push(format!("create:{layer_id}:{priority}"));
            if log.fail_overlays {
                anyhow::bail!("Overlay-Fehler (Testfall)");
            }
            Ok(())
        }

        fn remove_overlay(&mut self, layer_id: u64) -> anyhow::Result<()> {
            let mut log = self.0.borrow_mut();
            log.events.push(format!("remove:{layer_id}"));
            if log.fail_overlays {
                anyhow::bail!("Overlay-Fehler (Testfall)");
            }
            Ok(())
        }

        fn split_at(&mut self, ordinal: u64) -> anyhow::Result<SplitLayout> {
            self.0.borrow_mut().events.push(format!("split:{ordinal}"));
            Ok(SplitLayout {
                below: 0,
                at: ordinal,
                above: 0,
            })
        }

        fn merge(&mut self) -> anyhow::Result<()> {
            self.0.borrow_mut().events.push("merge".to_string());
            Ok(())
        }

        fn render_layer(
            &mut self,
            _actions: &[u64],
            width: u32,
            height: u32,
        ) -> anyhow::Result<RgbaImage> {
            let mut log = self.0.borrow_mut();
            log.render_calls += 1;
            if log.fail_render {
                anyhow::bail!("Render-Fehler (Testfall)");
            }
            Ok(RgbaImage::new(width, height))
        }
    }

    /// History-Stub mit von außen befüllbarer Werkzeug-Tabelle.
    #[derive(Clone, Default)]
    struct SharedHistory(Rc<RefCell<HashMap<u64, ToolKind>>>);

    impl ActionLookup for SharedHistory {
        fn tool_of(&self, action_id: u64) -> Option<ToolKind> {
            self.0.borrow().get(&action_id).copied()
        }
    }

    fn grouped_options() -> EngineOptions {
        EngineOptions {
            mode: EngineMode::Grouped,
            ..EngineOptions::default()
        }
    }

    #[test]
    fn construction_seeds_active_default_layer() {
        let engine = LayerEngine::headless(EngineOptions::default());

        assert_eq!(engine.stack.layer_count(), 1);
        assert_eq!(engine.mode(), EngineMode::Individual);
        let first = engine.get_all()[0];
        assert_eq!(first.name, "Ebene 1");
        assert_eq!(first.ordinal, 0);
        assert_eq!(engine.active_layer(), Some(first.id));
        assert_eq!(engine.get_active().map(|layer| layer.id), Some(first.id));
        assert!(engine.validate().is_clean());
    }

    #[test]
    fn individual_mode_spawns_layer_per_action() {
        let mut engine = LayerEngine::headless(EngineOptions::default());
        let first = engine.active_layer().expect("Standard-Ebene sollte aktiv sein");

        let a = engine
            .register_action(ActionRecord::new(100, ToolKind::Pen))
            .expect("Registrierung sollte funktionieren");
        assert_ne!(a, first);
        assert_eq!(engine.stack.layer_count(), 2);
        assert_eq!(engine.layer_of_action(100), Some(a));
        assert_eq!(engine.active_layer(), Some(a));
        assert_eq!(engine.get(a).unwrap().ordinal, 1);

        let b = engine
            .register_action(ActionRecord::new(101, ToolKind::Line))
            .unwrap();
        assert_eq!(engine.stack.layer_count(), 3);
        assert_eq!(engine.get(b).unwrap().ordinal, 2);
        assert!(engine.validate().is_clean());
    }

    #[test]
    fn individual_mode_ignores_layer_hint() {
        let mut engine = LayerEngine::headless(EngineOptions::default());
        let first = engine.active_layer().unwrap();

        let target = engine
            .register_action(ActionRecord::with_layer(100, ToolKind::Pen, first))
            .unwrap();
        assert_ne!(target, first);
        assert_eq!(engine.get(first).unwrap().action_count(), 0);
    }

    #[test]
    fn grouped_mode_honors_live_hint() {
        let mut engine = LayerEngine::headless(grouped_options());
        let default_layer = engine.active_layer().unwrap();
        let background = engine.create_layer(Some("Hintergrund")).unwrap();

        let target = engine
            .register_action(ActionRecord::with_layer(100, ToolKind::Pen, background))
            .unwrap();
        assert_eq!(target, background);
        // Ein Hinweis wechselt die aktive Ebene nicht
        assert_eq!(engine.active_layer(), Some(default_layer));
        assert_eq!(engine.layer_of_action(100), Some(background));
    }

    #[test]
    fn grouped_mode_routes_normally_on_dead_or_locked_hint() {
        // Werkzeug-Heuristik aus, damit nur das Hinweis-Verhalten zählt
        let mut options = grouped_options();
        options.new_layer_on_tool_change = false;
        let mut engine = LayerEngine::headless(options);
        let default_layer = engine.active_layer().unwrap();
        let background = engine.create_layer(Some("Hintergrund")).unwrap();
        engine.set_locked(background, true);

        let target = engine
            .register_action(ActionRecord::with_layer(100, ToolKind::Pen, background))
            .unwrap();
        assert_eq!(target, default_layer);

        let target = engine
            .register_action(ActionRecord::with_layer(101, ToolKind::Pen, 999))
            .unwrap();
        assert_eq!(target, default_layer);
    }

    #[test]
    fn grouped_mode_appends_while_tool_stays() {
        let history = SharedHistory::default();
        let mut engine = LayerEngine::new(
            grouped_options(),
            Box::new(NoopSurface),
            Box::new(history.clone()),
        );
        let default_layer = engine.active_layer().unwrap();

        history.0.borrow_mut().insert(100, ToolKind::Pen);
        let first = engine
            .register_action(ActionRecord::new(100, ToolKind::Pen))
            .unwrap();
        assert_eq!(first, default_layer);

        history.0.borrow_mut().insert(101, ToolKind::Pen);
        let second = engine
            .register_action(ActionRecord::new(101, ToolKind::Pen))
            .unwrap();
        assert_eq!(second, default_layer);
        assert_eq!(engine.get(default_layer).unwrap().membership.ids(), &[100, 101]);

        // Werkzeugwechsel beginnt eine neue Gruppe und aktiviert sie
        history.0.borrow_mut().insert(102, ToolKind::Rectangle);
        let third = engine
            .register_action(ActionRecord::new(102, ToolKind::Rectangle))
            .unwrap();
        assert_ne!(third, default_layer);
        assert_eq!(engine.active_layer(), Some(third));
        assert_eq!(engine.stack.layer_count(), 2);
    }

    #[test]
    fn grouped_mode_time_threshold_starts_new_group() {
        let mut options = grouped_options();
        options.group_time_threshold_ms = 0;
        options.new_layer_on_tool_change = false;
        let mut engine = LayerEngine::headless(options);

        sleep(std::time::Duration::from_millis(2));
        let first = engine
            .register_action(ActionRecord::new(100, ToolKind::Pen))
            .unwrap();
        assert_eq!(engine.stack.layer_count(), 2);

        sleep(std::time::Duration::from_millis(2));
        let second = engine
            .register_action(ActionRecord::new(101, ToolKind::Pen))
            .unwrap();
        assert_ne!(second, first);
        assert_eq!(engine.stack.layer_count(), 3);
    }

    #[test]
    fn grouped_mode_action_cap_starts_new_group() {
        let history = SharedHistory::default();
        let mut options = grouped_options();
        options.max_actions_per_layer = 2;
        let mut engine = LayerEngine::new(
            options,
            Box::new(NoopSurface),
            Box::new(history.clone()),
        );
        let default_layer = engine.active_layer().unwrap();

        for action_id in [100, 101, 102] {
            history.0.borrow_mut().insert(action_id, ToolKind::Pen);
        }
        engine.register_action(ActionRecord::new(100, ToolKind::Pen)).unwrap();
        engine.register_action(ActionRecord::new(101, ToolKind::Pen)).unwrap();
        assert_eq!(engine.get(default_layer).unwrap().action_count(), 2);

        let third = engine
            .register_action(ActionRecord::new(102, ToolKind::Pen))
            .unwrap();
        assert_ne!(third, default_layer);
        assert_eq!(engine.get(third).unwrap().action_count(), 1);
    }

    #[test]
    fn grouped_mode_failed_lookup_counts_as_tool_change() {
        // NoopHistory löst keine Aktion auf, jede weitere Aktion
        // beginnt deshalb eine neue Gruppe
        let mut engine = LayerEngine::headless(grouped_options());

        let first = engine
            .register_action(ActionRecord::new(100, ToolKind::Pen))
            .unwrap();
        let second = engine
            .register_action(ActionRecord::new(101, ToolKind::Pen))
            .unwrap();
        assert_ne!(second, first);
        assert_eq!(engine.stack.layer_count(), 2);
    }

    #[test]
    fn register_respects_layer_limit() {
        let mut options = EngineOptions::default();
        options.max_layers = 2;
        let mut engine = LayerEngine::headless(options);

        engine.register_action(ActionRecord::new(100, ToolKind::Pen)).unwrap();
        let result = engine.register_action(ActionRecord::new(101, ToolKind::Pen));
        assert_eq!(result, Err(EngineError::LayerLimitExceeded { max: 2 }));
        assert_eq!(engine.stack.layer_count(), 2);
        assert_eq!(engine.layer_of_action(101), None);
        assert!(engine.validate().is_clean());
    }

    #[test]
    fn set_active_layer_rebuilds_overlays() {
        let surface = RecordingSurface::default();
        let mut engine = LayerEngine::new(
            EngineOptions::default(),
            Box::new(surface.clone()),
            Box::new(NoopHistory),
        );
        let first = engine.active_layer().unwrap();
        let second = engine.create_layer(None).unwrap();

        assert!(engine.set_active_layer(second));
        assert_eq!(engine.active_layer(), Some(second));
        assert_eq!(
            surface.0.borrow().events,
            vec![format!("remove:{first}"), format!("create:{second}:101")]
        );

        // Wechsel auf die bereits aktive Ebene ist ein No-Op
        assert!(engine.set_active_layer(second));
        assert_eq!(surface.0.borrow().events.len(), 2);
    }

    #[test]
    fn set_active_layer_rejects_locked_and_unknown() {
        let mut engine = LayerEngine::headless(EngineOptions::default());
        let first = engine.active_layer().unwrap();
        let second = engine.create_layer(None).unwrap();
        engine.set_locked(second, true);

        assert!(!engine.set_active_layer(second));
        assert!(!engine.set_active_layer(999));
        assert_eq!(engine.active_layer(), Some(first));
    }

    #[test]
    fn overlay_failure_degrades_to_full_redraw() {
        let surface = RecordingSurface::default();
        let mut engine = LayerEngine::new(
            EngineOptions::default(),
            Box::new(surface.clone()),
            Box::new(NoopHistory),
        );
        let second = engine.create_layer(None).unwrap();
        for layer in engine.stack.layers.values_mut() {
            layer.cache.dirty = false;
        }

        surface.0.borrow_mut().fail_overlays = true;
        assert!(engine.set_active_layer(second));
        assert_eq!(engine.active_layer(), Some(second));
        assert!(engine.stack.layers.values().all(|layer| layer.cache.dirty));
    }

    #[test]
    fn locking_active_layer_clears_selection() {
        let surface = RecordingSurface::default();
        let mut engine = LayerEngine::new(
            EngineOptions::default(),
            Box::new(surface.clone()),
            Box::new(NoopHistory),
        );
        let first = engine.active_layer().unwrap();

        assert!(engine.set_locked(first, true));
        assert_eq!(engine.active_layer(), None);
        assert_eq!(surface.0.borrow().events, vec![format!("remove:{first}")]);
    }

    #[test]
    fn deleting_active_layer_clears_selection() {
        let mut engine = LayerEngine::headless(EngineOptions::default());
        let active = engine
            .register_action(ActionRecord::new(100, ToolKind::Pen))
            .unwrap();

        assert!(engine.delete_layer(active));
        assert_eq!(engine.active_layer(), None);
        // Einzel-Modus: die Aktion verliert ihre Zuordnung
        assert_eq!(engine.layer_of_action(100), None);
        assert!(engine.validate().is_clean());
    }

    #[test]
    fn grouped_delete_rehomes_actions() {
        let mut engine = LayerEngine::headless(grouped_options());
        let default_layer = engine.active_layer().unwrap();
        let background = engine.create_layer(Some("Hintergrund")).unwrap();
        engine
            .register_action(ActionRecord::with_layer(100, ToolKind::Pen, background))
            .unwrap();
        engine
            .register_action(ActionRecord::with_layer(101, ToolKind::Line, background))
            .unwrap();

        assert!(engine.delete_layer(background));
        assert_eq!(engine.layer_of_action(100), Some(default_layer));
        assert_eq!(engine.layer_of_action(101), Some(default_layer));
        assert_eq!(engine.stack.action_count(), 2);
        assert!(engine.validate().is_clean());
    }

    #[test]
    fn switching_to_grouped_collapses_layers() {
        let mut engine = LayerEngine::headless(EngineOptions::default());
        engine.register_action(ActionRecord::new(100, ToolKind::Pen)).unwrap();
        engine.register_action(ActionRecord::new(101, ToolKind::Line)).unwrap();
        assert_eq!(engine.stack.layer_count(), 3);

        engine.set_mode(EngineMode::Grouped).expect("Umbau sollte funktionieren");
        assert_eq!(engine.mode(), EngineMode::Grouped);
        assert_eq!(engine.options().mode, EngineMode::Grouped);
        assert_eq!(engine.stack.layer_count(), 1);

        let collapsed = engine.get_all()[0].id;
        assert_eq!(engine.active_layer(), Some(collapsed));
        assert_eq!(engine.get(collapsed).unwrap().membership.ids(), &[100, 101]);
        assert!(engine.validate().is_clean());
    }

    #[test]
    fn switching_to_individual_explodes_layers() {
        let mut engine = LayerEngine::headless(grouped_options());
        let default_layer = engine.active_layer().unwrap();
        for action_id in [100, 101, 102] {
            engine
                .register_action(ActionRecord::with_layer(action_id, ToolKind::Pen, default_layer))
                .unwrap();
        }

        engine.set_mode(EngineMode::Individual).unwrap();
        assert_eq!(engine.mode(), EngineMode::Individual);
        assert_eq!(engine.stack.layer_count(), 3);
        assert_eq!(engine.active_layer(), None);
        for layer in engine.get_all() {
            assert_eq!(layer.action_count(), 1);
        }
        assert!(engine.validate().is_clean());
    }

    #[test]
    fn failed_mode_switch_keeps_previous_state() {
        let mut options = grouped_options();
        options.max_layers = 2;
        let mut engine = LayerEngine::headless(options);
        let default_layer = engine.active_layer().unwrap();
        for action_id in 100..105 {
            engine
                .register_action(ActionRecord::with_layer(action_id, ToolKind::Pen, default_layer))
                .unwrap();
        }

        let result = engine.set_mode(EngineMode::Individual);
        assert_eq!(result, Err(EngineError::LayerLimitExceeded { max: 2 }));
        assert_eq!(engine.mode(), EngineMode::Grouped);
        assert_eq!(engine.stack.layer_count(), 1);
        assert_eq!(engine.stack.action_count(), 5);
        assert_eq!(engine.active_layer(), Some(default_layer));
        assert!(engine.validate().is_clean());
    }

    #[test]
    fn same_mode_switch_is_noop() {
        let mut engine = LayerEngine::headless(EngineOptions::default());
        engine.register_action(ActionRecord::new(100, ToolKind::Pen)).unwrap();
        let layers_before = engine.stack.layer_count();

        engine.set_mode(EngineMode::Individual).unwrap();
        assert_eq!(engine.stack.layer_count(), layers_before);
        assert!(engine.layer_of_action(100).is_some());
    }

    #[test]
    fn update_options_applies_scalars_and_mode() {
        let mut engine = LayerEngine::headless(EngineOptions::default());
        let update = EngineOptionsUpdate {
            mode: Some(EngineMode::Grouped),
            max_layers: Some(10),
            group_time_threshold_ms: Some(250),
            ..EngineOptionsUpdate::default()
        };

        engine.update_options(&update).unwrap();
        assert_eq!(engine.options().max_layers, 10);
        assert_eq!(engine.options().group_time_threshold_ms, 250);
        assert_eq!(engine.mode(), EngineMode::Grouped);
        assert!(engine.active_layer().is_some());
    }

    #[test]
    fn stats_are_cached_until_invalidated() {
        let mut engine = LayerEngine::headless(EngineOptions::default());
        assert_eq!(engine.stats().layers, 1);

        engine.create_layer(None).unwrap();
        assert_eq!(engine.stats().layers, 2);

        // Roher Eingriff an der Tabelle: der Cache liefert noch den
        // alten Stand, bis er verworfen wird
        engine.stack.spawn_layer("Ebene 1");
        assert_eq!(engine.stats().layers, 2);
        engine.stats.invalidate();
        assert_eq!(engine.stats().layers, 3);
    }

    #[test]
    fn ensure_layer_surface_renders_lazily() {
        let surface = RecordingSurface::default();
        let mut engine = LayerEngine::new(
            EngineOptions::default(),
            Box::new(surface.clone()),
            Box::new(NoopHistory),
        );
        let first = engine.active_layer().unwrap();

        let image = engine.ensure_layer_surface(first, 64, 48).expect("Rendern sollte klappen");
        assert_eq!((image.width(), image.height()), (64, 48));
        assert_eq!(surface.0.borrow().render_calls, 1);
        assert!(!engine.get(first).unwrap().cache.dirty);

        // Gültiger Cache wird wiederverwendet
        engine.ensure_layer_surface(first, 64, 48).unwrap();
        assert_eq!(surface.0.borrow().render_calls, 1);

        // Größenwechsel erzwingt den Neuaufbau
        engine.ensure_layer_surface(first, 32, 32).unwrap();
        assert_eq!(surface.0.borrow().render_calls, 2);
        assert_eq!(engine.get(first).unwrap().cache.size, (32, 32));

        assert!(engine.ensure_layer_surface(999, 64, 48).is_err());
    }

    #[test]
    fn failed_render_leaves_cache_empty_and_dirty() {
        let surface = RecordingSurface::default();
        let mut engine = LayerEngine::new(
            EngineOptions::default(),
            Box::new(surface.clone()),
            Box::new(NoopHistory),
        );
        let first = engine.active_layer().unwrap();

        surface.0.borrow_mut().fail_render = true;
        assert!(engine.ensure_layer_surface(first, 64, 64).is_err());
        let cache = &engine.get(first).unwrap().cache;
        assert!(cache.dirty);
        assert!(cache.surface.is_none());
    }

    #[test]
    fn idle_queue_processes_in_small_steps() {
        let surface = RecordingSurface::default();
        let mut engine = LayerEngine::new(
            EngineOptions::default(),
            Box::new(surface.clone()),
            Box::new(NoopHistory),
        );
        let first = engine.active_layer().unwrap();
        let second = engine.create_layer(None).unwrap();

        assert!(engine.queue_rebuild(first));
        assert!(engine.queue_rebuild(second));
        assert!(!engine.queue_rebuild(999));

        assert_eq!(engine.process_idle(64, 64, 1), 1);
        assert!(!engine.get(first).unwrap().cache.dirty);
        assert!(engine.get(second).unwrap().cache.dirty);

        assert_eq!(engine.process_idle(64, 64, 8), 1);
        assert_eq!(engine.process_idle(64, 64, 8), 0);

        // Gültig gebaute Ebenen lassen sich nicht erneut vormerken
        assert!(!engine.queue_rebuild(first));
    }

    #[test]
    fn repair_restores_active_after_raw_damage() {
        let mut engine = LayerEngine::headless(EngineOptions::default());
        let first = engine.active_layer().unwrap();
        let damaged = engine
            .register_action(ActionRecord::new(100, ToolKind::Pen))
            .unwrap();

        engine.stack.layers.shift_remove(&damaged);
        assert!(!engine.validate().is_clean());

        let report = engine.repair();
        assert!(report.active_fixed);
        assert_eq!(report.dropped_owners, 1);
        assert_eq!(engine.active_layer(), Some(first));
        assert!(engine.validate().is_clean());
    }

    #[test]
    fn dynamic_split_follows_off_active_action_count() {
        let surface = RecordingSurface::default();
        let mut options = grouped_options();
        options.dynamic_split = true;
        options.split_action_threshold = 1;
        let mut engine = LayerEngine::new(
            options,
            Box::new(surface.clone()),
            Box::new(NoopHistory),
        );
        let background = engine.create_layer(Some("Hintergrund")).unwrap();

        // Eine Aktion außerhalb der aktiven Ebene erreicht die Schwelle
        engine
            .register_action(ActionRecord::with_layer(100, ToolKind::Pen, background))
            .unwrap();
        assert!(surface.0.borrow().events.iter().any(|e| e == "split:0"));

        // Nach dem Löschen wandert die Aktion auf die aktive Ebene,
        // die Teilung wird zusammengeführt
        assert!(engine.delete_layer(background));
        assert_eq!(surface.0.borrow().events.last().map(String::as_str), Some("merge"));
    }
}
