//! Rundgang durch die Ebenen-Engine: Einzel- und Gruppen-Modus,
//! Umsortieren, Duplizieren, Render-Caches und Selbstheilung.
//!
//! Start mit `cargo run --example engine_walkthrough`.

use std::cell::RefCell;
use std::collections::HashMap;
use std::rc::Rc;

use image::{Rgba, RgbaImage};
use inkboard_layer_engine::{
    ActionLookup, ActionRecord, EngineMode, EngineOptions, LayerEngine, SplitLayout,
    SurfaceBackend, ToolKind,
};

/// Minimale Software-Zeichenfläche: rendert jede Ebene als getönte Fläche
/// und protokolliert alle Overlay-Operationen.
#[derive(Default)]
struct DemoSurface;

impl SurfaceBackend for DemoSurface {
    fn create_overlay(&mut self, layer_id: u64, priority: i64) -> anyhow::Result<()> {
        log::info!("Overlay für Ebene {layer_id} angelegt (Priorität {priority})");
        Ok(())
    }

    fn remove_overlay(&mut self, layer_id: u64) -> anyhow::Result<()> {
        log::info!("Overlay für Ebene {layer_id} entfernt");
        Ok(())
    }

    fn split_at(&mut self, ordinal: u64) -> anyhow::Result<SplitLayout> {
        log::info!("Zeichenfläche bei Ordinal {ordinal} geteilt");
        Ok(SplitLayout {
            below: ordinal as usize,
            at: ordinal,
            above: 0,
        })
    }

    fn merge(&mut self) -> anyhow::Result<()> {
        log::info!("Zeichenfläche zusammengeführt");
        Ok(())
    }

    fn render_layer(
        &mut self,
        actions: &[u64],
        width: u32,
        height: u32,
    ) -> anyhow::Result<RgbaImage> {
        let shade = (actions.len() * 24).min(255) as u8;
        Ok(RgbaImage::from_pixel(
            width,
            height,
            Rgba([shade, shade, shade, 255]),
        ))
    }
}

/// History-Stub: merkt sich das Werkzeug jeder gezeichneten Aktion.
#[derive(Clone, Default)]
struct SharedHistory(Rc<RefCell<HashMap<u64, ToolKind>>>);

impl SharedHistory {
    fn record(&self, action_id: u64, tool: ToolKind) {
        self.0.borrow_mut().insert(action_id, tool);
    }
}

impl ActionLookup for SharedHistory {
    fn tool_of(&self, action_id: u64) -> Option<ToolKind> {
        self.0.borrow().get(&action_id).copied()
    }
}

/// Zeichnet eine Aktion: History pflegen, dann bei der Engine registrieren.
fn draw(
    engine: &mut LayerEngine,
    history: &SharedHistory,
    action_id: u64,
    tool: ToolKind,
) -> anyhow::Result<u64> {
    history.record(action_id, tool);
    let layer_id = engine.register_action(ActionRecord::new(action_id, tool))?;
    log::info!("Aktion {action_id} ({tool:?}) liegt auf Ebene {layer_id}");
    Ok(layer_id)
}

fn print_stack(engine: &LayerEngine) {
    log::info!("Stapel (von unten nach oben):");
    for layer in engine.get_all() {
        log::info!(
            "  [{}] Ebene {} \"{}\": {} Aktion(en), sichtbar={}, gesperrt={}",
            layer.ordinal,
            layer.id,
            layer.name,
            layer.action_count(),
            layer.visible,
            layer.locked
        );
    }
}

fn main() -> anyhow::Result<()> {
    env_logger::Builder::from_default_env()
        .filter_level(log::LevelFilter::Info)
        .init();

    log::info!(
        "Inkboard Layer Engine v{}: Rundgang startet",
        env!("CARGO_PKG_VERSION")
    );

    let options = EngineOptions::load_from_file(&EngineOptions::config_path());
    let history = SharedHistory::default();
    let mut engine = LayerEngine::new(options, Box::new(DemoSurface), Box::new(history.clone()));
    print_stack(&engine);

    // Einzel-Modus: jeder Strich bekommt seine eigene Ebene
    let stroke = draw(&mut engine, &history, 1, ToolKind::Pen)?;
    draw(&mut engine, &history, 2, ToolKind::Line)?;
    print_stack(&engine);

    log::info!("Ebene {stroke} wandert nach ganz oben");
    engine.move_to_top(stroke);
    print_stack(&engine);

    let stats = engine.stats();
    log::info!(
        "Statistik: {} Ebenen ({} sichtbar, {} gesperrt), {} Aktionen",
        stats.layers,
        stats.visible,
        stats.locked,
        stats.actions
    );

    // Gruppen-Modus: alles kollabiert auf eine Ebene
    engine.set_mode(EngineMode::Grouped)?;
    print_stack(&engine);

    // Gleiches Werkzeug hängt an, Werkzeugwechsel beginnt eine neue Gruppe
    let ink = draw(&mut engine, &history, 3, ToolKind::Pen)?;
    draw(&mut engine, &history, 4, ToolKind::Pen)?;
    let shapes = draw(&mut engine, &history, 5, ToolKind::Rectangle)?;
    engine.rename_layer(ink, "Tusche");
    engine.rename_layer(shapes, "Formen");
    print_stack(&engine);

    // Gesperrte Ebenen lassen sich nicht aktivieren
    engine.set_locked(shapes, true);
    if !engine.set_active_layer(shapes) {
        log::info!("Aktivierung der gesperrten Ebene {shapes} wurde abgelehnt");
    }
    engine.set_locked(shapes, false);
    engine.set_active_layer(shapes);

    // Duplizieren mit frisch vergebenen Aktions-IDs
    if let Some(copy) = engine.duplicate_layer(ink, &[901, 902, 903, 904])? {
        log::info!("Ebene {ink} als Ebene {copy} dupliziert");
    }
    print_stack(&engine);

    // Render-Caches: einmal bauen, danach aus dem Cache bedienen
    let layer_ids: Vec<u64> = engine.get_all().iter().map(|layer| layer.id).collect();
    for layer_id in layer_ids {
        let surface = engine.ensure_layer_surface(layer_id, 96, 96)?;
        log::info!(
            "Ebene {layer_id}: Surface {}x{} gebaut",
            surface.width(),
            surface.height()
        );
    }

    // Beschriftung ändern, Neuaufbau im Leerlauf nachholen
    engine.rename_layer(ink, "Tusche (fein)");
    engine.queue_rebuild(ink);
    let rebuilt = engine.process_idle(96, 96, 4);
    log::info!("Idle-Neuaufbau: {rebuilt} Ebene(n) frisch gerendert");

    // Selbstheilung nach einem rohen Eingriff an der Tabelle
    engine
        .stack
        .get_mut(shapes)
        .expect("Ebene existiert")
        .membership
        .push(4242);
    let audit = engine.validate();
    log::info!("Audit nach Roh-Eingriff: {} Problem(e)", audit.errors.len());
    let fixes = engine.repair();
    log::info!("Selbstheilung: {} Korrektur(en)", fixes.total_fixes());
    log::info!(
        "Audit danach: sauber = {}",
        engine.validate().is_clean()
    );

    Ok(())
}
