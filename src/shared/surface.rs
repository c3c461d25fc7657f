//! Schnittstelle zur Zeichenfläche für partielle Redraws.

use anyhow::Result;
use image::RgbaImage;

/// Basis-Priorität für Overlay-Surfaces; das Ebenen-Ordinal wird aufaddiert.
pub const OVERLAY_PRIORITY_BASE: i64 = 100;

/// Stapel-Priorität eines Overlays aus dem Ebenen-Ordinal.
pub fn overlay_priority(ordinal: u64) -> i64 {
    OVERLAY_PRIORITY_BASE + ordinal as i64
}

/// Aufteilung der Zeichenfläche in unten / Auswahl / oben.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SplitLayout {
    /// Anzahl Ebenen unterhalb der Trennstelle
    pub below: usize,
    /// Ordinal, an dem geteilt wurde
    pub at: u64,
    /// Anzahl Ebenen oberhalb der Trennstelle
    pub above: usize,
}

/// Collaborator-Schnittstelle der Render-Fläche.
///
/// Alle Aufrufe sind Best-Effort: Fehler werden von der Engine geloggt
/// und degradieren zu einem vollständigen, ungeteilten Redraw. Die
/// Engine verlässt sich nicht auf eine Fertigstellungs-Reihenfolge.
pub trait SurfaceBackend {
    /// Legt ein transientes Overlay-Surface für eine Ebene an.
    fn create_overlay(&mut self, layer_id: u64, priority: i64) -> Result<()>;

    /// Entfernt das Overlay-Surface einer Ebene.
    fn remove_overlay(&mut self, layer_id: u64) -> Result<()>;

    /// Teilt die Zeichenfläche am angegebenen Ordinal.
    fn split_at(&mut self, ordinal: u64) -> Result<SplitLayout>;

    /// Führt eine zuvor geteilte Zeichenfläche wieder zusammen.
    fn merge(&mut self) -> Result<()>;

    /// Rendert die Aktionen einer Ebene in ein RGBA-Surface.
    fn render_layer(&mut self, actions: &[u64], width: u32, height: u32) -> Result<RgbaImage>;
}

/// Zeichenflächen-Anbindung ohne Wirkung für Headless-Betrieb.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoopSurface;

impl SurfaceBackend for NoopSurface {
    fn create_overlay(&mut self, _layer_id: u64, _priority: i64) -> Result<()> {
        Ok(())
    }

    fn remove_overlay(&mut self, _layer_id: u64) -> Result<()> {
        Ok(())
    }

    fn split_at(&mut self, ordinal: u64) -> Result<SplitLayout> {
        Ok(SplitLayout {
            below: 0,
            at: ordinal,
            above: 0,
        })
    }

    fn merge(&mut self) -> Result<()> {
        Ok(())
    }

    fn render_layer(&mut self, _actions: &[u64], width: u32, height: u32) -> Result<RgbaImage> {
        Ok(RgbaImage::new(width, height))
    }
}
