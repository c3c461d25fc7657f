//! Ebenen-Datenmodell mit Render-Cache-Zustand.

use std::time::Instant;

use image::RgbaImage;

use crate::core::Membership;

/// Render-Cache einer Ebene.
///
/// `dirty` startet mit `true`: eine frische Ebene besitzt noch kein
/// gültiges Surface. Das Surface existiert nur nach einem erfolgreichen
/// Render-Durchlauf; bei einem Fehlschlag bleibt der Cache leer und
/// veraltet.
#[derive(Debug, Clone, PartialEq)]
pub struct SurfaceCache {
    /// Surface veraltet und muss vor Wiederverwendung neu gebaut werden
    pub dirty: bool,
    /// Abmessungen des zwischengespeicherten Surface (Breite, Höhe)
    pub size: (u32, u32),
    /// Zwischengespeichertes Pixel-Surface
    pub surface: Option<RgbaImage>,
}

impl Default for SurfaceCache {
    fn default() -> Self {
        Self {
            dirty: true,
            size: (0, 0),
            surface: None,
        }
    }
}

impl SurfaceCache {
    /// Markiert den Cache als veraltet, ohne das Surface freizugeben.
    pub fn invalidate(&mut self) {
        self.dirty = true;
    }

    /// Gibt das Surface frei und markiert den Cache als veraltet.
    pub fn release(&mut self) {
        self.surface = None;
        self.dirty = true;
    }

    /// Prüft, ob für die angefragte Größe neu gerendert werden muss.
    ///
    /// Ein Größen-Mismatch erzwingt den Neuaufbau auch bei sauberem
    /// Dirty-Flag.
    pub fn needs_rebuild(&self, width: u32, height: u32) -> bool {
        self.dirty || self.surface.is_none() || self.size != (width, height)
    }

    /// Übernimmt ein frisch gerendertes Surface und setzt das Dirty-Flag zurück.
    pub fn store(&mut self, surface: RgbaImage) {
        self.size = (surface.width(), surface.height());
        self.surface = Some(surface);
        self.dirty = false;
    }
}

/// Eine logische Ebene des Zeichenbretts.
#[derive(Debug, Clone, PartialEq)]
pub struct Layer {
    /// Eindeutige Ebenen-ID
    pub id: u64,
    /// Anzeigename
    pub name: String,
    /// Sichtbarkeit beim Compositing
    pub visible: bool,
    /// Deckkraft (0.0–1.0)
    pub opacity: f32,
    /// Gesperrte Ebenen nehmen keine Zuweisungen an
    pub locked: bool,
    /// Zeitpunkt der Erstellung
    pub created_at: Instant,
    /// Zeitpunkt der letzten Änderung
    pub modified_at: Instant,
    /// Zugeordnete Aktionen
    pub membership: Membership,
    /// Eindeutige Stapelposition; kleinere Werte liegen weiter hinten
    pub ordinal: u64,
    /// Render-Cache-Zustand
    pub cache: SurfaceCache,
}

impl Layer {
    /// Erstellt eine neue, leere Ebene.
    pub fn new(id: u64, name: impl Into<String>, ordinal: u64) -> Self {
        let now = Instant::now();
        Self {
            id,
            name: name.into(),
            visible: true,
            opacity: 1.0,
            locked: false,
            created_at: now,
            modified_at: now,
            membership: Membership::new(),
            ordinal,
            cache: SurfaceCache::default(),
        }
    }

    /// Setzt den Änderungszeitpunkt auf jetzt.
    pub fn touch(&mut self) {
        self.modified_at = Instant::now();
    }

    /// Anzahl der zugeordneten Aktionen.
    pub fn action_count(&self) -> usize {
        self.membership.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fresh_layer_defaults() {
        let layer = Layer::new(1, "Ebene 1", 0);

        assert_eq!(layer.id, 1);
        assert_eq!(layer.name, "Ebene 1");
        assert!(layer.visible);
        assert!(!layer.locked);
        assert_eq!(layer.ordinal, 0);
        assert!(layer.membership.is_empty());
        assert!(layer.cache.dirty, "Frische Ebenen starten ohne gültigen Cache");
        assert!(layer.cache.surface.is_none());
    }

    #[test]
    fn cache_store_and_invalidate() {
        let mut cache = SurfaceCache::default();
        assert!(cache.needs_rebuild(64, 64));

        cache.store(RgbaImage::new(64, 64));
        assert!(!cache.needs_rebuild(64, 64));
        assert_eq!(cache.size, (64, 64));

        // Größen-Mismatch erzwingt Neuaufbau trotz sauberem Flag
        assert!(cache.needs_rebuild(128, 64));

        cache.invalidate();
        assert!(cache.needs_rebuild(64, 64));
        assert!(cache.surface.is_some(), "invalidate behält das alte Surface");

        cache.release();
        assert!(cache.surface.is_none());
    }
}
