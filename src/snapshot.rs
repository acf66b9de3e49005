use crate::storage::{Gallery, GalleryStore};

/// In-memory copy of the gallery for frame loops, reloaded from storage
/// every `refresh_every` frames or on demand.
#[derive(Debug)]
pub struct GallerySnapshot {
    store: GalleryStore,
    gallery: Gallery,
    refresh_every: u32,
    frames: u32,
}

impl GallerySnapshot {
    pub fn load(store: GalleryStore, refresh_every: u32) -> Self {
        let gallery = store.load();
        Self {
            store,
            gallery,
            refresh_every: refresh_every.max(1),
            frames: 0,
        }
    }

    pub fn gallery(&self) -> &Gallery {
        &self.gallery
    }

    pub fn refresh(&mut self) {
        let gallery = self.store.load();
        if gallery.len() != self.gallery.len() {
            log::info!(
                "gallery now has {} face(s) (was {})",
                gallery.len(),
                self.gallery.len()
            );
        }
        self.gallery = gallery;
        self.frames = 0;
    }

    /// Count one frame. Returns `true` if this frame triggered a reload.
    pub fn tick(&mut self) -> bool {
        self.frames += 1;
        if self.frames >= self.refresh_every {
            self.refresh();
            return true;
        }
        false
    }
}
