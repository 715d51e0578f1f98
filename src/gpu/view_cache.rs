// src/gpu/view_cache.rs
//! Texture -> view memoization. One cache per view kind; entries live until teardown.

use std::collections::HashMap;

use parking_lot::RwLock;

use super::{GpuDevice, TextureId, ViewId, ViewKind};

pub struct ViewCache {
    kind: ViewKind,
    views: RwLock<HashMap<TextureId, ViewId>>,
}

impl ViewCache {
    pub fn new(kind: ViewKind) -> Self {
        Self {
            kind,
            views: RwLock::new(HashMap::new()),
        }
    }

    pub fn kind(&self) -> ViewKind {
        self.kind
    }

    /// Get or create the view for `texture`. Creation failures are logged, not cached.
    #[tracing::instrument(level = "trace", skip(self, device), fields(kind = ?self.kind))]
    pub fn get_view(&self, device: &dyn GpuDevice, texture: TextureId) -> Option<ViewId> {
        if let Some(view) = self.views.read().get(&texture) {
            return Some(*view);
        }

        let mut views = self.views.write();
        // another thread may have raced us between the locks
        if let Some(view) = views.get(&texture) {
            return Some(*view);
        }
        match device.create_view(texture, self.kind) {
            Ok(view) => {
                views.insert(texture, view);
                Some(view)
            }
            Err(e) => {
                log::warn!("{:?} view for texture {:#x} failed: {}", self.kind, texture.0, e);
                None
            }
        }
    }

    pub fn len(&self) -> usize {
        self.views.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.views.read().is_empty()
    }

    /// Release every cached view.
    pub fn teardown(&self, device: &dyn GpuDevice) {
        for (_, view) in self.views.write().drain() {
            device.release_view(view);
        }
    }

    /// Move all entries out, leaving this cache empty.
    pub fn take(&self) -> HashMap<TextureId, ViewId> {
        std::mem::take(&mut *self.views.write())
    }

    pub fn absorb(&self, entries: HashMap<TextureId, ViewId>) {
        self.views.write().extend(entries);
    }
}
