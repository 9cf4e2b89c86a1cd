use std::{collections::HashMap, sync::Arc};

use shared::domain::ImageId;

/// Read-only copy of the favorite flags. Cloning is a reference-count bump.
pub type FavoriteSnapshot = Arc<HashMap<ImageId, bool>>;

/// Current favorite flag per image. Unknown images read as not faved.
#[derive(Debug, Clone, Default)]
pub struct FavoriteStore {
    flags: FavoriteSnapshot,
}

impl FavoriteStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, image_id: &ImageId) -> bool {
        self.flags.get(image_id).copied().unwrap_or(false)
    }

    /// Returns the previous value.
    pub fn set(&mut self, image_id: &ImageId, faved: bool) -> bool {
        let previous = self.get(image_id);
        if previous != faved || !self.flags.contains_key(image_id) {
            Arc::make_mut(&mut self.flags).insert(image_id.clone(), faved);
        }
        previous
    }

    pub fn len(&self) -> usize {
        self.flags.len()
    }

    pub fn is_empty(&self) -> bool {
        self.flags.is_empty()
    }

    pub fn snapshot(&self) -> FavoriteSnapshot {
        Arc::clone(&self.flags)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unknown_images_are_not_faved() {
        let store = FavoriteStore::new();
        assert!(!store.get(&ImageId::from("1")));
        assert!(store.is_empty());
    }

    #[test]
    fn snapshots_are_not_affected_by_later_writes() {
        let mut store = FavoriteStore::new();
        let id = ImageId::from("1");
        assert!(!store.set(&id, true));
        let before = store.snapshot();

        assert!(store.set(&id, false));
        assert_eq!(before.get(&id), Some(&true));
        assert!(!store.get(&id));
        assert_eq!(store.len(), 1);
    }
}
