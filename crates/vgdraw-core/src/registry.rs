//! Lookup of live views by id.
//!
//! The registry holds views weakly; a dropped view disappears from lookups
//! without an explicit unregister.

use crate::view::CoreView;
use log::debug;
use parking_lot::RwLock;
use std::collections::HashMap;
use std::sync::{Arc, Weak};
use uuid::Uuid;

#[derive(Debug, Default)]
pub struct ViewRegistry {
    views: RwLock<HashMap<Uuid, Weak<CoreView>>>,
    active: RwLock<Option<Uuid>>,
}

impl ViewRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a view. The first registered view becomes active.
    pub fn register(&self, view: &Arc<CoreView>) {
        let id = view.id();
        self.views.write().insert(id, Arc::downgrade(view));
        let mut active = self.active.write();
        if active.is_none() {
            *active = Some(id);
        }
        debug!("registered view {id}");
    }

    pub fn unregister(&self, id: Uuid) -> bool {
        let removed = self.views.write().remove(&id).is_some();
        let mut active = self.active.write();
        if *active == Some(id) {
            *active = None;
        }
        removed
    }

    pub fn get(&self, id: Uuid) -> Option<Arc<CoreView>> {
        self.views.read().get(&id).and_then(Weak::upgrade)
    }

    pub fn active(&self) -> Option<Arc<CoreView>> {
        let id = (*self.active.read())?;
        self.get(id)
    }

    pub fn set_active(&self, id: Uuid) -> bool {
        if self.get(id).is_none() {
            return false;
        }
        *self.active.write() = Some(id);
        true
    }

    /// Live view count. Prunes dropped views.
    pub fn len(&self) -> usize {
        let mut views = self.views.write();
        views.retain(|_, v| v.strong_count() > 0);
        views.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
