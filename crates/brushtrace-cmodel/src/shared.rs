// shared.rs - one collision model shared between query threads

use std::sync::Arc;

use brushtrace_common::q_shared::{Trace, Vec3};
use parking_lot::RwLock;

use crate::error::Result;
use crate::model::{CollisionModel, HeadNode};
use crate::trace::TraceQuery;
use crate::vis::VisKind;

/// Cloneable handle to a [`CollisionModel`].
///
/// Queries take the read lock and run concurrently. Loading a map and
/// toggling portals take the write lock.
#[derive(Debug, Clone, Default)]
pub struct SharedCollisionModel(Arc<RwLock<CollisionModel>>);

impl SharedCollisionModel {
    pub fn new(model: CollisionModel) -> Self {
        Self(Arc::new(RwLock::new(model)))
    }

    /// Access the model with a closure under the read lock.
    pub fn with_read<F, R>(&self, f: F) -> R
    where
        F: FnOnce(&CollisionModel) -> R,
    {
        f(&self.0.read())
    }

    /// Access the model with a closure under the write lock.
    pub fn with_write<F, R>(&self, f: F) -> R
    where
        F: FnOnce(&mut CollisionModel) -> R,
    {
        f(&mut self.0.write())
    }

    pub fn load_map(&self, name: &str, data: &[u8]) -> Result<u32> {
        self.with_write(|cm| cm.reload_map(name, data))
    }

    pub fn free_map(&self) {
        self.with_write(CollisionModel::free_map);
    }

    pub fn trace(&self, query: &TraceQuery, head: HeadNode<'_>) -> Trace {
        self.with_read(|cm| cm.trace(query, head))
    }

    pub fn point_contents(&self, p: &Vec3, head: HeadNode<'_>) -> i32 {
        self.with_read(|cm| cm.point_contents(p, head))
    }

    pub fn compute_fat_pvs(&self, origin: &Vec3, kind: VisKind) -> Vec<u8> {
        self.with_read(|cm| cm.compute_fat_pvs(origin, kind))
    }

    pub fn areas_connected(&self, area1: usize, area2: usize) -> bool {
        self.with_read(|cm| cm.areas_connected(area1, area2))
    }

    pub fn set_area_portal_state(&self, portalnum: usize, open: bool) {
        self.with_write(|cm| cm.set_area_portal_state(portalnum, open));
    }
}
