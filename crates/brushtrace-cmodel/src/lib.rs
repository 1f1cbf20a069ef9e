#![allow(clippy::too_many_arguments, clippy::float_cmp, clippy::needless_range_loop,
         clippy::manual_range_contains, clippy::collapsible_else_if)]

pub mod error;
pub mod config;
pub mod bsp;
pub mod hull;
pub mod capsule;
pub mod stats;
pub mod trace;
pub mod query;
pub mod area;
pub mod vis;
pub mod load;
pub mod model;
pub mod shared;

#[cfg(test)]
mod testmap;

pub use area::AreaPortals;
pub use bsp::{BspTree, CBrush, CBrushSide, CLeaf, CNode, NodeChild};
pub use config::CmConfig;
pub use error::{CmError, Result};
pub use hull::{
    build_box_hull, build_capsule_hull, build_octagon_hull, build_sphere_hull, HullKind, ShapeHull,
};
pub use model::{CollisionModel, HeadNode, MapParts};
pub use query::{box_leafnums, merge_clip, BoxLeafs};
pub use shared::SharedCollisionModel;
pub use stats::{CmStats, CmStatsSnapshot};
pub use trace::{TraceQuery, TraceScratch, Transform};
pub use vis::{VisData, VisKind};
