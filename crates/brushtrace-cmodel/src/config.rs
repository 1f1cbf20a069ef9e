// config.rs - tunables read from the cvar store

use brushtrace_common::cvar::{CvarContext, CVAR_LATCH};

/// Typed snapshot of the collision model's cvars.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct CmConfig {
    /// Treat every area as connected (`map_noareas`).
    pub no_areas: bool,
    /// Recursion guard for tree walks (`cm_maxdepth`).
    pub max_tree_depth: usize,
    /// Leaves gathered for a stationary position test (`cm_positionleafs`).
    pub max_position_leafs: usize,
    /// Half-size of the fat PVS cube (`cm_fatpvs_radius`).
    pub fat_pvs_radius: f32,
    /// Leaves gathered for the fat PVS (`cm_fatpvs_leafs`).
    pub fat_pvs_leafs: usize,
}

impl Default for CmConfig {
    fn default() -> Self {
        Self {
            no_areas: false,
            max_tree_depth: 1024,
            max_position_leafs: 1024,
            fat_pvs_radius: 8.0,
            fat_pvs_leafs: 64,
        }
    }
}

fn positive(value: f32, fallback: usize) -> usize {
    if value >= 1.0 {
        value as usize
    } else {
        fallback
    }
}

impl CmConfig {
    /// Creates the cvars with their defaults. Existing values are kept.
    pub fn register(cvars: &mut CvarContext) {
        let d = Self::default();
        cvars.get("map_noareas", "0", CVAR_LATCH);
        cvars.get("cm_maxdepth", &d.max_tree_depth.to_string(), 0);
        cvars.get("cm_positionleafs", &d.max_position_leafs.to_string(), 0);
        cvars.get("cm_fatpvs_radius", &d.fat_pvs_radius.to_string(), 0);
        cvars.get("cm_fatpvs_leafs", &d.fat_pvs_leafs.to_string(), 0);
    }

    /// Missing or nonsensical values fall back to the defaults.
    pub fn from_cvars(cvars: &CvarContext) -> Self {
        let d = Self::default();
        let radius = cvars.variable_value("cm_fatpvs_radius");
        Self {
            no_areas: cvars.variable_value("map_noareas") != 0.0,
            max_tree_depth: positive(cvars.variable_value("cm_maxdepth"), d.max_tree_depth),
            max_position_leafs: positive(
                cvars.variable_value("cm_positionleafs"),
                d.max_position_leafs,
            ),
            fat_pvs_radius: if radius > 0.0 { radius } else { d.fat_pvs_radius },
            fat_pvs_leafs: positive(cvars.variable_value("cm_fatpvs_leafs"), d.fat_pvs_leafs),
        }
    }

    /// Applies pending latched values, as a map load does, then reads.
    pub fn latch(cvars: &mut CvarContext) -> Self {
        cvars.get_latched_vars();
        Self::from_cvars(cvars)
    }
}
