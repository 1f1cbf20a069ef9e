// model.rs - the collision model: one loaded map and every query against it

use std::cell::RefCell;
use std::io::{Read, Write};

use brushtrace_common::common::com_printf;
use brushtrace_common::cvar::CvarContext;
use brushtrace_common::q_shared::{
    vector_add, vector_lerp, vector_scale, vector_subtract, CModel, Trace, Vec3,
};
use brushtrace_common::qfiles::{DArea, DAreaPortal};
use log::warn;

use crate::area::AreaPortals;
use crate::bsp::{BspTree, CLeaf, NodeChild};
use crate::config::CmConfig;
use crate::error::{CmError, Result};
use crate::hull::ShapeHull;
use crate::load::{block_checksum, parse_ibsp};
use crate::query::{box_leafnums, BoxLeafs};
use crate::stats::CmStats;
use crate::trace::{trace_target, TraceLimits, TraceQuery, TraceScratch, TraceTarget, Transform};
use crate::vis::{self, row_bytes, VisData, VisKind};

/// Decoded map contents, before flooding and validation.
#[derive(Debug, Clone, Default)]
pub struct MapParts {
    pub tree: BspTree,
    pub cmodels: Vec<CModel>,
    pub areas: Vec<DArea>,
    pub areaportals: Vec<DAreaPortal>,
    pub vis: VisData,
    pub entity_string: String,
}

/// Where a query starts walking.
#[derive(Debug, Clone, Copy)]
pub enum HeadNode<'h> {
    /// Root of the world model.
    World,
    /// A node in the map tree, or `-1 - leafnum`, as stored in inline models.
    Node(i32),
    /// A synthesized shape, independent of the map.
    Hull(&'h ShapeHull),
}

impl<'h> From<&'h ShapeHull> for HeadNode<'h> {
    fn from(hull: &'h ShapeHull) -> Self {
        HeadNode::Hull(hull)
    }
}

thread_local! {
    static SCRATCH: RefCell<TraceScratch> = RefCell::new(TraceScratch::new());
}

#[derive(Debug)]
pub struct CollisionModel {
    name: String,
    checksum: u32,
    tree: BspTree,
    cmodels: Vec<CModel>,
    numclusters: usize,
    vis: VisData,
    areas: AreaPortals,
    entity_string: String,
    config: CmConfig,
    stats: CmStats,
}

impl Default for CollisionModel {
    fn default() -> Self {
        Self::empty()
    }
}

impl CollisionModel {
    // ============================================================
    // Lifecycle
    // ============================================================

    /// The world with no map: one null leaf, one area, no vis.
    pub fn empty() -> Self {
        Self {
            name: String::new(),
            checksum: 0,
            tree: BspTree {
                // allow leaf funcs to be called without a map
                leafs: vec![CLeaf::NULL],
                ..BspTree::default()
            },
            cmodels: vec![CModel::default()],
            numclusters: 1,
            vis: VisData::default(),
            areas: AreaPortals::default(),
            entity_string: String::new(),
            config: CmConfig::default(),
            stats: CmStats::default(),
        }
    }

    /// Builds a model from decoded parts. Portals start closed.
    pub fn from_parts(parts: MapParts) -> Result<Self> {
        Self::from_parts_with_config(parts, CmConfig::default())
    }

    pub fn from_parts_with_config(parts: MapParts, config: CmConfig) -> Result<Self> {
        let MapParts {
            tree,
            cmodels,
            areas,
            areaportals,
            vis,
            entity_string,
        } = parts;

        if tree.nodes.is_empty() {
            return Err(CmError::Empty { what: "nodes" });
        }
        if cmodels.is_empty() {
            return Err(CmError::Empty { what: "models" });
        }
        tree.validate()?;
        for model in &cmodels {
            tree.check_child(NodeChild::from_raw(model.headnode))?;
        }

        let numclusters = tree
            .leafs
            .iter()
            .map(|l| l.cluster + 1)
            .max()
            .unwrap_or(0)
            .max(0) as usize;
        let areas = AreaPortals::new(&areas, &areaportals, config.no_areas)?;

        Ok(Self {
            name: String::new(),
            checksum: 0,
            tree,
            cmodels,
            numclusters,
            vis,
            areas,
            entity_string,
            config,
            stats: CmStats::default(),
        })
    }

    /// Parses an IBSP file and builds the model.
    pub fn load_map(name: &str, data: &[u8]) -> Result<Self> {
        Self::load_map_with_config(name, data, CmConfig::default())
    }

    pub fn load_map_with_config(name: &str, data: &[u8], config: CmConfig) -> Result<Self> {
        let checksum = block_checksum(data);
        let parts = parse_ibsp(name, data)?;
        let mut model = Self::from_parts_with_config(parts, config)?;
        model.name = name.to_string();
        model.checksum = checksum;
        com_printf(&format!(
            "Loaded {}: {} brushes, {} inline models, checksum {:08x}\n",
            name,
            model.tree.brushes.len(),
            model.cmodels.len(),
            checksum
        ));
        Ok(model)
    }

    /// Loads `name` in place. Loading the map that is already loaded only
    /// closes every portal and refloods. Returns the map checksum.
    pub fn reload_map(&mut self, name: &str, data: &[u8]) -> Result<u32> {
        if self.is_loaded() && self.name == name {
            self.areas.reset();
            return Ok(self.checksum);
        }
        *self = Self::load_map_with_config(name, data, self.config)?;
        Ok(self.checksum)
    }

    /// Like [`reload_map`](Self::reload_map), but first applies latched
    /// cvars and takes the config from them.
    pub fn reload_map_latched(
        &mut self,
        name: &str,
        data: &[u8],
        cvars: &mut CvarContext,
    ) -> Result<u32> {
        self.set_config(CmConfig::latch(cvars));
        self.reload_map(name, data)
    }

    /// Drops the map; queries answer as an empty world afterwards.
    pub fn free_map(&mut self) {
        let config = self.config;
        *self = Self::empty().with_config(config);
    }

    pub fn with_config(mut self, config: CmConfig) -> Self {
        self.set_config(config);
        self
    }

    pub fn set_config(&mut self, config: CmConfig) {
        self.config = config;
        self.areas.set_no_areas(config.no_areas);
    }

    pub fn config(&self) -> &CmConfig {
        &self.config
    }

    // ============================================================
    // Accessors
    // ============================================================

    pub fn is_loaded(&self) -> bool {
        !self.tree.nodes.is_empty()
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn checksum(&self) -> u32 {
        self.checksum
    }

    pub fn tree(&self) -> &BspTree {
        &self.tree
    }

    pub fn stats(&self) -> &CmStats {
        &self.stats
    }

    pub fn entity_string(&self) -> &str {
        &self.entity_string
    }

    pub fn num_clusters(&self) -> usize {
        self.numclusters
    }

    pub fn num_inline_models(&self) -> usize {
        self.cmodels.len()
    }

    /// Looks up `"*N"`; the world model (`*0`) is not an inline model.
    pub fn inline_model(&self, name: &str) -> Option<&CModel> {
        let num = name.strip_prefix('*').and_then(|n| n.parse::<usize>().ok());
        match num {
            Some(num) if num >= 1 && num < self.cmodels.len() => Some(&self.cmodels[num]),
            _ => {
                warn!("inline_model: bad name {:?} (numcmodels {})", name, self.cmodels.len());
                None
            }
        }
    }

    pub fn leaf_contents(&self, leafnum: usize) -> i32 {
        self.tree.leaf(leafnum).contents
    }

    pub fn leaf_cluster(&self, leafnum: usize) -> i32 {
        self.tree.leaf(leafnum).cluster
    }

    pub fn leaf_area(&self, leafnum: usize) -> i32 {
        self.tree.leaf(leafnum).area
    }

    // ============================================================
    // Head nodes
    // ============================================================

    fn world_root(&self) -> NodeChild {
        NodeChild::from_raw(self.cmodels[0].headnode)
    }

    /// Map-tree root for `headnode`, or `None` without a map or for a bad index.
    fn tree_root(&self, headnode: i32) -> Option<NodeChild> {
        if !self.is_loaded() {
            return None;
        }
        let root = NodeChild::from_raw(headnode);
        if let Err(e) = self.tree.check_child(root) {
            warn!("bad headnode {}: {}", headnode, e);
            return None;
        }
        Some(root)
    }

    fn target<'a>(&'a self, head: HeadNode<'a>) -> Option<TraceTarget<'a>> {
        match head {
            HeadNode::Hull(hull) => Some(TraceTarget::Hull(hull)),
            HeadNode::World if self.is_loaded() => Some(TraceTarget::Tree {
                tree: &self.tree,
                root: self.world_root(),
            }),
            HeadNode::World => None,
            HeadNode::Node(raw) => self
                .tree_root(raw)
                .map(|root| TraceTarget::Tree { tree: &self.tree, root }),
        }
    }

    fn limits(&self) -> TraceLimits {
        TraceLimits {
            max_depth: self.config.max_tree_depth,
            max_position_leafs: self.config.max_position_leafs,
        }
    }

    // ============================================================
    // Traces
    // ============================================================

    /// Runs `query` with this thread's scratch space.
    pub fn trace(&self, query: &TraceQuery, head: HeadNode<'_>) -> Trace {
        SCRATCH.with(|scratch| self.trace_with(&mut scratch.borrow_mut(), query, head))
    }

    /// Runs `query` with caller-owned scratch space.
    pub fn trace_with(&self, scratch: &mut TraceScratch, query: &TraceQuery, head: HeadNode<'_>) -> Trace {
        let Some(target) = self.target(head) else {
            return Trace {
                endpos: query.end,
                ..Trace::default()
            };
        };
        let Some(xf) = query.transform else {
            return trace_target(target, query, None, self.limits(), scratch, &self.stats);
        };

        // hulls are never rotated
        let rotate = xf.is_rotated() && matches!(target, TraceTarget::Tree { .. });

        // centre the shape in world space before moving into the model frame
        let offset = vector_scale(&vector_add(&query.mins, &query.maxs), 0.5);
        let local = TraceQuery {
            start: xf.to_local(&vector_add(&query.start, &offset), rotate),
            end: xf.to_local(&vector_add(&query.end, &offset), rotate),
            mins: vector_subtract(&query.mins, &offset),
            maxs: vector_subtract(&query.maxs, &offset),
            transform: None,
            ..*query
        };
        let rotation = if rotate { xf.rotation.as_ref() } else { None };
        let mut trace = trace_target(target, &local, rotation, self.limits(), scratch, &self.stats);

        if trace.fraction < 1.0 {
            trace.plane = xf.plane_to_world(&trace.plane, rotate);
        }
        trace.endpos = if trace.fraction == 1.0 {
            query.end
        } else {
            vector_lerp(&query.start, &query.end, trace.fraction)
        };
        trace
    }

    pub fn box_trace(
        &self,
        start: &Vec3,
        end: &Vec3,
        mins: &Vec3,
        maxs: &Vec3,
        head: HeadNode<'_>,
        brushmask: i32,
    ) -> Trace {
        self.trace(&TraceQuery::new(start, end, mins, maxs, brushmask), head)
    }

    /// Box trace against a model placed at `origin` with `angles`.
    pub fn transformed_box_trace(
        &self,
        start: &Vec3,
        end: &Vec3,
        mins: &Vec3,
        maxs: &Vec3,
        head: HeadNode<'_>,
        brushmask: i32,
        origin: &Vec3,
        angles: &Vec3,
    ) -> Trace {
        let query = TraceQuery::new(start, end, mins, maxs, brushmask)
            .with_transform(Transform::from_origin_angles(origin, angles));
        self.trace(&query, head)
    }

    /// Stationary overlap test of a box at `p`.
    pub fn test(&self, p: &Vec3, mins: &Vec3, maxs: &Vec3, head: HeadNode<'_>, brushmask: i32) -> Trace {
        self.trace(&TraceQuery::position(p, mins, maxs, brushmask), head)
    }

    // ============================================================
    // Point queries
    // ============================================================

    /// World leaf containing `p`.
    pub fn point_leafnum(&self, p: &Vec3) -> Option<usize> {
        if !self.is_loaded() {
            return None;
        }
        self.stats.count_point_contents();
        self.tree.point_leafnum(self.world_root(), p, self.config.max_tree_depth)
    }

    /// Contents at `p` in the model's own frame.
    pub fn point_contents(&self, p: &Vec3, head: HeadNode<'_>) -> i32 {
        match head {
            HeadNode::Hull(hull) => {
                self.stats.count_point_contents();
                if hull.contains_point(p) {
                    hull.contents()
                } else {
                    0
                }
            }
            HeadNode::World | HeadNode::Node(_) => {
                let root = match head {
                    HeadNode::Node(raw) => self.tree_root(raw),
                    _ => self.is_loaded().then(|| self.world_root()),
                };
                let Some(root) = root else {
                    return 0;
                };
                self.stats.count_point_contents();
                self.tree.point_leaf(root, p, self.config.max_tree_depth).contents
            }
        }
    }

    /// Contents at world point `p` of a model placed at `origin` with `angles`.
    pub fn transformed_point_contents(&self, p: &Vec3, head: HeadNode<'_>, origin: &Vec3, angles: &Vec3) -> i32 {
        let xf = Transform::from_origin_angles(origin, angles);
        let rotate = !matches!(head, HeadNode::Hull(_));
        self.point_contents(&xf.to_local(p, rotate), head)
    }

    /// World leaves touched by a box.
    pub fn box_leafs(&self, mins: &Vec3, maxs: &Vec3, max_count: usize) -> BoxLeafs {
        self.box_leafs_headnode(mins, maxs, max_count, self.cmodels[0].headnode)
    }

    pub fn box_leafs_headnode(&self, mins: &Vec3, maxs: &Vec3, max_count: usize, headnode: i32) -> BoxLeafs {
        match self.tree_root(headnode) {
            Some(root) => box_leafnums(&self.tree, root, mins, maxs, max_count, self.config.max_tree_depth),
            None => BoxLeafs::default(),
        }
    }

    // ============================================================
    // PVS / PHS
    // ============================================================

    fn cluster_row(&self, cluster: i32, kind: VisKind) -> Vec<u8> {
        if !self.is_loaded() {
            return vec![0; row_bytes(self.numclusters)];
        }
        self.vis.cluster_row(cluster, kind, self.numclusters)
    }

    pub fn cluster_pvs(&self, cluster: i32) -> Vec<u8> {
        self.cluster_row(cluster, VisKind::Pvs)
    }

    pub fn cluster_phs(&self, cluster: i32) -> Vec<u8> {
        self.cluster_row(cluster, VisKind::Phs)
    }

    /// Union of the rows of every cluster near `origin`.
    ///
    /// The client interpolates the view position, so a single point's row
    /// is not enough.
    pub fn compute_fat_pvs(&self, origin: &Vec3, kind: VisKind) -> Vec<u8> {
        let row = row_bytes(self.numclusters);
        if !self.is_loaded() {
            return vec![0; row];
        }
        let r = self.config.fat_pvs_radius;
        let mins = [origin[0] - r, origin[1] - r, origin[2] - r];
        let maxs = [origin[0] + r, origin[1] + r, origin[2] + r];
        let found = self.box_leafs(&mins, &maxs, self.config.fat_pvs_leafs);
        if found.overflowed {
            warn!("compute_fat_pvs: more than {} leafs near {:?}", self.config.fat_pvs_leafs, origin);
        }

        let rows: Vec<Vec<u8>> = vis::leaf_clusters(&self.tree, &found.leafs)
            .into_iter()
            .map(|cluster| self.cluster_row(cluster, kind))
            .collect();
        vis::merge_rows(&rows, row)
    }

    /// True if any leaf under `headnode` is in a cluster set in `visbits`.
    pub fn headnode_visible(&self, headnode: i32, visbits: &[u8]) -> bool {
        match self.tree_root(headnode) {
            Some(root) => vis::headnode_visible(&self.tree, root, visbits, self.config.max_tree_depth),
            None => false,
        }
    }

    // ============================================================
    // Areas
    // ============================================================

    pub fn areas(&self) -> &AreaPortals {
        &self.areas
    }

    pub fn num_areas(&self) -> usize {
        self.areas.num_areas()
    }

    pub fn set_area_portal_state(&mut self, portalnum: usize, open: bool) {
        self.areas.set_area_portal_state(portalnum, open);
    }

    pub fn areas_connected(&self, area1: usize, area2: usize) -> bool {
        self.areas.areas_connected(area1, area2)
    }

    pub fn write_area_bits(&self, buffer: &mut [u8], area: usize) -> usize {
        self.areas.write_area_bits(buffer, area)
    }

    pub fn write_portal_bits(&self, buffer: &mut [u8]) -> usize {
        self.areas.write_portal_bits(buffer)
    }

    pub fn set_portal_states(&mut self, buffer: &[u8], len: usize) {
        self.areas.set_portal_states(buffer, len);
    }

    pub fn write_portal_state<W: Write>(&self, writer: W) -> Result<()> {
        self.areas.write_portal_state(writer)
    }

    pub fn read_portal_state<R: Read>(&mut self, reader: R) -> Result<()> {
        self.areas.read_portal_state(reader)
    }
}
