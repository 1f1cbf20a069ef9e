// trace.rs - box/shape sweeps and position tests
//
// One engine serves the world tree, inline models and synthesized hulls.
// The moving shape is picked once at setup (`ClipShape`) and only changes
// how far each brush plane is pushed out; the traversal is shared.

use brushtrace_common::q_shared::{
    create_rotation_matrix, dot_product, rotate_point, transpose_matrix, vector_add,
    vector_compare, vector_lerp, vector_negate, vector_scale, vector_subtract, CPlane, CSurface,
    Mat3, Trace, Vec3,
};
use log::warn;

use crate::bsp::{BspTree, CBrush, CBrushSide, NodeChild};
use crate::capsule::{
    capsules_overlap, sweep_sphere, sweep_vertical_cylinder, RoundContact, RADIUS_EPSILON,
};
use crate::hull::{octagon_bevel, HullKind, HullSphere, ShapeHull, HULL_LEAF};
use crate::query::box_leafnums;
use crate::stats::CmStats;

/// 1/32 epsilon to keep floating point happy
pub const DIST_EPSILON: f32 = 0.03125;
/// Slack when comparing the entering and leaving fractions of one brush.
pub const FRAC_EPSILON: f32 = 1.0 / 65536.0;

// ============================================================
// Per-query dedup
// ============================================================

/// Caller-owned stamp space for skipping brushes already tested in a query.
///
/// Keep one per thread; a model can be traced concurrently as long as each
/// caller brings its own scratch.
#[derive(Debug, Clone, Default)]
pub struct TraceScratch {
    brush_stamps: Vec<u32>,
    query_id: u32,
}

impl TraceScratch {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn query_id(&self) -> u32 {
        self.query_id
    }

    /// Starts a new query over a tree with `num_brushes` brushes.
    pub(crate) fn begin(&mut self, num_brushes: usize) {
        if self.brush_stamps.len() < num_brushes {
            self.brush_stamps.resize(num_brushes, 0);
        }
        self.query_id = self.query_id.wrapping_add(1);
        if self.query_id == 0 {
            self.brush_stamps.iter_mut().for_each(|s| *s = 0);
            self.query_id = 1;
        }
    }

    /// True the first time `brush` is seen in the current query.
    #[inline]
    pub(crate) fn first_visit(&mut self, brush: usize) -> bool {
        match self.brush_stamps.get_mut(brush) {
            Some(stamp) if *stamp == self.query_id => false,
            Some(stamp) => {
                *stamp = self.query_id;
                true
            }
            None => true,
        }
    }
}

// ============================================================
// Query description
// ============================================================

/// Placement of a brush model or hull in the world.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Transform {
    pub origin: Vec3,
    /// World to local; `None` when the angles are all zero.
    pub rotation: Option<Mat3>,
    /// Local to world.
    pub inverse: Option<Mat3>,
}

impl Transform {
    pub fn translation(origin: &Vec3) -> Self {
        Self {
            origin: *origin,
            rotation: None,
            inverse: None,
        }
    }

    pub fn from_origin_angles(origin: &Vec3, angles: &Vec3) -> Self {
        if angles.iter().all(|&a| a == 0.0) {
            return Self::translation(origin);
        }
        let rotation = create_rotation_matrix(angles);
        Self {
            origin: *origin,
            rotation: Some(rotation),
            inverse: Some(transpose_matrix(&rotation)),
        }
    }

    #[inline]
    pub fn is_rotated(&self) -> bool {
        self.rotation.is_some()
    }

    /// World point into the model frame; rotation is skipped when `rotate` is false.
    pub fn to_local(&self, p: &Vec3, rotate: bool) -> Vec3 {
        let v = vector_subtract(p, &self.origin);
        match (&self.rotation, rotate) {
            (Some(m), true) => rotate_point(m, &v),
            _ => v,
        }
    }

    /// Model-frame plane back into world space.
    pub fn plane_to_world(&self, plane: &CPlane, rotate: bool) -> CPlane {
        let normal = match (&self.inverse, rotate) {
            (Some(m), true) => rotate_point(m, &plane.normal),
            _ => plane.normal,
        };
        CPlane::new(normal, plane.dist + dot_product(&normal, &self.origin))
    }
}

/// A sweep or position test, built by the caller for one call.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TraceQuery {
    pub start: Vec3,
    pub end: Vec3,
    pub mins: Vec3,
    pub maxs: Vec3,
    pub shape: HullKind,
    pub contents: i32,
    pub transform: Option<Transform>,
}

impl TraceQuery {
    /// Axis-aligned box sweep.
    pub fn new(start: &Vec3, end: &Vec3, mins: &Vec3, maxs: &Vec3, contents: i32) -> Self {
        Self {
            start: *start,
            end: *end,
            mins: *mins,
            maxs: *maxs,
            shape: HullKind::Box,
            contents,
            transform: None,
        }
    }

    pub fn point(start: &Vec3, end: &Vec3, contents: i32) -> Self {
        Self::new(start, end, &[0.0; 3], &[0.0; 3], contents)
    }

    /// Stationary overlap test.
    pub fn position(p: &Vec3, mins: &Vec3, maxs: &Vec3, contents: i32) -> Self {
        Self::new(p, p, mins, maxs, contents)
    }

    pub fn with_shape(mut self, shape: HullKind) -> Self {
        self.shape = shape;
        self
    }

    pub fn with_contents(mut self, contents: i32) -> Self {
        self.contents = contents;
        self
    }

    pub fn with_transform(mut self, transform: Transform) -> Self {
        self.transform = Some(transform);
        self
    }

    pub fn is_position_test(&self) -> bool {
        vector_compare(&self.start, &self.end)
    }
}

/// What a query runs against once the head node is resolved.
#[derive(Clone, Copy)]
pub(crate) enum TraceTarget<'a> {
    Tree { tree: &'a BspTree, root: NodeChild },
    Hull(&'a ShapeHull),
}

// ============================================================
// Trace work
// ============================================================

#[derive(Debug, Clone, Copy)]
enum ClipShape {
    /// Box corners indexed by plane signbits.
    Box { offsets: [Vec3; 8] },
    /// Prism vertices; the support point is searched per plane.
    Octagon { verts: [Vec3; 16] },
    Round(HullSphere),
}

fn box_offsets(size: &[Vec3; 2]) -> [Vec3; 8] {
    let mut offsets = [[0.0; 3]; 8];
    for (signbits, corner) in offsets.iter_mut().enumerate() {
        for i in 0..3 {
            corner[i] = if signbits & (1 << i) != 0 { size[1][i] } else { size[0][i] };
        }
    }
    offsets
}

fn octagon_verts(half: &Vec3) -> [Vec3; 16] {
    let (a, b, h) = (half[0], half[1], half[2]);
    let c = octagon_bevel(a, b) * std::f32::consts::SQRT_2;
    let quadrant = [[a, (c - a).min(b)], [(c - b).min(a), b]];
    let mut verts = [[0.0; 3]; 16];
    let mut k = 0;
    for (sx, sy) in [(1.0, 1.0), (-1.0, 1.0), (-1.0, -1.0), (1.0, -1.0)] {
        for q in quadrant {
            for z in [-h, h] {
                verts[k] = [sx * q[0], sy * q[1], z];
                k += 1;
            }
        }
    }
    verts
}

struct TraceWork<'a> {
    start: Vec3,
    end: Vec3,
    /// Shape bounds, symmetric about its centre.
    size: [Vec3; 2],
    extents: Vec3,
    /// Volume swept by the whole move.
    bounds: [Vec3; 2],
    clip: ClipShape,
    is_point: bool,
    contents: i32,
    max_depth: usize,
    max_position_leafs: usize,
    /// Node visits left for this walk; a valid tree needs at most one per node.
    node_budget: usize,
    trace: Trace,
    scratch: &'a mut TraceScratch,
    stats: &'a CmStats,
}

impl<'a> TraceWork<'a> {
    fn new(
        query: &TraceQuery,
        rotation: Option<&Mat3>,
        limits: TraceLimits,
        scratch: &'a mut TraceScratch,
        stats: &'a CmStats,
    ) -> Self {
        // adjust so that mins and maxs are always symmetric, which
        // avoids some complications with plane expanding of rotated
        // bmodels
        let offset = vector_scale(&vector_add(&query.mins, &query.maxs), 0.5);
        let size = [
            vector_subtract(&query.mins, &offset),
            vector_subtract(&query.maxs, &offset),
        ];
        let start = vector_add(&query.start, &offset);
        let end = vector_add(&query.end, &offset);
        let is_point = size[1].iter().all(|&s| s == 0.0);

        let clip = match query.shape {
            _ if is_point => ClipShape::Box {
                offsets: box_offsets(&size),
            },
            HullKind::Box => ClipShape::Box {
                offsets: box_offsets(&size),
            },
            HullKind::Octagon => ClipShape::Octagon {
                verts: octagon_verts(&size[1]),
            },
            kind @ (HullKind::Capsule | HullKind::Sphere) => {
                let mut sphere = HullSphere::for_kind(kind, &size[1]);
                if let Some(m) = rotation {
                    sphere.offset = rotate_point(m, &sphere.offset);
                }
                ClipShape::Round(sphere)
            }
        };

        let mut extents = size[1];
        let mut bounds = [[0.0; 3]; 2];
        match &clip {
            ClipShape::Round(s) => {
                for i in 0..3 {
                    let reach = s.offset[i].abs() + s.radius;
                    extents[i] = reach;
                    bounds[0][i] = start[i].min(end[i]) - reach;
                    bounds[1][i] = start[i].max(end[i]) + reach;
                }
            }
            _ => {
                for i in 0..3 {
                    bounds[0][i] = start[i].min(end[i]) + size[0][i];
                    bounds[1][i] = start[i].max(end[i]) + size[1][i];
                }
            }
        }

        Self {
            start,
            end,
            size,
            extents,
            bounds,
            clip,
            is_point,
            contents: query.contents,
            max_depth: limits.max_depth,
            max_position_leafs: limits.max_position_leafs,
            node_budget: 0,
            trace: Trace::default(),
            scratch,
            stats,
        }
    }

    /// Plane distance pushed out by the shape, and the shift applied to the
    /// segment for round shapes.
    #[inline]
    fn expanded_plane(&self, plane: &CPlane) -> (f32, Vec3) {
        match &self.clip {
            ClipShape::Box { offsets } => {
                let corner = &offsets[plane.signbits as usize];
                (plane.dist - dot_product(corner, &plane.normal), [0.0; 3])
            }
            ClipShape::Octagon { verts } => {
                let support = verts
                    .iter()
                    .map(|v| dot_product(v, &plane.normal))
                    .fold(f32::INFINITY, f32::min);
                (plane.dist - support, [0.0; 3])
            }
            ClipShape::Round(s) => {
                // test against the end of the pill nearest the plane
                let shift = if dot_product(&plane.normal, &s.offset) > 0.0 {
                    vector_negate(&s.offset)
                } else {
                    s.offset
                };
                (plane.dist + s.radius, shift)
            }
        }
    }

    // ============================================================
    // Brush level
    // ============================================================

    fn clip_to_brush(&mut self, tree: &BspTree, brush: &CBrush) {
        let sides = tree.brush_sides(brush);
        if sides.is_empty() {
            return;
        }
        self.stats.count_brush_trace();

        let mut enterfrac = -1.0f32;
        let mut leavefrac = 1.0f32;
        let mut lead: Option<(&CPlane, &CBrushSide)> = None;
        let mut getout = false;
        let mut startout = false;

        for side in sides {
            let plane = tree.plane(side.plane_idx);
            let (dist, shift) = self.expanded_plane(plane);
            let d1 = dot_product(&vector_add(&self.start, &shift), &plane.normal) - dist;
            let d2 = dot_product(&vector_add(&self.end, &shift), &plane.normal) - dist;

            if d2 > 0.0 {
                getout = true; // endpoint is not in solid
            }
            if d1 > 0.0 {
                startout = true;
            }

            // completely in front of face, no intersection
            if d1 > 0.0 && (d2 >= DIST_EPSILON || d2 >= d1) {
                return;
            }
            if d1 <= 0.0 && d2 <= 0.0 {
                continue;
            }

            // crosses face
            if d1 > d2 {
                // enter
                let f = ((d1 - DIST_EPSILON) / (d1 - d2)).max(0.0);
                if f > enterfrac {
                    enterfrac = f;
                    lead = Some((plane, side));
                }
            } else {
                // leave
                let f = ((d1 + DIST_EPSILON) / (d1 - d2)).min(1.0);
                if f < leavefrac {
                    leavefrac = f;
                }
            }
        }

        if !startout {
            // original point was inside brush
            self.trace.startsolid = true;
            if !getout {
                self.trace.allsolid = true;
                self.trace.fraction = 0.0;
                self.trace.contents = brush.contents;
            }
            return;
        }

        if enterfrac - FRAC_EPSILON > leavefrac {
            return;
        }
        if enterfrac > -1.0 && enterfrac < self.trace.fraction {
            if let Some((plane, side)) = lead {
                self.trace.fraction = enterfrac;
                self.trace.plane = *plane;
                self.trace.surface = tree.side_surface(side);
                self.trace.contents = brush.contents;
            }
        }
    }

    fn test_box_in_brush(&mut self, tree: &BspTree, brush: &CBrush) {
        let sides = tree.brush_sides(brush);
        if sides.is_empty() {
            return;
        }

        for side in sides {
            let plane = tree.plane(side.plane_idx);
            let (dist, shift) = self.expanded_plane(plane);
            let d1 = dot_product(&vector_add(&self.start, &shift), &plane.normal) - dist;
            // if completely in front of face, no intersection
            if d1 > 0.0 {
                return;
            }
        }

        // inside this brush
        self.trace.startsolid = true;
        self.trace.allsolid = true;
        self.trace.fraction = 0.0;
        self.trace.contents = brush.contents;
    }

    // ============================================================
    // Leaf level
    // ============================================================

    fn trace_to_leaf(&mut self, tree: &BspTree, leafnum: usize) {
        let leaf = tree.leaf(leafnum);
        if leaf.contents & self.contents == 0 {
            return;
        }
        for &b in tree.leaf_brushes(leaf) {
            if !self.scratch.first_visit(b) {
                continue; // already checked this brush in another leaf
            }
            let brush = &tree.brushes[b];
            if brush.contents & self.contents == 0 {
                continue;
            }
            self.clip_to_brush(tree, brush);
            if self.trace.fraction == 0.0 {
                return;
            }
        }
    }

    fn test_in_leaf(&mut self, tree: &BspTree, leafnum: usize) {
        let leaf = tree.leaf(leafnum);
        if leaf.contents & self.contents == 0 {
            return;
        }
        for &b in tree.leaf_brushes(leaf) {
            if !self.scratch.first_visit(b) {
                continue;
            }
            let brush = &tree.brushes[b];
            if brush.contents & self.contents == 0 {
                continue;
            }
            self.test_box_in_brush(tree, brush);
            if self.trace.allsolid {
                return;
            }
        }
    }

    // ============================================================
    // Tree level
    // ============================================================

    /// Walks the sub-segment `p1..p2` (fractions `p1f..p2f`) through the tree,
    /// near side first so the first hit is found before farther ones.
    fn trace_through_tree(
        &mut self,
        tree: &BspTree,
        child: NodeChild,
        p1f: f32,
        p2f: f32,
        p1: &Vec3,
        p2: &Vec3,
        depth: usize,
    ) {
        if self.trace.fraction <= p1f {
            return; // already hit something nearer
        }

        let num = match child {
            NodeChild::Leaf(l) => {
                self.trace_to_leaf(tree, l);
                return;
            }
            NodeChild::Node(n) => n,
        };
        if depth >= self.max_depth {
            warn!("trace_through_tree: exceeded depth {} at node {}", self.max_depth, num);
            return;
        }
        if self.node_budget == 0 {
            return;
        }
        self.node_budget -= 1;
        let Some(node) = tree.node(num) else {
            return;
        };
        let plane = tree.plane(node.plane_idx);

        // find the point distances to the separating plane
        // and the offset for the size of the box
        let (t1, t2, offset);
        if plane.is_axial() {
            let axis = plane.plane_type as usize;
            t1 = p1[axis] - plane.dist;
            t2 = p2[axis] - plane.dist;
            offset = self.extents[axis];
        } else {
            t1 = dot_product(&plane.normal, p1) - plane.dist;
            t2 = dot_product(&plane.normal, p2) - plane.dist;
            offset = if self.is_point {
                0.0
            } else {
                (self.extents[0] * plane.normal[0]).abs()
                    + (self.extents[1] * plane.normal[1]).abs()
                    + (self.extents[2] * plane.normal[2]).abs()
            };
        }

        // see which sides we need to consider
        if t1 >= offset && t2 >= offset {
            self.trace_through_tree(tree, node.children[0], p1f, p2f, p1, p2, depth + 1);
            return;
        }
        if t1 < -offset && t2 < -offset {
            self.trace_through_tree(tree, node.children[1], p1f, p2f, p1, p2, depth + 1);
            return;
        }

        // put the crosspoint DIST_EPSILON pixels on the near side
        let (side, frac, frac2);
        if t1 < t2 {
            let idist = 1.0 / (t1 - t2);
            side = 1;
            frac = ((t1 - offset + DIST_EPSILON) * idist).clamp(0.0, 1.0);
            frac2 = ((t1 + offset + DIST_EPSILON) * idist).clamp(0.0, 1.0);
        } else if t1 > t2 {
            let idist = 1.0 / (t1 - t2);
            side = 0;
            frac = ((t1 + offset + DIST_EPSILON) * idist).clamp(0.0, 1.0);
            frac2 = ((t1 - offset - DIST_EPSILON) * idist).clamp(0.0, 1.0);
        } else {
            side = 0;
            frac = 1.0;
            frac2 = 0.0;
        }

        // move up to the node
        let midf = p1f + (p2f - p1f) * frac;
        let mid = vector_lerp(p1, p2, frac);
        self.trace_through_tree(tree, node.children[side], p1f, midf, p1, &mid, depth + 1);

        // go past the node
        let midf = p1f + (p2f - p1f) * frac2;
        let mid = vector_lerp(p1, p2, frac2);
        self.trace_through_tree(tree, node.children[side ^ 1], midf, p2f, &mid, p2, depth + 1);
    }

    fn position_test(&mut self, tree: &BspTree, root: NodeChild) {
        // extend by one unit so touching leaves are included
        let mins = [self.bounds[0][0] - 1.0, self.bounds[0][1] - 1.0, self.bounds[0][2] - 1.0];
        let maxs = [self.bounds[1][0] + 1.0, self.bounds[1][1] + 1.0, self.bounds[1][2] + 1.0];
        let found = box_leafnums(tree, root, &mins, &maxs, self.max_position_leafs, self.max_depth);
        for leafnum in found.leafs {
            self.test_in_leaf(tree, leafnum);
            if self.trace.allsolid {
                break;
            }
        }
    }

    // ============================================================
    // Round hulls
    // ============================================================

    fn outside_hull_bounds(&self, hull: &ShapeHull) -> bool {
        let (mins, maxs) = hull.bounds();
        (0..3).any(|i| {
            self.bounds[0][i] > maxs[i] + RADIUS_EPSILON
                || self.bounds[1][i] < mins[i] - RADIUS_EPSILON
        })
    }

    fn apply_round_contact(&mut self, contact: Option<RoundContact>, contents: i32) {
        match contact {
            None => {}
            Some(RoundContact::Embedded { allsolid }) => {
                // starting inside but moving out is free to move
                self.trace.startsolid = true;
                self.trace.contents = contents;
                if allsolid {
                    self.trace.allsolid = true;
                    self.trace.fraction = 0.0;
                }
            }
            Some(RoundContact::Hit {
                fraction,
                normal,
                point,
            }) => {
                if fraction < self.trace.fraction {
                    self.trace.fraction = fraction;
                    self.trace.plane = CPlane::new(normal, dot_product(&normal, &point));
                    self.trace.surface = CSurface::default();
                    self.trace.contents = contents;
                }
            }
        }
    }

    /// Round mover against a round hull; both stay analytic.
    fn capsule_through_capsule(&mut self, hull: &ShapeHull, mover: &HullSphere) {
        if self.outside_hull_bounds(hull) {
            return;
        }
        // top and bottom sphere centres of the mover at start and end
        let starttop = vector_add(&self.start, &mover.offset);
        let startbottom = vector_subtract(&self.start, &mover.offset);
        let endtop = vector_add(&self.end, &mover.offset);
        let endbottom = vector_subtract(&self.end, &mover.offset);

        let center = hull.center();
        let target = hull.sphere();
        let top = vector_add(&center, &target.offset);
        let bottom = vector_subtract(&center, &target.offset);
        let radius = target.radius + mover.radius;
        let contents = hull.contents();

        if self.start[0] != self.end[0] || self.start[1] != self.end[1] {
            // the expanded cylinder is as tall as both cylinders
            let h = target.halfheight + mover.halfheight - radius;
            if h > 0.0 {
                let c = sweep_vertical_cylinder(&self.start, &self.end, &center, radius, h);
                self.apply_round_contact(c, contents);
            }
        }
        let c = sweep_sphere(&startbottom, &endbottom, &top, radius);
        self.apply_round_contact(c, contents);
        let c = sweep_sphere(&starttop, &endtop, &bottom, radius);
        self.apply_round_contact(c, contents);
    }

    /// Swaps roles: the mover becomes the hull's pill and the hull becomes a
    /// box of the mover's size. The Minkowski sum is the same either way.
    fn swap_into_box(&mut self, hull: &ShapeHull) -> ShapeHull {
        let center = hull.center();
        self.start = vector_subtract(&self.start, &center);
        self.end = vector_subtract(&self.end, &center);
        self.clip = ClipShape::Round(*hull.sphere());
        self.scratch.begin(1);
        ShapeHull::new(HullKind::Box, &self.size[0], &self.size[1], hull.contents())
    }

    fn bbox_through_capsule(&mut self, hull: &ShapeHull) {
        if self.outside_hull_bounds(hull) {
            return;
        }
        let swapped = self.swap_into_box(hull);
        self.trace_to_leaf(swapped.tree(), HULL_LEAF);
    }

    fn test_capsule_in_capsule(&mut self, hull: &ShapeHull, mover: &HullSphere) {
        let center = hull.center();
        let target = hull.sphere();
        let overlap = capsules_overlap(
            &vector_subtract(&self.start, &mover.offset),
            &vector_add(&self.start, &mover.offset),
            mover.radius,
            &vector_subtract(&center, &target.offset),
            &vector_add(&center, &target.offset),
            target.radius,
        );
        if overlap {
            self.trace.startsolid = true;
            self.trace.allsolid = true;
            self.trace.fraction = 0.0;
            self.trace.contents = hull.contents();
        }
    }

    fn test_bbox_in_capsule(&mut self, hull: &ShapeHull) {
        let swapped = self.swap_into_box(hull);
        self.test_in_leaf(swapped.tree(), HULL_LEAF);
    }

    fn run(&mut self, target: TraceTarget<'_>, position: bool) {
        match target {
            TraceTarget::Hull(hull) if hull.kind().is_round() => {
                self.scratch.begin(hull.tree().brushes.len());
                match (self.clip, position) {
                    (ClipShape::Round(mover), true) => self.test_capsule_in_capsule(hull, &mover),
                    (ClipShape::Round(mover), false) => self.capsule_through_capsule(hull, &mover),
                    (_, true) => self.test_bbox_in_capsule(hull),
                    (_, false) => self.bbox_through_capsule(hull),
                }
            }
            TraceTarget::Hull(hull) => self.run_tree(hull.tree(), hull.head(), position),
            TraceTarget::Tree { tree, root } => self.run_tree(tree, root, position),
        }
    }

    fn run_tree(&mut self, tree: &BspTree, root: NodeChild, position: bool) {
        self.scratch.begin(tree.brushes.len());
        self.node_budget = tree.nodes.len();
        if position {
            self.position_test(tree, root);
        } else {
            let (start, end) = (self.start, self.end);
            self.trace_through_tree(tree, root, 0.0, 1.0, &start, &end, 0);
        }
    }
}

/// Recursion and gather limits for one query.
#[derive(Debug, Clone, Copy)]
pub(crate) struct TraceLimits {
    pub max_depth: usize,
    pub max_position_leafs: usize,
}

/// Runs `query` (already in the target's frame) and fills in `endpos`
/// along the query's own segment.
pub(crate) fn trace_target(
    target: TraceTarget<'_>,
    query: &TraceQuery,
    rotation: Option<&Mat3>,
    limits: TraceLimits,
    scratch: &mut TraceScratch,
    stats: &CmStats,
) -> Trace {
    stats.count_trace();

    let position = query.is_position_test();
    let mut tw = TraceWork::new(query, rotation, limits, scratch, stats);
    tw.run(target, position);

    let mut trace = tw.trace;
    if trace.fraction == 1.0 {
        trace.endpos = query.end;
    } else {
        trace.fraction = trace.fraction.clamp(0.0, 1.0);
        trace.endpos = vector_lerp(&query.start, &query.end, trace.fraction);
    }
    trace
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::hull::{build_box_hull, build_capsule_hull, build_sphere_hull};
    use crate::testmap;
    use brushtrace_common::q_shared::{CONTENTS_MONSTER, CONTENTS_SOLID, MASK_ALL, MASK_SOLID};

    const LIMITS: TraceLimits = TraceLimits {
        max_depth: 256,
        max_position_leafs: 1024,
    };

    fn run(target: TraceTarget<'_>, q: &TraceQuery) -> Trace {
        let mut scratch = TraceScratch::new();
        trace_target(target, q, None, LIMITS, &mut scratch, &CmStats::default())
    }

    fn world(tree: &BspTree) -> TraceTarget<'_> {
        TraceTarget::Tree {
            tree,
            root: NodeChild::Node(0),
        }
    }

    #[test]
    fn test_scratch_dedup_and_wrap() {
        let mut s = TraceScratch::new();
        s.begin(4);
        assert!(s.first_visit(2));
        assert!(!s.first_visit(2));
        s.begin(4);
        assert!(s.first_visit(2));
        // out of range brushes are never deduped
        assert!(s.first_visit(99));
        assert!(s.first_visit(99));

        s.query_id = u32::MAX;
        s.brush_stamps[1] = 1;
        s.begin(4);
        assert_eq!(s.query_id(), 1);
        assert!(s.first_visit(1));
    }

    #[test]
    fn test_box_lands_flush_on_floor() {
        let tree = testmap::floor_tree();
        let q = TraceQuery::new(&[0.0, 0.0, 100.0], &[0.0, 0.0, -100.0], &[-16.0; 3], &[16.0; 3], MASK_SOLID);
        let tr = run(world(&tree), &q);
        assert!(!tr.allsolid);
        assert!(!tr.startsolid);
        assert!((tr.endpos[2] - 16.0).abs() <= DIST_EPSILON + 1e-4);
        assert!(tr.endpos[2] >= 16.0);
        assert_eq!(tr.plane.normal, [0.0, 0.0, 1.0]);
        assert_eq!(tr.contents, CONTENTS_SOLID);
        assert_eq!(tr.surface.name(), "floor");
    }

    #[test]
    fn test_half_embedded_box_starts_solid() {
        let tree = testmap::floor_tree();
        let p = [0.0, 0.0, 8.0];
        let tr = run(world(&tree), &TraceQuery::position(&p, &[-16.0; 3], &[16.0; 3], MASK_SOLID));
        assert!(tr.startsolid);
        assert!(tr.allsolid);
        assert_eq!(tr.fraction, 0.0);
    }

    #[test]
    fn test_contents_filter_ignores_brush() {
        let tree = testmap::floor_tree();
        let q = TraceQuery::new(&[0.0, 0.0, 100.0], &[0.0, 0.0, -100.0], &[-16.0; 3], &[16.0; 3], CONTENTS_MONSTER);
        let tr = run(world(&tree), &q);
        assert_eq!(tr.fraction, 1.0);
        assert_eq!(tr.endpos, [0.0, 0.0, -100.0]);
    }

    #[test]
    fn test_slab_brush_is_clipped_once_across_leaves() {
        let tree = testmap::slab_tree();
        let stats = CmStats::default();
        let mut scratch = TraceScratch::new();
        // straddles the x = 0 split so both solid leaves are visited
        let q = TraceQuery::new(&[0.0, 0.0, 100.0], &[0.0, 0.0, -100.0], &[-16.0; 3], &[16.0; 3], MASK_SOLID);
        let tr = trace_target(world(&tree), &q, None, LIMITS, &mut scratch, &stats);
        assert!((tr.endpos[2] - 16.0).abs() <= DIST_EPSILON + 1e-4);
        assert_eq!(stats.snapshot().brush_traces, 1);
    }

    #[test]
    fn test_sliding_along_floor_is_free() {
        let tree = testmap::slab_tree();
        let q = TraceQuery::new(&[-200.0, 0.0, 16.5], &[200.0, 0.0, 16.5], &[-16.0; 3], &[16.0; 3], MASK_SOLID);
        let tr = run(world(&tree), &q);
        assert_eq!(tr.fraction, 1.0);
        assert!(!tr.startsolid);
    }

    #[test]
    fn test_point_path_matches_zero_box_path() {
        let tree = testmap::slab_tree();
        let q = TraceQuery::point(&[30.0, -20.0, 90.0], &[-40.0, 10.0, -30.0], MASK_ALL);
        let mut scratch = TraceScratch::new();
        let stats = CmStats::default();

        let point = trace_target(world(&tree), &q, None, LIMITS, &mut scratch, &stats);

        let mut tw = TraceWork::new(&q, None, LIMITS, &mut scratch, &stats);
        tw.is_point = false;
        tw.run(world(&tree), false);
        assert_eq!(tw.trace.fraction, point.fraction);
        assert!(point.fraction < 1.0);
    }

    #[test]
    fn test_octagon_mover_reaches_closer_on_diagonal() {
        // a wall whose normal is 45 degrees in xy, crossed by a box and an octagon
        let tree = testmap::diagonal_wall_tree();
        let start = [-100.0, -100.0, 0.0];
        let end = [0.0, 0.0, 0.0];
        let mins = [-16.0; 3];
        let maxs = [16.0; 3];
        let boxed = run(world(&tree), &TraceQuery::new(&start, &end, &mins, &maxs, MASK_SOLID));
        let oct = run(
            world(&tree),
            &TraceQuery::new(&start, &end, &mins, &maxs, MASK_SOLID).with_shape(HullKind::Octagon),
        );
        assert!(boxed.fraction < 1.0);
        assert!(oct.fraction > boxed.fraction);
        assert_eq!(boxed.plane.normal, oct.plane.normal);
    }

    #[test]
    fn test_capsule_mover_on_floor() {
        let tree = testmap::floor_tree();
        let q = TraceQuery::new(&[0.0, 0.0, 100.0], &[0.0, 0.0, -100.0], &[-16.0, -16.0, -24.0], &[16.0, 16.0, 32.0], MASK_SOLID)
            .with_shape(HullKind::Capsule);
        let tr = run(world(&tree), &q);
        // the pill bottom reaches as low as the box bottom
        assert!((tr.endpos[2] - 24.0).abs() <= DIST_EPSILON + 1e-3);
        assert_eq!(tr.plane.normal, [0.0, 0.0, 1.0]);
    }

    #[test]
    fn test_box_against_box_hull() {
        let hull = build_box_hull(&[-16.0; 3], &[16.0; 3], CONTENTS_MONSTER);
        let q = TraceQuery::new(&[-100.0, 0.0, 0.0], &[100.0, 0.0, 0.0], &[-8.0; 3], &[8.0; 3], MASK_ALL);
        let tr = run(TraceTarget::Hull(&hull), &q);
        assert!((tr.endpos[0] + 24.0).abs() <= DIST_EPSILON + 1e-4);
        assert_eq!(tr.plane.normal, [-1.0, 0.0, 0.0]);
        assert_eq!(tr.contents, CONTENTS_MONSTER);
        assert!(tr.surface.is_null());
    }

    #[test]
    fn test_box_against_capsule_hull() {
        let hull = build_capsule_hull(&[-16.0, -16.0, -32.0], &[16.0, 16.0, 32.0], CONTENTS_MONSTER);
        // along x at the centre height the pill is as wide as the box
        let q = TraceQuery::new(&[-100.0, 0.0, 0.0], &[100.0, 0.0, 0.0], &[-8.0; 3], &[8.0; 3], MASK_ALL);
        let tr = run(TraceTarget::Hull(&hull), &q);
        assert!(tr.fraction < 1.0);
        assert!((tr.endpos[0] + 24.0).abs() < 1.0 + 1e-3);
        assert!(tr.plane.normal[0] < -0.99);

        // box bottom passes above the top of the pill
        let q = TraceQuery::new(&[-100.0, 0.0, 41.0], &[100.0, 0.0, 41.0], &[-8.0; 3], &[8.0; 3], MASK_ALL);
        assert_eq!(run(TraceTarget::Hull(&hull), &q).fraction, 1.0);
    }

    #[test]
    fn test_capsule_against_capsule_hull() {
        let hull = build_capsule_hull(&[-16.0, -16.0, -32.0], &[16.0, 16.0, 32.0], CONTENTS_MONSTER);
        let q = TraceQuery::new(&[-100.0, 0.0, 0.0], &[100.0, 0.0, 0.0], &[-16.0, -16.0, -32.0], &[16.0, 16.0, 32.0], MASK_ALL)
            .with_shape(HullKind::Capsule);
        let tr = run(TraceTarget::Hull(&hull), &q);
        // cylinders touch when centres are 32 apart, plus the skin
        assert!((tr.endpos[0] + 32.0 + RADIUS_EPSILON).abs() < 1e-3);
        assert_eq!(tr.contents, CONTENTS_MONSTER);

        let q = TraceQuery::new(&[-100.0, 0.0, 0.0], &[-60.0, 0.0, 0.0], &[-16.0, -16.0, -32.0], &[16.0, 16.0, 32.0], MASK_ALL)
            .with_shape(HullKind::Capsule);
        assert_eq!(run(TraceTarget::Hull(&hull), &q).fraction, 1.0);
    }

    #[test]
    fn test_position_tests_against_round_hulls() {
        let sphere = build_sphere_hull(&[-16.0; 3], &[16.0; 3], CONTENTS_SOLID);
        let small = ([-4.0; 3], [4.0; 3]);

        let q = TraceQuery::position(&[0.0, 0.0, 18.0], &small.0, &small.1, MASK_ALL);
        assert!(run(TraceTarget::Hull(&sphere), &q).allsolid);
        let q = TraceQuery::position(&[0.0, 0.0, 21.0], &small.0, &small.1, MASK_ALL);
        assert!(!run(TraceTarget::Hull(&sphere), &q).startsolid);

        let q = TraceQuery::position(&[0.0, 0.0, 19.0], &small.0, &small.1, MASK_ALL).with_shape(HullKind::Sphere);
        assert!(run(TraceTarget::Hull(&sphere), &q).startsolid);
        let q = TraceQuery::position(&[0.0, 0.0, 21.0], &small.0, &small.1, MASK_ALL).with_shape(HullKind::Sphere);
        assert!(!run(TraceTarget::Hull(&sphere), &q).startsolid);
    }

    #[test]
    fn test_sweep_from_inside_leaves_without_allsolid() {
        let hull = build_box_hull(&[-16.0; 3], &[16.0; 3], CONTENTS_SOLID);
        let q = TraceQuery::point(&[0.0, 0.0, 0.0], &[100.0, 0.0, 0.0], MASK_ALL);
        let tr = run(TraceTarget::Hull(&hull), &q);
        assert!(tr.startsolid);
        assert!(!tr.allsolid);
        assert_eq!(tr.fraction, 1.0);
    }

    #[test]
    fn test_round_mover_escapes_round_hull() {
        let pill = ([-16.0, -16.0, -32.0], [16.0, 16.0, 32.0]);
        let hull = build_capsule_hull(&pill.0, &pill.1, CONTENTS_MONSTER);
        let q = TraceQuery::new(&[20.0, 0.0, 0.0], &[200.0, 0.0, 0.0], &pill.0, &pill.1, MASK_ALL)
            .with_shape(HullKind::Capsule);
        let tr = run(TraceTarget::Hull(&hull), &q);
        assert!(tr.startsolid);
        assert!(!tr.allsolid);
        assert_eq!(tr.fraction, 1.0);
        assert_eq!(tr.endpos, [200.0, 0.0, 0.0]);
        assert_eq!(tr.contents, CONTENTS_MONSTER);

        // moving deeper in stays stuck
        let q = TraceQuery { end: [10.0, 0.0, 0.0], ..q };
        let tr = run(TraceTarget::Hull(&hull), &q);
        assert!(tr.allsolid);
        assert_eq!(tr.fraction, 0.0);

        let sphere = build_sphere_hull(&[-16.0; 3], &[16.0; 3], CONTENTS_MONSTER);
        let q = TraceQuery::new(&[10.0, 0.0, 0.0], &[100.0, 0.0, 0.0], &[-8.0; 3], &[8.0; 3], MASK_ALL)
            .with_shape(HullKind::Sphere);
        let tr = run(TraceTarget::Hull(&sphere), &q);
        assert!(tr.startsolid && !tr.allsolid);
        assert_eq!(tr.fraction, 1.0);
    }

    #[test]
    fn test_stationary_round_sweep_is_position_test() {
        let hull = build_capsule_hull(&[-16.0, -16.0, -32.0], &[16.0, 16.0, 32.0], CONTENTS_MONSTER);
        let tree = testmap::slab_tree();
        for shape in [HullKind::Octagon, HullKind::Capsule, HullKind::Sphere] {
            for p in [[0.0, 0.0, 8.0], [20.0, 0.0, 0.0], [100.0, 0.0, 40.0]] {
                let still = TraceQuery::new(&p, &p, &[-12.0; 3], &[12.0; 3], MASK_ALL).with_shape(shape);
                let test = TraceQuery::position(&p, &[-12.0; 3], &[12.0; 3], MASK_ALL).with_shape(shape);
                assert_eq!(run(TraceTarget::Hull(&hull), &still), run(TraceTarget::Hull(&hull), &test));
                assert_eq!(run(world(&tree), &still), run(world(&tree), &test));
            }
        }
        // embedded round movers are all solid when they do not move
        let q = TraceQuery::position(&[20.0, 0.0, 0.0], &[-12.0; 3], &[12.0; 3], MASK_ALL).with_shape(HullKind::Capsule);
        let tr = run(TraceTarget::Hull(&hull), &q);
        assert!(tr.startsolid && tr.allsolid);
        assert_eq!(tr.fraction, 0.0);
    }

    #[test]
    fn test_cyclic_tree_walks_terminate() {
        let mut tree = testmap::slab_tree();
        tree.nodes[0].children = [NodeChild::Node(0), NodeChild::Node(0)];
        let limits = TraceLimits {
            max_depth: 1024,
            max_position_leafs: 1024,
        };
        let mut scratch = TraceScratch::new();
        let stats = CmStats::default();

        let q = TraceQuery::new(&[-100.0, 0.0, 50.0], &[100.0, 0.0, 50.0], &[-8.0; 3], &[8.0; 3], MASK_ALL);
        let tr = trace_target(world(&tree), &q, None, limits, &mut scratch, &stats);
        assert_eq!(tr.fraction, 1.0);

        let q = TraceQuery::position(&[0.0, 0.0, 0.0], &[-8.0; 3], &[8.0; 3], MASK_ALL);
        let tr = trace_target(world(&tree), &q, None, limits, &mut scratch, &stats);
        assert!(!tr.startsolid);
    }

    #[test]
    fn test_transform_helpers() {
        let xf = Transform::from_origin_angles(&[100.0, 0.0, 0.0], &[0.0, 90.0, 0.0]);
        assert!(xf.is_rotated());
        let local = xf.to_local(&[100.0, 10.0, 0.0], true);
        assert!((local[0] - 10.0).abs() < 1e-4 && local[1].abs() < 1e-4);
        assert_eq!(xf.to_local(&[100.0, 10.0, 0.0], false), [0.0, 10.0, 0.0]);

        // local +x plane at 8 is world +y at 8, offset by the origin
        let world = xf.plane_to_world(&CPlane::new([1.0, 0.0, 0.0], 8.0), true);
        assert!((world.normal[1] - 1.0).abs() < 1e-5);
        assert!((world.dist - 8.0).abs() < 1e-4);

        let flat = Transform::from_origin_angles(&[0.0, 0.0, 64.0], &[0.0; 3]);
        assert!(!flat.is_rotated());
        let p = flat.plane_to_world(&CPlane::new([0.0, 0.0, 1.0], 0.0), true);
        assert_eq!(p.dist, 64.0);
    }
}
