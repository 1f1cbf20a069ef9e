// hull.rs - miniature BSPs for boxes, octagonal prisms, capsules and spheres
//
// Every hull shares one layout so the generic traversal can walk it:
//
//   leaf 0    empty space
//   leaf 1    the shape (one brush)
//   node 0-5  axial planes, back/front alternating, ending in node 6 or leaf 1
//   node 6-9  octagon only: the four 45 degree planes
//
// Planes 0-11 come in (+n, -n) pairs so brush sides always face out.

use std::f32::consts::SQRT_2;

use brushtrace_common::q_shared::{
    vector_add, vector_scale, vector_subtract, CPlane, Vec3,
};

use crate::bsp::{BspTree, CBrush, CBrushSide, CLeaf, CNode, NodeChild};

/// The brush leaf inside every hull tree.
pub const HULL_LEAF: usize = 1;
const EMPTY_LEAF: usize = 0;

const BOX_SIDES: usize = 6;
const OCTAGON_SIDES: usize = 10;
const DIAGONALS: [[f32; 2]; 4] = [[1.0, 1.0], [-1.0, 1.0], [-1.0, -1.0], [1.0, -1.0]];

/// Closed set of shapes, used both for hulls and for the moving volume.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum HullKind {
    #[default]
    Box,
    /// Box with its four vertical edges bevelled at 45 degrees.
    Octagon,
    /// Vertical pill: two spheres joined by a cylinder.
    Capsule,
    Sphere,
}

impl HullKind {
    #[inline]
    pub fn is_round(self) -> bool {
        matches!(self, HullKind::Capsule | HullKind::Sphere)
    }

    fn num_sides(self) -> usize {
        match self {
            HullKind::Octagon => OCTAGON_SIDES,
            _ => BOX_SIDES,
        }
    }
}

/// Analytic sphere/pill derived from a half-extent box.
///
/// The pill segment runs from `center - offset` to `center + offset`.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct HullSphere {
    pub radius: f32,
    pub halfheight: f32,
    pub offset: Vec3,
}

impl HullSphere {
    /// Vertical capsule filling a box of half extents `size`.
    pub fn capsule(size: &Vec3) -> Self {
        let radius = size[0].min(size[1]).min(size[2]).max(0.0);
        let halfheight = size[2].max(0.0);
        Self {
            radius,
            halfheight,
            offset: [0.0, 0.0, halfheight - radius],
        }
    }

    /// Largest sphere inside a box of half extents `size`.
    pub fn sphere(size: &Vec3) -> Self {
        let radius = size[0].min(size[1]).min(size[2]).max(0.0);
        Self {
            radius,
            halfheight: radius,
            offset: [0.0; 3],
        }
    }

    pub fn for_kind(kind: HullKind, size: &Vec3) -> Self {
        match kind {
            HullKind::Sphere => Self::sphere(size),
            _ => Self::capsule(size),
        }
    }
}

/// Distance along the x+y diagonal at which the bevel plane sits for an
/// octagon inscribed in a box of half extents `a` x `b`.
pub fn octagon_bevel(a: f32, b: f32) -> f32 {
    let c = a.max(b) + (SQRT_2 - 1.0) * a.min(b);
    c / SQRT_2
}

/// A self-contained BSP for one convex shape.
///
/// Owned by the caller; regenerating it with [`ShapeHull::set_bounds`]
/// rewrites plane distances in place.
#[derive(Debug, Clone)]
pub struct ShapeHull {
    kind: HullKind,
    tree: BspTree,
    mins: Vec3,
    maxs: Vec3,
    contents: i32,
    sphere: HullSphere,
}

impl ShapeHull {
    pub fn new(kind: HullKind, mins: &Vec3, maxs: &Vec3, contents: i32) -> Self {
        let mut hull = Self {
            kind,
            tree: hull_skeleton(kind, contents),
            mins: *mins,
            maxs: *maxs,
            contents,
            sphere: HullSphere::default(),
        };
        hull.set_bounds(mins, maxs);
        hull
    }

    #[inline]
    pub fn kind(&self) -> HullKind {
        self.kind
    }

    #[inline]
    pub fn tree(&self) -> &BspTree {
        &self.tree
    }

    #[inline]
    pub fn head(&self) -> NodeChild {
        NodeChild::Node(0)
    }

    pub fn bounds(&self) -> (Vec3, Vec3) {
        (self.mins, self.maxs)
    }

    pub fn contents(&self) -> i32 {
        self.contents
    }

    /// Midpoint of the bounds; round shapes are centred here.
    pub fn center(&self) -> Vec3 {
        vector_scale(&vector_add(&self.mins, &self.maxs), 0.5)
    }

    /// Meaningful for capsules and spheres only.
    pub fn sphere(&self) -> &HullSphere {
        &self.sphere
    }

    pub fn set_contents(&mut self, contents: i32) {
        self.contents = contents;
        self.tree.leafs[HULL_LEAF].contents = contents;
        self.tree.brushes[0].contents = contents;
    }

    /// Regenerates the hull for new bounds without reallocating.
    pub fn set_bounds(&mut self, mins: &Vec3, maxs: &Vec3) {
        self.mins = *mins;
        self.maxs = *maxs;
        let center = self.center();
        let size = vector_subtract(maxs, &center);

        let planes = &mut self.tree.planes;
        for axis in 0..3 {
            planes[axis * 4].dist = maxs[axis];
            planes[axis * 4 + 1].dist = -maxs[axis];
            planes[axis * 4 + 2].dist = mins[axis];
            planes[axis * 4 + 3].dist = -mins[axis];
        }

        if self.kind == HullKind::Octagon {
            let bevel = octagon_bevel(size[0], size[1]);
            for plane in planes[12..16].iter_mut() {
                plane.dist = plane.normal[0] * center[0] + plane.normal[1] * center[1] + bevel;
            }
        }
        if self.kind.is_round() {
            self.sphere = HullSphere::for_kind(self.kind, &size);
        }

        let leaf = &mut self.tree.leafs[HULL_LEAF];
        leaf.mins = *mins;
        leaf.maxs = *maxs;
    }

    /// Exact containment, including the rounded parts of capsules and spheres.
    pub fn contains_point(&self, p: &Vec3) -> bool {
        if (0..3).any(|i| p[i] < self.mins[i] || p[i] > self.maxs[i]) {
            return false;
        }
        match self.kind {
            HullKind::Box => true,
            HullKind::Octagon => self.tree.planes[12..16]
                .iter()
                .all(|plane| plane.distance(p) <= 0.0),
            HullKind::Capsule | HullKind::Sphere => {
                let center = self.center();
                let top = vector_add(&center, &self.sphere.offset);
                let bottom = vector_subtract(&center, &self.sphere.offset);
                crate::capsule::point_segment_distance_squared(p, &bottom, &top)
                    <= self.sphere.radius * self.sphere.radius
            }
        }
    }
}

/// Planes, nodes, leaves and brush for `kind`; distances are filled in by `set_bounds`.
fn hull_skeleton(kind: HullKind, contents: i32) -> BspTree {
    let num_sides = kind.num_sides();
    let mut tree = BspTree::default();

    for axis in 0..3 {
        for _ in 0..2 {
            let mut normal = [0.0; 3];
            normal[axis] = 1.0;
            tree.planes.push(CPlane::new(normal, 0.0));
            normal[axis] = -1.0;
            tree.planes.push(CPlane::new(normal, 0.0));
        }
    }
    if kind == HullKind::Octagon {
        for d in DIAGONALS {
            let normal = [d[0] / SQRT_2, d[1] / SQRT_2, 0.0];
            tree.planes.push(CPlane::new(normal, 0.0));
        }
    }

    tree.leafs.push(CLeaf {
        contents: 0,
        ..CLeaf::NULL
    });
    tree.leafs.push(CLeaf {
        contents,
        cluster: -1,
        area: 0,
        mins: [0.0; 3],
        maxs: [0.0; 3],
        firstleafbrush: 0,
        numleafbrushes: 1,
    });
    tree.leafbrushes.push(0);
    tree.brushes.push(CBrush {
        contents,
        firstbrushside: 0,
        numsides: num_sides,
    });

    for i in 0..num_sides {
        let next = if i + 1 == num_sides {
            NodeChild::Leaf(HULL_LEAF)
        } else {
            NodeChild::Node(i + 1)
        };

        if i < BOX_SIDES {
            // even i: +axis at maxs, outside is in front
            // odd i:  +axis at mins, outside is behind
            let side = i & 1;
            tree.brushsides.push(CBrushSide {
                plane_idx: i * 2 + side,
                surface_idx: None,
            });
            let mut children = [next; 2];
            children[side] = NodeChild::Leaf(EMPTY_LEAF);
            tree.nodes.push(CNode {
                plane_idx: i * 2,
                children,
            });
        } else {
            let plane_idx = 12 + (i - BOX_SIDES);
            tree.brushsides.push(CBrushSide {
                plane_idx,
                surface_idx: None,
            });
            tree.nodes.push(CNode {
                plane_idx,
                children: [NodeChild::Leaf(EMPTY_LEAF), next],
            });
        }
    }

    tree
}

/// Axis-aligned box hull.
pub fn build_box_hull(mins: &Vec3, maxs: &Vec3, contents: i32) -> ShapeHull {
    ShapeHull::new(HullKind::Box, mins, maxs, contents)
}

/// Box with bevelled vertical edges, a cheap stand-in for a cylinder.
pub fn build_octagon_hull(mins: &Vec3, maxs: &Vec3, contents: i32) -> ShapeHull {
    ShapeHull::new(HullKind::Octagon, mins, maxs, contents)
}

/// Vertical capsule inscribed in the bounds.
pub fn build_capsule_hull(mins: &Vec3, maxs: &Vec3, contents: i32) -> ShapeHull {
    ShapeHull::new(HullKind::Capsule, mins, maxs, contents)
}

/// Sphere inscribed in the bounds.
pub fn build_sphere_hull(mins: &Vec3, maxs: &Vec3, contents: i32) -> ShapeHull {
    ShapeHull::new(HullKind::Sphere, mins, maxs, contents)
}
