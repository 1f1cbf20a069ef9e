// bsp.rs - plane/brush store and BSP index

use brushtrace_common::q_shared::{CPlane, CSurface, Vec3};
use log::warn;

use crate::error::{check_index, CmError, Result};

/// Reference from a node to one of its children.
///
/// `children[0]` is always the front side of the node plane (distance >= 0),
/// `children[1]` the back side. This is the order the BSP compiler writes
/// and every walk relies on it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum NodeChild {
    Node(usize),
    Leaf(usize),
}

impl NodeChild {
    /// File encoding: non-negative is a node index, `-1 - leafnum` is a leaf.
    pub fn from_raw(raw: i32) -> Self {
        if raw < 0 {
            NodeChild::Leaf((-1 - raw as i64) as usize)
        } else {
            NodeChild::Node(raw as usize)
        }
    }

    pub fn to_raw(self) -> i32 {
        match self {
            NodeChild::Node(n) => n as i32,
            NodeChild::Leaf(l) => -1 - l as i32,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct CNode {
    pub plane_idx: usize,
    pub children: [NodeChild; 2],
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct CLeaf {
    pub contents: i32,
    pub cluster: i32,
    pub area: i32,
    pub mins: Vec3,
    pub maxs: Vec3,
    pub firstleafbrush: usize,
    pub numleafbrushes: usize,
}

impl CLeaf {
    pub const NULL: CLeaf = CLeaf {
        contents: 0,
        cluster: -1,
        area: 0,
        mins: [0.0; 3],
        maxs: [0.0; 3],
        firstleafbrush: 0,
        numleafbrushes: 0,
    };
}

impl Default for CLeaf {
    fn default() -> Self {
        CLeaf::NULL
    }
}

/// Answer for lookups that fall outside the leaf array.
pub static NULL_LEAF: CLeaf = CLeaf::NULL;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct CBrushSide {
    pub plane_idx: usize,
    /// `None` for sides without texinfo; reported as the null surface.
    pub surface_idx: Option<usize>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct CBrush {
    pub contents: i32,
    pub firstbrushside: usize,
    pub numsides: usize,
}

/// Index-linked arena holding one BSP: the world tree of a map or a
/// synthesized shape hull.
#[derive(Debug, Clone, Default)]
pub struct BspTree {
    pub planes: Vec<CPlane>,
    pub nodes: Vec<CNode>,
    pub leafs: Vec<CLeaf>,
    pub leafbrushes: Vec<usize>,
    pub brushes: Vec<CBrush>,
    pub brushsides: Vec<CBrushSide>,
    pub surfaces: Vec<CSurface>,
}

impl BspTree {
    /// `None` (with a warning) for out-of-range indices.
    pub fn node(&self, idx: usize) -> Option<&CNode> {
        let node = self.nodes.get(idx);
        if node.is_none() {
            warn!("BspTree::node: bad number {} (numnodes {})", idx, self.nodes.len());
        }
        node
    }

    /// The null leaf (with a warning) for out-of-range indices.
    pub fn leaf(&self, idx: usize) -> &CLeaf {
        match self.leafs.get(idx) {
            Some(leaf) => leaf,
            None => {
                warn!("BspTree::leaf: bad number {} (numleafs {})", idx, self.leafs.len());
                &NULL_LEAF
            }
        }
    }

    #[inline]
    pub fn plane(&self, idx: usize) -> &CPlane {
        &self.planes[idx]
    }

    pub fn leaf_brushes(&self, leaf: &CLeaf) -> &[usize] {
        let end = leaf.firstleafbrush + leaf.numleafbrushes;
        self.leafbrushes.get(leaf.firstleafbrush..end).unwrap_or(&[])
    }

    pub fn brush_sides(&self, brush: &CBrush) -> &[CBrushSide] {
        let end = brush.firstbrushside + brush.numsides;
        self.brushsides.get(brush.firstbrushside..end).unwrap_or(&[])
    }

    pub fn side_surface(&self, side: &CBrushSide) -> CSurface {
        side.surface_idx
            .and_then(|i| self.surfaces.get(i))
            .copied()
            .unwrap_or_default()
    }

    /// Descends from `root` to the leaf containing `p`.
    ///
    /// Returns `None` when the walk hits a bad index or exceeds `max_depth`.
    pub fn point_leafnum(&self, root: NodeChild, p: &Vec3, max_depth: usize) -> Option<usize> {
        let mut child = root;
        let mut depth = 0;
        loop {
            match child {
                NodeChild::Leaf(l) => {
                    if l >= self.leafs.len() {
                        warn!("point_leafnum: bad leaf {} (numleafs {})", l, self.leafs.len());
                        return None;
                    }
                    return Some(l);
                }
                NodeChild::Node(n) => {
                    depth += 1;
                    if depth > max_depth {
                        warn!("point_leafnum: exceeded depth {} at node {}", max_depth, n);
                        return None;
                    }
                    let node = self.node(n)?;
                    let d = self.planes[node.plane_idx].distance(p);
                    child = if d < 0.0 { node.children[1] } else { node.children[0] };
                }
            }
        }
    }

    pub fn point_leaf(&self, root: NodeChild, p: &Vec3, max_depth: usize) -> &CLeaf {
        match self.point_leafnum(root, p, max_depth) {
            Some(l) => &self.leafs[l],
            None => &NULL_LEAF,
        }
    }

    pub(crate) fn check_child(&self, child: NodeChild) -> Result<()> {
        match child {
            NodeChild::Node(n) => check_index("node child", n as i64, self.nodes.len()),
            NodeChild::Leaf(l) => check_index("leaf child", l as i64, self.leafs.len()),
        }
        .map(|_| ())
    }

    /// Every node has at most one parent and is reachable from a parentless
    /// head, so each walk visits a node at most once.
    fn check_node_graph(&self) -> Result<()> {
        let mut parents = vec![0u8; self.nodes.len()];
        for node in &self.nodes {
            for child in node.children {
                if let NodeChild::Node(n) = child {
                    if parents[n] == 1 {
                        return Err(CmError::SharedNode { node: n });
                    }
                    parents[n] = 1;
                }
            }
        }

        // a node on a cycle has its one parent on the cycle too, so no head reaches it
        let mut reached = vec![false; self.nodes.len()];
        let mut stack: Vec<usize> = (0..self.nodes.len()).filter(|&n| parents[n] == 0).collect();
        while let Some(n) = stack.pop() {
            reached[n] = true;
            for child in self.nodes[n].children {
                if let NodeChild::Node(c) = child {
                    stack.push(c);
                }
            }
        }
        match reached.iter().position(|&r| !r) {
            Some(node) => Err(CmError::NodeCycle { node }),
            None => Ok(()),
        }
    }

    /// Verifies every cross reference so the traversal can index freely.
    pub fn validate(&self) -> Result<()> {
        for node in &self.nodes {
            check_index("node plane", node.plane_idx as i64, self.planes.len())?;
            self.check_child(node.children[0])?;
            self.check_child(node.children[1])?;
        }
        for leaf in &self.leafs {
            if leaf.numleafbrushes > 0 {
                let last = leaf.firstleafbrush + leaf.numleafbrushes - 1;
                check_index("leafbrush", last as i64, self.leafbrushes.len())?;
            }
        }
        self.check_node_graph()?;
        for &b in &self.leafbrushes {
            check_index("brush", b as i64, self.brushes.len())?;
        }
        for brush in &self.brushes {
            if brush.numsides > 0 {
                let last = brush.firstbrushside + brush.numsides - 1;
                check_index("brushside", last as i64, self.brushsides.len())?;
            }
        }
        for side in &self.brushsides {
            check_index("brushside plane", side.plane_idx as i64, self.planes.len())?;
            if let Some(s) = side.surface_idx {
                check_index("surface", s as i64, self.surfaces.len())?;
            }
        }
        Ok(())
    }
}
