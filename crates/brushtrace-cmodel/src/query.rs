// query.rs - box-to-leaf enumeration and trace merging for entity clipping

use brushtrace_common::q_shared::{box_on_plane_side, Trace, Vec3};
use log::warn;

use crate::bsp::{BspTree, NodeChild};

/// Leaves touched by a box, in tree order.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BoxLeafs {
    pub leafs: Vec<usize>,
    /// First node where the box straddled the plane; `None` if it never split.
    pub top_node: Option<usize>,
    /// The leaf list hit its limit and is incomplete.
    pub overflowed: bool,
}

struct LeafGather<'a> {
    tree: &'a BspTree,
    mins: Vec3,
    maxs: Vec3,
    max_count: usize,
    max_depth: usize,
    /// Node visits left; a valid tree never needs more than one per node.
    budget: usize,
    stalled: bool,
    out: BoxLeafs,
}

impl LeafGather<'_> {
    fn walk(&mut self, mut child: NodeChild, mut depth: usize) {
        loop {
            let nodenum = match child {
                NodeChild::Leaf(l) => {
                    if self.out.leafs.len() >= self.max_count {
                        self.out.overflowed = true;
                        return;
                    }
                    self.out.leafs.push(l);
                    return;
                }
                NodeChild::Node(n) => n,
            };
            depth += 1;
            if depth > self.max_depth {
                warn!("box_leafnums: exceeded depth {} at node {}", self.max_depth, nodenum);
                return;
            }
            if self.budget == 0 {
                if !self.stalled {
                    warn!("box_leafnums: node {} revisited, node graph has a cycle", nodenum);
                    self.stalled = true;
                }
                return;
            }
            self.budget -= 1;
            let Some(node) = self.tree.node(nodenum) else {
                return;
            };
            let plane = self.tree.plane(node.plane_idx);
            match box_on_plane_side(&self.mins, &self.maxs, plane) {
                1 => child = node.children[0],
                2 => child = node.children[1],
                _ => {
                    // go down both
                    if self.out.top_node.is_none() {
                        self.out.top_node = Some(nodenum);
                    }
                    self.walk(node.children[0], depth);
                    child = node.children[1];
                }
            }
        }
    }
}

/// Collects up to `max_count` leaves under `root` that the box touches.
pub fn box_leafnums(
    tree: &BspTree,
    root: NodeChild,
    mins: &Vec3,
    maxs: &Vec3,
    max_count: usize,
    max_depth: usize,
) -> BoxLeafs {
    let mut gather = LeafGather {
        tree,
        mins: *mins,
        maxs: *maxs,
        max_count,
        max_depth,
        budget: tree.nodes.len(),
        stalled: false,
        out: BoxLeafs::default(),
    };
    gather.walk(root, 0);
    gather.out
}

/// Folds one entity's trace into the running result of a multi-entity clip.
///
/// Solid flags accumulate; a strictly nearer hit replaces the result and
/// records `ent`.
pub fn merge_clip(running: &mut Trace, candidate: &Trace, ent: usize) {
    let startsolid = running.startsolid || candidate.startsolid;
    let allsolid = running.allsolid || candidate.allsolid;
    if candidate.fraction < running.fraction {
        *running = *candidate;
        running.ent = Some(ent);
    }
    running.startsolid = startsolid;
    running.allsolid = allsolid;
    if running.allsolid {
        running.startsolid = true;
        running.fraction = 0.0;
        if running.ent.is_none() {
            running.ent = Some(ent);
        }
    }
}
