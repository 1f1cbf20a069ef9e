// testmap.rs - hand-built maps for the unit tests

use brushtrace_common::q_shared::{
    CModel, CPlane, CSurface, SurfaceFlags, Vec3, CONTENTS_SOLID, CONTENTS_WATER,
};
use brushtrace_common::qfiles::*;

use crate::bsp::{BspTree, CBrush, CBrushSide, CLeaf, CNode, NodeChild};
use crate::model::MapParts;
use crate::vis::VisData;

fn empty_leaf(cluster: i32, area: i32) -> CLeaf {
    CLeaf {
        contents: 0,
        cluster,
        area,
        mins: [-512.0, -512.0, 0.0],
        maxs: [512.0, 512.0, 512.0],
        ..CLeaf::NULL
    }
}

fn solid_leaf(firstleafbrush: usize) -> CLeaf {
    CLeaf {
        contents: CONTENTS_SOLID,
        cluster: -1,
        area: 0,
        mins: [-512.0, -512.0, -64.0],
        maxs: [512.0, 512.0, 0.0],
        firstleafbrush,
        numleafbrushes: 1,
    }
}

/// One plane at z = 0 splitting empty space above from a single-sided
/// solid brush below.
pub(crate) fn floor_tree() -> BspTree {
    BspTree {
        planes: vec![CPlane::new([0.0, 0.0, 1.0], 0.0)],
        nodes: vec![CNode {
            plane_idx: 0,
            children: [NodeChild::Leaf(1), NodeChild::Leaf(0)],
        }],
        leafs: vec![solid_leaf(0), empty_leaf(0, 1)],
        leafbrushes: vec![0],
        brushes: vec![CBrush {
            contents: CONTENTS_SOLID,
            firstbrushside: 0,
            numsides: 1,
        }],
        brushsides: vec![CBrushSide {
            plane_idx: 0,
            surface_idx: Some(0),
        }],
        surfaces: vec![CSurface::new("floor", SurfaceFlags::SLICK, 0)],
    }
}

/// A 1024x1024x64 slab under z = 0, with the tree split at x = 0 first so
/// the slab brush sits in two leaves.
///
/// ```text
///            node 0 (x = 0)
///          front /      \ back
///     node 1 (z = 0)    node 2 (z = 0)
///     /      \          /      \
///  leaf 1  leaf 0    leaf 2  leaf 3
///  empty   slab      empty   slab
/// ```
pub(crate) fn slab_tree() -> BspTree {
    let planes = vec![
        CPlane::new([1.0, 0.0, 0.0], 0.0),
        CPlane::new([0.0, 0.0, 1.0], 0.0),
        CPlane::new([1.0, 0.0, 0.0], 512.0),
        CPlane::new([-1.0, 0.0, 0.0], 512.0),
        CPlane::new([0.0, 1.0, 0.0], 512.0),
        CPlane::new([0.0, -1.0, 0.0], 512.0),
        CPlane::new([0.0, 0.0, -1.0], 64.0),
    ];
    let nodes = vec![
        CNode {
            plane_idx: 0,
            children: [NodeChild::Node(1), NodeChild::Node(2)],
        },
        CNode {
            plane_idx: 1,
            children: [NodeChild::Leaf(1), NodeChild::Leaf(0)],
        },
        CNode {
            plane_idx: 1,
            children: [NodeChild::Leaf(2), NodeChild::Leaf(3)],
        },
    ];
    let brushsides = [1, 2, 3, 4, 5, 6]
        .into_iter()
        .map(|plane_idx| CBrushSide {
            plane_idx,
            surface_idx: (plane_idx == 1).then_some(0),
        })
        .collect();

    BspTree {
        planes,
        nodes,
        leafs: vec![solid_leaf(0), empty_leaf(0, 1), empty_leaf(1, 2), solid_leaf(1)],
        leafbrushes: vec![0, 0],
        brushes: vec![CBrush {
            contents: CONTENTS_SOLID,
            firstbrushside: 0,
            numsides: 6,
        }],
        brushsides,
        surfaces: vec![CSurface::new("floor", SurfaceFlags::empty(), 0)],
    }
}

/// Solid behind a vertical wall through the origin facing (-1, -1, 0).
pub(crate) fn diagonal_wall_tree() -> BspTree {
    let n = -std::f32::consts::FRAC_1_SQRT_2;
    let mut tree = floor_tree();
    tree.planes = vec![CPlane::new([n, n, 0.0], 0.0)];
    tree.brushsides[0].surface_idx = None;
    tree.surfaces.clear();
    tree
}

/// Areas 1 and 2 joined by portal 0; area 0 unused.
pub(crate) fn two_room_areas() -> (Vec<DArea>, Vec<DAreaPortal>) {
    let areas = vec![
        DArea::default(),
        DArea { numareaportals: 1, firstareaportal: 0 },
        DArea { numareaportals: 1, firstareaportal: 1 },
    ];
    let portals = vec![
        DAreaPortal { portalnum: 0, otherarea: 2 },
        DAreaPortal { portalnum: 0, otherarea: 1 },
    ];
    (areas, portals)
}

/// Chain 1 -p0- 2 -p3- 3 -p1- 4; portal 3 is the only link between halves.
pub(crate) fn portal_three_areas() -> (Vec<DArea>, Vec<DAreaPortal>) {
    let areas = vec![
        DArea::default(),
        DArea { numareaportals: 1, firstareaportal: 0 },
        DArea { numareaportals: 2, firstareaportal: 1 },
        DArea { numareaportals: 2, firstareaportal: 3 },
        DArea { numareaportals: 1, firstareaportal: 5 },
    ];
    let portals = vec![
        DAreaPortal { portalnum: 0, otherarea: 2 },
        DAreaPortal { portalnum: 0, otherarea: 1 },
        DAreaPortal { portalnum: 3, otherarea: 3 },
        DAreaPortal { portalnum: 3, otherarea: 2 },
        DAreaPortal { portalnum: 1, otherarea: 4 },
        DAreaPortal { portalnum: 1, otherarea: 3 },
    ];
    (areas, portals)
}

/// Cluster 0 sees only itself, cluster 1 sees both; both hear both.
pub(crate) fn two_cluster_vis() -> VisData {
    VisData::from_rows(&[vec![0b01], vec![0b11]], &[vec![0b11], vec![0b11]])
}

/// The slab map plus inline model 1: a 32 unit water cube centred on its
/// own origin, reached through node 3.
pub(crate) fn slab_parts() -> MapParts {
    let mut tree = slab_tree();

    let first_plane = tree.planes.len();
    for axis in 0..3 {
        let mut normal = [0.0; 3];
        normal[axis] = 1.0;
        tree.planes.push(CPlane::new(normal, 16.0));
        normal[axis] = -1.0;
        tree.planes.push(CPlane::new(normal, 16.0));
    }
    // +z face is the split plane of the model's only node
    tree.nodes.push(CNode {
        plane_idx: first_plane + 4,
        children: [NodeChild::Leaf(4), NodeChild::Leaf(5)],
    });
    tree.leafs.push(CLeaf {
        contents: 0,
        cluster: -1,
        area: 0,
        mins: [-16.0, -16.0, 16.0],
        maxs: [16.0, 16.0, 16.0],
        ..CLeaf::NULL
    });
    tree.leafs.push(CLeaf {
        contents: CONTENTS_WATER,
        cluster: -1,
        area: 0,
        mins: [-16.0; 3],
        maxs: [16.0; 3],
        firstleafbrush: tree.leafbrushes.len(),
        numleafbrushes: 1,
    });
    tree.leafbrushes.push(tree.brushes.len());
    tree.brushes.push(CBrush {
        contents: CONTENTS_WATER,
        firstbrushside: tree.brushsides.len(),
        numsides: 6,
    });
    for i in 0..6 {
        tree.brushsides.push(CBrushSide {
            plane_idx: first_plane + i,
            surface_idx: None,
        });
    }

    let (areas, areaportals) = two_room_areas();
    MapParts {
        tree,
        cmodels: vec![
            CModel {
                mins: [-512.0, -512.0, -64.0],
                maxs: [512.0, 512.0, 512.0],
                origin: [0.0; 3],
                headnode: 0,
            },
            CModel {
                mins: [-16.0; 3],
                maxs: [16.0; 3],
                origin: [0.0; 3],
                headnode: 3,
            },
        ],
        areas,
        areaportals,
        vis: two_cluster_vis(),
        entity_string: "{\n\"classname\" \"worldspawn\"\n}\n".to_string(),
    }
}

// ============================================================
// IBSP writer
// ============================================================

fn put_i32(out: &mut Vec<u8>, v: i32) {
    out.extend_from_slice(&v.to_le_bytes());
}

fn put_f32(out: &mut Vec<u8>, v: f32) {
    out.extend_from_slice(&v.to_le_bytes());
}

fn put_vec3(out: &mut Vec<u8>, v: &Vec3) {
    v.iter().for_each(|&f| put_f32(out, f));
}

fn put_i16(out: &mut Vec<u8>, v: i16) {
    out.extend_from_slice(&v.to_le_bytes());
}

fn put_u16(out: &mut Vec<u8>, v: u16) {
    out.extend_from_slice(&v.to_le_bytes());
}

/// Serializes `parts` as an IBSP version 38 file. Submodel bounds are
/// shrunk by one unit to undo the widening done by the loader.
pub(crate) fn ibsp_image(parts: &MapParts) -> Vec<u8> {
    let tree = &parts.tree;
    let mut lumps: Vec<Vec<u8>> = vec![Vec::new(); HEADER_LUMPS];

    lumps[LUMP_ENTITIES] = parts.entity_string.as_bytes().to_vec();

    let out = &mut lumps[LUMP_PLANES];
    for p in &tree.planes {
        put_vec3(out, &p.normal);
        put_f32(out, p.dist);
        put_i32(out, p.plane_type as i32);
    }

    lumps[LUMP_VISIBILITY] = parts.vis.as_bytes().to_vec();

    let out = &mut lumps[LUMP_NODES];
    for n in &tree.nodes {
        put_i32(out, n.plane_idx as i32);
        put_i32(out, n.children[0].to_raw());
        put_i32(out, n.children[1].to_raw());
        for _ in 0..6 {
            put_i16(out, 0);
        }
        put_u16(out, 0);
        put_u16(out, 0);
    }

    let out = &mut lumps[LUMP_TEXINFO];
    for s in &tree.surfaces {
        for _ in 0..8 {
            put_f32(out, 0.0);
        }
        put_i32(out, s.flags.bits());
        put_i32(out, s.value);
        let mut name = [0u8; 32];
        name[..16].copy_from_slice(&s.name);
        out.extend_from_slice(&name);
        put_i32(out, -1);
    }

    let out = &mut lumps[LUMP_LEAFS];
    for l in &tree.leafs {
        put_i32(out, l.contents);
        put_i16(out, l.cluster as i16);
        put_i16(out, l.area as i16);
        l.mins.iter().for_each(|&v| put_i16(out, v as i16));
        l.maxs.iter().for_each(|&v| put_i16(out, v as i16));
        put_u16(out, 0);
        put_u16(out, 0);
        put_u16(out, l.firstleafbrush as u16);
        put_u16(out, l.numleafbrushes as u16);
    }

    let out = &mut lumps[LUMP_LEAFBRUSHES];
    tree.leafbrushes.iter().for_each(|&b| put_u16(out, b as u16));

    let out = &mut lumps[LUMP_MODELS];
    for m in &parts.cmodels {
        put_vec3(out, &m.mins.map(|v| v + 1.0));
        put_vec3(out, &m.maxs.map(|v| v - 1.0));
        put_vec3(out, &m.origin);
        put_i32(out, m.headnode);
        put_i32(out, 0);
        put_i32(out, 0);
    }

    let out = &mut lumps[LUMP_BRUSHES];
    for b in &tree.brushes {
        put_i32(out, b.firstbrushside as i32);
        put_i32(out, b.numsides as i32);
        put_i32(out, b.contents);
    }

    let out = &mut lumps[LUMP_BRUSHSIDES];
    for s in &tree.brushsides {
        put_u16(out, s.plane_idx as u16);
        put_i16(out, s.surface_idx.map_or(-1, |i| i as i16));
    }

    let out = &mut lumps[LUMP_AREAS];
    for a in &parts.areas {
        put_i32(out, a.numareaportals);
        put_i32(out, a.firstareaportal);
    }

    let out = &mut lumps[LUMP_AREAPORTALS];
    for p in &parts.areaportals {
        put_i32(out, p.portalnum);
        put_i32(out, p.otherarea);
    }

    let mut file = Vec::new();
    put_i32(&mut file, IDBSPHEADER);
    put_i32(&mut file, BSPVERSION);
    let mut ofs = HEADER_SIZE;
    for lump in &lumps {
        put_i32(&mut file, ofs as i32);
        put_i32(&mut file, lump.len() as i32);
        ofs += lump.len();
    }
    for lump in &lumps {
        file.extend_from_slice(lump);
    }
    file
}
