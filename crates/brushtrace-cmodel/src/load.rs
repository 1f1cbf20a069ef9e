// load.rs - IBSP version 38 reader

use brushtrace_common::q_shared::{CModel, CPlane, CSurface, SurfaceFlags, CONTENTS_SOLID};
use brushtrace_common::qfiles::*;
use log::debug;
use md4::{Digest, Md4};
use rayon::prelude::*;

use crate::bsp::{BspTree, CBrush, CBrushSide, CLeaf, CNode, NodeChild};
use crate::error::{check_index, CmError, Result};
use crate::model::MapParts;
use crate::vis::VisData;

/// Below this many records a lump is parsed sequentially.
const PARALLEL_LUMP_THRESHOLD: usize = 64;

/// MD4 of the whole file folded to 32 bits by XORing the digest words.
pub fn block_checksum(data: &[u8]) -> u32 {
    let digest = Md4::digest(data);
    digest
        .chunks_exact(4)
        .map(|w| u32::from_le_bytes([w[0], w[1], w[2], w[3]]))
        .fold(0, |acc, w| acc ^ w)
}

struct LumpReader<'a> {
    data: &'a [u8],
    lumps: [Lump; HEADER_LUMPS],
}

impl<'a> LumpReader<'a> {
    fn new(name: &str, data: &'a [u8]) -> Result<Self> {
        if data.len() < HEADER_SIZE {
            return Err(CmError::Truncated {
                name: name.to_string(),
                len: data.len(),
            });
        }
        if read_i32_le(data, 0) != IDBSPHEADER {
            return Err(CmError::BadIdent { name: name.to_string() });
        }
        let version = read_i32_le(data, 4);
        if version != BSPVERSION {
            return Err(CmError::BadVersion {
                name: name.to_string(),
                found: version,
                expected: BSPVERSION,
            });
        }

        let mut lumps = [Lump::default(); HEADER_LUMPS];
        for (i, lump) in lumps.iter_mut().enumerate() {
            lump.fileofs = read_i32_le(data, 8 + i * 8);
            lump.filelen = read_i32_le(data, 12 + i * 8);
        }
        Ok(Self { data, lumps })
    }

    fn bytes(&self, idx: usize, lump: &'static str) -> Result<&'a [u8]> {
        let l = self.lumps[idx];
        if l.fileofs < 0 || l.filelen < 0 {
            return Err(CmError::LumpOutOfBounds { lump });
        }
        let (ofs, len) = (l.fileofs as usize, l.filelen as usize);
        self.data
            .get(ofs..ofs + len)
            .ok_or(CmError::LumpOutOfBounds { lump })
    }

    /// Splits a lump into `stride`-byte records and parses each one.
    fn records<T, F>(&self, idx: usize, lump: &'static str, stride: usize, max: usize, parse: F) -> Result<Vec<T>>
    where
        T: Send,
        F: Fn(&[u8]) -> T + Sync + Send,
    {
        let bytes = self.bytes(idx, lump)?;
        if bytes.len() % stride != 0 {
            return Err(CmError::FunnyLumpSize { lump });
        }
        let count = bytes.len() / stride;
        if count > max {
            return Err(CmError::TooMany { what: lump, count, max });
        }
        let out = if count >= PARALLEL_LUMP_THRESHOLD {
            bytes.par_chunks_exact(stride).map(&parse).collect()
        } else {
            bytes.chunks_exact(stride).map(&parse).collect()
        };
        debug!("  {:<12} {:>6}", lump, count);
        Ok(out)
    }
}

fn non_empty<T>(records: Vec<T>, what: &'static str) -> Result<Vec<T>> {
    if records.is_empty() {
        return Err(CmError::Empty { what });
    }
    Ok(records)
}

fn parse_surface(r: &[u8]) -> CSurface {
    let name = &r[TEXINFO_NAME_OFS..TEXINFO_NAME_OFS + 32];
    let end = name.iter().position(|&b| b == 0).unwrap_or(name.len());
    CSurface::new(
        &String::from_utf8_lossy(&name[..end]),
        SurfaceFlags::from_bits_retain(read_i32_le(r, TEXINFO_FLAGS_OFS)),
        read_i32_le(r, TEXINFO_VALUE_OFS),
    )
}

fn parse_leaf(r: &[u8]) -> CLeaf {
    let mut leaf = CLeaf {
        contents: read_i32_le(r, 0),
        cluster: read_i16_le(r, 4) as i32,
        area: read_i16_le(r, 6) as i32,
        firstleafbrush: read_u16_le(r, 24) as usize,
        numleafbrushes: read_u16_le(r, 26) as usize,
        ..CLeaf::NULL
    };
    for j in 0..3 {
        leaf.mins[j] = read_i16_le(r, 8 + j * 2) as f32;
        leaf.maxs[j] = read_i16_le(r, 14 + j * 2) as f32;
    }
    leaf
}

fn parse_plane(r: &[u8]) -> CPlane {
    // type and signbits are recomputed, not trusted
    CPlane::new(read_vec3_le(r, 0), read_f32_le(r, 12))
}

fn parse_model(r: &[u8]) -> CModel {
    // spread the mins / maxs by a pixel
    CModel {
        mins: read_vec3_le(r, 0).map(|v| v - 1.0),
        maxs: read_vec3_le(r, 12).map(|v| v + 1.0),
        origin: read_vec3_le(r, 24),
        headnode: read_i32_le(r, 36),
    }
}

/// Decodes every lump the collision model uses and checks cross references.
pub fn parse_ibsp(name: &str, data: &[u8]) -> Result<MapParts> {
    let reader = LumpReader::new(name, data)?;
    debug!("{}: loading collision lumps", name);

    let surfaces = non_empty(
        reader.records(LUMP_TEXINFO, "surfaces", TEXINFO_SIZE, MAX_MAP_TEXINFO, parse_surface)?,
        "surfaces",
    )?;
    let leafs = non_empty(
        reader.records(LUMP_LEAFS, "leafs", DLEAF_SIZE, MAX_MAP_LEAFS, parse_leaf)?,
        "leafs",
    )?;
    if leafs[0].contents != CONTENTS_SOLID {
        return Err(CmError::LeafZeroNotSolid);
    }
    let leafbrushes = non_empty(
        reader.records(LUMP_LEAFBRUSHES, "leafbrushes", DLEAFBRUSH_SIZE, MAX_MAP_LEAFBRUSHES, |r| {
            read_u16_le(r, 0) as usize
        })?,
        "leafbrushes",
    )?;
    let planes = non_empty(
        reader.records(LUMP_PLANES, "planes", DPLANE_SIZE, MAX_MAP_PLANES, parse_plane)?,
        "planes",
    )?;

    let raw_brushes = reader.records(LUMP_BRUSHES, "brushes", DBRUSH_SIZE, MAX_MAP_BRUSHES, |r| {
        [read_i32_le(r, 0), read_i32_le(r, 4), read_i32_le(r, 8)]
    })?;
    let mut brushes = Vec::with_capacity(raw_brushes.len());
    for [firstside, numsides, contents] in raw_brushes {
        brushes.push(CBrush {
            contents,
            firstbrushside: check_index("brush firstside", firstside as i64, MAX_MAP_BRUSHSIDES)?,
            numsides: check_index("brush numsides", numsides as i64, MAX_MAP_BRUSHSIDES)?,
        });
    }

    let brushsides = reader.records(LUMP_BRUSHSIDES, "brushsides", DBRUSHSIDE_SIZE, MAX_MAP_BRUSHSIDES, |r| {
        let texinfo = read_i16_le(r, 2);
        CBrushSide {
            plane_idx: read_u16_le(r, 0) as usize,
            surface_idx: (texinfo >= 0).then_some(texinfo as usize),
        }
    })?;

    let cmodels = non_empty(
        reader.records(LUMP_MODELS, "models", DMODEL_SIZE, MAX_MAP_MODELS, parse_model)?,
        "models",
    )?;
    let nodes = non_empty(
        reader.records(LUMP_NODES, "nodes", DNODE_SIZE, MAX_MAP_NODES, |r| {
            (read_i32_le(r, 0), read_i32_le(r, 4), read_i32_le(r, 8))
        })?,
        "nodes",
    )?;
    let nodes = nodes
        .into_iter()
        .map(|(plane, front, back)| {
            Ok(CNode {
                plane_idx: check_index("node plane", plane as i64, planes.len())?,
                children: [NodeChild::from_raw(front), NodeChild::from_raw(back)],
            })
        })
        .collect::<Result<Vec<_>>>()?;

    let areas = reader.records(LUMP_AREAS, "areas", DAREA_SIZE, MAX_MAP_AREAS, |r| DArea {
        numareaportals: read_i32_le(r, 0),
        firstareaportal: read_i32_le(r, 4),
    })?;
    let areaportals = reader.records(LUMP_AREAPORTALS, "areaportals", DAREAPORTAL_SIZE, MAX_MAP_AREAPORTALS, |r| {
        DAreaPortal {
            portalnum: read_i32_le(r, 0),
            otherarea: read_i32_le(r, 4),
        }
    })?;

    let vis_lump = reader.bytes(LUMP_VISIBILITY, "visibility")?;
    if vis_lump.len() > MAX_MAP_VISIBILITY {
        return Err(CmError::TooMany {
            what: "visibility bytes",
            count: vis_lump.len(),
            max: MAX_MAP_VISIBILITY,
        });
    }
    let vis = VisData::parse(vis_lump)?;

    let ents = reader.bytes(LUMP_ENTITIES, "entities")?;
    if ents.len() > MAX_MAP_ENTSTRING {
        return Err(CmError::TooMany {
            what: "entity bytes",
            count: ents.len(),
            max: MAX_MAP_ENTSTRING,
        });
    }
    let end = ents.iter().position(|&b| b == 0).unwrap_or(ents.len());
    let entity_string = String::from_utf8_lossy(&ents[..end]).into_owned();

    let tree = BspTree {
        planes,
        nodes,
        leafs,
        leafbrushes,
        brushes,
        brushsides,
        surfaces,
    };
    tree.validate()?;

    let numareas = areas.len().max(1);
    for leaf in &tree.leafs {
        check_index("leaf area", leaf.area as i64, numareas)?;
    }
    for model in &cmodels {
        tree.check_child(NodeChild::from_raw(model.headnode))?;
    }

    debug!(
        "{}: {} planes, {} nodes, {} leafs, {} brushes, {} models, {} areas, {} clusters of vis",
        name,
        tree.planes.len(),
        tree.nodes.len(),
        tree.leafs.len(),
        tree.brushes.len(),
        cmodels.len(),
        areas.len(),
        vis.num_clusters()
    );

    Ok(MapParts {
        tree,
        cmodels,
        areas,
        areaportals,
        vis,
        entity_string,
    })
}
