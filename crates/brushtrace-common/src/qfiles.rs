// qfiles.rs - IBSP (version 38) on-disk layout

// ============================================================
// BSP file format
// ============================================================

/// BSP magic: "IBSP" in little-endian
pub const IDBSPHEADER: i32 =
    (b'P' as i32) << 24 | (b'S' as i32) << 16 | (b'B' as i32) << 8 | b'I' as i32;
pub const BSPVERSION: i32 = 38;

// upper design bounds
pub const MAX_MAP_MODELS: usize = 1024;
pub const MAX_MAP_BRUSHES: usize = 8192;
pub const MAX_MAP_ENTSTRING: usize = 0x40000;
pub const MAX_MAP_TEXINFO: usize = 8192;
pub const MAX_MAP_AREAS: usize = 256;
pub const MAX_MAP_AREAPORTALS: usize = 1024;
pub const MAX_MAP_PLANES: usize = 65536;
pub const MAX_MAP_NODES: usize = 65536;
pub const MAX_MAP_BRUSHSIDES: usize = 65536;
pub const MAX_MAP_LEAFS: usize = 65536;
pub const MAX_MAP_LEAFBRUSHES: usize = 65536;
pub const MAX_MAP_VISIBILITY: usize = 0x100000;

// ============================================================
// Lumps
// ============================================================

pub const LUMP_ENTITIES: usize = 0;
pub const LUMP_PLANES: usize = 1;
pub const LUMP_VERTEXES: usize = 2;
pub const LUMP_VISIBILITY: usize = 3;
pub const LUMP_NODES: usize = 4;
pub const LUMP_TEXINFO: usize = 5;
pub const LUMP_FACES: usize = 6;
pub const LUMP_LIGHTING: usize = 7;
pub const LUMP_LEAFS: usize = 8;
pub const LUMP_LEAFFACES: usize = 9;
pub const LUMP_LEAFBRUSHES: usize = 10;
pub const LUMP_EDGES: usize = 11;
pub const LUMP_SURFEDGES: usize = 12;
pub const LUMP_MODELS: usize = 13;
pub const LUMP_BRUSHES: usize = 14;
pub const LUMP_BRUSHSIDES: usize = 15;
pub const LUMP_POP: usize = 16;
pub const LUMP_AREAS: usize = 17;
pub const LUMP_AREAPORTALS: usize = 18;
pub const HEADER_LUMPS: usize = 19;

/// ident + version + lump directory
pub const HEADER_SIZE: usize = 8 + HEADER_LUMPS * 8;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Lump {
    pub fileofs: i32,
    pub filelen: i32,
}

// ============================================================
// Record sizes (bytes, little-endian, packed)
// ============================================================

/// mins[3], maxs[3], origin[3] (f32), headnode, firstface, numfaces (i32)
pub const DMODEL_SIZE: usize = 48;
/// normal[3], dist (f32), type (i32)
pub const DPLANE_SIZE: usize = 20;
/// planenum, children[2] (i32), mins[3], maxs[3] (i16), firstface, numfaces (u16)
pub const DNODE_SIZE: usize = 28;
/// vecs[2][4] (f32), flags, value (i32), texture[32], nexttexinfo (i32)
pub const TEXINFO_SIZE: usize = 76;
/// contents (i32), cluster, area (i16), mins[3], maxs[3] (i16),
/// firstleafface, numleaffaces, firstleafbrush, numleafbrushes (u16)
pub const DLEAF_SIZE: usize = 28;
/// planenum (u16), texinfo (i16)
pub const DBRUSHSIDE_SIZE: usize = 4;
/// firstside, numsides, contents (i32)
pub const DBRUSH_SIZE: usize = 12;
pub const DLEAFBRUSH_SIZE: usize = 2;
/// numareaportals, firstareaportal (i32)
pub const DAREA_SIZE: usize = 8;
/// portalnum, otherarea (i32)
pub const DAREAPORTAL_SIZE: usize = 8;

pub const TEXINFO_FLAGS_OFS: usize = 32;
pub const TEXINFO_VALUE_OFS: usize = 36;
pub const TEXINFO_NAME_OFS: usize = 40;

// ============================================================
// Visibility
// ============================================================

pub const DVIS_PVS: usize = 0;
pub const DVIS_PHS: usize = 1;

// ============================================================
// Areas
// ============================================================

/// Each area has a list of portals that lead into other areas.
/// When portals are closed, other areas may not be visible or
/// hearable even if the vis info says that it should be.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DAreaPortal {
    pub portalnum: i32,
    pub otherarea: i32,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DArea {
    pub numareaportals: i32,
    pub firstareaportal: i32,
}

// ============================================================
// Little-endian field readers
// ============================================================

#[inline]
pub fn read_i32_le(buf: &[u8], ofs: usize) -> i32 {
    i32::from_le_bytes([buf[ofs], buf[ofs + 1], buf[ofs + 2], buf[ofs + 3]])
}

#[inline]
pub fn read_u16_le(buf: &[u8], ofs: usize) -> u16 {
    u16::from_le_bytes([buf[ofs], buf[ofs + 1]])
}

#[inline]
pub fn read_i16_le(buf: &[u8], ofs: usize) -> i16 {
    i16::from_le_bytes([buf[ofs], buf[ofs + 1]])
}

#[inline]
pub fn read_f32_le(buf: &[u8], ofs: usize) -> f32 {
    f32::from_le_bytes([buf[ofs], buf[ofs + 1], buf[ofs + 2], buf[ofs + 3]])
}

#[inline]
pub fn read_vec3_le(buf: &[u8], ofs: usize) -> [f32; 3] {
    [
        read_f32_le(buf, ofs),
        read_f32_le(buf, ofs + 4),
        read_f32_le(buf, ofs + 8),
    ]
}
