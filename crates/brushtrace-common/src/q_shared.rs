// q_shared.rs - math, planes, surfaces and trace results shared by the collision crates

// ============================================================
// Basic types
// ============================================================

pub type Vec3 = [f32; 3];

/// Row-major 3x3 matrix. Rows are the local axes expressed in world space.
pub type Mat3 = [Vec3; 3];

pub const PITCH: usize = 0;
pub const YAW: usize = 1;
pub const ROLL: usize = 2;

pub const VEC3_ORIGIN: Vec3 = [0.0; 3];

// ============================================================
// Contents flags
// ============================================================

// lower bits are stronger, and will eat weaker brushes completely
pub const CONTENTS_SOLID: i32 = 1;
pub const CONTENTS_WINDOW: i32 = 2;
pub const CONTENTS_AUX: i32 = 4;
pub const CONTENTS_LAVA: i32 = 8;
pub const CONTENTS_SLIME: i32 = 16;
pub const CONTENTS_WATER: i32 = 32;
pub const CONTENTS_MIST: i32 = 64;
pub const LAST_VISIBLE_CONTENTS: i32 = 64;

// remaining contents are non-visible, and don't eat brushes
pub const CONTENTS_AREAPORTAL: i32 = 0x8000;
pub const CONTENTS_PLAYERCLIP: i32 = 0x10000;
pub const CONTENTS_MONSTERCLIP: i32 = 0x20000;

pub const CONTENTS_CURRENT_0: i32 = 0x40000;
pub const CONTENTS_CURRENT_90: i32 = 0x80000;
pub const CONTENTS_CURRENT_180: i32 = 0x100000;
pub const CONTENTS_CURRENT_270: i32 = 0x200000;
pub const CONTENTS_CURRENT_UP: i32 = 0x400000;
pub const CONTENTS_CURRENT_DOWN: i32 = 0x800000;

pub const CONTENTS_ORIGIN: i32 = 0x1000000;
pub const CONTENTS_MONSTER: i32 = 0x2000000;
pub const CONTENTS_DEADMONSTER: i32 = 0x4000000;
pub const CONTENTS_DETAIL: i32 = 0x8000000;
pub const CONTENTS_TRANSLUCENT: i32 = 0x10000000;
pub const CONTENTS_LADDER: i32 = 0x20000000;

// ============================================================
// Content masks
// ============================================================

pub const MASK_ALL: i32 = -1;
pub const MASK_SOLID: i32 = CONTENTS_SOLID | CONTENTS_WINDOW;
pub const MASK_PLAYERSOLID: i32 =
    CONTENTS_SOLID | CONTENTS_PLAYERCLIP | CONTENTS_WINDOW | CONTENTS_MONSTER;
pub const MASK_DEADSOLID: i32 = CONTENTS_SOLID | CONTENTS_PLAYERCLIP | CONTENTS_WINDOW;
pub const MASK_MONSTERSOLID: i32 =
    CONTENTS_SOLID | CONTENTS_MONSTERCLIP | CONTENTS_WINDOW | CONTENTS_MONSTER;
pub const MASK_WATER: i32 = CONTENTS_WATER | CONTENTS_LAVA | CONTENTS_SLIME;
pub const MASK_OPAQUE: i32 = CONTENTS_SOLID | CONTENTS_SLIME | CONTENTS_LAVA;
pub const MASK_SHOT: i32 =
    CONTENTS_SOLID | CONTENTS_MONSTER | CONTENTS_WINDOW | CONTENTS_DEADMONSTER;
pub const MASK_CURRENT: i32 = CONTENTS_CURRENT_0
    | CONTENTS_CURRENT_90
    | CONTENTS_CURRENT_180
    | CONTENTS_CURRENT_270
    | CONTENTS_CURRENT_UP
    | CONTENTS_CURRENT_DOWN;

// ============================================================
// Surface flags
// ============================================================

bitflags::bitflags! {
    /// Texinfo flags carried on brush sides. Only metadata callers need
    /// after a hit (sky, slick, ...).
    #[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
    pub struct SurfaceFlags: i32 {
        const LIGHT = 0x1;
        const SLICK = 0x2;
        const SKY = 0x4;
        const WARP = 0x8;
        const TRANS33 = 0x10;
        const TRANS66 = 0x20;
        const FLOWING = 0x40;
        const NODRAW = 0x80;
    }
}

// ============================================================
// Plane
// ============================================================

pub const PLANE_X: u8 = 0;
pub const PLANE_Y: u8 = 1;
pub const PLANE_Z: u8 = 2;
pub const PLANE_NON_AXIAL: u8 = 3;

#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct CPlane {
    pub normal: Vec3,
    pub dist: f32,
    pub plane_type: u8,
    pub signbits: u8,
}

impl CPlane {
    /// Builds a plane with `plane_type` and `signbits` derived from the normal.
    pub fn new(normal: Vec3, dist: f32) -> Self {
        Self {
            normal,
            dist,
            plane_type: plane_type_for_normal(&normal),
            signbits: signbits_for_normal(&normal),
        }
    }

    /// Re-derives the cached classification after the normal was edited in place.
    pub fn update_classification(&mut self) {
        self.plane_type = plane_type_for_normal(&self.normal);
        self.signbits = signbits_for_normal(&self.normal);
    }

    #[inline]
    pub fn is_axial(&self) -> bool {
        self.plane_type < PLANE_NON_AXIAL
    }

    /// Signed distance of `p` from the plane.
    #[inline]
    pub fn distance(&self, p: &Vec3) -> f32 {
        if self.is_axial() {
            p[self.plane_type as usize] - self.dist
        } else {
            dot_product(&self.normal, p) - self.dist
        }
    }
}

/// Only exact positive unit axes are axial; the fast paths index the
/// coordinate directly and would flip sign for a negative axis.
///
/// A normal of `-X`, `-Y` or `-Z` is [`PLANE_NON_AXIAL`] even though it is
/// axis-aligned. The BSP compiler never emits one for a node plane, and
/// brush sides that face down an axis go through the dot product path.
pub fn plane_type_for_normal(normal: &Vec3) -> u8 {
    match *normal {
        [x, y, z] if x == 1.0 && y == 0.0 && z == 0.0 => PLANE_X,
        [x, y, z] if x == 0.0 && y == 1.0 && z == 0.0 => PLANE_Y,
        [x, y, z] if x == 0.0 && y == 0.0 && z == 1.0 => PLANE_Z,
        _ => PLANE_NON_AXIAL,
    }
}

#[inline]
pub fn signbits_for_normal(normal: &Vec3) -> u8 {
    let mut bits = 0u8;
    for (j, n) in normal.iter().enumerate() {
        if *n < 0.0 {
            bits |= 1 << j;
        }
    }
    bits
}

// ============================================================
// Collision model / surface
// ============================================================

/// Inline (brush) model record: bounds, origin and head node in the map tree.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct CModel {
    pub mins: Vec3,
    pub maxs: Vec3,
    pub origin: Vec3,
    pub headnode: i32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct CSurface {
    pub name: [u8; 16],
    pub flags: SurfaceFlags,
    pub value: i32,
}

impl CSurface {
    pub fn new(name: &str, flags: SurfaceFlags, value: i32) -> Self {
        let mut buf = [0u8; 16];
        let bytes = name.as_bytes();
        let n = bytes.len().min(buf.len() - 1);
        buf[..n].copy_from_slice(&bytes[..n]);
        Self {
            name: buf,
            flags,
            value,
        }
    }

    /// Texture name up to the first NUL.
    pub fn name(&self) -> &str {
        let end = self.name.iter().position(|&b| b == 0).unwrap_or(self.name.len());
        std::str::from_utf8(&self.name[..end]).unwrap_or("")
    }

    /// The sentinel surface has no name and no flags.
    pub fn is_null(&self) -> bool {
        self.name[0] == 0 && self.flags.is_empty() && self.value == 0
    }
}

// ============================================================
// Trace
// ============================================================

/// Result of a sweep or position test.
///
/// `fraction` is 1.0 when nothing was hit. `ent` is never set by the
/// collision model itself; entity clippers attach it when merging.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Trace {
    /// The whole trace is inside solid; `fraction` is 0.
    pub allsolid: bool,
    /// The trace started inside solid.
    pub startsolid: bool,
    pub fraction: f32,
    pub endpos: Vec3,
    pub plane: CPlane,
    pub surface: CSurface,
    pub contents: i32,
    pub ent: Option<usize>,
}

impl Default for Trace {
    fn default() -> Self {
        Self {
            allsolid: false,
            startsolid: false,
            fraction: 1.0,
            endpos: [0.0; 3],
            plane: CPlane::default(),
            surface: CSurface::default(),
            contents: 0,
            ent: None,
        }
    }
}

impl Trace {
    #[inline]
    pub fn hit(&self) -> bool {
        self.fraction < 1.0
    }
}

// ============================================================
// MATHLIB - vector operations
// ============================================================

#[inline]
pub fn dot_product(a: &Vec3, b: &Vec3) -> f32 {
    a[0] * b[0] + a[1] * b[1] + a[2] * b[2]
}

#[inline]
pub fn vector_subtract(a: &Vec3, b: &Vec3) -> Vec3 {
    [a[0] - b[0], a[1] - b[1], a[2] - b[2]]
}

#[inline]
pub fn vector_add(a: &Vec3, b: &Vec3) -> Vec3 {
    [a[0] + b[0], a[1] + b[1], a[2] + b[2]]
}

/// `veca + scale * vecb`
#[inline]
pub fn vector_ma(veca: &Vec3, scale: f32, vecb: &Vec3) -> Vec3 {
    [
        veca[0] + scale * vecb[0],
        veca[1] + scale * vecb[1],
        veca[2] + scale * vecb[2],
    ]
}

#[inline]
pub fn vector_scale(v: &Vec3, scale: f32) -> Vec3 {
    [v[0] * scale, v[1] * scale, v[2] * scale]
}

#[inline]
pub fn vector_negate(v: &Vec3) -> Vec3 {
    [-v[0], -v[1], -v[2]]
}

/// Linear interpolation between `a` and `b`.
#[inline]
pub fn vector_lerp(a: &Vec3, b: &Vec3, frac: f32) -> Vec3 {
    [
        a[0] + frac * (b[0] - a[0]),
        a[1] + frac * (b[1] - a[1]),
        a[2] + frac * (b[2] - a[2]),
    ]
}

#[inline]
pub fn vector_compare(v1: &Vec3, v2: &Vec3) -> bool {
    v1[0] == v2[0] && v1[1] == v2[1] && v1[2] == v2[2]
}

#[inline]
pub fn vector_length_squared(v: &Vec3) -> f32 {
    dot_product(v, v)
}

#[inline]
pub fn vector_length(v: &Vec3) -> f32 {
    vector_length_squared(v).sqrt()
}

#[inline]
pub fn distance_squared(a: &Vec3, b: &Vec3) -> f32 {
    vector_length_squared(&vector_subtract(a, b))
}

/// Normalizes in place and returns the original length. A zero vector is left alone.
pub fn vector_normalize(v: &mut Vec3) -> f32 {
    let length = vector_length(v);
    if length != 0.0 {
        let ilength = 1.0 / length;
        v[0] *= ilength;
        v[1] *= ilength;
        v[2] *= ilength;
    }
    length
}

#[inline]
pub fn cross_product(v1: &Vec3, v2: &Vec3) -> Vec3 {
    [
        v1[1] * v2[2] - v1[2] * v2[1],
        v1[2] * v2[0] - v1[0] * v2[2],
        v1[0] * v2[1] - v1[1] * v2[0],
    ]
}

// ============================================================
// Angle functions
// ============================================================

/// Returns (forward, right, up) for Euler angles in degrees.
pub fn angle_vectors(angles: &Vec3) -> (Vec3, Vec3, Vec3) {
    let (sy, cy) = angles[YAW].to_radians().sin_cos();
    let (sp, cp) = angles[PITCH].to_radians().sin_cos();
    let (sr, cr) = angles[ROLL].to_radians().sin_cos();

    let forward = [cp * cy, cp * sy, -sp];
    let right = [
        -sr * sp * cy + cr * sy,
        -sr * sp * sy - cr * cy,
        -sr * cp,
    ];
    let up = [cr * sp * cy + sr * sy, cr * sp * sy - sr * cy, cr * cp];
    (forward, right, up)
}

/// Rotation taking world-space vectors into the frame described by `angles`.
/// The rows are forward, left and up, so the result is a proper rotation.
pub fn create_rotation_matrix(angles: &Vec3) -> Mat3 {
    let (forward, right, up) = angle_vectors(angles);
    [forward, vector_negate(&right), up]
}

pub fn transpose_matrix(m: &Mat3) -> Mat3 {
    [
        [m[0][0], m[1][0], m[2][0]],
        [m[0][1], m[1][1], m[2][1]],
        [m[0][2], m[1][2], m[2][2]],
    ]
}

#[inline]
pub fn rotate_point(m: &Mat3, p: &Vec3) -> Vec3 {
    [dot_product(&m[0], p), dot_product(&m[1], p), dot_product(&m[2], p)]
}

// ============================================================
// Box vs plane
// ============================================================

/// Returns 1 (front), 2 (back), or 3 (crossing) for a box vs. plane test.
pub fn box_on_plane_side(emins: &Vec3, emaxs: &Vec3, p: &CPlane) -> i32 {
    if p.is_axial() {
        let t = p.plane_type as usize;
        if p.dist <= emins[t] {
            return 1;
        }
        if p.dist >= emaxs[t] {
            return 2;
        }
        return 3;
    }

    // corner furthest along the normal and the one furthest against it
    let mut near = [0.0f32; 3];
    let mut far = [0.0f32; 3];
    for i in 0..3 {
        if p.signbits & (1 << i) != 0 {
            far[i] = emins[i];
            near[i] = emaxs[i];
        } else {
            far[i] = emaxs[i];
            near[i] = emins[i];
        }
    }
    let dist1 = dot_product(&p.normal, &far);
    let dist2 = dot_product(&p.normal, &near);

    let mut sides = 0;
    if dist1 >= p.dist {
        sides = 1;
    }
    if dist2 < p.dist {
        sides |= 2;
    }
    sides
}
