// capsule.rs - analytic sphere, cylinder and pill math for round hulls

use brushtrace_common::q_shared::{
    distance_squared, dot_product, vector_length_squared, vector_ma, vector_normalize,
    vector_subtract, Vec3,
};

/// Skin added around spheres and cylinders when solving for the contact.
pub const RADIUS_EPSILON: f32 = 1.0;
/// An end point closer than this to a round surface still gets resolved.
pub const SURFACE_CLIP_EPSILON: f32 = 0.125;

const PARALLEL_EPSILON: f32 = 1e-6;

/// Outcome of sweeping a point against a round solid.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum RoundContact {
    /// The segment starts inside; `allsolid` when it also ends inside.
    Embedded { allsolid: bool },
    /// First touch at `fraction`, with the outward surface normal there.
    Hit {
        fraction: f32,
        normal: Vec3,
        point: Vec3,
    },
}

/// Squared distance from `p` to the infinite line through `start` along unit `dir`.
pub fn distance_from_line_squared(p: &Vec3, start: &Vec3, dir: &Vec3) -> f32 {
    let along = dot_product(&vector_subtract(p, start), dir);
    let proj = vector_ma(start, along, dir);
    distance_squared(p, &proj)
}

pub fn point_segment_distance_squared(p: &Vec3, a: &Vec3, b: &Vec3) -> f32 {
    let ab = vector_subtract(b, a);
    let len2 = vector_length_squared(&ab);
    if len2 <= PARALLEL_EPSILON {
        return distance_squared(p, a);
    }
    let t = (dot_product(&vector_subtract(p, a), &ab) / len2).clamp(0.0, 1.0);
    distance_squared(p, &vector_ma(a, t, &ab))
}

/// Squared distance between segments `p1-q1` and `p2-q2`.
pub fn segment_segment_distance_squared(p1: &Vec3, q1: &Vec3, p2: &Vec3, q2: &Vec3) -> f32 {
    let d1 = vector_subtract(q1, p1);
    let d2 = vector_subtract(q2, p2);
    let r = vector_subtract(p1, p2);
    let a = dot_product(&d1, &d1);
    let e = dot_product(&d2, &d2);
    let f = dot_product(&d2, &r);

    let (s, t);
    if a <= PARALLEL_EPSILON && e <= PARALLEL_EPSILON {
        return vector_length_squared(&r);
    }
    if a <= PARALLEL_EPSILON {
        s = 0.0;
        t = (f / e).clamp(0.0, 1.0);
    } else {
        let c = dot_product(&d1, &r);
        if e <= PARALLEL_EPSILON {
            t = 0.0;
            s = (-c / a).clamp(0.0, 1.0);
        } else {
            let b = dot_product(&d1, &d2);
            let denom = a * e - b * b;
            let s0 = if denom != 0.0 {
                ((b * f - c * e) / denom).clamp(0.0, 1.0)
            } else {
                0.0
            };
            let t0 = (b * s0 + f) / e;
            if t0 < 0.0 {
                t = 0.0;
                s = (-c / a).clamp(0.0, 1.0);
            } else if t0 > 1.0 {
                t = 1.0;
                s = ((b - c) / a).clamp(0.0, 1.0);
            } else {
                t = t0;
                s = s0;
            }
        }
    }

    let c1 = vector_ma(p1, s, &d1);
    let c2 = vector_ma(p2, t, &d2);
    distance_squared(&c1, &c2)
}

/// Two pills (segment + radius) overlap.
pub fn capsules_overlap(
    a_bottom: &Vec3,
    a_top: &Vec3,
    a_radius: f32,
    b_bottom: &Vec3,
    b_top: &Vec3,
    b_radius: f32,
) -> bool {
    let r = a_radius + b_radius;
    segment_segment_distance_squared(a_bottom, a_top, b_bottom, b_top) < r * r
}

/// Smallest non-negative root of `t^2 + b t + c = 0`, as a fraction of `length`.
///
/// A start inside the skin (negative near root) only counts when the
/// segment heads inward.
fn first_root(b: f32, c: f32, length: f32) -> Option<f32> {
    let d = b * b - 4.0 * c;
    if d <= 0.0 {
        // tangent: slide along
        return None;
    }
    let near = (-b - d.sqrt()) * 0.5;
    let fraction = if near < 0.0 {
        if b >= 0.0 {
            return None;
        }
        0.0
    } else {
        near / length
    };
    if fraction > 1.0 {
        return None;
    }
    Some(fraction)
}

/// First intersection of the segment with a sphere.
pub fn sweep_sphere(start: &Vec3, end: &Vec3, origin: &Vec3, radius: f32) -> Option<RoundContact> {
    let r2 = radius * radius;
    let v1 = vector_subtract(start, origin);
    if vector_length_squared(&v1) < r2 {
        return Some(RoundContact::Embedded {
            allsolid: distance_squared(end, origin) < r2,
        });
    }

    let mut dir = vector_subtract(end, start);
    let length = vector_normalize(&mut dir);
    if length == 0.0 {
        return None;
    }

    let reach = radius + SURFACE_CLIP_EPSILON;
    if distance_from_line_squared(origin, start, &dir) >= r2
        && distance_squared(end, origin) > reach * reach
    {
        return None;
    }

    let skin = radius + RADIUS_EPSILON;
    let b = 2.0 * dot_product(&dir, &v1);
    let c = vector_length_squared(&v1) - skin * skin;
    let fraction = first_root(b, c, length)?;

    let point = vector_ma(start, fraction, &vector_subtract(end, start));
    let mut normal = vector_subtract(&point, origin);
    vector_normalize(&mut normal);
    Some(RoundContact::Hit {
        fraction,
        normal,
        point,
    })
}

/// First intersection of the segment with a vertical cylinder extending
/// `halfheight` above and below `origin`.
pub fn sweep_vertical_cylinder(
    start: &Vec3,
    end: &Vec3,
    origin: &Vec3,
    radius: f32,
    halfheight: f32,
) -> Option<RoundContact> {
    let r2 = radius * radius;
    let start2d = [start[0], start[1], 0.0];
    let end2d = [end[0], end[1], 0.0];
    let org2d = [origin[0], origin[1], 0.0];
    let within_height = |z: f32| z <= origin[2] + halfheight && z >= origin[2] - halfheight;

    if within_height(start[2]) && distance_squared(&start2d, &org2d) < r2 {
        return Some(RoundContact::Embedded {
            allsolid: within_height(end[2]) && distance_squared(&end2d, &org2d) < r2,
        });
    }

    let mut dir = vector_subtract(&end2d, &start2d);
    let length = vector_normalize(&mut dir);
    if length == 0.0 {
        return None;
    }

    let reach = radius + SURFACE_CLIP_EPSILON;
    if distance_from_line_squared(&org2d, &start2d, &dir) >= r2
        && distance_squared(&end2d, &org2d) > reach * reach
    {
        return None;
    }

    let v1 = vector_subtract(&start2d, &org2d);
    let skin = radius + RADIUS_EPSILON;
    let b = 2.0 * dot_product(&v1, &dir);
    let c = vector_length_squared(&v1) - skin * skin;
    let fraction = first_root(b, c, length)?;

    let point = vector_ma(start, fraction, &vector_subtract(end, start));
    if !within_height(point[2]) {
        return None;
    }
    let mut normal = [point[0] - origin[0], point[1] - origin[1], 0.0];
    vector_normalize(&mut normal);
    Some(RoundContact::Hit {
        fraction,
        normal,
        point,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn hit_fraction(c: Option<RoundContact>) -> f32 {
        match c {
            Some(RoundContact::Hit { fraction, .. }) => fraction,
            other => panic!("expected a hit, got {:?}", other),
        }
    }

    #[test]
    fn test_point_segment_distance() {
        let a = [0.0, 0.0, -10.0];
        let b = [0.0, 0.0, 10.0];
        assert_eq!(point_segment_distance_squared(&[3.0, 4.0, 0.0], &a, &b), 25.0);
        assert_eq!(point_segment_distance_squared(&[0.0, 0.0, 13.0], &a, &b), 9.0);
        assert_eq!(point_segment_distance_squared(&[1.0, 0.0, 0.0], &a, &a), 101.0);
    }

    #[test]
    fn test_segment_segment_distance() {
        // crossing at right angles, 5 apart
        let d = segment_segment_distance_squared(
            &[-10.0, 0.0, 0.0],
            &[10.0, 0.0, 0.0],
            &[0.0, -10.0, 5.0],
            &[0.0, 10.0, 5.0],
        );
        assert!((d - 25.0).abs() < 1e-4);
        // parallel vertical segments offset in z
        let d = segment_segment_distance_squared(
            &[0.0, 0.0, 0.0],
            &[0.0, 0.0, 10.0],
            &[4.0, 0.0, 20.0],
            &[4.0, 0.0, 30.0],
        );
        assert!((d - (16.0 + 100.0)).abs() < 1e-3);
        // degenerate to points
        let p = [1.0, 2.0, 3.0];
        assert_eq!(segment_segment_distance_squared(&p, &p, &[1.0, 2.0, 5.0], &[1.0, 2.0, 5.0]), 4.0);
    }

    #[test]
    fn test_sphere_head_on() {
        let f = hit_fraction(sweep_sphere(&[-100.0, 0.0, 0.0], &[100.0, 0.0, 0.0], &[0.0; 3], 10.0));
        // stops radius + skin short of the centre
        let expected = (100.0 - 10.0 - RADIUS_EPSILON) / 200.0;
        assert!((f - expected).abs() < 1e-4);
    }

    #[test]
    fn test_sphere_miss_and_behind() {
        assert_eq!(sweep_sphere(&[-100.0, 50.0, 0.0], &[100.0, 50.0, 0.0], &[0.0; 3], 10.0), None);
        // sphere behind the start, moving away
        assert_eq!(sweep_sphere(&[20.0, 0.0, 0.0], &[100.0, 0.0, 0.0], &[0.0; 3], 10.0), None);
        // stops before reaching the sphere
        assert_eq!(sweep_sphere(&[-100.0, 0.0, 0.0], &[-50.0, 0.0, 0.0], &[0.0; 3], 10.0), None);
    }

    #[test]
    fn test_sphere_skin_moving_away_is_free() {
        // inside the skin but outside the sphere
        let start = [10.5, 0.0, 0.0];
        assert_eq!(sweep_sphere(&start, &[60.0, 0.0, 0.0], &[0.0; 3], 10.0), None);
        let f = hit_fraction(sweep_sphere(&start, &[-60.0, 0.0, 0.0], &[0.0; 3], 10.0));
        assert_eq!(f, 0.0);
    }

    #[test]
    fn test_sphere_embedded() {
        assert_eq!(
            sweep_sphere(&[1.0, 0.0, 0.0], &[2.0, 0.0, 0.0], &[0.0; 3], 10.0),
            Some(RoundContact::Embedded { allsolid: true })
        );
        assert_eq!(
            sweep_sphere(&[1.0, 0.0, 0.0], &[50.0, 0.0, 0.0], &[0.0; 3], 10.0),
            Some(RoundContact::Embedded { allsolid: false })
        );
    }

    #[test]
    fn test_cylinder_side_hit_and_height() {
        let c = sweep_vertical_cylinder(&[-100.0, 0.0, 5.0], &[100.0, 0.0, 5.0], &[0.0; 3], 10.0, 20.0);
        match c {
            Some(RoundContact::Hit { normal, .. }) => {
                assert!((normal[0] + 1.0).abs() < 1e-5);
                assert_eq!(normal[2], 0.0);
            }
            other => panic!("expected a hit, got {:?}", other),
        }
        // passes over the top
        assert_eq!(
            sweep_vertical_cylinder(&[-100.0, 0.0, 30.0], &[100.0, 0.0, 30.0], &[0.0; 3], 10.0, 20.0),
            None
        );
    }

    #[test]
    fn test_capsules_overlap() {
        let a0 = [0.0, 0.0, -8.0];
        let a1 = [0.0, 0.0, 8.0];
        assert!(capsules_overlap(&a0, &a1, 8.0, &[15.0, 0.0, 0.0], &[15.0, 0.0, 0.0], 8.0));
        assert!(!capsules_overlap(&a0, &a1, 8.0, &[17.0, 0.0, 0.0], &[17.0, 0.0, 0.0], 8.0));
        // above the top cap
        assert!(!capsules_overlap(&a0, &a1, 8.0, &[0.0, 0.0, 25.0], &[0.0, 0.0, 40.0], 8.0));
        assert!(capsules_overlap(&a0, &a1, 8.0, &[0.0, 0.0, 23.0], &[0.0, 0.0, 40.0], 8.0));
    }
}
