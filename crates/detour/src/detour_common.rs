//! Common utilities for Detour navigation mesh operations
//!
//! All 2D helpers work on the xz-plane; y is the up axis.

/// Vertex equality threshold, squared
const EQUAL_THRESHOLD_SQR: f32 = (1.0 / 16384.0) * (1.0 / 16384.0);

/// Returns the square of the value
#[inline]
pub fn dt_sqr(a: f32) -> f32 {
    a * a
}

#[inline]
pub fn dt_vsub(v1: &[f32; 3], v2: &[f32; 3]) -> [f32; 3] {
    [v1[0] - v2[0], v1[1] - v2[1], v1[2] - v2[2]]
}

#[inline]
pub fn dt_vadd(v1: &[f32; 3], v2: &[f32; 3]) -> [f32; 3] {
    [v1[0] + v2[0], v1[1] + v2[1], v1[2] + v2[2]]
}

/// Linear interpolation between two vectors
#[inline]
pub fn dt_vlerp(v1: &[f32; 3], v2: &[f32; 3], t: f32) -> [f32; 3] {
    [
        v1[0] + (v2[0] - v1[0]) * t,
        v1[1] + (v2[1] - v1[1]) * t,
        v1[2] + (v2[2] - v1[2]) * t,
    ]
}

#[inline]
pub fn dt_vmin(mn: &mut [f32; 3], v: &[f32; 3]) {
    for i in 0..3 {
        mn[i] = mn[i].min(v[i]);
    }
}

#[inline]
pub fn dt_vmax(mx: &mut [f32; 3], v: &[f32; 3]) {
    for i in 0..3 {
        mx[i] = mx[i].max(v[i]);
    }
}

#[inline]
pub fn dt_vlen(v: &[f32; 3]) -> f32 {
    (v[0] * v[0] + v[1] * v[1] + v[2] * v[2]).sqrt()
}

#[inline]
pub fn dt_vdist(v1: &[f32; 3], v2: &[f32; 3]) -> f32 {
    dt_vdist_sqr(v1, v2).sqrt()
}

#[inline]
pub fn dt_vdist_sqr(v1: &[f32; 3], v2: &[f32; 3]) -> f32 {
    dt_sqr(v2[0] - v1[0]) + dt_sqr(v2[1] - v1[1]) + dt_sqr(v2[2] - v1[2])
}

/// Checks two points for equality within a small threshold
#[inline]
pub fn dt_vequal(p0: &[f32; 3], p1: &[f32; 3]) -> bool {
    dt_vdist_sqr(p0, p1) < EQUAL_THRESHOLD_SQR
}

#[inline]
pub fn dt_visfinite(v: &[f32; 3]) -> bool {
    v.iter().all(|c| c.is_finite())
}

/// Signed area of the triangle on the xz-plane
#[inline]
pub fn dt_tri_area_2d(a: &[f32; 3], b: &[f32; 3], c: &[f32; 3]) -> f32 {
    let abx = b[0] - a[0];
    let abz = b[2] - a[2];
    let acx = c[0] - a[0];
    let acz = c[2] - a[2];
    acx * abz - abx * acz
}

/// Checks two axis aligned boxes for overlap
#[inline]
pub fn dt_overlap_bounds(
    amin: &[f32; 3],
    amax: &[f32; 3],
    bmin: &[f32; 3],
    bmax: &[f32; 3],
) -> bool {
    (0..3).all(|i| amin[i] <= bmax[i] && amax[i] >= bmin[i])
}

/// Squared distance from a point to a segment on the xz-plane
///
/// Returns the distance and the parametric position of the closest point.
pub fn dt_dist_pt_seg_sqr_2d(pt: &[f32; 3], p: &[f32; 3], q: &[f32; 3]) -> (f32, f32) {
    let pqx = q[0] - p[0];
    let pqz = q[2] - p[2];
    let dx = pt[0] - p[0];
    let dz = pt[2] - p[2];
    let d = pqx * pqx + pqz * pqz;
    let mut t = pqx * dx + pqz * dz;
    if d > 0.0 {
        t /= d;
    }
    let t = t.clamp(0.0, 1.0);
    let dx = p[0] + t * pqx - pt[0];
    let dz = p[2] + t * pqz - pt[2];
    (dx * dx + dz * dz, t)
}

/// Point in convex or concave polygon test on the xz-plane
pub fn dt_point_in_polygon(pt: &[f32; 3], verts: &[[f32; 3]]) -> bool {
    let n = verts.len();
    let mut inside = false;
    let mut j = n.wrapping_sub(1);
    for i in 0..n {
        let vi = &verts[i];
        let vj = &verts[j];
        if ((vi[2] > pt[2]) != (vj[2] > pt[2]))
            && (pt[0] < (vj[0] - vi[0]) * (pt[2] - vi[2]) / (vj[2] - vi[2]) + vi[0])
        {
            inside = !inside;
        }
        j = i;
    }
    inside
}

/// Squared distances from a point to every polygon edge
///
/// Returns whether the point lies inside the polygon, and per edge the
/// squared distance and the parametric position along that edge.
pub fn dt_distance_pt_poly_edges_sqr(
    pt: &[f32; 3],
    verts: &[[f32; 3]],
) -> (bool, Vec<f32>, Vec<f32>) {
    let n = verts.len();
    let mut ed = vec![0.0f32; n];
    let mut et = vec![0.0f32; n];
    let mut j = n.wrapping_sub(1);
    for i in 0..n {
        // Slot j holds the edge from vertex j to vertex i.
        let (d, t) = dt_dist_pt_seg_sqr_2d(pt, &verts[j], &verts[i]);
        ed[j] = d;
        et[j] = t;
        j = i;
    }
    (dt_point_in_polygon(pt, verts), ed, et)
}

/// Height of the point projected onto the triangle, if the projection lies inside it
pub fn dt_closest_height_point_triangle(
    p: &[f32; 3],
    a: &[f32; 3],
    b: &[f32; 3],
    c: &[f32; 3],
) -> Option<f32> {
    const EPS: f32 = 1e-6;

    let v0 = dt_vsub(c, a);
    let v1 = dt_vsub(b, a);
    let v2 = dt_vsub(p, a);

    let mut denom = v0[0] * v1[2] - v0[2] * v1[0];
    if denom.abs() < EPS {
        return None;
    }

    let mut u = v1[2] * v2[0] - v1[0] * v2[2];
    let mut v = v0[0] * v2[2] - v0[2] * v2[0];
    if denom < 0.0 {
        denom = -denom;
        u = -u;
        v = -v;
    }

    // Small tolerance keeps points on shared edges inside one of the triangles.
    let tol = denom * 1e-5;
    if u >= -tol && v >= -tol && (u + v) <= denom + tol {
        Some(a[1] + (v0[1] * u + v1[1] * v) / denom)
    } else {
        None
    }
}

/// Returns the next power of 2
#[inline]
pub fn dt_next_pow2(mut v: u32) -> u32 {
    if v == 0 {
        return 0;
    }
    v -= 1;
    v |= v >> 1;
    v |= v >> 2;
    v |= v >> 4;
    v |= v >> 8;
    v |= v >> 16;
    v.wrapping_add(1)
}

/// Returns the integer logarithm base 2
#[inline]
pub fn dt_ilog2(v: u32) -> u32 {
    if v == 0 {
        0
    } else {
        31 - v.leading_zeros()
    }
}

/// Returns the opposite tile side
#[inline]
pub fn dt_opposite_tile(side: u8) -> u8 {
    (side + 4) & 0x7
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    #[test]
    fn test_tri_area_sign() {
        let a = [0.0, 0.0, 0.0];
        let b = [1.0, 0.0, 1.0];
        let c = [2.0, 0.0, 0.5];
        assert!(dt_tri_area_2d(&a, &b, &c) > 0.0);
        assert!(dt_tri_area_2d(&a, &c, &b) < 0.0);
        assert_eq!(dt_tri_area_2d(&a, &a, &c), 0.0);
    }

    #[test]
    fn test_dist_pt_seg() {
        let (d, t) = dt_dist_pt_seg_sqr_2d(&[1.0, 5.0, 1.0], &[0.0, 0.0, 0.0], &[2.0, 0.0, 0.0]);
        assert_relative_eq!(d, 1.0);
        assert_relative_eq!(t, 0.5);

        let (d, t) = dt_dist_pt_seg_sqr_2d(&[-3.0, 0.0, 0.0], &[0.0, 0.0, 0.0], &[2.0, 0.0, 0.0]);
        assert_relative_eq!(d, 9.0);
        assert_eq!(t, 0.0);
    }

    #[test]
    fn test_point_in_polygon() {
        let square = [
            [0.0, 0.0, 0.0],
            [0.0, 0.0, 2.0],
            [2.0, 0.0, 2.0],
            [2.0, 0.0, 0.0],
        ];
        assert!(dt_point_in_polygon(&[1.0, 9.0, 1.0], &square));
        assert!(!dt_point_in_polygon(&[3.0, 0.0, 1.0], &square));

        let (inside, ed, et) = dt_distance_pt_poly_edges_sqr(&[1.0, 0.0, 0.5], &square);
        assert!(inside);
        assert_eq!(ed.len(), 4);
        // Slot 3 is the edge from the last vertex back to the first one.
        assert_relative_eq!(ed[3], 0.25);
        assert_relative_eq!(et[3], 0.5);
    }

    #[test]
    fn test_closest_height() {
        let a = [0.0, 0.0, 0.0];
        let b = [0.0, 2.0, 2.0];
        let c = [2.0, 0.0, 0.0];
        let h = dt_closest_height_point_triangle(&[0.5, 10.0, 1.0], &a, &b, &c);
        assert_relative_eq!(h.unwrap(), 1.0);
        assert!(dt_closest_height_point_triangle(&[3.0, 0.0, 3.0], &a, &b, &c).is_none());
    }

    #[test]
    fn test_pow2_and_log() {
        assert_eq!(dt_next_pow2(5), 8);
        assert_eq!(dt_next_pow2(64), 64);
        assert_eq!(dt_ilog2(64), 6);
        assert_eq!(dt_ilog2(4096), 12);
        assert_eq!(dt_opposite_tile(0), 4);
        assert_eq!(dt_opposite_tile(6), 2);
    }
}
