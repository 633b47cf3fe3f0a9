// plane.rs — Best-fitting plane through an unordered point cloud.
//
// Minimizes the sum of squared orthogonal distances from the points to the
// plane. The plane passes through the centroid; its normal is the minor
// axis of the covariance matrix.
//
// Algorithm (two parallel passes, then closed form):
//   1. Centroid: per-chunk position sums, merged once, divided by N.
//   2. Covariance: per-chunk sums of the six distinct centered products
//      (xx, xy, xz, yy, yz, zz), merged once, divided by N.
//   3. For each axis, the cofactor row of the covariance matrix that
//      excludes that axis gives a candidate normal. Each candidate is
//      weighted by the square of its 2×2 determinant and sign-aligned with
//      the running sum before being added.
//   4. Normalize. The points do not span a plane (identical or collinear
//      points) when every determinant is negligible next to trace², or when
//      the weighted sum is zero or non-finite.
//
// For a rank-2 covariance (points exactly on a plane) every cofactor row is
// a multiple of the plane normal, so the weighted sum is exact. When the
// covariance is close to singular along one axis, that axis's determinant
// is small and its candidate contributes almost nothing.
//
// Reference: "Fitting a plane to many points in 3D" (E. Dam, 2017).
//
// PARALLELISM:
// Index ranges are split into fixed-size chunks. Each chunk owns a private
// accumulator, rayon runs the chunks fork-join, and the partial results are
// merged in a single sequential fold. The centroid pass is fully joined
// (`collect`) before the covariance pass starts. Point counts below the
// parallel threshold run as a single chunk on the calling thread.
//
// NEW RUST CONCEPTS:
// - `?Sized` bounds so `fit` accepts both `Vec<T>` and bare slices `[T]`.
// - `impl Trait for [T]`: implementing a local trait on a foreign slice type.
// - `Fn(Range<usize>) -> T + Sync`: a closure shared across rayon workers.

use std::fmt;
use std::ops::{Add, Range};

use glam::{DVec3, Vec3};
use rayon::prelude::*;

/// Below this many points the fit runs serially.
pub const DEFAULT_PARALLEL_THRESHOLD: usize = 4096;

/// Points per chunk (one private accumulator each) on the parallel path.
pub const DEFAULT_CHUNK_LEN: usize = 1024;

/// Normal reported when no plane could be fitted.
pub const DEFAULT_NORMAL: DVec3 = DVec3::Z;

/// Relative size (against trace²) below which every cofactor determinant
/// counts as zero.
const DEGENERACY_TOLERANCE: f64 = 16.0 * f64::EPSILON;

// ============================================================
// Point cloud access
// ============================================================

/// Read-only, indexable access to a set of 3D points.
pub trait PointCloud {
    /// Number of points.
    fn len(&self) -> usize;

    /// Coordinates of point `i`, widened to f64. `i < len()`.
    fn point(&self, i: usize) -> DVec3;

    fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl PointCloud for [DVec3] {
    fn len(&self) -> usize {
        <[DVec3]>::len(self)
    }

    fn point(&self, i: usize) -> DVec3 {
        self[i]
    }
}

impl PointCloud for [Vec3] {
    fn len(&self) -> usize {
        <[Vec3]>::len(self)
    }

    fn point(&self, i: usize) -> DVec3 {
        self[i].as_dvec3()
    }
}

impl PointCloud for [[f64; 3]] {
    fn len(&self) -> usize {
        <[[f64; 3]]>::len(self)
    }

    fn point(&self, i: usize) -> DVec3 {
        DVec3::from_array(self[i])
    }
}

impl<T> PointCloud for Vec<T>
where
    [T]: PointCloud,
{
    fn len(&self) -> usize {
        PointCloud::len(self.as_slice())
    }

    fn point(&self, i: usize) -> DVec3 {
        self.as_slice().point(i)
    }
}

// ============================================================
// Result and accumulators
// ============================================================

/// Outcome of a plane fit.
///
/// Check `success` before trusting `normal`: on failure it is the default
/// (0, 0, 1). `origin` is (0, 0, 0) when fewer than three points were given,
/// and the centroid otherwise.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PlaneFit {
    /// Centroid of the points; a point on the fitted plane.
    pub origin: DVec3,
    /// Unit plane normal. Sign is not meaningful.
    pub normal: DVec3,
    /// Whether `normal` describes a well-defined plane.
    pub success: bool,
}

impl PlaneFit {
    fn failed(origin: DVec3) -> Self {
        PlaneFit {
            origin,
            normal: DEFAULT_NORMAL,
            success: false,
        }
    }

    pub fn is_valid(&self) -> bool {
        self.success
    }
}

impl Default for PlaneFit {
    fn default() -> Self {
        PlaneFit::failed(DVec3::ZERO)
    }
}

impl fmt::Display for PlaneFit {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let o = self.origin;
        let n = self.normal;
        write!(
            f,
            "origin ({:.6}, {:.6}, {:.6}) normal ({:.6}, {:.6}, {:.6}){}",
            o.x,
            o.y,
            o.z,
            n.x,
            n.y,
            n.z,
            if self.success { "" } else { " [failed]" }
        )
    }
}

/// The six distinct entries of a symmetric 3×3 second-moment matrix.
///
/// Used both for per-chunk sums of centered products and, after dividing
/// by N, for the covariance matrix itself.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct Covariance {
    pub xx: f64,
    pub xy: f64,
    pub xz: f64,
    pub yy: f64,
    pub yz: f64,
    pub zz: f64,
}

impl Covariance {
    /// Add the outer product of one centered point.
    fn accumulate(&mut self, r: DVec3) {
        self.xx += r.x * r.x;
        self.xy += r.x * r.y;
        self.xz += r.x * r.z;
        self.yy += r.y * r.y;
        self.yz += r.y * r.z;
        self.zz += r.z * r.z;
    }

    fn scale(self, s: f64) -> Self {
        Covariance {
            xx: self.xx * s,
            xy: self.xy * s,
            xz: self.xz * s,
            yy: self.yy * s,
            yz: self.yz * s,
            zz: self.zz * s,
        }
    }

    fn trace(&self) -> f64 {
        self.xx + self.yy + self.zz
    }

    /// The three 2×2 cofactor determinants, one per excluded axis.
    fn cofactor_dets(&self) -> [f64; 3] {
        let Covariance { xx, xy, xz, yy, yz, zz } = *self;
        [yy * zz - yz * yz, xx * zz - xz * xz, xx * yy - xy * xy]
    }

    /// Whether the matrix has rank < 2 up to rounding.
    ///
    /// Collinear points leave cofactor determinants of rounding size rather
    /// than exactly zero, so the largest one is compared against the
    /// squared trace, which scales the same way.
    pub fn is_degenerate(&self) -> bool {
        let largest = self
            .cofactor_dets()
            .into_iter()
            .fold(0.0f64, |m, d| m.max(d.abs()));
        let trace = self.trace();
        !(largest > DEGENERACY_TOLERANCE * trace * trace)
    }

    /// Determinant-weighted sum of the three cofactor rows.
    ///
    /// Not normalized. Zero (or non-finite) when the matrix has rank < 2.
    /// Candidates are added in x, y, z order; each one is flipped when it
    /// points away from the sum of the candidates added before it.
    pub fn weighted_normal(&self) -> DVec3 {
        let Covariance { xx, xy, xz, yy, yz, zz } = *self;

        let [det_x, det_y, det_z] = self.cofactor_dets();

        let candidates = [
            (det_x, DVec3::new(det_x, xz * yz - xy * zz, xy * yz - xz * yy)),
            (det_y, DVec3::new(xz * yz - xy * zz, det_y, xy * xz - yz * xx)),
            (det_z, DVec3::new(xy * yz - xz * yy, xy * xz - yz * xx, det_z)),
        ];

        candidates
            .into_iter()
            .fold(DVec3::ZERO, |weighted, (det, axis_dir)| {
                let mut weight = det * det;
                if weighted.dot(axis_dir) < 0.0 {
                    weight = -weight;
                }
                weighted + axis_dir * weight
            })
    }
}

impl Add for Covariance {
    type Output = Covariance;

    fn add(self, o: Covariance) -> Covariance {
        Covariance {
            xx: self.xx + o.xx,
            xy: self.xy + o.xy,
            xz: self.xz + o.xz,
            yy: self.yy + o.yy,
            yz: self.yz + o.yz,
            zz: self.zz + o.zz,
        }
    }
}

// ============================================================
// Fitter
// ============================================================

/// Total-least-squares plane fitter.
///
/// Stateless between calls; one instance can be shared across threads.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PlaneFitter {
    parallel_threshold: usize,
    chunk_len: usize,
}

impl Default for PlaneFitter {
    fn default() -> Self {
        PlaneFitter {
            parallel_threshold: DEFAULT_PARALLEL_THRESHOLD,
            chunk_len: DEFAULT_CHUNK_LEN,
        }
    }
}

impl PlaneFitter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Point count at which the passes switch to rayon. `0` always
    /// parallelizes, `usize::MAX` never does.
    pub fn with_parallel_threshold(mut self, threshold: usize) -> Self {
        self.parallel_threshold = threshold;
        self
    }

    /// Points per parallel chunk. Clamped to at least 1.
    pub fn with_chunk_len(mut self, chunk_len: usize) -> Self {
        self.chunk_len = chunk_len.max(1);
        self
    }

    pub fn parallel_threshold(&self) -> usize {
        self.parallel_threshold
    }

    pub fn chunk_len(&self) -> usize {
        self.chunk_len
    }

    /// Fit a plane through `points`.
    ///
    /// Fewer than three points, or points that do not span a plane, give
    /// `success == false` and the default normal (0, 0, 1).
    pub fn fit<P>(&self, points: &P) -> PlaneFit
    where
        P: PointCloud + Sync + ?Sized,
    {
        if points.len() < 3 {
            return PlaneFit::default();
        }

        let origin = self.centroid(points);
        let covariance = self.covariance(points, origin);
        if covariance.is_degenerate() {
            return PlaneFit::failed(origin);
        }
        let weighted = covariance.weighted_normal();

        let norm = weighted.length();
        if !norm.is_finite() || norm == 0.0 {
            return PlaneFit::failed(origin);
        }

        PlaneFit {
            origin,
            normal: weighted / norm,
            success: true,
        }
    }

    /// Arithmetic mean of the points. (0, 0, 0) for an empty cloud.
    pub fn centroid<P>(&self, points: &P) -> DVec3
    where
        P: PointCloud + Sync + ?Sized,
    {
        let n = points.len();
        if n == 0 {
            return DVec3::ZERO;
        }

        let sum = self
            .map_chunks(n, |range| {
                range.fold(DVec3::ZERO, |acc, i| acc + points.point(i))
            })
            .into_iter()
            .fold(DVec3::ZERO, |acc, partial| acc + partial);

        sum / n as f64
    }

    /// Covariance of the points about `center`, divided by N.
    pub fn covariance<P>(&self, points: &P, center: DVec3) -> Covariance
    where
        P: PointCloud + Sync + ?Sized,
    {
        let n = points.len();
        if n == 0 {
            return Covariance::default();
        }

        let sum = self
            .map_chunks(n, |range| {
                let mut local = Covariance::default();
                for i in range {
                    local.accumulate(points.point(i) - center);
                }
                local
            })
            .into_iter()
            .fold(Covariance::default(), |acc, partial| acc + partial);

        sum.scale(1.0 / n as f64)
    }

    /// Run `f` once per chunk of `0..n` and return the per-chunk results in
    /// chunk order. Serial (one chunk) below the parallel threshold.
    fn map_chunks<T, F>(&self, n: usize, f: F) -> Vec<T>
    where
        T: Send,
        F: Fn(Range<usize>) -> T + Sync + Send,
    {
        if n < self.parallel_threshold {
            return vec![f(0..n)];
        }

        chunk_ranges(n, self.chunk_len)
            .into_par_iter()
            .map(f)
            .collect()
    }
}

/// Fit a plane with the default fitter configuration.
pub fn fit_plane<P>(points: &P) -> PlaneFit
where
    P: PointCloud + Sync + ?Sized,
{
    PlaneFitter::default().fit(points)
}

/// Split `0..n` into consecutive ranges of at most `chunk_len` indices.
fn chunk_ranges(n: usize, chunk_len: usize) -> Vec<Range<usize>> {
    let chunk_len = chunk_len.max(1);
    (0..n.div_ceil(chunk_len))
        .map(|c| c * chunk_len..((c + 1) * chunk_len).min(n))
        .collect()
}

// ============================================================
// Tests
// ============================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_chunk_ranges_cover_everything_once() {
        let ranges = chunk_ranges(10, 4);
        assert_eq!(ranges, vec![0..4, 4..8, 8..10]);

        let ranges = chunk_ranges(8, 4);
        assert_eq!(ranges, vec![0..4, 4..8]);

        assert!(chunk_ranges(0, 4).is_empty());
        // chunk_len 0 is clamped rather than looping forever.
        assert_eq!(chunk_ranges(3, 0).len(), 3);
    }

    #[test]
    fn test_weighted_normal_of_flat_covariance() {
        // Spread in x and y only: the z cofactor is the only non-zero one.
        let cov = Covariance {
            xx: 2.0,
            xy: 0.5,
            yy: 1.0,
            ..Default::default()
        };
        let n = cov.weighted_normal();
        assert_eq!(n.x, 0.0);
        assert_eq!(n.y, 0.0);
        // det_z = 2 * 1 - 0.25 = 1.75, weight = det_z^2.
        assert!((n.z - 1.75f64.powi(3)).abs() < 1e-12);
    }

    #[test]
    fn test_weighted_normal_zero_for_rank_one() {
        // Points along (1, 1, 1): every entry identical, every cofactor zero.
        let cov = Covariance {
            xx: 3.0,
            xy: 3.0,
            xz: 3.0,
            yy: 3.0,
            yz: 3.0,
            zz: 3.0,
        };
        assert_eq!(cov.weighted_normal(), DVec3::ZERO);
    }

    #[test]
    fn test_degeneracy_is_relative_to_scale() {
        // Rank one up to rounding noise in the cofactors.
        let line = Covariance {
            xx: 0.0207,
            xy: 0.0414,
            xz: 0.0621 + 1e-18,
            yy: 0.0828,
            yz: 0.1242,
            zz: 0.1863,
        };
        assert!(line.is_degenerate());

        // A genuinely flat cloud at a tiny scale is still a plane.
        let small_plane = Covariance {
            xx: 1e-8,
            yy: 4e-8,
            ..Default::default()
        };
        assert!(!small_plane.is_degenerate());

        assert!(Covariance::default().is_degenerate());
        let nan = Covariance {
            xx: f64::NAN,
            ..Default::default()
        };
        assert!(nan.is_degenerate());
    }

    #[test]
    fn test_candidates_aligned_into_one_hemisphere() {
        // Points on the plane x - y = 0, spread along (1, 1, 0) and z.
        // The x cofactor row is (1, -1, 0) and the y row is (-1, 1, 0):
        // summed blindly they cancel. The y candidate must be flipped.
        let cov = Covariance {
            xx: 1.0,
            xy: 1.0,
            xz: 0.0,
            yy: 1.0,
            yz: 0.0,
            zz: 1.0,
        };
        let n = cov.weighted_normal();
        assert_eq!(n, DVec3::new(2.0, -2.0, 0.0));
    }

    #[test]
    fn test_accumulate_and_add_agree() {
        let pts = [
            DVec3::new(1.0, 2.0, 3.0),
            DVec3::new(-1.0, 0.5, 2.0),
            DVec3::new(0.0, -3.0, 1.0),
        ];
        let mut whole = Covariance::default();
        for p in pts {
            whole.accumulate(p);
        }
        let mut a = Covariance::default();
        a.accumulate(pts[0]);
        let mut b = Covariance::default();
        b.accumulate(pts[1]);
        b.accumulate(pts[2]);
        assert_eq!(a + b, whole);
    }

    #[test]
    fn test_fewer_than_three_points() {
        let pts: Vec<DVec3> = vec![DVec3::ONE, DVec3::X];
        let fit = fit_plane(&pts);
        assert!(!fit.success);
        assert_eq!(fit.origin, DVec3::ZERO);
        assert_eq!(fit.normal, DEFAULT_NORMAL);
    }

    #[test]
    fn test_point_cloud_impls_agree() {
        let f64s: Vec<[f64; 3]> = vec![[0.0, 0.0, 0.0], [1.0, 0.0, 0.0], [0.0, 1.0, 0.0]];
        let f32s: Vec<Vec3> = f64s.iter().map(|p| Vec3::new(p[0] as f32, p[1] as f32, p[2] as f32)).collect();
        let dvecs: Vec<DVec3> = f64s.iter().map(|&p| DVec3::from_array(p)).collect();

        assert_eq!(PointCloud::len(&f64s), 3);
        for i in 0..3 {
            assert_eq!(f64s.point(i), dvecs.point(i));
            assert_eq!(f32s.point(i), dvecs.point(i));
        }
        assert_eq!(fit_plane(&f64s), fit_plane(dvecs.as_slice()));
    }

    #[test]
    fn test_builder_clamps_chunk_len() {
        let fitter = PlaneFitter::new().with_chunk_len(0).with_parallel_threshold(0);
        assert_eq!(fitter.chunk_len(), 1);
        assert_eq!(fitter.parallel_threshold(), 0);
    }
}
