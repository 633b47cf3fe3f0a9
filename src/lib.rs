// planefit-gpu: best-fit planes through point clouds, and GPU device
// acquisition for the compute stages that consume them.
//
//   plane: parallel total-least-squares plane fit (centroid + covariance +
//          determinant-weighted cofactor normal)
//   gpu: bounded-timeout adapter/device acquisition over wgpu with a
//        reference-counted shared instance

pub mod plane;
pub mod gpu;

pub use plane::{fit_plane, PlaneFit, PlaneFitter, PointCloud};
