//! Models and materials shared by unit tests, integration tests and benchmarks.

use na::{DMatrix, DVector, Matrix4, Vector4};
use rand::{Rng, SeedableRng};

use crate::approximant::{Approximant, ApproximantKind};
use crate::fem;
use crate::material::NeoHookean;
use crate::model::WeakModel3D;
use crate::{NeighborTopology, NodalField};

/// A soft rubber-like material.
pub fn test_material() -> NeoHookean {
    NeoHookean::from_young_poisson(1e4, 0.3, 1000.0)
}

/// A single unit corner tet.
pub fn make_one_tet() -> (WeakModel3D, Approximant) {
    let nodes = vec![
        [0.0, 0.0, 0.0],
        [1.0, 0.0, 0.0],
        [0.0, 1.0, 0.0],
        [0.0, 0.0, 1.0],
    ];
    fem::linear_tetrahedra(nodes, &[[0, 1, 2, 3]]).unwrap()
}

/// A tetrahedralized box with `res[i]` cells along axis `i`.
pub fn make_box(res: [usize; 3], spacing: f64) -> (WeakModel3D, Approximant) {
    let (nodes, tets) = fem::box_tetmesh(res, spacing);
    fem::linear_tetrahedra(nodes, &tets).unwrap()
}

/// A regular grid of `res[i]` nodes along axis `i` discretized with moving least squares.
///
/// Nodes double as integration points, each weighted by the volume of a grid cell. The support
/// domain of a node contains every node closer than `radius_factor * spacing`, including the
/// node itself. Shape functions use a linear basis, so derivatives reproduce linear fields
/// exactly, but shape functions do not interpolate nodal values.
///
/// Returns the model, the support domain of each node and the approximant evaluated at the nodes.
pub fn make_meshfree_grid(
    res: [usize; 3],
    spacing: f64,
    radius_factor: f64,
) -> (WeakModel3D, NeighborTopology, Approximant) {
    let mut nodes = Vec::with_capacity(res[0] * res[1] * res[2]);
    for k in 0..res[2] {
        for j in 0..res[1] {
            for i in 0..res[0] {
                nodes.push([i as f64 * spacing, j as f64 * spacing, k as f64 * spacing]);
            }
        }
    }

    let radius = radius_factor * spacing;
    let dist = |a: &[f64; 3], b: &[f64; 3]| {
        ((a[0] - b[0]).powi(2) + (a[1] - b[1]).powi(2) + (a[2] - b[2]).powi(2)).sqrt()
    };

    let neighbors: NeighborTopology = nodes
        .iter()
        .map(|x| {
            (0..nodes.len())
                .filter(|&j| dist(x, &nodes[j]) < radius)
                .collect()
        })
        .collect();

    let mut shape_functions = Vec::with_capacity(nodes.len());
    let mut derivatives = Vec::with_capacity(nodes.len());
    for (x, support) in nodes.iter().zip(neighbors.iter()) {
        let basis = |y: &[f64; 3]| Vector4::new(1.0, y[0] - x[0], y[1] - x[1], y[2] - x[2]);
        let weight = |y: &[f64; 3]| {
            let r = dist(x, y) / radius;
            (1.0 - r * r).powi(2)
        };

        let mut moment = Matrix4::zeros();
        for &j in support {
            let p = basis(&nodes[j]);
            moment += p * p.transpose() * weight(&nodes[j]);
        }
        let moment_inv = moment
            .try_inverse()
            .expect("singular moment matrix, increase the support radius");

        let mut values = DVector::zeros(support.len());
        let mut derivs = DMatrix::zeros(support.len(), 3);
        for (k, &j) in support.iter().enumerate() {
            let c = moment_inv * basis(&nodes[j]) * weight(&nodes[j]);
            values[k] = c[0];
            for axis in 0..3 {
                derivs[(k, axis)] = c[axis + 1];
            }
        }
        shape_functions.push(values);
        derivatives.push(derivs);
    }

    let weights = vec![spacing.powi(3); nodes.len()];
    let model = WeakModel3D::new(nodes.clone(), nodes, weights).unwrap();
    let approx = Approximant::new(
        ApproximantKind::Mmls,
        neighbors.clone(),
        shape_functions,
        derivatives,
    )
    .unwrap();
    (model, neighbors, approx)
}

/// Uniformly distributed random displacements in `[-scale, scale)` seeded for reproducibility.
pub fn random_displacements(num_nodes: usize, scale: f64, seed: u64) -> NodalField {
    let mut rng = rand::rngs::StdRng::seed_from_u64(seed);
    NodalField::from_fn(num_nodes, 3, |_, _| rng.gen_range(-scale..scale))
}
