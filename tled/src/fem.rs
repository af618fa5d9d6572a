//! Linear tetrahedral finite elements.
//!
//! Linear tets have constant shape function gradients, so a single integration point at the
//! centroid of each element integrates the internal forces exactly. The gradients are recovered
//! from the inverse of the reference shape matrix `DX = [X1 - X0, X2 - X0, X3 - X0]`.

use std::collections::BTreeSet;

use na::{DMatrix, DVector, Matrix3, Vector3};

use crate::approximant::{Approximant, ApproximantKind, FemType};
use crate::model::WeakModel3D;
use crate::{Error, NeighborTopology};

/// Relative volume below which a reference element is considered degenerate.
const DEGENERATE_VOLUME_TOL: f64 = 1e-12;

/// Reference shape matrix of the tet with the given vertex positions.
fn shape_matrix(verts: &[Vector3<f64>; 4]) -> Matrix3<f64> {
    Matrix3::from_columns(&[verts[1] - verts[0], verts[2] - verts[0], verts[3] - verts[0]])
}

/// Build a weak model and its finite element approximant from a tetrahedral mesh.
///
/// Each tet contributes one integration point at its centroid weighted by its reference volume.
/// The support domain of that point is the tet itself.
#[allow(non_snake_case)]
pub fn linear_tetrahedra(
    nodes: Vec<[f64; 3]>,
    tets: &[[usize; 4]],
) -> Result<(WeakModel3D, Approximant), Error> {
    let mut degens = Vec::new();
    let mut inverted = Vec::new();

    let mut centroids = Vec::with_capacity(tets.len());
    let mut volumes = Vec::with_capacity(tets.len());
    let mut derivatives = Vec::with_capacity(tets.len());

    for (tet_idx, tet) in tets.iter().enumerate() {
        let mut verts = [Vector3::zeros(); 4];
        for (v, &i) in verts.iter_mut().zip(tet.iter()) {
            let pos = nodes.get(i).ok_or(Error::SizeMismatch {
                what: "tetrahedron vertex index",
                expected: nodes.len(),
                actual: i + 1,
            })?;
            *v = Vector3::from(*pos);
        }

        let DX = shape_matrix(&verts);
        let det = DX.determinant();
        let scale = DX.column_iter().map(|c| c.norm()).product::<f64>();
        if det.abs() <= DEGENERATE_VOLUME_TOL * scale {
            degens.push(tet_idx);
            continue;
        }
        if det < 0.0 {
            inverted.push(tet_idx);
            continue;
        }

        let DX_inv = match DX.try_inverse() {
            Some(inv) => inv,
            None => {
                degens.push(tet_idx);
                continue;
            }
        };

        // Rows of DX⁻¹ are the gradients of the barycentric coordinates of vertices 1, 2 and 3.
        let mut derivs = DMatrix::zeros(4, 3);
        for k in 0..3 {
            for axis in 0..3 {
                derivs[(k + 1, axis)] = DX_inv[(k, axis)];
                derivs[(0, axis)] -= DX_inv[(k, axis)];
            }
        }

        let centroid = (verts[0] + verts[1] + verts[2] + verts[3]) * 0.25;
        centroids.push([centroid[0], centroid[1], centroid[2]]);
        volumes.push(det / 6.0);
        derivatives.push(derivs);
    }

    if !degens.is_empty() {
        return Err(Error::DegenerateReferenceElement { degens });
    }
    if !inverted.is_empty() {
        return Err(Error::InvertedReferenceElement { inverted });
    }

    let support: NeighborTopology = tets.iter().map(|t| t.to_vec()).collect();
    let shape_functions = vec![DVector::from_element(4, 0.25); tets.len()];

    let model = WeakModel3D::new(nodes, centroids, volumes)?;
    let approximant = Approximant::new(
        ApproximantKind::Fem(FemType::Tet4),
        support,
        shape_functions,
        derivatives,
    )?;
    Ok((model, approximant))
}

/// Nodal support domains induced by the point support domains.
///
/// Each node gets every node that shares a support domain with it, including itself, in
/// ascending order.
pub fn nodal_neighbors(num_nodes: usize, support: &NeighborTopology) -> NeighborTopology {
    let mut sets = vec![BTreeSet::new(); num_nodes];
    for neighbors in support.iter() {
        for &i in neighbors.iter() {
            if let Some(set) = sets.get_mut(i) {
                set.extend(neighbors.iter().cloned());
            }
        }
    }
    sets.into_iter().map(|s| s.into_iter().collect()).collect()
}

/// Build a box of tets on a regular grid with `res[i]` cells along axis `i`.
///
/// Each cubic cell is split into 6 positively oriented tets sharing the cell diagonal. The box
/// spans `[0, res[i] * spacing]` along each axis.
pub fn box_tetmesh(res: [usize; 3], spacing: f64) -> (Vec<[f64; 3]>, Vec<[usize; 4]>) {
    let [nx, ny, nz] = [res[0] + 1, res[1] + 1, res[2] + 1];
    let index = |i: usize, j: usize, k: usize| i + nx * (j + ny * k);

    let mut nodes = Vec::with_capacity(nx * ny * nz);
    for k in 0..nz {
        for j in 0..ny {
            for i in 0..nx {
                nodes.push([i as f64 * spacing, j as f64 * spacing, k as f64 * spacing]);
            }
        }
    }

    // Axis permutations with their parity. Odd permutations swap the middle vertices to keep a
    // positive orientation.
    const PATHS: [([usize; 3], bool); 6] = [
        ([0, 1, 2], true),
        ([1, 2, 0], true),
        ([2, 0, 1], true),
        ([0, 2, 1], false),
        ([2, 1, 0], false),
        ([1, 0, 2], false),
    ];

    let mut tets = Vec::with_capacity(6 * res[0] * res[1] * res[2]);
    for k in 0..res[2] {
        for j in 0..res[1] {
            for i in 0..res[0] {
                for &(path, even) in PATHS.iter() {
                    let mut corner = [i, j, k];
                    let v0 = index(corner[0], corner[1], corner[2]);
                    corner[path[0]] += 1;
                    let v1 = index(corner[0], corner[1], corner[2]);
                    corner[path[1]] += 1;
                    let v2 = index(corner[0], corner[1], corner[2]);
                    let v3 = index(i + 1, j + 1, k + 1);
                    tets.push(if even { [v0, v1, v2, v3] } else { [v0, v2, v1, v3] });
                }
            }
        }
    }
    (nodes, tets)
}

/// Indices of nodes lying on the plane `x[axis] == value`.
pub fn nodes_on_plane(nodes: &[[f64; 3]], axis: usize, value: f64, tol: f64) -> Vec<usize> {
    nodes
        .iter()
        .enumerate()
        .filter(|(_, x)| (x[axis] - value).abs() <= tol)
        .map(|(i, _)| i)
        .collect()
}
