//! Shape function approximants consumed by the solver.
//!
//! The solver never evaluates basis functions itself. It consumes the shape function values and
//! their spatial derivatives at each point of a support domain, as produced by a meshfree or a
//! finite element approximation.

use na::{DMatrix, DVector, Vector3};
use serde::{Deserialize, Serialize};

use crate::{Error, NeighborTopology};

/// Finite element types.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum FemType {
    /// Linear tetrahedron with 4 nodes.
    Tet4,
    /// Trilinear hexahedron with 8 nodes.
    Hex8,
}

impl FemType {
    pub fn nodes_per_element(&self) -> usize {
        match self {
            FemType::Tet4 => 4,
            FemType::Hex8 => 8,
        }
    }
}

/// The kind of approximation producing the shape functions.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum ApproximantKind {
    /// Modified moving least squares.
    Mmls,
    /// Radial point interpolation.
    Rpi,
    /// Finite elements of the given type.
    Fem(FemType),
}

/// Measure of the characteristic length used for critical time step estimation.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum LengthMeasure {
    /// Smallest distance between a node and the nodes of its support domain.
    NeighborDistance,
    /// Smallest element height, recovered from the shape function derivatives.
    ElementHeight,
}

impl ApproximantKind {
    /// Whether shape functions satisfy the Kronecker delta property.
    ///
    /// Without it, computed nodal values are generalized and must be interpolated to recover
    /// physical values.
    pub fn has_kronecker(&self) -> bool {
        match self {
            ApproximantKind::Mmls => false,
            ApproximantKind::Rpi | ApproximantKind::Fem(_) => true,
        }
    }

    pub fn length_measure(&self) -> LengthMeasure {
        match self {
            ApproximantKind::Mmls | ApproximantKind::Rpi => LengthMeasure::NeighborDistance,
            ApproximantKind::Fem(_) => LengthMeasure::ElementHeight,
        }
    }

    pub fn is_meshfree(&self) -> bool {
        !matches!(self, ApproximantKind::Fem(_))
    }
}

/// Shape function values and first derivatives over the support domains of a set of points.
///
/// Entry `k` of the values vector and row `k` of the derivative matrix of point `p` correspond
/// to node `support[p][k]`.
#[derive(Clone, Debug, PartialEq)]
pub struct Approximant {
    kind: ApproximantKind,
    support: NeighborTopology,
    shape_functions: Vec<DVector<f64>>,
    derivatives: Vec<DMatrix<f64>>,
}

impl Approximant {
    /// Construct a new approximant from precomputed values.
    ///
    /// Every point must have a non-empty support domain whose size matches the number of shape
    /// function values and the number of rows of its 3 column derivative matrix. Finite element
    /// supports must additionally match the number of nodes of the element type.
    pub fn new(
        kind: ApproximantKind,
        support: NeighborTopology,
        shape_functions: Vec<DVector<f64>>,
        derivatives: Vec<DMatrix<f64>>,
    ) -> Result<Self, Error> {
        let n = support.len();
        if shape_functions.len() != n {
            return Err(Error::SizeMismatch {
                what: "shape function sets",
                expected: n,
                actual: shape_functions.len(),
            });
        }
        if derivatives.len() != n {
            return Err(Error::SizeMismatch {
                what: "derivative matrices",
                expected: n,
                actual: derivatives.len(),
            });
        }

        for (point, ((neighbors, values), derivs)) in support
            .iter()
            .zip(shape_functions.iter())
            .zip(derivatives.iter())
            .enumerate()
        {
            if neighbors.is_empty() {
                return Err(Error::DegenerateSupportDomain { point });
            }
            if values.len() != neighbors.len() {
                return Err(Error::SizeMismatch {
                    what: "shape function values",
                    expected: neighbors.len(),
                    actual: values.len(),
                });
            }
            if derivs.nrows() != neighbors.len() {
                return Err(Error::SizeMismatch {
                    what: "derivative matrix rows",
                    expected: neighbors.len(),
                    actual: derivs.nrows(),
                });
            }
            if derivs.ncols() != 3 {
                return Err(Error::SizeMismatch {
                    what: "derivative matrix columns",
                    expected: 3,
                    actual: derivs.ncols(),
                });
            }
            if let ApproximantKind::Fem(ty) = kind {
                if neighbors.len() != ty.nodes_per_element() {
                    return Err(Error::SizeMismatch {
                        what: "element nodes",
                        expected: ty.nodes_per_element(),
                        actual: neighbors.len(),
                    });
                }
            }
        }

        Ok(Approximant {
            kind,
            support,
            shape_functions,
            derivatives,
        })
    }

    #[inline]
    pub fn kind(&self) -> ApproximantKind {
        self.kind
    }

    #[inline]
    pub fn has_kronecker(&self) -> bool {
        self.kind.has_kronecker()
    }

    #[inline]
    pub fn num_points(&self) -> usize {
        self.support.len()
    }

    #[inline]
    pub fn support(&self) -> &NeighborTopology {
        &self.support
    }

    #[inline]
    pub fn shape_functions(&self) -> &[DVector<f64>] {
        &self.shape_functions
    }

    /// Derivative matrices with columns ∂N/∂x, ∂N/∂y and ∂N/∂z.
    #[inline]
    pub fn derivatives(&self) -> &[DMatrix<f64>] {
        &self.derivatives
    }

    /// Gradient of the `k`-th shape function of the support domain of `point`.
    #[inline]
    pub fn gradient(&self, point: usize, k: usize) -> Vector3<f64> {
        let d = &self.derivatives[point];
        Vector3::new(d[(k, 0)], d[(k, 1)], d[(k, 2)])
    }

    /// Element height at the given point.
    ///
    /// For a linear tetrahedron the magnitude of a shape function gradient is the reciprocal of
    /// the height of the element above the face opposite to that node, so the reciprocal of the
    /// largest gradient is the smallest height. Returns infinity if all gradients vanish.
    pub fn element_height(&self, point: usize) -> f64 {
        let max_grad = (0..self.support[point].len())
            .map(|k| self.gradient(point, k).norm())
            .fold(0.0_f64, f64::max);
        if max_grad > 0.0 {
            1.0 / max_grad
        } else {
            f64::INFINITY
        }
    }
}
