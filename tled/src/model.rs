//! Weak form model container: field nodes and integration points.

use na::Point3;

use crate::{Error, NeighborTopology};

/// A 3D model discretized for a weak form solution.
///
/// The model stores the field nodes in the reference configuration along with the integration
/// points used to evaluate the weak form. Each integration point carries the volume it
/// represents, which acts as its integration weight.
#[derive(Clone, Debug, PartialEq)]
pub struct WeakModel3D {
    nodes: Vec<Point3<f64>>,
    integ_points: Vec<Point3<f64>>,
    integ_weights: Vec<f64>,
}

impl WeakModel3D {
    /// Construct a new model.
    ///
    /// Returns an error if the number of integration weights doesn't match the number of
    /// integration points, or if any weight is negative or not finite.
    pub fn new(
        nodes: Vec<[f64; 3]>,
        integ_points: Vec<[f64; 3]>,
        integ_weights: Vec<f64>,
    ) -> Result<Self, Error> {
        if integ_points.len() != integ_weights.len() {
            return Err(Error::SizeMismatch {
                what: "integration weights",
                expected: integ_points.len(),
                actual: integ_weights.len(),
            });
        }
        if let Some(p) = integ_weights
            .iter()
            .position(|&w| !w.is_finite() || w < 0.0)
        {
            return Err(Error::config(format!(
                "invalid integration weight {} at point {}",
                integ_weights[p], p
            )));
        }
        Ok(WeakModel3D {
            nodes: nodes.into_iter().map(Point3::from).collect(),
            integ_points: integ_points.into_iter().map(Point3::from).collect(),
            integ_weights,
        })
    }

    #[inline]
    pub fn num_nodes(&self) -> usize {
        self.nodes.len()
    }

    #[inline]
    pub fn num_integ_points(&self) -> usize {
        self.integ_points.len()
    }

    /// Reference positions of the field nodes.
    #[inline]
    pub fn nodes(&self) -> &[Point3<f64>] {
        &self.nodes
    }

    #[inline]
    pub fn integ_points(&self) -> &[Point3<f64>] {
        &self.integ_points
    }

    /// Integration weights (represented volumes) of the integration points.
    #[inline]
    pub fn integ_weights(&self) -> &[f64] {
        &self.integ_weights
    }

    /// Total reference volume of the model.
    pub fn volume(&self) -> f64 {
        self.integ_weights.iter().sum()
    }

    /// Compute the lumped mass of each node.
    ///
    /// The mass represented by each integration point is split evenly among the nodes of its
    /// support domain.
    pub fn lumped_mass(&self, density: f64, support: &NeighborTopology) -> Result<Vec<f64>, Error> {
        if support.len() != self.num_integ_points() {
            return Err(Error::SizeMismatch {
                what: "integration point support domains",
                expected: self.num_integ_points(),
                actual: support.len(),
            });
        }

        let mut mass = vec![0.0; self.num_nodes()];
        for (point, (neighbors, &weight)) in support.iter().zip(self.integ_weights.iter()).enumerate() {
            if neighbors.is_empty() {
                return Err(Error::DegenerateSupportDomain { point });
            }
            let share = density * weight / neighbors.len() as f64;
            for &node in neighbors {
                let m = mass.get_mut(node).ok_or(Error::SizeMismatch {
                    what: "support domain node index",
                    expected: self.num_nodes(),
                    actual: node + 1,
                })?;
                *m += share;
            }
        }
        Ok(mass)
    }
}
