//! Boundary conditions and external loads.

use std::collections::HashMap;

use na::{DMatrix, DVector};
use serde::{Deserialize, Serialize};

use crate::approximant::Approximant;
use crate::{Error, NeighborTopology, NodalField};

/// Time profile used to ramp a condition over the loading steps.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum LoadCurve {
    /// Linear ramp.
    Linear,
    /// Smooth quintic ramp `10τ³ - 15τ⁴ + 6τ⁵` with vanishing velocity and acceleration at both
    /// ends.
    Smooth,
}

impl Default for LoadCurve {
    fn default() -> Self {
        LoadCurve::Smooth
    }
}

impl LoadCurve {
    /// Fraction of the full load applied at `step` when the load is ramped over `load_steps`.
    ///
    /// Steps at or beyond `load_steps` get the full load.
    pub fn factor(&self, step: usize, load_steps: usize) -> f64 {
        if step >= load_steps {
            return 1.0;
        }
        let t = step as f64 / load_steps as f64;
        match self {
            LoadCurve::Linear => t,
            LoadCurve::Smooth => t * t * t * (10.0 - 15.0 * t + 6.0 * t * t),
        }
    }
}

/// Prescribed displacement on a set of nodes.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct BoundaryCondition {
    pub nodes: Vec<usize>,
    /// Prescribed displacement for each axis. `None` leaves the axis free.
    pub displacement: [Option<f64>; 3],
    pub curve: LoadCurve,
}

impl BoundaryCondition {
    /// Clamp all axes of the given nodes.
    pub fn fixed(nodes: Vec<usize>) -> Self {
        BoundaryCondition {
            nodes,
            displacement: [Some(0.0); 3],
            curve: LoadCurve::Smooth,
        }
    }

    pub fn prescribed(nodes: Vec<usize>, displacement: [Option<f64>; 3], curve: LoadCurve) -> Self {
        BoundaryCondition {
            nodes,
            displacement,
            curve,
        }
    }
}

/// External force applied to each node in a set.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ExternalLoad {
    pub nodes: Vec<usize>,
    pub force: [f64; 3],
    pub curve: LoadCurve,
}

/// Interface for applying boundary conditions and loads at a given explicit iteration.
pub trait ConditionsHandler {
    /// Check that all referenced nodes exist in a model with `num_nodes` nodes.
    fn validate(&self, num_nodes: usize) -> Result<(), Error>;

    /// Impose the prescribed displacements of `step` onto `displacements`.
    ///
    /// With `use_ebciem`, generalized displacements are corrected such that the interpolated
    /// displacement at each constrained node equals the prescribed value.
    fn apply_displacements(
        &self,
        step: usize,
        load_steps: usize,
        displacements: &mut NodalField,
        use_ebciem: bool,
    );

    /// Add the external forces of `step` to `forces`.
    fn add_external_forces(&self, step: usize, load_steps: usize, forces: &mut NodalField);

    /// Set the constrained components of `field` to zero.
    fn zero_constrained(&self, field: &mut NodalField);
}

/// Essential boundary correction of a single axis.
///
/// Holds the shape function rows of the constrained nodes and the factorized restriction of the
/// nodal shape function matrix to those nodes.
#[derive(Clone, Debug)]
struct AxisCorrection {
    nodes: Vec<usize>,
    /// Index of the boundary condition prescribing each node.
    sources: Vec<usize>,
    rows: Vec<(Vec<usize>, Vec<f64>)>,
    lu: na::linalg::LU<f64, na::Dyn, na::Dyn>,
}

impl AxisCorrection {
    /// Shift generalized values of the constrained nodes such that the interpolated values at
    /// those nodes equal `targets`. Returns `false` if the correction could not be computed.
    fn apply(&self, axis: usize, targets: &[f64], displacements: &mut NodalField) -> bool {
        let residual = DVector::from_iterator(
            self.nodes.len(),
            self.rows.iter().zip(targets.iter()).map(|((neighbors, values), &t)| {
                let interpolated: f64 = neighbors
                    .iter()
                    .zip(values.iter())
                    .map(|(&j, &n)| n * displacements[(j, axis)])
                    .sum();
                t - interpolated
            }),
        );
        match self.lu.solve(&residual) {
            Some(delta) => {
                for (&node, d) in self.nodes.iter().zip(delta.iter()) {
                    displacements[(node, axis)] += d;
                }
                true
            }
            None => false,
        }
    }
}

/// Default conditions handler for Dirichlet constraints and nodal loads.
#[derive(Clone, Debug, Default)]
pub struct Conditions {
    boundary: Vec<BoundaryCondition>,
    loads: Vec<ExternalLoad>,
    /// Per axis boundary corrections, present once prepared.
    corrections: Option<[Option<AxisCorrection>; 3]>,
}

impl Conditions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_boundary(mut self, bc: BoundaryCondition) -> Self {
        self.boundary.push(bc);
        self
    }

    pub fn with_load(mut self, load: ExternalLoad) -> Self {
        self.loads.push(load);
        self
    }

    pub fn boundary(&self) -> &[BoundaryCondition] {
        &self.boundary
    }

    pub fn loads(&self) -> &[ExternalLoad] {
        &self.loads
    }

    /// Prepare the essential boundary condition correction from nodal shape functions.
    ///
    /// `nodal_approximant` must be evaluated at the nodes of the model, such that point `i` is
    /// node `i` with support `nodal_neighbor_ids[i]`. For every axis, the shape function matrix
    /// restricted to the nodes constrained along that axis is factorized once here and reused
    /// at every step.
    pub fn prepare_ebciem(
        &mut self,
        nodal_neighbor_ids: &NeighborTopology,
        nodal_approximant: &Approximant,
    ) -> Result<(), Error> {
        if nodal_neighbor_ids.len() != nodal_approximant.num_points() {
            return Err(Error::SizeMismatch {
                what: "nodal support domains",
                expected: nodal_approximant.num_points(),
                actual: nodal_neighbor_ids.len(),
            });
        }
        self.validate(nodal_neighbor_ids.len())?;

        let mut corrections: [Option<AxisCorrection>; 3] = [None, None, None];
        for (axis, correction) in corrections.iter_mut().enumerate() {
            // Later conditions override earlier ones on the same node.
            let mut position = HashMap::new();
            let mut nodes = Vec::new();
            let mut sources = Vec::new();
            for (bc_idx, bc) in self.boundary.iter().enumerate() {
                if bc.displacement[axis].is_none() {
                    continue;
                }
                for &node in bc.nodes.iter() {
                    match position.get(&node) {
                        Some(&i) => sources[i] = bc_idx,
                        None => {
                            position.insert(node, nodes.len());
                            nodes.push(node);
                            sources.push(bc_idx);
                        }
                    }
                }
            }
            if nodes.is_empty() {
                continue;
            }

            let mut rows = Vec::with_capacity(nodes.len());
            let mut matrix = DMatrix::zeros(nodes.len(), nodes.len());
            for (i, &node) in nodes.iter().enumerate() {
                let neighbors = &nodal_neighbor_ids[node];
                let values = nodal_approximant.shape_functions()[node].as_slice();
                if values.len() != neighbors.len() {
                    return Err(Error::SizeMismatch {
                        what: "nodal shape function values",
                        expected: neighbors.len(),
                        actual: values.len(),
                    });
                }
                for (&j, &n) in neighbors.iter().zip(values.iter()) {
                    if let Some(&col) = position.get(&j) {
                        matrix[(i, col)] += n;
                    }
                }
                rows.push((neighbors.clone(), values.to_vec()));
            }

            let lu = matrix.lu();
            if !lu.is_invertible() {
                return Err(Error::config(format!(
                    "shape functions of the nodes constrained along axis {} are linearly dependent",
                    axis
                )));
            }
            *correction = Some(AxisCorrection {
                nodes,
                sources,
                rows,
                lu,
            });
        }

        log::debug!(
            "Prepared boundary correction for {:?} constrained values per axis",
            [0, 1, 2].map(|a| corrections[a].as_ref().map_or(0, |c| c.nodes.len()))
        );
        self.corrections = Some(corrections);
        Ok(())
    }

    /// Whether the essential boundary correction is prepared.
    pub fn has_ebciem(&self) -> bool {
        self.corrections.is_some()
    }

    fn constrained_components(&self) -> impl Iterator<Item = (usize, usize, &BoundaryCondition)> + '_ {
        self.boundary.iter().flat_map(|bc| {
            bc.nodes.iter().flat_map(move |&node| {
                (0..3)
                    .filter(move |&axis| bc.displacement[axis].is_some())
                    .map(move |axis| (node, axis, bc))
            })
        })
    }
}

impl ConditionsHandler for Conditions {
    fn validate(&self, num_nodes: usize) -> Result<(), Error> {
        let nodes = self
            .boundary
            .iter()
            .flat_map(|bc| bc.nodes.iter())
            .chain(self.loads.iter().flat_map(|l| l.nodes.iter()));
        for &node in nodes {
            if node >= num_nodes {
                return Err(Error::SizeMismatch {
                    what: "condition node index",
                    expected: num_nodes,
                    actual: node + 1,
                });
            }
        }
        Ok(())
    }

    fn apply_displacements(
        &self,
        step: usize,
        load_steps: usize,
        displacements: &mut NodalField,
        use_ebciem: bool,
    ) {
        let target = |bc: &BoundaryCondition, axis: usize| {
            bc.displacement[axis].unwrap_or(0.0) * bc.curve.factor(step, load_steps)
        };

        if let Some(corrections) = self.corrections.as_ref().filter(|_| use_ebciem) {
            let mut corrected = [true; 3];
            for (axis, correction) in corrections.iter().enumerate() {
                if let Some(correction) = correction {
                    let targets: Vec<f64> = correction
                        .sources
                        .iter()
                        .map(|&bc_idx| target(&self.boundary[bc_idx], axis))
                        .collect();
                    corrected[axis] = correction.apply(axis, &targets, displacements);
                }
            }
            if corrected.iter().all(|&c| c) {
                return;
            }
            log::warn!("Boundary correction failed at step {}, imposing values directly", step);
        }

        for (node, axis, bc) in self.constrained_components() {
            displacements[(node, axis)] = target(bc, axis);
        }
    }

    fn add_external_forces(&self, step: usize, load_steps: usize, forces: &mut NodalField) {
        for load in self.loads.iter() {
            let factor = load.curve.factor(step, load_steps);
            for &node in load.nodes.iter() {
                for axis in 0..3 {
                    forces[(node, axis)] += load.force[axis] * factor;
                }
            }
        }
    }

    fn zero_constrained(&self, field: &mut NodalField) {
        for (node, axis, _) in self.constrained_components() {
            field[(node, axis)] = 0.0;
        }
    }
}
