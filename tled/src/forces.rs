//! Internal force assembly for the Total Lagrangian formulation.

use std::ops::Range;

use na::Matrix3;

use crate::approximant::Approximant;
use crate::material::{MaterialError, NeoHookean};
use crate::model::WeakModel3D;
use crate::thread_loop::ThreadLoopManager;
use crate::{Error, NeighborTopology, NodalField};

/// Computes nodal internal forces from nodal displacements.
///
/// All spatial derivatives are taken with respect to the reference configuration, so the
/// derivative matrices of the approximant are reused for every step.
#[derive(Copy, Clone, Debug)]
pub struct ForceAssembler<'a> {
    model: &'a WeakModel3D,
    neighbor_ids: &'a NeighborTopology,
    approximant: &'a Approximant,
    material: &'a NeoHookean,
}

impl<'a> ForceAssembler<'a> {
    /// Create a force assembler over the integration points of `model`.
    ///
    /// `neighbor_ids[p]` lists the nodes whose derivatives are stored in the rows of the
    /// derivative matrix of point `p`.
    pub fn new(
        model: &'a WeakModel3D,
        neighbor_ids: &'a NeighborTopology,
        approximant: &'a Approximant,
        material: &'a NeoHookean,
    ) -> Result<Self, Error> {
        let num_points = model.num_integ_points();
        if neighbor_ids.len() != num_points {
            return Err(Error::SizeMismatch {
                what: "integration point support domains",
                expected: num_points,
                actual: neighbor_ids.len(),
            });
        }
        if approximant.num_points() != num_points {
            return Err(Error::SizeMismatch {
                what: "approximant points",
                expected: num_points,
                actual: approximant.num_points(),
            });
        }
        for (point, (neighbors, derivs)) in neighbor_ids
            .iter()
            .zip(approximant.derivatives().iter())
            .enumerate()
        {
            if neighbors.is_empty() {
                return Err(Error::DegenerateSupportDomain { point });
            }
            if neighbors.len() != derivs.nrows() {
                return Err(Error::SizeMismatch {
                    what: "derivative matrix rows",
                    expected: neighbors.len(),
                    actual: derivs.nrows(),
                });
            }
            if let Some(&node) = neighbors.iter().find(|&&n| n >= model.num_nodes()) {
                return Err(Error::SizeMismatch {
                    what: "support domain node index",
                    expected: model.num_nodes(),
                    actual: node + 1,
                });
            }
        }
        Ok(ForceAssembler {
            model,
            neighbor_ids,
            approximant,
            material,
        })
    }

    #[inline]
    pub fn num_nodes(&self) -> usize {
        self.model.num_nodes()
    }

    /// Deformation gradient `F = I + Σ_k u_k ⊗ ∇N_k` at the given integration point.
    #[allow(non_snake_case)]
    pub fn deformation_gradient(&self, point: usize, displacements: &NodalField) -> Matrix3<f64> {
        let derivs = &self.approximant.derivatives()[point];
        let mut F = Matrix3::identity();
        for (k, &node) in self.neighbor_ids[point].iter().enumerate() {
            for a in 0..3 {
                let u = displacements[(node, a)];
                for b in 0..3 {
                    F[(a, b)] += u * derivs[(k, b)];
                }
            }
        }
        F
    }

    /// Add the internal forces of a single integration point to `forces`.
    ///
    /// The force on the `k`-th support node is `w P ∇N_k`, the virtual work contraction of the
    /// first Piola-Kirchhoff stress with the reference shape function gradient.
    #[allow(non_snake_case)]
    pub fn add_point_forces(
        &self,
        point: usize,
        displacements: &NodalField,
        forces: &mut NodalField,
    ) -> Result<(), Error> {
        let F = self.deformation_gradient(point, displacements);
        let P = self
            .material
            .first_piola_kirchhoff(&F)
            .map_err(|MaterialError::Inverted { det }| Error::ElementInversion { point, det })?;
        let weight = self.model.integ_weights()[point];
        for (k, &node) in self.neighbor_ids[point].iter().enumerate() {
            let f = P * self.approximant.gradient(point, k) * weight;
            for a in 0..3 {
                forces[(node, a)] += f[a];
            }
        }
        Ok(())
    }

    /// Accumulate forces of a contiguous range of integration points into a fresh buffer.
    fn range_forces(&self, range: Range<usize>, displacements: &NodalField) -> Result<NodalField, Error> {
        let mut partial = NodalField::zeros(self.num_nodes(), 3);
        for point in range {
            self.add_point_forces(point, displacements, &mut partial)?;
        }
        Ok(partial)
    }

    /// Compute internal forces for all integration points on a single thread.
    pub fn compute_forces_serial(&self, displacements: &NodalField) -> Result<NodalField, Error> {
        self.check_displacements(displacements)?;
        self.range_forces(0..self.model.num_integ_points(), displacements)
    }

    /// Compute internal forces for all integration points, writing them into `forces`.
    ///
    /// Integration points are split into contiguous ranges, one per worker. Each worker
    /// accumulates into its own buffer, and the buffers are summed in worker order once all
    /// workers are done. For a fixed number of threads the result is deterministic.
    ///
    /// If any worker detects an inverted element, the first such error in worker order is
    /// returned and `forces` is left zeroed.
    pub fn compute_forces(
        &self,
        loop_manager: &ThreadLoopManager,
        displacements: &NodalField,
        forces: &mut NodalField,
    ) -> Result<(), Error> {
        self.check_displacements(displacements)?;
        if forces.shape() != (self.num_nodes(), 3) {
            *forces = NodalField::zeros(self.num_nodes(), 3);
        } else {
            forces.fill(0.0);
        }

        let partials = loop_manager.execute(self.model.num_integ_points(), |_, range| {
            if range.is_empty() {
                None
            } else {
                Some(self.range_forces(range, displacements))
            }
        });

        // Validate every partition before touching the output.
        let partials = partials
            .into_iter()
            .flatten()
            .collect::<Result<Vec<_>, Error>>()?;

        for partial in partials.iter() {
            *forces += partial;
        }
        Ok(())
    }

    fn check_displacements(&self, displacements: &NodalField) -> Result<(), Error> {
        if displacements.nrows() != self.num_nodes() {
            return Err(Error::SizeMismatch {
                what: "displacement rows",
                expected: self.num_nodes(),
                actual: displacements.nrows(),
            });
        }
        if displacements.ncols() != 3 {
            return Err(Error::SizeMismatch {
                what: "displacement columns",
                expected: 3,
                actual: displacements.ncols(),
            });
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_utils::*;
    use approx::*;

    #[test]
    fn rest_state_has_no_internal_force() -> Result<(), Error> {
        let (model, approx) = make_one_tet();
        let material = test_material();
        let assembler = ForceAssembler::new(&model, approx.support(), &approx, &material)?;
        let manager = ThreadLoopManager::new(1)?;
        let displacements = NodalField::zeros(4, 3);
        let mut forces = NodalField::from_element(4, 3, 1.0);
        assembler.compute_forces(&manager, &displacements, &mut forces)?;
        assert_relative_eq!(forces.norm(), 0.0, epsilon = 1e-12);
        Ok(())
    }

    #[test]
    fn rigid_translation_has_no_internal_force() -> Result<(), Error> {
        let (model, approx) = make_box([2, 2, 2], 0.5);
        let material = test_material();
        let assembler = ForceAssembler::new(&model, approx.support(), &approx, &material)?;
        let mut displacements = NodalField::zeros(model.num_nodes(), 3);
        for mut row in displacements.row_iter_mut() {
            row[0] = 0.3;
            row[1] = -1.2;
            row[2] = 0.05;
        }
        let forces = assembler.compute_forces_serial(&displacements)?;
        assert_relative_eq!(forces.norm(), 0.0, epsilon = 1e-9);
        Ok(())
    }

    #[test]
    fn stretched_tet_forces_are_balanced() -> Result<(), Error> {
        let (model, approx) = make_one_tet();
        let material = test_material();
        let assembler = ForceAssembler::new(&model, approx.support(), &approx, &material)?;
        let mut displacements = NodalField::zeros(4, 3);
        displacements[(3, 2)] = 0.2;
        let forces = assembler.compute_forces_serial(&displacements)?;
        // Internal forces of a single element sum to zero.
        for a in 0..3 {
            assert_relative_eq!(forces.column(a).sum(), 0.0, epsilon = 1e-9);
        }
        // Internal forces are subtracted from external ones, so a positive value resists the
        // stretch.
        assert!(forces[(3, 2)] > 0.0);
        Ok(())
    }

    /// Internal forces are the gradient of the stored elastic energy.
    #[test]
    fn forces_match_energy_gradient() -> Result<(), Error> {
        let (model, approx) = make_one_tet();
        let material = test_material();
        let assembler = ForceAssembler::new(&model, approx.support(), &approx, &material)?;
        let displacements = random_displacements(4, 0.05, 7);
        let forces = assembler.compute_forces_serial(&displacements)?;

        let energy = |u: &NodalField| {
            let f = assembler.deformation_gradient(0, u);
            model.integ_weights()[0] * material.energy_density(&f)
        };
        let h = 1e-6;
        for node in 0..4 {
            for a in 0..3 {
                let mut up = displacements.clone();
                let mut um = displacements.clone();
                up[(node, a)] += h;
                um[(node, a)] -= h;
                let fd = (energy(&up) - energy(&um)) / (2.0 * h);
                assert_relative_eq!(forces[(node, a)], fd, max_relative = 1e-5, epsilon = 1e-3);
            }
        }
        Ok(())
    }

    #[test]
    fn thread_count_does_not_change_forces() -> Result<(), Error> {
        let (model, approx) = make_box([3, 3, 3], 0.25);
        let material = test_material();
        let assembler = ForceAssembler::new(&model, approx.support(), &approx, &material)?;
        let displacements = random_displacements(model.num_nodes(), 0.01, 3);

        let mut reference = NodalField::zeros(0, 3);
        assembler.compute_forces(&ThreadLoopManager::new(1)?, &displacements, &mut reference)?;
        let scale = reference.norm();
        assert!(scale > 0.0);

        for threads in [2, 3, 4, 7] {
            let manager = ThreadLoopManager::new(threads)?;
            let mut forces = NodalField::zeros(model.num_nodes(), 3);
            assembler.compute_forces(&manager, &displacements, &mut forces)?;
            assert!((&forces - &reference).norm() < 1e-12 * scale);

            // Repeated assembly with the same partition is reproducible.
            let mut again = NodalField::zeros(model.num_nodes(), 3);
            assembler.compute_forces(&manager, &displacements, &mut again)?;
            assert_eq!(forces, again);
        }
        Ok(())
    }

    #[test]
    fn inversion_is_reported() -> Result<(), Error> {
        let (model, approx) = make_box([2, 1, 1], 1.0);
        let material = test_material();
        let assembler = ForceAssembler::new(&model, approx.support(), &approx, &material)?;
        let mut displacements = NodalField::zeros(model.num_nodes(), 3);
        // Push the far top corner through the bottom of the box.
        let corner = model.num_nodes() - 1;
        displacements[(corner, 2)] = -3.0;
        let mut forces = NodalField::from_element(model.num_nodes(), 3, 1.0);
        let result = assembler.compute_forces(&ThreadLoopManager::new(3)?, &displacements, &mut forces);
        match result {
            Err(Error::ElementInversion { det, .. }) => assert!(det <= 0.0),
            other => panic!("expected inversion, got {:?}", other),
        }
        assert_eq!(forces.norm(), 0.0);
        Ok(())
    }

    #[test]
    fn mismatched_support_is_rejected() {
        let (model, approx) = make_one_tet();
        let material = test_material();
        let neighbors = vec![vec![0, 1, 2]];
        assert!(matches!(
            ForceAssembler::new(&model, &neighbors, &approx, &material),
            Err(Error::SizeMismatch { .. })
        ));
    }
}
