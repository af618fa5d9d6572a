//! Critical time step estimation for the explicit scheme.

use crate::approximant::{Approximant, LengthMeasure};
use crate::model::WeakModel3D;
use crate::{Error, NeighborTopology};

/// Compute the total number of explicit time steps.
///
/// This is the number of steps over which the load is applied plus the number of steps given to
/// dynamic relaxation to reach equilibrium.
#[inline]
pub fn compute_total_time_steps_num(load_steps_num: usize, equilibrium_steps_num: usize) -> usize {
    load_steps_num + equilibrium_steps_num
}

/// Per node critical time steps along with the global bounds derived from them.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct TimeSteps {
    steps: Vec<f64>,
    min_step: f64,
    max_step: f64,
    stable_step: Option<f64>,
    /// Nodal mass the stable step was derived for. This is the scaled mass if mass scaling was
    /// requested.
    mass: Option<Vec<f64>>,
    is_mass_scaled: bool,
}

impl TimeSteps {
    /// Compute the critical time step of each node of the model.
    ///
    /// The critical step is the characteristic length of the node divided by its wave speed.
    /// Meshfree approximants use the smallest distance between a node and its neighbors, while
    /// finite elements use the smallest height of the elements containing the node.
    pub fn compute(
        model: &WeakModel3D,
        wave_speed: &[f64],
        neighbor_ids: &NeighborTopology,
        approximant: &Approximant,
    ) -> Result<Self, Error> {
        let num_nodes = model.num_nodes();
        if wave_speed.len() != num_nodes {
            return Err(Error::SizeMismatch {
                what: "wave speeds",
                expected: num_nodes,
                actual: wave_speed.len(),
            });
        }
        if neighbor_ids.len() != num_nodes {
            return Err(Error::SizeMismatch {
                what: "nodal support domains",
                expected: num_nodes,
                actual: neighbor_ids.len(),
            });
        }
        if let Some(node) = wave_speed.iter().position(|&c| !(c > 0.0) || !c.is_finite()) {
            return Err(Error::config(format!(
                "invalid wave speed {} at node {}",
                wave_speed[node], node
            )));
        }

        let lengths = match approximant.kind().length_measure() {
            LengthMeasure::NeighborDistance => neighbor_distances(model, neighbor_ids)?,
            LengthMeasure::ElementHeight => element_heights(num_nodes, neighbor_ids, approximant)?,
        };

        let steps: Vec<f64> = lengths
            .iter()
            .zip(wave_speed.iter())
            .map(|(&h, &c)| h / c)
            .collect();

        let (min_step, max_step) = steps
            .iter()
            .fold((f64::INFINITY, 0.0_f64), |(lo, hi), &dt| (lo.min(dt), hi.max(dt)));

        log::debug!(
            "Critical time steps over {} nodes: min = {:e}, max = {:e}",
            num_nodes,
            min_step,
            max_step
        );

        Ok(TimeSteps {
            steps,
            min_step,
            max_step,
            stable_step: None,
            mass: None,
            is_mass_scaled: false,
        })
    }

    /// Compute the stable step given the nodal mass.
    ///
    /// Without mass scaling, the stable step is the minimum critical step divided by the safety
    /// factor. With mass scaling, each nodal mass is scaled by `(max_step / dt_i)²`, which raises
    /// the critical step of every node to the maximum one since the critical step grows with the
    /// square root of the mass to stiffness ratio. The scaled mass is retained for the solve.
    pub fn compute_stable_step(
        &mut self,
        mass: &[f64],
        is_mass_scaled: bool,
        safety_factor: f64,
    ) -> Result<f64, Error> {
        if self.steps.is_empty() {
            return Err(Error::config(
                "critical time steps must be computed before the stable step",
            ));
        }
        if !(safety_factor >= 1.0) || !safety_factor.is_finite() {
            return Err(Error::config(format!(
                "safety factor must be a finite number not less than 1, got {}",
                safety_factor
            )));
        }
        if mass.len() != self.steps.len() {
            return Err(Error::SizeMismatch {
                what: "nodal mass",
                expected: self.steps.len(),
                actual: mass.len(),
            });
        }
        if let Some(node) = mass.iter().position(|&m| !(m > 0.0) || !m.is_finite()) {
            return Err(Error::config(format!(
                "invalid mass {} at node {}",
                mass[node], node
            )));
        }

        let (stable_step, mass) = if is_mass_scaled {
            let scaled = self.scaled_mass(mass)?;
            let min_scaled_step = scaled
                .iter()
                .zip(mass.iter())
                .zip(self.steps.iter())
                .map(|((&ms, &m), &dt)| dt * (ms / m).sqrt())
                .fold(f64::INFINITY, f64::min);
            (min_scaled_step / safety_factor, scaled)
        } else {
            (self.min_step / safety_factor, mass.to_vec())
        };

        log::info!(
            "Stable time step: {:e} (mass scaled: {}, safety factor: {})",
            stable_step,
            is_mass_scaled,
            safety_factor
        );

        self.stable_step = Some(stable_step);
        self.mass = Some(mass);
        self.is_mass_scaled = is_mass_scaled;
        Ok(stable_step)
    }

    /// Scale each nodal mass by `(max_step / dt_i)²`.
    pub fn scaled_mass(&self, mass: &[f64]) -> Result<Vec<f64>, Error> {
        if self.steps.is_empty() {
            return Err(Error::config(
                "critical time steps must be computed before scaling the mass",
            ));
        }
        if mass.len() != self.steps.len() {
            return Err(Error::SizeMismatch {
                what: "nodal mass",
                expected: self.steps.len(),
                actual: mass.len(),
            });
        }
        let max_step = self.max_step;
        Ok(mass
            .iter()
            .zip(self.steps.iter())
            .map(|(&m, &dt)| m * (max_step / dt).powi(2))
            .collect())
    }

    /// Override the stable step.
    pub fn set_stable_step(&mut self, stable_step: f64) -> Result<(), Error> {
        if !(stable_step > 0.0) || !stable_step.is_finite() {
            return Err(Error::config(format!(
                "stable step must be positive and finite, got {}",
                stable_step
            )));
        }
        self.stable_step = Some(stable_step);
        Ok(())
    }

    /// Critical time step of each node.
    #[inline]
    pub fn steps(&self) -> &[f64] {
        &self.steps
    }

    #[inline]
    pub fn min_step(&self) -> f64 {
        self.min_step
    }

    #[inline]
    pub fn max_step(&self) -> f64 {
        self.max_step
    }

    #[inline]
    pub fn stable_step(&self) -> Option<f64> {
        self.stable_step
    }

    /// The nodal mass associated with the stable step, if computed.
    #[inline]
    pub fn mass(&self) -> Option<&[f64]> {
        self.mass.as_deref()
    }

    /// Whether the retained mass was scaled.
    #[inline]
    pub fn is_mass_scaled(&self) -> bool {
        self.is_mass_scaled
    }
}

/// Smallest non-zero distance from each node to the nodes of its support domain.
fn neighbor_distances(model: &WeakModel3D, neighbor_ids: &NeighborTopology) -> Result<Vec<f64>, Error> {
    let nodes = model.nodes();
    neighbor_ids
        .iter()
        .enumerate()
        .map(|(node, neighbors)| {
            let mut min_dist = f64::INFINITY;
            for &j in neighbors {
                let other = nodes.get(j).ok_or(Error::SizeMismatch {
                    what: "support domain node index",
                    expected: nodes.len(),
                    actual: j + 1,
                })?;
                let dist = (*other - nodes[node]).norm();
                if dist > 0.0 {
                    min_dist = min_dist.min(dist);
                }
            }
            if min_dist.is_finite() {
                Ok(min_dist)
            } else {
                Err(Error::DegenerateSupportDomain { point: node })
            }
        })
        .collect()
}

/// Smallest height among the elements containing each node.
fn element_heights(
    num_nodes: usize,
    neighbor_ids: &NeighborTopology,
    approximant: &Approximant,
) -> Result<Vec<f64>, Error> {
    let mut heights = vec![f64::INFINITY; num_nodes];
    for (point, support) in approximant.support().iter().enumerate() {
        let h = approximant.element_height(point);
        for &node in support {
            let entry = heights.get_mut(node).ok_or(Error::SizeMismatch {
                what: "element node index",
                expected: num_nodes,
                actual: node + 1,
            })?;
            *entry = entry.min(h);
        }
    }

    for (node, (h, neighbors)) in heights.iter().zip(neighbor_ids.iter()).enumerate() {
        if neighbors.is_empty() || !h.is_finite() || !(*h > 0.0) {
            return Err(Error::DegenerateSupportDomain { point: node });
        }
    }
    Ok(heights)
}
