//! Explicit time marching with dynamic relaxation.

use serde::{Deserialize, Serialize};

use crate::approximant::Approximant;
use crate::conditions::ConditionsHandler;
use crate::forces::ForceAssembler;
use crate::material::NeoHookean;
use crate::model::WeakModel3D;
use crate::relaxation::{DynRelaxProp, DynamicRelaxationController};
use crate::thread_loop::ThreadLoopManager;
use crate::time_step::{self, TimeSteps};
use crate::{inf_norm, Error, NeighborTopology, NodalField};

/// Parameters of the explicit solver.
#[derive(Copy, Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct SimParams {
    /// Number of worker threads used for force assembly. All logical cores are used if not given.
    pub threads: Option<usize>,
    /// Number of iterations between consecutive snapshots.
    pub save_progress_steps: usize,
    /// Number of iterations over which boundary conditions and loads are ramped up.
    pub load_steps_num: usize,
    /// Number of iterations given to dynamic relaxation after loading.
    pub equilibrium_steps_num: usize,
}

impl Default for SimParams {
    fn default() -> Self {
        SimParams {
            threads: None,
            save_progress_steps: 1,
            load_steps_num: 0,
            equilibrium_steps_num: 0,
        }
    }
}

/// Arguments passed to the progress callback after every iteration.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct ProgressArgs {
    /// Number of completed iterations.
    pub iteration: usize,
    pub total: usize,
}

pub type Callback = Box<dyn FnMut(ProgressArgs) + Send + 'static>;

/// Saved state of the solver after a given number of iterations.
#[derive(Clone, Debug, PartialEq)]
pub struct Snapshot {
    /// Number of completed iterations when the snapshot was taken.
    pub step: usize,
    pub displacements: NodalField,
    /// Internal forces used to advance to this state.
    pub forces: NodalField,
}

#[derive(Copy, Clone, Debug, PartialEq)]
pub struct SolveResult {
    /// Number of completed iterations.
    pub iterations: usize,
    /// Number of saved snapshots.
    pub snapshots: usize,
    /// Time step used for every iteration.
    pub time_step: f64,
    /// Largest absolute displacement component at the end of the solve.
    pub max_displacement: f64,
}

impl std::fmt::Display for SolveResult {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "Iterations: {}\nSnapshots: {}\nTime step: {:e}\nMax displacement: {:e}",
            self.iterations, self.snapshots, self.time_step, self.max_displacement
        )
    }
}

/// Total Lagrangian explicit dynamics solver.
///
/// A typical run computes the critical time steps of the model, derives the stable step,
/// fixes the number of iterations and then calls [`solve`](ExplicitSolver::solve).
pub struct ExplicitSolver {
    loop_manager: ThreadLoopManager,
    time_steps: TimeSteps,
    load_steps_num: usize,
    total_time_steps_num: usize,
    save_progress_steps: usize,
    snapshots: Vec<Snapshot>,
    /// Number of loading iterations the saved snapshots were produced with.
    solved_load_steps_num: usize,
    /// Set once saved displacements are converted to physical values.
    shape_func_applied: bool,
    progress: Option<Callback>,
}

impl std::fmt::Debug for ExplicitSolver {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ExplicitSolver")
            .field("loop_manager", &self.loop_manager)
            .field("time_steps", &self.time_steps)
            .field("load_steps_num", &self.load_steps_num)
            .field("total_time_steps_num", &self.total_time_steps_num)
            .field("save_progress_steps", &self.save_progress_steps)
            .field("snapshots", &self.snapshots.len())
            .field("solved_load_steps_num", &self.solved_load_steps_num)
            .field("shape_func_applied", &self.shape_func_applied)
            .finish()
    }
}

impl ExplicitSolver {
    pub fn new(params: SimParams) -> Result<Self, Error> {
        let loop_manager = match params.threads {
            Some(threads) => ThreadLoopManager::new(threads)?,
            None => ThreadLoopManager::with_available_threads()?,
        };
        Ok(ExplicitSolver {
            loop_manager,
            time_steps: TimeSteps::default(),
            load_steps_num: params.load_steps_num,
            total_time_steps_num: time_step::compute_total_time_steps_num(
                params.load_steps_num,
                params.equilibrium_steps_num,
            ),
            save_progress_steps: params.save_progress_steps,
            snapshots: Vec::new(),
            solved_load_steps_num: params.load_steps_num,
            shape_func_applied: false,
            progress: None,
        })
    }

    /// Register a callback invoked after every iteration.
    pub fn set_progress_callback<F>(&mut self, callback: F)
    where
        F: FnMut(ProgressArgs) + Send + 'static,
    {
        self.progress = Some(Box::new(callback));
    }

    /// Compute the critical time step of every node.
    ///
    /// `neighbor_ids` gives the support domain of each node.
    pub fn compute_time_steps(
        &mut self,
        model: &WeakModel3D,
        wave_speed: &[f64],
        neighbor_ids: &NeighborTopology,
        approximant: &Approximant,
    ) -> Result<(), Error> {
        self.time_steps = TimeSteps::compute(model, wave_speed, neighbor_ids, approximant)?;
        Ok(())
    }

    /// Compute the stable time step from the previously computed critical steps.
    ///
    /// The resulting nodal mass, scaled if requested, is used by subsequent solves.
    pub fn compute_stable_step(
        &mut self,
        mass: &[f64],
        is_mass_scaled: bool,
        safety_factor: f64,
    ) -> Result<f64, Error> {
        self.time_steps
            .compute_stable_step(mass, is_mass_scaled, safety_factor)
    }

    pub fn set_stable_step(&mut self, stable_step: f64) -> Result<(), Error> {
        self.time_steps.set_stable_step(stable_step)
    }

    /// Set the number of loading and equilibrium iterations, returning their total.
    pub fn compute_total_time_steps_num(
        &mut self,
        load_steps_num: usize,
        equilibrium_steps_num: usize,
    ) -> usize {
        self.load_steps_num = load_steps_num;
        self.total_time_steps_num =
            time_step::compute_total_time_steps_num(load_steps_num, equilibrium_steps_num);
        self.total_time_steps_num
    }

    pub fn set_save_progress_steps(&mut self, save_progress_steps: usize) {
        self.save_progress_steps = save_progress_steps;
    }

    /// Run the explicit loop for the configured number of iterations.
    ///
    /// Each iteration computes the internal forces of the current displacements, advances the
    /// velocities and displacements with the damped central difference update and imposes the
    /// boundary conditions of the next step. A snapshot is saved every `save_progress_steps`
    /// iterations.
    ///
    /// The nodal mass is the one retained by [`compute_stable_step`](Self::compute_stable_step),
    /// which must agree with `relax_props` on mass scaling. If the stable step was only set
    /// directly, the lumped mass is used, scaled when `relax_props` asks for it.
    ///
    /// Previously saved snapshots are discarded. If force computation fails, the error is
    /// returned immediately and the snapshots saved so far are kept.
    #[allow(clippy::too_many_arguments)]
    pub fn solve<C: ConditionsHandler + ?Sized>(
        &mut self,
        model: &WeakModel3D,
        neighbor_ids: &NeighborTopology,
        conditions: &C,
        approximant: &Approximant,
        material: &NeoHookean,
        relax_props: &DynRelaxProp,
        use_ebciem: bool,
    ) -> Result<SolveResult, Error> {
        self.snapshots.clear();
        self.shape_func_applied = false;

        let stable_step = self.time_steps.stable_step().ok_or_else(|| {
            Error::config("stable time step must be computed or set before solving")
        })?;
        let total = self.total_time_steps_num;
        if total == 0 {
            return Err(Error::config("total number of time steps must be positive"));
        }
        if self.save_progress_steps == 0 {
            return Err(Error::config("save progress steps must be positive"));
        }

        let num_nodes = model.num_nodes();
        conditions.validate(num_nodes)?;

        let mass = match self.time_steps.mass() {
            Some(mass) => {
                if self.time_steps.is_mass_scaled() != relax_props.is_mass_scaled {
                    return Err(Error::config(format!(
                        "stable step was computed with mass scaling {}, but relaxation properties request {}",
                        if self.time_steps.is_mass_scaled() { "on" } else { "off" },
                        if relax_props.is_mass_scaled { "on" } else { "off" },
                    )));
                }
                mass.to_vec()
            }
            None => {
                let lumped = model.lumped_mass(material.density, neighbor_ids)?;
                if relax_props.is_mass_scaled {
                    self.time_steps.scaled_mass(&lumped)?
                } else {
                    lumped
                }
            }
        };
        if mass.len() != num_nodes {
            return Err(Error::SizeMismatch {
                what: "nodal mass",
                expected: num_nodes,
                actual: mass.len(),
            });
        }
        if let Some(node) = mass.iter().position(|&m| !(m > 0.0) || !m.is_finite()) {
            return Err(Error::config(format!(
                "node {} has invalid mass {}",
                node, mass[node]
            )));
        }

        let assembler = ForceAssembler::new(model, neighbor_ids, approximant, material)?;
        let controller =
            DynamicRelaxationController::new(*relax_props, stable_step, self.load_steps_num)?;
        let load_steps = self.load_steps_num;
        self.solved_load_steps_num = load_steps;

        log::info!(
            "Solving {} nodes with {} integration points: {} iterations ({} loading) at dt = {:e} on {} threads",
            num_nodes,
            model.num_integ_points(),
            total,
            load_steps,
            stable_step,
            self.loop_manager.threads_number()
        );

        let mut displacements = NodalField::zeros(num_nodes, 3);
        let mut velocities = NodalField::zeros(num_nodes, 3);
        let mut accelerations = NodalField::zeros(num_nodes, 3);
        let mut internal_forces = NodalField::zeros(num_nodes, 3);
        let mut external_forces = NodalField::zeros(num_nodes, 3);

        conditions.apply_displacements(0, load_steps, &mut displacements, use_ebciem);

        let mut warned_non_finite = false;

        for iteration in 0..total {
            assembler.compute_forces(&self.loop_manager, &displacements, &mut internal_forces)?;

            external_forces.fill(0.0);
            conditions.add_external_forces(iteration, load_steps, &mut external_forces);

            let coef = controller.coefficients(iteration);
            for (node, &m) in mass.iter().enumerate() {
                for axis in 0..3 {
                    let a = (external_forces[(node, axis)] - internal_forces[(node, axis)]) / m;
                    accelerations[(node, axis)] = a;
                    let v = coef.velocity_factor * velocities[(node, axis)]
                        + coef.acceleration_factor * a;
                    velocities[(node, axis)] = v;
                    displacements[(node, axis)] += v * coef.time_step;
                }
            }

            conditions.apply_displacements(iteration + 1, load_steps, &mut displacements, use_ebciem);
            conditions.zero_constrained(&mut velocities);

            if !warned_non_finite && displacements.iter().any(|d| !d.is_finite()) {
                log::warn!(
                    "Non-finite displacement encountered at iteration {}; the time step may be unstable",
                    iteration
                );
                warned_non_finite = true;
            }

            if (iteration + 1) % self.save_progress_steps == 0 {
                log::trace!("Saving snapshot at step {}", iteration + 1);
                self.snapshots.push(Snapshot {
                    step: iteration + 1,
                    displacements: displacements.clone(),
                    forces: internal_forces.clone(),
                });
            }

            if let Some(progress) = self.progress.as_mut() {
                progress(ProgressArgs {
                    iteration: iteration + 1,
                    total,
                });
            }

            if iteration + 1 == load_steps {
                log::debug!("Loading complete after {} iterations", load_steps);
            }
        }

        let result = SolveResult {
            iterations: total,
            snapshots: self.snapshots.len(),
            time_step: stable_step,
            max_displacement: inf_norm(displacements.iter().cloned()),
        };
        log::debug!(
            "Final max acceleration: {:e}",
            inf_norm(accelerations.iter().cloned())
        );
        log::info!("Solve finished\n{}", result);
        Ok(result)
    }

    /// Convert saved generalized displacements to physical displacements at the nodes.
    ///
    /// `nodal_approximant` must be evaluated at the nodes, such that its point `i` is node `i`
    /// with support `nodal_neighbor_ids[i]`. After interpolation, the prescribed displacements
    /// of the step of each snapshot are imposed exactly. This does nothing for approximants with
    /// the Kronecker delta property, and does nothing when called again after a conversion.
    pub fn apply_shape_func_to_displacements<C: ConditionsHandler + ?Sized>(
        &mut self,
        nodal_neighbor_ids: &NeighborTopology,
        nodal_approximant: &Approximant,
        conditions: &C,
    ) -> Result<(), Error> {
        if nodal_approximant.has_kronecker() {
            log::debug!(
                "{:?} shape functions interpolate nodal values, displacements are already physical",
                nodal_approximant.kind()
            );
            return Ok(());
        }
        if self.shape_func_applied {
            log::info!("Shape functions were already applied to saved displacements");
            return Ok(());
        }

        conditions.validate(nodal_neighbor_ids.len())?;
        if nodal_neighbor_ids.len() != nodal_approximant.num_points() {
            return Err(Error::SizeMismatch {
                what: "nodal support domains",
                expected: nodal_approximant.num_points(),
                actual: nodal_neighbor_ids.len(),
            });
        }
        let shape_functions = nodal_approximant.shape_functions();
        for (node, (neighbors, values)) in nodal_neighbor_ids
            .iter()
            .zip(shape_functions.iter())
            .enumerate()
        {
            if neighbors.is_empty() {
                return Err(Error::DegenerateSupportDomain { point: node });
            }
            if neighbors.len() != values.len() {
                return Err(Error::SizeMismatch {
                    what: "nodal shape function values",
                    expected: neighbors.len(),
                    actual: values.len(),
                });
            }
        }

        let load_steps = self.solved_load_steps_num;
        for snapshot in self.snapshots.iter_mut() {
            let generalized = &snapshot.displacements;
            if let Some(&node) = nodal_neighbor_ids
                .iter()
                .flatten()
                .find(|&&j| j >= generalized.nrows())
            {
                return Err(Error::SizeMismatch {
                    what: "nodal support node index",
                    expected: generalized.nrows(),
                    actual: node + 1,
                });
            }
            let mut physical = NodalField::zeros(nodal_neighbor_ids.len(), 3);
            for (node, (neighbors, values)) in nodal_neighbor_ids
                .iter()
                .zip(shape_functions.iter())
                .enumerate()
            {
                for (&j, &n) in neighbors.iter().zip(values.iter()) {
                    for axis in 0..3 {
                        physical[(node, axis)] += n * generalized[(j, axis)];
                    }
                }
            }
            conditions.apply_displacements(snapshot.step, load_steps, &mut physical, false);
            snapshot.displacements = physical;
        }

        log::debug!(
            "Applied shape functions to {} saved displacements",
            self.snapshots.len()
        );
        self.shape_func_applied = true;
        Ok(())
    }

    #[inline]
    pub fn time_steps(&self) -> &TimeSteps {
        &self.time_steps
    }

    #[inline]
    pub fn min_step(&self) -> f64 {
        self.time_steps.min_step()
    }

    #[inline]
    pub fn max_step(&self) -> f64 {
        self.time_steps.max_step()
    }

    #[inline]
    pub fn stable_step(&self) -> Option<f64> {
        self.time_steps.stable_step()
    }

    #[inline]
    pub fn load_steps_num(&self) -> usize {
        self.load_steps_num
    }

    #[inline]
    pub fn total_time_steps_num(&self) -> usize {
        self.total_time_steps_num
    }

    #[inline]
    pub fn save_progress_steps(&self) -> usize {
        self.save_progress_steps
    }

    #[inline]
    pub fn threads_number(&self) -> usize {
        self.loop_manager.threads_number()
    }

    #[inline]
    pub fn snapshots(&self) -> &[Snapshot] {
        &self.snapshots
    }

    /// Saved displacements in snapshot order.
    pub fn saved_displacements(&self) -> impl Iterator<Item = &NodalField> + '_ {
        self.snapshots.iter().map(|s| &s.displacements)
    }

    /// Saved internal forces in snapshot order.
    pub fn saved_forces(&self) -> impl Iterator<Item = &NodalField> + '_ {
        self.snapshots.iter().map(|s| &s.forces)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::approximant::ApproximantKind;
    use crate::conditions::{BoundaryCondition, Conditions, ExternalLoad, LoadCurve};
    use crate::test_utils::*;
    use approx::*;
    use na::{DMatrix, DVector};
    use std::sync::{Arc, Mutex};

    fn single_node() -> (WeakModel3D, NeighborTopology, Approximant) {
        let model = WeakModel3D::new(vec![[0.0; 3]], vec![[0.0; 3]], vec![1.0]).unwrap();
        let support = vec![vec![0]];
        let approx = Approximant::new(
            ApproximantKind::Mmls,
            support.clone(),
            vec![DVector::from_element(1, 1.0)],
            vec![DMatrix::zeros(1, 3)],
        )
        .unwrap();
        (model, support, approx)
    }

    fn solver(threads: usize, load: usize, eq: usize, save: usize) -> ExplicitSolver {
        ExplicitSolver::new(SimParams {
            threads: Some(threads),
            save_progress_steps: save,
            load_steps_num: load,
            equilibrium_steps_num: eq,
        })
        .unwrap()
    }

    #[test]
    fn single_node_without_load_stays_at_rest() -> Result<(), Error> {
        let (model, support, approx) = single_node();
        let mut solver = solver(1, 2, 3, 1);
        solver.set_stable_step(1e-3)?;
        let result = solver.solve(
            &model,
            &support,
            &Conditions::new(),
            &approx,
            &test_material(),
            &DynRelaxProp::default(),
            false,
        )?;
        assert_eq!(result.iterations, 5);
        assert_eq!(solver.snapshots().len(), 5);
        for (i, snapshot) in solver.snapshots().iter().enumerate() {
            assert_eq!(snapshot.step, i + 1);
            assert_eq!(snapshot.displacements, NodalField::zeros(1, 3));
            assert_eq!(snapshot.forces, NodalField::zeros(1, 3));
        }
        Ok(())
    }

    #[test]
    fn snapshots_follow_save_interval() -> Result<(), Error> {
        let (model, support, approx) = single_node();
        let mut solver = solver(1, 0, 0, 3);
        assert_eq!(solver.compute_total_time_steps_num(4, 6), 10);
        solver.set_stable_step(1e-3)?;
        solver.solve(
            &model,
            &support,
            &Conditions::new(),
            &approx,
            &test_material(),
            &DynRelaxProp::default(),
            false,
        )?;
        let steps: Vec<_> = solver.snapshots().iter().map(|s| s.step).collect();
        assert_eq!(steps, vec![3, 6, 9]);
        assert_eq!(solver.saved_displacements().count(), 3);
        assert_eq!(solver.saved_forces().count(), 3);
        Ok(())
    }

    #[test]
    fn invalid_configuration() -> Result<(), Error> {
        let (model, support, approx) = single_node();
        let material = test_material();
        let props = DynRelaxProp::default();
        let conditions = Conditions::new();

        let mut solver = solver(1, 1, 1, 1);
        let no_step = solver.solve(&model, &support, &conditions, &approx, &material, &props, false);
        assert!(matches!(no_step, Err(Error::ConfigurationError { .. })));

        solver.set_stable_step(1e-3)?;
        solver.compute_total_time_steps_num(0, 0);
        let no_steps = solver.solve(&model, &support, &conditions, &approx, &material, &props, false);
        assert!(matches!(no_steps, Err(Error::ConfigurationError { .. })));

        solver.compute_total_time_steps_num(1, 1);
        solver.set_save_progress_steps(0);
        let no_save = solver.solve(&model, &support, &conditions, &approx, &material, &props, false);
        assert!(matches!(no_save, Err(Error::ConfigurationError { .. })));
        Ok(())
    }

    #[test]
    fn inversion_stops_the_solve() -> Result<(), Error> {
        let (model, approx) = make_one_tet();
        let support = approx.support().clone();
        // Pull the apex down through the opposite face, reaching it at step 2.
        let conditions = Conditions::new()
            .with_boundary(BoundaryCondition::fixed(vec![0, 1, 2]))
            .with_boundary(BoundaryCondition::prescribed(
                vec![3],
                [Some(0.0), Some(0.0), Some(-2.0)],
                LoadCurve::Linear,
            ));
        let mut solver = solver(2, 4, 4, 1);
        solver.set_stable_step(1e-4)?;
        let result = solver.solve(
            &model,
            &support,
            &conditions,
            &approx,
            &test_material(),
            &DynRelaxProp::default(),
            false,
        );
        match result {
            Err(Error::ElementInversion { point, det }) => {
                assert_eq!(point, 0);
                assert!(det <= 0.0);
            }
            other => panic!("expected inversion, got {:?}", other),
        }
        let steps: Vec<_> = solver.snapshots().iter().map(|s| s.step).collect();
        assert_eq!(steps, vec![1, 2]);
        assert_relative_eq!(solver.snapshots()[1].displacements[(3, 2)], -1.0);
        Ok(())
    }

    #[test]
    fn progress_is_reported() -> Result<(), Error> {
        let (model, support, approx) = single_node();
        let mut solver = solver(1, 1, 2, 1);
        let seen = Arc::new(Mutex::new(Vec::new()));
        let seen_cb = Arc::clone(&seen);
        solver.set_progress_callback(move |args| {
            seen_cb.lock().unwrap().push((args.iteration, args.total));
        });
        solver.set_stable_step(1e-3)?;
        solver.solve(
            &model,
            &support,
            &Conditions::new(),
            &approx,
            &test_material(),
            &DynRelaxProp::default(),
            false,
        )?;
        assert_eq!(*seen.lock().unwrap(), vec![(1, 3), (2, 3), (3, 3)]);
        Ok(())
    }

    #[test]
    fn thread_count_is_configurable() -> Result<(), Error> {
        assert_eq!(solver(3, 0, 0, 1).threads_number(), 3);
        assert!(ExplicitSolver::new(SimParams::default())?.threads_number() >= 1);
        assert!(matches!(
            ExplicitSolver::new(SimParams {
                threads: Some(0),
                ..SimParams::default()
            }),
            Err(Error::ConfigurationError { .. })
        ));
        Ok(())
    }

    /// A meshfree cube clamped at the bottom with its top face pushed down, with nodal wave
    /// speeds that vary so that mass scaling changes the nodal mass.
    fn graded_grid() -> (WeakModel3D, NeighborTopology, Approximant, Conditions, Vec<f64>) {
        let (model, neighbors, approx) = make_meshfree_grid([3, 3, 3], 0.5, 1.8);
        let nodes: Vec<[f64; 3]> = model.nodes().iter().map(|p| [p.x, p.y, p.z]).collect();
        let conditions = Conditions::new()
            .with_boundary(BoundaryCondition::fixed(crate::fem::nodes_on_plane(
                &nodes, 2, 0.0, 1e-9,
            )))
            .with_boundary(BoundaryCondition::prescribed(
                crate::fem::nodes_on_plane(&nodes, 2, 1.0, 1e-9),
                [None, None, Some(-0.05)],
                LoadCurve::Smooth,
            ));
        let c = test_material().wave_speed();
        let n = model.num_nodes() as f64;
        let wave_speed = (0..model.num_nodes())
            .map(|i| c * (1.0 + 0.5 * i as f64 / n))
            .collect();
        (model, neighbors, approx, conditions, wave_speed)
    }

    #[test]
    fn solve_uses_scaled_mass() -> Result<(), Error> {
        let (model, neighbors, approx, conditions, wave_speed) = graded_grid();
        let material = test_material();
        let lumped = model.lumped_mass(material.density, approx.support())?;
        let unscaled_props = DynRelaxProp::default();
        let scaled_props = unscaled_props.with_mass_scaling(true);

        let mut time_steps = TimeSteps::compute(&model, &wave_speed, &neighbors, &approx)?;
        let scaled_step = time_steps.compute_stable_step(&lumped, true, 4.0)?;
        assert!(scaled_step > time_steps.min_step() / 4.0);

        let run = |scaled_stable_step: bool, props: &DynRelaxProp| -> Result<Vec<Snapshot>, Error> {
            let mut solver = solver(2, 10, 10, 5);
            solver.compute_time_steps(&model, &wave_speed, &neighbors, &approx)?;
            if scaled_stable_step {
                solver.compute_stable_step(&lumped, true, 4.0)?;
            } else {
                solver.set_stable_step(scaled_step)?;
            }
            solver.solve(&model, &neighbors, &conditions, &approx, &material, props, false)?;
            Ok(solver.snapshots().to_vec())
        };

        let retained = run(true, &scaled_props)?;
        let scaled_on_the_fly = run(false, &scaled_props)?;
        let unscaled = run(false, &unscaled_props)?;

        assert_eq!(retained.len(), 4);
        for snapshot in retained.iter() {
            assert!(snapshot.displacements.iter().all(|d| d.is_finite()));
        }
        assert_eq!(retained, scaled_on_the_fly);
        assert_ne!(retained, unscaled);
        Ok(())
    }

    #[test]
    fn mass_scaling_must_match_stable_step() -> Result<(), Error> {
        let (model, neighbors, approx, conditions, wave_speed) = graded_grid();
        let material = test_material();
        let lumped = model.lumped_mass(material.density, approx.support())?;
        for &scaled in &[false, true] {
            let mut solver = solver(1, 2, 2, 1);
            solver.compute_time_steps(&model, &wave_speed, &neighbors, &approx)?;
            solver.compute_stable_step(&lumped, scaled, 4.0)?;
            let props = DynRelaxProp::default().with_mass_scaling(!scaled);
            let result =
                solver.solve(&model, &neighbors, &conditions, &approx, &material, &props, false);
            assert!(matches!(result, Err(Error::ConfigurationError { .. })));
            assert!(solver.snapshots().is_empty());
        }
        Ok(())
    }

    #[test]
    fn out_of_range_condition_nodes_are_rejected() -> Result<(), Error> {
        let (model, support, approx) = single_node();
        let material = test_material();
        let props = DynRelaxProp::default();
        let mut solver = solver(1, 1, 1, 1);
        solver.set_stable_step(1e-3)?;

        let fixed = Conditions::new().with_boundary(BoundaryCondition::fixed(vec![4]));
        let result = solver.solve(&model, &support, &fixed, &approx, &material, &props, false);
        assert!(matches!(result, Err(Error::SizeMismatch { .. })));

        let loaded = Conditions::new().with_load(ExternalLoad {
            nodes: vec![1],
            force: [0.0, 0.0, 1.0],
            curve: LoadCurve::Linear,
        });
        let result = solver.solve(&model, &support, &loaded, &approx, &material, &props, false);
        assert!(matches!(result, Err(Error::SizeMismatch { .. })));

        solver.solve(&model, &support, &Conditions::new(), &approx, &material, &props, false)?;
        let result = solver.apply_shape_func_to_displacements(&support, &approx, &fixed);
        assert!(matches!(result, Err(Error::SizeMismatch { .. })));
        Ok(())
    }

    /// Prescribed values restored after interpolation follow the ramp the snapshots were
    /// produced with, even if the step counts change afterwards.
    #[test]
    fn shape_functions_use_solved_load_steps() -> Result<(), Error> {
        let (model, support, approx) = single_node();
        let conditions = Conditions::new().with_boundary(BoundaryCondition::prescribed(
            vec![0],
            [None, None, Some(1.0)],
            LoadCurve::Linear,
        ));
        let mut solver = solver(1, 4, 0, 2);
        solver.set_stable_step(1e-3)?;
        solver.solve(
            &model,
            &support,
            &conditions,
            &approx,
            &test_material(),
            &DynRelaxProp::default(),
            false,
        )?;
        assert_eq!(solver.compute_total_time_steps_num(8, 0), 8);
        solver.apply_shape_func_to_displacements(&support, &approx, &conditions)?;
        let uz: Vec<_> = solver.saved_displacements().map(|d| d[(0, 2)]).collect();
        assert_eq!(uz, vec![0.5, 1.0]);
        Ok(())
    }

    #[test]
    fn shape_functions_skip_kronecker_approximants() -> Result<(), Error> {
        let (model, approx) = make_one_tet();
        let support = approx.support().clone();
        let conditions = Conditions::new().with_boundary(BoundaryCondition::prescribed(
            vec![3],
            [None, None, Some(0.1)],
            LoadCurve::Linear,
        ));
        let mut solver = solver(1, 2, 0, 1);
        solver.set_stable_step(1e-4)?;
        solver.solve(
            &model,
            &support,
            &conditions,
            &approx,
            &test_material(),
            &DynRelaxProp::default(),
            false,
        )?;
        let before = solver.snapshots().to_vec();
        let nodal_ids = crate::fem::nodal_neighbors(4, &support);
        let nodal = Approximant::new(
            ApproximantKind::Fem(crate::FemType::Tet4),
            vec![vec![0, 1, 2, 3]; 4],
            vec![DVector::from_element(4, 0.25); 4],
            vec![DMatrix::zeros(4, 3); 4],
        )?;
        solver.apply_shape_func_to_displacements(&nodal_ids, &nodal, &conditions)?;
        assert_eq!(solver.snapshots(), before.as_slice());
        Ok(())
    }
}
