#![allow(dead_code)]

pub use tled::test_utils::*;
use tled::*;

pub fn init_logger() {
    let _ = env_logger::Builder::from_env("TLED_LOG")
        .is_test(true)
        .try_init();
}

/// Nodal wave speeds of a uniform material.
pub fn uniform_wave_speed(material: &NeoHookean, num_nodes: usize) -> Vec<f64> {
    vec![material.wave_speed(); num_nodes]
}

/// A box clamped at `z = 0` with its top face pushed down by `compression` along `z`.
///
/// The top face is clamped in `x` and `y`. Returns the model, the approximant, the nodal
/// support domains and the conditions, along with the top node indices.
pub fn box_compression(
    res: [usize; 3],
    spacing: f64,
    compression: f64,
) -> (WeakModel3D, Approximant, NeighborTopology, Conditions, Vec<usize>) {
    let (nodes, tets) = fem::box_tetmesh(res, spacing);
    let height = res[2] as f64 * spacing;
    let bottom = fem::nodes_on_plane(&nodes, 2, 0.0, 1e-9 * spacing);
    let top = fem::nodes_on_plane(&nodes, 2, height, 1e-9 * spacing);
    let (model, approx) = fem::linear_tetrahedra(nodes, &tets).unwrap();
    let nodal_neighbors = fem::nodal_neighbors(model.num_nodes(), approx.support());
    let conditions = Conditions::new()
        .with_boundary(BoundaryCondition::fixed(bottom))
        .with_boundary(BoundaryCondition::prescribed(
            top.clone(),
            [Some(0.0), Some(0.0), Some(-compression)],
            LoadCurve::Smooth,
        ));
    (model, approx, nodal_neighbors, conditions, top)
}

/// Solver with critical time steps and the stable step computed for the given model.
pub fn prepared_solver(
    params: SimParams,
    model: &WeakModel3D,
    nodal_neighbors: &NeighborTopology,
    approx: &Approximant,
    material: &NeoHookean,
    relax_props: &DynRelaxProp,
    safety_factor: f64,
) -> Result<ExplicitSolver, Error> {
    let mut solver = ExplicitSolver::new(params)?;
    let wave_speed = uniform_wave_speed(material, model.num_nodes());
    solver.compute_time_steps(model, &wave_speed, nodal_neighbors, approx)?;
    let mass = model.lumped_mass(material.density, approx.support())?;
    solver.compute_stable_step(&mass, relax_props.is_mass_scaled, safety_factor)?;
    Ok(solver)
}
