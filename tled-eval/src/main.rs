use std::io::Write;
use std::path::PathBuf;

use anyhow::Result;
use clap::Parser;
use serde::{Deserialize, Serialize};

use tled::{
    fem, BoundaryCondition, Conditions, ConditionsHandler, DynRelaxProp, ExplicitSolver,
    LoadCurve, NeoHookean, SimParams,
};

const ABOUT: &str = "
Explicit Total Lagrangian dynamics with dynamic relaxation. Runs a box compression scene and \
reports the relaxed state.";

#[derive(Parser)]
#[clap(author, about = ABOUT, name = "tled")]
struct Opt {
    /// Path to the scene configuration file in `ron` format.
    #[clap(name = "CONFIG", parse(from_os_str))]
    config: PathBuf,

    /// Log file path.
    ///
    /// The file receives the scene configuration followed by the solve summary and the mean top
    /// face displacement of every snapshot. Diagnostic logging goes to stderr and is controlled
    /// by `TLED_LOG`.
    #[clap(short, long, parse(from_os_str))]
    logfile: Option<PathBuf>,

    /// Number of worker threads, overriding the scene configuration.
    #[clap(short, long)]
    threads: Option<usize>,

    /// Hide the progress bar.
    #[clap(short, long)]
    quiet: bool,
}

/// Box compression scene.
///
/// The box is clamped at `z = 0` and its top face is pushed down along `z` by `compression`.
#[derive(Clone, Debug, Serialize, Deserialize)]
struct Scene {
    /// Number of cells along each axis.
    res: [usize; 3],
    /// Cell size.
    spacing: f64,
    compression: f64,
    #[serde(default)]
    load_curve: LoadCurve,
    material: NeoHookean,
    params: SimParams,
    #[serde(default)]
    relaxation: DynRelaxProp,
    #[serde(default = "default_safety_factor")]
    safety_factor: f64,
}

fn default_safety_factor() -> f64 {
    1.5
}

pub fn main() {
    if let Err(err) = try_main() {
        eprintln!("{}", err);
        std::process::exit(1);
    }
}

pub fn try_main() -> Result<()> {
    let _ = env_logger::Builder::from_env("TLED_LOG").try_init();

    let opt = Opt::parse();

    match opt.config.extension().and_then(|x| x.to_str()) {
        Some("ron") => {}
        Some(ext) => anyhow::bail!("Unsupported config extension: '.{}'", ext),
        None => anyhow::bail!(
            "Missing file extension in config path: {}",
            opt.config.display()
        ),
    }

    // Pre-emptively create the log file. This way we can fail early.
    if let Some(logfile) = opt.logfile.as_ref() {
        let _ = std::fs::File::create(logfile)?;
    }

    let mut scene: Scene = ron::de::from_reader(std::fs::File::open(&opt.config)?)?;
    if opt.threads.is_some() {
        scene.params.threads = opt.threads;
    }

    // Write scene config so we know how the following log was created.
    if let Some(logfile) = opt.logfile.as_ref() {
        let f = std::fs::File::options().append(true).open(logfile)?;
        let mut buf = std::io::BufWriter::new(f);
        writeln!(buf, "Config:\n")?;
        writeln!(
            buf,
            "{}",
            ron::ser::to_string_pretty(&scene, ron::ser::PrettyConfig::default())?
        )?;
    }

    let (nodes, tets) = fem::box_tetmesh(scene.res, scene.spacing);
    let height = scene.res[2] as f64 * scene.spacing;
    let tol = 1e-9 * scene.spacing;
    let bottom = fem::nodes_on_plane(&nodes, 2, 0.0, tol);
    let top = fem::nodes_on_plane(&nodes, 2, height, tol);
    let (model, approx) = fem::linear_tetrahedra(nodes, &tets)?;
    let nodal_neighbors = fem::nodal_neighbors(model.num_nodes(), approx.support());

    let conditions = Conditions::new()
        .with_boundary(BoundaryCondition::fixed(bottom))
        .with_boundary(BoundaryCondition::prescribed(
            top.clone(),
            [None, None, Some(-scene.compression)],
            scene.load_curve,
        ));
    conditions.validate(model.num_nodes())?;

    let mut solver = ExplicitSolver::new(scene.params)?;
    let wave_speed = vec![scene.material.wave_speed(); model.num_nodes()];
    solver.compute_time_steps(&model, &wave_speed, &nodal_neighbors, &approx)?;
    let mass = model.lumped_mass(scene.material.density, approx.support())?;
    solver.compute_stable_step(
        &mass,
        scene.relaxation.is_mass_scaled,
        scene.safety_factor,
    )?;

    let total = solver.total_time_steps_num();
    if !opt.quiet {
        let pb = indicatif::ProgressBar::new(total as u64);
        pb.set_style(
            indicatif::ProgressStyle::with_template(
                "{elapsed_precise} [{bar:40}] {pos}/{len} steps ({eta})",
            )?
            .progress_chars("=> "),
        );
        solver.set_progress_callback(move |args| {
            pb.set_position(args.iteration as u64);
            if args.iteration == args.total {
                pb.finish();
            }
        });
    }

    let result = solver.solve(
        &model,
        approx.support(),
        &conditions,
        &approx,
        &scene.material,
        &scene.relaxation,
        false,
    )?;

    let reaction: f64 = match solver.snapshots().last() {
        Some(snapshot) => top.iter().map(|&n| snapshot.forces[(n, 2)]).sum(),
        None => 0.0,
    };

    println!("{}", result);
    println!(
        "Time steps: min = {:e}, max = {:e}, stable = {:e}",
        solver.min_step(),
        solver.max_step(),
        solver.stable_step().unwrap_or(0.0)
    );
    println!("Top face reaction: {:e}", reaction);

    if let Some(logfile) = opt.logfile.as_ref() {
        let mut f = std::fs::File::options().append(true).open(logfile)?;
        writeln!(f, "\nResult:\n{}\nTop face reaction: {:e}", result, reaction)?;
        for snapshot in solver.snapshots() {
            let mut top_disp = vec![0.0; 3];
            for &n in top.iter() {
                for (axis, d) in top_disp.iter_mut().enumerate() {
                    *d += snapshot.displacements[(n, axis)] / top.len() as f64;
                }
            }
            writeln!(f, "Step {}: mean top displacement {:?}", snapshot.step, top_disp)?;
        }
    }
    Ok(())
}
