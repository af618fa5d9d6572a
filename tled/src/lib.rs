//! Total Lagrangian Explicit Dynamics (TLED) solver for hyperelastic solids.
//!
//! The solver integrates the equations of motion of a discretized solid with an explicit
//! central-difference scheme accelerated by dynamic relaxation. Shape function derivatives may
//! come from a meshfree approximant (MMLS, RPI) or from finite elements; the solver only consumes
//! their values through an [`Approximant`].

pub mod approximant;
pub mod conditions;
pub mod fem;
pub mod forces;
pub mod io;
pub mod material;
pub mod model;
pub mod relaxation;
pub mod solver;
pub mod thread_loop;
pub mod time_step;

// TODO: Gate behind a `test-utils` feature once the benches and integration tests enable it.
pub mod test_utils;

pub use self::approximant::{Approximant, ApproximantKind, FemType, LengthMeasure};
pub use self::conditions::{
    BoundaryCondition, Conditions, ConditionsHandler, ExternalLoad, LoadCurve,
};
pub use self::forces::ForceAssembler;
pub use self::material::{ElasticityParameters, MaterialError, NeoHookean};
pub use self::model::WeakModel3D;
pub use self::relaxation::{DynRelaxProp, DynamicRelaxationController, Phase, RelaxCoefficients};
pub use self::solver::{ExplicitSolver, ProgressArgs, SimParams, Snapshot, SolveResult};
pub use self::thread_loop::ThreadLoopManager;
pub use self::time_step::{compute_total_time_steps_num, TimeSteps};

use thiserror::Error;

/// A dense nodal field with one row per node and one column per spatial axis.
pub type NodalField = na::DMatrix<f64>;

/// Support domain of each evaluation or integration point given by node indices.
pub type NeighborTopology = Vec<Vec<usize>>;

#[derive(Debug, Error)]
pub enum Error {
    #[error("Size mismatch in {what}: expected {expected}, found {actual}")]
    SizeMismatch {
        what: &'static str,
        expected: usize,
        actual: usize,
    },
    #[error("Degenerate support domain detected at point {point}")]
    DegenerateSupportDomain { point: usize },
    #[error("Element inversion detected at integration point {point} (det F = {det:e})")]
    ElementInversion { point: usize, det: f64 },
    #[error("Configuration error: {description}")]
    ConfigurationError { description: String },
    #[error("Degenerate reference element detected: {:?}", .degens[0])]
    DegenerateReferenceElement { degens: Vec<usize> },
    #[error("Inverted reference element detected: {:?}", .inverted[0])]
    InvertedReferenceElement { inverted: Vec<usize> },
    #[error("Failed to build the worker thread pool")]
    ThreadPool {
        #[from]
        source: rayon::ThreadPoolBuildError,
    },
}

impl Error {
    pub(crate) fn config(description: impl Into<String>) -> Self {
        Error::ConfigurationError {
            description: description.into(),
        }
    }
}

/// Compute the infinity norm of a sequence of values.
pub(crate) fn inf_norm<I, T: num_traits::Float>(iter: I) -> T
where
    I: IntoIterator<Item = T>,
{
    iter.into_iter()
        .map(|x| x.abs())
        .max_by(|a, b| a.partial_cmp(b).unwrap_or(std::cmp::Ordering::Less))
        .unwrap_or_else(T::zero)
}
