//! Dynamic relaxation parameters and update coefficients.

use serde::{Deserialize, Serialize};

use crate::Error;

/// Dynamic relaxation properties.
///
/// The convergence rates play the role of velocity retention factors in the damped central
/// difference update. A rate of `1.0` means no damping.
#[derive(Copy, Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct DynRelaxProp {
    /// Convergence rate while the load is being applied.
    pub load_conv_rate: f64,
    /// Convergence rate after the load is fully applied.
    pub after_load_conv_rate: f64,
    /// Scale nodal masses to relax the stable time step.
    pub is_mass_scaled: bool,
}

impl Default for DynRelaxProp {
    fn default() -> Self {
        DynRelaxProp {
            load_conv_rate: 0.999,
            after_load_conv_rate: 0.99,
            is_mass_scaled: false,
        }
    }
}

impl DynRelaxProp {
    pub fn with_load_conv_rate(self, load_conv_rate: f64) -> Self {
        DynRelaxProp {
            load_conv_rate,
            ..self
        }
    }
    pub fn with_after_load_conv_rate(self, after_load_conv_rate: f64) -> Self {
        DynRelaxProp {
            after_load_conv_rate,
            ..self
        }
    }
    pub fn with_mass_scaling(self, is_mass_scaled: bool) -> Self {
        DynRelaxProp {
            is_mass_scaled,
            ..self
        }
    }

    /// Check that convergence rates are in `(0, 1]`.
    pub fn validate(&self) -> Result<(), Error> {
        for (name, rate) in [
            ("load_conv_rate", self.load_conv_rate),
            ("after_load_conv_rate", self.after_load_conv_rate),
        ] {
            if !(rate > 0.0 && rate <= 1.0) {
                return Err(Error::config(format!(
                    "{} must be in (0, 1], got {}",
                    name, rate
                )));
            }
        }
        Ok(())
    }
}

/// Solution phase of the explicit loop.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum Phase {
    /// Boundary conditions are ramped up.
    Loading,
    /// Boundary conditions are held while damping drives the system to equilibrium.
    Relaxation,
}

/// Update coefficients for a single explicit iteration.
#[derive(Copy, Clone, Debug, PartialEq)]
pub struct RelaxCoefficients {
    pub phase: Phase,
    /// Fraction of the previous velocity retained in the update.
    pub velocity_factor: f64,
    /// Fraction of the previous velocity removed by damping, `1 - velocity_factor`.
    pub damping: f64,
    /// Time step of this iteration.
    pub time_step: f64,
    /// Factor multiplying acceleration in the velocity update.
    pub acceleration_factor: f64,
}

/// Produces the velocity and displacement update coefficients of each iteration.
///
/// This is a pure function of the iteration index, so coefficients for any iteration can be
/// queried in any order.
#[derive(Copy, Clone, Debug, PartialEq)]
pub struct DynamicRelaxationController {
    props: DynRelaxProp,
    stable_step: f64,
    load_steps_num: usize,
}

impl DynamicRelaxationController {
    pub fn new(props: DynRelaxProp, stable_step: f64, load_steps_num: usize) -> Result<Self, Error> {
        props.validate()?;
        if !(stable_step > 0.0) || !stable_step.is_finite() {
            return Err(Error::config(format!(
                "stable step must be positive and finite, got {}",
                stable_step
            )));
        }
        Ok(DynamicRelaxationController {
            props,
            stable_step,
            load_steps_num,
        })
    }

    #[inline]
    pub fn props(&self) -> &DynRelaxProp {
        &self.props
    }

    #[inline]
    pub fn phase(&self, iteration: usize) -> Phase {
        if iteration < self.load_steps_num {
            Phase::Loading
        } else {
            Phase::Relaxation
        }
    }

    /// Coefficients of the damped central difference update
    ///
    /// `v ← β v + (1 + β) Δt / 2 · a`,
    ///
    /// where `β` is the convergence rate of the current phase. This is equivalent to the
    /// displacement form `u ← u + β (u - u_prev) + (1 + β) Δt² / 2 · a` and reduces to the
    /// undamped central difference scheme when `β = 1`.
    pub fn coefficients(&self, iteration: usize) -> RelaxCoefficients {
        let phase = self.phase(iteration);
        let velocity_factor = match phase {
            Phase::Loading => self.props.load_conv_rate,
            Phase::Relaxation => self.props.after_load_conv_rate,
        };
        let time_step = self.stable_step;
        RelaxCoefficients {
            phase,
            velocity_factor,
            damping: 1.0 - velocity_factor,
            time_step,
            acceleration_factor: 0.5 * (1.0 + velocity_factor) * time_step,
        }
    }
}
