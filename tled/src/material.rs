//! Compressible Neo-Hookean material.

use na::Matrix3;
use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Debug, Error, Copy, Clone, PartialEq)]
pub enum MaterialError {
    #[error("Inverted deformation gradient (det F = {det:e})")]
    Inverted { det: f64 },
}

#[derive(Copy, Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ElasticityParameters {
    /// First Lame parameter. Measured in Pa = N/m² = kg/(ms²).
    pub lambda: f64,
    /// Second Lame parameter. Measured in Pa = N/m² = kg/(ms²).
    pub mu: f64,
}

impl ElasticityParameters {
    pub fn scaled(self, scale: f64) -> ElasticityParameters {
        ElasticityParameters {
            lambda: self.lambda * scale,
            mu: self.mu * scale,
        }
    }

    /// Bulk modulus measures the material's resistance to expansion and compression, i.e. its
    /// incompressibility. Shear modulus measures the material's resistance to shear deformation.
    pub fn from_bulk_shear(bulk: f64, shear: f64) -> Self {
        ElasticityParameters {
            lambda: bulk - 2.0 * shear / 3.0,
            mu: shear,
        }
    }

    pub fn from_young_poisson(young: f64, poisson: f64) -> Self {
        ElasticityParameters {
            lambda: young * poisson / ((1.0 + poisson) * (1.0 - 2.0 * poisson)),
            mu: young / (2.0 * (1.0 + poisson)),
        }
    }

    pub fn bulk_modulus(&self) -> f64 {
        self.lambda + 2.0 * self.mu / 3.0
    }

    /// P-wave modulus `λ + 2μ` governing the speed of dilatational waves.
    pub fn p_wave_modulus(&self) -> f64 {
        self.lambda + 2.0 * self.mu
    }
}

/// Uniform compressible Neo-Hookean material with strain energy density
///
/// `Ψ = μ/2 (tr(FᵀF) - 3) - μ ln J + λ/2 (ln J)²`.
#[derive(Copy, Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct NeoHookean {
    pub elasticity: ElasticityParameters,
    /// Density of the material in kg/m³.
    pub density: f64,
}

impl NeoHookean {
    pub fn new(elasticity: ElasticityParameters, density: f64) -> Self {
        NeoHookean {
            elasticity,
            density,
        }
    }

    pub fn from_young_poisson(young: f64, poisson: f64, density: f64) -> Self {
        NeoHookean::new(
            ElasticityParameters::from_young_poisson(young, poisson),
            density,
        )
    }

    pub fn with_density(mut self, density: f64) -> Self {
        self.density = density;
        self
    }

    /// Speed of dilatational waves in the undeformed material.
    pub fn wave_speed(&self) -> f64 {
        (self.elasticity.p_wave_modulus() / self.density).sqrt()
    }

    /// Elastic strain energy density for the deformation gradient `F`.
    ///
    /// Inverted configurations have infinite energy.
    #[allow(non_snake_case)]
    pub fn energy_density(&self, F: &Matrix3<f64>) -> f64 {
        let ElasticityParameters { lambda, mu } = self.elasticity;
        let J = F.determinant();
        if J <= 0.0 {
            return f64::INFINITY;
        }
        let logJ = J.ln();
        0.5 * mu * (F.norm_squared() - 3.0) - mu * logJ + 0.5 * lambda * logJ * logJ
    }

    /// First Piola-Kirchhoff stress `P = μ(F - F⁻ᵀ) + λ ln(J) F⁻ᵀ`.
    ///
    /// Returns an error if the deformation gradient is not invertible or has a non-positive
    /// determinant.
    #[allow(non_snake_case)]
    pub fn first_piola_kirchhoff(&self, F: &Matrix3<f64>) -> Result<Matrix3<f64>, MaterialError> {
        let ElasticityParameters { lambda, mu } = self.elasticity;
        let J = F.determinant();
        if !(J > 0.0) {
            return Err(MaterialError::Inverted { det: J });
        }
        let F_inv_tr = F
            .try_inverse()
            .ok_or(MaterialError::Inverted { det: J })?
            .transpose();
        Ok(F * mu + F_inv_tr * (lambda * J.ln() - mu))
    }

    /// Second Piola-Kirchhoff stress `S = F⁻¹P`.
    #[allow(non_snake_case)]
    pub fn second_piola_kirchhoff(&self, F: &Matrix3<f64>) -> Result<Matrix3<f64>, MaterialError> {
        let P = self.first_piola_kirchhoff(F)?;
        let F_inv = F
            .try_inverse()
            .ok_or(MaterialError::Inverted { det: F.determinant() })?;
        Ok(F_inv * P)
    }
}
