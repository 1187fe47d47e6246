use crate::error::{Result, VoxelElasticError};

/// Lamé parameter and shear modulus of a single phase
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct LameConstants {
    pub lame: f64,
    pub mu: f64,
}

/// Per-phase elastic constants, indexed by phase label
///
/// Built once per batch and shared read-only between sample solves.
#[derive(Debug, Clone, PartialEq)]
pub struct PropertyTable {
    phases: Vec<LameConstants>,
}

/// Converts a Young's modulus and Poisson ratio into the Lamé parameter and
/// shear modulus, with the shear modulus scaled by `dim / 3`
///
/// # Arguments
/// * `dim` - The spatial dimension, 2 or 3
/// * `youngs_modulus` - The elastic modulus of the phase
/// * `poissons_ratio` - The Poisson ratio of the phase
pub fn convert_phase(dim: usize, youngs_modulus: f64, poissons_ratio: f64) -> LameConstants {
    let nu = poissons_ratio;
    let lame = youngs_modulus * nu / ((1.0 + nu) * (1.0 - 2.0 * nu));
    let mu = youngs_modulus / (2.0 * (1.0 + nu));

    LameConstants {
        lame,
        mu: dim as f64 / 3.0 * mu,
    }
}

impl PropertyTable {
    /// Builds the table from parallel sequences of elastic modulus and
    /// Poisson ratio
    ///
    /// # Arguments
    /// * `dim` - The spatial dimension of the microstructure, 2 or 3
    /// * `elastic_modulus` - The elastic modulus of each phase
    /// * `poissons_ratio` - The Poisson ratio of each phase
    ///
    /// # Returns
    /// The property table, or a validation error if the phase counts differ
    /// or a converted constant is not finite
    pub fn new(dim: usize, elastic_modulus: &[f64], poissons_ratio: &[f64]) -> Result<Self> {
        if elastic_modulus.len() != poissons_ratio.len() {
            return Err(VoxelElasticError::Validation(format!(
                "elastic_modulus and poissons_ratio must be the same length ({} != {})",
                elastic_modulus.len(),
                poissons_ratio.len()
            )));
        }
        if elastic_modulus.is_empty() {
            return Err(VoxelElasticError::Validation(
                "at least one phase is required".to_owned(),
            ));
        }
        if !(dim == 2 || dim == 3) {
            return Err(VoxelElasticError::Validation(format!(
                "spatial dimension must be 2 or 3, got {dim}"
            )));
        }

        let mut phases = Vec::with_capacity(elastic_modulus.len());
        for (phase, (e, nu)) in std::iter::zip(elastic_modulus, poissons_ratio).enumerate() {
            let constants = convert_phase(dim, *e, *nu);
            if !constants.lame.is_finite() || !constants.mu.is_finite() {
                return Err(VoxelElasticError::Validation(format!(
                    "phase {phase} (E = {e}, nu = {nu}) has non-finite Lamé constants"
                )));
            }
            phases.push(constants);
        }

        Ok(PropertyTable { phases })
    }

    pub fn n_phases(&self) -> usize {
        self.phases.len()
    }

    /// Constants of the phase with the given label
    ///
    /// Labels are checked against `n_phases` during validation, so an
    /// out-of-range label here is a bug.
    pub fn get(&self, phase: usize) -> LameConstants {
        self.phases[phase]
    }

    /// The table as (lame, mu) rows
    pub fn as_rows(&self) -> Vec<[f64; 2]> {
        self.phases.iter().map(|c| [c.lame, c.mu]).collect()
    }
}
