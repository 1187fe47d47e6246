//! Batch driver: validation, per-sample pipeline and batch assembly.

use indicatif::ProgressBar;
use ndarray::{ArrayD, ArrayViewD, Axis};
use rayon::prelude::*;

use crate::{
    boundary::BoundaryConditionSet,
    element::{n_components, VoxelElement},
    error::{Result, VoxelElasticError},
    logging::{self, info, warning},
    material::MaterialField,
    mesher::GridMesh,
    post_processor::{self, Solution},
    properties::PropertyTable,
    solver::{LinearSystem, SolverSettings},
};

/// Sanity checks on the microstructure and the phase properties
///
/// # Arguments
/// * `n_phases` - Number of phases in the elastic modulus
/// * `n_phases_other` - Number of phases in the Poisson ratio
/// * `microstructure` - The microstructures, `(n_samples, n_x, n_y[, n_z])`
pub fn check(n_phases: usize, n_phases_other: usize, microstructure: &ArrayViewD<i64>) -> Result<()> {
    if n_phases != n_phases_other {
        return Err(VoxelElasticError::Validation(
            "elastic_modulus and poissons_ratio must be the same length".to_owned(),
        ));
    }
    if !(3..=4).contains(&microstructure.ndim()) {
        return Err(VoxelElasticError::Validation(format!(
            "the shape of the microstructure is incorrect: expected 3 or 4 axes, got {:?}",
            microstructure.shape()
        )));
    }
    if microstructure.len_of(Axis(0)) == 0 {
        return Err(VoxelElasticError::Validation(
            "the microstructure contains no samples".to_owned(),
        ));
    }
    if microstructure.shape()[1..].contains(&0) {
        return Err(VoxelElasticError::Validation(format!(
            "the microstructure has an empty spatial axis: {:?}",
            microstructure.shape()
        )));
    }
    if let Some(label) = microstructure
        .iter()
        .find(|v| **v < 0 || **v >= n_phases as i64)
    {
        return Err(VoxelElasticError::Validation(format!(
            "microstructure must be between 0 and {}, found {label}",
            n_phases as i64 - 1
        )));
    }
    Ok(())
}

/// Solves one sample through the whole pipeline
///
/// # Arguments
/// * `labels` - Phase labels, row-major over `shape`
/// * `shape` - The voxel grid shape
/// * `table` - The phase property table
/// * `macro_strain` - The applied macro strain
/// * `delta_x` - The voxel edge length
/// * `settings` - The solver settings
pub fn solve_sample(
    labels: &[usize],
    shape: &[usize],
    table: &PropertyTable,
    macro_strain: f64,
    delta_x: f64,
    settings: &SolverSettings,
) -> Result<Solution> {
    let mesh = GridMesh::with_order(shape, delta_x, settings.element_order)?;
    let material = MaterialField::new(table, labels, &mesh);
    let bcs = BoundaryConditionSet::new(&mesh, macro_strain, settings.loading_axis)?;
    let element = VoxelElement::with_order(
        mesh.dim(),
        delta_x,
        settings.element_order,
        settings.quadrature_points,
    )?;

    let solved = LinearSystem::assemble(&mesh, &material, &element)
        .constrain(&bcs)
        .solve(settings)?;
    let newton_iterations = solved.newton_iterations;
    let fields = solved.recover_fields(&mesh, &material, &element);

    post_processor::extract(&mesh, fields, newton_iterations)
}

/// Elastic response generator for batches of microstructures
///
/// Holds the phase properties, loading and solver settings shared by every
/// sample it solves.
#[derive(Debug, Clone)]
pub struct ElasticSimulation {
    elastic_modulus: Vec<f64>,
    poissons_ratio: Vec<f64>,
    macro_strain: f64,
    delta_x: f64,
    settings: SolverSettings,
}

impl ElasticSimulation {
    /// # Arguments
    /// * `elastic_modulus` - The elastic modulus of each phase
    /// * `poissons_ratio` - The Poisson ratio of each phase
    pub fn new(elastic_modulus: &[f64], poissons_ratio: &[f64]) -> Result<Self> {
        if elastic_modulus.len() != poissons_ratio.len() {
            return Err(VoxelElasticError::Validation(
                "elastic_modulus and poissons_ratio must be the same length".to_owned(),
            ));
        }
        Ok(ElasticSimulation {
            elastic_modulus: elastic_modulus.to_vec(),
            poissons_ratio: poissons_ratio.to_vec(),
            macro_strain: 1.0,
            delta_x: 1.0,
            settings: SolverSettings::default(),
        })
    }

    pub fn with_macro_strain(mut self, macro_strain: f64) -> Self {
        self.macro_strain = macro_strain;
        self
    }

    pub fn with_delta_x(mut self, delta_x: f64) -> Self {
        self.delta_x = delta_x;
        self
    }

    pub fn with_settings(mut self, settings: SolverSettings) -> Self {
        self.settings = settings;
        self
    }

    /// Validates every input before any mesh work
    fn prepare(&self, microstructure: &ArrayViewD<i64>) -> Result<PropertyTable> {
        check(
            self.elastic_modulus.len(),
            self.poissons_ratio.len(),
            microstructure,
        )?;
        if !self.macro_strain.is_finite() {
            return Err(VoxelElasticError::Validation(format!(
                "macro_strain must be finite, got {}",
                self.macro_strain
            )));
        }
        if !(self.delta_x.is_finite() && self.delta_x > 0.0) {
            return Err(VoxelElasticError::Validation(format!(
                "delta_x must be positive and finite, got {}",
                self.delta_x
            )));
        }
        self.settings.validate()?;

        let dim = microstructure.ndim() - 1;
        if self.settings.loading_axis >= dim {
            return Err(VoxelElasticError::Validation(format!(
                "loading axis {} does not exist in a {dim}D microstructure",
                self.settings.loading_axis
            )));
        }

        PropertyTable::new(dim, &self.elastic_modulus, &self.poissons_ratio)
    }

    /// Solves every sample, keeping the outcome of each
    ///
    /// # Returns
    /// A validation error for bad input, otherwise one result per sample in
    /// sample order. A failed sample does not affect the others.
    pub fn solve_batch(&self, microstructure: ArrayViewD<i64>) -> Result<Vec<Result<Solution>>> {
        let table = self.prepare(&microstructure)?;

        let n_samples = microstructure.len_of(Axis(0));
        let shape = microstructure.shape()[1..].to_vec();
        let samples: Vec<Vec<usize>> = microstructure
            .axis_iter(Axis(0))
            .map(|sample| sample.iter().map(|v| *v as usize).collect())
            .collect();

        info!(
            "solving {} samples of shape {:?} with {} phases, (lame, mu) = {:?}",
            n_samples,
            shape,
            table.n_phases(),
            table.as_rows()
        );

        let bar = if logging::is_verbose() {
            ProgressBar::new(n_samples as u64)
        } else {
            ProgressBar::hidden()
        };

        let run = |index: usize| -> Result<Solution> {
            let outcome = solve_sample(
                &samples[index],
                &shape,
                &table,
                self.macro_strain,
                self.delta_x,
                &self.settings,
            );
            if let Err(err) = &outcome {
                warning!("solver", "sample {index} failed: {err}");
            }
            bar.inc(1);
            outcome
        };

        let outcomes: Vec<Result<Solution>> = if self.settings.parallel {
            (0..n_samples).into_par_iter().map(run).collect()
        } else {
            (0..n_samples).map(run).collect()
        };
        bar.finish_and_clear();

        let n_failed = outcomes.iter().filter(|o| o.is_err()).count();
        info!(
            "solved {} of {} samples",
            n_samples - n_failed,
            n_samples
        );

        Ok(outcomes)
    }

    /// Solves every sample and stacks the fields
    ///
    /// # Returns
    /// `(strain, displacement, stress)` with a leading sample axis, or the
    /// first per-sample failure tagged with its index
    pub fn solve(
        &self,
        microstructure: ArrayViewD<i64>,
    ) -> Result<(ArrayD<f64>, ArrayD<f64>, ArrayD<f64>)> {
        let solutions = self
            .solve_batch(microstructure)?
            .into_iter()
            .enumerate()
            .map(|(index, outcome)| outcome.map_err(|err| err.in_sample(index)))
            .collect::<Result<Vec<Solution>>>()?;

        post_processor::stack_samples(&solutions)
    }

    /// Strain response of every sample
    ///
    /// # Arguments
    /// * `microstructure` - The microstructures
    /// * `strain_index` - The strain component to return (0 gives xx, 1 gives
    ///     yy, and so on), or `None` for every component
    pub fn response(
        &self,
        microstructure: ArrayViewD<i64>,
        strain_index: Option<usize>,
    ) -> Result<ArrayD<f64>> {
        let dim = microstructure.ndim().saturating_sub(1);
        if let Some(index) = strain_index {
            if index >= n_components(dim) {
                return Err(VoxelElasticError::Validation(format!(
                    "strain_index {index} is out of range for a {dim}D strain"
                )));
            }
        }

        let (strain, _, _) = self.solve(microstructure)?;
        Ok(match strain_index {
            Some(index) => strain.index_axis(Axis(strain.ndim() - 1), index).to_owned(),
            None => strain,
        })
    }
}

/// Solves the elasticity problem for a batch of microstructures
///
/// # Arguments
/// * `microstructure` - Phase labels, `(n_samples, n_x, n_y[, n_z])`
/// * `elastic_modulus` - The elastic modulus of each phase
/// * `poissons_ratio` - The Poisson ratio of each phase
/// * `macro_strain` - The macro strain along x
/// * `delta_x` - The grid spacing
///
/// # Returns
/// `(strain, displacement, stress)` shaped `(n_samples, *grid,
/// n_components)`, `(n_samples, *(grid + 1), dim)` and `(n_samples, *grid,
/// n_components)`
pub fn solve(
    microstructure: ArrayViewD<i64>,
    elastic_modulus: &[f64],
    poissons_ratio: &[f64],
    macro_strain: f64,
    delta_x: f64,
) -> Result<(ArrayD<f64>, ArrayD<f64>, ArrayD<f64>)> {
    ElasticSimulation::new(elastic_modulus, poissons_ratio)?
        .with_macro_strain(macro_strain)
        .with_delta_x(delta_x)
        .solve(microstructure)
}

/// Like [`solve`] but keeps per-sample outcomes and takes explicit settings
pub fn solve_batch(
    microstructure: ArrayViewD<i64>,
    elastic_modulus: &[f64],
    poissons_ratio: &[f64],
    macro_strain: f64,
    delta_x: f64,
    settings: SolverSettings,
) -> Result<Vec<Result<Solution>>> {
    ElasticSimulation::new(elastic_modulus, poissons_ratio)?
        .with_macro_strain(macro_strain)
        .with_delta_x(delta_x)
        .with_settings(settings)
        .solve_batch(microstructure)
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::{Array, IxDyn};

    fn micro(shape: &[usize], data: Vec<i64>) -> ArrayD<i64> {
        Array::from_shape_vec(IxDyn(shape), data).unwrap()
    }

    #[test]
    fn test_check_rejects_bad_input() {
        let x = micro(&[1, 2, 2], vec![0, 1, 1, 0]);
        assert!(check(2, 2, &x.view()).is_ok());
        assert!(check(2, 1, &x.view()).is_err());
        assert!(check(1, 1, &x.view()).is_err());

        let negative = micro(&[1, 2, 2], vec![0, -1, 1, 0]);
        assert!(check(2, 2, &negative.view()).is_err());

        let flat = micro(&[2, 2], vec![0, 1, 1, 0]);
        assert!(check(2, 2, &flat.view()).is_err());

        let empty = micro(&[0, 2, 2], vec![]);
        assert!(check(2, 2, &empty.view()).is_err());

        let no_voxels = micro(&[1, 0, 3], vec![]);
        assert!(matches!(
            check(2, 2, &no_voxels.view()),
            Err(VoxelElasticError::Validation(_))
        ));
    }

    #[test]
    fn test_bad_settings_fail_before_solving() {
        let x = micro(&[1, 2, 2], vec![0; 4]);
        let settings = SolverSettings {
            loading_axis: 2,
            ..SolverSettings::default()
        };
        let sim = ElasticSimulation::new(&[1.0], &[0.3])
            .unwrap()
            .with_settings(settings);
        assert!(matches!(
            sim.solve_batch(x.view()),
            Err(VoxelElasticError::Validation(_))
        ));
    }

    #[test]
    fn test_response_selects_component() {
        let x = micro(&[2, 3, 3], vec![0; 18]);
        let sim = ElasticSimulation::new(&[1.0], &[0.3]).unwrap();

        let exx = sim.response(x.view(), Some(0)).unwrap();
        assert_eq!(exx.shape(), &[2, 3, 3]);
        assert!(exx.iter().all(|v| (v - 1.0).abs() < 1e-8));

        let all = sim.response(x.view(), None).unwrap();
        assert_eq!(all.shape(), &[2, 3, 3, 3]);

        assert!(sim.response(x.view(), Some(3)).is_err());
    }
}
