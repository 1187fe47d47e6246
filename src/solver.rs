use crate::{
    boundary::{BoundaryConditionSet, DofMapping},
    element::{n_components, VoxelElement},
    error::{Result, VoxelElasticError},
    logging::info,
    material::{EvaluationMode, MaterialField},
    mesher::GridMesh,
};
use nalgebra::{DMatrix, DVector};
use nalgebra_sparse::{factorization::CscCholesky, CooMatrix, CscMatrix, CsrMatrix};

use argmin::{
    core::{Executor, Operator, State},
    solver::conjugategradient::ConjugateGradient,
};

pub const MAX_NEWTON_ITER: usize = 10;
pub const NEWTON_ABS_TOLERANCE: f64 = 1e-10;
pub const NEWTON_REL_TOLERANCE: f64 = 1e-10;
pub const MAX_CG_ITER: u64 = 10_000;
pub const TARGET_CG_RESIDUAL: f64 = 1e-10;

/// Linear solver used for the Newton tangent
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LinearSolverKind {
    /// Sparse Cholesky factorization
    Direct,
    /// Conjugate gradient iteration
    ConjugateGradient,
}

impl LinearSolverKind {
    pub fn parse(name: &str) -> Result<LinearSolverKind> {
        match name {
            "direct" => Ok(LinearSolverKind::Direct),
            "conjugate_gradient" | "cg" => Ok(LinearSolverKind::ConjugateGradient),
            other => Err(VoxelElasticError::Validation(format!(
                "unknown linear solver '{other}', expected 'direct' or 'conjugate_gradient'"
            ))),
        }
    }
}

/// Settings for a single sample solve, shared read-only across a batch
#[derive(Debug, Clone, PartialEq)]
pub struct SolverSettings {
    pub linear_solver: LinearSolverKind,
    pub max_newton_iterations: usize,
    pub newton_abs_tolerance: f64,
    pub newton_rel_tolerance: f64,
    /// Newton step scale in (0, 1]
    pub damping: f64,
    pub max_cg_iterations: u64,
    /// Target residual of the CG iteration, relative to the right-hand side
    pub cg_tolerance: f64,
    /// Polynomial order of the voxel elements, 1 or 2
    pub element_order: usize,
    /// Gauss points per axis, 1 to 3
    pub quadrature_points: usize,
    pub loading_axis: usize,
    /// Solve the samples of a batch on the rayon pool
    pub parallel: bool,
}

impl Default for SolverSettings {
    fn default() -> Self {
        SolverSettings {
            linear_solver: LinearSolverKind::Direct,
            max_newton_iterations: MAX_NEWTON_ITER,
            newton_abs_tolerance: NEWTON_ABS_TOLERANCE,
            newton_rel_tolerance: NEWTON_REL_TOLERANCE,
            damping: 1.0,
            max_cg_iterations: MAX_CG_ITER,
            cg_tolerance: TARGET_CG_RESIDUAL,
            element_order: 2,
            quadrature_points: 3,
            loading_axis: 0,
            parallel: true,
        }
    }
}

impl SolverSettings {
    pub fn validate(&self) -> Result<()> {
        if self.max_newton_iterations == 0 {
            return Err(VoxelElasticError::Validation(
                "max_newton_iterations must be at least 1".to_owned(),
            ));
        }
        if !(self.damping > 0.0 && self.damping <= 1.0) {
            return Err(VoxelElasticError::Validation(format!(
                "damping must lie in (0, 1], got {}",
                self.damping
            )));
        }
        for (name, value) in [
            ("newton_abs_tolerance", self.newton_abs_tolerance),
            ("newton_rel_tolerance", self.newton_rel_tolerance),
            ("cg_tolerance", self.cg_tolerance),
        ] {
            if !(value.is_finite() && value >= 0.0) {
                return Err(VoxelElasticError::Validation(format!(
                    "{name} must be a non-negative number, got {value}"
                )));
            }
        }
        if !(1..=2).contains(&self.element_order) {
            return Err(VoxelElasticError::Validation(format!(
                "element_order must be 1 or 2, got {}",
                self.element_order
            )));
        }
        if !(1..=3).contains(&self.quadrature_points) {
            return Err(VoxelElasticError::Validation(format!(
                "quadrature_points must be 1, 2 or 3, got {}",
                self.quadrature_points
            )));
        }
        Ok(())
    }

    fn linear_solver(&self) -> Box<dyn LinearSolver> {
        match self.linear_solver {
            LinearSolverKind::Direct => Box::new(CholeskySolver),
            LinearSolverKind::ConjugateGradient => Box::new(ConjugateGradientSolver {
                max_iters: self.max_cg_iterations,
                tolerance: self.cg_tolerance,
            }),
        }
    }
}

/// Linear solver interface
pub trait LinearSolver: Send + Sync {
    /// Solves `Ax = b` for a symmetric positive definite `A`
    fn solve(&self, a: &CsrMatrix<f64>, b: &[f64]) -> Result<Vec<f64>>;

    fn name(&self) -> &str;
}

/// Direct solve through a sparse Cholesky factorization
pub struct CholeskySolver;

impl LinearSolver for CholeskySolver {
    fn solve(&self, a: &CsrMatrix<f64>, b: &[f64]) -> Result<Vec<f64>> {
        let csc = CscMatrix::from(a);
        let factor = CscCholesky::factor(&csc).map_err(|err| {
            VoxelElasticError::SolverConvergence(format!(
                "tangent matrix is singular or indefinite: {err:?}"
            ))
        })?;

        let rhs = DMatrix::from_column_slice(b.len(), 1, b);
        let x = factor.solve(&rhs);
        let x: Vec<f64> = x.column(0).iter().copied().collect();

        if x.iter().any(|v| !v.is_finite()) {
            return Err(VoxelElasticError::SolverConvergence(
                "direct solve produced non-finite values".to_owned(),
            ));
        }
        Ok(x)
    }

    fn name(&self) -> &str {
        "sparse Cholesky"
    }
}

/// Runs multiplication for Conjugate Gradient Solver
struct ConjugateGradientOperator<'a> {
    a: &'a CsrMatrix<f64>,
}

impl<'a> Operator for ConjugateGradientOperator<'a> {
    type Param = Vec<f64>;
    type Output = Vec<f64>;

    fn apply(&self, x: &Self::Param) -> std::result::Result<Self::Output, argmin::core::Error> {
        let x = DVector::from_column_slice(x);
        Ok((self.a * &x).as_slice().to_vec())
    }
}

/// Iterative solve with argmin's conjugate gradient
pub struct ConjugateGradientSolver {
    pub max_iters: u64,
    /// Target residual norm relative to `|b|`
    pub tolerance: f64,
}

impl LinearSolver for ConjugateGradientSolver {
    fn solve(&self, a: &CsrMatrix<f64>, b: &[f64]) -> Result<Vec<f64>> {
        let b_norm = norm(b);
        if b_norm == 0.0 {
            return Ok(vec![0.0; b.len()]);
        }

        let solver: ConjugateGradient<_, f64> = ConjugateGradient::new(b.to_vec());
        let initial_guess: Vec<f64> = vec![0.0; b.len()];
        let operator = ConjugateGradientOperator { a };
        let target = self.tolerance * b_norm;

        let res = Executor::new(operator, solver)
            .configure(|state| {
                state
                    .param(initial_guess)
                    .max_iters(self.max_iters)
                    // the solver's cost is the squared residual norm
                    .target_cost(target * target)
            })
            .run()
            .map_err(|err| {
                VoxelElasticError::SolverConvergence(format!("Conjugate Gradient error: {err}"))
            })?;

        let state = res.state();
        let x = match state.get_best_param().or(state.get_param()) {
            Some(x) => x.clone(),
            None => {
                return Err(VoxelElasticError::SolverConvergence(
                    "Conjugate Gradient could not produce best parameter".to_owned(),
                ))
            }
        };

        let residual = residual(a, &x, b);
        if !(norm(&residual) <= target.max(f64::EPSILON * b_norm) * 10.0) {
            return Err(VoxelElasticError::SolverConvergence(format!(
                "Conjugate Gradient stopped at residual {:e} after {} iterations",
                norm(&residual),
                state.get_iter()
            )));
        }

        Ok(x)
    }

    fn name(&self) -> &str {
        "conjugate gradient"
    }
}

fn norm(v: &[f64]) -> f64 {
    v.iter().map(|x| x * x).sum::<f64>().sqrt()
}

/// `Ax - b`
fn residual(a: &CsrMatrix<f64>, x: &[f64], b: &[f64]) -> Vec<f64> {
    let ax = a * &DVector::from_column_slice(x);
    ax.iter().zip(b).map(|(l, r)| l - r).collect()
}

/// Computes the stiffness matrix for a given element
///
/// # Arguments
/// * `mesh` - The sample mesh
/// * `element_index` - The element to target
/// * `material` - The voxel material field
/// * `element` - The shared element kernel
///
/// # Returns
/// The element stiffness matrix, or `None` when the material has nothing to
/// contribute
fn compute_element_stiffness_matrix(
    mesh: &GridMesh,
    element_index: usize,
    material: &MaterialField,
    element: &VoxelElement,
) -> Option<DMatrix<f64>> {
    let origin = mesh.element_origin(&mesh.elements()[element_index]);
    let coords: Vec<[f64; 3]> = element
        .quadrature()
        .iter()
        .map(|q| element.physical_point(&origin, &q.natural))
        .collect();

    let points = material.evaluate(&coords, EvaluationMode::QuadraturePoint)?;
    let det = element.jacobian_det();

    let mut stiffness = DMatrix::zeros(element.n_dofs(), element.n_dofs());
    for (q, point) in element.quadrature().iter().zip(&points) {
        let b = element.strain_displacement_matrix(&q.natural);
        stiffness += b.transpose() * &point.stiffness * &b * (q.weight * det);
    }

    Some(stiffness)
}

/// The assembled, unconstrained stiffness system of one sample
#[derive(Debug, Clone)]
pub struct LinearSystem {
    stiffness: CsrMatrix<f64>,
    dim: usize,
}

impl LinearSystem {
    /// Assembles `∫ σ(u) : ε(v) dV` over every element
    pub fn assemble(mesh: &GridMesh, material: &MaterialField, element: &VoxelElement) -> Self {
        let dim = mesh.dim();
        let n_dofs = mesh.nodes().len() * dim;
        let mut coo = CooMatrix::new(n_dofs, n_dofs);

        for (index, mesh_element) in mesh.elements().iter().enumerate() {
            let stiffness_mat = match compute_element_stiffness_matrix(mesh, index, material, element)
            {
                Some(k) => k,
                None => continue,
            };

            for (local_row, node_row) in mesh_element.nodes.iter().enumerate() {
                for (local_col, node_col) in mesh_element.nodes.iter().enumerate() {
                    for i in 0..dim {
                        for j in 0..dim {
                            coo.push(
                                node_row * dim + i,
                                node_col * dim + j,
                                stiffness_mat[(local_row * dim + i, local_col * dim + j)],
                            );
                        }
                    }
                }
            }
        }

        LinearSystem {
            stiffness: CsrMatrix::from(&coo),
            dim,
        }
    }

    pub fn stiffness(&self) -> &CsrMatrix<f64> {
        &self.stiffness
    }

    /// Eliminates the constrained degrees of freedom
    ///
    /// With `u = T u_free + g` the reduced system is `Tᵀ K T u_free = -Tᵀ K g`.
    pub fn constrain(self, bcs: &BoundaryConditionSet) -> ConstrainedSystem {
        let mapping = bcs.mapping().clone();
        debug_assert_eq!(mapping.n_dofs(), self.stiffness.nrows());

        let n = mapping.n_free;
        let mut coo = CooMatrix::new(n, n);
        let mut rhs = vec![0.0; n];

        for (row, col, value) in self.stiffness.triplet_iter() {
            if let Some(i) = mapping.free[row] {
                rhs[i] -= value * mapping.shift[col];
                if let Some(j) = mapping.free[col] {
                    coo.push(i, j, *value);
                }
            }
        }

        ConstrainedSystem {
            stiffness: CsrMatrix::from(&coo),
            rhs,
            mapping,
            dim: self.dim,
        }
    }
}

/// The reduced system after boundary conditions are applied
#[derive(Debug, Clone)]
pub struct ConstrainedSystem {
    stiffness: CsrMatrix<f64>,
    rhs: Vec<f64>,
    mapping: DofMapping,
    dim: usize,
}

/// Solved nodal displacement of one sample
#[derive(Debug, Clone)]
pub struct SolvedSystem {
    /// Displacement per dof, `node * dim + component`
    pub displacement: Vec<f64>,
    pub newton_iterations: usize,
    dim: usize,
}

impl ConstrainedSystem {
    /// Runs the damped Newton iteration on `R(u) = K u - f`
    ///
    /// The tangent `K` is solved exactly every iteration, so the linear
    /// problem converges in a single step and the next residual evaluation
    /// confirms it.
    pub fn solve(&self, settings: &SolverSettings) -> Result<SolvedSystem> {
        let linear_solver = settings.linear_solver();
        let n = self.mapping.n_free;
        let mut u = vec![0.0; n];

        let initial_norm = norm(&self.rhs);
        let tolerance = settings.newton_abs_tolerance + settings.newton_rel_tolerance * initial_norm;

        let start = std::time::Instant::now();
        let mut iterations = 0;
        loop {
            let r = residual(&self.stiffness, &u, &self.rhs);
            let r_norm = norm(&r);

            if !r_norm.is_finite() {
                return Err(VoxelElasticError::SolverConvergence(format!(
                    "residual became non-finite after {iterations} Newton iterations"
                )));
            }
            if r_norm <= tolerance {
                break;
            }
            if iterations == settings.max_newton_iterations {
                return Err(VoxelElasticError::SolverConvergence(format!(
                    "Newton iteration did not converge in {iterations} iterations \
                     (residual {r_norm:e}, tolerance {tolerance:e})"
                )));
            }

            let minus_r: Vec<f64> = r.iter().map(|v| -v).collect();
            let du = linear_solver.solve(&self.stiffness, &minus_r)?;
            for (ui, dui) in u.iter_mut().zip(&du) {
                *ui += settings.damping * dui;
            }
            iterations += 1;
        }

        info!(
            "solved {} dofs with {} in {} Newton iterations ({:.3} seconds)",
            n,
            linear_solver.name(),
            iterations,
            start.elapsed().as_secs_f32()
        );

        Ok(SolvedSystem {
            displacement: self.mapping.expand(&u),
            newton_iterations: iterations,
            dim: self.dim,
        })
    }
}

/// Element-averaged fields of one solved sample, in assembly order
#[derive(Debug, Clone)]
pub struct ElementFields {
    /// Displacement per dof, `node * dim + component`
    pub displacement: Vec<f64>,
    /// Strain per element, `element * n_components + component`
    pub strain: Vec<f64>,
    /// Stress per element, `element * n_components + component`
    pub stress: Vec<f64>,
}

impl SolvedSystem {
    /// Calculates the element-averaged strain and stress
    ///
    /// # Arguments
    /// * `mesh` - The sample mesh
    /// * `material` - The material field used for assembly
    /// * `element` - The element kernel used for assembly
    pub fn recover_fields(
        self,
        mesh: &GridMesh,
        material: &MaterialField,
        element: &VoxelElement,
    ) -> ElementFields {
        let dim = self.dim;
        let n_comp = n_components(dim);
        let mut strain = Vec::with_capacity(mesh.elements().len() * n_comp);
        let mut stress = Vec::with_capacity(mesh.elements().len() * n_comp);

        for mesh_element in mesh.elements() {
            let nodal_displacements = DVector::from_iterator(
                element.n_dofs(),
                mesh_element
                    .nodes
                    .iter()
                    .flat_map(|node| (0..dim).map(move |c| node * dim + c))
                    .map(|dof| self.displacement[dof]),
            );

            let origin = mesh.element_origin(mesh_element);
            let coords: Vec<[f64; 3]> = element
                .quadrature()
                .iter()
                .map(|q| element.physical_point(&origin, &q.natural))
                .collect();
            let points = material.evaluate(&coords, EvaluationMode::QuadraturePoint);

            let mut strain_sum = DVector::zeros(n_comp);
            let mut stress_sum = DVector::zeros(n_comp);
            let mut weight_sum = 0.0;
            for (i, q) in element.quadrature().iter().enumerate() {
                let strain_q = element.strain_displacement_matrix(&q.natural) * &nodal_displacements;
                if let Some(points) = &points {
                    stress_sum += &points[i].stiffness * &strain_q * q.weight;
                }
                strain_sum += strain_q * q.weight;
                weight_sum += q.weight;
            }

            strain.extend((strain_sum / weight_sum).iter());
            stress.extend((stress_sum / weight_sum).iter());
        }

        ElementFields {
            displacement: self.displacement,
            strain,
            stress,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::properties::PropertyTable;
    use approx::assert_relative_eq;

    fn uniform_problem(shape: &[usize]) -> (GridMesh, PropertyTable, Vec<usize>) {
        let mesh = GridMesh::new(shape, 1.0).unwrap();
        let table = PropertyTable::new(shape.len(), &[1.0], &[0.3]).unwrap();
        let labels = vec![0; shape.iter().product()];
        (mesh, table, labels)
    }

    #[test]
    fn test_assembled_stiffness_is_symmetric_with_rigid_modes() {
        let (mesh, table, labels) = uniform_problem(&[2, 3]);
        let material = MaterialField::new(&table, &labels, &mesh);
        let element = VoxelElement::new(2, 1.0, 2).unwrap();
        let system = LinearSystem::assemble(&mesh, &material, &element);

        let dense = DMatrix::from(system.stiffness());
        assert_relative_eq!(dense.clone(), dense.transpose(), epsilon = 1e-12);

        // translation along x carries no force
        let translation = DVector::from_fn(dense.nrows(), |i, _| if i % 2 == 0 { 1.0 } else { 0.0 });
        assert_relative_eq!((dense * translation).norm(), 0.0, epsilon = 1e-12);
    }

    #[test]
    fn test_newton_converges_in_one_step() {
        let (mesh, table, labels) = uniform_problem(&[3, 3]);
        let material = MaterialField::new(&table, &labels, &mesh);
        let element = VoxelElement::new(2, 1.0, 2).unwrap();
        let bcs = BoundaryConditionSet::new(&mesh, 0.1, 0).unwrap();

        let system = LinearSystem::assemble(&mesh, &material, &element).constrain(&bcs);
        let solved = system.solve(&SolverSettings::default()).unwrap();
        assert_eq!(solved.newton_iterations, 1);

        // node (3, 1) = 3 * 4 + 1
        assert_relative_eq!(solved.displacement[13 * 2], 0.3, epsilon = 1e-10);
    }

    #[test]
    fn test_conjugate_gradient_matches_direct() {
        let mesh = GridMesh::new(&[4, 4], 1.0).unwrap();
        let table = PropertyTable::new(2, &[10.0, 1.0], &[0.3, 0.3]).unwrap();
        let labels: Vec<usize> = (0..16).map(|i| (i / 4 + i % 4) % 2).collect();
        let material = MaterialField::new(&table, &labels, &mesh);
        let element = VoxelElement::new(2, 1.0, 2).unwrap();
        let bcs = BoundaryConditionSet::new(&mesh, 0.1, 0).unwrap();
        let system = LinearSystem::assemble(&mesh, &material, &element).constrain(&bcs);

        let direct = system.solve(&SolverSettings::default()).unwrap();
        let settings = SolverSettings {
            linear_solver: LinearSolverKind::ConjugateGradient,
            ..SolverSettings::default()
        };
        let iterative = system.solve(&settings).unwrap();

        for (a, b) in direct.displacement.iter().zip(&iterative.displacement) {
            assert_relative_eq!(a, b, epsilon = 1e-6);
        }
    }

    #[test]
    fn test_iteration_cap_is_reported() {
        let (mesh, table, labels) = uniform_problem(&[3, 3]);
        let material = MaterialField::new(&table, &labels, &mesh);
        let element = VoxelElement::new(2, 1.0, 2).unwrap();
        let bcs = BoundaryConditionSet::new(&mesh, 0.1, 0).unwrap();
        let system = LinearSystem::assemble(&mesh, &material, &element).constrain(&bcs);

        // half steps never reach the tolerance in two iterations
        let settings = SolverSettings {
            damping: 0.5,
            max_newton_iterations: 2,
            ..SolverSettings::default()
        };
        assert!(matches!(
            system.solve(&settings),
            Err(VoxelElasticError::SolverConvergence(_))
        ));
    }

    #[test]
    fn test_singular_tangent_is_reported() {
        let a = CsrMatrix::from(&{
            let mut coo = CooMatrix::new(2, 2);
            coo.push(0, 0, 1.0);
            coo.push(0, 1, 1.0);
            coo.push(1, 0, 1.0);
            coo.push(1, 1, 1.0);
            coo
        });
        assert!(matches!(
            CholeskySolver.solve(&a, &[1.0, 0.0]),
            Err(VoxelElasticError::SolverConvergence(_))
        ));
    }

    #[test]
    fn test_invalid_settings() {
        let settings = SolverSettings {
            damping: 0.0,
            ..SolverSettings::default()
        };
        assert!(settings.validate().is_err());
        assert!(SolverSettings::default().validate().is_ok());
        assert!(LinearSolverKind::parse("lu").is_err());

        let defaults = SolverSettings::default();
        assert_eq!(defaults.element_order, 2);
        assert_eq!(defaults.quadrature_points, 3);
        for order in [0, 3] {
            let settings = SolverSettings {
                element_order: order,
                ..SolverSettings::default()
            };
            assert!(settings.validate().is_err());
        }
    }
}
