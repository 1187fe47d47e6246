use nalgebra::DMatrix;

use crate::{
    element::n_components,
    mesher::{row_major_strides, GridMesh},
    properties::PropertyTable,
};

/// How an assembler is querying the material
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EvaluationMode {
    /// Values at quadrature points of the stiffness integral
    QuadraturePoint,
    /// Any other query. The voxel material has nothing to contribute.
    Special,
}

/// Material values at one quadrature point
#[derive(Debug, Clone, PartialEq)]
pub struct MaterialPoint {
    pub lame: f64,
    pub mu: f64,
    pub stiffness: DMatrix<f64>,
}

/// Calculates the isotropic stiffness matrix from the Lamé constants
///
/// # Arguments
/// * `dim` - The spatial dimension, 2 (plane strain) or 3
/// * `lame` - Lamé's first parameter
/// * `mu` - The shear modulus
///
/// # Returns
/// A 3x3 or 6x6 stiffness matrix in Voigt order with engineering shear
pub fn stiffness_from_lame(dim: usize, lame: f64, mu: f64) -> DMatrix<f64> {
    let n = n_components(dim);
    let mut stiffness = DMatrix::zeros(n, n);

    for i in 0..dim {
        for j in 0..dim {
            stiffness[(i, j)] = lame;
        }
        stiffness[(i, i)] += 2.0 * mu;
    }
    for i in dim..n {
        stiffness[(i, i)] = mu;
    }

    stiffness
}

/// Piecewise-constant material over the voxels of one sample
///
/// Quadrature coordinates are mapped back to their voxel with
/// `floor((coord - domain_min) / delta_x)`; there is no blending across
/// voxel boundaries.
pub struct MaterialField<'a> {
    table: &'a PropertyTable,
    labels: &'a [usize],
    mesh: &'a GridMesh,
    strides: Vec<usize>,
}

impl<'a> MaterialField<'a> {
    /// # Arguments
    /// * `table` - The phase property table
    /// * `labels` - Phase labels of the sample, row-major over the voxel grid
    /// * `mesh` - The mesh built from the same voxel grid
    pub fn new(table: &'a PropertyTable, labels: &'a [usize], mesh: &'a GridMesh) -> Self {
        debug_assert_eq!(labels.len(), mesh.elements().len());
        MaterialField {
            table,
            labels,
            mesh,
            strides: row_major_strides(mesh.shape()),
        }
    }

    /// Flat index of the voxel containing a point
    pub fn voxel_index(&self, coords: &[f64; 3]) -> usize {
        let min = self.mesh.domain_min();
        let delta_x = self.mesh.delta_x();

        let mut index = 0;
        for (axis, n) in self.mesh.shape().iter().enumerate() {
            let position = ((coords[axis] - min[axis]) / delta_x).floor();
            debug_assert!(
                position >= 0.0 && position <= *n as f64,
                "point {coords:?} lies outside the voxel grid"
            );
            // points exactly on the max face belong to the last voxel
            let voxel = (position.max(0.0) as usize).min(n - 1);
            index += voxel * self.strides[axis];
        }
        index
    }

    /// Evaluates the material at a batch of points
    ///
    /// # Returns
    /// One `MaterialPoint` per coordinate in quadrature-point mode, `None`
    /// in any other mode
    pub fn evaluate(&self, coords: &[[f64; 3]], mode: EvaluationMode) -> Option<Vec<MaterialPoint>> {
        if mode != EvaluationMode::QuadraturePoint {
            return None;
        }

        let dim = self.mesh.dim();
        Some(
            coords
                .iter()
                .map(|c| {
                    let constants = self.table.get(self.labels[self.voxel_index(c)]);
                    MaterialPoint {
                        lame: constants.lame,
                        mu: constants.mu,
                        stiffness: stiffness_from_lame(dim, constants.lame, constants.mu),
                    }
                })
                .collect(),
        )
    }
}
