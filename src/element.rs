//! Voxel element kernels.
//!
//! Every element is an axis-aligned square (2D) or cube (3D) of edge
//! `delta_x` with tensor-product Lagrange shape functions
//!
//! ```text
//! N_n(ξ) = Π_a L_{k_a}(ξ_a)
//! ```
//!
//! on `order + 1` equally spaced nodes per axis in natural coordinates
//! ξ ∈ [-1, 1]^dim. Order 1 is the bilinear/trilinear element, order 2 the
//! 9-node/27-node element. The Jacobian is the constant diagonal
//! `delta_x / 2`, so gradients and volumes need no inversion.
//!
//! Strain vectors use Voigt ordering with engineering shear:
//! `(xx, yy, xy)` in 2D and `(xx, yy, zz, yz, xz, xy)` in 3D.

use nalgebra::DMatrix;

use crate::error::{Result, VoxelElasticError};

/// Number of independent strain or stress components
pub fn n_components(dim: usize) -> usize {
    dim * (dim + 1) / 2
}

/// Gauss-Legendre points and weights on [-1, 1]
fn gauss_legendre(points_per_axis: usize) -> Result<(Vec<f64>, Vec<f64>)> {
    match points_per_axis {
        1 => Ok((vec![0.0], vec![2.0])),
        2 => {
            let p = 1.0 / f64::sqrt(3.0);
            Ok((vec![-p, p], vec![1.0, 1.0]))
        }
        3 => {
            let p = f64::sqrt(3.0 / 5.0);
            Ok((vec![-p, 0.0, p], vec![5.0 / 9.0, 8.0 / 9.0, 5.0 / 9.0]))
        }
        n => Err(VoxelElasticError::Validation(format!(
            "quadrature must use 1 to 3 points per axis, got {n}"
        ))),
    }
}

#[derive(Debug, Clone, Copy)]
pub struct QuadraturePoint {
    pub natural: [f64; 3],
    pub weight: f64,
}

/// 1D Lagrange basis function `k` on `order + 1` equally spaced nodes of
/// [-1, 1], with its derivative
fn lagrange(order: usize, k: usize, xi: f64) -> (f64, f64) {
    let node = |m: usize| -1.0 + 2.0 * m as f64 / order as f64;
    let mut value = 1.0;
    let mut derivative = 0.0;
    for m in (0..=order).filter(|m| *m != k) {
        let denominator = node(k) - node(m);
        let factor = (xi - node(m)) / denominator;
        derivative = derivative * factor + value / denominator;
        value *= factor;
    }
    (value, derivative)
}

/// Shape-function data shared by every element of a mesh
#[derive(Debug, Clone)]
pub struct VoxelElement {
    dim: usize,
    delta_x: f64,
    order: usize,
    quadrature: Vec<QuadraturePoint>,
}

impl VoxelElement {
    /// First-order element
    pub fn new(dim: usize, delta_x: f64, points_per_axis: usize) -> Result<VoxelElement> {
        Self::with_order(dim, delta_x, 1, points_per_axis)
    }

    /// # Arguments
    /// * `dim` - The spatial dimension, 2 or 3
    /// * `delta_x` - The element edge length
    /// * `order` - Polynomial order, 1 or 2
    /// * `points_per_axis` - Gauss points along each axis, 1 to 3
    pub fn with_order(
        dim: usize,
        delta_x: f64,
        order: usize,
        points_per_axis: usize,
    ) -> Result<VoxelElement> {
        if !(1..=2).contains(&order) {
            return Err(VoxelElasticError::Validation(format!(
                "element order must be 1 or 2, got {order}"
            )));
        }
        let (points, weights) = gauss_legendre(points_per_axis)?;

        let n_points = points_per_axis.pow(dim as u32);
        let mut quadrature = Vec::with_capacity(n_points);
        for index in 0..n_points {
            let mut natural = [0.0; 3];
            let mut weight = 1.0;
            let mut rest = index;
            for axis in (0..dim).rev() {
                let k = rest % points_per_axis;
                rest /= points_per_axis;
                natural[axis] = points[k];
                weight *= weights[k];
            }
            quadrature.push(QuadraturePoint { natural, weight });
        }

        Ok(VoxelElement {
            dim,
            delta_x,
            order,
            quadrature,
        })
    }

    pub fn dim(&self) -> usize {
        self.dim
    }

    pub fn order(&self) -> usize {
        self.order
    }

    pub fn n_nodes(&self) -> usize {
        (self.order + 1).pow(self.dim as u32)
    }

    pub fn n_dofs(&self) -> usize {
        self.n_nodes() * self.dim
    }

    pub fn quadrature(&self) -> &[QuadraturePoint] {
        &self.quadrature
    }

    /// Determinant of the natural-to-physical Jacobian
    pub fn jacobian_det(&self) -> f64 {
        (0.5 * self.delta_x).powi(self.dim as i32)
    }

    /// Lattice index of local node `node` along `axis`
    fn node_index(&self, node: usize, axis: usize) -> usize {
        let per_axis = self.order + 1;
        (node / per_axis.pow((self.dim - 1 - axis) as u32)) % per_axis
    }

    /// Physical position of a natural point in an element with the given
    /// lower corner
    pub fn physical_point(&self, origin: &[f64; 3], natural: &[f64; 3]) -> [f64; 3] {
        let mut out = [0.0; 3];
        for axis in 0..self.dim {
            out[axis] = origin[axis] + 0.5 * (natural[axis] + 1.0) * self.delta_x;
        }
        out
    }

    /// Physical gradients of every shape function at a natural point
    pub fn shape_gradients(&self, natural: &[f64; 3]) -> Vec<[f64; 3]> {
        let scale = 2.0 / self.delta_x;
        (0..self.n_nodes())
            .map(|node| {
                let mut gradient = [0.0; 3];
                let basis: Vec<(f64, f64)> = (0..self.dim)
                    .map(|axis| lagrange(self.order, self.node_index(node, axis), natural[axis]))
                    .collect();
                for axis in 0..self.dim {
                    let mut value = basis[axis].1;
                    for other in (0..self.dim).filter(|b| *b != axis) {
                        value *= basis[other].0;
                    }
                    gradient[axis] = value * scale;
                }
                gradient
            })
            .collect()
    }

    /// Strain-displacement matrix at a natural point
    ///
    /// # Returns
    /// A `n_components x n_dofs` matrix mapping the element displacement
    /// vector `(u0x, u0y[, u0z], u1x, ...)` to the Voigt strain
    pub fn strain_displacement_matrix(&self, natural: &[f64; 3]) -> DMatrix<f64> {
        let gradients = self.shape_gradients(natural);
        let dim = self.dim;
        let mut b = DMatrix::zeros(n_components(dim), self.n_dofs());

        for (node, g) in gradients.iter().enumerate() {
            let col = node * dim;
            if dim == 2 {
                b[(0, col)] = g[0];
                b[(1, col + 1)] = g[1];
                b[(2, col)] = g[1];
                b[(2, col + 1)] = g[0];
            } else {
                b[(0, col)] = g[0];
                b[(1, col + 1)] = g[1];
                b[(2, col + 2)] = g[2];
                // yz
                b[(3, col + 1)] = g[2];
                b[(3, col + 2)] = g[1];
                // xz
                b[(4, col)] = g[2];
                b[(4, col + 2)] = g[0];
                // xy
                b[(5, col)] = g[1];
                b[(5, col + 1)] = g[0];
            }
        }

        b
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;
    use nalgebra::DVector;

    #[test]
    fn test_quadrature_weights_sum_to_reference_volume() {
        for dim in [2, 3] {
            for n in 1..=3 {
                let element = VoxelElement::new(dim, 1.0, n).unwrap();
                let total: f64 = element.quadrature().iter().map(|q| q.weight).sum();
                assert_relative_eq!(total, 2f64.powi(dim as i32), epsilon = 1e-12);
                assert_eq!(element.quadrature().len(), n.pow(dim as u32));
            }
        }
        assert!(VoxelElement::new(2, 1.0, 4).is_err());
    }

    #[test]
    fn test_gradients_partition_of_unity() {
        let element = VoxelElement::new(3, 0.5, 2).unwrap();
        let gradients = element.shape_gradients(&[0.2, -0.4, 0.7]);
        for axis in 0..3 {
            let sum: f64 = gradients.iter().map(|g| g[axis]).sum();
            assert_relative_eq!(sum, 0.0, epsilon = 1e-12);
        }
    }

    #[test]
    fn test_affine_field_gives_exact_strain_2d() {
        // u = (0.1 x + 0.3 y, 0.2 y) on a unit element
        let element = VoxelElement::new(2, 1.0, 2).unwrap();
        let corners = [[0.0, 0.0], [0.0, 1.0], [1.0, 0.0], [1.0, 1.0]];
        let u: Vec<f64> = corners
            .iter()
            .flat_map(|c| [0.1 * c[0] + 0.3 * c[1], 0.2 * c[1]])
            .collect();
        let u = DVector::from_vec(u);

        for q in element.quadrature() {
            let strain = element.strain_displacement_matrix(&q.natural) * &u;
            assert_relative_eq!(strain[0], 0.1, epsilon = 1e-12);
            assert_relative_eq!(strain[1], 0.2, epsilon = 1e-12);
            assert_relative_eq!(strain[2], 0.3, epsilon = 1e-12);
        }
    }

    #[test]
    fn test_lagrange_basis_is_nodal() {
        for order in 1..=2 {
            for k in 0..=order {
                for m in 0..=order {
                    let xi = -1.0 + 2.0 * m as f64 / order as f64;
                    let (value, _) = lagrange(order, k, xi);
                    assert_relative_eq!(value, if k == m { 1.0 } else { 0.0 }, epsilon = 1e-14);
                }
            }
        }
        // L_1 = 1 - ξ², L_2 = ξ(ξ + 1) / 2
        assert_relative_eq!(lagrange(2, 1, 0.3).1, -0.6, epsilon = 1e-14);
        assert_relative_eq!(lagrange(2, 2, 0.3).1, 0.8, epsilon = 1e-14);
    }

    #[test]
    fn test_quadratic_field_gives_exact_strain() {
        // u = (x², x y) on an element of edge 2 at the origin
        let element = VoxelElement::with_order(2, 2.0, 2, 3).unwrap();
        assert_eq!(element.n_nodes(), 9);
        assert_eq!(element.n_dofs(), 18);

        let mut u = Vec::new();
        for node in 0..9 {
            let x = (node / 3) as f64;
            let y = (node % 3) as f64;
            u.extend([x * x, x * y]);
        }
        let u = DVector::from_vec(u);

        let natural = [0.2, -0.5, 0.0];
        let point = element.physical_point(&[0.0; 3], &natural);
        let strain = element.strain_displacement_matrix(&natural) * &u;
        assert_relative_eq!(strain[0], 2.0 * point[0], epsilon = 1e-12);
        assert_relative_eq!(strain[1], point[0], epsilon = 1e-12);
        assert_relative_eq!(strain[2], point[1], epsilon = 1e-12);
    }

    #[test]
    fn test_second_order_gradients_partition_of_unity() {
        let element = VoxelElement::with_order(3, 1.0, 2, 3).unwrap();
        assert_eq!(element.n_nodes(), 27);
        let gradients = element.shape_gradients(&[-0.3, 0.6, 0.1]);
        for axis in 0..3 {
            let sum: f64 = gradients.iter().map(|g| g[axis]).sum();
            assert_relative_eq!(sum, 0.0, epsilon = 1e-12);
        }
        assert!(VoxelElement::with_order(2, 1.0, 3, 2).is_err());
    }

    #[test]
    fn test_affine_field_gives_exact_strain_3d() {
        // u = (0.5 z, 0, 0) gives only xz shear
        let element = VoxelElement::new(3, 2.0, 2).unwrap();
        let mut u = Vec::new();
        for node in 0..8 {
            let z = if node & 1 == 1 { 2.0 } else { 0.0 };
            u.extend([0.5 * z, 0.0, 0.0]);
        }
        let u = DVector::from_vec(u);
        let strain = element.strain_displacement_matrix(&[0.1, 0.1, 0.1]) * &u;
        for (i, expected) in [0.0, 0.0, 0.0, 0.0, 0.5, 0.0].iter().enumerate() {
            assert_relative_eq!(strain[i], *expected, epsilon = 1e-12);
        }
    }
}
