use crate::{
    datatypes::{Element, Node, Region, Side, Vertex},
    error::{Result, VoxelElasticError},
    logging::info,
};

/// Structured mesh of a voxel grid
///
/// Elements coincide with voxels. An element of order `p` carries a
/// `(p + 1)^dim` lattice of equally spaced nodes, so the node grid is
/// `n * p + 1` along an axis of `n` voxels and every `p`-th node is a voxel
/// corner (a vertex). Nodes and elements are numbered row-major with the
/// first axis slowest.
#[derive(Debug, Clone)]
pub struct GridMesh {
    shape: Vec<usize>,
    delta_x: f64,
    order: usize,
    nodes: Vec<Node>,
    elements: Vec<Element>,
}

/// Row-major strides for a grid shape
pub fn row_major_strides(shape: &[usize]) -> Vec<usize> {
    let mut strides = vec![1; shape.len()];
    for axis in (0..shape.len().saturating_sub(1)).rev() {
        strides[axis] = strides[axis + 1] * shape[axis + 1];
    }
    strides
}

/// Splits a flat row-major index into grid indices
fn unravel(mut index: usize, shape: &[usize]) -> [usize; 3] {
    let mut out = [0; 3];
    for axis in (0..shape.len()).rev() {
        out[axis] = index % shape[axis];
        index /= shape[axis];
    }
    out
}

impl GridMesh {
    /// Builds a first-order mesh, nodes on voxel corners only
    pub fn new(shape: &[usize], delta_x: f64) -> Result<GridMesh> {
        Self::with_order(shape, delta_x, 1)
    }

    /// Builds the mesh for a voxel grid
    ///
    /// # Arguments
    /// * `shape` - The voxel grid shape, `(n_x, n_y)` or `(n_x, n_y, n_z)`
    /// * `delta_x` - The voxel edge length
    /// * `order` - Polynomial order of the elements, 1 or 2
    pub fn with_order(shape: &[usize], delta_x: f64, order: usize) -> Result<GridMesh> {
        if !(shape.len() == 2 || shape.len() == 3) {
            return Err(VoxelElasticError::Validation(format!(
                "voxel grid must be 2D or 3D, got {} axes",
                shape.len()
            )));
        }
        if shape.iter().any(|n| *n == 0) {
            return Err(VoxelElasticError::Validation(format!(
                "voxel grid has an empty axis: {shape:?}"
            )));
        }
        if !(delta_x.is_finite() && delta_x > 0.0) {
            return Err(VoxelElasticError::Validation(format!(
                "delta_x must be positive and finite, got {delta_x}"
            )));
        }

        if !(1..=2).contains(&order) {
            return Err(VoxelElasticError::Validation(format!(
                "element order must be 1 or 2, got {order}"
            )));
        }

        let dim = shape.len();
        let node_shape: Vec<usize> = shape.iter().map(|n| n * order + 1).collect();
        let node_strides = row_major_strides(&node_shape);
        let spacing = delta_x / order as f64;

        let n_nodes: usize = node_shape.iter().product();
        let nodes: Vec<Node> = (0..n_nodes)
            .map(|index| {
                let grid = unravel(index, &node_shape);
                let mut coords = [0.0; 3];
                for axis in 0..dim {
                    coords[axis] = grid[axis] as f64 * spacing;
                }
                Node {
                    vertex: Vertex { coords },
                }
            })
            .collect();

        let local_shape = vec![order + 1; dim];
        let n_local: usize = local_shape.iter().product();
        let n_elements: usize = shape.iter().product();
        let elements: Vec<Element> = (0..n_elements)
            .map(|index| {
                let voxel = unravel(index, shape);
                let nodes = (0..n_local)
                    .map(|local| {
                        let offset = unravel(local, &local_shape);
                        (0..dim)
                            .map(|axis| (voxel[axis] * order + offset[axis]) * node_strides[axis])
                            .sum()
                    })
                    .collect();
                Element { nodes, voxel }
            })
            .collect();

        info!(
            "meshed {:?} voxel grid into {} nodes and {} order {} elements",
            shape,
            nodes.len(),
            elements.len(),
            order
        );

        Ok(GridMesh {
            shape: shape.to_vec(),
            delta_x,
            order,
            nodes,
            elements,
        })
    }

    pub fn dim(&self) -> usize {
        self.shape.len()
    }

    /// The voxel grid shape
    pub fn shape(&self) -> &[usize] {
        &self.shape
    }

    pub fn order(&self) -> usize {
        self.order
    }

    /// The node grid shape, `n * order + 1` along every axis
    pub fn node_shape(&self) -> Vec<usize> {
        self.shape.iter().map(|n| n * self.order + 1).collect()
    }

    /// The vertex grid shape, one larger than the voxel grid along every axis
    pub fn vertex_shape(&self) -> Vec<usize> {
        self.shape.iter().map(|n| n + 1).collect()
    }

    /// Indices of the voxel-corner nodes, row-major over the vertex grid
    pub fn vertex_nodes(&self) -> Vec<usize> {
        let vertex_shape = self.vertex_shape();
        let node_strides = row_major_strides(&self.node_shape());
        let n_vertices: usize = vertex_shape.iter().product();
        (0..n_vertices)
            .map(|index| {
                let grid = unravel(index, &vertex_shape);
                (0..self.dim())
                    .map(|axis| grid[axis] * self.order * node_strides[axis])
                    .sum()
            })
            .collect()
    }

    pub fn delta_x(&self) -> f64 {
        self.delta_x
    }

    pub fn nodes(&self) -> &[Node] {
        &self.nodes
    }

    pub fn elements(&self) -> &[Element] {
        &self.elements
    }

    /// Domain bounds along an axis
    pub fn bounds(&self, axis: usize) -> (f64, f64) {
        (0.0, self.shape[axis] as f64 * self.delta_x)
    }

    /// Lower corner of the domain bounding box
    pub fn domain_min(&self) -> [f64; 3] {
        [0.0; 3]
    }

    /// Domain length along an axis
    pub fn length(&self, axis: usize) -> f64 {
        let (min, max) = self.bounds(axis);
        max - min
    }

    /// Tolerance used by the coordinate predicates
    pub fn tolerance(&self) -> f64 {
        1e-3 * self.delta_x
    }

    fn is_at(&self, coord: f64, target: f64) -> bool {
        (coord - target).abs() < self.tolerance()
    }

    fn is_on_face(&self, vertex: &Vertex, axis: usize, side: Side) -> bool {
        let (min, max) = self.bounds(axis);
        let target = match side {
            Side::Min => min,
            Side::Max => max,
        };
        self.is_at(vertex.coords[axis], target)
    }

    /// Tests a vertex against a region predicate
    pub fn contains(&self, region: Region, vertex: &Vertex) -> bool {
        match region {
            Region::All => true,
            Region::Face { axis, side } => self.is_on_face(vertex, axis, side),
            Region::Corners { axis, side } => {
                self.is_on_face(vertex, axis, side)
                    && (0..self.dim()).filter(|b| *b != axis).all(|b| {
                        self.is_on_face(vertex, b, Side::Min) || self.is_on_face(vertex, b, Side::Max)
                    })
            }
        }
    }

    /// Indices of the nodes in a region, in ascending order
    pub fn region_nodes(&self, region: Region) -> Vec<usize> {
        self.nodes
            .iter()
            .enumerate()
            .filter(|(_, node)| self.contains(region, &node.vertex))
            .map(|(i, _)| i)
            .collect()
    }

    /// Coordinates of the element's node with the lowest coordinates
    pub fn element_origin(&self, element: &Element) -> [f64; 3] {
        self.nodes[element.nodes[0]].vertex.coords
    }
}
