//! Boundary conditions for the periodic macro-strain problem.
//!
//! With loading axis `a`, domain length `L` along it and macro strain `e`:
//!
//! * `fix`: the min-`a` corners are held at zero displacement
//! * `shift`: the max-`a` corners are displaced by `e * L` along `a`
//! * `periodic_*`: opposite faces share every transverse component, and
//!   faces normal to the other axes share the `a` component
//! * `lcbc`: `u_a(max face) = u_a(min face) + e * L`
//!
//! Every condition is resolved into a [`DofMapping`] that expresses each
//! degree of freedom as either a prescribed value or a free master plus a
//! constant offset.

use std::cmp::Ordering;

use crate::{
    datatypes::{axis_name, Region, Side},
    error::{Result, VoxelElasticError},
    logging::info,
    mesher::GridMesh,
};

/// Pairing of the max face (slave) onto the min face (master) of an axis
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FacePair {
    pub axis: usize,
}

#[derive(Debug, Clone, PartialEq)]
pub enum BoundaryCondition {
    /// Prescribed displacement components on a vertex region
    Essential {
        name: String,
        region: Region,
        values: Vec<(usize, f64)>,
    },
    /// Equal displacement components on matched nodes of a face pair
    Periodic {
        name: String,
        pair: FacePair,
        components: Vec<usize>,
        /// Nodes of this region are left out of both faces
        exclude: Option<Region>,
    },
    /// `u_c(max face) = u_c(min face) + offset` on matched nodes
    LinearCombination {
        name: String,
        pair: FacePair,
        component: usize,
        offset: f64,
    },
}

impl BoundaryCondition {
    pub fn name(&self) -> &str {
        match self {
            BoundaryCondition::Essential { name, .. } => name,
            BoundaryCondition::Periodic { name, .. } => name,
            BoundaryCondition::LinearCombination { name, .. } => name,
        }
    }
}

/// Each degree of freedom written as `u[d] = u_free[free[d]] + shift[d]`,
/// or `u[d] = shift[d]` when `free[d]` is `None`
#[derive(Debug, Clone)]
pub struct DofMapping {
    pub free: Vec<Option<usize>>,
    pub shift: Vec<f64>,
    pub n_free: usize,
}

impl DofMapping {
    pub fn n_dofs(&self) -> usize {
        self.free.len()
    }

    /// Expands a reduced solution into every degree of freedom
    pub fn expand(&self, reduced: &[f64]) -> Vec<f64> {
        self.free
            .iter()
            .zip(&self.shift)
            .map(|(free, shift)| match free {
                Some(i) => reduced[*i] + shift,
                None => *shift,
            })
            .collect()
    }
}

fn values_agree(a: f64, b: f64) -> bool {
    (a - b).abs() <= 1e-9 * (1.0 + a.abs().max(b.abs()))
}

/// Union-find over degrees of freedom where every member of a set differs
/// from the set root by a fixed offset
struct OffsetUnionFind {
    parent: Vec<usize>,
    /// `u[d] = u[parent[d]] + offset[d]`
    offset: Vec<f64>,
    size: Vec<usize>,
    prescribed: Vec<Option<f64>>,
}

impl OffsetUnionFind {
    fn new(n: usize) -> Self {
        OffsetUnionFind {
            parent: (0..n).collect(),
            offset: vec![0.0; n],
            size: vec![1; n],
            prescribed: vec![None; n],
        }
    }

    /// Root of `dof` and the offset `u[dof] - u[root]`
    fn find(&mut self, dof: usize) -> (usize, f64) {
        let parent = self.parent[dof];
        if parent == dof {
            return (dof, 0.0);
        }
        let (root, to_parent) = self.find(parent);
        self.parent[dof] = root;
        self.offset[dof] += to_parent;
        (root, self.offset[dof])
    }

    /// Records `u[slave] = u[master] + offset`
    fn link(&mut self, slave: usize, master: usize, offset: f64) -> Result<()> {
        let (slave_root, slave_offset) = self.find(slave);
        let (master_root, master_offset) = self.find(master);
        // u[slave_root] = u[master_root] + delta
        let delta = master_offset + offset - slave_offset;

        if slave_root == master_root {
            if !values_agree(delta, 0.0) {
                return Err(VoxelElasticError::MeshConsistency(format!(
                    "contradictory offsets between dofs {slave} and {master}"
                )));
            }
            return Ok(());
        }

        let (child, root, child_offset) = if self.size[slave_root] <= self.size[master_root] {
            (slave_root, master_root, delta)
        } else {
            (master_root, slave_root, -delta)
        };
        self.parent[child] = root;
        self.offset[child] = child_offset;
        self.size[root] += self.size[child];
        Ok(())
    }

    /// Records `u[dof] = value`. Must be called after every link.
    fn prescribe(&mut self, dof: usize, value: f64) -> Result<()> {
        let (root, offset) = self.find(dof);
        let root_value = value - offset;
        match self.prescribed[root] {
            Some(existing) if !values_agree(existing, root_value) => {
                Err(VoxelElasticError::MeshConsistency(format!(
                    "dof {dof} is prescribed {value} but its constraints imply {}",
                    existing + offset
                )))
            }
            _ => {
                self.prescribed[root] = Some(root_value);
                Ok(())
            }
        }
    }

    fn into_mapping(mut self) -> DofMapping {
        let n = self.parent.len();
        let mut reduced_index: Vec<Option<usize>> = vec![None; n];
        let mut n_free = 0;
        let mut free = Vec::with_capacity(n);
        let mut shift = Vec::with_capacity(n);

        for dof in 0..n {
            let (root, offset) = self.find(dof);
            match self.prescribed[root] {
                Some(value) => {
                    free.push(None);
                    shift.push(value + offset);
                }
                None => {
                    let index = *reduced_index[root].get_or_insert_with(|| {
                        n_free += 1;
                        n_free - 1
                    });
                    free.push(Some(index));
                    shift.push(offset);
                }
            }
        }

        DofMapping {
            free,
            shift,
            n_free,
        }
    }
}

/// The boundary conditions of one sample, already resolved against its mesh
#[derive(Debug, Clone)]
pub struct BoundaryConditionSet {
    conditions: Vec<BoundaryCondition>,
    mapping: DofMapping,
}

/// Pairs the nodes of the max face of `axis` with those of the min face
/// that share coordinates along every other axis
///
/// # Returns
/// `(slave, master)` node pairs, or a mesh-consistency error when the faces
/// do not match node for node
pub fn match_plane(
    mesh: &GridMesh,
    axis: usize,
    exclude: Option<Region>,
) -> Result<Vec<(usize, usize)>> {
    let face = |side: Side| -> Vec<usize> {
        let mut nodes: Vec<usize> = mesh
            .region_nodes(Region::Face { axis, side })
            .into_iter()
            .filter(|n| match exclude {
                Some(region) => !mesh.contains(region, &mesh.nodes()[*n].vertex),
                None => true,
            })
            .collect();
        let transverse_order = |a: &usize, b: &usize| -> Ordering {
            let ca = &mesh.nodes()[*a].vertex.coords;
            let cb = &mesh.nodes()[*b].vertex.coords;
            (0..mesh.dim())
                .filter(|other| *other != axis)
                .map(|other| ca[other].total_cmp(&cb[other]))
                .find(|o| *o != Ordering::Equal)
                .unwrap_or(Ordering::Equal)
        };
        nodes.sort_by(transverse_order);
        nodes
    };

    let plus = face(Side::Max);
    let minus = face(Side::Min);

    if plus.len() != minus.len() {
        return Err(VoxelElasticError::MeshConsistency(format!(
            "{} faces have {} and {} nodes",
            axis_name(axis),
            plus.len(),
            minus.len()
        )));
    }

    let tolerance = mesh.tolerance();
    let mut pairs = Vec::with_capacity(plus.len());
    for (slave, master) in std::iter::zip(plus, minus) {
        let cs = &mesh.nodes()[slave].vertex.coords;
        let cm = &mesh.nodes()[master].vertex.coords;
        let matched = (0..mesh.dim())
            .filter(|other| *other != axis)
            .all(|other| (cs[other] - cm[other]).abs() < tolerance);
        if !matched {
            return Err(VoxelElasticError::MeshConsistency(format!(
                "no match on the min {} face for node {slave} at {:?}",
                axis_name(axis),
                &cs[..mesh.dim()]
            )));
        }
        pairs.push((slave, master));
    }

    Ok(pairs)
}

impl BoundaryConditionSet {
    /// Builds and resolves the boundary conditions for a mesh
    ///
    /// # Arguments
    /// * `mesh` - The sample mesh
    /// * `macro_strain` - The prescribed macroscopic strain
    /// * `loading_axis` - The axis the macro strain is applied along
    pub fn new(mesh: &GridMesh, macro_strain: f64, loading_axis: usize) -> Result<Self> {
        let dim = mesh.dim();
        if loading_axis >= dim {
            return Err(VoxelElasticError::Validation(format!(
                "loading axis {loading_axis} does not exist in a {dim}D domain"
            )));
        }

        let conditions = Self::build_conditions(mesh, macro_strain, loading_axis);
        let mapping = Self::resolve(mesh, &conditions)?;

        info!(
            "resolved boundary conditions [{}]: {} of {} dofs free",
            conditions
                .iter()
                .map(|c| c.name())
                .collect::<Vec<_>>()
                .join(", "),
            mapping.n_free,
            mapping.n_dofs()
        );

        Ok(BoundaryConditionSet {
            conditions,
            mapping,
        })
    }

    fn build_conditions(
        mesh: &GridMesh,
        macro_strain: f64,
        loading_axis: usize,
    ) -> Vec<BoundaryCondition> {
        let dim = mesh.dim();
        let shift = macro_strain * mesh.length(loading_axis);
        let transverse: Vec<usize> = (0..dim).filter(|c| *c != loading_axis).collect();
        let loading_name = axis_name(loading_axis);

        let mut conditions = vec![
            BoundaryCondition::Essential {
                name: "shift_points_BC".to_owned(),
                region: Region::Corners {
                    axis: loading_axis,
                    side: Side::Max,
                },
                values: vec![(loading_axis, shift)],
            },
            BoundaryCondition::Essential {
                name: "fix_points_BC".to_owned(),
                region: Region::Corners {
                    axis: loading_axis,
                    side: Side::Min,
                },
                values: (0..dim).map(|c| (c, 0.0)).collect(),
            },
        ];

        for axis in 0..dim {
            conditions.push(BoundaryCondition::Periodic {
                name: format!("periodic_{}", axis_name(axis)),
                pair: FacePair { axis },
                components: transverse.clone(),
                exclude: None,
            });
        }
        for axis in transverse.iter().copied() {
            conditions.push(BoundaryCondition::Periodic {
                name: format!("periodic_{}_u{}", axis_name(axis), loading_name),
                pair: FacePair { axis },
                components: vec![loading_axis],
                exclude: Some(Region::Face {
                    axis: loading_axis,
                    side: Side::Max,
                }),
            });
        }

        conditions.push(BoundaryCondition::LinearCombination {
            name: "lcbc".to_owned(),
            pair: FacePair { axis: loading_axis },
            component: loading_axis,
            offset: shift,
        });

        conditions
    }

    fn resolve(mesh: &GridMesh, conditions: &[BoundaryCondition]) -> Result<DofMapping> {
        let dim = mesh.dim();
        let dof = |node: usize, component: usize| node * dim + component;
        let mut union_find = OffsetUnionFind::new(mesh.nodes().len() * dim);

        // Links first so every prescribed value lands on a final root
        for condition in conditions {
            match condition {
                BoundaryCondition::Periodic {
                    pair,
                    components,
                    exclude,
                    ..
                } => {
                    for (slave, master) in match_plane(mesh, pair.axis, *exclude)? {
                        for c in components {
                            union_find.link(dof(slave, *c), dof(master, *c), 0.0)?;
                        }
                    }
                }
                BoundaryCondition::LinearCombination {
                    pair,
                    component,
                    offset,
                    ..
                } => {
                    for (slave, master) in match_plane(mesh, pair.axis, None)? {
                        union_find.link(dof(slave, *component), dof(master, *component), *offset)?;
                    }
                }
                BoundaryCondition::Essential { .. } => {}
            }
        }

        for condition in conditions {
            if let BoundaryCondition::Essential {
                name,
                region,
                values,
            } = condition
            {
                let nodes = mesh.region_nodes(*region);
                if nodes.is_empty() {
                    return Err(VoxelElasticError::MeshConsistency(format!(
                        "{name} selects no vertices in {}",
                        region.name()
                    )));
                }
                for node in nodes {
                    for (c, value) in values {
                        union_find.prescribe(dof(node, *c), *value)?;
                    }
                }
            }
        }

        Ok(union_find.into_mapping())
    }

    pub fn mapping(&self) -> &DofMapping {
        &self.mapping
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    #[test]
    fn test_conditions_2d() {
        let mesh = GridMesh::new(&[3, 3], 1.0).unwrap();
        let bcs = BoundaryConditionSet::new(&mesh, 0.5, 0).unwrap();
        let names: Vec<&str> = bcs.conditions.iter().map(|c| c.name()).collect();
        assert_eq!(
            names,
            vec![
                "shift_points_BC",
                "fix_points_BC",
                "periodic_x",
                "periodic_y",
                "periodic_y_ux",
                "lcbc"
            ]
        );
    }

    #[test]
    fn test_match_plane_pairs_opposite_nodes() {
        let mesh = GridMesh::new(&[2, 3], 1.0).unwrap();
        // node (i, j) = i * 4 + j
        let pairs = match_plane(&mesh, 0, None).unwrap();
        assert_eq!(pairs, vec![(8, 0), (9, 1), (10, 2), (11, 3)]);

        let pairs = match_plane(
            &mesh,
            1,
            Some(Region::Face {
                axis: 0,
                side: Side::Max,
            }),
        )
        .unwrap();
        assert_eq!(pairs, vec![(3, 0), (7, 4)]);
    }

    #[test]
    fn test_mapping_applies_offsets() {
        let mesh = GridMesh::new(&[2, 2], 1.0).unwrap();
        let bcs = BoundaryConditionSet::new(&mesh, 0.1, 0).unwrap();
        let mapping = bcs.mapping();

        // ux at the max-x corners is prescribed to 0.1 * 2
        for node in [6, 8] {
            assert_eq!(mapping.free[node * 2], None);
            assert_relative_eq!(mapping.shift[node * 2], 0.2, epsilon = 1e-12);
        }
        // ux of the max-x middle node follows the min-x middle node
        assert_eq!(mapping.free[7 * 2], mapping.free[2]);
        assert!(mapping.free[2].is_some());
        assert_relative_eq!(mapping.shift[7 * 2], 0.2, epsilon = 1e-12);

        // uy of the max-y face follows the min-y face
        assert_eq!(mapping.free[5 * 2 + 1], mapping.free[3 * 2 + 1]);

        // 9 nodes, periodic in both axes leaves the 4 interior-like nodes
        // (0,0) (0,1) (1,0) (1,1) per component, minus the fixed corner
        assert_eq!(mapping.n_free, 3 + 3);

        let expanded = mapping.expand(&vec![0.0; mapping.n_free]);
        assert_relative_eq!(expanded[8 * 2], 0.2, epsilon = 1e-12);
        assert_relative_eq!(expanded[0], 0.0, epsilon = 1e-12);
    }

    #[test]
    fn test_three_dimensional_corners() {
        let mesh = GridMesh::new(&[2, 2, 2], 1.0).unwrap();
        let bcs = BoundaryConditionSet::new(&mesh, 1.0, 0).unwrap();
        let mapping = bcs.mapping();
        // 27 nodes collapse to 8 periodic classes, the fixed corner class
        // has no free dofs
        assert_eq!(mapping.n_free, 7 * 3);
    }

    #[test]
    fn test_contradictory_prescriptions() {
        let mut union_find = OffsetUnionFind::new(3);
        union_find.link(1, 0, 1.0).unwrap();
        union_find.link(2, 1, 1.0).unwrap();
        assert!(union_find.link(2, 0, 0.5).is_err());

        union_find.prescribe(0, 0.0).unwrap();
        union_find.prescribe(2, 2.0).unwrap();
        assert!(matches!(
            union_find.prescribe(1, 5.0),
            Err(VoxelElasticError::MeshConsistency(_))
        ));
    }

    #[test]
    fn test_invalid_loading_axis() {
        let mesh = GridMesh::new(&[2, 2], 1.0).unwrap();
        assert!(matches!(
            BoundaryConditionSet::new(&mesh, 1.0, 2),
            Err(VoxelElasticError::Validation(_))
        ));
    }
}
