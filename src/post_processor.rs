use std::{
    fs::File,
    io::{BufWriter, Write},
    path::Path,
};

use ndarray::{stack, ArrayD, ArrayViewD, Axis, IxDyn};

use crate::{
    element::n_components,
    error::{Result, VoxelElasticError},
    logging::info,
    mesher::GridMesh,
    solver::ElementFields,
};

/// Strain and stress component names in output order
pub fn component_names(dim: usize) -> &'static [&'static str] {
    if dim == 2 {
        &["xx", "yy", "xy"]
    } else {
        &["xx", "yy", "zz", "yz", "xz", "xy"]
    }
}

static DISPLACEMENT_NAMES: [&str; 3] = ["ux", "uy", "uz"];

/// Displacement component names in output order
pub fn displacement_names(dim: usize) -> &'static [&'static str] {
    &DISPLACEMENT_NAMES[..dim]
}

/// Fields of one sample on the voxel grid
///
/// * `strain`, `stress`: `(*grid_shape, n_components)` with components in
///   [`component_names`] order; shear strain is engineering shear
/// * `displacement`: `(*(grid_shape + 1), dim)`
#[derive(Debug, Clone)]
pub struct Solution {
    pub strain: ArrayD<f64>,
    pub displacement: ArrayD<f64>,
    pub stress: ArrayD<f64>,
    pub newton_iterations: usize,
}

fn shaped(shape: Vec<usize>, data: Vec<f64>, field: &str) -> Result<ArrayD<f64>> {
    ArrayD::from_shape_vec(IxDyn(&shape), data).map_err(|err| {
        VoxelElasticError::MeshConsistency(format!(
            "{field} does not fit shape {shape:?}: {err}"
        ))
    })
}

/// Reshapes the raw solve output onto the voxel grid
///
/// Displacement is reported at the voxel corners only; the extra nodes of
/// second-order elements are dropped.
///
/// # Arguments
/// * `mesh` - The mesh the fields were computed on
/// * `fields` - Nodal displacement and element strain/stress in assembly
///     order
/// * `newton_iterations` - Iterations the solve took
pub fn extract(mesh: &GridMesh, fields: ElementFields, newton_iterations: usize) -> Result<Solution> {
    let dim = mesh.dim();
    let n_comp = n_components(dim);

    let mut element_shape = mesh.shape().to_vec();
    element_shape.push(n_comp);
    let mut vertex_shape = mesh.vertex_shape();
    vertex_shape.push(dim);

    if fields.displacement.len() != mesh.nodes().len() * dim {
        return Err(VoxelElasticError::MeshConsistency(format!(
            "displacement has {} values for {} nodes",
            fields.displacement.len(),
            mesh.nodes().len()
        )));
    }
    let vertex_displacement: Vec<f64> = mesh
        .vertex_nodes()
        .iter()
        .flat_map(|node| (0..dim).map(move |c| node * dim + c))
        .map(|dof| fields.displacement[dof])
        .collect();

    Ok(Solution {
        strain: shaped(element_shape.clone(), fields.strain, "strain")?,
        displacement: shaped(vertex_shape, vertex_displacement, "displacement")?,
        stress: shaped(element_shape, fields.stress, "stress")?,
        newton_iterations,
    })
}

/// Stacks per-sample solutions along a new leading sample axis
///
/// # Returns
/// The strain, displacement and stress arrays, in that order
pub fn stack_samples(solutions: &[Solution]) -> Result<(ArrayD<f64>, ArrayD<f64>, ArrayD<f64>)> {
    let stack_field = |views: Vec<ArrayViewD<f64>>| -> Result<ArrayD<f64>> {
        stack(Axis(0), &views).map_err(|err| {
            VoxelElasticError::MeshConsistency(format!("samples do not share a shape: {err}"))
        })
    };

    Ok((
        stack_field(solutions.iter().map(|s| s.strain.view()).collect())?,
        stack_field(solutions.iter().map(|s| s.displacement.view()).collect())?,
        stack_field(solutions.iter().map(|s| s.stress.view()).collect())?,
    ))
}

/// Writes one batch field as CSV, one row per grid point
///
/// Columns are `sample`, one index column per spatial axis, then one column
/// per component. The `sample` column holds `samples[k]` for row block `k`.
fn write_field_csv(
    path: &Path,
    field: &ArrayD<f64>,
    samples: &[usize],
    components: &[&str],
) -> Result<()> {
    let file = File::create(path).map_err(|err| {
        VoxelElasticError::Input(format!("Failed to create {}: {err}", path.display()))
    })?;
    let mut writer = BufWriter::new(file);

    let ndim = field.ndim();
    let grid_axes = ["i", "j", "k"];
    let mut header = vec!["sample"];
    header.extend(&grid_axes[..ndim - 2]);
    header.extend(components);
    writeln!(writer, "{}", header.join(","))?;

    let lead_shape = &field.shape()[..ndim - 1];
    for (row_index, row) in field.rows().into_iter().enumerate() {
        let mut index = vec![0; lead_shape.len()];
        let mut rest = row_index;
        for axis in (0..lead_shape.len()).rev() {
            index[axis] = rest % lead_shape[axis];
            rest /= lead_shape[axis];
        }

        index[0] = samples[index[0]];
        let cells: Vec<String> = index
            .iter()
            .map(|i| i.to_string())
            .chain(row.iter().map(|v| v.to_string()))
            .collect();
        writeln!(writer, "{}", cells.join(","))?;
    }

    writer.flush()?;
    Ok(())
}

/// Writes simulation results to three CSV files in `output_dir`
///
/// # Arguments
/// * `strain` - Batch strain, `(n_samples, *grid, n_components)`
/// * `displacement` - Batch displacement, `(n_samples, *(grid + 1), dim)`
/// * `stress` - Batch stress, `(n_samples, *grid, n_components)`
/// * `samples` - Batch index of each stacked sample
/// * `output_dir` - The directory to write into
pub fn csv_output(
    strain: &ArrayD<f64>,
    displacement: &ArrayD<f64>,
    stress: &ArrayD<f64>,
    samples: &[usize],
    output_dir: &Path,
) -> Result<()> {
    let dim = displacement.ndim() - 2;
    for field in [strain, displacement, stress] {
        if field.len_of(Axis(0)) != samples.len() {
            return Err(VoxelElasticError::Input(format!(
                "{} sample indices given for {} stacked samples",
                samples.len(),
                field.len_of(Axis(0))
            )));
        }
    }
    std::fs::create_dir_all(output_dir)?;

    let strain_output = output_dir.join("strain.csv");
    let displacement_output = output_dir.join("displacement.csv");
    let stress_output = output_dir.join("stress.csv");

    let strain_names: Vec<String> = component_names(dim).iter().map(|c| format!("e{c}")).collect();
    let stress_names: Vec<String> = component_names(dim).iter().map(|c| format!("s{c}")).collect();
    let strain_names: Vec<&str> = strain_names.iter().map(String::as_str).collect();
    let stress_names: Vec<&str> = stress_names.iter().map(String::as_str).collect();

    write_field_csv(&strain_output, strain, samples, &strain_names)?;
    write_field_csv(&displacement_output, displacement, samples, displacement_names(dim))?;
    write_field_csv(&stress_output, stress, samples, &stress_names)?;

    info!(
        "wrote output to {}, {} and {}",
        strain_output.display(),
        displacement_output.display(),
        stress_output.display()
    );

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_extract_shapes() {
        let mesh = GridMesh::new(&[2, 3], 1.0).unwrap();
        let fields = ElementFields {
            displacement: (0..24).map(|v| v as f64).collect(),
            strain: vec![0.0; 18],
            stress: vec![1.0; 18],
        };
        let solution = extract(&mesh, fields, 1).unwrap();

        assert_eq!(solution.strain.shape(), &[2, 3, 3]);
        assert_eq!(solution.stress.shape(), &[2, 3, 3]);
        assert_eq!(solution.displacement.shape(), &[3, 4, 2]);
        // node (1, 2) = 1 * 4 + 2, component y
        assert_eq!(solution.displacement[[1, 2, 1]], 13.0);
    }

    #[test]
    fn test_extract_keeps_vertices_of_second_order_mesh() {
        let mesh = GridMesh::with_order(&[1, 2], 1.0, 2).unwrap();
        // 3 x 5 node lattice
        let fields = ElementFields {
            displacement: (0..30).map(|v| v as f64).collect(),
            strain: vec![0.0; 6],
            stress: vec![0.0; 6],
        };
        let solution = extract(&mesh, fields, 1).unwrap();

        assert_eq!(solution.displacement.shape(), &[2, 3, 2]);
        // vertex (1, 1) is lattice node (2, 2) = 2 * 5 + 2
        assert_eq!(solution.displacement[[1, 1, 0]], 24.0);
        assert_eq!(solution.displacement[[1, 1, 1]], 25.0);
        // vertex (0, 2) is lattice node (0, 4)
        assert_eq!(solution.displacement[[0, 2, 1]], 9.0);
    }

    #[test]
    fn test_extract_rejects_wrong_sizes() {
        let mesh = GridMesh::new(&[2, 2], 1.0).unwrap();
        let fields = ElementFields {
            displacement: vec![0.0; 18],
            strain: vec![0.0; 5],
            stress: vec![0.0; 12],
        };
        assert!(extract(&mesh, fields, 1).is_err());
    }

    #[test]
    fn test_stack_and_csv() {
        let mesh = GridMesh::new(&[1, 2], 1.0).unwrap();
        let make = |offset: f64| {
            extract(
                &mesh,
                ElementFields {
                    displacement: vec![offset; 12],
                    strain: vec![offset; 6],
                    stress: vec![offset; 6],
                },
                1,
            )
            .unwrap()
        };
        let (strain, displacement, stress) = stack_samples(&[make(0.0), make(1.0)]).unwrap();
        assert_eq!(strain.shape(), &[2, 1, 2, 3]);
        assert_eq!(displacement.shape(), &[2, 2, 3, 2]);
        assert_eq!(stress[[1, 0, 1, 2]], 1.0);

        // sample 1 of the batch failed, so the stacked rows are samples 0 and 2
        let dir = std::env::temp_dir().join(format!("voxel-elastic-csv-{}", std::process::id()));
        assert!(csv_output(&strain, &displacement, &stress, &[0], &dir).is_err());
        csv_output(&strain, &displacement, &stress, &[0, 2], &dir).unwrap();

        let contents = std::fs::read_to_string(dir.join("strain.csv")).unwrap();
        let lines: Vec<&str> = contents.lines().collect();
        assert_eq!(lines[0], "sample,i,j,exx,eyy,exy");
        assert_eq!(lines.len(), 1 + 2 * 2);
        assert_eq!(lines[1], "0,0,0,0,0,0");
        assert_eq!(lines[3], "2,0,0,1,1,1");
        assert_eq!(lines[4], "2,0,1,1,1,1");

        let contents = std::fs::read_to_string(dir.join("displacement.csv")).unwrap();
        assert_eq!(contents.lines().next(), Some("sample,i,j,ux,uy"));

        std::fs::remove_dir_all(dir).unwrap();
    }

    #[test]
    fn test_component_names() {
        assert_eq!(component_names(2).len(), n_components(2));
        assert_eq!(component_names(3).len(), n_components(3));
        assert_eq!(displacement_names(3), &["ux", "uy", "uz"]);
    }
}
