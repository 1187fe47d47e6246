use json::JsonValue;
use ndarray::{ArrayD, IxDyn};

use crate::{
    error::{Result, VoxelElasticError},
    solver::{LinearSolverKind, SolverSettings},
};

/// A batch described by an input file
#[derive(Debug, Clone)]
pub struct InputFile {
    pub microstructure: ArrayD<i64>,
    pub elastic_modulus: Vec<f64>,
    pub poissons_ratio: Vec<f64>,
    pub macro_strain: f64,
    pub delta_x: f64,
    pub settings: SolverSettings,
}

/// Loads and parses an input file
///
/// # Arguments
/// * `input_file` - The path to the input file
///
/// # Returns
/// The parsed batch
pub fn load_input_file(input_file: &str) -> Result<InputFile> {
    let file_string = match std::fs::read_to_string(input_file) {
        Ok(f) => f,
        Err(_err) => {
            return Err(VoxelElasticError::Input(format!(
                "Unable to open input file {}",
                input_file
            )))
        }
    };

    parse_input(&file_string)
}

/// Parses the text of an input file
pub fn parse_input(file_string: &str) -> Result<InputFile> {
    let input_json = match json::parse(file_string) {
        Ok(f) => f,
        Err(err) => {
            return Err(VoxelElasticError::Input(format!(
                "Error in input file json: {err}"
            )))
        }
    };

    if !input_json.has_key("metadata") {
        return Err(VoxelElasticError::Input(
            "Input json missing metadata field".to_string(),
        ));
    }
    if !input_json.has_key("microstructure") {
        return Err(VoxelElasticError::Input(
            "Input json missing microstructure field".to_string(),
        ));
    }
    if !input_json["metadata"].has_key("elastic_modulus") {
        return Err(VoxelElasticError::Input(
            "Input json missing elastic_modulus field in metadata section".to_string(),
        ));
    }
    if !input_json["metadata"].has_key("poissons_ratio") {
        return Err(VoxelElasticError::Input(
            "Input json missing poissons_ratio field in metadata section".to_string(),
        ));
    }

    let metadata = &input_json["metadata"];
    let elastic_modulus = parse_number_list(&metadata["elastic_modulus"], "elastic_modulus")?;
    let poissons_ratio = parse_number_list(&metadata["poissons_ratio"], "poissons_ratio")?;
    let macro_strain = optional_f64(metadata, "macro_strain")?.unwrap_or(1.0);
    let delta_x = optional_f64(metadata, "delta_x")?.unwrap_or(1.0);

    let mut settings = if input_json.has_key("solver") {
        parse_solver_settings(&input_json["solver"])?
    } else {
        SolverSettings::default()
    };
    if let Some(axis) = optional_usize(metadata, "loading_axis")? {
        settings.loading_axis = axis;
    }

    let microstructure = parse_microstructure(&input_json["microstructure"])?;

    Ok(InputFile {
        microstructure,
        elastic_modulus,
        poissons_ratio,
        macro_strain,
        delta_x,
        settings,
    })
}

fn parse_number_list(value: &JsonValue, field: &str) -> Result<Vec<f64>> {
    if !value.is_array() {
        return Err(VoxelElasticError::Input(format!(
            "{field} must be a list of numbers"
        )));
    }
    value
        .members()
        .map(|v| {
            v.as_f64().ok_or_else(|| {
                VoxelElasticError::Input(format!("{field} contains a non-numeric value: {v}"))
            })
        })
        .collect()
}

fn optional_f64(section: &JsonValue, key: &str) -> Result<Option<f64>> {
    if !section.has_key(key) {
        return Ok(None);
    }
    match section[key].as_f64() {
        Some(v) => Ok(Some(v)),
        None => Err(VoxelElasticError::Input(format!("{key} must be a number"))),
    }
}

fn optional_usize(section: &JsonValue, key: &str) -> Result<Option<usize>> {
    if !section.has_key(key) {
        return Ok(None);
    }
    match section[key].as_usize() {
        Some(v) => Ok(Some(v)),
        None => Err(VoxelElasticError::Input(format!(
            "{key} must be a non-negative integer"
        ))),
    }
}

/// Reads the optional `solver` section over the defaults
fn parse_solver_settings(section: &JsonValue) -> Result<SolverSettings> {
    let mut settings = SolverSettings::default();

    if section.has_key("method") {
        let method = section["method"]
            .as_str()
            .ok_or_else(|| VoxelElasticError::Input("method must be a string".to_owned()))?;
        settings.linear_solver = LinearSolverKind::parse(method)?;
    }
    if let Some(v) = optional_usize(section, "max_newton_iterations")? {
        settings.max_newton_iterations = v;
    }
    if let Some(v) = optional_f64(section, "newton_abs_tolerance")? {
        settings.newton_abs_tolerance = v;
    }
    if let Some(v) = optional_f64(section, "newton_rel_tolerance")? {
        settings.newton_rel_tolerance = v;
    }
    if let Some(v) = optional_f64(section, "damping")? {
        settings.damping = v;
    }
    if let Some(v) = optional_usize(section, "max_cg_iterations")? {
        settings.max_cg_iterations = v as u64;
    }
    if let Some(v) = optional_f64(section, "cg_tolerance")? {
        settings.cg_tolerance = v;
    }
    if let Some(v) = optional_usize(section, "element_order")? {
        settings.element_order = v;
    }
    if let Some(v) = optional_usize(section, "quadrature_points")? {
        settings.quadrature_points = v;
    }
    if section.has_key("parallel") {
        settings.parallel = section["parallel"]
            .as_bool()
            .ok_or_else(|| VoxelElasticError::Input("parallel must be a boolean".to_owned()))?;
    }

    Ok(settings)
}

/// Converts nested label arrays into an array of shape `(n_samples, *grid)`
///
/// Ragged nesting is an input error; a number that is not a whole number is
/// a validation error.
fn parse_microstructure(value: &JsonValue) -> Result<ArrayD<i64>> {
    let mut shape = Vec::new();
    let mut level = value;
    while level.is_array() {
        shape.push(level.len());
        if level.is_empty() {
            break;
        }
        level = &level[0];
    }
    if shape.is_empty() {
        return Err(VoxelElasticError::Input(
            "microstructure must be a nested list of phase labels".to_owned(),
        ));
    }

    let mut labels = Vec::with_capacity(shape.iter().product());
    flatten_labels(value, &shape, &mut labels)?;

    ArrayD::from_shape_vec(IxDyn(&shape), labels)
        .map_err(|err| VoxelElasticError::Input(format!("microstructure is ragged: {err}")))
}

fn flatten_labels(value: &JsonValue, shape: &[usize], labels: &mut Vec<i64>) -> Result<()> {
    match shape.split_first() {
        Some((len, rest)) => {
            if !value.is_array() || value.len() != *len {
                return Err(VoxelElasticError::Input(format!(
                    "microstructure is ragged: expected a list of {len} entries, found {value}"
                )));
            }
            for member in value.members() {
                flatten_labels(member, rest, labels)?;
            }
            Ok(())
        }
        None => {
            let number = value.as_f64().ok_or_else(|| {
                VoxelElasticError::Input(format!(
                    "microstructure contains a non-numeric label: {value}"
                ))
            })?;
            if !number.is_finite() || number.fract() != 0.0 {
                return Err(VoxelElasticError::Validation(format!(
                    "microstructure labels must be integers, found {number}"
                )));
            }
            labels.push(number as i64);
            Ok(())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_minimal_input() {
        let input = parse_input(
            r#"{
                "metadata": {"elastic_modulus": [1, 10], "poissons_ratio": [0.3, 0.3]},
                "microstructure": [[[0, 1], [1, 0]], [[1, 1], [0, 0]]]
            }"#,
        )
        .unwrap();

        assert_eq!(input.microstructure.shape(), &[2, 2, 2]);
        assert_eq!(input.microstructure[[1, 0, 1]], 1);
        assert_eq!(input.elastic_modulus, vec![1.0, 10.0]);
        assert_eq!(input.macro_strain, 1.0);
        assert_eq!(input.delta_x, 1.0);
        assert_eq!(input.settings, SolverSettings::default());
    }

    #[test]
    fn test_parse_solver_section() {
        let input = parse_input(
            r#"{
                "metadata": {
                    "elastic_modulus": [1], "poissons_ratio": [0.2],
                    "macro_strain": 0.02, "delta_x": 0.5, "loading_axis": 1
                },
                "solver": {"method": "cg", "damping": 0.5, "element_order": 1, "quadrature_points": 2, "parallel": false},
                "microstructure": [[[0]]]
            }"#,
        )
        .unwrap();

        assert_eq!(input.macro_strain, 0.02);
        assert_eq!(input.delta_x, 0.5);
        assert_eq!(input.settings.loading_axis, 1);
        assert_eq!(input.settings.linear_solver, LinearSolverKind::ConjugateGradient);
        assert_eq!(input.settings.damping, 0.5);
        assert_eq!(input.settings.element_order, 1);
        assert_eq!(input.settings.quadrature_points, 2);
        assert!(!input.settings.parallel);
    }

    #[test]
    fn test_missing_fields() {
        let err = parse_input(r#"{"microstructure": [[[0]]]}"#).unwrap_err();
        assert!(matches!(err, VoxelElasticError::Input(_)));

        let err = parse_input(r#"{"metadata": {"elastic_modulus": [1]}, "microstructure": [[[0]]]}"#)
            .unwrap_err();
        assert!(matches!(err, VoxelElasticError::Input(_)));

        assert!(parse_input("{not json").is_err());
    }

    #[test]
    fn test_bad_labels() {
        let base = |micro: &str| {
            format!(
                r#"{{"metadata": {{"elastic_modulus": [1, 2], "poissons_ratio": [0.3, 0.3]}}, "microstructure": {micro}}}"#
            )
        };

        let err = parse_input(&base("[[[0, 1.5]]]")).unwrap_err();
        assert!(matches!(err, VoxelElasticError::Validation(_)));

        let err = parse_input(&base("[[[0, 1], [1]]]")).unwrap_err();
        assert!(matches!(err, VoxelElasticError::Input(_)));

        let err = parse_input(&base(r#"[[[0, "a"]]]"#)).unwrap_err();
        assert!(matches!(err, VoxelElasticError::Input(_)));

        let whole = parse_input(&base("[[[0, 1.0]]]")).unwrap();
        assert_eq!(whole.microstructure[[0, 0, 1]], 1);
    }

    #[test]
    fn test_unknown_method() {
        let err = parse_input(
            r#"{"metadata": {"elastic_modulus": [1], "poissons_ratio": [0.3]},
                "solver": {"method": "gmres"}, "microstructure": [[[0]]]}"#,
        )
        .unwrap_err();
        assert!(matches!(err, VoxelElasticError::Validation(_)));
    }
}
