use std::path::PathBuf;

use clap::Parser;

use voxel_elastic::{
    input, logging, post_processor, simulation::ElasticSimulation, Solution,
};

#[derive(Parser)]
#[command(about = "Linear-elastic strain, stress and displacement fields for voxel microstructures")]
struct Cli {
    /// Input json describing the batch
    input_json: String,

    #[arg(short, long, default_value = ".")]
    output_dir: PathBuf,

    /// Suppress console messages
    #[arg(short, long)]
    quiet: bool,

    /// Solve samples one at a time
    #[arg(long)]
    sequential: bool,
}

fn main() {
    let cli = Cli::parse();
    logging::set_verbose(!cli.quiet);

    let batch = match input::load_input_file(&cli.input_json) {
        Ok(b) => b,
        Err(err) => {
            eprintln!("error: {err}");
            std::process::exit(1)
        }
    };

    let mut settings = batch.settings.clone();
    if cli.sequential {
        settings.parallel = false;
    }

    let outcomes = match ElasticSimulation::new(&batch.elastic_modulus, &batch.poissons_ratio)
        .and_then(|sim| {
            sim.with_macro_strain(batch.macro_strain)
                .with_delta_x(batch.delta_x)
                .with_settings(settings)
                .solve_batch(batch.microstructure.view())
        }) {
        Ok(o) => o,
        Err(err) => {
            eprintln!("error: {err}");
            std::process::exit(1)
        }
    };

    let mut solutions: Vec<Solution> = Vec::new();
    let mut solved: Vec<usize> = Vec::new();
    let mut failed: Vec<usize> = Vec::new();
    for (index, outcome) in outcomes.into_iter().enumerate() {
        match outcome {
            Ok(s) => {
                solutions.push(s);
                solved.push(index);
            }
            Err(err) => {
                eprintln!("error: sample {index} failed: {err}");
                failed.push(index);
            }
        }
    }

    if !solutions.is_empty() {
        let written = post_processor::stack_samples(&solutions).and_then(
            |(strain, displacement, stress)| {
                post_processor::csv_output(
                    &strain,
                    &displacement,
                    &stress,
                    &solved,
                    &cli.output_dir,
                )
            },
        );
        if let Err(err) = written {
            eprintln!("error: {err}");
            std::process::exit(1)
        }
    }

    if !failed.is_empty() {
        eprintln!(
            "error: {} of {} samples failed: {:?}",
            failed.len(),
            failed.len() + solutions.len(),
            failed
        );
        std::process::exit(1)
    }
}
