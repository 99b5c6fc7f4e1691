use std::fs;
use std::path::{Path, PathBuf};
use std::time::Instant;

use clap::Parser;
use rayon::prelude::*;

use cam_measure_rust_lib::config::Config;
use cam_measure_rust_lib::errors::{CamMeasureError, Result};
use cam_measure_rust_lib::image_io::{
    get_png_files_in_dir, load_frame, save_grayscale, save_mask, InputFrame,
};
use cam_measure_rust_lib::measurement::CalibrationData;
use cam_measure_rust_lib::output::{write_measurements_csv, write_report_json};
use cam_measure_rust_lib::pipeline::MeasurePipeline;

/// Command-line arguments
#[derive(Parser, Debug)]
#[clap(author, version, about = "CamMeasure - Camera Frame Object Measurement")]
struct Args {
    /// Path to input file or directory
    #[clap(short, long)]
    input: Option<String>,

    /// Path to output directory
    #[clap(short, long)]
    output: Option<String>,

    /// Path to configuration file
    #[clap(short, long, default_value = "config.toml")]
    config: String,

    /// Calibration scale; omit to measure in pixel units
    #[clap(short, long)]
    pixels_per_mm: Option<f64>,

    /// Enable debug mode (save intermediate images and reports)
    #[clap(short, long)]
    debug: bool,

    /// Write the default configuration file and exit
    #[clap(long)]
    init_config: bool,
}

/// Run one frame through the pipeline and write its outputs
fn process_frame(
    input: InputFrame,
    pipeline: &MeasurePipeline,
    calibration: &CalibrationData,
    output_dir: &str,
    debug: bool,
) -> Result<()> {
    let InputFrame {
        frame, filename, ..
    } = input;

    let detection = pipeline.detect_full(&frame, calibration)?;

    println!(
        "{}: {} objects, mean confidence {:.3}",
        filename,
        detection.objects.len(),
        detection.report.mean_confidence
    );

    write_measurements_csv(&detection.objects, output_dir, &filename)?;

    if debug {
        write_report_json(&detection.report, output_dir, &filename)?;

        if let Some(artifacts) = &detection.artifacts {
            let debug_dir = PathBuf::from(output_dir).join("debug");
            save_grayscale(
                &artifacts.grayscale,
                debug_dir.join(format!("{}_gray.png", filename)),
            )?;
            save_mask(
                &artifacts.edges,
                debug_dir.join(format!("{}_edges.png", filename)),
            )?;
            save_mask(
                &artifacts.mask,
                debug_dir.join(format!("{}_mask.png", filename)),
            )?;
        }
    }

    Ok(())
}

/// Main function
fn main() -> anyhow::Result<()> {
    env_logger::init();

    // Parse command-line arguments
    let args = Args::parse();

    if args.init_config {
        let config = Config::default();
        config.save_to_file(&args.config)?;
        println!("Wrote default configuration to {}", args.config);
        return Ok(());
    }

    // Load configuration
    let mut config = if Path::new(&args.config).exists() {
        Config::from_file(&args.config)?
    } else {
        log::info!("no configuration at {}, using defaults", args.config);
        Config::default()
    };

    // Override config with command-line arguments
    if let Some(input) = args.input.clone() {
        config.input_path = input;
    }

    if let Some(output) = args.output.clone() {
        config.output_base_dir = output;
    }

    // Validate configuration
    config.validate()?;

    let calibration = match args.pixels_per_mm {
        Some(ppm) => CalibrationData::calibrated(ppm)?,
        None => CalibrationData::uncalibrated(),
    };

    // Start timing
    let start_time = Instant::now();

    // Create output directories
    let output_base = PathBuf::from(&config.output_base_dir);
    fs::create_dir_all(output_base.join("measurements"))?;

    if args.debug {
        fs::create_dir_all(output_base.join("debug"))?;
        fs::create_dir_all(output_base.join("reports"))?;
    }

    // Process input
    let input_path = PathBuf::from(&config.input_path);
    let output_dir = config.output_base_dir.clone();
    let use_parallel = config.use_parallel;
    let debug = args.debug;
    let pipeline = MeasurePipeline::new(config)?;

    if input_path.is_file() {
        // Process single file
        println!("Processing single file: {}", input_path.display());
        let input = load_frame(&input_path)?;
        process_frame(input, &pipeline, &calibration, &output_dir, debug)?;
    } else if input_path.is_dir() {
        // Process all PNG files in directory
        println!("Processing directory: {}", input_path.display());
        let png_files = get_png_files_in_dir(&input_path)?;

        println!("Found {} PNG files", png_files.len());

        let run = |path: &PathBuf| -> Result<()> {
            let input = load_frame(path)?;
            process_frame(input, &pipeline, &calibration, &output_dir, debug)
        };

        let failures: usize = if use_parallel {
            // Process files in parallel
            png_files
                .par_iter()
                .map(|path| match run(path) {
                    Ok(()) => 0,
                    Err(e) => {
                        eprintln!("Error processing {}: {}", path.display(), e);
                        1
                    }
                })
                .sum()
        } else {
            // Process files sequentially
            png_files
                .iter()
                .map(|path| match run(path) {
                    Ok(()) => 0,
                    Err(e) => {
                        eprintln!("Error processing {}: {}", path.display(), e);
                        1
                    }
                })
                .sum()
        };

        if failures > 0 {
            eprintln!("{} of {} files failed", failures, png_files.len());
        }
    } else {
        return Err(CamMeasureError::InvalidPath(input_path).into());
    }

    // Report elapsed time
    let elapsed = start_time.elapsed();
    println!("Processing completed in {:.2} seconds", elapsed.as_secs_f64());

    Ok(())
}
