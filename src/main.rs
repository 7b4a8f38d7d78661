use anyhow::{bail, Result};
use clap::Parser;

use planar_rectify::batch::{rectify_file, run_batch, Outcome};
use planar_rectify::cli::{BatchArgs, Command, SingleArgs};
use planar_rectify::{Cli, Manifest, Rectifier};

fn main() -> Result<()> {
    let cli = Cli::parse();

    let default_level = if cli.verbose { "debug" } else { "info" };
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(default_level)),
        )
        .init();

    match &cli.command {
        Command::Single(args) => run_single(args, cli.verbose),
        Command::Batch(args) => run_batch_command(args),
    }
}

fn run_single(args: &SingleArgs, verbose: bool) -> Result<()> {
    let rectifier = Rectifier::new(args.sampling.rectify_options());
    let output_path = args.output_path();

    let rectified = rectify_file(
        &args.input,
        &output_path,
        &args.corners.0,
        args.width_mm,
        args.height_mm,
        &rectifier,
        args.sampling.grid(),
    )?;

    if verbose {
        let matrix = rectified.homography.matrix();
        eprintln!("Homography:");
        for row in 0..3 {
            eprintln!(
                "  [{:12.6}, {:12.6}, {:12.6}]",
                matrix[(row, 0)],
                matrix[(row, 1)],
                matrix[(row, 2)]
            );
        }
        eprintln!();
    }

    println!("Saved rectified image: {:?}", output_path);
    println!(
        "Dimensions: {}x{}",
        rectified.output_size.width, rectified.output_size.height
    );
    println!("Metric scale: {:.2} pixels/mm", rectified.scale.px_per_mm());

    Ok(())
}

fn run_batch_command(args: &BatchArgs) -> Result<()> {
    let manifest = Manifest::load(&args.manifest)?;
    let report = run_batch(&manifest, &args.batch_options())?;

    for image in &report.images {
        match &image.outcome {
            Outcome::Rectified {
                output, px_per_mm, ..
            } => println!(
                "{}: saved as {:?}, metric scale {:.2} pixels/mm",
                image.name, output, px_per_mm
            ),
            Outcome::Skipped { reason } => println!("{}: skipped ({})", image.name, reason),
            Outcome::Failed { kind, message } => {
                println!("{}: failed [{}] {}", image.name, kind, message)
            }
        }
    }
    println!(
        "Processing complete. {} processed, {} skipped, {} failed.",
        report.processed(),
        report.skipped(),
        report.failed()
    );

    if let Some(path) = &args.report {
        report.write_json(path)?;
        println!("Report written: {:?}", path);
    }

    if report.failed() > 0 {
        bail!("{} of {} images failed", report.failed(), report.images.len());
    }
    Ok(())
}
