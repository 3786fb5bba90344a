use clap::{Args, Parser, Subcommand, ValueEnum, ValueHint};
use spiral_config::{tracing::init_tracing, DftConfig};
use st_dft::exchange::{load, save, write_matrix};
use st_dft::{flatten, reference, ComplexMatrix, Direction};
use st_dft_wgpu::{Dft2d, TransformRequest, WgpuContext};
use std::error::Error;
use std::io::{self, ErrorKind};
use std::path::PathBuf;
use std::time::Instant;
use tracing::{debug, info};

type DynError = Box<dyn Error>;

type Result<T> = std::result::Result<T, DynError>;

#[derive(Clone, Copy, Debug, PartialEq, Eq, ValueEnum)]
enum Backend {
    /// Compute passes on the default wgpu adapter
    Gpu,
    /// Direct transform on the host
    Cpu,
}

#[derive(Parser)]
#[command(author, version, about = "Two-pass 2D discrete Fourier transform")]
struct Cli {
    /// Where the transform runs
    #[arg(long, global = true, value_enum, default_value_t = Backend::Gpu)]
    backend: Backend,

    /// Directory holding the WGSL kernel templates (overrides ST_DFT_SHADER_DIR)
    #[arg(long, global = true, value_hint = ValueHint::DirPath)]
    shader_dir: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Forward transform, unscaled
    Forward(TransformArgs),

    /// Inverse transform, scaled by 1 / (rows * cols)
    Inverse(TransformArgs),
}

#[derive(Args)]
struct TransformArgs {
    /// Matrix in the `rows cols` text exchange format
    #[arg(long, value_hint = ValueHint::FilePath)]
    input: PathBuf,

    /// Destination for the result; STDOUT when omitted
    #[arg(long, value_hint = ValueHint::FilePath)]
    output: Option<PathBuf>,

    /// Compare against the host reference and report elements whose relative
    /// difference exceeds this tolerance
    #[arg(long, value_name = "RTOL")]
    compare_cpu: Option<f32>,
}

fn main() {
    if let Err(err) = init_tracing() {
        eprintln!("warning: {err}");
    }
    let code = match try_main() {
        Ok(()) => 0,
        Err(err) => {
            eprintln!("error: {err}");
            1
        }
    };
    spiral_config::tracing::flush_chrome_trace();
    std::process::exit(code);
}

fn try_main() -> Result<()> {
    let cli = Cli::parse();
    let (direction, args) = match &cli.command {
        Command::Forward(args) => (Direction::Forward, args),
        Command::Inverse(args) => (Direction::Inverse, args),
    };
    if let Some(rtol) = args.compare_cpu {
        if !(rtol.is_finite() && rtol >= 0.0) {
            return Err(Box::new(io::Error::new(
                ErrorKind::InvalidInput,
                "--compare-cpu must be a non-negative tolerance",
            )));
        }
    }

    let matrix = load(&args.input)?;
    let request = TransformRequest::from_matrix(&matrix, direction)?;
    let dft = build_backend(&cli)?;

    let started = Instant::now();
    let output = dft.execute(&request)?;
    info!(
        rows = output.rows,
        cols = output.cols,
        %direction,
        backend = ?cli.backend,
        elapsed = ?started.elapsed(),
        "transform complete"
    );
    let result = output.to_matrix();

    if let Some(rtol) = args.compare_cpu {
        report_mismatches(&matrix, &result, direction, rtol)?;
    }

    match &args.output {
        Some(path) => save(path, &result)?,
        None => write_matrix(io::stdout().lock(), &result)?,
    }
    Ok(())
}

fn build_backend(cli: &Cli) -> Result<Dft2d> {
    match cli.backend {
        Backend::Cpu => Ok(Dft2d::cpu()),
        Backend::Gpu => {
            let mut config = DftConfig::from_env();
            if let Some(dir) = &cli.shader_dir {
                config.shader_dir = Some(dir.clone());
            }
            let config = spiral_config::configure(config);
            let ctx = WgpuContext::request(config)?;
            if let Some(info) = ctx.adapter_info() {
                debug!(adapter = %info.name, backend = ?info.backend, "using adapter");
            }
            Ok(Dft2d::with_gpu(ctx, config.clone()))
        }
    }
}

/// Print how many elements differ from the host reference by more than
/// `rtol`, relative to the reference magnitude.
fn report_mismatches(
    input: &ComplexMatrix,
    result: &ComplexMatrix,
    direction: Direction,
    rtol: f32,
) -> Result<()> {
    let expected = reference::dft2d(&flatten(input)?, direction).to_matrix();
    let mismatches = count_mismatches(result, &expected, rtol);
    eprintln!("elements with relative difference > {rtol}: {mismatches}");
    Ok(())
}

fn count_mismatches(got: &ComplexMatrix, want: &ComplexMatrix, rtol: f32) -> usize {
    got.iter()
        .flatten()
        .zip(want.iter().flatten())
        .filter(|(g, w)| (*g - *w).norm() > rtol * w.norm())
        .count()
}

#[cfg(test)]
mod tests {
    use super::*;
    use st_dft::Complex32;

    #[test]
    fn mismatches_are_relative_to_the_reference() {
        let want = vec![vec![Complex32::new(100.0, 0.0), Complex32::new(1.0, 0.0)]];
        let got = vec![vec![Complex32::new(100.05, 0.0), Complex32::new(1.05, 0.0)]];
        assert_eq!(count_mismatches(&got, &want, 1e-3), 1);
        assert_eq!(count_mismatches(&got, &want, 0.1), 0);
    }

    #[test]
    fn cli_definition_is_consistent() {
        use clap::CommandFactory;
        Cli::command().debug_assert();
    }
}
