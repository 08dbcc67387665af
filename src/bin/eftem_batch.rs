use std::path::{Path, PathBuf};

use anyhow::{bail, Context};
use clap::{Parser, Subcommand};

use eftem_tools::config::{config_path, EftemConfig};
use eftem_tools::dqe::report::{report_file_name, save_reports};
use eftem_tools::dqe::{measure_dqe, DqeSettings};
use eftem_tools::drift::{CancelToken, DriftEstimator, DriftInput};
use eftem_tools::esi::{save_maps, EsiImage, MapCalculator, MapInput};
use eftem_tools::fit::{FitOptions, PowerLawMode};
use eftem_tools::image::{FloatImage, Rect};

#[derive(Parser, Debug)]
#[command(
    author,
    version,
    about = "EFTEM drift estimation, elemental maps and DQE measurement"
)]
struct Cli {
    /// Configuration file (default: $EFTEMJ_CONFIG or ./eftemj.json)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Estimate the drift of every image relative to a template image
    Drift {
        /// Images of the stack, all of the same size
        #[arg(required = true, num_args = 2..)]
        images: Vec<PathBuf>,

        /// Tracked region as x,y,width,height (default: largest region that
        /// still allows every shift)
        #[arg(long, value_parser = parse_roi)]
        roi: Option<Rect>,

        /// Index of the template image
        #[arg(short, long, default_value_t = 0)]
        template: usize,

        /// Largest shift searched in each direction
        #[arg(short, long)]
        delta: Option<usize>,

        /// Correlation threads, 0 = one per core
        #[arg(long)]
        threads: Option<usize>,
    },

    /// Extrapolate the pre-edge background of every pixel and subtract it
    Map {
        /// Energy-filtered images, in any order
        #[arg(required = true, num_args = 3..)]
        images: Vec<PathBuf>,

        /// Energy loss of every image in eV, same order as the images
        #[arg(short, long, required = true, value_delimiter = ',')]
        energies: Vec<f64>,

        /// Edge onset in eV; images below it are pre-edge
        #[arg(long)]
        edge: f64,

        /// Convergence limit of the per-pixel fits
        #[arg(long)]
        epsilon: Option<f64>,

        /// Fit the power law directly instead of as a line in log-log space
        #[arg(long)]
        direct: bool,

        /// Fit threads, 0 = one per core
        #[arg(long)]
        threads: Option<usize>,

        /// Directory for the result images
        #[arg(short, long, default_value = "maps")]
        output: PathBuf,
    },

    /// Measure the detective quantum efficiency by binning
    Dqe {
        image: PathBuf,

        /// Pixels ignored on every side
        #[arg(long)]
        border: Option<usize>,

        /// Largest binning factor, 0 = automatic
        #[arg(long)]
        max_binning: Option<usize>,

        #[arg(long)]
        sensitivity: Option<f64>,

        /// Worker threads, 0 = one per core
        #[arg(long)]
        workers: Option<usize>,

        /// English report; the German one is written next to it
        #[arg(short, long)]
        output: Option<PathBuf>,
    },
}

fn parse_roi(s: &str) -> Result<Rect, String> {
    let parts: Vec<&str> = s.split(',').map(str::trim).collect();
    let [x, y, w, h] = parts.as_slice() else {
        return Err(format!("expected x,y,width,height but got '{s}'"));
    };
    let number = |v: &str| v.parse::<i64>().map_err(|e| format!("'{v}': {e}"));
    let size = |v: &str| v.parse::<usize>().map_err(|e| format!("'{v}': {e}"));
    Ok(Rect::new(number(*x)?, number(*y)?, size(*w)?, size(*h)?))
}

fn load_image(path: &Path) -> anyhow::Result<FloatImage> {
    FloatImage::load(path).with_context(|| format!("Cannot read image {}", path.display()))
}

fn run_drift(
    config: &EftemConfig,
    paths: &[PathBuf],
    roi: Option<Rect>,
    template: usize,
    delta: Option<usize>,
    threads: Option<usize>,
) -> anyhow::Result<()> {
    let images = paths
        .iter()
        .map(|p| load_image(p))
        .collect::<anyhow::Result<Vec<_>>>()?;
    let delta = delta.unwrap_or(config.drift.delta);
    let Some(first) = images.first() else {
        bail!("No images given");
    };
    let roi = roi.unwrap_or_else(|| Rect::centered(first.width(), first.height(), delta));

    let estimator = DriftEstimator::new(threads.unwrap_or(config.drift.threads))?;
    let input = DriftInput {
        images: &images,
        roi,
        template_index: template,
        delta,
    };
    let result = estimator
        .run(&input, &CancelToken::new())
        .context("Drift estimation failed")?;

    println!("image\tdx\tdy\tcoefficient");
    for (index, (path, shift)) in paths.iter().zip(result.best_shifts()).enumerate() {
        match shift {
            Some(s) => println!("{}\t{}\t{}\t{:.6}", path.display(), s.dx, s.dy, s.coefficient),
            None if index == template => println!("{}\ttemplate", path.display()),
            None => println!("{}\tno usable correlation", path.display()),
        }
    }
    if !result.is_complete() {
        eprintln!(
            "Warning: {} rows failed, {} rows skipped",
            result.failed_rows, result.skipped_rows
        );
    }
    Ok(())
}

struct MapArgs {
    images: Vec<PathBuf>,
    energies: Vec<f64>,
    edge: f64,
    epsilon: Option<f64>,
    direct: bool,
    threads: Option<usize>,
    output: PathBuf,
}

fn run_map(config: &EftemConfig, args: MapArgs) -> anyhow::Result<()> {
    if args.energies.len() != args.images.len() {
        bail!(
            "{} images but {} energies given",
            args.images.len(),
            args.energies.len()
        );
    }
    let epsilon = args.epsilon.unwrap_or(config.map.epsilon);
    if !(epsilon.is_finite() && epsilon > 0.0) {
        bail!("Epsilon must be a positive number, got {epsilon}");
    }
    let images = args
        .images
        .iter()
        .zip(&args.energies)
        .map(|(path, &energy)| load_image(path).map(|image| EsiImage::new(energy, image)))
        .collect::<anyhow::Result<Vec<_>>>()?;

    let calculator = MapCalculator::new(args.threads.unwrap_or(config.map.threads))?;
    let input = MapInput {
        images: &images,
        edge_energy: args.edge,
        mode: if args.direct {
            PowerLawMode::Direct
        } else {
            config.map.mode
        },
        options: FitOptions::with_epsilon(epsilon),
    };
    let maps = calculator
        .run(&input, &CancelToken::new())
        .context("Elemental map calculation failed")?;

    let written = save_maps(&maps, &args.output)?;
    println!(
        "{} of {} pixels failed",
        maps.error_count(),
        maps.errors.len()
    );
    for path in written {
        println!("{}", path.display());
    }
    Ok(())
}

fn run_dqe(
    image_path: &Path,
    settings: DqeSettings,
    output: Option<PathBuf>,
) -> anyhow::Result<()> {
    let image = load_image(image_path)?;
    let name = image_path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default();
    if !settings.sensitivity.is_finite() {
        bail!("Sensitivity must be finite, got {}", settings.sensitivity);
    }

    let measurement = measure_dqe(&image, &name, &settings)?;
    for dataset in &measurement.datasets {
        println!("DQE of binning {}: {:.6}", dataset.binning, dataset.dqe);
    }

    let path = output.unwrap_or_else(|| image_path.with_file_name(report_file_name(&name)));
    let (english, german) = save_reports(&measurement, &path)?;
    println!("Reports written to {} and {}", english.display(), german.display());
    Ok(())
}

fn main() -> anyhow::Result<()> {
    env_logger::init();
    let cli = Cli::parse();

    let path = config_path(cli.config.as_deref());
    let config = EftemConfig::load_or_default(&path)
        .with_context(|| format!("Cannot load configuration {}", path.display()))?;

    match cli.command {
        Command::Drift {
            images,
            roi,
            template,
            delta,
            threads,
        } => run_drift(&config, &images, roi, template, delta, threads),
        Command::Map {
            images,
            energies,
            edge,
            epsilon,
            direct,
            threads,
            output,
        } => run_map(
            &config,
            MapArgs {
                images,
                energies,
                edge,
                epsilon,
                direct,
                threads,
                output,
            },
        ),
        Command::Dqe {
            image,
            border,
            max_binning,
            sensitivity,
            workers,
            output,
        } => {
            let defaults = DqeSettings::from(&config.dqe);
            let settings = DqeSettings {
                border: border.unwrap_or(defaults.border),
                max_binning: max_binning.unwrap_or(defaults.max_binning),
                sensitivity: sensitivity.unwrap_or(defaults.sensitivity),
                workers: workers.unwrap_or(defaults.workers),
            };
            run_dqe(&image, settings, output)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn roi_is_parsed_from_four_numbers() {
        assert_eq!(parse_roi("4, -2,10,12"), Ok(Rect::new(4, -2, 10, 12)));
        assert!(parse_roi("1,2,3").is_err());
        assert!(parse_roi("1,2,-3,4").is_err());
    }

    #[test]
    fn map_command_reads_energies_as_list() {
        let cli = Cli::try_parse_from([
            "eftem-batch",
            "map",
            "a.tif",
            "b.tif",
            "c.tif",
            "--energies",
            "480,500,540",
            "--edge",
            "532",
            "--direct",
        ])
        .unwrap();
        match cli.command {
            Command::Map {
                images,
                energies,
                edge,
                direct,
                output,
                ..
            } => {
                assert_eq!(images.len(), 3);
                assert_eq!(energies, vec![480.0, 500.0, 540.0]);
                assert_eq!(edge, 532.0);
                assert!(direct);
                assert_eq!(output, PathBuf::from("maps"));
            }
            other => panic!("unexpected command {other:?}"),
        }
    }

    #[test]
    fn map_command_needs_an_edge() {
        let parsed = Cli::try_parse_from(["eftem-batch", "map", "a", "b", "c", "-e", "1,2,3"]);
        assert!(parsed.is_err());
    }

    #[test]
    fn mismatched_energy_count_is_rejected() {
        let args = MapArgs {
            images: vec![PathBuf::from("a.tif"), PathBuf::from("b.tif"), PathBuf::from("c.tif")],
            energies: vec![480.0, 500.0],
            edge: 532.0,
            epsilon: None,
            direct: false,
            threads: Some(1),
            output: PathBuf::from("unused"),
        };
        let err = run_map(&EftemConfig::default(), args).unwrap_err();
        assert!(err.to_string().contains("3 images but 2 energies"));
    }
}
