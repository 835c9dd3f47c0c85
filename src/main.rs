use cellseg::batch::{list_images, run_batch};
use cellseg::{imread, mask_to_image, CellDetector, Detection, DetectionParameters, Roi};
use clap::{Args, Parser, Subcommand, ValueEnum};
use flexi_logger::Logger;
use log::info;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::atomic::AtomicBool;

#[derive(Parser)]
#[command(name = "cellseg")]
#[command(about = "cellseg - classical cell segmentation for microscope frames", long_about = None)]
struct Cli {
    /// Log filter, overridden by RUST_LOG
    #[arg(long, global = true, default_value = "info")]
    log_level: String,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Detect cells in one image
    Detect {
        /// Input image path
        image: PathBuf,

        #[command(flatten)]
        common: CommonArgs,

        /// Output format
        #[arg(short, long, value_enum, default_value_t = OutputFormat::Json)]
        format: OutputFormat,

        /// Grow each reported box by this percentage, clamped to the frame
        #[arg(long, default_value_t = 0.0)]
        bbox_margin: f32,

        /// Write the final segmentation mask as a PNG
        #[arg(long)]
        mask: Option<PathBuf>,

        /// Write output here instead of stdout
        #[arg(short, long)]
        output: Option<PathBuf>,
    },
    /// Detect cells in every image of a directory
    Batch {
        /// Directory of images
        dir: PathBuf,

        #[command(flatten)]
        common: CommonArgs,

        /// Write the JSON summary here instead of stdout
        #[arg(short, long)]
        output: Option<PathBuf>,
    },
    /// Print or save the default parameter set
    Params {
        #[arg(short, long)]
        output: Option<PathBuf>,
    },
}

#[derive(Args)]
struct CommonArgs {
    /// Parameter JSON file; missing fields take their defaults
    #[arg(short, long)]
    params: Option<PathBuf>,

    /// Region of interest as x,y,w,h
    #[arg(long)]
    roi: Option<Roi>,
}

impl CommonArgs {
    fn load_params(&self) -> Result<DetectionParameters, cellseg::EngineError> {
        match &self.params {
            Some(path) => DetectionParameters::from_json_file(path),
            None => Ok(DetectionParameters::default()),
        }
    }
}

#[derive(Copy, Clone, PartialEq, Eq, PartialOrd, Ord, ValueEnum)]
enum OutputFormat {
    /// JSON array of detection records
    Json,
    /// Plain text, one line per cell: cx cy radius
    Text,
    /// TSV format: cx\tcy\tradius\tx,y,w,h\tarea\tcircularity
    Tsv,
    /// YOLO labels: class cx cy w h, normalized to the frame
    Yolo,
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();

    let _logger = Logger::try_with_env_or_str(&cli.log_level)?
        .log_to_stderr()
        .start()?;

    match cli.command {
        Command::Detect {
            image,
            common,
            format,
            bbox_margin,
            mask,
            output,
        } => {
            let detector = CellDetector::new(common.load_params()?)?;
            let frame = imread(&image)?;
            let report = detector.detect_with_report(&frame, common.roi)?;
            info!(
                "{}: {} cells ({:?}) in {:.3}s",
                image.display(),
                report.len(),
                report.status,
                report.elapse
            );

            if let (Some(path), Some(m)) = (&mask, &report.mask) {
                mask_to_image(m).save(path)?;
            }

            let detections: Vec<Detection> = report
                .detections
                .into_iter()
                .map(|mut d| {
                    d.bbox = d.bbox.expanded(bbox_margin, frame.width(), frame.height());
                    d
                })
                .collect();

            let text = render(&detections, format, frame.width(), frame.height())?;
            emit(&text, output.as_deref())?;
        }
        Command::Batch {
            dir,
            common,
            output,
        } => {
            let params = common.load_params()?;
            let paths = list_images(&dir)?;
            info!("{} images in {}", paths.len(), dir.display());

            let stop = AtomicBool::new(false);
            let frames = paths
                .iter()
                .map(|p| (p.display().to_string(), imread(p)));
            let outcome = run_batch(&params, frames, common.roi, &stop)?;

            emit(&serde_json::to_string_pretty(&outcome)?, output.as_deref())?;
        }
        Command::Params { output } => {
            let params = DetectionParameters::default();
            match output {
                Some(path) => params.to_json_file(&path)?,
                None => println!("{}", params.to_json_string()?),
            }
        }
    }

    Ok(())
}

fn render(
    detections: &[Detection],
    format: OutputFormat,
    frame_w: u32,
    frame_h: u32,
) -> Result<String, serde_json::Error> {
    let mut out = String::new();
    match format {
        OutputFormat::Json => {
            let records: Vec<_> = detections.iter().map(Detection::to_record).collect();
            out = serde_json::to_string_pretty(&records)?;
            out.push('\n');
        }
        OutputFormat::Text => {
            for d in detections {
                out.push_str(&format!("{:.1} {:.1} {:.1}\n", d.center.x, d.center.y, d.radius));
            }
        }
        OutputFormat::Tsv => {
            for d in detections {
                out.push_str(&format!(
                    "{:.1}\t{:.1}\t{:.1}\t{},{},{},{}\t{}\t{:.3}\n",
                    d.center.x,
                    d.center.y,
                    d.radius,
                    d.bbox.x,
                    d.bbox.y,
                    d.bbox.width,
                    d.bbox.height,
                    d.area,
                    d.circularity,
                ));
            }
        }
        OutputFormat::Yolo => {
            for d in detections {
                let [cx, cy, w, h] = d.bbox.normalized_xywh(frame_w, frame_h);
                out.push_str(&format!("0 {:.6} {:.6} {:.6} {:.6}\n", cx, cy, w, h));
            }
        }
    }
    Ok(out)
}

fn emit(text: &str, output: Option<&Path>) -> std::io::Result<()> {
    match output {
        Some(path) => fs::write(path, text),
        None => {
            print!("{}", text);
            Ok(())
        }
    }
}
