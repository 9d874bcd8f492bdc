//! answer-sheet CLI: generate templates, render sheets and calibrate scans.

use answer_sheet::calib::{self, CalibrateConfig, CoordinateMap};
use answer_sheet::core::TransformModel;
use answer_sheet::layout::{
    self, ExamSpec, LayoutOptions, LayoutStructure, PaperSize, ProfileRegistry, RenderOptions,
    Template,
};
use answer_sheet::scan;
use clap::{Args, Parser, Subcommand, ValueEnum};
use log::{info, LevelFilter};
use std::fs;
use std::path::{Path, PathBuf};

type CliError = Box<dyn std::error::Error>;
type CliResult<T> = Result<T, CliError>;

#[derive(Parser)]
#[command(name = "answer-sheet")]
#[command(about = "Answer-sheet templates, alignment-mark calibration and bubble coordinate maps")]
#[command(version)]
struct Cli {
    /// Increase log verbosity, one level per -v.
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    verbose: u8,

    /// Only log errors.
    #[arg(short, long, global = true)]
    quiet: bool,

    /// Emit logs as JSON lines.
    #[cfg(feature = "tracing")]
    #[arg(long, global = true)]
    log_json: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Generate a template from an exam structure (JSON).
    Generate(GenerateArgs),

    /// List the available geometry profiles.
    Profiles {
        /// Profile registry (JSON) to use instead of the built-in one.
        #[arg(long)]
        profiles: Option<PathBuf>,
    },

    /// Map a template's bubbles without calibration.
    Preview {
        #[arg(long)]
        template: PathBuf,
        #[arg(long)]
        out: Option<PathBuf>,
    },

    /// Render a template to an image, optionally with filled answers.
    Render {
        #[arg(long)]
        template: PathBuf,
        /// Output image; the format follows the extension.
        #[arg(long)]
        out: PathBuf,
        /// Answers to fill, e.g. "1:A,2:C,17:T".
        #[arg(long, default_value = "")]
        answers: String,
    },

    /// Detect alignment marks on a scan and map every bubble into it.
    Calibrate(CalibrateArgs),

    /// Validate a coordinate map (JSON).
    Validate {
        #[arg(long)]
        map: PathBuf,
        /// Exit with an error when the map is invalid.
        #[arg(long)]
        strict: bool,
    },
}

#[derive(Debug, Clone, Args)]
struct GenerateArgs {
    /// Exam structure (JSON).
    #[arg(long)]
    exam: PathBuf,

    #[arg(long, value_enum, default_value_t = PaperArg::A4)]
    paper: PaperArg,

    #[arg(long, default_value = "300")]
    dpi: u32,

    #[arg(long, value_enum, default_value_t = StructureArg::Continuous)]
    structure: StructureArg,

    /// Column count for the continuous layout (profile default when omitted).
    #[arg(long)]
    columns: Option<u32>,

    /// Question count used when the exam has no subjects.
    #[arg(long)]
    default_questions: Option<u32>,

    /// Profile registry (JSON) to use instead of the built-in one.
    #[arg(long)]
    profiles: Option<PathBuf>,

    /// Include the precomputed bubble positions in the template.
    #[arg(long)]
    with_coordinates: bool,

    /// Output path; stdout when omitted.
    #[arg(long)]
    out: Option<PathBuf>,
}

#[derive(Debug, Clone, Args)]
struct CalibrateArgs {
    #[arg(long)]
    template: PathBuf,

    /// Scanned sheet (PNG, JPEG, TIFF, ...).
    #[arg(long)]
    image: PathBuf,

    /// Detector and transform settings (JSON).
    #[arg(long)]
    config: Option<PathBuf>,

    /// Override the requested transform model.
    #[arg(long, value_enum)]
    model: Option<ModelArg>,

    /// Write only the coordinate map instead of the full report.
    #[arg(long)]
    map_only: bool,

    /// Output path; stdout when omitted.
    #[arg(long)]
    out: Option<PathBuf>,
}

#[derive(Debug, Clone, Copy, ValueEnum)]
enum PaperArg {
    A4,
    Letter,
}

impl PaperArg {
    fn to_layout(self) -> PaperSize {
        match self {
            Self::A4 => PaperSize::A4,
            Self::Letter => PaperSize::Letter,
        }
    }
}

#[derive(Debug, Clone, Copy, ValueEnum)]
enum StructureArg {
    Continuous,
    SubjectInColumn,
}

impl StructureArg {
    fn to_layout(self) -> LayoutStructure {
        match self {
            Self::Continuous => LayoutStructure::Continuous,
            Self::SubjectInColumn => LayoutStructure::SubjectInColumn,
        }
    }
}

#[derive(Debug, Clone, Copy, ValueEnum)]
enum ModelArg {
    Identity,
    SingleAnchor,
    ScaleTranslate,
    Affine,
    Homography,
}

impl ModelArg {
    fn to_core(self) -> TransformModel {
        match self {
            Self::Identity => TransformModel::Identity,
            Self::SingleAnchor => TransformModel::SingleAnchor,
            Self::ScaleTranslate => TransformModel::ScaleTranslate,
            Self::Affine => TransformModel::Affine,
            Self::Homography => TransformModel::Homography,
        }
    }
}

fn main() {
    let cli = Cli::parse();
    init_logging(&cli);

    if let Err(err) = run(cli.command) {
        eprintln!("error: {err}");
        std::process::exit(1);
    }
}

/// Each `-v` raises `base` one step; `--quiet` wins over `-v`.
fn log_level(quiet: bool, verbose: u8, base: LevelFilter) -> LevelFilter {
    if quiet {
        return LevelFilter::Error;
    }
    LevelFilter::iter()
        .skip_while(|l| *l < base)
        .nth(verbose as usize)
        .unwrap_or(LevelFilter::Trace)
}

fn init_logging(cli: &Cli) {
    #[cfg(feature = "tracing")]
    {
        let _ = tracing_log::LogTracer::init();
        let level = log_level(cli.quiet, cli.verbose, LevelFilter::Info);
        answer_sheet::core::init_tracing_with_level(cli.log_json, level);
    }
    #[cfg(not(feature = "tracing"))]
    {
        let level = log_level(cli.quiet, cli.verbose, LevelFilter::Warn);
        let _ = answer_sheet::core::init_with_level(level);
    }
}

fn run(command: Commands) -> CliResult<()> {
    match command {
        Commands::Generate(args) => run_generate(&args),
        Commands::Profiles { profiles } => run_profiles(profiles.as_deref()),
        Commands::Preview { template, out } => {
            let template = load_template(&template)?;
            let map = calib::preview_map(&template);
            emit(&map.to_json_pretty()?, out.as_deref())
        }
        Commands::Render {
            template,
            out,
            answers,
        } => run_render(&template, &out, &answers),
        Commands::Calibrate(args) => run_calibrate(&args),
        Commands::Validate { map, strict } => run_validate(&map, strict),
    }
}

fn load_registry(path: Option<&Path>) -> CliResult<ProfileRegistry> {
    Ok(match path {
        Some(p) => ProfileRegistry::load_json(p)?,
        None => ProfileRegistry::builtin().clone(),
    })
}

fn load_template(path: &Path) -> CliResult<Template> {
    let raw = fs::read_to_string(path)
        .map_err(|e| -> CliError { format!("reading {}: {e}", path.display()).into() })?;
    Ok(Template::from_json(&raw)?)
}

fn emit(json: &str, out: Option<&Path>) -> CliResult<()> {
    match out {
        Some(path) => {
            fs::write(path, json)?;
            info!("wrote {}", path.display());
        }
        None => println!("{json}"),
    }
    Ok(())
}

fn run_generate(args: &GenerateArgs) -> CliResult<()> {
    let raw = fs::read_to_string(&args.exam)
        .map_err(|e| -> CliError { format!("reading {}: {e}", args.exam.display()).into() })?;
    let spec = ExamSpec::from_json(&raw)?;
    let registry = load_registry(args.profiles.as_deref())?;
    let profile = registry.lookup(args.paper.to_layout(), args.dpi)?;

    let options = LayoutOptions {
        structure: args.structure.to_layout(),
        columns: args.columns,
        default_question_count: args.default_questions,
        ..LayoutOptions::default()
    };
    let mut template = layout::generate_template(&spec, profile, &options);
    if args.with_coordinates {
        template = template.with_question_coordinates();
    }
    info!(
        "generated '{}' on {}: {} questions",
        template.exam_name, template.profile_id, template.total_questions
    );
    emit(&template.to_json_pretty()?, args.out.as_deref())
}

fn run_profiles(path: Option<&Path>) -> CliResult<()> {
    let registry = load_registry(path)?;
    for p in registry.profiles() {
        println!(
            "{}\t{}\t{} dpi\t{}x{} px",
            p.id, p.paper_size, p.dpi, p.width_px, p.height_px
        );
    }
    Ok(())
}

fn run_render(template: &Path, out: &Path, answers: &str) -> CliResult<()> {
    let template = load_template(template)?;
    let opts = RenderOptions {
        answers: RenderOptions::parse_answers(answers)?,
        ..RenderOptions::default()
    };
    scan::save_rendered(&template, &opts, out)?;
    info!("rendered {} to {}", template.exam_name, out.display());
    Ok(())
}

fn run_calibrate(args: &CalibrateArgs) -> CliResult<()> {
    let template = load_template(&args.template)?;
    let mut config = match &args.config {
        Some(path) => CalibrateConfig::load_json(path)?,
        None => CalibrateConfig::default(),
    };
    if let Some(model) = args.model {
        config.transform.model = model.to_core();
    }
    config.validate()?;

    let result = scan::calibrate_file(&template, &args.image, &config)?;
    if result.calibration.low_quality {
        log::warn!(
            "low calibration quality: {}/{} marks detected",
            result.detection.total(),
            config.transform.expected_marks
        );
    }
    let json = if args.map_only {
        result.map.to_json_pretty()?
    } else {
        serde_json::to_string_pretty(&result)?
    };
    emit(&json, args.out.as_deref())
}

fn run_validate(path: &Path, strict: bool) -> CliResult<()> {
    let raw = fs::read_to_string(path)
        .map_err(|e| -> CliError { format!("reading {}: {e}", path.display()).into() })?;
    let map = CoordinateMap::from_json(&raw)?;
    let report = calib::validate_map(&map);
    println!("{}", serde_json::to_string_pretty(&report)?);
    if strict && !report.is_valid {
        return Err(format!("invalid coordinate map: {}", report.issues.join("; ")).into());
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn verbosity_steps_up_from_the_base_level() {
        assert_eq!(log_level(false, 0, LevelFilter::Warn), LevelFilter::Warn);
        assert_eq!(log_level(false, 1, LevelFilter::Warn), LevelFilter::Info);
        assert_eq!(log_level(false, 2, LevelFilter::Info), LevelFilter::Trace);
        assert_eq!(log_level(false, 9, LevelFilter::Warn), LevelFilter::Trace);
    }

    #[test]
    fn quiet_overrides_verbose() {
        assert_eq!(log_level(true, 3, LevelFilter::Info), LevelFilter::Error);
    }
}
