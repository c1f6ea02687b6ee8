//! omrgrade CLI: grade photographed answer sheets from the command line.

mod tesseract;

use std::path::{Path, PathBuf};
use std::sync::Arc;

use clap::{Args, Parser, Subcommand, ValueEnum};
use omrgrade::image_io;
use omrgrade::pipeline::export;
use omrgrade::{
    grade_batch, AnswerKey, BatchSummary, GradeConfig, GradeReport, GradingEngine, GradingSession,
    GridMode, MarkerMode, SheetInput, SheetSource, TemplateLayout,
};

use tesseract::TesseractRecognizer;

type CliError = Box<dyn std::error::Error>;
type CliResult<T> = Result<T, CliError>;

#[derive(Parser)]
#[command(name = "omrgrade")]
#[command(about = "Grade photographed multiple-choice answer sheets against an answer key")]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Grade one or more sheet images.
    Grade(CliGradeArgs),

    /// Read an answer key from a filled key sheet.
    Key(CliKeyArgs),

    /// Print the template (built-in unless --template is given) as JSON.
    TemplateInfo {
        #[arg(long)]
        template: Option<PathBuf>,
    },

    /// Print the default grading configuration as JSON.
    ConfigInfo,
}

#[derive(Debug, Clone, Args)]
struct CliPipelineArgs {
    /// Grading configuration JSON; omitted keys keep their defaults.
    #[arg(long)]
    config: Option<PathBuf>,

    /// Template JSON (omrgrade.template.v1). Defaults to the built-in sheet.
    #[arg(long)]
    template: Option<PathBuf>,

    /// Override the marker location strategy.
    #[arg(long, value_enum)]
    marker_mode: Option<MarkerModeArg>,

    /// Override the grid source.
    #[arg(long, value_enum)]
    grid_mode: Option<GridModeArg>,

    /// Number of graded questions.
    #[arg(long)]
    questions: Option<usize>,

    /// Number of choices per question.
    #[arg(long)]
    choices: Option<usize>,

    /// Downscale inputs so the longer side is at most this many pixels.
    #[arg(long)]
    max_side: Option<u32>,
}

#[derive(Debug, Clone, Args)]
struct CliGradeArgs {
    /// Sheet images (JPEG or PNG).
    #[arg(required = true)]
    images: Vec<PathBuf>,

    /// Answer key file: JSON (omrgrade.key.v1), or a `question,answer`
    /// table when the extension is `.csv`.
    #[arg(long, conflicts_with_all = ["key", "key_sheet"])]
    key_file: Option<PathBuf>,

    /// Answer key as a label string, e.g. "ABCDA".
    #[arg(long, conflicts_with = "key_sheet")]
    key: Option<String>,

    /// Photo of a filled key sheet.
    #[arg(long)]
    key_sheet: Option<PathBuf>,

    /// Path to write all reports (JSON array).
    #[arg(long)]
    out_json: Option<PathBuf>,

    /// Path to write the per-question table (CSV).
    #[arg(long)]
    csv: Option<PathBuf>,

    /// Skip metadata recognition.
    #[arg(long)]
    no_ocr: bool,

    /// Tesseract executable used for metadata fields.
    #[arg(long, default_value = "tesseract")]
    tesseract: PathBuf,

    #[command(flatten)]
    pipeline: CliPipelineArgs,
}

#[derive(Debug, Clone, Args)]
struct CliKeyArgs {
    /// Photo of a filled key sheet.
    #[arg(long)]
    image: PathBuf,

    /// Path to write the key (JSON).
    #[arg(long)]
    out: PathBuf,

    #[command(flatten)]
    pipeline: CliPipelineArgs,
}

#[derive(Debug, Clone, Copy, ValueEnum)]
enum MarkerModeArg {
    Contour,
    Fiducial,
}

impl MarkerModeArg {
    fn to_core(self) -> MarkerMode {
        match self {
            Self::Contour => MarkerMode::Contour,
            Self::Fiducial => MarkerMode::Fiducial,
        }
    }
}

#[derive(Debug, Clone, Copy, ValueEnum)]
enum GridModeArg {
    Fixed,
    Inferred,
}

impl GridModeArg {
    fn to_core(self) -> GridMode {
        match self {
            Self::Fixed => GridMode::Fixed,
            Self::Inferred => GridMode::Inferred,
        }
    }
}

impl CliPipelineArgs {
    fn load_config(&self) -> CliResult<GradeConfig> {
        let mut config = match &self.config {
            Some(path) => GradeConfig::from_json_file(path)?,
            None => GradeConfig::default(),
        };
        if let Some(mode) = self.marker_mode {
            config.marker_mode = mode.to_core();
        }
        if let Some(mode) = self.grid_mode {
            config.grid_mode = mode.to_core();
        }
        if let Some(q) = self.questions {
            config.questions_per_sheet = Some(q);
        }
        if let Some(c) = self.choices {
            config.choices_per_question = c;
        }
        config.validate()?;
        Ok(config)
    }

    fn load_template(&self) -> CliResult<TemplateLayout> {
        load_template(self.template.as_deref())
    }

    fn load_image(&self, path: &Path) -> CliResult<image::GrayImage> {
        let img = image_io::load_path(path)
            .map_err(|e| -> CliError { format!("{}: {}", path.display(), e).into() })?;
        Ok(match self.max_side {
            Some(max_side) => image_io::downscale_to_max_side(&img, max_side),
            None => img,
        })
    }
}

fn load_template(path: Option<&Path>) -> CliResult<TemplateLayout> {
    match path {
        Some(path) => TemplateLayout::from_json_file(path),
        None => Ok(TemplateLayout::default()),
    }
}

fn main() -> CliResult<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    let cli = Cli::parse();

    match cli.command {
        Commands::Grade(args) => run_grade(&args),
        Commands::Key(args) => run_key(&args),
        Commands::TemplateInfo { template } => run_template_info(template.as_deref()),
        Commands::ConfigInfo => run_config_info(),
    }
}

// ── template-info / config-info ───────────────────────────────────────

fn run_template_info(path: Option<&Path>) -> CliResult<()> {
    let template = load_template(path)?;
    eprintln!(
        "template '{}': {}x{} px, {} questions in {} blocks, {} metadata fields",
        template.name,
        template.page_size[0],
        template.page_size[1],
        template.n_questions(),
        template.blocks.len(),
        template.metadata.len()
    );
    println!("{}", template.to_json_string()?);
    Ok(())
}

fn run_config_info() -> CliResult<()> {
    println!("{}", serde_json::to_string_pretty(&GradeConfig::default())?);
    Ok(())
}

// ── key ───────────────────────────────────────────────────────────────

fn run_key(args: &CliKeyArgs) -> CliResult<()> {
    let config = args.pipeline.load_config()?;
    let template = args.pipeline.load_template()?;
    let engine = GradingEngine::new(GradingSession::new(config, template)?)?;

    tracing::info!("Reading key sheet: {}", args.image.display());
    let img = args.pipeline.load_image(&args.image)?;
    let key = engine.read_answer_key(&img)?;

    std::fs::write(&args.out, key.to_json_string()?)?;
    tracing::info!("Answer key ({} questions) written to {}", key.len(), args.out.display());
    Ok(())
}

// ── grade ─────────────────────────────────────────────────────────────

fn resolve_key(
    args: &CliGradeArgs,
    config: &GradeConfig,
    template: &TemplateLayout,
) -> CliResult<Option<AnswerKey>> {
    if let Some(path) = &args.key_file {
        return Ok(Some(AnswerKey::from_path(path, &config.choice_labels)?));
    }
    if let Some(labels) = &args.key {
        return Ok(Some(AnswerKey::from_label_string(labels, &config.choice_labels)?));
    }
    if let Some(path) = &args.key_sheet {
        let reader = GradingEngine::new(GradingSession::new(config.clone(), template.clone())?)?;
        tracing::info!("Reading key sheet: {}", path.display());
        let img = args.pipeline.load_image(path)?;
        return Ok(Some(reader.read_answer_key(&img)?));
    }
    tracing::warn!("No answer key given; every question is reported as unkeyed");
    Ok(None)
}

fn print_batch_summary(batch: &BatchSummary) {
    println!(
        "batch: {}/{} sheets graded, score {:.1}/{:.1} ({:.1}%), {} with multiple marks{}",
        batch.graded,
        batch.sheets,
        batch.total_score,
        batch.max_score,
        batch.average_percentage,
        batch.sheets_with_multiple,
        if batch.graded_as_answer_key > 0 {
            format!(", {} graded as answer key", batch.graded_as_answer_key)
        } else {
            String::new()
        }
    );
    for q in &batch.questions {
        println!(
            "  Q{:<3} {:>5.1}% correct ({}/{}; wrong {}, missing {}, multiple {})",
            q.question,
            100.0 * q.accuracy,
            q.correct,
            q.responses,
            q.wrong,
            q.missing,
            q.multiple
        );
    }
}

fn run_grade(args: &CliGradeArgs) -> CliResult<()> {
    let config = args.pipeline.load_config()?;
    let template = args.pipeline.load_template()?;
    let key = resolve_key(args, &config, &template)?;

    let mut session = GradingSession::new(config.clone(), template)?;
    if let Some(key) = key {
        session = session.with_answer_key(key)?;
    }
    if !args.no_ocr && config.metadata.enable && !session.template().metadata.is_empty() {
        let recognizer = TesseractRecognizer::new(&args.tesseract);
        match recognizer.probe() {
            Ok(version) => {
                tracing::info!("Metadata recognition with {}", version);
                session = session.with_recognizer(Arc::new(recognizer));
            }
            Err(e) => tracing::warn!("{}; metadata fields stay empty", e),
        }
    }
    let engine = GradingEngine::new(session)?;

    let inputs = args
        .images
        .iter()
        .map(|path| -> CliResult<SheetInput> {
            let mut input = SheetInput::from_path(path);
            // Downscaled sheets are decoded up front; the rest load lazily.
            if args.pipeline.max_side.is_some() {
                input.source = SheetSource::Image(args.pipeline.load_image(path)?);
            }
            Ok(input)
        })
        .collect::<CliResult<Vec<_>>>()?;

    tracing::info!("Grading {} sheets", inputs.len());
    let outcomes = grade_batch(&engine, &inputs);
    let batch = BatchSummary::from_outcomes(&outcomes);

    let mut reports: Vec<GradeReport> = Vec::with_capacity(outcomes.len());
    let mut failed = 0usize;
    for outcome in outcomes {
        match outcome.result {
            Ok(report) => {
                let s = report.summary();
                println!(
                    "{}: {}/{} correct, {} wrong, {} missing, {} multiple, score {:.1}/{:.1} ({:.1}%){}",
                    outcome.name,
                    s.correct,
                    s.keyed,
                    s.wrong,
                    s.missing,
                    s.multiple,
                    s.score,
                    s.max_score,
                    s.percentage,
                    if report.graded_as_answer_key() {
                        " [answer key]"
                    } else {
                        ""
                    }
                );
                reports.push(report);
            }
            Err(e) => {
                println!("{}: FAILED ({})", outcome.name, e);
                failed += 1;
            }
        }
    }

    if batch.sheets > 1 {
        print_batch_summary(&batch);
    }

    if let Some(path) = &args.out_json {
        std::fs::write(path, serde_json::to_string_pretty(&reports)?)?;
        tracing::info!("Reports written to {}", path.display());
    }
    if let Some(path) = &args.csv {
        let file = std::fs::File::create(path)?;
        export::write_csv(file, &reports, &config)?;
        tracing::info!("Table written to {}", path.display());
    }

    if failed > 0 {
        return Err(format!("{} of {} sheets failed", failed, args.images.len()).into());
    }
    Ok(())
}
