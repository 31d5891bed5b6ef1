use std::{
    fs::{self, File},
    io::{BufRead, BufReader},
    path::{Path, PathBuf},
};

use anyhow::{bail, Context, Result};
use clap::{Args, Parser, Subcommand};
use uiverify::{
    buffer::load_artifacts,
    gesture::{classify_source, parse_axis_range, GeteventLog},
    AdbDevice, AxisRange, ChangeDetector, CheckpointScorer, Config, Gesture, GestureKind, Logger,
    ScreenSize, TypingDetector,
};

#[derive(Debug, Parser)]
#[command(name = "gesture_replay")]
#[command(about = "Offline replay of recorded touch logs and screenshot buffers")]
struct Cli {
    /// Project-level TOML settings.
    #[arg(long, global = true)]
    config: Option<PathBuf>,
    /// Test-level TOML settings, applied over the project file.
    #[arg(long = "test-config", global = true)]
    test_config: Option<PathBuf>,
    #[command(subcommand)]
    command: Commands,
}

#[derive(Debug, Subcommand)]
enum Commands {
    /// Classify a recorded `getevent -lt` log into gestures.
    Gestures(GesturesArgs),
    /// Rank recorded gestures as verification checkpoints.
    Checkpoints(CheckpointsArgs),
    /// Find keyboard typing runs in recorded gestures.
    Typing(TypingArgs),
}

#[derive(Debug, Args)]
struct ScreenArgs {
    #[arg(long, requires = "height")]
    width: Option<u32>,
    #[arg(long, requires = "width")]
    height: Option<u32>,
    /// Read the display size from `adb shell wm size` on this device.
    #[arg(long, conflicts_with_all = ["width", "height"])]
    device: Option<String>,
}

impl ScreenArgs {
    fn size(&self) -> Result<ScreenSize> {
        if let (Some(width), Some(height)) = (self.width, self.height) {
            return Ok(ScreenSize { width, height });
        }
        let Some(serial) = &self.device else {
            bail!("screen size unknown: pass --width/--height or --device");
        };
        match AdbDevice::new(serial.as_str()).screen_size()? {
            Some(size) => Ok(size),
            None => bail!("`wm size` on {serial} reported no display size"),
        }
    }
}

#[derive(Debug, Args)]
struct GesturesArgs {
    log: PathBuf,
    /// Saved `getevent -lp` output with the axis maxima.
    #[arg(long, conflicts_with_all = ["max_x", "max_y"])]
    probe: Option<PathBuf>,
    #[arg(long, requires = "max_y")]
    max_x: Option<i64>,
    #[arg(long, requires = "max_x")]
    max_y: Option<i64>,
    #[command(flatten)]
    screen: ScreenArgs,
    /// One gesture kind per line; the run fails on mismatch.
    #[arg(long)]
    expect: Option<PathBuf>,
    /// Also write the gestures as JSON.
    #[arg(long)]
    json: Option<PathBuf>,
}

#[derive(Debug, Args)]
struct CheckpointsArgs {
    /// JSON produced by `gestures --json`.
    gestures: PathBuf,
    /// Preserved buffer directory (with manifest.json).
    #[arg(long)]
    artifacts: Option<PathBuf>,
    #[command(flatten)]
    screen: ScreenArgs,
}

#[derive(Debug, Args)]
struct TypingArgs {
    /// JSON produced by `gestures --json`.
    gestures: PathBuf,
    #[command(flatten)]
    screen: ScreenArgs,
    /// Also write the sequences as JSON.
    #[arg(long)]
    json: Option<PathBuf>,
}

fn main() {
    let cli = Cli::parse();
    if let Err(err) = run(cli) {
        eprintln!("error: {err:?}");
        std::process::exit(1);
    }
}

fn run(cli: Cli) -> Result<()> {
    let config = Config::load_layered(cli.config.as_deref(), cli.test_config.as_deref())
        .context("failed to load settings")?;
    let logger = Logger::from_env().context("failed to set up logging")?;

    match cli.command {
        Commands::Gestures(args) => run_gestures(&args, &config, logger),
        Commands::Checkpoints(args) => run_checkpoints(&args, &config, logger),
        Commands::Typing(args) => run_typing(&args, &config, logger),
    }
}

fn axis_range(args: &GesturesArgs) -> Result<Option<AxisRange>> {
    if let Some(probe) = &args.probe {
        let text = fs::read_to_string(probe)
            .with_context(|| format!("failed to read probe {}", probe.display()))?;
        return match parse_axis_range(&text) {
            Some(axis) => Ok(Some(axis)),
            None => bail!("{} has no ABS_MT_POSITION_X/Y max values", probe.display()),
        };
    }
    Ok(match (args.max_x, args.max_y) {
        (Some(max_x), Some(max_y)) => Some(AxisRange { max_x, max_y }),
        _ => None,
    })
}

fn run_gestures(args: &GesturesArgs, config: &Config, logger: Logger) -> Result<()> {
    let axis = axis_range(args)?;
    let file = File::open(&args.log)
        .with_context(|| format!("failed to open {}", args.log.display()))?;
    let mut source = GeteventLog::new(BufReader::new(file), axis)?;
    let (gestures, stats) =
        classify_source(&mut source, args.screen.size()?, config.gesture, logger)
            .with_context(|| format!("failed to classify {}", args.log.display()))?;

    println!("gesture,timestamp,kind,x,y,start_x,start_y,duration_ms");
    for gesture in &gestures {
        println!(
            "gesture,{:.3},{},{:.1},{:.1},{:.1},{:.1},{}",
            gesture.timestamp,
            gesture.kind,
            gesture.x,
            gesture.y,
            gesture.start_x,
            gesture.start_y,
            gesture.duration_ms
        );
    }
    eprintln!(
        "{} gestures, {} skipped events, {} unparsed lines{}",
        stats.emitted,
        stats.skipped,
        source.unparsed_lines(),
        if stats.open_contact {
            ", contact still open at end"
        } else {
            ""
        }
    );

    if let Some(path) = &args.json {
        fs::write(path, serde_json::to_vec_pretty(&gestures)?)
            .with_context(|| format!("failed to write {}", path.display()))?;
    }

    if let Some(path) = &args.expect {
        let expected = parse_expected_kinds(path)?;
        let actual: Vec<GestureKind> = gestures.iter().map(|g| g.kind).collect();
        if actual != expected {
            eprintln!("expected kinds: {}", join_labels(&expected));
            eprintln!("actual kinds:   {}", join_labels(&actual));
            bail!("gesture sequence mismatch");
        }
    }

    Ok(())
}

fn read_gestures(path: &Path) -> Result<Vec<Gesture>> {
    let raw = fs::read(path).with_context(|| format!("failed to read {}", path.display()))?;
    serde_json::from_slice(&raw)
        .with_context(|| format!("{} is not a gesture list", path.display()))
}

fn run_checkpoints(args: &CheckpointsArgs, config: &Config, logger: Logger) -> Result<()> {
    let gestures = read_gestures(&args.gestures)?;

    let frames = match &args.artifacts {
        Some(dir) => {
            load_artifacts(dir)
                .with_context(|| format!("failed to load artifacts from {}", dir.display()))?
                .1
        }
        None => Vec::new(),
    };

    let scorer = CheckpointScorer::new(
        config.checkpoint,
        ChangeDetector::from_config(&config.change),
        args.screen.size()?,
        logger,
    );

    println!("checkpoint,index,timestamp,score,reasons");
    for checkpoint in scorer.checkpoints(&gestures, &frames) {
        let reasons: Vec<String> = checkpoint
            .reasons
            .iter()
            .map(|reason| serde_json::to_string(reason).map(|s| s.trim_matches('"').to_owned()))
            .collect::<serde_json::Result<_>>()?;
        println!(
            "checkpoint,{},{:.3},{},{}",
            checkpoint.gesture_index,
            checkpoint.timestamp,
            checkpoint.score,
            reasons.join("+")
        );
    }
    Ok(())
}

fn run_typing(args: &TypingArgs, config: &Config, logger: Logger) -> Result<()> {
    let gestures = read_gestures(&args.gestures)?;
    let detector = TypingDetector::new(config.typing, args.screen.size()?, logger);
    let sequences = detector.detect(&gestures);

    println!("typing,start_index,end_index,taps,start,end,duration_ms");
    for seq in &sequences {
        println!(
            "typing,{},{},{},{:.3},{:.3},{}",
            seq.start_index,
            seq.end_index,
            seq.tap_count,
            seq.start_timestamp,
            seq.end_timestamp,
            seq.duration_ms
        );
    }
    if let Some(path) = &args.json {
        fs::write(path, serde_json::to_vec_pretty(&sequences)?)
            .with_context(|| format!("failed to write {}", path.display()))?;
    }
    Ok(())
}

fn parse_expected_kinds(path: &Path) -> Result<Vec<GestureKind>> {
    let file = File::open(path).with_context(|| format!("failed to open {}", path.display()))?;
    let reader = BufReader::new(file);

    let mut kinds = Vec::new();
    for (line_no, line) in reader.lines().enumerate() {
        let line_no = line_no + 1;
        let line = line.with_context(|| format!("failed to read {}:{line_no}", path.display()))?;
        let token = line.trim();
        if token.is_empty() || token.starts_with('#') {
            continue;
        }
        let Some(kind) = GestureKind::from_label(token) else {
            bail!(
                "{}:{line_no} invalid expected gesture kind: {token}",
                path.display()
            );
        };
        kinds.push(kind);
    }
    Ok(kinds)
}

fn join_labels(kinds: &[GestureKind]) -> String {
    kinds
        .iter()
        .map(|kind| kind.label())
        .collect::<Vec<_>>()
        .join(",")
}
