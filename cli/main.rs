#![deny(unused_variables)]
#![deny(dead_code)]
#![deny(unused_imports)]

use clap::{Args, Parser, Subcommand, ValueEnum};
use std::path::{Path, PathBuf};
use std::process;

use levelset::config::{OutcomeKind, SelectionConfig};
use levelset::data::{ColumnRoles, LONG_TABLE, PRIMARY_TABLE, Table};
use levelset::encode::{Aggregation, FillConfig, encode};
use levelset::orchestrate::{
    SelectionMode, SelectionOutcome, SelectionRequest, run_selection,
};
use levelset::scoring::ZeroVariancePolicy;
use levelset::store::LevelStoreArtifact;

#[derive(Clone, Copy, ValueEnum)]
pub enum SeparatorCli {
    Tab,
    Comma,
}

impl SeparatorCli {
    fn byte(self) -> u8 {
        match self {
            SeparatorCli::Tab => b'\t',
            SeparatorCli::Comma => b',',
        }
    }
}

#[derive(Clone, Copy, ValueEnum)]
pub enum OutcomeKindCli {
    Auto,
    Regression,
    Classification,
}

#[derive(Clone, Copy, ValueEnum)]
pub enum ZeroVarianceCli {
    Saturate,
    Cap,
    Reject,
}

#[derive(Clone, Copy, ValueEnum)]
pub enum AggregationCli {
    Sum,
    Mean,
    Min,
    Max,
    First,
    Count,
}

#[derive(Args)]
pub struct TableArgs {
    /// Path to the primary table (one row per observation)
    pub primary: PathBuf,

    /// Path to the long-format group table (one row per observation-group membership)
    pub long: PathBuf,

    /// Identifier column shared by both tables
    #[arg(long)]
    pub id: String,

    /// Field separator of both input files
    #[arg(long, value_enum, default_value_t = SeparatorCli::Tab)]
    pub separator: SeparatorCli,
}

#[derive(Args)]
pub struct SelectionArgs {
    /// Outcome column in the primary table
    #[arg(long)]
    pub outcome: Option<String>,

    /// TOML file with selection settings; flags given on the command line take precedence
    #[arg(long)]
    pub config: Option<PathBuf>,

    /// Number of levels to keep
    #[arg(long, value_name = "N")]
    pub n_levels: Option<usize>,

    /// How to interpret the outcome column
    #[arg(long, value_enum)]
    pub outcome_kind: Option<OutcomeKindCli>,

    /// Exponent on the class-purity factor (classification only)
    #[arg(long)]
    pub cohesion_weight: Option<f64>,

    /// Score of zero-variance groups (regression only)
    #[arg(long, value_enum)]
    pub zero_variance: Option<ZeroVarianceCli>,

    /// Magnitude used by `--zero-variance cap`
    #[arg(long, default_value = "100")]
    pub zero_variance_cap: f64,

    /// Outcome label treated as the positive class
    #[arg(long)]
    pub positive_class: Option<String>,
}

#[derive(Args)]
pub struct FillArgs {
    /// Long-table column whose values fill the encoded cells
    #[arg(long)]
    pub value_column: Option<String>,

    /// Aggregation for repeated memberships
    #[arg(long, value_enum)]
    pub aggregation: Option<AggregationCli>,

    /// Cell value for a membership when no value column is given
    #[arg(long)]
    pub present_value: Option<f64>,

    /// Cell value for observations without the membership
    #[arg(long)]
    pub missing_value: Option<f64>,

    /// Prefix for encoded column names (default: "<group>_"); fixed by the level store on replay
    #[arg(long)]
    pub prefix: Option<String>,
}

#[derive(Args)]
pub struct SelectArgs {
    #[command(flatten)]
    pub tables: TableArgs,

    /// Grouping attribute column in the long table
    #[arg(long)]
    pub group: String,

    #[command(flatten)]
    pub selection: SelectionArgs,

    #[command(flatten)]
    pub fill: FillArgs,

    /// Where to write the level store
    #[arg(long, default_value = "levels.toml")]
    pub out: PathBuf,
}

#[derive(Args)]
pub struct EncodeArgs {
    #[command(flatten)]
    pub tables: TableArgs,

    /// Grouping attribute column in the long table (defaults to the stored one when replaying)
    #[arg(long)]
    pub group: Option<String>,

    /// Previously written level store to replay; without it a fresh selection is trained
    #[arg(long)]
    pub levels: Option<PathBuf>,

    #[command(flatten)]
    pub selection: SelectionArgs,

    #[command(flatten)]
    pub fill: FillArgs,

    /// Where to write the augmented primary table
    #[arg(long, default_value = "encoded.tsv")]
    pub out: PathBuf,

    /// Where to write the level store when training
    #[arg(long, default_value = "levels.toml")]
    pub levels_out: PathBuf,
}

#[derive(Parser)]
#[command(
    name = "levelset",
    version,
    about = "Select and encode the most informative levels of a high-cardinality categorical attribute",
    long_about = "Scores every level of a categorical attribute against an outcome, keeps a balanced \
                 budget of the strongest positive and negative levels, and encodes them as columns. \
                 A stored level set replays the exact same columns on new data."
)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Train a level set (outputs: levels.toml)
    Select(SelectArgs),
    /// Encode selected levels as columns, training or replaying a level set (outputs: encoded.tsv)
    Encode(EncodeArgs),
    /// Print a stored level set
    Inspect {
        /// Path to a level store (.toml)
        levels: PathBuf,
    },
}

fn build_config(args: &SelectionArgs) -> Result<SelectionConfig, Box<dyn std::error::Error>> {
    let mut config = match &args.config {
        Some(path) => SelectionConfig::load(path)?,
        None => SelectionConfig::default(),
    };
    if let Some(n_levels) = args.n_levels {
        config.n_levels = n_levels;
    }
    if let Some(kind) = args.outcome_kind {
        config.outcome_kind = match kind {
            OutcomeKindCli::Auto => OutcomeKind::Auto,
            OutcomeKindCli::Regression => OutcomeKind::Regression,
            OutcomeKindCli::Classification => OutcomeKind::Classification,
        };
    }
    if let Some(weight) = args.cohesion_weight {
        config.cohesion_weight = weight;
    }
    if let Some(policy) = args.zero_variance {
        config.zero_variance = match policy {
            ZeroVarianceCli::Saturate => ZeroVariancePolicy::Saturate,
            ZeroVarianceCli::Cap => ZeroVariancePolicy::Cap(args.zero_variance_cap),
            ZeroVarianceCli::Reject => ZeroVariancePolicy::Reject,
        };
    }
    if args.positive_class.is_some() {
        config.positive_class = args.positive_class.clone();
    }
    config.validate()?;
    Ok(config)
}

fn build_fill(args: &FillArgs, base: FillConfig) -> FillConfig {
    let mut fill = base;
    if args.value_column.is_some() {
        fill.value_column = args.value_column.clone();
    }
    if let Some(aggregation) = args.aggregation {
        fill.aggregation = match aggregation {
            AggregationCli::Sum => Aggregation::Sum,
            AggregationCli::Mean => Aggregation::Mean,
            AggregationCli::Min => Aggregation::Min,
            AggregationCli::Max => Aggregation::Max,
            AggregationCli::First => Aggregation::First,
            AggregationCli::Count => Aggregation::Count,
        };
    }
    if let Some(value) = args.present_value {
        fill.present_value = value;
    }
    if let Some(value) = args.missing_value {
        fill.missing_value = value;
    }
    if args.prefix.is_some() {
        fill.column_prefix = args.prefix.clone();
    }
    fill
}

fn load_tables(args: &TableArgs) -> Result<(Table, Table), Box<dyn std::error::Error>> {
    let primary = Table::read(PRIMARY_TABLE, &args.primary, args.separator.byte())?;
    let long = Table::read(LONG_TABLE, &args.long, args.separator.byte())?;
    println!(
        "Loaded {} primary rows and {} group memberships",
        primary.height(),
        long.height()
    );
    Ok((primary, long))
}

fn train_levels(
    primary: &Table,
    long: &Table,
    id: &str,
    group: &str,
    selection: &SelectionArgs,
    fill: FillConfig,
) -> Result<SelectionOutcome, Box<dyn std::error::Error>> {
    let outcome = selection
        .outcome
        .clone()
        .ok_or("--outcome is required to train a level set")?;
    let request = SelectionRequest {
        columns: ColumnRoles::new(id, group, outcome),
        config: build_config(selection)?,
        fill,
        mode: SelectionMode::Train,
    };
    let result = run_selection(primary, long, request)?;
    for warning in &result.warnings {
        println!("Warning: {warning}");
    }
    Ok(result)
}

fn save_artifact(
    artifact: &LevelStoreArtifact,
    path: &Path,
) -> Result<(), Box<dyn std::error::Error>> {
    artifact.save(path)?;
    println!("Level store saved to: {}", path.display());
    Ok(())
}

pub fn select(args: SelectArgs) -> Result<(), Box<dyn std::error::Error>> {
    let (primary, long) = load_tables(&args.tables)?;
    let fill = build_fill(&args.fill, FillConfig::default());
    let result = train_levels(
        &primary,
        &long,
        &args.tables.id,
        &args.group,
        &args.selection,
        fill,
    )?;
    print_levels(&result.artifact);
    save_artifact(&result.artifact, &args.out)
}

pub fn encode_tables(args: EncodeArgs) -> Result<(), Box<dyn std::error::Error>> {
    let (primary, long) = load_tables(&args.tables)?;

    let (artifact, fill) = match &args.levels {
        Some(path) => {
            if args.fill.prefix.is_some() {
                return Err(
                    "--prefix cannot be combined with --levels; column names come from the level store"
                        .into(),
                );
            }
            println!("Loading level store from: {}", path.display());
            let stored = LevelStoreArtifact::load(path)?;
            let fill = build_fill(&args.fill, stored.fill().clone());
            let group = args
                .group
                .clone()
                .unwrap_or_else(|| stored.grouping_attribute().to_string());
            let request = SelectionRequest {
                columns: ColumnRoles::new(
                    args.tables.id.as_str(),
                    group,
                    stored.outcome(),
                ),
                config: stored.config().clone(),
                fill: fill.clone(),
                mode: SelectionMode::replay(stored),
            };
            (run_selection(&primary, &long, request)?.artifact, fill)
        }
        None => {
            let group = args
                .group
                .clone()
                .ok_or("--group is required to train a level set")?;
            let fill = build_fill(&args.fill, FillConfig::default());
            let result = train_levels(
                &primary,
                &long,
                &args.tables.id,
                &group,
                &args.selection,
                fill.clone(),
            )?;
            save_artifact(&result.artifact, &args.levels_out)?;
            (result.artifact, fill)
        }
    };

    let encoded = encode(&primary, &long, &args.tables.id, &artifact, &fill)?;
    encoded.write_tsv(&primary, &args.out)?;
    println!(
        "Encoded {} columns; augmented table saved to: {}",
        encoded.columns.len(),
        args.out.display()
    );
    Ok(())
}

pub fn inspect(path: &Path) -> Result<(), Box<dyn std::error::Error>> {
    let artifact = LevelStoreArtifact::load(path)?;
    println!(
        "Level store for '{}' predicting '{}' ({})",
        artifact.grouping_attribute(),
        artifact.outcome(),
        artifact.created_by()
    );
    println!("Encoded columns hold {}", artifact.fill());
    print_levels(&artifact);
    Ok(())
}

fn print_levels(artifact: &LevelStoreArtifact) {
    let levels = artifact.levels();
    println!("{} levels selected by the {} statistic:", levels.len(), levels.method());
    println!("rank\tlevel\tsign\tn\tomega");
    for (rank, level) in levels.levels().iter().enumerate() {
        println!(
            "{}\t{}\t{}\t{}\t{:.6}",
            rank + 1,
            level.group,
            level.sign,
            level.n,
            level.omega
        );
    }
}

fn main() {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();
    let cli = Cli::parse();

    let result = match cli.command {
        Commands::Select(args) => select(args),
        Commands::Encode(args) => encode_tables(args),
        Commands::Inspect { levels } => inspect(&levels),
    };

    if let Err(e) = result {
        eprintln!("Error: {e}");
        process::exit(1);
    }
}
