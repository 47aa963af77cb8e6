// Usage: target/release/pud run --config pud.toml
//        target/release/pud run --records photos.csv --grid grid.geojson --fid FID --output pud.csv
//        target/release/pud summary photos.csv --owners-above 100

use std::path::PathBuf;

use anyhow::{bail, Context, Result};
use clap::{Args, Parser, Subcommand};
use pud::{owner_activity, summarize, BoundaryPolicy, MergeKind, PipelineConfig, RecordTable};

#[derive(Parser, Debug)]
#[command(author, version, about = "Photo-user-days per grid cell and day", long_about = None)]
struct Cli {
    /// Debug logging (otherwise PUD_LOG decides)
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Compute the PUD table
    Run(RunArgs),
    /// Data-quality report of a record file
    Summary {
        records: PathBuf,

        /// Also list owner names with more photos than this
        #[arg(long)]
        owners_above: Option<usize>,
    },
}

#[derive(Args, Debug)]
struct RunArgs {
    /// TOML config; the flags below are ignored when given
    #[arg(short, long, value_name = "FILE")]
    config: Option<PathBuf>,

    #[arg(long)]
    records: Option<PathBuf>,

    #[arg(long)]
    grid: Option<PathBuf>,

    /// Grid property with the cell identifiers
    #[arg(long)]
    fid: Option<String>,

    #[arg(short, long)]
    output: Option<PathBuf>,

    /// Area of interest to clip the records to
    #[arg(long)]
    mask: Option<PathBuf>,

    #[arg(long, default_value = "EPSG:4326")]
    source_crs: String,

    #[arg(long)]
    grid_crs: Option<String>,

    #[arg(long, value_enum, default_value_t = BoundaryPolicy::Intersects)]
    boundary: BoundaryPolicy,

    #[arg(long, value_enum, default_value_t = MergeKind::Mean)]
    merge: MergeKind,

    /// Fail when the result has no rows
    #[arg(long)]
    fail_on_empty: bool,
}

impl RunArgs {
    fn into_config(self) -> Result<PipelineConfig> {
        if let Some(path) = self.config {
            return PipelineConfig::load(&path).with_context(|| format!("reading {:?}", path));
        }
        let (Some(records), Some(grid), Some(fid), Some(output)) =
            (self.records, self.grid, self.fid, self.output)
        else {
            bail!("either --config or all of --records, --grid, --fid and --output are required");
        };
        let mut config = PipelineConfig::new(records, grid, fid, output);
        config.mask = self.mask;
        config.source_crs = self.source_crs;
        config.grid_crs = self.grid_crs;
        config.boundary = self.boundary;
        config.merge = self.merge;
        config.allow_empty = !self.fail_on_empty;
        Ok(config)
    }
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    pud::logging::init(cli.verbose);

    match cli.command {
        Command::Run(args) => {
            let config = args.into_config()?;
            let table = pud::pipeline::run(&config)?;
            eprintln!("{} rows written to {:?}", table.len(), config.output);
        }
        Command::Summary {
            records,
            owners_above,
        } => {
            let table = RecordTable::load(&records)?;
            println!("{}", summarize(&table));
            if let Some(threshold) = owners_above {
                for owner in owner_activity(&table, threshold) {
                    println!("{}\t{}", owner.name, owner.photos);
                }
            }
        }
    }
    Ok(())
}
