//! rred CLI - survey extraction and dispatch list reconciliation
//!
//! # Main Commands
//!
//! ```bash
//! rred extract 2021                          # Build masterfile_2021-22.csv and issue report
//! rred roster dispatch.csv                   # Check a dispatch list
//! rred mailing RRS100 --roster dispatch.csv  # Mailing info for one school (JSON)
//! rred summary masterfile.csv --school RRS100 --year 2021
//! rred tables masterfile.csv --school RRS100 --year 2021 -o tables/
//! ```
//!
//! The config file comes from `--config`, then `RRED_CONFIG` (a `.env`
//! file is honoured), then `redcap_config.toml`.

use clap::{Parser, Subcommand};
use rred::config::CONFIG_ENV_VAR;
use rred::logs::init_logging;
use rred::parser::write_table_file;
use rred::report::school_filter;
use rred::{
    read_table, run_year, ConfigFile, Masterfile, PipelineConfig, ReportTable, ReportingWindow,
    Roster, SchoolSummary,
};
use std::env;
use std::path::{Path, PathBuf};

const DEFAULT_CONFIG: &str = "redcap_config.toml";

#[derive(Parser)]
#[command(name = "rred")]
#[command(
    about = "Reshape survey exports into the RRED masterfile and check them against the dispatch list",
    long_about = None
)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Extract both survey periods for a year, write the masterfile and issues
    Extract {
        /// Survey start year, e.g. 2021 for 2021-22
        year: i32,

        /// Config file (default: $RRED_CONFIG or redcap_config.toml)
        #[arg(short, long)]
        config: Option<PathBuf>,

        /// Output directory
        #[arg(short, long, default_value = "output")]
        output_dir: PathBuf,
    },

    /// Load and check a dispatch list
    Roster {
        /// Dispatch list CSV
        path: PathBuf,
    },

    /// Show mailing info for one school as JSON
    Mailing {
        /// RRED school id
        school_id: String,

        /// Dispatch list CSV
        #[arg(short, long)]
        roster: PathBuf,
    },

    /// Summarise one school from a written masterfile as JSON
    Summary {
        /// Masterfile CSV
        masterfile: PathBuf,

        /// RRED school id
        #[arg(short, long)]
        school: String,

        /// Reporting year start
        #[arg(short, long)]
        year: i32,
    },

    /// Write the report tables for one school
    Tables {
        /// Masterfile CSV
        masterfile: PathBuf,

        /// RRED school id
        #[arg(short, long)]
        school: String,

        /// Reporting year start
        #[arg(short, long)]
        year: i32,

        /// Output directory
        #[arg(short, long, default_value = "tables")]
        output_dir: PathBuf,
    },
}

fn main() {
    // Load .env file (if present)
    dotenvy::dotenv().ok();
    init_logging();

    let cli = Cli::parse();

    let result = match cli.command {
        Commands::Extract {
            year,
            config,
            output_dir,
        } => cmd_extract(year, config, &output_dir),

        Commands::Roster { path } => cmd_roster(&path),

        Commands::Mailing { school_id, roster } => cmd_mailing(&school_id, &roster),

        Commands::Summary {
            masterfile,
            school,
            year,
        } => cmd_summary(&masterfile, &school, year),

        Commands::Tables {
            masterfile,
            school,
            year,
            output_dir,
        } => cmd_tables(&masterfile, &school, year, &output_dir),
    };

    if let Err(e) = result {
        eprintln!("✗ Error: {}", e);
        std::process::exit(1);
    }
}

fn config_path(explicit: Option<PathBuf>) -> PathBuf {
    explicit
        .or_else(|| env::var_os(CONFIG_ENV_VAR).map(PathBuf::from))
        .unwrap_or_else(|| PathBuf::from(DEFAULT_CONFIG))
}

fn cmd_extract(
    year: i32,
    config: Option<PathBuf>,
    output_dir: &Path,
) -> Result<(), Box<dyn std::error::Error>> {
    let path = config_path(config);
    eprintln!("Config: {}", path.display());

    let config = ConfigFile::load(&path)?;
    let plan = config.plan_for_year(year)?;
    let summary = run_year(&plan, &config.settings, output_dir)?;

    eprintln!(
        "\nMasterfile: {} ({} rows)",
        summary.masterfile_path.display(),
        summary.rows
    );
    match &summary.issues_path {
        Some(path) => eprintln!(
            "Issues: {} categories written to {}",
            summary.issues.len(),
            path.display()
        ),
        None => eprintln!("Issues: none"),
    }
    Ok(())
}

fn cmd_roster(path: &Path) -> Result<(), Box<dyn std::error::Error>> {
    eprintln!("Reading dispatch list: {}", path.display());

    let roster = Roster::load(path, &PipelineConfig::default().roster)?;
    eprintln!("   Rows: {}", roster.entries().len());
    eprintln!("✓ {} schools, one name each", roster.school_count());
    Ok(())
}

fn cmd_mailing(school_id: &str, roster: &Path) -> Result<(), Box<dyn std::error::Error>> {
    let roster = Roster::load(roster, &PipelineConfig::default().roster)?;
    let info = roster.mailing_info(school_id)?;
    println!("{}", serde_json::to_string_pretty(&info)?);
    Ok(())
}

fn load_masterfile(path: &Path) -> Result<Masterfile, Box<dyn std::error::Error>> {
    let table = read_table(path)?;
    Ok(Masterfile::from_table(&table)?)
}

fn window_for(year: i32) -> Result<ReportingWindow, Box<dyn std::error::Error>> {
    ReportingWindow::for_year(year)
        .ok_or_else(|| format!("Invalid reporting year: {}", year).into())
}

fn cmd_summary(
    masterfile: &Path,
    school: &str,
    year: i32,
) -> Result<(), Box<dyn std::error::Error>> {
    let masterfile = load_masterfile(masterfile)?;
    let window = window_for(year)?;
    let leader_prefix = PipelineConfig::default().teacher_leader_prefix;

    let summary = SchoolSummary::for_school(&masterfile, school, &window, &leader_prefix);
    println!("{}", serde_json::to_string_pretty(&summary)?);
    Ok(())
}

fn cmd_tables(
    masterfile: &Path,
    school: &str,
    year: i32,
    output_dir: &Path,
) -> Result<(), Box<dyn std::error::Error>> {
    let masterfile = load_masterfile(masterfile)?;
    let window = window_for(year)?;
    let leader_prefix = PipelineConfig::default().teacher_leader_prefix;
    let school_rows = school_filter(&masterfile, school, &leader_prefix);

    if school_rows.is_empty() {
        return Err(format!("No masterfile rows for school {}", school).into());
    }

    for (i, table) in ReportTable::ALL.iter().enumerate() {
        let rows = table.build(&school_rows, &window);
        let path = output_dir.join(format!("{}_table_{}.csv", school, i + 1));
        write_table_file(&path, &rows)?;
        eprintln!("   {:?}: {} rows → {}", table, rows.len(), path.display());
    }
    Ok(())
}
