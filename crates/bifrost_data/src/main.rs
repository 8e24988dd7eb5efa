use std::path::{Path, PathBuf};

use anyhow::{Result, bail};
use bifrost_data_core::config::{HarvestConfig, load_config};
use bifrost_data_core::reagents::{ConversionReport, convert_reagents_file};
use bifrost_data_core::redirects::fetch_redirects;
use bifrost_data_core::runtime::{
    DATA_DIR_NAME, PathOverrides, REAGENTS_OUTPUT_FILENAME, REAGENTS_SOURCE_FILENAME,
    ResolutionContext, ResolvedPaths, resolve_paths,
};
use clap::{Args, CommandFactory, Parser, Subcommand};
use tracing::info;

#[derive(Debug, Parser)]
#[command(
    name = "bifrost-data",
    version,
    about = "Offline data preparation tools for the Bifrost API"
)]
struct Cli {
    #[arg(long, global = true, value_name = "PATH")]
    project_root: Option<PathBuf>,
    #[arg(long, global = true, value_name = "PATH")]
    config: Option<PathBuf>,
    #[arg(long, global = true, help = "Print resolved runtime diagnostics to stderr")]
    diagnostics: bool,
    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Debug, Clone)]
struct RuntimeOptions {
    project_root: Option<PathBuf>,
    config: Option<PathBuf>,
    diagnostics: bool,
}

impl RuntimeOptions {
    fn from_cli(cli: &Cli) -> Self {
        Self {
            project_root: cli.project_root.clone(),
            config: cli.config.clone(),
            diagnostics: cli.diagnostics,
        }
    }
}

#[derive(Debug, Subcommand)]
enum Commands {
    #[command(
        name = "convert-reagents",
        about = "Convert the upstream reagent dataset to the 0-indexed array layout"
    )]
    ConvertReagents(ConvertReagentsArgs),
    #[command(
        name = "fetch-redirects",
        about = "Harvest wiki redirects and print target -> aliases JSON to stdout"
    )]
    FetchRedirects,
}

#[derive(Debug, Args)]
struct ConvertReagentsArgs {
    #[arg(value_name = "INPUT", help = "Source dataset (default: data/reagents.orig.json)")]
    input: Option<PathBuf>,
    #[arg(value_name = "OUTPUT", help = "Converted dataset (default: data/reagents.json)")]
    output: Option<PathBuf>,
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    let runtime = RuntimeOptions::from_cli(&cli);
    bifrost_data_core::init_tracing();

    match cli.command {
        Some(Commands::ConvertReagents(args)) => run_convert_reagents(&runtime, args),
        Some(Commands::FetchRedirects) => run_fetch_redirects(&runtime),
        None => {
            let mut command = Cli::command();
            command.print_help()?;
            println!();
            Ok(())
        }
    }
}

fn run_convert_reagents(runtime: &RuntimeOptions, args: ConvertReagentsArgs) -> Result<()> {
    let (context, paths) = resolve_runtime_paths(runtime)?;
    let input = args
        .input
        .map(|path| paths.user_path(&path, &context))
        .unwrap_or_else(|| paths.reagents_source_path.clone());
    let output = args
        .output
        .map(|path| paths.user_path(&path, &context))
        .unwrap_or_else(|| paths.reagents_output_path.clone());

    if !input.exists() {
        bail!(
            "Input file not found: {}\n\n{}",
            normalize_path(&input),
            convert_usage()
        );
    }

    let report = convert_reagents_file(&input, &output)?;
    print_conversion_report(&input, &output, &report);
    Ok(())
}

fn run_fetch_redirects(runtime: &RuntimeOptions) -> Result<()> {
    let (_, paths) = resolve_runtime_paths(runtime)?;
    let config = load_config(&paths.config_path)?;
    let harvest_config = HarvestConfig::from_config(&config)?;

    info!("PsychonautWiki redirect fetcher");
    info!("api_url: {}", harvest_config.api_url);

    let document = fetch_redirects(&harvest_config)?;
    println!("{}", document.render()?);

    info!("done");
    Ok(())
}

fn print_conversion_report(input: &Path, output: &Path, report: &ConversionReport) {
    println!("convert reagents");
    println!("input: {}", normalize_path(input));
    println!("source.colors: {}", report.source.colors);
    println!("source.reagents: {}", report.source.reagents);
    println!("source.substances: {}", report.source.substances);
    println!("source.results: {}", report.source.results);
    println!("output: {}", normalize_path(output));
    println!(
        "output.colors: {} (ids {})",
        report.output.colors,
        id_range(report.output.colors)
    );
    println!(
        "output.reagents: {} (ids {})",
        report.output.reagents,
        id_range(report.output.reagents)
    );
    println!("output.substances: {}", report.output.substances);
    println!(
        "output.results: {} substances x {} reagents",
        report.output.results, report.source.reagents
    );
    println!("dropped_result_cells: {}", report.dropped_result_cells);
}

fn convert_usage() -> String {
    format!(
        "Usage: bifrost-data convert-reagents [INPUT] [OUTPUT]\n  Default input:  {DATA_DIR_NAME}/{REAGENTS_SOURCE_FILENAME}\n  Default output: {DATA_DIR_NAME}/{REAGENTS_OUTPUT_FILENAME}"
    )
}

fn id_range(count: usize) -> String {
    match count {
        0 => "none".to_string(),
        count => format!("0-{}", count - 1),
    }
}

fn resolve_runtime_paths(runtime: &RuntimeOptions) -> Result<(ResolutionContext, ResolvedPaths)> {
    dotenvy::dotenv().ok();

    let context = ResolutionContext::from_process()?;
    let overrides = PathOverrides {
        project_root: runtime.project_root.clone(),
        config: runtime.config.clone(),
    };

    let initial = resolve_paths(&context, &overrides)?;
    let project_env = initial.project_root.join(".env");
    if project_env.exists() {
        let _ = dotenvy::from_path_override(&project_env);
    }

    let paths = resolve_paths(&context, &overrides)?;
    if runtime.diagnostics {
        eprintln!("[diagnostics]\n{}", paths.diagnostics());
    }
    Ok((context, paths))
}

fn normalize_path(path: &Path) -> String {
    path.to_string_lossy().replace('\\', "/")
}
