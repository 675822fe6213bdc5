//! Perfect Map command line
//!
//! Generates C lookup functions and the headers built from them. Generated
//! text goes to stdout unless `--output` is given; diagnostics go to stderr.

use anyhow::Context;
use clap::{Arg, ArgMatches, Command};
use perfect_map::consumers::{render_enum_maps, render_log_table, scan, EmittedNames, MapSpec};
use perfect_map::core::{logging, Config};
use perfect_map::map::solver::keyword_document;
use perfect_map::{generate, GperfSolver, Result};
use std::io::Write;
use tracing::{debug, info};

fn main() -> anyhow::Result<()> {
    let matches = cli().get_matches();

    // Load configuration
    let mut config = if let Some(config_path) = matches.get_one::<String>("config") {
        Config::from_file(config_path)?
    } else {
        Config::load()?
    };

    // Apply CLI overrides
    apply_cli_overrides(&mut config, &matches)?;

    logging::init(&config.logging);
    debug!("Starting {} v{}", perfect_map::NAME, perfect_map::VERSION);

    let solver = GperfSolver::new(config.solver.clone());

    let (text, output) = match matches.subcommand() {
        Some(("map", sub)) => {
            let spec = read_spec(sub)?;
            let set = spec.training_set()?;
            let map = generate(
                &spec.name,
                &set,
                &solver,
                &spec.options(config.output.header_comments),
            )?;
            (map.into_text(), sub.get_one::<String>("output"))
        }
        Some(("keywords", sub)) => {
            let spec = read_spec(sub)?;
            let set = spec.training_set()?;
            (keyword_document(&set), None)
        }
        Some(("enum-maps", sub)) => {
            let mut src = String::new();
            for header in sub.get_many::<String>("headers").into_iter().flatten() {
                let text = std::fs::read_to_string(header)
                    .with_context(|| format!("Failed to read header {}", header))?;
                src.push_str(&text);
                src.push('\n');
            }
            let decls = scan(&src);
            info!(enums = decls.len(), "Enums scanned");
            let mut emitted = EmittedNames::new();
            let text = render_enum_maps(&decls, &solver, &config.enum_maps, &mut emitted)?;
            (text, sub.get_one::<String>("output"))
        }
        Some(("log-table", sub)) => {
            let header = sub
                .get_one::<String>("header")
                .context("--header is required")?;
            let src = std::fs::read_to_string(header)
                .with_context(|| format!("Failed to read header {}", header))?;
            let text = render_log_table(
                &src,
                &solver,
                &config.log_table,
                config.output.header_comments,
            )?;
            (text, sub.get_one::<String>("output"))
        }
        _ => anyhow::bail!("No subcommand given; see --help"),
    };

    write_output(output.map(String::as_str), &text)
}

fn cli() -> Command {
    let spec_arg = Arg::new("spec")
        .long("spec")
        .value_name("FILE")
        .required(true)
        .help("Map spec file (TOML, or JSON when the name ends in .json)");
    let output_arg = Arg::new("output")
        .short('o')
        .long("output")
        .value_name("FILE")
        .help("Write generated text to FILE instead of stdout");

    Command::new("perfect-map")
        .version(perfect_map::VERSION)
        .about("Build-time perfect-hash lookup generator for C.")
        .subcommand_required(true)
        .arg(
            Arg::new("config")
                .short('c')
                .long("config")
                .value_name("FILE")
                .global(true)
                .help("Configuration file path")
        )
        .arg(
            Arg::new("solver")
                .long("solver")
                .value_name("PROGRAM")
                .global(true)
                .help("Perfect-hash solver executable")
        )
        .arg(
            Arg::new("log-level")
                .long("log-level")
                .value_name("LEVEL")
                .global(true)
                .help("Log level (trace, debug, info, warn, error)")
        )
        .subcommand(
            Command::new("map")
                .about("Generate one lookup function from a map spec")
                .arg(spec_arg.clone())
                .arg(output_arg.clone()),
        )
        .subcommand(
            Command::new("keywords")
                .about("Print the solver keyword document for a map spec")
                .arg(spec_arg),
        )
        .subcommand(
            Command::new("enum-maps")
                .about("Generate enum value to label maps from preprocessed headers")
                .arg(
                    Arg::new("headers")
                        .value_name("HEADER")
                        .required(true)
                        .num_args(1..)
                        .help("Preprocessed C header text"),
                )
                .arg(output_arg.clone()),
        )
        .subcommand(
            Command::new("log-table")
                .about("Generate the logging key/value staging table")
                .arg(
                    Arg::new("header")
                        .long("header")
                        .value_name("FILE")
                        .required(true)
                        .help("Preprocessed header declaring the standard log keys"),
                )
                .arg(output_arg),
        )
}

/// Apply command line argument overrides to configuration
fn apply_cli_overrides(config: &mut Config, matches: &ArgMatches) -> Result<()> {
    if let Some(program) = matches.get_one::<String>("solver") {
        config.solver.program = program.clone();
    }

    if let Some(level) = matches.get_one::<String>("log-level") {
        config.logging.level = level.clone();
    }

    config.validate()
}

fn read_spec(matches: &ArgMatches) -> anyhow::Result<MapSpec> {
    let path = matches
        .get_one::<String>("spec")
        .context("--spec is required")?;
    MapSpec::from_path(path).with_context(|| format!("Failed to load map spec {}", path))
}

fn write_output(path: Option<&str>, text: &str) -> anyhow::Result<()> {
    match path {
        Some(path) => {
            std::fs::write(path, text).with_context(|| format!("Failed to write {}", path))?;
            info!(path, "Output written");
        }
        None => {
            let mut stdout = std::io::stdout().lock();
            stdout.write_all(text.as_bytes())?;
            stdout.flush()?;
        }
    }
    Ok(())
}
