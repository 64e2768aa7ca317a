#![cfg_attr(feature = "fail-on-warnings", deny(warnings))]
#![warn(clippy::all, clippy::pedantic, clippy::nursery, clippy::cargo)]
#![allow(clippy::multiple_crate_versions, clippy::cargo_common_metadata)]

//! CLI entry point for the waymark geocoder.
//!
//! Loads a TOML index configuration (or the bundled demo indexes) and
//! prints each result as a JSON `FeatureCollection`. A query may be text,
//! `lon,lat` or `<type>.<id>`.

use std::path::PathBuf;
use std::process::ExitCode;

use clap::{Args, Parser, Subcommand};
use waymark_geocoder::Geocoder;
use waymark_geocoder_models::QueryOptions;

#[derive(Parser)]
#[command(name = "waymark", about = "Forward, reverse and id geocoding")]
struct Cli {
    /// Index configuration; the bundled demo indexes are used if omitted
    #[arg(long, global = true)]
    config: Option<PathBuf>,
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Geocode one or more queries
    Geocode {
        /// Text, `lon,lat` or `<type>.<id>`
        #[arg(required = true, allow_hyphen_values = true)]
        queries: Vec<String>,
        #[command(flatten)]
        options: OptionArgs,
        /// Print compact JSON
        #[arg(long)]
        compact: bool,
    },
    /// List the configured indexes
    Indexes,
}

#[derive(Args)]
struct OptionArgs {
    /// Bias results toward `lon,lat`
    #[arg(long, value_delimiter = ',', allow_hyphen_values = true)]
    proximity: Option<Vec<f64>>,
    /// Only return these types (e.g. `place,poi.landmark`)
    #[arg(long, value_delimiter = ',')]
    types: Option<Vec<String>>,
    /// Only return features from these stacks
    #[arg(long, value_delimiter = ',')]
    stacks: Option<Vec<String>>,
    /// Comma-separated output languages, first is primary
    #[arg(long)]
    language: Option<String>,
    /// Language mode (`strict`)
    #[arg(long)]
    language_mode: Option<String>,
    /// Only return features inside `minX,minY,maxX,maxY`
    #[arg(long, value_delimiter = ',', allow_hyphen_values = true)]
    bbox: Option<Vec<f64>>,
    /// Maximum results
    #[arg(long)]
    limit: Option<usize>,
    /// Maximum verified contexts
    #[arg(long)]
    limit_verify: Option<usize>,
    /// Keep results with duplicate place names
    #[arg(long)]
    allow_dupes: bool,
    /// Include debug output
    #[arg(long)]
    debug: bool,
    /// Include per-stage timings
    #[arg(long)]
    stats: bool,
    /// Include the ids of contributing indexes
    #[arg(long)]
    indexes: bool,
    /// Disable prefix matching of the last word
    #[arg(long)]
    no_autocomplete: bool,
    /// Disable single-edit fuzzy matching
    #[arg(long)]
    no_fuzzy: bool,
    /// Reverse mode (`distance` or `score`)
    #[arg(long)]
    reverse_mode: Option<String>,
    /// Include routable points
    #[arg(long)]
    routing: bool,
    /// Clip boxes that wrap the antimeridian
    #[arg(long)]
    clip_bbox: bool,
}

impl OptionArgs {
    fn into_query_options(self) -> QueryOptions {
        QueryOptions {
            proximity: self.proximity,
            types: self.types,
            stacks: self.stacks,
            language: self.language,
            language_mode: self.language_mode,
            bbox: self.bbox,
            limit: self.limit,
            limit_verify: self.limit_verify,
            allow_dupes: self.allow_dupes,
            debug: self.debug,
            stats: self.stats,
            indexes: self.indexes,
            autocomplete: self.no_autocomplete.then_some(false),
            fuzzy_match: self.no_fuzzy.then_some(false),
            reverse_mode: self.reverse_mode,
            routing: self.routing,
            clip_bbox: self.clip_bbox,
        }
    }
}

fn load(config: Option<&PathBuf>) -> Result<Geocoder, waymark_geocoder::ConfigError> {
    config.map_or_else(Geocoder::demo, |path| {
        log::info!("Loading indexes from {}", path.display());
        Geocoder::load(path)
    })
}

#[tokio::main]
async fn main() -> ExitCode {
    pretty_env_logger::init();
    let cli = Cli::parse();

    let geocoder = match load(cli.config.as_ref()) {
        Ok(geocoder) => geocoder,
        Err(e) => {
            eprintln!("{e}");
            return ExitCode::FAILURE;
        }
    };

    match cli.command {
        Commands::Indexes => {
            println!("{:<4} {:<16} {:<12} {:>4}  TYPES", "IDX", "ID", "NAME", "ZOOM");
            println!("{}", "-".repeat(60));
            for index in geocoder.indexes().iter() {
                println!(
                    "{:<4} {:<16} {:<12} {:>4}  {}",
                    index.idx,
                    index.config.id,
                    index.name,
                    index.config.zoom,
                    index.types.join(", ")
                );
            }
            ExitCode::SUCCESS
        }
        Commands::Geocode {
            queries,
            options,
            compact,
        } => {
            let options = options.into_query_options();
            let mut status = ExitCode::SUCCESS;
            for query in &queries {
                match geocoder.geocode(query, &options).await {
                    Ok(collection) => {
                        let json = if compact {
                            serde_json::to_string(&collection)
                        } else {
                            serde_json::to_string_pretty(&collection)
                        };
                        match json {
                            Ok(json) => println!("{json}"),
                            Err(e) => {
                                eprintln!("{query}: {e}");
                                status = ExitCode::FAILURE;
                            }
                        }
                    }
                    Err(e) => {
                        eprintln!("{query}: [{}] {e}", e.code());
                        status = ExitCode::FAILURE;
                    }
                }
            }
            status
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_reverse_queries_and_negative_coordinates() {
        let cli = Cli::try_parse_from([
            "waymark",
            "geocode",
            "--proximity",
            "-71.0,42.2",
            "--types",
            "place,poi",
            "--no-fuzzy",
            "-71.0022,42.251",
        ])
        .unwrap();
        let Commands::Geocode {
            queries, options, ..
        } = cli.command
        else {
            panic!("expected geocode");
        };
        assert_eq!(queries, ["-71.0022,42.251"]);

        let options = options.into_query_options();
        assert_eq!(options.proximity, Some(vec![-71.0, 42.2]));
        assert_eq!(options.types, Some(vec!["place".to_string(), "poi".to_string()]));
        assert_eq!(options.fuzzy_match, Some(false));
        assert_eq!(options.autocomplete, None);
    }
}
