use std::path::PathBuf;

use clap::Parser;
use serde::{Deserialize, Serialize};

/// Command-line surface. Everything here is optional: values merge over
/// environment variables and the config file, and defaults fill the rest
/// (see [`crate::config::ConfigBuilder`]).
#[derive(Parser, Clone, Debug, Serialize, Deserialize, Default)]
#[command(name = "vertex-hub", version, about = "Vertex Integration Hub server")]
pub struct CliArgs {
    /// Home directory to look for vertex.toml in (overrides discovery)
    #[arg(long)]
    #[serde(skip_serializing_if = "Option::is_none")]
    pub home: Option<PathBuf>,

    /// Path to a dotenv file loaded before anything else
    #[arg(long)]
    #[serde(skip_serializing_if = "Option::is_none")]
    pub dotenv: Option<PathBuf>,

    /// Port to bind the API server to
    #[arg(long)]
    #[serde(skip_serializing_if = "Option::is_none")]
    pub port: Option<u32>,

    /// Host to bind the API server to
    #[arg(long)]
    #[serde(skip_serializing_if = "Option::is_none")]
    pub host: Option<String>,

    /// Directory for internal data files (artifacts land under it)
    #[arg(long)]
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<PathBuf>,

    /// Tracing directives, comma separated (e.g. info,vertex_hub=debug)
    #[arg(long, value_delimiter = ',')]
    #[serde(skip_serializing_if = "Option::is_none")]
    pub log_level: Option<Vec<String>>,

    /// OTLP collector endpoint for traces
    #[arg(long)]
    #[serde(skip_serializing_if = "Option::is_none")]
    pub jaeger: Option<String>,

    /// OTLP collector endpoint for metrics
    #[arg(long)]
    #[serde(skip_serializing_if = "Option::is_none")]
    pub prometheus: Option<String>,
}

impl CliArgs {
    pub const ENV_VAR_PREFIX: &'static str = "VERTEX";
}
