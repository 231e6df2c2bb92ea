use std::collections::HashMap;
use std::path::PathBuf;

use anyhow::{anyhow, bail, Result};
use figment::{providers::Format, Figment};
use serde::{Deserialize, Serialize};
use vertex_types::Role;

use crate::args::CliArgs;

/// Runtime configuration, fully resolved. [`ConfigBuilder`] assembles it
/// by layering cli args over `VERTEX_*` env vars over `vertex.toml`,
/// with [`Config::default`] filling whatever none of them set.
#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct Config {
    /// The port to bind the server to.
    /// Default is `8000`
    pub port: u32,
    /// The host to bind the server to
    /// Default is `localhost`
    pub host: String,
    /// The log-level to use, in the format of [tracing directives](https://docs.rs/tracing-subscriber/latest/tracing_subscriber/filter/struct.EnvFilter.html#directives).
    /// Default is `["info"]`
    pub log_level: Vec<String>,
    /// The directory to store all internal data files
    /// Default is `/var/vertex`
    pub data: PathBuf,
    /// The allowed cors origins
    /// Default is empty
    pub cors_allowed_origins: Vec<String>,

    /// OTLP collector endpoint for traces (disabled when unset)
    pub jaeger: Option<String>,
    /// OTLP collector endpoint for metrics (disabled when unset)
    pub prometheus: Option<String>,

    /// Static bearer tokens and the identities they resolve to. An
    /// empty table leaves only the operational routes reachable.
    pub tokens: Vec<TokenEntry>,

    pub cache: CacheSettings,
    pub connectors: ConnectorSettings,
    pub webhooks: WebhookSettings,
    pub notifications: NotificationSettings,
    pub events: EventSettings,
    pub reports: ReportSettings,
}

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct TokenEntry {
    pub token: String,
    pub user: String,
    #[serde(default)]
    pub organization: Option<String>,
    pub role: Role,
}

#[derive(Debug, Serialize, Deserialize, Clone)]
#[serde(default)]
pub struct CacheSettings {
    pub enabled: bool,
    pub tier1_size: usize,
    pub default_ttl_secs: u64,
}

impl Default for CacheSettings {
    fn default() -> Self {
        Self {
            enabled: true,
            tier1_size: 1024,
            default_ttl_secs: 300,
        }
    }
}

#[derive(Debug, Serialize, Deserialize, Clone)]
#[serde(default)]
pub struct ConnectorSettings {
    pub max_instances: usize,
    pub idle_ttl_secs: u64,
    pub operation_timeout_secs: u64,
}

impl Default for ConnectorSettings {
    fn default() -> Self {
        Self {
            max_instances: 64,
            idle_ttl_secs: 900,
            operation_timeout_secs: 10,
        }
    }
}

#[derive(Debug, Serialize, Deserialize, Clone)]
#[serde(default)]
pub struct WebhookSettings {
    pub workers: usize,
    pub poll_interval_ms: u64,
    pub request_timeout_secs: u64,
    pub rate_limit_per_minute: usize,
    pub max_payload_bytes: usize,
}

impl Default for WebhookSettings {
    fn default() -> Self {
        Self {
            workers: 4,
            poll_interval_ms: 250,
            request_timeout_secs: 10,
            rate_limit_per_minute: 60,
            max_payload_bytes: 1024 * 1024,
        }
    }
}

#[derive(Debug, Serialize, Deserialize, Clone)]
#[serde(default)]
pub struct NotificationSettings {
    pub workers: usize,
    pub send_timeout_secs: u64,
    pub max_attempts: u32,
    pub retry_base_delay_ms: u64,
    pub retry_max_delay_ms: u64,
    pub min_send_interval_ms: u64,
    /// Gateway URL per channel name; channels without one log instead
    pub gateways: HashMap<String, String>,
}

impl Default for NotificationSettings {
    fn default() -> Self {
        Self {
            workers: 2,
            send_timeout_secs: 10,
            max_attempts: 3,
            retry_base_delay_ms: 1_000,
            retry_max_delay_ms: 60_000,
            min_send_interval_ms: 0,
            gateways: HashMap::new(),
        }
    }
}

#[derive(Debug, Serialize, Deserialize, Clone)]
#[serde(default)]
pub struct EventSettings {
    pub queue_depth: usize,
    pub publish_block_ms: u64,
}

impl Default for EventSettings {
    fn default() -> Self {
        Self {
            queue_depth: 256,
            publish_block_ms: 50,
        }
    }
}

#[derive(Debug, Serialize, Deserialize, Clone)]
#[serde(default)]
pub struct ReportSettings {
    pub workers: usize,
    pub tick_secs: u64,
    pub shutdown_grace_secs: u64,
    /// Artifact directory; defaults to `<data>/reports`
    pub output_dir: Option<PathBuf>,
}

impl Default for ReportSettings {
    fn default() -> Self {
        Self {
            workers: 2,
            tick_secs: 60,
            shutdown_grace_secs: 5,
            output_dir: None,
        }
    }
}

/// Default values for the config struct
/// these are only used to fill in holes after all the parsing and loading is done
impl Default for Config {
    fn default() -> Self {
        Self {
            port: 8000,
            host: "localhost".to_string(),
            log_level: vec!["info".to_string()],
            data: PathBuf::from("/var/vertex"),
            cors_allowed_origins: Vec::new(),
            jaeger: None,
            prometheus: None,
            tokens: Vec::new(),
            cache: CacheSettings::default(),
            connectors: ConnectorSettings::default(),
            webhooks: WebhookSettings::default(),
            notifications: NotificationSettings::default(),
            events: EventSettings::default(),
            reports: ReportSettings::default(),
        }
    }
}

impl Config {
    pub fn report_output_dir(&self) -> PathBuf {
        self.reports
            .output_dir
            .clone()
            .unwrap_or_else(|| self.data.join("reports"))
    }

    /// Folds the configured `log_level` directives into an env filter,
    /// on top of whatever `RUST_LOG` already set.
    pub fn tracing_env_filter(&self) -> Result<tracing_subscriber::EnvFilter> {
        self.log_level.iter().try_fold(
            tracing_subscriber::EnvFilter::from_default_env(),
            |filter, directive| {
                let parsed = directive
                    .parse()
                    .map_err(|e| anyhow!("bad log directive {}: {}", directive, e))?;
                Ok(filter.add_directive(parsed))
            },
        )
    }
}

/// Assembles a [`Config`] from its layered sources.
#[derive(Debug)]
pub struct ConfigBuilder {
    pub cli_args: CliArgs,
}

impl ConfigBuilder {
    pub const FILENAME: &'static str = "vertex.toml";
    pub const DIRNAME: &'static str = "vertex";
    pub const HIDDEN_DIRNAME: &'static str = ".vertex";

    pub fn new(cli_args: CliArgs) -> Self {
        Self { cli_args }
    }

    /// Argv layered over `VERTEX_*` env vars, so a flag given on the
    /// command line always wins but a deployment can pin settings
    /// without touching unit files.
    pub fn merged_args(&self) -> Result<CliArgs> {
        let prefix = format!("{}_", CliArgs::ENV_VAR_PREFIX);
        Ok(Figment::new()
            .merge(figment::providers::Env::prefixed(&prefix))
            .merge(figment::providers::Serialized::defaults(&self.cli_args))
            .extract()?)
    }

    pub fn build(self) -> Result<Config> {
        // a .env file may itself carry VERTEX_* overrides, so it loads
        // before the env pass
        let dotenv = self
            .cli_args
            .dotenv
            .clone()
            .unwrap_or(std::env::current_dir()?.join(".env"));
        if dotenv.exists() {
            dotenvy::from_path(&dotenv).map_err(|e| anyhow!("dotenv {:?}: {}", dotenv, e))?;
        }

        let args = self.merged_args()?;

        let mut sources = Figment::new();
        if let Some(file) = Self::config_file(&args)? {
            sources = sources.merge(figment::providers::Toml::file(file));
        }
        let config: Config = sources
            .merge(figment::providers::Serialized::defaults(args))
            .join(figment::providers::Serialized::defaults(Config::default()))
            .extract()?;

        // hand-written configs commonly use ~ in the data dir
        let data = shellexpand::tilde(&config.data.to_string_lossy())
            .into_owned()
            .into();
        Ok(Config { data, ..config })
    }

    /// Resolves the config file, if any. An explicit `--home` must
    /// contain one; otherwise discovery walks [`Self::candidates`] and
    /// is allowed to come up empty, leaving defaults in charge.
    fn config_file(args: &CliArgs) -> Result<Option<PathBuf>> {
        if let Some(home) = &args.home {
            let file = home.join(Self::FILENAME);
            if !file.exists() {
                bail!("No config file at {:?}", file);
            }
            return Ok(Some(file));
        }

        Ok(Self::candidates().into_iter().find(|file| file.exists()))
    }

    /// Discovery order for `vertex.toml`: the working directory, then
    /// `~/.vertex/`, the platform config dir and `$XDG_CONFIG_HOME`
    /// (which diverge on some systems), and finally `/etc/vertex/`.
    pub fn candidates() -> Vec<PathBuf> {
        let mut dirs: Vec<PathBuf> = Vec::new();
        dirs.extend(std::env::current_dir().ok());
        dirs.extend(dirs::home_dir().map(|home| home.join(Self::HIDDEN_DIRNAME)));
        dirs.extend(dirs::config_dir().map(|base| base.join(Self::DIRNAME)));
        dirs.extend(
            std::env::var_os("XDG_CONFIG_HOME")
                .map(|base| PathBuf::from(base).join(Self::DIRNAME)),
        );
        dirs.push(PathBuf::from("/etc").join(Self::DIRNAME));

        dirs.into_iter().map(|dir| dir.join(Self::FILENAME)).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_fill_everything() {
        let config = Config::default();
        assert_eq!(config.port, 8000);
        assert_eq!(config.webhooks.workers, 4);
        assert_eq!(config.notifications.max_attempts, 3);
        assert_eq!(config.events.queue_depth, 256);
        assert_eq!(config.reports.tick_secs, 60);
        assert_eq!(config.report_output_dir(), PathBuf::from("/var/vertex/reports"));
    }

    #[test]
    fn settings_sections_parse_partially() {
        // a partial section keeps defaults for the rest
        let settings: WebhookSettings = toml::from_str("workers = 8").unwrap();
        assert_eq!(settings.workers, 8);
        assert_eq!(settings.rate_limit_per_minute, 60);
    }

    #[test]
    fn tracing_filter_rejects_garbage() {
        let mut config = Config::default();
        config.log_level = vec!["not a directive!!!".to_string()];
        assert!(config.tracing_env_filter().is_err());
    }
}
