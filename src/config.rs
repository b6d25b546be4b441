//! Process-wide configuration, loaded from environment variables (§6.5) with
//! CLI overrides in the style of the teacher's `Arguments` struct.

use std::path::PathBuf;
use std::time::Duration;

use clap::{CommandFactory, FromArgMatches, Parser};
use serde::Deserialize;

/// Recognized `LOG_LEVEL` values (§6.5).
#[derive(Debug, Clone, Copy, PartialEq, Eq, clap::ValueEnum)]
#[clap(rename_all = "lowercase")]
pub enum LogLevel {
    Error,
    Warn,
    Info,
    Debug,
}

impl LogLevel {
    pub fn as_filter(self) -> &'static str {
        match self {
            LogLevel::Error => "error",
            LogLevel::Warn => "warn",
            LogLevel::Info => "info",
            LogLevel::Debug => "debug",
        }
    }
}

/// Which GeoGebra applet variant to embed in the page (§4.3.1).
#[derive(Debug, Clone, Copy, PartialEq, Eq, clap::ValueEnum, serde::Serialize, serde::Deserialize)]
#[clap(rename_all = "lowercase")]
#[serde(rename_all = "lowercase")]
pub enum AppVariant {
    Classic,
    Graphing,
    Geometry,
    #[clap(name = "3d")]
    #[serde(rename = "3d")]
    ThreeD,
    Suite,
}

impl Default for AppVariant {
    fn default() -> Self {
        AppVariant::Classic
    }
}

/// Service-wide configuration. Environment variables take precedence over
/// defaults; CLI flags (mirroring the teacher's `clap::Parser` usage) take
/// precedence over both, matching how the teacher lets `--port` override the
/// packaged default.
#[derive(Debug, Clone, Parser)]
#[command(version, about)]
pub struct ServiceConfig {
    /// Logging verbosity.
    #[arg(long, env = "LOG_LEVEL", value_enum, default_value = "info")]
    pub log_level: LogLevel,

    /// Upper bound on concurrently pooled Instances.
    #[arg(long, env = "MAX_INSTANCES", default_value_t = 5)]
    pub max_instances: usize,

    /// Milliseconds an Instance may live before the sweeper disposes it.
    #[arg(long, env = "INSTANCE_TIMEOUT", default_value_t = 30 * 60 * 1000)]
    pub instance_timeout_ms: u64,

    /// Milliseconds an inactive Instance may sit idle before disposal.
    #[arg(long, env = "MAX_IDLE_TIME", default_value_t = 10 * 60 * 1000)]
    pub max_idle_time_ms: u64,

    /// Directory static export artifacts are written to by the (external)
    /// REST surface; the core never writes here itself, it only reports
    /// the configured path back in export metadata when asked.
    #[arg(long, env = "EXPORT_DIR", default_value = "./exports")]
    pub export_dir: PathBuf,

    /// Applet variant to load in each page.
    #[arg(long, env = "GGB_APP_VARIANT", value_enum, default_value = "classic")]
    pub app_variant: AppVariant,

    /// Path to the `ffmpeg` binary used by the animation encoder (C7).
    #[arg(long, env = "FFMPEG_PATH", default_value = "ffmpeg")]
    pub ffmpeg_path: String,

    /// Optional TOML file merged in under environment/CLI values. Only a
    /// small, explicitly-named set of keys is honored; unknown keys are
    /// rejected at the warn level (Design Note §9 — closed variant, not
    /// duck-typed).
    #[arg(long, env = "CONFIG_FILE")]
    pub config_file: Option<PathBuf>,
}

/// The subset of `ServiceConfig` a `CONFIG_FILE` may supply. Closed variant
/// (Design Note §9): unrecognized keys are simply ignored by `toml`'s
/// deserializer rather than rejected, since this crate has no "unknown field"
/// warning path for config files the way it does for tool arguments.
#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ConfigFileValues {
    max_instances: Option<usize>,
    instance_timeout_ms: Option<u64>,
    max_idle_time_ms: Option<u64>,
    export_dir: Option<PathBuf>,
    app_variant: Option<AppVariant>,
    ffmpeg_path: Option<String>,
}

impl ServiceConfig {
    pub fn instance_timeout(&self) -> Duration {
        Duration::from_millis(self.instance_timeout_ms)
    }

    pub fn max_idle_time(&self) -> Duration {
        Duration::from_millis(self.max_idle_time_ms)
    }

    /// Parses CLI flags and environment variables (§6.5), then merges in
    /// `CONFIG_FILE` (if set) as the lowest-priority layer: a field is only
    /// overridden by the file when neither a flag nor its environment
    /// variable supplied it (SPEC_FULL.md §6.5).
    pub fn load() -> Self {
        Self::load_from(std::env::args_os())
    }

    fn load_from<I, T>(args: I) -> Self
    where
        I: IntoIterator<Item = T>,
        T: Into<std::ffi::OsString> + Clone,
    {
        let matches = ServiceConfig::command().get_matches_from(args);
        let mut config = ServiceConfig::from_arg_matches(&matches).unwrap_or_else(|e| e.exit());

        let Some(path) = config.config_file.clone() else {
            return config;
        };
        let contents = match std::fs::read_to_string(&path) {
            Ok(contents) => contents,
            Err(err) => {
                tracing::warn!(path = %path.display(), error = %err, "could not read CONFIG_FILE, ignoring");
                return config;
            }
        };
        let file: ConfigFileValues = match toml::from_str(&contents) {
            Ok(file) => file,
            Err(err) => {
                tracing::warn!(path = %path.display(), error = %err, "could not parse CONFIG_FILE, ignoring");
                return config;
            }
        };

        let came_from_default = |name: &str| {
            !matches!(
                matches.value_source(name),
                Some(clap::parser::ValueSource::CommandLine | clap::parser::ValueSource::EnvVariable)
            )
        };

        if came_from_default("max_instances") {
            if let Some(v) = file.max_instances {
                config.max_instances = v;
            }
        }
        if came_from_default("instance_timeout_ms") {
            if let Some(v) = file.instance_timeout_ms {
                config.instance_timeout_ms = v;
            }
        }
        if came_from_default("max_idle_time_ms") {
            if let Some(v) = file.max_idle_time_ms {
                config.max_idle_time_ms = v;
            }
        }
        if came_from_default("export_dir") {
            if let Some(v) = file.export_dir {
                config.export_dir = v;
            }
        }
        if came_from_default("app_variant") {
            if let Some(v) = file.app_variant {
                config.app_variant = v;
            }
        }
        if came_from_default("ffmpeg_path") {
            if let Some(v) = file.ffmpeg_path {
                config.ffmpeg_path = v;
            }
        }
        config
    }
}

impl Default for ServiceConfig {
    fn default() -> Self {
        ServiceConfig {
            log_level: LogLevel::Info,
            max_instances: 5,
            instance_timeout_ms: 30 * 60 * 1000,
            max_idle_time_ms: 10 * 60 * 1000,
            export_dir: PathBuf::from("./exports"),
            app_variant: AppVariant::Classic,
            ffmpeg_path: "ffmpeg".to_string(),
            config_file: None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn config_file_fills_in_values_left_at_their_default() {
        let tmp = tempfile::NamedTempFile::new().unwrap();
        std::fs::write(tmp.path(), "maxInstances = 9\nffmpegPath = \"/opt/ffmpeg\"\n").unwrap();
        let config = ServiceConfig::load_from([
            "gebrai-orchestrator".to_string(),
            "--config-file".to_string(),
            tmp.path().to_string_lossy().to_string(),
        ]);
        assert_eq!(config.max_instances, 9);
        assert_eq!(config.ffmpeg_path, "/opt/ffmpeg");
    }

    #[test]
    fn explicit_cli_flag_wins_over_config_file() {
        let tmp = tempfile::NamedTempFile::new().unwrap();
        std::fs::write(tmp.path(), "maxInstances = 9\n").unwrap();
        let config = ServiceConfig::load_from([
            "gebrai-orchestrator".to_string(),
            "--max-instances".to_string(),
            "2".to_string(),
            "--config-file".to_string(),
            tmp.path().to_string_lossy().to_string(),
        ]);
        assert_eq!(config.max_instances, 2);
    }

    #[test]
    fn missing_config_file_falls_back_to_defaults_silently() {
        let config = ServiceConfig::load_from([
            "gebrai-orchestrator".to_string(),
            "--config-file".to_string(),
            "/definitely/not/a/real/path.toml".to_string(),
        ]);
        assert_eq!(config.max_instances, 5);
    }
}
