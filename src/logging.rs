//! Tracing/logging configuration for mcp402
//!
//! - Verbosity: default WARN, verbose INFO, debug DEBUG, quiet ERROR, silent off,
//!   or an explicit `--log-level`
//! - Pretty (colored), JSON or compact output on stderr
//! - Optional file log at DEBUG regardless of the terminal level

use std::path::PathBuf;
use std::sync::OnceLock;

use tracing::Level;
use tracing_subscriber::{
    fmt::{self, format::FmtSpan},
    layer::SubscriberExt,
    util::SubscriberInitExt,
    EnvFilter, Layer, Registry,
};

/// Log output format
#[derive(Clone, Debug, Default, PartialEq, Eq, clap::ValueEnum, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    /// Colored human-readable output
    #[default]
    Pretty,
    /// Structured JSON output (one JSON object per line)
    Json,
    /// Compact single-line format
    Compact,
}

/// Tracing configuration built from CLI args and the config file
#[derive(Debug, Clone, Default)]
pub struct TracingConfig {
    pub verbose: bool,
    pub debug: bool,
    pub quiet: bool,
    /// No terminal output at all
    pub silent: bool,
    /// Explicit level; wins over the verbosity flags
    pub level: Option<Level>,
    pub format: LogFormat,
    /// Optional log file (DEBUG+ regardless of terminal level)
    pub log_file: Option<PathBuf>,
}

impl TracingConfig {
    /// Level for terminal output, `None` when silent
    pub fn terminal_level(&self) -> Option<Level> {
        if self.silent {
            None
        } else if let Some(level) = self.level {
            Some(level)
        } else if self.quiet {
            Some(Level::ERROR)
        } else if self.debug {
            Some(Level::DEBUG)
        } else if self.verbose {
            Some(Level::INFO)
        } else {
            Some(Level::WARN)
        }
    }

    /// Whether any flag pinned the level (RUST_LOG is ignored then)
    fn level_pinned(&self) -> bool {
        self.level.is_some() || self.verbose || self.debug || self.quiet || self.silent
    }
}

static TRACING_INITIALIZED: OnceLock<()> = OnceLock::new();

type BoxedLayer = Box<dyn Layer<Registry> + Send + Sync + 'static>;

/// Our own targets at `level`, everything else at WARN
fn directives(level: Level) -> String {
    let level = level.as_str().to_lowercase();
    format!("mcp402={level},mcp={level},warn")
}

fn terminal_filter(level: Level, pinned: bool) -> EnvFilter {
    if pinned {
        EnvFilter::new(directives(level))
    } else {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(directives(level)))
    }
}

fn make_terminal_layer(format: &LogFormat, filter: EnvFilter) -> BoxedLayer {
    match format {
        LogFormat::Pretty => fmt::layer()
            .with_ansi(true)
            .with_target(false)
            .with_writer(std::io::stderr)
            .with_filter(filter)
            .boxed(),
        LogFormat::Json => fmt::layer()
            .json()
            .with_current_span(true)
            .with_writer(std::io::stderr)
            .with_filter(filter)
            .boxed(),
        LogFormat::Compact => fmt::layer()
            .compact()
            .with_writer(std::io::stderr)
            .with_filter(filter)
            .boxed(),
    }
}

fn make_file_layer(path: &PathBuf) -> Option<BoxedLayer> {
    let file = match std::fs::File::create(path) {
        Ok(file) => file,
        Err(e) => {
            eprintln!("Warning: Failed to create log file {:?}: {}", path, e);
            return None;
        }
    };

    Some(
        fmt::layer()
            .with_ansi(false)
            .with_target(true)
            .with_file(true)
            .with_line_number(true)
            .with_span_events(FmtSpan::CLOSE)
            .with_writer(file)
            .with_filter(EnvFilter::new(directives(Level::DEBUG)))
            .boxed(),
    )
}

/// Install the global subscriber. Later calls are ignored.
pub fn init_tracing(config: TracingConfig) {
    if TRACING_INITIALIZED.set(()).is_err() {
        return;
    }

    let mut layers: Vec<BoxedLayer> = Vec::new();

    if let Some(layer) = config.log_file.as_ref().and_then(make_file_layer) {
        layers.push(layer);
    }

    if let Some(level) = config.terminal_level() {
        let filter = terminal_filter(level, config.level_pinned());
        layers.push(make_terminal_layer(&config.format, filter));
    }

    if layers.is_empty() {
        let _ = tracing::subscriber::set_global_default(tracing_subscriber::registry());
    } else {
        let _ = tracing_subscriber::registry().with(layers).try_init();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_log_format_default() {
        assert_eq!(LogFormat::default(), LogFormat::Pretty);
        let format: LogFormat = serde_json::from_str("\"json\"").unwrap();
        assert_eq!(format, LogFormat::Json);
    }

    #[test]
    fn test_terminal_level() {
        assert_eq!(TracingConfig::default().terminal_level(), Some(Level::WARN));

        let verbose = TracingConfig {
            verbose: true,
            ..Default::default()
        };
        assert_eq!(verbose.terminal_level(), Some(Level::INFO));

        let explicit = TracingConfig {
            verbose: true,
            level: Some(Level::TRACE),
            ..Default::default()
        };
        assert_eq!(explicit.terminal_level(), Some(Level::TRACE));

        let silent = TracingConfig {
            silent: true,
            level: Some(Level::INFO),
            ..Default::default()
        };
        assert_eq!(silent.terminal_level(), None);
    }

    #[test]
    fn test_directives_cover_own_targets() {
        assert_eq!(directives(Level::INFO), "mcp402=info,mcp=info,warn");
    }
}
