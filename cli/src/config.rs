use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;

use lsprobe_lsp::{ClientOptions, Position, ServerConfig};
use serde::Deserialize;

/// Looked up in the working directory when `--config` is not given.
pub const DEFAULT_CONFIG_FILE: &str = "lsprobe.toml";

const fn default_settle_ms() -> u64 {
    2_000
}

const fn default_analysis_ms() -> u64 {
    1_000
}

#[derive(Debug, Default, Deserialize)]
pub struct ProbeConfig {
    pub server: Option<ServerConfig>,
    #[serde(default)]
    pub client: ClientOptions,
    #[serde(default)]
    pub probe: ProbeSettings,
}

#[derive(Debug, Deserialize)]
pub struct ProbeSettings {
    /// Workspace root sent as `rootUri`. Default: working directory.
    pub root: Option<PathBuf>,
    /// Document opened and probed.
    pub file: Option<PathBuf>,
    /// `languageId` for didOpen. Default: guessed from the file extension.
    pub language_id: Option<String>,
    pub hover: Option<TextPosition>,
    pub completion: Option<TextPosition>,
    pub definition: Option<TextPosition>,
    /// File with known errors, opened last to check that diagnostics are
    /// published for it.
    pub diagnostics_file: Option<PathBuf>,
    /// Wait after `initialized`, draining stderr, before opening the file.
    #[serde(default = "default_settle_ms")]
    pub settle_ms: u64,
    /// Wait after didOpen before the first request.
    #[serde(default = "default_analysis_ms")]
    pub analysis_ms: u64,
}

impl Default for ProbeSettings {
    fn default() -> Self {
        Self {
            root: None,
            file: None,
            language_id: None,
            hover: None,
            completion: None,
            definition: None,
            diagnostics_file: None,
            settle_ms: default_settle_ms(),
            analysis_ms: default_analysis_ms(),
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("reading {}: {source}", path.display())]
    Read {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("parsing {}: {source}", path.display())]
    Parse {
        path: PathBuf,
        source: toml::de::Error,
    },
}

impl ConfigError {
    pub fn path(&self) -> &Path {
        match self {
            ConfigError::Read { path, .. } | ConfigError::Parse { path, .. } => path,
        }
    }
}

impl ProbeConfig {
    /// Load `explicit`, or `lsprobe.toml` from the working directory if it
    /// exists. An explicit path that cannot be read is an error.
    pub fn load(explicit: Option<&Path>) -> Result<Option<Self>, ConfigError> {
        let path = match explicit {
            Some(path) => path.to_path_buf(),
            None => {
                let path = PathBuf::from(DEFAULT_CONFIG_FILE);
                if !path.exists() {
                    return Ok(None);
                }
                path
            }
        };
        Self::load_from(path).map(Some)
    }

    fn load_from(path: PathBuf) -> Result<Self, ConfigError> {
        let content = match std::fs::read_to_string(&path) {
            Ok(content) => content,
            Err(err) => {
                tracing::warn!("Failed to read config at {:?}: {}", path, err);
                return Err(ConfigError::Read { path, source: err });
            }
        };

        match toml::from_str(&content) {
            Ok(config) => {
                tracing::debug!(path = %path.display(), "loaded config");
                Ok(config)
            }
            Err(err) => {
                tracing::warn!("Failed to parse config at {:?}: {}", path, err);
                Err(ConfigError::Parse { path, source: err })
            }
        }
    }
}

/// One-based `LINE:COL`, as editors display positions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(try_from = "String")]
pub struct TextPosition {
    line: u32,
    column: u32,
}

impl TextPosition {
    /// Zero-based LSP position.
    pub fn to_lsp(self) -> Position {
        Position::new(self.line - 1, self.column - 1)
    }
}

impl fmt::Display for TextPosition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.line, self.column)
    }
}

impl FromStr for TextPosition {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (line, column) = s
            .split_once(':')
            .ok_or_else(|| format!("expected LINE:COL, got `{s}`"))?;
        let parse = |part: &str, what: &str| -> Result<u32, String> {
            match part.trim().parse::<u32>() {
                Ok(0) | Err(_) => Err(format!("{what} must be a positive integer in `{s}`")),
                Ok(n) => Ok(n),
            }
        };
        Ok(Self {
            line: parse(line, "line")?,
            column: parse(column, "column")?,
        })
    }
}

impl TryFrom<String> for TextPosition {
    type Error = String;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}
