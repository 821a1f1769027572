//! Configuration file parsing for `cinder.toml`.
//!
//! Searches the current directory then its ancestors, falling back to
//! `~/.config/cinder/cinder.toml` when no project-level file exists.

use std::path::{Path, PathBuf};

use cinder_compiler::ValuePrinting;
use cinder_vm::SessionOptions;
use serde::{Deserialize, Serialize};
use thiserror::Error;

pub const CONFIG_FILE_NAME: &str = "cinder.toml";

/// Environment variable overriding the REPL history location.
pub const REPL_HISTORY_PATH_ENV: &str = "CINDER_REPL_HISTORY_PATH";

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("cannot read '{path}': {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("invalid toml in '{path}': {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: toml::de::Error,
    },
}

#[derive(Debug, Deserialize, Serialize, Default, Clone, PartialEq)]
pub struct CinderConfig {
    #[serde(default)]
    pub session: SessionSection,
    #[serde(default)]
    pub repl: ReplSection,
}

/// `[session]`: defaults for every interpreter session.
#[derive(Debug, Deserialize, Serialize, Default, Clone, PartialEq)]
pub struct SessionSection {
    #[serde(default)]
    pub include_paths: Vec<PathBuf>,
    pub dynamic_lookup: Option<bool>,
    pub value_printing: Option<ValuePrinting>,
    pub debug: Option<bool>,
    pub instruction_limit: Option<u64>,
    pub global_memory_limit: Option<u64>,
}

/// `[repl]`: interactive shell settings.
#[derive(Debug, Deserialize, Serialize, Default, Clone, PartialEq)]
pub struct ReplSection {
    pub history_path: Option<String>,
    /// Inputs evaluated before the first prompt.
    #[serde(default)]
    pub startup: Vec<String>,
}

impl CinderConfig {
    /// Loads the nearest config and returns the file it came from.
    pub fn load_with_path() -> Result<Option<(PathBuf, Self)>, ConfigError> {
        let Ok(cwd) = std::env::current_dir() else {
            return Ok(None);
        };
        match Self::find(&cwd, dirs::home_dir().as_deref()) {
            Some(path) => {
                let cfg = Self::load_from(&path)?;
                tracing::debug!(path = %path.display(), "loaded configuration");
                Ok(Some((path, cfg)))
            }
            None => Ok(None),
        }
    }

    /// Path of the config file that applies to `start`: the first
    /// `cinder.toml` in `start` or an ancestor, else the global one.
    pub fn find(start: &Path, home: Option<&Path>) -> Option<PathBuf> {
        let mut dir = start.to_path_buf();
        loop {
            let candidate = dir.join(CONFIG_FILE_NAME);
            if candidate.is_file() {
                return Some(candidate);
            }
            if !dir.pop() {
                break;
            }
        }
        let global = home?.join(".config").join("cinder").join(CONFIG_FILE_NAME);
        global.is_file().then_some(global)
    }

    pub fn load_from(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path)
            .map_err(|source| ConfigError::Read { path: path.to_path_buf(), source })?;
        toml::from_str(&content)
            .map_err(|source| ConfigError::Parse { path: path.to_path_buf(), source })
    }

    /// Session options with this config applied over the defaults. Relative
    /// include paths are taken relative to `base`.
    pub fn session_options(&self, base: Option<&Path>) -> SessionOptions {
        let include_paths = self
            .session
            .include_paths
            .iter()
            .map(|p| match base {
                Some(base) if p.is_relative() => base.join(p),
                _ => p.clone(),
            })
            .collect();
        let mut options = SessionOptions { include_paths, ..SessionOptions::default() };
        if let Some(dynamic) = self.session.dynamic_lookup {
            options.compilation.dynamic_scoping = dynamic;
        }
        if let Some(mode) = self.session.value_printing {
            options.compilation.value_printing = mode;
        }
        if let Some(debug) = self.session.debug {
            options.compilation.debug = debug;
        }
        options.instruction_limit = self.session.instruction_limit;
        options.global_memory_limit = self.session.global_memory_limit;
        options
    }

    /// History file for the REPL: the environment override, then
    /// `[repl] history_path`, then `~/.cinder/repl_history`.
    pub fn history_path(&self, home: Option<&Path>, env_override: Option<&str>) -> Option<PathBuf> {
        let configured = env_override
            .map(str::trim)
            .filter(|v| !v.is_empty())
            .or_else(|| self.repl.history_path.as_deref().map(str::trim).filter(|v| !v.is_empty()));

        let Some(raw) = configured else {
            return Some(home?.join(".cinder").join("repl_history"));
        };
        if raw == "~" {
            return home.map(Path::to_path_buf);
        }
        if let Some(rest) = raw.strip_prefix("~/") {
            return Some(home?.join(rest));
        }
        let path = PathBuf::from(raw);
        if path.is_relative() {
            return Some(home?.join(path));
        }
        Some(path)
    }

    pub fn default_template() -> &'static str {
        r#"# Cinder configuration

[session]
# Directories searched by #include "..." and .L
include_paths = []
# Resolve unknown identifiers at run time
dynamic_lookup = true
# "auto" prints the value of inputs without a trailing semicolon
value_printing = "auto"
# Log the rewritten source of every input
debug = false
# Value slots available to globals and string literals
# global_memory_limit = 16777216

[repl]
# history_path = "~/.cinder/repl_history"
# Inputs evaluated before the first prompt
startup = []
"#
    }
}

// ── Tests ───────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_session_section() {
        let cfg: CinderConfig = toml::from_str(
            r#"
[session]
include_paths = ["include", "/opt/cinder/include"]
dynamic_lookup = false
value_printing = "enabled"
instruction_limit = 5000
global_memory_limit = 4096
"#,
        )
        .expect("should parse");
        assert_eq!(cfg.session.include_paths.len(), 2);
        assert_eq!(cfg.session.dynamic_lookup, Some(false));
        assert_eq!(cfg.session.value_printing, Some(ValuePrinting::Enabled));

        let options = cfg.session_options(Some(Path::new("/work")));
        assert_eq!(
            options.include_paths,
            vec![PathBuf::from("/work/include"), PathBuf::from("/opt/cinder/include")]
        );
        assert!(!options.compilation.dynamic_scoping);
        assert_eq!(options.instruction_limit, Some(5000));
        assert_eq!(options.global_memory_limit, Some(4096));
    }

    #[test]
    fn empty_config_keeps_session_defaults() {
        let cfg: CinderConfig = toml::from_str("").expect("empty toml is valid");
        assert_eq!(cfg.session_options(None), SessionOptions::default());
        assert!(cfg.repl.startup.is_empty());
    }

    #[test]
    fn unknown_value_printing_mode_is_rejected() {
        let result: Result<CinderConfig, _> =
            toml::from_str("[session]\nvalue_printing = \"sometimes\"\n");
        assert!(result.is_err());
    }

    #[test]
    fn default_template_round_trips() {
        let cfg: CinderConfig =
            toml::from_str(CinderConfig::default_template()).expect("template parses");
        assert_eq!(cfg.session.dynamic_lookup, Some(true));
        assert_eq!(cfg.session.value_printing, Some(ValuePrinting::Auto));
    }

    #[test]
    fn history_path_resolution() {
        let home = Path::new("/home/tester");
        let cfg = CinderConfig::default();
        let resolve = |env| cfg.history_path(Some(home), env);
        let path = |p: &str| Some(PathBuf::from(p));
        assert_eq!(resolve(None), path("/home/tester/.cinder/repl_history"));
        assert_eq!(resolve(Some("~/h")), path("/home/tester/h"));
        assert_eq!(resolve(Some("rel/h")), path("/home/tester/rel/h"));
        assert_eq!(resolve(Some("/tmp/h")), path("/tmp/h"));
        assert_eq!(cfg.history_path(None, None), None);

        let configured = CinderConfig {
            repl: ReplSection { history_path: Some("/var/h".into()), startup: Vec::new() },
            ..CinderConfig::default()
        };
        assert_eq!(configured.history_path(Some(home), Some("  ")), path("/var/h"));
        assert_eq!(configured.history_path(Some(home), Some("/tmp/h")), path("/tmp/h"));
    }
}
