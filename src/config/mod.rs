use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::Deserialize;
use thiserror::Error;

use crate::git::ExecGitChecker;

pub const DATA_FILE: &str = "data.json";
pub const PROJECT_CONFIG_FILE: &str = ".trees.project.yml";
pub const DATA_DIR_ENV: &str = "TREES_DATA_DIR";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EffectiveConfig {
    pub data_dir: PathBuf,
    pub git_timeout: Option<Duration>,
}

impl EffectiveConfig {
    pub fn defaults(home: &Path) -> Self {
        Self {
            data_dir: home.join(".trees"),
            git_timeout: None,
        }
    }

    pub fn store_path(&self) -> PathBuf {
        self.data_dir.join(DATA_FILE)
    }

    pub fn git_checker(&self) -> ExecGitChecker {
        match self.git_timeout {
            Some(timeout) => ExecGitChecker::with_timeout(timeout),
            None => ExecGitChecker::new(),
        }
    }
}

/// Where each layer comes from. `None` skips that layer.
#[derive(Debug, Clone, Default)]
pub struct ConfigSources<'a> {
    pub user_config: Option<&'a Path>,
    pub env_data_dir: Option<&'a str>,
    pub flag_data_dir: Option<&'a Path>,
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("{}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("{}: {source}", path.display())]
    Yaml {
        path: PathBuf,
        #[source]
        source: serde_yaml::Error,
    },
}

#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
struct RawConfig {
    #[serde(default)]
    data_dir: Option<String>,
    #[serde(default)]
    git_timeout_secs: Option<u64>,
}

/// Merges defaults, the user config, the nearest project config, the
/// environment and the command line, later layers winning.
pub fn load_effective_config(
    cwd: &Path,
    home: &Path,
    sources: &ConfigSources<'_>,
) -> Result<EffectiveConfig, ConfigError> {
    let mut merged = EffectiveConfig::defaults(home);

    if let Some(path) = sources.user_config.filter(|path| path.is_file()) {
        apply_layer(&mut merged, path, home)?;
    }
    if let Some(path) = find_nearest_project_config(cwd) {
        apply_layer(&mut merged, &path, home)?;
    }
    if let Some(dir) = sources.env_data_dir.filter(|dir| !dir.trim().is_empty()) {
        merged.data_dir = resolve_dir(dir, cwd, home);
    }
    if let Some(dir) = sources.flag_data_dir {
        merged.data_dir = cwd.join(dir);
    }
    Ok(merged)
}

pub fn find_nearest_project_config(start: &Path) -> Option<PathBuf> {
    start
        .ancestors()
        .map(|dir| dir.join(PROJECT_CONFIG_FILE))
        .find(|candidate| candidate.is_file())
}

fn apply_layer(merged: &mut EffectiveConfig, path: &Path, home: &Path) -> Result<(), ConfigError> {
    let content = fs::read_to_string(path).map_err(|source| ConfigError::Io {
        path: path.to_path_buf(),
        source,
    })?;
    let raw = parse_raw(&content).map_err(|source| ConfigError::Yaml {
        path: path.to_path_buf(),
        source,
    })?;
    let base = path.parent().unwrap_or(Path::new("."));
    if let Some(dir) = raw.data_dir {
        merged.data_dir = resolve_dir(&dir, base, home);
    }
    if let Some(secs) = raw.git_timeout_secs {
        merged.git_timeout = (secs > 0).then(|| Duration::from_secs(secs));
    }
    Ok(())
}

fn parse_raw(content: &str) -> Result<RawConfig, serde_yaml::Error> {
    // An empty or comment-only file deserializes as null.
    if content.lines().all(|line| {
        let line = line.trim();
        line.is_empty() || line.starts_with('#')
    }) {
        return Ok(RawConfig::default());
    }
    serde_yaml::from_str(content)
}

/// Relative directories resolve against `base`; `~` expands to `home`.
fn resolve_dir(raw: &str, base: &Path, home: &Path) -> PathBuf {
    let expanded = expand_tilde(raw.trim(), home);
    if expanded.is_absolute() {
        expanded
    } else {
        base.join(expanded)
    }
}

pub fn expand_tilde(path: &str, home: &Path) -> PathBuf {
    if path == "~" {
        return home.to_path_buf();
    }
    if let Some(rest) = path.strip_prefix("~/") {
        return home.join(rest);
    }
    PathBuf::from(path)
}

pub fn default_config_yaml() -> String {
    r#"# Directory holding data.json.
# data_dir: ~/.trees

# Kill `git log` after this many seconds when checking evidence (0 = never).
git_timeout_secs: 30
"#
    .to_string()
}
