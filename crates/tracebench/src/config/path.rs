//! Config sources named on the command line.

use std::path::{Path, PathBuf};

use clap::Parser;

/// A file, or a directory whose YAML files are read in name order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConfigPath {
    File(PathBuf),
    Dir(PathBuf),
}

impl ConfigPath {
    /// Files first, then directories, each group in command-line order.
    pub fn from_cli_args(files: &[PathBuf], dirs: &[PathBuf]) -> Vec<Self> {
        files
            .iter()
            .cloned()
            .map(ConfigPath::File)
            .chain(dirs.iter().cloned().map(ConfigPath::Dir))
            .collect()
    }

    pub fn path(&self) -> &Path {
        match self {
            ConfigPath::File(path) | ConfigPath::Dir(path) => path,
        }
    }
}

pub fn is_yaml_file(path: &Path) -> bool {
    matches!(
        path.extension().and_then(|ext| ext.to_str()),
        Some("yaml" | "yml")
    )
}

/// Synthetic multi-stage pipeline for benchmarking distributed tracing.
#[derive(Parser, Debug)]
#[command(version, about)]
pub struct CliArgs {
    /// Path to a configuration file (repeatable; later files override earlier ones)
    #[arg(short, long)]
    pub config: Vec<PathBuf>,

    /// Path to a configuration directory (repeatable)
    #[arg(short = 'C', long = "config-dir")]
    pub config_dirs: Vec<PathBuf>,
}

impl CliArgs {
    pub fn config_paths(&self) -> Vec<ConfigPath> {
        ConfigPath::from_cli_args(&self.config, &self.config_dirs)
    }
}
