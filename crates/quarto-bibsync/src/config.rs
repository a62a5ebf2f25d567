/*
 * config.rs
 * Copyright (c) 2025 Posit, PBC
 *
 * YAML configuration of the synchronized pairs.
 */

use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::Deserialize;
use tracing::debug;

use crate::doc::default_template;
use crate::error::{Error, Result};
use crate::fs_util::{canonical_target, parent_dir, read_text};
use crate::reconcile::ReconcileOptions;
use crate::watch::{DEFAULT_DEBOUNCE_MS, WatchConfig};
use crate::watch_loop::{DEFAULT_SETTLE_MS, DEFAULT_SUPPRESS_MS, LoopTiming};

/// Default configuration file name, looked up in the working directory.
pub const DEFAULT_CONFIG_FILE: &str = "bibsync.yml";

/// Contents of `bibsync.yml`.
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Config {
    pub sync: Vec<PairConfig>,

    #[serde(default)]
    pub options: Options,
}

/// One `sync:` item. Paths are relative to the configuration file.
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct PairConfig {
    pub bib: PathBuf,

    #[serde(alias = "doc")]
    pub md: PathBuf,

    #[serde(default)]
    pub template: Option<PathBuf>,
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct Options {
    /// Debounce of the filesystem watcher
    pub debounce_ms: u64,

    /// How long change events for a file we just wrote are ignored
    pub suppress_ms: u64,

    #[serde(flatten)]
    pub reconcile: ReconcileOptions,
}

impl Default for Options {
    fn default() -> Self {
        Self {
            debounce_ms: DEFAULT_DEBOUNCE_MS,
            suppress_ms: DEFAULT_SUPPRESS_MS,
            reconcile: ReconcileOptions::default(),
        }
    }
}

impl Options {
    pub fn watch_config(&self) -> WatchConfig {
        WatchConfig {
            debounce_ms: self.debounce_ms,
        }
    }

    pub fn loop_timing(&self) -> LoopTiming {
        LoopTiming {
            settle: Duration::from_millis(DEFAULT_SETTLE_MS),
            suppress: Duration::from_millis(self.suppress_ms),
        }
    }
}

/// A pair with absolute paths and its template loaded.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolvedPair {
    pub bib: PathBuf,
    pub doc: PathBuf,
    /// Text a newly created document starts from
    pub template: String,
}

impl Config {
    /// Read and parse a configuration file.
    pub fn load(path: &Path) -> Result<Self> {
        let text = read_text(path)?;
        serde_yaml::from_str(&text)
            .map_err(|e| Error::ConfigParse(format!("{}: {}", path.display(), e)))
    }

    pub fn parse(text: &str) -> Result<Self> {
        serde_yaml::from_str(text).map_err(|e| Error::ConfigParse(e.to_string()))
    }

    /// A configuration for one pair given on the command line.
    pub fn single(bib: PathBuf, md: PathBuf, template: Option<PathBuf>) -> Self {
        Self {
            sync: vec![PairConfig { bib, md, template }],
            options: Options::default(),
        }
    }

    /// Resolve every pair against `base_dir` and check that the set of
    /// pairs makes sense before anything is touched.
    pub fn resolve(&self, base_dir: &Path) -> Result<Vec<ResolvedPair>> {
        if self.sync.is_empty() {
            return Err(Error::Configuration("no sync pairs configured".to_string()));
        }

        let mut seen = HashSet::new();
        let mut pairs = Vec::with_capacity(self.sync.len());
        for item in &self.sync {
            let bib = base_dir.join(&item.bib);
            let doc = base_dir.join(&item.md);

            if !bib.is_file() {
                return Err(Error::Configuration(format!(
                    "bib file {} does not exist",
                    bib.display()
                )));
            }
            let doc_dir = parent_dir(&doc);
            if !doc_dir.is_dir() {
                return Err(Error::Configuration(format!(
                    "directory {} for {} does not exist",
                    doc_dir.display(),
                    doc.display()
                )));
            }

            let bib_id = canonical_target(&bib);
            let doc_id = canonical_target(&doc);
            if bib_id == doc_id {
                return Err(Error::Configuration(format!(
                    "{} is both the bib file and the document of a pair",
                    bib.display()
                )));
            }
            for id in [&bib_id, &doc_id] {
                if !seen.insert(id.clone()) {
                    return Err(Error::Configuration(format!(
                        "{} appears in more than one pair",
                        id.display()
                    )));
                }
            }

            let template = match &item.template {
                Some(path) => {
                    let path = base_dir.join(path);
                    std::fs::read_to_string(&path).map_err(|e| {
                        Error::Configuration(format!(
                            "template {} cannot be read: {}",
                            path.display(),
                            e
                        ))
                    })?
                }
                None => builtin_template(&bib, &doc),
            };

            debug!(bib = %bib.display(), doc = %doc.display(), "Resolved sync pair");
            pairs.push(ResolvedPair { bib, doc, template });
        }
        Ok(pairs)
    }
}

/// Front matter for a document created without a configured template.
fn builtin_template(bib: &Path, doc: &Path) -> String {
    let title = doc
        .file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_else(|| "Reading notes".to_string());

    // Point at the bib file relative to the document when they share a
    // directory, which is by far the common layout.
    let bibliography = if canonical_target(bib).parent() == canonical_target(doc).parent() {
        bib.file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default()
    } else {
        bib.display().to_string()
    };
    default_template(&title, &bibliography)
}
