//! Directory scan and the full load pipeline.
//!
//! A load walks the pack directory in sorted order, runs each `*.json` file
//! through parse → env substitution → typed conversion → validation, and
//! returns every usable pack together with every diagnostic produced along
//! the way. One bad file never poisons its siblings.

use std::collections::HashSet;
use std::path::{Path, PathBuf};

use tracing::{debug, warn};
use walkdir::WalkDir;

use crate::env::{self, EnvPolicy};
use crate::parser::{self, DEFAULT_MAX_FILE_BYTES};
use crate::types::{Diagnostic, DiagnosticKind, Pack, Severity};
use crate::validator::{self, ValidatorConfig};

/// Load pipeline knobs.
#[derive(Clone, Debug)]
pub struct StoreConfig {
    /// Per-file size cap in bytes.
    pub max_file_bytes: u64,
    /// Env substitution policy.
    pub env_policy: EnvPolicy,
    /// Validation and strict-mode settings.
    pub validator: ValidatorConfig,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            max_file_bytes: DEFAULT_MAX_FILE_BYTES,
            env_policy: EnvPolicy::default(),
            validator: ValidatorConfig::default(),
        }
    }
}

/// Outcome of one directory load.
#[derive(Clone, Debug, Default)]
pub struct LoadResult {
    /// Usable packs, in file order.
    pub packs: Vec<Pack>,
    /// Every diagnostic produced, including those of excluded packs.
    pub diagnostics: Vec<Diagnostic>,
}

impl LoadResult {
    /// Diagnostics at error severity.
    pub fn errors(&self) -> impl Iterator<Item = &Diagnostic> {
        self.diagnostics
            .iter()
            .filter(|d| d.severity == Severity::Error)
    }
}

/// Loads packs from a directory on demand.
#[derive(Clone, Debug)]
pub struct PackStore {
    dir: PathBuf,
    config: StoreConfig,
}

impl PackStore {
    /// Create a store over `dir` with the given pipeline config.
    pub fn new(dir: impl Into<PathBuf>, config: StoreConfig) -> Self {
        Self {
            dir: dir.into(),
            config,
        }
    }

    /// Directory this store scans.
    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Scan the directory and run the full pipeline over every `*.json` file.
    ///
    /// File order is sorted by path, so repeated loads of an unchanged
    /// directory produce identical results.
    pub fn load(&self) -> LoadResult {
        let mut result = LoadResult::default();
        let mut seen_ids: HashSet<String> = HashSet::new();

        for path in self.pack_files() {
            if let Some(pack) = self.load_one(&path, &mut result.diagnostics) {
                if seen_ids.contains(&pack.id) {
                    warn!(id = %pack.id, path = %path.display(), "duplicate pack id, dropping");
                    result.diagnostics.push(Diagnostic::error(
                        &path,
                        DiagnosticKind::Schema,
                        format!("duplicate pack id '{}'", pack.id),
                    ));
                    continue;
                }
                let _ = seen_ids.insert(pack.id.clone());
                result.packs.push(pack);
            }
        }

        debug!(
            packs = result.packs.len(),
            diagnostics = result.diagnostics.len(),
            dir = %self.dir.display(),
            "pack load complete"
        );
        result
    }

    /// Run one file through the pipeline. Returns `None` when the file fails
    /// or strict mode excludes it; either way its diagnostics are recorded.
    fn load_one(&self, path: &Path, diagnostics: &mut Vec<Diagnostic>) -> Option<Pack> {
        let mut raw = match parser::load_raw(path, self.config.max_file_bytes) {
            Ok(raw) => raw,
            Err(d) => {
                diagnostics.push(d);
                return None;
            }
        };

        env::substitute(&mut raw, &self.config.env_policy, path, diagnostics);

        let pack = match parser::into_pack(raw, path) {
            Ok(pack) => pack,
            Err(d) => {
                diagnostics.push(d);
                return None;
            }
        };

        let pack_diagnostics = validator::validate(&pack, &self.config.validator);
        let has_error = pack_diagnostics
            .iter()
            .any(|d| d.severity == Severity::Error);
        let excluded =
            validator::strict_excludes(&pack, &pack_diagnostics, self.config.validator.strict);
        diagnostics.extend(pack_diagnostics);

        if has_error {
            return None;
        }
        if excluded {
            warn!(id = %pack.id, path = %path.display(), "pack excluded by strict mode");
            return None;
        }
        Some(pack)
    }

    /// All `*.json` files under the directory, sorted by path.
    fn pack_files(&self) -> Vec<PathBuf> {
        let mut files: Vec<PathBuf> = WalkDir::new(&self.dir)
            .follow_links(false)
            .into_iter()
            .filter_map(Result::ok)
            .filter(|e| e.file_type().is_file())
            .map(walkdir::DirEntry::into_path)
            .filter(|p| p.extension().is_some_and(|ext| ext == "json"))
            .collect();
        files.sort();
        files
    }
}
