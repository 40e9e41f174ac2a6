//! Single-file pack parsing.
//!
//! `load(path)` reads one JSON document and produces either a raw
//! `serde_json::Value` (ready for env substitution) or a [`Diagnostic`] with
//! the file path and, when derivable, a 1-based line number. A failing file
//! is skipped entirely and contributes neither packs nor partial data.

use std::path::Path;

use serde_json::Value;

use crate::types::{Diagnostic, DiagnosticKind, Pack};

/// Default per-file size cap (256 KiB).
pub const DEFAULT_MAX_FILE_BYTES: u64 = 262_144;

/// Read and parse a pack file into a raw JSON value.
///
/// Files beyond `max_bytes` are rejected with a `security` diagnostic before
/// any read. I/O and JSON failures become `parse` diagnostics.
pub fn load_raw(path: &Path, max_bytes: u64) -> Result<Value, Diagnostic> {
    let size = std::fs::metadata(path).map(|m| m.len()).unwrap_or(0);
    if size > max_bytes {
        return Err(Diagnostic::error(
            path,
            DiagnosticKind::Security,
            format!("file too large: {size} bytes > limit {max_bytes}"),
        ));
    }

    let content = std::fs::read_to_string(path).map_err(|e| {
        Diagnostic::error(path, DiagnosticKind::Parse, format!("read failed: {e}"))
    })?;

    serde_json::from_str(&content).map_err(|e| json_diagnostic(path, &e))
}

/// Convert a raw JSON value into a typed [`Pack`], attaching its source path.
///
/// Shape mismatches (wrong types, unknown enum values) become `schema`
/// diagnostics.
pub fn into_pack(raw: Value, path: &Path) -> Result<Pack, Diagnostic> {
    if !raw.is_object() {
        return Err(Diagnostic::error(
            path,
            DiagnosticKind::Schema,
            "pack root must be an object",
        ));
    }
    let mut pack: Pack = serde_json::from_value(raw).map_err(|e| {
        Diagnostic::error(path, DiagnosticKind::Schema, e.to_string())
    })?;
    pack.source = path.to_path_buf();
    Ok(pack)
}

/// Map a `serde_json` error to a parse diagnostic with its 1-based line.
fn json_diagnostic(path: &Path, err: &serde_json::Error) -> Diagnostic {
    let diagnostic = Diagnostic::error(path, DiagnosticKind::Parse, err.to_string());
    if err.line() > 0 {
        diagnostic.with_line(err.line())
    } else {
        diagnostic
    }
}
