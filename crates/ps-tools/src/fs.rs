//! File tools: READ_FILE, WRITE_FILE, PATCH_FILE.

use std::io::ErrorKind;
use std::path::Path;

use ps_core::plan::PATCH_MARKER;
use ps_core::{Policy, PsError, PsResult, WriteMode};
use serde_json::Value;

use crate::sandbox::safe_resolve;

pub async fn read_file(
    root: &Path,
    path: &str,
    max_bytes: Option<u64>,
    policy: &Policy,
) -> PsResult<Value> {
    let resolved = safe_resolve(root, path)?;
    let limit = max_bytes.unwrap_or(policy.max_file_bytes);

    let metadata = tokio::fs::metadata(&resolved)
        .await
        .map_err(|err| read_error(path, &err))?;
    if metadata.is_dir() {
        return Err(PsError::Tool(format!(
            "Is a directory: {path} (use SEARCH to list files)"
        )));
    }
    if metadata.len() > limit {
        return Err(PsError::Tool(format!(
            "File too large: {path} is {} bytes, limit {limit} (raise maxBytes up to the policy cap)",
            metadata.len()
        )));
    }

    let bytes = tokio::fs::read(&resolved)
        .await
        .map_err(|err| read_error(path, &err))?;
    Ok(Value::String(String::from_utf8_lossy(&bytes).into_owned()))
}

pub async fn write_file(
    root: &Path,
    path: &str,
    content: &str,
    mode: WriteMode,
    policy: &Policy,
) -> PsResult<Value> {
    let resolved = safe_resolve(root, path)?;

    if content.len() as u64 > policy.max_file_bytes {
        return Err(PsError::Tool(format!(
            "Content too large: {} bytes exceeds the policy cap of {} for {path}",
            content.len(),
            policy.max_file_bytes
        )));
    }
    if mode == WriteMode::CreateOnly && resolved.exists() {
        return Err(PsError::Tool(format!(
            "File exists: {path} (mode create_only refuses to overwrite)"
        )));
    }

    if let Some(parent) = resolved.parent() {
        tokio::fs::create_dir_all(parent)
            .await
            .map_err(|err| write_error(path, &err))?;
    }
    tokio::fs::write(&resolved, content.as_bytes())
        .await
        .map_err(|err| write_error(path, &err))?;

    Ok(Value::String(format!(
        "Wrote {} bytes to {path}",
        content.len()
    )))
}

/// Whole-file replacement keyed by the `REPLACE:\n` marker. Any other
/// patch format is an explicit error rather than silent corruption.
pub async fn patch_file(root: &Path, path: &str, patch: &str, policy: &Policy) -> PsResult<Value> {
    let Some(replacement) = patch.strip_prefix(PATCH_MARKER) else {
        return Err(PsError::Schema(format!(
            "PATCH_FILE: patch must begin with the literal marker {PATCH_MARKER:?}"
        )));
    };
    let resolved = safe_resolve(root, path)?;
    if !resolved.exists() {
        return Err(PsError::Tool(format!("File not found: {path}")));
    }
    if replacement.len() as u64 > policy.max_file_bytes {
        return Err(PsError::Tool(format!(
            "Content too large: {} bytes exceeds the policy cap of {} for {path}",
            replacement.len(),
            policy.max_file_bytes
        )));
    }
    tokio::fs::write(&resolved, replacement.as_bytes())
        .await
        .map_err(|err| write_error(path, &err))?;
    Ok(Value::String(format!(
        "Replaced {path} with {} bytes",
        replacement.len()
    )))
}

fn read_error(path: &str, err: &std::io::Error) -> PsError {
    match err.kind() {
        ErrorKind::NotFound => PsError::Tool(format!("File not found: {path}")),
        ErrorKind::PermissionDenied => PsError::Tool(format!(
            "Permission denied: {path} (check file ownership and mode)"
        )),
        _ => PsError::Tool(format!("Failed to read {path}: {err}")),
    }
}

fn write_error(path: &str, err: &std::io::Error) -> PsError {
    match err.kind() {
        ErrorKind::PermissionDenied => PsError::Tool(format!(
            "Permission denied: {path} (check directory ownership and mode)"
        )),
        _ => PsError::Tool(format!("Failed to write {path}: {err}")),
    }
}
