// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Store snapshot: load/save the tables as JSON with atomic writes.

use std::path::Path;

use super::Tables;

/// Load a snapshot from a JSON file.
pub fn load(path: &Path) -> anyhow::Result<Tables> {
    let contents = std::fs::read_to_string(path)?;
    let tables: Tables = serde_json::from_str(&contents)?;
    Ok(tables)
}

/// Save a snapshot to a JSON file atomically (write tmp + rename).
pub fn save(path: &Path, tables: &Tables) -> anyhow::Result<()> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    let json = serde_json::to_string(tables)?;
    let tmp_path = path.with_extension("tmp");
    std::fs::write(&tmp_path, json)?;
    std::fs::rename(&tmp_path, path)?;
    Ok(())
}
