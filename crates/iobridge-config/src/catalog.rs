use std::collections::BTreeMap;
use std::io::Read;
use std::path::Path;

use jsonschema::Validator;
use serde_json::Value;
use tracing::{debug, info};

use crate::board::{BoardConfig, PRESET_NAMES};
use crate::config::CatalogConfig;
use crate::error::{ConfigError, Result};
use crate::validator::{compile_board_schema, validate_document};

const BOARD_FILE_SUFFIX: &str = ".board.json";

/// Name-keyed collection of board descriptors.
pub struct BoardCatalog {
    boards: BTreeMap<String, BoardConfig>,
    validator: Validator,
    config: CatalogConfig,
}

impl BoardCatalog {
    /// Create a catalog holding only the built-in presets.
    pub fn new() -> Result<Self> {
        Self::with_config(CatalogConfig::default())
    }

    /// Create a preset-only catalog with explicit config.
    pub fn with_config(config: CatalogConfig) -> Result<Self> {
        let mut boards = BTreeMap::new();
        for name in PRESET_NAMES {
            boards.insert(name.to_string(), BoardConfig::preset(name)?);
        }
        Ok(Self {
            boards,
            validator: compile_board_schema()?,
            config,
        })
    }

    /// Register a descriptor from a JSON string.
    pub fn register_json(&mut self, json: &str) -> Result<&BoardConfig> {
        let value: Value = serde_json::from_str(json)?;
        self.register_value(value)
    }

    /// Register a descriptor from a JSON value.
    pub fn register_value(&mut self, value: Value) -> Result<&BoardConfig> {
        let name = value
            .get("name")
            .and_then(Value::as_str)
            .unwrap_or("<unnamed>")
            .to_string();
        validate_document(&name, &value, &self.validator)?;
        let board: BoardConfig = serde_json::from_value(value)?;
        board.check()?;

        let is_preset = PRESET_NAMES.contains(&board.name.as_str());
        if is_preset && !self.config.allow_preset_override {
            return Err(ConfigError::LoadFailed(format!(
                "descriptor would replace built-in preset: {}",
                board.name
            )));
        }

        debug!(board = %board.name, "registered board descriptor");
        let key = board.name.clone();
        self.boards.insert(key.clone(), board);
        Ok(&self.boards[&key])
    }

    /// Load presets plus every `*.board.json` in a directory.
    pub fn from_directory(path: &Path) -> Result<Self> {
        Self::from_directory_with_config(path, CatalogConfig::default())
    }

    /// Load presets plus a directory of descriptors with explicit config.
    pub fn from_directory_with_config(path: &Path, config: CatalogConfig) -> Result<Self> {
        let mut catalog = Self::with_config(config)?;
        let mut loaded = 0usize;

        let entries = std::fs::read_dir(path)
            .map_err(|err| ConfigError::LoadFailed(format!("{}: {err}", path.display())))?;

        for entry in entries {
            let entry = entry.map_err(|err| ConfigError::LoadFailed(err.to_string()))?;
            let file_name = entry.file_name();
            let file_name = file_name.to_string_lossy();
            let is_board_file = file_name.to_ascii_lowercase().ends_with(BOARD_FILE_SUFFIX);
            let entry_path = entry.path();
            let path_metadata = std::fs::symlink_metadata(&entry_path)
                .map_err(|err| ConfigError::LoadFailed(err.to_string()))?;
            let file_type = path_metadata.file_type();

            if file_type.is_symlink() {
                if is_board_file {
                    return Err(ConfigError::LoadFailed(format!(
                        "refusing to load descriptor symlink: {file_name}"
                    )));
                }
                continue;
            }
            if !file_type.is_file() || !is_board_file {
                continue;
            }

            loaded = loaded.saturating_add(1);
            if loaded > catalog.config.max_boards_from_directory {
                return Err(ConfigError::LoadFailed(format!(
                    "descriptor count exceeds configured max ({}): {}",
                    catalog.config.max_boards_from_directory, loaded
                )));
            }

            let content = read_limited(
                &entry_path,
                &path_metadata,
                catalog.config.max_board_file_size,
            )?;
            catalog.register_json(&content)?;
        }

        info!(dir = %path.display(), loaded, "board catalog loaded");
        Ok(catalog)
    }

    /// Look up a descriptor by name (case-insensitive).
    pub fn get(&self, name: &str) -> Result<&BoardConfig> {
        self.boards
            .get(&name.to_ascii_lowercase())
            .ok_or_else(|| ConfigError::UnknownBoard(name.to_string()))
    }

    /// Sorted descriptor names.
    pub fn names(&self) -> Vec<&str> {
        self.boards.keys().map(String::as_str).collect()
    }

    pub fn iter(&self) -> impl Iterator<Item = &BoardConfig> {
        self.boards.values()
    }

    pub fn len(&self) -> usize {
        self.boards.len()
    }

    pub fn is_empty(&self) -> bool {
        self.boards.is_empty()
    }

    pub fn config(&self) -> &CatalogConfig {
        &self.config
    }
}

/// Read a single descriptor file without following swaps or oversize input.
pub fn read_board_file(path: &Path, max_bytes: usize) -> Result<BoardConfig> {
    let metadata = std::fs::symlink_metadata(path)
        .map_err(|err| ConfigError::LoadFailed(format!("{}: {err}", path.display())))?;
    if metadata.file_type().is_symlink() {
        return Err(ConfigError::LoadFailed(format!(
            "refusing to load descriptor symlink: {}",
            path.display()
        )));
    }
    let content = read_limited(path, &metadata, max_bytes)?;
    let value: Value = serde_json::from_str(&content)?;
    let name = value
        .get("name")
        .and_then(Value::as_str)
        .unwrap_or("<unnamed>")
        .to_string();
    validate_document(&name, &value, &compile_board_schema()?)?;
    let board: BoardConfig = serde_json::from_value(value)?;
    board.check()?;
    Ok(board)
}

fn read_limited(
    path: &Path,
    path_metadata: &std::fs::Metadata,
    max_bytes: usize,
) -> Result<String> {
    let display = path.display();
    let file = std::fs::File::open(path)
        .map_err(|err| ConfigError::LoadFailed(format!("failed opening {display}: {err}")))?;
    let opened_metadata = file
        .metadata()
        .map_err(|err| ConfigError::LoadFailed(err.to_string()))?;

    #[cfg(unix)]
    {
        if !same_file_identity(path_metadata, &opened_metadata) {
            return Err(ConfigError::LoadFailed(format!(
                "descriptor changed during load: {display}"
            )));
        }
    }
    #[cfg(not(unix))]
    let _ = path_metadata;

    if opened_metadata.len() > max_bytes as u64 {
        return Err(ConfigError::LoadFailed(format!(
            "descriptor too large ({} bytes): {display}",
            opened_metadata.len()
        )));
    }

    let read_limit = u64::try_from(max_bytes.saturating_add(1)).unwrap_or(u64::MAX);
    let mut content = String::new();
    file.take(read_limit)
        .read_to_string(&mut content)
        .map_err(|err| ConfigError::LoadFailed(format!("failed reading {display}: {err}")))?;
    if content.len() > max_bytes {
        return Err(ConfigError::LoadFailed(format!(
            "descriptor too large while reading: {display}"
        )));
    }
    Ok(content)
}

#[cfg(unix)]
fn same_file_identity(
    path_metadata: &std::fs::Metadata,
    opened_metadata: &std::fs::Metadata,
) -> bool {
    use std::os::unix::fs::MetadataExt;
    path_metadata.dev() == opened_metadata.dev() && path_metadata.ino() == opened_metadata.ino()
}
