//! Map configuration and the JSON map loader.
//!
//! Maps live as `<id>.json` files under a maps directory:
//!
//! ```json
//! { "map": { "id": "...", "name": "...", "dimensions": {"x": 100, "y": 100},
//!            "grid_size": 10, "spawn_points": [...], "walls": [...] } }
//! ```
//!
//! When the configured map cannot be loaded the server falls back to a
//! built-in empty map rather than refusing to start.

use crate::vector::Vec2;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum MapError {
    #[error("failed to read map file {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to parse map file {path}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },
    #[error("invalid map configuration: {0}")]
    Invalid(String),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SpawnPoint {
    pub id: String,
    pub position: Vec2,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WallConfig {
    pub id: String,
    pub center: Vec2,
    pub half_size: Vec2,
    #[serde(default)]
    pub rotation: f64,
    #[serde(default)]
    pub height: f64,
    #[serde(default)]
    pub base_elevation: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MapConfig {
    pub id: String,
    pub name: String,
    pub dimensions: Vec2,
    pub grid_size: f64,
    pub spawn_points: Vec<SpawnPoint>,
    #[serde(default)]
    pub walls: Vec<WallConfig>,
}

impl MapConfig {
    /// Spawn point selection is deterministic: always the first one, so two
    /// identically configured worlds place players identically.
    pub fn first_spawn_point(&self) -> Option<&SpawnPoint> {
        self.spawn_points.first()
    }

    pub fn validate(&self) -> Result<(), MapError> {
        if self.id.is_empty() {
            return Err(MapError::Invalid("map id must not be empty".into()));
        }
        if self.dimensions.x <= 0.0 || self.dimensions.y <= 0.0 {
            return Err(MapError::Invalid(format!(
                "map dimensions must be positive, got {}x{}",
                self.dimensions.x, self.dimensions.y
            )));
        }
        if self.grid_size <= 0.0 {
            return Err(MapError::Invalid(format!(
                "grid size must be positive, got {}",
                self.grid_size
            )));
        }
        if self.spawn_points.is_empty() {
            return Err(MapError::Invalid(
                "map needs at least one spawn point".into(),
            ));
        }
        Ok(())
    }
}

/// The built-in empty map used when no map file can be loaded.
pub fn default_map() -> MapConfig {
    MapConfig {
        id: "default".to_string(),
        name: "Default Map".to_string(),
        dimensions: Vec2::new(800.0, 600.0),
        grid_size: 5.0,
        spawn_points: vec![SpawnPoint {
            id: "spawn-1".to_string(),
            position: Vec2::new(400.0, 300.0),
        }],
        walls: Vec::new(),
    }
}

#[derive(Debug, Deserialize)]
struct MapFile {
    map: MapConfig,
}

/// Loads validated map configurations from a directory of JSON files.
pub struct JsonMapLoader {
    maps_directory: PathBuf,
}

impl JsonMapLoader {
    pub fn new(directory: impl Into<PathBuf>) -> Self {
        Self {
            maps_directory: directory.into(),
        }
    }

    pub fn load_map(&self, map_id: &str) -> Result<MapConfig, MapError> {
        let path = self.maps_directory.join(format!("{map_id}.json"));
        let data = std::fs::read_to_string(&path).map_err(|source| MapError::Io {
            path: path.clone(),
            source,
        })?;
        let config = parse_map(&data).map_err(|err| match err {
            MapError::Parse { source, .. } => MapError::Parse { path: path.clone(), source },
            other => other,
        })?;
        Ok(config)
    }

    pub fn list_available_maps(&self) -> Result<Vec<String>, MapError> {
        let entries = std::fs::read_dir(&self.maps_directory).map_err(|source| MapError::Io {
            path: self.maps_directory.clone(),
            source,
        })?;

        let mut maps = Vec::new();
        for entry in entries.flatten() {
            let path = entry.path();
            if path.extension().and_then(|e| e.to_str()) == Some("json") {
                if let Some(stem) = path.file_stem().and_then(|s| s.to_str()) {
                    maps.push(stem.to_string());
                }
            }
        }
        maps.sort();
        Ok(maps)
    }
}

/// Parses and validates the `{"map": {...}}` document.
fn parse_map(data: &str) -> Result<MapConfig, MapError> {
    let file: MapFile = serde_json::from_str(data).map_err(|source| MapError::Parse {
        path: Path::new("<inline>").to_path_buf(),
        source,
    })?;
    file.map.validate()?;
    Ok(file.map)
}
