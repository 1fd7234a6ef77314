//! Persistent host settings (JSON file in the app data directory).

use std::fs;
use std::path::{Path, PathBuf};

use parley_core::{EngineConfig, Language, Place, RequestContext};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
#[serde(default)]
pub struct AppSettings {
    /// Preferred capture language tag.
    pub language: String,
    pub profile_id: Option<String>,
    pub place_name: Option<String>,
    pub latitude: Option<f64>,
    pub longitude: Option<f64>,
    pub start_muted: bool,
    /// Where the reconnection identifier is kept. `None` → next to the
    /// settings file.
    pub store_path: Option<PathBuf>,
}

impl Default for AppSettings {
    fn default() -> Self {
        Self {
            language: "en-US".into(),
            profile_id: None,
            place_name: None,
            latitude: None,
            longitude: None,
            start_muted: false,
            store_path: None,
        }
    }
}

impl AppSettings {
    pub fn normalize(&mut self) {
        let language = Language::new(&self.language);
        self.language = if language.tag().is_empty() {
            "en-US".into()
        } else {
            language.tag().to_owned()
        };
        self.profile_id = normalize_optional(self.profile_id.take());
        self.place_name = normalize_optional(self.place_name.take());
        self.latitude = self
            .latitude
            .filter(|lat| lat.is_finite() && (-90.0..=90.0).contains(lat));
        self.longitude = self
            .longitude
            .filter(|lon| lon.is_finite() && (-180.0..=180.0).contains(lon));
    }

    /// A place is only attached when both coordinates are known.
    pub fn place(&self) -> Option<Place> {
        let (lat, lon) = (self.latitude?, self.longitude?);
        Some(Place {
            lat,
            lon,
            place_name: self.place_name.clone().unwrap_or_default(),
        })
    }

    pub fn engine_config(&self) -> EngineConfig {
        EngineConfig {
            preferred_language: Language::new(&self.language),
            request_context: RequestContext {
                place: self.place(),
                profile_id: self.profile_id.clone(),
            },
            ..EngineConfig::default()
        }
    }

    pub fn resolved_store_path(&self, settings_path: &Path) -> PathBuf {
        self.store_path.clone().unwrap_or_else(|| {
            settings_path
                .parent()
                .unwrap_or_else(|| Path::new("."))
                .join("store.json")
        })
    }
}

fn normalize_optional(raw: Option<String>) -> Option<String> {
    raw.map(|s| s.trim().to_owned()).filter(|s| !s.is_empty())
}

pub fn default_settings_path() -> PathBuf {
    #[cfg(target_os = "windows")]
    {
        std::env::var_os("APPDATA")
            .map(PathBuf::from)
            .unwrap_or_else(|| PathBuf::from("."))
            .join("Lattice Labs")
            .join("Parley")
            .join("settings.json")
    }
    #[cfg(not(target_os = "windows"))]
    {
        std::env::var_os("XDG_DATA_HOME")
            .map(PathBuf::from)
            .unwrap_or_else(|| {
                std::env::var_os("HOME")
                    .map(PathBuf::from)
                    .unwrap_or_else(|| PathBuf::from("/tmp"))
                    .join(".local")
                    .join("share")
            })
            .join("parley")
            .join("settings.json")
    }
}

pub fn load_settings(path: &Path) -> AppSettings {
    let mut settings = fs::read_to_string(path)
        .ok()
        .and_then(|raw| serde_json::from_str::<AppSettings>(&raw).ok())
        .unwrap_or_default();
    settings.normalize();
    settings
}

/// Write via a sibling temp file and rename, so a crash never leaves a
/// truncated settings file behind.
pub fn save_settings(path: &Path, settings: &AppSettings) -> std::io::Result<()> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)?;
    }
    let json = serde_json::to_string_pretty(settings).map_err(std::io::Error::other)?;
    let tmp = path.with_extension("json.tmp");
    fs::write(&tmp, json)?;
    fs::rename(&tmp, path)
}
