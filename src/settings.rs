use anyhow::{Context, Result, anyhow};
use serde::Deserialize;
use std::fs;
use std::path::{Path, PathBuf};

use crate::geometry::BoxScale;
use crate::overlay::FitOptions;
use crate::paths;

const DEFAULT_SETTINGS_TOML: &str = include_str!("../settings.toml");

#[derive(Debug, Clone)]
pub struct Settings {
    pub detection_model: String,
    pub box_scale: BoxScale,
    pub cleaning_endpoint: String,
    pub font_name: String,
    pub font_url: Option<String>,
    pub font_path: Option<String>,
    pub font_cache_dir: Option<String>,
    pub layout: FitOptions,
    pub server_addr: String,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            detection_model: "gemini-2.5-pro".to_string(),
            box_scale: BoxScale::PerMille,
            cleaning_endpoint: "https://clipdrop-api.co/cleanup/v1".to_string(),
            font_name: "NotoSansTC-Regular".to_string(),
            font_url: None,
            font_path: None,
            font_cache_dir: None,
            layout: FitOptions::default(),
            server_addr: "127.0.0.1:8787".to_string(),
        }
    }
}

#[derive(Debug, Default, Deserialize)]
struct SettingsFile {
    detection: Option<DetectionSettings>,
    cleaning: Option<CleaningSettings>,
    font: Option<FontSettings>,
    layout: Option<LayoutSettings>,
    server: Option<ServerSettings>,
}

#[derive(Debug, Default, Deserialize)]
struct DetectionSettings {
    model: Option<String>,
    box_scale: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
struct CleaningSettings {
    endpoint: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
struct FontSettings {
    name: Option<String>,
    url: Option<String>,
    path: Option<String>,
    cache_dir: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
struct LayoutSettings {
    step: Option<f32>,
    min_size: Option<f32>,
    line_spacing_ratio: Option<f32>,
}

#[derive(Debug, Default, Deserialize)]
struct ServerSettings {
    addr: Option<String>,
}

pub fn load_settings(extra_path: Option<&Path>) -> Result<Settings> {
    let mut settings = Settings::default();
    let defaults: SettingsFile =
        toml::from_str(DEFAULT_SETTINGS_TOML).with_context(|| "failed to parse built-in settings")?;
    settings.merge(defaults)?;

    let mut ordered_paths = vec![
        PathBuf::from("settings.toml"),
        PathBuf::from("settings.local.toml"),
    ];
    if let Some(base) = paths::base_dir() {
        ordered_paths.push(base.join("settings.toml"));
        ordered_paths.push(base.join("settings.local.toml"));
    }
    if let Some(extra) = extra_path {
        if !extra.exists() {
            return Err(anyhow!("settings file not found: {}", extra.display()));
        }
        ordered_paths.push(extra.to_path_buf());
    }

    for path in ordered_paths {
        if path.exists() {
            let content = fs::read_to_string(&path)
                .with_context(|| format!("failed to read settings: {}", path.display()))?;
            let parsed: SettingsFile = toml::from_str(&content)
                .with_context(|| format!("failed to parse settings: {}", path.display()))?;
            settings
                .merge(parsed)
                .with_context(|| format!("invalid settings: {}", path.display()))?;
        }
    }

    Ok(settings)
}

impl Settings {
    fn merge(&mut self, incoming: SettingsFile) -> Result<()> {
        if let Some(detection) = incoming.detection {
            if let Some(model) = non_empty(detection.model) {
                self.detection_model = model;
            }
            if let Some(scale) = non_empty(detection.box_scale) {
                self.box_scale = BoxScale::parse(&scale)
                    .ok_or_else(|| anyhow!("unknown detection.box_scale '{}'", scale))?;
            }
        }
        if let Some(cleaning) = incoming.cleaning
            && let Some(endpoint) = non_empty(cleaning.endpoint)
        {
            self.cleaning_endpoint = endpoint;
        }
        if let Some(font) = incoming.font {
            if let Some(name) = non_empty(font.name) {
                self.font_name = name;
            }
            if let Some(url) = non_empty(font.url) {
                self.font_url = Some(url);
            }
            if let Some(path) = non_empty(font.path) {
                self.font_path = Some(path);
            }
            if let Some(dir) = non_empty(font.cache_dir) {
                self.font_cache_dir = Some(dir);
            }
        }
        if let Some(layout) = incoming.layout {
            if let Some(step) = layout.step {
                if step <= 0.0 {
                    return Err(anyhow!("layout.step must be positive"));
                }
                self.layout.step = step;
            }
            if let Some(min_size) = layout.min_size {
                if min_size <= 0.0 {
                    return Err(anyhow!("layout.min_size must be positive"));
                }
                self.layout.min_size = min_size;
            }
            if let Some(ratio) = layout.line_spacing_ratio {
                if ratio < 0.0 {
                    return Err(anyhow!("layout.line_spacing_ratio must not be negative"));
                }
                self.layout.line_spacing_ratio = ratio;
            }
        }
        if let Some(server) = incoming.server
            && let Some(addr) = non_empty(server.addr)
        {
            self.server_addr = addr;
        }
        Ok(())
    }

    pub fn font_cache_dir(&self) -> PathBuf {
        self.font_cache_dir
            .as_deref()
            .and_then(paths::normalize_dir)
            .unwrap_or_else(paths::font_cache_dir)
    }
}

fn non_empty(value: Option<String>) -> Option<String> {
    value.filter(|value| !value.trim().is_empty())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_util::with_temp_home;

    #[test]
    fn built_in_defaults_load() {
        with_temp_home(|_| {
            let settings = load_settings(None).unwrap();
            assert_eq!(settings.box_scale, BoxScale::PerMille);
            assert_eq!(settings.layout, FitOptions::default());
            assert!(settings.font_url.is_some());
        });
    }

    #[test]
    fn later_files_override_earlier_ones() {
        with_temp_home(|home| {
            let base = home.join(".card-translator");
            fs::create_dir_all(&base).unwrap();
            fs::write(
                base.join("settings.toml"),
                "[layout]\nstep = 1.0\n[font]\nname = \"Home\"\n",
            )
            .unwrap();
            let extra = home.join("extra.toml");
            fs::write(
                &extra,
                "[font]\nname = \"Extra\"\n[detection]\nbox_scale = \"pixels\"\n",
            )
            .unwrap();

            let settings = load_settings(Some(&extra)).unwrap();
            assert_eq!(settings.layout.step, 1.0);
            assert_eq!(settings.font_name, "Extra");
            assert_eq!(settings.box_scale, BoxScale::Pixels);
        });
    }

    #[test]
    fn rejects_invalid_values() {
        with_temp_home(|home| {
            let extra = home.join("bad.toml");
            fs::write(&extra, "[layout]\nmin_size = 0.0\n").unwrap();
            let err = load_settings(Some(&extra)).unwrap_err();
            assert!(format!("{:#}", err).contains("layout.min_size"));

            fs::write(&extra, "[detection]\nbox_scale = \"furlongs\"\n").unwrap();
            assert!(load_settings(Some(&extra)).is_err());

            assert!(load_settings(Some(&home.join("absent.toml"))).is_err());
        });
    }

    #[test]
    fn cache_dir_override_is_used() {
        with_temp_home(|home| {
            let settings = Settings {
                font_cache_dir: Some("~/my-fonts".to_string()),
                ..Settings::default()
            };
            assert_eq!(settings.font_cache_dir(), home.join("my-fonts"));
        });
    }
}
