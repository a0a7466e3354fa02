use std::path::{Path, PathBuf};

pub(crate) const BASE_DIR_ENV: &str = "CARD_TRANSLATOR_DIR";
const DEFAULT_DIR_NAME: &str = ".card-translator";

/// Directory holding settings files and caches.
pub(crate) fn base_dir() -> Option<PathBuf> {
    if let Some(dir) = base_dir_override() {
        return Some(dir);
    }
    home_join(DEFAULT_DIR_NAME)
}

pub(crate) fn font_cache_dir() -> PathBuf {
    base_dir()
        .map(|dir| dir.join(".cache/fonts"))
        .unwrap_or_else(|| PathBuf::from(DEFAULT_DIR_NAME).join(".cache/fonts"))
}

fn base_dir_override() -> Option<PathBuf> {
    std::env::var(BASE_DIR_ENV)
        .ok()
        .and_then(|value| normalize_dir(&value))
}

fn home_join(suffix: &str) -> Option<PathBuf> {
    std::env::var("HOME").ok().and_then(|home| {
        let home = home.trim();
        if home.is_empty() {
            None
        } else {
            Some(Path::new(home).join(suffix))
        }
    })
}

pub(crate) fn normalize_dir(value: &str) -> Option<PathBuf> {
    let trimmed = value.trim();
    if trimmed.is_empty() {
        return None;
    }
    let expanded = expand_tilde(trimmed);
    let mut normalized = PathBuf::new();
    for component in Path::new(&expanded).components() {
        normalized.push(component.as_os_str());
    }
    Some(normalized)
}

fn expand_tilde(value: &str) -> String {
    if value == "~" || value.starts_with("~/") {
        if let Ok(home) = std::env::var("HOME") {
            let home = home.trim();
            if home.is_empty() {
                return value.to_string();
            }
            if value == "~" {
                return home.to_string();
            }
            return format!("{}{}", home, &value[1..]);
        }
    }
    value.to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_util::with_temp_home;

    #[test]
    fn font_cache_lives_under_home() {
        with_temp_home(|home| {
            assert_eq!(
                font_cache_dir(),
                home.join(".card-translator").join(".cache/fonts")
            );
        });
    }

    #[test]
    fn tilde_expands_to_home() {
        with_temp_home(|home| {
            assert_eq!(normalize_dir("~/fonts"), Some(home.join("fonts")));
            assert_eq!(normalize_dir("   "), None);
        });
    }
}
