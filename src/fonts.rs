use anyhow::{Context, Result, anyhow};
use std::collections::HashMap;
use std::future::Future;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::pin::Pin;
use std::sync::Arc;
use tracing::{debug, info};

use crate::error::CardError;
use crate::overlay::{FontFace, load_font_face, load_font_face_from_data, load_system_font_face};
use crate::settings::Settings;

pub type LoaderFuture<'a> = Pin<Box<dyn Future<Output = Result<PathBuf>> + Send + 'a>>;

/// Resolves a resource id to a file on local storage, fetching it once.
pub trait ResourceLoader: Send + Sync {
    fn is_cached(&self, id: &str) -> bool;
    fn fetch<'a>(&'a self, id: &'a str) -> LoaderFuture<'a>;
}

/// Downloads fonts by name into a cache directory. Writes go through a temp
/// file in the same directory, so a concurrent fetch of the same font only
/// wastes bandwidth.
#[derive(Debug, Clone)]
pub struct RemoteFontLoader {
    cache_dir: PathBuf,
    sources: HashMap<String, String>,
    client: reqwest::Client,
}

impl RemoteFontLoader {
    pub fn new(cache_dir: impl Into<PathBuf>) -> Self {
        Self {
            cache_dir: cache_dir.into(),
            sources: HashMap::new(),
            client: reqwest::Client::new(),
        }
    }

    pub fn with_source(mut self, id: impl Into<String>, url: impl Into<String>) -> Self {
        self.sources.insert(id.into(), url.into());
        self
    }

    pub fn from_settings(settings: &Settings) -> Self {
        let loader = Self::new(settings.font_cache_dir());
        match settings.font_url.as_deref() {
            Some(url) => loader.with_source(settings.font_name.clone(), url),
            None => loader,
        }
    }

    pub fn local_path(&self, id: &str) -> PathBuf {
        self.cache_dir.join(format!("{}.ttf", cache_file_stem(id)))
    }

    async fn download(&self, id: &str) -> Result<PathBuf> {
        let path = self.local_path(id);
        if self.is_cached(id) {
            debug!("font '{}' already cached at {}", id, path.display());
            return Ok(path);
        }
        let url = self
            .sources
            .get(id)
            .ok_or_else(|| anyhow!("no download source configured for font '{}'", id))?;
        info!("downloading font '{}' from {}", id, url);
        let response = self
            .client
            .get(url)
            .send()
            .await
            .with_context(|| format!("failed to request font: {}", url))?;
        let status = response.status();
        if !status.is_success() {
            return Err(anyhow!("font download failed ({}): {}", status, url));
        }
        let bytes = response
            .bytes()
            .await
            .with_context(|| "failed to read font download")?;
        load_font_face_from_data(bytes.to_vec(), None)
            .with_context(|| format!("downloaded data for '{}' is not a font", id))?;
        store_atomically(&self.cache_dir, &path, &bytes)?;
        Ok(path)
    }
}

impl ResourceLoader for RemoteFontLoader {
    fn is_cached(&self, id: &str) -> bool {
        std::fs::metadata(self.local_path(id))
            .map(|meta| meta.is_file() && meta.len() > 0)
            .unwrap_or(false)
    }

    fn fetch<'a>(&'a self, id: &'a str) -> LoaderFuture<'a> {
        Box::pin(self.download(id))
    }
}

fn store_atomically(dir: &Path, path: &Path, bytes: &[u8]) -> Result<()> {
    std::fs::create_dir_all(dir)
        .with_context(|| format!("failed to create font cache: {}", dir.display()))?;
    let mut file = tempfile::Builder::new()
        .prefix(".font-")
        .suffix(".part")
        .tempfile_in(dir)?;
    file.write_all(bytes)
        .with_context(|| "failed to write font download")?;
    file.persist(path)
        .map_err(|err| anyhow!("failed to store font {}: {}", path.display(), err))?;
    Ok(())
}

fn cache_file_stem(id: &str) -> String {
    let stem: String = id
        .trim()
        .chars()
        .map(|ch| {
            if ch.is_ascii_alphanumeric() || matches!(ch, '-' | '_' | '.') {
                ch
            } else {
                '_'
            }
        })
        .collect();
    if stem.is_empty() {
        "font".to_string()
    } else {
        stem
    }
}

/// Parsed fonts keyed by name, kept for as long as the cache lives.
#[derive(Debug, Default)]
pub struct FontCache {
    loaded: HashMap<String, Arc<FontFace>>,
}

impl FontCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, id: &str) -> Option<Arc<FontFace>> {
        self.loaded.get(id).cloned()
    }

    pub fn insert(&mut self, id: impl Into<String>, face: FontFace) -> Arc<FontFace> {
        let face = Arc::new(face);
        self.loaded.insert(id.into(), face.clone());
        face
    }

    pub async fn get_or_load<L: ResourceLoader + ?Sized>(
        &mut self,
        id: &str,
        loader: &L,
    ) -> Result<Arc<FontFace>, CardError> {
        if let Some(face) = self.get(id) {
            return Ok(face);
        }
        let path = loader
            .fetch(id)
            .await
            .map_err(|err| CardError::font_unavailable(id, format!("{:#}", err)))?;
        let face =
            load_font_face(&path).map_err(|err| CardError::font_unavailable(id, format!("{:#}", err)))?;
        Ok(self.insert(id, face))
    }
}

/// Picks the font the settings ask for: an explicit file, then a cached or
/// downloadable named font, then an installed system family.
pub async fn resolve_font(
    settings: &Settings,
    cache: &mut FontCache,
) -> Result<Arc<FontFace>, CardError> {
    let id = settings.font_name.as_str();
    if let Some(face) = cache.get(id) {
        return Ok(face);
    }
    if let Some(path) = settings.font_path.as_deref() {
        let face = load_font_face(Path::new(path))
            .map_err(|err| CardError::font_unavailable(id, format!("{:#}", err)))?;
        return Ok(cache.insert(id, face));
    }
    let loader = RemoteFontLoader::from_settings(settings);
    if loader.is_cached(id) || settings.font_url.is_some() {
        return cache.get_or_load(id, &loader).await;
    }
    let face =
        load_system_font_face(id).map_err(|err| CardError::font_unavailable(id, format!("{:#}", err)))?;
    Ok(cache.insert(id, face))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct CountingLoader {
        path: PathBuf,
        calls: AtomicUsize,
    }

    impl ResourceLoader for CountingLoader {
        fn is_cached(&self, _id: &str) -> bool {
            false
        }

        fn fetch<'a>(&'a self, _id: &'a str) -> LoaderFuture<'a> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            let path = self.path.clone();
            Box::pin(async move { Ok(path) })
        }
    }

    #[test]
    fn cache_file_names_are_sanitized() {
        let loader = RemoteFontLoader::new("/tmp/fonts");
        assert_eq!(
            loader.local_path("Noto Sans/TC"),
            PathBuf::from("/tmp/fonts/Noto_Sans_TC.ttf")
        );
        assert_eq!(loader.local_path("  "), PathBuf::from("/tmp/fonts/font.ttf"));
    }

    #[tokio::test]
    async fn cached_font_is_not_fetched_again() {
        let dir = tempfile::tempdir().unwrap();
        let loader = RemoteFontLoader::new(dir.path());
        assert!(!loader.is_cached("Local"));
        std::fs::write(loader.local_path("Local"), b"bytes").unwrap();
        assert!(loader.is_cached("Local"));
        // No source is configured, so this only succeeds without a download.
        let path = loader.fetch("Local").await.unwrap();
        assert_eq!(path, loader.local_path("Local"));
    }

    #[tokio::test]
    async fn unknown_font_without_source_fails() {
        let dir = tempfile::tempdir().unwrap();
        let loader = RemoteFontLoader::new(dir.path());
        let err = loader.fetch("Missing").await.unwrap_err();
        assert!(err.to_string().contains("no download source"));
    }

    #[tokio::test]
    async fn corrupt_font_surfaces_as_unavailable() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("broken.ttf");
        std::fs::write(&path, b"not a font").unwrap();
        let loader = CountingLoader {
            path,
            calls: AtomicUsize::new(0),
        };
        let mut cache = FontCache::new();
        let err = cache.get_or_load("Broken", &loader).await.unwrap_err();
        match err {
            CardError::FontUnavailable { font, reason } => {
                assert_eq!(font, "Broken");
                assert!(reason.contains("failed to parse font"));
            }
            other => panic!("unexpected error: {other:?}"),
        }
        assert!(cache.get("Broken").is_none());
        let _ = cache.get_or_load("Broken", &loader).await;
        assert_eq!(loader.calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn explicit_font_path_must_exist() {
        let dir = tempfile::tempdir().unwrap();
        let settings = Settings {
            font_path: Some(dir.path().join("nope.ttf").display().to_string()),
            ..Settings::default()
        };
        let mut cache = FontCache::new();
        let err = resolve_font(&settings, &mut cache).await.unwrap_err();
        assert!(matches!(err, CardError::FontUnavailable { .. }));
    }
}
