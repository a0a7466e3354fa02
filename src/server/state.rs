use tokio::sync::Mutex;

use crate::fonts::FontCache;
use crate::settings::Settings;

/// Shared by every request. Fonts parsed once stay cached for the life of
/// the server.
pub struct ServerState {
    pub(crate) settings: Settings,
    pub(crate) gemini_key: Option<String>,
    pub(crate) clipdrop_key: Option<String>,
    pub(crate) fonts: Mutex<FontCache>,
}

impl ServerState {
    pub fn new(
        settings: Settings,
        gemini_key: Option<String>,
        clipdrop_key: Option<String>,
    ) -> Self {
        Self {
            settings,
            gemini_key,
            clipdrop_key,
            fonts: Mutex::new(FontCache::new()),
        }
    }
}
