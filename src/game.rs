use url::Url;

use crate::GAME_HOST;
use crate::types::SourceScope;

/// Game pages the tracker runs on.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GameKind {
    Plinko,
    Keno,
}

impl GameKind {
    /// Classify a page URL. Only `https://duel.com/plinko` and
    /// `https://duel.com/keno` (optionally followed by a path, query or
    /// fragment) qualify.
    pub fn from_url(raw: &str) -> Option<Self> {
        let url = Url::parse(raw).ok()?;
        if url.scheme() != "https" || url.host_str() != Some(GAME_HOST) {
            return None;
        }
        match url.path_segments()?.next()? {
            "plinko" => Some(GameKind::Plinko),
            "keno" => Some(GameKind::Keno),
            _ => None,
        }
    }

    /// Dedup scope of the game's result markers.
    pub fn scope(self) -> SourceScope {
        match self {
            GameKind::Plinko => SourceScope::Plinko,
            GameKind::Keno => SourceScope::Keno,
        }
    }
}
