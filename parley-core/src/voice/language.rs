//! Capture language selection.
//!
//! A reachable device may ask the recognizer for any supported language. An
//! unreachable one is restricted to its own default language, since remote
//! language models cannot be fetched offline.

use std::fmt;
use std::hash::{Hash, Hasher};

use serde::{Deserialize, Serialize};

/// A BCP 47 language tag. Two languages are equal when their primary subtags
/// match, so `en-US` and `en-GB` are the same language.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Language {
    tag: String,
}

impl Language {
    pub fn new(tag: &str) -> Self {
        Self {
            tag: tag.trim().replace('_', "-"),
        }
    }

    pub fn tag(&self) -> &str {
        &self.tag
    }

    /// Lowercased primary subtag (`"en"` for `"en-US"`).
    pub fn primary(&self) -> String {
        self.tag
            .split('-')
            .next()
            .unwrap_or_default()
            .to_ascii_lowercase()
    }
}

impl PartialEq for Language {
    fn eq(&self, other: &Self) -> bool {
        self.primary() == other.primary()
    }
}

impl Eq for Language {}

impl Hash for Language {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.primary().hash(state);
    }
}

impl fmt::Display for Language {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.tag)
    }
}

/// Options handed to the capture engine when a listening attempt starts.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ListenOptions {
    /// `None` means the recognizer uses the device default.
    pub language: Option<Language>,
    pub partial_results: bool,
}

impl Default for ListenOptions {
    fn default() -> Self {
        Self {
            language: None,
            partial_results: true,
        }
    }
}

pub fn listen_options(reachable: bool, preferred: &Language) -> ListenOptions {
    ListenOptions {
        language: reachable.then(|| preferred.clone()),
        partial_results: true,
    }
}

pub fn available_languages(
    reachable: bool,
    supported: &[Language],
    device: &Language,
) -> Vec<Language> {
    if reachable {
        let mut out: Vec<Language> = Vec::with_capacity(supported.len());
        for language in supported {
            if !out.contains(language) {
                out.push(language.clone());
            }
        }
        out
    } else {
        vec![device.clone()]
    }
}
