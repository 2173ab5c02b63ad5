//! Domain classification: mapping a tab location to an attribution key.
//!
//! Classification is the join key for every aggregate, so it is pure, total
//! and deterministic. Rules are applied in order, first match wins:
//!
//! 1. Absent, empty or `about:blank` locations map to [`EMPTY_TAB_KEY`].
//! 2. Browser-internal pages map to `"<Browser>: <page>"`.
//! 3. Extension pages map to `"<Browser> Extension"`.
//! 4. `file:` URLs map to [`LOCAL_FILE_KEY`].
//! 5. Parsable URLs map to their hostname, or `"<scheme>: (no host)"`.
//! 6. Anything else maps to `"Unparsable: <prefix>"`.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use url::Url;

use crate::types::{AttributionKey, ValidationError};

/// Key for blank and new-tab pages.
pub const EMPTY_TAB_KEY: &str = "Empty / New Tab";

/// Key for local files.
pub const LOCAL_FILE_KEY: &str = "Local File";

/// Maximum number of characters of a raw location embedded in a fallback key.
pub const MAX_FALLBACK_CHARS: usize = 50;

const BLANK_PAGE: &str = "about:blank";
const FILE_SCHEME: &str = "file:";

/// The browser whose internal URL schemes the classifier understands.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BrowserProfile {
    #[default]
    Firefox,
    Chromium,
}

impl BrowserProfile {
    /// Human-readable browser name used in synthetic keys.
    pub const fn display_name(self) -> &'static str {
        match self {
            Self::Firefox => "Firefox",
            Self::Chromium => "Chrome",
        }
    }

    /// Prefix of browser-internal pages (settings, new tab, etc.).
    pub const fn internal_prefix(self) -> &'static str {
        match self {
            Self::Firefox => "about:",
            Self::Chromium => "chrome://",
        }
    }

    /// Prefix of pages served by browser extensions.
    pub const fn extension_prefix(self) -> &'static str {
        match self {
            Self::Firefox => "moz-extension:",
            Self::Chromium => "chrome-extension:",
        }
    }

    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Firefox => "firefox",
            Self::Chromium => "chromium",
        }
    }
}

impl fmt::Display for BrowserProfile {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for BrowserProfile {
    type Err = ValidationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "firefox" => Ok(Self::Firefox),
            "chromium" | "chrome" => Ok(Self::Chromium),
            _ => Err(ValidationError::InvalidBrowser {
                value: s.to_string(),
            }),
        }
    }
}

/// The category a location falls into.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PageKind {
    /// Blank or new-tab page.
    Blank,
    /// Browser-internal page.
    Internal,
    /// Page served by an extension (including the blocking page).
    Extension,
    /// Local file.
    LocalFile,
    /// Ordinary web page with a hostname.
    Web,
    /// Parsable URL without a hostname (`data:`, `mailto:`, ...).
    NoHost,
    /// Location that could not be parsed.
    Unparsable,
}

impl PageKind {
    /// Only ordinary web pages are subject to limits.
    pub const fn is_blockable(self) -> bool {
        matches!(self, Self::Web)
    }
}

/// Result of classifying a location.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClassifiedPage {
    pub kind: PageKind,
    pub key: AttributionKey,
}

/// Maps raw locations to attribution keys for one browser profile.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Classifier {
    profile: BrowserProfile,
}

impl Classifier {
    pub const fn new(profile: BrowserProfile) -> Self {
        Self { profile }
    }

    pub const fn profile(&self) -> BrowserProfile {
        self.profile
    }

    /// Returns the attribution key for a location.
    pub fn classify(&self, location: Option<&str>) -> AttributionKey {
        self.classify_page(location).key
    }

    /// Returns the attribution key together with the page kind.
    pub fn classify_page(&self, location: Option<&str>) -> ClassifiedPage {
        let location = location.map(str::trim).unwrap_or_default();
        let browser = self.profile.display_name();

        if location.is_empty() || location == BLANK_PAGE {
            return page(PageKind::Blank, EMPTY_TAB_KEY.to_string());
        }

        if let Some(rest) = location.strip_prefix(self.profile.internal_prefix()) {
            let name = rest
                .split(['#', '?'])
                .next()
                .unwrap_or_default()
                .trim_end_matches('/');
            return page(PageKind::Internal, format!("{browser}: {name}"));
        }

        if location.starts_with(self.profile.extension_prefix()) {
            return page(PageKind::Extension, format!("{browser} Extension"));
        }

        if location.starts_with(FILE_SCHEME) {
            return page(PageKind::LocalFile, LOCAL_FILE_KEY.to_string());
        }

        match Url::parse(location) {
            Ok(url) => match url.host_str() {
                Some(host) if !host.is_empty() => page(PageKind::Web, host.to_string()),
                _ => page(PageKind::NoHost, format!("{}: (no host)", url.scheme())),
            },
            Err(_) => {
                let prefix: String = location.chars().take(MAX_FALLBACK_CHARS).collect();
                page(PageKind::Unparsable, format!("Unparsable: {prefix}"))
            }
        }
    }
}

fn page(kind: PageKind, key: String) -> ClassifiedPage {
    ClassifiedPage {
        kind,
        key: AttributionKey::synthetic(key),
    }
}
