//! Color tokens and palettes.
//!
//! Colors are written `#rrggbb` in memory, but `#` is not a valid key
//! character for the store, so a lock key uses the token with the prefix
//! stripped. [`Color::storage_token`] and [`Palette::resolve`] are the only
//! places that convert between the two forms.

use std::collections::{HashSet, VecDeque};

use serde::{Deserialize, Serialize};

use crate::error::ConfigError;
use crate::locks::LockTable;

/// Prefix used for in-memory color tokens and stripped for storage.
pub const DECORATIVE_PREFIX: char = '#';

/// Built-in palette.
pub const DEFAULT_COLORS: [&str; 12] = [
    "#f5a623", "#7ed321", "#4a90e2", "#bd10e0", "#d0021b", "#50e3c2",
    "#9013fe", "#f8e71c", "#417505", "#8b572a", "#e27e4a", "#b8e986",
];

/// Shared fallback color once the palette is exhausted.
pub const DEFAULT_COLOR: &str = "#cccccc";

/// A display color token.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Color(String);

impl Color {
    /// Create a color from its in-memory form.
    pub fn new(token: impl Into<String>) -> Self {
        Self(token.into())
    }

    /// Rebuild a color from a lock key segment.
    pub fn from_storage_token(token: &str) -> Self {
        Self(format!("{DECORATIVE_PREFIX}{token}"))
    }

    /// The in-memory form.
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// The form used as a lock key segment.
    pub fn storage_token(&self) -> &str {
        self.0.strip_prefix(DECORATIVE_PREFIX).unwrap_or(&self.0)
    }
}

impl std::fmt::Display for Color {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.pad(&self.0)
    }
}

impl From<&str> for Color {
    fn from(s: &str) -> Self {
        Self::new(s)
    }
}

impl From<String> for Color {
    fn from(s: String) -> Self {
        Self(s)
    }
}

/// Check that a color can be used as a lock key segment.
fn check_token(color: &Color) -> Result<(), ConfigError> {
    let invalid = |reason| ConfigError::InvalidColor {
        color: color.to_string(),
        reason,
    };
    if color.as_str().trim().is_empty() {
        return Err(invalid("color must not be blank"));
    }
    let token = color.storage_token();
    if token.is_empty() {
        return Err(invalid("color has nothing after the prefix"));
    }
    if token.contains('/') {
        return Err(invalid("color must not contain '/'"));
    }
    if token.chars().any(char::is_whitespace) {
        return Err(invalid("color must not contain whitespace"));
    }
    Ok(())
}

/// The ordered set of assignable colors plus the shared default.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Palette {
    colors: Vec<Color>,
    default: Color,
}

impl Default for Palette {
    fn default() -> Self {
        Self {
            colors: DEFAULT_COLORS.iter().copied().map(Color::new).collect(),
            default: Color::new(DEFAULT_COLOR),
        }
    }
}

impl Palette {
    /// Build a validated palette.
    pub fn new(colors: Vec<Color>, default: Color) -> Result<Self, ConfigError> {
        if colors.is_empty() {
            return Err(ConfigError::EmptyPalette);
        }

        let mut seen = HashSet::new();
        for color in &colors {
            check_token(color)?;
            if !seen.insert(color.storage_token()) {
                return Err(ConfigError::DuplicateColor {
                    color: color.to_string(),
                });
            }
        }

        check_token(&default)?;
        if seen.contains(default.storage_token()) {
            return Err(ConfigError::DefaultInPalette {
                color: default.to_string(),
            });
        }

        Ok(Self { colors, default })
    }

    /// Palette colors in order.
    pub fn colors(&self) -> &[Color] {
        &self.colors
    }

    /// The shared fallback color.
    pub fn default_color(&self) -> &Color {
        &self.default
    }

    /// Number of palette colors.
    pub fn len(&self) -> usize {
        self.colors.len()
    }

    /// Always false for a validated palette.
    pub fn is_empty(&self) -> bool {
        self.colors.is_empty()
    }

    /// Check palette membership. The default color is not a member.
    pub fn contains(&self, color: &Color) -> bool {
        self.colors.contains(color)
    }

    /// Map a lock key segment back to a color.
    ///
    /// Palette members are returned as configured; unknown tokens get the
    /// decorative prefix back.
    pub fn resolve(&self, token: &str) -> Color {
        self.colors
            .iter()
            .find(|c| c.storage_token() == token)
            .cloned()
            .unwrap_or_else(|| Color::from_storage_token(token))
    }

    /// Palette colors not present in `locks`, in palette order.
    pub fn available(&self, locks: &LockTable) -> VecDeque<Color> {
        self.colors
            .iter()
            .filter(|c| !locks.is_locked(c.storage_token()))
            .cloned()
            .collect()
    }
}
