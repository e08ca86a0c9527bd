//! Allocator configuration.

use serde::{Deserialize, Serialize};

use crate::color::{Color, Palette, DEFAULT_COLOR, DEFAULT_COLORS};
use crate::error::ConfigError;

/// Participant attribute that carries the assigned color.
pub const USER_PROPERTY: &str = "avatarColor";

/// Store namespace holding the lock table.
pub const KEY_NAMESPACE: &str = "hue/locks";

/// Default bound on lock table re-fetches within one search.
pub const DEFAULT_MAX_REFETCHES: u32 = 8;

/// Configuration for an [`Allocator`](crate::Allocator).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ColorConfig {
    /// Assignable colors, in preference order.
    pub palette: Vec<String>,

    /// Shared fallback once every palette color is locked.
    pub default_color: String,

    /// Participant record attribute holding the color.
    pub attribute: String,

    /// Store namespace of the lock table.
    pub namespace: String,

    /// How many times a search may re-fetch the lock table after every
    /// candidate collided before settling on the default color. At least 1.
    pub max_refetches: u32,
}

impl Default for ColorConfig {
    fn default() -> Self {
        Self {
            palette: DEFAULT_COLORS.iter().map(|c| c.to_string()).collect(),
            default_color: DEFAULT_COLOR.to_string(),
            attribute: USER_PROPERTY.to_string(),
            namespace: KEY_NAMESPACE.to_string(),
            max_refetches: DEFAULT_MAX_REFETCHES,
        }
    }
}

impl ColorConfig {
    /// Defaults overlaid with `HUE_*` environment variables.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|var| std::env::var(var).ok())
    }

    /// Defaults overlaid with values from `lookup`.
    ///
    /// Recognized variables: `HUE_PALETTE` (comma separated),
    /// `HUE_DEFAULT_COLOR`, `HUE_ATTRIBUTE`, `HUE_NAMESPACE` and
    /// `HUE_MAX_REFETCHES`.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut config = Self::default();

        if let Some(palette) = lookup("HUE_PALETTE") {
            config.palette = palette
                .split(',')
                .map(|c| c.trim().to_string())
                .filter(|c| !c.is_empty())
                .collect();
        }
        if let Some(color) = lookup("HUE_DEFAULT_COLOR") {
            config.default_color = color.trim().to_string();
        }
        if let Some(attribute) = lookup("HUE_ATTRIBUTE") {
            config.attribute = attribute.trim().to_string();
        }
        if let Some(namespace) = lookup("HUE_NAMESPACE") {
            config.namespace = namespace.trim().to_string();
        }
        if let Some(value) = lookup("HUE_MAX_REFETCHES") {
            config.max_refetches = value
                .trim()
                .parse()
                .map_err(|_| ConfigError::InvalidEnv {
                    var: "HUE_MAX_REFETCHES",
                    value,
                })?;
        }

        Ok(config)
    }

    /// Parse a JSON document. Missing fields take their defaults.
    pub fn from_json(json: &str) -> Result<Self, ConfigError> {
        Ok(serde_json::from_str(json)?)
    }

    /// Replace the palette.
    #[must_use]
    pub fn with_palette<I, S>(mut self, colors: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.palette = colors.into_iter().map(Into::into).collect();
        self
    }

    /// Replace the default color.
    #[must_use]
    pub fn with_default_color(mut self, color: impl Into<String>) -> Self {
        self.default_color = color.into();
        self
    }

    /// Replace the re-fetch bound.
    #[must_use]
    pub fn with_max_refetches(mut self, max_refetches: u32) -> Self {
        self.max_refetches = max_refetches;
        self
    }

    /// Check the configuration and build its palette.
    pub fn validate(&self) -> Result<Palette, ConfigError> {
        if self.attribute.trim().is_empty() {
            return Err(ConfigError::EmptyAttribute);
        }
        if self.namespace.trim_matches('/').trim().is_empty() {
            return Err(ConfigError::EmptyNamespace);
        }
        if self.max_refetches == 0 {
            return Err(ConfigError::ZeroRefetches);
        }
        Palette::new(
            self.palette.iter().map(|c| Color::new(c.as_str())).collect(),
            Color::new(self.default_color.as_str()),
        )
    }
}
