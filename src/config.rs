//! Application configuration.
//!
//! [`AppConfig`] is built with chained setters and can be overridden from the
//! environment:
//!
//! | variable          | meaning                                   |
//! |-------------------|-------------------------------------------|
//! | `OIT_MODE`        | initial render mode (`depth-peeling`, ...) |
//! | `OIT_PEEL_CAP`    | maximum peel passes per frame (≥ 1)       |
//! | `OIT_TRANSPARENCY`| material transparency in `[0, 1]`         |
//! | `OIT_MESH`        | STL file to render instead of the knot    |
//! | `OIT_MASK`        | image whose alpha is the cutout mask      |
//! | `OIT_CAPTURE_DIR` | where `F12` writes the target PNGs        |
//!
//! A first positional command-line argument is taken as the mesh path.

use std::fmt;
use std::path::PathBuf;

use glam::Vec4;

use crate::oit::{PeelCap, RenderMode};

/// Background colors cycled with `B`. The first is the default.
pub const BACKGROUND_PRESETS: [Vec4; 4] = [
    Vec4::new(0.1, 0.1, 0.12, 1.0),
    Vec4::new(1.0, 1.0, 1.0, 1.0),
    Vec4::new(0.35, 0.55, 0.75, 1.0),
    Vec4::new(0.0, 0.0, 0.0, 1.0),
];

/// An environment override that could not be applied.
#[derive(Debug, Clone, PartialEq)]
pub enum ConfigError {
    Invalid {
        key: &'static str,
        value: String,
        reason: String,
    },
}

impl fmt::Display for ConfigError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConfigError::Invalid { key, value, reason } => {
                write!(f, "invalid {}='{}': {}", key, value, reason)
            }
        }
    }
}

impl std::error::Error for ConfigError {}

#[derive(Debug, Clone, PartialEq)]
pub struct AppConfig {
    pub title: String,
    pub width: u32,
    pub height: u32,
    pub vsync: bool,
    pub escape_closes: bool,
    pub mode: RenderMode,
    pub transparency: f32,
    pub background: Vec4,
    pub peel_cap: PeelCap,
    /// Mask alpha below this is discarded in alpha-testing mode.
    pub alpha_threshold: f32,
    pub mesh: Option<PathBuf>,
    pub mask: Option<PathBuf>,
    pub capture_dir: PathBuf,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            title: "Transparency".to_string(),
            width: 1280,
            height: 720,
            vsync: true,
            escape_closes: true,
            mode: RenderMode::DepthPeeling,
            transparency: 0.8,
            background: BACKGROUND_PRESETS[0],
            peel_cap: PeelCap::DEFAULT,
            alpha_threshold: 0.5,
            mesh: None,
            mask: None,
            capture_dir: PathBuf::from("captures"),
        }
    }
}

impl AppConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn title(mut self, title: impl Into<String>) -> Self {
        self.title = title.into();
        self
    }

    pub fn size(mut self, width: u32, height: u32) -> Self {
        self.width = width;
        self.height = height;
        self
    }

    pub fn vsync(mut self, vsync: bool) -> Self {
        self.vsync = vsync;
        self
    }

    pub fn escape_closes(mut self, escape_closes: bool) -> Self {
        self.escape_closes = escape_closes;
        self
    }

    pub fn mode(mut self, mode: RenderMode) -> Self {
        self.mode = mode;
        self
    }

    /// Clamped to `[0, 1]`.
    pub fn transparency(mut self, transparency: f32) -> Self {
        self.transparency = transparency.clamp(0.0, 1.0);
        self
    }

    pub fn background(mut self, background: Vec4) -> Self {
        self.background = background;
        self
    }

    pub fn peel_cap(mut self, cap: PeelCap) -> Self {
        self.peel_cap = cap;
        self
    }

    pub fn alpha_threshold(mut self, threshold: f32) -> Self {
        self.alpha_threshold = threshold;
        self
    }

    pub fn mesh(mut self, path: impl Into<PathBuf>) -> Self {
        self.mesh = Some(path.into());
        self
    }

    pub fn mask(mut self, path: impl Into<PathBuf>) -> Self {
        self.mask = Some(path.into());
        self
    }

    pub fn capture_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.capture_dir = dir.into();
        self
    }

    /// Defaults with `OIT_*` variables and the first CLI argument applied.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::default().with_overrides(|key| std::env::var(key).ok(), std::env::args().nth(1))
    }

    /// Applies overrides read through `lookup`; `mesh_arg` wins over `OIT_MESH`.
    pub fn with_overrides(
        mut self,
        lookup: impl Fn(&str) -> Option<String>,
        mesh_arg: Option<String>,
    ) -> Result<Self, ConfigError> {
        if let Some(value) = lookup("OIT_MODE") {
            self.mode = value.parse().map_err(|e: crate::oit::ParseModeError| {
                invalid("OIT_MODE", &value, e.to_string())
            })?;
        }

        if let Some(value) = lookup("OIT_PEEL_CAP") {
            let cap = value
                .trim()
                .parse::<u32>()
                .map_err(|e| invalid("OIT_PEEL_CAP", &value, e.to_string()))?;
            self.peel_cap = PeelCap::new(cap)
                .ok_or_else(|| invalid("OIT_PEEL_CAP", &value, "must be at least 1".into()))?;
        }

        if let Some(value) = lookup("OIT_TRANSPARENCY") {
            let t = value
                .trim()
                .parse::<f32>()
                .map_err(|e| invalid("OIT_TRANSPARENCY", &value, e.to_string()))?;
            if !(0.0..=1.0).contains(&t) {
                return Err(invalid("OIT_TRANSPARENCY", &value, "must be in [0, 1]".into()));
            }
            self.transparency = t;
        }

        if let Some(path) = mesh_arg.or_else(|| lookup("OIT_MESH")) {
            self.mesh = Some(PathBuf::from(path));
        }
        if let Some(path) = lookup("OIT_MASK") {
            self.mask = Some(PathBuf::from(path));
        }
        if let Some(dir) = lookup("OIT_CAPTURE_DIR") {
            self.capture_dir = PathBuf::from(dir);
        }

        Ok(self)
    }
}

fn invalid(key: &'static str, value: &str, reason: String) -> ConfigError {
    ConfigError::Invalid {
        key,
        value: value.to_string(),
        reason,
    }
}
