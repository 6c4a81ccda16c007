use anyhow::{Context, Result};
use common::{
    ChangeType, Color, Placement, Rect, ScreenSettings, ScreenSettingsCollection, Wallpaper,
};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;
use crate::validate_enum;

/// Main configuration structure
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct Config {
    #[serde(default)]
    pub general: GeneralSettings,

    #[serde(default)]
    pub cycle: CycleSettings,

    #[serde(default)]
    pub library: LibrarySettings,

    /// Explicitly configured wallpapers
    #[serde(default)]
    pub wallpaper: Vec<Wallpaper>,

    /// Screen layout; a single 1920x1080 screen when empty
    #[serde(default)]
    pub screen: Vec<ScreenSettings>,
}

/// General settings
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct GeneralSettings {
    #[serde(default = "default_log_level")]
    pub log_level: String,
}

impl Default for GeneralSettings {
    fn default() -> Self {
        Self {
            log_level: default_log_level(),
        }
    }
}

fn default_log_level() -> String {
    "info".to_string()
}

/// Cycling behavior
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct CycleSettings {
    #[serde(default = "default_true")]
    pub autocycle: bool,

    /// Seconds between automatic cycles
    #[serde(default = "default_interval")]
    pub interval: u64,

    #[serde(default)]
    pub change_type: ChangeType,

    /// Size of the repeat-avoidance window, in percent of usable wallpapers
    #[serde(default = "default_history_percentage")]
    pub history_percentage: u8,

    #[serde(default = "default_true")]
    pub cycle_on_start: bool,

    #[serde(default)]
    pub cycle_after_display_change: bool,

    #[serde(default = "default_opacity")]
    pub opacity: f32,

    #[serde(default = "default_true")]
    pub high_quality: bool,

    /// Where the composed image is written; defaults to the cache directory
    #[serde(default)]
    pub output_path: Option<String>,

    /// Command applying the image, `{}` is replaced by its path
    #[serde(default)]
    pub apply_command: Option<String>,
}

impl Default for CycleSettings {
    fn default() -> Self {
        Self {
            autocycle: true,
            interval: default_interval(),
            change_type: ChangeType::default(),
            history_percentage: default_history_percentage(),
            cycle_on_start: true,
            cycle_after_display_change: false,
            opacity: default_opacity(),
            high_quality: true,
            output_path: None,
            apply_command: None,
        }
    }
}

impl CycleSettings {
    pub fn interval(&self) -> Duration {
        Duration::from_secs(self.interval)
    }

    /// Resolved output path, tilde expanded.
    pub fn output_path(&self) -> Result<PathBuf> {
        match &self.output_path {
            Some(path) => Ok(expand_path(path)),
            None => Ok(dirs::cache_dir()
                .context("Failed to get cache directory")?
                .join("wallcycle")
                .join("wallpaper.png")),
        }
    }
}

fn default_true() -> bool {
    true
}
fn default_interval() -> u64 {
    1800
} // 30 minutes
fn default_history_percentage() -> u8 {
    30
}
fn default_opacity() -> f32 {
    1.0
}

/// Directories synchronized into the wallpaper library
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct LibrarySettings {
    #[serde(default)]
    pub sources: Vec<String>,

    #[serde(default = "default_extensions")]
    pub extensions: Vec<String>,

    /// Settings given to wallpapers discovered in `sources`
    #[serde(default)]
    pub defaults: WallpaperDefaults,
}

impl Default for LibrarySettings {
    fn default() -> Self {
        Self {
            sources: Vec::new(),
            extensions: default_extensions(),
            defaults: WallpaperDefaults::default(),
        }
    }
}

fn default_extensions() -> Vec<String> {
    vec![
        "jpg".to_string(),
        "jpeg".to_string(),
        "png".to_string(),
        "webp".to_string(),
        "bmp".to_string(),
        "tif".to_string(),
        "tiff".to_string(),
    ]
}

/// Template for discovered wallpapers
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct WallpaperDefaults {
    #[serde(default = "default_priority")]
    pub priority: u8,

    #[serde(default)]
    pub is_multiscreen: bool,

    #[serde(default)]
    pub placement: Placement,

    #[serde(default)]
    pub background_color: Color,

    #[serde(default)]
    pub disabled_screens: BTreeSet<usize>,
}

impl Default for WallpaperDefaults {
    fn default() -> Self {
        Self {
            priority: default_priority(),
            is_multiscreen: false,
            placement: Placement::default(),
            background_color: Color::default(),
            disabled_screens: BTreeSet::new(),
        }
    }
}

fn default_priority() -> u8 {
    100
}

impl WallpaperDefaults {
    /// Build a wallpaper record for a discovered file
    pub fn create(&self, image_path: PathBuf) -> Wallpaper {
        let mut wallpaper = Wallpaper::new(image_path);
        wallpaper.priority = self.priority;
        wallpaper.is_multiscreen = self.is_multiscreen;
        wallpaper.placement = self.placement;
        wallpaper.background_color = self.background_color;
        wallpaper.disabled_screens = self.disabled_screens.clone();
        wallpaper
    }
}

/// Expand `~` in a configured path
pub fn expand_path(path: &str) -> PathBuf {
    PathBuf::from(shellexpand::tilde(path).as_ref())
}

impl Config {
    /// Load configuration from a specific path
    pub fn load_from_path(path: &Path) -> Result<Self> {
        if !path.exists() {
            log::info!(
                "Config file not found at {}, using defaults",
                path.display()
            );
            return Ok(Self::default());
        }

        let contents = fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {}", path.display()))?;

        let config = Self::parse(&contents)
            .with_context(|| format!("Failed to parse config file: {}", path.display()))?;

        log::info!("Loaded configuration from {}", path.display());
        Ok(config)
    }

    /// Parse and validate configuration text
    pub fn parse(contents: &str) -> Result<Self> {
        let mut config: Config = toml::from_str(contents)?;
        config.validate()?;

        for wallpaper in &mut config.wallpaper {
            wallpaper.image_path = expand_path(&wallpaper.image_path.to_string_lossy());
        }
        for screen in &mut config.screen {
            if let Some(wallpaper) = screen.static_wallpaper.as_mut() {
                wallpaper.image_path = expand_path(&wallpaper.image_path.to_string_lossy());
            }
        }

        Ok(config)
    }

    /// Get the default config file path
    pub fn default_config_path() -> Result<PathBuf> {
        let config_dir = dirs::config_dir()
            .context("Failed to get config directory")?
            .join("wallcycle");

        Ok(config_dir.join("config.toml"))
    }

    /// Screen layout as a collection
    pub fn screens(&self) -> ScreenSettingsCollection {
        if self.screen.is_empty() {
            return ScreenSettingsCollection::new(vec![ScreenSettings::new(Rect::new(
                0, 0, 1920, 1080,
            ))]);
        }
        ScreenSettingsCollection::new(self.screen.clone())
    }

    /// Validate configuration
    fn validate(&self) -> Result<()> {
        self.validate_log_level(&self.general.log_level)?;

        if self.cycle.autocycle && self.cycle.interval == 0 {
            anyhow::bail!("Autocycle interval must be at least one second");
        }
        if self.cycle.history_percentage > 100 {
            anyhow::bail!(
                "Invalid history percentage (must be 0-100): {}",
                self.cycle.history_percentage
            );
        }
        if !(0.0..=1.0).contains(&self.cycle.opacity) {
            anyhow::bail!("Invalid opacity (must be 0.0-1.0): {}", self.cycle.opacity);
        }
        if self.library.defaults.priority > 100 {
            anyhow::bail!(
                "Invalid default priority (must be 0-100): {}",
                self.library.defaults.priority
            );
        }

        for wallpaper in &self.wallpaper {
            self.validate_wallpaper(wallpaper)?;
        }

        for (index, screen) in self.screen.iter().enumerate() {
            if screen.bounds.width == 0 || screen.bounds.height == 0 {
                anyhow::bail!("Screen {} has an empty size", index);
            }
            if let Some(ref wallpaper) = screen.static_wallpaper {
                self.validate_wallpaper(wallpaper)?;
            } else if !screen.cycle_randomly {
                log::warn!(
                    "Screen {} neither cycles nor has a static wallpaper, it will stay blank",
                    index
                );
            }
        }

        Ok(())
    }

    fn validate_log_level(&self, level: &str) -> Result<()> {
        validate_enum!(level, "trace", "debug", "info", "warn", "error")
    }

    fn validate_wallpaper(&self, wallpaper: &Wallpaper) -> Result<()> {
        if wallpaper.priority > 100 {
            anyhow::bail!(
                "Invalid priority (must be 0-100) for {}: {}",
                wallpaper.image_path.display(),
                wallpaper.priority
            );
        }
        if !wallpaper.has_valid_cycle_window() {
            anyhow::bail!(
                "Cycle window of {} starts after it stops ({} - {})",
                wallpaper.image_path.display(),
                wallpaper.only_cycle_between_start,
                wallpaper.only_cycle_between_stop
            );
        }
        Ok(())
    }
}
