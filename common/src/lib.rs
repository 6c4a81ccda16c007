//! Common types for wallcycle.
//!
//! This crate defines the data model shared by the cycling daemon and its
//! configuration layer: wallpaper records, screen settings and the error
//! types surfaced by a cycle attempt.
//!
//! # Examples
//!
//! ```
//! use common::{Placement, Wallpaper};
//!
//! let mut wallpaper = Wallpaper::new("/path/to/image.png");
//! wallpaper.priority = 40;
//! wallpaper.placement = Placement::Uniform;
//!
//! assert!(wallpaper.is_selectable());
//! ```

use bitflags::bitflags;
use chrono::{NaiveTime, Timelike};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::fmt;
use std::path::PathBuf;
use thiserror::Error;

/// Why a selection could not be satisfied.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ShortfallReason {
    /// No activated record with a nonzero priority exists.
    EmptyPool,
    /// The pool filtered by the chosen mode is smaller than the requirement.
    ModeShortfall { available: usize, required: usize },
    /// A single screen slot cannot be filled.
    ScreenShortfall {
        screen: usize,
        available: usize,
        required: usize,
    },
    /// The pick loop ran out of records after the feasibility check passed.
    PoolExhausted,
}

impl fmt::Display for ShortfallReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::EmptyPool => write!(f, "no activated wallpaper with a nonzero priority"),
            Self::ModeShortfall {
                available,
                required,
            } => write!(f, "{} usable wallpapers, {} required", available, required),
            Self::ScreenShortfall {
                screen,
                available,
                required,
            } => write!(
                f,
                "screen {} has {} usable wallpapers, {} required",
                screen, available, required
            ),
            Self::PoolExhausted => write!(f, "candidate pool exhausted while picking"),
        }
    }
}

/// Errors raised by the selection engine.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum SelectionError {
    #[error("Not enough wallpapers to cycle: {0}")]
    InsufficientCandidates(ShortfallReason),
}

/// Errors raised synchronously by a cycle attempt.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum CycleError {
    #[error("No wallpapers were provided for cycling")]
    NoWallpapersProvided,

    #[error("A wallpaper is already being built")]
    CyclingInProgress,

    #[error("Not enough usable wallpapers for the current screen setup")]
    InsufficientCandidates,

    #[error(transparent)]
    Selection(#[from] SelectionError),
}

/// RGBA color, written as `"RRGGBB"` or `"RRGGBBAA"` (optional `#`).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct Color {
    pub r: u8,
    pub g: u8,
    pub b: u8,
    pub a: u8,
}

impl Color {
    pub const BLACK: Self = Self::rgb(0, 0, 0);

    pub const fn rgb(r: u8, g: u8, b: u8) -> Self {
        Self { r, g, b, a: 255 }
    }

    /// Parse a hex color, with or without alpha.
    pub fn parse_hex(hex: &str) -> Option<Self> {
        let hex = hex.trim_start_matches('#');
        if hex.len() != 6 && hex.len() != 8 {
            return None;
        }

        let channel = |i: usize| u8::from_str_radix(hex.get(i..i + 2)?, 16).ok();
        let a = if hex.len() == 8 { channel(6)? } else { 255 };

        Some(Self {
            r: channel(0)?,
            g: channel(2)?,
            b: channel(4)?,
            a,
        })
    }

    pub fn to_array(self) -> [u8; 4] {
        [self.r, self.g, self.b, self.a]
    }
}

impl Default for Color {
    fn default() -> Self {
        Self::BLACK
    }
}

impl TryFrom<String> for Color {
    type Error = String;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::parse_hex(&value).ok_or_else(|| format!("Invalid color: {}", value))
    }
}

impl From<Color> for String {
    fn from(color: Color) -> Self {
        if color.a == 255 {
            format!("{:02X}{:02X}{:02X}", color.r, color.g, color.b)
        } else {
            format!(
                "{:02X}{:02X}{:02X}{:02X}",
                color.r, color.g, color.b, color.a
            )
        }
    }
}

/// How an image is placed inside its target rectangle.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Placement {
    /// Repeat the image from the top-left corner
    Tile,
    /// Center the image without scaling
    Center,
    /// Stretch to the target, ignoring aspect ratio
    Stretch,
    /// Scale to fit inside the target (may letterbox)
    Uniform,
    /// Scale to cover the target (may crop)
    #[default]
    UniformToFill,
}

bitflags! {
    /// Image effects applied before placement.
    #[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
    pub struct WallpaperEffects: u8 {
        const FLIP_HORIZONTAL = 1 << 0;
        const FLIP_VERTICAL = 1 << 1;
        /// Left half mirrored onto the right half
        const MIRROR_LEFT = 1 << 2;
        /// Right half mirrored onto the left half
        const MIRROR_RIGHT = 1 << 3;
        /// Top half mirrored onto the bottom half
        const MIRROR_TOP = 1 << 4;
        /// Bottom half mirrored onto the top half
        const MIRROR_BOTTOM = 1 << 5;
    }
}

/// Serde helpers for time-of-day values written as `HH:MM` or `HH:MM:SS`.
pub mod time_of_day {
    use chrono::NaiveTime;
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn parse(value: &str) -> Option<NaiveTime> {
        NaiveTime::parse_from_str(value, "%H:%M:%S")
            .or_else(|_| NaiveTime::parse_from_str(value, "%H:%M"))
            .ok()
    }

    pub fn serialize<S: Serializer>(time: &NaiveTime, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&time.format("%H:%M:%S").to_string())
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<NaiveTime, D::Error> {
        let value = String::deserialize(deserializer)?;
        parse(&value).ok_or_else(|| {
            serde::de::Error::custom(format!(
                "Invalid time: {} (expected HH:MM or HH:MM:SS)",
                value
            ))
        })
    }
}

fn default_true() -> bool {
    true
}
fn default_priority() -> u8 {
    100
}
fn default_scale() -> (i32, i32) {
    (0, 0)
}
fn default_cycle_start() -> NaiveTime {
    NaiveTime::MIN
}
fn default_cycle_stop() -> NaiveTime {
    NaiveTime::from_hms_opt(23, 59, 59).unwrap_or(NaiveTime::MIN)
}

/// A wallpaper record and its cycling configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Wallpaper {
    /// Path to the image file
    pub image_path: PathBuf,

    /// Pixel dimensions, filled in when the file is inspected
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub image_size: Option<(u32, u32)>,

    #[serde(default = "default_true")]
    pub is_activated: bool,

    /// Spans all screens instead of covering one
    #[serde(default)]
    pub is_multiscreen: bool,

    /// Selection weight; 0 never gets picked
    #[serde(default = "default_priority")]
    pub priority: u8,

    #[serde(default)]
    pub placement: Placement,

    /// Pixel offset applied after placement
    #[serde(default)]
    pub offset: (i32, i32),

    /// Pixels added to the placed width and height
    #[serde(default = "default_scale")]
    pub scale: (i32, i32),

    #[serde(default)]
    pub effects: WallpaperEffects,

    #[serde(default)]
    pub background_color: Color,

    /// Screen indices this wallpaper is never cycled onto
    #[serde(default)]
    pub disabled_screens: BTreeSet<usize>,

    #[serde(default = "default_cycle_start", with = "time_of_day")]
    pub only_cycle_between_start: NaiveTime,

    #[serde(default = "default_cycle_stop", with = "time_of_day")]
    pub only_cycle_between_stop: NaiveTime,
}

impl Wallpaper {
    pub fn new(image_path: impl Into<PathBuf>) -> Self {
        Self {
            image_path: image_path.into(),
            image_size: None,
            is_activated: true,
            is_multiscreen: false,
            priority: default_priority(),
            placement: Placement::default(),
            offset: (0, 0),
            scale: default_scale(),
            effects: WallpaperEffects::empty(),
            background_color: Color::default(),
            disabled_screens: BTreeSet::new(),
            only_cycle_between_start: default_cycle_start(),
            only_cycle_between_stop: default_cycle_stop(),
        }
    }

    /// Activated and carrying a nonzero priority.
    pub fn is_selectable(&self) -> bool {
        self.is_activated && self.priority > 0
    }

    /// Whether `now` lies inside the inclusive cycle window.
    pub fn is_in_cycle_window(&self, now: NaiveTime) -> bool {
        let now = now.with_nanosecond(0).unwrap_or(now);
        now >= self.only_cycle_between_start && now <= self.only_cycle_between_stop
    }

    pub fn excludes_screen(&self, screen: usize) -> bool {
        self.disabled_screens.contains(&screen)
    }

    pub fn has_valid_cycle_window(&self) -> bool {
        self.only_cycle_between_start <= self.only_cycle_between_stop
    }

    /// Copy every setting except the image itself.
    pub fn assign_settings_of(&mut self, other: &Wallpaper) {
        let path = std::mem::take(&mut self.image_path);
        let size = self.image_size.take();
        *self = Self {
            image_path: path,
            image_size: size,
            ..other.clone()
        };
    }
}

/// Axis aligned rectangle in desktop coordinates.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Rect {
    pub x: i32,
    pub y: i32,
    pub width: u32,
    pub height: u32,
}

impl Rect {
    pub const fn new(x: i32, y: i32, width: u32, height: u32) -> Self {
        Self {
            x,
            y,
            width,
            height,
        }
    }

    pub fn right(&self) -> i32 {
        self.x.saturating_add_unsigned(self.width)
    }

    pub fn bottom(&self) -> i32 {
        self.y.saturating_add_unsigned(self.height)
    }

    /// Smallest rectangle containing both.
    pub fn union(&self, other: &Rect) -> Rect {
        let x = self.x.min(other.x);
        let y = self.y.min(other.y);
        let right = self.right().max(other.right());
        let bottom = self.bottom().max(other.bottom());

        Rect::new(x, y, right.abs_diff(x), bottom.abs_diff(y))
    }
}

/// Per-screen cycling behavior.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScreenSettings {
    pub bounds: Rect,

    #[serde(default = "default_true")]
    pub cycle_randomly: bool,

    /// Shown permanently when `cycle_randomly` is off
    #[serde(default)]
    pub static_wallpaper: Option<Wallpaper>,
}

impl ScreenSettings {
    pub fn new(bounds: Rect) -> Self {
        Self {
            bounds,
            cycle_randomly: true,
            static_wallpaper: None,
        }
    }
}

/// Ordered screen settings; index `i` is screen `i` for the session.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ScreenSettingsCollection(Vec<ScreenSettings>);

impl ScreenSettingsCollection {
    pub fn new(screens: Vec<ScreenSettings>) -> Self {
        Self(screens)
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn get(&self, index: usize) -> Option<&ScreenSettings> {
        self.0.get(index)
    }

    pub fn iter(&self) -> std::slice::Iter<'_, ScreenSettings> {
        self.0.iter()
    }

    /// Number of screens that receive randomly picked wallpapers.
    pub fn random_cycled_screen_count(&self) -> usize {
        self.0.iter().filter(|s| s.cycle_randomly).count()
    }

    /// Multiscreen wallpapers only make sense with more than one screen.
    pub fn is_multiscreen_system(&self) -> bool {
        self.0.len() > 1
    }

    /// Bounding box of every screen; empty when there are no screens.
    pub fn all_screens_bounds(&self) -> Rect {
        let mut screens = self.0.iter();
        let Some(first) = screens.next() else {
            return Rect::default();
        };
        screens.fold(first.bounds, |acc, s| acc.union(&s.bounds))
    }
}

impl<'a> IntoIterator for &'a ScreenSettingsCollection {
    type Item = &'a ScreenSettings;
    type IntoIter = std::slice::Iter<'a, ScreenSettings>;

    fn into_iter(self) -> Self::IntoIter {
        self.0.iter()
    }
}

/// How the screens are refreshed on each cycle.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ChangeType {
    /// Every cycling screen gets its own new wallpaper at the same time
    #[default]
    AllSame,
    /// One new wallpaper, cloned onto every cycling screen
    AllCloned,
    /// One cycling screen changes per cycle, in turn
    OneByOne,
}

impl ChangeType {
    pub fn name(&self) -> &'static str {
        match self {
            Self::AllSame => "all-same",
            Self::AllCloned => "all-cloned",
            Self::OneByOne => "one-by-one",
        }
    }
}
