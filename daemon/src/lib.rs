//! Randomized wallpaper cycling for one or more screens.

#[macro_use]
mod macros;

pub mod compositor;
pub mod config;
pub mod cycler;
pub mod desktop;
pub mod history;
pub mod library;
pub mod selection;
pub mod state;
pub mod timer;

pub use common;
