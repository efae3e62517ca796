pub mod backlight;

pub use backlight::{BacklightPaths, ScreenChange, ScreenController, ScreenState};
