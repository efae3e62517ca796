pub mod error;
pub mod frame;
pub mod library;
pub mod logging;
pub mod platform;
pub mod renderer;
pub mod resources;
pub mod schedule;
pub mod settings;
pub mod system;
pub mod web;

pub use error::Error;
pub use frame::{FrameOptions, PictureFrame};
