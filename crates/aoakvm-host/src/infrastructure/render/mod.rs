//! Rendering infrastructure: implementations of the renderer seam.

pub mod headless;

pub use headless::{HeadlessRenderer, PresentStats};
