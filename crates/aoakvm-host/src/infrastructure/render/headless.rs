//! Renderer that presents through `tracing` instead of a window.
//!
//! It keeps the same bookkeeping a windowed renderer would (the current
//! status screen, the surface size, presentation counters) and validates
//! configured status images, so the state machine sees the same failures it
//! would with a real window.

use std::path::PathBuf;
use std::time::Instant;

use tracing::{debug, info};

use aoakvm_core::StatusScreen;

use crate::application::decode::VideoFrame;
use crate::application::session::{RenderError, Renderer};
use crate::infrastructure::storage::config::{ScreensConfig, WindowConfig};

/// Frames between two presentation statistics lines.
const STATS_INTERVAL: u64 = 300;

/// Presentation counters for the current surface.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PresentStats {
    pub presented: u64,
    pub keyframes: u64,
    pub bytes: u64,
    /// Frames the decoder produced that never reached the screen.
    pub skipped: u64,
}

pub struct HeadlessRenderer {
    screens: ScreensConfig,
    window: WindowConfig,
    status: Option<StatusScreen>,
    surface: Option<(u32, u32)>,
    stats: PresentStats,
    last_sequence: Option<u64>,
    stats_since: Instant,
}

impl HeadlessRenderer {
    pub fn new(screens: ScreensConfig, window: WindowConfig) -> Self {
        info!(
            title = %window.title,
            x = window.x,
            y = window.y,
            width = window.width,
            height = window.height,
            "headless renderer ready"
        );
        Self {
            screens,
            window,
            status: None,
            surface: None,
            stats: PresentStats::default(),
            last_sequence: None,
            stats_since: Instant::now(),
        }
    }

    /// The status screen currently shown, `None` while video is presented.
    pub fn status(&self) -> Option<StatusScreen> {
        self.status
    }

    pub fn surface(&self) -> Option<(u32, u32)> {
        self.surface
    }

    pub fn stats(&self) -> PresentStats {
        self.stats
    }

    fn log_stats(&mut self) {
        let elapsed = self.stats_since.elapsed().as_secs_f64();
        let fps = if elapsed > 0.0 {
            format!("{:.1}", STATS_INTERVAL as f64 / elapsed)
        } else {
            "-".to_string()
        };
        info!(
            presented = self.stats.presented,
            keyframes = self.stats.keyframes,
            skipped = self.stats.skipped,
            bytes = self.stats.bytes,
            fps = %fps,
            "presentation stats"
        );
        self.stats_since = Instant::now();
    }
}

impl Renderer for HeadlessRenderer {
    fn show_status(&mut self, screen: StatusScreen) -> Result<(), RenderError> {
        let image: Option<PathBuf> = self.screens.path_for(screen).map(PathBuf::from);
        match &image {
            Some(path) if !path.is_file() => {
                return Err(RenderError::StatusScreen {
                    screen,
                    reason: format!("{} does not exist", path.display()),
                });
            }
            Some(path) => info!(?screen, image = %path.display(), window = %self.window.title, "status screen"),
            None => info!(?screen, window = %self.window.title, "status screen"),
        }
        self.status = Some(screen);
        Ok(())
    }

    fn prepare(&mut self, width: u32, height: u32) -> Result<(), RenderError> {
        if width == 0 || height == 0 {
            return Err(RenderError::Prepare {
                width,
                height,
                reason: "zero-sized surface".into(),
            });
        }
        info!(width, height, "video surface prepared");
        self.surface = Some((width, height));
        self.stats = PresentStats::default();
        self.last_sequence = None;
        self.stats_since = Instant::now();
        Ok(())
    }

    fn present(&mut self, frame: &VideoFrame) -> Result<(), RenderError> {
        let Some(surface) = self.surface else {
            return Err(RenderError::Present {
                sequence: frame.sequence,
                reason: "no surface prepared".into(),
            });
        };
        if (frame.width, frame.height) != surface {
            info!(
                from = ?surface,
                to = ?(frame.width, frame.height),
                "resizing video surface"
            );
            self.surface = Some((frame.width, frame.height));
        }

        if let Some(last) = self.last_sequence {
            self.stats.skipped += frame.sequence.saturating_sub(last + 1);
        }
        self.last_sequence = Some(frame.sequence);
        self.status = None;
        self.stats.presented += 1;
        self.stats.bytes += frame.data.len() as u64;
        if frame.keyframe {
            self.stats.keyframes += 1;
        }
        debug!(sequence = frame.sequence, keyframe = frame.keyframe, len = frame.data.len(), "frame presented");

        if self.stats.presented % STATS_INTERVAL == 0 {
            self.log_stats();
        }
        Ok(())
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    fn renderer() -> HeadlessRenderer {
        HeadlessRenderer::new(ScreensConfig::default(), WindowConfig::default())
    }

    fn frame(sequence: u64, keyframe: bool) -> VideoFrame {
        VideoFrame {
            sequence,
            width: 1280,
            height: 720,
            keyframe,
            data: vec![0; 100],
        }
    }

    #[test]
    fn test_status_without_configured_image_is_shown() {
        let mut renderer = renderer();

        renderer.show_status(StatusScreen::AoaInitialized).unwrap();

        assert_eq!(renderer.status(), Some(StatusScreen::AoaInitialized));
    }

    #[test]
    fn test_missing_status_image_is_an_error() {
        // Arrange
        let screens = ScreensConfig {
            wait_for_device: Some(PathBuf::from("/nonexistent/aoakvm/wait.png")),
            ..ScreensConfig::default()
        };
        let mut renderer = HeadlessRenderer::new(screens, WindowConfig::default());

        // Act
        let result = renderer.show_status(StatusScreen::WaitForDevice);

        // Assert
        assert!(matches!(result, Err(RenderError::StatusScreen { .. })));
        assert_eq!(renderer.status(), None);
    }

    #[test]
    fn test_present_before_prepare_fails() {
        let mut renderer = renderer();
        assert!(renderer.present(&frame(0, true)).is_err());
    }

    #[test]
    fn test_zero_sized_surface_is_rejected() {
        let mut renderer = renderer();
        assert!(matches!(renderer.prepare(0, 720), Err(RenderError::Prepare { .. })));
    }

    #[test]
    fn test_presentation_counts_frames_and_gaps() {
        // Arrange
        let mut renderer = renderer();
        renderer.show_status(StatusScreen::WaitForDataTransmission).unwrap();
        renderer.prepare(1280, 720).unwrap();

        // Act – frames 2 and 3 were evicted from the ring
        for (sequence, keyframe) in [(0, true), (1, false), (4, false)] {
            renderer.present(&frame(sequence, keyframe)).unwrap();
        }

        // Assert
        let stats = renderer.stats();
        assert_eq!(stats.presented, 3);
        assert_eq!(stats.keyframes, 1);
        assert_eq!(stats.skipped, 2);
        assert_eq!(stats.bytes, 300);
        assert_eq!(renderer.status(), None);
    }

    #[test]
    fn test_resolution_change_resizes_surface() {
        let mut renderer = renderer();
        renderer.prepare(1280, 720).unwrap();
        let mut rotated = frame(0, true);
        rotated.width = 720;
        rotated.height = 1280;

        renderer.present(&rotated).unwrap();

        assert_eq!(renderer.surface(), Some((720, 1280)));
    }
}
