//! Periodic screen capture
//!
//! While active, the capture loop samples the configured [`ScreenSource`]
//! once per send interval, downscales and JPEG-encodes the sample off the
//! async runtime, and sends it as a user turn that keeps the turn open.

use crate::error::{LiveError, Result};
use crate::protocol::{ClientMessage, Content, Part, MIME_JPEG};
use crate::session::SessionInner;
use crate::state::Flag;
use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use image::codecs::jpeg::JpegEncoder;
use image::imageops::FilterType;
use image::{DynamicImage, GenericImageView, RgbaImage};
use std::fmt;
use std::str::FromStr;
use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::{sleep, Instant};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// Screen rectangle in display coordinates.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Rect {
    pub x: i32,
    pub y: i32,
    pub width: u32,
    pub height: u32,
}

impl Rect {
    pub fn new(x: i32, y: i32, width: u32, height: u32) -> Self {
        Self { x, y, width, height }
    }

    pub fn is_empty(&self) -> bool {
        self.width == 0 || self.height == 0
    }
}

/// Requested capture size.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum CaptureTarget {
    #[default]
    FullScreen,
    Size { width: u32, height: u32 },
}

impl CaptureTarget {
    /// A zero width or height means full screen.
    pub fn size(width: u32, height: u32) -> Self {
        if width == 0 || height == 0 {
            Self::FullScreen
        } else {
            Self::Size { width, height }
        }
    }
}

impl fmt::Display for CaptureTarget {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::FullScreen => write!(f, "Full Screen"),
            Self::Size { width, height } => write!(f, "{}x{}", width, height),
        }
    }
}

impl FromStr for CaptureTarget {
    type Err = LiveError;

    /// Accepts `full` or `WxH`.
    fn from_str(s: &str) -> Result<Self> {
        let s = s.trim();
        if s.eq_ignore_ascii_case("full") {
            return Ok(Self::FullScreen);
        }
        let invalid = || LiveError::Config(format!("invalid resolution '{}', expected WxH or full", s));
        let (w, h) = s.split_once(|c| c == 'x' || c == 'X').ok_or_else(invalid)?;
        let width = w.trim().parse::<u32>().map_err(|_| invalid())?;
        let height = h.trim().parse::<u32>().map_err(|_| invalid())?;
        Ok(Self::size(width, height))
    }
}

/// Resolve a target against the display bounds: centered, clamped to the display.
pub fn resolve_rect(bounds: Rect, target: CaptureTarget) -> Option<Rect> {
    if bounds.is_empty() {
        return None;
    }
    match target {
        CaptureTarget::FullScreen => Some(bounds),
        CaptureTarget::Size { width, height } => {
            let w = width.min(bounds.width);
            let h = height.min(bounds.height);
            Some(Rect {
                x: bounds.x + ((bounds.width - w) / 2) as i32,
                y: bounds.y + ((bounds.height - h) / 2) as i32,
                width: w,
                height: h,
            })
        }
    }
}

/// Target size, display bounds once known, and the rectangle derived from both.
#[derive(Debug, Clone, Default)]
pub struct CaptureGeometry {
    target: CaptureTarget,
    bounds: Option<Rect>,
    active: Option<Rect>,
}

impl CaptureGeometry {
    pub fn target(&self) -> CaptureTarget {
        self.target
    }

    pub fn active(&self) -> Option<Rect> {
        self.active
    }

    pub fn set_target(&mut self, target: CaptureTarget) {
        self.target = target;
        if let Some(bounds) = self.bounds {
            self.active = resolve_rect(bounds, target);
        }
    }

    /// Record display bounds. Returns `false` if they are unusable.
    pub fn set_bounds(&mut self, bounds: Rect) -> bool {
        self.active = resolve_rect(bounds, self.target);
        if self.active.is_some() {
            self.bounds = Some(bounds);
        }
        self.active.is_some()
    }

    pub fn capture_resolution(&self) -> String {
        match self.active {
            Some(r) => format!("{}x{}", r.width, r.height),
            None => "N/A".to_string(),
        }
    }

    pub fn target_resolution(&self) -> String {
        self.target.to_string()
    }
}

/// Screen grabbing capability. Calls may block and are made off the async runtime.
pub trait ScreenSource: Send + Sync {
    fn display_bounds(&self) -> Result<Rect>;
    fn capture(&self, rect: Rect) -> Result<RgbaImage>;
}

/// Downscale so neither side exceeds `max_dimension`, keeping the aspect ratio.
pub fn scale_to_fit(image: DynamicImage, max_dimension: u32) -> DynamicImage {
    let (width, height) = image.dimensions();
    if width <= max_dimension && height <= max_dimension {
        return image;
    }
    let ratio = if width > height {
        max_dimension as f32 / width as f32
    } else {
        max_dimension as f32 / height as f32
    };
    let new_width = ((width as f32 * ratio) as u32).max(1);
    let new_height = ((height as f32 * ratio) as u32).max(1);
    image.resize_exact(new_width, new_height, FilterType::Triangle)
}

pub fn encode_jpeg(image: &DynamicImage, quality: u8) -> Result<Vec<u8>> {
    let rgb = image.to_rgb8();
    let mut jpeg = Vec::new();
    let mut encoder = JpegEncoder::new_with_quality(&mut jpeg, quality);
    encoder.encode_image(&rgb)?;
    Ok(jpeg)
}

/// Scale, compress and base64-encode one screen sample.
pub fn encode_frame(image: RgbaImage, max_dimension: u32, quality: u8) -> Result<String> {
    let scaled = scale_to_fit(DynamicImage::ImageRgba8(image), max_dimension);
    let jpeg = encode_jpeg(&scaled, quality)?;
    Ok(STANDARD.encode(jpeg))
}

/// How often the loop wakes up. Never above a second so stop requests and
/// resolution changes are noticed quickly even with long send intervals.
pub fn poll_tick(interval: Duration) -> Duration {
    (interval / 10).clamp(Duration::from_millis(100), Duration::from_secs(1))
}

/// Running capture task of one start/stop cycle.
pub(crate) struct CaptureSlot {
    token: CancellationToken,
    handle: JoinHandle<()>,
    generation: u64,
}

/// Fires "capture stopped" when the loop exits, however it exits.
struct CaptureFinalizer {
    inner: Arc<SessionInner>,
    generation: u64,
}

impl Drop for CaptureFinalizer {
    fn drop(&mut self) {
        let inner = &self.inner;
        if inner.capture_generation.load(Ordering::SeqCst) != self.generation {
            return;
        }
        {
            let mut slot = inner.capture.lock();
            if slot.as_ref().is_some_and(|s| s.generation == self.generation) {
                slot.take();
            }
        }
        if inner.flags.set(Flag::CapturingScreen, false) {
            info!("Screen capture loop ended");
            inner.callbacks.on_screen_capture_stopped();
            inner.publish_status();
        }
    }
}

impl SessionInner {
    pub(crate) fn start_capture(self: &Arc<Self>) -> bool {
        let Some(screen) = self.screen.clone() else {
            let err = LiveError::unavailable("no screen source configured");
            self.report("Cannot start screen capture", &err);
            return false;
        };
        if !self.flags.get(Flag::Connected) {
            self.callbacks
                .on_error("Not connected. Cannot start screen capture.", Some(&LiveError::NotConnected));
            return false;
        }
        if self.flags.get(Flag::CapturingScreen) {
            return true;
        }

        let bounds = match screen.display_bounds() {
            Ok(bounds) => bounds,
            Err(e) => {
                self.report("Failed to initialize screen capture", &e);
                return false;
            }
        };
        if !self.geometry.lock().set_bounds(bounds) {
            let err = LiveError::unavailable(format!("display bounds {:?} are empty", bounds));
            self.report("Failed to initialize screen capture", &err);
            return false;
        }

        if !self.flags.set(Flag::CapturingScreen, true) {
            // Lost a race with another start.
            return true;
        }
        let generation = self.capture_generation.fetch_add(1, Ordering::SeqCst) + 1;
        info!("Screen capture started ({})", self.geometry.lock().capture_resolution());
        self.callbacks.on_screen_capture_started();
        self.publish_status();

        let mut slot = self.capture.lock();
        if self.capture_generation.load(Ordering::SeqCst) != generation
            || !self.flags.get(Flag::CapturingScreen)
        {
            // Stopped while the callbacks ran.
            return true;
        }
        let token = self.connection_token().map(|t| t.child_token()).unwrap_or_default();
        let inner = self.clone();
        let loop_token = token.clone();
        let handle = tokio::spawn(async move {
            inner.capture_loop(screen, loop_token, generation).await;
        });
        *slot = Some(CaptureSlot {
            token,
            handle,
            generation,
        });
        true
    }

    /// Stop the capture loop. `forced` also aborts a capture in flight.
    pub(crate) fn stop_capture(&self, forced: bool) {
        let slot = self.capture.lock().take();
        let was_capturing = self.flags.set(Flag::CapturingScreen, false);
        if let Some(slot) = slot {
            slot.token.cancel();
            if forced {
                slot.handle.abort();
            }
        }
        if was_capturing {
            info!("Screen capture stopped");
            self.callbacks.on_screen_capture_stopped();
        }
        self.publish_status();
    }

    async fn capture_loop(
        self: Arc<Self>,
        screen: Arc<dyn ScreenSource>,
        token: CancellationToken,
        generation: u64,
    ) {
        let _finalizer = CaptureFinalizer {
            inner: self.clone(),
            generation,
        };
        let interval = self.config.image_send_interval;
        let tick = poll_tick(interval);
        let mut last_send = Instant::now();

        while !token.is_cancelled()
            && self.flags.get(Flag::CapturingScreen)
            && self.flags.get(Flag::Connected)
            && self.capture_generation.load(Ordering::SeqCst) == generation
        {
            let rect = self.geometry.lock().active();
            let wait = match rect {
                Some(rect) if !rect.is_empty() => {
                    if last_send.elapsed() >= interval {
                        last_send = Instant::now();
                        if let Err(e) = self.send_screen_frame(screen.clone(), rect).await {
                            self.report("Error processing/sending image", &e);
                        }
                    }
                    tick
                }
                _ => interval,
            };
            tokio::select! {
                _ = token.cancelled() => break,
                _ = sleep(wait) => {}
            }
        }
        debug!("Capture loop {} exiting", generation);
    }

    async fn send_screen_frame(&self, screen: Arc<dyn ScreenSource>, rect: Rect) -> Result<()> {
        let max_dimension = self.config.max_image_dimension;
        let quality = self.config.jpeg_quality;
        let data = tokio::task::spawn_blocking(move || -> Result<String> {
            let image = screen.capture(rect)?;
            encode_frame(image, max_dimension, quality)
        })
        .await
        .map_err(|e| LiveError::Task(e.to_string()))??;

        debug!("Sending screen image ({} base64 bytes)", data.len());
        let turn = ClientMessage::turn(false, Content::user(vec![Part::inline(MIME_JPEG, data)]));
        self.send_message(&turn).await
    }

    /// Cancel and abort any capture task without firing callbacks.
    pub(crate) fn abort_capture_task(&self) {
        let slot = self.capture.lock().take();
        if let Some(slot) = slot {
            warn!("Aborting capture task {}", slot.generation);
            slot.token.cancel();
            slot.handle.abort();
        }
    }
}

#[cfg(feature = "capture")]
pub use xcap_source::XcapScreen;

#[cfg(feature = "capture")]
mod xcap_source {
    use super::*;
    use xcap::Monitor;

    /// Primary monitor through `xcap`.
    #[derive(Debug, Default, Clone, Copy)]
    pub struct XcapScreen;

    fn unavailable(e: impl fmt::Display) -> LiveError {
        LiveError::unavailable(e.to_string())
    }

    fn primary_monitor() -> Result<Monitor> {
        let monitors = Monitor::all().map_err(unavailable)?;
        let primary = monitors
            .iter()
            .position(|m| m.is_primary().unwrap_or(false))
            .unwrap_or(0);
        monitors
            .into_iter()
            .nth(primary)
            .ok_or_else(|| LiveError::unavailable("no monitors found"))
    }

    impl ScreenSource for XcapScreen {
        fn display_bounds(&self) -> Result<Rect> {
            let monitor = primary_monitor()?;
            let bounds = Rect {
                x: monitor.x().map_err(unavailable)?,
                y: monitor.y().map_err(unavailable)?,
                width: monitor.width().map_err(unavailable)?,
                height: monitor.height().map_err(unavailable)?,
            };
            info!(
                "Using monitor {} ({}x{})",
                monitor.name().unwrap_or_else(|_| "Unknown".to_string()),
                bounds.width,
                bounds.height
            );
            Ok(bounds)
        }

        fn capture(&self, rect: Rect) -> Result<RgbaImage> {
            let monitor = primary_monitor()?;
            let shot = monitor.capture_image().map_err(unavailable)?;
            let (width, height) = (shot.width(), shot.height());
            let full = RgbaImage::from_raw(width, height, shot.into_raw())
                .ok_or_else(|| LiveError::unavailable("captured buffer has the wrong size"))?;

            let origin_x = monitor.x().map_err(unavailable)?;
            let origin_y = monitor.y().map_err(unavailable)?;
            let x = (rect.x - origin_x).max(0) as u32;
            let y = (rect.y - origin_y).max(0) as u32;
            if x == 0 && y == 0 && rect.width >= width && rect.height >= height {
                return Ok(full);
            }
            Ok(image::imageops::crop_imm(&full, x, y, rect.width, rect.height).to_image())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::Rgba;

    #[test]
    fn test_resolve_full_screen() {
        let bounds = Rect::new(0, 0, 1920, 1080);
        assert_eq!(resolve_rect(bounds, CaptureTarget::FullScreen), Some(bounds));
        assert_eq!(resolve_rect(Rect::new(0, 0, 0, 1080), CaptureTarget::FullScreen), None);
    }

    #[test]
    fn test_resolve_centers_and_clamps() {
        let bounds = Rect::new(100, 50, 1920, 1080);
        let rect = resolve_rect(bounds, CaptureTarget::size(1280, 720)).unwrap();
        assert_eq!(rect, Rect::new(100 + 320, 50 + 180, 1280, 720));

        let clamped = resolve_rect(bounds, CaptureTarget::size(4000, 720)).unwrap();
        assert_eq!(clamped, Rect::new(100, 50 + 180, 1920, 720));
    }

    #[test]
    fn test_target_parsing() {
        assert_eq!("full".parse::<CaptureTarget>().unwrap(), CaptureTarget::FullScreen);
        assert_eq!(
            "1280x720".parse::<CaptureTarget>().unwrap(),
            CaptureTarget::Size { width: 1280, height: 720 }
        );
        assert_eq!("0x720".parse::<CaptureTarget>().unwrap(), CaptureTarget::FullScreen);
        assert!("wide".parse::<CaptureTarget>().is_err());
        assert!("12x".parse::<CaptureTarget>().is_err());
    }

    #[test]
    fn test_geometry_tracks_target_and_bounds() {
        let mut geometry = CaptureGeometry::default();
        assert_eq!(geometry.capture_resolution(), "N/A");
        assert_eq!(geometry.target_resolution(), "Full Screen");

        geometry.set_target(CaptureTarget::size(800, 600));
        assert_eq!(geometry.active(), None);
        assert_eq!(geometry.target_resolution(), "800x600");

        assert!(geometry.set_bounds(Rect::new(0, 0, 1024, 768)));
        assert_eq!(geometry.capture_resolution(), "800x600");

        geometry.set_target(CaptureTarget::FullScreen);
        assert_eq!(geometry.capture_resolution(), "1024x768");

        assert!(!geometry.set_bounds(Rect::new(0, 0, 0, 0)));
    }

    #[test]
    fn test_scale_to_fit_keeps_aspect() {
        let image = DynamicImage::new_rgba8(4000, 2000);
        let scaled = scale_to_fit(image, 1920);
        assert_eq!(scaled.dimensions(), (1920, 960));

        let tall = scale_to_fit(DynamicImage::new_rgba8(100, 300), 30);
        assert_eq!(tall.dimensions(), (10, 30));

        let small = scale_to_fit(DynamicImage::new_rgba8(640, 480), 1920);
        assert_eq!(small.dimensions(), (640, 480));
    }

    #[test]
    fn test_encode_frame_produces_jpeg() {
        let image = RgbaImage::from_pixel(64, 32, Rgba([200, 10, 10, 255]));
        let b64 = encode_frame(image, 16, 75).unwrap();
        let jpeg = STANDARD.decode(b64).unwrap();
        assert_eq!(&jpeg[..2], &[0xFF, 0xD8]);

        let decoded = image::load_from_memory(&jpeg).unwrap();
        assert_eq!(decoded.dimensions(), (16, 8));
    }

    #[test]
    fn test_poll_tick_bounds() {
        assert_eq!(poll_tick(Duration::from_millis(1000)), Duration::from_millis(100));
        assert_eq!(poll_tick(Duration::from_millis(300)), Duration::from_millis(100));
        assert_eq!(poll_tick(Duration::from_millis(5000)), Duration::from_millis(500));
        assert_eq!(poll_tick(Duration::from_secs(60)), Duration::from_secs(1));
    }
}
