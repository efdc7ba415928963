//! Headless rendering of detail pages.
//!
//! [`PageRenderer`] is the seam the acquisition strategies depend on;
//! [`ChromiumRenderer`] drives Chrome over the DevTools protocol with one
//! browser per render call.

use std::io::Cursor;
use std::path::PathBuf;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use chromiumoxide::browser::{Browser, BrowserConfig};
use chromiumoxide::cdp::browser_protocol::page::{CaptureScreenshotFormat, PrintToPdfParams};
use chromiumoxide::handler::viewport::Viewport;
use chromiumoxide::page::ScreenshotParams;
use chromiumoxide::Page;
use futures::StreamExt;
use image::codecs::jpeg::JpegEncoder;
use image::{ImageFormat, imageops};
use noticeharvest_shared::{NoticeHarvestError, RenderConfig, Result};
use tracing::{debug, instrument, warn};

/// JPEG quality for screenshot slices.
const SLICE_JPEG_QUALITY: u8 = 75;

/// Device pixel ratio for screenshots.
const DEVICE_SCALE_FACTOR: f64 = 2.0;

/// Settle delay before printing a document.
const DOCUMENT_SETTLE: Duration = Duration::from_millis(2000);

/// A4 paper size in inches.
const A4_WIDTH_IN: f64 = 8.27;
const A4_HEIGHT_IN: f64 = 11.69;

const SCROLL_TO_BOTTOM_JS: &str = "window.scrollTo(0, document.body.scrollHeight)";

/// Resources fetched so far; stops growing once the network is quiet.
const RESOURCE_COUNT_JS: &str = "performance.getEntriesByType('resource').length";

/// Poll interval for the best-effort waits.
const WAIT_POLL: Duration = Duration::from_millis(250);

// ---------------------------------------------------------------------------
// Trait
// ---------------------------------------------------------------------------

/// Renders a URL through a headless browser.
#[async_trait]
pub trait PageRenderer: Send + Sync {
    /// Full-page PNG screenshot.
    async fn screenshot(&self, url: &str) -> Result<Vec<u8>>;

    /// A4 PDF with backgrounds.
    async fn document(&self, url: &str) -> Result<Vec<u8>>;
}

// ---------------------------------------------------------------------------
// Chromium
// ---------------------------------------------------------------------------

/// Chrome/Chromium renderer.
pub struct ChromiumRenderer {
    config: RenderConfig,
}

impl ChromiumRenderer {
    pub fn new(config: RenderConfig) -> Self {
        Self { config }
    }

    fn timeout(&self) -> Duration {
        Duration::from_millis(self.config.timeout_ms)
    }

    /// Budget for one best-effort wait. Two such waits plus the capture must
    /// fit inside the overall render timeout.
    fn wait_budget(&self) -> Duration {
        Duration::from_millis(self.config.marker_timeout_ms.min(self.config.timeout_ms / 4))
    }

    fn browser_config(&self) -> Result<BrowserConfig> {
        let mut builder = BrowserConfig::builder()
            .viewport(Viewport {
                width: self.config.viewport_width,
                height: self.config.slice_height,
                device_scale_factor: Some(DEVICE_SCALE_FACTOR),
                emulating_mobile: false,
                is_landscape: false,
                has_touch: false,
            })
            .window_size(self.config.viewport_width, self.config.slice_height)
            .request_timeout(self.timeout())
            .arg("--hide-scrollbars")
            .arg("--disable-web-security");
        if let Some(exe) = &self.config.chrome_executable {
            builder = builder.chrome_executable(PathBuf::from(exe));
        }
        builder.build().map_err(NoticeHarvestError::Render)
    }

    /// Launch a browser, run `f` on a page opened at `url`, then close the
    /// browser whatever the outcome.
    async fn with_page<F, Fut>(&self, url: &str, f: F) -> Result<Vec<u8>>
    where
        F: FnOnce(Page) -> Fut,
        Fut: std::future::Future<Output = Result<Vec<u8>>>,
    {
        let (mut browser, mut handler) = Browser::launch(self.browser_config()?)
            .await
            .map_err(|e| NoticeHarvestError::Render(format!("browser launch failed: {e}")))?;

        let handler_task = tokio::spawn(async move {
            while let Some(event) = handler.next().await {
                if event.is_err() {
                    break;
                }
            }
        });

        let result = tokio::time::timeout(self.timeout(), async {
            let page = browser
                .new_page(url)
                .await
                .map_err(|e| NoticeHarvestError::Render(format!("navigation failed: {e}")))?;
            f(page).await
        })
        .await
        .unwrap_or_else(|_| {
            Err(NoticeHarvestError::Render(format!(
                "render timed out after {} ms",
                self.config.timeout_ms
            )))
        });

        if let Err(e) = browser.close().await {
            debug!(error = %e, "browser close failed");
        }
        let _ = browser.wait().await;
        handler_task.abort();

        result
    }

    /// Best-effort wait for the content marker; a timeout is not an error.
    async fn wait_for_marker(&self, page: &Page) {
        let selector = self.config.content_selector.as_str();
        let found = poll_until(self.wait_budget(), WAIT_POLL, || async move {
            page.find_element(selector).await.is_ok()
        })
        .await;
        if !found {
            debug!(selector, "content marker not found, continuing");
        }
    }

    /// Best-effort wait until no new resources load for `network_idle_ms`.
    async fn wait_for_network_idle(&self, page: &Page) {
        let idle = Duration::from_millis(self.config.network_idle_ms);
        let quiet = wait_for_quiet(self.wait_budget(), WAIT_POLL, idle, || async move {
            page.evaluate(RESOURCE_COUNT_JS)
                .await
                .ok()
                .and_then(|r| r.into_value::<u64>().ok())
        })
        .await;
        if !quiet {
            debug!("network did not go idle, continuing");
        }
    }
}

/// Poll `probe` every `poll` until it returns true or `budget` runs out.
async fn poll_until<F, Fut>(budget: Duration, poll: Duration, mut probe: F) -> bool
where
    F: FnMut() -> Fut,
    Fut: std::future::Future<Output = bool>,
{
    let deadline = Instant::now() + budget;
    loop {
        if probe().await {
            return true;
        }
        if Instant::now() >= deadline {
            return false;
        }
        tokio::time::sleep(poll).await;
    }
}

/// Wait until `sample` returns the same value for at least `idle`.
///
/// Returns false when `budget` runs out or sampling fails.
async fn wait_for_quiet<F, Fut>(budget: Duration, poll: Duration, idle: Duration, mut sample: F) -> bool
where
    F: FnMut() -> Fut,
    Fut: std::future::Future<Output = Option<u64>>,
{
    let deadline = Instant::now() + budget;
    let mut last = None;
    let mut quiet_since = Instant::now();
    loop {
        let Some(current) = sample().await else {
            return false;
        };
        let now = Instant::now();
        if last != Some(current) {
            last = Some(current);
            quiet_since = now;
        } else if now.duration_since(quiet_since) >= idle {
            return true;
        }
        if now >= deadline {
            return false;
        }
        tokio::time::sleep(poll).await;
    }
}

#[async_trait]
impl PageRenderer for ChromiumRenderer {
    #[instrument(skip_all, fields(url = %url))]
    async fn screenshot(&self, url: &str) -> Result<Vec<u8>> {
        let cfg = &self.config;
        self.with_page(url, |page| async move {
            self.wait_for_marker(&page).await;

            // Trigger lazy-loaded content
            for _ in 0..cfg.scroll_steps {
                page.evaluate(SCROLL_TO_BOTTOM_JS)
                    .await
                    .map_err(|e| NoticeHarvestError::Render(format!("scroll failed: {e}")))?;
                tokio::time::sleep(Duration::from_millis(cfg.scroll_pause_ms)).await;
            }
            self.wait_for_network_idle(&page).await;
            tokio::time::sleep(Duration::from_millis(cfg.settle_ms)).await;

            page.screenshot(
                ScreenshotParams::builder()
                    .format(CaptureScreenshotFormat::Png)
                    .full_page(true)
                    .build(),
            )
            .await
            .map_err(|e| NoticeHarvestError::Render(format!("screenshot failed: {e}")))
        })
        .await
    }

    #[instrument(skip_all, fields(url = %url))]
    async fn document(&self, url: &str) -> Result<Vec<u8>> {
        self.with_page(url, |page| async move {
            self.wait_for_network_idle(&page).await;
            tokio::time::sleep(DOCUMENT_SETTLE).await;

            let params = PrintToPdfParams {
                paper_width: Some(A4_WIDTH_IN),
                paper_height: Some(A4_HEIGHT_IN),
                print_background: Some(true),
                ..Default::default()
            };
            page.pdf(params)
                .await
                .map_err(|e| NoticeHarvestError::Render(format!("pdf failed: {e}")))
        })
        .await
    }
}

// ---------------------------------------------------------------------------
// Slicing
// ---------------------------------------------------------------------------

/// Cut a full-page screenshot into JPEG bands of `slice_height` pixels.
///
/// The last band holds whatever remains; there is no cap on the band count.
pub fn slice_screenshot(png: &[u8], slice_height: u32) -> Result<Vec<Vec<u8>>> {
    if slice_height == 0 {
        return Err(NoticeHarvestError::validation("slice height must be > 0"));
    }

    let full = image::load_from_memory_with_format(png, ImageFormat::Png)
        .map_err(|e| NoticeHarvestError::Render(format!("failed to decode screenshot: {e}")))?
        .to_rgb8();
    let (width, height) = full.dimensions();

    let mut slices = Vec::new();
    let mut y = 0;
    while y < height {
        let band_height = slice_height.min(height - y);
        let band = imageops::crop_imm(&full, 0, y, width, band_height).to_image();

        let mut buf = Cursor::new(Vec::new());
        JpegEncoder::new_with_quality(&mut buf, SLICE_JPEG_QUALITY)
            .encode_image(&band)
            .map_err(|e| NoticeHarvestError::Render(format!("failed to encode slice: {e}")))?;
        slices.push(buf.into_inner());

        y += slice_height;
    }

    debug!(width, height, slices = slices.len(), "screenshot sliced");
    Ok(slices)
}

/// Write a full screenshot for debugging; failures only warn.
pub async fn save_debug_screenshot(dir: &std::path::Path, file_name: &str, png: &[u8]) {
    let path = dir.join(file_name);
    if let Err(e) = tokio::fs::create_dir_all(dir).await {
        warn!(path = %dir.display(), error = %e, "failed to create debug screenshot dir");
        return;
    }
    match tokio::fs::write(&path, png).await {
        Ok(()) => debug!(path = %path.display(), "full screenshot saved"),
        Err(e) => warn!(path = %path.display(), error = %e, "failed to save full screenshot"),
    }
}
