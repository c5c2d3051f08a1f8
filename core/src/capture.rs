/// Capture agent: snapshot the conversation and upload it as evidence
use crate::backend::Backend;
use crate::config::CaptureSettings;
use crate::error::{ChatError, Result};
use crate::events::{CaptureReport, ClientEvent};
use crate::protocol::{CaptureContext, MessageId};
use crate::view::{ConversationPane, ConversationView};
use image::{ImageFormat, Rgba, RgbaImage};
use ratatui::buffer::Buffer;
use ratatui::layout::Rect;
use ratatui::style::Color;
use ratatui::widgets::Widget;
use std::io::Cursor;
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{error, info};

const BACKGROUND: [u8; 3] = [16, 16, 24];
const FOREGROUND: [u8; 3] = [220, 220, 220];

/// Turns a conversation snapshot into an encoded image
pub trait Rasterizer: Send + Sync {
    fn rasterize(&self, snapshot: &ConversationView) -> Result<Vec<u8>>;
}

/// Renders the conversation pane off-screen and paints each cell into a PNG.
///
/// Glyphs are drawn as solid silhouettes sized by character class, which keeps
/// line structure, colours and origins legible without a font.
pub struct BufferRasterizer {
    settings: CaptureSettings,
}

impl BufferRasterizer {
    pub fn new(settings: CaptureSettings) -> Self {
        Self { settings }
    }
}

impl Rasterizer for BufferRasterizer {
    fn rasterize(&self, snapshot: &ConversationView) -> Result<Vec<u8>> {
        let s = self.settings;
        if s.cols == 0 || s.rows == 0 || s.cell_width == 0 || s.cell_height == 0 {
            return Err(ChatError::SideChannel("capture area is empty".to_string()));
        }

        let area = Rect::new(0, 0, s.cols, s.rows);
        let mut buf = Buffer::empty(area);
        ConversationPane::new(snapshot)
            .title(" Evidence ")
            .render(area, &mut buf);

        let width = s.cols as u32 * s.cell_width;
        let height = s.rows as u32 * s.cell_height;
        let mut img = RgbaImage::from_pixel(width, height, rgba(BACKGROUND));

        for row in 0..s.rows {
            for col in 0..s.cols {
                let cell = buf.get(col, row);
                let x0 = col as u32 * s.cell_width;
                let y0 = row as u32 * s.cell_height;

                let bg = rgba(color_rgb(cell.bg, BACKGROUND));
                fill(&mut img, x0, y0, s.cell_width, s.cell_height, bg);

                let Some(ch) = cell.symbol().chars().next().filter(|c| !c.is_whitespace()) else {
                    continue;
                };
                let (top, bottom) = glyph_band(ch, s.cell_height);
                let inset = s.cell_width / 8;
                fill(
                    &mut img,
                    x0 + inset,
                    y0 + top,
                    s.cell_width - 2 * inset,
                    bottom - top,
                    rgba(color_rgb(cell.fg, FOREGROUND)),
                );
            }
        }

        let mut out = Cursor::new(Vec::new());
        img.write_to(&mut out, ImageFormat::Png)
            .map_err(|e| ChatError::SideChannel(format!("PNG encoding failed: {}", e)))?;
        Ok(out.into_inner())
    }
}

/// Vertical extent of a glyph silhouette within its cell
fn glyph_band(ch: char, cell_height: u32) -> (u32, u32) {
    let eighth = cell_height / 8;
    let bottom = cell_height - eighth;
    let top = if ch.is_ascii_lowercase() {
        eighth * 3
    } else if ch.is_alphanumeric() {
        eighth
    } else {
        eighth * 4
    };
    (top.min(bottom), bottom)
}

fn fill(img: &mut RgbaImage, x0: u32, y0: u32, w: u32, h: u32, px: Rgba<u8>) {
    for y in y0..(y0 + h).min(img.height()) {
        for x in x0..(x0 + w).min(img.width()) {
            img.put_pixel(x, y, px);
        }
    }
}

fn rgba([r, g, b]: [u8; 3]) -> Rgba<u8> {
    Rgba([r, g, b, 255])
}

fn color_rgb(color: Color, default: [u8; 3]) -> [u8; 3] {
    match color {
        Color::Reset => default,
        Color::Black => [0, 0, 0],
        Color::Red => [205, 49, 49],
        Color::Green => [13, 188, 121],
        Color::Yellow => [229, 229, 16],
        Color::Blue => [36, 114, 200],
        Color::Magenta => [188, 63, 188],
        Color::Cyan => [17, 168, 205],
        Color::Gray => [204, 204, 204],
        Color::DarkGray => [118, 118, 118],
        Color::LightRed => [241, 76, 76],
        Color::LightGreen => [35, 209, 139],
        Color::LightYellow => [245, 245, 67],
        Color::LightBlue => [59, 142, 234],
        Color::LightMagenta => [214, 112, 214],
        Color::LightCyan => [41, 184, 219],
        Color::White => [255, 255, 255],
        Color::Rgb(r, g, b) => [r, g, b],
        Color::Indexed(_) => default,
    }
}

/// Runs captures requested by the relay.
///
/// Each capture is detached: the dispatcher never waits for it, and its
/// outcome only comes back as a [`ClientEvent::CaptureSettled`].
pub struct CaptureAgent {
    rasterizer: Arc<dyn Rasterizer>,
    backend: Arc<dyn Backend>,
}

impl CaptureAgent {
    pub fn new(rasterizer: Arc<dyn Rasterizer>, backend: Arc<dyn Backend>) -> Self {
        Self {
            rasterizer,
            backend,
        }
    }

    pub fn capture(
        &self,
        context: CaptureContext,
        snapshot: ConversationView,
        reports: mpsc::UnboundedSender<ClientEvent>,
    ) -> JoinHandle<()> {
        let rasterizer = self.rasterizer.clone();
        let backend = self.backend.clone();

        tokio::spawn(async move {
            let message_id = context.message_id;
            info!(
                "📸 Capturing conversation for message {} (words: {:?}, victim: {:?})",
                message_id, context.words, context.victim
            );

            let result = rasterize_and_upload(rasterizer, backend, &message_id, snapshot).await;
            match &result {
                Ok(()) => info!("Uploaded screenshot for message {}", message_id),
                Err(e) => error!("Screenshot failed for message {}: {}", message_id, e),
            }

            let _ = reports.send(ClientEvent::CaptureSettled(CaptureReport {
                message_id,
                result,
            }));
        })
    }
}

async fn rasterize_and_upload(
    rasterizer: Arc<dyn Rasterizer>,
    backend: Arc<dyn Backend>,
    message_id: &MessageId,
    snapshot: ConversationView,
) -> Result<()> {
    let png = tokio::task::spawn_blocking(move || rasterizer.rasterize(&snapshot))
        .await
        .map_err(|e| ChatError::SideChannel(format!("rasterizer task failed: {}", e)))??;

    backend
        .upload_screenshot(message_id, png)
        .await
        .map_err(|e| ChatError::SideChannel(format!("upload failed: {}", e)))
}
