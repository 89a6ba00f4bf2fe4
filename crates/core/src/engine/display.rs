//! Frame-buffer display protocol.
//!
//! During page rasterization the engine paints into a buffer it obtained from
//! [`DisplayCallbacks::on_size`]. The buffer is shared with progressive-preview
//! readers, so every access goes through the frame lock and checks the
//! `valid` flag: a buffer is invalidated as soon as the next page starts.

use super::backend::codes;
use image::RgbaImage;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use tracing::{debug, warn};

/// Pixel layout of a frame buffer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PixelFormat {
    Gray8,
    Rgb24,
    Bgra32,
}

impl PixelFormat {
    pub fn bytes_per_pixel(self) -> usize {
        match self {
            PixelFormat::Gray8 => 1,
            PixelFormat::Rgb24 => 3,
            PixelFormat::Bgra32 => 4,
        }
    }
}

/// A rectangle of pixels touched by the engine since the last delivery.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct DirtyRect {
    pub x: u32,
    pub y: u32,
    pub width: u32,
    pub height: u32,
}

impl DirtyRect {
    pub fn new(x: u32, y: u32, width: u32, height: u32) -> Self {
        Self {
            x,
            y,
            width,
            height,
        }
    }

    pub fn area(&self) -> u64 {
        self.width as u64 * self.height as u64
    }

    /// Smallest rectangle covering both.
    pub fn union(&self, other: &DirtyRect) -> DirtyRect {
        let x0 = self.x.min(other.x);
        let y0 = self.y.min(other.y);
        let x1 = (self.x + self.width).max(other.x + other.width);
        let y1 = (self.y + self.height).max(other.y + other.height);
        DirtyRect::new(x0, y0, x1 - x0, y1 - y0)
    }
}

/// Pixel storage behind a [`SharedFrame`].
#[derive(Debug)]
pub struct FrameState {
    data: Vec<u8>,
    width: u32,
    height: u32,
    stride: usize,
    format: PixelFormat,
    valid: bool,
}

impl FrameState {
    pub fn width(&self) -> u32 {
        self.width
    }

    pub fn height(&self) -> u32 {
        self.height
    }

    pub fn stride(&self) -> usize {
        self.stride
    }

    pub fn format(&self) -> PixelFormat {
        self.format
    }

    pub fn data(&self) -> &[u8] {
        &self.data
    }

    fn pixel_rgba(&self, x: u32, y: u32) -> [u8; 4] {
        let offset = y as usize * self.stride + x as usize * self.format.bytes_per_pixel();
        let px = &self.data[offset..offset + self.format.bytes_per_pixel()];
        match self.format {
            PixelFormat::Gray8 => [px[0], px[0], px[0], 255],
            PixelFormat::Rgb24 => [px[0], px[1], px[2], 255],
            PixelFormat::Bgra32 => [px[2], px[1], px[0], px[3]],
        }
    }

    fn region_to_rgba(&self, rect: DirtyRect) -> RgbaImage {
        let x1 = (rect.x + rect.width).min(self.width);
        let y1 = (rect.y + rect.height).min(self.height);
        let x0 = rect.x.min(x1);
        let y0 = rect.y.min(y1);
        RgbaImage::from_fn(x1 - x0, y1 - y0, |x, y| {
            image::Rgba(self.pixel_rgba(x0 + x, y0 + y))
        })
    }
}

/// Frame buffer shared between the painting engine and preview readers.
#[derive(Debug, Clone)]
pub struct SharedFrame {
    inner: Arc<Mutex<FrameState>>,
}

impl SharedFrame {
    pub fn new(width: u32, height: u32, stride: usize, format: PixelFormat) -> Self {
        let stride = stride.max(width as usize * format.bytes_per_pixel());
        Self {
            inner: Arc::new(Mutex::new(FrameState {
                data: vec![255; stride * height as usize],
                width,
                height,
                stride,
                format,
                valid: true,
            })),
        }
    }

    fn lock(&self) -> MutexGuard<'_, FrameState> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Copy painted rows starting at `first_row`. Returns false once the
    /// frame has been invalidated.
    pub fn write_rows(&self, first_row: u32, rows: &[u8]) -> bool {
        let mut state = self.lock();
        if !state.valid {
            return false;
        }
        let start = first_row as usize * state.stride;
        let end = (start + rows.len()).min(state.data.len());
        if start < end {
            state.data[start..end].copy_from_slice(&rows[..end - start]);
        }
        true
    }

    pub fn invalidate(&self) {
        self.lock().valid = false;
    }

    pub fn is_valid(&self) -> bool {
        self.lock().valid
    }

    pub fn dimensions(&self) -> (u32, u32) {
        let state = self.lock();
        (state.width, state.height)
    }

    /// Read the frame under its lock, or `None` if it is no longer valid.
    pub fn read<R>(&self, f: impl FnOnce(&FrameState) -> R) -> Option<R> {
        let state = self.lock();
        state.valid.then(|| f(&state))
    }

    /// Private RGBA copy of the whole frame.
    pub fn snapshot(&self) -> Option<RgbaImage> {
        self.read(|state| {
            state.region_to_rgba(DirtyRect::new(0, 0, state.width, state.height))
        })
    }

    /// Private RGBA copy of one region, clipped to the frame.
    pub fn snapshot_region(&self, rect: DirtyRect) -> Option<RgbaImage> {
        self.read(|state| state.region_to_rgba(rect))
    }
}

/// A completed page copied out of the frame buffer.
#[derive(Debug, Clone)]
pub struct RenderedFrame {
    /// Output index (0-based, in completion order).
    pub index: usize,
    /// Resolution the page was painted at.
    pub dpi: u32,
    pub image: RgbaImage,
}

/// The five-hook frame-buffer contract the engine drives while painting.
///
/// Every hook returns an engine code: 0 to continue, negative to abort.
pub trait DisplayCallbacks {
    /// A new page size is about to be set; release the current buffer.
    fn on_presize(&mut self, width: u32, height: u32, stride: usize, format: PixelFormat) -> i32;

    /// Allocate the buffer the engine will paint into.
    fn on_size(
        &mut self,
        width: u32,
        height: u32,
        stride: usize,
        format: PixelFormat,
    ) -> std::result::Result<SharedFrame, i32>;

    /// A region of the buffer was painted.
    fn on_update(&mut self, x: u32, y: u32, width: u32, height: u32) -> i32;

    /// The page is complete.
    fn on_page(&mut self, copies: u32, flush: bool) -> i32;

    /// The device is closing; release the buffer.
    fn on_preclose(&mut self) -> i32;
}

/// Receives throttled dirty rectangles while a page paints.
pub type ProgressiveCallback<'a> = Box<dyn FnMut(DirtyRect, &SharedFrame) + 'a>;

/// [`DisplayCallbacks`] implementation that collects completed pages and
/// delivers throttled progressive updates.
pub struct FrameCollector<'a> {
    dpi: u32,
    current: Option<SharedFrame>,
    dirty: Option<DirtyRect>,
    dirty_area: u64,
    progressive: Option<ProgressiveCallback<'a>>,
    cancel: Option<&'a dyn Fn() -> bool>,
    pages: Vec<Option<RenderedFrame>>,
    output_index: usize,
}

impl<'a> FrameCollector<'a> {
    pub fn new(dpi: u32) -> Self {
        Self {
            dpi,
            current: None,
            dirty: None,
            dirty_area: 0,
            progressive: None,
            cancel: None,
            pages: Vec::new(),
            output_index: 0,
        }
    }

    /// Deliver accumulated dirty rectangles to `callback`.
    pub fn with_progressive(mut self, callback: ProgressiveCallback<'a>) -> Self {
        self.progressive = Some(callback);
        self
    }

    /// Abort painting once `cancel` returns true.
    pub fn with_cancel(mut self, cancel: &'a dyn Fn() -> bool) -> Self {
        self.cancel = Some(cancel);
        self
    }

    /// The buffer currently being painted, if any.
    pub fn current_frame(&self) -> Option<SharedFrame> {
        self.current.clone()
    }

    pub fn output_index(&self) -> usize {
        self.output_index
    }

    pub fn pages(&self) -> &[Option<RenderedFrame>] {
        &self.pages
    }

    pub fn into_pages(self) -> Vec<Option<RenderedFrame>> {
        self.pages
    }

    fn release_frame(&mut self) {
        if let Some(frame) = self.current.take() {
            frame.invalidate();
        }
        self.dirty = None;
        self.dirty_area = 0;
    }

    fn flush_dirty(&mut self) {
        let (Some(rect), Some(frame)) = (self.dirty.take(), self.current.as_ref()) else {
            return;
        };
        self.dirty_area = 0;
        if let Some(callback) = self.progressive.as_mut() {
            callback(rect, frame);
        }
    }
}

impl DisplayCallbacks for FrameCollector<'_> {
    fn on_presize(&mut self, _width: u32, _height: u32, _stride: usize, _format: PixelFormat) -> i32 {
        self.release_frame();
        codes::OK
    }

    fn on_size(
        &mut self,
        width: u32,
        height: u32,
        stride: usize,
        format: PixelFormat,
    ) -> std::result::Result<SharedFrame, i32> {
        self.release_frame();
        debug!("Display size {}x{} ({:?})", width, height, format);
        let frame = SharedFrame::new(width, height, stride, format);
        self.current = Some(frame.clone());
        Ok(frame)
    }

    fn on_update(&mut self, x: u32, y: u32, width: u32, height: u32) -> i32 {
        if self.cancel.map(|cancel| cancel()).unwrap_or(false) {
            return codes::INTERRUPT;
        }
        let Some(frame) = self.current.as_ref() else {
            return codes::OK;
        };
        let (frame_width, frame_height) = frame.dimensions();
        let rect = DirtyRect::new(x, y, width, height);

        self.dirty = Some(match self.dirty {
            Some(dirty) => dirty.union(&rect),
            None => rect,
        });
        self.dirty_area += rect.area();

        let total = frame_width as u64 * frame_height as u64;
        if self.dirty_area * 100 > total {
            self.flush_dirty();
        }
        codes::OK
    }

    fn on_page(&mut self, _copies: u32, _flush: bool) -> i32 {
        self.flush_dirty();
        let image = self.current.as_ref().and_then(SharedFrame::snapshot);
        let code = match image {
            Some(image) => {
                self.pages.push(Some(RenderedFrame {
                    index: self.output_index,
                    dpi: self.dpi,
                    image,
                }));
                codes::OK
            }
            None => {
                warn!("Page {} completed without a frame buffer", self.output_index + 1);
                self.pages.push(None);
                codes::UNKNOWN_ERROR
            }
        };
        self.output_index += 1;
        code
    }

    fn on_preclose(&mut self) -> i32 {
        self.release_frame();
        codes::OK
    }
}
