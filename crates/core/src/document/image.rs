//! Raster image documents.
//!
//! Each animation frame of a GIF or APNG is one page; every other image is a
//! single page. Images reach the engine as an intermediate PDF with one page
//! per frame, sized to the frame's physical size.

use super::{DocumentBackend, DocumentType, RenderOptions};
use crate::engine::{EngineArgs, EngineService, ProgressiveCallback, RenderedFrame};
use crate::error::{ConversionError, Result};
use crate::raster::{apply_background, rotate, PageSize};
use image::codecs::gif::GifDecoder;
use image::codecs::png::PngDecoder;
use image::{imageops, AnimationDecoder, DynamicImage, ImageFormat, ImageReader, RgbaImage};
use lopdf::content::{Content, Operation};
use lopdf::{dictionary, Dictionary, Object, Stream};
use std::fs::File;
use std::io::{BufReader, Read};
use std::path::{Path, PathBuf};
use tiff::decoder::ifd::Value;
use tiff::tags::Tag;
use tracing::{debug, warn};

/// Resolution assumed when the file records none.
pub const DEFAULT_IMAGE_DPI: f32 = 96.0;

pub struct ImageDocument {
    path: PathBuf,
    format: Option<ImageFormat>,
    frame_count: usize,
    dpi: (f32, f32),
    converted: Option<PathBuf>,
}

impl ImageDocument {
    pub fn open(path: &Path) -> Result<Self> {
        let format = ImageReader::open(path)
            .and_then(|reader| reader.with_guessed_format())
            .map_err(|e| ConversionError::io(path, e))?
            .format();
        let frame_count = count_frames(path, format).unwrap_or_else(|e| {
            debug!("Could not count frames of {:?}, assuming one: {}", path, e);
            1
        });
        let dpi = read_dpi(path, format);

        Ok(Self {
            path: path.to_path_buf(),
            format,
            frame_count,
            dpi,
            converted: None,
        })
    }

    /// Horizontal and vertical resolution of the source.
    pub fn dpi(&self) -> (f32, f32) {
        self.dpi
    }

    /// Decode all frames as RGBA.
    fn load_frames(&self) -> Result<Vec<RgbaImage>> {
        if self.frame_count > 1 {
            if let Some(frames) = self.decode_animation()? {
                return Ok(frames);
            }
        }
        Ok(vec![image::open(&self.path)?.to_rgba8()])
    }

    fn decode_animation(&self) -> Result<Option<Vec<RgbaImage>>> {
        let file = File::open(&self.path).map_err(|e| ConversionError::io(&self.path, e))?;
        let reader = BufReader::new(file);
        let frames = match self.format {
            Some(ImageFormat::Gif) => GifDecoder::new(reader)?.into_frames().collect_frames()?,
            Some(ImageFormat::Png) => PngDecoder::new(reader)?
                .apng()?
                .into_frames()
                .collect_frames()?,
            _ => return Ok(None),
        };
        Ok(Some(frames.into_iter().map(|f| f.into_buffer()).collect()))
    }

    fn load_frame(&self, page: usize) -> Result<RgbaImage> {
        let mut frames = self.load_frames()?;
        if page == 0 || page > frames.len() {
            return Err(ConversionError::ImageError(format!(
                "frame {} of {} does not exist",
                page,
                frames.len()
            )));
        }
        Ok(frames.swap_remove(page - 1))
    }

    /// Target pixel size for rendering at `dpi`, preserving the source's
    /// horizontal/vertical resolution ratio.
    fn target_size(&self, width: u32, height: u32, options: &RenderOptions) -> (u32, u32) {
        let size = PageSize::from_pixels(width, height, self.dpi.0, self.dpi.1);
        let target = (
            size.width_pixels(options.dpi).max(1),
            size.height_pixels(options.dpi).max(1),
        );
        if options.rotation.swaps_axes() {
            (target.1, target.0)
        } else {
            target
        }
    }
}

/// Count animation frames. Non-animated formats have one.
fn count_frames(path: &Path, format: Option<ImageFormat>) -> Result<usize> {
    let open = || -> Result<BufReader<File>> {
        Ok(BufReader::new(
            File::open(path).map_err(|e| ConversionError::io(path, e))?,
        ))
    };
    let count = match format {
        Some(ImageFormat::Gif) => GifDecoder::new(open()?)?.into_frames().count(),
        Some(ImageFormat::Png) => {
            let decoder = PngDecoder::new(open()?)?;
            if decoder.is_apng()? {
                decoder.apng()?.into_frames().count()
            } else {
                1
            }
        }
        _ => 1,
    };
    Ok(count.max(1))
}

/// Resolution recorded in the file (PNG `pHYs`, JPEG JFIF density, TIFF
/// resolution tags), or the default.
fn read_dpi(path: &Path, format: Option<ImageFormat>) -> (f32, f32) {
    let default = (DEFAULT_IMAGE_DPI, DEFAULT_IMAGE_DPI);
    let read = match format {
        Some(ImageFormat::Png) => png_dpi,
        Some(ImageFormat::Jpeg) => jpeg_dpi,
        Some(ImageFormat::Tiff) => tiff_dpi,
        _ => return default,
    };
    let file = match File::open(path) {
        Ok(file) => file,
        Err(e) => {
            warn!("Failed to open {:?} for resolution: {}", path, e);
            return default;
        }
    };
    match read(BufReader::new(file)) {
        Ok(Some((x, y))) if x > 0.0 && y > 0.0 => (x, y),
        Ok(_) => default,
        Err(e) => {
            warn!("Failed to read resolution of {:?}: {}", path, e);
            default
        }
    }
}

fn png_dpi(reader: BufReader<File>) -> Result<Option<(f32, f32)>> {
    let decoder = png::Decoder::new(reader);
    let reader = decoder
        .read_info()
        .map_err(|e| ConversionError::ImageError(e.to_string()))?;
    Ok(match reader.info().pixel_dims {
        Some(dims) if dims.unit == png::Unit::Meter => Some((
            dims.xppu as f32 * METERS_PER_INCH,
            dims.yppu as f32 * METERS_PER_INCH,
        )),
        _ => None,
    })
}

const METERS_PER_INCH: f32 = 0.0254;
const CM_PER_INCH: f32 = 2.54;

/// Density from the JFIF `APP0` segment. Segments are walked until the
/// first scan; a missing segment or an aspect-ratio-only unit yields `None`.
fn jpeg_dpi(mut reader: BufReader<File>) -> Result<Option<(f32, f32)>> {
    let io = |e: std::io::Error| ConversionError::ImageError(e.to_string());
    let mut marker = [0u8; 2];
    reader.read_exact(&mut marker).map_err(io)?;
    if marker != [0xFF, 0xD8] {
        return Err(ConversionError::ImageError("missing JPEG SOI marker".to_string()));
    }

    loop {
        reader.read_exact(&mut marker).map_err(io)?;
        if marker[0] != 0xFF {
            return Ok(None);
        }
        // Start of scan or end of image: no density ahead.
        if marker[1] == 0xDA || marker[1] == 0xD9 {
            return Ok(None);
        }
        let mut length = [0u8; 2];
        reader.read_exact(&mut length).map_err(io)?;
        let length = u16::from_be_bytes(length) as usize;
        if length < 2 {
            return Ok(None);
        }
        let mut segment = vec![0u8; length - 2];
        reader.read_exact(&mut segment).map_err(io)?;

        if marker[1] == 0xE0 && segment.len() >= 12 && segment.starts_with(b"JFIF\0") {
            let x = u16::from_be_bytes([segment[8], segment[9]]) as f32;
            let y = u16::from_be_bytes([segment[10], segment[11]]) as f32;
            return Ok(match segment[7] {
                1 => Some((x, y)),
                2 => Some((x * CM_PER_INCH, y * CM_PER_INCH)),
                _ => None,
            });
        }
    }
}

/// Density from the first IFD's `XResolution`/`YResolution` and
/// `ResolutionUnit` (inch when absent).
fn tiff_dpi(reader: BufReader<File>) -> Result<Option<(f32, f32)>> {
    let tiff_err = |e: tiff::TiffError| ConversionError::ImageError(e.to_string());
    let mut decoder = tiff::decoder::Decoder::new(reader).map_err(tiff_err)?;

    let unit = decoder
        .find_tag_unsigned::<u16>(Tag::ResolutionUnit)
        .map_err(tiff_err)?
        .unwrap_or(2);
    let scale = match unit {
        2 => 1.0,
        3 => CM_PER_INCH,
        _ => return Ok(None),
    };

    let mut resolution = |tag: Tag| -> Result<Option<f32>> {
        Ok(match decoder.find_tag(tag).map_err(tiff_err)? {
            Some(Value::Rational(n, d)) if d != 0 => Some(n as f32 / d as f32),
            Some(Value::Float(v)) => Some(v),
            Some(Value::Double(v)) => Some(v as f32),
            _ => None,
        })
    };
    let x = resolution(Tag::XResolution)?;
    let y = resolution(Tag::YResolution)?;
    Ok(match (x, y) {
        (Some(x), Some(y)) => Some((x * scale, y * scale)),
        (Some(x), None) => Some((x * scale, x * scale)),
        _ => None,
    })
}

impl DocumentBackend for ImageDocument {
    fn doc_type(&self) -> DocumentType {
        DocumentType::Image
    }

    fn page_count(&self) -> Result<usize> {
        Ok(self.frame_count)
    }

    fn convert_to_pdf(&mut self, output: &Path) -> Result<()> {
        let frames = self.load_frames()?;
        let frame_total = frames.len();

        let mut doc = lopdf::Document::with_version("1.5");
        let pages_id = doc.new_object_id();
        let mut kids: Vec<Object> = Vec::with_capacity(frame_total);

        for frame in frames {
            let rgb = DynamicImage::ImageRgba8(apply_background(frame, (255, 255, 255))).to_rgb8();
            let (width, height) = rgb.dimensions();
            let size = PageSize::from_pixels(width, height, self.dpi.0, self.dpi.1);

            let image_id = doc.add_object(Stream::new(
                dictionary! {
                    "Type" => "XObject",
                    "Subtype" => "Image",
                    "Width" => width as i64,
                    "Height" => height as i64,
                    "ColorSpace" => "DeviceRGB",
                    "BitsPerComponent" => 8_i64,
                },
                rgb.into_raw(),
            ));

            let content = Content {
                operations: vec![
                    Operation::new("q", vec![]),
                    Operation::new(
                        "cm",
                        vec![
                            Object::Real(size.width_points),
                            Object::Integer(0),
                            Object::Integer(0),
                            Object::Real(size.height_points),
                            Object::Integer(0),
                            Object::Integer(0),
                        ],
                    ),
                    Operation::new("Do", vec![Object::Name(b"Im0".to_vec())]),
                    Operation::new("Q", vec![]),
                ],
            };
            let content_id = doc.add_object(Stream::new(Dictionary::new(), content.encode()?));

            let page_id = doc.add_object(dictionary! {
                "Type" => "Page",
                "Parent" => pages_id,
                "MediaBox" => vec![
                    Object::Integer(0),
                    Object::Integer(0),
                    Object::Real(size.width_points),
                    Object::Real(size.height_points),
                ],
                "Contents" => content_id,
                "Resources" => dictionary! {
                    "XObject" => dictionary! {
                        "Im0" => image_id,
                    },
                },
            });
            kids.push(page_id.into());
        }

        doc.objects.insert(
            pages_id,
            Object::Dictionary(dictionary! {
                "Type" => "Pages",
                "Kids" => kids,
                "Count" => frame_total as i64,
            }),
        );
        let catalog_id = doc.add_object(dictionary! {
            "Type" => "Catalog",
            "Pages" => pages_id,
        });
        doc.trailer.set("Root", catalog_id);
        doc.compress();
        doc.save(output)
            .map_err(|e| ConversionError::PdfError(format!("{}: {}", output.display(), e)))?;

        debug!("Wrote {} image pages from {:?} to {:?}", frame_total, self.path, output);
        Ok(())
    }

    fn render_page(
        &mut self,
        _engine: &EngineService,
        page: usize,
        options: &RenderOptions,
        cancel: &dyn Fn() -> bool,
        _progressive: Option<ProgressiveCallback<'_>>,
    ) -> Result<RenderedFrame> {
        let frame = self.load_frame(page)?;
        if cancel() {
            return Err(ConversionError::OperationCanceled);
        }

        let (width, height) = self.target_size(frame.width(), frame.height(), options);
        if cancel() {
            return Err(ConversionError::OperationCanceled);
        }

        let rotated = rotate(frame, options.rotation);
        if cancel() {
            return Err(ConversionError::OperationCanceled);
        }

        let image = imageops::resize(&rotated, width, height, imageops::FilterType::Lanczos3);
        Ok(RenderedFrame {
            index: page - 1,
            dpi: options.dpi,
            image,
        })
    }

    fn run_initialize(&self, args: &mut EngineArgs) -> Result<()> {
        let converted = self.converted.as_ref().ok_or_else(|| {
            ConversionError::NotImplemented(format!(
                "{} must be converted to PDF before the engine can read it",
                self.path.display()
            ))
        })?;
        args.input_file(converted);
        Ok(())
    }

    fn run_page(&self, _args: &mut EngineArgs, _page: usize) -> Result<()> {
        Err(ConversionError::NotImplemented(
            "images are run as a whole document".to_string(),
        ))
    }

    fn engine_input(&mut self, scratch: &Path) -> Result<PathBuf> {
        if let Some(converted) = &self.converted {
            if converted.exists() {
                return Ok(converted.clone());
            }
        }

        std::fs::create_dir_all(scratch).map_err(|e| ConversionError::io(scratch, e))?;
        let stem = self
            .path
            .file_stem()
            .map(|s| s.to_string_lossy().into_owned())
            .unwrap_or_else(|| "image".to_string());
        let output = scratch.join(format!("{}-{}.pdf", stem, uuid::Uuid::new_v4()));
        self.convert_to_pdf(&output)?;
        self.converted = Some(output.clone());
        Ok(output)
    }

    fn ensure_no_open_renderer(&mut self) {
        if let Some(converted) = self.converted.take() {
            if let Err(e) = std::fs::remove_file(&converted) {
                debug!("Could not remove intermediate {:?}: {}", converted, e);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::document::Rotation;
    use image::codecs::gif::GifEncoder;
    use image::codecs::jpeg::{JpegEncoder, PixelDensity, PixelDensityUnit};
    use image::{Delay, Frame, Rgba};
    use tiff::encoder::{colortype, Rational, TiffEncoder};
    use tiff::tags::ResolutionUnit;

    fn write_gif(path: &Path, frames: usize) {
        let file = File::create(path).unwrap();
        let mut encoder = GifEncoder::new(file);
        for i in 0..frames {
            let image = RgbaImage::from_pixel(4, 3, Rgba([(i * 40) as u8, 0, 0, 255]));
            encoder
                .encode_frame(Frame::from_parts(image, 0, 0, Delay::from_numer_denom_ms(100, 1)))
                .unwrap();
        }
    }

    fn write_png_with_dpi(path: &Path, width: u32, height: u32, dpi: u32) {
        let image = RgbaImage::from_pixel(width, height, Rgba([0, 128, 0, 255]));
        std::fs::write(path, crate::raster::encode_png(&image, dpi).unwrap()).unwrap();
    }

    fn write_jpeg_with_density(path: &Path, width: u32, height: u32, density: PixelDensity) {
        let image = image::RgbImage::from_pixel(width, height, image::Rgb([20, 40, 60]));
        let mut encoder = JpegEncoder::new(File::create(path).unwrap());
        encoder.set_pixel_density(density);
        encoder.encode_image(&image).unwrap();
    }

    fn write_tiff_with_resolution(
        path: &Path,
        width: u32,
        height: u32,
        unit: ResolutionUnit,
        dpi: u32,
    ) {
        let data = vec![200u8; (width * height * 3) as usize];
        let mut encoder = TiffEncoder::new(File::create(path).unwrap()).unwrap();
        let mut image = encoder.new_image::<colortype::RGB8>(width, height).unwrap();
        image.resolution(unit, Rational { n: dpi, d: 1 });
        image.write_data(&data).unwrap();
    }

    fn first_media_box(pdf_path: &Path) -> (f32, f32) {
        let pdf = lopdf::Document::load(pdf_path).unwrap();
        let (_, page_id) = pdf.get_pages().into_iter().next().unwrap();
        let page = pdf.get_dictionary(page_id).unwrap();
        let media_box = page.get(b"MediaBox").unwrap().as_array().unwrap();
        (media_box[2].as_float().unwrap(), media_box[3].as_float().unwrap())
    }

    #[test]
    fn test_gif_frames_are_pages() {
        let dir = tempfile::TempDir::new().unwrap();
        let path = dir.path().join("anim.gif");
        write_gif(&path, 3);

        let doc = ImageDocument::open(&path).unwrap();
        assert_eq!(doc.page_count().unwrap(), 3);
        assert_eq!(doc.dpi(), (DEFAULT_IMAGE_DPI, DEFAULT_IMAGE_DPI));
    }

    #[test]
    fn test_still_image_is_one_page() {
        let dir = tempfile::TempDir::new().unwrap();
        let path = dir.path().join("still.jpg");
        image::RgbImage::new(5, 5).save(&path).unwrap();

        let doc = ImageDocument::open(&path).unwrap();
        assert_eq!(doc.page_count().unwrap(), 1);
    }

    #[test]
    fn test_png_dpi_from_phys() {
        let dir = tempfile::TempDir::new().unwrap();
        let path = dir.path().join("scan.png");
        write_png_with_dpi(&path, 10, 10, 300);

        let doc = ImageDocument::open(&path).unwrap();
        let (x, y) = doc.dpi();
        assert!((x - 300.0).abs() < 0.1);
        assert!((y - 300.0).abs() < 0.1);
    }

    #[test]
    fn test_convert_gif_to_pdf_one_page_per_frame() {
        let dir = tempfile::TempDir::new().unwrap();
        let path = dir.path().join("anim.gif");
        write_gif(&path, 3);
        let output = dir.path().join("anim.pdf");

        let mut doc = ImageDocument::open(&path).unwrap();
        doc.convert_to_pdf(&output).unwrap();

        let pdf = lopdf::Document::load(&output).unwrap();
        assert_eq!(pdf.get_pages().len(), 3);
    }

    #[test]
    fn test_convert_sizes_pages_in_points() {
        let dir = tempfile::TempDir::new().unwrap();
        let path = dir.path().join("scan.png");
        // 300 px at 150 DPI is two inches, 144 points.
        write_png_with_dpi(&path, 300, 150, 150);
        let output = dir.path().join("scan.pdf");

        let mut doc = ImageDocument::open(&path).unwrap();
        doc.convert_to_pdf(&output).unwrap();

        let pdf = lopdf::Document::load(&output).unwrap();
        let (_, page_id) = pdf.get_pages().into_iter().next().unwrap();
        let page = pdf.get_dictionary(page_id).unwrap();
        let media_box = page.get(b"MediaBox").unwrap().as_array().unwrap();
        let width = media_box[2].as_float().unwrap();
        let height = media_box[3].as_float().unwrap();
        assert!((width - 144.0).abs() < 0.5, "width {}", width);
        assert!((height - 72.0).abs() < 0.5, "height {}", height);
    }

    #[test]
    fn test_jpeg_dpi_from_jfif_density() {
        let dir = tempfile::TempDir::new().unwrap();
        let path = dir.path().join("scan.jpg");
        write_jpeg_with_density(&path, 300, 150, PixelDensity::dpi(150));
        let output = dir.path().join("scan.pdf");

        let mut doc = ImageDocument::open(&path).unwrap();
        assert_eq!(doc.dpi(), (150.0, 150.0));
        doc.convert_to_pdf(&output).unwrap();

        let (width, height) = first_media_box(&output);
        assert!((width - 144.0).abs() < 0.5, "width {}", width);
        assert!((height - 72.0).abs() < 0.5, "height {}", height);
    }

    #[test]
    fn test_jpeg_density_per_centimeter() {
        let dir = tempfile::TempDir::new().unwrap();
        let path = dir.path().join("scan.jpg");
        let density = PixelDensity {
            density: (100, 50),
            unit: PixelDensityUnit::Centimeters,
        };
        write_jpeg_with_density(&path, 8, 8, density);

        let (x, y) = ImageDocument::open(&path).unwrap().dpi();
        assert!((x - 254.0).abs() < 0.1);
        assert!((y - 127.0).abs() < 0.1);
    }

    #[test]
    fn test_jpeg_aspect_ratio_only_uses_default() {
        let dir = tempfile::TempDir::new().unwrap();
        let path = dir.path().join("photo.jpg");
        let density = PixelDensity {
            density: (1, 1),
            unit: PixelDensityUnit::PixelAspectRatio,
        };
        write_jpeg_with_density(&path, 8, 8, density);

        let doc = ImageDocument::open(&path).unwrap();
        assert_eq!(doc.dpi(), (DEFAULT_IMAGE_DPI, DEFAULT_IMAGE_DPI));
    }

    #[test]
    fn test_tiff_dpi_from_resolution_tags() {
        let dir = tempfile::TempDir::new().unwrap();
        let path = dir.path().join("scan.tif");
        write_tiff_with_resolution(&path, 400, 200, ResolutionUnit::Inch, 200);
        let output = dir.path().join("scan.pdf");

        let mut doc = ImageDocument::open(&path).unwrap();
        assert_eq!(doc.dpi(), (200.0, 200.0));
        doc.convert_to_pdf(&output).unwrap();

        let (width, height) = first_media_box(&output);
        assert!((width - 144.0).abs() < 0.5, "width {}", width);
        assert!((height - 72.0).abs() < 0.5, "height {}", height);
    }

    #[test]
    fn test_tiff_resolution_in_centimeters() {
        let dir = tempfile::TempDir::new().unwrap();
        let path = dir.path().join("scan.tif");
        write_tiff_with_resolution(&path, 8, 8, ResolutionUnit::Centimeter, 40);

        let (x, y) = ImageDocument::open(&path).unwrap().dpi();
        assert!((x - 101.6).abs() < 0.1);
        assert!((y - 101.6).abs() < 0.1);
    }

    #[test]
    fn test_render_page_scales_and_rotates() {
        let dir = tempfile::TempDir::new().unwrap();
        let path = dir.path().join("scan.png");
        write_png_with_dpi(&path, 200, 100, 100);
        let mut doc = ImageDocument::open(&path).unwrap();
        let engine = EngineService::new(Box::new(crate::engine::ScriptedBackend::succeeding()));

        let options = RenderOptions::with_dpi(50);
        let frame = doc.render_page(&engine, 1, &options, &|| false, None).unwrap();
        assert_eq!(frame.image.dimensions(), (100, 50));

        let options = RenderOptions::with_dpi(50).rotation(Rotation::Cw90);
        let frame = doc.render_page(&engine, 1, &options, &|| false, None).unwrap();
        assert_eq!(frame.image.dimensions(), (50, 100));
    }

    #[test]
    fn test_render_page_cancelled() {
        let dir = tempfile::TempDir::new().unwrap();
        let path = dir.path().join("scan.png");
        write_png_with_dpi(&path, 20, 20, 96);
        let mut doc = ImageDocument::open(&path).unwrap();
        let engine = EngineService::new(Box::new(crate::engine::ScriptedBackend::succeeding()));

        let result = doc.render_page(&engine, 1, &RenderOptions::default(), &|| true, None);
        assert!(matches!(result, Err(ConversionError::OperationCanceled)));
    }

    #[test]
    fn test_engine_input_converts_once() {
        let dir = tempfile::TempDir::new().unwrap();
        let path = dir.path().join("anim.gif");
        write_gif(&path, 2);
        let scratch = dir.path().join("scratch");

        let mut doc = ImageDocument::open(&path).unwrap();
        let mut args = EngineArgs::new();
        assert!(doc.run_initialize(&mut args).is_err());

        let first = doc.engine_input(&scratch).unwrap();
        let second = doc.engine_input(&scratch).unwrap();
        assert_eq!(first, second);
        assert!(first.exists());
        doc.run_initialize(&mut args).unwrap();
        assert!(args.build().contains(&first.display().to_string()));

        doc.ensure_no_open_renderer();
        assert!(!first.exists());
    }
}
