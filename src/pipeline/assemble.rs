//! PDF assembly: ordered page images → one document.
//!
//! One page per image, sized at 96 dpi (`px * 72 / 96` points), image drawn
//! edge to edge. JPEG files with one or three components are embedded as-is
//! (`DCTDecode`); every other image is decoded to RGB8 and stored
//! zlib-compressed (`FlateDecode`).
//!
//! The document is written to a temp file next to `dest` and renamed into
//! place, so `dest` never holds a truncated PDF. The cancellation token is
//! checked before every page and once more before saving; a cancelled build
//! leaves nothing at `dest`.
//!
//! This is CPU-bound: [`assemble_pdf`] runs [`build_pdf`] on the blocking pool.

use crate::error::FlipError;
use crate::output::BookMetadata;
use crate::progress::ProgressCallback;
use flate2::write::ZlibEncoder;
use flate2::Compression;
use lopdf::content::{Content, Operation};
use lopdf::{dictionary, Document, Object, ObjectId, Stream, StringFormat};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument};

/// Pixels per inch assumed for page images without a physical size.
const ASSUMED_DPI: f32 = 96.0;

/// Async wrapper: run [`build_pdf`] on the blocking pool.
pub async fn assemble_pdf(
    images: Vec<PathBuf>,
    dest: PathBuf,
    metadata: BookMetadata,
    cancel: CancellationToken,
    progress: Option<ProgressCallback>,
) -> Result<(), FlipError> {
    tokio::task::spawn_blocking(move || {
        build_pdf(&images, &dest, &metadata, &cancel, progress.as_ref())
    })
    .await
    .map_err(|e| FlipError::Internal(format!("PDF task panicked: {e}")))?
}

/// Build the PDF at `dest` from `images`, in the given order.
///
/// # Errors
/// * [`FlipError::NoImages`] for an empty list.
/// * [`FlipError::ImageProcessingFailed`] naming the first unreadable image.
/// * [`FlipError::BuildCancelled`] if `cancel` fired.
/// * [`FlipError::OutputWriteFailed`] if the document cannot be written.
#[instrument(skip_all, fields(pages = images.len(), dest = %dest.display()))]
pub fn build_pdf(
    images: &[PathBuf],
    dest: &Path,
    metadata: &BookMetadata,
    cancel: &CancellationToken,
    progress: Option<&ProgressCallback>,
) -> Result<(), FlipError> {
    if images.is_empty() {
        return Err(FlipError::NoImages);
    }
    let start = Instant::now();
    let total = images.len();
    if let Some(cb) = progress {
        cb.on_assembly_start(total);
    }

    let mut doc = Document::with_version("1.5");
    let pages_id = doc.new_object_id();
    let mut kids: Vec<Object> = Vec::with_capacity(total);

    for (i, path) in images.iter().enumerate() {
        if cancel.is_cancelled() {
            info!("PDF build cancelled before page {}", i + 1);
            return Err(FlipError::BuildCancelled);
        }

        let label = file_label(path);
        let image = load_page_image(path).map_err(|detail| FlipError::ImageProcessingFailed {
            file: label.clone(),
            detail,
        })?;
        let page_id = add_page(&mut doc, pages_id, image)?;
        kids.push(page_id.into());

        debug!("Embedded page {}/{}: {}", i + 1, total, label);
        if let Some(cb) = progress {
            cb.on_page_embedded(i + 1, total, &label);
        }
    }

    doc.objects.insert(
        pages_id,
        Object::Dictionary(dictionary! {
            "Type" => "Pages",
            "Kids" => kids,
            "Count" => total as i64,
        }),
    );
    let catalog_id = doc.add_object(dictionary! {
        "Type" => "Catalog",
        "Pages" => pages_id,
    });
    doc.trailer.set("Root", catalog_id);

    let mut info = lopdf::Dictionary::new();
    if let Some(title) = metadata.title.as_deref().filter(|t| !t.is_empty()) {
        info.set("Title", text_string(title));
    }
    if let Some(subject) = metadata.description.as_deref().filter(|d| !d.is_empty()) {
        info.set("Subject", text_string(subject));
    }
    info.set("Producer", text_string(concat!("fliphtml5-dl ", env!("CARGO_PKG_VERSION"))));
    let info_id = doc.add_object(info);
    doc.trailer.set("Info", info_id);

    if cancel.is_cancelled() {
        info!("PDF build cancelled before save");
        return Err(FlipError::BuildCancelled);
    }

    save_atomic(&mut doc, dest)?;
    info!(
        "Wrote {} ({} pages) in {}ms",
        dest.display(),
        total,
        start.elapsed().as_millis()
    );
    if let Some(cb) = progress {
        cb.on_assembly_complete(dest);
    }
    Ok(())
}

/// A page image ready to embed.
struct PageImage {
    width: u32,
    height: u32,
    color_space: &'static str,
    filter: &'static str,
    data: Vec<u8>,
}

fn load_page_image(path: &Path) -> Result<PageImage, String> {
    let bytes = std::fs::read(path).map_err(|e| e.to_string())?;
    let format = image::guess_format(&bytes).map_err(|e| e.to_string())?;

    if format == image::ImageFormat::Jpeg {
        if let Some(header) = jpeg_header(&bytes) {
            let color_space = match header.components {
                1 => Some("DeviceGray"),
                3 => Some("DeviceRGB"),
                _ => None,
            };
            if let Some(color_space) = color_space {
                return Ok(PageImage {
                    width: header.width as u32,
                    height: header.height as u32,
                    color_space,
                    filter: "DCTDecode",
                    data: bytes,
                });
            }
        } else {
            return Err("JPEG has no frame header".into());
        }
    }

    let decoded = image::load_from_memory_with_format(&bytes, format)
        .map_err(|e| e.to_string())?
        .to_rgb8();
    let (width, height) = decoded.dimensions();
    let mut encoder = ZlibEncoder::new(Vec::new(), Compression::default());
    encoder.write_all(decoded.as_raw()).map_err(|e| e.to_string())?;
    let data = encoder.finish().map_err(|e| e.to_string())?;

    Ok(PageImage {
        width,
        height,
        color_space: "DeviceRGB",
        filter: "FlateDecode",
        data,
    })
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct JpegHeader {
    width: u16,
    height: u16,
    components: u8,
}

/// Read dimensions and component count from the first SOFn marker.
fn jpeg_header(bytes: &[u8]) -> Option<JpegHeader> {
    if bytes.get(..2)? != [0xFF, 0xD8] {
        return None;
    }
    let mut pos = 2;
    while pos + 4 <= bytes.len() {
        if bytes[pos] != 0xFF {
            return None;
        }
        let marker = bytes[pos + 1];
        if marker == 0xFF {
            pos += 1;
            continue;
        }
        if marker == 0xD8 || marker == 0x01 || (0xD0..=0xD7).contains(&marker) {
            pos += 2;
            continue;
        }
        let len = u16::from_be_bytes([bytes[pos + 2], bytes[pos + 3]]) as usize;
        let is_sof = (0xC0..=0xCF).contains(&marker) && !matches!(marker, 0xC4 | 0xC8 | 0xCC);
        if is_sof {
            let seg = bytes.get(pos + 4..pos + 2 + len)?;
            if seg.len() < 6 {
                return None;
            }
            return Some(JpegHeader {
                height: u16::from_be_bytes([seg[1], seg[2]]),
                width: u16::from_be_bytes([seg[3], seg[4]]),
                components: seg[5],
            });
        }
        if marker == 0xD9 || marker == 0xDA {
            return None;
        }
        pos += 2 + len;
    }
    None
}

fn add_page(doc: &mut Document, pages_id: ObjectId, image: PageImage) -> Result<ObjectId, FlipError> {
    let width_pt = image.width as f32 * 72.0 / ASSUMED_DPI;
    let height_pt = image.height as f32 * 72.0 / ASSUMED_DPI;

    let image_stream = Stream::new(
        dictionary! {
            "Type" => "XObject",
            "Subtype" => "Image",
            "Width" => image.width as i64,
            "Height" => image.height as i64,
            "ColorSpace" => image.color_space,
            "BitsPerComponent" => 8,
            "Filter" => image.filter,
        },
        image.data,
    )
    .with_compression(false);
    let image_id = doc.add_object(image_stream);

    let content = Content {
        operations: vec![
            Operation::new("q", vec![]),
            Operation::new(
                "cm",
                vec![
                    width_pt.into(),
                    0.into(),
                    0.into(),
                    height_pt.into(),
                    0.into(),
                    0.into(),
                ],
            ),
            Operation::new("Do", vec!["Im0".into()]),
            Operation::new("Q", vec![]),
        ],
    };
    let content_bytes = content
        .encode()
        .map_err(|e| FlipError::Internal(format!("Failed to encode page content: {e}")))?;
    let content_id = doc.add_object(Stream::new(dictionary! {}, content_bytes));

    Ok(doc.add_object(dictionary! {
        "Type" => "Page",
        "Parent" => pages_id,
        "MediaBox" => vec![0.into(), 0.into(), width_pt.into(), height_pt.into()],
        "Resources" => dictionary! {
            "XObject" => dictionary! { "Im0" => image_id },
        },
        "Contents" => content_id,
    }))
}

/// PDF text string: literal for ASCII, UTF-16BE with BOM otherwise.
fn text_string(value: &str) -> Object {
    if value.is_ascii() {
        Object::String(value.as_bytes().to_vec(), StringFormat::Literal)
    } else {
        let mut bytes = vec![0xFE, 0xFF];
        for unit in value.encode_utf16() {
            bytes.extend_from_slice(&unit.to_be_bytes());
        }
        Object::String(bytes, StringFormat::Hexadecimal)
    }
}

fn save_atomic(doc: &mut Document, dest: &Path) -> Result<(), FlipError> {
    let write_err = |source: std::io::Error| FlipError::OutputWriteFailed {
        path: dest.to_path_buf(),
        source,
    };

    let parent = match dest.parent() {
        Some(p) if !p.as_os_str().is_empty() => p,
        _ => Path::new("."),
    };
    std::fs::create_dir_all(parent).map_err(write_err)?;

    let mut tmp = tempfile::Builder::new()
        .prefix(".pdf-")
        .suffix(".part")
        .tempfile_in(parent)
        .map_err(write_err)?;
    doc.save_to(&mut tmp)
        .map_err(|e| write_err(std::io::Error::other(e.to_string())))?;
    tmp.as_file().sync_all().map_err(write_err)?;
    tmp.persist(dest).map_err(|e| write_err(e.error))?;
    Ok(())
}

fn file_label(path: &Path) -> String {
    path.file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| path.display().to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::progress::DownloadProgressCallback;
    use std::sync::Arc;

    fn write_png(dir: &Path, name: &str, w: u32, h: u32) -> PathBuf {
        let path = dir.join(name);
        image::RgbImage::from_pixel(w, h, image::Rgb([200, 10, 10]))
            .save(&path)
            .unwrap();
        path
    }

    fn write_jpeg(dir: &Path, name: &str, w: u32, h: u32) -> PathBuf {
        let path = dir.join(name);
        image::RgbImage::from_pixel(w, h, image::Rgb([10, 200, 10]))
            .save(&path)
            .unwrap();
        path
    }

    fn meta(title: &str) -> BookMetadata {
        BookMetadata {
            title: Some(title.into()),
            description: Some("About the book".into()),
        }
    }

    #[test]
    fn two_pages_in_order_with_info() {
        let dir = tempfile::tempdir().unwrap();
        let images = vec![
            write_jpeg(dir.path(), "001_a.jpg", 96, 192),
            write_png(dir.path(), "002_b.png", 192, 96),
        ];
        let dest = dir.path().join("out").join("book.pdf");

        build_pdf(&images, &dest, &meta("Two Pages"), &CancellationToken::new(), None).unwrap();

        let doc = Document::load(&dest).unwrap();
        let pages = doc.get_pages();
        assert_eq!(pages.len(), 2);

        // Page 1 is the portrait JPEG: 72 x 144 pt.
        let first = doc.get_dictionary(pages[&1]).unwrap();
        let media = first.get(b"MediaBox").unwrap().as_array().unwrap();
        assert_eq!(media[2].as_float().unwrap(), 72.0);
        assert_eq!(media[3].as_float().unwrap(), 144.0);

        let info_id = doc.trailer.get(b"Info").unwrap().as_reference().unwrap();
        let info = doc.get_dictionary(info_id).unwrap();
        assert_eq!(info.get(b"Title").unwrap().as_str().unwrap(), b"Two Pages");
        assert_eq!(
            info.get(b"Subject").unwrap().as_str().unwrap(),
            b"About the book"
        );
    }

    #[test]
    fn jpeg_header_is_read() {
        let dir = tempfile::tempdir().unwrap();
        let path = write_jpeg(dir.path(), "x.jpg", 33, 17);
        let header = jpeg_header(&std::fs::read(path).unwrap()).unwrap();
        assert_eq!((header.width, header.height, header.components), (33, 17, 3));
        assert_eq!(jpeg_header(b"\xFF\xD8\xFF\xD9"), None);
        assert_eq!(jpeg_header(b"not a jpeg"), None);
    }

    #[test]
    fn empty_list_is_no_images() {
        let dir = tempfile::tempdir().unwrap();
        let err = build_pdf(
            &[],
            &dir.path().join("x.pdf"),
            &BookMetadata::default(),
            &CancellationToken::new(),
            None,
        )
        .unwrap_err();
        assert!(matches!(err, FlipError::NoImages));
    }

    #[test]
    fn corrupt_image_names_the_file() {
        let dir = tempfile::tempdir().unwrap();
        let good = write_png(dir.path(), "001_a.png", 8, 8);
        let bad = dir.path().join("002_b.jpg");
        std::fs::write(&bad, b"definitely not an image").unwrap();
        let dest = dir.path().join("book.pdf");

        let err = build_pdf(
            &[good, bad],
            &dest,
            &BookMetadata::default(),
            &CancellationToken::new(),
            None,
        )
        .unwrap_err();
        match err {
            FlipError::ImageProcessingFailed { file, .. } => assert_eq!(file, "002_b.jpg"),
            other => panic!("unexpected error: {other}"),
        }
        assert!(!dest.exists());
    }

    struct CancelAfterFirst(CancellationToken);

    impl DownloadProgressCallback for CancelAfterFirst {
        fn on_page_embedded(&self, page_num: usize, _total: usize, _label: &str) {
            if page_num == 1 {
                self.0.cancel();
            }
        }
    }

    #[test]
    fn cancel_mid_build_leaves_no_file() {
        let dir = tempfile::tempdir().unwrap();
        let images: Vec<PathBuf> = (1..=3)
            .map(|i| write_png(dir.path(), &format!("{i:03}_p.png"), 8, 8))
            .collect();
        let dest = dir.path().join("book.pdf");
        let cancel = CancellationToken::new();
        let cb: ProgressCallback = Arc::new(CancelAfterFirst(cancel.clone()));

        let err = build_pdf(&images, &dest, &meta("t"), &cancel, Some(&cb)).unwrap_err();
        assert!(matches!(err, FlipError::BuildCancelled));
        assert!(!dest.exists());
        let leftovers: Vec<_> = std::fs::read_dir(dir.path())
            .unwrap()
            .filter_map(|e| e.ok())
            .filter(|e| e.file_name().to_string_lossy().ends_with(".part"))
            .collect();
        assert!(leftovers.is_empty());
    }

    #[test]
    fn non_ascii_text_is_utf16() {
        match text_string("Café") {
            Object::String(bytes, _) => {
                assert_eq!(&bytes[..2], &[0xFE, 0xFF]);
                assert_eq!(bytes.len(), 2 + 4 * 2);
            }
            other => panic!("unexpected object: {other:?}"),
        }
    }

    #[tokio::test]
    async fn async_wrapper_builds() {
        let dir = tempfile::tempdir().unwrap();
        let images = vec![write_png(dir.path(), "001_a.png", 4, 4)];
        let dest = dir.path().join("one.pdf");
        assemble_pdf(
            images,
            dest.clone(),
            BookMetadata::default(),
            CancellationToken::new(),
            None,
        )
        .await
        .unwrap();
        assert_eq!(Document::load(&dest).unwrap().get_pages().len(), 1);
    }
}
