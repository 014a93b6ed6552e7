//! Minimal PDF probing: page count, first page size, and the first page's
//! scanned image.
//!
//! Only scanned books are supported for covers: the first page must carry an
//! image XObject that is either DCT (JPEG) encoded or raw 8-bit RGB/Gray.
//! Vector pages are not rasterized.

use camino::Utf8Path;
use image::{DynamicImage, GrayImage, RgbImage};
use lopdf::{Dictionary, Document, Object, ObjectId};
use shelf_core::PageDimensions;

use crate::error::{RenderError, ScanError};

/// Longest `/Parent` chain or reference chain followed before giving up.
const MAX_INDIRECTION: usize = 32;

/// What a probe learns about a document.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PdfInfo {
    /// Number of pages.
    pub page_count: u32,
    /// First page `MediaBox` size in points, if present.
    pub first_page: Option<PageDimensions>,
}

/// Reads the page tree of a PDF.
///
/// # Errors
///
/// Returns [`ScanError::CorruptDocument`] if the file cannot be parsed or has
/// no pages.
pub fn probe(path: &Utf8Path) -> Result<PdfInfo, ScanError> {
    let doc = Document::load(path).map_err(|e| ScanError::corrupt(path, e))?;
    let pages = doc.get_pages();
    let Some(&first) = pages.values().next() else {
        return Err(ScanError::corrupt(path, "document has no pages"));
    };
    let page_count =
        u32::try_from(pages.len()).map_err(|_| ScanError::corrupt(path, "too many pages"))?;

    Ok(PdfInfo {
        page_count,
        first_page: media_box(&doc, first),
    })
}

/// Extracts the largest supported image on the first page.
///
/// # Errors
///
/// Returns [`RenderError::DecodeFailure`] if the document cannot be parsed
/// and [`RenderError::UnsupportedFormat`] if the first page has no
/// extractable image.
pub fn first_page_image(
    path: &Utf8Path,
    limits: image::Limits,
) -> Result<DynamicImage, RenderError> {
    let doc = Document::load(path).map_err(RenderError::decode)?;
    let first = doc
        .get_pages()
        .values()
        .next()
        .copied()
        .ok_or_else(|| RenderError::decode("document has no pages"))?;

    let page = doc.get_dictionary(first).map_err(RenderError::decode)?;
    let resources = inherited(&doc, page, b"Resources")
        .and_then(|o| dict(&doc, o))
        .ok_or_else(|| RenderError::unsupported("first page has no resources"))?;
    let xobjects = resources
        .get(b"XObject")
        .ok()
        .and_then(|o| dict(&doc, o))
        .ok_or_else(|| RenderError::unsupported("first page has no images"))?;

    let mut best: Option<(u64, PageImage<'_>)> = None;
    for (_, obj) in xobjects.iter() {
        let Some(candidate) = page_image(&doc, obj) else {
            continue;
        };
        let area = u64::from(candidate.width) * u64::from(candidate.height);
        if best.as_ref().is_none_or(|(a, _)| area > *a) {
            best = Some((area, candidate));
        }
    }
    let (_, image) =
        best.ok_or_else(|| RenderError::unsupported("first page has no supported image"))?;
    image.decode(limits)
}

enum Encoding {
    Dct,
    Raw { channels: u8 },
}

struct PageImage<'a> {
    width: u32,
    height: u32,
    encoding: Encoding,
    stream: &'a lopdf::Stream,
}

impl PageImage<'_> {
    fn decode(self, limits: image::Limits) -> Result<DynamicImage, RenderError> {
        match self.encoding {
            Encoding::Dct => {
                let mut reader = image::ImageReader::with_format(
                    std::io::Cursor::new(&self.stream.content),
                    image::ImageFormat::Jpeg,
                );
                reader.limits(limits);
                Ok(reader.decode()?)
            }
            Encoding::Raw { channels } => {
                let data = if self.stream.dict.get(b"Filter").is_ok() {
                    self.stream
                        .decompressed_content()
                        .map_err(RenderError::decode)?
                } else {
                    self.stream.content.clone()
                };
                let image = if channels == 3 {
                    RgbImage::from_raw(self.width, self.height, data).map(DynamicImage::ImageRgb8)
                } else {
                    GrayImage::from_raw(self.width, self.height, data)
                        .map(DynamicImage::ImageLuma8)
                };
                image.ok_or_else(|| RenderError::decode("image stream is shorter than declared"))
            }
        }
    }
}

fn page_image<'a>(doc: &'a Document, obj: &'a Object) -> Option<PageImage<'a>> {
    let stream = match resolve(doc, obj)? {
        Object::Stream(s) => s,
        _ => return None,
    };
    let dict = &stream.dict;
    if !name_is(dict.get(b"Subtype").ok()?, b"Image") {
        return None;
    }
    let width = u32::try_from(integer(doc, dict.get(b"Width").ok()?)?).ok()?;
    let height = u32::try_from(integer(doc, dict.get(b"Height").ok()?)?).ok()?;
    if width == 0 || height == 0 {
        return None;
    }

    let filters = filter_names(doc, dict);
    let encoding = match filters.as_slice() {
        [f] if f.as_slice() == b"DCTDecode" => Encoding::Dct,
        [] => raw_encoding(doc, dict)?,
        [f] if f.as_slice() == b"FlateDecode" => raw_encoding(doc, dict)?,
        _ => return None,
    };
    Some(PageImage {
        width,
        height,
        encoding,
        stream,
    })
}

fn raw_encoding(doc: &Document, dict: &Dictionary) -> Option<Encoding> {
    let bits = dict.get(b"BitsPerComponent").ok().and_then(|o| integer(doc, o));
    if bits != Some(8) {
        return None;
    }
    let space = resolve(doc, dict.get(b"ColorSpace").ok()?)?;
    if name_is(space, b"DeviceRGB") {
        Some(Encoding::Raw { channels: 3 })
    } else if name_is(space, b"DeviceGray") {
        Some(Encoding::Raw { channels: 1 })
    } else {
        None
    }
}

fn filter_names(doc: &Document, dict: &Dictionary) -> Vec<Vec<u8>> {
    let Some(filter) = dict.get(b"Filter").ok().and_then(|o| resolve(doc, o)) else {
        return Vec::new();
    };
    match filter {
        Object::Name(name) => vec![name.clone()],
        Object::Array(items) => items
            .iter()
            .filter_map(|o| match resolve(doc, o)? {
                Object::Name(name) => Some(name.clone()),
                _ => None,
            })
            .collect(),
        _ => Vec::new(),
    }
}

fn media_box(doc: &Document, page_id: ObjectId) -> Option<PageDimensions> {
    let page = doc.get_dictionary(page_id).ok()?;
    let Object::Array(rect) = resolve(doc, inherited(doc, page, b"MediaBox")?)? else {
        return None;
    };
    let [x0, y0, x1, y1] = rect.as_slice() else {
        return None;
    };
    let coords = [x0, y0, x1, y1].map(|o| number(doc, o));
    let [Some(x0), Some(y0), Some(x1), Some(y1)] = coords else {
        return None;
    };
    Some(PageDimensions::new(points(x1 - x0), points(y1 - y0)))
}

#[allow(clippy::cast_sign_loss)] // clamped to non-negative first
fn points(span: f64) -> u32 {
    span.abs().round().min(f64::from(u32::MAX)) as u32
}

/// Looks up a page attribute, following `/Parent` for inheritable keys.
fn inherited<'a>(doc: &'a Document, page: &'a Dictionary, key: &[u8]) -> Option<&'a Object> {
    let mut current = page;
    for _ in 0..MAX_INDIRECTION {
        if let Ok(value) = current.get(key) {
            return Some(value);
        }
        current = dict(doc, current.get(b"Parent").ok()?)?;
    }
    None
}

fn resolve<'a>(doc: &'a Document, mut obj: &'a Object) -> Option<&'a Object> {
    for _ in 0..MAX_INDIRECTION {
        match obj {
            Object::Reference(id) => obj = doc.get_object(*id).ok()?,
            other => return Some(other),
        }
    }
    None
}

fn dict<'a>(doc: &'a Document, obj: &'a Object) -> Option<&'a Dictionary> {
    match resolve(doc, obj)? {
        Object::Dictionary(d) => Some(d),
        Object::Stream(s) => Some(&s.dict),
        _ => None,
    }
}

fn integer(doc: &Document, obj: &Object) -> Option<i64> {
    match resolve(doc, obj)? {
        Object::Integer(i) => Some(*i),
        _ => None,
    }
}

#[allow(clippy::cast_precision_loss)] // page coordinates are small
fn number(doc: &Document, obj: &Object) -> Option<f64> {
    match resolve(doc, obj)? {
        Object::Integer(i) => Some(*i as f64),
        Object::Real(r) => Some(f64::from(*r)),
        _ => None,
    }
}

fn name_is(obj: &Object, expected: &[u8]) -> bool {
    matches!(obj, Object::Name(name) if name.as_slice() == expected)
}
