//! Shared fixtures for scanner integration tests.

#![allow(dead_code)]

use std::sync::mpsc;
use std::sync::{Arc, Mutex};

use camino::{Utf8Path, Utf8PathBuf};
use image::{Rgb, RgbImage};
use lopdf::{dictionary, Document, Object, Stream};
use shelf_core::{
    Book, BookId, CatalogRow, CatalogSnapshot, CatalogStore, Category, CategoryId, Config,
    MemoryCatalog, RowKey, StoreError,
};
use shelf_scanner::Library;
use tempfile::TempDir;

/// A temporary library root at `<tempdir>/library`.
pub struct Fixture {
    pub dir: TempDir,
    pub root: Utf8PathBuf,
}

impl Fixture {
    pub fn new() -> Self {
        let dir = tempfile::tempdir().unwrap();
        let root = dir.path().join("library");
        std::fs::create_dir(&root).unwrap();
        // Scans resolve their root, so ids are built from the canonical path
        let root = Utf8PathBuf::from_path_buf(std::fs::canonicalize(root).unwrap()).unwrap();
        Self { dir, root }
    }

    pub fn path(&self, rel: &str) -> Utf8PathBuf {
        self.root.join(rel)
    }

    /// Scratch space next to the library root.
    pub fn scratch(&self, name: &str) -> Utf8PathBuf {
        Utf8PathBuf::from_path_buf(self.dir.path().join(name)).unwrap()
    }

    /// Writes a solid-color image; the format follows the extension.
    pub fn image(&self, rel: &str, width: u32, height: u32) -> Utf8PathBuf {
        let path = self.prepare(rel);
        let shade = (rel.len() * 7 % 256) as u8;
        RgbImage::from_pixel(width, height, Rgb([shade, 90, 200 - shade / 2]))
            .save(&path)
            .unwrap();
        path
    }

    /// Writes a PDF whose pages each show one raw RGB image.
    pub fn pdf(&self, rel: &str, pages: u32) -> Utf8PathBuf {
        let path = self.prepare(rel);
        write_pdf(&path, pages);
        path
    }

    pub fn file(&self, rel: &str, bytes: &[u8]) -> Utf8PathBuf {
        let path = self.prepare(rel);
        std::fs::write(&path, bytes).unwrap();
        path
    }

    pub fn config(&self) -> Config {
        let mut config = Config::default();
        config.library.root_path = self.root.clone();
        config.thumbnails.cover_width = 64;
        config
    }

    pub fn library(&self) -> (Library, Arc<MemoryCatalog>) {
        self.library_with(self.config())
    }

    pub fn library_with(&self, config: Config) -> (Library, Arc<MemoryCatalog>) {
        let catalog = Arc::new(MemoryCatalog::new());
        let library = Library::new(config, Arc::clone(&catalog) as Arc<dyn CatalogStore>).unwrap();
        (library, catalog)
    }

    /// The library root spelled relative to the current directory.
    #[cfg(unix)]
    pub fn relative_root(&self) -> Utf8PathBuf {
        let cwd = std::env::current_dir().unwrap();
        let mut rel = Utf8PathBuf::new();
        for _ in cwd.components().skip(1) {
            rel.push("..");
        }
        rel.push(self.root.strip_prefix("/").unwrap());
        rel
    }

    pub fn root_id(&self) -> CategoryId {
        CategoryId::from_path(&self.root)
    }

    pub fn book_id(&self, rel: &str) -> BookId {
        BookId::from_path(&self.path(rel))
    }

    fn prepare(&self, rel: &str) -> Utf8PathBuf {
        let path = self.path(rel);
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).unwrap();
        }
        path
    }
}

pub fn write_pdf(path: &Utf8Path, pages: u32) {
    let mut doc = Document::with_version("1.5");
    let pages_id = doc.new_object_id();

    let pixels = RgbImage::from_pixel(30, 40, Rgb([180, 40, 40])).into_raw();
    let image_id = doc.add_object(Stream::new(
        dictionary! {
            "Type" => "XObject",
            "Subtype" => "Image",
            "Width" => 30_i64,
            "Height" => 40_i64,
            "ColorSpace" => "DeviceRGB",
            "BitsPerComponent" => 8_i64,
        },
        pixels,
    ));

    let mut kids: Vec<Object> = Vec::new();
    for _ in 0..pages {
        let page_id = doc.add_object(dictionary! {
            "Type" => "Page",
            "Parent" => pages_id,
            "MediaBox" => vec![
                Object::Integer(0),
                Object::Integer(0),
                Object::Integer(595),
                Object::Integer(842),
            ],
            "Resources" => dictionary! {
                "XObject" => dictionary! { "Im0" => image_id },
            },
        });
        kids.push(page_id.into());
    }
    doc.objects.insert(
        pages_id,
        Object::Dictionary(dictionary! {
            "Type" => "Pages",
            "Kids" => kids,
            "Count" => i64::from(pages),
        }),
    );
    let catalog_id = doc.add_object(dictionary! {
        "Type" => "Catalog",
        "Pages" => pages_id,
    });
    doc.trailer.set("Root", catalog_id);
    doc.save(path).unwrap();
}

/// File names of an image book's pages.
pub fn page_names(book: &Book) -> Vec<String> {
    book.pages
        .iter()
        .filter_map(|p| p.image_path())
        .filter_map(|p| p.file_name())
        .map(str::to_owned)
        .collect()
}

/// A catalog whose next `snapshot` blocks until the armed gate is released.
#[derive(Debug, Default)]
pub struct GatedCatalog {
    inner: MemoryCatalog,
    gate: Mutex<Option<mpsc::Receiver<()>>>,
}

impl GatedCatalog {
    /// Blocks the next snapshot until the returned sender sends or drops.
    pub fn arm(&self) -> mpsc::Sender<()> {
        let (tx, rx) = mpsc::channel();
        *self.gate.lock().unwrap() = Some(rx);
        tx
    }
}

impl CatalogStore for GatedCatalog {
    fn snapshot(&self) -> Result<CatalogSnapshot, StoreError> {
        let gate = self.gate.lock().unwrap().take();
        if let Some(rx) = gate {
            let _ = rx.recv();
        }
        self.inner.snapshot()
    }

    fn insert(&self, row: &CatalogRow) -> Result<(), StoreError> {
        self.inner.insert(row)
    }

    fn update(&self, row: &CatalogRow) -> Result<(), StoreError> {
        self.inner.update(row)
    }

    fn delete(&self, key: RowKey) -> Result<(), StoreError> {
        self.inner.delete(key)
    }

    fn book(&self, id: BookId) -> Result<Option<Book>, StoreError> {
        self.inner.book(id)
    }

    fn category(&self, id: CategoryId) -> Result<Option<Category>, StoreError> {
        self.inner.category(id)
    }

    fn books_in_category(&self, id: CategoryId) -> Result<Vec<Book>, StoreError> {
        self.inner.books_in_category(id)
    }

    fn child_categories(&self, id: CategoryId) -> Result<Vec<Category>, StoreError> {
        self.inner.child_categories(id)
    }

    fn root_categories(&self) -> Result<Vec<Category>, StoreError> {
        self.inner.root_categories()
    }

    fn set_favorite(&self, id: BookId, favorite: bool) -> Result<(), StoreError> {
        self.inner.set_favorite(id, favorite)
    }

    fn favorites(&self) -> Result<Vec<BookId>, StoreError> {
        self.inner.favorites()
    }
}
