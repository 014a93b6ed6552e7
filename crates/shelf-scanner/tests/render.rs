//! Cover rendering against real files and shared caches.

mod common;

use std::sync::{Arc, Barrier};

use common::Fixture;
use lopdf::dictionary;
use shelf_core::ThumbnailConfig;
use shelf_scanner::{
    is_jpeg, DiskThumbnailStore, MemoryThumbnailStore, RenderError, ThumbnailRenderer,
    ThumbnailStore,
};

#[test]
fn test_concurrent_requests_render_once() {
    let fx = Fixture::new();
    let source = fx.image("Big/1.png", 900, 1200);
    let renderer = Arc::new(ThumbnailRenderer::new(
        &ThumbnailConfig::default(),
        Arc::new(MemoryThumbnailStore::new()),
    ));

    let barrier = Arc::new(Barrier::new(8));
    let handles: Vec<_> = (0..8)
        .map(|_| {
            let renderer = Arc::clone(&renderer);
            let barrier = Arc::clone(&barrier);
            let source = source.clone();
            std::thread::spawn(move || {
                barrier.wait();
                renderer.render(&source, 200).unwrap()
            })
        })
        .collect();
    let covers: Vec<_> = handles.into_iter().map(|h| h.join().unwrap()).collect();

    assert_eq!(renderer.renders_performed(), 1);
    assert!(covers.iter().all(|c| c.key == covers[0].key));
    assert!(covers.iter().all(|c| c.bytes == covers[0].bytes));
    assert!(is_jpeg(&covers[0].bytes));

    let decoded = image::load_from_memory(&covers[0].bytes).unwrap();
    assert_eq!((decoded.width(), decoded.height()), (200, 267));
}

#[test]
fn test_pdf_cover_from_first_page_image() {
    let fx = Fixture::new();
    let source = fx.pdf("Scan.pdf", 2);
    let renderer =
        ThumbnailRenderer::new(&ThumbnailConfig::default(), Arc::new(MemoryThumbnailStore::new()));

    // The page image is 30x40; covers never upscale.
    let cover = renderer.render(&source, 300).unwrap();
    let decoded = image::load_from_memory(&cover.bytes).unwrap();
    assert_eq!((decoded.width(), decoded.height()), (30, 40));
}

#[test]
fn test_disk_cache_survives_restart() {
    let fx = Fixture::new();
    let source = fx.image("Book/1.png", 120, 160);
    let cache_dir = fx.scratch("thumbs");

    let first = ThumbnailRenderer::new(
        &ThumbnailConfig::default(),
        Arc::new(DiskThumbnailStore::open(&cache_dir).unwrap()),
    );
    let cover = first.render(&source, 60).unwrap();
    assert_eq!(first.renders_performed(), 1);

    let store = Arc::new(DiskThumbnailStore::open(&cache_dir).unwrap());
    assert!(store.contains(&cover.key));
    let second = ThumbnailRenderer::new(&ThumbnailConfig::default(), store);
    let again = second.render(&source, 60).unwrap();
    assert_eq!(second.renders_performed(), 0);
    assert_eq!(again.bytes, cover.bytes);
}

#[test]
fn test_changed_source_gets_new_key() {
    let fx = Fixture::new();
    let source = fx.image("Book/1.png", 50, 50);
    let renderer =
        ThumbnailRenderer::new(&ThumbnailConfig::default(), Arc::new(MemoryThumbnailStore::new()));
    let before = renderer.key(&source, 40).unwrap();

    image::RgbImage::from_pixel(50, 50, image::Rgb([1, 2, 3]))
        .save(&source)
        .unwrap();
    let after = renderer.key(&source, 40).unwrap();
    assert_ne!(before, after);
    assert_eq!(after.width, 40);
}

#[test]
fn test_vector_only_pdf_is_unsupported() {
    let fx = Fixture::new();
    let path = fx.scratch("vector.pdf");
    let mut doc = lopdf::Document::with_version("1.5");
    let pages_id = doc.new_object_id();
    let page_id = doc.add_object(lopdf::dictionary! {
        "Type" => "Page",
        "Parent" => pages_id,
    });
    doc.objects.insert(
        pages_id,
        lopdf::Object::Dictionary(lopdf::dictionary! {
            "Type" => "Pages",
            "Kids" => vec![lopdf::Object::from(page_id)],
            "Count" => 1_i64,
        }),
    );
    let catalog_id = doc.add_object(lopdf::dictionary! {
        "Type" => "Catalog",
        "Pages" => pages_id,
    });
    doc.trailer.set("Root", catalog_id);
    doc.save(&path).unwrap();

    let renderer =
        ThumbnailRenderer::new(&ThumbnailConfig::default(), Arc::new(MemoryThumbnailStore::new()));
    assert!(matches!(
        renderer.render(&path, 100),
        Err(RenderError::UnsupportedFormat(_))
    ));
    assert_eq!(renderer.renders_performed(), 0);
}
