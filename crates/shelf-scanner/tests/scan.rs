//! End-to-end scans over temporary libraries.

mod common;

use std::sync::Arc;
use std::time::Duration;

use common::{page_names, Fixture, GatedCatalog};
use serde::Serialize;
use shelf_core::{CatalogStore, OptimizationStrategy, SourceKind};
use shelf_scanner::{
    is_jpeg, EvictionPolicy, Library, LibraryError, PageImage, RenderError, ScanError, ScanState,
    ScanUpdate,
};

const WAIT: Duration = Duration::from_secs(60);

fn scan(library: &Library) -> shelf_scanner::ScanStatus {
    library
        .trigger_scan(None)
        .unwrap()
        .wait_timeout(WAIT)
        .expect("scan did not finish")
}

#[test]
fn test_category_with_image_book_and_pdf() {
    let fx = Fixture::new();
    for page in ["10.jpg", "2.jpg", "1.jpg"] {
        fx.image(&format!("CategoryA/Book1/{page}"), 40, 60);
    }
    fx.pdf("CategoryA/Book2.pdf", 3);
    let (library, catalog) = fx.library();

    let status = scan(&library);
    assert_eq!(status.state, ScanState::Completed);
    assert!(status.errors.is_empty(), "{:?}", status.errors);
    assert_eq!(status.found, 2);
    assert_eq!(status.processed, 2);

    let roots = catalog.root_categories().unwrap();
    assert_eq!(roots.len(), 1);
    assert_eq!(roots[0].id, fx.root_id());

    let categories = catalog.child_categories(fx.root_id()).unwrap();
    assert_eq!(categories.len(), 1);
    assert_eq!(categories[0].name, "CategoryA");

    let books = catalog.books_in_category(categories[0].id).unwrap();
    assert_eq!(books.len(), 2);
    assert_eq!(page_names(&books[0]), ["1.jpg", "2.jpg", "10.jpg"]);
    assert_eq!(books[1].kind, SourceKind::Pdf);
    assert_eq!(books[1].page_count, Some(3));
    assert!(books.iter().all(|b| b.cover.is_some()));

    #[derive(Serialize)]
    struct Listed<'a> {
        title: &'a str,
        kind: SourceKind,
        page_count: Option<u32>,
        dimensions: String,
        strategy: OptimizationStrategy,
    }
    let listing: Vec<_> = books
        .iter()
        .map(|b| Listed {
            title: &b.title,
            kind: b.kind,
            page_count: b.page_count,
            dimensions: b.dimensions.to_string(),
            strategy: b.strategy,
        })
        .collect();
    insta::assert_json_snapshot!(listing, @r#"
    [
      {
        "title": "Book1",
        "kind": "image_set",
        "page_count": 3,
        "dimensions": "40x60",
        "strategy": "original"
      },
      {
        "title": "Book2",
        "kind": "pdf",
        "page_count": 3,
        "dimensions": "595x842",
        "strategy": "original"
      }
    ]
    "#);
}

#[test]
fn test_mixed_folder_is_one_book() {
    let fx = Fixture::new();
    fx.image("Mixed/1.png", 20, 30);
    fx.image("Mixed/2.png", 20, 30);
    fx.image("Mixed/Extras/bonus.png", 20, 30);
    let (library, catalog) = fx.library();

    let status = scan(&library);
    assert_eq!(status.state, ScanState::Completed);
    assert_eq!(status.found, 1);
    assert!(status.errors.iter().any(|e| matches!(
        e,
        ScanError::Shadowed { path } if path == &fx.path("Mixed/Extras")
    )));

    let books = catalog.books_in_category(fx.root_id()).unwrap();
    assert_eq!(books.len(), 1);
    assert_eq!(page_names(&books[0]), ["1.png", "2.png"]);
    assert!(catalog.child_categories(fx.root_id()).unwrap().is_empty());
}

#[test]
fn test_rescan_of_unchanged_tree_changes_nothing() {
    let fx = Fixture::new();
    fx.image("Series/Vol 1/01.png", 20, 30);
    fx.pdf("Series/Vol 2.pdf", 2);
    let (library, catalog) = fx.library();

    let first = scan(&library);
    let report = first.reconcile.unwrap();
    // Root, Series and two books.
    assert_eq!(report.inserted, 4);
    let before = catalog.snapshot().unwrap();

    let second = scan(&library);
    let report = second.reconcile.unwrap();
    assert_eq!(report.changed(), 0, "{report:?}");
    assert_eq!(catalog.snapshot().unwrap(), before);
}

#[cfg(unix)]
#[test]
fn test_root_spelling_does_not_change_ids() {
    let fx = Fixture::new();
    fx.image("Book/1.png", 20, 30);
    fx.pdf("Other.pdf", 1);
    let (library, catalog) = fx.library();
    scan(&library);
    let book = fx.book_id("Book");
    library.set_favorite(book, true).unwrap();
    let before = catalog.snapshot().unwrap();

    let relative = fx.relative_root();
    assert!(relative.is_relative());
    let dotted = fx.root.join("../library/.");
    for root in [relative, dotted] {
        let status = library
            .trigger_scan(Some(root.as_path()))
            .unwrap()
            .wait_timeout(WAIT)
            .unwrap();
        assert_eq!(status.state, ScanState::Completed, "{root}");
        assert_eq!(status.root, fx.root);
        assert_eq!(status.reconcile.unwrap().changed(), 0, "{root}");
    }

    assert_eq!(catalog.snapshot().unwrap(), before);
    assert_eq!(catalog.favorites().unwrap(), vec![book]);
    assert_eq!(catalog.book(book).unwrap().unwrap().path, fx.path("Book"));
}

#[cfg(target_os = "linux")]
#[test]
fn test_non_utf8_folder_is_skipped_with_warning() {
    use std::ffi::OsStr;
    use std::os::unix::ffi::OsStrExt;

    let fx = Fixture::new();
    fx.image("Good/1.png", 20, 30);
    let bad = fx.root.as_std_path().join(OsStr::from_bytes(b"Bad \xff"));
    std::fs::create_dir_all(bad.join("inner")).unwrap();
    std::fs::copy(fx.path("Good/1.png"), bad.join("1.png")).unwrap();
    std::fs::copy(fx.path("Good/1.png"), bad.join("inner/1.png")).unwrap();
    let (library, catalog) = fx.library();

    let status = scan(&library);
    assert_eq!(status.state, ScanState::Completed);
    assert_eq!(status.found, 1);

    let expected = bad.to_string_lossy().into_owned();
    let unreadable: Vec<_> = status
        .errors
        .iter()
        .filter(|e| matches!(e, ScanError::PathUnreadable { .. }))
        .collect();
    assert_eq!(unreadable.len(), 1, "{:?}", status.errors);
    assert_eq!(unreadable[0].path().map(|p| p.as_str()), Some(expected.as_str()));
    assert!(unreadable[0].is_recoverable());

    let books = catalog.books_in_category(fx.root_id()).unwrap();
    assert_eq!(books.len(), 1);
    assert_eq!(books[0].id, fx.book_id("Good"));
}

#[test]
fn test_rename_is_delete_plus_insert() {
    let fx = Fixture::new();
    fx.image("Old Title/1.png", 20, 30);
    let (library, catalog) = fx.library();
    scan(&library);

    let old_id = fx.book_id("Old Title");
    let cover = catalog.book(old_id).unwrap().unwrap().cover.unwrap();

    std::fs::rename(fx.path("Old Title"), fx.path("New Title")).unwrap();
    let status = scan(&library);
    let report = status.reconcile.unwrap();
    assert_eq!((report.inserted, report.updated, report.deleted), (1, 0, 1));

    assert!(catalog.book(old_id).unwrap().is_none());
    let renamed = catalog.book(fx.book_id("New Title")).unwrap().unwrap();
    assert_eq!(renamed.title, "New Title");
    // Same first page, same cover.
    assert_eq!(renamed.cover, Some(cover));
    assert!(library.thumbnails().contains(&cover));
}

#[test]
fn test_corrupt_pdf_is_degraded_with_placeholder_cover() {
    let fx = Fixture::new();
    fx.file("Broken.pdf", b"%PDF-1.4\nnot really a pdf");
    let (library, catalog) = fx.library();

    let status = scan(&library);
    assert_eq!(status.state, ScanState::Completed);
    assert_eq!(status.found, 1);
    assert!(status
        .errors
        .iter()
        .any(|e| matches!(e, ScanError::CorruptDocument { .. })));

    let id = fx.book_id("Broken.pdf");
    let book = catalog.book(id).unwrap().unwrap();
    assert!(book.is_degraded());
    assert_eq!(book.page_count, None);
    assert!(book.pages.is_empty());

    let cover = library.cover(id, Some(32)).unwrap();
    assert!(cover.placeholder);
    assert_eq!(cover.key, None);
    assert!(is_jpeg(&cover.bytes));
}

#[test]
fn test_unknown_book_cover_is_not_found() {
    let fx = Fixture::new();
    let (library, _) = fx.library();
    let id = fx.book_id("Nothing Here");
    assert!(matches!(library.cover(id, None), Err(LibraryError::NotFound(found)) if found == id));
}

#[test]
fn test_page_thumbnails_share_the_cover_cache() {
    let fx = Fixture::new();
    fx.image("Book/1.png", 40, 60);
    fx.image("Book/2.png", 60, 40);
    let (library, catalog) = fx.library();
    scan(&library);
    let id = fx.book_id("Book");
    let book = catalog.book(id).unwrap().unwrap();
    let renders = library.renderer().renders_performed();

    // Page 0 at the cover width is the cover.
    let first = library.page_thumbnail(id, 0, 64).unwrap();
    assert_eq!(Some(first.key), book.cover);
    assert_eq!(library.renderer().renders_performed(), renders);

    let second = library.page_thumbnail(id, 1, 30).unwrap();
    assert!(is_jpeg(&second.bytes));
    let decoded = image::load_from_memory(&second.bytes).unwrap();
    assert_eq!((decoded.width(), decoded.height()), (30, 20));
    assert_eq!(library.page_thumbnail(id, 1, 30).unwrap(), second);
    assert_eq!(library.renderer().renders_performed(), renders + 1);
}

#[test]
fn test_page_lookup_errors() {
    let fx = Fixture::new();
    fx.image("Book/1.png", 20, 30);
    fx.pdf("Doc.pdf", 2);
    let (library, _) = fx.library();
    scan(&library);
    let book = fx.book_id("Book");

    assert!(matches!(
        library.page_thumbnail(book, 1, 32),
        Err(LibraryError::PageNotFound { book: b, page: 1 }) if b == book
    ));
    assert!(matches!(
        library.page(book, 7),
        Err(LibraryError::PageNotFound { page: 7, .. })
    ));
    let unknown = fx.book_id("Missing");
    assert!(matches!(
        library.page_thumbnail(unknown, 0, 32),
        Err(LibraryError::NotFound(id)) if id == unknown
    ));
    assert!(matches!(
        library.page_thumbnail(fx.book_id("Doc.pdf"), 0, 32),
        Err(LibraryError::Render(RenderError::UnsupportedFormat(_)))
    ));
}

#[test]
fn test_concurrent_page_requests_render_once() {
    let fx = Fixture::new();
    fx.image("Book/1.png", 20, 30);
    fx.image("Book/2.png", 200, 300);
    let (library, _) = fx.library();
    scan(&library);
    let id = fx.book_id("Book");
    let renders = library.renderer().renders_performed();

    let results: Vec<_> = std::thread::scope(|s| {
        let workers: Vec<_> = (0..8)
            .map(|_| s.spawn(|| library.page_thumbnail(id, 1, 48).unwrap()))
            .collect();
        workers.into_iter().map(|w| w.join().unwrap()).collect()
    });

    assert_eq!(library.renderer().renders_performed(), renders + 1);
    assert!(results.windows(2).all(|pair| pair[0] == pair[1]));
}

#[test]
fn test_page_follows_optimization_strategy() {
    let fx = Fixture::new();
    fx.image("Large/1.png", 40, 60);
    let mut config = fx.config();
    config.strategy.max_pixel_area = 1_000;
    config.thumbnails.compressed_width = 16;
    let (library, catalog) = fx.library_with(config);
    scan(&library);
    let large = fx.book_id("Large");
    assert_eq!(
        catalog.book(large).unwrap().unwrap().strategy,
        OptimizationStrategy::Optimize
    );

    match library.page(large, 0).unwrap() {
        PageImage::Compressed(page) => assert_eq!(page.key.width, 16),
        other => panic!("expected a compressed page, got {other:?}"),
    }

    let fx = Fixture::new();
    fx.image("Small/1.png", 40, 60);
    let (library, _) = fx.library();
    scan(&library);
    assert_eq!(
        library.page(fx.book_id("Small"), 0).unwrap(),
        PageImage::Original(fx.path("Small/1.png"))
    );
}

#[test]
fn test_deleted_folder_removes_row_and_favorite() {
    let fx = Fixture::new();
    fx.image("Keep/1.png", 20, 30);
    fx.image("Drop/1.png", 20, 30);
    let (library, catalog) = fx.library();
    scan(&library);

    let keep = fx.book_id("Keep");
    let gone = fx.book_id("Drop");
    library.set_favorite(keep, true).unwrap();
    library.set_favorite(gone, true).unwrap();

    std::fs::remove_dir_all(fx.path("Drop")).unwrap();
    let status = scan(&library);
    assert_eq!(status.reconcile.unwrap().deleted, 1);

    assert!(catalog.book(gone).unwrap().is_none());
    assert_eq!(catalog.favorites().unwrap(), vec![keep]);
    assert!(matches!(
        library.set_favorite(gone, true),
        Err(LibraryError::NotFound(_))
    ));
}

#[test]
fn test_second_trigger_while_active_is_rejected() {
    let fx = Fixture::new();
    fx.image("Book/1.png", 20, 30);
    let catalog = Arc::new(GatedCatalog::default());
    let library =
        Library::new(fx.config(), Arc::clone(&catalog) as Arc<dyn CatalogStore>).unwrap();

    let release = catalog.arm();
    let first = library.trigger_scan(None).unwrap();
    assert!(library.is_scanning());

    let err = library.trigger_scan(None).unwrap_err();
    assert!(matches!(err, LibraryError::Scan(ScanError::ScanInProgress)));
    assert!(library.scheduler().handle(first.id() + 1).is_none());

    release.send(()).unwrap();
    let status = first.wait_timeout(WAIT).unwrap();
    assert_eq!(status.state, ScanState::Completed);
    assert!(!library.is_scanning());

    let again = library.trigger_scan(None).unwrap();
    assert_ne!(again.id(), first.id());
    assert_eq!(again.wait_timeout(WAIT).unwrap().state, ScanState::Completed);
}

#[test]
fn test_cancelled_scan_never_deletes() {
    let fx = Fixture::new();
    fx.image("One/1.png", 20, 30);
    fx.image("Two/1.png", 20, 30);
    let catalog = Arc::new(GatedCatalog::default());
    let library =
        Library::new(fx.config(), Arc::clone(&catalog) as Arc<dyn CatalogStore>).unwrap();
    scan(&library);

    std::fs::remove_dir_all(fx.path("Two")).unwrap();
    fx.image("Three/1.png", 20, 30);

    let release = catalog.arm();
    let handle = library.trigger_scan(None).unwrap();
    library.cancel(&handle);
    assert!(handle.is_cancel_requested());
    drop(release);

    let status = handle.wait_timeout(WAIT).unwrap();
    assert_eq!(status.state, ScanState::Cancelled);
    assert_eq!(status.reconcile.unwrap().deleted, 0);
    assert!(catalog.book(fx.book_id("Two")).unwrap().is_some());
    assert!(library.scan_status_by_id(handle.id()).is_ok());
}

#[test]
fn test_missing_root_fails_without_touching_catalog() {
    let fx = Fixture::new();
    fx.image("Book/1.png", 20, 30);
    let (library, catalog) = fx.library();
    scan(&library);
    let before = catalog.snapshot().unwrap();

    let missing = fx.scratch("gone");
    let status = library
        .trigger_scan(Some(missing.as_path()))
        .unwrap()
        .wait_timeout(WAIT)
        .unwrap();
    assert_eq!(status.state, ScanState::Failed);
    assert!(status.errors.iter().any(ScanError::is_fatal));
    assert!(status.reconcile.is_none());
    assert_eq!(catalog.snapshot().unwrap(), before);
}

#[test]
fn test_disk_cache_eviction() {
    let fx = Fixture::new();
    fx.image("A/1.png", 20, 30);
    fx.image("B/1.png", 30, 20);
    let cache_dir = fx.scratch("thumbs");
    let mut config = fx.config();
    config.thumbnails.cache_dir = Some(cache_dir.clone());
    let (library, _) = fx.library_with(config);

    let status = scan(&library);
    assert_eq!(status.stats.covers, 2);
    assert_eq!(std::fs::read_dir(&cache_dir).unwrap().count(), 2);

    let report = library
        .evict_thumbnails(&EvictionPolicy {
            max_age: None,
            max_bytes: Some(0),
        })
        .unwrap();
    assert_eq!(report.removed, 2);
    assert_eq!(report.remaining, 0);
    assert_eq!(std::fs::read_dir(&cache_dir).unwrap().count(), 0);

    // A miss re-renders.
    let cover = library.cover(fx.book_id("A"), None).unwrap();
    assert!(!cover.placeholder);
    assert!(is_jpeg(&cover.bytes));
    assert_eq!(std::fs::read_dir(&cache_dir).unwrap().count(), 1);
}

#[test]
fn test_disabled_pool_matches_parallel_scan() {
    let fx = Fixture::new();
    for n in 1..=6 {
        fx.image(&format!("Shelf/Book {n}/{n}.png"), 10 * n, 20);
    }
    fx.pdf("Shelf/Extra.pdf", 4);

    let mut parallel = fx.config();
    parallel.pool.max_workers = 4;
    let mut serial = fx.config();
    serial.pool.enabled = false;

    let (a, catalog_a) = fx.library_with(parallel);
    let (b, catalog_b) = fx.library_with(serial);
    assert_eq!(b.scheduler().pool().threads(), 1);
    scan(&a);
    scan(&b);

    let snap_a = catalog_a.snapshot().unwrap();
    let snap_b = catalog_b.snapshot().unwrap();
    assert_eq!(snap_a.books.len(), 7);
    assert_eq!(snap_a.categories, snap_b.categories);
    for (id, book) in &snap_a.books {
        assert!(book.same_content(&snap_b.books[id]), "{}", book.path);
    }
}

#[test]
fn test_start_respects_auto_scan() {
    let fx = Fixture::new();
    fx.image("Book/1.png", 20, 30);

    let (library, _) = fx.library();
    assert!(library.start().unwrap().is_none());

    let mut config = fx.config();
    config.library.auto_scan_on_startup = true;
    let (library, catalog) = fx.library_with(config);
    let handle = library.start().unwrap().unwrap();
    assert_eq!(handle.wait_timeout(WAIT).unwrap().state, ScanState::Completed);
    assert!(catalog.book(fx.book_id("Book")).unwrap().is_some());
}

#[tokio::test]
async fn test_streaming_updates_end_with_complete() {
    let fx = Fixture::new();
    fx.image("A/1.png", 20, 30);
    fx.pdf("B.pdf", 1);
    fx.file("C.pdf", b"garbage");
    let (library, _) = fx.library();

    let (tx, mut rx) = tokio::sync::mpsc::channel(4);
    library.trigger_scan_streaming(None, tx).unwrap();

    let mut events = Vec::new();
    while let Some(update) = rx.recv().await {
        events.push(update);
    }

    assert!(matches!(
        events.first(),
        Some(ScanUpdate::CandidatesDiscovered { books: 3, categories: 1 })
    ));
    let scanned = events
        .iter()
        .filter(|e| matches!(e, ScanUpdate::BookScanned(_)))
        .count();
    assert_eq!(scanned, 3);
    assert!(events
        .iter()
        .any(|e| matches!(e, ScanUpdate::Warning(ScanError::CorruptDocument { .. }))));
    match events.last() {
        Some(ScanUpdate::Complete(status)) => assert_eq!(status.state, ScanState::Completed),
        other => panic!("unexpected last event: {other:?}"),
    }
}
