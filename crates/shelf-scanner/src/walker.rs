//! Directory traversal and two-pass classification.
//!
//! This module provides [`DirectoryWalker`], which uses the `ignore` crate to
//! read the library tree and then:
//!
//! 1. classifies every entry bottom-up (a directory is classified only after
//!    all of its children), and
//! 2. emits the catalogued entries top-down, so parents always precede their
//!    children, with siblings in natural filename order.
//!
//! The emitted sequence is finite and owned by the caller; a new scan walks
//! again.
//!
//! # Examples
//!
//! ```no_run
//! use camino::Utf8Path;
//! use shelf_core::LibraryConfig;
//! use shelf_scanner::{DirectoryWalker, PathClassifier};
//!
//! let classifier = PathClassifier::new(&LibraryConfig::default())?;
//! let output = DirectoryWalker::new(Utf8Path::new("/books"), classifier).walk()?;
//!
//! for item in &output.items {
//!     println!("{:?} {}", item.classification, item.entry.path);
//! }
//! # Ok::<(), shelf_scanner::ScanError>(())
//! ```

use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use camino::{Utf8Path, Utf8PathBuf};
use ignore::WalkBuilder;
use rustc_hash::{FxHashMap, FxHashSet};
use shelf_core::{natural_cmp, Category, CategoryId, Classification, Entry, SourceKind};
use smallvec::SmallVec;
use tracing::{debug, trace};

use crate::classifier::PathClassifier;
use crate::error::ScanError;

/// One catalogued entry in walk order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WalkItem {
    /// Position in [`WalkOutput::items`].
    pub ordinal: usize,
    /// The filesystem entry.
    pub entry: Entry,
    /// Final classification. The root is always a category candidate.
    pub classification: Classification,
    /// Ordinal of the enclosing item, `None` for the root.
    pub parent: Option<usize>,
}

/// A book candidate ready for the [`BookBuilder`](crate::BookBuilder).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Candidate {
    /// Walk ordinal; results are reported in this order.
    pub ordinal: usize,
    /// The book folder or PDF file.
    pub entry: Entry,
    /// Image folder or PDF.
    pub kind: SourceKind,
    /// Nearest enclosing category.
    pub category_id: Option<CategoryId>,
    /// Direct page images in natural order (empty for PDFs).
    pub images: Vec<Entry>,
}

/// Result of one walk.
#[derive(Debug, Clone, Default)]
pub struct WalkOutput {
    /// Catalogued entries, parents before children.
    pub items: Vec<WalkItem>,
    /// Skipped paths and shadowed entries.
    pub warnings: Vec<ScanError>,
    /// Number of filesystem entries inspected, catalogued or not.
    pub entries_seen: u64,
}

impl WalkOutput {
    /// Categories in walk order (parents first).
    #[must_use]
    pub fn categories(&self) -> Vec<Category> {
        self.items
            .iter()
            .filter(|item| item.classification == Classification::CategoryCandidate)
            .map(|item| Category::new(&item.entry.path, self.parent_category(item)))
            .collect()
    }

    /// Book candidates in walk order.
    #[must_use]
    pub fn candidates(&self) -> Vec<Candidate> {
        let mut candidates: Vec<Candidate> = Vec::new();
        let mut by_ordinal: FxHashMap<usize, usize> = FxHashMap::default();

        for item in &self.items {
            if let Some(kind) = item.classification.book_kind() {
                by_ordinal.insert(item.ordinal, candidates.len());
                candidates.push(Candidate {
                    ordinal: item.ordinal,
                    entry: item.entry.clone(),
                    kind,
                    category_id: self.parent_category(item),
                    images: Vec::new(),
                });
            } else if item.classification == Classification::ImageFile {
                if let Some(&idx) = item.parent.and_then(|p| by_ordinal.get(&p)) {
                    candidates[idx].images.push(item.entry.clone());
                }
            }
        }
        candidates
    }

    fn parent_category(&self, item: &WalkItem) -> Option<CategoryId> {
        item.parent
            .and_then(|p| self.items.get(p))
            .map(|parent| CategoryId::from_path(&parent.entry.path))
    }
}

#[derive(Debug)]
struct Node {
    entry: Entry,
    depth: usize,
    children: SmallVec<[usize; 8]>,
    class: Classification,
}

/// Walks a library root and classifies what it finds.
#[derive(Debug, Clone)]
pub struct DirectoryWalker {
    root: Utf8PathBuf,
    classifier: Arc<PathClassifier>,
    follow_links: bool,
}

impl DirectoryWalker {
    /// Creates a walker for `root`.
    ///
    /// Ids are derived from paths, so `root` should be absolute and
    /// canonical. [`Library`](crate::Library) resolves it before scanning.
    #[must_use]
    pub fn new(root: &Utf8Path, classifier: PathClassifier) -> Self {
        Self {
            // Drops trailing separators so parent lookups match
            root: root.components().collect(),
            classifier: Arc::new(classifier),
            follow_links: false,
        }
    }

    /// Configures whether to follow symbolic links.
    ///
    /// By default, symbolic links are not followed.
    #[must_use]
    pub const fn with_follow_links(mut self, follow: bool) -> Self {
        self.follow_links = follow;
        self
    }

    /// Returns the root directory being walked.
    #[inline]
    #[must_use]
    pub fn root(&self) -> &Utf8Path {
        &self.root
    }

    /// Walks the tree.
    ///
    /// # Errors
    ///
    /// Returns [`ScanError::RootUnavailable`] if the root cannot be read.
    /// Anything unreadable below the root is recorded in
    /// [`WalkOutput::warnings`] instead.
    pub fn walk(&self) -> Result<WalkOutput, ScanError> {
        let root_meta =
            fs::metadata(&self.root).map_err(|e| ScanError::root_unavailable(&self.root, e))?;
        if !root_meta.is_dir() {
            return Err(ScanError::root_unavailable(&self.root, "not a directory"));
        }
        fs::read_dir(&self.root).map_err(|e| ScanError::root_unavailable(&self.root, e))?;

        let mut warnings = Vec::new();
        let mut nodes = self.read_tree(&root_meta, &mut warnings);
        let entries_seen = nodes.len() as u64;

        self.classify(&mut nodes);
        sort_children(&mut nodes);
        let items = emit(&nodes, &mut warnings);

        debug!(
            root = %self.root,
            entries = entries_seen,
            catalogued = items.len(),
            warnings = warnings.len(),
            "Walk finished"
        );

        Ok(WalkOutput {
            items,
            warnings,
            entries_seen,
        })
    }

    /// Reads every entry under the root into a flat tree. Index 0 is the root.
    fn read_tree(&self, root_meta: &fs::Metadata, warnings: &mut Vec<ScanError>) -> Vec<Node> {
        let mut nodes = vec![Node {
            entry: Entry::from_metadata(self.root.clone(), root_meta),
            depth: 0,
            children: SmallVec::new(),
            class: Classification::Ignored,
        }];
        let mut dirs: FxHashMap<Utf8PathBuf, usize> = FxHashMap::default();
        dirs.insert(self.root.clone(), 0);
        let mut skipped: FxHashSet<PathBuf> = FxHashSet::default();

        for result in self.build_walker() {
            let dent = match result {
                Ok(dent) => dent,
                Err(err) => {
                    warnings.push(unreadable_from(&err, &self.root));
                    continue;
                }
            };
            if dent.depth() == 0 {
                continue;
            }

            let Some(path) = Utf8Path::from_path(dent.path()) else {
                // One warning per skipped subtree
                let inside_skipped = dent.path().parent().is_some_and(|p| skipped.contains(p));
                if !inside_skipped {
                    warnings.push(ScanError::unreadable(
                        lossy(dent.path()),
                        "path is not valid UTF-8",
                    ));
                }
                if dent.file_type().is_some_and(|t| t.is_dir()) {
                    skipped.insert(dent.path().to_path_buf());
                }
                continue;
            };
            let Some(file_type) = dent.file_type() else {
                continue;
            };
            if !file_type.is_dir() && !file_type.is_file() {
                trace!(path = %path, "Skipping special file");
                continue;
            }
            let metadata = match dent.metadata() {
                Ok(m) => m,
                Err(err) => {
                    warnings.push(ScanError::unreadable(path, err));
                    continue;
                }
            };
            let Some(&parent) = path.parent().and_then(|p| dirs.get(p)) else {
                continue;
            };

            let idx = nodes.len();
            if file_type.is_dir() {
                dirs.insert(path.to_owned(), idx);
            }
            nodes.push(Node {
                entry: Entry::from_metadata(path.to_owned(), &metadata),
                depth: dent.depth(),
                children: SmallVec::new(),
                class: Classification::Ignored,
            });
            nodes[parent].children.push(idx);
        }
        nodes
    }

    /// Post-order pass: deepest entries first.
    fn classify(&self, nodes: &mut [Node]) {
        let mut order: Vec<usize> = (0..nodes.len()).collect();
        order.sort_by_key(|&i| std::cmp::Reverse(nodes[i].depth));

        for i in order {
            let children: SmallVec<[Classification; 16]> =
                nodes[i].children.iter().map(|&c| nodes[c].class).collect();
            let class = self.classifier.classify(&nodes[i].entry, &children);
            nodes[i].class = class;
        }
        nodes[0].class = Classification::CategoryCandidate;
    }

    /// Builds the ignore walker with configured settings.
    fn build_walker(&self) -> ignore::Walk {
        let classifier = Arc::clone(&self.classifier);
        WalkBuilder::new(&self.root)
            // No .gitignore semantics; hidden entries are still skipped
            .standard_filters(false)
            .hidden(true)
            .follow_links(self.follow_links)
            .threads(1)
            // Non-UTF-8 names pass through and are reported as unreadable
            .filter_entry(move |dent| {
                dent.file_name()
                    .to_str()
                    .is_none_or(|name| !classifier.is_ignored_name(name))
            })
            .build()
    }
}

fn sort_children(nodes: &mut [Node]) {
    for i in 0..nodes.len() {
        let mut children = std::mem::take(&mut nodes[i].children);
        children.sort_by(|&a, &b| natural_cmp(nodes[a].entry.name(), nodes[b].entry.name()));
        nodes[i].children = children;
    }
}

/// Pre-order pass over the classified tree.
fn emit(nodes: &[Node], warnings: &mut Vec<ScanError>) -> Vec<WalkItem> {
    let mut items = Vec::new();
    let mut stack: Vec<(usize, Option<usize>)> = vec![(0, None)];

    while let Some((idx, parent)) = stack.pop() {
        let node = &nodes[idx];
        let ordinal = items.len();
        items.push(WalkItem {
            ordinal,
            entry: node.entry.clone(),
            classification: node.class,
            parent,
        });

        match node.class {
            Classification::CategoryCandidate => {
                let mut loose_images = false;
                for &child in node.children.iter().rev() {
                    let class = nodes[child].class;
                    if class.is_catalog_node() {
                        stack.push((child, Some(ordinal)));
                    } else if class == Classification::ImageFile {
                        loose_images = true;
                    }
                }
                if loose_images {
                    warnings.push(ScanError::rejected(
                        &node.entry.path,
                        "page images directly under the library root are not catalogued",
                    ));
                }
            }
            Classification::BookCandidate => {
                for &child in &node.children {
                    let child_node = &nodes[child];
                    if child_node.class == Classification::ImageFile {
                        items.push(WalkItem {
                            ordinal: items.len(),
                            entry: child_node.entry.clone(),
                            classification: Classification::ImageFile,
                            parent: Some(ordinal),
                        });
                    } else if child_node.class.is_catalog_node() {
                        warnings.push(ScanError::Shadowed {
                            path: child_node.entry.path.clone(),
                        });
                    }
                }
            }
            Classification::Ignored | Classification::ImageFile | Classification::PdfFile => {}
        }
    }
    items
}

fn lossy(path: &Path) -> Utf8PathBuf {
    Utf8PathBuf::from(path.to_string_lossy().into_owned())
}

fn unreadable_from(err: &ignore::Error, root: &Utf8Path) -> ScanError {
    let path = error_path(err).map_or_else(|| root.to_owned(), lossy);
    ScanError::unreadable(path, err)
}

fn error_path(err: &ignore::Error) -> Option<&Path> {
    match err {
        ignore::Error::WithPath { path, .. } => Some(path.as_path()),
        ignore::Error::WithDepth { err, .. } | ignore::Error::WithLineNumber { err, .. } => {
            error_path(err)
        }
        ignore::Error::Loop { child, .. } => Some(child.as_path()),
        _ => None,
    }
}
