//! # bundle-tar
//!
//! Gzip-compressed tar handling for the edgequake-doc2md conversion service.
//!
//! Two directions are covered:
//!
//! 1. **Packing** a finished conversion directory into a `.tar.gz` bundle
//!    whose single root entry carries a caller-chosen name
//!    ([`pack_dir`], [`pack_dir_to_file`]).
//! 2. **Unpacking** an arXiv e-print source ([`unpack_source`]). arXiv serves
//!    three shapes under the same URL: a gzipped tar of the LaTeX tree, a
//!    gzip of a single `.tex` file, and (rarely) an uncompressed tar. All
//!    three are detected from magic bytes rather than the file name.
//!
//! ## Usage
//!
//! ```rust,no_run
//! use bundle_tar::{pack_dir_to_file, unpack_source, SourceLayout};
//! use std::path::Path;
//!
//! pack_dir_to_file(Path::new("work/out"), "bundle", Path::new("bundle.tar.gz"))
//!     .expect("pack failed");
//!
//! match unpack_source(Path::new("2401.00001"), Path::new("work/src")).expect("unpack") {
//!     SourceLayout::Tree { entries } => println!("{entries} entries"),
//!     SourceLayout::SingleFile(path) => println!("single file at {}", path.display()),
//! }
//! ```

use std::fs::File;
use std::io::{BufReader, BufWriter, Read, Write};
use std::path::{Path, PathBuf};

use flate2::read::GzDecoder;
use flate2::write::GzEncoder;
use flate2::Compression;
use tar::{Archive, Builder, HeaderMode};
use thiserror::Error;

// ── Public constants ─────────────────────────────────────────────────────────

/// Name given to the extracted document when an e-print is a gzip of a single
/// file rather than a tar tree.
pub const SINGLE_FILE_NAME: &str = "main.tex";

const GZIP_MAGIC: [u8; 2] = [0x1f, 0x8b];
const USTAR_MAGIC: &[u8] = b"ustar";
const USTAR_OFFSET: usize = 257;

// ── Error type ───────────────────────────────────────────────────────────────

/// Errors returned by bundle-tar operations.
#[derive(Error, Debug)]
pub enum ArchiveError {
    /// The directory to pack does not exist or is not a directory.
    #[error("Cannot pack '{path}': not a directory")]
    NotADirectory { path: PathBuf },

    /// Writing the tar stream or finishing the gzip trailer failed.
    #[error("Failed to pack '{path}': {source}")]
    Pack {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// Reading the source archive from disk failed.
    #[error("Failed to read archive '{path}': {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// gzip/tar extraction failed.
    #[error("Archive extraction failed: {0}")]
    Extract(String),

    /// The input is neither gzip nor tar.
    #[error("Unrecognised archive format for '{path}' (first bytes: {magic:02x?})")]
    UnrecognisedFormat { path: PathBuf, magic: Vec<u8> },
}

/// What [`unpack_source`] found inside an e-print.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SourceLayout {
    /// A tar tree was extracted; `entries` counts the archive members.
    Tree { entries: usize },
    /// A single compressed file was written to this path.
    SingleFile(PathBuf),
}

// ── Packing ──────────────────────────────────────────────────────────────────

/// Packs every file under `src_dir` into a gzip tar written to `writer`.
///
/// All entries are nested under `root_name/`. Headers use deterministic mode
/// (fixed mtime and ownership) so packing the same tree twice yields the same
/// bytes. Returns the writer once the gzip trailer has been flushed.
pub fn pack_dir<W: Write>(src_dir: &Path, root_name: &str, writer: W) -> Result<W, ArchiveError> {
    if !src_dir.is_dir() {
        return Err(ArchiveError::NotADirectory {
            path: src_dir.to_path_buf(),
        });
    }

    let pack_err = |source: std::io::Error| ArchiveError::Pack {
        path: src_dir.to_path_buf(),
        source,
    };

    let encoder = GzEncoder::new(writer, Compression::default());
    let mut builder = Builder::new(encoder);
    builder.mode(HeaderMode::Deterministic);
    builder.follow_symlinks(false);
    builder.append_dir_all(root_name, src_dir).map_err(pack_err)?;

    let encoder = builder.into_inner().map_err(pack_err)?;
    encoder.finish().map_err(pack_err)
}

/// Packs `src_dir` into a new `.tar.gz` file at `dest`.
///
/// The file is created (or truncated) in place; callers that need atomic
/// publication write to a temporary path and rename afterwards.
pub fn pack_dir_to_file(src_dir: &Path, root_name: &str, dest: &Path) -> Result<(), ArchiveError> {
    let file = File::create(dest).map_err(|e| ArchiveError::Pack {
        path: dest.to_path_buf(),
        source: e,
    })?;
    let mut writer = pack_dir(src_dir, root_name, BufWriter::new(file))?;
    writer.flush().map_err(|e| ArchiveError::Pack {
        path: dest.to_path_buf(),
        source: e,
    })
}

// ── Unpacking ────────────────────────────────────────────────────────────────

/// Extracts an arXiv e-print into `dest_dir`.
///
/// * gzip of a tar → the tree is unpacked.
/// * gzip of anything else → written as [`SINGLE_FILE_NAME`].
/// * plain tar → the tree is unpacked.
///
/// Member paths that try to escape `dest_dir` are skipped by `tar` itself.
pub fn unpack_source(archive_path: &Path, dest_dir: &Path) -> Result<SourceLayout, ArchiveError> {
    let read_err = |source: std::io::Error| ArchiveError::Read {
        path: archive_path.to_path_buf(),
        source,
    };

    let mut raw = Vec::new();
    File::open(archive_path)
        .and_then(|f| BufReader::new(f).read_to_end(&mut raw))
        .map_err(read_err)?;

    std::fs::create_dir_all(dest_dir).map_err(|e| ArchiveError::Extract(e.to_string()))?;

    let payload = if raw.starts_with(&GZIP_MAGIC) {
        let mut inflated = Vec::new();
        GzDecoder::new(raw.as_slice())
            .read_to_end(&mut inflated)
            .map_err(|e| ArchiveError::Extract(format!("gzip: {e}")))?;
        if !is_tar(&inflated) {
            let path = dest_dir.join(SINGLE_FILE_NAME);
            std::fs::write(&path, &inflated)
                .map_err(|e| ArchiveError::Extract(format!("write {}: {e}", path.display())))?;
            return Ok(SourceLayout::SingleFile(path));
        }
        inflated
    } else if is_tar(&raw) {
        raw
    } else {
        return Err(ArchiveError::UnrecognisedFormat {
            path: archive_path.to_path_buf(),
            magic: raw.iter().take(4).copied().collect(),
        });
    };

    let entries = unpack_tar(&payload, dest_dir)?;
    Ok(SourceLayout::Tree { entries })
}

/// Extracts a gzip tar held in memory into `dest_dir`, returning the number
/// of members unpacked.
pub fn unpack_tar_gz(bytes: &[u8], dest_dir: &Path) -> Result<usize, ArchiveError> {
    std::fs::create_dir_all(dest_dir).map_err(|e| ArchiveError::Extract(e.to_string()))?;
    let mut archive = Archive::new(GzDecoder::new(bytes));
    unpack_entries(&mut archive, dest_dir)
}

/// Lists the member paths of a gzip tar held in memory.
pub fn list_entries(bytes: &[u8]) -> Result<Vec<String>, ArchiveError> {
    let mut archive = Archive::new(GzDecoder::new(bytes));
    let mut names = Vec::new();
    for entry in archive
        .entries()
        .map_err(|e| ArchiveError::Extract(e.to_string()))?
    {
        let entry = entry.map_err(|e| ArchiveError::Extract(e.to_string()))?;
        let path = entry
            .path()
            .map_err(|e| ArchiveError::Extract(e.to_string()))?;
        names.push(path.to_string_lossy().into_owned());
    }
    Ok(names)
}

// ── Internal helpers ─────────────────────────────────────────────────────────

fn is_tar(bytes: &[u8]) -> bool {
    bytes
        .get(USTAR_OFFSET..USTAR_OFFSET + USTAR_MAGIC.len())
        .is_some_and(|m| m == USTAR_MAGIC)
}

fn unpack_tar(bytes: &[u8], dest_dir: &Path) -> Result<usize, ArchiveError> {
    let mut archive = Archive::new(bytes);
    unpack_entries(&mut archive, dest_dir)
}

fn unpack_entries<R: Read>(archive: &mut Archive<R>, dest_dir: &Path) -> Result<usize, ArchiveError> {
    let mut count = 0;
    for entry in archive
        .entries()
        .map_err(|e| ArchiveError::Extract(e.to_string()))?
    {
        let mut entry = entry.map_err(|e| ArchiveError::Extract(e.to_string()))?;
        // `unpack_in` refuses members that would land outside `dest_dir`.
        let unpacked = entry
            .unpack_in(dest_dir)
            .map_err(|e| ArchiveError::Extract(format!("Unpack failed: {e}")))?;
        if unpacked {
            count += 1;
        }
    }
    Ok(count)
}

// ── Tests ─────────────────────────────────────────────────────────────────────
