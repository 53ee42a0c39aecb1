//! Content store access: candidate locations and first-success fetching.
//!
//! A content key maps to exactly three candidate files under the book's
//! `data/` directory, tried in a fixed order: structured data (`.json`),
//! formatted document (`.md`), plain text (`.txt`). The fetcher stops at the
//! first readable candidate and never retries or reorders.

use std::fmt;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};

/// Directory under the book root holding section content files.
pub const DATA_DIR: &str = "data";
/// Fixed location of the handbook document under the book root.
pub const HANDBOOK_PATH: &str = "assets/handbook.md";

/// The format a candidate location declares, by file suffix.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SourceFormat {
    Structured,
    Document,
    Plain,
}

impl SourceFormat {
    pub fn extension(self) -> &'static str {
        match self {
            SourceFormat::Structured => "json",
            SourceFormat::Document => "md",
            SourceFormat::Plain => "txt",
        }
    }
}

/// One concrete location to try: a content key plus a source format.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Candidate {
    pub key: String,
    pub format: SourceFormat,
}

impl Candidate {
    /// Path of this candidate relative to the book root.
    pub fn rel_path(&self) -> String {
        format!("{}/{}.{}", DATA_DIR, self.key, self.format.extension())
    }
}

impl fmt::Display for Candidate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.rel_path())
    }
}

/// The ordered candidate list for a key. Always exactly three, structured
/// data first, plain text last.
pub fn locate(key: &str) -> [Candidate; 3] {
    [
        Candidate {
            key: key.to_string(),
            format: SourceFormat::Structured,
        },
        Candidate {
            key: key.to_string(),
            format: SourceFormat::Document,
        },
        Candidate {
            key: key.to_string(),
            format: SourceFormat::Plain,
        },
    ]
}

/// Fetched text plus the candidate that produced it. The pairing drives
/// interpretation: the winning format decides how the payload is read.
#[derive(Debug, Clone)]
pub struct RawPayload {
    pub text: String,
    pub candidate: Candidate,
}

/// A section load failure, rendered into the affected container and never
/// propagated further.
#[derive(Debug, Clone)]
pub enum LoadError {
    /// Every candidate location failed. Carries the full attempted list so
    /// the message names what was tried.
    NoAvailableSource {
        key: String,
        attempted: Vec<Candidate>,
    },
    /// The navigation target cannot address a section container.
    BadTarget { target: String },
}

impl fmt::Display for LoadError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            LoadError::NoAvailableSource { key, attempted } => {
                write!(f, "no available source for \"{key}\" (tried ")?;
                for (i, candidate) in attempted.iter().enumerate() {
                    if i > 0 {
                        f.write_str(", ")?;
                    }
                    write!(f, "{candidate}")?;
                }
                f.write_str(")")
            }
            LoadError::BadTarget { target } => {
                write!(f, "\"{target}\" does not name a section")
            }
        }
    }
}

impl std::error::Error for LoadError {}

/// Seam between the fetcher and the filesystem. Tests substitute a recording
/// reader to observe exactly which candidates get touched.
pub trait SourceReader {
    /// Read a candidate's file. Fails if the file is missing, is not a
    /// regular file, is unreadable, or is not valid UTF-8.
    fn read(&self, candidate: &Candidate) -> io::Result<String>;
}

/// Read-only view of a book directory.
#[derive(Debug, Clone)]
pub struct BookStore {
    root: PathBuf,
}

impl BookStore {
    pub fn new(root: PathBuf) -> BookStore {
        BookStore { root }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Absolute path of a candidate inside this book.
    pub fn candidate_path(&self, candidate: &Candidate) -> PathBuf {
        self.root.join(candidate.rel_path())
    }

    pub fn handbook_path(&self) -> PathBuf {
        self.root.join(HANDBOOK_PATH)
    }

    /// Read the handbook document as text.
    pub fn read_handbook(&self) -> io::Result<String> {
        fs::read_to_string(self.handbook_path())
    }
}

impl SourceReader for BookStore {
    fn read(&self, candidate: &Candidate) -> io::Result<String> {
        let path = self.candidate_path(candidate);
        let meta = fs::metadata(&path)?;
        if !meta.is_file() {
            return Err(io::Error::new(
                io::ErrorKind::InvalidInput,
                "not a regular file",
            ));
        }
        fs::read_to_string(&path)
    }
}

/// Try each candidate for `key` in order and return the first success.
///
/// A failed candidate is folded into a uniform miss; the distinction between
/// "missing" and "unreadable" only matters for the final error message. No
/// candidate is ever retried and the order is never changed.
pub fn fetch_first(reader: &dyn SourceReader, key: &str) -> Result<RawPayload, LoadError> {
    let candidates = locate(key);
    for candidate in &candidates {
        match reader.read(candidate) {
            Ok(text) => {
                eprintln!("[load] key={key} source={candidate}");
                return Ok(RawPayload {
                    text,
                    candidate: candidate.clone(),
                });
            }
            Err(err) if err.kind() == io::ErrorKind::NotFound => {}
            Err(err) => {
                eprintln!("[load] key={key} candidate={candidate} err={err}");
            }
        }
    }
    eprintln!("[load] key={key} exhausted tried={}", candidates.len());
    Err(LoadError::NoAvailableSource {
        key: key.to_string(),
        attempted: candidates.to_vec(),
    })
}
