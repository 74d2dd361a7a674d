//! Tracks which directory and file paths have been added to an archive so far, so the streamer
//! can reject conflicting additions before any bytes reach the sink.
//!
//! Built directly from the conflict rules below, in the rest of the crate's idiom (plain structs
//! over `HashSet<String>`, hand-rolled error variants rather than a derive-based error crate).

use crate::error::{PathConflictKind, Result, ZipError};
use std::collections::HashSet;

/// Split `p` on `/`, discarding empty components (collapsing leading/duplicate separators), and
/// return the ancestor chain in order `a`, `a/b`, `a/b/c`, ... ending with `p` itself fully
/// normalized.
fn components(p: &str) -> Vec<String> {
    p.split('/').filter(|c| !c.is_empty()).map(str::to_string).collect()
}

fn ancestors(parts: &[String]) -> Vec<String> {
    let mut out = Vec::with_capacity(parts.len());
    for i in 1..=parts.len() {
        out.push(parts[..i].join("/"));
    }
    out
}

/// Replace backslashes with underscores, the sanitisation every incoming filename goes through
/// before it reaches path-set operations.
pub fn sanitize_backslashes(name: &str) -> String {
    name.replace('\\', "_")
}

#[derive(Default)]
pub struct PathSet {
    known_directories: HashSet<String>,
    known_files: HashSet<String>,
}

impl PathSet {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn clear(&mut self) {
        self.known_directories.clear();
        self.known_files.clear();
    }

    pub fn contains(&self, p: &str) -> bool {
        let normalized = components(p).join("/");
        self.known_directories.contains(&normalized) || self.known_files.contains(&normalized)
    }

    pub fn add_directory_path(&mut self, p: &str) -> Result<()> {
        let parts = components(p);
        if parts.is_empty() {
            return Ok(());
        }
        let chain = ancestors(&parts);
        for a in &chain {
            if self.known_files.contains(a) {
                return Err(ZipError::PathConflict {
                    path: p.to_string(),
                    kind: PathConflictKind::FileClobbersDirectory,
                });
            }
        }
        for a in chain {
            self.known_directories.insert(a);
        }
        Ok(())
    }

    pub fn add_file_path(&mut self, p: &str) -> Result<()> {
        let parts = components(p);
        let full = parts.join("/");

        if self.known_directories.contains(&full) {
            return Err(ZipError::PathConflict {
                path: p.to_string(),
                kind: PathConflictKind::DirectoryClobbersFile,
            });
        }
        if self.known_files.contains(&full) {
            return Err(ZipError::PathConflict { path: p.to_string(), kind: PathConflictKind::Conflict });
        }

        let chain = ancestors(&parts);
        // every proper ancestor (everything but the full path itself) must not already be a file
        for a in chain.iter().take(chain.len().saturating_sub(1)) {
            if self.known_files.contains(a) {
                return Err(ZipError::PathConflict { path: p.to_string(), kind: PathConflictKind::Conflict });
            }
        }

        for a in chain.iter().take(chain.len().saturating_sub(1)) {
            self.known_directories.insert(a.clone());
        }
        self.known_files.insert(full);
        Ok(())
    }

    /// Given `p`, if it's already a known file, generate `stem (1).ext`, `stem (2).ext`, ... until
    /// an unused name is found. The suffix is inserted before the final segment's last
    /// dot-extension, or appended if there is none.
    pub fn uniquify(&self, p: &str) -> String {
        if !self.known_files.contains(p) {
            return p.to_string();
        }

        let (dir, last) = match p.rsplit_once('/') {
            Some((d, l)) => (Some(d), l),
            None => (None, p),
        };

        let (stem, ext) = match last.rfind('.') {
            Some(idx) if idx > 0 => (&last[..idx], &last[idx..]),
            _ => (last, ""),
        };

        let mut n = 1u64;
        loop {
            let candidate_last = format!("{} ({}){}", stem, n, ext);
            let candidate = match dir {
                Some(d) => format!("{}/{}", d, candidate_last),
                None => candidate_last,
            };
            if !self.known_files.contains(&candidate) {
                return candidate;
            }
            n += 1;
        }
    }
}
