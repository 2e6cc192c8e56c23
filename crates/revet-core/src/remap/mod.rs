//! Remapping comment locations across two revisions.
//!
//! When a learner resubmits, every carried-forward comment must point at
//! the line its code moved to. The default strategy walks the unified diff
//! between the two revisions; Kotlin sources first try a syntax-aware
//! strategy that re-anchors within the enclosing function and falls back
//! to the diff walk whenever structural matching is inconclusive.

pub mod kotlin;

use std::sync::Arc;

use anyhow::{Context, Result};
use tracing::debug;

use crate::diff::{parse_diff, DiffLine, FileDiff, Hunk};
use crate::location::{FileRef, Location};
use crate::vcs::{Revision, VcsService};

/// Remap `loc` (recorded against the from side) through `diffs`.
///
/// A file with no diff entry, or a line outside every hunk of its entry,
/// is untouched and returned unchanged. Inside a hunk, `cur_from`/`cur_to`
/// counters walk the hunk body; a location on a line that was itself
/// deleted snaps forward to the to-side position of the next surviving
/// line. The resulting file is the entry's to side, so renames are
/// followed and a deletion yields a [`FileRef::NonExistent`] location
/// rather than an error.
#[must_use]
pub fn apply_diffs(loc: &Location, diffs: &[FileDiff]) -> Location {
    let Some(path) = loc.file.path() else {
        return loc.clone();
    };
    let Some(diff) = diffs.iter().find(|d| d.from_file == path) else {
        return loc.clone();
    };
    let Some(hunk) = diff
        .hunks
        .iter()
        .find(|h| h.header.contains_from(loc.line))
    else {
        return loc.clone();
    };

    Location {
        file: FileRef::from_diff_path(&diff.to_file),
        line: remap_within_hunk(hunk, loc.line),
        col: loc.col,
    }
}

fn remap_within_hunk(hunk: &Hunk, target: u32) -> u32 {
    let mut cur_from = hunk.header.from_start;
    let mut cur_to = hunk.header.to_start;

    for line in &hunk.lines {
        match line {
            DiffLine::Neutral => {
                if cur_from == target {
                    return cur_to;
                }
                cur_from += 1;
                cur_to += 1;
            }
            DiffLine::From => {
                if cur_from == target {
                    // The target line was deleted: snap to the position the
                    // next surviving line will occupy.
                    return cur_to;
                }
                cur_from += 1;
            }
            DiffLine::To => cur_to += 1,
        }
    }

    cur_to
}

/// Remaps locations between two revisions of one repository.
pub struct LocationMapper {
    vcs: Arc<dyn VcsService>,
}

impl LocationMapper {
    #[must_use]
    pub fn new(vcs: Arc<dyn VcsService>) -> Self {
        Self { vcs }
    }

    /// Remap a location recorded against `from` onto revision `to`.
    pub async fn remap(
        &self,
        uid: &str,
        loc: &Location,
        from: &Revision,
        to: &Revision,
    ) -> Result<Location> {
        if loc.file.path().is_some_and(|path| path.ends_with(".kt")) {
            if let Some(mapped) = self.remap_kotlin(uid, loc, from, to).await {
                return Ok(mapped);
            }
            debug!(?loc, "syntax-aware remap inconclusive, falling back to diff");
        }
        self.remap_by_diff(uid, loc, from, to).await
    }

    /// Syntax-aware strategy. `None` means "could not conclude"; it never
    /// hard-fails, a missing file or unmatched function just degrades to
    /// the diff strategy.
    async fn remap_kotlin(
        &self,
        uid: &str,
        loc: &Location,
        from: &Revision,
        to: &Revision,
    ) -> Option<Location> {
        let path = loc.file.path()?;
        let from_src = self.vcs.cat(uid, path, from).await.ok()?;
        let to_src = self.vcs.cat(uid, path, to).await.ok()?;
        kotlin::remap_in_function(loc, &from_src, &to_src)
    }

    async fn remap_by_diff(
        &self,
        uid: &str,
        loc: &Location,
        from: &Revision,
        to: &Revision,
    ) -> Result<Location> {
        let Some(path) = loc.file.path() else {
            return Ok(loc.clone());
        };
        let diff_text = self
            .vcs
            .diff_file(uid, path, from, to)
            .await
            .with_context(|| format!("diffing {path} between {from} and {to}"))?;
        let diffs = parse_diff(&diff_text)?;
        Ok(apply_diffs(loc, &diffs))
    }
}
