//! Carrying review comments forward onto a resubmission.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use anyhow::{bail, Context, Result};
use tracing::debug;

use crate::db::{Comment, Database, Submission};
use crate::location::{FileRef, Location, NON_EXISTENT_FILE};
use crate::remap::LocationMapper;
use crate::vcs::Revision;
use crate::verify::EntityId;

/// Copies every comment a child submission is missing from its parent,
/// remapped to the child's revision.
///
/// Idempotent and safe to race for the same (parent, child) pair: copying
/// is duplicate-detected per `(submission, persistent id)`, and a re-run
/// skips everything already present.
pub struct CommentMigrator {
    db: Arc<Database>,
    mapper: LocationMapper,
}

impl CommentMigrator {
    #[must_use]
    pub fn new(db: Arc<Database>, mapper: LocationMapper) -> Self {
        Self { db, mapper }
    }

    pub async fn migrate(&self, uid: &str, parent: &Submission, child: &Submission) -> Result<()> {
        let migrated: HashSet<EntityId> = self
            .db
            .comments_for_submission(child.id)
            .iter()
            .map(|c| c.persistent_id)
            .collect();
        let pending: Vec<Comment> = self
            .db
            .comments_for_submission(parent.id)
            .into_iter()
            .filter(|c| !migrated.contains(&c.persistent_id))
            .collect();
        debug!(
            parent = parent.id,
            child = child.id,
            count = pending.len(),
            "migrating comments"
        );

        // Copy everything first so reply targets exist before rewiring.
        let copies: Vec<Comment> = pending
            .iter()
            .map(|source| self.db.copy_comment(source, child.id))
            .collect();

        let child_rev = Revision::from_stored(child.revision.as_deref());
        for copy in copies {
            let ancestor = self.ancestor_of(&copy)?;
            let ancestor_sub = self
                .db
                .submission(ancestor.submission_id)
                .with_context(|| {
                    format!("ancestor submission {} is gone", ancestor.submission_id)
                })?;
            let ancestor_rev = Revision::from_stored(ancestor_sub.revision.as_deref());

            let loc = Location {
                file: FileRef::Normal(ancestor.sourcefile.clone()),
                line: ancestor.sourceline,
                col: 0,
            };
            let mapped = self.mapper.remap(uid, &loc, &ancestor_rev, &child_rev).await?;

            let mut updated = copy;
            match mapped.file {
                FileRef::Normal(path) => updated.sourcefile = path,
                FileRef::NonExistent => updated.sourcefile = NON_EXISTENT_FILE.to_string(),
                FileRef::Unknown => {}
            }
            updated.sourceline = mapped.line;
            if let Some(previous) = updated.previous_comment_id {
                updated.previous_comment_id = Some(self.rewire(previous, child.id)?);
            }
            self.db.update_comment(&updated)?;
        }

        self.anchor_reply_chains(child.id)
    }

    /// The lineage row that originally authored this persistent comment,
    /// still carrying the location the author pointed at. Zero or multiple
    /// matches mean the lineage is corrupt, which must surface, not heal.
    fn ancestor_of(&self, comment: &Comment) -> Result<Comment> {
        let mut matches = self
            .db
            .find_comments(comment.original_submission_id, comment.persistent_id);
        match matches.len() {
            1 => Ok(matches.remove(0)),
            0 => bail!(
                "comment lineage broken: persistent comment {} has no row on its original submission {}",
                comment.persistent_id,
                comment.original_submission_id
            ),
            n => bail!(
                "comment lineage broken: persistent comment {} has {n} rows on submission {}",
                comment.persistent_id,
                comment.original_submission_id
            ),
        }
    }

    /// Reply pointers carry local ids, which are never shared across
    /// submissions: translate through the persistent id to the local row
    /// now existing on the child.
    fn rewire(&self, previous_id: EntityId, child_id: EntityId) -> Result<EntityId> {
        let pointed = self
            .db
            .comment(previous_id)
            .with_context(|| format!("reply points at missing comment {previous_id}"))?;
        let mut matches = self.db.find_comments(child_id, pointed.persistent_id);
        match matches.len() {
            1 => Ok(matches.remove(0).id),
            0 => bail!(
                "comment lineage broken: reply target (persistent {}) was not migrated to submission {child_id}",
                pointed.persistent_id
            ),
            n => bail!(
                "comment lineage broken: reply target (persistent {}) has {n} rows on submission {child_id}",
                pointed.persistent_id
            ),
        }
    }

    /// Replies adopt the remapped location of their chain head so a whole
    /// thread stays anchored to one place.
    fn anchor_reply_chains(&self, child_id: EntityId) -> Result<()> {
        let comments = self.db.comments_for_submission(child_id);
        let by_id: HashMap<EntityId, &Comment> = comments.iter().map(|c| (c.id, c)).collect();

        for comment in &comments {
            if comment.previous_comment_id.is_none() {
                continue;
            }
            let mut seen = HashSet::new();
            let mut head: &Comment = comment;
            while let Some(previous) = head.previous_comment_id {
                if !seen.insert(head.id) {
                    bail!("comment lineage broken: reply cycle through comment {}", head.id);
                }
                match by_id.get(&previous) {
                    Some(earlier) => head = *earlier,
                    None => bail!(
                        "comment lineage broken: reply {} points outside submission {child_id}",
                        head.id
                    ),
                }
            }
            if head.sourcefile != comment.sourcefile || head.sourceline != comment.sourceline {
                let mut updated = comment.clone();
                updated.sourcefile = head.sourcefile.clone();
                updated.sourceline = head.sourceline;
                self.db.update_comment(&updated)?;
            }
        }
        Ok(())
    }
}
