//! Unified diff parsing.
//!
//! Understands the standard `git diff` text format: `diff --git` section
//! markers, `---`/`+++` file headers (with `a/`/`b/` prefixes and the
//! `/dev/null` sentinel), and `@@ -a,b +c,d @@` hunks. Only line *types*
//! are retained per hunk; the remapper never needs the line text.

use anyhow::{bail, Result};

/// A single line change within a hunk.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DiffLine {
    /// Present on both sides (context, starts with a space).
    Neutral,
    /// Only on the from side (deleted, starts with `-`).
    From,
    /// Only on the to side (inserted, starts with `+`).
    To,
}

/// A parsed hunk header.
///
/// Format: `@@ -from_start,from_count +to_start,to_count @@`, where a count
/// defaults to 1 when omitted (`@@ -1 +1 @@`).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HunkHeader {
    pub from_start: u32,
    pub from_count: u32,
    pub to_start: u32,
    pub to_count: u32,
}

impl HunkHeader {
    pub fn parse(line: &str) -> Result<Self> {
        let line = line.trim();
        if !line.starts_with("@@") {
            bail!("not a hunk header: {line}");
        }

        // Isolate the range part before the closing @@ (anything after it
        // is an optional section heading).
        let end_idx = line[2..].find("@@").map(|i| i + 2);
        let range_part = end_idx.map_or(&line[2..], |idx| &line[2..idx]).trim();

        let parts: Vec<&str> = range_part.split_whitespace().collect();
        if parts.len() < 2 {
            bail!("invalid hunk header: {line}");
        }

        let (from_start, from_count) = Self::parse_range(parts[0], '-')?;
        let (to_start, to_count) = Self::parse_range(parts[1], '+')?;

        Ok(Self {
            from_start,
            from_count,
            to_start,
            to_count,
        })
    }

    /// Parse a range like `-1,5` or `+1` into (start, count).
    fn parse_range(s: &str, prefix: char) -> Result<(u32, u32)> {
        let s = s.trim_start_matches(prefix);
        if let Some((start, count)) = s.split_once(',') {
            Ok((start.parse()?, count.parse()?))
        } else {
            Ok((s.parse()?, 1))
        }
    }

    /// Whether the from side of this hunk spans `line` (1-indexed).
    #[must_use]
    pub fn contains_from(&self, line: u32) -> bool {
        self.from_count > 0
            && line >= self.from_start
            && line < self.from_start + self.from_count
    }
}

/// A parsed hunk: header plus the type of each body line.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Hunk {
    pub header: HunkHeader,
    pub lines: Vec<DiffLine>,
}

/// All hunks of a single file entry, with both header paths resolved.
///
/// `from_file`/`to_file` differ on renames; a side with no file carries
/// the `/dev/null` sentinel verbatim.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileDiff {
    pub from_file: String,
    pub to_file: String,
    pub hunks: Vec<Hunk>,
}

/// Strip the `a/` or `b/` prefix git puts on header paths. `/dev/null`
/// and `--no-prefix` style paths pass through unchanged.
fn header_path(raw: &str) -> String {
    // Drop trailing metadata (git may append a tab plus mode info).
    let raw = raw.split('\t').next().unwrap_or(raw).trim();
    raw.strip_prefix("a/")
        .or_else(|| raw.strip_prefix("b/"))
        .unwrap_or(raw)
        .to_string()
}

/// Parse a complete unified diff, possibly spanning several files.
pub fn parse_diff(text: &str) -> Result<Vec<FileDiff>> {
    let lines: Vec<&str> = text.lines().collect();
    let mut diffs: Vec<FileDiff> = Vec::new();
    let mut current: Option<FileDiff> = None;
    let mut i = 0;

    while i < lines.len() {
        let line = lines[i];

        if line.starts_with("diff --git") {
            if let Some(done) = current.take() {
                diffs.push(done);
            }
            current = Some(FileDiff {
                from_file: String::new(),
                to_file: String::new(),
                hunks: Vec::new(),
            });
            i += 1;
        } else if let Some(rest) = line.strip_prefix("--- ") {
            let entry = current.get_or_insert_with(|| FileDiff {
                from_file: String::new(),
                to_file: String::new(),
                hunks: Vec::new(),
            });
            entry.from_file = header_path(rest);
            i += 1;
        } else if let Some(rest) = line.strip_prefix("+++ ") {
            match current.as_mut() {
                Some(entry) => entry.to_file = header_path(rest),
                None => bail!("'+++' header outside of a file section"),
            }
            i += 1;
        } else if line.starts_with("@@") {
            let header = HunkHeader::parse(line)?;
            i += 1;

            // The body is bounded by the header's counts, never by sniffing
            // for the next header: a deleted `-- comment` line renders as
            // `--- comment` and must stay a From line, not end the hunk.
            let mut from_left = header.from_count;
            let mut to_left = header.to_count;
            let mut body = Vec::new();
            while i < lines.len() && (from_left > 0 || to_left > 0) {
                match lines[i].chars().next() {
                    Some('-') => {
                        body.push(DiffLine::From);
                        from_left = from_left.saturating_sub(1);
                    }
                    Some('+') => {
                        body.push(DiffLine::To);
                        to_left = to_left.saturating_sub(1);
                    }
                    // Some diffs omit the trailing space on empty context lines.
                    Some(' ') | None => {
                        body.push(DiffLine::Neutral);
                        from_left = from_left.saturating_sub(1);
                        to_left = to_left.saturating_sub(1);
                    }
                    // "\ No newline at end of file" consumes no range.
                    Some('\\') => {}
                    _ => break,
                }
                i += 1;
            }

            match current.as_mut() {
                Some(entry) => entry.hunks.push(Hunk {
                    header,
                    lines: body,
                }),
                None => bail!("hunk outside of a file section"),
            }
        } else {
            // index lines, mode changes, binary notices
            i += 1;
        }
    }

    if let Some(done) = current.take() {
        diffs.push(done);
    }

    Ok(diffs)
}
