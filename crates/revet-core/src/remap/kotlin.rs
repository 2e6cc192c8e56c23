//! Syntax-aware remapping for Kotlin sources.
//!
//! Instead of trusting the diff line-by-line, this strategy locates the
//! named function enclosing the comment in the old revision, finds the
//! same function in the new revision, and re-anchors the comment on the
//! target function line that best matches the original line text. Every
//! inconclusive step returns `None`, which degrades to the diff strategy.
//!
//! The scanner is deliberately lightweight: package/class/object nesting
//! and brace matching, with strings and comments blanked out first. That
//! is enough structure to resolve fully-qualified function names without
//! dragging in a real Kotlin front end.

use crate::location::Location;

/// Line range of one named function, 1-indexed and inclusive.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FunctionSpan {
    pub name: String,
    /// `package.Container.name` for members; local functions (nested in
    /// another function) only carry their short name.
    pub fq_name: String,
    pub start_line: u32,
    pub end_line: u32,
}

impl FunctionSpan {
    #[must_use]
    pub fn contains(&self, line: u32) -> bool {
        line >= self.start_line && line <= self.end_line
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum DeclKind {
    Container,
    Function,
}

#[derive(Debug)]
struct PendingDecl {
    kind: DeclKind,
    name: String,
    line: u32,
}

#[derive(Debug)]
struct Scope {
    /// `None` for anonymous blocks (control flow, lambdas).
    name: Option<String>,
    kind: DeclKind,
    decl_line: u32,
    fq_name: String,
}

/// Blank out string literals, line comments, and block comments so that
/// brace counting and keyword scanning only see code structure.
fn strip_noise(line: &str, in_block_comment: &mut bool) -> String {
    let mut out = String::with_capacity(line.len());
    let chars: Vec<char> = line.chars().collect();
    let mut i = 0;
    let mut in_string = false;
    let mut in_char = false;

    while i < chars.len() {
        let c = chars[i];
        let next = chars.get(i + 1).copied();

        if *in_block_comment {
            if c == '*' && next == Some('/') {
                *in_block_comment = false;
                i += 2;
            } else {
                i += 1;
            }
        } else if in_string {
            if c == '\\' {
                i += 2;
            } else {
                if c == '"' {
                    in_string = false;
                }
                i += 1;
            }
        } else if in_char {
            if c == '\\' {
                i += 2;
            } else {
                if c == '\'' {
                    in_char = false;
                }
                i += 1;
            }
        } else {
            match c {
                '/' if next == Some('/') => break,
                '/' if next == Some('*') => {
                    *in_block_comment = true;
                    i += 2;
                }
                '"' => {
                    in_string = true;
                    out.push(' ');
                    i += 1;
                }
                '\'' => {
                    in_char = true;
                    out.push(' ');
                    i += 1;
                }
                _ => {
                    out.push(c);
                    i += 1;
                }
            }
        }
    }

    out
}

fn ident_prefix(token: &str) -> &str {
    let end = token
        .find(|c: char| !c.is_alphanumeric() && c != '_')
        .unwrap_or(token.len());
    &token[..end]
}

/// First class/object/interface or `fun` declaration on the line.
fn find_decl(effective: &str) -> Option<(DeclKind, String)> {
    let tokens: Vec<&str> = effective.split_whitespace().collect();
    for (i, token) in tokens.iter().enumerate() {
        let kind = match *token {
            "fun" => DeclKind::Function,
            "class" | "interface" | "object" => DeclKind::Container,
            _ => continue,
        };
        let mut j = i + 1;
        // Skip generic parameters of `fun <T> name(...)`.
        if kind == DeclKind::Function {
            while j < tokens.len() && tokens[j].starts_with('<') {
                j += 1;
            }
        }
        let name = tokens.get(j).map(|t| ident_prefix(t)).unwrap_or_default();
        if !name.is_empty() {
            return Some((kind, name.to_string()));
        }
    }
    None
}

/// Scan Kotlin source into named function spans.
#[must_use]
pub fn scan_functions(source: &str) -> Vec<FunctionSpan> {
    let mut spans = Vec::new();
    let mut package: Option<String> = None;
    let mut stack: Vec<Scope> = Vec::new();
    let mut pending: Option<PendingDecl> = None;
    let mut in_block_comment = false;
    let mut last_line = 0u32;

    for (idx, raw) in source.lines().enumerate() {
        let line_no = u32::try_from(idx + 1).unwrap_or(u32::MAX);
        last_line = line_no;
        let effective = strip_noise(raw, &mut in_block_comment);
        let trimmed = effective.trim();

        if let Some(rest) = trimmed.strip_prefix("package ") {
            package = Some(rest.trim_end_matches(';').trim().to_string());
            continue;
        }

        if let Some((kind, name)) = find_decl(&effective) {
            pending = Some(PendingDecl {
                kind,
                name,
                line: line_no,
            });
        }

        // `fun f() = expr` single-expression bodies never open a brace.
        if effective.contains('=') && !effective.contains('{') {
            if let Some(decl) = pending.take_if(|d| d.kind == DeclKind::Function) {
                spans.push(FunctionSpan {
                    fq_name: qualify(&package, &stack, &decl.name),
                    name: decl.name,
                    start_line: decl.line,
                    end_line: line_no,
                });
            }
        }

        for c in effective.chars() {
            match c {
                '{' => {
                    let scope = match pending.take() {
                        Some(decl) => Scope {
                            fq_name: qualify(&package, &stack, &decl.name),
                            name: Some(decl.name),
                            kind: decl.kind,
                            decl_line: decl.line,
                        },
                        None => Scope {
                            name: None,
                            kind: DeclKind::Container,
                            decl_line: line_no,
                            fq_name: String::new(),
                        },
                    };
                    stack.push(scope);
                }
                '}' => {
                    if let Some(scope) = stack.pop() {
                        if scope.kind == DeclKind::Function {
                            if let Some(name) = scope.name {
                                spans.push(FunctionSpan {
                                    name,
                                    fq_name: scope.fq_name,
                                    start_line: scope.decl_line,
                                    end_line: line_no,
                                });
                            }
                        }
                    }
                }
                _ => {}
            }
        }
    }

    // Tolerate truncated input: close whatever is still open at EOF.
    while let Some(scope) = stack.pop() {
        if scope.kind == DeclKind::Function {
            if let Some(name) = scope.name {
                spans.push(FunctionSpan {
                    name,
                    fq_name: scope.fq_name,
                    start_line: scope.decl_line,
                    end_line: last_line,
                });
            }
        }
    }

    spans
}

/// Fully-qualified name for a declaration about to be opened under `stack`.
/// Local functions (under any function scope) qualify by short name only.
fn qualify(package: &Option<String>, stack: &[Scope], name: &str) -> String {
    if stack.iter().any(|scope| scope.kind == DeclKind::Function) {
        return name.to_string();
    }
    let mut parts: Vec<&str> = Vec::new();
    if let Some(pkg) = package {
        parts.push(pkg);
    }
    for scope in stack {
        if let Some(scope_name) = &scope.name {
            parts.push(scope_name);
        }
    }
    parts.push(name);
    parts.join(".")
}

/// The innermost named function whose span contains `line`.
#[must_use]
pub fn innermost(spans: &[FunctionSpan], line: u32) -> Option<&FunctionSpan> {
    spans
        .iter()
        .filter(|span| span.contains(line))
        .max_by_key(|span| (span.start_line, std::cmp::Reverse(span.end_line)))
}

/// Re-anchor `loc` from `from_src` onto `to_src` within the enclosing
/// function. `None` whenever structural matching is inconclusive.
#[must_use]
pub fn remap_in_function(loc: &Location, from_src: &str, to_src: &str) -> Option<Location> {
    let from_spans = scan_functions(from_src);
    let source_fn = innermost(&from_spans, loc.line)?;

    let to_spans = scan_functions(to_src);
    let target_fn = to_spans
        .iter()
        .find(|span| span.fq_name == source_fn.fq_name)
        .or_else(|| to_spans.iter().find(|span| span.name == source_fn.name))?;

    let key_idx = usize::try_from(loc.line).ok()?.checked_sub(1)?;
    let key = from_src.lines().nth(key_idx)?.trim();
    let to_lines: Vec<&str> = to_src.lines().collect();

    // Earliest minimum wins: blank or boilerplate lines can tie.
    let mut best: Option<(usize, u32)> = None;
    for (offset, line_no) in (target_fn.start_line..=target_fn.end_line).enumerate() {
        let idx = usize::try_from(line_no).ok()?.checked_sub(1)?;
        let text = to_lines.get(idx)?.trim();
        let dist = strsim::levenshtein(key, text);
        if best.is_none_or(|(best_dist, _)| dist < best_dist) {
            best = Some((dist, u32::try_from(offset).ok()?));
        }
    }
    let (_, offset) = best?;

    let line = (target_fn.start_line + offset).min(target_fn.end_line);
    Some(Location {
        file: loc.file.clone(),
        line,
        col: loc.col,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    const FROM: &str = "\
package edu.demo

class Solution {
    fun solve(input: List<Int>): Int {
        val total = input.sum()
        return total * 2
    }

    fun helper(x: Int) = x + 1
}
";

    const TO: &str = "\
package edu.demo

class Solution {
    fun preamble() {
        // new code pushed everything down
    }

    fun solve(input: List<Int>): Int {
        val extra = input.size
        val total = input.sum()
        return total * 2
    }

    fun helper(x: Int) = x + 1
}
";

    #[test]
    fn test_scan_finds_member_functions() {
        let spans = scan_functions(FROM);
        let solve = spans.iter().find(|s| s.name == "solve").expect("solve");
        assert_eq!(solve.fq_name, "edu.demo.Solution.solve");
        assert_eq!(solve.start_line, 4);
        assert_eq!(solve.end_line, 7);
    }

    #[test]
    fn test_scan_single_expression_function() {
        let spans = scan_functions(FROM);
        let helper = spans.iter().find(|s| s.name == "helper").expect("helper");
        assert_eq!(helper.start_line, 9);
        assert_eq!(helper.end_line, 9);
    }

    #[test]
    fn test_scan_local_function_uses_short_name() {
        let src = "\
fun outer() {
    fun inner(): Int {
        return 1
    }
    inner()
}
";
        let spans = scan_functions(src);
        let inner = spans.iter().find(|s| s.name == "inner").expect("inner");
        assert_eq!(inner.fq_name, "inner");
        let outer = spans.iter().find(|s| s.name == "outer").expect("outer");
        assert_eq!(outer.fq_name, "outer");
    }

    #[test]
    fn test_innermost_prefers_nested_span() {
        let src = "\
fun outer() {
    fun inner(): Int {
        return 1
    }
}
";
        let spans = scan_functions(src);
        assert_eq!(innermost(&spans, 3).expect("span").name, "inner");
        assert_eq!(innermost(&spans, 5).expect("span").name, "outer");
    }

    #[test]
    fn test_braces_in_strings_and_comments_ignored() {
        let src = "\
fun tricky() {
    val s = \"{ not a brace }\"
    // } neither is this
    /* nor { this */
    return
}
";
        let spans = scan_functions(src);
        assert_eq!(spans.len(), 1);
        assert_eq!(spans[0].end_line, 6);
    }

    #[test]
    fn test_remap_follows_function_body() {
        // `return total * 2` sits at line 6 in FROM, line 11 in TO.
        let loc = Location::new("a.kt", 6);
        let mapped = remap_in_function(&loc, FROM, TO).expect("remap");
        assert_eq!(mapped.line, 11);
    }

    #[test]
    fn test_remap_none_when_function_removed() {
        let to = "package edu.demo\n\nclass Solution {\n}\n";
        let loc = Location::new("a.kt", 5);
        assert_eq!(remap_in_function(&loc, FROM, to), None);
    }

    #[test]
    fn test_remap_none_for_line_zero() {
        // Locations are 1-indexed; a zero line is inconclusive, not a panic.
        let loc = Location::new("a.kt", 0);
        assert_eq!(remap_in_function(&loc, FROM, TO), None);
    }

    #[test]
    fn test_remap_none_outside_any_function() {
        let loc = Location::new("a.kt", 1);
        assert_eq!(remap_in_function(&loc, FROM, TO), None);
    }

    #[test]
    fn test_remap_tie_breaks_on_earliest_line() {
        let from = "\
fun f() {
    val x = 1
    val x = 1
}
";
        let to = "\
fun f() {
    val x = 1
    val x = 1
}
";
        // Both body lines tie at distance zero; the earliest offset wins.
        let mapped = remap_in_function(&Location::new("a.kt", 3), from, to).expect("remap");
        assert_eq!(mapped.line, 2);
    }

    #[test]
    fn test_remap_clamped_inside_target_function() {
        let from = "\
fun f() {
    val a = 1
    val b = 2
    val c = 3
}
";
        let to = "\
fun f() {
    val c = 3
}
";
        let mapped = remap_in_function(&Location::new("a.kt", 4), from, to).expect("remap");
        assert!(mapped.line >= 1 && mapped.line <= 3);
        assert_eq!(mapped.line, 2);
    }
}
