//! Input validation for the dispatcher
//!
//! Covers the patch gate applied to runner reports, action definitions, target
//! repository sets and runner identities. Everything here is pure; callers run
//! it before opening a store transaction.

use std::collections::HashSet;

use crate::error::{DispatchError, Result};
use crate::models::{ActionDefinition, TargetRepo};

/// Structured parse error for a rejected patch
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("line {line}: {message}")]
pub struct PatchParseError {
    /// 1-based line number the parser stopped at (0 for whole-input errors)
    pub line: usize,
    pub message: String,
}

impl PatchParseError {
    fn new(line: usize, message: impl Into<String>) -> Self {
        Self {
            line,
            message: message.into(),
        }
    }
}

/// Gate for job results: accepts a text blob or explains why it is not a patch
pub trait PatchValidator: Send + Sync {
    fn validate(&self, patch: &str) -> std::result::Result<(), PatchParseError>;
}

/// Accepts multi-file unified diffs, including git extended headers
/// (mode changes, renames, binary markers), and rejects anything else.
#[derive(Debug, Clone, Copy, Default)]
pub struct UnifiedDiffValidator;

/// Prefixes git emits between `diff --git` and `---`
const EXTENDED_HEADER_PREFIXES: &[&str] = &[
    "index ",
    "old mode ",
    "new mode ",
    "deleted file mode ",
    "new file mode ",
    "similarity index ",
    "dissimilarity index ",
    "rename from ",
    "rename to ",
    "copy from ",
    "copy to ",
    "Binary files ",
    "GIT binary patch",
];

impl PatchValidator for UnifiedDiffValidator {
    fn validate(&self, patch: &str) -> std::result::Result<(), PatchParseError> {
        if patch.trim().is_empty() {
            return Err(PatchParseError::new(0, "patch is empty"));
        }

        let lines: Vec<&str> = patch.lines().collect();
        let mut parser = DiffParser { lines: &lines, pos: 0 };
        let mut files = 0;

        while parser.skip_blank_lines() {
            parser.parse_file()?;
            files += 1;
        }

        if files == 0 {
            return Err(PatchParseError::new(0, "no file diffs found"));
        }
        Ok(())
    }
}

struct DiffParser<'a> {
    lines: &'a [&'a str],
    pos: usize,
}

impl<'a> DiffParser<'a> {
    fn peek(&self) -> Option<&'a str> {
        self.lines.get(self.pos).copied()
    }

    fn line_no(&self) -> usize {
        self.pos + 1
    }

    /// Returns whether any input remains
    fn skip_blank_lines(&mut self) -> bool {
        while matches!(self.peek(), Some(l) if l.trim().is_empty()) {
            self.pos += 1;
        }
        self.pos < self.lines.len()
    }

    fn parse_file(&mut self) -> std::result::Result<(), PatchParseError> {
        let mut git_header = false;
        let mut extended = false;

        // Optional `diff ...` line followed by extended headers
        if let Some(line) = self.peek() {
            if line.starts_with("diff ") {
                git_header = true;
                self.pos += 1;
            }
        }
        while let Some(line) = self.peek() {
            if EXTENDED_HEADER_PREFIXES.iter().any(|p| line.starts_with(p)) {
                extended = true;
                self.pos += 1;
            } else {
                break;
            }
        }

        match self.peek() {
            Some(line) if line.starts_with("--- ") => {}
            // Mode-only, rename-only and binary diffs have no ---/+++ section
            _ if git_header && extended => return Ok(()),
            Some(line) => {
                return Err(PatchParseError::new(
                    self.line_no(),
                    format!("expected file header, found {:?}", truncate(line)),
                ))
            }
            None => {
                return Err(PatchParseError::new(
                    self.line_no(),
                    "unexpected end of input before file header",
                ))
            }
        }
        self.pos += 1;

        match self.peek() {
            Some(line) if line.starts_with("+++ ") => self.pos += 1,
            _ => {
                return Err(PatchParseError::new(
                    self.line_no(),
                    "expected '+++' line after '---' line",
                ))
            }
        }

        let mut hunks = 0;
        while matches!(self.peek(), Some(l) if l.starts_with("@@")) {
            self.parse_hunk()?;
            hunks += 1;
        }

        if hunks == 0 {
            return Err(PatchParseError::new(self.line_no(), "file diff has no hunks"));
        }
        Ok(())
    }

    fn parse_hunk(&mut self) -> std::result::Result<(), PatchParseError> {
        let header_line = self.line_no();
        let header = self.peek().unwrap_or_default();
        let (mut orig_remaining, mut new_remaining) = parse_hunk_header(header)
            .ok_or_else(|| PatchParseError::new(header_line, "malformed hunk header"))?;
        self.pos += 1;

        while orig_remaining > 0 || new_remaining > 0 {
            let Some(line) = self.peek() else {
                return Err(PatchParseError::new(
                    self.line_no(),
                    "unexpected end of input inside hunk",
                ));
            };

            match line.as_bytes().first() {
                // Some tools strip the trailing space from empty context lines
                None | Some(b' ') => {
                    orig_remaining = orig_remaining.checked_sub(1).ok_or_else(|| self.overrun())?;
                    new_remaining = new_remaining.checked_sub(1).ok_or_else(|| self.overrun())?;
                }
                Some(b'-') => {
                    orig_remaining = orig_remaining.checked_sub(1).ok_or_else(|| self.overrun())?;
                }
                Some(b'+') => {
                    new_remaining = new_remaining.checked_sub(1).ok_or_else(|| self.overrun())?;
                }
                Some(b'\\') => {}
                Some(_) => {
                    return Err(PatchParseError::new(
                        self.line_no(),
                        format!("unexpected line in hunk: {:?}", truncate(line)),
                    ))
                }
            }
            self.pos += 1;
        }

        if matches!(self.peek(), Some(l) if l.starts_with('\\')) {
            self.pos += 1;
        }
        Ok(())
    }

    fn overrun(&self) -> PatchParseError {
        PatchParseError::new(self.line_no(), "hunk has more lines than its header declares")
    }
}

/// Parse `@@ -l[,s] +l[,s] @@` into (original line count, new line count)
fn parse_hunk_header(line: &str) -> Option<(usize, usize)> {
    let rest = line.strip_prefix("@@ -")?;
    let (ranges, _section) = rest.split_once(" @@")?;
    let (orig, new) = ranges.split_once(" +")?;
    Some((parse_range(orig)?, parse_range(new)?))
}

fn parse_range(range: &str) -> Option<usize> {
    match range.split_once(',') {
        Some((start, len)) => {
            start.parse::<usize>().ok()?;
            len.parse().ok()
        }
        None => {
            range.parse::<usize>().ok()?;
            Some(1)
        }
    }
}

fn truncate(line: &str) -> String {
    line.chars().take(40).collect()
}

/// Normalise a reported patch: blank text means "no patch"
pub fn normalize_patch(patch: Option<String>) -> Option<String> {
    patch.filter(|p| !p.trim().is_empty())
}

/// Validate an action definition's content
pub fn validate_action_definition(definition: &ActionDefinition) -> Result<()> {
    if definition.steps.is_empty() {
        return Err(DispatchError::validation(
            "Action definition must contain at least one step",
        ));
    }

    for (index, step) in definition.steps.iter().enumerate() {
        if step.run.trim().is_empty() {
            return Err(DispatchError::validation(format!(
                "Step {index} has an empty run command"
            )));
        }
        if step.container.trim().is_empty() {
            return Err(DispatchError::validation(format!(
                "Step {index} has an empty container image"
            )));
        }
        if let Some(key) = step.env.keys().find(|k| k.trim().is_empty()) {
            return Err(DispatchError::validation(format!(
                "Step {index} has an invalid environment variable name {key:?}"
            )));
        }
    }

    Ok(())
}

/// Validate the repository set of a new execution
pub fn validate_target_repos(targets: &[TargetRepo]) -> Result<()> {
    if targets.is_empty() {
        return Err(DispatchError::validation(
            "An execution needs at least one target repository",
        ));
    }

    let mut seen = HashSet::with_capacity(targets.len());
    for target in targets {
        if target.base_revision.trim().is_empty() {
            return Err(DispatchError::validation(format!(
                "Repository {} has an empty base revision",
                target.repo_id
            )));
        }
        if !seen.insert(target.repo_id) {
            return Err(DispatchError::validation(format!(
                "Repository {} is targeted more than once",
                target.repo_id
            )));
        }
    }

    Ok(())
}

/// Validate a runner identity presented to the claim queue
pub fn validate_runner_id(runner_id: &str, max_length: usize) -> Result<()> {
    if runner_id.trim().is_empty() {
        return Err(DispatchError::validation("Runner identity must not be empty"));
    }
    if runner_id.len() > max_length {
        return Err(DispatchError::validation(format!(
            "Runner identity too long: {} chars (max: {max_length})",
            runner_id.len()
        )));
    }
    Ok(())
}
