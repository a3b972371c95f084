//! Manifest block extraction
//!
//! Finds the `scriptisto-begin` / `scriptisto-end` block inside a script's
//! comments and strips the comment leaders, yielding the raw manifest text.
//! One generic scanner serves every language: the comment leader written in
//! front of `scriptisto-begin` is looked up in [`CommentStyle`] and then
//! required on every line up to `scriptisto-end`.

use crate::error::{ScriptistoError, ScriptistoResult};
use std::fmt;
use tracing::debug;

/// Marker opening the manifest block
pub const BEGIN_MARKER: &str = "scriptisto-begin";
/// Marker closing the manifest block
pub const END_MARKER: &str = "scriptisto-end";

/// Line comment leaders a manifest block may be written behind
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CommentStyle {
    /// C, C++, C#, Rust, Go, Java, JavaScript, TypeScript
    DoubleSlash,
    /// Shell, Python, Ruby, Perl, Nim
    Hash,
    /// Lua, SQL, Haskell, Ada
    DoubleDash,
    /// Lisps, assembly, INI
    Semicolon,
    /// Erlang, TeX, MATLAB
    Percent,
    /// Continuation lines of a `/* ... */` block comment
    Star,
}

impl CommentStyle {
    /// The literal leader text for this style
    pub fn leader(&self) -> &'static str {
        match self {
            Self::DoubleSlash => "//",
            Self::Hash => "#",
            Self::DoubleDash => "--",
            Self::Semicolon => ";",
            Self::Percent => "%",
            Self::Star => "*",
        }
    }

    /// All styles, in lookup order
    fn all() -> &'static [Self] {
        &[
            Self::DoubleSlash,
            Self::Hash,
            Self::DoubleDash,
            Self::Semicolon,
            Self::Percent,
            Self::Star,
        ]
    }

    /// Identify the style of a leader such as `//`, `#`, `##` or `;;`
    ///
    /// A leader may repeat the base token (`###`, `;;;`), which is common in
    /// Lisp and shell sources.
    pub fn detect(leader: &str) -> Option<Self> {
        if leader.is_empty() {
            return None;
        }
        Self::all().iter().copied().find(|style| {
            let base = style.leader();
            leader.len() % base.len() == 0 && leader == base.repeat(leader.len() / base.len())
        })
    }
}

impl fmt::Display for CommentStyle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.leader())
    }
}

/// The manifest text found between the markers, comment leaders removed
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ManifestBlock {
    /// Comment style the block was written in
    pub style: CommentStyle,
    /// 1-based line number of the `scriptisto-begin` line
    pub begin_line: usize,
    /// 1-based line number of the `scriptisto-end` line
    pub end_line: usize,
    /// Block body with leaders stripped, lines joined with `\n`
    pub body: String,
}

/// Leader state captured from the `scriptisto-begin` line
struct OpenBlock {
    style: CommentStyle,
    leader: String,
    /// Whitespace columns between the leader and the marker
    gap: usize,
    begin_line: usize,
    lines: Vec<String>,
}

impl OpenBlock {
    /// Remove the comment leader and the begin line's leader/marker gap.
    ///
    /// Indentation beyond the gap is kept, so nested YAML survives.
    fn strip<'a>(&self, line: &'a str) -> Option<&'a str> {
        if line.trim().is_empty() {
            return Some("");
        }
        let mut rest = line.trim_start().strip_prefix(self.leader.as_str())?;
        for _ in 0..self.gap {
            match rest.strip_prefix([' ', '\t']) {
                Some(stripped) => rest = stripped,
                None => break,
            }
        }
        Some(rest)
    }
}

/// Detect a marker on a line whose prefix is a recognised comment leader.
///
/// Returns the leader text and the whitespace gap before the marker. A marker
/// preceded by anything else (e.g. inside a string literal) is not a marker.
fn marker_line<'a>(line: &'a str, marker: &str) -> Option<(&'a str, CommentStyle, usize)> {
    let pos = line.find(marker)?;
    let prefix = &line[..pos];
    let leader = prefix.trim();
    let style = CommentStyle::detect(leader)?;
    let trailing = &line[pos + marker.len()..];
    if !trailing.trim().is_empty() {
        return None;
    }
    let gap = prefix.len() - prefix.trim_end().len();
    Some((leader, style, gap))
}

/// Locate and unwrap the manifest block in `source`
///
/// The first well-formed `scriptisto-begin` line opens the block; scanning
/// stops at its `scriptisto-end`.
pub fn extract_block(source: &str) -> ScriptistoResult<ManifestBlock> {
    let mut open: Option<OpenBlock> = None;

    for (idx, line) in source.lines().enumerate() {
        let line_no = idx + 1;

        let Some(block) = open.as_mut() else {
            if let Some((leader, style, gap)) = marker_line(line, BEGIN_MARKER) {
                debug!(line = line_no, style = %style, "Found manifest block start");
                open = Some(OpenBlock {
                    style,
                    leader: leader.to_string(),
                    gap,
                    begin_line: line_no,
                    lines: Vec::new(),
                });
            } else if marker_line(line, END_MARKER).is_some() {
                return Err(ScriptistoError::malformed(
                    line_no,
                    format!("'{END_MARKER}' without a preceding '{BEGIN_MARKER}'"),
                ));
            }
            continue;
        };

        let content = block.strip(line).ok_or_else(|| {
            ScriptistoError::malformed(
                line_no,
                format!(
                    "expected every line up to '{END_MARKER}' to start with '{}'",
                    block.leader
                ),
            )
        })?;

        if content.trim() == END_MARKER {
            return Ok(ManifestBlock {
                style: block.style,
                begin_line: block.begin_line,
                end_line: line_no,
                body: block.lines.join("\n"),
            });
        }
        if content.contains(BEGIN_MARKER) {
            return Err(ScriptistoError::malformed(
                line_no,
                format!("nested '{BEGIN_MARKER}' inside an open manifest block"),
            ));
        }
        block.lines.push(content.to_string());
    }

    match open {
        Some(block) => Err(ScriptistoError::malformed(
            block.begin_line,
            format!("'{BEGIN_MARKER}' is never closed by '{END_MARKER}'"),
        )),
        None => Err(ScriptistoError::ManifestNotFound),
    }
}
