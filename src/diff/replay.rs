use super::index::parse_hunk_header;
use super::types::Hunk;

/// Classification of one diff line during replay.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LineKind {
    /// A valid `@@` header; opens a hunk.
    HunkHeader(Hunk),
    /// An `@@` line that did not parse. Lines up to the next valid header are
    /// reported as [`LineKind::Skipped`].
    BadHeader,
    Added,
    Context,
    Removed,
    /// Body line of a malformed hunk.
    Skipped,
    /// File headers, `\ No newline at end of file`, anything outside a hunk.
    Meta,
}

/// One line of a diff with the coordinates it occupies in the old and new file.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReplayLine<'a> {
    pub kind: LineKind,
    /// Old-file line number (context and removed lines)
    pub old: Option<usize>,
    /// New-file line number (context and added lines)
    pub new: Option<usize>,
    /// Line content without its `+`/`-`/` ` prefix; the raw line otherwise
    pub text: &'a str,
    /// The line exactly as it appears in the diff
    pub raw: &'a str,
}

impl ReplayLine<'_> {
    /// Whether this line exists in the old file.
    pub fn in_old(&self) -> bool {
        matches!(self.kind, LineKind::Context | LineKind::Removed)
    }

    /// Whether this line exists in the new file.
    pub fn in_new(&self) -> bool {
        matches!(self.kind, LineKind::Context | LineKind::Added)
    }
}

#[derive(Debug, Clone, Copy)]
enum Cursor {
    Outside,
    /// Next old and new line numbers inside a valid hunk.
    Hunk { old: usize, new: usize },
    Malformed,
}

/// Walks a unified diff line by line, tracking old/new line numbers.
///
/// This is the single implementation of the hunk rules; the indexer, both
/// renderers and [`apply`](super::apply) all go through it:
///
/// - `@@ -a[,b] +c[,d] @@` resets both cursors, counts default to 1
/// - `+` (not `+++`) takes the next new line number
/// - ` ` takes the next old and new line numbers
/// - `-` (not `---`) takes the next old line number only
/// - anything else is meta and moves nothing
pub struct Replay<'a> {
    lines: std::str::Lines<'a>,
    cursor: Cursor,
}

impl<'a> Replay<'a> {
    pub fn new(diff_text: &'a str) -> Self {
        Self {
            lines: diff_text.lines(),
            cursor: Cursor::Outside,
        }
    }

    fn classify(&mut self, line: &'a str) -> ReplayLine<'a> {
        let meta = |kind| ReplayLine {
            kind,
            old: None,
            new: None,
            text: line,
            raw: line,
        };

        if line.starts_with("@@") {
            return match parse_hunk_header(line) {
                Ok(hunk) => {
                    self.cursor = Cursor::Hunk {
                        old: hunk.old_start.max(1),
                        new: hunk.new_start.max(1),
                    };
                    meta(LineKind::HunkHeader(hunk))
                }
                Err(_) => {
                    self.cursor = Cursor::Malformed;
                    meta(LineKind::BadHeader)
                }
            };
        }

        let (old, new) = match self.cursor {
            Cursor::Outside => return meta(LineKind::Meta),
            Cursor::Malformed => return meta(LineKind::Skipped),
            Cursor::Hunk { old, new } => (old, new),
        };

        let body = || line.get(1..).unwrap_or("");
        if line.starts_with('+') && !line.starts_with("+++") {
            self.cursor = Cursor::Hunk { old, new: new + 1 };
            ReplayLine {
                kind: LineKind::Added,
                old: None,
                new: Some(new),
                text: body(),
                raw: line,
            }
        } else if line.starts_with('-') && !line.starts_with("---") {
            self.cursor = Cursor::Hunk { old: old + 1, new };
            ReplayLine {
                kind: LineKind::Removed,
                old: Some(old),
                new: None,
                text: body(),
                raw: line,
            }
        } else if line.starts_with(' ') {
            self.cursor = Cursor::Hunk {
                old: old + 1,
                new: new + 1,
            };
            ReplayLine {
                kind: LineKind::Context,
                old: Some(old),
                new: Some(new),
                text: body(),
                raw: line,
            }
        } else {
            meta(LineKind::Meta)
        }
    }
}

impl<'a> Iterator for Replay<'a> {
    type Item = ReplayLine<'a>;

    fn next(&mut self) -> Option<Self::Item> {
        let line = self.lines.next()?;
        Some(self.classify(line))
    }
}
