//! Recover structure blocks from concatenated extended-XYZ text.
//!
//! Extended-XYZ has no terminator: a block is a count line, a comment line and
//! `count` atom lines, and files are often concatenated with or without blank
//! lines in between. The tokenizer walks a forward-only cursor over the line
//! sequence, treating every line that is not a non-negative integer as noise,
//! and slicing out `2 + n` lines whenever it finds a count `n`. Each line is
//! inspected at most once per position, so tokenizing is linear in the input.

/// One candidate structure: `[count, comment, atoms...]`.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct TextBlock<'a> {
    /// 1-based position among all emitted blocks.
    pub ordinal: usize,
    /// 0-based index of the count line in the input line sequence.
    pub start_line: usize,
    /// Atom count parsed from the count line.
    pub declared: usize,
    lines: &'a [String],
}

impl<'a> TextBlock<'a> {
    pub fn count_line(&self) -> &'a str {
        &self.lines[0]
    }

    pub fn comment(&self) -> &'a str {
        &self.lines[1]
    }

    pub fn atom_lines(&self) -> &'a [String] {
        &self.lines[2..]
    }

    #[cfg(test)]
    pub(crate) fn from_lines(lines: &'a [String]) -> Self {
        let declared = lines[0].trim().parse().unwrap_or(0);
        Self {
            ordinal: 1,
            start_line: 0,
            declared,
            lines,
        }
    }
}

/// Tail block whose declared atom count runs past the end of input.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct IncompleteBlock {
    /// 0-based index of the count line.
    pub line: usize,
    pub declared: usize,
    /// Atom lines actually present after the comment line.
    pub available: usize,
}

/// Counters gathered while tokenizing.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct TokenizeReport {
    /// Lines skipped because they were not an atom count.
    pub skipped_lines: usize,
    /// Blocks handed to the decoder.
    pub blocks: usize,
    pub incomplete: Option<IncompleteBlock>,
}

/// Lazy, single-pass iterator over the [`TextBlock`]s in a line sequence.
pub struct BlockTokenizer<'a> {
    lines: &'a [String],
    cursor: usize,
    report: TokenizeReport,
    done: bool,
}

impl<'a> BlockTokenizer<'a> {
    pub fn new(lines: &'a [String]) -> Self {
        Self {
            lines,
            cursor: 0,
            report: TokenizeReport::default(),
            done: false,
        }
    }

    /// Index of the next line the tokenizer will inspect.
    pub fn cursor(&self) -> usize {
        self.cursor
    }

    pub fn report(&self) -> TokenizeReport {
        self.report
    }
}

impl<'a> Iterator for BlockTokenizer<'a> {
    type Item = TextBlock<'a>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.done {
            return None;
        }
        while self.cursor < self.lines.len() {
            let i = self.cursor;
            let Ok(declared) = self.lines[i].trim().parse::<usize>() else {
                self.report.skipped_lines += 1;
                self.cursor += 1;
                continue;
            };
            let last = i.checked_add(1).and_then(|v| v.checked_add(declared));
            match last {
                Some(last) if last < self.lines.len() => {
                    self.cursor = last + 1;
                    self.report.blocks += 1;
                    return Some(TextBlock {
                        ordinal: self.report.blocks,
                        start_line: i,
                        declared,
                        lines: &self.lines[i..=last],
                    });
                }
                _ => {
                    self.report.incomplete = Some(IncompleteBlock {
                        line: i,
                        declared,
                        available: self.lines.len().saturating_sub(i + 2),
                    });
                    self.cursor = self.lines.len();
                    break;
                }
            }
        }
        self.done = true;
        None
    }
}

/// Split text into owned lines, dropping `\r` from CRLF endings.
pub fn split_lines(text: &str) -> Vec<String> {
    text.lines().map(str::to_owned).collect()
}
