//! Block rewrite engine for line-oriented configuration files.
//!
//! A file is a sequence of lines. Some lines open a section (`interface eth0`,
//! `ssid home`, ...); a block is a keyed section, from its header up to the
//! last field line before the next section or the end of the file. Comments
//! and blank lines trailing a block are not part of it. Everything outside the
//! block being rewritten is copied byte for byte, line terminators included.

use std::ops::Range;

/// One line of the file, split from its terminator
#[derive(Clone, Debug, PartialEq, Eq)]
struct Line<'a> {
    text: &'a str,
    eol: &'a str,
}

impl Line<'_> {
    fn is_blank(&self) -> bool {
        self.text.trim().is_empty()
    }

    fn is_comment(&self) -> bool {
        self.text.trim_start().starts_with('#')
    }
}

/// A keyed block as found in the file
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Block {
    pub key: String,
    /// Header line as written, without terminator
    pub header: String,
    /// Lines after the header, without terminators
    pub fields: Vec<String>,
    /// Line indices covered by the block, header included
    lines: Range<usize>,
}

/// Syntax of a block-structured file
#[derive(Clone, Copy, Debug)]
pub struct ProfileConfigStore {
    /// Keyword of the headers of keyed blocks
    header: &'static str,
    /// Keywords that open any section and therefore end the current block
    sections: &'static [&'static str],
}

impl ProfileConfigStore {
    pub const fn new(header: &'static str, sections: &'static [&'static str]) -> Self {
        Self { header, sections }
    }

    /// Parse `content` into its keyed blocks, in file order
    pub fn parse(&self, content: &str) -> Vec<Block> {
        self.blocks(&split_lines(content))
    }

    /// First block with `key`, later duplicates are ignored
    pub fn find(&self, content: &str, key: &str) -> Option<Block> {
        self.parse(content).into_iter().find(|b| b.key == key)
    }

    /// Header line for a new block with `key`
    pub fn header_line(&self, key: &str) -> String {
        format!("{} {key}", self.header)
    }

    /// Rewrite the block `key` with `fields`.
    ///
    /// Empty `fields` delete the block. An existing block keeps its position
    /// and header line, a new one is appended at the end of the file.
    /// Written lines use the dominant terminator of `content`, CRLF only if
    /// most lines already end with it.
    pub fn upsert(&self, content: &str, key: &str, fields: &[String]) -> String {
        let mut lines = split_lines(content);
        let eol = dominant_eol(&lines);
        let existing = self.blocks(&lines).into_iter().find(|b| b.key == key);

        match (existing, fields.is_empty()) {
            (None, true) => content.to_string(),
            (None, false) => {
                let mut out = content.to_string();
                if !out.is_empty() {
                    if !out.ends_with('\n') {
                        out.push_str(eol);
                    }
                    if lines.last().is_some_and(|l| !l.is_blank()) {
                        out.push_str(eol);
                    }
                }
                out.push_str(&self.header_line(key));
                out.push_str(eol);
                push_fields(&mut out, fields, eol);
                out
            }
            (Some(block), true) => {
                let Range { start, end } = block.lines;
                lines.drain(start..end);

                // collapse the separators the block leaves behind
                let prev_blank = start == 0 || lines[start - 1].is_blank();
                if start < lines.len() {
                    if prev_blank && lines[start].is_blank() {
                        lines.remove(start);
                    }
                } else {
                    while lines.last().is_some_and(|l| l.is_blank()) {
                        lines.pop();
                    }
                }

                join_lines(&lines)
            }
            (Some(block), false) => {
                let Range { start, end } = block.lines;
                let mut out = join_lines(&lines[..start]);

                let header = &lines[start];
                out.push_str(header.text);
                out.push_str(if header.eol.is_empty() { eol } else { header.eol });
                push_fields(&mut out, fields, eol);
                out.push_str(&join_lines(&lines[end..]));
                out
            }
        }
    }

    fn header_key<'a>(&self, line: &'a str) -> Option<&'a str> {
        let (keyword, rest) = split_keyword(line)?;
        (keyword == self.header)
            .then(|| rest.split_whitespace().next())
            .flatten()
    }

    fn opens_section(&self, line: &str) -> bool {
        split_keyword(line)
            .is_some_and(|(keyword, _)| keyword == self.header || self.sections.contains(&keyword))
    }

    fn blocks(&self, lines: &[Line]) -> Vec<Block> {
        let mut blocks = Vec::new();
        let mut i = 0;

        while i < lines.len() {
            let Some(key) = self.header_key(lines[i].text) else {
                i += 1;
                continue;
            };

            let start = i;
            let mut end = i + 1;
            i += 1;

            while i < lines.len() && !self.opens_section(lines[i].text) {
                if !lines[i].is_blank() && !lines[i].is_comment() {
                    end = i + 1;
                }
                i += 1;
            }

            // comments between fields belong to the block
            blocks.push(Block {
                key: key.to_string(),
                header: lines[start].text.to_string(),
                fields: lines[start + 1..end]
                    .iter()
                    .map(|l| l.text.to_string())
                    .collect(),
                lines: start..end,
            });
        }

        blocks
    }
}

fn split_keyword(line: &str) -> Option<(&str, &str)> {
    let line = line.trim_start();
    if line.starts_with('#') {
        return None;
    }
    let keyword = line.split_whitespace().next()?;
    Some((keyword, &line[keyword.len()..]))
}

fn split_lines(content: &str) -> Vec<Line<'_>> {
    content
        .split_inclusive('\n')
        .map(|raw| {
            if let Some(text) = raw.strip_suffix("\r\n") {
                Line { text, eol: "\r\n" }
            } else if let Some(text) = raw.strip_suffix('\n') {
                Line { text, eol: "\n" }
            } else {
                Line { text: raw, eol: "" }
            }
        })
        .collect()
}

fn join_lines(lines: &[Line]) -> String {
    lines.iter().fold(String::new(), |mut out, l| {
        out.push_str(l.text);
        out.push_str(l.eol);
        out
    })
}

/// CRLF only if most lines use it
fn dominant_eol(lines: &[Line]) -> &'static str {
    let crlf = lines.iter().filter(|l| l.eol == "\r\n").count();
    let lf = lines.iter().filter(|l| l.eol == "\n").count();

    if crlf > lf { "\r\n" } else { "\n" }
}

fn push_fields(out: &mut String, fields: &[String], eol: &str) {
    for field in fields {
        out.push_str(field);
        out.push_str(eol);
    }
}
