//! gitignore pattern compiler and hierarchical matcher
//!
//! a node holds the compiled rules of one ignore file; the manager
//! layers per-directory nodes over the root node and optional global
//! patterns, deepest node deciding first.

use std::collections::BTreeMap;

/// what one node says about a path
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum IgnoreState {
    Ignored,
    /// explicitly re-included by a negation
    NotIgnored,
    /// no rule here, defer outward
    CheckParent,
}

/// one path segment of a compiled pattern
#[derive(Clone, Debug, PartialEq, Eq)]
enum Segment {
    /// `**`: spans path segments
    AnyDirs,
    /// glob over a single segment
    Glob(Vec<GlobToken>),
}

#[derive(Clone, Debug, PartialEq, Eq)]
enum GlobToken {
    Literal(char),
    /// `?`: one non-slash char
    AnyChar,
    /// `*`: any run of non-slash chars
    AnyRun,
    /// `[...]` character class with ranges
    Class { negated: bool, ranges: Vec<(char, char)> },
}

/// a single compiled ignore rule
#[derive(Clone, Debug)]
pub struct Pattern {
    segments: Vec<Segment>,
    negated: bool,
    /// matches directories only (trailing slash)
    dir_only: bool,
    /// anchored to the directory of the ignore file
    anchored: bool,
}

impl Pattern {
    /// compile one ignore-file line; None for blanks and comments
    pub fn parse(line: &str) -> Option<Pattern> {
        let line = trim_trailing_spaces(line);
        if line.is_empty() || line.starts_with('#') {
            return None;
        }

        let (negated, line) = match line.strip_prefix('!') {
            Some(rest) => (true, rest),
            None => (false, line),
        };
        let (dir_only, line) = match line.strip_suffix('/') {
            Some(rest) => (true, rest),
            None => (false, line),
        };
        if line.is_empty() {
            return None;
        }

        // a leading slash or any remaining slash anchors the pattern
        let anchored = line.starts_with('/') || line.contains('/');
        let line = line.strip_prefix('/').unwrap_or(line);

        let mut segments = Vec::new();
        for raw in line.split('/') {
            if raw == "**" {
                // collapse runs of ** to one
                if segments.last() != Some(&Segment::AnyDirs) {
                    segments.push(Segment::AnyDirs);
                }
            } else {
                segments.push(Segment::Glob(compile_glob(raw)));
            }
        }
        if segments.is_empty() {
            return None;
        }

        Some(Pattern {
            segments,
            negated,
            dir_only,
            anchored,
        })
    }

    /// does this rule match a path relative to the node directory
    fn matches(&self, path: &str, is_dir: bool) -> bool {
        if self.dir_only && !is_dir {
            return false;
        }
        let parts: Vec<&str> = path.split('/').collect();

        if self.anchored {
            match_segments(&self.segments, &parts)
        } else {
            // unanchored patterns match the basename at any depth
            let name = parts.last().copied().unwrap_or("");
            match_segments(&self.segments, &[name])
        }
    }
}

/// drop unescaped trailing spaces
fn trim_trailing_spaces(line: &str) -> &str {
    let mut end = line.len();
    let bytes = line.as_bytes();
    while end > 0 && bytes[end - 1] == b' ' {
        // a backslash-escaped space stays
        if end >= 2 && bytes[end - 2] == b'\\' {
            break;
        }
        end -= 1;
    }
    &line[..end]
}

fn compile_glob(raw: &str) -> Vec<GlobToken> {
    let mut tokens = Vec::new();
    let mut chars = raw.chars().peekable();

    while let Some(c) = chars.next() {
        match c {
            '\\' => {
                if let Some(escaped) = chars.next() {
                    tokens.push(GlobToken::Literal(escaped));
                }
            }
            '?' => tokens.push(GlobToken::AnyChar),
            '*' => {
                // `**` inside one segment behaves like `*`
                if tokens.last() != Some(&GlobToken::AnyRun) {
                    tokens.push(GlobToken::AnyRun);
                }
            }
            '[' => {
                let negated = matches!(chars.peek(), Some('!') | Some('^'));
                if negated {
                    chars.next();
                }
                let mut ranges = Vec::new();
                let mut closed = false;
                let mut pending: Vec<char> = Vec::new();
                for c in chars.by_ref() {
                    if c == ']' && !(ranges.is_empty() && pending.is_empty()) {
                        closed = true;
                        break;
                    }
                    if c == ']' {
                        // literal ] as the first class char
                        pending.push(c);
                        continue;
                    }
                    pending.push(c);
                    // fold "a-z" triplets into ranges as they complete
                    if pending.len() >= 3 && pending[pending.len() - 2] == '-' {
                        let hi = pending.pop().unwrap();
                        pending.pop();
                        let lo = pending.pop().unwrap();
                        ranges.push((lo, hi));
                    }
                }
                for c in pending {
                    ranges.push((c, c));
                }
                if closed {
                    tokens.push(GlobToken::Class { negated, ranges });
                } else {
                    // unterminated class is a literal bracket
                    tokens.push(GlobToken::Literal('['));
                    for (lo, _) in ranges {
                        tokens.push(GlobToken::Literal(lo));
                    }
                }
            }
            other => tokens.push(GlobToken::Literal(other)),
        }
    }
    tokens
}

fn match_segments(segments: &[Segment], parts: &[&str]) -> bool {
    match segments.split_first() {
        None => parts.is_empty(),
        Some((Segment::AnyDirs, rest)) => {
            if rest.is_empty() {
                // trailing `/**` matches everything inside
                return !parts.is_empty();
            }
            (0..=parts.len()).any(|skip| match_segments(rest, &parts[skip..]))
        }
        Some((Segment::Glob(tokens), rest)) => match parts.split_first() {
            None => false,
            Some((first, tail)) => {
                glob_match(tokens, &first.chars().collect::<Vec<char>>())
                    && match_segments(rest, tail)
            }
        },
    }
}

fn glob_match(tokens: &[GlobToken], text: &[char]) -> bool {
    match tokens.split_first() {
        None => text.is_empty(),
        Some((GlobToken::AnyRun, rest)) => {
            (0..=text.len()).any(|skip| glob_match(rest, &text[skip..]))
        }
        Some((token, rest)) => match text.split_first() {
            None => false,
            Some((c, tail)) => {
                let hit = match token {
                    GlobToken::Literal(l) => l == c,
                    GlobToken::AnyChar => true,
                    GlobToken::Class { negated, ranges } => {
                        let inside = ranges.iter().any(|(lo, hi)| (*lo..=*hi).contains(c));
                        inside != *negated
                    }
                    GlobToken::AnyRun => unreachable!("handled above"),
                };
                hit && glob_match(rest, tail)
            }
        },
    }
}

/// the compiled rules of one ignore file
#[derive(Clone, Debug, Default)]
pub struct IgnoreNode {
    patterns: Vec<Pattern>,
}

impl IgnoreNode {
    /// compile the content of one ignore file
    pub fn parse(content: &str) -> Self {
        Self {
            patterns: content.lines().filter_map(Pattern::parse).collect(),
        }
    }

    pub fn from_rules<S: AsRef<str>>(rules: &[S]) -> Self {
        Self {
            patterns: rules.iter().filter_map(|r| Pattern::parse(r.as_ref())).collect(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.patterns.is_empty()
    }

    /// what this node says about a path relative to its directory;
    /// later rules override earlier ones
    pub fn match_path(&self, path: &str, is_dir: bool) -> IgnoreState {
        let mut state = IgnoreState::CheckParent;
        for pattern in &self.patterns {
            if pattern.matches(path, is_dir) {
                state = if pattern.negated {
                    IgnoreState::NotIgnored
                } else {
                    IgnoreState::Ignored
                };
            }
        }
        state
    }
}

/// hierarchical composition: optional global patterns, the root
/// ignore file, and per-subdirectory ignore files; the deepest
/// deciding node wins
#[derive(Default)]
pub struct IgnoreManager {
    global: Option<IgnoreNode>,
    /// node directory ("" for root) -> compiled rules
    nodes: BTreeMap<String, IgnoreNode>,
}

impl IgnoreManager {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_global(&mut self, node: IgnoreNode) {
        self.global = Some(node);
    }

    /// install the node of one directory ("" is the worktree root)
    pub fn add_node(&mut self, dir: impl Into<String>, node: IgnoreNode) {
        self.nodes.insert(dir.into(), node);
    }

    /// nearest decision for exactly this path
    fn decide(&self, path: &str, is_dir: bool) -> IgnoreState {
        // walk node directories from the deepest containing one
        let mut dir = parent_of(path);
        loop {
            if let Some(node) = self.nodes.get(dir) {
                let rel = if dir.is_empty() {
                    path
                } else {
                    &path[dir.len() + 1..]
                };
                match node.match_path(rel, is_dir) {
                    IgnoreState::CheckParent => {}
                    decided => return decided,
                }
            }
            if dir.is_empty() {
                break;
            }
            dir = parent_of(dir);
        }

        match &self.global {
            Some(node) => node.match_path(path, is_dir),
            None => IgnoreState::CheckParent,
        }
    }

    /// is the path ignored, taking ignored ancestor directories into
    /// account (a file inside an ignored directory cannot be
    /// re-included)
    pub fn is_ignored(&self, path: &str, is_dir: bool) -> bool {
        let mut ancestor = parent_of(path);
        while !ancestor.is_empty() {
            if self.decide(ancestor, true) == IgnoreState::Ignored {
                return true;
            }
            ancestor = parent_of(ancestor);
        }
        self.decide(path, is_dir) == IgnoreState::Ignored
    }
}

fn parent_of(path: &str) -> &str {
    match path.rfind('/') {
        Some(i) => &path[..i],
        None => "",
    }
}
