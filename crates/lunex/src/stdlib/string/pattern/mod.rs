// Lua pattern engine (not regex): classes, sets, repetitions, captures,
// balanced match %b, frontier %f, back-references.

mod matcher;

pub use matcher::{MatchState, MAX_CAPTURES};

/// One captured value: a byte range or a position capture.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CaptureValue {
    Bytes(Vec<u8>),
    /// 1-based position, from an empty `()` capture
    Position(usize),
}

#[derive(Debug, Clone)]
pub struct MatchResult {
    /// 0-based inclusive start
    pub start: usize,
    /// 0-based exclusive end
    pub end: usize,
    pub captures: Vec<CaptureValue>,
}

impl MatchResult {
    /// The captures, or the whole match when the pattern had none.
    pub fn captures_or_whole(&self, src: &[u8]) -> Vec<CaptureValue> {
        if self.captures.is_empty() {
            vec![CaptureValue::Bytes(src[self.start..self.end].to_vec())]
        } else {
            self.captures.clone()
        }
    }
}

/// Search `src` for `pattern` starting at byte offset `init` (0-based).
/// Anchored patterns only try at `init`.
pub fn find_match(src: &[u8], pattern: &[u8], init: usize) -> Result<Option<MatchResult>, String> {
    if init > src.len() {
        return Ok(None);
    }
    let (anchored, pat_start) = if pattern.first() == Some(&b'^') {
        (true, 1)
    } else {
        (false, 0)
    };
    let mut start = init;
    loop {
        let mut state = MatchState::new(src, pattern);
        match state.do_match(start, pat_start)? {
            Some(end) => {
                let captures = state.capture_values()?;
                return Ok(Some(MatchResult {
                    start,
                    end,
                    captures,
                }));
            }
            None => {
                if anchored || start >= src.len() {
                    return Ok(None);
                }
                start += 1;
            }
        }
    }
}

/// Try the pattern at exactly `pos` (gsub's scan primitive). A leading
/// `^` is skipped; the caller decides whether it anchors the scan.
pub fn match_at(src: &[u8], pattern: &[u8], pos: usize) -> Result<Option<MatchResult>, String> {
    if pos > src.len() {
        return Ok(None);
    }
    let pat_start = if pattern.first() == Some(&b'^') { 1 } else { 0 };
    let mut state = MatchState::new(src, pattern);
    match state.do_match(pos, pat_start)? {
        Some(end) => {
            let captures = state.capture_values()?;
            Ok(Some(MatchResult {
                start: pos,
                end,
                captures,
            }))
        }
        None => Ok(None),
    }
}

/// Plain-text search (string.find with `plain = true`).
pub fn find_plain(src: &[u8], needle: &[u8], init: usize) -> Option<(usize, usize)> {
    if init > src.len() {
        return None;
    }
    if needle.is_empty() {
        return Some((init, init));
    }
    src[init..]
        .windows(needle.len())
        .position(|w| w == needle)
        .map(|pos| (init + pos, init + pos + needle.len()))
}
