//! Header block transcoding.
//!
//! Turns the legacy CRLF-delimited HTTP/1.x header block produced by the
//! request engine into the ordered pseudo-header list the protocol engine's
//! request API expects: `:method`, `:path` and `:scheme` synthesized from the
//! request line, a `Host` header renamed to `:authority` and rotated in front
//! of the regular fields, and everything else carried through in its
//! original order.

use tracing::{debug, warn};

use crate::error::HeaderTranscodeError;

/// Index where the `:authority` field must appear in the finished list.
pub const AUTHORITY_INDEX: usize = 3;

/// Soft threshold on the cumulative name+value length of all fields. Streams
/// carrying more than this may be rejected by the peer, so the transcoder
/// warns but still proceeds.
pub const MAX_HEADER_ACC: usize = 60_000;

/// One pseudo-header entry. Both spans borrow the caller's header block (or
/// static pseudo-header names); nothing is copied.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PseudoHeader<'a> {
    pub name: &'a [u8],
    pub value: &'a [u8],
}

/// Ordered pseudo-header list, frozen once transcoding completes.
///
/// Entries 0-2 are always `:method`, `:path`, `:scheme` in that order; if an
/// `:authority` entry exists it occupies [`AUTHORITY_INDEX`]; all other
/// fields keep their original relative order.
#[derive(Debug)]
pub struct PseudoHeaderList<'a> {
    entries: Vec<PseudoHeader<'a>>,
}

impl<'a> PseudoHeaderList<'a> {
    pub fn entries(&self) -> &[PseudoHeader<'a>] {
        &self.entries
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// The `:method` value from the request line.
    pub fn method(&self) -> &'a [u8] {
        self.entries[0].value
    }

    /// Case-insensitive lookup of a non-pseudo field value.
    pub fn field(&self, name: &[u8]) -> Option<&'a [u8]> {
        self.entries
            .iter()
            .find(|h| h.name.eq_ignore_ascii_case(name))
            .map(|h| h.value)
    }
}

/// Count non-overlapping CRLF sequences in `block`.
fn count_crlf(block: &[u8]) -> usize {
    let mut lines = 0;
    let mut i = 1;
    while i < block.len() {
        if block[i] == b'\n' && block[i - 1] == b'\r' {
            lines += 1;
            i += 1;
        }
        i += 1;
    }
    lines
}

/// Position of the first `needle` at or after `from`, bounded by `to`.
fn find_byte(block: &[u8], from: usize, to: usize, needle: u8) -> Option<usize> {
    block
        .get(from..to)
        .and_then(|window| window.iter().position(|&b| b == needle))
        .map(|pos| from + pos)
}

/// Position of the last space in `span`, if any.
fn last_space_before(span: &[u8]) -> Option<usize> {
    span.iter().rposition(|&b| b == b' ')
}

/// Transcode a CRLF-delimited header block into a pseudo-header list.
///
/// `secure` selects the `:scheme` value: `https` when the underlying
/// transport is encrypted, `http` otherwise. Any malformation fails the
/// whole transcode; nothing is handed to the engine on failure.
pub fn transcode(
    block: &[u8],
    secure: bool,
) -> std::result::Result<PseudoHeaderList<'_>, HeaderTranscodeError> {
    let lines = count_crlf(block);
    if lines < 2 {
        return Err(HeaderTranscodeError::TooFewLines);
    }

    // One slot per counted line plus one extra: the request line expands
    // into the :method/:path/:scheme triad.
    let total = lines + 1;
    let mut entries: Vec<PseudoHeader<'_>> = Vec::with_capacity(total);

    let mut line_end = find_byte(block, 0, block.len(), b'\r')
        .ok_or(HeaderTranscodeError::MissingRequestLine)?;

    // The method never contains spaces; split on the first one.
    let sp = find_byte(block, 0, line_end, b' ')
        .ok_or(HeaderTranscodeError::MalformedRequestLine("no space after method"))?;
    if sp == 0 {
        return Err(HeaderTranscodeError::MalformedRequestLine("empty method"));
    }
    let method = &block[..sp];

    // The path may contain spaces, so scan backward from the line end and
    // discard the trailing protocol-version token.
    let rest = sp + 1;
    let rel = last_space_before(&block[rest..line_end])
        .ok_or(HeaderTranscodeError::MalformedRequestLine("no protocol version"))?;
    if rel == 0 {
        return Err(HeaderTranscodeError::MalformedRequestLine("empty path"));
    }
    let path = &block[rest..rest + rel];

    entries.push(PseudoHeader {
        name: b":method",
        value: method,
    });
    entries.push(PseudoHeader {
        name: b":path",
        value: path,
    });
    entries.push(PseudoHeader {
        name: b":scheme",
        value: if secure { b"https" } else { b"http" },
    });

    let mut authority_idx = 0;
    let mut i = AUTHORITY_INDEX;
    while i < total {
        let cursor = line_end + 2;
        if cursor >= block.len() {
            return Err(HeaderTranscodeError::TruncatedLine);
        }
        line_end = find_byte(block, cursor, block.len(), b'\r')
            .ok_or(HeaderTranscodeError::TruncatedLine)?;
        if line_end == cursor {
            return Err(HeaderTranscodeError::TruncatedLine);
        }

        if block[cursor] == b' ' || block[cursor] == b'\t' {
            return Err(HeaderTranscodeError::ContinuationLine);
        }

        let colon = find_byte(block, cursor, line_end, b':')
            .ok_or(HeaderTranscodeError::MissingColon)?;
        if colon == cursor {
            return Err(HeaderTranscodeError::EmptyFieldName);
        }

        let name: &[u8] = if block[cursor..colon].eq_ignore_ascii_case(b"host") {
            authority_idx = i;
            b":authority"
        } else {
            &block[cursor..colon]
        };

        let mut vstart = colon + 1;
        while vstart < line_end && (block[vstart] == b' ' || block[vstart] == b'\t') {
            vstart += 1;
        }

        entries.push(PseudoHeader {
            name,
            value: &block[vstart..line_end],
        });
        i += 1;
    }

    // :authority must come before the regular fields. Rotate it into place
    // so every other field keeps its relative order.
    if authority_idx != 0 && authority_idx != AUTHORITY_INDEX {
        let authority = entries.remove(authority_idx);
        entries.insert(AUTHORITY_INDEX, authority);
    }

    let mut acc = 0;
    for entry in &entries {
        acc += entry.name.len() + entry.value.len();
        debug!(
            "h3 [{}: {}]",
            String::from_utf8_lossy(entry.name),
            String::from_utf8_lossy(entry.value)
        );
    }
    if acc > MAX_HEADER_ACC {
        warn!(
            "cumulative length of all headers exceeds {} bytes and the stream may be rejected",
            MAX_HEADER_ACC
        );
    }

    Ok(PseudoHeaderList { entries })
}
