//! Recovery info — textual records embedded in object data.
//!
//! Every data object begins with a recovery header and every file's data
//! region ends with a fixed-length recovery trailer (FINFO).  Together they
//! allow object contents to be reassembled into files without the metadata
//! tier.
//!
//! # Wire layout (7-bit ASCII, safe inside erasure-coded binary streams)
//!
//! ```text
//! [header][ file1 data ][ file1 trailer ][ file2 data ][ file2 trailer ] ...
//!
//! header  = \nRECOV(HEADER||<maj>.<min>|<ctag>|<streamid>)\n
//! trailer = \nRECOV(FINFO||i<ino>|m0<octal-mode>|o<uid>|g<gid>|s<size>|
//!                   t<sec>.<nsec>|e<0|1>|p<pathlen>:<path>)\n
//! ```
//!
//! Version fields are zero-padded to [`VERSION_DIGITS`].  The size, sec, and
//! nsec fields are zero-padded to [`SIZE_DIGITS`] so that a trailer's length
//! depends only on values that are constant for the life of a file (inode,
//! mode, owner, group, path).  A shorter-than-budget instance is zero-padded
//! at the tail; the budget itself is frozen in the file's FTAG.
//!
//! # Locating trailers
//!
//! A trailer sits at the *end* of a file's data region, so parsing starts
//! from the final `)\n` and scans backwards for `FINFO||` and then
//! `\nRECOV(`.  A mismatch while matching the type token merely restarts the
//! comparison (file data may contain look-alike substrings); a mismatch in
//! the head or tail marker is a hard parse error.  Once the start is found,
//! fields are parsed left-to-right.
//!
//! [`RecoveryStream`] applies this over a whole object buffer, yielding the
//! files of the object in reverse order, and can be shifted to subsequent
//! objects of the same stream via [`RecoveryStream::continue_with`].

use std::ops::Range;
use thiserror::Error;
use tracing::debug;

/// Marker opening every recovery record.
pub const MSG_HEAD: &str = "\nRECOV(";
/// Marker closing every recovery record.
pub const MSG_TAIL: &str = ")\n";
/// Type token of the per-object header record.
pub const HEADER_TYPE: &str = "HEADER||";
/// Type token of the per-file trailer record.
pub const FINFO_TYPE: &str = "FINFO||";

pub const RECOVERY_CURRENT_MAJOR: u32 = 0;
pub const RECOVERY_CURRENT_MINOR: u32 = 1;

/// Zero-pad width of the version fields.
pub const VERSION_DIGITS: usize = 3;
/// Zero-pad width of the size / sec / nsec fields (digits of `u64::MAX`).
/// These are the only trailer fields that change while a file is written, so
/// padding them is what makes the trailer length stable.
pub const SIZE_DIGITS: usize = 20;

#[derive(Error, Debug)]
pub enum RecoveryError {
    #[error("malformed recovery header: {0}")]
    MalformedHeader(&'static str),
    #[error("malformed recovery finfo: {0}")]
    MalformedFinfo(&'static str),
    #[error("duplicate '{0}' value in recovery finfo")]
    DuplicateField(char),
    #[error("'{0}' value of recovery finfo exceeds type bounds")]
    ValueRange(char),
    #[error("recovery finfo is missing expected values")]
    MissingFields,
    #[error("recovery finfo string has trailing characters")]
    TrailingBytes,
    #[error("header info differs in new object buffer")]
    HeaderMismatch,
}

// ── Header ───────────────────────────────────────────────────────────────────

/// Per-object stream identity record.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RecoveryHeader {
    pub major:    u32,
    pub minor:    u32,
    pub ctag:     String,
    pub streamid: String,
}

impl RecoveryHeader {
    pub fn new(ctag: &str, streamid: &str) -> Self {
        Self {
            major:    RECOVERY_CURRENT_MAJOR,
            minor:    RECOVERY_CURRENT_MINOR,
            ctag:     ctag.to_owned(),
            streamid: streamid.to_owned(),
        }
    }

    /// Encode to the wire string.
    pub fn encode(&self) -> String {
        format!(
            "{MSG_HEAD}{HEADER_TYPE}{maj:0vd$}.{min:0vd$}|{ctag}|{sid}{MSG_TAIL}",
            maj = self.major,
            min = self.minor,
            ctag = self.ctag,
            sid = self.streamid,
            vd = VERSION_DIGITS,
        )
    }

    /// Length of the encoded header, for call sites that only need the budget.
    pub fn encoded_len(&self) -> usize {
        self.encode().len()
    }

    /// Parse a header from the front of `buf`.
    ///
    /// Returns the header and the index one past its closing tail marker
    /// (the first byte of file data).
    pub fn parse(buf: &[u8]) -> Result<(Self, usize), RecoveryError> {
        let mut pos = 0usize;
        expect(buf, &mut pos, MSG_HEAD.as_bytes())
            .ok_or(RecoveryError::MalformedHeader("missing msg head"))?;
        expect(buf, &mut pos, HEADER_TYPE.as_bytes())
            .ok_or(RecoveryError::MalformedHeader("missing HEADER type token"))?;
        let major = parse_u64_until(buf, &mut pos, b'.')
            .ok_or(RecoveryError::MalformedHeader("bad major version"))?;
        let minor = parse_u64_until(buf, &mut pos, b'|')
            .ok_or(RecoveryError::MalformedHeader("bad minor version"))?;
        if major > u32::MAX as u64 || minor > u32::MAX as u64 {
            return Err(RecoveryError::MalformedHeader("version exceeds type bounds"));
        }
        let ctag_start = pos;
        while pos < buf.len() && buf[pos] != b'|' && buf[pos] != 0 {
            pos += 1;
        }
        if pos >= buf.len() || buf[pos] != b'|' {
            return Err(RecoveryError::MalformedHeader("unterminated client tag"));
        }
        let ctag = ascii_str(&buf[ctag_start..pos])
            .ok_or(RecoveryError::MalformedHeader("non-ascii client tag"))?;
        pos += 1;
        // The streamid runs to the tail marker; scan for a full tail match
        // rather than the first ')' so ids may contain look-alike bytes.
        let sid_start = pos;
        let tail = MSG_TAIL.as_bytes();
        let sid_end = loop {
            if pos + tail.len() > buf.len() || buf[pos] == 0 {
                return Err(RecoveryError::MalformedHeader("missing tail marker"));
            }
            if &buf[pos..pos + tail.len()] == tail {
                break pos;
            }
            pos += 1;
        };
        let streamid = ascii_str(&buf[sid_start..sid_end])
            .ok_or(RecoveryError::MalformedHeader("non-ascii streamid"))?;
        Ok((
            Self { major: major as u32, minor: minor as u32, ctag, streamid },
            sid_end + tail.len(),
        ))
    }
}

// ── Finfo ────────────────────────────────────────────────────────────────────

/// Per-file trailer record.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RecoveryFinfo {
    pub inode:      u64,
    pub mode:       u32,
    pub owner:      u32,
    pub group:      u32,
    /// Logical file size at the time the trailer was written.
    pub size:       u64,
    pub mtime_sec:  u64,
    pub mtime_nsec: u64,
    /// Set on the final trailer of a file.
    pub eof:        bool,
    /// Recovery pathname of the file within its namespace.
    pub path:       String,
}

impl RecoveryFinfo {
    /// Encode to the wire string.
    ///
    /// The length of the output is independent of `size`, `mtime`, and
    /// `eof`: a file emits trailers of one constant length as long as its
    /// path does not change.
    pub fn encode(&self) -> String {
        format!(
            "{MSG_HEAD}{FINFO_TYPE}i{ino}|m0{mode:o}|o{uid}|g{gid}|s{size:0sd$}|t{sec:0sd$}.{nsec:0sd$}|e{eof}|p{plen}:{path}{MSG_TAIL}",
            ino = self.inode,
            mode = self.mode,
            uid = self.owner,
            gid = self.group,
            size = self.size,
            sec = self.mtime_sec,
            nsec = self.mtime_nsec,
            eof = self.eof as u8,
            plen = self.path.len(),
            path = self.path,
            sd = SIZE_DIGITS,
        )
    }

    pub fn encoded_len(&self) -> usize {
        self.encode().len()
    }

    /// Parse a complete, exactly-delimited trailer string.
    pub fn parse(buf: &[u8]) -> Result<Self, RecoveryError> {
        let (finfo, end) = parse_finfo_body(buf)?;
        if end != buf.len() {
            return Err(RecoveryError::TrailingBytes);
        }
        Ok(finfo)
    }
}

/// Parse a trailer from the front of `buf`, returning the record and the
/// index one past its tail marker.
fn parse_finfo_body(buf: &[u8]) -> Result<(RecoveryFinfo, usize), RecoveryError> {
    let mut pos = 0usize;
    expect(buf, &mut pos, MSG_HEAD.as_bytes())
        .ok_or(RecoveryError::MalformedFinfo("missing msg head"))?;
    expect(buf, &mut pos, FINFO_TYPE.as_bytes())
        .ok_or(RecoveryError::MalformedFinfo("missing FINFO type token"))?;

    let tail = MSG_TAIL.as_bytes();
    let mut inode = None;
    let mut mode = None;
    let mut owner = None;
    let mut group = None;
    let mut size = None;
    let mut mtime = None;
    let mut eof = None;
    let mut path: Option<String> = None;

    while pos + tail.len() <= buf.len()
        && &buf[pos..pos + tail.len()] != tail
        && buf[pos] != 0
    {
        let field = buf[pos];
        pos += 1;
        let radix = if field == b'm' { 8 } else { 10 };
        let value = parse_u64_radix(buf, &mut pos, radix)
            .ok_or(RecoveryError::MalformedFinfo("unparsable field value"))?;
        match field {
            b'i' => put_once(&mut inode, value, 'i')?,
            b'm' => {
                if value > u32::MAX as u64 {
                    return Err(RecoveryError::ValueRange('m'));
                }
                put_once(&mut mode, value as u32, 'm')?;
            }
            b'o' => {
                if value > u32::MAX as u64 {
                    return Err(RecoveryError::ValueRange('o'));
                }
                put_once(&mut owner, value as u32, 'o')?;
            }
            b'g' => {
                if value > u32::MAX as u64 {
                    return Err(RecoveryError::ValueRange('g'));
                }
                put_once(&mut group, value as u32, 'g')?;
            }
            b's' => put_once(&mut size, value, 's')?,
            b't' => {
                if pos >= buf.len() || buf[pos] != b'.' {
                    return Err(RecoveryError::MalformedFinfo("bad timestamp format"));
                }
                pos += 1;
                let nsec = parse_u64_radix(buf, &mut pos, 10)
                    .ok_or(RecoveryError::MalformedFinfo("bad nanosecond value"))?;
                put_once(&mut mtime, (value, nsec), 't')?;
            }
            b'e' => {
                if value > 1 {
                    return Err(RecoveryError::ValueRange('e'));
                }
                put_once(&mut eof, value == 1, 'e')?;
            }
            b'p' => {
                if pos >= buf.len() || buf[pos] != b':' {
                    return Err(RecoveryError::MalformedFinfo("bad path format"));
                }
                pos += 1;
                let plen = value as usize;
                if pos + plen + tail.len() > buf.len() {
                    return Err(RecoveryError::MalformedFinfo("path exceeds buffer"));
                }
                let p = ascii_str(&buf[pos..pos + plen])
                    .ok_or(RecoveryError::MalformedFinfo("non-ascii path"))?;
                put_once(&mut path, p, 'p')?;
                pos += plen;
            }
            _ => return Err(RecoveryError::MalformedFinfo("unrecognized field tag")),
        }
        // skip an inter-field separator, if present
        if pos < buf.len() && buf[pos] == b'|' {
            pos += 1;
        }
    }
    if pos + tail.len() > buf.len() || &buf[pos..pos + tail.len()] != tail {
        return Err(RecoveryError::MalformedFinfo("missing tail marker"));
    }
    pos += tail.len();

    let (mtime_sec, mtime_nsec) = mtime.ok_or(RecoveryError::MissingFields)?;
    Ok((
        RecoveryFinfo {
            inode: inode.ok_or(RecoveryError::MissingFields)?,
            mode: mode.ok_or(RecoveryError::MissingFields)?,
            owner: owner.ok_or(RecoveryError::MissingFields)?,
            group: group.ok_or(RecoveryError::MissingFields)?,
            size: size.ok_or(RecoveryError::MissingFields)?,
            mtime_sec,
            mtime_nsec,
            eof: eof.ok_or(RecoveryError::MissingFields)?,
            path: path.ok_or(RecoveryError::MissingFields)?,
        },
        pos,
    ))
}

/// Locate the start of the trailer whose tail marker ends at `buf.len()`.
///
/// Scans in reverse: tail marker, then the FINFO type token, then the msg
/// head.  A mismatch inside the type token restarts that comparison (file
/// data may contain similar substrings); a broken head or tail marker is a
/// hard error.
pub fn locate_finfo_start(buf: &[u8]) -> Result<usize, RecoveryError> {
    // sections: 0 = verifying msg tail, 1 = seeking type token, 2 = verifying msg head
    let mut section = 0u8;
    let mut cmpstr: &[u8] = MSG_TAIL.as_bytes();
    let mut cmpidx = cmpstr.len();
    let mut pos = buf.len();
    while pos > 0 {
        pos -= 1;
        if buf[pos] == cmpstr[cmpidx - 1] {
            cmpidx -= 1;
            if cmpidx == 0 {
                if section == 2 {
                    return Ok(pos);
                }
                cmpstr = match section {
                    0 => FINFO_TYPE.as_bytes(),
                    _ => MSG_HEAD.as_bytes(),
                };
                section += 1;
                cmpidx = cmpstr.len();
            }
        } else if section != 1 {
            // broken msg head/tail is fatal
            return Err(RecoveryError::MalformedFinfo("broken head/tail marker"));
        } else {
            // expected; the msg body may contain similar substrings
            cmpidx = cmpstr.len();
            // re-test this byte against a fresh comparison
            if buf[pos] == cmpstr[cmpidx - 1] {
                cmpidx -= 1;
            }
        }
    }
    Err(RecoveryError::MalformedFinfo("no trailer start within buffer"))
}

// ── Recovery stream ──────────────────────────────────────────────────────────

/// One file recovered from an object buffer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RecoveredFile {
    pub finfo: RecoveryFinfo,
    /// Byte range of this file's data within the object buffer.
    /// May hold only the tail of a file continued from earlier objects.
    pub data:  Range<usize>,
}

/// Iterates the files embedded in one or more objects of a single stream.
///
/// Files are yielded in reverse order within each object (trailers are
/// located tail-first).  [`continue_with`](Self::continue_with) shifts to
/// the next object and fails if its header identifies a different stream.
pub struct RecoveryStream {
    header: RecoveryHeader,
    files:  Vec<RecoveredFile>,
}

impl RecoveryStream {
    /// Parse the header and per-file records of a whole object buffer.
    pub fn new(objbuf: &[u8]) -> Result<Self, RecoveryError> {
        let (header, body_start) = RecoveryHeader::parse(objbuf)?;
        let files = populate(objbuf, body_start)?;
        debug!(files = files.len(), ctag = %header.ctag, "recovery stream initialized");
        Ok(Self { header, files })
    }

    pub fn header(&self) -> &RecoveryHeader {
        &self.header
    }

    /// Shift to the content of a new object of the same stream.
    ///
    /// Any files not yet consumed from the previous object are discarded.
    pub fn continue_with(&mut self, objbuf: &[u8]) -> Result<(), RecoveryError> {
        let (header, body_start) = RecoveryHeader::parse(objbuf)?;
        if header != self.header {
            return Err(RecoveryError::HeaderMismatch);
        }
        self.files = populate(objbuf, body_start)?;
        Ok(())
    }

    /// Produce the next file of the current object, or `None` when the
    /// object is exhausted.
    pub fn next_file(&mut self) -> Option<RecoveredFile> {
        self.files.pop()
    }
}

/// Walk the object body in reverse, splitting it into (data, trailer) pairs.
/// Records are collected front-to-back so that `pop` yields them tail-first.
fn populate(objbuf: &[u8], body_start: usize) -> Result<Vec<RecoveredFile>, RecoveryError> {
    let mut files = Vec::new();
    let mut end = objbuf.len();
    while end > body_start {
        let start = body_start + locate_finfo_start(&objbuf[body_start..end])?;
        let (finfo, consumed) = parse_finfo_body(&objbuf[start..end])?;
        if start + consumed != end {
            return Err(RecoveryError::TrailingBytes);
        }
        // a file may continue from prior objects; only the in-object tail is here
        let avail = (start - body_start) as u64;
        let data_len = finfo.size.min(avail) as usize;
        files.push(RecoveredFile { finfo, data: (start - data_len)..start });
        end = start - data_len;
    }
    files.reverse();
    Ok(files)
}

// ── Parse helpers ────────────────────────────────────────────────────────────

fn expect(buf: &[u8], pos: &mut usize, token: &[u8]) -> Option<()> {
    if buf.len() < *pos + token.len() || &buf[*pos..*pos + token.len()] != token {
        return None;
    }
    *pos += token.len();
    Some(())
}

fn parse_u64_radix(buf: &[u8], pos: &mut usize, radix: u64) -> Option<u64> {
    let start = *pos;
    let mut value: u64 = 0;
    while *pos < buf.len() {
        let d = match buf[*pos] {
            c @ b'0'..=b'9' => (c - b'0') as u64,
            _ => break,
        };
        if d >= radix {
            break;
        }
        value = value.checked_mul(radix)?.checked_add(d)?;
        *pos += 1;
    }
    if *pos == start {
        return None;
    }
    Some(value)
}

fn parse_u64_until(buf: &[u8], pos: &mut usize, sep: u8) -> Option<u64> {
    let value = parse_u64_radix(buf, pos, 10)?;
    if *pos >= buf.len() || buf[*pos] != sep {
        return None;
    }
    *pos += 1;
    Some(value)
}

fn ascii_str(buf: &[u8]) -> Option<String> {
    if !buf.is_ascii() {
        return None;
    }
    Some(String::from_utf8_lossy(buf).into_owned())
}

fn put_once<T>(slot: &mut Option<T>, value: T, tag: char) -> Result<(), RecoveryError> {
    if slot.is_some() {
        return Err(RecoveryError::DuplicateField(tag));
    }
    *slot = Some(value);
    Ok(())
}

// ── Tests ────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn sample_finfo() -> RecoveryFinfo {
        RecoveryFinfo {
            inode:      7341,
            mode:       0o100644,
            owner:      1001,
            group:      100,
            size:       4096,
            mtime_sec:  1690000000,
            mtime_nsec: 123456789,
            eof:        false,
            path:       "ns/subdir/file1".to_owned(),
        }
    }

    #[test]
    fn header_round_trip() {
        let hdr = RecoveryHeader::new("testclient", "repo#ns#1690000000.999");
        let enc = hdr.encode();
        let (parsed, tailpos) = RecoveryHeader::parse(enc.as_bytes()).unwrap();
        assert_eq!(parsed, hdr);
        assert_eq!(tailpos, enc.len());
    }

    #[test]
    fn header_rejects_garbage() {
        assert!(RecoveryHeader::parse(b"\nRECOV(FINFO||i3)\n").is_err());
        assert!(RecoveryHeader::parse(b"not a header at all").is_err());
        // truncated before the tail marker
        let hdr = RecoveryHeader::new("c", "s").encode();
        assert!(RecoveryHeader::parse(&hdr.as_bytes()[..hdr.len() - 2]).is_err());
    }

    #[test]
    fn finfo_round_trip() {
        let finfo = sample_finfo();
        let enc = finfo.encode();
        assert_eq!(RecoveryFinfo::parse(enc.as_bytes()).unwrap(), finfo);
    }

    #[test]
    fn finfo_length_stable_across_size_and_eof() {
        let mut finfo = sample_finfo();
        let baseline = finfo.encoded_len();
        finfo.size = 0;
        finfo.eof = true;
        finfo.mtime_sec = 1;
        finfo.mtime_nsec = 0;
        assert_eq!(finfo.encoded_len(), baseline);
        finfo.size = u64::MAX;
        assert_eq!(finfo.encoded_len(), baseline);
    }

    #[test]
    fn finfo_rejects_trailing_bytes() {
        let mut enc = sample_finfo().encode();
        enc.push('x');
        assert!(matches!(
            RecoveryFinfo::parse(enc.as_bytes()),
            Err(RecoveryError::TrailingBytes)
        ));
    }

    #[test]
    fn locate_start_skips_lookalike_body() {
        // data containing ")\n" and "FINFO" fragments ahead of the real trailer
        let mut buf = b"data )\n FINFO|| more data".to_vec();
        let finfo = sample_finfo();
        let enc = finfo.encode();
        let trailer_at = buf.len();
        buf.extend_from_slice(enc.as_bytes());
        assert_eq!(locate_finfo_start(&buf).unwrap(), trailer_at);
    }

    #[test]
    fn stream_iterates_files_in_reverse() {
        let hdr = RecoveryHeader::new("client", "repo#ns#55.66");
        let mut obj = hdr.encode().into_bytes();

        let mut f1 = sample_finfo();
        f1.path = "ns/file1".to_owned();
        f1.size = 5;
        f1.eof = true;
        obj.extend_from_slice(b"11111");
        obj.extend_from_slice(f1.encode().as_bytes());

        let mut f2 = sample_finfo();
        f2.path = "ns/file2".to_owned();
        f2.size = 3;
        f2.eof = true;
        obj.extend_from_slice(b"222");
        obj.extend_from_slice(f2.encode().as_bytes());

        let mut stream = RecoveryStream::new(&obj).unwrap();
        assert_eq!(stream.header().ctag, "client");

        let last = stream.next_file().unwrap();
        assert_eq!(last.finfo.path, "ns/file2");
        assert_eq!(&obj[last.data.clone()], b"222");
        let first = stream.next_file().unwrap();
        assert_eq!(first.finfo.path, "ns/file1");
        assert_eq!(&obj[first.data.clone()], b"11111");
        assert!(stream.next_file().is_none());
    }

    #[test]
    fn stream_continue_requires_matching_header() {
        let hdr = RecoveryHeader::new("client", "repo#ns#55.66");
        let mut obj = hdr.encode().into_bytes();
        let mut finfo = sample_finfo();
        finfo.size = 2;
        obj.extend_from_slice(b"ab");
        obj.extend_from_slice(finfo.encode().as_bytes());

        let mut stream = RecoveryStream::new(&obj).unwrap();
        let other = RecoveryHeader::new("otherclient", "repo#ns#55.66");
        let mut obj2 = other.encode().into_bytes();
        obj2.extend_from_slice(b"ab");
        obj2.extend_from_slice(finfo.encode().as_bytes());
        assert!(matches!(
            stream.continue_with(&obj2),
            Err(RecoveryError::HeaderMismatch)
        ));
    }

    #[test]
    fn stream_handles_continued_file_tail() {
        // trailer preceded by less data than finfo.size: the in-object range
        // must clamp to what the object actually holds
        let hdr = RecoveryHeader::new("client", "repo#ns#1.2");
        let mut obj = hdr.encode().into_bytes();
        let mut finfo = sample_finfo();
        finfo.size = 1000;
        finfo.eof = true;
        obj.extend_from_slice(b"tail-bytes");
        obj.extend_from_slice(finfo.encode().as_bytes());

        let mut stream = RecoveryStream::new(&obj).unwrap();
        let f = stream.next_file().unwrap();
        assert_eq!(&obj[f.data.clone()], b"tail-bytes");
        assert!(stream.next_file().is_none());
    }

    proptest! {
        #[test]
        fn prop_finfo_round_trip(
            inode in any::<u64>(),
            mode in 0u32..0o200000,
            owner in any::<u32>(),
            group in any::<u32>(),
            size in any::<u64>(),
            sec in any::<u64>(),
            nsec in 0u64..1_000_000_000,
            eof in any::<bool>(),
            path in "[a-zA-Z0-9_/.-]{1,64}",
        ) {
            let finfo = RecoveryFinfo {
                inode, mode, owner, group, size,
                mtime_sec: sec, mtime_nsec: nsec, eof, path,
            };
            let enc = finfo.encode();
            prop_assert_eq!(RecoveryFinfo::parse(enc.as_bytes()).unwrap(), finfo);
        }

        #[test]
        fn prop_trailer_length_constant_per_path(
            path in "[a-zA-Z0-9_/.-]{1,64}",
            sizes in proptest::collection::vec(any::<u64>(), 1..8),
        ) {
            let mut finfo = sample_finfo();
            finfo.path = path;
            let baseline = finfo.encoded_len();
            for s in sizes {
                finfo.size = s;
                finfo.eof = !finfo.eof;
                prop_assert_eq!(finfo.encoded_len(), baseline);
            }
        }
    }
}
