//! FTAG — the per-file extended attribute describing a file's placement
//! within a stream.
//!
//! The FTAG is the only cross-plane source of truth about a file's layout:
//! from it alone a client can derive the file's reference pathname, the
//! names of every data object holding its content, and the marker names
//! used by the repair and repack protocols.
//!
//! # Wire format (single line, 7-bit ASCII)
//!
//! ```text
//! FTAG(<maj>.<min>|<ctag>|<streamid>|refs<breadth>.<depth>.<digits>
//!      |objs<objfiles>.<objsize>|pos<fileno>.<objno>.<offset>
//!      |prot<N>.<E>.<O>.<partsz>|data<bytes>.<availbytes>.<recoverybytes>
//!      |st<I|S|F|C>[w][r][e])
//! ```
//!
//! Version fields are zero-padded to three digits.  The parser refuses any
//! major version newer than [`FTAG_CURRENT_MAJOR`]; a newer-minor tag parses
//! (minor revisions only append fields).
//!
//! Separator characters (`|`, `(`, `)`) are reserved and rejected in the
//! client tag and streamid at encode time — reference and object names
//! derived from them use `|` as their own field separator.

use thiserror::Error;

pub const FTAG_CURRENT_MAJOR: u32 = 0;
pub const FTAG_CURRENT_MINOR: u32 = 1;

const FTAG_PREFIX: &str = "FTAG(";
const FTAG_SUFFIX: &str = ")";
const VERSION_DIGITS: usize = 3;

/// Suffix of rebuild marker reference names: `<metaname>|<objno>rebuild`.
pub const REBUILD_SUFFIX: &str = "rebuild";
/// Suffix of repack marker reference names: `<metaname>|repack`.
pub const REPACK_SUFFIX: &str = "|repack";

#[derive(Error, Debug)]
pub enum TagError {
    #[error("ftag major version {0} is newer than this codec")]
    UnsupportedVersion(u32),
    #[error("malformed ftag: {0}")]
    Malformed(&'static str),
    #[error("reserved character '{0}' in tag component")]
    ReservedCharacter(char),
}

/// Erasure protection descriptor: N data parts, E erasure parts, rotation
/// offset O, and the part size at which the stripe advances.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Protection {
    pub n:      u32,
    pub e:      u32,
    pub o:      u32,
    pub partsz: u64,
}

impl Protection {
    pub fn stripe_width(&self) -> u32 {
        self.n + self.e
    }
}

/// Progression of a file's data through its lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum DataState {
    /// Created, no object opened yet.
    Init,
    /// At least one object has been opened for this file's data.
    Sized,
    /// The next file was started, or the stream was finalized.
    Fin,
    /// Metadata size matches availbytes; file is complete.
    Comp,
}

impl DataState {
    fn tag(self) -> char {
        match self {
            DataState::Init => 'I',
            DataState::Sized => 'S',
            DataState::Fin => 'F',
            DataState::Comp => 'C',
        }
    }

    fn from_tag(c: u8) -> Option<Self> {
        match c {
            b'I' => Some(DataState::Init),
            b'S' => Some(DataState::Sized),
            b'F' => Some(DataState::Fin),
            b'C' => Some(DataState::Comp),
            _ => None,
        }
    }
}

/// The per-file tag.  See the module docs for the wire format.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Ftag {
    pub major:         u32,
    pub minor:         u32,
    // identity
    pub ctag:          String,
    pub streamid:      String,
    pub fileno:        u64,
    // stream-wide packing parameters
    pub objfiles:      u64,
    pub objsize:       u64,
    // reference tree dimensions, carried so old tags resolve after a
    // namespace reconfiguration
    pub refbreadth:    u32,
    pub refdepth:      u32,
    pub refdigits:     u32,
    // location
    pub objno:         u64,
    pub offset:        u64,
    pub protection:    Protection,
    // sizing
    pub bytes:         u64,
    pub availbytes:    u64,
    pub recoverybytes: u64,
    // state
    pub state:         DataState,
    pub writeable:     bool,
    pub readable:      bool,
    pub endofstream:   bool,
}

impl Ftag {
    /// Encode to the xattr string.
    pub fn encode(&self) -> Result<String, TagError> {
        for component in [&self.ctag, &self.streamid] {
            if let Some(c) = component.chars().find(|c| matches!(c, '|' | '(' | ')')) {
                return Err(TagError::ReservedCharacter(c));
            }
        }
        let mut state = String::with_capacity(4);
        state.push(self.state.tag());
        if self.writeable {
            state.push('w');
        }
        if self.readable {
            state.push('r');
        }
        if self.endofstream {
            state.push('e');
        }
        Ok(format!(
            "{FTAG_PREFIX}{maj:0vd$}.{min:0vd$}|{ctag}|{sid}|refs{rb}.{rd}.{rg}|objs{of}.{os}|pos{fno}.{ono}.{off}|prot{n}.{e}.{o}.{psz}|data{b}.{ab}.{rcb}|st{state}{FTAG_SUFFIX}",
            maj = self.major,
            min = self.minor,
            ctag = self.ctag,
            sid = self.streamid,
            rb = self.refbreadth,
            rd = self.refdepth,
            rg = self.refdigits,
            of = self.objfiles,
            os = self.objsize,
            fno = self.fileno,
            ono = self.objno,
            off = self.offset,
            n = self.protection.n,
            e = self.protection.e,
            o = self.protection.o,
            psz = self.protection.partsz,
            b = self.bytes,
            ab = self.availbytes,
            rcb = self.recoverybytes,
            vd = VERSION_DIGITS,
        ))
    }

    /// Parse an xattr string back into a tag.
    ///
    /// Refuses tags whose major version is newer than this codec's own.
    pub fn parse(s: &str) -> Result<Self, TagError> {
        let body = s
            .strip_prefix(FTAG_PREFIX)
            .and_then(|b| b.strip_suffix(FTAG_SUFFIX))
            .ok_or(TagError::Malformed("missing FTAG delimiters"))?;
        let mut fields = body.split('|');

        let version = fields.next().ok_or(TagError::Malformed("missing version"))?;
        let (maj, min) = version
            .split_once('.')
            .ok_or(TagError::Malformed("bad version format"))?;
        let major: u32 = maj.parse().map_err(|_| TagError::Malformed("bad major version"))?;
        let minor: u32 = min.parse().map_err(|_| TagError::Malformed("bad minor version"))?;
        if major > FTAG_CURRENT_MAJOR {
            return Err(TagError::UnsupportedVersion(major));
        }

        let ctag = fields
            .next()
            .ok_or(TagError::Malformed("missing client tag"))?
            .to_owned();
        let streamid = fields
            .next()
            .ok_or(TagError::Malformed("missing streamid"))?
            .to_owned();

        let refs = tagged_values(fields.next(), "refs", 3)?;
        let objs = tagged_values(fields.next(), "objs", 2)?;
        let pos = tagged_values(fields.next(), "pos", 3)?;
        let prot = tagged_values(fields.next(), "prot", 4)?;
        let data = tagged_values(fields.next(), "data", 3)?;

        let state_field = fields
            .next()
            .and_then(|f| f.strip_prefix("st"))
            .ok_or(TagError::Malformed("missing state field"))?;
        if fields.next().is_some() {
            return Err(TagError::Malformed("trailing fields"));
        }
        let state_bytes = state_field.as_bytes();
        if state_bytes.is_empty() {
            return Err(TagError::Malformed("empty state field"));
        }
        let state = DataState::from_tag(state_bytes[0])
            .ok_or(TagError::Malformed("unknown data state"))?;
        let mut writeable = false;
        let mut readable = false;
        let mut endofstream = false;
        for &flag in &state_bytes[1..] {
            match flag {
                b'w' if !writeable => writeable = true,
                b'r' if !readable => readable = true,
                b'e' if !endofstream => endofstream = true,
                _ => return Err(TagError::Malformed("bad state flag")),
            }
        }

        let narrow = |v: u64, what: &'static str| -> Result<u32, TagError> {
            u32::try_from(v).map_err(|_| TagError::Malformed(what))
        };
        Ok(Ftag {
            major,
            minor,
            ctag,
            streamid,
            refbreadth: narrow(refs[0], "refbreadth out of range")?,
            refdepth: narrow(refs[1], "refdepth out of range")?,
            refdigits: narrow(refs[2], "refdigits out of range")?,
            objfiles: objs[0],
            objsize: objs[1],
            fileno: pos[0],
            objno: pos[1],
            offset: pos[2],
            protection: Protection {
                n: narrow(prot[0], "protection N out of range")?,
                e: narrow(prot[1], "protection E out of range")?,
                o: narrow(prot[2], "protection O out of range")?,
                partsz: prot[3],
            },
            bytes: data[0],
            availbytes: data[1],
            recoverybytes: data[2],
            state,
            writeable,
            readable,
            endofstream,
        })
    }

    // ── Derivations ──────────────────────────────────────────────────────────

    /// Deterministic reference-file name for this file's metadata inode.
    pub fn meta_name(&self) -> String {
        format!("{}|{}|no.{}", self.ctag, self.streamid, self.fileno)
    }

    /// Name of the data object `objno` of this file's stream.
    pub fn data_name(&self, objno: u64) -> String {
        format!("{}|{}|obj.{}", self.ctag, self.streamid, objno)
    }

    /// Rebuild marker reference name for object `objno`.
    pub fn rebuild_marker(&self, objno: u64) -> String {
        format!("{}|{}{}", self.meta_name(), objno, REBUILD_SUFFIX)
    }

    /// Repack marker reference name for this file.
    pub fn repack_marker(&self) -> String {
        format!("{}{}", self.meta_name(), REPACK_SUFFIX)
    }
}

fn tagged_values(
    field: Option<&str>,
    tag: &'static str,
    count: usize,
) -> Result<Vec<u64>, TagError> {
    let body = field
        .and_then(|f| f.strip_prefix(tag))
        .ok_or(TagError::Malformed("missing tagged field"))?;
    let values: Vec<u64> = body
        .split('.')
        .map(|v| v.parse::<u64>())
        .collect::<Result<_, _>>()
        .map_err(|_| TagError::Malformed("bad numeric value"))?;
    if values.len() != count {
        return Err(TagError::Malformed("wrong value count in tagged field"));
    }
    Ok(values)
}

// ── Tests ────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn sample_ftag() -> Ftag {
        Ftag {
            major:         FTAG_CURRENT_MAJOR,
            minor:         FTAG_CURRENT_MINOR,
            ctag:          "testclient".to_owned(),
            streamid:      "repo#ns#1690000000.12345".to_owned(),
            fileno:        3,
            objfiles:      16,
            objsize:       4096,
            refbreadth:    3,
            refdepth:      2,
            refdigits:     3,
            objno:         1,
            offset:        58,
            protection:    Protection { n: 10, e: 2, o: 5, partsz: 1024 },
            bytes:         2048,
            availbytes:    2048,
            recoverybytes: 120,
            state:         DataState::Sized,
            writeable:     false,
            readable:      true,
            endofstream:   false,
        }
    }

    #[test]
    fn round_trip() {
        let ftag = sample_ftag();
        let enc = ftag.encode().unwrap();
        assert_eq!(Ftag::parse(&enc).unwrap(), ftag);
    }

    #[test]
    fn round_trip_all_flags() {
        let mut ftag = sample_ftag();
        ftag.state = DataState::Comp;
        ftag.writeable = true;
        ftag.endofstream = true;
        let enc = ftag.encode().unwrap();
        assert_eq!(Ftag::parse(&enc).unwrap(), ftag);
    }

    #[test]
    fn refuses_newer_major_version() {
        let enc = sample_ftag().encode().unwrap();
        let newer = enc.replacen(
            &format!("FTAG({:03}", FTAG_CURRENT_MAJOR),
            &format!("FTAG({:03}", FTAG_CURRENT_MAJOR + 1),
            1,
        );
        assert!(matches!(
            Ftag::parse(&newer),
            Err(TagError::UnsupportedVersion(_))
        ));
    }

    #[test]
    fn rejects_reserved_chars_in_ctag() {
        let mut ftag = sample_ftag();
        ftag.ctag = "bad|client".to_owned();
        assert!(matches!(
            ftag.encode(),
            Err(TagError::ReservedCharacter('|'))
        ));
    }

    #[test]
    fn rejects_malformed_strings() {
        assert!(Ftag::parse("").is_err());
        assert!(Ftag::parse("FTAG()").is_err());
        assert!(Ftag::parse("not an ftag").is_err());
        let enc = sample_ftag().encode().unwrap();
        assert!(Ftag::parse(&enc[..enc.len() - 4]).is_err());
    }

    #[test]
    fn derivation_names() {
        let ftag = sample_ftag();
        let meta = ftag.meta_name();
        assert_eq!(meta, "testclient|repo#ns#1690000000.12345|no.3");
        assert_eq!(
            ftag.rebuild_marker(7),
            format!("{meta}|7{REBUILD_SUFFIX}")
        );
        assert_eq!(ftag.repack_marker(), format!("{meta}{REPACK_SUFFIX}"));
        assert_eq!(
            ftag.data_name(2),
            "testclient|repo#ns#1690000000.12345|obj.2"
        );
    }

    #[test]
    fn data_names_distinct_per_object() {
        let ftag = sample_ftag();
        assert_ne!(ftag.data_name(0), ftag.data_name(1));
    }

    proptest! {
        #[test]
        fn prop_round_trip(
            ctag in "[a-zA-Z0-9_-]{1,24}",
            sid in "[a-zA-Z0-9#._-]{1,48}",
            fileno in any::<u64>(),
            objno in any::<u64>(),
            offset in any::<u64>(),
            objfiles in any::<u64>(),
            objsize in any::<u64>(),
            n in 1u32..64,
            e in 0u32..16,
            o in 0u32..64,
            partsz in 1u64..1_048_576,
            bytes in any::<u64>(),
            availbytes in any::<u64>(),
            recoverybytes in any::<u64>(),
            state_idx in 0usize..4,
            writeable in any::<bool>(),
            readable in any::<bool>(),
            endofstream in any::<bool>(),
        ) {
            let state = [DataState::Init, DataState::Sized, DataState::Fin, DataState::Comp][state_idx];
            let ftag = Ftag {
                major: FTAG_CURRENT_MAJOR,
                minor: FTAG_CURRENT_MINOR,
                ctag, streamid: sid, fileno,
                objfiles, objsize,
                refbreadth: 4, refdepth: 2, refdigits: 3,
                objno, offset,
                protection: Protection { n, e, o, partsz },
                bytes, availbytes, recoverybytes,
                state, writeable, readable, endofstream,
            };
            let enc = ftag.encode().unwrap();
            prop_assert_eq!(Ftag::parse(&enc).unwrap(), ftag);
        }
    }
}
