//! Reference-path and object-target resolution.
//!
//! A file's metadata inode lives at `<refdir>/<metaname>`, where the refdir
//! is one cell of a breadth × depth directory tree and the metaname is
//! derived from the FTAG.  The tree dimensions travel inside the FTAG, so a
//! tag recovered from an old file still resolves after the namespace's
//! reference layout has been reconfigured.
//!
//! Data objects are placed by hashing the object name through three
//! independent rings — pod, cap, scatter — and the erasure rotation offset
//! is `hash_rangevalue(objname) mod (N+E)`.

use thiserror::Error;
use tracing::debug;

use crate::ftag::{Ftag, Protection};
use crate::ring::{hash_rangevalue, polyhash, Ring};

#[derive(Error, Debug)]
pub enum RefsError {
    #[error("reference scheme has zero breadth or depth")]
    DegenerateScheme,
    #[error("ring produced a non-numeric {dimension} node: \"{name}\"")]
    BadNodeName { dimension: &'static str, name: String },
}

/// Physical placement of one object: pod, cap, and scatter indices.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Location {
    pub pod:     u32,
    pub cap:     u32,
    pub scatter: u32,
}

/// The three placement rings of a data scheme.
#[derive(Debug, Clone)]
pub struct Rings {
    pub pods:     Ring,
    pub caps:     Ring,
    pub scatters: Ring,
}

impl Rings {
    /// Evenly-weighted rings of the given dimension counts.
    pub fn uniform(pods: u32, caps: u32, scatters: u32) -> Result<Self, crate::ring::RingError> {
        Ok(Self {
            pods:     Ring::uniform(pods)?,
            caps:     Ring::uniform(caps)?,
            scatters: Ring::uniform(scatters)?,
        })
    }
}

/// Reference directory for `metaname` inside a breadth × depth tree with
/// zero-padded directory names of `digits` width.  Returned with a trailing
/// separator so `dir + metaname` forms a full reference path.
pub fn reference_dir(
    metaname: &str,
    breadth: u32,
    depth: u32,
    digits: u32,
) -> Result<String, RefsError> {
    if breadth == 0 || depth == 0 {
        return Err(RefsError::DegenerateScheme);
    }
    let mut dir = String::new();
    for level in 0..depth {
        // independent hash per level, so deep trees do not correlate
        let cell = polyhash(&format!("{metaname}#{level}")) % breadth as u64;
        dir.push_str(&format!("{cell:0width$}/", width = digits as usize));
    }
    Ok(dir)
}

/// Full reference path of the file described by `ftag`, using the reference
/// dimensions the tag itself carries.
pub fn reference_path(ftag: &Ftag) -> Result<String, RefsError> {
    let metaname = ftag.meta_name();
    let dir = reference_dir(&metaname, ftag.refbreadth, ftag.refdepth, ftag.refdigits)?;
    Ok(format!("{dir}{metaname}"))
}

/// Full reference path for an arbitrary marker name (rebuild or repack
/// markers hash independently of the file they shadow).
pub fn marker_reference_path(
    marker_name: &str,
    breadth: u32,
    depth: u32,
    digits: u32,
) -> Result<String, RefsError> {
    let dir = reference_dir(marker_name, breadth, depth, digits)?;
    Ok(format!("{dir}{marker_name}"))
}

/// Sibling path: replace the final component of `refpath` with `name`,
/// keeping the parent reference directory.
pub fn sibling_path(refpath: &str, name: &str) -> String {
    match refpath.rfind('/') {
        Some(split) => format!("{}/{}", &refpath[..split], name),
        None => name.to_owned(),
    }
}

/// Resolve the object `objno` of `ftag`'s stream to its name, erasure
/// descriptor (with the rotation offset populated), and physical location.
pub fn object_target(
    ftag: &Ftag,
    objno: u64,
    rings: &Rings,
) -> Result<(String, Protection, Location), RefsError> {
    let objname = ftag.data_name(objno);

    let parse_node = |dimension: &'static str, name: &str| -> Result<u32, RefsError> {
        name.parse::<u32>().map_err(|_| RefsError::BadNodeName {
            dimension,
            name: name.to_owned(),
        })
    };
    let location = Location {
        pod:     parse_node("pod", rings.pods.successor(&objname))?,
        cap:     parse_node("cap", rings.caps.successor(&objname))?,
        scatter: parse_node("scatter", rings.scatters.successor(&objname))?,
    };

    let mut erasure = ftag.protection;
    erasure.o = hash_rangevalue(&objname, erasure.stripe_width() as u64) as u32;
    debug!(
        object = %objname,
        pod = location.pod,
        cap = location.cap,
        scatter = location.scatter,
        n = erasure.n,
        e = erasure.e,
        o = erasure.o,
        "resolved object target"
    );
    Ok((objname, erasure, location))
}

// ── Tests ────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ftag::{DataState, Ftag, Protection};

    fn sample_ftag() -> Ftag {
        Ftag {
            major:         0,
            minor:         1,
            ctag:          "client".to_owned(),
            streamid:      "repo#ns#100.200".to_owned(),
            fileno:        0,
            objfiles:      16,
            objsize:       4096,
            refbreadth:    4,
            refdepth:      2,
            refdigits:     3,
            objno:         0,
            offset:        58,
            protection:    Protection { n: 2, e: 1, o: 0, partsz: 512 },
            bytes:         0,
            availbytes:    0,
            recoverybytes: 100,
            state:         DataState::Init,
            writeable:     false,
            readable:      false,
            endofstream:   false,
        }
    }

    #[test]
    fn reference_path_is_stable_and_within_scheme() {
        let ftag = sample_ftag();
        let path = reference_path(&ftag).unwrap();
        assert_eq!(path, reference_path(&ftag).unwrap());
        // breadth 4, depth 2, digits 3: two zero-padded levels then the name
        let parts: Vec<&str> = path.split('/').collect();
        assert_eq!(parts.len(), 3);
        for dir in &parts[..2] {
            assert_eq!(dir.len(), 3);
            assert!(dir.parse::<u32>().unwrap() < 4);
        }
        assert_eq!(parts[2], ftag.meta_name());
    }

    #[test]
    fn reference_path_tracks_tag_dimensions() {
        let ftag = sample_ftag();
        let mut reconfigured = ftag.clone();
        reconfigured.refdepth = 3;
        let a = reference_path(&ftag).unwrap();
        let b = reference_path(&reconfigured).unwrap();
        assert_ne!(a, b);
        assert_eq!(b.split('/').count(), 4);
    }

    #[test]
    fn degenerate_scheme_rejected() {
        assert!(matches!(
            reference_dir("name", 0, 2, 3),
            Err(RefsError::DegenerateScheme)
        ));
    }

    #[test]
    fn sibling_replaces_final_component() {
        assert_eq!(sibling_path("000/001/somefile", "marker"), "000/001/marker");
        assert_eq!(sibling_path("bare", "marker"), "marker");
    }

    #[test]
    fn object_target_deterministic_and_bounded() {
        let ftag = sample_ftag();
        let rings = Rings::uniform(3, 2, 5).unwrap();
        let (name_a, erasure_a, loc_a) = object_target(&ftag, 0, &rings).unwrap();
        let (name_b, erasure_b, loc_b) = object_target(&ftag, 0, &rings).unwrap();
        assert_eq!(name_a, name_b);
        assert_eq!(loc_a, loc_b);
        assert_eq!(erasure_a.o, erasure_b.o);
        assert!(loc_a.pod < 3 && loc_a.cap < 2 && loc_a.scatter < 5);
        assert!(erasure_a.o < erasure_a.stripe_width());

        let (name_c, _, _) = object_target(&ftag, 1, &rings).unwrap();
        assert_ne!(name_a, name_c);
    }
}
