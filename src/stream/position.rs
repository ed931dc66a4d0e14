//! Position engine — translate a (whence, offset) request plus file and
//! stream state into concrete data-object coordinates.
//!
//! Every file sees its data as a contiguous byte sequence; physically that
//! sequence is carved into per-object chunks of
//! `dataperobj = objsize - recoveryheaderlen - recoverybytes` bytes (the
//! header is shared by the object, the trailer budget is this file's own).
//! Beyond the readable data there may be an *excess* region: zero-fill
//! created by truncating a file beyond its end of data, or by an extend
//! that has not been released yet.  The engine reports both regions so
//! readers can zero-fill without touching the object tier.

use crate::error::StreamError;
use crate::ftag::Ftag;

/// Seek origin, mirroring the posix whence values.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Whence {
    Set,
    Cur,
    End,
}

/// Resolved position of one logical offset.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct StreamPosition {
    /// Logical offset from the beginning of the file, zero-fill included.
    pub totaloffset:     u64,
    /// Actual data bytes beyond this position.
    pub dataremaining:   u64,
    /// Zero-fill bytes beyond this position.
    pub excessremaining: u64,
    /// Data object holding this position.
    pub objno:           u64,
    /// Byte offset inside that object (recovery header included).
    pub offset:          u64,
    /// Offset within the zero-fill region, when past end of data.
    pub excessoffset:    u64,
    /// This file's data capacity per object.
    pub dataperobj:      u64,
}

/// Mode-dependent inputs of the translation.
#[derive(Debug, Clone, Copy)]
pub struct PositionInputs<'a> {
    pub ftag:              &'a Ftag,
    /// Logical file size bound for the active stream mode: metadata file
    /// size for READ, `bytes` for CREATE/REPACK, `availbytes` for EDIT.
    pub filesize:          u64,
    pub recoveryheaderlen: u64,
    /// Current stream position, for `Whence::Cur`.
    pub cur_objno:         u64,
    pub cur_offset:        u64,
    pub cur_excessoffset:  u64,
    /// Whether a seek past the file size may grow it (CREATE/REPACK).
    pub extendable:        bool,
}

/// Resolve `(delta, whence)` against the current file.
pub fn target_position(
    inputs: PositionInputs<'_>,
    delta: i64,
    whence: Whence,
) -> Result<StreamPosition, StreamError> {
    let ftag = inputs.ftag;
    let overhead = ftag.recoverybytes + inputs.recoveryheaderlen;
    if ftag.objsize <= overhead {
        return Err(StreamError::InvalidArgument(
            "object size cannot hold recovery info",
        ));
    }
    let dataperobj = ftag.objsize - overhead;
    let minobj = ftag.objno;
    // data space already occupied in the first object
    let minoffset = ftag
        .offset
        .checked_sub(inputs.recoveryheaderlen)
        .ok_or(StreamError::InvalidArgument(
            "file offset precedes the recovery header",
        ))?;
    let mut filesize = inputs.filesize;

    // convert to an absolute offset from the start of the file
    let mut offset: i128 = delta as i128;
    match whence {
        Whence::End => {
            offset += filesize as i128;
        }
        Whence::Cur => {
            if inputs.cur_objno > minobj {
                offset += (dataperobj - minoffset) as i128;
                offset += ((inputs.cur_objno - (minobj + 1)) * dataperobj) as i128;
                if inputs.cur_offset != 0 {
                    offset += (inputs.cur_offset - inputs.recoveryheaderlen) as i128;
                }
            } else if inputs.cur_offset != 0 {
                offset += ((inputs.cur_offset - inputs.recoveryheaderlen) - minoffset) as i128;
            }
            offset += inputs.cur_excessoffset as i128;
        }
        Whence::Set => {}
    }

    if offset < 0 {
        return Err(StreamError::InvalidArgument(
            "offset extends prior to beginning of file",
        ));
    }
    let mut offset = offset as u64;
    if offset > filesize {
        if inputs.extendable {
            filesize = offset;
        } else {
            return Err(StreamError::InvalidArgument(
                "offset extends beyond end of file",
            ));
        }
    }

    // split the target between real data and zero-fill
    let mut excessremain = filesize.saturating_sub(ftag.availbytes);
    let mut remain = 0u64;
    let mut excessoff = 0u64;
    if offset > ftag.availbytes {
        excessoff = offset - ftag.availbytes;
        excessremain -= excessoff;
        offset = ftag.availbytes;
    } else {
        remain = ftag.availbytes - offset;
    }

    // locate within the object sequence
    let mut tgtobj = minobj;
    let tgtoff;
    if offset + minoffset >= dataperobj {
        tgtobj += (offset + minoffset) / dataperobj;
        tgtoff = (offset + minoffset) % dataperobj;
    } else {
        tgtoff = minoffset + offset;
    }

    Ok(StreamPosition {
        totaloffset:     offset + excessoff,
        dataremaining:   remain,
        excessremaining: excessremain,
        objno:           tgtobj,
        offset:          tgtoff + inputs.recoveryheaderlen,
        excessoffset:    excessoff,
        dataperobj,
    })
}

// ── Tests ────────────────────────────────────────────────────────────────────
