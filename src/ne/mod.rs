//! Erasure capability — the seam to the erasure-coding engine.
//!
//! The stream engine treats objects as append-only byte sequences behind
//! this capability set.  Closing a write handle reports per-block health:
//! an object can sync with recoverable block failures (the stripe still
//! decodes), and the stream engine turns that report into a rebuild marker
//! so the resource manager can repair the stripe later.
//!
//! # RTAG
//!
//! The per-object rebuild tag serializes a stripe-status report:
//!
//! ```text
//! RTAG(<width>|d<per-block 0/1>|m<per-block 0/1>)
//! ```
//!
//! `d` flags data-content damage, `m` flags part-metadata damage; a `1`
//! marks a block needing rebuild.  The string round-trips exactly and is
//! attached to rebuild markers under the hidden `RTAG` xattr.

pub mod mem;

use std::io;

use thiserror::Error;

pub use mem::MemObjects;

use crate::ftag::Protection;
use crate::refs::Location;

#[derive(Error, Debug)]
pub enum RtagError {
    #[error("malformed rtag: {0}")]
    Malformed(&'static str),
    #[error("rtag block-status length disagrees with stripe width")]
    WidthMismatch,
}

/// Per-block status of one object's stripe.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ObjectHealth {
    pub data_errors: Vec<bool>,
    pub meta_errors: Vec<bool>,
}

impl ObjectHealth {
    pub fn clean(width: u32) -> Self {
        Self {
            data_errors: vec![false; width as usize],
            meta_errors: vec![false; width as usize],
        }
    }

    pub fn width(&self) -> u32 {
        self.data_errors.len() as u32
    }

    /// True when any block needs rebuild.
    pub fn degraded(&self) -> bool {
        self.data_errors.iter().chain(&self.meta_errors).any(|&e| e)
    }

    pub fn error_count(&self) -> usize {
        (0..self.data_errors.len())
            .filter(|&i| self.data_errors[i] || self.meta_errors[i])
            .count()
    }
}

/// Textual form of an [`ObjectHealth`] report.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Rtag(pub ObjectHealth);

impl Rtag {
    pub fn encode(&self) -> String {
        let bits = |errors: &[bool]| -> String {
            errors.iter().map(|&e| if e { '1' } else { '0' }).collect()
        };
        format!(
            "RTAG({}|d{}|m{})",
            self.0.width(),
            bits(&self.0.data_errors),
            bits(&self.0.meta_errors),
        )
    }

    pub fn parse(s: &str) -> Result<Self, RtagError> {
        let body = s
            .strip_prefix("RTAG(")
            .and_then(|b| b.strip_suffix(')'))
            .ok_or(RtagError::Malformed("missing RTAG delimiters"))?;
        let mut fields = body.split('|');
        let width: usize = fields
            .next()
            .and_then(|w| w.parse().ok())
            .ok_or(RtagError::Malformed("bad stripe width"))?;
        let parse_bits = |field: Option<&str>, tag: &'static str| -> Result<Vec<bool>, RtagError> {
            let bits = field
                .and_then(|f| f.strip_prefix(tag))
                .ok_or(RtagError::Malformed("missing status field"))?;
            bits.chars()
                .map(|c| match c {
                    '0' => Ok(false),
                    '1' => Ok(true),
                    _ => Err(RtagError::Malformed("bad status bit")),
                })
                .collect()
        };
        let data_errors = parse_bits(fields.next(), "d")?;
        let meta_errors = parse_bits(fields.next(), "m")?;
        if fields.next().is_some() {
            return Err(RtagError::Malformed("trailing fields"));
        }
        if data_errors.len() != width || meta_errors.len() != width {
            return Err(RtagError::WidthMismatch);
        }
        Ok(Self(ObjectHealth { data_errors, meta_errors }))
    }
}

/// Open mode for object handles.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AccessMode {
    Read,
    Write,
}

/// One open erasure-coded object.
pub trait ObjectHandle: Send {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize>;
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize>;
    fn seek(&mut self, offset: u64) -> io::Result<u64>;
    /// Sync and close, reporting per-block stripe health.  Read handles
    /// report damage observed while reading.
    fn close(self: Box<Self>) -> io::Result<ObjectHealth>;
    /// Abandon the handle without syncing.
    fn abort(self: Box<Self>);
}

/// The object tier.
pub trait ObjectStore: Send + Sync {
    fn open(
        &self,
        objname: &str,
        location: Location,
        erasure: Protection,
        mode: AccessMode,
    ) -> io::Result<Box<dyn ObjectHandle>>;
    fn delete(&self, objname: &str, location: Location) -> io::Result<()>;
    /// Repair the blocks flagged by `rtag`, clearing the recorded damage.
    fn rebuild(
        &self,
        objname: &str,
        location: Location,
        erasure: Protection,
        rtag: &Rtag,
    ) -> io::Result<()>;
}

// ── Tests ────────────────────────────────────────────────────────────────────
