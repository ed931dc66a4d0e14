//! Metadata capability — the seam to the posix-like metadata tier.
//!
//! The stream engine never touches a filesystem directly; it drives this
//! capability set, which any metadata backend can implement.  Three
//! primitives carry all of the cross-process coordination the core relies
//! on:
//!
//! - [`MetaStore::link_ref`] is atomic (a colliding target surfaces as
//!   `AlreadyExists` and triggers exactly one unlink-and-retry upstream);
//! - [`MetaStore::open_ref`] with `create_excl` gives exclusive-create
//!   semantics, used for rebuild and repack markers;
//! - [`MetaHandle::set_xattr`] with [`XattrSet::Create`] is
//!   first-writer-wins, used to preserve original FTAG values.
//!
//! Reference paths (`ref` operations) address the hidden metadata tree;
//! plain paths address the user-visible namespace.  Xattrs live in a hidden
//! namespace flag so user-visible attributes can never collide with tags.

pub mod mem;

use std::io;

pub use mem::MemMeta;

/// Main FTAG xattr of a live file.
pub const FTAG_XATTR: &str = "FTAG";
/// Repack-in-progress tag (see the stream module's repack protocol).
pub const TREPACK_XATTR: &str = "TREPACK_TAG";
/// Immutable original FTAG preserved across any number of repacks.
pub const OREPACK_XATTR: &str = "OREPACK_TAG";
/// Per-object rebuild tag attached to rebuild markers.
pub const RTAG_XATTR: &str = "RTAG";

/// Access mode for metadata handles.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OpenMode {
    Read,
    Write,
    ReadWrite,
}

/// Placement policy for `set_xattr`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum XattrSet {
    /// Create or replace.
    Any,
    /// Fail with `AlreadyExists` if the attribute exists (first-writer-wins).
    Create,
    /// Fail with `NotFound` if the attribute does not exist.
    Replace,
}

/// Seconds/nanoseconds timestamp pair.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TimeSpec {
    pub sec:  u64,
    pub nsec: u32,
}

/// Stat record of a metadata inode.
#[derive(Debug, Clone, Copy)]
pub struct MetaStat {
    pub inode: u64,
    pub mode:  u32,
    pub uid:   u32,
    pub gid:   u32,
    /// Logical file size (set by truncate; data lives in the object tier).
    pub size:  u64,
    pub atime: TimeSpec,
    pub mtime: TimeSpec,
    pub nlink: u32,
}

/// An open metadata inode.
pub trait MetaHandle: Send {
    fn stat(&self) -> io::Result<MetaStat>;
    /// `Ok(None)` when the attribute does not exist.
    fn get_xattr(&self, hidden: bool, name: &str) -> io::Result<Option<String>>;
    fn set_xattr(&self, hidden: bool, name: &str, value: &str, mode: XattrSet) -> io::Result<()>;
    fn remove_xattr(&self, hidden: bool, name: &str) -> io::Result<()>;
    fn truncate(&self, size: u64) -> io::Result<()>;
    fn set_times(&self, times: [TimeSpec; 2]) -> io::Result<()>;
}

/// A metadata backend scoped to one namespace.
pub trait MetaStore: Send + Sync {
    /// Open a user-visible path.
    fn open(&self, path: &str, mode: OpenMode) -> io::Result<Box<dyn MetaHandle>>;
    /// Open a reference path; `create_excl` fails with `AlreadyExists` if
    /// the reference already exists.
    fn open_ref(
        &self,
        refpath: &str,
        mode: OpenMode,
        create_excl: bool,
        perms: u32,
    ) -> io::Result<Box<dyn MetaHandle>>;
    /// Atomically link a reference file to a target.  `interref` links to a
    /// second reference path instead of a user path.
    fn link_ref(&self, interref: bool, refpath: &str, tgtpath: &str) -> io::Result<()>;
    /// Atomically rename one reference path over another.
    fn rename_ref(&self, from: &str, to: &str) -> io::Result<()>;
    fn unlink(&self, path: &str) -> io::Result<()>;
    fn unlink_ref(&self, refpath: &str) -> io::Result<()>;
    fn stat(&self, path: &str) -> io::Result<MetaStat>;
    fn stat_ref(&self, refpath: &str) -> io::Result<MetaStat>;
    /// Create a user-visible directory marker.
    fn mkdir(&self, path: &str) -> io::Result<()>;
    /// User-visible entries under `path` (non-recursive).
    fn read_dir(&self, path: &str) -> io::Result<Vec<String>>;
}

pub(crate) fn not_found(what: &str) -> io::Error {
    io::Error::new(io::ErrorKind::NotFound, what.to_owned())
}

pub(crate) fn already_exists(what: &str) -> io::Error {
    io::Error::new(io::ErrorKind::AlreadyExists, what.to_owned())
}
