//! # packstream — datastream core for an erasure-coded object store
//!
//! The data path of a scalable near-POSIX filesystem: file data lives in
//! erasure-coded objects placed across a pod/cap/scatter substrate, file
//! metadata lives in a separate posix-like tree, and this crate owns
//! everything that ties the two together:
//!
//! - packing arbitrarily many small files into shared objects, and
//!   striping large files across as many objects as they need;
//! - the FTAG per-file extended attribute — the single cross-plane source
//!   of truth for a file's placement, sizing, and lifecycle state;
//! - recovery headers and per-file trailers embedded in every object, so
//!   object contents can be reassembled into files without the metadata
//!   tier;
//! - the crash-safe repack protocol and the rebuild-marker protocol for
//!   partially-failed object writes.
//!
//! Stability guarantees:
//! - Recovery records and FTAG/RTAG strings are 7-bit ASCII with versioned,
//!   round-trip-stable codecs; parsers refuse newer major versions
//! - A file's trailer length is frozen at creation and never varies with
//!   its size, mtime, or eof flag
//! - Within a stream, fileno values are contiguous from zero, and every
//!   file either packs directly after its predecessor or starts a fresh
//!   object at the recovery-header offset
//! - Cross-process coordination uses only atomic metadata primitives:
//!   exclusive reference creation, atomic link/rename, and
//!   first-writer-wins xattr creation

pub mod error;
pub mod ftag;
pub mod mdal;
pub mod ne;
pub mod recovery;
pub mod refs;
pub mod ring;
pub mod stream;

// Flat re-exports for the most common types.
pub use error::StreamError;
pub use ftag::{DataState, Ftag, Protection, TagError};
pub use mdal::{MemMeta, MetaHandle, MetaStat, MetaStore, OpenMode, TimeSpec, XattrSet};
pub use ne::{AccessMode, MemObjects, ObjectHandle, ObjectHealth, ObjectStore, Rtag};
pub use recovery::{RecoveredFile, RecoveryFinfo, RecoveryHeader, RecoveryStream};
pub use refs::{Location, Rings};
pub use ring::{hash_rangevalue, polyhash, Ring};
pub use stream::{
    DataScheme, DataStream, MetaScheme, Namespace, OpenOutcome, StreamMode, StreamPosition,
    Whence,
};
