//! Datastream state machine — create/read/edit/repack lifecycle, packing
//! policy, object transitions, and the marker protocols.
//!
//! A stream is a writer-session-scoped sequence of files sharing one
//! streamid, client tag, object-size limit, and packing limit.  Small files
//! pack into a shared object until space or the packing limit runs out;
//! large files stripe across as many objects as they need.  Every object
//! opens with the stream's recovery header and every file's data ends with
//! its fixed-length recovery trailer.
//!
//! # Handle discipline
//!
//! Operations take `&mut Option<DataStream>`, mirroring the fact that some
//! of them replace the stream (creating the next file of a live stream) and
//! some destroy it.  Most failures leave the slot populated and the stream
//! referencing the same file; a failure during an object transition or a
//! completion cascade is [`StreamError::Catastrophic`] — the stream has
//! been torn down (data handle aborted, metadata handles dropped) and the
//! slot cleared.  `close` and `release` always consume the stream.
//!
//! # Repack protocol
//!
//! `repack` rewrites a file's content into a new stream without disturbing
//! concurrent readers.  At open: the repack marker (`<metaname>|repack`,
//! a sibling of the original reference file) is created exclusively and
//! holds the new FTAG under `TREPACK_TAG`; the live file is hard-linked
//! into the new stream's reference location; the live file's main FTAG
//! stays original, so readers are untouched.  While writing, the evolving
//! new FTAG is persisted on the live file under `TREPACK_TAG`.  At
//! completion: the original FTAG moves onto the marker's main FTAG and
//! (create-only) onto the live file's `OREPACK_TAG`, the live file's main
//! FTAG becomes the new value, `TREPACK_TAG` is removed, and the marker is
//! renamed over the original reference path so the garbage collector finds
//! the old objects through it.  At every crash point exactly one reference
//! file holds the truth; [`DataStream::repack_cleanup`] restores a
//! consistent state from any of them and is a no-op once the marker is
//! gone.

pub mod position;

use std::sync::Arc;

use tracing::{debug, info, warn};

use crate::error::StreamError;
use crate::ftag::{DataState, Ftag, Protection, FTAG_CURRENT_MAJOR, FTAG_CURRENT_MINOR};
use crate::mdal::{
    MetaHandle, MetaStore, OpenMode, TimeSpec, XattrSet, FTAG_XATTR, OREPACK_XATTR, RTAG_XATTR,
    TREPACK_XATTR,
};
use crate::ne::{AccessMode, ObjectHandle, ObjectStore, Rtag};
use crate::recovery::{RecoveryFinfo, RecoveryHeader};
use crate::refs::{self, Rings};

pub use position::{StreamPosition, Whence};

const INITIAL_FILE_ALLOC: usize = 64;
const FILE_ALLOC_MULT: usize = 2;
/// Zero-fill buffer size for forward seeks on create streams.
const ZERO_FILL_CHUNK: usize = 1024 * 1024;

/// Stream operating mode.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StreamMode {
    Create,
    Read,
    Edit,
    Repack,
}

/// Data-scheme parameters of a namespace.
#[derive(Debug, Clone)]
pub struct DataScheme {
    pub protection: Protection,
    /// Packing limit: max files per object (0 = unlimited).
    pub objfiles:   u64,
    /// Object size limit (0 = unlimited, which disables packing logic).
    pub objsize:    u64,
    pub rings:      Rings,
}

/// Metadata-scheme parameters of a namespace.
#[derive(Debug, Clone, Copy)]
pub struct MetaScheme {
    pub refbreadth: u32,
    pub refdepth:   u32,
    pub refdigits:  u32,
}

/// One namespace position: schemes plus the capability handles of both
/// planes.  Streams compare namespaces by identity, so share one `Arc` per
/// namespace.
pub struct Namespace {
    pub repo:    String,
    pub path:    String,
    pub data:    DataScheme,
    pub meta:    MetaScheme,
    pub mdal:    Arc<dyn MetaStore>,
    pub objects: Arc<dyn ObjectStore>,
}

impl Namespace {
    pub fn new(
        repo: &str,
        path: &str,
        data: DataScheme,
        meta: MetaScheme,
        mdal: Arc<dyn MetaStore>,
        objects: Arc<dyn ObjectStore>,
    ) -> Arc<Self> {
        Arc::new(Self {
            repo: repo.to_owned(),
            path: path.to_owned(),
            data,
            meta,
            mdal,
            objects,
        })
    }
}

/// Outcome of opening an existing file.
pub enum OpenOutcome {
    /// The stream now references the target file.
    Opened,
    /// The target carries no FTAG; the preserved metadata handle is handed
    /// back for a direct read of the metadata file (READ streams only).
    /// The stream slot is unchanged.
    NoTag(Box<dyn MetaHandle>),
}

struct StreamFile {
    handle:  Option<Box<dyn MetaHandle>>,
    ftag:    Ftag,
    times:   [TimeSpec; 2],
    dotimes: bool,
}

/// A datastream handle.  See the module docs for lifecycle semantics.
pub struct DataStream {
    mode:              StreamMode,
    ns:                Arc<Namespace>,
    ctag:              String,
    streamid:          String,
    recoveryheaderlen: u64,
    fileno:            u64,
    objno:             u64,
    offset:            u64,
    excessoffset:      u64,
    datahandle:        Option<Box<dyn ObjectHandle>>,
    /// All files not yet completed; the last entry is the current file.
    files:             Vec<StreamFile>,
    finfo:             RecoveryFinfo,
}

impl Drop for DataStream {
    fn drop(&mut self) {
        if let Some(handle) = self.datahandle.take() {
            handle.abort();
        }
    }
}

fn empty_finfo() -> RecoveryFinfo {
    RecoveryFinfo {
        inode:      0,
        mode:       0,
        owner:      0,
        group:      0,
        size:       0,
        mtime_sec:  0,
        mtime_nsec: 0,
        eof:        false,
        path:       String::new(),
    }
}

fn fatal(context: &str, err: StreamError) -> StreamError {
    StreamError::Catastrophic(format!("{context}: {err}"))
}

fn meta_err(e: std::io::Error) -> StreamError {
    StreamError::Meta(e)
}

fn data_err(e: std::io::Error) -> StreamError {
    StreamError::Data(e)
}

/// Persist `ftag` onto `handle` under `key`.
fn put_tag(handle: &dyn MetaHandle, ftag: &Ftag, key: &str) -> Result<(), StreamError> {
    let value = ftag.encode()?;
    handle
        .set_xattr(true, key, &value, XattrSet::Any)
        .map_err(meta_err)
}

/// Fetch and parse the main FTAG of `handle`; `Ok(None)` when absent.
fn get_tag(handle: &dyn MetaHandle) -> Result<Option<Ftag>, StreamError> {
    match handle.get_xattr(true, FTAG_XATTR).map_err(meta_err)? {
        Some(value) => Ok(Some(Ftag::parse(&value)?)),
        None => Ok(None),
    }
}

fn write_all(handle: &mut dyn ObjectHandle, mut buf: &[u8]) -> std::io::Result<()> {
    while !buf.is_empty() {
        let n = handle.write(buf)?;
        if n == 0 {
            return Err(std::io::Error::new(
                std::io::ErrorKind::WriteZero,
                "object write made no progress",
            ));
        }
        buf = &buf[n..];
    }
    Ok(())
}

impl DataStream {
    // ── Accessors ────────────────────────────────────────────────────────────

    pub fn mode(&self) -> StreamMode {
        self.mode
    }

    pub fn namespace(&self) -> &Arc<Namespace> {
        &self.ns
    }

    pub fn stream_id(&self) -> &str {
        &self.streamid
    }

    pub fn client_tag(&self) -> &str {
        &self.ctag
    }

    /// Object number the stream is currently positioned in.
    pub fn object_no(&self) -> u64 {
        self.objno
    }

    pub fn recovery_header_len(&self) -> u64 {
        self.recoveryheaderlen
    }

    /// Count of files not yet completed by this stream.
    pub fn file_count(&self) -> usize {
        self.files.len()
    }

    /// Tag of the file currently referenced by the stream.
    pub fn current_ftag(&self) -> &Ftag {
        &self.files.last().expect("stream holds at least one file").ftag
    }

    /// Tag of the `idx`-th open file (packing order).
    pub fn ftag_of(&self, idx: usize) -> Option<&Ftag> {
        self.files.get(idx).map(|f| &f.ftag)
    }

    // ── Construction ─────────────────────────────────────────────────────────

    fn gen(mode: StreamMode, ns: &Arc<Namespace>) -> DataStream {
        let capacity = match mode {
            StreamMode::Read | StreamMode::Edit => 2,
            StreamMode::Create | StreamMode::Repack => {
                let cap = ns.data.objfiles as usize + 1;
                if cap > 1 {
                    INITIAL_FILE_ALLOC.min(cap)
                } else {
                    INITIAL_FILE_ALLOC
                }
            }
        };
        DataStream {
            mode,
            ns: Arc::clone(ns),
            ctag: String::new(),
            streamid: String::new(),
            recoveryheaderlen: 0,
            fileno: 0,
            objno: 0,
            offset: 0,
            excessoffset: 0,
            datahandle: None,
            files: Vec::with_capacity(capacity),
            finfo: empty_finfo(),
        }
    }

    fn gen_streamid(ctag: &str, ns: &Namespace) -> (String, u64) {
        let now = chrono::Utc::now();
        let nspath = ns.path.replace('/', "#");
        let streamid = format!(
            "{}#{}#{}.{}",
            ns.repo,
            nspath,
            now.timestamp(),
            now.timestamp_subsec_nanos()
        );
        let headerlen = RecoveryHeader::new(ctag, &streamid).encoded_len() as u64;
        (streamid, headerlen)
    }

    fn gen_create(
        path: &str,
        ns: &Arc<Namespace>,
        mode: u32,
        ctag: &str,
    ) -> Result<DataStream, StreamError> {
        let mut stream = Self::gen(StreamMode::Create, ns);
        stream.ctag = if ctag.is_empty() {
            "UNKNOWN-CLIENT".to_owned()
        } else {
            ctag.to_owned()
        };
        let (streamid, headerlen) = Self::gen_streamid(&stream.ctag, ns);
        stream.streamid = streamid;
        stream.recoveryheaderlen = headerlen;
        stream.offset = headerlen;
        stream.create_new_file(path, mode)?;
        Ok(stream)
    }

    fn gen_repack(
        refpath: &str,
        ns: &Arc<Namespace>,
        ctag: &str,
    ) -> Result<DataStream, StreamError> {
        let mut stream = Self::gen(StreamMode::Repack, ns);
        stream.ctag = if ctag.is_empty() {
            "UNKNOWN-CLIENT".to_owned()
        } else {
            ctag.to_owned()
        };
        let (streamid, headerlen) = Self::gen_streamid(&stream.ctag, ns);
        stream.streamid = streamid;
        stream.recoveryheaderlen = headerlen;
        stream.offset = headerlen;
        stream.open_repack_file(refpath)?;
        Ok(stream)
    }

    fn gen_open(
        mode: StreamMode,
        path: &str,
        by_ref: bool,
        ns: &Arc<Namespace>,
    ) -> Result<Result<DataStream, Box<dyn MetaHandle>>, StreamError> {
        let mut stream = Self::gen(mode, ns);
        match stream.open_existing_file(path, by_ref)? {
            Some(preserved) => Ok(Err(preserved)),
            None => Ok(Ok(stream)),
        }
    }

    // ── Public lifecycle operations ─────────────────────────────────────────

    /// Create a new file on a CREATE stream; a `None` slot gets a fresh
    /// stream, a live one finalizes its current file and packs onward.
    pub fn create(
        slot: &mut Option<DataStream>,
        path: &str,
        ns: &Arc<Namespace>,
        mode: u32,
        ctag: &str,
    ) -> Result<(), StreamError> {
        match slot.take() {
            None => {
                *slot = Some(Self::gen_create(path, ns, mode, ctag)?);
                Ok(())
            }
            Some(stream) if stream.mode != StreamMode::Create => {
                *slot = Some(stream);
                Err(StreamError::InvalidArgument("received a non-CREATE stream"))
            }
            Some(stream) if !Arc::ptr_eq(&stream.ns, ns) => {
                // cannot continue a stream from a previous namespace
                info!("datastream targets a different namespace; starting a fresh stream");
                let fresh = match Self::gen_create(path, ns, mode, ctag) {
                    Ok(fresh) => fresh,
                    Err(e) => {
                        let mut old = Some(stream);
                        let _ = Self::close(&mut old);
                        return Err(e);
                    }
                };
                let mut old = Some(stream);
                if let Err(e) = Self::close(&mut old) {
                    return Err(fatal("closing previous datastream", e));
                }
                *slot = Some(fresh);
                Ok(())
            }
            Some(mut stream) => {
                let result = stream.progress_create(path, ns, mode);
                match result {
                    Ok(()) => {
                        *slot = Some(stream);
                        Ok(())
                    }
                    Err(e) if e.is_fatal() => Err(e),
                    Err(e) => {
                        *slot = Some(stream);
                        Err(e)
                    }
                }
            }
        }
    }

    /// Continue a live CREATE/REPACK stream with its next file.
    fn progress_create(
        &mut self,
        path: &str,
        _ns: &Arc<Namespace>,
        mode: u32,
    ) -> Result<(), StreamError> {
        let curobj = self.objno;
        self.fin_file()
            .map_err(|e| fatal("finalizing previous stream file", e))?;
        self.fileno += 1;
        if let Err(e) = if self.mode == StreamMode::Repack {
            self.open_repack_file(path)
        } else {
            self.create_new_file(path, mode)
        } {
            self.fileno -= 1;
            return Err(e);
        }
        self.handle_object_transition(curobj)
    }

    /// After a new file was appended, close the previous object and
    /// complete its packed files if the new file landed elsewhere;
    /// otherwise just persist the previous file's FINALIZED state.
    fn handle_object_transition(&mut self, curobj: u64) -> Result<(), StreamError> {
        let newfile_objno = self.files.last().expect("file just appended").ftag.objno;
        if newfile_objno != curobj {
            debug!(from = curobj, to = newfile_objno, "stream object transition");
            let prev_idx = self.files.len() - 2;
            let mut oldftag = self.files[prev_idx].ftag.clone();
            oldftag.objno = curobj;
            let peers = self.peer_markers(curobj, oldftag.fileno);
            self.close_current_obj(&oldftag, &peers)
                .map_err(|e| fatal("closing transitioned data object", e))?;
            self.complete_packed_predecessors()?;
        } else {
            let prev = &self.files[self.files.len() - 2];
            let handle = prev
                .handle
                .as_deref()
                .ok_or(StreamError::NotReady("previous file already closed"))?;
            put_tag(handle, &prev.ftag, self.tag_key())
                .map_err(|e| fatal("persisting FINALIZED tag of previous file", e))?;
        }
        Ok(())
    }

    /// Complete every file except the current one (they were packed into
    /// the object that just closed).
    fn complete_packed_predecessors(&mut self) -> Result<(), StreamError> {
        let newfile = self.files.pop().expect("current file present");
        let mut abort = false;
        let predecessors: Vec<StreamFile> = self.files.drain(..).collect();
        for mut file in predecessors.into_iter().rev() {
            if let Err(e) = self.complete_file(&mut file) {
                warn!(fileno = file.ftag.fileno, error = %e, "failed to complete packed file");
                abort = true;
            }
        }
        self.files.push(newfile);
        if abort {
            return Err(StreamError::Catastrophic(
                "failed to complete files of closed object".to_owned(),
            ));
        }
        Ok(())
    }

    /// Open an existing file for READ or EDIT.
    pub fn open(
        slot: &mut Option<DataStream>,
        mode: StreamMode,
        path: &str,
        ns: &Arc<Namespace>,
    ) -> Result<OpenOutcome, StreamError> {
        if mode != StreamMode::Read && mode != StreamMode::Edit {
            return Err(StreamError::InvalidArgument(
                "open supports READ and EDIT streams only",
            ));
        }
        Self::open_internal(slot, mode, path, false, ns)
    }

    /// Open an existing file for READ by reference path.
    pub fn scan(
        slot: &mut Option<DataStream>,
        refpath: &str,
        ns: &Arc<Namespace>,
    ) -> Result<(), StreamError> {
        match Self::open_internal(slot, StreamMode::Read, refpath, true, ns)? {
            OpenOutcome::Opened => Ok(()),
            OpenOutcome::NoTag(_) => Err(StreamError::NotReady(
                "reference target carries no file tag",
            )),
        }
    }

    fn open_internal(
        slot: &mut Option<DataStream>,
        mode: StreamMode,
        path: &str,
        by_ref: bool,
        ns: &Arc<Namespace>,
    ) -> Result<OpenOutcome, StreamError> {
        match slot.take() {
            None => match Self::gen_open(mode, path, by_ref, ns)? {
                Ok(stream) => {
                    *slot = Some(stream);
                    Ok(OpenOutcome::Opened)
                }
                Err(preserved) => Ok(OpenOutcome::NoTag(preserved)),
            },
            Some(stream) if stream.mode != mode => {
                *slot = Some(stream);
                Err(StreamError::InvalidArgument(
                    "received stream does not match requested mode",
                ))
            }
            Some(stream)
                if !Arc::ptr_eq(&stream.ns, ns) || stream.mode == StreamMode::Edit =>
            {
                // edit streams carry nothing useful between files, and a
                // namespace change always forces a fresh stream
                let outcome = match Self::gen_open(mode, path, by_ref, ns)? {
                    Ok(fresh) => {
                        let mut old = Some(stream);
                        if let Err(e) = Self::release(&mut old) {
                            return Err(fatal("releasing previous datastream", e));
                        }
                        *slot = Some(fresh);
                        OpenOutcome::Opened
                    }
                    Err(preserved) => {
                        *slot = Some(stream);
                        OpenOutcome::NoTag(preserved)
                    }
                };
                Ok(outcome)
            }
            Some(mut stream) => {
                // live READ stream: progress to the next file
                match stream.progress_read(path, by_ref) {
                    Ok(outcome) => {
                        *slot = Some(stream);
                        Ok(outcome)
                    }
                    Err(e) if e.is_fatal() => Err(e),
                    Err(e) => {
                        *slot = Some(stream);
                        Err(e)
                    }
                }
            }
        }
    }

    fn progress_read(&mut self, path: &str, by_ref: bool) -> Result<OpenOutcome, StreamError> {
        let origobjno = self.objno;
        let old_ctag = self.files.last().expect("live stream").ftag.ctag.clone();
        let old_streamid = self.files.last().expect("live stream").ftag.streamid.clone();
        let old_ftag = self.files.last().expect("live stream").ftag.clone();

        match self.open_existing_file(path, by_ref) {
            Err(e) => {
                // restore the previous file as current
                self.restore_position(&old_ftag);
                Err(e)
            }
            Ok(Some(preserved)) => {
                self.restore_position(&old_ftag);
                Ok(OpenOutcome::NoTag(preserved))
            }
            Ok(None) => {
                let newfile = self.files.last().expect("file just opened");
                let same_object = newfile.ftag.streamid == old_streamid
                    && newfile.ftag.ctag == old_ctag
                    && newfile.ftag.objno == origobjno;
                if same_object {
                    let offset = newfile.ftag.offset;
                    if let Some(handle) = self.datahandle.as_mut() {
                        let seeked = handle.seek(offset).map_err(data_err);
                        if seeked.map_err(|e| fatal("seeking shared object handle", e))? != offset
                        {
                            return Err(StreamError::Catastrophic(
                                "seek of shared object handle diverged".to_owned(),
                            ));
                        }
                    }
                } else {
                    let mut closetag = old_ftag;
                    closetag.objno = origobjno;
                    // failure here could mean a corrupt object we are now
                    // failing to tag for rebuild, so fail hard
                    self.close_current_obj(&closetag, &[])
                        .map_err(|e| fatal("closing previous read object", e))?;
                }
                // retire the old file reference
                let newfile = self.files.pop().expect("file just opened");
                let old = self.files.pop();
                drop(old);
                self.files.push(newfile);
                Ok(OpenOutcome::Opened)
            }
        }
    }

    fn restore_position(&mut self, old_ftag: &Ftag) {
        // drop the failed new file reference, if one was pushed
        while self.files.len() > 1 {
            self.files.pop();
        }
        self.fileno = old_ftag.fileno;
    }

    // ── Internal file establishment ──────────────────────────────────────────

    fn new_file_tag(&self) -> Ftag {
        let ds = &self.ns.data;
        let ms = &self.ns.meta;
        Ftag {
            major:         FTAG_CURRENT_MAJOR,
            minor:         FTAG_CURRENT_MINOR,
            ctag:          self.ctag.clone(),
            streamid:      self.streamid.clone(),
            fileno:        self.fileno,
            objfiles:      ds.objfiles,
            objsize:       ds.objsize,
            refbreadth:    ms.refbreadth,
            refdepth:      ms.refdepth,
            refdigits:     ms.refdigits,
            objno:         self.objno,
            offset:        self.offset,
            protection:    ds.protection,
            bytes:         0,
            availbytes:    0,
            recoverybytes: 0,
            state:         DataState::Init,
            writeable:     false,
            readable:      false,
            endofstream:   false,
        }
    }

    /// Shift the tag to a fresh object when the current one cannot hold the
    /// file's recovery info or has reached the packing limit.
    fn apply_placement_policy(&self, ftag: &mut Ftag) -> Result<(), StreamError> {
        if ftag.objsize != 0
            && self.recoveryheaderlen + ftag.recoverybytes >= ftag.objsize
        {
            // recovery info can never fit an object of this size; almost
            // certainly a too-long recovery path
            return Err(StreamError::NameTooLong);
        }
        if ftag.objsize != 0 && (ftag.objsize - self.offset) < ftag.recoverybytes {
            debug!("shifting to a new object: current cannot hold recovery info");
            ftag.objno += 1;
            ftag.offset = self.recoveryheaderlen;
        } else if ftag.objfiles != 0 && self.files.len() as u64 >= ftag.objfiles {
            debug!("shifting to a new object: packing limit reached");
            ftag.objno += 1;
            ftag.offset = self.recoveryheaderlen;
        }
        Ok(())
    }

    /// Grow the file-list allocation ahead of a push: initial burst, then
    /// doubling, capped at the packing limit plus one.
    fn reserve_file_slot(&mut self) {
        if self.files.len() < self.files.capacity() {
            return;
        }
        let max = self.ns.data.objfiles as usize + 1;
        let mut target = if self.files.capacity() < INITIAL_FILE_ALLOC {
            INITIAL_FILE_ALLOC
        } else {
            self.files.capacity() * FILE_ALLOC_MULT
        };
        if max > 1 && target > max {
            target = max;
        }
        self.files
            .reserve_exact(target.saturating_sub(self.files.len()).max(1));
    }

    /// Create the reference file, recovery info, tag, and user link for a
    /// new stream file, then make it current.
    fn create_new_file(&mut self, path: &str, mode: u32) -> Result<(), StreamError> {
        self.reserve_file_slot();
        let mdal = Arc::clone(&self.ns.mdal);
        let mut ftag = self.new_file_tag();

        let rpath = refs::reference_path(&ftag)?;
        let handle = mdal
            .open_ref(&rpath, OpenMode::Write, true, mode)
            .map_err(|e| {
                if e.kind() == std::io::ErrorKind::AlreadyExists {
                    StreamError::Busy
                } else {
                    meta_err(e)
                }
            })?;

        // recovery info for the new file
        let cleanup = |mdal: &Arc<dyn MetaStore>, rpath: &str| {
            if mdal.unlink_ref(rpath).is_err() {
                warn!(rpath, "failed to unlink reference file after create failure");
            }
        };
        let stat = match handle.stat() {
            Ok(stat) => stat,
            Err(e) => {
                cleanup(&mdal, &rpath);
                return Err(meta_err(e));
            }
        };
        let finfo = RecoveryFinfo {
            inode:      stat.inode,
            mode:       stat.mode,
            owner:      stat.uid,
            group:      stat.gid,
            size:       0,
            mtime_sec:  stat.mtime.sec,
            mtime_nsec: stat.mtime.nsec as u64,
            eof:        false,
            path:       path.to_owned(),
        };
        let times = [stat.atime, stat.mtime];
        ftag.recoverybytes = finfo.encoded_len() as u64;

        if let Err(e) = self.apply_placement_policy(&mut ftag) {
            cleanup(&mdal, &rpath);
            return Err(e);
        }
        if let Err(e) = put_tag(handle.as_ref(), &ftag, self.tag_key()) {
            cleanup(&mdal, &rpath);
            return Err(e);
        }
        if let Err(e) = self.link_file(&rpath, path) {
            cleanup(&mdal, &rpath);
            return Err(e);
        }

        debug!(
            path,
            fileno = ftag.fileno,
            objno = ftag.objno,
            offset = ftag.offset,
            "created stream file"
        );
        self.files.push(StreamFile {
            handle: Some(handle),
            ftag: ftag.clone(),
            times,
            dotimes: true,
        });
        self.finfo = finfo;
        self.fileno = ftag.fileno;
        self.objno = ftag.objno;
        self.offset = ftag.offset;
        Ok(())
    }

    /// Link `rpath` to `tgt`, unlinking a colliding target exactly once.
    fn link_file(&self, rpath: &str, tgt: &str) -> Result<(), StreamError> {
        let mdal = &self.ns.mdal;
        match mdal.link_ref(false, rpath, tgt) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::AlreadyExists => {
                match mdal.unlink(tgt) {
                    Ok(()) => {}
                    // a peer unlinked the conflicting file for us
                    Err(e2) if e2.kind() == std::io::ErrorKind::NotFound => {}
                    Err(e2) => return Err(meta_err(e2)),
                }
                mdal.link_ref(false, rpath, tgt).map_err(meta_err)
            }
            Err(e) => Err(meta_err(e)),
        }
    }

    /// Open the target of READ/EDIT streams and inherit its position.
    /// `Ok(Some(handle))` preserves the metadata handle of an FTAG-less
    /// file for direct read (READ streams only).
    fn open_existing_file(
        &mut self,
        path: &str,
        by_ref: bool,
    ) -> Result<Option<Box<dyn MetaHandle>>, StreamError> {
        let mdal = &self.ns.mdal;
        let handle = if self.mode == StreamMode::Read {
            if by_ref {
                info!(path, "opening by reference path");
                mdal.open_ref(path, OpenMode::Read, false, 0).map_err(meta_err)?
            } else {
                mdal.open(path, OpenMode::Read).map_err(meta_err)?
            }
        } else {
            mdal.open(path, OpenMode::Write).map_err(meta_err)?
        };

        let ftag = match get_tag(handle.as_ref())? {
            Some(ftag) => ftag,
            None if self.mode == StreamMode::Read => {
                info!(path, "preserving meta handle for target without a file tag");
                return Ok(Some(handle));
            }
            None => {
                return Err(StreamError::NotReady("target file carries no file tag"));
            }
        };

        if self.mode == StreamMode::Edit
            && !ftag.writeable
            && ftag.state != DataState::Comp
        {
            return Err(StreamError::NotReady(
                "cannot edit a non-complete, non-extended file",
            ));
        }
        if self.mode == StreamMode::Read && !ftag.readable {
            return Err(StreamError::NotReady("target file is not yet readable"));
        }

        let stat = handle.stat().map_err(meta_err)?;
        let mut finfo = RecoveryFinfo {
            inode:      stat.inode,
            mode:       stat.mode,
            owner:      stat.uid,
            group:      stat.gid,
            size:       0,
            mtime_sec:  stat.mtime.sec,
            mtime_nsec: stat.mtime.nsec as u64,
            eof:        false,
            path:       String::new(),
        };
        let times = [stat.atime, stat.mtime];
        if self.mode == StreamMode::Read {
            // the metadata file size defines the logical file bounds
            finfo.size = stat.size;
        } else {
            finfo.path = path.to_owned();
        }

        let headerlen =
            RecoveryHeader::new(&ftag.ctag, &ftag.streamid).encoded_len() as u64;

        // the stream inherits identity and position from the tag
        self.ctag = ftag.ctag.clone();
        self.streamid = ftag.streamid.clone();
        self.recoveryheaderlen = headerlen;
        self.fileno = ftag.fileno;
        self.objno = ftag.objno;
        self.offset = ftag.offset;
        self.excessoffset = 0;
        self.finfo = finfo;
        self.files.push(StreamFile {
            handle: Some(handle),
            ftag,
            times,
            dotimes: false,
        });
        Ok(None)
    }

    /// Prepare a file for repack: marker creation, new-tag establishment,
    /// and the reference link into the new stream location.
    fn open_repack_file(&mut self, refpath: &str) -> Result<(), StreamError> {
        self.reserve_file_slot();
        let mdal = Arc::clone(&self.ns.mdal);

        // stash times before anything can modify them
        let stat = mdal.stat_ref(refpath).map_err(meta_err)?;
        let handle = mdal
            .open_ref(refpath, OpenMode::ReadWrite, false, 0)
            .map_err(meta_err)?;
        info!(refpath, "opened repack reference target");
        let times = [stat.atime, stat.mtime];

        let origftag = get_tag(handle.as_ref())?
            .ok_or(StreamError::NotReady("repack target carries no file tag"))?;
        if !origftag.readable {
            return Err(StreamError::NotReady("target file is not yet readable"));
        }

        // exclusive marker creation: one repacker wins
        let markerpath = refs::sibling_path(refpath, &origftag.repack_marker());
        let marker = mdal
            .open_ref(&markerpath, OpenMode::Write, true, 0o700)
            .map_err(|e| {
                if e.kind() == std::io::ErrorKind::AlreadyExists {
                    StreamError::Busy
                } else {
                    meta_err(e)
                }
            })?;
        info!(marker = %markerpath, "created repack marker");
        marker.set_times(times).map_err(meta_err)?;

        // establish the new tag within this stream
        let mut ftag = self.new_file_tag();
        let finfo = RecoveryFinfo {
            inode:      stat.inode,
            mode:       stat.mode,
            owner:      stat.uid,
            group:      stat.gid,
            // repack streams track the expected total file size here
            size:       stat.size,
            mtime_sec:  stat.mtime.sec,
            mtime_nsec: stat.mtime.nsec as u64,
            eof:        false,
            path:       refpath.to_owned(),
        };
        ftag.recoverybytes = finfo.encoded_len() as u64;
        self.apply_placement_policy(&mut ftag)?;

        // the marker holds the new tag for crash recovery
        put_tag(marker.as_ref(), &ftag, TREPACK_XATTR)?;
        drop(marker);

        // link the existing file into the new stream's reference location
        let newrefpath = refs::reference_path(&ftag)?;
        mdal.link_ref(true, refpath, &newrefpath).map_err(meta_err)?;
        info!(from = refpath, to = %newrefpath, "linked repack target into new stream");

        self.files.push(StreamFile {
            handle: Some(handle),
            ftag: ftag.clone(),
            times,
            dotimes: true,
        });
        self.finfo = finfo;
        self.objno = ftag.objno;
        self.offset = ftag.offset;
        Ok(())
    }

    // ── Object plumbing ──────────────────────────────────────────────────────

    fn tag_key(&self) -> &'static str {
        if self.mode == StreamMode::Repack {
            TREPACK_XATTR
        } else {
            FTAG_XATTR
        }
    }

    fn open_current_obj(&mut self) -> Result<(), StreamError> {
        let mut tgttag = self.files.last().expect("current file").ftag.clone();
        tgttag.objno = self.objno;
        tgttag.offset = self.offset;
        let (objname, erasure, location) =
            refs::object_target(&tgttag, self.objno, &self.ns.data.rings)?;

        if self.mode == StreamMode::Read {
            debug!(object = %objname, "opening object for read");
            let mut handle = self
                .ns
                .objects
                .open(&objname, location, erasure, AccessMode::Read)
                .map_err(data_err)?;
            if self.offset != 0 {
                match handle.seek(self.offset) {
                    Ok(offset) if offset == self.offset => {}
                    Ok(_) | Err(_) => {
                        handle.abort();
                        return Err(StreamError::Data(std::io::Error::new(
                            std::io::ErrorKind::Other,
                            format!("failed to seek object {} to {}", self.objno, self.offset),
                        )));
                    }
                }
            }
            self.datahandle = Some(handle);
            return Ok(());
        }

        if matches!(self.mode, StreamMode::Create | StreamMode::Repack) {
            // the file now has (or is about to have) object data
            let key = self.tag_key();
            let file = self.files.last_mut().expect("current file");
            if file.ftag.state < DataState::Sized {
                file.ftag.state = DataState::Sized;
            }
            let handle = file
                .handle
                .as_deref()
                .ok_or(StreamError::NotReady("current file already closed"))?;
            put_tag(handle, &file.ftag, key)?;
        }

        // writers always start at the recovery header boundary
        if self.offset != self.recoveryheaderlen {
            return Err(StreamError::InconsistentLength {
                what:     "stream offset at object open",
                expected: self.recoveryheaderlen as usize,
                actual:   self.offset as usize,
            });
        }
        debug!(object = %objname, "opening object for write");
        let mut handle = self
            .ns
            .objects
            .open(&objname, location, erasure, AccessMode::Write)
            .map_err(data_err)?;
        let header = RecoveryHeader::new(&self.ctag, &self.streamid).encode();
        if header.len() as u64 != self.recoveryheaderlen {
            handle.abort();
            return Err(StreamError::InconsistentLength {
                what:     "recovery header",
                expected: self.recoveryheaderlen as usize,
                actual:   header.len(),
            });
        }
        if let Err(e) = write_all(handle.as_mut(), header.as_bytes()) {
            handle.abort();
            return Err(data_err(e));
        }
        self.datahandle = Some(handle);
        Ok(())
    }

    /// Close the open object handle, recording a rebuild marker when the
    /// close reports recoverable block failures.  `peers` lists the rebuild
    /// marker names of every other file packed into the closed object; the
    /// marker is hard-linked to each so the resource manager can find the
    /// repair work starting from any of them.
    fn close_current_obj(
        &mut self,
        curftag: &Ftag,
        peers: &[String],
    ) -> Result<(), StreamError> {
        let handle = match self.datahandle.take() {
            Some(handle) => handle,
            None => return Ok(()),
        };
        let health = handle.close().map_err(data_err)?;
        if !health.degraded() {
            debug!(objno = curftag.objno, "object closed clean");
            return Ok(());
        }

        // object synced, but with errors: record rebuild work
        let mdal = &self.ns.mdal;
        let ms = &self.ns.meta;
        let rtagstr = Rtag(health).encode();
        let markername = curftag.rebuild_marker(curftag.objno);
        let markerpath = refs::marker_reference_path(
            &markername,
            ms.refbreadth,
            ms.refdepth,
            ms.refdigits,
        )?;
        let marker = match mdal.open_ref(&markerpath, OpenMode::Write, true, 0o700) {
            Ok(marker) => marker,
            Err(e) if e.kind() == std::io::ErrorKind::AlreadyExists => {
                // another object of this stripe already failed
                info!(marker = %markerpath, "rebuild marker already exists");
                return Ok(());
            }
            Err(e) => return Err(meta_err(e)),
        };
        info!(marker = %markerpath, "created rebuild marker");
        let ftagstr = curftag.encode()?;
        marker
            .set_xattr(true, FTAG_XATTR, &ftagstr, XattrSet::Create)
            .map_err(meta_err)?;
        marker
            .set_xattr(true, RTAG_XATTR, &rtagstr, XattrSet::Create)
            .map_err(meta_err)?;
        drop(marker);

        for peer in peers {
            let peerpath = refs::marker_reference_path(
                peer,
                ms.refbreadth,
                ms.refdepth,
                ms.refdigits,
            )?;
            match mdal.link_ref(true, &markerpath, &peerpath) {
                Ok(()) => {}
                Err(e) if e.kind() == std::io::ErrorKind::AlreadyExists => {}
                Err(e) => {
                    warn!(peer = %peerpath, error = %e, "failed to link rebuild marker for packed peer");
                }
            }
        }
        Ok(())
    }

    /// Rebuild marker names of every other open file packed into object
    /// `objno` (files starting in a later object have no data there).
    fn peer_markers(&self, objno: u64, exclude_fileno: u64) -> Vec<String> {
        self.files
            .iter()
            .filter(|f| f.ftag.fileno != exclude_fileno && f.ftag.objno <= objno)
            .map(|f| f.ftag.rebuild_marker(objno))
            .collect()
    }

    /// Write the current file's recovery trailer at the stream position.
    fn put_finfo(&mut self) -> Result<(), StreamError> {
        let recoverybytes = self.files.last().expect("current file").ftag.recoverybytes;
        let size = if self.mode == StreamMode::Edit {
            self.targets(0, Whence::Cur)?.totaloffset
        } else {
            self.files.last().expect("current file").ftag.bytes
        };
        let mut finfo = self.finfo.clone();
        finfo.size = size;
        let encoded = finfo.encode();
        if encoded.len() as u64 > recoverybytes {
            // almost certainly the recovery path changed under us
            return Err(StreamError::NameTooLong);
        }
        let mut buf = encoded.into_bytes();
        buf.resize(recoverybytes as usize, 0);
        let handle = self
            .datahandle
            .as_mut()
            .ok_or(StreamError::NotReady("no object open for recovery info"))?;
        write_all(handle.as_mut(), &buf).map_err(data_err)?;
        self.offset += recoverybytes;
        debug!(bytes = recoverybytes, size, "wrote recovery trailer");
        Ok(())
    }

    /// Finalize the current file: flush its trailer (opening the object if
    /// the file is empty) and mark the tag FINALIZED.  Repeated calls are a
    /// no-op.
    fn fin_file(&mut self) -> Result<(), StreamError> {
        let (bytes, state) = {
            let file = self.files.last().expect("current file");
            (file.ftag.bytes, file.ftag.state)
        };
        if self.mode == StreamMode::Repack && bytes != self.finfo.size {
            return Err(StreamError::NotReady(
                "repacked file has not received its full content",
            ));
        }
        if state < DataState::Fin {
            if bytes == 0 && self.datahandle.is_none() {
                // zero-length file: open the object just to record its trailer
                debug!("opening data object for empty file");
                self.open_current_obj()?;
            }
            if self.datahandle.is_some() {
                self.finfo.eof = true;
                if let Err(e) = self.put_finfo() {
                    self.finfo.eof = false;
                    return Err(e);
                }
            } else {
                // an extended file cannot pack; proceed to the next object
                self.objno += 1;
                self.offset = self.recoveryheaderlen;
            }
            let file = self.files.last_mut().expect("current file");
            file.ftag.state = DataState::Fin;
        }
        Ok(())
    }

    /// Complete a file: persist the COMP+READABLE tag, truncate the
    /// metadata inode to availbytes, apply times, and close the handle.
    /// Repack targets additionally run the marker hand-off.
    fn complete_file(&self, file: &mut StreamFile) -> Result<(), StreamError> {
        let handle = file
            .handle
            .take()
            .ok_or(StreamError::NotReady("file is already closed"))?;
        if file.ftag.writeable
            && matches!(self.mode, StreamMode::Create | StreamMode::Repack)
        {
            return Err(StreamError::NotReady(
                "cannot complete an extended file from its creating stream",
            ));
        }
        if self.mode == StreamMode::Edit && file.ftag.state != DataState::Fin {
            return Err(StreamError::NotReady(
                "cannot complete a non-finalized file from an edit stream",
            ));
        }
        file.ftag.state = DataState::Comp;
        file.ftag.readable = true;
        file.ftag.availbytes = file.ftag.bytes;
        put_tag(handle.as_ref(), &file.ftag, self.tag_key())?;

        if self.mode == StreamMode::Repack {
            self.finish_repacked_file(handle.as_ref(), &file.ftag)?;
        } else {
            handle.truncate(file.ftag.availbytes).map_err(meta_err)?;
        }
        handle.set_times(file.times).map_err(meta_err)?;
        debug!(fileno = file.ftag.fileno, "file complete");
        Ok(())
    }

    /// The repack hand-off: move the original tag onto the marker and the
    /// permanent `OREPACK_TAG`, promote the new tag to the live file's main
    /// FTAG, and rename the marker over the original reference path.
    fn finish_repacked_file(
        &self,
        handle: &dyn MetaHandle,
        newtag: &Ftag,
    ) -> Result<(), StreamError> {
        let mdal = &self.ns.mdal;
        let origstr = handle
            .get_xattr(true, FTAG_XATTR)
            .map_err(meta_err)?
            .ok_or(StreamError::NotReady("repack target lost its original tag"))?;
        let origftag = Ftag::parse(&origstr)?;
        let origrefpath = refs::reference_path(&origftag)?;
        let markerpath = refs::sibling_path(&origrefpath, &origftag.repack_marker());

        // the marker inherits the original tag, making it the GC's handle
        // on the old objects after the final rename
        let marker = mdal
            .open_ref(&markerpath, OpenMode::Write, false, 0)
            .map_err(meta_err)?;
        marker
            .set_xattr(true, FTAG_XATTR, &origstr, XattrSet::Create)
            .map_err(meta_err)?;
        drop(marker);

        // preserve the true original across any number of repacks
        match handle.set_xattr(true, OREPACK_XATTR, &origstr, XattrSet::Create) {
            Ok(()) => {}
            Err(e) if e.kind() == std::io::ErrorKind::AlreadyExists => {}
            Err(e) => return Err(meta_err(e)),
        }

        put_tag(handle, newtag, FTAG_XATTR)?;
        handle.remove_xattr(true, TREPACK_XATTR).map_err(meta_err)?;
        mdal.rename_ref(&markerpath, &origrefpath).map_err(meta_err)?;
        info!(target = %origrefpath, "repacked file promoted; marker renamed for collection");
        Ok(())
    }

    fn targets(&self, delta: i64, whence: Whence) -> Result<StreamPosition, StreamError> {
        let file = self.files.last().expect("current file");
        let filesize = match self.mode {
            StreamMode::Read => self.finfo.size,
            StreamMode::Create | StreamMode::Repack => file.ftag.bytes,
            StreamMode::Edit => file.ftag.availbytes,
        };
        position::target_position(
            position::PositionInputs {
                ftag:              &file.ftag,
                filesize,
                recoveryheaderlen: self.recoveryheaderlen,
                cur_objno:         self.objno,
                cur_offset:        self.offset,
                cur_excessoffset:  self.excessoffset,
                extendable:        matches!(self.mode, StreamMode::Create | StreamMode::Repack),
            },
            delta,
            whence,
        )
    }

    // ── Repack ───────────────────────────────────────────────────────────────

    /// Open (or progress) a REPACK stream for rewriting `refpath`'s data
    /// into new objects.  Concurrent readers keep seeing the original
    /// content until the stream completes the file.
    pub fn repack(
        slot: &mut Option<DataStream>,
        refpath: &str,
        ns: &Arc<Namespace>,
        ctag: &str,
    ) -> Result<(), StreamError> {
        match slot.take() {
            None => {
                *slot = Some(Self::gen_repack(refpath, ns, ctag)?);
                Ok(())
            }
            Some(stream) if stream.mode != StreamMode::Repack => {
                *slot = Some(stream);
                Err(StreamError::InvalidArgument("received a non-REPACK stream"))
            }
            Some(stream) if !Arc::ptr_eq(&stream.ns, ns) => {
                info!("repack stream targets a different namespace; starting fresh");
                let fresh = match Self::gen_repack(refpath, ns, ctag) {
                    Ok(fresh) => fresh,
                    Err(e) => {
                        let mut old = Some(stream);
                        let _ = Self::close(&mut old);
                        return Err(e);
                    }
                };
                let mut old = Some(stream);
                if let Err(e) = Self::close(&mut old) {
                    return Err(fatal("closing previous repack stream", e));
                }
                *slot = Some(fresh);
                Ok(())
            }
            Some(mut stream) => {
                let result = stream.progress_create(refpath, ns, 0);
                match result {
                    Ok(()) => {
                        *slot = Some(stream);
                        Ok(())
                    }
                    Err(e) if e.is_fatal() => Err(e),
                    Err(e) => {
                        *slot = Some(stream);
                        Err(e)
                    }
                }
            }
        }
    }

    /// Clean up the state left by an interrupted repack, given the marker's
    /// reference path.  Safe to apply to any reachable crash state; a
    /// missing marker is a no-op.
    pub fn repack_cleanup(marker_refpath: &str, ns: &Arc<Namespace>) -> Result<(), StreamError> {
        let mdal = &ns.mdal;
        match mdal.stat_ref(marker_refpath) {
            Ok(_) => {}
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(()),
            Err(e) => return Err(meta_err(e)),
        }
        let marker = mdal
            .open_ref(marker_refpath, OpenMode::ReadWrite, false, 0)
            .map_err(meta_err)?;

        // no target tag: the repack never really started
        let tgttagstr = match marker.get_xattr(true, TREPACK_XATTR).map_err(meta_err)? {
            Some(value) => value,
            None => {
                drop(marker);
                mdal.unlink_ref(marker_refpath).map_err(meta_err)?;
                info!(marker = marker_refpath, "unlinked vestigial repack marker");
                return Ok(());
            }
        };
        let tgtftag = Ftag::parse(&tgttagstr)?;
        let tgtrefpath = refs::reference_path(&tgtftag)?;
        let tgtfile = match mdal.open_ref(&tgtrefpath, OpenMode::ReadWrite, false, 0) {
            Ok(handle) => handle,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                // nothing to preserve
                drop(marker);
                mdal.unlink_ref(marker_refpath).map_err(meta_err)?;
                info!(marker = marker_refpath, "unlinked repack marker of vanished target");
                return Ok(());
            }
            Err(e) => return Err(meta_err(e)),
        };
        let active = tgtfile.get_xattr(true, TREPACK_XATTR).map_err(meta_err)?;

        let renametgt = match marker.get_xattr(true, FTAG_XATTR).map_err(meta_err)? {
            None => {
                // the repack was in progress but never chose a final name:
                // tombstone the partial new stream at its reference location
                if let Some(ref activestr) = active {
                    // stash the latest tag on the marker first, so a crash
                    // inside this cleanup can still find it
                    marker
                        .set_xattr(true, TREPACK_XATTR, activestr, XattrSet::Replace)
                        .map_err(meta_err)?;
                    tgtfile.remove_xattr(true, TREPACK_XATTR).map_err(meta_err)?;
                }
                let tagval = active.as_deref().unwrap_or(&tgttagstr);
                marker
                    .set_xattr(true, FTAG_XATTR, tagval, XattrSet::Create)
                    .map_err(meta_err)?;
                tgtrefpath
            }
            Some(realstr) => {
                // a final name was chosen: finish the interrupted completion
                let realftag = Ftag::parse(&realstr)?;
                let renametgt = refs::reference_path(&realftag)?;
                if let Some(ref activestr) = active {
                    tgtfile
                        .set_xattr(true, FTAG_XATTR, activestr, XattrSet::Replace)
                        .map_err(meta_err)?;
                    tgtfile.remove_xattr(true, TREPACK_XATTR).map_err(meta_err)?;
                }
                renametgt
            }
        };
        drop(tgtfile);
        drop(marker);
        mdal.rename_ref(marker_refpath, &renametgt).map_err(meta_err)?;
        info!(marker = marker_refpath, target = %renametgt, "repack marker resolved");
        Ok(())
    }

    // ── Data path ────────────────────────────────────────────────────────────

    /// Read from the current file of a READ stream.  Reads past the end of
    /// real data into a truncate-created zero-fill region return zeroes
    /// without touching the object tier.
    pub fn read(slot: &mut Option<DataStream>, buf: &mut [u8]) -> Result<usize, StreamError> {
        let mut stream = slot
            .take()
            .ok_or(StreamError::InvalidArgument("null stream reference"))?;
        if stream.mode != StreamMode::Read {
            *slot = Some(stream);
            return Err(StreamError::InvalidArgument(
                "stream does not support reading",
            ));
        }
        match stream.read_inner(buf) {
            Ok(n) => {
                *slot = Some(stream);
                Ok(n)
            }
            Err(e) if e.is_fatal() => Err(e),
            Err(e) => {
                *slot = Some(stream);
                Err(e)
            }
        }
    }

    fn read_inner(&mut self, buf: &mut [u8]) -> Result<usize, StreamError> {
        let streampos = self.targets(0, Whence::Cur)?;

        // clamp the request to the logical file bounds
        let mut count = buf.len() as u64;
        let mut zerotail = 0u64;
        if count > streampos.dataremaining + streampos.excessremaining {
            count = streampos.dataremaining + streampos.excessremaining;
        }
        if count > streampos.dataremaining {
            zerotail = count - streampos.dataremaining;
            count = streampos.dataremaining;
        }

        let mut readbytes = 0usize;
        while (readbytes as u64) < count {
            let mut toread = streampos.dataperobj - (self.offset - self.recoveryheaderlen);
            if toread == 0 {
                // exhausted this object; tag-and-close it before moving on
                let mut curftag = self.files.last().expect("current file").ftag.clone();
                curftag.objno = self.objno;
                curftag.offset = self.offset;
                self.close_current_obj(&curftag, &[])
                    .map_err(|e| fatal("closing read object", e))?;
                self.objno += 1;
                self.offset = self.recoveryheaderlen;
                toread = streampos.dataperobj;
                debug!(objno = self.objno, "read progressing into next object");
            }
            toread = toread.min(count - readbytes as u64);
            if self.datahandle.is_none() {
                if let Err(e) = self.open_current_obj() {
                    return if readbytes > 0 { Ok(readbytes) } else { Err(e) };
                }
            }
            let handle = self.datahandle.as_mut().expect("object just opened");
            let got = match handle.read(&mut buf[readbytes..readbytes + toread as usize]) {
                Ok(0) | Err(_) if readbytes > 0 => return Ok(readbytes),
                Ok(0) => {
                    return Err(StreamError::Data(std::io::Error::new(
                        std::io::ErrorKind::UnexpectedEof,
                        "object read made no progress",
                    )))
                }
                Err(e) => return Err(data_err(e)),
                Ok(n) => n,
            };
            readbytes += got;
            self.offset += got as u64;
        }

        if zerotail > 0 {
            buf[readbytes..readbytes + zerotail as usize].fill(0);
            readbytes += zerotail as usize;
            self.excessoffset += zerotail;
        }
        Ok(readbytes)
    }

    /// Write to the current file of a CREATE, EDIT, or REPACK stream.
    pub fn write(slot: &mut Option<DataStream>, buf: &[u8]) -> Result<usize, StreamError> {
        let mut stream = slot
            .take()
            .ok_or(StreamError::InvalidArgument("null stream reference"))?;
        if stream.mode == StreamMode::Read {
            *slot = Some(stream);
            return Err(StreamError::InvalidArgument(
                "stream does not support writing",
            ));
        }
        match stream.write_inner(buf) {
            Ok(n) => {
                *slot = Some(stream);
                Ok(n)
            }
            Err(e) if e.is_fatal() => Err(e),
            Err(e) => {
                *slot = Some(stream);
                Err(e)
            }
        }
    }

    fn write_inner(&mut self, buf: &[u8]) -> Result<usize, StreamError> {
        {
            let ftag = &self.files.last().expect("current file").ftag;
            if matches!(self.mode, StreamMode::Create | StreamMode::Repack) {
                if ftag.state >= DataState::Fin {
                    return Err(StreamError::NotReady(
                        "create stream references a finalized file",
                    ));
                }
                if ftag.writeable {
                    return Err(StreamError::NotReady(
                        "create stream references an extended file",
                    ));
                }
            }
            if self.mode == StreamMode::Edit
                && matches!(ftag.state, DataState::Init | DataState::Comp)
            {
                return Err(StreamError::NotReady(
                    "edit stream references a complete or un-sized file",
                ));
            }
        }

        let streampos = self.targets(0, Whence::Cur)?;
        let mut count = buf.len() as u64;
        if self.mode == StreamMode::Edit && count > streampos.dataremaining {
            count = streampos.dataremaining;
            debug!(resized = count, "write request exceeds file bounds");
        }

        let mut written = 0usize;
        while (written as u64) < count {
            let mut towrite = streampos.dataperobj - (self.offset - self.recoveryheaderlen);
            if towrite == 0 {
                // current object is full: trailer, close, maybe complete
                if self.datahandle.is_some() {
                    self.put_finfo()
                        .map_err(|e| fatal("writing trailing recovery info", e))?;
                }
                let mut curftag = self.files.last().expect("current file").ftag.clone();
                curftag.objno = self.objno;
                curftag.offset = self.offset;
                let peers = self.peer_markers(curftag.objno, curftag.fileno);
                self.close_current_obj(&curftag, &peers)
                    .map_err(|e| fatal("closing filled data object", e))?;
                if matches!(self.mode, StreamMode::Create | StreamMode::Repack) {
                    self.complete_packed_predecessors()?;
                }
                self.objno += 1;
                self.offset = self.recoveryheaderlen;
                towrite = streampos.dataperobj;
                debug!(objno = self.objno, "write progressing into next object");
            }
            towrite = towrite.min(count - written as u64);
            if self.datahandle.is_none() {
                if let Err(e) = self.open_current_obj() {
                    return if written > 0 { Ok(written) } else { Err(e) };
                }
            }
            let handle = self.datahandle.as_mut().expect("object just opened");
            let put = match handle.write(&buf[written..written + towrite as usize]) {
                Ok(0) | Err(_) if written > 0 => return Ok(written),
                Ok(0) => {
                    return Err(StreamError::Data(std::io::Error::new(
                        std::io::ErrorKind::WriteZero,
                        "object write made no progress",
                    )))
                }
                Err(e) => return Err(data_err(e)),
                Ok(n) => n,
            };
            written += put;
            self.offset += put as u64;
            if matches!(self.mode, StreamMode::Create | StreamMode::Repack) {
                self.files.last_mut().expect("current file").ftag.bytes += put as u64;
            }
        }

        // an edit stream that just reached end-of-data flags its trailer
        if self.mode == StreamMode::Edit
            && self.files.last().expect("current file").ftag.state == DataState::Fin
            && written as u64 == streampos.dataremaining
        {
            self.finfo.eof = true;
        }
        Ok(written)
    }

    /// Seek within the current file.  CREATE/REPACK streams cannot seek
    /// backwards; a forward seek writes zeroes up to the target.  EDIT
    /// streams may only land on exact chunk boundaries.
    pub fn seek(
        slot: &mut Option<DataStream>,
        offset: i64,
        whence: Whence,
    ) -> Result<u64, StreamError> {
        let mut stream = slot
            .take()
            .ok_or(StreamError::InvalidArgument("null stream reference"))?;
        let streampos = match stream.targets(offset, whence) {
            Ok(pos) => pos,
            Err(e) => {
                *slot = Some(stream);
                return Err(e);
            }
        };

        if matches!(stream.mode, StreamMode::Create | StreamMode::Repack) {
            let bytes = stream.files.last().expect("current file").ftag.bytes;
            if streampos.totaloffset < bytes {
                *slot = Some(stream);
                return Err(StreamError::InvalidArgument(
                    "cannot reverse seek a create stream",
                ));
            }
            if streampos.totaloffset == bytes {
                *slot = Some(stream);
                return Ok(bytes);
            }
            // a forward seek means writing zeroes until the target
            *slot = Some(stream);
            return Self::zero_fill_to(slot, streampos.totaloffset);
        }

        if stream.mode == StreamMode::Edit && streampos.offset != stream.recoveryheaderlen {
            *slot = Some(stream);
            return Err(StreamError::InvalidArgument(
                "edit streams can only seek to exact chunk bounds",
            ));
        }

        match stream.reposition(streampos) {
            Ok(total) => {
                *slot = Some(stream);
                Ok(total)
            }
            Err(e) => Err(e), // always fatal; stream dropped
        }
    }

    fn reposition(&mut self, streampos: StreamPosition) -> Result<u64, StreamError> {
        if self.objno != streampos.objno && self.datahandle.is_some() {
            if self.mode == StreamMode::Edit {
                self.put_finfo()
                    .map_err(|e| fatal("writing trailing recovery info", e))?;
                // the trailer we just wrote no longer marks end of file
                self.finfo.eof = false;
            }
            let mut curftag = self.files.last().expect("current file").ftag.clone();
            curftag.objno = self.objno;
            curftag.offset = self.offset;
            self.close_current_obj(&curftag, &[])
                .map_err(|e| fatal("closing object during seek", e))?;
        }
        if let Some(handle) = self.datahandle.as_mut() {
            match handle.seek(streampos.offset) {
                Ok(offset) if offset == streampos.offset => {}
                Ok(_) | Err(_) => {
                    return Err(StreamError::Catastrophic(format!(
                        "failed to seek object {} to offset {}",
                        streampos.objno, streampos.offset
                    )));
                }
            }
        }
        self.objno = streampos.objno;
        self.offset = streampos.offset;
        self.excessoffset = streampos.excessoffset;
        Ok(streampos.totaloffset)
    }

    /// Write zeroes on a CREATE/REPACK stream until `target` is reached.
    fn zero_fill_to(slot: &mut Option<DataStream>, target: u64) -> Result<u64, StreamError> {
        let zerobuf = vec![0u8; ZERO_FILL_CHUNK];
        loop {
            let bytes = slot
                .as_ref()
                .ok_or(StreamError::InvalidArgument("null stream reference"))?
                .files
                .last()
                .expect("current file")
                .ftag
                .bytes;
            if bytes >= target {
                return Ok(bytes);
            }
            let chunk = ZERO_FILL_CHUNK.min((target - bytes) as usize);
            let wrote = Self::write(slot, &zerobuf[..chunk])?;
            if wrote != chunk {
                // subsized write: report how far we actually got
                let bytes = slot
                    .as_ref()
                    .map(|s| s.files.last().expect("current file").ftag.bytes)
                    .unwrap_or(0);
                return Ok(bytes);
            }
        }
    }

    // ── Sizing operations ────────────────────────────────────────────────────

    /// Declare the current file's total size and mark it writable by other
    /// processes at exact chunk boundaries (parallel write).  Only the
    /// final, partial object stays inaccessible until this stream is
    /// released.
    pub fn extend(slot: &mut Option<DataStream>, length: u64) -> Result<(), StreamError> {
        let mut stream = slot
            .take()
            .ok_or(StreamError::InvalidArgument("null stream reference"))?;
        let put_back = |slot: &mut Option<DataStream>, stream: DataStream, e: StreamError| {
            *slot = Some(stream);
            Err(e)
        };
        if stream.mode != StreamMode::Create {
            return put_back(
                slot,
                stream,
                StreamError::InvalidArgument("extend requires a CREATE stream"),
            );
        }
        {
            let ftag = &stream.files.last().expect("current file").ftag;
            if ftag.state >= DataState::Fin {
                return put_back(
                    slot,
                    stream,
                    StreamError::NotReady("cannot extend a finalized file"),
                );
            }
            if ftag.bytes != 0 && stream.datahandle.is_some() {
                return put_back(
                    slot,
                    stream,
                    StreamError::NotReady("cannot extend a file that has been written to"),
                );
            }
            if ftag.bytes >= length {
                return put_back(
                    slot,
                    stream,
                    StreamError::InvalidArgument("file already meets or exceeds that length"),
                );
            }
        }
        match stream.extend_inner(length) {
            Ok(()) => {
                *slot = Some(stream);
                Ok(())
            }
            Err(e) if e.is_fatal() => Err(e),
            Err(e) => {
                *slot = Some(stream);
                Err(e)
            }
        }
    }

    fn extend_inner(&mut self, length: u64) -> Result<(), StreamError> {
        if self.files.len() > 1 {
            // clear out the previously packed files first
            let prev_idx = self.files.len() - 2;
            let mut oldftag = self.files[prev_idx].ftag.clone();
            oldftag.objno = self.objno;
            oldftag.offset = self.offset;
            let exclude = self.files.last().expect("current file").ftag.fileno;
            let peers = self.peer_markers(self.objno, exclude);
            self.close_current_obj(&oldftag, &peers)
                .map_err(|e| fatal("closing data object before extend", e))?;
            self.complete_packed_predecessors()?;
            // shift the extended file to a fresh data object
            self.objno += 1;
            self.offset = self.recoveryheaderlen;
            let file = self.files.last_mut().expect("current file");
            file.ftag.objno = self.objno;
            file.ftag.offset = self.offset;
        }

        let origbytes = self.files.last().expect("current file").ftag.bytes;
        self.files.last_mut().expect("current file").ftag.bytes = length;

        let streampos = match self.targets(0, Whence::Set) {
            Ok(pos) => pos,
            Err(e) => {
                self.files.last_mut().expect("current file").ftag.bytes = origbytes;
                return Err(e);
            }
        };
        if streampos.offset != self.recoveryheaderlen {
            self.files.last_mut().expect("current file").ftag.bytes = origbytes;
            return Err(StreamError::InconsistentLength {
                what:     "offset of extended file",
                expected: self.recoveryheaderlen as usize,
                actual:   streampos.offset as usize,
            });
        }
        // objects fully covered by the declared size become available for
        // parallel writers now; the tail object waits for release
        let independent_objs =
            (streampos.dataremaining + streampos.excessremaining) / streampos.dataperobj;
        let file = self.files.last_mut().expect("current file");
        file.ftag.writeable = true;
        if file.ftag.state < DataState::Sized {
            file.ftag.state = DataState::Sized;
        }
        file.ftag.availbytes = independent_objs * streampos.dataperobj;

        let key = self.tag_key();
        let file = self.files.last().expect("current file");
        let handle = file
            .handle
            .as_deref()
            .ok_or(StreamError::NotReady("current file already closed"))?;
        put_tag(handle, &file.ftag, key)
            .map_err(|e| fatal("persisting tag of extended file", e))?;
        info!(length, availbytes = file.ftag.availbytes, "file extended");
        Ok(())
    }

    /// Truncate the current (complete) file of an EDIT stream.
    pub fn truncate(slot: &mut Option<DataStream>, length: u64) -> Result<(), StreamError> {
        let stream = slot
            .as_mut()
            .ok_or(StreamError::InvalidArgument("null stream reference"))?;
        if stream.mode != StreamMode::Edit {
            return Err(StreamError::InvalidArgument("truncate requires an EDIT stream"));
        }
        let file = stream.files.last_mut().expect("current file");
        if file.ftag.state != DataState::Comp {
            return Err(StreamError::NotReady("cannot truncate an incomplete file"));
        }
        let origavail = file.ftag.availbytes;
        if file.ftag.availbytes > length {
            file.ftag.availbytes = length;
        }
        let handle = file
            .handle
            .as_deref()
            .ok_or(StreamError::NotReady("current file already closed"))?;
        if let Err(e) = handle.truncate(length) {
            file.ftag.availbytes = origavail;
            return Err(meta_err(e));
        }
        put_tag(handle, &file.ftag, FTAG_XATTR)?;
        Ok(())
    }

    /// Stash time values to be applied when the file completes.
    pub fn utimens(
        slot: &mut Option<DataStream>,
        times: [TimeSpec; 2],
    ) -> Result<(), StreamError> {
        let stream = slot
            .as_mut()
            .ok_or(StreamError::InvalidArgument("null stream reference"))?;
        if stream.mode != StreamMode::Edit && stream.mode != StreamMode::Create {
            return Err(StreamError::InvalidArgument(
                "utimens requires a CREATE or EDIT stream",
            ));
        }
        let file = stream.files.last_mut().expect("current file");
        if file.ftag.state != DataState::Comp
            && stream.mode != StreamMode::Create
            && !file.ftag.writeable
        {
            return Err(StreamError::NotReady(
                "cannot set times on an incomplete, unreleased file",
            ));
        }
        file.times = times;
        file.dotimes = true;
        stream.finfo.mtime_sec = times[1].sec;
        stream.finfo.mtime_nsec = times[1].nsec as u64;
        Ok(())
    }

    /// Change the recovery pathname recorded in this file's trailers.
    /// CREATE/REPACK streams re-derive the trailer budget (before any data
    /// layout); EDIT streams must fit the frozen budget.
    pub fn set_recovery_path(
        slot: &mut Option<DataStream>,
        recovpath: &str,
    ) -> Result<(), StreamError> {
        let stream = slot
            .as_mut()
            .ok_or(StreamError::InvalidArgument("null stream reference"))?;
        if stream.mode == StreamMode::Read {
            return Err(StreamError::InvalidArgument(
                "read streams carry no recovery path",
            ));
        }
        if matches!(stream.mode, StreamMode::Create | StreamMode::Repack)
            && stream.files.last().expect("current file").ftag.bytes != 0
        {
            return Err(StreamError::NotReady(
                "stream already has associated data",
            ));
        }
        let mut finfo = stream.finfo.clone();
        finfo.path = recovpath.to_owned();
        let newlen = finfo.encoded_len() as u64;

        if stream.mode == StreamMode::Edit {
            if newlen > stream.files.last().expect("current file").ftag.recoverybytes {
                return Err(StreamError::NameTooLong);
            }
        } else {
            let key = stream.tag_key();
            let file = stream.files.last_mut().expect("current file");
            let oldlen = file.ftag.recoverybytes;
            file.ftag.recoverybytes = newlen;
            let handle = file
                .handle
                .as_deref()
                .ok_or(StreamError::NotReady("current file already closed"))?;
            if let Err(e) = put_tag(handle, &file.ftag, key) {
                file.ftag.recoverybytes = oldlen;
                return Err(e);
            }
        }
        stream.finfo = finfo;
        Ok(())
    }

    /// Data offset and size of chunk `chunknum` of the current file, for
    /// coordinating parallel edits.
    pub fn chunk_bounds(
        slot: &mut Option<DataStream>,
        chunknum: u64,
    ) -> Result<(u64, u64), StreamError> {
        let stream = slot
            .as_ref()
            .ok_or(StreamError::InvalidArgument("null stream reference"))?;
        let mut streampos = stream.targets(0, Whence::Set)?;
        streampos.offset -= stream.recoveryheaderlen;

        let first_chunk = streampos.dataperobj - streampos.offset;
        let tgtoff = if chunknum > 0 {
            first_chunk + (chunknum - 1) * streampos.dataperobj
        } else {
            0
        };
        if tgtoff > streampos.dataremaining {
            return Err(StreamError::InvalidArgument(
                "target chunk is not within data bounds",
            ));
        }
        let mut chunksize = if chunknum > 0 {
            streampos.dataperobj
        } else {
            first_chunk
        };
        if tgtoff + chunksize > streampos.dataremaining {
            chunksize = streampos.dataremaining - tgtoff;
        }
        Ok((tgtoff, chunksize))
    }

    /// Read back and parse the recovery trailer of the current file from
    /// the object tier (READ streams).
    pub fn recovery_info(slot: &mut Option<DataStream>) -> Result<RecoveryFinfo, StreamError> {
        let mut stream = slot
            .take()
            .ok_or(StreamError::InvalidArgument("null stream reference"))?;
        if stream.mode != StreamMode::Read {
            *slot = Some(stream);
            return Err(StreamError::InvalidArgument(
                "recovery info requires a READ stream",
            ));
        }
        let result = stream.recovery_info_inner();
        *slot = Some(stream);
        result
    }

    fn recovery_info_inner(&mut self) -> Result<RecoveryFinfo, StreamError> {
        let streampos = self.targets(0, Whence::Cur)?;
        if self.datahandle.is_none() {
            self.open_current_obj()?;
        }
        let recoverybytes = self.files.last().expect("current file").ftag.recoverybytes;

        // the trailer sits at the end of the file's data in this object
        let mut tgtoffset = streampos.offset + streampos.dataremaining;
        if tgtoffset - self.recoveryheaderlen > streampos.dataperobj {
            tgtoffset = self.recoveryheaderlen + streampos.dataperobj;
        }
        let handle = self.datahandle.as_mut().expect("object open");
        if handle.seek(tgtoffset).map_err(data_err)? != tgtoffset {
            return Err(StreamError::Data(std::io::Error::new(
                std::io::ErrorKind::Other,
                "failed to seek to recovery info",
            )));
        }
        let mut infobuf = vec![0u8; recoverybytes as usize];
        let mut filled = 0usize;
        while filled < infobuf.len() {
            let got = handle.read(&mut infobuf[filled..]).map_err(data_err)?;
            if got == 0 {
                break;
            }
            filled += got;
        }
        // restore the read position; losing it costs us the handle
        match handle.seek(streampos.offset) {
            Ok(offset) if offset == streampos.offset => {}
            Ok(_) | Err(_) => {
                warn!("failed to restore read position; dropping object handle");
                if let Some(handle) = self.datahandle.take() {
                    let _ = handle.close();
                }
            }
        }
        // a shorter-than-budget trailer is zero-padded at its tail
        let trimmed = infobuf[..filled]
            .iter()
            .rposition(|&b| b != 0)
            .map(|p| &infobuf[..p + 1])
            .unwrap_or(&[]);
        Ok(RecoveryFinfo::parse(trimmed)?)
    }

    // ── Termination ──────────────────────────────────────────────────────────

    /// Close the stream without completing its current file.  For a CREATE
    /// stream this is only legal on an extended file, whose declared size
    /// it finalizes (all data becomes available; readability arrives when
    /// an edit stream completes the file).
    pub fn release(slot: &mut Option<DataStream>) -> Result<(), StreamError> {
        let mut stream = slot
            .take()
            .ok_or(StreamError::InvalidArgument("null stream reference"))?;
        // every path below consumes the stream
        if matches!(stream.mode, StreamMode::Create | StreamMode::Repack) {
            {
                let writeable = stream.files.last().expect("current file").ftag.writeable;
                if !writeable || stream.files.len() > 1 {
                    return Err(StreamError::InvalidArgument(
                        "cannot release a non-extended file reference",
                    ));
                }
            }
            stream.fin_file()?;
            let file = stream.files.last_mut().expect("current file");
            file.ftag.endofstream = true;
            file.ftag.availbytes = file.ftag.bytes;
        } else if stream.mode == StreamMode::Edit && stream.datahandle.is_some() {
            stream.put_finfo()?;
        }

        let mut curftag = stream.files.last().expect("current file").ftag.clone();
        curftag.objno = stream.objno;
        curftag.offset = stream.offset;
        stream.close_current_obj(&curftag, &[])?;

        if matches!(stream.mode, StreamMode::Create | StreamMode::Repack) {
            let file = stream.files.last().expect("current file");
            let handle = file
                .handle
                .as_deref()
                .ok_or(StreamError::NotReady("current file already closed"))?;
            put_tag(handle, &file.ftag, stream.tag_key())?;
        }
        let file = stream.files.last().expect("current file");
        if matches!(stream.mode, StreamMode::Create | StreamMode::Repack) || file.dotimes {
            if let Some(handle) = file.handle.as_deref() {
                handle.set_times(file.times).map_err(meta_err)?;
            }
        }
        debug!("stream released");
        Ok(())
    }

    /// Close the stream, completing its referenced files.
    pub fn close(slot: &mut Option<DataStream>) -> Result<(), StreamError> {
        let mut stream = slot
            .take()
            .ok_or(StreamError::InvalidArgument("null stream reference"))?;
        // every path below consumes the stream
        match stream.mode {
            StreamMode::Create | StreamMode::Repack => {
                if stream.files.last().expect("current file").ftag.writeable {
                    return Err(StreamError::InvalidArgument(
                        "cannot close an extended file reference",
                    ));
                }
                stream.fin_file()?;
                stream.files.last_mut().expect("current file").ftag.endofstream = true;
            }
            StreamMode::Edit => {
                let ftag = &stream.files.last().expect("current file").ftag;
                if !ftag.writeable || ftag.state != DataState::Fin {
                    return Err(StreamError::InvalidArgument(
                        "cannot close a non-extended, non-finalized file reference",
                    ));
                }
                if stream.datahandle.is_some() {
                    stream.put_finfo()?;
                }
            }
            StreamMode::Read => {}
        }

        let mut curftag = stream.files.last().expect("current file").ftag.clone();
        curftag.objno = stream.objno;
        curftag.offset = stream.offset;
        let peers = stream.peer_markers(curftag.objno, curftag.fileno);
        stream.close_current_obj(&curftag, &peers)?;

        let mut abort = false;
        let files: Vec<StreamFile> = stream.files.drain(..).collect();
        for mut file in files.into_iter().rev() {
            if stream.mode == StreamMode::Read {
                file.handle = None;
            } else if let Err(e) = stream.complete_file(&mut file) {
                warn!(fileno = file.ftag.fileno, error = %e, "failed to complete file at close");
                abort = true;
            }
        }
        if abort {
            return Err(StreamError::Catastrophic(
                "failed to complete files during stream close".to_owned(),
            ));
        }
        debug!("stream closed");
        Ok(())
    }
}

// ── Tests ────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mdal::MemMeta;
    use crate::ne::MemObjects;

    fn test_ns(objsize: u64, objfiles: u64) -> (Arc<Namespace>, MemObjects) {
        let objects = MemObjects::new();
        let ns = Namespace::new(
            "testrepo",
            "gransom-allocation/testns",
            DataScheme {
                protection: Protection { n: 2, e: 1, o: 0, partsz: 512 },
                objfiles,
                objsize,
                rings: Rings::uniform(2, 2, 4).unwrap(),
            },
            MetaScheme { refbreadth: 4, refdepth: 2, refdigits: 3 },
            Arc::new(MemMeta::new()),
            Arc::new(objects.clone()),
        );
        (ns, objects)
    }

    #[test]
    fn create_write_close_read_round_trip() {
        let (ns, _) = test_ns(1024 * 1024, 1);
        let mut stream = None;
        DataStream::create(&mut stream, "file1", &ns, 0o644, "client").unwrap();
        let content = b"hello object tier";
        assert_eq!(
            DataStream::write(&mut stream, content).unwrap(),
            content.len()
        );
        DataStream::close(&mut stream).unwrap();
        assert!(stream.is_none());

        let mut rstream = None;
        match DataStream::open(&mut rstream, StreamMode::Read, "file1", &ns).unwrap() {
            OpenOutcome::Opened => {}
            OpenOutcome::NoTag(_) => panic!("file should carry a tag"),
        }
        let mut buf = vec![0u8; content.len() + 10];
        let got = DataStream::read(&mut rstream, &mut buf).unwrap();
        assert_eq!(&buf[..got], content);
        DataStream::close(&mut rstream).unwrap();
    }

    #[test]
    fn zero_length_file_still_completes() {
        let (ns, objects) = test_ns(1024 * 1024, 4);
        let mut stream = None;
        DataStream::create(&mut stream, "empty", &ns, 0o644, "client").unwrap();
        DataStream::close(&mut stream).unwrap();
        // the object exists just to hold the recovery trailer
        assert_eq!(objects.object_count(), 1);

        let mut rstream = None;
        DataStream::open(&mut rstream, StreamMode::Read, "empty", &ns).unwrap();
        let mut buf = [0u8; 16];
        assert_eq!(DataStream::read(&mut rstream, &mut buf).unwrap(), 0);
        DataStream::close(&mut rstream).unwrap();
    }

    #[test]
    fn wrong_mode_operations_rejected() {
        let (ns, _) = test_ns(1024 * 1024, 4);
        let mut stream = None;
        DataStream::create(&mut stream, "file1", &ns, 0o644, "client").unwrap();
        let mut buf = [0u8; 4];
        assert!(matches!(
            DataStream::read(&mut stream, &mut buf),
            Err(StreamError::InvalidArgument(_))
        ));
        assert!(stream.is_some());
        assert!(matches!(
            DataStream::truncate(&mut stream, 0),
            Err(StreamError::InvalidArgument(_))
        ));
        DataStream::close(&mut stream).unwrap();
    }

    #[test]
    fn create_stream_rejects_reverse_seek() {
        let (ns, _) = test_ns(1024 * 1024, 4);
        let mut stream = None;
        DataStream::create(&mut stream, "file1", &ns, 0o644, "client").unwrap();
        DataStream::write(&mut stream, b"0123456789").unwrap();
        assert!(matches!(
            DataStream::seek(&mut stream, 4, Whence::Set),
            Err(StreamError::InvalidArgument(_))
        ));
        // no-op seek to the current position is fine
        assert_eq!(DataStream::seek(&mut stream, 10, Whence::Set).unwrap(), 10);
        DataStream::close(&mut stream).unwrap();
    }

    #[test]
    fn forward_seek_zero_fills() {
        let (ns, _) = test_ns(1024 * 1024, 4);
        let mut stream = None;
        DataStream::create(&mut stream, "file1", &ns, 0o644, "client").unwrap();
        DataStream::write(&mut stream, b"head").unwrap();
        assert_eq!(DataStream::seek(&mut stream, 100, Whence::Set).unwrap(), 100);
        DataStream::write(&mut stream, b"tail").unwrap();
        DataStream::close(&mut stream).unwrap();

        let mut rstream = None;
        DataStream::open(&mut rstream, StreamMode::Read, "file1", &ns).unwrap();
        let mut buf = vec![0u8; 104];
        assert_eq!(DataStream::read(&mut rstream, &mut buf).unwrap(), 104);
        assert_eq!(&buf[..4], b"head");
        assert!(buf[4..100].iter().all(|&b| b == 0));
        assert_eq!(&buf[100..], b"tail");
        DataStream::close(&mut rstream).unwrap();
    }

    #[test]
    fn utimens_applies_at_completion() {
        let (ns, _) = test_ns(1024 * 1024, 4);
        let mut stream = None;
        DataStream::create(&mut stream, "file1", &ns, 0o644, "client").unwrap();
        DataStream::write(&mut stream, b"content").unwrap();
        let times = [
            TimeSpec { sec: 111, nsec: 0 },
            TimeSpec { sec: 222, nsec: 333 },
        ];
        DataStream::utimens(&mut stream, times).unwrap();
        DataStream::close(&mut stream).unwrap();
        let stat = ns.mdal.stat("file1").unwrap();
        assert_eq!(stat.mtime, times[1]);
        assert_eq!(stat.atime, times[0]);
        // complete file truncated to its data length
        assert_eq!(stat.size, 7);
    }

    #[test]
    fn monotone_fileno_within_stream() {
        let (ns, _) = test_ns(1024 * 1024, 16);
        let mut stream = None;
        for i in 0..5 {
            let path = format!("file{i}");
            DataStream::create(&mut stream, &path, &ns, 0o644, "client").unwrap();
            let tag = stream.as_ref().unwrap().current_ftag();
            assert_eq!(tag.fileno, i);
            DataStream::write(&mut stream, b"x").unwrap();
        }
        DataStream::close(&mut stream).unwrap();
    }

    #[test]
    fn recovery_info_readback() {
        let (ns, _) = test_ns(1024 * 1024, 4);
        let mut stream = None;
        DataStream::create(&mut stream, "file1", &ns, 0o640, "client").unwrap();
        DataStream::write(&mut stream, b"recovery candidate").unwrap();
        DataStream::close(&mut stream).unwrap();

        let mut rstream = None;
        DataStream::open(&mut rstream, StreamMode::Read, "file1", &ns).unwrap();
        let finfo = DataStream::recovery_info(&mut rstream).unwrap();
        assert_eq!(finfo.path, "file1");
        assert_eq!(finfo.size, 18);
        assert!(finfo.eof);
        // the stream still reads correctly afterwards
        let mut buf = [0u8; 18];
        assert_eq!(DataStream::read(&mut rstream, &mut buf).unwrap(), 18);
        assert_eq!(&buf, b"recovery candidate");
        DataStream::close(&mut rstream).unwrap();
    }

    #[test]
    fn set_recovery_path_rederives_budget() {
        let (ns, _) = test_ns(1024 * 1024, 4);
        let mut stream = None;
        DataStream::create(&mut stream, "f", &ns, 0o644, "client").unwrap();
        let before = stream.as_ref().unwrap().current_ftag().recoverybytes;
        DataStream::set_recovery_path(&mut stream, "a/considerably/longer/recovery/path")
            .unwrap();
        let after = stream.as_ref().unwrap().current_ftag().recoverybytes;
        assert!(after > before);
        DataStream::write(&mut stream, b"data").unwrap();
        // too late once data is laid out
        assert!(matches!(
            DataStream::set_recovery_path(&mut stream, "other"),
            Err(StreamError::NotReady(_))
        ));
        DataStream::close(&mut stream).unwrap();
    }
}
