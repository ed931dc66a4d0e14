//! In-memory erasure-coded object store.
//!
//! Objects are striped across `N+E` framed parts at `partsz` granularity,
//! rotated by the erasure offset `O`.  Each part carries a little-endian
//! header and a CRC32 integrity word over its payload:
//!
//! ```text
//! Offset  Size  Field
//!    0      4   magic        = "PART" (LE u32)
//!    4      2   version      = 1      (LE u16)
//!    6      2   part_index            (LE u16)
//!    8      2   stripe_width          (LE u16)
//!   10      2   reserved (zero)
//!   12      8   payload_len           (LE u64)
//!   20      4   payload_crc32         (LE u32)
//!   24      …   payload
//! ```
//!
//! Parity parts hold the XOR reduction of each stripe row; full
//! Reed-Solomon math belongs to the production erasure engine behind the
//! same trait.  Damage is injected per block index: a part written while
//! its block is failed gets a corrupted frame, close reports it, reads
//! detect it by CRC, and [`rebuild`](super::ObjectStore::rebuild)
//! re-materializes the flagged parts from the surviving payload.
//!
//! Reads fail only when more blocks are damaged than the stripe can absorb
//! (`errors > E`).

use std::collections::{BTreeSet, HashMap};
use std::io::{self, Cursor};
use std::sync::{Arc, Mutex};

use byteorder::{LittleEndian, ReadBytesExt, WriteBytesExt};
use crc32fast::Hasher;
use tracing::{debug, info};

use super::{AccessMode, ObjectHandle, ObjectHealth, ObjectStore, Rtag};
use crate::ftag::Protection;
use crate::refs::Location;

const PART_MAGIC: u32 = 0x5041_5254; // "PART"
const PART_VERSION: u16 = 1;

struct StoredObject {
    bytes:    Vec<u8>,
    erasure:  Protection,
    location: Location,
    parts:    Vec<Vec<u8>>,
    damaged:  BTreeSet<u32>,
}

#[derive(Default)]
struct Inner {
    objects:      HashMap<String, StoredObject>,
    /// Block index currently unavailable for writes, if any.
    failed_block: Option<u32>,
}

/// Shared in-memory object tier with failure injection.
#[derive(Clone, Default)]
pub struct MemObjects {
    inner: Arc<Mutex<Inner>>,
}

impl MemObjects {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make one block index unavailable: every object synced while this is
    /// set records that block as damaged.
    pub fn set_failed_block(&self, block: Option<u32>) {
        self.inner.lock().unwrap().failed_block = block;
    }

    /// Raw logical content of an object, if present.  Test and diagnostic
    /// surface; production content is only reachable through handles.
    pub fn object_bytes(&self, objname: &str) -> Option<Vec<u8>> {
        self.inner
            .lock()
            .unwrap()
            .objects
            .get(objname)
            .map(|o| o.bytes.clone())
    }

    pub fn object_count(&self) -> usize {
        self.inner.lock().unwrap().objects.len()
    }

    pub fn object_names(&self) -> Vec<String> {
        let inner = self.inner.lock().unwrap();
        let mut names: Vec<String> = inner.objects.keys().cloned().collect();
        names.sort_unstable();
        names
    }
}

impl ObjectStore for MemObjects {
    fn open(
        &self,
        objname: &str,
        location: Location,
        erasure: Protection,
        mode: AccessMode,
    ) -> io::Result<Box<dyn ObjectHandle>> {
        match mode {
            AccessMode::Write => Ok(Box::new(MemWriter {
                inner:    Arc::clone(&self.inner),
                objname:  objname.to_owned(),
                location,
                erasure,
                buffer:   Vec::new(),
                position: 0,
            })),
            AccessMode::Read => {
                let inner = self.inner.lock().unwrap();
                let object = inner
                    .objects
                    .get(objname)
                    .ok_or_else(|| io::Error::new(io::ErrorKind::NotFound, objname.to_owned()))?;
                if object.location != location {
                    return Err(io::Error::new(
                        io::ErrorKind::InvalidInput,
                        format!("location mismatch for object \"{objname}\""),
                    ));
                }
                // verify part integrity up front; damage is tolerated while
                // the stripe can still decode
                let health = object_health(object);
                if health.error_count() > object.erasure.e as usize {
                    return Err(io::Error::new(
                        io::ErrorKind::InvalidData,
                        format!("stripe of \"{objname}\" is beyond recovery"),
                    ));
                }
                Ok(Box::new(MemReader {
                    bytes:    object.bytes.clone(),
                    health,
                    position: 0,
                }))
            }
        }
    }

    fn delete(&self, objname: &str, _location: Location) -> io::Result<()> {
        let mut inner = self.inner.lock().unwrap();
        inner
            .objects
            .remove(objname)
            .map(|_| ())
            .ok_or_else(|| io::Error::new(io::ErrorKind::NotFound, objname.to_owned()))
    }

    fn rebuild(
        &self,
        objname: &str,
        _location: Location,
        _erasure: Protection,
        rtag: &Rtag,
    ) -> io::Result<()> {
        let mut inner = self.inner.lock().unwrap();
        let object = inner
            .objects
            .get_mut(objname)
            .ok_or_else(|| io::Error::new(io::ErrorKind::NotFound, objname.to_owned()))?;
        if rtag.0.width() != object.erasure.stripe_width() {
            return Err(io::Error::new(
                io::ErrorKind::InvalidInput,
                "rtag width disagrees with object stripe",
            ));
        }
        let fresh = frame_parts(&object.bytes, object.erasure);
        for block in 0..rtag.0.width() {
            let flagged =
                rtag.0.data_errors[block as usize] || rtag.0.meta_errors[block as usize];
            if flagged {
                object.parts[block as usize] = fresh[block as usize].clone();
                object.damaged.remove(&block);
            }
        }
        info!(object = objname, "stripe rebuilt");
        Ok(())
    }
}

// ── Writer ───────────────────────────────────────────────────────────────────

struct MemWriter {
    inner:    Arc<Mutex<Inner>>,
    objname:  String,
    location: Location,
    erasure:  Protection,
    buffer:   Vec<u8>,
    position: usize,
}

impl ObjectHandle for MemWriter {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        let end = self.position + buf.len();
        if end > self.buffer.len() {
            self.buffer.resize(end, 0);
        }
        self.buffer[self.position..end].copy_from_slice(buf);
        self.position = end;
        Ok(buf.len())
    }

    fn read(&mut self, _buf: &mut [u8]) -> io::Result<usize> {
        Err(io::Error::new(
            io::ErrorKind::Unsupported,
            "object handle is write-only",
        ))
    }

    fn seek(&mut self, offset: u64) -> io::Result<u64> {
        self.position = offset as usize;
        Ok(offset)
    }

    fn close(self: Box<Self>) -> io::Result<ObjectHealth> {
        let MemWriter { inner, objname, location, erasure, buffer, .. } = *self;
        let mut inner = inner.lock().unwrap();
        let width = erasure.stripe_width();
        let mut health = ObjectHealth::clean(width);
        let mut damaged = BTreeSet::new();
        if let Some(block) = inner.failed_block {
            if block < width {
                health.data_errors[block as usize] = true;
                damaged.insert(block);
            }
        }
        let mut parts = frame_parts(&buffer, erasure);
        for &block in &damaged {
            corrupt_part(&mut parts[block as usize]);
        }
        debug!(
            object = %objname,
            bytes = buffer.len(),
            degraded = health.degraded(),
            "object synced"
        );
        inner.objects.insert(
            objname,
            StoredObject { bytes: buffer, erasure, location, parts, damaged },
        );
        Ok(health)
    }

    fn abort(self: Box<Self>) {
        debug!(object = %self.objname, "object write aborted");
    }
}

// ── Reader ───────────────────────────────────────────────────────────────────

struct MemReader {
    bytes:    Vec<u8>,
    health:   ObjectHealth,
    position: usize,
}

impl ObjectHandle for MemReader {
    fn write(&mut self, _buf: &[u8]) -> io::Result<usize> {
        Err(io::Error::new(
            io::ErrorKind::Unsupported,
            "object handle is read-only",
        ))
    }

    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        let remaining = self.bytes.len().saturating_sub(self.position);
        let count = remaining.min(buf.len());
        buf[..count].copy_from_slice(&self.bytes[self.position..self.position + count]);
        self.position += count;
        Ok(count)
    }

    fn seek(&mut self, offset: u64) -> io::Result<u64> {
        if offset as usize > self.bytes.len() {
            return Err(io::Error::new(
                io::ErrorKind::InvalidInput,
                "seek beyond object bounds",
            ));
        }
        self.position = offset as usize;
        Ok(offset)
    }

    fn close(self: Box<Self>) -> io::Result<ObjectHealth> {
        Ok(self.health)
    }

    fn abort(self: Box<Self>) {}
}

// ── Striping ─────────────────────────────────────────────────────────────────

/// Split a logical byte sequence into `N` data parts plus `E` XOR-parity
/// parts, rotated by the erasure offset.
fn frame_parts(bytes: &[u8], erasure: Protection) -> Vec<Vec<u8>> {
    let n = erasure.n.max(1) as usize;
    let e = erasure.e as usize;
    let width = n + e;
    let partsz = erasure.partsz.max(1) as usize;

    let mut payloads: Vec<Vec<u8>> = vec![Vec::new(); width];
    for row in bytes.chunks(partsz * n) {
        let mut parity = vec![0u8; partsz];
        for i in 0..n {
            let start = (i * partsz).min(row.len());
            let end = ((i + 1) * partsz).min(row.len());
            let mut cell = row[start..end].to_vec();
            cell.resize(partsz, 0);
            for (p, c) in parity.iter_mut().zip(&cell) {
                *p ^= c;
            }
            payloads[i].extend_from_slice(&cell);
        }
        for j in 0..e {
            payloads[n + j].extend_from_slice(&parity);
        }
    }

    // apply the stripe rotation, then frame each payload
    let offset = erasure.o as usize % width;
    let mut parts = vec![Vec::new(); width];
    for (logical, payload) in payloads.into_iter().enumerate() {
        let physical = (logical + offset) % width;
        parts[physical] = frame_one(physical as u16, width as u16, &payload);
    }
    parts
}

fn frame_one(index: u16, width: u16, payload: &[u8]) -> Vec<u8> {
    let mut hasher = Hasher::new();
    hasher.update(payload);
    let crc = hasher.finalize();

    let mut frame = Vec::with_capacity(24 + payload.len());
    frame.write_u32::<LittleEndian>(PART_MAGIC).unwrap();
    frame.write_u16::<LittleEndian>(PART_VERSION).unwrap();
    frame.write_u16::<LittleEndian>(index).unwrap();
    frame.write_u16::<LittleEndian>(width).unwrap();
    frame.write_u16::<LittleEndian>(0).unwrap();
    frame.write_u64::<LittleEndian>(payload.len() as u64).unwrap();
    frame.write_u32::<LittleEndian>(crc).unwrap();
    frame.extend_from_slice(payload);
    frame
}

/// Verify one framed part: magic, version, declared length, payload CRC32.
fn part_intact(frame: &[u8]) -> bool {
    let mut cursor = Cursor::new(frame);
    let magic = match cursor.read_u32::<LittleEndian>() {
        Ok(m) => m,
        Err(_) => return false,
    };
    let version = cursor.read_u16::<LittleEndian>().unwrap_or(0);
    let _index = cursor.read_u16::<LittleEndian>().unwrap_or(0);
    let _width = cursor.read_u16::<LittleEndian>().unwrap_or(0);
    let _reserved = cursor.read_u16::<LittleEndian>().unwrap_or(0);
    let len = cursor.read_u64::<LittleEndian>().unwrap_or(0) as usize;
    let crc = cursor.read_u32::<LittleEndian>().unwrap_or(0);
    if magic != PART_MAGIC || version != PART_VERSION || frame.len() != 24 + len {
        return false;
    }
    let mut hasher = Hasher::new();
    hasher.update(&frame[24..]);
    hasher.finalize() == crc
}

fn corrupt_part(frame: &mut Vec<u8>) {
    // flip a payload bit so the CRC check fails
    if frame.len() > 24 {
        frame[24] ^= 0xff;
    } else {
        frame.push(0xff);
    }
}

fn object_health(object: &StoredObject) -> ObjectHealth {
    let width = object.erasure.stripe_width();
    let mut health = ObjectHealth::clean(width);
    for (index, part) in object.parts.iter().enumerate() {
        if !part_intact(part) {
            health.data_errors[index] = true;
        }
    }
    health
}

// ── Tests ────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    fn erasure() -> Protection {
        Protection { n: 2, e: 1, o: 1, partsz: 16 }
    }

    fn location() -> Location {
        Location { pod: 0, cap: 0, scatter: 0 }
    }

    fn write_object(store: &MemObjects, name: &str, content: &[u8]) -> ObjectHealth {
        let mut handle = store
            .open(name, location(), erasure(), AccessMode::Write)
            .unwrap();
        handle.write(content).unwrap();
        handle.close().unwrap()
    }

    #[test]
    fn write_read_round_trip() {
        let store = MemObjects::new();
        let content: Vec<u8> = (0..200u16).map(|i| (i % 251) as u8).collect();
        let health = write_object(&store, "obj.0", &content);
        assert!(!health.degraded());

        let mut handle = store
            .open("obj.0", location(), erasure(), AccessMode::Read)
            .unwrap();
        let mut out = vec![0u8; content.len()];
        assert_eq!(handle.read(&mut out).unwrap(), content.len());
        assert_eq!(out, content);
        assert!(!handle.close().unwrap().degraded());
    }

    #[test]
    fn seek_and_partial_read() {
        let store = MemObjects::new();
        write_object(&store, "obj.0", b"0123456789");
        let mut handle = store
            .open("obj.0", location(), erasure(), AccessMode::Read)
            .unwrap();
        handle.seek(4).unwrap();
        let mut out = [0u8; 3];
        assert_eq!(handle.read(&mut out).unwrap(), 3);
        assert_eq!(&out, b"456");
    }

    #[test]
    fn injected_failure_reported_then_rebuilt() {
        let store = MemObjects::new();
        store.set_failed_block(Some(1));
        let health = write_object(&store, "obj.0", b"some object content here");
        assert!(health.degraded());
        assert_eq!(health.error_count(), 1);
        store.set_failed_block(None);

        // still readable: one error within E=1
        let handle = store
            .open("obj.0", location(), erasure(), AccessMode::Read)
            .unwrap();
        let observed = handle.close().unwrap();
        assert!(observed.degraded());

        store
            .rebuild("obj.0", location(), erasure(), &Rtag(observed))
            .unwrap();
        let handle = store
            .open("obj.0", location(), erasure(), AccessMode::Read)
            .unwrap();
        assert!(!handle.close().unwrap().degraded());
    }

    #[test]
    fn delete_removes_object() {
        let store = MemObjects::new();
        write_object(&store, "obj.0", b"x");
        store.delete("obj.0", location()).unwrap();
        assert!(store
            .open("obj.0", location(), erasure(), AccessMode::Read)
            .is_err());
        assert!(store.delete("obj.0", location()).is_err());
    }
}
