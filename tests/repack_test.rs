//! Repack protocol: live rewrite of file content into a new stream, and
//! crash-state recovery through the repack marker.

use std::sync::Arc;

use packstream::ftag::{Ftag, Protection};
use packstream::mdal::{
    MemMeta, MetaHandle, MetaStore, OpenMode, FTAG_XATTR, OREPACK_XATTR, TREPACK_XATTR,
};
use packstream::ne::MemObjects;
use packstream::refs::{self, Rings};
use packstream::stream::{
    DataScheme, DataStream, MetaScheme, Namespace, OpenOutcome, StreamMode,
};

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

fn pattern(salt: u8, len: usize) -> Vec<u8> {
    (0..len).map(|i| (i as u64 * 37 + salt as u64) as u8).collect()
}

fn write_file(
    stream: &mut Option<DataStream>,
    ns: &Arc<Namespace>,
    path: &str,
    content: &[u8],
) -> Ftag {
    DataStream::create(stream, path, ns, 0o644, "REPACK-TEST-CLIENT").unwrap();
    let mut written = 0;
    while written < content.len() {
        written += DataStream::write(stream, &content[written..]).unwrap();
    }
    stream.as_ref().unwrap().current_ftag().clone()
}

fn read_file(ns: &Arc<Namespace>, path: &str) -> Vec<u8> {
    let mut stream = None;
    match DataStream::open(&mut stream, StreamMode::Read, path, ns).unwrap() {
        OpenOutcome::Opened => {}
        OpenOutcome::NoTag(_) => panic!("\"{path}\" carries no file tag"),
    }
    let mut out = Vec::new();
    let mut buf = vec![0u8; 64 * 1024];
    loop {
        let got = DataStream::read(&mut stream, &mut buf).unwrap();
        if got == 0 {
            break;
        }
        out.extend_from_slice(&buf[..got]);
    }
    DataStream::close(&mut stream).unwrap();
    out
}

fn marker_path_of(orig_refpath: &str, origftag: &Ftag) -> String {
    refs::sibling_path(orig_refpath, &origftag.repack_marker())
}

// ── Happy path ───────────────────────────────────────────────────────────────

#[test]
fn repack_rewrites_multi_object_file() {
    let (ns, _) = test_ns(4096, 16);
    let content = pattern(1, 10_000);

    let mut cstream = None;
    let origftag = write_file(&mut cstream, &ns, "file3", &content);
    DataStream::close(&mut cstream).unwrap();
    let orig_refpath = refs::reference_path(&origftag).unwrap();

    // open the repack stream, then a read stream on the same file; the
    // reader keeps seeing the original content through the rewrite
    let mut rpstream = None;
    DataStream::repack(&mut rpstream, &orig_refpath, &ns, "REPACKER").unwrap();
    let newftag = rpstream.as_ref().unwrap().current_ftag().clone();
    assert_ne!(newftag.streamid, origftag.streamid);

    let mut rstream = None;
    DataStream::scan(&mut rstream, &orig_refpath, &ns).unwrap();
    let mut copied = 0usize;
    let mut buf = vec![0u8; 2048];
    while copied < content.len() {
        let got = DataStream::read(&mut rstream, &mut buf).unwrap();
        assert!(got > 0, "reader starved during repack");
        assert_eq!(&buf[..got], &content[copied..copied + got]);
        let wrote = DataStream::write(&mut rpstream, &buf[..got]).unwrap();
        assert_eq!(wrote, got);
        copied += got;
    }
    DataStream::release(&mut rstream).unwrap();
    DataStream::close(&mut rpstream).unwrap();

    // the live file now carries the new tag; the original tag survives
    // under OREPACK; the renamed marker holds the original tag for GC
    let live = ns.mdal.open("file3", OpenMode::Read).unwrap();
    let livetag = Ftag::parse(&live.get_xattr(true, FTAG_XATTR).unwrap().unwrap()).unwrap();
    assert_eq!(livetag.streamid, newftag.streamid);
    assert!(live.get_xattr(true, TREPACK_XATTR).unwrap().is_none());
    let orepack =
        Ftag::parse(&live.get_xattr(true, OREPACK_XATTR).unwrap().unwrap()).unwrap();
    assert_eq!(orepack.streamid, origftag.streamid);
    drop(live);

    let tombstone = ns
        .mdal
        .open_ref(&orig_refpath, OpenMode::Read, false, 0)
        .unwrap();
    let tombtag =
        Ftag::parse(&tombstone.get_xattr(true, FTAG_XATTR).unwrap().unwrap()).unwrap();
    assert_eq!(tombtag.streamid, origftag.streamid);
    drop(tombstone);

    // the marker name itself is gone
    let markerpath = marker_path_of(&orig_refpath, &origftag);
    assert!(ns.mdal.stat_ref(&markerpath).is_err());

    assert_eq!(read_file(&ns, "file3"), content);
}

#[test]
fn repack_requires_full_rewrite() {
    let (ns, _) = test_ns(4096, 16);
    let content = pattern(2, 5000);
    let mut cstream = None;
    let origftag = write_file(&mut cstream, &ns, "short", &content);
    DataStream::close(&mut cstream).unwrap();
    let refpath = refs::reference_path(&origftag).unwrap();

    let mut rpstream = None;
    DataStream::repack(&mut rpstream, &refpath, &ns, "REPACKER").unwrap();
    DataStream::write(&mut rpstream, &content[..100]).unwrap();
    // closing before the full content arrived must fail
    let err = DataStream::close(&mut rpstream).unwrap_err();
    assert!(matches!(err, packstream::StreamError::NotReady(_)));
}

#[test]
fn second_repack_preserves_true_original_tag() {
    let (ns, _) = test_ns(4096, 16);
    let content = pattern(3, 2000);
    let mut cstream = None;
    let origftag = write_file(&mut cstream, &ns, "twice", &content);
    DataStream::close(&mut cstream).unwrap();

    for round in 0..2 {
        let live = ns.mdal.open("twice", OpenMode::Read).unwrap();
        let curtag =
            Ftag::parse(&live.get_xattr(true, FTAG_XATTR).unwrap().unwrap()).unwrap();
        drop(live);
        let refpath = refs::reference_path(&curtag).unwrap();

        let mut rpstream = None;
        DataStream::repack(&mut rpstream, &refpath, &ns, "REPACKER").unwrap();
        let mut rstream = None;
        DataStream::scan(&mut rstream, &refpath, &ns).unwrap();
        let mut buf = vec![0u8; 4096];
        loop {
            let got = DataStream::read(&mut rstream, &mut buf).unwrap();
            if got == 0 {
                break;
            }
            DataStream::write(&mut rpstream, &buf[..got]).unwrap();
        }
        DataStream::release(&mut rstream).unwrap();
        DataStream::close(&mut rpstream).unwrap();
        assert_eq!(read_file(&ns, "twice"), content, "round {round}");
    }

    // OREPACK still names the very first stream
    let live = ns.mdal.open("twice", OpenMode::Read).unwrap();
    let orepack =
        Ftag::parse(&live.get_xattr(true, OREPACK_XATTR).unwrap().unwrap()).unwrap();
    assert_eq!(orepack.streamid, origftag.streamid);
}

// ── Crash recovery ───────────────────────────────────────────────────────────

#[test]
fn cleanup_after_crash_before_any_write() {
    let (ns, _) = test_ns(4096, 16);
    let content = pattern(4, 300);
    let mut cstream = None;
    let origftag = write_file(&mut cstream, &ns, "file1", &content);
    DataStream::close(&mut cstream).unwrap();
    let orig_refpath = refs::reference_path(&origftag).unwrap();
    let markerpath = marker_path_of(&orig_refpath, &origftag);

    // start a repack and lose the process before any data moves
    let mut rpstream = None;
    DataStream::repack(&mut rpstream, &orig_refpath, &ns, "REPACKER").unwrap();
    assert!(ns.mdal.stat_ref(&markerpath).is_ok());
    drop(rpstream.take());

    DataStream::repack_cleanup(&markerpath, &ns).unwrap();
    // marker gone, file untouched and readable with original bytes
    assert!(ns.mdal.stat_ref(&markerpath).is_err());
    assert_eq!(read_file(&ns, "file1"), content);
    let live = ns.mdal.open("file1", OpenMode::Read).unwrap();
    let livetag =
        Ftag::parse(&live.get_xattr(true, FTAG_XATTR).unwrap().unwrap()).unwrap();
    assert_eq!(livetag.streamid, origftag.streamid);
    drop(live);

    // applying the cleanup again is a no-op
    DataStream::repack_cleanup(&markerpath, &ns).unwrap();
    assert_eq!(read_file(&ns, "file1"), content);
}

#[test]
fn cleanup_after_crash_mid_write() {
    let (ns, _) = test_ns(4096, 16);
    let content = pattern(5, 9000);
    let mut cstream = None;
    let origftag = write_file(&mut cstream, &ns, "file1", &content);
    DataStream::close(&mut cstream).unwrap();
    let orig_refpath = refs::reference_path(&origftag).unwrap();
    let markerpath = marker_path_of(&orig_refpath, &origftag);

    // crash part-way through the rewrite: the live file now carries an
    // in-progress tag under TREPACK
    let mut rpstream = None;
    DataStream::repack(&mut rpstream, &orig_refpath, &ns, "REPACKER").unwrap();
    DataStream::write(&mut rpstream, &content[..2000]).unwrap();
    drop(rpstream.take());

    {
        let live = ns.mdal.open("file1", OpenMode::Read).unwrap();
        assert!(live.get_xattr(true, TREPACK_XATTR).unwrap().is_some());
    }

    DataStream::repack_cleanup(&markerpath, &ns).unwrap();
    assert!(ns.mdal.stat_ref(&markerpath).is_err());
    let live = ns.mdal.open("file1", OpenMode::Read).unwrap();
    // the in-progress tag is gone and the original remains authoritative
    assert!(live.get_xattr(true, TREPACK_XATTR).unwrap().is_none());
    let livetag =
        Ftag::parse(&live.get_xattr(true, FTAG_XATTR).unwrap().unwrap()).unwrap();
    assert_eq!(livetag.streamid, origftag.streamid);
    drop(live);
    assert_eq!(read_file(&ns, "file1"), content);

    DataStream::repack_cleanup(&markerpath, &ns).unwrap();
}

#[test]
fn cleanup_of_missing_marker_is_noop() {
    let (ns, _) = test_ns(4096, 16);
    DataStream::repack_cleanup("000/001/absent|repack", &ns).unwrap();
}
