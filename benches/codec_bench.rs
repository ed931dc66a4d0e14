use criterion::{criterion_group, criterion_main, Criterion};
use packstream::ftag::{DataState, Ftag, Protection};
use packstream::recovery::RecoveryFinfo;

fn bench_codecs(c: &mut Criterion) {
    let finfo = RecoveryFinfo {
        inode:      123456,
        mode:       0o100644,
        owner:      1000,
        group:      1000,
        size:       4 * 1024 * 1024,
        mtime_sec:  1690000000,
        mtime_nsec: 987654321,
        eof:        true,
        path:       "gransom-allocation/some/moderately/long/path".to_owned(),
    };
    let finfo_str = finfo.encode();
    c.bench_function("finfo_encode", |b| b.iter(|| finfo.encode()));
    c.bench_function("finfo_parse", |b| {
        b.iter(|| RecoveryFinfo::parse(finfo_str.as_bytes()).unwrap())
    });

    let ftag = Ftag {
        major:         0,
        minor:         1,
        ctag:          "bench-client".to_owned(),
        streamid:      "repo#ns#1690000000.987654321".to_owned(),
        fileno:        42,
        objfiles:      4096,
        objsize:       1024 * 1024 * 1024,
        refbreadth:    128,
        refdepth:      2,
        refdigits:     3,
        objno:         17,
        offset:        4096,
        protection:    Protection { n: 10, e: 2, o: 7, partsz: 1024 },
        bytes:         123456789,
        availbytes:    123456789,
        recoverybytes: 256,
        state:         DataState::Comp,
        writeable:     false,
        readable:      true,
        endofstream:   false,
    };
    let ftag_str = ftag.encode().unwrap();
    c.bench_function("ftag_encode", |b| b.iter(|| ftag.encode().unwrap()));
    c.bench_function("ftag_parse", |b| b.iter(|| Ftag::parse(&ftag_str).unwrap()));
}

criterion_group!(benches, bench_codecs);
criterion_main!(benches);
