//! streamutil — interactive datastream exerciser.
//!
//! Builds an in-memory namespace (metadata tree + object tier) from the
//! given repository geometry, then drives datastream operations from a
//! line-oriented command loop.  Human-readable diagnostics only; no stable
//! output contract.

use std::io::{self, BufRead, Write as _};
use std::sync::Arc;

use clap::Parser;
use serde::Deserialize;
use tracing_subscriber::EnvFilter;

use packstream::ftag::Protection;
use packstream::mdal::{MemMeta, MetaStore, TimeSpec};
use packstream::ne::MemObjects;
use packstream::refs::Rings;
use packstream::stream::{
    DataScheme, DataStream, MetaScheme, Namespace, OpenOutcome, StreamMode, Whence,
};

const OUTPREFX: &str = "streamutil: ";

#[derive(Parser)]
#[command(name = "streamutil", version, about = "Interactive datastream testing utility")]
struct Cli {
    /// Path of a JSON repository definition (overrides the geometry flags)
    #[arg(short = 'c', long)]
    config: Option<std::path::PathBuf>,
    /// Repository name
    #[arg(long, default_value = "demo-repo")]
    repo: String,
    /// Namespace path
    #[arg(long, default_value = "demo-ns")]
    ns: String,
    /// Object size limit in bytes
    #[arg(long, default_value = "1048576")]
    objsize: u64,
    /// Packing limit (max files per object)
    #[arg(long, default_value = "16")]
    objfiles: u64,
    /// Erasure data parts
    #[arg(short = 'N', default_value = "10")]
    n: u32,
    /// Erasure parity parts
    #[arg(short = 'E', default_value = "2")]
    e: u32,
    /// Erasure part size in bytes
    #[arg(long, default_value = "1024")]
    partsz: u64,
    /// Pod / cap / scatter dimension counts
    #[arg(long, default_value = "4")]
    pods: u32,
    #[arg(long, default_value = "4")]
    caps: u32,
    #[arg(long, default_value = "16")]
    scatters: u32,
}

/// On-disk repository definition, for `-c`.
#[derive(Deserialize)]
struct RepoDef {
    repo:     String,
    ns:       String,
    objsize:  u64,
    objfiles: u64,
    n:        u32,
    e:        u32,
    partsz:   u64,
    pods:     u32,
    caps:     u32,
    scatters: u32,
}

struct Session {
    ns:      Arc<Namespace>,
    objects: MemObjects,
    create:  Option<DataStream>,
    read:    Option<DataStream>,
    edit:    Option<DataStream>,
    repack:  Option<DataStream>,
}

fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_writer(io::stderr)
        .init();

    let cli = Cli::parse();
    let def = match cli.config {
        Some(ref path) => {
            let raw = match std::fs::read_to_string(path) {
                Ok(raw) => raw,
                Err(e) => {
                    eprintln!("{OUTPREFX}failed to read config \"{}\": {e}", path.display());
                    std::process::exit(1);
                }
            };
            match serde_json::from_str::<RepoDef>(&raw) {
                Ok(def) => def,
                Err(e) => {
                    eprintln!("{OUTPREFX}failed to parse config \"{}\": {e}", path.display());
                    std::process::exit(1);
                }
            }
        }
        None => RepoDef {
            repo:     cli.repo,
            ns:       cli.ns,
            objsize:  cli.objsize,
            objfiles: cli.objfiles,
            n:        cli.n,
            e:        cli.e,
            partsz:   cli.partsz,
            pods:     cli.pods,
            caps:     cli.caps,
            scatters: cli.scatters,
        },
    };

    let rings = match Rings::uniform(def.pods, def.caps, def.scatters) {
        Ok(rings) => rings,
        Err(e) => {
            eprintln!("{OUTPREFX}bad placement geometry: {e}");
            std::process::exit(1);
        }
    };
    let objects = MemObjects::new();
    let ns = Namespace::new(
        &def.repo,
        &def.ns,
        DataScheme {
            protection: Protection { n: def.n, e: def.e, o: 0, partsz: def.partsz },
            objfiles: def.objfiles,
            objsize: def.objsize,
            rings,
        },
        MetaScheme { refbreadth: 16, refdepth: 2, refdigits: 3 },
        Arc::new(MemMeta::new()),
        Arc::new(objects.clone()),
    );

    println!(
        "{OUTPREFX}session ready: repo \"{}\", ns \"{}\", objsize {}, objfiles {}, N {}, E {}",
        def.repo, def.ns, def.objsize, def.objfiles, def.n, def.e
    );
    println!("{OUTPREFX}type 'help' for the command list");

    let mut session = Session {
        ns,
        objects,
        create: None,
        read: None,
        edit: None,
        repack: None,
    };
    let stdin = io::stdin();
    loop {
        print!("> ");
        let _ = io::stdout().flush();
        let mut line = String::new();
        match stdin.lock().read_line(&mut line) {
            Ok(0) => break,
            Ok(_) => {}
            Err(e) => {
                eprintln!("{OUTPREFX}stdin failure: {e}");
                break;
            }
        }
        let args: Vec<&str> = line.split_whitespace().collect();
        if args.is_empty() {
            continue;
        }
        if args[0] == "quit" || args[0] == "exit" {
            break;
        }
        if let Err(e) = dispatch(&mut session, &args) {
            println!("{OUTPREFX}{e}");
        }
    }
}

fn dispatch(session: &mut Session, args: &[&str]) -> Result<(), String> {
    let ns = Arc::clone(&session.ns);
    match args[0] {
        "help" => {
            print_help();
            Ok(())
        }
        "create" => {
            let path = required(args, 1, "path")?;
            let ctag = args.get(3).copied().unwrap_or("streamutil-client");
            let mode = args
                .get(2)
                .map(|m| u32::from_str_radix(m, 8).map_err(|e| e.to_string()))
                .transpose()?
                .unwrap_or(0o644);
            DataStream::create(&mut session.create, path, &ns, mode, ctag)
                .map_err(|e| e.to_string())?;
            println!("{OUTPREFX}created \"{path}\"");
            Ok(())
        }
        "open" => {
            let kind = required(args, 1, "read|edit")?;
            let path = required(args, 2, "path")?;
            let (slot, mode) = match kind {
                "read" => (&mut session.read, StreamMode::Read),
                "edit" => (&mut session.edit, StreamMode::Edit),
                _ => return Err("open requires 'read' or 'edit'".to_owned()),
            };
            match DataStream::open(slot, mode, path, &ns).map_err(|e| e.to_string())? {
                OpenOutcome::Opened => println!("{OUTPREFX}opened \"{path}\" for {kind}"),
                OpenOutcome::NoTag(_) => {
                    println!("{OUTPREFX}\"{path}\" has no file tag; handle preserved")
                }
            }
            Ok(())
        }
        "scan" => {
            let refpath = required(args, 1, "refpath")?;
            DataStream::scan(&mut session.read, refpath, &ns).map_err(|e| e.to_string())?;
            println!("{OUTPREFX}scanning \"{refpath}\"");
            Ok(())
        }
        "repack" => {
            let refpath = required(args, 1, "refpath")?;
            let ctag = args.get(2).copied().unwrap_or("streamutil-repack");
            DataStream::repack(&mut session.repack, refpath, &ns, ctag)
                .map_err(|e| e.to_string())?;
            println!("{OUTPREFX}repacking \"{refpath}\"");
            Ok(())
        }
        "repackcleanup" => {
            let refpath = required(args, 1, "marker-refpath")?;
            DataStream::repack_cleanup(refpath, &ns).map_err(|e| e.to_string())?;
            println!("{OUTPREFX}cleanup complete for \"{refpath}\"");
            Ok(())
        }
        "write" => {
            let slot = stream_slot(session, args.get(1).copied())?;
            let count: usize = required(args, 2, "byte-count")?
                .parse()
                .map_err(|e| format!("bad byte count: {e}"))?;
            let pattern: Vec<u8> = (0..count).map(|i| (i % 251) as u8).collect();
            let wrote = DataStream::write(slot, &pattern).map_err(|e| e.to_string())?;
            println!("{OUTPREFX}wrote {wrote} bytes");
            Ok(())
        }
        "read" => {
            let count: usize = required(args, 1, "byte-count")?
                .parse()
                .map_err(|e| format!("bad byte count: {e}"))?;
            let mut buf = vec![0u8; count];
            let got = DataStream::read(&mut session.read, &mut buf).map_err(|e| e.to_string())?;
            println!("{OUTPREFX}read {got} bytes");
            if got > 0 {
                let shown = got.min(32);
                println!("{OUTPREFX}   head: {:?}", &buf[..shown]);
            }
            Ok(())
        }
        "seek" => {
            let slot = stream_slot(session, args.get(1).copied())?;
            let offset: i64 = required(args, 2, "offset")?
                .parse()
                .map_err(|e| format!("bad offset: {e}"))?;
            let whence = match args.get(3).copied().unwrap_or("set") {
                "set" => Whence::Set,
                "cur" => Whence::Cur,
                "end" => Whence::End,
                other => return Err(format!("unknown whence: {other}")),
            };
            let pos = DataStream::seek(slot, offset, whence).map_err(|e| e.to_string())?;
            println!("{OUTPREFX}position now {pos}");
            Ok(())
        }
        "extend" => {
            let length: u64 = required(args, 1, "length")?
                .parse()
                .map_err(|e| format!("bad length: {e}"))?;
            DataStream::extend(&mut session.create, length).map_err(|e| e.to_string())?;
            println!("{OUTPREFX}extended to {length} bytes");
            Ok(())
        }
        "truncate" => {
            let length: u64 = required(args, 1, "length")?
                .parse()
                .map_err(|e| format!("bad length: {e}"))?;
            DataStream::truncate(&mut session.edit, length).map_err(|e| e.to_string())?;
            println!("{OUTPREFX}truncated to {length} bytes");
            Ok(())
        }
        "utime" => {
            let slot = stream_slot(session, args.get(1).copied())?;
            let sec: u64 = required(args, 2, "seconds")?
                .parse()
                .map_err(|e| format!("bad seconds: {e}"))?;
            let times = [TimeSpec { sec, nsec: 0 }; 2];
            DataStream::utimens(slot, times).map_err(|e| e.to_string())?;
            println!("{OUTPREFX}times staged");
            Ok(())
        }
        "chunkbounds" => {
            let slot = stream_slot(session, args.get(1).copied())?;
            let chunk: u64 = required(args, 2, "chunknum")?
                .parse()
                .map_err(|e| format!("bad chunk number: {e}"))?;
            let (offset, size) = DataStream::chunk_bounds(slot, chunk).map_err(|e| e.to_string())?;
            println!("{OUTPREFX}chunk {chunk}: offset {offset}, size {size}");
            Ok(())
        }
        "recovinfo" => {
            let finfo = DataStream::recovery_info(&mut session.read).map_err(|e| e.to_string())?;
            println!("{OUTPREFX}inode {}, size {}, eof {}, path \"{}\"", finfo.inode, finfo.size, finfo.eof, finfo.path);
            Ok(())
        }
        "setrpath" => {
            let slot = stream_slot(session, args.get(1).copied())?;
            let path = required(args, 2, "recovery-path")?;
            DataStream::set_recovery_path(slot, path).map_err(|e| e.to_string())?;
            println!("{OUTPREFX}recovery path updated");
            Ok(())
        }
        "release" => {
            let slot = stream_slot(session, args.get(1).copied())?;
            DataStream::release(slot).map_err(|e| e.to_string())?;
            println!("{OUTPREFX}stream released");
            Ok(())
        }
        "close" => {
            let slot = stream_slot(session, args.get(1).copied())?;
            DataStream::close(slot).map_err(|e| e.to_string())?;
            println!("{OUTPREFX}stream closed");
            Ok(())
        }
        "streaminfo" => {
            let slot = stream_slot(session, args.get(1).copied())?;
            match slot.as_ref() {
                None => println!("{OUTPREFX}stream is not active"),
                Some(stream) => {
                    println!("      -- Client   : \"{}\"", stream.client_tag());
                    println!("      -- StreamID : \"{}\"", stream.stream_id());
                    println!("      -- FileNo   : {}", stream.current_ftag().fileno);
                    println!("      -- ObjNo    : {}", stream.object_no());
                    println!("      -- OpenFiles: {}", stream.file_count());
                }
            }
            Ok(())
        }
        "ls" => {
            let path = args.get(1).copied().unwrap_or("");
            let entries = ns.mdal.read_dir(path).map_err(|e| e.to_string())?;
            for entry in entries {
                println!("   {entry}");
            }
            Ok(())
        }
        "stat" => {
            let path = required(args, 1, "path")?;
            let stat = ns.mdal.stat(path).map_err(|e| e.to_string())?;
            println!(
                "{OUTPREFX}inode {}, size {}, nlink {}, mtime {}.{}",
                stat.inode, stat.size, stat.nlink, stat.mtime.sec, stat.mtime.nsec
            );
            Ok(())
        }
        "mkdir" => {
            let path = required(args, 1, "path")?;
            ns.mdal.mkdir(path).map_err(|e| e.to_string())?;
            Ok(())
        }
        "objects" => {
            for name in session.objects.object_names() {
                let len = session.objects.object_bytes(&name).map(|b| b.len()).unwrap_or(0);
                println!("   {name}  ({len} bytes)");
            }
            Ok(())
        }
        other => Err(format!("unknown command: {other} (try 'help')")),
    }
}

fn required<'a>(args: &[&'a str], idx: usize, what: &str) -> Result<&'a str, String> {
    args.get(idx)
        .copied()
        .ok_or_else(|| format!("missing argument: {what}"))
}

fn stream_slot<'a>(
    session: &'a mut Session,
    kind: Option<&str>,
) -> Result<&'a mut Option<DataStream>, String> {
    match kind {
        Some("create") => Ok(&mut session.create),
        Some("read") => Ok(&mut session.read),
        Some("edit") => Ok(&mut session.edit),
        Some("repack") => Ok(&mut session.repack),
        Some(other) => Err(format!("unknown stream: {other}")),
        None => Err("missing stream argument (create|read|edit|repack)".to_owned()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write as _;

    #[test]
    fn repo_definition_parses_from_file() {
        let mut tmp = tempfile::NamedTempFile::new().unwrap();
        write!(
            tmp,
            r#"{{"repo":"r1","ns":"ns1","objsize":4096,"objfiles":16,
                "n":2,"e":1,"partsz":512,"pods":2,"caps":2,"scatters":4}}"#
        )
        .unwrap();
        let raw = std::fs::read_to_string(tmp.path()).unwrap();
        let def: RepoDef = serde_json::from_str(&raw).unwrap();
        assert_eq!(def.repo, "r1");
        assert_eq!(def.objsize, 4096);
        assert_eq!(def.scatters, 4);
    }
}

fn print_help() {
    println!("   create <path> [octal-mode] [ctag]       : create the next file of the create stream");
    println!("   open <read|edit> <path>                 : open an existing file");
    println!("   scan <refpath>                          : open a file for read by reference path");
    println!("   repack <refpath> [ctag]                 : open or progress a repack stream");
    println!("   repackcleanup <marker-refpath>          : recover an interrupted repack");
    println!("   write <stream> <count>                  : write pattern bytes");
    println!("   read <count>                            : read from the read stream");
    println!("   seek <stream> <offset> [set|cur|end]    : reposition a stream");
    println!("   extend <length>                         : declare size for parallel write");
    println!("   truncate <length>                       : truncate the edit stream's file");
    println!("   utime <stream> <seconds>                : stage time values");
    println!("   chunkbounds <stream> <chunknum>         : report chunk offset/size");
    println!("   recovinfo                               : read back the current recovery trailer");
    println!("   setrpath <stream> <recovery-path>       : change the recovery pathname");
    println!("   release <stream>                        : release without completing");
    println!("   close <stream>                          : close, completing all files");
    println!("   streaminfo <stream>                     : show stream position info");
    println!("   ls [path] / stat <path> / mkdir <path>  : metadata tree operations");
    println!("   objects                                 : list data objects");
    println!("   quit                                    : end the session");
}
