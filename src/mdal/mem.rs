//! In-memory metadata backend.
//!
//! Inode-accurate: hard links share one inode record (size, times, mode,
//! xattrs), link counts are tracked, and an inode survives unlinking while
//! any handle remains open.  All operations take the tree lock, so the
//! linkref / renameref / exclusive-create primitives are atomic exactly the
//! way the stream engine requires.
//!
//! Serves as the metadata plane for the test suites and the `streamutil`
//! session; a production deployment supplies its own [`MetaStore`].

use std::collections::{BTreeMap, HashMap, HashSet};
use std::io;
use std::sync::{Arc, RwLock};

use tracing::warn;

use super::{
    already_exists, not_found, MetaHandle, MetaStat, MetaStore, OpenMode, TimeSpec, XattrSet,
};

#[derive(Debug, Default)]
struct Inode {
    mode:   u32,
    uid:    u32,
    gid:    u32,
    size:   u64,
    atime:  TimeSpec,
    mtime:  TimeSpec,
    xattrs: HashMap<(bool, String), String>,
    nlink:  u32,
    opens:  u32,
}

#[derive(Default)]
struct Tree {
    inodes:    HashMap<u64, Inode>,
    /// user-visible namespace: path → inode
    user:      BTreeMap<String, u64>,
    /// hidden reference tree: refpath → inode
    refs:      BTreeMap<String, u64>,
    /// user-visible directory markers
    dirs:      HashSet<String>,
    next_ino:  u64,
    /// monotonic pseudo-clock for default time values
    tick:      u64,
}

impl Tree {
    fn now(&mut self) -> TimeSpec {
        self.tick += 1;
        TimeSpec { sec: self.tick, nsec: 0 }
    }

    fn drop_if_orphaned(&mut self, ino: u64) {
        if let Some(inode) = self.inodes.get(&ino) {
            if inode.nlink == 0 && inode.opens == 0 {
                self.inodes.remove(&ino);
            }
        }
    }

    fn stat_of(&self, ino: u64) -> io::Result<MetaStat> {
        let inode = self.inodes.get(&ino).ok_or_else(|| not_found("stale inode"))?;
        Ok(MetaStat {
            inode: ino,
            mode:  inode.mode,
            uid:   inode.uid,
            gid:   inode.gid,
            size:  inode.size,
            atime: inode.atime,
            mtime: inode.mtime,
            nlink: inode.nlink,
        })
    }
}

/// Shared-tree in-memory metadata store.
#[derive(Clone, Default)]
pub struct MemMeta {
    tree: Arc<RwLock<Tree>>,
}

impl MemMeta {
    pub fn new() -> Self {
        Self::default()
    }

    fn open_ino(&self, ino: u64) -> Box<dyn MetaHandle> {
        let mut tree = self.tree.write().unwrap();
        if let Some(inode) = tree.inodes.get_mut(&ino) {
            inode.opens += 1;
        }
        Box::new(MemHandle { tree: Arc::clone(&self.tree), ino })
    }
}

impl MetaStore for MemMeta {
    fn open(&self, path: &str, _mode: OpenMode) -> io::Result<Box<dyn MetaHandle>> {
        let ino = {
            let tree = self.tree.read().unwrap();
            *tree.user.get(path).ok_or_else(|| not_found(path))?
        };
        Ok(self.open_ino(ino))
    }

    fn open_ref(
        &self,
        refpath: &str,
        _mode: OpenMode,
        create_excl: bool,
        perms: u32,
    ) -> io::Result<Box<dyn MetaHandle>> {
        let ino = {
            let mut tree = self.tree.write().unwrap();
            match tree.refs.get(refpath) {
                Some(&ino) => {
                    if create_excl {
                        return Err(already_exists(refpath));
                    }
                    ino
                }
                None => {
                    if !create_excl {
                        return Err(not_found(refpath));
                    }
                    let ino = {
                        tree.next_ino += 1;
                        tree.next_ino
                    };
                    let now = tree.now();
                    tree.inodes.insert(
                        ino,
                        Inode {
                            mode: perms,
                            uid: 0,
                            gid: 0,
                            size: 0,
                            atime: now,
                            mtime: now,
                            xattrs: HashMap::new(),
                            nlink: 1,
                            opens: 0,
                        },
                    );
                    tree.refs.insert(refpath.to_owned(), ino);
                    ino
                }
            }
        };
        Ok(self.open_ino(ino))
    }

    fn link_ref(&self, interref: bool, refpath: &str, tgtpath: &str) -> io::Result<()> {
        let mut tree = self.tree.write().unwrap();
        let ino = *tree.refs.get(refpath).ok_or_else(|| not_found(refpath))?;
        let table = if interref { &tree.refs } else { &tree.user };
        if table.contains_key(tgtpath) {
            return Err(already_exists(tgtpath));
        }
        if interref {
            tree.refs.insert(tgtpath.to_owned(), ino);
        } else {
            tree.user.insert(tgtpath.to_owned(), ino);
        }
        if let Some(inode) = tree.inodes.get_mut(&ino) {
            inode.nlink += 1;
        }
        Ok(())
    }

    fn rename_ref(&self, from: &str, to: &str) -> io::Result<()> {
        let mut tree = self.tree.write().unwrap();
        let ino = *tree.refs.get(from).ok_or_else(|| not_found(from))?;
        // rename(2) semantics: a pre-existing target is displaced
        if let Some(old) = tree.refs.insert(to.to_owned(), ino) {
            if old != ino {
                if let Some(inode) = tree.inodes.get_mut(&old) {
                    inode.nlink = inode.nlink.saturating_sub(1);
                }
                tree.drop_if_orphaned(old);
            }
        }
        tree.refs.remove(from);
        Ok(())
    }

    fn unlink(&self, path: &str) -> io::Result<()> {
        let mut tree = self.tree.write().unwrap();
        let ino = tree.user.remove(path).ok_or_else(|| not_found(path))?;
        if let Some(inode) = tree.inodes.get_mut(&ino) {
            inode.nlink = inode.nlink.saturating_sub(1);
        }
        tree.drop_if_orphaned(ino);
        Ok(())
    }

    fn unlink_ref(&self, refpath: &str) -> io::Result<()> {
        let mut tree = self.tree.write().unwrap();
        let ino = tree.refs.remove(refpath).ok_or_else(|| not_found(refpath))?;
        if let Some(inode) = tree.inodes.get_mut(&ino) {
            inode.nlink = inode.nlink.saturating_sub(1);
        }
        tree.drop_if_orphaned(ino);
        Ok(())
    }

    fn stat(&self, path: &str) -> io::Result<MetaStat> {
        let tree = self.tree.read().unwrap();
        let ino = *tree.user.get(path).ok_or_else(|| not_found(path))?;
        tree.stat_of(ino)
    }

    fn stat_ref(&self, refpath: &str) -> io::Result<MetaStat> {
        let tree = self.tree.read().unwrap();
        let ino = *tree.refs.get(refpath).ok_or_else(|| not_found(refpath))?;
        tree.stat_of(ino)
    }

    fn mkdir(&self, path: &str) -> io::Result<()> {
        let mut tree = self.tree.write().unwrap();
        if !tree.dirs.insert(path.trim_end_matches('/').to_owned()) {
            return Err(already_exists(path));
        }
        Ok(())
    }

    fn read_dir(&self, path: &str) -> io::Result<Vec<String>> {
        let tree = self.tree.read().unwrap();
        let prefix = if path.is_empty() || path == "/" {
            String::new()
        } else {
            format!("{}/", path.trim_end_matches('/'))
        };
        let mut entries: Vec<String> = tree
            .user
            .keys()
            .chain(tree.dirs.iter())
            .filter_map(|p| {
                let rest = p.strip_prefix(&prefix)?;
                if rest.is_empty() {
                    return None;
                }
                // only direct children
                Some(match rest.find('/') {
                    Some(split) => format!("{}/", &rest[..split]),
                    None => rest.to_owned(),
                })
            })
            .collect();
        entries.sort_unstable();
        entries.dedup();
        Ok(entries)
    }
}

struct MemHandle {
    tree: Arc<RwLock<Tree>>,
    ino:  u64,
}

impl MemHandle {
    fn with_inode<T>(&self, f: impl FnOnce(&mut Inode) -> io::Result<T>) -> io::Result<T> {
        let mut tree = self.tree.write().unwrap();
        let inode = tree
            .inodes
            .get_mut(&self.ino)
            .ok_or_else(|| not_found("stale inode"))?;
        f(inode)
    }
}

impl MetaHandle for MemHandle {
    fn stat(&self) -> io::Result<MetaStat> {
        let tree = self.tree.read().unwrap();
        tree.stat_of(self.ino)
    }

    fn get_xattr(&self, hidden: bool, name: &str) -> io::Result<Option<String>> {
        let tree = self.tree.read().unwrap();
        let inode = tree
            .inodes
            .get(&self.ino)
            .ok_or_else(|| not_found("stale inode"))?;
        Ok(inode.xattrs.get(&(hidden, name.to_owned())).cloned())
    }

    fn set_xattr(&self, hidden: bool, name: &str, value: &str, mode: XattrSet) -> io::Result<()> {
        self.with_inode(|inode| {
            let key = (hidden, name.to_owned());
            match mode {
                XattrSet::Create if inode.xattrs.contains_key(&key) => {
                    Err(already_exists(name))
                }
                XattrSet::Replace if !inode.xattrs.contains_key(&key) => {
                    Err(not_found(name))
                }
                _ => {
                    inode.xattrs.insert(key, value.to_owned());
                    Ok(())
                }
            }
        })
    }

    fn remove_xattr(&self, hidden: bool, name: &str) -> io::Result<()> {
        self.with_inode(|inode| {
            inode
                .xattrs
                .remove(&(hidden, name.to_owned()))
                .map(|_| ())
                .ok_or_else(|| not_found(name))
        })
    }

    fn truncate(&self, size: u64) -> io::Result<()> {
        self.with_inode(|inode| {
            inode.size = size;
            Ok(())
        })
    }

    fn set_times(&self, times: [TimeSpec; 2]) -> io::Result<()> {
        self.with_inode(|inode| {
            inode.atime = times[0];
            inode.mtime = times[1];
            Ok(())
        })
    }
}

impl Drop for MemHandle {
    fn drop(&mut self) {
        match self.tree.write() {
            Ok(mut tree) => {
                if let Some(inode) = tree.inodes.get_mut(&self.ino) {
                    inode.opens = inode.opens.saturating_sub(1);
                }
                tree.drop_if_orphaned(self.ino);
            }
            Err(_) => warn!(ino = self.ino, "metadata tree lock poisoned during close"),
        }
    }
}

// ── Tests ────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn exclusive_create_and_reopen() {
        let meta = MemMeta::new();
        let h = meta.open_ref("000/ref1", OpenMode::Write, true, 0o600).unwrap();
        drop(h);
        assert!(meta.open_ref("000/ref1", OpenMode::Write, true, 0o600).is_err());
        assert!(meta.open_ref("000/ref1", OpenMode::ReadWrite, false, 0).is_ok());
    }

    #[test]
    fn hard_links_share_inode_state() {
        let meta = MemMeta::new();
        let h = meta.open_ref("000/ref1", OpenMode::Write, true, 0o600).unwrap();
        h.set_xattr(true, "FTAG", "tagvalue", XattrSet::Any).unwrap();
        meta.link_ref(false, "000/ref1", "user/file1").unwrap();

        let via_user = meta.open("user/file1", OpenMode::Read).unwrap();
        assert_eq!(
            via_user.get_xattr(true, "FTAG").unwrap().as_deref(),
            Some("tagvalue")
        );
        via_user.truncate(42).unwrap();
        assert_eq!(h.stat().unwrap().size, 42);
        assert_eq!(h.stat().unwrap().nlink, 2);
    }

    #[test]
    fn link_collision_then_unlink_retry() {
        let meta = MemMeta::new();
        let _a = meta.open_ref("000/a", OpenMode::Write, true, 0o600).unwrap();
        let _b = meta.open_ref("000/b", OpenMode::Write, true, 0o600).unwrap();
        meta.link_ref(false, "000/a", "user/f").unwrap();
        let err = meta.link_ref(false, "000/b", "user/f").unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::AlreadyExists);
        meta.unlink("user/f").unwrap();
        meta.link_ref(false, "000/b", "user/f").unwrap();
    }

    #[test]
    fn xattr_create_is_first_writer_wins() {
        let meta = MemMeta::new();
        let h = meta.open_ref("000/ref", OpenMode::Write, true, 0o600).unwrap();
        h.set_xattr(true, "OREPACK_TAG", "first", XattrSet::Create).unwrap();
        let err = h
            .set_xattr(true, "OREPACK_TAG", "second", XattrSet::Create)
            .unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::AlreadyExists);
        assert_eq!(
            h.get_xattr(true, "OREPACK_TAG").unwrap().as_deref(),
            Some("first")
        );
    }

    #[test]
    fn xattr_replace_requires_presence() {
        let meta = MemMeta::new();
        let h = meta.open_ref("000/ref", OpenMode::Write, true, 0o600).unwrap();
        let err = h.set_xattr(true, "FTAG", "v", XattrSet::Replace).unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::NotFound);
    }

    #[test]
    fn rename_displaces_target() {
        let meta = MemMeta::new();
        let a = meta.open_ref("000/a", OpenMode::Write, true, 0o600).unwrap();
        a.set_xattr(true, "FTAG", "marker-value", XattrSet::Any).unwrap();
        let _b = meta.open_ref("000/b", OpenMode::Write, true, 0o600).unwrap();
        meta.rename_ref("000/a", "000/b").unwrap();
        assert!(meta.stat_ref("000/a").is_err());
        let h = meta.open_ref("000/b", OpenMode::Read, false, 0).unwrap();
        assert_eq!(
            h.get_xattr(true, "FTAG").unwrap().as_deref(),
            Some("marker-value")
        );
    }

    #[test]
    fn inode_survives_unlink_while_open() {
        let meta = MemMeta::new();
        let h = meta.open_ref("000/ref", OpenMode::Write, true, 0o600).unwrap();
        meta.unlink_ref("000/ref").unwrap();
        // still usable through the open handle
        h.truncate(7).unwrap();
        assert_eq!(h.stat().unwrap().size, 7);
        assert_eq!(h.stat().unwrap().nlink, 0);
    }

    #[test]
    fn read_dir_lists_direct_children() {
        let meta = MemMeta::new();
        let _h = meta.open_ref("000/r1", OpenMode::Write, true, 0o600).unwrap();
        meta.link_ref(false, "000/r1", "dir/file1").unwrap();
        meta.link_ref(false, "000/r1", "dir/sub/file2").unwrap();
        meta.link_ref(false, "000/r1", "top").unwrap();
        let entries = meta.read_dir("dir").unwrap();
        assert_eq!(entries, vec!["file1".to_owned(), "sub/".to_owned()]);
        let root = meta.read_dir("").unwrap();
        assert!(root.contains(&"dir/".to_owned()));
        assert!(root.contains(&"top".to_owned()));
    }
}
