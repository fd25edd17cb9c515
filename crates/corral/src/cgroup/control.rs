//! Descriptor-relative access to cgroup control files.

use std::fs::File;
use std::io::{self, Read, Write};
use std::os::fd::OwnedFd;
use std::path::{Path, PathBuf};

use rustix::fs::{AtFlags, Mode, OFlags};

use super::version::HierarchyKind;

/// An open cgroup directory.
///
/// All control-file access goes through the directory descriptor, so a
/// group keeps addressing the same kernel object even if its path is
/// renamed or recreated underneath it.
#[derive(Debug)]
pub(crate) struct ControlDir {
    fd: OwnedFd,
    path: PathBuf,
    kind: HierarchyKind,
}

impl ControlDir {
    /// Open an existing cgroup directory by path.
    pub(crate) fn open(path: &Path, kind: HierarchyKind) -> io::Result<Self> {
        let fd = rustix::fs::open(
            path,
            OFlags::RDONLY | OFlags::DIRECTORY | OFlags::CLOEXEC,
            Mode::empty(),
        )?;

        Ok(Self {
            fd,
            path: path.to_path_buf(),
            kind,
        })
    }

    /// Open a child cgroup of this directory.
    pub(crate) fn open_child(&self, name: &str) -> io::Result<Self> {
        let fd = rustix::fs::openat(
            &self.fd,
            name,
            OFlags::RDONLY | OFlags::DIRECTORY | OFlags::CLOEXEC,
            Mode::empty(),
        )?;

        Ok(Self {
            fd,
            path: self.path.join(name),
            kind: self.kind,
        })
    }

    /// Create a child cgroup. Fails with `EEXIST` if it is already there.
    pub(crate) fn make_child(&self, name: &str) -> io::Result<()> {
        rustix::fs::mkdirat(&self.fd, name, Mode::from_raw_mode(0o755))?;
        Ok(())
    }

    /// Remove a child cgroup.
    ///
    /// The kernel accepts `rmdir` on a cgroup that still holds its control
    /// files; an emulated tree holds regular files and is removed recursively.
    pub(crate) fn remove_child(&self, name: &str) -> io::Result<()> {
        match self.kind {
            HierarchyKind::V2 => {
                rustix::fs::unlinkat(&self.fd, name, AtFlags::REMOVEDIR)?;
                Ok(())
            }
            HierarchyKind::Emulated => std::fs::remove_dir_all(self.path.join(name)),
        }
    }

    /// Names of the child cgroups, sorted.
    pub(crate) fn children(&self) -> io::Result<Vec<String>> {
        let mut names = Vec::new();

        for entry in std::fs::read_dir(&self.path)? {
            let entry = entry?;
            if entry.file_type()?.is_dir() {
                if let Some(name) = entry.file_name().to_str() {
                    names.push(name.to_string());
                }
            }
        }

        names.sort();
        Ok(names)
    }

    /// Replace the value of a control file with a single write.
    pub(crate) fn write(&self, file: &str, value: &str) -> io::Result<()> {
        self.write_with(file, value, OFlags::TRUNC)
    }

    /// Append a value to a control file (`cgroup.procs` and friends).
    pub(crate) fn append(&self, file: &str, value: &str) -> io::Result<()> {
        self.write_with(file, value, OFlags::APPEND)
    }

    fn write_with(&self, file: &str, value: &str, mode: OFlags) -> io::Result<()> {
        let mut flags = OFlags::WRONLY | OFlags::CLOEXEC | mode;
        if self.kind == HierarchyKind::Emulated {
            // The kernel creates control files; an emulated tree must create them itself.
            flags |= OFlags::CREATE;
        }

        let fd = rustix::fs::openat(&self.fd, file, flags, Mode::from_raw_mode(0o644))?;
        let mut handle = File::from(fd);
        handle.write_all(format!("{value}\n").as_bytes())?;

        tracing::debug!(path = %self.path.join(file).display(), value, "Wrote control file");
        Ok(())
    }

    /// Read a control file.
    pub(crate) fn read(&self, file: &str) -> io::Result<String> {
        let fd = rustix::fs::openat(
            &self.fd,
            file,
            OFlags::RDONLY | OFlags::CLOEXEC,
            Mode::empty(),
        )?;

        let mut content = String::new();
        File::from(fd).read_to_string(&mut content)?;
        Ok(content)
    }

    /// Read a control file, treating a missing file as absent.
    pub(crate) fn read_optional(&self, file: &str) -> io::Result<Option<String>> {
        match self.read(file) {
            Ok(content) => Ok(Some(content)),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e),
        }
    }

    /// The directory path.
    pub(crate) fn path(&self) -> &Path {
        &self.path
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    fn emulated(path: &Path) -> ControlDir {
        ControlDir::open(path, HierarchyKind::Emulated).unwrap()
    }

    #[test]
    fn write_replaces_and_append_accumulates() {
        let temp = tempdir().unwrap();
        let dir = emulated(temp.path());

        dir.write("cpu.max", "50000 100000").unwrap();
        dir.write("cpu.max", "150000 100000").unwrap();
        assert_eq!(dir.read("cpu.max").unwrap(), "150000 100000\n");

        dir.append("cgroup.procs", "10").unwrap();
        dir.append("cgroup.procs", "11").unwrap();
        assert_eq!(dir.read("cgroup.procs").unwrap(), "10\n11\n");
    }

    #[test]
    fn children_lists_directories_only() {
        let temp = tempdir().unwrap();
        let dir = emulated(temp.path());

        dir.make_child("b").unwrap();
        dir.make_child("a").unwrap();
        dir.write("cgroup.subtree_control", "+cpu +memory").unwrap();

        assert_eq!(dir.children().unwrap(), vec!["a", "b"]);

        let err = dir.make_child("a").unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::AlreadyExists);
    }

    #[test]
    fn child_handles_and_removal() {
        let temp = tempdir().unwrap();
        let dir = emulated(temp.path());
        dir.make_child("g").unwrap();

        let child = dir.open_child("g").unwrap();
        child.write("memory.max", "1024").unwrap();
        assert_eq!(child.path(), temp.path().join("g"));
        assert!(dir.read_optional("missing").unwrap().is_none());

        dir.remove_child("g").unwrap();
        assert!(!temp.path().join("g").exists());
        assert_eq!(
            dir.open_child("g").unwrap_err().kind(),
            io::ErrorKind::NotFound
        );
    }
}
