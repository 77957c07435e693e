//! Create, check, read and unlink for junctions and symbolic links.

use std::path::{Path, PathBuf};

use log::{debug, warn};
use scopeguard::ScopeGuard;

use crate::error::{Error, Operation, Result};
use crate::ntpath;
use crate::platform::{Attributes, ControlCode, FileSystem};
use crate::reparse::{DeleteRequest, LinkDescriptor, ReparseBuffer, ReparseHeader, ReparseTag};
use crate::reparse::MAXIMUM_REPARSE_DATA_BUFFER_SIZE;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum LinkKind {
    /// A directory mount point, always absolute.
    Junction,
    /// A file or directory symbolic link, absolute or relative.
    Symlink,
}

impl LinkKind {
    pub fn tag(self) -> ReparseTag {
        match self {
            LinkKind::Junction => ReparseTag::MOUNT_POINT,
            LinkKind::Symlink => ReparseTag::SYMLINK,
        }
    }

    pub fn from_tag(tag: ReparseTag) -> Option<Self> {
        match tag {
            ReparseTag::MOUNT_POINT => Some(LinkKind::Junction),
            ReparseTag::SYMLINK => Some(LinkKind::Symlink),
            _ => None,
        }
    }
}

/// How symbolic links get created.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SymlinkStrategy {
    /// `CreateSymbolicLinkW`.
    Native,
    /// Create an empty file or directory, then write a `SYMLINK` buffer to it.
    ReparseBuffer,
}

/// Link operations on top of a [`FileSystem`].
///
/// Building a `Links` is the initialization step: privileges are requested and the
/// symbolic link strategy is fixed here, not on every call.
#[derive(Debug)]
pub struct Links<F> {
    fs: F,
    symlinks: SymlinkStrategy,
}

impl<F: FileSystem> Links<F> {
    pub fn new(fs: F) -> Self {
        if let Err(e) = fs.ensure_privileges() {
            // Unprivileged users can still manage their own links.
            debug!("continuing without backup/restore privileges: {}", e);
        }
        let symlinks = if fs.supports_native_symlinks() {
            SymlinkStrategy::Native
        } else {
            SymlinkStrategy::ReparseBuffer
        };
        Links { fs, symlinks }
    }

    pub fn with_symlink_strategy(mut self, strategy: SymlinkStrategy) -> Self {
        self.symlinks = strategy;
        self
    }

    pub fn symlink_strategy(&self) -> SymlinkStrategy {
        self.symlinks
    }

    pub fn filesystem(&self) -> &F {
        &self.fs
    }

    /// Creates a link of `kind` at `link` pointing to `source`.
    ///
    /// Nothing is left behind at `link` when this fails.
    pub fn create(&self, kind: LinkKind, source: &Path, link: &Path) -> Result<()> {
        let source = ntpath::clean(source);
        let link = ntpath::clean(link);
        match kind {
            LinkKind::Junction => self.create_junction(&source, &link),
            LinkKind::Symlink => self.create_symlink(&source, &link),
        }
    }

    fn create_junction(&self, source: &Path, link: &Path) -> Result<()> {
        match self.attributes(source)? {
            Some(attrs) if attrs.is_dir() => {}
            _ => {
                return Err(Error::InvalidTarget {
                    path: source.to_path_buf(),
                    reason: "junction target must be an existing directory",
                })
            }
        }
        self.ensure_vacant(link)?;

        // Mount points need a fully qualified target, so resolve before touching `link`.
        let names = ntpath::to_substitute_name(&self.fs, source, true)?;
        let buffer = ReparseBuffer::mount_point(&names.substitute_name, &names.print_name)?;
        self.tag_new_entry(link, true, &buffer)?;
        debug!("created junction {} -> {}", link.display(), source.display());
        Ok(())
    }

    fn create_symlink(&self, source: &Path, link: &Path) -> Result<()> {
        let absolute = ntpath::is_fully_qualified(&ntpath::to_wide(source));
        let target = if absolute {
            self.attributes(source)?
        } else {
            // Relative targets resolve against the directory holding the link.
            let resolved = link.parent().map_or_else(|| source.to_path_buf(), |dir| dir.join(source));
            self.attributes(&resolved)?
        };
        if absolute && target.is_none() {
            return Err(Error::InvalidTarget {
                path: source.to_path_buf(),
                reason: "absolute symlink target does not exist",
            });
        }
        self.ensure_vacant(link)?;
        let directory = target.map_or(false, |attrs| attrs.is_dir());

        match self.symlinks {
            SymlinkStrategy::Native => self
                .fs
                .create_symlink(source, link, directory)
                .map_err(|e| Error::os(Operation::CreateSymbolicLink, link, e))?,
            SymlinkStrategy::ReparseBuffer => {
                let names = ntpath::to_substitute_name(&self.fs, source, absolute)?;
                let buffer = ReparseBuffer::symbolic_link(
                    &names.substitute_name,
                    &names.print_name,
                    names.relative,
                )?;
                self.tag_new_entry(link, directory, &buffer)?;
            }
        }
        debug!(
            "created {} symlink {} -> {}",
            if directory { "directory" } else { "file" },
            link.display(),
            source.display()
        );
        Ok(())
    }

    /// Creates an empty entry at `link` and writes `buffer` to it, removing the entry
    /// again if the buffer is refused.
    fn tag_new_entry(&self, link: &Path, directory: bool, buffer: &ReparseBuffer) -> Result<()> {
        if directory {
            self.fs
                .create_dir(link)
                .map_err(|e| Error::os(Operation::CreateDirectory, link, e))?;
        } else {
            self.fs
                .create_file(link)
                .map_err(|e| Error::os(Operation::CreateFile, link, e))?;
        }
        let rollback = scopeguard::guard((), |_| {
            let removed = if directory {
                self.fs.remove_dir(link)
            } else {
                self.fs.remove_file(link)
            };
            if let Err(e) = removed {
                warn!("failed to remove {} after an aborted create: {}", link.display(), e);
            }
        });

        self.set_reparse_point(link, buffer)?;
        ScopeGuard::into_inner(rollback);
        Ok(())
    }

    fn set_reparse_point(&self, link: &Path, buffer: &ReparseBuffer) -> Result<()> {
        let handle = self.open(link, true)?;
        let data = buffer.to_bytes();
        self.fs
            .device_control(&handle, ControlCode::SetReparsePoint, &data, &mut [])
            .map_err(|e| Error::os(Operation::SetReparsePoint, link, e))?;
        debug!("set {} on {}", buffer.tag(), link.display());
        Ok(())
    }

    /// Determines whether `path` exists and is a link of `kind`.
    pub fn check(&self, kind: LinkKind, path: &Path) -> Result<bool> {
        let path = ntpath::clean(path);
        let attrs = match self.attributes(&path)? {
            Some(attrs) => attrs,
            None => return Ok(false),
        };
        let tagged = attrs.tag() == Some(kind.tag());
        Ok(match kind {
            LinkKind::Junction => tagged && attrs.is_dir(),
            LinkKind::Symlink => tagged,
        })
    }

    /// Gets the target of the junction or symbolic link at `path`.
    ///
    /// Absolute targets are returned without their `\??\` prefix, relative ones as stored.
    pub fn read(&self, path: &Path) -> Result<PathBuf> {
        let link = self.read_descriptor(path)?;
        Ok(ntpath::from_wide(link.target()))
    }

    /// Gets the substitute and print names of the link at `path`.
    pub fn read_descriptor(&self, path: &Path) -> Result<LinkDescriptor> {
        let path = ntpath::clean(path);
        let (kind, _) = self.probe(&path)?;
        let handle = self.open(&path, false)?;
        let data = self.query(&handle, &path)?;
        let link = ReparseBuffer::from_bytes(&data)?.descriptor()?;
        if link.tag() != kind.tag() {
            return Err(Error::InvalidLink {
                path,
                reason: "reparse tag changed while reading",
            });
        }
        Ok(link)
    }

    /// Removes the link at `path`, including the empty file or directory that carried it.
    pub fn unlink(&self, path: &Path) -> Result<()> {
        let path = ntpath::clean(path);
        let (kind, attrs) = self.probe(&path)?;
        {
            let handle = self.open(&path, true)?;
            self.delete_reparse_point(&handle, &path, kind.tag())?;
        }
        if attrs.is_dir() {
            self.fs
                .remove_dir(&path)
                .map_err(|e| Error::os(Operation::RemoveDirectory, &path, e))?;
        } else {
            self.fs
                .remove_file(&path)
                .map_err(|e| Error::os(Operation::RemoveFile, &path, e))?;
        }
        debug!("removed {:?} {}", kind, path.display());
        Ok(())
    }

    // See https://learn.microsoft.com/en-us/windows/win32/api/winioctl/ni-winioctl-fsctl_delete_reparse_point
    fn delete_reparse_point(&self, handle: &F::Handle, path: &Path, tag: ReparseTag) -> Result<()> {
        let plain = DeleteRequest::plain(tag).to_bytes();
        let first = match self
            .fs
            .device_control(handle, ControlCode::DeleteReparsePoint, &plain, &mut [])
        {
            Ok(_) => return Ok(()),
            Err(e) => e,
        };
        warn!(
            "deleting {} from {} failed ({}), retrying with its GUID",
            tag,
            path.display(),
            first
        );

        let data = self.query(handle, path)?;
        let header = ReparseHeader::parse(&data)?;
        let qualified = DeleteRequest::with_guid(header.tag, header.guid.unwrap_or_default()).to_bytes();
        self.fs
            .device_control(handle, ControlCode::DeleteReparsePoint, &qualified, &mut [])
            .map_err(|e| Error::os(Operation::DeleteReparsePoint, path, e))?;
        Ok(())
    }

    fn query(&self, handle: &F::Handle, path: &Path) -> Result<Vec<u8>> {
        // Allocate enough space to fit the maximum sized reparse data buffer
        let mut data = vec![0u8; MAXIMUM_REPARSE_DATA_BUFFER_SIZE as usize];
        let len = self
            .fs
            .device_control(handle, ControlCode::GetReparsePoint, &[], &mut data)
            .map_err(|e| Error::os(Operation::GetReparsePoint, path, e))?;
        data.truncate(len);
        Ok(data)
    }

    /// Checks the attributes of `path` for a junction or symlink tag without opening it.
    fn probe(&self, path: &Path) -> Result<(LinkKind, Attributes)> {
        let invalid = |reason| Error::InvalidLink {
            path: path.to_path_buf(),
            reason,
        };
        let attrs = self.attributes(path)?.ok_or_else(|| invalid("does not exist"))?;
        let tag = attrs.tag().ok_or_else(|| invalid("not a reparse point"))?;
        let kind = LinkKind::from_tag(tag).ok_or_else(|| invalid("not a junction or symbolic link"))?;
        Ok((kind, attrs))
    }

    fn ensure_vacant(&self, link: &Path) -> Result<()> {
        if self.attributes(link)?.is_some() {
            return Err(Error::InvalidLink {
                path: link.to_path_buf(),
                reason: "a file or directory already exists at the link path",
            });
        }
        Ok(())
    }

    fn attributes(&self, path: &Path) -> Result<Option<Attributes>> {
        self.fs
            .attributes(path)
            .map_err(|e| Error::os(Operation::QueryAttributes, path, e))
    }

    fn open(&self, path: &Path, write: bool) -> Result<F::Handle> {
        let opened = if write {
            self.fs.open_for_write(path)
        } else {
            self.fs.open_for_read(path)
        };
        opened.map_err(|source| Error::InvalidHandle {
            path: path.to_path_buf(),
            source,
        })
    }
}

#[cfg(test)]
mod tests;
