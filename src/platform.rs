//! The operating system primitives the link lifecycle is built on.

use std::io;
use std::path::Path;

use crate::reparse::ReparseTag;

pub const FILE_ATTRIBUTE_DIRECTORY: u32 = 0x0000_0010;
pub const FILE_ATTRIBUTE_REPARSE_POINT: u32 = 0x0000_0400;

/// Attribute bits of a path, plus its reparse tag when it is a reparse point.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Attributes {
    pub bits: u32,
    pub reparse_tag: Option<ReparseTag>,
}

impl Attributes {
    pub fn is_dir(&self) -> bool {
        self.bits & FILE_ATTRIBUTE_DIRECTORY != 0
    }

    pub fn is_reparse_point(&self) -> bool {
        self.bits & FILE_ATTRIBUTE_REPARSE_POINT != 0
    }

    /// The tag, but only when the reparse attribute is actually set.
    pub fn tag(&self) -> Option<ReparseTag> {
        self.reparse_tag.filter(|_| self.is_reparse_point())
    }
}

/// File system control codes used on reparse points.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ControlCode {
    SetReparsePoint,
    GetReparsePoint,
    DeleteReparsePoint,
}

/// Handle, control and privilege primitives.
///
/// Handles are released when dropped, on every path out of an operation.
pub trait FileSystem {
    type Handle;

    /// Grants the process the privileges needed for backup semantics.
    /// Must be idempotent.
    fn ensure_privileges(&self) -> io::Result<()> {
        Ok(())
    }

    /// Whether symbolic links can be created with a native call instead of a hand-built buffer.
    fn supports_native_symlinks(&self) -> bool {
        false
    }

    /// `Ok(None)` when nothing exists at `path`.
    fn attributes(&self, path: &Path) -> io::Result<Option<Attributes>>;

    /// Absolute form of `path`, without a terminating `NUL`.
    fn full_path(&self, path: &Path) -> io::Result<Vec<u16>>;

    fn create_dir(&self, path: &Path) -> io::Result<()>;

    fn remove_dir(&self, path: &Path) -> io::Result<()>;

    fn create_file(&self, path: &Path) -> io::Result<()>;

    fn remove_file(&self, path: &Path) -> io::Result<()>;

    /// Opens the reparse point itself (not its target) for reading.
    fn open_for_read(&self, path: &Path) -> io::Result<Self::Handle>;

    /// Opens the reparse point itself for writing and deleting its data.
    fn open_for_write(&self, path: &Path) -> io::Result<Self::Handle>;

    /// Issues a control request. Returns the number of bytes written to `output`.
    fn device_control(
        &self,
        handle: &Self::Handle,
        code: ControlCode,
        input: &[u8],
        output: &mut [u8],
    ) -> io::Result<usize>;

    fn create_symlink(&self, target: &Path, link: &Path, directory: bool) -> io::Result<()>;
}

impl<F: FileSystem + ?Sized> FileSystem for &F {
    type Handle = F::Handle;

    fn ensure_privileges(&self) -> io::Result<()> {
        (**self).ensure_privileges()
    }

    fn supports_native_symlinks(&self) -> bool {
        (**self).supports_native_symlinks()
    }

    fn attributes(&self, path: &Path) -> io::Result<Option<Attributes>> {
        (**self).attributes(path)
    }

    fn full_path(&self, path: &Path) -> io::Result<Vec<u16>> {
        (**self).full_path(path)
    }

    fn create_dir(&self, path: &Path) -> io::Result<()> {
        (**self).create_dir(path)
    }

    fn remove_dir(&self, path: &Path) -> io::Result<()> {
        (**self).remove_dir(path)
    }

    fn create_file(&self, path: &Path) -> io::Result<()> {
        (**self).create_file(path)
    }

    fn remove_file(&self, path: &Path) -> io::Result<()> {
        (**self).remove_file(path)
    }

    fn open_for_read(&self, path: &Path) -> io::Result<Self::Handle> {
        (**self).open_for_read(path)
    }

    fn open_for_write(&self, path: &Path) -> io::Result<Self::Handle> {
        (**self).open_for_write(path)
    }

    fn device_control(
        &self,
        handle: &Self::Handle,
        code: ControlCode,
        input: &[u8],
        output: &mut [u8],
    ) -> io::Result<usize> {
        (**self).device_control(handle, code, input, output)
    }

    fn create_symlink(&self, target: &Path, link: &Path, directory: bool) -> io::Result<()> {
        (**self).create_symlink(target, link, directory)
    }
}
