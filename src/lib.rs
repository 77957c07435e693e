//! Library for working with NTFS junctions and symbolic links.
//!
//! Both are reparse points: an empty directory or file carrying a tagged buffer
//! that tells NTFS where to redirect. The [`reparse`] module encodes and decodes
//! those buffers, [`ntpath`] turns user paths into the names stored in them, and
//! [`Links`] drives the create, check, read and unlink lifecycle on top of any
//! [`FileSystem`]. On Windows the free functions below do the same with [`Win32`].
#![deny(rust_2018_idioms)]

#[macro_use]
mod internals;

mod error;
mod lifecycle;
pub mod ntpath;
pub mod platform;
pub mod reparse;

pub use crate::error::{Error, Operation, Result};
#[cfg(windows)]
pub use crate::internals::Win32;
pub use crate::lifecycle::{LinkKind, Links, SymlinkStrategy};
pub use crate::platform::{Attributes, ControlCode, FileSystem};
pub use crate::reparse::{LinkDescriptor, ReparseBuffer, ReparseTag};

#[cfg(windows)]
use std::path::{Path, PathBuf};
#[cfg(windows)]
use std::sync::OnceLock;

/// The process wide [`Links`] behind the free functions. Privileges and the
/// symbolic link strategy are settled on first use.
#[cfg(windows)]
fn links() -> &'static Links<Win32> {
    static LINKS: OnceLock<Links<Win32>> = OnceLock::new();
    LINKS.get_or_init(|| Links::new(Win32))
}

/// Creates a junction or symbolic link at `link` pointing to `source`.
///
/// Junction targets must be existing directories. Symbolic link targets may be
/// relative, in which case they are stored as given.
///
/// N.B. Only works on NTFS.
///
/// # Example
///
/// ```rust
/// use std::io;
/// # use std::fs;
/// use ntfslink::{create, LinkKind};
/// fn main() -> io::Result<()> {
///     let tmpdir = tempfile::tempdir()?;
///     let target = tmpdir.path().join("target");
///     let junction = tmpdir.path().join("junction");
///     # fs::create_dir_all(&target)?;
///     create(LinkKind::Junction, &target, &junction)?;
///     Ok(())
/// }
/// ```
#[cfg(windows)]
pub fn create<P, Q>(kind: LinkKind, source: P, link: Q) -> Result<()>
where
    P: AsRef<Path>,
    Q: AsRef<Path>,
{
    links().create(kind, source.as_ref(), link.as_ref())
}

/// Determines whether `path` exists and is a link of `kind`.
///
/// # Example
///
/// ```rust
/// use std::io;
/// # use std::fs;
/// use ntfslink::{check, create, LinkKind};
/// fn main() -> io::Result<()> {
///     let tmpdir = tempfile::tempdir()?;
///     let target = tmpdir.path().join("target");
///     let junction = tmpdir.path().join("junction");
///     # fs::create_dir_all(&target)?;
///     assert!(!check(LinkKind::Junction, &junction)?);
///     create(LinkKind::Junction, &target, &junction)?;
///     assert!(check(LinkKind::Junction, &junction)?);
///     Ok(())
/// }
/// ```
#[cfg(windows)]
pub fn check<P: AsRef<Path>>(kind: LinkKind, path: P) -> Result<bool> {
    links().check(kind, path.as_ref())
}

/// Gets the target of a junction or symbolic link.
///
/// # Example
///
/// ```rust
/// use std::io;
/// # use std::fs;
/// use ntfslink::{create, read, LinkKind};
/// fn main() -> io::Result<()> {
///     let tmpdir = tempfile::tempdir()?;
///     let target = tmpdir.path().join("target");
///     let junction = tmpdir.path().join("junction");
///     # fs::create_dir_all(&target)?;
///     create(LinkKind::Junction, &target, &junction)?;
///     assert_eq!(read(&junction)?, target);
///     Ok(())
/// }
/// ```
#[cfg(windows)]
pub fn read<P: AsRef<Path>>(path: P) -> Result<PathBuf> {
    links().read(path.as_ref())
}

/// Removes a junction or symbolic link, leaving its target alone.
///
/// # Example
///
/// ```rust
/// use std::io;
/// # use std::fs;
/// use ntfslink::{create, unlink, LinkKind};
/// fn main() -> io::Result<()> {
///     let tmpdir = tempfile::tempdir()?;
///     let target = tmpdir.path().join("target");
///     let junction = tmpdir.path().join("junction");
///     # fs::create_dir_all(&target)?;
///     create(LinkKind::Junction, &target, &junction)?;
///     unlink(&junction)?;
///     assert!(!junction.exists());
///     assert!(target.exists());
///     Ok(())
/// }
/// ```
#[cfg(windows)]
pub fn unlink<P: AsRef<Path>>(path: P) -> Result<()> {
    links().unlink(path.as_ref())
}
