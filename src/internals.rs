#[macro_use]
mod utf16;

#[cfg(windows)]
mod c;
#[cfg(windows)]
mod helpers;

#[cfg(windows)]
pub use self::win32::Win32;

#[cfg(windows)]
mod win32 {
    use std::fs::{self, File};
    use std::io;
    use std::path::Path;

    use super::helpers;
    use crate::platform::{Attributes, ControlCode, FileSystem};

    /// The real NTFS, through Win32 calls.
    #[derive(Debug, Clone, Copy, Default)]
    pub struct Win32;

    #[cfg(feature = "unstable_admin")]
    fn privileges() -> io::Result<()> {
        use std::sync::OnceLock;

        // Token privileges are process wide, adjust them once.
        static ENABLED: OnceLock<Result<(), i32>> = OnceLock::new();
        let enabled = ENABLED.get_or_init(|| {
            helpers::set_privileges().map_err(|e| {
                log::warn!("could not acquire backup/restore privileges: {}", e);
                e.raw_os_error().unwrap_or_default()
            })
        });
        (*enabled).map_err(io::Error::from_raw_os_error)
    }

    #[cfg(not(feature = "unstable_admin"))]
    fn privileges() -> io::Result<()> {
        Ok(())
    }

    impl FileSystem for Win32 {
        type Handle = File;

        fn ensure_privileges(&self) -> io::Result<()> {
            privileges()
        }

        fn supports_native_symlinks(&self) -> bool {
            true
        }

        fn attributes(&self, path: &Path) -> io::Result<Option<Attributes>> {
            helpers::get_attributes(path)
        }

        fn full_path(&self, path: &Path) -> io::Result<Vec<u16>> {
            helpers::get_full_path(path)
        }

        fn create_dir(&self, path: &Path) -> io::Result<()> {
            fs::create_dir(path)
        }

        fn remove_dir(&self, path: &Path) -> io::Result<()> {
            fs::remove_dir(path)
        }

        fn create_file(&self, path: &Path) -> io::Result<()> {
            fs::OpenOptions::new().write(true).create_new(true).open(path).map(drop)
        }

        fn remove_file(&self, path: &Path) -> io::Result<()> {
            fs::remove_file(path)
        }

        fn open_for_read(&self, path: &Path) -> io::Result<File> {
            helpers::open_reparse_point(path, false)
        }

        fn open_for_write(&self, path: &Path) -> io::Result<File> {
            helpers::open_reparse_point(path, true)
        }

        fn device_control(
            &self,
            handle: &File,
            code: ControlCode,
            input: &[u8],
            output: &mut [u8],
        ) -> io::Result<usize> {
            helpers::device_io_control(handle, code, input, output)
        }

        fn create_symlink(&self, target: &Path, link: &Path, directory: bool) -> io::Result<()> {
            helpers::create_symbolic_link(target, link, directory)
        }
    }
}
