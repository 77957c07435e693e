use super::c;

use std::ffi::OsStr;
use std::fs::{File, OpenOptions};
use std::io;
use std::mem::{self, MaybeUninit};
use std::os::windows::ffi::OsStrExt;
use std::os::windows::fs::OpenOptionsExt;
use std::os::windows::io::AsRawHandle;
use std::path::Path;
use std::ptr;

use log::trace;

use crate::ntpath;
use crate::platform::{Attributes, ControlCode, FILE_ATTRIBUTE_REPARSE_POINT};
use crate::reparse::ReparseTag;

pub fn open_reparse_point(reparse_point: &Path, rdwr: bool) -> io::Result<File> {
    let access = if rdwr {
        c::GENERIC_READ | c::GENERIC_WRITE
    } else {
        c::GENERIC_READ
    };
    let mut opts = OpenOptions::new();
    opts.access_mode(access)
        .share_mode(0)
        .custom_flags(c::FILE_FLAG_OPEN_REPARSE_POINT | c::FILE_FLAG_BACKUP_SEMANTICS);
    opts.open(reparse_point)
}

/// Sends one of the reparse point control codes to `file`.
pub fn device_io_control(file: &File, code: ControlCode, input: &[u8], output: &mut [u8]) -> io::Result<usize> {
    let fsctl = match code {
        ControlCode::SetReparsePoint => c::FSCTL_SET_REPARSE_POINT,
        ControlCode::GetReparsePoint => c::FSCTL_GET_REPARSE_POINT,
        ControlCode::DeleteReparsePoint => c::FSCTL_DELETE_REPARSE_POINT,
    };
    let in_ptr = if input.is_empty() {
        ptr::null()
    } else {
        input.as_ptr().cast()
    };
    let out_ptr = if output.is_empty() {
        ptr::null_mut()
    } else {
        output.as_mut_ptr().cast()
    };
    let mut bytes_returned: u32 = 0;
    // SAFETY: both buffers outlive the call and their lengths are passed along.
    let ok = unsafe {
        c::DeviceIoControl(
            file.as_raw_handle() as c::HANDLE,
            fsctl,
            in_ptr,
            input.len() as u32,
            out_ptr,
            output.len() as u32,
            &mut bytes_returned,
            ptr::null_mut(),
        )
    };
    if ok == 0 {
        return Err(io::Error::last_os_error());
    }
    trace!("{:?}: {} bytes in, {} bytes out", code, input.len(), bytes_returned);
    Ok(bytes_returned as usize)
}

/// Attributes of `path`, or `None` when it does not exist.
pub fn get_attributes(path: &Path) -> io::Result<Option<Attributes>> {
    let wide = os_str_to_utf16(path.as_os_str());
    let bits = unsafe { c::GetFileAttributesW(wide.as_ptr()) };
    if bits == c::INVALID_FILE_ATTRIBUTES {
        let err = io::Error::last_os_error();
        return match err.raw_os_error().map(|code| code as u32) {
            Some(c::ERROR_FILE_NOT_FOUND) | Some(c::ERROR_PATH_NOT_FOUND) => Ok(None),
            _ => Err(err),
        };
    }
    let reparse_tag = if bits & FILE_ATTRIBUTE_REPARSE_POINT != 0 {
        Some(find_reparse_tag(&wide)?)
    } else {
        None
    };
    Ok(Some(Attributes { bits, reparse_tag }))
}

// The directory listing carries the tag in `dwReserved0`, which avoids opening the file.
fn find_reparse_tag(wide: &[u16]) -> io::Result<ReparseTag> {
    // FindFirstFileW rejects a trailing separator.
    let unterminated = wide.strip_suffix(&[0]).unwrap_or(wide);
    let mut pattern = ntpath::trim_trailing_separators(unterminated).to_vec();
    pattern.push(0);
    unsafe {
        let mut data: c::WIN32_FIND_DATAW = mem::zeroed();
        let handle = c::FindFirstFileW(pattern.as_ptr(), &mut data);
        if handle == c::INVALID_HANDLE_VALUE {
            return Err(io::Error::last_os_error());
        }
        let _handle = scopeguard::guard(handle, |h| {
            c::FindClose(h);
        });
        Ok(ReparseTag(data.dwReserved0))
    }
}

pub fn create_symbolic_link(target: &Path, link: &Path, directory: bool) -> io::Result<()> {
    let target = os_str_to_utf16(target.as_os_str());
    let link = os_str_to_utf16(link.as_os_str());
    let mut flags = c::SYMBOLIC_LINK_FLAG_ALLOW_UNPRIVILEGED_CREATE;
    if directory {
        flags |= c::SYMBOLIC_LINK_FLAG_DIRECTORY;
    }
    if unsafe { c::CreateSymbolicLinkW(link.as_ptr(), target.as_ptr(), flags) } != 0 {
        return Ok(());
    }
    let err = io::Error::last_os_error();
    if err.raw_os_error() != Some(c::ERROR_INVALID_PARAMETER as i32) {
        return Err(err);
    }
    // Older systems do not know the unprivileged flag.
    flags &= !c::SYMBOLIC_LINK_FLAG_ALLOW_UNPRIVILEGED_CREATE;
    if unsafe { c::CreateSymbolicLinkW(link.as_ptr(), target.as_ptr(), flags) } == 0 {
        return Err(io::Error::last_os_error());
    }
    Ok(())
}

/// Enables the backup, restore and symbolic link privileges on the process token.
///
/// Every privilege is attempted; the first failure is reported.
#[cfg(feature = "unstable_admin")]
pub fn set_privileges() -> io::Result<()> {
    use log::debug;
    use scopeguard::ScopeGuard;

    let names = [c::SE_BACKUP_NAME, c::SE_RESTORE_NAME, c::SE_CREATE_SYMBOLIC_LINK_NAME];
    unsafe {
        let mut handle: c::HANDLE = 0;
        if c::OpenProcessToken(c::GetCurrentProcess(), c::TOKEN_ADJUST_PRIVILEGES, &mut handle) == 0 {
            return Err(io::Error::last_os_error());
        }
        let handle = scopeguard::guard(handle, |h| {
            c::CloseHandle(h);
        });
        let mut first_error = None;
        for name in names {
            if let Err(e) = set_privilege(*handle, name) {
                debug!("privilege {} not enabled: {}", String::from_utf16_lossy(wide_cstr(name)), e);
                first_error.get_or_insert(e);
            }
        }

        let handle = ScopeGuard::into_inner(handle);
        if c::CloseHandle(handle) == 0 {
            return Err(io::Error::last_os_error());
        }
        first_error.map_or(Ok(()), Err)
    }
}

#[cfg(feature = "unstable_admin")]
unsafe fn set_privilege(token: c::HANDLE, name: *const u16) -> io::Result<()> {
    const TOKEN_PRIVILEGES_SIZE: u32 = mem::size_of::<c::TOKEN_PRIVILEGES>() as _;
    let mut tp: c::TOKEN_PRIVILEGES = mem::zeroed();
    if c::LookupPrivilegeValueW(ptr::null(), name, &mut tp.Privileges[0].Luid) == 0 {
        return Err(io::Error::last_os_error());
    }
    tp.PrivilegeCount = 1;
    tp.Privileges[0].Attributes = c::SE_PRIVILEGE_ENABLED;
    if c::AdjustTokenPrivileges(token, 0, &tp, TOKEN_PRIVILEGES_SIZE, ptr::null_mut(), ptr::null_mut()) == 0 {
        return Err(io::Error::last_os_error());
    }
    // Succeeds even when the privilege is not held; the real answer is in the last error.
    if c::GetLastError() == c::ERROR_NOT_ALL_ASSIGNED {
        return Err(io::Error::from_raw_os_error(c::ERROR_NOT_ALL_ASSIGNED as i32));
    }
    Ok(())
}

#[cfg(feature = "unstable_admin")]
unsafe fn wide_cstr<'a>(s: *const u16) -> &'a [u16] {
    let mut len = 0;
    while *s.add(len) != 0 {
        len += 1;
    }
    std::slice::from_raw_parts(s, len)
}

fn os_str_to_utf16(s: &OsStr) -> Vec<u16> {
    s.encode_wide().chain(std::iter::once(0)).collect()
}

type MaybeU16 = MaybeUninit<u16>;
// Returns the absolute path without its terminating NUL.
// Ref: <rust-lang/rust/src/libstd/sys/windows/mod.rs#L106>.
pub fn get_full_path(target: &Path) -> io::Result<Vec<u16>> {
    let path = os_str_to_utf16(target.as_os_str());
    let file_part = ptr::null_mut();
    const U16_UNINIT: MaybeU16 = MaybeU16::uninit();
    // Start off with a stack buf but then spill over to the heap if we end up
    // needing more space.
    //
    // This initial size also works around `GetFullPathNameW` returning
    // incorrect size hints for some short paths:
    // https://github.com/dylni/normpath/issues/5
    let mut stack_buf: [MaybeU16; 512] = [U16_UNINIT; 512];
    let mut heap_buf: Vec<MaybeU16> = Vec::new();
    unsafe {
        let mut n = stack_buf.len();
        loop {
            let buf = if n <= stack_buf.len() {
                &mut stack_buf[..]
            } else {
                let extra = n - heap_buf.len();
                heap_buf.reserve(extra);
                n = heap_buf.capacity().min(u32::MAX as usize);
                // Safety: MaybeUninit<u16> does not need initialization
                heap_buf.set_len(n);
                &mut heap_buf[..]
            };

            c::SetLastError(0);
            let k = c::GetFullPathNameW(path.as_ptr(), n as u32, buf.as_mut_ptr().cast::<u16>(), file_part) as usize;
            if k == 0 {
                return Err(io::Error::last_os_error());
            }
            if c::GetLastError() == c::ERROR_INSUFFICIENT_BUFFER {
                n = n.saturating_mul(2).min(u32::MAX as usize);
            } else if k > n {
                n = k;
            } else {
                // Safety: First `k` values are initialized.
                let slice = &*(&buf[..k] as *const [MaybeU16] as *const [u16]);
                return Ok(slice.into());
            }
        }
    }
}
