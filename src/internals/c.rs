use std::alloc::Layout;
use std::os::windows::io::RawHandle;

pub use windows_sys::Win32::Foundation::{
    CloseHandle, GetLastError, SetLastError, ERROR_FILE_NOT_FOUND, ERROR_INSUFFICIENT_BUFFER,
    ERROR_INVALID_PARAMETER, ERROR_NOT_ALL_ASSIGNED, ERROR_PATH_NOT_FOUND, GENERIC_READ, GENERIC_WRITE, HANDLE,
    INVALID_HANDLE_VALUE,
};
pub use windows_sys::Win32::Security::{
    AdjustTokenPrivileges, LookupPrivilegeValueW, SE_PRIVILEGE_ENABLED, TOKEN_ADJUST_PRIVILEGES, TOKEN_PRIVILEGES,
};
// See more in <https://learn.microsoft.com/en-us/windows/win32/secauthz/privilege-constants>.
pub use windows_sys::Win32::Security::{SE_BACKUP_NAME, SE_CREATE_SYMBOLIC_LINK_NAME, SE_RESTORE_NAME};
pub use windows_sys::Win32::Storage::FileSystem::{
    CreateSymbolicLinkW, FindClose, FindFirstFileW, GetFileAttributesW, GetFullPathNameW,
    FILE_FLAG_BACKUP_SEMANTICS, FILE_FLAG_OPEN_REPARSE_POINT, INVALID_FILE_ATTRIBUTES,
    SYMBOLIC_LINK_FLAG_ALLOW_UNPRIVILEGED_CREATE, SYMBOLIC_LINK_FLAG_DIRECTORY, WIN32_FIND_DATAW,
};
pub use windows_sys::Win32::System::Ioctl::{
    FSCTL_DELETE_REPARSE_POINT, FSCTL_GET_REPARSE_POINT, FSCTL_SET_REPARSE_POINT,
};
pub use windows_sys::Win32::System::Threading::{GetCurrentProcess, OpenProcessToken};
pub use windows_sys::Win32::System::IO::DeviceIoControl;

use crate::platform::{FILE_ATTRIBUTE_DIRECTORY, FILE_ATTRIBUTE_REPARSE_POINT};
use crate::reparse::{ReparseTag, MAXIMUM_REPARSE_DATA_BUFFER_SIZE, REPARSE_GUID_DATA_BUFFER_HEADER_SIZE};

// Makes sure layout of RawHandle and windows-sys's HANDLE are the same
// for pointer casts between them.
const _: () = {
    let std_layout = Layout::new::<RawHandle>();
    let win_sys_layout = Layout::new::<HANDLE>();
    assert!(std_layout.size() == win_sys_layout.size());
    assert!(std_layout.align() == win_sys_layout.align());
};

// The portable codec hardcodes these, check them against the SDK.
const _: () = {
    use std::mem::size_of;
    use windows_sys::Win32::Storage::FileSystem as fs;
    use windows_sys::Win32::System::SystemServices as ss;

    assert!(ReparseTag::MOUNT_POINT.0 == ss::IO_REPARSE_TAG_MOUNT_POINT);
    assert!(ReparseTag::SYMLINK.0 == ss::IO_REPARSE_TAG_SYMLINK);
    assert!(MAXIMUM_REPARSE_DATA_BUFFER_SIZE == fs::MAXIMUM_REPARSE_DATA_BUFFER_SIZE);
    assert!(FILE_ATTRIBUTE_DIRECTORY == fs::FILE_ATTRIBUTE_DIRECTORY);
    assert!(FILE_ATTRIBUTE_REPARSE_POINT == fs::FILE_ATTRIBUTE_REPARSE_POINT);
    // tag, data length, reserved, GUID
    assert!(
        size_of::<u32>() + 2 * size_of::<u16>() + size_of::<windows_sys::core::GUID>()
            == REPARSE_GUID_DATA_BUFFER_HEADER_SIZE as usize
    );
};
