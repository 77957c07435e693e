//! Translation of user paths into the names stored in a reparse point.

use std::path::{Path, PathBuf};

use crate::error::{Error, Result};
use crate::platform::FileSystem;

/// This prefix indicates to NTFS that the path is to be treated as a non-interpreted
/// path in the virtual file system.
pub const NON_INTERPRETED_PATH_PREFIX: [u16; 4] = utf16s!(br"\??\");
const VERBATIM_PATH_PREFIX: [u16; 4] = utf16s!(br"\\?\");
const UNC_PREFIX: [u16; 4] = utf16s!(br"UNC\");

const BACKSLASH: u16 = b'\\' as u16;
const SLASH: u16 = b'/' as u16;
const COLON: u16 = b':' as u16;

/// Substitute and print names for a link target.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LinkNames {
    pub substitute_name: Vec<u16>,
    pub print_name: Vec<u16>,
    /// Set for symbolic links stored verbatim, see `SYMLINK_FLAG_RELATIVE`.
    pub relative: bool,
}

/// Builds the names for an already resolved absolute path.
///
/// `C:\` loses its trailing separator in the substitute name, UNC paths become
/// `\??\UNC\server\share` and verbatim `\\?\` paths are rewritten to `\??\`.
pub fn absolute_names(resolved: &[u16]) -> LinkNames {
    if resolved.starts_with(&NON_INTERPRETED_PATH_PREFIX) {
        return LinkNames {
            substitute_name: resolved.to_vec(),
            print_name: strip_nt_prefix(resolved).to_vec(),
            relative: false,
        };
    }
    let print_name = match resolved.strip_prefix(&VERBATIM_PATH_PREFIX[..]) {
        // `\\?\UNC\server\share` prints as `\\server\share`
        Some(rest) => match rest.strip_prefix(&UNC_PREFIX[..]) {
            Some(share) => [&[BACKSLASH, BACKSLASH][..], share].concat(),
            None => rest.to_vec(),
        },
        None => resolved.to_vec(),
    };

    let mut tail = &print_name[..];
    if let [.., COLON, BACKSLASH] = tail {
        tail = &tail[..tail.len() - 1];
    }
    let mut substitute_name = NON_INTERPRETED_PATH_PREFIX.to_vec();
    if is_unc(tail) {
        substitute_name.extend_from_slice(&UNC_PREFIX);
        substitute_name.extend_from_slice(&tail[2..]);
    } else {
        substitute_name.extend_from_slice(tail);
    }
    LinkNames {
        substitute_name,
        print_name,
        relative: false,
    }
}

/// Relative symbolic links store the caller's text unchanged in both names.
pub fn relative_names(path: &[u16]) -> LinkNames {
    LinkNames {
        substitute_name: path.to_vec(),
        print_name: path.to_vec(),
        relative: true,
    }
}

/// Produces the names for `path`, resolving it first when `absolute` is set.
pub fn to_substitute_name<F: FileSystem>(fs: &F, path: &Path, absolute: bool) -> Result<LinkNames> {
    if !absolute {
        return Ok(relative_names(&to_wide(path)));
    }
    match fs.full_path(path) {
        Ok(resolved) if !resolved.is_empty() => Ok(absolute_names(&resolved)),
        _ => Err(Error::InvalidTarget {
            path: path.to_path_buf(),
            reason: "cannot be resolved to an absolute path",
        }),
    }
}

/// Removes a leading `\??\`, e.g. `\??\C:\foo\bar` becomes `C:\foo\bar`.
pub fn strip_nt_prefix(name: &[u16]) -> &[u16] {
    name.strip_prefix(&NON_INTERPRETED_PATH_PREFIX[..]).unwrap_or(name)
}

/// `C:\...`, `\\server\share` and the NT or verbatim namespaces are fully qualified.
/// `\foo` and `C:foo` still depend on the current drive or directory.
pub fn is_fully_qualified(path: &[u16]) -> bool {
    if path.starts_with(&NON_INTERPRETED_PATH_PREFIX) {
        return true;
    }
    match path {
        [drive, COLON, sep, ..] => is_drive_letter(*drive) && is_separator(*sep),
        [a, b, ..] => is_separator(*a) && is_separator(*b),
        _ => false,
    }
}

fn is_unc(path: &[u16]) -> bool {
    matches!(path, [BACKSLASH, BACKSLASH, c, ..] if *c != BACKSLASH)
}

fn is_separator(c: u16) -> bool {
    c == BACKSLASH || c == SLASH
}

fn is_drive_letter(c: u16) -> bool {
    c < 0x80 && (c as u8).is_ascii_alphabetic()
}

/// Drops trailing separators, keeping the one right after a drive colon (`C:\`).
#[cfg_attr(not(windows), allow(dead_code))]
pub(crate) fn trim_trailing_separators(mut path: &[u16]) -> &[u16] {
    while let [rest @ .., last] = path {
        if !is_separator(*last) || rest.is_empty() || matches!(rest, [.., COLON]) {
            break;
        }
        path = rest;
    }
    path
}

/// Strips the spaces and NULs callers sometimes leave around a path.
pub(crate) fn clean(path: &Path) -> PathBuf {
    let wide = to_wide(path);
    let junk = |c: &u16| *c == 0 || *c == u16::from(b' ');
    let start = wide.iter().position(|c| !junk(c)).unwrap_or(wide.len());
    let end = wide.iter().rposition(|c| !junk(c)).map_or(start, |i| i + 1);
    if start == 0 && end == wide.len() {
        return path.to_path_buf();
    }
    from_wide(&wide[start..end])
}

#[cfg(windows)]
pub(crate) fn to_wide(path: &Path) -> Vec<u16> {
    use std::os::windows::ffi::OsStrExt;
    path.as_os_str().encode_wide().collect()
}

#[cfg(not(windows))]
pub(crate) fn to_wide(path: &Path) -> Vec<u16> {
    path.to_string_lossy().encode_utf16().collect()
}

#[cfg(windows)]
pub(crate) fn from_wide(wide: &[u16]) -> PathBuf {
    use std::ffi::OsString;
    use std::os::windows::ffi::OsStringExt;
    PathBuf::from(OsString::from_wide(wide))
}

#[cfg(not(windows))]
pub(crate) fn from_wide(wide: &[u16]) -> PathBuf {
    PathBuf::from(String::from_utf16_lossy(wide))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn wide(s: &str) -> Vec<u16> {
        s.encode_utf16().collect()
    }

    fn text(w: &[u16]) -> String {
        String::from_utf16_lossy(w)
    }

    #[test]
    fn absolute_target() {
        let names = absolute_names(&wide(r"C:\Target"));
        assert_eq!(text(&names.substitute_name), r"\??\C:\Target");
        assert_eq!(text(&names.print_name), r"C:\Target");
        assert!(!names.relative);
    }

    #[test]
    fn drive_root_loses_separator() {
        let names = absolute_names(&wide(r"D:\"));
        assert_eq!(text(&names.substitute_name), r"\??\D:");
        assert_eq!(text(&names.print_name), r"D:\");

        // only directly after the colon
        let names = absolute_names(&wide(r"D:\dir\"));
        assert_eq!(text(&names.substitute_name), r"\??\D:\dir\");
    }

    #[test]
    fn unc_and_verbatim_targets() {
        let names = absolute_names(&wide(r"\\server\share\dir"));
        assert_eq!(text(&names.substitute_name), r"\??\UNC\server\share\dir");
        assert_eq!(text(&names.print_name), r"\\server\share\dir");

        let names = absolute_names(&wide(r"\\?\C:\very\long"));
        assert_eq!(text(&names.substitute_name), r"\??\C:\very\long");
        assert_eq!(text(&names.print_name), r"C:\very\long");

        let names = absolute_names(&wide(r"\\?\UNC\server\share\d"));
        assert_eq!(text(&names.substitute_name), r"\??\UNC\server\share\d");
        assert_eq!(text(&names.print_name), r"\\server\share\d");

        let names = absolute_names(&wide(r"\??\C:\x"));
        assert_eq!(text(&names.substitute_name), r"\??\C:\x");
        assert_eq!(text(&names.print_name), r"C:\x");
    }

    #[test]
    fn relative_target_is_verbatim() {
        let names = relative_names(&wide(r"..\sibling"));
        assert_eq!(text(&names.substitute_name), r"..\sibling");
        assert_eq!(names.substitute_name, names.print_name);
        assert!(names.relative);
    }

    #[test]
    fn prefix_stripping() {
        assert_eq!(text(strip_nt_prefix(&wide(r"\??\C:\foo\bar"))), r"C:\foo\bar");
        assert_eq!(text(strip_nt_prefix(&wide(r"..\foo"))), r"..\foo");
        assert_eq!(text(strip_nt_prefix(&wide(r"\??"))), r"\??");
    }

    #[test]
    fn qualification() {
        assert!(is_fully_qualified(&wide(r"C:\x")));
        assert!(is_fully_qualified(&wide("c:/x")));
        assert!(is_fully_qualified(&wide(r"\\server\share")));
        assert!(is_fully_qualified(&wide(r"\\?\C:\x")));
        assert!(is_fully_qualified(&wide(r"\??\C:\x")));
        assert!(is_fully_qualified(&wide(r"\??\C:\x")));
        assert!(!is_fully_qualified(&wide(r"C:x")));
        assert!(!is_fully_qualified(&wide(r"\x")));
        assert!(!is_fully_qualified(&wide(r"..\x")));
        assert!(!is_fully_qualified(&wide("x")));
    }

    #[test]
    fn trailing_separators() {
        let trim = |s: &str| text(trim_trailing_separators(&wide(s)));
        assert_eq!(trim(r"C:\Documents and Settings\"), r"C:\Documents and Settings");
        assert_eq!(trim(r"C:\link\\/"), r"C:\link");
        assert_eq!(trim(r"\\server\share\"), r"\\server\share");
        assert_eq!(trim(r"C:\link"), r"C:\link");
        assert_eq!(trim(r"C:\"), r"C:\");
        assert_eq!(trim(r"\\?\C:\"), r"\\?\C:\");
        assert_eq!(trim(r"\"), r"\");
        assert_eq!(trim(""), "");
    }

    #[test]
    fn cleaning() {
        assert_eq!(clean(Path::new(" C:\\x \0")), PathBuf::from(r"C:\x"));
        assert_eq!(clean(Path::new(r"C:\x")), PathBuf::from(r"C:\x"));
        assert_eq!(clean(Path::new("  ")), PathBuf::from(""));
    }
}
