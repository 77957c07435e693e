use std::fmt;
use std::io;
use std::path::PathBuf;

use thiserror::Error;

pub type Result<T, E = Error> = std::result::Result<T, E>;

/// The primitive or control operation that was running when the OS refused a request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Operation {
    QueryAttributes,
    ResolvePath,
    CreateDirectory,
    RemoveDirectory,
    CreateFile,
    RemoveFile,
    CreateSymbolicLink,
    SetReparsePoint,
    GetReparsePoint,
    DeleteReparsePoint,
}

impl fmt::Display for Operation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Operation::QueryAttributes => "query attributes",
            Operation::ResolvePath => "resolve full path",
            Operation::CreateDirectory => "create directory",
            Operation::RemoveDirectory => "remove directory",
            Operation::CreateFile => "create file",
            Operation::RemoveFile => "remove file",
            Operation::CreateSymbolicLink => "create symbolic link",
            Operation::SetReparsePoint => "FSCTL_SET_REPARSE_POINT",
            Operation::GetReparsePoint => "FSCTL_GET_REPARSE_POINT",
            Operation::DeleteReparsePoint => "FSCTL_DELETE_REPARSE_POINT",
        };
        f.write_str(name)
    }
}

#[derive(Debug, Error)]
pub enum Error {
    /// The source (target) path of a link is unusable.
    #[error("invalid target path `{}`: {reason}", path.display())]
    InvalidTarget { path: PathBuf, reason: &'static str },
    /// The link path is not the expected kind of reparse point, or already exists.
    #[error("invalid link path `{}`: {reason}", path.display())]
    InvalidLink { path: PathBuf, reason: &'static str },
    #[error("failed to open a handle to `{}`", path.display())]
    InvalidHandle {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error("malformed reparse buffer: {0}")]
    MalformedBuffer(String),
    #[error("unsupported reparse tag {0:#010x}")]
    UnsupportedTag(u32),
    #[error("reparse buffer of {len} bytes exceeds the 16 KiB limit")]
    TooLong { len: usize },
    #[error("{op} failed on `{}`", path.display())]
    Os {
        op: Operation,
        path: PathBuf,
        #[source]
        source: io::Error,
    },
}

impl Error {
    pub(crate) fn os(op: Operation, path: impl Into<PathBuf>, source: io::Error) -> Self {
        Error::Os {
            op,
            path: path.into(),
            source,
        }
    }

    pub(crate) fn malformed(msg: impl Into<String>) -> Self {
        Error::MalformedBuffer(msg.into())
    }

    /// Returns the OS error code carried by this error, if any.
    pub fn raw_os_error(&self) -> Option<i32> {
        match self {
            Error::InvalidHandle { source, .. } | Error::Os { source, .. } => source.raw_os_error(),
            _ => None,
        }
    }

    /// `true` when the caller supplied a bad path, as opposed to the OS refusing the request.
    pub fn is_user_error(&self) -> bool {
        matches!(self, Error::InvalidTarget { .. } | Error::InvalidLink { .. })
    }
}

impl From<Error> for io::Error {
    fn from(err: Error) -> Self {
        let kind = match &err {
            Error::InvalidHandle { source, .. } | Error::Os { source, .. } => source.kind(),
            Error::InvalidTarget { .. } | Error::InvalidLink { .. } => io::ErrorKind::InvalidInput,
            Error::MalformedBuffer(_) | Error::UnsupportedTag(_) | Error::TooLong { .. } => {
                io::ErrorKind::InvalidData
            }
        };
        io::Error::new(kind, err)
    }
}
