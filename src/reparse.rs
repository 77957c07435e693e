//! Encoding and decoding of reparse point buffers.
//!
//! The layout follows `REPARSE_DATA_BUFFER` and `REPARSE_GUID_DATA_BUFFER`:
//!
//! ```text
//! +-----------+------------------+------------+----------------------+
//! | tag (u32) | data length (u16)| reserved   | [GUID, 16 bytes]     |
//! +-----------+------------------+------------+----------------------+
//! | body: `data length` bytes                                        |
//! +------------------------------------------------------------------+
//! ```
//!
//! Microsoft tags (bit 31 set) use the 8-byte header, every other tag carries a GUID.
//! Mount point and symbolic link bodies hold byte offsets and byte lengths into a
//! UTF-16 path buffer; everything else is passed through as raw bytes.

use std::fmt;

use log::trace;

use crate::error::{Error, Result};
use crate::ntpath;

/// Reparse Data Buffer header size
pub const REPARSE_DATA_BUFFER_HEADER_SIZE: u16 = 8;
/// Reparse GUID Data Buffer header size
pub const REPARSE_GUID_DATA_BUFFER_HEADER_SIZE: u16 = 24;
/// MountPointReparseBuffer header size
pub const MOUNT_POINT_REPARSE_BUFFER_HEADER_SIZE: u16 = 8;
/// SymbolicLinkReparseBuffer header size, `Flags` included
pub const SYMBOLIC_LINK_REPARSE_BUFFER_HEADER_SIZE: u16 = 12;
/// Largest buffer the file system accepts or returns, header included.
pub const MAXIMUM_REPARSE_DATA_BUFFER_SIZE: u32 = 16 * 1024;
/// The substitute name is not fully qualified and is resolved against the link's parent.
pub const SYMLINK_FLAG_RELATIVE: u32 = 0x0000_0001;

const WCHAR_SIZE: u16 = std::mem::size_of::<u16>() as _;
const UNICODE_NULL_SIZE: u16 = WCHAR_SIZE;

/// A 32-bit reparse point tag.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ReparseTag(pub u32);

impl ReparseTag {
    pub const MOUNT_POINT: Self = Self(0xA000_0003);
    pub const HSM: Self = Self(0xC000_0004);
    pub const HSM2: Self = Self(0x8000_0006);
    pub const SIS: Self = Self(0x8000_0007);
    pub const WIM: Self = Self(0x8000_0008);
    pub const CSV: Self = Self(0x8000_0009);
    pub const DFS: Self = Self(0x8000_000A);
    pub const SYMLINK: Self = Self(0xA000_000C);
    pub const DFSR: Self = Self(0x8000_0012);
    pub const DEDUP: Self = Self(0x8000_0013);
    pub const NFS: Self = Self(0x8000_0014);
    pub const FILE_PLACEHOLDER: Self = Self(0x8000_0015);
    pub const WOF: Self = Self(0x8000_0017);

    /// Tags owned by Microsoft have the high bit set and use the GUID-less header.
    pub const fn is_microsoft(self) -> bool {
        self.0 & 0x8000_0000 != 0
    }

    /// Name surrogates redirect to another named entity in the file system.
    pub const fn is_name_surrogate(self) -> bool {
        self.0 & 0x2000_0000 != 0
    }
}

impl fmt::Display for ReparseTag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match *self {
            ReparseTag::MOUNT_POINT => f.write_str("IO_REPARSE_TAG_MOUNT_POINT"),
            ReparseTag::SYMLINK => f.write_str("IO_REPARSE_TAG_SYMLINK"),
            ReparseTag(raw) => write!(f, "{:#010x}", raw),
        }
    }
}

/// GUID of a third-party reparse point, kept in its on-disk byte order.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash)]
pub struct Guid(pub [u8; 16]);

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReparseHeader {
    pub tag: ReparseTag,
    /// Size, in bytes, of everything after the header.
    pub data_length: u16,
    /// Reserved. It SHOULD be set to 0, and MUST be ignored.
    pub reserved: u16,
    pub guid: Option<Guid>,
}

impl ReparseHeader {
    /// Reads the header only, without looking at the body.
    pub fn parse(bytes: &[u8]) -> Result<Self> {
        if bytes.len() < usize::from(REPARSE_DATA_BUFFER_HEADER_SIZE) {
            return Err(Error::malformed(format!(
                "{} bytes is shorter than the reparse header",
                bytes.len()
            )));
        }
        let tag = ReparseTag(read_u32(bytes, 0)?);
        let data_length = read_u16(bytes, 4)?;
        let reserved = read_u16(bytes, 6)?;
        let guid = if tag.is_microsoft() {
            None
        } else {
            let raw = bytes
                .get(8..usize::from(REPARSE_GUID_DATA_BUFFER_HEADER_SIZE))
                .ok_or_else(|| Error::malformed("GUID header is truncated"))?;
            let mut guid = [0u8; 16];
            guid.copy_from_slice(raw);
            Some(Guid(guid))
        };
        Ok(ReparseHeader {
            tag,
            data_length,
            reserved,
            guid,
        })
    }

    pub fn size(&self) -> usize {
        if self.guid.is_some() {
            usize::from(REPARSE_GUID_DATA_BUFFER_HEADER_SIZE)
        } else {
            usize::from(REPARSE_DATA_BUFFER_HEADER_SIZE)
        }
    }

    fn write(&self, out: &mut Vec<u8>) {
        out.extend_from_slice(&self.tag.0.to_le_bytes());
        out.extend_from_slice(&self.data_length.to_le_bytes());
        out.extend_from_slice(&self.reserved.to_le_bytes());
        if let Some(Guid(guid)) = self.guid {
            out.extend_from_slice(&guid);
        }
    }
}

/// Offsets and lengths shared by mount point and symbolic link bodies.
///
/// All four fields are byte counts into `path_buffer`, never character counts.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NameBuffer {
    substitute_name_offset: u16,
    substitute_name_length: u16,
    print_name_offset: u16,
    print_name_length: u16,
    path_buffer: Vec<u16>,
}

impl NameBuffer {
    pub fn substitute_name_offset(&self) -> u16 {
        self.substitute_name_offset
    }

    pub fn substitute_name_length(&self) -> u16 {
        self.substitute_name_length
    }

    pub fn print_name_offset(&self) -> u16 {
        self.print_name_offset
    }

    pub fn print_name_length(&self) -> u16 {
        self.print_name_length
    }

    pub fn path_buffer(&self) -> &[u16] {
        &self.path_buffer
    }

    pub fn substitute_name(&self) -> &[u16] {
        self.slice(self.substitute_name_offset, self.substitute_name_length)
    }

    pub fn print_name(&self) -> &[u16] {
        self.slice(self.print_name_offset, self.print_name_length)
    }

    // Ranges are validated on construction.
    fn slice(&self, offset: u16, length: u16) -> &[u16] {
        let start = usize::from(offset / WCHAR_SIZE);
        let end = start + usize::from(length / WCHAR_SIZE);
        &self.path_buffer[start..end]
    }

    fn byte_len(&self) -> usize {
        self.path_buffer.len() * usize::from(WCHAR_SIZE)
    }

    fn parse(body: &[u8], fixed: u16) -> Result<Self> {
        let fixed = usize::from(fixed);
        if body.len() < fixed {
            return Err(Error::malformed(format!(
                "body of {} bytes cannot hold the {} byte name header",
                body.len(),
                fixed
            )));
        }
        let path = &body[fixed..];
        if path.len() % 2 != 0 {
            return Err(Error::malformed("path buffer has an odd byte length"));
        }
        let names = NameBuffer {
            substitute_name_offset: read_u16(body, 0)?,
            substitute_name_length: read_u16(body, 2)?,
            print_name_offset: read_u16(body, 4)?,
            print_name_length: read_u16(body, 6)?,
            path_buffer: path
                .chunks_exact(2)
                .map(|pair| u16::from_le_bytes([pair[0], pair[1]]))
                .collect(),
        };
        check_range(
            "substitute name",
            names.substitute_name_offset,
            names.substitute_name_length,
            path.len(),
        )?;
        check_range(
            "print name",
            names.print_name_offset,
            names.print_name_length,
            path.len(),
        )?;
        Ok(names)
    }

    fn write(&self, out: &mut Vec<u8>) {
        out.extend_from_slice(&self.substitute_name_offset.to_le_bytes());
        out.extend_from_slice(&self.substitute_name_length.to_le_bytes());
        out.extend_from_slice(&self.print_name_offset.to_le_bytes());
        out.extend_from_slice(&self.print_name_length.to_le_bytes());
    }

    fn write_path(&self, out: &mut Vec<u8>) {
        out.extend(self.path_buffer.iter().flat_map(|unit| unit.to_le_bytes()));
    }
}

fn check_range(what: &str, offset: u16, length: u16, available: usize) -> Result<()> {
    if offset % WCHAR_SIZE != 0 || length % WCHAR_SIZE != 0 {
        return Err(Error::malformed(format!(
            "{} offset {} or length {} is not a whole number of UTF-16 units",
            what, offset, length
        )));
    }
    let end = usize::from(offset) + usize::from(length);
    if end > available {
        return Err(Error::malformed(format!(
            "{} ends at byte {} but the declared data length leaves {} bytes of path buffer",
            what, end, available
        )));
    }
    Ok(())
}

/// Body of a reparse point, selected by the header tag.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LinkBody {
    MountPoint(NameBuffer),
    SymbolicLink { names: NameBuffer, flags: u32 },
    Generic(Vec<u8>),
}

impl LinkBody {
    /// Size of the body in bytes, which is what the header's data length records.
    pub fn byte_len(&self) -> usize {
        match self {
            LinkBody::MountPoint(names) => {
                usize::from(MOUNT_POINT_REPARSE_BUFFER_HEADER_SIZE) + names.byte_len()
            }
            LinkBody::SymbolicLink { names, .. } => {
                usize::from(SYMBOLIC_LINK_REPARSE_BUFFER_HEADER_SIZE) + names.byte_len()
            }
            LinkBody::Generic(raw) => raw.len(),
        }
    }
}

/// A complete reparse point buffer.
///
/// Constructors keep `header.data_length` equal to the body size.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReparseBuffer {
    header: ReparseHeader,
    body: LinkBody,
}

impl ReparseBuffer {
    /// Builds a junction buffer: `substitute\0print`, with the print name starting
    /// one `UNICODE_NULL` after the substitute name.
    pub fn mount_point(substitute_name: &[u16], print_name: &[u16]) -> Result<Self> {
        let sub_bytes = utf16_len(substitute_name);
        let print_bytes = utf16_len(print_name);
        let path_bytes = sub_bytes + usize::from(UNICODE_NULL_SIZE) + print_bytes;
        check_size(
            REPARSE_DATA_BUFFER_HEADER_SIZE,
            MOUNT_POINT_REPARSE_BUFFER_HEADER_SIZE,
            path_bytes,
        )?;

        let mut path_buffer = Vec::with_capacity(path_bytes / 2);
        path_buffer.extend_from_slice(substitute_name);
        path_buffer.push(0);
        path_buffer.extend_from_slice(print_name);

        // Safe casts: `check_size` bounds everything below 16 KiB.
        let names = NameBuffer {
            substitute_name_offset: 0,
            substitute_name_length: sub_bytes as u16,
            print_name_offset: sub_bytes as u16 + UNICODE_NULL_SIZE,
            print_name_length: print_bytes as u16,
            path_buffer,
        };
        Ok(Self::assemble(
            ReparseTag::MOUNT_POINT,
            None,
            LinkBody::MountPoint(names),
        ))
    }

    /// Builds a symbolic link buffer: `print` followed directly by `substitute`.
    pub fn symbolic_link(substitute_name: &[u16], print_name: &[u16], relative: bool) -> Result<Self> {
        let sub_bytes = utf16_len(substitute_name);
        let print_bytes = utf16_len(print_name);
        let path_bytes = print_bytes + sub_bytes;
        check_size(
            REPARSE_DATA_BUFFER_HEADER_SIZE,
            SYMBOLIC_LINK_REPARSE_BUFFER_HEADER_SIZE,
            path_bytes,
        )?;

        let mut path_buffer = Vec::with_capacity(path_bytes / 2);
        path_buffer.extend_from_slice(print_name);
        path_buffer.extend_from_slice(substitute_name);

        let names = NameBuffer {
            substitute_name_offset: print_bytes as u16,
            substitute_name_length: sub_bytes as u16,
            print_name_offset: 0,
            print_name_length: print_bytes as u16,
            path_buffer,
        };
        let flags = if relative { SYMLINK_FLAG_RELATIVE } else { 0 };
        Ok(Self::assemble(
            ReparseTag::SYMLINK,
            None,
            LinkBody::SymbolicLink { names, flags },
        ))
    }

    /// Wraps opaque data for a Microsoft tag.
    pub fn generic(tag: ReparseTag, data: Vec<u8>) -> Result<Self> {
        if !tag.is_microsoft() {
            return Err(Error::UnsupportedTag(tag.0));
        }
        check_size(REPARSE_DATA_BUFFER_HEADER_SIZE, 0, data.len())?;
        Ok(Self::assemble(tag, None, LinkBody::Generic(data)))
    }

    /// Wraps opaque data for a third-party tag, which must be qualified by a GUID.
    pub fn with_guid(tag: ReparseTag, guid: Guid, data: Vec<u8>) -> Result<Self> {
        if tag.is_microsoft() {
            return Err(Error::UnsupportedTag(tag.0));
        }
        check_size(REPARSE_GUID_DATA_BUFFER_HEADER_SIZE, 0, data.len())?;
        Ok(Self::assemble(tag, Some(guid), LinkBody::Generic(data)))
    }

    fn assemble(tag: ReparseTag, guid: Option<Guid>, body: LinkBody) -> Self {
        let header = ReparseHeader {
            tag,
            data_length: body.byte_len() as u16,
            reserved: 0,
            guid,
        };
        ReparseBuffer { header, body }
    }

    pub fn header(&self) -> &ReparseHeader {
        &self.header
    }

    pub fn body(&self) -> &LinkBody {
        &self.body
    }

    pub fn tag(&self) -> ReparseTag {
        self.header.tag
    }

    /// Total size in bytes, header included.
    pub fn byte_len(&self) -> usize {
        self.header.size() + self.body.byte_len()
    }

    pub fn to_bytes(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(self.byte_len());
        self.header.write(&mut out);
        match &self.body {
            LinkBody::MountPoint(names) => {
                names.write(&mut out);
                names.write_path(&mut out);
            }
            LinkBody::SymbolicLink { names, flags } => {
                names.write(&mut out);
                out.extend_from_slice(&flags.to_le_bytes());
                names.write_path(&mut out);
            }
            LinkBody::Generic(raw) => out.extend_from_slice(raw),
        }
        trace!(
            "encoded {} buffer: {} header + {} data bytes",
            self.header.tag,
            self.header.size(),
            self.header.data_length
        );
        out
    }

    /// Parses a buffer as returned by `FSCTL_GET_REPARSE_POINT`.
    ///
    /// Bytes past the declared data length are ignored.
    pub fn from_bytes(bytes: &[u8]) -> Result<Self> {
        let header = ReparseHeader::parse(bytes)?;
        let start = header.size();
        let end = start + usize::from(header.data_length);
        if end > bytes.len() {
            return Err(Error::malformed(format!(
                "declared data length {} exceeds the {} bytes after the header",
                header.data_length,
                bytes.len() - start
            )));
        }
        let data = &bytes[start..end];
        let body = match header.tag {
            ReparseTag::MOUNT_POINT => {
                LinkBody::MountPoint(NameBuffer::parse(data, MOUNT_POINT_REPARSE_BUFFER_HEADER_SIZE)?)
            }
            ReparseTag::SYMLINK => {
                let names = NameBuffer::parse(data, SYMBOLIC_LINK_REPARSE_BUFFER_HEADER_SIZE)?;
                let flags = read_u32(data, usize::from(MOUNT_POINT_REPARSE_BUFFER_HEADER_SIZE))?;
                LinkBody::SymbolicLink { names, flags }
            }
            _ => LinkBody::Generic(data.to_vec()),
        };
        trace!("decoded {} buffer of {} bytes", header.tag, end);
        Ok(ReparseBuffer { header, body })
    }

    /// Extracts the link names. Fails for tags whose payload is opaque.
    pub fn descriptor(&self) -> Result<LinkDescriptor> {
        let (names, is_relative) = match &self.body {
            LinkBody::MountPoint(names) => (names, false),
            LinkBody::SymbolicLink { names, flags } => (names, flags & SYMLINK_FLAG_RELATIVE != 0),
            LinkBody::Generic(_) => {
                return Err(Error::malformed(format!(
                    "tag {} does not carry link names",
                    self.header.tag
                )))
            }
        };
        Ok(LinkDescriptor {
            tag: self.header.tag,
            substitute_name: names.substitute_name().to_vec(),
            print_name: names.print_name().to_vec(),
            is_relative,
        })
    }
}

fn check_size(header: u16, fixed: u16, variable: usize) -> Result<()> {
    let len = usize::from(header) + usize::from(fixed) + variable;
    if len > MAXIMUM_REPARSE_DATA_BUFFER_SIZE as usize {
        return Err(Error::TooLong { len });
    }
    Ok(())
}

/// The names stored in a mount point or symbolic link.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LinkDescriptor {
    tag: ReparseTag,
    substitute_name: Vec<u16>,
    print_name: Vec<u16>,
    is_relative: bool,
}

impl LinkDescriptor {
    pub fn tag(&self) -> ReparseTag {
        self.tag
    }

    pub fn substitute_name(&self) -> &[u16] {
        &self.substitute_name
    }

    pub fn print_name(&self) -> &[u16] {
        &self.print_name
    }

    pub fn is_relative(&self) -> bool {
        self.is_relative
    }

    /// The substitute name without its `\??\` prefix.
    pub fn target(&self) -> &[u16] {
        ntpath::strip_nt_prefix(&self.substitute_name)
    }

    pub fn substitute_name_lossy(&self) -> String {
        String::from_utf16_lossy(&self.substitute_name)
    }

    pub fn print_name_lossy(&self) -> String {
        String::from_utf16_lossy(&self.print_name)
    }
}

/// Header sent with `FSCTL_DELETE_REPARSE_POINT`. The data length is always 0.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DeleteRequest {
    tag: ReparseTag,
    guid: Option<Guid>,
}

impl DeleteRequest {
    /// The 8-byte form carrying only the tag.
    pub fn plain(tag: ReparseTag) -> Self {
        DeleteRequest { tag, guid: None }
    }

    /// The 24-byte `REPARSE_GUID_DATA_BUFFER` form.
    pub fn with_guid(tag: ReparseTag, guid: Guid) -> Self {
        DeleteRequest {
            tag,
            guid: Some(guid),
        }
    }

    pub fn to_bytes(&self) -> Vec<u8> {
        let header = ReparseHeader {
            tag: self.tag,
            data_length: 0,
            reserved: 0,
            guid: self.guid,
        };
        let mut out = Vec::with_capacity(header.size());
        header.write(&mut out);
        out
    }
}

/// Encodes a link buffer for `tag`. Only mount points and symbolic links are accepted;
/// `relative` is ignored for mount points, which are always absolute.
///
/// ```
/// use ntfslink::reparse::{decode, encode, ReparseTag};
///
/// let sub: Vec<u16> = r"\??\C:\Target".encode_utf16().collect();
/// let print: Vec<u16> = r"C:\Target".encode_utf16().collect();
/// let bytes = encode(ReparseTag::MOUNT_POINT, &sub, &print, false).unwrap();
/// let link = decode(&bytes).unwrap();
/// assert_eq!(link.substitute_name(), &sub[..]);
/// assert_eq!(link.print_name(), &print[..]);
/// ```
pub fn encode(tag: ReparseTag, substitute_name: &[u16], print_name: &[u16], relative: bool) -> Result<Vec<u8>> {
    let buffer = match tag {
        ReparseTag::MOUNT_POINT => ReparseBuffer::mount_point(substitute_name, print_name)?,
        ReparseTag::SYMLINK => ReparseBuffer::symbolic_link(substitute_name, print_name, relative)?,
        other => return Err(Error::UnsupportedTag(other.0)),
    };
    Ok(buffer.to_bytes())
}

/// Decodes a mount point or symbolic link buffer into its names.
pub fn decode(bytes: &[u8]) -> Result<LinkDescriptor> {
    ReparseBuffer::from_bytes(bytes)?.descriptor()
}

fn utf16_len(units: &[u16]) -> usize {
    units.len() * usize::from(WCHAR_SIZE)
}

fn read_u16(bytes: &[u8], at: usize) -> Result<u16> {
    bytes
        .get(at..at + 2)
        .map(|b| u16::from_le_bytes([b[0], b[1]]))
        .ok_or_else(|| Error::malformed(format!("truncated at byte {}", at)))
}

fn read_u32(bytes: &[u8], at: usize) -> Result<u32> {
    bytes
        .get(at..at + 4)
        .map(|b| u32::from_le_bytes([b[0], b[1], b[2], b[3]]))
        .ok_or_else(|| Error::malformed(format!("truncated at byte {}", at)))
}
