use std::cell::{Cell, RefCell};
use std::collections::BTreeMap;
use std::io;
use std::path::{Path, PathBuf};
use std::rc::Rc;

use super::{LinkKind, Links, SymlinkStrategy};
use crate::error::{Error, Operation};
use crate::ntpath;
use crate::platform::{
    Attributes, ControlCode, FileSystem, FILE_ATTRIBUTE_DIRECTORY, FILE_ATTRIBUTE_REPARSE_POINT,
};
use crate::reparse::{self, Guid, ReparseBuffer, ReparseHeader, ReparseTag};

// https://docs.microsoft.com/en-us/windows/desktop/debug/system-error-codes
const ERROR_ACCESS_DENIED: i32 = 5;
const ERROR_NOT_A_REPARSE_POINT: i32 = 0x1126;
const ERROR_REPARSE_TAG_MISMATCH: i32 = 0x1129;
const FILE_ATTRIBUTE_ARCHIVE: u32 = 0x20;

#[derive(Default)]
struct Node {
    dir: bool,
    reparse: Option<Vec<u8>>,
}

/// A file system that lives in a map and answers control requests like NTFS does.
#[derive(Default)]
struct MemFs {
    nodes: RefCell<BTreeMap<PathBuf, Node>>,
    open_handles: Rc<Cell<usize>>,
    privilege_requests: Cell<usize>,
    native_symlinks: bool,
    refuse_set: Cell<bool>,
    refuse_plain_delete: Cell<bool>,
    refuse_all_deletes: Cell<bool>,
    delete_requests: RefCell<Vec<Vec<u8>>>,
}

struct MemHandle {
    path: PathBuf,
    open: Rc<Cell<usize>>,
}

impl Drop for MemHandle {
    fn drop(&mut self) {
        self.open.set(self.open.get() - 1);
    }
}

impl MemFs {
    fn native() -> Self {
        MemFs {
            native_symlinks: true,
            ..MemFs::default()
        }
    }

    fn with_dir(self, path: &str) -> Self {
        self.insert(path, true, None);
        self
    }

    fn with_file(self, path: &str) -> Self {
        self.insert(path, false, None);
        self
    }

    fn insert(&self, path: &str, dir: bool, reparse: Option<Vec<u8>>) {
        self.nodes.borrow_mut().insert(PathBuf::from(path), Node { dir, reparse });
    }

    fn exists(&self, path: &str) -> bool {
        self.nodes.borrow().contains_key(Path::new(path))
    }

    fn reparse_data(&self, path: &str) -> Option<Vec<u8>> {
        self.nodes.borrow().get(Path::new(path)).and_then(|n| n.reparse.clone())
    }

    fn open(&self, path: &Path) -> io::Result<MemHandle> {
        if !self.nodes.borrow().contains_key(path) {
            return Err(io::ErrorKind::NotFound.into());
        }
        self.open_handles.set(self.open_handles.get() + 1);
        Ok(MemHandle {
            path: path.to_path_buf(),
            open: Rc::clone(&self.open_handles),
        })
    }
}

fn tag_of(data: &[u8]) -> ReparseTag {
    ReparseHeader::parse(data).unwrap().tag
}

impl FileSystem for MemFs {
    type Handle = MemHandle;

    fn ensure_privileges(&self) -> io::Result<()> {
        self.privilege_requests.set(self.privilege_requests.get() + 1);
        Ok(())
    }

    fn supports_native_symlinks(&self) -> bool {
        self.native_symlinks
    }

    fn attributes(&self, path: &Path) -> io::Result<Option<Attributes>> {
        Ok(self.nodes.borrow().get(path).map(|node| {
            let mut bits = if node.dir {
                FILE_ATTRIBUTE_DIRECTORY
            } else {
                FILE_ATTRIBUTE_ARCHIVE
            };
            let reparse_tag = node.reparse.as_deref().map(tag_of);
            if reparse_tag.is_some() {
                bits |= FILE_ATTRIBUTE_REPARSE_POINT;
            }
            Attributes { bits, reparse_tag }
        }))
    }

    fn full_path(&self, path: &Path) -> io::Result<Vec<u16>> {
        let text = path.to_string_lossy();
        let full = if ntpath::is_fully_qualified(&ntpath::to_wide(path)) {
            text.into_owned()
        } else {
            format!(r"C:\work\{}", text)
        };
        Ok(full.encode_utf16().collect())
    }

    fn create_dir(&self, path: &Path) -> io::Result<()> {
        let mut nodes = self.nodes.borrow_mut();
        if nodes.contains_key(path) {
            return Err(io::ErrorKind::AlreadyExists.into());
        }
        nodes.insert(path.to_path_buf(), Node { dir: true, reparse: None });
        Ok(())
    }

    fn remove_dir(&self, path: &Path) -> io::Result<()> {
        let mut nodes = self.nodes.borrow_mut();
        match nodes.get(path) {
            Some(node) if node.dir => {
                nodes.remove(path);
                Ok(())
            }
            Some(_) => Err(io::Error::from_raw_os_error(267)),
            None => Err(io::ErrorKind::NotFound.into()),
        }
    }

    fn create_file(&self, path: &Path) -> io::Result<()> {
        let mut nodes = self.nodes.borrow_mut();
        if nodes.contains_key(path) {
            return Err(io::ErrorKind::AlreadyExists.into());
        }
        nodes.insert(path.to_path_buf(), Node::default());
        Ok(())
    }

    fn remove_file(&self, path: &Path) -> io::Result<()> {
        let mut nodes = self.nodes.borrow_mut();
        match nodes.get(path) {
            Some(node) if !node.dir => {
                nodes.remove(path);
                Ok(())
            }
            Some(_) => Err(io::ErrorKind::PermissionDenied.into()),
            None => Err(io::ErrorKind::NotFound.into()),
        }
    }

    fn open_for_read(&self, path: &Path) -> io::Result<MemHandle> {
        self.open(path)
    }

    fn open_for_write(&self, path: &Path) -> io::Result<MemHandle> {
        self.open(path)
    }

    fn device_control(
        &self,
        handle: &MemHandle,
        code: ControlCode,
        input: &[u8],
        output: &mut [u8],
    ) -> io::Result<usize> {
        let mut nodes = self.nodes.borrow_mut();
        let node = nodes
            .get_mut(&handle.path)
            .ok_or_else(|| io::Error::from(io::ErrorKind::NotFound))?;
        match code {
            ControlCode::SetReparsePoint => {
                if self.refuse_set.get() {
                    return Err(io::Error::from_raw_os_error(ERROR_ACCESS_DENIED));
                }
                ReparseBuffer::from_bytes(input)
                    .map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e))?;
                node.reparse = Some(input.to_vec());
                Ok(0)
            }
            ControlCode::GetReparsePoint => {
                let data = node
                    .reparse
                    .as_ref()
                    .ok_or_else(|| io::Error::from_raw_os_error(ERROR_NOT_A_REPARSE_POINT))?;
                output[..data.len()].copy_from_slice(data);
                Ok(data.len())
            }
            ControlCode::DeleteReparsePoint => {
                self.delete_requests.borrow_mut().push(input.to_vec());
                let stored = node
                    .reparse
                    .as_ref()
                    .ok_or_else(|| io::Error::from_raw_os_error(ERROR_NOT_A_REPARSE_POINT))?;
                let refused = self.refuse_all_deletes.get()
                    || (self.refuse_plain_delete.get() && input.len() == 8)
                    || tag_of(input) != tag_of(stored);
                if refused {
                    return Err(io::Error::from_raw_os_error(ERROR_REPARSE_TAG_MISMATCH));
                }
                node.reparse = None;
                Ok(0)
            }
        }
    }

    fn create_symlink(&self, target: &Path, link: &Path, directory: bool) -> io::Result<()> {
        let wide = ntpath::to_wide(target);
        let names = if ntpath::is_fully_qualified(&wide) {
            ntpath::absolute_names(&wide)
        } else {
            ntpath::relative_names(&wide)
        };
        let buffer = ReparseBuffer::symbolic_link(&names.substitute_name, &names.print_name, names.relative)
            .map_err(io::Error::from)?;
        let mut nodes = self.nodes.borrow_mut();
        if nodes.contains_key(link) {
            return Err(io::ErrorKind::AlreadyExists.into());
        }
        nodes.insert(
            link.to_path_buf(),
            Node {
                dir: directory,
                reparse: Some(buffer.to_bytes()),
            },
        );
        Ok(())
    }
}

#[test]
fn junction_lifecycle() {
    let fs = MemFs::default().with_dir(r"C:\real");
    let links = Links::new(&fs);
    let link = Path::new(r"C:\link");

    assert!(!links.check(LinkKind::Junction, link).unwrap());
    links.create(LinkKind::Junction, Path::new(r"C:\real"), link).unwrap();
    assert!(links.check(LinkKind::Junction, link).unwrap());
    assert!(!links.check(LinkKind::Symlink, link).unwrap());
    assert_eq!(links.read(link).unwrap(), PathBuf::from(r"C:\real"));

    let stored = reparse::decode(&fs.reparse_data(r"C:\link").unwrap()).unwrap();
    assert_eq!(stored.tag(), ReparseTag::MOUNT_POINT);
    assert_eq!(stored.substitute_name_lossy(), r"\??\C:\real");
    assert_eq!(stored.print_name_lossy(), r"C:\real");
    assert!(!stored.is_relative());

    links.unlink(link).unwrap();
    assert!(!fs.exists(r"C:\link"));
    assert!(fs.exists(r"C:\real"));
    assert_eq!(fs.open_handles.get(), 0);
}

#[test]
fn junction_target_must_be_an_existing_directory() {
    let fs = MemFs::default().with_file(r"C:\file.txt");
    let links = Links::new(&fs);

    for source in [r"C:\missing", r"C:\file.txt"] {
        match links.create(LinkKind::Junction, Path::new(source), Path::new(r"C:\link")) {
            Err(Error::InvalidTarget { path, .. }) => assert_eq!(path, PathBuf::from(source)),
            other => panic!("expected InvalidTarget, got {:?}", other),
        }
    }
    assert!(!fs.exists(r"C:\link"));
}

#[test]
fn junction_link_must_not_exist() {
    let fs = MemFs::default().with_dir(r"C:\real").with_dir(r"C:\taken");
    let links = Links::new(&fs);

    match links.create(LinkKind::Junction, Path::new(r"C:\real"), Path::new(r"C:\taken")) {
        Err(e @ Error::InvalidLink { .. }) => assert!(e.is_user_error()),
        other => panic!("expected InvalidLink, got {:?}", other),
    }
    assert!(fs.reparse_data(r"C:\taken").is_none());
}

#[test]
fn refused_buffer_removes_the_new_directory() {
    let fs = MemFs::default().with_dir(r"C:\real");
    fs.refuse_set.set(true);
    let links = Links::new(&fs);

    match links.create(LinkKind::Junction, Path::new(r"C:\real"), Path::new(r"C:\link")) {
        Err(e) => {
            assert!(matches!(e, Error::Os { op: Operation::SetReparsePoint, .. }));
            assert_eq!(e.raw_os_error(), Some(ERROR_ACCESS_DENIED));
        }
        Ok(()) => panic!("set should have been refused"),
    }
    assert!(!fs.exists(r"C:\link"));
    assert_eq!(fs.open_handles.get(), 0);
}

#[test]
fn relative_junction_target_is_resolved() {
    let fs = MemFs::default().with_dir("real");
    let links = Links::new(&fs);
    links.create(LinkKind::Junction, Path::new(" real\0"), Path::new(r"C:\link")).unwrap();
    assert_eq!(links.read(Path::new(r"C:\link")).unwrap(), PathBuf::from(r"C:\work\real"));
}

#[test]
fn privileges_are_requested_once() {
    let fs = MemFs::default().with_dir(r"C:\real");
    let links = Links::new(&fs);
    links.create(LinkKind::Junction, Path::new(r"C:\real"), Path::new(r"C:\link")).unwrap();
    links.read(Path::new(r"C:\link")).unwrap();
    links.unlink(Path::new(r"C:\link")).unwrap();
    assert_eq!(fs.privilege_requests.get(), 1);
}

#[test]
fn strategy_follows_native_support() {
    assert_eq!(Links::new(MemFs::native()).symlink_strategy(), SymlinkStrategy::Native);
    assert_eq!(
        Links::new(MemFs::default()).symlink_strategy(),
        SymlinkStrategy::ReparseBuffer
    );
    assert_eq!(
        Links::new(MemFs::native())
            .with_symlink_strategy(SymlinkStrategy::ReparseBuffer)
            .symlink_strategy(),
        SymlinkStrategy::ReparseBuffer
    );
}

#[test]
fn native_file_symlink() {
    let fs = MemFs::native().with_file(r"C:\data\file.txt");
    let links = Links::new(&fs);
    let link = Path::new(r"C:\data\alias.txt");

    links.create(LinkKind::Symlink, Path::new(r"C:\data\file.txt"), link).unwrap();
    assert!(links.check(LinkKind::Symlink, link).unwrap());
    assert!(!links.check(LinkKind::Junction, link).unwrap());
    assert_eq!(links.read(link).unwrap(), PathBuf::from(r"C:\data\file.txt"));

    links.unlink(link).unwrap();
    assert!(!fs.exists(r"C:\data\alias.txt"));
    assert!(fs.exists(r"C:\data\file.txt"));
}

#[test]
fn relative_symlink_from_buffer() {
    let fs = MemFs::default();
    let links = Links::new(&fs);
    let link = Path::new(r"C:\dir\sibling-link");

    // relative targets need not exist
    links.create(LinkKind::Symlink, Path::new(r"..\sibling"), link).unwrap();

    let data = fs.reparse_data(r"C:\dir\sibling-link").unwrap();
    let stored = reparse::decode(&data).unwrap();
    assert_eq!(stored.tag(), ReparseTag::SYMLINK);
    assert!(stored.is_relative());
    assert_eq!(stored.substitute_name_lossy(), r"..\sibling");
    assert_eq!(u32::from_le_bytes([data[16], data[17], data[18], data[19]]), 1);

    let descriptor = links.read_descriptor(link).unwrap();
    assert!(descriptor.is_relative());
    assert_eq!(links.read(link).unwrap(), PathBuf::from(r"..\sibling"));
}

#[test]
fn absolute_symlink_from_buffer_to_directory() {
    let fs = MemFs::default().with_dir(r"D:\photos");
    let links = Links::new(&fs);
    let link = Path::new(r"C:\photos");

    links.create(LinkKind::Symlink, Path::new(r"D:\photos"), link).unwrap();
    let stored = reparse::decode(&fs.reparse_data(r"C:\photos").unwrap()).unwrap();
    assert!(!stored.is_relative());
    assert_eq!(stored.substitute_name_lossy(), r"\??\D:\photos");
    assert_eq!(stored.print_name_lossy(), r"D:\photos");
    assert!(links.check(LinkKind::Symlink, link).unwrap());

    links.unlink(link).unwrap();
    assert!(!fs.exists(r"C:\photos"));
}

#[test]
fn absolute_symlink_target_must_exist() {
    for fs in [MemFs::native(), MemFs::default()] {
        let links = Links::new(&fs);
        match links.create(LinkKind::Symlink, Path::new(r"C:\gone"), Path::new(r"C:\link")) {
            Err(Error::InvalidTarget { .. }) => {}
            other => panic!("expected InvalidTarget, got {:?}", other),
        }
        assert!(!fs.exists(r"C:\link"));
    }
}

#[test]
fn refused_symlink_buffer_removes_the_new_file() {
    let fs = MemFs::default().with_file(r"C:\a.txt");
    fs.refuse_set.set(true);
    let links = Links::new(&fs);
    assert!(links
        .create(LinkKind::Symlink, Path::new(r"C:\a.txt"), Path::new(r"C:\b.txt"))
        .is_err());
    assert!(!fs.exists(r"C:\b.txt"));
}

#[test]
fn non_links_are_rejected() {
    let fs = MemFs::default().with_dir(r"C:\plain").with_file(r"C:\file.txt");
    let opaque = ReparseBuffer::generic(ReparseTag::DEDUP, vec![1, 2, 3, 4]).unwrap();
    fs.insert(r"C:\deduped", false, Some(opaque.to_bytes()));
    let links = Links::new(&fs);

    for path in [r"C:\missing", r"C:\plain", r"C:\file.txt", r"C:\deduped"] {
        match links.read(Path::new(path)) {
            Err(Error::InvalidLink { .. }) => {}
            other => panic!("read({}) should fail with InvalidLink, got {:?}", path, other),
        }
        match links.unlink(Path::new(path)) {
            Err(Error::InvalidLink { .. }) => {}
            other => panic!("unlink({}) should fail with InvalidLink, got {:?}", path, other),
        }
        assert!(!links.check(LinkKind::Junction, Path::new(path)).unwrap());
        assert!(!links.check(LinkKind::Symlink, Path::new(path)).unwrap());
    }
    assert!(fs.exists(r"C:\plain"));
    assert!(fs.reparse_data(r"C:\deduped").is_some());
    assert_eq!(fs.open_handles.get(), 0);
}

#[test]
fn delete_retries_with_guid_header() {
    let fs = MemFs::default().with_dir(r"C:\real");
    let links = Links::new(&fs);
    let link = Path::new(r"C:\link");
    links.create(LinkKind::Junction, Path::new(r"C:\real"), link).unwrap();

    fs.refuse_plain_delete.set(true);
    links.unlink(link).unwrap();

    let requests = fs.delete_requests.borrow();
    assert_eq!(requests.len(), 2);
    assert_eq!(requests[0].len(), 8);
    assert_eq!(requests[1].len(), 24);
    let retry = ReparseHeader::parse(&requests[1]).unwrap();
    assert_eq!(retry.tag, ReparseTag::MOUNT_POINT);
    assert_eq!(retry.data_length, 0);
    assert_eq!(&requests[1][8..], &Guid::default().0[..]);
    assert!(!fs.exists(r"C:\link"));
    assert_eq!(fs.open_handles.get(), 0);
}

#[test]
fn failed_retry_is_fatal() {
    let fs = MemFs::default().with_dir(r"C:\real");
    let links = Links::new(&fs);
    let link = Path::new(r"C:\link");
    links.create(LinkKind::Junction, Path::new(r"C:\real"), link).unwrap();

    fs.refuse_all_deletes.set(true);
    match links.unlink(link) {
        Err(e) => {
            assert!(matches!(e, Error::Os { op: Operation::DeleteReparsePoint, .. }));
            assert_eq!(e.raw_os_error(), Some(ERROR_REPARSE_TAG_MISMATCH));
        }
        Ok(()) => panic!("both delete requests should have been refused"),
    }
    assert_eq!(fs.delete_requests.borrow().len(), 2);
    assert!(links.check(LinkKind::Junction, link).unwrap());
    assert_eq!(fs.open_handles.get(), 0);
}
