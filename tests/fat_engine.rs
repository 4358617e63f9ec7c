//! Integration tests against the built-in FAT16 engine directly, bypassing
//! the VFS dispatch layer. Grounded on spec.md §8's testable properties.

use rsh::fatfs::{FileSystem, OpenFlags};
use rsh::image::{Image, MIN_CLUSTER_SIZE_POLICY, MIN_IMAGE_SIZE_POLICY};

fn new_fs() -> (tempfile::TempDir, FileSystem) {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("image.img");
    let image = Image::init_or_open(&path, MIN_IMAGE_SIZE_POLICY, MIN_CLUSTER_SIZE_POLICY, false).unwrap();
    (dir, FileSystem::new(image))
}

#[test]
fn root_starts_with_dot_entries() {
    let (_dir, fs) = new_fs();
    let (_, entry) = fs.resolve(&[]).unwrap();
    assert!(entry.is_dir());
}

#[test]
fn write_then_read_roundtrips_exact_bytes() {
    let (_dir, mut fs) = new_fs();
    let mut handle = fs.open("/greeting.txt", OpenFlags::CREAT).unwrap();
    let payload = b"hello from the built-in filesystem";
    let written = fs.write(&mut handle, payload).unwrap();
    assert_eq!(written, payload.len());
    fs.close(&handle).unwrap();

    let mut handle = fs.open("/greeting.txt", OpenFlags::empty()).unwrap();
    let mut buf = vec![0u8; payload.len()];
    let read = fs.read(&mut handle, &mut buf).unwrap();
    assert_eq!(read, payload.len());
    assert_eq!(&buf, payload);
}

#[test]
fn append_spans_a_cluster_boundary() {
    let (_dir, mut fs) = new_fs();
    let cluster_size = fs.cluster_size() as usize;
    let first_chunk = vec![b'a'; cluster_size - 10];
    let second_chunk = vec![b'b'; 100];

    let mut handle = fs.open("/big.bin", OpenFlags::CREAT).unwrap();
    fs.write(&mut handle, &first_chunk).unwrap();
    fs.close(&handle).unwrap();

    let mut handle = fs.open("/big.bin", OpenFlags::APPEND).unwrap();
    fs.write(&mut handle, &second_chunk).unwrap();
    fs.close(&handle).unwrap();

    let mut handle = fs.open("/big.bin", OpenFlags::empty()).unwrap();
    let mut buf = vec![0u8; first_chunk.len() + second_chunk.len()];
    let read = fs.read(&mut handle, &mut buf).unwrap();
    assert_eq!(read, buf.len());
    assert_eq!(&buf[..first_chunk.len()], &first_chunk[..]);
    assert_eq!(&buf[first_chunk.len()..], &second_chunk[..]);
}

#[test]
fn mkdir_creates_dot_and_dotdot() {
    let (_dir, mut fs) = new_fs();
    fs.mkdir("/sub").unwrap();
    let (_, entry) = fs.resolve(&["sub".to_string()]).unwrap();
    assert!(entry.is_dir());

    let mut handle = fs.open("/sub", OpenFlags::empty()).unwrap();
    let mut names = Vec::new();
    while let Some(child) = fs.readdir(&mut handle).unwrap() {
        names.push(child.name());
    }
    assert!(names.contains(&".".to_string()));
    assert!(names.contains(&"..".to_string()));
}

#[test]
fn mkdir_rejects_duplicate_name() {
    let (_dir, mut fs) = new_fs();
    fs.mkdir("/dup").unwrap();
    let err = fs.mkdir("/dup").unwrap_err();
    assert!(matches!(err, rsh::Error::Exists(_)));
}

#[test]
fn unlink_then_resolve_fails() {
    let (_dir, mut fs) = new_fs();
    let handle = fs.open("/gone.txt", OpenFlags::CREAT).unwrap();
    fs.close(&handle).unwrap();
    fs.unlink("/gone.txt").unwrap();
    let err = fs.resolve(&["gone.txt".to_string()]).unwrap_err();
    assert!(matches!(err, rsh::Error::NoEnt(_)));
}
