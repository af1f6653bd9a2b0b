use std::fs::File;
use std::io::Write;

use h5lazy_format::checksum::lookup3;
use h5lazy_format::{Address, ByteSource, ErrorKind, LinkTarget, OpenOptions};
use h5lazy_io::{open_file, open_mapped, FileSource, MmapSource};
use tempfile::NamedTempFile;

const SIGNATURE: [u8; 8] = [0x89, b'H', b'D', b'F', b'\r', b'\n', 0x1a, b'\n'];
const ROOT: u64 = 48;

fn sealed(mut buf: Vec<u8>) -> Vec<u8> {
    let sum = lookup3(&buf);
    buf.extend_from_slice(&sum.to_le_bytes());
    buf
}

/// A version 2 superblock followed by a root header with two hard links.
fn container() -> Vec<u8> {
    let mut superblock = SIGNATURE.to_vec();
    superblock.extend_from_slice(&[2, 8, 8, 0]);
    for value in [0, u64::MAX, 1 << 20, ROOT] {
        superblock.extend_from_slice(&value.to_le_bytes());
    }
    let mut bytes = sealed(superblock);

    let mut body = Vec::new();
    for (name, target) in [("grid", 0x400u64), ("mesh", 0x800)] {
        let mut link = vec![1, 0, name.len() as u8];
        link.extend_from_slice(name.as_bytes());
        link.extend_from_slice(&target.to_le_bytes());
        body.push(0x06);
        body.extend_from_slice(&(link.len() as u16).to_le_bytes());
        body.push(0);
        body.extend_from_slice(&link);
    }
    let mut header = b"OHDR".to_vec();
    header.extend_from_slice(&[2, 0x01]);
    header.extend_from_slice(&(body.len() as u16).to_le_bytes());
    header.extend_from_slice(&body);
    bytes.extend_from_slice(&sealed(header));
    bytes
}

fn written(bytes: &[u8]) -> NamedTempFile {
    let mut file = NamedTempFile::new().unwrap();
    file.write_all(bytes).unwrap();
    file.flush().unwrap();
    file
}

#[test]
fn file_and_mapping_read_the_same_bytes() {
    let bytes = container();
    let file = written(&bytes);

    let positional = FileSource::open(file.path()).unwrap();
    let mapped = MmapSource::open(file.path()).unwrap();
    assert_eq!(positional.len(), bytes.len() as u64);
    assert_eq!(mapped.len(), bytes.len() as u64);
    assert_eq!(mapped.as_bytes(), bytes.as_slice());

    let mut a = [0u8; 12];
    let mut b = [0u8; 12];
    positional.read_at(ROOT, &mut a).unwrap();
    mapped.read_at(ROOT, &mut b).unwrap();
    assert_eq!(a, b);
    assert_eq!(&a[..4], b"OHDR");
}

#[test]
fn reads_past_the_end_fail() {
    let bytes = container();
    let file = written(&bytes);
    let end = bytes.len() as u64;

    let positional = FileSource::from_file(File::open(file.path()).unwrap()).unwrap();
    let mapped = MmapSource::open(file.path()).unwrap();
    let mut buf = [0u8; 4];
    assert!(positional.read_at(end - 2, &mut buf).is_err());
    assert!(mapped.read_at(end - 2, &mut buf).is_err());
    assert!(mapped.read_at(u64::MAX, &mut buf).is_err());
    // Empty reads at the end are fine.
    assert!(mapped.read_at(end, &mut []).is_ok());
}

#[test]
fn containers_open_through_either_source() {
    let file = written(&container());

    let by_file = open_file(file.path(), OpenOptions::new().strict_checksums(true)).unwrap();
    let by_map = open_mapped(file.path(), OpenOptions::new().strict_checksums(true)).unwrap();
    for members in [
        by_file.group_entries(&by_file.root_group()).unwrap(),
        by_map.group_entries(&by_map.root_group()).unwrap(),
    ] {
        let names: Vec<_> = members.iter().map(|m| m.name.as_str()).collect();
        assert_eq!(names, ["grid", "mesh"]);
        assert_eq!(members[1].target, LinkTarget::Hard(Address::new(0x800)));
    }
    assert_eq!(by_file.superblock(), by_map.superblock());
}

#[test]
fn truncated_files_are_out_of_bounds() {
    let bytes = container();
    let file = written(&bytes[..bytes.len() - 10]);
    let container = open_mapped(file.path(), OpenOptions::new()).unwrap();
    let err = container
        .object_header(Address::new(ROOT))
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Bounds);
}

#[test]
fn missing_files_and_plain_files_are_reported() {
    let dir = tempfile::tempdir().unwrap();
    let err = open_file(dir.path().join("absent.h5"), OpenOptions::new()).unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Io);

    let file = written(b"just some text, not a container at all");
    let err = open_mapped(file.path(), OpenOptions::new()).unwrap_err();
    assert_eq!(err.kind(), ErrorKind::NotAContainer);
}
