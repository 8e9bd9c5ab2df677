// SPDX-License-Identifier: MPL-2.0

use std::thread;

use crate::{
    dir::DirEntryType, prelude::*, Error, Ext2, FileCursor, FileType, ROOT_INO,
};

use self::image::{
    block_pattern, block_ptrs, dir_data, raw_inode, symlink_ptrs, ImageBuilder, RecordingDisk,
};


const REG: u16 = 0o100644;
const DIR: u16 = 0o040755;
const LNK: u16 = 0o120777;

/// Builds the 1 KiB-block fixture image used by most scenarios.
fn fixture_1k() -> (Arc<Ext2>, Arc<RecordingDisk>) {
    let mut builder = ImageBuilder::new(1024, 2000);

    // Inode 2: the root directory, one block of entries.
    builder.write_inode(2, &raw_inode(DIR, 1024, block_ptrs(&[30], 0, 0)));
    builder.write_block(
        30,
        &dir_data(
            &[
                (2, DirEntryType::Dir, ".", 12),
                (2, DirEntryType::Dir, "..", 12),
                (12, DirEntryType::RegFile, "hello", 1000),
            ],
            1024,
        ),
    );

    // Inode 12: a 5000-byte file over five contiguous direct blocks.
    builder.write_inode(
        12,
        &raw_inode(REG, 5000, block_ptrs(&[100, 101, 102, 103, 104], 0, 0)),
    );
    for bid in 100..105 {
        builder.fill_block(bid);
    }

    // Inode 13: an empty directory.
    builder.write_inode(13, &raw_inode(DIR, 0, block_ptrs(&[], 0, 0)));

    // Inode 14: a directory for sequential enumeration.
    builder.write_inode(14, &raw_inode(DIR, 1024, block_ptrs(&[31], 0, 0)));
    builder.write_block(
        31,
        &dir_data(
            &[
                (2, DirEntryType::Dir, ".", 12),
                (2, DirEntryType::Dir, "..", 12),
                (20, DirEntryType::RegFile, "abc", 16),
                (21, DirEntryType::RegFile, "tail", 984),
            ],
            1024,
        ),
    );

    // Inode 15: a fast symlink held in the pointer area.
    builder.write_inode(15, &raw_inode(LNK, 5, symlink_ptrs("/file")));

    // Inode 16: a symlink too long for the pointer area.
    let long_target: String = core::iter::repeat('t').take(70).collect();
    builder.write_inode(16, &raw_inode(LNK, 70, block_ptrs(&[32], 0, 0)));
    builder.write_block(32, long_target.as_bytes());

    // Inode 17: a directory whose last record overruns the file size.
    builder.write_inode(17, &raw_inode(DIR, 1024, block_ptrs(&[33], 0, 0)));
    builder.write_block(
        33,
        &dir_data(
            &[
                (2, DirEntryType::Dir, ".", 12),
                (2, DirEntryType::Dir, "..", 12),
                (22, DirEntryType::RegFile, "x", 1000),
            ],
            1024,
        ),
    );
    // Stretch the last record past the end of the directory.
    builder.write_bytes(33 * 1024 + 24 + 4, &1016u16.to_le_bytes());

    // Inode 18: a file whose first block pointer is a hole.
    builder.write_inode(18, &raw_inode(REG, 1024, block_ptrs(&[0], 0, 0)));

    // Inode 19: a character device, which this driver refuses.
    builder.write_inode(19, &raw_inode(0o020644, 0, block_ptrs(&[], 0, 0)));

    // Inode 20: a file reaching two blocks into the double-indirect range
    // (1 KiB blocks: 256 pointers per indirect block, s_range = 268).
    builder.write_inode(
        20,
        &raw_inode(
            REG,
            270 * 1024,
            block_ptrs(
                &[300, 301, 302, 303, 304, 305, 306, 307, 308, 309, 310, 311],
                320,
                330,
            ),
        ),
    );
    let single_entries: Vec<u32> = (400..656).collect();
    builder.write_indirect_block(320, &single_entries);
    builder.write_indirect_block(330, &[340]);
    builder.write_indirect_block(340, &[500, 501]);
    builder.fill_block(500);
    builder.fill_block(501);

    // Inode 21: a file whose tail lies past the double-indirect range
    // (d_range = 12 + 256 + 256^2 = 65804 blocks).
    builder.write_inode(21, &raw_inode(REG, 65805 * 1024, block_ptrs(&[], 0, 0)));

    // Inode 22: metadata of interest only.
    let mut meta_inode = raw_inode(0o100640, 0, block_ptrs(&[], 0, 0));
    meta_inode.uid = 1000;
    meta_inode.gid = 100;
    meta_inode.hard_links = 2;
    meta_inode.atime = 111;
    meta_inode.mtime = 222;
    meta_inode.ctime = 333;
    builder.write_inode(22, &meta_inode);

    let disk = builder.build();
    let fs = Ext2::open(disk.clone() as _).unwrap();
    disk.take_log();
    (fs, disk)
}

/// Builds the 4 KiB-block fixture with a fully populated single-indirect
/// table (1024 pointers).
fn fixture_4k() -> (Arc<Ext2>, Arc<RecordingDisk>) {
    let mut builder = ImageBuilder::new(4096, 1300);

    builder.write_inode(2, &raw_inode(DIR, 0, block_ptrs(&[], 0, 0)));
    builder.write_inode(
        12,
        &raw_inode(
            REG,
            4096 * (12 + 1024),
            block_ptrs(
                &[40, 41, 42, 43, 44, 45, 46, 47, 48, 49, 50, 51],
                150,
                0,
            ),
        ),
    );
    let entries: Vec<u32> = (200..1224).collect();
    builder.write_indirect_block(150, &entries);
    builder.fill_block(200);
    builder.fill_block(700);
    builder.fill_block(1223);

    let disk = builder.build();
    let fs = Ext2::open(disk.clone() as _).unwrap();
    disk.take_log();
    (fs, disk)
}

/// Builds the 8 KiB-block fixture, where one block spans two hardware
/// pages.
fn fixture_8k() -> (Arc<Ext2>, Arc<RecordingDisk>) {
    let mut builder = ImageBuilder::new(8192, 128);

    // Inode 2: the root directory, 40 bytes of entries.
    builder.write_inode(2, &raw_inode(DIR, 40, block_ptrs(&[20], 0, 0)));
    builder.write_block(
        20,
        &dir_data(
            &[
                (2, DirEntryType::Dir, ".", 12),
                (2, DirEntryType::Dir, "..", 12),
                (12, DirEntryType::RegFile, "hello", 16),
            ],
            40,
        ),
    );

    // Inode 12: a 10000-byte file over two contiguous blocks.
    builder.write_inode(12, &raw_inode(REG, 10000, block_ptrs(&[100, 101], 0, 0)));
    builder.fill_block(100);
    builder.fill_block(101);

    let disk = builder.build();
    let fs = Ext2::open(disk.clone() as _).unwrap();
    disk.take_log();
    (fs, disk)
}

lazy_static! {
    static ref SHARED: (Arc<Ext2>, Arc<RecordingDisk>) = fixture_1k();
}

#[test]
fn open_reads_superblock_then_descriptor_table() {
    let disk = ImageBuilder::new(1024, 64).build();
    Ext2::open(disk.clone() as _).unwrap();
    // Two sectors of superblock at LBA 2, one sector of descriptors at the
    // first block boundary after byte 2048.
    assert_eq!(disk.take_log(), vec![(2, 2), (4, 1)]);
}

#[test]
fn open_rejects_bad_magic() {
    let mut builder = ImageBuilder::new(1024, 64);
    builder.write_bytes(1024 + 56, &0x1234u16.to_le_bytes());
    let disk = builder.build();
    assert_eq!(
        Ext2::open(disk as _).unwrap_err(),
        Error::GeometryInvalid
    );
}

#[test]
fn find_entry_resolves_a_name_in_the_root() {
    let (fs, _) = &*SHARED;
    let root = fs.access_root().unwrap();
    assert_eq!(root.ino(), ROOT_INO);
    assert_eq!(root.file_type().unwrap(), FileType::Dir);

    let entry = root.find_entry("hello").unwrap().unwrap();
    assert_eq!(entry.ino(), 12);
    assert_eq!(entry.file_type(), FileType::Regular);

    assert!(root.find_entry("absent").unwrap().is_none());
}

#[test]
fn direct_blocks_are_fused_and_the_tail_reads_zero() {
    let (fs, disk) = fixture_1k();
    let inode = fs.access_inode(12).unwrap();
    let memory = inode.data_memory().unwrap();
    disk.take_log();

    // First page-in: four contiguous blocks, one device read.
    memory.lock(0, 4096).unwrap();
    assert_eq!(disk.take_log(), vec![(200, 8)]);

    // Second page-in: the final block alone.
    memory.lock(4096, 4096).unwrap();
    assert_eq!(disk.take_log(), vec![(208, 2)]);

    // Locking resident pages issues no further reads.
    let window = memory.lock(0, 8192).unwrap();
    assert_eq!(disk.take_log(), vec![]);

    let mut contents = vec![0u8; 8192];
    window.read_bytes(0, &mut contents).unwrap();
    for (idx, bid) in (100..105).enumerate() {
        let expected = block_pattern(bid, 1024);
        let start = idx * 1024;
        let valid = 1024.min(5000 - start);
        assert_eq!(&contents[start..start + valid], &expected[..valid]);
    }
    assert!(contents[5000..].iter().all(|&byte| byte == 0));
}

#[test]
fn a_full_single_indirect_table_fuses_into_one_read() {
    let (fs, disk) = fixture_4k();
    let inode = fs.access_inode(12).unwrap();
    let memory = inode.data_memory().unwrap();
    disk.take_log();

    let window = memory.lock(12 * 4096, 1024 * 4096).unwrap();
    // One read caches the single-indirect block, then one fused read covers
    // all 1024 data blocks.
    assert_eq!(disk.take_log(), vec![(150 * 8, 8), (200 * 8, 1024 * 8)]);

    for bid in [200u32, 700, 1223] {
        let offset = (12 + bid as usize - 200) * 4096;
        let mut block = vec![0u8; 4096];
        window.read_bytes(offset, &mut block).unwrap();
        assert_eq!(block, block_pattern(bid, 4096));
    }
}

#[test]
fn the_double_indirect_path_resolves_through_both_caches() {
    let (fs, disk) = fixture_1k();
    let inode = fs.access_inode(20).unwrap();
    let memory = inode.data_memory().unwrap();
    disk.take_log();

    let window = memory.lock(268 * 1024, 4096).unwrap();
    // The double-indirect root, the second-level block, then one fused read
    // of the two data blocks.
    assert_eq!(disk.take_log(), vec![(660, 2), (680, 2), (1000, 4)]);

    let mut contents = vec![0u8; 2048];
    window.read_bytes(268 * 1024, &mut contents).unwrap();
    assert_eq!(&contents[..1024], &block_pattern(500, 1024)[..]);
    assert_eq!(&contents[1024..], &block_pattern(501, 1024)[..]);
}

#[test]
fn read_entries_walks_record_lengths_exactly() {
    let (fs, _) = &*SHARED;
    let inode = fs.access_inode(14).unwrap();
    let mut cursor = FileCursor::new(inode);

    let mut names = Vec::new();
    let mut offsets = Vec::new();
    while let Some(name) = cursor.read_entries().unwrap() {
        names.push(name);
        offsets.push(cursor.offset());
    }
    assert_eq!(names, [".", "..", "abc", "tail"]);
    assert_eq!(offsets, [12, 24, 40, 1024]);
    // The record lengths tile the directory size exactly.
    assert_eq!(cursor.offset(), fs.access_inode(14).unwrap().file_size().unwrap());
    assert!(cursor.read_entries().unwrap().is_none());
}

#[test]
fn lookups_work_when_blocks_span_multiple_pages() {
    let (fs, disk) = fixture_8k();
    let root = fs.access_root().unwrap();
    disk.take_log();

    let entry = root.find_entry("hello").unwrap().unwrap();
    assert_eq!(entry.ino(), 12);
    assert_eq!(entry.file_type(), FileType::Regular);
    // The whole 8 KiB directory block arrives as one two-page request.
    assert_eq!(disk.take_log(), vec![(20 * 16, 16)]);

    let mut cursor = FileCursor::new(root);
    let mut names = Vec::new();
    while let Some(name) = cursor.read_entries().unwrap() {
        names.push(name);
    }
    assert_eq!(names, [".", "..", "hello"]);
    assert_eq!(cursor.offset(), 40);

    let inode = fs.access_inode(12).unwrap();
    let memory = inode.data_memory().unwrap();
    disk.take_log();
    let window = memory.lock(0, 16384).unwrap();
    // Two contiguous blocks fuse into one read.
    assert_eq!(disk.take_log(), vec![(1600, 32)]);

    let mut contents = vec![0u8; 16384];
    window.read_bytes(0, &mut contents).unwrap();
    assert_eq!(&contents[..8192], &block_pattern(100, 8192)[..]);
    assert_eq!(&contents[8192..10000], &block_pattern(101, 8192)[..10000 - 8192]);
    assert!(contents[10000..].iter().all(|&byte| byte == 0));
}

#[test]
fn sub_block_manage_requests_are_rejected() {
    let (fs, _) = fixture_8k();
    let inode = fs.access_inode(12).unwrap();
    let memory = inode.data_memory().unwrap();

    // A request shorter than one block cannot hold whole blocks.
    assert_eq!(memory.lock(0, 4096).unwrap_err(), Error::AlignmentViolation);
    // A request not starting on a block boundary is refused outright.
    assert_eq!(
        memory.lock(4096, 8192).unwrap_err(),
        Error::AlignmentViolation
    );
}

#[test]
fn records_are_shared_and_initialized_once() {
    let (fs, _) = &*SHARED;
    let first = fs.access_inode(2).unwrap();
    let second = fs.access_inode(2).unwrap();
    assert!(Arc::ptr_eq(&first, &second));
    assert!(first.is_ready() && second.is_ready());
}

#[test]
fn concurrent_access_yields_one_record() {
    let (fs, _) = fixture_1k();
    let handles: Vec<_> = (0..4)
        .map(|_| {
            let fs = fs.clone();
            thread::spawn(move || fs.access_inode(12).unwrap())
        })
        .collect();
    let inodes: Vec<_> = handles.into_iter().map(|h| h.join().unwrap()).collect();
    for inode in &inodes[1..] {
        assert!(Arc::ptr_eq(&inodes[0], inode));
    }
}

#[test]
fn an_empty_directory_resolves_without_device_reads() {
    let (fs, disk) = fixture_1k();
    let inode = fs.access_inode(13).unwrap();
    disk.take_log();

    assert!(inode.find_entry("anything").unwrap().is_none());
    assert_eq!(disk.take_log(), vec![]);
}

#[test]
fn find_entry_is_idempotent() {
    let (fs, disk) = fixture_1k();
    let root = fs.access_root().unwrap();

    let first = root.find_entry("hello").unwrap();
    disk.take_log();
    let second = root.find_entry("hello").unwrap();
    assert_eq!(first, second);
    // The directory pages are resident after the first walk.
    assert_eq!(disk.take_log(), vec![]);
}

#[test]
fn a_hole_in_the_block_map_is_surfaced() {
    let (fs, _) = &*SHARED;
    let inode = fs.access_inode(18).unwrap();
    let memory = inode.data_memory().unwrap();
    assert_eq!(memory.lock(0, 4096).unwrap_err(), Error::HoleEncountered);
}

#[test]
fn the_triple_indirect_range_is_refused() {
    let (fs, _) = &*SHARED;
    let inode = fs.access_inode(21).unwrap();
    let memory = inode.data_memory().unwrap();
    assert_eq!(
        memory.lock(65804 * 1024, 4096).unwrap_err(),
        Error::TripleIndirectUnsupported
    );
}

#[test]
fn unsupported_inode_types_are_refused_and_not_cached() {
    let (fs, _) = &*SHARED;
    assert_eq!(
        fs.access_inode(19).unwrap_err(),
        Error::UnsupportedInodeType
    );
    assert_eq!(
        fs.access_inode(19).unwrap_err(),
        Error::UnsupportedInodeType
    );
}

#[test]
fn an_overrunning_directory_record_is_corrupt() {
    let (fs, _) = &*SHARED;
    let inode = fs.access_inode(17).unwrap();
    assert_eq!(
        inode.find_entry("nope").unwrap_err(),
        Error::DirectoryCorrupt
    );
}

#[test]
fn symlink_targets_are_read_from_both_layouts() {
    let (fs, _) = &*SHARED;

    let fast = fs.access_inode(15).unwrap();
    assert_eq!(fast.file_type().unwrap(), FileType::SymLink);
    assert_eq!(fast.read_link().unwrap(), "/file");

    let long = fs.access_inode(16).unwrap();
    let expected: String = core::iter::repeat('t').take(70).collect();
    assert_eq!(long.read_link().unwrap(), expected);
}

#[test]
fn metadata_is_published_after_the_ready_gate() {
    let (fs, _) = &*SHARED;
    let inode = fs.access_inode(22).unwrap();
    assert!(inode.is_ready());
    assert_eq!(inode.file_perm().unwrap().bits(), 0o640);
    assert_eq!(inode.uid().unwrap(), 1000);
    assert_eq!(inode.gid().unwrap(), 100);
    assert_eq!(inode.hard_links().unwrap(), 2);
    assert_eq!(inode.atime().unwrap(), Duration::from_secs(111));
    assert_eq!(inode.mtime().unwrap(), Duration::from_secs(222));
    assert_eq!(inode.ctime().unwrap(), Duration::from_secs(333));
}
