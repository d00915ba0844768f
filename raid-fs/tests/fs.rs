//! End-to-end tests over real (temporary) disk images.

use std::env;
use std::fs::{self, OpenOptions};
use std::path::PathBuf;
use std::process;
use std::sync::atomic::{AtomicUsize, Ordering};

use raid_fs::{Error, RaidFileSystem, RaidMode, StatKind, BLOCK_SIZE, ROOT_INODE};

const IMAGE_SIZE: u64 = 1 << 20;
const MAX_FILE_BYTES: u64 = 71 * BLOCK_SIZE as u64;

static SERIAL: AtomicUsize = AtomicUsize::new(0);

fn scratch_disks(count: usize) -> Vec<PathBuf> {
    let serial = SERIAL.fetch_add(1, Ordering::Relaxed);
    (0..count)
        .map(|i| {
            let path = env::temp_dir().join(format!(
                "raid-fs-test-{}-{serial}-{i}.img",
                process::id()
            ));
            let fd = OpenOptions::new()
                .read(true)
                .write(true)
                .create(true)
                .truncate(true)
                .open(&path)
                .unwrap();
            fd.set_len(IMAGE_SIZE).unwrap();
            path
        })
        .collect()
}

fn cleanup(paths: &[PathBuf]) {
    for path in paths {
        let _ = fs::remove_file(path);
    }
}

fn make(paths: &[PathBuf], mode: RaidMode) -> RaidFileSystem {
    RaidFileSystem::format(paths, mode, 32, 256, 1000, 1000).unwrap();
    RaidFileSystem::mount(paths).unwrap()
}

#[test]
fn fresh_root_attributes() {
    let disks = scratch_disks(1);
    let fs = make(&disks, RaidMode::Striped);

    let stat = fs.getattr("/").unwrap();
    assert_eq!(stat.ino, ROOT_INODE);
    assert_eq!(stat.kind, StatKind::DIR);
    assert_eq!(stat.links, 1);
    assert_eq!(stat.size, 0);
    assert_eq!(stat.uid, 1000);

    drop(fs);
    cleanup(&disks);
}

#[test]
fn write_read_round_trip_through_indirect_range() {
    let disks = scratch_disks(1);
    let mut fs = make(&disks, RaidMode::Striped);

    fs.mknod("/data", 0o644, 0, 0).unwrap();
    // long enough to need the indirect block (> 7 direct blocks)
    let payload: Vec<u8> = (0..20_000u32).map(|i| (i % 251) as u8).collect();
    assert_eq!(fs.write("/data", 0, &payload).unwrap(), payload.len());

    let mut back = vec![0; payload.len()];
    assert_eq!(fs.read("/data", 0, &mut back).unwrap(), payload.len());
    assert_eq!(back, payload);

    // unaligned read in the middle
    let mut mid = vec![0; 777];
    assert_eq!(fs.read("/data", 4321, &mut mid).unwrap(), 777);
    assert_eq!(mid[..], payload[4321..4321 + 777]);

    assert_eq!(fs.getattr("/data").unwrap().size, payload.len() as u64);

    drop(fs);
    cleanup(&disks);
}

#[test]
fn overwrite_keeps_size() {
    let disks = scratch_disks(1);
    let mut fs = make(&disks, RaidMode::Striped);

    fs.mknod("/f", 0o644, 0, 0).unwrap();
    fs.write("/f", 0, &[7; 1000]).unwrap();
    fs.write("/f", 100, &[9; 50]).unwrap();

    let stat = fs.getattr("/f").unwrap();
    assert_eq!(stat.size, 1000);
    let mut back = vec![0; 1000];
    fs.read("/f", 0, &mut back).unwrap();
    assert_eq!(back[..100], [7; 100]);
    assert_eq!(back[100..150], [9; 50]);
    assert_eq!(back[150..], [7; 850]);

    drop(fs);
    cleanup(&disks);
}

#[test]
fn read_clamps_to_file_size() {
    let disks = scratch_disks(1);
    let mut fs = make(&disks, RaidMode::Striped);

    fs.mknod("/small", 0o644, 0, 0).unwrap();
    fs.write("/small", 0, &[1; 100]).unwrap();

    let mut buf = vec![0; BLOCK_SIZE];
    assert_eq!(fs.read("/small", 0, &mut buf).unwrap(), 100);
    assert_eq!(fs.read("/small", 200, &mut buf).unwrap(), 0);
    assert_eq!(fs.read("/small", 60, &mut buf).unwrap(), 40);

    drop(fs);
    cleanup(&disks);
}

#[test]
fn write_past_maximum_span_is_rejected() {
    let disks = scratch_disks(1);
    let mut fs = make(&disks, RaidMode::Striped);

    fs.mknod("/f", 0o644, 0, 0).unwrap();
    assert!(matches!(
        fs.write("/f", MAX_FILE_BYTES, &[0]),
        Err(Error::InvalidArgument)
    ));
    // right up to the limit is fine
    fs.write("/f", MAX_FILE_BYTES - 1, &[0]).unwrap();
    assert_eq!(fs.getattr("/f").unwrap().size, MAX_FILE_BYTES);

    drop(fs);
    cleanup(&disks);
}

#[test]
fn inode_exhaustion_reports_no_space() {
    let disks = scratch_disks(1);
    let mut fs = make(&disks, RaidMode::Striped);

    // the root took 1 of the 32 formatted inodes
    assert_eq!(fs.free_inodes().unwrap(), 31);
    for i in 0..31 {
        fs.mknod(&format!("/f{i}"), 0o644, 0, 0).unwrap();
    }
    assert_eq!(fs.free_inodes().unwrap(), 0);
    assert!(matches!(
        fs.mknod("/straw", 0o644, 0, 0),
        Err(Error::NoSpace)
    ));
    // a failed create must not leave half-written directory state
    assert!(matches!(fs.getattr("/straw"), Err(Error::NotFound)));

    drop(fs);
    cleanup(&disks);
}

#[test]
fn create_over_existing_name_is_rejected() {
    let disks = scratch_disks(1);
    let mut fs = make(&disks, RaidMode::Striped);

    fs.mknod("/x", 0o644, 0, 0).unwrap();
    let free = fs.free_inodes().unwrap();
    assert!(matches!(fs.mknod("/x", 0o600, 0, 0), Err(Error::AlreadyExists)));
    assert!(matches!(fs.mkdir("/x", 0o755, 0, 0), Err(Error::AlreadyExists)));
    // the refused creates must not consume inodes
    assert_eq!(fs.free_inodes().unwrap(), free);

    drop(fs);
    cleanup(&disks);
}

#[test]
fn path_resolution_walks_nested_directories() {
    let disks = scratch_disks(1);
    let mut fs = make(&disks, RaidMode::Striped);

    fs.mkdir("/a", 0o755, 0, 0).unwrap();
    fs.mkdir("/a/b", 0o755, 0, 0).unwrap();
    fs.mknod("/a/b/c", 0o644, 0, 0).unwrap();

    assert_eq!(fs.getattr("/a").unwrap().kind, StatKind::DIR);
    assert_eq!(fs.getattr("/a/b").unwrap().kind, StatKind::DIR);
    assert_eq!(fs.getattr("/a/b/c").unwrap().kind, StatKind::FILE);

    assert!(matches!(fs.getattr("/a/missing"), Err(Error::NotFound)));
    assert!(matches!(fs.getattr("/missing/b"), Err(Error::NotFound)));
    // a file in the middle of the walk
    assert!(matches!(fs.getattr("/a/b/c/d"), Err(Error::NotADirectory)));

    drop(fs);
    cleanup(&disks);
}

#[test]
fn readdir_lists_dots_then_entries() {
    let disks = scratch_disks(1);
    let mut fs = make(&disks, RaidMode::Striped);

    fs.mkdir("/a", 0o755, 0, 0).unwrap();
    fs.mknod("/a/f", 0o644, 0, 0).unwrap();

    let root = fs.readdir("/").unwrap();
    assert_eq!(root[0].name, ".");
    assert_eq!(root[0].ino, ROOT_INODE);
    assert_eq!(root[1].name, "..");
    assert_eq!(root[1].ino, ROOT_INODE);
    assert_eq!(root[2].name, "a");

    let a_ino = fs.getattr("/a").unwrap().ino;
    let sub = fs.readdir("/a").unwrap();
    let names: Vec<&str> = sub.iter().map(|e| e.name.as_str()).collect();
    assert_eq!(names, [".", "..", "f"]);
    assert_eq!(sub[0].ino, a_ino);
    assert_eq!(sub[1].ino, ROOT_INODE);

    assert!(matches!(fs.readdir("/a/f"), Err(Error::NotADirectory)));

    drop(fs);
    cleanup(&disks);
}

#[test]
fn mkdir_maintains_link_counts() {
    let disks = scratch_disks(1);
    let mut fs = make(&disks, RaidMode::Striped);

    let root_links = fs.getattr("/").unwrap().links;
    fs.mkdir("/a", 0o755, 0, 0).unwrap();
    // the new directory counts . and ..
    assert_eq!(fs.getattr("/a").unwrap().links, 2);
    assert_eq!(fs.getattr("/").unwrap().links, root_links + 1);

    fs.rmdir("/a").unwrap();
    assert_eq!(fs.getattr("/").unwrap().links, root_links);

    drop(fs);
    cleanup(&disks);
}

#[test]
fn unlink_frees_inode_and_blocks() {
    let disks = scratch_disks(1);
    let mut fs = make(&disks, RaidMode::Striped);

    let free_blocks = fs.free_data_blocks().unwrap();
    let free_inodes = fs.free_inodes().unwrap();

    fs.mknod("/victim", 0o644, 0, 0).unwrap();
    fs.write("/victim", 0, &vec![5; 10_000]).unwrap();
    assert!(fs.free_data_blocks().unwrap() < free_blocks);

    fs.unlink("/victim").unwrap();
    assert!(matches!(fs.getattr("/victim"), Err(Error::NotFound)));
    assert_eq!(fs.free_data_blocks().unwrap(), free_blocks);
    assert_eq!(fs.free_inodes().unwrap(), free_inodes);

    // the freed number is handed out again, lowest first
    fs.mknod("/next", 0o644, 0, 0).unwrap();
    assert_eq!(fs.getattr("/next").unwrap().ino, 1);

    drop(fs);
    cleanup(&disks);
}

#[test]
fn unlink_and_rmdir_check_kinds() {
    let disks = scratch_disks(1);
    let mut fs = make(&disks, RaidMode::Striped);

    fs.mkdir("/d", 0o755, 0, 0).unwrap();
    fs.mknod("/f", 0o644, 0, 0).unwrap();

    assert!(matches!(fs.unlink("/d"), Err(Error::IsADirectory)));
    assert!(matches!(fs.rmdir("/f"), Err(Error::NotADirectory)));
    assert!(matches!(fs.unlink("/ghost"), Err(Error::NotFound)));

    drop(fs);
    cleanup(&disks);
}

#[test]
fn removed_entry_slot_is_reused() {
    let disks = scratch_disks(1);
    let mut fs = make(&disks, RaidMode::Striped);

    fs.mknod("/a", 0o644, 0, 0).unwrap();
    fs.mknod("/b", 0o644, 0, 0).unwrap();
    let size_before = fs.getattr("/").unwrap().size;

    fs.unlink("/a").unwrap();
    fs.mknod("/c", 0o644, 0, 0).unwrap();
    // /c takes the tombstoned slot instead of growing the directory
    assert_eq!(fs.getattr("/").unwrap().size, size_before);

    let names: Vec<String> = fs.readdir("/").unwrap().into_iter().map(|e| e.name).collect();
    assert_eq!(names, [".", "..", "c", "b"]);

    drop(fs);
    cleanup(&disks);
}

#[test]
fn mirrored_disks_stay_identical() {
    let disks = scratch_disks(2);
    let mut fs = make(&disks, RaidMode::Mirrored);

    fs.mkdir("/dir", 0o755, 0, 0).unwrap();
    fs.mknod("/dir/file", 0o644, 0, 0).unwrap();
    fs.write("/dir/file", 0, &vec![0xAB; 9000]).unwrap();
    fs.unlink("/dir/file").unwrap();
    fs.mknod("/dir/file2", 0o644, 0, 0).unwrap();
    fs.write("/dir/file2", 300, &vec![0xCD; 5000]).unwrap();
    drop(fs);

    let a = fs::read(&disks[0]).unwrap();
    let b = fs::read(&disks[1]).unwrap();
    // superblocks agree on everything but the trailing disk id
    assert_eq!(a[..60], b[..60]);
    assert_ne!(a[60..64], b[60..64]);
    assert_eq!(a[64..], b[64..]);

    cleanup(&disks);
}

#[test]
fn striping_spreads_file_blocks_round_robin() {
    let disks = scratch_disks(3);
    let mut fs = make(&disks, RaidMode::Striped);

    fs.mknod("/striped", 0o644, 0, 0).unwrap();
    let patterns: Vec<[u8; BLOCK_SIZE]> =
        (0..6).map(|i| [0xA0 + i as u8; BLOCK_SIZE]).collect();
    for (i, block) in patterns.iter().enumerate() {
        fs.write("/striped", (i * BLOCK_SIZE) as u64, block).unwrap();
    }
    drop(fs);

    let images: Vec<Vec<u8>> = disks.iter().map(|p| fs::read(p).unwrap()).collect();
    for (i, pattern) in patterns.iter().enumerate() {
        for (disk, image) in images.iter().enumerate() {
            let holds = image
                .chunks_exact(BLOCK_SIZE)
                .any(|chunk| chunk == pattern);
            assert_eq!(holds, disk == i % 3, "block {i} on disk {disk}");
        }
    }

    cleanup(&disks);
}

#[test]
fn verified_read_outvotes_single_corrupt_disk() {
    let disks = scratch_disks(3);
    let mut fs = make(&disks, RaidMode::MirroredVerified);

    let payload = [0x5A; BLOCK_SIZE];
    fs.mknod("/guarded", 0o644, 0, 0).unwrap();
    fs.write("/guarded", 0, &payload).unwrap();
    drop(fs);

    // flip the data on one member behind the filesystem's back
    let mut image = fs::read(&disks[1]).unwrap();
    let offset = image
        .chunks_exact(BLOCK_SIZE)
        .position(|chunk| chunk == payload)
        .map(|i| i * BLOCK_SIZE)
        .unwrap();
    image[offset..offset + 16].fill(0xFF);
    fs::write(&disks[1], &image).unwrap();

    let fs = RaidFileSystem::mount(&disks).unwrap();
    let mut back = [0; BLOCK_SIZE];
    assert_eq!(fs.read("/guarded", 0, &mut back).unwrap(), BLOCK_SIZE);
    assert_eq!(back, payload);

    drop(fs);
    cleanup(&disks);
}

#[test]
fn mount_accepts_disks_in_any_order() {
    let disks = scratch_disks(2);
    let mut fs = make(&disks, RaidMode::Mirrored);
    fs.mknod("/marker", 0o644, 0, 0).unwrap();
    drop(fs);

    let swapped = vec![disks[1].clone(), disks[0].clone()];
    let fs = RaidFileSystem::mount(&swapped).unwrap();
    assert!(fs.getattr("/marker").is_ok());

    drop(fs);
    cleanup(&disks);
}

#[test]
fn mount_rejects_foreign_and_duplicate_disks() {
    let set_a = scratch_disks(2);
    let set_b = scratch_disks(2);
    RaidFileSystem::format(&set_a, RaidMode::Mirrored, 32, 256, 0, 0).unwrap();
    // different geometry, so the superblocks cannot agree
    RaidFileSystem::format(&set_b, RaidMode::Mirrored, 64, 256, 0, 0).unwrap();

    let mixed = vec![set_a[0].clone(), set_b[1].clone()];
    assert!(matches!(
        RaidFileSystem::mount(&mixed),
        Err(Error::InvalidArgument)
    ));

    let duplicated = vec![set_a[0].clone(), set_a[0].clone()];
    assert!(matches!(
        RaidFileSystem::mount(&duplicated),
        Err(Error::InvalidArgument)
    ));

    cleanup(&set_a);
    cleanup(&set_b);
}

#[test]
fn mount_requires_enough_disks_for_the_mode() {
    let disks = scratch_disks(2);
    RaidFileSystem::format(&disks, RaidMode::Mirrored, 32, 256, 0, 0).unwrap();
    assert!(matches!(
        RaidFileSystem::mount(&disks[..1]),
        Err(Error::InvalidArgument)
    ));
    cleanup(&disks);
}

#[test]
fn format_rejects_undersized_images() {
    let disks = scratch_disks(1);
    let fd = OpenOptions::new().write(true).open(&disks[0]).unwrap();
    fd.set_len(1024).unwrap();
    assert!(matches!(
        RaidFileSystem::format(&disks, RaidMode::Striped, 32, 256, 0, 0),
        Err(Error::InvalidArgument)
    ));
    cleanup(&disks);
}

#[test]
fn mount_rejects_unformatted_image() {
    let disks = scratch_disks(1);
    assert!(matches!(
        RaidFileSystem::mount(&disks),
        Err(Error::InvalidArgument)
    ));
    cleanup(&disks);
}

#[test]
fn mirroring_requires_two_disks_at_format() {
    let disks = scratch_disks(1);
    assert!(matches!(
        RaidFileSystem::format(&disks, RaidMode::Mirrored, 32, 256, 0, 0),
        Err(Error::InvalidArgument)
    ));
    cleanup(&disks);
}
