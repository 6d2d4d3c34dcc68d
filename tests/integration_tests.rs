//! Integration tests for dist-walker
//!
//! Each test runs a real participant group as threads over a scratch tree,
//! exercising the walk, the summary reducer, and the cache round-trips
//! end to end.

use std::collections::BTreeMap;
use std::fs;
use std::os::unix::fs::symlink;
use std::thread;

use dist_walker::walker::queue::PoolWorker;
use dist_walker::{
    read_cache, walk_path, write_cache, CacheError, EntryType, FileList, LocalComm, WorkPool,
};
use tempfile::{tempdir, TempDir};

/// Run one closure per participant with a connected comm + pool group
fn run_group<T, F>(participants: usize, f: F) -> Vec<T>
where
    T: Send,
    F: Fn(LocalComm, PoolWorker) -> T + Sync,
{
    let comms = LocalComm::group(participants);
    let pool = WorkPool::group(participants);
    thread::scope(|s| {
        let handles: Vec<_> = comms
            .into_iter()
            .zip(pool)
            .map(|(comm, worker)| s.spawn(|| f(comm, worker)))
            .collect();
        handles.into_iter().map(|h| h.join().unwrap()).collect()
    })
}

/// Root `/t` containing file `/t/a` (100 bytes) and directory `/t/b`
/// containing `/t/b/c`
fn tiny_tree() -> (TempDir, String) {
    let dir = tempdir().unwrap();
    let root = dir.path().join("t");
    fs::create_dir(&root).unwrap();
    fs::write(root.join("a"), vec![b'x'; 100]).unwrap();
    fs::create_dir(root.join("b")).unwrap();
    fs::write(root.join("b").join("c"), b"c").unwrap();
    let root = root.to_string_lossy().into_owned();
    (dir, root)
}

fn depth_of(path: &str) -> u32 {
    path.bytes().filter(|&b| b == b'/').count() as u32
}

/// Gather `(path, type)` pairs from every shard into one sorted list
fn gather_pairs(lists: &[FileList]) -> Vec<(String, EntryType)> {
    let mut pairs: Vec<_> = lists
        .iter()
        .flat_map(|l| l.records().map(|r| (r.path.clone(), r.entry_type)))
        .collect();
    pairs.sort();
    pairs
}

#[test]
fn test_stat_walk_tiny_tree_on_two_participants() {
    let (_dir, root) = tiny_tree();

    let lists: Vec<FileList> = run_group(2, |comm, pool| {
        let (mut list, stats) = walk_path(&root, true, &comm, pool);
        assert_eq!(stats.paths_too_long, 0);
        list.compute_summary(&comm);
        list
    });

    let root_depth = depth_of(&root);
    for list in &lists {
        assert_eq!(list.global_size(), 4);
        assert!(list.have_detail());
        assert_eq!(list.min_depth(), root_depth as u64);
        assert_eq!(list.max_depth(), root_depth as u64 + 2);
    }

    // Summary agreement: the shards sum to the global size
    let local_sum: u64 = lists.iter().map(|l| l.local_size()).sum();
    assert_eq!(local_sum, 4);

    // Depth correctness, type/mode agreement, and the recorded sizes
    let mut by_path = BTreeMap::new();
    for list in &lists {
        for i in 0..list.local_size() {
            let path = list.file_name(i).unwrap().to_string();
            assert_eq!(list.file_depth(i).unwrap(), depth_of(&path));
            let mode = list.file_mode(i).unwrap();
            assert_eq!(list.file_type(i).unwrap(), EntryType::from_mode(mode));
            assert!(list.file_username(i).is_ok());
            by_path.insert(path, (list.file_type(i).unwrap(), list.file_size(i).unwrap()));
        }
    }
    assert_eq!(by_path.len(), 4);
    assert_eq!(by_path[&root].0, EntryType::Dir);
    assert_eq!(by_path[&format!("{root}/a")], (EntryType::File, 100));
    assert_eq!(by_path[&format!("{root}/b/c")].0, EntryType::File);

    // The longest path is "<root>/b/c"
    let expected_max = lists
        .iter()
        .flat_map(|l| l.records())
        .map(|r| r.path.len() as u64 + 1)
        .max()
        .unwrap();
    assert_eq!(lists[0].file_max_name(), expected_max);
}

#[test]
fn test_v2_round_trip_redistributes_evenly() {
    let (_dir, root) = tiny_tree();
    let cache_dir = tempdir().unwrap();
    let cache = cache_dir.path().join("walk.cache");

    // Walk in readdir mode on 2 participants and write the cache
    let walked: Vec<FileList> = run_group(2, |comm, pool| {
        let (mut list, _) = walk_path(&root, false, &comm, pool);
        list.compute_summary(&comm);
        write_cache(&cache, &list, 11, 22, &comm).unwrap();
        list
    });
    assert!(walked.iter().all(|l| !l.have_detail()));
    let original = gather_pairs(&walked);
    assert_eq!(original.len(), 4);

    // The header carries the version, the caller's timestamps, the count,
    // and an 8-aligned stride that the longest path fits strictly inside
    let bytes = fs::read(&cache).unwrap();
    let word = |i: usize| u64::from_be_bytes(bytes[i * 8..(i + 1) * 8].try_into().unwrap());
    assert_eq!(word(0), 2);
    assert_eq!(word(1), 11);
    assert_eq!(word(2), 22);
    assert_eq!(word(3), 4);
    let stride = word(4);
    assert_eq!(stride % 8, 0);
    let longest = original.iter().map(|(p, _)| p.len() as u64).max().unwrap();
    assert!(longest < stride);
    assert_eq!(bytes.len() as u64, 5 * 8 + 4 * (stride + 4));

    // Read back on 3 participants: shard sizes differ by at most one
    let reread: Vec<FileList> = run_group(3, |comm, _pool| read_cache(&cache, &comm).unwrap());
    let sizes: Vec<u64> = reread.iter().map(|l| l.local_size()).collect();
    assert_eq!(sizes.iter().sum::<u64>(), 4);
    assert!(sizes.iter().all(|&s| s == 1 || s == 2));
    for list in &reread {
        assert!(!list.have_detail());
        assert_eq!(list.global_size(), 4);
    }

    assert_eq!(gather_pairs(&reread), original);
}

#[test]
fn test_v3_round_trip_preserves_stat_tuples_and_tables() {
    let (_dir, root) = tiny_tree();
    let cache_dir = tempdir().unwrap();
    let cache = cache_dir.path().join("walk.cache");

    let walked: Vec<FileList> = run_group(2, |comm, pool| {
        let (mut list, _) = walk_path(&root, true, &comm, pool);
        list.compute_summary(&comm);
        write_cache(&cache, &list, 0, 0, &comm).unwrap();
        list
    });

    let tuple = |l: &FileList, i: u64| {
        (
            l.file_name(i).unwrap().to_string(),
            l.file_mode(i).unwrap(),
            l.file_uid(i).unwrap(),
            l.file_gid(i).unwrap(),
            l.file_atime(i).unwrap(),
            l.file_mtime(i).unwrap(),
            l.file_ctime(i).unwrap(),
            l.file_size(i).unwrap(),
        )
    };
    let collect_tuples = |lists: &[FileList]| {
        let mut all: Vec<_> = lists
            .iter()
            .flat_map(|l| (0..l.local_size()).map(|i| tuple(l, i)).collect::<Vec<_>>())
            .collect();
        all.sort();
        all
    };
    let original = collect_tuples(&walked);

    let reread: Vec<FileList> = run_group(2, |comm, _pool| read_cache(&cache, &comm).unwrap());
    for list in &reread {
        assert!(list.have_detail());
        assert_eq!(list.global_size(), 4);
        assert_eq!(list.user_count(), walked[0].user_count());
        assert_eq!(list.group_count(), walked[0].group_count());
        assert_eq!(list.user_max_name(), walked[0].user_max_name());
        assert_eq!(list.group_max_name(), walked[0].group_max_name());
    }
    assert_eq!(collect_tuples(&reread), original);
}

#[test]
fn test_unknown_uid_fabricates_stable_decimal_name() {
    // Handcrafted v3 cache: one known user "root", one record owned by
    // uid/gid 4242 which the tables have never heard of
    let dir = tempdir().unwrap();
    let cache = dir.path().join("synthetic.cache");

    let mut bytes = Vec::new();
    for word in [3u64, 0, 0, 1, 8, 1, 8, 1, 8] {
        bytes.extend_from_slice(&word.to_be_bytes());
    }
    bytes.extend_from_slice(b"root\0\0\0\0");
    bytes.extend_from_slice(&0u32.to_be_bytes());
    bytes.extend_from_slice(b"wheel\0\0\0");
    bytes.extend_from_slice(&0u32.to_be_bytes());
    bytes.extend_from_slice(b"/f\0\0\0\0\0\0");
    bytes.extend_from_slice(&0o100644u32.to_be_bytes());
    bytes.extend_from_slice(&4242u32.to_be_bytes());
    bytes.extend_from_slice(&4242u32.to_be_bytes());
    bytes.extend_from_slice(&1u32.to_be_bytes());
    bytes.extend_from_slice(&2u32.to_be_bytes());
    bytes.extend_from_slice(&3u32.to_be_bytes());
    bytes.extend_from_slice(&100u64.to_be_bytes());
    fs::write(&cache, bytes).unwrap();

    let lists: Vec<FileList> = run_group(1, |comm, _pool| read_cache(&cache, &comm).unwrap());
    let list = &lists[0];

    assert_eq!(list.global_size(), 1);
    assert_eq!(list.file_uid(0).unwrap(), 4242);
    assert_eq!(list.file_username(0).unwrap(), "4242");
    // A second lookup returns the same fabricated name
    assert_eq!(list.file_username(0).unwrap(), "4242");
    assert_eq!(list.file_groupname(0).unwrap(), "4242");
    // The real table entry still resolves
    assert_eq!(list.user_count(), 1);
}

#[test]
fn test_empty_walk_yields_only_the_root() {
    let dir = tempdir().unwrap();
    let root = dir.path().join("empty");
    fs::create_dir(&root).unwrap();
    let root = root.to_string_lossy().into_owned();

    let lists: Vec<FileList> = run_group(2, |comm, pool| {
        let (mut list, _) = walk_path(&root, true, &comm, pool);
        list.compute_summary(&comm);
        list
    });

    let root_depth = depth_of(&root) as u64;
    for list in &lists {
        assert_eq!(list.global_size(), 1);
        assert_eq!(list.min_depth(), root_depth);
        assert_eq!(list.max_depth(), root_depth);
    }
    let pairs = gather_pairs(&lists);
    assert_eq!(pairs, vec![(root.clone(), EntryType::Dir)]);
}

#[test]
fn test_unsupported_version_produces_no_list() {
    let dir = tempdir().unwrap();
    let cache = dir.path().join("future.cache");
    let mut bytes = 7u64.to_be_bytes().to_vec();
    bytes.extend_from_slice(&[0u8; 64]);
    fs::write(&cache, bytes).unwrap();

    let results: Vec<Result<FileList, CacheError>> =
        run_group(2, |comm, _pool| read_cache(&cache, &comm));
    for result in results {
        match result {
            Err(CacheError::UnsupportedVersion(7)) => {}
            other => panic!("expected UnsupportedVersion(7), got {other:?}"),
        }
    }
}

#[test]
fn test_missing_cache_file_is_an_open_error() {
    let dir = tempdir().unwrap();
    let cache = dir.path().join("nonexistent.cache");

    let results: Vec<Result<FileList, CacheError>> =
        run_group(2, |comm, _pool| read_cache(&cache, &comm));
    for result in results {
        assert!(matches!(result, Err(CacheError::Open { .. })));
    }
}

#[test]
fn test_symlinks_are_recorded_but_never_traversed() {
    let dir = tempdir().unwrap();
    let root = dir.path().join("t");
    fs::create_dir(&root).unwrap();
    fs::create_dir(root.join("target")).unwrap();
    fs::write(root.join("target").join("inner"), b"x").unwrap();
    symlink(root.join("target"), root.join("ln")).unwrap();
    let root = root.to_string_lossy().into_owned();

    for use_stat in [false, true] {
        let lists: Vec<FileList> = run_group(2, |comm, pool| {
            let (mut list, _) = walk_path(&root, use_stat, &comm, pool);
            list.compute_summary(&comm);
            list
        });
        let pairs = gather_pairs(&lists);

        // root, target, target/inner, ln: the link's referent is walked
        // once through its real path only
        assert_eq!(pairs.len(), 4, "mode use_stat={use_stat}: {pairs:?}");
        assert!(pairs.iter().any(|(p, t)| p.ends_with("/ln") && *t == EntryType::Link));
        assert!(pairs.iter().any(|(p, _)| p.ends_with("/target/inner")));
        assert!(!pairs.iter().any(|(p, _)| p.contains("/ln/")));
        // No record path ends with the dot entries
        assert!(!pairs
            .iter()
            .any(|(p, _)| p.ends_with("/.") || p.ends_with("/..")));
    }
}

#[test]
fn test_lite_walk_records_types_from_dirents() {
    let (_dir, root) = tiny_tree();

    let lists: Vec<FileList> = run_group(3, |comm, pool| {
        let (mut list, _) = walk_path(&root, false, &comm, pool);
        list.compute_summary(&comm);
        list
    });

    let pairs = gather_pairs(&lists);
    let expect = |suffix: &str, t: EntryType| {
        assert!(
            pairs.iter().any(|(p, pt)| p.ends_with(suffix) && *pt == t),
            "missing {suffix} as {t:?} in {pairs:?}"
        );
    };
    expect("/a", EntryType::File);
    expect("/b", EntryType::Dir);
    expect("/b/c", EntryType::File);

    // Lite lists refuse detail accessors with the detail-specific reason
    let list = &lists[0];
    if list.local_size() > 0 {
        assert!(list.file_uid(0).is_err());
        assert!(list.file_name(0).is_ok());
    }
}

#[test]
fn test_minimal_cache_round_trip() {
    let dir = tempdir().unwrap();
    let root = dir.path().join("empty");
    fs::create_dir(&root).unwrap();
    let root_str = root.to_string_lossy().into_owned();
    let cache = dir.path().join("empty.cache");

    // A readdir walk of an empty directory records just the root
    let lists: Vec<FileList> = run_group(2, |comm, pool| {
        let (mut list, _) = walk_path(&root_str, false, &comm, pool);
        list.compute_summary(&comm);
        write_cache(&cache, &list, 0, 0, &comm).unwrap();
        read_cache(&cache, &comm).unwrap()
    });

    let total: u64 = lists.iter().map(|l| l.local_size()).sum();
    assert_eq!(total, 1);
    for list in &lists {
        assert_eq!(list.global_size(), 1);
    }
}

#[test]
fn test_fully_empty_list_round_trips_with_zero_stride() {
    let dir = tempdir().unwrap();
    // A root that vanishes before the walk produces an empty list
    let root = dir.path().join("gone").to_string_lossy().into_owned();
    let cache = dir.path().join("zero.cache");

    let lists: Vec<FileList> = run_group(2, |comm, pool| {
        let (mut list, _) = walk_path(&root, false, &comm, pool);
        list.compute_summary(&comm);
        write_cache(&cache, &list, 0, 0, &comm).unwrap();
        read_cache(&cache, &comm).unwrap()
    });

    for list in &lists {
        assert_eq!(list.global_size(), 0);
        assert_eq!(list.local_size(), 0);
    }

    // Header only: version, start, end, zero records, zero stride
    let bytes = fs::read(&cache).unwrap();
    assert_eq!(bytes.len(), 5 * 8);
    assert_eq!(u64::from_be_bytes(bytes[0..8].try_into().unwrap()), 2);
    assert_eq!(u64::from_be_bytes(bytes[32..40].try_into().unwrap()), 0);
}

#[test]
fn test_deep_tree_fans_out_across_participants() {
    let dir = tempdir().unwrap();
    let root = dir.path().join("wide");
    fs::create_dir(&root).unwrap();
    let mut expected = 1u64;
    for i in 0..8 {
        let sub = root.join(format!("d{i}"));
        fs::create_dir(&sub).unwrap();
        expected += 1;
        for j in 0..16 {
            fs::write(sub.join(format!("f{j}")), b"data").unwrap();
            expected += 1;
        }
    }
    let root = root.to_string_lossy().into_owned();

    let lists: Vec<FileList> = run_group(4, |comm, pool| {
        let (mut list, _) = walk_path(&root, false, &comm, pool);
        list.compute_summary(&comm);
        list
    });

    for list in &lists {
        assert_eq!(list.global_size(), expected);
    }
    let pairs = gather_pairs(&lists);
    assert_eq!(pairs.len(), expected as usize);
    // No duplicates: every path appears exactly once
    let mut deduped = pairs.clone();
    deduped.dedup_by(|a, b| a.0 == b.0);
    assert_eq!(deduped.len(), pairs.len());
}
