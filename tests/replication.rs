//! End-to-end fabric runs: whole process groups assembled from on-disk
//! input manifests, driven through `engine::run`, checked through the
//! output files.

use std::{fs, path::Path};

use pretty_assertions::assert_eq;

use hashswarm::{conf::Conf, engine, HASH_LEN};

fn hash_line(byte: u8) -> String {
    String::from_utf8(vec![byte; HASH_LEN]).unwrap()
}

/// Writes `in<rank>.txt` in the input grammar: owned count, owned file
/// headers with their hash lines, wanted count, wanted names.
fn write_input(
    dir: &Path,
    rank: u32,
    owned: &[(&str, &[u8])],
    wanted: &[&str],
) {
    let mut text = format!("{}\n", owned.len());
    for (name, chunks) in owned {
        text.push_str(&format!("{} {}\n", name, chunks.len()));
        for &byte in *chunks {
            text.push_str(&hash_line(byte));
            text.push('\n');
        }
    }
    text.push_str(&format!("{}\n", wanted.len()));
    for name in wanted {
        text.push_str(name);
        text.push('\n');
    }
    fs::write(dir.join(format!("in{}.txt", rank)), text).unwrap();
}

fn read_output(dir: &Path, rank: u32, name: &str) -> Vec<String> {
    let path = dir.join(format!("client{}_{}", rank, name));
    fs::read_to_string(&path)
        .unwrap_or_else(|e| panic!("missing output {}: {}", path.display(), e))
        .lines()
        .map(str::to_string)
        .collect()
}

async fn run_fabric(dir: &Path, clients: usize) {
    let conf = Conf::new(clients, dir, dir);
    engine::run(conf).await.unwrap();
}

#[tokio::test]
async fn test_seeder_and_leecher_single_file() {
    let dir = tempfile::tempdir().unwrap();
    write_input(dir.path(), 1, &[("file1", &[b'A', b'B', b'C'])], &[]);
    write_input(dir.path(), 2, &[], &["file1"]);

    run_fabric(dir.path(), 2).await;

    assert_eq!(
        read_output(dir.path(), 2, "file1"),
        vec![hash_line(b'A'), hash_line(b'B'), hash_line(b'C')]
    );
    // the seeder downloads nothing and writes nothing
    assert!(!dir.path().join("client1_file1").exists());
}

#[tokio::test]
async fn test_two_peers_share_one_file() {
    let dir = tempfile::tempdir().unwrap();
    write_input(dir.path(), 1, &[("file1", &[b'A', b'B', b'C'])], &[]);
    write_input(
        dir.path(),
        2,
        &[("file1", &[b'A', b'B', b'C', b'D', b'E'])],
        &[],
    );
    write_input(dir.path(), 3, &[], &["file1"]);

    run_fabric(dir.path(), 3).await;

    // peer choice is random, so the download ends somewhere between the
    // shared prefix and the full union, acquired in per-peer order
    let lines = read_output(dir.path(), 3, "file1");
    let expected: Vec<String> =
        [b'A', b'B', b'C', b'D', b'E'].iter().map(|&b| hash_line(b)).collect();
    assert!(lines.len() >= 3 && lines.len() <= 5);
    assert_eq!(&lines[..], &expected[..lines.len()]);
}

#[tokio::test]
async fn test_peers_with_nothing_new() {
    let dir = tempfile::tempdir().unwrap();
    write_input(dir.path(), 1, &[("file1", &[b'A', b'B'])], &[]);
    write_input(dir.path(), 2, &[("file1", &[b'A', b'B'])], &[]);
    write_input(dir.path(), 3, &[], &["file1"]);

    run_fabric(dir.path(), 3).await;

    assert_eq!(
        read_output(dir.path(), 3, "file1"),
        vec![hash_line(b'A'), hash_line(b'B')]
    );
}

#[tokio::test]
async fn test_progress_report_cadence_end_to_end() {
    let dir = tempfile::tempdir().unwrap();
    let chunks: Vec<u8> = (0..23u8).map(|i| b'a' + i).collect();
    write_input(dir.path(), 1, &[("file1", &chunks)], &[]);
    write_input(dir.path(), 2, &[], &["file1"]);

    run_fabric(dir.path(), 2).await;

    // 23 chunks cross the ten-chunk report threshold twice and leave a
    // partial terminal report; every chunk must still arrive exactly once
    let expected: Vec<String> = chunks.iter().map(|&b| hash_line(b)).collect();
    assert_eq!(read_output(dir.path(), 2, "file1"), expected);
}

#[tokio::test]
async fn test_mixed_kinds_shut_down_cleanly() {
    let dir = tempfile::tempdir().unwrap();
    write_input(dir.path(), 1, &[("file1", &[b'A', b'B'])], &[]);
    write_input(dir.path(), 2, &[("file2", &[b'X'])], &["file1"]);
    write_input(dir.path(), 3, &[], &["file1", "file2"]);
    write_input(dir.path(), 4, &[("file1", &[b'A', b'B'])], &["file2"]);

    run_fabric(dir.path(), 4).await;

    let file1 = vec![hash_line(b'A'), hash_line(b'B')];
    assert_eq!(read_output(dir.path(), 2, "file1"), file1);
    assert_eq!(read_output(dir.path(), 3, "file1"), file1);
    assert_eq!(read_output(dir.path(), 3, "file2"), vec![hash_line(b'X')]);
    assert_eq!(read_output(dir.path(), 4, "file2"), vec![hash_line(b'X')]);
}

#[tokio::test]
async fn test_partial_owner_completes_its_file() {
    let dir = tempfile::tempdir().unwrap();
    write_input(dir.path(), 1, &[("file1", &[b'A', b'B', b'C'])], &[]);
    write_input(dir.path(), 2, &[("file1", &[b'A'])], &["file1"]);

    run_fabric(dir.path(), 2).await;

    assert_eq!(
        read_output(dir.path(), 2, "file1"),
        vec![hash_line(b'A'), hash_line(b'B'), hash_line(b'C')]
    );
}

#[tokio::test]
async fn test_wanted_file_nobody_owns_is_skipped() {
    let dir = tempfile::tempdir().unwrap();
    write_input(dir.path(), 1, &[("file1", &[b'A'])], &[]);
    write_input(dir.path(), 2, &[], &["file9", "file1"]);

    run_fabric(dir.path(), 2).await;

    // the unobtainable file does not block the obtainable one
    assert_eq!(read_output(dir.path(), 2, "file1"), vec![hash_line(b'A')]);
    assert!(!dir.path().join("client2_file9").exists());
}

#[tokio::test]
async fn test_missing_input_manifest_aborts_startup() {
    let dir = tempfile::tempdir().unwrap();
    write_input(dir.path(), 1, &[("file1", &[b'A'])], &[]);
    // in2.txt is absent

    let conf = Conf::new(2, dir.path(), dir.path());
    assert!(engine::run(conf).await.is_err());
}
