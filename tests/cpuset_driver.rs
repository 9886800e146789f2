// tests/cpuset_driver.rs
//
// Driver behavior over a scratch controller root. The kernel's cpuset
// directory layout is just directories and text files, so a temp dir
// stands in for /sys/fs/cgroup/cpuset.

use cpusetiso::cpuset::{format_core_list, parse_core_list, CpusetDriver};
use cpusetiso::errors::CpusetError;
use std::fs;
use std::path::PathBuf;

fn scratch_root(name: &str) -> PathBuf {
    let dir = std::env::temp_dir().join(format!("cpusetiso_driver_{}", name));
    let _ = fs::remove_dir_all(&dir);
    fs::create_dir_all(&dir).unwrap();
    dir
}

#[test]
fn parses_every_list_form() {
    assert_eq!(parse_core_list("7").unwrap(), vec![7]);
    assert_eq!(parse_core_list("0,2,5").unwrap(), vec![0, 2, 5]);
    assert_eq!(parse_core_list("4-7").unwrap(), vec![4, 5, 6, 7]);
    assert_eq!(
        parse_core_list("0-3,8,10-11").unwrap(),
        vec![0, 1, 2, 3, 8, 10, 11]
    );
    assert_eq!(parse_core_list("").unwrap(), Vec::<u32>::new());
    assert_eq!(parse_core_list("  2-3 \n").unwrap(), vec![2, 3]);
}

#[test]
fn parse_sorts_and_deduplicates() {
    assert_eq!(parse_core_list("5,1,3,1,2-3").unwrap(), vec![1, 2, 3, 5]);
}

#[test]
fn rejects_malformed_lists() {
    assert!(matches!(
        parse_core_list("zero"),
        Err(CpusetError::Parse(_))
    ));
    assert!(matches!(
        parse_core_list("3-1"),
        Err(CpusetError::Parse(_))
    ));
    assert!(matches!(
        parse_core_list("1,,2"),
        Err(CpusetError::Parse(_))
    ));
    assert!(matches!(
        parse_core_list("1-2-3"),
        Err(CpusetError::Parse(_))
    ));
}

#[test]
fn writer_and_reader_round_trip() {
    let root = scratch_root("roundtrip");
    let driver = CpusetDriver::new(&root);

    driver.create_group("box").unwrap();
    driver.write_core_list("box", &[11, 3, 0, 3]).unwrap();

    let read = driver
        .read_core_list(root.join("box").join("cpuset.cpus"))
        .unwrap();
    assert_eq!(read, vec![0, 3, 11]);

    // The encoder emits plain comma-separated decimals.
    let raw = fs::read_to_string(root.join("box/cpuset.cpus")).unwrap();
    assert_eq!(raw, "11,3,0,3");
    assert_eq!(format_core_list(&[0, 3, 11]), "0,3,11");
}

#[test]
fn missing_controller_root_is_unavailable() {
    let root = std::env::temp_dir().join("cpusetiso_driver_absent_root");
    let _ = fs::remove_dir_all(&root);

    let driver = CpusetDriver::new(&root);
    assert!(matches!(
        driver.list_groups(),
        Err(CpusetError::Unavailable(_))
    ));
    assert!(matches!(
        driver.create_group("x"),
        Err(CpusetError::Unavailable(_))
    ));
}

#[test]
fn group_lifecycle_and_duplicate_handling() {
    let root = scratch_root("lifecycle");
    let driver = CpusetDriver::new(&root);

    driver.create_group("c1").unwrap();
    assert!(matches!(
        driver.create_group("c1"),
        Err(CpusetError::AlreadyExists(_))
    ));
    driver.ensure_group("c1").unwrap();

    assert_eq!(driver.list_groups().unwrap(), vec!["c1".to_string()]);

    driver.destroy_group("c1").unwrap();
    assert!(matches!(
        driver.destroy_group("c1"),
        Err(CpusetError::NotFound(_))
    ));
}

#[test]
fn attach_appends_pids_with_trailing_newlines() {
    let root = scratch_root("attach");
    let driver = CpusetDriver::new(&root);

    driver.create_group("c1").unwrap();
    driver.attach_pid("c1", 101).unwrap();
    driver.attach_pid("c1", 202).unwrap();

    let tasks = fs::read_to_string(root.join("c1/tasks")).unwrap();
    assert_eq!(tasks, "101\n202\n");

    assert!(matches!(
        driver.attach_pid("ghost", 1),
        Err(CpusetError::NotFound(_))
    ));
}

#[test]
fn load_histogram_counts_group_claims_per_core() {
    let root = scratch_root("histogram");
    let driver = CpusetDriver::new(&root);

    driver.create_group("a").unwrap();
    driver.write_core_list("a", &[0, 1]).unwrap();
    driver.create_group("b").unwrap();
    driver.write_core_list("b", &[1, 2, 3]).unwrap();

    let groups = driver.list_groups().unwrap();
    let load = driver.per_group_core_load(&groups).unwrap();

    assert_eq!(load.get(&0), Some(&1));
    assert_eq!(load.get(&1), Some(&2));
    assert_eq!(load.get(&2), Some(&1));
    assert_eq!(load.get(&3), Some(&1));
    assert_eq!(load.get(&4), None);
}

#[test]
fn root_lists_are_read_from_the_controller_root() {
    let root = scratch_root("rootlists");
    fs::write(root.join("cpuset.cpus"), "0-3\n").unwrap();
    fs::write(root.join("cpuset.mems"), "0\n").unwrap();

    let driver = CpusetDriver::new(&root);
    assert_eq!(driver.read_root_cpus().unwrap(), vec![0, 1, 2, 3]);
    assert_eq!(driver.read_root_mems().unwrap(), vec![0]);
}
