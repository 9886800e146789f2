// tests/series.rs
//
// Persistence of the request time series: samples written through one
// store handle must be read back, bucket-for-bucket, by a freshly opened
// one.

use cpusetiso::series::{SeriesStore, DB_FILE_NAME};
use std::fs;
use std::path::PathBuf;

fn scratch_dir(name: &str) -> PathBuf {
    let dir = std::env::temp_dir().join(format!("cpusetiso_seriestest_{}", name));
    let _ = fs::remove_dir_all(&dir);
    fs::create_dir_all(&dir).unwrap();
    dir
}

#[test]
fn samples_survive_a_reopen() {
    let dir = scratch_dir("reopen");
    let base = 1_700_000_000_i64; // all inside one 5-minute bucket window

    {
        let mut store = SeriesStore::open(&dir, 5.0).unwrap();
        let bucket = store.bucket_of(base);
        for (offset, count) in [(0, 1), (3, 2), (7, 2), (11, 3)] {
            let ts = bucket + offset;
            store.append_at(ts, count).unwrap();
        }
    }

    let mut fresh = SeriesStore::open(&dir, 5.0).unwrap();
    let samples = fresh.load_latest().unwrap();
    let bucket = fresh.bucket_of(base);

    assert_eq!(
        samples,
        vec![
            (bucket, 1),
            (bucket + 3, 2),
            (bucket + 7, 2),
            (bucket + 11, 3)
        ]
    );
    assert!(dir.join(DB_FILE_NAME).is_file());
}

#[test]
fn latest_pointer_follows_the_newest_bucket() {
    let dir = scratch_dir("latest");
    let mut store = SeriesStore::open(&dir, 1.0).unwrap();

    // Two samples in minute-bucket 0, then one in minute-bucket 3.
    store.append_at(10, 4).unwrap();
    store.append_at(30, 4).unwrap();
    store.append_at(3 * 60 + 5, 8).unwrap();

    let samples = store.load_latest().unwrap();
    assert_eq!(samples, vec![(185, 8)]);

    // The first bucket remains on record as the series origin.
    assert_eq!(store.start_bucket().unwrap(), Some("0".to_string()));
}

#[test]
fn appends_within_a_bucket_accumulate() {
    let dir = scratch_dir("accumulate");
    let mut store = SeriesStore::open(&dir, 10.0).unwrap();

    for count in [2, 2, 5] {
        store.append_at(100, count).unwrap();
    }

    let samples = store.load_latest().unwrap();
    assert_eq!(samples.len(), 3);
    assert_eq!(
        samples.iter().map(|&(_, c)| c).collect::<Vec<_>>(),
        vec![2, 2, 5]
    );
}
