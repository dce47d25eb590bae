use std::fs;

use camino::Utf8PathBuf;

use calsync::layout::{CacheLayout, NamingOrder, Partition};

fn temp_root() -> (tempfile::TempDir, Utf8PathBuf) {
    let temp = tempfile::tempdir().unwrap();
    let root = Utf8PathBuf::from_path_buf(temp.path().to_path_buf()).unwrap();
    (temp, root)
}

#[test]
fn watermark_over_flat_cache() {
    let (_temp, root) = temp_root();
    for entry in ["3985_resonator", "3987_ramsey", "3986_t1"] {
        fs::create_dir(root.join(entry).as_std_path()).unwrap();
    }
    // Stray files and unconventional directories are ignored.
    fs::write(root.join("notes.txt").as_std_path(), b"scratch").unwrap();
    fs::create_dir(root.join("scratch").as_std_path()).unwrap();

    let layout = CacheLayout::new(root, Partition::Flat, NamingOrder::IdFirst, 3);
    assert_eq!(layout.current_watermark().unwrap(), Some(3987.into()));
    assert_eq!(layout.entry_count().unwrap(), 3);
}

#[test]
fn watermark_descends_into_date_partitions() {
    let (_temp, root) = temp_root();
    fs::create_dir(root.join("3985_resonator").as_std_path()).unwrap();
    fs::create_dir_all(root.join("2025-04-14").join("3987_ramsey").as_std_path()).unwrap();
    fs::create_dir_all(root.join("2025-04-15").join("4001_t1").as_std_path()).unwrap();

    let layout = CacheLayout::new(root.clone(), Partition::ByDate, NamingOrder::IdFirst, 3);
    assert_eq!(layout.current_watermark().unwrap(), Some(4001.into()));
    assert_eq!(layout.entry_count().unwrap(), 3);

    // A flat layout over the same tree only sees the top level.
    let flat = CacheLayout::new(root, Partition::Flat, NamingOrder::IdFirst, 3);
    assert_eq!(flat.current_watermark().unwrap(), Some(3985.into()));
}

#[test]
fn watermark_of_missing_or_empty_cache_is_none() {
    let (_temp, root) = temp_root();
    let missing = root.join("does-not-exist");
    let layout = CacheLayout::new(missing, Partition::Flat, NamingOrder::IdFirst, 3);
    assert_eq!(layout.current_watermark().unwrap(), None);

    let layout = CacheLayout::new(root, Partition::Flat, NamingOrder::IdFirst, 3);
    assert_eq!(layout.current_watermark().unwrap(), None);
    assert_eq!(layout.entry_count().unwrap(), 0);
}

#[test]
fn watermark_under_name_first_convention() {
    let (_temp, root) = temp_root();
    for entry in ["ramsey_flux_calibration_160603", "resonator_spec_160601"] {
        fs::create_dir(root.join(entry).as_std_path()).unwrap();
    }
    let layout = CacheLayout::new(root, Partition::Flat, NamingOrder::NameFirst, 3);
    assert_eq!(layout.current_watermark().unwrap(), Some(160603.into()));
}
