use crate::buffer::LogBuffer;
use crate::log_entry::{LogEntry, LogLevel, LogType};
use crate::persist::PersistRegistry;
use crate::persist::compress::CompressAlg;
use crate::persist::persister::{MIN_PERSIST_FILE_SIZE, validate_start_msg};
use crate::persist::recovery::{self, PersistRecoveryInfo};
use crate::protocol::control::PersistStartMsg;
use std::fs;
use std::io::Read;
use std::path::{Path, PathBuf};
use std::sync::Arc;

fn start_msg(dir: &Path, job_id: u32, alg: CompressAlg) -> PersistStartMsg {
    PersistStartMsg {
        job_id,
        compress_alg: alg as u8,
        types: LogType::Core.mask(),
        levels: 0,
        file_size: MIN_PERSIST_FILE_SIZE,
        file_num: 10,
        file_path: dir.join("out").to_string_lossy().into_owned(),
    }
}

fn output_files(dir: &Path) -> Vec<PathBuf> {
    let mut files: Vec<PathBuf> = fs::read_dir(dir)
        .unwrap()
        .filter_map(|e| e.ok())
        .map(|e| e.path())
        .filter(|p| p.file_name().unwrap().to_string_lossy().starts_with("out."))
        .collect();
    files.sort();
    files
}

fn decompress(alg: CompressAlg, raw: &[u8]) -> Vec<u8> {
    match alg {
        CompressAlg::None => raw.to_vec(),
        CompressAlg::Zlib => {
            let mut out = Vec::new();
            flate2::read::MultiGzDecoder::new(raw)
                .read_to_end(&mut out)
                .unwrap();
            out
        }
        CompressAlg::Zstd => zstd::stream::decode_all(raw).unwrap(),
    }
}

fn persist_round_trip(alg: CompressAlg) {
    let dir = tempfile::tempdir().unwrap();
    let buffer = Arc::new(LogBuffer::new());
    buffer.set_buff_len(LogType::Core, 16 << 20).unwrap();
    let registry = PersistRegistry::new(dir.path(), Arc::clone(&buffer));
    registry.start(&start_msg(dir.path(), 7, alg)).unwrap();

    let mut expected = String::new();
    for i in 0..1000 {
        let content = format!("record {} {}\nsecond line {}", i, "x".repeat(150), i);
        let entry = LogEntry::new(LogType::Core, LogLevel::Info, 0xD001100, "Persist", content);
        expected.push_str(&entry.format_lines());
        buffer.insert(entry);
        buffer.insert(LogEntry::new(LogType::App, LogLevel::Info, 1, "App", "not persisted"));
    }
    registry.kill(7).unwrap();

    let files = output_files(dir.path());
    assert!(!files.is_empty());
    if alg == CompressAlg::None {
        assert!(files.len() > 1, "expected rotation, got {:?}", files);
    }
    let mut text = Vec::new();
    for f in &files {
        assert!(f.to_string_lossy().ends_with(alg.suffix()));
        text.extend(decompress(alg, &fs::read(f).unwrap()));
    }
    assert_eq!(String::from_utf8(text).unwrap(), expected);
    assert!(!recovery::info_path(dir.path(), 7).exists());
}

#[test]
fn test_persist_round_trip_none() {
    persist_round_trip(CompressAlg::None);
}

#[test]
fn test_persist_round_trip_zlib() {
    persist_round_trip(CompressAlg::Zlib);
}

#[test]
fn test_persist_round_trip_zstd() {
    persist_round_trip(CompressAlg::Zstd);
}

#[test]
fn test_recovery_skips_tampered_info() {
    let dir = tempfile::tempdir().unwrap();
    let good = PersistRecoveryInfo {
        index: 3,
        msg: validate_start_msg(&start_msg(dir.path(), 1, CompressAlg::None)).unwrap(),
    };
    good.write_to(&recovery::info_path(dir.path(), 1)).unwrap();

    let mut other = start_msg(dir.path(), 2, CompressAlg::Zlib);
    other.file_path = dir.path().join("other").to_string_lossy().into_owned();
    let bad = PersistRecoveryInfo {
        index: 3,
        msg: validate_start_msg(&other).unwrap(),
    };
    let bad_path = recovery::info_path(dir.path(), 2);
    bad.write_to(&bad_path).unwrap();
    let mut raw = fs::read(&bad_path).unwrap();
    raw[0] ^= 0x01;
    fs::write(&bad_path, raw).unwrap();

    let registry = PersistRegistry::new(dir.path(), Arc::new(LogBuffer::new()));
    assert_eq!(registry.recover_all(), 1);
    let jobs = registry.query();
    assert_eq!(jobs.len(), 1);
    assert_eq!(jobs[0].job_id, 1);
    assert!(!bad_path.exists());

    let resumed = PersistRecoveryInfo::read_from(&recovery::info_path(dir.path(), 1)).unwrap();
    assert_eq!(resumed.index, 4);
    registry.stop_all();
}
