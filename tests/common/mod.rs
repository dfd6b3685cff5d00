#![allow(dead_code)]

use std::fs::{self, File};
use std::io::Write;
use std::path::{Path, PathBuf};

use tempfile::{TempDir, tempdir};

/// Scratch directory helper that cleans up files automatically on drop.
pub struct TestWorkspace {
    temp_dir: TempDir,
}

impl TestWorkspace {
    /// Creates a fresh scratch directory for the current test case.
    pub fn new() -> Self {
        Self {
            temp_dir: tempdir().expect("temp dir"),
        }
    }

    /// Returns the root path for all files owned by this workspace.
    pub fn path(&self) -> &Path {
        self.temp_dir.path()
    }

    pub fn join(&self, name: &str) -> PathBuf {
        self.temp_dir.path().join(name)
    }

    /// Writes `contents` into a file under the workspace and returns the path.
    pub fn write(&self, name: &str, contents: &str) -> PathBuf {
        self.write_bytes(name, contents.as_bytes())
    }

    pub fn write_bytes(&self, name: &str, contents: &[u8]) -> PathBuf {
        let path = self.temp_dir.path().join(name);
        let mut file = File::create(&path).expect("create temp file");
        file.write_all(contents).expect("write temp file contents");
        path
    }

    pub fn read(&self, name: &str) -> String {
        fs::read_to_string(self.join(name)).expect("read temp file")
    }
}

/// A bank export with a title line above the header.
pub const BANK_JANUARY: &str = "\
거래내역 조회,,,,
거래일자,적요,입금,출금,잔액
2024-01-05,스타벅스 강남점,,4500,995500
2024-01-02,3월 급여,\"1,000,000\",,1000000
";

/// Another export of the same account using different header names.
pub const BANK_FEBRUARY: &str = "\
날짜,거래내용,입금액,출금액,잔액
2024-02-01,택시,,12000,983500
2024.01.05,스타벅스 강남점,,4500,995500
";
