//! End-to-end tests for the virtback binary
//!
//! Each test runs the real executable against a local image inside a
//! temporary directory, with its own configuration directory so the user's
//! ~/.virtback is never touched.

use camino::{Utf8Path, Utf8PathBuf};
use std::fs;
use std::process::{Command, Output};
use tempfile::TempDir;

const DISK_SIZE: usize = 1024 * 1024;
const BLOCK: usize = 64 * 1024;

struct Workspace {
    _temp: TempDir,
    root: Utf8PathBuf,
}

impl Workspace {
    fn new() -> Self {
        let temp = TempDir::new().unwrap();
        let root = Utf8PathBuf::from_path_buf(temp.path().to_path_buf()).unwrap();
        Self { _temp: temp, root }
    }

    fn path(&self, name: &str) -> Utf8PathBuf {
        self.root.join(name)
    }

    /// Image with data in the first block and at 512 KiB, zeros elsewhere.
    fn source_image(&self) -> (Utf8PathBuf, Vec<u8>) {
        let mut content = vec![0u8; DISK_SIZE];
        for (i, byte) in content[..BLOCK].iter_mut().enumerate() {
            *byte = (i % 251) as u8 + 1;
        }
        for (i, byte) in content[8 * BLOCK..9 * BLOCK].iter_mut().enumerate() {
            *byte = (i % 241) as u8 + 3;
        }
        let path = self.path("vm1-vda.img");
        fs::write(&path, &content).unwrap();
        (path, content)
    }

    fn virtback(&self, args: &[&str]) -> Output {
        let mut command = Command::new(env!("CARGO_BIN_EXE_virtback"));
        command
            .arg("--config-dir")
            .arg(self.path("config").as_str())
            .args(args)
            .env("HOME", self.root.as_str());
        for var in [
            "VIRTBACK_CONFIG_DIR",
            "VIRTBACK_CHUNK_SIZE",
            "VIRTBACK_WORKERS",
            "VIRTBACK_COMPRESSION",
            "VIRTBACK_CHECKPOINT_PREFIX",
            "VIRTBACK_EXTENT_SOURCE",
        ] {
            command.env_remove(var);
        }
        command.output().expect("failed to run virtback")
    }

    fn backup_full(&self, image: &Utf8Path, output: &Utf8Path) -> Output {
        self.virtback(&[
            "backup",
            "--domain",
            "vm1",
            "--disk",
            &format!("vda={}", image),
            "--output",
            output.as_str(),
            "--no-progress",
        ])
    }
}

fn assert_success(output: &Output) {
    assert!(
        output.status.success(),
        "virtback failed ({:?}): {}",
        output.status.code(),
        String::from_utf8_lossy(&output.stderr)
    );
}

#[test]
fn test_full_backup_then_restore() {
    let ws = Workspace::new();
    let (image, content) = ws.source_image();
    let backup_dir = ws.path("backup");

    assert_success(&ws.backup_full(&image, &backup_dir));
    assert!(backup_dir.join("vda.full.data").exists());
    assert!(backup_dir.join("vda.full.data.chksum").exists());
    assert!(backup_dir.join("vm1.cpt").exists());

    let state = fs::read_to_string(ws.path("config/checkpoints/vm1.json")).unwrap();
    assert!(state.contains("virtback.0"));

    let restored = ws.path("restored");
    assert_success(&ws.virtback(&[
        "restore",
        "--input",
        backup_dir.as_str(),
        "--output",
        restored.as_str(),
        "--no-progress",
    ]));
    assert_eq!(fs::read(restored.join("vda.img")).unwrap(), content);
}

#[test]
fn test_info_and_verify() {
    let ws = Workspace::new();
    let (image, _) = ws.source_image();
    let backup_dir = ws.path("backup");
    assert_success(&ws.backup_full(&image, &backup_dir));

    let output = ws.virtback(&[
        "info",
        "--json",
        backup_dir.join("vda.full.data").as_str(),
    ]);
    assert_success(&output);
    let json: serde_json::Value = serde_json::from_slice(&output.stdout).unwrap();
    let report = &json[0];
    assert_eq!(report["metadata"]["diskName"], "vda");
    assert_eq!(report["metadata"]["virtualSize"], DISK_SIZE as u64);
    assert_eq!(report["dataFrames"], 2);
    assert_eq!(report["dataBytes"], 2 * BLOCK as u64);

    assert_success(&ws.virtback(&["verify", backup_dir.as_str()]));

    // Corrupt one payload byte past the metadata
    let file = backup_dir.join("vda.full.data");
    let mut bytes = fs::read(&file).unwrap();
    let last = bytes.len() - 100;
    bytes[last] ^= 0xff;
    fs::write(&file, bytes).unwrap();
    let output = ws.virtback(&["verify", backup_dir.as_str()]);
    assert_eq!(output.status.code(), Some(1));
}

#[test]
fn test_full_into_used_directory_fails() {
    let ws = Workspace::new();
    let (image, _) = ws.source_image();
    let backup_dir = ws.path("backup");
    assert_success(&ws.backup_full(&image, &backup_dir));

    let output = ws.backup_full(&image, &backup_dir);
    assert_eq!(output.status.code(), Some(1));
    assert!(String::from_utf8_lossy(&output.stderr).contains("not empty"));
}

#[test]
fn test_strict_turns_warnings_into_exit_code() {
    let ws = Workspace::new();
    let (image, _) = ws.source_image();
    let backup_dir = ws.path("backup");
    assert_success(&ws.backup_full(&image, &backup_dir));

    let restored = ws.path("restored");
    let args = [
        "restore",
        "--input",
        backup_dir.as_str(),
        "--output",
        restored.as_str(),
        "--no-verify",
        "--no-progress",
    ];
    assert_eq!(ws.virtback(&args).status.code(), Some(0));

    let mut strict = vec!["--strict"];
    strict.extend_from_slice(&args);
    assert_eq!(ws.virtback(&strict).status.code(), Some(2));
}
