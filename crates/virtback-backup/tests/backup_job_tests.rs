//! Backup job integration tests
//!
//! Runs whole jobs against in-memory disks and a mock hypervisor, then checks
//! the files, the checkpoint record and the restored images.

mod common;

use common::*;
use std::fs;
use virtback_backup::{
    inspect, restore_disk, run_backup, BackupJob, CancelToken, CheckpointChain, Collaborators,
    JobProgress, OutputTarget, RestoreOptions, SequenceReport, ZeroScanSource,
};
use virtback_core::{BackupLevel, ChainError, CheckpointController, DiskSpec, Error, Extent};
use virtback_stream::FrameKind;

fn ten_mib_disk() -> Vec<u8> {
    let mut content = vec![0u8; (10 * MIB) as usize];
    content[..(4 * MIB) as usize].copy_from_slice(&pattern((4 * MIB) as usize, 1));
    content[(6 * MIB) as usize..].copy_from_slice(&pattern((4 * MIB) as usize, 2));
    content
}

fn ten_mib_extents() -> Vec<Extent> {
    vec![
        Extent::data(0, 4 * MIB),
        Extent::hole(4 * MIB, 2 * MIB),
        Extent::data(6 * MIB, 4 * MIB),
    ]
}

/// Small disk: 1 MiB with data in the first 256 KiB.
fn small_disk(h: &Harness, name: &str) -> DiskSpec {
    let mut content = vec![0u8; MIB as usize];
    content[..256 * 1024].copy_from_slice(&pattern(256 * 1024, 7));
    let disk = h.transports.add_disk(name, content);
    h.extents.set(
        name,
        vec![Extent::data(0, 256 * 1024), Extent::hole(256 * 1024, 768 * 1024)],
    );
    disk
}

async fn run(h: &Harness, job: BackupJob) -> virtback_core::Result<virtback_backup::JobReport> {
    run_backup(job, h.collaborators(), CancelToken::new(), JobProgress::hidden()).await
}

fn restore(dir: &camino::Utf8Path, disk: &str, stop_at: Option<&str>) -> (Vec<u8>, SequenceReport) {
    let target = dir.join(format!("{}.restored.img", disk));
    let options = RestoreOptions {
        input_dir: dir.to_path_buf(),
        disk: disk.to_string(),
        target: target.clone(),
        stop_at: stop_at.map(str::to_string),
        verify_checksums: true,
    };
    let report = restore_disk(
        &options,
        &CancelToken::new(),
        &virtback_backup::DiskProgress::hidden(),
    )
    .unwrap();
    let bytes = fs::read(&target).unwrap();
    fs::remove_file(&target).unwrap();
    (bytes, report)
}

fn record(dir: &camino::Utf8Path) -> Vec<String> {
    CheckpointChain::load(dir, DOMAIN, PREFIX)
        .unwrap()
        .checkpoints()
        .to_vec()
}

#[tokio::test]
async fn test_full_backup_of_ten_mib_disk() {
    let (_temp, dir) = utf8_tempdir();
    let h = Harness::new(MIB);
    let content = ten_mib_disk();
    let disk = h.transports.add_disk("vda", content.clone());
    h.extents.set("vda", ten_mib_extents());

    let report = run(&h, job(&dir, BackupLevel::Full, vec![disk], 8 * MIB))
        .await
        .unwrap();
    assert_eq!(report.data_bytes(), 8 * MIB);
    assert_eq!(report.warning_count(), 0);
    assert_eq!(report.checkpoint.as_ref().unwrap().name, "virtback.0");

    let file = dir.join("vda.full.data");
    let info = inspect(&file).unwrap();
    assert_eq!(info.metadata.data_size, 8 * MIB);
    assert_eq!(info.metadata.virtual_size, 10 * MIB);
    assert_eq!(info.count(FrameKind::Data), 2);
    assert_eq!(info.count(FrameKind::Zero), 1);
    assert_eq!(info.frames.last().unwrap().kind, FrameKind::Stop);
    assert_eq!(info.data_bytes(), 8 * MIB);

    let zero = info
        .frames
        .iter()
        .find(|f| f.kind == FrameKind::Zero)
        .unwrap();
    assert_eq!((zero.start, zero.length), (4 * MIB, 2 * MIB));

    // Transport request limit is honored
    assert!(h.transports.reads().iter().all(|(_, len)| *len <= MIB));

    assert!(dir.join("vda.full.data.chksum").exists());
    assert_eq!(record(&dir), vec!["virtback.0"]);
    assert_eq!(h.checkpoints.created(), vec!["virtback.0"]);

    let (restored, report) = restore(&dir, "vda", None);
    assert_eq!(report.applied.len(), 1);
    assert_eq!(report.data_bytes(), 8 * MIB);
    assert_eq!(restored, content);
    assert!(restored[(4 * MIB) as usize..(6 * MIB) as usize]
        .iter()
        .all(|b| *b == 0));
}

#[tokio::test]
async fn test_full_then_incremental_chain() {
    let (_temp, dir) = utf8_tempdir();
    let h = Harness::new(MIB);
    let disk = small_disk(&h, "vda");

    run(&h, job(&dir, BackupLevel::Full, vec![disk.clone()], MIB))
        .await
        .unwrap();

    h.transports.write("vda", 512 * 1024, &pattern(4096, 9));
    h.extents.set(
        "vda",
        vec![
            Extent::hole(0, 512 * 1024),
            Extent::data(512 * 1024, 4096),
            Extent::hole(512 * 1024 + 4096, MIB - 512 * 1024 - 4096),
        ],
    );

    let report = run(&h, job(&dir, BackupLevel::Inc, vec![disk], MIB))
        .await
        .unwrap();
    let plan = report.checkpoint.unwrap();
    assert_eq!(plan.name, "virtback.1");
    assert_eq!(plan.parent.as_deref(), Some("virtback.0"));

    let queries = h.extents.queries();
    assert_eq!(queries[0], ("vda".to_string(), None));
    assert_eq!(queries[1], ("vda".to_string(), Some("virtback.0".to_string())));

    let info = inspect(&dir.join("vda.inc.virtback.1.data")).unwrap();
    assert!(info.metadata.incremental);
    assert_eq!(info.count(FrameKind::Zero), 0);
    assert_eq!(info.count(FrameKind::Data), 1);

    assert_eq!(record(&dir), vec!["virtback.0", "virtback.1"]);

    let (restored, report) = restore(&dir, "vda", None);
    assert_eq!(report.applied.len(), 2);
    assert_eq!(restored, h.transports.bytes("vda"));
}

#[tokio::test]
async fn test_diff_does_not_advance_chain() {
    let (_temp, dir) = utf8_tempdir();
    let h = Harness::new(MIB);
    let disk = small_disk(&h, "vda");

    run(&h, job(&dir, BackupLevel::Full, vec![disk.clone()], MIB))
        .await
        .unwrap();
    h.extents.set(
        "vda",
        vec![Extent::data(0, 4096), Extent::hole(4096, MIB - 4096)],
    );

    let report = run(&h, job(&dir, BackupLevel::Diff, vec![disk], MIB))
        .await
        .unwrap();
    let plan = report.checkpoint.unwrap();
    assert!(!plan.persist);
    assert_eq!(plan.parent.as_deref(), Some("virtback.0"));

    let name = report.disks[0].path.file_name().unwrap().to_string();
    assert!(name.starts_with("vda.diff.virtback.1."), "{}", name);
    assert_eq!(record(&dir), vec!["virtback.0"]);
    assert_eq!(h.checkpoints.created(), vec!["virtback.0"]);
}

#[tokio::test]
async fn test_allocation_only_source_refuses_incremental() {
    let (_temp, dir) = utf8_tempdir();
    let h = Harness::new(MIB);
    let disk = small_disk(&h, "vda");
    run(&h, job(&dir, BackupLevel::Full, vec![disk.clone()], MIB))
        .await
        .unwrap();

    let scan_only = Collaborators {
        extents: std::sync::Arc::new(ZeroScanSource::new(64 * 1024)),
        ..h.collaborators()
    };
    for level in [BackupLevel::Inc, BackupLevel::Diff] {
        let result = run_backup(
            job(&dir, level, vec![disk.clone()], MIB),
            scan_only.clone(),
            CancelToken::new(),
            JobProgress::hidden(),
        )
        .await;
        assert!(matches!(result, Err(Error::InvalidConfig { .. })), "{:?}", result);
    }
    assert_eq!(h.checkpoints.created(), vec!["virtback.0"]);
    assert_eq!(record(&dir), vec!["virtback.0"]);

    // The chain is still usable with a change-tracking source
    h.extents.set(
        "vda",
        vec![Extent::data(0, 4096), Extent::hole(4096, MIB - 4096)],
    );
    let report = run(&h, job(&dir, BackupLevel::Inc, vec![disk], MIB))
        .await
        .unwrap();
    assert_eq!(report.checkpoint.unwrap().name, "virtback.1");
    assert_eq!(record(&dir), vec!["virtback.0", "virtback.1"]);
}

#[tokio::test]
async fn test_failed_disk_does_not_stop_siblings() {
    let (_temp, dir) = utf8_tempdir();
    let h = Harness::new(MIB);
    let vda = small_disk(&h, "vda");
    let vdb = small_disk(&h, "vdb");
    let vdc = small_disk(&h, "vdc");
    h.transports.fail_disk("vdb");

    let result = run(&h, job(&dir, BackupLevel::Full, vec![vda, vdb, vdc], MIB)).await;
    match result {
        Err(Error::JobFailed { total, disks }) => {
            assert_eq!(total, 3);
            assert_eq!(disks, vec!["vdb"]);
        }
        other => panic!("expected JobFailed, got {:?}", other.map(|r| r.disks)),
    }

    assert!(dir.join("vda.full.data").exists());
    assert!(dir.join("vdc.full.data").exists());
    assert!(!dir.join("vdb.full.data").exists());
    // Failed jobs never append to the record
    assert!(record(&dir).is_empty());
}

#[tokio::test]
async fn test_cancelled_backup_blocks_next_incremental() {
    let (_temp, dir) = utf8_tempdir();
    let h = Harness::new(MIB);
    let disk = small_disk(&h, "vda");
    run(&h, job(&dir, BackupLevel::Full, vec![disk.clone()], MIB))
        .await
        .unwrap();

    h.extents.set(
        "vda",
        vec![Extent::data(0, 512 * 1024), Extent::hole(512 * 1024, 512 * 1024)],
    );
    let cancel = CancelToken::new();
    h.transports.cancel_on_read(cancel.clone());

    let result = run_backup(
        job(&dir, BackupLevel::Inc, vec![disk.clone()], 64 * 1024),
        h.collaborators(),
        cancel,
        JobProgress::hidden(),
    )
    .await;
    assert!(matches!(result, Err(Error::Cancelled)));
    assert!(dir.join("vda.inc.virtback.1.data.partial").exists());
    assert!(!dir.join("vda.inc.virtback.1.data").exists());
    assert_eq!(h.checkpoints.stop_calls(), 1);
    assert_eq!(record(&dir), vec!["virtback.0"]);

    let again = run(&h, job(&dir, BackupLevel::Inc, vec![disk], 64 * 1024)).await;
    assert!(matches!(again, Err(Error::PartialBackupDetected { .. })));
}

#[tokio::test]
async fn test_checkpoint_missing_from_record_is_foreign() {
    let (_temp, dir) = utf8_tempdir();
    let h = Harness::new(MIB);
    let disk = small_disk(&h, "vda");
    run(&h, job(&dir, BackupLevel::Full, vec![disk.clone()], MIB))
        .await
        .unwrap();
    run(&h, job(&dir, BackupLevel::Inc, vec![disk.clone()], MIB))
        .await
        .unwrap();

    // Drop the newest generation from the record; the hypervisor still has it
    fs::write(
        CheckpointChain::record_path(&dir, DOMAIN),
        serde_json::to_string(&["virtback.0"]).unwrap(),
    )
    .unwrap();
    let files_before = fs::read_dir(&dir).unwrap().count();

    let result = run(&h, job(&dir, BackupLevel::Inc, vec![disk], MIB)).await;
    match result {
        Err(Error::CheckpointChain(ChainError::ForeignCheckpoint { name })) => {
            assert_eq!(name, "virtback.1")
        }
        other => panic!("expected ForeignCheckpoint, got {:?}", other.is_ok()),
    }
    assert_eq!(fs::read_dir(&dir).unwrap().count(), files_before);
}

#[tokio::test]
async fn test_external_checkpoint_is_foreign() {
    let (_temp, dir) = utf8_tempdir();
    let h = Harness::new(MIB);
    let disk = small_disk(&h, "vda");
    run(&h, job(&dir, BackupLevel::Full, vec![disk.clone()], MIB))
        .await
        .unwrap();

    h.checkpoints.create("admin-snapshot").unwrap();

    let result = run(&h, job(&dir, BackupLevel::Inc, vec![disk], MIB)).await;
    assert!(matches!(
        result,
        Err(Error::CheckpointChain(ChainError::ForeignCheckpoint { ref name })) if name == "admin-snapshot"
    ));
}

#[tokio::test]
async fn test_incremental_without_full_fails() {
    let (_temp, dir) = utf8_tempdir();
    let h = Harness::new(MIB);
    let disk = small_disk(&h, "vda");

    let result = run(&h, job(&dir, BackupLevel::Inc, vec![disk], MIB)).await;
    assert!(matches!(
        result,
        Err(Error::CheckpointChain(ChainError::NoCheckpointsFound))
    ));
    assert!(h.checkpoints.created().is_empty());
}

#[tokio::test]
async fn test_full_removes_previous_checkpoints() {
    let (_temp, dir) = utf8_tempdir();
    let h = Harness::new(MIB);
    let disk = small_disk(&h, "vda");
    run(&h, job(&dir, BackupLevel::Full, vec![disk.clone()], MIB))
        .await
        .unwrap();

    let (_temp2, fresh) = utf8_tempdir();
    run(&h, job(&fresh, BackupLevel::Full, vec![disk], MIB))
        .await
        .unwrap();

    assert_eq!(h.checkpoints.removed(), vec!["virtback.0"]);
    assert_eq!(record(&fresh), vec!["virtback.0"]);
}

#[tokio::test]
async fn test_copy_to_archive() {
    let (_temp, dir) = utf8_tempdir();
    let h = Harness::new(MIB);
    let disk = small_disk(&h, "vda");
    let archive_path = dir.join("vm1.tar");

    let mut copy = job(&dir, BackupLevel::Copy, vec![disk], MIB);
    copy.target = OutputTarget::Archive(archive_path.clone());
    let report = run(&h, copy).await.unwrap();

    assert!(report.checkpoint.is_none());
    assert!(h.checkpoints.created().is_empty());
    let info = report.archive.unwrap();
    assert_eq!(info.target, archive_path);
    assert_eq!(info.bytes, fs::metadata(&archive_path).unwrap().len());

    let mut archive = tar::Archive::new(fs::File::open(&archive_path).unwrap());
    let names: Vec<String> = archive
        .entries()
        .unwrap()
        .map(|e| e.unwrap().path().unwrap().to_string_lossy().to_string())
        .collect();
    assert!(names.contains(&"vda.copy.data".to_string()));
    assert!(names.contains(&"vda.copy.data.chksum".to_string()));
    assert_eq!(names.len(), info.files);
}

#[tokio::test]
async fn test_full_backup_into_non_empty_dir_fails() {
    let (_temp, dir) = utf8_tempdir();
    let h = Harness::new(MIB);
    let disk = small_disk(&h, "vda");
    fs::write(dir.join("notes.txt"), "keep").unwrap();

    let result = run(&h, job(&dir, BackupLevel::Full, vec![disk], MIB)).await;
    assert!(matches!(result, Err(Error::OutputNotEmpty { .. })));
}
