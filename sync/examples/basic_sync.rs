//! Basic example demonstrating the snapshot sync engine
//!
//! Sets up a local directory and a filesystem-backed snapshot store in a
//! TempDir, runs the first backup, diverges the two sides and reconciles.

use std::error::Error;
use std::sync::Arc;

use snapsync::{
    DirStore, RemoteStore, SnapshotRef, SyncConfig, SyncEngine, SyncOutcome, ARCHIVE_NAMESPACE,
};

#[tokio::main]
async fn main() -> Result<(), Box<dyn Error>> {
    // Initialize tracing
    tracing_subscriber::fmt::init();

    println!("Snapshot Sync Engine Example");
    println!("============================");

    let temp_dir = tempfile::TempDir::new()?;
    let local_dir = temp_dir.path().join("local");
    let store_dir = temp_dir.path().join("store");

    // Seed the local directory with some files
    tokio::fs::create_dir_all(local_dir.join("docs")).await?;
    tokio::fs::write(local_dir.join("notes.txt"), b"first draft").await?;
    tokio::fs::write(local_dir.join("docs").join("plan.txt"), b"the plan").await?;

    println!("Local directory: {}", local_dir.display());
    println!("Snapshot store:  {}", store_dir.display());
    println!();

    let config = SyncConfig::new(&local_dir);
    let store = Arc::new(DirStore::new(&store_dir).with_exclude(config.exclusion_matcher()?));
    let engine = SyncEngine::new(config, store.clone())?;

    // Example 1: first backup
    println!("Example 1: First Backup");
    println!("-----------------------");

    let outcome = engine.sync(SnapshotRef::Latest, true).await?;
    let report = outcome.report().expect("nothing else is syncing");
    let first = report.uploaded.clone().expect("first backup uploads");
    println!("Created snapshot {first}");
    println!();

    // Example 2: idempotent comparison sync
    println!("Example 2: Comparison Sync With No Changes");
    println!("------------------------------------------");

    match engine.sync(SnapshotRef::Latest, false).await? {
        SyncOutcome::Completed(report) => {
            println!("Downloaded: {}", report.downloaded);
            println!("Archived:   {}", report.archived);
            println!("Uploaded:   {:?}", report.uploaded);
        }
        SyncOutcome::Busy => unreachable!("no concurrent sync in this example"),
    }
    println!();

    // Example 3: a newer remote file displaces the local copy
    println!("Example 3: Reconciling A Newer Remote File");
    println!("------------------------------------------");

    // Publish a newer revision of notes.txt from a second machine.
    let other_machine = temp_dir.path().join("other");
    tokio::fs::create_dir_all(other_machine.join("docs")).await?;
    tokio::fs::write(other_machine.join("notes.txt"), b"second draft").await?;
    tokio::fs::write(other_machine.join("docs").join("plan.txt"), b"the plan").await?;

    // Give the revision a strictly newer mtime (comparisons happen at
    // second granularity).
    let future = std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)?
        .as_secs() as i64
        + 3600;
    utime::set_file_times(other_machine.join("notes.txt"), future, future)?;
    let snapshot = store.upload_tree(&other_machine, "").await?;
    println!("Second machine published snapshot {snapshot}");

    let outcome = engine
        .sync(SnapshotRef::Archived(snapshot), false)
        .await?;
    let report = outcome.report().expect("nothing else is syncing");
    println!("Downloaded: {}", report.downloaded);
    println!("Archived:   {}", report.archived);
    println!(
        "Live file now reads: {:?}",
        String::from_utf8(tokio::fs::read(local_dir.join("notes.txt")).await?)?
    );

    let snapshots = store.list_directory(ARCHIVE_NAMESPACE).await?;
    println!();
    println!("Store now holds {} snapshots", snapshots.len());
    println!("All examples completed successfully!");

    Ok(())
}
