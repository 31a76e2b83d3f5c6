use std::fs;
use std::io::{Cursor, Write};
use std::path::Path;
use std::process::{Command, Output};

use zipferry::InvocationReport;

fn build_zip(files: &[(&str, &[u8])]) -> Vec<u8> {
    let mut writer = zip::ZipWriter::new(Cursor::new(Vec::new()));
    let options = zip::write::SimpleFileOptions::default()
        .compression_method(zip::CompressionMethod::Deflated);
    for (name, data) in files {
        writer.start_file(*name, options).unwrap();
        writer.write_all(data).unwrap();
    }
    writer.finish().unwrap().into_inner()
}

fn place(root: &Path, relative: &str, data: &[u8]) {
    let path = root.join(relative);
    fs::create_dir_all(path.parent().unwrap()).unwrap();
    fs::write(path, data).unwrap();
}

fn zipferry(root: &Path, args: &[&str]) -> Output {
    Command::new(env!("CARGO_BIN_EXE_zipferry"))
        .arg("process")
        .args(args)
        .arg("--root")
        .arg(root)
        .env("ZIPFERRY_OUTPUT_CONTAINER", "out")
        .env("ZIPFERRY_LOG_LEVEL", "warn")
        .env_remove("RUST_LOG")
        .output()
        .expect("run zipferry")
}

fn report(output: &Output) -> InvocationReport {
    serde_json::from_slice(&output.stdout).unwrap_or_else(|e| {
        panic!(
            "stdout is not a report ({e}): {}",
            String::from_utf8_lossy(&output.stdout)
        )
    })
}

#[test]
fn process_publishes_into_local_store() {
    let tmp = tempfile::tempdir().expect("create temp dir");
    place(
        tmp.path(),
        "incoming/daily/export.zip",
        &build_zip(&[
            ("2026-01-01_badge.csv", b"name,age\nJohn,25\n"),
            ("notes.txt", b"plain"),
        ]),
    );

    let output = zipferry(tmp.path(), &["incoming", "daily/export.zip", "--request-id", "req-cli"]);
    assert!(
        output.status.success(),
        "zipferry failed: stderr={}",
        String::from_utf8_lossy(&output.stderr)
    );

    let report = report(&output);
    assert_eq!(report.request_id, "req-cli");
    assert_eq!(report.succeeded(), 1);
    assert_eq!(report.files_processed(), 2);

    let csv = fs::read_to_string(tmp.path().join("out/processed/badge/2026-01-01_badge.csv")).unwrap();
    assert!(csv.starts_with("name,age,_processed\nJohn,25,20"), "{csv}");
    let txt = fs::read(tmp.path().join("out/processed/notes/notes.txt")).unwrap();
    assert_eq!(txt, b"plain");
}

#[test]
fn process_reads_archives_from_event_document() {
    let tmp = tempfile::tempdir().expect("create temp dir");
    place(tmp.path(), "incoming/My Export.zip", &build_zip(&[("report.txt", b"hi")]));
    let event = tmp.path().join("event.json");
    fs::write(
        &event,
        r#"{"Records": [
            {"s3": {"bucket": {"name": "incoming"}, "object": {"key": "My+Export.zip"}}},
            {"s3": {"bucket": {"name": "incoming"}, "object": {"key": "readme.md"}}}
        ]}"#,
    )
    .unwrap();

    let output = zipferry(tmp.path(), &["--event", event.to_str().unwrap()]);
    assert!(
        output.status.success(),
        "zipferry failed: stderr={}",
        String::from_utf8_lossy(&output.stderr)
    );

    let report = report(&output);
    assert_eq!(report.results.len(), 1);
    assert_eq!(report.results[0].archive, "My Export.zip");
    assert!(tmp.path().join("out/processed/report/report.txt").is_file());
}

#[test]
fn process_fails_when_every_archive_fails() {
    let tmp = tempfile::tempdir().expect("create temp dir");
    place(tmp.path(), "incoming/junk.zip", b"not a zip at all");

    let output = zipferry(tmp.path(), &["incoming", "junk.zip"]);
    assert!(!output.status.success());

    let report = report(&output);
    assert_eq!(report.succeeded(), 0);
    assert!(!report.results[0].errors.is_empty());
}

#[test]
fn process_rejects_event_with_positional_keys() {
    let tmp = tempfile::tempdir().expect("create temp dir");
    let output = zipferry(tmp.path(), &["incoming", "a.zip", "--event", "event.json"]);
    assert!(!output.status.success());
    assert!(output.stdout.is_empty());
}
