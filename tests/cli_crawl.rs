mod support;

use predicates::prelude::*;

use support::{SiteServer, chapter_html, ok};

#[test]
fn cli_crawls_inspects_and_resets_a_book() {
    let site = SiteServer::spawn(vec![
        (
            "/ch1",
            ok(chapter_html(
                "Chapter 1",
                &["Hello.", "World."],
                &["/toc", "/ch2"],
            )),
        ),
        ("/ch2", ok(chapter_html("Chapter 2", &["Bye."], &["/toc"]))),
    ]);
    let temp = tempfile::TempDir::new().expect("tempdir");
    let data_dir = temp.path().join("book");
    let data_dir = data_dir.to_str().expect("utf-8 path");

    let mut cmd = assert_cmd::cargo::cargo_bin_cmd!("novelify");
    cmd.args([
        "crawl",
        "--url",
        &site.url("/ch1"),
        "--data-dir",
        data_dir,
        "--engine",
        "noop",
        "--delay-ms",
        "0",
        "--charset",
        "utf-8",
    ])
    .assert()
    .success();

    let mut cmd = assert_cmd::cargo::cargo_bin_cmd!("novelify");
    cmd.args(["status", "--data-dir", data_dir])
        .assert()
        .success()
        .stdout(predicate::str::contains("\"chapter_count\": 2"))
        .stdout(predicate::str::contains("\"running\": false"))
        .stdout(predicate::str::contains("\"action\": \"completed\""));

    let mut cmd = assert_cmd::cargo::cargo_bin_cmd!("novelify");
    cmd.args(["chapters", "--data-dir", data_dir])
        .assert()
        .success()
        .stdout(predicate::str::contains("\"key\": \"0001\""))
        .stdout(predicate::str::contains("\"title\": \"Chapter 2\""));

    let mut cmd = assert_cmd::cargo::cargo_bin_cmd!("novelify");
    cmd.args(["show", "--data-dir", data_dir, "--number", "1"])
        .assert()
        .success()
        .stdout(predicate::str::contains("<p>Hello.</p>"))
        .stdout(predicate::str::contains("<p>World.</p>"));

    let mut cmd = assert_cmd::cargo::cargo_bin_cmd!("novelify");
    cmd.args(["show", "--data-dir", data_dir, "--number", "99"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("not found"));

    let mut cmd = assert_cmd::cargo::cargo_bin_cmd!("novelify");
    cmd.args(["errors", "--data-dir", data_dir])
        .assert()
        .success()
        .stdout(predicate::str::contains("[]"));

    let mut cmd = assert_cmd::cargo::cargo_bin_cmd!("novelify");
    cmd.args(["reset", "--data-dir", data_dir])
        .assert()
        .success();

    let mut cmd = assert_cmd::cargo::cargo_bin_cmd!("novelify");
    cmd.args(["chapters", "--data-dir", data_dir])
        .assert()
        .success()
        .stdout(predicate::str::contains("[]"));
}

#[test]
fn cli_crawl_fails_loudly_on_a_broken_chain() {
    let site = SiteServer::spawn(vec![(
        "/ch1",
        ok(chapter_html("Chapter 1", &["First."], &["/toc", "/ch2"])),
    )]);
    let temp = tempfile::TempDir::new().expect("tempdir");
    let data_dir = temp.path().join("book");
    let data_dir = data_dir.to_str().expect("utf-8 path");

    let mut cmd = assert_cmd::cargo::cargo_bin_cmd!("novelify");
    cmd.args([
        "crawl",
        "--url",
        &site.url("/ch1"),
        "--data-dir",
        data_dir,
        "--engine",
        "noop",
        "--delay-ms",
        "0",
        "--charset",
        "utf-8",
    ])
    .assert()
    .failure()
    .stderr(predicate::str::contains("crawl aborted after 1 chapter(s)"));

    // The chapter saved before the failure is still readable.
    let mut cmd = assert_cmd::cargo::cargo_bin_cmd!("novelify");
    cmd.args(["show", "--data-dir", data_dir, "--number", "1"])
        .assert()
        .success()
        .stdout(predicate::str::contains("<p>First.</p>"));
}
