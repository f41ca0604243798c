use assert_cmd::Command;
use predicates::str::contains;

#[test]
fn request_enqueue_requires_url() {
    Command::cargo_bin("insurance-cli")
        .unwrap()
        .args(["request", "enqueue"])
        .assert()
        .failure()
        .stderr(contains("--url"));
}

#[test]
fn request_abandon_requires_id() {
    Command::cargo_bin("insurance-cli")
        .unwrap()
        .args(["request", "abandon"])
        .assert()
        .failure();
}

#[test]
fn top_level_help_lists_db_and_request_subcommands() {
    Command::cargo_bin("insurance-cli")
        .unwrap()
        .arg("--help")
        .assert()
        .success()
        .stdout(contains("db"))
        .stdout(contains("request"));
}
