use assert_cmd::cargo::cargo_bin_cmd;
use predicates::prelude::*;

fn help_for(subcommand: &str) -> String {
    let mut cmd = cargo_bin_cmd!("ferry");
    let output = cmd
        .arg(subcommand)
        .arg("--help")
        .assert()
        .success()
        .get_output()
        .stdout
        .clone();
    String::from_utf8_lossy(&output).into_owned()
}

#[test]
fn top_level_help_lists_every_role() {
    let mut cmd = cargo_bin_cmd!("ferry");
    cmd.arg("--help").assert().success().stdout(
        predicate::str::contains("watch")
            .and(predicate::str::contains("serve"))
            .and(predicate::str::contains("consume"))
            .and(predicate::str::contains("--config")),
    );
}

#[test]
fn watch_help_mentions_options() {
    let text = help_for("watch");
    assert!(text.contains("<DIRECTORY>"), "watch help missing directory");
    assert!(text.contains("<BROKER_HOST>"), "watch help missing broker host");
    assert!(text.contains("--extension"), "watch help missing --extension");
    assert!(text.contains("--no-serve"), "watch help missing --no-serve");
}

#[test]
fn serve_help_mentions_port() {
    let text = help_for("serve");
    assert!(text.contains("--port"), "serve help missing --port");
    assert!(text.contains("--bind"), "serve help missing --bind");
}

#[test]
fn consume_help_mentions_consumer_name() {
    let text = help_for("consume");
    assert!(text.contains("<DESTINATION>"), "consume help missing destination");
    assert!(text.contains("--consumer"), "consume help missing --consumer");
}

#[test]
fn consume_requires_a_destination() {
    let mut cmd = cargo_bin_cmd!("ferry");
    cmd.args(["consume", "localhost"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("<DESTINATION>"));
}
