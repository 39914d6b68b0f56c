use assert_cmd::Command;
use predicates::prelude::*;

fn canopy() -> Command {
    Command::cargo_bin("canopy").unwrap()
}

#[test]
fn queries_from_standard_input() {
    canopy()
        .write_stdin("X = 1.\n")
        .assert()
        .success()
        .stdout("X = 1.\n");
}

#[test]
fn initial_goal_then_replacement_top_level() {
    canopy()
        .args(["-g", "write(hi), nl", "-z", "halt"])
        .assert()
        .success()
        .stdout("hi\n");
}

#[test]
fn consult_then_halt() {
    canopy()
        .args(["-L", "tests/canopy/fixtures/hello.pl"])
        .assert()
        .success()
        .stdout("hello\n");
}

#[test]
fn boot_files_stop_at_true() {
    canopy()
        .args(["-b", "tests/canopy/fixtures/boot.pl"])
        .write_stdin("")
        .assert()
        .code(0)
        .stdout(predicate::str::starts_with("booting\n"))
        .stdout(predicate::str::contains("unreachable").not());
}

#[test]
fn halt_sets_the_exit_code() {
    canopy().args(["-z", "halt(3)"]).assert().code(3);
}

#[test]
fn missing_boot_files_are_fatal() {
    canopy()
        .args(["-b", "tests/canopy/fixtures/no_such_boot.pl"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("canopy:"));
}

#[test]
fn two_letter_switches_are_accepted() {
    canopy()
        .args(["-ts", "16", "-sl", "5", "-z", "true"])
        .assert()
        .success();
}

#[test]
fn missing_saved_states_are_fatal() {
    canopy()
        .arg("tests/canopy/fixtures/no_such_state")
        .write_stdin("")
        .assert()
        .failure()
        .stderr(predicate::str::contains("saved state"));
}

#[test]
fn saved_states_are_restored_in_boot_mode() {
    canopy()
        .arg("tests/canopy/fixtures/boot.pl")
        .write_stdin("")
        .assert()
        .success()
        .stdout(predicate::str::starts_with("booting\n"));
}

#[test]
fn consults_search_the_library_path() {
    canopy()
        .args(["-p", "tests/canopy/fixtures", "-L", "hello"])
        .assert()
        .success()
        .stdout("hello\n");
}

#[test]
fn arguments_after_the_separator_reach_prolog() {
    canopy()
        .args(["-z", "current_prolog_flag(argv, [A, B]), write(A-B), nl", "--", "x", "yz"])
        .assert()
        .success()
        .stdout("x-yz\n");
}

#[test]
fn uppercase_size_switches_are_accepted() {
    canopy()
        .args(["-H", "4096", "-S", "1024", "-T", "512", "--max-heap", "8192", "-z", "true"])
        .assert()
        .success();
}
