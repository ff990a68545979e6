//! Process-level behaviour of the `gpustream` binary.

use assert_cmd::Command;
use predicates::prelude::*;

fn gpustream() -> Command {
    Command::cargo_bin("gpustream").unwrap()
}

#[test]
fn test_cli_help() {
    gpustream()
        .arg("--help")
        .assert()
        .success()
        .stdout(predicate::str::contains("--arraysize"))
        .stdout(predicate::str::contains("--numtimes"));
}

#[test]
fn test_cli_version() {
    gpustream()
        .arg("--version")
        .assert()
        .success()
        .stdout(predicate::str::contains("gpustream"));
}

#[test]
fn test_list_devices() {
    gpustream()
        .args(["--list", "--threads", "2"])
        .assert()
        .success()
        .stdout(predicate::str::contains("0: Host CPU (2 threads)"));
}

#[test]
fn test_small_run() {
    gpustream()
        .args(["-s", "4096", "-n", "3", "--threads", "2"])
        .assert()
        .success()
        .stdout(predicate::str::starts_with("GPU-STREAM\n"))
        .stdout(predicate::str::contains("Implementation: host"))
        .stdout(predicate::str::contains("Running kernels 3 times"))
        .stdout(predicate::str::contains("Precision: double"))
        .stdout(predicate::str::contains("Copy"))
        .stdout(predicate::str::contains("Triad"))
        .stdout(predicate::str::contains("Dot result:"))
        .stdout(predicate::str::contains("Validation: passed"));
}

#[test]
fn test_float_kernel_subset_as_csv() {
    gpustream()
        .args([
            "-s", "2048", "-n", "2", "--float", "--kernels", "copy,dot", "--csv",
        ])
        .assert()
        .success()
        .stdout(predicate::str::starts_with("function,num_times"))
        .stdout(predicate::str::contains("copy,2,2048,4,"))
        .stdout(predicate::str::contains("dot,2,2048,4,"))
        .stdout(predicate::str::contains("triad").not());
}

#[test]
fn test_json_output() {
    let output = gpustream()
        .args(["-s", "1024", "-n", "2", "--json"])
        .output()
        .unwrap();
    assert!(output.status.success());
    let value: serde_json::Value = serde_json::from_slice(&output.stdout).unwrap();
    assert_eq!(value["config"]["array_size"], 1024);
    assert_eq!(value["results"].as_array().unwrap().len(), 5);
}

#[test]
fn test_misaligned_array_size_fails() {
    gpustream()
        .args(["--arraysize", "1000"])
        .assert()
        .failure()
        .stderr(predicate::str::contains(
            "Array size must be a multiple of 1024",
        ));
}

#[test]
#[cfg(target_pointer_width = "64")]
fn test_oversized_array_fails() {
    gpustream()
        .args(["--arraysize", "2305843009213693952", "-n", "2"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("is too large"));
}

#[test]
fn test_unknown_kernel_fails() {
    gpustream()
        .args(["-s", "1024", "--kernels", "copy,fma"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("Unknown kernel 'fma'"));
}

#[test]
fn test_single_iteration_fails() {
    gpustream()
        .args(["-s", "1024", "--numtimes", "1"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("Number of times must be 2 or more"));
}

#[test]
fn test_malformed_number_fails() {
    gpustream()
        .args(["--numtimes", "many"])
        .assert()
        .failure();
}

#[test]
fn test_device_out_of_range_fails() {
    gpustream()
        .args(["-s", "1024", "-n", "2", "--device", "99"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("invalid device index 99"));
}
