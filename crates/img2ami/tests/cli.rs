//! Command-line behavior that needs no AWS access

use assert_cmd::Command;
use predicates::prelude::*;
use tempfile::NamedTempFile;

fn img2ami() -> Command {
    let mut cmd = Command::cargo_bin("img2ami").unwrap();
    cmd.env_remove("AWS_PROFILE").env("RUST_LOG", "error");
    cmd
}

#[test]
fn test_missing_required_arguments_exit_with_usage_error() {
    img2ami()
        .args(["register", "--region", "us-east-2"])
        .assert()
        .code(2)
        .stderr(predicate::str::contains("--image"));
}

#[test]
fn test_missing_image_file_is_a_validation_error() {
    let key = NamedTempFile::new().unwrap();
    img2ami()
        .args([
            "register",
            "--image",
            "/nonexistent/disk.raw",
            "--region",
            "us-east-2",
            "--worker-ami",
            "ami-0a1b2c3d",
            "--key-name",
            "builder",
            "--instance-type",
            "t3.micro",
            "--name",
            "debian-12-custom",
            "--arch",
            "x86_64",
            "--ssh-key",
        ])
        .arg(key.path())
        .assert()
        .code(2)
        .stderr(predicate::str::contains("image"));
}

#[test]
fn test_malformed_worker_ami_is_a_validation_error() {
    let image = NamedTempFile::new().unwrap();
    let key = NamedTempFile::new().unwrap();
    img2ami()
        .arg("register")
        .arg("--image")
        .arg(image.path())
        .args([
            "--region",
            "us-east-2",
            "--worker-ami",
            "ami-XYZ",
            "--key-name",
            "builder",
            "--instance-type",
            "t3.micro",
            "--name",
            "debian-12-custom",
            "--arch",
            "x86_64",
            "--ssh-key",
        ])
        .arg(key.path())
        .assert()
        .code(2)
        .stderr(predicate::str::contains("malformed image id"));
}

#[test]
fn test_unknown_subcommand_is_a_usage_error() {
    img2ami().arg("frobnicate").assert().code(2);
}
