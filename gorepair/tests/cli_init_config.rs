//! CLI tests for `gorepair init-config`.

use std::fs;
use std::process::{Command, Stdio};

use gorepair::exit_codes;
use gorepair::io::config::{CONFIG_FILE_NAME, GorepairConfig, load_config};

fn gorepair() -> Command {
    Command::new(env!("CARGO_BIN_EXE_gorepair"))
}

/// Verifies the default config is written into the module and loads back.
#[test]
fn writes_default_config() {
    let temp = tempfile::tempdir().expect("tempdir");

    let output = gorepair()
        .arg("init-config")
        .arg(temp.path())
        .output()
        .expect("gorepair init-config");

    assert_eq!(output.status.code(), Some(exit_codes::OK));
    assert!(String::from_utf8_lossy(&output.stdout).starts_with("wrote "));
    let path = temp.path().join(CONFIG_FILE_NAME);
    assert_eq!(load_config(&path).expect("load"), GorepairConfig::default());
}

/// Verifies an existing config is kept unless `--force` is given.
#[test]
fn existing_config_needs_force() {
    let temp = tempfile::tempdir().expect("tempdir");
    let path = temp.path().join(CONFIG_FILE_NAME);
    fs::write(&path, "max_attempts = 7\n").expect("seed");

    let status = gorepair()
        .arg("init-config")
        .arg(temp.path())
        .stdout(Stdio::null())
        .stderr(Stdio::null())
        .status()
        .expect("gorepair init-config");
    assert_eq!(status.code(), Some(exit_codes::ERROR));
    assert_eq!(fs::read_to_string(&path).expect("read"), "max_attempts = 7\n");

    let status = gorepair()
        .args(["-v", "init-config", "--force"])
        .arg(temp.path())
        .stdout(Stdio::null())
        .status()
        .expect("gorepair init-config --force");
    assert_eq!(status.code(), Some(exit_codes::OK));
    assert_eq!(load_config(&path).expect("load").max_attempts, 3);
}
