use std::process::Command;

#[test]
fn binary_refuses_to_start_without_jwt_secret() {
    let exe = env!("CARGO_BIN_EXE_welcomepage-backend");
    let output = Command::new(exe)
        .env_remove("JWT_SECRET")
        .env("PUBLISH_QUEUE_SCAN_INTERVAL_SECS", "0")
        .output()
        .expect("failed to run welcomepage-backend binary");
    assert!(!output.status.success());
}
