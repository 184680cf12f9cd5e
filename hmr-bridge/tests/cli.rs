use std::process::{Command, Output};

fn bridge_cmd(args: &[&str]) -> Output {
    let mut cmd = Command::new(env!("CARGO_BIN_EXE_hmr-bridge"));
    for var in [
        "HMR_BRIDGE_BIND",
        "HMR_BRIDGE_PORTS",
        "HMR_BRIDGE_TARGET",
        "VITE_PORT",
        "HMR_BRIDGE_FIXED_PORT",
        "RUST_LOG",
    ] {
        cmd.env_remove(var);
    }
    cmd.args(args).output().expect("run hmr-bridge")
}

#[test]
fn print_env_reports_explicit_target_as_json() {
    let out = bridge_cmd(&["4100", "--print-env", "--target", "127.0.0.1:5999"]);
    assert!(out.status.success(), "{}", String::from_utf8_lossy(&out.stderr));

    let report: serde_json::Value = serde_json::from_slice(&out.stdout).expect("json on stdout");
    assert_eq!(report["target"]["host"], "127.0.0.1");
    assert_eq!(report["target"]["port"], 5999);
    assert_eq!(report["listen_port"], 4100);
    assert!(report["fixed_port"].is_null());
    let kind = report["context"]["kind"].as_str().unwrap_or_default();
    assert!(
        ["local", "generic_container", "named_platform"].contains(&kind),
        "{kind}"
    );
}

#[test]
fn rewrite_leaves_non_loopback_urls_alone() {
    let out = bridge_cmd(&[
        "--target",
        "127.0.0.1:5999",
        "--rewrite",
        "https://example.com/app.js",
    ]);
    assert!(out.status.success());
    assert_eq!(
        String::from_utf8_lossy(&out.stdout).trim(),
        "https://example.com/app.js"
    );
}

#[test]
fn invalid_target_fails() {
    let out = bridge_cmd(&["--print-env", "--target", "no-port-here"]);
    assert!(!out.status.success());
    assert!(String::from_utf8_lossy(&out.stderr).contains("invalid target"));
}

#[test]
fn invalid_bind_address_fails() {
    let out = bridge_cmd(&["--bind", "not-an-ip", "--print-env", "--target", "127.0.0.1:1"]);
    assert!(!out.status.success());
    assert!(String::from_utf8_lossy(&out.stderr).contains("invalid bind address"));
}

#[test]
fn fixed_port_is_reported() {
    let out = bridge_cmd(&[
        "4100",
        "--print-env",
        "--target",
        "127.0.0.1:5999",
        "--fixed-port",
        "5173",
    ]);
    assert!(out.status.success(), "{}", String::from_utf8_lossy(&out.stderr));
    let report: serde_json::Value = serde_json::from_slice(&out.stdout).expect("json on stdout");
    assert_eq!(report["fixed_port"], 5173);
}

#[test]
fn target_pointing_at_own_listener_fails() {
    let out = bridge_cmd(&["4100", "--print-env", "--target", "localhost:4100"]);
    assert!(!out.status.success());
    assert!(String::from_utf8_lossy(&out.stderr).contains("is the bridge itself"));
}
