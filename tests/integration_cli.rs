use std::io::Write;
use std::process::Command;

fn cli() -> Command {
    Command::new(env!("CARGO_BIN_EXE_sonic-boom"))
}

#[test]
fn test_cli_info() {
    let output = cli().arg("info").output().expect("Failed to execute command");
    assert!(output.status.success(), "Command should succeed");
    let stdout = String::from_utf8_lossy(&output.stdout);
    assert!(stdout.contains("SONIC BOOM ENGINE"));
}

#[test]
fn test_cli_atmosphere_csv() {
    let output = cli()
        .args(["atmosphere", "--top", "11000", "--step", "1000", "-o", "csv"])
        .output()
        .expect("Failed to execute command");
    assert!(output.status.success());
    let stdout = String::from_utf8_lossy(&output.stdout);
    let lines: Vec<&str> = stdout.lines().collect();
    assert_eq!(lines.len(), 13, "header plus 12 altitudes");
    assert!(lines[1].starts_with("0.0,288.150"));
}

#[test]
fn test_cli_propagate_json() {
    let output = cli()
        .args(["propagate", "--altitude", "12000", "--mach", "1.6", "-a", "0,20", "--points", "101", "-o", "json"])
        .output()
        .expect("Failed to execute command");
    assert!(output.status.success(), "stderr: {}", String::from_utf8_lossy(&output.stderr));

    let report: serde_json::Value = serde_json::from_slice(&output.stdout).expect("JSON output");
    let signatures = report["signatures"].as_array().expect("signatures array");
    assert_eq!(signatures.len(), 2);
    for ground in signatures {
        let p_max = ground["metrics"]["p_max_pa"].as_f64().unwrap();
        assert!(p_max > 0.0 && p_max < 50.0);
    }
    assert!(report["failures"].as_array().unwrap().is_empty());
}

#[test]
fn test_cli_propagate_with_config_and_near_field_file() {
    let dir = std::env::temp_dir();
    let config_path = dir.join(format!("sonic_boom_cfg_{}.json", std::process::id()));
    let trace_path = dir.join(format!("sonic_boom_nf_{}.json", std::process::id()));

    let mut config = std::fs::File::create(&config_path).unwrap();
    write!(config, r#"{{ "flight": {{ "altitude_m": 10000.0, "mach": 1.5 }}, "fan": {{ "radius_m": 60.0 }} }}"#).unwrap();

    let samples: Vec<String> = (0..41)
        .map(|j| {
            let x = j as f64 * 2.0;
            let p = 30.0 * (1.0 - x / 40.0) * if j == 0 || j == 40 { 0.0 } else { 1.0 };
            format!(r#"{{ "coordinate_m": {x}, "pressure_pa": {p}, "point_id": {} }}"#, 500 + j)
        })
        .collect();
    let mut trace = std::fs::File::create(&trace_path).unwrap();
    write!(trace, r#"{{ "samples": [{}] }}"#, samples.join(",")).unwrap();

    let output = cli()
        .args(["propagate", "-c"])
        .arg(&config_path)
        .arg("--near-field")
        .arg(&trace_path)
        .args(["-o", "csv"])
        .output()
        .expect("Failed to execute command");
    let _ = std::fs::remove_file(&config_path);
    let _ = std::fs::remove_file(&trace_path);

    assert!(output.status.success(), "stderr: {}", String::from_utf8_lossy(&output.stderr));
    let stdout = String::from_utf8_lossy(&output.stdout);
    assert!(stdout.starts_with("azimuth_deg,time_s,pressure_pa"));
    assert!(stdout.lines().count() > 2);
}

#[test]
fn test_cli_rejects_subsonic() {
    let output = cli()
        .args(["propagate", "--mach", "0.9"])
        .output()
        .expect("Failed to execute command");
    assert!(!output.status.success());
}

#[test]
fn test_cli_quiet_and_verbose_logging() {
    let run = |flag: Option<&str>| {
        let mut cmd = cli();
        cmd.env_remove("RUST_LOG");
        if let Some(flag) = flag {
            cmd.arg(flag);
        }
        let output = cmd
            .args(["propagate", "--altitude", "10000", "-a", "0,120", "--points", "81", "-o", "csv"])
            .output()
            .expect("Failed to execute command");
        assert!(output.status.success(), "stderr: {}", String::from_utf8_lossy(&output.stderr));
        String::from_utf8_lossy(&output.stderr).into_owned()
    };

    // 120° cannot reach the ground and is logged as a warning
    assert!(run(None).contains("failed in"));
    assert!(!run(Some("--quiet")).contains("failed in"));
    assert!(run(Some("--verbose")).contains("ray traced"));
}

#[test]
fn test_cli_log_filter_and_conflicting_flags() {
    let output = cli()
        .args(["--log-filter", "sonic_boom_engine=trace", "info"])
        .output()
        .expect("Failed to execute command");
    assert!(output.status.success());

    let output = cli().args(["-q", "-v", "info"]).output().expect("Failed to execute command");
    assert!(!output.status.success());
}
