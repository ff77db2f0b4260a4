use std::path::{Path, PathBuf};
use std::process::Command;

fn temp_path(label: &str) -> PathBuf {
    std::env::temp_dir().join(format!(
        "curbside-cli-{label}-{}-{}",
        std::process::id(),
        std::time::SystemTime::now()
            .duration_since(std::time::UNIX_EPOCH)
            .unwrap_or_default()
            .as_nanos()
    ))
}

/// Two stationary trucks over two four-day weeks, plus a small config.
fn fixture(label: &str) -> PathBuf {
    let dir = temp_path(label);
    std::fs::create_dir_all(&dir).expect("create fixture dir");
    let mut panel = String::from("Truck,Date,Location\n");
    for day in [
        "2014-06-02",
        "2014-06-03",
        "2014-06-04",
        "2014-06-05",
        "2014-06-09",
        "2014-06-10",
        "2014-06-11",
        "2014-06-12",
    ] {
        panel.push_str(&format!("Aztec Dave,{day},A\nBop Bar,{day},B\n"));
    }
    std::fs::write(dir.join("panel.csv"), panel).expect("write panel");
    std::fs::write(
        dir.join("types.csv"),
        "Truck,Type\nAztec Dave,Mexican\nBop Bar,Korean\n",
    )
    .expect("write types");
    std::fs::write(
        dir.join("config.json"),
        r#"{"locations":["A"],"other_location":"B","simulation":{"periods":3,"paths":2},"moments":{"num_draws":3}}"#,
    )
    .expect("write config");
    dir
}

fn arg(path: &Path) -> &str {
    path.to_str().expect("utf-8 temp path")
}

#[test]
fn prepare_writes_first_stage_tables() {
    let exe = env!("CARGO_BIN_EXE_curbside");
    let dir = fixture("prepare");
    let out = dir.join("prepared");
    let output = Command::new(exe)
        .args(["prepare", "--panel", arg(&dir.join("panel.csv"))])
        .args(["--truck-types", arg(&dir.join("types.csv"))])
        .args(["--out-dir", arg(&out)])
        .args(["--config", arg(&dir.join("config.json"))])
        .output()
        .expect("run cli");
    assert!(output.status.success(), "{}", String::from_utf8_lossy(&output.stderr));
    let stdout = String::from_utf8_lossy(&output.stdout);
    assert!(stdout.contains("Curbside BBL Estimator"));
    assert!(stdout.contains("Distinct states: 4"));

    let variables = std::fs::read_to_string(out.join("state_variables.csv")).expect("read vars");
    assert!(variables.starts_with("state_variable\n"));
    let probabilities =
        std::fs::read_to_string(out.join("probabilities.csv")).expect("read probabilities");
    assert!(probabilities.starts_with("Truck,Location,State,Probability\n"));
    assert_eq!(probabilities.lines().count(), 9);
    let states = std::fs::read_to_string(out.join("states.csv")).expect("read states");
    assert_eq!(states.lines().count(), 9);
}

#[test]
fn moments_reads_prepared_tables() {
    let exe = env!("CARGO_BIN_EXE_curbside");
    let dir = fixture("moments");
    let out = dir.join("prepared");
    let status = Command::new(exe)
        .args(["prepare", "--panel", arg(&dir.join("panel.csv"))])
        .args(["--truck-types", arg(&dir.join("types.csv"))])
        .args(["--out-dir", arg(&out)])
        .args(["--config", arg(&dir.join("config.json"))])
        .status()
        .expect("run prepare");
    assert!(status.success());

    let output = Command::new(exe)
        .args(["moments", "--prepared-dir", arg(&out)])
        .args(["--truck-types", arg(&dir.join("types.csv"))])
        .args(["--config", arg(&dir.join("config.json"))])
        .args(["--seed", "99"])
        .output()
        .expect("run moments");
    assert!(output.status.success(), "{}", String::from_utf8_lossy(&output.stderr));
    let stdout = String::from_utf8_lossy(&output.stdout);
    assert!(stdout.contains("3 samples"));
    let rows: Vec<&str> = stdout.lines().filter(|l| l.contains("g(1)=")).collect();
    assert_eq!(rows.len(), 3);
    for row in rows {
        assert!(
            ["Optimal", "Random", "Specific(A)", "Specific(B)"]
                .iter()
                .any(|label| row.contains(label)),
            "{row}"
        );
    }
}

#[test]
fn estimate_writes_results_and_json_report() {
    let exe = env!("CARGO_BIN_EXE_curbside");
    let dir = fixture("estimate");
    let results = dir.join("results.csv");
    let report = dir.join("report.json");
    let output = Command::new(exe)
        .args(["estimate", "--panel", arg(&dir.join("panel.csv"))])
        .args(["--truck-types", arg(&dir.join("types.csv"))])
        .args(["--config", arg(&dir.join("config.json"))])
        .args(["--replicates", "2", "--report", "json"])
        .args(["--output", arg(&results)])
        .args(["--report-output", arg(&report)])
        .output()
        .expect("run cli");
    assert!(output.status.success(), "{}", String::from_utf8_lossy(&output.stderr));

    let table = std::fs::read_to_string(&results).expect("read results");
    let mut lines = table.lines();
    let header = lines.next().expect("header");
    assert!(header.starts_with("intercept,monday,"));
    assert!(header.ends_with(",Converged"));
    assert_eq!(lines.count(), 2);

    let json: serde_json::Value =
        serde_json::from_str(&std::fs::read_to_string(&report).expect("read report"))
            .expect("valid json");
    assert_eq!(json["replicates"].as_array().map(Vec::len), Some(2));
    assert_eq!(json["summary"]["trucks"], 2);
}

#[test]
fn missing_column_fails_fast() {
    let exe = env!("CARGO_BIN_EXE_curbside");
    let dir = fixture("schema");
    std::fs::write(dir.join("bad.csv"), "Truck,Day,Location\nBop Bar,2014-06-02,B\n")
        .expect("write bad panel");
    let output = Command::new(exe)
        .args(["prepare", "--panel", arg(&dir.join("bad.csv"))])
        .args(["--truck-types", arg(&dir.join("types.csv"))])
        .args(["--out-dir", arg(&dir.join("prepared"))])
        .args(["--config", arg(&dir.join("config.json"))])
        .output()
        .expect("run cli");
    assert!(!output.status.success());
    let stderr = String::from_utf8_lossy(&output.stderr);
    assert!(stderr.contains("missing required column `Date`"));
}

#[test]
fn invalid_discount_is_rejected() {
    let exe = env!("CARGO_BIN_EXE_curbside");
    let dir = fixture("discount");
    std::fs::write(
        dir.join("bad.json"),
        r#"{"locations":["A"],"other_location":"B","simulation":{"discount":1.5}}"#,
    )
    .expect("write config");
    let output = Command::new(exe)
        .args(["estimate", "--panel", arg(&dir.join("panel.csv"))])
        .args(["--truck-types", arg(&dir.join("types.csv"))])
        .args(["--config", arg(&dir.join("bad.json"))])
        .args(["--output", arg(&dir.join("results.csv"))])
        .output()
        .expect("run cli");
    assert!(!output.status.success());
    assert!(!dir.join("results.csv").exists());
}
