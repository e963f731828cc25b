use readsimple_root::fixture::{Column, FileBuilder, TreeSpec};
use std::path::PathBuf;
use std::process::{Command, Output};
use std::time::{SystemTime, UNIX_EPOCH};

fn bin_path() -> PathBuf {
    PathBuf::from(env!("CARGO_BIN_EXE_readsimple"))
}

fn tmp_dir(name: &str) -> PathBuf {
    let nanos = SystemTime::now().duration_since(UNIX_EPOCH).unwrap().as_nanos();
    let mut p = std::env::temp_dir();
    p.push(format!("readsimple_cli_{}_{}_{}", std::process::id(), nanos, name));
    std::fs::create_dir_all(&p).unwrap();
    p
}

fn run(args: &[&str]) -> Output {
    Command::new(bin_path())
        .args(args)
        .output()
        .unwrap_or_else(|e| panic!("failed to run {:?} {:?}: {}", bin_path(), args, e))
}

const MASS: [f32; 5] = [3.0969, 3.1, 9.46, 0.782, 1.0195];
const PX: [f32; 5] = [1.25, -0.5, 2.0, 0.125, -3.75];
const PY: [f32; 5] = [-2.5, 0.25, 1.5, 4.0, 0.0];
const PZ: [f32; 5] = [10.5, -7.25, 0.75, 1.0, 2.5];

fn write_fixture(dir: &PathBuf, compressed: bool) -> PathBuf {
    let path = dir.join("muons.root");
    FileBuilder::new("muons.root")
        .compressed(compressed)
        .tree(
            TreeSpec::new("twoMuon")
                .branch("mass_mumu", Column::F32(MASS.to_vec()))
                .branch("px", Column::F32(PX.to_vec()))
                .branch("py", Column::F32(PY.to_vec()))
                .branch("pz", Column::F32(PZ.to_vec()))
                .branch("charge", Column::I32(vec![0, 0, 0, 0, 0]))
                .basket_entries(2),
        )
        .object("notes", "not a tree")
        .write_to(&path)
        .unwrap();
    path
}

fn row_sum(i: usize) -> f32 {
    MASS[i] + PX[i] + PY[i] + PZ[i]
}

fn stdout_lines(out: &Output) -> Vec<String> {
    String::from_utf8_lossy(&out.stdout).lines().map(str::to_string).collect()
}

#[test]
fn prints_first_entry_and_total() {
    for compressed in [false, true] {
        let dir = tmp_dir("first");
        let path = write_fixture(&dir, compressed);

        let out = run(&[path.to_string_lossy().as_ref()]);
        assert!(
            out.status.success(),
            "readsimple should succeed, stderr={}",
            String::from_utf8_lossy(&out.stderr)
        );

        let lines = stdout_lines(&out);
        assert_eq!(lines.len(), 3, "stdout={:?}", lines);
        assert_eq!(lines[0], "entries= 5");
        assert_eq!(lines[1], format!("0 {} {} {} {}", MASS[0], PX[0], PY[0], PZ[0]));
        assert_eq!(lines[2], row_sum(0).to_string());

        let _ = std::fs::remove_dir_all(&dir);
    }
}

#[test]
fn all_flag_walks_every_entry() {
    let dir = tmp_dir("all");
    let path = write_fixture(&dir, true);

    let out = run(&[path.to_string_lossy().as_ref(), "--all"]);
    assert!(out.status.success(), "stderr={}", String::from_utf8_lossy(&out.stderr));

    let lines = stdout_lines(&out);
    assert_eq!(lines.len(), 7, "stdout={:?}", lines);
    for i in 0..5 {
        assert_eq!(lines[i + 1], format!("{} {} {} {} {}", i, MASS[i], PX[i], PY[i], PZ[i]));
    }
    let total = (0..5).fold(0f32, |acc, i| acc + row_sum(i));
    assert_eq!(lines[6], total.to_string());

    let _ = std::fs::remove_dir_all(&dir);
}

#[test]
fn custom_branch_selection() {
    let dir = tmp_dir("branches");
    let path = write_fixture(&dir, false);

    let out = run(&[path.to_string_lossy().as_ref(), "--tree", "twoMuon", "--branches", "pz,px"]);
    assert!(out.status.success(), "stderr={}", String::from_utf8_lossy(&out.stderr));
    let lines = stdout_lines(&out);
    assert_eq!(lines[1], format!("0 {} {}", PZ[0], PX[0]));
    assert_eq!(lines[2], (PZ[0] + PX[0]).to_string());

    let _ = std::fs::remove_dir_all(&dir);
}

#[test]
fn diagnostics_stay_off_stdout() {
    let dir = tmp_dir("logs");
    let path = write_fixture(&dir, false);

    let out = run(&[path.to_string_lossy().as_ref(), "--log-level", "debug"]);
    assert!(out.status.success(), "stderr={}", String::from_utf8_lossy(&out.stderr));
    assert_eq!(stdout_lines(&out).len(), 3);
    assert!(!out.stderr.is_empty(), "expected debug events on stderr");

    let _ = std::fs::remove_dir_all(&dir);
}

#[test]
fn missing_file_fails() {
    let dir = tmp_dir("missing");
    let path = dir.join("does_not_exist.root");

    let out = run(&[path.to_string_lossy().as_ref()]);
    assert!(!out.status.success(), "missing file should fail");
    assert!(out.stdout.is_empty(), "no output expected, got {}", String::from_utf8_lossy(&out.stdout));
    assert!(String::from_utf8_lossy(&out.stderr).contains("failed to open"));

    let _ = std::fs::remove_dir_all(&dir);
}

#[test]
fn not_a_root_file_fails() {
    let dir = tmp_dir("garbage");
    let path = dir.join("garbage.root");
    std::fs::write(&path, vec![0u8; 256]).unwrap();

    let out = run(&[path.to_string_lossy().as_ref()]);
    assert!(!out.status.success());
    assert!(String::from_utf8_lossy(&out.stderr).contains("not a ROOT file"));

    let _ = std::fs::remove_dir_all(&dir);
}

#[test]
fn missing_tree_fails() {
    let dir = tmp_dir("no_tree");
    let path = write_fixture(&dir, false);

    let out = run(&[path.to_string_lossy().as_ref(), "--tree", "oneMuon"]);
    assert!(!out.status.success());
    assert!(out.stdout.is_empty());
    assert!(String::from_utf8_lossy(&out.stderr).contains("oneMuon"));

    let _ = std::fs::remove_dir_all(&dir);
}

#[test]
fn non_tree_object_fails_cleanly() {
    let dir = tmp_dir("not_tree");
    let path = write_fixture(&dir, false);

    let out = run(&[path.to_string_lossy().as_ref(), "--tree", "notes"]);
    assert!(!out.status.success());
    let stderr = String::from_utf8_lossy(&out.stderr);
    assert!(stderr.contains("not a TTree"), "stderr={}", stderr);
    assert!(!stderr.contains("panicked"), "stderr={}", stderr);

    let _ = std::fs::remove_dir_all(&dir);
}

#[test]
fn unknown_or_non_float_branch_fails() {
    let dir = tmp_dir("bad_branch");
    let path = write_fixture(&dir, false);
    let file = path.to_string_lossy().to_string();

    let out = run(&[file.as_str(), "--branches", "mass_mumu,pt"]);
    assert!(!out.status.success());
    assert!(String::from_utf8_lossy(&out.stderr).contains("branch not found: pt"));

    let out = run(&[file.as_str(), "--branches", "mass_mumu,charge"]);
    assert!(!out.status.success());
    assert!(String::from_utf8_lossy(&out.stderr).contains("float32"));
    // The entry count is printed before binding fails.
    assert_eq!(stdout_lines(&out), vec!["entries= 5".to_string()]);

    let _ = std::fs::remove_dir_all(&dir);
}

#[test]
fn extreme_magnitudes_use_exponent_form() {
    let dir = tmp_dir("exponent");
    let path = dir.join("tiny.root");
    FileBuilder::new("tiny.root")
        .tree(
            TreeSpec::new("twoMuon")
                .branch("mass_mumu", Column::F32(vec![1e-5]))
                .branch("px", Column::F32(vec![1234567.0]))
                .branch("py", Column::F32(vec![0.5]))
                .branch("pz", Column::F32(vec![2.0])),
        )
        .write_to(&path)
        .unwrap();

    let out = run(&[path.to_string_lossy().as_ref()]);
    assert!(out.status.success(), "stderr={}", String::from_utf8_lossy(&out.stderr));
    let lines = stdout_lines(&out);
    assert_eq!(lines[1], "0 1e-05 1.234567e+06 0.5 2");
    assert_eq!(lines[2], "1.2345695e+06");

    let _ = std::fs::remove_dir_all(&dir);
}
