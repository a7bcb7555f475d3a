use std::fs;
use std::path::Path;
use std::process::Command;

use tempfile::tempdir;

fn potts_sim() -> Command {
    Command::new(env!("CARGO_BIN_EXE_potts-sim"))
}

fn write_inputs(dir: &Path) -> std::path::PathBuf {
    let row = "[0.25, 0.25, 0.25, 0.25]";
    let rows = vec![row; 3].join(", ");
    fs::write(dir.join("target.json"), format!("[{rows}]")).unwrap();
    // rows are the pairs (0,1), (0,2), (1,2)
    let couplings = "[[-1.0, 0.0, 0.0, -1.0], [0.0, 0.0, 0.0, 0.0], [0.0, 0.5, 0.0, 0.0]]";
    fs::write(dir.join("J.json"), couplings).unwrap();
    let config = format!(
        "workers:
  walkers: 8
  workgroup_size: 8
  steps_per_call: 4
newton:
  rounds: 1
  steps: 1
  gamma: 0.01
sampling:
  equil_time: 2
  sample_time: 1
  samples: 2
model:
  alphabet: AB
  target: '{}'
  couplings: '{}'
  start_seq: ABA
",
        dir.join("target.json").display(),
        dir.join("J.json").display()
    );
    let path = dir.join("run.yaml");
    fs::write(&path, config).unwrap();
    path
}

#[test]
fn energies_command_scores_each_sequence() {
    let dir = tempdir().unwrap();
    let config = write_inputs(dir.path());
    let seqs = dir.path().join("seqs.txt");
    fs::write(&seqs, "AAA\nABA\nBBB\n").unwrap();
    let out = dir.path().join("energies.json");

    let status = potts_sim()
        .args(["-q", "energies", "--config"])
        .arg(&config)
        .arg("--seqs")
        .arg(&seqs)
        .arg("--out")
        .arg(&out)
        .status()
        .unwrap();
    assert!(status.success());

    let energies = potts_mcmc::artifacts::read_energies(&out).unwrap();
    // only J01(A,A) and J01(B,B) contribute to these sequences
    assert_eq!(energies.len(), 3);
    assert!((energies[0] + 1.0).abs() < 1e-6);
    assert!((energies[1] - 0.0).abs() < 1e-6);
    assert!((energies[2] + 1.0).abs() < 1e-6);
}

#[test]
fn infer_command_writes_the_run_layout() {
    let dir = tempdir().unwrap();
    let config = write_inputs(dir.path());
    let out = dir.path().join("out");

    let status = potts_sim()
        .args(["-q", "infer", "--config"])
        .arg(&config)
        .arg("--out")
        .arg(&out)
        .status()
        .unwrap();
    assert!(status.success());
    for file in ["manifest.json", "rounds.csv", "summary.json", "run_0/J.json", "final/J.json"] {
        assert!(out.join(file).is_file(), "missing {}", file);
    }
}

#[test]
fn invalid_configuration_fails() {
    let dir = tempdir().unwrap();
    let config = write_inputs(dir.path());
    let text = fs::read_to_string(&config).unwrap().replace("gamma: 0.01", "gamma: -1.0");
    fs::write(&config, text).unwrap();

    let output = potts_sim()
        .args(["-q", "infer", "--config"])
        .arg(&config)
        .arg("--out")
        .arg(dir.path().join("out"))
        .output()
        .unwrap();
    assert!(!output.status.success());
    assert!(String::from_utf8_lossy(&output.stderr).contains("gamma"));
}

#[test]
fn subseq_freq_reports_log_frequencies() {
    let dir = tempdir().unwrap();
    let config = write_inputs(dir.path());
    let background = dir.path().join("background.txt");
    fs::write(&background, "AAA\nABB\n").unwrap();
    let subseqs = dir.path().join("subseqs.txt");
    fs::write(&subseqs, "AAA\nBAA\n").unwrap();
    let out = dir.path().join("logf.json");

    let status = potts_sim()
        .args(["-q", "subseq-freq", "--config"])
        .arg(&config)
        .args(["--fixed", "0", "--background"])
        .arg(&background)
        .arg("--subseqs")
        .arg(&subseqs)
        .arg("--out")
        .arg(&out)
        .status()
        .unwrap();
    assert!(status.success());

    let report: serde_json::Value = serde_json::from_str(&fs::read_to_string(&out).unwrap()).unwrap();
    let logf: Vec<f64> = report["log_freq"]
        .as_array()
        .unwrap()
        .iter()
        .map(|v| v.as_f64().unwrap())
        .collect();
    // AAA = -1 and ABB = 0; a B at position 0 gives BAA = 0 and BBB = -1
    assert!((logf[0] - 2f64.ln()).abs() < 1e-6);
    let expected = ((-1f64).exp() + 1f64.exp()).ln();
    assert!((logf[1] - expected).abs() < 1e-6);
}
