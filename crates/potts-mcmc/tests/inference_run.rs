use std::fs;
use std::path::Path;

use potts_core::PairMatrix;
use potts_mcmc::artifacts::{self, round_name, RoundDir};
use potts_mcmc::determinism::inputs_rng;
use potts_mcmc::manifest::RunManifest;
use potts_mcmc::{Buffer, CpuWorker, Inference, InferenceConfig, ModelInputs, SeqBuf};
use tempfile::tempdir;

fn write_target(dir: &Path) -> std::path::PathBuf {
    let path = dir.join("target.json");
    let rows: Vec<Vec<f32>> = (0..6)
        .map(|n| {
            if n % 2 == 0 {
                vec![0.4, 0.1, 0.1, 0.4]
            } else {
                vec![0.25, 0.25, 0.25, 0.25]
            }
        })
        .collect();
    artifacts::write_pairs(&path, &PairMatrix::from_rows(&rows).unwrap()).unwrap();
    path
}

struct Extra<'a> {
    model: &'a str,
    newton: &'a str,
    sampling: &'a str,
}

impl<'a> Extra<'a> {
    fn model(model: &'a str) -> Self {
        Self {
            model,
            newton: "",
            sampling: "",
        }
    }
}

fn config_yaml(target: &Path, out: Option<&Path>, extra: Extra<'_>) -> String {
    let output = match out {
        Some(dir) => format!("output:\n  run_directory: '{}'\n", dir.display()),
        None => String::new(),
    };
    format!(
        "workers:
  walkers: 16
  count: 2
  workgroup_size: 8
  steps_per_call: 8
newton:
  rounds: 2
  steps: 2
  gamma: 0.01
{}sampling:
  equil_time: 4
  sample_time: 1
  samples: 4
{}model:
  alphabet: AB
  target: '{}'
{}seed_policy:
  master_seed: 7
{output}",
        extra.newton,
        extra.sampling,
        target.display(),
        extra.model,
    )
}

fn build(config: InferenceConfig) -> Inference<CpuWorker> {
    let mut rng = inputs_rng(config.seed_policy.master_seed);
    let inputs = ModelInputs::resolve(
        &config.model,
        config.newton.regularization.as_ref(),
        config.workers.walkers,
        &mut rng,
    )
    .unwrap();
    let cluster = CpuWorker::cluster(&config, inputs.length, inputs.states()).unwrap();
    Inference::new(config, inputs, cluster).unwrap()
}

#[test]
fn rounds_write_their_artifacts_and_the_manifest() {
    let dir = tempdir().unwrap();
    let target = write_target(dir.path());
    let out = dir.path().join("out");
    let yaml = config_yaml(
        &target,
        Some(&out),
        Extra::model("  couplings: zero\n  start_seq: ABAB\n"),
    );
    let config = InferenceConfig::from_yaml_str(&yaml).unwrap();
    let outcome = build(config).run().unwrap();

    assert_eq!(outcome.rounds.len(), 2);
    assert_eq!(outcome.startseq.len(), 4);
    for i in 0..2 {
        let round = out.join(round_name(i));
        for file in [
            artifacts::COUPLINGS_FILE,
            artifacts::BIMARG_FILE,
            artifacts::BICOUNTS_FILE,
            artifacts::ENERGIES_FILE,
            artifacts::STARTSEQ_FILE,
            artifacts::PREDICTED_FILE,
            artifacts::INFO_FILE,
            "seqs-0",
            "seqs-1",
        ] {
            assert!(round.join(file).is_file(), "missing {}/{}", round.display(), file);
        }
    }

    let run0 = RoundDir::open(&out.join(round_name(0))).unwrap();
    assert_eq!(run0.load_couplings().unwrap(), PairMatrix::zeros(4, 2));
    let energies = artifacts::read_energies(&run0.path().join(artifacts::ENERGIES_FILE)).unwrap();
    assert_eq!(energies.len(), 16 * 4);

    let csv = fs::read_to_string(out.join("rounds.csv")).unwrap();
    let lines: Vec<&str> = csv.lines().collect();
    assert_eq!(lines.len(), 3);
    assert!(lines[0].starts_with("round,ferr,ssr"));
    assert!(lines[2].starts_with("1,"));

    let manifest = RunManifest::load(&out.join("manifest.json")).unwrap();
    assert_eq!(manifest.master_seed, 7);
    assert_eq!(manifest.provenance.length, 4);
    assert_eq!(manifest.rounds.len(), 2);
}

#[test]
fn same_seed_reproduces_the_couplings() {
    let dir = tempdir().unwrap();
    let target = write_target(dir.path());
    let yaml = config_yaml(&target, None, Extra::model("  couplings: zero\n  start_seq: rand\n"));

    let first = build(InferenceConfig::from_yaml_str(&yaml).unwrap()).run().unwrap();
    let second = build(InferenceConfig::from_yaml_str(&yaml).unwrap()).run().unwrap();
    let bits = |m: &PairMatrix| m.values().iter().map(|v| v.to_bits()).collect::<Vec<_>>();
    assert_eq!(bits(&first.couplings), bits(&second.couplings));
    assert_eq!(first.startseq, second.startseq);
    assert_eq!(first.rounds[1].discrepancy, second.rounds[1].discrepancy);
}

#[test]
fn a_previous_round_seeds_a_preoptimized_run() {
    let dir = tempdir().unwrap();
    let target = write_target(dir.path());
    let first_out = dir.path().join("first");
    let yaml = config_yaml(
        &target,
        Some(&first_out),
        Extra::model("  couplings: zero\n  start_seq: BBAA\n"),
    );
    build(InferenceConfig::from_yaml_str(&yaml).unwrap()).run().unwrap();

    let previous = first_out.join(round_name(1));
    let second_out = dir.path().join("second");
    let seqmodel = format!("  seqmodel: '{}'\n", previous.display());
    let yaml = config_yaml(
        &target,
        Some(&second_out),
        Extra {
            model: &seqmodel,
            newton: "  preopt: true\n",
            sampling: "",
        },
    );
    let config = InferenceConfig::from_yaml_str(&yaml).unwrap();
    let mut rng = inputs_rng(config.seed_policy.master_seed);
    let inputs = ModelInputs::resolve(&config.model, None, 16, &mut rng).unwrap();
    let round = RoundDir::open(&previous).unwrap();
    assert_eq!(inputs.couplings, round.load_couplings().unwrap());
    assert_eq!(inputs.seqs.as_ref().map(|s| s.len()), Some(64));

    let outcome = build(config).run().unwrap();
    assert_eq!(outcome.rounds.len(), 2);
    let preopt = second_out.join("preopt");
    for file in ["initbimarg.json", "initJ.json", "perturbedJ.json", "seqs-0"] {
        assert!(preopt.join(file).is_file(), "missing preopt/{}", file);
    }
    let perturbed = artifacts::read_pairs(&preopt.join("perturbedJ.json")).unwrap();
    assert_ne!(perturbed, inputs.couplings);
}

#[test]
fn tempered_sampling_keeps_the_ladder_populated() {
    let dir = tempdir().unwrap();
    let target = write_target(dir.path());
    let out = dir.path().join("mcmc");
    let yaml = config_yaml(
        &target,
        Some(&out),
        Extra {
            model: "  couplings: logscore\n  start_seq: AAAA\n",
            newton: "",
            sampling: "  tempering:\n    ladder:\n      type: manual\n      betas: [1.0, 0.5]\n    swaps: 8\n",
        },
    );
    let config = InferenceConfig::from_yaml_str(&yaml).unwrap();
    assert!(config.sampling.tempering.is_some());

    let mut inference = build(config);
    let sample = inference.sample_once().unwrap();
    assert!(sample.swaps.attempted > 0);

    let betas: Vec<f32> = inference
        .cluster_mut()
        .gather_values(Buffer::Betas)
        .unwrap()
        .concat();
    assert_eq!(betas.iter().filter(|&&b| b == 1.0).count(), 8);
    assert_eq!(betas.iter().filter(|&&b| b == 0.5).count(), 8);

    assert!(out.join("mainseqs").is_file());
    let stored = artifacts::read_energies(&out.join("mainB.json")).unwrap();
    assert_eq!(stored, betas);
}

#[test]
fn kept_walkers_require_preloaded_sequences() {
    let dir = tempdir().unwrap();
    let target = write_target(dir.path());
    let yaml = config_yaml(
        &target,
        None,
        Extra {
            model: "  couplings: zero\n  start_seq: BBBB\n",
            newton: "  reset_seqs: false\n",
            sampling: "",
        },
    );
    let err = InferenceConfig::from_yaml_str(&yaml).unwrap_err();
    assert_eq!(err.info().code, "live-seqs-missing");

    let yaml = config_yaml(&target, None, Extra::model("  couplings: zero\n  start_seq: BBBB\n"));
    let mut config = InferenceConfig::from_yaml_str(&yaml).unwrap();
    let mut rng = inputs_rng(7);
    let inputs = ModelInputs::resolve(&config.model, None, 16, &mut rng).unwrap();
    let cluster = CpuWorker::cluster(&config, inputs.length, inputs.states()).unwrap();
    config.newton.reset_seqs = false;
    let err = Inference::new(config, inputs, cluster).err().unwrap();
    assert_eq!(err.info().code, "live-seqs-missing");
}

#[test]
fn kept_walkers_start_from_the_last_preloaded_sequences() {
    let dir = tempdir().unwrap();
    let target = write_target(dir.path());
    let first_out = dir.path().join("first");
    let yaml = config_yaml(
        &target,
        Some(&first_out),
        Extra::model("  couplings: zero\n  start_seq: BBAA\n"),
    );
    build(InferenceConfig::from_yaml_str(&yaml).unwrap()).run().unwrap();

    let seqmodel = format!("  seqmodel: '{}'\n", first_out.join(round_name(1)).display());
    let yaml = config_yaml(
        &target,
        None,
        Extra {
            model: &seqmodel,
            newton: "  reset_seqs: false\n",
            sampling: "",
        },
    );
    let config = InferenceConfig::from_yaml_str(&yaml).unwrap();
    let mut rng = inputs_rng(config.seed_policy.master_seed);
    let preloaded = ModelInputs::resolve(&config.model, None, 16, &mut rng)
        .unwrap()
        .seqs
        .unwrap();
    assert_eq!(preloaded.len(), 64);

    let mut inference = build(config);
    let live: Vec<Vec<u8>> = inference
        .cluster_mut()
        .gather_seqs(SeqBuf::Main)
        .unwrap()
        .iter()
        .flat_map(|batch| batch.iter().map(<[u8]>::to_vec).collect::<Vec<_>>())
        .collect();
    let tail: Vec<Vec<u8>> = preloaded.tail(16).iter().map(<[u8]>::to_vec).collect();
    assert_eq!(live, tail);
    assert_eq!(inference.run().unwrap().rounds.len(), 2);
}

#[test]
fn tracked_equilibration_writes_numbered_snapshots() {
    let dir = tempdir().unwrap();
    let target = write_target(dir.path());
    let out = dir.path().join("out");
    let yaml = config_yaml(
        &target,
        Some(&out),
        Extra {
            model: "  couplings: zero\n  start_seq: ABAB\n",
            newton: "",
            sampling: "  track_equil: 2\n",
        },
    );
    build(InferenceConfig::from_yaml_str(&yaml).unwrap()).run().unwrap();

    for i in 0..2 {
        let equil = out.join(round_name(i)).join("equilibration");
        // equil_time 4 in blocks of 2
        assert!(equil.join("bimarg_0.json").is_file());
        assert!(equil.join("bimarg_1.json").is_file());
        assert!(!equil.join("bimarg_2.json").exists());
        let snapshot = artifacts::read_pairs(&equil.join("bimarg_1.json")).unwrap();
        assert!(snapshot.validate_marginals().is_ok());
    }
}

#[test]
fn pre_equilibration_adds_kernel_calls_before_round_zero() {
    let dir = tempdir().unwrap();
    let target = write_target(dir.path());
    let calls = |sampling: &str| {
        let yaml = config_yaml(
            &target,
            None,
            Extra {
                model: "  couplings: zero\n  start_seq: AABB\n",
                newton: "",
                sampling,
            },
        );
        let mut inference = build(InferenceConfig::from_yaml_str(&yaml).unwrap());
        inference.run().unwrap();
        inference.cluster_mut().workers()[0].kernel_calls()
    };
    // two rounds of equil 4 plus 3 sampling intervals
    assert_eq!(calls(""), 14);
    assert_eq!(calls("  preequil_time: 3\n"), 17);
}
