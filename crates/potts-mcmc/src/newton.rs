use potts_core::{Bimarg, Couplings, PairMatrix, PottsError, RngHandle};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, instrument, warn};

use crate::aggregate::weighted_bimarg;
use crate::cluster::ComputeCluster;
use crate::config::{AcceptancePolicy, NewtonConfig};
use crate::noise::resample_marginals;
use crate::worker::{BufKind, Buffer, BufferData, ComputeWorker, SeqBuf, Slot};

/// `gamma` may shrink down to `gamma0 / GAMMA_FLOOR` before the solver stops.
pub const GAMMA_FLOOR: f64 = 64.0;

/// Fixed parameters of the Newton solver.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NewtonSettings {
    /// Step size at the start of every round.
    pub gamma0: f64,
    /// Pseudocount damping of the update.
    pub damping: f64,
    /// Maximum number of trial steps.
    pub steps: usize,
    /// Alignment size for target resampling, if enabled.
    pub noise_samples: Option<u64>,
    /// Trial acceptance rule.
    pub acceptance: AcceptancePolicy,
}

impl NewtonSettings {
    /// Settings from the `newton` configuration section.
    pub fn from_config(config: &NewtonConfig) -> Self {
        Self {
            gamma0: config.gamma,
            damping: config.damping,
            steps: config.steps,
            noise_samples: config.noise_samples,
            acceptance: config.acceptance,
        }
    }
}

/// Mutable solver state of one round.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct NewtonState {
    /// Current step size.
    pub gamma: f64,
    /// Pseudocount damping.
    pub damping: f64,
    /// Outer round this solve belongs to.
    pub round: usize,
    /// Accepted steps so far.
    pub accepted: usize,
    /// Trial steps evaluated so far.
    pub trials: usize,
    /// SSR of the last accepted trial.
    pub last_ssr: f64,
}

impl NewtonState {
    fn start(settings: &NewtonSettings, round: usize) -> Self {
        Self {
            gamma: settings.gamma0,
            damping: settings.damping,
            round,
            accepted: 0,
            trials: 0,
            last_ssr: f64::INFINITY,
        }
    }
}

/// Result of a Newton solve.
#[derive(Debug, Clone)]
pub struct NewtonOutcome {
    /// Last accepted couplings.
    pub couplings: Couplings,
    /// Predicted marginals of the last accepted couplings.
    pub bimarg: Bimarg,
    /// Final solver state.
    pub state: NewtonState,
    /// True when the step size fell below its floor.
    pub stopped_early: bool,
}

/// Evaluated trial step.
#[derive(Debug, Clone)]
pub struct Trial {
    /// Neff-weighted reweighted marginals.
    pub bimarg: Bimarg,
    /// SSR against the un-noised target.
    pub ssr: f64,
    /// Total effective sample size.
    pub neff: f64,
}

/// Quasi-Newton coupling update driven by importance reweighting.
#[derive(Debug, Clone)]
pub struct NewtonSolver<'a> {
    settings: NewtonSettings,
    target: &'a Bimarg,
    regularization: Option<&'a PairMatrix>,
    rng: RngHandle,
}

impl<'a> NewtonSolver<'a> {
    /// Solver against `target`; `rng` feeds target resampling.
    pub fn new(settings: NewtonSettings, target: &'a Bimarg, rng: RngHandle) -> Self {
        Self {
            settings,
            target,
            regularization: None,
            rng,
        }
    }

    /// Adds the weighted L1 term with per-entry weights `reg`.
    pub fn with_regularization(mut self, reg: &'a PairMatrix) -> Self {
        self.regularization = Some(reg);
        self
    }

    /// Settings in use.
    pub fn settings(&self) -> &NewtonSettings {
        &self.settings
    }

    /// Runs the solver on the current large sample.
    ///
    /// Expects the sampling couplings in `Couplings(Main)` of every worker and
    /// `sample_bimarg` to be the aggregated marginals of the sample. On
    /// divergence the error is returned with the back buffers untouched.
    #[instrument(level = "info", skip_all, fields(round = round))]
    pub fn solve<W: ComputeWorker>(
        &mut self,
        cluster: &mut ComputeCluster<W>,
        sample_bimarg: &Bimarg,
        round: usize,
    ) -> Result<NewtonOutcome, PottsError> {
        let mut state = NewtonState::start(&self.settings, round);
        self.init(cluster, sample_bimarg)?;

        let mut stopped_early = false;
        for _ in 0..self.settings.steps {
            let trial = self.trial(cluster, &mut state)?;
            let reject = self.settings.acceptance == AcceptancePolicy::ShrinkOnIncrease
                && trial.ssr > state.last_ssr;
            if reject {
                self.reject(cluster)?;
                state.gamma /= 2.0;
                debug!(gamma = state.gamma, ssr = trial.ssr, "trial rejected");
                if state.gamma < self.settings.gamma0 / GAMMA_FLOOR {
                    warn!(gamma = state.gamma, "step size fell below its floor, stopping");
                    stopped_early = true;
                    break;
                }
            } else {
                self.accept(cluster, &trial)?;
                state.accepted += 1;
                state.last_ssr = trial.ssr;
            }
        }

        let couplings = cluster.read_pairs(Buffer::Couplings(Slot::Back))?;
        let bimarg = cluster.read_pairs(Buffer::Bimarg(Slot::Back))?;
        info!(
            accepted = state.accepted,
            trials = state.trials,
            ssr = state.last_ssr,
            gamma = state.gamma,
            "newton solve finished"
        );
        Ok(NewtonOutcome {
            couplings,
            bimarg,
            state,
            stopped_early,
        })
    }

    fn init<W: ComputeWorker>(
        &mut self,
        cluster: &mut ComputeCluster<W>,
        sample_bimarg: &Bimarg,
    ) -> Result<(), PottsError> {
        cluster.broadcast(Buffer::BimargTarget, &BufferData::Pairs(self.target.clone()))?;
        cluster.broadcast(Buffer::Bimarg(Slot::Back), &BufferData::Pairs(sample_bimarg.clone()))?;
        cluster.for_each(|w| {
            w.calc_energies(SeqBuf::Large, Slot::Main)?;
            w.copy_buf(Buffer::Couplings(Slot::Main), Buffer::Couplings(Slot::Back))?;
            w.copy_buf(Buffer::Couplings(Slot::Main), Buffer::Couplings(Slot::Front))
        })
    }

    fn trial<W: ComputeWorker>(
        &mut self,
        cluster: &mut ComputeCluster<W>,
        state: &mut NewtonState,
    ) -> Result<Trial, PottsError> {
        state.trials += 1;
        if let Some(samples) = self.settings.noise_samples {
            let noisy = resample_marginals(self.target, samples, &mut self.rng)?;
            cluster.broadcast(Buffer::BimargTarget, &BufferData::Pairs(noisy))?;
        }

        let (gamma, damping) = (state.gamma, state.damping);
        match self.regularization {
            Some(reg) => cluster.for_each(|w| w.update_j_weightfn(gamma, damping, reg))?,
            None => cluster.for_each(|w| w.update_j(gamma, damping))?,
        }
        cluster.for_each(|w| w.perturb_marg())?;

        let bimargs = cluster.gather_pairs(Buffer::Bimarg(Slot::Front))?;
        let neffs = cluster.gather_neff()?;
        let (bimarg, neff) = weighted_bimarg(&neffs, &bimargs).map_err(|err| match err {
            PottsError::Divergence(info) => PottsError::Divergence(
                info.with_context("round", state.round)
                    .with_context("step", state.trials)
                    .with_context("gamma", state.gamma),
            ),
            other => other,
        })?;
        let ssr = self.target.ssr(&bimarg);
        debug!(step = state.trials, ssr, neff, gamma, "trial evaluated");
        for worker in cluster.workers() {
            worker.log_profile();
        }
        Ok(Trial { bimarg, ssr, neff })
    }

    fn accept<W: ComputeWorker>(
        &self,
        cluster: &mut ComputeCluster<W>,
        trial: &Trial,
    ) -> Result<(), PottsError> {
        cluster.broadcast(Buffer::Bimarg(Slot::Front), &BufferData::Pairs(trial.bimarg.clone()))?;
        cluster.for_each(|w| {
            w.store_buf(BufKind::Couplings)?;
            w.store_buf(BufKind::Bimarg)
        })
    }

    fn reject<W: ComputeWorker>(&self, cluster: &mut ComputeCluster<W>) -> Result<(), PottsError> {
        cluster.for_each(|w| {
            w.copy_buf(Buffer::Couplings(Slot::Back), Buffer::Couplings(Slot::Front))?;
            w.copy_buf(Buffer::Bimarg(Slot::Back), Buffer::Bimarg(Slot::Front))
        })
    }
}
