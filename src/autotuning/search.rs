//! Search engine over a tile-config candidate space.
//!
//! Three strategies share one evaluation loop:
//! - `Grid`: every legal candidate in enumeration order.
//! - `Random`: a seeded shuffle of the legal candidates, truncated.
//! - `Guided`: a coarse grid, then neighbourhood refinement around the best
//!   candidate found so far, never re-evaluating a candidate.
//!
//! Candidates are scored in fixed-size batches. With `parallel` set a batch
//! is evaluated on rayon workers, but the batch is folded in enumeration
//! order, so the budget, early stop and tie-breaking behave exactly as in a
//! sequential run.

use std::collections::HashSet;
use std::time::Instant;

use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::SeedableRng;
use rayon::prelude::*;
use serde::{Deserialize, Serialize};

use crate::autotuning::objective::{Evaluation, ObjectiveFunc};
use crate::autotuning::search_space::{CandidateSpace, TileConfig};
use crate::types::{TuneError, TuneResult};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SearchStrategy {
    Grid,
    Random {
        samples: usize,
    },
    Guided {
        /// Sample every N-th value of each parameter in the coarse phase
        coarse_stride: usize,
        /// Steps around the best candidate in each parameter
        refine_radius: usize,
        refine_iters: usize,
    },
}

impl std::fmt::Display for SearchStrategy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SearchStrategy::Grid => f.write_str("grid"),
            SearchStrategy::Random { samples } => write!(f, "random({samples})"),
            SearchStrategy::Guided {
                coarse_stride,
                refine_radius,
                refine_iters,
            } => write!(
                f,
                "guided(stride={coarse_stride}, radius={refine_radius}, iters={refine_iters})"
            ),
        }
    }
}

/// Configuration for the search process.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SearchConfig {
    pub strategy: SearchStrategy,
    /// Upper bound on objective calls.
    pub max_evaluations: Option<usize>,
    /// Stop as soon as a viable candidate scores at or below this.
    pub early_stop_score: Option<f64>,
    /// Seed for the `Random` strategy.
    pub seed: u64,
    pub parallel: bool,
    /// Candidates scored per batch.
    pub batch_size: usize,
    /// Skip candidates already evaluated in this search.
    pub cache_evaluations: bool,
}

impl Default for SearchConfig {
    fn default() -> Self {
        SearchConfig {
            strategy: SearchStrategy::Guided {
                coarse_stride: 2,
                refine_radius: 1,
                refine_iters: 2,
            },
            max_evaluations: None,
            early_stop_score: None,
            seed: 42,
            parallel: true,
            batch_size: 16,
            cache_evaluations: true,
        }
    }
}

impl SearchConfig {
    /// Fast search: coarse grid, one short refinement, bounded budget.
    pub fn fast() -> Self {
        SearchConfig {
            strategy: SearchStrategy::Guided {
                coarse_stride: 3,
                refine_radius: 1,
                refine_iters: 1,
            },
            max_evaluations: Some(64),
            ..Self::default()
        }
    }

    /// Exhaustive search over the legal space.
    pub fn thorough() -> Self {
        SearchConfig {
            strategy: SearchStrategy::Grid,
            ..Self::default()
        }
    }

    pub fn with_strategy(mut self, strategy: SearchStrategy) -> Self {
        self.strategy = strategy;
        self
    }
}

/// Result of a tuning search.
#[derive(Debug, Clone)]
pub struct SearchResult {
    pub best_config: TileConfig,
    /// Minimised objective score of `best_config`
    pub best_score: f64,
    pub best_evaluation: Evaluation,
    /// Objective calls made
    pub evaluations: usize,
    /// Evaluated candidates with no successful sample
    pub non_viable: usize,
    pub early_stopped: bool,
    pub search_time_ns: u64,
    /// Every evaluated candidate, best first; ties keep evaluation order
    pub all_results: Vec<(TileConfig, Evaluation)>,
}

impl std::fmt::Display for SearchResult {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "Best: {} | score={:.3} | evaluated {} configs ({} non-viable) in {:.1}ms",
            self.best_config,
            self.best_score,
            self.evaluations,
            self.non_viable,
            self.search_time_ns as f64 / 1_000_000.0,
        )
    }
}

/// Per-search bookkeeping. Dropped when `search` returns.
struct SearchState {
    results: Vec<(TileConfig, Evaluation)>,
    seen: HashSet<TileConfig>,
    best: Option<usize>,
    early_stopped: bool,
}

impl SearchState {
    fn new() -> Self {
        SearchState {
            results: Vec::new(),
            seen: HashSet::new(),
            best: None,
            early_stopped: false,
        }
    }

    fn best_config(&self) -> Option<TileConfig> {
        self.best.map(|i| self.results[i].0)
    }
}

/// Searches a candidate space for the configuration minimising an objective.
pub struct ScheduleConfigSearcher {
    objective: Box<dyn ObjectiveFunc>,
    space: CandidateSpace,
    config: SearchConfig,
}

impl ScheduleConfigSearcher {
    pub fn new(
        objective: Box<dyn ObjectiveFunc>,
        space: CandidateSpace,
        config: SearchConfig,
    ) -> Self {
        ScheduleConfigSearcher {
            objective,
            space,
            config,
        }
    }

    pub fn space(&self) -> &CandidateSpace {
        &self.space
    }

    pub fn config(&self) -> &SearchConfig {
        &self.config
    }

    /// Run the configured strategy.
    pub fn search(&self) -> TuneResult<SearchResult> {
        let t0 = Instant::now();
        let legal = self.space.legal_candidates();
        if legal.is_empty() {
            return Err(TuneError::NoViableConfig { evaluated: 0 });
        }
        log::info!(
            "searching {} legal candidates ({} in grid) with {}",
            legal.len(),
            self.space.grid_size(),
            self.config.strategy
        );

        let mut state = SearchState::new();
        match self.config.strategy {
            SearchStrategy::Grid => self.evaluate_all(&legal, &mut state),
            SearchStrategy::Random { samples } => {
                let mut order = legal;
                order.shuffle(&mut StdRng::seed_from_u64(self.config.seed));
                order.truncate(samples);
                self.evaluate_all(&order, &mut state);
            }
            SearchStrategy::Guided {
                coarse_stride,
                refine_radius,
                refine_iters,
            } => {
                let coarse = self.space.coarse_grid(coarse_stride);
                self.evaluate_all(&coarse, &mut state);

                if state.best.is_none() && !self.stopped(&state) {
                    log::warn!(
                        "no viable candidate on the coarse grid, falling back to the full grid"
                    );
                    let rest: Vec<TileConfig> =
                        legal.into_iter().filter(|c| !state.seen.contains(c)).collect();
                    self.evaluate_all(&rest, &mut state);
                }

                for iter in 0..refine_iters {
                    let Some(center) = state.best_config() else {
                        break;
                    };
                    if self.stopped(&state) {
                        break;
                    }
                    let fresh: Vec<TileConfig> = self
                        .space
                        .refine_around(&center, refine_radius)
                        .into_iter()
                        .filter(|c| !state.seen.contains(c))
                        .collect();
                    if fresh.is_empty() {
                        break;
                    }
                    log::debug!("refine #{iter} around {center}: {} new candidates", fresh.len());
                    self.evaluate_all(&fresh, &mut state);
                }
            }
        }

        self.finish(state, t0)
    }

    /// Score an explicit candidate list in order. Illegal candidates are
    /// dropped; duplicates are skipped when `cache_evaluations` is set.
    pub fn search_candidates(&self, candidates: &[TileConfig]) -> TuneResult<SearchResult> {
        let t0 = Instant::now();
        let legal: Vec<TileConfig> = candidates
            .iter()
            .copied()
            .filter(|c| self.space.is_legal(c))
            .collect();
        if legal.is_empty() {
            return Err(TuneError::NoViableConfig { evaluated: 0 });
        }
        let mut state = SearchState::new();
        self.evaluate_all(&legal, &mut state);
        self.finish(state, t0)
    }

    fn stopped(&self, state: &SearchState) -> bool {
        state.early_stopped
            || self
                .config
                .max_evaluations
                .is_some_and(|max| state.results.len() >= max)
    }

    fn evaluate_all(&self, candidates: &[TileConfig], state: &mut SearchState) {
        let mut pending: Vec<TileConfig> = if self.config.cache_evaluations {
            let mut batch_seen = HashSet::new();
            candidates
                .iter()
                .copied()
                .filter(|c| !state.seen.contains(c) && batch_seen.insert(*c))
                .collect()
        } else {
            candidates.to_vec()
        };

        let batch_size = self.config.batch_size.max(1);
        while !pending.is_empty() && !self.stopped(state) {
            let remaining = self
                .config
                .max_evaluations
                .map_or(usize::MAX, |max| max - state.results.len());
            let take = batch_size.min(remaining).min(pending.len());
            let batch: Vec<TileConfig> = pending.drain(..take).collect();

            if self.config.parallel {
                let evals: Vec<Evaluation> =
                    batch.par_iter().map(|c| self.objective.evaluate(c)).collect();
                for (cfg, eval) in batch.into_iter().zip(evals) {
                    self.record(cfg, eval, state);
                    if state.early_stopped {
                        break;
                    }
                }
            } else {
                // Record as we go so an early stop skips the rest of the batch.
                for cfg in batch {
                    let eval = self.objective.evaluate(&cfg);
                    self.record(cfg, eval, state);
                    if state.early_stopped {
                        break;
                    }
                }
            }
        }
    }

    fn record(&self, cfg: TileConfig, eval: Evaluation, state: &mut SearchState) {
        log::debug!(
            "{cfg}: score={:.4} ok={} failed={}",
            eval.score,
            eval.succeeded,
            eval.failed
        );
        state.seen.insert(cfg);
        state.results.push((cfg, eval));
        let idx = state.results.len() - 1;

        if !eval.is_viable() {
            return;
        }
        let improves = match state.best {
            Some(b) => eval.score < state.results[b].1.score,
            None => true,
        };
        if improves {
            state.best = Some(idx);
        }
        if let Some(threshold) = self.config.early_stop_score {
            if eval.score <= threshold {
                log::info!("early stop: {cfg} scored {:.4} <= {threshold}", eval.score);
                state.early_stopped = true;
            }
        }
    }

    fn finish(&self, state: SearchState, t0: Instant) -> TuneResult<SearchResult> {
        let evaluations = state.results.len();
        let Some(best) = state.best else {
            return Err(TuneError::NoViableConfig { evaluated: evaluations });
        };
        let (best_config, best_evaluation) = state.results[best];
        let non_viable = state.results.iter().filter(|(_, e)| !e.is_viable()).count();

        let mut all_results = state.results;
        // Stable sort: ties stay in evaluation order.
        all_results.sort_by(|a, b| a.1.score.total_cmp(&b.1.score));

        let result = SearchResult {
            best_config,
            best_score: best_evaluation.score,
            best_evaluation,
            evaluations,
            non_viable,
            early_stopped: state.early_stopped,
            search_time_ns: t0.elapsed().as_nanos() as u64,
            all_results,
        };
        log::info!("{result}");
        Ok(result)
    }
}

/// Generate a tuning report as a formatted string.
pub fn format_report(result: &SearchResult, op_name: &str, bucket_desc: &str) -> String {
    let mut report = String::new();
    report.push_str(&format!(
        "=== Tile Tuning Report: {} ({}) ===\n",
        op_name, bucket_desc
    ));
    report.push_str(&format!(
        "Search: {} configs ({} non-viable) in {:.1}ms{}\n",
        result.evaluations,
        result.non_viable,
        result.search_time_ns as f64 / 1_000_000.0,
        if result.early_stopped { ", stopped early" } else { "" },
    ));
    report.push_str(&format!("Best: {}\n", result.best_config));
    report.push_str(&format!("Score: {:.4}\n", result.best_score));

    let top_n = result.all_results.len().min(5);
    if top_n > 1 {
        report.push_str("\nTop configurations:\n");
        for (i, (cfg, eval)) in result.all_results.iter().take(top_n).enumerate() {
            report.push_str(&format!(
                "  #{}: {} | score={:.4} | {:.2}x vs best\n",
                i + 1,
                cfg,
                eval.score,
                eval.score / result.best_score,
            ));
        }
    }

    if let Some((_, worst)) = result
        .all_results
        .iter()
        .rev()
        .find(|(_, e)| e.is_viable())
    {
        report.push_str(&format!(
            "\nParameter sensitivity: worst/best = {:.1}x\n",
            worst.score / result.best_score
        ));
    }

    report
}
