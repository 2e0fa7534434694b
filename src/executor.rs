// src/executor.rs

//! Parallel round execution
//!
//! Replays a build plan round by round. Rounds are separated by a hard
//! barrier: no node of round N starts until every node of round N-1
//! reached a terminal state, which upholds the scheduler's ordering
//! invariant at runtime. Within a round, nodes run on a bounded worker
//! pool in unspecified order.
//!
//! Per-node state machine: `pending -> running -> {succeeded, failed,
//! skipped}`. A node is skipped when any of its dependencies failed or
//! was skipped; unrelated nodes continue. Terminal states are persisted
//! after every round so an interrupted run resumes without rebuilding
//! packages whose artifacts are still valid.

use crate::build;
use crate::context::WorkContext;
use crate::error::{Error, Result};
use crate::graph::schedule::{BuildPlan, PlanEntry};
use crate::version::PackageVersion;
use indicatif::{ProgressBar, ProgressStyle};
use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use tracing::{info, warn};

/// Execution state of one plan entry
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "state", rename_all = "kebab-case")]
pub enum NodeState {
    Pending,
    Running,
    Succeeded {
        /// The artifact was already valid; nothing was rebuilt
        cached: bool,
    },
    Failed {
        error: String,
    },
    Skipped {
        /// The failed or skipped dependency that blocked this node
        blocked_on: String,
    },
}

impl NodeState {
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            NodeState::Succeeded { .. } | NodeState::Failed { .. } | NodeState::Skipped { .. }
        )
    }

    fn blocks_dependents(&self) -> bool {
        matches!(self, NodeState::Failed { .. } | NodeState::Skipped { .. })
    }
}

/// End-of-run summary separating succeeded, failed and skipped packages
#[derive(Debug, Default)]
pub struct ExecutionReport {
    pub succeeded: Vec<String>,
    pub failed: Vec<(String, String)>,
    pub skipped: Vec<(String, String)>,
}

impl ExecutionReport {
    pub fn all_succeeded(&self) -> bool {
        self.failed.is_empty() && self.skipped.is_empty()
    }
}

impl fmt::Display for ExecutionReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(
            f,
            "{} succeeded, {} failed, {} skipped",
            self.succeeded.len(),
            self.failed.len(),
            self.skipped.len()
        )?;
        for (key, error) in &self.failed {
            writeln!(f, "FAILED  {key}: {error}")?;
        }
        for (key, blocked_on) in &self.skipped {
            writeln!(f, "SKIPPED {key}: blocked on {blocked_on}")?;
        }
        Ok(())
    }
}

/// Runs all packages of a round concurrently under a bounded worker
/// pool, with a barrier between rounds
pub struct ParallelExecutor<'a> {
    ctx: &'a WorkContext,
    plan: &'a BuildPlan,
}

impl<'a> ParallelExecutor<'a> {
    pub fn new(ctx: &'a WorkContext, plan: &'a BuildPlan) -> Self {
        Self { ctx, plan }
    }

    /// Execute the full plan and return the terminal state summary
    pub fn execute(&self) -> Result<ExecutionReport> {
        let mut states = self.load_progress()?;
        let pool = rayon::ThreadPoolBuilder::new()
            .num_threads(self.ctx.max_workers)
            .build()
            .map_err(|e| Error::Other(format!("cannot create worker pool: {e}")))?;

        for (round_index, round) in self.plan.rounds.iter().enumerate() {
            let round_number = round_index + 1;
            let mut to_build: Vec<&PlanEntry> = Vec::new();

            for entry in round {
                let key = entry.key();
                if matches!(states.get(&key), Some(NodeState::Succeeded { .. })) {
                    info!("{}: already built in an earlier run", key);
                    continue;
                }
                if let Some(blocker) = entry
                    .depends_on
                    .iter()
                    .find(|dep| states.get(*dep).is_some_and(NodeState::blocks_dependents))
                {
                    warn!("{}: skipped, dependency {} did not build", key, blocker);
                    states.insert(
                        key,
                        NodeState::Skipped {
                            blocked_on: blocker.clone(),
                        },
                    );
                    continue;
                }
                states.insert(key, NodeState::Pending);
                to_build.push(entry);
            }

            if to_build.is_empty() {
                self.persist(&states)?;
                continue;
            }

            info!(
                "round {}/{}: building {} packages with {} workers",
                round_number,
                self.plan.rounds.len(),
                to_build.len(),
                self.ctx.max_workers
            );
            for entry in &to_build {
                states.insert(entry.key(), NodeState::Running);
            }
            let progress = ProgressBar::new(to_build.len() as u64);
            progress.set_style(
                ProgressStyle::default_bar()
                    .template("round {msg} [{bar:30.cyan/blue}] {pos}/{len}")
                    .expect("valid progress template")
                    .progress_chars("#>-"),
            );
            progress.set_message(round_number.to_string());

            // The collect below is the round barrier: every node reaches
            // a terminal state before the next round is considered.
            let results: Vec<(String, NodeState)> = pool.install(|| {
                to_build
                    .par_iter()
                    .map(|entry| {
                        let key = entry.key();
                        let state = match build::build_package(self.ctx, entry) {
                            Ok(outcome) => NodeState::Succeeded {
                                cached: outcome.cached,
                            },
                            Err(err) => {
                                warn!("{}: build failed: {}", key, err);
                                NodeState::Failed {
                                    error: err.to_string(),
                                }
                            }
                        };
                        progress.inc(1);
                        (key, state)
                    })
                    .collect()
            });
            progress.finish_and_clear();

            for (key, state) in results {
                states.insert(key, state);
            }
            self.persist(&states)?;
        }

        Ok(self.report(&states))
    }

    /// Load persisted progress, keeping only successes whose artifact is
    /// still valid in the repository
    fn load_progress(&self) -> Result<BTreeMap<String, NodeState>> {
        let path = self.ctx.progress_file();
        if !path.exists() {
            return Ok(BTreeMap::new());
        }
        let content = std::fs::read(&path)?;
        let persisted: BTreeMap<String, NodeState> = match serde_json::from_slice(&content) {
            Ok(states) => states,
            Err(err) => {
                warn!("ignoring unreadable progress file: {}", err);
                return Ok(BTreeMap::new());
            }
        };

        let mut states = BTreeMap::new();
        for entry in self.plan.entries() {
            let key = entry.key();
            if let Some(state @ NodeState::Succeeded { .. }) = persisted.get(&key) {
                if self.artifact_still_valid(entry) {
                    states.insert(key, state.clone());
                } else {
                    info!("{}: previous artifact gone, will rebuild", key);
                }
            }
        }
        if !states.is_empty() {
            info!("resuming: {} packages already built", states.len());
        }
        Ok(states)
    }

    fn artifact_still_valid(&self, entry: &PlanEntry) -> bool {
        let Ok(version) = PackageVersion::parse(&entry.version) else {
            return false;
        };
        let tagged = version.with_local_label(self.ctx.local_version_label.as_deref());
        if entry.pre_built {
            // prebuilt wheels keep their upstream filename
            return self
                .ctx
                .repository
                .listing(&entry.name)
                .iter()
                .any(|f| f.ends_with(".whl"));
        }
        self.ctx
            .repository
            .find_wheel(&entry.name, &tagged, &entry.build_tag)
            .is_some()
    }

    /// Persist terminal states, write-then-rename
    fn persist(&self, states: &BTreeMap<String, NodeState>) -> Result<()> {
        let terminal: BTreeMap<&String, &NodeState> = states
            .iter()
            .filter(|(_, state)| state.is_terminal())
            .collect();
        let path = self.ctx.progress_file();
        let tmp = path.with_extension("json.tmp");
        std::fs::write(&tmp, serde_json::to_vec_pretty(&terminal)?)?;
        std::fs::rename(&tmp, &path)?;
        Ok(())
    }

    fn report(&self, states: &BTreeMap<String, NodeState>) -> ExecutionReport {
        let mut report = ExecutionReport::default();
        for entry in self.plan.entries() {
            let key = entry.key();
            match states.get(&key) {
                Some(NodeState::Succeeded { .. }) => report.succeeded.push(key),
                Some(NodeState::Failed { error }) => report.failed.push((key, error.clone())),
                Some(NodeState::Skipped { blocked_on }) => {
                    report.skipped.push((key, blocked_on.clone()))
                }
                other => {
                    // every plan entry must have reached a terminal state
                    report.failed.push((
                        key,
                        format!("internal: no terminal state recorded ({other:?})"),
                    ));
                }
            }
        }
        report
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_state_machine_classification() {
        assert!(!NodeState::Pending.is_terminal());
        assert!(!NodeState::Running.is_terminal());
        assert!(NodeState::Succeeded { cached: false }.is_terminal());
        assert!(NodeState::Failed {
            error: "boom".to_string()
        }
        .is_terminal());
        assert!(NodeState::Skipped {
            blocked_on: "dep==1.0".to_string()
        }
        .blocks_dependents());
        assert!(!NodeState::Succeeded { cached: true }.blocks_dependents());
    }

    #[test]
    fn test_report_rendering() {
        let report = ExecutionReport {
            succeeded: vec!["a==1.0".to_string()],
            failed: vec![("b==1.0".to_string(), "boom".to_string())],
            skipped: vec![("c==1.0".to_string(), "b==1.0".to_string())],
        };
        assert!(!report.all_succeeded());
        let rendered = report.to_string();
        assert!(rendered.contains("1 succeeded, 1 failed, 1 skipped"));
        assert!(rendered.contains("FAILED  b==1.0"));
        assert!(rendered.contains("SKIPPED c==1.0: blocked on b==1.0"));
    }

    #[test]
    fn test_node_state_serde_round_trip() {
        let state = NodeState::Skipped {
            blocked_on: "dep==2.0".to_string(),
        };
        let json = serde_json::to_string(&state).unwrap();
        assert!(json.contains("\"state\":\"skipped\""));
        let back: NodeState = serde_json::from_str(&json).unwrap();
        assert_eq!(back, state);
    }
}
