//! Completion Monitor
//!
//! Decides whether the cluster has absorbed the data movement triggered by
//! the last round of weight updates. Waiting is a plain sleep/poll loop with
//! no upper bound: an operator is expected to watch long migrations.

use crushstep_core::Result;
use std::time::{Duration, Instant};
use tracing::{debug, info};

use crate::cluster::{HealthSource, PgStateCount};
use crate::console::Console;

/// The only placement-group state that counts as settled
pub const HEALTHY_PG_STATE: &str = "active+clean";

/// True when no placement group is reported in any state but the healthy one
pub fn is_settled(states: &[PgStateCount]) -> bool {
    states
        .iter()
        .all(|s| s.name == HEALTHY_PG_STATE || s.num == 0)
}

/// Monitor configuration
#[derive(Debug, Clone)]
pub struct MonitorConfig {
    /// Sleep before the first poll after updates were issued
    pub grace_period: Duration,
    /// Sleep between polls
    pub poll_interval: Duration,
}

impl Default for MonitorConfig {
    fn default() -> Self {
        Self {
            grace_period: Duration::from_secs(5),
            poll_interval: Duration::from_secs(5),
        }
    }
}

/// How a wait ended
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WaitOutcome {
    /// Nothing was issued and the cluster was already settled
    Immediate,
    /// The monitor slept until the cluster settled
    Settled { polls: u32, waited: Duration },
}

impl WaitOutcome {
    pub fn is_immediate(&self) -> bool {
        matches!(self, WaitOutcome::Immediate)
    }
}

/// Polls placement-group health until rebalance completes
pub struct CompletionMonitor<'a, H: ?Sized> {
    health: &'a H,
    config: MonitorConfig,
    console: Console,
}

impl<'a, H: HealthSource + ?Sized> CompletionMonitor<'a, H> {
    pub fn new(health: &'a H, config: MonitorConfig, console: Console) -> Self {
        Self {
            health,
            config,
            console,
        }
    }

    /// Query health once
    pub async fn is_rebalance_complete(&self) -> Result<bool> {
        let states = self.health.pg_states().await?;
        let settled = is_settled(&states);
        debug!(states = states.len(), settled, "Polled placement group states");
        Ok(settled)
    }

    /// Block until the cluster reports every placement group healthy.
    ///
    /// Returns immediately when no updates were issued and the cluster is
    /// already settled. After updates, sleeps for the grace period first:
    /// movement reporting lags behind the command that triggers it.
    pub async fn wait_until_settled(&self, had_recent_updates: bool) -> Result<WaitOutcome> {
        if !had_recent_updates && self.is_rebalance_complete().await? {
            return Ok(WaitOutcome::Immediate);
        }

        let start = Instant::now();
        self.console.begin("Waiting for cluster to complete rebalance ");

        if had_recent_updates {
            tokio::time::sleep(self.config.grace_period).await;
        }

        let mut polls = 0u32;
        loop {
            polls += 1;
            if self.is_rebalance_complete().await? {
                break;
            }
            self.console.tick();
            tokio::time::sleep(self.config.poll_interval).await;
        }

        self.console.end("done");

        let waited = start.elapsed();
        info!(polls, waited = ?waited, "Cluster settled");

        Ok(WaitOutcome::Settled { polls, waited })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use std::collections::VecDeque;
    use std::sync::Mutex;

    /// Replays scripted health reports, then stays settled
    struct ScriptedHealth {
        reports: Mutex<VecDeque<Vec<PgStateCount>>>,
        polls: Mutex<u32>,
    }

    impl ScriptedHealth {
        fn new(reports: Vec<Vec<PgStateCount>>) -> Self {
            Self {
                reports: Mutex::new(reports.into()),
                polls: Mutex::new(0),
            }
        }

        fn polls(&self) -> u32 {
            *self.polls.lock().unwrap()
        }
    }

    #[async_trait]
    impl HealthSource for ScriptedHealth {
        async fn pg_states(&self) -> Result<Vec<PgStateCount>> {
            *self.polls.lock().unwrap() += 1;
            Ok(self
                .reports
                .lock()
                .unwrap()
                .pop_front()
                .unwrap_or_else(clean))
        }
    }

    fn state(name: &str, num: u64) -> PgStateCount {
        PgStateCount {
            name: name.to_string(),
            num,
        }
    }

    fn clean() -> Vec<PgStateCount> {
        vec![state(HEALTHY_PG_STATE, 128)]
    }

    fn busy() -> Vec<PgStateCount> {
        vec![
            state(HEALTHY_PG_STATE, 120),
            state("active+remapped+backfilling", 8),
        ]
    }

    fn fast() -> MonitorConfig {
        MonitorConfig {
            grace_period: Duration::ZERO,
            poll_interval: Duration::ZERO,
        }
    }

    #[test]
    fn test_is_settled() {
        assert!(is_settled(&clean()));
        assert!(is_settled(&[]));
        assert!(!is_settled(&busy()));
        assert!(is_settled(&[
            state(HEALTHY_PG_STATE, 128),
            state("active+remapped+backfilling", 0)
        ]));
        assert!(!is_settled(&[state("active+clean+scrubbing", 1)]));
    }

    #[tokio::test]
    async fn test_immediate_when_idle_and_settled() {
        let health = ScriptedHealth::new(vec![]);
        let monitor = CompletionMonitor::new(&health, fast(), Console::quiet());

        let outcome = monitor.wait_until_settled(false).await.unwrap();
        assert_eq!(outcome, WaitOutcome::Immediate);
        assert_eq!(health.polls(), 1);
    }

    #[tokio::test]
    async fn test_updates_always_wait() {
        let health = ScriptedHealth::new(vec![]);
        let monitor = CompletionMonitor::new(&health, fast(), Console::quiet());

        let outcome = monitor.wait_until_settled(true).await.unwrap();
        assert!(matches!(outcome, WaitOutcome::Settled { polls: 1, .. }));
        assert_eq!(health.polls(), 1);
    }

    #[tokio::test]
    async fn test_polls_until_settled() {
        let health = ScriptedHealth::new(vec![busy(), busy(), busy()]);
        let monitor = CompletionMonitor::new(&health, fast(), Console::quiet());

        let outcome = monitor.wait_until_settled(true).await.unwrap();
        assert!(matches!(outcome, WaitOutcome::Settled { polls: 4, .. }));
    }

    #[tokio::test]
    async fn test_idle_but_busy_cluster_waits() {
        let health = ScriptedHealth::new(vec![busy(), busy()]);
        let monitor = CompletionMonitor::new(&health, fast(), Console::quiet());

        let outcome = monitor.wait_until_settled(false).await.unwrap();
        assert!(!outcome.is_immediate());
        // one probe, one busy poll, one clean poll
        assert_eq!(health.polls(), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_grace_period_precedes_first_poll() {
        let health = ScriptedHealth::new(vec![]);
        let config = MonitorConfig {
            grace_period: Duration::from_secs(5),
            poll_interval: Duration::from_secs(5),
        };
        let monitor = CompletionMonitor::new(&health, config, Console::quiet());

        let before = tokio::time::Instant::now();
        monitor.wait_until_settled(true).await.unwrap();
        assert!(before.elapsed() >= Duration::from_secs(5));
    }
}
