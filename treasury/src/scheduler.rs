use std::time::Duration;

use common::{notify, shutdown::ShutdownSignal, task::Task};
use ledger::LedgerStore;
use tokio::time::{interval, timeout};
use tracing::{error, info, instrument, warn};

use crate::{engine::TreasuryEngine, store::TreasuryStore};

/// Runs the treasury engine on its two timers.
///
/// Two independent tasks: the settlement loop (buffer checks, planning,
/// execution) and the monitor loop (provider status polling). Both read
/// cleanly as `loop { select { shutdown | tick | trigger } }`; every cycle
/// body runs under its own deadline so a wedged provider call cannot freeze
/// the loop forever.
pub struct TreasuryScheduler {
    settlement_task: Task<()>,
    monitor_task: Task<()>,
    trigger_tx: notify::Sender,
    shutdown: ShutdownSignal,
    stop_timeout: Duration,
}

impl TreasuryScheduler {
    /// Spawns both loops. The given shutdown signal stops them; `stop`
    /// also raises it.
    ///
    /// [`stop`]: TreasuryScheduler::stop
    pub fn start<L, T>(
        engine: TreasuryEngine<L, T>,
        shutdown: ShutdownSignal,
    ) -> Self
    where
        L: LedgerStore,
        T: TreasuryStore,
    {
        let config = engine.config().clone();
        let (trigger_tx, trigger_rx) = notify::channel();

        let settlement_task = Self::spawn_settlement_loop(
            engine.clone(),
            trigger_rx,
            shutdown.clone(),
        );
        let monitor_task =
            Self::spawn_monitor_loop(engine, shutdown.clone());

        Self {
            settlement_task,
            monitor_task,
            trigger_tx,
            shutdown,
            stop_timeout: config.stop_timeout,
        }
    }

    fn spawn_settlement_loop<L, T>(
        engine: TreasuryEngine<L, T>,
        mut trigger_rx: notify::Receiver,
        shutdown: ShutdownSignal,
    ) -> Task<()>
    where
        L: LedgerStore,
        T: TreasuryStore,
    {
        Task::spawn("treasury settlement", async move {
            let config = engine.config().clone();
            let mut cycle_timer = interval(config.scheduler_interval);

            loop {
                // A future that completes when either the timer ticks or an
                // immediate cycle is requested; the trigger doesn't disturb
                // the timer cadence.
                let cycle_due = async {
                    tokio::select! {
                        _ = cycle_timer.tick() => (),
                        () = trigger_rx.recv() => (),
                    }
                };

                tokio::select! {
                    () = cycle_due => {
                        let cycle = timeout(
                            config.settlement_cycle_timeout,
                            engine.run_settlement_cycle(),
                        )
                        .await;
                        match cycle {
                            Ok(Ok(_report)) => (),
                            Ok(Err(e)) =>
                                error!("Settlement cycle failed: {e:#}"),
                            Err(_elapsed) => error!(
                                "Settlement cycle exceeded {:?}",
                                config.settlement_cycle_timeout
                            ),
                        }
                    }
                    () = shutdown.wait() => {
                        info!("Settlement loop shutting down");
                        break;
                    }
                }
            }
        })
    }

    fn spawn_monitor_loop<L, T>(
        engine: TreasuryEngine<L, T>,
        shutdown: ShutdownSignal,
    ) -> Task<()>
    where
        L: LedgerStore,
        T: TreasuryStore,
    {
        Task::spawn("treasury monitor", async move {
            let config = engine.config().clone();
            let mut poll_timer = interval(config.health_check_interval);

            loop {
                tokio::select! {
                    _ = poll_timer.tick() => {
                        let pass = timeout(
                            config.monitor_cycle_timeout,
                            engine.run_monitor_pass(),
                        )
                        .await;
                        match pass {
                            Ok(Ok(_report)) => (),
                            Ok(Err(e)) =>
                                error!("Monitor pass failed: {e:#}"),
                            Err(_elapsed) => error!(
                                "Monitor pass exceeded {:?}",
                                config.monitor_cycle_timeout
                            ),
                        }
                    }
                    () = shutdown.wait() => {
                        info!("Monitor loop shutting down");
                        break;
                    }
                }
            }
        })
    }

    /// Runs a settlement cycle as soon as the loop is free, without
    /// disturbing the regular cadence. Multiple triggers coalesce.
    pub fn trigger_immediate_cycle(&self) {
        self.trigger_tx.send();
    }

    /// Signals shutdown and waits for both loops to drain, up to the
    /// configured stop timeout. After that the process may force-exit;
    /// in-flight store transactions finish under their own deadlines.
    #[instrument(skip_all, name = "(treasury-stop)")]
    pub async fn stop(self) {
        self.shutdown.signal();

        let drain = async {
            if let Err(e) = self.settlement_task.await {
                error!("Settlement loop join error: {e:#}");
            }
            if let Err(e) = self.monitor_task.await {
                error!("Monitor loop join error: {e:#}");
            }
        };
        if timeout(self.stop_timeout, drain).await.is_err() {
            warn!(
                "Treasury loops did not drain within {:?}",
                self.stop_timeout
            );
        }
    }
}
