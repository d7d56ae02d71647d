use std::str::FromStr;

use argh::FromArgs;

/// Which store backs the node.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum StoreBackend {
    /// In-memory; state dies with the process. Dev and demos only.
    Mem,
    /// Postgres via `DATABASE_URL`.
    Postgres,
}

impl FromStr for StoreBackend {
    type Err = String;
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "mem" => Ok(Self::Mem),
            "postgres" => Ok(Self::Postgres),
            other => Err(format!(
                "Unknown store backend '{other}' (expected mem|postgres)"
            )),
        }
    }
}

/// Runs the financial core: ledger, on-chain engine, funding workers,
/// treasury scheduler, and periodic reconciliation.
#[derive(Debug, FromArgs)]
pub struct Args {
    /// store backend: mem|postgres (default: mem)
    #[argh(option, default = "StoreBackend::Mem")]
    pub store: StoreBackend,

    /// settlement loop cadence in seconds (default: 60)
    #[argh(option, default = "60")]
    pub scheduler_interval_secs: u64,

    /// monitor loop cadence in seconds (default: 30)
    #[argh(option, default = "30")]
    pub monitor_interval_secs: u64,

    /// funding-event worker count (default: 4)
    #[argh(option, default = "4")]
    pub funding_workers: usize,

    /// buffer observation cadence in seconds (default: 300)
    #[argh(option, default = "300")]
    pub buffer_check_interval_secs: u64,

    /// reconciliation cadence in seconds (default: 3600)
    #[argh(option, default = "3600")]
    pub recon_interval_secs: u64,

    /// disable automatic below-target buffer replenishment; emergencies
    /// still convert
    #[argh(switch)]
    pub no_auto_rebalance: bool,
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn store_backend_parses() {
        assert_eq!("mem".parse::<StoreBackend>(), Ok(StoreBackend::Mem));
        assert_eq!(
            "postgres".parse::<StoreBackend>(),
            Ok(StoreBackend::Postgres)
        );
        assert!("sqlite".parse::<StoreBackend>().is_err());
    }
}
