use std::{
    sync::{
        atomic::{AtomicBool, Ordering},
        Arc,
    },
    time::Duration,
};

use log::{info, warn};
use tokio::{
    net::TcpStream,
    time::{sleep, timeout},
};

// Public DNS answers TCP on port 53 from anywhere; good enough as a
// reachable-host check without raw-socket privileges.
const PROBE_ADDR: &str = "8.8.8.8:53";
const PROBE_TIMEOUT: Duration = Duration::from_secs(2);

/// Periodic reachability check against a fixed external host. The cached
/// answer may be stale by up to one period; callers tolerate that.
pub struct Probe {
    period: Duration,
    up: Arc<AtomicBool>,
    started: AtomicBool,
}

impl Probe {
    pub fn new(period: Duration) -> Self {
        Probe {
            period,
            up: Arc::new(AtomicBool::new(true)),
            started: AtomicBool::new(false),
        }
    }

    /// Cached result of the last check. The first read starts the prober;
    /// with a zero period the network is treated as always up.
    pub fn is_up(&self) -> bool {
        if self.period.is_zero() {
            return self.up.load(Ordering::SeqCst);
        }

        if !self.started.swap(true, Ordering::SeqCst) {
            let up = self.up.clone();
            let period = self.period;
            tokio::spawn(run(up, period));
        }

        self.up.load(Ordering::SeqCst)
    }

    #[cfg(test)]
    pub fn fixed(up: bool) -> Self {
        Probe {
            period: Duration::ZERO,
            up: Arc::new(AtomicBool::new(up)),
            started: AtomicBool::new(false),
        }
    }

    #[cfg(test)]
    pub fn set_up(&self, up: bool) {
        self.up.store(up, Ordering::SeqCst);
    }
}

async fn run(up: Arc<AtomicBool>, period: Duration) {
    loop {
        let reachable = check().await;
        let was_reachable = up.swap(reachable, Ordering::SeqCst);
        if was_reachable && !reachable {
            warn!("network is unreachable");
        } else if !was_reachable && reachable {
            info!("network is reachable again");
        }

        sleep(period).await;
    }
}

async fn check() -> bool {
    matches!(
        timeout(PROBE_TIMEOUT, TcpStream::connect(PROBE_ADDR)).await,
        Ok(Ok(_))
    )
}
