//! Periodic check for overdue supplier credits

use std::sync::Arc;
use std::time::Duration;

use chrono::NaiveDate;
use log::{debug, info};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::{interval_at, Instant, MissedTickBehavior};

use crate::credits::Credits;

/// Reported when at least one pending credit is overdue.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct OverdueNotice {
    pub count: usize,
}

pub type Clock = Arc<dyn Fn() -> NaiveDate + Send + Sync>;

/// Background task that counts overdue credits on a fixed schedule and
/// sends an [`OverdueNotice`] whenever the count is non-zero.
pub struct OverdueMonitor {
    handle: Option<JoinHandle<()>>,
}

impl OverdueMonitor {
    /// Start checking against the local calendar date.
    pub fn start(
        credits: Arc<Credits>,
        first_check: Duration,
        interval: Duration,
    ) -> (Self, mpsc::Receiver<OverdueNotice>) {
        let clock: Clock = Arc::new(|| chrono::Local::now().date_naive());
        Self::start_with_clock(credits, first_check, interval, clock)
    }

    pub fn start_with_clock(
        credits: Arc<Credits>,
        first_check: Duration,
        interval: Duration,
        clock: Clock,
    ) -> (Self, mpsc::Receiver<OverdueNotice>) {
        let (tx, rx) = mpsc::channel(8);
        let handle = tokio::spawn(async move {
            let mut ticks = interval_at(Instant::now() + first_check, interval);
            ticks.set_missed_tick_behavior(MissedTickBehavior::Delay);
            loop {
                ticks.tick().await;
                let count = credits.overdue(clock()).await.len();
                debug!("Overdue credit check: {}", count);
                if count == 0 {
                    continue;
                }
                info!("{} credit(s) overdue", count);
                if tx.send(OverdueNotice { count }).await.is_err() {
                    debug!("Overdue notice receiver dropped, stopping monitor");
                    break;
                }
            }
        });
        (
            Self {
                handle: Some(handle),
            },
            rx,
        )
    }

    pub fn stop(&mut self) {
        if let Some(handle) = self.handle.take() {
            handle.abort();
        }
    }
}

impl Drop for OverdueMonitor {
    fn drop(&mut self) {
        self.stop();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::credits::{CreditDraft, CreditLineDraft};
    use crate::store::{MemoryLocalStore, Storage};

    fn date(s: &str) -> NaiveDate {
        NaiveDate::parse_from_str(s, "%Y-%m-%d").unwrap()
    }

    async fn credits_registered_on(on: &str) -> Arc<Credits> {
        let credits = Arc::new(Credits::new(
            Arc::new(Storage::new(None, Arc::new(MemoryLocalStore::new()))),
            7,
        ));
        credits
            .register_credit(
                &CreditDraft {
                    provider: "Sigma".to_string(),
                    date: date(on),
                    notes: String::new(),
                    lines: vec![CreditLineDraft {
                        qty: "2".to_string(),
                        desc: "Queso".to_string(),
                        upc: "750100000001".to_string(),
                        photo: None,
                    }],
                },
                1_700_000_000_000,
            )
            .await
            .unwrap();
        credits
    }

    fn fixed(on: &str) -> Clock {
        let today = date(on);
        Arc::new(move || today)
    }

    #[tokio::test(start_paused = true)]
    async fn test_first_check_after_delay_then_interval() {
        let credits = credits_registered_on("2024-03-01").await;
        let (_monitor, mut notices) = OverdueMonitor::start_with_clock(
            credits,
            Duration::from_secs(3),
            Duration::from_secs(300),
            fixed("2024-03-20"),
        );

        let start = Instant::now();
        assert_eq!(notices.recv().await, Some(OverdueNotice { count: 1 }));
        assert!(start.elapsed() >= Duration::from_secs(3));
        assert!(start.elapsed() < Duration::from_secs(300));
        assert_eq!(notices.recv().await, Some(OverdueNotice { count: 1 }));
        assert!(start.elapsed() >= Duration::from_secs(303));
    }

    #[tokio::test(start_paused = true)]
    async fn test_nothing_sent_when_nothing_overdue() {
        let credits = credits_registered_on("2024-03-18").await;
        let (_monitor, mut notices) = OverdueMonitor::start_with_clock(
            credits,
            Duration::from_secs(3),
            Duration::from_secs(300),
            fixed("2024-03-20"),
        );
        let waited = tokio::time::timeout(Duration::from_secs(1000), notices.recv()).await;
        assert!(waited.is_err());
    }

    #[tokio::test(start_paused = true)]
    async fn test_stop_closes_channel() {
        let credits = credits_registered_on("2024-03-01").await;
        let (mut monitor, mut notices) = OverdueMonitor::start_with_clock(
            credits,
            Duration::from_secs(3),
            Duration::from_secs(300),
            fixed("2024-03-20"),
        );
        monitor.stop();
        assert_eq!(notices.recv().await, None);
    }
}
