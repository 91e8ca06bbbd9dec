//! Cancellable fixed-period loop.
//!
//! Every periodic job in the crate (synchronizer pass, task pump, health check, transaction pump,
//! recurring task seeding) runs on a `Ticker`. The tick body is awaited inline, so a job can never
//! overlap with itself; cancelling the token stops scheduling new ticks but lets an in-flight tick
//! finish on its own.

use std::future::Future;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior, interval_at};
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

/// Shortest period a ticker will run at; tokio rejects a zero interval
pub const MIN_PERIOD: Duration = Duration::from_millis(1);

pub struct Ticker {
	token: CancellationToken,
	handle: JoinHandle<()>,
}

impl Ticker {
	/// Spawn a loop calling `job` every `period`.
	///
	/// When `immediate` is set the first run happens right away, otherwise after one full period.
	/// The loop also stops when `parent` is cancelled. A period below [`MIN_PERIOD`] is raised to
	/// it.
	pub fn spawn<F, Fut>(
		name: &'static str,
		period: Duration,
		immediate: bool,
		parent: &CancellationToken,
		mut job: F,
	) -> Self
	where
		F: FnMut() -> Fut + Send + 'static,
		Fut: Future<Output = ()> + Send + 'static,
	{
		let period = if period < MIN_PERIOD {
			warn!("Ticker {} period {:?} is too short, using {:?}", name, period, MIN_PERIOD);
			MIN_PERIOD
		} else {
			period
		};
		let token = parent.child_token();
		let loop_token = token.clone();
		let start = if immediate {
			Instant::now()
		} else {
			Instant::now() + period
		};

		let handle = tokio::spawn(async move {
			let mut ticks = interval_at(start, period);
			ticks.set_missed_tick_behavior(MissedTickBehavior::Skip);
			loop {
				tokio::select! {
					_ = loop_token.cancelled() => break,
					_ = ticks.tick() => job().await,
				}
			}
			debug!("Ticker {} stopped", name);
		});

		Self { token, handle }
	}

	pub fn is_active(&self) -> bool {
		!self.token.is_cancelled() && !self.handle.is_finished()
	}

	/// Stop scheduling ticks. Safe to call more than once.
	pub fn cancel(&self) {
		self.token.cancel();
	}
}

impl Drop for Ticker {
	fn drop(&mut self) {
		self.token.cancel();
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use std::sync::Arc;
	use std::sync::atomic::{AtomicUsize, Ordering};

	#[tokio::test(start_paused = true)]
	async fn runs_until_cancelled() {
		let runs = Arc::new(AtomicUsize::new(0));
		let counter = runs.clone();
		let parent = CancellationToken::new();
		let ticker = Ticker::spawn("test", Duration::from_secs(1), true, &parent, move || {
			let counter = counter.clone();
			async move {
				counter.fetch_add(1, Ordering::SeqCst);
			}
		});

		tokio::time::sleep(Duration::from_millis(3500)).await;
		assert_eq!(runs.load(Ordering::SeqCst), 4);

		ticker.cancel();
		tokio::time::sleep(Duration::from_secs(5)).await;
		assert_eq!(runs.load(Ordering::SeqCst), 4);
		assert!(!ticker.is_active());
	}

	#[tokio::test(start_paused = true)]
	async fn delayed_start_and_parent_cancellation() {
		let runs = Arc::new(AtomicUsize::new(0));
		let counter = runs.clone();
		let parent = CancellationToken::new();
		let _ticker = Ticker::spawn("test", Duration::from_secs(10), false, &parent, move || {
			let counter = counter.clone();
			async move {
				counter.fetch_add(1, Ordering::SeqCst);
			}
		});

		tokio::time::sleep(Duration::from_secs(5)).await;
		assert_eq!(runs.load(Ordering::SeqCst), 0);
		tokio::time::sleep(Duration::from_secs(6)).await;
		assert_eq!(runs.load(Ordering::SeqCst), 1);

		parent.cancel();
		tokio::time::sleep(Duration::from_secs(30)).await;
		assert_eq!(runs.load(Ordering::SeqCst), 1);
	}

	#[tokio::test(start_paused = true)]
	async fn zero_period_still_ticks() {
		let runs = Arc::new(AtomicUsize::new(0));
		let counter = runs.clone();
		let parent = CancellationToken::new();
		let ticker = Ticker::spawn("zero", Duration::ZERO, true, &parent, move || {
			let counter = counter.clone();
			async move {
				counter.fetch_add(1, Ordering::SeqCst);
			}
		});

		tokio::time::sleep(Duration::from_millis(10)).await;
		assert!(ticker.is_active());
		assert!(runs.load(Ordering::SeqCst) >= 2);
		ticker.cancel();
	}
}
