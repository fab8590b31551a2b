//! Fixed-rate scheduling shared by the pipeline stages and the cleanup worker.

use std::sync::atomic::{AtomicBool, Ordering};
use std::thread;
use std::time::{Duration, Instant};

/// Granularity at which sleeping loops re-check their running flag.
const SHUTDOWN_POLL: Duration = Duration::from_millis(20);

/// Run `body` at a fixed cadence until `running` clears.
///
/// Self-correcting fixed-rate scheduling: after each iteration the loop
/// sleeps for whatever remains of `period`. An iteration that overruns is not
/// compensated by shortening the next sleep; it only lowers the effective
/// rate.
pub(crate) fn run_at_interval(running: &AtomicBool, period: Duration, mut body: impl FnMut()) {
    while running.load(Ordering::Relaxed) {
        let started = Instant::now();
        body();
        sleep_remainder(running, started, period);
    }
}

/// Sleep out the rest of `period` in short slices so shutdown stays prompt.
fn sleep_remainder(running: &AtomicBool, started: Instant, period: Duration) {
    while running.load(Ordering::Relaxed) {
        let elapsed = started.elapsed();
        if elapsed >= period {
            return;
        }
        thread::sleep((period - elapsed).min(SHUTDOWN_POLL));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::sync::atomic::AtomicUsize;

    #[test]
    fn holds_the_configured_rate() {
        let running = AtomicBool::new(true);
        let ticks = AtomicUsize::new(0);
        let started = Instant::now();

        run_at_interval(&running, Duration::from_millis(20), || {
            if ticks.fetch_add(1, Ordering::Relaxed) + 1 == 4 {
                running.store(false, Ordering::Relaxed);
            }
        });

        assert_eq!(ticks.load(Ordering::Relaxed), 4);
        // Three full sleeps separate the four iterations; the final iteration
        // skips its sleep because the flag is already down.
        assert!(started.elapsed() >= Duration::from_millis(60));
    }

    #[test]
    fn stops_promptly_even_with_a_long_period() {
        let running = Arc::new(AtomicBool::new(true));
        let stopper = running.clone();

        let handle = std::thread::spawn(move || {
            let started = Instant::now();
            run_at_interval(&stopper, Duration::from_secs(60), || {
                stopper.store(false, Ordering::Relaxed);
            });
            started.elapsed()
        });

        let elapsed = handle.join().unwrap();
        assert!(elapsed < Duration::from_secs(1));
    }

    #[test]
    fn does_not_run_when_already_stopped() {
        let running = AtomicBool::new(false);
        let ticks = AtomicUsize::new(0);
        run_at_interval(&running, Duration::from_millis(1), || {
            ticks.fetch_add(1, Ordering::Relaxed);
        });
        assert_eq!(ticks.load(Ordering::Relaxed), 0);
    }
}
