use std::sync::atomic::{AtomicUsize, Ordering};
use std::thread;
use std::time::Duration;

use anyhow::anyhow;
use crossbeam::channel;

use super::*;
use crate::pool::Retry;

fn fast_retry_opts() -> Options {
    Options {
        backoff_initial: Duration::from_millis(1),
        backoff_max: Duration::from_millis(4),
        ..Options::default()
    }
}

#[test]
fn empty_input_returns_no_results() {
    let items: Vec<usize> = Vec::new();
    let results = process_all(&items, |_ctx, &n| Ok(n), &Options::default()).unwrap();
    assert!(results.is_empty());
}

#[test]
fn results_preserve_input_order() {
    let items: Vec<usize> = (0..25).collect();
    let opts = Options {
        workers: 7,
        ..Options::default()
    };
    let results = process_all(
        &items,
        |_ctx, &n| {
            // Stagger completions so finish order differs from input order.
            thread::sleep(Duration::from_millis((n % 3) as u64));
            Ok(n * 2)
        },
        &opts,
    )
    .unwrap();
    assert_eq!(results.len(), 25);
    for (idx, res) in results.iter().enumerate() {
        assert_eq!(*res.as_ref().unwrap(), idx * 2);
    }
}

#[test]
fn per_attempt_deadline_is_exposed_to_the_item_fn() {
    let items = vec![()];
    let opts = Options {
        request_timeout: Duration::from_millis(250),
        ..Options::default()
    };
    let results = process_all(
        &items,
        |ctx, ()| {
            let remaining = ctx.remaining().ok_or_else(|| anyhow!("no deadline set"))?;
            if remaining > Duration::from_millis(250) {
                return Err(anyhow!("deadline too far out: {remaining:?}"));
            }
            Ok(())
        },
        &opts,
    )
    .unwrap();
    assert!(results[0].is_ok());
}

#[test]
fn retryable_failures_use_the_extra_attempt_budget() {
    let calls = AtomicUsize::new(0);
    let items = vec!["alice@example.com"];
    let opts = Options {
        max_retries: 3,
        ..fast_retry_opts()
    };
    let results = process_all(
        &items,
        |_ctx, _item| {
            if calls.fetch_add(1, Ordering::SeqCst) < 2 {
                return Err(Retry::transient(anyhow!("upstream 503")));
            }
            Ok("enriched")
        },
        &opts,
    )
    .unwrap();
    assert_eq!(calls.load(Ordering::SeqCst), 3);
    assert!(results[0].is_ok());
}

#[test]
fn budget_exhaustion_returns_the_last_error() {
    let calls = AtomicUsize::new(0);
    let items = vec!["alice@example.com"];
    let opts = Options {
        max_retries: 2,
        ..fast_retry_opts()
    };
    let results: Vec<ItemResult<()>> = process_all(
        &items,
        |_ctx, _item| {
            calls.fetch_add(1, Ordering::SeqCst);
            Err(Retry::transient(anyhow!("upstream 503")))
        },
        &opts,
    )
    .unwrap();
    // First attempt plus two retries.
    assert_eq!(calls.load(Ordering::SeqCst), 3);
    assert_eq!(results[0].as_ref().unwrap_err().to_string(), "upstream 503");
}

#[test]
fn capped_errors_stop_before_the_pool_budget() {
    let calls = AtomicUsize::new(0);
    let items = vec![()];
    let opts = Options {
        max_retries: 10,
        ..fast_retry_opts()
    };
    let results: Vec<ItemResult<()>> = process_all(
        &items,
        |_ctx, ()| {
            calls.fetch_add(1, Ordering::SeqCst);
            Err(Retry::capped(anyhow!("quota exhausted"), 1))
        },
        &opts,
    )
    .unwrap();
    assert_eq!(calls.load(Ordering::SeqCst), 2);
    assert!(results[0].is_err());
}

#[test]
fn non_retryable_errors_fail_on_the_first_attempt() {
    let calls = AtomicUsize::new(0);
    let items = vec![()];
    let opts = Options {
        max_retries: 5,
        ..fast_retry_opts()
    };
    let results: Vec<ItemResult<()>> = process_all(
        &items,
        |_ctx, ()| {
            calls.fetch_add(1, Ordering::SeqCst);
            Err(anyhow!("malformed response"))
        },
        &opts,
    )
    .unwrap();
    assert_eq!(calls.load(Ordering::SeqCst), 1);
    assert_eq!(
        results[0].as_ref().unwrap_err().to_string(),
        "malformed response"
    );
}

#[test]
fn partial_output_records_failures_in_place() {
    let items = vec!["bad", "good"];
    let results = process_all(
        &items,
        |_ctx, item| {
            if *item == "bad" {
                return Err(anyhow!("no response for {item}"));
            }
            Ok(item.to_uppercase())
        },
        &Options::default(),
    )
    .unwrap();
    assert_eq!(results.len(), 2);
    assert_eq!(
        results[0].as_ref().unwrap_err().to_string(),
        "no response for bad"
    );
    assert_eq!(results[1].as_ref().unwrap(), "GOOD");
}

#[test]
fn fail_fast_stops_the_failing_worker_immediately() {
    let calls = AtomicUsize::new(0);
    let items = vec!["bad", "good"];
    let opts = Options {
        workers: 1,
        failure_policy: FailurePolicy::FailFast,
        ..Options::default()
    };
    let err = process_all(
        &items,
        |_ctx, item| -> anyhow::Result<()> {
            calls.fetch_add(1, Ordering::SeqCst);
            Err(anyhow!("refused to enrich {item}"))
        },
        &opts,
    )
    .unwrap_err();
    assert_eq!(err.to_string(), "refused to enrich bad");
    // The lone worker cancelled itself before dequeuing the second item.
    assert_eq!(calls.load(Ordering::SeqCst), 1);
}

#[test]
fn callback_sees_results_in_completion_order() {
    let items = vec!["slow", "fast"];
    let opts = Options {
        workers: 2,
        ..Options::default()
    };
    let mut order = Vec::new();
    let results = process_all_with_callback(
        &items,
        |_ctx, item| {
            let pause = if *item == "slow" { 300 } else { 30 };
            thread::sleep(Duration::from_millis(pause));
            Ok(item.len())
        },
        |idx, _res| {
            order.push(idx);
            Ok(())
        },
        &opts,
    )
    .unwrap();
    assert_eq!(order, vec![1, 0]);
    assert_eq!(results.len(), 2);
    assert!(results.iter().all(Result::is_ok));
}

#[test]
fn callback_runs_before_the_whole_batch_finishes() {
    let (release_tx, release_rx) = channel::bounded::<()>(1);
    let items = vec!["gated", "free"];
    let opts = Options {
        workers: 2,
        ..Options::default()
    };
    let mut order = Vec::new();
    let results = process_all_with_callback(
        &items,
        |_ctx, item| {
            if *item == "gated" {
                // Held until the callback has already seen "free", proving
                // completions surface while other items are still running.
                release_rx
                    .recv_timeout(Duration::from_secs(5))
                    .map_err(|_| anyhow!("never released"))?;
            }
            Ok(())
        },
        |idx, _res| {
            order.push(idx);
            if idx == 1 {
                let _ = release_tx.send(());
            }
            Ok(())
        },
        &opts,
    )
    .unwrap();
    assert_eq!(order, vec![1, 0]);
    assert_eq!(results.len(), 2);
}

#[test]
fn callback_error_cancels_the_run() {
    let items = vec![10_usize, 20, 30];
    let opts = Options {
        workers: 1,
        ..Options::default()
    };
    let err = process_all_with_callback(
        &items,
        |_ctx, &n| Ok(n * 2),
        |_idx, _res| Err(anyhow!("sink write failed")),
        &opts,
    )
    .unwrap_err();
    assert_eq!(err.to_string(), "sink write failed");
}

#[test]
fn rate_limited_run_completes() {
    let items: Vec<usize> = (0..3).collect();
    let opts = Options {
        workers: 2,
        rate_limit_rps: 1000.0,
        ..Options::default()
    };
    let results = process_all(&items, |_ctx, &n| Ok(n + 1), &opts).unwrap();
    assert_eq!(results.len(), 3);
    assert!(results.iter().all(Result::is_ok));
}

#[test]
fn backoff_doubles_to_the_cap_without_jitter() {
    let initial = Duration::from_millis(200);
    let max = Duration::from_secs(2);
    let expect = [200_u64, 400, 800, 1600, 2000, 2000];
    for (attempt, want_ms) in expect.iter().enumerate() {
        let got = backoff_sleep(initial, max, 0.0, attempt);
        assert_eq!(got, Duration::from_millis(*want_ms), "attempt {attempt}");
    }
}

#[test]
fn backoff_jitter_stays_within_the_band() {
    let initial = Duration::from_millis(200);
    let max = Duration::from_secs(2);
    for _ in 0..50 {
        let got = backoff_sleep(initial, max, 0.2, 0);
        assert!(got >= Duration::from_millis(160), "{got:?}");
        assert!(got <= Duration::from_millis(240), "{got:?}");
    }
}
