//! Sentinel/cron scenario: a job gated by `EveryPeriod` reruns itself
//! from its own done-callback, forming a tick loop, and stops within
//! one period of cancellation.

use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;

use engine_core::{Condition, Engine, EngineSetting, Job, JobBody, JobOutput, JobSpec};
use engine_core::job::{sync_done_callback, FnJob};

#[tokio::test]
async fn cron_tick_fires_roughly_once_per_period_and_stops_on_cancel() {
    let engine = Engine::new(EngineSetting {
        cache_path: Some(std::env::temp_dir().join("engine_core_test_cron_tick")),
        ..EngineSetting::default()
    });
    engine.start().await.unwrap();

    let counter = Arc::new(AtomicU32::new(0));
    let stop = Arc::new(AtomicBool::new(false));

    let counter_body = counter.clone();
    let sentinel: Arc<Job> = Job::new(JobSpec {
        name: "tick".into(),
        body: JobBody::Function(Arc::new(FnJob(move |_args: Vec<JobOutput>| {
            let counter = counter_body.clone();
            async move {
                counter.fetch_add(1, Ordering::SeqCst);
                Ok(Arc::new(()) as JobOutput)
            }
        }))),
        condition: Some(Condition::every_period("1s", false).unwrap()),
        ..JobSpec::default()
    });

    let rerun_target = sentinel.clone();
    let stop_cb = stop.clone();
    sentinel.add_done_callback(sync_done_callback(move |_| {
        if stop_cb.load(Ordering::SeqCst) {
            return;
        }
        let job = rerun_target.clone();
        tokio::spawn(async move {
            let _ = job.rerun().await;
        });
    }));

    engine.submit(sentinel.clone()).await.unwrap();

    tokio::time::sleep(Duration::from_millis(5500)).await;
    let ticks_before_cancel = counter.load(Ordering::SeqCst);
    assert!(
        ticks_before_cancel == 5 || ticks_before_cancel == 6,
        "expected 5 or 6 ticks after 5.5s, got {ticks_before_cancel}"
    );

    stop.store(true, Ordering::SeqCst);
    sentinel.cancel().await.unwrap();

    tokio::time::sleep(Duration::from_millis(1100)).await;
    let ticks_after_cancel = counter.load(Ordering::SeqCst);
    assert!(
        ticks_after_cancel <= ticks_before_cancel + 1,
        "cancellation should stop further ticks within one period"
    );

    assert!(sentinel.status().is_terminal());

    engine.stop().await.unwrap();
}
