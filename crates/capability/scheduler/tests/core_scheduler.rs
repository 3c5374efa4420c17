use mc_scheduler::CoreScheduler;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

fn counting_job(counter: &Arc<AtomicUsize>) -> mc_scheduler::JobFn {
    let counter = counter.clone();
    Arc::new(move || {
        counter.fetch_add(1, Ordering::SeqCst);
    })
}

#[tokio::test(start_paused = true)]
async fn every_job_fires_on_interval_after_start() {
    let scheduler = CoreScheduler::new();
    let counter = Arc::new(AtomicUsize::new(0));
    scheduler
        .add("job_a", "@every 1s", counting_job(&counter))
        .expect("add");
    tokio::time::sleep(Duration::from_millis(2500)).await;
    assert_eq!(counter.load(Ordering::SeqCst), 0, "not started yet");

    scheduler.start();
    tokio::time::sleep(Duration::from_millis(3500)).await;
    assert_eq!(counter.load(Ordering::SeqCst), 3);
    scheduler.close();
}

#[tokio::test(start_paused = true)]
async fn re_add_replaces_existing_entry() {
    let scheduler = CoreScheduler::new();
    scheduler.start();
    let first = Arc::new(AtomicUsize::new(0));
    let second = Arc::new(AtomicUsize::new(0));
    scheduler
        .add("same", "@every 1s", counting_job(&first))
        .expect("add");
    scheduler
        .add("same", "@every 1s", counting_job(&second))
        .expect("add");
    tokio::time::sleep(Duration::from_millis(2500)).await;
    assert_eq!(first.load(Ordering::SeqCst), 0);
    assert_eq!(second.load(Ordering::SeqCst), 2);
    assert_eq!(scheduler.list_names(), vec!["same".to_string()]);
    scheduler.close();
}

#[tokio::test]
async fn remove_with_prefix_keeps_other_entries() {
    let scheduler = CoreScheduler::new();
    let noop: mc_scheduler::JobFn = Arc::new(|| {});
    for name in ["mc_task_schedule_a_polling", "mc_task_schedule_b_polling", "mc_schedule_x"] {
        scheduler.add(name, "@every 1h", noop.clone()).expect("add");
    }
    scheduler.remove_with_prefix("mc_task_schedule_");
    assert_eq!(scheduler.list_names(), vec!["mc_schedule_x".to_string()]);
    assert!(scheduler.is_available("mc_schedule_x"));
    scheduler.remove("mc_schedule_x");
    assert!(!scheduler.is_available("mc_schedule_x"));
    assert!(scheduler.add("bad", "@every nope", noop).is_err());
}
