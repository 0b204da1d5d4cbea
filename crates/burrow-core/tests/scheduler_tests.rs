//! Periodic reconciliation driven by the scheduler.

mod common;

use burrow_core::ReconciliationScheduler;
use common::Harness;
use std::sync::Arc;
use std::time::Duration;

#[tokio::test(start_paused = true)]
async fn test_scheduler_repairs_dead_tunnel_on_next_tick() {
    let h = Harness::new(&[(8388, 9001)]).await;
    h.init().await;
    h.os.kill_tunnel_on(9001);

    let scheduler =
        ReconciliationScheduler::start(Arc::clone(&h.supervisor), Duration::from_secs(60));

    tokio::time::sleep(Duration::from_secs(30)).await;
    assert!(h.os.live_ports().is_empty());

    tokio::time::sleep(Duration::from_secs(31)).await;
    assert_eq!(h.os.instances_on(9001), 1);

    scheduler.shutdown().await;
}

#[tokio::test(start_paused = true)]
async fn test_scheduler_before_init_does_nothing() {
    let h = Harness::new(&[(8388, 9001)]).await;

    let scheduler =
        ReconciliationScheduler::start(Arc::clone(&h.supervisor), Duration::from_secs(60));
    tokio::time::sleep(Duration::from_secs(200)).await;

    assert_eq!(h.os.side_effects(), 0);
    scheduler.shutdown().await;
}

#[tokio::test(start_paused = true)]
async fn test_scheduler_survives_failed_tick() {
    let h = Harness::new(&[(8388, 9001)]).await;
    h.init().await;
    h.os.kill_tunnel_on(9001);
    h.os.fail_discovery(true);

    let scheduler =
        ReconciliationScheduler::start(Arc::clone(&h.supervisor), Duration::from_secs(60));

    tokio::time::sleep(Duration::from_secs(61)).await;
    assert!(h.os.live_ports().is_empty());

    h.os.fail_discovery(false);
    tokio::time::sleep(Duration::from_secs(60)).await;
    assert_eq!(h.os.instances_on(9001), 1);

    scheduler.shutdown().await;
}
