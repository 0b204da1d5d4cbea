//! Process controller behavior against an in-memory OS.

mod common;

use burrow_core::process::TunnelLaunchConfig;
use burrow_core::{
    OsSurface, StartOutcome, SupervisorConfig, TunnelBinary, TunnelProcessController,
};
use common::{FakeOs, BINARY_NAME};
use std::path::PathBuf;
use std::sync::Arc;

fn controller(os: &Arc<FakeOs>) -> TunnelProcessController {
    let launch = TunnelLaunchConfig::resolve(
        TunnelBinary {
            path: PathBuf::from(format!("/opt/kcptun/{}", BINARY_NAME)),
            name: BINARY_NAME.into(),
        },
        &SupervisorConfig::default(),
    );
    TunnelProcessController::new(Arc::clone(os) as Arc<dyn OsSurface>, launch)
}

#[tokio::test]
async fn test_start_twice_spawns_once() {
    let os = Arc::new(FakeOs::new());
    let controller = controller(&os);

    let first = controller.start(8388, 9001).await.unwrap();
    assert!(matches!(first, StartOutcome::Spawned { .. }));

    let second = controller.start(8388, 9001).await.unwrap();
    assert_eq!(second, StartOutcome::AlreadyBound);

    assert_eq!(os.spawned().len(), 1);
    assert_eq!(os.instances_on(9001), 1);
}

#[tokio::test]
async fn test_start_rejects_zero_ports() {
    let os = Arc::new(FakeOs::new());
    let controller = controller(&os);

    assert!(controller.start(0, 9001).await.is_err());
    assert!(controller.start(8388, 0).await.is_err());
    assert!(os.spawned().is_empty());
}

#[tokio::test]
async fn test_stop_with_nothing_running_is_a_noop() {
    let os = Arc::new(FakeOs::new());
    let controller = controller(&os);

    assert_eq!(controller.stop_by_target(8388).await.unwrap(), 0);
    assert_eq!(controller.stop_by_tunnel_port(9001).await.unwrap(), 0);
    assert!(os.terminated().is_empty());
}

#[tokio::test]
async fn test_stop_by_target_leaves_other_targets() {
    let os = Arc::new(FakeOs::new());
    let controller = controller(&os);
    os.add_tunnel(9001, 8388);
    os.add_tunnel(9002, 8388);
    os.add_tunnel(9003, 443);

    assert_eq!(controller.stop_by_target(8388).await.unwrap(), 2);
    assert_eq!(os.instances_on(9003), 1);
    assert_eq!(os.terminated().len(), 2);
}
