mod common;

use common::Harness;
use std::sync::Arc;
use std::time::Duration;
use transit_core::mock::{Notice, SceneCall, SimCall};
use transit_core::TransferError;
use transit_types::{AgentId, ObjectId, ObjectSummary, Vector3};

fn crate_box(position: Vector3) -> ObjectSummary {
    ObjectSummary {
        object_id: ObjectId::generate(),
        local_id: 42,
        name: "Crate".into(),
        owner: AgentId::generate(),
        position,
        velocity: Vector3::new(2.0, 0.0, 0.0),
    }
}

#[tokio::test]
async fn test_reconcile_is_idempotent() {
    let h = Harness::new();

    let report = h.service.reconcile_child_agents(h.agent).await.unwrap();
    assert_eq!(report.created, vec![h.east.handle()]);
    assert!(report.rejected.is_empty());
    assert!(h
        .notifier
        .notices()
        .iter()
        .any(|notice| matches!(notice, Notice::EnableSimulator(handle, _) if *handle == h.east.handle())));

    let again = h.service.reconcile_child_agents(h.agent).await.unwrap();
    assert!(again.is_noop());
    assert_eq!(h.sim.count(|c| *c == SimCall::CreateAgent(h.east.handle())), 1);
    assert_eq!(
        h.service.metrics().child_agents.with_label_values(&["create"]).get(),
        1
    );
}

#[tokio::test(start_paused = true)]
async fn test_rejected_child_agent_waits_for_ban() {
    let h = Harness::new();
    h.sim.refuse_create_at(h.east.handle(), "Region full");

    let report = h.service.reconcile_child_agents(h.agent).await.unwrap();
    assert!(report.created.is_empty());
    assert_eq!(report.rejected, vec![h.east.handle()]);
    assert!(h.service.banned().is_banned(h.east.handle(), h.agent));

    let again = h.service.reconcile_child_agents(h.agent).await.unwrap();
    assert!(again.is_noop());
    assert_eq!(h.sim.calls().len(), 1);

    // Once the ban lapses the neighbor is asked again.
    tokio::time::advance(Duration::from_secs(61)).await;
    let retried = h.service.reconcile_child_agents(h.agent).await.unwrap();
    assert_eq!(retried.rejected, vec![h.east.handle()]);
    assert_eq!(h.sim.count(|c| *c == SimCall::CreateAgent(h.east.handle())), 2);
}

#[tokio::test(start_paused = true)]
async fn test_timed_out_child_agent_is_closed() {
    let h = Harness::new();
    h.sim.stall_create(Duration::from_secs(600));

    let report = h.service.reconcile_child_agents(h.agent).await.unwrap();
    assert_eq!(report.rejected, vec![h.east.handle()]);
    assert_eq!(h.sim.created().len(), 1);
    assert_eq!(h.sim.count(|c| *c == SimCall::CloseAgent(h.east.handle())), 1);
    assert!(!h.service.runtime().known_regions().knows(h.agent, h.east.handle()));
}

#[tokio::test]
async fn test_shrinking_view_closes_child_agents() {
    let h = Harness::new();
    h.service.reconcile_child_agents(h.agent).await.unwrap();

    h.scene.update_agent(h.agent, |view| view.region_view_distance = 1.0);
    let closed = h.service.close_old_child_agents(h.agent).await.unwrap();

    assert_eq!(closed, vec![h.east.handle()]);
    assert_eq!(h.sim.count(|c| *c == SimCall::CloseAgent(h.east.handle())), 1);
    assert!(h.service.close_old_child_agents(h.agent).await.unwrap().is_empty());
}

#[tokio::test]
async fn test_child_position_updates() {
    let h = Harness::new();
    h.service.reconcile_child_agents(h.agent).await.unwrap();

    let sent = h.service.send_child_position_updates(h.agent).await.unwrap();
    assert_eq!(sent, 1);
    assert_eq!(
        h.sim.count(|c| *c == SimCall::UpdateChildPosition(h.east.handle())),
        1
    );
}

#[tokio::test]
async fn test_close_all_child_agents() {
    let h = Harness::new();
    h.service.reconcile_child_agents(h.agent).await.unwrap();

    let closed = h.service.close_all_child_agents(h.agent, "logout").await;
    assert_eq!(closed, vec![h.east.handle()]);
    assert_eq!(h.service.send_child_position_updates(h.agent).await.unwrap(), 0);
}

#[tokio::test]
async fn test_enable_single_child_agent() {
    let h = Harness::new();
    let far = Arc::new(h.far.clone());

    assert!(h.service.enable_child_agent(h.agent, &far).await.unwrap());
    assert!(!h.service.enable_child_agent(h.agent, &far).await.unwrap());
    assert_eq!(h.sim.count(|c| *c == SimCall::CreateAgent(h.far.handle())), 1);

    let created = h.sim.created();
    // Child placement position is relative to the far region's origin.
    assert_eq!(created[0].position.x, 128.0 - 10.0 * 256.0);
}

#[tokio::test]
async fn test_object_destination_past_east_edge() {
    let h = Harness::new();

    let (region, arrival) = h
        .service
        .object_destination(Vector3::new(256.5, 10.0, 20.0))
        .await
        .unwrap()
        .unwrap();
    assert_eq!(region.handle(), h.east.handle());
    assert!((arrival.x - 0.5).abs() < 1e-3);
    assert_eq!(arrival.y, 10.0);

    let nothing_west = h
        .service
        .object_destination(Vector3::new(-0.5, 10.0, 20.0))
        .await
        .unwrap();
    assert!(nothing_west.is_none());
}

#[tokio::test]
async fn test_object_crossing() {
    let h = Harness::new();
    let object = crate_box(Vector3::new(256.5, 10.0, 20.0));

    h.service
        .cross_object(&h.east, Vector3::new(0.5, 10.0, 20.0), &object)
        .await
        .unwrap();
    assert!(h.scene.called(&SceneCall::DeleteObject(object.object_id)));
}

#[tokio::test]
async fn test_refused_object_stays_local() {
    let h = Harness::new();
    h.sim.refuse_objects();
    let object = crate_box(Vector3::new(256.5, 10.0, 20.0));

    let err = h
        .service
        .cross_object(&h.east, Vector3::new(0.5, 10.0, 20.0), &object)
        .await
        .unwrap_err();
    assert!(matches!(err, TransferError::ObjectRejected { .. }));
    assert!(!h.scene.called(&SceneCall::DeleteObject(object.object_id)));
}
