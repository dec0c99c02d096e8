mod common;

use common::{Harness, Options};
use std::time::Duration;
use transit_core::mock::{Notice, SceneCall, SimCall};
use transit_core::{CollaboratorError, TransferError};
use transit_types::{AccessDecision, ControlFlags, Placement, Vector3};

/// An agent about to walk off the east edge.
fn heading_east() -> Harness {
    let h = Harness::with_options(Options {
        agent_position: Vector3::new(255.9, 128.0, 25.0),
        ..Options::default()
    });
    h.scene.update_agent(h.agent, |view| {
        view.velocity = Vector3::new(5.0, 0.0, 0.0);
        view.crossing.preserve_velocity = true;
    });
    h
}

#[tokio::test]
async fn test_crossing_into_neighbor() {
    let h = heading_east();

    let handle = h.service.cross_async(h.agent, false).await.unwrap();
    assert_eq!(handle, h.east.handle());

    // No child placement existed yet, so one is staged first.
    assert_eq!(h.sim.count(|c| *c == SimCall::CreateAgent(h.east.handle())), 1);
    let update = h.sim.last_update().unwrap();
    assert_eq!(update.placement, Placement::Root);
    assert!((update.position.x - 0.9).abs() < 1e-3);
    assert_eq!(update.position.y, 128.0);

    let crossed = h.notifier.notices().into_iter().find_map(|notice| match notice {
        Notice::CrossRegion(notice) => Some(notice),
        _ => None,
    });
    let crossed = crossed.unwrap();
    assert_eq!(crossed.destination, h.east.handle());
    assert_eq!(crossed.velocity, Vector3::new(5.0, 0.0, 0.0));

    assert!(h.view().is_child);
    assert!(h.scene.called(&SceneCall::ClearControls));
    assert!(h.scene.called(&SceneCall::MakeChild(h.east.handle())));
    assert_eq!(h.service.metrics().crossings.with_label_values(&["completed"]).get(), 1);
    assert_eq!(h.events.kinds(), vec!["crossing_completed"]);
    assert!(!h.service.tracker().is_in_transit(h.agent));
}

#[tokio::test]
async fn test_crossing_without_preserved_velocity() {
    let h = heading_east();
    h.scene.update_agent(h.agent, |view| view.crossing.preserve_velocity = false);

    h.service.cross_async(h.agent, false).await.unwrap();

    let velocity = h.notifier.notices().into_iter().find_map(|notice| match notice {
        Notice::CrossRegion(notice) => Some(notice.velocity),
        _ => None,
    });
    assert_eq!(velocity, Some(Vector3::ZERO));
}

#[tokio::test]
async fn test_failed_crossing_restores_agent() {
    let h = heading_east();
    h.sim.fail_update(CollaboratorError::Timeout("update_agent"));

    let err = h.service.cross_async(h.agent, false).await.unwrap_err();
    assert!(matches!(err, TransferError::UpdateAgentFailed { .. }));

    // The staged child placement is taken down again.
    assert_eq!(h.sim.count(|c| *c == SimCall::CloseAgent(h.east.handle())), 1);
    assert!(!h.view().is_child);
    assert!(h.scene.called(&SceneCall::SuspendScripts));
    assert!(h.scene.called(&SceneCall::ResumeScripts));
    assert!(h.scene.called(&SceneCall::AddToPhysics { flying: false }));
    assert!(h.scene.called(&SceneCall::CrossingFailed));
    assert_eq!(h.service.metrics().crossings.with_label_values(&["failed"]).get(), 1);
    assert_eq!(h.events.kinds(), vec!["crossing_failed"]);
    assert!(!h.service.tracker().is_in_transit(h.agent));
}

#[tokio::test(start_paused = true)]
async fn test_create_timeout_closes_staged_placement() {
    let h = heading_east();
    h.sim.stall_create(Duration::from_secs(600));

    let err = h.service.cross_async(h.agent, false).await.unwrap_err();
    assert!(matches!(err, TransferError::CreateAgentRefused { .. }));

    assert_eq!(h.sim.created().len(), 1);
    assert_eq!(h.sim.count(|c| *c == SimCall::CloseAgent(h.east.handle())), 1);
    assert_eq!(h.sim.count(|c| matches!(c, SimCall::UpdateAgent(_))), 0);
    assert!(!h.service.runtime().known_regions().knows(h.agent, h.east.handle()));
    assert!(!h.view().is_child);
    assert!(h.scene.called(&SceneCall::CrossingFailed));
    assert!(!h.service.tracker().is_in_transit(h.agent));
}

#[tokio::test]
async fn test_refused_destination_is_not_asked_again() {
    let h = heading_east();
    h.sim.set_access(AccessDecision::Denied("Private estate".into()));

    let err = h.service.cross_async(h.agent, false).await.unwrap_err();
    assert!(matches!(err, TransferError::AccessDenied { .. }));
    assert!(h.service.banned().is_banned(h.east.handle(), h.agent));

    let err = h.service.cross_async(h.agent, false).await.unwrap_err();
    assert!(matches!(err, TransferError::RecentlyRefused(_)));

    assert_eq!(h.sim.count(|c| matches!(c, SimCall::QueryAccess(_))), 1);
    assert_eq!(
        h.notifier.alerts(),
        vec![
            "Private estate".to_string(),
            "Access Denied or Temporary not possible".to_string(),
        ]
    );
    assert_eq!(h.service.metrics().crossings.with_label_values(&["refused"]).get(), 2);
    assert!(!h.view().is_child);
}

#[tokio::test]
async fn test_no_region_beyond_border() {
    let h = Harness::with_options(Options {
        agent_position: Vector3::new(0.1, 128.0, 25.0),
        ..Options::default()
    });
    h.scene.update_agent(h.agent, |view| view.velocity = Vector3::new(-5.0, 0.0, 0.0));

    let err = h.service.cross_async(h.agent, false).await.unwrap_err();
    assert!(matches!(err, TransferError::NoNeighbor));
    assert!(h.notifier.alerts().is_empty());
    assert!(h.scene.called(&SceneCall::CrossingFailed));
    assert!(h.sim.calls().is_empty());
}

#[tokio::test]
async fn test_crossing_disabled_without_view_distance() {
    let h = heading_east();
    h.scene.update_agent(h.agent, |view| view.region_view_distance = 0.0);

    let err = h.service.crossing_destination(h.agent).await.unwrap_err();
    assert!(matches!(err, TransferError::CrossingDisabled(_)));
}

#[tokio::test]
async fn test_crossing_destination_lookahead() {
    let h = heading_east();

    let target = h.service.crossing_destination(h.agent).await.unwrap();
    assert_eq!(target.region.handle(), h.east.handle());
    assert!((target.position.x - 0.9).abs() < 1e-3);
    assert_eq!(target.context.outbound.value(), 0.7);
}

#[tokio::test]
async fn test_background_crossing_while_flying() {
    let h = heading_east();

    let handle = h.service.cross(h.agent, true).await.unwrap().unwrap();
    assert_eq!(handle, h.east.handle());
    assert!(h
        .sim
        .last_update()
        .unwrap()
        .control_flags
        .contains(ControlFlags::FLY));
}
