mod common;

use common::{region, Harness, Options};
use std::sync::Arc;
use std::time::Duration;
use transit_core::mock::{Notice, SceneCall, SimCall, StaticAuthorizer};
use transit_core::{CollaboratorError, TeleportOutcome, TransferConfig, TransferError};
use transit_types::{
    AccessDecision, AppearanceSummary, HomeLocation, Landmark, Placement, RegionFlags, RegionHandle,
    TeleportFlags, TransferPhase, Vector3,
};

const LOOK_EAST: Vector3 = Vector3::new(1.0, 0.0, 0.0);
const TARGET: Vector3 = Vector3::new(128.0, 128.0, 25.0);

fn closes(h: &Harness, handle: RegionHandle) -> usize {
    h.sim.count(|call| *call == SimCall::CloseAgent(handle))
}

#[tokio::test]
async fn test_v1_teleport_to_neighbor_confirmed() {
    let h = Harness::new();
    h.sim.grant_version(0.1);
    h.confirm_on_finish();

    let outcome = h
        .service
        .teleport(h.agent, h.east.handle(), TARGET, LOOK_EAST, TeleportFlags::empty())
        .await
        .unwrap();

    assert_eq!(
        outcome,
        TeleportOutcome::Remote {
            destination: h.east.handle(),
            closed_source: false,
        }
    );
    assert!(h.view().is_child);
    assert_eq!(h.sim.count(|c| *c == SimCall::CreateAgent(h.east.handle())), 1);
    assert_eq!(h.sim.count(|c| *c == SimCall::UpdateAgent(h.east.handle())), 1);
    assert_eq!(closes(&h, h.east.handle()), 0);

    let update = h.sim.last_update().unwrap();
    assert_eq!(update.placement, Placement::Root);
    assert!(update.callback_uri.is_some());
    assert!(!update.sender_wants_to_wait_for_root);

    let metrics = h.service.metrics();
    assert_eq!(metrics.teleport_attempts.get(), 1);
    assert_eq!(metrics.teleport_failures.get(), 0);
    assert!(!h.service.tracker().is_in_transit(h.agent));
    assert_eq!(h.events.kinds(), vec!["teleport_started", "teleport_completed"]);
}

#[tokio::test(start_paused = true)]
async fn test_v1_unconfirmed_arrival_rolls_back() {
    let h = Harness::new();
    h.sim.grant_version(0.1);

    let err = h
        .service
        .teleport(h.agent, h.east.handle(), TARGET, LOOK_EAST, TeleportFlags::empty())
        .await
        .unwrap_err();

    assert!(matches!(err, TransferError::ConfirmationTimeout(_)));
    assert_eq!(closes(&h, h.east.handle()), 1);
    assert_eq!(h.service.metrics().teleport_failures.get(), 1);
    assert_eq!(
        h.notifier.failures(),
        vec!["Problems connecting to destination East, reason: Destination region did not signal teleport completion."]
    );

    // Back to a root agent with running scripts.
    assert!(!h.view().is_child);
    assert!(h.scene.called(&SceneCall::ResumeScripts));
    assert!(!h.service.tracker().is_in_transit(h.agent));
}

#[tokio::test]
async fn test_cancel_after_create_rolls_back() {
    let h = Harness::new();
    let tracker = Arc::clone(h.service.tracker());
    h.sim.on_create(Arc::new(move |agent| {
        tracker.set_phase(agent, TransferPhase::Cancelling);
    }));

    let err = h
        .service
        .teleport(h.agent, h.east.handle(), TARGET, LOOK_EAST, TeleportFlags::empty())
        .await
        .unwrap_err();

    assert!(matches!(err, TransferError::Cancelled { stage: "create_agent" }));
    assert_eq!(closes(&h, h.east.handle()), 1);
    assert_eq!(h.sim.count(|c| matches!(c, SimCall::UpdateAgent(_))), 0);

    let metrics = h.service.metrics();
    assert_eq!(metrics.teleport_cancels.get(), 1);
    assert_eq!(metrics.teleport_failures.get(), 0);
    assert!(h.notifier.failures().is_empty());
}

#[tokio::test]
async fn test_logout_during_update_aborts() {
    let h = Harness::new();
    h.sim.grant_version(0.1);
    let tracker = Arc::clone(h.service.tracker());
    h.sim.on_update(Arc::new(move |agent| {
        tracker.set_phase(agent, TransferPhase::Aborting);
    }));

    let err = h
        .service
        .teleport(h.agent, h.east.handle(), TARGET, LOOK_EAST, TeleportFlags::empty())
        .await
        .unwrap_err();

    assert!(matches!(err, TransferError::Aborted { .. }));
    assert_eq!(closes(&h, h.east.handle()), 1);
    assert_eq!(h.service.metrics().teleport_aborts.get(), 1);
    assert_eq!(h.service.metrics().teleport_failures.get(), 0);
}

#[tokio::test]
async fn test_update_failure_rolls_back() {
    let h = Harness::new();
    h.sim.fail_update(CollaboratorError::Unreachable("connection reset".into()));

    let err = h
        .service
        .teleport(h.agent, h.east.handle(), TARGET, LOOK_EAST, TeleportFlags::empty())
        .await
        .unwrap_err();

    assert!(matches!(err, TransferError::UpdateAgentFailed { .. }));
    assert_eq!(closes(&h, h.east.handle()), 1);
    assert_eq!(h.service.metrics().teleport_failures.get(), 1);
    assert!(h.notifier.failures()[0].contains("could not be established"));
    assert!(!h.view().is_child);
}

#[tokio::test]
async fn test_create_refusal_reported() {
    let h = Harness::new();
    h.sim.refuse_create("Region is full");

    let err = h
        .service
        .teleport(h.agent, h.east.handle(), TARGET, LOOK_EAST, TeleportFlags::empty())
        .await
        .unwrap_err();

    assert!(matches!(err, TransferError::CreateAgentRefused { .. }));
    assert_eq!(h.notifier.failures(), vec!["Region is full"]);
    assert_eq!(h.events.kinds(), vec!["teleport_failed"]);
    assert_eq!(closes(&h, h.east.handle()), 0);
    assert_eq!(h.service.metrics().teleport_attempts.get(), 1);
    assert_eq!(h.service.metrics().teleport_failures.get(), 1);
}

#[tokio::test(start_paused = true)]
async fn test_create_timeout_closes_destination() {
    let h = Harness::new();
    h.sim.stall_create(Duration::from_secs(600));

    let err = h
        .service
        .teleport(h.agent, h.east.handle(), TARGET, LOOK_EAST, TeleportFlags::empty())
        .await
        .unwrap_err();

    assert!(matches!(err, TransferError::CreateAgentRefused { .. }));
    // The placement landed even though the reply never came back.
    assert_eq!(h.sim.created().len(), 1);
    assert_eq!(closes(&h, h.east.handle()), 1);
    assert_eq!(h.sim.count(|c| matches!(c, SimCall::UpdateAgent(_))), 0);
    assert!(!h.view().is_child);
    assert!(!h.service.tracker().is_in_transit(h.agent));
}

#[tokio::test]
async fn test_panic_during_update_rolls_back() {
    let h = Harness::new();
    h.sim.on_update(Arc::new(|_| panic!("update handler blew up")));

    let err = h
        .service
        .teleport(h.agent, h.east.handle(), TARGET, LOOK_EAST, TeleportFlags::empty())
        .await
        .unwrap_err();

    match err {
        TransferError::Internal(message) => assert_eq!(message, "update handler blew up"),
        other => panic!("unexpected error: {other:?}"),
    }
    assert_eq!(closes(&h, h.east.handle()), 1);
    assert_eq!(h.notifier.failures(), vec!["Internal error"]);
    assert!(!h.view().is_child);
    assert!(!h.service.tracker().is_in_transit(h.agent));
    assert_eq!(h.service.metrics().teleport_failures.get(), 0);

    // The agent may try again straight away.
    h.sim.on_update(Arc::new(|_| {}));
    h.service
        .teleport(h.agent, h.east.handle(), TARGET, LOOK_EAST, TeleportFlags::empty())
        .await
        .unwrap();
    assert!(h.view().is_child);
}

#[tokio::test]
async fn test_offline_destination_refused() {
    let h = Harness::new();
    let dark = region("Dark", 1003, 1000, 9003).with_flags(RegionFlags::empty());
    h.grid.add_region(dark.clone());

    let err = h
        .service
        .teleport(h.agent, dark.handle(), TARGET, LOOK_EAST, TeleportFlags::empty())
        .await
        .unwrap_err();

    assert!(matches!(err, TransferError::DestinationOffline(_)));
    assert_eq!(h.notifier.failures(), vec!["The region you tried to teleport to is offline"]);
    assert!(h.sim.calls().is_empty());
    assert!(!h.service.tracker().is_in_transit(h.agent));
}

#[tokio::test]
async fn test_same_region_below_ground_uses_emergency_position() {
    let h = Harness::new();

    let outcome = h
        .service
        .teleport(
            h.agent,
            h.home.handle(),
            Vector3::new(50.0, 60.0, -5.0),
            LOOK_EAST,
            TeleportFlags::empty(),
        )
        .await
        .unwrap();

    let expected = Vector3::new(128.0, 128.0, 128.0);
    assert_eq!(outcome, TeleportOutcome::Local { position: expected });
    assert_eq!(h.view().position, expected);
    assert_eq!(h.service.metrics().teleport_attempts.get(), 0);
    assert!(h.sim.calls().is_empty());
}

#[tokio::test]
async fn test_same_region_legacy_sentinel_uses_landing_point() {
    let landing = Vector3::new(30.0, 40.0, 50.0);
    let h = Harness::with_options(Options {
        landing_point: Some(landing),
        ..Options::default()
    });

    let outcome = h
        .service
        .teleport(
            h.agent,
            h.home.handle(),
            Vector3::new(128.0, 128.0, 22.5),
            LOOK_EAST,
            TeleportFlags::empty(),
        )
        .await
        .unwrap();

    assert_eq!(outcome, TeleportOutcome::Local { position: landing });
}

#[tokio::test]
async fn test_same_region_clamped_above_ground() {
    let h = Harness::new();
    h.scene.set_ground_height(20.0);

    let outcome = h
        .service
        .teleport(
            h.agent,
            h.home.handle(),
            Vector3::new(10.0, 10.0, 5.0),
            Vector3::new(0.0, 1.0, 0.9),
            TeleportFlags::empty(),
        )
        .await
        .unwrap();

    let half_height = AppearanceSummary::default().half_height();
    let margin = TransferConfig::default().landing_height_margin;
    let TeleportOutcome::Local { position } = outcome else {
        panic!("expected a local teleport");
    };
    assert_eq!(position.z, 20.0 + half_height + margin);
    assert!(h.scene.called(&SceneCall::Relocate {
        position,
        look_at: Vector3::new(0.0, 1.0, 0.0),
    }));
}

#[tokio::test]
async fn test_frozen_agent_cannot_teleport_locally() {
    let h = Harness::new();
    h.scene.update_agent(h.agent, |view| view.allow_movement = false);

    let err = h
        .service
        .teleport(h.agent, h.home.handle(), TARGET, LOOK_EAST, TeleportFlags::empty())
        .await
        .unwrap_err();

    assert!(matches!(err, TransferError::Frozen(_)));
    assert_eq!(h.notifier.failures(), vec!["You are frozen"]);
}

#[tokio::test]
async fn test_permission_denied() {
    let h = Harness::with_options(Options {
        authorizer: StaticAuthorizer::deny_all(),
        ..Options::default()
    });

    let err = h
        .service
        .teleport(h.agent, h.east.handle(), TARGET, LOOK_EAST, TeleportFlags::empty())
        .await
        .unwrap_err();

    assert!(matches!(err, TransferError::PermissionDenied(_)));
    assert!(!h.service.tracker().is_in_transit(h.agent));
    assert!(h.sim.calls().is_empty());
}

#[tokio::test]
async fn test_god_teleport_flagged() {
    let h = Harness::with_options(Options {
        authorizer: StaticAuthorizer::god(),
        ..Options::default()
    });

    h.service
        .teleport(h.agent, h.east.handle(), TARGET, LOOK_EAST, TeleportFlags::empty())
        .await
        .unwrap();

    let started = h.notifier.notices().into_iter().find_map(|notice| match notice {
        Notice::TeleportStart(flags) => Some(flags),
        _ => None,
    });
    assert!(started.unwrap().contains(TeleportFlags::GODLIKE));
}

#[tokio::test(start_paused = true)]
async fn test_concurrent_teleports_are_exclusive() {
    let h = Harness::new();
    h.sim.grant_version(0.1);

    let (first, second) = tokio::join!(
        h.service
            .teleport(h.agent, h.east.handle(), TARGET, LOOK_EAST, TeleportFlags::empty()),
        h.service
            .teleport(h.agent, h.east.handle(), TARGET, LOOK_EAST, TeleportFlags::empty()),
    );

    let refused = [&first, &second]
        .iter()
        .filter(|result| matches!(result, Err(TransferError::AlreadyInTransit { .. })))
        .count();
    assert_eq!(refused, 1);
    assert!(h
        .notifier
        .failures()
        .contains(&"Previous teleport process incomplete.  Please retry shortly.".to_string()));
    assert_eq!(h.service.metrics().teleport_attempts.get(), 1);
    assert!(!h.service.tracker().is_in_transit(h.agent));
}

#[tokio::test]
async fn test_unknown_destination_marks_map_block() {
    let h = Harness::new();
    let nowhere = RegionHandle::from_region_loc(1500, 1500);

    let err = h
        .service
        .teleport(h.agent, nowhere, TARGET, LOOK_EAST, TeleportFlags::empty())
        .await
        .unwrap_err();

    assert!(matches!(err, TransferError::DestinationNotFound(_)));
    assert!(h.notifier.notices().contains(&Notice::MapBlockOffline(1500, 1500)));
    assert_eq!(h.service.metrics().teleport_attempts.get(), 0);
}

#[tokio::test]
async fn test_access_denied_without_reason() {
    let h = Harness::new();
    h.sim.set_access(AccessDecision::Denied(String::new()));

    let err = h
        .service
        .teleport(h.agent, h.east.handle(), TARGET, LOOK_EAST, TeleportFlags::empty())
        .await
        .unwrap_err();

    assert!(matches!(err, TransferError::AccessDenied { .. }));
    assert_eq!(h.notifier.failures(), vec!["Access Denied"]);
    assert_eq!(h.service.metrics().teleport_attempts.get(), 0);
}

#[tokio::test]
async fn test_outfit_refused_by_old_destination() {
    let h = Harness::new();
    h.sim.grant_version(0.4);
    h.scene.update_agent(h.agent, |view| {
        let mut appearance = AppearanceSummary::default();
        appearance.wearables.push(1);
        view.appearance = Some(appearance);
    });

    let err = h
        .service
        .teleport(h.agent, h.east.handle(), TARGET, LOOK_EAST, TeleportFlags::empty())
        .await
        .unwrap_err();

    assert!(matches!(err, TransferError::OutfitIncompatible(_)));
    assert_eq!(h.service.metrics().teleport_attempts.get(), 0);
    assert_eq!(h.sim.count(|c| matches!(c, SimCall::CreateAgent(_))), 0);
}

#[tokio::test]
async fn test_v2_teleport_to_neighbor() {
    let h = Harness::new();

    let outcome = h
        .service
        .teleport(h.agent, h.east.handle(), TARGET, LOOK_EAST, TeleportFlags::empty())
        .await
        .unwrap();

    assert_eq!(
        outcome,
        TeleportOutcome::Remote {
            destination: h.east.handle(),
            closed_source: false,
        }
    );
    let update = h.sim.last_update().unwrap();
    assert!(update.sender_wants_to_wait_for_root);
    assert!(update.new_callback_uri.is_none());
    assert!(h.view().is_child);
    assert_eq!(closes(&h, h.east.handle()), 0);
    assert!(h.scene.called(&SceneCall::MakeChild(h.east.handle())));
}

#[tokio::test(start_paused = true)]
async fn test_v2_teleport_out_of_view_closes_source() {
    let h = Harness::new();
    h.release_on_update();

    let outcome = h
        .service
        .teleport(h.agent, h.far.handle(), TARGET, LOOK_EAST, TeleportFlags::empty())
        .await
        .unwrap();

    assert_eq!(
        outcome,
        TeleportOutcome::Remote {
            destination: h.far.handle(),
            closed_source: true,
        }
    );
    let update = h.sim.last_update().unwrap();
    assert!(update.new_callback_uri.is_some());
    assert!(!update
        .children_caps_seeds
        .contains_key(&h.home.handle()));
    assert!(h.scene.called(&SceneCall::Close));
    assert!(h.view_gone());
}

#[tokio::test]
async fn test_teleport_home() {
    let h = Harness::new();
    h.grid.set_home(
        h.agent,
        HomeLocation {
            region_id: Some(h.east.region_id),
            position: Vector3::new(20.0, 30.0, 40.0),
            look_at: LOOK_EAST,
        },
    );

    let outcome = h.service.teleport_home(h.agent).await.unwrap();
    assert_eq!(
        outcome,
        TeleportOutcome::Remote {
            destination: h.east.handle(),
            closed_source: false,
        }
    );
    assert_eq!(h.sim.last_update().unwrap().position, Vector3::new(20.0, 30.0, 40.0));
}

#[tokio::test]
async fn test_teleport_home_not_set() {
    let h = Harness::new();
    h.grid.set_home(
        h.agent,
        HomeLocation {
            region_id: None,
            position: TARGET,
            look_at: LOOK_EAST,
        },
    );

    let err = h.service.teleport_home(h.agent).await.unwrap_err();
    assert!(matches!(err, TransferError::HomeNotSet));
    assert_eq!(h.notifier.failures(), vec!["Home set not"]);

    let other = Harness::new();
    let err = other.service.teleport_home(other.agent).await.unwrap_err();
    assert!(matches!(err, TransferError::HomeNotFound));
}

#[tokio::test]
async fn test_teleport_to_landmark() {
    let h = Harness::new();
    let landmark = Landmark {
        region_id: h.east.region_id,
        region_handle: h.east.handle(),
        position: Vector3::new(64.0, 64.0, 30.0),
    };

    h.service
        .teleport_to_landmark(h.agent, &landmark, LOOK_EAST)
        .await
        .unwrap();
    assert_eq!(h.sim.last_update().unwrap().position, Vector3::new(64.0, 64.0, 30.0));

    let missing = Landmark {
        region_id: transit_types::RegionId::generate(),
        ..landmark
    };
    let other = Harness::new();
    let err = other
        .service
        .teleport_to_landmark(other.agent, &missing, LOOK_EAST)
        .await
        .unwrap_err();
    assert!(matches!(err, TransferError::LandmarkRegionNotFound));
}

#[tokio::test]
async fn test_cancel_ignored_when_disabled() {
    let h = Harness::with_config(TransferConfig {
        disable_cancellation: true,
        ..TransferConfig::default()
    });
    h.service.tracker().begin_transfer(h.agent);

    assert!(!h.service.on_client_cancel(h.agent));
    assert_eq!(
        h.service.tracker().current_phase(h.agent),
        Some(TransferPhase::Transferring)
    );
}

#[tokio::test]
async fn test_connection_drop_without_logout_keeps_transfer() {
    let h = Harness::new();
    h.service.tracker().begin_transfer(h.agent);

    assert!(!h.service.on_connection_closed(h.agent, false));
    assert!(h.service.on_connection_closed(h.agent, true));
    assert_eq!(
        h.service.tracker().current_phase(h.agent),
        Some(TransferPhase::Aborting)
    );
}
