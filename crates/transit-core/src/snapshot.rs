//! Session snapshots handed to destination regions.

use std::collections::BTreeMap;
use transit_types::{AgentId, AgentSessionSnapshot, AgentView, Placement, RegionId, Vector3};
use uuid::Uuid;

/// Builds [`AgentSessionSnapshot`]s from the scene's view of an agent.
pub struct AgentSessionSnapshotBuilder;

impl AgentSessionSnapshotBuilder {
    /// Snapshot of `agent` placed at `start_position`.
    ///
    /// `known_seed` is the seed previously issued for the destination
    /// placement; without one a fresh random seed path is generated.
    /// Viewer and network metadata come from the active circuit record
    /// when there is one, otherwise from the client connection.
    pub fn build(
        agent: &AgentView,
        start_position: Vector3,
        placement: Placement,
        known_seed: Option<&str>,
    ) -> AgentSessionSnapshot {
        let caps_path = match known_seed {
            Some(seed) => seed.to_string(),
            None => Self::random_caps_path(),
        };
        let metadata = agent.active_circuit.as_ref().unwrap_or(&agent.client);

        AgentSessionSnapshot {
            agent_id: agent.agent_id,
            session_id: agent.client.session_id,
            secure_session_id: agent.client.secure_session_id,
            circuit_code: agent.client.circuit_code,
            placement,
            position: start_position,
            look_at: agent.look_at,
            velocity: agent.velocity,
            control_flags: agent.control_flags,
            appearance: agent.appearance.clone().unwrap_or_default(),
            draw_distance: agent.draw_distance,
            caps_path,
            children_caps_seeds: BTreeMap::new(),
            service_urls: metadata.service_urls.clone(),
            ip_address: metadata.ip_address.clone(),
            viewer: metadata.viewer.clone(),
            channel: metadata.channel.clone(),
            mac: metadata.mac.clone(),
            id0: metadata.id0.clone(),
            callback_uri: None,
            new_callback_uri: None,
            sender_wants_to_wait_for_root: false,
        }
    }

    pub fn random_caps_path() -> String {
        Uuid::new_v4().to_string()
    }

    /// Seed capability URL a client uses to reach its placement.
    pub fn seed_capability_url(server_uri: &str, caps_path: &str) -> String {
        format!("{}CAPS/{}0000/", with_trailing_slash(server_uri), caps_path)
    }

    /// Where a destination reports that the source may release the agent.
    pub fn release_callback_url(server_uri: &str, agent_id: AgentId, region_id: RegionId) -> String {
        format!(
            "{}agent/{}/{}/release/",
            with_trailing_slash(server_uri),
            agent_id.as_uuid(),
            region_id.as_uuid()
        )
    }
}

fn with_trailing_slash(uri: &str) -> String {
    if uri.ends_with('/') {
        uri.to_string()
    } else {
        format!("{uri}/")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use transit_types::CircuitInfo;

    fn agent() -> AgentView {
        let mut view = AgentView::new(AgentId::generate(), "Tester", Vector3::new(10.0, 10.0, 25.0));
        view.client.viewer = "client-viewer".into();
        view.client.channel = "client-channel".into();
        view.velocity = Vector3::new(1.0, 0.0, 0.0);
        view
    }

    #[test]
    fn test_fresh_seed_for_new_child() {
        let view = agent();
        let first = AgentSessionSnapshotBuilder::build(&view, view.position, Placement::Child, None);
        let second = AgentSessionSnapshotBuilder::build(&view, view.position, Placement::Child, None);

        assert_ne!(first.caps_path, second.caps_path);
        assert!(Uuid::parse_str(&first.caps_path).is_ok());
        assert_eq!(first.placement, Placement::Child);
    }

    #[test]
    fn test_known_seed_reused() {
        let view = agent();
        let snapshot = AgentSessionSnapshotBuilder::build(
            &view,
            Vector3::new(1.0, 2.0, 3.0),
            Placement::Root,
            Some("issued-seed"),
        );
        assert_eq!(snapshot.caps_path, "issued-seed");
        assert_eq!(snapshot.position, Vector3::new(1.0, 2.0, 3.0));
        assert_eq!(snapshot.velocity, view.velocity);
        assert_eq!(snapshot.session_id, view.client.session_id);
    }

    #[test]
    fn test_metadata_prefers_active_circuit() {
        let mut view = agent();
        let snapshot = AgentSessionSnapshotBuilder::build(&view, view.position, Placement::Child, None);
        assert_eq!(snapshot.viewer, "client-viewer");

        view.active_circuit = Some(CircuitInfo {
            viewer: "login-viewer".into(),
            channel: "login-channel".into(),
            ip_address: Some("203.0.113.9".into()),
            id0: "id0-hash".into(),
            mac: "mac-hash".into(),
            service_urls: [("HomeURI".to_string(), "http://home/".to_string())].into(),
            ..Default::default()
        });
        let snapshot = AgentSessionSnapshotBuilder::build(&view, view.position, Placement::Child, None);
        assert_eq!(snapshot.viewer, "login-viewer");
        assert_eq!(snapshot.channel, "login-channel");
        assert_eq!(snapshot.ip_address.as_deref(), Some("203.0.113.9"));
        assert_eq!(snapshot.service_urls["HomeURI"], "http://home/");
        // Session identity always follows the live client.
        assert_eq!(snapshot.circuit_code, view.client.circuit_code);
    }

    #[test]
    fn test_urls() {
        assert_eq!(
            AgentSessionSnapshotBuilder::seed_capability_url("http://beta:9000", "abc"),
            "http://beta:9000/CAPS/abc0000/"
        );

        let agent_id = AgentId::generate();
        let region_id = RegionId::generate();
        assert_eq!(
            AgentSessionSnapshotBuilder::release_callback_url("http://home:9000/", agent_id, region_id),
            format!(
                "http://home:9000/agent/{}/{}/release/",
                agent_id.as_uuid(),
                region_id.as_uuid()
            )
        );
    }
}
