//! Shared setup: a home region at (1000, 1000) with a direct neighbor to
//! the east and a distant region well out of view.

#![allow(dead_code)]

use std::net::SocketAddr;
use std::sync::Arc;
use transit_core::mock::{MockGrid, MockScene, MockSimulation, RecordingEvents, RecordingNotifier, StaticAuthorizer};
use transit_core::{EntityTransferService, EntityTransferServiceBuilder, TransferConfig};
use transit_types::{AgentId, AgentView, LocalRegion, RegionDescriptor, RegionId, TransferPhase, Vector3};

pub struct Options {
    pub config: TransferConfig,
    pub authorizer: StaticAuthorizer,
    pub landing_point: Option<Vector3>,
    pub agent_position: Vector3,
}

impl Default for Options {
    fn default() -> Self {
        Self {
            config: TransferConfig::default(),
            authorizer: StaticAuthorizer::allow_all(),
            landing_point: None,
            agent_position: Vector3::new(128.0, 128.0, 25.0),
        }
    }
}

pub struct Harness {
    pub service: EntityTransferService,
    pub scene: Arc<MockScene>,
    pub sim: Arc<MockSimulation>,
    pub grid: Arc<MockGrid>,
    pub notifier: Arc<RecordingNotifier>,
    pub events: Arc<RecordingEvents>,
    pub home: RegionDescriptor,
    pub east: RegionDescriptor,
    pub far: RegionDescriptor,
    pub agent: AgentId,
}

pub fn region(name: &str, loc_x: u32, loc_y: u32, port: u16) -> RegionDescriptor {
    let endpoint: SocketAddr = ([127, 0, 0, 1], port).into();
    RegionDescriptor::new(RegionId::generate(), name, loc_x, loc_y).with_endpoint(endpoint)
}

impl Harness {
    pub fn new() -> Self {
        Self::with_options(Options::default())
    }

    pub fn with_config(config: TransferConfig) -> Self {
        Self::with_options(Options {
            config,
            ..Options::default()
        })
    }

    pub fn with_options(options: Options) -> Self {
        let home = region("Home", 1000, 1000, 9000);
        let east = region("East", 1001, 1000, 9001);
        let far = region("Far", 1010, 1000, 9010);

        let grid = Arc::new(MockGrid::new());
        grid.add_region(home.clone());
        grid.add_region(east.clone());
        grid.add_region(far.clone());

        let agent = AgentId::generate();
        let scene = Arc::new(MockScene::new());
        scene.add_agent(AgentView::new(agent, "Traveller", options.agent_position));

        let sim = Arc::new(MockSimulation::new());
        let notifier = Arc::new(RecordingNotifier::new());
        let events = Arc::new(RecordingEvents::new());

        let mut local = LocalRegion::new(home.clone());
        if let Some(point) = options.landing_point {
            local = local.with_landing_point(point);
        }

        let service = EntityTransferServiceBuilder::new(local)
            .with_config(options.config)
            .with_scene(scene.clone())
            .with_simulation(sim.clone())
            .with_grid(grid.clone())
            .with_notifier(notifier.clone())
            .with_events(events.clone())
            .with_authorizer(Arc::new(options.authorizer))
            .build()
            .expect("service builds");

        Self {
            service,
            scene,
            sim,
            grid,
            notifier,
            events,
            home,
            east,
            far,
            agent,
        }
    }

    pub fn view(&self) -> AgentView {
        use transit_core::SceneAgents;
        self.scene.agent(self.agent).expect("agent in scene")
    }

    pub fn view_gone(&self) -> bool {
        use transit_core::SceneAgents;
        self.scene.agent(self.agent).is_none()
    }

    /// The destination confirms arrival as soon as the client is sent there.
    pub fn confirm_on_finish(&self) {
        let tracker = Arc::clone(self.service.tracker());
        self.notifier.on_teleport_finish(Arc::new(move |agent| {
            tracker.set_phase(agent, TransferPhase::ReceivedAtDestination);
        }));
    }

    /// The destination releases the source as soon as update-agent lands.
    pub fn release_on_update(&self) {
        let tracker = Arc::clone(self.service.tracker());
        self.sim.on_update(Arc::new(move |agent| {
            tracker.set_phase(agent, TransferPhase::ReceivedAtDestination);
        }));
    }
}
