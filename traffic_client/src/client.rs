//! Client implementation.
//!
//! The client maintains:
//! - The tracked car table (lifecycle) and the static scene
//! - The poll-cycle clock that drives interpolation progress
//! - One posed body per tracked car (compositor working buffers)
//! - The render layer everything is written to
//!
//! It is single-threaded: poll results arrive as `PollEvent`s and are applied
//! between frames, so frames always see the last committed state.

use std::{collections::HashMap, sync::Arc};

use tracing::{debug, info, warn};
use traffic_shared::{
    config::{ClientConfig, ProgressPolicy},
    geometry::{BodyGeometry, Mesh},
    math::Vec3,
    render::RenderLayer,
};

use crate::{
    compositor::{Compositor, Pose, PosedBody},
    interp::{interpolate, SimClock},
    lifecycle::{EntityTable, TrackError},
    poller::PollEvent,
    scene::StaticScene,
};

/// Half extents of the stand-in chassis used when no model is supplied.
const CHASSIS_HALF_EXTENTS: Vec3 = Vec3::new(0.6, 0.4, 1.2);

/// Client connection state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ClientStatus {
    /// Waiting for the configuration exchange.
    Configuring,
    /// Configuration accepted, snapshots flowing.
    Polling,
    /// Configuration failed; no snapshots will arrive.
    Halted,
}

/// High-level visualizer client.
pub struct VisualizationClient<R: RenderLayer> {
    pub render: R,
    status: ClientStatus,
    table: EntityTable,
    scene: StaticScene,
    clock: SimClock,
    policy: ProgressPolicy,
    compositor: Compositor,
    bodies: HashMap<String, PosedBody>,
    display_offset: Vec3,
    elapsed: f32,
    /// Progress of the last committed frame; held while a cycle is frozen.
    held_progress: f32,
    frames: u64,
}

impl<R: RenderLayer> VisualizationClient<R> {
    pub fn new(cfg: &ClientConfig, geometry: BodyGeometry, render: R) -> Self {
        Self {
            render,
            status: ClientStatus::Configuring,
            table: EntityTable::new(cfg.missing_batch_limit),
            scene: StaticScene::new(),
            clock: SimClock::new(cfg.poll_period_secs),
            policy: cfg.progress_policy,
            compositor: Compositor::new(Arc::new(geometry), cfg.body.scale),
            bodies: HashMap::new(),
            display_offset: cfg.body.display_offset,
            elapsed: 0.0,
            held_progress: 0.0,
            frames: 0,
        }
    }

    /// Client with the stock four-wheeled vehicle built from `cfg.body`.
    pub fn with_vehicle(cfg: &ClientConfig, render: R) -> Self {
        let body = &cfg.body;
        let geometry = BodyGeometry::vehicle(
            Mesh::cuboid(CHASSIS_HALF_EXTENTS),
            Mesh::wheel(body.wheel_sides, body.wheel_radius, body.wheel_width),
            body.spin_rate,
            body.spin_axis,
        );
        Self::new(cfg, geometry, render)
    }

    pub fn status(&self) -> ClientStatus {
        self.status
    }

    pub fn table(&self) -> &EntityTable {
        &self.table
    }

    pub fn scene(&self) -> &StaticScene {
        &self.scene
    }

    pub fn clock(&self) -> &SimClock {
        &self.clock
    }

    pub fn frames(&self) -> u64 {
        self.frames
    }

    /// Interpolation progress of the last frame.
    pub fn progress(&self) -> f32 {
        self.held_progress
    }

    /// Posed buffers of a tracked car.
    pub fn body(&self, id: &str) -> Option<&PosedBody> {
        self.bodies.get(id)
    }

    /// Applies one poll result.
    pub fn handle_event(&mut self, event: PollEvent) {
        match event {
            PollEvent::Started => {
                info!("Polling started");
                self.status = ClientStatus::Polling;
            }
            PollEvent::ConfigFailed(error) => {
                warn!(error = %error, "Configuration failed; showing last state only");
                self.status = ClientStatus::Halted;
            }
            PollEvent::CycleStarted { cycle } => {
                debug!(cycle, "Poll cycle started");
                self.clock.begin_cycle();
            }
            PollEvent::StepFailed { cycle, error } => {
                warn!(cycle, error = %error, "Authority did not step; keeping last state");
            }
            PollEvent::Batch {
                cycle,
                kind,
                result: Ok(batch),
            } => {
                if kind.is_movable() {
                    self.apply_cars(cycle, &batch);
                } else {
                    let placed = self.scene.apply(kind.entity_kind(), &batch, &mut self.render);
                    if placed > 0 {
                        info!(?kind, placed, "Static props placed");
                    }
                }
            }
            PollEvent::Batch {
                cycle,
                kind,
                result: Err(error),
            } => {
                warn!(cycle, ?kind, error = %error, "Poll failed; keeping last state");
            }
        }
    }

    fn apply_cars(&mut self, cycle: u64, batch: &[traffic_shared::net::EntitySnapshot]) {
        let report = self.table.apply_batch(batch, &mut self.render);
        for id in &report.spawned {
            self.bodies.insert(id.clone(), self.compositor.new_body());
        }
        for id in report.removed() {
            self.bodies.remove(id);
        }
        self.clock.commit();
        debug!(
            cycle,
            cars = batch.len(),
            spawned = report.spawned.len(),
            arrived = report.arrived.len(),
            expired = report.expired.len(),
            tracked = self.table.len(),
            "Car batch applied"
        );
    }

    /// Renders one frame. Returns how many cars were drawn.
    ///
    /// While the clock is frozen positions hold at the last progress, but
    /// bodies are still composed so parts keep spinning.
    pub fn frame(&mut self, dt: f32) -> usize {
        self.elapsed += dt;
        self.frames += 1;
        if self.clock.is_committed() {
            self.clock.advance(dt);
            self.held_progress = self.clock.progress(self.policy);
        }
        let progress = self.held_progress;

        let mut drawn = 0;
        for state in interpolate(&self.table, progress) {
            let Some(body) = self.bodies.get_mut(state.id) else {
                warn!(error = %TrackError::UnknownId(state.id.to_string()), "No body buffers; skipping");
                continue;
            };
            let pose = Pose::new(state.position + self.display_offset, state.direction, self.elapsed);
            self.compositor.compose(&pose, body);

            self.render.set_pose(state.handle, pose.displacement, state.direction);
            for (part, mesh) in body.meshes.iter().enumerate() {
                self.render
                    .write_part(state.handle, part, &mesh.vertices, &mesh.normals);
            }
            drawn += 1;
        }
        drawn
    }
}
