//! Rendering abstraction.
//!
//! This crate intentionally does not depend on a graphics backend.
//! The core only talks to a renderer through `RenderLayer`.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

use crate::math::Vec3;

/// Opaque handle to a renderer-owned object.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct RenderHandle(pub u64);

/// What a spawned object represents.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum EntityKind {
    Car,
    Obstacle,
    TrafficLight,
    Road,
    Destination,
}

/// Capabilities the visualizer needs from a renderer.
pub trait RenderLayer: Send {
    /// Creates an object for `id` placed at `at`.
    fn spawn(&mut self, id: &str, kind: EntityKind, at: Vec3) -> RenderHandle;
    /// Releases the object and all of its children.
    fn despawn(&mut self, handle: RenderHandle);
    /// Writes the object's displacement and facing for this frame.
    fn set_pose(&mut self, handle: RenderHandle, displacement: Vec3, facing: Vec3);
    /// Replaces the world-space vertices of mesh `part` (0 is the root).
    fn write_part(&mut self, handle: RenderHandle, part: usize, vertices: &[Vec3], normals: &[Vec3]);
    /// Shows a traffic light as green (`true`) or red.
    fn set_signal(&mut self, handle: RenderHandle, green: bool);
}

/// Last known state of one object in a `RecordingRenderer`.
#[derive(Debug, Clone, PartialEq)]
pub struct RecordedObject {
    pub id: String,
    pub kind: EntityKind,
    pub displacement: Vec3,
    pub facing: Vec3,
    pub signal: Option<bool>,
    /// Last vertex buffer written per part.
    pub parts: HashMap<usize, Vec<Vec3>>,
}

/// Headless renderer that records what it was told.
#[derive(Debug, Default)]
pub struct RecordingRenderer {
    next: u64,
    live: HashMap<RenderHandle, RecordedObject>,
    spawned: u64,
    despawned: HashMap<RenderHandle, u32>,
    /// Writes aimed at handles that are not live.
    pub stray_writes: u64,
}

impl RecordingRenderer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn live_count(&self) -> usize {
        self.live.len()
    }

    pub fn live_of_kind(&self, kind: EntityKind) -> usize {
        self.live.values().filter(|o| o.kind == kind).count()
    }

    pub fn spawned_total(&self) -> u64 {
        self.spawned
    }

    /// How many times `handle` was despawned.
    pub fn despawn_count(&self, handle: RenderHandle) -> u32 {
        self.despawned.get(&handle).copied().unwrap_or(0)
    }

    pub fn get(&self, handle: RenderHandle) -> Option<&RecordedObject> {
        self.live.get(&handle)
    }

    /// Finds a live object by entity id.
    pub fn find(&self, id: &str) -> Option<(RenderHandle, &RecordedObject)> {
        self.live
            .iter()
            .find(|(_, o)| o.id == id)
            .map(|(h, o)| (*h, o))
    }
}

impl RenderLayer for RecordingRenderer {
    fn spawn(&mut self, id: &str, kind: EntityKind, at: Vec3) -> RenderHandle {
        self.next += 1;
        self.spawned += 1;
        let handle = RenderHandle(self.next);
        self.live.insert(
            handle,
            RecordedObject {
                id: id.to_string(),
                kind,
                displacement: at,
                facing: Vec3::FORWARD,
                signal: None,
                parts: HashMap::new(),
            },
        );
        handle
    }

    fn despawn(&mut self, handle: RenderHandle) {
        self.live.remove(&handle);
        *self.despawned.entry(handle).or_default() += 1;
    }

    fn set_pose(&mut self, handle: RenderHandle, displacement: Vec3, facing: Vec3) {
        match self.live.get_mut(&handle) {
            Some(obj) => {
                obj.displacement = displacement;
                obj.facing = facing;
            }
            None => self.stray_writes += 1,
        }
    }

    fn write_part(&mut self, handle: RenderHandle, part: usize, vertices: &[Vec3], _normals: &[Vec3]) {
        match self.live.get_mut(&handle) {
            Some(obj) => {
                obj.parts.insert(part, vertices.to_vec());
            }
            None => self.stray_writes += 1,
        }
    }

    fn set_signal(&mut self, handle: RenderHandle, green: bool) {
        match self.live.get_mut(&handle) {
            Some(obj) => obj.signal = Some(green),
            None => self.stray_writes += 1,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn recording_renderer_tracks_lifecycle() {
        let mut r = RecordingRenderer::new();
        let a = r.spawn("car1", EntityKind::Car, Vec3::ZERO);
        let b = r.spawn("tl_1", EntityKind::TrafficLight, Vec3::new(1.0, 0.0, 0.0));
        assert_ne!(a, b);
        assert_eq!(r.live_count(), 2);

        r.set_signal(b, true);
        assert_eq!(r.get(b).unwrap().signal, Some(true));

        r.despawn(a);
        assert_eq!(r.live_count(), 1);
        assert_eq!(r.despawn_count(a), 1);
        assert!(r.find("car1").is_none());

        r.set_pose(a, Vec3::ZERO, Vec3::FORWARD);
        assert_eq!(r.stray_writes, 1);
    }
}
