//! Static scenery: obstacles, roads, destinations and traffic lights.
//!
//! These are placed once per id and never interpolated. Traffic lights also
//! carry a signal state that is pushed to the renderer when it changes.

use std::collections::HashMap;

use tracing::debug;
use traffic_shared::{
    net::EntitySnapshot,
    render::{EntityKind, RenderHandle, RenderLayer},
};

#[derive(Debug, Clone, Copy, PartialEq)]
struct Prop {
    handle: RenderHandle,
    signal: Option<bool>,
}

/// Placed static props keyed by kind and id.
#[derive(Debug, Default)]
pub struct StaticScene {
    props: HashMap<(EntityKind, String), Prop>,
}

impl StaticScene {
    pub fn new() -> Self {
        Self::default()
    }

    /// Places unseen ids and forwards signal changes. Returns how many props were placed.
    pub fn apply<R: RenderLayer + ?Sized>(
        &mut self,
        kind: EntityKind,
        batch: &[EntitySnapshot],
        render: &mut R,
    ) -> usize {
        let mut placed = 0;
        for snap in batch {
            let prop = self
                .props
                .entry((kind, snap.id.clone()))
                .or_insert_with(|| {
                    placed += 1;
                    Prop {
                        handle: render.spawn(&snap.id, kind, snap.position),
                        signal: None,
                    }
                });
            if let Some(green) = snap.state {
                if prop.signal != Some(green) {
                    debug!(id = %snap.id, green, "Signal changed");
                    render.set_signal(prop.handle, green);
                    prop.signal = Some(green);
                }
            }
        }
        placed
    }

    pub fn count(&self, kind: EntityKind) -> usize {
        self.props.keys().filter(|(k, _)| *k == kind).count()
    }

    pub fn len(&self) -> usize {
        self.props.len()
    }

    pub fn is_empty(&self) -> bool {
        self.props.is_empty()
    }

    pub fn signal(&self, id: &str) -> Option<bool> {
        self.props
            .get(&(EntityKind::TrafficLight, id.to_string()))
            .and_then(|p| p.signal)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use traffic_shared::{math::Vec3, render::RecordingRenderer};

    fn prop(id: &str, state: Option<bool>) -> EntitySnapshot {
        EntitySnapshot {
            id: id.to_string(),
            position: Vec3::new(1.0, 1.0, 2.0),
            destination: (1.0, 2.0),
            state,
        }
    }

    #[test]
    fn props_are_placed_once() {
        let mut scene = StaticScene::new();
        let mut render = RecordingRenderer::new();
        let batch = [prop("ob_1", None), prop("ob_2", None)];
        assert_eq!(scene.apply(EntityKind::Obstacle, &batch, &mut render), 2);
        assert_eq!(scene.apply(EntityKind::Obstacle, &batch, &mut render), 0);
        assert_eq!(scene.count(EntityKind::Obstacle), 2);
        assert_eq!(render.live_of_kind(EntityKind::Obstacle), 2);
    }

    #[test]
    fn same_id_different_kind_is_distinct() {
        let mut scene = StaticScene::new();
        let mut render = RecordingRenderer::new();
        scene.apply(EntityKind::Road, &[prop("x", None)], &mut render);
        scene.apply(EntityKind::Destination, &[prop("x", None)], &mut render);
        assert_eq!(scene.len(), 2);
    }

    #[test]
    fn signal_changes_are_forwarded() {
        let mut scene = StaticScene::new();
        let mut render = RecordingRenderer::new();
        scene.apply(EntityKind::TrafficLight, &[prop("tl_1", Some(false))], &mut render);
        let (handle, obj) = render.find("tl_1").unwrap();
        assert_eq!(obj.signal, Some(false));

        scene.apply(EntityKind::TrafficLight, &[prop("tl_1", Some(true))], &mut render);
        assert_eq!(render.get(handle).unwrap().signal, Some(true));
        assert_eq!(scene.signal("tl_1"), Some(true));
        assert_eq!(render.spawned_total(), 1);
    }
}
