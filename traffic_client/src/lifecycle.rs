//! Entity lifecycle.
//!
//! Reconciles car snapshot batches into the tracked entity table:
//! first sighting spawns (Pending), the second activates, reaching the
//! destination despawns and forgets the id entirely.

use std::collections::{HashMap, HashSet};

use thiserror::Error;
use tracing::{debug, info, warn};
use traffic_shared::{
    math::Vec3,
    net::EntitySnapshot,
    render::{EntityKind, RenderHandle, RenderLayer},
};

/// Errors raised while tracking entities. None of them abort a batch.
#[derive(Debug, Clone, Error, PartialEq)]
pub enum TrackError {
    #[error("unknown entity id `{0}`")]
    UnknownId(String),
}

/// Where an entity is in its lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LifecycleState {
    /// Seen once; only one position known.
    Pending,
    /// Seen at least twice; interpolated every frame.
    Active,
    /// Reached its destination. Only ever observed on values handed back by removal.
    Removed,
}

/// Client-side record for one id.
#[derive(Debug, Clone, PartialEq)]
pub struct TrackedEntity {
    pub id: String,
    pub previous: Vec3,
    pub current: Vec3,
    /// Last non-zero displacement. Never zero.
    pub direction: Vec3,
    pub destination: (f32, f32),
    pub state: LifecycleState,
    pub handle: RenderHandle,
    missed_batches: u32,
}

impl TrackedEntity {
    fn pending(snap: &EntitySnapshot, handle: RenderHandle) -> Self {
        Self {
            id: snap.id.clone(),
            previous: snap.position,
            current: snap.position,
            direction: Vec3::FORWARD,
            destination: snap.destination,
            state: LifecycleState::Pending,
            handle,
            missed_batches: 0,
        }
    }

    pub fn is_active(&self) -> bool {
        self.state == LifecycleState::Active
    }

    fn at_destination(&self) -> bool {
        self.current.x == self.destination.0 && self.current.z == self.destination.1
    }
}

/// Outcome of one batch.
#[derive(Debug, Default, Clone, PartialEq)]
pub struct ApplyReport {
    pub spawned: Vec<String>,
    pub activated: Vec<String>,
    /// Removed because they reached their destination.
    pub arrived: Vec<String>,
    /// Removed because they went missing for too many batches.
    pub expired: Vec<String>,
}

impl ApplyReport {
    /// Every id whose state was deleted by this batch.
    pub fn removed(&self) -> impl Iterator<Item = &String> {
        self.arrived.iter().chain(self.expired.iter())
    }
}

/// Mapping from stable id to tracked entity.
#[derive(Debug, Default)]
pub struct EntityTable {
    entities: HashMap<String, TrackedEntity>,
    missing_batch_limit: Option<u32>,
}

impl EntityTable {
    /// `missing_batch_limit`: consecutive batches an id may be absent before
    /// it is dropped. `None` removes on destination only. Config rejects 0;
    /// passed directly it drops an id on its first missing batch, like 1.
    pub fn new(missing_batch_limit: Option<u32>) -> Self {
        Self {
            entities: HashMap::new(),
            missing_batch_limit,
        }
    }

    pub fn len(&self) -> usize {
        self.entities.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entities.is_empty()
    }

    pub fn get(&self, id: &str) -> Option<&TrackedEntity> {
        self.entities.get(id)
    }

    pub fn contains(&self, id: &str) -> bool {
        self.entities.contains_key(id)
    }

    pub fn iter(&self) -> impl Iterator<Item = &TrackedEntity> {
        self.entities.values()
    }

    /// Reconciles one car batch against the table.
    pub fn apply_batch<R: RenderLayer + ?Sized>(
        &mut self,
        batch: &[EntitySnapshot],
        render: &mut R,
    ) -> ApplyReport {
        let mut report = ApplyReport::default();
        let mut seen: HashSet<&str> = HashSet::with_capacity(batch.len());

        for snap in batch {
            seen.insert(snap.id.as_str());

            if !self.entities.contains_key(&snap.id) {
                if snap.at_destination() {
                    debug!(id = %snap.id, "First sighting already at destination; not tracked");
                    continue;
                }
                let handle = render.spawn(&snap.id, EntityKind::Car, snap.position);
                self.entities
                    .insert(snap.id.clone(), TrackedEntity::pending(snap, handle));
                debug!(id = %snap.id, ?handle, "Entity spawned");
                report.spawned.push(snap.id.clone());
                continue;
            }

            match self.advance(&snap.id, snap.position, snap.destination) {
                Ok(true) => report.activated.push(snap.id.clone()),
                Ok(false) => {}
                Err(e) => {
                    warn!(error = %e, "Skipping position update");
                    continue;
                }
            }

            let arrived = self
                .entities
                .get(&snap.id)
                .is_some_and(TrackedEntity::at_destination);
            if arrived && self.remove(&snap.id, render).is_some() {
                info!(id = %snap.id, "Entity reached destination");
                report.arrived.push(snap.id.clone());
            }
        }

        if let Some(limit) = self.missing_batch_limit {
            report.expired = self.expire_missing(&seen, limit, render);
        }

        report
    }

    /// Shifts current into previous and records the new position.
    ///
    /// Returns whether the entity just became Active.
    pub fn advance(
        &mut self,
        id: &str,
        position: Vec3,
        destination: (f32, f32),
    ) -> Result<bool, TrackError> {
        let entity = self
            .entities
            .get_mut(id)
            .ok_or_else(|| TrackError::UnknownId(id.to_string()))?;

        entity.previous = entity.current;
        entity.current = position;
        entity.destination = destination;
        entity.missed_batches = 0;

        let delta = entity.current - entity.previous;
        if !delta.is_zero() {
            entity.direction = delta;
        }

        let activated = entity.state == LifecycleState::Pending;
        entity.state = LifecycleState::Active;
        Ok(activated)
    }

    /// Despawns and forgets `id`. The returned record is marked Removed.
    pub fn remove<R: RenderLayer + ?Sized>(
        &mut self,
        id: &str,
        render: &mut R,
    ) -> Option<TrackedEntity> {
        let mut entity = self.entities.remove(id)?;
        render.despawn(entity.handle);
        entity.state = LifecycleState::Removed;
        Some(entity)
    }

    fn expire_missing<R: RenderLayer + ?Sized>(
        &mut self,
        seen: &HashSet<&str>,
        limit: u32,
        render: &mut R,
    ) -> Vec<String> {
        let mut expired = Vec::new();
        for entity in self.entities.values_mut() {
            if seen.contains(entity.id.as_str()) {
                continue;
            }
            entity.missed_batches += 1;
            if entity.missed_batches >= limit {
                expired.push(entity.id.clone());
            }
        }
        expired.sort();
        for id in &expired {
            if self.remove(id, render).is_some() {
                info!(id = %id, limit, "Entity missing from too many batches; removed");
            }
        }
        expired
    }
}
