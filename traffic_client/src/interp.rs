//! Interpolation.
//!
//! The authority reports discrete snapshots once per poll cycle.
//! The client renders at its own rate and interpolates every Active entity
//! between its previous and current snapshot using one shared progress value.

use traffic_shared::{config::ProgressPolicy, math::Vec3, render::RenderHandle};

use crate::lifecycle::EntityTable;

/// Countdown over one poll period.
///
/// `begin_cycle` resets to the full period and freezes the countdown until
/// the cycle's batch is committed.
#[derive(Debug, Clone)]
pub struct SimClock {
    period: f32,
    remaining: f32,
    committed: bool,
}

impl SimClock {
    pub fn new(period_secs: f32) -> Self {
        let period = period_secs.max(f32::EPSILON);
        Self {
            period,
            remaining: period,
            committed: false,
        }
    }

    pub fn period(&self) -> f32 {
        self.period
    }

    pub fn remaining(&self) -> f32 {
        self.remaining
    }

    pub fn begin_cycle(&mut self) {
        self.remaining = self.period;
        self.committed = false;
    }

    /// Starts the countdown once fresh snapshots are in the table.
    pub fn commit(&mut self) {
        self.committed = true;
    }

    pub fn is_committed(&self) -> bool {
        self.committed
    }

    pub fn advance(&mut self, dt: f32) {
        if self.committed {
            self.remaining -= dt;
        }
    }

    /// `1 - remaining / period`, shaped by `policy`.
    pub fn progress(&self, policy: ProgressPolicy) -> f32 {
        let raw = 1.0 - self.remaining / self.period;
        match policy {
            ProgressPolicy::Clamp => raw.clamp(0.0, 1.0),
            ProgressPolicy::Overshoot { limit } => raw.clamp(0.0, 1.0 + limit.max(0.0)),
        }
    }
}

/// Smoothed state of one entity for the current frame.
#[derive(Debug, Clone, PartialEq)]
pub struct RenderState<'a> {
    pub id: &'a str,
    pub handle: RenderHandle,
    pub position: Vec3,
    pub direction: Vec3,
}

/// Interpolates every Active entity at `progress`, ordered by id.
///
/// `progress` is used as given; values above 1 extrapolate along the last
/// displacement.
pub fn interpolate(table: &EntityTable, progress: f32) -> Vec<RenderState<'_>> {
    let mut out: Vec<RenderState<'_>> = table
        .iter()
        .filter(|e| e.is_active())
        .map(|e| RenderState {
            id: e.id.as_str(),
            handle: e.handle,
            position: e.previous.lerp_unclamped(e.current, progress),
            direction: e.direction,
        })
        .collect();
    out.sort_by(|a, b| a.id.cmp(b.id));
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use traffic_shared::{net::EntitySnapshot, render::RecordingRenderer};

    fn car(id: &str, x: f32, z: f32) -> EntitySnapshot {
        EntitySnapshot {
            id: id.to_string(),
            position: Vec3::new(x, 0.0, z),
            destination: (5.0, 5.0),
            state: None,
        }
    }

    fn table_with(batches: &[&[EntitySnapshot]]) -> EntityTable {
        let mut table = EntityTable::new(None);
        let mut render = RecordingRenderer::new();
        for batch in batches {
            table.apply_batch(batch, &mut render);
        }
        table
    }

    #[test]
    fn scenario_midpoint() {
        let table = table_with(&[&[car("car1", 0.0, 0.0)], &[car("car1", 1.0, 1.0)]]);
        let states = interpolate(&table, 0.5);
        assert_eq!(states.len(), 1);
        assert_eq!(states[0].position, Vec3::new(0.5, 0.0, 0.5));
        assert_eq!(states[0].direction, Vec3::new(1.0, 0.0, 1.0));
    }

    #[test]
    fn boundaries_hit_snapshots_exactly() {
        let table = table_with(&[
            &[car("a", 0.0, 0.0), car("b", 3.0, -2.0)],
            &[car("a", 1.5, 0.25), car("b", 2.0, -1.0)],
        ]);
        for state in interpolate(&table, 0.0) {
            assert_eq!(state.position, table.get(state.id).unwrap().previous);
        }
        for state in interpolate(&table, 1.0) {
            assert_eq!(state.position, table.get(state.id).unwrap().current);
        }
    }

    #[test]
    fn pending_entities_are_not_interpolated() {
        let table = table_with(&[&[car("a", 0.0, 0.0)], &[car("a", 1.0, 0.0), car("b", 0.0, 0.0)]]);
        let ids: Vec<&str> = interpolate(&table, 0.5).iter().map(|s| s.id).collect();
        assert_eq!(ids, vec!["a"]);
    }

    #[test]
    fn output_is_ordered_by_id() {
        let table = table_with(&[
            &[car("c", 0.0, 0.0), car("a", 0.0, 0.0), car("b", 0.0, 0.0)],
            &[car("c", 1.0, 0.0), car("a", 1.0, 0.0), car("b", 1.0, 0.0)],
        ]);
        let ids: Vec<&str> = interpolate(&table, 0.5).iter().map(|s| s.id).collect();
        assert_eq!(ids, vec!["a", "b", "c"]);
    }

    #[test]
    fn clock_progress_follows_countdown() {
        let mut clock = SimClock::new(4.0);
        clock.advance(1.0);
        assert_eq!(clock.progress(ProgressPolicy::Clamp), 0.0, "frozen until commit");

        clock.commit();
        clock.advance(1.0);
        assert_eq!(clock.progress(ProgressPolicy::Clamp), 0.25);
        clock.advance(1.0);
        assert_eq!(clock.progress(ProgressPolicy::Clamp), 0.5);

        clock.begin_cycle();
        assert!(!clock.is_committed());
        assert_eq!(clock.remaining(), 4.0);
        assert_eq!(clock.progress(ProgressPolicy::Clamp), 0.0);
    }

    #[test]
    fn late_poll_clamps_by_default() {
        let mut clock = SimClock::new(2.0);
        clock.commit();
        clock.advance(3.0);
        assert_eq!(clock.progress(ProgressPolicy::Clamp), 1.0);

        let table = table_with(&[&[car("a", 0.0, 0.0)], &[car("a", 2.0, 0.0)]]);
        let states = interpolate(&table, clock.progress(ProgressPolicy::Clamp));
        assert_eq!(states[0].position, Vec3::new(2.0, 0.0, 0.0));
    }

    #[test]
    fn late_poll_overshoots_within_limit() {
        let policy = ProgressPolicy::Overshoot { limit: 0.25 };
        let mut clock = SimClock::new(2.0);
        clock.commit();
        clock.advance(2.25);
        assert_eq!(clock.progress(policy), 1.125);
        clock.advance(10.0);
        assert_eq!(clock.progress(policy), 1.25);

        let table = table_with(&[&[car("a", 0.0, 0.0)], &[car("a", 2.0, 0.0)]]);
        let states = interpolate(&table, clock.progress(policy));
        assert_eq!(states[0].position, Vec3::new(2.5, 0.0, 0.0));
    }
}
