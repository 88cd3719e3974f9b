//! Per-body tick cache
//!
//! Every body owns a flat `Vec<f64>` holding one fixed-width snapshot per
//! tick between its birth and its death (or the latest computed tick):
//!
//! ```text
//! [mass, pos.x, pos.y, vel.x, vel.y, link, mass, pos.x, ...]
//!  ^ birth_tick                            ^ birth_tick + 1
//! ```
//!
//! The snapshot for tick `t` starts at `(t - birth_tick) * 6`. The cache is
//! append-only while the worker runs and is only shortened by the two trim
//! operations, which keep `birth_tick`/`death_tick` consistent with the data.

use super::params::{CACHED_VALUES_PER_TICK, NO_LINK, NUMBER_SIZE};
use super::states::{BodyId, NVec2, Tick};

/// One body's state at one tick
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct CachedState {
    pub mass: f64,
    pub pos: NVec2,
    pub vel: NVec2,
    pub link: Option<BodyId>,
}

impl CachedState {
    /// Flatten into the cached value layout
    pub fn to_values(&self) -> [f64; CACHED_VALUES_PER_TICK] {
        [
            self.mass,
            self.pos.x,
            self.pos.y,
            self.vel.x,
            self.vel.y,
            encode_link(self.link),
        ]
    }

    /// Rebuild from a slice in the cached value layout
    pub fn from_values(values: &[f64]) -> Self {
        Self {
            mass: values[0],
            pos: NVec2::new(values[1], values[2]),
            vel: NVec2::new(values[3], values[4]),
            link: decode_link(values[5]),
        }
    }

    /// Zero mass snapshots mark the tick a body was destroyed on
    pub fn exists(&self) -> bool {
        self.mass > 0.0
    }
}

pub fn encode_link(link: Option<BodyId>) -> f64 {
    link.map_or(NO_LINK, |id| id as f64)
}

pub fn decode_link(value: f64) -> Option<BodyId> {
    if value < 0.0 || !value.is_finite() {
        None
    } else {
        Some(value as BodyId)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct BodyCache {
    data: Vec<f64>,
    birth_tick: Tick,
    death_tick: Option<Tick>,
}

impl BodyCache {
    /// Cache holding a single snapshot at `birth_tick`
    pub fn new(birth_tick: Tick, initial: &CachedState) -> Self {
        let mut cache = Self::empty(birth_tick);
        cache.push(initial);
        cache
    }

    /// Cache for a body whose first snapshot has not arrived yet
    pub fn empty(birth_tick: Tick) -> Self {
        Self {
            data: Vec::new(),
            birth_tick,
            death_tick: None,
        }
    }

    pub fn birth_tick(&self) -> Tick {
        self.birth_tick
    }

    pub fn death_tick(&self) -> Option<Tick> {
        self.death_tick
    }

    pub fn data(&self) -> &[f64] {
        &self.data
    }

    /// Number of ticks stored
    pub fn len_ticks(&self) -> usize {
        self.data.len() / CACHED_VALUES_PER_TICK
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    /// Last tick that has a snapshot
    pub fn last_tick(&self) -> Option<Tick> {
        match self.len_ticks() {
            0 => None,
            n => Some(self.birth_tick + n as Tick - 1),
        }
    }

    /// Memory used by the snapshots
    pub fn bytes(&self) -> usize {
        self.data.len() * NUMBER_SIZE
    }

    fn index(&self, tick: Tick) -> Option<usize> {
        if tick < self.birth_tick {
            return None;
        }
        let index = (tick - self.birth_tick) as usize * CACHED_VALUES_PER_TICK;
        (index + CACHED_VALUES_PER_TICK <= self.data.len()).then_some(index)
    }

    /// Snapshot at `tick`, or `None` if the body has no entry there
    pub fn read(&self, tick: Tick) -> Option<CachedState> {
        let i = self.index(tick)?;
        Some(CachedState::from_values(&self.data[i..i + CACHED_VALUES_PER_TICK]))
    }

    pub(crate) fn push(&mut self, state: &CachedState) {
        self.data.extend_from_slice(&state.to_values());
    }

    pub(crate) fn push_values(&mut self, values: &[f64]) {
        debug_assert_eq!(values.len(), CACHED_VALUES_PER_TICK);
        self.data.extend_from_slice(values);
    }

    /// Overwrite an existing snapshot. Returns false if `tick` has none
    pub(crate) fn write(&mut self, tick: Tick, state: &CachedState) -> bool {
        match self.index(tick) {
            Some(i) => {
                self.data[i..i + CACHED_VALUES_PER_TICK].copy_from_slice(&state.to_values());
                true
            }
            None => false,
        }
    }

    pub(crate) fn set_death_tick(&mut self, tick: Tick) {
        self.death_tick = Some(tick);
    }

    /// Drop every snapshot after `tick`
    ///
    /// Returns false when the body was born after `tick` and should be
    /// forgotten entirely. A death after `tick` is undone
    pub(crate) fn clear_after(&mut self, tick: Tick) -> bool {
        if self.birth_tick > tick {
            return false;
        }

        let end = self.death_tick.map_or(tick, |death| death.min(tick));
        let keep = (end - self.birth_tick + 1) as usize * CACHED_VALUES_PER_TICK;
        self.data.truncate(keep);

        if matches!(self.death_tick, Some(death) if death > tick) {
            self.death_tick = None;
        }
        true
    }

    /// Drop every snapshot before `tick`
    ///
    /// Returns false when the body died before `tick` and should be
    /// forgotten entirely
    pub(crate) fn clear_before(&mut self, tick: Tick) -> bool {
        if matches!(self.death_tick, Some(death) if death < tick) {
            return false;
        }

        if self.birth_tick < tick {
            let count = ((tick - self.birth_tick) as usize * CACHED_VALUES_PER_TICK)
                .min(self.data.len());
            self.data.drain(..count);
            self.birth_tick = tick;
        }
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn state(mass: f64, x: f64) -> CachedState {
        CachedState {
            mass,
            pos: NVec2::new(x, 0.0),
            vel: NVec2::zeros(),
            link: None,
        }
    }

    fn cache_with_ticks(birth: Tick, count: usize) -> BodyCache {
        let mut cache = BodyCache::new(birth, &state(10.0, 0.0));
        for i in 1..count {
            cache.push(&state(10.0, i as f64));
        }
        cache
    }

    #[test]
    fn read_is_indexed_from_birth_tick() {
        let cache = cache_with_ticks(5, 4);
        assert!(cache.read(4).is_none());
        assert_eq!(cache.read(5).unwrap().pos.x, 0.0);
        assert_eq!(cache.read(8).unwrap().pos.x, 3.0);
        assert!(cache.read(9).is_none());
        assert_eq!(cache.last_tick(), Some(8));
    }

    #[test]
    fn link_round_trips_through_values() {
        let mut s = state(3.0, 1.0);
        s.link = Some(7);
        assert_eq!(CachedState::from_values(&s.to_values()), s);
        assert_eq!(decode_link(NO_LINK), None);
    }

    #[test]
    fn clear_after_resurrects_late_death() {
        let mut cache = cache_with_ticks(0, 6);
        cache.set_death_tick(5);

        assert!(cache.clear_after(3));
        assert_eq!(cache.len_ticks(), 4);
        assert_eq!(cache.death_tick(), None);
    }

    #[test]
    fn clear_after_keeps_early_death() {
        let mut cache = cache_with_ticks(0, 3);
        cache.set_death_tick(2);

        assert!(cache.clear_after(8));
        assert_eq!(cache.len_ticks(), 3);
        assert_eq!(cache.death_tick(), Some(2));
    }

    #[test]
    fn clear_after_birth_drops_body() {
        let mut cache = cache_with_ticks(4, 2);
        assert!(!cache.clear_after(3));
    }

    #[test]
    fn clear_before_moves_birth_tick() {
        let mut cache = cache_with_ticks(2, 5);
        assert!(cache.clear_before(4));
        assert_eq!(cache.birth_tick(), 4);
        assert_eq!(cache.len_ticks(), 3);
        assert_eq!(cache.read(4).unwrap().pos.x, 2.0);
    }

    #[test]
    fn clear_before_death_drops_body() {
        let mut cache = cache_with_ticks(0, 3);
        cache.set_death_tick(2);
        assert!(!cache.clear_before(3));
    }
}
