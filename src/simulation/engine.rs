//! Host-side simulation
//!
//! `Simulation` owns the canonical timeline. It keeps every body's tick cache,
//! feeds living bodies to a worker, and appends whatever ticks the worker
//! sends back. The cursor (`current_tick`) can be moved anywhere inside
//! `[first_tick, last_tick]` independently of how far the worker got.
//!
//! - `run` / `stop` start and stop the worker
//! - `poll` / `wait` apply worker messages and dispatch events
//! - `run_until` and friends block until a condition holds
//! - `create_bodies` / `destroy_bodies` edit the timeline at a tick
//! - `clear_after_tick` / `clear_before_tick` evict cached history
//!
//! Time is a single linear tape: running or creating bodies at a tick before
//! `last_tick` discards every cached tick after it.

use std::collections::{BTreeMap, BTreeSet};

use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use super::cache::CachedState;
use super::events::{EventBus, ListenerId, SimulationEvent};
use super::params::{
    PhysicsSettings, CACHED_VALUES_PER_TICK, NUMBER_SIZE, ONE_MB,
    STREAM_VALUES_PER_BODY,
};
use super::states::{Body, BodyId, BodyProps, Tick};
use super::worker::{
    decode_id, FromWorker, InitMessage, TickMessage, ToWorker, WorkerBackend, WorkerHandle,
};
use crate::error::{SimError, SimResult};

/// Upper bound on worker messages applied by one `poll`
pub const MAX_MESSAGES_PER_POLL: usize = 64;

/// Bytes one body adds to the cache per tick
const BYTES_PER_BODY_TICK: usize = CACHED_VALUES_PER_TICK * NUMBER_SIZE;

pub struct Simulation {
    physics: PhysicsSettings,
    max_cache_bytes: usize,
    used_cache_bytes: usize, // sum of every body cache
    first_tick: Tick,
    current_tick: Tick, // cursor, first_tick <= current_tick <= last_tick
    last_tick: Tick,
    bodies: BTreeMap<BodyId, Body>,
    next_assign_id: BodyId,
    backend: WorkerBackend,
    worker: Option<Box<dyn WorkerHandle>>,
    running: bool,
    events: EventBus,
}

impl Simulation {
    /// New empty simulation with a cache ceiling in megabytes
    pub fn new(physics: PhysicsSettings, max_cache_mb: f64) -> SimResult<Self> {
        if !max_cache_mb.is_finite() || max_cache_mb <= 0.0 {
            return Err(SimError::InvalidSettings(format!(
                "max cache memory must be a number above zero, got {max_cache_mb}"
            )));
        }
        Self::with_max_cache_bytes(physics, (max_cache_mb * ONE_MB as f64) as usize)
    }

    pub fn with_max_cache_bytes(physics: PhysicsSettings, max_cache_bytes: usize) -> SimResult<Self> {
        physics.validate()?;
        if max_cache_bytes == 0 {
            return Err(SimError::InvalidSettings(
                "max cache memory must be above zero".into(),
            ));
        }

        Ok(Self {
            physics,
            max_cache_bytes,
            used_cache_bytes: 0,
            first_tick: 0,
            current_tick: 0,
            last_tick: 0,
            bodies: BTreeMap::new(),
            next_assign_id: 0,
            backend: WorkerBackend::default(),
            worker: None,
            running: false,
            events: EventBus::new(),
        })
    }

    /// Choose how workers are spawned for every later run
    pub fn with_backend(mut self, backend: WorkerBackend) -> Self {
        self.backend = backend;
        self
    }

    pub fn physics(&self) -> &PhysicsSettings {
        &self.physics
    }

    pub fn backend(&self) -> WorkerBackend {
        self.backend
    }

    pub fn first_tick(&self) -> Tick {
        self.first_tick
    }

    pub fn current_tick(&self) -> Tick {
        self.current_tick
    }

    pub fn last_tick(&self) -> Tick {
        self.last_tick
    }

    pub fn is_running(&self) -> bool {
        self.running
    }

    pub fn used_cache_bytes(&self) -> usize {
        self.used_cache_bytes
    }

    pub fn max_cache_bytes(&self) -> usize {
        self.max_cache_bytes
    }

    /// Used cache memory in megabytes
    pub fn used_cache_memory(&self) -> f64 {
        self.used_cache_bytes as f64 / ONE_MB as f64
    }

    /// Cache ceiling in megabytes
    pub fn max_cache_memory(&self) -> f64 {
        self.max_cache_bytes as f64 / ONE_MB as f64
    }

    pub fn next_assign_id(&self) -> BodyId {
        self.next_assign_id
    }

    // =========================================================================================
    // Bodies
    // =========================================================================================

    pub fn body(&self, id: BodyId) -> Option<&Body> {
        self.bodies.get(&id)
    }

    /// Live values can be edited at the current tick; the next `run` from
    /// the current tick writes them back into the cache
    pub fn body_mut(&mut self, id: BodyId) -> Option<&mut Body> {
        self.bodies.get_mut(&id)
    }

    /// Every cached body, alive or not at the current tick
    pub fn bodies(&self) -> impl Iterator<Item = &Body> + '_ {
        self.bodies.values()
    }

    /// Bodies that exist at the current tick
    pub fn living(&self) -> impl Iterator<Item = &Body> + '_ {
        self.bodies.values().filter(|body| body.exists())
    }

    pub fn num_bodies(&self) -> usize {
        self.living().count()
    }

    /// One body's cached state at any tick, without moving the cursor
    pub fn snapshot(&self, id: BodyId, tick: Tick) -> SimResult<Option<CachedState>> {
        let body = self.bodies.get(&id).ok_or(SimError::UnknownBody(id))?;
        Ok(body.cache().read(tick))
    }

    /// Create bodies at `tick` (default: the current tick)
    ///
    /// Cached ticks after `tick` are discarded. A running worker is restarted
    /// from `tick` with the new bodies included. If that restart fails the
    /// new bodies are removed again and the error is returned.
    pub fn create_bodies(
        &mut self,
        props: &[BodyProps],
        tick: Option<Tick>,
    ) -> SimResult<Vec<BodyId>> {
        let tick = tick.unwrap_or(self.current_tick);
        self.check_tick(tick)?;
        for prop in props {
            prop.validate()?;
        }

        let incoming = props.len() * BYTES_PER_BODY_TICK;
        if self.bytes_through(tick) + incoming > self.max_cache_bytes {
            return Err(SimError::CacheFull(tick));
        }

        let was_running = self.running;
        self.stop();
        if tick < self.last_tick {
            self.clear_after_tick(tick)?;
        }

        let first_id = self.next_assign_id;
        let mut ids = Vec::with_capacity(props.len());
        for prop in props {
            let id = self.next_assign_id;
            self.next_assign_id += 1;

            let mut body = Body::new(id, tick, prop);
            body.apply_tick(self.current_tick);
            self.used_cache_bytes += body.cache().bytes();
            self.bodies.insert(id, body);
            ids.push(id);
        }
        debug!(count = ids.len(), tick, "bodies created");

        if was_running {
            if let Err(e) = self.run(Some(tick)) {
                for id in &ids {
                    self.bodies.remove(id);
                }
                self.next_assign_id = first_id;
                self.recount_cache();
                warn!(error = %e, count = ids.len(), "restart failed, bodies not created");
                return Err(e);
            }
        }

        Ok(ids)
    }

    /// Destroy living bodies at `tick` (default: the current tick)
    ///
    /// Each body keeps its history up to `tick` and gets a zero mass snapshot
    /// there. Like `create_bodies`, later cached ticks are discarded and a
    /// running worker is restarted from `tick`, unless nothing is left alive.
    pub fn destroy_bodies(&mut self, ids: &[BodyId], tick: Option<Tick>) -> SimResult<()> {
        let tick = tick.unwrap_or(self.current_tick);
        self.check_tick(tick)?;
        for &id in ids {
            let body = self.bodies.get(&id).ok_or(SimError::UnknownBody(id))?;
            if !body.cache().read(tick).is_some_and(|state| state.exists()) {
                return Err(SimError::InvalidBody(format!(
                    "body {id} does not exist at tick {tick}"
                )));
            }
        }

        let was_running = self.running;
        self.stop();
        if tick < self.last_tick {
            self.clear_after_tick(tick)?;
        }

        for &id in ids {
            self.destroy_at(id, tick);
        }
        self.recount_cache();
        self.apply_current_tick();
        debug!(count = ids.len(), tick, "bodies destroyed");

        let any_alive = self
            .bodies
            .values()
            .any(|body| body.cache().read(tick).is_some_and(|state| state.exists()));
        if was_running && any_alive {
            self.run(Some(tick))?;
        }

        Ok(())
    }

    pub fn destroy_body(&mut self, id: BodyId, tick: Option<Tick>) -> SimResult<()> {
        self.destroy_bodies(&[id], tick)
    }

    pub fn create_body(&mut self, props: BodyProps, tick: Option<Tick>) -> SimResult<BodyId> {
        let ids = self.create_bodies(&[props], tick)?;
        ids.first()
            .copied()
            .ok_or_else(|| SimError::InvalidBody("no body was created".into()))
    }

    // =========================================================================================
    // Cursor and eviction
    // =========================================================================================

    /// Move the cursor and project every body's cached state onto its live fields
    pub fn set_current_tick(&mut self, tick: Tick) -> SimResult<()> {
        self.check_tick(tick)?;
        self.current_tick = tick;
        self.apply_current_tick();
        Ok(())
    }

    /// Discard every cached tick after `tick`
    ///
    /// Bodies born after `tick` are forgotten, deaths after `tick` are undone.
    pub fn clear_after_tick(&mut self, tick: Tick) -> SimResult<()> {
        self.check_tick(tick)?;
        if tick == self.last_tick {
            return Ok(());
        }

        self.stop();
        self.bodies.retain(|_, body| {
            if !body.cache_mut().clear_after(tick) {
                return false;
            }
            if body.cache().death_tick().is_none() {
                body.set_merge(None);
            }
            true
        });

        self.last_tick = tick;
        self.current_tick = self.current_tick.min(tick);
        self.recount_cache();
        self.apply_current_tick();
        debug!(tick, used_bytes = self.used_cache_bytes, "cleared ticks after");
        Ok(())
    }

    /// Discard every cached tick before `tick`
    ///
    /// Bodies that died before `tick` are forgotten.
    pub fn clear_before_tick(&mut self, tick: Tick) -> SimResult<()> {
        self.check_tick(tick)?;
        if tick == self.first_tick {
            return Ok(());
        }

        self.bodies.retain(|_, body| body.cache_mut().clear_before(tick));

        self.first_tick = tick;
        self.current_tick = self.current_tick.max(tick);
        self.recount_cache();
        self.apply_current_tick();
        debug!(tick, used_bytes = self.used_cache_bytes, "cleared ticks before");
        Ok(())
    }

    // =========================================================================================
    // Running
    // =========================================================================================

    /// Start the worker from `tick` (default: the current tick)
    ///
    /// Starting at the current tick picks up edits made through `body_mut`.
    /// A live mass of zero on a body that is cached alive destroys it there.
    /// Nothing is written unless the run actually starts.
    pub fn run(&mut self, tick: Option<Tick>) -> SimResult<()> {
        let tick = tick.unwrap_or(self.current_tick);
        self.check_tick(tick)?;
        self.stop();

        let live = tick == self.current_tick;
        let states: Vec<(BodyId, CachedState)> = self
            .bodies
            .values()
            .filter_map(|body| {
                let cached = body.cache().read(tick)?;
                // dead bodies cannot be revived by editing them
                let state = if live && cached.exists() { body.state() } else { cached };
                state.exists().then_some((body.id(), state))
            })
            .collect();

        if states.is_empty() {
            return Err(SimError::NoLivingBodies(tick));
        }

        let next_tick_bytes = states.len() * BYTES_PER_BODY_TICK;
        if self.bytes_through(tick) + next_tick_bytes > self.max_cache_bytes {
            warn!(tick, "cache is full, refusing to run");
            return Err(SimError::CacheFull(tick));
        }

        if live {
            self.write_live_state();
        }

        if tick < self.last_tick {
            self.clear_after_tick(tick)?;
        }

        let init = InitMessage::encode(
            &self.physics,
            self.next_assign_id,
            states.iter().map(|(id, state)| (*id, state)),
        );

        let mut worker = self.backend.spawn()?;
        worker.send(ToWorker::Init(init))?;
        self.worker = Some(worker);
        self.running = true;

        info!(tick, bodies = states.len(), "simulation running");
        Ok(())
    }

    /// Stop the worker. Safe to call at any time
    pub fn stop(&mut self) {
        if let Some(mut worker) = self.worker.take() {
            worker.terminate();
            debug!(last_tick = self.last_tick, "worker stopped");
        }
        self.running = false;
    }

    /// Apply every worker message that is ready, without blocking
    pub fn poll(&mut self) -> SimResult<Vec<SimulationEvent>> {
        let mut events = Vec::new();

        for _ in 0..MAX_MESSAGES_PER_POLL {
            if !self.running {
                break;
            }
            let received = match self.worker.as_mut() {
                Some(worker) => worker.try_recv(),
                None => break,
            };
            match received {
                Ok(Some(message)) => events.extend(self.handle_message(message)?),
                Ok(None) => break,
                Err(e) => return Err(self.fail(e)),
            }
        }

        Ok(events)
    }

    /// Block for the next worker message and apply it
    pub fn wait(&mut self) -> SimResult<Vec<SimulationEvent>> {
        if !self.running {
            return Err(SimError::NotRunning);
        }
        let received = match self.worker.as_mut() {
            Some(worker) => worker.recv(),
            None => return Err(SimError::NotRunning),
        };
        match received {
            Ok(message) => self.handle_message(message),
            Err(e) => Err(self.fail(e)),
        }
    }

    /// Run from `start_tick` (default: the current tick) until `condition`
    /// holds for a new tick
    ///
    /// Returns that tick. Fails with `CacheFull` if the cache ran out first.
    /// The worker is always stopped before returning.
    pub fn run_until<F>(&mut self, mut condition: F, start_tick: Option<Tick>) -> SimResult<Tick>
    where
        F: FnMut(&Simulation, Tick) -> bool,
    {
        self.run(start_tick)?;

        let result = 'ticks: loop {
            let events = match self.wait() {
                Ok(events) => events,
                Err(e) => break Err(e),
            };
            for event in events {
                match event {
                    SimulationEvent::Tick(tick) => {
                        if condition(self, tick) {
                            break 'ticks Ok(tick);
                        }
                    }
                    SimulationEvent::CacheFull(tick) => break 'ticks Err(SimError::CacheFull(tick)),
                }
            }
        };

        self.stop();
        result
    }

    pub fn run_for_num_ticks(&mut self, total_ticks: u64, start_tick: Option<Tick>) -> SimResult<Tick> {
        if total_ticks == 0 {
            return Err(SimError::InvalidArgument(
                "total ticks must be above zero".into(),
            ));
        }

        let mut ticks = 0;
        self.run_until(
            |_, _| {
                ticks += 1;
                ticks >= total_ticks
            },
            start_tick,
        )
    }

    pub fn run_for_one_tick(&mut self, start_tick: Option<Tick>) -> SimResult<Tick> {
        self.run_until(|_, _| true, start_tick)
    }

    pub fn subscribe<F>(&mut self, listener: F) -> ListenerId
    where
        F: FnMut(&SimulationEvent) + Send + 'static,
    {
        self.events.subscribe(listener)
    }

    pub fn unsubscribe(&mut self, id: ListenerId) -> bool {
        self.events.unsubscribe(id)
    }

    // =========================================================================================
    // Persistence
    // =========================================================================================

    /// Physics settings plus every living body at the current tick
    pub fn to_record(&self) -> SimulationRecord {
        SimulationRecord {
            physics: self.physics,
            max_cache_bytes: self.max_cache_bytes,
            bodies: self
                .living()
                .map(|body| BodyRecord {
                    id: body.id(),
                    mass: body.mass,
                    pos: [body.pos.x, body.pos.y],
                    vel: [body.vel.x, body.vel.y],
                })
                .collect(),
        }
    }

    pub fn to_json(&self) -> SimResult<String> {
        Ok(serde_json::to_string_pretty(&self.to_record())?)
    }

    /// New simulation starting at tick 0 with the recorded bodies, ids kept
    pub fn from_record(record: &SimulationRecord) -> SimResult<Self> {
        let mut simulation = Self::with_max_cache_bytes(record.physics, record.max_cache_bytes)?;

        for entry in &record.bodies {
            if simulation.bodies.contains_key(&entry.id) {
                return Err(SimError::InvalidBody(format!("duplicate body id {}", entry.id)));
            }
            let props = BodyProps {
                mass: entry.mass,
                pos: entry.pos,
                vel: entry.vel,
            };
            props.validate()?;

            let body = Body::new(entry.id, 0, &props);
            simulation.used_cache_bytes += body.cache().bytes();
            simulation.bodies.insert(entry.id, body);
            simulation.next_assign_id = simulation.next_assign_id.max(entry.id + 1);
        }

        if simulation.used_cache_bytes > simulation.max_cache_bytes {
            return Err(SimError::CacheFull(0));
        }
        Ok(simulation)
    }

    pub fn from_json(json: &str) -> SimResult<Self> {
        let record: SimulationRecord = serde_json::from_str(json)?;
        Self::from_record(&record)
    }

    // =========================================================================================
    // Internals
    // =========================================================================================

    fn check_tick(&self, tick: Tick) -> SimResult<()> {
        if tick < self.first_tick || tick > self.last_tick {
            return Err(SimError::TickOutOfRange {
                tick,
                first: self.first_tick,
                last: self.last_tick,
            });
        }
        Ok(())
    }

    /// Cache bytes that would remain after discarding every tick past `tick`
    fn bytes_through(&self, tick: Tick) -> usize {
        self.bodies
            .values()
            .map(|body| {
                let cache = body.cache();
                if cache.birth_tick() > tick {
                    return 0;
                }
                let kept = ((tick - cache.birth_tick()) as usize + 1).min(cache.len_ticks());
                kept * BYTES_PER_BODY_TICK
            })
            .sum()
    }

    fn recount_cache(&mut self) {
        self.used_cache_bytes = self.bodies.values().map(|body| body.cache().bytes()).sum();
    }

    fn apply_current_tick(&mut self) {
        let tick = self.current_tick;
        for body in self.bodies.values_mut() {
            body.apply_tick(tick);
        }
    }

    /// Store edits made through `body_mut` at the current tick
    fn write_live_state(&mut self) {
        let tick = self.current_tick;
        let mut destroyed = Vec::new();

        for body in self.bodies.values_mut() {
            if !body.cache().read(tick).is_some_and(|state| state.exists()) {
                continue;
            }
            if body.exists() {
                let state = body.state();
                body.cache_mut().write(tick, &state);
            } else {
                destroyed.push(body.id());
            }
        }

        if !destroyed.is_empty() {
            for &id in &destroyed {
                self.destroy_at(id, tick);
            }
            self.recount_cache();
            debug!(count = destroyed.len(), tick, "bodies destroyed by live edit");
        }
    }

    /// Zero the snapshot at `tick` and make it the body's last
    ///
    /// Snapshots after `tick` are left for the caller to trim.
    fn destroy_at(&mut self, id: BodyId, tick: Tick) {
        let Some(body) = self.bodies.get_mut(&id) else {
            return;
        };
        let Some(state) = body.cache().read(tick) else {
            return;
        };

        let dead = CachedState {
            mass: 0.0,
            link: None,
            ..state
        };
        body.cache_mut().write(tick, &dead);
        body.cache_mut().set_death_tick(tick);
        body.set_merge(None);
        body.apply_tick(self.current_tick);
    }

    /// Stop after a worker failure and hand back the error
    fn fail(&mut self, error: SimError) -> SimError {
        warn!(error = %error, last_tick = self.last_tick, "worker failed, stopping");
        self.stop();
        error
    }

    fn handle_message(&mut self, message: FromWorker) -> SimResult<Vec<SimulationEvent>> {
        // late message from a worker that was already stopped
        if !self.running {
            return Ok(Vec::new());
        }

        match message {
            FromWorker::Tick(tick) => match self.apply_tick_message(tick) {
                Ok(events) => Ok(events),
                Err(e) => Err(self.fail(e)),
            },
            FromWorker::Failed(reason) => Err(self.fail(SimError::WorkerFailed(reason))),
        }
    }

    fn apply_tick_message(&mut self, message: TickMessage) -> SimResult<Vec<SimulationEvent>> {
        let stream_ids = self.validate_tick_message(&message)?;

        let incoming = stream_ids.len() * BYTES_PER_BODY_TICK;
        if self.used_cache_bytes + incoming > self.max_cache_bytes {
            return Ok(vec![self.cache_full(self.last_tick)]);
        }

        let tick = self.last_tick + 1;
        self.last_tick = tick;
        self.next_assign_id = self.next_assign_id.max(message.next_assign_id);

        for &id in &message.created {
            self.bodies
                .entry(id)
                .or_insert_with(|| Body::unborn(id, tick));
        }

        for destroyed in &message.destroyed {
            if let Some(body) = self.bodies.get_mut(&destroyed.id) {
                body.cache_mut().set_death_tick(tick);
                body.set_merge(Some(destroyed.merge_id));
            }
        }

        let mut living = 0;
        for (chunk, id) in message
            .stream
            .chunks_exact(STREAM_VALUES_PER_BODY)
            .zip(&stream_ids)
        {
            if let Some(body) = self.bodies.get_mut(id) {
                body.cache_mut().push_values(&chunk[1..]);
            }
            if chunk[1] > 0.0 {
                living += 1;
            }
        }
        self.used_cache_bytes += incoming;

        let mut events = vec![SimulationEvent::Tick(tick)];
        self.events.emit(&SimulationEvent::Tick(tick));

        if self.used_cache_bytes + living * BYTES_PER_BODY_TICK > self.max_cache_bytes {
            events.push(self.cache_full(tick));
        }

        Ok(events)
    }

    /// Check every id in a tick message before anything is applied
    fn validate_tick_message(&self, message: &TickMessage) -> SimResult<Vec<BodyId>> {
        if message.stream.len() % STREAM_VALUES_PER_BODY != 0 {
            return Err(SimError::MalformedMessage(format!(
                "stream holds {} values, expected a multiple of {STREAM_VALUES_PER_BODY}",
                message.stream.len()
            )));
        }

        let created: BTreeSet<BodyId> = message.created.iter().copied().collect();
        let known = |id: &BodyId| self.bodies.contains_key(id) || created.contains(id);

        for destroyed in &message.destroyed {
            if !known(&destroyed.id) {
                return Err(SimError::UnknownBody(destroyed.id));
            }
            if !known(&destroyed.merge_id) {
                return Err(SimError::UnknownBody(destroyed.merge_id));
            }
        }

        message
            .stream
            .chunks_exact(STREAM_VALUES_PER_BODY)
            .map(|chunk| {
                let id = decode_id(chunk[0])?;
                if !known(&id) {
                    return Err(SimError::UnknownBody(id));
                }
                if chunk[1..].iter().any(|value| !value.is_finite()) {
                    return Err(SimError::MalformedMessage(format!(
                        "body {id} has non finite values"
                    )));
                }
                Ok(id)
            })
            .collect()
    }

    fn cache_full(&mut self, tick: Tick) -> SimulationEvent {
        warn!(tick, used_bytes = self.used_cache_bytes, "cache is full, stopping");
        self.stop();
        let event = SimulationEvent::CacheFull(tick);
        self.events.emit(&event);
        event
    }
}

impl Drop for Simulation {
    fn drop(&mut self) {
        self.stop();
    }
}

/// Serializable form of a simulation at its current tick
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SimulationRecord {
    pub physics: PhysicsSettings,
    pub max_cache_bytes: usize,
    pub bodies: Vec<BodyRecord>,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct BodyRecord {
    pub id: BodyId,
    pub mass: f64,
    pub pos: [f64; 2],
    pub vel: [f64; 2],
}
