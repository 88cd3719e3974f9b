//! Integration worker and its message protocol
//!
//! The worker owns its own `BodyManager` and never touches the host's cache.
//! Host and worker only exchange plain numeric payloads:
//!
//! ```text
//! host   -> worker  Init { physics, bodies: [next_id, id, mass, x, y, vx, vy, ...] }
//!                   Stop
//! worker -> host    Tick { next_assign_id, destroyed, created, stream: [id, mass, x, y, vx, vy, link, ...] }
//!                   Failed(reason)
//! ```
//!
//! A fresh `Init` replaces the worker's entire body set. After `Stop` a worker
//! emits nothing further.
//!
//! Two backends implement [`WorkerHandle`]:
//! - [`ThreadWorker`] runs the tick loop on a dedicated thread
//! - [`InlineWorker`] computes ticks lazily on the caller's thread

use std::sync::mpsc::{self, Receiver, RecvTimeoutError, SyncSender, TryRecvError, TrySendError};
use std::thread::{self, JoinHandle};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::{debug, trace, warn};

use super::body_manager::{BodyManager, Destroyed, PhysicsBody};
use super::cache::CachedState;
use super::params::{PhysicsSettings, MASS_MIN};
use super::states::{BodyId, NVec2};
use crate::error::{SimError, SimResult};

/// Ticks a thread worker may run ahead of the host before it waits
pub const TICK_BUFFER: usize = 256;

/// How long a worker with a full buffer sleeps before retrying
const BACKPRESSURE_WAIT: Duration = Duration::from_millis(5);

/// Values per body in an init payload: id followed by mass, x, y, vx, vy
const INIT_VALUES_PER_BODY: usize = 6;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InitMessage {
    pub physics: PhysicsSettings,
    pub bodies: Vec<f64>, // [next_assign_id, id, mass, x, y, vx, vy, ...]
}

impl InitMessage {
    /// Flatten living body states into an init payload
    pub fn encode<'a, I>(physics: &PhysicsSettings, next_assign_id: BodyId, bodies: I) -> Self
    where
        I: IntoIterator<Item = (BodyId, &'a CachedState)>,
    {
        let mut values = vec![next_assign_id as f64];
        for (id, state) in bodies {
            values.extend_from_slice(&[
                id as f64,
                state.mass,
                state.pos.x,
                state.pos.y,
                state.vel.x,
                state.vel.y,
            ]);
        }

        Self {
            physics: *physics,
            bodies: values,
        }
    }

    /// Decode the payload into worker bodies and the next id to assign
    pub fn decode(&self) -> SimResult<(BodyId, Vec<PhysicsBody>)> {
        let (&next_id, values) = self
            .bodies
            .split_first()
            .ok_or_else(|| SimError::MalformedMessage("init payload is empty".into()))?;

        if values.len() % INIT_VALUES_PER_BODY != 0 {
            return Err(SimError::MalformedMessage(format!(
                "init payload holds {} body values, expected a multiple of {INIT_VALUES_PER_BODY}",
                values.len()
            )));
        }

        let next_id = decode_id(next_id)?;
        let mut bodies = Vec::with_capacity(values.len() / INIT_VALUES_PER_BODY);
        for chunk in values.chunks_exact(INIT_VALUES_PER_BODY) {
            let id = decode_id(chunk[0])?;
            let mass = chunk[1];
            if !mass.is_finite() || mass < MASS_MIN {
                return Err(SimError::MalformedMessage(format!(
                    "body {id} has invalid mass {mass}"
                )));
            }
            if chunk[2..].iter().any(|value| !value.is_finite()) {
                return Err(SimError::MalformedMessage(format!(
                    "body {id} has a non finite position or velocity"
                )));
            }

            bodies.push(PhysicsBody::new(
                id,
                mass,
                NVec2::new(chunk[2], chunk[3]),
                NVec2::new(chunk[4], chunk[5]),
            ));
        }

        Ok((next_id, bodies))
    }
}

/// Read a body id out of a numeric payload
pub fn decode_id(value: f64) -> SimResult<BodyId> {
    if !value.is_finite() || value < 0.0 || value.fract() != 0.0 {
        return Err(SimError::MalformedMessage(format!("{value} is not a body id")));
    }
    Ok(value as BodyId)
}

/// One emitted tick
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TickMessage {
    pub next_assign_id: BodyId,
    pub destroyed: Vec<Destroyed>,
    pub created: Vec<BodyId>,
    pub stream: Vec<f64>, // [id, mass, x, y, vx, vy, link, ...]
}

#[derive(Debug, Clone, PartialEq)]
pub enum ToWorker {
    Init(InitMessage),
    Stop,
}

#[derive(Debug, Clone, PartialEq)]
pub enum FromWorker {
    Tick(TickMessage),
    Failed(String),
}

/// Everything a worker knows. Built fresh from every init message
#[derive(Debug)]
pub struct WorkerState {
    physics: PhysicsSettings,
    manager: BodyManager,
    next_assign_id: BodyId,
}

impl WorkerState {
    pub fn new(init: &InitMessage) -> SimResult<Self> {
        init.physics.validate()?;
        let (next_assign_id, bodies) = init.decode()?;

        let mut manager = BodyManager::new();
        manager.set_bodies(bodies, &init.physics);

        Ok(Self {
            physics: init.physics,
            manager,
            next_assign_id,
        })
    }

    /// Integrate one emitted tick and flatten the result
    pub fn tick(&mut self) -> TickMessage {
        let report = self.manager.step(&self.physics);
        TickMessage {
            next_assign_id: self.next_assign_id,
            destroyed: report.destroyed,
            created: Vec::new(),
            stream: self.manager.stream(),
        }
    }

    pub fn physics(&self) -> &PhysicsSettings {
        &self.physics
    }

    pub fn manager(&self) -> &BodyManager {
        &self.manager
    }
}

/// Host side of a worker, whatever isolation backs it
pub trait WorkerHandle: Send {
    fn send(&mut self, message: ToWorker) -> SimResult<()>;

    /// Next message if one is ready
    fn try_recv(&mut self) -> SimResult<Option<FromWorker>>;

    /// Block until the next message
    fn recv(&mut self) -> SimResult<FromWorker>;

    /// Stop the worker. Idempotent
    fn terminate(&mut self);
}

pub struct ThreadWorker {
    inbox: Option<mpsc::Sender<ToWorker>>,
    outbox: Option<Receiver<FromWorker>>,
    thread: Option<JoinHandle<()>>,
}

impl ThreadWorker {
    pub fn spawn() -> SimResult<Self> {
        let (to_worker, inbox) = mpsc::channel();
        let (outbox, from_worker) = mpsc::sync_channel(TICK_BUFFER);

        let thread = thread::Builder::new()
            .name("gravsim-worker".into())
            .spawn(move || worker_loop(inbox, outbox))
            .map_err(|e| SimError::WorkerFailed(e.to_string()))?;

        debug!("worker thread spawned");

        Ok(Self {
            inbox: Some(to_worker),
            outbox: Some(from_worker),
            thread: Some(thread),
        })
    }

    fn outbox(&self) -> SimResult<&Receiver<FromWorker>> {
        self.outbox.as_ref().ok_or(SimError::WorkerDisconnected)
    }
}

impl WorkerHandle for ThreadWorker {
    fn send(&mut self, message: ToWorker) -> SimResult<()> {
        let inbox = self.inbox.as_ref().ok_or(SimError::WorkerDisconnected)?;
        inbox.send(message).map_err(|_| SimError::WorkerDisconnected)
    }

    fn try_recv(&mut self) -> SimResult<Option<FromWorker>> {
        match self.outbox()?.try_recv() {
            Ok(message) => Ok(Some(message)),
            Err(TryRecvError::Empty) => Ok(None),
            Err(TryRecvError::Disconnected) => Err(SimError::WorkerDisconnected),
        }
    }

    fn recv(&mut self) -> SimResult<FromWorker> {
        self.outbox()?.recv().map_err(|_| SimError::WorkerDisconnected)
    }

    fn terminate(&mut self) {
        if let Some(inbox) = self.inbox.take() {
            let _ = inbox.send(ToWorker::Stop);
        }
        // dropping the receiver unblocks a worker waiting on a full buffer
        self.outbox = None;
        // the thread finishes its current tick and exits on its own
        self.thread = None;
    }
}

impl Drop for ThreadWorker {
    fn drop(&mut self) {
        self.terminate();
    }
}

fn worker_loop(inbox: Receiver<ToWorker>, outbox: SyncSender<FromWorker>) {
    let mut state: Option<WorkerState> = None;

    loop {
        // block while idle, otherwise only peek for control messages
        let control = if state.is_some() {
            match inbox.try_recv() {
                Ok(message) => Some(message),
                Err(TryRecvError::Empty) => None,
                Err(TryRecvError::Disconnected) => return,
            }
        } else {
            match inbox.recv() {
                Ok(message) => Some(message),
                Err(_) => return,
            }
        };

        if let Some(control) = control {
            if !handle_control(control, &mut state, &outbox) {
                return;
            }
        }

        let Some(current) = state.as_mut() else {
            continue;
        };
        let message = FromWorker::Tick(current.tick());

        match deliver(&outbox, &inbox, message, BACKPRESSURE_WAIT) {
            Delivery::Sent { attempts } => {
                if attempts > 1 {
                    trace!(attempts, "host caught up, resuming");
                }
            }
            // a re-init makes the unsent tick stale
            Delivery::Control(control) => {
                if !handle_control(control, &mut state, &outbox) {
                    return;
                }
            }
            Delivery::Closed => return,
        }

        thread::yield_now();
    }
}

/// Outcome of handing one message to the host
#[derive(Debug)]
enum Delivery {
    /// Sent after `attempts` tries
    Sent { attempts: u32 },
    /// A control message arrived while the buffer was full; the message was dropped
    Control(ToWorker),
    /// The host is gone
    Closed,
}

/// Send `message`, sleeping on the inbox while the buffer is full
///
/// Each full buffer parks the thread for up to `wait`, so a host that stops
/// polling leaves the worker idle. Control messages end the wait at once.
fn deliver(
    outbox: &SyncSender<FromWorker>,
    inbox: &Receiver<ToWorker>,
    mut message: FromWorker,
    wait: Duration,
) -> Delivery {
    let mut attempts = 0;
    loop {
        attempts += 1;
        match outbox.try_send(message) {
            Ok(()) => return Delivery::Sent { attempts },
            Err(TrySendError::Disconnected(_)) => return Delivery::Closed,
            Err(TrySendError::Full(unsent)) => {
                message = unsent;
                match inbox.recv_timeout(wait) {
                    Ok(control) => return Delivery::Control(control),
                    Err(RecvTimeoutError::Timeout) => {}
                    Err(RecvTimeoutError::Disconnected) => return Delivery::Closed,
                }
            }
        }
    }
}

/// Apply one control message. Returns false when the loop should exit
fn handle_control(
    control: ToWorker,
    state: &mut Option<WorkerState>,
    outbox: &SyncSender<FromWorker>,
) -> bool {
    match control {
        ToWorker::Init(init) => match WorkerState::new(&init) {
            Ok(fresh) => {
                *state = Some(fresh);
                true
            }
            Err(e) => {
                warn!(error = %e, "worker rejected init message");
                *state = None;
                outbox.send(FromWorker::Failed(e.to_string())).is_ok()
            }
        },
        ToWorker::Stop => false,
    }
}

/// Worker that computes each tick when the host asks for a message
///
/// Produces exactly the same ticks as [`ThreadWorker`] for the same init
/// message, without a second thread.
#[derive(Debug, Default)]
pub struct InlineWorker {
    state: Option<WorkerState>,
    failure: Option<String>,
}

impl InlineWorker {
    pub fn new() -> Self {
        Self::default()
    }

    fn next_message(&mut self) -> Option<FromWorker> {
        if let Some(reason) = self.failure.take() {
            return Some(FromWorker::Failed(reason));
        }
        self.state
            .as_mut()
            .map(|state| FromWorker::Tick(state.tick()))
    }
}

impl WorkerHandle for InlineWorker {
    fn send(&mut self, message: ToWorker) -> SimResult<()> {
        match message {
            ToWorker::Init(init) => match WorkerState::new(&init) {
                Ok(state) => {
                    self.state = Some(state);
                    self.failure = None;
                }
                Err(e) => {
                    self.state = None;
                    self.failure = Some(e.to_string());
                }
            },
            ToWorker::Stop => self.terminate(),
        }
        Ok(())
    }

    fn try_recv(&mut self) -> SimResult<Option<FromWorker>> {
        Ok(self.next_message())
    }

    fn recv(&mut self) -> SimResult<FromWorker> {
        self.next_message().ok_or(SimError::WorkerDisconnected)
    }

    fn terminate(&mut self) {
        self.state = None;
        self.failure = None;
    }
}

/// Builds the worker for every run
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum WorkerBackend {
    #[default]
    Thread,
    Inline,
    /// Caller supplied constructor
    #[serde(skip)]
    Custom(fn() -> SimResult<Box<dyn WorkerHandle>>),
}

impl WorkerBackend {
    pub fn spawn(&self) -> SimResult<Box<dyn WorkerHandle>> {
        match self {
            WorkerBackend::Thread => Ok(Box::new(ThreadWorker::spawn()?)),
            WorkerBackend::Inline => Ok(Box::new(InlineWorker::new())),
            WorkerBackend::Custom(build) => build(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Instant;

    fn filler() -> FromWorker {
        FromWorker::Failed("filler".into())
    }

    #[test]
    fn full_buffer_parks_the_worker() {
        let (_to_worker, inbox) = mpsc::channel::<ToWorker>();
        let (outbox, from_worker) = mpsc::sync_channel(1);
        outbox.send(filler()).unwrap();

        let waiter = thread::spawn(move || {
            deliver(&outbox, &inbox, filler(), Duration::from_millis(20))
        });

        thread::sleep(Duration::from_millis(200));
        assert!(!waiter.is_finished());

        // room frees up, the pending tick goes through on the next retry
        from_worker.recv().unwrap();
        match waiter.join().unwrap() {
            // roughly one try per wait period, not a spin
            Delivery::Sent { attempts } => assert!(attempts <= 20, "{attempts} attempts"),
            other => panic!("unexpected {other:?}"),
        }
        assert!(from_worker.recv().is_ok());
    }

    #[test]
    fn control_message_ends_the_wait() {
        let (to_worker, inbox) = mpsc::channel();
        let (outbox, _from_worker) = mpsc::sync_channel(1);
        outbox.send(filler()).unwrap();

        let started = Instant::now();
        let waiter = thread::spawn(move || {
            deliver(&outbox, &inbox, filler(), Duration::from_secs(30))
        });
        to_worker.send(ToWorker::Stop).unwrap();

        let delivery = waiter.join().unwrap();
        assert!(matches!(delivery, Delivery::Control(ToWorker::Stop)));
        assert!(started.elapsed() < Duration::from_secs(10));
    }

    #[test]
    fn closed_host_ends_the_wait() {
        let (to_worker, inbox) = mpsc::channel::<ToWorker>();
        let (outbox, from_worker) = mpsc::sync_channel(1);
        outbox.send(filler()).unwrap();
        drop(from_worker);
        drop(to_worker);

        let delivery = deliver(&outbox, &inbox, filler(), Duration::from_secs(30));
        assert!(matches!(delivery, Delivery::Closed));
    }

    #[test]
    fn thread_worker_stops_at_the_buffer_limit() {
        let init = InitMessage::encode(
            &PhysicsSettings::default(),
            1,
            [(
                0,
                &CachedState {
                    mass: 10.0,
                    pos: NVec2::zeros(),
                    vel: NVec2::zeros(),
                    link: None,
                },
            )],
        );
        let mut worker = ThreadWorker::spawn().unwrap();
        worker.send(ToWorker::Init(init)).unwrap();

        // give the worker time to fill the buffer
        thread::sleep(Duration::from_millis(300));

        let mut ready = 0;
        while let Some(message) = worker.try_recv().unwrap() {
            assert!(matches!(message, FromWorker::Tick(_)));
            ready += 1;
            if ready > TICK_BUFFER {
                break;
            }
        }
        assert!(ready >= TICK_BUFFER);
        worker.terminate();
    }
}
