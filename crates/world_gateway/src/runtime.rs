//! Fixed-rate simulation thread driving every attached world's coordinator.

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc;
use std::sync::{Arc, Mutex, MutexGuard};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant, SystemTime, UNIX_EPOCH};

use tracing::{debug, error, warn};

use super::coordinator::{TickCoordinator, WorldGatewayStatus};
use super::error::GatewayError;
use super::signals::GatewaySignal;
use super::types::WorldId;
use super::world::WorldAccess;

const WORKER_NAME: &str = "world-gateway-tick";

struct AttachedWorld<W> {
    coordinator: TickCoordinator,
    host: Arc<Mutex<W>>,
}

/// Clears the running flag when the worker exits, including by unwinding.
struct RunningFlagGuard(Arc<AtomicBool>);

impl Drop for RunningFlagGuard {
    fn drop(&mut self) {
        self.0.store(false, Ordering::SeqCst);
    }
}

enum RuntimeCommand {
    Signal {
        world_id: WorldId,
        signal: GatewaySignal,
    },
    Stop,
}

#[derive(Debug, Clone, Default)]
struct RuntimeState {
    tick_count: u64,
    last_tick_unix_ms: Option<i64>,
    worlds: BTreeMap<WorldId, WorldGatewayStatus>,
    last_error: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GatewayRuntimeSnapshot {
    pub running: bool,
    pub tick_count: u64,
    pub last_tick_unix_ms: Option<i64>,
    pub worlds: BTreeMap<WorldId, WorldGatewayStatus>,
    pub last_error: Option<String>,
}

pub struct GatewayRuntime<W> {
    tick_interval: Duration,
    running: Arc<AtomicBool>,
    state: Arc<Mutex<RuntimeState>>,
    worlds: BTreeMap<WorldId, AttachedWorld<W>>,
    command_tx: Option<mpsc::Sender<RuntimeCommand>>,
    worker: Option<JoinHandle<BTreeMap<WorldId, AttachedWorld<W>>>>,
}

impl<W> GatewayRuntime<W>
where
    W: WorldAccess + Send + 'static,
{
    pub fn new(tick_interval: Duration) -> Self {
        Self {
            tick_interval: tick_interval.max(Duration::from_millis(1)),
            running: Arc::new(AtomicBool::new(false)),
            state: Arc::new(Mutex::new(RuntimeState::default())),
            worlds: BTreeMap::new(),
            command_tx: None,
            worker: None,
        }
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    /// Worlds attach while the runtime is stopped; load gateway state through
    /// the persistence adapter before attaching so no tick sees defaults.
    pub fn attach_world(
        &mut self,
        coordinator: TickCoordinator,
        host: Arc<Mutex<W>>,
    ) -> Result<(), GatewayError> {
        if self.is_running() {
            return Err(GatewayError::AlreadyRunning);
        }
        let world_id = coordinator.world_id().to_string();
        if self.worlds.contains_key(&world_id) {
            return Err(GatewayError::WorldAlreadyAttached { world_id });
        }
        lock_state(&self.state)
            .worlds
            .insert(world_id.clone(), coordinator.status());
        self.worlds
            .insert(world_id, AttachedWorld { coordinator, host });
        Ok(())
    }

    pub fn detach_world(&mut self, world_id: &str) -> Result<TickCoordinator, GatewayError> {
        if self.is_running() {
            return Err(GatewayError::AlreadyRunning);
        }
        let attached = self
            .worlds
            .remove(world_id)
            .ok_or_else(|| GatewayError::UnknownWorld {
                world_id: world_id.to_string(),
            })?;
        lock_state(&self.state).worlds.remove(world_id);
        Ok(attached.coordinator)
    }

    pub fn start(&mut self) -> Result<(), GatewayError> {
        if self.running.swap(true, Ordering::SeqCst) {
            return Err(GatewayError::AlreadyRunning);
        }

        let mut worlds = std::mem::take(&mut self.worlds);
        let tick_interval = self.tick_interval;
        let running = Arc::clone(&self.running);
        let state = Arc::clone(&self.state);
        let (command_tx, command_rx) = mpsc::channel::<RuntimeCommand>();

        let worker = thread::Builder::new()
            .name(WORKER_NAME.to_string())
            .spawn(move || {
                let _running = RunningFlagGuard(running);
                let mut next_tick = Instant::now() + tick_interval;
                loop {
                    let wait = next_tick.saturating_duration_since(Instant::now());
                    match command_rx.recv_timeout(wait) {
                        Ok(RuntimeCommand::Signal { world_id, signal }) => {
                            dispatch_signal(&mut worlds, &state, &world_id, signal);
                        }
                        Ok(RuntimeCommand::Stop) => break,
                        Err(mpsc::RecvTimeoutError::Timeout) => {
                            tick_all(&mut worlds, &state);
                            next_tick += tick_interval;
                            let now = Instant::now();
                            if next_tick < now {
                                // Fell behind; skip the missed steps rather than burst.
                                next_tick = now + tick_interval;
                            }
                        }
                        Err(mpsc::RecvTimeoutError::Disconnected) => break,
                    }
                }
                worlds
            });

        let worker = match worker {
            Ok(worker) => worker,
            Err(err) => {
                self.running.store(false, Ordering::SeqCst);
                return Err(GatewayError::ThreadSpawnFailed {
                    reason: err.to_string(),
                });
            }
        };
        self.command_tx = Some(command_tx);
        self.worker = Some(worker);
        Ok(())
    }

    /// Queues a signal for the simulation thread.
    pub fn signal(&self, world_id: &str, signal: GatewaySignal) -> Result<(), GatewayError> {
        let command_tx = self.command_tx.as_ref().ok_or(GatewayError::NotRunning)?;
        if !self.is_running() {
            return Err(GatewayError::NotRunning);
        }
        command_tx
            .send(RuntimeCommand::Signal {
                world_id: world_id.to_string(),
                signal,
            })
            .map_err(|_| GatewayError::NotRunning)
    }

    /// Joins the worker and takes its worlds back so the runtime can restart.
    pub fn stop(&mut self) -> Result<(), GatewayError> {
        let Some(worker) = self.worker.take() else {
            return Err(GatewayError::NotRunning);
        };
        if let Some(command_tx) = self.command_tx.take() {
            let _ = command_tx.send(RuntimeCommand::Stop);
        }
        let joined = worker.join();
        self.running.store(false, Ordering::SeqCst);
        match joined {
            Ok(worlds) => {
                self.worlds = worlds;
                Ok(())
            }
            Err(_) => {
                // Worlds owned by the panicked worker are lost; the runtime
                // itself can start again.
                let err = GatewayError::ThreadJoinFailed;
                error!("gateway tick worker panicked");
                lock_state(&self.state).last_error = Some(err.to_string());
                Err(err)
            }
        }
    }

    pub fn snapshot(&self) -> GatewayRuntimeSnapshot {
        let state = lock_state(&self.state);
        GatewayRuntimeSnapshot {
            running: self.is_running(),
            tick_count: state.tick_count,
            last_tick_unix_ms: state.last_tick_unix_ms,
            worlds: state.worlds.clone(),
            last_error: state.last_error.clone(),
        }
    }
}

impl<W> Drop for GatewayRuntime<W> {
    fn drop(&mut self) {
        if let Some(command_tx) = self.command_tx.take() {
            let _ = command_tx.send(RuntimeCommand::Stop);
        }
        if let Some(worker) = self.worker.take() {
            let _ = worker.join();
        }
        self.running.store(false, Ordering::SeqCst);
    }
}

fn tick_all<W>(worlds: &mut BTreeMap<WorldId, AttachedWorld<W>>, state: &Arc<Mutex<RuntimeState>>)
where
    W: WorldAccess,
{
    let mut statuses = Vec::with_capacity(worlds.len());
    for (world_id, attached) in worlds.iter_mut() {
        let mut host = lock_host(&attached.host);
        attached.coordinator.tick(&mut *host);
        statuses.push((world_id.clone(), attached.coordinator.status()));
    }

    let mut current = lock_state(state);
    current.tick_count = current.tick_count.saturating_add(1);
    current.last_tick_unix_ms = Some(now_unix_ms());
    for (world_id, status) in statuses {
        current.worlds.insert(world_id, status);
    }
}

fn dispatch_signal<W>(
    worlds: &mut BTreeMap<WorldId, AttachedWorld<W>>,
    state: &Arc<Mutex<RuntimeState>>,
    world_id: &str,
    signal: GatewaySignal,
) where
    W: WorldAccess,
{
    let Some(attached) = worlds.get_mut(world_id) else {
        warn!(world = world_id, "gateway signal for unattached world dropped");
        lock_state(state).last_error = Some(
            GatewayError::UnknownWorld {
                world_id: world_id.to_string(),
            }
            .to_string(),
        );
        return;
    };
    let outcome = {
        let mut host = lock_host(&attached.host);
        attached.coordinator.handle_signal(&mut *host, signal)
    };
    debug!(world = world_id, ?outcome, "gateway signal handled");
    let status = attached.coordinator.status();
    lock_state(state).worlds.insert(world_id.to_string(), status);
}

fn lock_state(state: &Arc<Mutex<RuntimeState>>) -> MutexGuard<'_, RuntimeState> {
    state
        .lock()
        .unwrap_or_else(|poisoned| poisoned.into_inner())
}

fn lock_host<W>(host: &Arc<Mutex<W>>) -> MutexGuard<'_, W> {
    host.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

fn now_unix_ms() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|duration| duration.as_millis() as i64)
        .unwrap_or(0)
}
