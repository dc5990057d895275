use std::io;
use std::sync::mpsc::{self, RecvTimeoutError};
use std::thread;
use std::time::Duration;

use tracing::{debug, warn};

use warden_core::InstanceId;
use warden_events::{EventBus, InstanceScoped, Subscription};

/// Handle to stop and join a background worker.
#[derive(Debug)]
pub struct WorkerHandle {
    name: &'static str,
    shutdown: mpsc::Sender<()>,
    join: Option<thread::JoinHandle<()>>,
}

impl WorkerHandle {
    /// Request graceful shutdown and wait for the worker to stop.
    pub fn shutdown(mut self) {
        self.stop();
    }

    fn stop(&mut self) {
        let _ = self.shutdown.send(());
        if let Some(j) = self.join.take() {
            if j.join().is_err() {
                warn!(worker = self.name, "projection worker panicked");
            }
        }
    }
}

impl Drop for WorkerHandle {
    fn drop(&mut self) {
        self.stop();
    }
}

/// Generic projection worker loop.
///
/// - Subscribes to the bus before the thread starts, so nothing published
///   after `spawn` returns is missed
/// - Applies an idempotent handler to each message; handler errors are logged
///   and the loop continues
/// - Optionally pinned to one instance
#[derive(Debug)]
pub struct ProjectionWorker;

impl ProjectionWorker {
    pub const TICK: Duration = Duration::from_millis(250);

    pub fn spawn<M, B, H, E>(
        name: &'static str,
        bus: &B,
        instance_id: Option<InstanceId>,
        mut handler: H,
    ) -> io::Result<WorkerHandle>
    where
        M: InstanceScoped + Send + 'static,
        B: EventBus<M> + ?Sized,
        H: FnMut(M) -> Result<(), E> + Send + 'static,
        E: core::fmt::Debug + Send + 'static,
    {
        let (shutdown_tx, shutdown_rx) = mpsc::channel::<()>();
        let sub: Subscription<M> = bus.subscribe();

        let join = thread::Builder::new()
            .name(name.to_string())
            .spawn(move || worker_loop(name, sub, shutdown_rx, instance_id, &mut handler))?;

        Ok(WorkerHandle {
            name,
            shutdown: shutdown_tx,
            join: Some(join),
        })
    }
}

fn worker_loop<M, H, E>(
    name: &'static str,
    sub: Subscription<M>,
    shutdown_rx: mpsc::Receiver<()>,
    instance_id: Option<InstanceId>,
    handler: &mut H,
) where
    M: InstanceScoped,
    H: FnMut(M) -> Result<(), E>,
    E: core::fmt::Debug,
{
    debug!(worker = name, "projection worker started");

    loop {
        match shutdown_rx.try_recv() {
            Ok(()) | Err(mpsc::TryRecvError::Disconnected) => break,
            Err(mpsc::TryRecvError::Empty) => {}
        }

        match sub.recv_timeout(ProjectionWorker::TICK) {
            Ok(msg) => {
                if instance_id.is_some_and(|i| msg.instance_id() != i) {
                    continue;
                }

                if let Err(err) = handler(msg) {
                    warn!(worker = name, error = ?err, "projection worker handler failed");
                }
            }
            Err(RecvTimeoutError::Timeout) => continue,
            Err(RecvTimeoutError::Disconnected) => break,
        }
    }

    debug!(worker = name, "projection worker stopped");
}
