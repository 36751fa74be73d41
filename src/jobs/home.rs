//! The home execution context: one dedicated thread that owns the graph
//! data source and runs every query against it, in submission order.
//!
//! Nothing else ever touches the data source. Callers hand closures to the
//! thread through a channel; [`HomeHandle::call`] awaits the closure's result.

use std::any::Any;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::mpsc;
use std::thread::{self, JoinHandle};

use tokio::sync::oneshot;

use crate::error::{RefgraphError, Result};
use crate::graph::GraphDataSource;

type HomeTask = Box<dyn FnOnce(&dyn GraphDataSource) + Send>;

enum HomeMessage {
    Run(HomeTask),
    Stop,
}

/// Cloneable sender side of the home context.
#[derive(Clone)]
pub struct HomeHandle {
    tx: mpsc::Sender<HomeMessage>,
}

impl HomeHandle {
    /// Queue `task` on the home thread without waiting for it.
    pub fn post<F>(&self, task: F) -> Result<()>
    where
        F: FnOnce(&dyn GraphDataSource) + Send + 'static,
    {
        self.tx
            .send(HomeMessage::Run(Box::new(task)))
            .map_err(|_| RefgraphError::HomeUnavailable("home context has stopped".to_string()))
    }

    /// Run `f` on the home thread and await its result.
    pub async fn call<F, T>(&self, f: F) -> Result<T>
    where
        F: FnOnce(&dyn GraphDataSource) -> T + Send + 'static,
        T: Send + 'static,
    {
        let (reply_tx, reply_rx) = oneshot::channel();
        self.post(move |source| {
            let _ = reply_tx.send(f(source));
        })?;
        reply_rx.await.map_err(|_| {
            RefgraphError::HomeUnavailable("home task panicked or was dropped".to_string())
        })
    }
}

/// Owner of the home thread.
pub struct HomeContext {
    handle: HomeHandle,
    thread: JoinHandle<()>,
}

impl HomeContext {
    /// Start the home thread and build the data source on it.
    ///
    /// `factory` runs on the new thread, so the source itself never has to be
    /// `Send`. Returns the factory's error if it fails.
    pub fn spawn<F, S>(name: &str, factory: F) -> Result<Self>
    where
        F: FnOnce() -> Result<S> + Send + 'static,
        S: GraphDataSource + 'static,
    {
        let (tx, rx) = mpsc::channel::<HomeMessage>();
        let (ready_tx, ready_rx) = mpsc::sync_channel::<Result<()>>(1);

        let thread = thread::Builder::new()
            .name(name.to_string())
            .spawn(move || {
                let source = match factory() {
                    Ok(source) => {
                        let _ = ready_tx.send(Ok(()));
                        source
                    }
                    Err(e) => {
                        let _ = ready_tx.send(Err(e));
                        return;
                    }
                };
                run_home_loop(&source, rx);
            })?;

        match ready_rx.recv() {
            Ok(Ok(())) => {}
            Ok(Err(e)) => {
                let _ = thread.join();
                return Err(e);
            }
            Err(_) => {
                let _ = thread.join();
                return Err(RefgraphError::HomeUnavailable(
                    "data source factory panicked".to_string(),
                ));
            }
        }

        log::info!("Home context '{}' started", name);
        Ok(Self {
            handle: HomeHandle { tx },
            thread,
        })
    }

    pub fn handle(&self) -> HomeHandle {
        self.handle.clone()
    }

    /// Run everything queued so far, then stop the thread and wait for it.
    pub fn shutdown(self) {
        let _ = self.handle.tx.send(HomeMessage::Stop);
        if self.thread.join().is_err() {
            log::error!("Home thread exited with a panic");
        }
    }
}

fn run_home_loop(source: &dyn GraphDataSource, rx: mpsc::Receiver<HomeMessage>) {
    while let Ok(message) = rx.recv() {
        match message {
            HomeMessage::Run(task) => {
                if let Err(panic) = catch_unwind(AssertUnwindSafe(|| task(source))) {
                    log::error!("Home task panicked: {}", panic_message(&*panic));
                }
            }
            HomeMessage::Stop => break,
        }
    }
    log::debug!("Home context stopped");
}

/// Best-effort text of a panic payload
pub(crate) fn panic_message(panic: &(dyn Any + Send)) -> String {
    if let Some(s) = panic.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = panic.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}
