mod actions;
mod core;
mod error;
mod logging;
mod state;
mod updates;

use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, RwLock};
use std::thread;

use flume::{Receiver, Sender};
use quad_sqlite_storage::SqliteOfflineQueue;

pub use actions::AppAction;
pub use crate::core::{ConversationDirectory, ConversationListing, PresenceSnapshot};
pub use error::QuadError;
pub use logging::init_logging;
pub use quad_storage_traits::{
    BackendError, ChatBackend, Conversation, OfflineQueueError, OfflineQueueStorage,
    QueuedMessage, RealtimeTransport, StoredMessage, TransportError, TransportEvent,
};
pub use state::*;
pub use updates::*;

const OFFLINE_QUEUE_FILE: &str = "offline_queue.sqlite3";

pub trait AppReconciler: Send + Sync + 'static {
    fn reconcile(&self, update: AppUpdate);
}

/// External services the core talks to.
#[derive(Clone)]
pub struct Collaborators {
    pub backend: Arc<dyn ChatBackend>,
    pub transport: Arc<dyn RealtimeTransport>,
    pub offline_queue: Arc<dyn OfflineQueueStorage>,
}

impl Collaborators {
    /// Use the SQLite offline queue stored under `data_dir`.
    pub fn open(
        data_dir: &str,
        backend: Arc<dyn ChatBackend>,
        transport: Arc<dyn RealtimeTransport>,
    ) -> Result<Self, QuadError> {
        let queue = SqliteOfflineQueue::open(Path::new(data_dir).join(OFFLINE_QUEUE_FILE))?;
        Ok(Self {
            backend,
            transport,
            offline_queue: Arc::new(queue),
        })
    }
}

pub struct QuadApp {
    core_tx: Sender<CoreMsg>,
    update_rx: Receiver<AppUpdate>,
    listening: AtomicBool,
    shared_state: Arc<RwLock<AppState>>,
    directory: ConversationDirectory,
}

impl QuadApp {
    pub fn new(data_dir: String, collaborators: Collaborators) -> Arc<Self> {
        logging::init_logging();
        tracing::info!(data_dir = %data_dir, "QuadApp::new() starting");

        let (update_tx, update_rx) = flume::unbounded();
        let (core_tx, core_rx) = flume::unbounded::<CoreMsg>();
        let shared_state = Arc::new(RwLock::new(AppState::empty()));
        let directory = ConversationDirectory::new(collaborators.backend.clone());

        // Actor loop thread (single threaded "app actor").
        let core_tx_for_core = core_tx.clone();
        let shared_for_core = shared_state.clone();
        thread::spawn(move || {
            let mut core = crate::core::AppCore::new(
                update_tx,
                core_tx_for_core,
                data_dir,
                shared_for_core,
                collaborators,
            );
            while let Ok(msg) = core_rx.recv() {
                let shutdown = matches!(msg, CoreMsg::Shutdown);
                core.handle_message(msg);
                if shutdown {
                    break;
                }
            }
        });

        Arc::new(Self {
            core_tx,
            update_rx,
            listening: AtomicBool::new(false),
            shared_state,
            directory,
        })
    }

    pub fn state(&self) -> AppState {
        match self.shared_state.read() {
            Ok(g) => g.clone(),
            Err(poison) => poison.into_inner().clone(),
        }
    }

    pub fn dispatch(&self, action: AppAction) {
        // Contract: never block caller.
        let _ = self.core_tx.send(CoreMsg::Action(action));
    }

    pub fn listen_for_updates(&self, reconciler: Box<dyn AppReconciler>) {
        if self
            .listening
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_err()
        {
            // Avoid multiple listeners that would split messages.
            return;
        }

        let rx = self.update_rx.clone();
        thread::spawn(move || {
            while let Ok(update) = rx.recv() {
                reconciler.reconcile(update);
            }
        });
    }

    /// Online members of `conversation_id`; 0 unless it is the open one.
    pub fn member_count(&self, conversation_id: &str) -> u32 {
        self.state()
            .current
            .filter(|c| c.conversation_id == conversation_id)
            .map(|c| c.presence_count)
            .unwrap_or(0)
    }

    pub fn directory(&self) -> ConversationDirectory {
        self.directory.clone()
    }
}

impl Drop for QuadApp {
    fn drop(&mut self) {
        let _ = self.core_tx.send(CoreMsg::Shutdown);
    }
}
