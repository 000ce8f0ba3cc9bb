mod channel;
mod chat;
mod config;
mod directory;
mod message_store;
mod offline_queue;
mod presence;
mod session;
mod typing;

use std::collections::HashMap;
use std::sync::{Arc, RwLock};
use std::time::Instant;

use flume::Sender;
use quad_storage_traits::{ChatBackend, RealtimeTransport};

use crate::actions::AppAction;
use crate::state::{
    AuthState, BusyState, ChatMessage, Connectivity, ConversationSummary, ConversationViewState,
    Identity,
};
use crate::updates::{AppUpdate, CoreMsg, InternalEvent};
use crate::Collaborators;

use channel::{ChannelPhase, ChannelSessionManager};
use message_store::MessageStore;
use offline_queue::OfflineQueue;
use presence::PresenceTracker;
use typing::TypingTracker;

pub use directory::{ConversationDirectory, ConversationListing};
pub use presence::PresenceSnapshot;

pub struct AppCore {
    pub state: crate::state::AppState,
    rev: u64,
    last_outgoing_ts: i64,

    update_sender: Sender<AppUpdate>,
    core_sender: Sender<CoreMsg>,
    shared_state: Arc<RwLock<crate::state::AppState>>,

    data_dir: String,
    config: config::AppConfig,
    runtime: tokio::runtime::Runtime,

    identity: Option<Identity>,
    backend: Arc<dyn ChatBackend>,
    transport: Arc<dyn RealtimeTransport>,
    offline_queue: OfflineQueue,
    directory: ConversationDirectory,

    // Open conversation and the components bound to it.
    current: Option<ConversationSummary>,
    message_store: MessageStore,
    presence: PresenceTracker,
    typing: TypingTracker,
    channel: ChannelSessionManager,
    // conversation_id -> local_id -> pending or failed send; outlives the view
    local_outbox: HashMap<String, HashMap<String, ChatMessage>>,

    conversations_token: u64,
    history_token: u64,
    flush_in_flight: bool,
    flush_dirty: bool,
}

impl AppCore {
    pub fn new(
        update_sender: Sender<AppUpdate>,
        core_sender: Sender<CoreMsg>,
        data_dir: String,
        shared_state: Arc<RwLock<crate::state::AppState>>,
        collaborators: Collaborators,
    ) -> Self {
        let config = config::load_app_config(&data_dir);

        let runtime = tokio::runtime::Builder::new_multi_thread()
            .worker_threads(2)
            .enable_time()
            .build()
            .expect("tokio runtime");

        let Collaborators {
            backend,
            transport,
            offline_queue,
        } = collaborators;
        let offline_queue = OfflineQueue::new(offline_queue);
        let typing = TypingTracker::new(config.typing_debounce(), config.typing_window());
        let channel = ChannelSessionManager::new(config.backoff());

        let mut this = Self {
            state: crate::state::AppState::empty(),
            rev: 0,
            last_outgoing_ts: 0,
            update_sender,
            core_sender,
            shared_state,
            data_dir,
            config,
            runtime,
            identity: None,
            directory: ConversationDirectory::new(backend.clone()),
            backend,
            transport,
            offline_queue,
            current: None,
            message_store: MessageStore::default(),
            presence: PresenceTracker::default(),
            typing,
            channel,
            local_outbox: HashMap::new(),
            conversations_token: 0,
            history_token: 0,
            flush_in_flight: false,
            flush_dirty: false,
        };
        if !this.starts_online() {
            this.state.connectivity = Connectivity::Offline;
        }
        this.state.offline_queue_len = this.offline_queue.len();
        tracing::info!(
            data_dir = %this.data_dir,
            online = this.state.connectivity == Connectivity::Online,
            queued = this.state.offline_queue_len,
            "AppCore::new()"
        );

        // Ensure QuadApp.state() has an immediately-available snapshot.
        let snapshot = this.state.clone();
        this.commit_state_snapshot(&snapshot);
        this
    }

    fn next_rev(&mut self) -> u64 {
        self.rev += 1;
        self.state.rev = self.rev;
        self.rev
    }

    fn commit_state_snapshot(&self, snapshot: &crate::state::AppState) {
        match self.shared_state.write() {
            Ok(mut g) => *g = snapshot.clone(),
            Err(poison) => *poison.into_inner() = snapshot.clone(),
        }
    }

    fn emit_state(&mut self) {
        self.next_rev();
        let snapshot = self.state.clone();
        self.commit_state_snapshot(&snapshot);
        let _ = self.update_sender.send(AppUpdate::FullState(snapshot));
    }

    fn toast(&mut self, msg: impl Into<String>) {
        // Stays in state until the UI clears it.
        self.state.toast = Some(msg.into());
        self.emit_state();
    }

    fn set_busy(&mut self, f: impl FnOnce(&mut BusyState)) {
        let mut next = self.state.busy.clone();
        f(&mut next);
        if next != self.state.busy {
            self.state.busy = next;
            self.emit_state();
        }
    }

    fn current_conversation_id(&self) -> Option<String> {
        self.current.as_ref().map(|c| c.conversation_id.clone())
    }

    /// Rebuild the open conversation's view from the components and emit.
    fn emit_current_conversation(&mut self) {
        self.state.current = self.current.clone().map(|summary| {
            let messages = self.message_store.messages();
            let typing_users = self.typing.active(Instant::now());
            ConversationViewState {
                presence_count: self.presence.member_count(&summary.conversation_id),
                conversation_id: summary.conversation_id,
                display_name: summary.display_name,
                kind: summary.kind,
                messages,
                typing_users,
                channel: self.channel.status(),
            }
        });
        self.emit_state();
    }

    fn sign_in(&mut self, user_id: String, display_name: String) {
        let user_id = user_id.trim().to_string();
        if user_id.is_empty() {
            self.toast("Sign in requires a user id");
            return;
        }
        if self.identity.as_ref().is_some_and(|i| i.user_id != user_id) {
            self.sign_out();
        }
        let display_name = match display_name.trim() {
            "" => user_id.clone(),
            name => name.to_string(),
        };
        tracing::info!(%user_id, "sign_in");
        self.identity = Some(Identity {
            user_id: user_id.clone(),
            display_name: display_name.clone(),
        });
        self.state.auth = AuthState::SignedIn {
            user_id,
            display_name,
        };
        self.state.directory_error = None;
        self.emit_state();
        self.refresh_conversations();
        self.flush_offline_queue();
    }

    fn sign_out(&mut self) {
        if self.identity.take().is_none() {
            return;
        }
        tracing::info!("sign_out");
        self.close_conversation();
        self.conversations_token = self.conversations_token.wrapping_add(1);
        self.last_outgoing_ts = 0;
        self.typing.reset_announcements();
        self.local_outbox.clear();
        self.state.auth = AuthState::SignedOut;
        self.state.conversations.clear();
        self.state.directory_error = None;
        self.state.busy = BusyState::idle();
        // Queued messages survive sign-out and flush on the next sign-in.
        self.state.offline_queue_len = self.offline_queue.len();
        self.emit_state();
    }

    fn network_changed(&mut self, online: bool) {
        let next = if online {
            Connectivity::Online
        } else {
            Connectivity::Offline
        };
        if next == self.state.connectivity {
            return;
        }
        tracing::info!(online, "network_changed");
        self.state.connectivity = next;
        if !online {
            self.emit_current_conversation();
            return;
        }

        // Coming back online counts as re-requesting the open channel.
        if let Some(conversation_id) = self.current_conversation_id() {
            if self.channel.phase() != ChannelPhase::Subscribed {
                self.close_channel();
                self.open_channel(&conversation_id);
                self.load_history(&conversation_id);
            }
        }
        self.emit_current_conversation();
        self.flush_offline_queue();
    }

    pub fn handle_message(&mut self, msg: CoreMsg) {
        match msg {
            CoreMsg::Action(action) => {
                // Never log `?action` directly: it carries message content.
                tracing::info!(action = action.tag(), "dispatch");
                self.handle_action(action);
            }
            CoreMsg::Internal(internal) => self.handle_internal(*internal),
            CoreMsg::Shutdown => self.shutdown(),
        }
    }

    fn shutdown(&mut self) {
        tracing::info!("shutdown");
        self.close_channel();
    }

    fn handle_internal(&mut self, internal: InternalEvent) {
        match internal {
            InternalEvent::ConversationsLoaded { token, result } => {
                self.handle_conversations_loaded(token, result)
            }
            InternalEvent::ConversationCreated { result } => {
                self.handle_conversation_created(result)
            }
            InternalEvent::HistoryLoaded {
                token,
                conversation_id,
                result,
            } => self.handle_history_loaded(token, conversation_id, result),
            InternalEvent::SendResult { message, result } => {
                self.handle_send_result(message, result)
            }
            InternalEvent::FlushItemResult { item, result } => {
                self.handle_flush_item_result(item, result)
            }
            InternalEvent::FlushFinished => self.handle_flush_finished(),
            InternalEvent::ChannelSubscribed {
                token,
                conversation_id,
                subscription,
            } => self.handle_channel_subscribed(token, conversation_id, subscription),
            InternalEvent::ChannelEvent { token, event } => {
                self.handle_channel_event(token, event)
            }
            InternalEvent::ChannelFailed { token, error } => {
                self.handle_channel_failed(token, error)
            }
            InternalEvent::ChannelDropped { token, reason } => {
                self.handle_channel_failure(token, reason)
            }
            InternalEvent::ChannelRetry { token } => self.handle_channel_retry(token),
            InternalEvent::TypingSweep { token } => self.handle_typing_sweep(token),
            InternalEvent::Toast(msg) => self.toast(msg),
        }
    }

    fn handle_action(&mut self, action: AppAction) {
        match action {
            // Identity
            AppAction::SignIn {
                user_id,
                display_name,
            } => self.sign_in(user_id, display_name),
            AppAction::SignOut => self.sign_out(),

            // Directory
            AppAction::RefreshConversations => self.refresh_conversations(),
            AppAction::CreateConversation { name, kind } => self.create_conversation(name, kind),

            // Conversation
            AppAction::SelectConversation { conversation_id } => {
                self.select_conversation(conversation_id)
            }
            AppAction::CloseConversation => self.close_conversation(),
            AppAction::SendMessage { content } => self.send_message(content),
            AppAction::RetryMessage { local_id } => self.retry_message(local_id),
            AppAction::TypingStarted => self.typing_started(),

            // UI
            AppAction::ClearToast => {
                if self.state.toast.take().is_some() {
                    self.emit_state();
                }
            }

            // Lifecycle
            AppAction::NetworkChanged { online } => self.network_changed(online),
        }
    }
}
