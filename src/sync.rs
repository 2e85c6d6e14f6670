//! Logical sync protocol and the server-side board hub.
//!
//! The hub is the one place where ordering across requests matters: for each
//! board it serializes "read tail, assign serials, append, apply, broadcast"
//! under that board's lock. Different boards never share a lock beyond the
//! brief lookup of their slot.

use crate::board::{Board, BoardId};
use crate::error::{Error, Result};
use crate::event::{Actor, AppEvent, HistoryEntry};
use crate::loader::{BoardLoader, LoaderConfig};
use crate::reducer::{self, ApplyOptions};
use crate::store::{EventLogStore, SnapshotRecord};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::mpsc::Sender;
use std::sync::{Arc, Mutex, MutexGuard};

/// Identifies one client connection.
pub type SessionId = u64;

/// Client to server.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "kebab-case")]
pub enum ClientMessage {
    /// Subscribe the session to a board.
    Join { board_id: BoardId },
    /// Local edits, in order. Carries no serials; the server assigns them.
    Batch { events: Vec<AppEvent> },
}

/// Server to client.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "kebab-case")]
pub enum ServerMessage {
    /// Current state, sent on join.
    BoardState { board: Board },
    /// An accepted event, sent to every subscriber including its origin.
    Event { entry: HistoryEntry },
    /// The session's last batch was accepted. Correlated to the session, not
    /// to any event, so an ack can never be consumed by a later connection.
    Ack { board_id: BoardId },
}

struct Session {
    actor: Actor,
    board_id: Option<BoardId>,
    outbox: Sender<ServerMessage>,
}

/// A loaded board and the sessions subscribed to it.
struct LiveBoard {
    board: Board,
    subscribers: Vec<(SessionId, Sender<ServerMessage>)>,
}

impl LiveBoard {
    /// Serial, persist, apply and fan out `events` as one bundle.
    fn commit<S: EventLogStore + ?Sized>(
        &mut self,
        store: &S,
        actor: &Actor,
        events: Vec<AppEvent>,
    ) -> Result<Vec<HistoryEntry>> {
        if events.is_empty() {
            return Ok(Vec::new());
        }
        if let Some(stray) = events.iter().find(|e| e.board_id() != &self.board.id) {
            return Err(Error::BoardMismatch {
                expected: self.board.id.clone(),
                found: stray.board_id().clone(),
            });
        }

        let tail = self.board.serial;
        let entries: Vec<HistoryEntry> = events
            .into_iter()
            .zip(tail + 1..)
            .map(|(event, serial)| HistoryEntry::new(serial, actor.clone(), event))
            .collect();

        store.append_bundle(&self.board.id, &entries)?;
        for entry in &entries {
            reducer::apply(&mut self.board, entry, ApplyOptions::strict())?;
        }
        // Replay keeps the stored policy, so a policy change must reach a
        // snapshot before anyone else can load the board.
        if entries
            .iter()
            .any(|e| matches!(e.event, AppEvent::SetAccessPolicy { .. }))
        {
            store.write_snapshot(&self.board.id, &self.board)?;
            log::debug!(
                "boardfold: board '{}': access policy persisted at serial {}",
                self.board.id,
                self.board.serial
            );
        }
        self.broadcast(&entries);
        Ok(entries)
    }

    fn broadcast(&mut self, entries: &[HistoryEntry]) {
        let board_id = &self.board.id;
        self.subscribers.retain(|(session, outbox)| {
            let delivered = entries.iter().all(|entry| {
                outbox
                    .send(ServerMessage::Event {
                        entry: entry.clone(),
                    })
                    .is_ok()
            });
            if !delivered {
                log::warn!("boardfold: board '{board_id}': dropping closed session {session}");
            }
            delivered
        });
    }
}

type BoardSlot = Arc<Mutex<Option<LiveBoard>>>;

/// Server-side owner of live boards and client sessions.
///
/// # Examples
///
/// ```
/// use boardfold::sync::{BoardHub, ClientMessage, ServerMessage};
/// use boardfold::{Actor, AppEvent, Board, BoardId, Item, MemoryStore};
/// use std::sync::{mpsc, Arc};
///
/// let hub = BoardHub::new(Arc::new(MemoryStore::new()));
/// let id = BoardId::new("retro");
/// hub.create_board(Board::new(id.clone(), "Retro"), &Actor::anonymous("ada"), vec![])
///     .unwrap();
///
/// let (tx, rx) = mpsc::channel();
/// let session = hub.connect(Actor::anonymous("ada"), tx).unwrap();
/// hub.handle(session, ClientMessage::Join { board_id: id.clone() }).unwrap();
/// hub.handle(session, ClientMessage::Batch {
///     events: vec![AppEvent::AddItem { board_id: id.clone(), item: Item::note("a", "hi", 0.0, 0.0) }],
/// })
/// .unwrap();
///
/// let received: Vec<ServerMessage> = rx.try_iter().collect();
/// assert!(matches!(received[0], ServerMessage::BoardState { .. }));
/// assert!(matches!(&received[1], ServerMessage::Event { entry } if entry.serial == 1));
/// assert!(matches!(received[2], ServerMessage::Ack { .. }));
/// ```
pub struct BoardHub<S: EventLogStore + ?Sized> {
    store: Arc<S>,
    config: LoaderConfig,
    boards: Mutex<HashMap<BoardId, BoardSlot>>,
    sessions: Mutex<HashMap<SessionId, Session>>,
    next_session: AtomicU64,
}

impl<S: EventLogStore + ?Sized> BoardHub<S> {
    pub fn new(store: Arc<S>) -> Self {
        BoardHub::with_config(store, LoaderConfig::default())
    }

    pub fn with_config(store: Arc<S>, config: LoaderConfig) -> Self {
        BoardHub {
            store,
            config,
            boards: Mutex::new(HashMap::new()),
            sessions: Mutex::new(HashMap::new()),
            next_session: AtomicU64::new(1),
        }
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    /// Register a board, stored as its serial-0 snapshot, and seed it with
    /// `bootstrap` events as its first bundle.
    pub fn create_board(
        &self,
        mut board: Board,
        actor: &Actor,
        bootstrap: Vec<AppEvent>,
    ) -> Result<Board> {
        board.serial = 0;
        self.store.create_board(&SnapshotRecord::of(&board))?;
        if bootstrap.is_empty() {
            return Ok(board);
        }
        let board_id = board.id.clone();
        self.with_board(&board_id, |live| {
            live.commit(&*self.store, actor, bootstrap)?;
            Ok(live.board.clone())
        })
    }

    /// Open a session whose server messages go to `outbox`.
    pub fn connect(&self, actor: Actor, outbox: Sender<ServerMessage>) -> Result<SessionId> {
        let mut sessions = self.sessions()?;
        let id = self.next_session.fetch_add(1, Ordering::Relaxed);
        sessions.insert(
            id,
            Session {
                actor,
                board_id: None,
                outbox,
            },
        );
        Ok(id)
    }

    /// Close a session and unsubscribe it from its board.
    pub fn disconnect(&self, session: SessionId) {
        let board_id = match self.sessions.lock() {
            Ok(mut sessions) => sessions.remove(&session).and_then(|s| s.board_id),
            Err(_) => None,
        };
        if let Some(board_id) = board_id {
            self.leave(session, &board_id);
        }
    }

    /// Dispatch one client message.
    pub fn handle(&self, session: SessionId, message: ClientMessage) -> Result<()> {
        match message {
            ClientMessage::Join { board_id } => self.join(session, &board_id).map(|_| ()),
            ClientMessage::Batch { events } => self.submit(session, events).map(|_| ()),
        }
    }

    /// Subscribe `session` to `board_id`, loading the board if needed, and
    /// send it the current state.
    pub fn join(&self, session: SessionId, board_id: &BoardId) -> Result<Board> {
        let (outbox, previous) = {
            let sessions = self.sessions()?;
            let s = sessions
                .get(&session)
                .ok_or(Error::UnknownSession(session))?;
            (s.outbox.clone(), s.board_id.clone())
        };

        let board = self.with_board(board_id, |live| {
            live.subscribers.retain(|(id, _)| *id != session);
            live.subscribers.push((session, outbox.clone()));
            let _ = outbox.send(ServerMessage::BoardState {
                board: live.board.clone(),
            });
            Ok(live.board.clone())
        })?;

        if let Some(s) = self.sessions()?.get_mut(&session) {
            s.board_id = Some(board_id.clone());
        }
        if let Some(previous) = previous.filter(|p| p != board_id) {
            self.leave(session, &previous);
        }
        Ok(board)
    }

    /// Accept a batch from `session`: assign serials, append one bundle,
    /// apply to the live board, broadcast, then ack the origin.
    ///
    /// The batch carries no serials, so a client that has not yet seen the
    /// newest events is not an error: its events simply follow them.
    pub fn submit(&self, session: SessionId, events: Vec<AppEvent>) -> Result<Vec<HistoryEntry>> {
        let (board_id, actor, outbox) = {
            let sessions = self.sessions()?;
            let s = sessions
                .get(&session)
                .ok_or(Error::UnknownSession(session))?;
            let board_id = s.board_id.clone().ok_or(Error::NotJoined(session))?;
            (board_id, s.actor.clone(), s.outbox.clone())
        };

        let entries = self.with_board(&board_id, |live| {
            live.commit(&*self.store, &actor, events)
        })?;

        if outbox.send(ServerMessage::Ack { board_id }).is_err() {
            log::warn!("boardfold: session {session} closed before its ack");
        }
        Ok(entries)
    }

    /// Current state of a board, loading it if it is not live.
    pub fn board(&self, board_id: &BoardId) -> Result<Board> {
        self.with_board(board_id, |live| Ok(live.board.clone()))
    }

    fn sessions(&self) -> Result<MutexGuard<'_, HashMap<SessionId, Session>>> {
        self.sessions
            .lock()
            .map_err(|_| Error::Poisoned("sessions".to_string()))
    }

    /// Number of boards currently held in memory.
    pub fn live_boards(&self) -> usize {
        self.boards.lock().map(|boards| boards.len()).unwrap_or(0)
    }

    fn slot(&self, board_id: &BoardId) -> Result<BoardSlot> {
        let mut boards = self
            .boards
            .lock()
            .map_err(|_| Error::Poisoned(board_id.to_string()))?;
        Ok(Arc::clone(boards.entry(board_id.clone()).or_default()))
    }

    /// Whether `slot` is still the registered slot for `board_id`. Called with
    /// the slot locked; an evicted slot must not be revived.
    fn is_registered(&self, board_id: &BoardId, slot: &BoardSlot) -> Result<bool> {
        let boards = self
            .boards
            .lock()
            .map_err(|_| Error::Poisoned(board_id.to_string()))?;
        Ok(boards.get(board_id).is_some_and(|s| Arc::ptr_eq(s, slot)))
    }

    /// Drop the slot for `board_id` if it is `slot`, unlocked, and holds no
    /// subscribers. A busy slot is left to whoever holds it.
    fn evict_if_idle(&self, board_id: &BoardId, slot: &BoardSlot) {
        let Ok(mut boards) = self.boards.lock() else {
            return;
        };
        let idle = match boards.get(board_id) {
            Some(current) if Arc::ptr_eq(current, slot) => match current.try_lock() {
                Ok(guard) => guard.as_ref().is_none_or(|l| l.subscribers.is_empty()),
                Err(_) => false,
            },
            _ => false,
        };
        if idle {
            boards.remove(board_id);
            log::debug!("boardfold: board '{board_id}': evicted");
        }
    }

    /// Run `f` on the live board under its lock, loading it first if needed.
    ///
    /// If the store reports that its tail moved under us (another writer
    /// appended), the board is reloaded and every subscriber is sent the
    /// reloaded state. A board left without subscribers is released.
    fn with_board<T>(
        &self,
        board_id: &BoardId,
        f: impl FnOnce(&mut LiveBoard) -> Result<T>,
    ) -> Result<T> {
        loop {
            let slot = self.slot(board_id)?;
            let mut guard = slot.lock().map_err(|_| Error::Poisoned(board_id.to_string()))?;
            if !self.is_registered(board_id, &slot)? {
                continue;
            }
            if guard.is_none() {
                match self.loader().load(board_id) {
                    Ok(board) => {
                        *guard = Some(LiveBoard {
                            board,
                            subscribers: Vec::new(),
                        })
                    }
                    Err(e) => {
                        drop(guard);
                        self.evict_if_idle(board_id, &slot);
                        return Err(e);
                    }
                }
            }
            let Some(live) = guard.as_mut() else {
                return Err(Error::UnknownBoard(board_id.clone()));
            };
            let mut result = f(live);
            if let Err(Error::NonContiguousAppend { tail, .. }) = &result {
                log::warn!(
                    "boardfold: board '{board_id}': store tail is {tail}, live board is at {}; reloading",
                    live.board.serial
                );
                match self.loader().load(board_id) {
                    Ok(board) => {
                        live.board = board;
                        for (_, outbox) in &live.subscribers {
                            let _ = outbox.send(ServerMessage::BoardState {
                                board: live.board.clone(),
                            });
                        }
                    }
                    Err(e) => result = Err(e),
                }
            }
            if guard.as_ref().is_none_or(|l| l.subscribers.is_empty()) {
                *guard = None;
                drop(guard);
                self.evict_if_idle(board_id, &slot);
            }
            return result;
        }
    }

    fn loader(&self) -> BoardLoader<'_, S> {
        BoardLoader::with_config(&*self.store, self.config)
    }

    /// Unsubscribe `session`; the last subscriber out releases the board.
    fn leave(&self, session: SessionId, board_id: &BoardId) {
        let slot = match self.boards.lock() {
            Ok(boards) => boards.get(board_id).cloned(),
            Err(_) => None,
        };
        let Some(slot) = slot else {
            return;
        };
        if let Ok(mut guard) = slot.lock() {
            if let Some(live) = guard.as_mut() {
                live.subscribers.retain(|(id, _)| *id != session);
            }
            if guard.as_ref().is_none_or(|l| l.subscribers.is_empty()) {
                *guard = None;
            }
        }
        self.evict_if_idle(board_id, &slot);
    }
}
