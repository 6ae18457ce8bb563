//! WebSocket control channel for the floating timer widget.
//!
//! Each text frame from a client is one [`ControlCommand`]; every command is
//! answered with a [`ControlResponse`] carrying the full state. Tick snapshots
//! and progress log changes are pushed to all connected clients as they happen.

use std::net::SocketAddr;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use futures_util::{SinkExt, StreamExt};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::broadcast::error::RecvError;
use tokio::sync::mpsc;
use tokio_tungstenite::tungstenite::protocol::Message;
use tracing::{debug, info, warn};

use crate::error::Result;
use crate::pomodoro::engine::TimerSnapshot;
use crate::pomodoro::runner::TimerRunner;
use crate::pomodoro::settings::{BREAK_MINUTES_RANGE, WORK_MINUTES_RANGE, parse_minutes};
use crate::progress::{Progress, ProgressInput, ProgressStore};
use crate::widget::{FloatingWidget, Point, Size};

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ControlCommand {
    Start,
    Pause,
    Reset,
    Snapshot,
    /// `minutes` may be a number or text; out-of-range input is clamped.
    SetWorkMinutes { minutes: Value },
    SetBreakMinutes { minutes: Value },
    SelectTask {
        #[serde(default)]
        id: Option<String>,
    },
    AddTask { title: String },
    ToggleTask { id: String },
    RemoveTask { id: String },
    DragStart { x: i32, y: i32 },
    DragMove { x: i32, y: i32 },
    DragEnd,
    ToggleLock,
    ToggleVisible,
    Resize { width: i32, height: i32 },
    AddProgress(ProgressInput),
    DeleteProgress { id: String },
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StateView {
    pub timer: TimerSnapshot,
    pub widget: FloatingWidget,
    /// The owner's progress log, newest first.
    pub progress: Vec<Progress>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ControlResponse {
    pub success: bool,
    pub message: Option<String>,
    pub state: StateView,
}

/// Everything a connection may touch.
#[derive(Debug)]
pub struct ControlState {
    runner: Arc<TimerRunner>,
    widget: Mutex<FloatingWidget>,
    progress: Mutex<ProgressStore>,
    uid: String,
}

impl ControlState {
    pub fn new(
        runner: Arc<TimerRunner>,
        widget: FloatingWidget,
        progress: ProgressStore,
        uid: impl Into<String>,
    ) -> Self {
        Self {
            runner,
            widget: Mutex::new(widget),
            progress: Mutex::new(progress),
            uid: uid.into(),
        }
    }

    pub fn view(&self) -> StateView {
        self.view_with(self.runner.snapshot())
    }

    fn view_with(&self, timer: TimerSnapshot) -> StateView {
        StateView {
            timer,
            widget: self.widget().clone(),
            progress: self.progress().list_for(&self.uid),
        }
    }

    fn widget(&self) -> MutexGuard<'_, FloatingWidget> {
        self.widget.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn progress(&self) -> MutexGuard<'_, ProgressStore> {
        self.progress.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn apply(&self, command: ControlCommand) -> ControlResponse {
        debug!(?command, "control command");
        let outcome: std::result::Result<Option<String>, String> = match command {
            ControlCommand::Start => {
                self.runner.start();
                Ok(None)
            }
            ControlCommand::Pause => {
                self.runner.pause();
                Ok(None)
            }
            ControlCommand::Reset => {
                self.runner.reset();
                Ok(None)
            }
            ControlCommand::Snapshot => Ok(None),
            ControlCommand::SetWorkMinutes { minutes } => {
                let minutes = minutes_from(&minutes, WORK_MINUTES_RANGE);
                self.runner.update(|e| e.set_work_minutes(minutes));
                Ok(None)
            }
            ControlCommand::SetBreakMinutes { minutes } => {
                let minutes = minutes_from(&minutes, BREAK_MINUTES_RANGE);
                self.runner.update(|e| e.set_break_minutes(minutes));
                Ok(None)
            }
            ControlCommand::SelectTask { id } => {
                self.runner.update(|e| e.select_task(id.as_deref()));
                Ok(None)
            }
            ControlCommand::AddTask { title } => self
                .runner
                .update(|e| e.add_task(&title))
                .map(|task| Some(format!("added task {}", task.id)))
                .map_err(|e| e.to_string()),
            ControlCommand::ToggleTask { id } => self
                .runner
                .update(|e| e.toggle_task(&id))
                .map(|_| None)
                .map_err(|e| e.to_string()),
            ControlCommand::RemoveTask { id } => self
                .runner
                .update(|e| e.remove_task(&id))
                .map(|_| None)
                .map_err(|e| e.to_string()),
            ControlCommand::DragStart { x, y } => {
                self.widget().on_drag_start(Point::new(x, y));
                Ok(None)
            }
            ControlCommand::DragMove { x, y } => {
                self.widget().on_drag_move(Point::new(x, y));
                Ok(None)
            }
            ControlCommand::DragEnd => {
                self.widget().on_drag_end();
                Ok(None)
            }
            ControlCommand::ToggleLock => {
                self.widget().toggle_lock();
                Ok(None)
            }
            ControlCommand::ToggleVisible => {
                self.widget().toggle_visible();
                Ok(None)
            }
            ControlCommand::Resize { width, height } => {
                self.widget().resize(Size::new(width, height));
                Ok(None)
            }
            ControlCommand::AddProgress(input) => self
                .progress()
                .append(&self.uid, input)
                .map(|entry| Some(format!("saved progress {}", entry.id)))
                .map_err(|e| e.to_string()),
            ControlCommand::DeleteProgress { id } => self
                .progress()
                .delete(&self.uid, &id)
                .map(|_| None)
                .map_err(|e| e.to_string()),
        };

        let state = self.view();
        match outcome {
            Ok(message) => ControlResponse {
                success: true,
                message,
                state,
            },
            Err(message) => ControlResponse {
                success: false,
                message: Some(message),
                state,
            },
        }
    }
}

fn minutes_from(value: &Value, range: (u32, u32)) -> u32 {
    match value {
        Value::Number(n) => parse_minutes(&n.to_string(), range),
        Value::String(s) => parse_minutes(s, range),
        _ => range.0,
    }
}

pub async fn bind_control_server(addr: SocketAddr) -> Result<TcpListener> {
    let listener = TcpListener::bind(&addr).await?;
    info!(addr = %listener.local_addr()?, "control server listening");
    Ok(listener)
}

pub async fn serve(listener: TcpListener, state: Arc<ControlState>) -> Result<()> {
    loop {
        let (stream, peer_addr) = listener.accept().await?;
        debug!(%peer_addr, "new control connection");
        tokio::spawn(handle_connection(stream, peer_addr, Arc::clone(&state)));
    }
}

async fn handle_connection(stream: TcpStream, peer_addr: SocketAddr, state: Arc<ControlState>) {
    let ws_stream = match tokio_tungstenite::accept_async(stream).await {
        Ok(ws) => ws,
        Err(e) => {
            warn!(%peer_addr, error = %e, "WebSocket handshake failed");
            return;
        }
    };
    info!(%peer_addr, "widget connected");

    let (mut ws_sender, mut ws_receiver) = ws_stream.split();
    let mut ticks = state.runner.subscribe();

    // Held for the life of the connection; the first delivery doubles as the
    // initial state push.
    let (progress_tx, mut progress_rx) = mpsc::unbounded_channel();
    let _subscription = state.progress().subscribe(&state.uid, move |entries| {
        let _ = progress_tx.send(entries);
    });

    loop {
        tokio::select! {
            msg = ws_receiver.next() => {
                let Some(msg) = msg else { break };
                match msg {
                    Ok(Message::Text(text)) => {
                        let response = match serde_json::from_str::<ControlCommand>(&text) {
                            Ok(command) => state.apply(command),
                            Err(e) => {
                                debug!(%peer_addr, error = %e, "unparseable control message");
                                ControlResponse {
                                    success: false,
                                    message: Some(format!("Parse error: {e}")),
                                    state: state.view(),
                                }
                            }
                        };
                        if send_json(&mut ws_sender, &response).await.is_err() {
                            break;
                        }
                    }
                    Ok(Message::Ping(data)) => {
                        if let Err(e) = ws_sender.send(Message::Pong(data)).await {
                            debug!(%peer_addr, error = %e, "failed to send pong");
                            break;
                        }
                    }
                    Ok(Message::Close(_)) => break,
                    Ok(_) => {}
                    Err(e) => {
                        warn!(%peer_addr, error = %e, "WebSocket error");
                        break;
                    }
                }
            }
            tick = ticks.recv() => {
                let timer = match tick {
                    Ok(timer) => timer,
                    // Only the newest state matters.
                    Err(RecvError::Lagged(_)) => continue,
                    Err(RecvError::Closed) => break,
                };
                let push = ControlResponse {
                    success: true,
                    message: None,
                    state: state.view_with(timer),
                };
                if send_json(&mut ws_sender, &push).await.is_err() {
                    break;
                }
            }
            Some(entries) = progress_rx.recv() => {
                let mut view = state.view();
                view.progress = entries;
                let push = ControlResponse {
                    success: true,
                    message: None,
                    state: view,
                };
                if send_json(&mut ws_sender, &push).await.is_err() {
                    break;
                }
            }
        }
    }

    info!(%peer_addr, "widget disconnected");
}

async fn send_json<S>(sender: &mut S, response: &ControlResponse) -> std::result::Result<(), ()>
where
    S: SinkExt<Message> + Unpin,
{
    let json = serde_json::to_string(response).map_err(|e| {
        warn!(error = %e, "failed to encode control response");
    })?;
    sender.send(Message::Text(json)).await.map_err(|_| {
        debug!("control client went away");
    })
}
