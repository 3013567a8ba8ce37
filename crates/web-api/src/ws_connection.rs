use application::{
    events::AuthErrorNotice, AuthError, Inbound, ServerEvent, Session,
};
use axum::extract::ws::{close_code, CloseFrame, Message as WsMessage, WebSocket};
use futures_util::{
    stream::{SplitSink, SplitStream},
    SinkExt, StreamExt,
};
use tokio::{sync::mpsc, task::JoinHandle};

use crate::state::AppState;

type WsSink = SplitSink<WebSocket, WsMessage>;

/// WebSocket 连接驱动
///
/// 握手认证成功后，一个写任务负责所有出站帧，当前任务顺序处理入站帧。
/// 同一连接的事件因此按到达顺序分派。
pub struct WebSocketConnection {
    socket: WebSocket,
    state: AppState,
    credential: Option<String>,
}

/// 写任务的控制命令，业务事件走单独的通道
#[derive(Debug)]
enum WsCommand {
    SendPong(axum::body::Bytes),
    Close,
}

impl WebSocketConnection {
    pub fn new(socket: WebSocket, state: AppState, credential: Option<String>) -> Self {
        Self {
            socket,
            state,
            credential,
        }
    }

    pub async fn run(self) {
        let Self {
            socket,
            state,
            credential,
        } = self;
        let (mut sink, incoming) = socket.split();
        let (event_tx, event_rx) = mpsc::channel(state.realtime.outbound_buffer);

        let session = match state
            .sessions
            .on_connect(credential.as_deref(), event_tx)
            .await
        {
            Ok(session) => session,
            Err(err) => {
                tracing::info!(reason = err.reason(), "WebSocket 握手被拒绝");
                reject(&mut sink, err).await;
                return;
            }
        };

        let (cmd_tx, cmd_rx) = mpsc::channel::<WsCommand>(8);
        let mut send_task = spawn_writer(sink, event_rx, cmd_rx);

        let session = read_loop(&state, session, incoming, &cmd_tx, &mut send_task).await;

        state.sessions.on_disconnect(session).await;

        if !send_task.is_finished() {
            let _ = cmd_tx.send(WsCommand::Close).await;
            if let Err(err) = send_task.await {
                tracing::warn!(error = %err, "WebSocket发送任务异常结束");
            }
        }
    }
}

async fn read_loop(
    state: &AppState,
    mut session: Session,
    mut incoming: SplitStream<WebSocket>,
    cmd_tx: &mpsc::Sender<WsCommand>,
    send_task: &mut JoinHandle<()>,
) -> Session {
    let idle_timeout = state.realtime.idle_timeout();

    loop {
        let frame = tokio::select! {
            _ = &mut *send_task => {
                tracing::info!(connection_id = %session.connection_id(), "WebSocket发送任务结束");
                break;
            }
            frame = tokio::time::timeout(idle_timeout, incoming.next()) => frame,
        };

        let message = match frame {
            Err(_) => {
                tracing::info!(
                    connection_id = %session.connection_id(),
                    idle_secs = idle_timeout.as_secs(),
                    "连接空闲超时"
                );
                break;
            }
            Ok(None) => break,
            Ok(Some(Err(err))) => {
                tracing::debug!(connection_id = %session.connection_id(), error = %err, "WebSocket读取失败");
                break;
            }
            Ok(Some(Ok(message))) => message,
        };

        match message {
            WsMessage::Text(text) => match Inbound::decode(text.as_str()) {
                Inbound::Event(event) => state.sessions.on_event(&mut session, event).await,
                Inbound::Unknown(name) => {
                    tracing::debug!(event = %name, "忽略未知事件");
                }
                Inbound::Malformed(reason) => state.sessions.reject_frame(&session, &reason).await,
            },
            WsMessage::Binary(_) => {
                tracing::debug!("忽略二进制帧");
            }
            WsMessage::Ping(data) => {
                if cmd_tx.send(WsCommand::SendPong(data)).await.is_err() {
                    break;
                }
            }
            WsMessage::Pong(_) => {}
            WsMessage::Close(_) => {
                tracing::debug!(connection_id = %session.connection_id(), "WebSocket收到关闭消息");
                break;
            }
        }
    }

    session
}

fn spawn_writer(
    mut sink: WsSink,
    mut events: mpsc::Receiver<ServerEvent>,
    mut commands: mpsc::Receiver<WsCommand>,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        loop {
            tokio::select! {
                Some(command) = commands.recv() => match command {
                    WsCommand::SendPong(data) => {
                        if sink.send(WsMessage::Pong(data)).await.is_err() {
                            break;
                        }
                    }
                    WsCommand::Close => {
                        let _ = sink.send(WsMessage::Close(None)).await;
                        break;
                    }
                },
                Some(event) = events.recv() => {
                    let payload = match serde_json::to_string(&event) {
                        Ok(json) => json,
                        Err(err) => {
                            tracing::warn!(error = %err, event = event.name(), "WebSocket消息序列化失败");
                            continue;
                        }
                    };
                    if sink.send(WsMessage::Text(payload.into())).await.is_err() {
                        break;
                    }
                }
                else => break,
            }
        }
    })
}

/// 发送 `auth-error` 后以策略违规关闭连接
async fn reject(sink: &mut WsSink, err: AuthError) {
    let event = ServerEvent::AuthError(AuthErrorNotice {
        reason: err.reason().to_string(),
        message: err.to_string(),
    });
    if let Ok(payload) = serde_json::to_string(&event) {
        let _ = sink.send(WsMessage::Text(payload.into())).await;
    }
    let _ = sink
        .send(WsMessage::Close(Some(CloseFrame {
            code: close_code::POLICY,
            reason: err.reason().into(),
        })))
        .await;
}
