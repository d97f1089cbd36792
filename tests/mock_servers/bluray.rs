//! Mock Panasonic Blu-ray player for testing
//!
//! Simulates the form-encoded control interface at /WAN/dvdr/dvdr_ctrl.cgi

use axum::{
    extract::State,
    http::{header, HeaderMap},
    routing::post,
    Router,
};
use std::collections::HashSet;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::net::TcpListener;
use tokio::sync::RwLock;
use tokio::task::JoinHandle;

const OK_LINE: &str = "00, \"\", 1\r\n";
const ERROR_BODY: &[u8] = b"FE\x01\x02\x03";

/// Which protocol generation the mock speaks
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PlayerGeneration {
    /// BD players: key presses and GET_STATUS answered
    Legacy,
    /// UB players: key presses and GET_STATUS rejected
    Modern,
}

/// Mock player state
struct MockBlurayState {
    generation: PlayerGeneration,
    /// GET_STATUS field 0
    coarse: String,
    /// PST field 0
    fine: String,
    position: i64,
    duration: i64,
    rejected_keys: HashSet<String>,
    /// Keys the player accepted, in order
    keys: Vec<String>,
    /// Every command name received, in order
    commands: Vec<String>,
    user_agent: Option<String>,
}

/// Mock Blu-ray player
pub struct MockBlurayPlayer {
    addr: SocketAddr,
    state: Arc<RwLock<MockBlurayState>>,
    handle: JoinHandle<()>,
}

impl MockBlurayPlayer {
    /// Start a mock player on a random port, stopped with no disc
    pub async fn start(generation: PlayerGeneration) -> Self {
        let state = Arc::new(RwLock::new(MockBlurayState {
            generation,
            coarse: "2".to_string(),
            fine: "0".to_string(),
            position: 0,
            duration: 0,
            rejected_keys: HashSet::new(),
            keys: Vec::new(),
            commands: Vec::new(),
            user_agent: None,
        }));

        let app = Router::new()
            .route("/WAN/dvdr/dvdr_ctrl.cgi", post(handle_control))
            .with_state(state.clone());

        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();

        let handle = tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });

        Self {
            addr,
            state,
            handle,
        }
    }

    /// Device address (`host:port`) to configure the session with
    pub fn address(&self) -> String {
        self.addr.to_string()
    }

    /// Set coarse (GET_STATUS) and fine (PST) state codes
    pub async fn set_state(&self, coarse: &str, fine: &str) {
        let mut state = self.state.write().await;
        state.coarse = coarse.to_string();
        state.fine = fine.to_string();
    }

    /// Set playing time and total time in seconds
    pub async fn set_times(&self, position: i64, duration: i64) {
        let mut state = self.state.write().await;
        state.position = position;
        state.duration = duration;
    }

    /// Answer this key with an error
    pub async fn reject_key(&self, key: &str) {
        self.state.write().await.rejected_keys.insert(key.to_string());
    }

    /// Keys accepted so far
    pub async fn keys(&self) -> Vec<String> {
        self.state.read().await.keys.clone()
    }

    /// Number of requests received for a command name (e.g. "PST", "RC_MENU")
    pub async fn count(&self, command: &str) -> usize {
        self.state
            .read()
            .await
            .commands
            .iter()
            .filter(|c| *c == command)
            .count()
    }

    /// User-Agent of the last request
    pub async fn user_agent(&self) -> Option<String> {
        self.state.read().await.user_agent.clone()
    }

    /// Stop the mock server
    pub fn stop(self) {
        self.handle.abort();
    }
}

/// Extract NAME from `cCMD_<NAME>.x=100&cCMD_<NAME>.y=100`
fn command_name(body: &str) -> Option<&str> {
    let rest = body.strip_prefix("cCMD_")?;
    let end = rest.find(".x=")?;
    Some(&rest[..end])
}

async fn handle_control(
    State(state): State<Arc<RwLock<MockBlurayState>>>,
    headers: HeaderMap,
    body: String,
) -> Vec<u8> {
    let mut state = state.write().await;
    state.user_agent = headers
        .get(header::USER_AGENT)
        .and_then(|v| v.to_str().ok())
        .map(|s| s.to_string());

    let Some(name) = command_name(&body) else {
        return ERROR_BODY.to_vec();
    };
    state.commands.push(name.to_string());

    match name {
        "PST" => format!(
            "{}{},{},0,00000000\r\n",
            OK_LINE, state.fine, state.position
        )
        .into_bytes(),
        "GET_STATUS" if state.generation == PlayerGeneration::Legacy => format!(
            "{}{},0,0,{},{},0,1,8,2,0,00000000\r\n",
            OK_LINE, state.coarse, state.position, state.duration
        )
        .into_bytes(),
        key_command if key_command.starts_with("RC_") => {
            let key = &key_command[3..];
            if state.generation == PlayerGeneration::Modern || state.rejected_keys.contains(key) {
                return ERROR_BODY.to_vec();
            }
            state.keys.push(key.to_string());
            OK_LINE.as_bytes().to_vec()
        }
        _ => ERROR_BODY.to_vec(),
    }
}
