//! [`RecordStore`] backed by the hosted board API over HTTP, with the change
//! feed streamed over a websocket.

use std::time::Duration;

use async_trait::async_trait;
use db::{
    RecordStore, StoreError, Subscription, TaskChange,
    models::{
        board::{Board, CreateBoard},
        board_member::{BoardMember, CreateBoardMember},
        profile::Profile,
        task::{CreateTask, Task, UpdateTask},
    },
    wire::{ErrorBody, ServerMessage},
};
use futures::StreamExt;
use futures_util::SinkExt;
use reqwest::{Client, Method, RequestBuilder, Response, StatusCode};
use secrecy::{ExposeSecret, SecretString};
use serde::{Serialize, de::DeserializeOwned};
use thiserror::Error;
use tokio::{sync::mpsc, time::sleep};
use tokio_stream::wrappers::UnboundedReceiverStream;
use tokio_tungstenite::{
    connect_async,
    tungstenite::{
        client::IntoClientRequest,
        http::{HeaderValue, header::AUTHORIZATION},
        protocol::Message,
    },
};
use tracing::{debug, info, warn};
use url::Url;
use uuid::Uuid;

const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);
const MAX_RECONNECT_BACKOFF: Duration = Duration::from_secs(30);

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("environment variable `{0}` is not set")]
    MissingVar(&'static str),
    #[error("`{var}` is not a valid URL: {source}")]
    InvalidUrl {
        var: &'static str,
        #[source]
        source: url::ParseError,
    },
    #[error("unsupported URL scheme `{0}`")]
    UnsupportedScheme(String),
}

pub struct RemoteStoreConfig {
    api_base: Url,
    websocket_base: Url,
    access_token: SecretString,
}

impl RemoteStoreConfig {
    pub fn new(api_base: Url, access_token: SecretString) -> Result<Self, ConfigError> {
        let websocket_base = derive_websocket_base(&api_base)?;
        Ok(Self {
            api_base,
            websocket_base,
            access_token,
        })
    }

    pub fn from_env() -> Result<Self, ConfigError> {
        let api_raw = std::env::var("KANBAN_API_BASE")
            .map_err(|_| ConfigError::MissingVar("KANBAN_API_BASE"))?;
        let api_base = Url::parse(api_raw.trim()).map_err(|source| ConfigError::InvalidUrl {
            var: "KANBAN_API_BASE",
            source,
        })?;
        let access_token = std::env::var("KANBAN_ACCESS_TOKEN")
            .map_err(|_| ConfigError::MissingVar("KANBAN_ACCESS_TOKEN"))?;

        let access_token = SecretString::from(access_token.trim().to_string());
        let mut config = Self::new(api_base, access_token)?;
        if let Ok(raw) = std::env::var("KANBAN_WS_URL") {
            config.websocket_base =
                Url::parse(raw.trim()).map_err(|source| ConfigError::InvalidUrl {
                    var: "KANBAN_WS_URL",
                    source,
                })?;
        }
        Ok(config)
    }

    fn endpoint(&self, path: &str) -> Url {
        join_path(&self.api_base, path)
    }

    fn websocket_endpoint(&self, board_id: Uuid) -> Url {
        join_path(&self.websocket_base, &format!("/v1/boards/{board_id}/ws"))
    }
}

/// Appends `path` to whatever prefix the base is mounted under.
fn join_path(base: &Url, path: &str) -> Url {
    let mut url = base.clone();
    let prefix = base.path().trim_end_matches('/');
    url.set_path(&format!("{prefix}/{}", path.trim_start_matches('/')));
    url
}

fn derive_websocket_base(api_base: &Url) -> Result<Url, ConfigError> {
    let mut url = api_base.clone();
    let scheme = match url.scheme() {
        "http" => "ws",
        "https" => "wss",
        other @ ("ws" | "wss") => other,
        other => return Err(ConfigError::UnsupportedScheme(other.to_string())),
    }
    .to_string();
    url.set_scheme(&scheme)
        .map_err(|_| ConfigError::UnsupportedScheme(scheme.clone()))?;
    url.set_query(None);
    Ok(url)
}

pub struct RemoteRecordStore {
    client: Client,
    config: RemoteStoreConfig,
    user_id: Uuid,
}

impl RemoteRecordStore {
    /// Resolves the signed-in user from the access token.
    pub async fn connect(config: RemoteStoreConfig) -> Result<Self, StoreError> {
        let client = Client::builder()
            .timeout(REQUEST_TIMEOUT)
            .build()
            .map_err(StoreError::transport)?;
        let mut store = Self {
            client,
            config,
            user_id: Uuid::nil(),
        };
        let me: Profile = store.send(store.request(Method::GET, "/v1/me")).await?;
        store.user_id = me.id;
        info!(user_id = %me.id, "connected to board store");
        Ok(store)
    }

    fn request(&self, method: Method, path: &str) -> RequestBuilder {
        self.client
            .request(method, self.config.endpoint(path))
            .bearer_auth(self.config.access_token.expose_secret())
    }

    fn with_body<B: Serialize>(&self, method: Method, path: &str, body: &B) -> RequestBuilder {
        self.request(method, path).json(body)
    }

    async fn send<T: DeserializeOwned>(&self, request: RequestBuilder) -> Result<T, StoreError> {
        let response = self.execute(request).await?;
        response.json().await.map_err(StoreError::transport)
    }

    async fn send_empty(&self, request: RequestBuilder) -> Result<(), StoreError> {
        self.execute(request).await.map(|_| ())
    }

    /// Like [`send`](Self::send) but maps 404 to `None`.
    async fn send_optional<T: DeserializeOwned>(
        &self,
        request: RequestBuilder,
    ) -> Result<Option<T>, StoreError> {
        match self.send(request).await {
            Ok(value) => Ok(Some(value)),
            Err(StoreError::NotFound(_)) => Ok(None),
            Err(error) => Err(error),
        }
    }

    async fn execute(&self, request: RequestBuilder) -> Result<Response, StoreError> {
        let response = request.send().await.map_err(StoreError::transport)?;
        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }
        let message = match response.json::<ErrorBody>().await {
            Ok(body) => body.error,
            Err(_) => status.to_string(),
        };
        Err(error_from_status(status, message))
    }
}

pub(crate) fn error_from_status(status: StatusCode, message: String) -> StoreError {
    match status {
        StatusCode::NOT_FOUND => StoreError::NotFound(message),
        StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => StoreError::Forbidden(message),
        StatusCode::BAD_REQUEST | StatusCode::CONFLICT | StatusCode::UNPROCESSABLE_ENTITY => {
            StoreError::Validation(message)
        }
        _ => StoreError::Transport(message),
    }
}

#[async_trait]
impl RecordStore for RemoteRecordStore {
    fn session_user_id(&self) -> Uuid {
        self.user_id
    }

    async fn fetch_tasks(&self, board_id: Uuid) -> Result<Vec<Task>, StoreError> {
        self.send(self.request(Method::GET, &format!("/v1/boards/{board_id}/tasks")))
            .await
    }

    async fn create_task(&self, data: CreateTask) -> Result<Task, StoreError> {
        let path = format!("/v1/boards/{}/tasks", data.board_id);
        self.send(self.with_body(Method::POST, &path, &data)).await
    }

    async fn update_task(&self, task_id: Uuid, data: UpdateTask) -> Result<Task, StoreError> {
        let path = format!("/v1/tasks/{task_id}");
        self.send(self.with_body(Method::PATCH, &path, &data)).await
    }

    async fn delete_task(&self, task_id: Uuid) -> Result<(), StoreError> {
        self.send_empty(self.request(Method::DELETE, &format!("/v1/tasks/{task_id}")))
            .await
    }

    async fn subscribe(&self, board_id: Uuid) -> Result<Subscription, StoreError> {
        let url = self.config.websocket_endpoint(board_id);
        let bearer = format!("Bearer {}", self.config.access_token.expose_secret());
        let feed = ChangeFeed { url, bearer };

        // First connection is made eagerly so auth failures surface here.
        let socket = feed.connect().await?;
        let (sender, receiver) = mpsc::unbounded_channel();
        let pump = tokio::spawn(async move { feed.run(socket, board_id, sender).await });

        let events = UnboundedReceiverStream::new(receiver).boxed();
        Ok(Subscription::with_pump(board_id, events, pump))
    }

    async fn list_boards(&self) -> Result<Vec<Board>, StoreError> {
        self.send(self.request(Method::GET, "/v1/boards")).await
    }

    async fn fetch_board(&self, board_id: Uuid) -> Result<Board, StoreError> {
        self.send(self.request(Method::GET, &format!("/v1/boards/{board_id}")))
            .await
    }

    async fn create_board(&self, data: CreateBoard) -> Result<Board, StoreError> {
        self.send(self.with_body(Method::POST, "/v1/boards", &data))
            .await
    }

    async fn delete_board(&self, board_id: Uuid) -> Result<(), StoreError> {
        self.send_empty(self.request(Method::DELETE, &format!("/v1/boards/{board_id}")))
            .await
    }

    async fn list_members(&self, board_id: Uuid) -> Result<Vec<BoardMember>, StoreError> {
        self.send(self.request(Method::GET, &format!("/v1/boards/{board_id}/members")))
            .await
    }

    async fn find_member(
        &self,
        board_id: Uuid,
        user_id: Uuid,
    ) -> Result<Option<BoardMember>, StoreError> {
        let path = format!("/v1/boards/{board_id}/members/{user_id}");
        self.send_optional(self.request(Method::GET, &path)).await
    }

    async fn create_member(&self, data: CreateBoardMember) -> Result<BoardMember, StoreError> {
        let path = format!("/v1/boards/{}/members", data.board_id);
        self.send(self.with_body(Method::POST, &path, &data)).await
    }

    async fn delete_member(&self, member_id: Uuid) -> Result<(), StoreError> {
        self.send_empty(self.request(Method::DELETE, &format!("/v1/members/{member_id}")))
            .await
    }

    async fn find_profile_by_email(&self, email: &str) -> Result<Option<Profile>, StoreError> {
        let request = self
            .request(Method::GET, "/v1/profiles/lookup")
            .query(&[("email", email.trim())]);
        self.send_optional(request).await
    }
}

type Socket =
    tokio_tungstenite::WebSocketStream<tokio_tungstenite::MaybeTlsStream<tokio::net::TcpStream>>;

struct ChangeFeed {
    url: Url,
    bearer: String,
}

impl ChangeFeed {
    async fn connect(&self) -> Result<Socket, StoreError> {
        let mut request = self
            .url
            .as_str()
            .into_client_request()
            .map_err(StoreError::transport)?;
        let header = HeaderValue::from_str(&self.bearer).map_err(StoreError::transport)?;
        request.headers_mut().insert(AUTHORIZATION, header);

        debug!(url = %self.url, "connecting task change feed");
        let (socket, _response) = connect_async(request).await.map_err(|error| {
            use tokio_tungstenite::tungstenite::Error as WsError;
            match error {
                WsError::Http(response) => {
                    error_from_status(response.status(), "change feed rejected".to_string())
                }
                other => StoreError::transport(other),
            }
        })?;
        Ok(socket)
    }

    /// Pumps frames until the subscriber goes away, reconnecting with
    /// backoff. Events missed while disconnected are covered by a resync.
    async fn run(
        &self,
        mut socket: Socket,
        board_id: Uuid,
        sender: mpsc::UnboundedSender<TaskChange>,
    ) {
        let mut backoff = Duration::from_secs(1);

        loop {
            match listen(&mut socket, &sender).await {
                Ok(Listen::SubscriberGone) => return,
                Ok(Listen::Closed) => debug!(%board_id, "change feed closed by server"),
                Err(error) => warn!(?error, %board_id, "change feed error; reconnecting"),
            }

            socket = loop {
                if sender.is_closed() {
                    return;
                }
                sleep(backoff).await;
                match self.connect().await {
                    Ok(socket) => {
                        backoff = Duration::from_secs(1);
                        break socket;
                    }
                    Err(error) => {
                        warn!(?error, %board_id, "failed to reconnect change feed");
                        backoff = (backoff * 2).min(MAX_RECONNECT_BACKOFF);
                    }
                }
            };

            if sender.send(TaskChange::resync(board_id)).is_err() {
                return;
            }
        }
    }
}

enum Listen {
    Closed,
    SubscriberGone,
}

async fn listen(
    socket: &mut Socket,
    sender: &mpsc::UnboundedSender<TaskChange>,
) -> Result<Listen, tokio_tungstenite::tungstenite::Error> {
    while let Some(message) = socket.next().await {
        match message? {
            Message::Text(payload) => match serde_json::from_str::<ServerMessage>(&payload) {
                Ok(ServerMessage::Change(change)) => {
                    if sender.send(change).is_err() {
                        let _ = socket.close(None).await;
                        return Ok(Listen::SubscriberGone);
                    }
                }
                Ok(ServerMessage::Error { message }) => {
                    warn!(%message, "change feed error message");
                }
                Err(error) => warn!(?error, "failed to parse change feed payload"),
            },
            Message::Ping(payload) => {
                socket.send(Message::Pong(payload)).await.ok();
            }
            Message::Close(_) => return Ok(Listen::Closed),
            Message::Pong(_) | Message::Binary(_) | Message::Frame(_) => {}
        }
    }
    Ok(Listen::Closed)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn websocket_base_swaps_scheme() {
        let api = Url::parse("https://boards.example.com/api?x=1").unwrap();
        let ws = derive_websocket_base(&api).unwrap();
        assert_eq!(ws.as_str(), "wss://boards.example.com/api");

        let api = Url::parse("http://localhost:8081").unwrap();
        let config = RemoteStoreConfig::new(api, SecretString::from("t".to_string())).unwrap();
        let board_id = Uuid::nil();
        assert_eq!(
            config.websocket_endpoint(board_id).as_str(),
            format!("ws://localhost:8081/v1/boards/{board_id}/ws")
        );
    }

    #[test]
    fn endpoints_keep_the_base_path_prefix() {
        let board_id = Uuid::nil();
        for base in ["https://host.example.com/api", "https://host.example.com/api/"] {
            let api = Url::parse(base).unwrap();
            let config =
                RemoteStoreConfig::new(api, SecretString::from("t".to_string())).unwrap();
            assert_eq!(
                config.endpoint("/v1/boards").as_str(),
                "https://host.example.com/api/v1/boards"
            );
            assert_eq!(
                config.websocket_endpoint(board_id).as_str(),
                format!("wss://host.example.com/api/v1/boards/{board_id}/ws")
            );
        }
    }

    #[test]
    fn unsupported_scheme_is_rejected() {
        let api = Url::parse("ftp://example.com").unwrap();
        assert!(matches!(
            derive_websocket_base(&api),
            Err(ConfigError::UnsupportedScheme(_))
        ));
    }

    #[test]
    fn statuses_map_onto_store_errors() {
        let cases = [
            (StatusCode::NOT_FOUND, "not_found"),
            (StatusCode::FORBIDDEN, "forbidden"),
            (StatusCode::UNAUTHORIZED, "forbidden"),
            (StatusCode::BAD_REQUEST, "validation"),
            (StatusCode::BAD_GATEWAY, "transport"),
        ];
        for (status, kind) in cases {
            assert_eq!(error_from_status(status, "x".into()).kind(), kind, "{status}");
        }
    }
}
