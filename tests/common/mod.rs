//! Shared helpers: an in-process server on a random port and logged-in clients.

use std::{net::SocketAddr, sync::Arc, time::Duration};

use gigchat::{
    AppState, Config, app,
    client::{HttpApi, Transport, TransportConfig, TransportState},
    message::Identity,
    store::{SharedStore, SqliteMessageStore},
};
use sqlx::sqlite::SqlitePoolOptions;
use tokio::task::JoinHandle;

pub const TEST_TIMEOUT: Duration = Duration::from_secs(5);

/// How long to wait before concluding that no further event is coming.
#[allow(dead_code)]
pub const QUIET_PERIOD: Duration = Duration::from_millis(300);

#[allow(dead_code)]
pub fn init_test_logging() {
    use tracing_subscriber::EnvFilter;

    let _ = tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("gigchat=debug")))
        .with_test_writer()
        .try_init();
}

pub async fn with_timeout<T, F>(fut: F) -> T
where
    F: std::future::Future<Output = T>,
{
    tokio::time::timeout(TEST_TIMEOUT, fut)
        .await
        .expect("test operation timed out")
}

pub async fn memory_store() -> SharedStore {
    let pool = SqlitePoolOptions::new()
        .max_connections(1)
        .connect("sqlite::memory:")
        .await
        .expect("connect sqlite");
    Arc::new(SqliteMessageStore::open(pool).await.expect("open store"))
}

pub fn test_config() -> Config {
    Config {
        dev_login: true,
        ..Config::default()
    }
}

#[allow(dead_code)]
pub struct TestServer {
    pub addr: SocketAddr,
    pub state: AppState,
    task: JoinHandle<()>,
}

#[allow(dead_code)]
impl TestServer {
    pub async fn spawn() -> TestServer {
        let state = AppState::new(memory_store().await, test_config());
        let router = app(state.clone()).expect("build app");
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.expect("bind");
        let addr = listener.local_addr().expect("local addr");
        let task = tokio::spawn(async move {
            axum::serve(listener, router).await.expect("serve");
        });
        TestServer { addr, state, task }
    }

    pub fn http_url(&self) -> String {
        format!("http://{}", self.addr)
    }

    pub fn ws_url(&self) -> String {
        format!("ws://{}{}", self.addr, self.state.config.socket_path)
    }

    pub async fn login(&self, identity: &str) -> HttpApi {
        let mut api = HttpApi::new(self.http_url());
        api.dev_login(&Identity::from(identity)).await.expect("dev login");
        api
    }

    /// Opens a transport for `identity` and waits until the server has it in the room.
    pub async fn connect(&self, identity: &str, api: &HttpApi) -> Transport {
        let identity = Identity::from(identity);
        let before = self.state.rooms.members(&identity);

        let mut config = TransportConfig::new(self.ws_url(), identity.clone());
        config.cookie = api.cookie().map(str::to_owned);
        let transport = Transport::connect(config);

        assert!(with_timeout(transport.wait_for(TransportState::Connected)).await);
        self.wait_until(|state| state.rooms.members(&identity) == before + 1).await;
        transport
    }

    pub async fn wait_until(&self, check: impl Fn(&AppState) -> bool) {
        with_timeout(async {
            while !check(&self.state) {
                tokio::time::sleep(Duration::from_millis(10)).await;
            }
        })
        .await
    }
}

impl Drop for TestServer {
    fn drop(&mut self) {
        self.task.abort();
    }
}
