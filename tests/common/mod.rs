#![allow(dead_code)]

use std::process::{Child, Command, Stdio};
use std::sync::OnceLock;
use std::time::{Duration, Instant};

use anyhow::{Context, Result};
use reqwest::StatusCode;
use serde_json::Value;

static SERVER: OnceLock<TestServer> = OnceLock::new();

pub const MASTER_KEY: &str = "integration-master-key";
pub const READ_ONLY_MASTER_KEY: &str = "integration-read-only-key";
pub const LOCKOUT_THRESHOLD: usize = 3;
pub const LOCKOUT_DURATION: u32 = 15;

pub struct TestServer {
    pub port: u16,
    pub base_url: String,
    child: Child,
}

impl TestServer {
    fn spawn() -> Result<Self> {
        // Pick an unused port for isolation
        let port = portpicker::pick_unused_port().context("failed to pick free port")?;
        let base_url = format!("http://127.0.0.1:{}/parse", port);

        let mut cmd = Command::new(env!("CARGO_BIN_EXE_baas-api"));
        cmd.env("APP_ENV", "development")
            .env("PORT", port.to_string())
            .env("BAAS_MOUNT_PATH", "/parse")
            .env("BAAS_MASTER_KEY", MASTER_KEY)
            .env("BAAS_READ_ONLY_MASTER_KEY", READ_ONLY_MASTER_KEY)
            .env("BAAS_ACCOUNT_LOCKOUT_THRESHOLD", LOCKOUT_THRESHOLD.to_string())
            .env("BAAS_ACCOUNT_LOCKOUT_DURATION", LOCKOUT_DURATION.to_string())
            .env("BAAS_PASSWORD_HASH_COST", "4")
            // Empty rather than removed so a local .env cannot point the server at a real database
            .env("DATABASE_URL", "")
            .env_remove("BAAS_CONFIG_FILE")
            .stdin(Stdio::null())
            .stdout(Stdio::inherit())
            .stderr(Stdio::inherit());

        let child = cmd.spawn().context("failed to spawn server binary")?;

        Ok(Self { port, base_url, child })
    }

    async fn wait_ready(&self, timeout: Duration) -> Result<()> {
        let client = reqwest::Client::new();
        let deadline = Instant::now() + timeout;
        let url = format!("http://127.0.0.1:{}/health", self.port);
        loop {
            if Instant::now() > deadline {
                break;
            }
            if let Ok(resp) = client.get(&url).send().await {
                if resp.status() == StatusCode::OK || resp.status() == StatusCode::SERVICE_UNAVAILABLE {
                    return Ok(());
                }
            }
            tokio::time::sleep(Duration::from_millis(150)).await;
        }
        anyhow::bail!("server did not become ready on {} within {:?}", self.base_url, timeout)
    }

    pub fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }
}

pub async fn ensure_server() -> Result<&'static TestServer> {
    let server = SERVER.get_or_init(|| TestServer::spawn().expect("failed to spawn server binary"));
    server.wait_ready(Duration::from_secs(10)).await?;
    Ok(server)
}

/// Username unique to one test run, since every test in a binary shares the server
pub fn unique_name(prefix: &str) -> String {
    format!("{}_{}", prefix, &uuid::Uuid::new_v4().simple().to_string()[..12])
}

pub async fn sign_up(server: &TestServer, username: &str, password: &str) -> Result<Value> {
    let res = reqwest::Client::new()
        .post(server.url("/users"))
        .json(&serde_json::json!({ "username": username, "password": password }))
        .send()
        .await?;
    anyhow::ensure!(res.status() == StatusCode::CREATED, "sign-up failed: {}", res.status());
    Ok(res.json().await?)
}

pub async fn login(server: &TestServer, username: &str, password: &str) -> Result<(StatusCode, Value)> {
    let res = reqwest::Client::new()
        .post(server.url("/login"))
        .json(&serde_json::json!({ "username": username, "password": password }))
        .send()
        .await?;
    let status = res.status();
    Ok((status, res.json().await?))
}
