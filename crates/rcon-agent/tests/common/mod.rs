//! Shared helpers for agent integration tests

#![allow(dead_code)]

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use russh::client;
use russh::{Channel, ChannelMsg};
use russh_keys::key::{KeyPair, PublicKey};
use russh_keys::PublicKeyBase64;

use rcon_core::config::{AgentConfig, UserEntry};

/// How long a test waits for any single channel message
pub const MESSAGE_TIMEOUT: Duration = Duration::from_secs(10);

/// End-user client that trusts any host key
pub struct EndUser;

#[async_trait]
impl client::Handler for EndUser {
    type Error = anyhow::Error;

    async fn check_server_key(&mut self, _key: &PublicKey) -> Result<bool, Self::Error> {
        Ok(true)
    }
}

pub fn user_key() -> Arc<KeyPair> {
    Arc::new(KeyPair::generate_ed25519().unwrap())
}

pub fn key_line(key: &KeyPair) -> String {
    let public = key.clone_public_key().unwrap();
    format!("{} {} test", public.name(), public.public_key_base64())
}

/// Agent configuration with `users` and a placeholder broker section
pub fn agent_config(users: &[(&str, &Arc<KeyPair>)]) -> AgentConfig {
    let mut config: AgentConfig = toml::from_str(
        r#"
        shell = "/bin/sh"
        [broker]
        address = "127.0.0.1:1"
        host_key = "unused"
        username = "unused"
        private_key = "unused"
        "#,
    )
    .unwrap();

    for (name, key) in users {
        config.users.insert(
            name.to_string(),
            UserEntry {
                key: key_line(key),
            },
        );
    }
    config
}

/// Everything seen on one client channel
#[derive(Default)]
pub struct Transcript {
    pub stdout: Vec<u8>,
    pub stderr: Vec<u8>,
    pub exit_status: Option<u32>,
    pub closed: bool,
}

impl Transcript {
    pub fn stdout_text(&self) -> String {
        String::from_utf8_lossy(&self.stdout).into_owned()
    }

    pub fn stderr_text(&self) -> String {
        String::from_utf8_lossy(&self.stderr).into_owned()
    }

    /// Record `msg`; returns the outcome when it is a request reply
    fn record(&mut self, msg: ChannelMsg) -> Option<bool> {
        match msg {
            ChannelMsg::Data { data } => self.stdout.extend_from_slice(&data),
            ChannelMsg::ExtendedData { data, ext: 1 } => self.stderr.extend_from_slice(&data),
            ChannelMsg::ExitStatus { exit_status } => self.exit_status = Some(exit_status),
            ChannelMsg::Close => self.closed = true,
            ChannelMsg::Success => return Some(true),
            ChannelMsg::Failure => return Some(false),
            _ => {}
        }
        None
    }

    /// Wait for the next request reply
    pub async fn reply(&mut self, channel: &mut Channel<client::Msg>) -> bool {
        loop {
            let msg = tokio::time::timeout(MESSAGE_TIMEOUT, channel.wait())
                .await
                .expect("timed out waiting for a reply")
                .expect("channel ended before replying");
            if let Some(outcome) = self.record(msg) {
                return outcome;
            }
        }
    }

    /// Read until stdout contains `needle`
    pub async fn read_until(&mut self, channel: &mut Channel<client::Msg>, needle: &str) {
        while !self.stdout_text().contains(needle) {
            let msg = tokio::time::timeout(MESSAGE_TIMEOUT, channel.wait())
                .await
                .expect("timed out waiting for output")
                .expect("channel ended before the expected output");
            self.record(msg);
        }
    }

    /// Read until the server closes the channel.
    ///
    /// The russh client drops a channel's sender when `CHANNEL_CLOSE`
    /// arrives, so closure shows up as the end of `wait()`.
    pub async fn finish(&mut self, channel: &mut Channel<client::Msg>) {
        while !self.closed {
            let next = tokio::time::timeout(MESSAGE_TIMEOUT, channel.wait())
                .await
                .expect("timed out waiting for the channel to close");
            match next {
                Some(msg) => {
                    self.record(msg);
                }
                None => self.closed = true,
            }
        }
    }
}
