//! Nested shell sessions served over an in-memory stream

mod common;

use std::sync::Arc;

use russh::client;
use russh::Channel;
use russh_keys::key::KeyPair;
use tokio_util::sync::CancellationToken;

use rcon_agent::{shell, AgentState};

use common::{agent_config, user_key, EndUser, Transcript};

struct Nested {
    handle: client::Handle<EndUser>,
    authenticated: bool,
    cancel: CancellationToken,
}

impl Drop for Nested {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}

impl Nested {
    async fn open_session(&self) -> Channel<client::Msg> {
        self.handle.channel_open_session().await.unwrap()
    }
}

/// Serve one nested session over a duplex pipe and log in as `user`
async fn connect(users: &[(&str, &Arc<KeyPair>)], user: &str, key: &Arc<KeyPair>) -> Nested {
    let state = AgentState::new(agent_config(users), KeyPair::generate_ed25519().unwrap()).unwrap();
    let (client_io, server_io) = tokio::io::duplex(64 * 1024);

    let cancel = CancellationToken::new();
    let handler = state.shell_handler("127.0.0.1:50000".to_string(), cancel.clone());
    tokio::spawn(shell::serve(
        state.shell_config(),
        server_io,
        handler,
        cancel.clone(),
    ));

    let config = Arc::new(client::Config::default());
    let mut handle = client::connect_stream(config, client_io, EndUser)
        .await
        .unwrap();
    let authenticated = handle
        .authenticate_publickey(user, Arc::clone(key))
        .await
        .unwrap();

    Nested {
        handle,
        authenticated,
        cancel,
    }
}

async fn connect_as_alice() -> Nested {
    let key = user_key();
    let nested = connect(&[("alice", &key)], "alice", &key).await;
    assert!(nested.authenticated);
    nested
}

#[tokio::test]
async fn test_unknown_user_and_wrong_key_rejected() {
    let key = user_key();
    let stranger = user_key();

    let nested = connect(&[("alice", &key)], "mallory", &key).await;
    assert!(!nested.authenticated);

    let nested = connect(&[("alice", &key)], "alice", &stranger).await;
    assert!(!nested.authenticated);
}

#[tokio::test]
async fn test_pty_shell_sees_requested_size_and_term() {
    let nested = connect_as_alice().await;
    let mut channel = nested.open_session().await;
    let mut transcript = Transcript::default();

    channel
        .request_pty(true, "vt100", 91, 17, 0, 0, &[])
        .await
        .unwrap();
    assert!(transcript.reply(&mut channel).await);

    channel.request_shell(true).await.unwrap();
    assert!(transcript.reply(&mut channel).await);

    channel
        .data(&b"stty size; echo term=$TERM; exit\n"[..])
        .await
        .unwrap();
    transcript.finish(&mut channel).await;

    let output = transcript.stdout_text();
    assert!(output.contains("17 91"), "output: {:?}", output);
    assert!(output.contains("term=vt100"), "output: {:?}", output);
    assert_eq!(transcript.exit_status, Some(0));
}

#[tokio::test]
async fn test_shell_without_pty_is_not_a_terminal() {
    let nested = connect_as_alice().await;
    let mut channel = nested.open_session().await;
    let mut transcript = Transcript::default();

    channel.request_shell(true).await.unwrap();
    assert!(transcript.reply(&mut channel).await);

    channel
        .data(&b"if test -t 0; then echo tty; else echo notty; fi\n"[..])
        .await
        .unwrap();
    channel.eof().await.unwrap();
    transcript.finish(&mut channel).await;

    assert_eq!(transcript.stdout_text().trim(), "notty");
    assert_eq!(transcript.exit_status, Some(0));
}

#[tokio::test]
async fn test_exit_status_and_stderr_reported() {
    let nested = connect_as_alice().await;
    let mut channel = nested.open_session().await;
    let mut transcript = Transcript::default();

    channel.request_shell(true).await.unwrap();
    assert!(transcript.reply(&mut channel).await);

    channel
        .data(&b"echo oops >&2; exit 7\n"[..])
        .await
        .unwrap();
    transcript.finish(&mut channel).await;

    assert_eq!(transcript.stderr_text().trim(), "oops");
    assert_eq!(transcript.exit_status, Some(7));
    assert!(transcript.closed);
}

/// Run a shell that kills itself and return what the channel saw
async fn killed_shell(with_pty: bool) -> Transcript {
    let nested = connect_as_alice().await;
    let mut channel = nested.open_session().await;
    let mut transcript = Transcript::default();

    if with_pty {
        channel
            .request_pty(true, "xterm", 80, 24, 0, 0, &[])
            .await
            .unwrap();
        assert!(transcript.reply(&mut channel).await);
    }
    channel.request_shell(true).await.unwrap();
    assert!(transcript.reply(&mut channel).await);

    channel.data(&b"kill -9 $$\n"[..]).await.unwrap();
    transcript.finish(&mut channel).await;
    transcript
}

#[tokio::test]
async fn test_signal_killed_shell_sends_no_exit_status() {
    let piped = killed_shell(false).await;
    assert_eq!(piped.exit_status, None);
    assert!(piped.closed);

    let pty = killed_shell(true).await;
    assert_eq!(pty.exit_status, None);
    assert!(pty.closed);
}

#[tokio::test]
async fn test_second_shell_request_fails() {
    let nested = connect_as_alice().await;
    let mut channel = nested.open_session().await;
    let mut transcript = Transcript::default();

    channel.request_shell(true).await.unwrap();
    assert!(transcript.reply(&mut channel).await);

    channel.request_shell(true).await.unwrap();
    assert!(!transcript.reply(&mut channel).await);

    // The first shell is unaffected
    channel.data(&b"echo alive; exit 0\n"[..]).await.unwrap();
    transcript.finish(&mut channel).await;
    assert_eq!(transcript.stdout_text().trim(), "alive");
    assert_eq!(transcript.exit_status, Some(0));
}

#[tokio::test]
async fn test_pty_after_shell_start_takes_no_effect_on_running_shell() {
    let nested = connect_as_alice().await;
    let mut channel = nested.open_session().await;
    let mut transcript = Transcript::default();

    channel.request_shell(true).await.unwrap();
    assert!(transcript.reply(&mut channel).await);

    channel
        .request_pty(true, "xterm", 80, 24, 0, 0, &[])
        .await
        .unwrap();
    assert!(transcript.reply(&mut channel).await);

    channel
        .data(&b"if test -t 0; then echo tty; else echo notty; fi\n"[..])
        .await
        .unwrap();
    channel.eof().await.unwrap();
    transcript.finish(&mut channel).await;

    assert_eq!(transcript.stdout_text().trim(), "notty");
}

#[tokio::test]
async fn test_window_change_resizes_running_pty() {
    let nested = connect_as_alice().await;
    let mut channel = nested.open_session().await;
    let mut transcript = Transcript::default();

    channel
        .request_pty(true, "xterm", 80, 24, 0, 0, &[])
        .await
        .unwrap();
    assert!(transcript.reply(&mut channel).await);
    channel.request_shell(true).await.unwrap();
    assert!(transcript.reply(&mut channel).await);

    channel.window_change(120, 40, 0, 0).await.unwrap();
    channel.data(&b"stty size; exit\n"[..]).await.unwrap();
    transcript.finish(&mut channel).await;

    let output = transcript.stdout_text();
    assert!(output.contains("40 120"), "output: {:?}", output);
}

#[tokio::test]
async fn test_window_change_before_shell_sets_initial_size() {
    let nested = connect_as_alice().await;
    let mut channel = nested.open_session().await;
    let mut transcript = Transcript::default();

    channel
        .request_pty(true, "xterm", 80, 24, 0, 0, &[])
        .await
        .unwrap();
    assert!(transcript.reply(&mut channel).await);
    channel.window_change(100, 33, 0, 0).await.unwrap();
    channel.request_shell(true).await.unwrap();
    assert!(transcript.reply(&mut channel).await);

    channel.data(&b"stty size; exit\n"[..]).await.unwrap();
    transcript.finish(&mut channel).await;

    let output = transcript.stdout_text();
    assert!(output.contains("33 100"), "output: {:?}", output);
}

#[tokio::test]
async fn test_exec_and_subsystem_refused() {
    let nested = connect_as_alice().await;
    let mut channel = nested.open_session().await;
    let mut transcript = Transcript::default();

    channel.exec(true, "id").await.unwrap();
    assert!(!transcript.reply(&mut channel).await);

    channel.request_subsystem(true, "sftp").await.unwrap();
    assert!(!transcript.reply(&mut channel).await);

    // The channel still accepts a shell afterwards
    channel.request_shell(true).await.unwrap();
    assert!(transcript.reply(&mut channel).await);
    channel.data(&b"exit 0\n"[..]).await.unwrap();
    transcript.finish(&mut channel).await;
    assert_eq!(transcript.exit_status, Some(0));
}

#[tokio::test]
async fn test_second_session_channel_refused() {
    let nested = connect_as_alice().await;
    let _first = nested.open_session().await;

    assert!(nested.handle.channel_open_session().await.is_err());
}

#[tokio::test]
async fn test_failed_spawn_leaves_channel_usable() {
    let key = user_key();
    let mut config = agent_config(&[("alice", &key)]);
    config.shell = "/nonexistent/shell".to_string();
    let state = AgentState::new(config, KeyPair::generate_ed25519().unwrap()).unwrap();

    let (client_io, server_io) = tokio::io::duplex(64 * 1024);
    let cancel = CancellationToken::new();
    let handler = state.shell_handler("127.0.0.1:50001".to_string(), cancel.clone());
    tokio::spawn(shell::serve(state.shell_config(), server_io, handler, cancel.clone()));

    let mut handle = client::connect_stream(Arc::new(client::Config::default()), client_io, EndUser)
        .await
        .unwrap();
    assert!(handle.authenticate_publickey("alice", key).await.unwrap());

    let mut channel = handle.channel_open_session().await.unwrap();
    let mut transcript = Transcript::default();
    channel.request_shell(true).await.unwrap();
    assert!(!transcript.reply(&mut channel).await);

    channel
        .request_pty(true, "xterm", 80, 24, 0, 0, &[])
        .await
        .unwrap();
    assert!(transcript.reply(&mut channel).await);

    cancel.cancel();
}
