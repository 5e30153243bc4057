//! Wire-level tests for the pre-login IRC surface.
//!
//! These drive a real TCP client against a started server. Nothing here
//! requires Slack: the commands under test are exactly the ones a client can
//! issue before credentials are complete.

use std::net::SocketAddr;
use std::time::Duration;

use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::TcpStream;

use slack_irc_gateway::config::ServerConfig;
use slack_irc_gateway::server::Server;

async fn start_server() -> SocketAddr {
    let config = ServerConfig {
        host: "127.0.0.1".to_string(),
        port: 0,
        ..Default::default()
    };
    let (addr, _handle) = Server::new(config).start().await.expect("server start");
    addr
}

async fn connect(addr: SocketAddr) -> (BufReader<OwnedReadHalf>, OwnedWriteHalf) {
    let stream = TcpStream::connect(addr).await.expect("connect");
    let (read, write) = stream.into_split();
    (BufReader::new(read), write)
}

async fn read_reply(reader: &mut BufReader<OwnedReadHalf>) -> String {
    let mut line = String::new();
    tokio::time::timeout(Duration::from_secs(2), reader.read_line(&mut line))
        .await
        .expect("timed out waiting for reply")
        .expect("read failed");
    line
}

#[tokio::test]
async fn cap_ls_advertises_no_capabilities() {
    let addr = start_server().await;
    let (mut reader, mut writer) = connect(addr).await;
    writer.write_all(b"CAP LS 302\r\n").await.unwrap();
    assert_eq!(read_reply(&mut reader).await, ":localhost CAP * LS :\r\n");
}

#[tokio::test]
async fn ping_is_answered_with_pong() {
    let addr = start_server().await;
    let (mut reader, mut writer) = connect(addr).await;
    writer.write_all(b"PING 12345\r\n").await.unwrap();
    assert_eq!(read_reply(&mut reader).await, "PONG 12345\r\n");
}

#[tokio::test]
async fn ping_echoes_trailing() {
    let addr = start_server().await;
    let (mut reader, mut writer) = connect(addr).await;
    writer.write_all(b"PING :some token\r\n").await.unwrap();
    assert_eq!(read_reply(&mut reader).await, "PONG  :some token\r\n");
}

#[tokio::test]
async fn malformed_pass_gets_464() {
    let addr = start_server().await;
    let (mut reader, mut writer) = connect(addr).await;
    writer.write_all(b"PASS a|b|c\r\n").await.unwrap();
    assert_eq!(
        read_reply(&mut reader).await,
        ":localhost 464 * :Invalid password\r\n"
    );
}

#[tokio::test]
async fn pass_with_cookie_but_wrong_token_prefix_gets_464() {
    let addr = start_server().await;
    let (mut reader, mut writer) = connect(addr).await;
    writer.write_all(b"PASS xoxp-XYZ|d=DEF;\r\n").await.unwrap();
    assert_eq!(
        read_reply(&mut reader).await,
        ":localhost 464 * :Invalid password\r\n"
    );
}

#[tokio::test]
async fn unknown_commands_are_ignored_silently() {
    let addr = start_server().await;
    let (mut reader, mut writer) = connect(addr).await;
    writer.write_all(b"FROBNICATE now\r\n").await.unwrap();
    // The next command still works and nothing was sent for the unknown one.
    writer.write_all(b"PING after\r\n").await.unwrap();
    assert_eq!(read_reply(&mut reader).await, "PONG after\r\n");
}

#[tokio::test]
async fn non_crlf_frames_are_rejected() {
    let addr = start_server().await;
    let (mut reader, mut writer) = connect(addr).await;
    // Only LF: the frame must be dropped without a reply.
    writer.write_all(b"PING dropped\n").await.unwrap();
    writer.write_all(b"PING kept\r\n").await.unwrap();
    assert_eq!(read_reply(&mut reader).await, "PONG kept\r\n");
}

#[tokio::test]
async fn mode_query_reports_no_modes() {
    let addr = start_server().await;
    let (mut reader, mut writer) = connect(addr).await;
    writer.write_all(b"MODE #general\r\n").await.unwrap();
    assert_eq!(
        read_reply(&mut reader).await,
        ":localhost 324 * #general + :\r\n"
    );
}

#[tokio::test]
async fn mode_with_flags_gets_501() {
    let addr = start_server().await;
    let (mut reader, mut writer) = connect(addr).await;
    writer.write_all(b"MODE #general +o alice\r\n").await.unwrap();
    assert_eq!(
        read_reply(&mut reader).await,
        ":localhost 501 #general :Unknown MODE flags +o alice\r\n"
    );
}

#[tokio::test]
async fn nick_before_pass_is_remembered_for_replies() {
    let addr = start_server().await;
    let (mut reader, mut writer) = connect(addr).await;
    writer.write_all(b"NICK insomniac\r\n").await.unwrap();
    writer.write_all(b"PASS a|b|c\r\n").await.unwrap();
    assert_eq!(
        read_reply(&mut reader).await,
        ":localhost 464 insomniac :Invalid password\r\n"
    );
}
