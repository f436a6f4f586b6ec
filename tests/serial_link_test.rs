//! Integration tests for `SerialLink` over an in-memory pipe
//!
//! The far end of a `tokio::io::duplex` stands in for the controller board.

use async_trait::async_trait;
use pid_bench::config::SessionSettings;
use pid_bench::link::{LineHandler, Link, SerialLink};
use pid_bench::session::{ControlMode, Gains, SessionController, SessionState, TestSession};
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, AsyncReadExt, AsyncWriteExt, BufReader, DuplexStream};
use tokio::sync::mpsc;

/// Forwards every received line to a channel.
struct Recorder(mpsc::UnboundedSender<String>);

#[async_trait]
impl LineHandler for Recorder {
    async fn on_line(&self, line: String) {
        let _ = self.0.send(line);
    }
}

fn open() -> (SerialLink, pid_bench::link::Inbound, DuplexStream) {
    let (board, host) = tokio::io::duplex(1024);
    let (link, inbound) = SerialLink::new("pipe", Box::new(host), "\n");
    (link, inbound, board)
}

async fn next(rx: &mut mpsc::UnboundedReceiver<String>) -> String {
    tokio::time::timeout(Duration::from_secs(1), rx.recv())
        .await
        .expect("timed out waiting for a line")
        .expect("dispatcher stopped")
}

#[tokio::test]
async fn lines_are_delivered_in_order_and_trimmed() {
    let (_link, inbound, mut board) = open();
    let (tx, mut rx) = mpsc::unbounded_channel();
    inbound.spawn_dispatch(Arc::new(Recorder(tx)));

    board
        .write_all(b"PR+Kp=1.50\r\nPR+speed=0.00\r\n\r\nPR+speed=1.25\r\n")
        .await
        .unwrap();

    assert_eq!(next(&mut rx).await, "PR+Kp=1.50");
    assert_eq!(next(&mut rx).await, "PR+speed=0.00");
    assert_eq!(next(&mut rx).await, "PR+speed=1.25");
}

#[tokio::test]
async fn partial_lines_are_joined() {
    let (_link, inbound, mut board) = open();
    let (tx, mut rx) = mpsc::unbounded_channel();
    inbound.spawn_dispatch(Arc::new(Recorder(tx)));

    board.write_all(b"PR+spe").await.unwrap();
    tokio::time::sleep(Duration::from_millis(20)).await;
    board.write_all(b"ed=3.00\r\n").await.unwrap();

    assert_eq!(next(&mut rx).await, "PR+speed=3.00");
}

#[tokio::test]
async fn commands_reach_the_board_with_terminator() {
    let (link, _inbound, mut board) = open();
    link.send("PR+log=1").await.unwrap();
    link.send("PR+reset").await.unwrap();

    let mut buf = vec![0u8; 64];
    let mut received = Vec::new();
    while received.len() < 18 {
        let n = board.read(&mut buf).await.unwrap();
        received.extend_from_slice(&buf[..n]);
    }
    assert_eq!(received, b"PR+log=1\nPR+reset\n");
}

#[tokio::test]
async fn discard_drops_queued_input() {
    let (link, inbound, mut board) = open();

    // Queued before any handler is attached.
    board
        .write_all(b"PR+speed=9.00\r\nPR+speed=9.00\r\n")
        .await
        .unwrap();
    tokio::time::sleep(Duration::from_millis(20)).await;
    link.discard_input().await.unwrap();

    // Written after the discard, so it is delivered.
    tokio::time::sleep(Duration::from_millis(50)).await;
    board.write_all(b"PR+speed=1.00\r\n").await.unwrap();
    board.write_all(b"PR+pong\r\n").await.unwrap();

    let (tx, mut rx) = mpsc::unbounded_channel();
    inbound.spawn_dispatch(Arc::new(Recorder(tx)));
    assert_eq!(next(&mut rx).await, "PR+speed=1.00");
    assert_eq!(next(&mut rx).await, "PR+pong");
}

#[tokio::test]
async fn discard_drops_rest_of_torn_line() {
    let (link, inbound, mut board) = open();
    let (tx, mut rx) = mpsc::unbounded_channel();
    inbound.spawn_dispatch(Arc::new(Recorder(tx)));

    board.write_all(b"PR+spe").await.unwrap();
    tokio::time::sleep(Duration::from_millis(20)).await;
    link.discard_input().await.unwrap();
    tokio::time::sleep(Duration::from_millis(20)).await;
    board.write_all(b"ed=7.00\r\nPR+pong\r\n").await.unwrap();

    assert_eq!(next(&mut rx).await, "PR+pong");
}

#[tokio::test]
async fn discard_with_nothing_buffered_keeps_next_line() {
    let (link, inbound, mut board) = open();
    let (tx, mut rx) = mpsc::unbounded_channel();
    inbound.spawn_dispatch(Arc::new(Recorder(tx)));

    board.write_all(b"PR+speed=2.00\r\n").await.unwrap();
    assert_eq!(next(&mut rx).await, "PR+speed=2.00");

    link.discard_input().await.unwrap();
    link.discard_input().await.unwrap();
    tokio::time::sleep(Duration::from_millis(20)).await;
    board.write_all(b"PR+speed=3.00\r\n").await.unwrap();
    assert_eq!(next(&mut rx).await, "PR+speed=3.00");
}

// =============================================================================
// Sessions over the pipe
// =============================================================================

/// A board that never echoes: each `consigne` is answered with the next four speed
/// readings of a running counter, and `log=0` with one stale reading.
fn spawn_streaming_board(board: DuplexStream) {
    tokio::spawn(async move {
        let (read_half, mut write_half) = tokio::io::split(board);
        let mut commands = BufReader::new(read_half).lines();
        let mut counter = 0u32;
        while let Ok(Some(command)) = commands.next_line().await {
            let reply = if command.starts_with("PR+consigne") {
                (0..4)
                    .map(|_| {
                        counter += 1;
                        format!("PR+speed={counter}.00\r\n")
                    })
                    .collect::<String>()
            } else if command == "PR+log=0" {
                "PR+speed=99.00\r\n".to_string()
            } else {
                continue;
            };
            if write_half.write_all(reply.as_bytes()).await.is_err() {
                break;
            }
        }
    });
}

fn values(session: &TestSession) -> Vec<f64> {
    session.samples().iter().map(|s| s.value).collect()
}

#[tokio::test]
async fn back_to_back_tests_ignore_late_telemetry() {
    let (link, inbound, board) = open();
    spawn_streaming_board(board);
    let settings = SessionSettings {
        plot_horizon_ms: 30,
        completion_timeout: Duration::from_secs(2),
        ..SessionSettings::default()
    };
    let controller = Arc::new(SessionController::new(Arc::new(link), settings));
    let handler: Arc<dyn LineHandler> = controller.clone();
    inbound.spawn_dispatch(handler);

    let first = controller
        .request_test(ControlMode::Velocity, Gains::new(1.0, 0.0, 0.0), 10.0)
        .await
        .unwrap();
    assert_eq!(values(&first), vec![1.0, 2.0, 3.0, 4.0]);

    // The stale reading sent after log=0 lands here.
    tokio::time::sleep(Duration::from_millis(50)).await;

    let second = controller
        .request_test(ControlMode::Velocity, Gains::new(1.0, 0.0, 0.0), 10.0)
        .await
        .unwrap();
    assert_eq!(second.state(), SessionState::Completed);
    assert_eq!(values(&second), vec![5.0, 6.0, 7.0, 8.0]);
}

#[tokio::test]
async fn close_stops_the_dispatcher() {
    let (link, inbound, _board) = open();
    let (tx, _rx) = mpsc::unbounded_channel();
    let dispatcher = inbound.spawn_dispatch(Arc::new(Recorder(tx)));

    link.close();
    tokio::time::timeout(Duration::from_secs(1), dispatcher)
        .await
        .expect("dispatcher did not stop")
        .unwrap();
}

#[tokio::test]
async fn write_to_closed_pipe_fails() {
    let (link, _inbound, board) = open();
    drop(board);
    assert!(link.send("PR+ping").await.is_err());
}
