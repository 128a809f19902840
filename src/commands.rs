//! Command channel - the single way into the controller
//!
//! Signal handlers, the stdin bridge and anything else that wants the
//! controller to act only enqueue a `Command`. One consumer loop drains the
//! queue and applies each command in order.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::Arc;
use tokio::io::{AsyncBufRead, AsyncBufReadExt};
use tracing::{debug, info, warn};

use crate::broker::AckEvent;
use crate::core::{BookSnapshot, LegId, Result};
use crate::signal::IndicatorSet;
use crate::strategy::PairwiseController;

/// Everything the controller can be asked to do. Wire form is one JSON
/// object per line, e.g. `{"type":"activate"}` or
/// `{"type":"market_data","payload":{"leg":"first","book":{...}}}`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "payload", rename_all = "snake_case")]
pub enum Command {
    Activate,
    /// Triggers a squareoff
    Deactivate,
    ReloadThresholds(BTreeMap<String, f64>),
    /// Graceful stop, always saves
    Shutdown,
    MarketData { leg: LegId, book: BookSnapshot },
    BrokerAck(AckEvent),
    Indicators(IndicatorSet),
}

impl Command {
    pub fn parse_line(line: &str) -> Result<Self> {
        Ok(serde_json::from_str(line)?)
    }
}

pub fn channel() -> (flume::Sender<Command>, flume::Receiver<Command>) {
    flume::unbounded()
}

/// Apply one non-shutdown command. Failures are reported, never fatal.
pub fn dispatch(controller: &PairwiseController, command: Command) {
    let outcome = match command {
        Command::Activate => controller.activate(),
        Command::Deactivate => controller.deactivate(),
        Command::ReloadThresholds(map) => controller.reload_thresholds(&map),
        Command::MarketData { leg, book } => {
            controller.on_market_data(leg, book);
            Ok(())
        }
        Command::BrokerAck(ack) => {
            controller.on_broker_ack(&ack);
            Ok(())
        }
        Command::Indicators(update) => {
            controller.update_indicators(update);
            Ok(())
        }
        Command::Shutdown => controller.shutdown(),
    };
    if let Err(e) = outcome {
        warn!(error = %e, "⚠️ command failed");
    }
}

/// Consumer loop. Returns once `Shutdown` has been applied, or when every
/// sender is gone (treated as a shutdown).
pub async fn run(controller: Arc<PairwiseController>, rx: flume::Receiver<Command>) -> Result<()> {
    while let Ok(command) = rx.recv_async().await {
        if command == Command::Shutdown {
            info!("🛑 shutdown command received");
            return controller.shutdown();
        }
        debug!(?command, "command");
        dispatch(&controller, command);
    }
    warn!("command channel closed, shutting down");
    controller.shutdown()
}

/// Forward newline-delimited JSON commands from `reader` into the queue.
/// Lines that are not UTF-8 or not a command are logged and skipped; a read
/// error ends the bridge with `Err`.
pub async fn bridge_lines<R>(mut reader: R, tx: flume::Sender<Command>) -> Result<()>
where
    R: AsyncBufRead + Unpin,
{
    let mut buf = Vec::with_capacity(1024);
    loop {
        buf.clear();
        if reader.read_until(b'\n', &mut buf).await? == 0 {
            return Ok(());
        }
        let line = match std::str::from_utf8(&buf) {
            Ok(line) => line.trim(),
            Err(e) => {
                warn!(error = %e, bytes = buf.len(), "non-UTF-8 command line dropped");
                continue;
            }
        };
        if line.is_empty() {
            continue;
        }
        match Command::parse_line(line) {
            Ok(command) => {
                if tx.send_async(command).await.is_err() {
                    return Ok(());
                }
            }
            Err(e) => warn!(error = %e, line, "unparseable command line dropped"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::AppConfig;
    use crate::gateway::testing::RecordingGateway;
    use crate::persistence::DailyInitRecord;
    use crate::strategy::StrategyState;

    const CONFIG: &str = r#"
[strategy]
id = 5

[[legs]]
symbol = "rb2605"
alias = "rb05"
tick_size = 1.0

[[legs]]
symbol = "rb2610"
alias = "rb10"
tick_size = 1.0

[thresholds]
begin_place = 2.0
max_size = 3
"#;

    fn controller(dir: &std::path::Path) -> Arc<PairwiseController> {
        let mut cfg = AppConfig::from_toml(CONFIG).unwrap();
        cfg.strategy.data_dir = dir.to_path_buf();
        let record = DailyInitRecord::from_positions(5, 12.5, ["rb05", "rb10"], [-2, 2]);
        let gw = Arc::new(RecordingGateway::default());
        Arc::new(PairwiseController::new(&cfg, &record, gw).unwrap())
    }

    #[test]
    fn test_wire_format() {
        assert_eq!(Command::parse_line(r#"{"type":"activate"}"#).unwrap(), Command::Activate);
        let cmd = Command::parse_line(
            concat!(
                r#"{"type":"market_data","payload":{"leg":"second","#,
                r#""book":{"bids":[{"price":1.0,"quantity":2}],"asks":[]}}}"#
            ),
        )
        .unwrap();
        assert!(matches!(cmd, Command::MarketData { leg: LegId::Second, .. }));
        let ack = Command::parse_line(
            concat!(
                r#"{"type":"broker_ack","payload":{"client_ref":"5-1","submit_stage":"accepted","#,
                r#""order_status":"all_traded","filled_qty":1,"price":3.0}}"#
            ),
        )
        .unwrap();
        assert!(matches!(ack, Command::BrokerAck(_)));
        assert!(Command::parse_line(r#"{"type":"launch"}"#).is_err());
    }

    #[tokio::test]
    async fn test_commands_apply_in_order_and_shutdown_saves() {
        let dir = tempfile::tempdir().unwrap();
        let ctl = controller(dir.path());
        let (tx, rx) = channel();

        tx.send(Command::Activate).unwrap();
        tx.send(Command::ReloadThresholds(BTreeMap::from([("size".to_string(), 0.5)])))
            .unwrap();
        tx.send(Command::Shutdown).unwrap();
        // Anything after shutdown is never applied.
        tx.send(Command::Activate).unwrap();

        run(ctl.clone(), rx).await.unwrap();
        assert_eq!(ctl.state(), StrategyState::Stopped);
        assert_eq!(ctl.thresholds().size, 1);
        let saved = std::fs::read_to_string(dir.path().join("daily_init.5")).unwrap();
        assert!(saved.ends_with("5 0 12.500000 rb05 rb10 -2 2\n"));
    }

    #[tokio::test]
    async fn test_bridge_feeds_queue_until_eof() {
        let dir = tempfile::tempdir().unwrap();
        let ctl = controller(dir.path());
        let (tx, rx) = channel();
        let input: &[u8] = b"{\"type\":\"activate\"}\n\nnot json\n{\"type\":\"deactivate\"}\n";

        bridge_lines(input, tx).await.unwrap();
        // Bridge dropped its sender: the loop drains and then shuts down.
        run(ctl.clone(), rx).await.unwrap();
        assert_eq!(ctl.state(), StrategyState::Stopped);
        assert!(dir.path().join("daily_init.5").exists());
    }

    #[tokio::test]
    async fn test_bridge_skips_non_utf8_lines() {
        let (tx, rx) = channel();
        let input: &[u8] =
            b"{\"type\":\"activate\"}\n\xff\xfe garbage\n\
              {\"type\":\"deactivate\"}\n{\"type\":\"shutdown\"}";

        bridge_lines(input, tx).await.unwrap();
        let forwarded: Vec<Command> = rx.drain().collect();
        assert_eq!(forwarded, vec![Command::Activate, Command::Deactivate, Command::Shutdown]);
    }

    #[tokio::test]
    async fn test_bridge_read_error_is_returned() {
        let (tx, rx) = channel();
        let reader = tokio::io::BufReader::new(failing_reader());
        assert!(matches!(bridge_lines(reader, tx).await, Err(crate::Error::Io(_))));
        assert!(rx.is_empty());
    }

    /// Reader that fails on the first read.
    fn failing_reader() -> impl tokio::io::AsyncRead + Unpin {
        struct Failing;
        impl tokio::io::AsyncRead for Failing {
            fn poll_read(
                self: std::pin::Pin<&mut Self>,
                _cx: &mut std::task::Context<'_>,
                _buf: &mut tokio::io::ReadBuf<'_>,
            ) -> std::task::Poll<std::io::Result<()>> {
                std::task::Poll::Ready(Err(std::io::Error::other("pipe broken")))
            }
        }
        Failing
    }
}
