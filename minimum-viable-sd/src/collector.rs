use std::path::Path;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use anyhow::{Context, Result};
use crate::config::CollectorConfig;
use crate::net::listener;
use crate::reconciler::Reconciler;
use crate::store::output;

/// Run the collector until cancelled or until a fatal error.
///
/// The output file is prepared before the listener binds, so a fresh start has
/// an empty snapshot on disk before the first connection is accepted.
pub async fn collect(
    output_path: &Path,
    listen_address: &str,
    config: CollectorConfig,
    cancel: CancellationToken,
) -> Result<()> {
    let gate_open = output::prepare_output(output_path)?;
    if !gate_open {
        tracing::info!(
            "Keeping existing {} until the first tick in {}s",
            output_path.display(),
            config.tick_interval_secs
        );
    }

    let tcp_listener = listener::bind(listen_address).await?;

    let (tx, rx) = mpsc::channel(config.queue_capacity);
    let reconciler = Reconciler::new(output_path, &config, gate_open);

    let listener_cancel = cancel.clone();
    let mut listener_handle = tokio::spawn(listener::run_listener(tcp_listener, tx, config, listener_cancel));

    let result = tokio::select! {
        res = reconciler.run(rx, cancel.clone()) => res,
        res = &mut listener_handle => res.context("Listener task panicked").and_then(|res| res),
    };

    // whichever side stopped first, take the other one down too
    cancel.cancel();
    if !listener_handle.is_finished() {
        let _ = listener_handle.await;
    }

    result
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;
    use tokio::io::AsyncWriteExt;
    use tokio::net::TcpStream;
    use shared::types::ServiceSpec;

    #[tokio::test]
    async fn test_fresh_start_serves_announcements() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("sd").join("targets.json");

        // reserve a free port for the collector
        let address = {
            let probe = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
            probe.local_addr().unwrap().to_string()
        };

        let cancel = CancellationToken::new();
        let collector = {
            let path = path.clone();
            let address = address.clone();
            let cancel = cancel.clone();
            tokio::spawn(async move { collect(&path, &address, CollectorConfig::default(), cancel).await })
        };

        let mut stream = loop {
            match TcpStream::connect(&address).await {
                Ok(stream) => break stream,
                Err(_) => tokio::time::sleep(Duration::from_millis(10)).await,
            }
        };
        assert_eq!(std::fs::read(&path).unwrap(), b"[]");

        stream.write_all(br#"[{"targets":["a:9100"],"labels":{}}]"#).await.unwrap();
        stream.shutdown().await.unwrap();
        drop(stream);

        let expected = vec![ServiceSpec::new(["a:9100"])];
        let mut written: Vec<ServiceSpec> = Vec::new();
        for _ in 0..200 {
            written = serde_json::from_slice(&std::fs::read(&path).unwrap()).unwrap();
            if written == expected {
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        assert_eq!(written, expected);

        cancel.cancel();
        collector.await.unwrap().unwrap();
    }

    #[tokio::test]
    async fn test_bind_failure_is_fatal() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("targets.json");
        let taken = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        let address = taken.local_addr().unwrap().to_string();

        let err = collect(&path, &address, CollectorConfig::default(), CancellationToken::new())
            .await
            .unwrap_err();

        assert!(format!("{:#}", err).contains("Failed to bind"));
        // the empty snapshot is written before binding
        assert_eq!(std::fs::read(&path).unwrap(), b"[]");
    }
}
