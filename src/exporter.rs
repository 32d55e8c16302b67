use async_trait::async_trait;
use serde::Serialize;
use tokio::io::{AsyncWrite, AsyncWriteExt};
use tokio::sync::{Mutex, mpsc};
use tripwire::Tripwire;

use crate::model::Config;
use crate::pipeline::Exporter;

#[derive(Serialize)]
struct Line<'a> {
    stale: bool,
    tuid: &'a str,
    hash: u64,
    config: &'a serde_json::Value,
}

/// Writes every config as one JSON line, retractions are flagged with
/// `"stale": true`.
pub struct ConsoleExporter<W> {
    writer: Mutex<W>,
}

impl ConsoleExporter<tokio::io::Stdout> {
    pub fn stdout() -> Self {
        ConsoleExporter::new(tokio::io::stdout())
    }
}

impl<W> ConsoleExporter<W> {
    pub fn new(writer: W) -> Self {
        ConsoleExporter {
            writer: Mutex::new(writer),
        }
    }

    pub fn into_inner(self) -> W {
        self.writer.into_inner()
    }
}

impl<W: AsyncWrite + Send + Unpin> ConsoleExporter<W> {
    async fn write(&self, configs: &[Config]) -> std::io::Result<()> {
        let mut buf = Vec::new();
        for config in configs {
            let line = Line {
                stale: config.stale,
                tuid: &config.tuid,
                hash: config.hash,
                config: &config.payload,
            };

            serde_json::to_writer(&mut buf, &line)?;
            buf.push(b'\n');
        }

        let mut writer = self.writer.lock().await;
        writer.write_all(&buf).await?;
        writer.flush().await
    }
}

#[async_trait]
impl<W: AsyncWrite + Send + Unpin> Exporter for ConsoleExporter<W> {
    async fn export(&self, mut shutdown: Tripwire, mut input: mpsc::Receiver<Vec<Config>>) {
        loop {
            let configs = tokio::select! {
                biased;

                _ = &mut shutdown => break,
                configs = input.recv() => match configs {
                    Some(configs) => configs,
                    None => break,
                }
            };

            if let Err(err) = self.write(&configs).await {
                error!(message = "write configs to output failed, stopping exporter", %err);
                break;
            }
        }

        debug!(message = "exporter is stopped");
    }
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;
    use serde_json::json;

    use super::*;

    #[tokio::test]
    async fn json_lines() {
        let exporter = ConsoleExporter::new(Vec::<u8>::new());
        let (_trigger, shutdown) = Tripwire::new("test");
        let (tx, rx) = mpsc::channel(1);

        let export = exporter.export(shutdown, rx);
        let send = async move {
            tx.send(vec![
                Config {
                    tuid: "prod_web_tcp_80".to_string(),
                    hash: 1,
                    stale: false,
                    payload: json!({"address": "web.prod.svc:80"}),
                },
                Config {
                    tuid: "prod_web_tcp_80".to_string(),
                    hash: 2,
                    stale: true,
                    payload: json!({"address": "web.prod.svc:8080"}),
                },
            ])
            .await
            .unwrap();
            // dropping the sender stops the exporter
        };
        tokio::join!(export, send);

        let output = String::from_utf8(exporter.into_inner()).unwrap();
        assert_eq!(
            output,
            concat!(
                r#"{"stale":false,"tuid":"prod_web_tcp_80","hash":1,"config":{"address":"web.prod.svc:80"}}"#,
                "\n",
                r#"{"stale":true,"tuid":"prod_web_tcp_80","hash":2,"config":{"address":"web.prod.svc:8080"}}"#,
                "\n",
            )
        );
    }

    #[tokio::test]
    async fn stops_on_shutdown() {
        let exporter = ConsoleExporter::new(Vec::<u8>::new());
        let (trigger, shutdown) = Tripwire::new("test");
        let (_tx, rx) = mpsc::channel::<Vec<Config>>(1);

        trigger.cancel();
        exporter.export(shutdown, rx).await;

        assert!(exporter.into_inner().is_empty());
    }
}
