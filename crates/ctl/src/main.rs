use std::path::PathBuf;
use std::time::{Duration, Instant};

use anyhow::{bail, Context};
use audit_core::api::{
    ErrorResponse, ProveRequest, ProveResponse, StatusResponse, SubmitRequest, SubmitResponse,
};
use audit_core::JobId;
use clap::{Parser, Subcommand};
use serde::de::DeserializeOwned;

#[derive(Parser, Debug)]
#[command(name = "auditctl", about = "Client for the auditd HTTP API")]
struct Args {
    /// Daemon base URL.
    #[arg(long, default_value = "http://127.0.0.1:8080", global = true)]
    daemon: String,

    #[command(subcommand)]
    cmd: Cmd,
}

#[derive(Subcommand, Debug)]
enum Cmd {
    /// Upload a UTF-8 `.sol` file for auditing.
    Submit {
        file: PathBuf,
    },
    SubmitAddress {
        address: String,
    },
    Status {
        job_id: String,
    },
    /// Poll until the job is completed or failed.
    Wait {
        job_id: String,
        #[arg(long, default_value_t = 600)]
        timeout_secs: u64,
        #[arg(long, default_value_t = 2000)]
        interval_ms: u64,
    },
    /// Request a compliance proof for a completed job.
    Prove {
        job_id: String,
        #[arg(long, default_value_t = 1)]
        threshold: u32,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();
    let client = reqwest::Client::new();
    let daemon = args.daemon.trim_end_matches('/');

    match args.cmd {
        Cmd::Submit { file } => {
            let bytes = tokio::fs::read(&file)
                .await
                .with_context(|| format!("read {}", file.display()))?;
            let source = String::from_utf8(bytes).with_context(|| {
                format!("{} is not UTF-8; Solidity sources must be", file.display())
            })?;
            let file_name = file
                .file_name()
                .map(|n| n.to_string_lossy().into_owned())
                .context("file has no name")?;
            let req = SubmitRequest::Upload { file_name, source };
            let resp: SubmitResponse =
                send(client.post(format!("{daemon}/v1/audits")).json(&req)).await?;
            println!("{}", serde_json::to_string_pretty(&resp)?);
        }
        Cmd::SubmitAddress { address } => {
            let req = SubmitRequest::Address {
                contract_address: address,
            };
            let resp: SubmitResponse =
                send(client.post(format!("{daemon}/v1/audits")).json(&req)).await?;
            println!("{}", serde_json::to_string_pretty(&resp)?);
        }
        Cmd::Status { job_id } => {
            let resp: StatusResponse =
                send(client.get(format!("{daemon}/v1/audits/{job_id}"))).await?;
            println!("{}", serde_json::to_string_pretty(&resp)?);
        }
        Cmd::Wait {
            job_id,
            timeout_secs,
            interval_ms,
        } => {
            let deadline = Instant::now() + Duration::from_secs(timeout_secs);
            loop {
                let resp: StatusResponse =
                    send(client.get(format!("{daemon}/v1/audits/{job_id}"))).await?;
                if resp.is_terminal() {
                    println!("{}", serde_json::to_string_pretty(&resp)?);
                    if matches!(resp, StatusResponse::Error { .. }) {
                        std::process::exit(1);
                    }
                    break;
                }
                if Instant::now() >= deadline {
                    bail!("job {job_id} still pending after {timeout_secs}s");
                }
                tokio::time::sleep(Duration::from_millis(interval_ms)).await;
            }
        }
        Cmd::Prove { job_id, threshold } => {
            let req = ProveRequest {
                job_id: JobId::from_str(job_id),
                threshold,
            };
            let resp: ProveResponse =
                send(client.post(format!("{daemon}/v1/proofs")).json(&req)).await?;
            println!("{}", serde_json::to_string_pretty(&resp)?);
        }
    }

    Ok(())
}

/// Sends the request and decodes the body, surfacing the daemon's `error` field.
async fn send<T: DeserializeOwned>(req: reqwest::RequestBuilder) -> anyhow::Result<T> {
    let resp = req.send().await.context("request failed")?;
    let status = resp.status();
    if !status.is_success() {
        let body = resp.text().await.unwrap_or_default();
        let msg = serde_json::from_str::<ErrorResponse>(&body)
            .map(|e| e.error)
            .unwrap_or(body);
        bail!("daemon returned {status}: {msg}");
    }
    Ok(resp.json().await?)
}
