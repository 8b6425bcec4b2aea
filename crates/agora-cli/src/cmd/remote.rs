//! Talk to a running gateway over HTTP.

use anyhow::{bail, Context};
use serde_json::Value;
use std::time::{Duration, Instant};

use crate::cli::SendArgs;

/// Print the gateway's health report.
pub async fn status(gateway: &str) -> anyhow::Result<()> {
    let report: Value = reqwest::get(format!("{gateway}/api/health"))
        .await
        .context("gateway unreachable")?
        .json()
        .await?;
    println!("{}", serde_json::to_string_pretty(&report)?);
    Ok(())
}

/// Print the agents registered on the gateway.
pub async fn agents(gateway: &str) -> anyhow::Result<()> {
    let list: Value = reqwest::get(format!("{gateway}/api/agents"))
        .await
        .context("gateway unreachable")?
        .json()
        .await?;

    let Some(entries) = list.as_array() else {
        bail!("unexpected response: {list}");
    };
    for entry in entries {
        let id = entry["id"].as_str().unwrap_or("?");
        let name = entry["name"].as_str().unwrap_or("?");
        let capabilities: Vec<&str> = entry["capabilities"]
            .as_array()
            .map(|caps| {
                caps.iter()
                    .filter_map(|c| c["name"].as_str())
                    .collect()
            })
            .unwrap_or_default();
        println!("{id}  {name}  [{}]", capabilities.join(", "));
    }
    Ok(())
}

/// Submit a task and poll until it completes or the timeout passes.
pub async fn send(args: SendArgs) -> anyhow::Result<()> {
    let data: Value = serde_json::from_str(&args.data).context("task data must be JSON")?;
    if !data.is_object() {
        bail!("task data must be a JSON object, got: {data}");
    }

    let client = reqwest::Client::new();
    let submitted: Value = client
        .post(format!("{}/api/tasks", args.gateway))
        .json(&serde_json::json!({
            "agent_id": args.agent,
            "task_type": args.task_type,
            "data": data,
            "timeout_secs": args.timeout,
        }))
        .send()
        .await
        .context("gateway unreachable")?
        .json()
        .await?;
    let Some(task_id) = submitted["task_id"].as_str() else {
        bail!("gateway did not return a task id: {submitted}");
    };
    println!("task {task_id} submitted");

    let deadline = Instant::now() + Duration::from_secs(args.timeout + 1);
    loop {
        let record: Value = client
            .get(format!("{}/api/tasks/{task_id}", args.gateway))
            .send()
            .await?
            .json()
            .await?;
        match record["state"].as_str() {
            Some("pending") => {
                if Instant::now() > deadline {
                    bail!("gave up waiting for task {task_id}");
                }
                tokio::time::sleep(Duration::from_millis(200)).await;
            }
            Some("completed") => {
                println!("{}", serde_json::to_string_pretty(&record["result"])?);
                return Ok(());
            }
            Some("failed") => {
                bail!("task failed: {}", record["error"].as_str().unwrap_or("unknown error"));
            }
            _ => bail!("unexpected response: {record}"),
        }
    }
}
