// Copyright 2025-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

#![cfg_attr(not(test), deny(clippy::panic))]
#![cfg_attr(not(test), deny(clippy::unwrap_used))]
#![cfg_attr(not(test), deny(clippy::expect_used))]
#![cfg_attr(not(test), deny(clippy::todo))]
#![cfg_attr(not(test), deny(clippy::unimplemented))]

use std::env;
use std::time::{Duration, SystemTime};

use http_body_util::{BodyExt, Empty};
use hyper::body::Bytes;
use hyper::Request;
use hyper_util::client::legacy::Client;
use hyper_util::rt::TokioExecutor;
use serde_json::{json, Value};
use tower::{Service, ServiceBuilder, ServiceExt};
use tracing::{error, info};
use uuid::Uuid;

use lambda_span_tracer::{
    read_spool, wrap_handler, Config, InterceptLayer, InvocationContext, ReplayBody,
};

const DEMO_TIMEOUT: Duration = Duration::from_secs(30);

/// Fetches `target`, if any, through an instrumented client and reports what came back.
async fn handle(
    event: Value,
    context: InvocationContext,
    target: Option<String>,
) -> Result<Value, String> {
    let Some(target) = target else {
        return Ok(json!({ "request_id": context.request_id, "event": event }));
    };

    let client = Client::builder(TokioExecutor::new()).build_http::<ReplayBody<Empty<Bytes>>>();
    let mut service = ServiceBuilder::new()
        .layer(InterceptLayer::default())
        .service(client);
    let request = Request::get(target.as_str())
        .body(Empty::new())
        .map_err(|e| format!("invalid target {target}: {e}"))?;
    let response = service
        .ready()
        .await
        .map_err(|e| e.to_string())?
        .call(request)
        .await
        .map_err(|e| format!("request to {target} failed: {e}"))?;

    let status = response.status().as_u16();
    let body = response
        .into_body()
        .collect()
        .await
        .map_err(|e| e.to_string())?
        .to_bytes();
    Ok(json!({
        "request_id": context.request_id,
        "status": status,
        "length": body.len(),
    }))
}

#[tokio::main]
pub async fn main() {
    let event = match env::args().nth(1) {
        Some(raw) => match serde_json::from_str::<Value>(&raw) {
            Ok(event) => event,
            Err(e) => {
                error!("Event must be valid JSON: {e}");
                return;
            }
        },
        None => json!({ "name": "demo" }),
    };
    let target = env::var("DEMO_TARGET_URL").ok();

    let config = Config {
        token: "t_demo".to_string(),
        debug: true,
        ..Default::default()
    };
    let wrapped = wrap_handler(
        move |event: Value, context: InvocationContext| {
            let target = target.clone();
            async move { handle(event, context, target).await }
        },
        config,
    );

    let context = InvocationContext::new(Uuid::new_v4().to_string())
        .with_deadline(SystemTime::now() + DEMO_TIMEOUT);
    match wrapped.invoke(event, context).await {
        Ok(response) => info!("Handler returned {response}"),
        Err(e) => error!("Handler failed: {e}"),
    }

    let Some(spool_dir) = wrapped.spool_dir() else {
        return;
    };
    match read_spool(spool_dir).await {
        Ok(contents) => {
            for span in contents.start_spans().chain(contents.end_spans()) {
                match serde_json::to_string_pretty(span) {
                    Ok(line) => println!("{line}"),
                    Err(e) => error!("Failed to print span {}: {e}", span.id),
                }
            }
            if contents.has_stop_marker {
                println!("stop marker present in {}", spool_dir.display());
            }
        }
        Err(e) => error!("{e}"),
    }
}
