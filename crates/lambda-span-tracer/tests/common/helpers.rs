// Copyright 2025-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Helper functions for integration tests

use lambda_span_tracer::{
    read_spool, Config, InvocationContext, LambdaEnvironment, SpoolContents,
};
use std::path::Path;
use std::time::{Duration, SystemTime};

pub const FUNCTION_NAME: &str = "test";
pub const TOKEN: &str = "t_10faa5e13e7844aaa1234";
pub const TRACE_HEADER: &str =
    "Root=1-5759e988-bd862e3fe1be46a994272793;Parent=53995c3f42cd8ad8;Sampled=1";
pub const FUNCTION_ARN: &str = "arn:aws:lambda:us-east-1:123456789012:function:test";

/// Environment of a function named `test`
pub fn test_environment() -> LambdaEnvironment {
    LambdaEnvironment {
        region: "us-east-1".to_string(),
        function_name: FUNCTION_NAME.to_string(),
        memory_size: "128".to_string(),
        runtime: "AWS_Lambda_rust".to_string(),
        log_group_name: "/aws/lambda/test".to_string(),
        log_stream_name: "2021/09/06/[$LATEST]2a6a6b1e".to_string(),
        trace_header: Some(TRACE_HEADER.to_string()),
        initialization_type: None,
        variables: [
            ("AWS_REGION".to_string(), "us-east-1".to_string()),
            ("AWS_LAMBDA_FUNCTION_NAME".to_string(), FUNCTION_NAME.to_string()),
        ]
        .into_iter()
        .collect(),
    }
}

/// Invocation with a deadline far enough away that the timeout flush never fires
pub fn test_context(request_id: &str) -> InvocationContext {
    InvocationContext::new(request_id)
        .with_function_arn(FUNCTION_ARN)
        .with_deadline(SystemTime::now() + Duration::from_secs(60))
}

pub fn test_config(spool_dir: &Path) -> Config {
    Config {
        token: TOKEN.to_string(),
        spool_dir: spool_dir.to_path_buf(),
        ..Default::default()
    }
}

pub async fn spool(dir: &Path) -> SpoolContents {
    read_spool(dir).await.expect("Failed to read spool directory")
}

/// Names of every entry of `dir`, sorted
pub fn dir_entries(dir: &Path) -> Vec<String> {
    let mut names: Vec<String> = std::fs::read_dir(dir)
        .expect("Failed to list directory")
        .map(|entry| entry.unwrap().file_name().to_string_lossy().into_owned())
        .collect();
    names.sort();
    names
}
