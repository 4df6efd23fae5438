// Copyright 2025-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

use std::collections::BTreeMap;
use std::env;
use std::time::SystemTime;

use tracing::warn;

const ENV_REGION: &str = "AWS_REGION";
const ENV_FUNCTION_NAME: &str = "AWS_LAMBDA_FUNCTION_NAME";
const ENV_MEMORY_SIZE: &str = "AWS_LAMBDA_FUNCTION_MEMORY_SIZE";
const ENV_EXECUTION_ENV: &str = "AWS_EXECUTION_ENV";
const ENV_LOG_GROUP_NAME: &str = "AWS_LAMBDA_LOG_GROUP_NAME";
const ENV_LOG_STREAM_NAME: &str = "AWS_LAMBDA_LOG_STREAM_NAME";
const ENV_TRACE_ID: &str = "_X_AMZN_TRACE_ID";
const ENV_INITIALIZATION_TYPE: &str = "AWS_LAMBDA_INITIALIZATION_TYPE";

const PROVISIONED_CONCURRENCY: &str = "provisioned-concurrency";

/// Facts about the execution environment, read once per invocation
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LambdaEnvironment {
    pub region: String,
    pub function_name: String,
    pub memory_size: String,
    pub runtime: String,
    pub log_group_name: String,
    pub log_stream_name: String,
    pub trace_header: Option<String>,
    pub initialization_type: Option<String>,
    /// Snapshot of the process environment
    pub variables: BTreeMap<String, String>,
}

impl LambdaEnvironment {
    pub fn from_env() -> Self {
        let variables: BTreeMap<String, String> = env::vars().collect();
        let read = |key: &str| variables.get(key).cloned().unwrap_or_default();
        Self {
            region: read(ENV_REGION),
            function_name: read(ENV_FUNCTION_NAME),
            memory_size: read(ENV_MEMORY_SIZE),
            runtime: read(ENV_EXECUTION_ENV),
            log_group_name: read(ENV_LOG_GROUP_NAME),
            log_stream_name: read(ENV_LOG_STREAM_NAME),
            trace_header: variables.get(ENV_TRACE_ID).cloned(),
            initialization_type: variables.get(ENV_INITIALIZATION_TYPE).cloned(),
            variables,
        }
    }

    pub fn is_provisioned_concurrency_init(&self) -> bool {
        self.initialization_type.as_deref() == Some(PROVISIONED_CONCURRENCY)
    }
}

/// Per-invocation facts handed over by the runtime
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct InvocationContext {
    pub request_id: String,
    pub invoked_function_arn: String,
    pub deadline: Option<SystemTime>,
    /// Trace header of this invocation, overrides the one found in the environment
    pub trace_header: Option<String>,
}

impl InvocationContext {
    pub fn new(request_id: impl Into<String>) -> Self {
        Self {
            request_id: request_id.into(),
            ..Default::default()
        }
    }

    pub fn with_function_arn(mut self, arn: impl Into<String>) -> Self {
        self.invoked_function_arn = arn.into();
        self
    }

    pub fn with_deadline(mut self, deadline: SystemTime) -> Self {
        self.deadline = Some(deadline);
        self
    }

    pub fn with_trace_header(mut self, header: impl Into<String>) -> Self {
        self.trace_header = Some(header.into());
        self
    }

    /// Account id, the fifth field of `arn:partition:service:region:account:...`
    pub fn account_id(&self) -> Option<&str> {
        let mut fields = self.invoked_function_arn.split(':');
        if fields.next() != Some("arn") {
            return None;
        }
        fields.nth(3).filter(|account| !account.is_empty())
    }
}

/// Extracts the `Root` value from a header such as
/// `Root=1-5759e988-bd862e3fe1be46a994272793;Parent=53995c3f42cd8ad8;Sampled=1`.
pub fn trace_root(header: &str) -> Option<&str> {
    header
        .split(';')
        .filter_map(|field| field.trim().split_once('='))
        .find(|(key, _)| *key == "Root")
        .map(|(_, value)| value)
        .filter(|value| !value.is_empty())
}

/// Unique suffix of a root formatted `<version>-<epoch>-<unique>`
pub fn transaction_id(root: &str) -> Option<&str> {
    let mut parts = root.splitn(3, '-');
    match (parts.next(), parts.next(), parts.next()) {
        (Some(_), Some(_), Some(unique)) if !unique.is_empty() => Some(unique),
        _ => None,
    }
}

/// Root and transaction id for a trace header, empty strings when it cannot be parsed
pub fn parse_trace_header(header: Option<&str>) -> (String, String) {
    let Some(root) = header.and_then(trace_root) else {
        warn!("Unable to fetch Amazon Trace ID");
        return (String::new(), String::new());
    };
    match transaction_id(root) {
        Some(transaction) => (root.to_string(), transaction.to_string()),
        None => {
            warn!("Unable to fetch transaction ID from trace root {root}");
            (root.to_string(), String::new())
        }
    }
}
