// Copyright 2025-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Wire format of the span records written to the spool directory.

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SpanType {
    #[default]
    Function,
    Http,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Readiness {
    Cold,
    Warm,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TraceRoot {
    #[serde(rename = "Root")]
    pub root: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TracerVersion {
    pub version: String,
}

/// Request or response half of an HTTP call
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct HttpMessage {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub uri: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub method: Option<String>,
    #[serde(
        rename = "statusCode",
        default,
        skip_serializing_if = "Option::is_none"
    )]
    pub status_code: Option<i64>,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub body: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub headers: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct HttpInfo {
    pub host: String,
    pub request: HttpMessage,
    pub response: HttpMessage,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SpanInfo {
    #[serde(rename = "logStreamName")]
    pub log_stream_name: String,
    #[serde(rename = "logGroupName")]
    pub log_group_name: String,
    #[serde(rename = "traceId")]
    pub trace_id: TraceRoot,
    #[serde(rename = "tracer")]
    pub tracer_version: TracerVersion,
    #[serde(rename = "httpInfo", default, skip_serializing_if = "Option::is_none")]
    pub http_info: Option<HttpInfo>,
}

/// Failure reported by the handler
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SpanError {
    #[serde(rename = "type")]
    pub kind: String,
    pub message: String,
    pub stacktrace: String,
}

impl SpanError {
    pub fn is_empty(&self) -> bool {
        self.kind.is_empty() && self.message.is_empty() && self.stacktrace.is_empty()
    }
}

/// One normalized, size-capped span record
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct VendorSpan {
    pub id: String,
    #[serde(rename = "parentId")]
    pub parent_id: String,
    #[serde(rename = "transactionId")]
    pub transaction_id: String,
    pub runtime: String,
    pub region: String,
    pub event: String,
    pub token: String,
    #[serde(rename = "memoryAllocated")]
    pub memory_allocated: String,
    pub account: String,
    pub envs: String,
    #[serde(rename = "type")]
    pub span_type: SpanType,
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub readiness: Option<Readiness>,
    pub return_value: Option<String>,
    pub lambda_container_id: String,
    pub info: SpanInfo,
    pub started: i64,
    pub ended: i64,
    #[serde(rename = "maxFinishTime")]
    pub max_finish_time: i64,
    pub error: Option<SpanError>,
}

impl VendorSpan {
    /// Length of the JSON encoding, the unit the request budget is counted in
    pub fn serialized_size(&self) -> usize {
        serde_json::to_vec(self)
            .map(|encoded| encoded.len())
            .unwrap_or(usize::MAX)
    }
}
