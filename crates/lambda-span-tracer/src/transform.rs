// Copyright 2025-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Maps finished spans onto the vendor span schema.
//!
//! Three kinds of spans reach the mapper during an invocation:
//! - the start span, named after the function, which becomes the `<request id>_started` record
//!   and carries the environment dump and the invocation deadline;
//! - the end span ([`END_SPAN_NAME`]), which becomes the record keyed by the request id and
//!   carries the handler result, with `started` taken from the start record;
//! - any other span, treated as a downstream HTTP call of the invocation.

use opentelemetry::Value;
use opentelemetry_sdk::trace::SpanData;
use tracing::warn;
use uuid::Uuid;

use crate::config::DEFAULT_MAX_ENTRY_SIZE;
use crate::environment::{parse_trace_header, InvocationContext, LambdaEnvironment};
use crate::readiness::ProcessState;
use crate::keys;
use crate::util::{epoch_millis, truncate, truncate_owned};
use crate::vendor_span::{
    HttpInfo, HttpMessage, Readiness, SpanError, SpanInfo, SpanType, TraceRoot, TracerVersion,
    VendorSpan,
};

/// Name of the span closing an invocation
pub const END_SPAN_NAME: &str = "InvocationParentSpan";
const STARTED_SUFFIX: &str = "_started";

pub const TRACER_VERSION: &str = env!("CARGO_PKG_VERSION");

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SpanClass {
    Start,
    End,
    Downstream,
}

impl SpanClass {
    pub fn is_invocation(self) -> bool {
        matches!(self, SpanClass::Start | SpanClass::End)
    }
}

/// Transforms the spans of one invocation.
#[derive(Debug, Clone)]
pub struct SpanMapper {
    environment: LambdaEnvironment,
    invocation: InvocationContext,
    token: String,
    readiness: Readiness,
    container_id: String,
    max_entry_size: usize,
}

impl SpanMapper {
    /// Readiness is decided here, once for the whole invocation.
    pub fn new(
        environment: LambdaEnvironment,
        invocation: InvocationContext,
        process: &ProcessState,
    ) -> Self {
        let readiness = process.observe_invocation(environment.is_provisioned_concurrency_init());
        Self {
            environment,
            invocation,
            token: String::new(),
            readiness,
            container_id: process.container_id().to_string(),
            max_entry_size: DEFAULT_MAX_ENTRY_SIZE,
        }
    }

    pub fn with_token(mut self, token: impl Into<String>) -> Self {
        self.token = token.into();
        self
    }

    pub fn with_max_entry_size(mut self, max_entry_size: usize) -> Self {
        self.max_entry_size = max_entry_size;
        self
    }

    pub fn readiness(&self) -> Readiness {
        self.readiness
    }

    pub fn request_id(&self) -> &str {
        &self.invocation.request_id
    }

    pub fn classify(&self, span: &SpanData) -> SpanClass {
        if span.name == END_SPAN_NAME {
            SpanClass::End
        } else if span.name == self.environment.function_name {
            SpanClass::Start
        } else {
            SpanClass::Downstream
        }
    }

    /// `invocation_started` replaces the start time of the end record.
    pub fn transform(&self, span: &SpanData, invocation_started: i64) -> VendorSpan {
        let class = self.classify(span);

        let started = match class {
            SpanClass::End => invocation_started,
            _ => epoch_millis(span.start_time),
        };
        let trace_header = self
            .invocation
            .trace_header
            .as_deref()
            .or(self.environment.trace_header.as_deref());
        let (root, transaction_id) = parse_trace_header(trace_header);
        let account = match self.invocation.account_id() {
            Some(account) => account.to_string(),
            None => {
                warn!(
                    "Unable to parse account id from function ARN {:?}",
                    self.invocation.invoked_function_arn
                );
                String::new()
            }
        };
        if self.token.is_empty() {
            warn!("No token available for span {}", span.name);
        }

        let mut vendor = VendorSpan {
            transaction_id,
            region: self.environment.region.clone(),
            token: self.token.clone(),
            account,
            lambda_container_id: self.container_id.clone(),
            info: SpanInfo {
                log_stream_name: self.environment.log_stream_name.clone(),
                log_group_name: self.environment.log_group_name.clone(),
                trace_id: TraceRoot { root },
                tracer_version: TracerVersion {
                    version: TRACER_VERSION.to_string(),
                },
                http_info: None,
            },
            started,
            ended: epoch_millis(span.end_time),
            ..Default::default()
        };

        if class.is_invocation() {
            vendor.span_type = SpanType::Function;
            vendor.id = self.invocation.request_id.clone();
            vendor.name = self.environment.function_name.clone();
            vendor.memory_allocated = self.environment.memory_size.clone();
            vendor.runtime = self.environment.runtime.clone();
            vendor.readiness = Some(self.readiness);
            vendor.event = self.capped(span, keys::EVENT).unwrap_or_else(|| {
                warn!("Unable to fetch event from span {}", span.name);
                String::new()
            });
        } else {
            vendor.span_type = SpanType::Http;
            vendor.id = Uuid::new_v4().to_string();
            vendor.parent_id = self.invocation.request_id.clone();
            vendor.info.http_info = Some(self.http_info(span));
        }

        match class {
            SpanClass::Start => {
                vendor.id.push_str(STARTED_SUFFIX);
                vendor.envs = self.envs();
                vendor.max_finish_time = self.invocation.deadline.map(epoch_millis).unwrap_or(0);
            }
            SpanClass::End => {
                vendor.error = self.span_error(span);
                if vendor.error.is_none() {
                    vendor.return_value = self
                        .capped(span, keys::RESPONSE)
                        .filter(|response| !response.is_empty());
                }
            }
            SpanClass::Downstream => {}
        }
        vendor
    }

    fn capped(&self, span: &SpanData, key: &str) -> Option<String> {
        attribute(span, key).map(|value| truncate_owned(value.to_string(), self.max_entry_size))
    }

    fn expect_capped(&self, span: &SpanData, key: &str) -> String {
        self.capped(span, key).unwrap_or_else(|| {
            warn!("Unable to fetch {key} from span");
            String::new()
        })
    }

    fn envs(&self) -> String {
        match serde_json::to_string(&self.environment.variables) {
            Ok(envs) => truncate_owned(envs, self.max_entry_size),
            Err(e) => {
                warn!("Unable to serialize environment variables: {e}");
                String::new()
            }
        }
    }

    fn span_error(&self, span: &SpanData) -> Option<SpanError> {
        attribute(span, keys::HAS_ERROR)?;
        let error = SpanError {
            kind: self.expect_capped(span, keys::ERROR_TYPE),
            message: self.expect_capped(span, keys::ERROR_MESSAGE),
            stacktrace: self.expect_capped(span, keys::ERROR_STACKTRACE),
        };
        (!error.is_empty()).then_some(error)
    }

    fn http_info(&self, span: &SpanData) -> HttpInfo {
        let mut info = HttpInfo {
            host: self.expect_capped(span, keys::HTTP_HOST),
            ..Default::default()
        };
        info.request.method = self.capped(span, keys::HTTP_METHOD);
        if info.request.method.is_none() {
            warn!("Unable to fetch {} from span", keys::HTTP_METHOD);
        }
        info.request.uri = match attribute(span, keys::HTTP_TARGET) {
            Some(target) => Some(format!(
                "{}{}",
                info.host,
                truncate(&target.to_string(), self.max_entry_size)
            )),
            None => {
                warn!("Unable to fetch {} from span", keys::HTTP_TARGET);
                None
            }
        };
        info.request.headers = self.expect_capped(span, keys::HTTP_REQUEST_HEADERS);
        info.request.body = self
            .capped(span, keys::HTTP_REQUEST_BODY)
            .unwrap_or_default();

        info.response = HttpMessage {
            status_code: match attribute(span, keys::HTTP_STATUS_CODE) {
                Some(Value::I64(code)) => Some(*code),
                _ => None,
            },
            headers: self.expect_capped(span, keys::HTTP_RESPONSE_HEADERS),
            body: self
                .capped(span, keys::HTTP_RESPONSE_BODY)
                .unwrap_or_default(),
            ..Default::default()
        };
        if info.response.status_code.is_none() {
            warn!("Unable to fetch {} from span", keys::HTTP_STATUS_CODE);
        }
        info
    }
}

/// Last value recorded under `key`
fn attribute<'a>(span: &'a SpanData, key: &str) -> Option<&'a Value> {
    span.attributes
        .iter()
        .rev()
        .find(|kv| kv.key.as_str() == key)
        .map(|kv| &kv.value)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::{Duration, SystemTime, UNIX_EPOCH};

    use opentelemetry::KeyValue;
    use tracing_test::traced_test;

    use crate::testing::finished_span;

    const TRACE_HEADER: &str =
        "Root=1-5759e988-bd862e3fe1be46a994272793;Parent=53995c3f42cd8ad8;Sampled=1";

    fn environment() -> LambdaEnvironment {
        LambdaEnvironment {
            region: "us-east-1".to_string(),
            function_name: "test".to_string(),
            memory_size: "128".to_string(),
            runtime: "AWS_Lambda_rust".to_string(),
            log_group_name: "/aws/lambda/test".to_string(),
            log_stream_name: "2021/09/06/[$LATEST]".to_string(),
            trace_header: Some(TRACE_HEADER.to_string()),
            initialization_type: None,
            variables: [("AWS_REGION".to_string(), "us-east-1".to_string())]
                .into_iter()
                .collect(),
        }
    }

    fn invocation() -> InvocationContext {
        InvocationContext::new("6ac4cc6e-5b4b-4e59-a2b7-0f8a3d3d5a8c")
            .with_function_arn("arn:aws:lambda:us-east-1:123456789012:function:test")
            .with_deadline(at(10_000))
    }

    fn mapper() -> SpanMapper {
        SpanMapper::new(environment(), invocation(), &ProcessState::new())
            .with_token("t_10faa5e13e7844aaa1234")
    }

    fn at(millis: u64) -> SystemTime {
        UNIX_EPOCH + Duration::from_millis(millis)
    }

    fn bare(name: &str) -> SpanData {
        finished_span(name, at(0), at(1), vec![])
    }

    #[test]
    fn test_classify() {
        let mapper = mapper();
        assert_eq!(mapper.classify(&bare(END_SPAN_NAME)), SpanClass::End);
        assert_eq!(mapper.classify(&bare("test")), SpanClass::Start);
        assert_eq!(mapper.classify(&bare("HttpSpan")), SpanClass::Downstream);
    }

    #[test]
    fn test_start_span() {
        let span = finished_span(
            "test",
            at(1000),
            at(1000),
            vec![KeyValue::new(keys::EVENT, "{\"a\":1}")],
        );
        let vendor = mapper().transform(&span, 0);

        assert_eq!(vendor.id, "6ac4cc6e-5b4b-4e59-a2b7-0f8a3d3d5a8c_started");
        assert_eq!(vendor.span_type, SpanType::Function);
        assert_eq!(vendor.name, "test");
        assert_eq!(vendor.started, 1000);
        assert_eq!(vendor.event, "{\"a\":1}");
        assert_eq!(vendor.readiness, Some(Readiness::Cold));
        assert_eq!(vendor.max_finish_time, 10_000);
        assert_eq!(vendor.envs, "{\"AWS_REGION\":\"us-east-1\"}");
        assert_eq!(vendor.account, "123456789012");
        assert_eq!(vendor.token, "t_10faa5e13e7844aaa1234");
        assert_eq!(vendor.transaction_id, "bd862e3fe1be46a994272793");
        assert_eq!(vendor.info.trace_id.root, "1-5759e988-bd862e3fe1be46a994272793");
        assert_eq!(vendor.info.tracer_version.version, TRACER_VERSION);
        assert!(vendor.return_value.is_none());
        assert!(vendor.error.is_none());
    }

    #[test]
    fn test_end_span_uses_invocation_start() {
        let span = finished_span(
            END_SPAN_NAME,
            at(1500),
            at(2000),
            vec![KeyValue::new(keys::RESPONSE, "{\"Port\":9090}")],
        );
        let vendor = mapper().transform(&span, 1000);

        assert_eq!(vendor.id, "6ac4cc6e-5b4b-4e59-a2b7-0f8a3d3d5a8c");
        assert_eq!(vendor.started, 1000);
        assert_eq!(vendor.ended, 2000);
        assert_eq!(vendor.return_value.as_deref(), Some("{\"Port\":9090}"));
        assert!(vendor.error.is_none());
        assert!(vendor.envs.is_empty());
        assert_eq!(vendor.max_finish_time, 0);
    }

    #[test]
    fn test_end_span_error_wins_over_response() {
        let span = finished_span(
            END_SPAN_NAME,
            at(0),
            at(1),
            vec![
                KeyValue::new(keys::RESPONSE, "null"),
                KeyValue::new(keys::HAS_ERROR, true),
                KeyValue::new(keys::ERROR_TYPE, "HandlerError"),
                KeyValue::new(keys::ERROR_MESSAGE, "failed error"),
                KeyValue::new(keys::ERROR_STACKTRACE, "at handler"),
            ],
        );
        let vendor = mapper().transform(&span, 0);

        let error = vendor.error.unwrap();
        assert_eq!(error.message, "failed error");
        assert_eq!(error.kind, "HandlerError");
        assert_eq!(error.stacktrace, "at handler");
        assert!(vendor.return_value.is_none());
    }

    #[test]
    fn test_empty_error_collapses() {
        let span = finished_span(
            END_SPAN_NAME,
            at(0),
            at(1),
            vec![KeyValue::new(keys::HAS_ERROR, true)],
        );
        assert!(mapper().transform(&span, 0).error.is_none());
    }

    #[test]
    fn test_http_span() {
        let mapper = mapper();
        let span = finished_span(
            "HttpSpan",
            at(1100),
            at(1200),
            vec![
                KeyValue::new(keys::HTTP_HOST, "s3.aws.com"),
                KeyValue::new(keys::HTTP_METHOD, "POST"),
                KeyValue::new(keys::HTTP_TARGET, "/bucket"),
                KeyValue::new(keys::HTTP_REQUEST_HEADERS, "{}"),
                KeyValue::new(keys::HTTP_REQUEST_BODY, "x".repeat(9000)),
                KeyValue::new(keys::HTTP_RESPONSE_HEADERS, "{}"),
                KeyValue::new(keys::HTTP_STATUS_CODE, 200_i64),
            ],
        );
        let first = mapper.transform(&span, 1000);
        let second = mapper.transform(&span, 1000);

        assert_eq!(first.span_type, SpanType::Http);
        assert_eq!(first.parent_id, "6ac4cc6e-5b4b-4e59-a2b7-0f8a3d3d5a8c");
        assert_ne!(first.id, second.id);
        assert_eq!(first.started, 1100);
        assert_eq!(first.ended, 1200);
        assert!(first.readiness.is_none());
        assert!(first.name.is_empty());
        let info = first.info.http_info.unwrap();
        assert_eq!(info.host, "s3.aws.com");
        assert_eq!(info.request.uri.as_deref(), Some("s3.aws.com/bucket"));
        assert_eq!(info.request.method.as_deref(), Some("POST"));
        assert_eq!(info.request.body.len(), 2048);
        assert_eq!(info.response.status_code, Some(200));
        assert!(info.response.body.is_empty());
    }

    #[test]
    fn test_readiness_shared_by_both_halves() {
        let process = ProcessState::new();
        let first = SpanMapper::new(environment(), invocation(), &process);
        let start = first.transform(&bare("test"), 0);
        let end = first.transform(&bare(END_SPAN_NAME), 0);
        assert_eq!(start.readiness, Some(Readiness::Cold));
        assert_eq!(end.readiness, Some(Readiness::Cold));

        let second = SpanMapper::new(environment(), invocation(), &process);
        assert_eq!(second.readiness(), Readiness::Warm);
    }

    #[test]
    fn test_provisioned_concurrency_is_warm() {
        let provisioned = LambdaEnvironment {
            initialization_type: Some("provisioned-concurrency".to_string()),
            ..environment()
        };
        let mapper = SpanMapper::new(provisioned, invocation(), &ProcessState::new());
        assert_eq!(mapper.readiness(), Readiness::Warm);
    }

    #[test]
    #[traced_test]
    fn test_malformed_trace_header_is_not_fatal() {
        let malformed = LambdaEnvironment {
            trace_header: Some("Root=garbage".to_string()),
            ..environment()
        };
        let mapper = SpanMapper::new(malformed, invocation(), &ProcessState::new());
        let vendor = mapper.transform(&bare("test"), 0);
        assert_eq!(vendor.transaction_id, "");

        let missing = LambdaEnvironment {
            trace_header: None,
            ..environment()
        };
        let mapper = SpanMapper::new(missing, invocation(), &ProcessState::new());
        let vendor = mapper.transform(&bare("test"), 0);
        assert_eq!(vendor.transaction_id, "");
        assert!(vendor.info.trace_id.root.is_empty());
        assert!(logs_contain("Unable to fetch Amazon Trace ID"));
    }

    #[test]
    fn test_invocation_trace_header_overrides_environment() {
        let mapper = SpanMapper::new(
            environment(),
            invocation().with_trace_header("Root=1-00000000-override"),
            &ProcessState::new(),
        );
        let vendor = mapper.transform(&bare("test"), 0);
        assert_eq!(vendor.transaction_id, "override");
    }

    #[test]
    fn test_fields_truncated_to_entry_size() {
        let mapper = mapper().with_max_entry_size(4);
        let span = finished_span(
            END_SPAN_NAME,
            at(0),
            at(1),
            vec![
                KeyValue::new(keys::EVENT, "abcdefgh"),
                KeyValue::new(keys::RESPONSE, "ééé"),
            ],
        );
        let vendor = mapper.transform(&span, 0);
        assert_eq!(vendor.event, "abcd");
        assert_eq!(vendor.return_value.as_deref(), Some("éé"));
    }

    #[test]
    fn test_non_string_attributes_are_rendered() {
        let span = finished_span(
            "HttpSpan",
            at(0),
            at(1),
            vec![
                KeyValue::new(keys::HTTP_HOST, "localhost"),
                KeyValue::new(keys::HTTP_TARGET, "/"),
                KeyValue::new(keys::HTTP_STATUS_CODE, "200"),
                KeyValue::new(keys::HTTP_REQUEST_BODY, 42_i64),
            ],
        );
        let info = mapper().transform(&span, 0).info.http_info.unwrap();
        assert_eq!(info.request.body, "42");
        assert!(info.response.status_code.is_none());
    }
}
