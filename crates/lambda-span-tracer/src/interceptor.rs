// Copyright 2025-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Tower middleware opening one client span per outbound HTTP call.
//!
//! The span is started from the globally installed tracer provider, as a child of the context
//! current when the call is made. It stays open until the caller is done with the response
//! body: [`TracedBody`] ends it at end of stream, on a read error, or when dropped.

use std::collections::BTreeMap;
use std::fmt::{self, Display};
use std::future::Future;
use std::pin::Pin;
use std::task::{Context as TaskContext, Poll};

use hyper::body::{Body, Bytes, Frame, SizeHint};
use hyper::header::{HeaderName, HeaderValue};
use hyper::{HeaderMap, Request, Response, Uri};
use opentelemetry::propagation::{Injector, TextMapPropagator};
use opentelemetry::trace::{Span as _, SpanKind, SpanRef, Status, TraceContextExt, Tracer as _};
use opentelemetry::{global, Context, KeyValue};
use opentelemetry_sdk::propagation::TraceContextPropagator;
use tower::{Layer, Service};
use tracing::{debug, warn};

use crate::config::DEFAULT_MAX_ENTRY_SIZE;
use crate::keys;
use crate::replay::{self, ReplayBody};
use crate::util::truncate_owned;

pub const HTTP_SPAN_NAME: &str = "HttpSpan";
/// Instrumentation scope of the spans opened by the tracer
pub const TRACER_NAME: &str = "lambda-span-tracer";

/// Layer applying [`InterceptService`] to an HTTP client service
#[derive(Debug, Clone)]
pub struct InterceptLayer {
    max_entry_size: usize,
}

impl InterceptLayer {
    pub fn new(max_entry_size: usize) -> Self {
        Self { max_entry_size }
    }
}

impl Default for InterceptLayer {
    fn default() -> Self {
        Self::new(DEFAULT_MAX_ENTRY_SIZE)
    }
}

impl<S> Layer<S> for InterceptLayer {
    type Service = InterceptService<S>;

    fn layer(&self, inner: S) -> Self::Service {
        InterceptService {
            inner,
            max_entry_size: self.max_entry_size,
        }
    }
}

#[derive(Debug, Clone)]
pub struct InterceptService<S> {
    inner: S,
    max_entry_size: usize,
}

impl<S, ReqB, ResB> Service<Request<ReqB>> for InterceptService<S>
where
    S: Service<Request<ReplayBody<ReqB>>, Response = Response<ResB>> + Clone + Send + 'static,
    S::Future: Send,
    S::Error: Display + Send + 'static,
    ReqB: Body<Data = Bytes> + Unpin + Send + 'static,
    ReqB::Error: Display + Send,
    ResB: Body<Data = Bytes> + Unpin + Send + 'static,
    ResB::Error: Display + Send,
{
    type Response = Response<TracedBody<ResB>>;
    type Error = S::Error;
    type Future = Pin<Box<dyn Future<Output = Result<Self::Response, Self::Error>> + Send>>;

    fn poll_ready(&mut self, cx: &mut TaskContext<'_>) -> Poll<Result<(), Self::Error>> {
        self.inner.poll_ready(cx)
    }

    fn call(&mut self, request: Request<ReqB>) -> Self::Future {
        // the clone may not be ready, keep the service that was polled
        let clone = self.inner.clone();
        let mut inner = std::mem::replace(&mut self.inner, clone);
        let parent = Context::current();
        let max_entry_size = self.max_entry_size;

        Box::pin(async move {
            let tracer = global::tracer(TRACER_NAME);
            let span = tracer
                .span_builder(HTTP_SPAN_NAME)
                .with_kind(SpanKind::Client)
                .start_with_context(&tracer, &parent);
            if !span.is_recording() {
                debug!("No tracer provider installed, forwarding request untraced");
                let response = inner.call(request.map(ReplayBody::new)).await?;
                return Ok(response.map(|body| TracedBody::new(ReplayBody::new(body), None)));
            }

            let call = parent.with_span(span);
            let span = call.span();
            let (mut parts, body) = request.into_parts();
            record_target(&span, &parts.uri);
            span.set_attribute(KeyValue::new(
                keys::HTTP_METHOD,
                parts.method.as_str().to_string(),
            ));

            TraceContextPropagator::new()
                .inject_context(&call, &mut HeaderInjector(&mut parts.headers));
            span.set_attribute(KeyValue::new(
                keys::HTTP_REQUEST_HEADERS,
                headers_json(&parts.headers, max_entry_size),
            ));
            let body = capture_body(&span, body, max_entry_size, keys::HTTP_REQUEST_BODY).await;

            match inner.call(Request::from_parts(parts, body)).await {
                Ok(response) => {
                    let (parts, body) = response.into_parts();
                    let status = parts.status.as_u16();
                    span.set_attribute(KeyValue::new(keys::HTTP_STATUS_CODE, i64::from(status)));
                    if !(100..400).contains(&status) {
                        span.set_status(Status::error(format!(
                            "Invalid HTTP status code {status}"
                        )));
                    }
                    span.set_attribute(KeyValue::new(
                        keys::HTTP_RESPONSE_HEADERS,
                        headers_json(&parts.headers, max_entry_size),
                    ));
                    let body =
                        capture_body(&span, body, max_entry_size, keys::HTTP_RESPONSE_BODY).await;
                    Ok(Response::from_parts(parts, TracedBody::new(body, Some(call))))
                }
                Err(e) => {
                    record_exception(&span, &e.to_string());
                    span.end();
                    Err(e)
                }
            }
        })
    }
}

/// Response body owning the span of the call it belongs to.
pub struct TracedBody<B: Body> {
    inner: ReplayBody<B>,
    call: Option<Context>,
}

impl<B> TracedBody<B>
where
    B: Body<Data = Bytes> + Unpin,
{
    fn new(inner: ReplayBody<B>, call: Option<Context>) -> Self {
        let mut body = Self { inner, call };
        if body.inner.is_end_stream() {
            body.finish();
        }
        body
    }
}

impl<B: Body> TracedBody<B> {
    fn finish(&mut self) {
        if let Some(call) = self.call.take() {
            call.span().end();
        }
    }
}

impl<B: Body> Drop for TracedBody<B> {
    fn drop(&mut self) {
        self.finish();
    }
}

impl<B: Body + fmt::Debug> fmt::Debug for TracedBody<B> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TracedBody")
            .field("inner", &self.inner)
            .field("open", &self.call.is_some())
            .finish()
    }
}

impl<B> Body for TracedBody<B>
where
    B: Body<Data = Bytes> + Unpin,
    B::Error: Display,
{
    type Data = Bytes;
    type Error = B::Error;

    fn poll_frame(
        self: Pin<&mut Self>,
        cx: &mut TaskContext<'_>,
    ) -> Poll<Option<Result<Frame<Self::Data>, Self::Error>>> {
        let this = self.get_mut();
        let polled = Pin::new(&mut this.inner).poll_frame(cx);
        match &polled {
            Poll::Ready(Some(Err(e))) => {
                if let Some(call) = &this.call {
                    record_exception(&call.span(), &format!("failed to read response body: {e}"));
                }
                this.finish();
            }
            Poll::Ready(None) => this.finish(),
            Poll::Ready(Some(Ok(_))) | Poll::Pending => {}
        }
        polled
    }

    fn is_end_stream(&self) -> bool {
        self.inner.is_end_stream()
    }

    fn size_hint(&self) -> SizeHint {
        self.inner.size_hint()
    }
}

struct HeaderInjector<'a>(&'a mut HeaderMap);

impl Injector for HeaderInjector<'_> {
    fn set(&mut self, key: &str, value: String) {
        match (
            HeaderName::from_bytes(key.as_bytes()),
            HeaderValue::from_str(&value),
        ) {
            (Ok(name), Ok(value)) => {
                self.0.insert(name, value);
            }
            _ => warn!("Unable to inject header {key}"),
        }
    }
}

fn record_target(span: &SpanRef<'_>, uri: &Uri) {
    span.set_attribute(KeyValue::new(keys::HTTP_URL, uri.to_string()));
    if let Some(scheme) = uri.scheme_str() {
        span.set_attribute(KeyValue::new(keys::HTTP_SCHEME, scheme.to_string()));
    }
    let host = match (uri.host(), uri.port_u16()) {
        (Some(host), Some(port)) => format!("{host}:{port}"),
        (Some(host), None) => host.to_string(),
        (None, _) => String::new(),
    };
    span.set_attribute(KeyValue::new(keys::HTTP_HOST, host));
    span.set_attribute(KeyValue::new(keys::HTTP_TARGET, uri.path().to_string()));
}

fn record_exception(span: &SpanRef<'_>, message: &str) {
    span.add_event(
        "exception",
        vec![KeyValue::new(keys::EXCEPTION_MESSAGE, message.to_string())],
    );
    span.set_attribute(KeyValue::new(keys::EXCEPTION_MESSAGE, message.to_string()));
    span.set_status(Status::error(message.to_string()));
}

async fn capture_body<B>(
    span: &SpanRef<'_>,
    body: B,
    limit: usize,
    key: &'static str,
) -> ReplayBody<B>
where
    B: Body<Data = Bytes> + Unpin,
    B::Error: Display,
{
    if body.is_end_stream() {
        return ReplayBody::new(body);
    }
    let captured = replay::capture(body, limit).await;
    match captured.error {
        Some(error) => {
            warn!("Failed to capture {key}: {error}");
            span.set_status(Status::error(format!("failed to read {key}: {error}")));
        }
        None => {
            let observed = String::from_utf8_lossy(&captured.observed).into_owned();
            span.set_attribute(KeyValue::new(key, truncate_owned(observed, limit)));
        }
    }
    captured.body
}

/// Serializes headers as a JSON object of name to last value, truncated to `limit` bytes.
fn headers_json(headers: &HeaderMap, limit: usize) -> String {
    let mut flattened = BTreeMap::new();
    for (name, value) in headers {
        flattened.insert(
            name.as_str(),
            String::from_utf8_lossy(value.as_bytes()).into_owned(),
        );
    }
    match serde_json::to_string(&flattened) {
        Ok(json) => truncate_owned(json, limit),
        Err(e) => {
            warn!("Failed to serialize headers: {e}");
            String::new()
        }
    }
}
