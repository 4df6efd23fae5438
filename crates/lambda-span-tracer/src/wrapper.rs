// Copyright 2025-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Handler wrapper running one traced session per invocation.
//!
//! A session installs an SDK tracer provider backed by the span accumulator as the global
//! provider, opens the end span, emits the start span, runs the handler inside the end span's
//! context, records its result on the end span and shuts the provider down. Telemetry never
//! changes the handler result: setup failures run the handler uninstrumented, and panics raised
//! by the instrumentation are caught and logged.

use std::any::{type_name, Any};
use std::backtrace::Backtrace;
use std::fmt::Display;
use std::future::Future;
use std::panic::{self, AssertUnwindSafe};
use std::path::{Path, PathBuf};
use std::pin::Pin;
use std::sync::Arc;
use std::task::{self, Poll};
use std::time::{Duration, SystemTime};

use futures::FutureExt;
use opentelemetry::trace::noop::NoopTracerProvider;
use opentelemetry::trace::{
    Span as _, SpanKind, SpanRef, TraceContextExt, Tracer as _, TracerProvider as _,
};
use opentelemetry::{global, Context, KeyValue};
use opentelemetry_sdk::trace::SdkTracerProvider;
use opentelemetry_sdk::Resource;
use serde::Serialize;
use serde_json::Value;
use tokio::time::Instant;
use tracing::{debug, error, info, warn};

use crate::config::Config;
use crate::environment::{InvocationContext, LambdaEnvironment};
use crate::error::TracerError;
use crate::exporter::{SpanAccumulator, StdoutExporter};
use crate::interceptor::TRACER_NAME;
use crate::keys;
use crate::logger;
use crate::readiness::ProcessState;
use crate::spool::{ensure_stop_marker, SpoolWriter};
use crate::transform::{SpanMapper, END_SPAN_NAME};

pub const TIMEOUT_ERROR_TYPE: &str = "TimeoutError";

/// An invocation handler taking the raw event and the invocation facts.
pub trait Handler: Send + Sync {
    type Output: Serialize + Send;
    type Error: Display + Send + 'static;
    type Future: Future<Output = Result<Self::Output, Self::Error>> + Send;

    fn call(&self, event: Value, context: InvocationContext) -> Self::Future;
}

impl<F, Fut, O, E> Handler for F
where
    F: Fn(Value, InvocationContext) -> Fut + Send + Sync,
    Fut: Future<Output = Result<O, E>> + Send,
    O: Serialize + Send,
    E: Display + Send + 'static,
{
    type Output = O;
    type Error = E;
    type Future = Fut;

    fn call(&self, event: Value, context: InvocationContext) -> Self::Future {
        self(event, context)
    }
}

#[derive(Debug)]
enum Mode {
    Instrumented(Config),
    Disabled,
    /// Invalid configuration, only the stop marker is written
    Misconfigured { spool_dir: PathBuf },
}

pub struct WrappedHandler<H> {
    handler: H,
    mode: Mode,
    environment: Option<LambdaEnvironment>,
    process: Arc<ProcessState>,
}

/// Resolves `config` and wraps `handler`. An invalid configuration is logged and leaves the
/// handler uninstrumented.
pub fn wrap_handler<H: Handler>(handler: H, config: Config) -> WrappedHandler<H> {
    let spool_dir = config.spool_dir.clone();
    let mode = match Config::resolve(config) {
        Ok(config) if !config.enabled => {
            logger::init(config.debug);
            debug!("Tracing disabled, handler runs uninstrumented");
            Mode::Disabled
        }
        Ok(config) => {
            logger::init(config.debug);
            Mode::Instrumented(config)
        }
        Err(e) => {
            logger::init(false);
            error!("Failed validation error: {e}");
            Mode::Misconfigured { spool_dir }
        }
    };
    WrappedHandler {
        handler,
        mode,
        environment: None,
        process: ProcessState::global(),
    }
}

impl<H: Handler> WrappedHandler<H> {
    /// Uses fixed environment facts instead of reading the process environment per invocation.
    pub fn with_environment(mut self, environment: LambdaEnvironment) -> Self {
        self.environment = Some(environment);
        self
    }

    pub fn with_process_state(mut self, process: Arc<ProcessState>) -> Self {
        self.process = process;
        self
    }

    pub fn is_instrumented(&self) -> bool {
        matches!(self.mode, Mode::Instrumented(_))
    }

    pub fn config(&self) -> Option<&Config> {
        match &self.mode {
            Mode::Instrumented(config) => Some(config),
            _ => None,
        }
    }

    /// Spool directory the wrapper writes to, if any
    pub fn spool_dir(&self) -> Option<&Path> {
        match &self.mode {
            Mode::Instrumented(config) => Some(&config.spool_dir),
            Mode::Misconfigured { spool_dir } => Some(spool_dir),
            Mode::Disabled => None,
        }
    }

    pub async fn invoke(
        &self,
        event: Value,
        context: InvocationContext,
    ) -> Result<H::Output, H::Error> {
        match &self.mode {
            Mode::Instrumented(config) => self.invoke_traced(config, event, context).await,
            Mode::Disabled => self.handler.call(event, context).await,
            Mode::Misconfigured { spool_dir } => {
                let result = self.handler.call(event, context).await;
                fault_barrier("recovery", ensure_stop_marker(spool_dir)).await;
                result
            }
        }
    }

    async fn invoke_traced(
        &self,
        config: &Config,
        event: Value,
        context: InvocationContext,
    ) -> Result<H::Output, H::Error> {
        let environment = self
            .environment
            .clone()
            .unwrap_or_else(LambdaEnvironment::from_env);

        let setup = panic::catch_unwind(AssertUnwindSafe(|| {
            Session::begin(config, environment, &self.process, &event, &context)
        }));
        let session = match setup {
            Ok(Ok(session)) => Some(session),
            Ok(Err(e)) => {
                error!("Failed to instrument invocation {}: {e}", context.request_id);
                None
            }
            Err(panic) => {
                log_panic("setup", panic.as_ref());
                None
            }
        };

        let scope = session
            .as_ref()
            .map_or_else(Context::current, |session| session.invocation.clone());
        let mut handler = InvocationScope::new(self.handler.call(event, context), scope);
        let timeout_at = session.as_ref().and_then(|session| session.timeout_at);
        let result = match timeout_at {
            Some(at) => tokio::select! {
                result = &mut handler => result,
                () = tokio::time::sleep_until(at) => {
                    if let Some(session) = session.as_ref() {
                        fault_barrier("timeout", async { session.flush_timeout() }).await;
                    }
                    handler.await
                }
            },
            None => handler.await,
        };

        if let Some(session) = session {
            fault_barrier("close", async { session.close(&result) }).await;
        }
        // printed spans never reach the spool, the shipping agent has nothing to recover
        if !config.print_stdout {
            fault_barrier("recovery", ensure_stop_marker(&config.spool_dir)).await;
        }
        result
    }
}

/// Instrumentation state of one invocation
struct Session {
    provider: SdkTracerProvider,
    /// Present unless spans are printed
    accumulator: Option<SpanAccumulator>,
    /// Context holding the end span, parent of every span of the invocation
    invocation: Context,
    event: String,
    timeout_at: Option<Instant>,
    timeout_buffer: Duration,
}

impl Session {
    fn begin(
        config: &Config,
        environment: LambdaEnvironment,
        process: &ProcessState,
        event: &Value,
        context: &InvocationContext,
    ) -> Result<Session, TracerError> {
        let event = serde_json::to_string(event)?;
        let function_name = environment.function_name.clone();
        if function_name.is_empty() {
            warn!("AWS_LAMBDA_FUNCTION_NAME is not set, start span cannot be told apart");
        }

        let resource = Resource::builder()
            .with_attributes(vec![KeyValue::new(keys::EVENT, event.clone())])
            .build();
        let builder = SdkTracerProvider::builder().with_resource(resource);
        let (provider, accumulator) = if config.print_stdout {
            let provider = builder.with_simple_exporter(StdoutExporter::new()).build();
            (provider, None)
        } else {
            let spool = SpoolWriter::new(&config.spool_dir);
            spool.ensure_dir()?;
            let mapper = SpanMapper::new(environment, context.clone(), process)
                .with_token(config.token.clone())
                .with_max_entry_size(config.max_entry_size);
            let accumulator =
                SpanAccumulator::new(mapper, spool, config.max_size_for_request);
            let provider = builder.with_simple_exporter(accumulator.clone()).build();
            (provider, Some(accumulator))
        };
        global::set_tracer_provider(provider.clone());
        info!("Tracer starting for request {}", context.request_id);

        let tracer = provider.tracer(TRACER_NAME);
        let end_span = tracer
            .span_builder(END_SPAN_NAME)
            .with_kind(SpanKind::Server)
            .with_attributes(vec![KeyValue::new(keys::EVENT, event.clone())])
            .start(&tracer);
        let invocation = Context::current_with_span(end_span);

        // exported, and spooled, as soon as it ends
        tracer
            .span_builder(function_name)
            .with_kind(SpanKind::Server)
            .with_attributes(vec![KeyValue::new(keys::EVENT, event.clone())])
            .start_with_context(&tracer, &invocation)
            .end();

        Ok(Session {
            provider,
            accumulator,
            invocation,
            event,
            timeout_at: timeout_at(context.deadline, config.timeout_buffer),
            timeout_buffer: config.timeout_buffer,
        })
    }

    /// Writes a best-effort end record while the handler is still running, then stops the
    /// exporter so the late real end record is not written twice.
    fn flush_timeout(&self) {
        warn!(
            "Invocation is about to time out, flushing spans {} ms before the deadline",
            self.timeout_buffer.as_millis()
        );
        let tracer = self.provider.tracer(TRACER_NAME);
        tracer
            .span_builder(END_SPAN_NAME)
            .with_kind(SpanKind::Server)
            .with_attributes(vec![
                KeyValue::new(keys::EVENT, self.event.clone()),
                KeyValue::new(keys::HAS_ERROR, true),
                KeyValue::new(keys::ERROR_TYPE, TIMEOUT_ERROR_TYPE),
                KeyValue::new(
                    keys::ERROR_MESSAGE,
                    "Task timed out before the handler returned",
                ),
                KeyValue::new(keys::ERROR_STACKTRACE, ""),
            ])
            .start(&tracer)
            .end();
        if let Some(accumulator) = &self.accumulator {
            accumulator.stop();
        }
    }

    fn close<O, E>(self, result: &Result<O, E>)
    where
        O: Serialize,
        E: Display,
    {
        let end_span = self.invocation.span();
        record_result(&end_span, result);
        end_span.end();

        global::set_tracer_provider(NoopTracerProvider::new());
        if let Err(e) = self.provider.shutdown() {
            error!("Failed to shut down tracer provider: {e}");
        }
        if let Some(accumulator) = &self.accumulator {
            accumulator.stop();
        }
        info!("Tracer ending");
    }
}

/// Attaches the invocation context around every poll of the handler future, so that spans
/// started by the handler become children of the end span.
struct InvocationScope<F> {
    inner: Pin<Box<F>>,
    context: Context,
}

impl<F: Future> InvocationScope<F> {
    fn new(inner: F, context: Context) -> Self {
        Self {
            inner: Box::pin(inner),
            context,
        }
    }
}

impl<F: Future> Future for InvocationScope<F> {
    type Output = F::Output;

    fn poll(self: Pin<&mut Self>, cx: &mut task::Context<'_>) -> Poll<F::Output> {
        let this = self.get_mut();
        let _attached = this.context.clone().attach();
        this.inner.as_mut().poll(cx)
    }
}

fn record_result<O, E>(span: &SpanRef<'_>, result: &Result<O, E>)
where
    O: Serialize,
    E: Display,
{
    match result {
        Ok(output) => match serde_json::to_string(output) {
            Ok(response) => span.set_attribute(KeyValue::new(keys::RESPONSE, response)),
            Err(e) => error!("Failed to track response: {e}"),
        },
        Err(e) => {
            span.set_attribute(KeyValue::new(keys::HAS_ERROR, true));
            span.set_attribute(KeyValue::new(keys::ERROR_TYPE, type_name::<E>()));
            span.set_attribute(KeyValue::new(keys::ERROR_MESSAGE, e.to_string()));
            span.set_attribute(KeyValue::new(
                keys::ERROR_STACKTRACE,
                Backtrace::force_capture().to_string(),
            ));
        }
    }
}

/// Instant at which the timeout flush fires, `None` when the deadline is unknown or too close.
fn timeout_at(deadline: Option<SystemTime>, buffer: Duration) -> Option<Instant> {
    let remaining = deadline?.duration_since(SystemTime::now()).ok()?;
    let until_flush = remaining.checked_sub(buffer).filter(|left| !left.is_zero())?;
    Some(Instant::now() + until_flush)
}

async fn fault_barrier<F: Future<Output = ()>>(stage: &str, work: F) {
    if let Err(panic) = AssertUnwindSafe(work).catch_unwind().await {
        log_panic(stage, panic.as_ref());
    }
}

fn log_panic(stage: &str, panic: &(dyn Any + Send)) {
    let message = panic
        .downcast_ref::<&str>()
        .map(|message| (*message).to_string())
        .or_else(|| panic.downcast_ref::<String>().cloned())
        .unwrap_or_else(|| "unknown panic".to_string());
    error!(
        "Recovered from panic during {stage}: {message}\n{}",
        Backtrace::force_capture()
    );
}
