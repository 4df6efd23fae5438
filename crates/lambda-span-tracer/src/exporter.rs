// Copyright 2025-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Span exporters plugged into the SDK tracer provider.
//!
//! [`SpanAccumulator`] is the exporter installed for every instrumented invocation. It
//! transforms finished spans into [`VendorSpan`] records and persists them through the
//! [`SpoolWriter`]:
//! - the start span is written right away as its own start batch, and its start time is
//!   remembered as the start of the invocation;
//! - downstream call spans are buffered until the end span arrives, as long as their serialized
//!   size fits in the remaining request budget. Spans that do not fit are dropped whole;
//! - the end span closes the batch: it is appended to the buffered spans, which are written as
//!   one end batch. Spans following it in the same export call are ignored.
//!
//! Once [`SpanAccumulator::stop`] has been called every further export is a no-op.
//!
//! [`StdoutExporter`] prints generic spans as JSON lines instead, for local debugging.

use std::fmt;
use std::future::{ready, Future};
use std::io::{self, Write};
use std::mem;
use std::slice;
use std::sync::{Arc, Mutex, PoisonError, RwLock};

use opentelemetry_sdk::error::{OTelSdkError, OTelSdkResult};
use opentelemetry_sdk::trace::{SpanData, SpanExporter};
use serde_json::{json, Map, Value};
use tracing::{debug, error, warn};

use crate::error::ExportError;
use crate::spool::{BatchKind, SpoolWriter};
use crate::transform::{SpanClass, SpanMapper};
use crate::util::epoch_millis;
use crate::vendor_span::VendorSpan;

#[derive(Debug, Default)]
struct Batch {
    /// Serialized size of the buffered downstream spans
    total_size: usize,
    invocation_started: Option<i64>,
    spans: Vec<VendorSpan>,
}

#[derive(Debug)]
struct Inner {
    mapper: SpanMapper,
    spool: SpoolWriter,
    max_size_for_request: usize,
    batch: Mutex<Batch>,
    stopped: RwLock<bool>,
}

/// Clones share the same batch, so the session keeps one to stop the copy owned by the provider.
#[derive(Debug, Clone)]
pub struct SpanAccumulator {
    inner: Arc<Inner>,
}

impl SpanAccumulator {
    pub fn new(mapper: SpanMapper, spool: SpoolWriter, max_size_for_request: usize) -> Self {
        Self {
            inner: Arc::new(Inner {
                mapper,
                spool,
                max_size_for_request,
                batch: Mutex::new(Batch::default()),
                stopped: RwLock::new(false),
            }),
        }
    }

    pub fn mapper(&self) -> &SpanMapper {
        &self.inner.mapper
    }

    pub fn export_spans(&self, spans: &[SpanData]) -> Result<(), ExportError> {
        if spans.is_empty() {
            return Ok(());
        }
        let inner = &*self.inner;
        // held until the export completes so that stop waits for it
        let stopped = inner.stopped.read().unwrap_or_else(PoisonError::into_inner);
        if *stopped {
            debug!("Exporter is stopped, ignoring {} spans", spans.len());
            return Ok(());
        }

        let mut batch = inner.batch.lock().unwrap_or_else(PoisonError::into_inner);
        for span in spans {
            match inner.mapper.classify(span) {
                SpanClass::End => {
                    let started = batch
                        .invocation_started
                        .unwrap_or_else(|| epoch_millis(span.start_time));
                    let end = inner.mapper.transform(span, started);
                    let mut end_batch = mem::take(&mut batch.spans);
                    end_batch.push(end);
                    inner
                        .spool
                        .write(&end_batch, BatchKind::End)
                        .map_err(ExportError::EndBatch)?;
                    return Ok(());
                }
                SpanClass::Start => {
                    let start = inner.mapper.transform(span, 0);
                    batch.invocation_started = Some(start.started);
                    inner
                        .spool
                        .write(slice::from_ref(&start), BatchKind::Start)
                        .map_err(ExportError::StartBatch)?;
                }
                SpanClass::Downstream => {
                    let started = batch.invocation_started.unwrap_or_default();
                    let call = inner.mapper.transform(span, started);
                    let size = call.serialized_size();
                    if batch.total_size.saturating_add(size) > inner.max_size_for_request {
                        warn!(
                            "Dropping span {}, {size} bytes over the remaining budget of {} bytes",
                            span.name,
                            inner.max_size_for_request.saturating_sub(batch.total_size)
                        );
                        continue;
                    }
                    batch.total_size += size;
                    batch.spans.push(call);
                }
            }
        }
        Ok(())
    }

    pub fn stop(&self) {
        let mut stopped = self
            .inner
            .stopped
            .write()
            .unwrap_or_else(PoisonError::into_inner);
        if !*stopped {
            debug!("Stopping span exporter");
            *stopped = true;
        }
    }

    pub fn is_stopped(&self) -> bool {
        *self
            .inner
            .stopped
            .read()
            .unwrap_or_else(PoisonError::into_inner)
    }
}

impl SpanExporter for SpanAccumulator {
    fn export(&self, batch: Vec<SpanData>) -> impl Future<Output = OTelSdkResult> + Send {
        let result = self.export_spans(&batch).map_err(|e| {
            error!("{e}");
            OTelSdkError::InternalFailure(e.to_string())
        });
        ready(result)
    }
}

/// Prints every span as one JSON line
pub struct StdoutExporter {
    writer: Mutex<Box<dyn Write + Send>>,
}

impl StdoutExporter {
    pub fn new() -> Self {
        Self::with_writer(io::stdout())
    }

    pub fn with_writer(writer: impl Write + Send + 'static) -> Self {
        Self {
            writer: Mutex::new(Box::new(writer)),
        }
    }

    fn print(&self, spans: &[SpanData]) -> Result<(), ExportError> {
        let mut writer = self.writer.lock().unwrap_or_else(PoisonError::into_inner);
        for span in spans {
            writeln!(writer, "{}", span_json(span))?;
        }
        writer.flush()?;
        Ok(())
    }
}

impl Default for StdoutExporter {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for StdoutExporter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StdoutExporter").finish_non_exhaustive()
    }
}

impl SpanExporter for StdoutExporter {
    fn export(&self, batch: Vec<SpanData>) -> impl Future<Output = OTelSdkResult> + Send {
        let result = self
            .print(&batch)
            .map_err(|e| OTelSdkError::InternalFailure(e.to_string()));
        ready(result)
    }
}

fn span_json(span: &SpanData) -> Value {
    let attributes: Map<String, Value> = span
        .attributes
        .iter()
        .map(|kv| (kv.key.as_str().to_string(), json!(kv.value.to_string())))
        .collect();
    json!({
        "name": span.name,
        "kind": format!("{:?}", span.span_kind),
        "trace_id": span.span_context.trace_id().to_string(),
        "span_id": span.span_context.span_id().to_string(),
        "parent_span_id": span.parent_span_id.to_string(),
        "start_time": epoch_millis(span.start_time),
        "end_time": epoch_millis(span.end_time),
        "status": format!("{:?}", span.status),
        "attributes": attributes,
    })
}
