// Copyright 2025-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Span fixtures shared by the unit tests.

use std::future::{ready, Future};
use std::sync::{Arc, Mutex};
use std::time::SystemTime;

use opentelemetry::trace::{Span as _, SpanKind, Tracer as _, TracerProvider as _};
use opentelemetry::{KeyValue, Value};
use opentelemetry_sdk::error::OTelSdkResult;
use opentelemetry_sdk::trace::{SdkTracerProvider, SpanData, SpanExporter};

/// Keeps every exported span in memory
#[derive(Debug, Clone, Default)]
pub(crate) struct RecordingExporter(Arc<Mutex<Vec<SpanData>>>);

impl RecordingExporter {
    pub(crate) fn provider(&self) -> SdkTracerProvider {
        SdkTracerProvider::builder()
            .with_simple_exporter(self.clone())
            .build()
    }

    pub(crate) fn finished_spans(&self) -> Vec<SpanData> {
        self.0.lock().unwrap().clone()
    }
}

impl SpanExporter for RecordingExporter {
    fn export(&self, batch: Vec<SpanData>) -> impl Future<Output = OTelSdkResult> + Send {
        self.0.lock().unwrap().extend(batch);
        ready(Ok(()))
    }
}

/// Records one ended span through a throwaway SDK provider.
pub(crate) fn finished_span(
    name: &str,
    start_time: SystemTime,
    end_time: SystemTime,
    attributes: Vec<KeyValue>,
) -> SpanData {
    let exporter = RecordingExporter::default();
    let provider = exporter.provider();
    let tracer = provider.tracer("test");
    let mut span = tracer
        .span_builder(name.to_string())
        .with_kind(SpanKind::Internal)
        .with_start_time(start_time)
        .with_attributes(attributes)
        .start(&tracer);
    span.end_with_timestamp(end_time);
    let mut spans = exporter.finished_spans();
    assert_eq!(spans.len(), 1);
    spans.remove(0)
}

pub(crate) fn attribute(span: &SpanData, key: &str) -> Option<String> {
    span.attributes
        .iter()
        .rev()
        .find(|kv| kv.key.as_str() == key)
        .map(|kv| kv.value.to_string())
}

pub(crate) fn attribute_i64(span: &SpanData, key: &str) -> Option<i64> {
    span.attributes
        .iter()
        .rev()
        .find(|kv| kv.key.as_str() == key)
        .and_then(|kv| match kv.value {
            Value::I64(value) => Some(value),
            _ => None,
        })
}
