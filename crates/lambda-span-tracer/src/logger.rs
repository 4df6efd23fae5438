// Copyright 2025-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Log formatting for the tracer.
//!
//! Tracer logs share the function's log stream, so every line is prefixed with `#TRACER#`:
//! ```text
//! #TRACER# | WARN | Dropping span HttpSpan, 812 bytes over the remaining budget of 20 bytes
//! #TRACER# | DEBUG | invocation{request_id="6ac4cc6e"}: Wrote 1 spans to /tmp/lambda-tracer-spans/0f3a_span
//! ```

use std::fmt;

use tracing_core::{Event, Subscriber};
use tracing_subscriber::fmt::{
    format::{self, FormatEvent, FormatFields},
    FmtContext, FormattedFields,
};
use tracing_subscriber::registry::LookupSpan;
use tracing_subscriber::EnvFilter;

pub const LOG_PREFIX: &str = "#TRACER#";

#[derive(Debug, Clone, Copy)]
pub struct Formatter;

impl<S, N> FormatEvent<S, N> for Formatter
where
    S: Subscriber + for<'a> LookupSpan<'a>,
    N: for<'a> FormatFields<'a> + 'static,
{
    fn format_event(
        &self,
        ctx: &FmtContext<'_, S, N>,
        mut writer: format::Writer<'_>,
        event: &Event<'_>,
    ) -> fmt::Result {
        write!(&mut writer, "{LOG_PREFIX} | {} | ", event.metadata().level())?;

        if let Some(scope) = ctx.event_scope() {
            for span in scope.from_root() {
                write!(writer, "{}", span.name())?;
                let extensions = span.extensions();
                if let Some(fields) = extensions.get::<FormattedFields<N>>() {
                    if !fields.is_empty() {
                        write!(writer, "{{{fields}}}")?;
                    }
                }
                write!(writer, ": ")?;
            }
        }

        ctx.field_format().format_fields(writer.by_ref(), event)?;
        writeln!(writer)
    }
}

fn env_filter(debug: bool) -> EnvFilter {
    let level = if debug { "debug" } else { "error" };
    EnvFilter::new(format!("h2=off,hyper=off,{level}"))
}

/// Installs the tracer log subscriber. Does nothing when a global subscriber already exists.
pub fn init(debug: bool) {
    let installed = tracing_subscriber::fmt::Subscriber::builder()
        .with_env_filter(env_filter(debug))
        .with_ansi(false)
        .event_format(Formatter)
        .with_writer(std::io::stdout)
        .try_init();
    if installed.is_ok() {
        tracing::debug!("Logging subsystem enabled");
    }
}
