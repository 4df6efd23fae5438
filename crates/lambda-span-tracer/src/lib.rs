// Copyright 2025-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Invocation tracer for serverless functions.
//!
//! [`wrap_handler`] traces every invocation of a handler: a start record is spooled as soon as
//! the invocation begins, outgoing HTTP exchanges made through an [`InterceptLayer`] client are
//! recorded as child spans, and an end record carrying the result is spooled with them when the
//! handler returns. A shipping agent running next to the function picks the files up.

#![cfg_attr(not(test), deny(clippy::panic))]
#![cfg_attr(not(test), deny(clippy::unwrap_used))]
#![cfg_attr(not(test), deny(clippy::expect_used))]
#![cfg_attr(not(test), deny(clippy::todo))]
#![cfg_attr(not(test), deny(clippy::unimplemented))]

pub mod config;
pub mod environment;
pub mod error;
pub mod exporter;
pub mod interceptor;
pub mod keys;
pub mod logger;
pub mod readiness;
pub mod replay;
pub mod spool;
pub mod transform;
#[cfg(test)]
mod testing;
mod util;
pub mod vendor_span;
pub mod wrapper;

pub use config::Config;
pub use environment::{InvocationContext, LambdaEnvironment};
pub use error::{ConfigError, ExportError, SpoolError, TracerError};
pub use exporter::{SpanAccumulator, StdoutExporter};
pub use interceptor::{InterceptLayer, InterceptService, TracedBody};
pub use replay::ReplayBody;
pub use spool::{read_spool, SpoolContents, SpoolWriter};
pub use transform::SpanMapper;
pub use vendor_span::VendorSpan;
pub use wrapper::{wrap_handler, Handler, WrappedHandler};
