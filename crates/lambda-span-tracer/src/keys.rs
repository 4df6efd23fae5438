// Copyright 2025-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Attribute keys shared by the instrumentation and the span transformer.

pub const EVENT: &str = "event";
pub const RESPONSE: &str = "response";

pub const HAS_ERROR: &str = "has_error";
pub const ERROR_TYPE: &str = "error_type";
pub const ERROR_MESSAGE: &str = "error_message";
pub const ERROR_STACKTRACE: &str = "error_stacktrace";

pub const EXCEPTION_MESSAGE: &str = "exception.message";

pub const HTTP_METHOD: &str = "http.method";
pub const HTTP_URL: &str = "http.url";
pub const HTTP_SCHEME: &str = "http.scheme";
pub const HTTP_HOST: &str = "http.host";
pub const HTTP_TARGET: &str = "http.target";
pub const HTTP_STATUS_CODE: &str = "http.status_code";
pub const HTTP_REQUEST_BODY: &str = "http.request_body";
pub const HTTP_REQUEST_HEADERS: &str = "http.request_headers";
pub const HTTP_RESPONSE_BODY: &str = "http.response_body";
pub const HTTP_RESPONSE_HEADERS: &str = "http.response_headers";
