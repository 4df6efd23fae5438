// Copyright 2025-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

use std::time::{SystemTime, UNIX_EPOCH};

/// Cuts `value` to at most `max` bytes. The cut backs off to the previous UTF-8 character
/// boundary so the result stays a valid string; it never grows the input.
pub fn truncate(value: &str, max: usize) -> &str {
    if value.len() <= max {
        return value;
    }
    let mut end = max;
    while !value.is_char_boundary(end) {
        end -= 1;
    }
    &value[..end]
}

pub fn truncate_owned(mut value: String, max: usize) -> String {
    let len = truncate(&value, max).len();
    value.truncate(len);
    value
}

/// Milliseconds since the unix epoch, 0 for times before it
pub fn epoch_millis(time: SystemTime) -> i64 {
    time.duration_since(UNIX_EPOCH)
        .map(|elapsed| i64::try_from(elapsed.as_millis()).unwrap_or(i64::MAX))
        .unwrap_or(0)
}
