// Copyright 2025-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, OnceLock};

use uuid::Uuid;

use crate::vendor_span::Readiness;

/// State that lives as long as the process: the cold start latch and the container id.
#[derive(Debug)]
pub struct ProcessState {
    warm: AtomicBool,
    container_id: String,
}

static GLOBAL: OnceLock<Arc<ProcessState>> = OnceLock::new();

impl ProcessState {
    pub fn new() -> Self {
        Self {
            warm: AtomicBool::new(false),
            container_id: Uuid::new_v4().to_string(),
        }
    }

    pub fn global() -> Arc<ProcessState> {
        GLOBAL.get_or_init(|| Arc::new(ProcessState::new())).clone()
    }

    pub fn container_id(&self) -> &str {
        &self.container_id
    }

    /// Readiness of the invocation starting now. The first invocation of the process is cold
    /// unless it runs during a provisioned concurrency initialization.
    pub fn observe_invocation(&self, pre_warmed: bool) -> Readiness {
        let was_warm = self.warm.swap(true, Ordering::SeqCst);
        if was_warm || pre_warmed {
            Readiness::Warm
        } else {
            Readiness::Cold
        }
    }
}

impl Default for ProcessState {
    fn default() -> Self {
        Self::new()
    }
}
