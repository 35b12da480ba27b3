//! Scripted probe
//!
//! Returns queued samples (or failures) in order, then repeats a fallback
//! sample. Used by tests and by hosts that already know their numbers and
//! want to feed them through a regular monitor.

use super::ResourceProbe;
use crate::models::{ResourceType, ResourceUsage};
use anyhow::Result;
use async_trait::async_trait;
use chrono::Utc;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;

#[derive(Debug, Default)]
struct MockState {
    queued: VecDeque<std::result::Result<ResourceUsage, String>>,
    fallback: ResourceUsage,
    init_failure: Option<String>,
}

/// Probe returning scripted samples
pub struct MockProbe {
    name: String,
    types: Vec<ResourceType>,
    state: Mutex<MockState>,
    samples_taken: AtomicUsize,
}

impl MockProbe {
    pub fn new(name: impl Into<String>, types: &[ResourceType]) -> Self {
        Self {
            name: name.into(),
            types: types.to_vec(),
            state: Mutex::new(MockState::default()),
            samples_taken: AtomicUsize::new(0),
        }
    }

    /// Sample returned whenever the queue is empty
    pub fn with_usage(self, usage: ResourceUsage) -> Self {
        self.set_usage(usage);
        self
    }

    /// Make `initialize()` fail with the given reason
    pub fn failing_initialize(self, reason: impl Into<String>) -> Self {
        self.state.lock().unwrap_or_else(|e| e.into_inner()).init_failure = Some(reason.into());
        self
    }

    pub fn set_usage(&self, usage: ResourceUsage) {
        self.state.lock().unwrap_or_else(|e| e.into_inner()).fallback = usage;
    }

    /// Queue a one-shot sample
    pub fn push_sample(&self, usage: ResourceUsage) {
        self.state
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .queued
            .push_back(Ok(usage));
    }

    /// Queue a one-shot sampling failure
    pub fn push_failure(&self, message: impl Into<String>) {
        self.state
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .queued
            .push_back(Err(message.into()));
    }

    pub fn samples_taken(&self) -> usize {
        self.samples_taken.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl ResourceProbe for MockProbe {
    fn name(&self) -> &str {
        &self.name
    }

    fn supported_types(&self) -> &[ResourceType] {
        &self.types
    }

    async fn initialize(&self) -> Result<()> {
        let state = self.state.lock().unwrap_or_else(|e| e.into_inner());
        match &state.init_failure {
            Some(reason) => anyhow::bail!("{}", reason),
            None => Ok(()),
        }
    }

    async fn sample(&self) -> Result<ResourceUsage> {
        self.samples_taken.fetch_add(1, Ordering::SeqCst);

        let next = {
            let mut state = self.state.lock().unwrap_or_else(|e| e.into_inner());
            state
                .queued
                .pop_front()
                .unwrap_or_else(|| Ok(state.fallback.clone()))
        };

        match next {
            Ok(mut usage) => {
                usage.timestamp = Utc::now();
                Ok(usage)
            }
            Err(message) => anyhow::bail!("{}", message),
        }
    }
}
