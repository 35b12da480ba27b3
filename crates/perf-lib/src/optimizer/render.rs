//! Render quality optimization
//!
//! The presentation layer calls [`RenderOptimizer::record_frame`] for every
//! presented frame; a once-per-second sampler turns the count into a frame
//! rate. Optimization rewrites [`RenderSettings`], which the presentation
//! layer reads back through [`RenderOptimizer::settings`].
//!
//! Once frames are being recorded, every sample is also handed to the frame
//! rate sink, which the engine points at the collector's video group.

use super::{
    Evaluation, MetricSnapshot, OptimizationContext, OptimizationRoutine, Parameters,
    RoutineOutcome,
};
use crate::models::{OptimizationStrategy, PerformanceMetrics};
use anyhow::Result;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::time::Instant;
use tracing::debug;

const FRAME_SAMPLE_INTERVAL: Duration = Duration::from_secs(1);

/// Quality ceiling when rendering without hardware acceleration
const SOFTWARE_QUALITY_CAP: u8 = 60;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RenderStrategy {
    PowerSaving,
    Balanced,
    HighQuality,
}

impl From<OptimizationStrategy> for RenderStrategy {
    fn from(strategy: OptimizationStrategy) -> Self {
        match strategy {
            OptimizationStrategy::Aggressive => RenderStrategy::PowerSaving,
            OptimizationStrategy::Balanced => RenderStrategy::Balanced,
            OptimizationStrategy::Conservative => RenderStrategy::HighQuality,
        }
    }
}

impl RenderStrategy {
    pub fn as_str(&self) -> &'static str {
        match self {
            RenderStrategy::PowerSaving => "PowerSaving",
            RenderStrategy::Balanced => "Balanced",
            RenderStrategy::HighQuality => "HighQuality",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TextureQuality {
    Low,
    Medium,
    High,
}

/// Settings the presentation layer renders with
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RenderSettings {
    /// 0-100
    pub quality: u8,
    /// 1-240
    pub target_fps: u32,
    pub effects_enabled: bool,
    pub hardware_acceleration: bool,
    pub texture_quality: TextureQuality,
    pub vsync: bool,
}

impl Default for RenderSettings {
    fn default() -> Self {
        Self {
            quality: 75,
            target_fps: 60,
            effects_enabled: true,
            hardware_acceleration: false,
            texture_quality: TextureQuality::Medium,
            vsync: true,
        }
    }
}

impl RenderSettings {
    pub fn validate(&self) -> Result<()> {
        anyhow::ensure!(self.quality <= 100, "quality must be 0-100, got {}", self.quality);
        anyhow::ensure!(
            (1..=240).contains(&self.target_fps),
            "target fps must be 1-240, got {}",
            self.target_fps
        );
        Ok(())
    }
}

/// GPU description supplied by the host
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct GpuInfo {
    pub name: String,
    pub vendor: String,
    pub memory_mb: u64,
    pub supports_hardware_acceleration: bool,
}

/// Receives every sampled frame rate
pub type FrameRateSink = Arc<dyn Fn(f64) + Send + Sync>;

struct RenderState {
    settings: RenderSettings,
    sink: Option<FrameRateSink>,
    gpu: Option<GpuInfo>,
    mode: Option<RenderStrategy>,
    last_sample: Instant,
}

pub struct RenderOptimizer {
    frames: AtomicU64,
    /// f64 bits of the last sampled frame rate
    fps_bits: AtomicU64,
    /// Set by the first recorded frame
    presenting: AtomicBool,
    state: Mutex<RenderState>,
}

impl Default for RenderOptimizer {
    fn default() -> Self {
        Self::new(RenderSettings::default())
    }
}

impl RenderOptimizer {
    pub fn new(settings: RenderSettings) -> Self {
        Self {
            frames: AtomicU64::new(0),
            fps_bits: AtomicU64::new(0f64.to_bits()),
            presenting: AtomicBool::new(false),
            state: Mutex::new(RenderState {
                settings,
                sink: None,
                gpu: None,
                mode: None,
                last_sample: Instant::now(),
            }),
        }
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, RenderState> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    pub fn settings(&self) -> RenderSettings {
        self.lock().settings.clone()
    }

    pub fn set_settings(&self, settings: RenderSettings) -> Result<()> {
        settings.validate()?;
        self.lock().settings = settings;
        Ok(())
    }

    pub fn set_gpu_info(&self, gpu: GpuInfo) {
        self.lock().gpu = Some(gpu);
    }

    pub fn gpu_info(&self) -> Option<GpuInfo> {
        self.lock().gpu.clone()
    }

    /// Count one presented frame
    pub fn record_frame(&self) {
        self.presenting.store(true, Ordering::Relaxed);
        self.frames.fetch_add(1, Ordering::Relaxed);
    }

    /// Whether the presentation layer has recorded any frame
    pub fn is_presenting(&self) -> bool {
        self.presenting.load(Ordering::Relaxed)
    }

    /// Forward sampled frame rates, zero included, once frames are recorded
    pub fn set_frame_rate_sink(&self, sink: impl Fn(f64) + Send + Sync + 'static) {
        self.lock().sink = Some(Arc::new(sink));
    }

    /// Last sampled frame rate, zero before the first sample
    pub fn current_fps(&self) -> f64 {
        f64::from_bits(self.fps_bits.load(Ordering::Relaxed))
    }

    /// Turn the frames counted since the previous sample into a rate
    pub fn sample_frame_rate(&self) -> f64 {
        let now = Instant::now();
        let (elapsed, sink) = {
            let mut state = self.lock();
            let elapsed = now.duration_since(state.last_sample);
            state.last_sample = now;
            (elapsed, state.sink.clone())
        };

        let frames = self.frames.swap(0, Ordering::Relaxed);
        let secs = elapsed.as_secs_f64();
        let fps = if secs > 0.0 { frames as f64 / secs } else { 0.0 };
        self.fps_bits.store(fps.to_bits(), Ordering::Relaxed);

        if let Some(sink) = sink.filter(|_| self.is_presenting()) {
            sink(fps);
        }
        fps
    }

    fn hardware_available(&self) -> bool {
        self.lock()
            .gpu
            .as_ref()
            .map(|g| g.supports_hardware_acceleration)
            .unwrap_or(false)
    }
}

#[async_trait]
impl OptimizationRoutine for RenderOptimizer {
    fn kind(&self) -> &'static str {
        "render"
    }

    fn default_parameters(&self) -> Parameters {
        Parameters::from([("allow_hardware_acceleration".to_string(), json!(true))])
    }

    fn validate_parameters(&self, parameters: &Parameters) -> Result<()> {
        if let Some(flag) = parameters.get("allow_hardware_acceleration") {
            anyhow::ensure!(flag.is_boolean(), "allow_hardware_acceleration must be a boolean");
        }
        Ok(())
    }

    async fn initialize(&self) -> Result<()> {
        self.lock().settings.validate()
    }

    fn should_optimize(&self) -> bool {
        let fps = self.current_fps();
        let state = self.lock();
        let target = state.settings.target_fps as f64;

        // No frames yet means nothing to judge
        let too_slow = fps > 0.0 && fps < target * 0.8;
        let underused_gpu = state.settings.hardware_acceleration && state.settings.quality < 80;
        let overpowered = state.mode == Some(RenderStrategy::PowerSaving) && fps > target * 1.5;

        too_slow || underused_gpu || overpowered
    }

    fn suggestions(&self) -> Vec<String> {
        let fps = self.current_fps();
        let settings = self.settings();
        let mut suggestions = Vec::new();

        if fps > 0.0 && fps < settings.target_fps as f64 * 0.8 {
            suggestions.push(format!(
                "Frame rate {:.1} fps is below 80% of the {} fps target; lower quality or disable effects",
                fps, settings.target_fps
            ));
        }
        if !settings.hardware_acceleration && self.hardware_available() {
            suggestions.push("Enable hardware acceleration; the GPU supports it".to_string());
        }
        if settings.hardware_acceleration && settings.quality < 80 {
            suggestions.push(format!(
                "Quality {} is low for a hardware-accelerated pipeline",
                settings.quality
            ));
        }
        if suggestions.is_empty() {
            suggestions.push("Render settings match current performance".to_string());
        }
        suggestions
    }

    fn estimate(&self, strategy: OptimizationStrategy) -> BTreeMap<String, f64> {
        let (mut performance, cpu) = match RenderStrategy::from(strategy) {
            RenderStrategy::PowerSaving => (10.0, 15.0),
            RenderStrategy::Balanced => (15.0, 10.0),
            RenderStrategy::HighQuality => (20.0, 5.0),
        };

        let fps = self.current_fps();
        let target = self.settings().target_fps as f64;
        if fps > 0.0 && fps < target * 0.5 {
            performance += 20.0;
        }

        BTreeMap::from([
            ("performance".to_string(), performance),
            ("cpu_reduction".to_string(), cpu),
        ])
    }

    fn mode_name(&self, strategy: OptimizationStrategy) -> &'static str {
        RenderStrategy::from(strategy).as_str()
    }

    /// Frame rate pushed by the media layer counts when nothing is presented here
    fn observe(&self, metrics: &PerformanceMetrics) {
        if !self.is_presenting() && metrics.video.frame_rate > 0.0 {
            self.fps_bits
                .store(metrics.video.frame_rate.to_bits(), Ordering::Relaxed);
        }
    }

    fn sampling_interval(&self) -> Option<Duration> {
        Some(FRAME_SAMPLE_INTERVAL)
    }

    async fn sample(&self) {
        let fps = self.sample_frame_rate();
        debug!(fps = fps, "Frame rate sampled");
    }

    async fn capture_metrics(&self) -> MetricSnapshot {
        let fps = self.current_fps();
        let settings = self.settings();
        MetricSnapshot::from([
            ("fps".to_string(), json!(fps)),
            ("quality".to_string(), json!(settings.quality)),
            ("target_fps".to_string(), json!(settings.target_fps)),
            ("effects_enabled".to_string(), json!(settings.effects_enabled)),
            (
                "hardware_acceleration".to_string(),
                json!(settings.hardware_acceleration),
            ),
        ])
    }

    async fn run(
        &self,
        strategy: OptimizationStrategy,
        ctx: &OptimizationContext<'_>,
    ) -> Result<RoutineOutcome> {
        let mode = RenderStrategy::from(strategy);
        let allow_hw = ctx
            .parameters()
            .get("allow_hardware_acceleration")
            .and_then(|v| v.as_bool())
            .unwrap_or(true);
        let hw_available = allow_hw && self.hardware_available();
        let mut outcome = RoutineOutcome::default();
        let mut settings = self.settings();

        ctx.progress(30, "Adjusting quality and frame rate target");
        match mode {
            RenderStrategy::PowerSaving => {
                settings.quality = 50;
                settings.target_fps = 30;
                settings.effects_enabled = false;
                settings.texture_quality = TextureQuality::Low;
                outcome.actions.push("disabled non-essential effects".to_string());
            }
            RenderStrategy::Balanced => {
                settings.quality = 75;
                settings.target_fps = 60;
                settings.texture_quality = TextureQuality::Medium;
                settings.vsync = true;
                settings.hardware_acceleration = hw_available;
                outcome.actions.push("tuned GPU settings".to_string());
                outcome.actions.push("selected codec settings for 60 fps".to_string());
            }
            RenderStrategy::HighQuality => {
                settings.quality = 100;
                settings.target_fps = 120;
                settings.effects_enabled = true;
                settings.texture_quality = TextureQuality::High;
                settings.hardware_acceleration = hw_available;
                outcome.actions.push("upgraded textures and effects".to_string());
            }
        }

        if ctx.is_cancelled() {
            return Ok(outcome);
        }

        ctx.progress(60, "Checking hardware acceleration");
        if mode != RenderStrategy::PowerSaving && !hw_available {
            outcome
                .warnings
                .push("hardware acceleration unavailable".to_string());
        }
        if !settings.hardware_acceleration && settings.quality > SOFTWARE_QUALITY_CAP {
            outcome.warnings.push(format!(
                "quality capped at {} without hardware acceleration",
                SOFTWARE_QUALITY_CAP
            ));
            settings.quality = SOFTWARE_QUALITY_CAP;
        }
        if settings.hardware_acceleration {
            outcome.actions.push("enabled hardware acceleration".to_string());
        }

        outcome.actions.insert(
            0,
            format!("quality {} at {} fps", settings.quality, settings.target_fps),
        );
        outcome
            .details
            .insert("quality".to_string(), settings.quality as f64);
        outcome
            .details
            .insert("target_fps".to_string(), settings.target_fps as f64);

        {
            let mut state = self.lock();
            state.settings = settings;
            state.mode = Some(mode);
        }
        ctx.progress(90, "Render settings applied");
        Ok(outcome)
    }

    fn evaluate(
        &self,
        before: &MetricSnapshot,
        after: &MetricSnapshot,
        _outcome: &RoutineOutcome,
    ) -> Evaluation {
        let value = |snapshot: &MetricSnapshot, key: &str| {
            snapshot.get(key).and_then(|v| v.as_f64()).unwrap_or(0.0)
        };

        let fps = value(before, "fps");
        let old_target = value(before, "target_fps");
        let new_target = value(after, "target_fps");

        // Headroom gained: how much closer the measured rate is to the new target
        let improvement = if fps > 0.0 && old_target > 0.0 && new_target > 0.0 {
            let before_ratio = (fps / old_target).min(1.0);
            let after_ratio = (fps / new_target).min(1.0);
            ((after_ratio - before_ratio) * 100.0).max(0.0)
        } else {
            0.0
        };

        let mut improvements = BTreeMap::new();
        improvements.insert(
            "quality_delta".to_string(),
            value(after, "quality") - value(before, "quality"),
        );
        improvements.insert("target_fps_delta".to_string(), new_target - old_target);
        improvements.insert("fps_headroom".to_string(), improvement);

        Evaluation {
            improvements,
            improvement_percentage: improvement,
        }
    }
}
