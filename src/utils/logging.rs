//! Logging Module
//!
//! Structured logging built on `tracing`, plus a small epoch logger used by
//! the trainer so every run reports progress the same way.

use std::time::Instant;

use tracing_subscriber::{EnvFilter, FmtSubscriber};

/// Logging configuration
#[derive(Debug, Clone)]
pub struct LogConfig {
    /// Minimum log level to display
    pub level: LogLevel,
    /// Whether to include target (module path)
    pub include_target: bool,
    /// Whether to include thread IDs
    pub include_thread_ids: bool,
    /// Whether to use ANSI colors
    pub ansi_colors: bool,
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            level: LogLevel::Info,
            include_target: false,
            include_thread_ids: false,
            ansi_colors: true,
        }
    }
}

impl LogConfig {
    /// Verbose logging for debugging
    pub fn verbose() -> Self {
        Self {
            level: LogLevel::Debug,
            include_target: true,
            include_thread_ids: true,
            ansi_colors: true,
        }
    }

    /// Production logging: info level, no colors
    pub fn production() -> Self {
        Self {
            level: LogLevel::Info,
            include_target: false,
            include_thread_ids: false,
            ansi_colors: false,
        }
    }
}

/// Log level enum
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogLevel {
    Trace,
    Debug,
    Info,
    Warn,
    Error,
}

impl LogLevel {
    pub fn as_str(&self) -> &'static str {
        match self {
            LogLevel::Trace => "trace",
            LogLevel::Debug => "debug",
            LogLevel::Info => "info",
            LogLevel::Warn => "warn",
            LogLevel::Error => "error",
        }
    }

    /// Parse a level name, falling back to `Info`
    pub fn parse(s: &str) -> Self {
        match s.to_lowercase().as_str() {
            "trace" => LogLevel::Trace,
            "debug" => LogLevel::Debug,
            "info" => LogLevel::Info,
            "warn" | "warning" => LogLevel::Warn,
            "error" => LogLevel::Error,
            _ => LogLevel::Info,
        }
    }
}

impl LogConfig {
    /// Filter directive for the subscriber; a non-empty `RUST_LOG` value wins
    /// over the configured level.
    pub fn filter_directive(&self, rust_log: Option<&str>) -> String {
        match rust_log.map(str::trim) {
            Some(directive) if !directive.is_empty() => directive.to_string(),
            _ => self.level.as_str().to_string(),
        }
    }
}

/// Initialize the global subscriber with the given configuration
pub fn init_logging(config: &LogConfig) -> Result<(), String> {
    let rust_log = std::env::var("RUST_LOG").ok();
    let filter = EnvFilter::try_new(config.filter_directive(rust_log.as_deref()))
        .map_err(|e| format!("Invalid log filter: {}", e))?;

    let subscriber = FmtSubscriber::builder()
        .with_env_filter(filter)
        .with_ansi(config.ansi_colors)
        .with_target(config.include_target)
        .with_thread_ids(config.include_thread_ids)
        .compact()
        .finish();

    tracing::subscriber::set_global_default(subscriber)
        .map_err(|e| format!("Failed to initialize logging: {}", e))
}

/// Epoch-level progress logger for training runs
pub struct TrainingLogger {
    epoch: usize,
    total_epochs: usize,
    epoch_start: Instant,
    training_start: Instant,
}

impl TrainingLogger {
    pub fn new(total_epochs: usize) -> Self {
        Self {
            epoch: 0,
            total_epochs,
            epoch_start: Instant::now(),
            training_start: Instant::now(),
        }
    }

    /// Log start of an epoch (0-indexed)
    pub fn start_epoch(&mut self, epoch: usize) {
        self.epoch = epoch;
        self.epoch_start = Instant::now();
        tracing::info!("Epoch {}/{} started", epoch + 1, self.total_epochs);
    }

    /// Log end of an epoch with its losses and validation F1
    pub fn end_epoch(&self, train_loss: f64, val_loss: f64, val_f1: f64) {
        let epoch_time = self.epoch_start.elapsed();
        let total_time = self.training_start.elapsed();

        let epochs_remaining = self.total_epochs.saturating_sub(self.epoch + 1);
        let avg_epoch_time = total_time.as_secs_f64() / (self.epoch + 1) as f64;
        let eta_secs = epochs_remaining as f64 * avg_epoch_time;

        tracing::info!(
            "Epoch {}/{} completed in {:.1}s | Train loss: {:.4} | Val loss: {:.4} | Val F1: {:.3} | ETA: {:.0}s",
            self.epoch + 1,
            self.total_epochs,
            epoch_time.as_secs_f64(),
            train_loss,
            val_loss,
            val_f1,
            eta_secs
        );
    }

    pub fn log_new_best(&self, previous: f64, val_loss: f64) {
        tracing::info!(
            "New best model: validation loss {:.4} -> {:.4}",
            previous,
            val_loss
        );
    }

    pub fn log_complete(&self, best_val_loss: f64) {
        tracing::info!(
            "Training complete: {} epochs in {:.1}s | Best validation loss: {:.4}",
            self.total_epochs,
            self.training_start.elapsed().as_secs_f64(),
            best_val_loss
        );
    }
}
