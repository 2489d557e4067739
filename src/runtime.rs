//! Process runtime: logging setup, the bailout hook and signal handling
//!
//! A tool builds one [`Runtime`] at startup. Fatal errors end in
//! [`Runtime::bailout`], which runs the registered cleanup action exactly
//! once, logs a single `terminating:` line and exits.

use parking_lot::Mutex;
use std::fmt::Display;
use std::fs::OpenOptions;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use crate::config::RuntimeConfig;
use crate::error::ConfigError;

type Hook = Box<dyn FnOnce() + Send>;

/// Run-once cleanup action shared with the signal handler
#[derive(Default)]
struct Bailout {
    hook: Mutex<Option<Hook>>,
    fired: AtomicBool,
}

impl Bailout {
    /// Returns false if termination is already under way.
    fn fire(&self) -> bool {
        if self.fired.swap(true, Ordering::SeqCst) {
            return false;
        }
        if let Some(hook) = self.hook.lock().take() {
            hook();
        }
        true
    }

    fn terminate(&self, status: i32, msg: &str) -> ! {
        if !self.fire() {
            std::process::exit(1);
        }
        if status == 0 {
            tracing::info!("terminating: {}", msg);
        } else {
            tracing::error!("terminating: {}", msg);
        }
        std::process::exit(status)
    }
}

/// Per-process runtime state
pub struct Runtime {
    program: String,
    config: RuntimeConfig,
    bailout: Arc<Bailout>,
}

impl Runtime {
    /// Create a runtime without touching global logging or signal state
    pub fn new(program: impl Into<String>, config: RuntimeConfig) -> Self {
        Self {
            program: program.into(),
            config,
            bailout: Arc::new(Bailout::default()),
        }
    }

    /// Create a runtime, install the tracing subscriber and signal handlers
    pub fn init(program: impl Into<String>, config: RuntimeConfig) -> Result<Self, ConfigError> {
        let runtime = Self::new(program, config);
        runtime.init_logging()?;
        runtime.install_signal_handlers();
        tracing::debug!("{} started", runtime.program);
        Ok(runtime)
    }

    fn init_logging(&self) -> Result<(), ConfigError> {
        let log = &self.config.log;

        let filter = EnvFilter::try_from_default_env()
            .unwrap_or_else(|_| EnvFilter::new(log.filter_directive()));

        let stderr_layer = (!log.background).then(|| {
            fmt::layer()
                .with_writer(std::io::stderr)
                .with_target(false)
        });

        let file_layer = match &log.file {
            Some(path) => {
                let file = OpenOptions::new()
                    .create(true)
                    .append(true)
                    .open(path)
                    .map_err(|source| ConfigError::Read {
                        path: path.display().to_string(),
                        source,
                    })?;
                Some(
                    fmt::layer()
                        .with_writer(std::sync::Mutex::new(file))
                        .with_ansi(false),
                )
            }
            None => None,
        };

        tracing_subscriber::registry()
            .with(filter)
            .with(stderr_layer)
            .with(file_layer)
            .try_init()
            .map_err(|e| ConfigError::Logging(e.to_string()))
    }

    fn install_signal_handlers(&self) {
        let bailout = self.bailout.clone();
        if let Err(e) = ctrlc::set_handler(move || bailout.terminate(1, "signal received")) {
            tracing::warn!("cannot install signal handler: {}", e);
        }
    }

    pub fn program(&self) -> &str {
        &self.program
    }

    pub fn config(&self) -> &RuntimeConfig {
        &self.config
    }

    /// Register the final cleanup action, replacing any earlier one
    pub fn set_bailout_hook(&self, hook: impl FnOnce() + Send + 'static) {
        *self.bailout.hook.lock() = Some(Box::new(hook));
    }

    /// Fatal exit with status 1
    pub fn bailout(&self, msg: impl Display) -> ! {
        self.bailout.terminate(1, &msg.to_string())
    }

    /// Normal exit with status 0, still running the bailout hook
    pub fn exit(&self, msg: impl Display) -> ! {
        self.bailout.terminate(0, &msg.to_string())
    }
}
