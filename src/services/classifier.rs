use crate::config::SwallowConfig;
use crate::error::{Result, SwallowError};
use crate::events::WindowHandle;
use anyhow::Context;
use regex::{RegexSet, RegexSetBuilder};

/// Скомпилированные правила поглощения.
///
/// Строится один раз из `[swallow]` секции конфигурации; паттерны
/// сопоставляются без учёта регистра.
#[derive(Debug, Clone)]
pub struct SwallowRules {
    pub enabled: bool,
    terminals: RegexSet,
    exceptions: RegexSet,
}

impl SwallowRules {
    pub fn compile(config: &SwallowConfig) -> Result<Self> {
        Ok(Self {
            enabled: config.enabled,
            terminals: build_set(&config.terminal_class_patterns)
                .context("terminal_class_patterns")
                .map_err(SwallowError::Config)?,
            exceptions: build_set(&config.exception_patterns)
                .context("exception_patterns")
                .map_err(SwallowError::Config)?,
        })
    }

    /// Копия правил с переопределённым флагом (используется для `toggle`)
    pub fn with_enabled(&self, enabled: bool) -> Self {
        Self {
            enabled,
            terminals: self.terminals.clone(),
            exceptions: self.exceptions.clone(),
        }
    }

    pub fn is_terminal(&self, window: &WindowHandle) -> bool {
        self.terminals.is_match(&window.class)
    }

    pub fn is_exception(&self, window: &WindowHandle) -> bool {
        self.exceptions.is_match(&window.class) || self.exceptions.is_match(&window.title)
    }
}

fn build_set(patterns: &[String]) -> std::result::Result<RegexSet, regex::Error> {
    RegexSetBuilder::new(patterns).case_insensitive(true).build()
}

/// Решает, должен ли `child` поглотить `parent`. Чистая функция без I/O.
pub fn should_swallow(parent: &WindowHandle, child: &WindowHandle, rules: &SwallowRules) -> bool {
    if !rules.enabled {
        return false;
    }

    if !rules.is_terminal(parent) {
        return false;
    }

    !rules.is_exception(child)
}
