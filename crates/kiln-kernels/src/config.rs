//! Kernel compiler options.
//!
//! A `CompileConfig` is shared by every compile a manager performs and
//! rendered into NVRTC-style flags per (device, element type).

use std::collections::BTreeMap;
use std::path::Path;

use kiln_core::{ComputeCapability, DType, KilnError, Result};
use serde::{Deserialize, Serialize};

/// Environment variable toggling `--use_fast_math` (`0`/`false` disables).
pub const ENV_FAST_MATH: &str = "KILN_FAST_MATH";
/// Environment variable with extra whitespace-separated compiler options.
pub const ENV_OPTIONS: &str = "KILN_NVRTC_OPTIONS";

/// Options passed to the kernel compiler.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct CompileConfig {
    /// Pass `--use_fast_math`.
    pub fast_math: bool,
    /// Pass `-w`.
    pub disable_warnings: bool,
    /// Preprocessor definitions, rendered as `-DNAME=VALUE`.
    pub defines: BTreeMap<String, String>,
    /// Appended verbatim after everything else.
    pub extra_options: Vec<String>,
}

impl Default for CompileConfig {
    fn default() -> Self {
        Self {
            fast_math: true,
            disable_warnings: true,
            defines: BTreeMap::new(),
            extra_options: Vec::new(),
        }
    }
}

impl CompileConfig {
    /// Render the option list for compiling one instantiation.
    ///
    /// Every compile also gets `-DKILN_ELEMENT=<c type>` so templates can
    /// refer to the element type from preprocessor code.
    pub fn to_options(&self, cc: ComputeCapability, dtype: DType) -> Vec<String> {
        let mut options = Vec::with_capacity(4 + self.defines.len() + self.extra_options.len());
        options.push(format!("--gpu-architecture={}", cc.virtual_arch()));
        if self.fast_math {
            options.push("--use_fast_math".to_string());
        }
        if self.disable_warnings {
            options.push("-w".to_string());
        }
        for (name, value) in &self.defines {
            options.push(format!("-D{name}={value}"));
        }
        options.push(format!("-DKILN_ELEMENT={}", dtype.c_type()));
        options.extend(self.extra_options.iter().cloned());
        options
    }

    pub fn with_define(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.defines.insert(name.into(), value.into());
        self
    }

    pub fn with_option(mut self, option: impl Into<String>) -> Self {
        self.extra_options.push(option.into());
        self
    }

    /// Parse a JSON document; missing fields take their defaults.
    pub fn from_json_str(json: &str) -> Result<Self> {
        serde_json::from_str(json).map_err(|e| KilnError::InvalidConfig(format!("compile config: {e}")))
    }

    pub fn from_json_file(path: &Path) -> Result<Self> {
        let text = std::fs::read_to_string(path)
            .map_err(|e| KilnError::InvalidConfig(format!("reading {}: {e}", path.display())))?;
        Self::from_json_str(&text)
    }

    /// Apply `KILN_FAST_MATH` and `KILN_NVRTC_OPTIONS` from the process environment.
    pub fn with_env_overrides(self) -> Result<Self> {
        self.apply_overrides(|key| std::env::var(key).ok())
    }

    /// Apply overrides from an arbitrary variable lookup.
    pub fn apply_overrides(mut self, lookup: impl Fn(&str) -> Option<String>) -> Result<Self> {
        if let Some(raw) = lookup(ENV_FAST_MATH) {
            self.fast_math = parse_flag(&raw).ok_or_else(|| {
                KilnError::InvalidConfig(format!("{ENV_FAST_MATH}: expected a boolean, got '{raw}'"))
            })?;
        }
        if let Some(raw) = lookup(ENV_OPTIONS) {
            self.extra_options.extend(raw.split_whitespace().map(str::to_string));
        }
        Ok(self)
    }
}

fn parse_flag(raw: &str) -> Option<bool> {
    match raw.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Some(true),
        "0" | "false" | "no" | "off" => Some(false),
        _ => None,
    }
}
