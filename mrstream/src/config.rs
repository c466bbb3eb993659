use std::{env, str::FromStr};

use crate::error::{EngineError, Result};

const DEFAULT_WRITE_BUFFER_BYTES: usize = 8 * 1024;
const DEFAULT_READ_BUFFER_BYTES: usize = 8 * 1024;

/// Qué hacer cuando el código del usuario (mapper/reducer) devuelve error.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum FailurePolicy {
    /// Corta la fase y propaga el error.
    #[default]
    Abort,
    /// Loguea, descarta lo emitido en esa llamada y sigue.
    Skip,
}

impl FromStr for FailurePolicy {
    type Err = EngineError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "abort" => Ok(FailurePolicy::Abort),
            "skip" => Ok(FailurePolicy::Skip),
            other => Err(EngineError::Config(format!(
                "política de fallos desconocida: {other:?} (usar abort o skip)"
            ))),
        }
    }
}

#[derive(Debug, Clone)]
pub struct EngineConfig {
    pub failure_policy: FailurePolicy,
    pub write_buffer_bytes: usize,
    pub read_buffer_bytes: usize,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            failure_policy: FailurePolicy::Abort,
            write_buffer_bytes: DEFAULT_WRITE_BUFFER_BYTES,
            read_buffer_bytes: DEFAULT_READ_BUFFER_BYTES,
        }
    }
}

/// Lee un tamaño de buffer de una env var; si no está o no parsea, usa el default.
fn buffer_bytes(var: &str, default: usize) -> usize {
    env::var(var)
        .ok()
        .and_then(|s| s.parse::<usize>().ok())
        .filter(|n| *n > 0)
        .unwrap_or(default)
}

impl EngineConfig {
    /// Configuración desde variables de entorno:
    /// - MRSTREAM_FAILURE_POLICY (abort | skip)
    /// - MRSTREAM_WRITE_BUFFER_BYTES
    /// - MRSTREAM_READ_BUFFER_BYTES
    pub fn from_env() -> Result<Self> {
        let failure_policy = match env::var("MRSTREAM_FAILURE_POLICY") {
            Ok(s) => s.parse()?,
            Err(_) => FailurePolicy::default(),
        };

        Ok(Self {
            failure_policy,
            write_buffer_bytes: buffer_bytes(
                "MRSTREAM_WRITE_BUFFER_BYTES",
                DEFAULT_WRITE_BUFFER_BYTES,
            ),
            read_buffer_bytes: buffer_bytes(
                "MRSTREAM_READ_BUFFER_BYTES",
                DEFAULT_READ_BUFFER_BYTES,
            ),
        })
    }

    pub fn with_failure_policy(mut self, policy: FailurePolicy) -> Self {
        self.failure_policy = policy;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn failure_policy_parsea_sin_importar_mayusculas() {
        assert_eq!("abort".parse::<FailurePolicy>().unwrap(), FailurePolicy::Abort);
        assert_eq!(" SKIP ".parse::<FailurePolicy>().unwrap(), FailurePolicy::Skip);
        assert!(matches!(
            "retry".parse::<FailurePolicy>(),
            Err(EngineError::Config(_))
        ));
    }

    #[test]
    fn buffer_bytes_respeta_env_var_y_cae_al_default() {
        std::env::set_var("MRSTREAM_TEST_BUFFER_OK", "1234");
        std::env::set_var("MRSTREAM_TEST_BUFFER_BAD", "mucho");
        std::env::set_var("MRSTREAM_TEST_BUFFER_ZERO", "0");

        assert_eq!(buffer_bytes("MRSTREAM_TEST_BUFFER_OK", 10), 1234);
        assert_eq!(buffer_bytes("MRSTREAM_TEST_BUFFER_BAD", 10), 10);
        assert_eq!(buffer_bytes("MRSTREAM_TEST_BUFFER_ZERO", 10), 10);
        assert_eq!(buffer_bytes("MRSTREAM_TEST_BUFFER_NO_EXISTE", 10), 10);
    }

    #[test]
    fn default_aborta_ante_fallos() {
        let cfg = EngineConfig::default();
        assert_eq!(cfg.failure_policy, FailurePolicy::Abort);
        assert_eq!(cfg.write_buffer_bytes, DEFAULT_WRITE_BUFFER_BYTES);

        let cfg = cfg.with_failure_policy(FailurePolicy::Skip);
        assert_eq!(cfg.failure_policy, FailurePolicy::Skip);
    }
}
