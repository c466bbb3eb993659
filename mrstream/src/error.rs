use std::io;
use thiserror::Error;

/// Línea de entrada que no se puede convertir en un Pair.
/// Siempre lleva la línea original para poder diagnosticar.
#[derive(Debug, Error)]
pub enum DecodeError {
    #[error("línea sin separador TAB: {line:?}")]
    MissingSeparator { line: String },

    #[error("clave inválida en la línea {line:?}")]
    InvalidKey {
        line: String,
        #[source]
        source: serde_json::Error,
    },

    #[error("valor inválido en la línea {line:?}")]
    InvalidValue {
        line: String,
        #[source]
        source: serde_json::Error,
    },

    /// `line` es la versión con U+FFFD de los bytes originales.
    #[error("línea que no es UTF-8 válido: {line:?}")]
    InvalidUtf8 {
        line: String,
        #[source]
        source: std::str::Utf8Error,
    },
}

impl DecodeError {
    pub fn line(&self) -> &str {
        match self {
            DecodeError::MissingSeparator { line }
            | DecodeError::InvalidKey { line, .. }
            | DecodeError::InvalidValue { line, .. }
            | DecodeError::InvalidUtf8 { line, .. } => line,
        }
    }
}

/// Pair que no se puede escribir en el formato de cable.
#[derive(Debug, Error)]
pub enum EncodeError {
    #[error("clave no representable")]
    Key(#[source] serde_json::Error),

    #[error("valor no representable")]
    Value(#[source] serde_json::Error),
}

#[derive(Debug, Error)]
pub enum EngineError {
    #[error(transparent)]
    Decode(#[from] DecodeError),

    #[error(transparent)]
    Encode(#[from] EncodeError),

    #[error("error de E/S: {0}")]
    Io(#[from] io::Error),

    #[error("el mapper falló procesando la línea {line:?}")]
    Mapper {
        line: String,
        #[source]
        source: anyhow::Error,
    },

    #[error("el reducer falló procesando la clave {key}")]
    Reducer {
        key: String,
        #[source]
        source: anyhow::Error,
    },

    #[error("una tarea del pipeline terminó con error: {0}")]
    Task(#[from] tokio::task::JoinError),

    #[error("el step no tiene {phase}")]
    MissingPhase { phase: &'static str },

    #[error("step {index} fuera de rango (el job tiene {len} steps)")]
    StepOutOfRange { index: usize, len: usize },

    #[error("configuración inválida: {0}")]
    Config(String),
}

pub type Result<T> = std::result::Result<T, EngineError>;
