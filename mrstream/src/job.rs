use serde::{Deserialize, Serialize};
use std::{fmt, io, path::PathBuf, sync::Arc};
use tokio::{
    fs::{self, File},
    io::{AsyncBufRead, AsyncWrite, BufReader},
};
use tracing::info;

use crate::config::EngineConfig;
use crate::error::{EngineError, Result};
use crate::group::{KeyEquality, StructuralEq};
use crate::stage::{run_map_phase, run_reduce_phase, Mapper, PhaseStats, Reducer};

pub type BoxedInput = Box<dyn AsyncBufRead + Unpin + Send>;
pub type BoxedOutput = Box<dyn AsyncWrite + Unpin + Send>;

/* ---------------- puertos de E/S ---------------- */

/// De dónde lee una fase.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub enum Input {
    #[default]
    Stdin,
    File(PathBuf),
}

impl Input {
    pub async fn open(&self, buffer_bytes: usize) -> Result<BoxedInput> {
        match self {
            Input::Stdin => Ok(Box::new(BufReader::with_capacity(
                buffer_bytes,
                tokio::io::stdin(),
            ))),
            Input::File(path) => {
                let file = File::open(path).await?;
                Ok(Box::new(BufReader::with_capacity(buffer_bytes, file)))
            }
        }
    }
}

/// A dónde escribe una fase.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub enum Output {
    #[default]
    Stdout,
    File(PathBuf),
}

impl Output {
    /// Para archivos crea la carpeta de salida si hace falta.
    pub async fn open(&self) -> Result<BoxedOutput> {
        match self {
            Output::Stdout => Ok(Box::new(tokio::io::stdout())),
            Output::File(path) => {
                if let Some(parent) = path.parent() {
                    if !parent.as_os_str().is_empty() {
                        fs::create_dir_all(parent).await?;
                    }
                }
                let file = File::create(path).await?;
                Ok(Box::new(file))
            }
        }
    }
}

/// Los cuatro puertos de un step. Por defecto todo es stdin/stdout
/// (Hadoop Streaming).
#[derive(Debug, Clone, Default)]
pub struct Ports {
    pub map_input: Input,
    pub map_output: Output,
    pub reduce_input: Input,
    pub reduce_output: Output,
}

/* ---------------- descripción para el scheduler externo ---------------- */

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PhaseDescription {
    #[serde(rename = "type")]
    pub kind: String,
}

impl PhaseDescription {
    fn script() -> Self {
        Self {
            kind: "script".to_string(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StepDescription {
    /// Siempre "streaming".
    #[serde(rename = "type")]
    pub kind: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub mapper: Option<PhaseDescription>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reducer: Option<PhaseDescription>,
}

/* ---------------- steps y jobs ---------------- */

/// Un mapper, un reducer y sus puertos. Inmutable una vez armado: los
/// puertos se abren en cada invocación de fase.
#[derive(Clone)]
pub struct Step {
    mapper: Option<Arc<dyn Mapper>>,
    reducer: Option<Arc<dyn Reducer>>,
    key_eq: Arc<dyn KeyEquality>,
    ports: Ports,
    config: EngineConfig,
}

impl Default for Step {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for Step {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Step")
            .field("mapper", &self.mapper.is_some())
            .field("reducer", &self.reducer.is_some())
            .field("ports", &self.ports)
            .field("config", &self.config)
            .finish()
    }
}

impl Step {
    pub fn new() -> Self {
        Self {
            mapper: None,
            reducer: None,
            key_eq: Arc::new(StructuralEq),
            ports: Ports::default(),
            config: EngineConfig::default(),
        }
    }

    pub fn with_mapper(mut self, mapper: impl Mapper + 'static) -> Self {
        self.mapper = Some(Arc::new(mapper));
        self
    }

    pub fn with_reducer(mut self, reducer: impl Reducer + 'static) -> Self {
        self.reducer = Some(Arc::new(reducer));
        self
    }

    pub fn with_key_equality(mut self, key_eq: impl KeyEquality + 'static) -> Self {
        self.key_eq = Arc::new(key_eq);
        self
    }

    pub fn with_ports(mut self, ports: Ports) -> Self {
        self.ports = ports;
        self
    }

    pub fn with_config(mut self, config: EngineConfig) -> Self {
        self.config = config;
        self
    }

    pub fn has_mapper(&self) -> bool {
        self.mapper.is_some()
    }

    pub fn has_reducer(&self) -> bool {
        self.reducer.is_some()
    }

    pub fn ports(&self) -> &Ports {
        &self.ports
    }

    pub fn describe(&self) -> StepDescription {
        StepDescription {
            kind: "streaming".to_string(),
            mapper: self.mapper.as_ref().map(|_| PhaseDescription::script()),
            reducer: self.reducer.as_ref().map(|_| PhaseDescription::script()),
        }
    }

    /// Corre la fase Map contra map_input/map_output.
    pub async fn run_mapper(&self) -> Result<PhaseStats> {
        let mapper = self
            .mapper
            .clone()
            .ok_or(EngineError::MissingPhase { phase: "mapper" })?;

        let input = self.ports.map_input.open(self.config.read_buffer_bytes).await?;
        let output = self.ports.map_output.open().await?;
        let (stats, _sink) = run_map_phase(mapper, input, output, &self.config).await?;
        Ok(stats)
    }

    /// Corre la fase Reduce contra reduce_input/reduce_output. La entrada
    /// tiene que venir ordenada por clave.
    pub async fn run_reducer(&self) -> Result<PhaseStats> {
        let reducer = self
            .reducer
            .clone()
            .ok_or(EngineError::MissingPhase { phase: "reducer" })?;

        let input = self
            .ports
            .reduce_input
            .open(self.config.read_buffer_bytes)
            .await?;
        let output = self.ports.reduce_output.open().await?;
        let (stats, _sink) =
            run_reduce_phase(reducer, self.key_eq.clone(), input, output, &self.config).await?;
        Ok(stats)
    }
}

/// Qué pidió la capa de CLI para esta invocación.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunMode {
    Mapper { step: usize },
    Reducer { step: usize },
    Describe,
}

/// Secuencia ordenada de steps. No encadena fases: eso lo hace quien la invoca.
#[derive(Debug, Clone, Default)]
pub struct Job {
    steps: Vec<Step>,
}

impl Job {
    pub fn new(steps: Vec<Step>) -> Self {
        Self { steps }
    }

    pub fn steps(&self) -> &[Step] {
        &self.steps
    }

    pub fn step(&self, index: usize) -> Result<&Step> {
        self.steps.get(index).ok_or(EngineError::StepOutOfRange {
            index,
            len: self.steps.len(),
        })
    }

    pub fn describe(&self) -> Vec<StepDescription> {
        self.steps.iter().map(Step::describe).collect()
    }

    /// Un array JSON en una sola línea.
    pub fn write_description<W: io::Write>(&self, mut out: W) -> Result<()> {
        serde_json::to_writer(&mut out, &self.describe()).map_err(io::Error::from)?;
        out.write_all(b"\n")?;
        out.flush()?;
        Ok(())
    }

    /// Punto de entrada para la CLI. Describe no corre ninguna fase.
    pub async fn run(&self, mode: RunMode) -> Result<Option<PhaseStats>> {
        match mode {
            RunMode::Mapper { step } => {
                info!("corriendo mapper del step {}", step);
                self.step(step)?.run_mapper().await.map(Some)
            }
            RunMode::Reducer { step } => {
                info!("corriendo reducer del step {}", step);
                self.step(step)?.run_reducer().await.map(Some)
            }
            RunMode::Describe => {
                self.write_description(io::stdout().lock())?;
                Ok(None)
            }
        }
    }
}
