//! Motor MapReduce en streaming para un solo proceso (estilo Hadoop Streaming).
//!
//! - `codec`: formato de cable `<clave>\t<valor>\n` en JSON.
//! - `group`: shuffle por claves contiguas.
//! - `stage`: fases Map y Reduce con backpressure y flush garantizado.
//! - `job`: steps, jobs y puertos de E/S.

pub mod codec;
pub mod config;
pub mod error;
pub mod group;
pub mod job;
pub mod stage;
pub mod value;

/// Capacidad de todos los canales entre tareas. Tokio no tiene canales de
/// capacidad cero; con uno solo en vuelo el productor queda atado al ritmo
/// del consumidor.
pub(crate) const HANDOFF_CAPACITY: usize = 1;

pub use codec::{decode_pair, encode_pair, LineReader, PairReader, PairWriter};
pub use config::{EngineConfig, FailurePolicy};
pub use error::{DecodeError, EncodeError, EngineError, Result};
pub use group::{
    group_by, CaseInsensitiveKeys, Group, GroupingStats, KeyEquality, StructuralEq, Values,
};
pub use job::{Input, Job, Output, Ports, RunMode, Step, StepDescription};
pub use stage::{run_map_phase, run_reduce_phase, Emitter, Mapper, PhaseStats, Reducer};
pub use value::{Pair, Value};
