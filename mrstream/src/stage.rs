//! Etapas del pipeline (Map y Reduce).
//!
//! ```text
//! Map:    lector+mapper ──pairs──▶ escritor
//! Reduce: lector ──pairs──▶ shuffle ──grupos──▶ reducer ──pairs──▶ escritor
//! ```
//!
//! Todos los canales son de capacidad uno: el ritmo del escritor frena a los
//! de arriba. Ninguna etapa devuelve antes de que el escritor haya hecho flush.

use std::sync::Arc;

use tokio::{
    io::{AsyncBufRead, AsyncWrite},
    sync::mpsc,
};
use tracing::{debug, info, warn};

use crate::codec::{LineReader, PairReader, PairWriter};
use crate::config::{EngineConfig, FailurePolicy};
use crate::error::{EngineError, Result};
use crate::group::{group_by, Group, KeyEquality, Values};
use crate::value::{Pair, Value};
use crate::HANDOFF_CAPACITY;

/// Lógica Map del usuario: una línea cruda -> cero o más Pairs.
pub trait Mapper: Send + Sync {
    fn map(&self, line: &str, out: &mut Emitter) -> anyhow::Result<()>;
}

/// Lógica Reduce del usuario: una clave y sus valores -> cero o más Pairs.
///
/// Tiene que consumir `values` entero antes de devolver. Si no lo hace, los
/// valores restantes de esa clave se descartan.
pub trait Reducer: Send + Sync {
    fn reduce(&self, key: &Value, values: &mut Values, out: &mut Emitter) -> anyhow::Result<()>;
}

/// Junta lo que emite una llamada al mapper/reducer. El motor lo pasa al
/// escritor recién cuando la llamada terminó.
#[derive(Debug, Default)]
pub struct Emitter {
    pairs: Vec<Pair>,
}

impl Emitter {
    pub fn emit(&mut self, key: impl Into<Value>, value: impl Into<Value>) {
        self.pairs.push(Pair::new(key, value));
    }

    pub fn emit_pair(&mut self, pair: Pair) {
        self.pairs.push(pair);
    }

    pub fn len(&self) -> usize {
        self.pairs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.pairs.is_empty()
    }

    fn clear(&mut self) {
        self.pairs.clear();
    }

    fn take(&mut self) -> Vec<Pair> {
        std::mem::take(&mut self.pairs)
    }
}

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct PhaseStats {
    pub records_read: u64,
    /// Llamadas al mapper o al reducer.
    pub calls: u64,
    pub groups: u64,
    pub pairs_written: u64,
    /// Llamadas que fallaron y se saltearon (FailurePolicy::Skip).
    pub skipped: u64,
    /// Valores que un reducer dejó sin consumir.
    pub discarded: u64,
}

/// Loop escritor: drena el canal, codifica, escribe y hace flush al final.
/// Devuelve el sink para que el llamador decida qué hacer con él.
async fn write_loop<W>(mut rx: mpsc::Receiver<Pair>, mut writer: PairWriter<W>) -> Result<(u64, W)>
where
    W: AsyncWrite + Unpin,
{
    while let Some(pair) = rx.recv().await {
        if let Err(e) = writer.write(&pair).await {
            // lo que ya estaba en el buffer se escribe igual, como cuando falla el mapper
            if let Err(flush_err) = writer.flush().await {
                warn!("no se pudo hacer flush tras el error de escritura: {}", flush_err);
            }
            return Err(e);
        }
    }
    writer.flush().await?;
    Ok((writer.written(), writer.into_inner()))
}

/// Fase Map. El lector corre en la tarea que llama; el escritor en otra.
pub async fn run_map_phase<R, W>(
    mapper: Arc<dyn Mapper>,
    input: R,
    output: W,
    config: &EngineConfig,
) -> Result<(PhaseStats, W)>
where
    R: AsyncBufRead + Unpin,
    W: AsyncWrite + Unpin + Send + 'static,
{
    info!("fase map: inicio");
    let (tx, rx) = mpsc::channel(HANDOFF_CAPACITY);
    let writer = tokio::spawn(write_loop(
        rx,
        PairWriter::with_capacity(config.write_buffer_bytes, output),
    ));

    let mut stats = PhaseStats::default();
    let read_result = map_loop(
        mapper.as_ref(),
        LineReader::new(input),
        &tx,
        config.failure_policy,
        &mut stats,
    )
    .await;

    // cerrar el canal y esperar a que el escritor termine su flush
    drop(tx);
    let written = writer.await;

    read_result?;
    let (pairs_written, sink) = written??;
    stats.pairs_written = pairs_written;

    info!(
        "fase map: fin (líneas={}, pairs={}, salteadas={})",
        stats.records_read, stats.pairs_written, stats.skipped
    );
    Ok((stats, sink))
}

async fn map_loop<R>(
    mapper: &dyn Mapper,
    mut lines: LineReader<R>,
    tx: &mpsc::Sender<Pair>,
    policy: FailurePolicy,
    stats: &mut PhaseStats,
) -> Result<()>
where
    R: AsyncBufRead + Unpin,
{
    let mut emitter = Emitter::default();

    while let Some(line) = lines.read_line().await? {
        stats.records_read += 1;
        stats.calls += 1;

        if let Err(source) = mapper.map(&line, &mut emitter) {
            match policy {
                FailurePolicy::Abort => return Err(EngineError::Mapper { line, source }),
                FailurePolicy::Skip => {
                    warn!("el mapper falló con la línea {:?}: {:#}; se saltea", line, source);
                    emitter.clear();
                    stats.skipped += 1;
                    continue;
                }
            }
        }

        for pair in emitter.take() {
            if tx.send(pair).await.is_err() {
                debug!("el escritor se cerró; se deja de leer");
                return Ok(());
            }
        }
    }
    Ok(())
}

/// Fase Reduce: lector, shuffle, reducer (en un hilo bloqueante, porque
/// consume los valores a medida que llegan) y escritor.
pub async fn run_reduce_phase<R, W>(
    reducer: Arc<dyn Reducer>,
    key_eq: Arc<dyn KeyEquality>,
    input: R,
    output: W,
    config: &EngineConfig,
) -> Result<(PhaseStats, W)>
where
    R: AsyncBufRead + Unpin + Send + 'static,
    W: AsyncWrite + Unpin + Send + 'static,
{
    info!("fase reduce: inicio");
    let (pairs_tx, pairs_rx) = mpsc::channel(HANDOFF_CAPACITY);
    let (out_tx, out_rx) = mpsc::channel(HANDOFF_CAPACITY);

    let writer = tokio::spawn(write_loop(
        out_rx,
        PairWriter::with_capacity(config.write_buffer_bytes, output),
    ));
    let (groups, grouper) = group_by(pairs_rx, key_eq);
    let policy = config.failure_policy;
    let reduce = tokio::task::spawn_blocking(move || {
        reduce_loop(reducer.as_ref(), groups, out_tx, policy)
    });
    let reader = tokio::spawn(read_loop(PairReader::new(input), pairs_tx));

    // cada canal tiene un único sender y se cierra cuando su tarea termina:
    // lector -> shuffle -> reducer -> escritor
    let records_read = reader.await;
    let grouping = grouper.await;
    let reduced = reduce.await;
    let written = writer.await;

    let mut stats = reduced??;
    let (pairs_written, sink) = written??;
    let grouping = grouping?;
    stats.records_read = records_read?;
    stats.groups = grouping.groups;
    stats.discarded = grouping.discarded;
    stats.pairs_written = pairs_written;

    info!(
        "fase reduce: fin (líneas={}, grupos={}, pairs={}, salteadas={})",
        stats.records_read, stats.groups, stats.pairs_written, stats.skipped
    );
    Ok((stats, sink))
}

/// Lee y decodifica. Un error de decodificación se reenvía al shuffle y
/// corta la lectura: no hay forma de resincronizar a mitad del stream.
async fn read_loop<R>(mut reader: PairReader<R>, tx: mpsc::Sender<Result<Pair>>) -> u64
where
    R: AsyncBufRead + Unpin,
{
    loop {
        let item = match reader.read().await {
            Ok(Some(pair)) => Ok(pair),
            Ok(None) => break,
            Err(e) => Err(e),
        };
        let failed = item.is_err();
        if tx.send(item).await.is_err() {
            debug!("el shuffle se cerró; se deja de leer");
            break;
        }
        if failed {
            break;
        }
    }
    reader.lines_read()
}

/// Un reducer por vez, en el orden en que se formaron los grupos.
fn reduce_loop(
    reducer: &dyn Reducer,
    mut groups: mpsc::Receiver<Result<Group>>,
    out: mpsc::Sender<Pair>,
    policy: FailurePolicy,
) -> Result<PhaseStats> {
    let mut stats = PhaseStats::default();
    let mut emitter = Emitter::default();

    while let Some(group) = groups.blocking_recv() {
        let Group { key, mut values } = group?;
        stats.calls += 1;

        let result = reducer.reduce(&key, &mut values, &mut emitter);
        let aborted = values.is_aborted();
        drop(values);

        // la entrada se cortó a mitad del grupo: su salida parcial no se escribe,
        // el error llega en el próximo recv
        if aborted {
            emitter.clear();
            continue;
        }

        if let Err(source) = result {
            match policy {
                FailurePolicy::Abort => {
                    return Err(EngineError::Reducer {
                        key: key.to_string(),
                        source,
                    })
                }
                FailurePolicy::Skip => {
                    warn!("el reducer falló con la clave {}: {:#}; se saltea", key, source);
                    emitter.clear();
                    stats.skipped += 1;
                    continue;
                }
            }
        }

        for pair in emitter.take() {
            if out.blocking_send(pair).is_err() {
                debug!("el escritor se cerró; se dejan de reducir grupos");
                return Ok(stats);
            }
        }
    }
    Ok(stats)
}
