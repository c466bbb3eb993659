//! Shuffle: agrupa registros contiguos con la misma clave.
//!
//! La entrada se asume ordenada por clave. Cada clave se compara sólo contra
//! la del grupo abierto, nunca contra un conjunto global, así que `[a, b, a]`
//! produce tres grupos.

use std::sync::Arc;

use tokio::{sync::mpsc, task::JoinHandle};
use tracing::{debug, warn};

use crate::error::Result;
use crate::value::{Pair, Value};
use crate::HANDOFF_CAPACITY;

/// Decide si dos claves pertenecen al mismo grupo.
pub trait KeyEquality: Send + Sync {
    fn same_key(&self, a: &Value, b: &Value) -> bool;
}

/// Igualdad estructural (profunda) de `Value`. Es la que se usa por defecto.
#[derive(Debug, Default, Clone, Copy)]
pub struct StructuralEq;

impl KeyEquality for StructuralEq {
    fn same_key(&self, a: &Value, b: &Value) -> bool {
        a == b
    }
}

/// Claves string comparadas sin distinguir mayúsculas; el resto, estructural.
#[derive(Debug, Default, Clone, Copy)]
pub struct CaseInsensitiveKeys;

impl KeyEquality for CaseInsensitiveKeys {
    fn same_key(&self, a: &Value, b: &Value) -> bool {
        match (a, b) {
            (Value::String(x), Value::String(y)) => x.to_lowercase() == y.to_lowercase(),
            _ => a == b,
        }
    }
}

enum Slot {
    Value(Value),
    End,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum StreamState {
    Open,
    Finished,
    Aborted,
}

/// Stream perezoso de los valores de un grupo. Un solo productor (el shuffle)
/// y un solo consumidor (el reducer). Una vez cerrado no se reabre.
///
/// Si la entrada se corta por un error, el stream termina sin la marca de fin
/// y `is_aborted()` devuelve true.
pub struct Values {
    rx: mpsc::Receiver<Slot>,
    state: StreamState,
}

impl Values {
    fn new(rx: mpsc::Receiver<Slot>) -> Self {
        Self {
            rx,
            state: StreamState::Open,
        }
    }

    fn on_slot(&mut self, slot: Option<Slot>) -> Option<Value> {
        match slot {
            Some(Slot::Value(v)) => Some(v),
            Some(Slot::End) => {
                self.state = StreamState::Finished;
                None
            }
            None => {
                self.state = StreamState::Aborted;
                None
            }
        }
    }

    /// Versión async, para consumir desde una tarea de tokio.
    pub async fn next_value(&mut self) -> Option<Value> {
        if self.state != StreamState::Open {
            return None;
        }
        let slot = self.rx.recv().await;
        self.on_slot(slot)
    }

    /// Bloquea el hilo actual. Sólo fuera del runtime (spawn_blocking).
    pub fn blocking_next(&mut self) -> Option<Value> {
        if self.state != StreamState::Open {
            return None;
        }
        let slot = self.rx.blocking_recv();
        self.on_slot(slot)
    }

    pub fn is_finished(&self) -> bool {
        self.state == StreamState::Finished
    }

    pub fn is_aborted(&self) -> bool {
        self.state == StreamState::Aborted
    }
}

impl Iterator for Values {
    type Item = Value;

    fn next(&mut self) -> Option<Value> {
        self.blocking_next()
    }
}

/// Una clave y el stream de sus valores.
pub struct Group {
    pub key: Value,
    pub values: Values,
}

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct GroupingStats {
    pub groups: u64,
    pub values: u64,
    /// Valores descartados porque el reducer soltó el grupo sin drenarlo.
    pub discarded: u64,
}

/// Grupo abierto del lado productor.
struct OpenGroup {
    key: Value,
    tx: Option<mpsc::Sender<Slot>>,
}

impl OpenGroup {
    /// Devuelve false si el consumidor ya soltó el grupo.
    async fn push(&mut self, value: Value) -> bool {
        let Some(tx) = &self.tx else {
            return false;
        };
        if tx.send(Slot::Value(value)).await.is_err() {
            warn!(
                "el reducer devolvió sin consumir todos los valores de la clave {}; se descartan los restantes",
                self.key
            );
            self.tx = None;
            return false;
        }
        true
    }

    /// Cierre normal: manda la marca de fin.
    async fn close(mut self) {
        if let Some(tx) = self.tx.take() {
            let _ = tx.send(Slot::End).await;
        }
    }
}

/// Lanza la tarea de agrupamiento.
///
/// Cada grupo se emite apenas aparece su primera clave, antes de conocer sus
/// valores, y los valores se le van pasando a medida que llegan. Un error en
/// la entrada corta el grupo abierto (sin marca de fin) y se reenvía por el
/// canal de grupos.
pub fn group_by(
    mut input: mpsc::Receiver<Result<Pair>>,
    key_eq: Arc<dyn KeyEquality>,
) -> (mpsc::Receiver<Result<Group>>, JoinHandle<GroupingStats>) {
    let (out, groups) = mpsc::channel(HANDOFF_CAPACITY);

    let handle = tokio::spawn(async move {
        let mut stats = GroupingStats::default();
        let mut current: Option<OpenGroup> = None;

        while let Some(item) = input.recv().await {
            let Pair { key, value } = match item {
                Ok(pair) => pair,
                Err(e) => {
                    // se suelta el sender sin marca de fin: el grupo queda abortado
                    drop(current.take());
                    let _ = out.send(Err(e)).await;
                    return stats;
                }
            };

            let boundary = match &current {
                None => true,
                Some(open) => !key_eq.same_key(&open.key, &key),
            };

            if boundary {
                if let Some(open) = current.take() {
                    open.close().await;
                }

                debug!("nuevo grupo para la clave {}", key);
                let (tx, rx) = mpsc::channel(HANDOFF_CAPACITY);
                let group = Group {
                    key: key.clone(),
                    values: Values::new(rx),
                };
                if out.send(Ok(group)).await.is_err() {
                    debug!("el consumidor de grupos se cerró; fin del shuffle");
                    return stats;
                }
                stats.groups += 1;
                current = Some(OpenGroup { key, tx: Some(tx) });
            }

            if let Some(open) = current.as_mut() {
                if open.push(value).await {
                    stats.values += 1;
                } else {
                    stats.discarded += 1;
                }
            }
        }

        if let Some(open) = current.take() {
            open.close().await;
        }
        stats
    });

    (groups, handle)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::{DecodeError, EngineError};

    /// Alimenta el shuffle con los pares dados y cierra la entrada.
    fn feed(pairs: Vec<Pair>) -> mpsc::Receiver<Result<Pair>> {
        let (tx, rx) = mpsc::channel(HANDOFF_CAPACITY);
        tokio::spawn(async move {
            for p in pairs {
                if tx.send(Ok(p)).await.is_err() {
                    return;
                }
            }
        });
        rx
    }

    fn keyed(keys: &[&str]) -> Vec<Pair> {
        keys.iter()
            .enumerate()
            .map(|(i, k)| Pair::new(*k, i as f64))
            .collect()
    }

    /// Drena todos los grupos: (clave, valores) en orden de emisión.
    async fn collect_groups(
        mut groups: mpsc::Receiver<Result<Group>>,
    ) -> Vec<(Value, Vec<Value>)> {
        let mut out = Vec::new();
        while let Some(group) = groups.recv().await {
            let mut group = group.unwrap();
            let mut vals = Vec::new();
            while let Some(v) = group.values.next_value().await {
                vals.push(v);
            }
            assert!(group.values.is_finished());
            out.push((group.key, vals));
        }
        out
    }

    #[tokio::test]
    async fn agrupa_claves_contiguas_en_orden() {
        let input = feed(keyed(&["a", "a", "a", "b", "b", "c"]));
        let (groups, handle) = group_by(input, Arc::new(StructuralEq));

        let out = collect_groups(groups).await;
        let keys: Vec<_> = out.iter().map(|(k, _)| k.clone()).collect();
        let lens: Vec<_> = out.iter().map(|(_, v)| v.len()).collect();

        assert_eq!(keys, vec![Value::from("a"), Value::from("b"), Value::from("c")]);
        assert_eq!(lens, vec![3, 2, 1]);
        assert_eq!(out[1].1, vec![Value::Number(3.0), Value::Number(4.0)]);

        let stats = handle.await.unwrap();
        assert_eq!(stats.groups, 3);
        assert_eq!(stats.values, 6);
        assert_eq!(stats.discarded, 0);
    }

    #[tokio::test]
    async fn claves_no_monotonas_generan_un_grupo_por_cambio() {
        let input = feed(keyed(&["a", "b", "a"]));
        let (groups, _handle) = group_by(input, Arc::new(StructuralEq));

        let out = collect_groups(groups).await;
        assert_eq!(out.len(), 3);
        assert_eq!(out[0].0, out[2].0);
    }

    #[tokio::test]
    async fn entrada_vacia_no_produce_grupos() {
        let input = feed(vec![]);
        let (groups, handle) = group_by(input, Arc::new(StructuralEq));

        assert!(collect_groups(groups).await.is_empty());
        assert_eq!(handle.await.unwrap(), GroupingStats::default());
    }

    #[tokio::test]
    async fn una_sola_clave_produce_un_solo_grupo() {
        let input = feed(keyed(&["k"; 50]));
        let (groups, _handle) = group_by(input, Arc::new(StructuralEq));

        let out = collect_groups(groups).await;
        assert_eq!(out.len(), 1);
        assert_eq!(out[0].1.len(), 50);
    }

    #[tokio::test]
    async fn grupo_se_emite_antes_de_conocer_sus_valores() {
        let (tx, rx) = mpsc::channel(HANDOFF_CAPACITY);
        let (mut groups, _handle) = group_by(rx, Arc::new(StructuralEq));

        tx.send(Ok(Pair::new("a", 1))).await.unwrap();
        let mut group = groups.recv().await.unwrap().unwrap();
        assert_eq!(group.key, Value::from("a"));
        assert_eq!(group.values.next_value().await, Some(Value::Number(1.0)));

        // la entrada sigue abierta y el mismo grupo recibe más valores
        tx.send(Ok(Pair::new("a", 2))).await.unwrap();
        assert_eq!(group.values.next_value().await, Some(Value::Number(2.0)));

        drop(tx);
        assert_eq!(group.values.next_value().await, None);
        assert!(group.values.is_finished());
        assert!(groups.recv().await.is_none());
    }

    #[tokio::test]
    async fn igualdad_personalizada_decide_los_limites() {
        let input = feed(keyed(&["The", "the", "THE", "cat"]));
        let (groups, _handle) = group_by(input, Arc::new(CaseInsensitiveKeys));

        let out = collect_groups(groups).await;
        assert_eq!(out.len(), 2);
        assert_eq!(out[0].0, Value::from("The"));
        assert_eq!(out[0].1.len(), 3);
    }

    #[tokio::test]
    async fn grupo_soltado_sin_drenar_no_bloquea_el_shuffle() {
        let input = feed(keyed(&["a", "a", "a", "b"]));
        let (mut groups, handle) = group_by(input, Arc::new(StructuralEq));

        let mut first = groups.recv().await.unwrap().unwrap();
        assert!(first.values.next_value().await.is_some());
        drop(first);

        let mut second = groups.recv().await.unwrap().unwrap();
        assert_eq!(second.key, Value::from("b"));
        assert_eq!(second.values.next_value().await, Some(Value::Number(3.0)));
        assert_eq!(second.values.next_value().await, None);
        assert!(groups.recv().await.is_none());

        // el valor que ya estaba en el canal cuenta como entregado
        let stats = handle.await.unwrap();
        assert_eq!(stats.groups, 2);
        assert!(stats.discarded >= 1);
        assert_eq!(stats.values + stats.discarded, 4);
    }

    #[tokio::test]
    async fn error_en_la_entrada_aborta_el_grupo_abierto() {
        let (tx, rx) = mpsc::channel(HANDOFF_CAPACITY);
        tokio::spawn(async move {
            tx.send(Ok(Pair::new("a", 1))).await.unwrap();
            tx.send(Ok(Pair::new("a", 2))).await.unwrap();
            tx.send(Err(EngineError::from(DecodeError::MissingSeparator {
                line: "roto".to_string(),
            })))
            .await
            .unwrap();
        });
        let (mut groups, _handle) = group_by(rx, Arc::new(StructuralEq));

        let mut group = groups.recv().await.unwrap().unwrap();
        assert_eq!(group.values.next_value().await, Some(Value::Number(1.0)));
        assert_eq!(group.values.next_value().await, Some(Value::Number(2.0)));
        assert_eq!(group.values.next_value().await, None);
        assert!(group.values.is_aborted());

        let err = groups.recv().await.unwrap().err().unwrap();
        assert!(matches!(err, EngineError::Decode(_)));
        assert!(groups.recv().await.is_none());
    }
}
