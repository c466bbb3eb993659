use anyhow::bail;
use mrstream::{EngineConfig, Emitter, Job, Mapper, Ports, Reducer, Step, Value, Values};

/// WordCount clásico: el mapper emite (palabra, 1) y el reducer suma.
#[derive(Debug, Default, Clone, Copy)]
pub struct WordCount;

/// Corta en espacios y signos de puntuación (incluido '_') y pasa cada
/// pedazo a minúscula. "don't" da dos palabras: "don" y "t".
pub fn tokenize(line: &str) -> Vec<String> {
    line.split(is_separator)
        .filter(|w| !w.is_empty())
        .map(str::to_lowercase)
        .collect()
}

fn is_separator(c: char) -> bool {
    c.is_whitespace()
        || c.is_ascii_punctuation()
        // puntuación general (guiones, comillas tipográficas, elipsis) y la de apertura en español
        || matches!(c, '\u{2010}'..='\u{2027}' | '\u{2030}'..='\u{205E}' | '¡' | '¿' | '«' | '»')
}

impl Mapper for WordCount {
    fn map(&self, line: &str, out: &mut Emitter) -> anyhow::Result<()> {
        for word in tokenize(line) {
            out.emit(word, 1);
        }
        Ok(())
    }
}

impl Reducer for WordCount {
    fn reduce(&self, key: &Value, values: &mut Values, out: &mut Emitter) -> anyhow::Result<()> {
        // se drena todo aunque aparezca un valor raro, así el shuffle no descarta nada
        let mut sum = 0.0;
        let mut bad = None;
        for v in values {
            match v.as_f64() {
                Some(n) => sum += n,
                None => bad = Some(v),
            }
        }
        if let Some(v) = bad {
            bail!("valor no numérico {} para la palabra {}", v, key);
        }
        out.emit(key.clone(), sum);
        Ok(())
    }
}

/// Job de un solo step.
pub fn build_job(ports: Ports, config: EngineConfig) -> Job {
    Job::new(vec![Step::new()
        .with_mapper(WordCount)
        .with_reducer(WordCount)
        .with_ports(ports)
        .with_config(config)])
}
