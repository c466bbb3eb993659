//! Formato de cable: una línea por registro, `<clave-json>\t<valor-json>\n`.
//!
//! Las escapes de JSON garantizan que ni la clave ni el valor contengan un
//! TAB o un salto de línea crudo.

use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncWrite, AsyncWriteExt, BufWriter};
use tracing::warn;

use crate::error::{DecodeError, EncodeError, Result};
use crate::value::{Pair, Value};

/// Codifica un Pair como una línea completa (incluye el `\n` final).
pub fn encode_pair(pair: &Pair) -> std::result::Result<String, EncodeError> {
    let key = serde_json::to_string(&pair.key).map_err(EncodeError::Key)?;
    let value = serde_json::to_string(&pair.value).map_err(EncodeError::Value)?;

    let mut line = String::with_capacity(key.len() + value.len() + 2);
    line.push_str(&key);
    line.push('\t');
    line.push_str(&value);
    line.push('\n');
    Ok(line)
}

/// Decodifica una línea `<clave>\t<valor>`. Corta en el PRIMER tab; cada
/// campo se decodifica por separado. Nunca descarta ni corrige líneas rotas.
pub fn decode_pair(line: &str) -> std::result::Result<Pair, DecodeError> {
    let line = strip_terminator(line);

    let Some((raw_key, raw_value)) = line.split_once('\t') else {
        return Err(DecodeError::MissingSeparator {
            line: line.to_string(),
        });
    };

    let key: Value =
        serde_json::from_str(raw_key.trim()).map_err(|source| DecodeError::InvalidKey {
            line: line.to_string(),
            source,
        })?;
    let value: Value =
        serde_json::from_str(raw_value.trim()).map_err(|source| DecodeError::InvalidValue {
            line: line.to_string(),
            source,
        })?;

    Ok(Pair { key, value })
}

/// Saca el `\n` final (y un `\r` justo antes). Nada más.
fn strip_terminator(line: &str) -> &str {
    match line.strip_suffix('\n') {
        Some(l) => l.strip_suffix('\r').unwrap_or(l),
        None => line,
    }
}

/// Lector de líneas crudas para la entrada de la fase Map.
pub struct LineReader<R> {
    inner: R,
    buf: Vec<u8>,
    lines_read: u64,
}

impl<R: AsyncBufRead + Unpin> LineReader<R> {
    pub fn new(inner: R) -> Self {
        Self {
            inner,
            buf: Vec::new(),
            lines_read: 0,
        }
    }

    /// `Ok(None)` es fin de entrada, no un error. Una última línea sin `\n`
    /// también se entrega. Los bytes que no son UTF-8 se reemplazan por U+FFFD.
    pub async fn read_line(&mut self) -> std::io::Result<Option<String>> {
        let Some(bytes) = self.read_raw().await? else {
            return Ok(None);
        };
        let (line, lossy) = match std::str::from_utf8(bytes) {
            Ok(line) => (line.to_string(), false),
            Err(_) => (String::from_utf8_lossy(bytes).into_owned(), true),
        };
        if lossy {
            warn!(
                "línea {} no es UTF-8 válido; se reemplazan los bytes inválidos",
                self.lines_read
            );
        }
        Ok(Some(line))
    }

    /// La línea tal cual vino, sin el terminador.
    async fn read_raw(&mut self) -> std::io::Result<Option<&[u8]>> {
        self.buf.clear();
        let n = self.inner.read_until(b'\n', &mut self.buf).await?;
        if n == 0 {
            return Ok(None);
        }
        self.lines_read += 1;
        Ok(Some(strip_terminator_bytes(&self.buf)))
    }

    pub fn lines_read(&self) -> u64 {
        self.lines_read
    }
}

fn strip_terminator_bytes(line: &[u8]) -> &[u8] {
    match line.strip_suffix(b"\n") {
        Some(l) => l.strip_suffix(b"\r").unwrap_or(l),
        None => line,
    }
}

/// Lector de Pairs codificados (entrada de la fase Reduce).
pub struct PairReader<R> {
    lines: LineReader<R>,
}

impl<R: AsyncBufRead + Unpin> PairReader<R> {
    pub fn new(inner: R) -> Self {
        Self {
            lines: LineReader::new(inner),
        }
    }

    /// Acá una línea que no es UTF-8 es un registro roto, no se corrige.
    pub async fn read(&mut self) -> Result<Option<Pair>> {
        let Some(bytes) = self.lines.read_raw().await? else {
            return Ok(None);
        };
        let line = std::str::from_utf8(bytes).map_err(|source| DecodeError::InvalidUtf8 {
            line: String::from_utf8_lossy(bytes).into_owned(),
            source,
        })?;
        Ok(Some(decode_pair(line)?))
    }

    pub fn lines_read(&self) -> u64 {
        self.lines.lines_read()
    }
}

/// Escritor de Pairs con buffer. Nada llega al sink hasta `flush()`.
pub struct PairWriter<W: AsyncWrite> {
    inner: BufWriter<W>,
    written: u64,
}

impl<W: AsyncWrite + Unpin> PairWriter<W> {
    pub fn new(inner: W) -> Self {
        Self::with_capacity(8 * 1024, inner)
    }

    pub fn with_capacity(capacity: usize, inner: W) -> Self {
        Self {
            inner: BufWriter::with_capacity(capacity, inner),
            written: 0,
        }
    }

    pub async fn write(&mut self, pair: &Pair) -> Result<()> {
        let line = encode_pair(pair)?;
        self.inner.write_all(line.as_bytes()).await?;
        self.written += 1;
        Ok(())
    }

    pub async fn flush(&mut self) -> Result<()> {
        self.inner.flush().await?;
        Ok(())
    }

    pub fn written(&self) -> u64 {
        self.written
    }

    pub fn get_ref(&self) -> &W {
        self.inner.get_ref()
    }

    pub fn into_inner(self) -> W {
        self.inner.into_inner()
    }
}
