//! Generic binary record container: a `Header` frame followed by one frame
//! per `Variant`, each frame a little-endian `u32` length prefix and a
//! bincode payload. No VCF text grammar is involved on this path.

use std::io::{BufRead, BufReader, ErrorKind, Read, Write};
use std::path::Path;

use byteorder::{LittleEndian, ReadBytesExt, WriteBytesExt};
use serde::Serialize;

use crate::errors::{Result, VcfError};
use crate::types::{Header, Variant};

fn read_frame<R: BufRead>(reader: &mut R) -> Result<Option<Vec<u8>>> {
    let length = match reader.read_u32::<LittleEndian>() {
        Ok(length) => length,
        // EOF at a frame boundary is the end of the container
        Err(e) if e.kind() == ErrorKind::UnexpectedEof => return Ok(None),
        Err(e) => return Err(e.into()),
    };
    let mut payload = vec![0u8; length as usize];
    reader.read_exact(&mut payload)?;
    Ok(Some(payload))
}

fn write_frame<W: Write, T: Serialize>(writer: &mut W, message: &T) -> Result<()> {
    let payload = bincode::serialize(message)
        .map_err(|e| VcfError::Serialization(format!("container frame: {}", e)))?;
    writer.write_u32::<LittleEndian>(payload.len() as u32)?;
    writer.write_all(&payload)?;
    Ok(())
}

/// Reader over a container file, optionally gzip-compressed.
pub struct ContainerReader {
    header: Header,
    inner: Option<BufReader<Box<dyn Read>>>,
}

impl std::fmt::Debug for ContainerReader {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ContainerReader")
            .field("header", &self.header)
            .finish_non_exhaustive()
    }
}

impl ContainerReader {
    pub fn from_path<P: AsRef<Path>>(path: P) -> Result<Self> {
        let (reader, _format) = niffler::from_path(path)?;
        Self::from_reader(reader)
    }

    pub fn from_reader<R: Read + 'static>(reader: R) -> Result<Self> {
        let mut inner = BufReader::new(Box::new(reader) as Box<dyn Read>);
        let payload = read_frame(&mut inner)?
            .ok_or_else(|| VcfError::Parse("container without header frame".into()))?;
        let header = bincode::deserialize(&payload)
            .map_err(|e| VcfError::Parse(format!("container header frame: {}", e)))?;
        Ok(ContainerReader {
            header,
            inner: Some(inner),
        })
    }

    pub fn header(&self) -> &Header {
        &self.header
    }

    /// Releases the underlying handle. Idempotent.
    pub fn close(&mut self) -> Result<()> {
        self.inner.take();
        Ok(())
    }
}

impl Iterator for ContainerReader {
    type Item = Result<Variant>;

    fn next(&mut self) -> Option<Self::Item> {
        let payload = match read_frame(self.inner.as_mut()?) {
            Ok(Some(payload)) => payload,
            Ok(None) => return None,
            Err(e) => return Some(Err(e)),
        };
        Some(
            bincode::deserialize(&payload)
                .map_err(|e| VcfError::Parse(format!("container record frame: {}", e))),
        )
    }
}

/// Writer producing a container file, optionally gzip-compressed by path
/// suffix. The header frame is written at construction.
pub struct ContainerWriter {
    header: Header,
    inner: Option<Box<dyn Write>>,
}

impl ContainerWriter {
    pub fn to_path<P: AsRef<Path>>(path: P, header: Header) -> Result<Self> {
        let format = if path.as_ref().extension().map_or(false, |ext| ext == "gz") {
            niffler::compression::Format::Gzip
        } else {
            niffler::compression::Format::No
        };
        let writer = niffler::to_path(path, format, niffler::compression::Level::Six)?;
        Self::from_writer(writer, header)
    }

    pub fn from_writer<W: Write + 'static>(writer: W, header: Header) -> Result<Self> {
        let mut inner: Box<dyn Write> = Box::new(writer);
        write_frame(&mut inner, &header)?;
        Ok(ContainerWriter {
            header,
            inner: Some(inner),
        })
    }

    pub fn header(&self) -> &Header {
        &self.header
    }

    pub fn write(&mut self, variant: &Variant) -> Result<()> {
        // same fixed-sample-count contract as the text path
        if variant.calls.len() != self.header.samples().len() {
            return Err(VcfError::Serialization(format!(
                "record at {}:{} has {} sample calls but the header declares {} samples",
                variant.chrom,
                variant.pos,
                variant.calls.len(),
                self.header.samples().len()
            )));
        }
        let inner = self
            .inner
            .as_mut()
            .ok_or_else(|| VcfError::Configuration("write on closed writer".into()))?;
        write_frame(inner, variant)
    }

    /// Flushes and releases the underlying handle. Idempotent.
    pub fn close(&mut self) -> Result<()> {
        if let Some(mut inner) = self.inner.take() {
            inner.flush()?;
        }
        Ok(())
    }
}

impl Drop for ContainerWriter {
    fn drop(&mut self) {
        let _ = self.close();
    }
}
