//! VCF serialization: regenerates meta lines and record lines from
//! [`Header`] and [`Variant`], plus the writer lifecycle types.

use std::fmt::Write as FmtWrite;
use std::io::Write;
use std::path::Path;

use itertools::Itertools;

use crate::container::ContainerWriter;
use crate::errors::{Result, VcfError};
use crate::reader::is_vcf_path;
use crate::types::{FieldValue, FilterStatus, GenotypeAllele, Header, Variant, MISSING};

/// Options controlling VCF serialization.
#[derive(Debug, Clone, Copy, Default)]
pub struct WriteOptions {
    /// When true, QUAL values are rounded to exactly one decimal place.
    /// Rounding happens before formatting (round-to-nearest over the exact
    /// binary value, ties to even), so no trailing-zero inconsistency can
    /// arise from truncating an already-formatted string.
    pub round_qualities: bool,
}

// Shortest representation that round-trips, always with a decimal point
// (`30.0` stays `30.0`, never `30`).
fn format_float(value: f32) -> String {
    format!("{:?}", value)
}

fn format_qual(qual: f32, round: bool) -> String {
    if round {
        format!("{:.1}", qual)
    } else {
        format_float(qual)
    }
}

fn format_genotype(alleles: &[GenotypeAllele]) -> String {
    let mut out = String::new();
    for (i, allele) in alleles.iter().enumerate() {
        let separator = if allele.is_phased() { '|' } else { '/' };
        // the separator precedes the allele it phases; a phased first
        // allele gets a leading '|'
        if i > 0 || allele.is_phased() {
            out.push(separator);
        }
        match allele {
            GenotypeAllele::Unphased(index) | GenotypeAllele::Phased(index) => {
                write!(out, "{}", index).ok();
            }
            GenotypeAllele::UnphasedMissing | GenotypeAllele::PhasedMissing => out.push('.'),
        }
    }
    out
}

fn encode_value(value: &FieldValue) -> String {
    match value {
        FieldValue::Missing => MISSING.to_owned(),
        FieldValue::Flag => String::new(),
        FieldValue::Integer(values) => values
            .iter()
            .map(|v| v.map(|i| i.to_string()).unwrap_or_else(|| MISSING.to_owned()))
            .join(","),
        FieldValue::Float(values) => values
            .iter()
            .map(|v| v.map(format_float).unwrap_or_else(|| MISSING.to_owned()))
            .join(","),
        FieldValue::Character(values) => values
            .iter()
            .map(|v| v.map(String::from).unwrap_or_else(|| MISSING.to_owned()))
            .join(","),
        FieldValue::String(values) => values.iter().join(","),
        FieldValue::Genotype(alleles) => format_genotype(alleles),
    }
}

fn format_info(variant: &Variant) -> String {
    if variant.info.is_empty() {
        return MISSING.to_owned();
    }
    variant
        .info
        .iter()
        .map(|(key, value)| match value {
            // flags serialize as the bare key
            FieldValue::Flag => key.clone(),
            other => format!("{}={}", key, encode_value(other)),
        })
        .join(";")
}

// FORMAT keys actually present across the record's calls, in header-declared
// order; keys used without a declaration follow in first-appearance order.
fn format_keys<'a>(variant: &'a Variant, header: &'a Header) -> Vec<&'a str> {
    let mut present: Vec<&str> = Vec::new();
    for call in &variant.calls {
        for key in call.values.keys() {
            if !present.contains(&key.as_str()) {
                present.push(key);
            }
        }
    }
    let mut keys: Vec<&str> = header
        .formats()
        .keys()
        .map(String::as_str)
        .filter(|k| present.contains(k))
        .collect();
    for key in present {
        if !keys.contains(&key) {
            keys.push(key);
        }
    }
    keys
}

/// Serializes a single [`Variant`] into a tab-delimited record line
/// (without trailing newline), under the given header's sample order.
///
/// A call count that does not match the header's sample list is a
/// [`VcfError::Serialization`]: downstream consumers assume a fixed column
/// count per file.
pub fn format_record(variant: &Variant, header: &Header, round_qualities: bool) -> Result<String> {
    if variant.calls.len() != header.samples().len() {
        return Err(VcfError::Serialization(format!(
            "record at {}:{} has {} sample calls but the header declares {} samples",
            variant.chrom,
            variant.pos,
            variant.calls.len(),
            header.samples().len()
        )));
    }

    let mut columns: Vec<String> = Vec::with_capacity(8 + header.samples().len() + 1);
    columns.push(variant.chrom.clone());
    columns.push(variant.pos.to_string());
    columns.push(if variant.ids.is_empty() {
        MISSING.to_owned()
    } else {
        variant.ids.iter().join(";")
    });
    columns.push(variant.ref_allele.clone());
    columns.push(if variant.alt_alleles.is_empty() {
        MISSING.to_owned()
    } else {
        variant.alt_alleles.iter().join(",")
    });
    columns.push(
        variant
            .qual
            .map(|q| format_qual(q, round_qualities))
            .unwrap_or_else(|| MISSING.to_owned()),
    );
    columns.push(match &variant.filters {
        FilterStatus::Missing => MISSING.to_owned(),
        FilterStatus::Pass => "PASS".to_owned(),
        FilterStatus::Fail(names) => names.iter().join(";"),
    });
    columns.push(format_info(variant));

    if !header.samples().is_empty() {
        let keys = format_keys(variant, header);
        if keys.is_empty() {
            columns.push(MISSING.to_owned());
            columns.extend(std::iter::repeat(MISSING.to_owned()).take(variant.calls.len()));
        } else {
            columns.push(keys.iter().join(":"));
            for call in &variant.calls {
                columns.push(
                    keys.iter()
                        .map(|key| {
                            call.get(key)
                                .map(encode_value)
                                .unwrap_or_else(|| MISSING.to_owned())
                        })
                        .join(":"),
                );
            }
        }
    }

    Ok(columns.join("\t"))
}

/// Serializes the header block, trailing newline included.
///
/// Pass-through meta lines keep their original order; contig, FILTER, INFO
/// and FORMAT definitions follow in declaration order.
pub fn format_header(header: &Header) -> String {
    let mut out = String::new();
    writeln!(out, "##fileformat={}", header.fileformat()).ok();
    for (key, value) in header.meta() {
        writeln!(out, "##{}={}", key, value).ok();
    }
    for contig in header.contigs().values() {
        write!(out, "##contig=<ID={}", contig.id()).ok();
        if let Some(length) = contig.length() {
            write!(out, ",length={}", length).ok();
        }
        for (key, value) in contig.additional() {
            write!(out, ",{}={}", key, value).ok();
        }
        writeln!(out, ">").ok();
    }
    for filter in header.filters().values() {
        writeln!(
            out,
            "##FILTER=<ID={},Description=\"{}\">",
            filter.id(),
            filter.description()
        )
        .ok();
    }
    for info in header.infos().values() {
        write!(
            out,
            "##INFO=<ID={},Number={},Type={},Description=\"{}\"",
            info.id(),
            info.number(),
            info.kind(),
            info.description()
        )
        .ok();
        if !info.source().is_empty() {
            write!(out, ",Source=\"{}\"", info.source()).ok();
        }
        if !info.version().is_empty() {
            write!(out, ",Version=\"{}\"", info.version()).ok();
        }
        for (key, value) in info.additional() {
            write!(out, ",{}={}", key, value).ok();
        }
        writeln!(out, ">").ok();
    }
    for format in header.formats().values() {
        writeln!(
            out,
            "##FORMAT=<ID={},Number={},Type={},Description=\"{}\">",
            format.id(),
            format.number(),
            format.kind(),
            format.description()
        )
        .ok();
    }
    out.push_str("#CHROM\tPOS\tID\tREF\tALT\tQUAL\tFILTER\tINFO");
    if !header.samples().is_empty() {
        out.push_str("\tFORMAT");
        for sample in header.samples() {
            out.push('\t');
            out.push_str(sample);
        }
    }
    out.push('\n');
    out
}

/// Writer for native VCF output, optionally gzip-compressed by path suffix.
///
/// The header is written at construction and is immutable thereafter; it is
/// never re-derived from records.
pub struct VcfWriter {
    inner: Option<Box<dyn Write>>,
    header: Header,
    round_qualities: bool,
}

impl VcfWriter {
    pub fn to_path<P: AsRef<Path>>(path: P, header: Header, options: WriteOptions) -> Result<Self> {
        let format = if path
            .as_ref()
            .extension()
            .map_or(false, |ext| ext == "gz")
        {
            niffler::compression::Format::Gzip
        } else {
            niffler::compression::Format::No
        };
        let writer = niffler::to_path(path, format, niffler::compression::Level::Six)?;
        Self::from_writer(writer, header, options)
    }

    pub fn from_writer<W: Write + 'static>(
        writer: W,
        header: Header,
        options: WriteOptions,
    ) -> Result<Self> {
        let mut inner: Box<dyn Write> = Box::new(writer);
        inner.write_all(format_header(&header).as_bytes())?;
        Ok(VcfWriter {
            inner: Some(inner),
            header,
            round_qualities: options.round_qualities,
        })
    }

    pub fn header(&self) -> &Header {
        &self.header
    }

    pub fn write(&mut self, variant: &Variant) -> Result<()> {
        let line = format_record(variant, &self.header, self.round_qualities)?;
        let inner = self
            .inner
            .as_mut()
            .ok_or_else(|| VcfError::Configuration("write on closed writer".into()))?;
        inner.write_all(line.as_bytes())?;
        inner.write_all(b"\n")?;
        Ok(())
    }

    /// Flushes and releases the underlying handle. Idempotent.
    pub fn close(&mut self) -> Result<()> {
        if let Some(mut inner) = self.inner.take() {
            inner.flush()?;
        }
        Ok(())
    }
}

impl Drop for VcfWriter {
    fn drop(&mut self) {
        let _ = self.close();
    }
}

/// Extension-dispatching writer over the closed set of storage formats,
/// resolved once at construction.
pub enum VariantWriter {
    Vcf(VcfWriter),
    Container(ContainerWriter),
}

impl VariantWriter {
    /// Selects native VCF when the file name (after stripping an optional
    /// `.gz`) ends in `.vcf`, the binary record container otherwise.
    pub fn from_path<P: AsRef<Path>>(path: P, header: Header, options: WriteOptions) -> Result<Self> {
        if is_vcf_path(path.as_ref()) {
            Ok(VariantWriter::Vcf(VcfWriter::to_path(path, header, options)?))
        } else {
            Ok(VariantWriter::Container(ContainerWriter::to_path(
                path, header,
            )?))
        }
    }

    pub fn header(&self) -> &Header {
        match self {
            VariantWriter::Vcf(w) => w.header(),
            VariantWriter::Container(w) => w.header(),
        }
    }

    pub fn write(&mut self, variant: &Variant) -> Result<()> {
        match self {
            VariantWriter::Vcf(w) => w.write(variant),
            VariantWriter::Container(w) => w.write(variant),
        }
    }

    pub fn close(&mut self) -> Result<()> {
        match self {
            VariantWriter::Vcf(w) => w.close(),
            VariantWriter::Container(w) => w.close(),
        }
    }
}
