use std::convert::TryFrom;
use std::fmt;
use std::str::FromStr;

use getset::Getters;
use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use strum::EnumString;

use crate::errors::VcfError;
use crate::parser;

/// The token VCF uses for a missing value, in any column.
pub(crate) const MISSING: &str = ".";

pub type Sample = String;

/// Structured representation of the VCF meta-line block.
///
/// Declaration order of contigs and FILTER/INFO/FORMAT definitions is
/// preserved (`IndexMap`), as is the order of pass-through meta lines.
/// The sample list defines the canonical per-sample column order for all
/// record serialization and deserialization.
#[derive(Debug, Clone, Getters, Serialize, Deserialize)]
#[getset(get = "pub")]
pub struct Header {
    pub(crate) fileformat: String,
    /// Unstructured or uninterpreted meta lines as `(key, value)` pairs,
    /// round-tripped verbatim in their original order.
    pub(crate) meta: Vec<(String, String)>,
    pub(crate) contigs: IndexMap<String, HeaderContig>,
    pub(crate) filters: IndexMap<String, HeaderFilter>,
    pub(crate) infos: IndexMap<String, HeaderInfo>,
    pub(crate) formats: IndexMap<String, HeaderFormat>,
    pub(crate) samples: Vec<Sample>,
}

impl Default for Header {
    fn default() -> Self {
        Header {
            fileformat: "VCFv4.2".into(),
            meta: Vec::new(),
            contigs: IndexMap::new(),
            filters: IndexMap::new(),
            infos: IndexMap::new(),
            formats: IndexMap::new(),
            samples: Vec::new(),
        }
    }
}

impl Header {
    pub fn push_contig(&mut self, contig: HeaderContig) {
        self.contigs.insert(contig.id.clone(), contig);
    }

    pub fn push_filter(&mut self, filter: HeaderFilter) {
        self.filters.insert(filter.id.clone(), filter);
    }

    pub fn push_info(&mut self, info: HeaderInfo) {
        self.infos.insert(info.id.clone(), info);
    }

    pub fn push_format(&mut self, format: HeaderFormat) {
        self.formats.insert(format.id.clone(), format);
    }

    pub fn push_sample<S: Into<Sample>>(&mut self, sample: S) {
        self.samples.push(sample.into());
    }
}

/// Value type of an INFO or FORMAT field as declared in the header.
#[derive(Debug, Clone, Copy, Eq, PartialEq, EnumString, strum::Display, Serialize, Deserialize)]
pub enum FieldType {
    Integer,
    Float,
    Flag,
    Character,
    String,
}

/// Arity of an INFO or FORMAT field as declared in the header.
#[derive(Debug, Eq, PartialEq, Copy, Clone, Serialize, Deserialize)]
pub enum FieldNumber {
    Count(usize),
    /// One value per allele, including the reference (`R`).
    Alleles,
    /// One value per alternate allele (`A`).
    AlternateAlleles,
    /// One value per possible genotype (`G`).
    Genotypes,
    /// Unknown or variable number of values (`.`).
    Unknown,
}

impl fmt::Display for FieldNumber {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FieldNumber::Count(n) => write!(f, "{}", n),
            FieldNumber::Alleles => f.write_str("R"),
            FieldNumber::AlternateAlleles => f.write_str("A"),
            FieldNumber::Genotypes => f.write_str("G"),
            FieldNumber::Unknown => f.write_str("."),
        }
    }
}

fn take_mandatory<'a>(
    h: &mut IndexMap<&'a str, &'a str>,
    key: &str,
    line_kind: &str,
) -> Result<&'a str, VcfError> {
    h.remove(key).ok_or_else(|| {
        VcfError::Schema(format!(
            "{} line without mandatory {} attribute",
            line_kind, key
        ))
    })
}

#[derive(Debug, Clone, Getters, Serialize, Deserialize)]
#[getset(get = "pub")]
pub struct HeaderInfo {
    pub(crate) id: String,
    number: FieldNumber,
    kind: FieldType,
    description: String,
    // may be empty
    source: String,
    // may be empty
    version: String,
    additional: IndexMap<String, String>,
}

impl HeaderInfo {
    pub fn new<S: Into<String>>(
        id: S,
        number: FieldNumber,
        kind: FieldType,
        description: S,
    ) -> Self {
        HeaderInfo {
            id: id.into(),
            number,
            kind,
            description: description.into(),
            source: String::new(),
            version: String::new(),
            additional: IndexMap::new(),
        }
    }
}

impl<'a> TryFrom<Vec<(&'a str, &'a str)>> for HeaderInfo {
    type Error = VcfError;

    fn try_from(data: Vec<(&'a str, &'a str)>) -> Result<Self, Self::Error> {
        let mut h: IndexMap<_, _> = data.into_iter().collect();
        let mut header_info = HeaderInfo {
            id: take_mandatory(&mut h, "ID", "INFO")?.into(),
            number: parser::field_number(take_mandatory(&mut h, "Number", "INFO")?)?,
            kind: FieldType::from_str(take_mandatory(&mut h, "Type", "INFO")?)
                .map_err(|_| VcfError::Schema("INFO line with unknown Type".into()))?,
            description: take_mandatory(&mut h, "Description", "INFO")?.into(),
            source: h.remove("Source").unwrap_or("").into(),
            version: h.remove("Version").unwrap_or("").into(),
            additional: Default::default(),
        };
        header_info.additional = h.into_iter().map(|(k, v)| (k.into(), v.into())).collect();
        Ok(header_info)
    }
}

#[derive(Debug, Clone, Getters, Serialize, Deserialize)]
#[getset(get = "pub")]
pub struct HeaderFormat {
    pub(crate) id: String,
    number: FieldNumber,
    kind: FieldType,
    description: String,
}

impl HeaderFormat {
    pub fn new<S: Into<String>>(
        id: S,
        number: FieldNumber,
        kind: FieldType,
        description: S,
    ) -> Self {
        HeaderFormat {
            id: id.into(),
            number,
            kind,
            description: description.into(),
        }
    }
}

impl<'a> TryFrom<Vec<(&'a str, &'a str)>> for HeaderFormat {
    type Error = VcfError;

    fn try_from(data: Vec<(&'a str, &'a str)>) -> Result<Self, Self::Error> {
        let mut h: IndexMap<_, _> = data.into_iter().collect();
        Ok(HeaderFormat {
            id: take_mandatory(&mut h, "ID", "FORMAT")?.into(),
            number: parser::field_number(take_mandatory(&mut h, "Number", "FORMAT")?)?,
            kind: FieldType::from_str(take_mandatory(&mut h, "Type", "FORMAT")?)
                .map_err(|_| VcfError::Schema("FORMAT line with unknown Type".into()))?,
            description: take_mandatory(&mut h, "Description", "FORMAT")?.into(),
        })
    }
}

#[derive(Debug, Clone, Getters, Serialize, Deserialize)]
#[getset(get = "pub")]
pub struct HeaderContig {
    pub(crate) id: String,
    length: Option<usize>,
    additional: IndexMap<String, String>,
}

impl HeaderContig {
    pub fn new<S: Into<String>>(id: S, length: Option<usize>) -> Self {
        HeaderContig {
            id: id.into(),
            length,
            additional: IndexMap::new(),
        }
    }
}

impl<'a> TryFrom<Vec<(&'a str, &'a str)>> for HeaderContig {
    type Error = VcfError;

    fn try_from(data: Vec<(&'a str, &'a str)>) -> Result<Self, Self::Error> {
        let mut h: IndexMap<_, _> = data.into_iter().collect();
        let mut contig = HeaderContig {
            id: take_mandatory(&mut h, "ID", "contig")?.into(),
            length: h.remove("length").and_then(|s| s.parse().ok()),
            additional: Default::default(),
        };
        contig.additional = h.into_iter().map(|(k, v)| (k.into(), v.into())).collect();
        Ok(contig)
    }
}

#[derive(Debug, Clone, Getters, Serialize, Deserialize)]
#[getset(get = "pub")]
pub struct HeaderFilter {
    pub(crate) id: String,
    description: String,
}

impl HeaderFilter {
    pub fn new<S: Into<String>>(id: S, description: S) -> Self {
        HeaderFilter {
            id: id.into(),
            description: description.into(),
        }
    }
}

impl<'a> TryFrom<Vec<(&'a str, &'a str)>> for HeaderFilter {
    type Error = VcfError;

    fn try_from(data: Vec<(&'a str, &'a str)>) -> Result<Self, Self::Error> {
        let mut h: IndexMap<_, _> = data.into_iter().collect();
        Ok(HeaderFilter {
            id: take_mandatory(&mut h, "ID", "FILTER")?.into(),
            description: take_mandatory(&mut h, "Description", "FILTER")?.into(),
        })
    }
}

/// A typed INFO or FORMAT value.
///
/// `Missing` (the bare `.` token) is distinct from an empty or zero value;
/// per-element missing tokens inside a multi-valued field are `None` entries.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum FieldValue {
    Missing,
    Flag,
    Integer(Vec<Option<i32>>),
    Float(Vec<Option<f32>>),
    Character(Vec<Option<char>>),
    String(Vec<String>),
    Genotype(Vec<GenotypeAllele>),
}

impl FieldValue {
    pub fn integer(&self) -> Option<&[Option<i32>]> {
        match self {
            FieldValue::Integer(v) => Some(v.as_slice()),
            _ => None,
        }
    }

    pub fn float(&self) -> Option<&[Option<f32>]> {
        match self {
            FieldValue::Float(v) => Some(v.as_slice()),
            _ => None,
        }
    }

    pub fn strings(&self) -> Option<&[String]> {
        match self {
            FieldValue::String(v) => Some(v.as_slice()),
            _ => None,
        }
    }

    pub fn genotype(&self) -> Option<&[GenotypeAllele]> {
        match self {
            FieldValue::Genotype(v) => Some(v.as_slice()),
            _ => None,
        }
    }

    pub fn is_missing(&self) -> bool {
        matches!(self, FieldValue::Missing)
    }
}

/// Phased or unphased alleles, represented as indices.
///
/// The phasing flag belongs to the separator preceding the allele in the
/// `GT` string, so `0|1` is `[Unphased(0), Phased(1)]`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum GenotypeAllele {
    Unphased(i32),
    Phased(i32),
    UnphasedMissing,
    PhasedMissing,
}

impl GenotypeAllele {
    /// Get the index into the list of alleles.
    pub fn index(self) -> Option<u32> {
        match self {
            GenotypeAllele::Unphased(i) | GenotypeAllele::Phased(i) => Some(i as u32),
            GenotypeAllele::UnphasedMissing | GenotypeAllele::PhasedMissing => None,
        }
    }

    pub fn is_phased(self) -> bool {
        matches!(self, GenotypeAllele::Phased(_) | GenotypeAllele::PhasedMissing)
    }
}

/// The FILTER column of a record.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum FilterStatus {
    /// `.`
    Missing,
    Pass,
    Fail(Vec<String>),
}

impl Default for FilterStatus {
    fn default() -> Self {
        FilterStatus::Missing
    }
}

/// Per-sample genotype call: FORMAT field ID to typed value.
///
/// The reserved `GT` field is stored as [`FieldValue::Genotype`].
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct GenotypeCall {
    pub values: IndexMap<String, FieldValue>,
}

impl GenotypeCall {
    pub fn get(&self, tag: &str) -> Option<&FieldValue> {
        self.values.get(tag)
    }

    pub fn set<S: Into<String>>(&mut self, tag: S, value: FieldValue) {
        self.values.insert(tag.into(), value);
    }

    /// The allele indices of the `GT` field, if present.
    pub fn genotype(&self) -> Option<&[GenotypeAllele]> {
        self.values.get("GT").and_then(FieldValue::genotype)
    }
}

/// A single VCF record in structured form.
///
/// Constructed per record and owned by the caller once handed out; the
/// reading path never mutates a record after construction.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Variant {
    pub chrom: String,
    /// 1-based position.
    pub pos: u32,
    /// IDs from the ID column; empty means missing (`.`).
    pub ids: Vec<String>,
    pub ref_allele: String,
    pub alt_alleles: Vec<String>,
    /// `None` is the distinct missing state, not `0.0`.
    pub qual: Option<f32>,
    pub filters: FilterStatus,
    pub info: IndexMap<String, FieldValue>,
    /// One call per header sample, in the header's sample order.
    pub calls: Vec<GenotypeCall>,
}

impl Variant {
    /// 1-based exclusive end: `pos + len(ref)`.
    pub fn end(&self) -> u32 {
        self.pos + self.ref_allele.len() as u32
    }

    pub fn info(&self, tag: &str) -> Option<&FieldValue> {
        self.info.get(tag)
    }

    pub fn has_flag(&self, tag: &str) -> bool {
        matches!(self.info.get(tag), Some(FieldValue::Flag))
    }

    /// Whether `[pos, end)` overlaps the given region on the same contig.
    pub fn overlaps(&self, region: &Region) -> bool {
        self.chrom == region.contig && self.pos < region.end && self.end() > region.start
    }
}

/// A genomic region: half-open `[start, end)` over 1-based positions.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Region {
    pub contig: String,
    pub start: u32,
    pub end: u32,
}

impl Region {
    pub fn new<S: Into<String>>(contig: S, start: u32, end: u32) -> Self {
        Region {
            contig: contig.into(),
            start,
            end,
        }
    }
}
