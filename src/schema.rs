use std::collections::HashMap;

use itertools::Itertools;

use crate::errors::{Result, VcfError};
use crate::types::{FieldNumber, FieldType, FieldValue, Header, MISSING};

type DecodeFn = fn(&str) -> Result<FieldValue>;

/// Declared type and arity of a single INFO or FORMAT field, with the decode
/// function for its raw VCF tokens resolved once at registry construction.
#[derive(Clone)]
pub struct FieldSchema {
    kind: FieldType,
    number: FieldNumber,
    decode: DecodeFn,
}

impl FieldSchema {
    fn new(kind: FieldType, number: FieldNumber) -> Self {
        let decode = match kind {
            FieldType::Integer => decode_integers as DecodeFn,
            FieldType::Float => decode_floats,
            FieldType::Flag => decode_flag,
            FieldType::Character => decode_characters,
            FieldType::String => decode_strings,
        };
        FieldSchema { kind, number, decode }
    }

    pub fn kind(&self) -> FieldType {
        self.kind
    }

    pub fn number(&self) -> FieldNumber {
        self.number
    }

    /// Decodes a raw VCF token (everything after `=`, or a whole `:`-separated
    /// sample entry) into a typed value. The bare missing token decodes to
    /// [`FieldValue::Missing`], never to an empty or zero value.
    pub fn decode(&self, raw: &str) -> Result<FieldValue> {
        if raw == MISSING {
            return Ok(FieldValue::Missing);
        }
        (self.decode)(raw)
    }
}

/// Maps INFO/FORMAT field IDs to their header-declared schema.
///
/// Built once per header and shared by parser and serializer. Fields that are
/// used in records without being declared in the header are retained as
/// opaque string values rather than rejected; this keeps real-world files
/// with header/record skew readable.
#[derive(Clone, Default)]
pub struct SchemaRegistry {
    info: HashMap<String, FieldSchema>,
    format: HashMap<String, FieldSchema>,
}

impl SchemaRegistry {
    pub fn from_header(header: &Header) -> Self {
        let info = header
            .infos
            .values()
            .map(|i| (i.id.clone(), FieldSchema::new(*i.kind(), *i.number())))
            .collect();
        let format = header
            .formats
            .values()
            .map(|f| (f.id.clone(), FieldSchema::new(*f.kind(), *f.number())))
            .collect();
        SchemaRegistry { info, format }
    }

    pub fn info_schema(&self, tag: &str) -> Option<&FieldSchema> {
        self.info.get(tag)
    }

    pub fn format_schema(&self, tag: &str) -> Option<&FieldSchema> {
        self.format.get(tag)
    }

    pub fn decode_info(&self, tag: &str, raw: &str) -> Result<FieldValue> {
        match self.info.get(tag) {
            Some(schema) => schema.decode(raw),
            None => decode_opaque(raw),
        }
    }

    pub fn decode_format(&self, tag: &str, raw: &str) -> Result<FieldValue> {
        match self.format.get(tag) {
            Some(schema) => schema.decode(raw),
            None => decode_opaque(raw),
        }
    }
}

fn decode_integers(raw: &str) -> Result<FieldValue> {
    let values = raw
        .split(',')
        .map(|token| {
            if token == MISSING {
                Ok(None)
            } else {
                token
                    .parse::<i32>()
                    .map(Some)
                    .map_err(|_| VcfError::Parse(format!("invalid integer token '{}'", token)))
            }
        })
        .collect::<Result<Vec<_>>>()?;
    Ok(FieldValue::Integer(values))
}

fn decode_floats(raw: &str) -> Result<FieldValue> {
    let values = raw
        .split(',')
        .map(|token| {
            if token == MISSING {
                Ok(None)
            } else {
                token
                    .parse::<f32>()
                    .map(Some)
                    .map_err(|_| VcfError::Parse(format!("invalid float token '{}'", token)))
            }
        })
        .collect::<Result<Vec<_>>>()?;
    Ok(FieldValue::Float(values))
}

fn decode_characters(raw: &str) -> Result<FieldValue> {
    let values = raw
        .split(',')
        .map(|token| {
            if token == MISSING {
                Ok(None)
            } else {
                token
                    .chars()
                    .exactly_one()
                    .map(Some)
                    .map_err(|_| VcfError::Parse(format!("invalid character token '{}'", token)))
            }
        })
        .collect::<Result<Vec<_>>>()?;
    Ok(FieldValue::Character(values))
}

fn decode_strings(raw: &str) -> Result<FieldValue> {
    Ok(FieldValue::String(
        raw.split(',').map(str::to_owned).collect_vec(),
    ))
}

// A flag key may carry any (usually no) value; its presence is the value.
fn decode_flag(_raw: &str) -> Result<FieldValue> {
    Ok(FieldValue::Flag)
}

// Undeclared fields keep their raw tokens, split on ',' like any
// multi-valued field.
fn decode_opaque(raw: &str) -> Result<FieldValue> {
    if raw == MISSING {
        Ok(FieldValue::Missing)
    } else {
        decode_strings(raw)
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::types::{FieldNumber, FieldType, Header, HeaderFormat, HeaderInfo};

    fn registry() -> SchemaRegistry {
        let mut header = Header::default();
        header.push_info(HeaderInfo::new(
            "DP",
            FieldNumber::Count(1),
            FieldType::Integer,
            "Depth",
        ));
        header.push_info(HeaderInfo::new(
            "AF",
            FieldNumber::AlternateAlleles,
            FieldType::Float,
            "Allele frequency",
        ));
        header.push_info(HeaderInfo::new(
            "DB",
            FieldNumber::Count(0),
            FieldType::Flag,
            "dbSNP membership",
        ));
        header.push_format(HeaderFormat::new(
            "GQ",
            FieldNumber::Count(1),
            FieldType::Integer,
            "Genotype quality",
        ));
        SchemaRegistry::from_header(&header)
    }

    #[test]
    fn test_decode_integer() {
        let r = registry();
        assert_eq!(
            r.decode_info("DP", "10").unwrap(),
            FieldValue::Integer(vec![Some(10)])
        );
        assert!(r.decode_info("DP", "ten").is_err());
    }

    #[test]
    fn test_decode_multi_value_with_element_missing() {
        let r = registry();
        assert_eq!(
            r.decode_info("AF", "0.5,.,0.25").unwrap(),
            FieldValue::Float(vec![Some(0.5), None, Some(0.25)])
        );
    }

    #[test]
    fn test_missing_is_distinct() {
        let r = registry();
        assert_eq!(r.decode_info("DP", ".").unwrap(), FieldValue::Missing);
        assert_eq!(r.decode_format("GQ", ".").unwrap(), FieldValue::Missing);
    }

    #[test]
    fn test_undeclared_field_retained_as_string() {
        let r = registry();
        assert_eq!(
            r.decode_info("XYZ", "1,2").unwrap(),
            FieldValue::String(vec!["1".into(), "2".into()])
        );
        assert_eq!(r.decode_format("XX", "abc").unwrap(), FieldValue::String(vec!["abc".into()]));
    }

    #[test]
    fn test_flag_decode() {
        let r = registry();
        assert_eq!(r.decode_info("DB", "").unwrap(), FieldValue::Flag);
    }
}
