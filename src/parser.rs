//! Line-oriented VCF parsing: the `##` meta-line grammar, the `#CHROM`
//! column line and tab-delimited record lines.

use std::collections::HashSet;
use std::convert::TryFrom;
use std::io::BufRead;

use indexmap::IndexMap;
use itertools::Itertools;
use nom::branch::alt;
use nom::bytes::complete::{is_not, tag};
use nom::character::complete::{char, digit1, none_of, one_of};
use nom::combinator::{all_consuming, map_res};
use nom::multi::separated_list0;
use nom::sequence::{delimited, separated_pair};
use nom::IResult;

use crate::errors::{Result, VcfError};
use crate::schema::SchemaRegistry;
use crate::types::{
    FieldNumber, FieldValue, FilterStatus, GenotypeAllele, GenotypeCall, Header, HeaderContig,
    HeaderFilter, HeaderFormat, HeaderInfo, Variant, MISSING,
};

const FIXED_COLUMNS: [&str; 8] = [
    "#CHROM", "POS", "ID", "REF", "ALT", "QUAL", "FILTER", "INFO",
];

/// FORMAT tags skipped when likelihood decoding is disabled. Per-genotype
/// likelihood arrays grow combinatorially with the allele count, so skipping
/// them without decoding is the dominant saving on large cohort files.
pub(crate) const LIKELIHOOD_TAGS: [&str; 3] = ["GQ", "GL", "PL"];

// `Description="..."` values can contain commas and escaped quotes; the
// escaped text is kept as-is so the writer can emit it verbatim.
fn quoted(input: &str) -> IResult<&str, &str> {
    delimited(
        char('"'),
        nom::bytes::complete::escaped(none_of("\\\""), '\\', one_of("\"\\")),
        char('"'),
    )(input)
}

fn key_value(input: &str) -> IResult<&str, (&str, &str)> {
    separated_pair(is_not("<,=\n"), tag("="), alt((quoted, is_not(">,=\n"))))(input)
}

fn keys_and_values(input: &str) -> IResult<&str, Vec<(&str, &str)>> {
    separated_list0(tag(","), key_value)(input)
}

fn structured_body(input: &str) -> IResult<&str, Vec<(&str, &str)>> {
    all_consuming(delimited(tag("<"), keys_and_values, tag(">")))(input)
}

fn structured<'a>(value: &'a str, key: &str) -> Result<Vec<(&'a str, &'a str)>> {
    structured_body(value)
        .map(|(_, attrs)| attrs)
        .map_err(|_| VcfError::Schema(format!("malformed {} header line", key)))
}

/// Parses a header `Number` attribute value.
pub(crate) fn field_number(input: &str) -> Result<FieldNumber> {
    let count: IResult<&str, usize> =
        all_consuming(map_res(digit1, str::parse::<usize>))(input);
    if let Ok((_, n)) = count {
        return Ok(FieldNumber::Count(n));
    }
    match input {
        "A" => Ok(FieldNumber::AlternateAlleles),
        "R" => Ok(FieldNumber::Alleles),
        "G" => Ok(FieldNumber::Genotypes),
        "." => Ok(FieldNumber::Unknown),
        x => Err(VcfError::Schema(format!("unknown Number value '{}'", x))),
    }
}

fn parse_meta_line(rest: &str, header: &mut Header) -> Result<()> {
    let (key, value) = rest
        .split_once('=')
        .ok_or_else(|| VcfError::Parse(format!("malformed meta line '##{}'", rest)))?;
    match key {
        "fileformat" => header.fileformat = value.to_owned(),
        "INFO" => header.push_info(HeaderInfo::try_from(structured(value, key)?)?),
        "FORMAT" => header.push_format(HeaderFormat::try_from(structured(value, key)?)?),
        "FILTER" => header.push_filter(HeaderFilter::try_from(structured(value, key)?)?),
        "contig" => header.push_contig(HeaderContig::try_from(structured(value, key)?)?),
        _ => header.meta.push((key.to_owned(), value.to_owned())),
    }
    Ok(())
}

fn parse_column_line(line: &str, header: &mut Header) -> Result<()> {
    let columns = line.split('\t').collect_vec();
    if columns.len() < 8 || columns[..8] != FIXED_COLUMNS {
        return Err(VcfError::Parse(
            "malformed #CHROM column header line".into(),
        ));
    }
    if columns.len() > 8 {
        if columns[8] != "FORMAT" {
            return Err(VcfError::Parse(
                "column header line with samples but no FORMAT column".into(),
            ));
        }
        header.samples = columns[9..].iter().map(|s| (*s).to_owned()).collect();
    }
    Ok(())
}

/// Reads and parses the meta-line block up to and including the `#CHROM`
/// column line. Returns the header and the number of lines consumed.
///
/// Any error here is fatal for the open operation; a source without a
/// `#CHROM` line is not a VCF file.
pub fn parse_header<B: BufRead>(reader: &mut B) -> Result<(Header, u64)> {
    let mut header = Header::default();
    let mut lines = 0u64;
    let mut buf = String::new();
    loop {
        buf.clear();
        if reader.read_line(&mut buf)? == 0 {
            return Err(VcfError::Parse("missing #CHROM column header line".into()));
        }
        lines += 1;
        let line = buf.trim_end_matches(|c| c == '\r' || c == '\n');
        if let Some(rest) = line.strip_prefix("##") {
            parse_meta_line(rest, &mut header).map_err(|e| e.at_line(lines))?;
        } else if line.starts_with('#') {
            parse_column_line(line, &mut header).map_err(|e| e.at_line(lines))?;
            return Ok((header, lines));
        } else {
            return Err(
                VcfError::Parse("record line before #CHROM column header line".into())
                    .at_line(lines),
            );
        }
    }
}

/// Splits a `GT` value on `/` and `|`, recording the phasing of each
/// separator with the allele that follows it. A leading `|` marks the first
/// allele as phased.
pub(crate) fn parse_genotype(raw: &str) -> Result<Vec<GenotypeAllele>> {
    let (mut phased, mut rest) = match raw.strip_prefix('|') {
        Some(r) => (true, r),
        None => (false, raw),
    };
    let mut alleles = Vec::new();
    loop {
        let (token, next) = match rest.find(|c| c == '/' || c == '|') {
            Some(i) => (&rest[..i], Some((rest.as_bytes()[i] == b'|', &rest[i + 1..]))),
            None => (rest, None),
        };
        let allele = match (token, phased) {
            (MISSING, true) => GenotypeAllele::PhasedMissing,
            (MISSING, false) => GenotypeAllele::UnphasedMissing,
            (t, p) => {
                let index: i32 = t
                    .parse()
                    .map_err(|_| VcfError::Parse(format!("invalid genotype allele '{}'", t)))?;
                if p {
                    GenotypeAllele::Phased(index)
                } else {
                    GenotypeAllele::Unphased(index)
                }
            }
        };
        alleles.push(allele);
        match next {
            Some((p, r)) => {
                phased = p;
                rest = r;
            }
            None => break,
        }
    }
    Ok(alleles)
}

fn parse_info(column: &str, registry: &SchemaRegistry) -> Result<IndexMap<String, FieldValue>> {
    let mut info = IndexMap::new();
    if column == MISSING {
        return Ok(info);
    }
    for entry in column.split(';') {
        if entry.is_empty() {
            continue;
        }
        let (key, value) = match entry.split_once('=') {
            // a bare key (or an empty value) is a flag
            None => (entry, None),
            Some((key, "")) => (key, None),
            Some((key, value)) => (key, Some(value)),
        };
        let value = match value {
            None => FieldValue::Flag,
            Some(raw) => registry.decode_info(key, raw)?,
        };
        info.insert(key.to_owned(), value);
    }
    Ok(info)
}

fn parse_calls(
    columns: &[&str],
    registry: &SchemaRegistry,
    excluded: &HashSet<String>,
) -> Result<Vec<GenotypeCall>> {
    let keys = if columns[0] == MISSING {
        Vec::new()
    } else {
        columns[0].split(':').collect_vec()
    };
    columns[1..]
        .iter()
        .map(|column| {
            let mut call = GenotypeCall::default();
            // trailing FORMAT fields may be dropped from a sample column,
            // hence the zip instead of a length check
            for (key, raw) in keys.iter().zip(column.split(':')) {
                if excluded.contains(*key) {
                    // skipped entirely, the raw token is never decoded
                    continue;
                }
                let value = if *key == "GT" {
                    FieldValue::Genotype(parse_genotype(raw)?)
                } else {
                    registry.decode_format(key, raw)?
                };
                call.values.insert((*key).to_owned(), value);
            }
            Ok(call)
        })
        .collect()
}

/// Parses a single tab-delimited record line into a [`Variant`].
///
/// The column count must be exactly 8, or `9 + samples` when the header
/// declares samples; anything else is a [`VcfError::Parse`]. FORMAT keys in
/// `excluded` are skipped without decoding their values.
pub fn parse_record(
    line: &str,
    header: &Header,
    registry: &SchemaRegistry,
    excluded: &HashSet<String>,
) -> Result<Variant> {
    let columns = line.split('\t').collect_vec();
    let expected = if header.samples().is_empty() {
        8
    } else {
        9 + header.samples().len()
    };
    if columns.len() != expected {
        return Err(VcfError::Parse(format!(
            "expected {} tab-separated columns, found {}",
            expected,
            columns.len()
        )));
    }

    let pos = columns[1]
        .parse()
        .map_err(|_| VcfError::Parse(format!("invalid position '{}'", columns[1])))?;
    let ids = if columns[2] == MISSING {
        Vec::new()
    } else {
        columns[2].split(';').map(str::to_owned).collect_vec()
    };
    // unknown ALT encodings (symbolic or breakend alleles) stay literal
    let alt_alleles = if columns[4] == MISSING {
        Vec::new()
    } else {
        columns[4].split(',').map(str::to_owned).collect_vec()
    };
    let qual = if columns[5] == MISSING {
        None
    } else {
        Some(
            columns[5]
                .parse()
                .map_err(|_| VcfError::Parse(format!("invalid quality '{}'", columns[5])))?,
        )
    };
    let filters = match columns[6] {
        MISSING => FilterStatus::Missing,
        "PASS" => FilterStatus::Pass,
        other => FilterStatus::Fail(other.split(';').map(str::to_owned).collect_vec()),
    };
    let info = parse_info(columns[7], registry)?;
    let calls = if columns.len() > 8 {
        parse_calls(&columns[8..], registry, excluded)?
    } else {
        Vec::new()
    };

    Ok(Variant {
        chrom: columns[0].to_owned(),
        pos,
        ids,
        ref_allele: columns[3].to_owned(),
        alt_alleles,
        qual,
        filters,
        info,
        calls,
    })
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::types::FieldType;
    use std::io::Cursor;

    const HEADER: &str = "##fileformat=VCFv4.2\n\
        ##contig=<ID=chr1,length=1000>\n\
        ##FILTER=<ID=LowQual,Description=\"Low quality\">\n\
        ##INFO=<ID=DP,Number=1,Type=Integer,Description=\"Total depth\">\n\
        ##INFO=<ID=DB,Number=0,Type=Flag,Description=\"dbSNP membership\">\n\
        ##FORMAT=<ID=GT,Number=1,Type=String,Description=\"Genotype\">\n\
        ##FORMAT=<ID=PL,Number=G,Type=Integer,Description=\"Phred-scaled likelihoods\">\n\
        #CHROM\tPOS\tID\tREF\tALT\tQUAL\tFILTER\tINFO\tFORMAT\tS1\n";

    fn header_and_registry() -> (Header, SchemaRegistry) {
        let (header, _) = parse_header(&mut Cursor::new(HEADER)).unwrap();
        let registry = SchemaRegistry::from_header(&header);
        (header, registry)
    }

    #[test]
    fn test_parse_header() {
        let (header, lines) = parse_header(&mut Cursor::new(HEADER)).unwrap();
        assert_eq!(lines, 8);
        assert_eq!(header.fileformat(), "VCFv4.2");
        assert_eq!(header.contigs()["chr1"].length(), &Some(1000));
        assert_eq!(
            header.filters()["LowQual"].description(),
            "Low quality"
        );
        assert_eq!(header.infos()["DP"].kind(), &FieldType::Integer);
        assert_eq!(
            header.infos().keys().collect_vec(),
            vec!["DP", "DB"],
            "declaration order preserved"
        );
        assert_eq!(header.samples(), &vec!["S1".to_owned()]);
    }

    #[test]
    fn test_parse_header_quoted_description_with_commas() {
        let input = "##INFO=<ID=ANN,Number=.,Type=String,Description=\"Functional annotations: 'Allele, Annotation, Impact'\">\n\
            #CHROM\tPOS\tID\tREF\tALT\tQUAL\tFILTER\tINFO\n";
        let (header, _) = parse_header(&mut Cursor::new(input)).unwrap();
        assert_eq!(
            header.infos()["ANN"].description(),
            "Functional annotations: 'Allele, Annotation, Impact'"
        );
    }

    #[test]
    fn test_parse_header_unstructured_passthrough() {
        let input = "##fileformat=VCFv4.2\n\
            ##source=some_caller v1.2\n\
            ##ALT=<ID=DEL,Description=\"Deletion\">\n\
            #CHROM\tPOS\tID\tREF\tALT\tQUAL\tFILTER\tINFO\n";
        let (header, _) = parse_header(&mut Cursor::new(input)).unwrap();
        assert_eq!(
            header.meta(),
            &vec![
                ("source".to_owned(), "some_caller v1.2".to_owned()),
                ("ALT".to_owned(), "<ID=DEL,Description=\"Deletion\">".to_owned()),
            ]
        );
    }

    #[test]
    fn test_parse_header_missing_column_line() {
        let input = "##fileformat=VCFv4.2\n";
        assert!(parse_header(&mut Cursor::new(input)).is_err());
    }

    #[test]
    fn test_parse_header_missing_mandatory_attribute() {
        let input = "##INFO=<ID=DP,Number=1,Type=Integer>\n";
        let err = parse_header(&mut Cursor::new(input)).unwrap_err();
        assert!(matches!(err, VcfError::Schema(_)));
    }

    #[test]
    fn test_parse_record_scenario() {
        let (header, registry) = header_and_registry();
        let v = parse_record(
            "chr1\t100\t.\tA\tT\t30.0\tPASS\tDP=10\tGT\t0/1",
            &header,
            &registry,
            &HashSet::new(),
        )
        .unwrap();
        assert_eq!(v.chrom, "chr1");
        assert_eq!(v.pos, 100);
        assert!(v.ids.is_empty());
        assert_eq!(v.ref_allele, "A");
        assert_eq!(v.alt_alleles, vec!["T".to_owned()]);
        assert_eq!(v.qual, Some(30.0));
        assert_eq!(v.filters, FilterStatus::Pass);
        assert_eq!(v.info["DP"], FieldValue::Integer(vec![Some(10)]));
        assert_eq!(
            v.calls[0].genotype().unwrap(),
            &[GenotypeAllele::Unphased(0), GenotypeAllele::Unphased(1)]
        );
    }

    #[test]
    fn test_parse_record_column_count_mismatch() {
        let (header, registry) = header_and_registry();
        let err = parse_record(
            "chr1\t100\t.\tA\tT\t30.0\tPASS",
            &header,
            &registry,
            &HashSet::new(),
        )
        .unwrap_err();
        assert!(matches!(err, VcfError::Parse(_)));
    }

    #[test]
    fn test_parse_record_missing_values() {
        let (header, registry) = header_and_registry();
        let v = parse_record(
            "chr1\t100\t.\tA\t.\t.\t.\t.\tGT\t./.",
            &header,
            &registry,
            &HashSet::new(),
        )
        .unwrap();
        assert!(v.alt_alleles.is_empty());
        assert_eq!(v.qual, None, "missing QUAL is not 0.0");
        assert_eq!(v.filters, FilterStatus::Missing);
        assert!(v.info.is_empty());
        assert_eq!(
            v.calls[0].genotype().unwrap(),
            &[
                GenotypeAllele::UnphasedMissing,
                GenotypeAllele::UnphasedMissing
            ]
        );
    }

    #[test]
    fn test_parse_record_info_flag_and_undeclared() {
        let (header, registry) = header_and_registry();
        let v = parse_record(
            "chr1\t100\t.\tA\tT\t.\tPASS\tDB;DP=7;XX=a,b\t.\t.",
            &header,
            &registry,
            &HashSet::new(),
        )
        .unwrap();
        assert!(v.has_flag("DB"));
        assert_eq!(v.info["DP"], FieldValue::Integer(vec![Some(7)]));
        assert_eq!(
            v.info["XX"],
            FieldValue::String(vec!["a".to_owned(), "b".to_owned()]),
            "undeclared fields are retained as opaque strings"
        );
    }

    #[test]
    fn test_parse_genotype_phasing() {
        assert_eq!(
            parse_genotype("0|1").unwrap(),
            vec![GenotypeAllele::Unphased(0), GenotypeAllele::Phased(1)]
        );
        assert_eq!(
            parse_genotype("0/1|2").unwrap(),
            vec![
                GenotypeAllele::Unphased(0),
                GenotypeAllele::Unphased(1),
                GenotypeAllele::Phased(2)
            ]
        );
        assert_eq!(
            parse_genotype("|1").unwrap(),
            vec![GenotypeAllele::Phased(1)]
        );
        assert_eq!(
            parse_genotype(".|.").unwrap(),
            vec![
                GenotypeAllele::UnphasedMissing,
                GenotypeAllele::PhasedMissing
            ]
        );
        assert!(parse_genotype("x/1").is_err());
    }

    #[test]
    fn test_excluded_format_field_is_never_decoded() {
        let (header, registry) = header_and_registry();
        let excluded: HashSet<String> = LIKELIHOOD_TAGS.iter().map(|t| (*t).to_owned()).collect();
        // PL value would fail integer decoding, proving it is skipped rather
        // than decoded and discarded
        let line = "chr1\t100\t.\tA\tT\t30.0\tPASS\tDP=10\tGT:PL\t0/1:not_a_number";
        let v = parse_record(line, &header, &registry, &excluded).unwrap();
        assert!(v.calls[0].get("PL").is_none());
        assert!(v.calls[0].genotype().is_some());
        // and with nothing excluded the same line is an error
        assert!(parse_record(line, &header, &registry, &HashSet::new()).is_err());
    }
}
