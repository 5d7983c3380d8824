use std::collections::HashSet;
use std::io::{self, BufRead, BufReader, Read};
use std::ops::Range;
use std::path::{Path, PathBuf};

use crate::container::ContainerReader;
use crate::errors::{Result, VcfError};
use crate::index::{LinearIndex, RecordIndex};
use crate::parser::{self, LIKELIHOOD_TAGS};
use crate::schema::SchemaRegistry;
use crate::types::{Header, Region, Variant};

/// Options controlling how a VCF source is opened.
#[derive(Debug, Clone, Copy)]
pub struct ReadOptions {
    /// Enables region queries, attempting filename-based index discovery at
    /// open time. A missing index surfaces as a configuration error at query
    /// time, not at open time.
    pub use_index: bool,
    /// Enables full genotype-quality/likelihood decoding (`GQ`, `GL`, `PL`).
    /// When disabled those FORMAT fields are skipped without decoding, which
    /// is the dominant cost on large cohort files.
    pub include_likelihoods: bool,
}

impl Default for ReadOptions {
    fn default() -> Self {
        ReadOptions {
            use_index: true,
            include_likelihoods: false,
        }
    }
}

pub(crate) fn is_vcf_path(path: &Path) -> bool {
    let name = match path.file_name().and_then(|n| n.to_str()) {
        Some(name) => name,
        None => return false,
    };
    // compression suffix is orthogonal to format selection
    let name = name.strip_suffix(".gz").unwrap_or(name);
    name.ends_with(".vcf")
}

/// Reader for native VCF input, optionally gzip-compressed.
///
/// The header is parsed at open time; a header error means the open fails
/// and no partially-open reader is exposed. Iteration yields one
/// `Result<Variant>` per record line, surfacing malformed records at the
/// point they would be yielded instead of skipping them.
///
/// A single reader is not safe for concurrent use; independent readers over
/// the same file are, since they share no state.
pub struct VcfReader {
    header: Header,
    registry: SchemaRegistry,
    excluded: HashSet<String>,
    inner: Option<BufReader<Box<dyn Read>>>,
    path: Option<PathBuf>,
    index: Option<Box<dyn RecordIndex>>,
    line: u64,
    buf: String,
}

impl VcfReader {
    /// Opens a (possibly gzip-compressed) VCF file. With
    /// [`ReadOptions::use_index`] set, a `<path>.vidx` sidecar index is
    /// discovered if present.
    pub fn from_path<P: AsRef<Path>>(path: P, options: ReadOptions) -> Result<Self> {
        let (reader, _format) = niffler::from_path(path.as_ref())?;
        let mut this = Self::from_reader(reader, options)?;
        this.path = Some(path.as_ref().to_owned());
        if options.use_index {
            this.index = LinearIndex::discover(path.as_ref())?
                .map(|index| Box::new(index) as Box<dyn RecordIndex>);
        }
        Ok(this)
    }

    /// Opens a VCF stream. Streams cannot be region-queried.
    pub fn from_reader<R: Read + 'static>(reader: R, options: ReadOptions) -> Result<Self> {
        let mut inner = BufReader::new(Box::new(reader) as Box<dyn Read>);
        let (header, line) = parser::parse_header(&mut inner)?;
        let registry = SchemaRegistry::from_header(&header);
        let excluded = if options.include_likelihoods {
            HashSet::new()
        } else {
            LIKELIHOOD_TAGS.iter().map(|tag| (*tag).to_owned()).collect()
        };
        Ok(VcfReader {
            header,
            registry,
            excluded,
            inner: Some(inner),
            path: None,
            index: None,
            line,
            buf: String::new(),
        })
    }

    pub fn header(&self) -> &Header {
        &self.header
    }

    pub fn has_index(&self) -> bool {
        self.index.is_some()
    }

    /// Installs an externally supplied index capability, replacing any
    /// discovered one.
    pub fn set_index(&mut self, index: Box<dyn RecordIndex>) {
        self.index = Some(index);
    }

    /// Returns a lazy sequence of the variants overlapping `region`.
    ///
    /// Legal only on an open, indexed, file-backed reader; each call opens
    /// its own scoped handle, so queries are restartable per call and never
    /// disturb (or close) the underlying iteration stream. Index candidates
    /// may over-approximate; a final overlap check drops false positives.
    pub fn query(&self, region: &Region) -> Result<Query<'_>> {
        if self.inner.is_none() {
            return Err(VcfError::Configuration("query on closed reader".into()));
        }
        let index = self.index.as_ref().ok_or_else(|| {
            VcfError::Configuration(
                "region query requires an index; open with use_index and an index present".into(),
            )
        })?;
        let path = self.path.as_ref().ok_or_else(|| {
            VcfError::Configuration("region query requires a file-backed reader".into())
        })?;

        let mut ranges = index.find_candidates(region);
        ranges.sort_by_key(|range| range.start);
        // merge overlapping candidates so every byte is visited once
        let mut merged: Vec<Range<u64>> = Vec::with_capacity(ranges.len());
        for range in ranges {
            match merged.last_mut() {
                Some(last) if range.start <= last.end => last.end = last.end.max(range.end),
                _ => merged.push(range),
            }
        }

        let (reader, _format) = niffler::from_path(path)?;
        Ok(Query {
            reader: self,
            inner: BufReader::new(reader),
            ranges: merged,
            current: 0,
            offset: 0,
            region: region.clone(),
            buf: String::new(),
        })
    }

    /// Releases the underlying handle. Idempotent, reachable from any state.
    pub fn close(&mut self) -> Result<()> {
        self.inner.take();
        Ok(())
    }
}

impl Iterator for VcfReader {
    type Item = Result<Variant>;

    fn next(&mut self) -> Option<Self::Item> {
        loop {
            self.buf.clear();
            let n = match self.inner.as_mut()?.read_line(&mut self.buf) {
                Ok(n) => n,
                Err(e) => return Some(Err(e.into())),
            };
            if n == 0 {
                return None;
            }
            self.line += 1;
            let line = self.buf.trim_end_matches(|c| c == '\r' || c == '\n');
            if line.is_empty() {
                continue;
            }
            let line_number = self.line;
            return Some(
                parser::parse_record(line, &self.header, &self.registry, &self.excluded)
                    .map_err(|e| e.at_line(line_number)),
            );
        }
    }
}

/// Lazy sequence of parsed variants overlapping one queried region.
///
/// Owns its own file handle; dropping (or exhausting) it releases per-query
/// resources without touching the parent reader.
pub struct Query<'a> {
    reader: &'a VcfReader,
    inner: BufReader<Box<dyn Read>>,
    ranges: Vec<Range<u64>>,
    current: usize,
    offset: u64,
    region: Region,
    buf: String,
}

impl<'a> std::fmt::Debug for Query<'a> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Query")
            .field("ranges", &self.ranges)
            .field("current", &self.current)
            .field("offset", &self.offset)
            .field("region", &self.region)
            .finish_non_exhaustive()
    }
}

fn skip_bytes<R: BufRead>(reader: &mut R, n: u64) -> io::Result<u64> {
    io::copy(&mut reader.by_ref().take(n), &mut io::sink())
}

impl<'a> Iterator for Query<'a> {
    type Item = Result<Variant>;

    fn next(&mut self) -> Option<Self::Item> {
        loop {
            let range = self.ranges.get(self.current)?.clone();
            if self.offset < range.start {
                match skip_bytes(&mut self.inner, range.start - self.offset) {
                    Ok(skipped) if skipped < range.start - self.offset => return None,
                    Ok(_) => self.offset = range.start,
                    Err(e) => return Some(Err(e.into())),
                }
            }
            if self.offset >= range.end {
                self.current += 1;
                continue;
            }
            self.buf.clear();
            let n = match self.inner.read_line(&mut self.buf) {
                Ok(n) => n,
                Err(e) => return Some(Err(e.into())),
            };
            if n == 0 {
                return None;
            }
            self.offset += n as u64;
            let line = self.buf.trim_end_matches(|c| c == '\r' || c == '\n');
            // a coarse candidate range may include header bytes
            if line.is_empty() || line.starts_with('#') {
                continue;
            }
            match parser::parse_record(
                line,
                &self.reader.header,
                &self.reader.registry,
                &self.reader.excluded,
            ) {
                // index false positives fail the exact overlap check
                Ok(variant) if variant.overlaps(&self.region) => return Some(Ok(variant)),
                Ok(_) => continue,
                Err(e) => return Some(Err(e)),
            }
        }
    }
}

/// Extension-dispatching reader over the closed set of storage formats,
/// resolved once at construction.
pub enum VariantReader {
    Vcf(VcfReader),
    Container(ContainerReader),
}

impl VariantReader {
    /// Selects native VCF when the file name (after stripping an optional
    /// `.gz`) ends in `.vcf`, the binary record container otherwise.
    pub fn from_path<P: AsRef<Path>>(path: P, options: ReadOptions) -> Result<Self> {
        if is_vcf_path(path.as_ref()) {
            Ok(VariantReader::Vcf(VcfReader::from_path(path, options)?))
        } else {
            Ok(VariantReader::Container(ContainerReader::from_path(path)?))
        }
    }

    pub fn header(&self) -> &Header {
        match self {
            VariantReader::Vcf(reader) => reader.header(),
            VariantReader::Container(reader) => reader.header(),
        }
    }

    pub fn query(&self, region: &Region) -> Result<Query<'_>> {
        match self {
            VariantReader::Vcf(reader) => reader.query(region),
            VariantReader::Container(_) => Err(VcfError::Configuration(
                "region queries are not supported on container inputs".into(),
            )),
        }
    }

    pub fn close(&mut self) -> Result<()> {
        match self {
            VariantReader::Vcf(reader) => reader.close(),
            VariantReader::Container(reader) => reader.close(),
        }
    }
}

impl Iterator for VariantReader {
    type Item = Result<Variant>;

    fn next(&mut self) -> Option<Self::Item> {
        match self {
            VariantReader::Vcf(reader) => reader.next(),
            VariantReader::Container(reader) => reader.next(),
        }
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::types::{FieldValue, FilterStatus};
    use std::io::Cursor;
    use std::io::Write;

    const INPUT: &str = "##fileformat=VCFv4.2\n\
        ##contig=<ID=chr1,length=1000>\n\
        ##INFO=<ID=DP,Number=1,Type=Integer,Description=\"Total depth\">\n\
        ##FORMAT=<ID=GT,Number=1,Type=String,Description=\"Genotype\">\n\
        ##FORMAT=<ID=PL,Number=G,Type=Integer,Description=\"Phred-scaled likelihoods\">\n\
        #CHROM\tPOS\tID\tREF\tALT\tQUAL\tFILTER\tINFO\tFORMAT\tS1\n\
        chr1\t100\t.\tA\tT\t30.0\tPASS\tDP=10\tGT\t0/1\n\
        chr1\t200\trs1\tC\tG\t.\t.\tDP=3\tGT\t1|1\n\
        chr1\t300\t.\tACGT\tA\t12.5\tPASS\tDP=8\tGT\t0/1\n";

    #[test]
    fn test_iterate() {
        let reader = VcfReader::from_reader(Cursor::new(INPUT), ReadOptions::default()).unwrap();
        let variants: Vec<_> = reader.map(|r| r.unwrap()).collect();
        assert_eq!(variants.len(), 3);
        assert_eq!(variants[0].pos, 100);
        assert_eq!(variants[1].ids, vec!["rs1".to_owned()]);
        assert_eq!(variants[1].filters, FilterStatus::Missing);
        assert_eq!(variants[2].info["DP"], FieldValue::Integer(vec![Some(8)]));
    }

    #[test]
    fn test_malformed_record_surfaced_not_skipped() {
        let input = format!("{}chr1\t400\t.\tA\n", INPUT);
        let mut reader =
            VcfReader::from_reader(Cursor::new(input), ReadOptions::default()).unwrap();
        for _ in 0..3 {
            assert!(reader.next().unwrap().is_ok());
        }
        let err = reader.next().unwrap().unwrap_err();
        assert!(matches!(err, VcfError::Parse(_)));
        assert!(err.to_string().contains("line 10"));
        assert!(reader.next().is_none());
    }

    #[test]
    fn test_close_is_idempotent_and_ends_iteration() {
        let mut reader =
            VcfReader::from_reader(Cursor::new(INPUT), ReadOptions::default()).unwrap();
        assert!(reader.next().is_some());
        reader.close().unwrap();
        reader.close().unwrap();
        assert!(reader.next().is_none());
        assert!(matches!(
            reader.query(&Region::new("chr1", 1, 10)).unwrap_err(),
            VcfError::Configuration(_)
        ));
    }

    #[test]
    fn test_query_without_index_is_lazy_configuration_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("sample.vcf");
        std::fs::write(&path, INPUT).unwrap();
        // open succeeds even though no index exists
        let reader = VcfReader::from_path(&path, ReadOptions::default()).unwrap();
        assert!(!reader.has_index());
        assert!(matches!(
            reader.query(&Region::new("chr1", 1, 1000)).unwrap_err(),
            VcfError::Configuration(_)
        ));
    }

    // Over-approximates every candidate to the whole file; exact results
    // must come from the final overlap check.
    struct WholeFileIndex(u64);

    impl RecordIndex for WholeFileIndex {
        fn find_candidates(&self, _region: &Region) -> Vec<Range<u64>> {
            vec![0..self.0]
        }
    }

    #[test]
    fn test_query_filters_index_false_positives() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("sample.vcf");
        std::fs::write(&path, INPUT).unwrap();
        let mut reader = VcfReader::from_path(&path, ReadOptions::default()).unwrap();
        reader.set_index(Box::new(WholeFileIndex(INPUT.len() as u64)));

        let hits: Vec<_> = reader
            .query(&Region::new("chr1", 150, 301))
            .unwrap()
            .map(|r| r.unwrap())
            .collect();
        assert_eq!(
            hits.iter().map(|v| v.pos).collect::<Vec<_>>(),
            vec![200, 300]
        );

        // [300, 304) overlaps the 4bp deletion record only
        let hits: Vec<_> = reader
            .query(&Region::new("chr1", 301, 302))
            .unwrap()
            .map(|r| r.unwrap())
            .collect();
        assert_eq!(hits.iter().map(|v| v.pos).collect::<Vec<_>>(), vec![300]);

        // queries are restartable and do not disturb plain iteration
        assert_eq!(reader.by_ref().map(|r| r.unwrap()).count(), 3);
    }

    #[test]
    fn test_sidecar_index_discovery() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("sample.vcf");
        std::fs::write(&path, INPUT).unwrap();
        // one coarse bin covering the whole file
        let mut sidecar = std::fs::File::create(dir.path().join("sample.vcf.vidx")).unwrap();
        writeln!(sidecar, "chr1\t1\t1000\t0\t{}", INPUT.len()).unwrap();
        drop(sidecar);

        let reader = VcfReader::from_path(&path, ReadOptions::default()).unwrap();
        assert!(reader.has_index());
        let hits: Vec<_> = reader
            .query(&Region::new("chr1", 100, 101))
            .unwrap()
            .map(|r| r.unwrap())
            .collect();
        assert_eq!(hits.iter().map(|v| v.pos).collect::<Vec<_>>(), vec![100]);
    }

    #[test]
    fn test_likelihoods_excluded_by_default() {
        let input = "##fileformat=VCFv4.2\n\
            ##FORMAT=<ID=GT,Number=1,Type=String,Description=\"Genotype\">\n\
            ##FORMAT=<ID=PL,Number=G,Type=Integer,Description=\"Phred-scaled likelihoods\">\n\
            #CHROM\tPOS\tID\tREF\tALT\tQUAL\tFILTER\tINFO\tFORMAT\tS1\n\
            chr1\t100\t.\tA\tT\t30.0\tPASS\t.\tGT:PL\t0/1:broken\n";
        let mut reader =
            VcfReader::from_reader(Cursor::new(input), ReadOptions::default()).unwrap();
        let variant = reader.next().unwrap().unwrap();
        assert!(variant.calls[0].get("PL").is_none());

        let mut reader = VcfReader::from_reader(
            Cursor::new(input),
            ReadOptions {
                include_likelihoods: true,
                ..ReadOptions::default()
            },
        )
        .unwrap();
        assert!(reader.next().unwrap().is_err());
    }

    #[test]
    fn test_extension_dispatch() {
        assert!(is_vcf_path(Path::new("sample.vcf")));
        assert!(is_vcf_path(Path::new("sample.vcf.gz")));
        assert!(!is_vcf_path(Path::new("sample.bin")));
        assert!(!is_vcf_path(Path::new("sample.bin.gz")));
        assert!(!is_vcf_path(Path::new("sample.gz")));
    }
}
