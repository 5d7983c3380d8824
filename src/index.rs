//! Region-index capability used by [`crate::reader::VcfReader::query`].
//!
//! The index is an external collaborator: all the query path needs is
//! [`RecordIndex::find_candidates`], which maps a region to candidate byte
//! ranges of the uncompressed record stream. Resolution may be approximate;
//! the query path applies a final position-overlap check per record.

use std::fs::File;
use std::io::{BufRead, BufReader};
use std::ops::Range;
use std::path::{Path, PathBuf};

use itertools::Itertools;

use crate::errors::{Result, VcfError};
use crate::types::Region;

pub trait RecordIndex {
    /// Byte ranges of the record stream that may contain records overlapping
    /// `region`. Ranges must be line-aligned but may over-approximate.
    fn find_candidates(&self, region: &Region) -> Vec<Range<u64>>;
}

#[derive(Debug, Clone)]
struct IndexBin {
    contig: String,
    start: u32,
    end: u32,
    bytes: Range<u64>,
}

/// A simple linear binning index read from a tab-separated sidecar file
/// (`<path>.vidx`): one bin per line as
/// `contig <TAB> start <TAB> end <TAB> byte_start <TAB> byte_end`, positions
/// half-open over 1-based coordinates, byte offsets into the uncompressed
/// stream.
#[derive(Debug, Clone, Default)]
pub struct LinearIndex {
    bins: Vec<IndexBin>,
}

impl LinearIndex {
    pub const SIDECAR_SUFFIX: &'static str = ".vidx";

    /// Filename-based discovery: looks for `<path>.vidx` next to the data
    /// file. A missing sidecar is not an error.
    pub fn discover(path: &Path) -> Result<Option<Self>> {
        let mut sidecar = path.as_os_str().to_owned();
        sidecar.push(Self::SIDECAR_SUFFIX);
        let sidecar = PathBuf::from(sidecar);
        if !sidecar.exists() {
            return Ok(None);
        }
        Self::from_path(&sidecar).map(Some)
    }

    pub fn from_path<P: AsRef<Path>>(path: P) -> Result<Self> {
        Self::from_reader(BufReader::new(File::open(path)?))
    }

    pub fn from_reader<B: BufRead>(reader: B) -> Result<Self> {
        let mut bins = Vec::new();
        for (i, line) in reader.lines().enumerate() {
            let line = line?;
            let line = line.trim();
            if line.is_empty() || line.starts_with('#') {
                continue;
            }
            let fields = line.split('\t').collect_vec();
            if fields.len() != 5 {
                return Err(VcfError::Parse(format!(
                    "index line {}: expected 5 tab-separated fields, found {}",
                    i + 1,
                    fields.len()
                )));
            }
            let number = |field: &str| -> Result<u64> {
                field.parse().map_err(|_| {
                    VcfError::Parse(format!("index line {}: invalid number '{}'", i + 1, field))
                })
            };
            bins.push(IndexBin {
                contig: fields[0].to_owned(),
                start: number(fields[1])? as u32,
                end: number(fields[2])? as u32,
                bytes: number(fields[3])?..number(fields[4])?,
            });
        }
        Ok(LinearIndex { bins })
    }

    pub fn is_empty(&self) -> bool {
        self.bins.is_empty()
    }
}

impl RecordIndex for LinearIndex {
    fn find_candidates(&self, region: &Region) -> Vec<Range<u64>> {
        self.bins
            .iter()
            .filter(|bin| {
                bin.contig == region.contig && bin.start < region.end && bin.end > region.start
            })
            .map(|bin| bin.bytes.clone())
            .collect()
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use std::io::Cursor;

    const SIDECAR: &str = "chr1\t1\t500\t0\t120\n\
        chr1\t500\t1000\t120\t300\n\
        chr2\t1\t1000\t300\t450\n";

    #[test]
    fn test_parse_sidecar() {
        let index = LinearIndex::from_reader(Cursor::new(SIDECAR)).unwrap();
        assert!(!index.is_empty());
        assert_eq!(index.bins.len(), 3);
    }

    #[test]
    fn test_find_candidates_overlap() {
        let index = LinearIndex::from_reader(Cursor::new(SIDECAR)).unwrap();
        assert_eq!(
            index.find_candidates(&Region::new("chr1", 400, 600)),
            vec![0..120, 120..300]
        );
        assert_eq!(
            index.find_candidates(&Region::new("chr2", 10, 20)),
            vec![300..450]
        );
        assert!(index
            .find_candidates(&Region::new("chr3", 1, 1000))
            .is_empty());
    }

    #[test]
    fn test_malformed_sidecar() {
        assert!(LinearIndex::from_reader(Cursor::new("chr1\t1\t2\n")).is_err());
        assert!(LinearIndex::from_reader(Cursor::new("chr1\t1\t2\tx\t9\n")).is_err());
    }
}
