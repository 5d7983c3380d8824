use std::time::Instant;

use anyhow::{Context, Result};
use itertools::Itertools;

use rust_vcf::reader::{ReadOptions, VariantReader};

fn main() -> Result<()> {
    let path = std::env::args()
        .nth(1)
        .context("usage: main <variants.vcf[.gz]|variants.records>")?;

    let now = Instant::now();
    let reader = VariantReader::from_path(&path, ReadOptions::default())?;
    let counts = itertools::process_results(reader, |records| {
        records.map(|record| record.chrom).counts()
    })?;
    dbg!(now.elapsed());

    for (chrom, count) in counts.iter().sorted() {
        println!("{}\t{}", chrom, count);
    }

    Ok(())
}
