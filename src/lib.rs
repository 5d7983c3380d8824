pub mod container;
pub mod errors;
pub mod index;
pub mod parser;
pub mod reader;
pub mod schema;
pub mod types;
pub mod writer;

pub use errors::{Result, VcfError};
pub use reader::{ReadOptions, VariantReader, VcfReader};
pub use types::{
    FieldNumber, FieldType, FieldValue, FilterStatus, GenotypeAllele, GenotypeCall, Header, Region,
    Variant,
};
pub use writer::{VariantWriter, VcfWriter, WriteOptions};
