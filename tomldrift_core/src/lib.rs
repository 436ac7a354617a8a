pub mod adapter;
pub mod compare;
pub mod config;
pub mod corpus;
pub mod oracle;
pub mod value;

pub use adapter::{
    AdapterError, CommandAdapter, CommandAdapterConfig, DecodeOutcome, DecoderAdapter,
    InputDelivery,
};
pub use compare::{Mismatch, compare};
pub use config::{CompareMode, HarnessConfig};
pub use corpus::{CorpusEntry, CorpusError, SEED_LITERALS, SeedCorpus};
pub use oracle::{DivergenceOracle, DivergenceReport, RoundError, RoundVerdict};
pub use value::{CanonicalValue, DatetimeKind, ValueError};
