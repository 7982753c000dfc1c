//! Benchmark-only crate; see `benches/pipeline_bench.rs`.
