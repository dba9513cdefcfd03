mod common;
mod enrichment_tests;
mod orchestrator_tests;
