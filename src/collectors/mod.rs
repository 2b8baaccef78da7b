//! Collectors module
//!
//! The collector SDK: the `Collector` trait every source implements, the
//! registry that wires collectors up from configuration, the framework that
//! runs them against the store, and the individual source implementations.

pub mod arxiv;
pub mod companies_house;
pub mod crunchbase;
pub mod domain_rdap;
pub mod framework;
pub mod github_activity;
pub mod hacker_news;
pub mod job_postings;
pub mod product_hunt;
pub mod registry;
pub mod sec_edgar;
pub mod trait_;
pub mod uspto;

pub use framework::run_collector;
pub use registry::{build_registry, CollectorRegistry, RegistryError};
pub use trait_::{CandidateSignal, Collector, CollectorResult, CollectorStatus, LookbackWindow};
