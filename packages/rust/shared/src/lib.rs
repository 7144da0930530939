//! Shared types, error model, matching utilities, and configuration for OrgScope.
//!
//! This crate is the foundation depended on by all other OrgScope crates.
//! It provides:
//! - [`OrgScopeError`] — the unified error type
//! - Domain types ([`BusinessUnit`], [`ExtractedPerson`], [`Position`],
//!   [`LeadershipChange`], [`OrgChartSnapshot`], [`UnitId`])
//! - Name/title normalization and similarity ([`matching`])
//! - The classification capability contract ([`Classifier`])
//! - Configuration ([`AppConfig`], [`CollectionConfig`], config loading)

pub mod classify;
pub mod config;
pub mod error;
pub mod matching;
pub mod types;

// Re-export public API at crate root for ergonomic imports.
pub use classify::{Classifier, ClassifyTask, NullClassifier};
pub use config::{
    AppConfig, ClassifierConfig, CollectionConfig, CollectionPoliciesConfig, DefaultsConfig,
    RegistryConfig, config_dir, config_file_path, init_config, load_config, load_config_from,
};
pub use error::{OrgScopeError, Result};
pub use types::{
    BusinessUnit, ChangeType, Collected, CollectionResult, Confidence, DiscoverySource,
    ExtractedPerson, LeadershipChange, OrgChartSnapshot, OrgNode, Position, TitleLevel, UnitId,
    UnitType,
};
