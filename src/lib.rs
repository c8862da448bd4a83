//! # umeta
//!
//! A local-first metadata index for object stores.
//!
//! umeta mirrors the bucket/directory/file hierarchy of configured sources
//! into SQLite, keeps an append-only revision log of every change, and runs
//! generators that produce derivatives (checksums, extracted metadata) only
//! for objects whose inputs changed since the last successful run.
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────┐   ┌─────────────┐   ┌───────────────────┐
//! │   Sources   │──▶│   Indexer   │──▶│      SQLite       │
//! │ disk / ...  │   │  hierarchy  │   │ objects+revisions │
//! └─────────────┘   └─────────────┘   └─────────┬─────────┘
//!                                               │
//!                   ┌─────────────┐   ┌─────────▼─────────┐
//!                   │ Generators  │◀──│    Coordinator    │
//!                   │ checksum/.. │   │ staleness resolve │
//!                   └─────────────┘   └───────────────────┘
//! ```
//!
//! ## Quick Start
//!
//! ```bash
//! umeta init                    # create database
//! umeta index photos            # mirror a source
//! umeta generate --name photos  # compute new or stale derivatives
//! umeta ls --bucket holiday     # browse a bucket
//! ```
//!
//! ## Modules
//!
//! | Module | Purpose |
//! |--------|---------|
//! | [`config`] | TOML configuration parsing |
//! | [`db`] | Database connection |
//! | [`migrate`] | Schema migrations |
//! | [`error`] | Error taxonomy |
//! | [`models`] | Core data types |
//! | [`hierarchy`] | Object hierarchy store |
//! | [`revisions`] | Revision ledger |
//! | [`runs`] | Reindex and generator run rows |
//! | [`indexer`] | Source indexing |
//! | [`staleness`] | Dependency staleness resolution |
//! | [`generate`] | Generator run coordination |
//! | [`traits`] | Source adapter and generator traits |
//! | [`source_disk`] | Local filesystem source |
//! | [`generator_checksum`] | SHA-256 generator |
//! | [`progress`] | Progress reporting |
//! | [`listing`] | Source, bucket, and tree views |

pub mod config;
pub mod db;
pub mod error;
pub mod generate;
pub mod generator_checksum;
pub mod hierarchy;
pub mod indexer;
pub mod listing;
pub mod migrate;
pub mod models;
pub mod progress;
pub mod revisions;
pub mod runs;
pub mod source_disk;
pub mod staleness;
pub mod traits;

#[cfg(test)]
mod testutil;
