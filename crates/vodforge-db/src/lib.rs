//! Vodforge-DB: schema, migrations, queries and retryable transactions.
//!
//! This crate provides persistence for vodforge using SQLite with rusqlite
//! and r2d2 connection pooling.
//!
//! # Modules
//!
//! - `migrations` - Embedded schema migrations
//! - `pool` - Connection pool management
//! - `models` - Rust models matching the database schema
//! - `queries` - Per-table query operations
//! - `transaction` - Transactions retried on serialization conflicts
//!
//! # Example
//!
//! ```no_run
//! use vodforge_common::{AssetState, UserId};
//! use vodforge_db::models::NewAsset;
//! use vodforge_db::pool::init_pool;
//! use vodforge_db::queries::assets;
//! use vodforge_db::transaction::{with_retry, RetryPolicy};
//!
//! # async fn run() {
//! let pool = init_pool("/var/lib/vodforge/vodforge.db").unwrap();
//! let asset = with_retry(&pool, &RetryPolicy::default(), |tx| {
//!     assets::create_asset(tx, &NewAsset::new(UserId::new(), "clip", AssetState::Editing))
//! })
//! .await
//! .unwrap();
//! println!("Created asset {}", asset.id);
//! # }
//! ```

pub mod migrations;
pub mod models;
pub mod pool;
pub mod queries;
pub mod transaction;
