#![allow(unused_imports)]

pub mod catalog;
pub mod client;
pub mod config;
pub mod inventory;
pub mod pricing;

pub use catalog::{BrandRef, CategoryRef, ProductRef, SkuDetail};
pub use client::{FetchError, NotFound, RetryPolicy, Scope, VtexClient};
pub use inventory::StockSummary;
