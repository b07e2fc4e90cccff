//! # ytconv
//!
//! This crate resolves YouTube links into direct MP3 or MP4 download URLs by
//! driving a third-party conversion service the same way its web page does.
//!
//! ## Usage
//!
//! A [`converter::Converter`] owns the config cache and the protocol client.
//! Build one per process and share it; concurrent resolves share a single
//! config fetch.
//!
//! ```rust,no_run
//! use std::{path::Path, sync::Arc};
//!
//! use ytconv::{
//!     converter::Converter, options::Options, protocol::Format, stats::DownloadStatistics,
//!     util::HttpClient,
//! };
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let options = Options::from_env();
//!
//!     // Cookie aware reqwest clients with the browser headers the API expects
//!     let client = Arc::new(HttpClient::new(&options)?);
//!     let converter = Converter::new(client.clone(), &options);
//!
//!     // Init, convert and poll until the file is ready
//!     let res = converter
//!         .resolve("https://youtu.be/dQw4w9WgXcQ", Format::Audio)
//!         .await?;
//!     println!("{} -> {}", res.filename, res.download_url);
//!
//!     // Stream the bytes to disk
//!     let mut stats = DownloadStatistics::new();
//!     client
//!         .download_file(&res.download_url, Path::new(&res.filename), &mut stats)
//!         .await?;
//!     Ok(())
//! }
//! ```
//!
//! The config table is scraped from the converter's landing page without
//! running any script; see [`literal`] for the accepted grammar and [`auth`]
//! for how the request token is derived from it.

#[forbid(unsafe_code)]
#[macro_use]
extern crate log;

pub mod auth;
pub mod cache;
pub mod config;
pub mod converter;
pub mod error;
pub mod literal;
pub mod media;
pub mod options;
pub mod page;
pub mod protocol;
pub mod stats;
pub mod transport;
pub mod util;
pub mod youtube;

pub use error::Error;
