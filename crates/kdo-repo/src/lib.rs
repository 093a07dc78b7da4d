//! Chart acquisition for kdo
//!
//! Turns a chart reference into a chart directory on local disk:
//!
//! - **Local directories** are used in place
//! - **Archives** (`.tgz`, `.tar.gz`, `.zip`) are extracted to a temporary
//!   directory that lives as long as the [`ResolvedChart`]
//! - **URLs** (`http://`, `https://`) are downloaded, then extracted
//! - **Catalog aliases** (`catalog:<alias>`) are looked up in the catalog file
//!
//! Every reference also yields a genus, the chart family shared by all its
//! versions, and the version when the reference carries one.
//!
//! ```rust,no_run
//! use kdo_repo::Resolver;
//!
//! # async fn example() -> kdo_core::Result<()> {
//! let chart = Resolver::new()
//!     .resolve("https://github.com/sap/kdo/releases/download/v0.6.1/kdo-0.6.1.tgz")
//!     .await?;
//! assert_eq!(chart.genus, "github.com_sap_kdo");
//! # Ok(())
//! # }
//! ```

pub mod archive;
pub mod catalog;
pub mod error;
pub mod genus;
pub mod resolver;

pub use archive::ArchiveFormat;
pub use catalog::{CATALOG_SCHEME, Catalog};
pub use error::{RepoError, Result};
pub use genus::{GenusAndVersion, parse_version};
pub use resolver::{ResolvedChart, Resolver};
