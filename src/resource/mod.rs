//! Instrument resources: addresses, discovery and transports
//!
//! This is the boundary to the outside world. Everything above it talks to
//! instruments only through [`ResourceEnumerator`], [`Endpoint`] and
//! [`Connection`].

pub mod address;
pub mod endpoint;
pub mod enumerator;
pub mod mock;
pub mod pattern;
pub mod rpc;
pub mod serial;
pub mod socket;
pub mod vxi11;

use std::future::Future;
use std::time::Duration;

use crate::common::{Error, Result};

pub use address::{ResourceAddress, Transport};
pub use endpoint::{Connection, Endpoint, VisaEndpoint};
pub use enumerator::{ResourceEnumerator, SystemEnumerator};
pub use mock::{MockEndpoint, MockEnumerator};
pub use pattern::ResourcePattern;

/// Run an I/O future, mapping an expired timer to [`Error::Timeout`]
pub(crate) async fn with_timeout<T, F>(timeout: Duration, fut: F) -> Result<T>
where
    F: Future<Output = Result<T>>,
{
    match tokio::time::timeout(timeout, fut).await {
        Ok(result) => result,
        Err(_) => Err(Error::Timeout(timeout.as_millis() as u64)),
    }
}
