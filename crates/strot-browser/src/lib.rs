//! Browser-side components: the DOM plugin (C3), network response capture
//! (C4), and the capability interface the Analyzer drives them through.

pub mod capture;
pub mod error;
pub mod plugin;
pub mod session;

pub use error::{Error, Result};
pub use session::{BrowserSession, EokaSession, RawNetworkEvent, RawRequestMeta};
