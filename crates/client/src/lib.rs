//! `xr-client` — calls lexicon methods on a remote XRPC server.
//!
//! # Quick start
//!
//! ```rust,no_run
//! use xr_client::Client;
//!
//! # async fn example() -> Result<(), xr_domain::Error> {
//! let client = Client::builder().base_url("http://localhost:8080").build()?;
//!
//! client
//!     .method("com.atproto.server.createSession")
//!     .input(serde_json::json!({"identifier": "alice.test", "password": "hunter2"}))
//!     .send()
//!     .await?;
//! println!("logged in as {:?}", client.session().and_then(|s| s.did));
//! # Ok(())
//! # }
//! ```

pub mod builder;
pub mod client;
pub mod session;
pub mod transport;

pub use builder::ClientBuilder;
pub use client::{error_from_response, Client, FrameStream, MethodCall, RawFrameStream};
pub use session::{Session, SessionCallback, CREATE_SESSION, REFRESH_SESSION};
pub use transport::{HttpMethod, HttpRequest, HttpResponse, ReqwestTransport, Transport};
