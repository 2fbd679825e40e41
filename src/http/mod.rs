//! HTTP protocol implementation.
//!
//! Every accepted connection serves exactly one request: the head is
//! assembled incrementally from non-blocking reads, the body goes to the
//! cheapest storage that fits, and the dispatcher writes one response before
//! the socket is closed.
//!
//! # Architecture
//!
//! - **`connection`**: per-socket receive state machine
//! - **`body`**: inline, heap and memory-mapped body storage
//! - **`parser`**: parses the request head from the header buffer
//! - **`request`**: HTTP request representation and header helpers
//! - **`response`**: HTTP response representation with builder pattern
//! - **`writer`**: serializes responses and writes them to the socket
//! - **`exchange`**: the handle a handler uses to answer one request
//! - **`router`**: static-vs-handler routing and dispatch
//! - **`files`**: static file and folder serving
//! - **`pages`**: HTML status and folder pages
//! - **`mime`**: MIME type detection based on file extensions
//!
//! # Connection State Machine
//!
//! ```text
//!        ┌─────────────┐
//!        │   Header    │ ← Read until "\r\n\r\n" or the buffer is full (413)
//!        └──────┬──────┘
//!               │ Head parsed, Content-Length > received
//!               ▼
//!        ┌──────────────────┐
//!        │      Body        │ ← Read into inline / heap / mapped storage
//!        └──────┬───────────┘
//!               │ body_received == body_target
//!               ▼
//!        ┌──────────────────┐
//!        │    Complete      │ ← Dispatched once, then closed
//!        └──────────────────┘
//! ```

pub mod body;
pub mod connection;
pub mod exchange;
pub mod files;
pub mod mime;
pub mod pages;
pub mod parser;
pub mod request;
pub mod response;
pub mod router;
pub mod writer;
