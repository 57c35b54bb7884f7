//! Protocol Tests
//!
//! Frame encoding and stream reassembly, no sockets involved.
