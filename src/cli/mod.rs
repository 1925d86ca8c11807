//! CLI helpers.
//!
//! Request input and prompt output for the `neuroprompt` binary. The
//! command dispatch itself lives in `main.rs`.
//!
//! # Example Usage
//!
//! ```bash
//! # Request as an argument, prompt saved to a file
//! neuroprompt run "summarize a technical document for executives" -o prompt.md
//!
//! # Request from stdin
//! echo "write a launch announcement" | neuroprompt run
//! ```

mod run;

pub use run::{REQUEST_PROMPT, read_request, save_prompt};
