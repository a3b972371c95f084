//! Embedded build manifest handling
//!
//! A script carries its own build recipe inside a comment block:
//!
//! ```text
//! // scriptisto-begin
//! // script_src: src/main.rs
//! // build_cmd: cargo build --release
//! // target_bin: ./target/release/script
//! // scriptisto-end
//! ```
//!
//! [`extract`] pulls the block out of the source regardless of the host
//! language's comment leader; [`model`] turns it into a validated
//! [`ScriptManifest`].

pub mod extract;
pub mod model;

pub use extract::{extract_block, CommentStyle, ManifestBlock, BEGIN_MARKER, END_MARKER};
pub use model::{AuxiliaryFile, ScriptManifest};

use crate::error::ScriptistoResult;

/// Extract and validate the manifest embedded in `source`
pub fn parse(source: &str) -> ScriptistoResult<ScriptManifest> {
    let block = extract_block(source)?;
    ScriptManifest::from_block(&block)
}
