//! Reference completion programs.
//!
//! - [`EchoCounter`]: counts invocations per key and echoes the count.
//! - [`PingPong`]: bounces a token between two armed programs parked on
//!   partner queues, one hop per completion.
//! - [`Redirect`]: sends its completion to a fixed queue.

#![forbid(unsafe_code)]
#![deny(missing_docs)]
#![deny(rustdoc::broken_intra_doc_links)]

pub mod echo;
pub mod ping_pong;
pub mod redirect;

pub use echo::EchoCounter;
pub use ping_pong::PingPong;
pub use redirect::Redirect;

use hopring_core::SetupError;
use hopring_program::ProgramLibrary;

/// A library holding every reference program under its default name,
/// with [`PingPong`] bounded to `max_hops`.
pub fn reference_library(max_hops: u64) -> Result<ProgramLibrary, SetupError> {
    let mut lib = ProgramLibrary::new();
    lib.load(EchoCounter)?;
    lib.load(PingPong::new(max_hops))?;
    lib.load(Redirect::new(hopring_core::CqIndex::PRIMARY))?;
    Ok(lib)
}
