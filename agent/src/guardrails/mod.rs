//! Pre-checks for tool inputs marked `reads-db`, and
//! post-checks redacting probable secrets from agent-produced text.

mod input;
mod output;

pub use input::check_input;
pub use output::redact_output;
