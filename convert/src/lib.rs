//! Dialect-to-neutral-IR conversion (request, response, streaming chunk) and
//! the synthetic tool-calling prompt injector, together implementing the
//! bidirectional translation core of the gateway.

pub mod chunk;
pub mod injector;
pub mod request;
pub mod response;

pub use injector::{build_instruction_block, inject_instructions, maybe_reinject, ReinjectionPolicy};
pub use request::{
    neutral_to_oai_request, neutral_to_oll_request, oai_request_to_neutral, oll_request_to_neutral,
};
pub use response::{
    apply_envelope_extraction, neutral_to_oai_response, neutral_to_oll_response,
    oai_response_to_neutral, oll_response_to_neutral,
};
pub use chunk::{
    neutral_to_oai_chunk, neutral_to_oll_chunk, oai_chunk_to_neutral, oll_chunk_to_neutral,
};
