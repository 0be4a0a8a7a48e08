/*!
One-to-one `WebRTC` calls signaled over a shared publish/subscribe bus.

# Overview

Two peers that know the same [`SessionId`] find each other on a bus without any dedicated
signaling server. Everything they exchange lives on three topics derived from the session id,
`webrtc/<id>/call` for announcements and hang ups, and one directional topic per role for
descriptions and candidates, see [`Topics`].

The crate doesn't do media itself. The [`call::CallAgent`] drives a call against anything
implementing [`engine::SessionEngine`] over anything implementing [`bus::Bus`]. A `WebSocket`
client of the accompanying `webrtc-pubsub-relay` and an in-process broker for tests are included.

Whoever calls [`call::CallAgent::start_call`] becomes the caller and sends the offer,
the peer calling [`call::CallAgent::answer_call`] announces itself and answers it.
Progress is reported to a callback as [`call::CallEvent`]s.
*/

#![allow(
    clippy::module_name_repetitions,
)]
// clippy WARN level lints
#![warn(
    // missing_docs,
    clippy::cargo,
    clippy::pedantic,
    // clippy::nursery,
    clippy::dbg_macro,
    clippy::unwrap_used,
    clippy::integer_division,
    clippy::large_include_file,
    clippy::map_err_ignore,
    // clippy::missing_docs_in_private_items,
    clippy::panic,
    clippy::todo,
    clippy::undocumented_unsafe_blocks,
    clippy::unimplemented,
    clippy::unreachable
)]
// clippy WARN level lints, that can be upgraded to DENY if preferred
#![warn(
    clippy::float_arithmetic,
    clippy::integer_arithmetic,
    clippy::modulo_arithmetic,
    clippy::as_conversions,
    clippy::assertions_on_result_states,
    clippy::clone_on_ref_ptr,
    clippy::create_dir,
    clippy::default_union_representation,
    clippy::deref_by_slicing,
    clippy::empty_drop,
    clippy::empty_structs_with_brackets,
    clippy::exit,
    clippy::filetype_is_file,
    clippy::float_cmp_const,
    clippy::if_then_some_else_none,
    clippy::indexing_slicing,
    clippy::let_underscore_must_use,
    clippy::lossy_float_literal,
    clippy::pattern_type_mismatch,
    clippy::string_slice,
    clippy::try_err
)]
// clippy DENY level lints, they always have a quick fix that should be preferred
#![deny(
    clippy::wildcard_imports,
    clippy::multiple_inherent_impl,
    clippy::rc_buffer,
    clippy::rc_mutex,
    clippy::rest_pat_in_fully_bound_structs,
    clippy::same_name_method,
    clippy::self_named_module_files,
    clippy::separated_literal_suffix,
    clippy::shadow_unrelated,
    clippy::str_to_string,
    clippy::string_add,
    clippy::string_to_string,
    clippy::unnecessary_self_imports,
    clippy::unneeded_field_pattern,
    clippy::unseparated_literal_suffix,
    clippy::verbose_file_reads
)]

pub mod bus;
pub mod call;
mod config;
pub mod engine;
mod error;
mod utils;

pub use config::ClientConfig;
pub use error::{BusError, ConnectError, Error, MediaError, NegotiationError, Result};
pub use utils::get_random_session_id;
pub use webrtc_pubsub_protocol::{IceCandidate, SessionId, SignalMessage, TopicKind, Topics};
