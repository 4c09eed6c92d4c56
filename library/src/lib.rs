/*!
This crate provides the peer-to-peer coordination layer of a study-room video
call: an N-way `WebRTC` mesh in which every participant holds a direct
connection to every other participant, negotiated over a broadcast channel
scoped to the session.

# Overview

The single entry point is [`mesh::MeshCoordinator`]. A consumer constructs it
with a session id and its own participant id, then calls
[`mesh::MeshCoordinator::initialize`] with a render target for the local
camera and an observer for mesh events. From that point on the coordinator
reacts to signaling traffic by itself: it opens a connection towards every
announced peer, answers incoming offers, trickles ICE candidates and reports
remote streams, departures and connection-state changes to the observer.

The two platform collaborators, media capture and the broadcast channel, are
abstracted behind the traits in [`platform`]; the browser implementation
lives in `platform::web` and is compiled for `wasm32` targets only.

```ignore
use study_mesh::mesh::MeshCoordinator;
use study_mesh::platform::web::WebPlatform;
use study_mesh::{ConnectionType, PeerId, SessionId};

let platform = WebPlatform::new("wss://channels.example.com", ConnectionType::default());
let coordinator = MeshCoordinator::new(
    platform,
    SessionId::new("physics-study-group".to_string()),
    PeerId::new("u1".to_string()),
);
let local_stream = coordinator.initialize(&video_element, events).await?;
```
*/

#![allow(
    clippy::module_name_repetitions,
    clippy::future_not_send, // false positive in WASM (single threaded) context
    async_fn_in_trait // same: the host event loop is single threaded, futures are deliberately !Send
)]
// clippy WARN level lints
#![warn(
    clippy::cargo,
    clippy::pedantic,
    clippy::dbg_macro,
    clippy::unwrap_used,
    clippy::large_include_file,
    clippy::map_err_ignore,
    clippy::panic,
    clippy::todo,
    clippy::undocumented_unsafe_blocks,
    clippy::unimplemented,
    clippy::unreachable
)]
// clippy DENY level lints, they always have a quick fix that should be preferred
#![deny(
    clippy::wildcard_imports,
    clippy::rc_buffer,
    clippy::rc_mutex,
    clippy::rest_pat_in_fully_bound_structs,
    clippy::self_named_module_files,
    clippy::shadow_unrelated,
    clippy::str_to_string,
    clippy::string_add,
    clippy::string_to_string,
    clippy::unnecessary_self_imports,
    clippy::unneeded_field_pattern,
    clippy::verbose_file_reads
)]

pub(crate) mod constants;
mod error;
pub mod mesh;
pub mod platform;
mod utils;

pub use error::{Error, Result};
pub use study_mesh_protocol::{IceCandidate, PeerId, SessionId};
pub use utils::{get_random_session_id, ConnectionType};
