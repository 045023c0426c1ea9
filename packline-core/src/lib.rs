//! # packline-core
//!
//! Voice-guided packing session SDK for vending-route warehouse work.
//!
//! ## Architecture
//!
//! ```text
//! PickTasks → build_steps → PackSession::start
//!                                │
//!                     session loop (spawn_blocking)
//!                      │                      │
//!               Announcer::speak      CommandListener::begin
//!                      │                      │
//!                completion cb          transcript events
//!                      └──── SessionMsg queue ┘
//!                                │
//!                broadcast::Sender<StepEvent / SessionStatusEvent>
//! ```
//!
//! Every callback is marshalled onto the loop's single thread; the UI layer
//! only ever consumes broadcast events and snapshots.

#![forbid(unsafe_code)]
#![warn(clippy::all)]

pub mod audio;
pub mod buffering;
pub mod command;
pub mod error;
pub mod ipc;
pub mod listen;
pub mod sequence;
pub mod session;
pub mod speech;
pub mod store;
pub mod task;

// Convenience re-exports for downstream crates
pub use command::VoiceCommand;
pub use error::PacklineError;
pub use ipc::events::{
    HeardEvent, SessionFault, SessionPhase, SessionSnapshot, SessionStatusEvent, StepEvent,
};
pub use listen::{CommandListener, ListenerHandle, RecognizerHandle, TranscriptRecognizer};
pub use sequence::{build_steps, ItemStep, Step};
pub use session::{
    NullResources, PackSession, RemoteSignal, ResourceFactory, SessionAction, SessionConfig,
};
pub use speech::{Announcer, AnnouncerHandle};
pub use store::{CompletionStore, CompletionStoreHandle, NullCompletionStore};
pub use task::{CountSource, LocationRef, MachineRef, PickTask, Quantities, SkuRef};

#[cfg(feature = "audio-cpal")]
pub use listen::mic::{MicListener, MicListenerConfig};

#[cfg(feature = "audio-cpal")]
pub use session::resources::AudioResources;
