//! Container lifecycle: data model, on-disk store, stdio journal, the
//! runtime state machine, and crash recovery.

mod journal;
pub mod namesgenerator;
mod recovery;
mod runtime;
mod store;
mod types;

pub use journal::{Journal, JournalRecord, Stream as JournalStream};
pub use recovery::recover;
pub use runtime::{AttachHandle, ContainerRuntime};
pub use store::ContainerStore;
pub use types::{
    Container, ContainerConfig, ContainerId, ContainerState, ExecConfig, ExecId, ExecSession,
    ExecState, HostConfig, NetworkEndpoint, PortBinding, PortSpec, Protocol, ResolvedLink,
    Resources, RestartPolicy, RestartPolicyKind, VolumeMount,
};
