pub mod coordinator;
pub mod node;
pub mod probe;
pub mod topology;
pub mod transport;
pub mod types;

pub use coordinator::{ReplicationCoordinator, ReplicationOutcome};
pub use node::{Node, NodeHealth};
pub use topology::{NodeStatus, Topology};
pub use transport::{HttpTransport, InProcessTransport, ReplicaHandler, ReplicaTransport};
pub use types::{Mutation, ReplicatedMutation};
