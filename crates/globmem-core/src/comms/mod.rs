//! Team communication: the transport seam, the commit wire format and the
//! in-process team

pub mod transport;
pub mod protocol;
pub mod local_team;

pub use transport::Transport;
pub use protocol::{BucketDescriptor, TableDescriptor};
pub use local_team::{run_team, Endpoint, Fault, LocalTeam};
