//! Message passing for a fixed group of processes wired together with a
//! full pipe mesh by the `meshrun` launcher. Point-to-point delivery is
//! reliable and FIFO per sender, receives are selective by (source, tag,
//! length), and collectives run over a deterministic binary tree.

pub mod channel;
mod collective;
mod error;
mod mailbox;
mod prelude;
mod receiver;
mod runtime;
mod topology;
mod wire;

pub use collective::ReduceOp;
pub use error::{CommError, CommResult};
pub use runtime::Runtime;
pub use wire::ANY_TAG;
