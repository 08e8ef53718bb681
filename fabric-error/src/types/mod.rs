pub mod protocol;
pub mod routing;
pub mod state;
pub mod transport;

pub use protocol::*;
pub use routing::*;
pub use state::*;
pub use transport::*;
