pub mod device;
pub mod fixtures;
pub mod logging;
pub mod mock;

pub use device::TestDevice;
pub use logging::init_tracing;
pub use mock::MockRemote;
