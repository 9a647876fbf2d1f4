pub mod error;
pub mod platform;
pub mod poll;
pub mod reader;
pub mod sim;
pub mod vcd;

pub use error::{ClientError, PlatformError};
pub use platform::Platform;
pub use poll::{wait_for_tasks, wait_until_ready};
pub use reader::{find, find_by_locator, search, Scope};
pub use sim::{RecordedRequest, SimPlatform};
pub use vcd::{Credentials, SessionOptions, VcdClient};
