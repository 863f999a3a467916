pub mod accessory;
pub mod bridge;
pub mod config;
pub mod device;
pub mod driver;
mod error;
pub mod runtime;

pub use bridge::Bridge;
pub use config::Config;
pub use config::DeviceDescriptor;
pub use config::LogLevel;
pub use config::PollSettings;
pub use error::Error;
pub use error::Result;
pub use error::ShutdownFailure;
pub use runtime::Runtime;
