pub mod channel;
pub mod codec;
pub mod frame;
pub mod record;
pub mod transport;

pub use frame::Frame;
