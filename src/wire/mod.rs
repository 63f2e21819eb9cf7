mod frame;
mod messages;

pub use frame::FrameError;
pub use frame::LineFrameCodec;
pub use messages::KeyOp;
pub use messages::Opcode;
pub use messages::RequestBatch;
pub use messages::ResponseBatch;
pub use messages::VersionedValue;

pub(crate) use messages::decode_message;
pub(crate) use messages::encode_message;
