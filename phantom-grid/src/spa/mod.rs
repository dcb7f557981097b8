pub mod handler;
pub mod packet;
pub mod replay;
pub mod totp;
pub mod verifier;

pub use handler::SpaHandler;
pub use packet::SpaPacket;
pub use replay::ReplayCache;
pub use verifier::{Verifier, VerifyError};
