//! Pub/sub transport speaking ZMTP 3.0 over TCP.
//!
//! | Module         | Purpose                                              |
//! |----------------|------------------------------------------------------|
//! | `address`      | `[@|>]tcp://host:port` connection strings            |
//! | `zmtp`         | Greeting, frames, commands and the framing codec     |
//! | `handshake`    | NULL-mechanism handshake on a fresh stream           |
//! | `subscription` | Per-subscriber prefix filter                         |
//! | `endpoint`     | Publishing socket and its lifecycle                  |
//! | `subscriber`   | Receiving socket for tools and tests                 |
//!
//! Peers built on libzmq/NetMQ (`SUB`, `XSUB`) interoperate with the
//! endpoint unchanged.

pub mod address;
pub mod endpoint;
pub mod handshake;
pub mod subscriber;
pub mod subscription;
pub mod zmtp;

pub use address::{AddressMode, TransportAddress};
pub use endpoint::{DEFAULT_SEND_HIGH_WATER_MARK, EndpointOptions, EndpointState, StreamEndpoint};
pub use subscriber::Subscriber;
pub use subscription::SubscriptionSet;
pub use zmtp::{Multipart, SocketType, ZmtpCodec, ZmtpFrame};
