pub mod channel;
pub mod error;
pub mod gateway;
pub mod path_template;
pub mod shaping;
pub mod supervisor;
pub mod upstream;
pub mod websocket;

#[cfg(test)]
pub(crate) mod testing;

pub use channel::{ChannelHooks, ChannelTable, ForwardingChannel, GatewayHooks, InFlightRequest};
pub use error::{ErrorBody, GatewayError};
pub use gateway::{GatewayService, RouteBinding};
pub use upstream::{UpstreamDescriptor, UpstreamKind, UpstreamRegistry};
