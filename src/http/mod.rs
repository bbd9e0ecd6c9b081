//! HTTP-level vocabulary for the connection core: decoded requests, response
//! objects, and request-path parsing with the process-wide path cache.

pub mod path;
pub mod request;
pub mod response;

pub use path::PathAndQuery;
pub use request::{
    DecodedHttpRequest, ExchangeType, InboundBody, InboundBodyWriter, RequestId, RoutingContext,
    RoutingStatus,
};
pub use response::{HttpResponse, ResFrame, ResponseHead, ResponseStream};
