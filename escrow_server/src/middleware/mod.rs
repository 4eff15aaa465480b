mod hmac;
mod whitelist;

pub use hmac::{HmacMiddlewareFactory, HmacMiddlewareService, HMAC_HEADER};
pub use whitelist::{IpWhitelistFactory, IpWhitelistService};
