//! HMAC middleware for Actix Web.
//!
//! The checkout signs every webhook it sends with an HMAC-SHA256 of the request body, keyed with the shared
//! `ESG_WEBHOOK_HMAC_SECRET`. The base64-encoded signature is provided in the `X-Escrow-Hmac-Sha256` header.
//!
//! Wrap the webhook scope with this middleware to reject any call whose signature does not match its body. Signatures are
//! compared in constant time, and rejections carry the same `{"error": ...}` body as every other failed request. While
//! checks are enabled, an empty secret rejects every webhook rather than accepting signatures keyed with nothing.
use std::{
    future::{ready, Ready},
    rc::Rc,
};

use actix_http::h1;
use actix_web::{
    dev::{forward_ready, Payload, Service, ServiceRequest, ServiceResponse, Transform},
    web,
    Error,
};
use bytes::Bytes;
use escrow_common::Secret;
use futures::future::LocalBoxFuture;
use log::{error, trace, warn};

use crate::{errors::ServerError, helpers::verify_hmac};

pub const HMAC_HEADER: &str = "X-Escrow-Hmac-Sha256";

pub struct HmacMiddlewareFactory {
    hmac_header: String,
    key: Secret<String>,
    // If false, then the middleware will not check the HMAC signature and always allow the call
    enabled: bool,
}

impl HmacMiddlewareFactory {
    pub fn new(hmac_header: &str, key: Secret<String>, enabled: bool) -> Self {
        HmacMiddlewareFactory { hmac_header: hmac_header.into(), key, enabled }
    }
}

impl<S, B> Transform<S, ServiceRequest> for HmacMiddlewareFactory
where
    S: Service<ServiceRequest, Response = ServiceResponse<B>, Error = Error> + 'static,
    S::Future: 'static,
    B: 'static,
{
    type Error = Error;
    type Future = Ready<Result<Self::Transform, Self::InitError>>;
    type InitError = ();
    type Response = ServiceResponse<B>;
    type Transform = HmacMiddlewareService<S>;

    fn new_transform(&self, service: S) -> Self::Future {
        ready(Ok(HmacMiddlewareService {
            hmac_header: self.hmac_header.clone(),
            key: self.key.clone(),
            enabled: self.enabled,
            service: Rc::new(service),
        }))
    }
}

pub struct HmacMiddlewareService<S> {
    hmac_header: String,
    key: Secret<String>,
    enabled: bool,
    service: Rc<S>,
}

impl<S, B> Service<ServiceRequest> for HmacMiddlewareService<S>
where
    S: Service<ServiceRequest, Response = ServiceResponse<B>, Error = Error> + 'static,
    S::Future: 'static,
    B: 'static,
{
    type Error = Error;
    type Future = LocalBoxFuture<'static, Result<Self::Response, Self::Error>>;
    type Response = ServiceResponse<B>;

    forward_ready!(service);

    fn call(&self, mut req: ServiceRequest) -> Self::Future {
        let service = Rc::clone(&self.service);
        let secret = self.key.clone();
        let hmac_header = self.hmac_header.clone();
        let enabled = self.enabled;
        Box::pin(async move {
            if !enabled {
                trace!("🔐️ HMAC checks are disabled. Allowing request.");
                return service.call(req).await;
            }
            if secret.reveal().is_empty() {
                error!("🔐️ No webhook signing secret is configured. Denying webhook call to {}.", req.path());
                return Err(ServerError::ConfigurationError("No webhook signing secret is configured.".into()).into());
            }
            let signature = match req.headers().get(&hmac_header).map(|v| v.to_str()) {
                Some(Ok(s)) => s.to_string(),
                Some(Err(_)) => {
                    warn!("🔐️ Unreadable HMAC signature in webhook call to {}. Denying access.", req.path());
                    return Err(ServerError::WebhookRejected("Invalid HMAC signature.".into()).into());
                },
                None => {
                    warn!("🔐️ No HMAC signature found in webhook call to {}. Denying access.", req.path());
                    return Err(ServerError::WebhookRejected("No HMAC signature found.".into()).into());
                },
            };
            let data = req.extract::<web::Bytes>().await.map_err(|e| {
                warn!("🔐️ Failed to extract webhook body: {e}");
                ServerError::InvalidRequestBody(e.to_string())
            })?;
            if verify_hmac(secret.reveal(), data.as_ref(), &signature) {
                trace!("🔐️ HMAC check for request ✅️");
                req.set_payload(bytes_to_payload(data));
                service.call(req).await
            } else {
                warn!("🔐️ Invalid HMAC signature found in webhook call to {}. Denying access.", req.path());
                Err(ServerError::WebhookRejected("Invalid HMAC signature.".into()).into())
            }
        })
    }
}

fn bytes_to_payload(buf: Bytes) -> Payload {
    let (_, mut pl) = h1::Payload::create(true);
    pl.unread_data(buf);
    Payload::from(pl)
}
