//! Per-call request and response.
//!
//! A [`Request`] is built from one decoded package and never outlives the
//! dispatch task that owns it. The matching [`Response`] starts out empty and
//! is mutated in place by middleware and the target method; only a response
//! marked as produced is encoded and written back.
//!
//! # Example
//!
//! ```ignore
//! async fn get_profile(req: &Request, resp: &mut Response) {
//!     match req.body_as::<GetProfile>() {
//!         Ok(input) => resp.set_body(&lookup(input.uid)).unwrap_or_default(),
//!         Err(e) => resp.set_error(ret::BAD_REQUEST, e.to_string()),
//!     }
//! }
//! ```

use std::time::Instant;

use bytes::Bytes;
use serde::de::DeserializeOwned;
use serde::Serialize;

use crate::codec::BodyFormat;
use crate::error::Result;
use crate::protocol::{ret, Package, PackageHead};

/// One inbound call.
#[derive(Debug, Clone)]
pub struct Request {
    format: BodyFormat,
    head: PackageHead,
    body: Bytes,
    received_at: Instant,
    remote_addr: String,
}

impl Request {
    /// Build a request from a decoded package received from `remote_addr`.
    pub fn from_package(package: Package, remote_addr: &str) -> Self {
        Self {
            format: package.format,
            head: package.head,
            body: package.body,
            received_at: Instant::now(),
            remote_addr: remote_addr.to_string(),
        }
    }

    /// Body format of the request.
    #[inline]
    pub fn format(&self) -> BodyFormat {
        self.format
    }

    /// Parsed package head.
    #[inline]
    pub fn head(&self) -> &PackageHead {
        &self.head
    }

    /// Mutable head, for middleware that rewrites routing fields.
    #[inline]
    pub fn head_mut(&mut self) -> &mut PackageHead {
        &mut self.head
    }

    /// Requested method name.
    #[inline]
    pub fn method(&self) -> &str {
        &self.head.method
    }

    /// Correlation key of the call.
    #[inline]
    pub fn seq(&self) -> u64 {
        self.head.seq
    }

    /// Raw body bytes.
    #[inline]
    pub fn body(&self) -> &Bytes {
        &self.body
    }

    /// Decode the body into a typed value.
    pub fn body_as<T: DeserializeOwned>(&self) -> Result<T> {
        self.format.decode(&self.body)
    }

    /// When the package was decoded.
    #[inline]
    pub fn received_at(&self) -> Instant {
        self.received_at
    }

    /// Peer address of the connection the request arrived on.
    #[inline]
    pub fn remote_addr(&self) -> &str {
        &self.remote_addr
    }

    /// Owned snapshot of the call metadata, handed to typed methods.
    pub fn info(&self) -> RequestInfo {
        RequestInfo {
            service: self.head.service.clone(),
            method: self.head.method.clone(),
            seq: self.head.seq,
            remote_addr: self.remote_addr.clone(),
            received_at: self.received_at,
        }
    }
}

/// Call metadata passed by value to typed methods.
#[derive(Debug, Clone)]
pub struct RequestInfo {
    /// Target service name as sent by the caller.
    pub service: String,
    /// Method name.
    pub method: String,
    /// Correlation key.
    pub seq: u64,
    /// Peer address.
    pub remote_addr: String,
    /// When the package was decoded.
    pub received_at: Instant,
}

/// One outbound result.
#[derive(Debug, Clone)]
pub struct Response {
    format: BodyFormat,
    head: PackageHead,
    body: Bytes,
    produced: bool,
}

impl Response {
    /// Empty response for `req`: same format, and a head that echoes the
    /// request's routing fields so the caller can correlate it.
    pub fn for_request(req: &Request) -> Self {
        let mut head = req.head.clone();
        head.ret = ret::OK;
        head.msg.clear();

        Self {
            format: req.format,
            head,
            body: Bytes::new(),
            produced: false,
        }
    }

    /// Body format of the response.
    #[inline]
    pub fn format(&self) -> BodyFormat {
        self.format
    }

    /// Response head.
    #[inline]
    pub fn head(&self) -> &PackageHead {
        &self.head
    }

    /// Return code.
    #[inline]
    pub fn ret(&self) -> i32 {
        self.head.ret
    }

    /// Message.
    #[inline]
    pub fn msg(&self) -> &str {
        &self.head.msg
    }

    /// Encoded body bytes (empty until a body is set).
    #[inline]
    pub fn body(&self) -> &Bytes {
        &self.body
    }

    /// Encode `value` as the body and mark the response produced.
    pub fn set_body<T: Serialize + ?Sized>(&mut self, value: &T) -> Result<()> {
        self.body = self.format.encode(value)?;
        self.produced = true;
        Ok(())
    }

    /// Set already-encoded body bytes and mark the response produced.
    pub fn set_raw_body(&mut self, body: Bytes) {
        self.body = body;
        self.produced = true;
    }

    /// Set the return code and mark the response produced.
    pub fn set_ret(&mut self, code: i32) {
        self.head.ret = code;
        self.produced = true;
    }

    /// Set the message and mark the response produced.
    pub fn set_msg(&mut self, msg: impl Into<String>) {
        self.head.msg = msg.into();
        self.produced = true;
    }

    /// Answer with an error: code and message, empty body.
    pub fn set_error(&mut self, code: i32, msg: impl Into<String>) {
        self.head.ret = code;
        self.head.msg = msg.into();
        self.body = Bytes::new();
        self.produced = true;
    }

    /// Mark the response as ready to be sent, even with nothing set.
    pub fn mark_produced(&mut self) {
        self.produced = true;
    }

    /// Drop whatever was set; nothing will be sent for this call.
    pub fn discard(&mut self) {
        self.produced = false;
    }

    /// Check if the response will be sent.
    #[inline]
    pub fn is_produced(&self) -> bool {
        self.produced
    }

    /// Consume the response into a package ready for encoding.
    pub fn into_package(self) -> Package {
        Package::new(self.format, self.head, self.body)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::codec::BodyMap;

    fn request(format: BodyFormat) -> Request {
        let mut head = PackageHead::request("profile", "getInfo", 11);
        head.ret = 7;
        head.msg = "stale".to_string();
        let package = Package::with_body(format, head, &serde_json::json!({"uid": 5})).unwrap();
        Request::from_package(package, "10.0.0.1:5000")
    }

    #[test]
    fn test_request_accessors() {
        let req = request(BodyFormat::Json);

        assert_eq!(req.method(), "getInfo");
        assert_eq!(req.seq(), 11);
        assert_eq!(req.remote_addr(), "10.0.0.1:5000");
        assert_eq!(req.format(), BodyFormat::Json);

        let body: BodyMap = req.body_as().unwrap();
        assert_eq!(body["uid"], serde_json::json!(5));

        let info = req.info();
        assert_eq!(info.service, "profile");
        assert_eq!(info.seq, 11);
    }

    #[test]
    fn test_response_echoes_routing_fields_only() {
        let req = request(BodyFormat::MsgPack);
        let resp = Response::for_request(&req);

        assert_eq!(resp.format(), BodyFormat::MsgPack);
        assert_eq!(resp.head().method, "getInfo");
        assert_eq!(resp.head().seq, 11);
        assert_eq!(resp.ret(), ret::OK);
        assert!(resp.msg().is_empty());
        assert!(!resp.is_produced());
    }

    #[test]
    fn test_setters_mark_produced() {
        let req = request(BodyFormat::Json);

        let mut resp = Response::for_request(&req);
        resp.set_body(&serde_json::json!({"name": "kim"})).unwrap();
        assert!(resp.is_produced());
        assert_eq!(&resp.body()[..], br#"{"name":"kim"}"#);

        let mut resp = Response::for_request(&req);
        resp.set_error(ret::SERVICE_FAILURE, "db down");
        assert!(resp.is_produced());
        assert_eq!(resp.ret(), ret::SERVICE_FAILURE);
        assert!(resp.body().is_empty());

        resp.discard();
        assert!(!resp.is_produced());
    }

    #[test]
    fn test_into_package() {
        let req = request(BodyFormat::Json);
        let mut resp = Response::for_request(&req);
        resp.set_body(&42).unwrap();

        let package = resp.into_package();
        assert_eq!(package.head.seq, 11);
        assert_eq!(package.body_as::<i32>().unwrap(), 42);
    }
}
