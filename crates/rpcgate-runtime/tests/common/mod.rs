//! In-memory library backend shared by the integration tests

#![allow(dead_code)]

use bytes::Bytes;
use http::{HeaderMap, Request, StatusCode};
use http_body_util::{BodyExt, Full};
use prost_reflect::{DynamicMessage, Value};
use rpcgate_core::{
    BoxFuture, Code, RpcCall, RpcChannel, RpcFailure, ServerMetadata, Status, StreamingReply,
    UnaryReply,
};
use rpcgate_proto::{library_method, message};
use rpcgate_runtime::{BodySelector, HttpBinding, RouteMapping, ServeMux};
use std::sync::{Arc, Mutex};
use std::time::Duration;

/// Records every call and answers from canned data
#[derive(Default)]
pub struct Library {
    pub calls: Mutex<Vec<RpcCall>>,
}

impl Library {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn last_call(&self) -> RpcCall {
        self.calls.lock().unwrap().last().cloned().expect("no call recorded")
    }

    fn record(&self, call: &RpcCall) {
        self.calls.lock().unwrap().push(call.clone());
    }
}

pub fn text(msg: &DynamicMessage, field: &str) -> String {
    msg.get_field_by_name(field)
        .and_then(|value| value.as_str().map(str::to_string))
        .unwrap_or_default()
}

pub fn book(name: &str, title: &str) -> DynamicMessage {
    let mut book = DynamicMessage::new(message("Book"));
    book.set_field_by_name("name", Value::String(name.to_string()));
    if !title.is_empty() {
        book.set_field_by_name("title", Value::String(title.to_string()));
    }
    book
}

fn backend_metadata() -> ServerMetadata {
    let mut md = ServerMetadata::new();
    md.append_header("x-backend", "library").unwrap();
    md.append_trailer("x-checksum", "c0ffee").unwrap();
    md
}

impl RpcChannel for Library {
    fn unary(&self, call: RpcCall) -> BoxFuture<'static, Result<UnaryReply, RpcFailure>> {
        self.record(&call);
        let request = call.message;
        let method = call.method.name().to_string();
        Box::pin(async move {
            match method.as_str() {
                "GetBook" => {
                    let name = text(&request, "name");
                    if name == "books/slow" {
                        tokio::time::sleep(Duration::from_secs(5)).await;
                    }
                    if name == "books/missing" {
                        return Err(RpcFailure {
                            status: Status::not_found("book not found"),
                            metadata: backend_metadata(),
                        });
                    }
                    let include = request
                        .get_field_by_name("include_metadata")
                        .and_then(|value| value.as_bool())
                        .unwrap_or(false);
                    let title = if include { "with metadata" } else { "plain" };
                    Ok(UnaryReply::new(book(&name, title)).with_metadata(backend_metadata()))
                }
                "CreateBook" => {
                    let parent = text(&request, "parent");
                    let mut created = request
                        .get_field_by_name("book")
                        .and_then(|value| value.as_message().cloned())
                        .unwrap_or_else(|| DynamicMessage::new(message("Book")));
                    created.set_field_by_name("name", Value::String(format!("{parent}/books/new")));
                    Ok(UnaryReply::new(created))
                }
                "UpdateBook" => {
                    let updated = request
                        .get_field_by_name("book")
                        .and_then(|value| value.as_message().cloned())
                        .unwrap_or_else(|| DynamicMessage::new(message("Book")));
                    Ok(UnaryReply::new(updated))
                }
                "GetBookWithEtag" => {
                    let mut reply = DynamicMessage::new(message("BookResponse"));
                    reply.set_field_by_name(
                        "book",
                        Value::Message(book(&text(&request, "name"), "tagged")),
                    );
                    reply.set_field_by_name("etag", Value::String("v7".to_string()));
                    Ok(UnaryReply::new(reply))
                }
                "Download" => {
                    let mut body = DynamicMessage::new(message("HttpBody"));
                    body.set_field_by_name("content_type", Value::String("text/plain".into()));
                    body.set_field_by_name("data", Value::Bytes(Bytes::from_static(b"hello")));
                    Ok(UnaryReply::new(body))
                }
                "Everything" => Ok(UnaryReply::new(request)),
                other => Err(Status::unimplemented(other.to_string()).into()),
            }
        })
    }

    fn server_streaming(
        &self,
        call: RpcCall,
    ) -> BoxFuture<'static, Result<StreamingReply, RpcFailure>> {
        self.record(&call);
        let request = call.message;
        Box::pin(async move {
            let parent = text(&request, "parent");
            if parent == "shelves/locked" {
                return Err(Status::new(Code::PERMISSION_DENIED, "shelf is locked").into());
            }
            let count = request
                .get_field_by_name("count")
                .and_then(|value| value.as_i32())
                .unwrap_or(0);

            let mut items: Vec<Result<DynamicMessage, Status>> = (0..count)
                .map(|i| Ok(book(&format!("{parent}/books/{i}"), "")))
                .collect();
            if parent == "shelves/broken" {
                items.push(Err(Status::new(Code::UNAVAILABLE, "shelf collapsed")));
            }

            let mut header = HeaderMap::new();
            header.insert("x-shelf", parent.parse().unwrap());
            Ok(StreamingReply {
                header,
                stream: Box::pin(futures_util::stream::iter(items)),
            })
        })
    }
}

/// Bindings for every library method except client streaming `Upload`
pub fn library_routes() -> Vec<RouteMapping> {
    vec![
        RouteMapping::new(library_method("GetBook"))
            .add_binding(HttpBinding::get("/v1/{name=books/*}").unwrap()),
        RouteMapping::new(library_method("CreateBook")).add_binding(
            HttpBinding::post("/v1/{parent=shelves/*}/books")
                .unwrap()
                .with_body(BodySelector::Field("book".to_string())),
        ),
        RouteMapping::new(library_method("UpdateBook")).add_binding(
            HttpBinding::patch("/v1/{book.name=books/*}")
                .unwrap()
                .with_body(BodySelector::Field("book".to_string())),
        ),
        RouteMapping::new(library_method("GetBookWithEtag")).add_binding(
            HttpBinding::get("/v1/{name=books/*}:etag")
                .unwrap()
                .with_response_body("book"),
        ),
        RouteMapping::new(library_method("StreamBooks"))
            .add_binding(HttpBinding::get("/v1/{parent=shelves/*}/books:stream").unwrap()),
        RouteMapping::new(library_method("Download"))
            .add_binding(HttpBinding::get("/v1/{name=files/*}:download").unwrap()),
        RouteMapping::new(library_method("Everything")).add_binding(
            HttpBinding::post("/v1/everything")
                .unwrap()
                .with_body(BodySelector::Whole),
        ),
    ]
}

pub struct TestResponse {
    pub status: StatusCode,
    pub headers: HeaderMap,
    pub body: String,
    pub trailers: Option<HeaderMap>,
}

impl TestResponse {
    pub fn json(&self) -> serde_json::Value {
        serde_json::from_str(&self.body).unwrap_or_else(|err| panic!("{err}: {}", self.body))
    }
}

pub async fn send(mux: &ServeMux, request: Request<Full<Bytes>>) -> TestResponse {
    let response = mux.serve(request).await;
    let (parts, body) = response.into_parts();
    let collected = body.collect().await.unwrap();
    let trailers = collected.trailers().cloned();
    TestResponse {
        status: parts.status,
        headers: parts.headers,
        body: String::from_utf8(collected.to_bytes().to_vec()).unwrap(),
        trailers,
    }
}

pub fn get(uri: &str) -> Request<Full<Bytes>> {
    Request::get(uri).body(Full::default()).unwrap()
}

pub fn with_body(method: &str, uri: &str, content_type: &str, body: &str) -> Request<Full<Bytes>> {
    Request::builder()
        .method(method)
        .uri(uri)
        .header("content-type", content_type)
        .body(Full::new(Bytes::from(body.to_string())))
        .unwrap()
}
