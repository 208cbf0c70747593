//! HTTP transport tests against a local wiremock server.

#![cfg(feature = "reqwest")]

use std::{
    sync::mpsc::channel,
    time::Duration,
};

use cloudscript::{CallbackSet, Credentials, HostConfig, ScriptHost};
use serde_json::json;
use wiremock::matchers::{body_json, header, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

fn host_for(base_url: String) -> ScriptHost {
    ScriptHost::new(HostConfig {
        base_url: Some(base_url),
        timeout: Some(Duration::from_secs(10)),
        ..Default::default()
    })
    .expect("host construction")
}

#[test]
fn get_sends_auth_and_accept_headers_and_decodes_the_body() {
    let rt = tokio::runtime::Runtime::new().expect("tokio runtime should start");
    let server = rt.block_on(async { MockServer::start().await });

    rt.block_on(async {
        Mock::given(method("GET"))
            .and(path("/server"))
            .and(header("authorization", "Basic dXNlcjpzZWNyZXQ="))
            .and(header("accept", "application/json"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "servers": {"server": [{"hostname": "web1", "state": "started"}]}
            })))
            .expect(1)
            .mount(&server)
            .await;
    });

    let host = host_for(server.uri());
    let (tx, rx) = channel();
    host.run(move |ctx| {
        let session = ctx.session(Credentials::new("user", "secret"));
        session.get(
            "server",
            CallbackSet::new().on_response(move |resp| {
                let resp = resp.expect("a response");
                tx.send((
                    resp.status(),
                    resp.data.as_ref().expect("decoded body")["servers"]["server"][0]["hostname"]
                        .clone(),
                ))
                .unwrap();
            }),
        );
        Ok(())
    })
    .expect("script run");

    let (status, hostname) = rx.recv_timeout(Duration::from_secs(5)).unwrap();
    assert_eq!(status, 200);
    assert_eq!(hostname, json!("web1"));
}

#[test]
fn post_sends_the_encoded_body_and_routes_a_4xx_to_the_category_callback() {
    let rt = tokio::runtime::Runtime::new().expect("tokio runtime should start");
    let server = rt.block_on(async { MockServer::start().await });

    rt.block_on(async {
        Mock::given(method("POST"))
            .and(path("/server"))
            .and(header("content-type", "application/json"))
            .and(body_json(json!({"server": {"hostname": "web2"}})))
            .respond_with(ResponseTemplate::new(402).set_body_json(json!({
                "error": {"error_code": "PAYMENT_REQUIRED", "error_message": "no credit"}
            })))
            .expect(1)
            .mount(&server)
            .await;
    });

    let host = host_for(server.uri());
    let (tx, rx) = channel();
    host.run(move |ctx| {
        let session = ctx.session(Credentials::new("user", "secret"));
        session.post(
            "server",
            &json!({"server": {"hostname": "web2"}}),
            CallbackSet::new()
                .on_client_error(move |resp| {
                    tx.send(
                        resp.data.as_ref().expect("decoded body")["error"]["error_code"].clone(),
                    )
                    .unwrap();
                })
                .on_response(|_| {}),
        )
    })
    .expect("script run");

    let code = rx.recv_timeout(Duration::from_secs(5)).unwrap();
    assert_eq!(code, json!("PAYMENT_REQUIRED"));
}

#[test]
fn connection_failure_is_routed_to_the_default_callback() {
    // Nothing listens on this port.
    let host = host_for("http://127.0.0.1:9".to_string());

    let (tx, rx) = channel();
    host.run(move |ctx| {
        let session = ctx.session(Credentials::new("user", "secret"));
        session.get(
            "server",
            CallbackSet::new()
                .on_client_error(|_| panic!("category callbacks never see network failures"))
                .on_completion(move |resp, err| {
                    tx.send((resp.is_none(), err.is_some())).unwrap();
                }),
        );
        Ok(())
    })
    .expect("script run");

    let (no_response, has_error) = rx.recv_timeout(Duration::from_secs(10)).unwrap();
    assert!(no_response);
    assert!(has_error);
}
