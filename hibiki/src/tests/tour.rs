use crate::encoding::{Base64, Gzip};
use crate::transport::MemoryTransport;
use crate::{Connection, Error, Formatted, ReqOption, ServiceOption, SubOption};
use async_nats::Message;
use bytes::Bytes;
use futures::StreamExt;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

fn pair() -> (Connection, Connection, MemoryTransport) {
    let broker = MemoryTransport::new();
    (
        Connection::new(broker.clone()),
        Connection::new(broker.clone()),
        broker,
    )
}

#[tokio::test]
async fn publish_and_subscribe_across_clients() {
    let (alice, bob, _broker) = pair();
    let mut all = bob.subscribe("natsv2.>", []).await.unwrap();

    alice.publish("natsv2.foo", "Hello World!").await.unwrap();
    alice.publish("natsv2.foo", 22).await.unwrap();
    alice.publish("natsv2.foo", Formatted(["derek", "ivan"])).await.unwrap();
    alice
        .publish("natsv2.bar", crate::encoding::json(&[1, 2, 3]).unwrap())
        .await
        .unwrap();

    let payloads: Vec<Bytes> = all.by_ref().take(4).map(|m| m.payload).collect().await;
    assert_eq!(
        payloads,
        ["Hello World!", "22", r#"["derek", "ivan"]"#, "[1,2,3]"]
    );
    assert_eq!(all.subject(), "natsv2.>");
}

#[tokio::test]
async fn queue_handlers_and_requests() {
    let (alice, bob, broker) = pair();
    let responder = bob.clone();
    let sub = bob
        .subscribe(
            "math.add",
            [
                SubOption::queue("adders"),
                SubOption::handler(move |msg: Message| {
                    let responder = responder.clone();
                    async move {
                        let text = String::from_utf8_lossy(&msg.payload).into_owned();
                        let sum: i64 = text
                            .split('+')
                            .filter_map(|n| n.trim().parse::<i64>().ok())
                            .sum();
                        if let Some(reply) = msg.reply {
                            let _ = responder.publish(reply.as_str(), sum).await;
                        }
                    }
                }),
            ],
        )
        .await
        .unwrap();
    assert_eq!(broker.subscription_count(), 1);

    let reply = alice
        .request("math.add", "2+2", [ReqOption::timeout(Duration::from_secs(2))])
        .await
        .unwrap();
    assert_eq!(reply.payload, "4");

    let token = CancellationToken::new();
    token.cancel();
    let err = alice
        .request("math.add", "1+1", [ReqOption::cancel_on(token)])
        .await
        .unwrap_err();
    assert!(matches!(err, Error::Cancelled));

    sub.close().await;
    let err = alice.request("math.add", "2+2", []).await.unwrap_err();
    assert!(matches!(err, Error::NoResponders));
}

#[tokio::test]
async fn streams_services_and_http_together() {
    let (alice, bob, _broker) = pair();

    let decoder = bob.stream("shout").then(Gzip).then(Base64);
    let svc = bob
        .service(
            "shout",
            "1.0.0",
            [
                ServiceOption::handler(move |msg: Message| {
                    let decoder = decoder.clone();
                    async move {
                        let words: Vec<String> = decoder.decode(&msg)?;
                        let loud: Vec<String> = words.iter().map(|w| w.to_uppercase()).collect();
                        let json = crate::encoding::json(&loud)?;
                        Ok::<_, anyhow::Error>(decoder.encoding().encode(json)?)
                    }
                }),
                ServiceOption::discover("services.shout", "upper cases words"),
            ],
        )
        .await
        .unwrap();
    let _http = bob
        .handle("web.hello", |req: http::Request<Bytes>| async move {
            let greeting = format!("Hello from NATS for {}!", req.uri().path());
            http::Response::new(Bytes::from(greeting))
        })
        .await
        .unwrap();

    let loud: Vec<String> = alice
        .stream("shout")
        .then(Gzip)
        .then(Base64)
        .request(&["hi", "there"], [])
        .await
        .unwrap();
    assert_eq!(loud, ["HI", "THERE"]);

    let info: crate::ServiceInfo = crate::encoding::from_json(
        &alice.request("services.shout", "", []).await.unwrap().payload,
    )
    .unwrap();
    assert_eq!(info.stats.requests, 1);

    let response = alice
        .http_request("web.hello", http::Request::new(Bytes::new()), [])
        .await
        .unwrap();
    assert_eq!(response.status(), http::StatusCode::OK);
    assert_eq!(response.body(), "Hello from NATS for /web/hello!");

    svc.shutdown().await.unwrap();
    alice.close().await.unwrap();
    assert!(matches!(alice.publish("shout", "x").await, Err(Error::Closed)));
}
