use crate::{Connection, DebugPayload, IntoPayload, JsonPayload};
use futures::StreamExt;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonPayload)]
struct Person {
    name: String,
    address: String,
    age: u32,
}

#[derive(Debug, DebugPayload)]
struct Reading {
    sensor: &'static str,
    celsius: f32,
}

fn derek() -> Person {
    Person {
        name: "derek".into(),
        address: "Los Angeles, CA".into(),
        age: 22,
    }
}

#[test]
fn json_payload_serializes_with_serde() {
    let payload = derek().into_payload().unwrap();
    let back: Person = crate::encoding::from_json(&payload).unwrap();
    assert_eq!(back, derek());
}

#[test]
fn debug_payload_uses_debug() {
    let payload = Reading {
        sensor: "attic",
        celsius: 21.5,
    }
    .into_payload()
    .unwrap();
    assert_eq!(payload, r#"Reading { sensor: "attic", celsius: 21.5 }"#);
}

#[tokio::test]
async fn derived_payloads_can_be_published() {
    let nc = Connection::memory();
    let mut sub = nc.subscribe("people", []).await.unwrap();
    nc.publish("people", derek()).await.unwrap();

    let message = sub.next().await.unwrap();
    let person: Person = crate::encoding::from_json(&message.payload).unwrap();
    assert_eq!(person.name, "derek");
}
