//! Integration tests composing the envelope, message, and RPC layers.

#![allow(clippy::unwrap_used, clippy::panic)]

use bytes::Bytes;
use plotcast_types::{ConnectionId, RequestId};
use plotcast_wire::{
    DType, DataObject, NdArray, WireError, pack_envelope, pack_message, pack_rpc,
    unpack_envelope, unpack_message, unpack_rpc,
};

fn sample_grid() -> Vec<f64> {
    (0..12_u32).map(|i| f64::from(i) * 0.5 - 1.25).collect()
}

#[test]
fn float64_grid_round_trips_bit_exact() {
    let values = sample_grid();
    let array = NdArray::from_slice(vec![3, 4], &values).unwrap();

    let frames = pack_message(
        &ConnectionId::from("client-a"),
        &RequestId::from("req-1"),
        &serde_json::json!({"op": "push"}),
        &[DataObject::Array(array.clone())],
    )
    .unwrap();
    let message = unpack_message(&frames).unwrap();

    let [DataObject::Array(decoded)] = message.data.as_slice() else {
        panic!("expected one array, got {:?}", message.data);
    };
    assert_eq!(decoded.dtype(), DType::Float64);
    assert_eq!(decoded.shape(), &[3, 4]);
    assert_eq!(decoded.as_bytes(), array.as_bytes());
    let restored = decoded.to_vec::<f64>().unwrap();
    for (a, b) in restored.iter().zip(&values) {
        assert_eq!(a.to_bits(), b.to_bits());
    }
}

#[test]
fn nan_and_signed_zero_survive() {
    let values = [f64::NAN, -0.0, f64::INFINITY, f64::MIN_POSITIVE];
    let array = NdArray::from_slice(vec![4], &values).unwrap();
    let frames = pack_message(
        &ConnectionId::from("c"),
        &RequestId::from("r"),
        &serde_json::Value::Null,
        &[array.into()],
    )
    .unwrap();
    let message = unpack_message(&frames).unwrap();
    let [DataObject::Array(decoded)] = message.data.as_slice() else {
        panic!("expected one array");
    };
    let restored = decoded.to_vec::<f64>().unwrap();
    let bits: Vec<u64> = restored.iter().map(|v| v.to_bits()).collect();
    let expected: Vec<u64> = values.iter().map(|v| v.to_bits()).collect();
    assert_eq!(bits, expected);
}

#[test]
fn rpc_response_inside_envelope_round_trips() {
    let prefix = vec![Bytes::from_static(b"router-1"), Bytes::from_static(b"peer-9")];
    let response = pack_rpc(serde_json::json!({"rows": 3}));
    let payload = pack_message(
        &ConnectionId::from("client-a"),
        &RequestId::from("req-2"),
        &response,
        &[NdArray::from_slice(vec![3], &[1_u8, 2, 3]).unwrap().into()],
    )
    .unwrap();

    let envelope = unpack_envelope(pack_envelope(prefix.clone(), payload));
    assert_eq!(envelope.routing_prefix, prefix);

    let message = unpack_message(&envelope.payload).unwrap();
    assert_eq!(message.client_id.as_str(), "client-a");
    assert_eq!(message.request_id.as_str(), "req-2");
    assert_eq!(
        unpack_rpc(message.control).unwrap(),
        serde_json::json!({"rows": 3})
    );
}

#[test]
fn unknown_kind_surfaces_to_caller() {
    let mut frames = pack_message(
        &ConnectionId::from("c"),
        &RequestId::from("r"),
        &serde_json::json!({}),
        &[],
    )
    .unwrap();
    frames.push(Bytes::from_static(br#"{"kind":"sparse"}"#));
    frames.push(Bytes::from_static(b""));
    assert!(matches!(
        unpack_message(&frames),
        Err(WireError::UnknownKind(kind)) if kind == "sparse"
    ));
}
