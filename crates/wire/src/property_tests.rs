// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Property tests: any request/response we can construct survives the codec.

use proptest::prelude::*;
use serde_json::json;

use crate::{RpcError, RpcRequest, RpcResponse};

fn arb_id() -> impl Strategy<Value = serde_json::Value> {
    prop_oneof![
        any::<i64>().prop_map(|n| json!(n)),
        "[a-zA-Z0-9_-]{1,32}".prop_map(|s| json!(s)),
        Just(json!(null)),
    ]
}

fn arb_params() -> impl Strategy<Value = Option<serde_json::Value>> {
    prop_oneof![
        Just(None),
        "[ -~]{0,64}".prop_map(|s| Some(json!({ "code": s }))),
        (any::<i32>(), "[a-z/._-]{1,40}")
            .prop_map(|(idx, path)| Some(json!({ "cell_index": idx, "notebook_path": path }))),
    ]
}

proptest! {
    #[test]
    fn request_roundtrips(
        id in arb_id(),
        method in "[a-z_/]{1,24}",
        params in arb_params(),
    ) {
        let req = RpcRequest {
            jsonrpc: "2.0".to_string(),
            id: Some(id),
            method,
            params,
        };
        let encoded = serde_json::to_string(&req).unwrap();
        // Newline-delimited framing requires single-line encodings
        prop_assert!(!encoded.contains('\n'));
        let decoded: RpcRequest = serde_json::from_str(&encoded).unwrap();
        prop_assert_eq!(req, decoded);
    }

    #[test]
    fn error_response_roundtrips(
        id in arb_id(),
        code in -32768i64..0,
        message in "[ -~]{0,64}",
    ) {
        let resp = RpcResponse::err(id, RpcError::new(code, message));
        let encoded = serde_json::to_string(&resp).unwrap();
        let decoded: RpcResponse = serde_json::from_str(&encoded).unwrap();
        prop_assert_eq!(resp, decoded);
    }
}
